//! Nachrichtenmodell und Zustellstatus
//!
//! Der Status einer Nachricht ist monoton: `sent < delivered < seen`.
//! Sowohl der Server als auch der Client-Store lehnen Rueckschritte ab.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::types::{ChatId, MessageId, UserId};

/// Zustellstatus einer Nachricht
///
/// Die Reihenfolge der Varianten bestimmt die `Ord`-Implementierung.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NachrichtenStatus {
    Sent,
    Delivered,
    Seen,
}

impl NachrichtenStatus {
    /// Gibt true zurueck wenn `neu` ein echter Fortschritt gegenueber `self` ist
    pub fn ist_fortschritt(self, neu: NachrichtenStatus) -> bool {
        neu > self
    }

    pub fn als_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }
}

impl std::fmt::Display for NachrichtenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

impl FromStr for NachrichtenStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "seen" => Ok(Self::Seen),
            other => Err(format!("Unbekannter Nachrichtenstatus: {other}")),
        }
    }
}

/// Art einer Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NachrichtenTyp {
    #[default]
    Text,
    Image,
    Video,
    Document,
    Audio,
}

impl NachrichtenTyp {
    pub fn als_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
        }
    }

    /// Medien-Nachrichten verweisen auf eine extern gespeicherte Datei
    pub fn ist_medium(self) -> bool {
        !matches!(self, Self::Text)
    }
}

impl FromStr for NachrichtenTyp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "document" => Ok(Self::Document),
            "audio" => Ok(Self::Audio),
            other => Err(format!("Unbekannter Nachrichtentyp: {other}")),
        }
    }
}

/// Ein Eintrag in `read_by`: wer hat wann gelesen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesebestaetigung {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// Vollstaendige Nachricht wie sie persistiert und an Clients verteilt wird
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nachricht {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(default)]
    pub message_type: NachrichtenTyp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    pub status: NachrichtenStatus,
    #[serde(default)]
    pub read_by: Vec<Lesebestaetigung>,
    pub created_at: DateTime<Utc>,
}

impl Nachricht {
    /// Hat `user_id` diese Nachricht bereits gelesen?
    pub fn gelesen_von(&self, user_id: UserId) -> bool {
        self.read_by.iter().any(|l| l.user_id == user_id)
    }
}
