//! Datenbankmodelle fuer Schnack
//!
//! Benutzer und Chats haben eigene Record-Typen. Nachrichten werden direkt
//! als [`schnack_core::Nachricht`] geladen, da Relay, Protokoll und Client
//! dieselbe Darstellung verwenden.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use schnack_core::{ChatId, MessageId, NachrichtenTyp, UserId};

// ---------------------------------------------------------------------------
// Benutzer
// ---------------------------------------------------------------------------

/// Benutzer-Datensatz inklusive zuletzt persistierter Presence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenutzerRecord {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NeuerBenutzer<'a> {
    pub username: &'a str,
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

/// Chat-Datensatz mit Teilnehmerliste
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: ChatId,
    pub name: Option<String>,
    pub is_group: bool,
    pub admin_id: Option<UserId>,
    pub participants: Vec<UserId>,
    pub last_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NeuerChat<'a> {
    pub name: Option<&'a str>,
    pub is_group: bool,
    pub admin_id: Option<UserId>,
    pub participants: &'a [UserId],
}

// ---------------------------------------------------------------------------
// Nachrichten
// ---------------------------------------------------------------------------

/// Daten zum Erstellen einer neuen Nachricht (Status ist immer `sent`)
#[derive(Debug, Clone)]
pub struct NeueNachricht<'a> {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: &'a str,
    pub message_type: NachrichtenTyp,
    pub file_url: Option<&'a str>,
    pub file_name: Option<&'a str>,
    pub file_size: Option<i64>,
    pub reply_to: Option<MessageId>,
}

/// Ergebnis von `gelesen_markieren`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeseErgebnis {
    /// Lesebestaetigung neu eingetragen, Status ist jetzt `seen`
    Neu,
    /// Leser stand bereits in `read_by`, nichts geaendert
    BereitsGelesen,
}
