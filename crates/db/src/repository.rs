//! Repository-Trait-Definitionen
//!
//! Die Traits verwenden `async fn` ohne `Send`-Bound. Der Relay fuehrt alle
//! Verbindungs-Tasks in einem `LocalSet` aus und braucht daher keine
//! `Send`-Futures.

use chrono::{DateTime, Utc};
use schnack_core::{ChatId, MessageId, Nachricht, UserId};

use crate::error::DbError;
use crate::models::{BenutzerRecord, ChatRecord, LeseErgebnis, NeueNachricht, NeuerBenutzer, NeuerChat};

pub type DbResult<T> = Result<T, DbError>;

/// Konfiguration fuer die Datenbankverbindung
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Verbindungs-URL (z.B. "sqlite://schnack.db")
    pub url: String,
    /// Maximale Anzahl gleichzeitiger Verbindungen im Pool
    pub max_verbindungen: u32,
    pub sqlite_wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://schnack.db".into(),
            max_verbindungen: 5,
            sqlite_wal: true,
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait UserRepository: Send + Sync {
    async fn create(&self, data: NeuerBenutzer<'_>) -> DbResult<BenutzerRecord>;

    async fn get_by_id(&self, id: UserId) -> DbResult<Option<BenutzerRecord>>;

    /// Schreibt den Presence-Zustand zurueck in den Benutzer-Datensatz
    ///
    /// `last_seen = None` laesst den bisherigen Wert stehen.
    async fn presence_speichern(
        &self,
        id: UserId,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> DbResult<()>;
}

#[allow(async_fn_in_trait)]
pub trait ChatRepository: Send + Sync {
    async fn create(&self, data: NeuerChat<'_>) -> DbResult<ChatRecord>;

    async fn get_by_id(&self, id: ChatId) -> DbResult<Option<ChatRecord>>;

    async fn ist_teilnehmer(&self, chat_id: ChatId, user_id: UserId) -> DbResult<bool>;

    async fn teilnehmer(&self, chat_id: ChatId) -> DbResult<Vec<UserId>>;
}

#[allow(async_fn_in_trait)]
pub trait MessageRepository: Send + Sync {
    /// Persistiert eine Nachricht mit Status `sent` und setzt `last_message_id` des Chats
    async fn create(&self, data: NeueNachricht<'_>) -> DbResult<Nachricht>;

    /// Laedt eine Nachricht inklusive `read_by`
    async fn get_by_id(&self, id: MessageId) -> DbResult<Option<Nachricht>>;

    /// Compare-and-set `sent -> delivered`
    ///
    /// Gibt `true` zurueck wenn diese Anfrage den Uebergang ausgefuehrt hat.
    async fn als_zugestellt_markieren(&self, id: MessageId) -> DbResult<bool>;

    /// Traegt `(leser, zeitpunkt)` in `read_by` ein und hebt den Status auf `seen`
    async fn gelesen_markieren(
        &self,
        id: MessageId,
        leser: UserId,
        zeitpunkt: DateTime<Utc>,
    ) -> DbResult<LeseErgebnis>;

    /// IDs aller Nachrichten im Chat die nicht von `leser` stammen und die er noch nicht gelesen hat
    async fn ungelesene_fuer(&self, chat_id: ChatId, leser: UserId) -> DbResult<Vec<MessageId>>;
}
