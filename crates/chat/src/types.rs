//! Ein- und Ausgabetypen des ChatService

use schnack_core::{ChatId, Lesebestaetigung, MessageId, NachrichtenStatus, NachrichtenTyp};

use crate::error::ChatError;

/// Vom Absender eingereichte, noch nicht persistierte Nachricht
#[derive(Debug, Clone, Default)]
pub struct NachrichtEntwurf {
    pub chat_id: ChatId,
    pub content: String,
    pub message_type: NachrichtenTyp,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
    pub reply_to: Option<MessageId>,
}

/// Ein erfolgter Statusuebergang, bereit zum Verteilen an den Raum
#[derive(Debug, Clone, PartialEq)]
pub struct StatusAenderung {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub status: NachrichtenStatus,
    /// Nur bei `seen` gesetzt
    pub read_by: Option<Vec<Lesebestaetigung>>,
}

/// Ergebnis von `chat_als_gelesen_markieren`
///
/// `aenderungen` sind bereits persistiert und muessen verteilt werden, auch
/// wenn `fehler` gesetzt ist. Der Fehler betrifft die erste Nachricht, an der
/// abgebrochen wurde.
#[derive(Debug, Default)]
pub struct ChatGelesen {
    pub aenderungen: Vec<StatusAenderung>,
    pub fehler: Option<ChatError>,
}
