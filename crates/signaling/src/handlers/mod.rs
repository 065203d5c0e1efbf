//! Handler fuer alle Client-Befehle
//!
//! Jeder Handler prueft die Berechtigung, ruft die zustaendige Komponente
//! auf und baut die Antwort. Verteilt wird erst nach erfolgreichem
//! Persistieren.

pub mod call_handler;
pub mod message_handler;
pub mod room_handler;
pub mod typing_handler;

use schnack_chat::ChatError;
use schnack_core::SchnackError;
use schnack_protocol::ControlMessage;

/// Wandelt einen Service-Fehler in eine Fehler-Antwort an den Aufrufer
pub(crate) fn fehler_antwort(request_id: u32, fehler: ChatError) -> ControlMessage {
    let fehler = SchnackError::from(fehler);
    ControlMessage::fehler(request_id, &fehler)
}
