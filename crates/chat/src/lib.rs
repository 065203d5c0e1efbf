//! schnack-chat – Zustellstatus-Automat fuer Nachrichten
//!
//! Dieses Crate implementiert:
//! - ChatService: Nachrichten anlegen, `delivered` und `seen` setzen,
//!   ganze Chats als gelesen markieren
//! - Teilnahmepruefung gegen die Teilnehmerliste im Store
//!
//! Verteilen ist Aufgabe des Relays. Der Service liefert nur die
//! tatsaechlich erfolgten Statusaenderungen zurueck; `None` bedeutet
//! "kein Uebergang, nichts zu verteilen".

pub mod error;
pub mod service;
pub mod types;


pub use error::{ChatError, ChatResult};
pub use service::{ChatService, MAX_NACHRICHTEN_LAENGE};
pub use types::{ChatGelesen, NachrichtEntwurf, StatusAenderung};
