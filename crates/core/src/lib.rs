//! schnack-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Schnack-Crates gemeinsam genutzt werden: IDs, das Nachrichtenmodell
//! mit seinem Zustellstatus und den zentralen Fehler-Enum.

pub mod error;
pub mod nachricht;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::SchnackError;
pub use nachricht::{Lesebestaetigung, Nachricht, NachrichtenStatus, NachrichtenTyp};
pub use types::{ChatId, ConnectionId, MessageId, UserId};
