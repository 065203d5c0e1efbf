//! schnack-db – Datenbank-Abstraktion
//!
//! Das Repository-Pattern entkoppelt Relay und Zustellstatus-Logik vom
//! konkreten Store. Der Store ist die dauerhafte Quelle der Wahrheit; der
//! Relay haelt selbst nur fluechtigen Verbindungs- und Raumzustand.

pub mod error;
pub mod models;
pub mod repository;
pub mod sqlite;

pub use error::DbError;
pub use models::{BenutzerRecord, ChatRecord, LeseErgebnis, NeueNachricht, NeuerBenutzer, NeuerChat};
pub use repository::{ChatRepository, DatabaseConfig, DbResult, MessageRepository, UserRepository};
pub use sqlite::SqliteDb;
