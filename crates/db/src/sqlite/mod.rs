//! SQLite-Backend-Implementierungen fuer alle Repository-Traits
//!
//! UUIDs werden als TEXT gespeichert, Zeitpunkte als RFC3339 mit
//! Mikrosekunden, damit die lexikographische Ordnung der zeitlichen entspricht.

pub mod chats;
pub mod messages;
pub mod pool;
pub mod users;

pub use pool::SqliteDb;

use chrono::{DateTime, SecondsFormat, Utc};
use std::str::FromStr;

use crate::error::DbError;
use crate::repository::DbResult;

pub(crate) fn zeit_formatieren(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn zeit_parsen(s: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::intern(format!("Ungueltige Zeitangabe '{s}': {e}")))
}

/// Parst eine gespeicherte ID (UserId, ChatId, MessageId)
pub(crate) fn id_parsen<T>(s: &str, feld: &str) -> DbResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    s.parse::<T>()
        .map_err(|e| DbError::intern(format!("Ungueltige {feld} '{s}': {e}")))
}
