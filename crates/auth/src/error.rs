//! Fehlertypen fuer den Auth-Service

use schnack_core::SchnackError;
use thiserror::Error;

/// Alle moeglichen Fehler im Auth-Service
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Kein Token angegeben")]
    TokenFehlt,

    #[error("Session nicht gefunden oder abgelaufen")]
    SessionUngueltig,

    #[error("Session abgelaufen")]
    SessionAbgelaufen,

    #[error("Benutzer nicht gefunden: {0}")]
    BenutzerNichtGefunden(String),

    #[error("Datenbankfehler: {0}")]
    Datenbank(#[from] schnack_db::DbError),
}

/// Result-Alias fuer den Auth-Service
pub type AuthResult<T> = Result<T, AuthError>;

impl From<AuthError> for SchnackError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Datenbank(db) => SchnackError::Persistenz(db.to_string()),
            andere => SchnackError::AuthErforderlich(andere.to_string()),
        }
    }
}
