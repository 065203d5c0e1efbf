//! Fehlertypen fuer das Chat-Crate

use schnack_core::SchnackError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Nachricht nicht gefunden: {0}")]
    NachrichtNichtGefunden(String),

    #[error("Chat nicht gefunden: {0}")]
    ChatNichtGefunden(String),

    #[error("Keine Berechtigung: {0}")]
    KeineBerechtigung(String),

    #[error("Ungueltige Eingabe: {0}")]
    UngueltigeEingabe(String),

    #[error("Datenbank-Fehler: {0}")]
    DatenbankFehler(#[from] schnack_db::DbError),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl From<ChatError> for SchnackError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::NachrichtNichtGefunden(_) | ChatError::ChatNichtGefunden(_) => {
                SchnackError::NichtGefunden(e.to_string())
            }
            ChatError::KeineBerechtigung(_) => SchnackError::NichtBerechtigt(e.to_string()),
            ChatError::UngueltigeEingabe(_) => SchnackError::UngueltigeAnfrage(e.to_string()),
            ChatError::DatenbankFehler(db) => SchnackError::Persistenz(db.to_string()),
        }
    }
}
