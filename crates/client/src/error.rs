//! Fehlertypen fuer die Client-Verbindung

use schnack_protocol::ErrorCode;
use thiserror::Error;

/// Fehler die bei der Server-Verbindung auftreten koennen
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP-Verbindung oder Frame-Codec fehlgeschlagen
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Server hat mit einer Fehler-Antwort reagiert
    #[error("Server-Fehler ({code:?}): {message}")]
    Server {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Unerwartete Antwort: {0}")]
    UnerwarteteAntwort(String),

    #[error("Verbindung vom Server getrennt")]
    VerbindungGetrennt,

    #[error("Zeitueberschreitung beim Warten auf den Server")]
    Timeout,
}

impl ClientError {
    /// Fehler-Code des Servers, falls es eine Fehler-Antwort war
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
