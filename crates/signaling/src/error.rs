//! Fehlertypen fuer den Relay

use schnack_auth::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentifizierungsfehler: {0}")]
    Auth(#[from] AuthError),

    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Protokollfehler (ungueltiges Frame, falscher Zustand)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Keepalive- oder Handshake-Timeout
    #[error("Timeout")]
    Timeout,
}

impl SignalingError {
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }
}

pub type SignalingResult<T> = Result<T, SignalingError>;
