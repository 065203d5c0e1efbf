//! schnack-auth – Bearer-Token-Pruefung
//!
//! Der Relay stellt selbst keine Tokens aus. Dieses Crate kapselt den
//! Kollaborator der Tokens ausgibt und beim Verbindungsaufbau prueft:
//! - Session-Management (in-memory mit TTL)
//! - AuthService (Token -> Identitaet, Existenzpruefung im Store)

pub mod error;
pub mod service;
pub mod session;

pub use error::{AuthError, AuthResult};
pub use service::AuthService;
pub use session::{Session, SessionStore};
