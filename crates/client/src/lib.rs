//! schnack-client – Client-Seite des Schnack-Relays
//!
//! - `ServerConnection`: TCP-Verbindung mit Bearer-Handshake, Anfragen mit
//!   Request-ID, gepufferte Ereignisse, automatische Pongs
//! - `ChatStore`: wendet Server-Ereignisse idempotent an und laesst den
//!   Zustellstatus nie zurueckfallen; optimistisches Senden mit `temp_id`
//! - `AnrufTracker`: Anruf-Automat pro Chat aus Sicht eines Endpunkts

pub mod anruf;
pub mod connection;
pub mod error;
pub mod store;

pub use anruf::{AnrufPhase, AnrufSitzung, AnrufTracker, EndeGrund};
pub use connection::ServerConnection;
pub use error::{ClientError, ClientResult};
pub use store::{textnachricht, ChatStore, ChatUebersicht, PresenceEintrag};
