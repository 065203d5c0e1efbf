//! schnack-signaling – TCP Echtzeit-Relay
//!
//! Dieser Crate verbindet authentifizierte Clients miteinander. Er haelt
//! ausschliesslich fluechtigen Zustand; Nachrichten und Zustellstatus liegen
//! im Store und werden ueber den `ChatService` veraendert.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein lokaler Task)
//!     |  Handshake: connect + Bearer-Token
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- RoomHandler     (join_chat, leave_chat)
//!     +-- MessageHandler  (send_message, message_delivered, message_seen, mark_chat_read)
//!     +-- TypingHandler   (typing)
//!     +-- CallHandler     (call_invite .. call_end)
//!
//! ConnectionRegistry – Identitaet -> genau ein Handle
//! RoomMultiplexer    – Fan-out an die aktuellen Teilnehmer eines Chats
//! PresenceTracker    – user_online / user_offline an alle
//! TypingBroadcaster  – Tipp-Anzeige mit Aufraeumen beim Trennen und TTL
//! CallRelay          – zustandsloses Weiterreichen von Anruf-Signalen
//! ```
//!
//! Der Relay geht von genau einem Prozess aus, der alle Verbindungen
//! besitzt. Mehrere Instanzen braeuchten ein geteiltes Raum- und
//! Presence-Verzeichnis hinter `ConnectionRegistry` und `RoomMultiplexer`.

pub mod calls;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod server_state;
pub mod tcp;
pub mod typing;

pub use calls::CallRelay;
pub use connection::ClientConnection;
pub use dispatcher::MessageDispatcher;
pub use error::{SignalingError, SignalingResult};
pub use presence::PresenceTracker;
pub use registry::{ClientHandle, ConnectionRegistry};
pub use rooms::RoomMultiplexer;
pub use server_state::{RelayStore, SchnackState, SignalingConfig};
pub use tcp::SignalingServer;
pub use typing::TypingBroadcaster;
