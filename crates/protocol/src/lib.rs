//! schnack-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert den Ereigniskatalog zwischen Client und Relay
//! sowie das Frame-Format auf der TCP-Verbindung.

pub mod control;
pub mod wire;

pub use control::{CallSignal, CallSignalArt, ControlMessage, ControlPayload, ErrorCode};
pub use wire::FrameCodec;
