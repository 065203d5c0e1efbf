//! Wire-Format fuer TCP-Verbindungen
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload.
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE)                   | JSON      |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge zaehlt nur die Payload-Bytes. Frames ueber dem konfigurierten
//! Maximum (Standard: 1 MB) werden in beide Richtungen abgelehnt.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::control::ControlMessage;

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

fn ungueltig(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// tokio-util Codec fuer `Framed<TcpStream, FrameCodec>`
///
/// Wird vom Relay fuer jede angenommene Verbindung und vom Client
/// fuer die ausgehende Verbindung verwendet.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn groesse_pruefen(&self, laenge: usize) -> io::Result<()> {
        if laenge > self.max_frame_size {
            return Err(ungueltig(format!(
                "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                laenge, self.max_frame_size
            )));
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = ControlMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let mut kopf = [0u8; LENGTH_FIELD_SIZE];
        kopf.copy_from_slice(&src[..LENGTH_FIELD_SIZE]);
        let laenge = u32::from_be_bytes(kopf) as usize;
        self.groesse_pruefen(laenge)?;

        let gesamt = LENGTH_FIELD_SIZE + laenge;
        if src.len() < gesamt {
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(laenge);

        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|e| ungueltig(format!("JSON-Deserialisierung fehlgeschlagen: {e}")))
    }
}

impl Encoder<ControlMessage> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)
            .map_err(|e| ungueltig(format!("JSON-Serialisierung fehlgeschlagen: {e}")))?;
        self.groesse_pruefen(json.len())?;

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);
        Ok(())
    }
}
