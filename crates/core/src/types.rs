//! Gemeinsame Identifikationstypen fuer Schnack
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Auf dem Draht
//! und in der Datenbank erscheinen sie als nackte UUID.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

macro_rules! id_typ {
    ($(#[$meta:meta])* $name:ident, $praefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Erstellt eine neue zufaellige ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Gibt die innere UUID zurueck
            pub fn inner(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($praefix, ":{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            /// Akzeptiert sowohl die nackte UUID als auch die Display-Form mit Praefix
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let roh = s.strip_prefix(concat!($praefix, ":")).unwrap_or(s);
                Uuid::parse_str(roh).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

id_typ!(
    /// Eindeutige Benutzer-ID
    UserId,
    "user"
);

id_typ!(
    /// Eindeutige Chat-ID (entspricht einem Raum im Relay)
    ChatId,
    "chat"
);

id_typ!(
    /// Eindeutige Nachrichten-ID
    MessageId,
    "msg"
);

id_typ!(
    /// ID einer einzelnen Live-Verbindung
    ///
    /// Eine Identitaet kann nacheinander mehrere Verbindungen haben;
    /// die ConnectionId unterscheidet alte von neuen Handles.
    ConnectionId,
    "conn"
);
