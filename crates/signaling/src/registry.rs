//! Connection-Registry – Identitaet -> genau eine lebende Verbindung
//!
//! Jede authentifizierte Verbindung wird mit einem `ClientHandle` registriert.
//! Meldet sich eine Identitaet erneut an, wird der alte Handle verdraengt und
//! seine Verbindung ueber das `CancellationToken` geschlossen
//! (last-writer-wins).
//!
//! ## Zustellung
//! `ClientHandle::senden` ist nicht-blockierend (`try_send`). Eine volle
//! Send-Queue fuehrt zur Zwangstrennung des Empfaengers, nie zu Backpressure
//! beim Absender.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use schnack_core::{ConnectionId, UserId};
use schnack_observability::SchnackMetrics;
use schnack_protocol::ControlMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// ClientHandle
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer authentifizierten Verbindung
#[derive(Clone)]
pub struct ClientHandle {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub verbunden_seit: DateTime<Utc>,
    tx: mpsc::Sender<ControlMessage>,
    abbruch: CancellationToken,
    metriken: SchnackMetrics,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("connection_id", &self.connection_id)
            .field("user_id", &self.user_id)
            .field("verbunden_seit", &self.verbunden_seit)
            .finish()
    }
}

impl ClientHandle {
    pub fn neu(
        user_id: UserId,
        tx: mpsc::Sender<ControlMessage>,
        abbruch: CancellationToken,
        metriken: SchnackMetrics,
    ) -> Self {
        Self {
            connection_id: ConnectionId::new(),
            user_id,
            verbunden_seit: Utc::now(),
            tx,
            abbruch,
            metriken,
        }
    }

    /// Reiht eine Nachricht nicht-blockierend in die Send-Queue ein
    ///
    /// Gibt `false` zurueck wenn die Nachricht verworfen wurde. Bei voller
    /// Queue wird die Verbindung zusaetzlich zur Trennung markiert.
    pub fn senden(&self, nachricht: ControlMessage) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metriken.deliveries_dropped_total.inc();
                if !self.abbruch.is_cancelled() {
                    tracing::warn!(
                        user_id = %self.user_id,
                        connection_id = %self.connection_id,
                        "Send-Queue voll, Verbindung wird getrennt"
                    );
                    self.metriken.forced_disconnects_total.inc();
                    self.abbruch.cancel();
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metriken.deliveries_dropped_total.inc();
                tracing::debug!(
                    user_id = %self.user_id,
                    connection_id = %self.connection_id,
                    "Send-Queue geschlossen (Client getrennt)"
                );
                false
            }
        }
    }

    /// Markiert die Verbindung zur Trennung
    pub fn trennen(&self) {
        self.abbruch.cancel();
    }

    pub fn ist_getrennt(&self) -> bool {
        self.abbruch.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

/// Zuordnung Identitaet -> aktiver Handle
///
/// Ein einzelner Mutex schuetzt die Map. Alle Operationen sind kurz und
/// fuehren unter dem Lock keine IO aus.
pub struct ConnectionRegistry {
    verbindungen: Mutex<HashMap<UserId, ClientHandle>>,
    metriken: SchnackMetrics,
}

impl ConnectionRegistry {
    pub fn neu(metriken: SchnackMetrics) -> Arc<Self> {
        Arc::new(Self {
            verbindungen: Mutex::new(HashMap::new()),
            metriken,
        })
    }

    /// Registriert einen Handle und verdraengt einen eventuell vorhandenen
    ///
    /// Der verdraengte Handle wird getrennt, bevor er zurueckgegeben wird.
    pub fn registrieren(&self, handle: ClientHandle) -> Option<ClientHandle> {
        let user_id = handle.user_id;
        let connection_id = handle.connection_id;

        let (verdraengt, anzahl) = {
            let mut verbindungen = self.verbindungen.lock();
            let alt = verbindungen.insert(user_id, handle);
            (alt, verbindungen.len())
        };
        self.metriken.connected_clients.set(anzahl as i64);

        if let Some(ref alt) = verdraengt {
            alt.trennen();
            tracing::info!(
                user_id = %user_id,
                alte_verbindung = %alt.connection_id,
                neue_verbindung = %connection_id,
                "Bestehende Verbindung verdraengt"
            );
        } else {
            tracing::debug!(user_id = %user_id, connection_id = %connection_id, "Verbindung registriert");
        }
        verdraengt
    }

    /// Entfernt die Zuordnung, falls sie noch auf genau diesen Handle zeigt
    ///
    /// Gibt `true` zurueck wenn die Identitaet danach offline ist. Ein bereits
    /// verdraengter Handle aendert nichts.
    pub fn abmelden(&self, handle: &ClientHandle) -> bool {
        let (entfernt, anzahl) = {
            let mut verbindungen = self.verbindungen.lock();
            let passt = verbindungen
                .get(&handle.user_id)
                .is_some_and(|h| h.connection_id == handle.connection_id);
            if passt {
                verbindungen.remove(&handle.user_id);
            }
            (passt, verbindungen.len())
        };

        if entfernt {
            self.metriken.connected_clients.set(anzahl as i64);
            tracing::debug!(
                user_id = %handle.user_id,
                connection_id = %handle.connection_id,
                "Verbindung abgemeldet"
            );
        }
        entfernt
    }

    /// Handle fuer gezielte Zustellung; `None` heisst "gerade nicht erreichbar"
    pub fn lookup(&self, user_id: &UserId) -> Option<ClientHandle> {
        self.verbindungen.lock().get(user_id).cloned()
    }

    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.verbindungen.lock().contains_key(user_id)
    }

    pub fn online_benutzer(&self) -> Vec<UserId> {
        self.verbindungen.lock().keys().copied().collect()
    }

    pub fn anzahl(&self) -> usize {
        self.verbindungen.lock().len()
    }

    /// Sendet an alle registrierten Verbindungen
    ///
    /// Gibt die Anzahl der eingereihten Nachrichten zurueck.
    pub fn an_alle_senden(&self, nachricht: &ControlMessage) -> usize {
        let handles: Vec<ClientHandle> = self.verbindungen.lock().values().cloned().collect();

        handles
            .iter()
            .filter(|h| h.senden(nachricht.clone()))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
