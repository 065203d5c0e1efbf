//! Tipp-Anzeige – fluechtiges Relay von `typing` an den Raum
//!
//! Nicht persistiert, serverseitig nicht entprellt. Zusaetzlich merkt sich
//! der Broadcaster, wer gerade als tippend gemeldet ist, um haengende
//! Anzeigen aufzuloesen:
//! - beim Trennen einer Verbindung wird `is_typing: false` verteilt
//! - ein Sweeper verteilt `is_typing: false` nach Ablauf der TTL

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use schnack_core::{ChatId, ConnectionId, UserId};
use schnack_protocol::control::{ControlPayload, UserTyping};
use schnack_protocol::ControlMessage;
use tokio::task::JoinHandle;

use crate::registry::ClientHandle;
use crate::rooms::RoomMultiplexer;

#[derive(Debug, Clone, Copy)]
struct TippEintrag {
    connection_id: ConnectionId,
    seit: Instant,
}

pub struct TypingBroadcaster {
    rooms: Arc<RoomMultiplexer>,
    aktiv: Mutex<HashMap<(ChatId, UserId), TippEintrag>>,
    /// `None` deaktiviert das automatische Zuruecksetzen
    ttl: Option<Duration>,
}

impl TypingBroadcaster {
    pub fn neu(rooms: Arc<RoomMultiplexer>, ttl: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            rooms,
            aktiv: Mutex::new(HashMap::new()),
            ttl,
        })
    }

    /// Verteilt `user_typing` an den Raum ohne den Absender
    ///
    /// Wiederholte `true` und `false` ohne vorheriges `true` sind erlaubt.
    pub fn setzen(&self, absender: &ClientHandle, chat_id: ChatId, is_typing: bool) -> usize {
        {
            let mut aktiv = self.aktiv.lock();
            let schluessel = (chat_id, absender.user_id);
            if is_typing {
                aktiv.insert(
                    schluessel,
                    TippEintrag {
                        connection_id: absender.connection_id,
                        seit: Instant::now(),
                    },
                );
            } else {
                aktiv.remove(&schluessel);
            }
        }

        self.verteilen(chat_id, absender.user_id, is_typing, Some(absender.connection_id))
    }

    /// Setzt alle Tipp-Anzeigen einer getrennten Verbindung zurueck
    ///
    /// Nur Eintraege dieser Verbindung; eine neuere Verbindung derselben
    /// Identitaet bleibt unberuehrt.
    pub fn verbindung_beenden(&self, connection_id: ConnectionId) -> Vec<ChatId> {
        let beendet: Vec<(ChatId, UserId)> = {
            let mut aktiv = self.aktiv.lock();
            let schluessel: Vec<_> = aktiv
                .iter()
                .filter(|(_, e)| e.connection_id == connection_id)
                .map(|(k, _)| *k)
                .collect();
            for k in &schluessel {
                aktiv.remove(k);
            }
            schluessel
        };

        for (chat_id, user_id) in &beendet {
            self.verteilen(*chat_id, *user_id, false, Some(connection_id));
        }
        beendet.into_iter().map(|(chat_id, _)| chat_id).collect()
    }

    /// Setzt alle Eintraege zurueck, die aelter als die TTL sind
    ///
    /// Gibt die Anzahl der zurueckgesetzten Eintraege zurueck.
    pub fn abgelaufene_bereinigen(&self, jetzt: Instant) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };

        let abgelaufen: Vec<((ChatId, UserId), ConnectionId)> = {
            let mut aktiv = self.aktiv.lock();
            let schluessel: Vec<_> = aktiv
                .iter()
                .filter(|(_, e)| jetzt.saturating_duration_since(e.seit) >= ttl)
                .map(|(k, e)| (*k, e.connection_id))
                .collect();
            for (k, _) in &schluessel {
                aktiv.remove(k);
            }
            schluessel
        };

        for ((chat_id, user_id), connection_id) in &abgelaufen {
            tracing::debug!(user_id = %user_id, chat_id = %chat_id, "Tipp-Anzeige abgelaufen");
            self.verteilen(*chat_id, *user_id, false, Some(*connection_id));
        }
        abgelaufen.len()
    }

    pub fn tippt(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.aktiv.lock().contains_key(&(chat_id, user_id))
    }

    /// Startet den Sweeper (nur mit TTL)
    pub fn sweeper_starten(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let ttl = self.ttl?;
        let broadcaster = Arc::clone(self);
        let intervall = (ttl / 2).max(Duration::from_millis(100));

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(intervall);
            loop {
                ticker.tick().await;
                broadcaster.abgelaufene_bereinigen(Instant::now());
            }
        }))
    }

    fn verteilen(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        is_typing: bool,
        ausser: Option<ConnectionId>,
    ) -> usize {
        let ereignis = ControlMessage::ereignis(ControlPayload::UserTyping(UserTyping {
            user_id,
            chat_id,
            is_typing,
        }));
        self.rooms.broadcast(chat_id, &ereignis, ausser)
    }
}
