//! Raum-Multiplexer – Fan-out an die aktuellen Teilnehmer eines Chats
//!
//! Ein Raum entspricht einer Chat-ID und haelt die Handles der Verbindungen,
//! die den Chat gerade abonniert haben. Raeume entstehen beim ersten Beitritt
//! und verschwinden, sobald der letzte Teilnehmer geht.
//!
//! ## Locking
//! Jeder Raum hat einen eigenen Mutex. Die `DashMap` dient nur zum Auffinden
//! des Raums; ihr Shard-Lock wird nie gehalten, waehrend ein Raum gesperrt
//! ist. Ein geleerter Raum wird als `entfernt` markiert, damit ein
//! gleichzeitiger Beitritt einen frischen Raum anlegt statt in den toten
//! einzutreten.
//!
//! Ob eine Verbindung einem Chat beitreten darf, prueft der Aufrufer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use schnack_core::{ChatId, ConnectionId, UserId};
use schnack_observability::SchnackMetrics;
use schnack_protocol::ControlMessage;

use crate::registry::ClientHandle;

#[derive(Default)]
struct Raum {
    teilnehmer: HashMap<ConnectionId, ClientHandle>,
    entfernt: bool,
}

pub struct RoomMultiplexer {
    raeume: DashMap<ChatId, Arc<Mutex<Raum>>>,
    /// Rueckwaerts-Index fuer das Aufraeumen beim Trennen
    mitgliedschaften: DashMap<ConnectionId, HashSet<ChatId>>,
    metriken: SchnackMetrics,
}

impl RoomMultiplexer {
    pub fn neu(metriken: SchnackMetrics) -> Arc<Self> {
        Arc::new(Self {
            raeume: DashMap::new(),
            mitgliedschaften: DashMap::new(),
            metriken,
        })
    }

    /// Fuegt den Handle dem Raum hinzu. Doppelter Beitritt ist ein No-op.
    ///
    /// Gibt `true` zurueck wenn der Handle neu im Raum ist.
    pub fn beitreten(&self, handle: &ClientHandle, chat_id: ChatId) -> bool {
        loop {
            let raum = Arc::clone(
                self.raeume
                    .entry(chat_id)
                    .or_insert_with(|| {
                        self.metriken.rooms_active.inc();
                        Arc::new(Mutex::new(Raum::default()))
                    })
                    .value(),
            );

            let mut guard = raum.lock();
            if guard.entfernt {
                // Der Raum wurde gerade geleert; toten Eintrag wegraeumen und neu anlegen
                drop(guard);
                if self
                    .raeume
                    .remove_if(&chat_id, |_, r| Arc::ptr_eq(r, &raum))
                    .is_some()
                {
                    self.metriken.rooms_active.dec();
                }
                continue;
            }

            let neu = guard
                .teilnehmer
                .insert(handle.connection_id, handle.clone())
                .is_none();
            drop(guard);

            if neu {
                self.mitgliedschaften
                    .entry(handle.connection_id)
                    .or_default()
                    .insert(chat_id);
                tracing::debug!(
                    user_id = %handle.user_id,
                    chat_id = %chat_id,
                    "Raum beigetreten"
                );
            }
            return neu;
        }
    }

    /// Entfernt den Handle aus dem Raum. Nicht beigetreten ist ein No-op.
    pub fn verlassen(&self, connection_id: ConnectionId, chat_id: ChatId) -> bool {
        let entfernt = self.aus_raum_entfernen(connection_id, chat_id);
        if entfernt {
            if let Some(mut chats) = self.mitgliedschaften.get_mut(&connection_id) {
                chats.remove(&chat_id);
            }
            self.mitgliedschaften
                .remove_if(&connection_id, |_, chats| chats.is_empty());
            tracing::debug!(connection_id = %connection_id, chat_id = %chat_id, "Raum verlassen");
        }
        entfernt
    }

    /// Entfernt eine Verbindung aus allen Raeumen (beim Trennen)
    ///
    /// Gibt die Chats zurueck, in denen die Verbindung war.
    pub fn alle_verlassen(&self, connection_id: ConnectionId) -> Vec<ChatId> {
        let chats: Vec<ChatId> = self
            .mitgliedschaften
            .remove(&connection_id)
            .map(|(_, chats)| chats.into_iter().collect())
            .unwrap_or_default();

        for chat_id in &chats {
            self.aus_raum_entfernen(connection_id, *chat_id);
        }
        chats
    }

    /// Sendet an alle aktuellen Teilnehmer, optional ohne den Absender
    ///
    /// Best-effort: verworfene Zustellungen zaehlen nicht als Fehler.
    /// Gibt die Anzahl der eingereihten Nachrichten zurueck.
    pub fn broadcast(
        &self,
        chat_id: ChatId,
        nachricht: &ControlMessage,
        ausser: Option<ConnectionId>,
    ) -> usize {
        let Some(raum) = self.raum(chat_id) else {
            return 0;
        };

        // Unter dem Raum-Lock, damit ein entfernter Handle nichts mehr erhaelt
        let guard = raum.lock();
        guard
            .teilnehmer
            .values()
            .filter(|h| Some(h.connection_id) != ausser)
            .filter(|h| h.senden(nachricht.clone()))
            .count()
    }

    /// Handles aller aktuellen Teilnehmer
    pub fn teilnehmer_handles(&self, chat_id: ChatId) -> Vec<ClientHandle> {
        self.raum(chat_id)
            .map(|raum| raum.lock().teilnehmer.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Identitaeten der aktuellen Teilnehmer (ohne Duplikate, sortiert)
    pub fn occupants(&self, chat_id: ChatId) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .teilnehmer_handles(chat_id)
            .iter()
            .map(|h| h.user_id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn ist_im_raum(&self, connection_id: ConnectionId, chat_id: ChatId) -> bool {
        self.raum(chat_id)
            .is_some_and(|raum| raum.lock().teilnehmer.contains_key(&connection_id))
    }

    pub fn raum_anzahl(&self) -> usize {
        self.raeume.len()
    }

    fn raum(&self, chat_id: ChatId) -> Option<Arc<Mutex<Raum>>> {
        self.raeume.get(&chat_id).map(|r| Arc::clone(r.value()))
    }

    fn aus_raum_entfernen(&self, connection_id: ConnectionId, chat_id: ChatId) -> bool {
        let Some(raum) = self.raum(chat_id) else {
            return false;
        };

        let (entfernt, leer) = {
            let mut guard = raum.lock();
            let entfernt = guard.teilnehmer.remove(&connection_id).is_some();
            let leer = entfernt && guard.teilnehmer.is_empty();
            if leer {
                guard.entfernt = true;
            }
            (entfernt, leer)
        };

        if leer
            && self
                .raeume
                .remove_if(&chat_id, |_, r| Arc::ptr_eq(r, &raum))
                .is_some()
        {
            self.metriken.rooms_active.dec();
            tracing::trace!(chat_id = %chat_id, "Leerer Raum entfernt");
        }
        entfernt
    }
}
