//! Gemeinsamer Relay-Zustand
//!
//! Haelt alle geteilten Services und Zustands-Komponenten. Alle
//! Verbindungs-Tasks greifen ueber ein `Arc<SchnackState>` darauf zu.

use std::sync::Arc;
use std::time::Duration;

use schnack_auth::{AuthService, SessionStore};
use schnack_chat::ChatService;
use schnack_db::{ChatRepository, MessageRepository, UserRepository};
use schnack_observability::SchnackMetrics;
use schnack_protocol::wire::DEFAULT_MAX_FRAME_SIZE;

use crate::calls::CallRelay;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomMultiplexer;
use crate::typing::TypingBroadcaster;

/// Store-Anforderungen des Relays
pub trait RelayStore: UserRepository + ChatRepository + MessageRepository + 'static {}

impl<T> RelayStore for T where T: UserRepository + ChatRepository + MessageRepository + 'static {}

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Maximale Anzahl offener Verbindungen, Handshake eingeschlossen
    pub max_clients: u32,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer stille Verbindungen in Sekunden (gilt auch fuer den Handshake)
    pub verbindungs_timeout_sek: u64,
    /// Kapazitaet der Send-Queue pro Verbindung
    pub sende_queue_groesse: usize,
    /// 0 deaktiviert das automatische Zuruecksetzen der Tipp-Anzeige
    pub typing_ttl_sek: u64,
    pub max_frame_groesse: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_clients: 1024,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            sende_queue_groesse: 256,
            typing_ttl_sek: 10,
            max_frame_groesse: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl SignalingConfig {
    pub fn typing_ttl(&self) -> Option<Duration> {
        (self.typing_ttl_sek > 0).then(|| Duration::from_secs(self.typing_ttl_sek))
    }
}

pub struct SchnackState<R: RelayStore> {
    pub config: Arc<SignalingConfig>,
    /// Token -> Identitaet beim Verbindungsaufbau
    pub auth_service: Arc<AuthService<R>>,
    /// Zustellstatus-Automat
    pub chat_service: Arc<ChatService<R>>,
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomMultiplexer>,
    pub presence: PresenceTracker<R>,
    pub typing: Arc<TypingBroadcaster>,
    pub calls: CallRelay,
    pub metriken: SchnackMetrics,
}

impl<R: RelayStore> SchnackState<R> {
    pub fn neu(
        config: SignalingConfig,
        store: Arc<R>,
        session_store: Arc<SessionStore>,
        metriken: SchnackMetrics,
    ) -> Arc<Self> {
        let registry = ConnectionRegistry::neu(metriken.clone());
        let rooms = RoomMultiplexer::neu(metriken.clone());
        let typing = TypingBroadcaster::neu(Arc::clone(&rooms), config.typing_ttl());

        Arc::new(Self {
            auth_service: Arc::new(AuthService::neu(Arc::clone(&store), session_store)),
            chat_service: ChatService::neu(Arc::clone(&store)),
            presence: PresenceTracker::neu(Arc::clone(&registry), store),
            calls: CallRelay::neu(Arc::clone(&registry), Arc::clone(&rooms), metriken.clone()),
            config: Arc::new(config),
            registry,
            rooms,
            typing,
            metriken,
        })
    }
}
