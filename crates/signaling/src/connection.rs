//! Client-Connection – Verwaltet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientConnection` in einem eigenen
//! lokalen Task.
//!
//! ## Ablauf
//! ```text
//! Handshake (connect + Token) --fehlgeschlagen--> AUTH_REQUIRED, Ende
//!     |
//!     v
//! Registriert -> Befehle / Ereignisse / Keepalive
//!     |
//!     v
//! Aufraeumen: Registry, Raeume, Tipp-Anzeigen, Presence
//! ```
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen Ping
//! - Verbindungen ohne eingehendes Frame fuer `verbindungs_timeout_sek`
//!   werden getrennt
//!
//! ## Trennung von aussen
//! Verdraengung durch eine neuere Verbindung oder eine volle Send-Queue
//! loesen das `CancellationToken` des Handles aus.

use futures_util::{SinkExt, StreamExt};
use schnack_core::UserId;
use schnack_protocol::control::ConnectResponse;
use schnack_protocol::{ControlMessage, ControlPayload, ErrorCode, FrameCodec};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{jetzt_ms, MessageDispatcher};
use crate::error::{SignalingError, SignalingResult};
use crate::registry::ClientHandle;
use crate::server_state::{RelayStore, SchnackState};

type ControlFramed = Framed<TcpStream, FrameCodec>;

pub struct ClientConnection<R: RelayStore> {
    state: Arc<SchnackState<R>>,
    peer_addr: SocketAddr,
}

impl<R: RelayStore> ClientConnection<R> {
    pub fn neu(state: Arc<SchnackState<R>>, peer_addr: SocketAddr) -> Self {
        Self { state, peer_addr }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird oder ein Shutdown-Signal
    /// eingeht.
    pub async fn verarbeiten(self, stream: TcpStream, mut shutdown_rx: watch::Receiver<bool>) {
        let peer_addr = self.peer_addr;
        let config = Arc::clone(&self.state.config);
        let keepalive_intervall = Duration::from_secs(config.keepalive_sek);
        let timeout_dauer = Duration::from_secs(config.verbindungs_timeout_sek);

        tracing::info!(peer = %peer_addr, "Neue Verbindung");

        let mut framed = Framed::new(stream, FrameCodec::with_max_size(config.max_frame_groesse));

        let (user_id, connect_request_id) = match self.handshake(&mut framed, timeout_dauer).await
        {
            Ok(ergebnis) => ergebnis,
            Err(e) => {
                tracing::info!(peer = %peer_addr, fehler = %e, "Verbindungsaufbau abgelehnt");
                return;
            }
        };

        // Ausgehende Ereignisse (Raeume, Presence, Anrufe -> TCP)
        let (sende_tx, mut sende_rx) = mpsc::channel::<ControlMessage>(config.sende_queue_groesse);
        let abbruch = CancellationToken::new();
        let handle = ClientHandle::neu(
            user_id,
            sende_tx,
            abbruch.clone(),
            self.state.metriken.clone(),
        );
        self.state.registry.registrieren(handle.clone());

        let antwort = ControlMessage::new(
            connect_request_id,
            ControlPayload::ConnectResponse(ConnectResponse {
                user_id,
                connection_id: handle.connection_id,
                online_users: self.state.registry.online_benutzer(),
            }),
        );
        if let Err(e) = framed.send(antwort).await {
            tracing::warn!(peer = %peer_addr, fehler = %e, "connect_response konnte nicht gesendet werden");
            self.aufraeumen(&handle).await;
            return;
        }
        self.state.presence.online(user_id).await;

        tracing::info!(
            peer = %peer_addr,
            user_id = %user_id,
            connection_id = %handle.connection_id,
            "Verbindung authentifiziert"
        );

        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));

        // Zeitpunkt des letzten empfangenen Frames
        let mut letzter_empfang = Instant::now();
        let mut naechster_ping = Instant::now() + keepalive_intervall;
        let mut ping_request_id: u32 = 0;

        loop {
            let jetzt = Instant::now();

            if jetzt.duration_since(letzter_empfang) > timeout_dauer {
                tracing::warn!(peer = %peer_addr, user_id = %user_id, "Verbindungs-Timeout");
                break;
            }

            let ping_verzoegerung = if jetzt < naechster_ping {
                naechster_ping.duration_since(jetzt)
            } else {
                Duration::from_millis(1)
            };

            tokio::select! {
                biased;

                // Verdraengt oder Send-Queue uebergelaufen
                _ = abbruch.cancelled() => {
                    tracing::info!(
                        peer = %peer_addr,
                        user_id = %user_id,
                        "Verbindung von Relay getrennt"
                    );
                    break;
                }

                // Eingehender Befehl
                frame = framed.next() => {
                    match frame {
                        Some(Ok(nachricht)) => {
                            letzter_empfang = Instant::now();
                            tracing::trace!(
                                peer = %peer_addr,
                                request_id = nachricht.request_id,
                                "Nachricht empfangen"
                            );

                            if let Some(antwort) = dispatcher.dispatch(nachricht, &handle).await {
                                if let Err(e) = framed.send(antwort).await {
                                    tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!(peer = %peer_addr, user_id = %user_id, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Ausgehendes Ereignis
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "Ereignis-Senden fehlgeschlagen");
                        break;
                    }
                }

                // Keepalive-Ping
                _ = tokio::time::sleep(ping_verzoegerung) => {
                    if Instant::now() >= naechster_ping {
                        ping_request_id = ping_request_id.wrapping_add(1);
                        if let Err(e) = framed.send(ControlMessage::ping(ping_request_id, jetzt_ms())).await {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Ping-Senden fehlgeschlagen");
                            break;
                        }
                        naechster_ping = Instant::now() + keepalive_intervall;
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal, Verbindung wird getrennt");
                        let abschied = ControlMessage::error(
                            0,
                            ErrorCode::InternalError,
                            "Server wird heruntergefahren",
                        );
                        let _ = framed.send(abschied).await;
                        break;
                    }
                }
            }
        }

        self.aufraeumen(&handle).await;
        tracing::info!(peer = %peer_addr, "Verbindungs-Task beendet");
    }

    /// Erwartet `connect` als erstes Frame und prueft das Token
    ///
    /// Jede andere erste Nachricht oder ein ungueltiges Token wird mit
    /// `AUTH_REQUIRED` beantwortet; danach wird die Verbindung geschlossen.
    async fn handshake(
        &self,
        framed: &mut ControlFramed,
        timeout_dauer: Duration,
    ) -> SignalingResult<(UserId, u32)> {
        let erste = match tokio::time::timeout(timeout_dauer, framed.next()).await {
            Err(_) => return Err(SignalingError::Timeout),
            Ok(None) => return Err(SignalingError::VerbindungGetrennt),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(nachricht))) => nachricht,
        };
        let request_id = erste.request_id;

        let ControlPayload::Connect(anfrage) = erste.payload else {
            let _ = framed
                .send(ControlMessage::error(
                    request_id,
                    ErrorCode::AuthRequired,
                    "Erste Nachricht muss 'connect' sein",
                ))
                .await;
            return Err(SignalingError::protokoll("Erste Nachricht war kein connect"));
        };

        match self.state.auth_service.token_pruefen(&anfrage.token).await {
            Ok(user_id) => {
                tracing::debug!(
                    user_id = %user_id,
                    client_version = anfrage.client_version.as_deref().unwrap_or("unbekannt"),
                    "Token gueltig"
                );
                Ok((user_id, request_id))
            }
            Err(e) => {
                let _ = framed
                    .send(ControlMessage::error(
                        request_id,
                        ErrorCode::AuthRequired,
                        e.to_string(),
                    ))
                    .await;
                Err(e.into())
            }
        }
    }

    /// Entfernt die Verbindung aus Registry und allen Raeumen, bevor ein
    /// weiteres Ereignis sie erreichen kann
    async fn aufraeumen(&self, handle: &ClientHandle) {
        handle.trennen();

        let offline = self.state.registry.abmelden(handle);
        let raeume = self.state.rooms.alle_verlassen(handle.connection_id);
        self.state.typing.verbindung_beenden(handle.connection_id);

        if offline {
            self.state
                .presence
                .offline(handle.user_id, chrono::Utc::now())
                .await;
        }

        tracing::debug!(
            user_id = %handle.user_id,
            connection_id = %handle.connection_id,
            raeume = raeume.len(),
            "Verbindung aufgeraeumt"
        );
    }
}
