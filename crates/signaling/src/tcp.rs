//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `SignalingServer` startet fuer jede eingehende Verbindung eine
//! `ClientConnection`. `max_clients` begrenzt die offenen Sockets, auch
//! solche die noch im Handshake stecken.
//!
//! ## Concurrency-Modell
//! Die Repository-Traits verwenden `async fn` ohne Send-Garantie, daher
//! laufen alle Verbindungs-Tasks in einer `tokio::task::LocalSet`. Ein
//! Relay-Prozess besitzt alle lebenden Verbindungen.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::LocalSet;

use crate::connection::ClientConnection;
use crate::server_state::{RelayStore, SchnackState};

pub struct SignalingServer<R: RelayStore> {
    state: Arc<SchnackState<R>>,
    bind_addr: SocketAddr,
    offene: Arc<AtomicUsize>,
}

/// Belegt einen Verbindungsplatz, solange der Verbindungs-Task lebt
struct Platz(Arc<AtomicUsize>);

impl Drop for Platz {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<R: RelayStore> SignalingServer<R> {
    pub fn neu(state: Arc<SchnackState<R>>, bind_addr: SocketAddr) -> Self {
        Self {
            state,
            bind_addr,
            offene: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bindet `bind_addr` und akzeptiert Verbindungen bis `shutdown_rx` `true` meldet
    pub async fn starten(self, shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.mit_listener_starten(listener, shutdown_rx).await
    }

    /// Wie `starten`, mit bereits gebundenem Listener (z.B. Port 0 in Tests)
    pub async fn mit_listener_starten(
        self,
        listener: TcpListener,
        shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let local = LocalSet::new();
        local.run_until(self.accept_loop(listener, shutdown_rx)).await
    }

    /// Interne Accept-Loop (laeuft innerhalb der LocalSet)
    async fn accept_loop(
        self,
        listener: TcpListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = listener.local_addr()?;
        let sweeper = self.state.typing.sweeper_starten();

        tracing::info!(adresse = %lokale_addr, "TCP Relay gestartet");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let offen = self.offene.load(Ordering::SeqCst);
                            if offen >= self.state.config.max_clients as usize {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    max = self.state.config.max_clients,
                                    "Server voll, Verbindung abgelehnt"
                                );
                                drop(stream);
                                continue;
                            }
                            self.offene.fetch_add(1, Ordering::SeqCst);
                            let platz = Platz(Arc::clone(&self.offene));

                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(peer = %peer_addr, fehler = %e, "TCP_NODELAY nicht gesetzt");
                            }

                            let verbindung = ClientConnection::neu(Arc::clone(&self.state), peer_addr);
                            let shutdown_rx_clone = shutdown_rx.clone();

                            // Lokaler Task, kein Send erforderlich
                            tokio::task::spawn_local(async move {
                                let _platz = platz;
                                verbindung.verarbeiten(stream, shutdown_rx_clone).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Relay: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        tracing::info!("TCP Relay gestoppt");
        Ok(())
    }
}
