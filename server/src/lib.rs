//! schnack-server – Bibliotheks-Root
//!
//! Verdrahtet Store, Session-Store, Metriken und Relay und stellt den
//! oeffentlichen Einstiegspunkt fuer `main` bereit.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use config::ServerConfig;
use schnack_auth::SessionStore;
use schnack_db::SqliteDb;
use schnack_observability::{observability_server_starten, HealthState, SchnackMetrics};
use schnack_signaling::{SchnackState, SignalingServer};
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Datenbank oeffnen und migrieren
    /// 2. Session-Store mit Cleanup-Task
    /// 3. Observability-Server (/metrics, /health) und DB-Check
    /// 4. TCP-Relay bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let tcp_addr = self.config.tcp_bind_adresse()?;
        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %tcp_addr,
            "Server startet"
        );

        let db = Arc::new(SqliteDb::oeffnen(&self.config.datenbank_config()).await?);

        let session_store = SessionStore::neu();
        let session_cleanup = SessionStore::cleanup_starten(&session_store);

        let metriken = SchnackMetrics::neu()?;
        let health = HealthState::neu(metriken.clone());
        let mut hintergrund = vec![session_cleanup];

        if self.config.observability.aktiviert {
            let obs_addr = self.config.observability_bind_adresse()?;
            let (m, h) = (metriken.clone(), health.clone());
            hintergrund.push(tokio::spawn(async move {
                if let Err(e) = observability_server_starten(obs_addr, m, h).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            }));
            hintergrund.push(db_check_starten(
                Arc::clone(&db),
                health,
                Duration::from_secs(self.config.observability.db_check_sek.max(1)),
            ));
        }

        let state = SchnackState::neu(
            self.config.signaling_config(),
            db,
            session_store,
            metriken,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        hintergrund.push(tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown-Signal empfangen, Server wird beendet"),
                Err(e) => tracing::error!(fehler = %e, "Signal-Handler fehlgeschlagen"),
            }
            let _ = shutdown_tx.send(true);
        }));

        let ergebnis = SignalingServer::neu(state, tcp_addr)
            .starten(shutdown_rx)
            .await;

        for task in hintergrund {
            task.abort();
        }
        ergebnis?;
        tracing::info!("Server beendet");
        Ok(())
    }
}

/// Prueft periodisch die Datenbank und meldet das Ergebnis an `/health`
fn db_check_starten(
    db: Arc<SqliteDb>,
    health: HealthState,
    intervall: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(intervall);
        loop {
            ticker.tick().await;
            let erreichbar = db.erreichbar().await;
            if erreichbar != health.db_verbunden() {
                tracing::warn!(erreichbar, "Datenbank-Status geaendert");
            }
            health.db_status_setzen(erreichbar);
        }
    })
}
