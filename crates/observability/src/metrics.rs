//! Prometheus-kompatible Metriken fuer Schnack
//!
//! Registrierte Metriken:
//! - `schnack_connected_clients` – Gauge: Aktuell registrierte Verbindungen
//! - `schnack_rooms_active` – Gauge: Raeume mit mindestens einem Teilnehmer
//! - `schnack_messages_total` – Counter: Persistierte Nachrichten
//! - `schnack_status_transitions_total` – Counter (status): Zustell-Uebergaenge
//! - `schnack_deliveries_dropped_total` – Counter: Verworfene Zustellungen
//! - `schnack_forced_disconnects_total` – Counter: Trennungen wegen voller Send-Queue
//! - `schnack_call_signals_total` – Counter (kind): Weitergeleitete Anruf-Signale

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Schnack-Prometheus-Metriken
///
/// Clone teilt die Registry und alle Zaehler.
#[derive(Clone)]
pub struct SchnackMetrics {
    pub registry: Arc<Registry>,

    pub connected_clients: IntGauge,
    pub rooms_active: IntGauge,
    pub messages_total: IntCounter,
    pub status_transitions_total: IntCounterVec,
    pub deliveries_dropped_total: IntCounter,
    pub forced_disconnects_total: IntCounter,
    pub call_signals_total: IntCounterVec,
}

impl SchnackMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_clients = IntGauge::with_opts(Opts::new(
            "schnack_connected_clients",
            "Anzahl aktuell registrierter Verbindungen",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let rooms_active = IntGauge::with_opts(Opts::new(
            "schnack_rooms_active",
            "Anzahl Raeume mit mindestens einem Teilnehmer",
        ))?;
        registry.register(Box::new(rooms_active.clone()))?;

        let messages_total = IntCounter::with_opts(Opts::new(
            "schnack_messages_total",
            "Gesamtanzahl persistierter Nachrichten",
        ))?;
        registry.register(Box::new(messages_total.clone()))?;

        let status_transitions_total = IntCounterVec::new(
            Opts::new(
                "schnack_status_transitions_total",
                "Zustellstatus-Uebergaenge nach Zielstatus",
            ),
            &["status"],
        )?;
        registry.register(Box::new(status_transitions_total.clone()))?;

        let deliveries_dropped_total = IntCounter::with_opts(Opts::new(
            "schnack_deliveries_dropped_total",
            "Verworfene Zustellungen (Queue voll oder geschlossen)",
        ))?;
        registry.register(Box::new(deliveries_dropped_total.clone()))?;

        let forced_disconnects_total = IntCounter::with_opts(Opts::new(
            "schnack_forced_disconnects_total",
            "Zwangstrennungen wegen ueberlaufender Send-Queue",
        ))?;
        registry.register(Box::new(forced_disconnects_total.clone()))?;

        let call_signals_total = IntCounterVec::new(
            Opts::new(
                "schnack_call_signals_total",
                "Weitergeleitete Anruf-Signale nach Art",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(call_signals_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            rooms_active,
            messages_total,
            status_transitions_total,
            deliveries_dropped_total,
            forced_disconnects_total,
            call_signals_total,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: SchnackMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<SchnackMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
