//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Relay ohne Konfigurationsdatei
//! lauffaehig ist.

use std::net::SocketAddr;

use schnack_db::DatabaseConfig;
use schnack_protocol::wire::DEFAULT_MAX_FRAME_SIZE;
use schnack_signaling::SignalingConfig;
use serde::{Deserialize, Serialize};

/// Umgebungsvariable mit dem Pfad der Konfigurationsdatei
pub const CONFIG_ENV: &str = "SCHNACK_CONFIG";

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerEinstellungen,
    pub netzwerk: NetzwerkEinstellungen,
    pub datenbank: DatenbankEinstellungen,
    /// Verbindungen, Keepalive, Tipp-Anzeige
    pub echtzeit: EchtzeitEinstellungen,
    pub logging: LoggingEinstellungen,
    /// Metriken und Health-Check
    pub observability: ObservabilityEinstellungen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename fuer Logs
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Verbindungen
    pub max_clients: u32,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Schnack Relay".into(),
            max_clients: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    pub bind_adresse: String,
    /// Port fuer die persistente Client-Verbindung
    pub tcp_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 9870,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatenbankEinstellungen {
    /// Verbindungs-URL
    pub url: String,
    /// Maximale Verbindungspool-Groesse
    pub max_verbindungen: u32,
    pub sqlite_wal: bool,
}

impl Default for DatenbankEinstellungen {
    fn default() -> Self {
        Self {
            url: "sqlite://schnack.db".into(),
            max_verbindungen: 5,
            sqlite_wal: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EchtzeitEinstellungen {
    /// Kapazitaet der Send-Queue pro Verbindung; Ueberlauf trennt die Verbindung
    pub sende_queue_groesse: usize,
    pub keepalive_sek: u64,
    /// Stille Verbindungen werden nach dieser Zeit getrennt
    pub verbindungs_timeout_sek: u64,
    /// Tipp-Anzeige wird nach dieser Zeit ohne Auffrischung zurueckgesetzt (0 = nie)
    pub typing_ttl_sek: u64,
    pub max_frame_groesse: usize,
}

impl Default for EchtzeitEinstellungen {
    fn default() -> Self {
        Self {
            sende_queue_groesse: 256,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            typing_ttl_sek: 10,
            max_frame_groesse: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    pub aktiviert: bool,
    /// Port fuer /metrics und /health
    pub port: u16,
    /// Intervall des DB-Checks fuer /health
    pub db_check_sek: u64,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
            db_check_sek: 30,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config.pruefen()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Weist Werte zurueck, mit denen der Relay nicht sinnvoll laufen kann
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if self.server.max_clients == 0 {
            anyhow::bail!("server.max_clients muss groesser als 0 sein");
        }
        if self.echtzeit.sende_queue_groesse == 0 {
            anyhow::bail!("echtzeit.sende_queue_groesse muss groesser als 0 sein");
        }
        if self.echtzeit.keepalive_sek == 0
            || self.echtzeit.verbindungs_timeout_sek <= self.echtzeit.keepalive_sek
        {
            anyhow::bail!(
                "echtzeit.verbindungs_timeout_sek muss groesser als keepalive_sek (> 0) sein"
            );
        }
        if !schnack_observability::logging::log_format_gueltig(&self.logging.format) {
            anyhow::bail!("Unbekanntes Log-Format '{}'", self.logging.format);
        }
        Ok(())
    }

    /// Gibt die Bind-Adresse fuer den Relay zurueck
    pub fn tcp_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let roh = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port);
        roh.parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Bind-Adresse '{roh}': {e}"))
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let roh = format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port);
        roh.parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Bind-Adresse '{roh}': {e}"))
    }

    pub fn datenbank_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.datenbank.url.clone(),
            max_verbindungen: self.datenbank.max_verbindungen,
            sqlite_wal: self.datenbank.sqlite_wal,
        }
    }

    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            max_clients: self.server.max_clients,
            keepalive_sek: self.echtzeit.keepalive_sek,
            verbindungs_timeout_sek: self.echtzeit.verbindungs_timeout_sek,
            sende_queue_groesse: self.echtzeit.sende_queue_groesse,
            typing_ttl_sek: self.echtzeit.typing_ttl_sek,
            max_frame_groesse: self.echtzeit.max_frame_groesse,
        }
    }
}
