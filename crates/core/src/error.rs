//! Fehlertypen fuer Schnack
//!
//! Zentraler Fehler-Enum mit der Taxonomie des Relays. Untermodule definieren
//! eigene Fehler und konvertieren an der Grenze zum Draht in diesen Typ,
//! damit jede Fehlerart genau einem Fehlercode entspricht. Fehlgeschlagene
//! Zustellungen tauchen hier nicht auf: sie werden nur geloggt und gezaehlt.

use thiserror::Error;

/// Alle Fehlerzustaende die einer Verbindung gemeldet werden koennen
#[derive(Debug, Error)]
pub enum SchnackError {
    // --- Authentifizierung & Autorisierung ---
    #[error("Authentifizierung erforderlich: {0}")]
    AuthErforderlich(String),

    #[error("Nicht berechtigt: {0}")]
    NichtBerechtigt(String),

    // --- Ressourcen ---
    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    // --- Eingaben ---
    #[error("Ungueltige Anfrage: {0}")]
    UngueltigeAnfrage(String),

    // --- Persistenz ---
    #[error("Persistenz fehlgeschlagen: {0}")]
    Persistenz(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = SchnackError::NichtGefunden("Nachricht msg:1".into());
        assert_eq!(e.to_string(), "Nicht gefunden: Nachricht msg:1");
    }
}
