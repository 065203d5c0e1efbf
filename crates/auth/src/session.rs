//! Session-Management fuer Schnack
//!
//! Bearer-Tokens werden im Speicher gehalten (HashMap mit TTL).
//! Ein Hintergrund-Task bereinigt abgelaufene Sessions.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rand::RngCore;
use schnack_core::UserId;
use tokio::sync::RwLock;

use crate::error::{AuthError, AuthResult};

/// Standard-Session-Lebensdauer: 24 Stunden
pub const STANDARD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const CLEANUP_INTERVALL: Duration = Duration::from_secs(15 * 60);

/// Ein ausgegebenes Bearer-Token
#[derive(Debug, Clone)]
pub struct Session {
    /// URL-sicheres Base64 aus 32 Zufallsbytes
    pub token: String,
    pub user_id: UserId,
    pub erstellt_am: DateTime<Utc>,
    pub laeuft_ab_am: DateTime<Utc>,
}

impl Session {
    pub fn ist_gueltig(&self) -> bool {
        Utc::now() < self.laeuft_ab_am
    }
}

/// In-Memory Session-Store mit TTL
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: chrono::Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::mit_ttl(STANDARD_TTL)
    }
}

impl SessionStore {
    pub fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mit_ttl(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(1)),
        }
    }

    /// Startet den periodischen Cleanup-Task fuer diesen Store
    pub fn cleanup_starten(store: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(store);
        tokio::spawn(async move {
            let mut intervall = tokio::time::interval(CLEANUP_INTERVALL);
            intervall.tick().await;
            loop {
                intervall.tick().await;
                let entfernt = store.cleanup_abgelaufene().await;
                if entfernt > 0 {
                    tracing::debug!(anzahl = entfernt, "Abgelaufene Sessions bereinigt");
                }
            }
        })
    }

    /// Gibt ein neues Token fuer `user_id` aus
    pub async fn erstellen(&self, user_id: UserId) -> Session {
        let jetzt = Utc::now();
        let session = Session {
            token: token_generieren(),
            user_id,
            erstellt_am: jetzt,
            laeuft_ab_am: jetzt + self.ttl,
        };

        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());
        tracing::debug!(user_id = %user_id, "Neue Session erstellt");
        session
    }

    pub async fn validieren(&self, token: &str) -> AuthResult<Session> {
        let sessions = self.sessions.read().await;
        match sessions.get(token) {
            None => Err(AuthError::SessionUngueltig),
            Some(session) if !session.ist_gueltig() => Err(AuthError::SessionAbgelaufen),
            Some(session) => Ok(session.clone()),
        }
    }

    pub async fn invalidieren(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Entfernt abgelaufene Sessions, gibt die Anzahl zurueck
    pub async fn cleanup_abgelaufene(&self) -> usize {
        let jetzt = Utc::now();
        let mut sessions = self.sessions.write().await;
        let vorher = sessions.len();
        sessions.retain(|_, s| s.laeuft_ab_am > jetzt);
        vorher - sessions.len()
    }

    pub async fn anzahl_aktive(&self) -> usize {
        let jetzt = Utc::now();
        let sessions = self.sessions.read().await;
        sessions.values().filter(|s| s.laeuft_ab_am > jetzt).count()
    }
}

fn token_generieren() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_erstellen_und_validieren() {
        let store = SessionStore::neu();
        let user_id = UserId::new();

        let session = store.erstellen(user_id).await;
        assert!(session.ist_gueltig());
        assert_eq!(session.token.len(), 43, "32 Bytes ergeben 43 Base64-Zeichen");

        let validiert = store.validieren(&session.token).await.unwrap();
        assert_eq!(validiert.user_id, user_id);
    }

    #[tokio::test]
    async fn unbekanntes_token_ist_ungueltig() {
        let store = SessionStore::neu();
        let ergebnis = store.validieren("kein_gueltiger_token").await;
        assert!(matches!(ergebnis, Err(AuthError::SessionUngueltig)));
    }

    #[tokio::test]
    async fn abgelaufene_session_wird_abgelehnt_und_bereinigt() {
        let store = SessionStore::mit_ttl(Duration::ZERO);
        let session = store.erstellen(UserId::new()).await;

        let ergebnis = store.validieren(&session.token).await;
        assert!(matches!(ergebnis, Err(AuthError::SessionAbgelaufen)));
        assert_eq!(store.cleanup_abgelaufene().await, 1);
        assert_eq!(store.anzahl_aktive().await, 0);
    }

    #[tokio::test]
    async fn invalidieren_entfernt_token() {
        let store = SessionStore::neu();
        let session = store.erstellen(UserId::new()).await;

        assert!(store.invalidieren(&session.token).await);
        assert!(!store.invalidieren(&session.token).await);
        assert!(store.validieren(&session.token).await.is_err());
    }
}
