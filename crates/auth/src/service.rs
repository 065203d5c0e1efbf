//! Auth-Service fuer Schnack
//!
//! Loest ein Bearer-Token in eine Identitaet auf. Die Identitaet ist danach
//! fuer die gesamte Lebensdauer der Verbindung fest.

use std::sync::Arc;

use schnack_core::UserId;
use schnack_db::repository::UserRepository;

use crate::{
    error::{AuthError, AuthResult},
    session::{Session, SessionStore},
};

pub struct AuthService<U: UserRepository> {
    user_repo: Arc<U>,
    session_store: Arc<SessionStore>,
}

impl<U: UserRepository> AuthService<U> {
    pub fn neu(user_repo: Arc<U>, session_store: Arc<SessionStore>) -> Self {
        Self {
            user_repo,
            session_store,
        }
    }

    /// Gibt ein Token fuer einen existierenden Benutzer aus
    pub async fn sitzung_erstellen(&self, user_id: UserId) -> AuthResult<Session> {
        if self.user_repo.get_by_id(user_id).await?.is_none() {
            return Err(AuthError::BenutzerNichtGefunden(user_id.to_string()));
        }
        Ok(self.session_store.erstellen(user_id).await)
    }

    /// Prueft ein Bearer-Token beim Verbindungsaufbau
    ///
    /// Das Token muss gueltig sein und der Benutzer muss noch im Store existieren.
    pub async fn token_pruefen(&self, token: &str) -> AuthResult<UserId> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        if token.is_empty() {
            return Err(AuthError::TokenFehlt);
        }

        let session = self.session_store.validieren(token).await?;
        if self.user_repo.get_by_id(session.user_id).await?.is_none() {
            tracing::warn!(user_id = %session.user_id, "Token gehoert zu geloeschtem Benutzer");
            return Err(AuthError::BenutzerNichtGefunden(session.user_id.to_string()));
        }

        Ok(session.user_id)
    }

    pub async fn abmelden(&self, token: &str) -> bool {
        self.session_store.invalidieren(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schnack_db::{NeuerBenutzer, SqliteDb};

    async fn service() -> (AuthService<SqliteDb>, UserId) {
        let db = Arc::new(SqliteDb::in_memory().await.unwrap());
        let user = UserRepository::create(&*db, NeuerBenutzer { username: "alice" })
            .await
            .unwrap();
        (AuthService::neu(db, SessionStore::neu()), user.id)
    }

    #[tokio::test]
    async fn gueltiges_token_liefert_identitaet() {
        let (auth, alice) = service().await;
        let session = auth.sitzung_erstellen(alice).await.unwrap();

        assert_eq!(auth.token_pruefen(&session.token).await.unwrap(), alice);
        let mit_praefix = format!("Bearer {}", session.token);
        assert_eq!(auth.token_pruefen(&mit_praefix).await.unwrap(), alice);
    }

    #[tokio::test]
    async fn leeres_und_falsches_token_abgelehnt() {
        let (auth, _) = service().await;
        assert!(matches!(auth.token_pruefen("").await, Err(AuthError::TokenFehlt)));
        assert!(matches!(
            auth.token_pruefen("erfunden").await,
            Err(AuthError::SessionUngueltig)
        ));
    }

    #[tokio::test]
    async fn kein_token_fuer_unbekannten_benutzer() {
        let (auth, _) = service().await;
        let ergebnis = auth.sitzung_erstellen(UserId::new()).await;
        assert!(matches!(ergebnis, Err(AuthError::BenutzerNichtGefunden(_))));
    }

    #[tokio::test]
    async fn abgemeldetes_token_ungueltig() {
        let (auth, alice) = service().await;
        let session = auth.sitzung_erstellen(alice).await.unwrap();
        assert!(auth.abmelden(&session.token).await);
        assert!(auth.token_pruefen(&session.token).await.is_err());
    }
}
