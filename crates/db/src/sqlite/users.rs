//! SQLite-Implementierung des UserRepository

use chrono::{DateTime, Utc};
use schnack_core::UserId;

use crate::error::DbError;
use crate::models::{BenutzerRecord, NeuerBenutzer};
use crate::repository::{DbResult, UserRepository};
use crate::sqlite::pool::SqliteDb;
use crate::sqlite::{id_parsen, zeit_formatieren, zeit_parsen};

impl UserRepository for SqliteDb {
    async fn create(&self, data: NeuerBenutzer<'_>) -> DbResult<BenutzerRecord> {
        let id = UserId::new();
        let now = Utc::now();

        sqlx::query("INSERT INTO users (id, username, created_at) VALUES (?, ?, ?)")
            .bind(id.inner().to_string())
            .bind(data.username)
            .bind(zeit_formatieren(now))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                DbError::aus_insert(e, || {
                    format!("Benutzername '{}' bereits vergeben", data.username)
                })
            })?;

        Ok(BenutzerRecord {
            id,
            username: data.username.to_string(),
            created_at: now,
            is_online: false,
            last_seen: None,
        })
    }

    async fn get_by_id(&self, id: UserId) -> DbResult<Option<BenutzerRecord>> {
        let row = sqlx::query(
            "SELECT id, username, created_at, is_online, last_seen FROM users WHERE id = ?",
        )
        .bind(id.inner().to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_benutzer(&r)).transpose()
    }

    async fn presence_speichern(
        &self,
        id: UserId,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        let affected = sqlx::query(
            "UPDATE users SET is_online = ?, last_seen = COALESCE(?, last_seen) WHERE id = ?",
        )
        .bind(is_online as i64)
        .bind(last_seen.map(zeit_formatieren))
        .bind(id.inner().to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DbError::nicht_gefunden(format!("Benutzer {id}")));
        }
        Ok(())
    }
}

fn row_to_benutzer(row: &sqlx::sqlite::SqliteRow) -> DbResult<BenutzerRecord> {
    use sqlx::Row as _;

    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;
    let is_online: i64 = row.try_get("is_online")?;
    let last_seen: Option<String> = row.try_get("last_seen")?;

    Ok(BenutzerRecord {
        id: id_parsen(&id, "user_id")?,
        username: row.try_get("username")?,
        created_at: zeit_parsen(&created_at)?,
        is_online: is_online != 0,
        last_seen: last_seen.as_deref().map(zeit_parsen).transpose()?,
    })
}
