//! SQLite-Implementierung des ChatRepository

use chrono::Utc;
use schnack_core::{ChatId, UserId};

use crate::error::DbError;
use crate::models::{ChatRecord, NeuerChat};
use crate::repository::{ChatRepository, DbResult};
use crate::sqlite::pool::SqliteDb;
use crate::sqlite::{id_parsen, zeit_formatieren, zeit_parsen};

impl ChatRepository for SqliteDb {
    async fn create(&self, data: NeuerChat<'_>) -> DbResult<ChatRecord> {
        if data.participants.is_empty() {
            return Err(DbError::UngueltigeDaten(
                "Chat ohne Teilnehmer".to_string(),
            ));
        }

        let id = ChatId::new();
        let now = Utc::now();
        let id_str = id.inner().to_string();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO chats (id, name, is_group, admin_id, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id_str)
        .bind(data.name)
        .bind(data.is_group as i64)
        .bind(data.admin_id.map(|a| a.inner().to_string()))
        .bind(zeit_formatieren(now))
        .execute(&mut *tx)
        .await?;

        let mut participants: Vec<UserId> = Vec::with_capacity(data.participants.len());
        for user_id in data.participants {
            if participants.contains(user_id) {
                continue;
            }
            sqlx::query("INSERT INTO chat_participants (chat_id, user_id) VALUES (?, ?)")
                .bind(&id_str)
                .bind(user_id.inner().to_string())
                .execute(&mut *tx)
                .await?;
            participants.push(*user_id);
        }

        tx.commit().await?;

        Ok(ChatRecord {
            id,
            name: data.name.map(str::to_string),
            is_group: data.is_group,
            admin_id: data.admin_id,
            participants,
            last_message_id: None,
            created_at: now,
        })
    }

    async fn get_by_id(&self, id: ChatId) -> DbResult<Option<ChatRecord>> {
        use sqlx::Row as _;

        let Some(row) = sqlx::query(
            "SELECT id, name, is_group, admin_id, last_message_id, created_at
             FROM chats WHERE id = ?",
        )
        .bind(id.inner().to_string())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let is_group: i64 = row.try_get("is_group")?;
        let admin_id: Option<String> = row.try_get("admin_id")?;
        let last_message_id: Option<String> = row.try_get("last_message_id")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Some(ChatRecord {
            id,
            name: row.try_get("name")?,
            is_group: is_group != 0,
            admin_id: admin_id
                .as_deref()
                .map(|s| id_parsen(s, "admin_id"))
                .transpose()?,
            participants: self.teilnehmer(id).await?,
            last_message_id: last_message_id
                .as_deref()
                .map(|s| id_parsen(s, "last_message_id"))
                .transpose()?,
            created_at: zeit_parsen(&created_at)?,
        }))
    }

    async fn ist_teilnehmer(&self, chat_id: ChatId, user_id: UserId) -> DbResult<bool> {
        let row = sqlx::query("SELECT 1 FROM chat_participants WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id.inner().to_string())
            .bind(user_id.inner().to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn teilnehmer(&self, chat_id: ChatId) -> DbResult<Vec<UserId>> {
        use sqlx::Row as _;

        let rows = sqlx::query(
            "SELECT user_id FROM chat_participants WHERE chat_id = ? ORDER BY rowid",
        )
        .bind(chat_id.inner().to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let s: String = r.try_get("user_id")?;
                id_parsen(&s, "user_id")
            })
            .collect()
    }
}
