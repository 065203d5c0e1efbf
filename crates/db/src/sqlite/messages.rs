//! SQLite-Implementierung des MessageRepository
//!
//! Statusuebergaenge sind bedingte UPDATEs. Eine Anfrage gilt nur dann als
//! Uebergang, wenn sie tatsaechlich eine Zeile geaendert hat; parallele
//! Aufrufer fuer dieselbe Nachricht sehen so genau einen Gewinner.

use chrono::{DateTime, Utc};
use schnack_core::{ChatId, Lesebestaetigung, MessageId, Nachricht, NachrichtenStatus, UserId};

use crate::error::DbError;
use crate::models::{LeseErgebnis, NeueNachricht};
use crate::repository::{DbResult, MessageRepository};
use crate::sqlite::pool::SqliteDb;
use crate::sqlite::{id_parsen, zeit_formatieren, zeit_parsen};

const NACHRICHT_SPALTEN: &str = "id, chat_id, sender_id, content, message_type, file_url,
     file_name, file_size, reply_to, status, created_at";

impl MessageRepository for SqliteDb {
    async fn create(&self, data: NeueNachricht<'_>) -> DbResult<Nachricht> {
        let id = MessageId::new();
        let now = Utc::now();
        let id_str = id.inner().to_string();
        let chat_str = data.chat_id.inner().to_string();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO messages
             (id, chat_id, sender_id, content, message_type, file_url, file_name,
              file_size, reply_to, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'sent', ?)",
        )
        .bind(&id_str)
        .bind(&chat_str)
        .bind(data.sender_id.inner().to_string())
        .bind(data.content)
        .bind(data.message_type.als_str())
        .bind(data.file_url)
        .bind(data.file_name)
        .bind(data.file_size)
        .bind(data.reply_to.map(|r| r.inner().to_string()))
        .bind(zeit_formatieren(now))
        .execute(&mut *tx)
        .await?;

        let affected = sqlx::query("UPDATE chats SET last_message_id = ? WHERE id = ?")
            .bind(&id_str)
            .bind(&chat_str)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(DbError::nicht_gefunden(format!("Chat {}", data.chat_id)));
        }

        tx.commit().await?;

        Ok(Nachricht {
            id,
            chat_id: data.chat_id,
            sender_id: data.sender_id,
            content: data.content.to_string(),
            message_type: data.message_type,
            file_url: data.file_url.map(str::to_string),
            file_name: data.file_name.map(str::to_string),
            file_size: data.file_size,
            reply_to: data.reply_to,
            status: NachrichtenStatus::Sent,
            read_by: Vec::new(),
            created_at: now,
        })
    }

    async fn get_by_id(&self, id: MessageId) -> DbResult<Option<Nachricht>> {
        let sql = format!("SELECT {NACHRICHT_SPALTEN} FROM messages WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.inner().to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let mut nachricht = row_to_nachricht(&r)?;
                nachricht.read_by = self.read_by_laden(id).await?;
                Ok(Some(nachricht))
            }
            None => Ok(None),
        }
    }

    async fn als_zugestellt_markieren(&self, id: MessageId) -> DbResult<bool> {
        let affected =
            sqlx::query("UPDATE messages SET status = 'delivered' WHERE id = ? AND status = 'sent'")
                .bind(id.inner().to_string())
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(affected == 1)
    }

    async fn gelesen_markieren(
        &self,
        id: MessageId,
        leser: UserId,
        zeitpunkt: DateTime<Utc>,
    ) -> DbResult<LeseErgebnis> {
        let id_str = id.inner().to_string();
        let mut tx = self.pool.begin().await?;

        let eingefuegt = sqlx::query(
            "INSERT OR IGNORE INTO read_receipts (message_id, user_id, read_at) VALUES (?, ?, ?)",
        )
        .bind(&id_str)
        .bind(leser.inner().to_string())
        .bind(zeit_formatieren(zeitpunkt))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if eingefuegt == 0 {
            tx.rollback().await?;
            return Ok(LeseErgebnis::BereitsGelesen);
        }

        // Lesen impliziert Zustellung: sent und delivered gehen direkt auf seen
        sqlx::query("UPDATE messages SET status = 'seen' WHERE id = ? AND status != 'seen'")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(LeseErgebnis::Neu)
    }

    async fn ungelesene_fuer(&self, chat_id: ChatId, leser: UserId) -> DbResult<Vec<MessageId>> {
        use sqlx::Row as _;

        let leser_str = leser.inner().to_string();
        let rows = sqlx::query(
            "SELECT m.id FROM messages m
             WHERE m.chat_id = ? AND m.sender_id != ?
               AND NOT EXISTS (
                   SELECT 1 FROM read_receipts r
                   WHERE r.message_id = m.id AND r.user_id = ?
               )
             ORDER BY m.created_at, m.rowid",
        )
        .bind(chat_id.inner().to_string())
        .bind(&leser_str)
        .bind(&leser_str)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let s: String = r.try_get("id")?;
                id_parsen(&s, "message_id")
            })
            .collect()
    }
}

impl SqliteDb {
    async fn read_by_laden(&self, id: MessageId) -> DbResult<Vec<Lesebestaetigung>> {
        use sqlx::Row as _;

        let rows = sqlx::query(
            "SELECT user_id, read_at FROM read_receipts WHERE message_id = ? ORDER BY read_at",
        )
        .bind(id.inner().to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> DbResult<Lesebestaetigung> {
                let user_id: String = r.try_get("user_id")?;
                let read_at: String = r.try_get("read_at")?;
                Ok(Lesebestaetigung {
                    user_id: id_parsen(&user_id, "user_id")?,
                    read_at: zeit_parsen(&read_at)?,
                })
            })
            .collect()
    }
}

fn row_to_nachricht(row: &sqlx::sqlite::SqliteRow) -> DbResult<Nachricht> {
    use sqlx::Row as _;

    let id: String = row.try_get("id")?;
    let chat_id: String = row.try_get("chat_id")?;
    let sender_id: String = row.try_get("sender_id")?;
    let reply_to: Option<String> = row.try_get("reply_to")?;
    let typ: String = row.try_get("message_type")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Nachricht {
        id: id_parsen(&id, "message_id")?,
        chat_id: id_parsen(&chat_id, "chat_id")?,
        sender_id: id_parsen(&sender_id, "sender_id")?,
        content: row.try_get("content")?,
        message_type: typ.parse().map_err(DbError::intern)?,
        file_url: row.try_get("file_url")?,
        file_name: row.try_get("file_name")?,
        file_size: row.try_get("file_size")?,
        reply_to: reply_to
            .as_deref()
            .map(|s| id_parsen(s, "reply_to"))
            .transpose()?,
        status: status.parse().map_err(DbError::intern)?,
        read_by: Vec::new(),
        created_at: zeit_parsen(&created_at)?,
    })
}
