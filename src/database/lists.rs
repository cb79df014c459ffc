use chrono::{DateTime, Utc};
use sqlx::{query, query_as, query_scalar, Sqlite, Transaction};
use teloxide::types::{ChatId, UserId};

use super::{Database, Error};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct NumberEntry {
    pub normalized: String,
    pub used: bool,
    pub used_by: Option<i64>,
    pub added_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl NumberEntry {
    pub fn handed_to(&self) -> Option<UserId> {
        self.used_by.map(|id| UserId(id as u64))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListStats {
    pub total: u64,
    pub unused: u64,
    pub used: u64,
}

async fn create_list(
    transaction: &mut Transaction<'_, Sqlite>,
    chat_id: ChatId,
) -> Result<(), Error> {
    query("INSERT INTO lists (chat_id, created_at) VALUES (?, ?) ON CONFLICT(chat_id) DO NOTHING")
        .bind(chat_id.0)
        .bind(Utc::now())
        .execute(&mut **transaction)
        .await
        .map(|_| ())
}

/// Inserts the numbers that are not in the list yet, returns how many were new.
async fn insert_numbers(
    transaction: &mut Transaction<'_, Sqlite>,
    chat_id: ChatId,
    numbers: &[String],
) -> Result<u64, Error> {
    let added_at = Utc::now();
    let mut added = 0;

    for number in numbers {
        added += query(
            "INSERT INTO numbers (chat_id, normalized, added_at) VALUES (?, ?, ?)
            ON CONFLICT(chat_id, normalized) DO NOTHING",
        )
        .bind(chat_id.0)
        .bind(number)
        .bind(added_at)
        .execute(&mut **transaction)
        .await?
        .rows_affected();
    }

    Ok(added)
}

impl Database {
    /// Appends the numbers missing from the chat's list. Returns the new total
    /// and the count actually added.
    pub async fn add_numbers(
        &self,
        chat_id: ChatId,
        numbers: &[String],
    ) -> Result<(u64, u64), Error> {
        let mut transaction = self.pool.begin().await?;

        create_list(&mut transaction, chat_id).await?;
        let added = insert_numbers(&mut transaction, chat_id, numbers).await?;

        let total: i64 = query_scalar("SELECT COUNT(*) FROM numbers WHERE chat_id = ?")
            .bind(chat_id.0)
            .fetch_one(&mut *transaction)
            .await?;

        transaction.commit().await?;

        Ok((total as u64, added))
    }

    /// Drops the chat's list and stores the given numbers as a fresh one.
    /// Repeats within `numbers` are stored once.
    pub async fn replace_numbers(&self, chat_id: ChatId, numbers: &[String]) -> Result<u64, Error> {
        let mut transaction = self.pool.begin().await?;

        query("DELETE FROM numbers WHERE chat_id = ?")
            .bind(chat_id.0)
            .execute(&mut *transaction)
            .await?;
        query("DELETE FROM lists WHERE chat_id = ?")
            .bind(chat_id.0)
            .execute(&mut *transaction)
            .await?;

        create_list(&mut transaction, chat_id).await?;
        let count = insert_numbers(&mut transaction, chat_id, numbers).await?;

        transaction.commit().await?;

        Ok(count)
    }

    #[cfg(test)]
    pub async fn list_entries(&self, chat_id: ChatId) -> Result<Vec<NumberEntry>, Error> {
        query_as(
            "SELECT normalized, used, used_by, added_at, used_at
            FROM numbers WHERE chat_id = ? ORDER BY id",
        )
        .bind(chat_id.0)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn list_unused(&self, chat_id: ChatId) -> Result<Vec<NumberEntry>, Error> {
        query_as(
            "SELECT normalized, used, used_by, added_at, used_at
            FROM numbers WHERE chat_id = ? AND used = 0 ORDER BY id",
        )
        .bind(chat_id.0)
        .fetch_all(&self.pool)
        .await
    }

    /// Marks the entry as handed out to `user_id`. Returns `false` if there is
    /// no such entry or it has already been used.
    pub async fn mark_used(
        &self,
        chat_id: ChatId,
        normalized: &str,
        user_id: UserId,
        used_at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        query(
            "UPDATE numbers SET used = 1, used_by = ?, used_at = ?
            WHERE chat_id = ? AND normalized = ? AND used = 0",
        )
        .bind(user_id.0 as i64)
        .bind(used_at)
        .bind(chat_id.0)
        .bind(normalized)
        .execute(&self.pool)
        .await
        .map(|r| r.rows_affected() > 0)
    }

    /// Counts of the chat's list, `None` if the chat never had one.
    pub async fn list_stats(&self, chat_id: ChatId) -> Result<Option<ListStats>, Error> {
        let row: Option<(i64, i64)> = query_as(
            "SELECT COUNT(n.id), COALESCE(SUM(n.used), 0)
            FROM lists l LEFT JOIN numbers n ON n.chat_id = l.chat_id
            WHERE l.chat_id = ?
            GROUP BY l.chat_id",
        )
        .bind(chat_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(total, used)| ListStats {
            total: total as u64,
            unused: (total - used) as u64,
            used: used as u64,
        }))
    }
}
