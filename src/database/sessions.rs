use chrono::Utc;
use sqlx::{query, query_as};
use teloxide::types::{ChatId, UserId};

use super::{Database, Error};

/// The step a user is at in a multi-message flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    AwaitingNumbers,
    AwaitingCountryCode,
    Dispensing { country_code: String },
}

impl Flow {
    fn state_name(&self) -> &'static str {
        match self {
            Flow::AwaitingNumbers => "awaiting_numbers",
            Flow::AwaitingCountryCode => "awaiting_country_code",
            Flow::Dispensing { .. } => "dispensing",
        }
    }

    fn country_code(&self) -> Option<&str> {
        match self {
            Flow::Dispensing { country_code } => Some(country_code),
            _ => None,
        }
    }

    fn from_row(state: &str, country_code: Option<String>) -> Option<Self> {
        match (state, country_code) {
            ("awaiting_numbers", _) => Some(Flow::AwaitingNumbers),
            ("awaiting_country_code", _) => Some(Flow::AwaitingCountryCode),
            ("dispensing", Some(country_code)) => Some(Flow::Dispensing { country_code }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub chat_id: ChatId,
    pub flow: Flow,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    chat_id: i64,
    state: String,
    country_code: Option<String>,
}

impl Database {
    /// Starts a flow for the user, replacing whatever flow was running before.
    pub async fn begin_session(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        flow: &Flow,
    ) -> Result<(), Error> {
        query(
            "INSERT INTO sessions (user_id, chat_id, state, country_code, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT(user_id)
                DO UPDATE SET chat_id = $2, state = $3, country_code = $4, updated_at = $5",
        )
        .bind(user_id.0 as i64)
        .bind(chat_id.0)
        .bind(flow.state_name())
        .bind(flow.country_code())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map(|_| ())
    }

    pub async fn get_session(&self, user_id: UserId) -> Result<Option<Session>, Error> {
        let row: Option<SessionRow> = query_as(
            "SELECT chat_id, state, country_code FROM sessions WHERE user_id = ?",
        )
        .bind(user_id.0 as i64)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        match Flow::from_row(&row.state, row.country_code) {
            Some(flow) => Ok(Some(Session {
                chat_id: ChatId(row.chat_id),
                flow,
            })),
            None => {
                log::warn!("Session of user {user_id} has unknown state {:?}", row.state);
                Ok(None)
            }
        }
    }

    pub async fn clear_session(&self, user_id: UserId) -> Result<(), Error> {
        query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id.0 as i64)
            .execute(&self.pool)
            .await
            .map(|_| ())
    }
}
