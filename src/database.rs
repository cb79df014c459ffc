mod lists;
mod sessions;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
pub use sqlx::Error;

pub use lists::{ListStats, NumberEntry};
pub use sessions::{Flow, Session};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connects to the SQLite database at `database_url` and applies pending
    /// migrations. `database_name`, if set, replaces the file name of the url.
    pub async fn new(database_url: &str, database_name: Option<&str>) -> Result<Self, Error> {
        let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if let Some(name) = database_name {
            options = options.filename(name);
        }

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::migrate(pool).await
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, Error> {
        // every connection to :memory: is its own database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, Error> {
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }
}
