use std::env;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid ingest policy {0:?}, expected \"append\" or \"replace\"")]
    InvalidPolicy(String),
    #[error("invalid owner url {0:?}")]
    InvalidOwnerUrl(String),
}

/// What happens to a chat's existing list when new numbers arrive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IngestPolicy {
    /// Keep the list and add the numbers it doesn't contain yet.
    #[default]
    Append,
    /// Throw the old list away, including which numbers were used.
    Replace,
}

impl FromStr for IngestPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(IngestPolicy::Append),
            "replace" => Ok(IngestPolicy::Replace),
            _ => Err(Error::InvalidPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub database_url: String,
    pub database_name: Option<String>,
    pub ingest_policy: IngestPolicy,
    /// Link shown under the welcome message, with the label from `OWNER_NAME`.
    pub owner: Option<(String, Url)>,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let get = |key: &'static str| lookup(key).filter(|value| !value.trim().is_empty());

        let bot_token = get("BOT_TOKEN").ok_or(Error::Missing("BOT_TOKEN"))?;
        let database_url = get("DATABASE_URL").ok_or(Error::Missing("DATABASE_URL"))?;
        let database_name = get("DATABASE_NAME");
        let ingest_policy = match get("INGEST_POLICY") {
            Some(policy) => policy.parse()?,
            None => IngestPolicy::default(),
        };
        let owner = match get("OWNER_URL") {
            Some(url) => {
                let url = Url::parse(url.trim()).map_err(|_| Error::InvalidOwnerUrl(url))?;
                let name = get("OWNER_NAME").unwrap_or_else(|| "Owner".to_string());
                Some((name, url))
            }
            None => None,
        };

        Ok(Self {
            bot_token,
            database_url,
            database_name,
            ingest_policy,
            owner,
        })
    }
}
