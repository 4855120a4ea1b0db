use anyhow::{Context, Result};

use crate::db::models::AccountId;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Accounts whose rules this instance evaluates.
    /// Format: comma-separated integers, e.g. `"1,2,5"`.
    pub account_ids: Vec<AccountId>,
    /// Alarm evaluation cadence in seconds.
    pub eval_interval_secs: u64,
    /// Sensor reporting period in seconds. Only sizes the overlap of the
    /// incremental measurement fetch window; never changes evaluator
    /// semantics.
    pub measurement_period_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            account_ids: parse_account_ids(&optional("ACCOUNT_IDS", ""))?,
            eval_interval_secs: optional("EVAL_INTERVAL_SECS", "60")
                .parse()
                .context("EVAL_INTERVAL_SECS must be a positive integer")?,
            measurement_period_secs: optional("MEASUREMENT_PERIOD_SECS", "300")
                .parse()
                .context("MEASUREMENT_PERIOD_SECS must be a positive integer")?,
        })
    }
}

/// Parse `"1,2,5"` into account ids, rejecting any malformed entry.
fn parse_account_ids(raw: &str) -> Result<Vec<AccountId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<AccountId>()
                .with_context(|| format!("ACCOUNT_IDS entry must be an integer, got: {s:?}"))
        })
        .collect()
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
