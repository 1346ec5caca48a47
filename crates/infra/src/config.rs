//! Runtime configuration, read from environment variables.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use ledgerbank_accounts::FeePolicy;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DB_MAX_CONNECTIONS: &str = "LEDGER_DB_MAX_CONNECTIONS";
pub const TRANSFER_FEE_RATE: &str = "LEDGER_TRANSFER_FEE_RATE";
pub const OUTBOX_BATCH_SIZE: &str = "LEDGER_OUTBOX_BATCH_SIZE";
pub const OUTBOX_POLL_INTERVAL_MS: &str = "LEDGER_OUTBOX_POLL_INTERVAL_MS";

const MAX_OUTBOX_BATCH: usize = 10_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Settings shared by the handlers and the outbox relay.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub fee_policy: FeePolicy,
    pub outbox_batch_size: usize,
    pub outbox_poll_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            fee_policy: FeePolicy::standard(),
            outbox_batch_size: 100,
            outbox_poll_interval: Duration::from_millis(1000),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_max_connections = match read(DB_MAX_CONNECTIONS) {
            Some(raw) => parse::<u32>(DB_MAX_CONNECTIONS, &raw)?,
            None => defaults.db_max_connections,
        };
        if db_max_connections == 0 {
            return Err(invalid(DB_MAX_CONNECTIONS, "must be at least 1"));
        }

        let fee_policy = match read(TRANSFER_FEE_RATE) {
            Some(raw) => {
                let rate = parse::<Decimal>(TRANSFER_FEE_RATE, &raw)?;
                FeePolicy::new(rate).map_err(|e| invalid(TRANSFER_FEE_RATE, e.message()))?
            }
            None => defaults.fee_policy,
        };

        let outbox_batch_size = match read(OUTBOX_BATCH_SIZE) {
            Some(raw) => parse::<usize>(OUTBOX_BATCH_SIZE, &raw)?,
            None => defaults.outbox_batch_size,
        };
        if !(1..=MAX_OUTBOX_BATCH).contains(&outbox_batch_size) {
            return Err(invalid(
                OUTBOX_BATCH_SIZE,
                format!("must be between 1 and {MAX_OUTBOX_BATCH}"),
            ));
        }

        let outbox_poll_interval = match read(OUTBOX_POLL_INTERVAL_MS) {
            Some(raw) => Duration::from_millis(parse::<u64>(OUTBOX_POLL_INTERVAL_MS, &raw)?),
            None => defaults.outbox_poll_interval,
        };
        if outbox_poll_interval.is_zero() {
            return Err(invalid(OUTBOX_POLL_INTERVAL_MS, "must be greater than zero"));
        }

        Ok(Self {
            database_url: read(DATABASE_URL),
            db_max_connections,
            fee_policy,
            outbox_batch_size,
            outbox_poll_interval,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing(DATABASE_URL))
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| invalid(key, format!("'{raw}': {e}")))
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}
