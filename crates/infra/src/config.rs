//! Runtime configuration.
//!
//! Loaded once at startup from environment variables, with an optional `.env`
//! file. Missing or malformed values produce a [`ConfigError`] naming the
//! variable.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `DATABASE_URL` | unset (required by the Postgres store only) |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `IDEMPOTENCY_TTL_SECS` | `600` |
//! | `TRANSFER_MAX_RETRIES` | `3` |
//! | `SYSTEM_ACCOUNTS` | `[]` |

use std::collections::HashMap;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wallet_core::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Platform-owned account roles used by deposits and withdrawals.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPurpose {
    /// Funds deposits.
    Reserve,
    /// Receives withdrawals.
    FeeIncome,
}

impl SystemPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemPurpose::Reserve => "reserve",
            SystemPurpose::FeeIncome => "fee_income",
        }
    }
}

#[derive(Debug, Deserialize)]
struct SystemAccountEntry {
    currency: String,
    purpose: SystemPurpose,
    account_id: AccountId,
}

/// `(currency code, purpose) -> account` mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemAccounts {
    accounts: HashMap<(String, SystemPurpose), AccountId>,
}

impl SystemAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `[{"currency": "USD", "purpose": "reserve", "account_id": "..."}]`.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<SystemAccountEntry> = serde_json::from_str(raw)?;
        let mut out = Self::new();
        for e in entries {
            out.insert(&e.currency, e.purpose, e.account_id);
        }
        Ok(out)
    }

    pub fn insert(&mut self, currency: &str, purpose: SystemPurpose, account_id: AccountId) {
        self.accounts
            .insert((currency.to_string(), purpose), account_id);
    }

    pub fn with(mut self, currency: &str, purpose: SystemPurpose, account_id: AccountId) -> Self {
        self.insert(currency, purpose, account_id);
        self
    }

    pub fn resolve(&self, currency: &str, purpose: SystemPurpose) -> Option<AccountId> {
        self.accounts
            .get(&(currency.to_string(), purpose))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub idempotency_ttl: Duration,
    pub transfer_max_retries: u32,
    pub system_accounts: SystemAccounts,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            idempotency_ttl: Duration::seconds(600),
            transfer_max_retries: 3,
            system_accounts: SystemAccounts::new(),
        }
    }
}

impl Settings {
    /// Load from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        let database_max_connections = get_optional_parsed(
            &lookup,
            "DATABASE_MAX_CONNECTIONS",
            defaults.database_max_connections,
        )?;
        if database_max_connections == 0 {
            return Err(invalid("DATABASE_MAX_CONNECTIONS", "must be at least 1"));
        }

        let ttl_secs: i64 = get_optional_parsed(
            &lookup,
            "IDEMPOTENCY_TTL_SECS",
            defaults.idempotency_ttl.num_seconds(),
        )?;
        if ttl_secs <= 0 {
            return Err(invalid("IDEMPOTENCY_TTL_SECS", "must be positive"));
        }

        let transfer_max_retries =
            get_optional_parsed(&lookup, "TRANSFER_MAX_RETRIES", defaults.transfer_max_retries)?;

        let system_accounts = match lookup("SYSTEM_ACCOUNTS") {
            Some(raw) if !raw.trim().is_empty() => SystemAccounts::from_json(&raw)
                .map_err(|e| invalid("SYSTEM_ACCOUNTS", &e.to_string()))?,
            _ => SystemAccounts::new(),
        };

        Ok(Self {
            database_url,
            database_max_connections,
            idempotency_ttl: Duration::seconds(ttl_secs),
            transfer_max_retries,
            system_accounts,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn get_optional_parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| invalid(key, &e.to_string())),
        None => Ok(default),
    }
}
