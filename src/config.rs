use std::cell::RefCell;
use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use ::config::{Config, Environment};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "SEOKIT";

/// Option keys that map onto `Settings` fields.
pub const SETTING_KEYS: &[&str] = &[
    "api_key",
    "api_base",
    "model",
    "max_tokens",
    "temperature",
    "timeout",
    "site_url",
    "cache_ttl",
    "batch_time_limit",
    "store_raw_response",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// HTTP timeout, seconds.
    pub timeout: u64,
    pub site_url: String,
    /// Lifetime of cached analysis lookups, seconds.
    pub cache_ttl: u64,
    /// Wall-clock ceiling for one batch run, seconds.
    pub batch_time_limit: u64,
    pub store_raw_response: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api_key: String::new(),
            api_base: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            max_tokens: 4000,
            temperature: 0.3,
            timeout: 30,
            site_url: String::new(),
            cache_ttl: 3600,
            batch_time_limit: 50,
            store_raw_response: false,
        }
    }
}

impl Settings {
    /// Default value of one option key, rendered as the string it is stored as.
    pub fn default_value(key: &str) -> Option<String> {
        let d = Settings::default();
        let v = match key {
            "api_key" => d.api_key,
            "api_base" => d.api_base,
            "model" => d.model,
            "max_tokens" => d.max_tokens.to_string(),
            "temperature" => d.temperature.to_string(),
            "timeout" => d.timeout.to_string(),
            "site_url" => d.site_url,
            "cache_ttl" => d.cache_ttl.to_string(),
            "batch_time_limit" => d.batch_time_limit.to_string(),
            "store_raw_response" => d.store_raw_response.to_string(),
            _ => return None,
        };
        Some(v)
    }

    /// Layers: built-in defaults, then stored options, then `SEOKIT_*` env vars.
    pub fn load(store: &dyn OptionStore) -> Result<Settings> {
        let mut builder = Config::builder();
        for key in SETTING_KEYS {
            let fallback = Settings::default_value(key).unwrap_or_default();
            let value = store.get(key, &fallback)?;
            builder = builder.set_default(*key, value)?;
        }
        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to build settings")?
            .try_deserialize::<Settings>()
            .context("Invalid settings")?;
        Ok(settings)
    }

    /// Copy safe for printing: only the last four key characters survive.
    pub fn redacted(&self) -> Settings {
        let mut copy = self.clone();
        if !copy.api_key.is_empty() {
            let tail: String = copy
                .api_key
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            copy.api_key = format!("****{}", tail);
        }
        copy
    }
}

/// Key/value option storage injected into components instead of globals.
pub trait OptionStore {
    fn get(&self, key: &str, default: &str) -> Result<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn all(&self) -> Result<Vec<(String, String)>>;
}

/// Rejects unknown keys and values the typed settings could not parse.
pub fn validate_option(key: &str, value: &str) -> Result<()> {
    let ok = match key {
        "max_tokens" => value.parse::<u32>().is_ok_and(|v| v > 0),
        "timeout" | "cache_ttl" | "batch_time_limit" => value.parse::<u64>().is_ok(),
        "temperature" => value.parse::<f64>().is_ok_and(|v| (0.0..=2.0).contains(&v)),
        "store_raw_response" => matches!(value, "true" | "false"),
        k if SETTING_KEYS.contains(&k) => true,
        _ => bail!("unknown setting '{}'", key),
    };
    if !ok {
        bail!("invalid value for '{}': {}", key, value);
    }
    Ok(())
}

pub struct SqliteOptions<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteOptions<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteOptions { conn }
    }
}

impl OptionStore for SqliteOptions<'_> {
    fn get(&self, key: &str, default: &str) -> Result<String> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM options WHERE name = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO options (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn all(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, value FROM options ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[derive(Default)]
pub struct MemoryOptions {
    values: RefCell<BTreeMap<String, String>>,
}

impl MemoryOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptionStore for MemoryOptions {
    fn get(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .values
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn all(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .values
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn defaults_when_nothing_is_stored() {
        let store = MemoryOptions::new();
        let settings = Settings::load(&store).unwrap();
        assert_eq!(settings.max_tokens, 4000);
        assert_eq!(settings.timeout, 30);
        assert!((settings.temperature - 0.3).abs() < f64::EPSILON);
        assert_eq!(settings.model, "deepseek-chat");
    }

    #[test]
    fn stored_options_override_defaults() {
        let store = MemoryOptions::new();
        store.set("model", "deepseek-reasoner").unwrap();
        store.set("timeout", "90").unwrap();
        store.set("store_raw_response", "true").unwrap();
        let settings = Settings::load(&store).unwrap();
        assert_eq!(settings.model, "deepseek-reasoner");
        assert_eq!(settings.timeout, 90);
        assert!(settings.store_raw_response);
    }

    #[test]
    fn sqlite_options_upsert() {
        let conn = db::open_in_memory().unwrap();
        let store = SqliteOptions::new(&conn);
        assert_eq!(store.get("site_url", "none").unwrap(), "none");
        store.set("site_url", "https://a.example").unwrap();
        store.set("site_url", "https://b.example").unwrap();
        assert_eq!(store.get("site_url", "none").unwrap(), "https://b.example");
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn validates_option_values() {
        assert!(validate_option("timeout", "45").is_ok());
        assert!(validate_option("timeout", "soon").is_err());
        assert!(validate_option("temperature", "3.5").is_err());
        assert!(validate_option("nope", "1").is_err());
        assert!(validate_option("api_base", "http://localhost:8080").is_ok());
    }

    #[test]
    fn redacts_api_key() {
        let settings = Settings {
            api_key: "sk-1234567890abcd".into(),
            ..Settings::default()
        };
        assert_eq!(settings.redacted().api_key, "****abcd");
    }
}
