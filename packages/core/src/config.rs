use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::broadcast::DEFAULT_SUBSCRIBER_QUEUE;
use crate::cli::Cli;
use crate::extractor::{
    ExtractionProfile, DEFAULT_MAX_LEN, DEFAULT_MIN_LEN, DEFAULT_SNIPPET_CONTEXT,
};
use crate::logging::LogFormat;
use crate::repository::CandidateQuery;
use crate::scheduler::{state, BackoffPolicy, SchedulerConfig};
use crate::snapshot::{DEFAULT_SNAPSHOT_LIMIT, DEFAULT_WINDOW_HOURS};
use crate::sources::{AdapterRegistry, SourceSettings};

pub const SOURCES_FILE: &str = "sources.json";
pub const DENYLIST_FILE: &str = "denylist.json";
pub const DEFAULT_USER_AGENT: &str = "invite-hunter/0.1";

/// Upper bound for every scheduling duration (one week).
pub const MAX_SCHEDULE_SECONDS: u64 = 7 * 24 * 60 * 60;
/// Upper bound for the trailing window (ten years).
pub const MAX_WINDOW_HOURS: i64 = 10 * 365 * 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub store: StoreKind,
    pub sqlite_path: PathBuf,
    pub config_dir: PathBuf,
    /// Explicit adapter selection; `None` means every built-in adapter.
    pub adapters: Option<Vec<String>>,
    pub disabled_sources: Vec<String>,
    pub polling_enabled: bool,
    pub poll_interval_seconds: u64,
    pub max_backoff_seconds: u64,
    pub backoff_floor_seconds: u64,
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
    pub parse_failure_threshold: u32,
    pub min_len: usize,
    pub max_len: usize,
    pub snippet_context: usize,
    pub confidence_scoring: bool,
    pub topic_keywords: Vec<String>,
    pub user_agent: String,
    pub request_timeout_seconds: u64,
    pub discord_webhook_url: Option<String>,
    pub snapshot_limit: usize,
    pub subscriber_queue: usize,
    pub window_hours: i64,
    pub window_include_hidden: bool,
    pub window_include_tried: bool,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unset and blank values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let store = match get("STORE").map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("memory") => StoreKind::Memory,
            Some("sqlite") => StoreKind::Sqlite,
            Some(other) => return Err(format!("Invalid STORE: {}", other)),
        };

        let log_format = match get("LOG_FORMAT").map(|s| s.to_ascii_lowercase()).as_deref() {
            None | Some("compact") => LogFormat::Compact,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(format!("Invalid LOG_FORMAT: {}", other)),
        };

        let config = Self {
            bind: get("BIND").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get("PORT"), "PORT", 3000)?,
            store,
            sqlite_path: PathBuf::from(
                get("SQLITE_PATH").unwrap_or_else(|| "data/codes.db".to_string()),
            ),
            config_dir: PathBuf::from(get("CONFIG_DIR").unwrap_or_else(|| "config".to_string())),
            adapters: get("ADAPTERS").map(|raw| split_list(&raw)),
            disabled_sources: get("DISABLE_SOURCES")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            polling_enabled: get("DISABLE_POLLING").as_deref() != Some("1"),
            poll_interval_seconds: parse_or(
                get("POLL_INTERVAL_SECONDS"),
                "POLL_INTERVAL_SECONDS",
                state::DEFAULT_POLL_INTERVAL.as_secs(),
            )?,
            max_backoff_seconds: parse_or(
                get("MAX_BACKOFF_SECONDS"),
                "MAX_BACKOFF_SECONDS",
                state::DEFAULT_BACKOFF_CEILING.as_secs(),
            )?,
            backoff_floor_seconds: parse_or(
                get("BACKOFF_FLOOR_SECONDS"),
                "BACKOFF_FLOOR_SECONDS",
                state::DEFAULT_BACKOFF_FLOOR.as_secs(),
            )?,
            failure_threshold: parse_or(
                get("FAILURE_THRESHOLD"),
                "FAILURE_THRESHOLD",
                state::DEFAULT_FAILURE_THRESHOLD,
            )?,
            cooldown_seconds: parse_or(
                get("COOLDOWN_SECONDS"),
                "COOLDOWN_SECONDS",
                state::DEFAULT_COOLDOWN.as_secs(),
            )?,
            parse_failure_threshold: parse_or(
                get("PARSE_FAILURE_THRESHOLD"),
                "PARSE_FAILURE_THRESHOLD",
                state::DEFAULT_PARSE_FAILURE_THRESHOLD,
            )?,
            min_len: parse_or(get("MIN_LEN"), "MIN_LEN", DEFAULT_MIN_LEN)?,
            max_len: parse_or(get("MAX_LEN"), "MAX_LEN", DEFAULT_MAX_LEN)?,
            snippet_context: parse_or(
                get("SNIPPET_CONTEXT"),
                "SNIPPET_CONTEXT",
                DEFAULT_SNIPPET_CONTEXT,
            )?,
            confidence_scoring: parse_flag(
                get("CONFIDENCE_SCORING"),
                "CONFIDENCE_SCORING",
                true,
            )?,
            topic_keywords: get("TOPIC_KEYWORDS")
                .map(|raw| split_list(&raw))
                .unwrap_or_else(|| vec!["sora".to_string()]),
            user_agent: get("USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            request_timeout_seconds: parse_or(
                get("REQUEST_TIMEOUT_SECONDS"),
                "REQUEST_TIMEOUT_SECONDS",
                15,
            )?,
            discord_webhook_url: get("DISCORD_WEBHOOK_URL"),
            snapshot_limit: parse_or(
                get("SNAPSHOT_LIMIT"),
                "SNAPSHOT_LIMIT",
                DEFAULT_SNAPSHOT_LIMIT,
            )?,
            subscriber_queue: parse_or(
                get("SUBSCRIBER_QUEUE"),
                "SUBSCRIBER_QUEUE",
                DEFAULT_SUBSCRIBER_QUEUE,
            )?,
            window_hours: parse_or(
                get("TRAILING_WINDOW_HOURS"),
                "TRAILING_WINDOW_HOURS",
                DEFAULT_WINDOW_HOURS,
            )?,
            window_include_hidden: parse_flag(
                get("WINDOW_INCLUDE_HIDDEN"),
                "WINDOW_INCLUDE_HIDDEN",
                false,
            )?,
            window_include_tried: parse_flag(
                get("WINDOW_INCLUDE_TRIED"),
                "WINDOW_INCLUDE_TRIED",
                true,
            )?,
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the environment.
    pub fn with_cli(mut self, cli: &Cli) -> Result<Self, String> {
        if let Some(bind) = &cli.bind {
            self.bind = bind.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(store) = &cli.store {
            self.store = match store.to_ascii_lowercase().as_str() {
                "memory" => StoreKind::Memory,
                "sqlite" => StoreKind::Sqlite,
                other => return Err(format!("Invalid --store: {}", other)),
            };
        }
        if let Some(path) = &cli.sqlite_path {
            self.sqlite_path = path.clone();
        }
        if let Some(dir) = &cli.config_dir {
            self.config_dir = dir.clone();
        }
        if let Some(seconds) = cli.poll_interval {
            self.poll_interval_seconds = seconds;
        }
        if cli.no_poll {
            self.polling_enabled = false;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), String> {
        if self.poll_interval_seconds == 0 {
            return Err("POLL_INTERVAL_SECONDS must be greater than zero".to_string());
        }
        for (key, value) in [
            ("POLL_INTERVAL_SECONDS", self.poll_interval_seconds),
            ("MAX_BACKOFF_SECONDS", self.max_backoff_seconds),
            ("BACKOFF_FLOOR_SECONDS", self.backoff_floor_seconds),
            ("COOLDOWN_SECONDS", self.cooldown_seconds),
            ("REQUEST_TIMEOUT_SECONDS", self.request_timeout_seconds),
        ] {
            if value > MAX_SCHEDULE_SECONDS {
                return Err(format!(
                    "{} ({}) must not exceed {}",
                    key, value, MAX_SCHEDULE_SECONDS
                ));
            }
        }
        if self.backoff_floor_seconds > self.max_backoff_seconds {
            return Err(format!(
                "BACKOFF_FLOOR_SECONDS ({}) must not exceed MAX_BACKOFF_SECONDS ({})",
                self.backoff_floor_seconds, self.max_backoff_seconds
            ));
        }
        if self.failure_threshold == 0 {
            return Err("FAILURE_THRESHOLD must be at least 1".to_string());
        }
        if self.window_hours <= 0 || self.window_hours > MAX_WINDOW_HOURS {
            return Err(format!(
                "TRAILING_WINDOW_HOURS must be between 1 and {}",
                MAX_WINDOW_HOURS
            ));
        }
        if self.min_len == 0 || self.min_len > self.max_len {
            return Err(format!(
                "MIN_LEN ({}) must be between 1 and MAX_LEN ({})",
                self.min_len, self.max_len
            ));
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            policy: BackoffPolicy {
                floor: Duration::from_secs(self.backoff_floor_seconds),
                ceiling: Duration::from_secs(self.max_backoff_seconds),
                failure_threshold: self.failure_threshold,
                cooldown: Duration::from_secs(self.cooldown_seconds),
                parse_failure_threshold: self.parse_failure_threshold.max(1),
            },
            ..SchedulerConfig::default()
        }
    }

    pub fn extraction_profile(&self, denylist: Vec<String>) -> ExtractionProfile {
        ExtractionProfile {
            min_len: self.min_len,
            max_len: self.max_len,
            denylist,
            snippet_context: self.snippet_context,
            scoring: self.confidence_scoring,
            topic_keywords: self.topic_keywords.clone(),
        }
    }

    /// Filter applied to the snapshot's trailing-window count.
    pub fn window_query(&self) -> CandidateQuery {
        CandidateQuery {
            include_hidden: self.window_include_hidden,
            include_tried: self.window_include_tried,
            ..CandidateQuery::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Adapter names to instantiate, in order.
    pub fn adapter_names(&self, registry: &AdapterRegistry) -> Vec<String> {
        match &self.adapters {
            Some(names) => names.clone(),
            None => registry.names(),
        }
    }

    /// Per-adapter settings from `sources.json`. A missing file yields no
    /// settings, so every adapter runs on its defaults.
    pub fn load_sources(&self) -> Result<HashMap<String, SourceSettings>, String> {
        let path = self.config_dir.join(SOURCES_FILE);
        let Some(value) = read_json(&path)? else {
            tracing::warn!(
                path = %path.display(),
                "sources file not found, using adapter defaults"
            );
            return Ok(HashMap::new());
        };

        let Value::Object(map) = value else {
            return Err(format!("{} must contain an object", path.display()));
        };

        Ok(map
            .iter()
            .map(|(name, settings)| (name.clone(), SourceSettings::from_value(settings)))
            .collect())
    }

    /// Denylist tokens, uppercased. Accepts a bare array or
    /// `{"denylist": [...]}`.
    pub fn load_denylist(&self) -> Result<Vec<String>, String> {
        let path = self.config_dir.join(DENYLIST_FILE);
        let Some(value) = read_json(&path)? else {
            return Ok(Vec::new());
        };

        let list = match &value {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("denylist") {
                Some(Value::Array(items)) => items,
                _ => return Err(format!("{} must contain a \"denylist\" array", path.display())),
            },
            _ => return Err(format!("{} must contain a list of strings", path.display())),
        };

        Ok(list
            .iter()
            .filter_map(Value::as_str)
            .map(|token| token.trim().to_ascii_uppercase())
            .filter(|token| !token.is_empty())
            .collect())
    }
}

fn read_json(path: &Path) -> Result<Option<Value>, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("Failed to read {}: {}", path.display(), err)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| format!("Invalid JSON in {}: {}", path.display(), err))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &str,
    default: T,
) -> Result<T, String> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid number", key)),
    }
}

fn parse_flag(value: Option<String>, key: &str, default: bool) -> Result<bool, String> {
    match value.map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(format!("{} must be a boolean, got {}", key, other)),
    }
}
