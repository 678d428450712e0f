use crate::model::Browser;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Application configuration loaded from environment variables or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// DuckDB database file. In-memory when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Secret the daily fingerprint salt is derived from.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,
    #[serde(default = "default_session_max_entries")]
    pub session_max_entries: usize,
    /// Lowest accepted major version per browser name, e.g. `chrome = 84`.
    #[serde(default = "default_min_browser_versions")]
    pub min_browser_versions: BTreeMap<String, u32>,
    /// Whether to drop bot traffic (default: true).
    #[serde(default = "default_filter_bots")]
    pub filter_bots: bool,
    /// Path to a MaxMind GeoLite2 .mmdb file for country lookups.
    /// If not set or the file is missing, country codes stay empty.
    #[serde(default)]
    pub geoip_db_path: Option<PathBuf>,
    #[serde(default = "default_flush_count")]
    pub flush_hit_count: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Rows kept buffered while the store rejects writes. Oldest rows are dropped beyond it.
    #[serde(default = "default_max_buffered_rows")]
    pub max_buffered_rows: usize,
    /// `"json"` for JSON logs, anything else for the plain format.
    #[serde(default)]
    pub log_format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

const fn default_session_idle_timeout_secs() -> u64 {
    1800
}

const fn default_session_max_entries() -> usize {
    50_000
}

fn default_min_browser_versions() -> BTreeMap<String, u32> {
    BTreeMap::from([("chrome".to_string(), 84)])
}

const fn default_filter_bots() -> bool {
    true
}

const fn default_flush_count() -> usize {
    1000
}

const fn default_flush_interval_secs() -> u64 {
    60
}

const fn default_max_buffered_rows() -> usize {
    crate::ingest::buffer::DEFAULT_MAX_BUFFERED_ROWS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: None,
            secret: None,
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
            session_max_entries: default_session_max_entries(),
            min_browser_versions: default_min_browser_versions(),
            filter_bots: default_filter_bots(),
            geoip_db_path: None,
            flush_hit_count: default_flush_count(),
            flush_interval_secs: default_flush_interval_secs(),
            max_buffered_rows: default_max_buffered_rows(),
            log_format: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Environment variables override file values:
    /// - `QUIETSTATS_HOST` → host
    /// - `QUIETSTATS_PORT` → port
    /// - `QUIETSTATS_DATABASE` → database_path
    /// - `QUIETSTATS_SECRET` → secret
    /// - `QUIETSTATS_SESSION_IDLE_TIMEOUT` → session_idle_timeout_secs
    /// - `QUIETSTATS_SESSION_MAX_ENTRIES` → session_max_entries
    /// - `QUIETSTATS_FILTER_BOTS` → filter_bots
    /// - `QUIETSTATS_GEOIP_DB` → geoip_db_path
    /// - `QUIETSTATS_FLUSH_COUNT` → flush_hit_count
    /// - `QUIETSTATS_FLUSH_INTERVAL` → flush_interval_secs
    /// - `QUIETSTATS_MAX_BUFFERED_ROWS` → max_buffered_rows
    /// - `QUIETSTATS_LOG_FORMAT` → log_format
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config =
            config_path.map_or_else(Self::default, |path| match std::fs::read_to_string(path) {
                Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file: {e}, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config file: {e}, using defaults");
                    Self::default()
                }
            });

        // Environment variable overrides
        if let Ok(host) = std::env::var("QUIETSTATS_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("QUIETSTATS_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(path) = std::env::var("QUIETSTATS_DATABASE") {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Ok(secret) = std::env::var("QUIETSTATS_SECRET") {
            config.secret = Some(secret);
        }
        if let Ok(val) = std::env::var("QUIETSTATS_SESSION_IDLE_TIMEOUT") {
            if let Ok(t) = val.parse() {
                config.session_idle_timeout_secs = t;
            }
        }
        if let Ok(val) = std::env::var("QUIETSTATS_SESSION_MAX_ENTRIES") {
            if let Ok(n) = val.parse() {
                config.session_max_entries = n;
            }
        }
        if let Ok(val) = std::env::var("QUIETSTATS_FILTER_BOTS") {
            config.filter_bots = val != "0" && val.to_lowercase() != "false";
        }
        if let Ok(geoip) = std::env::var("QUIETSTATS_GEOIP_DB") {
            config.geoip_db_path = Some(PathBuf::from(geoip));
        }
        if let Ok(count) = std::env::var("QUIETSTATS_FLUSH_COUNT") {
            if let Ok(c) = count.parse() {
                config.flush_hit_count = c;
            }
        }
        if let Ok(interval) = std::env::var("QUIETSTATS_FLUSH_INTERVAL") {
            if let Ok(i) = interval.parse() {
                config.flush_interval_secs = i;
            }
        }
        if let Ok(val) = std::env::var("QUIETSTATS_MAX_BUFFERED_ROWS") {
            if let Ok(n) = val.parse() {
                config.max_buffered_rows = n;
            }
        }
        if let Ok(format) = std::env::var("QUIETSTATS_LOG_FORMAT") {
            config.log_format = format;
        }

        config
    }

    pub fn session_idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.session_idle_timeout_secs).unwrap_or(i64::MAX / 1000))
    }

    /// Minimum browser versions keyed by browser. Unknown browser names are skipped.
    pub fn min_versions(&self) -> HashMap<Browser, u32> {
        self.min_browser_versions
            .iter()
            .filter_map(|(name, version)| {
                let browser = Browser::from_name(name);
                if browser == Browser::Unknown {
                    tracing::warn!(browser = %name, "Unknown browser in min_browser_versions");
                    None
                } else {
                    Some((browser, *version))
                }
            })
            .collect()
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}
