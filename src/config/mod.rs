//! Service configuration: `config/triage.toml` plus a few env overrides.
//!
//! Every section is optional. Out-of-range numbers fall back to their
//! defaults instead of failing startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::classify::ClassifierMode;

pub const DEFAULT_TRIAGE_CONFIG_PATH: &str = "config/triage.toml";
pub const ENV_TRIAGE_CONFIG_PATH: &str = "TRIAGE_CONFIG_PATH";

pub const ENV_CLASSIFIER_MODE: &str = "CLASSIFIER_MODE";
pub const ENV_CLASSIFIER_URL: &str = "CLASSIFIER_URL";
pub const ENV_REPORT_STORE_URL: &str = "REPORT_STORE_URL";
pub const ENV_REPORT_STORE_AUTH: &str = "REPORT_STORE_AUTH";
pub const ENV_TRIAGE_BIND: &str = "TRIAGE_BIND";

const DEFAULT_CLASSIFIER_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DEBOUNCE_MS: u64 = 1_500;
const DEFAULT_MIN_LIVE_CHARS: usize = 20;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 8_000;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;

fn default_mode() -> ClassifierMode {
    ClassifierMode::Demo
}
fn default_classifier_url() -> String {
    "http://127.0.0.1:8000".into()
}
fn default_classifier_timeout_ms() -> u64 {
    DEFAULT_CLASSIFIER_TIMEOUT_MS
}
fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}
fn default_min_live_chars() -> usize {
    DEFAULT_MIN_LIVE_CHARS
}
fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}
fn default_backlog_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_counter_path() -> PathBuf {
    PathBuf::from("data/report_counter.json")
}
fn default_probe_interval_secs() -> u64 {
    DEFAULT_PROBE_INTERVAL_SECS
}
fn default_bind() -> String {
    "127.0.0.1:8080".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierSettings {
    #[serde(default = "default_mode")]
    pub mode: ClassifierMode,
    /// Base URL; requests go to `{url}/analyze`.
    #[serde(default = "default_classifier_url")]
    pub url: String,
    #[serde(default = "default_classifier_timeout_ms")]
    pub timeout_ms: u64,
    /// Quiet period before a live classification fires.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Live analysis is skipped below this many characters.
    #[serde(default = "default_min_live_chars")]
    pub min_live_chars: usize,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            url: default_classifier_url(),
            timeout_ms: default_classifier_timeout_ms(),
            debounce_ms: default_debounce_ms(),
            min_live_chars: default_min_live_chars(),
        }
    }
}

impl ClassifierSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    /// REST JSON database at `base_url`; required unless `memory` is chosen.
    #[default]
    Http,
    /// Process memory only. Reports do not survive a restart.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub mode: StoreMode,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            mode: StoreMode::default(),
            base_url: None,
            timeout_ms: default_store_timeout_ms(),
            auth_token: None,
        }
    }
}

impl StoreSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BacklogSettings {
    #[serde(default = "default_backlog_dir")]
    pub path: PathBuf,
}

impl Default for BacklogSettings {
    fn default() -> Self {
        Self {
            path: default_backlog_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterSettings {
    #[serde(default = "default_counter_path")]
    pub path: PathBuf,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            path: default_counter_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchoolSettings {
    /// Location written on escalated staff reports.
    #[serde(default)]
    pub canonical_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivitySettings {
    #[serde(default)]
    pub probe_url: Option<String>,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            probe_url: None,
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl ConnectivitySettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriageConfig {
    #[serde(default)]
    pub classifier: ClassifierSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub backlog: BacklogSettings,
    #[serde(default)]
    pub counter: CounterSettings,
    #[serde(default)]
    pub school: SchoolSettings,
    #[serde(default)]
    pub connectivity: ConnectivitySettings,
    #[serde(default)]
    pub server: ServerSettings,
}

impl TriageConfig {
    /// Resolve `TRIAGE_CONFIG_PATH` (or the default path), parse, apply env, sanitize.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_TRIAGE_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TRIAGE_CONFIG_PATH));
        let mut cfg = Self::from_path(&path)?;
        cfg.apply_env();
        cfg.sanitize();
        Ok(cfg)
    }

    /// Missing file ⇒ defaults. Unreadable or malformed file is an error.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content).map_err(|e| {
                anyhow::anyhow!("Failed to parse triage config at {}: {}", path.display(), e)
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(target: "config", path = %path.display(), "config file missing; using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read triage config at {}: {}",
                path.display(),
                e
            )),
        }
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let mut cfg: TriageConfig = toml::from_str(s)?;
        cfg.sanitize();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Some(mode) = env_nonempty(ENV_CLASSIFIER_MODE) {
            match ClassifierMode::parse(&mode) {
                Some(m) => self.classifier.mode = m,
                None => warn!(target: "config", value = %mode, "unknown CLASSIFIER_MODE; keeping file value"),
            }
        }
        if let Some(url) = env_nonempty(ENV_CLASSIFIER_URL) {
            self.classifier.url = url;
        }
        if let Some(url) = env_nonempty(ENV_REPORT_STORE_URL) {
            self.store.base_url = Some(url);
        }
        if let Some(token) = env_nonempty(ENV_REPORT_STORE_AUTH) {
            self.store.auth_token = Some(token);
        }
        if let Some(bind) = env_nonempty(ENV_TRIAGE_BIND) {
            self.server.bind = bind;
        }
    }

    fn sanitize(&mut self) {
        let c = &mut self.classifier;
        if c.timeout_ms == 0 || c.timeout_ms > 60_000 {
            c.timeout_ms = DEFAULT_CLASSIFIER_TIMEOUT_MS;
        }
        if c.debounce_ms > 30_000 {
            c.debounce_ms = DEFAULT_DEBOUNCE_MS;
        }
        if c.min_live_chars == 0 {
            c.min_live_chars = DEFAULT_MIN_LIVE_CHARS;
        }
        c.url = c.url.trim().trim_end_matches('/').to_string();

        if self.store.timeout_ms == 0 {
            self.store.timeout_ms = DEFAULT_STORE_TIMEOUT_MS;
        }
        self.store.base_url = self
            .store
            .base_url
            .take()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        if self.connectivity.probe_interval_secs == 0 {
            self.connectivity.probe_interval_secs = DEFAULT_PROBE_INTERVAL_SECS;
        }
        self.school.canonical_name = self
            .school
            .canonical_name
            .take()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
