use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::common::error::{GateError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatcherConfig {
    /// Maximum Euclidean distance still accepted as a match. Lower is stricter.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            dimensions: default_dimensions(),
        }
    }
}

fn default_threshold() -> f32 { 0.55 }
fn default_dimensions() -> usize { 128 }

/// What a Recognized event does while the gate is already open.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReentryPolicy {
    /// Push the release deadline out by a full dwell period.
    #[default]
    Extend,
    /// Keep the original deadline.
    Ignore,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GateConfig {
    #[serde(default = "default_dwell_secs")]
    pub dwell_secs: f64,
    #[serde(default = "default_pin")]
    pub pin: u32,
    #[serde(default = "default_true")]
    pub mock: bool,
    #[serde(default)]
    pub reentry: ReentryPolicy,
    #[serde(default = "default_release_retries")]
    pub release_retries: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            dwell_secs: default_dwell_secs(),
            pin: default_pin(),
            mock: default_true(),
            reentry: ReentryPolicy::default(),
            release_retries: default_release_retries(),
        }
    }
}

impl GateConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_secs_f64(self.dwell_secs)
    }
}

fn default_dwell_secs() -> f64 { 2.0 }
fn default_pin() -> u32 { 17 }
fn default_true() -> bool { true }
fn default_release_retries() -> u32 { 3 }

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ExtractorConfig {
    /// External program that turns an image on stdin into an embedding on stdout.
    #[serde(default)]
    pub command: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FallbackConfig {
    #[serde(default = "default_qr_secret")]
    pub qr_secret: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { qr_secret: default_qr_secret() }
    }
}

fn default_qr_secret() -> String { "devsecret".to_string() }

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: default_max_request_bytes(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

fn default_max_request_bytes() -> usize { 16 * 1024 * 1024 }
fn default_read_timeout() -> u64 { 10 }
fn default_write_timeout() -> u64 { 5 }

impl Config {
    /// Loads the config file for the given mode.
    pub fn load(dev_mode: bool) -> Result<Self> {
        Self::load_from_path(&crate::common::paths::Paths::for_mode(dev_mode).config_file)
    }

    /// Loads `path` if it exists (defaults otherwise), then applies environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            tracing::info!("Loading config from: {}", path.display());
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml(&contents)?
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| GateError::Config(format!("Config parse error: {}", e)))
    }

    /// Environment-style overrides. `lookup` is injected so tests need not touch the process env.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FACE_MATCH_THRESHOLD") {
            self.matcher.threshold = parse_env("FACE_MATCH_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("GATE_DWELL_SECS") {
            self.gate.dwell_secs = parse_env("GATE_DWELL_SECS", &v)?;
        }
        if let Some(v) = lookup("GATE_PIN") {
            self.gate.pin = parse_env("GATE_PIN", &v)?;
        }
        if let Some(v) = lookup("MOCK_GPIO") {
            self.gate.mock = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Some(v) = lookup("QR_JWT_SECRET") {
            self.fallback.qr_secret = v;
        }
        if let Some(v) = lookup("GATEKEEPER_EXTRACTOR") {
            self.extractor.command = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.matcher.threshold.is_finite() || self.matcher.threshold <= 0.0 {
            return Err(GateError::Config(format!(
                "Match threshold must be a positive number, got {}", self.matcher.threshold
            )));
        }
        if self.matcher.dimensions == 0 {
            return Err(GateError::Config("Embedding dimensions must be at least 1".into()));
        }
        if !(self.gate.dwell_secs > 0.0 && self.gate.dwell_secs <= 60.0) {
            return Err(GateError::Config(format!(
                "Dwell must be between 0 and 60 seconds, got {}", self.gate.dwell_secs
            )));
        }
        if self.fallback.qr_secret.is_empty() {
            return Err(GateError::Config("QR secret must not be empty".into()));
        }
        if self.service.max_request_bytes == 0 {
            return Err(GateError::Config("max_request_bytes must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| GateError::Config(format!("{}={:?}: {}", key, value, e)))
}
