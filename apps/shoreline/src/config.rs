use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Where the backend runs relative to the front end. Decides the default
/// type-ahead window: a remote link needs a window longer than one round trip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deployment {
    #[default]
    Local,
    Remote,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeAheadConfig {
    pub enabled: bool,
    pub deployment: Deployment,
    pub local_debounce_ms: u64,
    pub remote_debounce_ms: u64,
    /// Predictions with no backend echo at all are withdrawn after this long.
    pub stale_after_ms: u64,
}

impl Default for TypeAheadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deployment: Deployment::Local,
            local_debounce_ms: 50,
            remote_debounce_ms: 250,
            stale_after_ms: 1_000,
        }
    }
}

impl TypeAheadConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(match self.deployment {
            Deployment::Local => self.local_debounce_ms,
            Deployment::Remote => self.remote_debounce_ms,
        })
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms).max(self.debounce())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub buffer_capacity: usize,
    pub latency_batch_size: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            latency_batch_size: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub max_line_length: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 100,
            max_line_length: 1_000,
        }
    }
}

impl TrackerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub max_lines: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { max_lines: 5_000 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bell_enabled: bool,
    pub type_ahead: TypeAheadConfig,
    pub input: InputConfig,
    pub tracker: TrackerConfig,
    pub model: ModelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bell_enabled: true,
            type_ahead: TypeAheadConfig::default(),
            input: InputConfig::default(),
            tracker: TrackerConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Config {
    /// `~/.shoreline/config.toml`
    pub fn path() -> Result<PathBuf, ConfigError> {
        let base = BaseDirs::new().ok_or(ConfigError::NoHome)?;
        Ok(base.home_dir().join(".shoreline").join("config.toml"))
    }

    /// Reads the config file when present, then applies `SHORELINE_*`
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            Self::from_toml_str(&raw)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        Ok(config.sanitized())
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(enabled) = env_bool("SHORELINE_TYPE_AHEAD")? {
            self.type_ahead.enabled = enabled;
        }
        if let Ok(value) = env::var("SHORELINE_DEPLOYMENT") {
            self.type_ahead.deployment = match value.to_ascii_lowercase().as_str() {
                "local" => Deployment::Local,
                "remote" => Deployment::Remote,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: "SHORELINE_DEPLOYMENT",
                        value,
                    });
                }
            };
        }
        if let Some(ms) = env_number::<u64>("SHORELINE_TYPE_AHEAD_DEBOUNCE_MS")? {
            match self.type_ahead.deployment {
                Deployment::Local => self.type_ahead.local_debounce_ms = ms,
                Deployment::Remote => self.type_ahead.remote_debounce_ms = ms,
            }
        }
        if let Some(capacity) = env_number::<usize>("SHORELINE_INPUT_CAPACITY")? {
            self.input.buffer_capacity = capacity;
        }
        if let Some(enabled) = env_bool("SHORELINE_TRACKER")? {
            self.tracker.enabled = enabled;
        }
        *self = self.clone().sanitized();
        Ok(())
    }

    fn sanitized(mut self) -> Self {
        self.input.buffer_capacity = self.input.buffer_capacity.max(1);
        self.input.latency_batch_size = self.input.latency_batch_size.max(1);
        self.model.max_lines = self.model.max_lines.max(1);
        self
    }
}

fn env_bool(var: &'static str) -> Result<Option<bool>, ConfigError> {
    let Ok(value) = env::var(var) else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(Some(true)),
        "0" | "false" | "off" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidEnv { var, value }),
    }
}

fn env_number<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    let Ok(value) = env::var(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Environment variables are process-global.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "SHORELINE_TYPE_AHEAD",
        "SHORELINE_DEPLOYMENT",
        "SHORELINE_TYPE_AHEAD_DEBOUNCE_MS",
        "SHORELINE_INPUT_CAPACITY",
        "SHORELINE_TRACKER",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn defaults_pick_the_local_window() {
        let config = Config::default();
        assert!(config.type_ahead.enabled);
        assert_eq!(config.type_ahead.debounce(), Duration::from_millis(50));
        assert_eq!(config.input.buffer_capacity, 1024);
        assert_eq!(config.model.max_lines, 5_000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            bell_enabled = false

            [type_ahead]
            deployment = "remote"
            remote_debounce_ms = 400

            [input]
            buffer_capacity = 0
            "#,
        )
        .expect("parse");
        assert!(!config.bell_enabled);
        assert_eq!(config.type_ahead.debounce(), Duration::from_millis(400));
        assert_eq!(config.type_ahead.local_debounce_ms, 50);
        assert_eq!(config.input.buffer_capacity, 1);
        assert_eq!(config.tracker, TrackerConfig::default());
    }

    #[test]
    fn stale_timeout_never_undercuts_the_window() {
        let mut config = TypeAheadConfig {
            stale_after_ms: 10,
            ..TypeAheadConfig::default()
        };
        assert_eq!(config.stale_after(), Duration::from_millis(50));
        config.stale_after_ms = 900;
        assert_eq!(config.stale_after(), Duration::from_millis(900));
    }

    #[test]
    fn env_overrides_apply_to_selected_deployment() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("SHORELINE_DEPLOYMENT", "Remote");
            env::set_var("SHORELINE_TYPE_AHEAD_DEBOUNCE_MS", "300");
            env::set_var("SHORELINE_TYPE_AHEAD", "off");
            env::set_var("SHORELINE_INPUT_CAPACITY", "3");
        }
        let mut config = Config::default();
        let result = config.apply_env();
        clear_env();

        result.expect("valid overrides");
        assert_eq!(config.type_ahead.deployment, Deployment::Remote);
        assert_eq!(config.type_ahead.remote_debounce_ms, 300);
        assert_eq!(config.type_ahead.local_debounce_ms, 50);
        assert!(!config.type_ahead.enabled);
        assert_eq!(config.input.buffer_capacity, 3);
    }

    #[test]
    fn invalid_env_value_is_reported() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("SHORELINE_TRACKER", "sometimes");
        }
        let err = Config::default().apply_env().expect_err("invalid");
        clear_env();

        assert!(matches!(
            err,
            ConfigError::InvalidEnv { var: "SHORELINE_TRACKER", .. }
        ));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let rendered = config.to_toml_string().expect("render");
        assert!(rendered.contains("[type_ahead]"));
        assert_eq!(Config::from_toml_str(&rendered).expect("parse"), config);
    }
}
