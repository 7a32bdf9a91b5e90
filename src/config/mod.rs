//! Configuration management for siteward
//!
//! Configuration is resolved once at startup into an immutable [`Config`]
//! that is passed explicitly to every component. Layering, in order of
//! precedence:
//!
//! 1. Built-in defaults
//! 2. Environment variables (`SITEWARD_*`), or a TOML config file when
//!    one is passed explicitly
//! 3. `overrides.json` — a persisted runtime layer restricted to the
//!    [`MODIFIABLE_KEYS`] allow-list

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::ServiceDef;

/// Settings that may be changed at runtime through the overrides file.
/// Everything else requires editing the config file and a restart.
pub const MODIFIABLE_KEYS: &[&str] = &[
    "debounce_secs",
    "scan_interval_secs",
    "log_max_size_mb",
    "log_history_count",
];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem layout
    pub paths: PathsConfig,

    /// Supervisor loop and restart policy tuning
    pub supervisor: SupervisorConfig,

    /// Conversion pipeline tuning
    pub converter: ConverterConfig,

    /// Web server probe settings
    pub web: WebConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Managed service definitions; entries here override the built-in
    /// defaults by name.
    #[serde(default)]
    pub services: Vec<ServiceDef>,
}

/// Filesystem layout for all persisted state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the watched content tree
    pub content_root: PathBuf,

    /// Output root for databases, derived assets, and runtime files
    pub output_dir: PathBuf,

    /// Directory of additional Handlebars templates, registered by
    /// file stem next to the built-in default
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

impl PathsConfig {
    pub fn content_db(&self) -> PathBuf {
        self.output_dir.join("content.db")
    }

    pub fn log_db(&self) -> PathBuf {
        self.output_dir.join("events.db")
    }

    pub fn assets_output(&self) -> PathBuf {
        self.output_dir.join("assets")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.output_dir.join("siteward.pid")
    }

    pub fn overrides_file(&self) -> PathBuf {
        self.output_dir.join("overrides.json")
    }

    pub fn shutdown_signal(&self) -> PathBuf {
        self.output_dir.join("shutdown.signal")
    }

    /// The dot-directory under the content root holding media sources.
    pub fn assets_source(&self) -> PathBuf {
        self.content_root.join(".assets")
    }
}

/// Supervisor loop and restart policy tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Health-check tick interval in seconds
    pub tick_secs: u64,

    /// Cooldown before a restart attempt, in seconds
    pub restart_cooldown_secs: u64,

    /// Sliding window over which restart attempts are counted, in seconds
    pub restart_window_secs: u64,

    /// Maximum restarts within the window before the process is marked crashed
    pub max_restart_attempts: u32,

    /// Bound on waiting for polite termination before force-killing, in seconds
    pub graceful_timeout_secs: u64,
}

/// Conversion pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Event coalescing window in seconds
    pub debounce_secs: u64,

    /// Worker pool size; 0 means one per CPU
    pub workers: usize,

    /// Periodic full-rescan interval in seconds
    pub scan_interval_secs: u64,

    /// Bound on draining in-flight tasks at shutdown, in seconds
    pub drain_timeout_secs: u64,

    /// External media converter binary
    pub ffmpeg_path: PathBuf,
}

/// Web server probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,

    /// Bound on waiting for the web process to answer its health probe
    pub probe_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Size cap for the persisted event log, in megabytes
    pub log_max_size_mb: u64,

    /// Number of events returned by status queries
    pub log_history_count: usize,
}

impl Config {
    /// Load configuration: defaults, then env overrides, then the
    /// runtime overrides file if present.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_env()?;
        config.apply_overrides_file()?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(root) = env_var("SITEWARD_CONTENT_ROOT") {
            config.paths.content_root = PathBuf::from(root);
        }
        if let Some(out) = env_var("SITEWARD_OUTPUT_DIR") {
            config.paths.output_dir = PathBuf::from(out);
        }
        if let Some(dir) = env_var("SITEWARD_TEMPLATES_DIR") {
            config.paths.templates_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse::<u64>("SITEWARD_TICK_SECS") {
            config.supervisor.tick_secs = v;
        }
        if let Some(v) = env_parse::<u64>("SITEWARD_RESTART_COOLDOWN_SECS") {
            config.supervisor.restart_cooldown_secs = v;
        }
        if let Some(v) = env_parse::<u32>("SITEWARD_MAX_RESTART_ATTEMPTS") {
            config.supervisor.max_restart_attempts = v;
        }
        if let Some(v) = env_parse::<u64>("SITEWARD_DEBOUNCE_SECS") {
            config.converter.debounce_secs = v;
        }
        if let Some(v) = env_parse::<usize>("SITEWARD_WORKERS") {
            config.converter.workers = v;
        }
        if let Some(v) = env_var("SITEWARD_FFMPEG_PATH") {
            config.converter.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = env_var("SITEWARD_WEB_HOST") {
            config.web.host = v;
        }
        if let Some(v) = env_parse::<u16>("SITEWARD_WEB_PORT") {
            config.web.port = v;
        }
        if let Some(v) = env_var("SITEWARD_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = env_var("SITEWARD_LOG_FORMAT") {
            config.logging.format = v;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file, then apply runtime overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.apply_overrides_file()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the persisted runtime overrides, ignoring keys outside the
    /// allow-list. A malformed overrides file is logged and skipped, not fatal.
    pub fn apply_overrides_file(&mut self) -> Result<()> {
        let path = self.paths.overrides_file();
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read overrides file: {}", path.display()))?;
        let overrides: HashMap<String, serde_json::Value> = match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed overrides file");
                return Ok(());
            }
        };

        for (key, value) in overrides {
            if !MODIFIABLE_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Ignoring non-modifiable override");
                continue;
            }
            self.apply_override(&key, &value);
        }

        Ok(())
    }

    fn apply_override(&mut self, key: &str, value: &serde_json::Value) {
        let applied = match key {
            "debounce_secs" => value
                .as_u64()
                .map(|v| self.converter.debounce_secs = v)
                .is_some(),
            "scan_interval_secs" => value
                .as_u64()
                .map(|v| self.converter.scan_interval_secs = v)
                .is_some(),
            "log_max_size_mb" => value
                .as_u64()
                .map(|v| self.logging.log_max_size_mb = v)
                .is_some(),
            "log_history_count" => value
                .as_u64()
                .map(|v| self.logging.log_history_count = v as usize)
                .is_some(),
            _ => false,
        };

        if applied {
            tracing::debug!(key = %key, value = %value, "Applied runtime override");
        } else {
            tracing::warn!(key = %key, value = %value, "Override has wrong type, ignoring");
        }
    }

    /// Persist allow-listed overrides to the overrides file
    pub fn save_overrides(&self, overrides: &HashMap<String, serde_json::Value>) -> Result<()> {
        let filtered: HashMap<&String, &serde_json::Value> = overrides
            .iter()
            .filter(|(k, _)| MODIFIABLE_KEYS.contains(&k.as_str()))
            .collect();

        let path = self.paths.overrides_file();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&filtered)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write overrides file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.supervisor.tick_secs == 0 {
            anyhow::bail!("tick_secs must be greater than 0");
        }

        if self.supervisor.max_restart_attempts == 0 {
            anyhow::bail!("max_restart_attempts must be greater than 0");
        }

        if self.supervisor.restart_window_secs == 0 {
            anyhow::bail!("restart_window_secs must be greater than 0");
        }

        if self.converter.debounce_secs == 0 {
            anyhow::bail!("debounce_secs must be greater than 0");
        }

        for def in &self.services {
            if def.name.is_empty() {
                anyhow::bail!("service definitions require a name");
            }
        }

        Ok(())
    }

    /// Effective worker pool size
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.converter.workers > 0 {
            self.converter.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.supervisor.tick_secs)
    }

    #[must_use]
    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.supervisor.restart_cooldown_secs)
    }

    #[must_use]
    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.supervisor.restart_window_secs)
    }

    #[must_use]
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.supervisor.graceful_timeout_secs)
    }

    #[must_use]
    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.converter.debounce_secs)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.converter.drain_timeout_secs)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.web.probe_timeout_secs)
    }

    /// Resolved service definitions in launch order: built-in defaults
    /// merged with config-file entries (matched by name), disabled ones
    /// filtered out.
    pub fn resolved_services(&self) -> Vec<ServiceDef> {
        let mut defaults = self.default_services();
        for override_def in &self.services {
            if let Some(slot) = defaults.iter_mut().find(|d| d.name == override_def.name) {
                *slot = override_def.clone();
            } else {
                defaults.push(override_def.clone());
            }
        }
        defaults.retain(|d| d.enabled);
        defaults
    }

    /// Built-in service set: converter and web are critical, the log
    /// shipper is optional and disabled until configured.
    fn default_services(&self) -> Vec<ServiceDef> {
        let self_exe = std::env::current_exe()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "siteward".to_string());
        let workdir = self
            .paths
            .output_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        vec![
            ServiceDef {
                name: "converter".to_string(),
                command: self_exe.clone(),
                args: vec!["convert".to_string()],
                workdir: workdir.clone(),
                env: vec![],
                critical: true,
                enabled: true,
            },
            ServiceDef {
                name: "web".to_string(),
                command: "hypercorn".to_string(),
                args: vec![
                    "--bind".to_string(),
                    format!("{}:{}", self.web.host, self.web.port),
                    "web.app:app".to_string(),
                ],
                workdir: workdir.clone(),
                env: vec![],
                critical: true,
                enabled: true,
            },
            ServiceDef {
                name: "proxy".to_string(),
                command: "nginx".to_string(),
                args: vec!["-p".to_string(), self.paths.output_dir.display().to_string()],
                workdir: self.paths.output_dir.clone(),
                env: vec![],
                critical: true,
                enabled: true,
            },
            ServiceDef {
                name: "shipper".to_string(),
                command: "alloy".to_string(),
                args: vec!["run".to_string()],
                workdir,
                env: vec![],
                critical: false,
                enabled: false,
            },
        ]
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                content_root: PathBuf::from("content"),
                output_dir: PathBuf::from("bin"),
                templates_dir: default_templates_dir(),
            },
            supervisor: SupervisorConfig {
                tick_secs: 2,
                restart_cooldown_secs: 5,
                restart_window_secs: 60,
                max_restart_attempts: 3,
                graceful_timeout_secs: 10,
            },
            converter: ConverterConfig {
                debounce_secs: 2,
                workers: 0,
                scan_interval_secs: 12 * 3600,
                drain_timeout_secs: 15,
                ffmpeg_path: PathBuf::from("ffmpeg"),
            },
            web: WebConfig {
                host: String::from("127.0.0.1"),
                port: 8000,
                probe_timeout_secs: 15,
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
                log_max_size_mb: 100,
                log_history_count: 50,
            },
            services: Vec::new(),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_tick_interval() {
        let mut config = Config::default();
        config.supervisor.tick_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_attempt_limit() {
        let mut config = Config::default();
        config.supervisor.max_restart_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_conversions() {
        let config = Config::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(2));
        assert_eq!(config.restart_cooldown(), Duration::from_secs(5));
        assert_eq!(config.restart_window(), Duration::from_secs(60));
        assert_eq!(config.debounce_window(), Duration::from_secs(2));
    }

    #[test]
    fn test_worker_count_auto() {
        let config = Config::default();
        assert!(config.worker_count() >= 1);

        let mut fixed = Config::default();
        fixed.converter.workers = 4;
        assert_eq!(fixed.worker_count(), 4);
    }

    #[test]
    fn test_resolved_services_respects_overrides() {
        let mut config = Config::default();
        config.services.push(ServiceDef {
            name: "web".to_string(),
            command: "my-server".to_string(),
            args: vec![],
            workdir: PathBuf::from("/srv"),
            env: vec![],
            critical: true,
            enabled: true,
        });

        let services = config.resolved_services();
        let web = services.iter().find(|s| s.name == "web").unwrap();
        assert_eq!(web.command, "my-server");
        // The disabled default shipper is filtered out
        assert!(!services.iter().any(|s| s.name == "shipper"));
    }

    #[test]
    fn test_overrides_allow_list() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.output_dir = dir.path().to_path_buf();

        std::fs::write(
            config.paths.overrides_file(),
            r#"{"debounce_secs": 7, "tick_secs": 99}"#,
        )
        .unwrap();

        config.apply_overrides_file().unwrap();
        assert_eq!(config.converter.debounce_secs, 7);
        // tick_secs is not modifiable at runtime
        assert_eq!(config.supervisor.tick_secs, 2);
    }

    #[test]
    fn test_save_overrides_filters_unknown_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.output_dir = dir.path().to_path_buf();

        let mut overrides = HashMap::new();
        overrides.insert("debounce_secs".to_string(), serde_json::json!(5));
        overrides.insert("not_a_setting".to_string(), serde_json::json!(true));
        config.save_overrides(&overrides).unwrap();

        let saved = std::fs::read_to_string(config.paths.overrides_file()).unwrap();
        assert!(saved.contains("debounce_secs"));
        assert!(!saved.contains("not_a_setting"));
    }

    #[test]
    fn test_malformed_overrides_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.output_dir = dir.path().to_path_buf();

        std::fs::write(config.paths.overrides_file(), "{ not json }").unwrap();
        assert!(config.apply_overrides_file().is_ok());
        assert_eq!(config.converter.debounce_secs, 2);
    }
}
