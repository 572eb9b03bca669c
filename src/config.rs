//! Configuration loading and persistence.
//!
//! Values are resolved in three layers: the JSON config file, then
//! `SPILLWATCH_*` environment variables, then command-line flags (applied by
//! `main`). A missing config file means defaults; a malformed one is an error.

// Rust guideline compliant 2026-01

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_ARTIFACT_SUBDIR, DEFAULT_LISTEN_ADDR, DEFAULT_MAX_BUFFER_BYTES, DEFAULT_PRODUCER_DIR,
    DEFAULT_PRODUCER_PROGRAM, DEFAULT_PRODUCER_SCRIPT, DEFAULT_RESTART_DELAY,
};
use crate::supervisor::SupervisorOptions;

/// File name of the config file inside [`Config::config_dir`].
pub const CONFIG_FILE: &str = "config.json";

/// How to launch the producer process.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ProducerConfig {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory the program is started in.
    pub working_dir: PathBuf,
    /// Extra environment variables set for the program.
    pub env: BTreeMap<String, String>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        // Unbuffered stdout so frames arrive as soon as they are printed.
        let env = BTreeMap::from([("PYTHONUNBUFFERED".to_string(), "1".to_string())]);
        Self {
            program: DEFAULT_PRODUCER_PROGRAM.to_string(),
            args: vec![DEFAULT_PRODUCER_SCRIPT.to_string()],
            working_dir: PathBuf::from(DEFAULT_PRODUCER_DIR),
            env,
        }
    }
}

impl ProducerConfig {
    /// Run `script` through `sh -c` in `working_dir`.
    #[must_use]
    pub fn shell(script: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.into()],
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
        }
    }

    /// Human-readable command line for log messages.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Configuration for the spillwatch relay.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP/WebSocket server binds to.
    pub listen_addr: String,
    /// Producer launch settings.
    pub producer: ProducerConfig,
    /// Delay in milliseconds between a producer exit and the next launch.
    pub restart_delay_ms: u64,
    /// Maximum unconsumed producer output before the producer is restarted.
    pub max_buffer_bytes: usize,
    /// Directory served by the artifact endpoint.
    ///
    /// Defaults to `oil_spill_images` inside the producer's working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            producer: ProducerConfig::default(),
            restart_delay_ms: u64::try_from(DEFAULT_RESTART_DELAY.as_millis()).unwrap_or(5_000),
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            artifact_dir: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/spillwatch-test`
    /// 2. `SPILLWATCH_CONFIG_DIR` env var: explicit override
    /// 3. `SPILLWATCH_ENV=test`: `tmp/spillwatch-test` (integration tests)
    /// 4. Default: platform config dir (Linux: ~/.config/spillwatch)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/spillwatch-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("SPILLWATCH_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else if crate::env::is_test_mode() {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/spillwatch-test")
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("spillwatch")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads the config file from [`config_dir`](Self::config_dir), with
    /// environment variable overrides. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::read_file(&path)?
        } else {
            log::debug!("[Config] No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads an explicitly named config file, with environment variable
    /// overrides. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `SPILLWATCH_*` overrides read through `lookup`.
    ///
    /// Numeric values that fail to parse are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = lookup("SPILLWATCH_LISTEN") {
            self.listen_addr = listen;
        }

        if let Some(program) = lookup("SPILLWATCH_PRODUCER_PROGRAM") {
            self.producer.program = program;
        }

        if let Some(dir) = lookup("SPILLWATCH_PRODUCER_DIR") {
            self.producer.working_dir = PathBuf::from(dir);
        }

        if let Some(delay) = lookup("SPILLWATCH_RESTART_DELAY_MS") {
            match delay.parse::<u64>() {
                Ok(ms) => self.restart_delay_ms = ms,
                Err(e) => log::warn!("[Config] Ignoring SPILLWATCH_RESTART_DELAY_MS={delay}: {e}"),
            }
        }

        if let Some(max) = lookup("SPILLWATCH_MAX_BUFFER_BYTES") {
            match max.parse::<usize>() {
                Ok(bytes) => self.max_buffer_bytes = bytes,
                Err(e) => log::warn!("[Config] Ignoring SPILLWATCH_MAX_BUFFER_BYTES={max}: {e}"),
            }
        }

        if let Some(dir) = lookup("SPILLWATCH_ARTIFACT_DIR") {
            self.artifact_dir = Some(PathBuf::from(dir));
        }
    }

    /// Persists the configuration to `config.json` in the config directory.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Directory served by the artifact endpoint.
    #[must_use]
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(|| self.producer.working_dir.join(DEFAULT_ARTIFACT_SUBDIR))
    }

    /// Delay between a producer exit and the next launch.
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Supervisor settings derived from this config.
    #[must_use]
    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            producer: self.producer.clone(),
            restart_delay: self.restart_delay(),
            max_buffer_bytes: self.max_buffer_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.restart_delay(), Duration::from_secs(5));
        assert_eq!(config.max_buffer_bytes, 1024 * 1024);
        assert_eq!(config.producer.program, "python");
        assert_eq!(config.producer.args, vec!["final.py"]);
        assert_eq!(config.producer.working_dir, PathBuf::from("python_scripts"));
        assert_eq!(config.producer.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_artifact_dir_defaults_inside_producer_dir() {
        let mut config = Config::default();
        assert_eq!(config.artifact_dir(), PathBuf::from("python_scripts/oil_spill_images"));

        config.artifact_dir = Some(PathBuf::from("/srv/images"));
        assert_eq!(config.artifact_dir(), PathBuf::from("/srv/images"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"restart_delay_ms": 250}"#).unwrap();
        assert_eq!(config.restart_delay_ms, 250);
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.producer, ProducerConfig::default());
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("SPILLWATCH_LISTEN", "127.0.0.1:9000"),
            ("SPILLWATCH_PRODUCER_PROGRAM", "python3"),
            ("SPILLWATCH_PRODUCER_DIR", "/opt/detector"),
            ("SPILLWATCH_RESTART_DELAY_MS", "100"),
            ("SPILLWATCH_MAX_BUFFER_BYTES", "4096"),
            ("SPILLWATCH_ARTIFACT_DIR", "/var/spill"),
        ]));
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.producer.program, "python3");
        assert_eq!(config.producer.working_dir, PathBuf::from("/opt/detector"));
        assert_eq!(config.restart_delay(), Duration::from_millis(100));
        assert_eq!(config.max_buffer_bytes, 4096);
        assert_eq!(config.artifact_dir(), PathBuf::from("/var/spill"));
    }

    #[test]
    fn test_unparsable_numeric_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("SPILLWATCH_RESTART_DELAY_MS", "soon")]));
        assert_eq!(config.restart_delay(), DEFAULT_RESTART_DELAY);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spillwatch.json");
        fs::write(
            &path,
            r#"{"listen_addr": "127.0.0.1:0", "producer": {"program": "sh", "args": ["run.sh"]}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.producer.program, "sh");
        assert_eq!(config.producer.args, vec!["run.sh"]);
        // Unset producer fields keep their defaults.
        assert_eq!(config.producer.working_dir, PathBuf::from(DEFAULT_PRODUCER_DIR));
    }

    #[test]
    fn test_load_from_missing_or_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from(&dir.path().join("absent.json")).is_err());

        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_config_dir_is_inside_crate_tmp_under_test() {
        let dir = Config::config_dir().unwrap();
        assert!(dir.ends_with("tmp/spillwatch-test"));
        assert!(dir.is_dir());
    }

    #[test]
    fn test_command_line() {
        let producer = ProducerConfig::shell("echo hi", ".");
        assert_eq!(producer.command_line(), "sh -c echo hi");
    }

    #[test]
    fn test_supervisor_options_follow_config() {
        let mut config = Config::default();
        config.restart_delay_ms = 42;
        config.max_buffer_bytes = 7;
        let options = config.supervisor_options();
        assert_eq!(options.restart_delay, Duration::from_millis(42));
        assert_eq!(options.max_buffer_bytes, 7);
        assert_eq!(options.producer, config.producer);
    }
}
