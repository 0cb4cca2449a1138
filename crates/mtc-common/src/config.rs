//! ---
//! mtc_section: "01-core-functionality"
//! mtc_subsection: "module"
//! mtc_type: "source"
//! mtc_scope: "code"
//! mtc_description: "Shared primitives and utilities for the adapter runtime."
//! mtc_version: "v0.0.0-prealpha"
//! mtc_owner: "tbd"
//! ---
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Well-known SHDR port agents connect to by default.
pub const DEFAULT_PORT: u16 = 7878;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_heartbeat() -> Duration {
    Duration::from_millis(10_000)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_millis(2_000)
}

fn default_logging_directory() -> Option<PathBuf> {
    Some(PathBuf::from("target/logs"))
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_publish_interval() -> Duration {
    Duration::from_millis(1_000)
}

fn default_device() -> Option<String> {
    None
}

fn default_manufacturer() -> String {
    "Simulated Machine Works".to_owned()
}

fn default_fault_probability() -> f64 {
    0.05
}

/// Primary configuration object for the adapter daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub adapter: AdapterSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "MTC_ADAPTER_CONFIG";

    /// Load configuration from disk, respecting the `MTC_ADAPTER_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.adapter.validate()?;
        self.simulator.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Settings consumed by the adapter server itself.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSettings {
    /// TCP port to listen on. `0` binds an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Heartbeat interval advertised in `* PONG`. Zero disables liveness checks.
    #[serde(default = "default_heartbeat", rename = "heartbeat_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat: Duration,
    /// Echo every outbound line to the log.
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_shutdown_grace", rename = "shutdown_grace_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub shutdown_grace: Duration,
}

impl AdapterSettings {
    /// Settings bound to the loopback interface on an ephemeral port.
    pub fn loopback() -> Self {
        Self {
            port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Self::default()
        }
    }

    /// Heartbeat interval in whole milliseconds, as sent on the wire.
    pub fn heartbeat_millis(&self) -> u64 {
        u64::try_from(self.heartbeat.as_millis()).unwrap_or(u64::MAX)
    }

    /// Timeout applied to a session once the first ping has arrived.
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        if self.heartbeat.is_zero() {
            None
        } else {
            Some(self.heartbeat * 2)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.shutdown_grace.is_zero() {
            return Err(anyhow!("adapter.shutdown_grace_ms must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            heartbeat: default_heartbeat(),
            verbose: false,
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for rolling log files; `None` keeps logs on stdout only.
    #[serde(default = "default_logging_directory")]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Knobs for the simulated machine driven by the daemon.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_device")]
    pub device: Option<String>,
    #[serde(default = "default_publish_interval", rename = "interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_fault_probability")]
    pub fault_probability: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Device UUID announced to agents; generated per run when absent.
    #[serde(default)]
    pub device_uuid: Option<String>,
    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("simulator.interval_ms must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.fault_probability) {
            return Err(anyhow!(
                "simulator.fault_probability must be within [0, 1], got {}",
                self.fault_probability
            ));
        }
        Ok(())
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            interval: default_publish_interval(),
            fault_probability: default_fault_probability(),
            seed: None,
            device_uuid: None,
            manufacturer: default_manufacturer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::str::FromStr;

    #[test]
    fn defaults_match_protocol_conventions() {
        let config = AppConfig::default();
        assert_eq!(config.adapter.port, 7878);
        assert_eq!(config.adapter.heartbeat, Duration::from_millis(10_000));
        assert_eq!(config.adapter.heartbeat_millis(), 10_000);
        assert_eq!(
            config.adapter.heartbeat_timeout(),
            Some(Duration::from_millis(20_000))
        );
        assert!(!config.adapter.verbose);
    }

    #[test]
    fn zero_heartbeat_disables_timeout() {
        let settings = AdapterSettings {
            heartbeat: Duration::ZERO,
            ..AdapterSettings::default()
        };
        assert_eq!(settings.heartbeat_timeout(), None);
    }

    #[test]
    fn parses_partial_toml() {
        let config = AppConfig::from_str(
            r#"
            [adapter]
            port = 7879
            heartbeat_ms = 250
            verbose = true

            [logging]
            format = "structured-json"
            "#,
        )
        .unwrap();
        assert_eq!(config.adapter.port, 7879);
        assert_eq!(config.adapter.heartbeat, Duration::from_millis(250));
        assert!(config.adapter.verbose);
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
        assert_eq!(config.simulator.interval, Duration::from_millis(1_000));
    }

    #[test]
    fn rejects_out_of_range_fault_probability() {
        let err = AppConfig::from_str("[simulator]\nfault_probability = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("fault_probability"));
    }

    #[test]
    fn load_prefers_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adapter.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[adapter]\nport = 9000").unwrap();

        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.adapter.port, 9000);
    }

    #[test]
    fn load_reports_inspected_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = AppConfig::load(&[missing]).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }
}
