use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_idle_after_secs")]
    pub idle_after_secs: u64,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub gpu: GpuConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_idle_ticks_before_rescan")]
    pub idle_ticks_before_rescan: u32,
    #[serde(default = "default_probe_delay_ms")]
    pub probe_delay_ms: u64,
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpuConfig {
    #[serde(default = "default_vram_suspect_mb")]
    pub vram_suspect_mb: f64,
    #[serde(default = "default_external_refresh_secs")]
    pub external_refresh_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct AlertsConfig {
    #[serde(default = "default_warn_at")]
    pub warn_at: f64,
    #[serde(default = "default_critical_at")]
    pub critical_at: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            interval_secs: default_interval_secs(),
            idle_after_secs: default_idle_after_secs(),
            network: NetworkConfig::default(),
            gpu: GpuConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            idle_ticks_before_rescan: default_idle_ticks_before_rescan(),
            probe_delay_ms: default_probe_delay_ms(),
            denylist: default_denylist(),
        }
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            vram_suspect_mb: default_vram_suspect_mb(),
            external_refresh_secs: default_external_refresh_secs(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            warn_at: default_warn_at(),
            critical_at: default_critical_at(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Result<(Self, bool), ConfigError> {
        match Self::load_from_file(path) {
            Ok(cfg) => Ok((cfg, true)),
            Err(ConfigError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Ok((Self::default(), false))
            }
            Err(err) => Err(err),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }
        if self.idle_after_secs < 1 {
            return Err(ConfigError::Validation(
                "idle_after_secs must be >= 1".to_string(),
            ));
        }

        validate_network(&self.network)?;
        validate_gpu(&self.gpu)?;
        validate_alerts(&self.alerts)?;

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_after_secs)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

impl GpuConfig {
    pub fn external_refresh(&self) -> Duration {
        Duration::from_secs(self.external_refresh_secs)
    }
}

impl NetworkConfig {
    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_ms)
    }
}

fn validate_network(cfg: &NetworkConfig) -> Result<(), ConfigError> {
    if cfg.idle_ticks_before_rescan < 1 {
        return Err(ConfigError::Validation(
            "network.idle_ticks_before_rescan must be >= 1".to_string(),
        ));
    }
    if cfg.probe_delay_ms > 1000 {
        return Err(ConfigError::Validation(
            "network.probe_delay_ms must be <= 1000".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for marker in &cfg.denylist {
        if marker.is_empty() {
            return Err(ConfigError::Validation(
                "network.denylist entries must not be empty".to_string(),
            ));
        }
        if !seen.insert(marker.as_str()) {
            return Err(ConfigError::Validation(format!(
                "network.denylist entry '{marker}' is listed twice"
            )));
        }
    }
    Ok(())
}

fn validate_gpu(cfg: &GpuConfig) -> Result<(), ConfigError> {
    if !cfg.vram_suspect_mb.is_finite() || cfg.vram_suspect_mb <= 0.0 {
        return Err(ConfigError::Validation(
            "gpu.vram_suspect_mb must be > 0".to_string(),
        ));
    }
    if cfg.external_refresh_secs == 0 || cfg.external_refresh_secs > 300 {
        return Err(ConfigError::Validation(
            "gpu.external_refresh_secs must be in range 1..300".to_string(),
        ));
    }
    Ok(())
}

fn validate_alerts(cfg: &AlertsConfig) -> Result<(), ConfigError> {
    if !(0.0..=200.0).contains(&cfg.warn_at) {
        return Err(ConfigError::Validation(
            "alerts.warn_at must be in range 0..200".to_string(),
        ));
    }
    if !(0.0..=200.0).contains(&cfg.critical_at) {
        return Err(ConfigError::Validation(
            "alerts.critical_at must be in range 0..200".to_string(),
        ));
    }
    if cfg.warn_at >= cfg.critical_at {
        return Err(ConfigError::Validation(
            "alerts.warn_at must be below alerts.critical_at".to_string(),
        ));
    }
    Ok(())
}

fn default_listen() -> String {
    "127.0.0.1:9120".to_string()
}

const fn default_interval_secs() -> u64 {
    1
}

const fn default_idle_after_secs() -> u64 {
    5
}

const fn default_idle_ticks_before_rescan() -> u32 {
    5
}

const fn default_probe_delay_ms() -> u64 {
    50
}

fn default_denylist() -> Vec<String> {
    [
        "Loopback",
        "VMware",
        "Virtual",
        "Teredo",
        "Pseudo",
        "docker",
        "veth",
        "virbr",
        "vboxnet",
        "vEthernet",
        "tun",
        "tap",
        "utun",
        "wg",
        "tailscale",
        "zt",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

const fn default_vram_suspect_mb() -> f64 {
    crate::collectors::gpu::DEFAULT_VRAM_SUSPECT_MB
}

const fn default_external_refresh_secs() -> u64 {
    5
}

const fn default_warn_at() -> f64 {
    80.0
}

const fn default_critical_at() -> f64 {
    90.0
}
