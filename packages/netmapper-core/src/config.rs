use crate::scanner::{DEFAULT_PORTS, ScanError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the concurrency limit
const ENV_CONCURRENCY: &str = "NETMAPPER_CONCURRENCY";

/// Environment variable overriding the port list (comma separated)
const ENV_PORTS: &str = "NETMAPPER_PORTS";

/// Environment variable overriding the per-port connect timeout
const ENV_PORT_TIMEOUT_MS: &str = "NETMAPPER_PORT_TIMEOUT_MS";

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    scan: Option<ScanConfig>,
}

/// Settings for a scan session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Ports probed on every alive host, in probe order
    pub ports: Vec<u16>,

    /// Connect timeout per port in milliseconds
    pub port_timeout_ms: u64,

    /// Time to wait for a ping reply in milliseconds (rounded up to seconds
    /// for the system ping)
    pub liveness_timeout_ms: u64,

    /// Reverse DNS timeout in milliseconds
    pub dns_timeout_ms: u64,

    /// Maximum number of hosts scanned at once
    pub concurrency_limit: usize,

    /// Upper bound on addresses scanned per session
    pub max_addresses: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ports: DEFAULT_PORTS.to_vec(),
            port_timeout_ms: 200,
            liveness_timeout_ms: 1000,
            dns_timeout_ms: 2000,
            concurrency_limit: 50,
            max_addresses: 65536,
        }
    }
}

impl ScanConfig {
    pub fn port_timeout(&self) -> Duration {
        Duration::from_millis(self.port_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.concurrency_limit == 0 {
            return Err(ScanError::InvalidConfig(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.max_addresses == 0 {
            return Err(ScanError::InvalidConfig(
                "max_addresses must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("port_timeout_ms", self.port_timeout_ms),
            ("liveness_timeout_ms", self.liveness_timeout_ms),
            ("dns_timeout_ms", self.dns_timeout_ms),
        ] {
            if value == 0 {
                return Err(ScanError::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        if self.ports.contains(&0) {
            return Err(ScanError::InvalidConfig("port 0 cannot be probed".to_string()));
        }
        Ok(())
    }
}

/// Parse a comma separated port list such as `22, 80,443`
pub fn parse_port_list(list: &str) -> Result<Vec<u16>, ScanError> {
    let mut ports = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let port: u16 = item
            .parse()
            .map_err(|_| ScanError::InvalidConfig(format!("'{}' is not a valid port", item)))?;
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    Ok(ports)
}

/// Where the configuration came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from config file
    ConfigFile,
    /// At least one value overridden by environment variable
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::ConfigFile => write!(f, "config file"),
            ConfigSource::Environment => write!(f, "environment variable"),
        }
    }
}

/// Get the path to the configuration file
pub fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("netmapper").join("config.toml"))
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/netmapper/config.toml".to_string())
}

/// Load the `[scan]` table from a config file. Missing or unparsable files
/// yield `None` (with a warning for the latter).
pub fn load_config_file(path: &Path) -> Option<ScanConfig> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match toml::from_str::<ConfigFile>(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                config.scan
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Apply environment overrides. Returns whether any were applied.
fn apply_env_overrides(config: &mut ScanConfig, lookup: impl Fn(&str) -> Option<String>) -> bool {
    let mut applied = false;

    if let Some(value) = lookup(ENV_CONCURRENCY) {
        match value.trim().parse() {
            Ok(limit) => {
                config.concurrency_limit = limit;
                applied = true;
            }
            Err(_) => tracing::warn!("Ignoring {}={:?}: not a number", ENV_CONCURRENCY, value),
        }
    }

    if let Some(value) = lookup(ENV_PORTS) {
        match parse_port_list(&value) {
            Ok(ports) => {
                config.ports = ports;
                applied = true;
            }
            Err(e) => tracing::warn!("Ignoring {}: {}", ENV_PORTS, e),
        }
    }

    if let Some(value) = lookup(ENV_PORT_TIMEOUT_MS) {
        match value.trim().parse() {
            Ok(ms) => {
                config.port_timeout_ms = ms;
                applied = true;
            }
            Err(_) => tracing::warn!("Ignoring {}={:?}: not a number", ENV_PORT_TIMEOUT_MS, value),
        }
    }

    applied
}

/// Load scan configuration with priority:
/// 1. Environment variables (NETMAPPER_CONCURRENCY, NETMAPPER_PORTS, NETMAPPER_PORT_TIMEOUT_MS)
/// 2. Config file (~/.config/netmapper/config.toml)
/// 3. Default values
pub fn load_scan_config() -> (ScanConfig, ConfigSource) {
    let from_file = get_config_file_path().and_then(|p| load_config_file(&p));
    resolve_config(from_file, |key| std::env::var(key).ok())
}

fn resolve_config(
    from_file: Option<ScanConfig>,
    env: impl Fn(&str) -> Option<String>,
) -> (ScanConfig, ConfigSource) {
    let (mut config, mut source) = match from_file {
        Some(config) => (config, ConfigSource::ConfigFile),
        None => (ScanConfig::default(), ConfigSource::Default),
    };

    if apply_env_overrides(&mut config, env) {
        source = ConfigSource::Environment;
    }

    tracing::debug!("Using scan settings from {}: {:?}", source, config);
    (config, source)
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# NetMapper Configuration
# Place this file at: ~/.config/netmapper/config.toml

[scan]
# Ports probed on every host that answers ping, in this order
# ports = [21, 22, 23, 53, 80, 443, 445, 135, 139, 3389, 5900, 8080]

# Per-port connect timeout (ms)
# port_timeout_ms = 200

# Ping reply timeout (ms, rounded up to whole seconds)
# liveness_timeout_ms = 1000

# Reverse DNS timeout (ms)
# dns_timeout_ms = 2000

# Hosts scanned at once
# concurrency_limit = 50

# Maximum addresses per scan
# max_addresses = 65536
"#
    .to_string()
}
