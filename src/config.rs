// SPDX-License-Identifier: GPL-2.0-or-later

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::Error;

pub const URUNC_CONFIG_PATH: &str = "/etc/urunc/config.toml";

const MAP_MONITORS_PREFIX: &str = "urunc_config.monitors";
const MAP_EXTRA_BINARIES_PREFIX: &str = "urunc_config.extra_binaries";

/// Per-backend defaults and overrides from `[monitors.<name>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub default_memory_mb: u32,
    pub default_vcpus: u32,
    pub binary_path: String,
    pub data_path: String,
    pub vhost: bool,
}

/// Non-VMM helper binaries from `[extra_binaries.<name>]`, e.g. virtiofsd.
/// `options` is an opaque argument string split on whitespace at launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExtraBinConfig {
    pub path: String,
    pub options: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub syslog: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            syslog: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimestampsConfig {
    pub enabled: bool,
    /// File that receives one record per lifecycle checkpoint.
    pub destination: String,
}

impl Default for TimestampsConfig {
    fn default() -> Self {
        TimestampsConfig {
            enabled: false,
            destination: "/var/log/urunc/timestamps.log".to_string(),
        }
    }
}

/// Process-wide configuration, loaded once from [`URUNC_CONFIG_PATH`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UruncConfig {
    pub log: LogConfig,
    pub timestamps: TimestampsConfig,
    pub monitors: HashMap<String, MonitorConfig>,
    pub extra_binaries: HashMap<String, ExtraBinConfig>,
}

/// The `[log]` and `[timestamps]` subsections alone, so that logging can be
/// brought up before the full configuration is parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogMetricsConfig {
    pub log: LogConfig,
    pub timestamps: TimestampsConfig,
}

impl LogMetricsConfig {
    pub fn load(path: impl AsRef<Path>) -> (Self, Option<Error>) {
        let path = path.as_ref();
        match read_toml::<LogMetricsConfig>(path) {
            Ok(cfg) => (cfg, None),
            Err(e) => {
                warn!(
                    "failed to load urunc log/timestamps config from {}: {e}; \
                     using default configuration",
                    path.display()
                );
                (LogMetricsConfig::default(), Some(e))
            }
        }
    }
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, Error> {
    let contents = fs::read_to_string(path).map_err(|e| Error::ConfigParse(e.to_string()))?;
    toml::from_str(&contents).map_err(|e| Error::ConfigParse(e.to_string()))
}

pub fn default_monitors() -> HashMap<String, MonitorConfig> {
    let defaults = MonitorConfig {
        default_memory_mb: 256,
        default_vcpus: 1,
        ..Default::default()
    };

    ["qemu", "hvt", "spt", "firecracker", "cloud-hypervisor"]
        .into_iter()
        .map(|name| (name.to_string(), defaults.clone()))
        .collect()
}

pub fn default_extra_binaries() -> HashMap<String, ExtraBinConfig> {
    HashMap::from([(
        "virtiofsd".to_string(),
        ExtraBinConfig {
            path: "/usr/libexec/virtiofsd".to_string(),
            options: "--cache always --sandbox none".to_string(),
        },
    )])
}

impl UruncConfig {
    /// The full default tree: five known monitors, one virtiofsd helper.
    pub fn defaults() -> Self {
        UruncConfig {
            log: LogConfig::default(),
            timestamps: TimestampsConfig::default(),
            monitors: default_monitors(),
            extra_binaries: default_extra_binaries(),
        }
    }

    /// Load the configuration from `path`. If the file is missing or
    /// malformed, the full default tree is returned together with the parse
    /// error; the caller decides whether to keep going.
    pub fn load(path: impl AsRef<Path>) -> (Self, Option<Error>) {
        let path = path.as_ref();
        match read_toml::<UruncConfig>(path) {
            Ok(cfg) => (cfg, None),
            Err(e) => {
                warn!(
                    "failed to load urunc config from {}: {e}; using default configuration",
                    path.display()
                );
                (UruncConfig::defaults(), Some(e))
            }
        }
    }

    /// Flatten the monitor and extra-binary tables into dotted keys so the
    /// configuration survives the handover to a successor process. Log and
    /// timestamp settings are re-read at process start and are not included.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();

        for (name, monitor) in &self.monitors {
            let prefix = format!("{MAP_MONITORS_PREFIX}.{name}");
            map.insert(
                format!("{prefix}.default_memory_mb"),
                monitor.default_memory_mb.to_string(),
            );
            map.insert(
                format!("{prefix}.default_vcpus"),
                monitor.default_vcpus.to_string(),
            );
            map.insert(format!("{prefix}.binary_path"), monitor.binary_path.clone());
            map.insert(format!("{prefix}.data_path"), monitor.data_path.clone());
            map.insert(format!("{prefix}.vhost"), monitor.vhost.to_string());
        }

        for (name, bin) in &self.extra_binaries {
            let prefix = format!("{MAP_EXTRA_BINARIES_PREFIX}.{name}");
            map.insert(format!("{prefix}.path"), bin.path.clone());
            map.insert(format!("{prefix}.options"), bin.options.clone());
        }

        map
    }

    /// Rebuild a configuration from a flat dotted-key map. Defaults are
    /// seeded first so that monitors and helpers absent from the map keep
    /// their stock settings; unknown keys and keys that do not split into
    /// exactly four segments are dropped; numeric fields reject non-positive
    /// values and keep the seeded default.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut cfg = UruncConfig {
            log: LogConfig::default(),
            timestamps: TimestampsConfig::default(),
            monitors: default_monitors(),
            extra_binaries: default_extra_binaries(),
        };

        for (key, value) in map {
            let parts: Vec<&str> = key.split('.').collect();
            if parts.len() != 4 || parts[0] != "urunc_config" {
                continue;
            }

            match parts[1] {
                "monitors" => {
                    let monitor = cfg.monitors.entry(parts[2].to_string()).or_default();
                    match parts[3] {
                        "default_memory_mb" => {
                            if let Some(v) = parse_positive(value) {
                                monitor.default_memory_mb = v;
                            }
                        }
                        "default_vcpus" => {
                            if let Some(v) = parse_positive(value) {
                                monitor.default_vcpus = v;
                            }
                        }
                        "binary_path" => monitor.binary_path = value.clone(),
                        "data_path" => monitor.data_path = value.clone(),
                        "vhost" => match value.parse::<bool>() {
                            Ok(v) => monitor.vhost = v,
                            Err(_) => warn!(
                                "invalid vhost value '{value}' for monitor '{}'; \
                                 using default (false)",
                                parts[2]
                            ),
                        },
                        _ => {}
                    }
                }
                "extra_binaries" => {
                    let bin = cfg.extra_binaries.entry(parts[2].to_string()).or_default();
                    match parts[3] {
                        "path" => bin.path = value.clone(),
                        "options" => bin.options = value.clone(),
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        cfg
    }
}

fn parse_positive(value: &str) -> Option<u32> {
    value.parse::<u32>().ok().filter(|v| *v > 0)
}
