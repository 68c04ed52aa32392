//! The `FujiConfig` shape (§9 Open Question 3: two variants exist in the
//! source trees, this crate implements the richer, authoritative one).
//!
//! Loading/writing "fujinet.yaml" on a primary/backup filesystem is an
//! external collaborator (§1/§6) — this crate owns only the shape, its
//! defaults, and (de)serialization from a YAML string via `serde`/
//! `serde_yaml`.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    pub device_name: String,
    pub rotation_sounds: bool,
    pub status_wait_enabled: bool,
    pub config_enabled: bool,
    pub timezone: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: "FujiNet".to_string(),
            rotation_sounds: true,
            status_wait_enabled: true,
            config_enabled: true,
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct WifiConfig {
    pub ssid: String,
    pub passphrase: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    pub slot: u8,
    pub name: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            slot: 0,
            name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MountImageTypeOverride {
    #[default]
    Auto,
    Atr,
    Ssd,
    Dsd,
    Raw,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MountConfig {
    pub slot: u8,
    pub host_slot: u8,
    pub path: String,
    pub read_only: bool,
    pub type_override: MountImageTypeOverride,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            slot: 0,
            host_slot: 0,
            path: String::new(),
            read_only: false,
            type_override: MountImageTypeOverride::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModemConfig {
    pub enabled: bool,
    pub sniffer_enabled: bool,
    pub baud: u32,
    pub baud_lock: bool,
    pub auto_answer: bool,
    pub telnet: bool,
    pub listen_port: u16,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sniffer_enabled: false,
            baud: 2400,
            baud_lock: false,
            auto_answer: false,
            telnet: true,
            listen_port: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CpmConfig {
    pub ccp: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PrinterConfig {
    pub printer_type: String,
    pub port: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct NetsioConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClockConfig {
    pub sntp_server: String,
    pub format_24h: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            sntp_server: "pool.ntp.org".to_string(),
            format_24h: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FujiConfig {
    pub general: GeneralConfig,
    pub wifi: WifiConfig,
    pub hosts: Vec<HostConfig>,
    pub mounts: Vec<MountConfig>,
    pub modem: ModemConfig,
    pub cpm: CpmConfig,
    pub printer: PrinterConfig,
    pub netsio: NetsioConfig,
    pub clock: ClockConfig,
}

impl FujiConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
