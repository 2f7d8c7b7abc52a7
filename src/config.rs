//! Device configuration from command-line flags and `DOOR_*` environment variables

use crate::command::{SharedSecret, DEFAULT_MAX_CONNECTIONS, DEFAULT_READ_TIMEOUT};
use crate::link::LinkConfig;
use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use door_shared::{protocol, UnlockDuration};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Wi-Fi passphrase; `Debug` is redacted
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WifiPassword(String);

impl WifiPassword {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for WifiPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WifiPassword(<redacted>)")
    }
}

fn parse_secret(value: &str) -> Result<SharedSecret, String> {
    SharedSecret::new(value).map_err(|e| e.to_string())
}

fn parse_password(value: &str) -> Result<WifiPassword, String> {
    Ok(WifiPassword(value.to_string()))
}

fn default_bind() -> String {
    format!("0.0.0.0:{}", protocol::COMMAND_PORT)
}

/// How the device reaches the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LinkKind {
    /// Join a Wi-Fi network through NetworkManager
    Nmcli,
    /// Assume the network is already up
    Static,
}

/// Which lock driver to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActuatorKind {
    /// sysfs GPIO value files
    Gpio,
    /// In-memory driver that only logs
    Simulated,
}

/// Door actuator firmware
#[derive(Parser, Debug)]
#[command(name = "door-actuator")]
#[command(about = "Network-attached door actuator")]
#[command(version)]
pub struct Args {
    /// Wi-Fi network to join
    #[arg(long, env = "DOOR_WIFI_SSID")]
    pub wifi_ssid: Option<String>,

    /// Wi-Fi passphrase
    #[arg(long, env = "DOOR_WIFI_PASSWORD", hide_env_values = true, default_value = "", value_parser = parse_password)]
    pub wifi_password: WifiPassword,

    /// Wireless interface
    #[arg(long, env = "DOOR_INTERFACE", default_value = "wlan0")]
    pub interface: String,

    /// Network link driver
    #[arg(long, env = "DOOR_LINK", value_enum, default_value_t = LinkKind::Nmcli)]
    pub link: LinkKind,

    /// Per-attempt join timeout in milliseconds
    #[arg(long, env = "DOOR_LINK_TIMEOUT_MS", default_value_t = protocol::LINK_CONNECT_TIMEOUT_MS)]
    pub link_timeout_ms: u64,

    /// Pre-shared secret expected in the `psk` field of every request
    #[arg(long, env = "DOOR_PSK", hide_env_values = true, value_parser = parse_secret)]
    pub psk: SharedSecret,

    /// Network hostname of this node
    #[arg(long, env = "DOOR_HOSTNAME", default_value = "access-front-door")]
    pub hostname: String,

    /// Identity announced to the hub (defaults to the hostname)
    #[arg(long, env = "DOOR_DEVICE_ID")]
    pub device_id: Option<String>,

    /// Hub address, `host` or `host:port`
    #[arg(long, env = "DOOR_HUB")]
    pub hub: Option<String>,

    /// Address the command server listens on
    #[arg(long, env = "DOOR_BIND", default_value_t = default_bind())]
    pub bind: String,

    /// Unlock window in seconds when a request names none
    #[arg(long, env = "DOOR_DEFAULT_DURATION", default_value_t = protocol::DEFAULT_UNLOCK_SECS, allow_negative_numbers = true)]
    pub default_duration: i64,

    /// Time a client gets to deliver its request, in milliseconds
    #[arg(long, env = "DOOR_REQUEST_TIMEOUT_MS", default_value_t = DEFAULT_READ_TIMEOUT.as_millis() as u64)]
    pub request_timeout_ms: u64,

    /// Connections served at once
    #[arg(long, env = "DOOR_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Lock driver
    #[arg(long, env = "DOOR_ACTUATOR", value_enum, default_value_t = ActuatorKind::Gpio)]
    pub actuator: ActuatorKind,

    /// sysfs value file driving the lock
    #[arg(long, env = "DOOR_LOCK_GPIO", default_value = "/sys/class/gpio/gpio23/value")]
    pub lock_gpio: PathBuf,

    /// sysfs value file driving the status LED
    #[arg(long, env = "DOOR_INDICATOR_GPIO")]
    pub indicator_gpio: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "DOOR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Network link settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSettings {
    Wifi {
        interface: String,
        ssid: String,
        password: WifiPassword,
    },
    Static,
}

/// Lock driver settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorSettings {
    Gpio {
        lock_line: PathBuf,
        indicator_line: Option<PathBuf>,
    },
    Simulated,
}

/// Validated device configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub link: LinkSettings,
    pub link_timing: LinkConfig,
    pub secret: SharedSecret,
    pub hostname: String,
    pub device_id: String,
    pub hub: Option<String>,
    pub bind: String,
    pub default_duration: UnlockDuration,
    pub request_timeout: Duration,
    pub max_connections: usize,
    pub actuator: ActuatorSettings,
}

impl Args {
    /// Check the flags and resolve defaults
    pub fn into_config(self) -> Result<DeviceConfig> {
        let link = match self.link {
            LinkKind::Nmcli => {
                let Some(ssid) = self.wifi_ssid.filter(|s| !s.is_empty()) else {
                    bail!("--wifi-ssid is required with --link nmcli");
                };
                LinkSettings::Wifi {
                    interface: self.interface,
                    ssid,
                    password: self.wifi_password,
                }
            }
            LinkKind::Static => LinkSettings::Static,
        };

        if self.link_timeout_ms == 0 {
            bail!("--link-timeout-ms must be greater than zero");
        }
        if self.request_timeout_ms == 0 {
            bail!("--request-timeout-ms must be greater than zero");
        }
        if self.max_connections == 0 {
            bail!("--max-connections must be greater than zero");
        }

        let default_duration = UnlockDuration::clamped(self.default_duration);
        if default_duration.secs() as i64 != self.default_duration {
            warn!(
                "[CONFIG] --default-duration {} out of range, using {}",
                self.default_duration, default_duration
            );
        }

        let actuator = match self.actuator {
            ActuatorKind::Gpio => ActuatorSettings::Gpio {
                lock_line: self.lock_gpio,
                indicator_line: self.indicator_gpio,
            },
            ActuatorKind::Simulated => ActuatorSettings::Simulated,
        };

        let device_id = self
            .device_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.hostname.clone());

        Ok(DeviceConfig {
            link,
            link_timing: LinkConfig {
                connect_timeout: Duration::from_millis(self.link_timeout_ms),
                ..LinkConfig::default()
            },
            secret: self.psk,
            hostname: self.hostname,
            device_id,
            hub: self.hub.filter(|hub| !hub.is_empty()),
            bind: self.bind,
            default_duration,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_connections: self.max_connections,
            actuator,
        })
    }
}
