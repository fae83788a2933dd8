//! Device configuration
//!
//! Handles:
//! - Broker address and credentials
//! - Topic root and report service id
//! - Link, session and serial timing
//! - Sensor and actuator wiring
//!
//! Lookup order: explicit path, `DESKCLOCK_CONFIG`, then the OS config dir.
//! A missing file means defaults; `DESKCLOCK_MQTT_PASSWORD` overrides the password.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_ENV: &str = "DESKCLOCK_CONFIG";
pub const PASSWORD_ENV: &str = "DESKCLOCK_MQTT_PASSWORD";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub broker: BrokerConfig,
    pub device: DeviceIdentity,
    pub link: LinkConfig,
    pub session: SessionConfig,
    pub serial: SerialConfig,
    pub sensors: SensorsConfig,
    pub actuators: ActuatorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    /// Prefix of every topic, e.g. `$oc/devices/<device id>`
    pub topic_root: String,
    pub service_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Interface to wait for; any non-loopback interface when unset
    pub interface: Option<String>,
    pub connect_timeout_secs: u64,
    pub retry_delay_secs: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub retry_delay_secs: u64,
    pub service_window_ms: u64,
    pub report_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Byte source (tty, fifo, file); stdin when unset
    pub path: Option<PathBuf>,
    pub frame_gap_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    /// 1-Wire `w1_slave` file of the room thermometer
    pub ambient_temp_path: Option<PathBuf>,
    pub ambient_temp_period_ms: u64,
    /// Raw ADC count file of the photoresistor divider
    pub light_adc_path: Option<PathBuf>,
    pub light_period_ms: u64,
    /// Component label used for the controller die temperature
    pub controller_label: Option<String>,
    pub controller_period_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorsConfig {
    pub led_count: usize,
    pub song_count: usize,
    pub alarm_file: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "deskclock".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 15,
            connect_timeout_secs: 5,
        }
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            topic_root: "$oc/devices/deskclock".to_string(),
            service_id: "Property".to_string(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            interface: None,
            connect_timeout_secs: 10,
            retry_delay_secs: 30,
            poll_interval_ms: 250,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: 3,
            service_window_ms: 100,
            report_interval_ms: 1000,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: None,
            frame_gap_ms: 50,
        }
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            ambient_temp_path: None,
            ambient_temp_period_ms: 2000,
            light_adc_path: None,
            light_period_ms: 100,
            controller_label: None,
            controller_period_ms: 500,
        }
    }
}

impl Default for ActuatorsConfig {
    fn default() -> Self {
        Self {
            led_count: 10,
            song_count: 12,
            alarm_file: None,
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl SessionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn service_window(&self) -> Duration {
        Duration::from_millis(self.service_window_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

impl DeviceConfig {
    /// Loads the config from `explicit`, the env var, or the OS location
    pub async fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(path) => PathBuf::from(path),
                None => Self::config_file_path()?,
            },
        };

        let mut config = if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
            info!("Loaded config from {}", path.display());
            Self::from_toml(&content)?
        } else {
            info!("No config at {}, using defaults", path.display());
            Self::default()
        };

        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            config.broker.password = Some(password);
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("deskclock");
        path.push("link.toml");
        Ok(path)
    }
}
