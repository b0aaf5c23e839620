use log::info;
use std::env;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_MQTT_HOST: &str = "mosquitto";
const DEFAULT_MQTT_PORT: u16 = 8883;
const DEFAULT_KEEPALIVE_SECS: u64 = 60;
const DEFAULT_DEVICE_NAME: &str = "main-batt";
const CLIENT_ID_PREFIX: &str = "gatt";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} environment variable not set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub keepalive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct BluetoothConfig {
    pub adapter: Option<String>,
    pub address: Option<String>,
}

/// Where notification frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifySource {
    Bluetooth,
    Stdin,
}

impl NotifySource {
    fn default_source() -> Self {
        if cfg!(feature = "bluetooth") {
            NotifySource::Bluetooth
        } else {
            NotifySource::Stdin
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub device_name: String,
    pub thermal_zone: u32,
    pub bluetooth: BluetoothConfig,
    pub source: NotifySource,
}

impl BridgeConfig {
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from a variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let device_name = get("DEVICE_NAME").unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());

        let keepalive_secs = parse_or("MQTT_KEEPALIVE", get("MQTT_KEEPALIVE"), DEFAULT_KEEPALIVE_SECS)?;
        if keepalive_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "MQTT_KEEPALIVE",
                value: "0".to_string(),
                reason: "must be at least one second".to_string(),
            });
        }

        let username = get("MQTT_USERNAME");
        let password = get("MQTT_PASSWORD");
        if username.is_none() && password.is_some() {
            return Err(ConfigError::Missing("MQTT_USERNAME"));
        }

        let mqtt = MqttConfig {
            host: get("MQTT_HOST").unwrap_or_else(|| DEFAULT_MQTT_HOST.to_string()),
            port: parse_or("MQTT_PORT", get("MQTT_PORT"), DEFAULT_MQTT_PORT)?,
            keepalive_secs,
            username,
            password,
            client_id: get("MQTT_CLIENT_ID")
                .unwrap_or_else(|| format!("{}@{}", CLIENT_ID_PREFIX, device_name)),
        };

        let source = match get("NOTIFY_SOURCE") {
            None => NotifySource::default_source(),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "stdin" => NotifySource::Stdin,
                "bluetooth" if cfg!(feature = "bluetooth") => NotifySource::Bluetooth,
                "bluetooth" => {
                    return Err(ConfigError::Invalid {
                        key: "NOTIFY_SOURCE",
                        value,
                        reason: "built without the bluetooth feature".to_string(),
                    })
                }
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "NOTIFY_SOURCE",
                        value,
                        reason: "expected bluetooth or stdin".to_string(),
                    })
                }
            },
        };

        let bluetooth = BluetoothConfig {
            adapter: get("BLE_ADAPTER"),
            address: get("BLE_ADDRESS"),
        };
        if source == NotifySource::Bluetooth && bluetooth.address.is_none() {
            return Err(ConfigError::Missing("BLE_ADDRESS"));
        }

        let config = BridgeConfig {
            mqtt,
            thermal_zone: parse_or("THERMAL_ZONE", get("THERMAL_ZONE"), 0)?,
            device_name,
            bluetooth,
            source,
        };

        info!(
            "Broker {}:{} as {} (keepalive {}s), device {}, source {:?}",
            config.mqtt.host,
            config.mqtt.port,
            config.mqtt.client_id,
            config.mqtt.keepalive_secs,
            config.device_name,
            config.source
        );
        if config.source == NotifySource::Bluetooth {
            info!(
                "BLE peripheral {} on adapter {}",
                config.bluetooth.address.as_deref().unwrap_or_default(),
                config.bluetooth.adapter.as_deref().unwrap_or("default")
            );
        }

        Ok(config)
    }
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}
