//! # Configuration
//!
//! The reader is configured by one JSON file with camelCase keys. Every
//! field except `key` has a default, so a minimal file is
//!
//! ```json
//! { "key": "36C66639E48A8CA4D6BC8B282A793BBB" }
//! ```
//!
//! The file is loaded and validated once at startup. The resulting
//! [`Config`] is immutable and hands each component its own settings.

use crate::constants::{DEFAULT_BAUDRATE, DEFAULT_PORT};
use crate::dlms::crypto::MeterKey;
use crate::meter::serial::SerialConfig;
use crate::sinks::{InfluxSinkConfig, InfluxVersion, MqttSinkConfig, PrometheusSinkConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

const REDACTED: &str = "***";

/// Configuration loading and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Invalid JSON: {0}")]
    Parse(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Log line layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Message only
    Raw,
    /// `timestamp - target - LEVEL - message`
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MbusConfig {
    pub port: String,
    pub baud_rate: u32,
}

impl Default for MbusConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUDRATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsoleLogConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub level: String,
}

impl Default for ConsoleLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Raw,
            level: "INFO".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileLogConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub path: String,
    pub level: String,
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: LogFormat::Json,
            path: String::new(),
            level: "INFO".to_string(),
        }
    }
}

/// Loki log shipping. Read so that existing files load unchanged; no
/// handler is installed for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LokiLogConfig {
    pub enabled: bool,
    pub url: String,
    pub level: String,
}

impl Default for LokiLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            level: "INFO".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub console: ConsoleLogConfig,
    pub file: FileLogConfig,
    pub loki: LokiLogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub is_authenticated: bool,
    pub username: String,
    pub password: String,
}

impl AuthConfig {
    /// Username and password, when both are set
    pub fn credentials(&self) -> Option<(String, String)> {
        (!self.username.is_empty() && !self.password.is_empty())
            .then(|| (self.username.clone(), self.password.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MqttConfig {
    pub enabled: bool,
    #[serde(rename = "brokerIP")]
    pub broker_ip: String,
    pub broker_port: u16,
    pub authentication: AuthConfig,
    pub mqtt_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_ip: String::new(),
            broker_port: 1883,
            authentication: AuthConfig::default(),
            mqtt_prefix: "smartmeter".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InfluxConfig {
    pub enabled: bool,
    #[serde(rename = "serverIP")]
    pub server_ip: String,
    pub server_port: u16,
    pub authentication: AuthConfig,
    pub database: String,
    pub organization: String,
    pub version: u8,
    pub send_metrics: bool,
    pub send_values: bool,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_ip: String::new(),
            server_port: 8086,
            authentication: AuthConfig::default(),
            database: "smartmeter".to_string(),
            organization: "smartmeter".to_string(),
            version: 2,
            send_metrics: false,
            send_values: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrometheusConfig {
    pub enabled: bool,
    pub port: u16,
    pub expose_metrics: bool,
    pub expose_values: bool,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8000,
            expose_metrics: true,
            expose_values: false,
        }
    }
}

/// Complete reader configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub mbus: MbusConfig,
    /// Hex-encoded AES key of the customer interface
    pub key: String,
    pub logging: LoggingConfig,
    pub mqtt: MqttConfig,
    pub influxdb: InfluxConfig,
    pub prometheus: PrometheusConfig,
}

impl Config {
    /// Read, parse and validate a configuration file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        content.parse()
    }

    /// Check every constraint the components rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.meter_key()?;

        if self.mbus.port.trim().is_empty() {
            return Err(invalid("mbus.port", "must not be empty"));
        }
        if self.mbus.baud_rate == 0 {
            return Err(invalid("mbus.baudRate", "must be positive"));
        }

        parse_level(&self.logging.console.level)
            .ok_or_else(|| invalid("logging.console.level", format!("unknown level {:?}", self.logging.console.level)))?;
        parse_level(&self.logging.file.level)
            .ok_or_else(|| invalid("logging.file.level", format!("unknown level {:?}", self.logging.file.level)))?;
        if self.logging.file.enabled && self.logging.file.path.trim().is_empty() {
            return Err(invalid("logging.file.path", "required when file logging is enabled"));
        }

        if self.mqtt.enabled && self.mqtt.broker_ip.trim().is_empty() {
            return Err(invalid("mqtt.brokerIP", "required when MQTT is enabled"));
        }
        if self.influxdb.enabled && self.influxdb.server_ip.trim().is_empty() {
            return Err(invalid("influxdb.serverIP", "required when InfluxDB is enabled"));
        }
        InfluxVersion::try_from(self.influxdb.version)
            .map_err(|v| invalid("influxdb.version", format!("expected 1, 2 or 3, got {}", v)))?;

        Ok(())
    }

    /// The decryption key, checked for hex and AES key length.
    pub fn meter_key(&self) -> Result<MeterKey, ConfigError> {
        if self.key.trim().is_empty() {
            return Err(invalid("key", "is required"));
        }
        let key = MeterKey::from_hex(&self.key).map_err(|e| invalid("key", e.to_string()))?;
        if !key.has_valid_length() {
            return Err(invalid(
                "key",
                format!("expected 16, 24 or 32 bytes, got {}", key.len()),
            ));
        }
        Ok(key)
    }

    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.mbus.port.clone(),
            baudrate: self.mbus.baud_rate,
        }
    }

    pub fn mqtt_sink_config(&self) -> MqttSinkConfig {
        let credentials = self.mqtt.authentication.credentials();
        MqttSinkConfig {
            host: self.mqtt.broker_ip.clone(),
            port: self.mqtt.broker_port,
            username: credentials.as_ref().map(|(user, _)| user.clone()),
            password: credentials.map(|(_, password)| password),
            prefix: self.mqtt.mqtt_prefix.clone(),
        }
    }

    pub fn influx_sink_config(&self) -> Result<InfluxSinkConfig, ConfigError> {
        let influx = &self.influxdb;
        let version = InfluxVersion::try_from(influx.version)
            .map_err(|v| invalid("influxdb.version", format!("expected 1, 2 or 3, got {}", v)))?;
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Ok(InfluxSinkConfig {
            host: influx.server_ip.clone(),
            port: influx.server_port,
            version,
            database: influx.database.clone(),
            organization: influx.organization.clone(),
            username: non_empty(&influx.authentication.username),
            password: non_empty(&influx.authentication.password),
            send_values: influx.send_values,
            send_metrics: influx.send_metrics,
        })
    }

    pub fn prometheus_sink_config(&self) -> PrometheusSinkConfig {
        PrometheusSinkConfig {
            port: self.prometheus.port,
            expose_values: self.prometheus.expose_values,
            expose_metrics: self.prometheus.expose_metrics,
        }
    }

    /// The configuration with key and passwords masked, for logging.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let mask = |s: &mut String| {
            if !s.is_empty() {
                *s = REDACTED.to_string();
            }
        };
        mask(&mut copy.key);
        mask(&mut copy.mqtt.authentication.password);
        mask(&mut copy.influxdb.authentication.password);
        copy
    }
}

impl std::str::FromStr for Config {
    type Err = ConfigError;

    /// Parse and validate JSON text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Renders the redacted configuration as JSON.
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.redacted()).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Level names as written in configuration files, case-insensitive.
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.trim().to_ascii_uppercase().as_str() {
        "WARNING" => Some(LevelFilter::Warn),
        "CRITICAL" | "FATAL" => Some(LevelFilter::Error),
        "NOTSET" => Some(LevelFilter::Trace),
        other => other.parse().ok(),
    }
}
