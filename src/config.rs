#![allow(dead_code)]
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use validator::Validate;

/// Top-level application configuration (§6, §10.1).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,

    #[validate(nested)]
    pub auth: AuthConfig,

    #[validate(nested)]
    pub inverter: InverterConfig,

    #[validate(nested)]
    pub entities: EntityConfig,

    #[validate(nested)]
    pub planner: PlannerConfig,

    #[validate(nested)]
    pub consumption: ConsumptionConfig,

    #[validate(nested)]
    pub telemetry_source: TelemetrySourceConfig,

    #[validate(nested)]
    pub hardware: HardwareConfig,

    #[validate(nested)]
    pub log: LogConfig,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// HTTP server configuration for the operator-facing surface (§6).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    #[serde(default)]
    pub enable_cors: bool,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("failed to parse socket address")
    }
}

/// Inbound HTTP bearer-token auth for the operator API (distinct from the
/// inverter's own device-auth handshake in §4.5).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AuthConfig {
    #[validate(length(min = 32))]
    pub token: String,
}

/// Inverter connection and credentials (§4.5, §6).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct InverterConfig {
    #[validate(length(min = 1))]
    pub ip: String,

    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    #[validate(length(min = 1))]
    pub username: String,

    #[validate(length(min = 1))]
    pub installer_password: String,

    #[validate(length(min = 1))]
    pub master_password: String,

    #[serde(default = "default_modbus_unit_id")]
    pub modbus_unit_id: u8,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

/// Sensor entity-id bindings on the external telemetry source (§6).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct EntityConfig {
    #[validate(length(min = 1))]
    pub battery_soc_sensor: String,
    #[validate(length(min = 1))]
    pub battery_power_sensor: String,
    #[validate(length(min = 1))]
    pub battery_voltage_sensor: String,
    #[validate(length(min = 1))]
    pub tibber_price_sensor: String,
    #[serde(default)]
    pub tibber_price_level_sensor: Option<String>,
    #[serde(default)]
    pub pv_power_now: Vec<String>,
    #[serde(default)]
    pub pv_remaining_today: Vec<String>,
    #[serde(default)]
    pub pv_production_tomorrow: Vec<String>,
    #[validate(length(min = 1))]
    pub home_consumption_sensor: String,
}

/// Planner/control-loop tunables -- the `ConfigProfile` of §3.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_planner_config"))]
pub struct PlannerConfig {
    #[validate(range(min = 1.0, max = 30000.0))]
    pub max_charge_power_w: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub auto_safety_soc: f64,

    #[validate(range(min = 0.0, max = 100.0))]
    pub auto_charge_below_soc: f64,

    #[validate(range(min = 0.0, max = 1000.0))]
    pub auto_pv_threshold_kwh: f64,

    #[validate(range(min = 1, max = 3600))]
    pub control_interval_secs: u64,

    #[validate(range(min = 0.0, max = 1.0))]
    pub price_threshold_1h: f64,

    #[validate(range(min = 0.0, max = 1.0))]
    pub price_threshold_3h: f64,

    #[validate(range(min = 1.0, max = 600.0))]
    pub charge_duration_per_10_percent_minutes: f64,

    #[serde(default)]
    pub auto_optimization_enabled: bool,

    #[serde(default = "default_plan_refresh_minutes")]
    pub plan_refresh_minutes: i64,
}

fn validate_planner_config(config: &PlannerConfig) -> Result<(), validator::ValidationError> {
    if config.auto_safety_soc >= config.auto_charge_below_soc {
        return Err(validator::ValidationError::new(
            "auto_safety_soc must be less than auto_charge_below_soc",
        ));
    }
    Ok(())
}

/// Consumption-learning retention and fallback tunables (§4.4).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ConsumptionConfig {
    #[validate(range(min = 1, max = 365))]
    pub learning_days: i64,

    #[serde(default)]
    pub default_hourly_fallback_kwh: Option<f64>,

    #[serde(default)]
    pub average_daily_consumption_kwh: Option<f64>,
}

/// External home-automation state store connection (§6).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetrySourceConfig {
    #[validate(url)]
    pub base_url: String,

    #[validate(length(min = 1))]
    pub token: String,
}

/// Hardware mode: simulated (default) or a real field-bus connection.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct HardwareConfig {
    #[serde(default = "default_hardware_mode")]
    pub mode: HardwareMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareMode {
    Simulated,
    Modbus,
}

fn default_hardware_mode() -> HardwareMode {
    HardwareMode::Simulated
}

/// Logging configuration (§10.2).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_modbus_unit_id() -> u8 {
    71
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_plan_refresh_minutes() -> i64 {
    5
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl AppConfig {
    /// Load configuration from TOML files and environment variables.
    ///
    /// Order (later overrides earlier):
    /// 1. `config/default.toml`
    /// 2. `config/<environment>.toml`, if given
    /// 3. Environment variables prefixed `OBC__`, double-underscore nested
    ///    (e.g. `OBC__PLANNER__AUTO_SAFETY_SOC`)
    pub fn load() -> Result<Self> {
        Self::load_with_env(None)
    }

    pub fn load_with_env(environment: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file("config/default.toml"));

        if let Some(env) = environment {
            figment = figment.merge(Toml::file(format!("config/{env}.toml")));
        } else {
            figment = figment.merge(Toml::file("config/development.toml").nested());
        }

        figment = figment.merge(Env::prefixed("OBC__").split("__"));

        let config: AppConfig = figment.extract().context("failed to parse configuration")?;
        config.validate().context("configuration validation failed")?;
        Ok(config)
    }
}

pub type Config = AppConfig;

impl std::fmt::Debug for InverterConfigRedacted<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InverterConfig")
            .field("ip", &self.0.ip)
            .field("port", &self.0.port)
            .field("username", &self.0.username)
            .field("installer_password", &"<redacted>")
            .field("master_password", &"<redacted>")
            .finish()
    }
}

/// Wrapper used to log inverter config without leaking secrets.
pub struct InverterConfigRedacted<'a>(pub &'a InverterConfig);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_socket_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: false,
        };
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn planner_config_rejects_inverted_soc_bounds() {
        let config = PlannerConfig {
            max_charge_power_w: 3000.0,
            auto_safety_soc: 95.0,
            auto_charge_below_soc: 20.0,
            auto_pv_threshold_kwh: 5.0,
            control_interval_secs: 30,
            price_threshold_1h: 0.1,
            price_threshold_3h: 0.1,
            charge_duration_per_10_percent_minutes: 18.0,
            auto_optimization_enabled: true,
            plan_refresh_minutes: 5,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn planner_config_accepts_valid_bounds() {
        let config = PlannerConfig {
            max_charge_power_w: 3000.0,
            auto_safety_soc: 20.0,
            auto_charge_below_soc: 95.0,
            auto_pv_threshold_kwh: 5.0,
            control_interval_secs: 30,
            price_threshold_1h: 0.1,
            price_threshold_3h: 0.1,
            charge_duration_per_10_percent_minutes: 18.0,
            auto_optimization_enabled: true,
            plan_refresh_minutes: 5,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn redacted_debug_hides_secrets() {
        let inverter = InverterConfig {
            ip: "192.168.1.50".to_string(),
            port: 80,
            username: "user1".to_string(),
            installer_password: "hunter2".to_string(),
            master_password: "hunter3".to_string(),
            modbus_unit_id: 71,
            http_timeout_secs: 10,
        };
        let rendered = format!("{:?}", InverterConfigRedacted(&inverter));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("hunter3"));
    }
}
