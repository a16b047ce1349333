//! Component A -- Telemetry Source.
//!
//! Reads named state entities from an external home-automation state store
//! (entity-id + state/attributes, Home-Assistant-shaped) over its REST API.
//! Every read can come back "unknown"/"unavailable", which is modeled as
//! `None`, never as a numeric zero (§9 "Nullable telemetry").

use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{PriceLevel, PriceSample, PvForecast};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("request to telemetry source failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("entity {0} returned unknown/unavailable state")]
    Unavailable(String),
    #[error("entity {0} had an unexpected attribute shape")]
    MalformedAttributes(String),
}

#[derive(Debug, Deserialize)]
struct EntityState {
    state: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

/// Sensor entity-id bindings, taken verbatim from configuration (§6).
#[derive(Debug, Clone)]
pub struct EntityBindings {
    pub battery_soc_sensor: String,
    pub battery_power_sensor: String,
    pub battery_voltage_sensor: String,
    pub price_sensor: String,
    pub price_level_sensor: String,
    pub pv_power_now: Vec<String>,
    pub pv_remaining_today: Vec<String>,
    pub pv_production_tomorrow: Vec<String>,
    pub home_consumption_sensor: String,
}

pub struct TelemetrySource {
    client: reqwest::Client,
    base_url: String,
    token: String,
    bindings: EntityBindings,
}

impl TelemetrySource {
    pub fn new(base_url: String, token: String, bindings: EntityBindings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self {
            client,
            base_url,
            token,
            bindings,
        }
    }

    async fn fetch(&self, entity_id: &str) -> Result<EntityState, TelemetryError> {
        let url = format!("{}/api/states/{}", self.base_url.trim_end_matches('/'), entity_id);
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        let state: EntityState = resp.json().await?;
        if state.state == "unknown" || state.state == "unavailable" {
            return Err(TelemetryError::Unavailable(entity_id.to_string()));
        }
        Ok(state)
    }

    async fn fetch_numeric(&self, entity_id: &str) -> Result<f64, TelemetryError> {
        let state = self.fetch(entity_id).await?;
        state
            .state
            .parse::<f64>()
            .map_err(|_| TelemetryError::MalformedAttributes(entity_id.to_string()))
    }

    /// Read battery SoC/power/voltage. A reading with no update becomes a
    /// caller-visible error rather than a fabricated value.
    pub async fn read_battery(&self, now: DateTime<FixedOffset>) -> Result<crate::domain::BatteryState, TelemetryError> {
        let soc = self.fetch_numeric(&self.bindings.battery_soc_sensor).await?;
        let power = self.fetch_numeric(&self.bindings.battery_power_sensor).await?;
        let voltage = self.fetch_numeric(&self.bindings.battery_voltage_sensor).await?;
        Ok(crate::domain::BatteryState {
            soc_percent: soc,
            power_w: power,
            voltage_v: voltage,
            read_at: now,
        })
    }

    /// Read the day-ahead price curve (`today` + `tomorrow` attributes).
    pub async fn read_prices(&self) -> Result<Vec<PriceSample>, TelemetryError> {
        let state = self.fetch(&self.bindings.price_sensor).await?;
        let mut samples = Vec::new();
        for key in ["today", "tomorrow"] {
            if let Some(arr) = state.attributes.get(key).and_then(|v| v.as_array()) {
                for entry in arr {
                    if let Some(sample) = parse_price_entry(entry) {
                        samples.push(sample);
                    }
                    // malformed entries are skipped, not fatal (§4.1)
                }
            }
        }
        samples.sort_by_key(|s| s.starts_at);
        Ok(samples)
    }

    /// Read and sum the split photovoltaic forecast entities.
    pub async fn read_pv_forecast(&self) -> Result<PvForecast, TelemetryError> {
        let power_now = self.sum_entities(&self.bindings.pv_power_now).await?;
        let remaining_today = self.sum_entities(&self.bindings.pv_remaining_today).await?;
        let production_tomorrow = self.sum_entities(&self.bindings.pv_production_tomorrow).await?;
        Ok(PvForecast {
            power_now_kw: power_now,
            remaining_today_kwh: remaining_today,
            production_tomorrow_kwh: production_tomorrow,
        })
    }

    async fn sum_entities(&self, entities: &[String]) -> Result<f64, TelemetryError> {
        let mut total = 0.0;
        for entity_id in entities {
            match self.fetch_numeric(entity_id).await {
                Ok(value) => total += value,
                Err(TelemetryError::Unavailable(_)) => {} // missing roof contributes 0
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Read the household consumption sensor's current instantaneous value.
    pub async fn read_home_consumption_kwh(&self) -> Result<f64, TelemetryError> {
        self.fetch_numeric(&self.bindings.home_consumption_sensor).await
    }
}

fn parse_price_entry(entry: &serde_json::Value) -> Option<PriceSample> {
    let obj = entry.as_object()?;
    let starts_at = obj.get("startsAt")?.as_str()?;
    let starts_at: DateTime<FixedOffset> = starts_at.parse().ok()?;
    let total = obj.get("total")?.as_f64()?;
    let level = obj
        .get("level")
        .and_then(|v| v.as_str())
        .map(PriceLevel::parse)
        .unwrap_or_default();
    Some(PriceSample {
        starts_at,
        total,
        level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_price_entry() {
        let entry = serde_json::json!({
            "startsAt": "2024-01-01T10:00:00+01:00",
            "total": 1.23,
            "level": "cheap",
        });
        let sample = parse_price_entry(&entry).unwrap();
        assert_eq!(sample.total, 1.23);
        assert_eq!(sample.level, PriceLevel::Cheap);
    }

    #[test]
    fn malformed_entry_is_skipped() {
        let entry = serde_json::json!({ "total": 1.23 });
        assert!(parse_price_entry(&entry).is_none());
    }
}
