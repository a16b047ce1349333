//! Core data model shared by the optimizer, planner, control loop and
//! status explainer (§3 of the scheduling specification).

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::types::{Percentage, Power};

/// Coarse categorical price bucket. The optimizer never looks at this;
/// it exists purely to localize the status explainer's wording.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceLevel {
    VeryCheap,
    Cheap,
    Normal,
    Expensive,
    VeryExpensive,
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self::Normal
    }
}

impl PriceLevel {
    /// Map the many symbolic aliases a price-data provider might use onto
    /// the closed set above. Anything unrecognized collapses to `Normal`.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "VERY_CHEAP" => Self::VeryCheap,
            "CHEAP" => Self::Cheap,
            "NORMAL" => Self::Normal,
            "EXPENSIVE" => Self::Expensive,
            "VERY_EXPENSIVE" => Self::VeryExpensive,
            _ => Self::Normal,
        }
    }
}

/// One hour of the day-ahead price curve.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    pub starts_at: DateTime<FixedOffset>,
    pub total: f64,
    pub level: PriceLevel,
}

/// Per-roof photovoltaic aggregates, combined by summation. A missing
/// roof contributes zero rather than being absent from the struct.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PvForecast {
    pub power_now_kw: f64,
    pub remaining_today_kwh: f64,
    pub production_tomorrow_kwh: f64,
}

impl PvForecast {
    pub fn combine(roofs: impl IntoIterator<Item = PvForecast>) -> Self {
        roofs.into_iter().fold(Self::default(), |acc, r| Self {
            power_now_kw: acc.power_now_kw + r.power_now_kw,
            remaining_today_kwh: acc.remaining_today_kwh + r.remaining_today_kwh,
            production_tomorrow_kwh: acc.production_tomorrow_kwh + r.production_tomorrow_kwh,
        })
    }
}

/// Last known battery reading. Written only by the telemetry refresh step;
/// the control loop never mutates it directly.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatteryState {
    pub soc_percent: f64,
    /// Negative = charging, positive = discharging.
    pub power_w: f64,
    pub voltage_v: f64,
    pub read_at: DateTime<FixedOffset>,
}

impl BatteryState {
    pub fn soc(&self) -> Percentage {
        Percentage::new(self.soc_percent)
    }

    pub fn power(&self) -> Power {
        Power::watts(self.power_w)
    }
}

/// The planner's advisory output. Either fully set, or fully absent --
/// there is no partially-populated plan.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargingPlan {
    pub planned_start: DateTime<FixedOffset>,
    pub planned_end: DateTime<FixedOffset>,
    pub target_soc_percent: f64,
    pub last_calculated: DateTime<FixedOffset>,
}

impl ChargingPlan {
    pub fn is_due_for_refresh(&self, now: DateTime<FixedOffset>, refresh_every: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_calculated) >= refresh_every
    }

    pub fn has_started(&self, now: DateTime<FixedOffset>) -> bool {
        now >= self.planned_start
    }
}

/// Inverter control mode. Distinct from any grid-interconnection notion --
/// this is purely the scheduler's own charge-control state machine (§4.3).
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChargeMode {
    /// Inverter runs its native self-consumption logic.
    Internal,
    /// Rule-driven grid charging, entered and exited by the control loop.
    AutoCharging,
    /// Operator-initiated charging; rule evaluation never overrides this.
    ManualCharging,
}

impl Default for ChargeMode {
    fn default() -> Self {
        Self::Internal
    }
}

/// The reason tag attached to a `should_charge` evaluation, in priority order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChargeReason {
    Safety,
    Full,
    PvSufficient,
    Planned,
    Waiting,
}

impl ChargeReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Safety => "safety",
            Self::Full => "full",
            Self::PvSufficient => "pv_sufficient",
            Self::Planned => "planned",
            Self::Waiting => "waiting",
        }
    }
}

/// Derived, never stored: the outcome of one rule evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlDecision {
    pub should_charge: bool,
    pub reason: ChargeReason,
}

/// One stored hourly consumption sample (§4.4).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConsumptionSample {
    pub hour_timestamp: DateTime<FixedOffset>,
    pub hour_of_day: u32,
    pub kwh: f64,
    pub is_manual: bool,
}

/// Result of a bulk consumption import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub success: bool,
}

/// Aggregate statistics over the consumption store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionStatistics {
    pub total_samples: i64,
    pub manual_samples: i64,
    pub learned_samples: i64,
    pub oldest: Option<DateTime<FixedOffset>>,
    pub newest: Option<DateTime<FixedOffset>>,
    pub learning_progress_percent: f64,
}

/// One condition in the status explainer's structured breakdown.
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionStatus {
    pub fulfilled: bool,
    pub label: String,
    pub priority: u8,
}

/// Deterministic, structured explanation of the current charging decision (§4.7).
#[cfg_attr(feature = "swagger", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub explanation: String,
    pub will_charge: bool,
    pub mode: ChargeMode,
    pub conditions: Vec<(String, ConditionStatus)>,
    pub current_soc_percent: f64,
    pub target_soc_percent: Option<f64>,
    pub pv_remaining_today_kwh: f64,
    pub planned_start: Option<String>,
    pub planned_end: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_level_parses_known_aliases() {
        assert_eq!(PriceLevel::parse("very_cheap"), PriceLevel::VeryCheap);
        assert_eq!(PriceLevel::parse("VERY-EXPENSIVE"), PriceLevel::VeryExpensive);
        assert_eq!(PriceLevel::parse("banana"), PriceLevel::Normal);
    }

    #[test]
    fn pv_forecast_combines_by_summation() {
        let a = PvForecast {
            power_now_kw: 1.0,
            remaining_today_kwh: 2.0,
            production_tomorrow_kwh: 3.0,
        };
        let b = PvForecast {
            power_now_kw: 0.5,
            remaining_today_kwh: 0.0,
            production_tomorrow_kwh: 1.0,
        };
        let combined = PvForecast::combine([a, b]);
        assert_eq!(combined.power_now_kw, 1.5);
        assert_eq!(combined.remaining_today_kwh, 2.0);
        assert_eq!(combined.production_tomorrow_kwh, 4.0);
    }

    #[test]
    fn empty_pv_forecast_is_zero() {
        let combined = PvForecast::combine(std::iter::empty());
        assert_eq!(combined.power_now_kw, 0.0);
    }
}
