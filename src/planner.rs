//! Component F -- Planner (§4.2).
//!
//! Combines the optimizer's charge-end timestamp with the current/target
//! SoC and a charge-rate model into an advisory `ChargingPlan`.

use chrono::{DateTime, FixedOffset};

use crate::domain::ChargingPlan;

/// `charge_duration_per_10_percent`: minutes of charging needed per 10% of
/// SoC delta. If `current_soc >= target_soc`, the plan collapses to a
/// zero-duration window at `charge_end`.
pub fn plan(
    charge_end: DateTime<FixedOffset>,
    current_soc: f64,
    target_soc: f64,
    charge_duration_per_10_percent_minutes: f64,
    now: DateTime<FixedOffset>,
) -> ChargingPlan {
    if current_soc >= target_soc {
        return ChargingPlan {
            planned_start: charge_end,
            planned_end: charge_end,
            target_soc_percent: target_soc,
            last_calculated: now,
        };
    }

    let delta = target_soc - current_soc;
    let minutes = (delta / 10.0) * charge_duration_per_10_percent_minutes;
    let planned_start = charge_end - chrono::Duration::seconds((minutes * 60.0).round() as i64);

    ChargingPlan {
        planned_start,
        planned_end: charge_end,
        target_soc_percent: target_soc,
        last_calculated: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn scenario_5_planner_arithmetic() {
        let now = t(10, 0);
        let charge_end = t(20, 0);
        let result = plan(charge_end, 60.0, 95.0, 18.0, now);
        assert_eq!(result.planned_end, charge_end);
        let expected_start = charge_end - chrono::Duration::minutes(63);
        assert_eq!(result.planned_start, expected_start);
    }

    #[test]
    fn already_at_target_collapses_to_zero_duration() {
        let now = t(10, 0);
        let charge_end = t(20, 0);
        let result = plan(charge_end, 95.0, 95.0, 18.0, now);
        assert_eq!(result.planned_start, result.planned_end);
    }

    #[test]
    fn above_target_also_collapses() {
        let now = t(10, 0);
        let charge_end = t(20, 0);
        let result = plan(charge_end, 98.0, 95.0, 18.0, now);
        assert_eq!(result.planned_start, charge_end);
    }
}
