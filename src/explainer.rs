//! Component H -- Status Explainer (§4.7).
//!
//! Pure rendering of the last committed control-loop snapshot into a
//! deterministic, structured explanation. Branch ordering mirrors the
//! control loop's own rule priority (safety > full > pv > planned > waiting).

use chrono::{DateTime, FixedOffset};

use crate::domain::{
    ChargeMode, ChargeReason, ConditionStatus, ControlDecision, StatusReport,
};

#[allow(clippy::too_many_arguments)]
pub fn explain(
    decision: ControlDecision,
    mode: ChargeMode,
    current_soc: f64,
    auto_safety_soc: f64,
    auto_charge_below_soc: f64,
    pv_remaining_today_kwh: f64,
    auto_pv_threshold: f64,
    planned_start: Option<DateTime<FixedOffset>>,
    planned_end: Option<DateTime<FixedOffset>>,
    target_soc: Option<f64>,
) -> StatusReport {
    let conditions = vec![
        (
            "soc_safe".to_string(),
            ConditionStatus {
                fulfilled: current_soc >= auto_safety_soc,
                label: format!("SoC {current_soc:.1}% is above the safety floor {auto_safety_soc:.1}%"),
                priority: 0,
            },
        ),
        (
            "below_charge_limit".to_string(),
            ConditionStatus {
                fulfilled: current_soc < auto_charge_below_soc,
                label: format!("SoC {current_soc:.1}% is below the charge target {auto_charge_below_soc:.1}%"),
                priority: 1,
            },
        ),
        (
            "pv_sufficient".to_string(),
            ConditionStatus {
                fulfilled: pv_remaining_today_kwh > auto_pv_threshold,
                label: format!(
                    "{pv_remaining_today_kwh:.1} kWh of PV remain today, above the {auto_pv_threshold:.1} kWh threshold"
                ),
                priority: 2,
            },
        ),
        (
            "has_plan".to_string(),
            ConditionStatus {
                fulfilled: planned_start.is_some(),
                label: match planned_start {
                    Some(_) => "a charging plan is active".to_string(),
                    None => "no charging plan is active".to_string(),
                },
                priority: 3,
            },
        ),
    ];

    let explanation = match decision.reason {
        ChargeReason::Safety => {
            format!("Charging to protect SoC: {current_soc:.1}% is below the safety floor {auto_safety_soc:.1}%")
        }
        ChargeReason::Full => {
            format!("Not charging: SoC {current_soc:.1}% has reached the charge target {auto_charge_below_soc:.1}%")
        }
        ChargeReason::PvSufficient => format!(
            "Not charging: {pv_remaining_today_kwh:.1} kWh of PV remain today, above the {auto_pv_threshold:.1} kWh threshold"
        ),
        ChargeReason::Planned => "Charging: the planned charge window has started".to_string(),
        ChargeReason::Waiting => "Not charging: waiting for the planned charge window".to_string(),
    };

    StatusReport {
        explanation,
        will_charge: decision.should_charge,
        mode,
        conditions,
        current_soc_percent: current_soc,
        target_soc_percent: target_soc,
        pv_remaining_today_kwh,
        planned_start: planned_start.map(|t| t.format("%H:%M").to_string()),
        planned_end: planned_end.map(|t| t.format("%H:%M").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChargeReason;

    #[test]
    fn explanation_mirrors_decision_reason() {
        let decision = ControlDecision {
            should_charge: true,
            reason: ChargeReason::Safety,
        };
        let report = explain(decision, ChargeMode::AutoCharging, 15.0, 20.0, 95.0, 20.0, 5.0, None, None, None);
        assert!(report.will_charge);
        assert!(report.explanation.contains("safety floor"));
        assert!(!report.conditions[0].1.fulfilled); // soc_safe is false at 15% < 20%
    }
}
