//! Component G -- Control Loop state machine (§4.3).
//!
//! The rule evaluation here is pure and side-effect-free; `mod.rs` drives it
//! against live telemetry and turns the resulting `ControlDecision` into
//! setpoint writes.

use chrono::{DateTime, FixedOffset};

use crate::domain::{ChargeMode, ChargeReason, ChargingPlan, ControlDecision};

/// Evaluate `shouldCharge` in the fixed rule-priority order: safety, full,
/// pv_sufficient, planned, waiting. `ManualCharging` skips straight to a
/// fixed advisory decision -- rule evaluation never drives setpoints while
/// an operator has taken manual control.
#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    mode: ChargeMode,
    now: DateTime<FixedOffset>,
    current_soc: f64,
    auto_safety_soc: f64,
    auto_charge_below_soc: f64,
    pv_remaining_today_kwh: f64,
    auto_pv_threshold_kwh: f64,
    plan: Option<&ChargingPlan>,
) -> ControlDecision {
    if mode == ChargeMode::ManualCharging {
        return ControlDecision {
            should_charge: true,
            reason: ChargeReason::Waiting,
        };
    }

    if current_soc < auto_safety_soc {
        return ControlDecision {
            should_charge: true,
            reason: ChargeReason::Safety,
        };
    }
    if current_soc >= auto_charge_below_soc {
        return ControlDecision {
            should_charge: false,
            reason: ChargeReason::Full,
        };
    }
    if pv_remaining_today_kwh > auto_pv_threshold_kwh {
        return ControlDecision {
            should_charge: false,
            reason: ChargeReason::PvSufficient,
        };
    }
    if let Some(plan) = plan {
        if plan.has_started(now) {
            return ControlDecision {
                should_charge: true,
                reason: ChargeReason::Planned,
            };
        }
    }
    ControlDecision {
        should_charge: false,
        reason: ChargeReason::Waiting,
    }
}

/// Next inverter mode given the current mode and a rule evaluation, per the
/// §4.3 transition table. Manual transitions are driven separately by
/// operator commands, not by this function.
pub fn next_mode(current: ChargeMode, decision: &ControlDecision, automation_enabled: bool) -> ChargeMode {
    match current {
        ChargeMode::ManualCharging => ChargeMode::ManualCharging,
        ChargeMode::Internal if decision.should_charge && automation_enabled => ChargeMode::AutoCharging,
        ChargeMode::AutoCharging if !decision.should_charge || !automation_enabled => ChargeMode::Internal,
        other => other,
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

    fn plan(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> ChargingPlan {
        ChargingPlan {
            planned_start: start,
            planned_end: end,
            target_soc_percent: 95.0,
            last_calculated: start,
        }
    }

    #[test]
    fn scenario_1_safety_overrides_everything_else() {
        let now = t(10, 0);
        let decision = evaluate(ChargeMode::Internal, now, 5.0, 20.0, 95.0, 50.0, 5.0, None);
        assert!(decision.should_charge);
        assert_eq!(decision.reason, ChargeReason::Safety);
    }

    #[test]
    fn scenario_2_pv_sufficient_suppresses_planned_charge() {
        let now = t(12, 0);
        let active_plan = plan(t(11, 0), t(18, 0));
        let decision = evaluate(
            ChargeMode::Internal,
            now,
            40.0,
            20.0,
            95.0,
            12.0,
            5.0,
            Some(&active_plan),
        );
        assert!(!decision.should_charge);
        assert_eq!(decision.reason, ChargeReason::PvSufficient);
    }

    #[test]
    fn scenario_3_planned_window_triggers_charging() {
        let now = t(18, 30);
        let active_plan = plan(t(18, 0), t(22, 0));
        let decision = evaluate(
            ChargeMode::Internal,
            now,
            40.0,
            20.0,
            95.0,
            1.0,
            5.0,
            Some(&active_plan),
        );
        assert!(decision.should_charge);
        assert_eq!(decision.reason, ChargeReason::Planned);
    }

    #[test]
    fn waiting_before_plan_starts() {
        let now = t(10, 0);
        let active_plan = plan(t(18, 0), t(22, 0));
        let decision = evaluate(
            ChargeMode::Internal,
            now,
            40.0,
            20.0,
            95.0,
            1.0,
            5.0,
            Some(&active_plan),
        );
        assert!(!decision.should_charge);
        assert_eq!(decision.reason, ChargeReason::Waiting);
    }

    #[test]
    fn scenario_6_manual_charging_ignores_rule_evaluation() {
        let now = t(10, 0);
        let decision = evaluate(ChargeMode::ManualCharging, now, 95.0, 20.0, 95.0, 50.0, 5.0, None);
        assert!(decision.should_charge);
        assert_eq!(next_mode(ChargeMode::ManualCharging, &decision, true), ChargeMode::ManualCharging);
    }

    #[test]
    fn automation_disabled_forces_internal() {
        let decision = ControlDecision {
            should_charge: true,
            reason: ChargeReason::Safety,
        };
        assert_eq!(next_mode(ChargeMode::Internal, &decision, false), ChargeMode::Internal);
        assert_eq!(next_mode(ChargeMode::AutoCharging, &decision, false), ChargeMode::Internal);
    }

    #[test]
    fn mode_transitions_follow_table() {
        let charge = ControlDecision {
            should_charge: true,
            reason: ChargeReason::Planned,
        };
        let idle = ControlDecision {
            should_charge: false,
            reason: ChargeReason::Waiting,
        };
        assert_eq!(next_mode(ChargeMode::Internal, &charge, true), ChargeMode::AutoCharging);
        assert_eq!(next_mode(ChargeMode::AutoCharging, &idle, true), ChargeMode::Internal);
        assert_eq!(next_mode(ChargeMode::AutoCharging, &charge, true), ChargeMode::AutoCharging);
    }
}
