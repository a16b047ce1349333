pub mod control_loop;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{AppConfig, HardwareMode};
use crate::consumption_store::ConsumptionStore;
use crate::domain::{
    ChargeMode, ChargingPlan, ControlDecision, PriceSample, PvForecast,
};
use crate::explainer;
use crate::inverter_auth::InverterAuthClient;
use crate::log_ring::LogRing;
use crate::optimizer;
use crate::planner;
use crate::record;
use crate::setpoint::{SetpointWriter, SimulatedSetpointWriter};
use crate::telemetry_source::{EntityBindings, TelemetrySource};

#[cfg(feature = "modbus")]
use crate::setpoint::ModbusSetpointWriter;

#[derive(Debug, thiserror::Error)]
pub enum AdjustPowerError {
    #[error("adjust_power is only honored while the battery is charging")]
    NotCharging,
    #[error("setpoint write failed: {0}")]
    Hardware(anyhow::Error),
}

/// Everything the control loop mutates between ticks, held behind one lock
/// so a status read always sees a consistent snapshot (§5).
struct SharedState {
    battery: Option<crate::domain::BatteryState>,
    prices: Vec<PriceSample>,
    pv_forecast: PvForecast,
    plan: Option<ChargingPlan>,
    mode: ChargeMode,
    automation_enabled: bool,
    last_decision: Option<ControlDecision>,
    last_consumption_hour: Option<DateTime<FixedOffset>>,
}

/// Shared application state: the 8 scheduling components wired together,
/// cloneable (every field is an `Arc`) so axum handlers and the background
/// tick loop can both hold a handle.
#[derive(Clone)]
pub struct AppState {
    pub cfg: AppConfig,
    telemetry_source: Arc<TelemetrySource>,
    inverter_auth: Arc<InverterAuthClient>,
    setpoint_writer: Arc<dyn SetpointWriter>,
    consumption_store: Arc<ConsumptionStore>,
    pub log_ring: Arc<LogRing>,
    shared: Arc<RwLock<SharedState>>,
}

impl AppState {
    pub async fn new(cfg: AppConfig) -> Result<Self> {
        let bindings = EntityBindings {
            battery_soc_sensor: cfg.entities.battery_soc_sensor.clone(),
            battery_power_sensor: cfg.entities.battery_power_sensor.clone(),
            battery_voltage_sensor: cfg.entities.battery_voltage_sensor.clone(),
            price_sensor: cfg.entities.tibber_price_sensor.clone(),
            price_level_sensor: cfg.entities.tibber_price_level_sensor.clone().unwrap_or_default(),
            pv_power_now: cfg.entities.pv_power_now.clone(),
            pv_remaining_today: cfg.entities.pv_remaining_today.clone(),
            pv_production_tomorrow: cfg.entities.pv_production_tomorrow.clone(),
            home_consumption_sensor: cfg.entities.home_consumption_sensor.clone(),
        };
        let telemetry_source = Arc::new(TelemetrySource::new(
            cfg.telemetry_source.base_url.clone(),
            cfg.telemetry_source.token.clone(),
            bindings,
        ));

        let session_file = cfg.data_dir.join("inverter_session.json");
        let inverter_auth = Arc::new(InverterAuthClient::new(
            format!("http://{}:{}", cfg.inverter.ip, cfg.inverter.port),
            cfg.inverter.username.clone(),
            cfg.inverter.installer_password.clone(),
            cfg.inverter.master_password.clone(),
            session_file,
        ));
        if inverter_auth.load_cached_session().await.is_none() {
            info!("no cached inverter session, will authenticate on first charge command");
        }

        let setpoint_writer: Arc<dyn SetpointWriter> = match cfg.hardware.mode {
            HardwareMode::Simulated => Arc::new(SimulatedSetpointWriter::new()),
            #[cfg(feature = "modbus")]
            HardwareMode::Modbus => Arc::new(
                ModbusSetpointWriter::connect(&cfg.inverter.ip, cfg.inverter.modbus_unit_id)
                    .await
                    .context("failed to connect to inverter field bus")?,
            ),
            #[cfg(not(feature = "modbus"))]
            HardwareMode::Modbus => {
                anyhow::bail!("hardware.mode = modbus requires the `modbus` feature")
            }
        };

        let db_path = cfg.data_dir.join("consumption.db");
        let consumption_store = Arc::new(
            ConsumptionStore::open(
                &db_path,
                cfg.consumption.learning_days,
                cfg.consumption.default_hourly_fallback_kwh,
                cfg.consumption.average_daily_consumption_kwh,
            )
            .await
            .context("failed to open consumption store")?,
        );

        let shared = Arc::new(RwLock::new(SharedState {
            battery: None,
            prices: Vec::new(),
            pv_forecast: PvForecast::default(),
            plan: None,
            mode: ChargeMode::Internal,
            automation_enabled: cfg.planner.auto_optimization_enabled,
            last_decision: None,
            last_consumption_hour: None,
        }));

        Ok(Self {
            cfg,
            telemetry_source,
            inverter_auth,
            setpoint_writer,
            consumption_store,
            log_ring: Arc::new(LogRing::new()),
            shared,
        })
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().fixed_offset()
    }

    /// One pass of the §4.3 per-tick sequence.
    pub async fn tick(&self) -> Result<()> {
        let now = self.now();

        match self.telemetry_source.read_battery(now).await {
            Ok(battery) => self.shared.write().await.battery = Some(battery),
            Err(e) => warn!(error = %e, "battery telemetry read failed, keeping last known state"),
        }

        match self.telemetry_source.read_prices().await {
            Ok(prices) => self.shared.write().await.prices = prices,
            Err(e) => warn!(error = %e, "price telemetry read failed"),
        }

        match self.telemetry_source.read_pv_forecast().await {
            Ok(forecast) => self.shared.write().await.pv_forecast = forecast,
            Err(e) => warn!(error = %e, "pv forecast read failed"),
        }

        self.maybe_refresh_plan(now).await;
        self.maybe_record_consumption(now).await;

        let decision = self.evaluate_decision(now).await;
        self.drive_state_machine(decision).await?;

        Ok(())
    }

    async fn maybe_refresh_plan(&self, now: DateTime<FixedOffset>) {
        let needs_refresh = {
            let guard = self.shared.read().await;
            match &guard.plan {
                None => true,
                Some(plan) => plan.is_due_for_refresh(
                    now,
                    chrono::Duration::minutes(self.cfg.planner.plan_refresh_minutes),
                ),
            }
        };
        if !needs_refresh {
            return;
        }

        let (prices, soc) = {
            let guard = self.shared.read().await;
            (guard.prices.clone(), guard.battery.map(|b| b.soc_percent))
        };
        let Some(current_soc) = soc else { return };

        let Some(charge_end) = optimizer::find_optimal_charge_end(
            &prices,
            now,
            self.cfg.planner.price_threshold_1h,
            self.cfg.planner.price_threshold_3h,
        ) else {
            // leave the previous plan intact, only bump lastCalculated's absence is fine
            return;
        };

        let new_plan = planner::plan(
            charge_end,
            current_soc,
            self.cfg.planner.auto_charge_below_soc,
            self.cfg.planner.charge_duration_per_10_percent_minutes,
            now,
        );
        record!(self.log_ring, info, "recalculated charging plan: start={} end={}", new_plan.planned_start, new_plan.planned_end);
        self.shared.write().await.plan = Some(new_plan);
    }

    async fn maybe_record_consumption(&self, now: DateTime<FixedOffset>) {
        let due = {
            let guard = self.shared.read().await;
            guard
                .last_consumption_hour
                .map(|last| last.hour() != now.hour() || last.date_naive() != now.date_naive())
                .unwrap_or(true)
        };
        if !due {
            return;
        }
        match self.telemetry_source.read_home_consumption_kwh().await {
            Ok(kwh) => {
                if let Err(e) = self.consumption_store.record_consumption(now, kwh).await {
                    warn!(error = %e, "failed to record consumption sample");
                } else {
                    self.shared.write().await.last_consumption_hour = Some(now);
                }
            }
            Err(e) => warn!(error = %e, "consumption telemetry read failed"),
        }
    }

    async fn evaluate_decision(&self, now: DateTime<FixedOffset>) -> ControlDecision {
        let guard = self.shared.read().await;
        let current_soc = guard.battery.map(|b| b.soc_percent).unwrap_or(0.0);
        control_loop::evaluate(
            guard.mode,
            now,
            current_soc,
            self.cfg.planner.auto_safety_soc,
            self.cfg.planner.auto_charge_below_soc,
            guard.pv_forecast.remaining_today_kwh,
            self.cfg.planner.auto_pv_threshold_kwh,
            guard.plan.as_ref(),
        )
    }

    /// Apply a decision to the state machine, issuing `setExternalControl`
    /// before a nonzero setpoint on entry, and clearing the setpoint before
    /// returning control on exit (§4.3 step 5's ordering guarantee).
    async fn drive_state_machine(&self, decision: ControlDecision) -> Result<()> {
        let (current_mode, automation_enabled) = {
            let guard = self.shared.read().await;
            (guard.mode, guard.automation_enabled)
        };
        let next = control_loop::next_mode(current_mode, &decision, automation_enabled);

        if next != current_mode {
            match (current_mode, next) {
                (ChargeMode::Internal, ChargeMode::AutoCharging) => {
                    self.enter_auto_charging().await?;
                }
                (ChargeMode::AutoCharging, ChargeMode::Internal) => {
                    self.exit_auto_charging().await?;
                }
                _ => {}
            }
            self.shared.write().await.mode = next;
        }

        self.shared.write().await.last_decision = Some(decision);
        Ok(())
    }

    async fn enter_auto_charging(&self) -> Result<()> {
        if let Err(e) = self.ensure_authenticated().await {
            warn!(error = %e, "could not authenticate with inverter, staying internal");
            return Ok(());
        }
        if let Err(e) = self.inverter_auth.set_external_control(true).await {
            warn!(error = %e, "failed to enable external control");
            return Ok(());
        }
        let setpoint = -(self.cfg.planner.max_charge_power_w as i32);
        match self.setpoint_writer.write_battery_power(setpoint).await {
            Ok(true) => record!(self.log_ring, info, "entered auto-charging at {}W", setpoint),
            _ => warn!("setpoint write failed on entry to auto-charging"),
        }
        Ok(())
    }

    async fn exit_auto_charging(&self) -> Result<()> {
        let _ = self.setpoint_writer.write_battery_power(0).await;
        if let Err(e) = self.inverter_auth.set_external_control(false).await {
            warn!(error = %e, "failed to disable external control");
        }
        record!(self.log_ring, info, "exited auto-charging");
        Ok(())
    }

    async fn ensure_authenticated(&self) -> Result<()> {
        if self.inverter_auth.verify().await.unwrap_or(false) {
            return Ok(());
        }
        self.inverter_auth
            .login()
            .await
            .context("inverter authentication handshake failed")
    }

    // -- Operator-facing API surface (§6) --

    pub async fn status(&self) -> crate::domain::StatusReport {
        let guard = self.shared.read().await;
        let current_soc = guard.battery.map(|b| b.soc_percent).unwrap_or(0.0);
        let decision = guard.last_decision.unwrap_or(ControlDecision {
            should_charge: false,
            reason: crate::domain::ChargeReason::Waiting,
        });
        explainer::explain(
            decision,
            guard.mode,
            current_soc,
            self.cfg.planner.auto_safety_soc,
            self.cfg.planner.auto_charge_below_soc,
            guard.pv_forecast.remaining_today_kwh,
            self.cfg.planner.auto_pv_threshold_kwh,
            guard.plan.as_ref().map(|p| p.planned_start),
            guard.plan.as_ref().map(|p| p.planned_end),
            guard.plan.as_ref().map(|p| p.target_soc_percent),
        )
    }

    pub async fn charging_plan(&self) -> Option<ChargingPlan> {
        self.shared.read().await.plan.clone()
    }

    pub async fn recalculate_plan(&self) {
        let now = self.now();
        self.shared.write().await.plan = None;
        self.maybe_refresh_plan(now).await;
    }

    pub async fn start_charging(&self) -> Result<()> {
        self.ensure_authenticated().await?;
        self.inverter_auth.set_external_control(true).await?;
        let setpoint = -(self.cfg.planner.max_charge_power_w as i32);
        self.setpoint_writer.write_battery_power(setpoint).await?;
        self.shared.write().await.mode = ChargeMode::ManualCharging;
        record!(self.log_ring, info, "manual charging started by operator");
        Ok(())
    }

    pub async fn stop_charging(&self) -> Result<()> {
        self.setpoint_writer.write_battery_power(0).await?;
        self.inverter_auth.set_external_control(false).await?;
        self.shared.write().await.mode = ChargeMode::Internal;
        record!(self.log_ring, info, "manual charging stopped by operator");
        Ok(())
    }

    pub async fn toggle_automation(&self, enabled: bool) {
        self.shared.write().await.automation_enabled = enabled;
        record!(self.log_ring, info, "automation toggled: {}", enabled);
    }

    /// Honored only while the inverter is under external control (§6, §7):
    /// outside `AutoCharging`/`ManualCharging` there is no setpoint to adjust.
    pub async fn adjust_power(&self, watts: i32) -> Result<bool, AdjustPowerError> {
        let mode = self.shared.read().await.mode;
        if !matches!(mode, ChargeMode::AutoCharging | ChargeMode::ManualCharging) {
            return Err(AdjustPowerError::NotCharging);
        }
        self.setpoint_writer
            .write_battery_power(watts)
            .await
            .context("setpoint write failed")
            .map_err(AdjustPowerError::Hardware)
    }

    pub async fn test_connection(&self) -> bool {
        self.inverter_auth.test_connection().await.unwrap_or(false)
    }

    pub async fn consumption_statistics(&self) -> Result<crate::domain::ConsumptionStatistics> {
        self.consumption_store.statistics().await.context("statistics query failed")
    }

    pub async fn import_consumption_csv(&self, text: &str) -> Result<crate::domain::ImportReport> {
        self.consumption_store.import_from_csv(text).await.context("CSV import failed")
    }

    pub async fn add_manual_consumption(&self, profile: &BTreeMap<u32, f64>) -> Result<()> {
        let now = self.now();
        self.consumption_store.add_manual_profile(profile, now).await.context("manual profile seed failed")
    }

    pub async fn hourly_consumption_profile(&self) -> Result<BTreeMap<u32, f64>> {
        self.consumption_store.hourly_profile().await.context("profile query failed")
    }

    pub fn logs(&self) -> Vec<crate::log_ring::LogEntry> {
        self.log_ring.snapshot()
    }

    pub async fn ping_database(&self) -> Result<()> {
        self.consumption_store.ping().await.context("database ping failed")
    }
}

/// Spawn the periodic control-loop tick as a background task. A single tick
/// failure is logged and the loop continues -- a transient telemetry or
/// inverter hiccup should never bring the scheduler down.
pub fn spawn_controller_tasks(state: AppState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(state.cfg.planner.control_interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = state.tick().await {
                warn!(error = %e, "control loop tick failed");
            }
        }
    });
}
