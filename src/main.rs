mod api;
mod auth;
mod config;
mod consumption_store;
mod controller;
mod domain;
mod explainer;
mod inverter_auth;
#[cfg(feature = "modbus")]
mod modbus;
mod log_ring;
mod optimizer;
mod planner;
mod setpoint;
mod telemetry;
mod telemetry_source;

use anyhow::Result;
use axum::Router;
use config::AppConfig;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = AppConfig::load()?;
    let app_state = controller::AppState::new(cfg.clone()).await?;

    let mut app: Router = api::router(app_state.clone(), &cfg);

    #[cfg(feature = "swagger")]
    {
        app = api::with_swagger(app);
    }

    #[cfg(feature = "metrics")]
    {
        app = api::with_metrics(app);
    }

    let addr = cfg.server.socket_addr()?;
    info!(%addr, "starting open-battery-controller");

    controller::spawn_controller_tasks(app_state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
