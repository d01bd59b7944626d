#[macro_use]
extern crate rocket;

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod db;
pub mod env;
pub mod error;
pub mod models;
pub mod progress;
pub mod rate_limit;
pub mod telemetry;
pub mod validation;
#[cfg(test)]
mod test;

use api::{
    api_admin_broadcast, api_admin_delete_user, api_get_progress, api_get_progress_audit,
    api_get_progress_summary, api_login, api_logout, api_session, api_sse_progress,
    api_update_progress, default_api, health,
};
use auth::{AuthService, forbidden_api, unauthorized_api, unavailable_api};
use broadcast::Broadcaster;
use config::AppConfig;
use progress::ProgressLedger;
use rate_limit::RateLimiter;
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use telemetry::TelemetryFairing;
use tracing::info;

/// Wires services into managed state. Background work (session sweeping) is
/// attached by the binary so tests stay free of timers.
pub async fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting course progress service");

    let auth = AuthService::new(pool.clone(), &config);
    let broadcaster = Broadcaster::from_config(&config);
    let limiter = RateLimiter::new(config.rate_limit_window, config.rate_limit_max_requests);
    let ledger = ProgressLedger::new(pool.clone(), limiter, broadcaster.clone());

    rocket::build()
        .manage(pool)
        .manage(config)
        .manage(auth)
        .manage(broadcaster)
        .manage(ledger)
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_session,
                api_update_progress,
                api_get_progress,
                api_get_progress_summary,
                api_get_progress_audit,
                api_sse_progress,
                api_admin_broadcast,
                api_admin_delete_user,
            ],
        )
        .register(
            "/api",
            catchers![unauthorized_api, forbidden_api, unavailable_api, default_api],
        )
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
}
