use anyhow::Context;
use rocket::fairing::AdHoc;
use sqlx::sqlite::SqlitePoolOptions;
use thiserror::Error;
use tracing::{info, warn};

use course_progress::auth::AuthService;
use course_progress::config::AppConfig;
use course_progress::env::load_environment;
use course_progress::error::AppError;
use course_progress::init_rocket;
use course_progress::telemetry::{init_tracing, shutdown_telemetry};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("{0}")]
    Rocket(#[from] rocket::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let env_result = load_environment();
    init_tracing();

    if let Err(e) = env_result {
        warn!("Failed to load environment files: {}", e);
    }

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let sweep_interval = config.session_sweep_interval;

    let pool = SqlitePoolOptions::new()
        .connect(&config.database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(AppError::from)?;
    info!("Migrations completed successfully");

    let _rocket = init_rocket(pool, config)
        .await
        .attach(AdHoc::on_liftoff("Session sweeper", move |rocket| {
            Box::pin(async move {
                match rocket.state::<AuthService>() {
                    Some(auth) => {
                        auth.spawn_sweeper(sweep_interval);
                    }
                    None => warn!("Auth service missing; session sweeper not started"),
                }
            })
        }))
        .attach(AdHoc::on_shutdown("Telemetry", |_| {
            Box::pin(async {
                shutdown_telemetry();
            })
        }))
        .launch()
        .await?;

    Ok(())
}
