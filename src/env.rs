use std::path::Path;

use tracing::{info, warn};

pub const PROFILE_VAR: &str = "APP_PROFILE";

pub fn is_production() -> bool {
    dotenvy::var(PROFILE_VAR).unwrap_or("development".to_string()) == "production"
}

pub fn load_environment() -> Result<(), dotenvy::Error> {
    let env_files = if is_production() {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), dotenvy::Error> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}
