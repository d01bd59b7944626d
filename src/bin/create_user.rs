use anyhow::{Context, bail};
use sqlx::sqlite::SqlitePoolOptions;

use course_progress::auth::{Role, hash_password};
use course_progress::config::AppConfig;
use course_progress::db::create_user;
use course_progress::env::load_environment;

const USAGE: &str = "Usage: create_user <username> <password> [student|admin] [display name]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_environment().context("Failed to load environment files")?;

    let mut args = std::env::args().skip(1);

    let (Some(username), Some(password)) = (args.next(), args.next()) else {
        bail!(USAGE);
    };

    let role: Role = match args.next() {
        Some(role) => role.parse().context(USAGE)?,
        None => Role::Student,
    };

    let display_name: Vec<String> = args.collect();
    let display_name = if display_name.is_empty() {
        None
    } else {
        Some(display_name.join(" "))
    };

    let config = AppConfig::from_env().context("Invalid configuration")?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open {}", config.database_url))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let hash = hash_password(password, config.bcrypt_cost).await?;

    let user_id = create_user(&pool, &username, &hash, role, display_name.as_deref()).await?;

    println!("Created {} '{}' with id {}", role, username, user_id);

    Ok(())
}
