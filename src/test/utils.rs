#[cfg(test)]
pub mod test_utils {
    use std::collections::HashMap;
    use std::sync::Once;
    use std::time::Duration;

    use rocket::http::{ContentType, Header, Status};
    use rocket::local::asynchronous::{Client, LocalRequest};
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};

    use crate::api::LoginResponse;
    use crate::auth::{AuthService, Role, SessionContext, hash_password};
    use crate::broadcast::Broadcaster;
    use crate::config::AppConfig;
    use crate::db::{create_user, create_video, set_video_deleted};
    use crate::error::AppError;
    use crate::init_rocket;
    use crate::progress::ProgressLedger;
    use crate::rate_limit::RateLimiter;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    /// Cheapest bcrypt cost; hashing speed is irrelevant in tests.
    pub const TEST_BCRYPT_COST: u32 = 4;

    pub fn test_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            bcrypt_cost: TEST_BCRYPT_COST,
            heartbeat_interval: Duration::from_secs(3600),
            expose_error_details: false,
            ..AppConfig::default()
        }
    }

    pub fn init_test_tracing() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
                )
                .with_test_writer()
                .try_init();
        });
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        videos: Vec<TestVideo>,
    }

    pub struct TestUser {
        pub username: String,
        pub display_name: Option<String>,
        pub role: Role,
        pub password: String,
    }

    pub struct TestVideo {
        pub title: String,
        pub folder: String,
        pub deleted: bool,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn student(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Student,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn admin(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Admin,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn user_with_password(
            mut self,
            username: &str,
            display_name: Option<&str>,
            role: Role,
            password: &str,
        ) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role,
                password: password.to_string(),
            });
            self
        }

        pub fn video(mut self, title: &str, folder: &str) -> Self {
            self.videos.push(TestVideo {
                title: title.to_string(),
                folder: folder.to_string(),
                deleted: false,
            });
            self
        }

        pub fn deleted_video(mut self, title: &str, folder: &str) -> Self {
            self.videos.push(TestVideo {
                title: title.to_string(),
                folder: folder.to_string(),
                deleted: true,
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            init_test_tracing();

            // One connection that never recycles, or the in-memory database vanishes.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut video_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let hash = hash_password(user.password.clone(), TEST_BCRYPT_COST).await?;
                let user_id = create_user(
                    &pool,
                    &user.username,
                    &hash,
                    user.role,
                    user.display_name.as_deref(),
                )
                .await?;

                user_id_map.insert(user.username.clone(), user_id);
            }

            let mut positions: HashMap<String, i64> = HashMap::new();
            for video in &self.videos {
                let position = positions.entry(video.folder.clone()).or_insert(0);
                *position += 1;

                let video_id = create_video(&pool, &video.title, &video.folder, *position).await?;
                if video.deleted {
                    set_video_deleted(&pool, video_id, true).await?;
                }

                video_id_map.insert(video.title.clone(), video_id);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                video_id_map,
            })
        }
    }

    #[derive(Clone)]
    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub video_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> i64 {
            self.user_id_map[username]
        }

        pub fn video_id(&self, title: &str) -> i64 {
            self.video_id_map[title]
        }

        pub fn context(&self, username: &str, role: Role) -> SessionContext {
            SessionContext {
                user_id: self.user_id(username),
                username: username.to_string(),
                display_name: username.to_string(),
                role,
            }
        }

        pub fn auth_service(&self) -> AuthService {
            AuthService::new(self.pool.clone(), &test_config())
        }

        pub fn ledger(&self, max_requests: usize) -> (ProgressLedger, Broadcaster) {
            let config = test_config();
            let broadcaster = Broadcaster::from_config(&config);
            let limiter = RateLimiter::new(config.rate_limit_window, max_requests);
            (
                ProgressLedger::new(self.pool.clone(), limiter, broadcaster.clone()),
                broadcaster,
            )
        }

        pub async fn progress_rows(&self, username: &str) -> i64 {
            sqlx::query_scalar("SELECT COUNT(*) FROM progress WHERE user_id = ?")
                .bind(self.user_id(username))
                .fetch_one(&self.pool)
                .await
                .expect("Failed to count progress rows")
        }

        pub async fn audit_rows(&self, username: &str) -> i64 {
            sqlx::query_scalar("SELECT COUNT(*) FROM progress_audit WHERE subject_id = ?")
                .bind(self.user_id(username))
                .fetch_one(&self.pool)
                .await
                .expect("Failed to count audit rows")
        }
    }

    /// Two students, one admin. "Basics" has five live videos and one retired
    /// one, "Advanced" has two.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .student("alice", Some("Alice Student"))
            .student("bob", Some("Bob Student"))
            .admin("admin", Some("Admin User"))
            .video("Basics 1", "Basics")
            .video("Basics 2", "Basics")
            .video("Basics 3", "Basics")
            .video("Basics 4", "Basics")
            .video("Basics 5", "Basics")
            .deleted_video("Basics Retired", "Basics")
            .video("Advanced 1", "Advanced")
            .video("Advanced 2", "Advanced")
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        setup_test_client_with(test_db, test_config()).await
    }

    pub async fn setup_test_client_with(test_db: TestDb, config: AppConfig) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone(), config).await;
        let client = Client::untracked(rocket)
            .await
            .expect("Failed to build rocket client");
        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, username: &str, password: &str) -> LoginResponse {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": password
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok, "Login failed for {}", username);

        response
            .into_json::<LoginResponse>()
            .await
            .expect("Failed to parse login response")
    }

    pub async fn login_token(client: &Client, username: &str) -> String {
        login_test_user(client, username, STANDARD_PASSWORD)
            .await
            .session_token
    }

    pub fn bearer<'c>(request: LocalRequest<'c>, token: &str) -> LocalRequest<'c> {
        request.header(Header::new("Authorization", format!("Bearer {}", token)))
    }
}
