#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::auth::{
        Role, SessionContext, SessionState, UserSession, hash_password, require_role,
        require_self_or_admin, verify_password,
    };
    use crate::error::AppError;
    use crate::test::test_utils::TEST_BCRYPT_COST;

    fn ctx(username: &str, role: Role) -> SessionContext {
        SessionContext {
            user_id: 1,
            username: username.to_string(),
            display_name: username.to_string(),
            role,
        }
    }

    #[test]
    fn test_require_role() {
        assert!(require_role(&ctx("admin", Role::Admin), Role::Admin).is_ok());

        match require_role(&ctx("alice", Role::Student), Role::Admin) {
            Err(AppError::Forbidden(_)) => {}
            other => panic!("Expected Forbidden, got {:?}", other),
        }
    }

    #[test]
    fn test_require_self_or_admin() {
        assert!(require_self_or_admin(&ctx("alice", Role::Student), "alice").is_ok());
        assert!(require_self_or_admin(&ctx("admin", Role::Admin), "alice").is_ok());

        let err = require_self_or_admin(&ctx("alice", Role::Student), "bob").unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        // usernames are case-sensitive
        assert!(require_self_or_admin(&ctx("alice", Role::Student), "Alice").is_err());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("student".parse::<Role>().unwrap(), Role::Student);
        assert!("coach".parse::<Role>().is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
        assert_eq!(serde_json::to_string(&Role::Student).unwrap(), "\"student\"");
    }

    #[test]
    fn test_generated_tokens_are_url_safe_and_unique() {
        let tokens: Vec<String> = (0..50).map(|_| UserSession::generate_token()).collect();

        for token in &tokens {
            assert!(
                token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "Token {} is not base64url",
                token
            );
        }

        let unique: std::collections::HashSet<_> = tokens.iter().collect();
        assert_eq!(unique.len(), tokens.len());
    }

    #[test]
    fn test_session_state_boundary() {
        let now = Utc::now().naive_utc();
        let session = UserSession {
            id: 1,
            user_id: 1,
            token: "t".to_string(),
            created_at: now - Duration::days(7),
            expires_at: now,
            last_accessed_at: now - Duration::days(1),
        };

        assert_eq!(session.state_at(now - Duration::seconds(1)), SessionState::Active);
        // expiry is inclusive
        assert_eq!(session.state_at(now), SessionState::Expired);
        assert_eq!(session.state_at(now + Duration::days(1)), SessionState::Expired);
    }

    #[rocket::async_test]
    async fn test_password_hash_roundtrip() {
        let hash = hash_password("secret".to_string(), TEST_BCRYPT_COST)
            .await
            .unwrap();

        assert_ne!(hash, "secret");
        assert!(verify_password("secret".to_string(), hash.clone()).await.unwrap());
        assert!(!verify_password("other".to_string(), hash).await.unwrap());
    }

    #[rocket::async_test]
    async fn test_malformed_hash_is_a_mismatch() {
        let result = verify_password("secret".to_string(), "not-a-hash".to_string()).await;
        assert!(!result.unwrap());
    }
}
