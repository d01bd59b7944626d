#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use rocket::tokio;
    use serde_json::Value;

    use crate::auth::Role;
    use crate::broadcast::{Broadcaster, CONNECTED_MESSAGE, StreamEvent};
    use crate::models::ProgressRecord;

    fn broadcaster() -> Broadcaster {
        Broadcaster::new(Duration::from_secs(3600), 16)
    }

    fn record(user_id: i64, video_id: i64) -> ProgressRecord {
        ProgressRecord {
            user_id,
            video_id,
            completed: true,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_greets_first() {
        let broadcaster = broadcaster();
        let mut handle = broadcaster.subscribe(1, Role::Student);

        match handle.recv().await {
            Some(StreamEvent::Connection { message, .. }) => {
                assert_eq!(message, CONNECTED_MESSAGE)
            }
            other => panic!("Expected connection event, got {:?}", other),
        }

        assert_eq!(broadcaster.connection_count(), 1);
        assert!(broadcaster.is_connected(&handle.id()));
    }

    #[tokio::test]
    async fn test_progress_fan_out_filtering() {
        let broadcaster = broadcaster();

        let mut subject = broadcaster.subscribe(1, Role::Student);
        let mut subject_second_tab = broadcaster.subscribe(1, Role::Student);
        let mut other = broadcaster.subscribe(2, Role::Student);
        let mut admin = broadcaster.subscribe(3, Role::Admin);

        for handle in [&mut subject, &mut subject_second_tab, &mut other, &mut admin] {
            handle.recv().await;
        }

        let delivered = broadcaster.broadcast(StreamEvent::progress_update(
            1,
            "alice",
            vec![record(1, 10)],
        ));
        assert_eq!(delivered, 3);

        for handle in [&mut subject, &mut subject_second_tab, &mut admin] {
            assert!(matches!(
                handle.recv().await,
                Some(StreamEvent::ProgressUpdate { user_id: 1, .. })
            ));
        }

        let leaked = tokio::time::timeout(Duration::from_millis(50), other.recv()).await;
        assert!(leaked.is_err(), "Other students must not receive the update");
    }

    #[tokio::test]
    async fn test_system_message_reaches_everyone() {
        let broadcaster = broadcaster();
        let mut a = broadcaster.subscribe(1, Role::Student);
        let mut b = broadcaster.subscribe(2, Role::Admin);
        a.recv().await;
        b.recv().await;

        assert_eq!(broadcaster.broadcast_system_message("maintenance", "Back soon"), 2);

        for handle in [&mut a, &mut b] {
            match handle.recv().await {
                Some(StreamEvent::SystemMessage {
                    message_type,
                    message,
                    ..
                }) => {
                    assert_eq!(message_type, "maintenance");
                    assert_eq!(message, "Back soon");
                }
                other => panic!("Expected system message, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_failed_write_evicts_only_that_channel() {
        // capacity 1: the unread greeting fills the stalled channel
        let broadcaster = Broadcaster::new(Duration::from_secs(3600), 1);

        let stalled = broadcaster.subscribe(1, Role::Student);
        let mut healthy = broadcaster.subscribe(1, Role::Student);
        healthy.recv().await;

        let delivered = broadcaster.broadcast(StreamEvent::progress_update(1, "alice", vec![]));

        assert_eq!(delivered, 1);
        assert!(!broadcaster.is_connected(&stalled.id()));
        assert!(broadcaster.is_connected(&healthy.id()));
        assert_eq!(broadcaster.connection_count(), 1);

        assert!(matches!(
            healthy.recv().await,
            Some(StreamEvent::ProgressUpdate { .. })
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_drop_unsubscribes() {
        let broadcaster = broadcaster();

        let first = broadcaster.subscribe(1, Role::Student);
        let id = first.id();
        assert!(broadcaster.unsubscribe(&id));
        assert!(!broadcaster.unsubscribe(&id));

        let second = broadcaster.subscribe(2, Role::Student);
        let second_id = second.id();
        assert!(broadcaster.is_connected(&second_id));
        drop(second);
        assert!(!broadcaster.is_connected(&second_id));

        drop(first);
        assert_eq!(broadcaster.connection_count(), 0);
        assert_eq!(broadcaster.broadcast_system_message("info", "nobody home"), 0);
    }

    #[tokio::test]
    async fn test_disconnect_user_closes_only_their_channels() {
        let broadcaster = broadcaster();
        let mut admin_a = broadcaster.subscribe(1, Role::Admin);
        let mut admin_b = broadcaster.subscribe(1, Role::Admin);
        let mut other = broadcaster.subscribe(2, Role::Admin);

        assert_eq!(broadcaster.disconnect_user(1), 2);
        assert_eq!(broadcaster.disconnect_user(1), 0);
        assert!(!broadcaster.is_connected(&admin_a.id()));
        assert!(broadcaster.is_connected(&other.id()));

        // queued greeting drains, then the stream ends
        for handle in [&mut admin_a, &mut admin_b] {
            assert!(matches!(handle.recv().await, Some(StreamEvent::Connection { .. })));
            assert!(handle.recv().await.is_none());
        }

        let delivered =
            broadcaster.broadcast(StreamEvent::progress_update(3, "carol", vec![record(3, 1)]));
        assert_eq!(delivered, 1);
        assert!(matches!(other.recv().await, Some(StreamEvent::Connection { .. })));
        assert!(matches!(other.recv().await, Some(StreamEvent::ProgressUpdate { .. })));
    }

    #[tokio::test]
    async fn test_heartbeat_is_periodic() {
        let broadcaster = Broadcaster::new(Duration::from_millis(30), 16);
        let mut handle = broadcaster.subscribe(1, Role::Student);
        handle.recv().await;

        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(2), handle.recv())
                .await
                .expect("Heartbeat did not arrive");
            assert!(matches!(event, Some(StreamEvent::Heartbeat { .. })));
        }
    }

    #[tokio::test]
    async fn test_heartbeat_failure_evicts() {
        let broadcaster = Broadcaster::new(Duration::from_millis(20), 1);
        let handle = broadcaster.subscribe(1, Role::Student);

        // greeting never read; the first heartbeat cannot be queued
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!broadcaster.is_connected(&handle.id()));
    }

    #[test]
    fn test_event_wire_format() {
        let event = StreamEvent::progress_update(7, "alice", vec![record(7, 3)]);
        let value: Value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "progress_update");
        assert_eq!(value["user_id"], 7);
        assert_eq!(value["username"], "alice");
        assert_eq!(value["updates"][0]["video_id"], 3);
        assert!(value["updates"][0].get("user_id").is_none());
        assert!(value["updated_at"].is_string());

        let heartbeat = serde_json::to_value(StreamEvent::Heartbeat {
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(heartbeat["type"], "heartbeat");

        let greeting = serde_json::to_value(StreamEvent::Connection {
            message: CONNECTED_MESSAGE.to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(greeting["type"], "connection");
        assert_eq!(greeting["message"], CONNECTED_MESSAGE);
    }
}
