//! Live progress notifications over long-lived subscriber channels.
//!
//! The registry is shared between request handlers (broadcasting), each
//! channel's heartbeat task and the transport's disconnect path. Every
//! mutation and every fan-out pass holds the same lock, so a channel is never
//! written to while it is being removed.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocket::tokio::{self, sync::mpsc, task::JoinHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::Role;
use crate::config::AppConfig;
use crate::models::ProgressRecord;

pub type ConnectionId = Uuid;

pub const CONNECTED_MESSAGE: &str = "Connected to progress updates";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Connection {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
    },
    ProgressUpdate {
        user_id: i64,
        username: String,
        updates: Vec<ProgressRecord>,
        updated_at: DateTime<Utc>,
    },
    SystemMessage {
        message_type: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn progress_update(user_id: i64, username: &str, updates: Vec<ProgressRecord>) -> Self {
        StreamEvent::ProgressUpdate {
            user_id,
            username: username.to_string(),
            updates,
            updated_at: Utc::now(),
        }
    }

    /// The user an event is about; `None` means every subscriber gets it.
    pub fn subject_id(&self) -> Option<i64> {
        match self {
            StreamEvent::ProgressUpdate { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }
}

struct Subscriber {
    user_id: i64,
    role: Role,
    sender: mpsc::Sender<StreamEvent>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Subscriber {
    fn wants(&self, subject: Option<i64>) -> bool {
        match subject {
            Some(subject) => self.user_id == subject || self.role == Role::Admin,
            None => true,
        }
    }

    fn stop(self) {
        if let Some(heartbeat) = self.heartbeat {
            heartbeat.abort();
        }
    }
}

struct Registry {
    subscribers: Mutex<HashMap<ConnectionId, Subscriber>>,
    heartbeat_interval: Duration,
    channel_capacity: usize,
}

impl Registry {
    fn remove(&self, id: &ConnectionId) -> bool {
        let removed = self.subscribers.lock().remove(id);
        match removed {
            Some(subscriber) => {
                subscriber.stop();
                true
            }
            None => false,
        }
    }

    /// Delivers to one channel, evicting it when the write fails.
    fn deliver_to(&self, id: &ConnectionId, event: StreamEvent) -> bool {
        let mut subscribers = self.subscribers.lock();

        let delivered = match subscribers.get(id) {
            Some(subscriber) => subscriber.sender.try_send(event).is_ok(),
            None => return false,
        };

        if !delivered {
            warn!(connection_id = %id, "Subscriber write failed, evicting");
            if let Some(subscriber) = subscribers.remove(id) {
                subscriber.stop();
            }
        }

        delivered
    }
}

/// Injected into handlers as managed state; clones share one registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(heartbeat_interval: Duration, channel_capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                heartbeat_interval,
                channel_capacity: channel_capacity.max(1),
            }),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.heartbeat_interval, config.channel_capacity)
    }

    /// Registers a channel and queues the `connection` greeting on it.
    pub fn subscribe(&self, user_id: i64, role: Role) -> ConnectionHandle {
        let (sender, receiver) = mpsc::channel(self.registry.channel_capacity);
        let id = Uuid::new_v4();

        let _ = sender.try_send(StreamEvent::Connection {
            message: CONNECTED_MESSAGE.to_string(),
            timestamp: Utc::now(),
        });

        self.registry.subscribers.lock().insert(
            id,
            Subscriber {
                user_id,
                role,
                sender,
                heartbeat: None,
            },
        );

        let heartbeat = spawn_heartbeat(Arc::downgrade(&self.registry), id);

        {
            let mut subscribers = self.registry.subscribers.lock();
            match subscribers.get_mut(&id) {
                Some(subscriber) => subscriber.heartbeat = Some(heartbeat),
                None => heartbeat.abort(),
            }
        }

        info!(connection_id = %id, user_id = user_id, role = %role, "Subscriber connected");

        ConnectionHandle {
            id,
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Idempotent.
    pub fn unsubscribe(&self, id: &ConnectionId) -> bool {
        let removed = self.registry.remove(id);
        if removed {
            info!(connection_id = %id, "Subscriber disconnected");
        }
        removed
    }

    /// Closes every channel owned by `user_id`. Events already queued are still
    /// readable; the stream ends after them.
    pub fn disconnect_user(&self, user_id: i64) -> usize {
        let removed: Vec<Subscriber> = {
            let mut subscribers = self.registry.subscribers.lock();
            let ids: Vec<ConnectionId> = subscribers
                .iter()
                .filter(|(_, subscriber)| subscriber.user_id == user_id)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| subscribers.remove(id)).collect()
        };

        let count = removed.len();
        for subscriber in removed {
            subscriber.stop();
        }

        if count > 0 {
            info!(user_id = user_id, closed = count, "Subscriber channels closed for user");
        }
        count
    }

    /// Fans out to the subject's channels and every admin channel. Returns the
    /// number of channels that accepted the event.
    pub fn broadcast(&self, event: StreamEvent) -> usize {
        let subject = event.subject_id();
        let mut subscribers = self.registry.subscribers.lock();

        let mut delivered = 0;
        let mut failed = Vec::new();

        for (id, subscriber) in subscribers.iter() {
            if !subscriber.wants(subject) {
                continue;
            }

            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(connection_id = %id, error = %err, "Broadcast write failed, evicting");
                    failed.push(*id);
                }
            }
        }

        for id in failed {
            if let Some(subscriber) = subscribers.remove(&id) {
                subscriber.stop();
            }
        }

        debug!(delivered = delivered, "Broadcast complete");
        delivered
    }

    pub fn broadcast_system_message(&self, message_type: &str, message: &str) -> usize {
        self.broadcast(StreamEvent::SystemMessage {
            message_type: message_type.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.registry.subscribers.lock().len()
    }

    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.registry.subscribers.lock().contains_key(id)
    }
}

fn spawn_heartbeat(registry: Weak<Registry>, id: ConnectionId) -> JoinHandle<()> {
    let period = match registry.upgrade() {
        Some(registry) => registry.heartbeat_interval,
        None => Duration::from_secs(30),
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            ticker.tick().await;

            let Some(registry) = registry.upgrade() else {
                break;
            };

            let heartbeat = StreamEvent::Heartbeat {
                timestamp: Utc::now(),
            };

            if !registry.deliver_to(&id, heartbeat) {
                break;
            }
        }
    })
}

/// Owned by the transport; dropping it unsubscribes the channel.
pub struct ConnectionHandle {
    id: ConnectionId,
    receiver: mpsc::Receiver<StreamEvent>,
    registry: Weak<Registry>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(&self.id) {
                debug!(connection_id = %self.id, "Subscriber handle dropped");
            }
        }
    }
}
