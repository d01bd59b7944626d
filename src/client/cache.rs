use std::sync::{Arc, Weak};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rocket::tokio::{self, task::JoinHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::LoginResponse;
use crate::auth::Role;

use super::{AuthProbe, Clock, ProbeError, SessionStorage, StorageError};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_inactivity: Duration,
    pub max_session_duration: Duration,
    pub refresh_threshold: Duration,
    pub check_period: std::time::Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_inactivity: Duration::minutes(30),
            max_session_duration: Duration::days(7),
            refresh_threshold: Duration::hours(1),
            check_period: std::time::Duration::from_secs(60),
        }
    }
}

/// The locally cached record. Stored as base64 JSON, which is an encoding
/// and nothing more: anyone with access to the storage can read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub name: String,
    pub completed_items: Vec<i64>,
    pub server_token: String,
    pub login_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remember_me: bool,
    pub session_id: String,
}

impl SessionData {
    pub fn encode(&self) -> Result<String, StorageError> {
        let json = serde_json::to_vec(self).map_err(|e| StorageError::Encode(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }

    pub fn decode(payload: &str) -> Result<Self, StorageError> {
        let json = STANDARD
            .decode(payload.trim())
            .map_err(|e| StorageError::Decode(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| StorageError::Decode(e.to_string()))
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>, max_inactivity: Duration) -> bool {
        now < self.expires_at && now - self.last_activity < max_inactivity
    }
}

/// Identity handed to `create_session`, typically straight from a login response.
#[derive(Debug, Clone)]
pub struct CachedUser {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub role: Role,
    pub completed_items: Vec<i64>,
    pub server_token: String,
}

impl From<LoginResponse> for CachedUser {
    fn from(login: LoginResponse) -> Self {
        Self {
            id: login.user.id,
            username: login.user.username,
            name: login.user.name,
            role: login.user.role,
            completed_items: login.completed_videos,
            server_token: login.session_token,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    PointerMove,
    PointerDown,
    KeyPress,
    Scroll,
    Touch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Created(SessionData),
    Updated(SessionData),
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// Transport trouble; the cached snapshot was left as it was.
    Stale,
    Cleared,
    NoSession,
}

pub struct SessionCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    durable: Arc<dyn SessionStorage>,
    volatile: Arc<dyn SessionStorage>,
    current: Mutex<Option<SessionData>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: Mutex<u64>,
}

impl SessionCache {
    pub fn new(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        durable: Arc<dyn SessionStorage>,
        volatile: Arc<dyn SessionStorage>,
    ) -> Self {
        Self {
            config,
            clock,
            durable,
            volatile,
            current: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            next_listener: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Replaces whatever was cached. Only the chosen storage ends up holding
    /// the record.
    pub fn create_session(
        &self,
        user: CachedUser,
        remember_me: bool,
    ) -> Result<SessionData, StorageError> {
        let now = self.clock.now();

        let session = SessionData {
            user_id: user.id,
            username: user.username,
            role: user.role,
            name: user.name,
            completed_items: user.completed_items,
            server_token: user.server_token,
            login_time: now,
            last_activity: now,
            expires_at: now + self.config.max_session_duration,
            remember_me,
            session_id: format!("session_{}", Uuid::new_v4().simple()),
        };

        self.clear_storage();
        self.store(&session)?;
        *self.current.lock() = Some(session.clone());

        info!(user_id = session.user_id, remember_me = remember_me, "Client session created");
        self.notify(&SessionEvent::Created(session.clone()));

        Ok(session)
    }

    pub fn current(&self) -> Option<SessionData> {
        self.current.lock().clone()
    }

    pub fn is_valid(&self) -> bool {
        let now = self.clock.now();
        self.current
            .lock()
            .as_ref()
            .map(|session| session.is_valid_at(now, self.config.max_inactivity))
            .unwrap_or(false)
    }

    pub fn time_until_expiry(&self) -> Duration {
        let now = self.clock.now();
        self.current
            .lock()
            .as_ref()
            .map(|session| (session.expires_at - now).max(Duration::zero()))
            .unwrap_or_else(Duration::zero)
    }

    pub fn time_until_inactive(&self) -> Duration {
        let now = self.clock.now();
        self.current
            .lock()
            .as_ref()
            .map(|session| {
                (self.config.max_inactivity - (now - session.last_activity)).max(Duration::zero())
            })
            .unwrap_or_else(Duration::zero)
    }

    /// Extends the inactivity window of a still-valid session. A session that
    /// has already lapsed is not revived; the next check clears it.
    pub fn record_activity(&self, signal: ActivitySignal) -> bool {
        let now = self.clock.now();

        let snapshot = {
            let mut current = self.current.lock();
            match current.as_mut() {
                Some(session) if session.is_valid_at(now, self.config.max_inactivity) => {
                    session.last_activity = now;
                    session.clone()
                }
                _ => return false,
            }
        };

        debug!(signal = ?signal, "Activity recorded");
        if let Err(e) = self.store(&snapshot) {
            warn!(error = %e, "Failed to persist activity timestamp");
        }
        true
    }

    /// Clears the session if it is no longer valid. Returns whether it did.
    pub fn check(&self) -> bool {
        let has_session = self.current.lock().is_some();
        if has_session && !self.is_valid() {
            info!("Client session lapsed");
            self.clear();
            return true;
        }
        false
    }

    /// Runs `check` every `check_period` until the cache is dropped.
    pub fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let period = self.config.check_period;
        let cache: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            loop {
                ticker.tick().await;

                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.check();
            }
        })
    }

    pub fn clear(&self) {
        self.current.lock().take();
        self.clear_storage();
        self.notify(&SessionEvent::Cleared);
    }

    /// Optimistic local update after the user changes progress.
    pub fn update_completed_items(&self, completed_items: Vec<i64>) -> Option<SessionData> {
        self.update(|session| session.completed_items = completed_items)
    }

    /// Re-validates with the server. Only an explicit rejection clears the
    /// cache; transport failures keep the stale snapshot.
    pub async fn refresh(&self, probe: &dyn AuthProbe) -> RefreshOutcome {
        let token = match self.current.lock().as_ref() {
            Some(session) => session.server_token.clone(),
            None => return RefreshOutcome::NoSession,
        };

        match probe.probe(&token).await {
            Ok(probed) => {
                let updated = self.update(|session| {
                    session.name = probed.name;
                    session.completed_items = probed.completed_items;
                });
                match updated {
                    Some(_) => RefreshOutcome::Refreshed,
                    None => RefreshOutcome::NoSession,
                }
            }
            Err(ProbeError::Rejected(reason)) => {
                warn!(reason = %reason, "Server rejected cached session");
                self.clear();
                RefreshOutcome::Cleared
            }
            Err(ProbeError::Unavailable(reason)) => {
                warn!(reason = %reason, "Session refresh failed, keeping cached snapshot");
                RefreshOutcome::Stale
            }
        }
    }

    /// Refreshes only when the absolute expiry is within the refresh threshold.
    pub async fn refresh_if_needed(&self, probe: &dyn AuthProbe) -> Option<RefreshOutcome> {
        let remaining = {
            let current = self.current.lock();
            let session = current.as_ref()?;
            session.expires_at - self.clock.now()
        };

        if remaining < self.config.refresh_threshold {
            Some(self.refresh(probe).await)
        } else {
            None
        }
    }

    /// Rehydrates from durable storage, falling back to volatile. Records
    /// that are undecodable or no longer valid are wiped.
    pub async fn restore(&self, probe: Option<&dyn AuthProbe>) -> Option<SessionData> {
        let payload = match self.load_payload() {
            Some(payload) => payload,
            None => return None,
        };

        let session = match SessionData::decode(&payload) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable cached session");
                self.clear();
                return None;
            }
        };

        if !session.is_valid_at(self.clock.now(), self.config.max_inactivity) {
            info!("Discarding lapsed cached session");
            self.clear();
            return None;
        }

        *self.current.lock() = Some(session.clone());
        self.notify(&SessionEvent::Created(session));

        if let Some(probe) = probe {
            self.refresh_if_needed(probe).await;
        }

        self.current()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.next_listener.lock();
            *next += 1;
            ListenerId(*next)
        };
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn update<F>(&self, apply: F) -> Option<SessionData>
    where
        F: FnOnce(&mut SessionData),
    {
        let now = self.clock.now();

        let snapshot = {
            let mut current = self.current.lock();
            let session = current.as_mut()?;
            apply(session);
            session.last_activity = now;
            session.clone()
        };

        if let Err(e) = self.store(&snapshot) {
            warn!(error = %e, "Failed to persist updated session");
        }
        self.notify(&SessionEvent::Updated(snapshot.clone()));
        Some(snapshot)
    }

    fn store(&self, session: &SessionData) -> Result<(), StorageError> {
        let payload = session.encode()?;
        if session.remember_me {
            self.durable.save(&payload)
        } else {
            self.volatile.save(&payload)
        }
    }

    fn load_payload(&self) -> Option<String> {
        for storage in [&self.durable, &self.volatile] {
            match storage.load() {
                Ok(Some(payload)) => return Some(payload),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to read cached session"),
            }
        }
        None
    }

    fn clear_storage(&self) {
        for storage in [&self.durable, &self.volatile] {
            if let Err(e) = storage.clear() {
                warn!(error = %e, "Failed to clear cached session");
            }
        }
    }

    // Listeners run outside every lock so they may call back into the cache.
    fn notify(&self, event: &SessionEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(event);
        }
    }
}
