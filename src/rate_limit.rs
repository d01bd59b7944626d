use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::AppError;

/// Rolling-window limiter keyed by actor id.
///
/// Only admitted batches count against the window, so a rejected caller does
/// not extend its own lockout by retrying.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    hits: Mutex<HashMap<i64, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, actor_id: i64) -> Result<(), AppError> {
        self.check_at(actor_id, Instant::now())
    }

    pub fn check_at(&self, actor_id: i64, now: Instant) -> Result<(), AppError> {
        let mut hits = self.hits.lock();

        // Actors whose newest hit has aged out hold no state.
        hits.retain(|_, queue| {
            queue
                .back()
                .is_some_and(|newest| now.duration_since(*newest) < self.window)
        });

        let entry = hits.entry(actor_id).or_default();

        while let Some(oldest) = entry.front() {
            if now.duration_since(*oldest) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= self.max_requests {
            let retry_after = entry
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);

            tracing::warn!(actor_id = actor_id, "Progress update rate limit exceeded");
            return Err(AppError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        entry.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_after_threshold_within_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at(1, start).is_ok());
        }

        match limiter.check_at(1, start + Duration::from_secs(10)) {
            Err(AppError::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 50);
            }
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_window_rolls_forward() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let start = Instant::now();

        limiter.check_at(7, start).unwrap();
        limiter.check_at(7, start + Duration::from_secs(30)).unwrap();
        assert!(limiter.check_at(7, start + Duration::from_secs(59)).is_err());

        // first hit has aged out
        assert!(limiter.check_at(7, start + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_actors_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let now = Instant::now();

        limiter.check_at(1, now).unwrap();
        assert!(limiter.check_at(1, now).is_err());
        assert!(limiter.check_at(2, now).is_ok());
    }

    #[test]
    fn test_idle_actors_are_forgotten() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 5);
        let start = Instant::now();

        for actor in 1..=100 {
            limiter.check_at(actor, start).unwrap();
        }
        assert_eq!(limiter.hits.lock().len(), 100);

        limiter.check_at(500, start + Duration::from_secs(60)).unwrap();
        assert_eq!(limiter.hits.lock().len(), 1);
        assert!(limiter.hits.lock().contains_key(&500));
    }
}
