use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Decides whether an attempt keyed by `key` (typically a client address) may proceed.
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    attempts: u32,
}

/// Allows `max_attempts` per key within a fixed window.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    max_attempts: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Three signups per address per hour.
    pub fn signup() -> Self {
        Self::new(3, Duration::from_secs(60 * 60))
    }

    /// Five logins per address per fifteen minutes.
    pub fn login() -> Self {
        Self::new(5, Duration::from_secs(15 * 60))
    }

    /// Forgets the key, e.g. after a successful action.
    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Window>> {
        self.windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut windows = self.lock();
        windows.retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            attempts: 0,
        });
        if window.attempts >= self.max_attempts {
            return false;
        }
        window.attempts += 1;
        true
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_max_attempts() {
        let limiter = FixedWindowLimiter::signup();
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.2"));
    }

    #[test]
    fn window_expiry_allows_again() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();
        assert!(limiter.check_at("k", start));
        assert!(!limiter.check_at("k", start + Duration::from_secs(5)));
        assert!(limiter.check_at("k", start + Duration::from_secs(10)));
    }

    #[test]
    fn expired_windows_are_evicted() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(10));
        let start = Instant::now();
        for key in ["a", "b", "c"] {
            assert!(limiter.check_at(key, start));
        }
        assert_eq!(limiter.lock().len(), 3);

        assert!(limiter.check_at("d", start + Duration::from_secs(10)));
        let windows = limiter.lock();
        assert_eq!(windows.len(), 1);
        assert!(windows.contains_key("d"));
    }

    #[test]
    fn reset_clears_attempts() {
        let limiter = FixedWindowLimiter::login();
        for _ in 0..5 {
            assert!(limiter.check("addr"));
        }
        assert!(!limiter.check("addr"));
        limiter.reset("addr");
        assert!(limiter.check("addr"));
    }

    #[test]
    fn usable_as_trait_object() {
        let limiter: Box<dyn RateLimiter> = Box::new(FixedWindowLimiter::new(0, Duration::from_secs(1)));
        assert!(!limiter.check("anyone"));
    }
}
