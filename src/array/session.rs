//! Session token cache
//!
//! The array issues an `x-auth-token` per login. Tokens are cached per
//! process with a TTL; a cached token created under a different PID is
//! discarded, because request workers fork and a session bound to the
//! parent is not safe to reuse in the child.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Default session lifetime before a fresh login
const SESSION_TTL: Duration = Duration::from_secs(25 * 60);

#[derive(Debug, Clone)]
struct Session {
    token: String,
    created: Instant,
    pid: u32,
}

/// Process-local cache of the current session token
#[derive(Debug, Default)]
pub struct SessionCache {
    inner: Mutex<Option<Session>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently valid token, if any
    pub fn token(&self) -> Option<String> {
        let guard = self.inner.lock();
        let session = guard.as_ref()?;
        if session.pid != std::process::id() {
            return None;
        }
        if session.created.elapsed() >= SESSION_TTL {
            return None;
        }
        Some(session.token.clone())
    }

    /// Store a freshly obtained token
    pub fn store(&self, token: String) {
        *self.inner.lock() = Some(Session {
            token,
            created: Instant::now(),
            pid: std::process::id(),
        });
    }

    /// Drop the cached token (after a 401)
    pub fn invalidate(&self) {
        *self.inner.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_fetch() {
        let cache = SessionCache::new();
        assert!(cache.token().is_none());
        cache.store("tok-1".into());
        assert_eq!(cache.token().as_deref(), Some("tok-1"));
    }

    #[test]
    fn test_invalidate() {
        let cache = SessionCache::new();
        cache.store("tok-1".into());
        cache.invalidate();
        assert!(cache.token().is_none());
    }

    #[test]
    fn test_foreign_pid_discarded() {
        let cache = SessionCache::new();
        cache.store("tok-1".into());
        {
            let mut guard = cache.inner.lock();
            guard.as_mut().unwrap().pid ^= 1;
        }
        assert!(cache.token().is_none());
    }

    #[test]
    fn test_expired_session_discarded() {
        let cache = SessionCache::new();
        cache.store("tok-1".into());
        {
            let mut guard = cache.inner.lock();
            guard.as_mut().unwrap().created = Instant::now() - SESSION_TTL;
        }
        assert!(cache.token().is_none());
    }
}
