//! Liveness tokens for watched handlers
//!
//! A watched handler exposes a token tied to some external lifetime (an
//! upstream session, a parent task). The worker polls the token each loop
//! iteration; when the guard on the other side drops, the token reads dead
//! and the worker closes the handler's connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Create a linked guard/token pair
///
/// The guard is held by whatever owns the external lifetime; the token is
/// handed to the worker for observation. Dropping (or killing) the guard
/// marks every clone of the token dead.
pub fn liveness() -> (LivenessGuard, LivenessToken) {
    let alive = Arc::new(AtomicBool::new(true));
    (
        LivenessGuard {
            alive: Arc::clone(&alive),
        },
        LivenessToken { alive },
    )
}

/// Observer half: checked by the worker
#[derive(Clone)]
pub struct LivenessToken {
    alive: Arc<AtomicBool>,
}

impl LivenessToken {
    /// Check whether the guarded lifetime is still alive
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Check whether the guarded lifetime has ended
    #[inline]
    pub fn is_dead(&self) -> bool {
        !self.is_alive()
    }
}

impl std::fmt::Debug for LivenessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessToken")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Owner half: its drop marks the token dead
pub struct LivenessGuard {
    alive: Arc<AtomicBool>,
}

impl LivenessGuard {
    /// Mark the lifetime ended without dropping the guard
    pub fn kill(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// A fresh token observing this guard
    pub fn token(&self) -> LivenessToken {
        LivenessToken {
            alive: Arc::clone(&self.alive),
        }
    }
}

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alive_until_drop() {
        let (guard, token) = liveness();
        assert!(token.is_alive());
        drop(guard);
        assert!(token.is_dead());
    }

    #[test]
    fn test_explicit_kill() {
        let (guard, token) = liveness();
        guard.kill();
        assert!(token.is_dead());
    }

    #[test]
    fn test_clones_share_state() {
        let (guard, token) = liveness();
        let token2 = token.clone();
        let token3 = guard.token();
        drop(guard);
        assert!(token.is_dead());
        assert!(token2.is_dead());
        assert!(token3.is_dead());
    }
}
