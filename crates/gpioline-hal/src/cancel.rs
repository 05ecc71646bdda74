//! Wake-up and cancellation primitives shared by lines, line sets and drivers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// One-shot cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token. Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Wake-up signal raised whenever an edge is queued or a wait must end.
///
/// Raising bumps a generation counter under the lock, so a waiter that read
/// the generation before checking its queues cannot miss a raise that
/// happens in between.
#[derive(Debug, Clone, Default)]
pub struct EdgeSignal {
    inner: Arc<(Mutex<u64>, Condvar)>,
}

impl EdgeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation
    pub fn generation(&self) -> u64 {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wake every waiter
    pub fn raise(&self) {
        let (lock, cvar) = &*self.inner;
        let mut generation = lock.lock().unwrap_or_else(|e| e.into_inner());
        *generation = generation.wrapping_add(1);
        cvar.notify_all();
    }

    /// Block until the generation moves past `seen` or `timeout` elapses.
    /// Returns `true` if the signal was raised.
    pub fn wait_past(&self, seen: u64, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now().checked_add(timeout);
        let mut generation = lock.lock().unwrap_or_else(|e| e.into_inner());
        while *generation == seen {
            let Some(deadline) = deadline else {
                generation = cvar.wait(generation).unwrap_or_else(|e| e.into_inner());
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            generation = cvar
                .wait_timeout(generation, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        true
    }

    /// Whether two handles refer to the same signal
    pub fn same_as(&self, other: &EdgeSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancel_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.clone().is_cancelled());
    }

    #[test]
    fn test_wait_past_times_out() {
        let signal = EdgeSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_past(signal.generation(), Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_raise_before_wait_is_not_lost() {
        let signal = EdgeSignal::new();
        let seen = signal.generation();
        signal.raise();
        let start = Instant::now();
        assert!(signal.wait_past(seen, Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_raise_from_other_thread() {
        let signal = EdgeSignal::new();
        let seen = signal.generation();
        let raiser = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            raiser.raise();
        });
        let start = Instant::now();
        assert!(signal.wait_past(seen, Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }
}
