use std::time::Instant;

use parking_lot::Mutex;

/// Zero point for every logged timestamp.
///
/// Started on the first successful connect, rebased by a clear while
/// connected, invalidated by a clear while disconnected.
#[derive(Debug, Default)]
pub struct SessionClock {
    start: Mutex<Option<Instant>>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the start time unless a session is already running.
    /// Returns `true` if this call started it.
    pub fn start_if_unset(&self) -> bool {
        self.start_if_unset_at(Instant::now())
    }

    pub fn start_if_unset_at(&self, now: Instant) -> bool {
        let mut start = self.start.lock();
        if start.is_some() {
            return false;
        }
        *start = Some(now);
        true
    }

    pub fn rebase(&self) {
        self.rebase_at(Instant::now());
    }

    pub fn rebase_at(&self, now: Instant) {
        *self.start.lock() = Some(now);
    }

    /// Forget the start time; the next connect begins a fresh session.
    pub fn invalidate(&self) {
        *self.start.lock() = None;
    }

    pub fn is_running(&self) -> bool {
        self.start.lock().is_some()
    }

    pub fn elapsed_ms(&self) -> Option<u64> {
        self.elapsed_ms_at(Instant::now())
    }

    pub fn elapsed_ms_at(&self, now: Instant) -> Option<u64> {
        let start = (*self.start.lock())?;
        Some(now.saturating_duration_since(start).as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn start_is_idempotent() {
        let clock = SessionClock::new();
        let t0 = Instant::now();
        assert!(clock.start_if_unset_at(t0));
        assert!(!clock.start_if_unset_at(t0 + Duration::from_secs(5)));
        assert_eq!(clock.elapsed_ms_at(t0 + Duration::from_millis(1500)), Some(1500));
    }

    #[test]
    fn rebase_and_invalidate() {
        let clock = SessionClock::new();
        assert_eq!(clock.elapsed_ms(), None);

        let t0 = Instant::now();
        clock.start_if_unset_at(t0);
        clock.rebase_at(t0 + Duration::from_secs(10));
        assert_eq!(clock.elapsed_ms_at(t0 + Duration::from_millis(10_020)), Some(20));

        clock.invalidate();
        assert!(!clock.is_running());
        assert!(clock.start_if_unset());
    }
}
