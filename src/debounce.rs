use std::time::{Duration, Instant};

/// Delay between the last keystroke and the search request.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// Restartable single-shot timer. Each `push` replaces the pending value and
/// moves the deadline; `poll` hands the value out once the deadline passes.
/// The caller supplies the clock, so a burst of input yields exactly one
/// emission carrying the last value.
#[derive(Debug, Clone)]
pub struct DebounceGate<T> {
    delay: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> DebounceGate<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.delay));
    }

    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, deadline)) if now >= *deadline => self.pending.take().map(|(value, _)| value),
            _ => None,
        }
    }

    /// When the pending value becomes due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(value, _)| value)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl<T> Default for DebounceGate<T> {
    fn default() -> Self {
        Self::new(SEARCH_DEBOUNCE)
    }
}
