use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheap, cooperative cancel flag shared between a learner session and its
/// workers.
///
/// Checked at frontier-iteration boundaries by the learner thread and at
/// each task's start by workers. Cloning is cheap (an `Arc` bump) and every
/// clone observes the same underlying flag. Timeouts are the caller's
/// concern: arm a timer that calls [`CancelToken::cancel`].
///
/// Deliberately plain: no throttled recheck interval, no panicking
/// `assert_running`, just a boolean the learner polls on its own schedule.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flips the flag. Idempotent; safe to call from any thread.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}
