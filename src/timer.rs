//! Retransmission timer and retry budget.
//!
//! Reliable delivery requires that an unacknowledged frame is re-sent if no
//! reply arrives within a bounded time.  This module provides:
//! - [`RetransmitTimer`]: a one-shot, cancellable timer whose expiry only
//!   raises a flag and bumps a counter.  The link's read loop polls
//!   [`RetransmitTimer::fired`] between byte reads; the expiry task never
//!   touches frame buffers, so the link remains the single writer of all
//!   protocol state.
//! - [`RetryBudget`]: counts transmissions against the configured maximum.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// State shared between the timer and its expiry task.
///
/// `generation` identifies the current arming; `expired` records the
/// generation whose deadline passed.  An expiry from a superseded arming can
/// therefore never read as fired.
#[derive(Debug, Default)]
struct Flags {
    generation: AtomicU64,
    expired: AtomicU64,
    fires: AtomicU32,
}

/// A one-shot retransmission timer.
///
/// Must be armed from inside a tokio runtime.
#[derive(Debug, Default)]
pub struct RetransmitTimer {
    flags: Arc<Flags>,
    pending: Option<JoinHandle<()>>,
}

impl RetransmitTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an expiry `duration` from now, replacing any pending one.
    pub fn arm(&mut self, duration: Duration) {
        self.abort_pending();
        let generation = self.flags.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let flags = Arc::clone(&self.flags);
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if flags.generation.load(Ordering::Acquire) == generation {
                flags.expired.store(generation, Ordering::Release);
                flags.fires.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    /// Stop the pending expiry (if any) and clear the fired flag.
    ///
    /// Idempotent.
    pub fn cancel(&mut self) {
        self.abort_pending();
        // Moving to a fresh generation invalidates any expiry already recorded.
        self.flags.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// `true` once the current arming has expired.
    pub fn fired(&self) -> bool {
        let generation = self.flags.generation.load(Ordering::Acquire);
        generation != 0 && self.flags.expired.load(Ordering::Acquire) == generation
    }

    /// Total number of expiries observed since construction.
    pub fn fires(&self) -> u32 {
        self.flags.fires.load(Ordering::Relaxed)
    }

    fn abort_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for RetransmitTimer {
    fn drop(&mut self) {
        self.abort_pending();
    }
}

/// Transmission budget for one exchange.
///
/// Every transmission, first or repeated, consumes one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    max: u32,
    used: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { max, used: 0 }
    }

    /// Take one attempt.  Returns `false` once the budget is spent.
    pub fn try_consume(&mut self) -> bool {
        if self.used >= self.max {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_deadline() {
        let mut timer = RetransmitTimer::new();
        assert!(!timer.fired());

        timer.arm(Duration::from_secs(3));
        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(!timer.fired());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(timer.fired());
        assert_eq!(timer.fires(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_clears_flag_and_is_idempotent() {
        let mut timer = RetransmitTimer::new();
        timer.arm(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(timer.fired());

        timer.cancel();
        assert!(!timer.fired());
        timer.cancel();
        assert!(!timer.fired());
        assert_eq!(timer.fires(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let mut timer = RetransmitTimer::new();
        timer.arm(Duration::from_secs(1));
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!timer.fired());
        assert_eq!(timer.fires(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_deadline() {
        let mut timer = RetransmitTimer::new();
        timer.arm(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        timer.arm(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(700)).await;
        // The first deadline has passed but it was superseded.
        assert!(!timer.fired());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(timer.fired());
        assert_eq!(timer.fires(), 1);
    }

    #[test]
    fn budget_allows_exactly_max_attempts() {
        let mut budget = RetryBudget::new(3);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.used(), 3);
    }
}
