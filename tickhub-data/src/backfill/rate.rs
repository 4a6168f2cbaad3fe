/// Sliding-window rate budget for outbound history calls.
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Bounds calls to at most `max_per_second` within any rolling second.
#[derive(Debug)]
pub struct RateBudget {
    calls: Mutex<VecDeque<Instant>>,
    max_per_second: usize,
}

impl RateBudget {
    pub fn new(max_per_second: usize) -> Self {
        Self {
            calls: Mutex::new(VecDeque::with_capacity(max_per_second)),
            max_per_second,
        }
    }

    /// Claim one call slot. Returns false without blocking when the
    /// window is full.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut calls = self.calls.lock();
        Self::prune(&mut calls, now);
        if calls.len() < self.max_per_second {
            calls.push_back(now);
            true
        } else {
            false
        }
    }

    /// Calls recorded in the current window.
    pub fn current_calls(&self) -> usize {
        let mut calls = self.calls.lock();
        Self::prune(&mut calls, Instant::now());
        calls.len()
    }

    pub fn max_per_second(&self) -> usize {
        self.max_per_second
    }

    fn prune(calls: &mut VecDeque<Instant>, now: Instant) {
        while calls
            .front()
            .is_some_and(|at| now.duration_since(*at) >= WINDOW)
        {
            calls.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_budget_caps_calls_per_window() {
        let budget = RateBudget::new(2);

        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
        assert_eq!(budget.current_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let budget = RateBudget::new(1);
        assert!(budget.try_acquire());

        // Half a second in, the slot is still taken
        advance(Duration::from_millis(500)).await;
        assert!(!budget.try_acquire());

        advance(Duration::from_millis(500)).await;
        assert!(budget.try_acquire());
        assert_eq!(budget.current_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_rejects_everything() {
        let budget = RateBudget::new(0);
        assert!(!budget.try_acquire());
        assert_eq!(budget.current_calls(), 0);
    }
}
