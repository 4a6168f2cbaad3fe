/// Per-symbol failure cooldown.
///
/// A symbol that just failed a backfill is skipped for a fixed window so
/// a broken instrument cannot burn the rate budget on every resubscribe.
use crate::symbol::Symbol;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct FailureCooldown {
    failures: Mutex<FnvHashMap<Symbol, Instant>>,
    window: Duration,
}

impl FailureCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            failures: Mutex::new(FnvHashMap::default()),
            window,
        }
    }

    /// Mark `symbol` as just failed, restarting its window.
    pub fn record(&self, symbol: &Symbol) {
        self.failures.lock().insert(symbol.clone(), Instant::now());
    }

    /// Whether `symbol` is still inside its cooldown window. Expired
    /// entries are dropped on the way out.
    pub fn is_cooling(&self, symbol: &Symbol) -> bool {
        let mut failures = self.failures.lock();
        match failures.get(symbol) {
            Some(at) if at.elapsed() < self.window => true,
            Some(_) => {
                failures.remove(symbol);
                false
            }
            None => false,
        }
    }

    /// Symbols currently cooling down.
    pub fn count(&self) -> usize {
        let window = self.window;
        let mut failures = self.failures.lock();
        failures.retain(|_, at| at.elapsed() < window);
        failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn symbol(code: &str) -> Symbol {
        Symbol::parse(&format!("NSE:{code}-EQ")).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_failure_is_cooling() {
        let cooldown = FailureCooldown::new(Duration::from_secs(300));
        let sick = symbol("SICK");

        assert!(!cooldown.is_cooling(&sick));
        cooldown.record(&sick);
        assert!(cooldown.is_cooling(&sick));
        assert_eq!(cooldown.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_symbol_recovers_after_window() {
        let cooldown = FailureCooldown::new(Duration::from_secs(300));
        let sick = symbol("SICK");
        cooldown.record(&sick);

        advance(Duration::from_secs(299)).await;
        assert!(cooldown.is_cooling(&sick));

        advance(Duration::from_secs(1)).await;
        assert!(!cooldown.is_cooling(&sick));
        assert_eq!(cooldown.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_failure_restarts_window() {
        let cooldown = FailureCooldown::new(Duration::from_secs(300));
        let sick = symbol("SICK");
        cooldown.record(&sick);

        advance(Duration::from_secs(200)).await;
        cooldown.record(&sick);

        advance(Duration::from_secs(200)).await;
        // 400s after the first failure, but only 200s after the second
        assert!(cooldown.is_cooling(&sick));
    }
}
