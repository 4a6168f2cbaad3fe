/// Incremental technical indicators
///
/// Per-symbol running state updated in O(1) per closed bar: SMA-20 over a
/// close window, EMA-9 with standard smoothing, and Wilder-smoothed
/// RSI-14. Published values are gated on a minimum bar count; below it
/// the snapshot carries defined fallbacks instead of partial math.
use std::collections::VecDeque;

pub const SMA_PERIOD: usize = 20;
pub const EMA_PERIOD: usize = 9;
pub const RSI_PERIOD: usize = 14;

/// Neutral RSI reported before enough bars exist.
const RSI_FALLBACK: f64 = 50.0;

/// Indicator values published alongside each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub sma20: f64,
    pub ema9: f64,
    pub rsi14: f64,
}

impl IndicatorSnapshot {
    /// Values used while a symbol has too little history for real math.
    pub fn fallback(price: f64) -> Self {
        Self {
            sma20: price,
            ema9: price,
            rsi14: RSI_FALLBACK,
        }
    }
}

/// Running sufficient statistics for one symbol's indicators.
#[derive(Debug, Clone, Default)]
pub struct IndicatorState {
    window: VecDeque<f64>,
    sum: f64,
    closes_seen: usize,
    ema: f64,
    ema_seed_sum: f64,
    avg_gain: f64,
    avg_loss: f64,
    gain_sum: f64,
    loss_sum: f64,
    prev_close: f64,
}

impl IndicatorState {
    /// Fold one closed bar into the running state.
    pub fn on_close(&mut self, close: f64) {
        self.closes_seen += 1;

        // EMA: simple average until the period fills, then smoothing
        if self.closes_seen <= EMA_PERIOD {
            self.ema_seed_sum += close;
            self.ema = self.ema_seed_sum / self.closes_seen as f64;
        } else {
            let alpha = 2.0 / (EMA_PERIOD as f64 + 1.0);
            self.ema = alpha * close + (1.0 - alpha) * self.ema;
        }

        // RSI: simple mean of the first period's gains/losses, Wilder
        // smoothing afterwards
        if self.closes_seen > 1 {
            let delta = close - self.prev_close;
            let gain = delta.max(0.0);
            let loss = (-delta).max(0.0);
            let deltas = self.closes_seen - 1;
            if deltas <= RSI_PERIOD {
                self.gain_sum += gain;
                self.loss_sum += loss;
                self.avg_gain = self.gain_sum / deltas as f64;
                self.avg_loss = self.loss_sum / deltas as f64;
            } else {
                let period = RSI_PERIOD as f64;
                self.avg_gain = (self.avg_gain * (period - 1.0) + gain) / period;
                self.avg_loss = (self.avg_loss * (period - 1.0) + loss) / period;
            }
        }
        self.prev_close = close;

        self.window.push_back(close);
        self.sum += close;
        if self.window.len() > SMA_PERIOD {
            if let Some(oldest) = self.window.pop_front() {
                self.sum -= oldest;
            }
        }
        // Resum the window on every 20th close to bound float drift
        if self.closes_seen % SMA_PERIOD == 0 {
            self.sum = self.window.iter().sum();
        }
    }

    /// Rebuild the whole state from a close history, oldest first. Used
    /// after a backfill replaces a symbol's bars.
    pub fn recompute<I>(&mut self, closes: I)
    where
        I: IntoIterator<Item = f64>,
    {
        *self = Self::default();
        for close in closes {
            self.on_close(close);
        }
    }

    /// Current values, or fallbacks when fewer than `SMA_PERIOD` bars
    /// have closed. `latest_price` substitutes for a close when the
    /// symbol has no bar history at all.
    pub fn snapshot(&self, latest_price: f64) -> IndicatorSnapshot {
        if self.closes_seen >= SMA_PERIOD {
            IndicatorSnapshot {
                sma20: self.sum / self.window.len() as f64,
                ema9: self.ema,
                rsi14: self.rsi_value(),
            }
        } else if self.closes_seen > 0 {
            IndicatorSnapshot::fallback(self.prev_close)
        } else {
            IndicatorSnapshot::fallback(latest_price)
        }
    }

    /// Closed bars folded in so far.
    pub fn bar_count(&self) -> usize {
        self.closes_seen
    }

    fn rsi_value(&self) -> f64 {
        if self.closes_seen < RSI_PERIOD + 1 {
            return RSI_FALLBACK;
        }
        if self.avg_loss == 0.0 {
            return 100.0;
        }
        let rs = self.avg_gain / self.avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}
