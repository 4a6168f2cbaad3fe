/// Per-symbol rolling buffers
///
/// Bounded tick and minute-bar sequences plus the indicator state fed by
/// bar closes. All mutation happens under the owning store shard's lock.
use crate::event::{Bar, Tick};
use crate::indicator::{IndicatorSnapshot, IndicatorState};
use std::collections::VecDeque;

/// Rolling history for one symbol.
#[derive(Debug)]
pub struct SymbolSeries {
    ticks: VecDeque<Tick>,
    bars: VecDeque<Bar>,
    indicators: IndicatorState,
    tick_capacity: usize,
    bar_capacity: usize,
}

impl SymbolSeries {
    pub fn new(tick_capacity: usize, bar_capacity: usize) -> Self {
        Self {
            ticks: VecDeque::with_capacity(tick_capacity.min(1024)),
            bars: VecDeque::new(),
            indicators: IndicatorState::default(),
            tick_capacity,
            bar_capacity,
        }
    }

    /// Append a live tick, updating the forming bar and folding a close
    /// into the indicators when the minute rolls over. Returns the
    /// indicator values current after this tick.
    pub fn apply_tick(&mut self, tick: Tick) -> IndicatorSnapshot {
        let minute = (tick.timestamp / 60) * 60;
        match self.bars.back_mut() {
            Some(last) if minute > last.timestamp => {
                let close = last.close;
                self.indicators.on_close(close);
                self.push_bar(Bar::new(
                    minute,
                    tick.ltp,
                    tick.ltp,
                    tick.ltp,
                    tick.ltp,
                    tick.volume,
                ));
            }
            // Same minute, or a timestamp that regressed: fold into the
            // open bar rather than reopening history
            Some(last) => {
                last.high = last.high.max(tick.ltp);
                last.low = last.low.min(tick.ltp);
                last.close = tick.ltp;
                last.volume = tick.volume;
            }
            None => {
                self.push_bar(Bar::new(
                    minute,
                    tick.ltp,
                    tick.ltp,
                    tick.ltp,
                    tick.ltp,
                    tick.volume,
                ));
            }
        }

        let price = tick.ltp;
        self.push_tick(tick);
        self.indicators.snapshot(price)
    }

    /// Replace history with a backfill result and rebuild the indicators
    /// from scratch. The final bar is treated as still forming, so its
    /// close stays unfolded until a later minute arrives.
    pub fn prime(&mut self, ticks: Vec<Tick>, bars: Vec<Bar>) {
        self.ticks = VecDeque::from(ticks);
        while self.ticks.len() > self.tick_capacity {
            self.ticks.pop_front();
        }
        self.bars = VecDeque::from(bars);
        while self.bars.len() > self.bar_capacity {
            self.bars.pop_front();
        }

        let closed = self.bars.len().saturating_sub(1);
        self.indicators
            .recompute(self.bars.iter().take(closed).map(|bar| bar.close));
    }

    /// Drop points older than `cutoff` (epoch seconds).
    pub fn sweep(&mut self, cutoff: i64) {
        while self
            .ticks
            .front()
            .is_some_and(|tick| tick.timestamp < cutoff)
        {
            self.ticks.pop_front();
        }
        while self.bars.front().is_some_and(|bar| bar.timestamp < cutoff) {
            self.bars.pop_front();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty() && self.bars.is_empty()
    }

    pub fn tick_count(&self) -> usize {
        self.ticks.len()
    }

    pub fn ticks(&self) -> Vec<Tick> {
        self.ticks.iter().cloned().collect()
    }

    pub fn bars(&self) -> Vec<Bar> {
        self.bars.iter().copied().collect()
    }

    /// Indicator values without applying a tick, anchored to the latest
    /// known price.
    pub fn indicator_snapshot(&self) -> IndicatorSnapshot {
        let latest = self.bars.back().map(|bar| bar.close).unwrap_or(0.0);
        self.indicators.snapshot(latest)
    }

    fn push_tick(&mut self, tick: Tick) {
        if self.ticks.len() >= self.tick_capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    fn push_bar(&mut self, bar: Bar) {
        if self.bars.len() >= self.bar_capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
    }
}
