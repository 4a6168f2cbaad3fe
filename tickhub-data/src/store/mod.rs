/// Rolling market-data store
///
/// Keyed tick/bar history with bounded memory. Symbols are spread over a
/// fixed set of shards so feed appends, backfill primes and snapshot
/// reads for unrelated symbols never contend on one lock. Locks are only
/// held for in-memory work, never across await points.
mod series;

pub use series::SymbolSeries;

use crate::config::HubConfig;
use crate::event::{Bar, Tick};
use crate::indicator::IndicatorSnapshot;
use crate::symbol::Symbol;
use fnv::{FnvHashMap, FnvHasher};
use parking_lot::RwLock;
use std::hash::{Hash, Hasher};

const SHARD_COUNT: usize = 16;

/// Process-wide tick/bar cache, shared by the feed, backfill and
/// dispatch paths.
#[derive(Debug)]
pub struct RollingStore {
    shards: Vec<RwLock<FnvHashMap<Symbol, SymbolSeries>>>,
    tick_capacity: usize,
    bar_capacity: usize,
}

impl RollingStore {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(FnvHashMap::default())).collect(),
            tick_capacity: config.tick_capacity,
            bar_capacity: config.bar_capacity,
        }
    }

    /// Append a live tick, creating the series on first sight, and return
    /// the symbol's indicator values after the update.
    pub fn apply_tick(&self, symbol: &Symbol, tick: Tick) -> IndicatorSnapshot {
        let mut shard = self.shard(symbol).write();
        let series = shard
            .entry(symbol.clone())
            .or_insert_with(|| SymbolSeries::new(self.tick_capacity, self.bar_capacity));
        series.apply_tick(tick)
    }

    /// Replace a symbol's history with a backfill result.
    pub fn prime(&self, symbol: &Symbol, ticks: Vec<Tick>, bars: Vec<Bar>) {
        let mut shard = self.shard(symbol).write();
        let series = shard
            .entry(symbol.clone())
            .or_insert_with(|| SymbolSeries::new(self.tick_capacity, self.bar_capacity));
        series.prime(ticks, bars);
    }

    pub fn ticks(&self, symbol: &Symbol) -> Vec<Tick> {
        self.shard(symbol)
            .read()
            .get(symbol)
            .map(SymbolSeries::ticks)
            .unwrap_or_default()
    }

    pub fn bars(&self, symbol: &Symbol) -> Vec<Bar> {
        self.shard(symbol)
            .read()
            .get(symbol)
            .map(SymbolSeries::bars)
            .unwrap_or_default()
    }

    pub fn tick_count(&self, symbol: &Symbol) -> usize {
        self.shard(symbol)
            .read()
            .get(symbol)
            .map(SymbolSeries::tick_count)
            .unwrap_or(0)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.shard(symbol).read().contains_key(symbol)
    }

    /// Symbols currently holding any cached data.
    pub fn symbol_count(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Drop points older than `cutoff` everywhere, then remove symbols
    /// left with no data unless `keep` says they still have subscribers.
    /// Returns the fully evicted symbols.
    pub fn sweep(&self, cutoff: i64, keep: impl Fn(&Symbol) -> bool) -> Vec<Symbol> {
        let mut evicted = Vec::new();
        for shard in &self.shards {
            let mut map = shard.write();
            for series in map.values_mut() {
                series.sweep(cutoff);
            }
            map.retain(|symbol, series| {
                if series.is_empty() && !keep(symbol) {
                    evicted.push(symbol.clone());
                    false
                } else {
                    true
                }
            });
        }
        evicted
    }

    fn shard(&self, symbol: &Symbol) -> &RwLock<FnvHashMap<Symbol, SymbolSeries>> {
        let mut hasher = FnvHasher::default();
        symbol.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }
}
