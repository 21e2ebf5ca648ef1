//! Simulated market data provider (SPEC_FULL §10.6).
//!
//! Gated behind `DEMO_MODE` at the top level; this module only ever produces
//! `MarketSource::Simulated` snapshots via a bounded random walk, with
//! operator-triggered dip/rally injection for demos and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;

use crate::models::MarketData;

#[async_trait]
pub trait MarketProvider: Send + Sync {
    async fn current(&self) -> MarketData;
    async fn inject_dip(&self, magnitude_pct: f64);
    async fn inject_rally(&self, magnitude_pct: f64);
    async fn reset(&self);
}

struct WalkState {
    price: f64,
    price_change_1m: f64,
    price_change_5m: f64,
    volume_change_1m: f64,
    history_1m: std::collections::VecDeque<f64>,
}

impl WalkState {
    fn new(starting_price: f64) -> Self {
        Self {
            price: starting_price,
            price_change_1m: 0.0,
            price_change_5m: 0.0,
            volume_change_1m: 0.0,
            history_1m: std::collections::VecDeque::new(),
        }
    }
}

/// A self-contained random-walk market used when no live data feed is
/// configured. Each `step()` nudges price by a small bounded percentage;
/// `inject_dip`/`inject_rally` apply a one-shot shock on top of the walk.
pub struct SimulatedMarketProvider {
    state: Mutex<WalkState>,
    starting_price: f64,
}

impl SimulatedMarketProvider {
    pub fn new(starting_price: f64) -> Self {
        Self { state: Mutex::new(WalkState::new(starting_price)), starting_price }
    }

    /// Advance the walk by one tick. Called by the runtime's own interval,
    /// independent of any single agent's schedule.
    pub fn step(&self) {
        let mut state = self.state.lock();
        let mut rng = rand::thread_rng();
        let drift_pct: f64 = rng.gen_range(-1.5..=1.5);
        let prev_price = state.price;
        state.price = (state.price * (1.0 + drift_pct / 100.0)).max(0.01);

        let pct_change = (state.price - prev_price) / prev_price * 100.0;
        state.history_1m.push_back(pct_change);
        if state.history_1m.len() > 5 {
            state.history_1m.pop_front();
        }
        state.price_change_1m = pct_change;
        state.price_change_5m = state.history_1m.iter().sum();
        state.volume_change_1m = rng.gen_range(-20.0..=20.0);
    }
}

impl Default for SimulatedMarketProvider {
    fn default() -> Self {
        Self::new(100.0)
    }
}

#[async_trait]
impl MarketProvider for SimulatedMarketProvider {
    async fn current(&self) -> MarketData {
        let state = self.state.lock();
        MarketData::simulated(state.price, state.price_change_1m, state.price_change_5m, state.volume_change_1m)
    }

    async fn inject_dip(&self, magnitude_pct: f64) {
        let mut state = self.state.lock();
        let drop = magnitude_pct.abs();
        state.price = (state.price * (1.0 - drop / 100.0)).max(0.01);
        state.price_change_1m = -drop;
        state.history_1m.push_back(-drop);
        if state.history_1m.len() > 5 {
            state.history_1m.pop_front();
        }
        state.price_change_5m = state.history_1m.iter().sum();
    }

    async fn inject_rally(&self, magnitude_pct: f64) {
        let mut state = self.state.lock();
        let rise = magnitude_pct.abs();
        state.price *= 1.0 + rise / 100.0;
        state.price_change_1m = rise;
        state.history_1m.push_back(rise);
        if state.history_1m.len() > 5 {
            state.history_1m.pop_front();
        }
        state.price_change_5m = state.history_1m.iter().sum();
    }

    async fn reset(&self) {
        let mut state = self.state.lock();
        *state = WalkState::new(self.starting_price);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inject_dip_sets_price_drop() {
        let provider = SimulatedMarketProvider::new(100.0);
        provider.inject_dip(8.0).await;
        let snapshot = provider.current().await;
        assert_eq!(snapshot.price_change_1m, -8.0);
        assert!(snapshot.price < 100.0);
    }

    #[tokio::test]
    async fn reset_restores_starting_price() {
        let provider = SimulatedMarketProvider::new(50.0);
        provider.inject_rally(20.0).await;
        provider.reset().await;
        let snapshot = provider.current().await;
        assert_eq!(snapshot.price, 50.0);
        assert_eq!(snapshot.price_change_1m, 0.0);
    }
}
