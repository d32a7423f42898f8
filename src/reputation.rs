/// Reputation store
///
/// Per-participant score with bounded range and append semantics via the
/// ledger. The local map is a cache; the ledger call in `ledger_client.rs`
/// is the record of truth and is issued unconditionally after the local
/// mutation (spec.md §4.6, Design Notes §9).
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::AggregatorConfig;
use crate::domain::ThresholdState;

#[derive(Clone)]
pub struct ReputationStore {
    state: Arc<Mutex<ThresholdState>>,
    rep_init: f64,
    rep_min: f64,
    rep_max: f64,
}

impl ReputationStore {
    pub fn new(state: Arc<Mutex<ThresholdState>>, config: &AggregatorConfig) -> Self {
        Self {
            state,
            rep_init: config.reputation_init,
            rep_min: config.reputation_min,
            rep_max: config.reputation_max,
        }
    }

    /// Returns the current reputation for `participant_id`, seeding it
    /// with `REPUTATION_INIT` on first observation (the participant set
    /// is open — spec.md §3).
    pub async fn get_or_init(&self, participant_id: &str) -> f64 {
        let mut state = self.state.lock().await;
        if let Some(rep) = state.reputation_scores.get(participant_id) {
            return *rep;
        }
        state
            .reputation_scores
            .insert(participant_id.to_string(), self.rep_init);
        info!(
            participant = participant_id,
            reputation = self.rep_init,
            "\u{1f195} [AGGREGATOR] initialized reputation for new participant"
        );
        self.rep_init
    }

    /// Applies `delta` to the participant's reputation, clamped to
    /// `[REP_MIN, REP_MAX]`, and returns the new value. Does not write
    /// through to the ledger — callers do that explicitly so the ledger
    /// write and the reason string stay colocated at the call site.
    pub async fn apply_delta(&self, participant_id: &str, delta: f64) -> f64 {
        let mut state = self.state.lock().await;
        let current = *state
            .reputation_scores
            .get(participant_id)
            .unwrap_or(&self.rep_init);
        let updated = (current + delta).clamp(self.rep_min, self.rep_max);
        state
            .reputation_scores
            .insert(participant_id.to_string(), updated);
        updated
    }

    pub async fn snapshot(&self) -> HashMap<String, f64> {
        self.state.lock().await.reputation_scores.clone()
    }

    pub async fn mean_reputation(&self, fallback: f64) -> f64 {
        let state = self.state.lock().await;
        let scores = &state.reputation_scores;
        if scores.is_empty() {
            return fallback;
        }
        scores.values().sum::<f64>() / scores.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ThresholdState;

    fn store() -> ReputationStore {
        let state = Arc::new(Mutex::new(ThresholdState::new(0.75, 5)));
        ReputationStore {
            state,
            rep_init: 0.5,
            rep_min: 0.1,
            rep_max: 1.0,
        }
    }

    #[tokio::test]
    async fn new_participant_seeds_at_init() {
        let store = store();
        assert_eq!(store.get_or_init("dbs").await, 0.5);
    }

    #[tokio::test]
    async fn reputation_never_exceeds_bounds_under_many_rewards() {
        let store = store();
        store.get_or_init("dbs").await;
        for _ in 0..1000 {
            store.apply_delta("dbs", 0.2).await;
        }
        let rep = store.snapshot().await["dbs"];
        assert_eq!(rep, 1.0);
    }

    #[tokio::test]
    async fn reputation_never_drops_below_min_under_many_penalties() {
        let store = store();
        store.get_or_init("dbs").await;
        for _ in 0..1000 {
            store.apply_delta("dbs", -0.2).await;
        }
        let rep = store.snapshot().await["dbs"];
        assert_eq!(rep, 0.1);
    }

    #[tokio::test]
    async fn mean_reputation_falls_back_when_empty() {
        let store = store();
        assert_eq!(store.mean_reputation(0.5).await, 0.5);
    }
}
