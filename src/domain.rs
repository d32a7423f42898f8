/// Shared data model
///
/// Types mutated across the event listener, round coordinator, quality
/// evaluator, threshold controller, and snapshotter. Kept free of I/O so
/// they can be unit tested in isolation.
use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-submission quality metrics (spec.md §3 QualityMetrics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub accuracy: f64,
    pub has_nan: bool,
    pub has_inf: bool,
    pub avg_weight_magnitude: f64,
    pub weight_variance: f64,
    pub self_certified: bool,
    pub reputation: f64,
    pub trust_factor: f64,
    pub quality_score: f64,
}

/// One bounded-FIFO entry of round-level outcome (spec.md §3 RoundHistoryEntry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundHistoryEntry {
    pub round_id: String,
    pub timestamp: DateTime<Utc>,
    pub avg_quality: f64,
    pub avg_reputation: f64,
    pub num_models: usize,
    pub num_accepted: usize,
    pub threshold_used: f64,
}

/// Process-wide threshold + reputation state (spec.md §3 ThresholdState).
///
/// Invariants enforced by every mutator: `current_threshold` stays in
/// `[min_threshold, max_threshold]`; `round_history` and every entry of
/// `participant_history` never exceed `history_size`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdState {
    pub current_threshold: f64,
    pub round_history: VecDeque<RoundHistoryEntry>,
    pub participant_history: HashMap<String, VecDeque<QualityMetrics>>,
    pub reputation_scores: HashMap<String, f64>,

    #[serde(skip)]
    pub history_size: usize,
}

impl ThresholdState {
    pub fn new(initial_threshold: f64, history_size: usize) -> Self {
        Self {
            current_threshold: initial_threshold,
            round_history: VecDeque::new(),
            participant_history: HashMap::new(),
            reputation_scores: HashMap::new(),
            history_size,
        }
    }

    /// Snapshot-shaped view used by `snapshot.rs` (only the three fields
    /// the original service persists; `participant_history` is
    /// intentionally not part of the durable snapshot, matching the
    /// original's `save_state`/`load_state` pair).
    pub fn to_snapshot(&self) -> SnapshotData {
        SnapshotData {
            current_threshold: self.current_threshold,
            round_history: self.round_history.iter().cloned().collect(),
            reputation_scores: self.reputation_scores.clone(),
        }
    }

    pub fn restore_from(&mut self, snapshot: SnapshotData) {
        self.current_threshold = snapshot.current_threshold;
        self.round_history = snapshot.round_history.into_iter().collect();
        self.reputation_scores = snapshot.reputation_scores;
    }

    pub fn push_round_history(&mut self, entry: RoundHistoryEntry) {
        self.round_history.push_back(entry);
        while self.round_history.len() > self.history_size {
            self.round_history.pop_front();
        }
    }

    pub fn push_participant_history(&mut self, participant_id: &str, metrics: QualityMetrics) {
        let history = self
            .participant_history
            .entry(participant_id.to_string())
            .or_default();
        history.push_back(metrics);
        while history.len() > self.history_size {
            history.pop_front();
        }
    }
}

/// The subset of `ThresholdState` written to and read from
/// `threshold_state.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotData {
    pub current_threshold: f64,
    pub round_history: Vec<RoundHistoryEntry>,
    pub reputation_scores: HashMap<String, f64>,
}

/// Lifecycle state of a round (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    Open,
    Collecting,
    Processing,
    Completed,
    Removed,
}

/// A coordination epoch collecting one model per participant.
#[derive(Debug, Clone)]
pub struct Round {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub expected: HashSet<String>,
    pub submissions: HashMap<String, String>,
    pub status: RoundStatus,
    pub deadline: Option<DateTime<Utc>>,
}

impl Round {
    pub fn new(id: String, expected: HashSet<String>) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            expected,
            submissions: HashMap::new(),
            status: RoundStatus::Open,
            deadline: None,
        }
    }

    /// Duplicate submissions for the same participant are ignored —
    /// the first URI observed wins.
    pub fn record_submission(&mut self, participant_id: &str, model_uri: &str) -> bool {
        if self.submissions.contains_key(participant_id) {
            return false;
        }
        self.submissions
            .insert(participant_id.to_string(), model_uri.to_string());
        true
    }

    pub fn all_expected_submitted(&self) -> bool {
        self.expected
            .iter()
            .all(|p| self.submissions.contains_key(p))
    }

    pub fn non_participants(&self) -> Vec<String> {
        self.expected
            .iter()
            .filter(|p| !self.submissions.contains_key(*p))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_submission_keeps_first_uri() {
        let mut round = Round::new("r1".into(), HashSet::from(["dbs".to_string()]));
        assert!(round.record_submission("dbs", "uri-1"));
        assert!(!round.record_submission("dbs", "uri-2"));
        assert_eq!(round.submissions["dbs"], "uri-1");
    }

    #[test]
    fn history_fifo_respects_bound() {
        let mut state = ThresholdState::new(0.75, 2);
        for i in 0..5 {
            state.push_round_history(RoundHistoryEntry {
                round_id: format!("r{i}"),
                timestamp: Utc::now(),
                avg_quality: 0.5,
                avg_reputation: 0.5,
                num_models: 1,
                num_accepted: 1,
                threshold_used: 0.75,
            });
        }
        assert_eq!(state.round_history.len(), 2);
        assert_eq!(state.round_history.back().unwrap().round_id, "r4");
    }

    #[test]
    fn non_participants_is_expected_minus_submitted() {
        let mut round = Round::new(
            "r1".into(),
            HashSet::from(["dbs".to_string(), "ing".to_string(), "ocbc".to_string()]),
        );
        round.record_submission("dbs", "uri-1");
        round.record_submission("ing", "uri-2");
        let mut missing = round.non_participants();
        missing.sort();
        assert_eq!(missing, vec!["ocbc".to_string()]);
    }
}
