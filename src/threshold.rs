/// Threshold controller
///
/// EWMA-like dynamic acceptance threshold based on recent round quality
/// and mean reputation (spec.md §4.5), plus the per-submission acceptance
/// rule and reward/penalty formulas of spec.md §4.6.
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::AggregatorConfig;
use crate::domain::ThresholdState;

pub struct ThresholdController {
    state: Arc<Mutex<ThresholdState>>,
    min_threshold: f64,
    max_threshold: f64,
    initial_threshold: f64,
    adjustment_rate: f64,
    reputation_init: f64,
}

impl ThresholdController {
    pub fn new(state: Arc<Mutex<ThresholdState>>, config: &AggregatorConfig) -> Self {
        Self {
            state,
            min_threshold: config.min_threshold,
            max_threshold: config.max_threshold,
            initial_threshold: config.initial_threshold,
            adjustment_rate: config.threshold_adjustment_rate,
            reputation_init: config.reputation_init,
        }
    }

    /// Recomputes and stores the dynamic threshold for the round about to
    /// be filtered (spec.md §4.5). Must run before any submission in the
    /// round is filtered.
    pub async fn recompute(&self, round_id: &str) -> f64 {
        let mut state = self.state.lock().await;

        if state.round_history.is_empty() {
            info!(
                round_id,
                threshold = self.initial_threshold,
                "\u{1f50d} [AGGREGATOR] using initial threshold"
            );
            state.current_threshold = self.initial_threshold;
            return self.initial_threshold;
        }

        let recent_qualities: Vec<f64> = state.round_history.iter().map(|h| h.avg_quality).collect();
        let avg_quality = recent_qualities.iter().sum::<f64>() / recent_qualities.len() as f64;

        let reputations: Vec<f64> = state.reputation_scores.values().copied().collect();
        let avg_reputation = if reputations.is_empty() {
            self.reputation_init
        } else {
            reputations.iter().sum::<f64>() / reputations.len() as f64
        };

        let current = state.current_threshold;
        let new_threshold = if recent_qualities.len() >= 2 {
            let last = recent_qualities[recent_qualities.len() - 1];
            let prev = recent_qualities[recent_qualities.len() - 2];
            if last > prev {
                let adjustment = self.adjustment_rate * avg_reputation;
                (current + adjustment).min(self.max_threshold)
            } else {
                let adjustment = self.adjustment_rate * (1.0 - avg_reputation * 0.5);
                (current - adjustment).max(self.min_threshold)
            }
        } else if avg_quality > current {
            (current + self.adjustment_rate / 2.0).min(self.max_threshold)
        } else {
            (current - self.adjustment_rate / 2.0).max(self.min_threshold)
        };

        let new_threshold = new_threshold.clamp(self.min_threshold, self.max_threshold);

        info!(
            round_id,
            new_threshold,
            previous = current,
            avg_reputation,
            "\u{1f50d} [AGGREGATOR] new dynamic threshold"
        );

        state.current_threshold = new_threshold;
        new_threshold
    }

    pub async fn current(&self) -> f64 {
        self.state.lock().await.current_threshold
    }

    /// adjusted_threshold = max(current_threshold * (1 - 0.1 * reputation), MIN_THRESHOLD)
    pub fn adjusted_threshold(&self, current_threshold: f64, reputation: f64) -> f64 {
        (current_threshold * (1.0 - 0.1 * reputation)).max(self.min_threshold)
    }
}

/// Outcome of filtering a single submission (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterDecision {
    Accepted { reward: f64 },
    Rejected { penalty: f64 },
}

/// Pure decision function, kept separate from I/O so it is trivially
/// unit-testable against the spec's literal scenarios.
pub fn filter_submission(
    quality_score: f64,
    adjusted_threshold: f64,
    current_threshold: f64,
    reputation_reward: f64,
    reputation_penalty: f64,
) -> FilterDecision {
    if quality_score >= adjusted_threshold {
        let reward = reputation_reward * (1.0 + quality_score);
        FilterDecision::Accepted { reward }
    } else {
        let penalty_factor = (1.0 - quality_score / current_threshold).max(0.2);
        let penalty = reputation_penalty * penalty_factor;
        FilterDecision::Rejected { penalty }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RoundHistoryEntry;
    use chrono::Utc;

    fn config() -> AggregatorConfig {
        AggregatorConfig {
            ws_url: String::new(),
            gateway_url: String::new(),
            blob_handler_url: String::new(),
            model_dir: "/tmp".into(),
            min_threshold: 0.5,
            max_threshold: 0.95,
            initial_threshold: 0.75,
            threshold_history_size: 5,
            threshold_adjustment_rate: 0.05,
            reputation_init: 0.5,
            reputation_max: 1.0,
            reputation_min: 0.1,
            reputation_reward: 0.05,
            reputation_penalty: 0.1,
            reputation_penalty_nonparticipation: 0.15,
            round_timeout_minutes: 3,
            default_participants: vec!["dbs".into(), "ing".into(), "ocbc".into()],
        }
    }

    #[tokio::test]
    async fn empty_history_returns_initial_threshold() {
        let config = config();
        let state = Arc::new(Mutex::new(ThresholdState::new(config.initial_threshold, config.threshold_history_size)));
        let controller = ThresholdController::new(state, &config);
        assert_eq!(controller.recompute("r1").await, 0.75);
    }

    #[tokio::test]
    async fn rising_quality_trend_raises_threshold() {
        let config = config();
        let state = Arc::new(Mutex::new(ThresholdState::new(config.initial_threshold, config.threshold_history_size)));
        {
            let mut s = state.lock().await;
            for q in [0.7, 0.75, 0.8] {
                s.push_round_history(RoundHistoryEntry {
                    round_id: "prev".into(),
                    timestamp: Utc::now(),
                    avg_quality: q,
                    avg_reputation: 0.6,
                    num_models: 3,
                    num_accepted: 3,
                    threshold_used: 0.75,
                });
            }
            s.reputation_scores.insert("dbs".into(), 0.6);
        }
        let controller = ThresholdController::new(state, &config);
        let new_threshold = controller.recompute("r4").await;
        // current (0.75) + 0.05 * 0.6 = 0.78
        assert!((new_threshold - 0.78).abs() < 1e-9);
    }

    #[tokio::test]
    async fn threshold_clamped_to_max() {
        let config = config();
        let state = Arc::new(Mutex::new(ThresholdState::new(0.94, config.threshold_history_size)));
        {
            let mut s = state.lock().await;
            for q in [0.1, 0.2] {
                s.push_round_history(RoundHistoryEntry {
                    round_id: "prev".into(),
                    timestamp: Utc::now(),
                    avg_quality: q,
                    avg_reputation: 1.0,
                    num_models: 1,
                    num_accepted: 1,
                    threshold_used: 0.94,
                });
            }
            s.reputation_scores.insert("dbs".into(), 1.0);
        }
        let controller = ThresholdController::new(state, &config);
        let new_threshold = controller.recompute("r3").await;
        assert_eq!(new_threshold, 0.95);
    }

    #[test]
    fn accepted_reward_matches_spec_formula() {
        // scenario 1: accuracy 0.9, reputation 0.5 -> qs = 0.9 * 0.75 = 0.675
        let qs = 0.9 * 0.75;
        let decision = filter_submission(qs, 0.5, 0.75, 0.05, 0.1);
        match decision {
            FilterDecision::Accepted { reward } => {
                assert!((reward - 0.05 * (1.0 + qs)).abs() < 1e-9);
            }
            _ => panic!("expected acceptance"),
        }
    }

    #[test]
    fn rejected_penalty_matches_spec_scenario_3() {
        // accuracy=0.3, reputation=0.5 -> qs=0.225, adjusted_threshold ~0.7125
        let qs = 0.3 * 0.75;
        let adjusted = 0.75 * (1.0 - 0.1 * 0.5);
        let decision = filter_submission(qs, adjusted, 0.75, 0.05, 0.1);
        match decision {
            FilterDecision::Rejected { penalty } => {
                assert!((penalty - 0.07).abs() < 1e-9);
            }
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn penalty_factor_floored_at_point_two() {
        let decision = filter_submission(0.0, 0.9, 0.9, 0.05, 0.1);
        match decision {
            FilterDecision::Rejected { penalty } => assert_eq!(penalty, 0.1 * 1.0_f64.min(1.0).max(0.2)),
            _ => panic!("expected rejection"),
        }
    }
}
