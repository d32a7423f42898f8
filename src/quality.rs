/// Quality evaluator
///
/// Computes a composite quality score per submitted model from
/// self-reported metrics, weight statistics, and current reputation
/// (spec.md §4.4).
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::QualityMetrics;
use crate::ledger_client::LedgerClient;
use crate::reputation::ReputationStore;
use crate::weights::WeightSet;

/// Self-reported fields the ledger may return for a contribution.
#[derive(Debug, Deserialize, Default)]
pub struct AccuracyMetrics {
    #[serde(default = "default_accuracy")]
    pub accuracy: f64,
    #[serde(default)]
    pub has_nan_predictions: bool,
    #[serde(default)]
    pub has_inf_predictions: bool,
    #[serde(default)]
    pub self_certified: bool,
}

fn default_accuracy() -> f64 {
    0.7
}

#[derive(Debug, Deserialize, Default)]
pub struct ContributionMetadata {
    #[serde(rename = "accuracyMetrics")]
    pub accuracy_metrics: Option<AccuracyMetrics>,
}

pub struct QualityEvaluator<'a> {
    ledger: &'a LedgerClient,
    reputation: &'a ReputationStore,
}

impl<'a> QualityEvaluator<'a> {
    pub fn new(ledger: &'a LedgerClient, reputation: &'a ReputationStore) -> Self {
        Self { ledger, reputation }
    }

    /// Computes final metrics for a single submission. Never fails: a
    /// missing contribution, a ledger outage, or a malformed document all
    /// fall back to the documented defaults (spec.md §4.4 step 2).
    pub async fn evaluate(
        &self,
        round_id: &str,
        participant_id: &str,
        weights: &WeightSet,
    ) -> QualityMetrics {
        let contribution = self.ledger.fetch_contribution(round_id, participant_id).await;

        let (reported_accuracy, reported_nan, reported_inf, self_certified) = match contribution {
            Some(ContributionMetadata {
                accuracy_metrics: Some(m),
            }) => {
                info!(
                    participant = participant_id,
                    accuracy = m.accuracy,
                    "\u{1f4ca} [AGGREGATOR] using self-reported metrics"
                );
                (m.accuracy, m.has_nan_predictions, m.has_inf_predictions, m.self_certified)
            }
            _ => {
                warn!(
                    participant = participant_id,
                    "\u{26a0}\u{fe0f} [AGGREGATOR] no reported metrics, using weight analysis only"
                );
                (0.7, false, false, false)
            }
        };

        // Prefer scanned NaN/Inf flags over reported ones when the
        // loaded weights carry their own signal (Open Question (a)).
        let has_nan = weights.has_nan() || reported_nan;
        let has_inf = weights.has_inf() || reported_inf;

        let avg_weight_magnitude = weights.avg_magnitude();
        let weight_variance = weights.variance();

        let reputation = self.reputation.get_or_init(participant_id).await;
        let trust_factor = 0.5 + 0.5 * reputation;

        let mut quality_score = reported_accuracy * trust_factor;

        if has_nan || has_inf {
            quality_score *= 0.5;
            warn!(
                participant = participant_id,
                "\u{26a0}\u{fe0f} [AGGREGATOR] model contains NaN/Inf values - reducing score"
            );
        }

        if avg_weight_magnitude > 10.0 {
            quality_score *= 0.8;
            warn!(
                participant = participant_id,
                "\u{26a0}\u{fe0f} [AGGREGATOR] model has large weights - reducing score"
            );
        }

        if self_certified && reputation > 0.7 {
            quality_score = (quality_score * 1.1).min(1.0);
        }

        info!(
            participant = participant_id,
            quality_score,
            reputation,
            trust_factor,
            "\u{1f4ca} [AGGREGATOR] final quality score"
        );

        QualityMetrics {
            accuracy: reported_accuracy,
            has_nan,
            has_inf,
            avg_weight_magnitude,
            weight_variance,
            self_certified,
            reputation,
            trust_factor,
            quality_score,
        }
    }
}
