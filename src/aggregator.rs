/// Reputation-weighted federated averaging
///
/// Takes the evaluated submissions for a round, applies the failsafe
/// empty-accept rule, produces a reputation-normalized weighted average,
/// materializes the result, and publishes it (spec.md §4.7).
use std::path::Path;

use tracing::{info, warn};

use crate::blob_client::BlobClient;
use crate::error::{AggregatorError, Result};
use crate::weights::{weight_hash, AggregatedModel, WeightSet};

/// One successfully downloaded and evaluated submission, tagged with
/// whether it passed threshold filtering.
pub struct EvaluatedSubmission {
    pub participant_id: String,
    pub weights: WeightSet,
    pub reputation: f64,
    pub accepted: bool,
}

/// Applies the failsafe rule: if nothing was accepted but submissions
/// exist, promote all of them. An empty input aborts the round.
pub fn select_for_aggregation(
    evaluated: Vec<EvaluatedSubmission>,
) -> Result<Vec<EvaluatedSubmission>> {
    let accepted_count = evaluated.iter().filter(|e| e.accepted).count();
    if accepted_count > 0 {
        return Ok(evaluated.into_iter().filter(|e| e.accepted).collect());
    }
    if evaluated.is_empty() {
        return Err(AggregatorError::RoundFatal(
            "no models available to aggregate".to_string(),
        ));
    }
    warn!(
        count = evaluated.len(),
        "\u{26a0}\u{fe0f} [AGGREGATOR] no models passed quality threshold, failsafe promoting all submissions"
    );
    Ok(evaluated)
}

/// Reputation-normalized FedAvg: weight by reputation, falling back to a
/// uniform split if every participant's reputation is zero.
pub fn aggregate(models: &[EvaluatedSubmission]) -> Result<WeightSet> {
    let total_reputation: f64 = models.iter().map(|m| m.reputation).sum();
    let n = models.len() as f64;

    let weighted: Vec<(&WeightSet, f64)> = models
        .iter()
        .map(|m| {
            let weight = if total_reputation > 0.0 {
                m.reputation / total_reputation
            } else {
                1.0 / n
            };
            (&m.weights, weight)
        })
        .collect();

    crate::weights::weighted_average(&weighted).map_err(AggregatorError::RoundFatal)
}

/// Writes the aggregated model to `MODEL_DIR/<round>_aggregated_model.h5`,
/// hashes it, and uploads it through the blob client.
pub async fn materialize_and_publish(
    blob: &BlobClient,
    model_dir: &Path,
    round_id: &str,
    weights: WeightSet,
) -> Result<(String, String)> {
    let model = AggregatedModel::from_weights(weights);
    let bytes = model.serialize();
    let hash = weight_hash(&bytes);

    let local_path = model_dir.join(format!("{round_id}_aggregated_model.h5"));
    tokio::fs::write(&local_path, &bytes).await?;

    info!(
        round_id,
        weight_hash = %hash,
        "\u{1f9ee} [AGGREGATOR] aggregated model materialized"
    );

    let object_path = blob.upload(&local_path, round_id).await?;
    Ok((object_path, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::Layer;

    fn ws(magnitude: f32) -> WeightSet {
        WeightSet::new(vec![Layer::new(vec![magnitude, magnitude], 1, 2, vec![0.0, 0.0])])
    }

    #[test]
    fn select_for_aggregation_keeps_only_accepted_when_any_accepted() {
        let evaluated = vec![
            EvaluatedSubmission {
                participant_id: "dbs".into(),
                weights: ws(1.0),
                reputation: 0.5,
                accepted: true,
            },
            EvaluatedSubmission {
                participant_id: "ing".into(),
                weights: ws(2.0),
                reputation: 0.3,
                accepted: false,
            },
        ];
        let selected = select_for_aggregation(evaluated).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].participant_id, "dbs");
    }

    #[test]
    fn select_for_aggregation_promotes_all_when_none_accepted() {
        let evaluated = vec![EvaluatedSubmission {
            participant_id: "dbs".into(),
            weights: ws(1.0),
            reputation: 0.5,
            accepted: false,
        }];
        let selected = select_for_aggregation(evaluated).unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn select_for_aggregation_errors_when_nothing_submitted() {
        assert!(select_for_aggregation(vec![]).is_err());
    }

    #[test]
    fn aggregate_falls_back_to_uniform_weights_when_all_reputations_zero() {
        let models = vec![
            EvaluatedSubmission {
                participant_id: "dbs".into(),
                weights: ws(1.0),
                reputation: 0.0,
                accepted: true,
            },
            EvaluatedSubmission {
                participant_id: "ing".into(),
                weights: ws(3.0),
                reputation: 0.0,
                accepted: true,
            },
        ];
        let avg = aggregate(&models).unwrap();
        assert_eq!(avg.layers[0].weights, vec![2.0, 2.0]);
    }

    #[test]
    fn aggregate_weights_by_normalized_reputation() {
        let models = vec![
            EvaluatedSubmission {
                participant_id: "dbs".into(),
                weights: ws(0.0),
                reputation: 1.0,
                accepted: true,
            },
            EvaluatedSubmission {
                participant_id: "ing".into(),
                weights: ws(4.0),
                reputation: 3.0,
                accepted: true,
            },
        ];
        let avg = aggregate(&models).unwrap();
        // weights normalized to 0.25/0.75 -> 0*0.25 + 4*0.75 = 3.0
        assert_eq!(avg.layers[0].weights, vec![3.0, 3.0]);
    }
}
