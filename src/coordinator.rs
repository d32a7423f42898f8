/// Round coordinator
///
/// Drives the per-round state machine `OPEN -> COLLECTING -> PROCESSING ->
/// COMPLETED -> REMOVED` (spec.md §4.2), delegating quality evaluation,
/// threshold filtering, reputation updates, and aggregation to their own
/// modules.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::aggregator::{self, EvaluatedSubmission};
use crate::blob_client::BlobClient;
use crate::config::AggregatorConfig;
use crate::domain::{Round, RoundHistoryEntry, RoundStatus, ThresholdState};
use crate::ledger_client::{LedgerClient, QualityEvent};
use crate::quality::QualityEvaluator;
use crate::reputation::ReputationStore;
use crate::threshold::{filter_submission, FilterDecision, ThresholdController};
use crate::weights;

const COMPLETED_GRACE_SECONDS: u64 = 60;

#[derive(Clone)]
pub struct RoundCoordinator {
    active_rounds: Arc<Mutex<HashMap<String, Arc<Mutex<Round>>>>>,
    state: Arc<Mutex<ThresholdState>>,
    reputation: ReputationStore,
    ledger: LedgerClient,
    blob: BlobClient,
    config: AggregatorConfig,
}

impl RoundCoordinator {
    pub fn new(
        state: Arc<Mutex<ThresholdState>>,
        reputation: ReputationStore,
        ledger: LedgerClient,
        blob: BlobClient,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            active_rounds: Arc::new(Mutex::new(HashMap::new())),
            state,
            reputation,
            ledger,
            blob,
            config,
        }
    }

    /// `ROUND_STARTED` — ensures a round entry exists and logs the
    /// expected participant set.
    pub async fn on_round_started(&self, round_id: &str) {
        let round = self.get_or_create_round(round_id).await;
        let expected = round.lock().await.expected.clone();
        info!(
            round_id,
            expected = ?expected,
            "\u{1f3c1} [AGGREGATOR] round started"
        );
    }

    /// `MODEL_UPLOADED` — records a single participant's submission.
    pub async fn on_model_uploaded(&self, round_id: &str, participant_id: &str, model_uri: &str) {
        let round = self.get_or_create_round(round_id).await;
        self.record_submission(round_id, &round, participant_id, model_uri)
            .await;
    }

    /// `START_AGGREGATION` (legacy) — merges pre-collected submissions and
    /// forces processing without waiting for the timeout (Design Notes §9).
    /// Submissions already observed for a participant take precedence.
    pub async fn on_start_aggregation(&self, round_id: &str, submissions: HashMap<String, String>) {
        let round = self.get_or_create_round(round_id).await;
        for (participant_id, uri) in submissions {
            self.record_submission(round_id, &round, &participant_id, &uri)
                .await;
        }
        self.try_transition_to_processing(round_id, round).await;
    }

    async fn get_or_create_round(&self, round_id: &str) -> Arc<Mutex<Round>> {
        let mut rounds = self.active_rounds.lock().await;
        if let Some(round) = rounds.get(round_id) {
            return round.clone();
        }
        let expected = self.config.default_participants.iter().cloned().collect();
        let round = Arc::new(Mutex::new(Round::new(round_id.to_string(), expected)));
        rounds.insert(round_id.to_string(), round.clone());
        round
    }

    async fn record_submission(
        &self,
        round_id: &str,
        round: &Arc<Mutex<Round>>,
        participant_id: &str,
        model_uri: &str,
    ) {
        let (newly_recorded, deadline_needed, all_submitted) = {
            let mut guard = round.lock().await;
            if guard.status == RoundStatus::Open {
                guard.status = RoundStatus::Collecting;
            }
            let needs_deadline = guard.deadline.is_none();
            if needs_deadline {
                guard.deadline = Some(Utc::now() + self.config.round_timeout());
            }
            let recorded = guard.record_submission(participant_id, model_uri);
            (recorded, needs_deadline, guard.all_expected_submitted())
        };

        if !newly_recorded {
            info!(
                round_id,
                participant = participant_id,
                "\u{1f501} [AGGREGATOR] duplicate submission ignored"
            );
            return;
        }

        info!(
            round_id,
            participant = participant_id,
            "\u{1f4e6} [AGGREGATOR] model submission recorded"
        );

        if deadline_needed {
            self.spawn_timeout(round_id.to_string(), round.clone());
        }

        if all_submitted {
            self.try_transition_to_processing(round_id, round.clone())
                .await;
        }
    }

    fn spawn_timeout(&self, round_id: String, round: Arc<Mutex<Round>>) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let deadline = round.lock().await.deadline;
            let Some(deadline) = deadline else { return };
            let remaining = (deadline - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(0));
            tokio::time::sleep(remaining).await;
            coordinator
                .try_transition_to_processing(&round_id, round)
                .await;
        });
    }

    /// Exactly-once `COLLECTING -> PROCESSING` transition, guarded by the
    /// round's own lock. Losers of the race return silently.
    async fn try_transition_to_processing(&self, round_id: &str, round: Arc<Mutex<Round>>) {
        {
            let mut guard = round.lock().await;
            if guard.status != RoundStatus::Collecting {
                return;
            }
            guard.status = RoundStatus::Processing;
        }

        info!(round_id, "\u{2699}\u{fe0f} [AGGREGATOR] round entering processing");

        let coordinator = self.clone();
        let round_id = round_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = coordinator.process_round(&round_id, &round).await {
                error!(round_id = %round_id, error = %e, "\u{274c} [AGGREGATOR] round processing failed");
            }
            coordinator.finish_round(&round_id, round).await;
        });
    }

    async fn process_round(&self, round_id: &str, round: &Arc<Mutex<Round>>) -> crate::error::Result<()> {
        let (submissions, non_participants) = {
            let guard = round.lock().await;
            (guard.submissions.clone(), guard.non_participants())
        };

        for participant_id in &non_participants {
            let new_rep = self
                .reputation
                .apply_delta(participant_id, -self.config.reputation_penalty_nonparticipation)
                .await;
            self.ledger
                .update_reputation(
                    participant_id,
                    new_rep,
                    &format!("Non-participation in round {round_id}"),
                    round_id,
                )
                .await;
            warn!(
                round_id,
                participant = participant_id.as_str(),
                new_rep,
                "\u{1f6ab} [AGGREGATOR] penalized non-participant"
            );
        }

        let mut loaded = Vec::new();
        for (participant_id, _uri) in &submissions {
            match self.blob.download(round_id, participant_id).await {
                Ok(path) => match tokio::fs::read(&path).await {
                    Ok(bytes) => match weights::deserialize(&bytes) {
                        Ok(weights) => loaded.push((participant_id.clone(), weights)),
                        Err(e) => warn!(round_id, participant = participant_id.as_str(), error = %e, "\u{26a0}\u{fe0f} [AGGREGATOR] failed to decode downloaded weights"),
                    },
                    Err(e) => warn!(round_id, participant = participant_id.as_str(), error = %e, "\u{26a0}\u{fe0f} [AGGREGATOR] failed to read downloaded weights"),
                },
                Err(e) => warn!(round_id, participant = participant_id.as_str(), error = %e, "\u{26a0}\u{fe0f} [AGGREGATOR] failed to download model"),
            }
        }

        if loaded.is_empty() && !submissions.is_empty() {
            return Err(crate::error::AggregatorError::RoundFatal(
                "every model download failed".to_string(),
            ));
        }

        let evaluator = QualityEvaluator::new(&self.ledger, &self.reputation);
        let threshold_controller = ThresholdController::new(self.state.clone(), &self.config);
        let current_threshold = threshold_controller.recompute(round_id).await;

        let mut evaluated = Vec::with_capacity(loaded.len());
        let mut accepted_qualities = Vec::new();
        let mut all_reputations = Vec::new();
        let mut participant_metrics = serde_json::Map::new();

        for (participant_id, weights) in loaded {
            let metrics = evaluator.evaluate(round_id, &participant_id, &weights).await;

            let adjusted = threshold_controller.adjusted_threshold(current_threshold, metrics.reputation);
            let decision = filter_submission(
                metrics.quality_score,
                adjusted,
                current_threshold,
                self.config.reputation_reward,
                self.config.reputation_penalty,
            );

            let accepted = matches!(decision, FilterDecision::Accepted { .. });
            if accepted {
                accepted_qualities.push(metrics.quality_score);
            }

            let (delta, reason) = match decision {
                FilterDecision::Accepted { reward } => (
                    reward,
                    format!("Model accepted (quality score: {:.3})", metrics.quality_score),
                ),
                FilterDecision::Rejected { penalty } => (
                    -penalty,
                    format!(
                        "Model rejected (quality score: {:.3} below threshold {:.3})",
                        metrics.quality_score, adjusted
                    ),
                ),
            };
            let new_rep = self.reputation.apply_delta(&participant_id, delta).await;
            all_reputations.push(new_rep);
            self.ledger
                .update_reputation(&participant_id, new_rep, &reason, round_id)
                .await;

            {
                let mut state = self.state.lock().await;
                state.push_participant_history(&participant_id, metrics.clone());
            }
            participant_metrics.insert(
                participant_id.clone(),
                serde_json::to_value(&metrics).unwrap_or(serde_json::Value::Null),
            );

            info!(
                round_id,
                participant = participant_id.as_str(),
                accepted,
                quality_score = metrics.quality_score,
                "\u{1f9ee} [AGGREGATOR] submission filtered"
            );

            evaluated.push(EvaluatedSubmission {
                participant_id,
                weights,
                reputation: new_rep,
                accepted,
            });
        }

        let num_models = evaluated.len();
        let num_accepted = evaluated.iter().filter(|e| e.accepted).count();
        let avg_quality = if accepted_qualities.is_empty() {
            0.0
        } else {
            accepted_qualities.iter().sum::<f64>() / accepted_qualities.len() as f64
        };
        let avg_reputation = if all_reputations.is_empty() {
            self.config.reputation_init
        } else {
            all_reputations.iter().sum::<f64>() / all_reputations.len() as f64
        };

        let history_entry = RoundHistoryEntry {
            round_id: round_id.to_string(),
            timestamp: Utc::now(),
            avg_quality,
            avg_reputation,
            num_models,
            num_accepted,
            threshold_used: current_threshold,
        };
        {
            let mut state = self.state.lock().await;
            state.push_round_history(history_entry.clone());
        }

        self.ledger
            .record_quality_event(&QualityEvent {
                round_id: round_id.to_string(),
                threshold: current_threshold,
                avg_quality,
                avg_reputation,
                accepted_count: num_accepted,
                rejected_count: num_models - num_accepted,
                participant_metrics: serde_json::Value::Object(participant_metrics),
            })
            .await;

        let selected = aggregator::select_for_aggregation(evaluated)?;
        let aggregated_weights = aggregator::aggregate(&selected)?;

        let model_dir = std::path::Path::new(&self.config.model_dir);
        let (object_path, weight_hash) =
            aggregator::materialize_and_publish(&self.blob, model_dir, round_id, aggregated_weights).await?;

        let reputation_scores = self.reputation.snapshot().await;
        self.ledger
            .submit_final_model(
                round_id,
                &object_path,
                &weight_hash,
                Some(&history_entry),
                num_accepted,
                submissions.len(),
                non_participants.len(),
                avg_reputation,
                &reputation_scores,
            )
            .await;

        info!(round_id, "\u{2705} [AGGREGATOR] round completed");
        Ok(())
    }

    async fn finish_round(&self, round_id: &str, round: Arc<Mutex<Round>>) {
        {
            let mut guard = round.lock().await;
            guard.status = RoundStatus::Completed;
        }

        let coordinator = self.clone();
        let round_id = round_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(COMPLETED_GRACE_SECONDS)).await;
            {
                let mut guard = round.lock().await;
                guard.status = RoundStatus::Removed;
            }
            coordinator.active_rounds.lock().await.remove(&round_id);
            info!(round_id, "\u{1f5d1}\u{fe0f} [AGGREGATOR] round removed from active set");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ThresholdState;
    use std::collections::HashSet;

    fn test_config() -> AggregatorConfig {
        AggregatorConfig {
            ws_url: String::new(),
            gateway_url: "http://localhost:0".into(),
            blob_handler_url: "http://localhost:0".into(),
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

    fn coordinator() -> RoundCoordinator {
        let config = test_config();
        let state = Arc::new(Mutex::new(ThresholdState::new(
            config.initial_threshold,
            config.threshold_history_size,
        )));
        let reputation = ReputationStore::new(state.clone(), &config);
        let ledger = LedgerClient::new(config.gateway_url.clone());
        let blob = BlobClient::new(config.blob_handler_url.clone(), config.model_dir.clone());
        RoundCoordinator::new(state, reputation, ledger, blob, config)
    }

    #[tokio::test]
    async fn first_submission_moves_round_to_collecting_and_sets_deadline() {
        let coordinator = coordinator();
        let round = coordinator.get_or_create_round("r1").await;
        coordinator
            .record_submission("r1", &round, "dbs", "uri-1")
            .await;
        let guard = round.lock().await;
        assert_eq!(guard.status, RoundStatus::Collecting);
        assert!(guard.deadline.is_some());
    }

    #[tokio::test]
    async fn duplicate_submission_does_not_overwrite_uri() {
        let coordinator = coordinator();
        let round = coordinator.get_or_create_round("r1").await;
        coordinator
            .record_submission("r1", &round, "dbs", "uri-1")
            .await;
        coordinator
            .record_submission("r1", &round, "dbs", "uri-2")
            .await;
        let guard = round.lock().await;
        assert_eq!(guard.submissions["dbs"], "uri-1");
    }

    #[tokio::test]
    async fn transition_to_processing_is_exactly_once() {
        let coordinator = coordinator();
        let round = Arc::new(Mutex::new(Round::new(
            "r1".into(),
            HashSet::from(["dbs".to_string()]),
        )));
        round.lock().await.status = RoundStatus::Collecting;

        coordinator
            .try_transition_to_processing("r1", round.clone())
            .await;
        // Second attempt should observe Processing (or further) and no-op.
        let status_after_first = round.lock().await.status;
        assert_eq!(status_after_first, RoundStatus::Processing);
    }
}
