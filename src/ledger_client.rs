/// Ledger HTTP client
///
/// POSTs facts (quality events, reputation updates, final models) and GETs
/// contribution metadata over HTTP (spec.md §4, §6). All calls are
/// best-effort: failures are logged and surfaced to the caller, never
/// panic, and never roll back local state.
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::domain::RoundHistoryEntry;
use crate::quality::ContributionMetadata;

#[derive(Clone)]
pub struct LedgerClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ReputationUpdateRequest<'a> {
    #[serde(rename = "participantId")]
    participant_id: &'a str,
    score: f64,
    reason: &'a str,
    #[serde(rename = "roundId")]
    round_id: &'a str,
}

#[derive(Serialize)]
pub struct QualityEvent {
    pub round_id: String,
    pub threshold: f64,
    pub avg_quality: f64,
    pub avg_reputation: f64,
    pub accepted_count: usize,
    pub rejected_count: usize,
    pub participant_metrics: serde_json::Value,
}

#[derive(Serialize)]
struct FinalModelRequest<'a> {
    #[serde(rename = "roundId")]
    round_id: &'a str,
    #[serde(rename = "modelURI")]
    model_uri: &'a str,
    #[serde(rename = "weightHash")]
    weight_hash: &'a str,
    #[serde(rename = "qualityData")]
    quality_data: serde_json::Value,
}

impl LedgerClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// GET /models/contribution?roundId=...&participantId=...
    ///
    /// Absence of contribution metadata is tolerated (spec.md §4.4 step 1);
    /// this returns `None` for any non-success response or network error.
    pub async fn fetch_contribution(
        &self,
        round_id: &str,
        participant_id: &str,
    ) -> Option<ContributionMetadata> {
        let url = format!(
            "{}/models/contribution?roundId={}&participantId={}",
            self.base_url, round_id, participant_id
        );

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<ContributionMetadata>().await {
                    Ok(metadata) => Some(metadata),
                    Err(e) => {
                        warn!(error = %e, "\u{26a0}\u{fe0f} [AGGREGATOR] failed to parse contribution metadata");
                        None
                    }
                }
            }
            Ok(response) => {
                warn!(
                    status = %response.status(),
                    "\u{26a0}\u{fe0f} [AGGREGATOR] failed to get contribution metadata"
                );
                None
            }
            Err(e) => {
                error!(error = %e, "\u{274c} [AGGREGATOR] error getting contribution metadata");
                None
            }
        }
    }

    /// POST /reputation/update
    pub async fn update_reputation(&self, participant_id: &str, score: f64, reason: &str, round_id: &str) {
        let url = format!("{}/reputation/update", self.base_url);
        let body = ReputationUpdateRequest {
            participant_id,
            score,
            reason,
            round_id,
        };

        match self.http.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!(
                    participant = participant_id,
                    score,
                    reason,
                    "\u{2705} [AGGREGATOR] reputation updated on ledger"
                );
            }
            Ok(response) => {
                warn!(
                    status = %response.status(),
                    "\u{26a0}\u{fe0f} [AGGREGATOR] failed to update reputation on ledger"
                );
            }
            Err(e) => {
                error!(error = %e, "\u{274c} [AGGREGATOR] error updating reputation");
            }
        }
    }

    /// POST /events/quality
    pub async fn record_quality_event(&self, event: &QualityEvent) {
        let url = format!("{}/events/quality", self.base_url);
        match self.http.post(&url).json(event).send().await {
            Ok(response) if response.status().is_success() => {
                info!("\u{2705} [AGGREGATOR] quality metrics recorded on ledger");
            }
            Ok(response) => {
                error!(
                    status = %response.status(),
                    "\u{274c} [AGGREGATOR] failed to record quality metrics"
                );
            }
            Err(e) => {
                error!(error = %e, "\u{274c} [AGGREGATOR] error recording quality metrics");
            }
        }
    }

    /// POST /models/final
    pub async fn submit_final_model(
        &self,
        round_id: &str,
        model_uri: &str,
        weight_hash: &str,
        round_history: Option<&RoundHistoryEntry>,
        participants_accepted: usize,
        total_participants: usize,
        non_participants: usize,
        avg_reputation: f64,
        reputation_scores: &std::collections::HashMap<String, f64>,
    ) {
        let url = format!("{}/models/final", self.base_url);
        let quality_data = json!({
            "round_history": round_history,
            "participants_accepted": participants_accepted,
            "total_participants": total_participants,
            "non_participants": non_participants,
            "avg_reputation": avg_reputation,
            "reputation_scores": reputation_scores,
        });

        let body = FinalModelRequest {
            round_id,
            model_uri,
            weight_hash,
            quality_data,
        };

        match self.http.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!(round_id, "\u{2705} [AGGREGATOR] final model submitted successfully");
            }
            Ok(response) => {
                error!(
                    status = %response.status(),
                    "\u{274c} [AGGREGATOR] failed to submit final model"
                );
            }
            Err(e) => {
                error!(error = %e, "\u{274c} [AGGREGATOR] error submitting final model");
            }
        }
    }

    /// Bootstrap reachability probe. Failing here is the one hard exit in
    /// the service (spec.md §7).
    pub async fn probe(&self) -> Result<(), reqwest::Error> {
        self.http.get(&self.base_url).send().await.map(|_| ())
    }
}
