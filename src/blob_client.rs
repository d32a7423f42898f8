/// Blob store client
///
/// Fetches pre-signed URLs from the blob handler and GETs/PUTs weight
/// files against them (spec.md §4.3). Failures abort the current round's
/// aggregation but never crash the process.
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::error::{AggregatorError, Result};

#[derive(Clone)]
pub struct BlobClient {
    handler_url: String,
    model_dir: PathBuf,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct DownloadResponse {
    #[serde(rename = "downloadUrl")]
    download_url: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
    #[serde(rename = "objectPath")]
    object_path: String,
}

impl BlobClient {
    pub fn new(handler_url: String, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            handler_url,
            model_dir: model_dir.into(),
            http: reqwest::Client::new(),
        }
    }

    /// POST {roundId, bankId} to /download, GET the pre-signed URL, write
    /// to MODEL_DIR/<round>/<participant>.weights.
    pub async fn download(&self, round_id: &str, participant_id: &str) -> Result<PathBuf> {
        info!(
            round_id,
            participant = participant_id,
            "\u{1f4e5} [AGGREGATOR] requesting download url"
        );

        let response = self
            .http
            .post(format!("{}/download", self.handler_url))
            .json(&json!({ "roundId": round_id, "bankId": participant_id }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AggregatorError::TransientNetwork(format!(
                "download url request failed with status {status}"
            )));
        }

        let download: DownloadResponse = response.json().await?;

        let round_dir = self.model_dir.join(round_id);
        tokio::fs::create_dir_all(&round_dir).await?;
        let local_path = round_dir.join(format!("{participant_id}.weights"));

        let model_response = self.http.get(&download.download_url).send().await?;
        if !model_response.status().is_success() {
            return Err(AggregatorError::TransientNetwork(format!(
                "model download failed with status {}",
                model_response.status()
            )));
        }

        let bytes = model_response.bytes().await?;
        tokio::fs::write(&local_path, &bytes).await?;

        info!(
            path = %local_path.display(),
            "\u{2705} [AGGREGATOR] model downloaded and saved"
        );
        Ok(local_path)
    }

    /// POST {roundId, bankId: "aggregator"} to /upload, PUT the file body
    /// to the pre-signed URL, return the object path.
    pub async fn upload(&self, local_path: &PathBuf, round_id: &str) -> Result<String> {
        info!(round_id, "\u{1f4e4} [AGGREGATOR] requesting upload url for final model");

        let response = self
            .http
            .post(format!("{}/upload", self.handler_url))
            .json(&json!({ "roundId": round_id, "bankId": "aggregator" }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AggregatorError::TransientNetwork(format!(
                "upload url request failed with status {}",
                response.status()
            )));
        }

        let upload: UploadResponse = response.json().await?;
        let body = tokio::fs::read(local_path).await?;

        let put_response = self.http.put(&upload.upload_url).body(body).send().await?;
        if !put_response.status().is_success() {
            error!(
                status = %put_response.status(),
                "\u{274c} [AGGREGATOR] failed to upload aggregated model"
            );
            return Err(AggregatorError::TransientNetwork(
                "aggregated model upload failed".to_string(),
            ));
        }

        info!("\u{2705} [AGGREGATOR] aggregated model successfully uploaded");
        Ok(upload.object_path)
    }

    pub fn model_dir(&self) -> &PathBuf {
        &self.model_dir
    }
}
