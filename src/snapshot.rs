/// State snapshotter
///
/// Periodic best-effort persistence of `ThresholdState` to
/// `MODEL_DIR/threshold_state.json` (spec.md §4.8). The ledger remains the
/// authoritative record; this is a warm-restart convenience only.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::domain::ThresholdState;

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(300);
const SNAPSHOT_FILENAME: &str = "threshold_state.json";

fn snapshot_path(model_dir: &Path) -> PathBuf {
    model_dir.join(SNAPSHOT_FILENAME)
}

/// Loads a prior snapshot if present. Absence (first boot, or a deleted
/// file) is not an error — the caller keeps its freshly constructed
/// defaults.
pub async fn load(model_dir: &Path, state: &Arc<Mutex<ThresholdState>>) {
    let path = snapshot_path(model_dir);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(_) => {
            info!(path = %path.display(), "\u{1f4c2} [AGGREGATOR] no snapshot found, starting fresh");
            return;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(snapshot) => {
            state.lock().await.restore_from(snapshot);
            info!(path = %path.display(), "\u{1f4e5} [AGGREGATOR] restored threshold state from snapshot");
        }
        Err(e) => {
            error!(error = %e, "\u{274c} [AGGREGATOR] failed to parse snapshot, starting fresh");
        }
    }
}

pub async fn write_once(model_dir: &Path, state: &Arc<Mutex<ThresholdState>>) {
    let snapshot = state.lock().await.to_snapshot();
    let path = snapshot_path(model_dir);

    let bytes = match serde_json::to_vec_pretty(&snapshot) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "\u{274c} [AGGREGATOR] failed to serialize snapshot");
            return;
        }
    };

    if let Err(e) = tokio::fs::write(&path, bytes).await {
        error!(error = %e, path = %path.display(), "\u{274c} [AGGREGATOR] failed to write snapshot");
        return;
    }
    info!(path = %path.display(), "\u{1f4be} [AGGREGATOR] threshold state snapshotted");
}

/// Runs forever, writing a snapshot every `SNAPSHOT_INTERVAL`. A failed
/// write is logged and retried on the next tick.
pub async fn run(model_dir: PathBuf, state: Arc<Mutex<ThresholdState>>) {
    let mut interval = tokio::time::interval(SNAPSHOT_INTERVAL);
    loop {
        interval.tick().await;
        write_once(&model_dir, &state).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RoundHistoryEntry;
    use chrono::Utc;

    #[tokio::test]
    async fn write_then_load_round_trips_threshold_and_reputation() {
        let dir = std::env::temp_dir().join(format!(
            "aggregator-snapshot-test-{:?}",
            std::thread::current().id()
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let state = Arc::new(Mutex::new(ThresholdState::new(0.82, 5)));
        {
            let mut guard = state.lock().await;
            guard.reputation_scores.insert("dbs".into(), 0.9);
            guard.reputation_scores.insert("ing".into(), 0.3);
            guard.push_round_history(RoundHistoryEntry {
                round_id: "r1".into(),
                timestamp: Utc::now(),
                avg_quality: 0.8,
                avg_reputation: 0.6,
                num_models: 2,
                num_accepted: 2,
                threshold_used: 0.82,
            });
        }

        write_once(&dir, &state).await;

        let restored = Arc::new(Mutex::new(ThresholdState::new(0.75, 5)));
        load(&dir, &restored).await;

        let guard = restored.lock().await;
        assert_eq!(guard.current_threshold, 0.82);
        assert_eq!(guard.reputation_scores["dbs"], 0.9);
        assert_eq!(guard.reputation_scores["ing"], 0.3);
        assert_eq!(guard.round_history.len(), 1);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn load_with_no_file_keeps_defaults() {
        let dir = std::env::temp_dir().join(format!(
            "aggregator-snapshot-missing-{:?}",
            std::thread::current().id()
        ));
        let state = Arc::new(Mutex::new(ThresholdState::new(0.75, 5)));
        load(&dir, &state).await;
        assert_eq!(state.lock().await.current_threshold, 0.75);
    }
}
