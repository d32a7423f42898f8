/// Event listener
///
/// Maintains a persistent WebSocket subscription to the ledger's push
/// stream, redispatching decoded events into the round coordinator
/// (spec.md §4.1). Reconnects with a fixed backoff forever; never exits.
use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::coordinator::RoundCoordinator;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RoundStartedPayload {
    round_id: String,
}

#[derive(Debug, Deserialize)]
struct ModelUploadedPayload {
    round_id: String,
    bank_id: String,
    model_uri: String,
}

#[derive(Debug, Deserialize)]
struct StartAggregationPayload {
    round_id: String,
    submissions: HashMap<String, String>,
}

/// Runs forever: connect, stream events until the connection drops, sleep,
/// reconnect. A single misbehaving message never brings the loop down.
pub async fn run(ws_url: String, coordinator: RoundCoordinator) {
    loop {
        info!(ws_url = %ws_url, "\u{1f50c} [AGGREGATOR] connecting to event stream");
        match connect_async(&ws_url).await {
            Ok((stream, _response)) => {
                info!("\u{2705} [AGGREGATOR] event stream connected");
                let (_write, mut read) = stream.split();
                while let Some(message) = read.next().await {
                    match message {
                        Ok(Message::Text(text)) => dispatch(&text, &coordinator).await,
                        Ok(Message::Close(_)) => {
                            warn!("\u{1f50c} [AGGREGATOR] event stream closed by server");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "\u{274c} [AGGREGATOR] event stream error");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "\u{274c} [AGGREGATOR] failed to connect to event stream");
            }
        }

        warn!(backoff_secs = RECONNECT_BACKOFF.as_secs(), "\u{1f504} [AGGREGATOR] reconnecting to event stream");
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

async fn dispatch(raw: &str, coordinator: &RoundCoordinator) {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "\u{26a0}\u{fe0f} [AGGREGATOR] failed to parse event envelope");
            return;
        }
    };

    match envelope.event.as_str() {
        "ROUND_STARTED" => match serde_json::from_str::<RoundStartedPayload>(&envelope.data) {
            Ok(payload) => coordinator.on_round_started(&payload.round_id).await,
            Err(e) => warn!(error = %e, "\u{26a0}\u{fe0f} [AGGREGATOR] malformed ROUND_STARTED payload"),
        },
        "MODEL_UPLOADED" => match serde_json::from_str::<ModelUploadedPayload>(&envelope.data) {
            Ok(payload) => {
                coordinator
                    .on_model_uploaded(&payload.round_id, &payload.bank_id, &payload.model_uri)
                    .await
            }
            Err(e) => warn!(error = %e, "\u{26a0}\u{fe0f} [AGGREGATOR] malformed MODEL_UPLOADED payload"),
        },
        "START_AGGREGATION" => match serde_json::from_str::<StartAggregationPayload>(&envelope.data) {
            Ok(payload) => {
                coordinator
                    .on_start_aggregation(&payload.round_id, payload.submissions)
                    .await
            }
            Err(e) => warn!(error = %e, "\u{26a0}\u{fe0f} [AGGREGATOR] malformed START_AGGREGATION payload"),
        },
        other => {
            warn!(event = other, "\u{2753} [AGGREGATOR] unknown event kind, dropping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_round_started() {
        let raw = r#"{"event":"ROUND_STARTED","data":"{\"round_id\":\"r1\",\"initiator\":\"dbs\",\"description\":\"test\"}"}"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.event, "ROUND_STARTED");
        let payload: RoundStartedPayload = serde_json::from_str(&envelope.data).unwrap();
        assert_eq!(payload.round_id, "r1");
    }

    #[test]
    fn envelope_with_unknown_event_still_parses() {
        let raw = r#"{"event":"SOMETHING_ELSE","data":"{}"}"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.event, "SOMETHING_ELSE");
    }
}
