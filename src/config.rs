/// Environment-backed configuration
///
/// Every value here has a default matching the original service so the
/// aggregator runs out of the box in a dev compose stack; production
/// deployments override via environment variables.
use anyhow::{anyhow, Result};

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub ws_url: String,
    pub gateway_url: String,
    pub blob_handler_url: String,
    pub model_dir: String,

    pub min_threshold: f64,
    pub max_threshold: f64,
    pub initial_threshold: f64,
    pub threshold_history_size: usize,
    pub threshold_adjustment_rate: f64,

    pub reputation_init: f64,
    pub reputation_max: f64,
    pub reputation_min: f64,
    pub reputation_reward: f64,
    pub reputation_penalty: f64,
    pub reputation_penalty_nonparticipation: f64,

    pub round_timeout_minutes: u64,
    pub default_participants: Vec<String>,
}

impl AggregatorConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            ws_url: env_or("AGGREGATOR_WS_URL", "ws://hlf-gateway-aggregator:8890/ws"),
            gateway_url: env_or("AGGREGATOR_GATEWAY_URL", "http://hlf-gateway-aggregator:8890"),
            blob_handler_url: env_or("MINIO_HANDLER_URL", "http://minio-handler:9002"),
            model_dir: env_or("MODEL_DIR", "/models"),

            min_threshold: parse_env("MIN_THRESHOLD", 0.5)?,
            max_threshold: parse_env("MAX_THRESHOLD", 0.95)?,
            initial_threshold: parse_env("INITIAL_THRESHOLD", 0.75)?,
            threshold_history_size: parse_env("THRESHOLD_HISTORY_SIZE", 5)?,
            threshold_adjustment_rate: parse_env("THRESHOLD_ADJUSTMENT_RATE", 0.05)?,

            reputation_init: parse_env("REPUTATION_INIT", 0.5)?,
            reputation_max: parse_env("REPUTATION_MAX", 1.0)?,
            reputation_min: parse_env("REPUTATION_MIN", 0.1)?,
            reputation_reward: parse_env("REPUTATION_REWARD", 0.05)?,
            reputation_penalty: parse_env("REPUTATION_PENALTY", 0.1)?,
            reputation_penalty_nonparticipation: parse_env(
                "REPUTATION_PENALTY_NONPARTICIPATION",
                0.15,
            )?,

            round_timeout_minutes: parse_env("ROUND_TIMEOUT_MINUTES", 3)?,
            default_participants: env_list(
                "DEFAULT_PARTICIPANTS",
                &["dbs", "ing", "ocbc"],
            ),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.min_threshold > self.max_threshold {
            return Err(anyhow!(
                "MIN_THRESHOLD ({}) must be <= MAX_THRESHOLD ({})",
                self.min_threshold,
                self.max_threshold
            ));
        }
        if !(self.min_threshold..=self.max_threshold).contains(&self.initial_threshold) {
            return Err(anyhow!(
                "INITIAL_THRESHOLD ({}) must be within [MIN_THRESHOLD, MAX_THRESHOLD]",
                self.initial_threshold
            ));
        }
        if self.reputation_min > self.reputation_max {
            return Err(anyhow!(
                "REPUTATION_MIN ({}) must be <= REPUTATION_MAX ({})",
                self.reputation_min,
                self.reputation_max
            ));
        }
        Ok(())
    }

    pub fn round_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.round_timeout_minutes as i64)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}
