// Engine configuration
// Configuration is env-driven with typed defaults; the binary loads .env
// via dotenvy before calling from_env.

use std::time::Duration;

/// Configuration for the research engine
#[derive(Debug, Clone)]
pub struct DeeprConfig {
    /// Poller tick interval
    pub poll_interval: Duration,
    /// Campaign stepper tick interval (drives delayed topic retries)
    pub campaign_step_interval: Duration,
    /// A job stuck in `submitting` longer than this is failed
    pub submit_timeout: Duration,
    /// A `processing` job with no progress for this long is flagged, not cancelled
    pub stuck_threshold: Duration,
    /// Upper bound on a single state transition before rollback
    pub lock_timeout: Duration,
    /// Global admission limit on in-flight jobs
    pub max_inflight_jobs: usize,
    /// Per-campaign parallel dispatch limit
    pub max_parallel_per_campaign: usize,
    /// Auto-continue planning rounds; hard-clamped to MAX_ROUNDS_CEILING
    pub max_rounds: i32,
    /// Base delay for topic retry backoff
    pub retry_base: Duration,
    /// Backoff multiplier per attempt
    pub retry_factor: u32,
    /// Attempts per retryable topic
    pub max_topic_attempts: i32,
    /// Token budget for chained context summaries
    pub context_token_budget: usize,
    /// Daily spend limit in USD
    pub daily_budget: Option<f64>,
    /// Calendar-month spend limit in USD
    pub monthly_budget: Option<f64>,
    /// Consecutive `unknown` polls before a job is failed as lost
    pub unknown_poll_limit: i32,
}

/// Hard ceiling on auto-continue rounds, regardless of configuration
pub const MAX_ROUNDS_CEILING: i32 = 5;

impl Default for DeeprConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            campaign_step_interval: Duration::from_secs(5),
            submit_timeout: Duration::from_secs(60),
            stuck_threshold: Duration::from_secs(30 * 60),
            lock_timeout: Duration::from_secs(5),
            max_inflight_jobs: 16,
            max_parallel_per_campaign: 4,
            max_rounds: 3,
            retry_base: Duration::from_secs(30),
            retry_factor: 2,
            max_topic_attempts: 3,
            context_token_budget: 3_000,
            daily_budget: None,
            monthly_budget: None,
            unknown_poll_limit: 3,
        }
    }
}

impl DeeprConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_secs("DEEPR_POLL_INTERVAL_SECS", defaults.poll_interval),
            campaign_step_interval: env_secs(
                "DEEPR_CAMPAIGN_STEP_INTERVAL_SECS",
                defaults.campaign_step_interval,
            ),
            submit_timeout: env_secs("DEEPR_SUBMIT_TIMEOUT_SECS", defaults.submit_timeout),
            stuck_threshold: env_secs("DEEPR_STUCK_THRESHOLD_SECS", defaults.stuck_threshold),
            lock_timeout: env_secs("DEEPR_LOCK_TIMEOUT_SECS", defaults.lock_timeout),
            max_inflight_jobs: env_parse("DEEPR_MAX_INFLIGHT_JOBS", defaults.max_inflight_jobs),
            max_parallel_per_campaign: env_parse(
                "DEEPR_MAX_PARALLEL_PER_CAMPAIGN",
                defaults.max_parallel_per_campaign,
            ),
            max_rounds: env_parse("DEEPR_MAX_ROUNDS", defaults.max_rounds),
            retry_base: env_secs("DEEPR_RETRY_BASE_SECS", defaults.retry_base),
            retry_factor: env_parse("DEEPR_RETRY_FACTOR", defaults.retry_factor),
            max_topic_attempts: env_parse("DEEPR_MAX_TOPIC_ATTEMPTS", defaults.max_topic_attempts),
            context_token_budget: env_parse(
                "DEEPR_CONTEXT_TOKEN_BUDGET",
                defaults.context_token_budget,
            ),
            daily_budget: env_opt("DEEPR_DAILY_BUDGET_USD"),
            monthly_budget: env_opt("DEEPR_MONTHLY_BUDGET_USD"),
            unknown_poll_limit: env_parse("DEEPR_UNKNOWN_POLL_LIMIT", defaults.unknown_poll_limit),
        }
    }

    /// Configured rounds, never above the hard ceiling
    pub fn effective_max_rounds(&self) -> i32 {
        self.max_rounds.min(MAX_ROUNDS_CEILING)
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DeeprConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.submit_timeout, Duration::from_secs(60));
        assert_eq!(config.stuck_threshold, Duration::from_secs(1800));
        assert_eq!(config.max_parallel_per_campaign, 4);
        assert_eq!(config.max_rounds, 3);
        assert_eq!(config.max_topic_attempts, 3);
    }

    #[test]
    fn max_rounds_is_clamped() {
        let config = DeeprConfig {
            max_rounds: 40,
            ..DeeprConfig::default()
        };
        assert_eq!(config.effective_max_rounds(), MAX_ROUNDS_CEILING);
    }
}
