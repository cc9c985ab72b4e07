//! Environment-driven service configuration.

use std::env;
use std::time::Duration;

/// Everything the binary needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub mongodb_url: String,
    pub database_name: String,

    pub llm_base_url: String,
    pub llm_api_key: String,
    pub classifier_model: String,
    pub extractor_model: String,
    pub verifier_model: String,
    pub summarizer_model: String,
    pub greeting_model: String,

    /// Interval between job cycles.
    pub poll_interval: Duration,
    /// Upper bound on the synthesizer's wait for task replies.
    pub synth_max_wait: Duration,
    /// Re-check cadence inside that wait.
    pub synth_check_interval: Duration,
    /// TTL on task-execution and related locks.
    pub lock_ttl: Duration,
    /// Ambiguous executor verdicts tolerated before a task is failed.
    pub stale_verdict_limit: u32,
    pub greeting_history_limit: usize,

    /// Senders allowed into the pipeline; empty means everyone.
    pub allowed_senders: Vec<String>,

    pub graph_tenant_id: String,
    pub graph_client_id: String,
    pub graph_client_secret: String,
    pub graph_user_email: String,

    pub slack_bot_token: String,
    pub slack_channels: Vec<String>,

    pub git_agent_url: String,
    pub jira_agent_url: String,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            mongodb_url: resolve_string("MONGODB_URL", "mongodb://localhost:27017"),
            database_name: resolve_string("MONGODB_DATABASE", "pipeline"),

            llm_base_url: resolve_string("LLM_API_URL", "https://api.openai.com/v1"),
            llm_api_key: resolve_string("LLM_API_KEY", ""),
            classifier_model: resolve_string("CLASSIFIER_MODEL", "gpt-4o-mini"),
            extractor_model: resolve_string("EXTRACTOR_MODEL", "gpt-4o-mini"),
            verifier_model: resolve_string("VERIFIER_MODEL", "llama-3.3-70b-versatile"),
            summarizer_model: resolve_string("SUMMARIZER_MODEL", "llama-3.3-70b-versatile"),
            greeting_model: resolve_string("GREETING_MODEL", "llama3-8b-8192"),

            poll_interval: Duration::from_secs(resolve_u64("CHECK_INTERVAL", 10)),
            synth_max_wait: Duration::from_secs(resolve_u64("SYNTH_MAX_WAIT_SECS", 300)),
            synth_check_interval: Duration::from_secs(resolve_u64("SYNTH_CHECK_INTERVAL_SECS", 5)),
            lock_ttl: Duration::from_secs(resolve_u64("LOCK_TTL_SECS", 300)),
            stale_verdict_limit: resolve_u64("STALE_VERDICT_LIMIT", 3) as u32,
            greeting_history_limit: resolve_u64("GREETING_HISTORY_LIMIT", 10) as usize,

            allowed_senders: resolve_list("ALLOWED_SENDERS"),

            graph_tenant_id: resolve_string("GRAPH_TENANT_ID", ""),
            graph_client_id: resolve_string("GRAPH_CLIENT_ID", ""),
            graph_client_secret: resolve_string("GRAPH_CLIENT_SECRET", ""),
            graph_user_email: resolve_string("GRAPH_USER_EMAIL", ""),

            slack_bot_token: resolve_string("SLACK_BOT_TOKEN", ""),
            slack_channels: resolve_list("SLACK_CHANNELS"),

            git_agent_url: resolve_string("GIT_AGENT_URL", ""),
            jira_agent_url: resolve_string("JIRA_AGENT_URL", ""),
        }
    }
}

fn resolve_string(key: &str, default_value: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default_value.to_string())
}

fn resolve_u64(key: &str, default_value: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}

fn resolve_list(key: &str) -> Vec<String> {
    env::var(key)
        .ok()
        .map(|value| {
            value
                .split(',')
                .map(|entry| entry.trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_without_env() {
        env::remove_var("CHECK_INTERVAL");
        env::remove_var("SYNTH_MAX_WAIT_SECS");
        env::remove_var("ALLOWED_SENDERS");

        let config = ServiceConfig::from_env();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.synth_max_wait, Duration::from_secs(300));
        assert!(config.allowed_senders.is_empty());
    }

    #[test]
    #[serial]
    fn list_parsing_trims_entries() {
        env::set_var("ALLOWED_SENDERS", " a@x.com, b@y.com ,, ");
        let config = ServiceConfig::from_env();
        assert_eq!(config.allowed_senders, vec!["a@x.com", "b@y.com"]);
        env::remove_var("ALLOWED_SENDERS");
    }

    #[test]
    #[serial]
    fn invalid_number_falls_back() {
        env::set_var("CHECK_INTERVAL", "soon");
        let config = ServiceConfig::from_env();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        env::remove_var("CHECK_INTERVAL");
    }
}
