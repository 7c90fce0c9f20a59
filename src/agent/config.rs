use std::env;

/// Default base URL of the code generation/analysis agent
pub const DEFAULT_AGENT_URL: &str = "http://127.0.0.1:8000";

/// Generation runs one LLM call per model, so it gets a generous budget
pub const DEFAULT_GENERATE_TIMEOUT_SECS: u64 = 60;

/// Analysis compares the candidate against every model's answer
pub const DEFAULT_ANALYZE_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 5;

/// Configuration for the external code agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    pub generate_timeout_secs: u64,
    pub analyze_timeout_secs: u64,
    pub health_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_AGENT_URL.to_string(),
            generate_timeout_secs: DEFAULT_GENERATE_TIMEOUT_SECS,
            analyze_timeout_secs: DEFAULT_ANALYZE_TIMEOUT_SECS,
            health_timeout_secs: DEFAULT_HEALTH_TIMEOUT_SECS,
        }
    }
}

impl AgentConfig {
    /// Creates configuration from environment variables
    ///
    /// Optional environment variables:
    /// - `CODE_AGENT_URL`: agent base URL (default: http://127.0.0.1:8000)
    /// - `CODE_AGENT_GENERATE_TIMEOUT_SECS`: generate timeout (default: 60)
    /// - `CODE_AGENT_ANALYZE_TIMEOUT_SECS`: analyze timeout (default: 120)
    /// - `CODE_AGENT_HEALTH_TIMEOUT_SECS`: liveness probe timeout (default: 5)
    pub fn from_env() -> Self {
        let base_url = env::var("CODE_AGENT_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_AGENT_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            base_url,
            generate_timeout_secs: secs_from_env(
                "CODE_AGENT_GENERATE_TIMEOUT_SECS",
                DEFAULT_GENERATE_TIMEOUT_SECS,
            ),
            analyze_timeout_secs: secs_from_env(
                "CODE_AGENT_ANALYZE_TIMEOUT_SECS",
                DEFAULT_ANALYZE_TIMEOUT_SECS,
            ),
            health_timeout_secs: secs_from_env(
                "CODE_AGENT_HEALTH_TIMEOUT_SECS",
                DEFAULT_HEALTH_TIMEOUT_SECS,
            ),
        }
    }
}

fn secs_from_env(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
