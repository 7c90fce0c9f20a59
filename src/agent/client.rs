use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::AgentConfig;
use super::normalize::AnalyzeRequest;
use super::CodeAgent;
use crate::error::{Result, SessionError};
use crate::store::GeneratedCodes;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    question: &'a str,
    language: &'a str,
}

/// Response from the agent's generate endpoint. A model that produced
/// nothing may come back as `null` or a non-string value.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    generated_codes: Option<BTreeMap<String, Value>>,
}

impl GenerateResponse {
    /// The models that returned code. Empty when none did.
    fn usable_codes(self) -> GeneratedCodes {
        self.generated_codes
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(model, code)| match code {
                Value::String(code) if !code.trim().is_empty() => Some((model, code)),
                _ => None,
            })
            .collect()
    }
}

/// HTTP client for the code generation/analysis agent
pub struct AgentClient {
    config: AgentConfig,
    client: reqwest::Client,
}

impl AgentClient {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SessionError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }
}

#[async_trait]
impl CodeAgent for AgentClient {
    async fn generate(&self, question: &str, language: &str) -> Result<GeneratedCodes> {
        let url = self.endpoint("generate");

        tracing::debug!(url = %url, language = %language, "Requesting reference solutions");

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.config.generate_timeout_secs))
            .json(&GenerateRequest { question, language })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SessionError::upstream(format!(
                "generate returned {}",
                response.status()
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            SessionError::upstream(format!("malformed generate response: {}", e))
        })?;

        let codes = body.usable_codes();
        if codes.is_empty() {
            return Err(SessionError::upstream("No generated code returned from code agent"));
        }
        Ok(codes)
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<Value> {
        let url = self.endpoint("analyze");

        tracing::debug!(url = %url, language = %request.language, "Requesting analysis");

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(self.config.analyze_timeout_secs))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SessionError::upstream(format!(
                "analyze returned {}",
                response.status()
            )));
        }

        let report: Value = response.json().await.map_err(|e| {
            SessionError::upstream(format!("malformed analyze response: {}", e))
        })?;

        if !report.is_object() {
            return Err(SessionError::upstream("analysis report is not an object"));
        }

        Ok(report)
    }

    async fn health(&self) -> bool {
        let url = self.endpoint("");

        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.health_timeout_secs))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Code agent health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_paths() {
        let client = AgentClient::new(AgentConfig {
            base_url: "http://agent.local".to_string(),
            ..AgentConfig::default()
        })
        .unwrap();

        assert_eq!(client.endpoint("generate"), "http://agent.local/generate");
        assert_eq!(client.endpoint(""), "http://agent.local/");
    }

    #[test]
    fn test_generate_response_tolerates_missing_codes() {
        let body: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(body.usable_codes().is_empty());

        let body: GenerateResponse = serde_json::from_str(r#"{"generated_codes":null}"#).unwrap();
        assert!(body.usable_codes().is_empty());

        let body: GenerateResponse =
            serde_json::from_str(r#"{"generated_codes":{"gemini":"print(1)"}}"#).unwrap();
        assert_eq!(body.usable_codes()["gemini"], "print(1)");
    }

    #[test]
    fn test_generate_response_keeps_models_that_answered() {
        let body: GenerateResponse = serde_json::from_str(
            r#"{"generated_codes":{"gemini":"print(1)","claude":null,"chatgpt":"","extra":7}}"#,
        )
        .unwrap();

        let codes = body.usable_codes();
        assert_eq!(codes.len(), 1);
        assert_eq!(codes["gemini"], "print(1)");

        let body: GenerateResponse =
            serde_json::from_str(r#"{"generated_codes":{"gemini":null,"claude":null}}"#).unwrap();
        assert!(body.usable_codes().is_empty());
    }

    #[tokio::test]
    async fn test_generate_timeout_is_an_upstream_failure() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = AgentClient::new(AgentConfig {
            base_url: format!("http://{}", addr),
            generate_timeout_secs: 1,
            ..AgentConfig::default()
        })
        .unwrap();

        let started = std::time::Instant::now();
        let err = client.generate("Reverse a list", "python").await.unwrap_err();
        silent.abort();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(err.kind(), crate::error::ErrorKind::UpstreamFailure);
        assert_eq!(err.client_message(), "code agent failure: code agent request timed out");
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_unhealthy() {
        let client = AgentClient::new(AgentConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            health_timeout_secs: 1,
            ..AgentConfig::default()
        })
        .unwrap();

        assert!(!client.health().await);
    }
}
