//! Bridge to the external GitHub/Jira agent services.
//!
//! The pipeline never performs repository or ticket operations itself; it
//! hands a task description to a per-platform agent endpoint and gets back
//! whatever free-form text the agent produced. Interpreting that text is the
//! caller's job.

use std::time::Duration;

use serde::Serialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("agent endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },
    #[error("agent endpoint not configured ({0})")]
    MissingEndpoint(String),
}

/// Executes one task description against an external platform agent.
pub trait PlatformRunner: Send + Sync {
    fn run(&self, description: &str) -> Result<String, RunnerError>;
}

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    query: &'a str,
}

/// Runner that forwards task descriptions to an HTTP agent endpoint.
///
/// The endpoint accepts `{"query": "..."}` and answers with a plain-text or
/// JSON body describing what it did. The body is returned verbatim.
#[derive(Debug, Clone)]
pub struct HttpAgentRunner {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpAgentRunner {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    /// Build a runner from an environment variable holding the endpoint URL.
    pub fn from_env(var: &str) -> Result<Self, RunnerError> {
        let endpoint = std::env::var(var)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| RunnerError::MissingEndpoint(var.to_string()))?;
        Ok(Self::new(endpoint))
    }
}

impl PlatformRunner for HttpAgentRunner {
    fn run(&self, description: &str) -> Result<String, RunnerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RunRequest { query: description })
            .send()?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            return Err(RunnerError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_agent_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/run")
            .match_body(mockito::Matcher::JsonString(
                r#"{"query":"create repo demo"}"#.to_string(),
            ))
            .with_status(200)
            .with_body("repository demo created at https://github.com/acme/demo")
            .create();

        let runner = HttpAgentRunner::new(format!("{}/run", server.url()));
        let result = runner.run("create repo demo").expect("run");
        assert!(result.contains("repository demo created"));
        mock.assert();
    }

    #[test]
    fn run_surfaces_endpoint_errors() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/run")
            .with_status(500)
            .with_body("agent crashed")
            .create();

        let runner = HttpAgentRunner::new(format!("{}/run", server.url()));
        let err = runner.run("anything").expect_err("should fail");
        match err {
            RunnerError::Endpoint { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("agent crashed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn from_env_requires_endpoint() {
        std::env::remove_var("TEST_AGENT_URL_UNSET");
        let err = HttpAgentRunner::from_env("TEST_AGENT_URL_UNSET").expect_err("missing");
        assert!(matches!(err, RunnerError::MissingEndpoint(_)));
    }
}
