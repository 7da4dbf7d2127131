//! HTTP client for dispatching operations to a remote agent
//!
//! Mirrors the teacher's `api::client::HttpClient`: exponential backoff with
//! a cap, retryable-error classification, and a typed error enum — adapted
//! from "talk to the panel" to "talk to a paired agent's own Docker surface"
//! using the `X-Arcane-Agent-Token` header per spec.

use std::time::Duration;

use bollard::models::{ContainerInspectResponse, ContainerSummary};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::environment::ContainerSpec;

const MAX_RETRIES: u32 = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to parse agent response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("agent returned error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("all retry attempts exhausted: {0}")]
    RetryExhausted(String),

    #[error("local dispatch error: {0}")]
    Local(String),
}

impl AgentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Request(e) => e.is_connect() || e.is_timeout(),
            AgentError::Server { status, .. } => *status >= 500,
            AgentError::Timeout => true,
            _ => false,
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

pub struct AgentClient {
    client: Client,
    base_url: String,
    token: String,
}

impl AgentClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .build()
            .expect("agent http client configuration is valid");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/agent/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<impl Serialize>,
    ) -> AgentResult<T> {
        let url = self.url(path);
        let mut last_error: Option<AgentError> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = Self::backoff(attempt);
                debug!("retrying agent request to {} (attempt {}), waiting {:?}", path, attempt + 1, delay);
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("X-Arcane-Agent-Token", &self.token)
                .header("Accept", "application/json");

            if let Some(ref body) = body {
                request = request.json(body);
            }

            match Self::execute(request).await {
                Ok(response) => return Self::parse(response).await,
                Err(e) => {
                    if e.is_retryable() && attempt < MAX_RETRIES {
                        warn!("agent request to {} failed (attempt {}): {}", path, attempt + 1, e);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(AgentError::RetryExhausted(
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string()),
        ))
    }

    async fn execute(request: RequestBuilder) -> AgentResult<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::Timeout
            } else {
                AgentError::Request(e)
            }
        })?;

        let status = response.status();
        if status.is_server_error() || status.is_client_error() {
            let message = response.text().await.unwrap_or_else(|_| "unknown agent error".to_string());
            return Err(AgentError::Server { status: status.as_u16(), message });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(response);
        }
        Ok(response)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> AgentResult<T> {
        let text = response.text().await.map_err(AgentError::Request)?;
        if text.is_empty() {
            return serde_json::from_str("null").map_err(AgentError::Parse);
        }
        serde_json::from_str(&text).map_err(AgentError::Parse)
    }

    fn backoff(attempt: u32) -> Duration {
        let delay = BASE_RETRY_DELAY * 2u32.pow(attempt - 1);
        std::cmp::min(delay, MAX_RETRY_DELAY)
    }

    pub async fn list_containers(&self, all: bool) -> AgentResult<Vec<ContainerSummary>> {
        self.request(Method::GET, &format!("containers?all={all}"), None::<()>).await
    }

    pub async fn inspect(&self, container_id: &str) -> AgentResult<ContainerInspectResponse> {
        self.request(Method::GET, &format!("containers/{container_id}"), None::<()>).await
    }

    pub async fn create(&self, spec: &ContainerSpec) -> AgentResult<String> {
        #[derive(serde::Deserialize)]
        struct CreateResponse {
            id: String,
        }
        let resp: CreateResponse = self.request(Method::POST, "containers", Some(spec_to_json(spec))).await?;
        Ok(resp.id)
    }

    pub async fn start(&self, container_id: &str) -> AgentResult<()> {
        self.request::<serde_json::Value>(Method::POST, &format!("containers/{container_id}/start"), None::<()>)
            .await
            .map(|_| ())
    }

    pub async fn stop(&self, container_id: &str, timeout_secs: i64) -> AgentResult<()> {
        self.request::<serde_json::Value>(
            Method::POST,
            &format!("containers/{container_id}/stop?timeout={timeout_secs}"),
            None::<()>,
        )
        .await
        .map(|_| ())
    }

    pub async fn restart(&self, container_id: &str, timeout_secs: i64) -> AgentResult<()> {
        self.request::<serde_json::Value>(
            Method::POST,
            &format!("containers/{container_id}/restart?timeout={timeout_secs}"),
            None::<()>,
        )
        .await
        .map(|_| ())
    }

    pub async fn rename(&self, container_id: &str, new_name: &str) -> AgentResult<()> {
        self.request::<serde_json::Value>(
            Method::POST,
            &format!("containers/{container_id}/rename?name={}", urlencoding_minimal(new_name)),
            None::<()>,
        )
        .await
        .map(|_| ())
    }

    pub async fn remove(&self, container_id: &str, force: bool, volumes: bool) -> AgentResult<()> {
        self.request::<serde_json::Value>(
            Method::DELETE,
            &format!("containers/{container_id}?force={force}&volumes={volumes}"),
            None::<()>,
        )
        .await
        .map(|_| ())
    }

    /// `credentials` travels in the request body rather than the query
    /// string since it may carry a registry password.
    pub async fn pull_image(&self, image: &str, credentials: Option<(String, String)>) -> AgentResult<()> {
        let (username, password) = credentials.unzip();
        let body = serde_json::json!({ "username": username, "password": password });
        self.request::<serde_json::Value>(
            Method::POST,
            &format!("images/pull?image={}", urlencoding_minimal(image)),
            Some(body),
        )
        .await
        .map(|_| ())
    }

    pub async fn exec(&self, container_id: &str, cmd: Vec<String>) -> AgentResult<(i64, Vec<u8>)> {
        #[derive(serde::Deserialize)]
        struct ExecResponse {
            exit_code: i64,
            output: String,
        }
        let resp: ExecResponse = self
            .request(Method::POST, &format!("containers/{container_id}/exec"), Some(serde_json::json!({ "cmd": cmd })))
            .await?;
        Ok((resp.exit_code, resp.output.into_bytes()))
    }
}

fn spec_to_json(spec: &ContainerSpec) -> serde_json::Value {
    serde_json::json!({
        "name": spec.name,
        "image": spec.image,
        "env": spec.env,
        "labels": spec.labels,
        "binds": spec.binds,
        "network": spec.network,
        "memory_bytes": spec.memory_bytes,
        "cpu_quota": spec.cpu_quota,
        "restart_policy": spec.restart_policy,
    })
}

/// Minimal percent-encoding for image references used only as a query
/// parameter; image names are already restricted to a safe character set by
/// Docker itself (`[a-z0-9._/:-]`) so this only needs to handle `:` and `/`.
fn urlencoding_minimal(s: &str) -> String {
    s.replace(':', "%3A").replace('/', "%2F")
}
