//! JSON-over-HTTP generation gateway.
//!
//! `POST {endpoint}` with `{"model": .., "request": GenerationRequest}`;
//! the service answers `{"drafts": [EntityDraft, ..]}`.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use healthsim_config::GenerationConfig;
use healthsim_core::EntityDraft;

use crate::retry::{Attempted, send_with_retry};
use crate::{GenerationError, GenerationGateway, GenerationRequest, RetryConfig};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// Error bodies are truncated to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 2_000;

#[derive(Serialize)]
struct WireRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    request: &'a GenerationRequest,
}

#[derive(Deserialize)]
struct WireResponse {
    drafts: Vec<EntityDraft>,
}

#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
    retry: RetryConfig,
}

impl HttpGateway {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, GenerationError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(GenerationError::NotConfigured);
        }
        Ok(Self {
            client: client_with_timeout(DEFAULT_TIMEOUT_SECS)?,
            endpoint,
            api_key: None,
            model: None,
            retry: RetryConfig::default(),
        })
    }

    /// Build from the `[generation]` config section.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or(GenerationError::NotConfigured)?;
        let mut gateway = Self::new(endpoint)?;
        gateway.api_key = config.resolved_api_key();
        gateway.model.clone_from(&config.model);
        Ok(gateway)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Result<Self, GenerationError> {
        self.client = client_with_timeout(timeout_secs)?;
        Ok(self)
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl GenerationGateway for HttpGateway {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Vec<EntityDraft>, GenerationError> {
        let body = WireRequest {
            model: self.model.as_deref(),
            request,
        };
        let idempotency_key = format!("healthsim-{}", Uuid::new_v4());
        tracing::debug!(endpoint = %self.endpoint, "Sending generation request");

        let build = || {
            let builder = self.client.post(&self.endpoint).json(&body);
            match &self.api_key {
                Some(key) => builder.bearer_auth(key),
                None => builder,
            }
        };
        let response = match send_with_retry(build, &idempotency_key, &self.retry).await {
            Attempted::Response(response) => response,
            Attempted::Failed { attempts, source } => {
                return Err(GenerationError::Transport { attempts, source });
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            tracing::warn!(%status, "Generation request failed");
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| GenerationError::Transport {
                attempts: 1,
                source,
            })?;
        let decoded: WireResponse = serde_json::from_slice(&bytes)
            .map_err(|e| GenerationError::Decode(e.to_string()))?;
        Ok(decoded.drafts)
    }
}

fn client_with_timeout(timeout_secs: u64) -> Result<Client, GenerationError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "User-Agent",
        HeaderValue::from_static(concat!("healthsim/", env!("CARGO_PKG_VERSION"))),
    );
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(timeout_secs))
        .redirect(Policy::none())
        .default_headers(headers)
        .build()
        .context("failed to build generation HTTP client")?;
    Ok(client)
}

async fn error_body(response: Response) -> String {
    match response.text().await {
        Ok(text) if text.chars().count() > MAX_ERROR_BODY_CHARS => {
            let mut truncated: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            truncated.push_str("...");
            truncated
        }
        Ok(text) => text,
        Err(e) => format!("<unreadable body: {e}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::HttpGateway;
    use crate::{GenerationError, GenerationGateway, GenerationRequest, RetryConfig};
    use healthsim_config::GenerationConfig;
    use healthsim_core::EntityDraft;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> GenerationRequest {
        GenerationRequest {
            description: "adults with hypertension".to_string(),
            count: Some(1),
            ..GenerationRequest::default()
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn posts_request_and_decodes_drafts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header_exists("idempotency-key"))
            .and(body_partial_json(json!({
                "model": "clinical-small",
                "request": {"description": "adults with hypertension", "count": 1}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "drafts": [
                    {"type": "person", "ref": "p", "given": "Omar", "family": "Haddad",
                     "birth_date": "1958-09-30", "sex": "male"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpGateway::from_config(&GenerationConfig {
            endpoint: Some(format!("{}/generate", server.uri())),
            api_key: Some("sk-test".to_string()),
            model: Some("clinical-small".to_string()),
        })
        .expect("gateway");

        let drafts = gateway.generate(&request()).await.expect("drafts");
        assert_eq!(drafts.len(), 1);
        assert!(matches!(&drafts[0], EntityDraft::Person(person) if person.given.as_deref() == Some("Omar")));
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("count must be positive"))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(server.uri())
            .expect("gateway")
            .with_retry(fast_retry(3));
        let err = gateway.generate(&request()).await.expect_err("rejected");
        match err {
            GenerationError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "count must be positive");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unavailable_service_is_retried_when_configured() {
        let server = MockServer::start().await;
        let attempts = AtomicU32::new(0);
        Mock::given(method("POST"))
            .respond_with(move |_: &wiremock::Request| {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_json(json!({"drafts": []}))
                }
            })
            .expect(2)
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(server.uri())
            .expect("gateway")
            .with_retry(fast_retry(2));
        let drafts = gateway.generate(&request()).await.expect("drafts");
        assert!(drafts.is_empty());
    }

    #[tokio::test]
    async fn without_retries_a_503_surfaces_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(server.uri()).expect("gateway");
        assert!(matches!(
            gateway.generate(&request()).await,
            Err(GenerationError::Status { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn malformed_payload_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"entities": []})))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(server.uri()).expect("gateway");
        assert!(matches!(
            gateway.generate(&request()).await,
            Err(GenerationError::Decode(_))
        ));
    }

    #[test]
    fn missing_endpoint_is_not_configured() {
        assert!(matches!(
            HttpGateway::from_config(&GenerationConfig::default()),
            Err(GenerationError::NotConfigured)
        ));
    }
}
