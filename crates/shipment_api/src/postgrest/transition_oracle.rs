use crate::postgrest::PostgrestConfig;
use anyhow::Context;
use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, TransitionOracle, TransitionRequest};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

/// Postgres error raised by `RAISE EXCEPTION` in a transition procedure
const RAISE_EXCEPTION: &str = "P0001";
const NO_DATA_FOUND: &str = "P0002";
const INSUFFICIENT_PRIVILEGE: &str = "42501";

/// Error body returned by PostgREST for a failed RPC call
#[derive(Debug, Default, Deserialize)]
struct RpcErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// [`TransitionOracle`] that calls the backend's transition procedures over
/// the PostgREST RPC endpoint.
pub struct PostgrestTransitionOracle {
    client: reqwest::Client,
    config: PostgrestConfig,
}

impl PostgrestTransitionOracle {
    pub fn new(config: PostgrestConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &config.api_key {
            headers.insert(
                "apikey",
                HeaderValue::from_str(api_key).context("invalid api key header")?,
            );
        }
        if let Some(token) = &config.access_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .context("invalid access token header")?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .context("failed to build PostgREST HTTP client")?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl TransitionOracle for PostgrestTransitionOracle {
    #[instrument(skip(self, request), fields(document_id = %request.document_id, procedure = request.transition.procedure_name()))]
    async fn execute(&self, request: &TransitionRequest) -> DomainResult<()> {
        let url = self.config.rpc_url(request.transition.procedure_name());
        let body = json!({
            "p_document_id": request.document_id,
            "p_actor_id": request.actor_id,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::TransientFailure(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "transition procedure succeeded");
            return Ok(());
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(status = status.as_u16(), error = %e, "failed to read error body, classifying by status");
                String::new()
            }
        };
        Err(classify_rpc_error(status, &body))
    }
}

/// Map a failed RPC response onto the domain error taxonomy.
///
/// Postgres error codes in the body take precedence over the HTTP status,
/// since PostgREST reports raised exceptions as plain 400s.
pub fn classify_rpc_error(status: StatusCode, body: &str) -> DomainError {
    let parsed: RpcErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected response")
                .to_string()
        });

    match parsed.code.as_deref() {
        Some(RAISE_EXCEPTION) => return DomainError::IllegalTransition(message),
        Some(NO_DATA_FOUND) => return DomainError::DocumentNotFound(message),
        Some(INSUFFICIENT_PRIVILEGE) => return DomainError::PermissionDenied(message),
        _ => {}
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DomainError::PermissionDenied(message),
        StatusCode::NOT_FOUND => DomainError::DocumentNotFound(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            DomainError::TransientFailure(message)
        }
        s if s.is_server_error() => DomainError::TransientFailure(message),
        _ => DomainError::TransitionRejected(message),
    }
}
