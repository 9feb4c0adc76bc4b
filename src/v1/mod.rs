//! Client for the `/llm-api/v1` endpoints of the document API server.

pub mod document;
pub mod health;
pub mod inference;
pub mod models;

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::ClientError;

pub use document::{ContextMode, DocumentQuestion};
pub use health::HealthResponse;
pub use inference::{GenerateRequest, GenerateResponse, SseEvent, TextStream};
pub use models::{ModelInfo, ModelNotFoundDetail};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(config.base_url(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.url(path)).timeout(self.timeout)
    }

    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(self.url(path)).timeout(self.timeout)
    }

    /// Tags the request with a fresh request id, sends it and turns non-2xx
    /// answers into errors.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let request_id = Uuid::new_v4().to_string();
        let request = request.header(REQUEST_ID_HEADER, &request_id).build()?;
        let url = request.url().to_string();
        debug!("{} {} [{request_id}]", request.method(), url);

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| ClientError::from_send(&url, e))?;

        check_status(response).await
    }
}

#[derive(Deserialize)]
struct ModelNotFoundBody {
    detail: ModelNotFoundDetail,
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        if let Ok(parsed) = serde_json::from_str::<ModelNotFoundBody>(&body) {
            return Err(ClientError::ModelNotFound(Box::new(parsed.detail)));
        }
    }

    Err(ClientError::Api {
        status: status.as_u16(),
        body,
    })
}
