use std::pin::Pin;

use async_stream::stream;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::models::ModelNotFoundDetail;
use super::ApiClient;
use crate::error::ClientError;

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.9
}

fn default_top_k() -> u32 {
    40
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            stop_sequences: None,
            stream: false,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Same bounds the server enforces, checked before anything is sent.
    pub fn validate(&self) -> Result<(), ClientError> {
        let invalid = |msg: String| Err(ClientError::InvalidRequest(msg));

        if self.prompt.trim().is_empty() {
            return invalid("Prompt cannot be empty".to_string());
        }
        if !(1..=4096).contains(&self.max_tokens) {
            return invalid(format!(
                "max_tokens must be between 1 and 4096, got {}",
                self.max_tokens
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return invalid(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return invalid(format!("top_p must be between 0.0 and 1.0, got {}", self.top_p));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub generated_text: String,
    #[serde(default)]
    pub prompt: String,
    pub model_used: String,
    #[serde(default)]
    pub tokens_generated: u64,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub generation_time_ms: f64,
}

/// One `data:` line of the `/generate/stream` body.
#[derive(Debug, Clone)]
pub enum SseEvent {
    Text(String),
    Error(String),
    ModelNotFound(ModelNotFoundDetail),
    Done,
}

/// Lines that are not `data:` or carry undecodable JSON yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.trim_end_matches('\r').strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    if let Some(text) = value.get("text").and_then(|t| t.as_str()) {
        return Some(SseEvent::Text(text.to_string()));
    }

    if let Ok(detail) = serde_json::from_value::<ModelNotFoundDetail>(value.clone()) {
        if detail.is_model_not_found() {
            return Some(SseEvent::ModelNotFound(detail));
        }
    }

    value
        .get("error")
        .map(|e| SseEvent::Error(e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string())))
}

impl ApiClient {
    pub async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ClientError> {
        req.validate()?;
        if req.stream {
            return Err(ClientError::InvalidRequest(
                "Use generate_stream for streaming responses".to_string(),
            ));
        }

        let response = self.send(self.post("generate").json(req)).await?;
        Ok(response.json().await?)
    }

    /// Streams generated text chunks. The stream ends at `[DONE]`; error
    /// payloads end it with an `Err`.
    pub async fn generate_stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<TextStream, ClientError> {
        req.validate()?;
        let mut body = req.clone();
        body.stream = true;

        let response = self.send(self.post("generate/stream").json(&body)).await?;

        Ok(Box::pin(stream! {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = Vec::new();
            let mut chunks = 0usize;

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(ClientError::Stream(format!("read error: {e}")));
                        return;
                    }
                };

                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line = String::from_utf8_lossy(&buffer[..pos]).to_string();
                    buffer.drain(..=pos);

                    if line.trim().is_empty() {
                        continue;
                    }

                    match parse_sse_line(&line) {
                        Some(SseEvent::Text(text)) => {
                            chunks += 1;
                            yield Ok(text);
                        }
                        Some(SseEvent::Done) => {
                            debug!("Stream finished after {chunks} chunks");
                            return;
                        }
                        Some(SseEvent::Error(message)) => {
                            yield Err(ClientError::Stream(message));
                            return;
                        }
                        Some(SseEvent::ModelNotFound(detail)) => {
                            yield Err(ClientError::ModelNotFound(Box::new(detail)));
                            return;
                        }
                        None => debug!("Skipping stream line: {line}"),
                    }
                }
            }

            warn!("Stream closed without [DONE] after {chunks} chunks");
        }))
    }
}
