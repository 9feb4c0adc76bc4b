use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use reqwest::multipart::{Form, Part};
use tracing::info;

use super::ApiClient;
use crate::error::ClientError;

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const ASK_TIMEOUT: Duration = Duration::from_secs(120);

/// How much of the document is handed to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ContextMode {
    #[default]
    Full,
    Summary,
}

impl ContextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextMode::Full => "full",
            ContextMode::Summary => "summary",
        }
    }
}

impl fmt::Display for ContextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A PDF plus a question about it, sent as one multipart form.
#[derive(Debug, Clone)]
pub struct DocumentQuestion {
    pub file: PathBuf,
    pub question: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub context_mode: ContextMode,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub model: Option<String>,
}

impl DocumentQuestion {
    pub fn new(file: impl Into<PathBuf>, question: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            question: question.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            context_mode: ContextMode::default(),
            top_p: None,
            top_k: None,
            model: None,
        }
    }

    pub fn check_file(&self) -> Result<(), ClientError> {
        if self.file.is_file() {
            Ok(())
        } else {
            Err(ClientError::FileNotFound(self.file.clone()))
        }
    }

    fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string())
    }

    /// Text fields in the order the server documents them. The sampling
    /// overrides and `model` are only sent when set.
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("question", self.question.clone()),
            ("temperature", self.temperature.to_string()),
            ("max_tokens", self.max_tokens.to_string()),
            ("context_mode", self.context_mode.to_string()),
        ];
        if let Some(top_p) = self.top_p {
            fields.push(("top_p", top_p.to_string()));
        }
        if let Some(top_k) = self.top_k {
            fields.push(("top_k", top_k.to_string()));
        }
        if let Some(model) = &self.model {
            fields.push(("model", model.clone()));
        }
        fields
    }

    async fn into_form(self) -> Result<Form, ClientError> {
        let bytes = tokio::fs::read(&self.file).await?;
        let part = Part::bytes(bytes)
            .file_name(self.file_name())
            .mime_str("application/pdf")?;

        let form = self
            .text_fields()
            .into_iter()
            .fold(Form::new().part("file", part), |form, (name, value)| form.text(name, value));
        Ok(form)
    }
}

impl ApiClient {
    /// Uploads the document and returns the server's JSON answer untouched.
    /// Nothing is sent when the file does not exist.
    pub async fn ask_document(
        &self,
        question: DocumentQuestion,
    ) -> Result<serde_json::Value, ClientError> {
        question.check_file()?;
        info!(
            "Asking about {} ({} mode): {}",
            question.file.display(),
            question.context_mode,
            question.question
        );

        let form = question.into_form().await?;
        let request = self
            .post("document/question")
            .timeout(ASK_TIMEOUT)
            .multipart(form);

        let response = self.send(request).await?;
        Ok(response.json().await?)
    }
}
