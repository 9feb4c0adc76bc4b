use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ApiClient;
use crate::error::ClientError;

pub const MODEL_NOT_FOUND: &str = "Model Not Found";

/// Provider the server is currently configured with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInstructions {
    #[serde(default)]
    pub download_command: Option<String>,
    #[serde(default)]
    pub list_models_command: Option<String>,
    #[serde(default)]
    pub browse_models_url: Option<String>,
}

/// `detail` of a 404 answered when the requested model is not pulled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelNotFoundDetail {
    pub error: String,
    pub model_name: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub instructions: ModelInstructions,
}

impl ModelNotFoundDetail {
    pub fn is_model_not_found(&self) -> bool {
        self.error == MODEL_NOT_FOUND
    }

    pub fn describe(&self) -> String {
        let mut out = match &self.provider {
            Some(provider) => {
                format!("Model '{}' not found (provider: {provider})", self.model_name)
            }
            None => format!("Model '{}' not found", self.model_name),
        };

        let i = &self.instructions;
        if let Some(cmd) = &i.download_command {
            out.push_str(&format!("\n  Download: {cmd}"));
        }
        if let Some(cmd) = &i.list_models_command {
            out.push_str(&format!("\n  List:     {cmd}"));
        }
        if let Some(url) = &i.browse_models_url {
            out.push_str(&format!("\n  Browse:   {url}"));
        }
        out
    }
}

impl ApiClient {
    pub async fn model_info(&self) -> Result<ModelInfo, ClientError> {
        let response = self.send(self.get("model/info")).await?;
        Ok(response.json().await?)
    }
}
