use serde::{Deserialize, Serialize};

use super::{ApiClient, ModelInfo};
use crate::error::ClientError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
    #[serde(default)]
    pub model_info: Option<ModelInfo>,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

impl ApiClient {
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let response = self.send(self.get("health")).await?;
        Ok(response.json().await?)
    }
}
