//! Probes for the local inference runtime (Ollama).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::error::LaunchError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaTags {
    #[serde(default)]
    pub models: Vec<OllamaModel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaModel {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

impl OllamaTags {
    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }
}

/// Whether `name` is among the pulled models.
///
/// Case-insensitive. A bare name (`llama2`) is compared as `llama2:latest`,
/// and also matches any tag of the same model (`llama2:13b`).
pub fn has_model(tags: &OllamaTags, name: &str) -> bool {
    let wanted = name.trim().to_lowercase();
    if wanted.is_empty() {
        return false;
    }

    let normalized = if wanted.contains(':') {
        wanted.clone()
    } else {
        format!("{wanted}:latest")
    };
    let tag_prefix = format!("{wanted}:");

    tags.models.iter().any(|m| {
        let full = m.name.to_lowercase();
        let base = m.model.to_lowercase();
        full == normalized
            || base == normalized
            || full.starts_with(&tag_prefix)
            || base.starts_with(&tag_prefix)
    })
}

pub struct RuntimeProbe {
    config: RuntimeConfig,
    http: reqwest::Client,
}

impl RuntimeProbe {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn check_installed(&self) -> Result<PathBuf, LaunchError> {
        let path = which::which(&self.config.binary).map_err(|_| LaunchError::RuntimeNotInstalled {
            binary: self.config.binary.clone(),
        })?;
        debug!("Found runtime binary at {}", path.display());
        Ok(path)
    }

    /// `GET /api/tags`; any answer other than 2xx counts as not running.
    pub async fn check_running(&self) -> Result<OllamaTags, LaunchError> {
        let url = format!("{}/api/tags", self.config.base_url);
        let not_running = |reason: String| LaunchError::RuntimeNotRunning {
            url: self.config.base_url.clone(),
            reason,
        };

        let response = self
            .http
            .get(&url)
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(|e| not_running(e.to_string()))?;

        if !response.status().is_success() {
            return Err(not_running(format!("health check returned {}", response.status())));
        }

        // An up runtime with an unexpected body is still up.
        let tags = response.json::<OllamaTags>().await.unwrap_or_default();
        info!(
            "Ollama is running at {} with {} model(s)",
            self.config.base_url,
            tags.models.len()
        );
        Ok(tags)
    }

    pub async fn preflight(&self, require_model: Option<&str>) -> Result<OllamaTags, LaunchError> {
        self.check_installed()?;
        let tags = self.check_running().await?;
        if let Some(model) = require_model {
            if !has_model(&tags, model) {
                return Err(LaunchError::ModelMissing {
                    model: model.to_string(),
                });
            }
        }
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(entries: &[(&str, &str)]) -> OllamaTags {
        OllamaTags {
            models: entries
                .iter()
                .map(|(name, model)| OllamaModel {
                    name: name.to_string(),
                    model: model.to_string(),
                    ..OllamaModel::default()
                })
                .collect(),
        }
    }

    #[test]
    fn bare_name_matches_latest_tag() {
        let t = tags(&[("llama2:latest", "llama2:latest")]);
        assert!(has_model(&t, "llama2"));
        assert!(has_model(&t, "LLAMA2"));
        assert!(has_model(&t, "llama2:latest"));
        assert!(!has_model(&t, "llama2:13b"));
        assert!(!has_model(&t, "llama"));
    }

    #[test]
    fn bare_name_matches_any_tag_of_model() {
        let t = tags(&[("deepseek-r1:7b", "deepseek-r1:7b")]);
        assert!(has_model(&t, "deepseek-r1"));
        assert!(!has_model(&t, "deepseek"));
    }

    #[test]
    fn falls_back_to_model_field() {
        let t = tags(&[("", "mistral:latest")]);
        assert!(has_model(&t, "mistral"));
    }

    #[test]
    fn empty_name_never_matches() {
        let t = tags(&[("llama2:latest", "llama2:latest")]);
        assert!(!has_model(&t, "  "));
        assert!(!has_model(&OllamaTags::default(), "llama2"));
    }

    #[test]
    fn decodes_tags_payload() {
        let raw = r#"{"models":[{"name":"llama2:latest","model":"llama2:latest","size":3826793677,"digest":"x"}]}"#;
        let t: OllamaTags = serde_json::from_str(raw).unwrap();
        assert_eq!(t.names(), vec!["llama2:latest"]);
        assert_eq!(t.models[0].size, Some(3826793677));
    }
}
