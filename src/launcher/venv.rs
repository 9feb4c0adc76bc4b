use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::info;

use crate::error::LaunchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenvStatus {
    Existing,
    Created,
}

/// A Python virtual environment rooted at a directory.
#[derive(Debug, Clone)]
pub struct VirtualEnv {
    root: PathBuf,
}

impl VirtualEnv {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    #[cfg(not(windows))]
    pub fn bin(&self, name: &str) -> PathBuf {
        self.root.join("bin").join(name)
    }

    #[cfg(windows)]
    pub fn bin(&self, name: &str) -> PathBuf {
        self.root.join("Scripts").join(format!("{name}.exe"))
    }

    pub fn python(&self) -> PathBuf {
        self.bin("python")
    }

    pub fn pip(&self) -> PathBuf {
        self.bin("pip")
    }

    /// Creates the environment with `<python> -m venv` unless it exists.
    pub async fn ensure(&self, python: &str) -> Result<VenvStatus, LaunchError> {
        if self.exists() {
            info!("Using existing virtual environment at {}", self.root.display());
            return Ok(VenvStatus::Existing);
        }

        info!("Creating virtual environment at {}", self.root.display());
        let status = Command::new(python)
            .arg("-m")
            .arg("venv")
            .arg(&self.root)
            .status()
            .await
            .map_err(|source| LaunchError::Spawn {
                program: python.to_string(),
                source,
            })?;

        if !status.success() {
            return Err(LaunchError::Venv {
                path: self.root.clone(),
                reason: format!("{python} -m venv exited with {status}"),
            });
        }

        Ok(VenvStatus::Created)
    }

    /// `pip install -e <project_dir>` inside the environment.
    pub async fn install_editable(&self, project_dir: &Path) -> Result<(), LaunchError> {
        let pip = self.pip();
        info!("Installing {} in editable mode", project_dir.display());

        let status = Command::new(&pip)
            .arg("install")
            .arg("-e")
            .arg(project_dir)
            .status()
            .await
            .map_err(|source| LaunchError::Spawn {
                program: pip.display().to_string(),
                source,
            })?;

        if !status.success() {
            return Err(LaunchError::Install(format!("pip exited with {status}")));
        }
        Ok(())
    }
}
