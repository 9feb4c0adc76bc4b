//! Bootstrap and lifecycle of the API server process.

pub mod process;
pub mod venv;

use std::path::PathBuf;

use tokio::process::Command;
use tracing::info;

use crate::config::LauncherConfig;
use crate::error::LaunchError;
use crate::runtime::{OllamaTags, RuntimeProbe};

pub use venv::{VenvStatus, VirtualEnv};

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub require_model: Option<String>,
    pub skip_install: bool,
}

/// A server started in the background.
#[derive(Debug, Clone)]
pub struct Detached {
    pub pid: u32,
    pub log_file: PathBuf,
    pub stopped: usize,
}

pub struct Launcher {
    config: LauncherConfig,
    runtime: RuntimeProbe,
}

impl Launcher {
    pub fn new(mut config: LauncherConfig) -> Self {
        // Children run inside the project directory, so every path handed to
        // them has to be anchored to where the launcher was invoked.
        if let Ok(dir) = std::path::absolute(&config.project_dir) {
            config.project_dir = dir;
        }
        let runtime = RuntimeProbe::new(config.runtime.clone());
        Self { config, runtime }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn venv(&self) -> VirtualEnv {
        VirtualEnv::new(self.config.resolve(&self.config.venv_dir))
    }

    pub fn log_file(&self) -> PathBuf {
        self.config.resolve(&self.config.log_file)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.config.resolve(&self.config.pid_file)
    }

    pub async fn preflight(&self, opts: &LaunchOptions) -> Result<OllamaTags, LaunchError> {
        self.runtime.preflight(opts.require_model.as_deref()).await
    }

    pub async fn prepare(&self, opts: &LaunchOptions) -> Result<VenvStatus, LaunchError> {
        let venv = self.venv();
        let status = venv.ensure(&self.config.python).await?;
        if !opts.skip_install {
            venv.install_editable(&self.config.project_dir).await?;
        }
        Ok(status)
    }

    /// Runs the server attached to this terminal until it exits.
    pub async fn run_foreground(&self) -> Result<(), LaunchError> {
        let python = self.venv().python();
        info!("Starting {} {}", python.display(), self.config.entry_point);

        let status = Command::new(&python)
            .arg(&self.config.entry_point)
            .current_dir(&self.config.project_dir)
            .status()
            .await
            .map_err(|source| LaunchError::Spawn {
                program: python.display().to_string(),
                source,
            })?;

        if !status.success() {
            return Err(LaunchError::ServerExited {
                status: status.to_string(),
            });
        }
        Ok(())
    }

    pub async fn stop_existing(&self) -> Result<usize, LaunchError> {
        let pattern = self.config.match_pattern();
        let stopped = process::terminate_matching(&pattern).await?;
        if stopped == 0 {
            info!("No running instance matching '{pattern}'");
        }

        let pid_file = self.pid_file();
        if pid_file.exists() {
            std::fs::remove_file(&pid_file)?;
        }
        Ok(stopped)
    }

    pub async fn spawn_detached(&self) -> Result<u32, LaunchError> {
        let python = self.venv().python();
        let pid = process::spawn_detached(
            &python,
            &[self.config.entry_point.as_str()],
            &self.config.project_dir,
            &self.log_file(),
        )?;
        std::fs::write(self.pid_file(), format!("{pid}\n"))?;
        Ok(pid)
    }

    /// Check runtime → install → stop old instances → wait → spawn detached.
    /// Does not wait for the new server to become ready.
    pub async fn restart(&self, opts: &LaunchOptions) -> Result<Detached, LaunchError> {
        self.preflight(opts).await?;
        self.prepare(opts).await?;

        let stopped = self.stop_existing().await?;
        tokio::time::sleep(self.config.restart_grace).await;

        let pid = self.spawn_detached().await?;
        Ok(Detached {
            pid,
            log_file: self.log_file(),
            stopped,
        })
    }
}
