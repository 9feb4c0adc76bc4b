//! Launcher and command-line client for the document question-answering
//! LLM API.
//!
//! The [`launcher`] module bootstraps the Python server (runtime checks,
//! virtual environment, foreground or detached execution); [`v1`] talks to
//! the running server.

pub mod bench;
pub mod config;
pub mod error;
pub mod launcher;
pub mod runtime;
pub mod v1;

pub use config::{ApiConfig, LauncherConfig, RuntimeConfig};
pub use error::{ClientError, LaunchError};
pub use launcher::{Detached, LaunchOptions, Launcher};
pub use runtime::{has_model, OllamaTags, RuntimeProbe};
pub use v1::ApiClient;
