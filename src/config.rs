use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
pub const OLLAMA_DEFAULT_BIN: &str = "ollama";

pub const DEFAULT_API_HOST: &str = "0.0.0.0";
pub const DEFAULT_API_PORT: u16 = 8001;
pub const DEFAULT_API_PREFIX: &str = "/llm-api/v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Where the document API server is reachable.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub prefix: String,
    pub request_timeout: Duration,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("API_HOST", DEFAULT_API_HOST),
            port: env_parse("API_PORT", DEFAULT_API_PORT),
            prefix: env_or("API_PREFIX", DEFAULT_API_PREFIX),
            request_timeout: Duration::from_secs(env_parse(
                "REQUEST_TIMEOUT",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
        }
    }

    /// `http://host:port/prefix` with exactly one leading slash on the prefix
    /// and no trailing slash.
    pub fn base_url(&self) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("http://{}:{}", self.host, self.port)
        } else {
            format!("http://{}:{}/{}", self.host, self.port, prefix)
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_API_HOST.to_string(),
            port: DEFAULT_API_PORT,
            prefix: DEFAULT_API_PREFIX.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Local inference runtime (Ollama) the server depends on.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub binary: String,
    pub base_url: String,
    pub probe_timeout: Duration,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        // OLLAMA_URL wins over the server's own OLLAMA_BASE_URL setting.
        let base_url = env::var("OLLAMA_URL")
            .or_else(|_| env::var("OLLAMA_BASE_URL"))
            .unwrap_or_else(|_| OLLAMA_DEFAULT_URL.to_string());

        Self {
            binary: env_or("OLLAMA_BIN", OLLAMA_DEFAULT_BIN),
            base_url: base_url.trim_end_matches('/').to_string(),
            probe_timeout: Duration::from_secs(env_parse("OLLAMA_PROBE_TIMEOUT", 5)),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: OLLAMA_DEFAULT_BIN.to_string(),
            base_url: OLLAMA_DEFAULT_URL.to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub project_dir: PathBuf,
    pub python: String,
    pub venv_dir: PathBuf,
    pub entry_point: String,
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
    /// Substring matched against process command lines when stopping.
    /// `None` means `python <entry_point>`.
    pub match_pattern: Option<String>,
    pub restart_grace: Duration,
    pub runtime: RuntimeConfig,
}

impl LauncherConfig {
    pub fn from_env() -> Self {
        Self {
            project_dir: PathBuf::from(env_or("PROJECT_DIR", ".")),
            python: env_or("PYTHON_BIN", "python3"),
            venv_dir: PathBuf::from(env_or("VENV_DIR", ".venv")),
            entry_point: env_or("ENTRY_POINT", "main.py"),
            log_file: PathBuf::from(env_or("SERVER_LOG", "server.log")),
            pid_file: PathBuf::from(env_or("SERVER_PID", "server.pid")),
            match_pattern: env::var("SERVER_MATCH").ok(),
            restart_grace: Duration::from_secs(env_parse("RESTART_GRACE", 2)),
            runtime: RuntimeConfig::from_env(),
        }
    }

    pub fn match_pattern(&self) -> String {
        self.match_pattern
            .clone()
            .unwrap_or_else(|| format!("python {}", self.entry_point))
    }

    /// Relative paths are resolved against the project directory.
    pub fn resolve(&self, path: &std::path::Path) -> PathBuf {
        self.project_dir.join(path)
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            python: "python3".to_string(),
            venv_dir: PathBuf::from(".venv"),
            entry_point: "main.py".to_string(),
            log_file: PathBuf::from("server.log"),
            pid_file: PathBuf::from("server.pid"),
            match_pattern: None,
            restart_grace: Duration::from_secs(2),
            runtime: RuntimeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_normalizes_prefix() {
        let mut config = ApiConfig::default();
        assert_eq!(config.base_url(), "http://0.0.0.0:8001/llm-api/v1");

        config.prefix = "api/v1/".to_string();
        assert_eq!(config.base_url(), "http://0.0.0.0:8001/api/v1");

        config.prefix = "/".to_string();
        assert_eq!(config.base_url(), "http://0.0.0.0:8001");
    }

    #[test]
    fn match_pattern_defaults_to_entry_point() {
        let mut config = LauncherConfig::default();
        assert_eq!(config.match_pattern(), "python main.py");

        config.entry_point = "serve.py".to_string();
        assert_eq!(config.match_pattern(), "python serve.py");

        config.match_pattern = Some("uvicorn".to_string());
        assert_eq!(config.match_pattern(), "uvicorn");
    }

    #[test]
    fn absolute_paths_are_not_rebased() {
        let config = LauncherConfig {
            project_dir: PathBuf::from("/srv/app"),
            ..LauncherConfig::default()
        };
        assert_eq!(
            config.resolve(std::path::Path::new(".venv")),
            PathBuf::from("/srv/app/.venv")
        );
        assert_eq!(
            config.resolve(std::path::Path::new("/var/log/s.log")),
            PathBuf::from("/var/log/s.log")
        );
    }
}
