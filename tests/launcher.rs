use std::time::Duration;

use axum::{routing::get, Json, Router};
use serde_json::json;

use llm_api_launcher::{LaunchError, LauncherConfig, RuntimeConfig, RuntimeProbe};

async fn spawn_mock_ollama() -> String {
    let app = Router::new().route(
        "/api/tags",
        get(|| async {
            Json(json!({
                "models": [
                    {"name": "llama2:latest", "model": "llama2:latest", "size": 3826793677u64},
                    {"name": "deepseek-r1:7b", "model": "deepseek-r1:7b"}
                ]
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn runtime(binary: &str, base_url: &str) -> RuntimeConfig {
    RuntimeConfig {
        binary: binary.to_string(),
        base_url: base_url.to_string(),
        probe_timeout: Duration::from_secs(2),
    }
}

#[test]
fn missing_runtime_binary_gives_install_hint() {
    let probe = RuntimeProbe::new(runtime("definitely-not-an-ollama-binary", "http://127.0.0.1:1"));

    let err = probe.check_installed().unwrap_err();
    assert!(matches!(err, LaunchError::RuntimeNotInstalled { .. }));
    let message = err.to_string();
    assert!(message.contains("not installed"));
    assert!(message.contains("https://ollama.ai/download"));
}

#[tokio::test]
async fn unreachable_runtime_is_not_running() {
    let probe = RuntimeProbe::new(runtime("sh", "http://127.0.0.1:1"));

    let err = probe.check_running().await.unwrap_err();
    assert!(matches!(err, LaunchError::RuntimeNotRunning { .. }));
    let message = err.to_string();
    assert!(message.contains("not running"));
    assert!(message.contains("ollama serve"));
}

#[tokio::test]
async fn running_runtime_lists_models() {
    let base_url = spawn_mock_ollama().await;
    let probe = RuntimeProbe::new(runtime("sh", &base_url));

    let tags = probe.check_running().await.unwrap();
    assert_eq!(tags.names(), vec!["llama2:latest", "deepseek-r1:7b"]);

    assert!(probe.preflight(Some("llama2")).await.is_ok());
    assert!(probe.preflight(Some("deepseek-r1")).await.is_ok());

    let err = probe.preflight(Some("llama3")).await.unwrap_err();
    assert!(matches!(err, LaunchError::ModelMissing { .. }));
    assert!(err.to_string().contains("ollama pull llama3"));
}

#[tokio::test]
async fn preflight_checks_binary_before_network() {
    let base_url = spawn_mock_ollama().await;
    let probe = RuntimeProbe::new(runtime("definitely-not-an-ollama-binary", &base_url));

    let err = probe.preflight(None).await.unwrap_err();
    assert!(matches!(err, LaunchError::RuntimeNotInstalled { .. }));
}

#[cfg(target_os = "linux")]
mod detached {
    use super::*;

    use llm_api_launcher::launcher::process::find_matching;
    use llm_api_launcher::launcher::VenvStatus;
    use llm_api_launcher::{LaunchOptions, Launcher};

    /// A project whose "venv python" is /bin/sh and whose entry point loops
    /// forever, so the launcher can be exercised without Python.
    fn fake_project(entry_point: &str) -> tempfile::TempDir {
        fake_project_running(entry_point, "while true; do sleep 1; done\n")
    }

    fn fake_project_running(entry_point: &str, script: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join(".venv").join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::os::unix::fs::symlink("/bin/sh", bin.join("python")).unwrap();
        std::fs::write(dir.path().join(entry_point), script).unwrap();
        dir
    }

    fn config(dir: &tempfile::TempDir, entry_point: &str, ollama_url: &str) -> LauncherConfig {
        LauncherConfig {
            project_dir: dir.path().to_path_buf(),
            entry_point: entry_point.to_string(),
            restart_grace: Duration::from_millis(200),
            runtime: runtime("sh", ollama_url),
            ..LauncherConfig::default()
        }
    }

    #[tokio::test]
    async fn restart_spawns_detached_and_stop_terminates_it() {
        let entry = format!("serve-{}.sh", std::process::id());
        let dir = fake_project(&entry);
        let ollama = spawn_mock_ollama().await;
        let launcher = Launcher::new(config(&dir, &entry, &ollama));
        let pattern = launcher.config().match_pattern();

        let opts = LaunchOptions {
            require_model: Some("llama2".to_string()),
            skip_install: true,
        };
        let detached = launcher.restart(&opts).await.unwrap();
        assert_eq!(detached.stopped, 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(find_matching(&pattern).unwrap(), vec![detached.pid]);

        let pid_file = std::fs::read_to_string(launcher.pid_file()).unwrap();
        assert_eq!(pid_file.trim(), detached.pid.to_string());

        let log = std::fs::read_to_string(&detached.log_file).unwrap();
        assert!(log.starts_with("=== "));
        assert!(log.contains(&entry));

        // A second restart replaces the first instance.
        let second = launcher.restart(&opts).await.unwrap();
        assert_eq!(second.stopped, 1);
        assert_ne!(second.pid, detached.pid);

        let stopped = launcher.stop_existing().await.unwrap();
        assert_eq!(stopped, 1);
        assert!(!launcher.pid_file().exists());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(find_matching(&pattern).unwrap().is_empty());
    }

    #[tokio::test]
    async fn restart_refuses_without_runtime() {
        let entry = format!("never-{}.sh", std::process::id());
        let dir = fake_project(&entry);
        let launcher = Launcher::new(config(&dir, &entry, "http://127.0.0.1:1"));

        let err = launcher
            .restart(&LaunchOptions {
                skip_install: true,
                ..LaunchOptions::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::RuntimeNotRunning { .. }));
        assert!(!launcher.log_file().exists());
    }

    #[tokio::test]
    async fn foreground_run_waits_for_the_server() {
        let dir = fake_project_running("main.py", "echo serving > served\nexit 0\n");
        let launcher = Launcher::new(config(&dir, "main.py", "http://127.0.0.1:1"));

        launcher.run_foreground().await.unwrap();
        assert!(dir.path().join("served").exists());
    }

    #[tokio::test]
    async fn foreground_failure_reports_exit_status() {
        let dir = fake_project_running("main.py", "exit 3\n");
        let launcher = Launcher::new(config(&dir, "main.py", "http://127.0.0.1:1"));

        let err = launcher.run_foreground().await.unwrap_err();
        assert!(matches!(err, LaunchError::ServerExited { .. }));
        assert!(err.to_string().contains('3'));
    }

    #[tokio::test]
    async fn prepare_installs_into_existing_venv() {
        use std::os::unix::fs::PermissionsExt;

        let dir = fake_project("main.py");
        let pip = dir.path().join(".venv").join("bin").join("pip");
        std::fs::write(&pip, "#!/bin/sh\necho \"$@\" > \"$(dirname \"$0\")/pip-args\"\n").unwrap();
        std::fs::set_permissions(&pip, std::fs::Permissions::from_mode(0o755)).unwrap();
        let launcher = Launcher::new(config(&dir, "main.py", "http://127.0.0.1:1"));

        let status = launcher.prepare(&LaunchOptions::default()).await.unwrap();
        assert_eq!(status, VenvStatus::Existing);

        let args = std::fs::read_to_string(dir.path().join(".venv/bin/pip-args")).unwrap();
        assert_eq!(
            args.trim_end(),
            format!("install -e {}", launcher.config().project_dir.display())
        );
    }
}
