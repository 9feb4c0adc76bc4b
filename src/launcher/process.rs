//! Detached spawning and name-based termination of server processes.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::LaunchError;

/// Starts `program args..` in its own session with stdin closed and both
/// output streams appended to `log_file`. Returns as soon as the process has
/// been forked.
pub fn spawn_detached(
    program: &Path,
    args: &[&str],
    cwd: &Path,
    log_file: &Path,
) -> Result<u32, LaunchError> {
    let mut log = OpenOptions::new().create(true).append(true).open(log_file)?;
    writeln!(
        log,
        "=== {} starting {} {} ===",
        Utc::now().to_rfc3339(),
        program.display(),
        args.join(" ")
    )?;
    let log_err = log.try_clone()?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    // Same effect as nohup: survive the controlling terminal going away.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            libc::signal(libc::SIGHUP, libc::SIG_IGN);
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        program: program.display().to_string(),
        source,
    })?;

    let pid = child.id().ok_or_else(|| LaunchError::Spawn {
        program: program.display().to_string(),
        source: std::io::Error::other("process exited before its pid could be read"),
    })?;

    info!("Spawned {} (pid {pid}), output in {}", program.display(), log_file.display());
    Ok(pid)
}

/// Pids whose command line contains `pattern`, excluding this process.
#[cfg(target_os = "linux")]
pub fn find_matching(pattern: &str) -> std::io::Result<Vec<u32>> {
    let own = std::process::id();
    let mut pids = Vec::new();

    for entry in std::fs::read_dir("/proc")? {
        let entry = entry?;
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own {
            continue;
        }

        // Processes can vanish between read_dir and read.
        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        if raw.is_empty() {
            continue;
        }

        let cmdline = raw
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(" ");

        if cmdline.contains(pattern) {
            debug!("pid {pid} matches '{pattern}': {cmdline}");
            pids.push(pid);
        }
    }

    Ok(pids)
}

/// Pids whose command line contains `pattern`, excluding this process.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn find_matching(pattern: &str) -> std::io::Result<Vec<u32>> {
    let output = std::process::Command::new("pgrep")
        .arg("-f")
        .arg(pattern)
        .output()?;
    debug!("pgrep -f '{pattern}' exited with {}", output.status);

    // pgrep: 0 = something matched, 1 = nothing matched.
    match output.status.code() {
        Some(0) | Some(1) => Ok(parse_pid_list(
            &String::from_utf8_lossy(&output.stdout),
            std::process::id(),
        )),
        _ => Err(std::io::Error::other(format!(
            "pgrep -f '{pattern}' failed with {}",
            output.status
        ))),
    }
}

#[cfg(any(test, all(unix, not(target_os = "linux"))))]
fn parse_pid_list(stdout: &str, own: u32) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| *pid != own)
        .collect()
}

/// Sends SIGTERM to every process matching `pattern`. Returns how many were
/// signalled.
#[cfg(unix)]
pub async fn terminate_matching(pattern: &str) -> Result<usize, LaunchError> {
    let mut signalled = 0;
    for pid in find_matching(pattern)? {
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            info!("Sent SIGTERM to pid {pid}");
            signalled += 1;
        } else {
            warn!(
                "Could not signal pid {pid}: {}",
                std::io::Error::last_os_error()
            );
        }
    }
    Ok(signalled)
}

#[cfg(not(unix))]
pub async fn terminate_matching(pattern: &str) -> Result<usize, LaunchError> {
    Err(LaunchError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("stopping processes matching '{pattern}' is only supported on Unix"),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_list_skips_own_pid_and_noise() {
        let stdout = "101\n  202 \n\nnot-a-pid\n303\n";
        assert_eq!(parse_pid_list(stdout, 202), vec![101, 303]);
        assert!(parse_pid_list("", 1).is_empty());
    }
}
