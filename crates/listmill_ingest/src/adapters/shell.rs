//! Shell-command adapter: runs the configured command through the host
//! shell, captures stdout, and enforces a per-run timeout that terminates
//! the child.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{ImportError, Result};
use crate::log::RunLog;

pub async fn run_command(command: &str, timeout: Duration, log: &mut RunLog) -> Result<String> {
    log.info(format!("Executing command: {command}"));

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ImportError::Command {
            code: None,
            stderr: format!("failed to spawn shell: {e}"),
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ImportError::Command {
            code: None,
            stderr: format!("failed to collect output: {e}"),
        })?,
        // Dropping the future kills the child (kill_on_drop).
        Err(_) => {
            log.error(format!(
                "Command timed out after {}s and was terminated",
                timeout.as_secs()
            ));
            return Err(ImportError::Command {
                code: None,
                stderr: format!("timed out after {}s", timeout.as_secs()),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        log.error(format!(
            "Command exited with {:?}: {stderr}",
            output.status.code()
        ));
        return Err(ImportError::Command {
            code: output.status.code(),
            stderr,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if stdout.trim().is_empty() {
        log.warn("Command returned empty output");
        return Err(ImportError::EmptyOutput);
    }

    let sample: String = stdout.chars().take(500).collect();
    log.info(format!("Command output sample: {sample}"));
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let mut log = RunLog::new();
        let out = run_command("echo '[1,2,3]'", Duration::from_secs(5), &mut log)
            .await
            .unwrap();
        assert_eq!(out.trim(), "[1,2,3]");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_command_error() {
        let mut log = RunLog::new();
        let err = run_command("echo oops >&2; exit 3", Duration::from_secs(5), &mut log)
            .await
            .unwrap_err();
        match err {
            ImportError::Command { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_stdout_is_distinct_from_failure() {
        let mut log = RunLog::new();
        let err = run_command("true", Duration::from_secs(5), &mut log)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::EmptyOutput));
    }

    #[tokio::test]
    async fn timeout_terminates_the_child() {
        let mut log = RunLog::new();
        let started = std::time::Instant::now();
        let err = run_command("sleep 30", Duration::from_millis(200), &mut log)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Command { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
