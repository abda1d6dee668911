// Out-of-process retraining
//
// The server never trains in its own process. A retrain runs the `retrain`
// subcommand of this binary as a child, waits for it with a timeout and kills
// it when the timeout expires. The checkpoint swap in the child means a
// killed run leaves the previous checkpoint in place.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::RetrainMode;

/// How a retrain child process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrainOutcome {
    Succeeded { stdout: String },
    Failed { code: Option<i32>, stderr: String },
    TimedOut { after: Duration },
}

#[async_trait]
pub trait RetrainRunner: Send + Sync {
    async fn run(&self, mode: RetrainMode) -> Result<RetrainOutcome>;
}

/// Runs `<program> <args...> retrain --mode <mode>`
pub struct ProcessRetrainRunner {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessRetrainRunner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Re-invoke the running binary, forwarding the config file if one was given.
    pub fn current_exe(config_path: Option<PathBuf>, timeout: Duration) -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate the running executable")?;
        let mut args = Vec::new();
        if let Some(path) = config_path {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        Ok(Self::new(program, args, timeout))
    }
}

#[async_trait]
impl RetrainRunner for ProcessRetrainRunner {
    async fn run(&self, mode: RetrainMode) -> Result<RetrainOutcome> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .args(["retrain", "--mode", mode.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

        tracing::info!(mode = %mode, pid = ?child.id(), "Started retrain process");

        // On timeout the future owning the child is dropped, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.context("Failed to wait for retrain process")?,
            Err(_) => {
                tracing::error!("Retrain process exceeded {:?}, killed", self.timeout);
                return Ok(RetrainOutcome::TimedOut {
                    after: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            tracing::info!("Retrain process finished");
            Ok(RetrainOutcome::Succeeded { stdout })
        } else {
            tracing::error!(code = ?output.status.code(), "Retrain process failed");
            Ok(RetrainOutcome::Failed {
                code: output.status.code(),
                stderr,
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str, timeout: Duration) -> ProcessRetrainRunner {
        ProcessRetrainRunner::new("sh", vec!["-c".to_string(), script.to_string()], timeout)
    }

    #[tokio::test]
    async fn test_success_captures_stdout() {
        let runner = shell("echo \"trained $1 $2\"", Duration::from_secs(10));
        let outcome = runner.run(RetrainMode::Ratings).await.unwrap();
        assert_eq!(
            outcome,
            RetrainOutcome::Succeeded {
                stdout: "trained --mode ratings\n".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_failure_captures_stderr() {
        let runner = shell("echo boom >&2; exit 3", Duration::from_secs(10));
        let outcome = runner.run(RetrainMode::Preferences).await.unwrap();
        assert_eq!(
            outcome,
            RetrainOutcome::Failed {
                code: Some(3),
                stderr: "boom\n".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = shell("sleep 30", Duration::from_millis(200));
        let started = std::time::Instant::now();
        let outcome = runner.run(RetrainMode::Ratings).await.unwrap();
        assert!(matches!(outcome, RetrainOutcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
