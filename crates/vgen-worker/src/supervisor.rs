//! Workflow supervisor.
//!
//! Spawns one generation subprocess per admitted job and reports how it
//! ended on an exit channel. The subprocess talks back only through
//! webhooks and its exit status; it receives its inputs through its own
//! environment and stdin:
//!
//! - `VGEN_JOB_ID`, `VGEN_WORKER_ID`, `VGEN_TOTAL_STEPS`
//! - `VGEN_CALLBACK_URL` (where to POST step events)
//! - `VGEN_WEBHOOK_SECRET` (when inbound signatures are enforced)
//! - the job parameters as JSON on stdin

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, Instrument};
use vgen_models::{Job, JobId};

use crate::config::SupervisorConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Bytes of stderr kept for the failure message.
const STDERR_TAIL_BYTES: usize = 2048;

/// How a subprocess ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Failed { code: Option<i32>, stderr_tail: String },
    TimedOut { after: Duration },
    /// Terminated on request
    Killed,
}

impl ExitOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExitOutcome::Success => "success",
            ExitOutcome::Failed { .. } => "failed",
            ExitOutcome::TimedOut { .. } => "timed_out",
            ExitOutcome::Killed => "killed",
        }
    }

    /// Job error text for an unsuccessful exit.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ExitOutcome::Success | ExitOutcome::Killed => None,
            ExitOutcome::Failed { code, stderr_tail } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                let tail = stderr_tail.trim();
                Some(if tail.is_empty() {
                    format!("workflow exited with code {}", code)
                } else {
                    format!("workflow exited with code {}: {}", code, tail)
                })
            }
            ExitOutcome::TimedOut { after } => {
                Some(format!("workflow timed out after {}s", after.as_secs()))
            }
        }
    }
}

/// Exit notification for one job's subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub job_id: JobId,
    pub outcome: ExitOutcome,
}

/// Starts and stops the per-job unit of work.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// Start work for an admitted job. Its end must be reported as a
    /// [`ProcessExit`] on the channel the launcher was built with.
    async fn launch(&self, job: &Job, worker_id: &str) -> WorkerResult<()>;

    /// Stop a job's work. Returns false if nothing was running.
    async fn terminate(&self, job_id: &JobId) -> bool;

    /// Number of running units of work.
    fn running(&self) -> usize;
}

/// Launcher backed by real child processes.
pub struct WorkflowSupervisor {
    config: SupervisorConfig,
    exits: mpsc::UnboundedSender<ProcessExit>,
    /// Kill switches of running processes; an entry lives until its process ends
    handles: Arc<Mutex<HashMap<JobId, oneshot::Sender<()>>>>,
}

impl WorkflowSupervisor {
    pub fn new(config: SupervisorConfig, exits: mpsc::UnboundedSender<ProcessExit>) -> Self {
        Self {
            config,
            exits,
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn build_command(&self, job: &Job, worker_id: &str) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .env("VGEN_JOB_ID", job.id.as_str())
            .env("VGEN_WORKER_ID", worker_id)
            .env("VGEN_TOTAL_STEPS", job.total_steps.to_string())
            .env("VGEN_CALLBACK_URL", &self.config.callback_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(secret) = &self.config.webhook_secret {
            cmd.env("VGEN_WEBHOOK_SECRET", secret);
        }
        cmd
    }
}

#[async_trait]
impl JobLauncher for WorkflowSupervisor {
    async fn launch(&self, job: &Job, worker_id: &str) -> WorkerResult<()> {
        let logger = JobLogger::new(&job.id, "workflow");

        let work_dir = self.config.work_dir.join(job.id.as_str());
        tokio::fs::create_dir_all(&work_dir).await?;

        let mut cmd = self.build_command(job, worker_id);
        cmd.current_dir(&work_dir);

        let mut child = cmd
            .spawn()
            .map_err(|e| WorkerError::spawn_failed(format!("{}: {}", self.config.command, e)))?;
        logger.log_start(&format!("spawned {} (pid {:?}) on {}", self.config.command, child.id(), worker_id));

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&job.parameters).unwrap_or_default();
            // The process may close stdin without reading it.
            let _ = stdin.write_all(&payload).await;
            drop(stdin);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let span = logger.create_span();
        tokio::spawn(forward_stdout(stdout).instrument(span.clone()));
        let stderr_task = tokio::spawn(read_tail(stderr));

        let (kill_tx, kill_rx) = oneshot::channel();
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id.clone(), kill_tx);

        let job_id = job.id.clone();
        let timeout = self.config.timeout;
        let exits = self.exits.clone();
        let handles = self.handles.clone();
        tokio::spawn(
            async move {
                let outcome = tokio::select! {
                    status = child.wait() => match status {
                        Ok(status) if status.success() => ExitOutcome::Success,
                        Ok(status) => ExitOutcome::Failed {
                            code: status.code(),
                            stderr_tail: stderr_task.await.unwrap_or_default(),
                        },
                        Err(e) => ExitOutcome::Failed {
                            code: None,
                            stderr_tail: e.to_string(),
                        },
                    },
                    _ = tokio::time::sleep(timeout) => {
                        let _ = child.kill().await;
                        ExitOutcome::TimedOut { after: timeout }
                    }
                    _ = kill_rx => {
                        let _ = child.kill().await;
                        ExitOutcome::Killed
                    }
                };

                handles
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&job_id);
                metrics::record_workflow_exit(outcome.label());
                match &outcome {
                    ExitOutcome::Success => logger.log_completion("workflow process exited cleanly"),
                    ExitOutcome::Killed => logger.log_warning("workflow process terminated"),
                    other => logger.log_error(&other.error_message().unwrap_or_default()),
                }
                let _ = exits.send(ProcessExit { job_id, outcome });
            }
            .instrument(span),
        );

        Ok(())
    }

    async fn terminate(&self, job_id: &JobId) -> bool {
        let handle = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id);
        match handle {
            Some(kill) => kill.send(()).is_ok(),
            None => false,
        }
    }

    fn running(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

async fn forward_stdout<R: AsyncRead + Unpin>(stream: Option<R>) {
    let Some(stream) = stream else {
        return;
    };
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "vgen_worker::workflow", "{}", line);
    }
}

/// Read a stream to the end, keeping only the last [`STDERR_TAIL_BYTES`].
async fn read_tail<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    tail.drain(..tail.len() - STDERR_TAIL_BYTES);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn supervisor(script: &str, timeout: Duration, dir: &std::path::Path) -> (WorkflowSupervisor, mpsc::UnboundedReceiver<ProcessExit>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = SupervisorConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            timeout,
            work_dir: dir.to_path_buf(),
            callback_url: "http://127.0.0.1:1/webhooks/step-update".to_string(),
            webhook_secret: Some("s".to_string()),
        };
        (WorkflowSupervisor::new(config, tx), rx)
    }

    #[tokio::test]
    async fn test_success_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, mut rx) = supervisor("cat > /dev/null; exit 0", Duration::from_secs(10), dir.path());
        let job = Job::new(json!({"topic": "x"}), 6);

        sup.launch(&job, "worker-0").await.unwrap();
        let exit = rx.recv().await.unwrap();
        assert_eq!(exit.job_id, job.id);
        assert_eq!(exit.outcome, ExitOutcome::Success);
    }

    #[tokio::test]
    async fn test_env_is_process_local() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"[ "$VGEN_JOB_ID" = "$(basename "$(pwd -P)")" ] && [ -n "$VGEN_CALLBACK_URL" ] && [ "$VGEN_WEBHOOK_SECRET" = "s" ] || exit 7"#;
        let (sup, mut rx) = supervisor(script, Duration::from_secs(10), dir.path());
        let job = Job::new(json!({}), 6);

        sup.launch(&job, "worker-1").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().outcome, ExitOutcome::Success);
    }

    #[tokio::test]
    async fn test_nonzero_exit_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, mut rx) = supervisor("echo 'avatar synthesis failed' >&2; exit 3", Duration::from_secs(10), dir.path());
        let job = Job::new(json!({}), 6);

        sup.launch(&job, "worker-0").await.unwrap();
        let exit = rx.recv().await.unwrap();
        assert_eq!(
            exit.outcome,
            ExitOutcome::Failed {
                code: Some(3),
                stderr_tail: "avatar synthesis failed".to_string()
            }
        );
        assert_eq!(
            exit.outcome.error_message().unwrap(),
            "workflow exited with code 3: avatar synthesis failed"
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, mut rx) = supervisor("sleep 30", Duration::from_millis(100), dir.path());
        let job = Job::new(json!({}), 6);

        sup.launch(&job, "worker-0").await.unwrap();
        let exit = rx.recv().await.unwrap();
        assert!(matches!(exit.outcome, ExitOutcome::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, mut rx) = supervisor("sleep 30", Duration::from_secs(60), dir.path());
        let job = Job::new(json!({}), 6);

        sup.launch(&job, "worker-0").await.unwrap();
        assert_eq!(sup.running(), 1);
        assert!(sup.terminate(&job.id).await);
        assert!(!sup.terminate(&job.id).await);
        assert_eq!(rx.recv().await.unwrap().outcome, ExitOutcome::Killed);
    }

    #[tokio::test]
    async fn test_exited_processes_are_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let (sup, mut rx) = supervisor("exit 0", Duration::from_secs(10), dir.path());

        for _ in 0..20 {
            sup.launch(&Job::new(json!({}), 6), "worker-0").await.unwrap();
        }
        for _ in 0..20 {
            rx.recv().await.unwrap();
        }
        assert_eq!(sup.running(), 0);
    }

    #[tokio::test]
    async fn test_missing_command_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = SupervisorConfig {
            command: "/nonexistent/vgen-workflow".to_string(),
            work_dir: dir.path().to_path_buf(),
            ..SupervisorConfig::default()
        };
        let sup = WorkflowSupervisor::new(config, tx);
        let err = sup.launch(&Job::new(json!({}), 6), "worker-0").await.unwrap_err();
        assert!(matches!(err, WorkerError::SpawnFailed(_)));
    }
}
