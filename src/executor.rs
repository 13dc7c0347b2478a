use crate::errors::{AppError, AppResult};
use crate::models::{OutputFragment, ProcessOutcome, RunRequest, StreamSource};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

const READ_CHUNK_BYTES: usize = 4096;

/// Launches external processes and drains both output streams
/// concurrently. A stream left undrained can fill its pipe buffer and
/// stall the child indefinitely, so both drains run for the whole life
/// of the process.
///
/// One executor per session; independent sessions use independent
/// instances.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    path_prefixes: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(path_prefixes: Vec<String>) -> Self {
        Self { path_prefixes }
    }

    /// PATH for the child: configured prefixes prepended to the
    /// request's own PATH override, or the inherited one. Prepended, not
    /// replaced, so user-provided entries stay reachable.
    fn merged_path(&self, request: &RunRequest) -> String {
        let inherited = request
            .env
            .get("PATH")
            .cloned()
            .or_else(|| std::env::var("PATH").ok())
            .unwrap_or_else(|| "/usr/bin:/bin".to_string());
        if self.path_prefixes.is_empty() {
            return inherited;
        }
        let mut parts = self.path_prefixes.clone();
        parts.push(inherited);
        parts.join(":")
    }

    /// Runs the request to completion, forwarding each output chunk on
    /// `fragments` as soon as it is read. Both drain tasks are joined
    /// and the sender dropped before the outcome is returned, so no
    /// fragment is delivered after the terminal status.
    ///
    /// A process that could not be spawned is `AppError::Launch`; a
    /// process that ran returns its exit code and full accumulated
    /// output whether it succeeded or not.
    pub async fn execute(
        &self,
        request: &RunRequest,
        fragments: mpsc::UnboundedSender<OutputFragment>,
    ) -> AppResult<ProcessOutcome> {
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &request.env {
            command.env(key, value);
        }
        command.env("PATH", self.merged_path(request));

        tracing::debug!(program = %request.program, args = ?request.args, "spawning process");
        let mut child = command.spawn().map_err(|error| {
            AppError::Launch(format!("failed to spawn {}: {}", request.program, error))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let accumulated = Arc::new(Mutex::new(String::new()));

        let stdout_task = stdout.map(|stream| {
            drain_stream(
                stream,
                StreamSource::Stdout,
                accumulated.clone(),
                fragments.clone(),
            )
        });
        let stderr_task = stderr.map(|stream| {
            drain_stream(
                stream,
                StreamSource::Stderr,
                accumulated.clone(),
                fragments.clone(),
            )
        });
        drop(fragments);

        let status = child
            .wait()
            .await
            .map_err(|error| AppError::Io(format!("failed to wait for process: {}", error)))?;

        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let output = accumulated.lock().await.clone();
        tracing::debug!(exit_code = ?status.code(), bytes = output.len(), "process exited");
        Ok(ProcessOutcome {
            exit_code: status.code(),
            output,
        })
    }

    /// Runs the request without a live fragment feed; the accumulated
    /// output still arrives with the outcome. Used for short probe-style
    /// invocations such as the stored-authentication check.
    pub async fn capture(&self, request: &RunRequest) -> AppResult<ProcessOutcome> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let drain = tokio::spawn(async move { while receiver.recv().await.is_some() {} });
        let outcome = self.execute(request, sender).await;
        let _ = drain.await;
        outcome
    }
}

fn drain_stream(
    stream: impl AsyncRead + Unpin + Send + 'static,
    source: StreamSource,
    accumulated: Arc<Mutex<String>>,
    fragments: mpsc::UnboundedSender<OutputFragment>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(size) => {
                    let text = String::from_utf8_lossy(&chunk[..size]).to_string();
                    if text.is_empty() {
                        continue;
                    }
                    // Append and send under one lock acquisition so the
                    // transcript order matches delivery order across the
                    // two streams.
                    let mut buffer = accumulated.lock().await;
                    buffer.push_str(&text);
                    let _ = fragments.send(OutputFragment { source, text });
                }
                Err(error) => {
                    tracing::warn!(source = source.as_str(), error = %error, "stream read failed");
                    break;
                }
            }
        }
    })
}
