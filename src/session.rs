use crate::auth::AuthFlow;
use crate::classifier::classify;
use crate::config::AnalyzerSettings;
use crate::errors::{AppError, AppResult};
use crate::executor::ProcessExecutor;
use crate::extractor::extract_artifacts;
use crate::lifecycle::LifecycleMachine;
use crate::models::{
    AnalysisArtifacts, AnalysisState, AnalysisTarget, AuthState, Credentials, EventEnvelope,
    OutputFragment, RunRequest, SessionEvent, StartOutcome,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct SessionInner {
    lifecycle: LifecycleMachine,
    auth: AuthFlow,
    /// Append-only transcript of the current run's output, cleared only
    /// by an explicit reset or the start of a new run.
    transcript: String,
    artifacts: AnalysisArtifacts,
    /// Target parked while the authentication sub-flow runs in front of
    /// it.
    pending_target: Option<AnalysisTarget>,
    run_id: Option<String>,
}

/// One analysis session: lifecycle state machine, authentication
/// sub-flow, transcript and extracted artifacts, all mutated through a
/// single serialized entry point. Concurrent sessions are independent
/// instances sharing nothing.
///
/// Observers subscribe to the event feed; every state transition and
/// output fragment is published in the order it was applied.
#[derive(Clone)]
pub struct AnalysisSession {
    settings: AnalyzerSettings,
    executor: ProcessExecutor,
    inner: Arc<Mutex<SessionInner>>,
    events: broadcast::Sender<EventEnvelope>,
}

impl AnalysisSession {
    pub fn new(settings: AnalyzerSettings) -> Self {
        let executor = ProcessExecutor::new(settings.path_prefixes.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings,
            executor,
            inner: Arc::new(Mutex::new(SessionInner::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> AnalysisState {
        self.inner.lock().await.lifecycle.state().clone()
    }

    pub async fn auth_state(&self) -> AuthState {
        self.inner.lock().await.auth.state()
    }

    pub async fn identity(&self) -> Option<String> {
        self.inner.lock().await.auth.identity().map(str::to_string)
    }

    /// Immutable snapshot of the accumulated output of the current run.
    pub async fn transcript(&self) -> String {
        self.inner.lock().await.transcript.clone()
    }

    pub async fn artifacts(&self) -> AnalysisArtifacts {
        self.inner.lock().await.artifacts.clone()
    }

    fn emit(&self, run_id: Option<&str>, event: SessionEvent) {
        let _ = self.events.send(EventEnvelope {
            run_id: run_id.map(str::to_string),
            at: Utc::now(),
            event,
        });
    }

    /// Out-of-band probe for a prior session's stored authentication,
    /// run once at session start. Returns the stored identity if one
    /// exists.
    pub async fn detect_stored_auth(&self) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let email = inner.auth.probe_stored(&self.executor, &self.settings).await?;
        let state = inner.auth.state();
        drop(inner);
        self.emit(None, SessionEvent::AuthChanged { state });
        Some(email)
    }

    /// Starts an analysis. Local targets go straight to work; remote
    /// targets without a valid authentication park the target, enter the
    /// authentication sub-flow and return immediately. Otherwise the
    /// call suspends until the external process terminates.
    pub async fn start(&self, target: AnalysisTarget) -> AppResult<StartOutcome> {
        {
            let mut inner = self.inner.lock().await;
            if target.requires_authentication() && !inner.auth.is_authenticated() {
                inner.lifecycle.begin(AnalysisState::Authenticating)?;
                inner.pending_target = Some(target);
                drop(inner);
                self.emit(
                    None,
                    SessionEvent::StateChanged {
                        state: AnalysisState::Authenticating,
                    },
                );
                return Ok(StartOutcome::AuthenticationRequired);
            }
        }
        let artifacts = self.run_analysis(target).await?;
        Ok(StartOutcome::Completed(artifacts))
    }

    /// First authentication step. A one-time-code requirement keeps the
    /// caller in the sub-flow; reaching `Authenticated` resumes the
    /// parked analysis and suspends until it terminates.
    pub async fn authenticate(&self, credentials: &Credentials) -> AppResult<StartOutcome> {
        self.ensure_authenticating().await?;
        let result = {
            let mut inner = self.inner.lock().await;
            inner
                .auth
                .submit_credentials(&self.executor, &self.settings, credentials)
                .await
        };
        self.after_auth_step(result).await
    }

    /// Retry step with a one-time code; invalid codes may be retried
    /// without re-entering credentials.
    pub async fn submit_one_time_code(
        &self,
        credentials: &Credentials,
        one_time_code: &str,
    ) -> AppResult<StartOutcome> {
        self.ensure_authenticating().await?;
        let result = {
            let mut inner = self.inner.lock().await;
            inner
                .auth
                .submit_one_time_code(&self.executor, &self.settings, credentials, one_time_code)
                .await
        };
        self.after_auth_step(result).await
    }

    /// The caller dismissed the credential prompt; the run is abandoned.
    pub async fn cancel_authentication(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.lifecycle.state() != &AnalysisState::Authenticating {
            return Err(AppError::State(
                "no authentication in progress".to_string(),
            ));
        }
        inner.auth.abandon();
        inner.pending_target = None;
        let message = "authentication canceled".to_string();
        inner.lifecycle.fail(message.clone());
        let auth_state = inner.auth.state();
        drop(inner);
        self.emit(None, SessionEvent::AuthChanged { state: auth_state });
        self.emit(
            None,
            SessionEvent::StateChanged {
                state: AnalysisState::Failed(message.clone()),
            },
        );
        self.emit(None, SessionEvent::Failed { message });
        Ok(())
    }

    /// Explicit return to `Idle` from a terminal state. Clears the
    /// transcript and extracted artifacts; authentication is left as it
    /// is, so a new run does not re-authenticate.
    pub async fn reset(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.lifecycle.reset()?;
        inner.transcript.clear();
        inner.artifacts = AnalysisArtifacts::default();
        inner.pending_target = None;
        inner.run_id = None;
        drop(inner);
        self.emit(
            None,
            SessionEvent::StateChanged {
                state: AnalysisState::Idle,
            },
        );
        Ok(())
    }

    /// Best-effort recursive delete of the extracted working directory.
    /// Failure never changes a terminal lifecycle state.
    pub async fn cleanup_work_directory(&self) -> AppResult<()> {
        let work_directory = {
            let inner = self.inner.lock().await;
            inner.artifacts.work_directory.clone()
        };
        let Some(work_directory) = work_directory else {
            return Ok(());
        };
        if let Err(error) = tokio::fs::remove_dir_all(&work_directory).await {
            tracing::warn!(path = %work_directory, error = %error, "work directory cleanup failed");
            return Err(AppError::Io(error.to_string()));
        }
        self.inner.lock().await.artifacts.work_directory = None;
        Ok(())
    }

    async fn ensure_authenticating(&self) -> AppResult<()> {
        let inner = self.inner.lock().await;
        if inner.lifecycle.state() != &AnalysisState::Authenticating {
            return Err(AppError::State(
                "no authentication in progress".to_string(),
            ));
        }
        Ok(())
    }

    async fn after_auth_step(&self, result: AppResult<AuthState>) -> AppResult<StartOutcome> {
        match result {
            Ok(AuthState::AwaitingOneTimeCode) => {
                self.emit(
                    None,
                    SessionEvent::AuthChanged {
                        state: AuthState::AwaitingOneTimeCode,
                    },
                );
                Ok(StartOutcome::AuthenticationRequired)
            }
            Ok(AuthState::Authenticated) => {
                self.emit(
                    None,
                    SessionEvent::AuthChanged {
                        state: AuthState::Authenticated,
                    },
                );
                let target = self.inner.lock().await.pending_target.take();
                let Some(target) = target else {
                    return Err(AppError::Internal(
                        "authenticated without a parked analysis target".to_string(),
                    ));
                };
                let artifacts = self.run_analysis(target).await?;
                Ok(StartOutcome::Completed(artifacts))
            }
            Ok(other) => Err(AppError::Internal(format!(
                "unexpected authentication state {:?}",
                other
            ))),
            Err(error) => {
                let message = error.to_string();
                let mut inner = self.inner.lock().await;
                inner.pending_target = None;
                inner.lifecycle.fail(message.clone());
                let auth_state = inner.auth.state();
                drop(inner);
                self.emit(None, SessionEvent::AuthChanged { state: auth_state });
                self.emit(
                    None,
                    SessionEvent::StateChanged {
                        state: AnalysisState::Failed(message.clone()),
                    },
                );
                self.emit(None, SessionEvent::Failed { message });
                Err(error)
            }
        }
    }

    fn analysis_request(&self, target: &AnalysisTarget) -> AppResult<RunRequest> {
        let script = self.settings.resolve_script(target.platform())?;
        let script = script.to_string_lossy().to_string();
        let mut request = match target {
            AnalysisTarget::AppStoreUrl(url) => RunRequest::new(
                self.settings.shell.clone(),
                vec![script, "-u".to_string(), url.clone()],
            ),
            AnalysisTarget::LocalFile(path) => RunRequest::new(
                self.settings.shell.clone(),
                vec![script, "-f".to_string(), path.to_string_lossy().to_string()],
            ),
        };
        if target.requires_authentication() && self.settings.skip_auth_check {
            request = request.with_env("SKIP_AUTH_CHECK", "true");
        }
        Ok(request)
    }

    /// Runs the detection script to termination. Fragments are consumed
    /// strictly in arrival order and each one's signals are applied
    /// before the next; the terminal status is handled only after the
    /// consumer has drained everything, so an executor failure always
    /// overrides pending forward signals.
    async fn run_analysis(&self, target: AnalysisTarget) -> AppResult<AnalysisArtifacts> {
        let request = match self.analysis_request(&target) {
            Ok(request) => request,
            Err(error) => {
                let message = error.to_string();
                let mut inner = self.inner.lock().await;
                inner.lifecycle.fail(message.clone());
                drop(inner);
                self.emit(
                    None,
                    SessionEvent::StateChanged {
                        state: AnalysisState::Failed(message.clone()),
                    },
                );
                self.emit(None, SessionEvent::Failed { message });
                return Err(error);
            }
        };

        let run_id = Uuid::new_v4().to_string();
        let entry = {
            let mut inner = self.inner.lock().await;
            if inner.lifecycle.state() == &AnalysisState::Authenticating {
                inner.lifecycle.authenticated()?;
            } else {
                let entry = match &target {
                    AnalysisTarget::AppStoreUrl(_) => AnalysisState::Downloading,
                    AnalysisTarget::LocalFile(_) => AnalysisState::Analyzing,
                };
                inner.lifecycle.begin(entry)?;
            }
            inner.run_id = Some(run_id.clone());
            inner.transcript.clear();
            inner.artifacts = AnalysisArtifacts::default();
            inner.lifecycle.state().clone()
        };
        self.emit(Some(&run_id), SessionEvent::StateChanged { state: entry });
        tracing::info!(
            run_id = %run_id,
            platform = target.platform().as_str(),
            "starting analysis run"
        );

        let (sender, receiver) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume_fragments(self.clone(), run_id.clone(), receiver));
        let execution = self.executor.execute(&request, sender).await;
        // Join the consumer before touching terminal state: everything
        // the process produced has been applied once this returns.
        let _ = consumer.await;

        match execution {
            Ok(outcome) if outcome.success() => {
                let artifacts = extract_artifacts(&outcome.output);
                let mut inner = self.inner.lock().await;
                inner.lifecycle.complete()?;
                inner.artifacts = artifacts.clone();
                drop(inner);
                self.emit(
                    Some(&run_id),
                    SessionEvent::StateChanged {
                        state: AnalysisState::Completed,
                    },
                );
                self.emit(
                    Some(&run_id),
                    SessionEvent::Completed {
                        artifacts: artifacts.clone(),
                    },
                );
                Ok(artifacts)
            }
            Ok(outcome) => {
                let trimmed = outcome.output.trim();
                let message = if trimmed.is_empty() {
                    format!("analysis process exited with {:?}", outcome.exit_code)
                } else {
                    trimmed.to_string()
                };
                self.fail_run(&run_id, message).await;
                Err(AppError::Process {
                    exit_code: outcome.exit_code,
                    output: outcome.output,
                })
            }
            Err(error) => {
                self.fail_run(&run_id, error.to_string()).await;
                Err(error)
            }
        }
    }

    async fn fail_run(&self, run_id: &str, message: String) {
        let mut inner = self.inner.lock().await;
        inner.lifecycle.fail(message.clone());
        drop(inner);
        self.emit(
            Some(run_id),
            SessionEvent::StateChanged {
                state: AnalysisState::Failed(message.clone()),
            },
        );
        self.emit(Some(run_id), SessionEvent::Failed { message });
    }
}

async fn consume_fragments(
    session: AnalysisSession,
    run_id: String,
    mut receiver: mpsc::UnboundedReceiver<OutputFragment>,
) {
    while let Some(fragment) = receiver.recv().await {
        let advanced = {
            let mut inner = session.inner.lock().await;
            inner.transcript.push_str(&fragment.text);
            inner.lifecycle.apply_signals(&classify(&fragment.text))
        };
        session.emit(
            Some(&run_id),
            SessionEvent::Output {
                source: fragment.source,
                text: fragment.text,
            },
        );
        if let Some(state) = advanced {
            session.emit(Some(&run_id), SessionEvent::StateChanged { state });
        }
    }
}
