use crate::classifier::{classify, LifecycleSignal};
use crate::config::AnalyzerSettings;
use crate::errors::{AppError, AppResult};
use crate::executor::ProcessExecutor;
use crate::extractor::strip_ansi;
use crate::models::{AuthState, Credentials, ProcessOutcome, RunRequest};
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"email=\S*").expect("valid email field regex"));

/// The tool reports success through exit status zero, but some versions
/// only say so in prose. Deliberately lenient; see DESIGN.md.
fn attempt_succeeded(outcome: &ProcessOutcome) -> bool {
    outcome.success() || classify(&outcome.output).contains(&LifecycleSignal::AuthSucceeded)
}

fn one_time_code_required(output: &str) -> bool {
    classify(output).contains(&LifecycleSignal::OneTimeCodeRequired)
}

fn extract_email(output: &str) -> Option<String> {
    let field = EMAIL_FIELD_RE.find(output)?;
    let value = field.as_str().strip_prefix("email=")?;
    let clean = strip_ansi(value).trim().to_string();
    if clean.is_empty() {
        None
    } else {
        Some(clean)
    }
}

fn failure_message(outcome: &ProcessOutcome) -> String {
    let trimmed = outcome.output.trim();
    if trimmed.is_empty() {
        format!("authentication failed with exit {:?}", outcome.exit_code)
    } else {
        trimmed.to_string()
    }
}

/// The credential → one-time-code → success negotiation in front of a
/// remote analysis run. Re-entrant: a rejected code can be retried
/// without re-entering credentials. Credentials themselves are only ever
/// borrowed for the duration of one attempt.
#[derive(Debug, Default)]
pub struct AuthFlow {
    state: AuthState,
    identity: Option<String>,
}

impl AuthFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    /// Email of the account this session is authenticated as, when known.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    fn login_request(
        settings: &AnalyzerSettings,
        credentials: &Credentials,
        one_time_code: Option<&str>,
    ) -> RunRequest {
        let mut args = vec![
            "auth".to_string(),
            "login".to_string(),
            "--email".to_string(),
            credentials.email.clone(),
            "--password".to_string(),
            credentials.password.clone(),
            "--non-interactive".to_string(),
        ];
        if let Some(code) = one_time_code {
            args.push("--auth-code".to_string());
            args.push(code.to_string());
        }
        RunRequest::new(settings.ipatool_binary.clone(), args)
    }

    fn info_request(settings: &AnalyzerSettings) -> RunRequest {
        RunRequest::new(
            settings.ipatool_binary.clone(),
            vec!["auth".to_string(), "info".to_string()],
        )
    }

    /// Idempotent probe of the tool's stored credential state, run at
    /// session start. A stored login yields the associated email (with
    /// any terminal styling stripped) and marks the flow authenticated;
    /// anything else leaves the flow untouched.
    pub async fn probe_stored(
        &mut self,
        executor: &ProcessExecutor,
        settings: &AnalyzerSettings,
    ) -> Option<String> {
        let outcome = match executor.capture(&Self::info_request(settings)).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::debug!(error = %error, "stored auth probe could not run");
                return None;
            }
        };
        let email = extract_email(&outcome.output)?;
        self.state = AuthState::Authenticated;
        self.identity = Some(email.clone());
        Some(email)
    }

    /// First authentication attempt with email and password. Output
    /// indicating a one-time code requirement (either phrasing the tool
    /// uses) is a normal transition to `AwaitingOneTimeCode`, not a
    /// failure.
    pub async fn submit_credentials(
        &mut self,
        executor: &ProcessExecutor,
        settings: &AnalyzerSettings,
        credentials: &Credentials,
    ) -> AppResult<AuthState> {
        self.state = AuthState::AwaitingCredentials;
        let request = Self::login_request(settings, credentials, None);
        let outcome = match executor.capture(&request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.state = AuthState::AuthFailed;
                return Err(error);
            }
        };

        if one_time_code_required(&outcome.output) {
            self.state = AuthState::AwaitingOneTimeCode;
            return Ok(self.state);
        }
        if attempt_succeeded(&outcome) {
            self.state = AuthState::Authenticated;
            self.identity = Some(credentials.email.clone());
            return Ok(self.state);
        }
        self.state = AuthState::AuthFailed;
        Err(AppError::Auth(failure_message(&outcome)))
    }

    /// Retry step with a one-time code, re-sending the same credentials.
    /// An invalid code keeps the flow in `AwaitingOneTimeCode` as long as
    /// the tool's wording matches the code-prompt vocabulary; any other
    /// failure is non-recoverable.
    pub async fn submit_one_time_code(
        &mut self,
        executor: &ProcessExecutor,
        settings: &AnalyzerSettings,
        credentials: &Credentials,
        one_time_code: &str,
    ) -> AppResult<AuthState> {
        if self.state != AuthState::AwaitingOneTimeCode {
            return Err(AppError::State(format!(
                "one-time code submitted while {:?}",
                self.state
            )));
        }

        let request = Self::login_request(settings, credentials, Some(one_time_code));
        let outcome = match executor.capture(&request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.state = AuthState::AuthFailed;
                return Err(error);
            }
        };

        if attempt_succeeded(&outcome) && !one_time_code_required(&outcome.output) {
            self.state = AuthState::Authenticated;
            self.identity = Some(credentials.email.clone());
            return Ok(self.state);
        }
        if one_time_code_required(&outcome.output) {
            // Bad code; the caller may submit another one.
            return Ok(AuthState::AwaitingOneTimeCode);
        }
        self.state = AuthState::AuthFailed;
        Err(AppError::Auth(failure_message(&outcome)))
    }

    /// The caller abandoned the negotiation.
    pub fn abandon(&mut self) {
        if self.state != AuthState::Authenticated {
            self.state = AuthState::AuthFailed;
        }
    }
}
