use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

/// Phase of one analysis session. `Failed` carries the raw diagnostic
/// text when the external process produced any, else a generic message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "reason", rename_all = "kebab-case")]
pub enum AnalysisState {
    #[default]
    Idle,
    Authenticating,
    Downloading,
    Analyzing,
    Completed,
    Failed(String),
}

impl AnalysisState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthState {
    #[default]
    NotStarted,
    AwaitingCredentials,
    AwaitingOneTimeCode,
    Authenticated,
    AuthFailed,
}

/// What the caller asked to analyze. Remote targets require an
/// authenticated session before the run can start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum AnalysisTarget {
    AppStoreUrl(String),
    LocalFile(PathBuf),
}

impl AnalysisTarget {
    pub fn platform(&self) -> Platform {
        match self {
            Self::AppStoreUrl(_) => Platform::Ios,
            Self::LocalFile(_) => Platform::Android,
        }
    }

    pub fn requires_authentication(&self) -> bool {
        matches!(self, Self::AppStoreUrl(_))
    }
}

/// Immutable description of one external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl RunRequest {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl StreamSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One chunk of child output, forwarded as soon as it is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFragment {
    pub source: StreamSource,
    pub text: String,
}

/// Terminal result of a run that actually started. Failure to start at
/// all is reported as an error instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub output: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisArtifacts {
    pub report_path: Option<String>,
    pub work_directory: Option<String>,
}

/// Apple ID credentials for one authentication attempt. Never persisted;
/// the password is kept out of debug output.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The target needs an authenticated session first; the session has
    /// parked the target and entered the authentication sub-flow.
    AuthenticationRequired,
    Completed(AnalysisArtifacts),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    StateChanged { state: AnalysisState },
    AuthChanged { state: AuthState },
    Output { source: StreamSource, text: String },
    Completed { artifacts: AnalysisArtifacts },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub run_id: Option<String>,
    pub at: DateTime<Utc>,
    pub event: SessionEvent,
}
