pub mod auth;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod executor;
pub mod extractor;
pub mod lifecycle;
pub mod models;
pub mod session;

pub use crate::auth::AuthFlow;
pub use crate::classifier::{classify, LifecycleSignal};
pub use crate::config::AnalyzerSettings;
pub use crate::errors::{AppError, AppResult};
pub use crate::executor::ProcessExecutor;
pub use crate::extractor::{extract_artifacts, strip_ansi};
pub use crate::lifecycle::LifecycleMachine;
pub use crate::models::{
    AnalysisArtifacts, AnalysisState, AnalysisTarget, AuthState, Credentials, EventEnvelope,
    OutputFragment, Platform, ProcessOutcome, RunRequest, SessionEvent, StartOutcome,
    StreamSource,
};
pub use crate::session::AnalysisSession;

/// Installs the global tracing subscriber, honoring `RUST_LOG`. Safe to
/// call more than once; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
