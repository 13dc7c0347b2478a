use crate::classifier::LifecycleSignal;
use crate::errors::{AppError, AppResult};
use crate::models::AnalysisState;

/// Forward-progress order of the phases. `Completed` and `Failed` share
/// the top rank: both are terminal and neither supersedes the other
/// through ranking (the executor's terminal status decides).
fn rank(state: &AnalysisState) -> u8 {
    match state {
        AnalysisState::Idle => 0,
        AnalysisState::Authenticating => 1,
        AnalysisState::Downloading => 2,
        AnalysisState::Analyzing => 3,
        AnalysisState::Completed | AnalysisState::Failed(_) => 4,
    }
}

fn signal_target(signal: LifecycleSignal) -> Option<AnalysisState> {
    match signal {
        LifecycleSignal::DownloadStarted => Some(AnalysisState::Downloading),
        LifecycleSignal::AnalysisStarted | LifecycleSignal::ReportGenerating => {
            Some(AnalysisState::Analyzing)
        }
        // Authentication signals drive the sub-flow, not the lifecycle.
        LifecycleSignal::OneTimeCodeRequired | LifecycleSignal::AuthSucceeded => None,
    }
}

/// Single source of truth for the phase of one analysis session. All
/// transitions go through here; classifier output can only ever advance
/// the phase, never regress it, and terminal states only leave through
/// an explicit reset.
#[derive(Debug, Default)]
pub struct LifecycleMachine {
    state: AnalysisState,
}

impl LifecycleMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AnalysisState {
        &self.state
    }

    /// Caller-driven entry into a run: authentication first, straight to
    /// downloading with valid credentials, or straight to analyzing for
    /// local targets.
    pub fn begin(&mut self, entry: AnalysisState) -> AppResult<()> {
        if self.state != AnalysisState::Idle {
            return Err(AppError::State(format!(
                "cannot start a run from {:?}",
                self.state
            )));
        }
        match entry {
            AnalysisState::Authenticating
            | AnalysisState::Downloading
            | AnalysisState::Analyzing => {
                self.state = entry;
                Ok(())
            }
            other => Err(AppError::State(format!(
                "{:?} is not a run entry state",
                other
            ))),
        }
    }

    /// Authentication sub-flow reached `Authenticated`; the parked run
    /// proceeds to its download phase.
    pub fn authenticated(&mut self) -> AppResult<()> {
        if self.state != AnalysisState::Authenticating {
            return Err(AppError::State(format!(
                "authenticated while in {:?}",
                self.state
            )));
        }
        self.state = AnalysisState::Downloading;
        Ok(())
    }

    /// Applies the signals classified out of one output fragment. The
    /// most-advanced candidate wins; regressions and signals outside a
    /// running phase are ignored. Returns the new state if it changed.
    pub fn apply_signals(&mut self, signals: &[LifecycleSignal]) -> Option<AnalysisState> {
        if !matches!(
            self.state,
            AnalysisState::Downloading | AnalysisState::Analyzing
        ) {
            return None;
        }
        let best = signals
            .iter()
            .filter_map(|signal| signal_target(*signal))
            .max_by_key(rank)?;
        if rank(&best) > rank(&self.state) {
            tracing::debug!(from = ?self.state, to = ?best, "lifecycle advanced by output signal");
            self.state = best.clone();
            Some(best)
        } else {
            None
        }
    }

    /// Successful process termination. Legal only from a running phase;
    /// a session can never jump from `Idle` to `Completed`.
    pub fn complete(&mut self) -> AppResult<()> {
        if !matches!(
            self.state,
            AnalysisState::Downloading | AnalysisState::Analyzing
        ) {
            return Err(AppError::State(format!(
                "completed while in {:?}",
                self.state
            )));
        }
        self.state = AnalysisState::Completed;
        Ok(())
    }

    /// Terminal failure with a human-readable reason. Already-terminal
    /// states are left untouched: a terminated run applies no further
    /// transitions.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = AnalysisState::Failed(reason.into());
    }

    /// Explicit caller reset, the only way out of a terminal state.
    pub fn reset(&mut self) -> AppResult<()> {
        if !self.state.is_terminal() {
            return Err(AppError::State(format!(
                "cannot reset while in {:?}",
                self.state
            )));
        }
        self.state = AnalysisState::Idle;
        Ok(())
    }
}
