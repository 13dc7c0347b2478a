use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("LAUNCH_FAILED: {0}")]
    Launch(String),
    #[error("PROCESS_FAILED: exit {exit_code:?}: {output}")]
    Process {
        exit_code: Option<i32>,
        output: String,
    },
    #[error("AUTH_FAILED: {0}")]
    Auth(String),
    #[error("STATE_INVALID: {0}")]
    State(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
