use thiserror::Error;

/// Errors surfaced by the crew engine and its providers.
///
/// Tool failures are deliberately absent: they travel back to the agent as
/// observations and are recorded on the task output instead.
#[derive(Debug, Error)]
pub enum CrewError {
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    #[error("invalid blueprint: {0}")]
    InvalidBlueprint(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("assistant '{0}' is not valid")]
    UnknownAssistant(String),

    #[error("model '{0}' is not an allowed choice")]
    UnknownModel(String),

    #[error("file processing failed: {0}")]
    FileProcessing(String),

    #[error("task '{0}' did not complete")]
    TaskAborted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CrewError {
    /// True for errors caused by the caller's input rather than by a backend.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CrewError::InvalidInput(_)
                | CrewError::InvalidUpload(_)
                | CrewError::UnknownAssistant(_)
                | CrewError::UnknownModel(_)
        )
    }
}

impl From<async_openai::error::OpenAIError> for CrewError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        CrewError::Provider(err.to_string())
    }
}

impl From<reqwest::Error> for CrewError {
    fn from(err: reqwest::Error) -> Self {
        CrewError::Provider(err.to_string())
    }
}

pub type Result<T, E = CrewError> = std::result::Result<T, E>;
