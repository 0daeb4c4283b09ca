//! Export and deployment errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("{message}")]
    Export { message: String },

    #[error("task graph contains a cycle involving: {}", tasks.join(", "))]
    ExportCycle { tasks: Vec<String> },

    #[error("task '{task}' failed: {message}")]
    HandlerFailed { task: String, message: String },

    #[error("promise '{owner}.{name}' was never resolved")]
    PromiseUnresolved { owner: String, name: String },

    #[error("task '{task}' timed out after {seconds}s")]
    Timeout { task: String, seconds: u64 },

    #[error("deployment was cancelled")]
    Cancelled,
}

impl Error {
    pub fn export(message: impl Into<String>) -> Self {
        Error::Export {
            message: message.into(),
        }
    }
}
