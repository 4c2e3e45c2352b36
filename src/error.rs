use thiserror::Error;

use crate::backend::BackendError;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Job name is required")]
    EmptyName,

    #[error("Job {0} is already pending or running")]
    DuplicateName(String),

    #[error("Dispatcher is shutting down, not accepting new jobs")]
    ShuttingDown,

    #[error("Dispatcher has already been started")]
    AlreadyStarted,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
