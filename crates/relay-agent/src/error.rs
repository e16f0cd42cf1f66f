//! Error types for relay-agent

use thiserror::Error;

/// Result type alias using relay-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model API layer
    #[error(transparent)]
    Ai(#[from] relay_ai::Error),

    /// The user submitted an empty message
    #[error("Message is empty")]
    EmptyInput,

    /// The tool backend failed
    #[error(transparent)]
    Backend(#[from] crate::backend::BackendError),

    /// A backend handle was resolved twice
    #[error("Tool backend was already resolved")]
    AlreadyResolved,
}
