/// Error handling module for the game server runner.
///
/// This module defines the error types used throughout the library.
/// Every error maps to a status/message pair via [`Error::to_response`] so
/// that an outer HTTP layer can report it without knowing the variants.
///
/// # Example
///
/// ```
/// use gameserver_runner::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::AlreadyRunning) => println!("Server is already running"),
///         Err(Error::NotFound(what)) => println!("Server '{}' not found", what),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the gameserver-runner library.
///
/// Process-level failures (`SpawnFailed`, `WriteFailed`) leave the process
/// handle in a consistent, retryable state. A process that crashes is not an
/// error; it is simply observed as stopped.
#[derive(Error, Debug)]
pub enum Error {
    /// A server with the same unique name is already persisted.
    #[error("Server already exists: {0}")]
    AlreadyExists(String),

    /// The requested server identity is neither loaded nor persisted.
    #[error("Server not found: {0}")]
    NotFound(String),

    /// The acting user does not own the server.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The process handle already has a live process.
    ///
    /// This error occurs when:
    /// - Attempting to start a server that's already running
    /// - Attempting to start a server whose previous process has been
    ///   asked to stop but has not exited yet
    #[error("Already running")]
    AlreadyRunning,

    /// The process handle has no running process.
    ///
    /// This error occurs when:
    /// - Attempting to stop a server that's not running
    /// - Attempting to send a command to a server that's not running
    #[error("Not running")]
    NotRunning,

    /// Deleting a server is refused while its process is running.
    #[error("Server is running: {0}")]
    ServerRunning(String),

    /// The launch command is empty after splitting on whitespace.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The OS refused to spawn the process.
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    /// Writing to the process's standard input failed.
    #[error("Failed to write to process: {0}")]
    WriteFailed(String),

    /// The persistence collaborator failed.
    #[error("Persistence error: {0}")]
    PersistenceFailed(String),

    /// A jar or mod-pack reference could not be resolved to a file.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Preparing a server's working directory failed.
    #[error("Provisioning failed: {0}")]
    ProvisionFailed(String),

    /// Failed to parse configuration from a file or string.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains invalid values.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Operation timed out.
    ///
    /// This error occurs when a restart gives up waiting for the old
    /// process to exit.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// HTTP-style status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) | Error::ResourceNotFound(_) => 404,
            Error::Forbidden(_) => 403,
            Error::AlreadyExists(_)
            | Error::AlreadyRunning
            | Error::NotRunning
            | Error::ServerRunning(_) => 409,
            Error::InvalidCommand(_) | Error::ConfigParse(_) | Error::ConfigInvalid(_) => 400,
            Error::Timeout(_) => 504,
            Error::SpawnFailed(_)
            | Error::WriteFailed(_)
            | Error::PersistenceFailed(_)
            | Error::ProvisionFailed(_)
            | Error::Other(_) => 500,
        }
    }

    /// Converts the error into a serializable status/message pair.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            status: self.status_code(),
            message: self.to_string(),
        }
    }
}

/// Status/message pair reported to callers of the excluded HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP-style status code
    pub status: u16,
    /// Human readable message
    pub message: String,
}

/// Result type for gameserver-runner operations.
pub type Result<T> = std::result::Result<T, Error>;
