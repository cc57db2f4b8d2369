//! Error types for ftp-output
//!
//! This module provides the error handling for the library:
//! - [`FtpError`], the single tagged error for everything that goes wrong while
//!   talking to the server (network, reply codes, timeouts, denials, local reads)
//! - [`Error`], the crate-wide error that adds configuration problems, retry
//!   exhaustion and interruption on top of it
//! - [`ErrorCategory`], so callers can tell a misconfiguration apart from an
//!   exhausted retry budget or a broken local environment

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ftp-output operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure while talking to the FTP server
///
/// Every protocol-level failure collapses into one of these variants so that
/// retry classifiers only have to look at a single type.
#[derive(Debug, Error)]
pub enum FtpError {
    /// Socket or TLS level failure (connect, read, write, handshake)
    #[error("network error during {stage}: {source}")]
    Network {
        /// What the client was doing when the failure happened
        stage: &'static str,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The server answered with a reply code the client can't proceed with
    #[error("unexpected reply to {command}: {code} {message}")]
    ProtocolReply {
        /// The command that was answered (e.g. "STOR")
        command: String,
        /// FTP reply code, or 0 when the reply could not be parsed at all
        code: u16,
        /// Reply text
        message: String,
    },

    /// A single protocol step exceeded its timeout
    #[error("timed out during {0}")]
    Timeout(&'static str),

    /// The server refused the operation for policy or permission reasons
    #[error("{command} denied by server: {code} {message}")]
    Denied {
        /// The command that was refused (e.g. "MKD")
        command: String,
        /// FTP reply code
        code: u16,
        /// Reply text
        message: String,
    },

    /// Reading the local file that feeds a transfer failed
    #[error("local I/O error on {path}: {source}")]
    LocalIo {
        /// The local file being read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl FtpError {
    /// Build a network error for the given stage
    pub fn network(stage: &'static str, source: io::Error) -> Self {
        FtpError::Network { stage, source }
    }

    /// Build a reply error for a reply that could not be parsed
    pub fn malformed(command: impl Into<String>, message: impl Into<String>) -> Self {
        FtpError::ProtocolReply {
            command: command.into(),
            code: 0,
            message: message.into(),
        }
    }

    /// Returns true if the remote host actively refused the TCP connection
    pub fn is_connection_refused(&self) -> bool {
        matches!(
            self,
            FtpError::Network { source, .. } if source.kind() == io::ErrorKind::ConnectionRefused
        )
    }

    /// Returns true if this failure means the control connection can't be used anymore
    pub fn breaks_connection(&self) -> bool {
        match self {
            FtpError::Network { .. } | FtpError::Timeout(_) => true,
            // 421: service not available, closing control connection
            FtpError::ProtocolReply { code, .. } => *code == 421 || *code == 0,
            FtpError::Denied { .. } | FtpError::LocalIo { .. } => false,
        }
    }
}

/// Main error type for ftp-output
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration or logical error that retrying can never fix
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the problem
        message: String,
        /// The configuration key involved (e.g., "sequence_format")
        key: Option<String>,
    },

    /// FTP protocol or connection error
    #[error("FTP error: {0}")]
    Ftp(#[from] FtpError),

    /// Retry budget consumed without success
    #[error("gave up after {attempts} attempts: {last}")]
    RetryGiveup {
        /// Number of attempts that were made (first attempt included)
        attempts: u32,
        /// The error of the final attempt
        #[source]
        last: Box<Error>,
    },

    /// The operation was cancelled from outside
    #[error("operation interrupted")]
    Interrupted,

    /// Local I/O error (temp file space, buffered writes)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation called in a lifecycle state that doesn't allow it
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// The operation that was attempted (e.g., "add")
        operation: &'static str,
        /// The current state (e.g., "idle")
        state: &'static str,
    },
}

/// Coarse classification used to decide who has to act on a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Misconfiguration or server policy; the user has to change something
    Configuration,
    /// Retries against a flaky server were exhausted
    RetryExhausted,
    /// The local machine failed (disk, temp space)
    Environment,
    /// A network or protocol failure that was not retried
    Network,
    /// Cancelled from outside
    Interrupted,
}

impl Error {
    /// Build a configuration error bound to a configuration key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Classify this error for reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config { .. } => ErrorCategory::Configuration,
            Error::RetryGiveup { .. } => ErrorCategory::RetryExhausted,
            Error::Interrupted => ErrorCategory::Interrupted,
            Error::Io(_) | Error::InvalidState { .. } => ErrorCategory::Environment,
            Error::Ftp(FtpError::LocalIo { .. }) => ErrorCategory::Environment,
            Error::Ftp(FtpError::Denied { .. }) => ErrorCategory::Configuration,
            Error::Ftp(_) => ErrorCategory::Network,
        }
    }

    /// Returns true if the user has to fix configuration or server setup
    pub fn is_user_actionable(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// The original failure behind any number of retry giveups
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Error::RetryGiveup { last, .. } = current {
            current = last;
        }
        current
    }

    /// Unwrap a retry giveup into the error of its final attempt
    pub fn into_root_cause(self) -> Error {
        match self {
            Error::RetryGiveup { last, .. } => last.into_root_cause(),
            other => other,
        }
    }

    /// Returns true if the remote host refused the connection
    pub fn is_connection_refused(&self) -> bool {
        matches!(self.root_cause(), Error::Ftp(e) if e.is_connection_refused())
    }
}
