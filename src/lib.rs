//! # ftp-output
//!
//! Resilient file output to FTP and FTPS servers.
//!
//! Output data is buffered into local temporary files, one per output file,
//! and each completed file is uploaded to a remote path derived from a
//! prefix, a sequence format and a suffix. Connects and uploads are retried
//! with exponential backoff; the local file is deleted only after the server
//! confirmed the upload.
//!
//! ## Design Philosophy
//!
//! ftp-output is designed to be:
//! - **At-least-once** - A file is uploaded completely before it is cleaned up
//! - **Explicit about failure** - Configuration problems, exhausted retries and
//!   local environment problems are told apart by [`ErrorCategory`]
//! - **Library-first** - No CLI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use ftp_output::{Buffer, FtpFileOutputPlugin};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let plugin = FtpFileOutputPlugin::from_json(
//!         r#"{"host":"ftp.example.com","user":"bob","password":"secret",
//!             "path_prefix":"/out/sample_","file_ext":"csv"}"#,
//!     )?;
//!     ftp_output::cancel_on_shutdown(plugin.cancellation_token());
//!
//!     plugin.transaction().await?;
//!
//!     let mut output = plugin.open(0).await?;
//!     output.next_file().await?;
//!     output.add(Buffer::new(b"id,name\n1,alice\n".to_vec())).await?;
//!     output.finish().await?;
//!     println!("{:?}", output.commit());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Transport connector
pub mod connector;
/// Error types
pub mod error;
/// FTP/FTPS client session
pub mod ftp;
/// Per-task output stream
pub mod output;
/// Remote path resolution
pub mod path;
/// Plugin entry points
pub mod plugin;
/// Transfer progress reporting
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Remote session abstraction
pub mod session;
/// Local temporary file space
pub mod temp;
/// Core types
pub mod types;
/// File uploader
pub mod upload;

// Re-export commonly used types
pub use config::{OutputConfig, RetryConfig, Security, TimeoutConfig, TlsConfig};
pub use connector::connect;
pub use error::{Error, ErrorCategory, FtpError, Result};
pub use ftp::{FtpSession, TlsSessionFactory};
pub use output::{FtpFileOutput, OutputState};
pub use path::{PathResolver, RemotePath, SequenceFormat};
pub use plugin::FtpFileOutputPlugin;
pub use progress::{LoggingTransferObserver, TransferObserver, TransferProgress};
pub use retry::{Classification, RetryPolicy};
pub use session::{RemoteSession, SessionState};
pub use temp::{LocalTempFileSpace, TempFileSpace};
pub use types::{Buffer, PendingUpload, TaskReport};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal.
///
/// Spawns a task that waits for the signal; cancelling the token interrupts
/// running connects, uploads and retry waits, which then fail with
/// [`Error::Interrupted`].
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Must be called from within a tokio runtime.
pub fn cancel_on_shutdown(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = wait_for_signal() => {
                tracing::info!("Shutdown signal received, cancelling FTP output");
                token.cancel();
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
