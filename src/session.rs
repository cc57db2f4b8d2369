//! Remote session abstraction
//!
//! [`RemoteSession`] is the seam between the upload logic and the FTP client.
//! The production implementation is [`crate::ftp::FtpSession`]; tests plug in
//! scripted sessions.

use crate::error::Result;
use crate::progress::TransferObserver;
use async_trait::async_trait;
use std::fmt;
use tokio::io::AsyncRead;

/// Lifecycle state of a control connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No control connection
    Disconnected,
    /// Transport connect in progress
    Connecting,
    /// Greeting received (and TLS established when configured)
    Connected,
    /// Login accepted
    Authenticated,
    /// Transfer parameters negotiated; commands may be issued
    Ready,
}

impl SessionState {
    /// Lowercase name used in logs and state errors
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Authenticated => "authenticated",
            SessionState::Ready => "ready",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One live control connection to a file server
///
/// A session is owned by exactly one output stream and never shared.
#[async_trait]
pub trait RemoteSession: Send {
    /// Current lifecycle state
    fn state(&self) -> SessionState;

    /// Returns true if commands can be issued without reconnecting
    fn is_connected(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Change the working directory
    async fn change_directory(&mut self, directory: &str) -> Result<()>;

    /// Create a directory; a policy refusal is reported as `FtpError::Denied`
    async fn create_directory(&mut self, directory: &str) -> Result<()>;

    /// Store everything `source` yields as `remote_path`, returning the bytes read
    async fn store(
        &mut self,
        remote_path: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
        observer: &mut dyn TransferObserver,
    ) -> Result<u64>;

    /// Re-establish a lost control connection (single attempt, no retries)
    async fn reconnect(&mut self) -> Result<()>;

    /// Keep an idle control connection from timing out
    async fn keep_alive(&mut self) -> Result<()>;

    /// Close the connection; errors are logged and swallowed
    async fn disconnect(&mut self);
}
