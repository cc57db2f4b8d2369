//! Transport connector
//!
//! Opens a ready [`FtpSession`]: the transport attempt (TCP, TLS, greeting)
//! runs under the retry controller, login and transfer negotiation run once.
//! A failure at any stage disconnects the partial session before the error
//! propagates.

use crate::config::OutputConfig;
use crate::error::{Error, Result};
use crate::ftp::FtpSession;
use crate::retry::{self, Classification, RetryPolicy, Retryable};
use crate::session::RemoteSession;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Connect failures are retried unless the host actively refused the connection
pub fn classify_connect_error(error: &Error) -> Classification {
    match error {
        Error::Interrupted | Error::Config { .. } | Error::InvalidState { .. } => {
            Classification::Fatal
        }
        e if e.is_connection_refused() => Classification::Fatal,
        _ => Classification::Transient,
    }
}

struct ConnectAttempt<'a> {
    session: &'a mut FtpSession,
}

#[async_trait]
impl Retryable for ConnectAttempt<'_> {
    type Output = ();

    fn operation(&self) -> &str {
        "FTP connect"
    }

    async fn call(&mut self) -> Result<()> {
        self.session.establish().await
    }

    fn classify(&self, error: &Error) -> Classification {
        classify_connect_error(error)
    }
}

/// Open a session ready for commands
///
/// Retries the transport connect up to `max_connection_retry` times.
/// Connection refused fails immediately with the original error.
pub async fn connect(config: Arc<OutputConfig>, cancel: &CancellationToken) -> Result<FtpSession> {
    let mut session = FtpSession::new(config.clone())?;
    info!(
        host = %config.host,
        port = config.effective_port(),
        security = ?config.security(),
        "Opening FTP session"
    );

    let policy = RetryPolicy::from_config(config.max_connection_retry, &config.retry);
    let connected = retry::run(&policy, cancel, &mut ConnectAttempt { session: &mut session }).await;
    if let Err(e) = connected {
        session.disconnect().await;
        return Err(e);
    }

    if let Err(e) = session.negotiate().await {
        session.disconnect().await;
        return Err(e);
    }
    Ok(session)
}
