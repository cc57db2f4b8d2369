//! File uploader
//!
//! Uploads one pending local file under the retry controller. Each attempt
//! reconnects if the control connection was lost, makes sure the remote
//! directory exists, and streams the file from its first byte. The local
//! file is deleted only after the server confirmed the transfer.

use crate::error::{Error, FtpError, Result};
use crate::progress::TransferObserver;
use crate::retry::{self, RetryPolicy, Retryable};
use crate::session::RemoteSession;
use crate::types::PendingUpload;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct UploadAttempt<'a, S: ?Sized> {
    session: &'a mut S,
    pending: &'a PendingUpload,
    observer: &'a mut dyn TransferObserver,
}

#[async_trait]
impl<S> Retryable for UploadAttempt<'_, S>
where
    S: RemoteSession + ?Sized,
{
    type Output = u64;

    fn operation(&self) -> &str {
        "FTP upload"
    }

    async fn call(&mut self) -> Result<u64> {
        if !self.session.is_connected() {
            self.session.reconnect().await?;
        }

        ensure_directory(&mut *self.session, self.pending.remote_directory()).await?;

        let local_path = &self.pending.local_path;
        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(|source| FtpError::LocalIo {
                path: local_path.clone(),
                source,
            })?;

        let remote_path = self.pending.remote_file_path();
        info!(
            local_path = %local_path.display(),
            remote_path,
            "Uploading {}",
            remote_path
        );
        let bytes = self
            .session
            .store(remote_path, &mut file, &mut *self.observer)
            .await
            .map_err(|e| match e {
                Error::Io(source) => Error::Ftp(FtpError::LocalIo {
                    path: local_path.clone(),
                    source,
                }),
                other => other,
            })?;
        drop(file);

        if let Err(e) = tokio::fs::remove_file(local_path).await {
            return Err(Error::config(
                "temp_dir",
                format!("couldn't delete local file {}: {e}", local_path.display()),
            ));
        }
        debug!(local_path = %local_path.display(), "Deleted local file");
        Ok(bytes)
    }
}

/// Change into `directory`, creating it when the change fails
///
/// A refused MKD means the configured path can't be used; that is a
/// configuration error and ends the retries.
pub async fn ensure_directory<S>(session: &mut S, directory: &str) -> Result<()>
where
    S: RemoteSession + ?Sized,
{
    let cwd_error = match session.change_directory(directory).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if !session.is_connected() {
        return Err(cwd_error);
    }
    debug!(directory, error = %cwd_error, "CWD failed, creating directory");

    match session.create_directory(directory).await {
        Ok(()) => {
            info!(directory, "Created remote directory");
            Ok(())
        }
        Err(Error::Ftp(FtpError::Denied {
            command,
            code,
            message,
        })) => Err(Error::config(
            "path_prefix",
            format!("{command} {directory} denied by server: {code} {message}"),
        )),
        Err(e) => Err(e),
    }
}

/// Upload a pending file with retries
///
/// Returns the number of payload bytes sent, or `None` when there was
/// nothing to upload.
pub async fn upload<S>(
    session: &mut S,
    pending: Option<&PendingUpload>,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    observer: &mut dyn TransferObserver,
) -> Result<Option<u64>>
where
    S: RemoteSession + ?Sized,
{
    let Some(pending) = pending else {
        return Ok(None);
    };

    let mut attempt = UploadAttempt {
        session,
        pending,
        observer,
    };
    match retry::run(policy, cancel, &mut attempt).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) => {
            warn!(
                remote_path = pending.remote_file_path(),
                error = %e,
                "Upload failed"
            );
            Err(e)
        }
    }
}
