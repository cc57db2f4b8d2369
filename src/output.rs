//! Per-task output stream
//!
//! [`FtpFileOutput`] buffers each output file locally and uploads it once it
//! is complete:
//!
//! ```text
//! Idle -> next_file -> Writing -> next_file | finish -> Uploading -> Writing | Closed
//! ```
//!
//! Files are uploaded strictly in `next_file` order. The sequence counter
//! advances when a file is closed, whatever happens to its upload.

use crate::config::OutputConfig;
use crate::error::{Error, Result};
use crate::ftp::FtpSession;
use crate::path::{PathResolver, RemotePath};
use crate::progress::LoggingTransferObserver;
use crate::retry::RetryPolicy;
use crate::session::RemoteSession;
use crate::temp::TempFileSpace;
use crate::types::{Buffer, PendingUpload, TaskReport};
use crate::upload::upload;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle state of an output stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputState {
    /// No file open
    Idle,
    /// A local file is open for writing
    Writing,
    /// A completed file is being uploaded
    Uploading,
    /// Finished or aborted; no further operations
    Closed,
}

impl OutputState {
    fn as_str(self) -> &'static str {
        match self {
            OutputState::Idle => "idle",
            OutputState::Writing => "writing",
            OutputState::Uploading => "uploading",
            OutputState::Closed => "closed",
        }
    }
}

struct OpenFile {
    writer: BufWriter<tokio::fs::File>,
    pending: PendingUpload,
}

/// Output stream of one task
pub struct FtpFileOutput<S = FtpSession>
where
    S: RemoteSession,
{
    session: S,
    resolver: PathResolver,
    temp_space: Arc<dyn TempFileSpace>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    task_index: u32,
    file_index: u32,
    state: OutputState,
    current: Option<OpenFile>,
    completed: Option<PendingUpload>,
    report: TaskReport,
}

impl<S> FtpFileOutput<S>
where
    S: RemoteSession,
{
    /// Create an output stream for `task_index` on an open session
    pub fn new(
        session: S,
        config: &OutputConfig,
        task_index: u32,
        temp_space: Arc<dyn TempFileSpace>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            session,
            resolver: PathResolver::from_config(config)?,
            temp_space,
            policy: RetryPolicy::from_config(config.max_connection_retry, &config.retry),
            cancel,
            task_index,
            file_index: 0,
            state: OutputState::Idle,
            current: None,
            completed: None,
            report: TaskReport {
                task_index,
                uploaded_files: Vec::new(),
            },
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> OutputState {
        self.state
    }

    /// Index the next opened file will get
    pub fn file_index(&self) -> u32 {
        self.file_index
    }

    /// Remote location of the file being written
    pub fn current_remote_path(&self) -> Option<&RemotePath> {
        self.current.as_ref().map(|f| &f.pending.remote)
    }

    /// The underlying session
    pub fn session(&self) -> &S {
        &self.session
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state.as_str(),
        }
    }

    /// Close the current file, upload the previous one, and open the next
    pub async fn next_file(&mut self) -> Result<()> {
        if self.state == OutputState::Closed {
            return Err(self.invalid("next_file"));
        }
        self.close_current().await?;
        self.upload_completed().await?;

        let remote = self.resolver.resolve(self.task_index, self.file_index);
        let temp_space = self.temp_space.clone();
        let prefix = remote.file_path.clone();
        let (file, local_path) =
            tokio::task::spawn_blocking(move || temp_space.create_temp_file(&prefix))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        info!(
            local_path = %local_path.display(),
            "Writing local temporary file \"{}\"",
            local_path.display()
        );

        self.current = Some(OpenFile {
            writer: BufWriter::new(tokio::fs::File::from_std(file)),
            pending: PendingUpload { local_path, remote },
        });
        self.state = OutputState::Writing;
        Ok(())
    }

    /// Append a buffer to the current file
    ///
    /// The buffer is released exactly once, whether or not the write succeeds.
    pub async fn add(&mut self, buffer: Buffer) -> Result<()> {
        let Some(open) = self.current.as_mut() else {
            return Err(self.invalid("add"));
        };
        open.writer.write_all(buffer.as_slice()).await?;
        drop(buffer);

        if let Err(e) = self.session.keep_alive().await {
            warn!(error = %e, "Keepalive failed");
        }
        Ok(())
    }

    /// Close the current file and upload it, then tear down the session
    ///
    /// The session is disconnected whatever the upload outcome.
    pub async fn finish(&mut self) -> Result<()> {
        if self.state == OutputState::Closed {
            return Err(self.invalid("finish"));
        }
        let result = match self.close_current().await {
            Ok(()) => self.upload_completed().await,
            Err(e) => Err(e),
        };
        self.session.disconnect().await;
        self.state = OutputState::Closed;
        result
    }

    /// Stop without any remote side effect
    ///
    /// Local files are left in the temp space.
    pub fn abort(&mut self) {
        if let Some(open) = self.current.take() {
            debug!(
                local_path = %open.pending.local_path.display(),
                "Aborting output, local file not uploaded"
            );
        }
        self.completed = None;
        self.state = OutputState::Closed;
    }

    /// Flush and close the current file without uploading it
    ///
    /// Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        self.close_current().await
    }

    /// Report what this task uploaded
    pub fn commit(&self) -> TaskReport {
        self.report.clone()
    }

    async fn close_current(&mut self) -> Result<()> {
        let Some(mut open) = self.current.take() else {
            return Ok(());
        };
        self.file_index += 1;
        if self.state == OutputState::Writing {
            self.state = OutputState::Idle;
        }
        let flushed = async {
            open.writer.flush().await?;
            open.writer.shutdown().await
        }
        .await;
        self.completed = Some(open.pending);
        flushed.map_err(Error::from)
    }

    async fn upload_completed(&mut self) -> Result<()> {
        let Some(pending) = self.completed.take() else {
            return Ok(());
        };
        self.state = OutputState::Uploading;
        let mut observer = LoggingTransferObserver::new(pending.remote_file_path());
        let result = upload(
            &mut self.session,
            Some(&pending),
            &self.policy,
            &self.cancel,
            &mut observer,
        )
        .await;
        self.state = OutputState::Idle;
        result?;
        self.report
            .uploaded_files
            .push(pending.remote.file_path.clone());
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FtpError;
    use crate::temp::LocalTempFileSpace;
    use crate::upload::tests::MockSession;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn config() -> OutputConfig {
        let mut config = OutputConfig::new("localhost", "/out/sample_", "csv");
        config.max_connection_retry = 1;
        config.retry.initial_wait = std::time::Duration::from_millis(1);
        config.retry.max_wait = std::time::Duration::from_millis(2);
        config
    }

    fn output(dir: &TempDir, session: MockSession) -> FtpFileOutput<MockSession> {
        FtpFileOutput::new(
            session,
            &config(),
            0,
            Arc::new(LocalTempFileSpace::new(dir.path())),
            CancellationToken::new(),
        )
        .unwrap()
    }

    fn store_failure() -> Error {
        Error::Ftp(FtpError::ProtocolReply {
            command: "STOR".to_string(),
            code: 451,
            message: "local error".to_string(),
        })
    }

    fn local_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn single_file_is_uploaded_on_finish() {
        let dir = TempDir::new().unwrap();
        let mut out = output(&dir, MockSession::connected());

        out.next_file().await.unwrap();
        assert_eq!(
            out.current_remote_path().unwrap().file_path,
            "/out/sample_000.00.csv"
        );
        out.add(Buffer::new(b"id,name\n".to_vec())).await.unwrap();
        out.add(Buffer::new(b"1,a\n".to_vec())).await.unwrap();
        out.finish().await.unwrap();

        let session = out.session();
        assert_eq!(session.stored.len(), 1);
        assert_eq!(session.stored[0].0, "/out/sample_000.00.csv");
        assert_eq!(session.stored[0].1, b"id,name\n1,a\n");
        assert_eq!(session.calls.last().unwrap(), "QUIT");
        assert_eq!(out.state(), OutputState::Closed);
        assert_eq!(local_files(&dir), 0, "local file deleted after upload");
        assert_eq!(
            out.commit().uploaded_files,
            vec!["/out/sample_000.00.csv".to_string()]
        );
    }

    /// Records the thread each allocation ran on
    struct ThreadRecordingSpace {
        inner: LocalTempFileSpace,
        threads: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl TempFileSpace for ThreadRecordingSpace {
        fn create_temp_file(&self, prefix: &str) -> Result<(std::fs::File, std::path::PathBuf)> {
            self.threads
                .lock()
                .unwrap()
                .push(std::thread::current().id());
            self.inner.create_temp_file(prefix)
        }
    }

    #[tokio::test]
    async fn temp_files_are_allocated_off_the_runtime_thread() {
        let dir = TempDir::new().unwrap();
        let space = Arc::new(ThreadRecordingSpace {
            inner: LocalTempFileSpace::new(dir.path()),
            threads: std::sync::Mutex::new(Vec::new()),
        });
        let mut out = FtpFileOutput::new(
            MockSession::connected(),
            &config(),
            0,
            space.clone(),
            CancellationToken::new(),
        )
        .unwrap();

        out.next_file().await.unwrap();
        out.next_file().await.unwrap();

        let threads = space.threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 2);
        // the current-thread test runtime drives tasks on this thread
        let runtime_thread = std::thread::current().id();
        assert!(threads.iter().all(|id| *id != runtime_thread));
        assert_eq!(local_files(&dir), 1);
    }

    #[tokio::test]
    async fn files_upload_in_next_file_order() {
        let dir = TempDir::new().unwrap();
        let mut out = output(&dir, MockSession::connected());

        out.next_file().await.unwrap();
        out.add(Buffer::new(b"first".to_vec())).await.unwrap();
        out.next_file().await.unwrap();
        out.add(Buffer::new(b"second".to_vec())).await.unwrap();
        out.finish().await.unwrap();

        let stored: Vec<_> = out.session().stored.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(stored, vec!["/out/sample_000.00.csv", "/out/sample_000.01.csv"]);
        assert_eq!(out.session().stored[1].1, b"second");
    }

    #[tokio::test]
    async fn sequence_advances_even_when_upload_fails() {
        let dir = TempDir::new().unwrap();
        let mut session = MockSession::connected();
        session.store_results.push_back(Err(store_failure()));
        session.store_results.push_back(Err(store_failure()));
        let mut out = output(&dir, session);

        out.next_file().await.unwrap();
        assert_eq!(out.file_index(), 0);
        out.add(Buffer::new(b"x".to_vec())).await.unwrap();

        let err = out.next_file().await.unwrap_err();
        assert!(matches!(err, Error::RetryGiveup { .. }), "got {err:?}");
        assert_eq!(out.file_index(), 1);
        assert_eq!(out.state(), OutputState::Idle);

        out.next_file().await.unwrap();
        assert_eq!(
            out.current_remote_path().unwrap().file_path,
            "/out/sample_000.01.csv"
        );
    }

    #[tokio::test]
    async fn buffer_released_once_on_success_and_failure() {
        let dir = TempDir::new().unwrap();
        let mut out = output(&dir, MockSession::connected());
        let released = Arc::new(AtomicU32::new(0));

        let counter = released.clone();
        let buffer = Buffer::with_release(b"before open".to_vec(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let err = out.add(buffer).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { operation: "add", .. }));
        assert_eq!(released.load(Ordering::SeqCst), 1);

        out.next_file().await.unwrap();
        let counter = released.clone();
        let buffer = Buffer::with_release(b"data".to_vec(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        out.add(buffer).await.unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn add_sends_keepalive() {
        let dir = TempDir::new().unwrap();
        let mut out = output(&dir, MockSession::connected());
        out.next_file().await.unwrap();
        out.add(Buffer::new(b"x".to_vec())).await.unwrap();
        assert_eq!(out.session().count("NOOP"), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_does_not_upload() {
        let dir = TempDir::new().unwrap();
        let mut out = output(&dir, MockSession::connected());
        out.next_file().await.unwrap();
        out.add(Buffer::new(b"x".to_vec())).await.unwrap();

        out.close().await.unwrap();
        out.close().await.unwrap();

        assert_eq!(out.file_index(), 1);
        assert_eq!(out.session().count("STOR"), 0);
        assert_eq!(local_files(&dir), 1);
    }

    #[tokio::test]
    async fn abort_has_no_remote_side_effects() {
        let dir = TempDir::new().unwrap();
        let mut out = output(&dir, MockSession::connected());
        out.next_file().await.unwrap();
        out.add(Buffer::new(b"x".to_vec())).await.unwrap();

        out.abort();
        out.close().await.unwrap();

        assert_eq!(out.state(), OutputState::Closed);
        assert_eq!(out.session().count("STOR"), 0);
        assert_eq!(out.session().count("QUIT"), 0);
        assert!(out.commit().uploaded_files.is_empty());
        assert!(out.next_file().await.is_err());
    }

    #[tokio::test]
    async fn finish_disconnects_even_when_upload_fails() {
        let dir = TempDir::new().unwrap();
        let mut session = MockSession::connected();
        for _ in 0..2 {
            session.store_results.push_back(Err(store_failure()));
        }
        let mut out = output(&dir, session);
        out.next_file().await.unwrap();

        assert!(out.finish().await.is_err());
        assert_eq!(out.session().calls.last().unwrap(), "QUIT");
        assert_eq!(out.state(), OutputState::Closed);
        assert_eq!(local_files(&dir), 1, "failed upload keeps local file");
    }

    #[tokio::test]
    async fn finish_without_files_only_disconnects() {
        let dir = TempDir::new().unwrap();
        let mut out = output(&dir, MockSession::connected());
        out.finish().await.unwrap();
        assert_eq!(out.session().calls, vec!["QUIT"]);
    }
}
