//! Core types for ftp-output

use crate::path::RemotePath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A local file waiting to be uploaded to its remote location
///
/// At most one is live per output stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingUpload {
    /// Local temporary file holding the data
    pub local_path: PathBuf,
    /// Where the file goes on the server
    pub remote: RemotePath,
}

impl PendingUpload {
    /// Remote directory that must exist before the transfer
    pub fn remote_directory(&self) -> &str {
        &self.remote.directory
    }

    /// Full remote file path
    pub fn remote_file_path(&self) -> &str {
        &self.remote.file_path
    }
}

/// Receipt returned by `commit`
///
/// No state is carried between tasks, so the report only describes what
/// this task did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Task index the output stream was opened for
    pub task_index: u32,
    /// Remote paths uploaded successfully, in upload order
    pub uploaded_files: Vec<String>,
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// A chunk of payload handed to `add`
///
/// The optional release hook runs exactly once, when the buffer is dropped.
/// `add` consumes the buffer, so it is released whether or not the write
/// succeeds.
pub struct Buffer {
    data: Vec<u8>,
    on_release: Option<ReleaseHook>,
}

impl Buffer {
    /// Wrap bytes with no release hook
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            on_release: None,
        }
    }

    /// Wrap bytes and run `hook` when the buffer is released
    pub fn with_release(data: impl Into<Vec<u8>>, hook: impl FnOnce() + Send + 'static) -> Self {
        Self {
            data: data.into(),
            on_release: Some(Box::new(hook)),
        }
    }

    /// Payload bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Self::new(data)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.data.len())
            .field("has_release_hook", &self.on_release.is_some())
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn release_hook_runs_once_on_drop() {
        let released = Arc::new(AtomicU32::new(0));
        let counter = released.clone();
        let buffer = Buffer::with_release(b"abc".to_vec(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(buffer.len(), 3);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(buffer);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pending_upload_accessors() {
        let pending = PendingUpload {
            local_path: PathBuf::from("/tmp/x"),
            remote: RemotePath {
                directory: "/out".to_string(),
                file_path: "/out/a.csv".to_string(),
            },
        };
        assert_eq!(pending.remote_directory(), "/out");
        assert_eq!(pending.remote_file_path(), "/out/a.csv");
    }

    #[test]
    fn task_report_serializes() {
        let report = TaskReport {
            task_index: 2,
            uploaded_files: vec!["/out/a.csv".to_string()],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(json, r#"{"task_index":2,"uploaded_files":["/out/a.csv"]}"#);
    }
}
