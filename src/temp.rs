//! Local temporary file space
//!
//! Output data is buffered in local files before upload. The files are kept
//! after creation; deleting them once the upload succeeded is the uploader's
//! job.

use crate::error::Result;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Allocates local files for buffering output
pub trait TempFileSpace: Send + Sync {
    /// Create a new empty file whose name starts with `prefix`
    fn create_temp_file(&self, prefix: &str) -> Result<(File, PathBuf)>;
}

/// Temporary files in a local directory
#[derive(Clone, Debug)]
pub struct LocalTempFileSpace {
    dir: PathBuf,
}

impl LocalTempFileSpace {
    /// Use `dir` for temporary files; it is created on first use
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the files
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TempFileSpace for LocalTempFileSpace {
    fn create_temp_file(&self, prefix: &str) -> Result<(File, PathBuf)> {
        std::fs::create_dir_all(&self.dir)?;
        let (file, path) = tempfile::Builder::new()
            .prefix(&sanitize_prefix(prefix))
            .suffix(".tmp")
            .tempfile_in(&self.dir)?
            .keep()
            .map_err(|e| e.error)?;
        Ok((file, path))
    }
}

/// Keep prefixes usable as a single file name component
fn sanitize_prefix(prefix: &str) -> String {
    let mut sanitized: String = prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !sanitized.ends_with('_') {
        sanitized.push('_');
    }
    sanitized
}
