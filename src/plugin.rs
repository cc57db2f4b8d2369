//! Plugin entry points
//!
//! The batch framework drives an output in three steps: `transaction` once
//! before any task runs, `open` once per task, and `cleanup` after all tasks.
//! Tasks share no state, so `resume` and `cleanup` have nothing to do.

use crate::config::OutputConfig;
use crate::connector;
use crate::error::{Error, Result};
use crate::output::FtpFileOutput;
use crate::session::RemoteSession;
use crate::temp::{LocalTempFileSpace, TempFileSpace};
use crate::types::TaskReport;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// FTP file output plugin
pub struct FtpFileOutputPlugin {
    config: Arc<OutputConfig>,
    temp_space: Arc<dyn TempFileSpace>,
    cancel: CancellationToken,
}

impl FtpFileOutputPlugin {
    /// Create the plugin from a configuration, validating it first
    pub fn new(config: OutputConfig) -> Result<Self> {
        let config = config.validated()?;
        let temp_space = Arc::new(LocalTempFileSpace::new(config.temp_dir()));
        Ok(Self {
            config: Arc::new(config),
            temp_space,
            cancel: CancellationToken::new(),
        })
    }

    /// Create the plugin from a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(OutputConfig::from_json(json)?)
    }

    /// Use a different space for local temporary files
    pub fn with_temp_space(mut self, temp_space: Arc<dyn TempFileSpace>) -> Self {
        self.temp_space = temp_space;
        self
    }

    /// Cancel connects, uploads and retry waits through `cancel`
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The validated configuration
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Token that interrupts all work started by this plugin
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Check that the server is reachable before any task runs
    ///
    /// Connects once (with the configured retries) and disconnects. Any
    /// failure is reported as a configuration error.
    pub async fn transaction(&self) -> Result<()> {
        match connector::connect(self.config.clone(), &self.cancel).await {
            Ok(mut session) => {
                session.disconnect().await;
                info!(host = %self.config.host, "FTP server is reachable");
                Ok(())
            }
            Err(Error::Interrupted) => Err(Error::Interrupted),
            Err(e) => {
                error!(host = %self.config.host, error = %e, "Failed to connect to FTP server");
                Err(Error::Config {
                    message: format!("failed to connect to FTP server: {e}"),
                    key: None,
                })
            }
        }
    }

    /// Run again after a partial failure; no task state is carried over
    pub async fn resume(&self) -> Result<()> {
        Ok(())
    }

    /// Release transaction resources; nothing is kept across tasks
    pub async fn cleanup(&self, _task_reports: &[TaskReport]) -> Result<()> {
        Ok(())
    }

    /// Open the output stream of one task
    pub async fn open(&self, task_index: u32) -> Result<FtpFileOutput> {
        let session = connector::connect(self.config.clone(), &self.cancel).await?;
        FtpFileOutput::new(
            session,
            &self.config,
            task_index,
            self.temp_space.clone(),
            self.cancel.clone(),
        )
    }
}
