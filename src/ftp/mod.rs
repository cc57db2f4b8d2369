//! FTP/FTPS client session
//!
//! [`FtpSession`] owns one control connection and implements
//! [`RemoteSession`] on top of it. Establishing the transport (TCP, TLS,
//! greeting) and negotiating the session (login, protection, transfer type,
//! compression) are separate steps so that only the former is retried.

mod command;
mod control;
mod reply;
mod stream;
mod tls;
mod transfer;

pub use tls::TlsSessionFactory;

use crate::config::{OutputConfig, Security};
use crate::error::{Error, FtpError, Result};
use crate::progress::TransferObserver;
use crate::session::{RemoteSession, SessionState};
use async_trait::async_trait;
use command::FtpCommand;
use control::{ControlChannel, unexpected};
use reply::Reply;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stream::FtpStream;
use tokio::io::AsyncRead;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};
use transfer::DataOptions;

type FtpResult<T> = std::result::Result<T, FtpError>;

pub(crate) async fn connect_tcp<A: ToSocketAddrs>(
    addr: A,
    timeout: Duration,
    stage: &'static str,
) -> FtpResult<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "Failed to set TCP_NODELAY");
            }
            Ok(stream)
        }
        Ok(Err(e)) => Err(FtpError::network(stage, e)),
        Err(_) => Err(FtpError::Timeout(stage)),
    }
}

/// A session with an FTP or FTPS server
#[derive(Debug)]
pub struct FtpSession {
    config: Arc<OutputConfig>,
    tls: Option<TlsSessionFactory>,
    control: Option<ControlChannel>,
    state: SessionState,
    compression: bool,
    protected_data: bool,
    last_activity: Instant,
    /// set while a command is in flight; still set on entry means the
    /// previous future was dropped mid-command
    busy: bool,
}

impl FtpSession {
    /// Create a disconnected session, building the TLS factory when FTPS is configured
    pub fn new(config: Arc<OutputConfig>) -> Result<Self> {
        let tls = if config.security().is_tls() {
            Some(TlsSessionFactory::new(&config.host, &config.tls)?)
        } else {
            None
        };
        Ok(Self::with_tls_factory(config, tls))
    }

    /// Create a disconnected session with an explicit TLS factory
    pub fn with_tls_factory(config: Arc<OutputConfig>, tls: Option<TlsSessionFactory>) -> Self {
        Self {
            config,
            tls,
            control: None,
            state: SessionState::Disconnected,
            compression: false,
            protected_data: false,
            last_activity: Instant::now(),
            busy: false,
        }
    }

    /// Returns true if MODE Z was negotiated
    pub fn compression_enabled(&self) -> bool {
        self.compression
    }

    /// Returns true if the control connection is encrypted
    pub fn is_secure(&self) -> bool {
        self.control.as_ref().is_some_and(ControlChannel::is_tls)
    }

    fn tls_factory(&self) -> Result<&TlsSessionFactory> {
        self.tls
            .as_ref()
            .ok_or_else(|| Error::config("ssl", "FTPS requested without a TLS session factory"))
    }

    fn drop_connection(&mut self) {
        self.control = None;
        self.state = SessionState::Disconnected;
        self.compression = false;
        self.protected_data = false;
        self.busy = false;
    }

    /// One transport attempt: TCP connect, TLS when configured, greeting
    pub(crate) async fn establish(&mut self) -> Result<()> {
        self.drop_connection();
        self.state = SessionState::Connecting;
        let result = self.establish_inner().await;
        match result {
            Ok(control) => {
                self.control = Some(control);
                self.state = SessionState::Connected;
                self.last_activity = Instant::now();
                Ok(())
            }
            Err(e) => {
                self.drop_connection();
                Err(e)
            }
        }
    }

    async fn establish_inner(&self) -> Result<ControlChannel> {
        let config = &self.config;
        let security = config.security();
        let port = config.effective_port();
        info!(host = %config.host, port, "Connecting to {}:{}", config.host, port);

        let tcp = connect_tcp((config.host.as_str(), port), config.timeouts.connect, "connect").await?;
        let stream = match security {
            Security::Implicit => FtpStream::Tls(Box::new(self.tls_factory()?.wrap(tcp).await?)),
            Security::Plain | Security::Explicit => FtpStream::Plain(tcp),
        };
        let mut control = ControlChannel::new(stream, config.timeouts.read)?;

        loop {
            let reply = control.timed_read_reply(FtpCommand::GREETING).await?;
            match reply.code {
                120 => continue,
                220 => break,
                _ => return Err(unexpected(FtpCommand::GREETING, &reply).into()),
            }
        }

        if security == Security::Explicit {
            let reply = control.command(FtpCommand::AUTH_TLS, None).await?;
            if !matches!(reply.code, 234 | 334) {
                return Err(unexpected(FtpCommand::AUTH_TLS, &reply).into());
            }
            control = control.upgrade_to_tls(self.tls_factory()?).await?;
        }
        Ok(control)
    }

    /// Login and transfer setup on an established connection
    pub(crate) async fn negotiate(&mut self) -> Result<()> {
        let config = self.config.clone();
        let Some(control) = self.control.as_mut() else {
            return Err(Error::InvalidState {
                operation: "negotiate",
                state: self.state.as_str(),
            });
        };

        if let Err(e) = login(control, &config).await {
            self.drop_connection();
            return Err(e.into());
        }
        self.state = SessionState::Authenticated;

        let Some(control) = self.control.as_mut() else {
            return Err(Error::InvalidState {
                operation: "negotiate",
                state: self.state.as_str(),
            });
        };
        match setup_transfer(control, &config).await {
            Ok(negotiated) => {
                self.compression = negotiated.compression;
                self.protected_data = negotiated.protected_data;
                self.state = SessionState::Ready;
                self.last_activity = Instant::now();
                Ok(())
            }
            Err(e) => {
                self.drop_connection();
                Err(e.into())
            }
        }
    }

    /// Control channel for a command on a ready session
    fn begin(&mut self, operation: &'static str) -> Result<&mut ControlChannel> {
        if self.busy {
            warn!(operation, "Previous command was interrupted, dropping control connection");
            self.drop_connection();
        }
        if self.state != SessionState::Ready {
            return Err(not_connected(operation));
        }
        self.busy = true;
        self.control
            .as_mut()
            .ok_or_else(|| not_connected(operation))
    }

    fn end<T>(&mut self, result: FtpResult<T>) -> Result<T> {
        self.busy = false;
        self.last_activity = Instant::now();
        if let Err(e) = &result {
            if e.breaks_connection() {
                warn!(error = %e, "Control connection lost");
                self.drop_connection();
            }
        }
        result.map_err(Error::from)
    }
}

async fn login(control: &mut ControlChannel, config: &OutputConfig) -> FtpResult<()> {
    let Some(user) = config.user.as_deref() else {
        return Ok(());
    };
    info!(user, "Logging in with user {user}");

    let reply = control.command(FtpCommand::USER, Some(user)).await?;
    let reply = match reply.code {
        230 => return Ok(()),
        331 => {
            let password = config.password.as_deref().unwrap_or("");
            control.command(FtpCommand::PASS, Some(password)).await?
        }
        530 => return Err(denied(FtpCommand::USER, &reply)),
        _ => return Err(unexpected(FtpCommand::USER, &reply)),
    };
    match reply.code {
        230 | 202 => Ok(()),
        530 => Err(denied(FtpCommand::PASS, &reply)),
        _ => Err(unexpected(FtpCommand::PASS, &reply)),
    }
}

struct Negotiated {
    compression: bool,
    protected_data: bool,
}

async fn setup_transfer(control: &mut ControlChannel, config: &OutputConfig) -> FtpResult<Negotiated> {
    let mut protected_data = false;
    if control.is_tls() {
        for cmd in [FtpCommand::PBSZ_0, FtpCommand::PROT_P] {
            let reply = control.command(cmd, None).await?;
            if reply.code != 200 {
                return Err(unexpected(cmd, &reply));
            }
        }
        protected_data = true;
        info!("Using protected data connections");
    }

    if config.passive_mode {
        info!("Using passive mode");
    } else {
        info!("Using active mode");
    }

    let (cmd, mode) = if config.ascii_mode {
        (FtpCommand::TYPE_A, "ASCII")
    } else {
        (FtpCommand::TYPE_I, "binary")
    };
    info!("Using {mode} mode");
    let reply = control.command(cmd, None).await?;
    if reply.code != 200 {
        return Err(unexpected(cmd, &reply));
    }

    let mut compression = false;
    let feat = control.command(FtpCommand::FEAT, None).await?;
    if feat.code == 211 && feat.has_feature("MODE Z") {
        let reply = control.command(FtpCommand::MODE_Z, None).await?;
        if reply.code == 200 {
            info!("Using MODE Z compression");
            compression = true;
        } else {
            warn!(code = reply.code, "Server advertised MODE Z but refused it");
        }
    }

    Ok(Negotiated {
        compression,
        protected_data,
    })
}

fn not_connected(operation: &'static str) -> Error {
    FtpError::network(
        operation,
        io::Error::new(io::ErrorKind::NotConnected, "not connected"),
    )
    .into()
}

fn denied(cmd: FtpCommand, reply: &Reply) -> FtpError {
    FtpError::Denied {
        command: cmd.to_string(),
        code: reply.code,
        message: reply.message(),
    }
}

#[async_trait]
impl RemoteSession for FtpSession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn change_directory(&mut self, directory: &str) -> Result<()> {
        let control = self.begin("CWD")?;
        let result = async {
            let reply = control.command(FtpCommand::CWD, Some(directory)).await?;
            match reply.code {
                200 | 250 => Ok(()),
                _ => Err(unexpected(FtpCommand::CWD, &reply)),
            }
        }
        .await;
        self.end(result)
    }

    async fn create_directory(&mut self, directory: &str) -> Result<()> {
        let control = self.begin("MKD")?;
        let result = async {
            let reply = control.command(FtpCommand::MKD, Some(directory)).await?;
            match reply.code {
                257 | 250 => Ok(()),
                550 | 553 => Err(denied(FtpCommand::MKD, &reply)),
                _ => Err(unexpected(FtpCommand::MKD, &reply)),
            }
        }
        .await;
        self.end(result)
    }

    async fn store(
        &mut self,
        remote_path: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
        observer: &mut dyn TransferObserver,
    ) -> Result<u64> {
        if self.busy {
            warn!("Previous command was interrupted, dropping control connection");
            self.drop_connection();
        }
        if self.state != SessionState::Ready {
            return Err(not_connected("STOR"));
        }
        let config = self.config.clone();
        let tls = if self.protected_data {
            Some(self.tls_factory()?.clone())
        } else {
            None
        };
        let opts = DataOptions {
            passive: config.passive_mode,
            ascii: config.ascii_mode,
            compress: self.compression,
            connect_timeout: config.timeouts.connect,
            io_timeout: config.timeouts.read,
            tls: tls.as_ref(),
        };

        self.busy = true;
        let Some(control) = self.control.as_mut() else {
            self.busy = false;
            return Err(Error::InvalidState {
                operation: "store",
                state: self.state.as_str(),
            });
        };
        let result = transfer::store(control, remote_path, source, observer, &opts).await;
        self.busy = false;
        self.last_activity = Instant::now();

        if let Err(e) = &result {
            // the control connection may still owe us a transfer reply
            debug!(error = %e, "Transfer failed, dropping control connection");
            self.drop_connection();
        }
        result
    }

    async fn reconnect(&mut self) -> Result<()> {
        info!(host = %self.config.host, "Reconnecting to FTP server");
        self.establish().await?;
        self.negotiate().await
    }

    async fn keep_alive(&mut self) -> Result<()> {
        if !self.is_connected() || self.last_activity.elapsed() < self.config.timeouts.keepalive {
            return Ok(());
        }
        let control = self.begin("NOOP")?;
        let result = async {
            let reply = control.command(FtpCommand::NOOP, None).await?;
            match reply.code {
                200..=299 => Ok(()),
                _ => Err(unexpected(FtpCommand::NOOP, &reply)),
            }
        }
        .await;
        self.end(result)
    }

    async fn disconnect(&mut self) {
        let usable = self.state != SessionState::Disconnected && !self.busy;
        let close_timeout = self.config.timeouts.close;
        if let Some(mut control) = self.control.take() {
            if usable {
                let quit = async {
                    control.send(FtpCommand::QUIT, None).await?;
                    control
                        .read_reply_within(FtpCommand::QUIT, close_timeout)
                        .await
                };
                match quit.await {
                    Ok(reply) if reply.code == 221 => debug!("Disconnected from FTP server"),
                    Ok(reply) => debug!(code = reply.code, "Unexpected QUIT reply, ignored"),
                    Err(e) => debug!(error = %e, "Error while disconnecting, ignored"),
                }
            }
        }
        self.drop_connection();
    }
}
