use super::command::{FtpCommand, loggable};
use super::reply::{FirstLine, Reply, parse_first_line};
use super::stream::FtpStream;
use super::tls::TlsSessionFactory;
use crate::error::FtpError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tracing::debug;

const MAX_LINE_LEN: usize = 2048;
const MAX_MULTI_LINES: usize = 128;

type FtpResult<T> = std::result::Result<T, FtpError>;

/// The control connection: commands out, replies in
#[derive(Debug)]
pub(crate) struct ControlChannel {
    stream: BufStream<FtpStream>,
    read_timeout: Duration,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl ControlChannel {
    pub(crate) fn new(stream: FtpStream, read_timeout: Duration) -> FtpResult<Self> {
        let local_addr = stream
            .tcp()
            .local_addr()
            .map_err(|e| FtpError::network("connect", e))?;
        let peer_addr = stream
            .tcp()
            .peer_addr()
            .map_err(|e| FtpError::network("connect", e))?;
        Ok(Self {
            stream: BufStream::new(stream),
            read_timeout,
            local_addr,
            peer_addr,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.stream.get_ref().is_tls()
    }

    /// Replace the plain stream by a TLS stream after a successful AUTH TLS
    pub(crate) async fn upgrade_to_tls(self, factory: &TlsSessionFactory) -> FtpResult<Self> {
        let ControlChannel {
            stream,
            read_timeout,
            local_addr,
            peer_addr,
        } = self;
        let tcp = match stream.into_inner() {
            FtpStream::Plain(tcp) => tcp,
            tls @ FtpStream::Tls(_) => {
                return Ok(Self {
                    stream: BufStream::new(tls),
                    read_timeout,
                    local_addr,
                    peer_addr,
                });
            }
        };
        let tls = factory.wrap(tcp).await?;
        Ok(Self {
            stream: BufStream::new(FtpStream::Tls(Box::new(tls))),
            read_timeout,
            local_addr,
            peer_addr,
        })
    }

    async fn send_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await?;
        self.stream.flush().await
    }

    pub(crate) async fn send(&mut self, cmd: FtpCommand, arg: Option<&str>) -> FtpResult<()> {
        debug!("> {}", loggable(cmd, arg));

        let arg_len = arg.map_or(0, |a| a.len() + 1);
        let mut buf: Vec<u8> = Vec::with_capacity(cmd.as_str().len() + arg_len + 2);
        buf.extend_from_slice(cmd.as_str().as_bytes());
        if let Some(arg) = arg {
            buf.push(b' ');
            buf.extend_from_slice(arg.as_bytes());
        }
        buf.extend_from_slice(b"\r\n");

        self.send_all(&buf)
            .await
            .map_err(|e| FtpError::network("send command", e))
    }

    async fn read_line(&mut self, buf: &mut Vec<u8>) -> FtpResult<String> {
        buf.clear();
        let len = (&mut self.stream)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', buf)
            .await
            .map_err(|e| FtpError::network("read reply", e))?;
        if len == 0 {
            return Err(FtpError::network(
                "read reply",
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by server"),
            ));
        }
        if buf.last() != Some(&b'\n') {
            return Err(FtpError::malformed("reply", "reply line too long"));
        }
        let line = String::from_utf8_lossy(buf).trim_end_matches(['\r', '\n']).to_string();
        debug!("< {line}");
        Ok(line)
    }

    async fn read_reply(&mut self, cmd: FtpCommand) -> FtpResult<Reply> {
        let mut buf = Vec::with_capacity(256);
        let first = self.read_line(&mut buf).await?;
        match parse_first_line(&first) {
            Some(FirstLine::Single(reply)) => Ok(reply),
            Some(FirstLine::Multi(mut parser)) => {
                for _ in 0..MAX_MULTI_LINES {
                    let line = self.read_line(&mut buf).await?;
                    if parser.feed_line(&line) {
                        return Ok(parser.finish());
                    }
                }
                Err(FtpError::malformed(cmd.as_str(), "too many reply lines"))
            }
            None => Err(FtpError::malformed(
                cmd.as_str(),
                format!("invalid reply line {first:?}"),
            )),
        }
    }

    /// Wait for the next reply, bounded by the read timeout
    pub(crate) async fn timed_read_reply(&mut self, cmd: FtpCommand) -> FtpResult<Reply> {
        self.read_reply_within(cmd, self.read_timeout).await
    }

    /// Wait for the next reply, bounded by `timeout`
    pub(crate) async fn read_reply_within(
        &mut self,
        cmd: FtpCommand,
        timeout: Duration,
    ) -> FtpResult<Reply> {
        match tokio::time::timeout(timeout, self.read_reply(cmd)).await {
            Ok(r) => r,
            Err(_) => Err(FtpError::Timeout(cmd.as_str())),
        }
    }

    /// Send a command and wait for its reply
    pub(crate) async fn command(&mut self, cmd: FtpCommand, arg: Option<&str>) -> FtpResult<Reply> {
        self.send(cmd, arg).await?;
        self.timed_read_reply(cmd).await
    }
}

/// Error for a reply code the caller can't proceed with
pub(crate) fn unexpected(cmd: FtpCommand, reply: &Reply) -> FtpError {
    FtpError::ProtocolReply {
        command: cmd.to_string(),
        code: reply.code,
        message: reply.message(),
    }
}
