use super::command::FtpCommand;
use super::connect_tcp;
use super::control::{ControlChannel, unexpected};
use super::reply::port_argument;
use super::stream::FtpStream;
use super::tls::TlsSessionFactory;
use crate::error::{Error, FtpError, Result};
use crate::progress::TransferObserver;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;

/// How data connections are opened and what happens to the bytes on the way
pub(crate) struct DataOptions<'a> {
    pub(crate) passive: bool,
    pub(crate) ascii: bool,
    pub(crate) compress: bool,
    pub(crate) connect_timeout: Duration,
    pub(crate) io_timeout: Duration,
    /// Set when PROT P is in effect
    pub(crate) tls: Option<&'a TlsSessionFactory>,
}

/// Calls `on_abort` if the transfer future is dropped before it finished
struct AbortGuard<'a> {
    observer: &'a mut dyn TransferObserver,
    armed: bool,
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.observer.on_abort();
        }
    }
}

/// Upload everything `source` yields to `remote_path`
///
/// Read failures on `source` come back as `Error::Io`; everything on the wire
/// comes back as `Error::Ftp`.
pub(crate) async fn store(
    control: &mut ControlChannel,
    remote_path: &str,
    source: &mut (dyn AsyncRead + Unpin + Send),
    observer: &mut dyn TransferObserver,
    opts: &DataOptions<'_>,
) -> Result<u64> {
    let mut guard = AbortGuard {
        observer,
        armed: true,
    };
    guard.observer.on_start();

    let result = store_inner(control, remote_path, source, &mut *guard.observer, opts).await;

    guard.armed = false;
    match &result {
        Ok(total) => guard.observer.on_complete(*total),
        Err(_) => guard.observer.on_fail(),
    }
    result
}

async fn store_inner(
    control: &mut ControlChannel,
    remote_path: &str,
    source: &mut (dyn AsyncRead + Unpin + Send),
    observer: &mut dyn TransferObserver,
    opts: &DataOptions<'_>,
) -> Result<u64> {
    let tcp = open_data_connection(control, remote_path, opts).await?;
    let mut data = match opts.tls {
        Some(factory) => FtpStream::Tls(Box::new(factory.wrap(tcp).await?)),
        None => FtpStream::Plain(tcp),
    };

    let total = copy_payload(&mut data, source, observer, opts).await?;

    with_timeout(opts.io_timeout, "data close", data.shutdown()).await?;
    drop(data);

    let reply = control.timed_read_reply(FtpCommand::STOR).await?;
    match reply.code {
        226 | 250 => Ok(total),
        _ => Err(unexpected(FtpCommand::STOR, &reply).into()),
    }
}

async fn open_data_connection(
    control: &mut ControlChannel,
    remote_path: &str,
    opts: &DataOptions<'_>,
) -> Result<TcpStream> {
    if opts.passive {
        let reply = control.command(FtpCommand::PASV, None).await?;
        if reply.code != 227 {
            return Err(unexpected(FtpCommand::PASV, &reply).into());
        }
        let mut addr = reply.parse_pasv_227().ok_or_else(|| {
            FtpError::malformed("PASV", format!("invalid 227 reply: {}", reply.message()))
        })?;
        if addr.ip().is_unspecified() {
            addr.set_ip(control.peer_addr().ip());
        }
        debug!(%addr, "Opening passive data connection");
        let stream = connect_tcp(addr, opts.connect_timeout, "data connect").await?;
        start_store(control, remote_path).await?;
        Ok(stream)
    } else {
        let ip = active_mode_ip(control.local_addr())?;
        let listener = TcpListener::bind(SocketAddrV4::new(ip, 0))
            .await
            .map_err(|e| FtpError::network("data listen", e))?;
        let port = listener
            .local_addr()
            .map_err(|e| FtpError::network("data listen", e))?
            .port();
        let local = SocketAddrV4::new(ip, port);
        debug!(addr = %local, "Waiting for active data connection");

        let reply = control
            .command(FtpCommand::PORT, Some(&port_argument(local)))
            .await?;
        if reply.code != 200 {
            return Err(unexpected(FtpCommand::PORT, &reply).into());
        }
        start_store(control, remote_path).await?;

        let (stream, _) = tokio::time::timeout(opts.connect_timeout, listener.accept())
            .await
            .map_err(|_| FtpError::Timeout("data accept"))?
            .map_err(|e| FtpError::network("data accept", e))?;
        Ok(stream)
    }
}

/// Local address to listen on for an active data connection
///
/// PORT only carries IPv4 addresses.
fn active_mode_ip(local: SocketAddr) -> Result<Ipv4Addr> {
    match local {
        SocketAddr::V4(addr) => Ok(*addr.ip()),
        SocketAddr::V6(addr) => Err(Error::config(
            "passive_mode",
            format!("active mode needs an IPv4 control connection, local address is {addr}"),
        )),
    }
}

async fn start_store(
    control: &mut ControlChannel,
    remote_path: &str,
) -> std::result::Result<(), FtpError> {
    let reply = control.command(FtpCommand::STOR, Some(remote_path)).await?;
    match reply.code {
        125 | 150 => Ok(()),
        _ => Err(unexpected(FtpCommand::STOR, &reply)),
    }
}

async fn copy_payload(
    data: &mut FtpStream,
    source: &mut (dyn AsyncRead + Unpin + Send),
    observer: &mut dyn TransferObserver,
    opts: &DataOptions<'_>,
) -> Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut converted = Vec::new();
    let mut ascii = opts.ascii.then(AsciiEncoder::default);
    let mut zlib = opts
        .compress
        .then(|| ZlibEncoder::new(Vec::with_capacity(CHUNK_SIZE), Compression::default()));
    let mut total = 0u64;

    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        let mut chunk = &buf[..n];
        if let Some(encoder) = ascii.as_mut() {
            converted.clear();
            encoder.convert(chunk, &mut converted);
            chunk = converted.as_slice();
        }
        match zlib.as_mut() {
            Some(encoder) => {
                encoder.write_all(chunk)?;
                let out = encoder.get_mut();
                if !out.is_empty() {
                    write_data(data, out, opts.io_timeout).await?;
                    out.clear();
                }
            }
            None => write_data(data, chunk, opts.io_timeout).await?,
        }

        total += n as u64;
        observer.on_progress(n as u64);
    }

    if let Some(encoder) = zlib {
        let rest = encoder.finish()?;
        write_data(data, &rest, opts.io_timeout).await?;
    }
    with_timeout(opts.io_timeout, "data transfer", data.flush()).await?;
    Ok(total)
}

async fn write_data(
    data: &mut FtpStream,
    bytes: &[u8],
    timeout: Duration,
) -> std::result::Result<(), FtpError> {
    with_timeout(timeout, "data transfer", data.write_all(bytes)).await
}

async fn with_timeout<F>(
    timeout: Duration,
    stage: &'static str,
    fut: F,
) -> std::result::Result<(), FtpError>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(r) => r.map_err(|e| FtpError::network(stage, e)),
        Err(_) => Err(FtpError::Timeout(stage)),
    }
}

/// LF to CRLF conversion for ASCII transfers, state kept across chunks
#[derive(Debug, Default)]
struct AsciiEncoder {
    last_was_cr: bool,
}

impl AsciiEncoder {
    fn convert(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len() + input.len() / 16);
        for &b in input {
            if b == b'\n' && !self.last_was_cr {
                out.push(b'\r');
            }
            out.push(b);
            self.last_was_cr = b == b'\r';
        }
    }
}
