//! In-process FTP server for integration tests
//!
//! Speaks just enough FTP for the client: login, AUTH TLS/PBSZ/PROT, TYPE,
//! FEAT/MODE Z, CWD/MKD, PASV/PORT, STOR, NOOP and QUIT. Received files,
//! commands and connection counts are recorded for assertions.

use flate2::read::ZlibDecoder;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

pub const USER: &str = "tester";
pub const PASSWORD: &str = "secret";

/// Transport security the server expects
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MockTls {
    /// Plain FTP, AUTH TLS is refused
    #[default]
    Off,
    /// Plain greeting, TLS after AUTH TLS
    Explicit,
    /// TLS from the first byte
    Implicit,
}

/// Server behavior knobs
#[derive(Clone, Debug, Default)]
pub struct MockOptions {
    /// Answer MKD with 550
    pub deny_mkd: bool,
    /// Answer this many STOR commands with 451 before accepting uploads
    pub fail_stor: u32,
    /// Advertise and accept MODE Z
    pub mode_z: bool,
    /// Greet this many connections with 421 and hang up
    pub busy_greetings: u32,
    /// Directories that already exist besides "/"
    pub existing_dirs: Vec<String>,
    /// Control connection security
    pub tls: MockTls,
}

#[derive(Debug, Default)]
pub struct ServerState {
    /// Uploaded files by remote path, decompressed
    pub files: HashMap<String, Vec<u8>>,
    /// Every command line received, in order
    pub commands: Vec<String>,
    /// Accepted control connections
    pub connections: u32,
    /// Data connections that completed a TLS handshake
    pub tls_transfers: u32,
    dirs: HashSet<String>,
    stor_failures_left: u32,
}

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

type Control = BufStream<Box<dyn Io>>;

/// Self-signed certificate for 127.0.0.1 and the acceptor using it
struct ServerTls {
    acceptor: TlsAcceptor,
    cert_pem: String,
}

impl ServerTls {
    fn generate() -> Self {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], key)
            .unwrap();

        Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            cert_pem: cert.pem(),
        }
    }
}

pub struct MockFtpServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    cert_pem: Option<String>,
    task: JoinHandle<()>,
}

impl MockFtpServer {
    pub async fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut dirs: HashSet<String> = options.existing_dirs.iter().cloned().collect();
        dirs.insert("/".to_string());
        let state = Arc::new(Mutex::new(ServerState {
            dirs,
            stor_failures_left: options.fail_stor,
            ..ServerState::default()
        }));

        let tls = (options.tls != MockTls::Off).then(|| Arc::new(ServerTls::generate()));
        let cert_pem = tls.as_ref().map(|t| t.cert_pem.clone());

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                let options = options.clone();
                let tls = tls.clone();
                tokio::spawn(async move {
                    handle_connection(stream, state, options, tls).await;
                });
            }
        });

        Self {
            addr,
            state,
            cert_pem,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// PEM of the server certificate, when TLS is enabled
    pub fn cert_pem(&self) -> Option<String> {
        self.cert_pem.clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn connections(&self) -> u32 {
        self.state.lock().unwrap().connections
    }

    pub fn tls_transfers(&self) -> u32 {
        self.state.lock().unwrap().tls_transfers
    }
}

impl Drop for MockFtpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn reply(control: &mut Control, text: &str) -> bool {
    control.write_all(text.as_bytes()).await.is_ok()
        && control.write_all(b"\r\n").await.is_ok()
        && control.flush().await.is_ok()
}

enum DataChannel {
    Passive(TcpListener),
    Active(SocketAddr),
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<Mutex<ServerState>>,
    options: MockOptions,
    tls: Option<Arc<ServerTls>>,
) {
    let connection = {
        let mut s = state.lock().unwrap();
        s.connections += 1;
        s.connections
    };

    let stream: Box<dyn Io> = match (options.tls, &tls) {
        (MockTls::Implicit, Some(tls)) => match tls.acceptor.accept(stream).await {
            Ok(stream) => Box::new(stream),
            Err(_) => return,
        },
        _ => Box::new(stream),
    };
    let mut control: Control = BufStream::new(stream);

    if connection <= options.busy_greetings {
        reply(&mut control, "421 Too many users, try later").await;
        return;
    }
    if !reply(&mut control, "220 mock FTP server ready").await {
        return;
    }

    let mut data: Option<DataChannel> = None;
    let mut compress = false;
    let mut protected = false;
    let mut user_ok = false;
    let mut buf = String::new();

    loop {
        buf.clear();
        match control.read_line(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = buf.trim_end_matches(['\r', '\n']).to_string();
        state.lock().unwrap().commands.push(line.clone());
        let (cmd, arg) = match line.split_once(' ') {
            Some((cmd, arg)) => (cmd.to_ascii_uppercase(), arg.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };

        let ok = match cmd.as_str() {
            "AUTH" => match (options.tls, &tls) {
                (MockTls::Explicit, Some(tls)) if arg.eq_ignore_ascii_case("TLS") => {
                    if !reply(&mut control, "234 Proceed with negotiation").await {
                        break;
                    }
                    // the client waits for 234 before its hello, so nothing is buffered
                    let raw = control.into_inner();
                    match tls.acceptor.accept(raw).await {
                        Ok(stream) => {
                            control = BufStream::new(Box::new(stream) as Box<dyn Io>);
                            true
                        }
                        Err(_) => break,
                    }
                }
                _ => reply(&mut control, "502 AUTH not supported").await,
            },
            "PBSZ" => reply(&mut control, "200 PBSZ=0").await,
            "PROT" => {
                protected = arg.eq_ignore_ascii_case("P");
                reply(&mut control, "200 Protection level set").await
            }
            "USER" => {
                user_ok = arg == USER;
                reply(&mut control, "331 Password required").await
            }
            "PASS" => {
                if user_ok && arg == PASSWORD {
                    reply(&mut control, "230 Logged in").await
                } else {
                    reply(&mut control, "530 Login incorrect").await
                }
            }
            "TYPE" => reply(&mut control, "200 Type set").await,
            "FEAT" => {
                if options.mode_z {
                    reply(&mut control, "211-Features:\r\n MDTM\r\n MODE Z\r\n211 End").await
                } else {
                    reply(&mut control, "211-Features:\r\n MDTM\r\n211 End").await
                }
            }
            "MODE" => {
                if options.mode_z && arg.eq_ignore_ascii_case("Z") {
                    compress = true;
                    reply(&mut control, "200 MODE Z ok").await
                } else {
                    reply(&mut control, "504 Mode not supported").await
                }
            }
            "CWD" => {
                let exists = state.lock().unwrap().dirs.contains(&arg);
                if exists {
                    reply(&mut control, "250 Directory changed").await
                } else {
                    reply(&mut control, "550 No such directory").await
                }
            }
            "MKD" => {
                if options.deny_mkd {
                    reply(&mut control, "550 Permission denied").await
                } else {
                    state.lock().unwrap().dirs.insert(arg.clone());
                    reply(&mut control, &format!("257 \"{arg}\" created")).await
                }
            }
            "PASV" => match TcpListener::bind("127.0.0.1:0").await {
                Ok(listener) => {
                    let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
                    data = Some(DataChannel::Passive(listener));
                    reply(
                        &mut control,
                        &format!(
                            "227 Entering Passive Mode (127,0,0,1,{},{})",
                            port >> 8,
                            port & 0xff
                        ),
                    )
                    .await
                }
                Err(_) => reply(&mut control, "425 Can't open data connection").await,
            },
            "PORT" => {
                let parts: Vec<u16> = arg.split(',').filter_map(|p| p.parse().ok()).collect();
                if parts.len() == 6 {
                    let addr = format!(
                        "{}.{}.{}.{}:{}",
                        parts[0],
                        parts[1],
                        parts[2],
                        parts[3],
                        (parts[4] << 8) + parts[5]
                    );
                    data = addr.parse().ok().map(DataChannel::Active);
                    reply(&mut control, "200 PORT command successful").await
                } else {
                    reply(&mut control, "501 Syntax error").await
                }
            }
            "STOR" => {
                let fail = {
                    let mut s = state.lock().unwrap();
                    if s.stor_failures_left > 0 {
                        s.stor_failures_left -= 1;
                        true
                    } else {
                        false
                    }
                };
                let channel = data.take();
                if fail {
                    reply(&mut control, "451 Requested action aborted: local error").await
                } else {
                    let data_tls = if protected { tls.as_deref() } else { None };
                    let transfer = Transfer {
                        path: &arg,
                        compress,
                        tls: data_tls,
                        state: &state,
                    };
                    receive_file(&mut control, channel, transfer).await
                }
            }
            "NOOP" => reply(&mut control, "200 NOOP ok").await,
            "QUIT" => {
                reply(&mut control, "221 Goodbye").await;
                break;
            }
            _ => reply(&mut control, "502 Command not implemented").await,
        };
        if !ok {
            break;
        }
    }
}

struct Transfer<'a> {
    path: &'a str,
    compress: bool,
    tls: Option<&'a ServerTls>,
    state: &'a Arc<Mutex<ServerState>>,
}

async fn receive_file(
    control: &mut Control,
    channel: Option<DataChannel>,
    transfer: Transfer<'_>,
) -> bool {
    let stream = match channel {
        Some(DataChannel::Passive(listener)) => {
            if !reply(control, "150 Opening data connection").await {
                return false;
            }
            listener.accept().await.map(|(s, _)| s)
        }
        Some(DataChannel::Active(addr)) => {
            if !reply(control, "150 Opening data connection").await {
                return false;
            }
            TcpStream::connect(addr).await
        }
        None => return reply(control, "425 Use PORT or PASV first").await,
    };
    let Ok(stream) = stream else {
        return reply(control, "425 Can't open data connection").await;
    };

    let mut stream: Box<dyn Io> = match transfer.tls {
        Some(tls) => match tls.acceptor.accept(stream).await {
            Ok(stream) => {
                transfer.state.lock().unwrap().tls_transfers += 1;
                Box::new(stream)
            }
            Err(_) => return reply(control, "522 TLS handshake failed").await,
        },
        None => Box::new(stream),
    };

    let mut raw = Vec::new();
    if stream.read_to_end(&mut raw).await.is_err() {
        return reply(control, "426 Connection closed; transfer aborted").await;
    }
    let contents = if transfer.compress {
        let mut decoded = Vec::new();
        if ZlibDecoder::new(raw.as_slice())
            .read_to_end(&mut decoded)
            .is_err()
        {
            return reply(control, "451 Corrupt compressed data").await;
        }
        decoded
    } else {
        raw
    };

    transfer
        .state
        .lock()
        .unwrap()
        .files
        .insert(transfer.path.to_string(), contents);
    reply(control, "226 Transfer complete").await
}
