//! Configuration types for ftp-output

use crate::error::{Error, Result};
use crate::path::SequenceFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default control port for plain FTP
pub const FTP_DEFAULT_PORT: u16 = 21;
/// Default control port for explicit FTPS (AUTH TLS on the standard port)
pub const FTPES_DEFAULT_PORT: u16 = 21;
/// Default control port for implicit FTPS
pub const FTPS_DEFAULT_PORT: u16 = 990;

/// Default value of every optional configuration key, as JSON literals
///
/// This is the single source of truth for documentation; the serde defaults
/// below produce exactly these values.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("port", "null"),
    ("user", "null"),
    ("password", "null"),
    ("passive_mode", "true"),
    ("ascii_mode", "false"),
    ("ssl", "false"),
    ("ssl_explicit", "true"),
    ("ssl_verify", "true"),
    ("ssl_verify_hostname", "true"),
    ("ssl_trusted_ca_cert_file", "null"),
    ("ssl_trusted_ca_cert_data", "null"),
    ("sequence_format", "\"%03d.%02d\""),
    ("max_connection_retry", "10"),
    ("directory_separator", "\"/\""),
    ("temp_dir", "null"),
];

/// Transport security mode, derived from `ssl` and `ssl_explicit`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    /// Plain FTP
    Plain,
    /// FTPES: plaintext connect, then `AUTH TLS`
    Explicit,
    /// FTPS: TLS from the first byte
    Implicit,
}

impl Security {
    /// The control port used when none is configured
    pub fn default_port(self) -> u16 {
        match self {
            Security::Plain => FTP_DEFAULT_PORT,
            Security::Explicit => FTPES_DEFAULT_PORT,
            Security::Implicit => FTPS_DEFAULT_PORT,
        }
    }

    /// Returns true if TLS is used at all
    pub fn is_tls(self) -> bool {
        !matches!(self, Security::Plain)
    }
}

/// TLS trust configuration
///
/// Flattened into [`OutputConfig`], so the keys appear at the top level.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Verify the server certificate chain (default: true)
    #[serde(default = "default_true")]
    pub ssl_verify: bool,

    /// Verify that the certificate matches the host name (default: true)
    #[serde(default = "default_true")]
    pub ssl_verify_hostname: bool,

    /// PEM file with trusted CA certificates (default: bundled web PKI roots)
    #[serde(default)]
    pub ssl_trusted_ca_cert_file: Option<PathBuf>,

    /// Inline PEM data with trusted CA certificates
    #[serde(default)]
    pub ssl_trusted_ca_cert_data: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ssl_verify: true,
            ssl_verify_hostname: true,
            ssl_trusted_ca_cert_file: None,
            ssl_trusted_ca_cert_data: None,
        }
    }
}

/// Protocol timeouts
///
/// These bound a single protocol step; they are independent of the retry waits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// TCP connect and data-connection setup (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect: Duration,

    /// Waiting for a reply on the control connection (default: 60 seconds)
    #[serde(default = "default_read_timeout", with = "duration_serde")]
    pub read: Duration,

    /// Closing the control connection with QUIT (default: 60 seconds)
    #[serde(default = "default_close_timeout", with = "duration_serde")]
    pub close: Duration,

    /// Idle time after which a NOOP keeps the control connection alive (default: 3 seconds)
    #[serde(default = "default_keepalive", with = "duration_serde")]
    pub keepalive: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: default_connect_timeout(),
            read: default_read_timeout(),
            close: default_close_timeout(),
            keepalive: default_keepalive(),
        }
    }
}

/// Backoff configuration shared by connect and upload retries
///
/// The retry *count* comes from `max_connection_retry`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Wait before the first retry (default: 500 milliseconds)
    #[serde(default = "default_initial_wait", with = "duration_millis_serde")]
    pub initial_wait: Duration,

    /// Upper bound for any single wait (default: 30 seconds)
    #[serde(default = "default_max_wait", with = "duration_millis_serde")]
    pub max_wait: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to waits, still capped at `max_wait` (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_wait: default_initial_wait(),
            max_wait: default_max_wait(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Complete configuration of one FTP file output
///
/// Build it with [`OutputConfig::from_json`] or [`OutputConfig::validated`];
/// both reject invalid values, and the result is treated as immutable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Server hostname
    pub host: String,

    /// Control port (default depends on the security mode)
    #[serde(default)]
    pub port: Option<u16>,

    /// Login user; no login is performed when absent
    #[serde(default)]
    pub user: Option<String>,

    /// Login password (empty when absent)
    #[serde(default)]
    pub password: Option<String>,

    /// Use passive mode data connections (default: true)
    #[serde(default = "default_true")]
    pub passive_mode: bool,

    /// Transfer in ASCII mode instead of binary (default: false)
    #[serde(default)]
    pub ascii_mode: bool,

    /// Use FTPS (default: false)
    #[serde(default)]
    pub ssl: bool,

    /// Explicit (AUTH TLS) rather than implicit FTPS (default: true)
    #[serde(default = "default_true")]
    pub ssl_explicit: bool,

    /// TLS trust settings
    #[serde(flatten)]
    pub tls: TlsConfig,

    /// Remote path prefix, e.g. "/out/sample_"
    pub path_prefix: String,

    /// File extension, with or without the leading dot
    pub file_ext: String,

    /// printf-style format applied to (task index, file index) (default: "%03d.%02d")
    #[serde(default = "default_sequence_format")]
    pub sequence_format: String,

    /// Retries after the first failed connect or upload attempt (default: 10)
    #[serde(default = "default_max_connection_retry")]
    pub max_connection_retry: u32,

    /// Remote directory separator (default: "/")
    #[serde(default = "default_directory_separator")]
    pub directory_separator: String,

    /// Directory for local temporary files (default: the system temp dir)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Protocol timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Retry backoff
    #[serde(default)]
    pub retry: RetryConfig,
}

impl OutputConfig {
    /// Minimal configuration with every optional key at its default
    pub fn new(
        host: impl Into<String>,
        path_prefix: impl Into<String>,
        file_ext: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: None,
            password: None,
            passive_mode: true,
            ascii_mode: false,
            ssl: false,
            ssl_explicit: true,
            tls: TlsConfig::default(),
            path_prefix: path_prefix.into(),
            file_ext: file_ext.into(),
            sequence_format: default_sequence_format(),
            max_connection_retry: default_max_connection_retry(),
            directory_separator: default_directory_separator(),
            temp_dir: None,
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: OutputConfig = serde_json::from_str(json).map_err(|e| Error::Config {
            message: format!("invalid configuration: {e}"),
            key: None,
        })?;
        config.validated()
    }

    /// Validate this configuration, returning it unchanged if it is usable
    pub fn validated(self) -> Result<Self> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host", "host must not be empty"));
        }
        if self.port == Some(0) {
            return Err(Error::config("port", "port must be between 1 and 65535"));
        }
        if self.directory_separator.is_empty() {
            return Err(Error::config(
                "directory_separator",
                "directory_separator must not be empty",
            ));
        }
        SequenceFormat::parse(&self.sequence_format)?;
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff_multiplier must be at least 1.0",
            ));
        }
        if self.retry.initial_wait > self.retry.max_wait {
            return Err(Error::config(
                "retry.initial_wait",
                "initial_wait must not exceed max_wait",
            ));
        }
        if self.timeouts.connect.is_zero() || self.timeouts.read.is_zero() {
            return Err(Error::config(
                "timeouts",
                "connect and read timeouts must be non-zero",
            ));
        }
        Ok(self)
    }

    /// Security mode selected by `ssl` and `ssl_explicit`
    pub fn security(&self) -> Security {
        match (self.ssl, self.ssl_explicit) {
            (false, _) => Security::Plain,
            (true, true) => Security::Explicit,
            (true, false) => Security::Implicit,
        }
    }

    /// Configured port, or the default for the security mode
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.security().default_port())
    }

    /// Directory for local temporary files
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn default_true() -> bool {
    true
}

fn default_sequence_format() -> String {
    "%03d.%02d".to_string()
}

fn default_max_connection_retry() -> u32 {
    10
}

fn default_directory_separator() -> String {
    "/".to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_close_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_keepalive() -> Duration {
    Duration::from_secs(3)
}

fn default_initial_wait() -> Duration {
    Duration::from_millis(500)
}

fn default_max_wait() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond Duration serialization helper (retry waits)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
