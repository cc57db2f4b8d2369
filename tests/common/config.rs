//! Test configuration helpers for mock and live FTP servers

use ftp_output::OutputConfig;
use std::path::Path;
use std::time::Duration;

use super::mock_server::{MockFtpServer, PASSWORD, USER};

/// Error type for test configuration
#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Configuration pointing at a mock server, with short retry waits
pub fn mock_config(server: &MockFtpServer, path_prefix: &str, temp_dir: &Path) -> OutputConfig {
    let mut config = OutputConfig::new("127.0.0.1", path_prefix, "csv");
    config.port = Some(server.port());
    config.user = Some(USER.to_string());
    config.password = Some(PASSWORD.to_string());
    config.max_connection_retry = 3;
    config.retry.initial_wait = Duration::from_millis(10);
    config.retry.max_wait = Duration::from_millis(50);
    config.timeouts.connect = Duration::from_secs(5);
    config.timeouts.read = Duration::from_secs(5);
    config.temp_dir = Some(temp_dir.to_path_buf());
    config
}

/// Configuration for a TLS mock server, trusting its self-signed certificate
pub fn mock_tls_config(
    server: &MockFtpServer,
    explicit: bool,
    path_prefix: &str,
    temp_dir: &Path,
) -> OutputConfig {
    let mut config = mock_config(server, path_prefix, temp_dir);
    config.ssl = true;
    config.ssl_explicit = explicit;
    config.tls.ssl_trusted_ca_cert_data = server.cert_pem();
    config
}

/// Load a live FTP server configuration from environment variables
///
/// Required environment variables:
/// - `FTP_TEST_HOST` - Server hostname
/// - `FTP_TEST_USER` - Login user
/// - `FTP_TEST_PASSWORD` - Login password
///
/// Optional environment variables:
/// - `FTP_TEST_PORT` - Control port (default depends on the security mode)
/// - `FTP_TEST_PATH_PREFIX` - Remote prefix (default: "/ftp-output-test/sample_")
/// - `FTP_TEST_SSL` - "explicit" or "implicit" to use FTPS
pub fn load_live_config() -> Result<OutputConfig, ConfigError> {
    dotenvy::dotenv().ok();

    let host = std::env::var("FTP_TEST_HOST")
        .map_err(|_| ConfigError("FTP_TEST_HOST not set in environment".to_string()))?;
    let user = std::env::var("FTP_TEST_USER")
        .map_err(|_| ConfigError("FTP_TEST_USER not set in environment".to_string()))?;
    let password = std::env::var("FTP_TEST_PASSWORD")
        .map_err(|_| ConfigError("FTP_TEST_PASSWORD not set in environment".to_string()))?;
    let path_prefix = std::env::var("FTP_TEST_PATH_PREFIX")
        .unwrap_or_else(|_| "/ftp-output-test/sample_".to_string());

    let mut config = OutputConfig::new(host, path_prefix, "csv");
    config.user = Some(user);
    config.password = Some(password);
    config.port = std::env::var("FTP_TEST_PORT")
        .ok()
        .and_then(|p| p.parse().ok());
    match std::env::var("FTP_TEST_SSL").ok().as_deref() {
        Some("explicit") => config.ssl = true,
        Some("implicit") => {
            config.ssl = true;
            config.ssl_explicit = false;
        }
        _ => {}
    }
    config
        .validated()
        .map_err(|e| ConfigError(e.to_string()))
}

/// Check if live FTP credentials are available
pub fn has_live_credentials() -> bool {
    load_live_config().is_ok()
}
