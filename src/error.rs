//! Error types for idiot.
//!
//! Uses `thiserror` for ergonomic error definitions.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while discovering and enriching devices.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Network setup failed: {0}")]
    NetworkSetup(String),

    #[error("Probe timed out")]
    ProbeTimeout,

    #[error("Malformed packet: {0}")]
    ProtocolParse(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Raw socket error: {0}")]
    RawSocket(String),

    #[error("mDNS error: {0}")]
    Mdns(String),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for scan operations.
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors raised while establishing or running an interactive SSH session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Host key for {host}:{port} is not trusted ({reason}); fingerprint {fingerprint}")]
    HostKeyUntrusted {
        host: String,
        port: u16,
        fingerprint: String,
        reason: String,
    },

    #[error("Authentication failed for {user}@{host}")]
    AuthenticationFailure { user: String, host: String },

    #[error("Could not connect: {0}")]
    Transport(String),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("Standard input and output must both be attached to a terminal")]
    TerminalNotInteractive,

    #[error("Failed to switch terminal mode: {0}")]
    RawMode(std::io::Error),

    #[error("Failed to read terminal size: {0}")]
    TerminalSize(std::io::Error),

    #[error("Remote side refused the PTY request: {0}")]
    PtyRequest(String),

    #[error("Failed to start remote shell: {0}")]
    Shell(String),

    #[error("Channel closed before the request was answered")]
    ChannelClosed,

    #[error("Known hosts store error: {0}")]
    KnownHosts(#[from] KnownHostsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether this failure is a host identity problem the user can fix by
    /// trusting the host key.
    pub fn is_untrusted_host(&self) -> bool {
        matches!(self, Self::HostKeyUntrusted { .. })
    }
}

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors from the known-hosts file.
#[derive(Error, Debug)]
pub enum KnownHostsError {
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("failed to write {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("home directory could not be determined")]
    NoHomeDirectory,
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine configuration directory")]
    DirectoryNotFound,

    #[error("Failed to read {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("Failed to write {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("Invalid configuration format: {0}")]
    InvalidFormat(String),

    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Saved-device storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage directory error: {0}")]
    DirectoryError(String),

    #[error("Failed to load saved devices: {0}")]
    LoadFailed(String),

    #[error("Failed to save devices: {0}")]
    SaveFailed(String),

    #[error("No saved device with address {0}")]
    DeviceNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Top-level error for CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Target(#[from] crate::types::TargetError),

    #[error("Prompt failed: {0}")]
    Prompt(std::io::Error),

    #[error("Failed to write output: {0}")]
    Output(std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untrusted_host_is_distinguishable() {
        let err = SessionError::HostKeyUntrusted {
            host: "192.168.1.10".to_string(),
            port: 22,
            fingerprint: "SHA256:abc".to_string(),
            reason: "no entry in known_hosts".to_string(),
        };
        assert!(err.is_untrusted_host());
        assert!(err.to_string().contains("192.168.1.10:22"));

        let auth = SessionError::AuthenticationFailure {
            user: "pi".to_string(),
            host: "192.168.1.10".to_string(),
        };
        assert!(!auth.is_untrusted_host());
    }

    #[test]
    fn test_cli_error_is_transparent() {
        let err: CliError = ScanError::NetworkSetup("no route".to_string()).into();
        assert_eq!(err.to_string(), "Network setup failed: no route");
    }
}
