//! Secure interactive SSH sessions.
//!
//! A session is established in order: host identity verification against
//! known_hosts, TCP connect with password authentication, one session
//! channel with a PTY sized to the local terminal, then a raw-mode stdio
//! bridge until the remote shell exits. Nothing is retried.

mod bridge;
mod known_hosts;
mod terminal;

pub use bridge::{run_interactive, RemoteShell, SshShell, TERM_TYPE};
pub use known_hosts::{
    host_pattern, HostKey, HostKeyPolicy, HostKeyStatus, HostKeyVerifier, KnownHosts,
};
pub use terminal::{CrosstermTerminal, RawModeGuard, TerminalControl};

use crate::config::AppSettings;
use crate::error::{SessionError, SessionResult};
use russh::client;
use russh::keys::{HashAlg, PublicKey};
use russh::Disconnect;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Time allowed for TCP connect plus key exchange.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Username and password supplied by the user. Never stored.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Convert a russh public key into the known_hosts representation.
pub fn host_key_from(key: &PublicKey) -> SessionResult<HostKey> {
    let openssh = key
        .to_openssh()
        .map_err(|e| SessionError::Transport(format!("unreadable host key: {}", e)))?;
    let mut fields = openssh.split_whitespace();
    let (Some(algorithm), Some(base64)) = (fields.next(), fields.next()) else {
        return Err(SessionError::Transport(
            "unreadable host key encoding".to_string(),
        ));
    };
    Ok(HostKey::new(
        algorithm,
        base64,
        key.fingerprint(HashAlg::Sha256).to_string(),
    ))
}

/// russh callbacks for one connection.
pub struct ClientHandler {
    host: String,
    port: u16,
    verifier: HostKeyVerifier,
}

impl ClientHandler {
    pub fn new(host: impl Into<String>, port: u16, verifier: HostKeyVerifier) -> Self {
        Self {
            host: host.into(),
            port,
            verifier,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SessionError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let key = host_key_from(server_public_key)?;
        self.verifier.verify(&self.host, self.port, &key)?;
        Ok(true)
    }
}

/// An authenticated SSH connection.
pub struct SshConnection {
    handle: client::Handle<ClientHandler>,
    host: String,
    port: u16,
}

impl SshConnection {
    /// Dial `host:port`, verify the host key and authenticate with a password.
    pub async fn connect(
        host: &str,
        port: u16,
        credentials: &Credentials,
        verifier: HostKeyVerifier,
    ) -> SessionResult<Self> {
        let config = Arc::new(client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let handler = ClientHandler::new(host, port, verifier);

        debug!(host, port, user = %credentials.user, "connecting");
        let mut handle = match timeout(CONNECT_TIMEOUT, client::connect(config, (host, port), handler)).await {
            Err(_) => {
                return Err(SessionError::Transport(format!(
                    "timed out connecting to {}:{}",
                    host, port
                )))
            }
            Ok(Err(SessionError::Protocol(russh::Error::IO(e)))) => {
                return Err(SessionError::Transport(format!("{}:{}: {}", host, port, e)))
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(handle)) => handle,
        };

        let auth = handle
            .authenticate_password(credentials.user.as_str(), credentials.password.as_str())
            .await?;

        let connection = Self {
            handle,
            host: host.to_string(),
            port,
        };

        if !auth.success() {
            connection.close().await;
            return Err(SessionError::AuthenticationFailure {
                user: credentials.user.clone(),
                host: host.to_string(),
            });
        }

        info!(host, port, user = %credentials.user, "authenticated");
        Ok(connection)
    }

    /// Open a session channel and run an interactive shell through
    /// `terminal`, then disconnect.
    pub async fn run_shell(self, terminal: &dyn TerminalControl) -> SessionResult<Option<u32>> {
        let result = self.interactive(terminal).await;
        self.close().await;
        result
    }

    /// Open a session channel ready for PTY and shell requests.
    pub async fn open_shell(&self) -> SessionResult<SshShell> {
        let channel = self.handle.channel_open_session().await?;
        Ok(SshShell::new(channel))
    }

    async fn interactive(&self, terminal: &dyn TerminalControl) -> SessionResult<Option<u32>> {
        let mut shell = self.open_shell().await?;
        run_interactive(&mut shell, terminal).await
    }

    async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(host = %self.host, port = self.port, error = %e, "disconnect failed");
        }
    }
}

/// Connect to `host:port` and run an interactive shell.
///
/// Host keys are checked according to `settings.ssh_secure_mode` and
/// `accept_new`. Returns the remote exit status when one was reported.
pub async fn establish_session(
    host: &str,
    port: u16,
    credentials: &Credentials,
    settings: &AppSettings,
    accept_new: bool,
    terminal: &dyn TerminalControl,
) -> SessionResult<Option<u32>> {
    let policy = HostKeyPolicy::from_flags(settings.ssh_secure_mode, accept_new);
    let verifier = HostKeyVerifier::for_policy(policy, settings.known_hosts_path.as_deref())?;

    let connection = SshConnection::connect(host, port, credentials, verifier).await?;
    connection.run_shell(terminal).await
}
