//! Interactive shell bridging.
//!
//! [`run_interactive`] drives one remote shell through the local terminal:
//! interactivity check, PTY request at the local size, raw mode, shell
//! request, then byte proxying until the remote side closes.

use crate::error::{SessionError, SessionResult};
use crate::session::terminal::{RawModeGuard, TerminalControl};
use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

/// Terminal type requested for the remote PTY.
pub const TERM_TYPE: &str = "xterm-256color";

const STDIN_CHUNK: usize = 1024;

/// A remote session channel that can host an interactive shell.
#[async_trait]
pub trait RemoteShell: Send {
    async fn request_pty(&mut self, term: &str, cols: u16, rows: u16) -> SessionResult<()>;

    async fn request_shell(&mut self) -> SessionResult<()>;

    /// Proxy local stdio to the shell until it closes. Returns the remote
    /// exit status when one was reported.
    async fn bridge(&mut self, terminal: &dyn TerminalControl) -> SessionResult<Option<u32>>;
}

/// Run an interactive shell on `shell`.
///
/// The terminal mode observed on entry is restored on every exit path.
pub async fn run_interactive<S>(
    shell: &mut S,
    terminal: &dyn TerminalControl,
) -> SessionResult<Option<u32>>
where
    S: RemoteShell + ?Sized,
{
    if !terminal.is_interactive() {
        return Err(SessionError::TerminalNotInteractive);
    }

    let (cols, rows) = terminal.size().map_err(SessionError::TerminalSize)?;
    debug!(cols, rows, term = TERM_TYPE, "requesting pty");
    shell.request_pty(TERM_TYPE, cols, rows).await?;

    let _raw = RawModeGuard::acquire(terminal)?;
    shell.request_shell().await?;
    shell.bridge(terminal).await
}

/// A russh session channel.
pub struct SshShell {
    channel: Channel<Msg>,
}

impl SshShell {
    pub fn new(channel: Channel<Msg>) -> Self {
        Self { channel }
    }

    /// Wait for the reply to a `want_reply` request.
    async fn await_reply(&mut self) -> SessionResult<bool> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(true),
                Some(ChannelMsg::Failure) => return Ok(false),
                Some(ChannelMsg::Close) | None => return Err(SessionError::ChannelClosed),
                Some(other) => trace!(?other, "message while awaiting request reply"),
            }
        }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn request_pty(&mut self, term: &str, cols: u16, rows: u16) -> SessionResult<()> {
        self.channel
            .request_pty(true, term, u32::from(cols), u32::from(rows), 0, 0, &[])
            .await?;
        if self.await_reply().await? {
            Ok(())
        } else {
            Err(SessionError::PtyRequest(format!("{} {}x{}", term, cols, rows)))
        }
    }

    async fn request_shell(&mut self) -> SessionResult<()> {
        self.channel.request_shell(true).await?;
        if self.await_reply().await? {
            Ok(())
        } else {
            Err(SessionError::Shell("server refused the shell request".to_string()))
        }
    }

    async fn bridge(&mut self, terminal: &dyn TerminalControl) -> SessionResult<Option<u32>> {
        let mut stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut stderr = tokio::io::stderr();
        let mut resize = ResizeEvents::new()?;
        let mut buf = vec![0u8; STDIN_CHUNK];
        let mut stdin_open = true;
        let mut exit_status = None;

        loop {
            tokio::select! {
                read = stdin.read(&mut buf), if stdin_open => {
                    match read? {
                        0 => {
                            stdin_open = false;
                            self.channel.eof().await?;
                        }
                        n => self.channel.data(&buf[..n]).await?,
                    }
                }
                Some(()) = resize.next() => {
                    match terminal.size() {
                        Ok((cols, rows)) => {
                            trace!(cols, rows, "window resized");
                            self.channel
                                .window_change(u32::from(cols), u32::from(rows), 0, 0)
                                .await?;
                        }
                        Err(e) => debug!(error = %e, "could not read new window size"),
                    }
                }
                msg = self.channel.wait() => {
                    match msg {
                        Some(ChannelMsg::Data { ref data }) => {
                            stdout.write_all(data).await?;
                            stdout.flush().await?;
                        }
                        Some(ChannelMsg::ExtendedData { ref data, ext: 1 }) => {
                            stderr.write_all(data).await?;
                            stderr.flush().await?;
                        }
                        Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                            debug!(code, "remote command exited");
                            exit_status = Some(code);
                        }
                        Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                            debug!(?signal_name, "remote command killed by signal");
                        }
                        Some(ChannelMsg::Eof) => trace!("remote eof"),
                        Some(ChannelMsg::Close) | None => break,
                        Some(_) => {}
                    }
                }
            }
        }

        Ok(exit_status)
    }
}

#[cfg(unix)]
struct ResizeEvents(tokio::signal::unix::Signal);

#[cfg(unix)]
impl ResizeEvents {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self(signal(SignalKind::window_change())?))
    }

    async fn next(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

#[cfg(not(unix))]
struct ResizeEvents;

#[cfg(not(unix))]
impl ResizeEvents {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Option<()> {
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::terminal::tests::MockTerminal;
    use std::sync::atomic::Ordering;

    #[derive(Default)]
    struct MockShell {
        refuse_pty: bool,
        refuse_shell: bool,
        pty_size: Option<(u16, u16)>,
        raw_during_bridge: Option<bool>,
        calls: Vec<&'static str>,
    }

    #[async_trait]
    impl RemoteShell for MockShell {
        async fn request_pty(&mut self, term: &str, cols: u16, rows: u16) -> SessionResult<()> {
            assert_eq!(term, TERM_TYPE);
            self.calls.push("pty");
            self.pty_size = Some((cols, rows));
            if self.refuse_pty {
                return Err(SessionError::PtyRequest("refused".to_string()));
            }
            Ok(())
        }

        async fn request_shell(&mut self) -> SessionResult<()> {
            self.calls.push("shell");
            if self.refuse_shell {
                return Err(SessionError::Shell("refused".to_string()));
            }
            Ok(())
        }

        async fn bridge(&mut self, terminal: &dyn TerminalControl) -> SessionResult<Option<u32>> {
            self.calls.push("bridge");
            self.raw_during_bridge = terminal.is_raw().ok();
            Ok(Some(0))
        }
    }

    #[tokio::test]
    async fn test_success_restores_terminal() {
        let terminal = MockTerminal::new(false);
        let mut shell = MockShell::default();

        let status = run_interactive(&mut shell, &terminal).await.unwrap();

        assert_eq!(status, Some(0));
        assert_eq!(shell.calls, vec!["pty", "shell", "bridge"]);
        assert_eq!(shell.pty_size, Some((120, 40)));
        assert_eq!(shell.raw_during_bridge, Some(true));
        assert!(!terminal.is_raw_now());
    }

    #[tokio::test]
    async fn test_pty_failure_restores_terminal() {
        let terminal = MockTerminal::new(false);
        let mut shell = MockShell {
            refuse_pty: true,
            ..Default::default()
        };

        let err = run_interactive(&mut shell, &terminal).await.unwrap_err();

        assert!(matches!(err, SessionError::PtyRequest(_)));
        assert_eq!(shell.calls, vec!["pty"]);
        assert!(!terminal.is_raw_now());
        assert_eq!(terminal.switches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shell_failure_restores_terminal() {
        let terminal = MockTerminal::new(false);
        let mut shell = MockShell {
            refuse_shell: true,
            ..Default::default()
        };

        let err = run_interactive(&mut shell, &terminal).await.unwrap_err();

        assert!(matches!(err, SessionError::Shell(_)));
        assert_eq!(shell.calls, vec!["pty", "shell"]);
        assert!(!terminal.is_raw_now());
        assert_eq!(terminal.switches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_already_raw_terminal_stays_raw() {
        let terminal = MockTerminal::new(true);
        let mut shell = MockShell {
            refuse_shell: true,
            ..Default::default()
        };

        assert!(run_interactive(&mut shell, &terminal).await.is_err());
        assert!(terminal.is_raw_now());
    }

    #[tokio::test]
    async fn test_non_interactive_fails_fast() {
        let mut terminal = MockTerminal::new(false);
        terminal.interactive = false;
        let mut shell = MockShell::default();

        let err = run_interactive(&mut shell, &terminal).await.unwrap_err();

        assert!(matches!(err, SessionError::TerminalNotInteractive));
        assert!(shell.calls.is_empty());
    }
}
