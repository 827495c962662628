//! Local terminal control.
//!
//! Raw mode is process-wide state, so it is only ever switched through a
//! [`RawModeGuard`], which puts the previous mode back when dropped.

use crate::error::{SessionError, SessionResult};
use crossterm::terminal;
use crossterm::tty::IsTty;
use std::io;
use tracing::{trace, warn};

/// Operations on the local terminal used by an interactive session.
pub trait TerminalControl: Send + Sync {
    /// Whether both standard input and output are attached to a terminal.
    fn is_interactive(&self) -> bool;

    fn is_raw(&self) -> io::Result<bool>;

    fn enable_raw(&self) -> io::Result<()>;

    fn disable_raw(&self) -> io::Result<()>;

    /// Current size as `(columns, rows)`.
    fn size(&self) -> io::Result<(u16, u16)>;
}

/// The process terminal, driven through crossterm.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrosstermTerminal;

impl TerminalControl for CrosstermTerminal {
    fn is_interactive(&self) -> bool {
        io::stdin().is_tty() && io::stdout().is_tty()
    }

    fn is_raw(&self) -> io::Result<bool> {
        terminal::is_raw_mode_enabled()
    }

    fn enable_raw(&self) -> io::Result<()> {
        terminal::enable_raw_mode()
    }

    fn disable_raw(&self) -> io::Result<()> {
        terminal::disable_raw_mode()
    }

    fn size(&self) -> io::Result<(u16, u16)> {
        terminal::size()
    }
}

/// Holds the terminal in raw mode for its lifetime.
pub struct RawModeGuard<'a> {
    terminal: &'a dyn TerminalControl,
    was_raw: bool,
}

impl<'a> RawModeGuard<'a> {
    /// Record the current mode, then switch to raw.
    pub fn acquire(terminal: &'a dyn TerminalControl) -> SessionResult<Self> {
        let was_raw = terminal.is_raw().map_err(SessionError::RawMode)?;
        if !was_raw {
            terminal.enable_raw().map_err(SessionError::RawMode)?;
        }
        trace!(was_raw, "terminal switched to raw mode");
        Ok(Self { terminal, was_raw })
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if self.was_raw {
            return;
        }
        if let Err(e) = self.terminal.disable_raw() {
            warn!(error = %e, "failed to restore terminal mode; run `reset` if the shell misbehaves");
        } else {
            trace!("terminal mode restored");
        }
    }
}
