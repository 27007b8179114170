use anyhow::Context;
use crossterm::{
    cursor,
    event::{DisableMouseCapture, EnableMouseCapture},
    terminal::{self, ClearType},
    ExecutableCommand,
};
use std::io::{stdout, Stdout, Write};

/// Raw mode, alternate screen and mouse capture for the lifetime of the guard.
pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    pub fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode().context("enable raw mode")?;
        // Drop restores raw mode if a later step fails.
        let guard = Self { _private: () };

        let mut out = stdout();
        out.execute(terminal::EnterAlternateScreen)
            .context("enter alternate screen")?;
        out.execute(terminal::Clear(ClearType::All))
            .context("clear screen")?;
        out.execute(cursor::Hide).context("hide cursor")?;
        out.execute(EnableMouseCapture)
            .context("enable mouse capture")?;

        Ok(guard)
    }

    pub fn stdout() -> Stdout {
        stdout()
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut out = stdout();
        // Best-effort: sync output, autowrap, colors, kitty images.
        let _ = out.write_all(b"\x1b[?2026l\x1b[?7h\x1b[0m\x1b_Ga=d,d=A,q=2\x1b\\");
        let _ = out.flush();
        let _ = out.execute(DisableMouseCapture);
        let _ = out.execute(cursor::Show);
        let _ = out.execute(terminal::LeaveAlternateScreen);
    }
}
