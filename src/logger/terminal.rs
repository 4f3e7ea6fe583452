//! A thin abstraction over stdout so the fancy logger's cursor movement and
//! the simple logger's append-only writes share one capability-detection
//! path, and so tests can substitute a buffer instead of a real TTY.

use std::io::{IsTerminal, Write};

pub trait Terminal: Send + Sync {
    /// Whether stdout is a TTY wide enough to be worth redrawing in place.
    /// Below this width the fancy logger's per-container status lines would
    /// wrap and corrupt the redraw, so simple output is used instead.
    fn supports_interactivity(&self) -> bool;

    fn width(&self) -> Option<u16>;

    fn print(&self, text: &str);

    fn println(&self, text: &str);

    /// Moves the cursor up `lines` rows and clears each one, so the fancy
    /// logger can repaint its status block without scrolling the terminal.
    fn clear_last_lines(&self, lines: u16);
}

const MIN_INTERACTIVE_WIDTH: u16 = 40;

#[derive(Default)]
pub struct StdTerminal;

impl Terminal for StdTerminal {
    fn supports_interactivity(&self) -> bool {
        std::io::stdout().is_terminal() && self.width().is_some_and(|w| w >= MIN_INTERACTIVE_WIDTH)
    }

    fn width(&self) -> Option<u16> {
        terminal_size::terminal_size().map(|(terminal_size::Width(w), _)| w)
    }

    fn print(&self, text: &str) {
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "{text}");
        let _ = stdout.flush();
    }

    fn println(&self, text: &str) {
        let mut stdout = std::io::stdout();
        let _ = writeln!(stdout, "{text}");
        let _ = stdout.flush();
    }

    fn clear_last_lines(&self, lines: u16) {
        if lines == 0 {
            return;
        }
        let mut stdout = std::io::stdout();
        for _ in 0..lines {
            // cursor up one line, then clear it
            let _ = write!(stdout, "\x1b[1A\x1b[2K");
        }
        let _ = stdout.flush();
    }
}
