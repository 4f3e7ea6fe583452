//! Terminal rendering of a task run. Both renderers drive off
//! the same [TaskEvent]/[TaskStep] stream; which one runs is decided once at
//! startup by [choose_logger] and never changes mid-run — a fancy display
//! never auto-downgrades once it commits to cursor-addressable redraws (see
//! `DESIGN.md` for why that Open Question was resolved this way).

use std::sync::Arc;

use owo_colors::{AnsiColors, OwoColorize};

use crate::{event::TaskEvent, step::TaskStep};

pub mod fancy;
pub mod simple;
pub mod terminal;

pub use fancy::FancyLogger;
pub use simple::SimpleLogger;
pub use terminal::{StdTerminal, Terminal};

/// Callback handed to a spawned step so it can stream build-progress lines
/// back to whichever logger is active, without the step runner knowing
/// which renderer is in use.
#[derive(Clone)]
pub struct ProgressSink(Arc<dyn Fn(&str, u64, u64, &str) + Send + Sync>);

impl ProgressSink {
    pub fn new(f: impl Fn(&str, u64, u64, &str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn report(&self, container: &str, step: u64, total: u64, label: &str) {
        (self.0)(container, step, total, label)
    }

    pub fn noop() -> Self {
        Self::new(|_, _, _, _| {})
    }
}

/// The rendering surface the dispatcher drives. Implemented by
/// [SimpleLogger] and [FancyLogger].
pub trait Logger: Send + Sync {
    fn log_step_started(&self, step: &TaskStep);
    fn log_event(&self, event: &TaskEvent);
    fn log_failure(&self, message: &str);
    fn log_cancelled(&self);
    fn log_finished(&self);
    fn progress_sink(&self) -> ProgressSink;
}

/// Picks [FancyLogger] when stdout is a TTY wide enough for cursor-addressed
/// redraws and the caller hasn't asked for `--quiet`/`--simple`; falls back
/// to [SimpleLogger] (append-only lines, safe for pipes and CI logs)
/// otherwise. Chosen once, up front — see module docs.
pub fn choose_logger(force_simple: bool, quiet: bool) -> Box<dyn Logger> {
    if quiet {
        return Box::new(simple::QuietLogger);
    }
    let term = StdTerminal::default();
    if !force_simple && term.supports_interactivity() {
        Box::new(FancyLogger::new(term))
    } else {
        Box::new(SimpleLogger::new(term))
    }
}

/// Stable color assigned to a container's output for the lifetime of a run,
/// cycling the same palette the teacher's terminal helpers use.
pub fn container_color(index: usize) -> AnsiColors {
    const CYCLE: [AnsiColors; 8] = [
        AnsiColors::White,
        AnsiColors::Yellow,
        AnsiColors::Green,
        AnsiColors::Cyan,
        AnsiColors::BrightBlack,
        AnsiColors::Blue,
        AnsiColors::BrightCyan,
        AnsiColors::BrightGreen,
    ];
    CYCLE[index % CYCLE.len()]
}

pub(crate) fn paint_bold(text: &str, color: AnsiColors) -> String {
    text.color(color).bold().to_string()
}
