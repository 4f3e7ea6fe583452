//! The non-interactive renderer: one line per event, append-only. Safe for
//! pipes, CI logs, and anywhere `FancyLogger`'s redraws would corrupt output.

use super::{container_color, paint_bold, Logger, ProgressSink};
use crate::{event::TaskEvent, step::TaskStep};

pub struct SimpleLogger<T> {
    term: T,
}

impl<T: super::Terminal> SimpleLogger<T> {
    pub fn new(term: T) -> Self {
        Self { term }
    }
}

impl<T: super::Terminal> Logger for SimpleLogger<T> {
    fn log_step_started(&self, step: &TaskStep) {
        self.term.println(&format!("-> {}", step.label()));
    }

    fn log_event(&self, event: &TaskEvent) {
        if let Some(message) = event.failure_message() {
            self.term.println(&paint_bold(&format!("! {message}"), container_color(0)));
        }
        if let TaskEvent::RunningContainerExited { container, exit_code } = event {
            self.term
                .println(&format!("{} exited with code {exit_code}", container.name));
        }
    }

    fn log_failure(&self, message: &str) {
        self.term.println(&paint_bold(&format!("task failed: {message}"), owo_colors::AnsiColors::Red));
    }

    fn log_cancelled(&self) {
        self.term.println("cancelled, cleaning up...");
    }

    fn log_finished(&self) {
        self.term.println("done");
    }

    fn progress_sink(&self) -> ProgressSink {
        ProgressSink::new(|container, step, total, label| {
            println!("  [{container}] {step}/{total} {label}");
        })
    }
}

/// `--quiet`: suppresses everything but the final failure message, if any.
pub struct QuietLogger;

impl Logger for QuietLogger {
    fn log_step_started(&self, _step: &TaskStep) {}

    fn log_event(&self, _event: &TaskEvent) {}

    fn log_failure(&self, message: &str) {
        eprintln!("task failed: {message}");
    }

    fn log_cancelled(&self) {}

    fn log_finished(&self) {}

    fn progress_sink(&self) -> ProgressSink {
        ProgressSink::noop()
    }
}
