//! The interactive renderer: a per-container status block that repaints in
//! place, one line per container, rather than scrolling a line per event.
//! Falls back to [super::SimpleLogger] at startup (never mid-run, see the
//! module docs on [super::choose_logger]) when the terminal can't support
//! cursor-addressed redraws.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use owo_colors::AnsiColors;

use super::{container_color, paint_bold, Logger, ProgressSink, Terminal};
use crate::{event::TaskEvent, step::TaskStep};

struct Board {
    /// Insertion order is display order; stable per run.
    order: Vec<String>,
    lines: BTreeMap<String, String>,
    rendered_line_count: u16,
    failures: Vec<String>,
}

impl Board {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            lines: BTreeMap::new(),
            rendered_line_count: 0,
            failures: Vec::new(),
        }
    }

    fn set_line(&mut self, key: &str, text: String) {
        if !self.lines.contains_key(key) {
            self.order.push(key.to_owned());
        }
        self.lines.insert(key.to_owned(), text);
    }
}

pub struct FancyLogger<T> {
    term: T,
    board: Arc<Mutex<Board>>,
}

impl<T: Terminal> FancyLogger<T> {
    pub fn new(term: T) -> Self {
        Self {
            term,
            board: Arc::new(Mutex::new(Board::new())),
        }
    }

    fn redraw(&self, board: &mut Board) {
        self.term.clear_last_lines(board.rendered_line_count);
        for (index, key) in board.order.iter().enumerate() {
            let text = &board.lines[key];
            let colored = text.color(container_color(index)).to_string();
            self.term.println(&colored);
        }
        board.rendered_line_count = board.order.len() as u16;
    }

    fn key_for(step: &TaskStep) -> Option<String> {
        use TaskStep::*;
        match step {
            BuildImage(c) | PullImage(c) => Some(c.name.clone()),
            CreateContainer { container, .. }
            | RunContainer { container, .. }
            | StartContainer { container, .. }
            | WaitForHealth { container, .. }
            | StopContainer { container, .. }
            | RemoveContainer { container, .. }
            | CleanUpContainer { container, .. } => Some(container.name.clone()),
            CreateTaskNetwork => Some("(network)".to_owned()),
            DeleteTaskNetwork(_) => Some("(network)".to_owned()),
            DeleteTemporaryFile { container, .. } => Some(container.name.clone()),
            BeginTask | DisplayTaskFailure(_) | FinishTask => None,
        }
    }
}

use owo_colors::OwoColorize;

impl<T: Terminal> Logger for FancyLogger<T> {
    fn log_step_started(&self, step: &TaskStep) {
        let Some(key) = Self::key_for(step) else { return };
        let mut board = self.board.lock().unwrap();
        board.set_line(&key, step.label());
        self.redraw(&mut board);
    }

    fn log_event(&self, event: &TaskEvent) {
        let mut board = self.board.lock().unwrap();
        if let Some(name) = event.container_name() {
            let text = match event {
                TaskEvent::ContainerBecameHealthy { .. } => format!("{name}: healthy"),
                TaskEvent::ContainerStarted { .. } => format!("{name}: started"),
                TaskEvent::RunningContainerExited { exit_code, .. } => {
                    format!("{name}: exited {exit_code}")
                }
                TaskEvent::ContainerRemoved { .. } => format!("{name}: removed"),
                _ => return,
            };
            board.set_line(name, text);
            self.redraw(&mut board);
        }
        if let Some(message) = event.failure_message() {
            board.failures.push(message);
        }
    }

    fn log_failure(&self, message: &str) {
        let mut board = self.board.lock().unwrap();
        board.failures.push(message.to_owned());
    }

    fn log_cancelled(&self) {
        let mut board = self.board.lock().unwrap();
        board.set_line("(run)", "cancelled, cleaning up...".to_owned());
        self.redraw(&mut board);
    }

    fn log_finished(&self) {
        let board = self.board.lock().unwrap();
        for message in &board.failures {
            self.term.println(&paint_bold(&format!("! {message}"), AnsiColors::Red));
        }
        self.term.println("done");
    }

    /// Progress lines update the board's text for that container but don't
    /// trigger an immediate redraw (the sink runs on a spawned step's task,
    /// detached from `self`'s borrow); the next real event repaints with
    /// whatever the latest progress line was.
    fn progress_sink(&self) -> ProgressSink {
        let board = self.board.clone();
        ProgressSink::new(move |container, step, total, label| {
            let mut board = board.lock().unwrap();
            board.set_line(container, format!("{container}: {step}/{total} {label}"));
        })
    }
}
