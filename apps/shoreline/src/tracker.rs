//! Guesses when a shell command has finished for shells that do not report
//! it. Enter on a line with text after the prompt starts a command; the
//! prompt showing up again on a later line finishes it.
//!
//! The prompt is compared literally. A prompt that changes while the command
//! runs (new directory, new branch) is never recognised as finished.

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::TrackerConfig;
use crate::controller::DebounceTimer;
use crate::model::OutputModel;

/// Cursor line and the prompt captured on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineInfo {
    pub line: u64,
    pub prompt: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    AwaitingFinish { start_line: u64, prompt: String },
}

#[derive(Debug)]
pub struct CommandFinishTracker {
    enabled: bool,
    max_line_length: usize,
    line_info: Option<LineInfo>,
    state: TrackerState,
    debounce: DebounceTimer,
}

impl CommandFinishTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_line_length: config.max_line_length,
            line_info: None,
            state: TrackerState::Idle,
            debounce: DebounceTimer::new(config.debounce()),
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn line_info(&self) -> Option<&LineInfo> {
        self.line_info.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The shell reports commands itself; stop guessing.
    pub fn stand_down(&mut self) {
        if self.enabled {
            debug!(target = "shoreline::tracker", "structured shell events seen; heuristic disabled");
        }
        self.enabled = false;
        self.state = TrackerState::Idle;
        self.line_info = None;
        self.debounce.cancel();
    }

    /// Captures the text before the cursor as the prompt, unless the cursor
    /// is still on the captured line and that line still starts with it.
    /// Called before each keystroke is applied.
    pub fn refresh(&mut self, model: &OutputModel) {
        if !self.enabled {
            return;
        }
        let line = model.cursor_line();
        let Some(text) = self.bounded_line(model, line) else {
            return;
        };
        let keep = matches!(
            &self.line_info,
            Some(info) if info.line == line && text.starts_with(&info.prompt)
        );
        if !keep {
            let prompt = model.text_before_cursor();
            trace!(target = "shoreline::tracker", line, prompt = %prompt, "line info captured");
            self.line_info = Some(LineInfo { line, prompt });
        }
    }

    /// Drops the captured prompt once the backend moves the cursor to another
    /// line or rewrites the prompt under it.
    pub fn invalidate(&mut self, model: &OutputModel) {
        let Some(info) = self.line_info.as_ref() else {
            return;
        };
        let valid = info.line == model.cursor_line()
            && model
                .line_text(info.line)
                .is_some_and(|text| text.starts_with(info.prompt.as_str()));
        if !valid {
            trace!(target = "shoreline::tracker", line = info.line, "line info dropped");
            self.line_info = None;
        }
    }

    /// Enter was pressed. Returns true when a command is now believed to run.
    pub fn on_enter(&mut self, model: &OutputModel) -> bool {
        if !self.enabled {
            return false;
        }
        self.refresh(model);
        let Some(info) = self.line_info.as_ref() else {
            return false;
        };
        let Some(text) = self.bounded_line(model, info.line) else {
            return false;
        };
        if text.chars().count() <= info.prompt.chars().count() {
            return false;
        }
        debug!(
            target = "shoreline::tracker",
            line = info.line,
            command = text.get(info.prompt.len()..).unwrap_or_default(),
            "command started"
        );
        self.state = TrackerState::AwaitingFinish {
            start_line: info.line,
            prompt: info.prompt.clone(),
        };
        self.debounce.cancel();
        true
    }

    /// Backend content changed; the finish check runs once things settle.
    pub fn on_content_changed(&mut self, now: Instant) {
        if self.enabled && matches!(self.state, TrackerState::AwaitingFinish { .. }) {
            self.debounce.arm(now);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    /// Returns true exactly once per started command, when the prompt is
    /// back on a different line.
    pub fn on_deadline(&mut self, model: &OutputModel, now: Instant) -> bool {
        if !self.debounce.fire(now) {
            return false;
        }
        let TrackerState::AwaitingFinish { start_line, prompt } = &self.state else {
            return false;
        };
        let line = model.cursor_line();
        if line == *start_line || self.bounded_line(model, line).is_none() {
            return false;
        }
        if !model.text_before_cursor().starts_with(prompt.as_str()) {
            trace!(target = "shoreline::tracker", line, "prompt not back yet");
            return false;
        }
        debug!(target = "shoreline::tracker", line, "command finished");
        self.state = TrackerState::Idle;
        true
    }

    fn bounded_line(&self, model: &OutputModel, line: u64) -> Option<String> {
        let text = model.line_text(line)?;
        if text.chars().count() > self.max_line_length {
            trace!(target = "shoreline::tracker", line, "line too long to track");
            return None;
        }
        Some(text)
    }
}
