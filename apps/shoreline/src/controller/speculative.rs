//! Type-ahead: local predictions go straight into the model while backend
//! events are held back, then merged once the backend has had time to echo.

use std::mem;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use super::merge::{self, PendingUpdate};
use super::{DebounceTimer, OutputModelController};
use crate::error::ModelError;
use crate::model::{ChangeOrigin, OutputModel, TailCheckpoint};
use crate::protocol::{ContentUpdate, CursorUpdate, ScreenSnapshot};
use crate::telemetry::{self, Metric, PerfGuard};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeAheadEdit {
    Insert(String),
    Backspace,
}

#[derive(Debug)]
pub struct SpeculativeController {
    model: OutputModel,
    /// Backend events are being held back.
    delaying: bool,
    pending: Vec<PendingUpdate>,
    /// Cursor line as it was before the first prediction of the window.
    checkpoint: Option<TailCheckpoint>,
    debounce: DebounceTimer,
    /// Window with nothing buffered after which predictions are withdrawn.
    stale_after: Duration,
    last_prediction: Option<Instant>,
    /// The timer is armed for the stale deadline rather than a window.
    awaiting_echo: bool,
    predictions: usize,
}

impl SpeculativeController {
    pub fn new(model: OutputModel, window: Duration, stale_after: Duration) -> Self {
        Self {
            model,
            delaying: false,
            pending: Vec::new(),
            checkpoint: None,
            debounce: DebounceTimer::new(window),
            stale_after,
            last_prediction: None,
            awaiting_echo: false,
            predictions: 0,
        }
    }

    pub fn is_predicting(&self) -> bool {
        self.delaying
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Applies `edit` locally if the cursor sits at the tail of the buffer.
    /// Returns false, touching nothing, when the prediction is not safe.
    pub fn predict(&mut self, edit: &TypeAheadEdit, enabled: bool, now: Instant) -> bool {
        if !enabled {
            trace!(target = "shoreline::typeahead", "prediction skipped: disabled");
            return false;
        }
        if !self.model.tail_is_blank() {
            trace!(target = "shoreline::typeahead", "prediction skipped: text after cursor");
            return false;
        }
        match edit {
            TypeAheadEdit::Insert(text) => {
                if text.is_empty() || text.chars().any(char::is_control) {
                    trace!(target = "shoreline::typeahead", "prediction skipped: not printable");
                    return false;
                }
            }
            TypeAheadEdit::Backspace => {
                if self.model.cursor_column() == 0 {
                    trace!(target = "shoreline::typeahead", "prediction skipped: line start");
                    return false;
                }
            }
        }

        if self.checkpoint.is_none() {
            self.checkpoint = Some(self.model.checkpoint_cursor_line());
        }
        let cursor = self.model.cursor_offset();
        match edit {
            TypeAheadEdit::Insert(text) => {
                let count = text.chars().count();
                // Terminals overwrite cells; eat trailing blanks the echo would cover.
                let overwrite = count.min(self.model.blank_run_after_cursor());
                self.model
                    .replace_content(cursor, overwrite, text, &[], ChangeOrigin::TypeAhead);
                self.model
                    .move_cursor(cursor + count as u64, ChangeOrigin::TypeAhead);
            }
            TypeAheadEdit::Backspace => {
                self.model
                    .replace_content(cursor - 1, 1, "", &[], ChangeOrigin::TypeAhead);
                self.model.move_cursor(cursor - 1, ChangeOrigin::TypeAhead);
            }
        }

        self.delaying = true;
        self.last_prediction = Some(now);
        self.predictions += 1;
        self.awaiting_echo = false;
        self.debounce.arm(now);
        trace!(
            target = "shoreline::typeahead",
            edit = ?edit,
            cursor = self.model.cursor_offset(),
            "prediction applied"
        );
        true
    }

    /// Holds a backend event; an echo that misses the first window still
    /// lands one window later instead of waiting for the stale deadline.
    fn hold(&mut self, update: PendingUpdate) {
        self.pending.push(update);
        if self.awaiting_echo {
            self.awaiting_echo = false;
            let next_window = Instant::now() + self.debounce.window();
            let deadline = self
                .debounce
                .deadline()
                .map_or(next_window, |deadline| deadline.min(next_window));
            self.debounce.arm_at(deadline);
        }
    }

    /// Withdraws predictions and applies the merged backend truth as one
    /// change.
    fn close_window(&mut self) -> Result<(), ModelError> {
        let _perf = PerfGuard::new(Metric::TypeAheadMerge);
        let pending = mem::take(&mut self.pending);
        let buffered = pending.len();
        let merged = merge::merge(pending, self.model.first_line(), self.model.max_lines());
        let applied = merged.content.len() + usize::from(merged.cursor.is_some());

        let checkpoint = self.checkpoint.take();
        let origin = if merged.is_empty() {
            ChangeOrigin::TypeAhead
        } else {
            ChangeOrigin::Backend
        };
        let dirty_from = checkpoint
            .as_ref()
            .map_or(self.model.end_offset(), |checkpoint| checkpoint.offset);
        let result = self.model.coalesce(origin, dirty_from, |model| {
            if let Some(checkpoint) = &checkpoint {
                model.rollback_to(checkpoint, ChangeOrigin::TypeAhead);
            }
            merged.apply_to(model, ChangeOrigin::Backend)
        });

        debug!(
            target = "shoreline::typeahead",
            predictions = self.predictions,
            buffered,
            applied,
            "type-ahead window closed"
        );
        telemetry::record(Metric::TypeAheadBuffered, buffered as u64);
        self.delaying = false;
        self.last_prediction = None;
        self.awaiting_echo = false;
        self.predictions = 0;
        self.debounce.cancel();
        result
    }
}

impl OutputModelController for SpeculativeController {
    fn model(&self) -> &OutputModel {
        &self.model
    }

    fn update_content(&mut self, update: ContentUpdate) -> Result<(), ModelError> {
        if self.delaying {
            self.hold(PendingUpdate::Content(update));
            return Ok(());
        }
        self.model.apply_content_update(&update, ChangeOrigin::Backend)
    }

    fn update_cursor(&mut self, update: CursorUpdate) {
        if self.delaying {
            self.hold(PendingUpdate::Cursor(update));
            return;
        }
        self.model.apply_cursor_update(update, ChangeOrigin::Backend);
    }

    fn restore(&mut self, snapshot: &ScreenSnapshot) {
        // The snapshot supersedes anything predicted on the old contents.
        self.checkpoint = None;
        self.model.restore(snapshot);
    }

    fn apply_pending_updates(&mut self) -> Result<(), ModelError> {
        if !self.delaying {
            return Ok(());
        }
        self.close_window()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    fn on_deadline(&mut self, now: Instant) -> Result<(), ModelError> {
        if !self.debounce.fire(now) || !self.delaying {
            return Ok(());
        }
        if self.pending.is_empty() {
            let stale_at = self.last_prediction.map(|at| at + self.stale_after);
            match stale_at {
                Some(stale_at) if stale_at > now => {
                    // Nothing echoed yet; keep the predictions on screen.
                    self.debounce.arm_at(stale_at);
                    self.awaiting_echo = true;
                    return Ok(());
                }
                _ => {
                    debug!(
                        target = "shoreline::typeahead",
                        predictions = self.predictions,
                        "no backend echo; withdrawing predictions"
                    );
                }
            }
        }
        self.close_window()
    }

    fn abandon(&mut self) {
        if self.delaying {
            debug!(
                target = "shoreline::typeahead",
                discarded = self.pending.len(),
                "type-ahead window abandoned"
            );
        }
        self.pending.clear();
        self.checkpoint = None;
        self.delaying = false;
        self.last_prediction = None;
        self.awaiting_echo = false;
        self.predictions = 0;
        self.debounce.cancel();
    }

    fn backend_cursor_offset(&self) -> u64 {
        match &self.checkpoint {
            Some(checkpoint) => checkpoint.cursor_offset,
            None => self.model.cursor_offset(),
        }
    }
}
