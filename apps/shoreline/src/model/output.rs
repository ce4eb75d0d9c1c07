use std::fmt;
use std::mem;

use tracing::trace;

use super::{ChangeEvent, ChangeKind, ChangeOrigin, ModelListener};
use crate::error::ModelError;
use crate::protocol::{ContentUpdate, CursorUpdate, Highlighting, ScreenSnapshot, StyleId};

/// Logical cursor position as last set by the backend or a prediction.
/// The cursor offset is re-derived from it after every content change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CursorAnchor {
    pub line: u64,
    pub column: usize,
}

impl From<CursorUpdate> for CursorAnchor {
    fn from(update: CursorUpdate) -> Self {
        Self {
            line: update.line,
            column: update.column,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StoredHighlighting {
    start: u64,
    end: u64,
    style: StyleId,
}

/// Saved copy of everything from the start of the cursor line to the end of
/// the buffer, used to undo local edits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TailCheckpoint {
    pub offset: u64,
    pub text: String,
    pub highlightings: Vec<Highlighting>,
    pub cursor: CursorAnchor,
    pub cursor_offset: u64,
}

/// Text and cursor of one terminal screen buffer.
///
/// Offsets are character offsets in the unbounded logical stream. The
/// in-memory window starts at `start_offset()`; lines above it were trimmed.
pub struct OutputModel {
    name: &'static str,
    chars: Vec<char>,
    /// Relative offset of each line start; never empty.
    line_starts: Vec<usize>,
    highlightings: Vec<StoredHighlighting>,
    trimmed_lines: u64,
    trimmed_chars: u64,
    cursor: CursorAnchor,
    cursor_offset: u64,
    max_lines: usize,
    revision: u64,
    backend_revision: u64,
    listeners: Vec<Box<dyn ModelListener>>,
}

impl fmt::Debug for OutputModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputModel")
            .field("name", &self.name)
            .field("chars", &self.chars.len())
            .field("lines", &self.line_starts.len())
            .field("trimmed_lines", &self.trimmed_lines)
            .field("trimmed_chars", &self.trimmed_chars)
            .field("cursor", &self.cursor)
            .field("cursor_offset", &self.cursor_offset)
            .field("revision", &self.revision)
            .finish()
    }
}

impl OutputModel {
    pub fn new(name: &'static str, max_lines: usize) -> Self {
        assert!(max_lines > 0, "model needs room for at least one line");
        Self {
            name,
            chars: Vec::new(),
            line_starts: vec![0],
            highlightings: Vec::new(),
            trimmed_lines: 0,
            trimmed_chars: 0,
            cursor: CursorAnchor::default(),
            cursor_offset: 0,
            max_lines,
            revision: 0,
            backend_revision: 0,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn ModelListener>) {
        self.listeners.push(listener);
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    pub fn start_offset(&self) -> u64 {
        self.trimmed_chars
    }

    pub fn end_offset(&self) -> u64 {
        self.trimmed_chars + self.chars.len() as u64
    }

    pub fn cursor_offset(&self) -> u64 {
        self.cursor_offset
    }

    pub fn cursor_anchor(&self) -> CursorAnchor {
        self.cursor
    }

    /// Bumped on every content change, whatever its origin.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Bumped only by content changes that carry backend truth.
    pub fn backend_revision(&self) -> u64 {
        self.backend_revision
    }

    pub fn to_relative(&self, offset: u64) -> usize {
        assert!(
            offset >= self.start_offset() && offset <= self.end_offset(),
            "offset {offset} outside window {}..={}",
            self.start_offset(),
            self.end_offset()
        );
        (offset - self.trimmed_chars) as usize
    }

    pub fn to_absolute(&self, offset: usize) -> u64 {
        assert!(
            offset <= self.chars.len(),
            "relative offset {offset} past end {}",
            self.chars.len()
        );
        self.trimmed_chars + offset as u64
    }

    pub fn first_line(&self) -> u64 {
        self.trimmed_lines
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    pub fn last_line(&self) -> u64 {
        self.trimmed_lines + self.line_starts.len() as u64 - 1
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn line_text(&self, line: u64) -> Option<String> {
        let relative = self.relative_line(line)?;
        let (start, end) = self.line_bounds(relative);
        Some(self.chars[start..end].iter().collect())
    }

    pub fn cursor_line(&self) -> u64 {
        self.trimmed_lines + self.line_of(self.to_relative(self.cursor_offset)) as u64
    }

    pub fn cursor_column(&self) -> usize {
        let relative = self.to_relative(self.cursor_offset);
        relative - self.line_starts[self.line_of(relative)]
    }

    /// Text on the cursor line before the cursor.
    pub fn text_before_cursor(&self) -> String {
        let relative = self.to_relative(self.cursor_offset);
        let start = self.line_starts[self.line_of(relative)];
        self.chars[start..relative].iter().collect()
    }

    /// True when nothing but whitespace follows the cursor.
    pub fn tail_is_blank(&self) -> bool {
        let relative = self.to_relative(self.cursor_offset);
        self.chars[relative..].iter().all(|ch| ch.is_whitespace())
    }

    /// Number of spaces directly after the cursor on the cursor line.
    pub fn blank_run_after_cursor(&self) -> usize {
        let relative = self.to_relative(self.cursor_offset);
        self.chars[relative..]
            .iter()
            .take_while(|ch| **ch == ' ')
            .count()
    }

    pub fn highlightings(&self) -> Vec<Highlighting> {
        self.highlightings
            .iter()
            .map(|h| {
                Highlighting::new(
                    (h.start - self.trimmed_chars) as usize,
                    (h.end - self.trimmed_chars) as usize,
                    h.style,
                )
            })
            .collect()
    }

    /// Replaces `length` characters at absolute `offset` with `text`.
    /// `highlightings` are relative to `text`.
    pub fn replace_content(
        &mut self,
        offset: u64,
        length: usize,
        text: &str,
        highlightings: &[Highlighting],
        origin: ChangeOrigin,
    ) {
        assert!(
            offset >= self.start_offset() && offset + length as u64 <= self.end_offset(),
            "{}: replace {offset}+{length} outside window {}..={}",
            self.name,
            self.start_offset(),
            self.end_offset()
        );
        let relative = self.to_relative(offset);
        let inserted: Vec<char> = text.chars().collect();
        let event = ChangeEvent {
            kind: ChangeKind::Replace,
            origin,
            offset,
            relative_offset: relative,
            old_length: length,
            new_length: inserted.len(),
            start_line: self.trimmed_lines + self.line_of(relative) as u64,
        };
        for listener in self.listeners.iter_mut() {
            listener.before_change(&event);
        }

        self.chars.splice(relative..relative + length, inserted);
        self.reindex_from(relative);
        self.shift_highlightings(offset, length, event.new_length);
        for h in highlightings {
            assert!(
                h.end <= event.new_length,
                "highlighting {}..{} past inserted text of {}",
                h.start,
                h.end,
                event.new_length
            );
            if !h.is_empty() {
                self.highlightings.push(StoredHighlighting {
                    start: offset + h.start as u64,
                    end: offset + h.end as u64,
                    style: h.style,
                });
            }
        }
        self.highlightings.sort_by_key(|h| (h.start, h.end));
        self.bump_revision(origin);
        self.cursor_offset = self.offset_for(self.cursor);

        trace!(
            target = "shoreline::model",
            model = self.name,
            offset,
            old = length,
            new = event.new_length,
            origin = ?origin,
            "content replaced"
        );
        for listener in self.listeners.iter_mut() {
            listener.after_change(&event);
        }
    }

    /// Moves the cursor to absolute `offset`, clamped into the window.
    pub fn move_cursor(&mut self, offset: u64, origin: ChangeOrigin) {
        let clamped = offset.clamp(self.start_offset(), self.end_offset());
        let relative = self.to_relative(clamped);
        let line = self.line_of(relative);
        self.cursor = CursorAnchor {
            line: self.trimmed_lines + line as u64,
            column: relative - self.line_starts[line],
        };
        self.set_cursor_offset(clamped, origin);
    }

    /// Applies a backend content update: everything from `start_line` to the
    /// end of the buffer is replaced. Missing lines are padded empty.
    pub fn apply_content_update(
        &mut self,
        update: &ContentUpdate,
        origin: ChangeOrigin,
    ) -> Result<(), ModelError> {
        if update.start_line < self.trimmed_lines {
            return Err(ModelError::LineTrimmed {
                line: update.start_line,
                first_retained: self.trimmed_lines,
            });
        }
        let relative_line = (update.start_line - self.trimmed_lines) as usize;
        if relative_line < self.line_count() {
            let start = self.line_starts[relative_line];
            let offset = self.to_absolute(start);
            let length = self.chars.len() - start;
            self.replace_content(offset, length, &update.text, &update.highlightings, origin);
        } else {
            let padding = relative_line - self.line_count() + 1;
            let mut text = "\n".repeat(padding);
            text.push_str(&update.text);
            let shifted: Vec<Highlighting> = update
                .highlightings
                .iter()
                .map(|h| Highlighting::new(h.start + padding, h.end + padding, h.style))
                .collect();
            let end = self.end_offset();
            self.replace_content(end, 0, &text, &shifted, origin);
        }
        self.trim_to_budget();
        Ok(())
    }

    pub fn apply_cursor_update(&mut self, update: CursorUpdate, origin: ChangeOrigin) {
        self.set_anchor(update.into(), origin);
    }

    pub fn set_anchor(&mut self, anchor: CursorAnchor, origin: ChangeOrigin) {
        self.cursor = anchor;
        let offset = self.offset_for(anchor);
        self.set_cursor_offset(offset, origin);
    }

    pub fn restore(&mut self, snapshot: &ScreenSnapshot) {
        let event = ChangeEvent {
            kind: ChangeKind::Restore,
            origin: ChangeOrigin::Backend,
            offset: self.start_offset(),
            relative_offset: 0,
            old_length: self.chars.len(),
            new_length: snapshot.text.chars().count(),
            start_line: self.trimmed_lines,
        };
        for listener in self.listeners.iter_mut() {
            listener.before_change(&event);
        }

        self.chars = snapshot.text.chars().collect();
        self.trimmed_lines = snapshot.trimmed_lines;
        self.trimmed_chars = snapshot.trimmed_chars;
        self.line_starts = vec![0];
        self.reindex_from(0);
        self.highlightings = snapshot
            .highlightings
            .iter()
            .filter(|h| !h.is_empty() && h.end <= event.new_length)
            .map(|h| StoredHighlighting {
                start: self.trimmed_chars + h.start as u64,
                end: self.trimmed_chars + h.end as u64,
                style: h.style,
            })
            .collect();
        self.highlightings.sort_by_key(|h| (h.start, h.end));
        self.cursor = snapshot.cursor.into();
        self.cursor_offset = self.offset_for(self.cursor);
        self.bump_revision(ChangeOrigin::Backend);

        trace!(
            target = "shoreline::model",
            model = self.name,
            chars = self.chars.len(),
            lines = self.line_count(),
            "restored from snapshot"
        );
        for listener in self.listeners.iter_mut() {
            listener.after_change(&event);
        }
        self.trim_to_budget();
    }

    /// Drops every line above `line`. The last line is always kept.
    pub fn trim_before(&mut self, line: u64) {
        let dropped = line.saturating_sub(self.trimmed_lines) as usize;
        let dropped = dropped.min(self.line_count() - 1);
        if dropped > 0 {
            self.drop_leading_lines(dropped);
        }
    }

    /// Runs `edit` with listeners muted, then reports its net effect: at
    /// most one trim, one replace and one cursor move. The replace starts no
    /// later than `dirty_from`, so a region rewritten with identical text is
    /// still reported under `origin`.
    pub fn coalesce<R>(
        &mut self,
        origin: ChangeOrigin,
        dirty_from: u64,
        edit: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let mut listeners = mem::take(&mut self.listeners);
        let old_chars = self.chars.clone();
        let old_start = self.trimmed_chars;
        let old_first_line = self.trimmed_lines;
        let old_cursor = self.cursor_offset;
        let old_revision = self.revision;

        let result = edit(self);
        listeners.append(&mut self.listeners);
        self.listeners = listeners;
        if self.revision == old_revision {
            if self.cursor_offset != old_cursor {
                self.notify_cursor(origin);
            }
            return result;
        }

        let trimmed = self.trimmed_chars.saturating_sub(old_start) as usize;
        if trimmed > 0 {
            let event = ChangeEvent {
                kind: ChangeKind::Trim,
                origin: ChangeOrigin::Backend,
                offset: old_start,
                relative_offset: 0,
                old_length: trimmed,
                new_length: 0,
                start_line: old_first_line,
            };
            self.notify(&event);
        }

        let old_tail = &old_chars[trimmed.min(old_chars.len())..];
        let dirty = dirty_from.saturating_sub(self.trimmed_chars) as usize;
        let common = old_tail
            .iter()
            .zip(self.chars.iter())
            .take_while(|(old, new)| old == new)
            .count()
            .min(dirty);
        let event = ChangeEvent {
            kind: ChangeKind::Replace,
            origin,
            offset: self.trimmed_chars + common as u64,
            relative_offset: common,
            old_length: old_tail.len() - common,
            new_length: self.chars.len() - common,
            start_line: self.trimmed_lines + self.line_of(common) as u64,
        };
        if event.old_length > 0 || event.new_length > 0 {
            self.notify(&event);
        }
        if self.cursor_offset != old_cursor {
            self.notify_cursor(origin);
        }
        result
    }

    fn notify(&mut self, event: &ChangeEvent) {
        for listener in self.listeners.iter_mut() {
            listener.before_change(event);
        }
        for listener in self.listeners.iter_mut() {
            listener.after_change(event);
        }
    }

    fn notify_cursor(&mut self, origin: ChangeOrigin) {
        let offset = self.cursor_offset;
        for listener in self.listeners.iter_mut() {
            listener.cursor_moved(offset, origin);
        }
    }

    pub fn checkpoint_cursor_line(&self) -> TailCheckpoint {
        let relative = self.to_relative(self.cursor_offset);
        let start = self.line_starts[self.line_of(relative)];
        let offset = self.to_absolute(start);
        let end = self.end_offset();
        let highlightings = self
            .highlightings
            .iter()
            .filter(|h| h.end > offset)
            .map(|h| {
                Highlighting::new(
                    (h.start.max(offset) - offset) as usize,
                    (h.end.min(end) - offset) as usize,
                    h.style,
                )
            })
            .collect();
        TailCheckpoint {
            offset,
            text: self.chars[start..].iter().collect(),
            highlightings,
            cursor: self.cursor,
            cursor_offset: self.cursor_offset,
        }
    }

    pub fn rollback_to(&mut self, checkpoint: &TailCheckpoint, origin: ChangeOrigin) {
        let length = (self.end_offset() - checkpoint.offset) as usize;
        self.replace_content(
            checkpoint.offset,
            length,
            &checkpoint.text,
            &checkpoint.highlightings,
            origin,
        );
        self.set_anchor(checkpoint.cursor, origin);
    }

    fn set_cursor_offset(&mut self, offset: u64, origin: ChangeOrigin) {
        debug_assert!(offset >= self.start_offset() && offset <= self.end_offset());
        if self.cursor_offset == offset {
            return;
        }
        self.cursor_offset = offset;
        self.notify_cursor(origin);
    }

    fn bump_revision(&mut self, origin: ChangeOrigin) {
        self.revision += 1;
        if origin == ChangeOrigin::Backend {
            self.backend_revision += 1;
        }
    }

    fn relative_line(&self, line: u64) -> Option<usize> {
        let relative = line.checked_sub(self.trimmed_lines)? as usize;
        (relative < self.line_count()).then_some(relative)
    }

    /// Start and end (exclusive, before the newline) of a relative line.
    fn line_bounds(&self, line: usize) -> (usize, usize) {
        let start = self.line_starts[line];
        let end = match self.line_starts.get(line + 1) {
            Some(next) => next - 1,
            None => self.chars.len(),
        };
        (start, end)
    }

    fn line_of(&self, relative: usize) -> usize {
        self.line_starts.partition_point(|start| *start <= relative) - 1
    }

    fn offset_for(&self, anchor: CursorAnchor) -> u64 {
        if anchor.line < self.trimmed_lines {
            return self.start_offset();
        }
        let line = ((anchor.line - self.trimmed_lines) as usize).min(self.line_count() - 1);
        let (start, end) = self.line_bounds(line);
        self.to_absolute(start + anchor.column.min(end - start))
    }

    fn reindex_from(&mut self, relative: usize) {
        let keep = self.line_of(relative.min(self.chars.len())) + 1;
        self.line_starts.truncate(keep);
        let scan_from = relative.min(self.chars.len());
        for (index, ch) in self.chars.iter().enumerate().skip(scan_from) {
            if *ch == '\n' {
                self.line_starts.push(index + 1);
            }
        }
    }

    fn shift_highlightings(&mut self, offset: u64, removed: usize, inserted: usize) {
        let removed_end = offset + removed as u64;
        let mut shifted = Vec::with_capacity(self.highlightings.len());
        for h in self.highlightings.drain(..) {
            if h.end <= offset {
                shifted.push(h);
                continue;
            }
            if h.start >= removed_end {
                shifted.push(StoredHighlighting {
                    start: h.start - removed as u64 + inserted as u64,
                    end: h.end - removed as u64 + inserted as u64,
                    style: h.style,
                });
                continue;
            }
            if h.start < offset {
                shifted.push(StoredHighlighting {
                    start: h.start,
                    end: offset,
                    style: h.style,
                });
            }
            if h.end > removed_end {
                let tail_start = offset + inserted as u64;
                shifted.push(StoredHighlighting {
                    start: tail_start,
                    end: tail_start + (h.end - removed_end),
                    style: h.style,
                });
            }
        }
        self.highlightings = shifted;
    }

    fn trim_to_budget(&mut self) {
        if self.line_count() > self.max_lines {
            self.drop_leading_lines(self.line_count() - self.max_lines);
        }
    }

    fn drop_leading_lines(&mut self, dropped_lines: usize) {
        let cut = self.line_starts[dropped_lines];
        let event = ChangeEvent {
            kind: ChangeKind::Trim,
            origin: ChangeOrigin::Backend,
            offset: self.start_offset(),
            relative_offset: 0,
            old_length: cut,
            new_length: 0,
            start_line: self.trimmed_lines,
        };
        for listener in self.listeners.iter_mut() {
            listener.before_change(&event);
        }

        self.chars.drain(..cut);
        self.line_starts = self.line_starts[dropped_lines..]
            .iter()
            .map(|start| start - cut)
            .collect();
        self.trimmed_lines += dropped_lines as u64;
        self.trimmed_chars += cut as u64;
        let window_start = self.trimmed_chars;
        self.highlightings.retain(|h| h.end > window_start);
        for h in self.highlightings.iter_mut() {
            h.start = h.start.max(window_start);
        }
        self.bump_revision(ChangeOrigin::Backend);
        self.cursor_offset = self.offset_for(self.cursor);

        trace!(
            target = "shoreline::model",
            model = self.name,
            dropped_lines,
            dropped_chars = cut,
            "trimmed leading lines"
        );
        for listener in self.listeners.iter_mut() {
            listener.after_change(&event);
        }
    }
}
