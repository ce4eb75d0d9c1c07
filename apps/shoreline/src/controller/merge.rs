use std::collections::HashMap;

use crate::error::ModelError;
use crate::model::{ChangeOrigin, OutputModel};
use crate::protocol::{ContentUpdate, CursorUpdate};

/// A backend event held back while local predictions are on screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingUpdate {
    Content(ContentUpdate),
    Cursor(CursorUpdate),
}

/// Result of collapsing a pending sequence: what to apply, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergedUpdates {
    pub content: Vec<ContentUpdate>,
    pub cursor: Option<CursorUpdate>,
    /// First line the buffer keeps once the whole sequence has applied.
    pub trim_before: Option<u64>,
    /// First update the buffer would have refused because its line was
    /// already trimmed by an earlier one.
    pub rejected: Option<ModelError>,
}

impl MergedUpdates {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.cursor.is_none()
    }

    /// Applies the collapsed sequence. The end state matches applying every
    /// pending update one by one, refused ones included.
    pub fn apply_to(
        &self,
        model: &mut OutputModel,
        origin: ChangeOrigin,
    ) -> Result<(), ModelError> {
        let mut first_error = self.rejected.clone();
        for update in &self.content {
            if let Err(err) = model.apply_content_update(update, origin) {
                first_error.get_or_insert(err);
            }
        }
        if let Some(line) = self.trim_before {
            model.trim_before(line);
        }
        if let Some(cursor) = self.cursor {
            model.apply_cursor_update(cursor, origin);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Keeps the last content update per line, in the arrival order of the kept
/// updates, and the last cursor update.
///
/// Every content update replaces its line through the end of the buffer, so
/// an update is redundant once a later one targets the same line. Line
/// trimming is replayed against `first_line` and `max_lines`: updates aimed
/// at lines an earlier update pushed out are refused, and the trim a dropped
/// update caused is kept in `trim_before`.
pub fn merge(pending: Vec<PendingUpdate>, first_line: u64, max_lines: usize) -> MergedUpdates {
    let mut watermark = first_line;
    let mut rejected = None;
    let mut accepted = Vec::with_capacity(pending.len());
    let mut cursor = None;
    for update in pending {
        match update {
            PendingUpdate::Content(content) if content.start_line < watermark => {
                rejected.get_or_insert(ModelError::LineTrimmed {
                    line: content.start_line,
                    first_retained: watermark,
                });
            }
            PendingUpdate::Content(content) => {
                let last_line = content.start_line + content.text.matches('\n').count() as u64;
                watermark = watermark.max((last_line + 1).saturating_sub(max_lines as u64));
                accepted.push(content);
            }
            PendingUpdate::Cursor(update) => cursor = Some(update),
        }
    }

    let last_for_line: HashMap<u64, usize> = accepted
        .iter()
        .enumerate()
        .map(|(index, content)| (content.start_line, index))
        .collect();
    let content = accepted
        .into_iter()
        .enumerate()
        .filter(|(index, content)| last_for_line.get(&content.start_line) == Some(index))
        .map(|(_, content)| content)
        .collect();

    MergedUpdates {
        content,
        cursor,
        trim_before: (watermark > first_line).then_some(watermark),
        rejected,
    }
}
