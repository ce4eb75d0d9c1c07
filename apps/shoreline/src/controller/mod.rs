//! Strategies standing between backend events and an [`OutputModel`].
//!
//! The controller exclusively owns its model; everything else reads it
//! through [`OutputModelController::model`] or observes it via listeners.

pub mod debounce;
pub mod immediate;
pub mod merge;
pub mod speculative;

use tokio::time::Instant;

use crate::error::ModelError;
use crate::model::OutputModel;
use crate::protocol::{ContentUpdate, CursorUpdate, ScreenSnapshot};

pub use debounce::DebounceTimer;
pub use immediate::ImmediateController;
pub use merge::{MergedUpdates, PendingUpdate};
pub use speculative::{SpeculativeController, TypeAheadEdit};

pub trait OutputModelController: Send {
    fn model(&self) -> &OutputModel;

    fn update_content(&mut self, update: ContentUpdate) -> Result<(), ModelError>;

    fn update_cursor(&mut self, update: CursorUpdate);

    /// Replaces the whole buffer with backend state.
    fn restore(&mut self, snapshot: &ScreenSnapshot);

    /// Applies anything held back. A no-op for controllers that never delay.
    fn apply_pending_updates(&mut self) -> Result<(), ModelError>;

    /// When the controller next needs [`OutputModelController::on_deadline`].
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn on_deadline(&mut self, _now: Instant) -> Result<(), ModelError> {
        Ok(())
    }

    /// Drops held-back state without applying it; used on teardown.
    fn abandon(&mut self) {}

    /// Cursor offset as last reported by the backend, ignoring anything
    /// predicted locally.
    fn backend_cursor_offset(&self) -> u64 {
        self.model().cursor_offset()
    }
}
