mod output;

pub use output::{CursorAnchor, OutputModel, TailCheckpoint};

/// Where a mutation came from. Collaborators that must not react to
/// provisional state (persistence, completion triggers) skip `TypeAhead`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeOrigin {
    TypeAhead,
    Backend,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Replace,
    /// Leading lines dropped to keep the buffer within its line budget.
    Trim,
    /// Whole buffer replaced from a snapshot.
    Restore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub origin: ChangeOrigin,
    /// Absolute offset of the first affected character.
    pub offset: u64,
    /// Same position translated through the window at notification time.
    pub relative_offset: usize,
    pub old_length: usize,
    pub new_length: usize,
    /// Absolute logical line containing `offset`.
    pub start_line: u64,
}

/// Read-only observer of an [`OutputModel`]. Every callback runs on the
/// model's owning task, between the bracketing before/after notifications.
pub trait ModelListener: Send {
    fn before_change(&mut self, _event: &ChangeEvent) {}
    fn after_change(&mut self, _event: &ChangeEvent) {}
    fn cursor_moved(&mut self, _offset: u64, _origin: ChangeOrigin) {}
}
