//! Wire shapes exchanged with the backend session.
//!
//! Inbound [`SessionEvent`]s arrive already structured (escape-sequence parsing
//! happens on the backend); outbound [`InputEvent`]s are what the input pipeline
//! delivers. Both serialize as tagged JSON so transcripts can be replayed.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub type StyleId = u32;

/// A styled span. Offsets are relative to the text that carries it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlighting {
    pub start: usize,
    pub end: usize,
    pub style: StyleId,
}

impl Highlighting {
    pub fn new(start: usize, end: usize, style: StyleId) -> Self {
        assert!(start <= end, "highlighting start {start} after end {end}");
        Self { start, end, style }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Replaces everything from `start_line` (absolute logical line) to the end of
/// the screen with `text`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUpdate {
    pub start_line: u64,
    pub text: String,
    #[serde(default)]
    pub highlightings: Vec<Highlighting>,
}

impl ContentUpdate {
    pub fn new(start_line: u64, text: impl Into<String>) -> Self {
        Self {
            start_line,
            text: text.into(),
            highlightings: Vec::new(),
        }
    }

    pub fn with_highlightings(mut self, highlightings: Vec<Highlighting>) -> Self {
        self.highlightings = highlightings;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorUpdate {
    pub line: u64,
    pub column: usize,
}

/// Full contents of one screen buffer, sent once on attach.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSnapshot {
    pub text: String,
    #[serde(default)]
    pub highlightings: Vec<Highlighting>,
    /// Logical lines already discarded above `text`.
    #[serde(default)]
    pub trimmed_lines: u64,
    #[serde(default)]
    pub trimmed_chars: u64,
    #[serde(default)]
    pub cursor: CursorUpdate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorShape {
    #[default]
    Block,
    Underline,
    Bar,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseMode {
    #[default]
    None,
    Press,
    PressRelease,
    Drag,
    Motion,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalState {
    pub alternate_screen: bool,
    pub cursor_visible: bool,
    pub cursor_shape: CursorShape,
    pub mouse_mode: MouseMode,
    pub sgr_mouse: bool,
    pub bracketed_paste: bool,
    pub application_cursor_keys: bool,
    pub window_title: Option<String>,
}

impl Default for TerminalState {
    fn default() -> Self {
        Self {
            alternate_screen: false,
            cursor_visible: true,
            cursor_shape: CursorShape::Block,
            mouse_mode: MouseMode::None,
            sgr_mouse: false,
            bracketed_paste: false,
            application_cursor_keys: false,
            window_title: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hyperlink {
    pub id: String,
    pub url: String,
    pub start: u64,
    pub end: u64,
}

/// Milestones reported by shells that have the integration script installed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "milestone", rename_all = "snake_case")]
pub enum ShellIntegrationEvent {
    PromptStarted,
    PromptFinished,
    CommandStarted { command: String },
    CommandFinished { exit_code: i32 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    InitialState {
        regular: ScreenSnapshot,
        alternate: ScreenSnapshot,
        #[serde(default)]
        state: TerminalState,
    },
    ContentUpdated(ContentUpdate),
    CursorPositionChanged(CursorUpdate),
    StateChanged(TerminalState),
    Bell,
    HyperlinksChanged {
        alternate: bool,
        hyperlinks: Vec<Hyperlink>,
    },
    ShellIntegration(ShellIntegrationEvent),
    Termination {
        #[serde(default)]
        exit_code: Option<i32>,
    },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::InitialState { .. } => "initial_state",
            SessionEvent::ContentUpdated(_) => "content_updated",
            SessionEvent::CursorPositionChanged(_) => "cursor_position_changed",
            SessionEvent::StateChanged(_) => "state_changed",
            SessionEvent::Bell => "bell",
            SessionEvent::HyperlinksChanged { .. } => "hyperlinks_changed",
            SessionEvent::ShellIntegration(_) => "shell_integration",
            SessionEvent::Termination { .. } => "termination",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    WriteBytes { data: Bytes },
    Resize { columns: u16, rows: u16 },
    ClearBuffer,
    HyperlinkClicked { id: String },
}

impl InputEvent {
    pub fn is_resize(&self) -> bool {
        matches!(self, InputEvent::Resize { .. })
    }
}
