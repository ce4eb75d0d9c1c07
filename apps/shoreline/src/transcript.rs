//! JSON-lines transcripts of backend events and local input, replayed through
//! a loopback session.
//!
//! ```text
//! {"action":"backend","event":{"type":"content_updated","start_line":0,"text":"$ "}}
//! {"action":"type","text":"ls","delay_ms":5}
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::error::ViewError;
use crate::protocol::{InputEvent, SessionEvent};
use crate::session::ViewSnapshot;
use crate::session::loopback::loopback;
use crate::view::TerminalViewBuilder;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Backend { event: SessionEvent },
    Type { text: String },
    Paste { text: String },
    Resize { columns: u16, rows: u16 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Pause before this step.
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error(transparent)]
    View(#[from] ViewError),
}

/// Final state of a replay plus everything the backend received.
#[derive(Clone, Debug)]
pub struct ReplayOutcome {
    pub snapshot: ViewSnapshot,
    pub input: Vec<InputEvent>,
}

/// Blank lines and lines starting with `#` are skipped.
pub fn parse(raw: &str) -> Result<Vec<Step>, TranscriptError> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| TranscriptError::Parse {
                line: index + 1,
                source,
            })
        })
        .collect()
}

pub async fn replay(steps: Vec<Step>, config: Config) -> Result<ReplayOutcome, TranscriptError> {
    // Long enough for every debounce window to close after the last step.
    let settle = config.type_ahead.stale_after() + config.tracker.debounce() * 2;
    let (connector, mut backend) = loopback(steps.len().max(1));
    let view = TerminalViewBuilder::new(config).start(connector);

    for (index, step) in steps.into_iter().enumerate() {
        if step.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
        }
        debug!(target = "shoreline::session", index, action = ?step.action, "replay step");
        match step.action {
            Action::Backend { event } => {
                if !backend.emit(event).await {
                    debug!(target = "shoreline::session", index, "session stream closed; event skipped");
                }
            }
            Action::Type { text } => view.type_text(text)?,
            Action::Paste { text } => view.paste(text)?,
            Action::Resize { columns, rows } => view.resize(columns, rows)?,
        }
    }

    tokio::time::sleep(settle).await;
    let snapshot = view.snapshot().await?;
    view.shutdown().await;

    let mut input = Vec::new();
    while let Ok(event) = backend.input.try_recv() {
        input.push(event);
    }
    Ok(ReplayOutcome { snapshot, input })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps_and_reports_bad_lines() {
        let steps = parse(
            r#"
            # prompt
            {"action":"backend","event":{"type":"content_updated","start_line":0,"text":"$ "}}
            {"action":"type","text":"ls","delay_ms":5}
            "#,
        )
        .expect("parse");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].delay_ms, 5);
        assert_eq!(steps[1].action, Action::Type { text: "ls".into() });

        let err = parse("{\"action\":\"type\"}\n").expect_err("missing text");
        assert!(matches!(err, TranscriptError::Parse { line: 1, .. }));
    }
}
