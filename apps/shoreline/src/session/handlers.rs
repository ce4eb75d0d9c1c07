use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::lifecycle::CommandLifecycle;
use crate::error::HandlerError;
use crate::model::OutputModel;
use crate::protocol::{SessionEvent, ShellIntegrationEvent, TerminalState};

/// Read-only view handed to handlers alongside each forwarded event.
pub struct HandlerContext<'a> {
    pub regular: &'a OutputModel,
    /// Regular-screen cursor as last reported by the backend. Differs from
    /// `regular.cursor_offset()` while type-ahead is on screen.
    pub backend_cursor: u64,
    pub alternate: &'a OutputModel,
    pub state: &'a TerminalState,
}

/// Receives the session events the controller does not interpret itself
/// (hyperlinks, shell-integration milestones), unchanged and in order.
pub trait OutputEventHandler: Send {
    fn name(&self) -> &'static str;

    fn handle(&mut self, event: &SessionEvent, ctx: &HandlerContext<'_>)
    -> Result<(), HandlerError>;
}

/// One prompt/command/output cycle as reported by shell integration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    pub prompt_offset: u64,
    pub command: Option<String>,
    pub output_offset: Option<u64>,
    pub exit_code: Option<i32>,
}

const MAX_BLOCKS: usize = 1_000;

/// Shared, bounded log of blocks.
#[derive(Clone, Debug, Default)]
pub struct BlockLog {
    blocks: Arc<Mutex<VecDeque<Block>>>,
}

impl BlockLog {
    pub fn snapshot(&self) -> Vec<Block> {
        self.blocks.lock().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<Block> {
        self.blocks.lock().back().cloned()
    }

    fn push(&self, block: Block) {
        let mut blocks = self.blocks.lock();
        if blocks.len() == MAX_BLOCKS {
            blocks.pop_front();
        }
        blocks.push_back(block);
    }

    fn update_last(&self, update: impl FnOnce(&mut Block)) -> bool {
        match self.blocks.lock().back_mut() {
            Some(block) => {
                update(block);
                true
            }
            None => false,
        }
    }
}

/// Turns shell-integration milestones into [`Block`]s and command lifecycle
/// signals.
#[derive(Debug)]
pub struct BlockTracker {
    lifecycle: CommandLifecycle,
    log: BlockLog,
}

impl BlockTracker {
    pub fn new(lifecycle: CommandLifecycle) -> Self {
        Self {
            lifecycle,
            log: BlockLog::default(),
        }
    }

    pub fn log(&self) -> BlockLog {
        self.log.clone()
    }
}

impl OutputEventHandler for BlockTracker {
    fn name(&self) -> &'static str {
        "block_tracker"
    }

    fn handle(
        &mut self,
        event: &SessionEvent,
        ctx: &HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        let SessionEvent::ShellIntegration(milestone) = event else {
            return Ok(());
        };
        let offset = ctx.backend_cursor;
        trace!(target = "shoreline::session", ?milestone, offset, "shell milestone");
        match milestone {
            ShellIntegrationEvent::PromptStarted => self.log.push(Block {
                prompt_offset: offset,
                ..Block::default()
            }),
            ShellIntegrationEvent::PromptFinished => {}
            ShellIntegrationEvent::CommandStarted { command } => {
                let command = command.clone();
                let updated = self.log.update_last(|block| {
                    block.command = Some(command);
                    block.output_offset = Some(offset);
                });
                if !updated {
                    return Err(HandlerError::Failed {
                        handler: self.name(),
                        message: "command started before any prompt".into(),
                    });
                }
                self.lifecycle.structured_started();
            }
            ShellIntegrationEvent::CommandFinished { exit_code } => {
                let exit_code = *exit_code;
                self.log.update_last(|block| block.exit_code = Some(exit_code));
                self.lifecycle.structured_finished(exit_code);
            }
        }
        Ok(())
    }
}
