//! The handle a UI holds on to. Everything it does is a message to the
//! session controller task or a submission to the input pipeline.

use std::mem;

use crossterm::event::{KeyEvent, MouseEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::error::{InputError, ViewError};
use crate::input::InputPipeline;
use crate::model::ModelListener;
use crate::session::handlers::{BlockLog, BlockTracker, OutputEventHandler};
use crate::session::lifecycle::{CommandFinished, CommandLifecycle};
use crate::session::{
    BellSink, Command, SessionConnector, SessionController, SessionSetup, ViewSnapshot,
};
use crate::telemetry::{LatencyBatch, LatencyReporter};

pub use crate::session::ScreenView;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    Regular,
    Alternate,
}

pub struct TerminalViewBuilder {
    config: Config,
    lifecycle: CommandLifecycle,
    handlers: Vec<Box<dyn OutputEventHandler>>,
    bell: Option<Box<dyn BellSink>>,
    on_termination: Vec<Box<dyn FnOnce(Option<i32>) + Send>>,
    regular_listeners: Vec<Box<dyn ModelListener>>,
    alternate_listeners: Vec<Box<dyn ModelListener>>,
    latency_reporter: Option<LatencyReporter>,
}

impl TerminalViewBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            lifecycle: CommandLifecycle::new(),
            handlers: Vec::new(),
            bell: None,
            on_termination: Vec::new(),
            regular_listeners: Vec::new(),
            alternate_listeners: Vec::new(),
            latency_reporter: None,
        }
    }

    pub fn handler(mut self, handler: Box<dyn OutputEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn bell(mut self, bell: Box<dyn BellSink>) -> Self {
        self.bell = Some(bell);
        self
    }

    pub fn listener(mut self, screen: Screen, listener: Box<dyn ModelListener>) -> Self {
        match screen {
            Screen::Regular => self.regular_listeners.push(listener),
            Screen::Alternate => self.alternate_listeners.push(listener),
        }
        self
    }

    pub fn on_termination(mut self, callback: impl FnOnce(Option<i32>) + Send + 'static) -> Self {
        self.on_termination.push(Box::new(callback));
        self
    }

    pub fn on_command_finished(
        self,
        callback: impl FnMut(CommandFinished) + Send + 'static,
    ) -> Self {
        self.lifecycle.on_command_finished(Box::new(callback));
        self
    }

    pub fn latency_reporter(mut self, reporter: LatencyReporter) -> Self {
        self.latency_reporter = Some(reporter);
        self
    }

    /// Spawns the session controller and the input drain task. Must be called
    /// from within a tokio runtime.
    pub fn start(self, connector: impl SessionConnector + 'static) -> TerminalView {
        let input = InputPipeline::new(self.config.input.buffer_capacity);
        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = oneshot::channel();

        let mut latency = LatencyBatch::new("input_latency", self.config.input.latency_batch_size);
        if let Some(reporter) = self.latency_reporter {
            latency = latency.with_reporter(reporter);
        }
        let drain = input.spawn_drain(channel_rx, cancel.clone(), latency);

        let block_tracker = BlockTracker::new(self.lifecycle.clone());
        let blocks = block_tracker.log();
        let mut handlers: Vec<Box<dyn OutputEventHandler>> = vec![Box::new(block_tracker)];
        handlers.extend(self.handlers);

        let controller = SessionController::new(SessionSetup {
            config: self.config,
            input: input.clone(),
            lifecycle: self.lifecycle.clone(),
            handlers,
            bell: self.bell,
            on_termination: self.on_termination,
            regular_listeners: self.regular_listeners,
            alternate_listeners: self.alternate_listeners,
        });
        let session = tokio::spawn(controller.handle_events(
            Box::new(connector),
            command_rx,
            channel_tx,
            cancel.clone(),
        ));

        TerminalView {
            commands: command_tx,
            input,
            lifecycle: self.lifecycle,
            blocks,
            cancel,
            tasks: vec![session, drain],
        }
    }
}

pub struct TerminalView {
    commands: mpsc::UnboundedSender<Command>,
    input: InputPipeline,
    lifecycle: CommandLifecycle,
    blocks: BlockLog,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TerminalView {
    pub fn type_text(&self, text: impl Into<String>) -> Result<(), ViewError> {
        self.send(Command::Type(text.into()))
    }

    pub fn press_key(&self, key: KeyEvent) -> Result<(), ViewError> {
        self.send(Command::Key(key))
    }

    pub fn paste(&self, text: impl Into<String>) -> Result<(), ViewError> {
        self.send(Command::Paste(text.into()))
    }

    pub fn mouse(&self, mouse: MouseEvent) -> Result<(), ViewError> {
        self.send(Command::Mouse(mouse))
    }

    pub fn resize(&self, columns: u16, rows: u16) -> Result<(), ViewError> {
        self.send(Command::Resize { columns, rows })
    }

    pub fn clear_buffer(&self) -> Result<(), ViewError> {
        self.send(Command::ClearBuffer)
    }

    pub fn click_hyperlink(&self, id: impl Into<String>) -> Result<(), ViewError> {
        self.send(Command::ClickHyperlink(id.into()))
    }

    pub async fn snapshot(&self) -> Result<ViewSnapshot, ViewError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(reply_tx))
            .map_err(|_| ViewError::Closed)?;
        reply_rx.await.map_err(|_| ViewError::Closed)
    }

    pub fn lifecycle(&self) -> &CommandLifecycle {
        &self.lifecycle
    }

    pub fn blocks(&self) -> &BlockLog {
        &self.blocks
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops dispatch, discards held-back backend events and closes input.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(target = "shoreline::session", "terminal view cancelled");
        }
        self.cancel.cancel();
        self.input.close();
    }

    /// Cancels and waits for the background tasks to finish.
    pub async fn shutdown(mut self) {
        self.cancel();
        for task in mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }

    fn send(&self, command: Command) -> Result<(), ViewError> {
        if self.input.is_closed() {
            return Err(ViewError::Input(InputError::Closed));
        }
        self.commands.send(command).map_err(|_| ViewError::Closed)
    }
}

impl Drop for TerminalView {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
