//! Session controller: the single task that owns both screen models.
//!
//! Backend events, local UI commands and timer expiries all arrive at
//! [`SessionController::handle_events`] and are handled one at a time, so no
//! model is ever mutated from two places.

pub mod handlers;
pub mod lifecycle;
pub mod loopback;

use std::future;
use std::panic::{self, AssertUnwindSafe};

use async_trait::async_trait;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, trace, warn};

use self::handlers::{HandlerContext, OutputEventHandler};
use self::lifecycle::CommandLifecycle;
use crate::config::Config;
use crate::controller::{
    ImmediateController, OutputModelController, SpeculativeController, TypeAheadEdit,
};
use crate::error::{ConnectError, DispatchError, HandlerError, InputError};
use crate::input::InputPipeline;
use crate::input::keys::{self, InputModes};
use crate::model::{ModelListener, OutputModel};
use crate::protocol::{InputEvent, ScreenSnapshot, SessionEvent, TerminalState};
use crate::telemetry::logging::hexdump;
use crate::tracker::CommandFinishTracker;

/// Both directions of an attached backend session.
#[derive(Debug)]
pub struct SessionHandle {
    pub events: mpsc::Receiver<SessionEvent>,
    pub input: mpsc::Sender<InputEvent>,
}

#[async_trait]
pub trait SessionConnector: Send {
    async fn connect(self: Box<Self>) -> Result<SessionHandle, ConnectError>;
}

pub trait BellSink: Send {
    fn ring(&mut self);
}

pub type TerminationCallback = Box<dyn FnOnce(Option<i32>) + Send>;

/// Local UI requests, handled on the controller task in arrival order.
#[derive(Debug)]
pub enum Command {
    Type(String),
    Key(KeyEvent),
    Paste(String),
    Mouse(MouseEvent),
    Resize { columns: u16, rows: u16 },
    ClearBuffer,
    ClickHyperlink(String),
    Snapshot(oneshot::Sender<ViewSnapshot>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreenView {
    pub text: String,
    pub cursor_offset: u64,
    pub cursor_line: u64,
    pub cursor_column: usize,
    pub start_offset: u64,
    pub first_line: u64,
}

impl ScreenView {
    fn of(model: &OutputModel) -> Self {
        Self {
            text: model.text(),
            cursor_offset: model.cursor_offset(),
            cursor_line: model.cursor_line(),
            cursor_column: model.cursor_column(),
            start_offset: model.start_offset(),
            first_line: model.first_line(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub regular: ScreenView,
    pub alternate: ScreenView,
    pub state: TerminalState,
    pub predicting: bool,
    pub pending_updates: usize,
    pub terminated: bool,
    pub exit_code: Option<i32>,
}

impl ViewSnapshot {
    pub fn active(&self) -> &ScreenView {
        if self.state.alternate_screen {
            &self.alternate
        } else {
            &self.regular
        }
    }
}

/// Everything the controller is built from.
pub struct SessionSetup {
    pub config: Config,
    pub input: InputPipeline,
    pub lifecycle: CommandLifecycle,
    pub handlers: Vec<Box<dyn OutputEventHandler>>,
    pub bell: Option<Box<dyn BellSink>>,
    pub on_termination: Vec<TerminationCallback>,
    pub regular_listeners: Vec<Box<dyn ModelListener>>,
    pub alternate_listeners: Vec<Box<dyn ModelListener>>,
}

impl SessionSetup {
    pub fn new(config: Config, input: InputPipeline) -> Self {
        Self {
            config,
            input,
            lifecycle: CommandLifecycle::new(),
            handlers: Vec::new(),
            bell: None,
            on_termination: Vec::new(),
            regular_listeners: Vec::new(),
            alternate_listeners: Vec::new(),
        }
    }
}

enum Step {
    Cancelled,
    Connected(Result<SessionHandle, ConnectError>),
    Event(Option<SessionEvent>),
    Command(Option<Command>),
    Deadline,
}

pub struct SessionController {
    config: Config,
    regular: SpeculativeController,
    alternate: ImmediateController,
    state: TerminalState,
    handlers: Vec<Box<dyn OutputEventHandler>>,
    tracker: CommandFinishTracker,
    lifecycle: CommandLifecycle,
    bell: Option<Box<dyn BellSink>>,
    on_termination: Vec<TerminationCallback>,
    input: InputPipeline,
    seen_backend_revision: u64,
    exit: Option<Option<i32>>,
}

impl SessionController {
    pub fn new(setup: SessionSetup) -> Self {
        let SessionSetup {
            config,
            input,
            lifecycle,
            handlers,
            bell,
            on_termination,
            regular_listeners,
            alternate_listeners,
        } = setup;

        let mut regular = OutputModel::new("regular", config.model.max_lines);
        for listener in regular_listeners {
            regular.add_listener(listener);
        }
        let mut alternate = OutputModel::new("alternate", config.model.max_lines);
        for listener in alternate_listeners {
            alternate.add_listener(listener);
        }

        Self {
            regular: SpeculativeController::new(
                regular,
                config.type_ahead.debounce(),
                config.type_ahead.stale_after(),
            ),
            alternate: ImmediateController::new(alternate),
            state: TerminalState::default(),
            handlers,
            tracker: CommandFinishTracker::new(&config.tracker),
            lifecycle,
            bell,
            on_termination,
            input,
            seen_backend_revision: 0,
            exit: None,
            config,
        }
    }

    /// Connects, hands the backend input sender to `input_channel`, then
    /// dispatches events and commands until cancelled or until every command
    /// sender is gone.
    pub async fn handle_events(
        mut self,
        connector: Box<dyn SessionConnector>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        input_channel: oneshot::Sender<mpsc::Sender<InputEvent>>,
        cancel: CancellationToken,
    ) {
        let mut connect = connector.connect();
        let mut connecting = true;
        let mut input_channel = Some(input_channel);
        let mut events: Option<mpsc::Receiver<SessionEvent>> = None;

        loop {
            let deadline = self.next_deadline();
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                result = &mut connect, if connecting => Step::Connected(result),
                event = next_event(&mut events) => Step::Event(event),
                command = commands.recv() => Step::Command(command),
                _ = sleep_until(deadline) => Step::Deadline,
            };

            match step {
                Step::Cancelled => {
                    self.shutdown("cancelled");
                    return;
                }
                Step::Connected(Ok(handle)) => {
                    connecting = false;
                    info!(target = "shoreline::session", "backend session attached");
                    if let Some(channel) = input_channel.take() {
                        let _ = channel.send(handle.input);
                    }
                    events = Some(handle.events);
                }
                Step::Connected(Err(err)) => {
                    connecting = false;
                    warn!(target = "shoreline::session", error = %err, "backend session failed to attach");
                    input_channel = None;
                }
                Step::Event(Some(event)) => {
                    self.dispatch(event, Instant::now());
                    if self.exit.is_some() {
                        events = None;
                    }
                }
                Step::Event(None) => {
                    debug!(target = "shoreline::session", "backend event stream ended");
                    events = None;
                }
                Step::Command(Some(command)) => self.handle_command(command, Instant::now()),
                Step::Command(None) => {
                    self.shutdown("view dropped");
                    return;
                }
                Step::Deadline => self.on_deadline(Instant::now()),
            }
        }
    }

    pub fn regular(&self) -> &OutputModel {
        self.regular.model()
    }

    pub fn alternate(&self) -> &OutputModel {
        self.alternate.model()
    }

    pub fn state(&self) -> &TerminalState {
        &self.state
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            regular: ScreenView::of(self.regular.model()),
            alternate: ScreenView::of(self.alternate.model()),
            state: self.state.clone(),
            predicting: self.regular.is_predicting(),
            pending_updates: self.regular.pending_len(),
            terminated: self.exit.is_some(),
            exit_code: self.exit.flatten(),
        }
    }

    /// Routes one backend event. Failures are logged and never stop the
    /// stream.
    pub fn dispatch(&mut self, event: SessionEvent, now: Instant) {
        if self.exit.is_some() {
            debug!(target = "shoreline::session", kind = event.kind(), "event after termination ignored");
            return;
        }
        let kind = event.kind();
        trace!(target = "shoreline::session", kind, "dispatching event");
        let result: Result<(), DispatchError> = match event {
            SessionEvent::InitialState {
                regular,
                alternate,
                state,
            } => self.restore(&regular, &alternate, state),
            SessionEvent::ContentUpdated(update) => {
                self.active().update_content(update).map_err(Into::into)
            }
            SessionEvent::CursorPositionChanged(update) => {
                self.active().update_cursor(update);
                Ok(())
            }
            SessionEvent::StateChanged(state) => {
                self.set_state(state);
                Ok(())
            }
            SessionEvent::Bell => {
                self.ring();
                Ok(())
            }
            event @ (SessionEvent::HyperlinksChanged { .. } | SessionEvent::ShellIntegration(_)) => {
                self.forward(&event);
                Ok(())
            }
            SessionEvent::Termination { exit_code } => self.terminate(exit_code),
        };
        if let Err(err) = result {
            warn!(target = "shoreline::session", kind, error = %err, "failed to process session event");
        }
        self.note_regular_change(now);
    }

    fn active(&mut self) -> &mut dyn OutputModelController {
        if self.state.alternate_screen {
            &mut self.alternate
        } else {
            &mut self.regular
        }
    }

    fn restore(
        &mut self,
        regular: &ScreenSnapshot,
        alternate: &ScreenSnapshot,
        state: TerminalState,
    ) -> Result<(), DispatchError> {
        self.state = state;
        self.regular.restore(regular);
        self.alternate.restore(alternate);
        debug!(
            target = "shoreline::session",
            regular_chars = regular.text.len(),
            alternate_chars = alternate.text.len(),
            alternate_screen = self.state.alternate_screen,
            "initial state restored"
        );
        let flushed = self.regular.apply_pending_updates();
        self.alternate.apply_pending_updates()?;
        flushed.map_err(Into::into)
    }

    fn set_state(&mut self, state: TerminalState) {
        if state.alternate_screen != self.state.alternate_screen {
            debug!(
                target = "shoreline::session",
                alternate_screen = state.alternate_screen,
                "screen buffer switched"
            );
        }
        self.state = state;
    }

    fn ring(&mut self) {
        if !self.config.bell_enabled {
            trace!(target = "shoreline::session", "bell muted");
            return;
        }
        if let Some(bell) = self.bell.as_mut() {
            bell.ring();
        }
    }

    fn forward(&mut self, event: &SessionEvent) {
        let ctx = HandlerContext {
            regular: self.regular.model(),
            backend_cursor: self.regular.backend_cursor_offset(),
            alternate: self.alternate.model(),
            state: &self.state,
        };
        for handler in self.handlers.iter_mut() {
            let name = handler.name();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event, &ctx)));
            let result = match outcome {
                Ok(result) => result,
                Err(payload) => Err(HandlerError::Panicked {
                    handler: name,
                    message: panic_message(payload.as_ref()),
                }),
            };
            if let Err(err) = result {
                warn!(
                    target = "shoreline::session",
                    handler = name,
                    kind = event.kind(),
                    error = %DispatchError::from(err),
                    "output handler failed"
                );
            }
        }
        if self.lifecycle.has_structured_events() && self.tracker.is_enabled() {
            self.tracker.stand_down();
        }
    }

    fn terminate(&mut self, exit_code: Option<i32>) -> Result<(), DispatchError> {
        let flushed = self.regular.apply_pending_updates();
        self.exit = Some(exit_code);
        info!(target = "shoreline::session", ?exit_code, "session terminated");
        for callback in self.on_termination.drain(..) {
            callback(exit_code);
        }
        flushed.map_err(Into::into)
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.regular.next_deadline(), self.tracker.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn on_deadline(&mut self, now: Instant) {
        if let Err(err) = self.regular.on_deadline(now) {
            warn!(target = "shoreline::typeahead", error = %err, "merged backend update rejected");
        }
        self.note_regular_change(now);
        if self.tracker.on_deadline(self.regular.model(), now) {
            self.lifecycle.heuristic_finished();
        }
    }

    /// Feeds confirmed regular-screen changes to the heuristic tracker.
    fn note_regular_change(&mut self, now: Instant) {
        let revision = self.regular.model().backend_revision();
        if revision == self.seen_backend_revision {
            return;
        }
        self.seen_backend_revision = revision;
        if !self.state.alternate_screen {
            self.tracker.invalidate(self.regular.model());
            self.tracker.on_content_changed(now);
        }
    }

    fn type_ahead_enabled(&self) -> bool {
        self.config.type_ahead.enabled
            && !self.state.alternate_screen
            && !self.lifecycle.command_running()
    }

    fn tracking(&self) -> bool {
        !self.state.alternate_screen
    }

    pub fn handle_command(&mut self, command: Command, now: Instant) {
        match command {
            Command::Type(text) => self.type_text(&text, now),
            Command::Key(key) => self.press_key(key, now),
            Command::Paste(text) => {
                // Pastes are never predicted.
                let bytes = keys::encode_paste(&text, &InputModes::from(&self.state));
                report(self.input.send_bytes(bytes));
            }
            Command::Mouse(mouse) => {
                if let Some(bytes) = keys::encode_mouse(&mouse, &InputModes::from(&self.state)) {
                    report(self.input.send_bytes(bytes));
                }
            }
            Command::Resize { columns, rows } => report(self.input.send_resize(columns, rows)),
            Command::ClearBuffer => report(self.input.send_clear_buffer()),
            Command::ClickHyperlink(id) => report(self.input.send_hyperlink_clicked(id)),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn type_text(&mut self, text: &str, now: Instant) {
        let enabled = self.type_ahead_enabled();
        for segment in text.split_inclusive(['\r', '\n']) {
            let (body, enter) = match segment.strip_suffix(['\r', '\n']) {
                Some(body) => (body, true),
                None => (segment, false),
            };
            if !body.is_empty() {
                if self.tracking() {
                    self.tracker.refresh(self.regular.model());
                }
                self.regular
                    .predict(&TypeAheadEdit::Insert(body.to_string()), enabled, now);
            }
            if enter && self.tracking() {
                self.tracker.on_enter(self.regular.model());
            }
        }
        report(self.input.send_string(text));
    }

    fn press_key(&mut self, key: KeyEvent, now: Instant) {
        if key.kind == KeyEventKind::Release {
            return;
        }
        let Some(bytes) = keys::encode_key(&key, &InputModes::from(&self.state)) else {
            trace!(target = "shoreline::input", ?key, "key has no encoding");
            return;
        };
        if tracing::enabled!(Level::TRACE) {
            trace!(target = "shoreline::input", "key bytes\n{}", hexdump(&bytes));
        }

        let enabled = self.type_ahead_enabled();
        let chord = key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT);
        let edit = match key.code {
            KeyCode::Char(c) if !chord => Some(TypeAheadEdit::Insert(c.to_string())),
            KeyCode::Backspace => Some(TypeAheadEdit::Backspace),
            _ => None,
        };
        if let Some(edit) = edit {
            if self.tracking() {
                self.tracker.refresh(self.regular.model());
            }
            self.regular.predict(&edit, enabled, now);
        }
        if key.code == KeyCode::Enter && self.tracking() {
            self.tracker.on_enter(self.regular.model());
        }
        report(self.input.send_bytes(bytes));
    }

    fn shutdown(&mut self, reason: &'static str) {
        self.regular.abandon();
        self.alternate.abandon();
        self.input.close();
        info!(target = "shoreline::session", reason, "session controller stopped");
    }
}

fn report(result: Result<(), InputError>) {
    if let Err(err) = result {
        warn!(target = "shoreline::input", error = %err, "input rejected");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<SessionEvent>>) -> Option<SessionEvent> {
    match events {
        Some(events) => events.recv().await,
        None => future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ContentUpdate, CursorUpdate, ShellIntegrationEvent};
    use crate::session::handlers::BlockTracker;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn controller() -> SessionController {
        SessionController::new(SessionSetup::new(Config::default(), InputPipeline::new(16)))
    }

    fn content(line: u64, text: &str) -> SessionEvent {
        SessionEvent::ContentUpdated(ContentUpdate::new(line, text))
    }

    fn cursor(line: u64, column: usize) -> SessionEvent {
        SessionEvent::CursorPositionChanged(CursorUpdate { line, column })
    }

    struct Exploding;

    impl OutputEventHandler for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn handle(&mut self, _: &SessionEvent, _: &HandlerContext<'_>) -> Result<(), HandlerError> {
            panic!("handler bug");
        }
    }

    #[derive(Clone, Default)]
    struct Seen(Arc<Mutex<Vec<&'static str>>>);

    impl OutputEventHandler for Seen {
        fn name(&self) -> &'static str {
            "seen"
        }

        fn handle(&mut self, event: &SessionEvent, _: &HandlerContext<'_>) -> Result<(), HandlerError> {
            self.0.lock().push(event.kind());
            Ok(())
        }
    }

    struct CountingBell(Arc<Mutex<usize>>);

    impl BellSink for CountingBell {
        fn ring(&mut self) {
            *self.0.lock() += 1;
        }
    }

    #[test]
    fn events_route_to_the_active_screen() {
        let mut session = controller();
        let now = Instant::now();
        session.dispatch(content(0, "$ "), now);
        session.dispatch(
            SessionEvent::StateChanged(TerminalState {
                alternate_screen: true,
                ..TerminalState::default()
            }),
            now,
        );
        session.dispatch(content(0, "~\n~"), now);
        session.dispatch(cursor(1, 0), now);

        assert_eq!(session.regular().text(), "$ ");
        assert_eq!(session.alternate().text(), "~\n~");
        assert_eq!(session.alternate().cursor_offset(), 2);
        assert!(session.snapshot().state.alternate_screen);
    }

    #[test]
    fn panicking_handler_does_not_stop_dispatch() {
        let seen = Seen::default();
        let mut setup = SessionSetup::new(Config::default(), InputPipeline::new(4));
        setup.handlers.push(Box::new(Exploding));
        setup.handlers.push(Box::new(seen.clone()));
        let mut session = SessionController::new(setup);
        let now = Instant::now();

        session.dispatch(
            SessionEvent::ShellIntegration(ShellIntegrationEvent::PromptStarted),
            now,
        );
        session.dispatch(content(0, "$ "), now);

        assert_eq!(seen.0.lock().as_slice(), &["shell_integration"]);
        assert_eq!(session.regular().text(), "$ ");
    }

    #[test]
    fn blocks_record_backend_offsets_while_predicting() {
        let lifecycle = CommandLifecycle::new();
        let tracker = BlockTracker::new(lifecycle.clone());
        let blocks = tracker.log();
        let mut setup = SessionSetup::new(Config::default(), InputPipeline::new(16));
        setup.lifecycle = lifecycle;
        setup.handlers.push(Box::new(tracker));
        let mut session = SessionController::new(setup);
        let now = Instant::now();

        session.dispatch(content(0, "$ "), now);
        session.dispatch(cursor(0, 2), now);
        session.dispatch(
            SessionEvent::ShellIntegration(ShellIntegrationEvent::PromptStarted),
            now,
        );
        session.handle_command(Command::Type("ls".into()), now);
        assert_eq!(session.regular().cursor_offset(), 4);
        session.dispatch(
            SessionEvent::ShellIntegration(ShellIntegrationEvent::CommandStarted {
                command: "ls".into(),
            }),
            now,
        );

        let block = blocks.last().expect("block");
        assert_eq!(block.prompt_offset, 2);
        assert_eq!(block.output_offset, Some(2));
    }

    #[test]
    fn trimmed_line_update_is_isolated() {
        let mut config = Config::default();
        config.model.max_lines = 2;
        let mut session =
            SessionController::new(SessionSetup::new(config, InputPipeline::new(4)));
        let now = Instant::now();
        session.dispatch(content(0, "a\nb\nc"), now);
        session.dispatch(content(0, "x"), now);
        session.dispatch(content(2, "C"), now);
        assert_eq!(session.regular().text(), "b\nC");
    }

    #[test]
    fn bell_respects_setting() {
        let rings = Arc::new(Mutex::new(0));
        let mut config = Config::default();
        let mut setup = SessionSetup::new(config.clone(), InputPipeline::new(4));
        setup.bell = Some(Box::new(CountingBell(rings.clone())));
        let mut session = SessionController::new(setup);
        session.dispatch(SessionEvent::Bell, Instant::now());
        assert_eq!(*rings.lock(), 1);

        config.bell_enabled = false;
        let mut setup = SessionSetup::new(config, InputPipeline::new(4));
        setup.bell = Some(Box::new(CountingBell(rings.clone())));
        let mut session = SessionController::new(setup);
        session.dispatch(SessionEvent::Bell, Instant::now());
        assert_eq!(*rings.lock(), 1);
    }

    #[test]
    fn termination_fires_once_and_stops_dispatch() {
        let exits = Arc::new(Mutex::new(Vec::new()));
        let sink = exits.clone();
        let mut setup = SessionSetup::new(Config::default(), InputPipeline::new(4));
        setup
            .on_termination
            .push(Box::new(move |code| sink.lock().push(code)));
        let mut session = SessionController::new(setup);
        let now = Instant::now();

        session.dispatch(SessionEvent::Termination { exit_code: Some(3) }, now);
        session.dispatch(SessionEvent::Termination { exit_code: Some(4) }, now);
        session.dispatch(content(0, "late"), now);

        assert_eq!(exits.lock().as_slice(), &[Some(3)]);
        assert_eq!(session.regular().text(), "");
        let snapshot = session.snapshot();
        assert!(snapshot.terminated);
        assert_eq!(snapshot.exit_code, Some(3));
    }

    #[test]
    fn typing_predicts_then_merges_backend_truth() {
        let mut session = controller();
        let start = Instant::now();
        session.dispatch(content(0, "$ "), start);
        session.dispatch(cursor(0, 2), start);

        session.handle_command(Command::Type("ls".into()), start);
        assert_eq!(session.regular().text(), "$ ls");
        assert!(session.snapshot().predicting);

        session.dispatch(content(0, "$ l"), start);
        session.dispatch(content(0, "$ ls"), start);
        session.dispatch(cursor(0, 4), start);
        assert_eq!(session.snapshot().pending_updates, 3);

        session.on_deadline(start + Duration::from_millis(50));
        let snapshot = session.snapshot();
        assert!(!snapshot.predicting);
        assert_eq!(snapshot.regular.text, "$ ls");
        assert_eq!(snapshot.regular.cursor_offset, 4);
    }

    #[test]
    fn no_prediction_on_alternate_screen() {
        let mut session = controller();
        let now = Instant::now();
        session.dispatch(content(0, "$ "), now);
        session.dispatch(cursor(0, 2), now);
        session.dispatch(
            SessionEvent::StateChanged(TerminalState {
                alternate_screen: true,
                ..TerminalState::default()
            }),
            now,
        );
        session.handle_command(Command::Type("j".into()), now);
        assert_eq!(session.regular().text(), "$ ");
        assert!(!session.snapshot().predicting);
    }
}
