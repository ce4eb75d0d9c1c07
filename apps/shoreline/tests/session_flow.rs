use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shoreline_core::config::Config;
use shoreline_core::error::{InputError, ViewError};
use shoreline_core::model::{ChangeEvent, ChangeKind, ChangeOrigin, ModelListener};
use shoreline_core::protocol::{
    ContentUpdate, CursorUpdate, InputEvent, SessionEvent, ShellIntegrationEvent,
};
use shoreline_core::session::lifecycle::CommandFinished;
use shoreline_core::session::loopback::{LoopbackBackend, loopback};
use shoreline_core::view::{Screen, TerminalView, TerminalViewBuilder};

fn content(line: u64, text: &str) -> SessionEvent {
    SessionEvent::ContentUpdated(ContentUpdate::new(line, text))
}

fn cursor(line: u64, column: usize) -> SessionEvent {
    SessionEvent::CursorPositionChanged(CursorUpdate { line, column })
}

fn shell(event: ShellIntegrationEvent) -> SessionEvent {
    SessionEvent::ShellIntegration(event)
}

fn start(builder: TerminalViewBuilder) -> (TerminalView, LoopbackBackend) {
    let (connector, backend) = loopback(64);
    (builder.start(connector), backend)
}

/// Paints `$ ` with the cursor after it and waits until the view shows it.
async fn show_prompt(view: &TerminalView, backend: &LoopbackBackend) {
    assert!(backend.emit(content(0, "$ ")).await);
    assert!(backend.emit(cursor(0, 2)).await);
    let snapshot = view.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.regular.text, "$ ");
    assert_eq!(snapshot.regular.cursor_offset, 2);
}

fn written(input: &[InputEvent]) -> String {
    input
        .iter()
        .filter_map(|event| match event {
            InputEvent::WriteBytes { data } => Some(String::from_utf8_lossy(data).into_owned()),
            _ => None,
        })
        .collect()
}

fn drain_input(backend: &mut LoopbackBackend) -> Vec<InputEvent> {
    let mut input = Vec::new();
    while let Ok(event) = backend.input.try_recv() {
        input.push(event);
    }
    input
}

#[test_timeout::tokio_timeout_test(paused)]
async fn shell_correction_inside_window_lands_without_flicker() {
    let config = Config::default();
    let window = config.type_ahead.debounce();
    let (view, mut backend) = start(TerminalViewBuilder::new(config));
    show_prompt(&view, &backend).await;

    view.type_text("ls").expect("type");
    let typed = view.snapshot().await.expect("snapshot");
    assert_eq!(typed.regular.text, "$ ls");
    assert_eq!(typed.regular.cursor_offset, 4);
    assert!(typed.predicting);

    assert!(backend.emit(content(0, "$ ls")).await);
    assert!(backend.emit(content(0, "$ ls -la")).await);
    assert!(backend.emit(cursor(0, 8)).await);
    let held = view.snapshot().await.expect("snapshot");
    assert_eq!(held.regular.text, "$ ls");
    assert_eq!(held.pending_updates, 3);

    tokio::time::sleep(window * 2).await;
    let merged = view.snapshot().await.expect("snapshot");
    assert!(!merged.predicting);
    assert_eq!(merged.regular.text, "$ ls -la");
    assert_eq!(merged.regular.cursor_offset, 8);

    view.shutdown().await;
    assert_eq!(written(&drain_input(&mut backend)), "ls");
}

#[test_timeout::tokio_timeout_test(paused)]
async fn unconfirmed_prediction_is_withdrawn() {
    let config = Config::default();
    let stale_after = config.type_ahead.stale_after();
    let window = config.type_ahead.debounce();
    let (view, backend) = start(TerminalViewBuilder::new(config));
    show_prompt(&view, &backend).await;

    view.type_text("secret").expect("type");
    tokio::time::sleep(window * 2).await;
    let still = view.snapshot().await.expect("snapshot");
    assert!(still.predicting, "kept on screen until the stale timeout");
    assert_eq!(still.regular.text, "$ secret");

    tokio::time::sleep(stale_after).await;
    let withdrawn = view.snapshot().await.expect("snapshot");
    assert!(!withdrawn.predicting);
    assert_eq!(withdrawn.regular.text, "$ ");
    assert_eq!(withdrawn.regular.cursor_offset, 2);
    view.shutdown().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn cancel_discards_held_events_and_closes_input() {
    let (view, backend) = start(TerminalViewBuilder::new(Config::default()));
    show_prompt(&view, &backend).await;

    view.type_text("l").expect("type");
    view.snapshot().await.expect("snapshot");
    assert!(backend.emit(content(0, "$ l")).await);
    assert_eq!(view.snapshot().await.expect("snapshot").pending_updates, 1);

    view.cancel();
    assert!(view.is_cancelled());
    assert!(matches!(
        view.type_text("s"),
        Err(ViewError::Input(InputError::Closed))
    ));
    assert!(matches!(view.snapshot().await, Err(ViewError::Closed)));
}

#[test_timeout::tokio_timeout_test(paused)]
async fn heuristic_reports_finish_when_prompt_returns() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let sink = finished.clone();
    let builder = TerminalViewBuilder::new(Config::default())
        .on_command_finished(move |event| sink.lock().push(event));
    let (view, backend) = start(builder);
    show_prompt(&view, &backend).await;

    view.type_text("ls\r").expect("type");
    assert!(view.snapshot().await.expect("snapshot").predicting);
    assert!(backend.emit(content(0, "$ ls\nnotes.txt\n$ ")).await);
    assert!(backend.emit(cursor(2, 2)).await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let snapshot = view.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.regular.text, "$ ls\nnotes.txt\n$ ");
    assert_eq!(
        finished.lock().as_slice(),
        &[CommandFinished { exit_code: None }]
    );

    // Output that does not bring the prompt back does not fire again.
    assert!(backend.emit(content(3, "")).await);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(view.lifecycle().finished_count(), 1);
    view.shutdown().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn shell_integration_drives_lifecycle_and_gates_type_ahead() {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let sink = finished.clone();
    let builder = TerminalViewBuilder::new(Config::default())
        .on_command_finished(move |event| sink.lock().push(event));
    let (view, backend) = start(builder);

    assert!(backend.emit(shell(ShellIntegrationEvent::PromptStarted)).await);
    show_prompt(&view, &backend).await;
    assert!(
        backend
            .emit(shell(ShellIntegrationEvent::CommandStarted {
                command: "sleep 5".into(),
            }))
            .await
    );
    assert!(backend.emit(content(0, "$ sleep 5\n")).await);
    assert!(backend.emit(cursor(1, 0)).await);
    view.snapshot().await.expect("snapshot");
    assert!(view.lifecycle().command_running());

    view.type_text("q").expect("type");
    let running = view.snapshot().await.expect("snapshot");
    assert!(!running.predicting, "no type-ahead while a command runs");
    assert_eq!(running.regular.text, "$ sleep 5\n");

    assert!(
        backend
            .emit(shell(ShellIntegrationEvent::CommandFinished { exit_code: 0 }))
            .await
    );
    assert!(backend.emit(content(1, "$ ")).await);
    assert!(backend.emit(cursor(1, 2)).await);
    view.snapshot().await.expect("snapshot");
    assert_eq!(
        finished.lock().as_slice(),
        &[CommandFinished { exit_code: Some(0) }]
    );
    let block = view.blocks().last().expect("block");
    assert_eq!(block.command.as_deref(), Some("sleep 5"));
    assert_eq!(block.exit_code, Some(0));

    view.type_text("l").expect("type");
    assert!(view.snapshot().await.expect("snapshot").predicting);

    // The heuristic stays quiet once the shell reports commands itself.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(view.lifecycle().finished_count(), 1);
    view.shutdown().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn termination_flushes_and_notifies_once() {
    let exits = Arc::new(Mutex::new(Vec::new()));
    let sink = exits.clone();
    let builder = TerminalViewBuilder::new(Config::default())
        .on_termination(move |code| sink.lock().push(code));
    let (view, backend) = start(builder);
    show_prompt(&view, &backend).await;

    view.type_text("exit").expect("type");
    view.snapshot().await.expect("snapshot");
    assert!(backend.emit(content(0, "$ exit")).await);
    assert!(backend.emit(cursor(0, 6)).await);
    assert!(backend.emit(SessionEvent::Termination { exit_code: Some(0) }).await);

    let snapshot = view.snapshot().await.expect("snapshot");
    assert!(snapshot.terminated);
    assert_eq!(snapshot.exit_code, Some(0));
    assert!(!snapshot.predicting);
    assert_eq!(snapshot.regular.text, "$ exit");
    assert_eq!(exits.lock().as_slice(), &[Some(0)]);
    view.shutdown().await;
}

#[derive(Clone, Default)]
struct Origins(Arc<Mutex<Vec<ChangeOrigin>>>);

impl ModelListener for Origins {
    fn after_change(&mut self, event: &ChangeEvent) {
        self.0.lock().push(event.origin);
    }
}

#[test_timeout::tokio_timeout_test(paused)]
async fn listeners_can_tell_predictions_from_backend_changes() {
    let config = Config::default();
    let window = config.type_ahead.debounce();
    let origins = Origins::default();
    let builder =
        TerminalViewBuilder::new(config).listener(Screen::Regular, Box::new(origins.clone()));
    let (view, backend) = start(builder);
    show_prompt(&view, &backend).await;
    origins.0.lock().clear();

    view.type_text("x").expect("type");
    view.snapshot().await.expect("snapshot");
    assert_eq!(origins.0.lock().as_slice(), &[ChangeOrigin::TypeAhead]);

    assert!(backend.emit(content(0, "$ x")).await);
    tokio::time::sleep(window * 2).await;
    view.snapshot().await.expect("snapshot");
    let seen = origins.0.lock().clone();
    assert_eq!(seen.last(), Some(&ChangeOrigin::Backend));
    view.shutdown().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn echo_missing_the_first_window_lands_one_window_later() {
    let config = Config::default();
    let window = config.type_ahead.debounce();
    let stale_after = config.type_ahead.stale_after();
    assert!(window * 4 < stale_after);
    let (view, backend) = start(TerminalViewBuilder::new(config));
    show_prompt(&view, &backend).await;

    view.type_text("l").expect("type");
    view.snapshot().await.expect("snapshot");
    tokio::time::sleep(window + window / 2).await;
    assert!(view.snapshot().await.expect("snapshot").predicting);

    assert!(backend.emit(content(0, "$ l -- corrected")).await);
    assert!(backend.emit(cursor(0, 16)).await);
    let held = view.snapshot().await.expect("snapshot");
    assert!(held.predicting);
    assert_eq!(held.pending_updates, 2);

    tokio::time::sleep(window * 2).await;
    let merged = view.snapshot().await.expect("snapshot");
    assert!(!merged.predicting);
    assert_eq!(merged.regular.text, "$ l -- corrected");
    assert_eq!(merged.regular.cursor_offset, 16);
    view.shutdown().await;
}

#[test_timeout::tokio_timeout_test(paused)]
async fn trimming_inside_a_window_matches_unbuffered_order() {
    let mut config = Config::default();
    config.model.max_lines = 3;
    let window = config.type_ahead.debounce();
    let (view, backend) = start(TerminalViewBuilder::new(config));
    show_prompt(&view, &backend).await;

    view.type_text("x").expect("type");
    view.snapshot().await.expect("snapshot");
    assert!(backend.emit(content(0, "a\nb\nc\n$ ")).await);
    // Line 0 is gone once the update above lands, so this one is refused.
    assert!(backend.emit(content(0, "Q")).await);
    assert!(backend.emit(cursor(3, 2)).await);
    assert_eq!(view.snapshot().await.expect("snapshot").pending_updates, 3);

    tokio::time::sleep(window * 2).await;
    let merged = view.snapshot().await.expect("snapshot");
    assert!(!merged.predicting);
    assert_eq!(merged.regular.text, "b\nc\n$ ");
    assert_eq!(merged.regular.first_line, 1);
    assert_eq!(merged.regular.cursor_offset, 8);
    view.shutdown().await;
}

#[derive(Clone, Default)]
struct Changes(Arc<Mutex<Vec<ChangeEvent>>>);

impl ModelListener for Changes {
    fn after_change(&mut self, event: &ChangeEvent) {
        self.0.lock().push(*event);
    }
}

#[test_timeout::tokio_timeout_test(paused)]
async fn window_close_reaches_listeners_as_one_change() {
    let config = Config::default();
    let window = config.type_ahead.debounce();
    let changes = Changes::default();
    let builder =
        TerminalViewBuilder::new(config).listener(Screen::Regular, Box::new(changes.clone()));
    let (view, backend) = start(builder);
    show_prompt(&view, &backend).await;

    view.type_text("ls").expect("type");
    view.snapshot().await.expect("snapshot");
    assert!(backend.emit(content(0, "$ ls")).await);
    assert!(backend.emit(content(0, "$ ls -la")).await);
    assert!(backend.emit(cursor(0, 8)).await);
    view.snapshot().await.expect("snapshot");
    changes.0.lock().clear();

    tokio::time::sleep(window * 2).await;
    assert_eq!(view.snapshot().await.expect("snapshot").regular.text, "$ ls -la");
    let seen = changes.0.lock().clone();
    assert_eq!(seen.len(), 1, "{seen:?}");
    assert_eq!(seen[0].kind, ChangeKind::Replace);
    assert_eq!(seen[0].origin, ChangeOrigin::Backend);
    assert_eq!(seen[0].old_length, 4);
    assert_eq!(seen[0].new_length, 8);
    view.shutdown().await;
}

