use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Passed to command-finished callbacks. The exit code is only known when the
/// shell reported it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandFinished {
    pub exit_code: Option<i32>,
}

pub type CommandFinishedCallback = Box<dyn FnMut(CommandFinished) + Send>;

#[derive(Default)]
struct Inner {
    callbacks: Vec<CommandFinishedCallback>,
    /// The shell has sent structured command milestones at least once.
    structured: bool,
    running: bool,
    fired: u64,
}

/// Single source of "a shell command finished", fed by shell-integration
/// milestones when the shell sends them and by the heuristic tracker when it
/// does not. Clones share state.
#[derive(Clone, Default)]
pub struct CommandLifecycle {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for CommandLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CommandLifecycle")
            .field("callbacks", &inner.callbacks.len())
            .field("structured", &inner.structured)
            .field("running", &inner.running)
            .field("fired", &inner.fired)
            .finish()
    }
}

impl CommandLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_command_finished(&self, callback: CommandFinishedCallback) {
        self.inner.lock().callbacks.push(callback);
    }

    pub fn has_structured_events(&self) -> bool {
        self.inner.lock().structured
    }

    /// A command reported by the shell is running. Always false for shells
    /// without integration.
    pub fn command_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn finished_count(&self) -> u64 {
        self.inner.lock().fired
    }

    pub fn structured_started(&self) {
        let mut inner = self.inner.lock();
        inner.structured = true;
        inner.running = true;
    }

    pub fn structured_finished(&self, exit_code: i32) {
        {
            let mut inner = self.inner.lock();
            inner.structured = true;
            if !inner.running {
                debug!(target = "shoreline::session", exit_code, "finish without start; ignored");
                return;
            }
            inner.running = false;
        }
        self.fire(
            "shell_integration",
            CommandFinished {
                exit_code: Some(exit_code),
            },
        );
    }

    /// Ignored once the shell has shown it reports commands itself.
    pub fn heuristic_finished(&self) {
        if self.has_structured_events() {
            return;
        }
        self.fire("heuristic", CommandFinished { exit_code: None });
    }

    fn fire(&self, source: &'static str, event: CommandFinished) {
        // Callbacks run unlocked so they may register further callbacks.
        let mut callbacks = {
            let mut inner = self.inner.lock();
            inner.fired += 1;
            mem::take(&mut inner.callbacks)
        };
        debug!(
            target = "shoreline::session",
            source,
            exit_code = ?event.exit_code,
            callbacks = callbacks.len(),
            "command finished"
        );
        for callback in callbacks.iter_mut() {
            callback(event);
        }
        let mut inner = self.inner.lock();
        callbacks.append(&mut inner.callbacks);
        inner.callbacks = callbacks;
    }
}
