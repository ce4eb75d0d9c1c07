//! In-process backend used by transcript replay and tests.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{SessionConnector, SessionHandle};
use crate::error::ConnectError;
use crate::protocol::{InputEvent, SessionEvent};

/// The backend half: push session events in, read input events out.
#[derive(Debug)]
pub struct LoopbackBackend {
    pub events: mpsc::Sender<SessionEvent>,
    pub input: mpsc::Receiver<InputEvent>,
}

impl LoopbackBackend {
    pub async fn emit(&self, event: SessionEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

/// Connects once the paired [`LoopbackGate`] is opened, or immediately when
/// built with [`loopback`].
pub struct LoopbackConnector {
    handle: SessionHandle,
    gate: Option<oneshot::Receiver<()>>,
}

pub struct LoopbackGate(oneshot::Sender<()>);

impl LoopbackGate {
    pub fn open(self) {
        let _ = self.0.send(());
    }
}

fn channels(capacity: usize) -> (SessionHandle, LoopbackBackend) {
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let (input_tx, input_rx) = mpsc::channel(capacity);
    (
        SessionHandle {
            events: event_rx,
            input: input_tx,
        },
        LoopbackBackend {
            events: event_tx,
            input: input_rx,
        },
    )
}

pub fn loopback(capacity: usize) -> (LoopbackConnector, LoopbackBackend) {
    let (handle, backend) = channels(capacity);
    (LoopbackConnector { handle, gate: None }, backend)
}

/// Like [`loopback`], but `connect` waits until the gate opens.
pub fn gated_loopback(capacity: usize) -> (LoopbackConnector, LoopbackBackend, LoopbackGate) {
    let (handle, backend) = channels(capacity);
    let (gate_tx, gate_rx) = oneshot::channel();
    (
        LoopbackConnector {
            handle,
            gate: Some(gate_rx),
        },
        backend,
        LoopbackGate(gate_tx),
    )
}

#[async_trait]
impl SessionConnector for LoopbackConnector {
    async fn connect(self: Box<Self>) -> Result<SessionHandle, ConnectError> {
        let LoopbackConnector { handle, gate } = *self;
        if let Some(gate) = gate {
            gate.await
                .map_err(|_| ConnectError::Unavailable("loopback gate dropped".into()))?;
        }
        Ok(handle)
    }
}
