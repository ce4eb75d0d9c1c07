//! Outbound input pipeline.
//!
//! Submissions land in a bounded drop-oldest buffer and never block the
//! caller. A drain task waits until the backend channel exists, then
//! forwards events in submission order.

mod buffer;
pub mod keys;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub use buffer::{BufferStats, DropOldestBuffer};

use crate::error::InputError;
use crate::protocol::InputEvent;
use crate::telemetry::{self, LatencyBatch, Metric};

#[derive(Debug)]
struct Submission {
    event: InputEvent,
    submitted_at: Instant,
}

#[derive(Debug)]
struct PipelineState {
    buffer: DropOldestBuffer<Submission>,
    connected: bool,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PipelineState>,
    wake: Notify,
}

/// Cheap to clone; all clones feed the same buffer.
#[derive(Clone, Debug)]
pub struct InputPipeline {
    shared: Arc<Shared>,
}

impl InputPipeline {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PipelineState {
                    buffer: DropOldestBuffer::new(capacity),
                    connected: false,
                    closed: false,
                }),
                wake: Notify::new(),
            }),
        }
    }

    pub fn send_bytes(&self, data: impl Into<Bytes>) -> Result<(), InputError> {
        self.submit(InputEvent::WriteBytes { data: data.into() })
    }

    pub fn send_string(&self, text: &str) -> Result<(), InputError> {
        self.send_bytes(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Dropped silently while the backend channel does not exist yet; the
    /// session is sized on handshake.
    pub fn send_resize(&self, columns: u16, rows: u16) -> Result<(), InputError> {
        self.submit(InputEvent::Resize { columns, rows })
    }

    pub fn send_clear_buffer(&self) -> Result<(), InputError> {
        self.submit(InputEvent::ClearBuffer)
    }

    pub fn send_hyperlink_clicked(&self, id: impl Into<String>) -> Result<(), InputError> {
        self.submit(InputEvent::HyperlinkClicked { id: id.into() })
    }

    pub fn submit(&self, event: InputEvent) -> Result<(), InputError> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(InputError::Closed);
            }
            if event.is_resize() && !state.connected {
                debug!(target = "shoreline::input", ?event, "resize before backend channel; dropped");
                return Ok(());
            }
            if let Some(evicted) = state.buffer.push(Submission {
                event,
                submitted_at: Instant::now(),
            }) {
                warn!(
                    target = "shoreline::input",
                    dropped = ?evicted.event,
                    total_dropped = state.buffer.stats().dropped,
                    "input buffer full; dropped oldest"
                );
            }
            telemetry::record(Metric::InputQueueDepth, state.buffer.len() as u64);
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn stats(&self) -> BufferStats {
        self.shared.state.lock().buffer.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Closes the pipeline and discards anything not yet delivered. Further
    /// submissions fail with [`InputError::Closed`].
    pub fn close(&self) {
        let discarded = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.buffer.clear()
        };
        debug!(target = "shoreline::input", discarded, "input pipeline closed");
        self.shared.wake.notify_one();
    }

    /// Spawns the drain task. It waits for `channel` to deliver the backend
    /// sender, then forwards every submission in order until cancelled.
    pub fn spawn_drain(
        &self,
        channel: oneshot::Receiver<mpsc::Sender<InputEvent>>,
        cancel: CancellationToken,
        latency: LatencyBatch,
    ) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.drain(channel, cancel.clone(), latency).await;
            pipeline.close();
        })
    }

    async fn drain(
        &self,
        channel: oneshot::Receiver<mpsc::Sender<InputEvent>>,
        cancel: CancellationToken,
        mut latency: LatencyBatch,
    ) {
        let sender = tokio::select! {
            _ = cancel.cancelled() => return,
            sender = channel => match sender {
                Ok(sender) => sender,
                Err(_) => {
                    warn!(target = "shoreline::input", "backend channel never arrived");
                    return;
                }
            },
        };
        {
            let mut state = self.shared.state.lock();
            state.connected = true;
            debug!(
                target = "shoreline::input",
                queued = state.buffer.len(),
                "backend channel ready"
            );
        }

        loop {
            let next = {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return;
                }
                state.buffer.pop()
            };
            let Some(submission) = next else {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = self.shared.wake.notified() => {}
                }
                continue;
            };

            latency.record(submission.submitted_at.elapsed());
            trace!(target = "shoreline::input", event = ?submission.event, "forwarding input");
            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = sender.send(submission.event) => {
                    if sent.is_err() {
                        warn!(target = "shoreline::input", "backend input channel closed");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn text(event: &InputEvent) -> String {
        match event {
            InputEvent::WriteBytes { data } => String::from_utf8_lossy(data).into_owned(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn overflow_before_connect_keeps_newest() {
        let pipeline = InputPipeline::new(3);
        for s in ["a", "b", "c", "d"] {
            pipeline.send_string(s).expect("send");
        }
        assert_eq!(pipeline.stats().dropped, 1);

        let (channel_tx, channel_rx) = oneshot::channel();
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = pipeline.spawn_drain(channel_rx, cancel.clone(), LatencyBatch::new("test", 10));
        channel_tx.send(tx).expect("hand over channel");

        let mut delivered = Vec::new();
        for _ in 0..3 {
            delivered.push(text(&rx.recv().await.expect("event")));
        }
        assert_eq!(delivered, ["b", "c", "d"]);

        cancel.cancel();
        task.await.expect("drain task");
        assert_eq!(pipeline.send_string("e"), Err(InputError::Closed));
    }

    #[test_timeout::tokio_timeout_test]
    async fn resize_before_connect_is_dropped() {
        let pipeline = InputPipeline::new(8);
        pipeline.send_resize(80, 24).expect("resize");
        pipeline.send_clear_buffer().expect("clear");
        assert_eq!(pipeline.stats().queued, 1);

        let (channel_tx, channel_rx) = oneshot::channel();
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let _task = pipeline.spawn_drain(channel_rx, cancel.clone(), LatencyBatch::new("test", 10));
        channel_tx.send(tx).expect("hand over channel");

        assert_eq!(rx.recv().await, Some(InputEvent::ClearBuffer));
        // Once connected, resizes flow through.
        pipeline.send_resize(100, 30).expect("resize");
        pipeline.send_hyperlink_clicked("l1").expect("click");
        assert_eq!(
            rx.recv().await,
            Some(InputEvent::Resize {
                columns: 100,
                rows: 30
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(InputEvent::HyperlinkClicked { id: "l1".into() })
        );
        cancel.cancel();
    }

    #[test_timeout::tokio_timeout_test]
    async fn cancel_before_channel_closes_pipeline() {
        let pipeline = InputPipeline::new(8);
        pipeline.send_string("ls").expect("send");
        let (_channel_tx, channel_rx) = oneshot::channel::<mpsc::Sender<InputEvent>>();
        let cancel = CancellationToken::new();
        let task = pipeline.spawn_drain(channel_rx, cancel.clone(), LatencyBatch::new("test", 10));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("drain exits")
            .expect("join");
        assert!(pipeline.is_closed());
        assert_eq!(pipeline.stats().queued, 0);
        assert_eq!(pipeline.send_string("x"), Err(InputError::Closed));
    }
}
