//! Event sinks: where progress events land.

use super::event::ProgressEvent;
use std::io;
use std::sync::{Arc, Mutex};

/// Consumer of progress events.
///
/// `handle` runs on the bus listener task; implementations should stay
/// fast and must not block on the engine (which may be the source of the
/// very event being handled).
pub trait ProgressSink: Send {
    fn handle(&mut self, event: &ProgressEvent) -> io::Result<()>;
}

/// Sink that forwards events to `tracing` at info level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn handle(&mut self, event: &ProgressEvent) -> io::Result<()> {
        tracing::info!(
            target: "waymark::progress",
            task_id = event.task_id(),
            event = event.label(),
            "{event}"
        );
        Ok(())
    }
}

/// Sink that buffers events in memory. Clones share the buffer, so tests
/// keep one clone and register the other with the bus.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ProgressEvent> {
        self.events.lock().expect("memory sink mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("memory sink mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProgressSink for MemorySink {
    fn handle(&mut self, event: &ProgressEvent) -> io::Result<()> {
        self.events
            .lock()
            .expect("memory sink mutex poisoned")
            .push(event.clone());
        Ok(())
    }
}

/// Sink that forwards events into a tokio mpsc channel, for consumers that
/// want to observe progress as a stream (status endpoints, TUIs).
#[derive(Clone, Debug)]
pub struct ChannelSink {
    sender: tokio::sync::mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressSink for ChannelSink {
    fn handle(&mut self, event: &ProgressEvent) -> io::Result<()> {
        // A dropped consumer is not an error worth surfacing; the bus
        // keeps delivering to the remaining sinks.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_clones_share_storage() {
        let sink = MemorySink::new();
        let mut registered = sink.clone();
        registered
            .handle(&ProgressEvent::TaskCreated {
                task_id: "t".into(),
            })
            .unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.snapshot()[0].task_id(), "t");
    }

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = ChannelSink::new(tx);
        sink.handle(&ProgressEvent::AwaitingHumanReview {
            task_id: "t".into(),
        })
        .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.label(), "awaiting_human_review");
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        assert!(
            sink.handle(&ProgressEvent::TaskCreated {
                task_id: "t".into()
            })
            .is_ok()
        );
    }
}
