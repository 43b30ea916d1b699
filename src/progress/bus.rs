//! The progress bus: an unbounded flume channel fanned out to sinks.

use super::emitter::ProgressEmitter;
use super::event::ProgressEvent;
use super::sink::ProgressSink;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Fan-out hub between emitters and sinks.
///
/// Two consumption modes: [`ProgressBus::listen`] spawns a background task
/// that dispatches events as they arrive (production), and
/// [`ProgressBus::drain`] synchronously dispatches everything queued so
/// far (tests, shutdown flushes). Only use one mode per bus: a running
/// listener and a drain call would race for events.
pub struct ProgressBus {
    sender: flume::Sender<ProgressEvent>,
    receiver: flume::Receiver<ProgressEvent>,
    sinks: Arc<Mutex<Vec<Box<dyn ProgressSink>>>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender,
            receiver,
            sinks: Arc::new(Mutex::new(Vec::new())),
            shutdown: Mutex::new(None),
        }
    }

    /// Bus pre-registered with a single sink.
    pub fn with_sink(sink: impl ProgressSink + 'static) -> Self {
        let bus = Self::new();
        bus.add_sink(Box::new(sink));
        bus
    }

    pub fn add_sink(&self, sink: Box<dyn ProgressSink>) {
        self.sinks
            .lock()
            .expect("progress sinks mutex poisoned")
            .push(sink);
    }

    /// Handle the executor publishes through.
    pub fn emitter(&self) -> ProgressEmitter {
        ProgressEmitter::new(self.sender.clone())
    }

    /// Spawn the listener task. Idempotent: a second call replaces the
    /// previous listener.
    pub fn listen(&self) {
        let receiver = self.receiver.clone();
        let sinks = Arc::clone(&self.sinks);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        if let Some(previous) = self
            .shutdown
            .lock()
            .expect("progress shutdown mutex poisoned")
            .replace(stop_tx)
        {
            let _ = previous.send(());
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        // Flush whatever is still queued before exiting.
                        while let Ok(event) = receiver.try_recv() {
                            dispatch(&sinks, &event);
                        }
                        break;
                    }
                    received = receiver.recv_async() => {
                        match received {
                            Ok(event) => dispatch(&sinks, &event),
                            Err(_) => break, // all senders dropped
                        }
                    }
                }
            }
        });
    }

    /// Synchronously dispatch every event queued so far.
    pub fn drain(&self) {
        while let Ok(event) = self.receiver.try_recv() {
            dispatch(&self.sinks, &event);
        }
    }

    /// Stop the listener task, flushing queued events first.
    pub fn stop_listener(&self) {
        if let Some(stop_tx) = self
            .shutdown
            .lock()
            .expect("progress shutdown mutex poisoned")
            .take()
        {
            let _ = stop_tx.send(());
        }
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProgressBus {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

fn dispatch(sinks: &Arc<Mutex<Vec<Box<dyn ProgressSink>>>>, event: &ProgressEvent) {
    let mut sinks = sinks.lock().expect("progress sinks mutex poisoned");
    for sink in sinks.iter_mut() {
        if let Err(err) = sink.handle(event) {
            tracing::warn!(
                target: "waymark::progress",
                error = %err,
                event = event.label(),
                "progress sink rejected event"
            );
        }
    }
}
