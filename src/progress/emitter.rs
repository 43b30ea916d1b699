//! Fire-and-forget event emission handle.

use super::event::ProgressEvent;

/// Cheap cloneable handle the executor and fan-out coordinator emit
/// through. Delivery is best-effort by contract: if the bus is gone the
/// event is dropped with a debug log, never an error; progress reporting
/// must not be able to fail a stage.
#[derive(Clone, Debug)]
pub struct ProgressEmitter {
    sender: flume::Sender<ProgressEvent>,
}

impl ProgressEmitter {
    pub(super) fn new(sender: flume::Sender<ProgressEvent>) -> Self {
        Self { sender }
    }

    /// Emitter with no bus behind it; every event is dropped. Useful for
    /// callers that do not care about progress.
    pub fn disabled() -> Self {
        let (sender, _receiver) = flume::unbounded();
        Self { sender }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Err(err) = self.sender.send(event) {
            tracing::debug!(
                target: "waymark::progress",
                dropped = %err.into_inner().label(),
                "progress event dropped: bus closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_emitter_swallows_events() {
        let emitter = ProgressEmitter::disabled();
        emitter.emit(ProgressEvent::TaskCreated {
            task_id: "t".into(),
        });
        // No panic, no error: that's the whole contract.
    }
}
