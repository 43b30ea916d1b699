//! Progress events and their delivery plumbing.
//!
//! Stages and the executor report progress through a [`ProgressEmitter`];
//! a [`ProgressBus`] fans the events out to registered [`ProgressSink`]s
//! from a listener task. Emission is fire-and-forget by contract: a full
//! or closed channel never fails a stage.

pub mod bus;
pub mod emitter;
pub mod event;
pub mod sink;

pub use bus::ProgressBus;
pub use emitter::ProgressEmitter;
pub use event::ProgressEvent;
pub use sink::{ChannelSink, MemorySink, ProgressSink, TracingSink};
