#![allow(dead_code)]

pub mod agents;
pub mod harness;

pub use agents::*;
pub use harness::*;
