//! Streaming side of the pipeline: growing buffers, throttled flushes and the
//! service that runs one scheduler per in-flight turn.

mod driver;
mod service;
mod surface;
mod throttle;

pub use service::RenderService;
pub use surface::{InteractionSurface, StreamBuffer, SurfaceError, SurfaceEvent, TurnBuffers};
pub use throttle::{FlushDecision, StreamScheduler, ThrottleState};

use crate::pipeline::RenderInstruction;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    Streaming,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    Completed,
    Errored,
    Stopped,
}

/// One published flush for the display layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameUpdate {
    pub stream_id: StreamId,
    /// Increases by one per frame of a stream.
    pub sequence: u64,
    /// Rendered with every block closed.
    pub is_final: bool,
    pub instructions: Vec<RenderInstruction>,
}
