//! Incremental block parsing and throttled rendering for streamed model
//! output.
//!
//! A growing buffer is re-segmented into prose and fenced blocks on every
//! flush. Blocks are rendered through a registry of renderers keyed by their
//! fence kind and decorated by slot controls. [`stream`] decides when those
//! flushes happen.

pub mod completeness;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod render;
pub mod replay;
pub mod segment;
pub mod slots;
mod snapshot;
pub mod stream;
pub mod util;

#[cfg(test)]
mod test_support;

pub use config::RenderConfig;
pub use pipeline::{ChromeState, RenderInstruction, RenderKey, RenderPipeline};
pub use segment::{parse, BlockSegment, ProseSegment, Segment};
