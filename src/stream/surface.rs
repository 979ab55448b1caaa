use super::{StreamId, TerminalReason};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    #[error("unknown stream '{0}'")]
    UnknownStream(StreamId),
    #[error("stream '{stream_id}' already ended ({reason:?}); buffer is frozen")]
    Frozen {
        stream_id: StreamId,
        reason: TerminalReason,
    },
    #[error("cumulative update for '{stream_id}' rewrites buffered text at byte {offset}")]
    Diverged { stream_id: StreamId, offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Appended {
        stream_id: StreamId,
    },
    Terminated {
        stream_id: StreamId,
        reason: TerminalReason,
    },
    /// The buffer was dropped; consumers can release the stream.
    Removed {
        stream_id: StreamId,
    },
}

impl SurfaceEvent {
    pub fn stream_id(&self) -> &StreamId {
        match self {
            Self::Appended { stream_id }
            | Self::Terminated { stream_id, .. }
            | Self::Removed { stream_id } => stream_id,
        }
    }
}

/// Owner of the authoritative text for each in-flight turn.
pub trait InteractionSurface: Send + Sync {
    fn buffer_snapshot(&self, stream_id: &StreamId) -> Result<String, SurfaceError>;

    fn is_stream_active(&self, stream_id: &StreamId) -> bool;

    /// Every stream the surface still holds a buffer for, finished or not.
    fn stream_ids(&self) -> Vec<StreamId>;

    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent>;
}

/// Append-only text of one turn, frozen once the turn ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamBuffer {
    text: String,
    terminal: Option<TerminalReason>,
}

impl StreamBuffer {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn terminal(&self) -> Option<TerminalReason> {
        self.terminal
    }

    pub fn is_frozen(&self) -> bool {
        self.terminal.is_some()
    }
}

struct TurnBuffersInner {
    buffers: RwLock<HashMap<StreamId, StreamBuffer>>,
    events: broadcast::Sender<SurfaceEvent>,
}

/// In-memory [`InteractionSurface`]: one buffer per stream plus a broadcast
/// of append/terminate events. Clones share the same buffers.
#[derive(Clone)]
pub struct TurnBuffers {
    inner: Arc<TurnBuffersInner>,
}

impl Default for TurnBuffers {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnBuffers {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(TurnBuffersInner {
                buffers: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Append an incremental delta. Returns the number of bytes added.
    pub fn append(&self, stream_id: &StreamId, delta: &str) -> Result<usize, SurfaceError> {
        self.mutate(stream_id, |text| {
            text.push_str(delta);
            Ok(delta.len())
        })
    }

    /// Apply a cumulative update (the whole text so far). Only the part not
    /// already buffered is appended; a retransmitted prefix adds nothing.
    /// An update that contradicts the buffer is rejected and changes nothing.
    pub fn append_cumulative(&self, stream_id: &StreamId, snapshot: &str) -> Result<usize, SurfaceError> {
        self.mutate(stream_id, |text| {
            let suffix = cumulative_suffix(text, snapshot).map_err(|offset| {
                tracing::warn!(
                    stream = %stream_id,
                    buffered = text.len(),
                    incoming = snapshot.len(),
                    offset,
                    "cumulative update diverges from buffer"
                );
                SurfaceError::Diverged {
                    stream_id: stream_id.clone(),
                    offset,
                }
            })?;
            text.push_str(suffix);
            Ok(suffix.len())
        })
    }

    /// Freeze the stream. Returns false when it had already ended.
    pub fn terminate(&self, stream_id: &StreamId, reason: TerminalReason) -> bool {
        let mut buffers = self.inner.buffers.write();
        let buffer = buffers.entry(stream_id.clone()).or_default();
        if buffer.terminal.is_some() {
            return false;
        }
        buffer.terminal = Some(reason);
        let _ = self.inner.events.send(SurfaceEvent::Terminated {
            stream_id: stream_id.clone(),
            reason,
        });
        tracing::info!(stream = %stream_id, ?reason, bytes = buffer.text.len(), "stream terminated");
        true
    }

    pub fn buffer(&self, stream_id: &StreamId) -> Option<StreamBuffer> {
        self.inner.buffers.read().get(stream_id).cloned()
    }

    /// Drop a stream's buffer and tell subscribers it is gone.
    pub fn remove(&self, stream_id: &StreamId) -> Option<StreamBuffer> {
        let mut buffers = self.inner.buffers.write();
        let removed = buffers.remove(stream_id)?;
        let _ = self.inner.events.send(SurfaceEvent::Removed {
            stream_id: stream_id.clone(),
        });
        Some(removed)
    }

    // The write lock is held while the event is sent, so subscribers see
    // events in the same order as the buffer changes.
    fn mutate(
        &self,
        stream_id: &StreamId,
        apply: impl FnOnce(&mut String) -> Result<usize, SurfaceError>,
    ) -> Result<usize, SurfaceError> {
        let mut buffers = self.inner.buffers.write();
        let buffer = buffers.entry(stream_id.clone()).or_default();
        if let Some(reason) = buffer.terminal {
            return Err(SurfaceError::Frozen {
                stream_id: stream_id.clone(),
                reason,
            });
        }
        let added = apply(&mut buffer.text)?;
        if added > 0 {
            let _ = self.inner.events.send(SurfaceEvent::Appended {
                stream_id: stream_id.clone(),
            });
        }
        Ok(added)
    }
}

impl InteractionSurface for TurnBuffers {
    fn buffer_snapshot(&self, stream_id: &StreamId) -> Result<String, SurfaceError> {
        self.inner
            .buffers
            .read()
            .get(stream_id)
            .map(|buffer| buffer.text.clone())
            .ok_or_else(|| SurfaceError::UnknownStream(stream_id.clone()))
    }

    fn is_stream_active(&self, stream_id: &StreamId) -> bool {
        self.inner
            .buffers
            .read()
            .get(stream_id)
            .is_some_and(|buffer| buffer.terminal.is_none())
    }

    fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.inner.buffers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.inner.events.subscribe()
    }
}

/// The part of a cumulative update that is not buffered yet. Errors with the
/// byte offset of the first difference when the update rewrites history.
fn cumulative_suffix<'a>(existing: &str, incoming: &'a str) -> Result<&'a str, usize> {
    if let Some(suffix) = incoming.strip_prefix(existing) {
        return Ok(suffix);
    }
    // Retransmission of an earlier part of the stream.
    if existing.starts_with(incoming) {
        return Ok("");
    }
    let offset = existing
        .char_indices()
        .zip(incoming.chars())
        .find(|((_, ours), theirs)| ours != theirs)
        .map_or(existing.len().min(incoming.len()), |((index, _), _)| index);
    Err(offset)
}
