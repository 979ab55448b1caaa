use super::throttle::{FlushDecision, StreamScheduler};
use super::{FrameUpdate, InteractionSurface, StreamId, TerminalReason};
use crate::config::RenderConfig;
use crate::pipeline::{ChromeState, RenderPipeline};
use crate::segment::ParseMode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StreamSignal {
    Appended,
    /// Display state changed; re-render at the next allowed moment.
    Refresh,
    Terminated(TerminalReason),
}

/// Runs one stream's scheduler. Flushes happen only on this task, so they
/// are strictly ordered and never overlap.
pub(super) struct StreamDriver {
    stream_id: StreamId,
    surface: Arc<dyn InteractionSurface>,
    pipeline: RenderPipeline,
    chrome: ChromeState,
    scheduler: StreamScheduler,
    sequence: u64,
    updates: mpsc::UnboundedSender<FrameUpdate>,
    finalized: bool,
}

impl StreamDriver {
    pub(super) fn new(
        stream_id: StreamId,
        surface: Arc<dyn InteractionSurface>,
        pipeline: RenderPipeline,
        chrome: ChromeState,
        config: &RenderConfig,
        updates: mpsc::UnboundedSender<FrameUpdate>,
    ) -> Self {
        Self {
            stream_id,
            surface,
            pipeline,
            chrome,
            scheduler: StreamScheduler::new(config),
            sequence: 0,
            updates,
            finalized: false,
        }
    }

    pub(super) async fn run(
        mut self,
        mut signals: mpsc::UnboundedReceiver<StreamSignal>,
        cancel: CancellationToken,
    ) {
        loop {
            let deadline = self.scheduler.deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let dropped = self.scheduler.cancel();
                    tracing::debug!(stream = %self.stream_id, dropped_pending = dropped, "stream consumer torn down");
                    break;
                }
                signal = signals.recv() => match signal {
                    Some(StreamSignal::Appended) => self.on_appended(),
                    Some(StreamSignal::Refresh) => self.on_refresh(),
                    Some(StreamSignal::Terminated(reason)) => self.on_terminated(reason),
                    None => {
                        self.scheduler.cancel();
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_deadline();
                }
            }
        }
    }

    fn on_appended(&mut self) {
        if self.finalized {
            return;
        }
        let Some(snapshot) = self.snapshot() else {
            return;
        };
        let now = Instant::now();
        if self.scheduler.on_delta(&snapshot, now) == FlushDecision::Now {
            self.flush(&snapshot, ParseMode::Streaming, now);
        }
    }

    fn on_refresh(&mut self) {
        if self.finalized {
            let snapshot = self.snapshot().unwrap_or_default();
            self.publish(&snapshot, ParseMode::Final);
            return;
        }
        let now = Instant::now();
        if self.scheduler.request_flush(now) == FlushDecision::Now {
            if let Some(snapshot) = self.snapshot() {
                self.flush(&snapshot, ParseMode::Streaming, now);
            }
        }
    }

    fn on_deadline(&mut self) {
        let now = Instant::now();
        if !self.scheduler.take_due(now) {
            return;
        }
        // Deltas that arrived while waiting are already in the buffer.
        if let Some(snapshot) = self.snapshot() {
            self.flush(&snapshot, ParseMode::Streaming, now);
        }
    }

    fn on_terminated(&mut self, reason: TerminalReason) {
        if self.finalized {
            tracing::debug!(stream = %self.stream_id, ?reason, "duplicate terminal signal ignored");
            return;
        }
        self.scheduler.begin_finalize();
        let snapshot = self.snapshot().unwrap_or_default();
        self.publish(&snapshot, ParseMode::Final);
        self.scheduler.finish();
        self.finalized = true;
        tracing::info!(
            stream = %self.stream_id,
            ?reason,
            frames = self.sequence,
            "stream finalized"
        );
    }

    fn flush(&mut self, snapshot: &str, mode: ParseMode, now: Instant) {
        self.publish(snapshot, mode);
        self.scheduler.record_flush(snapshot, now);
    }

    fn publish(&mut self, snapshot: &str, mode: ParseMode) {
        let instructions = self.pipeline.render_snapshot(snapshot, mode, &self.chrome);
        let sequence = self.sequence;
        self.sequence += 1;
        let is_final = mode == ParseMode::Final;
        tracing::debug!(
            stream = %self.stream_id,
            sequence,
            is_final,
            segments = instructions.len(),
            bytes = snapshot.len(),
            "flush"
        );
        let _ = self.updates.send(FrameUpdate {
            stream_id: self.stream_id.clone(),
            sequence,
            is_final,
            instructions,
        });
    }

    fn snapshot(&self) -> Option<String> {
        match self.surface.buffer_snapshot(&self.stream_id) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(stream = %self.stream_id, error = %err, "buffer snapshot unavailable");
                None
            }
        }
    }
}
