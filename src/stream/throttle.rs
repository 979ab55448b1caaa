//! Per-stream flush throttling.
//!
//! [`StreamScheduler`] is a pure state machine: callers pass the current
//! time in and act on the [`FlushDecision`] they get back. The async driver
//! owns the timer; nothing here sleeps.

use super::StreamPhase;
use crate::config::RenderConfig;
use aho_corasick::AhoCorasick;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::Instant;

const FENCE_MARKERS: [&str; 2] = ["```", "~~~"];

/// What the caller should do after telling the scheduler about new input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    /// Flush against the latest snapshot right away.
    Now,
    /// A deferred flush is due at this instant.
    At(Instant),
    /// Nothing to do until a terminal signal.
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleState {
    pub interval: Duration,
    pub last_flush_at: Option<Instant>,
    pub pending_flush: bool,
    /// Set while exactly one deferred flush is outstanding.
    pub deadline: Option<Instant>,
    pub last_rendered_snapshot: String,
}

impl ThrottleState {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_flush_at: None,
            pending_flush: false,
            deadline: None,
            last_rendered_snapshot: String::new(),
        }
    }
}

#[derive(Debug)]
pub struct StreamScheduler {
    base_interval: Duration,
    block_interval: Duration,
    streaming_render: bool,
    phase: StreamPhase,
    throttle: Option<ThrottleState>,
    saw_fence: bool,
    scanned_len: usize,
}

impl StreamScheduler {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            base_interval: config.base_interval(),
            block_interval: config.block_interval(),
            streaming_render: config.enable_streaming_render,
            phase: StreamPhase::Idle,
            throttle: None,
            saw_fence: false,
            scanned_len: 0,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn throttle(&self) -> Option<&ThrottleState> {
        self.throttle.as_ref()
    }

    /// Current cadence, or `None` outside `Streaming`.
    pub fn interval(&self) -> Option<Duration> {
        self.throttle.as_ref().map(|state| state.interval)
    }

    /// The outstanding deferred flush, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.throttle
            .as_ref()
            .filter(|state| state.pending_flush)
            .and_then(|state| state.deadline)
    }

    /// Record that the buffer grew to `snapshot`.
    pub fn on_delta(&mut self, snapshot: &str, now: Instant) -> FlushDecision {
        match self.phase {
            StreamPhase::Finalizing => return FlushDecision::Hold,
            StreamPhase::Idle => {
                self.phase = StreamPhase::Streaming;
                self.saw_fence = false;
                self.scanned_len = 0;
                self.throttle = Some(ThrottleState::new(self.base_interval));
                tracing::debug!(interval_ms = self.base_interval.as_millis() as u64, "stream started");
            }
            StreamPhase::Streaming => {}
        }

        self.observe_fences(snapshot);
        let interval = self.current_interval();
        let Some(state) = self.throttle.as_mut() else {
            return FlushDecision::Hold;
        };
        if state.interval != interval {
            tracing::debug!(
                interval_ms = interval.as_millis() as u64,
                "fenced content seen, switching to block cadence"
            );
            state.interval = interval;
        }
        if !state.pending_flush && state.last_rendered_snapshot == snapshot && state.last_flush_at.is_some() {
            return FlushDecision::Hold;
        }
        self.schedule(now)
    }

    /// Ask for a flush without new input, e.g. after a chrome change. Obeys
    /// the same cadence as deltas.
    pub fn request_flush(&mut self, now: Instant) -> FlushDecision {
        if self.phase != StreamPhase::Streaming {
            return FlushDecision::Hold;
        }
        self.schedule(now)
    }

    /// True when the deferred flush has come due. The caller must flush and
    /// then call [`record_flush`](Self::record_flush).
    pub fn take_due(&mut self, now: Instant) -> bool {
        let Some(state) = self.throttle.as_mut() else {
            return false;
        };
        match state.deadline {
            Some(deadline) if state.pending_flush && now >= deadline => {
                state.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn record_flush(&mut self, snapshot: &str, now: Instant) {
        if let Some(state) = self.throttle.as_mut() {
            state.last_flush_at = Some(now);
            state.pending_flush = false;
            state.deadline = None;
            state.last_rendered_snapshot.clear();
            state.last_rendered_snapshot.push_str(snapshot);
        }
    }

    /// Terminal signal received: any deferred flush is superseded by the
    /// final one.
    pub fn begin_finalize(&mut self) {
        self.phase = StreamPhase::Finalizing;
        if let Some(state) = self.throttle.as_mut() {
            state.deadline = None;
            state.pending_flush = false;
        }
    }

    /// The final flush completed; discard throttle state.
    pub fn finish(&mut self) {
        self.phase = StreamPhase::Idle;
        self.throttle = None;
    }

    /// Consumer went away. Returns whether a deferred flush was dropped.
    pub fn cancel(&mut self) -> bool {
        let dropped = self.deadline().is_some();
        self.phase = StreamPhase::Idle;
        self.throttle = None;
        dropped
    }

    fn schedule(&mut self, now: Instant) -> FlushDecision {
        let streaming_render = self.streaming_render;
        let Some(state) = self.throttle.as_mut() else {
            return FlushDecision::Hold;
        };
        state.pending_flush = true;
        if !streaming_render {
            return FlushDecision::Hold;
        }
        if let Some(deadline) = state.deadline {
            return FlushDecision::At(deadline);
        }
        match state.last_flush_at {
            Some(last) if now.saturating_duration_since(last) < state.interval => {
                let deadline = last + state.interval;
                state.deadline = Some(deadline);
                FlushDecision::At(deadline)
            }
            _ => FlushDecision::Now,
        }
    }

    fn current_interval(&self) -> Duration {
        if self.saw_fence {
            self.block_interval
        } else {
            self.base_interval
        }
    }

    // The buffer only grows, so once a marker is seen it stays seen and only
    // the new tail needs scanning. Back up a little so a marker split across
    // two deltas is still found.
    fn observe_fences(&mut self, snapshot: &str) {
        let bytes = snapshot.as_bytes();
        if !self.saw_fence {
            let start = self.scanned_len.saturating_sub(2).min(bytes.len());
            self.saw_fence = contains_fence_marker(&bytes[start..]);
        }
        self.scanned_len = bytes.len();
    }
}

fn fence_markers() -> Option<&'static AhoCorasick> {
    static MARKERS: OnceLock<Option<AhoCorasick>> = OnceLock::new();
    MARKERS
        .get_or_init(|| AhoCorasick::new(FENCE_MARKERS).ok())
        .as_ref()
}

fn contains_fence_marker(haystack: &[u8]) -> bool {
    match fence_markers() {
        Some(markers) => markers.is_match(haystack),
        None => FENCE_MARKERS.iter().any(|marker| {
            haystack
                .windows(marker.len())
                .any(|window| window == marker.as_bytes())
        }),
    }
}
