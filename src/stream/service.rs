use super::driver::{StreamDriver, StreamSignal};
use super::{FrameUpdate, InteractionSurface, StreamId, SurfaceEvent, TerminalReason};
use crate::config::RenderConfig;
use crate::pipeline::{ChromeState, RenderPipeline};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

struct DriverHandle {
    signals: mpsc::UnboundedSender<StreamSignal>,
    cancel: CancellationToken,
    chrome: ChromeState,
}

#[derive(Default)]
struct Streams {
    active: HashMap<StreamId, DriverHandle>,
    detached: HashSet<StreamId>,
}

/// Turns surface events into throttled frames, one driver task per stream.
///
/// Streams share the renderer and slot registries through the pipeline but
/// nothing else. Frames for all streams arrive on the receiver returned by
/// [`RenderService::new`].
pub struct RenderService {
    surface: Arc<dyn InteractionSurface>,
    pipeline: RenderPipeline,
    config: RenderConfig,
    streams: Mutex<Streams>,
    updates: mpsc::UnboundedSender<FrameUpdate>,
    shutdown: CancellationToken,
}

impl RenderService {
    pub fn new(
        surface: Arc<dyn InteractionSurface>,
        pipeline: RenderPipeline,
        config: RenderConfig,
    ) -> (Self, mpsc::UnboundedReceiver<FrameUpdate>) {
        let (updates, frames) = mpsc::unbounded_channel();
        let service = Self {
            surface,
            pipeline,
            config,
            streams: Mutex::new(Streams::default()),
            updates,
            shutdown: CancellationToken::new(),
        };
        (service, frames)
    }

    /// Route surface events until the surface closes or [`shutdown`](Self::shutdown)
    /// is called. Subscribe before the producer starts so no event is missed.
    pub async fn run(&self, mut events: broadcast::Receiver<SurfaceEvent>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "surface events lagged, resyncing streams");
                        self.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("render service stopped");
    }

    /// Must be called from within a tokio runtime.
    pub fn handle_event(&self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::Appended { stream_id } => self.signal(&stream_id, StreamSignal::Appended),
            SurfaceEvent::Terminated { stream_id, reason } => {
                self.signal(&stream_id, StreamSignal::Terminated(reason))
            }
            SurfaceEvent::Removed { stream_id } => self.release(&stream_id),
        }
    }

    /// The consumer for this stream went away. Cancels any pending flush and
    /// ignores later events for the stream until the surface removes it. The
    /// surface buffer is untouched.
    pub fn detach(&self, stream_id: &StreamId) -> bool {
        let mut streams = self.streams.lock();
        streams.detached.insert(stream_id.clone());
        match streams.active.remove(stream_id) {
            Some(handle) => {
                handle.cancel.cancel();
                tracing::info!(stream = %stream_id, "stream detached");
                true
            }
            None => false,
        }
    }

    /// Fold and edit state for a stream, shared with its slot callbacks.
    pub fn chrome(&self, stream_id: &StreamId) -> Option<ChromeState> {
        self.streams
            .lock()
            .active
            .get(stream_id)
            .map(|handle| handle.chrome.clone())
    }

    /// Ask for a new frame after a chrome change. Streaming frames obey the
    /// throttle; a finished stream re-renders its final frame.
    pub fn rerender(&self, stream_id: &StreamId) -> bool {
        self.streams
            .lock()
            .active
            .get(stream_id)
            .is_some_and(|handle| handle.signals.send(StreamSignal::Refresh).is_ok())
    }

    pub fn attached_streams(&self) -> usize {
        self.streams.lock().active.len()
    }

    /// Cancel every driver and stop [`run`](Self::run).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.streams.lock().active.clear();
    }

    fn signal(&self, stream_id: &StreamId, signal: StreamSignal) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let mut streams = self.streams.lock();
        if streams.detached.contains(stream_id) {
            return;
        }
        let handle = streams
            .active
            .entry(stream_id.clone())
            .or_insert_with(|| self.spawn_driver(stream_id));
        if handle.signals.send(signal).is_err() {
            tracing::warn!(stream = %stream_id, ?signal, "stream driver already stopped");
        }
    }

    // The surface dropped the stream: stop its driver and forget it, detached
    // or not. A later stream reusing the id starts fresh.
    fn release(&self, stream_id: &StreamId) {
        let mut streams = self.streams.lock();
        streams.detached.remove(stream_id);
        if let Some(handle) = streams.active.remove(stream_id) {
            handle.cancel.cancel();
            tracing::debug!(stream = %stream_id, "stream driver released");
        }
    }

    fn spawn_driver(&self, stream_id: &StreamId) -> DriverHandle {
        let (signals, rx) = mpsc::unbounded_channel();
        let cancel = self.shutdown.child_token();
        let chrome = ChromeState::default();
        let driver = StreamDriver::new(
            stream_id.clone(),
            Arc::clone(&self.surface),
            self.pipeline.clone(),
            chrome.clone(),
            &self.config,
            self.updates.clone(),
        );
        tokio::spawn(driver.run(rx, cancel.clone()));
        tracing::debug!(stream = %stream_id, "stream driver started");
        DriverHandle {
            signals,
            cancel,
            chrome,
        }
    }

    // Missed events may include appends, terminations and removals, for
    // streams we have never seen too. Rebuild from what the surface holds;
    // the reason of a missed termination is not recoverable.
    fn resync(&self) {
        let known = self.surface.stream_ids();
        {
            let held: HashSet<&StreamId> = known.iter().collect();
            let mut streams = self.streams.lock();
            let gone: Vec<StreamId> = streams
                .active
                .keys()
                .filter(|stream_id| !held.contains(stream_id))
                .cloned()
                .collect();
            for stream_id in gone {
                if let Some(handle) = streams.active.remove(&stream_id) {
                    handle.cancel.cancel();
                    tracing::debug!(stream = %stream_id, "stream driver released");
                }
            }
            streams.detached.retain(|stream_id| held.contains(&stream_id));
        }
        for stream_id in known {
            // A finished driver ignores the repeated terminal signal.
            let signal = if self.surface.is_stream_active(&stream_id) {
                StreamSignal::Appended
            } else {
                StreamSignal::Terminated(TerminalReason::Completed)
            };
            self.signal(&stream_id, signal);
        }
    }
}

impl Drop for RenderService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RenderKey;
    use crate::stream::TurnBuffers;
    use std::time::Duration;

    fn service(buffers: &TurnBuffers, config: RenderConfig) -> (RenderService, mpsc::UnboundedReceiver<FrameUpdate>) {
        let pipeline = RenderPipeline::with_builtins(&config, None, None);
        RenderService::new(Arc::new(buffers.clone()), pipeline, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_without_deltas_flushes_once() {
        let buffers = TurnBuffers::new();
        let (service, mut frames) = service(&buffers, RenderConfig::default());
        let stream = StreamId::new("empty");

        service.handle_event(SurfaceEvent::Terminated {
            stream_id: stream.clone(),
            reason: TerminalReason::Stopped,
        });
        let frame = frames.recv().await.expect("final frame");
        assert!(frame.is_final);
        assert!(frame.instructions.is_empty());
        assert_eq!(frame.sequence, 0);

        service.handle_event(SurfaceEvent::Terminated {
            stream_id: stream,
            reason: TerminalReason::Stopped,
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_stream_ignores_later_events() {
        let buffers = TurnBuffers::new();
        let (service, mut frames) = service(&buffers, RenderConfig::default());
        let stream = StreamId::new("t");

        buffers.append(&stream, "hello").expect("append");
        service.handle_event(SurfaceEvent::Appended { stream_id: stream.clone() });
        let first = frames.recv().await.expect("first frame");
        assert_eq!(first.instructions[0].key, RenderKey::Prose(0));

        assert!(service.detach(&stream));
        assert!(!service.detach(&stream));
        buffers.append(&stream, " world").expect("append");
        buffers.terminate(&stream, TerminalReason::Completed);
        service.handle_event(SurfaceEvent::Appended { stream_id: stream.clone() });
        service.handle_event(SurfaceEvent::Terminated {
            stream_id: stream.clone(),
            reason: TerminalReason::Completed,
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(frames.try_recv().is_err());
        assert_eq!(service.attached_streams(), 0);
        assert_eq!(buffers.buffer_snapshot(&stream).expect("snapshot"), "hello world");
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_stream_releases_driver_and_detached_id() {
        let buffers = TurnBuffers::new();
        let (service, mut frames) = service(&buffers, RenderConfig::default());
        let stream = StreamId::new("t");

        buffers.append(&stream, "one").expect("append");
        service.handle_event(SurfaceEvent::Appended { stream_id: stream.clone() });
        frames.recv().await.expect("first frame");
        assert!(service.detach(&stream));
        assert!(service.streams.lock().detached.contains(&stream));

        buffers.remove(&stream);
        service.handle_event(SurfaceEvent::Removed { stream_id: stream.clone() });
        assert!(service.streams.lock().detached.is_empty());
        assert_eq!(service.attached_streams(), 0);

        // The id is usable again for a new turn.
        buffers.append(&stream, "two").expect("append");
        service.handle_event(SurfaceEvent::Appended { stream_id: stream.clone() });
        let fresh = frames.recv().await.expect("fresh frame");
        assert_eq!(fresh.sequence, 0);
        assert!(fresh.instructions[0].body.markup.contains("two"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_drops_streams_the_surface_forgot() {
        let buffers = TurnBuffers::new();
        let (service, mut frames) = service(&buffers, RenderConfig::default());
        let kept = StreamId::new("kept");
        let gone = StreamId::new("gone");

        for stream in [&kept, &gone] {
            buffers.append(stream, "x").expect("append");
            service.handle_event(SurfaceEvent::Appended { stream_id: stream.clone() });
        }
        frames.recv().await.expect("frame");
        frames.recv().await.expect("frame");
        service.detach(&gone);
        buffers.remove(&gone);

        service.resync();
        assert_eq!(service.attached_streams(), 1);
        assert!(service.chrome(&kept).is_some());
        assert!(service.streams.lock().detached.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerender_after_final_republishes_final_frame() {
        let buffers = TurnBuffers::new();
        let (service, mut frames) = service(&buffers, RenderConfig::default());
        let stream = StreamId::new("t");

        buffers.append(&stream, "```txt\n1\n2\n3\n4\n5\n6\n```\n").expect("append");
        buffers.terminate(&stream, TerminalReason::Completed);
        service.handle_event(SurfaceEvent::Appended { stream_id: stream.clone() });
        service.handle_event(SurfaceEvent::Terminated {
            stream_id: stream.clone(),
            reason: TerminalReason::Completed,
        });
        let _streaming = frames.recv().await.expect("streaming frame");
        let last = frames.recv().await.expect("final frame");
        assert!(last.is_final);

        service.chrome(&stream).expect("chrome").toggle_fold(0);
        assert!(service.rerender(&stream));
        let refreshed = frames.recv().await.expect("refreshed frame");
        assert!(refreshed.is_final);
        assert_eq!(refreshed.sequence, last.sequence + 1);
        assert!(refreshed.instructions[0].body.markup.contains("(+2 more lines)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_run_loop() {
        let buffers = TurnBuffers::new();
        let (service, _frames) = service(&buffers, RenderConfig::default());
        let service = Arc::new(service);
        let runner = {
            let service = Arc::clone(&service);
            let events = buffers.subscribe();
            tokio::spawn(async move { service.run(events).await })
        };
        service.shutdown();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run loop exits")
            .expect("join");
    }
}
