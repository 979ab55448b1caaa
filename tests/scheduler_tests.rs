use fencecast::stream::{FrameUpdate, InteractionSurface, RenderService, StreamId, TerminalReason, TurnBuffers};
use fencecast::{RenderConfig, RenderKey, RenderPipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Harness {
    buffers: TurnBuffers,
    service: Arc<RenderService>,
    frames: mpsc::UnboundedReceiver<FrameUpdate>,
    router: JoinHandle<()>,
}

fn start(config: RenderConfig) -> Harness {
    let buffers = TurnBuffers::new();
    let pipeline = RenderPipeline::with_builtins(&config, None, None);
    let (service, frames) = RenderService::new(Arc::new(buffers.clone()), pipeline, config);
    let service = Arc::new(service);
    let events = buffers.subscribe();
    let router = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run(events).await })
    };
    Harness {
        buffers,
        service,
        frames,
        router,
    }
}

fn config_at(fps: f64) -> RenderConfig {
    RenderConfig {
        base_render_fps: fps,
        block_render_fps: fps,
        ..RenderConfig::default()
    }
}

fn drain(frames: &mut mpsc::UnboundedReceiver<FrameUpdate>) -> Vec<FrameUpdate> {
    let mut out = Vec::new();
    while let Ok(frame) = frames.try_recv() {
        out.push(frame);
    }
    out
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_fifty_deltas_in_200ms_flush_at_most_three_times() {
    let mut harness = start(config_at(10.0));
    let stream = StreamId::new("turn-1");

    for n in 0..50 {
        harness.buffers.append(&stream, &format!("w{n} ")).expect("append");
        tokio::time::sleep(Duration::from_millis(4)).await;
    }
    // Let a flush due exactly at 200ms land before counting.
    settle().await;
    let streaming = drain(&mut harness.frames);
    assert!(!streaming.is_empty());
    assert!(streaming.len() <= 3, "flushed {} times in 200ms", streaming.len());
    assert!(streaming.iter().all(|frame| !frame.is_final));

    harness.buffers.terminate(&stream, TerminalReason::Completed);
    let last = harness.frames.recv().await.expect("final frame");
    assert!(last.is_final);
    assert_eq!(last.sequence, streaming.len() as u64);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(drain(&mut harness.frames).is_empty(), "no flush after the final one");
    harness.service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_deferred_flush_picks_up_latest_snapshot() {
    let mut harness = start(config_at(10.0));
    let stream = StreamId::new("turn-1");

    harness.buffers.append(&stream, "Hello").expect("append");
    let first = harness.frames.recv().await.expect("immediate frame");
    assert_eq!(first.sequence, 0);

    harness.buffers.append(&stream, ", wor").expect("append");
    harness.buffers.append(&stream, "ld").expect("append");
    settle().await;
    assert!(drain(&mut harness.frames).is_empty(), "second flush waits for the interval");

    let deferred = harness.frames.recv().await.expect("deferred frame");
    assert_eq!(deferred.sequence, 1);
    assert!(deferred.instructions[0].body.markup.contains("Hello, world"));
    harness.service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_terminal_signal_flushes_once_with_closed_blocks() {
    let mut harness = start(config_at(5.0));
    let stream = StreamId::new("turn-1");

    harness.buffers.append(&stream, "Data:\n```json\n{\"a\": 1}").expect("append");
    let streaming = harness.frames.recv().await.expect("streaming frame");
    let trailing = &streaming.instructions[1];
    assert_eq!(trailing.key, RenderKey::Block(0));
    assert!(trailing.body.markup.contains("data-trailing=\"true\""));

    // Pending deferred flush at terminate time is superseded, not doubled.
    harness.buffers.append(&stream, "\n").expect("append");
    harness.buffers.terminate(&stream, TerminalReason::Errored);
    harness.buffers.terminate(&stream, TerminalReason::Completed);

    let last = harness.frames.recv().await.expect("final frame");
    assert!(last.is_final);
    let block = &last.instructions[1];
    assert!(block.body.markup.contains("data-trailing=\"false\""));
    assert!(block.body.payload.is_some());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(drain(&mut harness.frames).is_empty());
    harness.service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_streaming_render_disabled_emits_only_final_frame() {
    let mut config = config_at(30.0);
    config.enable_streaming_render = false;
    let mut harness = start(config);
    let stream = StreamId::new("turn-1");

    for chunk in ["one ", "two ", "three"] {
        harness.buffers.append(&stream, chunk).expect("append");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(drain(&mut harness.frames).is_empty());

    harness.buffers.terminate(&stream, TerminalReason::Stopped);
    let frame = harness.frames.recv().await.expect("final frame");
    assert!(frame.is_final);
    assert_eq!(frame.sequence, 0);
    harness.service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_detach_cancels_pending_flush_and_keeps_buffer() {
    let mut harness = start(config_at(10.0));
    let stream = StreamId::new("turn-1");

    harness.buffers.append(&stream, "a").expect("append");
    harness.frames.recv().await.expect("immediate frame");
    harness.buffers.append(&stream, "b").expect("append");
    settle().await;
    assert!(harness.service.detach(&stream));

    tokio::time::sleep(Duration::from_secs(1)).await;
    harness.buffers.append(&stream, "c").expect("append");
    harness.buffers.terminate(&stream, TerminalReason::Completed);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(drain(&mut harness.frames).is_empty());
    assert_eq!(harness.buffers.buffer_snapshot(&stream).expect("snapshot"), "abc");
    harness.service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_streams_are_scheduled_independently() {
    let mut harness = start(config_at(10.0));
    let left = StreamId::new("left");
    let right = StreamId::new("right");

    harness.buffers.append(&left, "L").expect("append");
    harness.buffers.append(&right, "R").expect("append");
    settle().await;
    let frames = drain(&mut harness.frames);
    assert_eq!(frames.len(), 2, "each stream's first delta flushes immediately");

    harness.buffers.terminate(&left, TerminalReason::Completed);
    let last = harness.frames.recv().await.expect("final frame");
    assert_eq!(last.stream_id, left);
    assert!(last.is_final);
    assert_eq!(harness.service.attached_streams(), 2);
    assert!(harness.buffers.is_stream_active(&right));
    harness.service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_lagged_router_still_finalizes_unseen_stream() {
    let mut harness = start(config_at(10.0));
    let busy = StreamId::new("busy");
    let quiet = StreamId::new("quiet");

    // The router has not run yet; quiet's only events fall out of the
    // event buffer before it does.
    harness.buffers.append(&quiet, "short answer").expect("append");
    harness.buffers.terminate(&quiet, TerminalReason::Completed);
    for n in 0..300 {
        harness.buffers.append(&busy, &format!("{n} ")).expect("append");
    }
    harness.buffers.terminate(&busy, TerminalReason::Completed);

    let mut finals = Vec::new();
    while finals.len() < 2 {
        let frame = harness.frames.recv().await.expect("frame");
        if frame.is_final {
            finals.push(frame);
        }
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(drain(&mut harness.frames).iter().all(|frame| !frame.is_final));

    let mut streams: Vec<&str> = finals.iter().map(|frame| frame.stream_id.as_str()).collect();
    streams.sort_unstable();
    assert_eq!(streams, vec!["busy", "quiet"]);
    let quiet_final = finals.iter().find(|frame| frame.stream_id == quiet).expect("quiet final");
    assert!(quiet_final.instructions[0].body.markup.contains("short answer"));
    harness.service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_removed_turns_release_their_drivers() {
    let mut harness = start(config_at(10.0));

    for n in 0..100 {
        let stream = StreamId::new(format!("turn-{n}"));
        harness.buffers.append(&stream, "answer").expect("append");
        harness.buffers.terminate(&stream, TerminalReason::Completed);
        settle().await;
        assert!(harness.service.attached_streams() >= 1);
        harness.buffers.remove(&stream);
        settle().await;
    }

    assert_eq!(harness.service.attached_streams(), 0);
    let finals = drain(&mut harness.frames).into_iter().filter(|frame| frame.is_final).count();
    assert_eq!(finals, 100);
    harness.service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_router() {
    let harness = start(RenderConfig::default());
    harness.service.shutdown();
    tokio::time::timeout(Duration::from_secs(1), harness.router)
        .await
        .expect("router exits")
        .expect("join");
}
