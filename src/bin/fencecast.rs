use anyhow::{Context, Result};
use clap::Parser;
use fencecast::config::RenderConfig;
use fencecast::pipeline::RenderPipeline;
use fencecast::replay::{load_transcript, replay};
use fencecast::stream::{InteractionSurface, RenderService, StreamId, TurnBuffers};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Replay a markdown transcript as a model stream and print every rendered
/// frame as a JSON line.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Transcript to replay. Reads stdin when omitted.
    input: Option<PathBuf>,

    /// Characters per streamed delta.
    #[arg(long, default_value_t = 24)]
    chunk_size: usize,

    /// Pause between deltas, in milliseconds.
    #[arg(long, default_value_t = 15)]
    delay_ms: u64,

    /// Print only the final frame.
    #[arg(long)]
    final_only: bool,

    #[arg(long, default_value = "replay")]
    stream_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    fencecast::logging::init()?;

    let config = RenderConfig::load()?;
    config.validate()?;
    tracing::info!(?config, "render config loaded");

    let transcript = load_transcript(cli.input.as_deref())?;
    let pipeline = RenderPipeline::with_builtins(
        &config,
        Some(Arc::new(|text: String| {
            tracing::info!(bytes = text.len(), "copy requested");
        })),
        Some(Arc::new(|file_name: String, content: String| {
            tracing::info!(%file_name, bytes = content.len(), "download requested");
        })),
    );

    let buffers = TurnBuffers::new();
    let (service, mut frames) = RenderService::new(Arc::new(buffers.clone()), pipeline, config);
    let service = Arc::new(service);
    let events = buffers.subscribe();
    let router = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run(events).await })
    };

    let stream_id = StreamId::new(cli.stream_id);
    let producer = {
        let buffers = buffers.clone();
        let stream_id = stream_id.clone();
        let delay = Duration::from_millis(cli.delay_ms);
        let chunk_size = cli.chunk_size;
        tokio::spawn(async move { replay(&buffers, &stream_id, &transcript, chunk_size, delay).await })
    };

    let mut stdout = std::io::stdout().lock();
    while let Some(frame) = frames.recv().await {
        if frame.stream_id != stream_id {
            continue;
        }
        if frame.is_final || !cli.final_only {
            let line = serde_json::to_string(&frame).context("failed to encode frame")?;
            writeln!(stdout, "{line}")?;
        }
        if frame.is_final {
            break;
        }
    }
    stdout.flush()?;

    producer.await.context("replay task panicked")??;
    service.shutdown();
    router.await.context("render service task panicked")?;
    Ok(())
}
