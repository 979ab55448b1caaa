//! Feed a saved transcript through [`TurnBuffers`] as if a model were
//! producing it.

use crate::stream::{StreamId, TerminalReason, TurnBuffers};
use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Read a transcript from `path`, or from stdin when no path is given.
pub fn load_transcript(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read transcript '{}'", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read transcript from stdin")?;
            Ok(text)
        }
    }
}

/// Split `text` into chunks of at most `max_chars` characters.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (index, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(&text[start..index]);
            start = index;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

/// Append `text` to `stream_id` chunk by chunk, pausing `delay` between
/// chunks, then mark the stream completed.
pub async fn replay(
    buffers: &TurnBuffers,
    stream_id: &StreamId,
    text: &str,
    chunk_chars: usize,
    delay: Duration,
) -> Result<()> {
    let chunks = chunk_text(text, chunk_chars);
    tracing::info!(stream = %stream_id, chunks = chunks.len(), "replay started");
    for (index, chunk) in chunks.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        buffers
            .append(stream_id, chunk)
            .with_context(|| format!("failed to append chunk {index}"))?;
    }
    buffers.terminate(stream_id, TerminalReason::Completed);
    Ok(())
}
