//! One flush: segment a snapshot, render each segment, decorate block chrome.

use crate::config::RenderConfig;
use crate::render::builtin::register_builtins;
use crate::render::fallback::raw_markup;
use crate::render::{
    BlockRenderContext, Diagnostic, DiagnosticKind, RenderError, RenderedOutput, RendererRegistry,
};
use crate::segment::{parse_with, BlockSegment, ParseMode, Segment};
use crate::slots::controls::{register_default_controls, ClipboardSink, DownloadSink};
use crate::slots::{EditModeFn, OwnerType, SlotContext, SlotOutput, SlotRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

const RENDER_ERROR_LABEL: &str = "render error";

/// Stable display key: block ordinal, or index among prose segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKey {
    Prose(usize),
    Block(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderInstruction {
    pub key: RenderKey,
    pub range: Range<usize>,
    pub body: RenderedOutput,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decorations: Vec<SlotOutput>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BlockChrome {
    folded: bool,
    editing: bool,
}

/// Per-stream fold and edit state, keyed by block ordinal. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ChromeState {
    blocks: Arc<Mutex<HashMap<usize, BlockChrome>>>,
}

impl ChromeState {
    pub fn is_folded(&self, ordinal: usize) -> bool {
        self.get(ordinal).folded
    }

    pub fn is_editing(&self, ordinal: usize) -> bool {
        self.get(ordinal).editing
    }

    pub fn toggle_fold(&self, ordinal: usize) {
        let mut blocks = self.blocks.lock();
        let chrome = blocks.entry(ordinal).or_default();
        chrome.folded = !chrome.folded;
    }

    pub fn set_editing(&self, ordinal: usize, editing: bool) {
        self.blocks.lock().entry(ordinal).or_default().editing = editing;
    }

    fn get(&self, ordinal: usize) -> BlockChrome {
        self.blocks.lock().get(&ordinal).copied().unwrap_or_default()
    }
}

/// The renderer and slot tables shared by every stream.
#[derive(Clone, Default)]
pub struct RenderPipeline {
    renderers: RendererRegistry,
    slots: SlotRegistry,
}

impl RenderPipeline {
    pub fn new(renderers: RendererRegistry, slots: SlotRegistry) -> Self {
        Self { renderers, slots }
    }

    /// Built-in renderers plus the default header controls.
    pub fn with_builtins(
        config: &RenderConfig,
        clipboard: Option<ClipboardSink>,
        downloads: Option<DownloadSink>,
    ) -> Self {
        let pipeline = Self::default();
        register_builtins(&pipeline.renderers, config);
        register_default_controls(&pipeline.slots, clipboard, downloads);
        pipeline
    }

    pub fn renderers(&self) -> &RendererRegistry {
        &self.renderers
    }

    pub fn slots(&self) -> &SlotRegistry {
        &self.slots
    }

    /// Render a full snapshot. Never fails: faults stay on the block that
    /// caused them.
    pub fn render_snapshot(
        &self,
        snapshot: &str,
        mode: ParseMode,
        chrome: &ChromeState,
    ) -> Vec<RenderInstruction> {
        let mut prose_index = 0;
        parse_with(snapshot, mode)
            .into_iter()
            .map(|segment| match segment {
                Segment::Prose(prose) => {
                    let key = RenderKey::Prose(prose_index);
                    prose_index += 1;
                    RenderInstruction {
                        key,
                        range: prose.range,
                        body: RenderedOutput::markup(prose.rendered_markup),
                        decorations: Vec::new(),
                    }
                }
                Segment::Block(block) => self.render_block(&block, chrome),
            })
            .collect()
    }

    fn render_block(&self, block: &BlockSegment, chrome: &ChromeState) -> RenderInstruction {
        let folded = chrome.is_folded(block.ordinal);
        let editing = chrome.is_editing(block.ordinal);
        let ctx = BlockRenderContext {
            block,
            folded,
            editing,
        };

        // Resolved fresh on every pass so a removed renderer is never reused.
        let registration = self.renderers.resolve(block.kind());
        let rendered = panic::catch_unwind(AssertUnwindSafe(|| registration.render(&ctx)))
            .unwrap_or_else(|payload| Err(RenderError::Panicked(panic_message(payload.as_ref()))));

        let body = rendered.unwrap_or_else(|err| {
            tracing::warn!(
                renderer = registration.id(),
                ordinal = block.ordinal,
                error = %err,
                "block renderer failed, using raw fallback"
            );
            RenderedOutput {
                markup: raw_markup(block, Some(RENDER_ERROR_LABEL)),
                payload: None,
                diagnostic: Some(Diagnostic {
                    kind: DiagnosticKind::RendererFault,
                    message: err.to_string(),
                }),
            }
        });

        RenderInstruction {
            key: RenderKey::Block(block.ordinal),
            range: block.range.clone(),
            body,
            decorations: self.decorate(block, folded, editing, chrome),
        }
    }

    fn decorate(
        &self,
        block: &BlockSegment,
        folded: bool,
        editing: bool,
        chrome: &ChromeState,
    ) -> Vec<SlotOutput> {
        let ordinal = block.ordinal;
        let fold_state = chrome.clone();
        let edit_state = chrome.clone();
        let set_edit_mode: EditModeFn =
            Arc::new(move |editing: bool| edit_state.set_editing(ordinal, editing));

        let ctx = SlotContext {
            owner: OwnerType::Codeblock,
            content: &block.raw_content,
            kind: block.kind(),
            file_path: block.file_path(),
            ordinal,
            is_trailing: block.is_trailing,
            is_folded: folded,
            is_editing: editing,
            toggle_fold: Arc::new(move || fold_state.toggle_fold(ordinal)),
            set_edit_mode: Some(set_edit_mode),
        };
        self.slots
            .resolve_all(OwnerType::Codeblock, OwnerType::Codeblock.default_slot(), &ctx)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RendererRegistration;
    use crate::slots::controls::FOLD_CONTROL_ID;

    fn pipeline() -> RenderPipeline {
        RenderPipeline::with_builtins(&RenderConfig::default(), None, None)
    }

    #[test]
    fn test_prose_and_blocks_get_stable_keys() {
        let text = "one\n```rust\nfn a() {}\n```\ntwo\n```json\n{}\n```\nthree";
        let instructions = pipeline().render_snapshot(text, ParseMode::Streaming, &ChromeState::default());
        let keys: Vec<RenderKey> = instructions.iter().map(|i| i.key).collect();
        assert_eq!(
            keys,
            vec![
                RenderKey::Prose(0),
                RenderKey::Block(0),
                RenderKey::Prose(1),
                RenderKey::Block(1),
                RenderKey::Prose(2),
            ]
        );
        assert!(instructions[0].decorations.is_empty());
        assert!(!instructions[1].decorations.is_empty());
    }

    #[test]
    fn test_panicking_renderer_falls_back_per_block() {
        let pipeline = pipeline();
        pipeline.renderers().register(
            RendererRegistration::new(
                "exploding",
                |_: &BlockRenderContext<'_>| -> Result<RenderedOutput, RenderError> { panic!("chart bug") },
            )
            .for_kinds(["chart"])
            .priority(100),
        );

        let text = "before\n```chart\n{}\n```\nafter";
        let instructions = pipeline.render_snapshot(text, ParseMode::Final, &ChromeState::default());
        assert_eq!(instructions.len(), 3);
        let body = &instructions[1].body;
        assert!(body.markup.contains("block-render-error"));
        let diagnostic = body.diagnostic.as_ref().expect("diagnostic");
        assert_eq!(diagnostic.kind, DiagnosticKind::RendererFault);
        assert!(diagnostic.message.contains("chart bug"));
        assert!(instructions[2].body.markup.contains("after"));
    }

    #[test]
    fn test_fold_toggle_applies_on_next_render() {
        let pipeline = pipeline();
        let chrome = ChromeState::default();
        let text = "```txt\n1\n2\n3\n4\n5\n6\n```";

        let first = pipeline.render_snapshot(text, ParseMode::Final, &chrome);
        let fold = first[0]
            .decorations
            .iter()
            .find(|d| d.registration_id == FOLD_CONTROL_ID)
            .expect("fold control");
        assert!(fold.activate());
        assert!(chrome.is_folded(0));

        let second = pipeline.render_snapshot(text, ParseMode::Final, &chrome);
        assert!(second[0].body.markup.contains("(+2 more lines)"));
        assert!(second[0].decorations.iter().any(|d| d.markup.contains(">Unfold<")));
    }

    #[test]
    fn test_edit_control_updates_chrome_state() {
        let pipeline = pipeline();
        let chrome = ChromeState::default();
        let rendered = pipeline.render_snapshot("```sh\nls\n```", ParseMode::Final, &chrome);
        let edit = rendered[0]
            .decorations
            .iter()
            .find(|d| d.registration_id == crate::slots::controls::EDIT_CONTROL_ID)
            .expect("edit control");
        edit.activate();
        assert!(chrome.is_editing(0));
    }
}
