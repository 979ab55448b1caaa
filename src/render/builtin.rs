//! Renderers registered by default: plain code for any kind and a
//! structural renderer for JSON-based kinds.

use super::{
    BlockRenderContext, BlockRenderer, Diagnostic, DiagnosticKind, RenderError, RenderedOutput,
    RendererHandle, RendererRegistration, RendererRegistry,
};
use crate::completeness::{assess, StructuralOutcome};
use crate::config::RenderConfig;
use crate::segment::{escape_html, BlockSegment};

pub const CODE_RENDERER_ID: &str = "code";
pub const STRUCTURAL_RENDERER_ID: &str = "structural";

const CODE_PRIORITY: i32 = 0;
const STRUCTURAL_PRIORITY: i32 = 10;
const FOLDED_PREVIEW_LINES: usize = 4;

pub fn register_builtins(registry: &RendererRegistry, config: &RenderConfig) -> Vec<RendererHandle> {
    vec![
        registry.register(
            RendererRegistration::new(CODE_RENDERER_ID, CodeRenderer)
                .matching(|_| true)
                .priority(CODE_PRIORITY),
        ),
        registry.register(
            RendererRegistration::new(STRUCTURAL_RENDERER_ID, StructuralRenderer)
                .for_kinds(config.structural_kinds.clone())
                .priority(STRUCTURAL_PRIORITY),
        ),
    ]
}

pub struct CodeRenderer;

impl BlockRenderer for CodeRenderer {
    fn render(&self, ctx: &BlockRenderContext<'_>) -> Result<RenderedOutput, RenderError> {
        let block = ctx.block;
        let mut markup = open_block(ctx, "block-code");
        if let Some(path) = block.file_path() {
            markup.push_str(&format!(
                "<div class=\"block-file\">{}</div>",
                escape_html(path)
            ));
        }
        markup.push_str(&content_body(ctx));
        markup.push_str("</div>");
        Ok(RenderedOutput::markup(markup))
    }
}

/// Renders JSON-based kinds through the completeness policy: raw content
/// while waiting, the parsed payload once complete, and an inline error for
/// a closed block that does not parse.
pub struct StructuralRenderer;

impl BlockRenderer for StructuralRenderer {
    fn render(&self, ctx: &BlockRenderContext<'_>) -> Result<RenderedOutput, RenderError> {
        let block = ctx.block;
        match assess(block.kind(), &block.raw_content, block.is_trailing) {
            StructuralOutcome::Pending(reason) => {
                let mut markup = open_block(ctx, "block-structural block-pending");
                markup.push_str(&content_body(ctx));
                markup.push_str("</div>");
                tracing::trace!(ordinal = block.ordinal, ?reason, "structural block pending");
                Ok(RenderedOutput::markup(markup))
            }
            StructuralOutcome::Parsed(payload) => {
                let pretty = serde_json::to_string_pretty(&payload)
                    .map_err(|err| RenderError::Fault(err.to_string()))?;
                let mut markup = open_block(ctx, "block-structural");
                if is_editable(ctx) {
                    markup.push_str(&editor_body(block));
                } else {
                    markup.push_str(&format!(
                        "<pre class=\"structural-payload\"><code>{}</code></pre>",
                        escape_html(&pretty)
                    ));
                }
                markup.push_str("</div>");
                Ok(RenderedOutput {
                    markup,
                    payload: Some(payload),
                    diagnostic: None,
                })
            }
            StructuralOutcome::Invalid(err) => {
                let message = err.to_string();
                tracing::warn!(
                    ordinal = block.ordinal,
                    kind = block.kind_label(),
                    error = %message,
                    "structural block invalid"
                );
                let mut markup = open_block(ctx, "block-structural block-invalid");
                markup.push_str(&content_body(ctx));
                markup.push_str(&format!(
                    "<div class=\"block-error structural-invalid\">{}</div></div>",
                    escape_html(&message)
                ));
                Ok(RenderedOutput {
                    markup,
                    payload: None,
                    diagnostic: Some(Diagnostic {
                        kind: DiagnosticKind::StructuralInvalid,
                        message,
                    }),
                })
            }
        }
    }
}

fn open_block(ctx: &BlockRenderContext<'_>, class: &str) -> String {
    let block = ctx.block;
    format!(
        "<div class=\"block {class}\" data-kind=\"{kind}\" data-ordinal=\"{ordinal}\" \
         data-trailing=\"{trailing}\" data-folded=\"{folded}\" data-editing=\"{editing}\">",
        kind = escape_html(block.kind_label()),
        ordinal = block.ordinal,
        trailing = block.is_trailing,
        folded = ctx.folded,
        editing = is_editable(ctx),
    )
}

// A block that is still streaming cannot be edited.
fn is_editable(ctx: &BlockRenderContext<'_>) -> bool {
    ctx.editing && !ctx.block.is_trailing
}

fn content_body(ctx: &BlockRenderContext<'_>) -> String {
    if is_editable(ctx) {
        editor_body(ctx.block)
    } else {
        code_body(ctx.block, ctx.folded)
    }
}

/// Full raw content in an editable surface; folding does not apply.
fn editor_body(block: &BlockSegment) -> String {
    format!(
        "<textarea class=\"block-editor\" data-ordinal=\"{ordinal}\" data-kind=\"{kind}\" spellcheck=\"false\">{content}</textarea>",
        ordinal = block.ordinal,
        kind = escape_html(block.kind_label()),
        content = escape_html(&block.raw_content),
    )
}

fn code_body(block: &BlockSegment, folded: bool) -> String {
    let language = escape_html(block.kind_label());
    let body = if folded {
        fold_preview(&block.raw_content)
    } else {
        block.raw_content.clone()
    };
    format!(
        "<pre><code class=\"language-{language}\">{}</code></pre>",
        escape_html(&body)
    )
}

/// First few lines of `content` followed by a count of hidden lines.
fn fold_preview(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= FOLDED_PREVIEW_LINES {
        return content.to_string();
    }
    let hidden = lines.len() - FOLDED_PREVIEW_LINES;
    let mut preview = lines[..FOLDED_PREVIEW_LINES].join("\n");
    preview.push_str(&format!("\n... (+{hidden} more lines)"));
    preview
}
