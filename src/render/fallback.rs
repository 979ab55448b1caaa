use super::{BlockRenderContext, BlockRenderer, RenderError, RenderedOutput, RendererRegistration};
use crate::segment::{escape_html, BlockSegment};

pub const FALLBACK_RENDERER_ID: &str = "fallback";

struct RawRenderer;

impl BlockRenderer for RawRenderer {
    fn render(&self, ctx: &BlockRenderContext<'_>) -> Result<RenderedOutput, RenderError> {
        Ok(RenderedOutput::markup(raw_markup(ctx.block, None)))
    }
}

/// Claims every kind at the lowest priority. The registry hands it out when
/// nothing else matches, so it is never stored in the table itself.
pub(super) fn fallback_registration() -> RendererRegistration {
    RendererRegistration::new(FALLBACK_RENDERER_ID, RawRenderer)
        .matching(|_| true)
        .priority(i32::MIN)
}

/// Monospaced raw content under the kind label. `error_label` marks a block
/// whose own renderer failed.
pub fn raw_markup(block: &BlockSegment, error_label: Option<&str>) -> String {
    let mut markup = format!(
        "<div class=\"block block-fallback\" data-kind=\"{kind}\" data-ordinal=\"{ordinal}\">\
         <div class=\"block-kind\">{kind}</div>",
        kind = escape_html(block.kind_label()),
        ordinal = block.ordinal,
    );
    if let Some(label) = error_label {
        markup.push_str(&format!(
            "<div class=\"block-render-error\">{}</div>",
            escape_html(label)
        ));
    }
    markup.push_str(&format!(
        "<pre class=\"block-raw\"><code>{}</code></pre></div>",
        escape_html(&block.raw_content)
    ));
    markup
}
