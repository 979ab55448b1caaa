//! Default code block header controls: copy, download, fold and edit.

use super::{
    OwnerType, SlotContext, SlotControl, SlotHandle, SlotRegistration, SlotRegistry,
    CODEBLOCK_HEADER_ACTIONS,
};
use crate::render::RenderError;
use crate::segment::escape_html;
use std::sync::Arc;

pub const COPY_CONTROL_ID: &str = "copy";
pub const DOWNLOAD_CONTROL_ID: &str = "download";
pub const FOLD_CONTROL_ID: &str = "fold";
pub const EDIT_CONTROL_ID: &str = "edit";

/// Receives text the user asked to copy.
pub type ClipboardSink = Arc<dyn Fn(String) + Send + Sync>;
/// Receives `(file_name, content)` for a download.
pub type DownloadSink = Arc<dyn Fn(String, String) + Send + Sync>;

pub fn copy_control(clipboard: ClipboardSink) -> SlotRegistration {
    SlotRegistration::new(
        COPY_CONTROL_ID,
        OwnerType::Codeblock,
        CODEBLOCK_HEADER_ACTIONS,
        move |ctx: &SlotContext<'_>| -> Result<SlotControl, RenderError> {
            let clipboard = Arc::clone(&clipboard);
            let content = ctx.content.to_string();
            Ok(SlotControl::new(button(COPY_CONTROL_ID, "Copy", ctx.ordinal))
                .on_activate(Arc::new(move || clipboard(content.clone()))))
        },
    )
    .visible_when(|ctx| !ctx.content.is_empty())
}

pub fn download_control(sink: DownloadSink) -> SlotRegistration {
    SlotRegistration::new(
        DOWNLOAD_CONTROL_ID,
        OwnerType::Codeblock,
        CODEBLOCK_HEADER_ACTIONS,
        move |ctx: &SlotContext<'_>| -> Result<SlotControl, RenderError> {
            let sink = Arc::clone(&sink);
            let file_name = download_file_name(ctx.file_path, ctx.kind);
            let content = ctx.content.to_string();
            let markup = button(DOWNLOAD_CONTROL_ID, &format!("Download {file_name}"), ctx.ordinal);
            Ok(SlotControl::new(markup)
                .on_activate(Arc::new(move || sink(file_name.clone(), content.clone()))))
        },
    )
    .visible_when(|ctx| !ctx.is_trailing && !ctx.content.is_empty())
}

pub fn fold_control() -> SlotRegistration {
    SlotRegistration::new(
        FOLD_CONTROL_ID,
        OwnerType::Codeblock,
        CODEBLOCK_HEADER_ACTIONS,
        |ctx: &SlotContext<'_>| -> Result<SlotControl, RenderError> {
            let label = if ctx.is_folded { "Unfold" } else { "Fold" };
            Ok(SlotControl::new(button(FOLD_CONTROL_ID, label, ctx.ordinal))
                .on_activate(Arc::clone(&ctx.toggle_fold)))
        },
    )
}

pub fn edit_control() -> SlotRegistration {
    SlotRegistration::new(
        EDIT_CONTROL_ID,
        OwnerType::Codeblock,
        CODEBLOCK_HEADER_ACTIONS,
        |ctx: &SlotContext<'_>| -> Result<SlotControl, RenderError> {
            let Some(set_edit_mode) = ctx.set_edit_mode.clone() else {
                return Err(RenderError::Fault("edit mode is not available".to_string()));
            };
            let next = !ctx.is_editing;
            let label = if ctx.is_editing { "Done" } else { "Edit" };
            Ok(SlotControl::new(button(EDIT_CONTROL_ID, label, ctx.ordinal))
                .on_activate(Arc::new(move || set_edit_mode(next))))
        },
    )
    .visible_when(|ctx| ctx.set_edit_mode.is_some() && !ctx.is_trailing)
}

/// Register fold and edit, plus copy and download when sinks are given.
pub fn register_default_controls(
    registry: &SlotRegistry,
    clipboard: Option<ClipboardSink>,
    downloads: Option<DownloadSink>,
) -> Vec<SlotHandle> {
    let mut handles = Vec::new();
    if let Some(clipboard) = clipboard {
        handles.push(registry.register(copy_control(clipboard)));
    }
    if let Some(downloads) = downloads {
        handles.push(registry.register(download_control(downloads)));
    }
    handles.push(registry.register(fold_control()));
    handles.push(registry.register(edit_control()));
    handles
}

fn button(action: &str, label: &str, ordinal: usize) -> String {
    format!(
        "<button class=\"block-action\" data-action=\"{action}\" data-ordinal=\"{ordinal}\">{}</button>",
        escape_html(label)
    )
}

fn download_file_name(file_path: Option<&str>, kind: Option<&str>) -> String {
    if let Some(name) = file_path
        .and_then(|path| path.rsplit(['/', '\\']).next())
        .filter(|name| !name.is_empty())
    {
        return name.to_string();
    }
    format!("snippet.{}", extension_for_kind(kind))
}

fn extension_for_kind(kind: Option<&str>) -> &'static str {
    match kind.map(str::to_ascii_lowercase).as_deref() {
        Some("rust" | "rs") => "rs",
        Some("python" | "py") => "py",
        Some("javascript" | "js") => "js",
        Some("typescript" | "ts") => "ts",
        Some("json" | "chart" | "flow" | "workflow") => "json",
        Some("bash" | "sh" | "shell") => "sh",
        Some("html") => "html",
        Some("css") => "css",
        Some("markdown" | "md") => "md",
        Some("yaml" | "yml") => "yaml",
        Some("toml") => "toml",
        Some("mermaid") => "mmd",
        _ => "txt",
    }
}
