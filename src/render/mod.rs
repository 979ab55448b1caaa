//! Block renderers and the registry that picks one per block kind.

pub mod builtin;
pub mod fallback;
mod registry;

pub use registry::{RendererHandle, RendererRegistry};

use crate::completeness::StructuralPayload;
use crate::segment::BlockSegment;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RenderedOutput {
    pub markup: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<StructuralPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

impl RenderedOutput {
    pub fn markup(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            ..Self::default()
        }
    }
}

/// A failure contained to one block, shown next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    StructuralInvalid,
    RendererFault,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("renderer failed: {0}")]
    Fault(String),
    #[error("renderer panicked: {0}")]
    Panicked(String),
}

pub struct BlockRenderContext<'a> {
    pub block: &'a BlockSegment,
    pub folded: bool,
    pub editing: bool,
}

pub trait BlockRenderer: Send + Sync {
    fn render(&self, ctx: &BlockRenderContext<'_>) -> Result<RenderedOutput, RenderError>;
}

impl<F> BlockRenderer for F
where
    F: Fn(&BlockRenderContext<'_>) -> Result<RenderedOutput, RenderError> + Send + Sync,
{
    fn render(&self, ctx: &BlockRenderContext<'_>) -> Result<RenderedOutput, RenderError> {
        self(ctx)
    }
}

type KindMatcher = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// A renderer offered by a feature module, with the kinds it claims and its
/// priority against other claimants.
#[derive(Clone)]
pub struct RendererRegistration {
    id: String,
    priority: i32,
    matcher: KindMatcher,
    renderer: Arc<dyn BlockRenderer>,
}

impl RendererRegistration {
    /// A registration that claims no kinds until `for_kinds` or `matching`.
    pub fn new(id: impl Into<String>, renderer: impl BlockRenderer + 'static) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            matcher: Arc::new(|_: Option<&str>| false),
            renderer: Arc::new(renderer),
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Claim the listed kinds, compared case-insensitively.
    pub fn for_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kinds: Vec<String> = kinds.into_iter().map(Into::into).collect();
        self.matcher = Arc::new(move |kind: Option<&str>| {
            kind.is_some_and(|kind| kinds.iter().any(|k| k.eq_ignore_ascii_case(kind)))
        });
        self
    }

    pub fn matching(mut self, matcher: impl Fn(Option<&str>) -> bool + Send + Sync + 'static) -> Self {
        self.matcher = Arc::new(matcher);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn priority_value(&self) -> i32 {
        self.priority
    }

    pub fn can_handle(&self, kind: Option<&str>) -> bool {
        (self.matcher)(kind)
    }

    pub fn render(&self, ctx: &BlockRenderContext<'_>) -> Result<RenderedOutput, RenderError> {
        self.renderer.render(ctx)
    }
}

impl fmt::Debug for RendererRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererRegistration")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
