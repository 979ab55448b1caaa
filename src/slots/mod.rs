//! Named extension points in block chrome.
//!
//! Feature modules register controls against an `(owner type, slot)` pair.
//! A control sees a read-only [`SlotContext`] and may hand back a callback
//! for the display layer to invoke when the control is activated; it never
//! reaches into the block renderer.

pub mod controls;
mod registry;

pub use registry::{SlotHandle, SlotRegistry};

use crate::render::RenderError;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub const CODEBLOCK_HEADER_ACTIONS: &str = "codeblock-header-actions";
pub const TOOL_CALL_STEP_ACTIONS: &str = "tool-call-step-actions";
pub const SELECTION_ACTIONS: &str = "selection-actions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OwnerType {
    Codeblock,
    ToolCallStep,
    Selection,
}

impl OwnerType {
    /// The slot a display layer decorates by default for this owner.
    pub fn default_slot(self) -> &'static str {
        match self {
            Self::Codeblock => CODEBLOCK_HEADER_ACTIONS,
            Self::ToolCallStep => TOOL_CALL_STEP_ACTIONS,
            Self::Selection => SELECTION_ACTIONS,
        }
    }
}

pub type ActivateFn = Arc<dyn Fn() + Send + Sync>;
pub type EditModeFn = Arc<dyn Fn(bool) + Send + Sync>;

/// What a slot control may read about the thing it decorates.
#[derive(Clone)]
pub struct SlotContext<'a> {
    pub owner: OwnerType,
    pub content: &'a str,
    pub kind: Option<&'a str>,
    pub file_path: Option<&'a str>,
    pub ordinal: usize,
    pub is_trailing: bool,
    pub is_folded: bool,
    pub is_editing: bool,
    pub toggle_fold: ActivateFn,
    pub set_edit_mode: Option<EditModeFn>,
}

/// One rendered control.
#[derive(Clone, Default)]
pub struct SlotControl {
    pub markup: String,
    pub on_activate: Option<ActivateFn>,
}

impl SlotControl {
    pub fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            on_activate: None,
        }
    }

    pub fn on_activate(mut self, callback: ActivateFn) -> Self {
        self.on_activate = Some(callback);
        self
    }
}

/// A control as published to the display layer.
#[derive(Clone, Serialize)]
pub struct SlotOutput {
    pub registration_id: String,
    pub markup: String,
    #[serde(skip)]
    pub on_activate: Option<ActivateFn>,
}

impl SlotOutput {
    /// Invoke the control's callback. Returns false when it has none.
    pub fn activate(&self) -> bool {
        match &self.on_activate {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for SlotOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotOutput")
            .field("registration_id", &self.registration_id)
            .field("markup", &self.markup)
            .field("activatable", &self.on_activate.is_some())
            .finish()
    }
}

impl PartialEq for SlotOutput {
    fn eq(&self, other: &Self) -> bool {
        self.registration_id == other.registration_id && self.markup == other.markup
    }
}

pub trait SlotRenderer: Send + Sync {
    fn render(&self, ctx: &SlotContext<'_>) -> Result<SlotControl, RenderError>;
}

impl<F> SlotRenderer for F
where
    F: Fn(&SlotContext<'_>) -> Result<SlotControl, RenderError> + Send + Sync,
{
    fn render(&self, ctx: &SlotContext<'_>) -> Result<SlotControl, RenderError> {
        self(ctx)
    }
}

type VisibilityFilter = Arc<dyn Fn(&SlotContext<'_>) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct SlotRegistration {
    id: String,
    owner: OwnerType,
    target_slot: String,
    visible_when: Option<VisibilityFilter>,
    renderer: Arc<dyn SlotRenderer>,
}

impl SlotRegistration {
    pub fn new(
        id: impl Into<String>,
        owner: OwnerType,
        target_slot: impl Into<String>,
        renderer: impl SlotRenderer + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            owner,
            target_slot: target_slot.into(),
            visible_when: None,
            renderer: Arc::new(renderer),
        }
    }

    /// Only render when `filter` accepts the context.
    pub fn visible_when(
        mut self,
        filter: impl Fn(&SlotContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.visible_when = Some(Arc::new(filter));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> OwnerType {
        self.owner
    }

    pub fn target_slot(&self) -> &str {
        &self.target_slot
    }

    fn targets(&self, owner: OwnerType, slot: &str) -> bool {
        self.owner == owner && self.target_slot == slot
    }

    fn is_visible(&self, ctx: &SlotContext<'_>) -> bool {
        self.visible_when.as_ref().map_or(true, |filter| filter(ctx))
    }
}

impl fmt::Debug for SlotRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRegistration")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("target_slot", &self.target_slot)
            .finish_non_exhaustive()
    }
}
