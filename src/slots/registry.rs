use super::{OwnerType, SlotContext, SlotOutput, SlotRegistration};
use crate::snapshot::SnapshotCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Clone)]
struct Entry {
    seq: u64,
    registration: Arc<SlotRegistration>,
}

struct RegistryInner {
    entries: SnapshotCell<Vec<Entry>>,
    next_seq: AtomicU64,
}

/// Process-wide table of slot controls, kept in registration order.
#[derive(Clone)]
pub struct SlotRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for SlotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: SnapshotCell::new(Vec::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Add a control. An existing registration with the same id is replaced
    /// and moves to the end of the order.
    pub fn register(&self, registration: SlotRegistration) -> SlotHandle {
        let id = registration.id().to_string();
        let registration = Arc::new(registration);
        // Allocated under the write lock so order in the table matches seq.
        let seq = self.inner.entries.update(|entries| {
            let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
            entries.retain(|existing| existing.registration.id() != id);
            entries.push(Entry { seq, registration });
            seq
        });
        tracing::debug!(control = %id, "slot control registered");

        SlotHandle {
            id,
            seq,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.inner.entries.update(|entries| {
            let before = entries.len();
            entries.retain(|entry| entry.registration.id() != id);
            entries.len() != before
        })
    }

    /// Render every visible control for the slot, in registration order.
    /// A control that fails or panics is skipped; the others still render.
    pub fn resolve_all(&self, owner: OwnerType, slot: &str, ctx: &SlotContext<'_>) -> Vec<SlotOutput> {
        let entries = self.inner.entries.load();
        entries
            .iter()
            .map(|entry| &entry.registration)
            .filter(|registration| registration.targets(owner, slot))
            .filter_map(|registration| {
                // The filter is feature code too; it panics in the same scope.
                let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
                    registration
                        .is_visible(ctx)
                        .then(|| registration.renderer.render(ctx))
                }));
                match rendered {
                    Ok(None) => None,
                    Ok(Some(Ok(control))) => Some(SlotOutput {
                        registration_id: registration.id().to_string(),
                        markup: control.markup,
                        on_activate: control.on_activate,
                    }),
                    Ok(Some(Err(err))) => {
                        tracing::warn!(control = registration.id(), error = %err, "slot control failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(control = registration.id(), "slot control panicked");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returned by [`SlotRegistry::register`]; removes only the registration it
/// created.
#[derive(Debug)]
pub struct SlotHandle {
    id: String,
    seq: u64,
    registry: Weak<RegistryInner>,
}

impl SlotHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn unregister(&self) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        inner
            .entries
            .update(|entries| entries.retain(|entry| entry.seq != self.seq));
    }
}
