use super::fallback::fallback_registration;
use super::RendererRegistration;
use crate::snapshot::SnapshotCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Clone)]
struct Entry {
    seq: u64,
    registration: Arc<RendererRegistration>,
}

struct RegistryInner {
    table: SnapshotCell<HashMap<String, Entry>>,
    next_seq: AtomicU64,
    fallback: Arc<RendererRegistration>,
}

/// Process-wide map from block kind to renderer.
///
/// Resolution is recomputed on every call; callers must not cache the result
/// across render passes.
#[derive(Clone)]
pub struct RendererRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                table: SnapshotCell::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                fallback: Arc::new(fallback_registration()),
            }),
        }
    }

    /// Add or replace the registration with this id. Replacing counts as a
    /// fresh registration for tie-breaking.
    pub fn register(&self, registration: RendererRegistration) -> RendererHandle {
        let id = registration.id().to_string();
        let registration = Arc::new(registration);
        // Allocated under the write lock so tie-breaks follow table order.
        let (seq, replaced) = self.inner.table.update(|table| {
            let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
            let replaced = table.insert(id.clone(), Entry { seq, registration }).is_some();
            (seq, replaced)
        });
        tracing::debug!(renderer = %id, replaced, "renderer registered");

        RendererHandle {
            id,
            seq,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a registration by id. Unknown ids are ignored.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.inner.table.update(|table| table.remove(id).is_some());
        if removed {
            tracing::debug!(renderer = %id, "renderer unregistered");
        }
        removed
    }

    /// Highest-priority registration claiming `kind`; among equal priorities
    /// the earliest registration wins. Falls back to the raw renderer.
    pub fn resolve(&self, kind: Option<&str>) -> Arc<RendererRegistration> {
        let table = self.inner.table.load();
        table
            .values()
            .filter(|entry| claims(&entry.registration, kind))
            .max_by(|a, b| {
                a.registration
                    .priority_value()
                    .cmp(&b.registration.priority_value())
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|entry| Arc::clone(&entry.registration))
            .unwrap_or_else(|| self.fallback())
    }

    pub fn fallback(&self) -> Arc<RendererRegistration> {
        Arc::clone(&self.inner.fallback)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.table.load().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A matcher that panics is treated as not claiming the kind.
fn claims(registration: &RendererRegistration, kind: Option<&str>) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| registration.can_handle(kind))) {
        Ok(claimed) => claimed,
        Err(_) => {
            tracing::warn!(renderer = registration.id(), ?kind, "renderer kind matcher panicked");
            false
        }
    }
}

/// Returned by [`RendererRegistry::register`]. Unregistering through the
/// handle only removes the registration it created, so a later
/// re-registration under the same id survives.
#[derive(Debug)]
pub struct RendererHandle {
    id: String,
    seq: u64,
    registry: Weak<RegistryInner>,
}

impl RendererHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn unregister(&self) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        inner.table.update(|table| {
            if table.get(&self.id).is_some_and(|entry| entry.seq == self.seq) {
                table.remove(&self.id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::fallback::FALLBACK_RENDERER_ID;
    use crate::render::{BlockRenderContext, RenderError, RenderedOutput};

    fn fixed(markup: &'static str) -> impl Fn(&BlockRenderContext<'_>) -> Result<RenderedOutput, RenderError> {
        move |_| Ok(RenderedOutput::markup(markup))
    }

    #[test]
    fn test_resolve_falls_back_for_unknown_and_empty_kinds() {
        let registry = RendererRegistry::new();
        registry.register(RendererRegistration::new("chart", fixed("chart")).for_kinds(["chart"]));

        for kind in [None, Some(""), Some("mermaid"), Some("chartx")] {
            assert_eq!(registry.resolve(kind).id(), FALLBACK_RENDERER_ID, "kind {kind:?}");
        }
        assert_eq!(registry.resolve(Some("CHART")).id(), "chart");
    }

    #[test]
    fn test_higher_priority_wins() {
        let registry = RendererRegistry::new();
        registry.register(RendererRegistration::new("code", fixed("code")).matching(|_| true));
        registry.register(
            RendererRegistration::new("json", fixed("json"))
                .for_kinds(["json"])
                .priority(10),
        );
        assert_eq!(registry.resolve(Some("json")).id(), "json");
        assert_eq!(registry.resolve(Some("rust")).id(), "code");
    }

    #[test]
    fn test_equal_priority_first_registered_wins() {
        let registry = RendererRegistry::new();
        registry.register(RendererRegistration::new("first", fixed("a")).for_kinds(["chart"]));
        registry.register(RendererRegistration::new("second", fixed("b")).for_kinds(["chart"]));
        assert_eq!(registry.resolve(Some("chart")).id(), "first");

        registry.register(RendererRegistration::new("first", fixed("a2")).for_kinds(["chart"]));
        assert_eq!(
            registry.resolve(Some("chart")).id(),
            "second",
            "re-registering moves an id behind earlier registrations"
        );
    }

    #[test]
    fn test_panicking_matcher_does_not_claim_kind() {
        let registry = RendererRegistry::new();
        registry.register(RendererRegistration::new("code", fixed("code")).matching(|_| true));
        registry.register(
            RendererRegistration::new("mermaid", fixed("m"))
                .matching(|kind| if kind == Some("mermaid") { panic!("matcher bug") } else { false })
                .priority(50),
        );
        assert_eq!(registry.resolve(Some("mermaid")).id(), "code");
        assert_eq!(registry.resolve(Some("rust")).id(), "code");
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = RendererRegistry::new();
        let handle = registry.register(RendererRegistration::new("chart", fixed("c")).for_kinds(["chart"]));
        handle.unregister();
        handle.unregister();
        assert!(!registry.unregister("chart"));
        assert!(!registry.unregister("never-registered"));
        assert_eq!(registry.resolve(Some("chart")).id(), FALLBACK_RENDERER_ID);
    }

    #[test]
    fn test_stale_handle_does_not_remove_replacement() {
        let registry = RendererRegistry::new();
        let old = registry.register(RendererRegistration::new("chart", fixed("v1")).for_kinds(["chart"]));
        registry.register(RendererRegistration::new("chart", fixed("v2")).for_kinds(["chart"]));
        old.unregister();
        assert!(registry.contains("chart"));
    }

    #[test]
    fn test_concurrent_registration_and_resolution() {
        let registry = RendererRegistry::new();
        let writers: Vec<_> = (0..4)
            .map(|n| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for round in 0..200 {
                        let id = format!("r{n}-{round}");
                        let handle = registry
                            .register(RendererRegistration::new(id, fixed("x")).for_kinds(["chart"]));
                        handle.unregister();
                    }
                })
            })
            .collect();
        let reader = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    let resolved = registry.resolve(Some("chart"));
                    assert!(!resolved.id().is_empty());
                }
            })
        };
        for writer in writers {
            writer.join().expect("writer");
        }
        reader.join().expect("reader");
        assert!(registry.is_empty());
    }
}
