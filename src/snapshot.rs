use parking_lot::RwLock;
use std::sync::Arc;

/// A read-mostly table published as immutable snapshots.
///
/// Readers clone the current `Arc` and never hold the lock while working, so
/// they observe either the table before a mutation or after it.
pub(crate) struct SnapshotCell<T> {
    current: RwLock<Arc<T>>,
}

impl<T: Clone> SnapshotCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    pub(crate) fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    pub(crate) fn update<R>(&self, mutate: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.current.write();
        mutate(Arc::make_mut(&mut guard))
    }
}
