//! Resource-scoped reader/writer locks owned by the coordinator.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Idle lock entries are pruned once the table grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

/// Guard held for the duration of one handler execution.
#[derive(Debug)]
pub enum ResourceGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

/// Table of per-resource locks, created on first use.
///
/// A lock path is acquired outermost first. Every scope except the last is
/// taken shared; the last is taken exclusive for mutating tools and shared for
/// read-only ones. So a write to `kv/users` excludes other access to
/// `kv/users` and any whole-`kv` writer, but runs alongside a write to
/// `kv/orders`.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, path: &[String], exclusive: bool) -> Vec<ResourceGuard> {
        let mut guards = Vec::with_capacity(path.len());
        for (index, scope) in path.iter().enumerate() {
            let lock = self.lock_for(scope);
            let is_last = index + 1 == path.len();
            let guard = if exclusive && is_last {
                ResourceGuard::Exclusive(lock.write_owned().await)
            } else {
                ResourceGuard::Shared(lock.read_owned().await)
            };
            guards.push(guard);
        }
        guards
    }

    fn lock_for(&self, scope: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        if locks.len() > PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
