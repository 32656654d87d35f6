use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::models::IngestionScope;

/// In-process registry of scopes with a job in flight
#[derive(Clone, Default)]
pub struct ScopeLocks {
    held: Arc<Mutex<HashSet<IngestionScope>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the scope, or returns `None` if it is already held
    pub fn try_acquire(&self, scope: &IngestionScope) -> Option<ScopeGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(scope.clone()) {
            return None;
        }
        Some(ScopeGuard {
            held: Arc::clone(&self.held),
            scope: scope.clone(),
        })
    }

    pub fn is_held(&self, scope: &IngestionScope) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(scope)
    }
}

/// Releases the scope when dropped
pub struct ScopeGuard {
    held: Arc<Mutex<HashSet<IngestionScope>>>,
    scope: IngestionScope,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CloudProvider;

    #[test]
    fn test_scope_is_exclusive_until_guard_drops() {
        let locks = ScopeLocks::new();
        let scope = IngestionScope::new(CloudProvider::Aws, "eu-west-1", "AmazonEC2");
        let other = IngestionScope::new(CloudProvider::Aws, "us-east-1", "AmazonEC2");

        let guard = locks.try_acquire(&scope).unwrap();
        assert!(locks.try_acquire(&scope).is_none());
        assert!(locks.try_acquire(&other).is_some());
        assert!(locks.is_held(&scope));

        drop(guard);
        assert!(!locks.is_held(&scope));
        assert!(locks.try_acquire(&scope).is_some());
    }
}
