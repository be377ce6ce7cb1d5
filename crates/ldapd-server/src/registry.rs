//! In-flight request tracking.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

/// Map from in-flight message id to its cancellation handle.
///
/// The registry holds exactly the requests that have registered and not yet
/// completed. An Abandon that arrives before its target registers finds
/// nothing to cancel; that loss is best-effort per RFC 4511 §4.11, and the
/// late-registering handler then runs to completion.
#[derive(Default)]
pub(crate) struct RequestRegistry {
    inner: Mutex<HashMap<i32, CancellationToken>>,
}

impl RequestRegistry {
    fn table(&self) -> MutexGuard<'_, HashMap<i32, CancellationToken>> {
        self.inner.lock().expect("request registry lock poisoned")
    }

    /// Registers `message_id` and returns its fresh cancellation handle.
    ///
    /// A duplicate in-flight id replaces the previous entry; the earlier
    /// handler keeps running but is no longer addressable by Abandon.
    pub(crate) fn register(&self, message_id: i32) -> CancellationToken {
        let token = CancellationToken::new();
        self.table().insert(message_id, token.clone());
        token
    }

    /// Removes `message_id` without cancelling, on handler completion.
    pub(crate) fn deregister(&self, message_id: i32) {
        self.table().remove(&message_id);
    }

    /// Cancels and removes `message_id`. Returns whether it was registered.
    pub(crate) fn cancel(&self, message_id: i32) -> bool {
        match self.table().remove(&message_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels and removes every registered request.
    pub(crate) fn cancel_all(&self) {
        for (_, token) in self.table().drain() {
            token.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.table().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_fires_only_the_target() {
        let registry = RequestRegistry::default();
        let ten = registry.register(10);
        let eleven = registry.register(11);

        assert!(registry.cancel(10));
        assert!(ten.is_cancelled());
        assert!(!eleven.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn cancel_of_unknown_id_is_a_noop() {
        let registry = RequestRegistry::default();
        assert!(!registry.cancel(99));
    }

    #[test]
    fn deregister_leaves_token_unfired() {
        let registry = RequestRegistry::default();
        let token = registry.register(5);
        registry.deregister(5);
        assert!(!token.is_cancelled());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn cancel_all_drains() {
        let registry = RequestRegistry::default();
        let a = registry.register(1);
        let b = registry.register(2);
        registry.cancel_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert_eq!(registry.len(), 0);
    }
}
