use std::collections::HashMap;

/// Mapping from MQTT packet identifier to a completion callback, consulted
/// on inbound PUBACK/SUBACK/UNSUBACK (§3). Entries are removed on first
/// delivery and the whole table is purged on hard disconnect, so a callback
/// can never fire twice and never fires after a subsequent disconnect
/// (§8, invariant 6).
#[derive(Default)]
pub struct AckRegistry {
    pending: HashMap<u16, Box<dyn FnOnce() + Send>>,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, packet_id: u16, callback: Box<dyn FnOnce() + Send>) {
        self.pending.insert(packet_id, callback);
    }

    /// Remove and return the callback for `packet_id`, if one was bound.
    pub fn take(&mut self, packet_id: u16) -> Option<Box<dyn FnOnce() + Send>> {
        self.pending.remove(&packet_id)
    }

    /// Purge on hard disconnect (§3 invariant): in-flight QoS-1 operations
    /// no longer have a live session to be acked by.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn ack_callback_fires_exactly_once() {
        let mut registry = AckRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        registry.bind(
            1,
            Box::new(move || {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let cb = registry.take(1).expect("callback should be bound");
        cb();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.take(1).is_none());
    }

    #[test]
    fn clear_drops_pending_callbacks_without_invoking_them() {
        let mut registry = AckRegistry::new();
        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked2 = invoked.clone();
        registry.bind(
            7,
            Box::new(move || {
                invoked2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }
}
