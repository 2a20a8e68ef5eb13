#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Serialization point per string key (complaint id, normalized email).
///
/// Slots are created on demand and dropped once no caller holds or waits on them.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.to_string()).or_default())
        };
        let out = {
            let _guard = slot.lock();
            f()
        };
        let mut slots = self.slots.lock();
        // The map and this call are the only holders: nobody else is queued on the key.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
        out
    }

    pub fn active_keys(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn at_locks_01_same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let inside = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        locks.with_lock("c_same", || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                });
            }
        });
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn at_locks_02_slots_are_released_after_use() {
        let locks = KeyedLocks::new();
        let v = locks.with_lock("c_a", || 7);
        assert_eq!(v, 7);
        assert_eq!(locks.active_keys(), 0);
    }
}
