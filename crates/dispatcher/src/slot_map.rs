//! Type-erased, type-id keyed storage for registry slots

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Default)]
pub(crate) struct SlotMap {
    slots: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl SlotMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The slot stored under `key`, if any
    pub(crate) fn get<T: Any + Send + Sync>(&self, key: TypeId) -> Option<Arc<T>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(&key).cloned().map(downcast)
    }

    /// The slot stored under `key`, created with `init` on first use
    pub(crate) fn get_or_insert_with<T, F>(&self, key: TypeId, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(slot) = self.get(key) {
            return slot;
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots
            .entry(key)
            .or_insert_with(|| Arc::new(init()) as Arc<dyn Any + Send + Sync>)
            .clone();
        downcast(slot)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Every key is only ever used with one slot type
fn downcast<T: Any + Send + Sync>(slot: Arc<dyn Any + Send + Sync>) -> Arc<T> {
    match slot.downcast::<T>() {
        Ok(slot) => slot,
        Err(_) => unreachable!("slot stored under a foreign type id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct KeyA;
    struct KeyB;

    #[test]
    fn test_insert_once() {
        let map = SlotMap::new();
        let inits = AtomicUsize::new(0);
        let a1 = map.get_or_insert_with(TypeId::of::<KeyA>(), || {
            inits.fetch_add(1, Ordering::SeqCst);
            AtomicUsize::new(5)
        });
        let a2 = map.get_or_insert_with(TypeId::of::<KeyA>(), || {
            inits.fetch_add(1, Ordering::SeqCst);
            AtomicUsize::new(9)
        });
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(a2.load(Ordering::SeqCst), 5);
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let map = SlotMap::new();
        assert!(map.get::<String>(TypeId::of::<KeyA>()).is_none());
        map.get_or_insert_with(TypeId::of::<KeyA>(), || String::from("a"));
        map.get_or_insert_with(TypeId::of::<KeyB>(), || String::from("b"));
        assert_eq!(map.len(), 2);
        assert_eq!(*map.get::<String>(TypeId::of::<KeyB>()).unwrap(), "b");
    }
}
