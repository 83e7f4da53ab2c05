//! Liveness tracking for objects handed to deferred callbacks.
//!
//! Anything that gives a callback to asynchronous machinery registers the object the callback
//! refers to and keeps only the returned [`CallbackToken`]. When the callback eventually runs it
//! has to go through [`CallbackRegistry::upgrade`], which yields the object only if it is still
//! alive and the token has not been released.
//!
//! The registry holds [`Weak`] references, so it never keeps an object alive. Each slot carries
//! a generation that is bumped on [`unregister`](CallbackRegistry::unregister), so a stale token
//! can never observe an object registered later into the same slot.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};

type Erased = dyn Any + Send + Sync;

/// A typed handle to an object in a [`CallbackRegistry`].
///
/// Releasing a token invalidates all of its clones.
pub struct CallbackToken<T> {
    index: usize,
    generation: u64,
    _type: PhantomData<fn() -> T>,
}

impl<T> Clone for CallbackToken<T> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            generation: self.generation,
            _type: PhantomData,
        }
    }
}

impl<T> fmt::Debug for CallbackToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackToken")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> PartialEq for CallbackToken<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for CallbackToken<T> {}

#[derive(Debug)]
struct Slot {
    generation: u64,
    object: Option<Weak<Erased>>,
}

#[derive(Debug, Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

/// The registry of objects that deferred callbacks may refer to.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    inner: Mutex<Slots>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `object`, returning a token that deferred callbacks hold instead of the object.
    pub fn register<T: Any + Send + Sync>(&self, object: &Arc<T>) -> CallbackToken<T> {
        let erased: Arc<Erased> = object.clone();
        let weak = Arc::downgrade(&erased);

        let mut inner = self.inner.lock().unwrap();
        let index = match inner.free.pop() {
            Some(index) => {
                inner.slots[index].object = Some(weak);
                index
            }
            None => {
                inner.slots.push(Slot {
                    generation: 0,
                    object: Some(weak),
                });
                inner.slots.len() - 1
            }
        };

        CallbackToken {
            index,
            generation: inner.slots[index].generation,
            _type: PhantomData,
        }
    }

    /// Whether `token` still denotes a live object.
    ///
    /// This is `false` once the token was unregistered, or once the object was dropped.
    pub fn is_live<T>(&self, token: &CallbackToken<T>) -> bool {
        let inner = self.inner.lock().unwrap();
        Self::slot_object(&inner, token).is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Returns the object behind `token`, if it is still alive.
    ///
    /// Deferred callbacks must call this immediately before touching the object, and do nothing
    /// when it returns `None`.
    pub fn upgrade<T: Any + Send + Sync>(&self, token: &CallbackToken<T>) -> Option<Arc<T>> {
        let object = {
            let inner = self.inner.lock().unwrap();
            Self::slot_object(&inner, token)?.upgrade()?
        };
        object.downcast::<T>().ok()
    }

    /// Releases `token`. Its slot may be reused by a later registration.
    pub fn unregister<T>(&self, token: CallbackToken<T>) {
        let mut inner = self.inner.lock().unwrap();
        let Some(slot) = inner.slots.get_mut(token.index) else {
            return;
        };
        if slot.generation != token.generation || slot.object.is_none() {
            return;
        }
        slot.object = None;
        slot.generation += 1;
        inner.free.push(token.index);
    }

    /// The number of registrations that have not been released yet.
    ///
    /// This includes registrations whose object has already been dropped.
    pub fn registered(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.slots.len() - inner.free.len()
    }

    fn slot_object<'a, T>(inner: &'a Slots, token: &CallbackToken<T>) -> Option<&'a Weak<Erased>> {
        let slot = inner.slots.get(token.index)?;
        if slot.generation != token.generation {
            return None;
        }
        slot.object.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_object() {
        let registry = CallbackRegistry::new();
        let object = Arc::new(Mutex::new(42u32));

        let token = registry.register(&object);
        assert!(registry.is_live(&token));
        assert_eq!(*registry.upgrade(&token).unwrap().lock().unwrap(), 42);
        assert_eq!(registry.registered(), 1);
    }

    #[test]
    fn test_dropped_object() {
        let registry = CallbackRegistry::new();
        let object = Arc::new(String::from("cursor"));

        let token = registry.register(&object);
        drop(object);

        assert!(!registry.is_live(&token));
        assert!(registry.upgrade(&token).is_none());

        // the slot is still held until the token is released
        assert_eq!(registry.registered(), 1);
        registry.unregister(token);
        assert_eq!(registry.registered(), 0);
    }

    #[test]
    fn test_unregistered_token() {
        let registry = CallbackRegistry::new();
        let object = Arc::new(1u8);

        let token = registry.register(&object);
        let stale = token.clone();
        registry.unregister(token);

        assert!(!registry.is_live(&stale));
        assert!(registry.upgrade(&stale).is_none());
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let registry = CallbackRegistry::new();
        let first = Arc::new(1u32);
        let second = Arc::new(2u32);

        let token = registry.register(&first);
        let stale = token.clone();
        registry.unregister(token);

        let reused = registry.register(&second);
        assert_eq!(reused.index, stale.index);
        assert_ne!(reused, stale);

        assert!(!registry.is_live(&stale));
        assert!(registry.upgrade(&stale).is_none());
        assert_eq!(*registry.upgrade(&reused).unwrap(), 2);

        // releasing a stale token must not free the new registration
        registry.unregister(stale);
        assert!(registry.is_live(&reused));
        assert_eq!(registry.registered(), 1);
    }

    #[test]
    fn test_registry_does_not_keep_objects_alive() {
        let registry = CallbackRegistry::new();
        let object = Arc::new(5u64);
        let _token = registry.register(&object);

        assert_eq!(Arc::strong_count(&object), 1);
    }
}
