use std::sync::{Arc, Mutex};

/// Handle returned on subscription; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Explicitly managed listener list. Listeners stay registered until removed.
pub struct ListenerSet<E> {
    inner: Mutex<ListenerSetInner<E>>,
}

struct ListenerSetInner<E> {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener<E>)>,
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ListenerSetInner {
                next_id: 1,
                listeners: Vec::new(),
            }),
        }
    }
}

impl<E> ListenerSet<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener<E>) -> ListenerId {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = ListenerId(guard.next_id);
        guard.next_id += 1;
        guard.listeners.push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = guard.listeners.len();
        guard.listeners.retain(|(existing, _)| *existing != id);
        guard.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every listener synchronously. The list is snapshotted first so a
    /// listener may subscribe or unsubscribe without deadlocking.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = {
            let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            guard.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in snapshot {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn removed_listener_is_not_called() {
        let set: ListenerSet<u32> = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_for_listener = Arc::clone(&hits);
        let id = set.add(Arc::new(move |value: &u32| {
            hits_for_listener.fetch_add(*value as usize, Ordering::SeqCst);
        }));

        set.notify(&2);
        assert!(set.remove(id));
        assert!(!set.remove(id));
        set.notify(&5);

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(set.is_empty());
    }

    #[test]
    fn len_survives_poisoned_lock() {
        let set: Arc<ListenerSet<()>> = Arc::new(ListenerSet::new());
        set.add(Arc::new(|_: &()| {}));
        let poisoner = Arc::clone(&set);
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().expect("listener lock");
            panic!("panic while holding the listener lock");
        })
        .join();
        assert!(joined.is_err());
        assert!(set.inner.is_poisoned());

        assert_eq!(set.len(), 1);
        assert!(!set.is_empty());
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_notify() {
        let set: Arc<ListenerSet<()>> = Arc::new(ListenerSet::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let set_for_listener = Arc::clone(&set);
        let slot_for_listener = Arc::clone(&slot);
        let id = set.add(Arc::new(move |_: &()| {
            if let Some(id) = slot_for_listener.lock().expect("slot lock").take() {
                set_for_listener.remove(id);
            }
        }));
        *slot.lock().expect("slot lock") = Some(id);

        set.notify(&());
        assert!(set.is_empty());
    }
}
