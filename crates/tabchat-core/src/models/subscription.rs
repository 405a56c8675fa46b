use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::error::EngineError;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by every `subscribe` call.
///
/// Dropping it unsubscribes. Call [`Subscription::detach`] to keep the
/// listener registered for the lifetime of its source.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn detach(mut self) {
        self.cancel.take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

struct ListenerSet<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Registry of callbacks observing one state slice.
pub struct Listeners<T> {
    inner: Arc<Mutex<ListenerSet<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut set = self.inner.lock();
            let id = set.next_id;
            set.next_id += 1;
            set.entries.push((id, Arc::new(listener)));
            id
        };

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Call every listener with `value`. A panicking listener is logged and
    /// skipped; the rest still run. Returns the number of faulty listeners.
    pub fn notify(&self, value: &T) -> usize {
        // Snapshot so listeners may (un)subscribe from inside the callback.
        let snapshot: Vec<Callback<T>> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        snapshot
            .iter()
            .filter(|cb| !invoke_guarded("state listener", || cb(value)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run a listener callback, containing any panic. Returns `false` on fault.
pub(crate) fn invoke_guarded(kind: &str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            let fault = EngineError::ListenerFault {
                message: panic_message(payload.as_ref()),
            };
            error!(listener = kind, error = %fault, "Listener failed, continuing with the rest");
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_drop_unsubscribes() {
        let listeners = Listeners::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let sub = listeners.subscribe(move |v| {
            counter.fetch_add(*v as usize, Ordering::SeqCst);
        });
        listeners.notify(&2);
        drop(sub);
        listeners.notify(&5);

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_detach_keeps_listener() {
        let listeners = Listeners::<u32>::new();
        listeners.subscribe(|_| {}).detach();
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let listeners = Listeners::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = listeners.subscribe(|_| panic!("observer bug"));
        let counter = hits.clone();
        let _good = listeners.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let faults = listeners.notify(&1);

        assert_eq!(faults, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_itself_during_notify() {
        let listeners = Listeners::<u32>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_in_cb = slot.clone();
        let sub = listeners.subscribe(move |_| {
            slot_in_cb.lock().take();
        });
        *slot.lock() = Some(sub);

        listeners.notify(&1);
        assert!(listeners.is_empty());
    }
}
