//! Per-instance callback delivery
//!
//! Each instance owns one [`CallbackCell`] per event kind. Registration and
//! clearing are mutually exclusive with invocation: the slot mutex is held
//! across delivery, so a callback is never replaced mid-call and deliveries
//! for one cell are serialized onto a single logical context. A panic inside
//! a callback is caught and logged; it never propagates into the engine and
//! never stops subsequent metering/progress/position processing.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

type BoxedCallback<T> = Box<dyn Fn(T) + Send + 'static>;

/// A single callback registration slot
pub struct CallbackCell<T> {
    /// Event name, used only for log context
    name: &'static str,
    slot: Mutex<Option<BoxedCallback<T>>>,
}

impl<T> CallbackCell<T> {
    /// Create an empty cell for the named event
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
        }
    }

    /// Register a callback, replacing any existing one
    pub fn set(&self, callback: impl Fn(T) + Send + 'static) {
        *self.slot.lock().expect("callback slot poisoned") = Some(Box::new(callback));
    }

    /// Remove the registered callback, if any
    pub fn clear(&self) {
        *self.slot.lock().expect("callback slot poisoned") = None;
    }

    /// Check whether a callback is registered
    pub fn has(&self) -> bool {
        self.slot.lock().expect("callback slot poisoned").is_some()
    }

    /// Deliver `value` to the registered callback; no-op when empty
    pub fn invoke(&self, value: T) {
        let guard = self.slot.lock().expect("callback slot poisoned");
        if let Some(callback) = guard.as_ref() {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                log::error!("callback for '{}' panicked; continuing", self.name);
            }
        }
    }
}

/// A latching callback cell for one-shot events
///
/// `fire` delivers at most once per arming; `arm` resets the latch.
/// The playback engine arms it on `start` so the finish callback fires
/// exactly once per playback run.
pub struct FinishCell {
    cell: CallbackCell<()>,
    fired: AtomicBool,
}

impl FinishCell {
    pub fn new(name: &'static str) -> Self {
        Self {
            cell: CallbackCell::new(name),
            fired: AtomicBool::new(false),
        }
    }

    /// Register the one-shot callback
    pub fn set(&self, callback: impl Fn() + Send + 'static) {
        self.cell.set(move |()| callback());
    }

    /// Remove the registered callback
    pub fn clear(&self) {
        self.cell.clear();
    }

    /// Reset the latch for a new run
    pub fn arm(&self) {
        self.fired.store(false, Ordering::Release);
    }

    /// Deliver the event if it has not fired since the last arming
    pub fn fire(&self) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            self.cell.invoke(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_invoke_without_registration_is_noop() {
        let cell: CallbackCell<u64> = CallbackCell::new("test");
        assert!(!cell.has());
        cell.invoke(42);
    }

    #[test]
    fn test_set_clear_invoke() {
        let cell: CallbackCell<u64> = CallbackCell::new("test");
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_cb = Arc::clone(&seen);
        cell.set(move |v| {
            seen_cb.fetch_add(v as usize, Ordering::SeqCst);
        });
        assert!(cell.has());

        cell.invoke(2);
        cell.invoke(3);
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        cell.clear();
        cell.invoke(100);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let cell: CallbackCell<u64> = CallbackCell::new("test");
        cell.set(|_| panic!("boom"));

        // Must not propagate, and the cell must stay usable.
        cell.invoke(1);
        cell.invoke(2);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        cell.set(move |_| {
            seen_cb.fetch_add(1, Ordering::SeqCst);
        });
        cell.invoke(3);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finish_cell_fires_once_per_arm() {
        let cell = FinishCell::new("finish");
        let count = Arc::new(AtomicUsize::new(0));

        let count_cb = Arc::clone(&count);
        cell.set(move || {
            count_cb.fetch_add(1, Ordering::SeqCst);
        });

        cell.arm();
        cell.fire();
        cell.fire();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        cell.arm();
        cell.fire();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
