//! Ordered teardown of GPU objects.
//!
//! Creation code pushes one closure per object it successfully created. Flushing
//! runs the closures last-registered-first, so objects are destroyed in exactly
//! the reverse order of their creation. Because entries are only pushed after a
//! step succeeds, flushing after a partial initialization undoes exactly what was
//! built and nothing more.
//!
//! The queue is generic over a context argument handed to every closure. Plain
//! teardown uses `()`, while per-frame cleanup queues in the engine receive the
//! engine context so they can reach the device and allocator.

use std::borrow::Cow;
use std::fmt;

type Entry<C> = (Cow<'static, str>, Box<dyn FnOnce(&C) + Send>);

/// LIFO queue of deferred destruction callbacks.
pub struct DeletionQueue<C: ?Sized = ()> {
    entries: Vec<Entry<C>>,
}

impl<C: ?Sized> Default for DeletionQueue<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<C: ?Sized> DeletionQueue<C> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a destruction callback.
    pub fn push<F>(&mut self, label: impl Into<Cow<'static, str>>, f: F)
    where
        F: FnOnce(&C) + Send + 'static,
    {
        self.entries.push((label.into(), Box::new(f)));
    }

    /// Run every registered callback, newest first, leaving the queue empty.
    pub fn flush(&mut self, ctx: &C) {
        while let Some((label, f)) = self.entries.pop() {
            tracing::trace!("Running deferred destruction: {label}");
            f(ctx);
        }
    }

    /// Number of pending callbacks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no callbacks are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels of pending callbacks in registration order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(label, _)| label.as_ref())
    }
}

impl DeletionQueue<()> {
    /// Flush a queue whose callbacks take no context.
    pub fn flush_all(&mut self) {
        self.flush(&());
    }
}

impl<C: ?Sized> fmt::Debug for DeletionQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.labels()).finish()
    }
}

impl<C: ?Sized> Drop for DeletionQueue<C> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            tracing::warn!(
                "Deletion queue dropped with {} pending entries: {:?}",
                self.entries.len(),
                self.labels().collect::<Vec<_>>()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn flush_runs_in_reverse_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut queue: DeletionQueue = DeletionQueue::new();

        for name in ["instance", "device", "allocator", "swapchain", "frames"] {
            let order = Arc::clone(&order);
            queue.push(name, move |_| order.lock().push(name));
        }
        assert_eq!(queue.len(), 5);

        queue.flush_all();

        assert!(queue.is_empty());
        assert_eq!(
            *order.lock(),
            vec!["frames", "swapchain", "allocator", "device", "instance"]
        );
    }

    #[test]
    fn partial_construction_only_undoes_registered_steps() {
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        let mut queue: DeletionQueue = DeletionQueue::new();

        let steps: [(&'static str, bool); 3] =
            [("instance", true), ("device", true), ("allocator", false)];
        for (name, ok) in steps {
            if !ok {
                break;
            }
            let destroyed = Arc::clone(&destroyed);
            queue.push(name, move |_| destroyed.lock().push(name));
        }
        queue.flush_all();

        assert_eq!(*destroyed.lock(), vec!["device", "instance"]);
    }

    #[test]
    fn callbacks_receive_context() {
        let mut queue: DeletionQueue<Mutex<Vec<u32>>> = DeletionQueue::new();
        queue.push("first", |log: &Mutex<Vec<u32>>| log.lock().push(1));
        queue.push("second", |log: &Mutex<Vec<u32>>| log.lock().push(2));

        let log = Mutex::new(Vec::new());
        queue.flush(&log);
        assert_eq!(*log.lock(), vec![2, 1]);

        // A flushed queue is reusable.
        queue.push("third", |log: &Mutex<Vec<u32>>| log.lock().push(3));
        queue.flush(&log);
        assert_eq!(*log.lock(), vec![2, 1, 3]);
    }

    #[test]
    fn labels_follow_registration_order() {
        let mut queue: DeletionQueue = DeletionQueue::new();
        queue.push("a", |_| {});
        queue.push(String::from("b"), |_| {});
        assert_eq!(queue.labels().collect::<Vec<_>>(), vec!["a", "b"]);
        queue.flush_all();
    }
}
