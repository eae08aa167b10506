use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use crate::analytics::logger::LOGGER;

/// Deferred send holding an already resolved payload.
pub type QueuedAction = Box<dyn FnOnce() + Send + 'static>;

/// FIFO of sends issued before the primary channel could take them.
#[derive(Default)]
pub struct EventQueue {
    actions: Mutex<VecDeque<QueuedAction>>,
    draining: Mutex<()>,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len())
            .finish()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.actions.lock().unwrap().push_back(Box::new(action));
    }

    /// Runs queued actions in insertion order until the queue is empty, including actions
    /// enqueued while flushing. A panicking action is logged and skipped. Concurrent flushes
    /// drain one after the other.
    pub fn flush(&self) -> usize {
        let _draining = self.draining.lock().unwrap();
        let mut flushed = 0;
        loop {
            let next = self.actions.lock().unwrap().pop_front();
            let Some(action) = next else {
                break;
            };
            if catch_unwind(AssertUnwindSafe(action)).is_err() {
                LOGGER.warn("queued analytics action panicked; continuing flush");
            }
            flushed += 1;
        }
        flushed
    }

    pub fn len(&self) -> usize {
        self.actions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn flush_runs_actions_in_insertion_order() {
        let queue = EventQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["A", "B", "C"] {
            let order = Arc::clone(&order);
            queue.enqueue(move || order.lock().unwrap().push(label));
        }

        assert_eq!(queue.flush(), 3);
        assert_eq!(order.lock().unwrap().as_slice(), &["A", "B", "C"]);
        assert!(queue.is_empty());
        assert_eq!(queue.flush(), 0);
    }

    #[test]
    fn a_panicking_action_does_not_stop_the_flush() {
        let queue = EventQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        queue.enqueue(move || first.lock().unwrap().push(1));
        queue.enqueue(|| panic!("broken send"));
        let third = Arc::clone(&order);
        queue.enqueue(move || third.lock().unwrap().push(3));

        assert_eq!(queue.flush(), 3);
        assert_eq!(order.lock().unwrap().as_slice(), &[1, 3]);
    }

    #[test]
    fn actions_enqueued_during_flush_run_in_the_same_flush() {
        let queue = Arc::new(EventQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let nested_queue = Arc::clone(&queue);
        let nested_order = Arc::clone(&order);
        queue.enqueue(move || {
            nested_order.lock().unwrap().push("outer");
            let inner_order = Arc::clone(&nested_order);
            nested_queue.enqueue(move || inner_order.lock().unwrap().push("inner"));
        });

        assert_eq!(queue.flush(), 2);
        assert_eq!(order.lock().unwrap().as_slice(), &["outer", "inner"]);
    }

    #[test]
    fn concurrent_flushes_keep_insertion_order() {
        let queue = EventQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for index in 0..200 {
            let order = Arc::clone(&order);
            queue.enqueue(move || {
                std::thread::yield_now();
                order.lock().unwrap().push(index);
            });
        }

        let flushed: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4).map(|_| scope.spawn(|| queue.flush())).collect();
            workers.into_iter().map(|worker| worker.join().unwrap()).sum()
        });

        assert_eq!(flushed, 200);
        let order = order.lock().unwrap();
        assert_eq!(*order, (0..200).collect::<Vec<_>>());
    }
}
