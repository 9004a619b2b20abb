//! Cross-thread macrotask FIFO
//!
//! Producers on any thread push boxed closures; the owning loop pops them
//! in arrival order. The chain is a singly linked list whose mutex is held
//! only for pointer swaps, never while a task runs.

use std::ptr;

use parking_lot::Mutex;

/// A deferred unit of work executed on the queue's home thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A single link in the task chain
struct TaskNode {
    task: Task,
    next: *mut TaskNode,
}

/// Head and tail of the singly linked chain
struct FifoState {
    /// Oldest pending node, owned by the chain until popped
    head: *mut TaskNode,
    /// Newest pending node, a non-owning view for O(1) append
    tail: *mut TaskNode,
    /// Number of pending nodes
    len: usize,
}

// SAFETY: The raw pointers reference heap nodes reachable only through this
// state while the mutex is held, and the closures they carry are Send.
unsafe impl Send for FifoState {}

/// Unbounded multi-producer task FIFO
pub(crate) struct TaskFifo {
    state: Mutex<FifoState>,
}

impl TaskFifo {
    /// Create an empty FIFO
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FifoState {
                head: ptr::null_mut(),
                tail: ptr::null_mut(),
                len: 0,
            }),
        }
    }

    /// Append a task
    ///
    /// # Returns
    /// The number of pending tasks after the append
    pub fn push(&self, task: Task) -> usize {
        let node = Box::into_raw(Box::new(TaskNode {
            task,
            next: ptr::null_mut(),
        }));

        let mut state = self.state.lock();
        if state.tail.is_null() {
            state.head = node;
        } else {
            // SAFETY: tail points at the live last node appended by a
            // previous push and not yet popped
            unsafe { (*state.tail).next = node };
        }
        state.tail = node;
        state.len += 1;
        state.len
    }

    /// Detach and return the oldest task, if any
    pub fn pop(&self) -> Option<Task> {
        let mut state = self.state.lock();
        if state.head.is_null() {
            return None;
        }

        // SAFETY: head was created by Box::into_raw in push and is owned by
        // the chain until this point
        let node = unsafe { Box::from_raw(state.head) };
        state.head = node.next;
        if state.head.is_null() {
            state.tail = ptr::null_mut();
        }
        state.len -= 1;
        Some(node.task)
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    /// Check whether no tasks are pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TaskFifo {
    /// Free pending nodes without executing their closures
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let mut cursor = state.head;
        state.head = ptr::null_mut();
        state.tail = ptr::null_mut();

        let mut freed = 0usize;
        while !cursor.is_null() {
            // SAFETY: every node in the chain came from Box::into_raw in push
            let node = unsafe { Box::from_raw(cursor) };
            cursor = node.next;
            freed += 1;
        }
        if freed > 0 {
            tracing::debug!("Dropped {} pending tasks with the queue", freed);
        }
        state.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_push_pop_preserves_order() {
        let fifo = TaskFifo::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..5usize {
            let seen = Arc::clone(&seen);
            assert_eq!(fifo.push(Box::new(move || seen.lock().push(i))), i + 1);
        }
        assert_eq!(fifo.len(), 5);

        while let Some(task) = fifo.pop() {
            task();
        }

        assert!(fifo.is_empty());
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pop_on_empty_returns_none() {
        let fifo = TaskFifo::new();
        assert!(fifo.pop().is_none());

        fifo.push(Box::new(|| {}));
        assert!(fifo.pop().is_some());
        assert!(fifo.pop().is_none());
        assert_eq!(fifo.len(), 0);
    }

    #[test]
    fn test_drop_frees_pending_without_running() {
        struct DropProbe(Arc<AtomicUsize>);
        impl Drop for DropProbe {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let executed = Arc::new(AtomicUsize::new(0));

        let fifo = TaskFifo::new();
        for _ in 0..3 {
            let probe = DropProbe(Arc::clone(&dropped));
            let executed = Arc::clone(&executed);
            fifo.push(Box::new(move || {
                let _ = &probe;
                executed.fetch_add(1, Ordering::SeqCst);
            }));
        }

        drop(fifo);
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_producers_keep_per_thread_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 100;

        let fifo = Arc::new(TaskFifo::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let fifo = Arc::clone(&fifo);
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        let seen = Arc::clone(&seen);
                        fifo.push(Box::new(move || seen.lock().push((producer, seq))));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("Producer thread panicked");
        }

        assert_eq!(fifo.len(), PRODUCERS * PER_PRODUCER);
        while let Some(task) = fifo.pop() {
            task();
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
        for producer in 0..PRODUCERS {
            let seqs: Vec<_> = seen
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, s)| *s)
                .collect();
            assert_eq!(seqs, (0..PER_PRODUCER).collect::<Vec<_>>());
        }
    }
}
