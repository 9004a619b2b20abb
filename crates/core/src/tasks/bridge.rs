//! Loop attachment for the macrotask queue
//!
//! A bound queue owns a wake-only source and a pre-wait observer on its host
//! loop. Enqueueing signals the source and wakes the loop; the observer runs
//! a drain pass before the loop next waits and re-arms the source whenever
//! tasks are left over. The process-wide primary queue attaches lazily to
//! the installed primary loop, or to a fallback loop thread when none was
//! installed.

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use deferloop_runloop::{HostLoop, LoopThread, ObserverKey, SourceKey};

use super::drain::{drain_until_deadline, DEFAULT_DRAIN_BUDGET};
use super::queue::TaskFifo;

/// Error type for primary loop installation
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A primary loop is already present
    #[error("Primary loop already installed")]
    AlreadyInstalled,
}

/// Queue state shared with the loop-side observer
struct QueueShared {
    fifo: TaskFifo,
    host: Arc<dyn HostLoop>,
    /// Wall-clock budget of one drain pass
    budget: Duration,
    /// Wake-only source signaled by every enqueue and by re-arms
    source: SourceKey,
    /// Pre-wait observer that runs the drain pass
    observer: ObserverKey,
}

impl QueueShared {
    /// Signal the wake source and rouse the loop
    fn poke(&self) {
        self.host.signal_source(self.source);
        self.host.wake();
    }

    /// Run one drain pass, re-arming the loop when tasks remain
    fn drain_pass(&self) {
        let stats = drain_until_deadline(&self.fifo, self.budget);
        if stats.remaining > 0 {
            self.poke();
        }
    }
}

impl Drop for QueueShared {
    fn drop(&mut self) {
        self.host.remove_observer(self.observer);
        self.host.remove_source(self.source);
    }
}

/// A macrotask queue bound to a host loop
///
/// Cloning yields another handle to the same queue. Tasks always execute on
/// the host loop's home thread, in enqueue order.
#[derive(Clone)]
pub struct MacrotaskQueue {
    shared: Arc<QueueShared>,
}

impl MacrotaskQueue {
    /// Bind a new queue to `host` with the default drain budget
    pub fn bind(host: Arc<dyn HostLoop>) -> Self {
        Self::bind_with_budget(host, DEFAULT_DRAIN_BUDGET)
    }

    /// Bind a new queue to `host` with a custom per-pass budget
    pub fn bind_with_budget(host: Arc<dyn HostLoop>, budget: Duration) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<QueueShared>| {
            let source = host.add_source(None);
            let weak = weak.clone();
            let observer = host.add_pre_wait_observer(Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.drain_pass();
                }
            }));
            QueueShared {
                fifo: TaskFifo::new(),
                host: Arc::clone(&host),
                budget,
                source,
                observer,
            }
        });
        tracing::debug!("Macrotask queue bound, {:?} drain budget", budget);
        Self { shared }
    }

    /// Enqueue a task from any thread
    ///
    /// The task runs on the host loop's home thread during a later drain
    /// pass, after every task enqueued before it.
    pub fn add_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let pending = self.shared.fifo.push(Box::new(task));
        tracing::trace!("Task queued, {} pending", pending);
        self.shared.poke();
    }

    /// Number of tasks waiting to run
    pub fn len(&self) -> usize {
        self.shared.fifo.len()
    }

    /// Check whether no tasks are waiting
    pub fn is_empty(&self) -> bool {
        self.shared.fifo.is_empty()
    }

    /// The wall-clock budget of one drain pass
    pub fn drain_budget(&self) -> Duration {
        self.shared.budget
    }
}

/// Process-wide primary queue
static PRIMARY_QUEUE: OnceLock<MacrotaskQueue> = OnceLock::new();

/// Host loop the primary queue attaches to
static PRIMARY_LOOP: OnceLock<Arc<dyn HostLoop>> = OnceLock::new();

/// Fallback loop thread, spawned only if no primary loop was installed
static FALLBACK_LOOP: OnceLock<LoopThread> = OnceLock::new();

/// Install the host loop the primary queue will attach to
///
/// Call once at startup, before the first [`primary_queue`] access. Later
/// calls fail, as does any call after an uninstalled first access already
/// spawned the fallback loop.
pub fn init_primary_loop(host: Arc<dyn HostLoop>) -> Result<(), BridgeError> {
    PRIMARY_LOOP
        .set(host)
        .map_err(|_| BridgeError::AlreadyInstalled)
}

/// Check if a primary loop is present
pub fn is_primary_loop_installed() -> bool {
    PRIMARY_LOOP.get().is_some()
}

/// Get the primary queue, creating it on first access
///
/// The first caller binds the queue to the installed primary loop. If none
/// was installed, a dedicated fallback loop thread is spawned and installed
/// instead.
///
/// # Panics
/// Panics if the fallback loop thread cannot be spawned
pub fn primary_queue() -> &'static MacrotaskQueue {
    PRIMARY_QUEUE.get_or_init(|| {
        let host = PRIMARY_LOOP.get_or_init(|| {
            let loop_thread = LoopThread::spawn("deferloop-primary")
                .expect("Failed to spawn fallback loop thread");
            let handle = loop_thread.handle();
            let _ = FALLBACK_LOOP.set(loop_thread);
            tracing::info!("No primary loop installed, spawned fallback loop thread");
            Arc::new(handle)
        });
        MacrotaskQueue::bind(Arc::clone(host))
    })
}

/// Get the primary queue if it has already been created
pub fn try_primary_queue() -> Option<&'static MacrotaskQueue> {
    PRIMARY_QUEUE.get()
}

/// Enqueue a task on the primary queue from any thread
///
/// Creates the primary queue on first use. See [`primary_queue`].
#[tracing::instrument(skip(task))]
pub fn add_task<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    primary_queue().add_task(task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferloop_runloop::{LoopError, ObserverHandler, SourceHandler};
    use parking_lot::Mutex;
    use slotmap::SlotMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Host loop stub that records pokes and fires observers on demand
    #[derive(Default)]
    struct StubLoop {
        sources: Mutex<SlotMap<SourceKey, ()>>,
        observers: Mutex<SlotMap<ObserverKey, ObserverHandler>>,
        signals: AtomicUsize,
        wakes: AtomicUsize,
    }

    impl StubLoop {
        /// Fire every registered observer once, as the loop would before a wait
        fn fire_observers(&self) {
            let mut observers = self.observers.lock();
            for (_, handler) in observers.iter_mut() {
                handler();
            }
        }

        fn signal_count(&self) -> usize {
            self.signals.load(Ordering::SeqCst)
        }

        fn source_count(&self) -> usize {
            self.sources.lock().len()
        }

        fn observer_count(&self) -> usize {
            self.observers.lock().len()
        }
    }

    impl HostLoop for StubLoop {
        fn add_source(&self, _handler: Option<SourceHandler>) -> SourceKey {
            self.sources.lock().insert(())
        }

        fn remove_source(&self, key: SourceKey) -> bool {
            self.sources.lock().remove(key).is_some()
        }

        fn signal_source(&self, key: SourceKey) {
            if self.sources.lock().contains_key(key) {
                self.signals.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn add_pre_wait_observer(&self, handler: ObserverHandler) -> ObserverKey {
            self.observers.lock().insert(handler)
        }

        fn remove_observer(&self, key: ObserverKey) -> bool {
            self.observers.lock().remove(key).is_some()
        }

        fn wake(&self) {
            self.wakes.fetch_add(1, Ordering::SeqCst);
        }

        fn run_sync(&self, block: Box<dyn FnOnce() + Send>) -> Result<(), LoopError> {
            block();
            Ok(())
        }

        fn is_home_thread(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_bind_registers_source_and_observer() {
        let stub = Arc::new(StubLoop::default());
        let queue = MacrotaskQueue::bind(Arc::clone(&stub) as Arc<dyn HostLoop>);

        assert_eq!(stub.source_count(), 1);
        assert_eq!(stub.observer_count(), 1);
        assert_eq!(queue.drain_budget(), DEFAULT_DRAIN_BUDGET);

        drop(queue);
        assert_eq!(stub.source_count(), 0);
        assert_eq!(stub.observer_count(), 0);
    }

    #[test]
    fn test_add_task_pokes_the_loop() {
        let stub = Arc::new(StubLoop::default());
        let queue = MacrotaskQueue::bind(Arc::clone(&stub) as Arc<dyn HostLoop>);

        queue.add_task(|| {});
        assert_eq!(queue.len(), 1);
        assert_eq!(stub.signal_count(), 1);
        assert_eq!(stub.wakes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observer_pass_runs_tasks_in_order() {
        let stub = Arc::new(StubLoop::default());
        let queue = MacrotaskQueue::bind(Arc::clone(&stub) as Arc<dyn HostLoop>);

        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3usize {
            let seen = Arc::clone(&seen);
            queue.add_task(move || seen.lock().push(i));
        }

        stub.fire_observers();
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_clean_pass_does_not_rearm() {
        let stub = Arc::new(StubLoop::default());
        let queue = MacrotaskQueue::bind(Arc::clone(&stub) as Arc<dyn HostLoop>);

        for _ in 0..3 {
            queue.add_task(|| {});
        }
        let signals_before_pass = stub.signal_count();

        stub.fire_observers();
        assert_eq!(queue.len(), 0);
        assert_eq!(stub.signal_count(), signals_before_pass);

        // An empty pass must not re-arm either
        stub.fire_observers();
        assert_eq!(stub.signal_count(), signals_before_pass);
    }

    #[test]
    fn test_overrun_pass_rearms_until_backlog_clears() {
        let stub = Arc::new(StubLoop::default());
        let queue =
            MacrotaskQueue::bind_with_budget(Arc::clone(&stub) as Arc<dyn HostLoop>, Duration::ZERO);

        for _ in 0..3 {
            queue.add_task(|| {});
        }
        let signals_after_enqueue = stub.signal_count();

        // Zero budget lets exactly one task through per pass
        stub.fire_observers();
        assert_eq!(queue.len(), 2);
        assert_eq!(stub.signal_count(), signals_after_enqueue + 1);

        stub.fire_observers();
        assert_eq!(queue.len(), 1);
        assert_eq!(stub.signal_count(), signals_after_enqueue + 2);

        stub.fire_observers();
        assert_eq!(queue.len(), 0);
        assert_eq!(stub.signal_count(), signals_after_enqueue + 2);
    }

    #[test]
    fn test_mid_pass_enqueue_waits_for_the_next_pass() {
        let stub = Arc::new(StubLoop::default());
        let queue = MacrotaskQueue::bind(Arc::clone(&stub) as Arc<dyn HostLoop>);

        let seen = Arc::new(Mutex::new(Vec::new()));

        let queue_inner = queue.clone();
        let seen_a = Arc::clone(&seen);
        queue.add_task(move || {
            seen_a.lock().push("a");
            let seen_d = Arc::clone(&seen_a);
            queue_inner.add_task(move || seen_d.lock().push("d"));
        });
        let seen_b = Arc::clone(&seen);
        queue.add_task(move || seen_b.lock().push("b"));

        stub.fire_observers();
        assert_eq!(*seen.lock(), vec!["a", "b"]);
        assert_eq!(queue.len(), 1);

        stub.fire_observers();
        assert_eq!(*seen.lock(), vec!["a", "b", "d"]);
        assert_eq!(queue.len(), 0);
    }
}
