//! Portable wait/drain run loop
//!
//! Each pass runs pending synchronous blocks, fires due timers, services
//! signaled sources, fires pre-wait observers, then sleeps until the next
//! timer deadline or an external wake. Producers interact with a running
//! loop through a cloneable [`RunLoopHandle`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use slotmap::SlotMap;

use crate::error::LoopError;
use crate::hooks::{HostLoop, ObserverHandler, ObserverKey, SourceHandler, SourceKey};
use crate::timer::{Timer, TimerFlags, TimerKey};

/// A unit of work submitted for execution on the loop thread
pub(crate) type SyncBlock = Box<dyn FnOnce() + Send + 'static>;

/// A registered input source
struct Source {
    /// Handler invoked when the source is serviced (None for wake-only sources)
    handler: Option<Arc<Mutex<SourceHandler>>>,
    /// Set by `signal_source`, cleared when the loop services the source
    signaled: bool,
}

/// Loop state guarded by the state mutex
struct LoopState {
    /// Level-triggered wake flag, consumed by the next wait
    woken: bool,
    /// Set by `stop`; the loop exits at the top of the next pass
    stopped: bool,
    /// Blocks waiting to run on the loop thread
    blocks: Vec<SyncBlock>,
}

/// State shared between the loop and its handles
struct LoopShared {
    state: Mutex<LoopState>,
    wakeup: Condvar,
    sources: RwLock<SlotMap<SourceKey, Source>>,
    observers: RwLock<SlotMap<ObserverKey, Arc<Mutex<ObserverHandler>>>>,
    timers: RwLock<SlotMap<TimerKey, Timer>>,
    /// Thread the loop runs on, set when `run` is entered
    home_thread: RwLock<Option<ThreadId>>,
    /// Pass counter (increments at the top of every pass)
    iterations: AtomicU64,
}

impl LoopShared {
    /// Fire all due timers, rescheduling repeating ones and dropping one-shots
    ///
    /// Callbacks run with no registry lock held, so they may add or remove
    /// timers freely.
    fn fire_due_timers(&self) {
        let now = Instant::now();
        let mut due = Vec::new();
        {
            let mut timers = self.timers.write();
            let mut finished = Vec::new();
            for (key, timer) in timers.iter_mut() {
                if now >= timer.next_fire {
                    due.push(Arc::clone(&timer.callback));
                    if timer.flags.contains(TimerFlags::REPEAT) {
                        timer.next_fire = now + timer.interval;
                    } else {
                        finished.push(key);
                    }
                }
            }
            for key in finished {
                timers.remove(key);
            }
        }
        for handle in due {
            let mut callback = handle.lock();
            (*callback)();
        }
    }

    /// Service every signaled source, clearing its flag first
    fn service_signaled_sources(&self) {
        let mut fired = Vec::new();
        {
            let mut sources = self.sources.write();
            for (_, source) in sources.iter_mut() {
                if source.signaled {
                    source.signaled = false;
                    if let Some(handler) = &source.handler {
                        fired.push(Arc::clone(handler));
                    }
                }
            }
        }
        for handle in fired {
            let mut handler = handle.lock();
            (*handler)();
        }
    }

    /// Fire all pre-wait observers
    fn fire_pre_wait_observers(&self) {
        let handlers: Vec<_> = self.observers.read().values().map(Arc::clone).collect();
        for handle in handlers {
            let mut handler = handle.lock();
            (*handler)();
        }
    }

    /// Earliest pending timer deadline, if any
    fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.read().values().map(|t| t.next_fire).min()
    }

    /// Sleep until the next timer deadline, a wake, a stop, or a new block
    fn sleep(&self) {
        let deadline = self.next_timer_deadline();
        let mut state = self.state.lock();
        loop {
            if state.woken || state.stopped || !state.blocks.is_empty() {
                break;
            }
            match deadline {
                Some(at) => {
                    if self.wakeup.wait_until(&mut state, at).timed_out() {
                        break;
                    }
                }
                None => self.wakeup.wait(&mut state),
            }
        }
        state.woken = false;
    }
}

/// A wait/drain event loop bound to the thread that calls [`run`](Self::run)
pub struct RunLoop {
    shared: Arc<LoopShared>,
}

impl RunLoop {
    /// Create a new loop
    ///
    /// The loop does nothing until [`run`](Self::run) is called; handles may
    /// register sources, observers, and timers before that.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(LoopShared {
                state: Mutex::new(LoopState {
                    woken: false,
                    stopped: false,
                    blocks: Vec::new(),
                }),
                wakeup: Condvar::new(),
                sources: RwLock::new(SlotMap::with_key()),
                observers: RwLock::new(SlotMap::with_key()),
                timers: RwLock::new(SlotMap::with_key()),
                home_thread: RwLock::new(None),
                iterations: AtomicU64::new(0),
            }),
        }
    }

    /// Get a handle for controlling the loop from any thread
    pub fn handle(&self) -> RunLoopHandle {
        RunLoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run the loop on the calling thread until [`RunLoopHandle::stop`]
    ///
    /// The calling thread becomes the loop's home thread. Stopping is
    /// permanent: a loop stopped before or during `run` returns immediately
    /// on the next pass boundary. Blocks submitted but not yet executed when
    /// the loop stops are dropped, failing their waiters with
    /// [`LoopError::Stopped`].
    pub fn run(&self) {
        *self.shared.home_thread.write() = Some(std::thread::current().id());
        tracing::debug!("Run loop entered");

        loop {
            self.shared.iterations.fetch_add(1, Ordering::Relaxed);

            // Pending synchronous blocks run first
            let blocks = {
                let mut state = self.shared.state.lock();
                if state.stopped {
                    break;
                }
                std::mem::take(&mut state.blocks)
            };
            for block in blocks {
                block();
            }

            self.shared.fire_due_timers();
            self.shared.service_signaled_sources();

            // A stopping loop will not wait, so pre-wait observers must not fire
            if self.shared.state.lock().stopped {
                break;
            }
            self.shared.fire_pre_wait_observers();

            self.shared.sleep();
        }

        let abandoned = std::mem::take(&mut self.shared.state.lock().blocks);
        if !abandoned.is_empty() {
            tracing::debug!("Dropping {} blocks submitted before stop", abandoned.len());
        }
        tracing::debug!(
            "Run loop exited after {} passes",
            self.shared.iterations.load(Ordering::Relaxed)
        );
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable cross-thread handle to a [`RunLoop`]
#[derive(Clone)]
pub struct RunLoopHandle {
    shared: Arc<LoopShared>,
}

impl RunLoopHandle {
    /// Stop the loop
    ///
    /// The loop exits at the top of its next pass. Blocks that have not run
    /// yet are dropped and their waiters observe [`LoopError::Stopped`].
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.stopped = true;
        self.shared.wakeup.notify_one();
    }

    /// Run a closure on the loop thread and return its result
    ///
    /// Blocks the calling thread until the closure has executed. When called
    /// from the home thread the closure runs inline, so nesting is safe.
    ///
    /// # Returns
    /// The closure's result, or [`LoopError::Stopped`] if the loop stopped
    /// before the closure could run.
    pub fn perform_sync<F, R>(&self, f: F) -> Result<R, LoopError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_home_thread() {
            return Ok(f());
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let block: SyncBlock = Box::new(move || {
            let _ = tx.send(f());
        });
        {
            let mut state = self.shared.state.lock();
            if state.stopped {
                return Err(LoopError::Stopped);
            }
            state.blocks.push(block);
            state.woken = true;
            self.shared.wakeup.notify_one();
        }
        rx.recv().map_err(|_| LoopError::Stopped)
    }

    /// Add a one-shot timer that fires after the specified delay
    ///
    /// # Arguments
    /// * `delay` - How long to wait before firing
    /// * `callback` - Function to call on the loop thread when the timer fires
    ///
    /// # Returns
    /// A key that can be used to cancel the timer via `remove_timer`
    pub fn add_timer<F>(&self, delay: Duration, callback: F) -> TimerKey
    where
        F: FnMut() + Send + 'static,
    {
        self.add_timer_with_flags(delay, TimerFlags::empty(), callback)
    }

    /// Add a repeating timer that fires at the specified interval
    ///
    /// The timer will continue firing until cancelled via `remove_timer`.
    ///
    /// # Arguments
    /// * `interval` - Time between each execution
    /// * `callback` - Function to call on the loop thread each time
    ///
    /// # Returns
    /// A key that can be used to cancel the timer via `remove_timer`
    pub fn add_repeating_timer<F>(&self, interval: Duration, callback: F) -> TimerKey
    where
        F: FnMut() + Send + 'static,
    {
        self.add_timer_with_flags(interval, TimerFlags::REPEAT, callback)
    }

    /// Add a timer with custom flags
    ///
    /// # Arguments
    /// * `interval` - Delay (one-shot) or interval between executions (repeating)
    /// * `flags` - Combination of `TimerFlags` to control behavior
    /// * `callback` - Function to call on the loop thread when the timer fires
    ///
    /// # Returns
    /// A key that can be used to cancel the timer via `remove_timer`
    pub fn add_timer_with_flags<F>(&self, interval: Duration, flags: TimerFlags, callback: F) -> TimerKey
    where
        F: FnMut() + Send + 'static,
    {
        let timer = Timer::new(interval, flags, callback);
        let key = self.shared.timers.write().insert(timer);
        // The loop may be waiting on an older, later deadline
        self.wake();
        key
    }

    /// Remove/cancel a timer
    ///
    /// # Returns
    /// `true` if the timer was found and removed, `false` if not found
    pub fn remove_timer(&self, key: TimerKey) -> bool {
        self.shared.timers.write().remove(key).is_some()
    }

    /// Get the number of passes the loop has started
    pub fn iteration_count(&self) -> u64 {
        self.shared.iterations.load(Ordering::Relaxed)
    }

    /// Get the number of registered sources
    pub fn source_count(&self) -> usize {
        self.shared.sources.read().len()
    }

    /// Get the number of registered pre-wait observers
    pub fn observer_count(&self) -> usize {
        self.shared.observers.read().len()
    }

    /// Get the number of pending timers
    pub fn timer_count(&self) -> usize {
        self.shared.timers.read().len()
    }
}

impl HostLoop for RunLoopHandle {
    fn add_source(&self, handler: Option<SourceHandler>) -> SourceKey {
        let handler = handler.map(|h| Arc::new(Mutex::new(h)));
        self.shared.sources.write().insert(Source {
            handler,
            signaled: false,
        })
    }

    fn remove_source(&self, key: SourceKey) -> bool {
        self.shared.sources.write().remove(key).is_some()
    }

    fn signal_source(&self, key: SourceKey) {
        if let Some(source) = self.shared.sources.write().get_mut(key) {
            source.signaled = true;
        }
    }

    fn add_pre_wait_observer(&self, handler: ObserverHandler) -> ObserverKey {
        self.shared
            .observers
            .write()
            .insert(Arc::new(Mutex::new(handler)))
    }

    fn remove_observer(&self, key: ObserverKey) -> bool {
        self.shared.observers.write().remove(key).is_some()
    }

    fn wake(&self) {
        let mut state = self.shared.state.lock();
        state.woken = true;
        self.shared.wakeup.notify_one();
    }

    fn run_sync(&self, block: Box<dyn FnOnce() + Send>) -> Result<(), LoopError> {
        self.perform_sync(block)
    }

    fn is_home_thread(&self) -> bool {
        *self.shared.home_thread.read() == Some(std::thread::current().id())
    }
}

/// A dedicated thread running a [`RunLoop`], stopped and joined on drop
pub struct LoopThread {
    handle: RunLoopHandle,
    join: Option<JoinHandle<()>>,
}

impl LoopThread {
    /// Spawn a thread with the given name and run a fresh loop on it
    pub fn spawn(name: &str) -> Result<Self, LoopError> {
        let run_loop = RunLoop::new();
        let handle = run_loop.handle();
        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop.run())?;
        Ok(Self {
            handle,
            join: Some(join),
        })
    }

    /// Get a handle to the loop
    pub fn handle(&self) -> RunLoopHandle {
        self.handle.clone()
    }
}

impl Drop for LoopThread {
    fn drop(&mut self) {
        self.handle.stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
