//! Producer pool demo
//!
//! Spawns a dedicated loop thread, installs it as the primary loop, and
//! floods a queue from several producer threads while a heartbeat timer
//! reports progress from the loop itself.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deferloop_core::runloop::LoopThread;
use deferloop_core::{add_task, init_primary_loop, MacrotaskQueue, QueueConfig};

const PRODUCERS: usize = 4;
const TASKS_PER_PRODUCER: usize = 1000;

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let config = QueueConfig::load(Path::new("deferloop.toml")).unwrap_or_default();
    tracing::info!("Drain budget: {:?}", config.drain_budget());

    let loop_thread = LoopThread::spawn("demo-loop").expect("Failed to spawn loop thread");
    let handle = loop_thread.handle();

    // The flood queue uses the configured budget; the primary keeps the default
    let queue = MacrotaskQueue::bind_with_budget(Arc::new(handle.clone()), config.drain_budget());
    init_primary_loop(Arc::new(handle.clone())).expect("Primary loop should install once");

    // Heartbeat from the loop thread while producers flood the queue
    let heartbeat_queue = queue.clone();
    let heartbeat = handle.add_repeating_timer(Duration::from_millis(50), move || {
        tracing::info!("{} tasks pending", heartbeat_queue.len());
    });

    let executed = Arc::new(AtomicUsize::new(0));
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = queue.clone();
            let executed = Arc::clone(&executed);
            std::thread::spawn(move || {
                for _ in 0..TASKS_PER_PRODUCER {
                    let executed = Arc::clone(&executed);
                    queue.add_task(move || {
                        executed.fetch_add(1, Ordering::SeqCst);
                    });
                }
                tracing::debug!("Producer {} finished enqueueing", producer);
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("Producer thread panicked");
    }

    // Every producer task is already enqueued, so this one runs after them all
    let (tx, rx) = crossbeam_channel::bounded(1);
    let final_executed = Arc::clone(&executed);
    queue.add_task(move || {
        let _ = tx.send(final_executed.load(Ordering::SeqCst));
    });
    let total = rx.recv().expect("Loop should finish the flood");

    // The primary queue shares the same loop
    let (primary_tx, primary_rx) = crossbeam_channel::bounded(1);
    add_task(move || {
        tracing::info!("Primary queue task ran on the loop thread");
        let _ = primary_tx.send(());
    });
    primary_rx.recv().expect("Primary task should run");

    handle.remove_timer(heartbeat);
    tracing::info!("Executed {} of {} tasks", total, PRODUCERS * TASKS_PER_PRODUCER);
    deferloop_core::shutdown();
}
