//! The connection dispatcher (§4.4): a non-blocking accept loop feeding a
//! bounded array of task slots, drained by a fixed pool of worker threads.
//! Slot locks are only ever held long enough to claim or release a slot —
//! no blocking I/O happens while one is held (§5).

use std::io;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::TrackerError;
use crate::net;
use crate::processor::{self, TrackerAddresses};
use crate::registry::Registry;

type Slot = Mutex<Option<TcpStream>>;

/// Claim the first empty slot and park `stream` there. If every slot is
/// occupied, the connection is dropped and a warning logged (§4.4).
fn enqueue(slots: &[Slot], task_count: &Mutex<usize>, stream: TcpStream) {
    for slot in slots {
        if let Some(mut guard) = slot.try_lock() {
            if guard.is_none() {
                *guard = Some(stream);
                *task_count.lock() += 1;
                return;
            }
        }
    }

    log::warn!("task queue full; dropping connection");
}

/// Sleep for `0` while there's known work outstanding, else `max_sleep`
/// (the adaptive idle backoff shared by the accept loop and every
/// worker).
fn adaptive_sleep(task_count: &Mutex<usize>, max_sleep: Duration) {
    let sleep = if *task_count.lock() > 0 {
        Duration::ZERO
    } else {
        max_sleep
    };
    thread::sleep(sleep);
}

fn accept_loop(
    listener: std::net::TcpListener,
    slots: Arc<Vec<Slot>>,
    task_count: Arc<Mutex<usize>>,
    max_sleep: Duration,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    log::warn!("failed to set accepted socket non-blocking: {e}");
                    continue;
                }
                enqueue(&slots, &task_count, stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::warn!("accept failed: {e}"),
        }

        adaptive_sleep(&task_count, max_sleep);
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    slots: Arc<Vec<Slot>>,
    task_count: Arc<Mutex<usize>>,
    registry: Arc<Registry>,
    addrs: Arc<TrackerAddresses>,
    ttl_seconds: u64,
    max_sleep: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let mut next_slot = 0usize;

    while !shutdown.load(Ordering::SeqCst) {
        let claimed = {
            match slots[next_slot].try_lock() {
                Some(mut guard) if guard.is_some() => {
                    let stream = guard.take();
                    drop(guard);
                    *task_count.lock() -= 1;
                    stream
                }
                _ => None,
            }
        };

        next_slot = (next_slot + 1) % slots.len();

        match claimed {
            Some(mut stream) => {
                match processor::process(&mut stream, &registry, &addrs, ttl_seconds) {
                    processor::Outcome::Retry => enqueue(&slots, &task_count, stream),
                    processor::Outcome::Done => {}
                }
            }
            None => adaptive_sleep(&task_count, max_sleep),
        }
    }
}

/// Run the dispatcher until `shutdown` trips. Binds the listening socket,
/// spawns the worker pool, runs the accept loop on the calling thread,
/// then joins every worker before returning.
pub fn run(
    config: &Config,
    registry: Arc<Registry>,
    addrs: Arc<TrackerAddresses>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), TrackerError> {
    let listener = net::create_listener(config.network.address, config.network.listen_backlog)
        .map_err(TrackerError::Socket)?;

    let slots: Arc<Vec<Slot>> = Arc::new(
        (0..config.dispatcher.task_slots)
            .map(|_| Mutex::new(None))
            .collect(),
    );
    let task_count = Arc::new(Mutex::new(0usize));
    let max_sleep = Duration::from_micros(config.dispatcher.max_sleep_us);

    let mut workers = Vec::with_capacity(config.dispatcher.worker_count);

    for id in 0..config.dispatcher.worker_count {
        let slots = Arc::clone(&slots);
        let task_count = Arc::clone(&task_count);
        let registry = Arc::clone(&registry);
        let addrs = Arc::clone(&addrs);
        let shutdown = Arc::clone(&shutdown);
        let ttl_seconds = config.registry.ttl_seconds;

        let handle = thread::Builder::new()
            .name(format!("tracker-worker-{id}"))
            .spawn(move || {
                worker_loop(
                    slots,
                    task_count,
                    registry,
                    addrs,
                    ttl_seconds,
                    max_sleep,
                    shutdown,
                )
            })
            .map_err(|_| TrackerError::WorkerPool {
                reason: "failed to spawn worker thread",
            })?;

        workers.push(handle);
    }

    log::info!(
        "listening on {} with {} workers, {} task slots",
        config.network.address,
        config.dispatcher.worker_count,
        config.dispatcher.task_slots
    );

    accept_loop(listener, slots, task_count, max_sleep, shutdown);

    for handle in workers {
        let _ = handle.join();
    }

    Ok(())
}
