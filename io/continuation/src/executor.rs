//! Executors that run scheduled work.

use crossbeam_channel::{Receiver, Sender};
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

/// A unit of work handed to an executor.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run work items.
pub trait Executor: Send + Sync {
    /// Queue `work` to run. Must not block the caller on the work itself.
    fn schedule(&self, work: Work);

    /// Whether the calling thread is one of this executor's workers.
    fn current_thread_in_executor(&self) -> bool;
}

/// Runs work immediately on the scheduling thread.
///
/// Never owns a thread, so a blocking wait can never starve it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inline;

impl Executor for Inline {
    fn schedule(&self, work: Work) {
        work();
    }

    fn current_thread_in_executor(&self) -> bool {
        false
    }
}

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

/// A fixed set of named worker threads fed from one channel.
///
/// A panicking work item is logged and does not take its worker down.
pub struct ThreadPool {
    id: usize,
    name: String,
    sender: Option<Sender<Work>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawn `threads` workers named `{name}-{n}`.
    pub fn new(name: &str, threads: usize) -> std::io::Result<Self> {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = crossbeam_channel::unbounded::<Work>();

        let mut workers = Vec::with_capacity(threads.max(1));
        for n in 0..threads.max(1) {
            let receiver = receiver.clone();
            let pool = name.to_string();
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || worker_loop(id, &pool, receiver))?;
            workers.push(handle);
        }

        debug!(pool = name, threads = workers.len(), "started thread pool");

        Ok(Self {
            id,
            name: name.to_string(),
            sender: Some(sender),
            workers,
        })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Pool name used as the thread name prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop accepting work and join the workers once the queue drains.
    pub fn shutdown(&mut self) {
        self.sender = None;
        if self.current_thread_in_executor() {
            // joining ourselves would hang; the workers exit on their own
            self.workers.clear();
            return;
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(id: usize, pool: &str, receiver: Receiver<Work>) {
    CURRENT_POOL.with(|current| current.set(id));
    for work in receiver.iter() {
        if catch_unwind(AssertUnwindSafe(work)).is_err() {
            error!(pool, "work item panicked");
        }
    }
}

impl Executor for ThreadPool {
    fn schedule(&self, work: Work) {
        match &self.sender {
            Some(sender) => {
                if sender.send(work).is_err() {
                    warn!(pool = %self.name, "dropping work: workers have exited");
                }
            }
            None => warn!(pool = %self.name, "dropping work scheduled after shutdown"),
        }
    }

    fn current_thread_in_executor(&self) -> bool {
        CURRENT_POOL.with(|current| current.get() == self.id)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("threads", &self.workers.len())
            .finish()
    }
}
