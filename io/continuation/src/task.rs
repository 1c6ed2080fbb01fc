//! Cooperative tasks and blocking waits over futures.

use crate::deferred::{Deferred, WaitError, deferred_on};
use crate::executor::Executor;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Run `future` as a task on `executor`; every wake-up reschedules it there.
///
/// The returned deferred completes with the future's output. Waiting on it
/// from one of `executor`'s own threads is refused.
pub fn spawn<F>(executor: &Arc<dyn Executor>, future: F) -> Deferred<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (promise, output) = deferred_on(executor.clone());
    let task = Arc::new(Task {
        future: Mutex::new(Some(Box::pin(async move {
            promise.set(future.await);
        }))),
        notified: AtomicBool::new(false),
        executor: executor.clone(),
    });
    task.schedule();
    output
}

struct Task {
    future: Mutex<Option<BoxFuture>>,
    notified: AtomicBool,
    executor: Arc<dyn Executor>,
}

impl Task {
    fn schedule(self: &Arc<Self>) {
        let task = self.clone();
        self.executor.schedule(Box::new(move || task.run()));
    }

    fn run(self: Arc<Self>) {
        // Set before trying the lock: whoever holds the future sees the flag
        // and polls again, so no wake-up is lost.
        self.notified.store(true, Ordering::Release);
        loop {
            let Some(mut slot) = self.future.try_lock() else {
                return;
            };
            while self.notified.swap(false, Ordering::AcqRel) {
                let Some(future) = slot.as_mut() else {
                    return;
                };
                let waker = Waker::from(self.clone());
                let mut cx = Context::from_waker(&waker);
                if future.as_mut().poll(&mut cx).is_ready() {
                    *slot = None;
                    return;
                }
            }
            drop(slot);
            if !self.notified.load(Ordering::Acquire) {
                return;
            }
        }
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

struct ThreadSignal {
    thread: Thread,
    notified: AtomicBool,
}

impl Wake for ThreadSignal {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Drive `future` to completion on the calling thread.
///
/// Fails with [`WaitError::WouldDeadlock`] when the calling thread belongs to
/// `guard`, the executor the future's I/O completes on.
pub fn block_on<F: Future>(
    future: F,
    guard: Option<&dyn Executor>,
) -> Result<F::Output, WaitError> {
    if guard.is_some_and(|executor| executor.current_thread_in_executor()) {
        return Err(WaitError::WouldDeadlock);
    }

    let mut future = std::pin::pin!(future);
    let signal = Arc::new(ThreadSignal {
        thread: thread::current(),
        notified: AtomicBool::new(false),
    });
    let waker = Waker::from(signal.clone());
    let mut cx = Context::from_waker(&waker);

    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return Ok(output);
        }
        while !signal.notified.swap(false, Ordering::AcqRel) {
            thread::park();
        }
    }
}
