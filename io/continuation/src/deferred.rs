//! Single-assignment result cells.
//!
//! [`deferred`] returns a connected [`Promise`] / [`Deferred`] pair. The
//! producer completes the cell exactly once by calling [`Promise::set`]
//! (which consumes the promise) or by dropping it, in which case the consumer
//! observes [`Canceled`]. The consumer either attaches a continuation with
//! [`Deferred::then`], awaits the cell as a [`Future`], or blocks on it with
//! [`Deferred::wait`].
//!
//! The cell moves through `Empty -> (Continuation | Waker)? -> Ready -> Taken`
//! under a single lock; the value is handed to exactly one consumer.

use crate::executor::Executor;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// The producing side was dropped without setting a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled;

impl fmt::Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise dropped before a value was set")
    }
}

impl std::error::Error for Canceled {}

/// Errors from a synchronous wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The producing side was dropped without setting a value.
    Canceled,
    /// The calling thread belongs to the executor that has to run the
    /// completion, so blocking it could never finish.
    WouldDeadlock,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canceled => write!(f, "promise dropped before a value was set"),
            Self::WouldDeadlock => {
                write!(f, "blocking wait from a thread of the completing executor")
            }
        }
    }
}

impl std::error::Error for WaitError {}

impl From<Canceled> for WaitError {
    fn from(_: Canceled) -> Self {
        Self::Canceled
    }
}

type Callback<T> = Box<dyn FnOnce(Result<T, Canceled>) + Send>;

enum State<T> {
    Empty,
    Continuation(Callback<T>),
    Waker(Waker),
    Ready(Result<T, Canceled>),
    Taken,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
    /// Executor whose workers complete this cell, if known.
    completer: Option<Arc<dyn Executor>>,
}

impl<T> Shared<T> {
    fn complete(&self, value: Result<T, Canceled>) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Taken) {
            State::Empty => {
                *state = State::Ready(value);
                drop(state);
                self.ready.notify_all();
            }
            State::Waker(waker) => {
                *state = State::Ready(value);
                drop(state);
                self.ready.notify_all();
                waker.wake();
            }
            State::Continuation(callback) => {
                // the continuation consumes the value; the cell stays Taken
                drop(state);
                callback(value);
            }
            State::Ready(_) | State::Taken => {
                unreachable!("deferred cell completed twice")
            }
        }
    }
}

/// Create a connected promise / deferred pair.
pub fn deferred<T>() -> (Promise<T>, Deferred<T>) {
    pair(None)
}

/// Create a pair whose completion will run on `executor`.
///
/// A [`Deferred::wait`] issued from one of that executor's threads fails with
/// [`WaitError::WouldDeadlock`] instead of hanging.
pub fn deferred_on<T>(executor: Arc<dyn Executor>) -> (Promise<T>, Deferred<T>) {
    pair(Some(executor))
}

fn pair<T>(completer: Option<Arc<dyn Executor>>) -> (Promise<T>, Deferred<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Empty),
        ready: Condvar::new(),
        completer,
    });
    (
        Promise {
            shared: Some(shared.clone()),
        },
        Deferred { shared, via: None },
    )
}

/// Producing half of a deferred cell.
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Promise<T> {
    /// Complete the cell. Any attached continuation runs on this thread
    /// unless the consumer asked for a specific executor.
    pub fn set(mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            shared.complete(Ok(value));
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.complete(Err(Canceled));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

/// Consuming half of a deferred cell.
pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
    via: Option<Arc<dyn Executor>>,
}

impl<T> Deferred<T> {
    /// A deferred that is already complete.
    pub fn ready(value: T) -> Self {
        let (promise, deferred) = deferred();
        promise.set(value);
        deferred
    }

    /// Run the continuation attached with [`then`](Self::then) on `executor`
    /// rather than inline on the producer's stack.
    pub fn via(mut self, executor: Arc<dyn Executor>) -> Self {
        self.via = Some(executor);
        self
    }

    /// Whether a value (or cancellation) is waiting to be taken.
    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Ready(_))
    }

    /// Block the calling thread until the cell completes.
    pub fn wait(self) -> Result<T, WaitError> {
        if let Some(executor) = &self.shared.completer
            && executor.current_thread_in_executor()
        {
            return Err(WaitError::WouldDeadlock);
        }

        let mut state = self.shared.state.lock();
        loop {
            match std::mem::replace(&mut *state, State::Taken) {
                State::Ready(value) => return value.map_err(WaitError::from),
                other => {
                    *state = other;
                    self.shared.ready.wait(&mut state);
                }
            }
        }
    }
}

impl<T: Send + 'static> Deferred<T> {
    /// Attach a continuation. Runs immediately if the value is already set.
    pub fn then<F>(self, f: F)
    where
        F: FnOnce(Result<T, Canceled>) + Send + 'static,
    {
        let callback: Callback<T> = match self.via.clone() {
            Some(executor) => Box::new(move |value| executor.schedule(Box::new(move || f(value)))),
            None => Box::new(f),
        };

        let mut state = self.shared.state.lock();
        match std::mem::replace(&mut *state, State::Taken) {
            State::Empty | State::Waker(_) => *state = State::Continuation(callback),
            State::Ready(value) => {
                drop(state);
                callback(value);
            }
            State::Continuation(_) | State::Taken => {
                unreachable!("continuation attached to a consumed deferred")
            }
        }
    }

    /// Transform the value once it arrives. Cancellation propagates.
    pub fn map<U, F>(self, f: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (promise, mapped) = match &self.shared.completer {
            Some(executor) => deferred_on(executor.clone()),
            None => deferred(),
        };
        self.then(move |value| {
            if let Ok(value) = value {
                promise.set(f(value));
            }
        });
        mapped
    }
}

impl<T> Future for Deferred<T> {
    type Output = Result<T, Canceled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match std::mem::replace(&mut *state, State::Taken) {
            State::Ready(value) => Poll::Ready(value),
            State::Empty | State::Waker(_) => {
                *state = State::Waker(cx.waker().clone());
                Poll::Pending
            }
            State::Taken => panic!("deferred polled after completion"),
            State::Continuation(_) => {
                unreachable!("deferred polled after a continuation was attached")
            }
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.shared.state.lock() {
            State::Empty => "empty",
            State::Continuation(_) => "continuation",
            State::Waker(_) => "waker",
            State::Ready(_) => "ready",
            State::Taken => "taken",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}
