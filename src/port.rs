//! Thread-safe message ports.
//!
//! A [`MessagePort`] is a FIFO queue of typed payloads shared between
//! threads:
//! - producers append with a non-blocking [`put`](MessagePort::put),
//! - consumers take with a blocking or timed [`get`](MessagePort::get),
//! - optionally, one event registered with
//!   [`EventKind::port`](crate::EventKind::port) is woken on arrival, so
//!   a reactor can consume the port without a dedicated receiver thread.
//!
//! The port lock is independent of any context lock. The only place both
//! worlds meet is `put`, which detaches the bound event under the port
//! lock and notifies its context only after releasing it, so the two
//! locks are never held together from this side.

use crate::error::Error;
use crate::event::EventInner;

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// A thread-safe FIFO queue of payloads, optionally wired to wake an
/// event context on arrival.
///
/// Cloning is cheap and yields another handle to the same queue.
pub struct MessagePort<T> {
    inner: Arc<PortInner<T>>,
}

impl<T> Clone for MessagePort<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct PortInner<T> {
    state: Mutex<PortState<T>>,
    available: Condvar,
}

struct PortState<T> {
    queue: VecDeque<T>,

    /// The single event woken on arrival, installed at registration and
    /// detached by the `put` that fires it.
    bound: Option<Arc<EventInner>>,
}

impl<T: Send + 'static> MessagePort<T> {
    /// Creates an empty port.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PortInner {
                state: Mutex::new(PortState {
                    queue: VecDeque::new(),
                    bound: None,
                }),
                available: Condvar::new(),
            }),
        }
    }

    /// Appends a payload to the tail of the queue.
    ///
    /// If the queue was empty, one blocked receiver is woken. If an
    /// event is bound to the port, the binding is detached atomically
    /// with the append and the event is marked occurred after the port
    /// lock has been released (detach-then-notify keeps the port lock
    /// out of the context's lock order).
    pub fn put(&self, payload: T) {
        let fired = {
            let mut state = self.inner.state.lock().unwrap();

            let was_empty = state.queue.is_empty();
            state.queue.push_back(payload);

            if was_empty {
                self.inner.available.notify_one();
            }

            state.bound.take()
        };

        if let Some(event) = fired {
            if let Some(ctx) = event.ctx.upgrade() {
                ctx.trigger_event(&event);
            }
        }
    }

    /// Removes and returns the oldest payload.
    ///
    /// - `None` blocks until a payload arrives.
    /// - `Some(Duration::ZERO)` returns immediately,
    ///   [`TimedOut`](Error::TimedOut) if the queue is empty.
    /// - `Some(d)` waits against a deadline computed once at entry, so
    ///   spurious wake-ups do not stretch the wait.
    ///
    /// If payloads remain after the removal, the next blocked receiver
    /// is signalled.
    pub fn get(&self, timeout: Option<Duration>) -> Result<T, Error> {
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut state = self.inner.state.lock().unwrap();

        while state.queue.is_empty() {
            match deadline {
                None => {
                    state = self.inner.available.wait(state).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::TimedOut);
                    }

                    let (guard, _) = self
                        .inner
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state = guard;
                }
            }
        }

        let payload = state.queue.pop_front().unwrap();

        if !state.queue.is_empty() {
            self.inner.available.notify_one();
        }

        Ok(payload)
    }

    /// Snapshot of the current queue length.
    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Type-erased view handed to the event that watches this port.
    pub(crate) fn watch(&self) -> Arc<dyn PortWatch> {
        self.inner.clone()
    }
}

impl<T: Send + 'static> Default for MessagePort<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// What an event context needs from a port, independent of the payload
/// type: arrival checks during dispatch, and binding management during
/// registration and unregistration.
pub(crate) trait PortWatch: Send + Sync {
    /// Current queue length.
    fn pending(&self) -> usize;

    /// Installs `event` as the port's sole wake-up target.
    ///
    /// Fails with [`Busy`](Error::Busy) while a non-canceled event is
    /// bound; a binding left behind by a serviced or unregistered event
    /// is replaced.
    fn bind(&self, event: &Arc<EventInner>) -> Result<(), Error>;

    /// Drops the binding if it still refers to `event`.
    fn unbind(&self, event: &Arc<EventInner>);
}

impl<T: Send> PortWatch for PortInner<T> {
    fn pending(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    fn bind(&self, event: &Arc<EventInner>) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();

        match &state.bound {
            Some(held) if !held.is_canceled() => Err(Error::Busy),
            _ => {
                state.bound = Some(event.clone());
                Ok(())
            }
        }
    }

    fn unbind(&self, event: &Arc<EventInner>) {
        let mut state = self.state.lock().unwrap();

        if let Some(held) = &state.bound {
            if Arc::ptr_eq(held, event) {
                state.bound = None;
            }
        }
    }
}
