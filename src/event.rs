//! Event registrations and their caller-facing handles.
//!
//! An event is a registered interest plus its callback:
//! - readiness of a file descriptor (readable or writable),
//! - a one-shot or recurring timer,
//! - payload arrival on a [`MessagePort`](crate::MessagePort),
//! - a manual condition fired with [`EventHandle::trigger`].
//!
//! Internally every registration is an [`EventInner`] shared between the
//! context queue, the caller's handle slot, a binding port and any
//! in-flight service, with `Arc` strong counts standing in for the
//! ownership graph. The record is immutable except for three state flags
//! that are only ever written under the context lock.

use crate::context::ContextInner;
use crate::port::{MessagePort, PortWatch};

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Behaviour flags accepted at registration.
#[derive(Clone, Copy, Default)]
pub struct EventFlags {
    /// Re-register the event with identical parameters every time it is
    /// serviced. Only meaningful for descriptor and timer events.
    pub recurring: bool,

    /// Run the callback on a dedicated detached thread instead of the
    /// dispatcher thread.
    pub own_thread: bool,
}

/// The condition an event waits for.
///
/// Constructed through the associated functions; the representation is
/// private so a port reference can be carried type-erased.
pub struct EventKind {
    pub(crate) kind: Kind,
}

impl EventKind {
    /// The descriptor becomes readable.
    pub fn readable(fd: RawFd) -> Self {
        Self {
            kind: Kind::Readable(fd),
        }
    }

    /// The descriptor becomes writable.
    pub fn writable(fd: RawFd) -> Self {
        Self {
            kind: Kind::Writable(fd),
        }
    }

    /// `delay` elapses, measured from the moment of registration.
    pub fn timer(delay: Duration) -> Self {
        Self {
            kind: Kind::Timer(delay),
        }
    }

    /// A payload arrives on `port`.
    ///
    /// Registration binds the event to the port and fails with
    /// [`Busy`](crate::Error::Busy) while another live event is bound.
    pub fn port<T: Send + 'static>(port: &MessagePort<T>) -> Self {
        Self {
            kind: Kind::Port(port.watch()),
        }
    }

    /// No condition of its own; fires only via [`EventHandle::trigger`].
    pub fn manual() -> Self {
        Self { kind: Kind::Manual }
    }
}

pub(crate) enum Kind {
    Readable(RawFd),
    Writable(RawFd),
    Timer(Duration),
    Port(Arc<dyn PortWatch>),
    Manual,
}

impl Clone for Kind {
    fn clone(&self) -> Self {
        match self {
            Kind::Readable(fd) => Kind::Readable(*fd),
            Kind::Writable(fd) => Kind::Writable(*fd),
            Kind::Timer(delay) => Kind::Timer(*delay),
            Kind::Port(watch) => Kind::Port(watch.clone()),
            Kind::Manual => Kind::Manual,
        }
    }
}

pub(crate) type Callback = Arc<dyn Fn() + Send + Sync + 'static>;

/// The cell shared between a caller's [`EventHandle`] and the library.
///
/// Holds the currently registered event, if any. The library clears it
/// exactly once per event: on unregistration, or when a one-shot service
/// consumes the event. A recurring service writes the freshly registered
/// replacement into the same slot, so the caller's handle stays live
/// across firings.
///
/// Lock order: the context lock is always taken before the slot lock,
/// never the reverse. Paths without the context lock may only read.
pub(crate) struct HandleSlot {
    current: Mutex<Option<Arc<EventInner>>>,
}

impl HandleSlot {
    pub(crate) fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Clone of the currently registered event, taken without the
    /// context lock. The result may be stale by the time it is used;
    /// callers re-validate under the context lock.
    pub(crate) fn snapshot(&self) -> Option<Arc<EventInner>> {
        self.current.lock().unwrap().clone()
    }

    /// Replaces the slot contents. Caller must hold the context lock.
    pub(crate) fn store(&self, event: Option<Arc<EventInner>>) {
        *self.current.lock().unwrap() = event;
    }

    /// Clears the slot if it still holds `event`. Caller must hold the
    /// context lock. Returns whether the slot was cleared.
    pub(crate) fn clear_if(&self, event: &Arc<EventInner>) -> bool {
        let mut current = self.current.lock().unwrap();
        match &*current {
            Some(held) if Arc::ptr_eq(held, event) => {
                *current = None;
                true
            }
            _ => false,
        }
    }
}

/// One event registration.
///
/// Everything except the three state flags is fixed at registration.
/// The flags are written only under the context lock; loads outside the
/// lock are used for cheap staleness checks and re-validated where it
/// matters.
pub(crate) struct EventInner {
    /// The owning context. Weak, so a context whose last user clone is
    /// dropped can still tear down once its queue drains.
    pub(crate) ctx: Weak<ContextInner>,

    pub(crate) kind: Kind,

    /// Absolute expiry, present for timer events only.
    pub(crate) deadline: Option<Instant>,

    pub(crate) flags: EventFlags,

    pub(crate) callback: Callback,

    /// Caller-supplied lock held around the callback. Acquired with a
    /// yield-and-retry loop while holding the context lock; see the
    /// execute routine.
    pub(crate) user_lock: Option<Arc<Mutex<()>>>,

    /// Back-reference to the caller's handle slot.
    pub(crate) slot: Arc<HandleSlot>,

    /// The event sits in the context queue.
    pub(crate) enqueued: AtomicBool,

    /// The condition has been detected but not yet serviced.
    pub(crate) occurred: AtomicBool,

    /// The event is permanently inactive; its callback will never run.
    pub(crate) canceled: AtomicBool,
}

impl EventInner {
    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

/// Caller-owned handle to a registered event.
///
/// Returned by [`EventContext::register`](crate::EventContext::register).
/// Dropping the handle does not unregister the event; it merely gives up
/// the ability to trigger or unregister it.
pub struct EventHandle {
    pub(crate) slot: Arc<HandleSlot>,
}

impl EventHandle {
    /// Marks the event as occurred and wakes the dispatcher, for any
    /// event kind. Already-occurred work is serviced ahead of work whose
    /// condition has not been evaluated yet.
    ///
    /// Idempotent while the event is awaiting service; a no-op once the
    /// event has been serviced or unregistered.
    pub fn trigger(&self) {
        let Some(event) = self.slot.snapshot() else {
            return;
        };
        let Some(ctx) = event.ctx.upgrade() else {
            return;
        };

        ctx.trigger_event(&event);
    }

    /// Unregisters the event, consuming the handle.
    ///
    /// After this returns the handle slot is empty and the callback will
    /// not be invoked, even if the event had already been marked
    /// occurred. Safe to call while the event is concurrently being
    /// serviced on another thread; an in-flight service that has not yet
    /// committed to running the callback aborts cleanly.
    pub fn unregister(self) {
        loop {
            let Some(event) = self.slot.snapshot() else {
                return;
            };
            let Some(ctx) = event.ctx.upgrade() else {
                // The context is gone; nothing left to dequeue.
                self.slot.store(None);
                return;
            };

            if ctx.cancel_via_slot(&self.slot, &event) {
                return;
            }

            // A recurring service rotated the slot to a replacement
            // event between the snapshot and the locked check; retry
            // against the replacement.
        }
    }

    /// Whether the handle still refers to a registered event.
    pub fn is_active(&self) -> bool {
        self.slot.snapshot().is_some()
    }
}
