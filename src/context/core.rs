use crate::context::dispatcher;
use crate::error::Error;
use crate::event::{Callback, EventFlags, EventHandle, EventInner, EventKind, HandleSlot, Kind};
use crate::poller::WakePipe;

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use tracing::debug;

/// Initial cap on descriptors placed in one wait set. Grown whenever a
/// pass had to skip events, so it is a soft fairness limit rather than a
/// hard bound.
const INITIAL_FD_CAPACITY: usize = 64;

/// An event reactor.
///
/// A context owns a queue of registered events and a lazily-spawned
/// dispatcher thread that waits for their conditions and services them.
/// The dispatcher exits when the queue drains and is respawned by the
/// next registration.
///
/// Cloning is cheap and yields another handle to the same reactor. The
/// dispatcher holds its own reference, so a context stays alive through
/// an in-flight dispatch pass even if every user clone is dropped; it is
/// torn down once the queue is empty and the dispatcher has exited.
#[derive(Clone)]
pub struct EventContext {
    pub(crate) inner: Arc<ContextInner>,
}

pub(crate) struct ContextInner {
    /// All queue and per-event state lives behind this one lock. It is
    /// the first lock in the crate's lock order: context lock, then
    /// handle slot or user lock, never the reverse.
    pub(crate) shared: Mutex<ContextShared>,

    /// Interrupts a dispatcher blocked in its readiness wait. Written
    /// only while holding the context lock, which is what makes draining
    /// it under the lock race-free.
    pub(crate) wake: WakePipe,
}

pub(crate) struct ContextShared {
    /// Registered events. Invariant: events marked occurred form a
    /// prefix, in the order their conditions were detected; the
    /// dispatcher services the head while it is occurred.
    pub(crate) queue: VecDeque<Arc<EventInner>>,

    /// A dispatcher thread is running (or committed to run).
    pub(crate) dispatcher_alive: bool,

    /// Current wait-set cap, see [`INITIAL_FD_CAPACITY`].
    pub(crate) fd_capacity: usize,
}

impl EventContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                shared: Mutex::new(ContextShared {
                    queue: VecDeque::new(),
                    dispatcher_alive: false,
                    fd_capacity: INITIAL_FD_CAPACITY,
                }),
                wake: WakePipe::new(),
            }),
        }
    }

    /// Registers an event against this context.
    ///
    /// The callback runs with no reactor lock held once the event's
    /// condition occurs. If it runs on the dispatcher thread (the
    /// default), it must not block indefinitely or it stalls the whole
    /// context.
    ///
    /// Spawns the dispatcher thread if none is running; on spawn failure
    /// the registration is rolled back and
    /// [`ThreadSpawn`](Error::ThreadSpawn) returned.
    ///
    /// # Errors
    ///
    /// [`InvalidArgument`](Error::InvalidArgument) for recurring manual
    /// or port events, [`Busy`](Error::Busy) if the target port already
    /// has a live event bound.
    pub fn register<F>(
        &self,
        kind: EventKind,
        flags: EventFlags,
        callback: F,
    ) -> Result<EventHandle, Error>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register_inner(kind, flags, None, Arc::new(callback))
    }

    /// Like [`register`](Self::register), with a caller-supplied lock
    /// that is held for the duration of the callback.
    ///
    /// The lock is acquired context-lock-first with a yield-and-retry
    /// loop, so callers may hold it while calling into the reactor
    /// without risking deadlock.
    pub fn register_with_lock<F>(
        &self,
        kind: EventKind,
        flags: EventFlags,
        user_lock: Arc<Mutex<()>>,
        callback: F,
    ) -> Result<EventHandle, Error>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register_inner(kind, flags, Some(user_lock), Arc::new(callback))
    }

    fn register_inner(
        &self,
        kind: EventKind,
        flags: EventFlags,
        user_lock: Option<Arc<Mutex<()>>>,
        callback: Callback,
    ) -> Result<EventHandle, Error> {
        let kind = kind.kind;

        if flags.recurring && matches!(kind, Kind::Manual | Kind::Port(_)) {
            return Err(Error::InvalidArgument);
        }

        let deadline = match kind {
            Kind::Timer(delay) => Some(Instant::now() + delay),
            _ => None,
        };

        let slot = Arc::new(HandleSlot::new());
        let event = Arc::new(EventInner {
            ctx: Arc::downgrade(&self.inner),
            kind,
            deadline,
            flags,
            callback,
            user_lock,
            slot: slot.clone(),
            enqueued: AtomicBool::new(false),
            occurred: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
        });

        // Bind before enqueueing so a Busy port fails the registration
        // before anything else has happened.
        if let Kind::Port(watch) = &event.kind {
            watch.bind(&event)?;
        }

        let mut shared = self.inner.shared.lock().unwrap();

        if let Err(e) = self.inner.ensure_dispatcher(&mut shared) {
            drop(shared);
            event.canceled.store(true, Ordering::Release);
            if let Kind::Port(watch) = &event.kind {
                watch.unbind(&event);
            }
            return Err(Error::ThreadSpawn(e));
        }

        shared.queue.push_back(event.clone());
        event.enqueued.store(true, Ordering::Release);

        // A put can fire the binding between the bind above and this
        // lock acquisition; the trigger then found the event not yet
        // enqueued and could only mark it occurred. Promote it into the
        // occurred prefix now, or it would sit occurred at the back of
        // the queue where the dispatcher never services it.
        if event.occurred.load(Ordering::Acquire) {
            promote(&mut shared, &event);
            self.inner.wake.wake();
        }

        slot.store(Some(event));

        Ok(EventHandle { slot })
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextInner {
    /// Spawns the dispatcher if none is running, otherwise wakes the one
    /// that is. Caller holds the context lock.
    pub(crate) fn ensure_dispatcher(
        self: &Arc<Self>,
        shared: &mut MutexGuard<'_, ContextShared>,
    ) -> io::Result<()> {
        if shared.dispatcher_alive {
            self.wake.wake();
            return Ok(());
        }

        let ctx = self.clone();
        thread::Builder::new()
            .name("revent-dispatcher".into())
            .spawn(move || dispatcher::dispatcher_main(ctx))?;

        shared.dispatcher_alive = true;
        debug!("dispatcher spawned");

        Ok(())
    }

    /// Marks `event` occurred and wakes the dispatcher.
    pub(crate) fn trigger_event(self: &Arc<Self>, event: &Arc<EventInner>) {
        let mut shared = self.shared.lock().unwrap();
        self.trigger_locked(&mut shared, event);
    }

    /// Locked body of [`trigger_event`], shared with the dispatcher's
    /// own readiness marking. Idempotent: a second trigger before the
    /// service is a no-op, as is any trigger after cancellation.
    pub(crate) fn trigger_locked(
        self: &Arc<Self>,
        shared: &mut MutexGuard<'_, ContextShared>,
        event: &Arc<EventInner>,
    ) {
        if event.canceled.load(Ordering::Acquire) || event.occurred.load(Ordering::Acquire) {
            return;
        }

        event.occurred.store(true, Ordering::Release);

        if event.enqueued.load(Ordering::Acquire) {
            promote(shared, event);
            self.wake.wake();
        }
    }

    /// Cancels the event held by `slot`, provided the slot still holds
    /// `event`. Returns false if the slot rotated to a replacement in
    /// the window between the caller's snapshot and this locked check.
    pub(crate) fn cancel_via_slot(
        self: &Arc<Self>,
        slot: &Arc<HandleSlot>,
        event: &Arc<EventInner>,
    ) -> bool {
        let mut shared = self.shared.lock().unwrap();

        if !slot.clear_if(event) {
            return false;
        }

        self.cancel_locked(&mut shared, event);
        drop(shared);

        if let Kind::Port(watch) = &event.kind {
            watch.unbind(event);
        }

        true
    }

    /// Dequeues (if enqueued) and cancels `event`. Caller holds the
    /// context lock.
    pub(crate) fn cancel_locked(
        self: &Arc<Self>,
        shared: &mut MutexGuard<'_, ContextShared>,
        event: &Arc<EventInner>,
    ) {
        if event.enqueued.load(Ordering::Acquire) {
            if let Some(pos) = shared.queue.iter().position(|e| Arc::ptr_eq(e, event)) {
                shared.queue.remove(pos);
            }
            event.enqueued.store(false, Ordering::Release);
            self.wake.wake();
        }

        event.canceled.store(true, Ordering::Release);
    }
}

/// Moves `event` to the tail of the occurred prefix: behind every event
/// that occurred earlier, ahead of everything still pending. Caller
/// holds the context lock and has already marked the event occurred.
fn promote(shared: &mut MutexGuard<'_, ContextShared>, event: &Arc<EventInner>) {
    let Some(pos) = shared.queue.iter().position(|e| Arc::ptr_eq(e, event)) else {
        return;
    };

    let taken = shared.queue.remove(pos).unwrap();

    let insert_at = shared
        .queue
        .iter()
        .take_while(|e| e.occurred.load(Ordering::Acquire))
        .count();

    shared.queue.insert(insert_at, taken);
}
