use crate::context::core::{ContextInner, ContextShared};
use crate::event::{EventInner, Kind};
use crate::poller::{Interest, Poller};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

/// Body of the dispatcher thread: the only place a context blocks.
///
/// Each pass plans a wait set under the context lock, blocks in
/// `poll(2)` with the lock released, marks whatever fired, and services
/// the occurred prefix of the queue. The thread exits when the queue
/// drains; the next registration respawns it.
pub(crate) fn dispatcher_main(ctx: Arc<ContextInner>) {
    let mut poller = Poller::new();

    loop {
        // Descriptor events placed in this pass's wait set, in push
        // order; index i maps to wait-set slot i.
        let mut fd_events: Vec<Arc<EventInner>> = Vec::new();
        let timeout;

        {
            let mut shared = ctx.shared.lock().unwrap();

            if shared.queue.is_empty() {
                shared.dispatcher_alive = false;
                debug!("queue drained, dispatcher exiting");
                return;
            }

            // Wake requests land only under the context lock, so
            // draining here cannot lose one: anything requested before
            // this point is already reflected in the queue state read
            // below, anything after leaves a byte for poll(2) to see.
            ctx.wake.drain();

            poller.begin(ctx.wake.read_fd());

            let now = Instant::now();
            let mut any_occurred = false;
            let mut min_delay: Option<Duration> = None;
            let mut skipped = false;
            let mut arrived: Vec<Arc<EventInner>> = Vec::new();

            for event in shared.queue.iter() {
                if event.occurred.load(Ordering::Acquire) {
                    any_occurred = true;
                    continue;
                }

                match &event.kind {
                    Kind::Readable(fd) | Kind::Writable(fd) => {
                        if fd_events.len() == shared.fd_capacity {
                            // Soft fairness cap; grown below and the
                            // leftovers picked up next pass.
                            skipped = true;
                            continue;
                        }

                        let write = matches!(event.kind, Kind::Writable(_));
                        poller.push(
                            *fd,
                            Interest {
                                read: !write,
                                write,
                            },
                        );
                        fd_events.push(event.clone());
                    }

                    Kind::Timer(_) => {
                        if let Some(deadline) = event.deadline {
                            let remaining = deadline.saturating_duration_since(now);
                            min_delay = Some(match min_delay {
                                Some(d) => d.min(remaining),
                                None => remaining,
                            });
                        }
                    }

                    // Ports are level-checked directly; no waiting
                    // involved.
                    Kind::Port(watch) => {
                        if watch.pending() > 0 {
                            arrived.push(event.clone());
                        }
                    }

                    Kind::Manual => {}
                }
            }

            for event in &arrived {
                ctx.trigger_locked(&mut shared, event);
                any_occurred = true;
            }

            if skipped {
                shared.fd_capacity *= 2;
            }

            timeout = if any_occurred || skipped {
                Some(Duration::ZERO)
            } else {
                min_delay
            };
        }

        if let Err(e) = poller.wait(timeout) {
            // Not recoverable: the descriptor set itself is broken.
            panic!("readiness wait failed: {e}");
        }

        {
            let mut shared = ctx.shared.lock().unwrap();

            let now = Instant::now();
            let mut fired: Vec<Arc<EventInner>> = Vec::new();

            for (index, event) in fd_events.iter().enumerate() {
                if poller.ready(index) {
                    fired.push(event.clone());
                }
            }

            for event in shared.queue.iter() {
                if let (Kind::Timer(_), Some(deadline)) = (&event.kind, event.deadline) {
                    if deadline <= now {
                        fired.push(event.clone());
                    }
                }
            }

            // trigger_locked skips anything canceled or already
            // occurred, which also covers events unregistered while the
            // wait was in flight.
            for event in &fired {
                ctx.trigger_locked(&mut shared, event);
            }
        }

        // Service the occurred prefix. The queue head is re-examined
        // under the lock each round because a callback may register,
        // trigger or unregister events.
        loop {
            let event = {
                let mut shared = ctx.shared.lock().unwrap();
                match shared.queue.front() {
                    Some(head) if head.occurred.load(Ordering::Acquire) => {
                        let head = shared.queue.pop_front().unwrap();
                        head.enqueued.store(false, Ordering::Release);
                        head
                    }
                    _ => break,
                }
            };

            dispatch(&ctx, event);
        }
    }
}

/// Hands one dequeued event to its callback, inline or on a dedicated
/// worker thread.
///
/// Worker spawn failure is a deliberate dropped-work path: the callback
/// is not invoked and the event is canceled, because retrying risks an
/// unbounded thread-creation storm. The loss is logged.
fn dispatch(ctx: &Arc<ContextInner>, event: Arc<EventInner>) {
    if !event.flags.own_thread {
        execute(ctx, &event);
        return;
    }

    let worker_ctx = ctx.clone();
    let worker_event = event.clone();

    let spawned = thread::Builder::new()
        .name("revent-worker".into())
        .spawn(move || execute(&worker_ctx, &worker_event));

    if let Err(e) = spawned {
        error!(error = %e, "worker spawn failed, dropping scheduled callback");

        let mut shared = ctx.shared.lock().unwrap();
        event.slot.clear_if(&event);
        ctx.cancel_locked(&mut shared, &event);
        drop(shared);

        if let Kind::Port(watch) = &event.kind {
            watch.unbind(&event);
        }
    }
}

/// Runs a serviced event's callback.
///
/// Entered with the context lock released, on the dispatcher thread or a
/// worker. The lock order here is the crate's global rule: context lock
/// first, then the user lock, never the reverse. The user lock is taken
/// with `try_lock` while the context lock is held; on contention both
/// are backed out and the whole sequence retried after a yield. The
/// retry is unbounded, matching the reactor's contract that the user
/// lock is only ever held briefly.
fn execute(ctx: &Arc<ContextInner>, event: &Arc<EventInner>) {
    loop {
        let mut shared = ctx.shared.lock().unwrap();

        // Closes the unregister/fire race: cancellation wins if it got
        // the context lock first.
        if event.is_canceled() {
            trace!("event canceled before service, dropping");
            return;
        }

        let user_guard = match &event.user_lock {
            None => None,
            Some(lock) => match lock.try_lock() {
                Ok(guard) => Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    drop(shared);
                    thread::yield_now();
                    continue;
                }
            },
        };

        // From the handle's perspective this event is now spent. A
        // recurring event re-registers its replacement into the same
        // slot before the lock is released, so a slow callback cannot
        // open a scheduling gap.
        event.canceled.store(true, Ordering::Release);
        event.slot.clear_if(event);

        if event.flags.recurring {
            respawn_locked(ctx, &mut shared, event);
        }

        drop(shared);

        // A level-checked port service reaches here with the binding
        // still attached (no put detached it); release it so the port
        // does not keep the spent event and its callback alive.
        if let Kind::Port(watch) = &event.kind {
            watch.unbind(event);
        }

        (event.callback)();

        drop(user_guard);
        return;
    }
}

/// Re-registers a fresh event with the parameters of `event`, writing it
/// into the same handle slot. Caller holds the context lock.
fn respawn_locked(
    ctx: &Arc<ContextInner>,
    shared: &mut MutexGuard<'_, ContextShared>,
    event: &Arc<EventInner>,
) {
    let deadline = match event.kind {
        Kind::Timer(delay) => Some(Instant::now() + delay),
        _ => None,
    };

    let next = Arc::new(EventInner {
        ctx: event.ctx.clone(),
        kind: event.kind.clone(),
        deadline,
        flags: event.flags,
        callback: event.callback.clone(),
        user_lock: event.user_lock.clone(),
        slot: event.slot.clone(),
        enqueued: AtomicBool::new(true),
        occurred: AtomicBool::new(false),
        canceled: AtomicBool::new(false),
    });

    shared.queue.push_back(next.clone());
    event.slot.store(Some(next));

    // Usually this runs on the dispatcher itself, but a worker-thread
    // service can land after the dispatcher drained out and exited.
    if let Err(e) = ctx.ensure_dispatcher(shared) {
        error!(error = %e, "dispatcher respawn failed; event stays queued until the next registration");
    }

    ctx.wake.wake();
}
