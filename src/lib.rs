//! # Revent
//!
//! **Revent** is an embedded event reactor: a library component that
//! lets an application register interest in file-descriptor readiness,
//! timers, inter-thread message arrival, or manually-triggered
//! conditions, and have a callback invoked when the condition occurs —
//! without writing its own wait/dispatch loop.
//!
//! It is not a general-purpose async runtime: there are no futures, no
//! work-stealing and no completion-based backend. Each
//! [`EventContext`] runs one lazily-spawned dispatcher thread that
//! blocks in a multiplexed `poll(2)` wait, and the only scheduling rule
//! is that events whose condition has already been detected are
//! serviced before events still being evaluated.
//!
//! The crate offers:
//!
//! - **Descriptor events** — readable/writable interest on any raw
//!   file descriptor (sockets, pipes)
//! - **Timer events** — one-shot or recurring delays
//! - **Message ports** — thread-safe typed FIFO queues whose arrivals
//!   can wake a context instead of a dedicated receiver thread
//! - **Manual events** — fired explicitly with
//!   [`EventHandle::trigger`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use revent::{EventContext, EventFlags, EventKind, MessagePort};
//!
//! let ctx = EventContext::new();
//! let port = MessagePort::new();
//!
//! let handle = ctx.register(
//!     EventKind::port(&port),
//!     EventFlags::default(),
//!     move || println!("a message arrived"),
//! )?;
//!
//! port.put(42u32);
//! ```
//!
//! Callbacks run with no reactor lock held. A callback serviced inline
//! (the default) runs on the dispatcher thread and must not block
//! indefinitely; set [`EventFlags::own_thread`](EventFlags) to run it
//! on a dedicated thread instead.

mod context;
mod error;
mod event;
mod poller;
mod port;

pub use context::EventContext;
pub use error::Error;
pub use event::{EventFlags, EventHandle, EventKind};
pub use port::MessagePort;
