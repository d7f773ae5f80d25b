//! The reactor core: event contexts and their dispatcher.
//!
//! An [`EventContext`] owns the queue of registered events and the
//! single dispatcher thread that waits on their conditions. The module
//! is split between:
//! - `core`: the context object, registration, and all queue state
//!   manipulation under the context lock,
//! - `dispatcher`: the wait/dispatch loop and the execute routine that
//!   runs callbacks.
//!
//! The dispatcher thread is lazily spawned by the first registration and
//! exits when the queue drains; it communicates with nothing directly,
//! waking purely through the context's wake pipe.

mod core;
mod dispatcher;

pub use self::core::EventContext;
pub(crate) use self::core::ContextInner;
