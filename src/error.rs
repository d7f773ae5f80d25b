use std::io;

use thiserror::Error;

/// Errors reported by the reactor.
///
/// All fallible operations in this crate return this type. Readiness-wait
/// failures are deliberately absent: a broken descriptor set inside the
/// dispatcher is an invariant violation and panics instead of being
/// surfaced as a recoverable error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The registration flags do not make sense for the event kind
    /// (for example a recurring manual event).
    #[error("invalid registration flags for this event kind")]
    InvalidArgument,

    /// A live event is already bound to the message port.
    ///
    /// A port accepts at most one waiting event; the binding becomes
    /// free again once the bound event fires or is unregistered.
    #[error("a live event is already bound to this port")]
    Busy,

    /// The dispatcher thread could not be spawned.
    ///
    /// The registration that triggered the spawn is rolled back before
    /// this is returned.
    #[error("failed to spawn the dispatcher thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// [`MessagePort::get`](crate::MessagePort::get) gave up waiting
    /// before a payload arrived.
    #[error("timed out waiting for a message")]
    TimedOut,
}
