//! Platform layer for the dispatcher's multiplexed wait.
//!
//! This module wraps the OS readiness primitives the dispatcher blocks on:
//! - a `poll(2)`-based wait set rebuilt on every dispatcher pass,
//! - a non-blocking self-pipe used to interrupt a blocking wait.
//!
//! The wait set is rebuilt from scratch each pass rather than kept
//! registered in the kernel; the reactor's descriptor counts are small
//! and registrations churn with every one-shot event.
//!
//! Only Unix targets are supported.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub(crate) use unix::{Interest, Poller, WakePipe};
