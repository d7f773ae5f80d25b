use libc::{
    F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, POLLERR, POLLHUP, POLLIN, POLLNVAL,
    POLLOUT, c_int, close, fcntl, nfds_t, pipe, poll, pollfd, read, write,
};
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Readiness interest for a registered descriptor.
#[derive(Clone, Copy)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

/// Closes a file descriptor.
pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Sets a file descriptor to non-blocking mode.
fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Marks a file descriptor close-on-exec.
fn sys_set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFD, flags | FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// The wake-up channel of an event context.
///
/// A `WakePipe` is a non-blocking self-pipe whose read end sits in every
/// wait set the dispatcher builds. Writing to it interrupts a blocking
/// `poll(2)` call.
///
/// The signal is coalesced: an atomic flag suppresses duplicate writes,
/// so any number of threads may request a wake-up while one is pending
/// without flooding the pipe. The dispatcher drains the pipe and clears
/// the flag before rebuilding its wait set.
pub(crate) struct WakePipe {
    /// Read end, polled by the dispatcher.
    rfd: RawFd,

    /// Write end, written by [`wake`](Self::wake).
    wfd: RawFd,

    /// Set while a wake byte is in flight.
    pending: AtomicBool,
}

impl WakePipe {
    /// Creates the pipe with both ends non-blocking and close-on-exec.
    ///
    /// Failure to set up the pipe leaves the context without any way to
    /// interrupt its dispatcher, so it is treated as fatal.
    pub(crate) fn new() -> Self {
        let mut fds: [c_int; 2] = [0; 2];

        let rc = unsafe { pipe(fds.as_mut_ptr()) };
        assert!(rc == 0, "failed to create the wake pipe");

        for fd in fds {
            sys_set_nonblocking(fd).expect("failed to set the wake pipe non-blocking");
            sys_set_cloexec(fd).expect("failed to set the wake pipe close-on-exec");
        }

        Self {
            rfd: fds[0],
            wfd: fds[1],
            pending: AtomicBool::new(false),
        }
    }

    /// Returns the descriptor the dispatcher should poll for readability.
    pub(crate) fn read_fd(&self) -> RawFd {
        self.rfd
    }

    /// Requests a dispatcher wake-up.
    ///
    /// No-op while a previous request is still pending. The write itself
    /// can only fail with `EAGAIN` on a full pipe, which still leaves a
    /// byte in flight, so the result is ignored.
    pub(crate) fn wake(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let buf = [1u8];
        unsafe {
            write(self.wfd, buf.as_ptr() as *const _, 1);
        }
    }

    /// Drains any in-flight wake bytes and re-arms the signal.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 16];

        loop {
            let n = unsafe { read(self.rfd, buf.as_mut_ptr() as *mut _, buf.len()) };
            if n <= 0 {
                break;
            }
        }

        self.pending.store(false, Ordering::Release);
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        sys_close(self.rfd);
        sys_close(self.wfd);
    }
}

/// A `poll(2)` wait set.
///
/// The dispatcher rebuilds the set on every pass: the wake pipe first,
/// then one slot per descriptor event currently in the queue. After
/// [`wait`](Self::wait) returns, readiness is read back by the index the
/// descriptor was pushed with.
pub(crate) struct Poller {
    fds: Vec<pollfd>,
}

impl Poller {
    pub(crate) fn new() -> Self {
        Self {
            fds: Vec::with_capacity(64),
        }
    }

    /// Starts a fresh wait set containing only the wake pipe.
    pub(crate) fn begin(&mut self, wake_fd: RawFd) {
        self.fds.clear();
        self.fds.push(pollfd {
            fd: wake_fd,
            events: POLLIN,
            revents: 0,
        });
    }

    /// Adds a descriptor to the wait set.
    pub(crate) fn push(&mut self, fd: RawFd, interest: Interest) {
        let mut events = 0;

        if interest.read {
            events |= POLLIN;
        }
        if interest.write {
            events |= POLLOUT;
        }

        self.fds.push(pollfd {
            fd,
            events,
            revents: 0,
        });
    }

    /// Blocks until a descriptor is ready, the wake pipe is written,
    /// or the timeout expires. `None` waits indefinitely.
    ///
    /// `EINTR` is benign and reported as an empty wait; any other
    /// failure is returned to the caller, which treats it as a corrupted
    /// descriptor set.
    pub(crate) fn wait(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms: c_int = match timeout {
            None => -1,
            Some(t) => {
                // Round up so a timer never fires early.
                let mut ms = t.as_millis();
                if Duration::from_millis(ms as u64) < t {
                    ms += 1;
                }
                ms.min(c_int::MAX as u128) as c_int
            }
        };

        let rc = unsafe { poll(self.fds.as_mut_ptr(), self.fds.len() as nfds_t, timeout_ms) };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                for slot in &mut self.fds {
                    slot.revents = 0;
                }
                return Ok(());
            }
            return Err(err);
        }

        Ok(())
    }

    /// Reports whether the `index`-th pushed descriptor signalled.
    ///
    /// Error conditions (`POLLERR`, `POLLHUP`, `POLLNVAL`) count as
    /// readiness so the owning event gets serviced and can observe the
    /// failure on its descriptor.
    pub(crate) fn ready(&self, index: usize) -> bool {
        let slot = &self.fds[index + 1];
        slot.revents & (slot.events | POLLERR | POLLHUP | POLLNVAL) != 0
    }
}
