//! Readiness-driven event loop: a single poller plus a dispatch
//! callback invoked once per ready file descriptor.
//!
//! The mask is a 24-bit field split into three byte-wide lanes so a
//! descriptor's read/write/error state can be OR'd together and
//! inspected independently (`mask & READ != 0`, etc.) without a
//! separate struct per interest kind.

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Readable.
pub const READ: u32 = 0x0000FF;
/// Writable.
pub const WRITE: u32 = 0x00FF00;
/// Error or hang-up condition.
pub const ERR: u32 = 0xFF0000;

/// One readiness notification: which registration fired, and which
/// lanes of [`READ`]/[`WRITE`]/[`ERR`] are set.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: usize,
    pub mask: u32,
}

/// A platform readiness backend (edge-triggered on Linux; kqueue's
/// `EV_CLEAR` gives the same semantics on BSD/macOS).
///
/// Implementations fire a registration once per not-ready→ready
/// transition; callers must drain a descriptor to `EAGAIN` before
/// waiting again, or they will stall waiting for an edge that already
/// passed.
pub trait Poller: Sized {
    fn create() -> io::Result<Self>;
    fn add(&mut self, fd: RawFd, token: usize, mask: u32) -> io::Result<()>;
    fn update(&mut self, fd: RawFd, token: usize, mask: u32) -> io::Result<()>;
    fn remove(&mut self, fd: RawFd) -> io::Result<()>;
    /// Blocks until at least one registration is ready or `timeout`
    /// elapses, appending ready events to `out`. Returns the count
    /// appended. Transparently retries on `EINTR`.
    fn wait(&mut self, timeout: Option<Duration>, out: &mut Vec<Event>) -> io::Result<usize>;
}

#[cfg(target_os = "linux")]
pub use epoll::EpollPoller as DefaultPoller;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::KqueuePoller as DefaultPoller;

/// Owns a poller, its scratch event buffer, and the single dispatch
/// callback invoked for every readiness notification.
///
/// Not `Send`/`Sync`: an `EventBase` and the pools it drives belong to
/// exactly one thread. Sharing one across threads would need external
/// synchronization this crate deliberately doesn't provide — run one
/// per worker thread instead.
pub struct EventBase<P: Poller = DefaultPoller> {
    poller: P,
    events: Vec<Event>,
    cb: Box<dyn FnMut(usize, u32)>,
}

impl<P: Poller> EventBase<P> {
    /// Creates a base with scratch space for up to `size` events per
    /// `wait` call. `cb(token, mask)` runs once per ready registration,
    /// in the order the backend reports them.
    pub fn create(size: usize, cb: impl FnMut(usize, u32) + 'static) -> io::Result<Self> {
        Ok(Self {
            poller: P::create()?,
            events: Vec::with_capacity(size),
            cb: Box::new(cb),
        })
    }

    /// Registers `fd` for both read and write readiness in one call.
    pub fn register(&mut self, fd: RawFd, token: usize, mask: u32) -> io::Result<()> {
        self.poller.add(fd, token, mask)
    }

    pub fn add_read(&mut self, fd: RawFd, token: usize) -> io::Result<()> {
        self.poller.add(fd, token, READ)
    }

    pub fn add_write(&mut self, fd: RawFd, token: usize) -> io::Result<()> {
        self.poller.add(fd, token, WRITE)
    }

    /// Convenience for registering both directions at once, per the
    /// `event_register` contract.
    pub fn add_read_write(&mut self, fd: RawFd, token: usize) -> io::Result<()> {
        self.poller.add(fd, token, READ | WRITE)
    }

    pub fn reregister(&mut self, fd: RawFd, token: usize, mask: u32) -> io::Result<()> {
        self.poller.update(fd, token, mask)
    }

    pub fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.poller.remove(fd)
    }

    /// Waits for readiness and dispatches `cb` once per ready
    /// registration. Returns the number of events dispatched — `0` on
    /// an ordinary timeout, never on error (`EINTR` is retried inside
    /// the poller).
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        self.events.clear();
        let n = self.poller.wait(timeout, &mut self.events)?;
        for ev in &self.events {
            (self.cb)(ev.token, ev.mask);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_err_lanes_do_not_overlap() {
        assert_eq!(READ & WRITE, 0);
        assert_eq!(READ & ERR, 0);
        assert_eq!(WRITE & ERR, 0);
    }
}
