//! BSD/macOS backend: `kqueue` with `EV_CLEAR`, giving the same
//! once-per-transition semantics as epoll's edge-triggered mode.
//!
//! Unlike epoll, a descriptor's read and write interest are two
//! independent filters (`EVFILT_READ`/`EVFILT_WRITE`) rather than bits
//! in one event, and a single `kevent()` call can report them
//! separately even within the same `wait`. Results are folded back
//! together by token before being handed to the caller so one ready
//! descriptor never produces two [`Event`]s in the same batch.

use super::{ERR, Event, Poller, READ, WRITE};

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use libc::{
    EV_ADD, EV_CLEAR, EV_DELETE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_WRITE, kevent, kqueue,
    timespec,
};

pub struct KqueuePoller {
    kq: RawFd,
    tokens: HashMap<RawFd, usize>,
    raw_events: Vec<kevent>,
}

fn change(fd: RawFd, filter: i16, flags: u16) -> kevent {
    kevent {
        ident: fd as usize,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: std::ptr::null_mut(),
    }
}

impl KqueuePoller {
    fn apply(&mut self, changes: &[kevent]) -> io::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let rc = unsafe {
            kevent(
                self.kq,
                changes.as_ptr(),
                changes.len() as i32,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if rc < 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
    }
}

impl Poller for KqueuePoller {
    fn create() -> io::Result<Self> {
        let kq = unsafe { kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            kq,
            tokens: HashMap::new(),
            raw_events: Vec::new(),
        })
    }

    fn add(&mut self, fd: RawFd, token: usize, mask: u32) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);
        if mask & READ != 0 {
            changes.push(change(fd, EVFILT_READ, (EV_ADD | EV_CLEAR) as u16));
        }
        if mask & WRITE != 0 {
            changes.push(change(fd, EVFILT_WRITE, (EV_ADD | EV_CLEAR) as u16));
        }
        self.apply(&changes)?;
        self.tokens.insert(fd, token);
        Ok(())
    }

    fn update(&mut self, fd: RawFd, token: usize, mask: u32) -> io::Result<()> {
        let changes = [
            change(fd, EVFILT_READ, EV_DELETE as u16),
            change(fd, EVFILT_WRITE, EV_DELETE as u16),
        ];
        // Deleting a filter that isn't registered returns ENOENT;
        // harmless here since we re-add exactly what `mask` wants next.
        let _ = self.apply(&changes);
        self.add(fd, token, mask)
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        let changes = [
            change(fd, EVFILT_READ, EV_DELETE as u16),
            change(fd, EVFILT_WRITE, EV_DELETE as u16),
        ];
        let _ = self.apply(&changes);
        self.tokens.remove(&fd);
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>, out: &mut Vec<Event>) -> io::Result<usize> {
        if self.raw_events.len() < self.tokens.len().max(1) {
            self.raw_events
                .resize(self.tokens.len().max(64) * 2, unsafe { std::mem::zeroed() });
        }

        let ts = timeout.map(|d| timespec {
            tv_sec: d.as_secs() as _,
            tv_nsec: d.subsec_nanos() as _,
        });
        let ts_ptr = ts.as_ref().map_or(std::ptr::null(), |t| t as *const timespec);

        loop {
            let n = unsafe {
                kevent(
                    self.kq,
                    std::ptr::null(),
                    0,
                    self.raw_events.as_mut_ptr(),
                    self.raw_events.len() as i32,
                    ts_ptr,
                )
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            let mut folded: HashMap<usize, u32> = HashMap::new();
            for raw in &self.raw_events[..n as usize] {
                let fd = raw.ident as RawFd;
                let Some(&token) = self.tokens.get(&fd) else {
                    continue;
                };

                let mut mask = 0u32;
                if raw.filter == EVFILT_READ {
                    mask |= READ;
                } else if raw.filter == EVFILT_WRITE {
                    mask |= WRITE;
                }
                if raw.flags & (EV_EOF as u16) != 0 || raw.flags & (EV_ERROR as u16) != 0 {
                    mask |= ERR;
                }

                *folded.entry(token).or_insert(0) |= mask;
            }

            for (token, mask) in &folded {
                out.push(Event {
                    token: *token,
                    mask: *mask,
                });
            }
            return Ok(folded.len());
        }
    }
}

impl Drop for KqueuePoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}
