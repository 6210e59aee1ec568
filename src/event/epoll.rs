//! Linux backend: `epoll` in edge-triggered mode.

use super::{ERR, Event, Poller, READ, WRITE};

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use libc::{
    EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLOUT,
    epoll_ctl, epoll_event, epoll_wait,
};

pub struct EpollPoller {
    epoll: RawFd,
    // epoll_event carries no user token wide enough on its own once
    // packed into `u64` alongside flags, so tokens are kept here keyed
    // by fd rather than squeezed into `epoll_event.u64`.
    tokens: HashMap<RawFd, usize>,
    raw_events: Vec<epoll_event>,
}

fn mask_to_epoll(mask: u32) -> u32 {
    let mut bits = EPOLLET as u32;
    if mask & READ != 0 {
        bits |= EPOLLIN as u32;
    }
    if mask & WRITE != 0 {
        bits |= EPOLLOUT as u32;
    }
    bits
}

fn epoll_to_mask(bits: u32) -> u32 {
    let mut mask = 0u32;
    if bits & EPOLLIN as u32 != 0 {
        mask |= READ;
    }
    if bits & EPOLLOUT as u32 != 0 {
        mask |= WRITE;
    }
    if bits & (EPOLLERR as u32 | EPOLLHUP as u32) != 0 {
        mask |= ERR;
    }
    mask
}

impl Poller for EpollPoller {
    fn create() -> io::Result<Self> {
        let epoll = unsafe { libc::epoll_create1(0) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epoll,
            tokens: HashMap::new(),
            raw_events: Vec::new(),
        })
    }

    fn add(&mut self, fd: RawFd, token: usize, mask: u32) -> io::Result<()> {
        let mut ev = epoll_event {
            events: mask_to_epoll(mask),
            u64: fd as u64,
        };
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        self.tokens.insert(fd, token);
        Ok(())
    }

    fn update(&mut self, fd: RawFd, token: usize, mask: u32) -> io::Result<()> {
        let mut ev = epoll_event {
            events: mask_to_epoll(mask),
            u64: fd as u64,
        };
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        self.tokens.insert(fd, token);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        self.tokens.remove(&fd);
        if rc < 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
    }

    fn wait(&mut self, timeout: Option<Duration>, out: &mut Vec<Event>) -> io::Result<usize> {
        if self.raw_events.len() < self.tokens.len().max(1) {
            self.raw_events
                .resize(self.tokens.len().max(64), unsafe { std::mem::zeroed() });
        }

        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
        };

        loop {
            let n = unsafe {
                epoll_wait(
                    self.epoll,
                    self.raw_events.as_mut_ptr(),
                    self.raw_events.len() as i32,
                    timeout_ms,
                )
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            for raw in &self.raw_events[..n as usize] {
                let fd = raw.u64 as RawFd;
                if let Some(&token) = self.tokens.get(&fd) {
                    out.push(Event {
                        token,
                        mask: epoll_to_mask(raw.events),
                    });
                }
            }
            return Ok(n as usize);
        }
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_translation_round_trips_read_write() {
        let bits = mask_to_epoll(READ | WRITE);
        assert_eq!(epoll_to_mask(bits), READ | WRITE);
    }

    #[test]
    fn error_and_hangup_both_set_err_lane() {
        assert_eq!(epoll_to_mask(EPOLLERR as u32), ERR);
        assert_eq!(epoll_to_mask(EPOLLHUP as u32), ERR);
    }

    #[test]
    fn edge_triggered_flag_is_always_set() {
        assert_eq!(mask_to_epoll(READ) & EPOLLET as u32, EPOLLET as u32);
    }
}
