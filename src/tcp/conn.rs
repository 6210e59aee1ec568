//! Non-blocking TCP connection wrapper and connection pool.

use super::sys;
use crate::error::Error;
use crate::metrics::Metrics;
use crate::pool::Pool;

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

/// Which kind of socket a [`Connection`] wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// A connected data socket.
    Base,
    /// A listening socket.
    Meta,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unknown,
    Connect,
    Listen,
    Connected,
    Eof,
    Closing,
}

/// One TCP socket plus its bookkeeping.
///
/// A `Connection` is either owned by a [`ConnPool`]'s free list (`free
/// == true`, `sd == -1`) or held by exactly one caller (`free ==
/// false`). Crossing `sd == -1` happens only inside [`tcp_connect`],
/// [`tcp_listen`], [`tcp_accept`], and [`tcp_close`].
pub struct Connection {
    pub sd: RawFd,
    pub level: Level,
    pub state: State,
    pub recv_ready: bool,
    pub send_ready: bool,
    pub recv_nbyte: u64,
    pub send_nbyte: u64,
    pub err: i32,
    pub flags: u32,
    pub(crate) free: bool,
}

impl Connection {
    /// A fresh, pool-owned connection: `UNKNOWN` state, `sd = -1`.
    pub fn new() -> Self {
        Self {
            sd: -1,
            level: Level::Base,
            state: State::Unknown,
            recv_ready: false,
            send_ready: false,
            recv_nbyte: 0,
            send_nbyte: 0,
            err: 0,
            flags: 0,
            free: true,
        }
    }

    /// Zeroes every field except the pool-ownership tag — used on
    /// borrow so a reused connection looks exactly like a freshly
    /// created one.
    pub fn reset(&mut self) {
        self.sd = -1;
        self.level = Level::Base;
        self.state = State::Unknown;
        self.recv_ready = false;
        self.send_ready = false;
        self.recv_nbyte = 0;
        self.send_nbyte = 0;
        self.err = 0;
        self.flags = 0;
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool of recyclable [`Connection`]s, specializing [`Pool`] with
/// [`Connection::new`] as the factory and [`Connection::reset`]
/// applied on every borrow.
pub struct ConnPool {
    inner: Pool<Connection>,
}

impl ConnPool {
    pub fn new(max: usize) -> Self {
        Self {
            inner: Pool::new(max),
        }
    }

    /// Borrows a reset connection, counting the failure in `metrics` if
    /// the pool is at capacity.
    pub fn borrow(&mut self, metrics: &Metrics) -> Option<Connection> {
        let conn = self.inner.borrow(|| Some(Connection::new()));
        match conn {
            Some(mut c) => {
                c.reset();
                c.free = false;
                Metrics::incr(&metrics.conn_total);
                Metrics::gauge_incr(&metrics.conn_curr);
                Some(c)
            }
            None => {
                Metrics::incr(&metrics.conn_borrow_fail);
                None
            }
        }
    }

    /// Resets and returns a connection to the free list.
    pub fn return_conn(&mut self, mut c: Connection, metrics: &Metrics) {
        tcp_close(&mut c);
        c.reset();
        c.free = true;
        self.inner.return_obj(c);
        Metrics::gauge_decr(&metrics.conn_curr);
    }

    pub fn nfree(&self) -> usize {
        self.inner.nfree()
    }

    pub fn nused(&self) -> usize {
        self.inner.nused()
    }

    pub fn destroy(&mut self) {
        self.inner.destroy(|_| {});
    }
}

/// Creates a listening socket bound to `addr`, filling `c` on success.
///
/// Sets `SO_REUSEADDR`, non-blocking mode, binds, and `listen`s with
/// `backlog`. Any syscall failure closes the partially opened socket
/// and returns the error without mutating `c`.
pub fn tcp_listen(addr: SocketAddr, backlog: i32, c: &mut Connection) -> Result<(), Error> {
    let domain = sys::domain_of(&addr);
    let fd = sys::sys_socket(domain).map_err(Error::Socket)?;

    if let Err(e) = sys::set_reuseaddr(fd) {
        sys::sys_close(fd);
        return Err(Error::Socket(e));
    }

    let (storage, len) = sys::socketaddr_to_storage(&addr);
    if let Err(e) = sys::sys_bind(fd, &storage, len) {
        sys::sys_close(fd);
        return Err(Error::Bind(e));
    }

    if let Err(e) = sys::sys_listen(fd, backlog) {
        sys::sys_close(fd);
        return Err(Error::Listen(e));
    }

    c.sd = fd;
    c.level = Level::Meta;
    c.state = State::Listen;
    c.free = false;
    Ok(())
}

/// Initiates a non-blocking connect to `addr`.
///
/// Returns `true` if the connection completed immediately or is
/// in-progress (`c.state` becomes [`State::Connect`]; the caller
/// watches for write-readiness and confirms via `SO_ERROR`). Returns
/// `false` on a hard failure, with `c.err` set to the `errno`.
pub fn tcp_connect(addr: SocketAddr, c: &mut Connection) -> bool {
    let domain = sys::domain_of(&addr);
    let fd = match sys::sys_socket(domain) {
        Ok(fd) => fd,
        Err(e) => {
            c.err = e.raw_os_error().unwrap_or(-1);
            return false;
        }
    };

    if sys::set_tcpnodelay(fd).is_err()
        || sys::unset_linger(fd).is_err()
        || sys::set_keepalive(fd).is_err()
    {
        let e = io::Error::last_os_error();
        c.err = e.raw_os_error().unwrap_or(-1);
        sys::sys_close(fd);
        return false;
    }

    c.sd = fd;
    c.level = Level::Base;
    c.free = false;

    match sys::sys_connect(fd, &addr) {
        Ok(()) => {
            c.state = State::Connected;
            true
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            c.state = State::Connect;
            true
        }
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
            c.state = State::Connect;
            true
        }
        Err(e) => {
            c.err = e.raw_os_error().unwrap_or(-1);
            sys::sys_close(fd);
            c.sd = -1;
            false
        }
    }
}

/// Accepts one pending connection on listening connection `sc`.
///
/// Sets non-blocking mode and `TCP_NODELAY` on the accepted socket.
/// Returns `true` on success (`c` is filled in, `CONNECTED`). Returns
/// `false` on `EAGAIN`/`EWOULDBLOCK` (nothing pending) or on any other
/// accept error, with `sc.err` set in the latter case — callers
/// distinguish the two by checking `sc.err`.
pub fn tcp_accept(sc: &mut Connection, c: &mut Connection, metrics: &Metrics) -> bool {
    match sys::sys_accept(sc.sd) {
        Ok((fd, _addr)) => {
            if let Err(e) = sys::set_tcpnodelay(fd) {
                sc.err = e.raw_os_error().unwrap_or(-1);
                sys::sys_close(fd);
                return false;
            }

            c.sd = fd;
            c.level = Level::Base;
            c.state = State::Connected;
            c.recv_ready = true;
            c.send_ready = true;
            c.free = false;
            Metrics::incr(&metrics.tcp_accept_ex);
            true
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
        Err(e) => {
            sc.err = e.raw_os_error().unwrap_or(-1);
            false
        }
    }
}

/// Drains one pending connection on `sc` by accepting and immediately
/// closing it, for back-pressure when the connection pool is at
/// capacity.
pub fn tcp_reject(sc: &mut Connection, metrics: &Metrics) -> bool {
    match sys::sys_accept(sc.sd) {
        Ok((fd, _addr)) => {
            sys::sys_close(fd);
            Metrics::incr(&metrics.tcp_reject_ex);
            true
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
        Err(e) => {
            sc.err = e.raw_os_error().unwrap_or(-1);
            false
        }
    }
}

/// Closes the socket if live and marks the connection `CLOSING`.
pub fn tcp_close(c: &mut Connection) {
    if c.sd >= 0 {
        sys::sys_close(c.sd);
        c.sd = -1;
    }
    c.state = State::Closing;
    c.recv_ready = false;
    c.send_ready = false;
}

/// Reads up to `buf.len()` bytes. Precondition: `c.recv_ready`.
///
/// Full status mapping: a full read (`k == buf.len()`) keeps
/// `recv_ready` set (there may be more queued); a short read or
/// `EAGAIN` clears it; `0` bytes sets `state = EOF`.
pub fn tcp_recv(c: &mut Connection, buf: &mut [u8], metrics: &Metrics) -> (crate::error::Status, usize) {
    use crate::error::Status;

    if buf.is_empty() {
        return (Status::Ok, 0);
    }

    loop {
        let n = sys::sys_read(c.sd, buf);

        if n > 0 {
            let n = n as usize;
            c.recv_nbyte += n as u64;
            Metrics::add(&metrics.tcp_recv_bytes, n as u64);
            if n < buf.len() {
                c.recv_ready = false;
            }
            return (Status::Ok, n);
        }

        if n == 0 {
            c.recv_ready = false;
            c.state = State::Eof;
            Metrics::incr(&metrics.tcp_eof);
            return (Status::Ok, 0);
        }

        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        if err.kind() == io::ErrorKind::WouldBlock {
            c.recv_ready = false;
            return (Status::Eagain, 0);
        }

        c.recv_ready = false;
        c.err = err.raw_os_error().unwrap_or(-1);
        Metrics::incr(&metrics.tcp_err);
        return (Status::Error, 0);
    }
}

/// Writes up to `buf.len()` bytes. Precondition: `c.send_ready`.
///
/// Status mapping otherwise mirrors [`tcp_recv`], with one exception:
/// a `0`-byte write only clears `send_ready`, it does not set
/// `state = EOF`. Unlike a `0`-byte read, a `0`-byte `write`/`writev`
/// return is not a peer-hangup signal — it does not imply the
/// connection can no longer be read from.
pub fn tcp_send(c: &mut Connection, buf: &[u8], metrics: &Metrics) -> (crate::error::Status, usize) {
    use crate::error::Status;

    if buf.is_empty() {
        return (Status::Ok, 0);
    }

    loop {
        let n = sys::sys_write(c.sd, buf);

        if n > 0 {
            let n = n as usize;
            c.send_nbyte += n as u64;
            Metrics::add(&metrics.tcp_send_bytes, n as u64);
            if n < buf.len() {
                c.send_ready = false;
            }
            return (Status::Ok, n);
        }

        if n == 0 {
            c.send_ready = false;
            return (Status::Ok, 0);
        }

        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        if err.kind() == io::ErrorKind::WouldBlock {
            c.send_ready = false;
            return (Status::Eagain, 0);
        }

        c.send_ready = false;
        c.err = err.raw_os_error().unwrap_or(-1);
        Metrics::incr(&metrics.tcp_err);
        return (Status::Error, 0);
    }
}

/// Vectored variant of [`tcp_recv`] over an array of buffer
/// descriptors; identical status semantics.
pub fn tcp_recvv(
    c: &mut Connection,
    bufs: &mut [io::IoSliceMut<'_>],
    metrics: &Metrics,
) -> (crate::error::Status, usize) {
    use crate::error::Status;

    let total: usize = bufs.iter().map(|b| b.len()).sum();
    if total == 0 {
        return (Status::Ok, 0);
    }

    loop {
        let n = sys::sys_readv(c.sd, bufs);

        if n > 0 {
            let n = n as usize;
            c.recv_nbyte += n as u64;
            Metrics::add(&metrics.tcp_recv_bytes, n as u64);
            if n < total {
                c.recv_ready = false;
            }
            return (Status::Ok, n);
        }
        if n == 0 {
            c.recv_ready = false;
            c.state = State::Eof;
            Metrics::incr(&metrics.tcp_eof);
            return (Status::Ok, 0);
        }

        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        if err.kind() == io::ErrorKind::WouldBlock {
            c.recv_ready = false;
            return (Status::Eagain, 0);
        }
        c.recv_ready = false;
        c.err = err.raw_os_error().unwrap_or(-1);
        Metrics::incr(&metrics.tcp_err);
        return (Status::Error, 0);
    }
}

/// Vectored variant of [`tcp_send`].
pub fn tcp_sendv(
    c: &mut Connection,
    bufs: &[io::IoSlice<'_>],
    metrics: &Metrics,
) -> (crate::error::Status, usize) {
    use crate::error::Status;

    let total: usize = bufs.iter().map(|b| b.len()).sum();
    if total == 0 {
        return (Status::Ok, 0);
    }

    loop {
        let n = sys::sys_writev(c.sd, bufs);

        if n > 0 {
            let n = n as usize;
            c.send_nbyte += n as u64;
            Metrics::add(&metrics.tcp_send_bytes, n as u64);
            if n < total {
                c.send_ready = false;
            }
            return (Status::Ok, n);
        }
        if n == 0 {
            c.send_ready = false;
            return (Status::Ok, 0);
        }

        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        if err.kind() == io::ErrorKind::WouldBlock {
            c.send_ready = false;
            return (Status::Eagain, 0);
        }
        c.send_ready = false;
        c.err = err.raw_os_error().unwrap_or(-1);
        Metrics::incr(&metrics.tcp_err);
        return (Status::Error, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::AsRawFd;

    fn wrap_connected(stream: &TcpStream) -> Connection {
        let mut c = Connection::new();
        c.sd = stream.as_raw_fd();
        c.level = Level::Base;
        c.state = State::Connected;
        c.recv_ready = true;
        c.send_ready = true;
        c.free = false;
        c
    }

    #[test]
    fn reset_on_borrow_matches_fresh_connection() {
        let metrics = Metrics::new();
        let mut pool = ConnPool::new(0);

        let mut c = pool.borrow(&metrics).unwrap();
        c.sd = 42;
        c.state = State::Connected;
        c.recv_nbyte = 100;
        pool.return_conn(c, &metrics);

        let c2 = pool.borrow(&metrics).unwrap();
        assert_eq!(c2.sd, -1);
        assert_eq!(c2.state, State::Unknown);
        assert_eq!(c2.recv_nbyte, 0);
        assert_eq!(c2.err, 0);
    }

    #[test]
    fn short_read_clears_recv_ready_full_read_keeps_it() {
        let metrics = Metrics::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        use std::io::Write;
        let mut writer = &client;
        writer.write_all(b"hi").unwrap();

        let mut c = wrap_connected(&server);
        let mut buf = [0u8; 16];
        let (status, n) = tcp_recv(&mut c, &mut buf, &metrics);
        assert_eq!(status, Status::Ok);
        assert_eq!(n, 2);
        assert!(!c.recv_ready, "short read must clear recv_ready");
    }

    #[test]
    fn eagain_on_empty_socket() {
        let metrics = Metrics::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut c = wrap_connected(&server);
        let mut buf = [0u8; 16];
        let (status, n) = tcp_recv(&mut c, &mut buf, &metrics);
        assert_eq!(status, Status::Eagain);
        assert_eq!(n, 0);
        assert!(!c.recv_ready);
    }

    #[test]
    fn peer_hangup_sets_eof() {
        let metrics = Metrics::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        drop(client);

        // Poll until the FIN has propagated; loopback delivery is fast
        // but not synchronous with the drop.
        let mut c = wrap_connected(&server);
        let mut buf = [0u8; 16];
        let mut status;
        let mut n;
        loop {
            let r = tcp_recv(&mut c, &mut buf, &metrics);
            status = r.0;
            n = r.1;
            if status != Status::Eagain {
                break;
            }
            c.recv_ready = true;
            std::thread::yield_now();
        }
        assert_eq!(status, Status::Ok);
        assert_eq!(n, 0);
        assert_eq!(c.state, State::Eof);
        assert!(!c.recv_ready);
    }

    #[test]
    fn accept_reject_under_cap() {
        let metrics = Metrics::new();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        listener.set_nonblocking(true).unwrap();

        let mut pool = ConnPool::new(1);
        let _held = pool.borrow(&metrics).unwrap();
        assert!(pool.borrow(&metrics).is_none(), "pool must be at capacity");

        let _client = TcpStream::connect(addr).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut sc = Connection::new();
        sc.sd = listener.as_raw_fd();
        sc.level = Level::Meta;
        sc.state = State::Listen;

        assert!(tcp_reject(&mut sc, &metrics));
        assert_eq!(metrics.tcp_reject_ex.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
