//! Raw, non-blocking socket syscalls and socket-option helpers
//! (`TCP_NODELAY`, keepalive, linger, buffer sizes, `SO_ERROR`) that the
//! TCP channel builds on.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;

use libc::{
    AF_INET, AF_INET6, SOCK_STREAM, SOL_SOCKET, SO_ERROR, SO_KEEPALIVE, SO_LINGER, SO_RCVBUF,
    SO_REUSEADDR, SO_SNDBUF, accept, bind, c_int, c_void, close, connect, fcntl, getsockname,
    getsockopt, linger, listen, read, recv, recvmsg, sendmsg, setsockopt, shutdown, sockaddr,
    sockaddr_in, sockaddr_in6, sockaddr_storage, socket, socklen_t, write,
};

pub const IOV_MAX: usize = 64;

fn last_err() -> io::Error {
    io::Error::last_os_error()
}

pub fn sys_socket(domain: c_int) -> io::Result<RawFd> {
    let fd = unsafe { socket(domain, SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(last_err());
    }
    if let Err(e) = set_nonblocking(fd) {
        unsafe { close(fd) };
        return Err(e);
    }
    Ok(fd)
}

pub fn sys_bind(fd: RawFd, addr: &sockaddr_storage, len: socklen_t) -> io::Result<()> {
    let rc = unsafe { bind(fd, addr as *const _ as *const sockaddr, len) };
    if rc < 0 { Err(last_err()) } else { Ok(()) }
}

pub fn sys_listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    let rc = unsafe { listen(fd, backlog) };
    if rc < 0 { Err(last_err()) } else { Ok(()) }
}

pub fn sys_accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client_fd = unsafe { accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if client_fd < 0 {
        return Err(last_err());
    }

    let addr = storage_to_socketaddr(&storage)?;
    Ok((client_fd, addr))
}

pub fn sys_connect(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (storage, len) = socketaddr_to_storage(addr);
    let rc = unsafe { connect(fd, &storage as *const _ as *const sockaddr, len) };
    if rc < 0 { Err(last_err()) } else { Ok(()) }
}

pub fn sys_close(fd: RawFd) {
    unsafe {
        close(fd);
    }
}

pub fn sys_shutdown_both(fd: RawFd) {
    unsafe {
        shutdown(fd, libc::SHUT_RDWR);
    }
}

pub fn sys_sockname(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if rc < 0 {
        Err(last_err())
    } else {
        storage_to_socketaddr(&storage)
    }
}

/// Raw, single-call `read(2)`. Returns the libc convention directly
/// (negative on error, with `errno` set) — the caller (`tcp_recv`)
/// interprets it.
pub fn sys_read(fd: RawFd, buf: &mut [u8]) -> isize {
    unsafe { read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) }
}

pub fn sys_write(fd: RawFd, buf: &[u8]) -> isize {
    unsafe { write(fd, buf.as_ptr() as *const c_void, buf.len()) }
}

/// Vectored variant of [`sys_read`] over up to `IOV_MAX` buffers.
pub fn sys_readv(fd: RawFd, bufs: &mut [io::IoSliceMut<'_>]) -> isize {
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = bufs.as_mut_ptr() as *mut libc::iovec;
    msg.msg_iovlen = bufs.len() as _;
    unsafe { recvmsg(fd, &mut msg, 0) }
}

/// Vectored variant of [`sys_write`] over up to `IOV_MAX` buffers.
pub fn sys_writev(fd: RawFd, bufs: &[io::IoSlice<'_>]) -> isize {
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = bufs.as_ptr() as *mut libc::iovec;
    msg.msg_iovlen = bufs.len() as _;
    unsafe { sendmsg(fd, &msg, 0) }
}

/// Peeks without consuming, used only by tests that want to assert
/// readiness bookkeeping without perturbing the stream under test.
#[cfg(test)]
pub fn sys_peek(fd: RawFd, buf: &mut [u8]) -> isize {
    unsafe { recv(fd, buf.as_mut_ptr() as *mut c_void, buf.len(), libc::MSG_PEEK) }
}

// --- socket option helpers ---------------------------------------------

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(last_err());
    }
    let rc = unsafe { fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 { Err(last_err()) } else { Ok(()) }
}

pub fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
    setsockopt_bool(fd, SOL_SOCKET, SO_REUSEADDR, true)
}

pub fn set_tcpnodelay(fd: RawFd) -> io::Result<()> {
    setsockopt_bool(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, true)
}

pub fn set_keepalive(fd: RawFd) -> io::Result<()> {
    setsockopt_bool(fd, SOL_SOCKET, SO_KEEPALIVE, true)
}

pub fn set_linger(fd: RawFd, timeout_secs: i32) -> io::Result<()> {
    let l = linger {
        l_onoff: 1,
        l_linger: timeout_secs,
    };
    setsockopt_raw(fd, SOL_SOCKET, SO_LINGER, &l)
}

pub fn unset_linger(fd: RawFd) -> io::Result<()> {
    let l = linger {
        l_onoff: 0,
        l_linger: 0,
    };
    setsockopt_raw(fd, SOL_SOCKET, SO_LINGER, &l)
}

pub fn set_sndbuf(fd: RawFd, size: i32) -> io::Result<()> {
    setsockopt_raw(fd, SOL_SOCKET, SO_SNDBUF, &size)
}

pub fn set_rcvbuf(fd: RawFd, size: i32) -> io::Result<()> {
    setsockopt_raw(fd, SOL_SOCKET, SO_RCVBUF, &size)
}

pub fn get_sndbuf(fd: RawFd) -> io::Result<i32> {
    getsockopt_i32(fd, SOL_SOCKET, SO_SNDBUF)
}

pub fn get_rcvbuf(fd: RawFd) -> io::Result<i32> {
    getsockopt_i32(fd, SOL_SOCKET, SO_RCVBUF)
}

pub fn get_soerror(fd: RawFd) -> io::Result<i32> {
    getsockopt_i32(fd, SOL_SOCKET, SO_ERROR)
}

/// Doubles `SO_SNDBUF` repeatedly until the kernel stops granting
/// further growth (clamps rather than erroring). Returns the final
/// accepted size.
pub fn maximize_sndbuf(fd: RawFd) -> io::Result<i32> {
    let mut size = get_sndbuf(fd)?;
    loop {
        let probe = size.saturating_mul(2);
        if probe <= size || probe <= 0 {
            break;
        }
        if set_sndbuf(fd, probe).is_err() {
            break;
        }
        let observed = get_sndbuf(fd)?;
        if observed <= size {
            // kernel silently clamped; no further progress is possible.
            break;
        }
        size = observed;
    }
    Ok(size)
}

fn setsockopt_bool(fd: RawFd, level: c_int, name: c_int, value: bool) -> io::Result<()> {
    let v: c_int = value as c_int;
    setsockopt_raw(fd, level, name, &v)
}

fn setsockopt_raw<T>(fd: RawFd, level: c_int, name: c_int, value: &T) -> io::Result<()> {
    let rc = unsafe {
        setsockopt(
            fd,
            level,
            name,
            value as *const T as *const c_void,
            mem::size_of::<T>() as socklen_t,
        )
    };
    if rc < 0 { Err(last_err()) } else { Ok(()) }
}

fn getsockopt_i32(fd: RawFd, level: c_int, name: c_int) -> io::Result<i32> {
    let mut value: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;
    let rc = unsafe {
        getsockopt(
            fd,
            level,
            name,
            &mut value as *mut _ as *mut c_void,
            &mut len,
        )
    };
    if rc < 0 { Err(last_err()) } else { Ok(value) }
}

// --- sockaddr conversions ----------------------------------------------

pub fn storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

pub fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();
            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }
        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();
            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

pub fn domain_of(addr: &SocketAddr) -> c_int {
    match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    }
}
