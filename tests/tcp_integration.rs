//! End-to-end exercises over real loopback sockets: listen, connect,
//! accept, echo, partial writes, and peer hang-up.

use ccommon_core::error::Status;
use ccommon_core::metrics::Metrics;
use ccommon_core::tcp::{self, Connection, ConnPool, tcp_accept, tcp_connect, tcp_listen, tcp_recv, tcp_reject, tcp_send};

use std::net::SocketAddr;
use std::time::Duration;

/// Finds a free loopback port via `std`, then releases it immediately
/// so [`tcp_listen`] can bind the same address as a raw `Connection`.
/// `tcp_listen` doesn't expose the bound address, so this is the only
/// way a test gets one without guessing a port.
fn bind_ephemeral_addr() -> SocketAddr {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap()
}

fn wait_readable() {
    std::thread::sleep(Duration::from_millis(20));
}

#[test]
fn echo_one_byte_round_trip() {
    let metrics = Metrics::new();
    let addr = bind_ephemeral_addr();

    let mut listener = Connection::new();
    tcp_listen(addr, 16, &mut listener).unwrap();

    let mut client = Connection::new();
    assert!(tcp_connect(addr, &mut client));
    wait_readable();

    let mut server = Connection::new();
    assert!(tcp_accept(&mut listener, &mut server, &metrics));

    let (status, n) = tcp_send(&mut client, b"Q", &metrics);
    assert_eq!(status, Status::Ok);
    assert_eq!(n, 1);
    wait_readable();

    let mut buf = [0u8; 8];
    let (status, n) = tcp_recv(&mut server, &mut buf[..1], &metrics);
    assert_eq!(status, Status::Ok);
    assert_eq!(n, 1);
    assert_eq!(&buf[..1], b"Q");
}

#[test]
fn accept_fails_gracefully_with_nothing_pending() {
    let metrics = Metrics::new();
    let addr = bind_ephemeral_addr();

    let mut listener = Connection::new();
    tcp_listen(addr, 16, &mut listener).unwrap();

    let mut server = Connection::new();
    assert!(!tcp_accept(&mut listener, &mut server, &metrics));
    assert_eq!(listener.err, 0, "EAGAIN must not be recorded as a hard error");
}

#[test]
fn pool_exhaustion_triggers_reject_path() {
    let metrics = Metrics::new();
    let addr = bind_ephemeral_addr();

    let mut listener = Connection::new();
    tcp_listen(addr, 16, &mut listener).unwrap();

    let mut pool = ConnPool::new(1);
    let _held = pool.borrow(&metrics).unwrap();
    assert!(pool.borrow(&metrics).is_none());

    let mut client = Connection::new();
    assert!(tcp_connect(addr, &mut client));
    wait_readable();

    assert!(tcp_reject(&mut listener, &metrics));
    assert_eq!(
        metrics.tcp_reject_ex.load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}

#[test]
fn peer_close_is_observed_as_eof_not_error() {
    let metrics = Metrics::new();
    let addr = bind_ephemeral_addr();

    let mut listener = Connection::new();
    tcp_listen(addr, 16, &mut listener).unwrap();

    let mut client = Connection::new();
    assert!(tcp_connect(addr, &mut client));
    wait_readable();

    let mut server = Connection::new();
    assert!(tcp_accept(&mut listener, &mut server, &metrics));

    tcp::tcp_close(&mut client);

    let mut status = Status::Eagain;
    let mut buf = [0u8; 8];
    for _ in 0..50 {
        let (s, _n) = tcp_recv(&mut server, &mut buf, &metrics);
        status = s;
        if status != Status::Eagain {
            break;
        }
        server.recv_ready = true;
        wait_readable();
    }

    assert_eq!(status, Status::Ok, "EOF is reported as Ok with n == 0");
    assert_eq!(server.state, tcp::State::Eof);
}

#[test]
fn shrunk_sndbuf_produces_a_partial_send() {
    let metrics = Metrics::new();
    let addr = bind_ephemeral_addr();

    let mut listener = Connection::new();
    tcp_listen(addr, 16, &mut listener).unwrap();

    let mut client = Connection::new();
    assert!(tcp_connect(addr, &mut client));
    wait_readable();

    let mut server = Connection::new();
    assert!(tcp_accept(&mut listener, &mut server, &metrics));

    // Shrink the client's send buffer so a large write can't complete
    // in one syscall, forcing the short-write path.
    tcp::set_sndbuf(client.sd, 1024).unwrap();
    tcp::set_rcvbuf(server.sd, 1024).unwrap();

    let payload = vec![b'x'; 1024 * 1024];
    let (status, n) = tcp_send(&mut client, &payload, &metrics);
    assert_eq!(status, Status::Ok);
    assert!(n < payload.len(), "a 1 MiB write into a 1 KiB buffer must be partial");
    assert!(!client.send_ready, "a short write must clear send_ready");
}
