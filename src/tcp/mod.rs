//! Non-blocking TCP channel: connections, a connection pool, and the
//! raw syscall layer underneath both.

mod conn;
mod sys;

pub use conn::{
    Connection, ConnPool, Level, State, tcp_accept, tcp_close, tcp_connect, tcp_listen,
    tcp_recv, tcp_recvv, tcp_reject, tcp_send, tcp_sendv,
};
pub use sys::{get_rcvbuf, get_sndbuf, get_soerror, maximize_sndbuf, set_linger, set_rcvbuf, set_sndbuf, unset_linger};
