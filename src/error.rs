//! Status codes and setup-time errors.
//!
//! `Status` is a closed enum standing in for the sentinel negative
//! return codes this kind of non-blocking I/O contract traditionally
//! uses (`OK=0`, `ERROR=-1`, `EAGAIN=-2`, ...). `Error` covers the
//! rarer failures that happen at setup time (binding a listener,
//! creating a poller) and are reported through `Result` rather than a
//! sentinel, since callers of `tcp_listen` or `EventBase::create` want
//! `?`-able errors, not a code to match on.

use std::fmt;

/// Result of a non-blocking I/O operation, mirroring the original
/// sentinel values but as a closed enum instead of a signed integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operation succeeded; for reads/writes this may still be a short
    /// (partial) transfer.
    Ok,
    /// Fatal I/O error. The offending `errno` is stashed on the
    /// connection that produced this status.
    Error,
    /// Operation would block; retry once the descriptor is ready again.
    Eagain,
    /// Allocation or buffer-space failure (`rbuf` can't hold `n` bytes).
    Enomem,
    /// `stream_write` was called with nothing queued to send.
    Eempty,
    /// The operation filled/drained the buffer completely; the caller
    /// should invoke it again immediately, there may be more to do.
    Eretry,
    /// The peer closed its end of the connection.
    Erdhup,
}

impl Status {
    /// Maps the abstract status back onto its stable ABI integer value,
    /// for callers that need the numeric contract (e.g. an FFI
    /// boundary).
    pub const fn as_i32(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Error => -1,
            Status::Eagain => -2,
            Status::Enomem => -3,
            Status::Eempty => -4,
            Status::Eretry => -5,
            Status::Erdhup => -6,
        }
    }

    /// True for the transient statuses a caller should simply retry or
    /// reschedule for.
    pub const fn is_transient(self) -> bool {
        matches!(self, Status::Eagain | Status::Eretry | Status::Eempty)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
            Status::Eagain => "EAGAIN",
            Status::Enomem => "ENOMEM",
            Status::Eempty => "EEMPTY",
            Status::Eretry => "ERETRY",
            Status::Erdhup => "ERDHUP",
        };
        f.write_str(name)
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> i32 {
        status.as_i32()
    }
}

/// Setup-time and configuration failures.
///
/// Distinct from [`Status`]: these are returned by constructors
/// (`tcp_listen`, `EventBase::create`, option loading) that callers are
/// expected to propagate with `?` rather than branch on a code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("socket setup failed: {0}")]
    Socket(#[source] std::io::Error),

    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    #[error("listen failed: {0}")]
    Listen(#[source] std::io::Error),

    #[error("event backend initialization failed: {0}")]
    EventBackend(#[source] std::io::Error),

    #[error("connection pool exhausted (max={max})")]
    PoolExhausted { max: usize },

    #[error("malformed option line {line}: {reason}")]
    OptionParse { line: usize, reason: String },

    #[error("unknown option key {0:?}")]
    UnknownOption(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
