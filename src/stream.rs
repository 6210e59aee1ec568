//! Buffered stream built on top of a TCP connection: a handler vtable
//! plus two `MBuf`s standing in for the read and write queues.

use crate::error::Status;
use crate::mbuf::MBuf;
use crate::metrics::Metrics;
use crate::pool::Pool;
use crate::tcp::{Connection, tcp_recv, tcp_send};

use std::any::Any;
use std::os::fd::RawFd;

/// Hooks a caller attaches to a stream to observe or transform data as
/// it crosses the buffer boundary — a protocol codec's natural seam.
/// Every hook has a no-op default; a handler overrides only the ones
/// it needs.
pub trait StreamHandler {
    fn on_open(&mut self, _stream: &mut Stream) {}
    fn on_close(&mut self, _stream: &mut Stream) {}
    fn fd(&self, stream: &Stream) -> RawFd {
        stream.channel.sd
    }
    fn pre_read(&mut self, _stream: &mut Stream) {}
    fn post_read(&mut self, _stream: &mut Stream, _n: usize) {}
    fn pre_write(&mut self, _stream: &mut Stream, _n: usize) {}
    fn post_write(&mut self, _stream: &mut Stream, _n: usize) {}
}

/// The handler a freshly created or just-reset stream starts with.
pub struct NullHandler;
impl StreamHandler for NullHandler {}

/// A TCP connection plus its read/write buffers and handler.
pub struct Stream {
    pub channel: Connection,
    pub rbuf: MBuf,
    pub wbuf: MBuf,
    pub handler: Box<dyn StreamHandler>,
    /// Opaque tag for whatever owns this stream (a worker id, a
    /// session table index); the stream layer never interprets it.
    pub owner: Option<usize>,
    /// Per-stream state belonging to the caller (parser state,
    /// protocol context). Must be cleared before [`stream_destroy`].
    pub data: Option<Box<dyn Any>>,
    pub err: i32,
    pub(crate) free: bool,
}

impl Stream {
    pub fn new(channel: Connection, buf_capacity: usize) -> Self {
        Self {
            channel,
            rbuf: MBuf::with_capacity(buf_capacity),
            wbuf: MBuf::with_capacity(buf_capacity),
            handler: Box::new(NullHandler),
            owner: None,
            data: None,
            err: 0,
            free: true,
        }
    }

    /// Restores a stream to its just-created shape, reallocating both
    /// buffers at `buf_capacity` (which may differ from what this
    /// instance started with).
    pub fn reset(&mut self, buf_capacity: usize) {
        self.rbuf = MBuf::with_capacity(buf_capacity);
        self.wbuf = MBuf::with_capacity(buf_capacity);
        self.handler = Box::new(NullHandler);
        self.owner = None;
        self.data = None;
        self.err = 0;
    }

    fn with_handler_out<R>(&mut self, f: impl FnOnce(&mut Self, &mut dyn StreamHandler) -> R) -> R {
        let mut handler = std::mem::replace(&mut self.handler, Box::new(NullHandler));
        let r = f(self, handler.as_mut());
        self.handler = handler;
        r
    }
}

/// Creates a stream with its own buffer pair, wrapping an
/// already-established connection.
pub fn stream_create(channel: Connection, buf_capacity: usize) -> Stream {
    let mut s = Stream::new(channel, buf_capacity);
    s.free = false;
    s.with_handler_out(|stream, h| h.on_open(stream));
    s
}

/// Runs the close hook and drops the underlying connection.
///
/// Precondition: `s.data.is_none()` — the caller must reclaim any
/// per-stream state itself before destroying the stream, since this
/// crate has no way to know how to free an opaque `Box<dyn Any>`
/// correctly for every possible payload.
pub fn stream_destroy(s: &mut Stream) {
    debug_assert!(s.data.is_none(), "stream_destroy called with live owner data");
    s.with_handler_out(|stream, h| h.on_close(stream));
}

/// Pool of recyclable [`Stream`]s.
pub struct StreamPool {
    inner: Pool<Stream>,
    buf_capacity: usize,
}

impl StreamPool {
    pub fn new(max: usize, buf_capacity: usize) -> Self {
        Self {
            inner: Pool::new(max),
            buf_capacity,
        }
    }

    /// Borrows a stream, wrapping `channel`, from the free list when
    /// one is available or creating a fresh one otherwise.
    pub fn borrow(&mut self, channel: Connection, metrics: &Metrics) -> Option<Stream> {
        let buf_capacity = self.buf_capacity;
        let stream = self
            .inner
            .borrow(|| Some(Stream::new(channel_placeholder(), buf_capacity)));

        match stream {
            Some(mut s) => {
                s.channel = channel;
                s.reset(buf_capacity);
                s.free = false;
                Metrics::incr(&metrics.stream_total);
                s.with_handler_out(|stream, h| h.on_open(stream));
                Some(s)
            }
            None => {
                Metrics::incr(&metrics.stream_borrow_fail);
                None
            }
        }
    }

    pub fn return_stream(&mut self, mut s: Stream) {
        stream_destroy(&mut s);
        s.free = true;
        self.inner.return_obj(s);
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

/// A never-live placeholder connection used only to satisfy the
/// pool's factory signature; [`StreamPool::borrow`] always overwrites
/// `channel` with the real one before handing the stream back.
fn channel_placeholder() -> Connection {
    Connection::new()
}

/// Reads up to `n` bytes into `s.rbuf`.
///
/// `n` bytes of headroom must already exist in `rbuf` ([`Status::Enomem`]
/// otherwise). Status mapping: `Ok` if the channel has nothing ready
/// yet (an `EAGAIN` just means "try later", not a failure) or if a
/// partial read landed; `Erdhup` if the peer has closed; `Eretry` if
/// exactly `n` bytes were read (there may be more queued — call
/// again).
pub fn stream_read(s: &mut Stream, n: usize, metrics: &Metrics) -> Status {
    s.with_handler_out(|stream, h| h.pre_read(stream));

    if n > s.rbuf.writable_size() {
        return Status::Enomem;
    }

    let (status, k) = {
        let buf = &mut s.rbuf.writable_slice_mut()[..n];
        tcp_recv(&mut s.channel, buf, metrics)
    };

    match status {
        Status::Eagain => Status::Ok,
        Status::Error => Status::Error,
        Status::Ok if k == 0 => Status::Erdhup,
        Status::Ok => {
            s.rbuf.advance_wpos(k);
            s.with_handler_out(|stream, h| h.post_read(stream, k));
            if k == n { Status::Eretry } else { Status::Ok }
        }
        other => other,
    }
}

/// Sends whatever is currently queued in `s.wbuf` (the drain-available
/// contract: `n` is advisory, passed only to the handler hooks — the
/// channel is always asked to send the full readable region of
/// `wbuf`, not just `n` bytes of it).
///
/// Status mapping: `Eagain` if the channel has nothing ready yet,
/// `Error` on a hard failure, `Erdhup` on peer hang-up, `Eretry` if
/// the send only partially drained the queued region (there is more
/// to send — call again), `Ok` if the entire queued region drained in
/// one call.
pub fn stream_write(s: &mut Stream, n: usize, metrics: &Metrics) -> Status {
    s.with_handler_out(|stream, h| h.pre_write(stream, n));

    let avail = s.wbuf.readable_size();
    if avail == 0 {
        return Status::Eempty;
    }

    let (status, k) = tcp_send(&mut s.channel, s.wbuf.readable_slice(), metrics);

    match status {
        Status::Eagain => Status::Eagain,
        Status::Error => Status::Error,
        Status::Ok if k == 0 => Status::Erdhup,
        Status::Ok => {
            s.wbuf.advance_rpos(k);
            s.with_handler_out(|stream, h| h.post_write(stream, k));
            if k < avail { Status::Eretry } else { Status::Ok }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream as StdTcpStream};
    use std::os::fd::AsRawFd;

    fn connected_pair() -> (Connection, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut c = Connection::new();
        c.sd = server.as_raw_fd();
        c.level = crate::tcp::Level::Base;
        c.state = crate::tcp::State::Connected;
        c.recv_ready = true;
        c.send_ready = true;
        c.free = false;
        std::mem::forget(server);
        (c, client)
    }

    #[test]
    fn read_with_insufficient_headroom_returns_enomem() {
        let metrics = Metrics::new();
        let (channel, _client) = connected_pair();
        let mut s = stream_create(channel, 4);

        assert_eq!(stream_read(&mut s, 8, &metrics), Status::Enomem);
    }

    #[test]
    fn write_with_nothing_queued_returns_eempty() {
        let metrics = Metrics::new();
        let (channel, _client) = connected_pair();
        let mut s = stream_create(channel, 64);

        assert_eq!(stream_write(&mut s, 16, &metrics), Status::Eempty);
    }

    #[test]
    fn read_drains_exactly_n_signals_eretry() {
        use std::io::Write;
        let metrics = Metrics::new();
        let (channel, mut client) = connected_pair();
        let mut s = stream_create(channel, 64);

        client.write_all(b"abcdef").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let status = stream_read(&mut s, 3, &metrics);
        assert_eq!(status, Status::Eretry);
        assert_eq!(s.rbuf.readable_size(), 3);
    }

    #[test]
    fn write_drains_full_buffer_signals_ok() {
        let metrics = Metrics::new();
        let (channel, _client) = connected_pair();
        let mut s = stream_create(channel, 64);

        s.wbuf.writable_slice_mut()[..5].copy_from_slice(b"hello");
        s.wbuf.advance_wpos(5);

        let status = stream_write(&mut s, 5, &metrics);
        assert_eq!(status, Status::Ok);
        assert_eq!(s.wbuf.readable_size(), 0);
    }
}
