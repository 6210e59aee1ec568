//! Readiness-driven event loop, non-blocking TCP channel, and a
//! pooled stream substrate for building single-threaded cache and
//! proxy servers.
//!
//! A process built on this crate runs one [`Runtime`] per worker
//! thread: each owns its own [`event::EventBase`], [`tcp::ConnPool`],
//! and [`stream::StreamPool`], none of which are shared or
//! synchronized across threads. Fan-out across cores is a matter of
//! running more workers, each accepting connections independently
//! (or receiving handed-off descriptors from a dedicated acceptor
//! thread) — this crate provides the per-worker substrate, not the
//! fan-out policy itself.

pub mod error;
pub mod event;
pub mod log;
pub mod mbuf;
pub mod metrics;
pub mod option;
pub mod pool;
pub mod stream;
pub mod tcp;

use std::io;
use std::sync::Arc;

pub use error::{Error, Status};
pub use log::LogGuard;
pub use metrics::Metrics;
pub use option::Options;

/// Bundles the per-worker pieces an application wires together by
/// hand otherwise: options, metrics, the connection and stream pools,
/// and the event base that drives them.
///
/// Not `Send`/`Sync` (its fields aren't) — build one per worker
/// thread via [`Runtime::bootstrap`].
pub struct Runtime {
    pub options: Options,
    pub metrics: Arc<Metrics>,
    pub conns: tcp::ConnPool,
    pub streams: stream::StreamPool,
    pub events: event::EventBase,
}

impl Runtime {
    /// Builds every owned piece from `options`: a connection pool
    /// sized by `tcp_poolsize`, a stream pool sized by
    /// `stream_poolsize`, and an event base whose dispatch callback is
    /// `on_event`.
    ///
    /// `on_event(token, mask)` is invoked by [`event::EventBase::wait`]
    /// once per ready registration; a typical caller maps `token` back
    /// to a connection or stream and drives `tcp_recv`/`stream_read`
    /// (etc.) from inside it.
    pub fn bootstrap(
        options: Options,
        on_event: impl FnMut(usize, u32) + 'static,
    ) -> io::Result<Runtime> {
        let metrics = Arc::new(Metrics::new());
        let conns = tcp::ConnPool::new(options.tcp_poolsize as usize);
        let streams = stream::StreamPool::new(options.stream_poolsize as usize, 16 * 1024);
        let events = event::EventBase::create(1024, on_event)?;

        Ok(Runtime {
            options,
            metrics,
            conns,
            streams,
            events,
        })
    }
}
