//! Opaque monotonic counters the core increments.
//!
//! Exporting or reporting these is a caller concern — this module only
//! provides the narrow surface the core consumes: a sink of counters and
//! gauges it bumps as it works.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counter and gauge registry threaded through the TCP and stream
/// layers; one instance per [`crate::Runtime`].
///
/// All fields are monotonic counters except `conn_curr`, which tracks a
/// live gauge (outstanding borrowed connections) and can move in either
/// direction.
#[derive(Default)]
pub struct Metrics {
    pub conn_total: AtomicU64,
    pub conn_curr: AtomicI64,
    pub conn_borrow_fail: AtomicU64,
    pub tcp_accept_ex: AtomicU64,
    pub tcp_reject_ex: AtomicU64,
    pub tcp_eof: AtomicU64,
    pub tcp_err: AtomicU64,
    pub tcp_recv_bytes: AtomicU64,
    pub tcp_send_bytes: AtomicU64,
    pub stream_total: AtomicU64,
    pub stream_borrow_fail: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn gauge_incr(gauge: &AtomicI64) {
        gauge.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn gauge_decr(gauge: &AtomicI64) {
        gauge.fetch_sub(1, Ordering::Relaxed);
    }
}
