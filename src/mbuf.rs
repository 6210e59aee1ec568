//! Minimal contiguous byte buffer with read/write cursors.
//!
//! The full `mbuf` subsystem (chaining, its own free-list pool, resizing
//! policy) lives outside this crate — this crate only needs the narrow
//! surface the stream layer consumes: a fixed-capacity buffer with a
//! write cursor `wpos` and a read cursor `rpos`, and the two size
//! queries the stream's `read`/`write` operations are defined in terms
//! of.

/// A contiguous byte buffer with independent read and write cursors.
pub struct MBuf {
    buf: Vec<u8>,
    rpos: usize,
    wpos: usize,
}

impl MBuf {
    /// Allocates a buffer with the given fixed capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            rpos: 0,
            wpos: 0,
        }
    }

    /// Bytes available to write before the buffer is full.
    pub fn writable_size(&self) -> usize {
        self.buf.len() - self.wpos
    }

    /// Bytes available to read that haven't been consumed yet.
    pub fn readable_size(&self) -> usize {
        self.wpos - self.rpos
    }

    /// Mutable slice of the writable region, starting at `wpos`.
    pub fn writable_slice_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.wpos..]
    }

    /// Immutable slice of the readable region, between `rpos` and `wpos`.
    pub fn readable_slice(&self) -> &[u8] {
        &self.buf[self.rpos..self.wpos]
    }

    /// Advances the write cursor after bytes have been written into the
    /// slice returned by [`writable_slice_mut`](Self::writable_slice_mut).
    pub fn advance_wpos(&mut self, n: usize) {
        debug_assert!(self.wpos + n <= self.buf.len());
        self.wpos += n;
    }

    /// Advances the read cursor after bytes have been consumed from the
    /// slice returned by [`readable_slice`](Self::readable_slice).
    pub fn advance_rpos(&mut self, n: usize) {
        debug_assert!(self.rpos + n <= self.wpos);
        self.rpos += n;
    }

    /// Resets both cursors to the start, discarding any buffered data.
    /// Called when a buffer is returned to its pool.
    pub fn reset(&mut self) {
        self.rpos = 0;
        self.wpos = 0;
    }

    /// Compacts unread bytes to the front of the buffer, reclaiming the
    /// space already consumed by `rpos`. The handler layer is expected to
    /// call this between reads rather than the stream layer doing it
    /// implicitly, since only the handler knows when it is safe to move
    /// already-returned slice data.
    pub fn compact(&mut self) {
        if self.rpos == 0 {
            return;
        }
        self.buf.copy_within(self.rpos..self.wpos, 0);
        self.wpos -= self.rpos;
        self.rpos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursors_track_capacity() {
        let mut mbuf = MBuf::with_capacity(16);
        assert_eq!(mbuf.writable_size(), 16);
        assert_eq!(mbuf.readable_size(), 0);

        mbuf.advance_wpos(10);
        assert_eq!(mbuf.writable_size(), 6);
        assert_eq!(mbuf.readable_size(), 10);

        mbuf.advance_rpos(4);
        assert_eq!(mbuf.readable_size(), 6);
    }

    #[test]
    fn compact_reclaims_consumed_space() {
        let mut mbuf = MBuf::with_capacity(8);
        mbuf.writable_slice_mut()[..5].copy_from_slice(b"hello");
        mbuf.advance_wpos(5);
        mbuf.advance_rpos(3);

        mbuf.compact();
        assert_eq!(mbuf.readable_slice(), b"lo");
        assert_eq!(mbuf.writable_size(), 6);
    }
}
