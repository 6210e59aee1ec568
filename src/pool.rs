//! Generic free-list object pool.
//!
//! A `Pool<T>` is a LIFO cache of recyclable `T`s bounded by an optional
//! `max`. It backs both the connection pool and the stream pool, which
//! are thin specializations that forward into this module with the
//! right factory/finalizer.
//!
//! Ordering is LIFO on purpose: the most recently returned object is the
//! most likely to still be warm in cache, so it is handed out first.
//! There is no internal locking — a reactor and its pools are
//! single-threaded by construction (see the crate's top-level docs).

/// Free-list pool of `T`, bounded by `max` (`0` means unbounded).
pub struct Pool<T> {
    free: Vec<T>,
    max: usize,
    nused: usize,
}

impl<T> Pool<T> {
    /// Creates an empty pool with capacity `max` (`0` = unlimited).
    pub fn new(max: usize) -> Self {
        Self {
            free: Vec::new(),
            max,
            nused: 0,
        }
    }

    /// Current length of the free list.
    pub fn nfree(&self) -> usize {
        self.free.len()
    }

    /// Count of objects currently borrowed out.
    pub fn nused(&self) -> usize {
        self.nused
    }

    /// Configured capacity (`0` = unlimited).
    pub fn max(&self) -> usize {
        self.max
    }

    /// Borrows an object, reusing a freed one (LIFO) when available.
    ///
    /// When the free list is empty, `create` is invoked to allocate a
    /// fresh object, unless the pool is bounded and already at capacity,
    /// in which case `None` is returned without calling `create`.
    pub fn borrow(&mut self, create: impl FnOnce() -> Option<T>) -> Option<T> {
        if let Some(obj) = self.free.pop() {
            self.nused += 1;
            return Some(obj);
        }

        if self.max > 0 && self.nused >= self.max {
            return None;
        }

        let obj = create()?;
        self.nused += 1;
        Some(obj)
    }

    /// Returns a previously borrowed object to the free list.
    ///
    /// Returning an object that was not borrowed from this pool is a
    /// logic error on the caller's part; the pool has no way to detect
    /// it (there is no intrusive ownership tag), so callers must pair
    /// every `borrow` with exactly one `return_obj`.
    pub fn return_obj(&mut self, obj: T) {
        debug_assert!(self.nused > 0, "returned more objects than were borrowed");
        self.nused = self.nused.saturating_sub(1);
        self.free.push(obj);
    }

    /// Drains the free list, calling `destroy` on each entry, and resets
    /// the counters. Objects still borrowed by callers are their
    /// responsibility to return or drop.
    pub fn destroy(&mut self, mut destroy: impl FnMut(T)) {
        for obj in self.free.drain(..) {
            destroy(obj);
        }
        self.nused = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_reuses_lifo() {
        let mut pool = Pool::new(0);
        let mut next_id = 0;
        let mut create = || {
            next_id += 1;
            Some(next_id)
        };

        let a = pool.borrow(&mut create).unwrap();
        assert_eq!(a, 1);
        pool.return_obj(a);

        let b = pool.borrow(&mut create).unwrap();
        assert_eq!(b, a, "LIFO reuse must hand back the same object");
        assert_eq!(pool.nused(), 1);
        assert_eq!(pool.nfree(), 0);
    }

    #[test]
    fn bounded_pool_refuses_past_capacity() {
        let mut pool = Pool::new(1);
        let mut create = || Some(());

        let first = pool.borrow(&mut create);
        assert!(first.is_some());

        let second = pool.borrow(&mut create);
        assert!(second.is_none(), "pool at capacity must refuse to grow");
    }

    #[test]
    fn conservation_across_borrow_return_destroy() {
        let mut pool: Pool<u32> = Pool::new(4);
        let mut next = 0u32;
        let mut create = || {
            next += 1;
            Some(next)
        };

        let a = pool.borrow(&mut create).unwrap();
        let b = pool.borrow(&mut create).unwrap();
        pool.return_obj(a);
        let c = pool.borrow(&mut create).unwrap();

        assert_eq!(pool.nfree() + pool.nused(), next as usize);
        assert!(pool.nfree() + pool.nused() <= pool.max());

        pool.return_obj(b);
        pool.return_obj(c);

        let mut destroyed = Vec::new();
        pool.destroy(|obj| destroyed.push(obj));
        assert_eq!(destroyed.len(), 2);
        assert_eq!(pool.nfree(), 0);
        assert_eq!(pool.nused(), 0);
    }
}
