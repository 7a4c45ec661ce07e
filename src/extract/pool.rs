//! Size-classed buffer pool shared across extraction runs.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// Buffer size classes. `acquire` picks the smallest class whose
/// capacity covers the hint, so a 100 KiB request gets a 1 MiB buffer
/// rather than an exact-fit allocation that could never be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Up to 64 KiB
    Small,
    /// Up to 1 MiB
    Medium,
    /// Anything larger
    Large,
}

impl SizeClass {
    pub const SMALL_CAP: usize = 64 * 1024;
    pub const MEDIUM_CAP: usize = 1024 * 1024;

    pub fn for_size(size: usize) -> Self {
        if size <= Self::SMALL_CAP {
            SizeClass::Small
        } else if size <= Self::MEDIUM_CAP {
            SizeClass::Medium
        } else {
            SizeClass::Large
        }
    }

    fn index(self) -> usize {
        match self {
            SizeClass::Small => 0,
            SizeClass::Medium => 1,
            SizeClass::Large => 2,
        }
    }
}

/// A buffer on loan from a [`BufferPool`].
///
/// Release is by value: once a buffer is handed back the borrow
/// checker makes aliasing or a second release unrepresentable, which
/// is the single-ownership rule the pool requires.
pub struct PooledBuffer {
    data: Vec<u8>,
    class: SizeClass,
    pool_id: usize,
}

impl PooledBuffer {
    pub fn class(&self) -> SizeClass {
        self.class
    }

    /// Allocated capacity of this buffer (what the memory monitor is
    /// charged for, independent of how much of it gets filled).
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Shrink the readable window to `len` bytes (after a short read).
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }
}

#[derive(Debug, Default)]
struct PoolStats {
    allocated: usize,
    reused: usize,
}

/// Thread-safe, size-classed byte buffer allocator.
///
/// One pool instance is intended to be shared (via `Arc`) across every
/// concurrent extraction run in the process; free lists are mutexed
/// per class so acquire/release from different runs never contend on
/// one lock for long. The pool holds raw bytes only, no business data,
/// so no discipline beyond acquire/release is needed.
pub struct BufferPool {
    free: [Mutex<Vec<Vec<u8>>>; 3],
    /// Maximum buffers retained per class; extras are dropped on release.
    per_class_cap: usize,
    stats: Mutex<PoolStats>,
    id: usize,
}

impl BufferPool {
    pub const DEFAULT_PER_CLASS_CAP: usize = 8;

    pub fn new(per_class_cap: usize) -> Self {
        Self {
            free: [Mutex::new(Vec::new()), Mutex::new(Vec::new()), Mutex::new(Vec::new())],
            per_class_cap,
            stats: Mutex::new(PoolStats::default()),
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Acquire a buffer of at least `size_hint` usable bytes.
    ///
    /// Reuses a free buffer from the matching class when one exists,
    /// otherwise allocates fresh at the class capacity (or the exact
    /// hint for the unbounded large class).
    pub fn acquire(&self, size_hint: usize) -> PooledBuffer {
        let class = SizeClass::for_size(size_hint);
        let want = match class {
            SizeClass::Small => SizeClass::SMALL_CAP,
            SizeClass::Medium => SizeClass::MEDIUM_CAP,
            SizeClass::Large => size_hint,
        };

        let reused = {
            let mut list = self.free[class.index()].lock().unwrap();
            // Large-class buffers vary in size; take one only if it
            // actually fits the request.
            match class {
                SizeClass::Large => {
                    let pos = list.iter().position(|b| b.len() >= size_hint);
                    pos.map(|p| list.swap_remove(p))
                }
                _ => list.pop(),
            }
        };

        let mut stats = self.stats.lock().unwrap();
        let data = match reused {
            Some(buf) => {
                stats.reused += 1;
                buf
            }
            None => {
                stats.allocated += 1;
                vec![0u8; want]
            }
        };

        PooledBuffer {
            data,
            class,
            pool_id: self.id,
        }
    }

    /// Return a buffer to its free list.
    ///
    /// Contents are not cleared; a released buffer must never be read
    /// again by the releasing code (the move enforces this). Releasing
    /// a buffer into a pool it did not come from is a programming
    /// error: an assertion in test builds, a logged no-op in release.
    pub fn release(&self, mut buffer: PooledBuffer) {
        if buffer.pool_id != self.id {
            debug_assert!(false, "buffer released to a pool it was not acquired from");
            warn!(
                buffer_pool = buffer.pool_id,
                this_pool = self.id,
                "dropping buffer released to wrong pool"
            );
            return;
        }

        // Restore full capacity so the next acquire sees a buffer of
        // the advertised class size.
        let cap = buffer.data.capacity();
        buffer.data.resize(cap, 0);

        let mut list = self.free[buffer.class.index()].lock().unwrap();
        if list.len() < self.per_class_cap {
            list.push(buffer.data);
        }
        // Over cap: buffer is simply dropped.
    }

    /// (allocated, reused) acquire counts since construction.
    pub fn stats(&self) -> (usize, usize) {
        let stats = self.stats.lock().unwrap();
        (stats.allocated, stats.reused)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PER_CLASS_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn size_class_selection() {
        assert_eq!(SizeClass::for_size(1), SizeClass::Small);
        assert_eq!(SizeClass::for_size(64 * 1024), SizeClass::Small);
        assert_eq!(SizeClass::for_size(64 * 1024 + 1), SizeClass::Medium);
        assert_eq!(SizeClass::for_size(1024 * 1024), SizeClass::Medium);
        assert_eq!(SizeClass::for_size(2 * 1024 * 1024), SizeClass::Large);
    }

    #[test]
    fn acquire_rounds_up_to_class_capacity() {
        let pool = BufferPool::default();
        let buf = pool.acquire(100);
        assert_eq!(buf.as_slice().len(), SizeClass::SMALL_CAP);
        assert_eq!(buf.class(), SizeClass::Small);
    }

    #[test]
    fn release_then_acquire_reuses() {
        let pool = BufferPool::default();
        let buf = pool.acquire(1000);
        pool.release(buf);
        let _buf2 = pool.acquire(2000);
        let (allocated, reused) = pool.stats();
        assert_eq!(allocated, 1);
        assert_eq!(reused, 1);
    }

    #[test]
    fn truncated_buffer_restored_on_release() {
        let pool = BufferPool::default();
        let mut buf = pool.acquire(1000);
        buf.truncate(10);
        pool.release(buf);
        let buf2 = pool.acquire(1000);
        assert_eq!(buf2.as_slice().len(), SizeClass::SMALL_CAP);
    }

    #[test]
    fn per_class_cap_bounds_free_list() {
        let pool = BufferPool::new(2);
        let bufs: Vec<_> = (0..4).map(|_| pool.acquire(10)).collect();
        for b in bufs {
            pool.release(b);
        }
        // Only 2 retained; next three acquires reuse 2 and allocate 1.
        let _a = pool.acquire(10);
        let _b = pool.acquire(10);
        let _c = pool.acquire(10);
        let (allocated, reused) = pool.stats();
        assert_eq!(allocated, 5);
        assert_eq!(reused, 2);
    }

    #[test]
    fn large_class_fit_check() {
        let pool = BufferPool::default();
        let big = pool.acquire(4 * 1024 * 1024);
        pool.release(big);
        // A bigger request must not get the smaller cached buffer.
        let bigger = pool.acquire(8 * 1024 * 1024);
        assert!(bigger.as_slice().len() >= 8 * 1024 * 1024);
    }

    #[test]
    fn concurrent_acquire_release() {
        let pool = Arc::new(BufferPool::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    let buf = pool.acquire(32 * 1024);
                    pool.release(buf);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
