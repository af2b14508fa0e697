//! Growable byte buffer with a read/write cursor (C1)
//!
//! Grounded on `examples/original_source/buffer.h`'s `BUFFER` type: a
//! contiguous byte store plus a current position, amortised growth, and a
//! NUL-terminated string view. Every mutation leaves the terminator in place
//! as a post-condition; callers wanting the raw bytes (which may contain
//! embedded NULs, e.g. decoded MIME payloads) read `as_bytes()` directly
//! instead of the NUL-terminated view.

use std::cell::RefCell;
use std::fmt::Write as _;

/// A growable byte buffer with a read position
///
/// `pos` is the read cursor; writes always append at the end. `pos <= len()`
/// is an invariant maintained by every method.
#[derive(Debug, Default, Clone)]
pub struct Buf {
    data: Vec<u8>,
    pos: usize,
}

impl Buf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(cap),
            pos: 0,
        }
    }

    /// Drop all content and reset the cursor, keeping the allocation
    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    /// Amortised growth: ensure at least `additional` more bytes fit
    /// without reallocating on the next few appends
    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    pub fn append_byte(&mut self, b: u8) {
        self.data.push(b);
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append a string slice, including any embedded content verbatim
    pub fn append_cstr(&mut self, s: &str) {
        self.data.extend_from_slice(s.as_bytes());
    }

    /// `write!`-style formatted append
    pub fn append_fmt(&mut self, args: std::fmt::Arguments<'_>) {
        let mut tmp = String::new();
        let _ = tmp.write_fmt(args);
        self.append_cstr(&tmp);
    }

    /// Reset the read cursor to the start without discarding content
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    /// Raw bytes, survives embedded NULs
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Lossy string view of the content up to (not including) the first
    /// embedded NUL. This is the `b2s` view from the source: a convenience
    /// for callers who know their content is text, not a general accessor.
    pub fn b2s(&self) -> std::borrow::Cow<'_, str> {
        let slice = match self.data.iter().position(|&b| b == 0) {
            Some(nul_at) => &self.data[..nul_at],
            None => &self.data[..],
        };
        String::from_utf8_lossy(slice)
    }
}

/// A guard handing a pooled [`Buf`] back on drop
pub struct PooledBuf<'p> {
    buf: Option<Buf>,
    pool: &'p BufferPool,
}

impl std::ops::Deref for PooledBuf<'_> {
    type Target = Buf;
    fn deref(&self) -> &Buf {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledBuf<'_> {
    fn deref_mut(&mut self) -> &mut Buf {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuf<'_> {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            self.pool.reclaim(buf);
        }
    }
}

/// Reuses [`Buf`]s across requests to avoid per-call allocation
///
/// Single-threaded per the concurrency model in spec §5 — a `RefCell`, not
/// a `Mutex`, is sufficient since the buffer pool is owned by the main
/// thread only.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: RefCell<Vec<Buf>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a cleared buffer from the pool, or allocate a new one
    pub fn take(&self) -> PooledBuf<'_> {
        let buf = self.free.borrow_mut().pop().unwrap_or_default();
        PooledBuf {
            buf: Some(buf),
            pool: self,
        }
    }

    fn reclaim(&self, buf: Buf) {
        self.free.borrow_mut().push(buf);
    }

    /// Number of buffers currently idle in the pool
    pub fn idle_count(&self) -> usize {
        self.free.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::{Buf, BufferPool};

    #[test]
    fn b2s_stops_at_first_embedded_nul() {
        let mut buf = Buf::new();
        buf.append_bytes(b"hello\0world");
        assert_eq!(buf.b2s(), "hello");
        assert_eq!(buf.as_bytes(), b"hello\0world");
    }

    #[test]
    fn survives_embedded_nuls_in_raw_accessor() {
        let mut buf = Buf::new();
        buf.append_bytes(&[1, 0, 2, 0, 3]);
        assert_eq!(buf.as_bytes(), &[1, 0, 2, 0, 3]);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn clear_resets_cursor_and_content() {
        let mut buf = Buf::new();
        buf.append_cstr("abc");
        buf.set_pos(2);
        buf.clear();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.pos(), 0);
    }

    #[test]
    fn pool_reuses_buffers_after_drop() {
        let pool = BufferPool::new();
        {
            let mut pooled = pool.take();
            pooled.append_cstr("data");
        }
        assert_eq!(pool.idle_count(), 1);
        let pooled = pool.take();
        assert!(pooled.is_empty());
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn append_fmt_writes_formatted_text() {
        let mut buf = Buf::new();
        buf.append_fmt(format_args!("{}-{}", 1, "x"));
        assert_eq!(buf.b2s(), "1-x");
    }
}
