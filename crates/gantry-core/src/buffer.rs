//! Pooled output buffers and the shared G-code reply stack.
//!
//! Replies are composed into fixed-size buffers drawn from a bounded
//! pool; running dry is an expected condition the HTTP layer answers
//! with a short pre-baked 503. The G-code reply stack is shared by all
//! HTTP sessions: an entry survives a send while sessions that have not
//! fetched it yet remain, tracked with an explicit hold counter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};

use crate::constants::{OUTPUT_BUFFER_COUNT, OUTPUT_BUFFER_SIZE};

// =============================================================================
// Buffer Pool
// =============================================================================

#[derive(Debug)]
struct PoolInner {
    free: AtomicUsize,
}

/// Bounded pool of fixed-size output buffers.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(count: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: AtomicUsize::new(count),
            }),
        }
    }

    /// Take a buffer from the pool, or `None` when it is dry.
    pub fn allocate(&self) -> Option<OutputBuffer> {
        let mut free = self.inner.free.load(Ordering::Acquire);
        loop {
            if free == 0 {
                return None;
            }
            match self.inner.free.compare_exchange_weak(
                free,
                free - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(OutputBuffer {
                        pool: Arc::clone(&self.inner),
                        data: Vec::with_capacity(OUTPUT_BUFFER_SIZE),
                        referenced: false,
                    });
                }
                Err(current) => free = current,
            }
        }
    }

    /// Buffers currently available.
    pub fn free_buffers(&self) -> usize {
        self.inner.free.load(Ordering::Acquire)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(OUTPUT_BUFFER_COUNT)
    }
}

/// One pooled buffer. Returns itself to the pool on drop.
#[derive(Debug)]
pub struct OutputBuffer {
    pool: Arc<PoolInner>,
    data: Vec<u8>,
    referenced: bool,
}

impl OutputBuffer {
    /// Append as much of `bytes` as fits; returns how many were taken.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let space = OUTPUT_BUFFER_SIZE - self.data.len();
        let n = space.min(bytes.len());
        self.data.extend_from_slice(&bytes[..n]);
        n
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.data.len() == OUTPUT_BUFFER_SIZE
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Whether an in-flight send still holds this buffer's contents.
    pub fn is_referenced(&self) -> bool {
        self.referenced
    }
}

impl Drop for OutputBuffer {
    fn drop(&mut self) {
        self.pool.free.fetch_add(1, Ordering::AcqRel);
    }
}

// =============================================================================
// Output Chain
// =============================================================================

/// A response body composed across chained pooled buffers.
///
/// Appends allocate further buffers on demand; when the pool runs dry
/// the chain records the overflow instead of growing, and the caller
/// falls back to the short 503.
#[derive(Debug)]
pub struct OutputChain {
    pool: BufferPool,
    bufs: Vec<OutputBuffer>,
    overflow: bool,
}

impl OutputChain {
    /// Reserve the first buffer up front; without one no reply could be
    /// sent at all.
    pub fn allocate(pool: &BufferPool) -> Option<Self> {
        let first = pool.allocate()?;
        Some(Self {
            pool: pool.clone(),
            bufs: vec![first],
            overflow: false,
        })
    }

    pub fn push_bytes(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let last = self.bufs.last_mut().expect("chain holds at least one buffer");
            let taken = last.append(bytes);
            bytes = &bytes[taken..];
            if !bytes.is_empty() {
                match self.pool.allocate() {
                    Some(buf) => self.bufs.push(buf),
                    None => {
                        self.overflow = true;
                        return;
                    }
                }
            }
        }
    }

    pub fn push_str(&mut self, text: &str) {
        self.push_bytes(text.as_bytes());
    }

    /// True when an append was dropped for lack of buffers.
    pub fn had_overflow(&self) -> bool {
        self.overflow
    }

    pub fn len(&self) -> usize {
        self.bufs.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the chain out for the socket write.
    pub fn concat(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.len());
        for buf in &self.bufs {
            out.extend_from_slice(buf.as_slice());
        }
        out.freeze()
    }
}

// =============================================================================
// G-code Reply Stack
// =============================================================================

/// Shared stack of G-code reply text, consumed by every HTTP session.
///
/// `clients_served` counts sessions that have fetched the current
/// contents. A send that leaves unserved sessions behind holds the stack
/// (the hold marks the buffers so later appends go into fresh ones); the
/// last send clears it. Timed-out sessions count as served.
#[derive(Debug, Default)]
pub struct GcodeReplyStack {
    bufs: Vec<OutputBuffer>,
    references: usize,
    clients_served: usize,
    seq: u16,
}

impl GcodeReplyStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append reply text for the sessions to fetch. Silently drops the
    /// text when the pool is dry.
    pub fn append(&mut self, pool: &BufferPool, text: &str) {
        let mut bytes = text.as_bytes();
        while !bytes.is_empty() {
            let need_new = match self.bufs.last() {
                None => true,
                Some(last) => last.is_referenced() || last.is_full(),
            };
            if need_new {
                match pool.allocate() {
                    Some(buf) => self.bufs.push(buf),
                    None => {
                        // No more space available, stop here.
                        tracing::debug!("reply dropped, buffer pool dry");
                        break;
                    }
                }
            }
            let last = self.bufs.last_mut().expect("pushed above");
            let taken = last.append(bytes);
            bytes = &bytes[taken..];
        }
        self.clients_served = 0;
        self.seq = self.seq.wrapping_add(1);
    }

    pub fn is_empty(&self) -> bool {
        self.data_length() == 0
    }

    pub fn data_length(&self) -> usize {
        self.bufs.iter().map(|b| b.len()).sum()
    }

    /// Bumped on every append; lets pollers notice new replies.
    pub fn seq(&self) -> u16 {
        self.seq
    }

    /// Outstanding holds from sends that left unserved sessions behind.
    pub fn references(&self) -> usize {
        self.references
    }

    /// Snapshot the stack for one session's fetch and update the
    /// bookkeeping: hold the contents while other sessions still need
    /// them, clear once everyone was served.
    pub fn take_for_send(&mut self, num_sessions: usize) -> Bytes {
        let mut out = BytesMut::with_capacity(self.data_length());
        for buf in &self.bufs {
            out.extend_from_slice(buf.as_slice());
        }
        let snapshot = out.freeze();

        if !snapshot.is_empty() {
            self.clients_served += 1;
            if self.clients_served < num_sessions {
                self.references += 1;
                for buf in &mut self.bufs {
                    buf.referenced = true;
                }
            } else {
                self.clear();
            }
        }
        snapshot
    }

    /// Account for sessions that timed out without fetching. When nobody
    /// is left to serve, the stack is dropped to free pool space.
    pub fn note_timed_out(&mut self, timed_out: usize, num_sessions: usize) {
        if timed_out == 0 {
            return;
        }
        self.clients_served += timed_out;
        if num_sessions == 0 || self.clients_served >= num_sessions {
            self.clear();
        }
        self.clients_served = 0;
    }

    pub fn clear(&mut self) {
        self.bufs.clear();
        self.references = 0;
        self.clients_served = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_allocation_bounded() {
        let pool = BufferPool::new(2);
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        assert!(pool.allocate().is_none());
        assert_eq!(pool.free_buffers(), 0);

        drop(a);
        assert_eq!(pool.free_buffers(), 1);
        drop(b);
        assert_eq!(pool.free_buffers(), 2);
    }

    #[test]
    fn buffer_append_caps_at_size() {
        let pool = BufferPool::new(1);
        let mut buf = pool.allocate().unwrap();
        let big = vec![b'x'; OUTPUT_BUFFER_SIZE + 10];
        assert_eq!(buf.append(&big), OUTPUT_BUFFER_SIZE);
        assert!(buf.is_full());
        assert_eq!(buf.append(b"more"), 0);
    }

    #[test]
    fn chain_spans_buffers() {
        let pool = BufferPool::new(4);
        let mut chain = OutputChain::allocate(&pool).unwrap();
        let body = vec![b'a'; OUTPUT_BUFFER_SIZE * 2 + 5];
        chain.push_bytes(&body);

        assert!(!chain.had_overflow());
        assert_eq!(chain.len(), body.len());
        assert_eq!(chain.concat(), Bytes::from(body));
        assert_eq!(pool.free_buffers(), 1);
    }

    #[test]
    fn chain_records_overflow_when_pool_dry() {
        let pool = BufferPool::new(1);
        let mut chain = OutputChain::allocate(&pool).unwrap();
        chain.push_bytes(&vec![b'a'; OUTPUT_BUFFER_SIZE * 3]);

        assert!(chain.had_overflow());
        assert_eq!(chain.len(), OUTPUT_BUFFER_SIZE);
    }

    #[test]
    fn chain_allocate_fails_when_pool_dry() {
        let pool = BufferPool::new(0);
        assert!(OutputChain::allocate(&pool).is_none());
    }

    #[test]
    fn reply_stack_clears_after_last_session() {
        let pool = BufferPool::new(4);
        let mut stack = GcodeReplyStack::new();
        stack.append(&pool, "ok\n");

        // Two sessions: the first fetch holds the stack.
        let first = stack.take_for_send(2);
        assert_eq!(first, Bytes::from_static(b"ok\n"));
        assert!(!stack.is_empty());
        assert_eq!(stack.references(), 1);

        // The second (last) fetch clears it.
        let second = stack.take_for_send(2);
        assert_eq!(second, Bytes::from_static(b"ok\n"));
        assert!(stack.is_empty());
        assert_eq!(stack.references(), 0);
    }

    #[test]
    fn reply_stack_appends_into_fresh_buffer_while_held() {
        let pool = BufferPool::new(4);
        let mut stack = GcodeReplyStack::new();
        stack.append(&pool, "first\n");
        let _ = stack.take_for_send(2); // held for the second session

        stack.append(&pool, "second\n");
        let all = stack.take_for_send(1);
        assert_eq!(all, Bytes::from_static(b"first\nsecond\n"));
    }

    #[test]
    fn reply_stack_seq_advances_on_append() {
        let pool = BufferPool::new(4);
        let mut stack = GcodeReplyStack::new();
        let seq0 = stack.seq();
        stack.append(&pool, "x");
        assert_ne!(stack.seq(), seq0);
    }

    #[test]
    fn timed_out_clients_count_as_served() {
        let pool = BufferPool::new(4);
        let mut stack = GcodeReplyStack::new();
        stack.append(&pool, "reply\n");

        // Two sessions, one fetches, the other times out.
        let _ = stack.take_for_send(2);
        stack.note_timed_out(1, 1);
        assert!(stack.is_empty());
    }

    #[test]
    fn empty_send_does_not_consume() {
        let pool = BufferPool::new(4);
        let mut stack = GcodeReplyStack::new();
        let empty = stack.take_for_send(3);
        assert!(empty.is_empty());
        assert_eq!(stack.references(), 0);
    }
}
