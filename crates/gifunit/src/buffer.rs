//! Path buffers.
//!
//! A path buffer is a flat byte buffer with a write cursor (bytes received) and a parse cursor
//! (bytes consumed into packets). Data is never written across the physical end of the buffer:
//! instead, the unparsed tail is moved back to the start (see [`crate::path::Path::realign`]).
//! The last `safe_zone` bytes are slack so that a parse step started before the limit never
//! needs to look past the end.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::tag::{QWORD, TAG_SIZE};

#[derive(Debug, Default)]
struct ReadCounterInner {
    outstanding: AtomicU32,
    lock: Mutex<()>,
    released: Condvar,
}

/// Counts bytes that were forwarded downstream but not yet released by the consumer.
///
/// This type is reference counted and therefore cheaply clonable.
#[derive(Debug, Clone, Default)]
pub struct ReadCounter(Arc<ReadCounterInner>);

impl ReadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes still outstanding downstream.
    #[inline(always)]
    pub fn outstanding(&self) -> u32 {
        self.0.outstanding.load(Ordering::Acquire)
    }

    pub(crate) fn add(&self, amount: u32) {
        self.0.outstanding.fetch_add(amount, Ordering::AcqRel);
    }

    /// Releases `amount` bytes, allowing the path buffer to reuse them.
    pub fn release(&self, amount: u32) {
        let prev = self
            .0
            .outstanding
            .fetch_update(Ordering::Release, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(amount))
            })
            .unwrap_or_default();

        debug_assert!(
            prev >= amount,
            "released {amount} bytes but only {prev} were outstanding"
        );

        let _guard = self.0.lock.lock().unwrap();
        self.0.released.notify_all();
    }

    /// Blocks until `ready` returns true for the outstanding byte count.
    pub(crate) fn wait_until(&self, mut ready: impl FnMut(u32) -> bool) {
        if ready(self.outstanding()) {
            return;
        }

        let mut guard = self.0.lock.lock().unwrap();
        while !ready(self.outstanding()) {
            tracing::trace!(
                outstanding = self.outstanding(),
                "waiting for downstream reads"
            );
            guard = self.0.released.wait(guard).unwrap();
        }
    }

    pub(crate) fn reset(&self) {
        self.0.outstanding.store(0, Ordering::Release);
    }
}

/// The byte storage of a path.
#[derive(Debug, Clone)]
pub struct PathBuffer {
    data: Box<[u8]>,
    limit: usize,
    write: usize,
    parse: usize,
}

impl PathBuffer {
    /// Creates a buffer holding `size` bytes, of which the last `safe_zone` are slack.
    pub fn new(size: usize, safe_zone: usize) -> Self {
        assert!(size % QWORD == 0, "path buffer size must be qword aligned");
        assert!(
            safe_zone >= TAG_SIZE && safe_zone < size,
            "safe zone of {safe_zone} bytes does not fit a {size} byte buffer"
        );

        Self {
            data: vec![0; size].into_boxed_slice(),
            limit: size - safe_zone,
            write: 0,
            parse: 0,
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Offset past which the parse cursor triggers a realignment.
    #[inline(always)]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The write cursor.
    #[inline(always)]
    pub fn write_pos(&self) -> usize {
        self.write
    }

    /// The parse cursor.
    #[inline(always)]
    pub fn parse_pos(&self) -> usize {
        self.parse
    }

    /// Bytes received but not yet parsed.
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.write - self.parse
    }

    #[inline(always)]
    pub fn has_data_remaining(&self) -> bool {
        self.parse < self.write
    }

    /// Whether `len` more bytes fit without moving data.
    #[inline(always)]
    pub fn fits(&self, len: usize) -> bool {
        self.write + len <= self.capacity()
    }

    /// Appends `data` at the write cursor. Returns false, leaving the buffer untouched, if it
    /// does not fit.
    pub fn push(&mut self, data: &[u8]) -> bool {
        if !self.fits(data.len()) {
            return false;
        }

        self.data[self.write..][..data.len()].copy_from_slice(data);
        self.write += data.len();
        true
    }

    /// The tag at the parse cursor, if it has been fully received.
    pub fn tag(&self) -> Option<&[u8; TAG_SIZE]> {
        if self.parse + TAG_SIZE > self.write {
            return None;
        }

        self.data[self.parse..][..TAG_SIZE].try_into().ok()
    }

    /// The qword at the parse cursor, if it has been fully received.
    pub fn qword(&self) -> Option<&[u8; QWORD]> {
        self.tag()
    }

    /// Moves the parse cursor forward by `amount` bytes.
    pub fn advance(&mut self, amount: usize) {
        debug_assert!(
            self.parse + amount <= self.write,
            "parse cursor would pass the write cursor (parse: {}, amount: {amount}, write: {})",
            self.parse,
            self.write
        );

        self.parse = (self.parse + amount).min(self.write);
    }

    /// Moves the parse cursor back by `amount` bytes.
    pub fn rewind(&mut self, amount: usize) {
        debug_assert!(amount <= self.parse, "parse cursor would underflow");
        self.parse = self.parse.saturating_sub(amount);
    }

    /// Drops every received byte past the parse cursor and returns how many were dropped.
    pub fn truncate(&mut self) -> usize {
        let dropped = self.write - self.parse;
        self.write = self.parse;
        dropped
    }

    /// Moves `[offset, write)` to the start of the buffer and rebases both cursors.
    pub fn shift_to_front(&mut self, offset: usize) {
        debug_assert!(offset <= self.parse, "shifting away unparsed data");

        let offset = offset.min(self.parse);
        self.data.copy_within(offset..self.write, 0);
        self.write -= offset;
        self.parse -= offset;
    }

    /// The bytes in `[offset, offset + len)`.
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        let end = (offset + len).min(self.write);
        &self.data[offset.min(end)..end]
    }

    /// Raw contents up to the write cursor.
    pub fn contents(&self) -> &[u8] {
        &self.data[..self.write]
    }

    /// Replaces the contents and cursors. Used when restoring snapshots.
    pub(crate) fn restore(&mut self, contents: &[u8], parse: usize) {
        debug_assert!(contents.len() <= self.capacity() && parse <= contents.len());

        self.data[..contents.len()].copy_from_slice(contents);
        self.write = contents.len();
        self.parse = parse;
    }

    pub fn clear(&mut self) {
        self.write = 0;
        self.parse = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cursors() {
        let mut buffer = PathBuffer::new(256, 64);
        assert_eq!(buffer.limit(), 192);
        assert!(buffer.push(&[1; 48]));
        assert_eq!(buffer.remaining(), 48);

        buffer.advance(16);
        assert_eq!(buffer.parse_pos(), 16);
        assert_eq!(buffer.tag(), Some(&[1; 16]));

        buffer.advance(32);
        assert!(!buffer.has_data_remaining());
        assert_eq!(buffer.tag(), None);
    }

    #[test]
    fn push_never_crosses_the_end() {
        let mut buffer = PathBuffer::new(64, 16);
        assert!(buffer.push(&[0; 48]));
        assert!(!buffer.push(&[0; 32]));
        assert_eq!(buffer.write_pos(), 48);
        assert!(buffer.push(&[0; 16]));
        assert_eq!(buffer.write_pos(), buffer.capacity());
    }

    #[test]
    fn shift_to_front_keeps_unparsed_bytes() {
        let mut buffer = PathBuffer::new(64, 16);
        let data = (0..48).collect::<Vec<u8>>();
        buffer.push(&data);
        buffer.advance(40);

        buffer.shift_to_front(32);
        assert_eq!(buffer.parse_pos(), 8);
        assert_eq!(buffer.write_pos(), 16);
        assert_eq!(buffer.contents(), &data[32..]);
    }

    #[test]
    fn truncate_and_rewind() {
        let mut buffer = PathBuffer::new(64, 16);
        buffer.push(&[0; 48]);
        buffer.advance(32);
        assert_eq!(buffer.truncate(), 16);
        assert_eq!(buffer.write_pos(), 32);

        buffer.rewind(16);
        assert_eq!(buffer.remaining(), 16);
    }

    #[test]
    fn read_counter_wakes_waiter() {
        let counter = ReadCounter::new();
        counter.add(64);

        let handle = std::thread::spawn({
            let counter = counter.clone();
            move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                counter.release(32);
                counter.release(32);
            }
        });

        counter.wait_until(|outstanding| outstanding == 0);
        assert_eq!(counter.outstanding(), 0);
        handle.join().unwrap();
    }
}
