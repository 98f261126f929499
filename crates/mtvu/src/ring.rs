//! The command ring.
//!
//! A single producer, single consumer ring of 32-bit words. Commands never straddle the end of
//! the ring: when one does not fit, the producer writes a [`CommandTag::Wrap`] marker and
//! continues from the start. The read and write cursors are published with release semantics,
//! and the consumer only reads words behind the published write cursor.
//!
//! One word is always left unused so that a full ring can be told apart from an empty one.
use std::sync::atomic::{AtomicU32, Ordering};

use crate::cmd::{Command, CommandTag};

pub struct CommandRing {
    words: Box<[AtomicU32]>,
    read: AtomicU32,
    write: AtomicU32,
}

impl std::fmt::Debug for CommandRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRing")
            .field("capacity", &self.capacity())
            .field("read", &self.read_pos())
            .field("write", &self.write_pos())
            .finish()
    }
}

impl CommandRing {
    /// Creates a ring of `capacity` words, which must be a power of two.
    pub fn new(capacity: usize) -> Option<Self> {
        if !capacity.is_power_of_two() || capacity < 16 || capacity > u32::MAX as usize {
            return None;
        }

        Some(Self {
            words: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            read: AtomicU32::new(0),
            write: AtomicU32::new(0),
        })
    }

    #[inline(always)]
    pub fn capacity(&self) -> u32 {
        self.words.len() as u32
    }

    /// Largest command, in words, the ring can carry.
    #[inline(always)]
    pub fn max_command(&self) -> u32 {
        self.capacity() - 2
    }

    /// The consumer cursor.
    #[inline(always)]
    pub fn read_pos(&self) -> u32 {
        self.read.load(Ordering::Acquire)
    }

    /// The published producer cursor.
    #[inline(always)]
    pub fn write_pos(&self) -> u32 {
        self.write.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.read_pos() == self.write_pos()
    }

    /// Words committed but not yet consumed.
    pub fn committed(&self) -> u32 {
        self.write_pos().wrapping_sub(self.read_pos()) & (self.capacity() - 1)
    }

    #[inline(always)]
    fn word(&self, index: u32) -> u32 {
        self.words[(index & (self.capacity() - 1)) as usize].load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn set_word(&self, index: u32, value: u32) {
        self.words[(index & (self.capacity() - 1)) as usize].store(value, Ordering::Relaxed);
    }

    /// Whether `len` words can be written at `write` without reaching `read`.
    pub fn has_room(&self, write: u32, len: u32, read: u32) -> bool {
        if read <= write {
            write + len < self.capacity()
        } else {
            write + len < read
        }
    }

    /// Whether a command of `len` words must be preceded by a wrap marker when written at
    /// `write`.
    #[inline(always)]
    pub fn needs_wrap(&self, write: u32, len: u32) -> bool {
        write + len > self.capacity() - 1
    }

    /// Whether the producer may write a wrap marker at `write` and continue from the start.
    pub fn can_wrap(&self, write: u32, read: u32) -> bool {
        read <= write && read != 0
    }

    pub(crate) fn publish_write(&self, pos: u32) {
        self.write.store(pos, Ordering::SeqCst);
    }

    pub(crate) fn publish_read(&self, pos: u32) {
        self.read.store(pos, Ordering::Release);
    }

    pub(crate) fn reset(&self, read: u32, write: u32) {
        self.read.store(read, Ordering::Release);
        self.write.store(write, Ordering::Release);
    }

    /// Writes `command` at `at` and returns the position past it. The caller must have
    /// reserved room for it.
    pub(crate) fn write_command(&self, at: u32, command: &Command) -> u32 {
        let mut pos = at;
        command.encode(|word| {
            self.set_word(pos, word);
            pos += 1;
        });

        debug_assert_eq!(pos - at, command.size_words() as u32);
        pos
    }

    pub(crate) fn write_wrap(&self, at: u32) {
        self.set_word(at, CommandTag::Wrap as u32);
    }

    /// Reads the command at `at`, returning it and the position past it.
    pub(crate) fn read_command(&self, at: u32) -> Option<(Command<'static>, u32)> {
        let end = self.capacity();
        let mut words = (at..end).map(|i| self.word(i));
        let command = Command::decode(&mut words)?;
        let next = at + command.size_words() as u32;

        Some((command, next))
    }
}
