//! Packets produced by the vector unit thread.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};

use crate::packet::{FinishedPacket, GsPacket};

/// The queue of packets kicked by the vector unit thread, plus the count of placeholder packets
/// path 1 has yet to parse on their behalf.
///
/// Shared between the GIF unit and the worker thread.
#[derive(Debug, Default)]
pub struct MtvuPackets {
    queue: Mutex<VecDeque<FinishedPacket>>,
    posted: Condvar,
    placeholders: AtomicU32,
}

impl MtvuPackets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a finished packet and wakes anyone waiting for one.
    pub fn push(&self, packet: FinishedPacket) {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(packet);
        self.posted.notify_all();
    }

    pub fn pop(&self) -> Option<FinishedPacket> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Blocks until a packet is available and pops it.
    pub fn wait_pop(&self) -> FinishedPacket {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if let Some(packet) = queue.pop_front() {
                return packet;
            }

            queue = self.posted.wait(queue).unwrap();
        }
    }

    /// The descriptor of the oldest queued packet.
    pub fn peek(&self) -> Option<GsPacket> {
        self.queue.lock().unwrap().front().map(|p| p.packet)
    }

    /// Number of queued packets.
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn add_placeholder(&self) {
        self.placeholders.fetch_add(1, Ordering::AcqRel);
    }

    /// Consumes one placeholder, returning false if there were none.
    pub fn take_placeholder(&self) -> bool {
        self.placeholders
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1))
            .is_ok()
    }

    pub fn placeholders(&self) -> u32 {
        self.placeholders.load(Ordering::Acquire)
    }

    pub(crate) fn set_placeholders(&self, count: u32) {
        self.placeholders.store(count, Ordering::Release);
    }

    pub fn clear(&self) {
        self.queue.lock().unwrap().clear();
        self.placeholders.store(0, Ordering::Release);
    }
}
