//! Multi-threaded VU1.
//!
//! VU1 microprograms run on a dedicated worker thread. The emulation thread sends work through
//! a [`CommandRing`](ring::CommandRing) using a [`VuThread`], and GIF packets kicked by the
//! microprograms come back through the GIF unit's [`MtvuPackets`] queue.
pub mod cmd;
pub mod ring;
pub mod signal;
pub mod vu;
mod worker;

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use easyerr::{Error, ResultExt};
use gifunit::MtvuPackets;
use serde::{Deserialize, Serialize};

use crate::cmd::Command;
use crate::ring::CommandRing;
use crate::vu::{VectorUnit, VifSnapshot};
use crate::worker::{Shared, Worker};

pub use worker::{CycleHistory, HISTORY_LEN};

/// Vector unit thread configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Capacity of the command ring, in words. Must be a power of two.
    pub ring_words: usize,
    /// Upper bound of [`VuThread::vu_cycles`].
    pub max_kick_cycles: u32,
    /// Committing while at least this many words are waiting wakes the worker.
    pub commit_kick_words: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ring_words: 1 << 18,
            max_kick_cycles: 3000,
            commit_kick_words: 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("ring capacity of {words} words is not a power of two of at least 16")]
    RingSize { words: usize },
    #[error(transparent)]
    Thread { source: std::io::Error },
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Encode {
        source: ciborium::ser::Error<std::io::Error>,
    },
    #[error(transparent)]
    Decode {
        source: ciborium::de::Error<std::io::Error>,
    },
    #[error("cursor {pos} is outside of a {capacity} word ring")]
    Cursor { pos: u32, capacity: u32 },
    #[error("ring was captured with commands pending (read: {read}, write: {write})")]
    Pending { read: u32, write: u32 },
}

/// Ring state saved in save states. The ring is always drained before it is captured, so no
/// command words are part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSnapshot {
    pub read: u32,
    pub write: u32,
    pub history: [u32; HISTORY_LEN],
}

/// Handle to the vector unit worker thread. Dropping it stops the thread.
pub struct VuThread {
    config: Config,
    shared: Arc<Shared>,
    /// Producer side write position, ahead of the published one while a command is written.
    write: u32,
    handle: Option<JoinHandle<()>>,
}

impl VuThread {
    /// Spawns the worker thread. Packets kicked by microprograms are pushed to `packets`, which
    /// should be the queue of the GIF unit (see [`gifunit::GifUnit::mtvu_packets`]).
    pub fn spawn(
        config: Config,
        vu: Box<dyn VectorUnit>,
        packets: Arc<MtvuPackets>,
    ) -> Result<Self, SpawnError> {
        let Some(ring) = CommandRing::new(config.ring_words) else {
            return Err(SpawnError::RingSize {
                words: config.ring_words,
            });
        };

        let shared = Arc::new(Shared::new(ring, packets));
        let worker = Worker::new(shared.clone(), vu);
        let handle = std::thread::Builder::new()
            .name("mtvu worker".into())
            .spawn(move || worker.run())
            .context(SpawnCtx::Thread)?;

        Ok(Self {
            config,
            shared,
            write: 0,
            handle: Some(handle),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The queue kicked packets are pushed to.
    pub fn packets(&self) -> &Arc<MtvuPackets> {
        &self.shared.packets
    }

    pub fn ring(&self) -> &CommandRing {
        &self.shared.ring
    }

    /// Blocks on the progress condition until `ready` holds, waking the worker each time.
    fn wait_for(&self, mut ready: impl FnMut(&Shared) -> bool) {
        let shared: &Shared = &self.shared;
        if ready(shared) {
            return;
        }

        let mut guard = shared.progress.lock().unwrap();
        while !ready(shared) {
            self.kick(true);
            guard = shared.progressed.wait(guard).unwrap();
        }
    }

    /// Makes room for `len` words at the producer position, wrapping if needed. Commands
    /// larger than [`CommandRing::max_command`] are a caller bug.
    fn reserve(&mut self, len: u32) {
        let ring = &self.shared.ring;
        assert!(
            len <= ring.max_command(),
            "command of {len} words does not fit a ring of {} words",
            ring.capacity()
        );

        if ring.needs_wrap(self.write, len) {
            let write = self.write;
            self.wait_for(|shared| shared.ring.can_wrap(write, shared.ring.read_pos()));

            tracing::trace!(write, "wrapping command ring");
            self.shared.ring.write_wrap(write);
            self.write = 0;
            self.shared.ring.publish_write(0);
            self.kick(false);
        }

        let write = self.write;
        self.wait_for(|shared| shared.ring.has_room(write, len, shared.ring.read_pos()));
    }

    /// Publishes everything written so far.
    fn commit(&mut self) {
        self.shared.ring.publish_write(self.write);
        if self.shared.ring.committed() >= self.config.commit_kick_words {
            self.kick(false);
        }
    }

    fn submit(&mut self, command: &Command) {
        self.reserve(command.size_words() as u32);
        self.write = self.shared.ring.write_command(self.write, command);
        self.commit();
    }

    /// Wakes the worker. Unless `force` is set, it is only woken if it is not already draining.
    pub fn kick(&self, force: bool) {
        let wake = if force {
            self.shared.signal.count() == 0
        } else {
            !self.shared.is_busy()
        };

        if wake {
            self.shared.signal.post();
        }
    }

    /// Runs the microprogram at `pc` (or at the current TPC if `None`) and kicks the worker.
    ///
    /// The caller must register a matching placeholder with the GIF unit through
    /// [`gifunit::Transfer::Mtvu`].
    pub fn submit_execute(&mut self, pc: Option<u32>, top: u32, itop: u32) {
        self.submit(&Command::Execute { pc, top, itop });
        self.kick(false);
    }

    /// Largest byte payload of a single memory write command.
    fn write_chunk(&self) -> usize {
        // tag, address and length words
        (self.shared.ring.max_command() as usize - 3) * 4
    }

    /// Writes `data` to micro memory at byte address `addr`. Writes larger than the ring are
    /// split into several commands.
    pub fn submit_write_micro(&mut self, addr: u32, data: &[u8]) {
        let chunk = self.write_chunk();
        for (i, data) in data.chunks(chunk).enumerate() {
            self.submit(&Command::WriteMicro {
                addr: addr.wrapping_add((i * chunk) as u32),
                data: Cow::Borrowed(data),
            });
        }
    }

    /// Writes `data` to data memory at byte address `addr`. Writes larger than the ring are
    /// split into several commands.
    pub fn submit_write_data(&mut self, addr: u32, data: &[u8]) {
        let chunk = self.write_chunk();
        for (i, data) in data.chunks(chunk).enumerate() {
            self.submit(&Command::WriteData {
                addr: addr.wrapping_add((i * chunk) as u32),
                data: Cow::Borrowed(data),
            });
        }
    }

    pub fn submit_write_row(&mut self, row: [u32; 4]) {
        self.submit(&Command::WriteRow(row));
    }

    pub fn submit_write_col(&mut self, col: [u32; 4]) {
        self.submit(&Command::WriteCol(col));
    }

    /// Unpacks `data` into VU1 data memory with the given VIF state and kicks the worker.
    ///
    /// An unpack is a single command, so `data` plus the VIF state must fit in
    /// [`CommandRing::max_command`] words.
    ///
    /// # Panics
    /// Panics if `data` is too large for the ring.
    pub fn submit_unpack(&mut self, vif: VifSnapshot, data: &[u8]) {
        self.submit(&Command::Unpack {
            vif,
            data: Cow::Borrowed(data),
        });
        self.kick(false);
    }

    /// Whether every submitted command was dispatched and the worker is idle.
    pub fn is_done(&self) -> bool {
        self.shared.ring.is_empty() && !self.shared.is_busy()
    }

    /// Blocks until every submitted command was dispatched and the worker is idle.
    pub fn wait_idle(&self) {
        self.wait_for(|shared| shared.ring.is_empty() && !shared.is_busy());
    }

    /// Estimated cost of a microprogram: the mean of the last few, clamped.
    pub fn vu_cycles(&self) -> u32 {
        self.shared.history.mean().min(self.config.max_kick_cycles)
    }

    /// Drains the ring and resets it to its initial state.
    pub fn reset(&mut self) {
        self.wait_idle();
        self.shared.ring.reset(0, 0);
        self.shared.history.set([0; HISTORY_LEN]);
        self.write = 0;
    }

    /// Drains the ring and captures its state.
    pub fn snapshot(&self) -> RingSnapshot {
        self.wait_idle();
        RingSnapshot {
            read: self.shared.ring.read_pos(),
            write: self.shared.ring.write_pos(),
            history: self.shared.history.entries(),
        }
    }

    /// Drains the ring and restores a captured state.
    pub fn restore(&mut self, snapshot: RingSnapshot) -> Result<(), SnapshotError> {
        let capacity = self.shared.ring.capacity();
        for pos in [snapshot.read, snapshot.write] {
            if pos >= capacity {
                return Err(SnapshotError::Cursor { pos, capacity });
            }
        }

        // command words are not captured, so a pending command would decode as garbage
        if snapshot.read != snapshot.write {
            return Err(SnapshotError::Pending {
                read: snapshot.read,
                write: snapshot.write,
            });
        }

        self.wait_idle();
        self.shared.ring.reset(snapshot.read, snapshot.write);
        self.shared.history.set(snapshot.history);
        self.write = snapshot.write;

        Ok(())
    }

    /// Encodes the ring state as an opaque byte blob.
    pub fn save(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut out = Vec::new();
        ciborium::into_writer(&self.snapshot(), &mut out).context(SnapshotCtx::Encode)?;
        Ok(out)
    }

    /// Restores the ring from a blob produced by [`VuThread::save`].
    pub fn load(&mut self, blob: &[u8]) -> Result<(), SnapshotError> {
        let snapshot: RingSnapshot = ciborium::from_reader(blob).context(SnapshotCtx::Decode)?;
        self.restore(snapshot)
    }
}

impl Drop for VuThread {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.signal.post();

        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("vector unit worker panicked");
        }
    }
}

#[cfg(test)]
mod test;
