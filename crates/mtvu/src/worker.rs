//! The worker thread drain loop.
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use gifunit::tag::packet_cycles;
use gifunit::{FinishedPacket, GsPacket, MtvuPackets};

use crate::cmd::Command;
use crate::ring::CommandRing;
use crate::signal::Signal;
use crate::vu::{GifKick, VectorUnit, VifRegs, VuMemory};

/// Number of execute costs averaged by the cycle heuristic.
pub const HISTORY_LEN: usize = 4;

/// Costs of the last few executed microprograms.
#[derive(Debug, Default)]
pub struct CycleHistory {
    entries: [AtomicU32; HISTORY_LEN],
    next: AtomicU32,
}

impl CycleHistory {
    pub fn record(&self, cycles: u32) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) as usize % HISTORY_LEN;
        self.entries[index].store(cycles, Ordering::Relaxed);
    }

    pub fn entries(&self) -> [u32; HISTORY_LEN] {
        std::array::from_fn(|i| self.entries[i].load(Ordering::Relaxed))
    }

    pub fn set(&self, entries: [u32; HISTORY_LEN]) {
        for (entry, value) in self.entries.iter().zip(entries) {
            entry.store(value, Ordering::Relaxed);
        }

        self.next.store(0, Ordering::Relaxed);
    }

    /// Mean of the recorded costs.
    pub fn mean(&self) -> u32 {
        let sum: u64 = self.entries().iter().map(|&c| u64::from(c)).sum();
        (sum >> 2) as u32
    }
}

/// State shared between the producer handle and the worker thread.
#[derive(Debug)]
pub(crate) struct Shared {
    pub ring: CommandRing,
    pub signal: Signal,
    pub busy: AtomicBool,
    pub shutdown: AtomicBool,
    pub progress: Mutex<()>,
    pub progressed: Condvar,
    pub history: CycleHistory,
    pub packets: Arc<MtvuPackets>,
}

impl Shared {
    pub fn new(ring: CommandRing, packets: Arc<MtvuPackets>) -> Self {
        Self {
            ring,
            signal: Signal::new(),
            busy: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            progress: Mutex::new(()),
            progressed: Condvar::new(),
            history: CycleHistory::default(),
            packets,
        }
    }

    pub fn notify_progress(&self) {
        let _guard = self.progress.lock().unwrap();
        self.progressed.notify_all();
    }

    #[inline(always)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// State private to the worker thread.
pub(crate) struct Worker {
    shared: Arc<Shared>,
    vu: Box<dyn VectorUnit>,
    mem: VuMemory,
    regs: VifRegs,
    kick: GifKick,
}

impl Worker {
    pub fn new(shared: Arc<Shared>, vu: Box<dyn VectorUnit>) -> Self {
        Self {
            shared,
            vu,
            mem: VuMemory::default(),
            regs: VifRegs::default(),
            kick: GifKick::default(),
        }
    }

    fn execute(&mut self, pc: Option<u32>, top: u32, itop: u32) {
        self.mem.top = top;
        self.mem.itop = itop;

        let pc = pc.unwrap_or(self.mem.tpc);
        let cycles = self.vu.execute(&mut self.mem, pc, &mut self.kick);
        self.shared.history.record(cycles);

        let data = self.kick.take();
        let size = data.len() as u32;
        let packet = GsPacket {
            offset: 0,
            size,
            cycles: packet_cycles(&data),
            read_amount: size,
            done: true,
        };

        tracing::trace!(pc, cycles, size, "microprogram finished");
        self.shared.packets.push(FinishedPacket { packet, data });
    }

    fn dispatch(&mut self, command: Command<'_>) {
        match command {
            Command::Execute { pc, top, itop } => self.execute(pc, top, itop),
            Command::WriteMicro { addr, data } => {
                self.mem.write_micro(addr, &data);
                self.vu.micro_written(addr, data.len());
            }
            Command::WriteData { addr, data } => self.mem.write_data(addr, &data),
            Command::WriteCol(col) => self.regs.col = col,
            Command::WriteRow(row) => self.regs.row = row,
            Command::Unpack { vif, data } => {
                self.regs.vif = vif;
                self.vu.unpack(&mut self.mem, &self.regs, &data);
            }
            Command::Wrap => (),
        }
    }

    /// Dispatches commands until the read cursor catches up with the write cursor.
    fn drain(&mut self) {
        let shared = self.shared.clone();
        loop {
            let read = shared.ring.read_pos();
            if read == shared.ring.write_pos() {
                break;
            }

            let Some((command, next)) = shared.ring.read_command(read) else {
                tracing::error!(read, "malformed command, skipping to the write cursor");
                shared.ring.publish_read(shared.ring.write_pos());
                continue;
            };

            let next = match command {
                Command::Wrap => 0,
                command => {
                    self.dispatch(command);
                    next
                }
            };

            shared.ring.publish_read(next);
            shared.notify_progress();
        }
    }

    /// The worker thread body.
    pub fn run(mut self) {
        tracing::debug!("vector unit worker started");
        loop {
            self.shared.signal.wait();
            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            loop {
                self.shared.busy.store(true, Ordering::SeqCst);
                self.drain();
                self.shared.busy.store(false, Ordering::SeqCst);
                self.shared.notify_progress();

                if self.shared.ring.is_empty() {
                    break;
                }
            }
        }

        tracing::debug!("vector unit worker stopped");
    }
}
