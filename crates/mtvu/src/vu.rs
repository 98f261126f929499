//! The vector unit driven by the worker thread.
use gifunit::tag::{TAG_SIZE, packet_len};
use static_assertions::const_assert;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of VU1 micro memory, in bytes.
pub const MICRO_SIZE: usize = 16 * 1024;

/// Size of VU1 data memory, in bytes.
pub const DATA_SIZE: usize = 16 * 1024;

/// VIF1 registers relevant to an unpack, as they were when the unpack was issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct VifSnapshot {
    /// Write cycle length.
    pub wl: u32,
    /// Cycle length.
    pub cl: u32,
    /// Addition decrement mode (`MODE`).
    pub mode: u32,
    /// Remaining qwords to write (`NUM`).
    pub num: u32,
    /// Write mask (`MASK`).
    pub mask: u32,
    /// Current write address, in qwords.
    pub addr: u32,
    /// Unpack format (`vn`/`vl`).
    pub format: u32,
    /// Unsigned flag of the `UNPACK` code.
    pub usn: u32,
    /// Whether `addr` is relative to `TOPS`.
    pub flg: u32,
    pub tops: u32,
    /// Progress through the current write cycle.
    pub cycle: u32,
    pub itop: u32,
}

/// Size of a [`VifSnapshot`], in words.
pub const VIF_WORDS: usize = size_of::<VifSnapshot>() / 4;

const_assert!(size_of::<VifSnapshot>() % 4 == 0);

/// Worker-side copy of the VIF registers used by unpacks. Only ever written through ring
/// commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VifRegs {
    pub vif: VifSnapshot,
    /// `R0`-`R3`
    pub row: [u32; 4],
    /// `C0`-`C3`
    pub col: [u32; 4],
}

/// VU1 memories and the registers the EE sets up before a microprogram runs.
#[derive(Debug, Clone)]
pub struct VuMemory {
    pub micro: Box<[u8]>,
    pub data: Box<[u8]>,
    pub top: u32,
    pub itop: u32,
    /// Where the last microprogram stopped.
    pub tpc: u32,
}

impl Default for VuMemory {
    fn default() -> Self {
        Self {
            micro: vec![0; MICRO_SIZE].into_boxed_slice(),
            data: vec![0; DATA_SIZE].into_boxed_slice(),
            top: 0,
            itop: 0,
            tpc: 0,
        }
    }
}

fn write_wrapping(memory: &mut [u8], addr: u32, data: &[u8]) {
    let mask = memory.len() - 1;
    for (i, byte) in data.iter().enumerate() {
        memory[(addr as usize + i) & mask] = *byte;
    }
}

impl VuMemory {
    pub fn write_micro(&mut self, addr: u32, data: &[u8]) {
        write_wrapping(&mut self.micro, addr, data);
    }

    pub fn write_data(&mut self, addr: u32, data: &[u8]) {
        write_wrapping(&mut self.data, addr, data);
    }
}

/// Collects the GIF data kicked by a microprogram.
#[derive(Debug, Default)]
pub struct GifKick {
    data: Vec<u8>,
}

impl GifKick {
    /// `XGKICK`: sends the GIF packet at qword `addr` of data memory, wrapping around its end.
    pub fn xgkick(&mut self, mem: &VuMemory, addr: u32) {
        let start = (addr as usize * TAG_SIZE) & (DATA_SIZE - 1);

        let mut packet = mem.data[start..].to_vec();
        packet.extend_from_slice(&mem.data[..start]);

        let Some(len) = packet_len(&packet) else {
            tracing::warn!(addr, "xgkick of a packet without an end");
            return;
        };

        tracing::trace!(addr, len, "xgkick");
        self.data.extend_from_slice(&packet[..len]);
    }

    /// Appends raw packet bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}

/// A VU1 implementation the worker thread drives.
pub trait VectorUnit: Send {
    /// Runs the microprogram at `pc` until it ends, returning how many cycles it took. GIF
    /// packets it kicks go to `kick`. Implementations update `mem.tpc`.
    fn execute(&mut self, mem: &mut VuMemory, pc: u32, kick: &mut GifKick) -> u32;

    /// `len` bytes of micro memory starting at `addr` were overwritten.
    fn micro_written(&mut self, addr: u32, len: usize) {
        _ = (addr, len);
    }

    /// Unpacks `data` into data memory following the VIF state in `regs`.
    fn unpack(&mut self, mem: &mut VuMemory, regs: &VifRegs, data: &[u8]);
}

/// A vector unit that never runs anything.
#[derive(Debug, Default)]
pub struct NopVectorUnit;

impl VectorUnit for NopVectorUnit {
    fn execute(&mut self, _: &mut VuMemory, _: u32, _: &mut GifKick) -> u32 {
        0
    }

    fn unpack(&mut self, _: &mut VuMemory, _: &VifRegs, _: &[u8]) {}
}
