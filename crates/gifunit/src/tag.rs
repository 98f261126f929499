//! Primitive (GIF) tags.
use bitos::bitos;
use bitos::integer::{u4, u11, u15};
use serde::{Deserialize, Serialize};
use strum::FromRepr;

/// Size of a GIF tag, in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of a quadword, the unit in which GIF data is transferred.
pub const QWORD: usize = 16;

/// Data format following a tag.
#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flag {
    #[default]
    Packed  = 0b00,
    RegList = 0b01,
    Image   = 0b10,
    /// Behaves exactly like [`Flag::Image`].
    Image2  = 0b11,
}

/// Register descriptor found in the `REGS` field of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u8)]
pub enum Reg {
    Prim     = 0x0,
    Rgbaq    = 0x1,
    Stq      = 0x2,
    Uv       = 0x3,
    Xyzf2    = 0x4,
    Xyz2     = 0x5,
    Tex0_1   = 0x6,
    Tex0_2   = 0x7,
    Clamp1   = 0x8,
    Clamp2   = 0x9,
    Fog      = 0xA,
    Invalid  = 0xB,
    Xyzf3    = 0xC,
    Xyz3     = 0xD,
    /// Address + data: the qword carries its own target register. This is the only descriptor
    /// whose writes may need interception (see [`AdReg`]).
    AddrData = 0xE,
    Nop      = 0xF,
}

impl Reg {
    #[inline(always)]
    pub fn from_nibble(value: u8) -> Self {
        Self::from_repr(value & 0xF).unwrap_or(Self::Nop)
    }
}

/// A+D target registers that are intercepted by the GIF instead of being passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum AdReg {
    Signal = 0x60,
    Finish = 0x61,
    Label  = 0x62,
}

/// The low 64 bits of a tag. The high 64 bits are the `REGS` field.
#[bitos(64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    #[bits(0..15)]
    pub nloop: u15,
    #[bits(15)]
    pub eop: bool,
    #[bits(46)]
    pub pre: bool,
    #[bits(47..58)]
    pub prim: u11,
    #[bits(58..60)]
    pub flg: Flag,
    #[bits(60..64)]
    pub nreg: u4,
}

/// A decoded GIF tag, along with the progress made through it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Raw low 64 bits.
    pub raw: u64,
    /// Remaining loops.
    pub nloop: u32,
    /// Registers per loop, 1..=16. Zero in image mode.
    pub nregs: u32,
    /// Index of the next register inside the current loop.
    pub reg_index: u32,
    /// Length of the data following the tag, in bytes.
    pub len: u32,
    /// Estimated cost of transferring the data, in EE cycles.
    pub cycles: u32,
    /// Register descriptors, see [`Reg`].
    pub regs: [u8; 16],
    /// Whether any descriptor is [`Reg::AddrData`]. Only computed when the tag is analyzed.
    pub has_ad: bool,
    pub valid: bool,
}

impl Tag {
    /// Decodes the tag in `bytes`. When `analyze` is set, packed tags are scanned for A+D
    /// descriptors so their writes can be intercepted.
    pub fn decode(bytes: &[u8; TAG_SIZE], analyze: bool) -> Self {
        let mut low = [0; 8];
        let mut high = [0; 8];
        low.copy_from_slice(&bytes[..8]);
        high.copy_from_slice(&bytes[8..]);

        let raw = u64::from_le_bytes(low);
        let header = Header::from_bits(raw);
        let nloop = u32::from(header.nloop().value());
        let nregs = (u32::from(header.nreg().value()).wrapping_sub(1) & 0xF) + 1;

        let mut tag = Self {
            raw,
            nloop,
            valid: true,
            ..Default::default()
        };

        let descriptors = u64::from_le_bytes(high);
        match header.flg() {
            Flag::Packed => {
                tag.nregs = nregs;
                tag.len = nregs * nloop * QWORD as u32;
                tag.cycles = tag.len << 1;
                tag.unpack_regs(descriptors);
                if analyze {
                    tag.has_ad = tag.regs().any(|r| r == Reg::AddrData);
                }
            }
            Flag::RegList => {
                // registers are 64 bits wide, padded to a whole qword
                tag.nregs = nregs;
                tag.len = (nregs * nloop).div_ceil(2) * QWORD as u32;
                tag.cycles = tag.len << 2;
                tag.unpack_regs(descriptors);
            }
            Flag::Image | Flag::Image2 => {
                tag.len = nloop * QWORD as u32;
                tag.cycles = tag.len << 2;
            }
        }

        tag
    }

    fn unpack_regs(&mut self, mut descriptors: u64) {
        for reg in self.regs.iter_mut().take(self.nregs as usize) {
            *reg = (descriptors & 0xF) as u8;
            descriptors >>= 4;
        }
    }

    #[inline(always)]
    pub fn header(&self) -> Header {
        Header::from_bits(self.raw)
    }

    #[inline(always)]
    pub fn flag(&self) -> Flag {
        self.header().flg()
    }

    #[inline(always)]
    pub fn eop(&self) -> bool {
        self.header().eop()
    }

    /// Register descriptors of a single loop.
    pub fn regs(&self) -> impl Iterator<Item = Reg> + '_ {
        self.regs[..self.nregs as usize]
            .iter()
            .map(|r| Reg::from_nibble(*r))
    }

    /// The register the next packed qword is written to.
    #[inline(always)]
    pub fn current_reg(&self) -> Reg {
        Reg::from_nibble(self.regs[self.reg_index as usize & 0xF])
    }

    /// Advances past one packed qword.
    pub fn packed_step(&mut self) {
        self.reg_index += 1;
        if self.reg_index >= self.nregs {
            self.reg_index = 0;
            self.nloop = self.nloop.saturating_sub(1);
        }
    }
}

/// Sums the transfer cost of every tag in a complete GIF packet. Stops at the first EOP or when
/// `data` runs out.
pub fn packet_cycles(data: &[u8]) -> u32 {
    let mut offset = 0;
    let mut cycles = 0;
    while let Some(bytes) = data.get(offset..offset + TAG_SIZE) {
        let Ok(bytes) = <&[u8; TAG_SIZE]>::try_from(bytes) else {
            break;
        };

        let tag = Tag::decode(bytes, false);
        cycles += 2 + tag.cycles;
        offset += TAG_SIZE + tag.len as usize;
        if tag.eop() {
            break;
        }
    }

    cycles
}

/// Length in bytes of the GIF packet starting at `data`, including every tag up to and including
/// the one marked EOP. Returns `None` if the packet is not complete in `data`.
pub fn packet_len(data: &[u8]) -> Option<usize> {
    let mut offset = 0;
    loop {
        let bytes = data.get(offset..offset + TAG_SIZE)?;
        let tag = Tag::decode(bytes.try_into().ok()?, false);
        offset += TAG_SIZE + tag.len as usize;
        if offset > data.len() {
            return None;
        }

        if tag.eop() {
            return Some(offset);
        }
    }
}

/// Encodes a tag from its raw fields. `flg` and `nreg` are truncated to their field widths.
pub fn encode(nloop: u16, eop: bool, flg: u8, nreg: u8, regs: u64) -> [u8; TAG_SIZE] {
    let low = u64::from(nloop & 0x7FFF)
        | (u64::from(eop) << 15)
        | (u64::from(flg & 0x3) << 58)
        | (u64::from(nreg & 0xF) << 60);

    let mut bytes = [0; TAG_SIZE];
    bytes[..8].copy_from_slice(&low.to_le_bytes());
    bytes[8..].copy_from_slice(&regs.to_le_bytes());
    bytes
}
