//! GS packet descriptors.
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Describes a (possibly partial) GS packet inside a path buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GsPacket {
    /// Offset of the first byte of the packet in the path buffer.
    pub offset: u32,
    /// Size of the packet, tags included.
    pub size: u32,
    /// Accumulated transfer cost, in EE cycles.
    pub cycles: u32,
    /// How many bytes the downstream consumer must release once it is done with this packet.
    pub read_amount: u32,
    /// Whether the packet is complete and ready to be forwarded.
    pub done: bool,
}

const_assert!(size_of::<GsPacket>() <= 24);

impl GsPacket {
    /// An empty packet starting at `offset`.
    pub fn at(offset: u32) -> Self {
        Self {
            offset,
            ..Default::default()
        }
    }

    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// A packet produced by the vector unit worker, together with the data it kicked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishedPacket {
    pub packet: GsPacket,
    pub data: Vec<u8>,
}
