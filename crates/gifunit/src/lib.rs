//! GIF packet reassembly and path arbitration.
//!
//! The GIF receives primitive data from three paths (VU1 `XGKICK`, VIF1 `DIRECT` and the GIF
//! DMA channel), reassembles it into complete GS packets and hands them to a [`PacketSink`]
//! in hardware priority order.
pub mod arbitration;
pub mod buffer;
pub mod mtvu;
pub mod packet;
pub mod path;
pub mod regs;
pub mod sink;
pub mod snapshot;
pub mod tag;
pub mod unit;

pub use buffer::ReadCounter;
pub use mtvu::MtvuPackets;
pub use packet::{FinishedPacket, GsPacket};
pub use path::{PathId, PathState};
pub use sink::{NopPacketSink, PacketSink};
pub use unit::{GifUnit, Transfer};

/// GIF unit configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Capacity of each path buffer, in bytes.
    pub buffer_size: usize,
    /// Trailing slack of each path buffer. Parsing a tag that starts past it realigns the buffer
    /// first.
    pub safe_zone: usize,
    /// Whether packed tags are scanned for A+D writes so SIGNAL, FINISH and LABEL can be
    /// intercepted.
    pub analyze_tags: bool,
    /// Whether path 1 is fed by the vector unit thread.
    pub mtvu: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: 256 * 1024,
            safe_zone: 64 * 1024,
            analyze_tags: true,
            mtvu: false,
        }
    }
}
