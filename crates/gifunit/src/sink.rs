//! Downstream packet consumer interface.
use crate::buffer::ReadCounter;
use crate::packet::GsPacket;
use crate::path::PathId;

/// Receives completed packets from the GIF unit.
///
/// Packet data is lent from the path buffer. The buffer region stays reserved until the sink
/// releases `packet.read_amount` bytes through `reads`, which it may do from any thread.
pub trait PacketSink: Send {
    /// A packet from `path` completed.
    fn packet(&mut self, path: PathId, packet: &GsPacket, data: &[u8], reads: &ReadCounter);

    /// A packet completed on path 1 while it is owned by the vector unit thread. Its data
    /// travelled through the worker packet queue instead.
    fn placeholder(&mut self, path: PathId) {
        _ = path;
    }

    /// `size` bytes at the end of the path buffer were skipped by a realignment.
    fn blank(&mut self, path: PathId, size: u32, reads: &ReadCounter) {
        _ = path;
        reads.release(size);
    }

    /// A SIGNAL register write was intercepted.
    fn signal(&mut self, data: u32, mask: u32) {
        _ = (data, mask);
    }

    /// A packet containing a FINISH register write completed.
    fn finish(&mut self) {}

    /// A LABEL register write was intercepted.
    fn label(&mut self, data: u32, mask: u32) {
        _ = (data, mask);
    }
}

/// A sink that releases every packet immediately.
#[derive(Debug, Default)]
pub struct NopPacketSink;

impl PacketSink for NopPacketSink {
    fn packet(&mut self, _: PathId, packet: &GsPacket, _: &[u8], reads: &ReadCounter) {
        reads.release(packet.read_amount);
    }
}
