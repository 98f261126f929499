//! GIF paths.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::FromRepr;

use crate::arbitration::Arbitration;
use crate::buffer::{PathBuffer, ReadCounter};
use crate::mtvu::MtvuPackets;
use crate::packet::GsPacket;
use crate::sink::PacketSink;
use crate::tag::{AdReg, Flag, QWORD, Reg, TAG_SIZE, Tag};

/// One of the three GIF paths, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromRepr)]
#[derive(Serialize, Deserialize)]
#[repr(u8)]
pub enum PathId {
    /// VU1 `XGKICK`.
    Path1 = 0,
    /// VIF1 `DIRECT`/`DIRECTHL`.
    Path2 = 1,
    /// GIF DMA channel.
    Path3 = 2,
}

impl PathId {
    pub const ALL: [Self; 3] = [Self::Path1, Self::Path2, Self::Path3];

    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathState {
    #[default]
    Idle,
    Packed,
    RegList,
    Image,
    /// Finished a packet while masked. Becomes idle once the mask is lifted.
    Wait,
}

impl From<Flag> for PathState {
    fn from(value: Flag) -> Self {
        match value {
            Flag::Packed => Self::Packed,
            Flag::RegList => Self::RegList,
            Flag::Image | Flag::Image2 => Self::Image,
        }
    }
}

/// A GIF path: its buffer, the tag being parsed and the packet being assembled.
#[derive(Debug)]
pub struct Path {
    id: PathId,
    buffer: PathBuffer,
    reads: ReadCounter,
    tag: Tag,
    packet: GsPacket,
    state: PathState,
    dma_rewind: u32,
    mtvu: Option<Arc<MtvuPackets>>,
}

impl Path {
    pub fn new(id: PathId, size: usize, safe_zone: usize) -> Self {
        Self {
            id,
            buffer: PathBuffer::new(size, safe_zone),
            reads: ReadCounter::new(),
            tag: Tag::default(),
            packet: GsPacket::default(),
            state: PathState::Idle,
            dma_rewind: 0,
            mtvu: None,
        }
    }

    /// Hands this path over to the vector unit thread. Only meaningful for path 1.
    pub(crate) fn with_mtvu(mut self, packets: Arc<MtvuPackets>) -> Self {
        debug_assert_eq!(self.id, PathId::Path1);
        self.mtvu = Some(packets);
        self
    }

    #[inline(always)]
    pub fn id(&self) -> PathId {
        self.id
    }

    #[inline(always)]
    pub fn state(&self) -> PathState {
        self.state
    }

    #[inline(always)]
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    #[inline(always)]
    pub fn packet(&self) -> &GsPacket {
        &self.packet
    }

    #[inline(always)]
    pub fn buffer(&self) -> &PathBuffer {
        &self.buffer
    }

    /// Bytes forwarded downstream and not yet released.
    #[inline(always)]
    pub fn reads(&self) -> &ReadCounter {
        &self.reads
    }

    #[inline(always)]
    pub fn mtvu(&self) -> Option<&Arc<MtvuPackets>> {
        self.mtvu.as_ref()
    }

    /// Whether this path has data (or a placeholder) that was not parsed yet.
    pub fn has_work(&self) -> bool {
        self.buffer.has_data_remaining()
            || self.mtvu.as_ref().is_some_and(|m| m.placeholders() > 0)
    }

    pub(crate) fn set_state(&mut self, state: PathState) {
        self.state = state;
    }

    /// Bytes trimmed from the end of the buffer that upstream still has to present again.
    #[inline(always)]
    pub fn dma_rewind(&self) -> u32 {
        self.dma_rewind
    }

    pub(crate) fn take_dma_rewind(&mut self) -> u32 {
        std::mem::take(&mut self.dma_rewind)
    }

    /// Marks `amount` rewound bytes as reported upstream.
    pub(crate) fn consume_dma_rewind(&mut self, amount: u32) {
        debug_assert!(amount <= self.dma_rewind);
        self.dma_rewind = self.dma_rewind.saturating_sub(amount);
    }

    /// Copies `data` into the buffer, realigning first if it doesn't fit. Returns how many bytes
    /// were accepted, which is either all of them or none.
    pub fn append(&mut self, data: &[u8], sink: &mut dyn PacketSink) -> usize {
        if !self.buffer.fits(data.len()) {
            self.realign(sink, data.len());
        }

        if !self.buffer.push(data) {
            tracing::warn!(
                path = ?self.id,
                len = data.len(),
                remaining = self.buffer.remaining(),
                "path buffer is full, transfer refused"
            );

            return 0;
        }

        data.len()
    }

    /// Moves the in-flight packet and everything after it to the start of the buffer, making
    /// room for `incoming` more bytes after it.
    ///
    /// Downstream releases bytes in the order they were forwarded, so the bytes still being read
    /// are the last `outstanding` ones before the in-flight packet. This blocks until neither the
    /// move nor the `incoming` bytes written after it would overwrite them.
    ///
    /// Downstream then continues from the start of the buffer, skipping everything from the
    /// in-flight packet to the physical end. That whole tail, including the old copy of the
    /// moved bytes, is reported as a blank so forwarded and blank bytes add up to the capacity
    /// on every lap.
    pub fn realign(&mut self, sink: &mut dyn PacketSink, incoming: usize) {
        let offset = self.packet.offset as usize;
        if offset == 0 {
            return;
        }

        let to_move = self.buffer.write_pos() - offset;
        let needed = (to_move + incoming).min(offset);

        tracing::debug!(path = ?self.id, offset, to_move, incoming, "realigning path buffer");
        self.reads
            .wait_until(|outstanding| offset.saturating_sub(outstanding as usize) >= needed);

        let blank = self.buffer.capacity() - offset;
        if blank > 0 {
            self.reads.add(blank as u32);
            sink.blank(self.id, blank as u32, &self.reads);
        }

        self.buffer.shift_to_front(offset);
        self.packet.offset = 0;
    }

    fn write_ad(&mut self, qword: [u8; QWORD], arb: &mut Arbitration, sink: &mut dyn PacketSink) {
        let data = u32::from_le_bytes([qword[0], qword[1], qword[2], qword[3]]);
        let mask = u32::from_le_bytes([qword[4], qword[5], qword[6], qword[7]]);

        match AdReg::from_repr(qword[8]) {
            Some(AdReg::Signal) => {
                if arb.signal_pending {
                    if arb.stall.request(data, mask) {
                        tracing::debug!(path = ?self.id, data, mask, "double signal, stalling");
                    }
                } else {
                    arb.signal_pending = true;
                    sink.signal(data, mask);
                }
            }
            Some(AdReg::Finish) => arb.finish_pending = true,
            Some(AdReg::Label) => sink.label(data, mask),
            None => (),
        }
    }

    fn finish_packet(&mut self, arb: &Arbitration) -> GsPacket {
        let mut done = self.packet;
        done.done = true;

        self.packet = GsPacket::at(self.buffer.parse_pos() as u32);
        self.state = PathState::Idle;

        if self.id == PathId::Path3 && arb.masked(PathId::Path3) {
            let rewind = self.buffer.truncate() as u32;
            tracing::debug!(rewind, "path 3 masked at end of packet");

            self.dma_rewind += rewind;
            self.state = PathState::Wait;
        }

        done
    }

    /// Parses as much buffered data as possible. Returns the packet being assembled, which is
    /// marked done if an EOP tag was completed.
    pub fn execute(
        &mut self,
        arb: &mut Arbitration,
        sink: &mut dyn PacketSink,
        analyze: bool,
    ) -> GsPacket {
        if let Some(mtvu) = &self.mtvu
            && mtvu.take_placeholder()
        {
            return GsPacket {
                done: true,
                ..Default::default()
            };
        }

        loop {
            if !self.tag.valid {
                if arb.stall.is_latched() {
                    break;
                }

                if self.buffer.parse_pos() >= self.buffer.limit() {
                    self.realign(sink, 0);
                }

                let Some(&bytes) = self.buffer.tag() else {
                    break;
                };

                self.tag = Tag::decode(&bytes, analyze);
                self.state = self.tag.flag().into();
                self.buffer.advance(TAG_SIZE);
                self.packet.size += TAG_SIZE as u32;
                self.packet.cycles += 2;

                tracing::trace!(path = ?self.id, tag = ?self.tag, "new tag");
            }

            if self.tag.has_ad {
                while self.tag.nloop > 0 {
                    let Some(&qword) = self.buffer.qword() else {
                        return self.packet;
                    };

                    if self.tag.current_reg() == Reg::AddrData {
                        self.write_ad(qword, arb, sink);
                    }

                    self.buffer.advance(QWORD);
                    self.packet.size += QWORD as u32;
                    self.packet.cycles += (QWORD as u32) << 1;
                    self.tag.packed_step();

                    if arb.stall.is_latched() && self.tag.nloop > 0 {
                        return self.packet;
                    }
                }
            } else {
                let len = self.tag.len as usize;
                if self.buffer.remaining() < len {
                    break;
                }

                self.buffer.advance(len);
                self.packet.size += self.tag.len;
                self.packet.cycles += self.tag.cycles;
                self.tag.nloop = 0;
            }

            self.tag.valid = false;
            if self.tag.eop() {
                return self.finish_packet(arb);
            }
        }

        self.packet
    }

    /// Closes the packet being assembled, forwarding everything parsed before the current image
    /// tag. The image tag is un-parsed so it is decoded again when the path resumes.
    pub(crate) fn slice(&mut self) -> GsPacket {
        let sub = if self.tag.valid { TAG_SIZE } else { 0 };

        let mut sliced = self.packet;
        sliced.size -= sub as u32;
        sliced.cycles = sliced.cycles.saturating_sub(if sub > 0 { 2 } else { 0 });
        sliced.done = true;

        self.buffer.rewind(sub);
        self.tag.valid = false;
        self.state = PathState::Idle;
        self.packet = GsPacket::at(self.buffer.parse_pos() as u32);

        sliced
    }

    /// Takes the packet being assembled so it can be forwarded without an EOP. Only possible
    /// when the current tag is complete and nothing else is buffered.
    pub(crate) fn take_flushable(&mut self) -> Option<GsPacket> {
        if self.packet.is_empty() || self.tag.valid || self.buffer.has_data_remaining() {
            return None;
        }

        let mut packet = self.packet;
        packet.done = true;
        self.packet = GsPacket::at(self.buffer.parse_pos() as u32);

        Some(packet)
    }

    /// The bytes of `packet`.
    pub fn data(&self, packet: &GsPacket) -> &[u8] {
        self.buffer.slice(packet.offset as usize, packet.size as usize)
    }

    /// Invalidates the cached tag and returns to idle, keeping buffered data.
    pub fn soft_reset(&mut self) {
        self.tag = Tag::default();
        self.state = PathState::Idle;
        self.packet = GsPacket::at(self.buffer.parse_pos() as u32);
    }

    /// Drops every buffered byte and all parsing state.
    pub fn hard_reset(&mut self) {
        self.buffer.clear();
        self.reads.reset();
        self.tag = Tag::default();
        self.packet = GsPacket::default();
        self.state = PathState::Idle;
        self.dma_rewind = 0;
        if let Some(mtvu) = &self.mtvu {
            mtvu.clear();
        }
    }

    pub(crate) fn restore(
        &mut self,
        contents: &[u8],
        parse: usize,
        tag: Tag,
        packet: GsPacket,
        state: PathState,
    ) {
        self.buffer.restore(contents, parse);
        self.reads.reset();
        self.tag = tag;
        self.packet = packet;
        self.state = state;
        self.dma_rewind = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sink::NopPacketSink;
    use crate::tag::encode;

    fn path3() -> Path {
        Path::new(PathId::Path3, 1024, 256)
    }

    #[test]
    fn packed_packet_completes() {
        let mut path = path3();
        let mut arb = Arbitration::default();
        let mut sink = NopPacketSink;

        let mut data = encode(1, true, 0, 2, 0x51).to_vec();
        data.extend_from_slice(&[0xAA; 32]);
        assert_eq!(path.append(&data, &mut sink), 48);

        let packet = path.execute(&mut arb, &mut sink, true);
        assert!(packet.done);
        assert_eq!(packet.offset, 0);
        assert_eq!(packet.size, 48);
        assert_eq!(packet.cycles, 2 + 64);
        assert_eq!(path.state(), PathState::Idle);
        assert_eq!(path.packet().offset, 48);
    }

    #[test]
    fn incomplete_tag_stays_cached() {
        let mut path = path3();
        let mut arb = Arbitration::default();
        let mut sink = NopPacketSink;

        let mut data = encode(4, true, 2, 0, 0).to_vec();
        data.extend_from_slice(&[0; 32]);
        path.append(&data, &mut sink);

        let packet = path.execute(&mut arb, &mut sink, true);
        assert!(!packet.done);
        assert!(path.tag().valid);
        assert_eq!(path.state(), PathState::Image);
        assert_eq!(path.buffer().parse_pos(), 16);

        path.append(&[0; 32], &mut sink);
        let packet = path.execute(&mut arb, &mut sink, true);
        assert!(packet.done);
        assert_eq!(packet.size, 80);
    }

    #[test]
    fn double_signal_halts_mid_loop() {
        let mut path = path3();
        let mut arb = Arbitration::default();
        let mut sink = NopPacketSink;

        // three loops of a single A+D register
        let mut data = encode(3, true, 0, 1, 0xE).to_vec();
        for data_word in [1u32, 2, 3] {
            let mut qword = [0; 16];
            qword[..4].copy_from_slice(&data_word.to_le_bytes());
            qword[8] = AdReg::Signal as u8;
            data.extend_from_slice(&qword);
        }

        path.append(&data, &mut sink);
        let packet = path.execute(&mut arb, &mut sink, true);

        assert!(!packet.done);
        assert!(arb.signal_pending);
        assert!(arb.stall.is_latched());
        assert_eq!(arb.stall.data(), [2, 0]);
        assert_eq!(path.tag().nloop, 1);
        assert_eq!(path.buffer().parse_pos(), 48);
    }

    #[test]
    fn without_analysis_ad_is_not_intercepted() {
        let mut path = path3();
        let mut arb = Arbitration::default();
        let mut sink = NopPacketSink;

        let mut data = encode(1, true, 0, 1, 0xE).to_vec();
        let mut qword = [0; 16];
        qword[8] = AdReg::Signal as u8;
        data.extend_from_slice(&qword);

        path.append(&data, &mut sink);
        assert!(path.execute(&mut arb, &mut sink, false).done);
        assert!(!arb.signal_pending);
    }

    #[test]
    fn masked_path3_rewinds_next_packet() {
        let mut path = path3();
        let mut arb = Arbitration {
            vif_mask: true,
            ..Default::default()
        };
        let mut sink = NopPacketSink;

        let mut data = encode(1, true, 2, 0, 0).to_vec();
        data.extend_from_slice(&[0; 16]);
        data.extend_from_slice(&encode(1, true, 2, 0, 0));
        path.append(&data, &mut sink);

        let packet = path.execute(&mut arb, &mut sink, true);
        assert!(packet.done);
        assert_eq!(path.state(), PathState::Wait);
        assert_eq!(path.take_dma_rewind(), 16);
        assert!(!path.has_work());
    }

    #[test]
    fn realign_moves_in_flight_packet() {
        let mut path = Path::new(PathId::Path2, 128, 32);
        let mut arb = Arbitration::default();
        let mut sink = NopPacketSink;

        // a complete 64 byte packet followed by the first half of another one
        let mut data = encode(3, true, 2, 0, 0).to_vec();
        data.extend_from_slice(&[0; 48]);
        data.extend_from_slice(&encode(3, true, 2, 0, 0));
        data.extend_from_slice(&[7; 16]);
        path.append(&data, &mut sink);

        assert!(path.execute(&mut arb, &mut sink, true).done);
        assert!(!path.execute(&mut arb, &mut sink, true).done);

        // 96 bytes are written, so 64 more only fit after a realignment
        assert_eq!(path.append(&[7; 64], &mut sink), 64);
        assert_eq!(path.buffer().write_pos(), 96);
        assert_eq!(path.packet().offset, 0);
        assert_eq!(path.buffer().parse_pos(), 16);

        let packet = path.execute(&mut arb, &mut sink, true);
        assert!(packet.done);
        assert_eq!(packet.size, 64);
        assert_eq!(&path.data(&packet)[16..], &[7; 48]);
    }

    #[test]
    fn realign_waits_for_downstream_reads() {
        let mut path = Path::new(PathId::Path2, 128, 32);
        let mut arb = Arbitration::default();
        let mut sink = NopPacketSink;

        let mut data = encode(3, true, 2, 0, 0).to_vec();
        data.extend_from_slice(&[0; 48]);
        data.extend_from_slice(&encode(2, true, 2, 0, 0));
        path.append(&data, &mut sink);

        let packet = path.execute(&mut arb, &mut sink, true);
        assert!(packet.done);

        // the first packet is still being read downstream
        path.reads().add(packet.size);
        let reads = path.reads().clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            reads.release(64);
        });

        assert_eq!(path.append(&[0; 64], &mut sink), 64);
        assert_eq!(path.reads().outstanding(), 0);
        assert_eq!(path.packet().offset, 0);
        handle.join().unwrap();
    }

    #[test]
    fn realign_protects_bytes_under_appended_data() {
        let mut path = Path::new(PathId::Path2, 128, 32);
        let mut arb = Arbitration::default();
        let mut sink = NopPacketSink;

        // packet a fills [0, 64), only the tag of packet b follows
        let mut data = encode(3, true, 2, 0, 0).to_vec();
        data.extend_from_slice(&[0xAA; 48]);
        data.extend_from_slice(&encode(3, true, 2, 0, 0));
        path.append(&data, &mut sink);

        let a = path.execute(&mut arb, &mut sink, true);
        assert!(a.done);
        assert!(!path.execute(&mut arb, &mut sink, true).done);
        assert_eq!(path.packet().offset, 64);

        // [16, 64) of packet a is still being read. moving b's tag alone would be safe, but
        // the appended bytes land on top of the unread part.
        path.reads().add(a.size);
        path.reads().release(16);

        let reads = path.reads().clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            reads.release(48);
        });

        assert_eq!(path.append(&[0x55; 64], &mut sink), 64);
        assert_eq!(path.reads().outstanding(), 0);
        handle.join().unwrap();

        let b = path.execute(&mut arb, &mut sink, true);
        assert!(b.done);
        assert_eq!(b.size, 64);
        assert_eq!(&path.data(&b)[16..], &[0x55; 48]);
    }
}
