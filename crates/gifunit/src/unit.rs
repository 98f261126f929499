//! The GIF unit: path arbitration and packet forwarding.
use std::sync::Arc;

use bitos::integer::u5;

use crate::Config;
use crate::arbitration::Arbitration;
use crate::mtvu::MtvuPackets;
use crate::packet::GsPacket;
use crate::path::{Path, PathId, PathState};
use crate::regs::{Mode, Status};
use crate::sink::PacketSink;
use crate::tag::QWORD;

/// The kind of an upstream transfer, which determines the path it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// VU1 `XGKICK`, path 1.
    Xgkick,
    /// A packet kicked by the vector unit thread, path 1. Carries no data.
    Mtvu,
    /// VIF1 `DIRECT`, path 2.
    Direct,
    /// VIF1 `DIRECTHL`, path 2. Refused while path 3 is in the middle of an image.
    DirectHl,
    /// GIF DMA, path 3. Refused while path 3 is masked.
    Dma,
    /// GIF FIFO writes, path 3.
    Fifo,
}

impl Transfer {
    pub fn path(self) -> PathId {
        match self {
            Self::Xgkick | Self::Mtvu => PathId::Path1,
            Self::Direct | Self::DirectHl => PathId::Path2,
            Self::Dma | Self::Fifo => PathId::Path3,
        }
    }
}

/// The GIF unit.
pub struct GifUnit {
    config: Config,
    paths: [Path; 3],
    arb: Arbitration,
    sink: Box<dyn PacketSink>,
    mtvu: Option<Arc<MtvuPackets>>,
}

impl GifUnit {
    pub fn new(config: Config, sink: Box<dyn PacketSink>) -> Self {
        let path = |id| Path::new(id, config.buffer_size, config.safe_zone);
        let mtvu = config.mtvu.then(|| Arc::new(MtvuPackets::new()));

        let mut path1 = path(PathId::Path1);
        if let Some(packets) = &mtvu {
            path1 = path1.with_mtvu(packets.clone());
        }

        Self {
            config,
            paths: [path1, path(PathId::Path2), path(PathId::Path3)],
            arb: Arbitration::default(),
            sink,
            mtvu,
        }
    }

    #[inline(always)]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline(always)]
    pub fn path(&self, id: PathId) -> &Path {
        &self.paths[id.index()]
    }

    #[inline(always)]
    pub fn arbitration(&self) -> &Arbitration {
        &self.arb
    }

    /// The queue of packets kicked by the vector unit thread, if path 1 is owned by it.
    pub fn mtvu_packets(&self) -> Option<&Arc<MtvuPackets>> {
        self.mtvu.as_ref()
    }

    pub fn sink(&self) -> &dyn PacketSink {
        self.sink.as_ref()
    }

    pub fn sink_mut(&mut self) -> &mut dyn PacketSink {
        self.sink.as_mut()
    }

    /// `GIF_STAT`.
    pub fn status(&self) -> Status {
        let fqc = (self.paths[PathId::Path3.index()].buffer().remaining() / QWORD).min(16);
        self.arb.status().with_fqc(u5::new(fqc as u8))
    }

    /// Accepts upstream data. Returns how many bytes were accepted, which is less than the
    /// length of `data` (usually zero) when the path cannot take it right now. Callers are
    /// expected to retry later.
    ///
    /// Bytes of `data` trimmed because path 3 got masked are not counted as accepted. Trimmed
    /// bytes from earlier transfers are left for [`GifUnit::take_dma_rewind`].
    pub fn transfer(&mut self, kind: Transfer, data: &[u8]) -> usize {
        let id = kind.path();
        match kind {
            Transfer::Mtvu => {
                let Some(mtvu) = &self.mtvu else {
                    tracing::warn!("vector unit thread transfer without a vector unit thread");
                    return 0;
                };

                mtvu.add_placeholder();
                self.mark_queued(id);
                self.execute();
                return 0;
            }
            Transfer::Xgkick if self.mtvu.is_some() => {
                tracing::warn!("xgkick transfer while path 1 is owned by the vector unit thread");
                return 0;
            }
            _ => (),
        }

        if data.is_empty() {
            tracing::warn!(?kind, "empty transfer");
            return 0;
        }

        if self.arb.stall.is_latched() {
            tracing::debug!(?kind, "transfer refused, stalled");
            return 0;
        }

        if kind == Transfer::Dma && self.arb.masked(PathId::Path3) {
            tracing::debug!("dma transfer refused, path 3 is masked");
            return 0;
        }

        if kind == Transfer::DirectHl
            && self.paths[PathId::Path3.index()].state() == PathState::Image
        {
            tracing::debug!("directhl transfer refused, path 3 is transferring an image");
            return 0;
        }

        self.mark_queued(id);
        let accepted = self.paths[id.index()].append(data, self.sink.as_mut());
        if accepted == 0 {
            return 0;
        }

        let pending = self.paths[id.index()].dma_rewind();
        self.execute();

        // trimming drops the newest bytes first, so at most `accepted` of them came from `data`
        let path = &mut self.paths[id.index()];
        let trimmed = path.dma_rewind() - pending;
        let own = trimmed.min(accepted as u32);
        path.consume_dma_rewind(own);

        accepted - own as usize
    }

    /// Takes the bytes trimmed from path 3 that were already reported as accepted. This happens
    /// when the mask is applied while the unit is halted, or when a transfer completes a packet
    /// whose successor arrived in earlier transfers. The DMA engine has to step back by this
    /// many bytes before its next transfer.
    pub fn take_dma_rewind(&mut self) -> u32 {
        let rewind = self.paths[PathId::Path3.index()].take_dma_rewind();
        if rewind > 0 {
            tracing::debug!(rewind, "dma rewind taken");
        }

        rewind
    }

    fn mark_queued(&mut self, id: PathId) {
        if self.arb.active.is_some_and(|active| active != id) {
            self.arb.queued[id.index()] = true;
        }
    }

    fn should_slice(&self) -> bool {
        self.arb.slicing()
            && !self.arb.stall.is_latched()
            && self.paths[PathId::Path3.index()].state() == PathState::Image
            && (self.paths[PathId::Path1.index()].has_work()
                || self.paths[PathId::Path2.index()].has_work())
    }

    fn forward(&mut self, id: PathId, mut packet: GsPacket) {
        let path = &self.paths[id.index()];
        if path.mtvu().is_some() && packet.is_empty() {
            tracing::trace!("forwarding vector unit thread placeholder");
            self.sink.placeholder(id);
        } else {
            packet.read_amount = packet.size;
            path.reads().add(packet.size);

            tracing::trace!(?id, ?packet, "forwarding packet");
            self.sink.packet(id, &packet, path.data(&packet), path.reads());
        }

        if std::mem::take(&mut self.arb.finish_pending) {
            self.sink.finish();
        }
    }

    /// Picks the next path to activate, in priority order.
    fn select(&mut self) -> Option<PathId> {
        for id in PathId::ALL {
            let path = &mut self.paths[id.index()];
            if !path.has_work() {
                continue;
            }

            if self.arb.masked(id) {
                path.set_state(PathState::Wait);
                continue;
            }

            if path.state() == PathState::Wait {
                path.set_state(PathState::Idle);
            }

            return Some(id);
        }

        None
    }

    /// Runs arbitration until no path can make progress.
    pub fn execute(&mut self) {
        if self.arb.halted() {
            tracing::trace!("arbitration halted");
            return;
        }

        let analyze = self.config.analyze_tags;
        let mut sliced = false;
        loop {
            if let Some(id) = self.arb.active {
                let path = &mut self.paths[id.index()];
                let packet = path.execute(&mut self.arb, self.sink.as_mut(), analyze);

                if packet.done {
                    self.forward(id, packet);
                    self.arb.active = None;
                    self.arb.output_active = false;
                } else if id == PathId::Path3 && !sliced && self.should_slice() {
                    let packet = self.paths[id.index()].slice();
                    if !packet.is_empty() {
                        self.forward(id, packet);
                    }

                    tracing::debug!("path 3 sliced mid-image");
                    self.arb.active = None;
                    self.arb.output_active = false;
                    self.arb.image_slice = true;
                    sliced = true;
                } else {
                    break;
                }
            }

            if self.arb.halted() {
                break;
            }

            let Some(next) = self.select() else {
                self.arb.active = None;
                self.arb.output_active = false;
                break;
            };

            tracing::debug!(path = ?next, "path selected");
            self.arb.active = Some(next);
            self.arb.queued[next.index()] = false;
            self.arb.output_active = true;
            if next == PathId::Path3 {
                self.arb.image_slice = false;
            }
        }

        if let Some(id) = self.arb.active
            && let Some(packet) = self.paths[id.index()].take_flushable()
        {
            self.forward(id, packet);
        }
    }

    /// Latches the stalling marker. Returns false if it was already latched.
    pub fn request_stall(&mut self, data: u32, mask: u32) -> bool {
        self.arb.stall.request(data, mask)
    }

    /// Acknowledges the pending signal. A latched stalling marker becomes the new pending signal
    /// and arbitration resumes.
    pub fn acknowledge_stall(&mut self) {
        self.arb.signal_pending = false;
        if let Some([data, mask]) = self.arb.stall.take() {
            tracing::debug!(data, mask, "replaying stalled signal");
            self.arb.signal_pending = true;
            self.sink.signal(data, mask);
        }

        self.execute();
    }

    /// `GIF_MODE` write.
    pub fn set_mode(&mut self, mode: Mode) {
        self.arb.mode = mode;
        self.execute();
    }

    /// Path 3 mask applied by the VIF (`MSKPATH3`).
    pub fn set_path3_vif_mask(&mut self, masked: bool) {
        self.arb.vif_mask = masked;
        self.execute();
    }

    /// Temporary transfer stop (`GIF_CTRL.PSE`).
    pub fn set_pse(&mut self, paused: bool) {
        self.arb.paused = paused;
        self.execute();
    }

    /// Resets the unit. A soft reset only forgets cached tags and arbitration progress, while a
    /// hard reset also drops all buffered data.
    pub fn reset(&mut self, soft: bool) {
        tracing::debug!(soft, "resetting gif unit");
        if soft {
            for path in &mut self.paths {
                path.soft_reset();
            }

            self.arb = Arbitration {
                mode: self.arb.mode,
                vif_mask: self.arb.vif_mask,
                ..Default::default()
            };
        } else {
            for path in &mut self.paths {
                path.hard_reset();
            }

            self.arb = Arbitration::default();
        }
    }

    pub(crate) fn path_mut(&mut self, id: PathId) -> &mut Path {
        &mut self.paths[id.index()]
    }
}
