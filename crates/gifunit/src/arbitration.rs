//! Arbitration state shared by the three paths.
use crate::path::PathId;
use crate::regs::{ActivePath, Mode, Status};

/// A latched request to stop packet processing, carrying the two data words of the write that
/// caused it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StallMarker {
    latched: bool,
    data: [u32; 2],
}

impl StallMarker {
    #[inline(always)]
    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Latches the marker. Requests made while it is already latched are ignored.
    pub fn request(&mut self, data: u32, mask: u32) -> bool {
        if self.latched {
            return false;
        }

        self.latched = true;
        self.data = [data, mask];
        true
    }

    /// Clears the marker, returning its data if it was latched.
    pub fn take(&mut self) -> Option<[u32; 2]> {
        let marker = std::mem::take(self);
        marker.latched.then_some(marker.data)
    }

    pub fn data(&self) -> [u32; 2] {
        self.data
    }
}

/// Arbitration state. Owned by the [`GifUnit`](crate::GifUnit) and lent to the path being
/// parsed.
#[derive(Debug, Clone, Default)]
pub struct Arbitration {
    /// The path currently driving the output.
    pub active: Option<PathId>,
    pub stall: StallMarker,
    /// Paths that received data while another path was active.
    pub queued: [bool; 3],
    /// Output path active (`OPH`).
    pub output_active: bool,
    /// Path 3 was sliced mid-image (`IP3`).
    pub image_slice: bool,
    pub mode: Mode,
    /// Path 3 masked by the VIF (`M3P`).
    pub vif_mask: bool,
    /// Temporary transfer stop (`PSE`).
    pub paused: bool,
    /// A SIGNAL write was seen and not yet acknowledged.
    pub signal_pending: bool,
    /// A FINISH write was seen and the sink has not been notified yet.
    pub finish_pending: bool,
}

impl Arbitration {
    /// Whether `id` may not be selected because of a mask. Only path 3 can be masked.
    #[inline(always)]
    pub fn masked(&self, id: PathId) -> bool {
        id == PathId::Path3 && (self.mode.m3r() || self.vif_mask)
    }

    #[inline(always)]
    pub fn slicing(&self) -> bool {
        self.mode.imt()
    }

    #[inline(always)]
    pub fn is_active(&self, id: PathId) -> bool {
        self.active == Some(id)
    }

    /// Whether arbitration can make progress at all.
    #[inline(always)]
    pub fn halted(&self) -> bool {
        self.paused || self.stall.is_latched()
    }

    pub fn status(&self) -> Status {
        let apath = match self.active {
            None => ActivePath::Idle,
            Some(PathId::Path1) => ActivePath::Path1,
            Some(PathId::Path2) => ActivePath::Path2,
            Some(PathId::Path3) => ActivePath::Path3,
        };

        Status::from_bits(0)
            .with_m3r(self.mode.m3r())
            .with_m3p(self.vif_mask)
            .with_imt(self.mode.imt())
            .with_pse(self.paused)
            .with_ip3(self.image_slice)
            .with_p1q(self.queued[0])
            .with_p2q(self.queued[1])
            .with_p3q(self.queued[2])
            .with_oph(self.output_active)
            .with_apath(apath)
    }
}
