//! GIF registers.
use bitos::bitos;
use bitos::integer::u5;

/// The path currently driving the GIF output, as reported by `GIF_STAT.APATH`.
#[bitos(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivePath {
    #[default]
    Idle  = 0b00,
    Path1 = 0b01,
    Path2 = 0b10,
    Path3 = 0b11,
}

/// `GIF_STAT`
#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    /// Path 3 masked by `GIF_MODE`.
    #[bits(0)]
    pub m3r: bool,
    /// Path 3 masked by the VIF.
    #[bits(1)]
    pub m3p: bool,
    /// Intermittent (image slicing) mode.
    #[bits(2)]
    pub imt: bool,
    /// Temporary transfer stop.
    #[bits(3)]
    pub pse: bool,
    /// Path 3 was interrupted mid-image.
    #[bits(5)]
    pub ip3: bool,
    #[bits(6)]
    pub p3q: bool,
    #[bits(7)]
    pub p2q: bool,
    #[bits(8)]
    pub p1q: bool,
    /// Output path active.
    #[bits(9)]
    pub oph: bool,
    #[bits(10..12)]
    pub apath: ActivePath,
    /// Transfer direction. Always host to GS here.
    #[bits(12)]
    pub dir: bool,
    /// FIFO quadword count.
    #[bits(24..29)]
    pub fqc: u5,
}

/// `GIF_MODE`
#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode {
    /// Mask path 3.
    #[bits(0)]
    pub m3r: bool,
    /// Intermittent (image slicing) mode.
    #[bits(2)]
    pub imt: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_layout() {
        let status = Status::from_bits(0)
            .with_imt(true)
            .with_p1q(true)
            .with_apath(ActivePath::Path3);

        assert_eq!(status.to_bits(), (1 << 2) | (1 << 8) | (0b11 << 10));
    }

    #[test]
    fn mode_layout() {
        let mode = Mode::from_bits(0b101);
        assert!(mode.m3r());
        assert!(mode.imt());
    }
}
