//! Interrupt request register and controller.
//!
//! The interrupt system keeps three parallel words with shared bit
//! positions:
//!
//! - `req` — interrupt requests, plus the ION master flag and the two
//!   not-pending delay bits,
//! - `done` — per-device done flags,
//! - `enable` — per-device interrupt enables.
//!
//! ```text
//! 28  27  26  25 24  23  22 │ 21 ........... 14 │ 13 ............ 0
//! ION CIF ION FPP TSC UF PWR│  direct requests  │ done-gated devices
//!     not-pending delays    │ (req only)        │ (done & enable)
//! ```
//!
//! The delay bits are stored in *not-pending* sense: a set bit means no
//! delay is in effect. That polarity makes interrupt admission a single
//! ordered comparison: a request is admitted exactly when ION and both
//! not-pending bits are set and at least one request bit below them is
//! set, i.e. when the packed word compares greater than the three
//! control bits alone.

use bitflags::bitflags;

bitflags! {
    /// Packed interrupt word. One type serves the request, done, and
    /// enable registers, which share device bit positions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IntReq: u32 {
        /// Line printer done.
        const LPT = 1 << 0;
        /// Paper-tape punch done.
        const PTP = 1 << 1;
        /// Paper-tape reader done.
        const PTR = 1 << 2;
        /// Console teleprinter done.
        const TTO = 1 << 3;
        /// Console keyboard done.
        const TTI = 1 << 4;
        /// Line clock tick.
        const CLK = 1 << 5;
        /// Additional teleprinter 1 done.
        const TTO1 = 1 << 6;
        /// Additional teleprinter 2 done.
        const TTO2 = 1 << 7;
        /// Additional teleprinter 3 done.
        const TTO3 = 1 << 8;
        /// Additional teleprinter 4 done.
        const TTO4 = 1 << 9;
        /// Additional keyboard 1 done.
        const TTI1 = 1 << 10;
        /// Additional keyboard 2 done.
        const TTI2 = 1 << 11;
        /// Additional keyboard 3 done.
        const TTI3 = 1 << 12;
        /// Additional keyboard 4 done.
        const TTI4 = 1 << 13;
        /// Floppy disk request (direct, no enable gate).
        const RX = 1 << 14;
        /// Cartridge disk request.
        const RK = 1 << 15;
        /// Fixed-head disk request.
        const RF = 1 << 16;
        /// Fixed-head disk (second controller) request.
        const DF32 = 1 << 17;
        /// Magnetic tape request.
        const MT = 1 << 18;
        /// DECtape request.
        const DTA = 1 << 19;
        /// Cartridge disk (second family) request.
        const RL = 1 << 20;
        /// Cassette tape request.
        const CT = 1 << 21;
        /// Power-fail interrupt.
        const PWR = 1 << 22;
        /// User-mode violation interrupt.
        const UF = 1 << 23;
        /// Time-share control trap interrupt.
        const TSC = 1 << 24;
        /// Floating-point processor request.
        const FPP = 1 << 25;
        /// ION delay has expired (set = no delay pending).
        const NO_ION_PENDING = 1 << 26;
        /// No field-change transfer is pending (set = no delay).
        const NO_CIF_PENDING = 1 << 27;
        /// Interrupt system on.
        const ION = 1 << 28;
    }
}

impl IntReq {
    /// Devices whose requests are gated through done & enable.
    pub const DEV_ENABLE: Self = Self::from_bits_truncate((1 << 14) - 1);

    /// Every request bit (everything below the delay/ION control bits).
    pub const ALL: Self = Self::from_bits_truncate((1 << 26) - 1);

    /// The three control bits that gate admission.
    pub const PENDING: Self = Self::ION
        .union(Self::NO_CIF_PENDING)
        .union(Self::NO_ION_PENDING);

    /// Enables asserted at power-on: the console and paper-tape group.
    pub const INIT_ENABLE: Self = Self::TTI
        .union(Self::TTO)
        .union(Self::PTR)
        .union(Self::PTP)
        .union(Self::LPT)
        .union(Self::TTI1)
        .union(Self::TTI2)
        .union(Self::TTI3)
        .union(Self::TTI4)
        .union(Self::TTO1)
        .union(Self::TTO2)
        .union(Self::TTO3)
        .union(Self::TTO4);
}

/// The interrupt controller.
///
/// Device handlers set and clear done bits (or direct request bits);
/// [`update_requests`](Self::update_requests) folds `done & enable` into
/// the request word. The interpreter owns the ION and delay bits.
#[derive(Debug, Clone)]
pub struct Interrupts {
    /// Interrupt requests plus ION and the delay bits.
    pub(crate) req: IntReq,
    /// Per-device done flags.
    pub(crate) done: IntReq,
    /// Per-device interrupt enables.
    pub(crate) enable: IntReq,
}

impl Interrupts {
    /// Creates the controller in its power-on state: interrupts off,
    /// no field change pending, console group enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            req: IntReq::NO_CIF_PENDING,
            done: IntReq::empty(),
            enable: IntReq::INIT_ENABLE,
        }
    }

    /// Current request word (including ION and delay bits).
    #[must_use]
    pub fn requests(&self) -> IntReq {
        self.req
    }

    /// Current done word.
    #[must_use]
    pub fn done(&self) -> IntReq {
        self.done
    }

    /// Current enable word.
    #[must_use]
    pub fn enabled(&self) -> IntReq {
        self.enable
    }

    /// True when the interrupt system is on.
    #[must_use]
    pub fn ion(&self) -> bool {
        self.req.contains(IntReq::ION)
    }

    /// True when any request bit is asserted.
    #[must_use]
    pub fn any_request(&self) -> bool {
        self.req.intersects(IntReq::ALL)
    }

    /// Interrupt admission test.
    ///
    /// Admitted exactly when ION and both not-pending bits are set and
    /// at least one request bit is asserted; with ION as the top bit
    /// this is a single ordered comparison against the control bits.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> bool {
        self.req.bits() > IntReq::PENDING.bits()
    }

    /// Recomputes the done-gated request bits from `done & enable`.
    ///
    /// Direct request bits and the control bits are preserved.
    pub fn update_requests(&mut self) {
        self.req = (self.req - IntReq::DEV_ENABLE) | (self.done & self.enable);
    }

    /// Sets a device done flag and refreshes the request word.
    pub fn set_done(&mut self, dev: IntReq) {
        self.done |= dev;
        self.update_requests();
    }

    /// Clears a device done flag and refreshes the request word.
    pub fn clear_done(&mut self, dev: IntReq) {
        self.done -= dev;
        self.update_requests();
    }

    /// Sets a device interrupt enable and refreshes the request word.
    pub fn set_enable(&mut self, dev: IntReq) {
        self.enable |= dev;
        self.update_requests();
    }

    /// Clears a device interrupt enable and refreshes the request word.
    pub fn clear_enable(&mut self, dev: IntReq) {
        self.enable -= dev;
        self.update_requests();
    }

    /// Asserts a direct (non-gated) interrupt request.
    pub fn request(&mut self, dev: IntReq) {
        self.req |= dev & IntReq::ALL;
    }

    /// Withdraws a direct interrupt request.
    pub fn clear_request(&mut self, dev: IntReq) {
        self.req -= dev & IntReq::ALL;
    }
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}
