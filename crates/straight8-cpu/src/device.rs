//! External I/O device dispatch.
//!
//! Opcode 6 instructions carry a six-bit device number. The numbers the
//! CPU decodes itself (CPU control, power fail, memory extension) are
//! reserved; every other number dispatches through a flat 64-entry table
//! built from the attached device handlers each time simulation starts.
//! Two handlers claiming the same number is a fatal configuration error.

use crate::interrupt::Interrupts;
use crate::CpuError;

/// Number of distinct device codes.
pub const DEV_MAX: usize = 64;

/// Device codes decoded inside the CPU and unavailable to handlers:
/// CPU control (00), power fail (10), memory extension (20-27).
const RESERVED: [u8; 10] = [
    0o00, 0o10, 0o20, 0o21, 0o22, 0o23, 0o24, 0o25, 0o26, 0o27,
];

/// Outcome of one I/O transfer as seen by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IotResult {
    /// New accumulator value (12 bits; the link is never touched).
    pub ac: u16,
    /// Skip the next instruction.
    pub skip: bool,
    /// Non-zero requests an interpreter stop with this code.
    pub stop: u8,
}

impl IotResult {
    /// A transfer that returns `ac` with no skip and no stop.
    #[must_use]
    pub fn ac(ac: u16) -> Self {
        Self {
            ac,
            skip: false,
            stop: 0,
        }
    }

    /// Marks the result as skipping the next instruction.
    #[must_use]
    pub fn with_skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Marks the result as stopping the interpreter with `code`.
    #[must_use]
    pub fn with_stop(mut self, code: u8) -> Self {
        self.stop = code;
        self
    }
}

/// An I/O device handler.
///
/// Handlers run synchronously inside the I/O instruction and may mutate
/// interrupt done/request bits freely; the change is observed at the
/// next instruction boundary.
pub trait IotDevice {
    /// Device codes this handler claims. Codes must be below
    /// [`DEV_MAX`] and outside the reserved set.
    fn device_codes(&self) -> &[u8];

    /// Executes one I/O transfer. `ir` is the raw instruction word and
    /// `ac` the current accumulator.
    fn iot(&mut self, ir: u16, ac: u16, ints: &mut Interrupts) -> IotResult;

    /// Resets the device (CAF, or a simulator-wide reset).
    fn reset(&mut self, ints: &mut Interrupts) {
        let _ = ints;
    }
}

/// The set of attached devices plus the dispatch table over them.
pub struct DeviceSet {
    devices: Vec<Box<dyn IotDevice>>,
    table: [Option<u8>; DEV_MAX],
}

impl Default for DeviceSet {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSet {
    /// Creates an empty device set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            table: [None; DEV_MAX],
        }
    }

    /// Attaches a device handler. The dispatch table is rebuilt at the
    /// next simulation start, where conflicts are reported.
    pub fn attach(&mut self, device: Box<dyn IotDevice>) {
        self.devices.push(device);
    }

    /// Number of attached handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True if no handlers are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Rebuilds the dispatch table from the attached handlers.
    ///
    /// # Errors
    ///
    /// [`CpuError::DeviceConflict`] if a handler claims a reserved code
    /// or a code already taken by another handler.
    pub(crate) fn build_table(&mut self) -> Result<(), CpuError> {
        self.table = [None; DEV_MAX];
        for (index, device) in self.devices.iter().enumerate() {
            for &code in device.device_codes() {
                if usize::from(code) >= DEV_MAX || RESERVED.contains(&code) {
                    log::warn!("device claims reserved or invalid code {code:02o}");
                    return Err(CpuError::DeviceConflict(code));
                }
                if self.table[usize::from(code)].is_some() {
                    log::warn!("device number conflict at {code:02o}");
                    return Err(CpuError::DeviceConflict(code));
                }
                self.table[usize::from(code)] = Some(index as u8);
            }
        }
        Ok(())
    }

    /// Dispatches an I/O transfer to the handler for `code`, if any.
    pub(crate) fn dispatch(
        &mut self,
        code: u8,
        ir: u16,
        ac: u16,
        ints: &mut Interrupts,
    ) -> Option<IotResult> {
        let index = self.table[usize::from(code) & (DEV_MAX - 1)]?;
        Some(self.devices[usize::from(index)].iot(ir, ac, ints))
    }

    /// Resets every attached device.
    pub(crate) fn reset_all(&mut self, ints: &mut Interrupts) {
        for device in &mut self.devices {
            device.reset(ints);
        }
    }
}
