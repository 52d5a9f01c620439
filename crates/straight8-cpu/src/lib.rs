//! Cycle-faithful PDP-8 CPU simulator core.
//!
//! This crate implements the PDP-8 family instruction interpreter: the
//! FETCH/DEFER/EXECUTE major-state machine, memory-reference, I/O
//! transfer, and operate instructions, the memory-extension control
//! (fields, CDF/CIF and friends), the time-share (user mode) hardware
//! with TSC8-75 trapping, and the Extended Arithmetic Element in both
//! of its operating modes. It supports:
//!
//! - 4K to 32K words of twelve-bit memory in eight fields
//! - Auto-increment locations 0010-0017 of every field
//! - The three-flag interrupt delay model (ION delay, CIF delay, user flag)
//! - Pluggable I/O device handlers behind a 64-entry dispatch table
//! - Idle and infinite-loop detection on the classic OS wait patterns
//! - An optional instruction history ring for post-mortem inspection
//!
//! # Architecture
//!
//! [`Cpu`] owns the architectural register file, the [`Memory`] array,
//! and the [`Interrupts`] controller. External devices implement the
//! [`IotDevice`] trait and are collected in a [`DeviceSet`]; the event
//! queue and wall-clock idling are abstracted behind [`EventContext`].
//! [`Cpu::run`] executes until a stop condition and returns a
//! [`StopReason`].
//!
//! # Example
//!
//! ```no_run
//! use straight8_cpu::{Cpu, DeviceSet, NoEvents};
//!
//! let mut cpu = Cpu::new();
//! // TAD 0202 / HLT, with the addend in 0202.
//! cpu.memory_mut().load(0o0200, &[0o1202, 0o7402]).unwrap();
//! cpu.memory_mut().deposit(0o0202, 0o0003).unwrap();
//! cpu.set_boot_pc(0o0200);
//!
//! let mut devices = DeviceSet::new();
//! let reason = cpu.run(&mut devices, &mut NoEvents).unwrap();
//! println!("stopped: {reason}, AC = {:04o}", cpu.ac());
//! ```

#![warn(missing_docs)]

mod breakpoint;
mod cpu;
mod device;
mod eae;
mod history;
mod interrupt;
mod memory;
mod registers;
mod state;

pub use breakpoint::Breakpoints;
pub use cpu::{Cpu, EventContext, NoEvents, StopHandle, PCQ_SIZE};
pub use device::{DeviceSet, IotDevice, IotResult, DEV_MAX};
pub use history::{HistEntry, History, HIST_MAX, HIST_MIN};
pub use interrupt::{IntReq, Interrupts};
pub use memory::{is_auto_index, Memory, ADDR_MASK, FIELD_WORDS, MAX_WORDS};
pub use registers::RegisterDesc;
pub use state::MajorState;

/// Mask for a twelve-bit machine word.
pub const WORD_MASK: u16 = 0o7777;

/// Link bit position within the combined L'AC register.
pub const LINK: u32 = 0o10000;

/// Mask for the combined thirteen-bit L'AC register.
pub const LAC_MASK: u32 = 0o17777;

/// Mask for the field bits of an extended address.
pub const FIELD_MASK: u32 = 0o70000;

/// Configuration-surface error types.
///
/// The instruction interpreter itself never returns these; stop
/// conditions inside [`Cpu::run`] surface as [`StopReason`] values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CpuError {
    /// Two device handlers claim the same device code, or a handler
    /// claims a CPU-internal code.
    #[error("device number conflict at {0:02o}")]
    DeviceConflict(u8),

    /// Memory size is not a 4K multiple between 4K and 32K.
    #[error("invalid memory size: {0} words")]
    InvalidMemorySize(usize),

    /// Shrinking memory would discard non-zero content.
    #[error("memory truncation would discard non-zero content")]
    TruncationRefused,

    /// History length outside 64..=65536 (or zero to disable).
    #[error("invalid history length: {0}")]
    InvalidHistoryLength(usize),

    /// History was requested but no ring is configured.
    #[error("instruction history is disabled")]
    HistoryDisabled,

    /// Address at or beyond the configured memory size.
    #[error("non-existent memory address {0:05o}")]
    NonExistentMemory(u32),

    /// No register with the given name.
    #[error("unknown register {0}")]
    UnknownRegister(String),

    /// The register is a derived, read-only view.
    #[error("register {0} is read-only")]
    ReadOnlyRegister(&'static str),

    /// The value is out of range for the register.
    #[error("invalid value for register {0}")]
    InvalidRegisterValue(&'static str),
}

/// Result alias for configuration operations.
pub type Result<T> = std::result::Result<T, CpuError>;

/// Why the interpreter stopped.
///
/// Every variant maps to a distinct, stable numeric code via
/// [`code`](Self::code) so a control shell can report exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An instruction reserved or unimplemented on this configuration,
    /// with stop-on-illegal enabled.
    IllegalInstruction,
    /// HLT instruction.
    Halt,
    /// Execute-address breakpoint hit at fetch.
    Breakpoint,
    /// Instruction-match breakpoint hit after IR load.
    InstructionBreakpoint,
    /// JMP-to-self with interrupts off.
    InfiniteLoop,
    /// Asynchronous stop requested by the control shell.
    Control,
    /// A device handler or the event queue requested a stop with the
    /// given non-zero code.
    Io(u8),
}

impl StopReason {
    /// Stable numeric code for this stop reason. I/O-originated stops
    /// occupy 0o100 upward.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::IllegalInstruction => 1,
            Self::Halt => 2,
            Self::Breakpoint => 3,
            Self::InstructionBreakpoint => 4,
            Self::InfiniteLoop => 5,
            Self::Control => 6,
            Self::Io(code) => 0o100 + u32::from(*code),
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IllegalInstruction => write!(f, "illegal instruction"),
            Self::Halt => write!(f, "HALT instruction"),
            Self::Breakpoint => write!(f, "breakpoint"),
            Self::InstructionBreakpoint => write!(f, "instruction breakpoint"),
            Self::InfiniteLoop => write!(f, "infinite loop"),
            Self::Control => write!(f, "simulation stopped"),
            Self::Io(code) => write!(f, "I/O stop, code {code}"),
        }
    }
}
