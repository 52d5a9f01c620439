//! Register descriptor table.
//!
//! Name-addressable views of the architectural state so a control
//! shell can examine, deposit, and save/restore registers without
//! knowing the CPU's layout. Derived views (the combined interrupt
//! word, the done and enable words) are read-only.

use crate::interrupt::IntReq;
use crate::state::MajorState;
use crate::{Cpu, CpuError, Result, FIELD_MASK, LINK, WORD_MASK};

/// Description of one shell-visible register.
#[derive(Debug, Clone, Copy)]
pub struct RegisterDesc {
    /// Register name, as used by `register`/`set_register`.
    pub name: &'static str,
    /// Significant bits.
    pub width: u8,
    /// True for derived views that cannot be deposited.
    pub read_only: bool,
    /// One-line description.
    pub description: &'static str,
}

/// The shell-visible register set, in display order.
pub const REGISTERS: &[RegisterDesc] = &[
    reg("PC", 15, false, "program counter (with field)"),
    reg("MA", 12, false, "memory address"),
    reg("STATE", 2, false, "next major state (1=fetch 2=defer 3=execute)"),
    reg("AC", 12, false, "accumulator"),
    reg("L", 1, false, "link"),
    reg("MQ", 12, false, "multiplier-quotient"),
    reg("SR", 12, false, "front panel switches"),
    reg("IF", 3, false, "instruction field"),
    reg("DF", 3, false, "data field"),
    reg("IB", 3, false, "instruction field buffer"),
    reg("SF", 7, false, "save field"),
    reg("UB", 1, false, "user mode buffer"),
    reg("UF", 1, false, "user mode flag"),
    reg("SC", 5, false, "EAE shift counter"),
    reg("GTF", 1, false, "EAE greater than flag"),
    reg("EMODE", 1, false, "EAE mode (0 = A, 1 = B)"),
    reg("ION", 1, false, "interrupt enable"),
    reg("ION_DELAY", 1, false, "no ION delay pending"),
    reg("CIF_DELAY", 1, false, "no CIF delay pending"),
    reg("PWR_INT", 1, false, "power fail interrupt"),
    reg("UF_INT", 1, false, "user mode violation interrupt"),
    reg("INT", 29, true, "interrupt pending flags"),
    reg("DONE", 26, true, "device done flags"),
    reg("ENABLE", 26, true, "device interrupt enable flags"),
    reg("STOP_INST", 1, false, "stop on undefined instruction"),
];

const fn reg(
    name: &'static str,
    width: u8,
    read_only: bool,
    description: &'static str,
) -> RegisterDesc {
    RegisterDesc {
        name,
        width,
        read_only,
        description,
    }
}

impl Cpu {
    /// The register descriptor table, in display order.
    #[must_use]
    pub fn register_descriptors() -> &'static [RegisterDesc] {
        REGISTERS
    }

    /// Reads a register by name.
    ///
    /// # Errors
    ///
    /// [`CpuError::UnknownRegister`] for an unrecognized name.
    pub fn register(&self, name: &str) -> Result<u32> {
        Ok(match name {
            "PC" => self.if_reg | u32::from(self.pc),
            "MA" => self.ma & u32::from(WORD_MASK),
            "STATE" => match self.major_state {
                MajorState::Fetch => 1,
                MajorState::Defer => 2,
                MajorState::Execute => 3,
            },
            "AC" => self.lac & u32::from(WORD_MASK),
            "L" => (self.lac & LINK) >> 12,
            "MQ" => u32::from(self.mq),
            "SR" => u32::from(self.sr),
            "IF" => self.if_reg >> 12,
            "DF" => self.df >> 12,
            "IB" => self.ib >> 12,
            "SF" => u32::from(self.sf),
            "UB" => u32::from(self.ub),
            "UF" => u32::from(self.uf),
            "SC" => u32::from(self.sc),
            "GTF" => u32::from(self.gtf),
            "EMODE" => u32::from(self.emode),
            "ION" => u32::from(self.ints.ion()),
            "ION_DELAY" => u32::from(self.ints.requests().contains(IntReq::NO_ION_PENDING)),
            "CIF_DELAY" => u32::from(self.ints.requests().contains(IntReq::NO_CIF_PENDING)),
            "PWR_INT" => u32::from(self.ints.requests().contains(IntReq::PWR)),
            "UF_INT" => u32::from(self.ints.requests().contains(IntReq::UF)),
            "INT" => self.ints.requests().bits(),
            "DONE" => self.ints.done().bits(),
            "ENABLE" => self.ints.enabled().bits(),
            "STOP_INST" => u32::from(self.stop_on_illegal()),
            _ => return Err(CpuError::UnknownRegister(name.to_string())),
        })
    }

    /// Writes a register by name.
    ///
    /// # Errors
    ///
    /// [`CpuError::UnknownRegister`] for an unrecognized name,
    /// [`CpuError::ReadOnlyRegister`] for derived views, and
    /// [`CpuError::InvalidRegisterValue`] when the value does not fit.
    pub fn set_register(&mut self, name: &str, value: u32) -> Result<()> {
        match name {
            "PC" => {
                self.pc = (value & u32::from(WORD_MASK)) as u16;
                self.if_reg = value & FIELD_MASK;
            }
            "MA" => self.ma = value & u32::from(WORD_MASK),
            "STATE" => self.set_major_state_raw(value)?,
            "AC" => self.lac = (self.lac & LINK) | (value & u32::from(WORD_MASK)),
            "L" => self.lac = (self.lac & u32::from(WORD_MASK)) | ((value & 1) << 12),
            "MQ" => self.mq = (value & u32::from(WORD_MASK)) as u16,
            "SR" => self.sr = (value & u32::from(WORD_MASK)) as u16,
            "IF" => self.if_reg = (value & 0o7) << 12,
            "DF" => self.df = (value & 0o7) << 12,
            "IB" => self.ib = (value & 0o7) << 12,
            "SF" => self.sf = (value & 0o177) as u16,
            "UB" => self.ub = value & 1 != 0,
            "UF" => self.uf = value & 1 != 0,
            "SC" => self.sc = (value & 0o37) as u16,
            "GTF" => self.gtf = value & 1 != 0,
            "EMODE" => self.emode = value & 1 != 0,
            "ION" => self.set_req_bit(IntReq::ION, value),
            "ION_DELAY" => self.set_req_bit(IntReq::NO_ION_PENDING, value),
            "CIF_DELAY" => self.set_req_bit(IntReq::NO_CIF_PENDING, value),
            "PWR_INT" => self.set_req_bit(IntReq::PWR, value),
            "UF_INT" => self.set_req_bit(IntReq::UF, value),
            "INT" => return Err(CpuError::ReadOnlyRegister("INT")),
            "DONE" => return Err(CpuError::ReadOnlyRegister("DONE")),
            "ENABLE" => return Err(CpuError::ReadOnlyRegister("ENABLE")),
            "STOP_INST" => self.set_stop_on_illegal(value & 1 != 0),
            _ => return Err(CpuError::UnknownRegister(name.to_string())),
        }
        Ok(())
    }

    /// Snapshot of every register, in display order.
    #[must_use]
    pub fn registers(&self) -> Vec<(&'static str, u32)> {
        REGISTERS
            .iter()
            .map(|desc| {
                let value = self
                    .register(desc.name)
                    .expect("descriptor table names are always valid");
                (desc.name, value)
            })
            .collect()
    }

    fn set_req_bit(&mut self, bit: IntReq, value: u32) {
        if value & 1 != 0 {
            self.ints.req |= bit;
        } else {
            self.ints.req -= bit;
        }
    }
}
