//! PDP-8 CPU core.
//!
//! This module contains the register file, the FETCH/DEFER/EXECUTE
//! major-state loop, memory-reference and operate instruction
//! execution, I/O transfer dispatch, interrupt admission, and the
//! idle/infinite-loop pattern detection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::breakpoint::Breakpoints;
use crate::device::DeviceSet;
use crate::history::{HistEntry, History};
use crate::interrupt::{IntReq, Interrupts};
use crate::memory::{is_auto_index, Memory, ADDR_MASK};
use crate::state::MajorState;
use crate::{CpuError, Result, StopReason, FIELD_MASK, LAC_MASK, LINK, WORD_MASK};

/// Number of entries in the queue of PC-changing events.
pub const PCQ_SIZE: usize = 64;

/// KSF opcode, recognized by the console-input idle pattern.
const OP_KSF: u16 = 0o6031;

/// External event service.
///
/// The interpreter counts instructions down from the value returned by
/// [`process_events`](Self::process_events) and calls it again when the
/// count expires. Device done/request mutations made inside take effect
/// at the next instruction boundary, never mid-instruction.
pub trait EventContext {
    /// Services due events and returns the instruction count until the
    /// next event. Returning `Err` stops the interpreter with that
    /// reason.
    ///
    /// # Errors
    ///
    /// Any [`StopReason`] the event source wants the interpreter to
    /// surface (a device error, an end-of-run condition).
    fn process_events(
        &mut self,
        devices: &mut DeviceSet,
        ints: &mut Interrupts,
    ) -> std::result::Result<u32, StopReason>;

    /// Yields wall-clock time until the next event is due. Called when
    /// an idle pattern is recognized.
    fn idle(&mut self) {}
}

/// Event context with no event sources: never stops, never sleeps.
pub struct NoEvents;

impl EventContext for NoEvents {
    fn process_events(
        &mut self,
        _devices: &mut DeviceSet,
        _ints: &mut Interrupts,
    ) -> std::result::Result<u32, StopReason> {
        Ok(u32::MAX)
    }
}

/// Handle for requesting an asynchronous stop of a running interpreter.
///
/// The request is polled once per instruction cycle.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Requests that the interpreter stop at the next cycle boundary.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// The PDP-8 CPU.
///
/// Holds all architectural state plus the memory array, interrupt
/// controller, history ring, and breakpoint tables. [`run`](Self::run)
/// drives the major-state machine until a stop condition.
pub struct Cpu {
    // Architectural registers.
    /// Link and accumulator, combined: bit 12 is L, bits 11:0 are AC.
    pub(crate) lac: u32,
    /// Multiplier-quotient.
    pub(crate) mq: u16,
    /// Program counter within the current field.
    pub(crate) pc: u16,
    /// Memory address register (15-bit during fetch, in-field between).
    pub(crate) ma: u32,
    /// Memory buffer: last word fetched or stored.
    pub(crate) mb: u16,
    /// Instruction register.
    pub(crate) ir: u16,
    /// Instruction field, held left-shifted by 12.
    pub(crate) if_reg: u32,
    /// Instruction-field buffer, committed to IF on JMP/JMS.
    pub(crate) ib: u32,
    /// Data field for indirect data references, held left-shifted by 12.
    pub(crate) df: u32,
    /// User flag (current).
    pub(crate) uf: bool,
    /// User flag buffer.
    pub(crate) ub: bool,
    /// Save field: UF in bit 6, IF in bits 5:3, DF in bits 2:0.
    pub(crate) sf: u16,
    /// EAE step counter.
    pub(crate) sc: u16,
    /// EAE greater-than flag.
    pub(crate) gtf: bool,
    /// EAE mode: false = A, true = B.
    pub(crate) emode: bool,
    /// Front-panel switch register.
    pub(crate) sr: u16,
    /// Next major state to execute.
    pub(crate) major_state: MajorState,

    // Time-share control (TSC8-75) trap state.
    pub(crate) tsc_ir: u16,
    pub(crate) tsc_pc: u16,
    pub(crate) tsc_cdf: bool,
    pub(crate) tsc_enb: bool,

    // Queue of PCs prior to JMP, JMS, or interrupt entry.
    pcq: [u32; PCQ_SIZE],
    pcq_p: usize,

    /// Interrupt controller.
    pub(crate) ints: Interrupts,
    /// Main memory.
    pub(crate) mem: Memory,
    /// Instruction history ring.
    pub(crate) history: History,
    /// Shell-owned breakpoint tables.
    pub(crate) breakpoints: Breakpoints,

    // Configuration.
    eae_present: bool,
    idle_enabled: bool,
    stop_on_illegal: bool,

    // Run control.
    interval: i64,
    stop_request: Arc<AtomicBool>,
}

impl Cpu {
    /// Creates a CPU in cold power-on state: 32K of memory, EAE
    /// present, interrupts off, FETCH pending at address zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lac: 0,
            mq: 0,
            pc: 0,
            ma: 0,
            mb: 0,
            ir: 0,
            if_reg: 0,
            ib: 0,
            df: 0,
            uf: false,
            ub: false,
            sf: 0,
            sc: 0,
            gtf: false,
            emode: false,
            sr: 0,
            major_state: MajorState::Fetch,
            tsc_ir: 0,
            tsc_pc: 0,
            tsc_cdf: false,
            tsc_enb: false,
            pcq: [0; PCQ_SIZE],
            pcq_p: 0,
            ints: Interrupts::new(),
            mem: Memory::new(),
            history: History::new(),
            breakpoints: Breakpoints::new(),
            eae_present: true,
            idle_enabled: false,
            stop_on_illegal: false,
            interval: 0,
            stop_request: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Resets the CPU.
    ///
    /// Clears L'AC, the user and EAE mode flags, turns the interrupt
    /// system off with no field change pending, and re-initializes the
    /// field buffers from the current instruction field. Memory, PC,
    /// and device done/enable state are preserved.
    pub fn reset(&mut self) {
        self.lac = 0;
        self.major_state = MajorState::Fetch;
        self.ints.req = (self.ints.req - IntReq::ION) | IntReq::NO_CIF_PENDING;
        self.df = self.if_reg;
        self.ib = self.if_reg;
        self.uf = false;
        self.ub = false;
        self.gtf = false;
        self.emode = false;
        self.pcq_p = 0;
    }

    /// Sets the PC for a boot entry from a 15-bit address.
    ///
    /// The instruction field comes from bits 14:12; DF and IB are
    /// initialized to the same field so the first CIF-less JMS or JMP
    /// stays in the boot field.
    pub fn set_boot_pc(&mut self, addr: u32) {
        self.pc = (addr & u32::from(WORD_MASK)) as u16;
        self.if_reg = addr & FIELD_MASK;
        self.df = self.if_reg;
        self.ib = self.if_reg;
        self.major_state = MajorState::Fetch;
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Combined link and accumulator (13 bits).
    #[must_use]
    pub fn lac(&self) -> u32 {
        self.lac
    }

    /// Accumulator (12 bits).
    #[must_use]
    pub fn ac(&self) -> u16 {
        (self.lac & u32::from(WORD_MASK)) as u16
    }

    /// Link bit.
    #[must_use]
    pub fn link(&self) -> bool {
        self.lac & LINK != 0
    }

    /// Multiplier-quotient.
    #[must_use]
    pub fn mq(&self) -> u16 {
        self.mq
    }

    /// Program counter within the current field (12 bits).
    #[must_use]
    pub fn pc(&self) -> u16 {
        self.pc
    }

    /// Instruction field, held left-shifted by 12.
    #[must_use]
    pub fn instruction_field(&self) -> u32 {
        self.if_reg
    }

    /// Data field, held left-shifted by 12.
    #[must_use]
    pub fn data_field(&self) -> u32 {
        self.df
    }

    /// Instruction-field buffer, held left-shifted by 12.
    #[must_use]
    pub fn instruction_buffer(&self) -> u32 {
        self.ib
    }

    /// Save field (7 bits).
    #[must_use]
    pub fn save_field(&self) -> u16 {
        self.sf
    }

    /// User flag.
    #[must_use]
    pub fn user_flag(&self) -> bool {
        self.uf
    }

    /// User flag buffer.
    #[must_use]
    pub fn user_buffer(&self) -> bool {
        self.ub
    }

    /// EAE step counter (5 bits).
    #[must_use]
    pub fn sc(&self) -> u16 {
        self.sc
    }

    /// EAE greater-than flag.
    #[must_use]
    pub fn gtf(&self) -> bool {
        self.gtf
    }

    /// EAE mode: false = mode A, true = mode B.
    #[must_use]
    pub fn emode(&self) -> bool {
        self.emode
    }

    /// Next major state.
    #[must_use]
    pub fn major_state(&self) -> MajorState {
        self.major_state
    }

    /// Front-panel switch register.
    #[must_use]
    pub fn switch_register(&self) -> u16 {
        self.sr
    }

    /// Sets the front-panel switch register.
    pub fn set_switch_register(&mut self, value: u16) {
        self.sr = value & WORD_MASK;
    }

    /// Sets the accumulator, preserving the link.
    pub fn set_ac(&mut self, value: u16) {
        self.lac = (self.lac & LINK) | u32::from(value & WORD_MASK);
    }

    /// Sets the link bit.
    pub fn set_link(&mut self, link: bool) {
        self.lac = (self.lac & u32::from(WORD_MASK)) | if link { LINK } else { 0 };
    }

    /// Sets the multiplier-quotient.
    pub fn set_mq(&mut self, value: u16) {
        self.mq = value & WORD_MASK;
    }

    /// Main memory.
    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    /// Main memory, mutable.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    /// Interrupt controller.
    #[must_use]
    pub fn interrupts(&self) -> &Interrupts {
        &self.ints
    }

    /// Interrupt controller, mutable.
    pub fn interrupts_mut(&mut self) -> &mut Interrupts {
        &mut self.ints
    }

    /// Instruction history.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Breakpoint tables, mutable.
    pub fn breakpoints_mut(&mut self) -> &mut Breakpoints {
        &mut self.breakpoints
    }

    /// Recent PC-changing events, most recent first. Entries are full
    /// 15-bit addresses recorded before indirect JMP/JMS transfers and
    /// interrupt entries.
    #[must_use]
    pub fn pc_queue(&self) -> Vec<u32> {
        (0..PCQ_SIZE)
            .map(|k| self.pcq[(self.pcq_p + k) & (PCQ_SIZE - 1)])
            .collect()
    }

    /// Instruction captured by the last time-share trap.
    #[must_use]
    pub fn tsc_ir(&self) -> u16 {
        self.tsc_ir
    }

    /// PC captured by the last time-share trap.
    #[must_use]
    pub fn tsc_pc(&self) -> u16 {
        self.tsc_pc
    }

    /// True when the trapped instruction was a CDF.
    #[must_use]
    pub fn tsc_cdf(&self) -> bool {
        self.tsc_cdf
    }

    /// Enables or disables the time-share control trap unit.
    pub fn set_tsc_enabled(&mut self, enabled: bool) {
        self.tsc_enb = enabled;
    }

    /// True when the time-share control trap unit is enabled.
    #[must_use]
    pub fn tsc_enabled(&self) -> bool {
        self.tsc_enb
    }

    // =========================================================================
    // CONFIGURATION SURFACE
    // =========================================================================

    /// Resizes memory in 4K steps (`SET CPU 4K` .. `SET CPU 32K`).
    ///
    /// # Errors
    ///
    /// See [`Memory::resize`].
    pub fn set_mem_size(&mut self, words: usize, force: bool) -> Result<()> {
        self.mem.resize(words, force)
    }

    /// Declares EAE presence (`SET CPU EAE` / `SET CPU NOEAE`).
    pub fn set_eae(&mut self, present: bool) {
        self.eae_present = present;
    }

    /// True when the EAE is present.
    #[must_use]
    pub fn eae(&self) -> bool {
        self.eae_present
    }

    /// Enables idle detection (`SET CPU IDLE` / `SET CPU NOIDLE`).
    pub fn set_idle_detection(&mut self, enabled: bool) {
        self.idle_enabled = enabled;
    }

    /// True when idle detection is enabled.
    #[must_use]
    pub fn idle_detection(&self) -> bool {
        self.idle_enabled
    }

    /// Controls whether reserved or unimplemented instructions stop the
    /// interpreter rather than executing their defined defaults.
    pub fn set_stop_on_illegal(&mut self, stop: bool) {
        self.stop_on_illegal = stop;
    }

    /// True when reserved instructions stop the interpreter.
    #[must_use]
    pub fn stop_on_illegal(&self) -> bool {
        self.stop_on_illegal
    }

    /// Configures the history ring (`SET CPU HISTORY=<n>`).
    ///
    /// # Errors
    ///
    /// See [`History::resize`].
    pub fn set_history(&mut self, capacity: usize) -> Result<()> {
        self.history.resize(capacity)
    }

    /// Formats the most recent history entries (`SHOW CPU HISTORY[=n]`).
    ///
    /// # Errors
    ///
    /// See [`History::show`].
    pub fn show_history(&self, count: Option<usize>) -> Result<String> {
        self.history.show(count)
    }

    /// Returns a handle the shell can use to stop a running
    /// interpreter asynchronously.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_request),
        }
    }

    // =========================================================================
    // INTERPRETER
    // =========================================================================

    /// Runs the interpreter until a stop condition.
    ///
    /// The device dispatch table is rebuilt first; executing starts only
    /// if that succeeds. All run-time stop conditions (halt, breakpoint,
    /// loop detection, device stop, shell stop) surface as the returned
    /// [`StopReason`].
    ///
    /// # Errors
    ///
    /// [`CpuError::DeviceConflict`] when two handlers claim the same
    /// device code; reported before any instruction executes.
    pub fn run(
        &mut self,
        devices: &mut DeviceSet,
        events: &mut impl EventContext,
    ) -> Result<StopReason> {
        devices.build_table()?;
        self.ints.update_requests();
        self.interval = 0;

        let reason = loop {
            if self.stop_request.swap(false, Ordering::Relaxed) {
                break StopReason::Control;
            }

            if self.interval <= 0 {
                match events.process_events(devices, &mut self.ints) {
                    Ok(next) => self.interval = i64::from(next),
                    Err(reason) => break reason,
                }
            }

            let stop = match self.major_state {
                MajorState::Fetch => self.fetch(devices, events),
                MajorState::Defer => {
                    self.defer();
                    None
                }
                MajorState::Execute => {
                    self.execute();
                    None
                }
            };
            if let Some(reason) = stop {
                break reason;
            }

            // Interrupt admission happens only at instruction boundaries,
            // when the next major state is FETCH.
            if self.major_state == MajorState::Fetch && self.ints.pending() {
                self.admit_interrupt();
            }
        };

        log::debug!("simulation stopped: {reason}");
        Ok(reason)
    }

    /// FETCH major state: fetch, decode, and execute everything that
    /// completes within the fetch cycle (IOT, OPR, direct JMP).
    fn fetch(
        &mut self,
        devices: &mut DeviceSet,
        events: &mut dyn EventContext,
    ) -> Option<StopReason> {
        self.ma = self.if_reg | u32::from(self.pc);
        if self.breakpoints.exec_hit(self.ma) {
            return Some(StopReason::Breakpoint);
        }

        self.pc = (self.pc + 1) & WORD_MASK;
        self.ints.req |= IntReq::NO_ION_PENDING; // ION delay expires here
        self.interval -= 1;

        self.mb = self.mem.read(self.ma);
        self.ir = self.mb;
        if self.breakpoints.instr_hit(self.ir) {
            return Some(StopReason::InstructionBreakpoint);
        }

        if self.history.enabled() {
            self.record_history();
        }

        match (self.ir >> 9) & 0o7 {
            // AND, TAD, ISZ, DCA, JMS: form the page-relative address and
            // hand off to DEFER (indirect) or EXECUTE (direct).
            op @ 0..=4 => {
                if op == 4 {
                    self.pcq_entry(self.ma);
                }
                self.ma = if self.ir & 0o200 != 0 {
                    (self.ma & 0o7600) | u32::from(self.ir & 0o177) // current page
                } else {
                    u32::from(self.ir & 0o177) // page zero
                };
                self.major_state = if self.ir & 0o400 != 0 {
                    MajorState::Defer
                } else {
                    MajorState::Execute
                };
                None
            }
            5 => self.jmp_fetch(events),
            6 => self.iot(devices),
            _ => self.operate(),
        }
    }

    /// JMP decode within FETCH. Direct JMP completes here; indirect
    /// hands off to DEFER.
    fn jmp_fetch(&mut self, events: &mut dyn EventContext) -> Option<StopReason> {
        self.pcq_entry(self.ma);
        self.ma = if self.ir & 0o200 != 0 {
            (self.ma & 0o77600) | u32::from(self.ir & 0o177) // current page
        } else {
            self.if_reg | u32::from(self.ir & 0o177) // page zero
        };
        if self.ir & 0o400 != 0 {
            self.major_state = MajorState::Defer;
            return None;
        }

        // A user-mode JMP loads the trap registers; with the trap unit
        // enabled it also raises the TSC interrupt. The jump itself
        // still completes.
        if self.uf {
            self.tsc_ir = self.ir;
            self.tsc_cdf = false;
            if self.tsc_enb {
                self.tsc_pc = self.pc.wrapping_sub(1) & WORD_MASK;
                self.ints.request(IntReq::TSC);
            }
        }

        if let Some(reason) = self.check_wait_patterns(events) {
            return Some(reason);
        }

        self.if_reg = self.ib;
        self.uf = self.ub;
        self.ints.req |= IntReq::NO_CIF_PENDING;
        self.pc = (self.ma & u32::from(WORD_MASK)) as u16;
        None
    }

    /// Recognizes the common OS wait loops on a direct JMP.
    ///
    /// `JMP *` with interrupts off can never make progress and is a hard
    /// stop. With idle detection enabled, `JMP *` waiting on an enabled
    /// interrupt and the `KSF / JMP *-1` console poll both yield wall
    /// clock to the event source instead of spinning.
    fn check_wait_patterns(&mut self, events: &mut dyn EventContext) -> Option<StopReason> {
        if self.if_reg != self.ib {
            return None; // transfer leaves the current field
        }
        let target = self.ma & u32::from(WORD_MASK);
        if target == u32::from(self.pc.wrapping_sub(1) & WORD_MASK) {
            // JMP *
            if !self.ints.ion() {
                return Some(StopReason::InfiniteLoop);
            }
            if self.idle_enabled && !self.ints.any_request() {
                events.idle();
            }
        } else if self.idle_enabled
            && target == u32::from(self.pc.wrapping_sub(2) & WORD_MASK)
            && !self.ints.requests().intersects(IntReq::ION | IntReq::TTI)
            && self.mem.read(self.ib | target) == OP_KSF
        {
            // KSF / JMP *-1 with the keyboard flag down
            events.idle();
        }
        None
    }

    /// DEFER major state: read the indirect pointer, auto-increment
    /// locations 0010-0017, and resolve the transfer or data address.
    fn defer(&mut self) {
        self.ma = self.if_reg | self.ma;
        self.mb = self.mem.read(self.ma);
        if is_auto_index(self.ma) {
            self.mb = (self.mb + 1) & WORD_MASK;
            self.mem.write(self.ma, self.mb);
        }
        self.ma = u32::from(self.mb);

        if (self.ir >> 9) & 0o7 != 5 {
            self.major_state = MajorState::Execute;
            return;
        }

        // Indirect JMP completes here, with the same user-mode trap
        // rules as the direct form.
        if self.uf {
            self.tsc_ir = self.ir;
            self.tsc_cdf = false;
            if self.tsc_enb {
                self.tsc_pc = self.pc.wrapping_sub(1) & WORD_MASK;
                self.ints.request(IntReq::TSC);
            }
        }
        self.if_reg = self.ib;
        self.uf = self.ub;
        self.ints.req |= IntReq::NO_CIF_PENDING;
        self.pc = (self.ma & u32::from(WORD_MASK)) as u16;
        self.major_state = MajorState::Fetch;
    }

    /// EXECUTE major state: the data cycle for AND/TAD/ISZ/DCA/JMS.
    fn execute(&mut self) {
        let op = (self.ir >> 9) & 0o7;
        if op < 4 {
            // Indirect data references go through DF, direct through IF.
            self.ma = if self.ir & 0o400 != 0 {
                self.df | (self.ma & u32::from(WORD_MASK))
            } else {
                self.if_reg | (self.ma & u32::from(WORD_MASK))
            };
            self.mb = self.mem.read(self.ma);
            match op {
                0 => self.lac &= u32::from(self.mb) | LINK, // AND
                1 => self.lac = (self.lac + u32::from(self.mb)) & LAC_MASK, // TAD
                2 => {
                    // ISZ
                    self.mb = (self.mb + 1) & WORD_MASK;
                    self.mem.write(self.ma, self.mb);
                    if self.mb == 0 {
                        self.skip();
                    }
                }
                _ => {
                    // DCA
                    self.mb = self.ac();
                    self.mem.write(self.ma, self.mb);
                    self.lac &= LINK;
                }
            }
        } else {
            // JMS. In user mode the trap registers are loaded; with the
            // trap unit enabled the store of the return address and the
            // field/user commit are suppressed and the TSC interrupt is
            // raised instead.
            if self.uf {
                self.tsc_ir = self.ir;
                self.tsc_cdf = false;
            }
            if self.uf && self.tsc_enb {
                self.tsc_pc = self.pc.wrapping_sub(1) & WORD_MASK;
                self.ints.request(IntReq::TSC);
            } else {
                self.if_reg = self.ib;
                self.uf = self.ub;
                self.ints.req |= IntReq::NO_CIF_PENDING;
                self.ma = self.if_reg | (self.ma & u32::from(WORD_MASK));
                self.mem.write(self.ma, self.pc); // dropped beyond memory size
            }
            self.mb = (self.ma & u32::from(WORD_MASK)) as u16;
            self.pc = ((self.ma + 1) & u32::from(WORD_MASK)) as u16;
        }
        self.major_state = MajorState::Fetch;
    }

    /// Interrupt entry: save the return context and vector to 00001.
    fn admit_interrupt(&mut self) {
        self.ints.req -= IntReq::ION;
        self.sf =
            (u16::from(self.uf) << 6) | ((self.if_reg >> 9) as u16) | ((self.df >> 12) as u16);
        self.pcq_entry(self.if_reg | u32::from(self.pc));
        self.if_reg = 0;
        self.ib = 0;
        self.df = 0;
        self.uf = false;
        self.ub = false;
        self.mem.write(0, self.pc);
        self.pc = 1;
        log::trace!("interrupt entry, SF {:03o}", self.sf);
    }

    // =========================================================================
    // I/O TRANSFER (opcode 6)
    // =========================================================================

    fn iot(&mut self, devices: &mut DeviceSet) -> Option<StopReason> {
        // In user mode the instruction is not executed; the violation
        // interrupt is raised and the trap registers loaded. A CDF
        // target (62x1) is flagged for the supervisor.
        if self.uf {
            self.ints.request(IntReq::UF);
            self.tsc_ir = self.ir;
            self.tsc_cdf = self.ir & 0o7707 == 0o6201;
            return None;
        }

        let device = (self.ir >> 3) & 0o77;
        let pulse = self.ir & 0o7;
        let iot_data = self.ac();

        match device {
            0o00 => self.iot_cpu_control(pulse, iot_data, devices),
            0o20..=0o27 => self.iot_mem_extension(device, pulse),
            0o10 => self.iot_power_fail(pulse),
            _ => match devices.dispatch(device as u8, self.ir, iot_data, &mut self.ints) {
                Some(result) => {
                    self.lac = (self.lac & LINK) | u32::from(result.ac & WORD_MASK);
                    if result.skip {
                        self.skip();
                    }
                    if result.stop != 0 {
                        return Some(StopReason::Io(result.stop));
                    }
                    None
                }
                None => self.illegal(),
            },
        }
    }

    /// Device 00: CPU and interrupt-system control.
    fn iot_cpu_control(
        &mut self,
        pulse: u16,
        iot_data: u16,
        devices: &mut DeviceSet,
    ) -> Option<StopReason> {
        match pulse {
            0 => {
                // SKON: skip if ION, then turn interrupts off
                if self.ints.ion() {
                    self.skip();
                }
                self.ints.req -= IntReq::ION;
            }
            1 => {
                // ION: interrupts on after one more instruction
                self.ints.req = (self.ints.req | IntReq::ION) - IntReq::NO_ION_PENDING;
            }
            2 => {
                // IOF
                self.ints.req -= IntReq::ION;
            }
            3 => {
                // SRQ: skip on any interrupt request
                if self.ints.any_request() {
                    self.skip();
                }
            }
            4 => {
                // GTF: pack L, GTF, interrupt state, and SF into AC
                self.lac = (self.lac & LINK)
                    | ((self.lac & LINK) >> 1)
                    | (u32::from(self.gtf) << 10)
                    | (u32::from(self.ints.any_request()) << 9)
                    | (u32::from(self.ints.ion()) << 7)
                    | u32::from(self.sf);
            }
            5 => {
                // RTF: restore flags from AC; interrupts back on, but
                // held off until the next JMP/JMS commits the fields
                self.gtf = self.lac & 0o2000 != 0;
                self.ub = self.lac & 0o0100 != 0;
                self.ib = (self.lac & 0o0070) << 9;
                self.df = (self.lac & 0o0007) << 12;
                self.lac = ((self.lac & 0o4000) << 1) | u32::from(iot_data);
                self.ints.req = (self.ints.req | IntReq::ION) - IntReq::NO_CIF_PENDING;
            }
            6 => {
                // SGT
                if self.gtf {
                    self.skip();
                }
            }
            _ => {
                // CAF: clear AC and flags, reset the interrupt system
                // and every attached device
                self.gtf = false;
                self.emode = false;
                self.ints.req &= IntReq::NO_CIF_PENDING;
                self.ints.done = IntReq::empty();
                self.ints.enable = IntReq::INIT_ENABLE;
                self.lac = 0;
                devices.reset_all(&mut self.ints);
            }
        }
        None
    }

    /// Devices 20-27: memory-extension control.
    fn iot_mem_extension(&mut self, device: u16, pulse: u16) -> Option<StopReason> {
        match pulse {
            1 => {
                // CDF
                self.df = u32::from(self.ir & 0o0070) << 9;
            }
            2 => {
                // CIF: field change deferred until the next JMP/JMS
                self.ib = u32::from(self.ir & 0o0070) << 9;
                self.ints.req -= IntReq::NO_CIF_PENDING;
            }
            3 => {
                // CDF CIF
                self.df = u32::from(self.ir & 0o0070) << 9;
                self.ib = self.df;
                self.ints.req -= IntReq::NO_CIF_PENDING;
            }
            4 => match device & 0o7 {
                0 => {
                    // CINT
                    self.ints.clear_request(IntReq::UF);
                }
                1 => {
                    // RDF
                    self.lac |= self.df >> 9;
                }
                2 => {
                    // RIF
                    self.lac |= self.if_reg >> 9;
                }
                3 => {
                    // RIB
                    self.lac |= u32::from(self.sf);
                }
                4 => {
                    // RMF: restore fields from SF after an interrupt
                    self.ub = self.sf & 0o100 != 0;
                    self.ib = u32::from(self.sf & 0o070) << 9;
                    self.df = u32::from(self.sf & 0o007) << 12;
                    self.ints.req -= IntReq::NO_CIF_PENDING;
                }
                5 => {
                    // SINT
                    if self.ints.requests().contains(IntReq::UF) {
                        self.skip();
                    }
                }
                6 => {
                    // CUF
                    self.ub = false;
                    self.ints.req -= IntReq::NO_CIF_PENDING;
                }
                _ => {
                    // SUF
                    self.ub = true;
                    self.ints.req -= IntReq::NO_CIF_PENDING;
                }
            },
            _ => return self.illegal(),
        }
        None
    }

    /// Device 10: power-fail detection.
    fn iot_power_fail(&mut self, pulse: u16) -> Option<StopReason> {
        match pulse {
            1 => {} // SBE
            2 => {
                // SPL
                if self.ints.requests().contains(IntReq::PWR) {
                    self.skip();
                }
            }
            3 => {
                // CAL
                self.ints.clear_request(IntReq::PWR);
            }
            _ => return self.illegal(),
        }
        None
    }

    // =========================================================================
    // OPERATE (opcode 7)
    // =========================================================================

    fn operate(&mut self) -> Option<StopReason> {
        if self.ir & 0o400 == 0 {
            self.operate_group1();
            None
        } else if self.ir & 0o1 == 0 {
            self.operate_group2()
        } else {
            self.operate_group3()
        }
    }

    /// Group 1: clears, complements, increment, rotates, in the four
    /// hardware sequences.
    fn operate_group1(&mut self) {
        if self.ir & 0o200 != 0 {
            self.lac &= LINK; // CLA is sequence 1
        }
        if self.ir & 0o100 != 0 {
            self.lac &= u32::from(WORD_MASK); // CLL is sequence 1
        }
        if self.ir & 0o040 != 0 {
            self.lac ^= u32::from(WORD_MASK); // CMA is sequence 2
        }
        if self.ir & 0o020 != 0 {
            self.lac ^= LINK; // CML is sequence 2
        }
        if self.ir & 0o001 != 0 {
            self.lac = (self.lac + 1) & LAC_MASK; // IAC is sequence 3
        }
        match self.ir & 0o016 {
            // rotates are sequence 4
            0o00 => {}
            0o02 => {
                // BSW
                self.lac = (self.lac & LINK) | ((self.lac >> 6) & 0o77) | ((self.lac & 0o77) << 6);
            }
            0o04 => {
                // RAL
                self.lac = ((self.lac << 1) | (self.lac >> 12)) & LAC_MASK;
            }
            0o06 => {
                // RTL
                self.lac = ((self.lac << 2) | (self.lac >> 11)) & LAC_MASK;
            }
            0o10 => {
                // RAR
                self.lac = ((self.lac >> 1) | (self.lac << 12)) & LAC_MASK;
            }
            0o12 => {
                // RTR
                self.lac = ((self.lac >> 2) | (self.lac << 11)) & LAC_MASK;
            }
            0o14 => {
                // RAL RAR: reads back through the AND path
                self.lac &= u32::from(self.ir) | LINK;
            }
            _ => {
                // RTL RTR: reads back through the address path
                self.lac = (self.lac & LINK) | (self.ma & 0o7600) | u32::from(self.ir & 0o177);
            }
        }
    }

    /// Group 2: skips, CLA, OSR, HLT.
    fn operate_group2(&mut self) -> Option<StopReason> {
        // Skips are sequence 1. The reverse bit inverts the OR of the
        // selected conditions.
        let mut condition = false;
        if self.ir & 0o100 != 0 {
            condition |= self.lac & 0o4000 != 0; // SMA
        }
        if self.ir & 0o040 != 0 {
            condition |= self.lac & u32::from(WORD_MASK) == 0; // SZA
        }
        if self.ir & 0o020 != 0 {
            condition |= self.lac & LINK != 0; // SNL
        }
        if condition != (self.ir & 0o010 != 0) {
            self.skip();
        }

        if self.ir & 0o200 != 0 {
            self.lac &= LINK; // CLA is sequence 2
        }

        if self.ir & 0o06 != 0 {
            // HLT and OSR are sequence 3; both are privileged
            if self.uf {
                self.ints.request(IntReq::UF);
                self.tsc_ir = self.ir;
                self.tsc_cdf = false;
            } else if self.ir & 0o02 != 0 {
                return Some(StopReason::Halt);
            } else {
                self.lac |= u32::from(self.sr); // OSR
            }
        }
        None
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    #[inline]
    pub(crate) fn skip(&mut self) {
        self.pc = (self.pc + 1) & WORD_MASK;
    }

    /// Stop on a reserved/unimplemented instruction, if configured.
    pub(crate) fn illegal(&self) -> Option<StopReason> {
        self.stop_on_illegal.then_some(StopReason::IllegalInstruction)
    }

    fn pcq_entry(&mut self, addr: u32) {
        self.pcq_p = self.pcq_p.wrapping_sub(1) & (PCQ_SIZE - 1);
        self.pcq[self.pcq_p] = addr & ADDR_MASK;
    }

    /// Records the current instruction, predicting the effective
    /// address and operand for memory-reference instructions without
    /// perturbing memory.
    fn record_history(&mut self) {
        let mem = if self.ir < 0o6000 {
            let mut ea = if self.ir & 0o200 != 0 {
                (self.ma & 0o77600) | u32::from(self.ir & 0o177)
            } else {
                self.if_reg | u32::from(self.ir & 0o177)
            };
            if self.ir & 0o400 != 0 {
                let field = if self.ir < 0o4000 { self.df } else { self.ib };
                let pointer = if is_auto_index(ea) {
                    (self.mem.read(ea) + 1) & WORD_MASK
                } else {
                    self.mem.read(ea)
                };
                ea = field | u32::from(pointer);
            }
            Some((ea, self.mem.read(ea)))
        } else {
            None
        };
        self.history.record(HistEntry {
            pc: self.ma,
            ir: self.ir,
            lac: self.lac,
            mq: self.mq,
            mem,
        });
    }

    // Register descriptor get/set live in registers.rs; expose a typed
    // state setter for them and the shell.
    pub(crate) fn set_major_state_raw(&mut self, value: u32) -> Result<()> {
        self.major_state = match value {
            1 => MajorState::Fetch,
            2 => MajorState::Defer,
            3 => MajorState::Execute,
            _ => return Err(CpuError::InvalidRegisterValue("STATE")),
        };
        Ok(())
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
