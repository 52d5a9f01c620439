//! Extended Arithmetic Element (operate group 3).
//!
//! The EAE has two operating modes. Mode A is PDP-8/I compatible; mode
//! B adds eight double-precision subfunctions and changes the meaning
//! of several mode-A rows. The mode-switch instructions pre-empt all
//! other group 3 decoding. Memory operands are fetched through the
//! machine's normal defer path, so a pointer word sitting in locations
//! 0010-0017 is auto-incremented before use.

use crate::memory::is_auto_index;
use crate::{Cpu, StopReason, LAC_MASK, LINK, WORD_MASK};

impl Cpu {
    /// Operate group 3: MQ transfers, mode switches, and the EAE
    /// function rows.
    pub(crate) fn operate_group3(&mut self) -> Option<StopReason> {
        // MQA!MQL exchanges AC and MQ: the snapshot makes the pair
        // order-independent.
        let old_mq = u32::from(self.mq);
        if self.ir & 0o200 != 0 {
            self.lac &= LINK; // CLA
        }
        if self.ir & 0o020 != 0 {
            // MQL
            self.mq = self.ac();
            self.lac &= LINK;
        }
        if self.ir & 0o100 != 0 {
            self.lac |= old_mq; // MQA
        }
        if self.ir & 0o056 != 0 && !self.eae() {
            return self.illegal(); // EAE function without the EAE
        }

        // Mode switches suppress all other EAE decoding.
        if self.ir == 0o7431 {
            // SWAB
            self.emode = true;
            return None;
        }
        if self.ir == 0o7447 {
            // SWBA
            self.emode = false;
            self.gtf = false;
            return None;
        }

        if !self.emode {
            self.gtf = false;
        }

        let code = (self.ir >> 1) & 0o27;
        if self.emode {
            self.eae_mode_b(code);
        } else {
            // In mode A the high row is SCA microprogrammed with the
            // low row's function.
            if code & 0o20 != 0 {
                self.lac |= u32::from(self.sc);
            }
            self.eae_mode_a(code & 0o7);
        }
        None
    }

    fn eae_mode_a(&mut self, code: u16) {
        match code {
            0 => {} // NOP (or SCA alone)
            1 => {
                // SCL: load step counter from the complemented operand
                self.sc = !self.mem.read(self.if_reg | u32::from(self.pc)) & 0o37;
                self.skip_operand_word();
            }
            2 => self.multiply(self.if_reg | u32::from(self.pc)),
            3 => self.divide(self.if_reg | u32::from(self.pc)),
            4 => self.normalize(),
            5 => self.shift_left(),
            6 => self.shift_right_arithmetic(),
            _ => self.shift_right_logical(),
        }
    }

    fn eae_mode_b(&mut self, code: u16) {
        match code {
            0o00 => {}
            0o20 => self.lac |= u32::from(self.sc), // SCA
            0o01 => {
                // ACS: step counter from AC
                self.sc = self.ac() & 0o37;
                self.lac &= LINK;
            }
            0o02 => {
                let ea = self.eae_operand_addr();
                self.multiply(ea);
            }
            0o03 => {
                let ea = self.eae_operand_addr();
                self.divide(ea);
            }
            0o04 => {
                // NMI, clearing AC on the 4000'0000 result
                self.normalize();
                if self.ac() == 0o4000 && self.mq == 0 {
                    self.lac &= LINK;
                }
            }
            0o05 => self.shift_left(),
            0o06 => self.shift_right_arithmetic(),
            0o07 => self.shift_right_logical(),
            0o21 => {
                // DAD: double-precision add of M[EA]'M[EA+1] to MQ'AC
                let mut ea = self.eae_operand_addr();
                let sum = u32::from(self.mq) + u32::from(self.mem.read(ea));
                ea = self.df | ((ea + 1) & u32::from(WORD_MASK));
                self.lac =
                    (self.lac & u32::from(WORD_MASK)) + u32::from(self.mem.read(ea)) + (sum >> 12);
                self.mq = (sum & u32::from(WORD_MASK)) as u16;
                self.skip_operand_word();
            }
            0o22 => {
                // DST: double-precision store of MQ'AC
                let mut ea = self.eae_operand_addr();
                self.mem.write(ea, self.mq);
                ea = self.df | ((ea + 1) & u32::from(WORD_MASK));
                self.mem.write(ea, self.ac());
                self.skip_operand_word();
            }
            0o23 => {} // SWBA shape without the exact encoding: NOP
            0o24 => {
                // DPSZ: skip on double-precision zero
                if (self.lac | u32::from(self.mq)) & u32::from(WORD_MASK) == 0 {
                    self.skip();
                }
            }
            0o25 => {
                // DPIC: double-precision increment (operands pre-swapped)
                let low = (self.lac + 1) & u32::from(WORD_MASK);
                self.lac = u32::from(self.mq) + u32::from(low == 0);
                self.mq = low as u16;
            }
            0o26 => {
                // DCM: double-precision complement (operands pre-swapped)
                let low = (0o10000 - (self.lac & u32::from(WORD_MASK))) & u32::from(WORD_MASK);
                self.lac = (u32::from(self.mq) ^ u32::from(WORD_MASK)) + u32::from(low == 0);
                self.mq = low as u16;
            }
            _ => {
                // SAM: L'AC = MQ - AC, GTF from the signed compare
                let ac = self.lac & u32::from(WORD_MASK);
                self.lac = u32::from(self.mq) + (ac ^ u32::from(WORD_MASK)) + 1;
                self.gtf = (ac <= u32::from(self.mq)) != ((ac ^ u32::from(self.mq)) >> 11 != 0);
            }
        }
    }

    /// Resolves the mode-B memory operand: the word after the
    /// instruction is a pointer, itself subject to auto-incrementing.
    fn eae_operand_addr(&mut self) -> u32 {
        let ptr_addr = self.if_reg | u32::from(self.pc);
        let pointer = if is_auto_index(ptr_addr) {
            let bumped = (self.mem.read(ptr_addr) + 1) & WORD_MASK;
            self.mem.write(ptr_addr, bumped);
            bumped
        } else {
            self.mem.read(ptr_addr)
        };
        self.df | u32::from(pointer)
    }

    /// Advances PC past the in-line operand word.
    fn skip_operand_word(&mut self) {
        self.skip();
    }

    /// MUY: MQ'AC = MQ * M[EA] + AC.
    fn multiply(&mut self, ea: u32) {
        let product =
            u32::from(self.mq) * u32::from(self.mem.read(ea)) + (self.lac & u32::from(WORD_MASK));
        self.lac = (product >> 12) & u32::from(WORD_MASK);
        self.mq = (product & u32::from(WORD_MASK)) as u16;
        self.skip_operand_word();
        self.sc = 0o14; // 12 shifts
    }

    /// DVI: AC'MQ / M[EA] -> MQ remainder AC, with divide overflow when
    /// the divisor does not exceed the high half.
    fn divide(&mut self, ea: u32) {
        let divisor = u32::from(self.mem.read(ea));
        if self.lac & u32::from(WORD_MASK) >= divisor {
            self.lac |= LINK;
            self.mq = ((self.mq << 1) + 1) & WORD_MASK;
            self.sc = 0; // no shifts
        } else {
            let dividend = ((self.lac & u32::from(WORD_MASK)) << 12) | u32::from(self.mq);
            self.mq = (dividend / divisor) as u16;
            self.lac = dividend % divisor;
            self.sc = 0o15; // 13 shifts
        }
        self.skip_operand_word();
    }

    /// NMI: shift L'AC'MQ left until the top two AC bits differ or the
    /// significant bits run out, counting shifts in SC.
    fn normalize(&mut self) {
        let mut word = (u64::from(self.lac) << 12) | u64::from(self.mq);
        self.sc = 0;
        while word & 0o17777777 != 0 && (word & 0o40000000) == ((word << 1) & 0o40000000) {
            word <<= 1;
            self.sc += 1;
        }
        self.lac = ((word >> 12) & u64::from(LAC_MASK)) as u32;
        self.mq = (word & u64::from(WORD_MASK)) as u16;
    }

    /// SHL: shift L'AC'MQ left by the operand count (one extra shift in
    /// mode A).
    fn shift_left(&mut self) {
        let count =
            (self.mem.read(self.if_reg | u32::from(self.pc)) & 0o37) + u16::from(!self.emode);
        let word = if count > 25 {
            0
        } else {
            ((u64::from(self.lac) << 12) | u64::from(self.mq)) << count
        };
        self.lac = ((word >> 12) & u64::from(LAC_MASK)) as u32;
        self.mq = (word & u64::from(WORD_MASK)) as u16;
        self.skip_operand_word();
        self.sc = if self.emode { 0o37 } else { 0 };
    }

    /// ASR: arithmetic shift right of AC'MQ, sign-extended from AC<0>;
    /// mode B latches the last bit shifted out in GTF.
    fn shift_right_arithmetic(&mut self) {
        let count =
            (self.mem.read(self.if_reg | u32::from(self.pc)) & 0o37) + u16::from(!self.emode);
        let mut word = (((self.lac & u32::from(WORD_MASK)) as i64) << 12) | i64::from(self.mq);
        if self.lac & 0o4000 != 0 {
            word |= !0o37777777;
        }
        if self.emode && count != 0 {
            self.gtf = (word >> (count - 1)) & 1 != 0;
        }
        let word = if count > 25 {
            if self.lac & 0o4000 != 0 {
                -1
            } else {
                0
            }
        } else {
            word >> count
        };
        self.lac = ((word >> 12) & i64::from(LAC_MASK)) as u32;
        self.mq = (word & i64::from(WORD_MASK)) as u16;
        self.skip_operand_word();
        self.sc = if self.emode { 0o37 } else { 0 };
    }

    /// LSR: logical shift right of AC'MQ, clearing the link; mode B
    /// latches the last bit shifted out in GTF.
    fn shift_right_logical(&mut self) {
        let count =
            (self.mem.read(self.if_reg | u32::from(self.pc)) & 0o37) + u16::from(!self.emode);
        let word = ((self.lac & u32::from(WORD_MASK)) as u64) << 12 | u64::from(self.mq);
        if self.emode && count != 0 {
            self.gtf = (word >> (count - 1)) & 1 != 0;
        }
        let word = if count > 24 { 0 } else { word >> count };
        self.lac = ((word >> 12) & u64::from(WORD_MASK)) as u32;
        self.mq = (word & u64::from(WORD_MASK)) as u16;
        self.skip_operand_word();
        self.sc = if self.emode { 0o37 } else { 0 };
    }
}

#[cfg(test)]
mod tests {
    use crate::{Cpu, DeviceSet, NoEvents, StopReason};

    fn run_to_halt(cpu: &mut Cpu) {
        let reason = cpu.run(&mut DeviceSet::new(), &mut NoEvents).unwrap();
        assert_eq!(reason, StopReason::Halt);
    }

    /// Program at 0200 with HLT appended.
    fn cpu_with_program(program: &[u16]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.memory_mut().load(0o0200, program).unwrap();
        cpu.memory_mut()
            .deposit(0o0200 + program.len() as u32, 0o7402)
            .unwrap();
        cpu.set_boot_pc(0o0200);
        cpu
    }

    fn enter_mode_b(cpu: &mut Cpu) {
        cpu.emode = true;
    }

    #[test]
    fn test_mqa_mql_exchange() {
        // MQA MQL (7521) swaps AC and MQ.
        let mut cpu = cpu_with_program(&[0o7521]);
        cpu.set_ac(0o1111);
        cpu.set_mq(0o2222);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.ac(), 0o2222);
        assert_eq!(cpu.mq(), 0o1111);
    }

    #[test]
    fn test_mql_loads_mq_and_clears_ac() {
        let mut cpu = cpu_with_program(&[0o7421]); // MQL
        cpu.set_ac(0o1234);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.mq(), 0o1234);
        assert_eq!(cpu.ac(), 0);
    }

    #[test]
    fn test_swab_swba_switch_modes() {
        let mut cpu = cpu_with_program(&[0o7431]); // SWAB
        run_to_halt(&mut cpu);
        assert!(cpu.emode());

        let mut cpu = cpu_with_program(&[0o7431, 0o7447]); // SWAB / SWBA
        cpu.gtf = true;
        run_to_halt(&mut cpu);
        assert!(!cpu.emode());
        assert!(!cpu.gtf());
    }

    #[test]
    fn test_eae_absent_stops_when_configured() {
        let mut cpu = cpu_with_program(&[0o7405, 0o0003]); // MUY
        cpu.set_eae(false);
        cpu.set_stop_on_illegal(true);
        let reason = cpu.run(&mut DeviceSet::new(), &mut NoEvents).unwrap();
        assert_eq!(reason, StopReason::IllegalInstruction);
    }

    #[test]
    fn test_muy_mode_a_direct_operand() {
        // MUY with in-line multiplier 0003, MQ=0002: MQ'AC = 6.
        let mut cpu = cpu_with_program(&[0o7405, 0o0003]);
        cpu.set_mq(0o0002);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.ac(), 0);
        assert_eq!(cpu.mq(), 0o0006);
        assert_eq!(cpu.sc(), 0o14);
        assert_eq!(cpu.pc(), 0o0203);
    }

    #[test]
    fn test_muy_mode_b_deferred_operand() {
        // In mode B the operand word points at the multiplier.
        let mut cpu = cpu_with_program(&[0o7405, 0o0300]);
        enter_mode_b(&mut cpu);
        cpu.memory_mut().deposit(0o0300, 0o0003).unwrap();
        cpu.set_mq(0o0002);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.ac(), 0);
        assert_eq!(cpu.mq(), 0o0006);
        assert_eq!(cpu.sc(), 0o14);
        assert_eq!(cpu.pc(), 0o0203);
    }

    #[test]
    fn test_muy_adds_ac_and_carries_high_half() {
        let mut cpu = cpu_with_program(&[0o7405, 0o7777]);
        cpu.set_mq(0o7777);
        cpu.set_ac(0o0001);
        run_to_halt(&mut cpu);
        // 7777 * 7777 + 1 = 77760002
        assert_eq!(cpu.ac(), 0o7776);
        assert_eq!(cpu.mq(), 0o0002);
    }

    #[test]
    fn test_dvi_quotient_and_remainder() {
        // AC'MQ = 0001'0005 divided by 0002
        let mut cpu = cpu_with_program(&[0o7407, 0o0002]);
        cpu.set_ac(0o0001);
        cpu.set_mq(0o0005);
        run_to_halt(&mut cpu);
        // 0o10005 / 2 = 0o4002 remainder 1
        assert_eq!(cpu.mq(), 0o4002);
        assert_eq!(cpu.ac(), 0o0001);
        assert!(!cpu.link());
        assert_eq!(cpu.sc(), 0o15);
    }

    #[test]
    fn test_dvi_overflow_sets_link_and_clears_sc() {
        let mut cpu = cpu_with_program(&[0o7407, 0o0002]);
        cpu.set_ac(0o0002); // AC >= divisor
        cpu.set_mq(0o0001);
        run_to_halt(&mut cpu);
        assert!(cpu.link());
        assert_eq!(cpu.mq(), 0o0003); // rotated left with a one
        assert_eq!(cpu.sc(), 0);
    }

    #[test]
    fn test_nmi_normalizes_and_counts() {
        // L'AC'MQ = 0'0001'0000: normalized when AC<0> != AC<1>
        let mut cpu = cpu_with_program(&[0o7411]); // NMI
        cpu.set_ac(0o0001);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.ac(), 0o2000);
        assert_eq!(cpu.mq(), 0);
        assert_eq!(cpu.sc(), 10);
    }

    #[test]
    fn test_nmi_zero_does_not_loop() {
        let mut cpu = cpu_with_program(&[0o7411]);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.ac(), 0);
        assert_eq!(cpu.sc(), 0);
    }

    #[test]
    fn test_nmi_mode_b_clears_minus_zero() {
        let mut cpu = cpu_with_program(&[0o7411]);
        enter_mode_b(&mut cpu);
        cpu.set_ac(0o6000);
        cpu.set_mq(0);
        run_to_halt(&mut cpu);
        // Normalizes to 4000'0000, which mode B clears to keep
        // floating-point minus zero out of the mantissa.
        assert_eq!(cpu.ac(), 0);
        assert_eq!(cpu.sc(), 1);
    }

    #[test]
    fn test_scl_loads_complemented_count() {
        let mut cpu = cpu_with_program(&[0o7403, 0o7772]); // SCL
        run_to_halt(&mut cpu);
        assert_eq!(cpu.sc(), 0o05);
        assert_eq!(cpu.pc(), 0o0203);
    }

    #[test]
    fn test_acs_mode_b_loads_sc_from_ac() {
        let mut cpu = cpu_with_program(&[0o7403]); // ACS in mode B
        enter_mode_b(&mut cpu);
        cpu.set_ac(0o0025);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.sc(), 0o25);
        assert_eq!(cpu.ac(), 0);
    }

    #[test]
    fn test_sca_ors_sc_into_ac() {
        let mut cpu = cpu_with_program(&[0o7441]); // SCA
        cpu.sc = 0o17;
        run_to_halt(&mut cpu);
        assert_eq!(cpu.ac(), 0o17);
    }

    #[test]
    fn test_shl_mode_a_shifts_one_extra() {
        let mut cpu = cpu_with_program(&[0o7413, 0o0001]); // SHL 1 (+1 in mode A)
        cpu.set_ac(0o0001);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.ac(), 0o0004);
        assert_eq!(cpu.sc(), 0);
    }

    #[test]
    fn test_shl_mode_b_exact_count() {
        let mut cpu = cpu_with_program(&[0o7413, 0o0001]);
        enter_mode_b(&mut cpu);
        cpu.set_ac(0o0001);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.ac(), 0o0002);
        assert_eq!(cpu.sc(), 0o37);
    }

    #[test]
    fn test_asr_sign_extends() {
        let mut cpu = cpu_with_program(&[0o7415, 0o0002]); // ASR 2 (+1 in mode A)
        cpu.set_ac(0o4000); // negative
        run_to_halt(&mut cpu);
        // 4000'0000 >> 3 arithmetic = 7400'0000, link set from sign
        assert_eq!(cpu.ac(), 0o7400);
        assert!(cpu.link());
        assert_eq!(cpu.mq(), 0);
    }

    #[test]
    fn test_asr_mode_b_sets_gtf_from_last_bit_out() {
        let mut cpu = cpu_with_program(&[0o7415, 0o0001]); // ASR 1
        enter_mode_b(&mut cpu);
        cpu.set_mq(0o0001);
        run_to_halt(&mut cpu);
        assert!(cpu.gtf()); // the 1 shifted out
        assert_eq!(cpu.mq(), 0);
        assert_eq!(cpu.sc(), 0o37);
    }

    #[test]
    fn test_lsr_clears_link() {
        let mut cpu = cpu_with_program(&[0o7417, 0o0000]); // LSR 0 (+1 in mode A)
        cpu.set_ac(0o4001);
        cpu.set_link(true);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.ac(), 0o2000);
        assert!(!cpu.link());
        assert_eq!(cpu.mq(), 0o4000); // bit shifted into MQ
    }

    #[test]
    fn test_mode_a_sca_combines_with_low_row() {
        // Code 025 in mode A: SCA then SHL.
        let mut cpu = cpu_with_program(&[0o7453, 0o0000]); // SCA+SHL count 0(+1)
        cpu.sc = 0o03;
        run_to_halt(&mut cpu);
        // AC picked up SC (3), then the whole register shifted once.
        assert_eq!(cpu.ac(), 0o0006);
    }

    #[test]
    fn test_dad_double_add_with_carry() {
        // DAD (7443 in mode B): MQ'AC += M[EA]'M[EA+1]
        let mut cpu = cpu_with_program(&[0o7443, 0o0300]);
        enter_mode_b(&mut cpu);
        cpu.memory_mut().deposit(0o0300, 0o7777).unwrap(); // low word
        cpu.memory_mut().deposit(0o0301, 0o0001).unwrap(); // high word
        cpu.set_mq(0o0001); // low half
        cpu.set_ac(0o0000); // high half
        run_to_halt(&mut cpu);
        // 0001 + 7777 carries into the high half.
        assert_eq!(cpu.mq(), 0o0000);
        assert_eq!(cpu.ac(), 0o0002);
        assert_eq!(cpu.pc(), 0o0203);
    }

    #[test]
    fn test_dst_double_store() {
        let mut cpu = cpu_with_program(&[0o7445, 0o0300]); // DST
        enter_mode_b(&mut cpu);
        cpu.set_mq(0o1234);
        cpu.set_ac(0o5670);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.memory().read(0o0300), 0o1234);
        assert_eq!(cpu.memory().read(0o0301), 0o5670);
    }

    #[test]
    fn test_dad_pointer_auto_increments() {
        // Place DAD at 0007 so its pointer word sits in the auto-index
        // range at 0010.
        let mut cpu = Cpu::new();
        cpu.memory_mut().deposit(0o0007, 0o7443).unwrap(); // DAD
        cpu.memory_mut().deposit(0o0010, 0o0277).unwrap(); // pointer, pre-bump
        cpu.memory_mut().deposit(0o0011, 0o7402).unwrap(); // HLT
        cpu.memory_mut().deposit(0o0300, 0o0005).unwrap();
        cpu.memory_mut().deposit(0o0301, 0o0000).unwrap();
        enter_mode_b(&mut cpu);
        cpu.set_boot_pc(0o0007);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.memory().read(0o0010), 0o0300); // bumped before use
        assert_eq!(cpu.mq(), 0o0005);
    }

    #[test]
    fn test_dpsz_skips_on_double_zero() {
        let mut cpu = cpu_with_program(&[0o7451, 0o7001]); // DPSZ / IAC
        enter_mode_b(&mut cpu);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.ac(), 0); // IAC skipped

        let mut cpu = cpu_with_program(&[0o7451, 0o7001]);
        enter_mode_b(&mut cpu);
        cpu.set_mq(0o0001);
        run_to_halt(&mut cpu);
        assert_eq!(cpu.ac(), 1); // not skipped
    }

    #[test]
    fn test_dpic_increments_double_word() {
        // DPIC must be microprogrammed with MQA MQL (7573).
        let mut cpu = cpu_with_program(&[0o7573]);
        enter_mode_b(&mut cpu);
        cpu.set_ac(0o0001); // high half before swap
        cpu.set_mq(0o7777); // low half before swap
        run_to_halt(&mut cpu);
        // 0001'7777 + 1 = 0002'0000
        assert_eq!(cpu.ac(), 0o0002);
        assert_eq!(cpu.mq(), 0o0000);
    }

    #[test]
    fn test_dcm_negates_double_word() {
        // DCM microprogrammed with MQA MQL (7575).
        let mut cpu = cpu_with_program(&[0o7575]);
        enter_mode_b(&mut cpu);
        cpu.set_ac(0o0001);
        cpu.set_mq(0o0000);
        run_to_halt(&mut cpu);
        // -(0001'0000) = 7777'0000 double-precision
        assert_eq!(cpu.ac(), 0o7777);
        assert_eq!(cpu.mq(), 0o0000);
    }

    #[test]
    fn test_sam_subtracts_and_sets_gtf() {
        let mut cpu = cpu_with_program(&[0o7457]); // SAM
        enter_mode_b(&mut cpu);
        cpu.set_ac(0o0002);
        cpu.set_mq(0o0005);
        run_to_halt(&mut cpu);
        // MQ - AC = 3, carry out sets the link
        assert_eq!(cpu.ac(), 0o0003);
        assert!(cpu.link());
        assert!(cpu.gtf()); // 2 <= 5, same sign
    }

    #[test]
    fn test_mode_a_clears_gtf_on_dispatch() {
        let mut cpu = cpu_with_program(&[0o7401]); // group 3 NOP
        cpu.gtf = true;
        run_to_halt(&mut cpu);
        assert!(!cpu.gtf());
    }
}
