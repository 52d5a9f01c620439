//! Property tests for the architectural invariants.

use proptest::prelude::*;

use straight8_cpu::{Cpu, DeviceSet, NoEvents, StopReason, LAC_MASK};

/// Runs a single instruction (plus HLT) at 0200 with the given L'AC and
/// MQ, returning the CPU for inspection.
fn run_one(instruction: u16, lac: u32, mq: u16) -> Cpu {
    let mut cpu = Cpu::new();
    cpu.memory_mut()
        .load(0o0200, &[instruction, 0o7402, 0o7402])
        .unwrap();
    cpu.set_boot_pc(0o0200);
    cpu.set_ac((lac & 0o7777) as u16);
    cpu.set_link(lac & 0o10000 != 0);
    cpu.set_mq(mq);
    let reason = cpu.run(&mut DeviceSet::new(), &mut NoEvents).unwrap();
    assert_eq!(reason, StopReason::Halt);
    cpu
}

proptest! {
    /// TAD always produces a 13-bit L'AC with the carry folded in.
    #[test]
    fn prop_tad_is_mod_2_13(lac in 0u32..0o20000, operand in 0u16..0o10000) {
        let mut cpu = Cpu::new();
        cpu.memory_mut().load(0o0200, &[0o1203, 0o7402]).unwrap();
        cpu.memory_mut().deposit(0o0203, operand).unwrap();
        cpu.set_boot_pc(0o0200);
        cpu.set_ac((lac & 0o7777) as u16);
        cpu.set_link(lac & 0o10000 != 0);
        cpu.run(&mut DeviceSet::new(), &mut NoEvents).unwrap();
        prop_assert_eq!(cpu.lac(), (lac + u32::from(operand)) & LAC_MASK);
        prop_assert!(cpu.lac() <= LAC_MASK);
    }

    /// RTL then RTR (and RAL then RAR) restore the original L'AC.
    #[test]
    fn prop_rotates_invert(lac in 0u32..0o20000) {
        for (left, right) in [(0o7006u16, 0o7012u16), (0o7004, 0o7010)] {
            let cpu = run_one(left, lac, 0);
            let cpu = run_one(right, cpu.lac(), 0);
            prop_assert_eq!(cpu.lac(), lac);
        }
    }

    /// BSW twice is the identity.
    #[test]
    fn prop_bsw_involution(lac in 0u32..0o20000) {
        let cpu = run_one(0o7002, lac, 0);
        let cpu = run_one(0o7002, cpu.lac(), 0);
        prop_assert_eq!(cpu.lac(), lac);
    }

    /// CMA twice is the identity and never touches the link.
    #[test]
    fn prop_cma_involution(lac in 0u32..0o20000) {
        let once = run_one(0o7040, lac, 0);
        prop_assert_eq!(once.lac() & 0o10000, lac & 0o10000);
        let twice = run_one(0o7040, once.lac(), 0);
        prop_assert_eq!(twice.lac(), lac);
    }

    /// The reverse-skip bit inverts any non-empty skip condition.
    #[test]
    fn prop_group2_reverse_skip(
        lac in 0u32..0o20000,
        conditions in 1u16..8, // SMA/SZA/SNL selector bits
    ) {
        let base = 0o7400 | (conditions << 4);
        let plain = run_one(base, lac, 0);
        let reversed = run_one(base | 0o10, lac, 0);
        // Exactly one of the two skipped its successor: the skipping
        // run halts one word later.
        prop_assert_ne!(plain.pc(), reversed.pc());
    }

    /// MUY decomposes the 24-bit product exactly.
    #[test]
    fn prop_muy_decomposition(mq in 0u16..0o10000, multiplier in 0u16..0o10000, ac in 0u16..0o10000) {
        let mut cpu = Cpu::new();
        cpu.memory_mut().load(0o0200, &[0o7405, multiplier, 0o7402]).unwrap();
        cpu.set_boot_pc(0o0200);
        cpu.set_ac(ac);
        cpu.set_mq(mq);
        cpu.run(&mut DeviceSet::new(), &mut NoEvents).unwrap();
        let expected = u32::from(mq) * u32::from(multiplier) + u32::from(ac);
        prop_assert_eq!((u32::from(cpu.ac()) << 12) | u32::from(cpu.mq()), expected);
        prop_assert_eq!(cpu.sc(), 0o14);
    }

    /// When no divide overflow occurs, quotient and remainder recompose
    /// the dividend.
    #[test]
    fn prop_dvi_round_trip(ac in 0u16..0o10000, mq in 0u16..0o10000, divisor in 1u16..0o10000) {
        prop_assume!(ac < divisor);
        let mut cpu = Cpu::new();
        cpu.memory_mut().load(0o0200, &[0o7407, divisor, 0o7402]).unwrap();
        cpu.set_boot_pc(0o0200);
        cpu.set_ac(ac);
        cpu.set_mq(mq);
        cpu.run(&mut DeviceSet::new(), &mut NoEvents).unwrap();
        let dividend = (u32::from(ac) << 12) | u32::from(mq);
        let recomposed = u32::from(cpu.mq()) * u32::from(divisor) + cpu.lac();
        prop_assert_eq!(recomposed, dividend);
        prop_assert!(!cpu.link());
    }

    /// Divide overflow always sets the link and zeroes the counter.
    #[test]
    fn prop_dvi_overflow(ac in 0u16..0o10000, mq in 0u16..0o10000, divisor in 0u16..0o10000) {
        prop_assume!(ac >= divisor);
        let mut cpu = Cpu::new();
        cpu.memory_mut().load(0o0200, &[0o7407, divisor, 0o7402]).unwrap();
        cpu.set_boot_pc(0o0200);
        cpu.set_ac(ac);
        cpu.set_mq(mq);
        cpu.run(&mut DeviceSet::new(), &mut NoEvents).unwrap();
        prop_assert!(cpu.link());
        prop_assert_eq!(cpu.sc(), 0);
    }

    /// PC stays in-field across arbitrary single operate instructions.
    #[test]
    fn prop_pc_stays_twelve_bit(ir in 0o7000u16..0o7777, lac in 0u32..0o20000, mq in 0u16..0o10000) {
        // Exclude HLT shapes so the program reaches its own HLT, and
        // group 3 rows with in-line operands.
        prop_assume!(ir & 0o400 == 0 || (ir & 0o2 == 0 && ir & 0o1 == 0));
        let cpu = run_one(ir, lac, mq);
        prop_assert!(cpu.pc() <= 0o7777);
        prop_assert!(cpu.lac() <= LAC_MASK);
    }
}
