//! End-to-end execution scenarios: byte images loaded at address 0 with
//! EIP = 0 and a 32-bit operand size, stepped through the dispatch loop.

mod common;

use common::{cpu_with_code, step_ok, MEM_SIZE};
use corevm32::{flags, Cpu, ExitReason, GprIndex, OperandSize, VmError};

// ── Single-instruction scenarios ──

#[test]
fn s1_and_eax_imm32() {
    // AND EAX, 0x0000000F: 25 0F 00 00 00
    let mut cpu = cpu_with_code(&[0x25, 0x0F, 0x00, 0x00, 0x00]);
    cpu.regs.write_gpr32(0, 0xFFFF_FFFF);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 0x0000_000F);
    assert!(!cpu.regs.flag(flags::ZF));
    assert!(!cpu.regs.flag(flags::SF));
    assert!(cpu.regs.flag(flags::PF)); // 0x0F has four bits set
    assert!(!cpu.regs.flag(flags::CF));
    assert!(!cpu.regs.flag(flags::OF));
    assert_eq!(cpu.eip, 5);
}

#[test]
fn s2_test_al_imm8() {
    // TEST AL, 0x80: A8 80
    let mut cpu = cpu_with_code(&[0xA8, 0x80]);
    cpu.regs.write_gpr32(0, 0x80);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 0x80); // destination untouched
    assert!(cpu.regs.flag(flags::SF));
    assert!(!cpu.regs.flag(flags::ZF));
    assert!(!cpu.regs.flag(flags::PF)); // one bit set
    assert!(!cpu.regs.flag(flags::CF));
    assert!(!cpu.regs.flag(flags::OF));
}

#[test]
fn s3_xor_ebx_ebx() {
    // XOR EBX, EBX: 31 DB
    let mut cpu = cpu_with_code(&[0x31, 0xDB]);
    cpu.regs.write_gpr32(3, 0x1234_5678);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(3), 0);
    assert!(cpu.regs.flag(flags::ZF));
    assert!(!cpu.regs.flag(flags::SF));
    assert!(cpu.regs.flag(flags::PF));
    assert!(!cpu.regs.flag(flags::CF));
    assert!(!cpu.regs.flag(flags::OF));
}

#[test]
fn s4_neg_eax() {
    // NEG EAX: F7 D8 (/3)
    let mut cpu = cpu_with_code(&[0xF7, 0xD8]);
    cpu.regs.write_gpr32(0, 1);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 0xFFFF_FFFF);
    assert!(cpu.regs.flag(flags::CF));
    assert!(cpu.regs.flag(flags::SF));
    assert!(!cpu.regs.flag(flags::ZF));
}

#[test]
fn s5_not_al_leaves_flags() {
    // NOT AL: F6 D0 (/2)
    let mut cpu = cpu_with_code(&[0xF6, 0xD0]);
    cpu.regs.write_gpr8(0, 0xAA);
    cpu.regs.set_flag(flags::CF, true);
    cpu.regs.set_flag(flags::ZF, true);
    cpu.regs.set_flag(flags::OF, true);
    let eflags_before = cpu.regs.eflags;
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr8(0), 0x55);
    assert_eq!(cpu.regs.eflags, eflags_before);
}

#[test]
fn s6_shl_eax_1() {
    // SHL EAX, 1: D1 E0 (/4)
    let mut cpu = cpu_with_code(&[0xD1, 0xE0]);
    cpu.regs.write_gpr32(0, 0x4000_0000);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 0x8000_0000);
    assert!(!cpu.regs.flag(flags::CF)); // bit shifted out was 0
    assert!(cpu.regs.flag(flags::OF)); // MSB(result) XOR CF
    assert!(cpu.regs.flag(flags::SF));
    assert!(!cpu.regs.flag(flags::ZF));
}

// ── Handler rollback (extension-vector contract) ──

#[test]
fn rejected_extension_restores_all_state() {
    // F6 /4 is MUL, which no registered family implements: TEST (/0 /1),
    // NOT (/2), and NEG (/3) must all decline and restore EIP, leaving
    // InvalidOpcode with no state change.
    let mut cpu = cpu_with_code(&[0xF6, 0xE0]);
    cpu.regs.write_gpr32(0, 0xDEAD_BEEF);
    cpu.regs.set_flag(flags::CF, true);
    let eflags_before = cpu.regs.eflags;
    let gpr_before = cpu.regs.gpr;

    let err = cpu.step().unwrap_err();
    assert_eq!(err, VmError::InvalidOpcode(0xF6));
    assert_eq!(cpu.eip, 0, "EIP must be restored to the instruction start");
    assert_eq!(cpu.regs.gpr, gpr_before);
    assert_eq!(cpu.regs.eflags, eflags_before);
    let mut byte = [0u8; 1];
    cpu.mem.read_bytes(1, &mut byte).unwrap();
    assert_eq!(byte[0], 0xE0, "memory must be untouched");
}

#[test]
fn unregistered_opcode_is_invalid() {
    // 0x0F introduces the two-byte map, which is out of scope.
    let mut cpu = cpu_with_code(&[0x0F, 0xAF, 0xC0]);
    assert_eq!(cpu.step().unwrap_err(), VmError::InvalidOpcode(0x0F));
    assert_eq!(cpu.eip, 0);
}

// ── Shared-opcode dispatch ──

#[test]
fn group1_hosts_arith_and_bitwise() {
    // OR AL, 0x0F: 80 C8 0F (/1)
    let mut cpu = cpu_with_code(&[0x80, 0xC8, 0x0F]);
    cpu.regs.write_gpr8(0, 0xA0);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr8(0), 0xAF);

    // ADD EAX, -1 (sign-extended imm8): 83 C0 FF (/0)
    let mut cpu = cpu_with_code(&[0x83, 0xC0, 0xFF]);
    cpu.regs.write_gpr32(0, 5);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 4);
    assert!(cpu.regs.flag(flags::CF)); // 5 + 0xFFFFFFFF wraps

    // AND EBX, 0x0000FF00: 81 E3 00 FF 00 00 (/4)
    let mut cpu = cpu_with_code(&[0x81, 0xE3, 0x00, 0xFF, 0x00, 0x00]);
    cpu.regs.write_gpr32(3, 0x1234_5678);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(3), 0x0000_5600);

    // CMP EAX, 3: 83 F8 03 (/7) — result discarded
    let mut cpu = cpu_with_code(&[0x83, 0xF8, 0x03]);
    cpu.regs.write_gpr32(0, 3);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 3);
    assert!(cpu.regs.flag(flags::ZF));
}

#[test]
fn group5_hosts_three_families() {
    // INC EAX: FF C0 (/0)
    let mut cpu = cpu_with_code(&[0xFF, 0xC0]);
    cpu.regs.write_gpr32(0, 41);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 42);

    // PUSH ESI: FF F6 (/6)
    let mut cpu = cpu_with_code(&[0xFF, 0xF6]);
    cpu.regs.write_gpr32(GprIndex::Esi as u8, 0xCAFE_BABE);
    let esp_before = cpu.regs.read_gpr32(GprIndex::Esp as u8);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(GprIndex::Esp as u8), esp_before - 4);
    assert_eq!(cpu.stack_pop(OperandSize::Dword).unwrap(), 0xCAFE_BABE);

    // JMP EAX: FF E0 (/4)
    let mut cpu = cpu_with_code(&[0xFF, 0xE0]);
    cpu.regs.write_gpr32(0, 0x100);
    step_ok(&mut cpu);
    assert_eq!(cpu.eip, 0x100);
}

// ── Carry-chained arithmetic ──

#[test]
fn adc_with_all_ones_operand_and_carry_in() {
    // STC; ADC EAX, EBX: F9 11 D8 — 0 + 0xFFFFFFFF + CF wraps to zero.
    let mut cpu = cpu_with_code(&[0xF9, 0x11, 0xD8]);
    cpu.regs.write_gpr32(3, 0xFFFF_FFFF);
    step_ok(&mut cpu); // STC
    step_ok(&mut cpu); // ADC
    assert_eq!(cpu.regs.read_gpr32(0), 0);
    assert!(cpu.regs.flag(flags::CF));
    assert!(cpu.regs.flag(flags::ZF));
    assert!(cpu.regs.flag(flags::AF), "0x0 + 0xF + 1 carries out of bit 3");
    assert!(!cpu.regs.flag(flags::SF));
    assert!(!cpu.regs.flag(flags::OF));
}

#[test]
fn adc_group1_signed_overflow() {
    // STC; ADC EAX, 1 (sign-extended imm8, /2): F9 83 D0 01
    let mut cpu = cpu_with_code(&[0xF9, 0x83, 0xD0, 0x01]);
    cpu.regs.write_gpr32(0, 0x7FFF_FFFE);
    step_ok(&mut cpu); // STC
    step_ok(&mut cpu); // ADC
    assert_eq!(cpu.regs.read_gpr32(0), 0x8000_0000);
    assert!(!cpu.regs.flag(flags::CF));
    assert!(cpu.regs.flag(flags::OF));
    assert!(cpu.regs.flag(flags::SF));
    assert!(cpu.regs.flag(flags::AF)); // 0xE + 1 + 1 carries out of bit 3
    assert!(!cpu.regs.flag(flags::ZF));
}

#[test]
fn sbb_with_all_ones_operand_and_borrow_in() {
    // STC; SBB EAX, EBX: F9 19 D8 — 5 - 0xFFFFFFFF - CF wraps back to 5.
    let mut cpu = cpu_with_code(&[0xF9, 0x19, 0xD8]);
    cpu.regs.write_gpr32(0, 5);
    cpu.regs.write_gpr32(3, 0xFFFF_FFFF);
    step_ok(&mut cpu); // STC
    step_ok(&mut cpu); // SBB
    assert_eq!(cpu.regs.read_gpr32(0), 5);
    assert!(cpu.regs.flag(flags::CF));
    assert!(cpu.regs.flag(flags::AF), "low nibble 0x5 - 0xF - 1 borrows");
    assert!(!cpu.regs.flag(flags::ZF));
    assert!(!cpu.regs.flag(flags::SF));
    assert!(!cpu.regs.flag(flags::OF));
}

#[test]
fn sbb_group1_borrow_through_zero() {
    // STC; SBB EAX, 1 (/3): F9 83 D8 01 — 1 - 1 - CF underflows.
    let mut cpu = cpu_with_code(&[0xF9, 0x83, 0xD8, 0x01]);
    cpu.regs.write_gpr32(0, 1);
    step_ok(&mut cpu); // STC
    step_ok(&mut cpu); // SBB
    assert_eq!(cpu.regs.read_gpr32(0), 0xFFFF_FFFF);
    assert!(cpu.regs.flag(flags::CF));
    assert!(cpu.regs.flag(flags::SF));
    assert!(cpu.regs.flag(flags::AF));
    assert!(!cpu.regs.flag(flags::ZF));
    assert!(!cpu.regs.flag(flags::OF));
}

// ── Stack discipline ──

#[test]
fn push_pop_roundtrip() {
    // PUSH EAX; POP EBX: 50 5B
    let mut cpu = cpu_with_code(&[0x50, 0x5B]);
    cpu.regs.write_gpr32(0, 0x1122_3344);
    let esp_before = cpu.regs.read_gpr32(GprIndex::Esp as u8);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(GprIndex::Esp as u8), esp_before - 4);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(3), 0x1122_3344);
    assert_eq!(cpu.regs.read_gpr32(GprIndex::Esp as u8), esp_before);
}

#[test]
fn push_below_code_segment_overflows() {
    // A CPU whose memory is nearly all code: ESP sits just past the image,
    // so one push must fault without changing any state.
    let mut cpu = Cpu::new(16);
    cpu.load(0, &[0x50; 14]).unwrap(); // code_segment_end = 14, ESP = 15
    let esp_before = cpu.regs.read_gpr32(GprIndex::Esp as u8);
    let err = cpu.step().unwrap_err();
    assert!(matches!(err, VmError::StackOverflow { .. }));
    assert_eq!(cpu.regs.read_gpr32(GprIndex::Esp as u8), esp_before);
    assert_eq!(cpu.eip, 0);
}

#[test]
fn pushf_popf_roundtrip() {
    // STC; PUSHF; CLC; POPF: F9 9C F8 9D
    let mut cpu = cpu_with_code(&[0xF9, 0x9C, 0xF8, 0x9D]);
    step_ok(&mut cpu); // STC
    assert!(cpu.regs.flag(flags::CF));
    step_ok(&mut cpu); // PUSHF
    step_ok(&mut cpu); // CLC
    assert!(!cpu.regs.flag(flags::CF));
    step_ok(&mut cpu); // POPF
    assert!(cpu.regs.flag(flags::CF));
    assert_eq!(cpu.regs.eflags & flags::EFLAGS_FIXED, flags::EFLAGS_FIXED);
}

// ── Control flow ──

#[test]
fn jcc_taken_and_not_taken() {
    // XOR EAX, EAX; JE +2; MOV AL, 1; HLT
    let mut cpu = cpu_with_code(&[0x31, 0xC0, 0x74, 0x02, 0xB0, 0x01, 0xF4]);
    assert_eq!(cpu.run(0), ExitReason::Halted);
    assert_eq!(cpu.regs.read_gpr8(0), 0, "JE must skip the MOV");

    // With ZF clear the branch falls through.
    let mut cpu = cpu_with_code(&[0xA8, 0x01, 0x74, 0x02, 0xB0, 0x07, 0xF4]);
    cpu.regs.write_gpr8(0, 1); // TEST AL,1 -> ZF=0
    assert_eq!(cpu.run(0), ExitReason::Halted);
    assert_eq!(cpu.regs.read_gpr8(0), 7);
}

#[test]
fn call_and_ret() {
    // 0: CALL +2 (to 7); 5: HLT; 6: NOP; 7: MOV AL, 42; 9: RET
    let code = [0xE8, 0x02, 0x00, 0x00, 0x00, 0xF4, 0x90, 0xB0, 0x2A, 0xC3];
    let mut cpu = cpu_with_code(&code);
    let esp_before = cpu.regs.read_gpr32(GprIndex::Esp as u8);
    assert_eq!(cpu.run(0), ExitReason::Halted);
    assert_eq!(cpu.regs.read_gpr8(0), 42);
    assert_eq!(cpu.regs.read_gpr32(GprIndex::Esp as u8), esp_before);
    assert_eq!(cpu.eip, 6, "halted past the HLT at 5");
}

#[test]
fn run_respects_instruction_limit() {
    // JMP -2 (tight loop): EB FE
    let mut cpu = cpu_with_code(&[0xEB, 0xFE]);
    assert_eq!(cpu.run(5), ExitReason::InstructionLimit);
    assert_eq!(cpu.instruction_count, 5);
}

#[test]
fn request_stop_wins_over_execution() {
    let mut cpu = cpu_with_code(&[0xEB, 0xFE]);
    cpu.request_stop();
    assert_eq!(cpu.run(0), ExitReason::StopRequested);
    assert_eq!(cpu.instruction_count, 0);
}

// ── Prefixes and addressing ──

#[test]
fn operand_size_prefix_keeps_upper_half() {
    // ADD AX, 0x1234: 66 05 34 12
    let mut cpu = cpu_with_code(&[0x66, 0x05, 0x34, 0x12]);
    cpu.regs.write_gpr32(0, 0xAAAA_0000);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 0xAAAA_1234);
    assert_eq!(cpu.eip, 4);
}

#[test]
fn address_size_prefix_uses_16bit_forms() {
    // MOV EAX, [BX]: 67 8B 07 (16-bit ModR/M rm=111 = [BX])
    let mut cpu = cpu_with_code(&[0x67, 0x8B, 0x07]);
    cpu.regs.write_gpr16(GprIndex::Ebx as u8, 0x200);
    cpu.mem.write_u32(0x200, 0x5566_7788).unwrap();
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 0x5566_7788);
}

#[test]
fn memory_operand_via_sib() {
    // ADD [ECX + EDX*4 + 0x10], EAX: 01 44 91 10
    let mut cpu = cpu_with_code(&[0x01, 0x44, 0x91, 0x10]);
    cpu.regs.write_gpr32(1, 0x400);
    cpu.regs.write_gpr32(2, 0x04);
    cpu.regs.write_gpr32(0, 7);
    cpu.mem.write_u32(0x420, 35).unwrap();
    step_ok(&mut cpu);
    assert_eq!(cpu.mem.read_u32(0x420).unwrap(), 42);
}

// ── Data movement ──

#[test]
fn mov_moffs_and_reg_imm() {
    // MOV EAX, [0x500]: A1 00 05 00 00
    let mut cpu = cpu_with_code(&[0xA1, 0x00, 0x05, 0x00, 0x00]);
    cpu.mem.write_u32(0x500, 0x0BAD_F00D).unwrap();
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 0x0BAD_F00D);

    // MOV BH, 0x7F: B7 7F
    let mut cpu = cpu_with_code(&[0xB7, 0x7F]);
    cpu.regs.write_gpr32(3, 0x1111_1111);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(3), 0x1111_7F11);
}

#[test]
fn lea_computes_address_without_memory_access() {
    // LEA EAX, [ECX + EDX*4 + 0x10]: 8D 44 91 10 — the address is far out
    // of bounds, which must not matter.
    let mut cpu = cpu_with_code(&[0x8D, 0x44, 0x91, 0x10]);
    cpu.regs.write_gpr32(1, 0xFFFF_0000);
    cpu.regs.write_gpr32(2, 0x1000);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 0xFFFF_0000u32.wrapping_add(0x4000) + 0x10);

    // LEA with a register-direct r/m is malformed: 8D C1
    let mut cpu = cpu_with_code(&[0x8D, 0xC1]);
    assert_eq!(cpu.step().unwrap_err(), VmError::InvalidEncoding(0x8D));
    assert_eq!(cpu.eip, 0);
}

#[test]
fn xchg_swaps_both_ways() {
    // XCHG EBX, ECX... via r/m form: 87 CB (rm=EBX, reg=ECX)
    let mut cpu = cpu_with_code(&[0x87, 0xCB]);
    cpu.regs.write_gpr32(3, 1);
    cpu.regs.write_gpr32(1, 2);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(3), 2);
    assert_eq!(cpu.regs.read_gpr32(1), 1);

    // XCHG EAX, EDI: 97
    let mut cpu = cpu_with_code(&[0x97]);
    cpu.regs.write_gpr32(0, 10);
    cpu.regs.write_gpr32(7, 20);
    step_ok(&mut cpu);
    assert_eq!(cpu.regs.read_gpr32(0), 20);
    assert_eq!(cpu.regs.read_gpr32(7), 10);
}

// ── Faults ──

#[test]
fn memory_fault_aborts_without_side_effects() {
    // MOV EAX, [0xFFFF0000]: A1 00 00 FF FF — address out of bounds.
    let mut cpu = cpu_with_code(&[0xA1, 0x00, 0x00, 0xFF, 0xFF]);
    cpu.regs.write_gpr32(0, 0x55);
    let err = cpu.step().unwrap_err();
    assert!(matches!(err, VmError::OutOfBounds { .. }));
    assert_eq!(cpu.eip, 0);
    assert_eq!(cpu.regs.read_gpr32(0), 0x55);
}

#[test]
fn fetch_past_end_of_memory_faults() {
    let mut cpu = cpu_with_code(&[0x90]);
    cpu.set_eip(MEM_SIZE as u32);
    assert!(matches!(
        cpu.step().unwrap_err(),
        VmError::OutOfBounds { .. }
    ));
}

// ── Debug trace ──

#[test]
fn trace_records_mnemonic_and_size() {
    let mut cpu = cpu_with_code(&[0x25, 0x0F, 0x00, 0x00, 0x00]);
    cpu.trace_enabled = true;
    cpu.regs.write_gpr32(0, 0xFFFF_FFFF);
    step_ok(&mut cpu);
    let line = cpu.last_disasm.clone().unwrap();
    assert!(line.starts_with("and "), "got: {line}");
    assert!(line.contains("eax"));
    assert!(line.contains("imm32"));

    // SHL EAX, CL: D3 E0
    let mut cpu = cpu_with_code(&[0xD3, 0xE0]);
    cpu.trace_enabled = true;
    cpu.regs.write_gpr8(1, 3);
    step_ok(&mut cpu);
    let line = cpu.last_disasm.clone().unwrap();
    assert!(line.starts_with("shl "), "got: {line}");
    assert!(line.contains("r32(0)"));
    assert!(line.contains("cl"));

    // NEG byte [0x20]: F6 1D 20 00 00 00
    let mut cpu = cpu_with_code(&[0xF6, 0x1D, 0x20, 0x00, 0x00, 0x00]);
    cpu.trace_enabled = true;
    step_ok(&mut cpu);
    let line = cpu.last_disasm.clone().unwrap();
    assert!(line.starts_with("neg "), "got: {line}");
    assert!(line.contains("m8(0x20)"));
}

#[test]
fn trace_disabled_records_nothing() {
    let mut cpu = cpu_with_code(&[0x90]);
    step_ok(&mut cpu);
    assert!(cpu.last_disasm.is_none());
}
