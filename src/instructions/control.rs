//! Control-flow instruction family: JMP, Jcc, CALL, RET, plus NOP, HLT,
//! and the carry-flag instructions CLC/STC/CMC.
//!
//! Relative branch targets are computed from the EIP of the *next*
//! instruction, which is where EIP already points once the displacement
//! has been fetched.

use crate::cpu::Cpu;
use crate::decoder::{process_modrm, sign_extend};
use crate::dispatch::{DispatchTable, HandlerParams, Op};
use crate::error::{Result, VmError};
use crate::flags::{self, OperandSize};
use crate::registers::GprIndex;

use super::{operand_str, read_operand};

/// Mnemonics for the sixteen Jcc condition codes.
const CC_NAMES: [&str; 16] = [
    "jo", "jno", "jb", "jae", "je", "jne", "jbe", "ja", "js", "jns", "jp", "jnp", "jl", "jge",
    "jle", "jg",
];

/// Register this family's opcodes.
pub fn register(table: &mut DispatchTable) {
    table.register(0xEB, jmp_rel, HandlerParams::new(Op::Jmp).byte_imm());
    table.register(0xE9, jmp_rel, HandlerParams::new(Op::Jmp));
    table.register(0xE8, call_rel, HandlerParams::new(Op::Call));

    for cc in 0..16u8 {
        table.register(0x70 + cc, jcc_rel8, HandlerParams::new(Op::Jcc).reg(cc));
    }

    table.register(0xFF, call_rm, HandlerParams::new(Op::Call).ext(2));
    table.register(0xFF, jmp_rm, HandlerParams::new(Op::Jmp).ext(4));

    table.register(0xC3, ret, HandlerParams::new(Op::Ret));
    table.register(0xC2, ret_imm, HandlerParams::new(Op::Ret));

    table.register(0x90, nop, HandlerParams::new(Op::Nop));
    table.register(0xF4, hlt, HandlerParams::new(Op::Hlt));

    table.register(0xF8, carry_flag, HandlerParams::new(Op::Clc));
    table.register(0xF9, carry_flag, HandlerParams::new(Op::Stc));
    table.register(0xF5, carry_flag, HandlerParams::new(Op::Cmc));
}

/// JMP rel8 (0xEB) / rel16-32 (0xE9).
fn jmp_rel(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    let rel_sz = p.imm_size(sz);
    let rel = sign_extend(cpu.fetch_imm(rel_sz)?, rel_sz);
    cpu.eip = cpu.eip.wrapping_add(rel);
    if sz == OperandSize::Word {
        cpu.eip &= 0xFFFF;
    }

    cpu.trace(|| format!("jmp rel{}(0x{:X})", rel_sz.bits(), rel));
    Ok(true)
}

/// Jcc rel8 (0x70-0x7F).
fn jcc_rel8(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let rel = sign_extend(cpu.fetch_u8()? as u32, OperandSize::Byte);
    let taken = flags::eval_cc(p.reg, cpu.regs.eflags);
    if taken {
        cpu.eip = cpu.eip.wrapping_add(rel);
    }

    cpu.trace(|| format!("{} rel8(0x{:X})", CC_NAMES[p.reg as usize], rel));
    Ok(true)
}

/// CALL rel16-32 (0xE8): push the return address, then branch.
fn call_rel(cpu: &mut Cpu, _p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    let rel = sign_extend(cpu.fetch_imm(sz)?, sz);
    cpu.stack_push(cpu.eip, sz)?;
    cpu.eip = cpu.eip.wrapping_add(rel);
    if sz == OperandSize::Word {
        cpu.eip &= 0xFFFF;
    }

    cpu.trace(|| format!("call rel{}(0x{:X})", sz.bits(), rel));
    Ok(true)
}

/// CALL r/m (0xFF /2).
fn call_rm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let old_eip = cpu.eip;
    let sz = cpu.operand_size;
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    if p.ext != Some(r.location as u8) {
        cpu.eip = old_eip;
        return Ok(false);
    }

    let target = read_operand(cpu, &rm)?;
    cpu.stack_push(cpu.eip, sz)?;
    cpu.eip = target;

    cpu.trace(|| format!("call {}", operand_str(&rm)));
    Ok(true)
}

/// JMP r/m (0xFF /4).
fn jmp_rm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let old_eip = cpu.eip;
    let sz = cpu.operand_size;
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    if p.ext != Some(r.location as u8) {
        cpu.eip = old_eip;
        return Ok(false);
    }

    let target = read_operand(cpu, &rm)?;
    cpu.eip = target;

    cpu.trace(|| format!("jmp {}", operand_str(&rm)));
    Ok(true)
}

/// RET near (0xC3).
fn ret(cpu: &mut Cpu, _p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    cpu.eip = cpu.stack_pop(sz)?;

    cpu.trace(|| "ret".to_string());
    Ok(true)
}

/// RET near, releasing `imm16` bytes of caller arguments (0xC2).
fn ret_imm(cpu: &mut Cpu, _p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    let imm = cpu.fetch_u16()? as u32;
    cpu.eip = cpu.stack_pop(sz)?;
    let esp = cpu.regs.read_gpr32(GprIndex::Esp as u8).wrapping_add(imm);
    cpu.regs.write_gpr32(GprIndex::Esp as u8, esp);

    cpu.trace(|| format!("ret imm16(0x{:X})", imm));
    Ok(true)
}

/// NOP (0x90).
fn nop(cpu: &mut Cpu, _p: HandlerParams) -> Result<bool> {
    cpu.trace(|| "nop".to_string());
    Ok(true)
}

/// HLT (0xF4). Surfaces as `VmError::Halted`; EIP already points past the
/// instruction, so a later `run` resumes after it.
fn hlt(cpu: &mut Cpu, _p: HandlerParams) -> Result<bool> {
    cpu.trace(|| "hlt".to_string());
    Err(VmError::Halted)
}

/// CLC/STC/CMC — clear, set, or complement CF.
fn carry_flag(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    match p.op {
        Op::Clc => cpu.regs.set_flag(flags::CF, false),
        Op::Stc => cpu.regs.set_flag(flags::CF, true),
        Op::Cmc => cpu.regs.eflags ^= flags::CF,
        _ => unreachable!(),
    }

    cpu.trace(|| super::mnemonic(p.op, false).to_string());
    Ok(true)
}
