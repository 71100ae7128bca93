//! Stack instruction family: PUSH, POP, PUSHF, POPF.
//!
//! All forms go through `Cpu::stack_push`/`Cpu::stack_pop`, which enforce
//! the downward-growth discipline and the overflow check against the end
//! of the code segment.

use crate::cpu::Cpu;
use crate::decoder::{process_modrm, sign_extend};
use crate::dispatch::{DispatchTable, HandlerParams, Op};
use crate::error::Result;
use crate::flags;
use crate::registers::GprIndex;

use super::{operand_str, read_operand, write_operand};

/// Register this family's opcodes.
pub fn register(table: &mut DispatchTable) {
    for r in 0..8u8 {
        table.register(0x50 + r, push_reg, HandlerParams::new(Op::Push).reg(r));
        table.register(0x58 + r, pop_reg, HandlerParams::new(Op::Pop).reg(r));
    }

    table.register(0x68, push_imm, HandlerParams::new(Op::Push));
    table.register(0x6A, push_imm, HandlerParams::new(Op::Push).byte_imm());

    table.register(0xFF, push_rm, HandlerParams::new(Op::Push).ext(6));
    table.register(0x8F, pop_rm, HandlerParams::new(Op::Pop).ext(0));

    table.register(0x9C, pushf, HandlerParams::new(Op::Pushf));
    table.register(0x9D, popf, HandlerParams::new(Op::Popf));
}

/// PUSH r with the register encoded in the opcode byte.
fn push_reg(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    let val = cpu.regs.read_gpr(p.reg, sz);
    cpu.stack_push(val, sz)?;

    cpu.trace(|| format!("push r{}({})", sz.bits(), p.reg));
    Ok(true)
}

/// POP r with the register encoded in the opcode byte.
fn pop_reg(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    let val = cpu.stack_pop(sz)?;
    cpu.regs.write_gpr(p.reg, sz, val);

    cpu.trace(|| format!("pop r{}({})", sz.bits(), p.reg));
    Ok(true)
}

/// PUSH imm (0x68) / PUSH imm8 sign-extended (0x6A).
fn push_imm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    let imm_sz = p.imm_size(sz);
    let imm = sign_extend(cpu.fetch_imm(imm_sz)?, imm_sz) & sz.mask();
    cpu.stack_push(imm, sz)?;

    cpu.trace(|| format!("push imm{}(0x{:X})", imm_sz.bits(), imm));
    Ok(true)
}

/// PUSH r/m (0xFF /6).
fn push_rm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let old_eip = cpu.eip;
    let sz = cpu.operand_size;
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    if p.ext != Some(r.location as u8) {
        cpu.eip = old_eip;
        return Ok(false);
    }

    let val = read_operand(cpu, &rm)?;
    cpu.stack_push(val, sz)?;

    cpu.trace(|| format!("push {}", operand_str(&rm)));
    Ok(true)
}

/// POP r/m (0x8F /0).
///
/// The stack read and the destination write both can fault, so ESP is
/// committed only after the destination write succeeded.
fn pop_rm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let old_eip = cpu.eip;
    let sz = cpu.operand_size;
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    if p.ext != Some(r.location as u8) {
        cpu.eip = old_eip;
        return Ok(false);
    }

    let esp = cpu.regs.read_gpr32(GprIndex::Esp as u8);
    let val = match sz {
        flags::OperandSize::Byte => cpu.mem.read_u8(esp)? as u32,
        flags::OperandSize::Word => cpu.mem.read_u16(esp)? as u32,
        flags::OperandSize::Dword => cpu.mem.read_u32(esp)?,
    };
    write_operand(cpu, &rm, val)?;
    cpu.regs
        .write_gpr32(GprIndex::Esp as u8, esp.wrapping_add(sz.bytes()));

    cpu.trace(|| format!("pop {}", operand_str(&rm)));
    Ok(true)
}

/// PUSHF — push EFLAGS.
fn pushf(cpu: &mut Cpu, _p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    let val = cpu.regs.eflags & sz.mask();
    cpu.stack_push(val, sz)?;

    cpu.trace(|| "pushf".to_string());
    Ok(true)
}

/// POPF — pop into EFLAGS.
///
/// Only the six modeled status flags are writable; everything else stays
/// reserved (bit 1 fixed to 1).
fn popf(cpu: &mut Cpu, _p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    let val = cpu.stack_pop(sz)?;
    cpu.regs.eflags = (val & flags::ARITH_MASK) | flags::EFLAGS_FIXED;

    cpu.trace(|| "popf".to_string());
    Ok(true)
}
