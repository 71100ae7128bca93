//! Data-movement instruction family: MOV, XCHG, LEA.
//!
//! None of these touch EFLAGS.

use crate::cpu::Cpu;
use crate::decoder::{process_modrm, OperandKind};
use crate::dispatch::{DispatchTable, HandlerParams, Op};
use crate::error::{Result, VmError};
use crate::flags::OperandSize;
use crate::registers::GprIndex;

use super::{acc_name, operand_str, read_operand, write_operand};

/// Register this family's opcodes.
pub fn register(table: &mut DispatchTable) {
    // MOV r/m, r and MOV r, r/m
    table.register(0x88, mov_rm_r, HandlerParams::new(Op::Mov).byte());
    table.register(0x89, mov_rm_r, HandlerParams::new(Op::Mov));
    table.register(0x8A, mov_r_rm, HandlerParams::new(Op::Mov).byte());
    table.register(0x8B, mov_r_rm, HandlerParams::new(Op::Mov));

    // LEA r, m
    table.register(0x8D, lea, HandlerParams::new(Op::Lea));

    // MOV accumulator <-> moffs
    table.register(0xA0, moffs_load, HandlerParams::new(Op::Mov).byte());
    table.register(0xA1, moffs_load, HandlerParams::new(Op::Mov));
    table.register(0xA2, moffs_store, HandlerParams::new(Op::Mov).byte());
    table.register(0xA3, moffs_store, HandlerParams::new(Op::Mov));

    // MOV r, imm with the register in the opcode byte
    for r in 0..8u8 {
        table.register(0xB0 + r, mov_reg_imm, HandlerParams::new(Op::Mov).byte().reg(r));
        table.register(0xB8 + r, mov_reg_imm, HandlerParams::new(Op::Mov).reg(r));
    }

    // MOV r/m, imm (Group 11, /0 only)
    table.register(0xC6, mov_rm_imm, HandlerParams::new(Op::Mov).byte().ext(0));
    table.register(0xC7, mov_rm_imm, HandlerParams::new(Op::Mov).ext(0));

    // XCHG r/m, r
    table.register(0x86, xchg_rm_r, HandlerParams::new(Op::Xchg).byte());
    table.register(0x87, xchg_rm_r, HandlerParams::new(Op::Xchg));

    // XCHG eAX, r (0x90 itself is NOP, registered by the control family)
    for r in 1..8u8 {
        table.register(0x90 + r, xchg_acc_r, HandlerParams::new(Op::Xchg).reg(r));
    }
}

/// MOV r/m, r.
fn mov_rm_r(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    let val = cpu.regs.read_gpr(r.location as u8, sz);
    write_operand(cpu, &rm, val)?;

    cpu.trace(|| format!("mov {}, r{}({})", operand_str(&rm), sz.bits(), r.location));
    Ok(true)
}

/// MOV r, r/m.
fn mov_r_rm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    let val = read_operand(cpu, &rm)?;
    cpu.regs.write_gpr(r.location as u8, sz, val);

    cpu.trace(|| format!("mov r{}({}), {}", sz.bits(), r.location, operand_str(&rm)));
    Ok(true)
}

/// MOV r, imm with the register encoded in the opcode byte.
fn mov_reg_imm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let imm = cpu.fetch_imm(sz)?;
    cpu.regs.write_gpr(p.reg, sz, imm);

    cpu.trace(|| format!("mov r{}({}), imm{}(0x{:X})", sz.bits(), p.reg, sz.bits(), imm));
    Ok(true)
}

/// MOV r/m, imm (Group 11, extension /0).
fn mov_rm_imm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let old_eip = cpu.eip;
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    if p.ext != Some(r.location as u8) {
        cpu.eip = old_eip;
        return Ok(false);
    }

    let imm = cpu.fetch_imm(sz)?;
    write_operand(cpu, &rm, imm)?;

    cpu.trace(|| format!("mov {}, imm{}(0x{:X})", operand_str(&rm), sz.bits(), imm));
    Ok(true)
}

/// MOV AL/AX/EAX, [moffs].
fn moffs_load(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let addr = cpu.fetch_imm(cpu.address_size)?;
    let val = match sz {
        OperandSize::Byte => cpu.mem.read_u8(addr)? as u32,
        OperandSize::Word => cpu.mem.read_u16(addr)? as u32,
        OperandSize::Dword => cpu.mem.read_u32(addr)?,
    };
    cpu.regs.write_gpr(GprIndex::Eax as u8, sz, val);

    cpu.trace(|| format!("mov {}, m{}(0x{:X})", acc_name(sz), sz.bits(), addr));
    Ok(true)
}

/// MOV [moffs], AL/AX/EAX.
fn moffs_store(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let addr = cpu.fetch_imm(cpu.address_size)?;
    let val = cpu.regs.read_gpr(GprIndex::Eax as u8, sz);
    match sz {
        OperandSize::Byte => cpu.mem.write_u8(addr, val as u8)?,
        OperandSize::Word => cpu.mem.write_u16(addr, val as u16)?,
        OperandSize::Dword => cpu.mem.write_u32(addr, val)?,
    }

    cpu.trace(|| format!("mov m{}(0x{:X}), {}", sz.bits(), addr, acc_name(sz)));
    Ok(true)
}

/// XCHG r/m, r.
fn xchg_rm_r(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;

    let a = read_operand(cpu, &rm)?;
    let b = cpu.regs.read_gpr(r.location as u8, sz);
    // Write the fallible memory side first so a fault leaves both intact.
    write_operand(cpu, &rm, b)?;
    cpu.regs.write_gpr(r.location as u8, sz, a);

    cpu.trace(|| format!("xchg {}, r{}({})", operand_str(&rm), sz.bits(), r.location));
    Ok(true)
}

/// XCHG eAX, r with the register encoded in the opcode byte.
fn xchg_acc_r(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    let a = cpu.regs.read_gpr(GprIndex::Eax as u8, sz);
    let b = cpu.regs.read_gpr(p.reg, sz);
    cpu.regs.write_gpr(GprIndex::Eax as u8, sz, b);
    cpu.regs.write_gpr(p.reg, sz, a);

    cpu.trace(|| format!("xchg {}, r{}({})", acc_name(sz), sz.bits(), p.reg));
    Ok(true)
}

/// LEA r, m — store the effective address itself.
fn lea(cpu: &mut Cpu, _p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    // A register-direct r/m has no address to take.
    if rm.kind != OperandKind::Mem {
        return Err(VmError::InvalidEncoding(0x8D));
    }
    cpu.regs.write_gpr(r.location as u8, sz, rm.location & sz.mask());

    cpu.trace(|| format!("lea r{}({}), m(0x{:X})", sz.bits(), r.location, rm.location));
    Ok(true)
}
