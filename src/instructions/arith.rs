//! Arithmetic instruction family: ADD, ADC, SUB, SBB, CMP, INC, DEC.
//!
//! The ADD/ADC/SUB/SBB/CMP group uses the same four addressing forms as
//! the bitwise family, with Group 1 (0x80/0x81/0x83) reg-field extensions
//! ADD /0, ADC /2, SBB /3, SUB /5, CMP /7. CMP is SUB with the result
//! discarded. INC and DEC come in register-in-opcode (0x40+r / 0x48+r)
//! and r/m group forms (0xFE, 0xFF /0 /1) and preserve CF.

use crate::cpu::Cpu;
use crate::decoder::{process_modrm, sign_extend};
use crate::dispatch::{DispatchTable, HandlerParams, Op};
use crate::error::Result;
use crate::flags;
use crate::registers::GprIndex;

use super::{acc_name, mnemonic, operand_str, read_operand, write_operand};

/// Register this family's opcodes.
pub fn register(table: &mut DispatchTable) {
    // (op, base of the 0x00-0x3F encoding block, Group 1 extension)
    for (op, base, ext) in [
        (Op::Add, 0x00u8, 0u8),
        (Op::Adc, 0x10, 2),
        (Op::Sbb, 0x18, 3),
        (Op::Sub, 0x28, 5),
        (Op::Sub, 0x38, 7), // CMP
    ] {
        let discard = ext == 7;
        let p = if discard {
            HandlerParams::new(op).discard()
        } else {
            HandlerParams::new(op)
        };
        table.register(base, rm_r, p.byte());
        table.register(base + 1, rm_r, p);
        table.register(base + 2, r_rm, p.byte());
        table.register(base + 3, r_rm, p);
        table.register(base + 4, acc_imm, p.byte());
        table.register(base + 5, acc_imm, p);
        table.register(0x80, rm_imm, p.byte().byte_imm().ext(ext));
        table.register(0x81, rm_imm, p.ext(ext));
        table.register(0x83, rm_imm, p.byte_imm().ext(ext));
    }

    // INC/DEC r32 (0x40+r / 0x48+r)
    for r in 0..8u8 {
        table.register(0x40 + r, incdec_reg, HandlerParams::new(Op::Inc).reg(r));
        table.register(0x48 + r, incdec_reg, HandlerParams::new(Op::Dec).reg(r));
    }

    // INC/DEC r/m (Group 4/5)
    table.register(0xFE, incdec_rm, HandlerParams::new(Op::Inc).byte().ext(0));
    table.register(0xFE, incdec_rm, HandlerParams::new(Op::Dec).byte().ext(1));
    table.register(0xFF, incdec_rm, HandlerParams::new(Op::Inc).ext(0));
    table.register(0xFF, incdec_rm, HandlerParams::new(Op::Dec).ext(1));
}

/// Apply the selected arithmetic operation, returning the masked result
/// and its computed flag bits.
fn alu_op(op: Op, a: u32, b: u32, carry_in: bool, sz: crate::flags::OperandSize) -> (u32, u32) {
    let mask = sz.mask();
    match op {
        Op::Add => {
            let result = a.wrapping_add(b) & mask;
            (result, flags::flags_add(a, b, result, sz))
        }
        Op::Adc => {
            let c = carry_in as u32;
            let result = a.wrapping_add(b).wrapping_add(c) & mask;
            // AF and OF must see the un-summed operands: folding the carry
            // into `b` wraps it when `b` is all-ones. The carry-included
            // result makes the xor identities come out right. Only CF
            // needs a widened sum.
            let mut f = flags::flags_add(a, b, result, sz);
            let wide = (a & mask) as u64 + (b & mask) as u64 + c as u64;
            if wide > mask as u64 {
                f |= flags::CF;
            } else {
                f &= !flags::CF;
            }
            (result, f)
        }
        Op::Sub => {
            let result = a.wrapping_sub(b) & mask;
            (result, flags::flags_sub(a, b, result, sz))
        }
        Op::Sbb => {
            let c = carry_in as u32;
            let result = a.wrapping_sub(b).wrapping_sub(c) & mask;
            // As for ADC: AF and OF from the un-summed operands, CF from a
            // widened borrow.
            let mut f = flags::flags_sub(a, b, result, sz);
            let wide = (b & mask) as u64 + c as u64;
            if wide > (a & mask) as u64 {
                f |= flags::CF;
            } else {
                f &= !flags::CF;
            }
            (result, f)
        }
        _ => unreachable!(),
    }
}

/// ADD/ADC/SUB/SBB/CMP accumulator, immediate.
fn acc_imm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let imm = cpu.fetch_imm(sz)?;
    let a = cpu.regs.read_gpr(GprIndex::Eax as u8, sz);
    let (result, f) = alu_op(p.op, a, imm, cpu.regs.flag(flags::CF), sz);

    if !p.discard {
        cpu.regs.write_gpr(GprIndex::Eax as u8, sz, result);
    }
    flags::update_flags(&mut cpu.regs.eflags, f);

    cpu.trace(|| {
        format!(
            "{} {}, imm{}(0x{:X})",
            mnemonic(p.op, p.discard),
            acc_name(sz),
            sz.bits(),
            imm,
        )
    });
    Ok(true)
}

/// ADD/ADC/SUB/SBB/CMP r/m, immediate (Group 1).
fn rm_imm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let old_eip = cpu.eip;
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    if p.ext != Some(r.location as u8) {
        cpu.eip = old_eip;
        return Ok(false);
    }

    let imm_sz = p.imm_size(sz);
    let imm = sign_extend(cpu.fetch_imm(imm_sz)?, imm_sz) & sz.mask();
    let a = read_operand(cpu, &rm)?;
    let (result, f) = alu_op(p.op, a, imm, cpu.regs.flag(flags::CF), sz);

    if !p.discard {
        write_operand(cpu, &rm, result)?;
    }
    flags::update_flags(&mut cpu.regs.eflags, f);

    cpu.trace(|| {
        format!(
            "{} {}, imm{}(0x{:X})",
            mnemonic(p.op, p.discard),
            operand_str(&rm),
            imm_sz.bits(),
            imm,
        )
    });
    Ok(true)
}

/// ADD/ADC/SUB/SBB/CMP r/m, register.
fn rm_r(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;

    let a = read_operand(cpu, &rm)?;
    let b = cpu.regs.read_gpr(r.location as u8, sz);
    let (result, f) = alu_op(p.op, a, b, cpu.regs.flag(flags::CF), sz);

    if !p.discard {
        write_operand(cpu, &rm, result)?;
    }
    flags::update_flags(&mut cpu.regs.eflags, f);

    cpu.trace(|| {
        format!(
            "{} {}, r{}({})",
            mnemonic(p.op, p.discard),
            operand_str(&rm),
            sz.bits(),
            r.location,
        )
    });
    Ok(true)
}

/// ADD/ADC/SUB/SBB/CMP register, r/m.
fn r_rm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;

    let a = cpu.regs.read_gpr(r.location as u8, sz);
    let b = read_operand(cpu, &rm)?;
    let (result, f) = alu_op(p.op, a, b, cpu.regs.flag(flags::CF), sz);

    if !p.discard {
        cpu.regs.write_gpr(r.location as u8, sz, result);
    }
    flags::update_flags(&mut cpu.regs.eflags, f);

    cpu.trace(|| {
        format!(
            "{} r{}({}), {}",
            mnemonic(p.op, p.discard),
            sz.bits(),
            r.location,
            operand_str(&rm),
        )
    });
    Ok(true)
}

/// INC/DEC r32 with the register encoded in the opcode byte.
fn incdec_reg(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = cpu.operand_size;
    let a = cpu.regs.read_gpr(p.reg, sz);
    let (result, f) = match p.op {
        Op::Inc => {
            let result = a.wrapping_add(1) & sz.mask();
            (result, flags::flags_inc(a, result, sz))
        }
        Op::Dec => {
            let result = a.wrapping_sub(1) & sz.mask();
            (result, flags::flags_dec(a, result, sz))
        }
        _ => unreachable!(),
    };
    cpu.regs.write_gpr(p.reg, sz, result);
    flags::update_flags_preserve_cf(&mut cpu.regs.eflags, f);

    cpu.trace(|| format!("{} r{}({})", mnemonic(p.op, false), sz.bits(), p.reg));
    Ok(true)
}

/// INC/DEC r/m (Group 4/5).
fn incdec_rm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let old_eip = cpu.eip;
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    if p.ext != Some(r.location as u8) {
        cpu.eip = old_eip;
        return Ok(false);
    }

    let a = read_operand(cpu, &rm)?;
    let (result, f) = match p.op {
        Op::Inc => {
            let result = a.wrapping_add(1) & sz.mask();
            (result, flags::flags_inc(a, result, sz))
        }
        Op::Dec => {
            let result = a.wrapping_sub(1) & sz.mask();
            (result, flags::flags_dec(a, result, sz))
        }
        _ => unreachable!(),
    };
    write_operand(cpu, &rm, result)?;
    flags::update_flags_preserve_cf(&mut cpu.regs.eflags, f);

    cpu.trace(|| format!("{} {}", mnemonic(p.op, false), operand_str(&rm)));
    Ok(true)
}
