//! Bitwise instruction family: AND, OR, XOR, TEST.
//!
//! Operation: `c <- a op b`. TEST computes `a & b` and discards the
//! result. Flags: CF and OF cleared; SF, ZF, PF from the result; AF
//! undefined.
//!
//! Four addressing forms, mirroring the encoding groups:
//! - accumulator, immediate (0x24/0x25, 0x0C/0x0D, 0x34/0x35, 0xA8/0xA9);
//! - r/m, immediate via the 0x80/0x81/0x83 group (reg-field extensions
//!   AND /4, OR /1, XOR /6; 0x83's imm8 is sign-extended) and 0xF6/0xF7
//!   for TEST (/0, with /1 as the documented alias);
//! - r/m, register (0x20/0x21, 0x08/0x09, 0x30/0x31, 0x84/0x85);
//! - register, r/m (0x22/0x23, 0x0A/0x0B, 0x32/0x33).

use crate::cpu::Cpu;
use crate::decoder::{process_modrm, sign_extend};
use crate::dispatch::{DispatchTable, HandlerParams, Op};
use crate::error::Result;
use crate::flags;
use crate::registers::GprIndex;

use super::{acc_name, mnemonic, operand_str, read_operand, write_operand};

/// Register this family's opcodes.
pub fn register(table: &mut DispatchTable) {
    // AND
    table.register(0x24, acc_imm, HandlerParams::new(Op::And).byte());
    table.register(0x25, acc_imm, HandlerParams::new(Op::And));
    table.register(0x20, rm_r, HandlerParams::new(Op::And).byte());
    table.register(0x21, rm_r, HandlerParams::new(Op::And));
    table.register(0x22, r_rm, HandlerParams::new(Op::And).byte());
    table.register(0x23, r_rm, HandlerParams::new(Op::And));
    table.register(0x80, rm_imm, HandlerParams::new(Op::And).byte().byte_imm().ext(4));
    table.register(0x81, rm_imm, HandlerParams::new(Op::And).ext(4));
    table.register(0x83, rm_imm, HandlerParams::new(Op::And).byte_imm().ext(4));

    // OR
    table.register(0x0C, acc_imm, HandlerParams::new(Op::Or).byte());
    table.register(0x0D, acc_imm, HandlerParams::new(Op::Or));
    table.register(0x08, rm_r, HandlerParams::new(Op::Or).byte());
    table.register(0x09, rm_r, HandlerParams::new(Op::Or));
    table.register(0x0A, r_rm, HandlerParams::new(Op::Or).byte());
    table.register(0x0B, r_rm, HandlerParams::new(Op::Or));
    table.register(0x80, rm_imm, HandlerParams::new(Op::Or).byte().byte_imm().ext(1));
    table.register(0x81, rm_imm, HandlerParams::new(Op::Or).ext(1));
    table.register(0x83, rm_imm, HandlerParams::new(Op::Or).byte_imm().ext(1));

    // XOR
    table.register(0x34, acc_imm, HandlerParams::new(Op::Xor).byte());
    table.register(0x35, acc_imm, HandlerParams::new(Op::Xor));
    table.register(0x30, rm_r, HandlerParams::new(Op::Xor).byte());
    table.register(0x31, rm_r, HandlerParams::new(Op::Xor));
    table.register(0x32, r_rm, HandlerParams::new(Op::Xor).byte());
    table.register(0x33, r_rm, HandlerParams::new(Op::Xor));
    table.register(0x80, rm_imm, HandlerParams::new(Op::Xor).byte().byte_imm().ext(6));
    table.register(0x81, rm_imm, HandlerParams::new(Op::Xor).ext(6));
    table.register(0x83, rm_imm, HandlerParams::new(Op::Xor).byte_imm().ext(6));

    // TEST
    table.register(0xA8, acc_imm, HandlerParams::new(Op::And).byte().discard());
    table.register(0xA9, acc_imm, HandlerParams::new(Op::And).discard());
    table.register(0x84, rm_r, HandlerParams::new(Op::And).byte().discard());
    table.register(0x85, rm_r, HandlerParams::new(Op::And).discard());
    table.register(0xF6, rm_imm, HandlerParams::new(Op::And).byte().byte_imm().discard().ext(0));
    table.register(0xF6, rm_imm, HandlerParams::new(Op::And).byte().byte_imm().discard().ext(1));
    table.register(0xF7, rm_imm, HandlerParams::new(Op::And).discard().ext(0));
    table.register(0xF7, rm_imm, HandlerParams::new(Op::And).discard().ext(1));
}

/// Apply the selected bit operation.
#[inline]
fn bit_op(op: Op, a: u32, b: u32) -> u32 {
    match op {
        Op::And => a & b,
        Op::Or => a | b,
        Op::Xor => a ^ b,
        _ => unreachable!(),
    }
}

/// AND/OR/XOR/TEST accumulator, immediate.
fn acc_imm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let imm = cpu.fetch_imm(sz)?;
    let a = cpu.regs.read_gpr(GprIndex::Eax as u8, sz);
    let result = bit_op(p.op, a, imm) & sz.mask();

    if !p.discard {
        cpu.regs.write_gpr(GprIndex::Eax as u8, sz, result);
    }
    flags::update_flags(&mut cpu.regs.eflags, flags::flags_logic(result, sz));

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

/// AND/OR/XOR/TEST r/m, immediate (opcode-extension form).
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
    let result = bit_op(p.op, a, imm) & sz.mask();

    if !p.discard {
        write_operand(cpu, &rm, result)?;
    }
    flags::update_flags(&mut cpu.regs.eflags, flags::flags_logic(result, sz));

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

/// AND/OR/XOR/TEST r/m, register.
fn rm_r(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;

    let a = read_operand(cpu, &rm)?;
    let b = cpu.regs.read_gpr(r.location as u8, sz);
    let result = bit_op(p.op, a, b) & sz.mask();

    if !p.discard {
        write_operand(cpu, &rm, result)?;
    }
    flags::update_flags(&mut cpu.regs.eflags, flags::flags_logic(result, sz));

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

/// AND/OR/XOR register, r/m.
fn r_rm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;

    let a = cpu.regs.read_gpr(r.location as u8, sz);
    let b = read_operand(cpu, &rm)?;
    let result = bit_op(p.op, a, b) & sz.mask();

    cpu.regs.write_gpr(r.location as u8, sz, result);
    flags::update_flags(&mut cpu.regs.eflags, flags::flags_logic(result, sz));

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
