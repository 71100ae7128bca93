//! NEG and NOT, sharing the 0xF6/0xF7 group with TEST.
//!
//! NOT is one's complement and touches no flags. NEG is two's complement:
//! CF is set unless the operand was zero, and the remaining flags follow
//! the `SUB 0, operand` rules (so OF is set exactly when the operand is
//! the minimum signed value, and AF is the borrow out of bit 3).

use crate::cpu::Cpu;
use crate::decoder::process_modrm;
use crate::dispatch::{DispatchTable, HandlerParams, Op};
use crate::error::Result;
use crate::flags;

use super::{mnemonic, operand_str, read_operand, write_operand};

/// Register this family's opcodes (NOT /2, NEG /3).
pub fn register(table: &mut DispatchTable) {
    table.register(0xF6, rm, HandlerParams::new(Op::Not).byte().ext(2));
    table.register(0xF6, rm, HandlerParams::new(Op::Neg).byte().ext(3));
    table.register(0xF7, rm, HandlerParams::new(Op::Not).ext(2));
    table.register(0xF7, rm, HandlerParams::new(Op::Neg).ext(3));
}

/// NOT/NEG r/m.
fn rm(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let old_eip = cpu.eip;
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    if p.ext != Some(r.location as u8) {
        cpu.eip = old_eip;
        return Ok(false);
    }

    let a = read_operand(cpu, &rm)?;
    match p.op {
        Op::Not => {
            let result = !a & sz.mask();
            write_operand(cpu, &rm, result)?;
            // No flags affected.
        }
        Op::Neg => {
            let result = 0u32.wrapping_sub(a) & sz.mask();
            write_operand(cpu, &rm, result)?;
            flags::update_flags(&mut cpu.regs.eflags, flags::flags_sub(0, a, result, sz));
            // CF reflects "operand was non-zero".
            cpu.regs.set_flag(flags::CF, a & sz.mask() != 0);
        }
        _ => unreachable!(),
    }

    cpu.trace(|| format!("{} {}", mnemonic(p.op, false), operand_str(&rm)));
    Ok(true)
}
