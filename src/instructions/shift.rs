//! Shift instruction family: SHL/SAL, SHR, SAR.
//!
//! The count comes from an implicit 1 (0xD0/0xD1), CL (0xD2/0xD3), or an
//! 8-bit immediate (0xC0/0xC1), and is masked with 0x1F. A masked count
//! of zero changes neither the operand nor any flag. CF receives the last
//! bit shifted out. OF is architecturally defined only for a count of 1
//! (SHL: MSB of the result XOR CF; SHR: MSB of the original value;
//! SAR: 0) and is preserved for other counts.
//!
//! Reg-field extensions follow the SDM mapping: SHL /4, SHR /5, SAL /6
//! (an alias for SHL), SAR /7.

use crate::cpu::Cpu;
use crate::decoder::{process_modrm, sign_extend};
use crate::dispatch::{CountSource, DispatchTable, HandlerParams, Op};
use crate::error::Result;
use crate::flags;
use crate::registers::GprIndex;

use super::{mnemonic, operand_str, read_operand, write_operand};

/// Register this family's opcodes.
pub fn register(table: &mut DispatchTable) {
    for (opcode, byte_form, count) in [
        (0xD0u8, true, CountSource::One),
        (0xD1, false, CountSource::One),
        (0xD2, true, CountSource::Cl),
        (0xD3, false, CountSource::Cl),
        (0xC0, true, CountSource::Imm8),
        (0xC1, false, CountSource::Imm8),
    ] {
        for (op, ext) in [(Op::Shl, 4u8), (Op::Shr, 5), (Op::Shl, 6), (Op::Sar, 7)] {
            let mut p = HandlerParams::new(op).ext(ext).count(count);
            if byte_form {
                p = p.byte();
            }
            table.register(opcode, shift, p);
        }
    }
}

/// SHL/SHR/SAR r/m by 1, CL, or imm8.
fn shift(cpu: &mut Cpu, p: HandlerParams) -> Result<bool> {
    let old_eip = cpu.eip;
    let sz = p.operand_size(cpu);
    let (rm, r) = process_modrm(cpu, sz, sz)?;
    if p.ext != Some(r.location as u8) {
        cpu.eip = old_eip;
        return Ok(false);
    }

    let raw_count = match p.count {
        CountSource::One => 1,
        CountSource::Cl => cpu.regs.read_gpr8(GprIndex::Ecx as u8) as u32,
        CountSource::Imm8 => cpu.fetch_u8()? as u32,
    };
    let count = raw_count & 0x1F;

    let val = read_operand(cpu, &rm)?;
    if count == 0 {
        // Masked count of zero: no result write, no flag change.
        return Ok(true);
    }

    let bits = sz.bits();
    let mask = sz.mask();

    let (result, cf) = match p.op {
        Op::Shl => {
            let result = if count >= bits { 0 } else { (val << count) & mask };
            // CF = last bit shifted out of the top.
            let cf = count <= bits && (val >> (bits - count)) & 1 != 0;
            (result, cf)
        }
        Op::Shr => {
            let result = if count >= bits { 0 } else { val >> count };
            let cf = count <= bits && (val >> (count - 1)) & 1 != 0;
            (result, cf)
        }
        Op::Sar => {
            let signed = sign_extend(val, sz) as i32;
            let result = if count >= bits {
                // Every bit is a copy of the sign.
                if signed < 0 {
                    mask
                } else {
                    0
                }
            } else {
                ((signed >> count) as u32) & mask
            };
            let cf = if count >= bits {
                signed < 0
            } else {
                (val >> (count - 1)) & 1 != 0
            };
            (result, cf)
        }
        _ => unreachable!(),
    };

    let of = if count == 1 {
        match p.op {
            Op::Shl => ((result >> (bits - 1)) & 1 != 0) != cf,
            Op::Shr => (val >> (bits - 1)) & 1 != 0,
            Op::Sar => false,
            _ => unreachable!(),
        }
    } else {
        // OF undefined for count != 1; preserve existing.
        cpu.regs.flag(flags::OF)
    };

    write_operand(cpu, &rm, result)?;
    flags::update_flags(&mut cpu.regs.eflags, flags::flags_shift(result, cf, of, sz));

    cpu.trace(|| {
        let count_str = match p.count {
            CountSource::One => "1".to_string(),
            CountSource::Cl => "cl".to_string(),
            CountSource::Imm8 => format!("imm8({})", raw_count),
        };
        format!("{} {}, {}", mnemonic(p.op, false), operand_str(&rm), count_str)
    });
    Ok(true)
}
