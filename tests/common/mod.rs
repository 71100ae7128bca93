//! Shared helpers for the integration tests.

use corevm32::Cpu;

/// Default guest memory size for test CPUs.
#[allow(dead_code)]
pub const MEM_SIZE: usize = 0x1_0000;

/// CPU with `code` loaded at address 0 and EIP at 0.
pub fn cpu_with_code(code: &[u8]) -> Cpu {
    let mut cpu = Cpu::new(MEM_SIZE);
    cpu.load(0, code).expect("code image fits in memory");
    cpu
}

/// Execute exactly one instruction, panicking on any fault.
#[allow(dead_code)]
pub fn step_ok(cpu: &mut Cpu) {
    cpu.step().expect("instruction should execute");
}
