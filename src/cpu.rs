//! CPU core — state management and the fetch-dispatch-execute loop.
//!
//! The `Cpu` struct owns guest memory, the register file, EIP, and the
//! opcode dispatch table, and implements the execution cycle: fetch the
//! primary opcode byte at EIP, look up its candidate handlers, and invoke
//! them in registration order until one accepts. A candidate that peeks at
//! ModR/M and finds a foreign reg-field extension restores EIP and
//! declines; if no candidate accepts, the instruction raises
//! `InvalidOpcode`.
//!
//! An instruction commits atomically: on any error EIP is restored to the
//! start of the instruction (prefixes included) and no architectural state
//! from the failed instruction is visible. `Halted` is the one exception —
//! EIP stays past the HLT so a later `run` resumes at the next
//! instruction.

use crate::dispatch::DispatchTable;
use crate::error::{Result, VmError};
use crate::flags::OperandSize;
use crate::instructions;
use crate::memory::Memory;
use crate::registers::{GprIndex, RegisterFile};

/// Reason the CPU stopped executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// HLT instruction executed.
    Halted,
    /// Maximum instruction count reached.
    InstructionLimit,
    /// External stop request via `request_stop()`.
    StopRequested,
    /// An instruction faulted; EIP points at the faulting instruction.
    Fault(VmError),
}

/// Virtual 32-bit x86 CPU with flat memory.
pub struct Cpu {
    /// Guest memory.
    pub mem: Memory,
    /// Register file (GPRs + EFLAGS).
    pub regs: RegisterFile,
    /// Instruction pointer.
    pub eip: u32,

    /// Effective operand size for the current instruction (Dword unless an
    /// operand-size override prefix is in effect).
    pub operand_size: OperandSize,
    /// Effective address size for the current instruction.
    pub address_size: OperandSize,

    /// End of the loaded code image; the stack may not grow below it.
    pub code_segment_end: u32,

    /// Number of instructions executed since reset.
    pub instruction_count: u64,

    /// Disassembly of the last accepted instruction, when tracing is on.
    pub last_disasm: Option<String>,
    /// Record a one-line disassembly per accepted instruction and emit it
    /// through `log::trace!`.
    pub trace_enabled: bool,

    /// Opcode dispatch table; immutable after construction.
    dispatch: DispatchTable,
    /// If true, stop at the next instruction boundary.
    stop_requested: bool,
}

impl Cpu {
    /// Create a CPU with `memsize` bytes of zeroed memory and reset
    /// register state: all GPRs zero except `ESP = EBP = memsize - 1`,
    /// `EIP = 0`, 32-bit operand and address sizes.
    ///
    /// # Panics
    ///
    /// Panics if `memsize` is zero.
    pub fn new(memsize: usize) -> Self {
        assert!(memsize > 0, "memsize must be non-zero");
        let mut regs = RegisterFile::new();
        let top = (memsize - 1) as u32;
        regs.write_gpr32(GprIndex::Esp as u8, top);
        regs.write_gpr32(GprIndex::Ebp as u8, top);

        Cpu {
            mem: Memory::new(memsize),
            regs,
            eip: 0,
            operand_size: OperandSize::Dword,
            address_size: OperandSize::Dword,
            code_segment_end: 0,
            instruction_count: 0,
            last_disasm: None,
            trace_enabled: false,
            dispatch: instructions::build_dispatch_table(),
            stop_requested: false,
        }
    }

    /// Copy a code or data image into memory at `offset` and raise
    /// `code_segment_end` to its end.
    pub fn load(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        self.mem.write_bytes(offset, bytes)?;
        let end = offset.wrapping_add(bytes.len() as u32);
        if end > self.code_segment_end {
            self.code_segment_end = end;
        }
        Ok(())
    }

    /// Set the instruction pointer.
    pub fn set_eip(&mut self, addr: u32) {
        self.eip = addr;
    }

    /// Request the CPU to stop at the next instruction boundary.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    // ── Instruction stream access ──

    /// Read one byte at EIP and advance EIP past it.
    #[inline]
    pub fn fetch_u8(&mut self) -> Result<u8> {
        let b = self.mem.read_u8(self.eip)?;
        self.eip = self.eip.wrapping_add(1);
        Ok(b)
    }

    /// Read a 16-bit little-endian value at EIP and advance EIP past it.
    #[inline]
    pub fn fetch_u16(&mut self) -> Result<u16> {
        let v = self.mem.read_u16(self.eip)?;
        self.eip = self.eip.wrapping_add(2);
        Ok(v)
    }

    /// Read a 32-bit little-endian value at EIP and advance EIP past it.
    #[inline]
    pub fn fetch_u32(&mut self) -> Result<u32> {
        let v = self.mem.read_u32(self.eip)?;
        self.eip = self.eip.wrapping_add(4);
        Ok(v)
    }

    /// Fetch an immediate of the given width (zero-extended to u32).
    #[inline]
    pub fn fetch_imm(&mut self, size: OperandSize) -> Result<u32> {
        match size {
            OperandSize::Byte => Ok(self.fetch_u8()? as u32),
            OperandSize::Word => Ok(self.fetch_u16()? as u32),
            OperandSize::Dword => self.fetch_u32(),
        }
    }

    // ── Stack ──

    /// Push `val` (of width `size`) onto the stack.
    ///
    /// The stack grows downward from the top of memory; a push that would
    /// move ESP below `code_segment_end` fails with `StackOverflow` and
    /// changes nothing. The value is stored before ESP is updated, so a
    /// failed store leaves ESP intact.
    pub fn stack_push(&mut self, val: u32, size: OperandSize) -> Result<()> {
        let esp = self.regs.read_gpr32(GprIndex::Esp as u8);
        let new_esp = esp.wrapping_sub(size.bytes());
        if new_esp < self.code_segment_end {
            return Err(VmError::StackOverflow {
                esp: new_esp,
                limit: self.code_segment_end,
            });
        }
        match size {
            OperandSize::Byte => self.mem.write_u8(new_esp, val as u8)?,
            OperandSize::Word => self.mem.write_u16(new_esp, val as u16)?,
            OperandSize::Dword => self.mem.write_u32(new_esp, val)?,
        }
        self.regs.write_gpr32(GprIndex::Esp as u8, new_esp);
        Ok(())
    }

    /// Pop a value of width `size` off the stack.
    ///
    /// No underflow check is performed; popping past the top of memory is
    /// caught by the memory bounds check.
    pub fn stack_pop(&mut self, size: OperandSize) -> Result<u32> {
        let esp = self.regs.read_gpr32(GprIndex::Esp as u8);
        let val = match size {
            OperandSize::Byte => self.mem.read_u8(esp)? as u32,
            OperandSize::Word => self.mem.read_u16(esp)? as u32,
            OperandSize::Dword => self.mem.read_u32(esp)?,
        };
        self.regs
            .write_gpr32(GprIndex::Esp as u8, esp.wrapping_add(size.bytes()));
        Ok(val)
    }

    // ── Execution ──

    /// Execute one instruction.
    ///
    /// `Err(VmError::Halted)` reports a HLT (EIP already points past it);
    /// any other error leaves EIP at the start of the faulting instruction
    /// with no architectural state modified.
    pub fn step(&mut self) -> Result<()> {
        let start = self.eip;
        self.operand_size = OperandSize::Dword;
        self.address_size = OperandSize::Dword;
        self.last_disasm = None;

        let result = self.step_inner();
        match result {
            Ok(()) => {
                self.instruction_count += 1;
                Ok(())
            }
            Err(VmError::Halted) => {
                self.instruction_count += 1;
                Err(VmError::Halted)
            }
            Err(e) => {
                self.eip = start;
                Err(e)
            }
        }
    }

    fn step_inner(&mut self) -> Result<()> {
        // Consume operand/address-size override prefixes.
        let op = loop {
            let b = self.fetch_u8()?;
            match b {
                0x66 => self.operand_size = OperandSize::Word,
                0x67 => self.address_size = OperandSize::Word,
                _ => break b,
            }
        };

        let slot = self.dispatch.slot(op);
        for entry in slot.iter() {
            let saved_eip = self.eip;
            if (entry.run)(self, entry.params)? {
                return Ok(());
            }
            // The handler declined; it must have restored EIP itself so the
            // next candidate decodes the same bytes.
            debug_assert_eq!(
                self.eip, saved_eip,
                "rejecting handler for opcode 0x{:02X} did not restore EIP",
                op,
            );
        }
        Err(VmError::InvalidOpcode(op))
    }

    /// Execute instructions until an exit condition is reached.
    ///
    /// `max_instructions` bounds the run (0 = unlimited).
    pub fn run(&mut self, max_instructions: u64) -> ExitReason {
        loop {
            if self.stop_requested {
                self.stop_requested = false;
                return ExitReason::StopRequested;
            }
            if max_instructions > 0 && self.instruction_count >= max_instructions {
                return ExitReason::InstructionLimit;
            }
            match self.step() {
                Ok(()) => {}
                Err(VmError::Halted) => return ExitReason::Halted,
                Err(e) => return ExitReason::Fault(e),
            }
        }
    }

    // ── Debug trace ──

    /// Record the disassembly of the instruction being executed.
    ///
    /// The line is built only when tracing is enabled, kept in
    /// `last_disasm`, and emitted through `log::trace!`.
    #[inline]
    pub(crate) fn trace(&mut self, line: impl FnOnce() -> String) {
        if self.trace_enabled {
            let line = line();
            log::trace!(target: "corevm32::disasm", "{}", line);
            self.last_disasm = Some(line);
        }
    }
}
