//! Error types for corevm32.
//!
//! `VmError` serves dual purpose: it is the Rust error type returned from
//! fallible operations and the channel through which control-flow events
//! (HLT) reach the execution loop in `cpu.rs`. Any error aborts the current
//! instruction with EIP restored to its start and no architectural state
//! modified.

use core::fmt;

/// Errors generated during VM execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Memory access outside `[0, memsize)`.
    OutOfBounds { addr: u32, size: u32 },
    /// A push would move ESP below the end of the code segment.
    StackOverflow { esp: u32, limit: u32 },
    /// No registered handler accepted the primary opcode (including its
    /// ModR/M reg-field extension, if any).
    InvalidOpcode(u8),
    /// ModR/M or SIB decoded to a structurally malformed form for the
    /// instruction at hand (e.g. LEA with a register operand).
    InvalidEncoding(u8),
    /// Guest executed HLT — normal exit condition.
    Halted,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::OutOfBounds { addr, size } => {
                write!(f, "memory access of {} byte(s) at 0x{:08X} out of bounds", size, addr)
            }
            VmError::StackOverflow { esp, limit } => {
                write!(f, "stack overflow: ESP 0x{:08X} below code segment end 0x{:08X}", esp, limit)
            }
            VmError::InvalidOpcode(op) => write!(f, "invalid opcode 0x{:02X}", op),
            VmError::InvalidEncoding(op) => write!(f, "invalid encoding for opcode 0x{:02X}", op),
            VmError::Halted => write!(f, "CPU halted"),
        }
    }
}

/// Convenience result alias for VM operations.
pub type Result<T> = core::result::Result<T, VmError>;
