//! Error kinds produced by every stage of the pipeline.
//!
//! All compilation errors are fatal to the current compilation: nothing is
//! retried and no partial machine code is ever handed back to the caller.

use thiserror::Error;

use crate::ir::Label;

/// Something went wrong turning bytecode into a `FunctionHandle` (or back).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    /// The bytecode buffer itself is not well-formed: odd length, a
    /// truncated instruction, or an opcode byte value with no defined
    /// meaning in the fixed enumeration.
    #[error("malformed bytecode at offset {offset}: {reason}")]
    MalformedBytecode {
        /// Byte offset the problem was detected at.
        offset: usize,
        /// Human-readable explanation.
        reason: &'static str,
    },

    /// A bytecode opcode has no entry in the disassembler's decode table.
    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode {
        /// Byte offset of the offending instruction.
        offset: usize,
        /// The raw opcode byte.
        opcode: u8,
    },

    /// The IR contains a variant the x86-64 back end's supported set does
    /// not cover. Caught by the pre-emission gate in `isa::x64::compile`.
    #[error("unsupported IR instruction in block {label}: {detail}")]
    UnsupportedOpcode {
        /// Block the unsupported instruction was found in.
        label: Label,
        /// Description of the offending instruction.
        detail: String,
    },

    /// The function's globals or builtins are not plain dictionaries, so
    /// `LoadGlobal`'s combined lookup cannot be compiled.
    #[error("globals/builtins must be plain dictionaries to JIT-compile this function")]
    UnsupportedEnvironment,

    /// A CFG invariant was violated: this indicates a bug in the
    /// disassembler, not bad input, and should never happen on code that
    /// passed `disassemble()`.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(&'static str),
}

/// Convenience alias used throughout the crate.
pub type CompileResult<T> = Result<T, CompileError>;
