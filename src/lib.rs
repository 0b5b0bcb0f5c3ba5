//! A just-in-time compiler from a flat stack-bytecode to x86-64 machine
//! code.
//!
//! The pipeline: [`disassemble`] lifts bytecode to a typed
//! [`flowgraph::ControlFlowGraph`] of IR; from there, [`assemble`] lowers
//! the IR back to bytecode (round-tripping the subset this compiler
//! understands), or [`compile`] lowers it straight to a callable
//! [`loader::FunctionHandle`] via the x86-64 back end.
//!
//! The host object model, its C API, the dynamic loader that ultimately
//! maps `compile()`'s output executable, and any install-hook policy for
//! when the JIT engages are all out of scope: this crate is the middle of
//! the pipeline, not the runtime around it.

pub mod assemble;
pub mod block;
pub mod bytecode;
pub mod disassemble;
pub mod error;
pub mod flowgraph;
pub mod ir;
pub mod isa;
pub mod loader;
pub mod opcode;
pub mod runtime;
pub mod settings;

pub use assemble::assemble;
pub use bytecode::FunctionMetadata;
pub use disassemble::disassemble;
pub use error::{CompileError, CompileResult};
pub use loader::FunctionHandle;
pub use settings::{Builder, Flags, OptLevel};

use runtime::Runtime;

/// Compile one function's bytecode straight to executable x86-64 machine
/// code.
///
/// This is the crate's single public entry point (spec §6): disassemble
/// `metadata.code` to a CFG, then hand it to the x86-64 back end. Returns
/// [`CompileError::UnsupportedOpcode`] if the function uses anything
/// outside this compiler's supported subset (spec Non-goal: full
/// instruction set support is explicitly out of scope).
pub fn compile(
    metadata: &FunctionMetadata,
    flags: &Flags,
    runtime: &dyn Runtime,
) -> CompileResult<FunctionHandle> {
    let cfg = disassemble(&metadata.code)?;
    isa::x64::compile(&cfg, metadata, flags, runtime)
}
