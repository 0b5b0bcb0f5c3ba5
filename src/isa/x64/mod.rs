//! x86-64 back end: lowers a verified [`ControlFlowGraph`] straight to
//! executable machine code, bypassing the bytecode assembler entirely
//! (spec §4.7).

mod abi;
mod lower;
pub mod regs;

use std::collections::HashMap;

use dynasmrt::{dynasm, x64::Assembler, DynasmApi, DynasmLabelApi};

use crate::bytecode::FunctionMetadata;
use crate::error::{CompileError, CompileResult};
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{IrInstruction, Label, Pool};
use crate::loader::FunctionHandle;
use crate::runtime::{ObjectPtr, Runtime};
use crate::settings::Flags;

/// Compile a verified CFG to a callable [`FunctionHandle`].
///
/// Runs the supported-instruction gate over every block before emitting
/// any code: a function either compiles whole, or fails with
/// [`CompileError::UnsupportedOpcode`] naming the first unsupported
/// instruction found, never partially.
pub fn compile(
    cfg: &ControlFlowGraph,
    metadata: &FunctionMetadata,
    flags: &Flags,
    runtime: &dyn Runtime,
) -> CompileResult<FunctionHandle> {
    if flags.enable_verifier() {
        cfg.verify()?;
    }

    for block in cfg.blocks_in_order() {
        for inst in block.instructions() {
            if let Some(reason) = lower::unsupported_reason(inst) {
                return Err(CompileError::UnsupportedOpcode {
                    label: block.label(),
                    detail: reason,
                });
            }
        }
    }

    let symbols = runtime.symbols()?;
    let order: Vec<Label> = cfg.rpo().collect();

    let mut ops = Assembler::new().map_err(|_| CompileError::UnsupportedEnvironment)?;
    let labels: HashMap<Label, _> = order
        .iter()
        .map(|&label| (label, ops.new_dynamic_label()))
        .collect();

    let entry = ops.offset();
    abi::emit_prologue(&mut ops, metadata.num_locals);
    // Copy the incoming arguments out of `args_ptr` into their local
    // slots; positional arguments occupy locals `0..argcount`.
    for i in 0..metadata.argcount as i32 {
        let local_slot = -8 * (i + 1);
        dynasm!(ops
            ; .arch x64
            ; mov rax, [r12 + i * 8]
            ; mov [r13 + local_slot], rax
        );
    }

    for &label in &order {
        let block = cfg
            .block(label)
            .expect("rpo() only yields labels present in the graph");
        let dynamic_label = labels[&label];
        dynasm!(ops ; .arch x64 ; =>dynamic_label);

        for inst in block.instructions() {
            lower::lower(&mut ops, label, inst, metadata, symbols, &labels)?;
            if matches!(inst, IrInstruction::ReturnValue) {
                abi::emit_epilogue(&mut ops, metadata.num_locals);
            }
        }
    }

    let retained = retained_objects(cfg, metadata)?;
    let buffer = ops.finalize().map_err(|_| CompileError::UnsupportedEnvironment)?;
    Ok(FunctionHandle::new(buffer, entry, retained))
}

/// Every object this compiled function's code holds a bare pointer to
/// (constants, attribute/global names, and — if any `LoadGlobal` is
/// present — the globals/builtins dictionaries themselves) must be kept
/// alive for as long as the handle exists (spec §4.12).
fn retained_objects(cfg: &ControlFlowGraph, metadata: &FunctionMetadata) -> CompileResult<Vec<ObjectPtr>> {
    let mut retained = Vec::new();
    let mut uses_globals = false;
    for block in cfg.blocks_in_order() {
        for inst in block.instructions() {
            match inst {
                IrInstruction::Load { index, pool: Pool::Constants } => {
                    let constant = metadata.consts.get(*index as usize).ok_or(
                        CompileError::UnsupportedOpcode {
                            label: block.label(),
                            detail: format!("constant pool index {index} out of range"),
                        },
                    )?;
                    retained.push(*constant);
                }
                IrInstruction::LoadAttr { index } | IrInstruction::StoreAttr { index } | IrInstruction::LoadGlobal { index } => {
                    let name = metadata.names.get(*index as usize).ok_or(
                        CompileError::UnsupportedOpcode {
                            label: block.label(),
                            detail: format!("name pool index {index} out of range"),
                        },
                    )?;
                    retained.push(*name);
                    if matches!(inst, IrInstruction::LoadGlobal { .. }) {
                        uses_globals = true;
                    }
                }
                _ => {}
            }
        }
    }
    if uses_globals {
        retained.push(metadata.globals);
        retained.push(metadata.builtins);
    }
    Ok(retained)
}
