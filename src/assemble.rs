//! Re-emits a [`ControlFlowGraph`] of typed IR back to a bytecode buffer
//! (spec §4.6): a layout pass assigns every block a byte offset, then an
//! emit pass writes each block's instructions against that layout.
//!
//! Blocks are visited in [`ControlFlowGraph::rpo`] order in both passes, so
//! the fall-through side of every `ConditionalBranch` lands on the very
//! next instruction without needing its own jump — see the traversal's
//! doc comment in `flowgraph.rs` for why the explicit/fall-through target
//! is chosen the way it is.
//!
//! Argument values are assumed to fit in a single byte: spec §4.6 permits
//! an implementation to assert this rather than re-synthesize
//! `EXTENDED_ARG` prefixes, since none of the functions this compiler
//! targets are large enough to need one.

use std::collections::HashMap;

use crate::error::{CompileError, CompileResult};
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{BinaryOp, ComparePredicate, IrInstruction, Label, Pool, UnaryOp};
use crate::opcode::{Opcode, INSTRUCTION_SIZE};

/// Re-emit `cfg` as a bytecode buffer.
pub fn assemble(cfg: &ControlFlowGraph) -> CompileResult<Vec<u8>> {
    let order: Vec<Label> = cfg.rpo().collect();
    let layout = layout_blocks(cfg, &order)?;

    let mut code = Vec::with_capacity(layout.total_len);
    for &label in &order {
        let block = cfg
            .block(label)
            .expect("rpo() only yields labels present in the graph");

        if block.is_loop_header() {
            let footer = cfg.loop_footer_of(label).ok_or_else(|| {
                CompileError::UnsupportedOpcode {
                    label,
                    detail: "loop header has no matching footer recorded".to_string(),
                }
            })?;
            // SETUP_LOOP's argument is a JUMP_FORWARD-style delta, but to
            // the instruction *after* the footer's POP_BLOCK (the loop's
            // break target), not to POP_BLOCK itself: distance from
            // `setup_loop_offset + INSTRUCTION_SIZE` to
            // `footer_offset + INSTRUCTION_SIZE`, which is just
            // `footer_offset - setup_loop_offset`.
            let footer_offset = layout.target_offset[&footer];
            let setup_loop_offset = code.len();
            let distance = footer_offset
                .checked_sub(setup_loop_offset)
                .ok_or_else(|| CompileError::UnsupportedOpcode {
                    label,
                    detail: "loop footer precedes its own header".to_string(),
                })?;
            code.push(Opcode::SetupLoop.to_u8());
            code.push(u8_arg(label, distance)?);
        }

        if block.is_loop_footer() {
            code.push(Opcode::PopBlock.to_u8());
            code.push(0);
        }

        for inst in block.instructions() {
            emit_instruction(&mut code, label, inst, &layout.target_offset)?;
        }
    }

    debug_assert_eq!(code.len(), layout.total_len);
    Ok(code)
}

/// Per-block byte offsets computed by the layout pass.
struct Layout {
    /// Where jumps into each block should land: the first byte of the
    /// block's own content (after any synthesized `SETUP_LOOP`, which is
    /// why a loop header's recorded offset is its body offset, not the
    /// `SETUP_LOOP` instruction's own offset).
    target_offset: HashMap<Label, usize>,
    total_len: usize,
}

fn layout_blocks(cfg: &ControlFlowGraph, order: &[Label]) -> CompileResult<Layout> {
    let mut target_offset = HashMap::with_capacity(order.len());
    let mut offset = 0usize;
    for &label in order {
        let block = cfg
            .block(label)
            .expect("rpo() only yields labels present in the graph");
        if block.is_loop_header() {
            offset += INSTRUCTION_SIZE;
        }
        target_offset.insert(label, offset);
        if block.is_loop_footer() {
            offset += INSTRUCTION_SIZE;
        }
        offset += block.instructions().len() * INSTRUCTION_SIZE;
    }
    Ok(Layout {
        target_offset,
        total_len: offset,
    })
}

fn emit_instruction(
    code: &mut Vec<u8>,
    label: Label,
    inst: &IrInstruction,
    target_offset: &HashMap<Label, usize>,
) -> CompileResult<()> {
    let resolve = |target: Label| -> CompileResult<usize> {
        target_offset
            .get(&target)
            .copied()
            .ok_or(CompileError::InternalInvariant(
                "branch target has no recorded layout offset",
            ))
    };

    match *inst {
        IrInstruction::ReturnValue => {
            code.push(Opcode::ReturnValue.to_u8());
            code.push(0);
        }
        IrInstruction::Load { index, pool } => {
            let opcode = match pool {
                Pool::Constants => Opcode::LoadConst,
                Pool::Locals => Opcode::LoadFast,
                Pool::Names | Pool::Cells => {
                    return Err(CompileError::UnsupportedOpcode {
                        label,
                        detail: format!("Load from {pool:?} has no bytecode encoding"),
                    })
                }
            };
            code.push(opcode.to_u8());
            code.push(u8_arg(label, index as usize)?);
        }
        IrInstruction::Store { index } => {
            code.push(Opcode::StoreFast.to_u8());
            code.push(u8_arg(label, index as usize)?);
        }
        IrInstruction::LoadAttr { index } => {
            code.push(Opcode::LoadAttr.to_u8());
            code.push(u8_arg(label, index as usize)?);
        }
        IrInstruction::StoreAttr { index } => {
            code.push(Opcode::StoreAttr.to_u8());
            code.push(u8_arg(label, index as usize)?);
        }
        IrInstruction::LoadGlobal { index } => {
            code.push(Opcode::LoadGlobal.to_u8());
            code.push(u8_arg(label, index as usize)?);
        }
        IrInstruction::Branch { target } => {
            let next = code.len() + INSTRUCTION_SIZE;
            let target_offset = resolve(target)?;
            if let Some(delta) = target_offset.checked_sub(next) {
                if delta < 256 {
                    code.push(Opcode::JumpForward.to_u8());
                    code.push(delta as u8);
                    return Ok(());
                }
            }
            code.push(Opcode::JumpAbsolute.to_u8());
            code.push(u8_arg(label, target_offset)?);
        }
        IrInstruction::ConditionalBranch {
            true_branch,
            false_branch,
            pop_before_eval,
            jump_when_true,
        } => {
            let (opcode, target) = match (pop_before_eval, jump_when_true) {
                (true, false) => (Opcode::PopJumpIfFalse, false_branch),
                (false, false) => (Opcode::JumpIfFalseOrPop, false_branch),
                (false, true) => (Opcode::JumpIfTrueOrPop, true_branch),
                (true, true) => {
                    return Err(CompileError::UnsupportedOpcode {
                        label,
                        detail: "pop-before-eval jump-when-true has no bytecode encoding"
                            .to_string(),
                    })
                }
            };
            code.push(opcode.to_u8());
            code.push(u8_arg(label, resolve(target)?)?);
        }
        IrInstruction::UnaryOperation { kind: UnaryOp::Not } => {
            code.push(Opcode::UnaryNot.to_u8());
            code.push(0);
        }
        IrInstruction::BinaryOperation { operator: BinaryOp::And } => {
            code.push(Opcode::BinaryAnd.to_u8());
            code.push(0);
        }
        IrInstruction::Compare { predicate } => {
            code.push(Opcode::CompareOp.to_u8());
            code.push(compare_predicate_arg(predicate));
        }
        IrInstruction::Call { num_args } => {
            code.push(Opcode::CallFunction.to_u8());
            code.push(u8_arg(label, num_args as usize)?);
        }
        IrInstruction::PopTop => {
            code.push(Opcode::PopTop.to_u8());
            code.push(0);
        }
    }
    Ok(())
}

fn compare_predicate_arg(predicate: ComparePredicate) -> u8 {
    match predicate {
        ComparePredicate::Less => 0,
        ComparePredicate::LessEqual => 1,
        ComparePredicate::Equal => 2,
        ComparePredicate::NotEqual => 3,
        ComparePredicate::Greater => 4,
        ComparePredicate::GreaterEqual => 5,
        ComparePredicate::Is => 8,
        ComparePredicate::IsNot => 9,
    }
}

fn u8_arg(label: Label, value: usize) -> CompileResult<u8> {
    u8::try_from(value).map_err(|_| CompileError::UnsupportedOpcode {
        label,
        detail: format!("argument {value} does not fit in one byte (EXTENDED_ARG emission is not supported)"),
    })
}
