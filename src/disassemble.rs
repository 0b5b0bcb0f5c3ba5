//! Lifts a bytecode buffer to a [`ControlFlowGraph`] of typed IR: block
//! boundary discovery (spec §4.2), then per-opcode decoding and CFG
//! construction (spec §4.3/§4.4).

use std::collections::{BTreeSet, HashMap};

use log::{debug, trace};

use crate::block::BasicBlock;
use crate::bytecode::{BytecodeIter, Instruction};
use crate::error::{CompileError, CompileResult};
use crate::flowgraph::{ControlFlowGraph, Node};
use crate::ir::{BinaryOp, ComparePredicate, IrInstruction, Label, Pool, UnaryOp};
use crate::opcode::{BranchKind, Opcode, INSTRUCTION_SIZE};

/// Discover basic-block boundaries: an ordered list of half-open
/// `[start, end)` intervals covering the whole buffer.
///
/// `compute_block_boundaries(&[])` is `[]` (spec §8 boundary behaviour);
/// otherwise `0` is always a start, `len(code)` is always the final
/// sentinel, and every branch instruction contributes its fall-through
/// position and (for relative/absolute/conditional branches) its target
/// as additional starts.
pub fn compute_block_boundaries(code: &[u8]) -> CompileResult<Vec<(usize, usize)>> {
    if code.is_empty() {
        return Ok(Vec::new());
    }

    let mut starts: BTreeSet<usize> = BTreeSet::new();
    starts.insert(0);

    for item in BytecodeIter::new(code)? {
        let (offset, inst) = item?;
        let next = Instruction::next_offset(offset);
        let kind = inst.opcode.branch_kind();
        if kind == BranchKind::Plain {
            continue;
        }
        if next < code.len() {
            starts.insert(next);
        }
        match kind {
            BranchKind::Relative => {
                starts.insert(next + inst.argument as usize);
            }
            BranchKind::Absolute | BranchKind::Conditional => {
                starts.insert(inst.argument as usize);
            }
            BranchKind::Return | BranchKind::Plain => {}
        }
    }

    let mut sorted: Vec<usize> = starts.into_iter().collect();
    sorted.push(code.len());
    sorted.dedup();
    Ok(sorted.windows(2).map(|w| (w[0], w[1])).collect())
}

/// One interval's decoding result, before loop-header/footer bookkeeping
/// and CFG edge construction.
struct Decoded {
    label: Label,
    instructions: Vec<IrInstruction>,
    is_loop_footer: bool,
    dropped_setup_loop: bool,
    preceded_by_setup_loop: bool,
}

/// Lift a bytecode buffer to a [`ControlFlowGraph`] of typed IR.
///
/// Fails with [`CompileError::UnknownOpcode`] for any opcode not in the
/// decode table, or [`CompileError::MalformedBytecode`] for ill-formed
/// input (odd length, truncated instruction, or a branch target that does
/// not line up with a discovered block boundary).
pub fn disassemble(code: &[u8]) -> CompileResult<ControlFlowGraph> {
    let intervals = compute_block_boundaries(code)?;
    debug!("disassemble: {} bytes, {} blocks", code.len(), intervals.len());
    if intervals.is_empty() {
        return Ok(ControlFlowGraph::new());
    }

    // Labels are assigned over *every* discovered interval, including ones
    // later dropped (a standalone SETUP_LOOP), so numbering matches the
    // spec's worked example where the loop header is `bb1`, not `bb0`.
    let labels: Vec<Label> = (0..intervals.len() as u32).map(Label::new).collect();
    let mut label_by_start: HashMap<usize, Label> = HashMap::new();
    for (&(start, _), &label) in intervals.iter().zip(&labels) {
        label_by_start.insert(start, label);
    }
    let resolve = |offset: usize| -> CompileResult<Label> {
        label_by_start
            .get(&offset)
            .copied()
            .ok_or(CompileError::MalformedBytecode {
                offset,
                reason: "branch target is not a basic-block boundary",
            })
    };

    let mut decoded = Vec::with_capacity(intervals.len());
    for (i, &(start, end)) in intervals.iter().enumerate() {
        let label = labels[i];
        let raw: Vec<(usize, Instruction)> =
            BytecodeIter::windowed(code, start, end)?.collect::<CompileResult<_>>()?;

        let preceded_by_setup_loop = start >= INSTRUCTION_SIZE
            && Opcode::from_u8(code[start - INSTRUCTION_SIZE]) == Opcode::SetupLoop;

        if raw.len() == 1 && raw[0].1.opcode == Opcode::SetupLoop {
            trace!("disassemble: {label} is a standalone SETUP_LOOP, dropping");
            decoded.push(Decoded {
                label,
                instructions: Vec::new(),
                is_loop_footer: false,
                dropped_setup_loop: true,
                preceded_by_setup_loop,
            });
            continue;
        }

        let mut is_loop_footer = false;
        let mut instructions = Vec::with_capacity(raw.len());
        for (offset, inst) in raw {
            if inst.opcode == Opcode::PopBlock {
                is_loop_footer = true;
                continue;
            }
            let next = Instruction::next_offset(offset);
            instructions.push(decode_instruction(offset, inst, next, &resolve)?);
        }

        if instructions.is_empty() {
            return Err(CompileError::MalformedBytecode {
                offset: start,
                reason: "basic block lifts to zero IR instructions",
            });
        }

        decoded.push(Decoded {
            label,
            instructions,
            is_loop_footer,
            dropped_setup_loop: false,
            preceded_by_setup_loop,
        });
    }

    let mut cfg = ControlFlowGraph::new();
    let mut kept_labels: Vec<Label> = Vec::new();
    let mut next_is_loop_header = false;
    // Headers and footers nest like the host's block stack: `SETUP_LOOP`
    // pushes, `POP_BLOCK` pops. Matching LIFO pairs the innermost still-open
    // header with each footer as it's encountered.
    let mut open_headers: Vec<Label> = Vec::new();
    for entry in decoded {
        if entry.dropped_setup_loop {
            next_is_loop_header = true;
            continue;
        }
        let mut block = BasicBlock::new(entry.label, entry.instructions);
        let is_header = next_is_loop_header || entry.preceded_by_setup_loop;
        if is_header {
            block.set_loop_header(true);
            open_headers.push(entry.label);
        }
        if entry.is_loop_footer {
            block.set_loop_footer(true);
            if let Some(header) = open_headers.pop() {
                cfg.add_loop_pair(header, entry.label);
            }
        }
        next_is_loop_header = false;
        cfg.add_block(block);
        kept_labels.push(entry.label);
    }

    if kept_labels.is_empty() {
        return Err(CompileError::InternalInvariant(
            "bytecode lifts to zero basic blocks",
        ));
    }

    cfg.add_edge(Node::Entry, Node::Block(kept_labels[0]));
    for (i, &label) in kept_labels.iter().enumerate() {
        let block = cfg.block(label).expect("just inserted");
        match block.terminator().clone() {
            IrInstruction::ReturnValue => cfg.add_edge(Node::Block(label), Node::Exit),
            IrInstruction::Branch { target } => {
                cfg.add_edge(Node::Block(label), Node::Block(target))
            }
            IrInstruction::ConditionalBranch {
                true_branch,
                false_branch,
                ..
            } => {
                cfg.add_edge(Node::Block(label), Node::Block(true_branch));
                cfg.add_edge(Node::Block(label), Node::Block(false_branch));
            }
            _ => {
                let next_label = kept_labels.get(i + 1).copied().ok_or(
                    CompileError::InternalInvariant(
                        "fall-through block has no textually-following block",
                    ),
                )?;
                cfg.add_edge(Node::Block(label), Node::Block(next_label));
            }
        }
    }

    Ok(cfg)
}

fn decode_instruction(
    offset: usize,
    inst: Instruction,
    next_offset: usize,
    resolve: &impl Fn(usize) -> CompileResult<Label>,
) -> CompileResult<IrInstruction> {
    use Opcode::*;
    Ok(match inst.opcode {
        LoadConst => IrInstruction::Load {
            index: inst.argument,
            pool: Pool::Constants,
        },
        LoadFast => IrInstruction::Load {
            index: inst.argument,
            pool: Pool::Locals,
        },
        StoreFast => IrInstruction::Store { index: inst.argument },
        LoadAttr => IrInstruction::LoadAttr { index: inst.argument },
        StoreAttr => IrInstruction::StoreAttr { index: inst.argument },
        LoadGlobal => IrInstruction::LoadGlobal { index: inst.argument },
        ReturnValue => IrInstruction::ReturnValue,
        UnaryNot => IrInstruction::UnaryOperation { kind: UnaryOp::Not },
        PopTop => IrInstruction::PopTop,
        CallFunction => IrInstruction::Call {
            num_args: inst.argument,
        },
        JumpAbsolute => IrInstruction::Branch {
            target: resolve(inst.argument as usize)?,
        },
        JumpForward => IrInstruction::Branch {
            target: resolve(next_offset + inst.argument as usize)?,
        },
        PopJumpIfFalse => IrInstruction::ConditionalBranch {
            false_branch: resolve(inst.argument as usize)?,
            true_branch: resolve(next_offset)?,
            pop_before_eval: true,
            jump_when_true: false,
        },
        JumpIfFalseOrPop => IrInstruction::ConditionalBranch {
            false_branch: resolve(inst.argument as usize)?,
            true_branch: resolve(next_offset)?,
            pop_before_eval: false,
            jump_when_true: false,
        },
        JumpIfTrueOrPop => IrInstruction::ConditionalBranch {
            true_branch: resolve(inst.argument as usize)?,
            false_branch: resolve(next_offset)?,
            pop_before_eval: false,
            jump_when_true: true,
        },
        CompareOp => IrInstruction::Compare {
            predicate: compare_predicate(offset, inst.argument)?,
        },
        BinaryAnd => IrInstruction::BinaryOperation {
            operator: BinaryOp::And,
        },
        SetupLoop | PopBlock | ExtendedArg => {
            return Err(CompileError::InternalInvariant(
                "SETUP_LOOP/POP_BLOCK/EXTENDED_ARG must be filtered out before decode_instruction",
            ))
        }
        Unknown(byte) => {
            return Err(CompileError::UnknownOpcode {
                offset,
                opcode: byte,
            })
        }
    })
}

fn compare_predicate(offset: usize, arg: u32) -> CompileResult<ComparePredicate> {
    Ok(match arg {
        0 => ComparePredicate::Less,
        1 => ComparePredicate::LessEqual,
        2 => ComparePredicate::Equal,
        3 => ComparePredicate::NotEqual,
        4 => ComparePredicate::Greater,
        5 => ComparePredicate::GreaterEqual,
        8 => ComparePredicate::Is,
        9 => ComparePredicate::IsNot,
        _ => {
            return Err(CompileError::MalformedBytecode {
                offset,
                reason: "unsupported compare predicate argument",
            })
        }
    })
}
