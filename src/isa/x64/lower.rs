//! Per-IR-instruction x86-64 lowering (spec §4.7).
//!
//! The value stack is the native machine stack: `Load` pushes, `Store`/
//! `PopTop`/binary and unary operators pop. Locals live below
//! `regs::FRAME_BASE` (`r13`), one 8-byte slot per index, so local `i` sits
//! at `[r13 - 8*(i+1)]`. Calls into the host runtime go through the
//! addresses `runtime::RuntimeSymbols` resolved once per process.
//!
//! Every object on the value stack is a strong reference (spec §4.7,
//! "Reference counting"): lowerings insert matching increments and
//! decrements around each operation the same way
//! `original_source/cinder/jit.py`'s `incref`/`decref` helpers do — a
//! `mov`/`lea`/`mov` sequence against the refcount field at offset 0 of
//! every host object. `Store` is the one documented exception (Open
//! Question (b) in `DESIGN.md`): it moves a reference into a local slot
//! without touching the slot's previous occupant.

use dynasmrt::{dynasm, x64::Assembler, DynamicLabel, DynasmApi, DynasmLabelApi};
use std::collections::HashMap;

use crate::bytecode::FunctionMetadata;
use crate::error::{CompileError, CompileResult};
use crate::ir::{BinaryOp, ComparePredicate, IrInstruction, Label, Pool, UnaryOp};
use crate::runtime::RuntimeSymbols;

/// `Some(reason)` if this instruction has no x86-64 lowering; `None` if
/// [`lower`] can emit it. Checked for every instruction before any code is
/// emitted, so a function either compiles whole or not at all.
pub fn unsupported_reason(inst: &IrInstruction) -> Option<String> {
    match inst {
        // Declared by the IR (spec §4.3's decode table) but never lowered
        // (Open Question (c)): there is no runtime entry point for a
        // bitwise/logical AND over host objects in this subset.
        IrInstruction::BinaryOperation { operator: BinaryOp::And } => {
            Some("BinaryOperation(And) has no x86-64 lowering".to_string())
        }
        // Only `is`/`is not` lower directly to a pointer comparison; the
        // richer predicates need a runtime rich-compare entry point this
        // subset's symbol table does not define.
        IrInstruction::Compare { predicate } if !matches!(predicate, ComparePredicate::Is | ComparePredicate::IsNot) => {
            Some(format!("Compare({predicate:?}) has no x86-64 lowering"))
        }
        IrInstruction::ConditionalBranch {
            pop_before_eval: true,
            jump_when_true: true,
            ..
        } => Some("pop-before-eval jump-when-true has no bytecode/opcode counterpart".to_string()),
        IrInstruction::Load { pool: Pool::Names | Pool::Cells, .. } => {
            Some("Load from the names/cells pool has no x86-64 lowering".to_string())
        }
        _ => None,
    }
}

/// Lower one already-validated instruction.
pub fn lower(
    ops: &mut Assembler,
    label: Label,
    inst: &IrInstruction,
    metadata: &FunctionMetadata,
    symbols: &RuntimeSymbols,
    labels: &HashMap<Label, DynamicLabel>,
) -> CompileResult<()> {
    match *inst {
        IrInstruction::ReturnValue => {
            // The popped reference becomes the caller's; it already carries
            // the increment from whichever `Load` put it on the stack, so
            // no refcount op belongs here.
            dynasm!(ops
                ; .arch x64
                ; pop rax
            );
        }
        IrInstruction::Load { index, pool: Pool::Locals } => {
            let slot = -8 * (index as i32 + 1);
            dynasm!(ops
                ; .arch x64
                ; mov rax, [r13 + slot]
                ; mov rcx, [rax]
                ; lea rcx, [rcx + 1]
                ; mov [rax], rcx
                ; push rax
            );
        }
        IrInstruction::Load { index, pool: Pool::Constants } => {
            let constant = metadata
                .consts
                .get(index as usize)
                .ok_or(CompileError::UnsupportedOpcode {
                    label,
                    detail: format!("constant pool index {index} out of range"),
                })?;
            let addr = constant.as_raw() as i64;
            dynasm!(ops
                ; .arch x64
                ; mov rax, QWORD addr
                ; mov rcx, [rax]
                ; lea rcx, [rcx + 1]
                ; mov [rax], rcx
                ; push rax
            );
        }
        IrInstruction::Load { pool: Pool::Names | Pool::Cells, .. } => {
            unreachable!("rejected by unsupported_reason before lowering")
        }
        IrInstruction::Store { index } => {
            // No increment of the new value (it already carries the stack's
            // reference) and no decrement of whatever the slot held before
            // (Open Question (b), carried forward unchanged).
            let slot = -8 * (index as i32 + 1);
            dynasm!(ops
                ; .arch x64
                ; pop rax
                ; mov [r13 + slot], rax
            );
        }
        IrInstruction::PopTop => {
            dynasm!(ops
                ; .arch x64
                ; pop rax
                ; mov rcx, [rax]
                ; lea rcx, [rcx - 1]
                ; mov [rax], rcx
            );
        }
        IrInstruction::LoadAttr { index } => {
            let name = name_pointer(metadata, label, index)?;
            dynasm!(ops
                ; .arch x64
                ; pop rdi          // receiver
                ; push rdi         // saved across the call, which clobbers rdi
                ; mov rsi, QWORD name
                ; mov rax, QWORD symbols.get_attr as i64
                ; call rax
                ; pop rdi          // receiver, restored
                ; mov rcx, [rdi]
                ; lea rcx, [rcx - 1]
                ; mov [rdi], rcx   // decref receiver; get_attr's result is already a new reference
                ; push rax
            );
        }
        IrInstruction::StoreAttr { index } => {
            let name = name_pointer(metadata, label, index)?;
            dynasm!(ops
                ; .arch x64
                ; mov rdi, [rsp]       // peek receiver
                ; mov rdx, [rsp + 8]   // peek value
                ; mov rsi, QWORD name
                ; mov rax, QWORD symbols.set_attr as i64
                ; call rax
                ; pop rdi
                ; mov rcx, [rdi]
                ; lea rcx, [rcx - 1]
                ; mov [rdi], rcx       // decref receiver
                ; pop rdi
                ; mov rcx, [rdi]
                ; lea rcx, [rcx - 1]
                ; mov [rdi], rcx       // decref value
            );
        }
        IrInstruction::LoadGlobal { index } => {
            let name = name_pointer(metadata, label, index)?;
            dynasm!(ops
                ; .arch x64
                ; mov rdi, QWORD metadata.globals.as_raw() as i64
                ; mov rsi, QWORD metadata.builtins.as_raw() as i64
                ; mov rdx, QWORD name
                ; mov rax, QWORD symbols.load_global as i64
                ; call rax
                ; mov rcx, [rax]
                ; lea rcx, [rcx + 1]
                ; mov [rax], rcx    // combined lookup returns a borrowed reference
                ; push rax
            );
        }
        IrInstruction::UnaryOperation { kind: UnaryOp::Not } => {
            let true_ptr = symbols.true_singleton.as_raw() as i64;
            let false_ptr = symbols.false_singleton.as_raw() as i64;
            dynasm!(ops
                ; .arch x64
                ; pop rdi
                ; push rdi            // saved across the call
                ; mov rax, QWORD symbols.is_true as i64
                ; call rax
                ; pop rdi
                ; mov rcx, [rdi]
                ; lea rcx, [rcx - 1]
                ; mov [rdi], rcx      // decref operand
                ; mov rcx, QWORD true_ptr
                ; mov rdx, QWORD false_ptr
                ; test rax, rax
                ; cmovnz rcx, rdx
                ; mov rax, [rcx]
                ; lea rax, [rax + 1]
                ; mov [rcx], rax      // incref the selected singleton
                ; push rcx
            );
        }
        IrInstruction::BinaryOperation { operator: BinaryOp::And } => {
            unreachable!("rejected by unsupported_reason before lowering")
        }
        IrInstruction::Compare { predicate: ComparePredicate::Is } => {
            let true_ptr = symbols.true_singleton.as_raw() as i64;
            let false_ptr = symbols.false_singleton.as_raw() as i64;
            dynasm!(ops
                ; .arch x64
                ; pop rdi
                ; pop rsi
                ; mov rcx, QWORD true_ptr
                ; mov rdx, QWORD false_ptr
                ; cmp rdi, rsi
                ; cmovne rcx, rdx
                ; mov r8, [rdi]
                ; lea r8, [r8 - 1]
                ; mov [rdi], r8       // decref lhs
                ; mov r8, [rsi]
                ; lea r8, [r8 - 1]
                ; mov [rsi], r8       // decref rhs
                ; mov r8, [rcx]
                ; lea r8, [r8 + 1]
                ; mov [rcx], r8       // incref the selected singleton
                ; push rcx
            );
        }
        IrInstruction::Compare { predicate: ComparePredicate::IsNot } => {
            let true_ptr = symbols.true_singleton.as_raw() as i64;
            let false_ptr = symbols.false_singleton.as_raw() as i64;
            dynasm!(ops
                ; .arch x64
                ; pop rdi
                ; pop rsi
                ; mov rcx, QWORD false_ptr
                ; mov rdx, QWORD true_ptr
                ; cmp rdi, rsi
                ; cmovne rcx, rdx
                ; mov r8, [rdi]
                ; lea r8, [r8 - 1]
                ; mov [rdi], r8       // decref lhs
                ; mov r8, [rsi]
                ; lea r8, [r8 - 1]
                ; mov [rsi], r8       // decref rhs
                ; mov r8, [rcx]
                ; lea r8, [r8 + 1]
                ; mov [rcx], r8       // incref the selected singleton
                ; push rcx
            );
        }
        IrInstruction::Compare { .. } => {
            unreachable!("rejected by unsupported_reason before lowering")
        }
        IrInstruction::Call { num_args } => {
            // The native stack grows downward while the host's value stack
            // grows upward, so the `n+1` items already on the machine stack
            // (arg(n-1) on top, down to the callable at the bottom) are
            // nested in the opposite order the dispatcher wants. Duplicate
            // them in reversed order into a scratch region so the
            // dispatcher sees a contiguous `callable, arg0, .., argN-1`
            // array, call it, then discard both the scratch copies and the
            // originals (spec §4.7).
            let num_args = num_args as i32;
            let region = (num_args + 1) * 8;
            dynasm!(ops ; .arch x64 ; sub rsp, region);
            for i in 0..=num_args {
                let src = region + (num_args - i) * 8;
                let dst = i * 8;
                dynasm!(ops
                    ; .arch x64
                    ; mov rax, [rsp + src]
                    ; mov [rsp + dst], rax
                );
            }
            dynasm!(ops
                ; .arch x64
                ; mov rdi, rsp
                ; mov rsi, num_args
                ; mov rdx, 0
                ; mov rax, QWORD symbols.call_function as i64
                ; call rax
                ; add rsp, region + region
                ; push rax
            );
        }
        IrInstruction::Branch { target } => {
            let dest = *labels.get(&target).expect("every branch target has a label");
            dynasm!(ops
                ; .arch x64
                ; jmp =>dest
            );
        }
        IrInstruction::ConditionalBranch {
            true_branch,
            false_branch,
            pop_before_eval,
            jump_when_true,
        } => {
            let true_dest = *labels.get(&true_branch).expect("every branch target has a label");
            let false_dest = *labels.get(&false_branch).expect("every branch target has a label");
            let (taken, fall_through) = if jump_when_true {
                (true_dest, false_dest)
            } else {
                (false_dest, true_dest)
            };
            if pop_before_eval {
                // POP_JUMP_IF_{TRUE,FALSE}: the operand leaves the stack
                // either way, so decref it once up front.
                dynasm!(ops
                    ; .arch x64
                    ; pop rdi
                    ; push rdi          // saved across the call
                    ; mov rax, QWORD symbols.is_true as i64
                    ; call rax
                    ; pop rdi
                    ; mov rcx, [rdi]
                    ; lea rcx, [rcx - 1]
                    ; mov [rdi], rcx    // decref operand
                    ; test rax, rax
                );
            } else {
                // JUMP_IF_{TRUE,FALSE}_OR_POP: peek, don't pop. The side
                // that takes the jump keeps its reference on the stack; only
                // the popping (fall-through) exit discards it below.
                dynasm!(ops
                    ; .arch x64
                    ; mov rdi, [rsp]
                    ; mov rax, QWORD symbols.is_true as i64
                    ; call rax
                    ; test rax, rax
                );
            }
            if jump_when_true {
                dynasm!(ops ; .arch x64 ; jnz =>taken);
            } else {
                dynasm!(ops ; .arch x64 ; jz =>taken);
            }
            if !pop_before_eval {
                dynasm!(ops
                    ; .arch x64
                    ; pop rdi
                    ; mov rcx, [rdi]
                    ; lea rcx, [rcx - 1]
                    ; mov [rdi], rcx
                );
            }
            dynasm!(ops ; .arch x64 ; jmp =>fall_through);
        }
    }
    Ok(())
}

fn name_pointer(metadata: &FunctionMetadata, label: Label, index: u32) -> CompileResult<i64> {
    metadata
        .names
        .get(index as usize)
        .map(|name| name.as_raw() as i64)
        .ok_or(CompileError::UnsupportedOpcode {
            label,
            detail: format!("name pool index {index} out of range"),
        })
}
