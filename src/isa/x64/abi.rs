//! Function prologue/epilogue: establishes the pinned registers described
//! in `regs.rs` and the locals region the lowered `Load`/`Store`
//! instructions index into.
//!
//! Matches spec §4.7's System V binding: `object_ptr fn(object_ptr *args)`,
//! with the single incoming argument in `rdi` and the return value in
//! `rax`.

use dynasmrt::{dynasm, x64::Assembler, DynasmApi};

/// Emit the function prologue: save the pinned callee-saved registers,
/// copy the incoming `args_ptr` out of `rdi`, and carve out
/// `num_locals` 8-byte slots on the native stack for `LoadFast`/`StoreFast`
/// to index into.
///
/// Matches `regs::ARGS_PTR` (`r12`) and `regs::FRAME_BASE` (`r13`).
pub fn emit_prologue(ops: &mut Assembler, num_locals: u32) {
    dynasm!(ops
        ; .arch x64
        ; push r12
        ; push r13
        ; mov r12, rdi
        ; mov r13, rsp
        ; sub rsp, (num_locals as i32) * 8
    );
}

/// Emit the function epilogue: the caller is expected to have already
/// left the function's return value in `rax` (via `ReturnValue`'s
/// lowering); this only tears down the frame and the saved registers.
pub fn emit_epilogue(ops: &mut Assembler, num_locals: u32) {
    dynasm!(ops
        ; .arch x64
        ; add rsp, (num_locals as i32) * 8
        ; pop r13
        ; pop r12
        ; ret
    );
}
