//! Pinned register assignments for the x86-64 back end (spec §4.7).
//!
//! Three registers are pinned for the lifetime of a compiled function
//! rather than allocated per-instruction (spec Non-goal: no register
//! allocator). All are System V callee-saved, so a nested `call_function`
//! invocation can't clobber them.

/// Holds the incoming `object_ptr *args` pointer, copied out of `rdi` in
/// the prologue (spec §6's native ABI passes it as the sole argument).
pub const ARGS_PTR: &str = "r12";

/// Points at the base of this function's local-variable slots, a region
/// the prologue carves out of the native stack (one 8-byte slot per
/// `num_locals`).
pub const FRAME_BASE: &str = "r13";

/// Scratch register used to stage foreign-call targets and intermediate
/// results; never live across a `call_function`/runtime-symbol call.
pub const SCRATCH: &str = "rax";

/// Callee-saved registers the prologue pushes and the epilogue pops, in
/// push order (`ARGS_PTR` then `FRAME_BASE`).
pub const SAVED_REGS: [&str; 2] = [ARGS_PTR, FRAME_BASE];
