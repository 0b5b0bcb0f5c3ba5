//! Instruction-set back ends. Spec Non-goal: only x86-64 is implemented;
//! everything here funnels through [`x64`].

pub mod x64;
