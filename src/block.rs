//! [`BasicBlock`]: a maximal straight-line run of IR instructions.

use smallvec::SmallVec;

use crate::ir::{IrInstruction, Label};

/// Most blocks hold a handful of instructions; inline a few before
/// spilling to the heap, the way `cranelift-codegen` uses `SmallVec` for
/// its per-instruction operand lists.
type InstVec = SmallVec<[IrInstruction; 4]>;

/// A basic block: a non-empty, ordered sequence of IR instructions with a
/// single entry and whose last instruction (the *terminator*) determines
/// its outgoing edges.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    label: Label,
    instructions: InstVec,
    is_loop_header: bool,
    is_loop_footer: bool,
}

impl BasicBlock {
    /// Build a block from its label and (non-empty) instruction sequence.
    ///
    /// # Panics
    ///
    /// Panics if `instructions` is empty: the invariant that every block
    /// has at least one instruction is enforced at construction, not
    /// checked later, since an empty block can only arise from a
    /// disassembler bug (spec §7 `InternalInvariant`).
    pub fn new(label: Label, instructions: impl IntoIterator<Item = IrInstruction>) -> Self {
        let instructions: InstVec = instructions.into_iter().collect();
        assert!(
            !instructions.is_empty(),
            "basic block {label} built with zero instructions"
        );
        Self {
            label,
            instructions,
            is_loop_header: false,
            is_loop_footer: false,
        }
    }

    /// This block's label.
    pub fn label(&self) -> Label {
        self.label
    }

    /// This block's instructions, in order.
    pub fn instructions(&self) -> &[IrInstruction] {
        &self.instructions
    }

    /// The terminator: this block's last instruction.
    pub fn terminator(&self) -> &IrInstruction {
        self.instructions
            .last()
            .expect("basic block invariant: non-empty instruction list")
    }

    /// Was this block's fall-through predecessor a dropped `SETUP_LOOP`?
    pub fn is_loop_header(&self) -> bool {
        self.is_loop_header
    }

    /// Mark this block as a loop header (see spec §4.3).
    pub fn set_loop_header(&mut self, value: bool) {
        self.is_loop_header = value;
    }

    /// Does this block contain a (lifted-away) `POP_BLOCK`?
    pub fn is_loop_footer(&self) -> bool {
        self.is_loop_footer
    }

    /// Mark this block as a loop footer (see spec §4.3).
    pub fn set_loop_footer(&mut self, value: bool) {
        self.is_loop_footer = value;
    }
}
