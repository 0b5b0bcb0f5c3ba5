//! The control-flow graph: a map of labelled [`BasicBlock`]s plus sentinel
//! entry/exit nodes, traversed by a deterministic reverse-post-order
//! iterator.
//!
//! Blocks are stored in a map keyed by label and owned by the graph; edges
//! are a separate adjacency map keyed by node identity (Design Note "Graph
//! representation" — avoid cyclic owning references, look successors up by
//! label rather than holding them directly), mirroring
//! `cranelift-codegen::flowgraph::ControlFlowGraph`'s predecessor/successor
//! maps keyed off `Block`.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::block::BasicBlock;
use crate::error::CompileError;
use crate::ir::{IrInstruction, Label};

/// A node in the control-flow graph: the sentinel entry, the sentinel
/// exit, or a labelled block. Kept as a closed variant rather than a
/// shared base type with dynamic dispatch (Design Note "Entry/exit
/// sentinels").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    /// The single synthetic predecessor of the first block.
    Entry,
    /// The single synthetic successor of every `ReturnValue` block.
    Exit,
    /// An ordinary basic block.
    Block(Label),
}

/// The control-flow graph of one function.
///
/// The CFG exclusively owns its blocks; blocks exclusively own their
/// instructions. Edges are back-references, never ownership.
pub struct ControlFlowGraph {
    blocks: BTreeMap<Label, BasicBlock>,
    /// Insertion (textual) order of blocks, distinct from `Label` order
    /// only in principle — in practice the disassembler assigns labels in
    /// textual order, but we keep this explicit rather than relying on
    /// `BTreeMap`'s key order to encode a control-flow property.
    order: Vec<Label>,
    edges: BTreeMap<Node, Vec<Node>>,
    /// `(header, footer)` pairs, matched LIFO by the disassembler the same
    /// way the host's block stack pairs `SETUP_LOOP` with `POP_BLOCK`. The
    /// assembler uses this to compute each synthesized `SETUP_LOOP`'s jump
    /// distance.
    loop_pairs: Vec<(Label, Label)>,
}

impl ControlFlowGraph {
    /// An empty graph with no blocks and no edges.
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            order: Vec::new(),
            edges: BTreeMap::new(),
            loop_pairs: Vec::new(),
        }
    }

    /// Record that `footer` is the `POP_BLOCK` matching `header`'s
    /// `SETUP_LOOP`.
    pub fn add_loop_pair(&mut self, header: Label, footer: Label) {
        self.loop_pairs.push((header, footer));
    }

    /// The loop footer matching `header`, if `header` is a loop header.
    pub fn loop_footer_of(&self, header: Label) -> Option<Label> {
        self.loop_pairs
            .iter()
            .find(|&&(h, _)| h == header)
            .map(|&(_, footer)| footer)
    }

    /// Append a block in textual order. Does not add any edges; the
    /// disassembler calls [`Self::add_edge`] separately once every block
    /// has been constructed.
    pub fn add_block(&mut self, block: BasicBlock) {
        self.order.push(block.label());
        self.blocks.insert(block.label(), block);
    }

    /// Record a directed edge `from -> to`.
    pub fn add_edge(&mut self, from: Node, to: Node) {
        self.edges.entry(from).or_default().push(to);
    }

    /// Look up a block by label.
    pub fn block(&self, label: Label) -> Option<&BasicBlock> {
        self.blocks.get(&label)
    }

    /// Blocks in textual (discovery) order.
    pub fn blocks_in_order(&self) -> impl Iterator<Item = &BasicBlock> {
        self.order.iter().map(move |label| &self.blocks[label])
    }

    /// The block that textually follows `label`, if any.
    pub fn next_block(&self, label: Label) -> Option<Label> {
        let position = self.order.iter().position(|&candidate| candidate == label)?;
        self.order.get(position + 1).copied()
    }

    /// The number of basic blocks (excluding the entry/exit sentinels).
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// `true` if there are no basic blocks at all.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Outgoing edges of `node`, in the order they were added.
    pub fn successors(&self, node: Node) -> &[Node] {
        self.edges.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A deterministic traversal starting at [`Node::Entry`], yielding
    /// block labels only (entry/exit are traversed for their edges but
    /// never yielded). See [`RpoIter`] for the exact ordering rule.
    pub fn rpo(&self) -> RpoIter<'_> {
        let mut deque = VecDeque::new();
        deque.push_back(Node::Entry);
        RpoIter {
            cfg: self,
            deque,
            visited: HashSet::new(),
        }
    }

    /// Check the structural invariants spec §3/§8 require: every block has
    /// at least one instruction (enforced unconditionally by
    /// [`BasicBlock::new`]), every `ConditionalBranch` block has exactly
    /// two successors, every `ReturnValue` block's only successor is
    /// [`Node::Exit`], and every block is reachable from
    /// [`Node::Entry`].
    pub fn verify(&self) -> Result<(), CompileError> {
        let reachable: HashSet<Label> = self.rpo().collect();
        for label in self.blocks.keys() {
            if !reachable.contains(label) {
                return Err(CompileError::InternalInvariant(
                    "basic block is not reachable from entry",
                ));
            }
            let block = &self.blocks[label];
            let successors = self.successors(Node::Block(*label));
            match block.terminator() {
                IrInstruction::ConditionalBranch { .. } => {
                    if successors.len() != 2 {
                        return Err(CompileError::InternalInvariant(
                            "conditional branch block does not have exactly two successors",
                        ));
                    }
                }
                IrInstruction::ReturnValue => {
                    if successors != [Node::Exit] {
                        return Err(CompileError::InternalInvariant(
                            "return block's only successor must be the exit node",
                        ));
                    }
                }
                _ => {
                    if successors.len() != 1 {
                        return Err(CompileError::InternalInvariant(
                            "fall-through block must have exactly one successor",
                        ));
                    }
                }
            }
        }
        let entry_successors = self.successors(Node::Entry);
        if entry_successors.len() != 1 {
            return Err(CompileError::InternalInvariant(
                "entry node must have exactly one outgoing edge",
            ));
        }
        Ok(())
    }
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// The deterministic traversal order described in spec §4.5: a deque
/// seeded with [`Node::Entry`]; non-block nodes are consumed for their
/// edges but never yielded; a block whose terminator is
/// `ConditionalBranch` enqueues its explicitly-jumped-to target first and
/// its fall-through target second, so the fall-through side is visited
/// immediately after the current block — matching the bytecode's own
/// fall-through layout and making `assemble` able to reproduce a jump-free
/// fall-through edge.
///
/// This is not a textbook reverse-post-order computation — it is the
/// specific queue discipline the assembler and x86-64 back end both rely
/// on for a repeatable block order (see Design Note (d)).
pub struct RpoIter<'a> {
    cfg: &'a ControlFlowGraph,
    deque: VecDeque<Node>,
    visited: HashSet<Node>,
}

impl<'a> Iterator for RpoIter<'a> {
    type Item = Label;

    fn next(&mut self) -> Option<Label> {
        while let Some(node) = self.deque.pop_front() {
            if !self.visited.insert(node) {
                continue;
            }
            match node {
                Node::Block(label) => {
                    let block = self
                        .cfg
                        .block(label)
                        .expect("every Node::Block in the edge map has a corresponding block");
                    if let IrInstruction::ConditionalBranch {
                        true_branch,
                        false_branch,
                        jump_when_true,
                        ..
                    } = block.terminator()
                    {
                        // The branch's own stated argument targets whichever
                        // side `jump_when_true` names (the "explicit" jump);
                        // the other side is the bytecode's fall-through and
                        // must be laid out immediately after this block for
                        // the assembler to reproduce it without a jump of
                        // its own. Enqueue the explicit target first so the
                        // fall-through ends up frontmost.
                        let (explicit, fall_through) = if *jump_when_true {
                            (*true_branch, *false_branch)
                        } else {
                            (*false_branch, *true_branch)
                        };
                        self.deque.push_front(Node::Block(explicit));
                        self.deque.push_front(Node::Block(fall_through));
                    } else {
                        for &succ in self.cfg.successors(node) {
                            self.deque.push_front(succ);
                        }
                    }
                    return Some(label);
                }
                Node::Entry | Node::Exit => {
                    for &succ in self.cfg.successors(node) {
                        self.deque.push_front(succ);
                    }
                }
            }
        }
        None
    }
}
