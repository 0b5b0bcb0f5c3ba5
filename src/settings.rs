//! Compilation-wide configuration knobs.
//!
//! A deliberately small rendition of `cranelift-codegen::settings`'s
//! `Builder`/`Flags` split: a builder accumulates named knobs with
//! defaults, then is frozen into an immutable `Flags` the compiler threads
//! through every stage.

/// Immutable, validated configuration for one `compile()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flags {
    opt_level: OptLevel,
    enable_verifier: bool,
}

impl Flags {
    /// Optimization level requested for this compilation.
    ///
    /// Present for interface parity with the teacher's settings group; the
    /// back end is a fixed single-pass lowering (spec Non-goal: no IR
    /// optimization), so every level currently lowers identically.
    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    /// Whether [`crate::flowgraph::ControlFlowGraph::verify`] runs before
    /// lowering. Disabling this trades a cheap correctness check for
    /// slightly faster compilation; leave it on unless a caller already
    /// verifies the CFG itself.
    pub fn enable_verifier(&self) -> bool {
        self.enable_verifier
    }
}

impl Default for Flags {
    fn default() -> Self {
        Builder::new().finish()
    }
}

/// Optimization level. Spec Non-goal excludes an optimizing IR, so this
/// only affects diagnostics today; kept as a real knob rather than removed
/// so callers porting settings from a richer pipeline don't need to branch
/// on its absence.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OptLevel {
    /// No optimization; fastest to compile.
    None,
    /// Reserved for a future optimizing pipeline.
    Speed,
}

/// Accumulates configuration before it is frozen into [`Flags`].
#[derive(Debug, Clone)]
pub struct Builder {
    opt_level: OptLevel,
    enable_verifier: bool,
}

impl Builder {
    /// A builder with the compiler's defaults: no optimization, verifier on.
    pub fn new() -> Self {
        Self {
            opt_level: OptLevel::None,
            enable_verifier: true,
        }
    }

    /// Override the optimization level.
    pub fn opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    /// Enable or disable the pre-lowering CFG verifier.
    pub fn enable_verifier(mut self, enabled: bool) -> Self {
        self.enable_verifier = enabled;
        self
    }

    /// Freeze this builder into an immutable [`Flags`].
    pub fn finish(self) -> Flags {
        Flags {
            opt_level: self.opt_level,
            enable_verifier: self.enable_verifier,
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
