//! Binds a buffer of emitted x86-64 machine code to a callable function
//! handle (spec §4.8).
//!
//! The dynamic loader / executable-memory mapper itself is out of scope
//! (spec Non-goal: treated as an opaque `load(bytes) -> fn_ptr`); this
//! module is that opaque boundary, implemented with
//! `dynasmrt::ExecutableBuffer`, the same W^X-respecting mmap'd buffer the
//! teacher's own JIT (`lightbeam`) finalizes its assembler into.

use dynasmrt::{AssemblyOffset, ExecutableBuffer};

use crate::runtime::ObjectPtr;

/// The native calling convention every compiled function uses (spec §6):
/// `object_ptr fn(object_ptr *args)`.
type EntryPoint = unsafe extern "C" fn(*const ObjectPtr) -> ObjectPtr;

/// A finished, callable function: executable code plus every constant
/// reference the code closes over.
///
/// `retained` exists solely to keep baked-in constants (from the
/// function's constant pool) alive for as long as the handle is; the
/// generated code never reads this field.
pub struct FunctionHandle {
    buffer: ExecutableBuffer,
    entry: AssemblyOffset,
    retained: Vec<ObjectPtr>,
}

impl FunctionHandle {
    /// Wrap an executable buffer and the offset within it of the
    /// function's entry point.
    pub fn new(buffer: ExecutableBuffer, entry: AssemblyOffset, retained: Vec<ObjectPtr>) -> Self {
        Self {
            buffer,
            entry,
            retained,
        }
    }

    /// Invoke the compiled function.
    ///
    /// # Safety
    ///
    /// `args` must have exactly as many elements as the function's
    /// `argcount`, each a live, appropriately-typed `ObjectPtr` the
    /// function is entitled to borrow a reference to for the duration of
    /// the call. There is no error-propagation channel out of emitted code
    /// (spec Design Note, Open Question (a)): a host-level exception
    /// raised during the call is not represented in this return type.
    pub unsafe fn call(&self, args: &[ObjectPtr]) -> ObjectPtr {
        let entry: EntryPoint = std::mem::transmute(self.buffer.ptr(self.entry));
        entry(args.as_ptr())
    }

    /// The constants this function's code holds a strong reference to.
    /// Exposed for tests and introspection; the compiled code itself never
    /// touches this list.
    pub fn retained(&self) -> &[ObjectPtr] {
        &self.retained
    }
}
