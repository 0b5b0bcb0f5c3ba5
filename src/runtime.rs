//! Binding surface to the host object-model runtime: the opaque reference
//! type the emitted code pushes/pops on its value stack, and the foreign
//! symbols that back end calls into (spec §4.8/§6).
//!
//! The host object model and its C API are out of scope (spec Non-goal);
//! this module only resolves and caches the handful of symbols the
//! compiler needs to call, the way `libloading::Library::this()` resolves
//! symbols already loaded into the current process rather than dynamically
//! loading an external shared object.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::OnceLock;

use libloading::{Library, Symbol};

use crate::error::{CompileError, CompileResult};

/// A strong reference to a host object. Never dereferenced by this crate;
/// it is passed opaquely between the value stack, locals, and foreign
/// calls, with reference counts the compiler inserts increments/decrements
/// for (spec §5's refcount discipline; see Open Question (b) for the one
/// documented gap).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub struct ObjectPtr(NonNull<c_void>);

impl ObjectPtr {
    /// Wrap a raw host object pointer. The caller attests it is a valid,
    /// live host object for the duration this `ObjectPtr` is used.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and point to a live host object whose
    /// reference count this crate's generated code is entitled to
    /// increment and decrement.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(ObjectPtr)
    }

    /// The raw pointer, for handing back across the foreign-function
    /// boundary.
    pub fn as_raw(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Addresses of every host-runtime symbol the back end is allowed to call,
/// resolved once and reused for every compiled function.
pub struct RuntimeSymbols {
    /// `object_ptr PyObject_GetAttr(object_ptr receiver, object_ptr name)`.
    /// Returns a new reference.
    pub get_attr: usize,
    /// `int PyObject_SetAttr(object_ptr receiver, object_ptr name, object_ptr value)`.
    /// Takes no ownership of `receiver`, `name`, or `value`; the caller
    /// releases all three.
    pub set_attr: usize,
    /// `int PyObject_IsTrue(object_ptr)`
    pub is_true: usize,
    /// `object_ptr _PyDict_LoadGlobal(object_ptr globals, object_ptr builtins, object_ptr name)`.
    /// Returns a borrowed reference.
    pub load_global: usize,
    /// `object_ptr call_function(object_ptr *stack_top, int num_args, int num_kwargs)`.
    /// `stack_top` points at a contiguous `callable, arg0, .., argN-1` array;
    /// the dispatcher takes ownership of every reference in it and returns
    /// one new reference (spec §4.7).
    pub call_function: usize,
    /// The `True` singleton.
    pub true_singleton: ObjectPtr,
    /// The `False` singleton.
    pub false_singleton: ObjectPtr,
}

/// Resolves [`RuntimeSymbols`] from the host process's own symbol table.
///
/// The host runtime that owns the object model is already loaded into the
/// current process (spec §6: this compiler is invoked *from* that host,
/// not the other way around), so symbols are resolved against the running
/// process image rather than an on-disk shared object — the same use of
/// `libloading::Library::this()` as a process-local symbol cache.
pub trait Runtime {
    /// Look up every symbol this compiler needs, once.
    fn symbols(&self) -> CompileResult<&RuntimeSymbols>;
}

/// A [`Runtime`] backed by the current process image, resolved once and
/// cached for the lifetime of the process.
pub struct ProcessRuntime {
    cache: OnceLock<CompileResult<RuntimeSymbols>>,
}

impl ProcessRuntime {
    /// An unresolved runtime binding; symbols are looked up lazily on
    /// first use.
    pub fn new() -> Self {
        Self {
            cache: OnceLock::new(),
        }
    }

    fn resolve() -> CompileResult<RuntimeSymbols> {
        // SAFETY: `Library::this()` borrows the already-loaded symbol
        // table of the running process; it does not `dlopen` anything new.
        let process = unsafe { Library::this() }.map_err(|_| CompileError::UnsupportedEnvironment)?;

        let get_attr = symbol_address(&process, b"PyObject_GetAttr\0")?;
        let set_attr = symbol_address(&process, b"PyObject_SetAttr\0")?;
        let is_true = symbol_address(&process, b"PyObject_IsTrue\0")?;
        let load_global = symbol_address(&process, b"_PyDict_LoadGlobal\0")?;
        let call_function = symbol_address(&process, b"call_function\0")?;

        let true_ptr = symbol_address(&process, b"_Py_TrueStruct\0")?;
        let false_ptr = symbol_address(&process, b"_Py_FalseStruct\0")?;
        // SAFETY: both addresses come from the host's own symbol table and
        // name statically-allocated, permanently live singletons.
        let true_singleton = unsafe { ObjectPtr::from_raw(true_ptr as *mut c_void) }
            .ok_or(CompileError::UnsupportedEnvironment)?;
        let false_singleton = unsafe { ObjectPtr::from_raw(false_ptr as *mut c_void) }
            .ok_or(CompileError::UnsupportedEnvironment)?;

        Ok(RuntimeSymbols {
            get_attr,
            set_attr,
            is_true,
            load_global,
            call_function,
            true_singleton,
            false_singleton,
        })
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for ProcessRuntime {
    fn symbols(&self) -> CompileResult<&RuntimeSymbols> {
        self.cache.get_or_init(Self::resolve).as_ref().map_err(Clone::clone)
    }
}

fn symbol_address(library: &Library, name: &[u8]) -> CompileResult<usize> {
    // SAFETY: `name` is a valid NUL-terminated byte string naming a symbol
    // we expect the host process to export; a missing symbol is handled as
    // an ordinary error, not undefined behavior.
    let symbol: Symbol<'_, *const c_void> =
        unsafe { library.get(name) }.map_err(|_| CompileError::UnsupportedEnvironment)?;
    Ok(*symbol as usize)
}
