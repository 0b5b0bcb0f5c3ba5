//! A from-scratch, in-process stand-in for the host object-model C API
//! (spec §2 item 11 / §4.11): boxed, `Cell<i64>`-refcounted objects with
//! real `get_attr`/`set_attr`/`load_global`/`call_function`/`is_true`
//! implementations, so integration tests can actually run the machine code
//! [`compile`][stackjit::compile] emits instead of only inspecting it.
//!
//! Grounded on `original_source/cinder/runtime.py`'s object-model surface,
//! not a binding to any real host language.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;

use stackjit::runtime::{ObjectPtr, Runtime, RuntimeSymbols};
use stackjit::CompileResult;

/// The refcount field every emitted incref/decref sequence assumes sits at
/// offset 0 of a host object; `repr(C)` pins it there.
#[repr(C)]
pub struct FakeObject {
    pub refcount: Cell<i64>,
    pub payload: Payload,
}

pub enum Payload {
    Int(i64),
    Str(String),
    Bool(bool),
    Attrs(RefCell<HashMap<String, ObjectPtr>>),
    Dict(RefCell<HashMap<String, ObjectPtr>>),
    Callable(Box<dyn Fn(&[ObjectPtr]) -> ObjectPtr>),
}

unsafe fn as_fake(ptr: ObjectPtr) -> &'static FakeObject {
    &*(ptr.as_raw() as *const FakeObject)
}

fn incref(ptr: ObjectPtr) {
    let obj = unsafe { as_fake(ptr) };
    obj.refcount.set(obj.refcount.get() + 1);
}

fn decref(ptr: ObjectPtr) {
    let obj = unsafe { as_fake(ptr) };
    obj.refcount.set(obj.refcount.get() - 1);
}

/// Current refcount of a fake object, for test assertions.
pub fn refcount_of(ptr: ObjectPtr) -> i64 {
    unsafe { as_fake(ptr) }.refcount.get()
}

fn leak(obj: FakeObject) -> ObjectPtr {
    let boxed = Box::leak(Box::new(obj));
    unsafe { ObjectPtr::from_raw(boxed as *mut FakeObject as *mut c_void) }.unwrap()
}

pub fn make_int(value: i64) -> ObjectPtr {
    leak(FakeObject { refcount: Cell::new(1), payload: Payload::Int(value) })
}

pub fn make_str(value: &str) -> ObjectPtr {
    leak(FakeObject { refcount: Cell::new(1), payload: Payload::Str(value.to_string()) })
}

pub fn make_bool(value: bool) -> ObjectPtr {
    leak(FakeObject { refcount: Cell::new(1), payload: Payload::Bool(value) })
}

/// An object with a single attribute pre-populated, backing `LoadAttr`/
/// `StoreAttr` scenarios.
pub fn make_object_with_attr(name: &str, value: ObjectPtr) -> ObjectPtr {
    let mut map = HashMap::new();
    map.insert(name.to_string(), value);
    leak(FakeObject { refcount: Cell::new(1), payload: Payload::Attrs(RefCell::new(map)) })
}

pub fn make_dict(entries: &[(&str, ObjectPtr)]) -> ObjectPtr {
    let map = entries.iter().map(|&(k, v)| (k.to_string(), v)).collect();
    leak(FakeObject { refcount: Cell::new(1), payload: Payload::Dict(RefCell::new(map)) })
}

/// A callable object backed by an arbitrary Rust closure — in particular,
/// one that calls into a separately JIT-compiled [`stackjit::FunctionHandle`].
pub fn make_callable<F>(f: F) -> ObjectPtr
where
    F: Fn(&[ObjectPtr]) -> ObjectPtr + 'static,
{
    leak(FakeObject { refcount: Cell::new(1), payload: Payload::Callable(Box::new(f)) })
}

fn attr_map(obj: &FakeObject) -> &RefCell<HashMap<String, ObjectPtr>> {
    match &obj.payload {
        Payload::Attrs(map) => map,
        _ => panic!("fake object has no attributes"),
    }
}

fn dict_map(obj: &FakeObject) -> &RefCell<HashMap<String, ObjectPtr>> {
    match &obj.payload {
        Payload::Dict(map) => map,
        _ => panic!("fake object is not a dict"),
    }
}

fn str_key(obj: &FakeObject) -> String {
    match &obj.payload {
        Payload::Str(s) => s.clone(),
        _ => panic!("fake name object is not a string"),
    }
}

/// `PyObject_IsTrue` stand-in. Non-empty strings, non-zero ints, `true`,
/// and every attribute/dict/callable object are truthy.
pub unsafe extern "C" fn fake_is_true(ptr: ObjectPtr) -> i64 {
    let obj = as_fake(ptr);
    let truthy = match &obj.payload {
        Payload::Int(n) => *n != 0,
        Payload::Bool(b) => *b,
        Payload::Str(s) => !s.is_empty(),
        Payload::Attrs(_) | Payload::Dict(_) | Payload::Callable(_) => true,
    };
    truthy as i64
}

/// `PyObject_GetAttr` stand-in. Returns a new reference.
pub unsafe extern "C" fn fake_get_attr(receiver: ObjectPtr, name: ObjectPtr) -> ObjectPtr {
    let key = str_key(as_fake(name));
    let map = attr_map(as_fake(receiver));
    let value = *map.borrow().get(&key).unwrap_or_else(|| panic!("missing attribute {key:?}"));
    incref(value);
    value
}

/// `PyObject_SetAttr` stand-in. Takes no ownership of any argument; the
/// attribute dict takes its own strong reference to `value`.
pub unsafe extern "C" fn fake_set_attr(receiver: ObjectPtr, name: ObjectPtr, value: ObjectPtr) -> i32 {
    let key = str_key(as_fake(name));
    let map = attr_map(as_fake(receiver));
    incref(value);
    map.borrow_mut().insert(key, value);
    0
}

/// `_PyDict_LoadGlobal` stand-in: `globals` first, `builtins` as fallback.
/// Returns a borrowed reference.
pub unsafe extern "C" fn fake_load_global(globals: ObjectPtr, builtins: ObjectPtr, name: ObjectPtr) -> ObjectPtr {
    let key = str_key(as_fake(name));
    if let Some(&value) = dict_map(as_fake(globals)).borrow().get(&key) {
        return value;
    }
    *dict_map(as_fake(builtins))
        .borrow()
        .get(&key)
        .unwrap_or_else(|| panic!("name {key:?} not found in globals or builtins"))
}

/// `call_function` stand-in: `stack_top` points at a contiguous
/// `callable, arg0, .., argN-1` array; takes ownership of every reference
/// in it and returns one new reference (spec §4.7).
pub unsafe extern "C" fn fake_call_function(
    stack_top: *const ObjectPtr,
    num_args: i32,
    _num_kwargs: i32,
) -> ObjectPtr {
    let callable_ptr = *stack_top;
    let args_ptr = stack_top.add(1);
    let args = std::slice::from_raw_parts(args_ptr, num_args as usize);
    let result = match &as_fake(callable_ptr).payload {
        Payload::Callable(f) => f(args),
        _ => panic!("call_function target is not callable"),
    };
    decref(callable_ptr);
    for &arg in args {
        decref(arg);
    }
    result
}

/// A [`Runtime`] backed by real, in-process implementations of every
/// foreign symbol, against the [`FakeObject`] model above.
pub struct FakeRuntime {
    symbols: RuntimeSymbols,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let true_singleton = make_bool(true);
        let false_singleton = make_bool(false);
        Self {
            symbols: RuntimeSymbols {
                get_attr: fake_get_attr as usize,
                set_attr: fake_set_attr as usize,
                is_true: fake_is_true as usize,
                load_global: fake_load_global as usize,
                call_function: fake_call_function as usize,
                true_singleton,
                false_singleton,
            },
        }
    }

    pub fn true_singleton(&self) -> ObjectPtr {
        self.symbols.true_singleton
    }

    pub fn false_singleton(&self) -> ObjectPtr {
        self.symbols.false_singleton
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for FakeRuntime {
    fn symbols(&self) -> CompileResult<&RuntimeSymbols> {
        Ok(&self.symbols)
    }
}
