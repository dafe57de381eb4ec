//! Runtime heap object representations and the handle types used to refer
//! to them.
//!
//! Every object the interpreter allocates lives in the [`Heap`] registry and
//! is addressed through a plain index handle. Handles are `Copy` and compare
//! by identity, which is exactly the equality the language needs for classes,
//! instances, and (because of interning) strings.
//!
//! [`Heap`]: crate::heap::Heap

use crate::bytecode::Chunk;
use crate::table::Table;
use crate::value::Value;

/// Handle to any heap object. The payload is an index into the heap's slot
/// vector; two handles are the same object iff they are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) u32);

/// Handle to a heap object that is known to be an interned string.
///
/// Hash tables only accept `StrRef` keys, so "keys are interned strings" is
/// enforced by the type system rather than by runtime checks. Because every
/// string is interned, equal content implies equal handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrRef(pub(crate) u32);

impl From<StrRef> for ObjRef {
    fn from(s: StrRef) -> Self {
        ObjRef(s.0)
    }
}

/// Host callback signature for native functions: the VM passes the argument
/// slice and pushes the returned value. Arity is validated by the VM before
/// the callback runs.
pub type NativeFn = fn(&[Value]) -> Value;

/// An immutable interned string: content plus its precomputed FNV-1a hash.
#[derive(Debug)]
pub struct StringObj {
    pub text: String,
    pub hash: u32,
}

/// A compiled function: the unit the compiler produces. Not directly
/// callable at runtime; execution always goes through a [`Closure`].
#[derive(Debug)]
pub struct Function {
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// `None` for the top-level script.
    pub name: Option<StrRef>,
}

impl Function {
    pub fn new(name: Option<StrRef>) -> Self {
        Self {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

/// A host function exposed to scripts.
pub struct Native {
    pub arity: usize,
    pub function: NativeFn,
}

impl std::fmt::Debug for Native {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Native").field("arity", &self.arity).finish()
    }
}

/// A runtime function value: the compiled function plus the captured
/// upvalues. `upvalues.len()` equals the function's `upvalue_count` once
/// construction completes.
#[derive(Debug)]
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A captured binding shared between closures and the scope that declared it.
///
/// While the declaring frame is live the upvalue is *open* and points at a
/// value-stack slot; open upvalues form an intrusive list through `next`,
/// sorted by strictly decreasing slot. When the slot dies the VM promotes
/// the upvalue to *closed*, moving the value inline and unlinking it.
#[derive(Debug, Clone, Copy)]
pub enum Upvalue {
    Open { slot: usize, next: Option<ObjRef> },
    Closed(Value),
}

/// A class: a name and a method table mapping method names to closures.
#[derive(Debug)]
pub struct Class {
    pub name: StrRef,
    pub methods: Table,
}

/// An instance of a class with its own field table.
#[derive(Debug)]
pub struct Instance {
    pub class: ObjRef,
    pub fields: Table,
}

/// A method closure paired with the receiver it was accessed on.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

/// One heap object. The discriminant is the object's runtime kind tag.
#[derive(Debug)]
pub enum Obj {
    String(StringObj),
    Function(Function),
    Native(Native),
    Closure(Closure),
    Upvalue(Upvalue),
    Class(Class),
    Instance(Instance),
    BoundMethod(BoundMethod),
}

impl Obj {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::Function(_) => "function",
            Obj::Native(_) => "native",
            Obj::Closure(_) => "closure",
            Obj::Upvalue(_) => "upvalue",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::BoundMethod(_) => "bound method",
        }
    }

    /// Approximate payload size, fed into the collector's bytes-allocated
    /// heuristic. Counts the inline struct plus owned storage.
    pub fn byte_count(&self) -> usize {
        let base = std::mem::size_of::<Obj>();
        base + match self {
            Obj::String(s) => s.text.len() + 1,
            Obj::Function(f) => {
                f.chunk.code.len()
                    + f.chunk.lines.len() * std::mem::size_of::<u32>()
                    + f.chunk.constants.len() * std::mem::size_of::<Value>()
            }
            Obj::Native(_) => 0,
            Obj::Closure(c) => c.upvalues.len() * std::mem::size_of::<ObjRef>(),
            Obj::Upvalue(_) => 0,
            Obj::Class(c) => c.methods.byte_count(),
            Obj::Instance(i) => i.fields.byte_count(),
            Obj::BoundMethod(_) => 0,
        }
    }
}
