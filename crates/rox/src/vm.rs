//! Stack-based bytecode virtual machine.
//!
//! This module executes the chunks the compiler produces. All runtime state
//! lives here: the value stack, the call-frame stack, global variables, the
//! open-upvalue list, and the heap. The VM is also the only collection
//! trigger point: every allocation it performs goes through a gateway that
//! may run the collector first, and the roots handed to the collector are
//! exactly the places the VM keeps values.
//!
//! A `Vm` is an ordinary value: construct one, feed it source with
//! [`Vm::interpret`], and drain whatever the program printed with
//! [`Vm::take_output`]. After a runtime error the machine resets its stacks
//! and stays usable, which is what keeps the interactive prompt alive.

use crate::builtins;
use crate::bytecode::OpCode;
use crate::compiler;
use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::object::{
    BoundMethod, Class, Closure, Instance, Native, NativeFn, Obj, ObjRef, StrRef, Upvalue,
};
use crate::table::Table;
use crate::value::Value;

/// Hard limit on call depth.
const FRAMES_MAX: usize = 64;
/// Value-stack capacity: enough for every frame to use all 256 slots.
const STACK_MAX: usize = FRAMES_MAX * 256;

/// One active function invocation.
struct CallFrame {
    /// The closure being executed.
    closure: ObjRef,
    /// Its raw function, cached so dispatch skips one heap hop.
    function: ObjRef,
    /// Offset of the next byte to execute in the function's chunk.
    ip: usize,
    /// Index of the frame's slot 0 in the value stack; that slot holds the
    /// callee itself (or the receiver for a bound-method call).
    base: usize,
}

/// The interpreter.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    heap: Heap,
    /// Head of the open-upvalue list, sorted by decreasing stack slot.
    open_upvalues: Option<ObjRef>,
    /// The reserved instance-constructor name, interned up front and kept
    /// as a GC root for the lifetime of the machine.
    init_string: StrRef,
    /// Lines produced by `print`, drained by the embedder.
    output: Vec<String>,
}

impl Vm {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init");
        let mut vm = Self {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            heap,
            open_upvalues: None,
            init_string,
            output: Vec::new(),
        };
        for &(name, arity, function) in builtins::all() {
            vm.define_native(name, arity, function);
        }
        vm
    }

    /// Compile and run `source`. Globals persist across calls, so a prompt
    /// can feed one line at a time to the same machine.
    pub fn interpret(&mut self, source: &str) -> Result<()> {
        let function = compiler::compile(source, &mut self.heap)?;
        let function_ref = self.heap.alloc(Obj::Function(function));
        // Root the script function on the stack before the closure
        // allocation below can trigger a collection.
        self.push(Value::Obj(function_ref));
        let closure = self.alloc(Obj::Closure(Closure {
            function: function_ref,
            upvalues: Vec::new(),
        }));
        self.pop();
        self.push(Value::Obj(closure));
        self.call_closure(closure, 0)?;
        self.run()
    }

    /// Take every line printed since the last call.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    // -----------------------------------------------------------------------
    // Introspection (used by the embedder and the test suite)
    // -----------------------------------------------------------------------

    /// Current number of values on the stack; zero between runs.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Current number of active call frames; zero between runs.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of live heap objects.
    pub fn object_count(&self) -> usize {
        self.heap.object_count()
    }

    /// Number of distinct interned strings.
    pub fn string_count(&self) -> usize {
        self.heap.string_count()
    }

    // -----------------------------------------------------------------------
    // Stack and frame primitives
    // -----------------------------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active frame")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active frame");
        let byte = self.heap.function(frame.function).chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let high = self.read_byte();
        let low = self.read_byte();
        u16::from_be_bytes([high, low])
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().expect("no active frame");
        self.heap.function(frame.function).chunk.constants[index]
    }

    fn read_string(&mut self) -> StrRef {
        let value = self.read_constant();
        let r = value.as_obj().expect("name constant is not an object");
        self.heap.as_string(r).expect("name constant is not a string")
    }

    /// Empty the stacks after a runtime error so the machine is reusable.
    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }

    /// Build a runtime error with a stack trace (innermost frame first),
    /// then reset the machine.
    fn runtime_error(&mut self, message: impl Into<String>) -> Error {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = self.heap.function(frame.function);
            let line = function.chunk.lines[frame.ip.saturating_sub(1)];
            let location = match function.name {
                Some(name) => format!("{}()", self.heap.str_text(name)),
                None => "script".to_string(),
            };
            trace.push(format!("[line {line}] in {location}"));
        }
        self.reset();
        Error::Runtime {
            message: message.into(),
            trace,
        }
    }

    // -----------------------------------------------------------------------
    // Allocation gateway
    // -----------------------------------------------------------------------

    /// Allocate through the VM so the collector can run first. Callers must
    /// keep every transient object reachable from a root (in practice: push
    /// operands on the stack) before coming here.
    fn alloc(&mut self, obj: Obj) -> ObjRef {
        self.maybe_collect();
        self.heap.alloc(obj)
    }

    fn intern(&mut self, text: &str) -> StrRef {
        self.maybe_collect();
        self.heap.intern(text)
    }

    fn maybe_collect(&mut self) {
        if cfg!(feature = "gc-stress") || self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    /// Run a full mark-sweep collection now. Roots: every stack slot, every
    /// frame's closure, the open-upvalue list, the globals table, and the
    /// reserved `"init"` string.
    pub fn collect_garbage(&mut self) {
        tracing::debug!(bytes_allocated = self.heap.bytes_allocated(), "gc begin");
        for &value in &self.stack {
            self.heap.mark_value(value);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        let mut open = self.open_upvalues;
        while let Some(r) = open {
            let next = match self.heap.upvalue(r) {
                Upvalue::Open { next, .. } => *next,
                Upvalue::Closed(_) => None,
            };
            self.heap.mark_object(r);
            open = next;
        }
        self.heap.mark_table(&self.globals);
        self.heap.mark_str(self.init_string);

        self.heap.trace_references();
        self.heap.sweep_strings();
        self.heap.sweep();
        tracing::debug!(live_bytes = self.heap.bytes_allocated(), "gc end");
    }

    fn define_native(&mut self, name: &str, arity: usize, function: NativeFn) {
        let name_ref = self.heap.intern(name);
        // Both the name and the native live on the stack across the
        // allocation so neither can be collected out from under us.
        self.push(Value::Obj(name_ref.into()));
        let native = self.alloc(Obj::Native(Native { arity, function }));
        self.push(Value::Obj(native));
        let hash = self.heap.str_hash(name_ref);
        self.globals.set(name_ref, hash, self.peek(0));
        self.pop();
        self.pop();
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<()> {
        enum Callee {
            Closure,
            Bound(Value, ObjRef),
            Class,
            Native(usize, NativeFn),
            Other,
        }

        if let Value::Obj(r) = callee {
            let kind = match self.heap.get(r) {
                Obj::Closure(_) => Callee::Closure,
                Obj::BoundMethod(b) => Callee::Bound(b.receiver, b.method),
                Obj::Class(_) => Callee::Class,
                Obj::Native(n) => Callee::Native(n.arity, n.function),
                _ => Callee::Other,
            };
            match kind {
                Callee::Closure => return self.call_closure(r, arg_count),
                Callee::Bound(receiver, method) => {
                    // The receiver takes over the callee slot, becoming the
                    // frame's slot 0 (`this`).
                    let slot = self.stack.len() - arg_count - 1;
                    self.stack[slot] = receiver;
                    return self.call_closure(method, arg_count);
                }
                Callee::Class => {
                    if arg_count != 0 {
                        return Err(self.runtime_error(format!(
                            "Expected 0 arguments but got {arg_count}"
                        )));
                    }
                    // The class on the stack roots itself across this
                    // allocation, then the instance replaces it in place.
                    let instance = self.alloc(Obj::Instance(Instance {
                        class: r,
                        fields: Table::new(),
                    }));
                    let slot = self.stack.len() - 1;
                    self.stack[slot] = Value::Obj(instance);
                    return Ok(());
                }
                Callee::Native(arity, function) => {
                    if arg_count != arity {
                        return Err(self.runtime_error(format!(
                            "Expected {arity} arguments but got {arg_count}"
                        )));
                    }
                    let first = self.stack.len() - arg_count;
                    let result = function(&self.stack[first..]);
                    self.stack.truncate(first - 1);
                    self.push(result);
                    return Ok(());
                }
                Callee::Other => {}
            }
        }
        Err(self.runtime_error("Can only call functions and classes"))
    }

    fn call_closure(&mut self, closure: ObjRef, arg_count: usize) -> Result<()> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity;
        if arg_count != arity {
            return Err(self.runtime_error(format!(
                "Expected {arity} arguments but got {arg_count}"
            )));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow"));
        }
        self.frames.push(CallFrame {
            closure,
            function,
            ip: 0,
            base: self.stack.len() - arg_count - 1,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Upvalues
    // -----------------------------------------------------------------------

    /// Find or create the open upvalue for a stack slot, keeping the list
    /// sorted by strictly decreasing slot.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut prev: Option<ObjRef> = None;
        let mut current = self.open_upvalues;
        while let Some(r) = current {
            let Upvalue::Open { slot: s, next } = *self.heap.upvalue(r) else {
                unreachable!("closed upvalue in open list");
            };
            if s <= slot {
                if s == slot {
                    return r;
                }
                break;
            }
            prev = Some(r);
            current = next;
        }

        let created = self.alloc(Obj::Upvalue(Upvalue::Open {
            slot,
            next: current,
        }));
        match prev {
            None => self.open_upvalues = Some(created),
            Some(p) => {
                if let Upvalue::Open { next, .. } = self.heap.upvalue_mut(p) {
                    *next = Some(created);
                }
            }
        }
        created
    }

    /// Close every open upvalue whose slot is at or above `from`: move the
    /// value inline and drop the entry from the list.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(r) = self.open_upvalues {
            let Upvalue::Open { slot, next } = *self.heap.upvalue(r) else {
                unreachable!("closed upvalue in open list");
            };
            if slot < from {
                break;
            }
            let value = self.stack[slot];
            *self.heap.upvalue_mut(r) = Upvalue::Closed(value);
            self.open_upvalues = next;
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Pop two numeric operands, or fail with the standard type error.
    fn numeric_operands(&mut self) -> Result<(f64, f64)> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                Ok((a, b))
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    #[cfg(feature = "trace-execution")]
    fn trace_instruction(&self) {
        let mut line = String::from("          ");
        for &value in &self.stack {
            line.push_str(&format!("[ {} ]", self.heap.format_value(value)));
        }
        eprintln!("{line}");
        let frame = self.frame();
        let mut out = String::new();
        crate::debug::disassemble_instruction(
            &self.heap.function(frame.function).chunk,
            frame.ip,
            &self.heap,
            &mut out,
        );
        eprint!("{out}");
    }

    /// The fetch-decode-execute loop for the topmost frame. Returns when the
    /// script frame unwinds, or with a runtime error.
    fn run(&mut self) -> Result<()> {
        loop {
            #[cfg(feature = "trace-execution")]
            self.trace_instruction();

            let op = match OpCode::try_from(self.read_byte()) {
                Ok(op) => op,
                Err(_) => return Err(self.runtime_error("Unknown opcode.")),
            };

            match op {
                OpCode::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().base;
                    self.stack[base + slot] = self.peek(0);
                }

                OpCode::GetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.str_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => {
                            let text = self.heap.str_text(name).to_string();
                            return Err(
                                self.runtime_error(format!("Undefined variable '{text}'."))
                            );
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.str_hash(name);
                    self.globals.set(name, hash, self.peek(0));
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.str_hash(name);
                    if self.globals.set(name, hash, self.peek(0)) {
                        // Assignment must not create a global; undo and fail.
                        self.globals.delete(name, hash);
                        let text = self.heap.str_text(name).to_string();
                        return Err(self.runtime_error(format!("Undefined variable '{text}'.")));
                    }
                }

                OpCode::GetUpvalue => {
                    let index = self.read_byte() as usize;
                    let upvalue = self.heap.closure(self.frame().closure).upvalues[index];
                    let value = match *self.heap.upvalue(upvalue) {
                        Upvalue::Open { slot, .. } => self.stack[slot],
                        Upvalue::Closed(value) => value,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let index = self.read_byte() as usize;
                    let value = self.peek(0);
                    let upvalue = self.heap.closure(self.frame().closure).upvalues[index];
                    match self.heap.upvalue_mut(upvalue) {
                        Upvalue::Open { slot, .. } => {
                            let slot = *slot;
                            self.stack[slot] = value;
                        }
                        Upvalue::Closed(closed) => *closed = value,
                    }
                }

                OpCode::GetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(0).as_obj();
                    let Some(instance_ref) =
                        receiver.filter(|&r| matches!(self.heap.get(r), Obj::Instance(_)))
                    else {
                        return Err(self.runtime_error("Only instances have properties."));
                    };
                    let hash = self.heap.str_hash(name);
                    if let Some(value) = self.heap.instance(instance_ref).fields.get(name, hash) {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = self.heap.instance(instance_ref).class;
                        match self.heap.class(class).methods.get(name, hash) {
                            Some(Value::Obj(method)) => {
                                // The instance stays on the stack while the
                                // bound method is allocated.
                                let bound = self.alloc(Obj::BoundMethod(BoundMethod {
                                    receiver: self.peek(0),
                                    method,
                                }));
                                self.pop();
                                self.push(Value::Obj(bound));
                            }
                            _ => {
                                let text = self.heap.str_text(name).to_string();
                                return Err(
                                    self.runtime_error(format!("Undefined property '{text}'."))
                                );
                            }
                        }
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(1).as_obj();
                    let Some(instance_ref) =
                        receiver.filter(|&r| matches!(self.heap.get(r), Obj::Instance(_)))
                    else {
                        return Err(self.runtime_error("Only instances have fields."));
                    };
                    let hash = self.heap.str_hash(name);
                    let value = self.peek(0);
                    self.heap
                        .instance_mut(instance_ref)
                        .fields
                        .set(name, hash, value);
                    // Leave the stored value, not the instance, on the stack.
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(Value::Bool(a > b));
                }
                OpCode::Less => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(Value::Bool(a < b));
                }

                OpCode::Add => match (self.peek(1), self.peek(0)) {
                    (Value::Number(a), Value::Number(b)) => {
                        self.pop();
                        self.pop();
                        self.push(Value::Number(a + b));
                    }
                    (Value::Obj(left), Value::Obj(right)) => {
                        match (self.heap.as_string(left), self.heap.as_string(right)) {
                            (Some(a), Some(b)) => {
                                // Build the result while both operands are
                                // still on the stack: interning may collect.
                                let mut text = String::with_capacity(
                                    self.heap.str_text(a).len() + self.heap.str_text(b).len(),
                                );
                                text.push_str(self.heap.str_text(a));
                                text.push_str(self.heap.str_text(b));
                                let result = self.intern(&text);
                                self.pop();
                                self.pop();
                                self.push(Value::Obj(result.into()));
                            }
                            _ => {
                                return Err(self.runtime_error(
                                    "Operands must be two numbers or two strings.",
                                ));
                            }
                        }
                    }
                    _ => {
                        return Err(
                            self.runtime_error("Operands must be two numbers or two strings.")
                        );
                    }
                },
                OpCode::Subtract => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(Value::Number(a - b));
                }
                OpCode::Multiply => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(Value::Number(a * b));
                }
                OpCode::Divide => {
                    let (a, b) = self.numeric_operands()?;
                    self.push(Value::Number(a / b));
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsy()));
                }
                OpCode::Negate => {
                    match self.peek(0) {
                        Value::Number(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        _ => return Err(self.runtime_error("Operand must be a number.")),
                    }
                }

                OpCode::Print => {
                    let value = self.pop();
                    let text = self.heap.format_value(value);
                    self.output.push(text);
                }

                OpCode::Jump => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16() as usize;
                    if self.peek(0).is_falsy() {
                        self.frame_mut().ip += offset;
                    }
                }
                OpCode::JumpBack => {
                    let offset = self.read_u16() as usize;
                    self.frame_mut().ip -= offset;
                }

                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    self.call_value(self.peek(arg_count), arg_count)?;
                }
                OpCode::Closure => {
                    let constant = self.read_constant();
                    let function_ref = constant.as_obj().expect("closure constant");
                    let upvalue_count = self.heap.function(function_ref).upvalue_count;
                    let closure = self.alloc(Obj::Closure(Closure {
                        function: function_ref,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    // Rooted immediately: captures below may allocate.
                    self.push(Value::Obj(closure));
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        let captured = if is_local {
                            let base = self.frame().base;
                            self.capture_upvalue(base + index)
                        } else {
                            self.heap.closure(self.frame().closure).upvalues[index]
                        };
                        self.heap.closure_mut(closure).upvalues.push(captured);
                    }
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }

                OpCode::Class => {
                    let name = self.read_string();
                    let class = self.alloc(Obj::Class(Class {
                        name,
                        methods: Table::new(),
                    }));
                    self.push(Value::Obj(class));
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let hash = self.heap.str_hash(name);
                    let method = self.peek(0);
                    let class_ref = self.peek(1).as_obj().expect("method target is not a class");
                    self.heap.class_mut(class_ref).methods.set(name, hash, method);
                    self.pop();
                }

                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("no active frame");
                    self.close_upvalues(frame.base);
                    if self.frames.is_empty() {
                        // Pop the script closure; the stack is now empty.
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.base);
                    self.push(result);
                }
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
