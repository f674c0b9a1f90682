//! Reference interpreter for the program IR.
//!
//! The interpreter executes a [`Program`] with JVM-like semantics so that the
//! behavior of a program before and after unboxing can be compared observably:
//! printed lines, the returned value, and the kind and message of an exception
//! that escapes the entry point.
//!
//! # Semantics
//!
//! - Classes are initialized lazily, superclass first, exactly once. A class whose
//!   initializer is already running on the stack is treated as initialized.
//!   Initialization is triggered by static field access, static invocation, `new`
//!   and `init-class`.
//! - Virtual and interface calls dispatch on the receiver's runtime class by name
//!   and descriptor, falling back to interface default methods.
//! - Library methods run natively (see the `native` module); `toString`, `equals`
//!   and `hashCode` dispatch to program overrides.
//! - There are no exception handlers: a thrown exception unwinds to the entry point
//!   and is reported in [`Execution::outcome`].
//! - References to removed members raise `NoSuchMethodError`, `NoSuchFieldError`
//!   or `NoClassDefFoundError`, as a linker would.
//!
//! # Example
//!
//! ```rust,ignore
//! use enumbox::interp::execute;
//!
//! let main = program.require_method(main_class, "main")?;
//! let before = execute(&program, main)?;
//! ```

mod error;
mod native;
mod value;

pub use error::InterpError;
pub use value::{
    format_double, string_hash, CollectionKind, EnumData, ExceptionKind, HeapObject, ObjRef,
    Thrown, Value,
};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::program::{
    BinaryOp, BlockId, Callee, ClassId, CmpKind, Code, ConstValue, FieldId, Instr, InvokeKind,
    LibraryType, MethodId, Program, Type, ValueId,
};

/// Default instruction budget of one run.
pub const DEFAULT_STEP_LIMIT: u64 = 2_000_000;

/// Default maximum call depth.
pub const DEFAULT_CALL_DEPTH: usize = 256;

/// How an entry-point invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Normal completion with the returned value, if any.
    Returned(Option<Value>),
    /// An exception escaped the entry point.
    Threw(Thrown),
}

/// Observable result of running an entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// Lines printed through `println`, in order.
    pub output: Vec<String>,
    /// Completion of the entry point.
    pub outcome: Outcome,
    /// Number of instructions executed.
    pub steps: u64,
}

impl Execution {
    /// Returns the escaped exception, if any.
    #[must_use]
    pub fn thrown(&self) -> Option<&Thrown> {
        match &self.outcome {
            Outcome::Threw(thrown) => Some(thrown),
            Outcome::Returned(_) => None,
        }
    }

    /// Returns the returned value, if the entry point completed with one.
    #[must_use]
    pub fn returned(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Returned(value) => value.as_ref(),
            Outcome::Threw(_) => None,
        }
    }

    /// Returns the printed lines followed by the uncaught exception, if any.
    ///
    /// Two programs with equal transcripts are observably equivalent from `main`.
    #[must_use]
    pub fn transcript(&self) -> Vec<String> {
        let mut lines = self.output.clone();
        if let Some(thrown) = self.thrown() {
            lines.push(format!("Exception in thread \"main\" {thrown}"));
        }
        lines
    }
}

/// Non-local exits of interpreted code.
#[derive(Debug)]
enum Abrupt {
    /// A program exception, referencing a [`HeapObject::Throwable`].
    Throw(ObjRef),
    /// An interpreter failure.
    Fatal(InterpError),
}

impl From<InterpError> for Abrupt {
    fn from(error: InterpError) -> Self {
        Abrupt::Fatal(error)
    }
}

type Exec<T> = std::result::Result<T, Abrupt>;

/// Control flow after one instruction.
enum Flow {
    Continue,
    Jump(BlockId),
    Return(Option<Value>),
}

/// Activation record of one method.
struct Frame<'c> {
    method: MethodId,
    code: &'c Code,
    regs: Vec<Option<Value>>,
    args: Vec<Value>,
}

/// Executes programs over a private heap.
pub struct Interpreter<'p> {
    program: &'p Program,
    heap: Vec<HeapObject>,
    statics: FxHashMap<FieldId, Value>,
    initialized: FxHashSet<ClassId>,
    output: Vec<String>,
    steps: u64,
    step_limit: u64,
    depth: usize,
    depth_limit: usize,
}

/// Runs `entry` with no arguments on a fresh interpreter.
///
/// # Errors
///
/// Returns an [`InterpError`] if the interpreter itself fails; program exceptions
/// are reported in the returned [`Execution`].
pub fn execute(program: &Program, entry: MethodId) -> Result<Execution, InterpError> {
    Interpreter::new(program).run(entry, Vec::new())
}

impl<'p> Interpreter<'p> {
    /// Creates an interpreter with default limits.
    #[must_use]
    pub fn new(program: &'p Program) -> Self {
        Self {
            program,
            heap: Vec::new(),
            statics: FxHashMap::default(),
            initialized: FxHashSet::default(),
            output: Vec::new(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            depth: 0,
            depth_limit: DEFAULT_CALL_DEPTH,
        }
    }

    /// Sets the instruction budget.
    #[must_use]
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Sets the maximum call depth.
    #[must_use]
    pub fn with_call_depth(mut self, limit: usize) -> Self {
        self.depth_limit = limit;
        self
    }

    /// Invokes `entry` with `args` and collects its observable behavior.
    ///
    /// Heap, statics and initialization state persist across calls on the same
    /// interpreter; printed output is drained into each [`Execution`].
    ///
    /// # Errors
    ///
    /// Returns an [`InterpError`] if interpretation fails.
    pub fn run(&mut self, entry: MethodId, args: Vec<Value>) -> Result<Execution, InterpError> {
        let program = self.program;
        let result = if program.is_live_method(entry) && program.method(entry).is_static() {
            self.ensure_initialized(program.method(entry).holder)
                .and_then(|()| self.call(entry, args))
        } else {
            self.call(entry, args)
        };
        let outcome = match result {
            Ok(value) => Outcome::Returned(value),
            Err(Abrupt::Throw(exception)) => Outcome::Threw(self.thrown(exception)?),
            Err(Abrupt::Fatal(error)) => return Err(error),
        };
        Ok(Execution {
            output: std::mem::take(&mut self.output),
            outcome,
            steps: self.steps,
        })
    }

    /// Returns a heap object.
    #[must_use]
    pub fn object(&self, reference: ObjRef) -> Option<&HeapObject> {
        self.heap.get(reference.0)
    }

    /// Returns the current value of a static field.
    #[must_use]
    pub fn static_value(&self, field: FieldId) -> Value {
        self.statics
            .get(&field)
            .cloned()
            .unwrap_or_else(|| Value::default_for(&self.program.field(field).ty))
    }

    // ── Heap ───────────────────────────────────────────────────────────

    fn alloc(&mut self, object: HeapObject) -> ObjRef {
        self.heap.push(object);
        ObjRef(self.heap.len() - 1)
    }

    fn throw(&mut self, kind: ExceptionKind, message: Option<String>) -> Abrupt {
        Abrupt::Throw(self.alloc(HeapObject::Throwable(Thrown { kind, message })))
    }

    fn thrown(&self, exception: ObjRef) -> Result<Thrown, InterpError> {
        match self.heap.get(exception.0) {
            Some(HeapObject::Throwable(thrown)) => Ok(thrown.clone()),
            _ => Err(InterpError::MalformedCode {
                method: "<entry>".to_string(),
                message: "non-throwable object thrown".to_string(),
            }),
        }
    }

    fn null_pointer(&mut self) -> Abrupt {
        self.throw(ExceptionKind::NullPointerException, None)
    }

    // ── Class initialization ───────────────────────────────────────────

    fn ensure_initialized(&mut self, class: ClassId) -> Exec<()> {
        if !self.initialized.insert(class) {
            return Ok(());
        }
        let program = self.program;
        if let Some(superclass) = program.superclass(class) {
            self.ensure_initialized(superclass)?;
        }
        let clinit = program
            .class(class)
            .methods
            .iter()
            .copied()
            .find(|m| program.method(*m).is_class_initializer());
        if let Some(clinit) = clinit {
            self.call(clinit, Vec::new())?;
        }
        Ok(())
    }

    fn require_live_class(&mut self, class: ClassId) -> Exec<()> {
        if self.program.is_live_class(class) {
            Ok(())
        } else {
            let name = self.program.class(class).name.clone();
            Err(self.throw(ExceptionKind::NoClassDefFoundError, Some(name)))
        }
    }

    fn require_live_field(&mut self, field: FieldId) -> Exec<()> {
        if self.program.is_live_field(field) {
            Ok(())
        } else {
            let name = self.program.field(field).name.clone();
            Err(self.throw(ExceptionKind::NoSuchFieldError, Some(name)))
        }
    }

    // ── Calls ──────────────────────────────────────────────────────────

    fn call(&mut self, method: MethodId, args: Vec<Value>) -> Exec<Option<Value>> {
        let program = self.program;
        if !program.is_live_method(method) {
            let reference = program.method_reference(method).to_string();
            return Err(self.throw(ExceptionKind::NoSuchMethodError, Some(reference)));
        }
        let Some(code) = program.method(method).code.as_ref() else {
            let reference = program.method_reference(method).to_string();
            return Err(self.throw(ExceptionKind::AbstractMethodError, Some(reference)));
        };
        if self.depth >= self.depth_limit {
            return Err(InterpError::CallDepth {
                limit: self.depth_limit,
            }
            .into());
        }
        self.depth += 1;
        let mut frame = Frame {
            method,
            code,
            regs: vec![None; code.values.len()],
            args,
        };
        let result = self.run_frame(&mut frame);
        self.depth -= 1;
        result
    }

    fn invoke_program(&mut self, kind: InvokeKind, method: MethodId, args: Vec<Value>) -> Exec<Option<Value>> {
        let program = self.program;
        if !program.is_live_method(method) {
            let reference = program.method_reference(method).to_string();
            return Err(self.throw(ExceptionKind::NoSuchMethodError, Some(reference)));
        }
        let def = program.method(method);
        match kind {
            InvokeKind::Static => {
                self.ensure_initialized(def.holder)?;
                self.call(method, args)
            }
            InvokeKind::Direct | InvokeKind::Super => {
                if args.first().map_or(true, Value::is_null) {
                    return Err(self.null_pointer());
                }
                self.call(method, args)
            }
            InvokeKind::Virtual | InvokeKind::Interface => {
                let receiver = match args.first() {
                    None | Some(Value::Null) => return Err(self.null_pointer()),
                    Some(receiver) => receiver.clone(),
                };
                let target = match self.runtime_class(&receiver) {
                    Some(class) => {
                        let descriptor = program.method_descriptor(method);
                        program
                            .dispatch(class, &def.name, &descriptor)
                            .unwrap_or(method)
                    }
                    None => method,
                };
                self.call(target, args)
            }
        }
    }

    /// Runtime program class of an instance.
    fn runtime_class(&self, value: &Value) -> Option<ClassId> {
        match value {
            Value::Ref(r) => match self.heap.get(r.0)? {
                HeapObject::Instance { class, .. } => Some(*class),
                _ => None,
            },
            _ => None,
        }
    }

    // ── Execution ──────────────────────────────────────────────────────

    fn method_name(&self, method: MethodId) -> String {
        self.program.method_reference(method).to_string()
    }

    fn malformed(&self, method: MethodId, message: impl Into<String>) -> Abrupt {
        Abrupt::Fatal(InterpError::MalformedCode {
            method: self.method_name(method),
            message: message.into(),
        })
    }

    fn mismatch(&self, method: MethodId, expected: &'static str, found: &Value) -> Abrupt {
        Abrupt::Fatal(InterpError::TypeMismatch {
            method: self.method_name(method),
            expected,
            found: found.kind_name(),
        })
    }

    fn tick(&mut self) -> Exec<()> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(InterpError::StepLimit {
                limit: self.step_limit,
            }
            .into());
        }
        Ok(())
    }

    fn read(&self, frame: &Frame<'_>, value: ValueId) -> Exec<Value> {
        frame
            .regs
            .get(value.index())
            .and_then(Clone::clone)
            .ok_or_else(|| {
                Abrupt::Fatal(InterpError::UndefinedValue {
                    method: self.method_name(frame.method),
                    value: u32::try_from(value.index()).unwrap_or(u32::MAX),
                })
            })
    }

    fn read_int(&self, frame: &Frame<'_>, value: ValueId) -> Exec<i32> {
        let v = self.read(frame, value)?;
        v.as_int().ok_or_else(|| self.mismatch(frame.method, "int", &v))
    }

    fn write(frame: &mut Frame<'_>, dest: ValueId, value: Value) {
        if let Some(slot) = frame.regs.get_mut(dest.index()) {
            *slot = Some(value);
        }
    }

    fn run_frame(&mut self, frame: &mut Frame<'_>) -> Exec<Option<Value>> {
        let code = frame.code;
        let mut current = BlockId::new(0);
        let mut previous: Option<BlockId> = None;
        loop {
            let Some(block) = code.blocks.get(current.index()) else {
                return Err(self.malformed(frame.method, format!("missing block b{current}")));
            };
            if let Some(previous) = previous {
                // Phis read their operands simultaneously.
                let mut incoming = Vec::with_capacity(block.phis.len());
                for phi in &block.phis {
                    let Some((_, operand)) = phi.operands.iter().find(|(pred, _)| *pred == previous)
                    else {
                        return Err(self.malformed(
                            frame.method,
                            format!("phi v{} has no operand for b{previous}", phi.dest),
                        ));
                    };
                    incoming.push((phi.dest, self.read(frame, *operand)?));
                }
                for (dest, value) in incoming {
                    Self::write(frame, dest, value);
                }
            }

            let mut next = None;
            for instr in &block.instrs {
                self.tick()?;
                match self.step(frame, instr)? {
                    Flow::Continue => {}
                    Flow::Jump(target) => {
                        next = Some(target);
                        break;
                    }
                    Flow::Return(value) => return Ok(value),
                }
            }
            let Some(next) = next else {
                return Err(self.malformed(frame.method, format!("block b{current} falls through")));
            };
            previous = Some(current);
            current = next;
        }
    }

    #[allow(clippy::too_many_lines)]
    fn step(&mut self, frame: &mut Frame<'_>, instr: &Instr) -> Exec<Flow> {
        match instr {
            Instr::Const { dest, value } => {
                let value = self.constant(value)?;
                Self::write(frame, *dest, value);
            }
            Instr::Arg { dest, index } => {
                let Some(value) = frame.args.get(usize::from(*index)).cloned() else {
                    return Err(self.malformed(frame.method, format!("missing argument {index}")));
                };
                Self::write(frame, *dest, value);
            }
            Instr::Binary { dest, op, lhs, rhs } => {
                let lhs = self.read(frame, *lhs)?;
                let rhs = self.read(frame, *rhs)?;
                let value = self.binary(frame.method, *op, &lhs, &rhs)?;
                Self::write(frame, *dest, value);
            }
            Instr::Compare {
                dest,
                cmp,
                lhs,
                rhs,
            } => {
                let lhs = self.read(frame, *lhs)?;
                let rhs = self.read(frame, *rhs)?;
                let holds = self.compare(frame.method, *cmp, &lhs, &rhs)?;
                Self::write(frame, *dest, Value::Bool(holds));
            }
            Instr::If {
                cmp,
                lhs,
                rhs,
                then_block,
                else_block,
            } => {
                let lhs = self.read(frame, *lhs)?;
                let holds = match rhs {
                    Some(rhs) => {
                        let rhs = self.read(frame, *rhs)?;
                        self.compare(frame.method, *cmp, &lhs, &rhs)?
                    }
                    None => self.compare_zero(frame.method, *cmp, &lhs)?,
                };
                return Ok(Flow::Jump(if holds { *then_block } else { *else_block }));
            }
            Instr::Goto { target } => return Ok(Flow::Jump(*target)),
            Instr::Switch {
                value,
                keys,
                targets,
                default,
            } => {
                let key = self.read_int(frame, *value)?;
                let target = keys
                    .iter()
                    .position(|k| *k == key)
                    .and_then(|i| targets.get(i))
                    .copied()
                    .unwrap_or(*default);
                return Ok(Flow::Jump(target));
            }
            Instr::Return { value } => {
                let value = match value {
                    Some(value) => Some(self.read(frame, *value)?),
                    None => None,
                };
                return Ok(Flow::Return(value));
            }
            Instr::Throw { value } => {
                let value = self.read(frame, *value)?;
                return match value {
                    Value::Null => Err(self.null_pointer()),
                    Value::Ref(r) if matches!(self.heap.get(r.0), Some(HeapObject::Throwable(_))) => {
                        Err(Abrupt::Throw(r))
                    }
                    other => Err(self.mismatch(frame.method, "throwable", &other)),
                };
            }
            Instr::StaticGet { dest, field } => {
                self.require_live_field(*field)?;
                self.ensure_initialized(self.program.field(*field).holder)?;
                let value = self.static_value(*field);
                Self::write(frame, *dest, value);
            }
            Instr::StaticPut { field, value } => {
                self.require_live_field(*field)?;
                let value = self.read(frame, *value)?;
                self.ensure_initialized(self.program.field(*field).holder)?;
                self.statics.insert(*field, value);
            }
            Instr::InstanceGet {
                dest,
                field,
                object,
            } => {
                self.require_live_field(*field)?;
                let object = self.read(frame, *object)?;
                let value = match object {
                    Value::Null => return Err(self.null_pointer()),
                    Value::Ref(r) => match self.heap.get(r.0) {
                        Some(HeapObject::Instance { fields, .. }) => fields
                            .get(field)
                            .cloned()
                            .unwrap_or_else(|| Value::default_for(&self.program.field(*field).ty)),
                        _ => return Err(self.mismatch(frame.method, "instance", &object)),
                    },
                    other => return Err(self.mismatch(frame.method, "instance", &other)),
                };
                Self::write(frame, *dest, value);
            }
            Instr::InstancePut {
                field,
                object,
                value,
            } => {
                self.require_live_field(*field)?;
                let object = self.read(frame, *object)?;
                let value = self.read(frame, *value)?;
                match object {
                    Value::Null => return Err(self.null_pointer()),
                    Value::Ref(r) => match self.heap.get_mut(r.0) {
                        Some(HeapObject::Instance { fields, .. }) => {
                            fields.insert(*field, value);
                        }
                        _ => return Err(self.mismatch(frame.method, "instance", &object)),
                    },
                    other => return Err(self.mismatch(frame.method, "instance", &other)),
                }
            }
            Instr::NewArray {
                dest,
                element,
                size,
            } => {
                let size = self.read_int(frame, *size)?;
                let array = self.new_array(element, &[size])?;
                Self::write(frame, *dest, array);
            }
            Instr::NewMultiArray { dest, ty, dims } => {
                let sizes = dims
                    .iter()
                    .map(|d| self.read_int(frame, *d))
                    .collect::<Exec<Vec<_>>>()?;
                let Some(element) = ty.element() else {
                    return Err(self.malformed(frame.method, "multi-array of non-array type"));
                };
                let array = self.new_array(element, &sizes)?;
                Self::write(frame, *dest, array);
            }
            Instr::NewArrayFilled {
                dest,
                element,
                values,
            } => {
                let data = values
                    .iter()
                    .map(|v| self.read(frame, *v))
                    .collect::<Exec<Vec<_>>>()?;
                let array = self.alloc(HeapObject::Array {
                    element: element.clone(),
                    data,
                });
                Self::write(frame, *dest, Value::Ref(array));
            }
            Instr::ArrayGet { dest, array, index } => {
                let array = self.read(frame, *array)?;
                let index = self.read_int(frame, *index)?;
                let slot = self.array_slot(frame.method, &array, index)?;
                let value = match array.as_obj().and_then(|r| self.heap.get(r.0)) {
                    Some(HeapObject::Array { data, .. }) => data[slot].clone(),
                    _ => return Err(self.mismatch(frame.method, "array", &array)),
                };
                Self::write(frame, *dest, value);
            }
            Instr::ArrayPut {
                array,
                index,
                value,
            } => {
                let array = self.read(frame, *array)?;
                let index = self.read_int(frame, *index)?;
                let value = self.read(frame, *value)?;
                let slot = self.array_slot(frame.method, &array, index)?;
                if let Some(HeapObject::Array { data, .. }) =
                    array.as_obj().and_then(|r| self.heap.get_mut(r.0))
                {
                    data[slot] = value;
                }
            }
            Instr::ArrayLength { dest, array } => {
                let array = self.read(frame, *array)?;
                let length = match &array {
                    Value::Null => return Err(self.null_pointer()),
                    Value::Ref(r) => match self.heap.get(r.0) {
                        Some(HeapObject::Array { data, .. }) => data.len(),
                        _ => return Err(self.mismatch(frame.method, "array", &array)),
                    },
                    other => return Err(self.mismatch(frame.method, "array", other)),
                };
                let length = i32::try_from(length).unwrap_or(i32::MAX);
                Self::write(frame, *dest, Value::Int(length));
            }
            Instr::NewInstance { dest, class } => {
                self.require_live_class(*class)?;
                self.ensure_initialized(*class)?;
                let object = self.alloc(HeapObject::Instance {
                    class: *class,
                    fields: FxHashMap::default(),
                    enum_data: None,
                });
                Self::write(frame, *dest, Value::Ref(object));
            }
            Instr::Invoke {
                dest,
                kind,
                callee,
                args,
            } => {
                let args = args
                    .iter()
                    .map(|a| self.read(frame, *a))
                    .collect::<Exec<Vec<_>>>()?;
                let result = match callee {
                    Callee::Program(method) => self.invoke_program(*kind, *method, args)?,
                    Callee::Library(method) => self.native(frame.method, *method, &args)?,
                    Callee::Missing(reference) => {
                        return Err(self.throw(
                            ExceptionKind::NoSuchMethodError,
                            Some(reference.to_string()),
                        ));
                    }
                };
                if let Some(dest) = dest {
                    let Some(value) = result else {
                        return Err(self.malformed(frame.method, "void call used as a value"));
                    };
                    Self::write(frame, *dest, value);
                }
            }
            Instr::CheckCast { dest, value, ty } => {
                let value = self.read(frame, *value)?;
                if !value.is_null() && !self.is_instance(&value, ty) {
                    let from = self
                        .runtime_type(&value)
                        .map_or_else(|| "null".to_string(), |t| self.type_name(&t));
                    let message = format!("class {from} cannot be cast to class {}", self.type_name(ty));
                    return Err(self.throw(ExceptionKind::ClassCastException, Some(message)));
                }
                Self::write(frame, *dest, value);
            }
            Instr::InstanceOf { dest, value, ty } => {
                let value = self.read(frame, *value)?;
                let holds = !value.is_null() && self.is_instance(&value, ty);
                Self::write(frame, *dest, Value::Bool(holds));
            }
            Instr::InitClass { class } => {
                self.require_live_class(*class)?;
                self.ensure_initialized(*class)?;
            }
        }
        Ok(Flow::Continue)
    }

    fn constant(&mut self, value: &ConstValue) -> Exec<Value> {
        Ok(match value {
            ConstValue::Null => Value::Null,
            ConstValue::Int(v) => Value::Int(*v),
            ConstValue::Long(v) => Value::Long(*v),
            ConstValue::Double(v) => Value::Double(*v),
            ConstValue::Bool(v) => Value::Bool(*v),
            ConstValue::Str(s) => Value::str(s),
            ConstValue::Class(ty) => {
                if let Some(class) = ty.base_class() {
                    self.require_live_class(class)?;
                }
                Value::Class(ty.clone())
            }
        })
    }

    fn new_array(&mut self, element: &Type, sizes: &[i32]) -> Exec<Value> {
        let Some((&size, rest)) = sizes.split_first() else {
            return Ok(Value::default_for(element));
        };
        if size < 0 {
            return Err(self.throw(
                ExceptionKind::NegativeArraySizeException,
                Some(size.to_string()),
            ));
        }
        #[allow(clippy::cast_sign_loss)]
        let len = size as usize;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len {
            if rest.is_empty() {
                data.push(Value::default_for(element));
            } else {
                let inner = element.element().cloned().unwrap_or(Type::Object);
                data.push(self.new_array(&inner, rest)?);
            }
        }
        Ok(Value::Ref(self.alloc(HeapObject::Array {
            element: element.clone(),
            data,
        })))
    }

    fn array_slot(&mut self, method: MethodId, array: &Value, index: i32) -> Exec<usize> {
        let length = match array {
            Value::Null => return Err(self.null_pointer()),
            Value::Ref(r) => match self.heap.get(r.0) {
                Some(HeapObject::Array { data, .. }) => data.len(),
                _ => return Err(self.mismatch(method, "array", array)),
            },
            other => return Err(self.mismatch(method, "array", other)),
        };
        match usize::try_from(index) {
            Ok(slot) if slot < length => Ok(slot),
            _ => Err(self.throw(
                ExceptionKind::ArrayIndexOutOfBoundsException,
                Some(format!("Index {index} out of bounds for length {length}")),
            )),
        }
    }

    // ── Arithmetic and comparison ──────────────────────────────────────

    fn binary(&mut self, method: MethodId, op: BinaryOp, lhs: &Value, rhs: &Value) -> Exec<Value> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => {
                let (a, b) = (*a, *b);
                if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
                    return Err(self.throw(
                        ExceptionKind::ArithmeticException,
                        Some("/ by zero".to_string()),
                    ));
                }
                Ok(Value::Int(match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div => a.wrapping_div(b),
                    BinaryOp::Rem => a.wrapping_rem(b),
                    BinaryOp::And => a & b,
                    BinaryOp::Or => a | b,
                    BinaryOp::Xor => a ^ b,
                }))
            }
            (Value::Long(a), Value::Long(b)) => {
                let (a, b) = (*a, *b);
                if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
                    return Err(self.throw(
                        ExceptionKind::ArithmeticException,
                        Some("/ by zero".to_string()),
                    ));
                }
                Ok(Value::Long(match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div => a.wrapping_div(b),
                    BinaryOp::Rem => a.wrapping_rem(b),
                    BinaryOp::And => a & b,
                    BinaryOp::Or => a | b,
                    BinaryOp::Xor => a ^ b,
                }))
            }
            (Value::Double(a), Value::Double(b)) => match op {
                BinaryOp::Add => Ok(Value::Double(a + b)),
                BinaryOp::Sub => Ok(Value::Double(a - b)),
                BinaryOp::Mul => Ok(Value::Double(a * b)),
                BinaryOp::Div => Ok(Value::Double(a / b)),
                BinaryOp::Rem => Ok(Value::Double(a % b)),
                _ => Err(self.mismatch(method, "integral operands", lhs)),
            },
            (Value::Bool(a), Value::Bool(b)) => match op {
                BinaryOp::And => Ok(Value::Bool(*a & *b)),
                BinaryOp::Or => Ok(Value::Bool(*a | *b)),
                BinaryOp::Xor => Ok(Value::Bool(*a ^ *b)),
                _ => Err(self.mismatch(method, "numeric operands", lhs)),
            },
            _ => Err(self.mismatch(method, "matching numeric operands", rhs)),
        }
    }

    fn compare(&self, method: MethodId, cmp: CmpKind, lhs: &Value, rhs: &Value) -> Exec<bool> {
        let ordering = match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Long(a), Value::Long(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => match a.partial_cmp(b) {
                Some(ordering) => ordering,
                // NaN compares false except for `!=`.
                None => return Ok(cmp == CmpKind::Ne),
            },
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => {
                if !cmp.is_equality() {
                    return Err(self.mismatch(method, "ordered operands", lhs));
                }
                let same = self.identical(lhs, rhs);
                return Ok(same == (cmp == CmpKind::Eq));
            }
        };
        Ok(cmp.holds(ordering))
    }

    fn compare_zero(&self, method: MethodId, cmp: CmpKind, value: &Value) -> Exec<bool> {
        let ordering = match value {
            Value::Int(v) => v.cmp(&0),
            Value::Long(v) => v.cmp(&0),
            Value::Bool(v) => i32::from(*v).cmp(&0),
            Value::Double(_) => return Err(self.mismatch(method, "int or reference", value)),
            _ => {
                if !cmp.is_equality() {
                    return Err(self.mismatch(method, "int", value));
                }
                return Ok(value.is_null() == (cmp == CmpKind::Eq));
            }
        };
        Ok(cmp.holds(ordering))
    }

    /// Reference identity (`==` on references).
    fn identical(&self, lhs: &Value, rhs: &Value) -> bool {
        match (lhs, rhs) {
            (Value::Null, Value::Null) => true,
            (Value::Ref(a), Value::Ref(b)) => a == b,
            // Literals are interned.
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => a == b,
            _ => false,
        }
    }

    // ── Types ──────────────────────────────────────────────────────────

    fn runtime_type(&self, value: &Value) -> Option<Type> {
        Some(match value {
            Value::Null => return None,
            Value::Int(_) => Type::Int,
            Value::Long(_) => Type::Long,
            Value::Double(_) => Type::Double,
            Value::Bool(_) => Type::Boolean,
            Value::Str(_) => Type::String,
            Value::Class(_) => Type::Library(LibraryType::Class),
            Value::Ref(r) => match self.heap.get(r.0)? {
                HeapObject::Instance { class, .. } => Type::Class(*class),
                HeapObject::Array { element, .. } => Type::array_of(element.clone()),
                HeapObject::Throwable(_) => Type::Library(LibraryType::Throwable),
                HeapObject::Collection {
                    kind: CollectionKind::EnumSet,
                    ..
                } => Type::Library(LibraryType::EnumSet),
                HeapObject::Collection {
                    kind: CollectionKind::EnumMap,
                    ..
                } => Type::Library(LibraryType::EnumMap),
            },
        })
    }

    fn is_instance(&self, value: &Value, ty: &Type) -> bool {
        self.runtime_type(value)
            .is_some_and(|runtime| self.is_assignable(&runtime, ty))
    }

    fn is_assignable(&self, from: &Type, to: &Type) -> bool {
        if from == to {
            return true;
        }
        match (from, to) {
            (_, Type::Object) => from.is_reference(),
            (Type::Class(sub), Type::Class(sup)) => self.program.is_subtype_of(*sub, *sup),
            (Type::Class(sub), Type::Library(lib)) => {
                self.program.inherits_library(*sub, *lib)
                    || (matches!(lib, LibraryType::Comparable | LibraryType::Serializable)
                        && self.program.inherits_library(*sub, LibraryType::Enum))
            }
            (Type::Array(a), Type::Array(b)) => {
                if a.is_primitive() || b.is_primitive() {
                    a == b
                } else {
                    self.is_assignable(a, b)
                }
            }
            (Type::Array(_), Type::Library(LibraryType::Serializable))
            | (
                Type::String,
                Type::Library(LibraryType::Comparable | LibraryType::Serializable),
            ) => true,
            _ => false,
        }
    }

    /// `Class.getName()` of a type.
    fn type_name(&self, ty: &Type) -> String {
        match ty {
            Type::Class(id) => self.program.class(*id).name.clone(),
            Type::Array(_) => ty.descriptor(self.program).replace('/', "."),
            other => other.display(self.program).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{LibraryMethod, ProgramBuilder};

    #[test]
    fn test_arithmetic_and_branches() {
        let mut pb = ProgramBuilder::new("test");
        let main = pb.class("Main").unwrap();
        let m = pb.static_method(main, "main", vec![], Type::Int);
        pb.code(m, |f| {
            f.block(0, |b| {
                let x = b.const_int(40);
                let y = b.const_int(2);
                let sum = b.add(x, y);
                b.println(sum);
                b.if_zero(CmpKind::Gt, sum, 1, 2);
            });
            f.block(1, |b| {
                let v = b.const_int(1);
                b.ret_val(v);
            });
            f.block(2, |b| {
                let v = b.const_int(0);
                b.ret_val(v);
            });
        });
        let program = pb.build();
        let execution = execute(&program, m).unwrap();
        assert_eq!(execution.output, vec!["42"]);
        assert_eq!(execution.returned(), Some(&Value::Int(1)));
    }

    #[test]
    fn test_class_init_runs_once_superclass_first() {
        let mut pb = ProgramBuilder::new("test");
        let base = pb.class("Base").unwrap();
        let derived = pb.class("Derived").unwrap();
        pb.program_mut().class_mut(derived).superclass = Type::Class(base);
        for (class, text) in [(base, "base"), (derived, "derived")] {
            let clinit = pb.method(
                class,
                "<clinit>",
                vec![],
                Type::Void,
                crate::program::MethodFlags::STATIC,
            );
            pb.code(clinit, |f| {
                f.block(0, |b| {
                    b.print_str(text);
                    b.ret();
                });
            });
        }
        let main = pb.class("Main").unwrap();
        let m = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(m, |f| {
            f.block(0, |b| {
                b.init_class(derived);
                b.init_class(derived);
                b.ret();
            });
        });
        let program = pb.build();
        let execution = execute(&program, m).unwrap();
        assert_eq!(execution.output, vec!["base", "derived"]);
    }

    #[test]
    fn test_uncaught_exception_in_transcript() {
        let mut pb = ProgramBuilder::new("test");
        let main = pb.class("Main").unwrap();
        let m = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(m, |f| {
            f.block(0, |b| {
                b.print_str("before");
                let message = b.const_str("boom");
                let e = b.lib(LibraryMethod::NewIllegalArgumentException, &[message]);
                b.throw(e);
            });
        });
        let program = pb.build();
        let execution = execute(&program, m).unwrap();
        assert_eq!(
            execution.transcript(),
            vec![
                "before".to_string(),
                "Exception in thread \"main\" java.lang.IllegalArgumentException: boom".to_string()
            ]
        );
    }

    #[test]
    fn test_step_limit() {
        let mut pb = ProgramBuilder::new("test");
        let main = pb.class("Main").unwrap();
        let m = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(m, |f| f.block(0, |b| b.goto(0)));
        let program = pb.build();
        let result = Interpreter::new(&program).with_step_limit(100).run(m, Vec::new());
        assert_eq!(result, Err(InterpError::StepLimit { limit: 100 }));
    }

    #[test]
    fn test_array_null_slots_and_bounds() {
        let mut pb = ProgramBuilder::new("test");
        let main = pb.class("Main").unwrap();
        let m = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(m, |f| {
            f.block(0, |b| {
                let size = b.const_int(2);
                let array = b.new_array(Type::Object, size);
                let zero = b.const_int(0);
                let slot = b.aget(array, zero);
                let is_null = b.instance_of(slot, Type::Object);
                b.println(is_null);
                let three = b.const_int(3);
                b.aget(array, three);
                b.ret();
            });
        });
        let program = pb.build();
        let execution = execute(&program, m).unwrap();
        assert_eq!(execution.output, vec!["false"]);
        let thrown = execution.thrown().unwrap();
        assert_eq!(thrown.kind, ExceptionKind::ArrayIndexOutOfBoundsException);
        assert_eq!(thrown.message.as_deref(), Some("Index 3 out of bounds for length 2"));
    }
}
