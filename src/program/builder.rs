//! Builder pattern for programmatic program construction.
//!
//! This module provides a fluent API for building classes and SSA method bodies
//! without manual value/block bookkeeping. It's used by:
//!
//! - Unit and integration tests of the unboxing engine
//! - The synthesis of shim and utility methods inside the rewriter
//! - Benchmarks that need large synthetic programs
//!
//! # Design
//!
//! Signatures are declared first; bodies are attached afterwards with a
//! closure-based API where all blocks are defined within a single expression:
//!
//! ```rust,ignore
//! let mut pb = ProgramBuilder::new("app");
//! let main = pb.class("Main")?;
//! let run = pb.static_method(main, "run", vec![Type::Int], Type::Int);
//! pb.code(run, |f| {
//!     let x = f.arg(0);
//!     f.block(0, |b| b.if_zero(CmpKind::Eq, x, 1, 2));
//!     f.block(1, |b| { let c = b.const_int(7); b.ret_val(c); });
//!     f.block(2, |b| b.ret_val(x));
//! });
//! ```
//!
//! Argument values are materialized as `arg` instructions at the head of block 0.
//! Result types of calls and field reads are taken from the referenced declarations.

use std::collections::BTreeMap;

use crate::{
    program::{
        code::{
            BinaryOp, Block, BlockId, Callee, CmpKind, Code, ConstValue, Instr, InvokeKind, Phi,
            ValueId,
        },
        item::{ClassDef, ClassFlags, ClassId, FieldFlags, FieldId, MethodFlags, MethodId},
        library::LibraryMethod,
        types::{LibraryType, Type},
        Program,
    },
    Result,
};

/// Builder for whole programs.
#[derive(Debug)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    /// Creates a builder for a program compiled into `artifact`.
    #[must_use]
    pub fn new(artifact: impl Into<String>) -> Self {
        Self {
            program: Program::new(artifact),
        }
    }

    /// Continues building on top of an existing program.
    #[must_use]
    pub fn from_program(program: Program) -> Self {
        Self { program }
    }

    /// Returns the program built so far.
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Returns the program built so far, mutably.
    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    /// Consumes the builder and returns the program.
    #[must_use]
    pub fn build(self) -> Program {
        self.program
    }

    /// Adds a public class extending `java.lang.Object`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already taken.
    pub fn class(&mut self, name: &str) -> Result<ClassId> {
        self.program.add_class(ClassDef::new(name, ClassFlags::PUBLIC))
    }

    /// Adds a fully specified class.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already taken.
    pub fn class_def(&mut self, class: ClassDef) -> Result<ClassId> {
        self.program.add_class(class)
    }

    /// Adds a public interface.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already taken.
    pub fn interface(&mut self, name: &str) -> Result<ClassId> {
        self.program.add_class(ClassDef::new(
            name,
            ClassFlags::PUBLIC | ClassFlags::INTERFACE | ClassFlags::ABSTRACT,
        ))
    }

    /// Adds a field.
    pub fn field(&mut self, holder: ClassId, name: &str, ty: Type, flags: FieldFlags) -> FieldId {
        self.program.add_field(holder, name, ty, flags)
    }

    /// Adds a public static field.
    pub fn static_field(&mut self, holder: ClassId, name: &str, ty: Type) -> FieldId {
        self.field(holder, name, ty, FieldFlags::PUBLIC | FieldFlags::STATIC)
    }

    /// Declares a method without a body.
    pub fn method(
        &mut self,
        holder: ClassId,
        name: &str,
        params: Vec<Type>,
        ret: Type,
        flags: MethodFlags,
    ) -> MethodId {
        self.program.declare_method(holder, name, params, ret, flags)
    }

    /// Declares a public static method.
    pub fn static_method(&mut self, holder: ClassId, name: &str, params: Vec<Type>, ret: Type) -> MethodId {
        self.method(holder, name, params, ret, MethodFlags::PUBLIC | MethodFlags::STATIC)
    }

    /// Declares a public instance method.
    pub fn virtual_method(&mut self, holder: ClassId, name: &str, params: Vec<Type>, ret: Type) -> MethodId {
        self.method(holder, name, params, ret, MethodFlags::PUBLIC)
    }

    /// Attaches a body to `method`.
    pub fn code<F>(&mut self, method: MethodId, f: F)
    where
        F: FnOnce(&mut FunctionContext<'_, '_>),
    {
        let code = CodeBuilder::new(&self.program, method).build_with(f);
        self.program.method_mut(method).code = Some(code);
    }

    /// Starts building an enum class with the canonical compiler-generated shape.
    #[must_use]
    pub fn enum_class(&mut self, name: &str) -> EnumClassBuilder<'_> {
        EnumClassBuilder::new(self, name)
    }
}

/// Builder for a single method body.
#[derive(Debug)]
pub struct CodeBuilder<'p> {
    program: &'p Program,
    values: Vec<Type>,
    arg_values: Vec<ValueId>,
    blocks: BTreeMap<usize, Block>,
}

impl<'p> CodeBuilder<'p> {
    /// Creates a builder for the body of `method`, pre-allocating its arguments.
    #[must_use]
    pub fn new(program: &'p Program, method: MethodId) -> Self {
        let def = program.method(method);
        let arg_types: Vec<Type> = (0..def.arg_count())
            .filter_map(|i| def.arg_type(i))
            .collect();
        Self::with_args(program, arg_types)
    }

    /// Creates a builder for a body with the given argument types.
    #[must_use]
    pub fn with_args(program: &'p Program, arg_types: Vec<Type>) -> Self {
        let mut builder = Self {
            program,
            values: Vec::new(),
            arg_values: Vec::new(),
            blocks: BTreeMap::new(),
        };
        for ty in arg_types {
            let id = builder.alloc(ty);
            builder.arg_values.push(id);
        }
        builder
    }

    fn alloc(&mut self, ty: Type) -> ValueId {
        let id = ValueId::from_usize(self.values.len());
        self.values.push(ty);
        id
    }

    /// Builds the body using a closure that defines all blocks.
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that receives a [`FunctionContext`] for defining blocks
    ///
    /// # Returns
    ///
    /// The constructed [`Code`].
    pub fn build_with<F>(mut self, f: F) -> Code
    where
        F: FnOnce(&mut FunctionContext<'_, 'p>),
    {
        let mut ctx = FunctionContext { builder: &mut self };
        f(&mut ctx);
        self.build()
    }

    fn build(self) -> Code {
        let max = self.blocks.keys().next_back().copied().unwrap_or(0);
        let mut blocks: Vec<Block> = Vec::with_capacity(max + 1);
        let mut defined = self.blocks;
        for id in 0..=max {
            blocks.push(defined.remove(&id).unwrap_or_default());
        }
        let args: Vec<Instr> = self
            .arg_values
            .iter()
            .enumerate()
            .map(|(index, dest)| Instr::Arg {
                dest: *dest,
                #[allow(clippy::cast_possible_truncation)]
                index: index as u16,
            })
            .collect();
        if let Some(entry) = blocks.first_mut() {
            entry.instrs.splice(0..0, args);
        }
        Code {
            values: self.values,
            blocks,
        }
    }
}

/// Context passed to the build closure for defining blocks.
pub struct FunctionContext<'a, 'p> {
    builder: &'a mut CodeBuilder<'p>,
}

impl<'p> FunctionContext<'_, 'p> {
    /// Gets the argument value at the specified index (the receiver is index 0
    /// for instance methods).
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn arg(&self, index: usize) -> ValueId {
        self.builder.arg_values[index]
    }

    /// Allocates a value before it is defined, e.g. for a loop phi.
    #[must_use]
    pub fn var(&mut self, ty: Type) -> ValueId {
        self.builder.alloc(ty)
    }

    /// Returns the program the body is built against.
    #[must_use]
    pub fn program(&self) -> &Program {
        self.builder.program
    }

    /// Defines a block with the given id using a closure.
    pub fn block<F>(&mut self, id: usize, f: F)
    where
        F: FnOnce(&mut BlockBuilder<'_, 'p>),
    {
        let mut block = Block::default();
        {
            let mut block_builder = BlockBuilder {
                builder: &mut *self.builder,
                block: &mut block,
            };
            f(&mut block_builder);
        }
        self.builder.blocks.insert(id, block);
    }
}

/// Builder for the contents of a single block.
pub struct BlockBuilder<'b, 'p> {
    builder: &'b mut CodeBuilder<'p>,
    block: &'b mut Block,
}

impl BlockBuilder<'_, '_> {
    fn def(&mut self, ty: Type, make: impl FnOnce(ValueId) -> Instr) -> ValueId {
        let dest = self.builder.alloc(ty);
        self.block.instrs.push(make(dest));
        dest
    }

    /// Appends a raw instruction.
    pub fn push(&mut self, instr: Instr) {
        self.block.instrs.push(instr);
    }

    // ── Constants ──────────────────────────────────────────────────────

    /// Adds: dest = const value
    pub fn constant(&mut self, value: ConstValue) -> ValueId {
        let ty = value.ty();
        self.def(ty, |dest| Instr::Const { dest, value })
    }

    /// Adds: dest = const int
    pub fn const_int(&mut self, value: i32) -> ValueId {
        self.constant(ConstValue::Int(value))
    }

    /// Adds: dest = const long
    pub fn const_long(&mut self, value: i64) -> ValueId {
        self.constant(ConstValue::Long(value))
    }

    /// Adds: dest = const double
    pub fn const_double(&mut self, value: f64) -> ValueId {
        self.constant(ConstValue::Double(value))
    }

    /// Adds: dest = const boolean
    pub fn const_bool(&mut self, value: bool) -> ValueId {
        self.constant(ConstValue::Bool(value))
    }

    /// Adds: dest = const string
    pub fn const_str(&mut self, value: &str) -> ValueId {
        self.constant(ConstValue::Str(value.to_string()))
    }

    /// Adds: dest = null
    pub fn const_null(&mut self) -> ValueId {
        self.constant(ConstValue::Null)
    }

    /// Adds: dest = Ty.class
    pub fn const_class(&mut self, ty: Type) -> ValueId {
        self.constant(ConstValue::Class(ty))
    }

    // ── Arithmetic ─────────────────────────────────────────────────────

    /// Adds: dest = lhs op rhs, typed like `lhs`.
    pub fn binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.builder.values[lhs.index()].clone();
        self.def(ty, |dest| Instr::Binary { dest, op, lhs, rhs })
    }

    /// Adds: dest = lhs + rhs
    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    /// Adds: dest = lhs - rhs
    pub fn sub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    /// Adds: dest = lhs cmp rhs
    pub fn compare(&mut self, cmp: CmpKind, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.def(Type::Boolean, |dest| Instr::Compare { dest, cmp, lhs, rhs })
    }

    // ── Control flow ───────────────────────────────────────────────────

    /// Adds: if value cmp 0/null goto then_block else else_block
    pub fn if_zero(&mut self, cmp: CmpKind, value: ValueId, then_block: usize, else_block: usize) {
        self.push(Instr::If {
            cmp,
            lhs: value,
            rhs: None,
            then_block: BlockId::from_usize(then_block),
            else_block: BlockId::from_usize(else_block),
        });
    }

    /// Adds: if lhs cmp rhs goto then_block else else_block
    pub fn if_cmp(&mut self, cmp: CmpKind, lhs: ValueId, rhs: ValueId, then_block: usize, else_block: usize) {
        self.push(Instr::If {
            cmp,
            lhs,
            rhs: Some(rhs),
            then_block: BlockId::from_usize(then_block),
            else_block: BlockId::from_usize(else_block),
        });
    }

    /// Adds: goto target
    pub fn goto(&mut self, target: usize) {
        self.push(Instr::Goto {
            target: BlockId::from_usize(target),
        });
    }

    /// Adds: switch value { keys[i] -> targets[i] } default
    pub fn switch(&mut self, value: ValueId, cases: &[(i32, usize)], default: usize) {
        self.push(Instr::Switch {
            value,
            keys: cases.iter().map(|(key, _)| *key).collect(),
            targets: cases.iter().map(|(_, t)| BlockId::from_usize(*t)).collect(),
            default: BlockId::from_usize(default),
        });
    }

    /// Adds: return
    pub fn ret(&mut self) {
        self.push(Instr::Return { value: None });
    }

    /// Adds: return value
    pub fn ret_val(&mut self, value: ValueId) {
        self.push(Instr::Return { value: Some(value) });
    }

    /// Adds: throw value
    pub fn throw(&mut self, value: ValueId) {
        self.push(Instr::Throw { value });
    }

    /// Adds: dest = phi [(block, value)...]
    pub fn phi(&mut self, ty: Type, operands: &[(usize, ValueId)]) -> ValueId {
        let dest = self.builder.alloc(ty);
        self.phi_into(dest, operands);
        dest
    }

    /// Adds a phi defining a value allocated earlier with [`FunctionContext::var`].
    pub fn phi_into(&mut self, dest: ValueId, operands: &[(usize, ValueId)]) {
        self.block.phis.push(Phi {
            dest,
            operands: operands
                .iter()
                .map(|(block, value)| (BlockId::from_usize(*block), *value))
                .collect(),
        });
    }

    // ── Fields ─────────────────────────────────────────────────────────

    /// Adds: dest = Holder.field
    pub fn sget(&mut self, field: FieldId) -> ValueId {
        let ty = self.builder.program.field(field).ty.clone();
        self.def(ty, |dest| Instr::StaticGet { dest, field })
    }

    /// Adds: Holder.field = value
    pub fn sput(&mut self, field: FieldId, value: ValueId) {
        self.push(Instr::StaticPut { field, value });
    }

    /// Adds: dest = object.field
    pub fn iget(&mut self, field: FieldId, object: ValueId) -> ValueId {
        let ty = self.builder.program.field(field).ty.clone();
        self.def(ty, |dest| Instr::InstanceGet {
            dest,
            field,
            object,
        })
    }

    /// Adds: object.field = value
    pub fn iput(&mut self, field: FieldId, object: ValueId, value: ValueId) {
        self.push(Instr::InstancePut {
            field,
            object,
            value,
        });
    }

    // ── Arrays ─────────────────────────────────────────────────────────

    /// Adds: dest = new element[size]
    pub fn new_array(&mut self, element: Type, size: ValueId) -> ValueId {
        let ty = Type::array_of(element.clone());
        self.def(ty, |dest| Instr::NewArray {
            dest,
            element,
            size,
        })
    }

    /// Adds: dest = new ty[d0][d1]...
    pub fn new_multi_array(&mut self, ty: Type, dims: &[ValueId]) -> ValueId {
        let dims = dims.to_vec();
        self.def(ty.clone(), |dest| Instr::NewMultiArray { dest, ty, dims })
    }

    /// Adds: dest = new element[] { values... }
    pub fn new_array_filled(&mut self, element: Type, values: &[ValueId]) -> ValueId {
        let ty = Type::array_of(element.clone());
        let values = values.to_vec();
        self.def(ty, |dest| Instr::NewArrayFilled {
            dest,
            element,
            values,
        })
    }

    /// Adds: dest = array[index]
    pub fn aget(&mut self, array: ValueId, index: ValueId) -> ValueId {
        let ty = self.builder.values[array.index()]
            .element()
            .cloned()
            .unwrap_or(Type::Object);
        self.def(ty, |dest| Instr::ArrayGet { dest, array, index })
    }

    /// Adds: array[index] = value
    pub fn aput(&mut self, array: ValueId, index: ValueId, value: ValueId) {
        self.push(Instr::ArrayPut {
            array,
            index,
            value,
        });
    }

    /// Adds: dest = array.length
    pub fn array_length(&mut self, array: ValueId) -> ValueId {
        self.def(Type::Int, |dest| Instr::ArrayLength { dest, array })
    }

    // ── Objects ────────────────────────────────────────────────────────

    /// Adds: dest = new Class
    pub fn new_instance(&mut self, class: ClassId) -> ValueId {
        self.def(Type::Class(class), |dest| Instr::NewInstance { dest, class })
    }

    /// Adds: dest = (ty) value
    pub fn check_cast(&mut self, value: ValueId, ty: Type) -> ValueId {
        self.def(ty.clone(), |dest| Instr::CheckCast { dest, value, ty })
    }

    /// Adds: dest = value instanceof ty
    pub fn instance_of(&mut self, value: ValueId, ty: Type) -> ValueId {
        self.def(Type::Boolean, |dest| Instr::InstanceOf { dest, value, ty })
    }

    /// Adds: init-class class
    pub fn init_class(&mut self, class: ClassId) {
        self.push(Instr::InitClass { class });
    }

    // ── Calls ──────────────────────────────────────────────────────────

    /// Adds an invocation with an explicit result type.
    pub fn invoke(&mut self, kind: InvokeKind, callee: Callee, args: &[ValueId], ret: Type) -> Option<ValueId> {
        let args = args.to_vec();
        if ret == Type::Void {
            self.push(Instr::Invoke {
                dest: None,
                kind,
                callee,
                args,
            });
            None
        } else {
            let dest = self.builder.alloc(ret);
            self.push(Instr::Invoke {
                dest: Some(dest),
                kind,
                callee,
                args,
            });
            Some(dest)
        }
    }

    fn call_program(&mut self, kind: InvokeKind, method: MethodId, args: &[ValueId]) -> Option<ValueId> {
        let ret = self.builder.program.method(method).ret.clone();
        self.invoke(kind, Callee::Program(method), args, ret)
    }

    fn expect_result(&mut self, result: Option<ValueId>) -> ValueId {
        // Void callees used in value position yield a fresh, never-defined value.
        result.unwrap_or_else(|| self.builder.alloc(Type::Void))
    }

    /// Adds: dest = Holder.method(args)
    pub fn call_static(&mut self, method: MethodId, args: &[ValueId]) -> ValueId {
        let result = self.call_program(InvokeKind::Static, method, args);
        self.expect_result(result)
    }

    /// Adds: Holder.method(args)
    pub fn call_static_void(&mut self, method: MethodId, args: &[ValueId]) {
        self.call_program(InvokeKind::Static, method, args);
    }

    /// Adds: dest = receiver.method(args), with the receiver as `args[0]`.
    pub fn call_virtual(&mut self, method: MethodId, args: &[ValueId]) -> ValueId {
        let result = self.call_program(InvokeKind::Virtual, method, args);
        self.expect_result(result)
    }

    /// Adds: receiver.method(args), with the receiver as `args[0]`.
    pub fn call_virtual_void(&mut self, method: MethodId, args: &[ValueId]) {
        self.call_program(InvokeKind::Virtual, method, args);
    }

    /// Adds: dest = receiver.method(args) through an interface.
    pub fn call_interface(&mut self, method: MethodId, args: &[ValueId]) -> ValueId {
        let result = self.call_program(InvokeKind::Interface, method, args);
        self.expect_result(result)
    }

    /// Adds a direct (constructor or private) invocation without a result.
    pub fn call_direct_void(&mut self, method: MethodId, args: &[ValueId]) {
        self.call_program(InvokeKind::Direct, method, args);
    }

    /// Adds: dest = receiver.method(args) for a direct invocation with a result.
    pub fn call_direct(&mut self, method: MethodId, args: &[ValueId]) -> ValueId {
        let result = self.call_program(InvokeKind::Direct, method, args);
        self.expect_result(result)
    }

    /// Adds a library call returning the library's declared type.
    pub fn lib(&mut self, method: LibraryMethod, args: &[ValueId]) -> ValueId {
        let ret = method.return_type();
        self.lib_typed(method, args, ret)
    }

    /// Adds a library call whose result is known to have a more precise type.
    pub fn lib_typed(&mut self, method: LibraryMethod, args: &[ValueId], ret: Type) -> ValueId {
        let kind = if method.is_static() {
            InvokeKind::Static
        } else {
            InvokeKind::Virtual
        };
        let result = self.invoke(kind, Callee::Library(method), args, ret);
        self.expect_result(result)
    }

    /// Adds a library call whose result is not used.
    pub fn lib_void(&mut self, method: LibraryMethod, args: &[ValueId]) {
        let kind = if method.is_static() {
            InvokeKind::Static
        } else {
            InvokeKind::Virtual
        };
        self.push(Instr::Invoke {
            dest: None,
            kind,
            callee: Callee::Library(method),
            args: args.to_vec(),
        });
    }

    /// Adds: System.out.println(value) choosing the overload from the value's type.
    pub fn println(&mut self, value: ValueId) {
        let method = match &self.builder.values[value.index()] {
            Type::String => LibraryMethod::PrintlnString,
            Type::Int => LibraryMethod::PrintlnInt,
            Type::Boolean => LibraryMethod::PrintlnBoolean,
            _ => LibraryMethod::PrintlnObject,
        };
        self.lib_void(method, &[value]);
    }

    /// Adds: System.out.println("text")
    pub fn print_str(&mut self, text: &str) {
        let value = self.const_str(text);
        self.println(value);
    }

    /// Adds: throw new NullPointerException()
    pub fn throw_npe(&mut self) {
        let exception = self.lib(LibraryMethod::NewNullPointerException, &[]);
        self.throw(exception);
    }
}

/// Handle to an enum class laid out by [`EnumClassBuilder`].
#[derive(Debug, Clone)]
pub struct EnumHandle {
    /// The enum class.
    pub class: ClassId,
    /// One static field per constant, in ordinal order.
    pub constants: Vec<FieldId>,
    /// The synthetic `$VALUES` field.
    pub values_field: FieldId,
    /// `values()`
    pub values_method: MethodId,
    /// `valueOf(String)`
    pub value_of_method: MethodId,
    /// `<init>(String, int, ...)`
    pub init: MethodId,
    /// `<clinit>`
    pub clinit: MethodId,
    /// Instance fields initialized through the constructor.
    pub instance_fields: Vec<FieldId>,
    /// Constant-specific body classes, by ordinal.
    pub bodies: Vec<(usize, ClassId)>,
}

impl EnumHandle {
    /// Returns the enum type.
    #[must_use]
    pub fn ty(&self) -> Type {
        Type::Class(self.class)
    }
}

/// Per-constant initializer argument of an instance field.
#[derive(Debug, Clone)]
enum FieldInit {
    Const(ConstValue),
    EnumConstant(FieldId),
}

#[derive(Debug, Clone)]
struct InstanceFieldSpec {
    name: String,
    ty: Type,
    values: Vec<FieldInit>,
}

/// Builder laying out an enum the way a Java source compiler does.
pub struct EnumClassBuilder<'a> {
    program: &'a mut ProgramBuilder,
    name: String,
    constants: Vec<String>,
    fields: Vec<InstanceFieldSpec>,
    interfaces: Vec<Type>,
    bodies: Vec<usize>,
    clinit_messages: Vec<String>,
    init_messages: Vec<String>,
    check_enum_unboxed: bool,
}

impl<'a> EnumClassBuilder<'a> {
    fn new(program: &'a mut ProgramBuilder, name: &str) -> Self {
        Self {
            program,
            name: name.to_string(),
            constants: Vec::new(),
            fields: Vec::new(),
            interfaces: Vec::new(),
            bodies: Vec::new(),
            clinit_messages: Vec::new(),
            init_messages: Vec::new(),
            check_enum_unboxed: false,
        }
    }

    /// Declares the constants in ordinal order.
    #[must_use]
    pub fn constants(mut self, names: &[&str]) -> Self {
        self.constants = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    /// Adds an instance field initialized from a constructor argument.
    #[must_use]
    pub fn field(mut self, name: &str, ty: Type, values: Vec<ConstValue>) -> Self {
        self.fields.push(InstanceFieldSpec {
            name: name.to_string(),
            ty,
            values: values.into_iter().map(FieldInit::Const).collect(),
        });
        self
    }

    /// Adds an `int` instance field.
    #[must_use]
    pub fn int_field(self, name: &str, values: &[i32]) -> Self {
        let values = values.iter().map(|v| ConstValue::Int(*v)).collect();
        self.field(name, Type::Int, values)
    }

    /// Adds an instance field holding constants of another enum.
    #[must_use]
    pub fn enum_field(self, name: &str, other: &EnumHandle, ordinals: &[usize]) -> Self {
        let ordinals: Vec<Option<usize>> = ordinals.iter().copied().map(Some).collect();
        self.nullable_enum_field(name, other, &ordinals)
    }

    /// Adds an instance field holding constants of another enum; `None` passes `null`.
    #[must_use]
    pub fn nullable_enum_field(mut self, name: &str, other: &EnumHandle, ordinals: &[Option<usize>]) -> Self {
        self.fields.push(InstanceFieldSpec {
            name: name.to_string(),
            ty: other.ty(),
            values: ordinals
                .iter()
                .map(|o| match o {
                    Some(o) => FieldInit::EnumConstant(other.constants[*o]),
                    None => FieldInit::Const(ConstValue::Null),
                })
                .collect(),
        });
        self
    }

    /// Adds an implemented interface.
    #[must_use]
    pub fn implements(mut self, interface: Type) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Gives the constant at `ordinal` a constant-specific class body.
    #[must_use]
    pub fn constant_body(mut self, ordinal: usize) -> Self {
        self.bodies.push(ordinal);
        self
    }

    /// Prints `message` at the end of the class initializer.
    #[must_use]
    pub fn clinit_message(mut self, message: &str) -> Self {
        self.clinit_messages.push(message.to_string());
        self
    }

    /// Prints `message` in every constructor invocation.
    #[must_use]
    pub fn init_message(mut self, message: &str) -> Self {
        self.init_messages.push(message.to_string());
        self
    }

    /// Annotates the enum as required to be unboxed.
    #[must_use]
    pub fn check_unboxed(mut self) -> Self {
        self.check_enum_unboxed = true;
        self
    }

    /// Lays out the enum class.
    ///
    /// # Errors
    ///
    /// Returns an error if the class name is taken.
    pub fn build(self) -> Result<EnumHandle> {
        let Self {
            program: pb,
            name,
            constants,
            fields,
            interfaces,
            bodies,
            clinit_messages,
            init_messages,
            check_enum_unboxed,
        } = self;

        let mut class = ClassDef::new(
            name.clone(),
            ClassFlags::PUBLIC | ClassFlags::FINAL | ClassFlags::ENUM,
        );
        class.superclass = Type::Library(LibraryType::Enum);
        class.interfaces = interfaces;
        class.check_enum_unboxed = check_enum_unboxed;
        let enum_class = pb.class_def(class)?;
        let enum_ty = Type::Class(enum_class);

        let constant_fields: Vec<FieldId> = constants
            .iter()
            .map(|c| {
                pb.field(
                    enum_class,
                    c,
                    enum_ty.clone(),
                    FieldFlags::PUBLIC | FieldFlags::STATIC | FieldFlags::FINAL | FieldFlags::ENUM,
                )
            })
            .collect();
        let values_field = pb.field(
            enum_class,
            "$VALUES",
            Type::array_of(enum_ty.clone()),
            FieldFlags::PRIVATE | FieldFlags::STATIC | FieldFlags::FINAL | FieldFlags::SYNTHETIC,
        );
        let instance_fields: Vec<FieldId> = fields
            .iter()
            .map(|spec| {
                pb.field(
                    enum_class,
                    &spec.name,
                    spec.ty.clone(),
                    FieldFlags::PUBLIC | FieldFlags::FINAL,
                )
            })
            .collect();

        let mut init_params = vec![Type::String, Type::Int];
        init_params.extend(fields.iter().map(|spec| spec.ty.clone()));
        let init = pb.method(
            enum_class,
            "<init>",
            init_params.clone(),
            Type::Void,
            MethodFlags::PRIVATE,
        );
        pb.code(init, |f| {
            let this = f.arg(0);
            let name_arg = f.arg(1);
            let ordinal_arg = f.arg(2);
            let field_args: Vec<ValueId> = (0..instance_fields.len()).map(|i| f.arg(3 + i)).collect();
            f.block(0, |b| {
                b.lib_void(LibraryMethod::EnumInit, &[this, name_arg, ordinal_arg]);
                for (field, arg) in instance_fields.iter().zip(&field_args) {
                    b.iput(*field, this, *arg);
                }
                for message in &init_messages {
                    b.print_str(message);
                }
                b.ret();
            });
        });

        let mut body_classes = Vec::new();
        for ordinal in &bodies {
            let mut body = ClassDef::new(
                format!("{name}${}", ordinal + 1),
                ClassFlags::FINAL | ClassFlags::ENUM,
            );
            body.superclass = enum_ty.clone();
            let body_class = pb.class_def(body)?;
            let body_init = pb.method(
                body_class,
                "<init>",
                init_params.clone(),
                Type::Void,
                MethodFlags::empty(),
            );
            let arg_count = init_params.len() + 1;
            pb.code(body_init, |f| {
                let args: Vec<ValueId> = (0..arg_count).map(|i| f.arg(i)).collect();
                f.block(0, |b| {
                    b.call_direct_void(init, &args);
                    b.ret();
                });
            });
            body_classes.push((*ordinal, body_class, body_init));
        }

        let clinit = pb.method(
            enum_class,
            "<clinit>",
            Vec::new(),
            Type::Void,
            MethodFlags::STATIC,
        );
        pb.code(clinit, |f| {
            f.block(0, |b| {
                let mut instances = Vec::new();
                for (ordinal, constant) in constants.iter().enumerate() {
                    let body = body_classes.iter().find(|(o, _, _)| *o == ordinal);
                    let (class, ctor) = match body {
                        Some((_, class, ctor)) => (*class, *ctor),
                        None => (enum_class, init),
                    };
                    let instance = b.new_instance(class);
                    let name_value = b.const_str(constant);
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    let ordinal_value = b.const_int(ordinal as i32);
                    let mut args = vec![instance, name_value, ordinal_value];
                    for spec in &fields {
                        let arg = match spec.values.get(ordinal) {
                            Some(FieldInit::Const(value)) => b.constant(value.clone()),
                            Some(FieldInit::EnumConstant(field)) => b.sget(*field),
                            None => b.constant(ConstValue::Null),
                        };
                        args.push(arg);
                    }
                    b.call_direct_void(ctor, &args);
                    b.sput(constant_fields[ordinal], instance);
                    instances.push(instance);
                }
                let values = b.new_array_filled(enum_ty.clone(), &instances);
                b.sput(values_field, values);
                for message in &clinit_messages {
                    b.print_str(message);
                }
                b.ret();
            });
        });

        let values_method = pb.static_method(
            enum_class,
            "values",
            Vec::new(),
            Type::array_of(enum_ty.clone()),
        );
        pb.code(values_method, |f| {
            f.block(0, |b| {
                let values = b.sget(values_field);
                let copy = b.lib(LibraryMethod::ArrayClone, &[values]);
                let cast = b.check_cast(copy, Type::array_of(enum_ty.clone()));
                b.ret_val(cast);
            });
        });

        let value_of_method = pb.static_method(
            enum_class,
            "valueOf",
            vec![Type::String],
            enum_ty.clone(),
        );
        pb.code(value_of_method, |f| {
            let name_arg = f.arg(0);
            f.block(0, |b| {
                let class_value = b.const_class(enum_ty.clone());
                let found = b.lib(LibraryMethod::EnumValueOf, &[class_value, name_arg]);
                let cast = b.check_cast(found, enum_ty.clone());
                b.ret_val(cast);
            });
        });

        Ok(EnumHandle {
            class: enum_class,
            constants: constant_fields,
            values_field,
            values_method,
            value_of_method,
            init,
            clinit,
            instance_fields,
            bodies: body_classes.into_iter().map(|(o, c, _)| (o, c)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_prepended_to_entry() {
        let mut pb = ProgramBuilder::new("test");
        let main = pb.class("Main").unwrap();
        let m = pb.static_method(main, "id", vec![Type::Int], Type::Int);
        pb.code(m, |f| {
            let x = f.arg(0);
            f.block(0, |b| b.ret_val(x));
        });
        let program = pb.build();
        let code = program.method(m).code.as_ref().unwrap();
        assert_eq!(code.blocks.len(), 1);
        assert!(matches!(code.blocks[0].instrs[0], Instr::Arg { index: 0, .. }));
        assert!(matches!(code.blocks[0].instrs[1], Instr::Return { value: Some(_) }));
    }

    #[test]
    fn test_gaps_filled_with_empty_blocks() {
        let mut pb = ProgramBuilder::new("test");
        let main = pb.class("Main").unwrap();
        let m = pb.static_method(main, "m", vec![], Type::Void);
        pb.code(m, |f| {
            f.block(0, |b| b.goto(2));
            f.block(2, |b| b.ret());
        });
        let program = pb.build();
        let code = program.method(m).code.as_ref().unwrap();
        assert_eq!(code.blocks.len(), 3);
        assert!(code.blocks[1].instrs.is_empty());
    }

    #[test]
    fn test_enum_layout() {
        let mut pb = ProgramBuilder::new("test");
        let e = pb
            .enum_class("com.example.MyEnum")
            .constants(&["A", "B"])
            .int_field("field", &[10, 20])
            .build()
            .unwrap();
        let program = pb.build();
        let class = program.class(e.class);
        assert!(class.is_enum());
        assert_eq!(e.constants.len(), 2);
        assert_eq!(program.field(e.values_field).name, "$VALUES");
        assert_eq!(program.method(e.init).params.len(), 3);
        assert_eq!(program.method_descriptor(e.values_method), "()[Lcom/example/MyEnum;");
        assert_eq!(
            program.method_descriptor(e.value_of_method),
            "(Ljava/lang/String;)Lcom/example/MyEnum;"
        );
    }
}
