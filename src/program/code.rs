//! SSA method bodies.
//!
//! A [`Code`] is a list of [`Block`]s; block 0 is the entry. Every value is defined
//! exactly once, either by an [`Instr`] or by a [`Phi`] at the head of a block, and
//! carries the static [`Type`] recorded in [`Code::values`].
//!
//! # Field Documentation
//!
//! The struct-variant fields of [`Instr`] follow a consistent naming convention:
//! - `dest`: The value defined by the instruction
//! - `lhs`, `rhs`: Binary operands
//! - `value`: A value being stored, tested or converted
//! - `object`: The receiver of an instance field access
//! - `array`, `index`: Array and index for element operations
//! - `field`, `class`: The referenced field or class
//! - `then_block`, `else_block`, `target`, `targets`, `default`: Branch targets

#![allow(missing_docs)]

use std::fmt;

use rustc_hash::FxHashMap;
use strum::Display;

use crate::program::{
    item::{ClassId, FieldId, MethodId, MethodReference},
    library::LibraryMethod,
    types::Type,
    Program,
};

id_type!(
    /// Index of an SSA value within a [`Code`].
    ValueId
);
id_type!(
    /// Index of a basic block within a [`Code`].
    BlockId
);

/// A compile-time constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    /// `null`
    Null,
    /// An `int` constant.
    Int(i32),
    /// A `long` constant.
    Long(i64),
    /// A `double` constant.
    Double(f64),
    /// A `boolean` constant.
    Bool(bool),
    /// A string literal.
    Str(String),
    /// A class literal (`Foo.class`).
    Class(Type),
}

impl ConstValue {
    /// Returns the static type a value defined by this constant has.
    #[must_use]
    pub fn ty(&self) -> Type {
        match self {
            ConstValue::Null => Type::Null,
            ConstValue::Int(_) => Type::Int,
            ConstValue::Long(_) => Type::Long,
            ConstValue::Double(_) => Type::Double,
            ConstValue::Bool(_) => Type::Boolean,
            ConstValue::Str(_) => Type::String,
            ConstValue::Class(_) => Type::Library(crate::program::LibraryType::Class),
        }
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            ConstValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// Arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BinaryOp {
    /// `+`
    #[strum(serialize = "add")]
    Add,
    /// `-`
    #[strum(serialize = "sub")]
    Sub,
    /// `*`
    #[strum(serialize = "mul")]
    Mul,
    /// `/`
    #[strum(serialize = "div")]
    Div,
    /// `%`
    #[strum(serialize = "rem")]
    Rem,
    /// `&`
    #[strum(serialize = "and")]
    And,
    /// `|`
    #[strum(serialize = "or")]
    Or,
    /// `^`
    #[strum(serialize = "xor")]
    Xor,
}

/// Comparison kinds used by [`Instr::If`] and [`Instr::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CmpKind {
    /// `==`
    #[strum(serialize = "eq")]
    Eq,
    /// `!=`
    #[strum(serialize = "ne")]
    Ne,
    /// `<`
    #[strum(serialize = "lt")]
    Lt,
    /// `<=`
    #[strum(serialize = "le")]
    Le,
    /// `>`
    #[strum(serialize = "gt")]
    Gt,
    /// `>=`
    #[strum(serialize = "ge")]
    Ge,
}

impl CmpKind {
    /// Returns true for `==` and `!=`, the only comparisons defined on references.
    #[must_use]
    pub fn is_equality(self) -> bool {
        matches!(self, CmpKind::Eq | CmpKind::Ne)
    }

    /// Evaluates the comparison on an ordering.
    #[must_use]
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering;
        match self {
            CmpKind::Eq => ordering == Ordering::Equal,
            CmpKind::Ne => ordering != Ordering::Equal,
            CmpKind::Lt => ordering == Ordering::Less,
            CmpKind::Le => ordering != Ordering::Greater,
            CmpKind::Gt => ordering == Ordering::Greater,
            CmpKind::Ge => ordering != Ordering::Less,
        }
    }
}

/// Invocation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum InvokeKind {
    /// `invokestatic`
    #[strum(serialize = "static")]
    Static,
    /// `invokevirtual`
    #[strum(serialize = "virtual")]
    Virtual,
    /// `invokeinterface`
    #[strum(serialize = "interface")]
    Interface,
    /// `invokespecial` on a constructor or private method.
    #[strum(serialize = "direct")]
    Direct,
    /// `invokespecial` on a superclass method.
    #[strum(serialize = "super")]
    Super,
}

/// The target of an [`Instr::Invoke`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    /// A method defined in the program.
    Program(MethodId),
    /// A modeled library method.
    Library(LibraryMethod),
    /// A reference that does not resolve (missing library member or removed method).
    Missing(MethodReference),
}

/// A single non-phi instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// `dest = constant`
    Const { dest: ValueId, value: ConstValue },
    /// `dest = argument[index]`; index 0 is the receiver of instance methods.
    Arg { dest: ValueId, index: u16 },
    /// `dest = lhs op rhs`
    Binary {
        dest: ValueId,
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// `dest = lhs cmp rhs` producing a boolean.
    Compare {
        dest: ValueId,
        cmp: CmpKind,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Conditional branch. Without `rhs` the operand is tested against zero/null.
    If {
        cmp: CmpKind,
        lhs: ValueId,
        rhs: Option<ValueId>,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Unconditional branch.
    Goto { target: BlockId },
    /// Multi-way branch on an `int`.
    Switch {
        value: ValueId,
        keys: Vec<i32>,
        targets: Vec<BlockId>,
        default: BlockId,
    },
    /// Method return.
    Return { value: Option<ValueId> },
    /// Throws the operand.
    Throw { value: ValueId },
    /// `dest = Holder.field`
    StaticGet { dest: ValueId, field: FieldId },
    /// `Holder.field = value`
    StaticPut { field: FieldId, value: ValueId },
    /// `dest = object.field`
    InstanceGet {
        dest: ValueId,
        field: FieldId,
        object: ValueId,
    },
    /// `object.field = value`
    InstancePut {
        field: FieldId,
        object: ValueId,
        value: ValueId,
    },
    /// `dest = new element[size]`
    NewArray {
        dest: ValueId,
        element: Type,
        size: ValueId,
    },
    /// `dest = new ty[d0][d1]...`; `ty` is the full array type.
    NewMultiArray {
        dest: ValueId,
        ty: Type,
        dims: Vec<ValueId>,
    },
    /// `dest = new element[] { values... }`
    NewArrayFilled {
        dest: ValueId,
        element: Type,
        values: Vec<ValueId>,
    },
    /// `dest = array[index]`
    ArrayGet {
        dest: ValueId,
        array: ValueId,
        index: ValueId,
    },
    /// `array[index] = value`
    ArrayPut {
        array: ValueId,
        index: ValueId,
        value: ValueId,
    },
    /// `dest = array.length`
    ArrayLength { dest: ValueId, array: ValueId },
    /// `dest = new Class` (uninitialized until its `<init>` runs).
    NewInstance { dest: ValueId, class: ClassId },
    /// Method invocation.
    Invoke {
        dest: Option<ValueId>,
        kind: InvokeKind,
        callee: Callee,
        args: Vec<ValueId>,
    },
    /// `dest = (ty) value`
    CheckCast {
        dest: ValueId,
        value: ValueId,
        ty: Type,
    },
    /// `dest = value instanceof ty`
    InstanceOf {
        dest: ValueId,
        value: ValueId,
        ty: Type,
    },
    /// Triggers class initialization of `class` without any other effect.
    InitClass { class: ClassId },
}

impl Instr {
    /// Returns the value defined by this instruction.
    #[must_use]
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            Instr::Const { dest, .. }
            | Instr::Arg { dest, .. }
            | Instr::Binary { dest, .. }
            | Instr::Compare { dest, .. }
            | Instr::StaticGet { dest, .. }
            | Instr::InstanceGet { dest, .. }
            | Instr::NewArray { dest, .. }
            | Instr::NewMultiArray { dest, .. }
            | Instr::NewArrayFilled { dest, .. }
            | Instr::ArrayGet { dest, .. }
            | Instr::ArrayLength { dest, .. }
            | Instr::NewInstance { dest, .. }
            | Instr::CheckCast { dest, .. }
            | Instr::InstanceOf { dest, .. } => Some(*dest),
            Instr::Invoke { dest, .. } => *dest,
            Instr::If { .. }
            | Instr::Goto { .. }
            | Instr::Switch { .. }
            | Instr::Return { .. }
            | Instr::Throw { .. }
            | Instr::StaticPut { .. }
            | Instr::InstancePut { .. }
            | Instr::ArrayPut { .. }
            | Instr::InitClass { .. } => None,
        }
    }

    /// Returns the values read by this instruction, in evaluation order.
    #[must_use]
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Instr::Const { .. }
            | Instr::Arg { .. }
            | Instr::Goto { .. }
            | Instr::StaticGet { .. }
            | Instr::NewInstance { .. }
            | Instr::InitClass { .. } => Vec::new(),
            Instr::Binary { lhs, rhs, .. } | Instr::Compare { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instr::If { lhs, rhs, .. } => {
                let mut ops = vec![*lhs];
                ops.extend(rhs.iter().copied());
                ops
            }
            Instr::Switch { value, .. }
            | Instr::Throw { value }
            | Instr::StaticPut { value, .. }
            | Instr::CheckCast { value, .. }
            | Instr::InstanceOf { value, .. } => vec![*value],
            Instr::Return { value } => value.iter().copied().collect(),
            Instr::InstanceGet { object, .. } => vec![*object],
            Instr::InstancePut { object, value, .. } => vec![*object, *value],
            Instr::NewArray { size, .. } => vec![*size],
            Instr::NewMultiArray { dims, .. } => dims.clone(),
            Instr::NewArrayFilled { values, .. } => values.clone(),
            Instr::ArrayGet { array, index, .. } => vec![*array, *index],
            Instr::ArrayPut {
                array,
                index,
                value,
            } => vec![*array, *index, *value],
            Instr::ArrayLength { array, .. } => vec![*array],
            Instr::Invoke { args, .. } => args.clone(),
        }
    }

    /// Returns mutable references to the operands, in the same order as [`Instr::operands`].
    pub fn operands_mut(&mut self) -> Vec<&mut ValueId> {
        match self {
            Instr::Const { .. }
            | Instr::Arg { .. }
            | Instr::Goto { .. }
            | Instr::StaticGet { .. }
            | Instr::NewInstance { .. }
            | Instr::InitClass { .. } => Vec::new(),
            Instr::Binary { lhs, rhs, .. } | Instr::Compare { lhs, rhs, .. } => vec![lhs, rhs],
            Instr::If { lhs, rhs, .. } => {
                let mut ops = vec![lhs];
                ops.extend(rhs.iter_mut());
                ops
            }
            Instr::Switch { value, .. }
            | Instr::Throw { value }
            | Instr::StaticPut { value, .. }
            | Instr::CheckCast { value, .. }
            | Instr::InstanceOf { value, .. } => vec![value],
            Instr::Return { value } => value.iter_mut().collect(),
            Instr::InstanceGet { object, .. } => vec![object],
            Instr::InstancePut { object, value, .. } => vec![object, value],
            Instr::NewArray { size, .. } => vec![size],
            Instr::NewMultiArray { dims, .. } => dims.iter_mut().collect(),
            Instr::NewArrayFilled { values, .. } => values.iter_mut().collect(),
            Instr::ArrayGet { array, index, .. } => vec![array, index],
            Instr::ArrayPut {
                array,
                index,
                value,
            } => vec![array, index, value],
            Instr::ArrayLength { array, .. } => vec![array],
            Instr::Invoke { args, .. } => args.iter_mut().collect(),
        }
    }

    /// Returns true if this instruction ends a block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instr::If { .. }
                | Instr::Goto { .. }
                | Instr::Switch { .. }
                | Instr::Return { .. }
                | Instr::Throw { .. }
        )
    }

    /// Returns the successor blocks of a terminator.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Instr::If {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Instr::Goto { target } => vec![*target],
            Instr::Switch {
                targets, default, ..
            } => {
                let mut succs = targets.clone();
                succs.push(*default);
                succs
            }
            _ => Vec::new(),
        }
    }

    /// Returns true if the instruction can be dropped when its result is unused.
    ///
    /// Instructions that may throw or trigger class initialization are never removable.
    #[must_use]
    pub fn is_removable_if_unused(&self) -> bool {
        match self {
            Instr::Const { .. } | Instr::Arg { .. } | Instr::Compare { .. } => true,
            Instr::Binary { op, .. } => !matches!(op, BinaryOp::Div | BinaryOp::Rem),
            _ => false,
        }
    }

    /// Returns a displayable form resolving names through `program`.
    #[must_use]
    pub fn display<'a>(&'a self, program: &'a Program) -> InstrDisplay<'a> {
        InstrDisplay {
            instr: self,
            program,
        }
    }
}

/// An SSA phi node.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    /// The value defined by the phi.
    pub dest: ValueId,
    /// One `(predecessor, value)` pair per incoming edge.
    pub operands: Vec<(BlockId, ValueId)>,
}

/// A basic block: phis followed by instructions ending in a terminator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    /// Phi nodes at the head of the block.
    pub phis: Vec<Phi>,
    /// Instructions; the last one is the terminator.
    pub instrs: Vec<Instr>,
}

impl Block {
    /// Returns the terminator, if the block has one.
    #[must_use]
    pub fn terminator(&self) -> Option<&Instr> {
        self.instrs.last().filter(|instr| instr.is_terminator())
    }
}

/// Where a value is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefSite {
    /// Defined by the phi at `index` in `block`.
    Phi { block: BlockId, index: usize },
    /// Defined by the instruction at `index` in `block`.
    Instr { block: BlockId, index: usize },
}

/// A method body in SSA form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Code {
    /// Static type of each value, indexed by [`ValueId`].
    pub values: Vec<Type>,
    /// Basic blocks, indexed by [`BlockId`]; block 0 is the entry.
    pub blocks: Vec<Block>,
}

impl Code {
    /// Allocates a new value of the given type.
    pub fn new_value(&mut self, ty: Type) -> ValueId {
        push_arena!(self.values, ValueId, ty)
    }

    /// Returns the static type of `value`.
    #[must_use]
    pub fn ty(&self, value: ValueId) -> &Type {
        &self.values[value.index()]
    }

    /// Returns the block with the given id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Returns the block with the given id mutably.
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Iterates over `(BlockId, &Block)` pairs.
    pub fn iter_blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(index, block)| (BlockId::from_usize(index), block))
    }

    /// Iterates over every instruction with its block.
    pub fn iter_instrs(&self) -> impl Iterator<Item = (BlockId, &Instr)> {
        self.iter_blocks()
            .flat_map(|(id, block)| block.instrs.iter().map(move |instr| (id, instr)))
    }

    /// Computes the definition site of every value.
    #[must_use]
    pub fn definitions(&self) -> FxHashMap<ValueId, DefSite> {
        let mut defs = FxHashMap::default();
        for (block_id, block) in self.iter_blocks() {
            for (index, phi) in block.phis.iter().enumerate() {
                defs.insert(
                    phi.dest,
                    DefSite::Phi {
                        block: block_id,
                        index,
                    },
                );
            }
            for (index, instr) in block.instrs.iter().enumerate() {
                if let Some(dest) = instr.dest() {
                    defs.insert(
                        dest,
                        DefSite::Instr {
                            block: block_id,
                            index,
                        },
                    );
                }
            }
        }
        defs
    }

    /// Returns the instruction defining `value`, if it is not a phi.
    #[must_use]
    pub fn defining_instr(&self, defs: &FxHashMap<ValueId, DefSite>, value: ValueId) -> Option<&Instr> {
        match defs.get(&value)? {
            DefSite::Instr { block, index } => self.block(*block).instrs.get(*index),
            DefSite::Phi { .. } => None,
        }
    }

    /// Counts the uses of every value across phis and instructions.
    #[must_use]
    pub fn use_counts(&self) -> FxHashMap<ValueId, usize> {
        let mut counts = FxHashMap::default();
        for block in &self.blocks {
            for phi in &block.phis {
                for (_, value) in &phi.operands {
                    *counts.entry(*value).or_insert(0) += 1;
                }
            }
            for instr in &block.instrs {
                for value in instr.operands() {
                    *counts.entry(value).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Replaces every use of `from` with `to`.
    pub fn replace_uses(&mut self, from: ValueId, to: ValueId) {
        for block in &mut self.blocks {
            for phi in &mut block.phis {
                for (_, value) in &mut phi.operands {
                    if *value == from {
                        *value = to;
                    }
                }
            }
            for instr in &mut block.instrs {
                for value in instr.operands_mut() {
                    if *value == from {
                        *value = to;
                    }
                }
            }
        }
    }

    /// Removes instructions and phis whose results are unused and that have no effect.
    ///
    /// Returns the number of removed definitions.
    pub fn remove_dead_definitions(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let counts = self.use_counts();
            let unused = |value: &ValueId| counts.get(value).copied().unwrap_or(0) == 0;
            let mut changed = 0;
            for block in &mut self.blocks {
                let before = block.phis.len() + block.instrs.len();
                block.phis.retain(|phi| !unused(&phi.dest));
                block.instrs.retain(|instr| match instr.dest() {
                    Some(dest) => !(instr.is_removable_if_unused() && unused(&dest)),
                    None => true,
                });
                changed += before - block.phis.len() - block.instrs.len();
            }
            if changed == 0 {
                return removed;
            }
            removed += changed;
        }
    }

    /// Returns the predecessors of every block.
    #[must_use]
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for (id, block) in self.iter_blocks() {
            if let Some(term) = block.terminator() {
                for succ in term.successors() {
                    if let Some(list) = preds.get_mut(succ.index()) {
                        if !list.contains(&id) {
                            list.push(id);
                        }
                    }
                }
            }
        }
        preds
    }

    /// Returns a displayable form resolving names through `program`.
    #[must_use]
    pub fn display<'a>(&'a self, program: &'a Program) -> CodeDisplay<'a> {
        CodeDisplay {
            code: self,
            program,
        }
    }
}

/// Helper returned by [`Instr::display`].
pub struct InstrDisplay<'a> {
    instr: &'a Instr,
    program: &'a Program,
}

fn write_callee(f: &mut fmt::Formatter<'_>, program: &Program, callee: &Callee) -> fmt::Result {
    match callee {
        Callee::Program(id) => write!(f, "{}", program.method_reference(*id)),
        Callee::Library(method) => write!(f, "{}", method.reference()),
        Callee::Missing(reference) => write!(f, "missing {reference}"),
    }
}

fn write_const(f: &mut fmt::Formatter<'_>, program: &Program, value: &ConstValue) -> fmt::Result {
    match value {
        ConstValue::Null => f.write_str("null"),
        ConstValue::Int(v) => write!(f, "{v}"),
        ConstValue::Long(v) => write!(f, "{v}L"),
        ConstValue::Double(v) => write!(f, "{v}D"),
        ConstValue::Bool(v) => write!(f, "{v}"),
        ConstValue::Str(v) => write!(f, "{v:?}"),
        ConstValue::Class(ty) => write!(f, "{}.class", ty.display(program)),
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, values: &[ValueId]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "v{value}")?;
    }
    Ok(())
}

impl fmt::Display for InstrDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.program;
        match self.instr {
            Instr::Const { dest, value } => {
                write!(f, "v{dest} = const ")?;
                write_const(f, p, value)
            }
            Instr::Arg { dest, index } => write!(f, "v{dest} = arg {index}"),
            Instr::Binary { dest, op, lhs, rhs } => write!(f, "v{dest} = {op} v{lhs}, v{rhs}"),
            Instr::Compare {
                dest,
                cmp,
                lhs,
                rhs,
            } => write!(f, "v{dest} = cmp-{cmp} v{lhs}, v{rhs}"),
            Instr::If {
                cmp,
                lhs,
                rhs,
                then_block,
                else_block,
            } => match rhs {
                Some(rhs) => write!(f, "if-{cmp} v{lhs}, v{rhs} -> b{then_block} else b{else_block}"),
                None => write!(f, "if-{cmp}z v{lhs} -> b{then_block} else b{else_block}"),
            },
            Instr::Goto { target } => write!(f, "goto b{target}"),
            Instr::Switch {
                value,
                keys,
                targets,
                default,
            } => {
                write!(f, "switch v{value} {{")?;
                for (key, target) in keys.iter().zip(targets) {
                    write!(f, " {key} -> b{target},")?;
                }
                write!(f, " default -> b{default} }}")
            }
            Instr::Return { value: Some(value) } => write!(f, "return v{value}"),
            Instr::Return { value: None } => f.write_str("return"),
            Instr::Throw { value } => write!(f, "throw v{value}"),
            Instr::StaticGet { dest, field } => {
                write!(f, "v{dest} = sget {}", p.field_reference(*field))
            }
            Instr::StaticPut { field, value } => {
                write!(f, "sput {} = v{value}", p.field_reference(*field))
            }
            Instr::InstanceGet {
                dest,
                field,
                object,
            } => write!(f, "v{dest} = iget v{object}.{}", p.field_reference(*field)),
            Instr::InstancePut {
                field,
                object,
                value,
            } => write!(f, "iput v{object}.{} = v{value}", p.field_reference(*field)),
            Instr::NewArray {
                dest,
                element,
                size,
            } => write!(f, "v{dest} = new-array {}[v{size}]", element.display(p)),
            Instr::NewMultiArray { dest, ty, dims } => {
                write!(f, "v{dest} = new-multi-array {} [", ty.display(p))?;
                write_values(f, dims)?;
                f.write_str("]")
            }
            Instr::NewArrayFilled {
                dest,
                element,
                values,
            } => {
                write!(f, "v{dest} = new-array-filled {} {{", element.display(p))?;
                write_values(f, values)?;
                f.write_str("}")
            }
            Instr::ArrayGet { dest, array, index } => write!(f, "v{dest} = aget v{array}[v{index}]"),
            Instr::ArrayPut {
                array,
                index,
                value,
            } => write!(f, "aput v{array}[v{index}] = v{value}"),
            Instr::ArrayLength { dest, array } => write!(f, "v{dest} = array-length v{array}"),
            Instr::NewInstance { dest, class } => {
                write!(f, "v{dest} = new-instance {}", p.class(*class).name)
            }
            Instr::Invoke {
                dest,
                kind,
                callee,
                args,
            } => {
                if let Some(dest) = dest {
                    write!(f, "v{dest} = ")?;
                }
                write!(f, "invoke-{kind} ")?;
                write_callee(f, p, callee)?;
                f.write_str("(")?;
                write_values(f, args)?;
                f.write_str(")")
            }
            Instr::CheckCast { dest, value, ty } => {
                write!(f, "v{dest} = check-cast v{value} {}", ty.display(p))
            }
            Instr::InstanceOf { dest, value, ty } => {
                write!(f, "v{dest} = instance-of v{value} {}", ty.display(p))
            }
            Instr::InitClass { class } => write!(f, "init-class {}", p.class(*class).name),
        }
    }
}

/// Helper returned by [`Code::display`].
pub struct CodeDisplay<'a> {
    code: &'a Code,
    program: &'a Program,
}

impl fmt::Display for CodeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, block) in self.code.iter_blocks() {
            writeln!(f, "b{id}:")?;
            for phi in &block.phis {
                write!(f, "  v{} = phi", phi.dest)?;
                for (pred, value) in &phi.operands {
                    write!(f, " [b{pred}: v{value}]")?;
                }
                writeln!(f, " : {}", self.code.ty(phi.dest).display(self.program))?;
            }
            for instr in &block.instrs {
                write!(f, "  {}", instr.display(self.program))?;
                match instr.dest() {
                    Some(dest) => writeln!(f, " : {}", self.code.ty(dest).display(self.program))?,
                    None => writeln!(f)?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Code {
        let mut code = Code::default();
        let cond = code.new_value(Type::Boolean);
        let one = code.new_value(Type::Int);
        let two = code.new_value(Type::Int);
        let merged = code.new_value(Type::Int);
        let unused = code.new_value(Type::Int);
        code.blocks = vec![
            Block {
                phis: Vec::new(),
                instrs: vec![
                    Instr::Arg { dest: cond, index: 0 },
                    Instr::If {
                        cmp: CmpKind::Ne,
                        lhs: cond,
                        rhs: None,
                        then_block: BlockId::new(1),
                        else_block: BlockId::new(2),
                    },
                ],
            },
            Block {
                phis: Vec::new(),
                instrs: vec![
                    Instr::Const {
                        dest: one,
                        value: ConstValue::Int(1),
                    },
                    Instr::Goto {
                        target: BlockId::new(3),
                    },
                ],
            },
            Block {
                phis: Vec::new(),
                instrs: vec![
                    Instr::Const {
                        dest: two,
                        value: ConstValue::Int(2),
                    },
                    Instr::Const {
                        dest: unused,
                        value: ConstValue::Int(7),
                    },
                    Instr::Goto {
                        target: BlockId::new(3),
                    },
                ],
            },
            Block {
                phis: vec![Phi {
                    dest: merged,
                    operands: vec![(BlockId::new(1), one), (BlockId::new(2), two)],
                }],
                instrs: vec![Instr::Return { value: Some(merged) }],
            },
        ];
        code
    }

    #[test]
    fn test_predecessors() {
        let code = diamond();
        let preds = code.predecessors();
        assert!(preds[0].is_empty());
        assert_eq!(preds[3], vec![BlockId::new(1), BlockId::new(2)]);
    }

    #[test]
    fn test_remove_dead_definitions() {
        let mut code = diamond();
        assert_eq!(code.remove_dead_definitions(), 1);
        assert_eq!(code.block(BlockId::new(2)).instrs.len(), 2);
        assert_eq!(code.remove_dead_definitions(), 0);
    }

    #[test]
    fn test_replace_uses() {
        let mut code = diamond();
        let one = ValueId::new(1);
        let two = ValueId::new(2);
        code.replace_uses(two, one);
        let phi = &code.block(BlockId::new(3)).phis[0];
        assert_eq!(phi.operands[1].1, one);
        assert_eq!(code.use_counts().get(&two), None);
    }

    #[test]
    fn test_cmp_kind_holds() {
        use std::cmp::Ordering;
        assert!(CmpKind::Le.holds(Ordering::Equal));
        assert!(!CmpKind::Lt.holds(Ordering::Equal));
        assert!(CmpKind::Ne.holds(Ordering::Greater));
    }
}
