//! Instance-field mapping.
//!
//! An unboxed enum keeps no instances, so every instance field read by surviving
//! code must be recomputed from the encoded value. The mapper replays the class
//! initializer symbolically: each constant is created by `new E` followed by a
//! constructor call, and the constructor (following `this(...)` delegation) assigns
//! fields from its arguments. The per-ordinal values then collapse into one of
//! three [`FieldMapping`]s.
//!
//! The same replay validates the shapes the rewriter relies on. A class
//! initializer that does not create every constant exactly once, or a constructor
//! that does anything besides assigning its own fields, boxes the enum.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    enums::{candidate::CandidateSet, collector::constant_fields, reason::BoxingReason},
    interp::format_double,
    program::{
        BinaryOp, Callee, ClassId, Code, ConstValue, FieldId, Instr, LibraryMethod, MethodId, Program, Type,
        ValueId,
    },
};

/// Outcome of a mapping step; the error names why the enum must stay boxed.
pub type Mapping<T> = std::result::Result<T, BoxingReason>;

const MAX_DELEGATION_DEPTH: usize = 8;

/// A value known when the class initializer runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Known {
    /// A literal.
    Const(ConstValue),
    /// A constant of some enum, by ordinal.
    Constant {
        /// The enum.
        class: ClassId,
        /// The constant's ordinal.
        ordinal: usize,
    },
}

/// How reads of one instance field are recomputed.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldMapping {
    /// The field equals the ordinal.
    Ordinal,
    /// Every constant holds the same value.
    Constant(ConstValue),
    /// A lookup table indexed by ordinal.
    Table(Vec<ConstValue>),
}

/// Everything the rewriter needs to replace an enum's instances.
#[derive(Debug, Clone, Default)]
pub struct InstanceFieldPlan {
    /// Constant names by ordinal, as passed to `Enum.<init>`.
    pub names: Vec<String>,
    /// Mappings of the instance fields read by surviving code.
    pub fields: FxHashMap<FieldId, FieldMapping>,
    /// Folded `toString()` results by ordinal, when the enum overrides it.
    pub to_string: Option<Vec<ConstValue>>,
}

impl InstanceFieldPlan {
    /// Returns the mapping of `field`, if it is read.
    #[must_use]
    pub fn mapping(&self, field: FieldId) -> Option<&FieldMapping> {
        self.fields.get(&field)
    }

    /// Returns the number of fields kept as lookup tables.
    #[must_use]
    pub fn tables(&self) -> usize {
        self.fields
            .values()
            .filter(|m| matches!(m, FieldMapping::Table(_)))
            .count()
    }

    /// Returns the string `toString()` yields for `ordinal`.
    #[must_use]
    pub fn to_string_of(&self, ordinal: usize) -> ConstValue {
        match &self.to_string {
            Some(values) => values.get(ordinal).cloned().unwrap_or(ConstValue::Null),
            None => self
                .names
                .get(ordinal)
                .map_or(ConstValue::Null, |n| ConstValue::Str(n.clone())),
        }
    }
}

/// One constant created by the class initializer.
#[derive(Debug, Clone)]
pub struct ConstantCreation {
    /// The constant's ordinal.
    pub ordinal: usize,
    /// The static field holding it.
    pub field: FieldId,
    /// The constructor invoked.
    pub ctor: MethodId,
    /// Arguments after the receiver; `None` where unknown.
    pub args: Vec<Option<Known>>,
}

/// Recognizes how the class initializer of `class` creates its constants.
///
/// # Errors
///
/// Returns [`BoxingReason::InvalidClassInitializer`] unless each constant field is
/// assigned exactly once from a fresh instance whose constructor was called.
pub fn parse_initializer(program: &Program, class: ClassId) -> Mapping<Vec<ConstantCreation>> {
    let constants = constant_fields(program, class);
    let Some(code) = program
        .class(class)
        .methods
        .iter()
        .map(|m| program.method(*m))
        .find(|m| m.is_class_initializer())
        .and_then(|m| m.code.as_ref())
    else {
        return Err(BoxingReason::InvalidClassInitializer);
    };

    let mut known: FxHashMap<ValueId, Known> = FxHashMap::default();
    let mut instances: FxHashMap<ValueId, Option<(MethodId, Vec<Option<Known>>)>> = FxHashMap::default();
    let mut creations: Vec<Option<ConstantCreation>> = vec![None; constants.len()];

    for (_, instr) in code.iter_instrs() {
        match instr {
            Instr::Const { dest, value } => {
                known.insert(*dest, Known::Const(value.clone()));
            }
            Instr::Binary { dest, op, lhs, rhs } => {
                if let Some(value) = fold_known(*op, known.get(lhs), known.get(rhs)) {
                    known.insert(*dest, value);
                }
            }
            Instr::StaticGet { dest, field } => {
                let holder = program.field(*field).holder;
                let ordinal = constant_fields(program, holder)
                    .iter()
                    .position(|f| f == field);
                if let Some(ordinal) = ordinal {
                    let value = if holder == class && creations.get(ordinal).is_some_and(Option::is_none) {
                        Known::Const(ConstValue::Null)
                    } else {
                        Known::Constant {
                            class: holder,
                            ordinal,
                        }
                    };
                    known.insert(*dest, value);
                }
            }
            Instr::NewInstance { dest, class: created } if *created == class => {
                instances.insert(*dest, None);
            }
            Instr::Invoke {
                callee: Callee::Program(ctor),
                args,
                ..
            } if program.method(*ctor).holder == class && program.method(*ctor).is_instance_initializer() => {
                let Some(slot) = args.first().and_then(|r| instances.get_mut(r)) else {
                    continue;
                };
                if slot.is_some() {
                    return Err(BoxingReason::InvalidClassInitializer);
                }
                let values = args[1..].iter().map(|a| known.get(a).cloned()).collect();
                *slot = Some((*ctor, values));
            }
            Instr::StaticPut { field, value } => {
                let Some(ordinal) = constants.iter().position(|f| f == field) else {
                    continue;
                };
                let Some(Some((ctor, args))) = instances.get(value) else {
                    return Err(BoxingReason::InvalidClassInitializer);
                };
                if creations[ordinal].is_some() {
                    return Err(BoxingReason::InvalidClassInitializer);
                }
                creations[ordinal] = Some(ConstantCreation {
                    ordinal,
                    field: *field,
                    ctor: *ctor,
                    args: args.clone(),
                });
            }
            _ => {}
        }
    }

    creations
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or(BoxingReason::InvalidClassInitializer)
}

fn fold_known(op: BinaryOp, lhs: Option<&Known>, rhs: Option<&Known>) -> Option<Known> {
    let (Some(Known::Const(lhs)), Some(Known::Const(rhs))) = (lhs, rhs) else {
        return None;
    };
    fold_binary(op, lhs, rhs).map(Known::Const)
}

/// Folds integer arithmetic; division by zero does not fold.
#[must_use]
pub fn fold_binary(op: BinaryOp, lhs: &ConstValue, rhs: &ConstValue) -> Option<ConstValue> {
    match (lhs, rhs) {
        (ConstValue::Int(a), ConstValue::Int(b)) => {
            let (a, b) = (*a, *b);
            Some(ConstValue::Int(match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div if b != 0 => a.wrapping_div(b),
                BinaryOp::Rem if b != 0 => a.wrapping_rem(b),
                BinaryOp::Div | BinaryOp::Rem => return None,
                BinaryOp::And => a & b,
                BinaryOp::Or => a | b,
                BinaryOp::Xor => a ^ b,
            }))
        }
        (ConstValue::Long(a), ConstValue::Long(b)) => {
            let (a, b) = (*a, *b);
            Some(ConstValue::Long(match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div if b != 0 => a.wrapping_div(b),
                BinaryOp::Rem if b != 0 => a.wrapping_rem(b),
                BinaryOp::Div | BinaryOp::Rem => return None,
                BinaryOp::And => a & b,
                BinaryOp::Or => a | b,
                BinaryOp::Xor => a ^ b,
            }))
        }
        _ => None,
    }
}

/// Renders a constant the way string conversion does; `None` for class literals.
#[must_use]
pub fn const_to_string(value: &ConstValue) -> Option<String> {
    Some(match value {
        ConstValue::Null => "null".to_string(),
        ConstValue::Int(v) => v.to_string(),
        ConstValue::Long(v) => v.to_string(),
        ConstValue::Double(v) => format_double(*v),
        ConstValue::Bool(v) => v.to_string(),
        ConstValue::Str(s) => s.clone(),
        ConstValue::Class(_) => return None,
    })
}

/// State of one instance after its constructor chain ran.
#[derive(Debug, Default)]
struct InstanceState {
    name: Option<Known>,
    ordinal: Option<Known>,
    fields: FxHashMap<FieldId, Option<Known>>,
}

/// Straight-line body of a constructor or `toString()`; `None` for branching code.
fn straight_line(code: &Code) -> Option<&[Instr]> {
    match code.blocks.as_slice() {
        [entry] => Some(&entry.instrs),
        _ => None,
    }
}

fn run_constructor(
    program: &Program,
    class: ClassId,
    ctor: MethodId,
    args: &[Option<Known>],
    state: &mut InstanceState,
    depth: usize,
) -> Mapping<()> {
    let side_effects = BoxingReason::InstanceInitializerSideEffects;
    if depth > MAX_DELEGATION_DEPTH {
        return Err(side_effects);
    }
    let instrs = program
        .method(ctor)
        .code
        .as_ref()
        .and_then(straight_line)
        .ok_or(side_effects)?;

    let mut this = None;
    let mut values: FxHashMap<ValueId, Option<Known>> = FxHashMap::default();
    let value = |values: &FxHashMap<ValueId, Option<Known>>, v: &ValueId| values.get(v).cloned().flatten();

    for instr in instrs {
        match instr {
            Instr::Arg { dest, index: 0 } => this = Some(*dest),
            Instr::Arg { dest, index } => {
                let arg = args.get(usize::from(*index) - 1).cloned().flatten();
                values.insert(*dest, arg);
            }
            Instr::Const { dest, value } => {
                values.insert(*dest, Some(Known::Const(value.clone())));
            }
            Instr::Binary { dest, op, lhs, rhs } => {
                let (l, r) = (value(&values, lhs), value(&values, rhs));
                let divides = matches!(op, BinaryOp::Div | BinaryOp::Rem);
                let folded = fold_known(*op, l.as_ref(), r.as_ref());
                if divides && folded.is_none() {
                    return Err(side_effects);
                }
                values.insert(*dest, folded);
            }
            Instr::InstancePut { field, object, value: v }
                if Some(*object) == this && program.field(*field).holder == class =>
            {
                state.fields.insert(*field, value(&values, v));
            }
            Instr::Invoke {
                callee: Callee::Library(LibraryMethod::EnumInit),
                args: call_args,
                ..
            } if call_args.first().copied() == this && call_args.len() == 3 => {
                state.name = value(&values, &call_args[1]);
                state.ordinal = value(&values, &call_args[2]);
            }
            Instr::Invoke {
                callee: Callee::Library(LibraryMethod::StringConcat),
                dest: Some(dest),
                args: call_args,
                ..
            } => {
                let [lhs, rhs] = call_args.as_slice() else {
                    return Err(side_effects);
                };
                let folded = match (value(&values, lhs), value(&values, rhs)) {
                    (Some(Known::Const(ConstValue::Str(a))), Some(Known::Const(ConstValue::Str(b)))) => {
                        Some(Known::Const(ConstValue::Str(format!("{a}{b}"))))
                    }
                    _ => return Err(side_effects),
                };
                values.insert(*dest, folded);
            }
            Instr::Invoke {
                callee: Callee::Program(target),
                args: call_args,
                ..
            } if call_args.first().copied() == this
                && program.method(*target).holder == class
                && program.method(*target).is_instance_initializer() =>
            {
                let forwarded: Vec<Option<Known>> = call_args[1..].iter().map(|a| value(&values, a)).collect();
                run_constructor(program, class, *target, &forwarded, state, depth + 1)?;
            }
            Instr::Return { value: None } => return Ok(()),
            _ => return Err(side_effects),
        }
    }
    Ok(())
}

fn default_value(ty: &Type) -> ConstValue {
    match ty {
        Type::Boolean => ConstValue::Bool(false),
        Type::Int => ConstValue::Int(0),
        Type::Long => ConstValue::Long(0),
        Type::Double => ConstValue::Double(0.0),
        _ => ConstValue::Null,
    }
}

/// Converts a field value to the representation the rewritten program stores.
fn encode(candidates: &CandidateSet, field_ty: &Type, value: &Known) -> Mapping<ConstValue> {
    match value {
        Known::Constant { class, ordinal } => {
            if field_ty == &Type::Class(*class) && candidates.is_unboxable(*class) {
                i32::try_from(*ordinal + 1)
                    .map(ConstValue::Int)
                    .map_err(|_| BoxingReason::UnrepresentableFieldType)
            } else {
                Err(BoxingReason::UnrepresentableFieldType)
            }
        }
        Known::Const(ConstValue::Class(ty)) if ty.base_class().is_some_and(|c| candidates.contains(c)) => {
            Err(BoxingReason::UnrepresentableFieldType)
        }
        Known::Const(ConstValue::Null) => match field_ty {
            Type::Class(class) if candidates.is_unboxable(*class) => Ok(ConstValue::Int(0)),
            _ => Ok(ConstValue::Null),
        },
        Known::Const(value) => Ok(value.clone()),
    }
}

fn collapse(values: Vec<ConstValue>) -> FieldMapping {
    if values.windows(2).all(|w| w[0] == w[1]) {
        if let Some(first) = values.first() {
            return FieldMapping::Constant(first.clone());
        }
    }
    let is_ordinal = values
        .iter()
        .enumerate()
        .all(|(i, v)| v.as_int().and_then(|v| usize::try_from(v).ok()) == Some(i));
    if is_ordinal {
        FieldMapping::Ordinal
    } else {
        FieldMapping::Table(values)
    }
}

/// Returns the `toString()` override declared by `class`, if any.
#[must_use]
pub fn to_string_override(program: &Program, class: ClassId) -> Option<MethodId> {
    program.class(class).methods.iter().copied().find(|m| {
        let def = program.method(*m);
        def.name == "toString" && !def.is_static() && def.params.is_empty() && def.ret == Type::String
    })
}

fn fold_to_string(
    program: &Program,
    method: MethodId,
    name: &str,
    fields: &FxHashMap<FieldId, Option<Known>>,
) -> Mapping<ConstValue> {
    let non_foldable = BoxingReason::NonFoldableToString;
    let instrs = program
        .method(method)
        .code
        .as_ref()
        .and_then(straight_line)
        .ok_or(non_foldable)?;

    let mut this = None;
    let mut values: FxHashMap<ValueId, ConstValue> = FxHashMap::default();
    for instr in instrs {
        match instr {
            Instr::Arg { dest, index: 0 } => this = Some(*dest),
            Instr::Const { dest, value } => {
                values.insert(*dest, value.clone());
            }
            Instr::InstanceGet { dest, field, object } if Some(*object) == this => {
                let value = match fields.get(field) {
                    Some(Some(Known::Const(value))) => value.clone(),
                    Some(_) => return Err(non_foldable),
                    None => default_value(&program.field(*field).ty),
                };
                values.insert(*dest, value);
            }
            Instr::Binary { dest, op, lhs, rhs } => {
                let folded = match (values.get(lhs), values.get(rhs)) {
                    (Some(l), Some(r)) => fold_binary(*op, l, r).ok_or(non_foldable)?,
                    _ => return Err(non_foldable),
                };
                values.insert(*dest, folded);
            }
            Instr::Invoke {
                dest: Some(dest),
                callee: Callee::Library(LibraryMethod::EnumName),
                args,
                ..
            } if args.first().copied() == this && this.is_some() => {
                values.insert(*dest, ConstValue::Str(name.to_string()));
            }
            Instr::Invoke {
                dest: Some(dest),
                callee: Callee::Library(LibraryMethod::StringConcat),
                args,
                ..
            } => match args.as_slice() {
                [lhs, rhs] => match (values.get(lhs), values.get(rhs)) {
                    (Some(ConstValue::Str(a)), Some(ConstValue::Str(b))) => {
                        values.insert(*dest, ConstValue::Str(format!("{a}{b}")));
                    }
                    _ => return Err(non_foldable),
                },
                _ => return Err(non_foldable),
            },
            Instr::Invoke {
                dest: Some(dest),
                callee: Callee::Library(LibraryMethod::StringValueOf),
                args,
                ..
            } => {
                let text = args
                    .first()
                    .and_then(|arg| values.get(arg))
                    .and_then(const_to_string)
                    .ok_or(non_foldable)?;
                values.insert(*dest, ConstValue::Str(text));
            }
            Instr::Return { value: Some(v) } => {
                return match values.get(v) {
                    Some(value @ (ConstValue::Str(_) | ConstValue::Null)) => Ok(value.clone()),
                    _ => Err(non_foldable),
                };
            }
            _ => return Err(non_foldable),
        }
    }
    Err(non_foldable)
}

/// Builds the instance-field plan of `class`.
///
/// `reads` are the instance fields of `class` read by code that survives
/// rewriting; `to_string_used` says whether any value of the enum is converted to
/// a string.
///
/// # Errors
///
/// Returns the reason the enum must stay boxed when the initializer shape is not
/// recognized, the constructor has side effects, a read field is unknown or
/// unrepresentable, the table budget is exceeded, or a used `toString()` override
/// does not fold.
pub fn map_fields(
    program: &Program,
    candidates: &CandidateSet,
    class: ClassId,
    reads: &FxHashSet<FieldId>,
    to_string_used: bool,
    max_tables: usize,
) -> Mapping<InstanceFieldPlan> {
    let creations = parse_initializer(program, class)?;

    let mut states = Vec::with_capacity(creations.len());
    let mut names = Vec::with_capacity(creations.len());
    for creation in &creations {
        let mut state = InstanceState::default();
        run_constructor(program, class, creation.ctor, &creation.args, &mut state, 0)?;
        let ordinal_matches = matches!(
            &state.ordinal,
            Some(Known::Const(ConstValue::Int(o))) if usize::try_from(*o).ok() == Some(creation.ordinal)
        );
        let Some(Known::Const(ConstValue::Str(name))) = state.name.take() else {
            return Err(BoxingReason::InvalidClassInitializer);
        };
        if !ordinal_matches {
            return Err(BoxingReason::InvalidClassInitializer);
        }
        names.push(name);
        states.push(state);
    }

    let mut read_fields: Vec<FieldId> = reads.iter().copied().collect();
    read_fields.sort_unstable();

    let mut fields = FxHashMap::default();
    for field in read_fields {
        let ty = &program.field(field).ty;
        let mut values = Vec::with_capacity(states.len());
        for state in &states {
            let value = match state.fields.get(&field) {
                None => encode(candidates, ty, &Known::Const(default_value(ty)))?,
                Some(None) => return Err(BoxingReason::UnresolvableFieldInitializer),
                Some(Some(known)) => encode(candidates, ty, known)?,
            };
            values.push(value);
        }
        fields.insert(field, collapse(values));
    }

    let plan = InstanceFieldPlan {
        to_string: None,
        names,
        fields,
    };
    if plan.tables() > max_tables {
        return Err(BoxingReason::TooManyFields);
    }

    let to_string = match (to_string_override(program, class), to_string_used) {
        (Some(method), true) => Some(
            states
                .iter()
                .zip(&plan.names)
                .map(|(state, name)| fold_to_string(program, method, name, &state.fields))
                .collect::<Mapping<Vec<_>>>()?,
        ),
        _ => None,
    };
    Ok(InstanceFieldPlan { to_string, ..plan })
}
