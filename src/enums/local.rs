//! Per-enum local utility classes.
//!
//! Everything an unboxed enum still has to provide besides the shared shims
//! lives on a synthetic `<FQN>$EnumUnboxingLocalUtility` class: the `name()` and
//! `toString()` tables, `valueOf` emulation, getters for instance fields kept
//! as lookup tables, `String.valueOf` emulation, the enum's other static fields,
//! and whatever the class initializer did besides creating the constants.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    enums::{
        collector::constant_fields,
        fields::{FieldMapping, InstanceFieldPlan},
        signature::unboxed_type,
    },
    events::{EventKind, EventLog},
    program::{
        Callee, ClassDef, ClassFlags, ClassId, CmpKind, Code, CodeBuilder, ConstValue, FieldFlags, FieldId, FieldReference, Instr,
        LibraryMethod, MethodFlags, MethodId, PassPins, Program, SyntheticKind, Type, ValueId,
    },
    Result,
};

/// Suffix of local utility class names.
pub const LOCAL_UTILITY_SUFFIX: &str = "$EnumUnboxingLocalUtility";

/// The local utility of one unboxed enum.
#[derive(Debug, Clone)]
pub struct LocalUtility {
    /// The synthetic holder.
    pub class: ClassId,
    /// The enum it replaces.
    pub enum_class: ClassId,
    /// `String name(int)`
    pub name: MethodId,
    /// `String toString(int)`; the same method as `name` without an override.
    pub to_string: MethodId,
    /// `String stringValueOf(int)`
    pub string_value_of: MethodId,
    /// `int valueOf(String)`
    pub value_of: MethodId,
    /// Getters of instance fields kept as tables.
    pub getters: FxHashMap<FieldId, MethodId>,
    /// The relocated class initializer, if anything besides constant creation remained.
    pub initializer: Option<MethodId>,
    /// Static fields moved off the enum, with their references before the move.
    pub relocated: Vec<(FieldId, FieldReference)>,
}

impl LocalUtility {
    /// Returns true if static accesses must initialize the holder.
    #[must_use]
    pub fn has_initializer(&self) -> bool {
        self.initializer.is_some()
    }
}

/// Creates the local utility of `class` and moves the enum's statics onto it.
///
/// # Errors
///
/// Returns an error if the holder cannot be added or the class initializer
/// creates an instance the plan does not account for.
pub fn synthesize_local_utility(
    program: &mut Program,
    class: ClassId,
    plan: &InstanceFieldPlan,
    unboxed: &FxHashSet<ClassId>,
    pins: &PassPins,
    events: &EventLog,
) -> Result<LocalUtility> {
    let enum_name = program.class(class).name.clone();
    let name = program.fresh_class_name(&format!("{enum_name}{LOCAL_UTILITY_SUFFIX}"));
    let mut def = ClassDef::new(name, ClassFlags::PUBLIC | ClassFlags::FINAL | ClassFlags::SYNTHETIC);
    def.synthetic = Some(SyntheticKind::EnumUnboxingLocalUtility);
    let local = program.add_class(def)?;
    pins.no_class_merging.insert(local);
    events
        .record(EventKind::UtilitySynthesized)
        .class(local)
        .message(format!("local utility of {enum_name}"));

    let relocated = relocate_statics(program, class, local, events);
    let initializer = relocate_initializer(program, class, local, unboxed, events)?;

    let count = plan.names.len();
    let names: Vec<ConstValue> = plan.names.iter().map(|n| ConstValue::Str(n.clone())).collect();
    let name = table_method(program, local, "name", Type::String, &names)?;
    let to_string = if plan.to_string.is_some() {
        let strings: Vec<ConstValue> = (0..count).map(|o| plan.to_string_of(o)).collect();
        table_method(program, local, "toString", Type::String, &strings)?
    } else {
        name
    };
    let string_value_of = string_value_of_method(program, local, to_string);
    let value_of = value_of_method(program, local, class, &plan.names);

    let mut getters = FxHashMap::default();
    let mut tables: Vec<(FieldId, &Vec<ConstValue>)> = plan
        .fields
        .iter()
        .filter_map(|(field, mapping)| match mapping {
            FieldMapping::Table(values) => Some((*field, values)),
            _ => None,
        })
        .collect();
    tables.sort_by_key(|(field, _)| *field);
    for (field, values) in tables {
        let def = program.field(field);
        let ty = unboxed_type(&def.ty, unboxed).unwrap_or_else(|| def.ty.clone());
        let getter_name = getter_name(program, local, &def.name);
        let getter = table_method(program, local, &getter_name, ty, values)?;
        getters.insert(field, getter);
    }

    Ok(LocalUtility {
        class: local,
        enum_class: class,
        name,
        to_string,
        string_value_of,
        value_of,
        getters,
        initializer,
        relocated,
    })
}

/// Moves static fields other than the constants and `$VALUES` to `local`.
fn relocate_statics(
    program: &mut Program,
    class: ClassId,
    local: ClassId,
    events: &EventLog,
) -> Vec<(FieldId, FieldReference)> {
    let fields: Vec<FieldId> = program
        .class(class)
        .fields
        .iter()
        .copied()
        .filter(|f| {
            let def = program.field(*f);
            def.is_static() && !def.flags.contains(FieldFlags::ENUM) && def.name != "$VALUES"
        })
        .collect();
    let mut relocated = Vec::with_capacity(fields.len());
    for field in fields {
        let old = program.field_reference(field);
        program.relocate_field(field, local);
        events
            .record(EventKind::FieldRelocated)
            .class(local)
            .message(format!("{old} -> {}", program.class(local).name));
        relocated.push((field, old));
    }
    relocated
}

/// Strips constant creation from the class initializer and moves the rest to `local`.
fn relocate_initializer(
    program: &mut Program,
    class: ClassId,
    local: ClassId,
    unboxed: &FxHashSet<ClassId>,
    events: &EventLog,
) -> Result<Option<MethodId>> {
    let Some(clinit) = program
        .class(class)
        .methods
        .iter()
        .copied()
        .find(|m| program.method(*m).is_class_initializer())
    else {
        return Ok(None);
    };
    let Some(mut code) = program.method_mut(clinit).code.take() else {
        program.remove_method(clinit);
        return Ok(None);
    };
    let removed = strip_constant_creation(program, class, unboxed, &mut code)?;

    if is_trivial(&code) {
        program.remove_method(clinit);
        return Ok(None);
    }
    program.method_mut(clinit).code = Some(code);
    program.relocate_method(clinit, local);
    events
        .record(EventKind::InitializerRelocated)
        .method(clinit)
        .message(format!(
            "{} -> {} ({removed} creation instruction(s) removed)",
            program.class(class).name,
            program.class(local).name
        ));
    Ok(Some(clinit))
}

/// Replaces each constant instance with its encoding and drops the constructor
/// calls and constant stores. Returns the number of instructions removed.
fn strip_constant_creation(
    program: &Program,
    class: ClassId,
    unboxed: &FxHashSet<ClassId>,
    code: &mut Code,
) -> Result<usize> {
    let constants = constant_fields(program, class);
    let values_field = program.field_by_name(class, "$VALUES");

    let mut ordinal_of: FxHashMap<ValueId, usize> = FxHashMap::default();
    for (_, instr) in code.iter_instrs() {
        if let Instr::StaticPut { field, value } = instr {
            if let Some(ordinal) = constants.iter().position(|c| c == field) {
                ordinal_of.insert(*value, ordinal);
            }
        }
    }

    let before: usize = code.blocks.iter().map(|b| b.instrs.len()).sum();
    for block in &mut code.blocks {
        let mut instrs = Vec::with_capacity(block.instrs.len());
        for instr in block.instrs.drain(..) {
            match instr {
                Instr::NewInstance { dest, class: created } if created == class => {
                    let ordinal = ordinal_of.get(&dest).copied().ok_or_else(|| {
                        internal_error!("instance created in {} is not a constant", program.class(class).name)
                    })?;
                    let encoded = i32::try_from(ordinal + 1)
                        .map_err(|_| internal_error!("ordinal {} does not fit an int", ordinal))?;
                    instrs.push(Instr::Const {
                        dest,
                        value: ConstValue::Int(encoded),
                    });
                }
                Instr::Invoke {
                    callee: Callee::Program(callee),
                    ..
                } if {
                    let def = program.method(callee);
                    def.holder == class && def.is_instance_initializer()
                } => {}
                Instr::StaticPut { field, .. } if constants.contains(&field) || Some(field) == values_field => {}
                other => instrs.push(other),
            }
        }
        block.instrs = instrs;
    }

    // Arrays that only fed `$VALUES`, and reads of other unboxed constants that only fed constructors.
    loop {
        let counts = code.use_counts();
        let unused = |v: &ValueId| counts.get(v).copied().unwrap_or(0) == 0;
        let mut changed = false;
        for block in &mut code.blocks {
            let len = block.instrs.len();
            block.instrs.retain(|instr| match instr {
                Instr::NewArrayFilled { dest, element, .. } => !(unused(dest) && element.base_class() == Some(class)),
                Instr::StaticGet { dest, field } => {
                    let def = program.field(*field);
                    !(unused(dest) && def.flags.contains(FieldFlags::ENUM) && unboxed.contains(&def.holder))
                }
                _ => true,
            });
            changed |= block.instrs.len() != len;
        }
        changed |= code.remove_dead_definitions() > 0;
        if !changed {
            break;
        }
    }
    let after: usize = code.blocks.iter().map(|b| b.instrs.len()).sum();
    Ok(before.saturating_sub(after))
}

fn is_trivial(code: &Code) -> bool {
    code.iter_instrs()
        .all(|(_, instr)| matches!(instr, Instr::Arg { .. } | Instr::Goto { .. } | Instr::Return { value: None }))
}

fn getter_name(program: &Program, local: ClassId, field: &str) -> String {
    let mut chars = field.chars();
    let base = match chars.next() {
        Some(first) => format!("get{}{}", first.to_uppercase(), chars.as_str()),
        None => "get".to_string(),
    };
    let taken = |name: &str| {
        program
            .class(local)
            .methods
            .iter()
            .any(|m| program.method(*m).name == name)
    };
    if !taken(&base) {
        return base;
    }
    (1..)
        .map(|n| format!("{base}${n}"))
        .find(|name| !taken(name))
        .unwrap_or(base)
}

fn declare(program: &mut Program, local: ClassId, name: &str, params: Vec<Type>, ret: Type) -> MethodId {
    program.declare_method(
        local,
        name,
        params,
        ret,
        MethodFlags::PUBLIC | MethodFlags::STATIC | MethodFlags::SYNTHETIC,
    )
}

/// `T m(int v)`: the value for ordinal `v - 1`; throws on 0.
fn table_method(program: &mut Program, local: ClassId, name: &str, ret: Type, values: &[ConstValue]) -> Result<MethodId> {
    let cases = encoded_cases(values.len())?;
    let method = declare(program, local, name, vec![Type::Int], ret);
    let fail = values.len() + 1;
    let code = CodeBuilder::new(program, method).build_with(|f| {
        let v = f.arg(0);
        f.block(0, |b| b.switch(v, &cases, fail));
        for (index, value) in values.iter().enumerate() {
            f.block(index + 1, |b| {
                let result = b.constant(value.clone());
                b.ret_val(result);
            });
        }
        f.block(fail, |b| b.throw_npe());
    });
    program.method_mut(method).code = Some(code);
    Ok(method)
}

/// Switch cases mapping encoded value `i + 1` to block `i + 1`.
fn encoded_cases(count: usize) -> Result<Vec<(i32, usize)>> {
    (1..=count)
        .map(|block| {
            i32::try_from(block)
                .map(|key| (key, block))
                .map_err(|_| internal_error!("{} constants do not fit an int switch", count))
        })
        .collect()
}

/// `String stringValueOf(int v)`: `"null"` for 0, else `toString(v)`.
fn string_value_of_method(program: &mut Program, local: ClassId, to_string: MethodId) -> MethodId {
    let method = declare(program, local, "stringValueOf", vec![Type::Int], Type::String);
    let code = CodeBuilder::new(program, method).build_with(|f| {
        let v = f.arg(0);
        f.block(0, |b| b.if_zero(CmpKind::Eq, v, 1, 2));
        f.block(1, |b| {
            let text = b.const_str("null");
            b.ret_val(text);
        });
        f.block(2, |b| {
            let text = b.call_static(to_string, &[v]);
            b.ret_val(text);
        });
    });
    program.method_mut(method).code = Some(code);
    method
}

/// `int valueOf(String s)` with the exceptions `Enum.valueOf` throws.
fn value_of_method(program: &mut Program, local: ClassId, class: ClassId, names: &[String]) -> MethodId {
    let canonical = program.class(class).canonical_name();
    let method = declare(program, local, "valueOf", vec![Type::String], Type::Int);
    let count = names.len();
    let first_test = 2;
    let first_hit = first_test + count;
    let fail = first_hit + count;
    let code = CodeBuilder::new(program, method).build_with(|f| {
        let s = f.arg(0);
        f.block(0, |b| b.if_zero(CmpKind::Eq, s, 1, first_test));
        f.block(1, |b| {
            let message = b.const_str("Name is null");
            let exception = b.lib(LibraryMethod::NewNullPointerExceptionMessage, &[message]);
            b.throw(exception);
        });
        for (index, name) in names.iter().enumerate() {
            let next = if index + 1 == count { fail } else { first_test + index + 1 };
            f.block(first_test + index, |b| {
                let candidate = b.const_str(name);
                let equal = b.lib(LibraryMethod::StringEquals, &[s, candidate]);
                b.if_zero(CmpKind::Ne, equal, first_hit + index, next);
            });
            f.block(first_hit + index, |b| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                let encoded = b.const_int((index + 1) as i32);
                b.ret_val(encoded);
            });
        }
        f.block(fail, |b| {
            let prefix = b.const_str(&format!("No enum constant {canonical}."));
            let message = b.lib(LibraryMethod::StringConcat, &[prefix, s]);
            let exception = b.lib(LibraryMethod::NewIllegalArgumentException, &[message]);
            b.throw(exception);
        });
    });
    program.method_mut(method).code = Some(code);
    method
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        enums::{collector::collect, fields::map_fields},
        interp::execute,
        program::{KeepPredicate, ProgramBuilder},
    };

    fn plan_of(program: &Program, class: ClassId, reads: &[FieldId]) -> InstanceFieldPlan {
        let candidates = collect(program, &KeepPredicate::none(), &PassPins::new(), &EventLog::new());
        let reads: FxHashSet<FieldId> = reads.iter().copied().collect();
        map_fields(program, &candidates, class, &reads, false, 9).unwrap()
    }

    fn call_and_print(program: &mut Program, target: MethodId, arg: ConstValue) -> Vec<String> {
        let main = program.add_class(ClassDef::new("Main", ClassFlags::PUBLIC)).unwrap();
        let run = program.declare_method(main, "run", vec![], Type::Void, MethodFlags::STATIC);
        let code = CodeBuilder::new(program, run).build_with(|f| {
            f.block(0, |b| {
                let a = b.constant(arg);
                let r = b.call_static(target, &[a]);
                b.println(r);
                b.ret();
            });
        });
        program.method_mut(run).code = Some(code);
        execute(program, run).unwrap().transcript()
    }

    #[test]
    fn test_statics_and_residual_initializer_move() {
        let mut pb = ProgramBuilder::new("test");
        let e = pb
            .enum_class("com.example.Loud")
            .constants(&["A", "B"])
            .clinit_message("initializing")
            .build()
            .unwrap();
        let counter = pb.static_field(e.class, "counter", Type::Int);
        let mut program = pb.build();
        let plan = plan_of(&program, e.class, &[]);
        let unboxed: FxHashSet<ClassId> = [e.class].into_iter().collect();
        let events = EventLog::new();
        let local = synthesize_local_utility(&mut program, e.class, &plan, &unboxed, &PassPins::new(), &events).unwrap();

        assert_eq!(program.field(counter).holder, local.class);
        assert_eq!(program.class(local.class).name, "com.example.Loud$EnumUnboxingLocalUtility");
        let clinit = local.initializer.unwrap();
        assert_eq!(program.method(clinit).holder, local.class);
        let code = program.method(clinit).code.as_ref().unwrap();
        assert!(!code
            .iter_instrs()
            .any(|(_, i)| matches!(i, Instr::NewInstance { .. } | Instr::StaticPut { .. })));
        assert!(events.has(EventKind::InitializerRelocated));
        assert!(events.has(EventKind::FieldRelocated));
    }

    #[test]
    fn test_plain_initializer_is_dropped() {
        let (pb, e) = crate::test::enum_program();
        let mut program = pb.build();
        let plan = plan_of(&program, e.class, &[]);
        let unboxed: FxHashSet<ClassId> = [e.class].into_iter().collect();
        let local =
            synthesize_local_utility(&mut program, e.class, &plan, &unboxed, &PassPins::new(), &EventLog::new()).unwrap();
        assert!(!local.has_initializer());
        assert!(!program.is_live_method(e.clinit));
        assert_eq!(local.name, local.to_string);
    }

    #[test]
    fn test_value_of_emulation() {
        let (pb, e) = crate::test::enum_program();
        let mut program = pb.build();
        let plan = plan_of(&program, e.class, &[]);
        let unboxed: FxHashSet<ClassId> = [e.class].into_iter().collect();
        let local =
            synthesize_local_utility(&mut program, e.class, &plan, &unboxed, &PassPins::new(), &EventLog::new()).unwrap();

        let mut found = program.clone();
        assert_eq!(call_and_print(&mut found, local.value_of, ConstValue::Str("C".into())), vec!["3"]);
        let mut missing = program.clone();
        assert_eq!(
            call_and_print(&mut missing, local.value_of, ConstValue::Str("D".into())),
            vec!["Exception in thread \"main\" java.lang.IllegalArgumentException: No enum constant com.example.MyEnum.D"]
        );
        let mut null = program.clone();
        assert_eq!(
            call_and_print(&mut null, local.value_of, ConstValue::Null),
            vec!["Exception in thread \"main\" java.lang.NullPointerException: Name is null"]
        );
    }

    #[test]
    fn test_name_table_and_string_value_of() {
        let (pb, e) = crate::test::enum_program();
        let mut program = pb.build();
        let plan = plan_of(&program, e.class, &[]);
        let unboxed: FxHashSet<ClassId> = [e.class].into_iter().collect();
        let local =
            synthesize_local_utility(&mut program, e.class, &plan, &unboxed, &PassPins::new(), &EventLog::new()).unwrap();

        let mut named = program.clone();
        assert_eq!(call_and_print(&mut named, local.name, ConstValue::Int(2)), vec!["B"]);
        let mut null = program.clone();
        assert_eq!(call_and_print(&mut null, local.string_value_of, ConstValue::Int(0)), vec!["null"]);
    }

    #[test]
    fn test_table_getter() {
        let mut pb = ProgramBuilder::new("test");
        let e = pb
            .enum_class("com.example.Planet")
            .constants(&["MERCURY", "VENUS"])
            .int_field("mass", &[33, 48])
            .build()
            .unwrap();
        let mut program = pb.build();
        let mass = e.instance_fields[0];
        let plan = plan_of(&program, e.class, &[mass]);
        let unboxed: FxHashSet<ClassId> = [e.class].into_iter().collect();
        let local =
            synthesize_local_utility(&mut program, e.class, &plan, &unboxed, &PassPins::new(), &EventLog::new()).unwrap();
        let getter = local.getters[&mass];
        assert_eq!(program.method(getter).name, "getMass");
        assert_eq!(call_and_print(&mut program, getter, ConstValue::Int(2)), vec!["48"]);
    }
}
