//! End-to-end unboxing tests.
//!
//! Each test builds a program with the builder DSL, records what the reference
//! interpreter prints, runs the engine, and checks that:
//! 1. the enums that should be unboxed are, and the others report their reason
//! 2. the rewritten program prints exactly the same transcript
//! 3. nothing in the output still mentions an unboxed enum

use std::sync::Arc;

use enumbox::{enums::InlinerRemapping, prelude::*};

const MY_ENUM: &str = "com.example.MyEnum";

fn transcript(program: &Program, entry: MethodId) -> Vec<String> {
    execute(program, entry).unwrap().transcript()
}

/// Runs the engine and asserts the transcript of `entry` did not change.
fn unbox_preserving(
    program: &mut Program,
    entry: MethodId,
    config: UnboxingConfig,
) -> Result<UnboxingReport> {
    let before = transcript(program, entry);
    let report = EnumUnboxer::new(config).run(program)?;
    assert_eq!(transcript(program, entry), before, "behavior changed:\n{report}");
    Ok(report)
}

fn mentions(program: &Program, class: ClassId) -> bool {
    program.fields().any(|(_, def)| def.ty.base_class() == Some(class))
        || program.methods().any(|(_, def)| {
            def.params
                .iter()
                .chain(std::iter::once(&def.ret))
                .any(|ty| ty.base_class() == Some(class))
                || def
                    .code
                    .as_ref()
                    .is_some_and(|code| code.values.iter().any(|ty| ty.base_class() == Some(class)))
        })
}

fn two_constants() -> Result<(ProgramBuilder, EnumHandle, ClassId)> {
    let mut pb = ProgramBuilder::new("unboxing-tests");
    let e = pb.enum_class(MY_ENUM).constants(&["A", "B"]).build()?;
    let main = pb.class("com.example.Main")?;
    Ok((pb, e, main))
}

#[test]
fn test_null_array_slots() -> Result<()> {
    let (mut pb, e, main) = two_constants()?;
    let run = pb.static_method(main, "main", vec![], Type::Void);
    pb.code(run, |f| {
        f.block(0, |b| {
            let null = b.const_null();
            let a = b.sget(e.constants[0]);
            let bb = b.sget(e.constants[1]);
            let array = b.new_array_filled(e.ty(), &[null, a, null, bb, null]);
            for index in 0..5 {
                let i = b.const_int(index);
                let element = b.aget(array, i);
                let is_null = b.compare(CmpKind::Eq, element, null);
                b.println(is_null);
            }
            b.ret();
        });
    });
    let mut program = pb.build();
    assert_eq!(transcript(&program, run), vec!["true", "false", "true", "false", "true"]);

    let report = unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    assert!(report.is_unboxed(MY_ENUM));
    assert!(!program.is_live_class(e.class));
    assert!(!mentions(&program, e.class));
    Ok(())
}

#[test]
fn test_switch_sentinels() -> Result<()> {
    let mut pb = ProgramBuilder::new("unboxing-tests");
    let e = pb.enum_class(MY_ENUM).constants(&["A", "B", "C"]).build()?;
    let main = pb.class("com.example.Main")?;
    let pick = pb.static_method(main, "pick", vec![e.ty()], Type::Int);
    pb.code(pick, |f| {
        let v = f.arg(0);
        f.block(0, |b| {
            let ordinal = b.lib(LibraryMethod::EnumOrdinal, &[v]);
            b.switch(ordinal, &[(0, 1), (1, 2)], 3);
        });
        f.block(1, |b| {
            let sentinel = b.const_int(0x00C0_FFEE);
            b.ret_val(sentinel);
        });
        f.block(2, |b| {
            let sentinel = b.const_int(0xBABE);
            b.ret_val(sentinel);
        });
        f.block(3, |b| {
            let sentinel = b.const_int(-1);
            b.ret_val(sentinel);
        });
    });
    let run = pb.static_method(main, "main", vec![], Type::Void);
    pb.code(run, |f| {
        f.block(0, |b| {
            for constant in &e.constants {
                let v = b.sget(*constant);
                let result = b.call_static(pick, &[v]);
                b.println(result);
            }
            b.ret();
        });
    });
    let mut program = pb.build();
    assert_eq!(transcript(&program, run), vec!["12648430", "47806", "-1"]);

    let report = unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    assert!(report.is_unboxed(MY_ENUM));
    assert_eq!(program.method_descriptor(pick), "(I)I");
    Ok(())
}

#[test]
fn test_instance_field_collapse() -> Result<()> {
    let mut pb = ProgramBuilder::new("unboxing-tests");
    let e = pb.enum_class(MY_ENUM).constants(&["A", "B"]).int_field("field", &[10, 20]).build()?;
    let main = pb.class("com.example.Main")?;
    let getters: Vec<MethodId> = ["getEnumA", "getEnumB"]
        .iter()
        .zip(&e.constants)
        .map(|(name, constant)| {
            let getter = pb.static_method(main, name, vec![], e.ty());
            pb.code(getter, |f| {
                f.block(0, |b| {
                    let v = b.sget(*constant);
                    b.ret_val(v);
                });
            });
            getter
        })
        .collect();
    let field = e.instance_fields[0];
    let run = pb.static_method(main, "main", vec![], Type::Void);
    pb.code(run, |f| {
        f.block(0, |b| {
            for getter in &getters {
                let v = b.call_static(*getter, &[]);
                let value = b.iget(field, v);
                b.println(value);
            }
            b.ret();
        });
    });
    let mut program = pb.build();
    assert_eq!(transcript(&program, run), vec!["10", "20"]);

    let report = unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    assert!(report.is_unboxed(MY_ENUM));
    assert!(!program.is_live_field(field));
    assert!(program.fields().all(|(_, def)| def.name != "field"));
    assert_eq!(report.local_utilities.len(), 1);
    Ok(())
}

#[test]
fn test_nullable_enum_valued_field() -> Result<()> {
    let mut pb = ProgramBuilder::new("unboxing-tests");
    let inner = pb.enum_class("com.example.Inner").constants(&["X", "Y"]).build()?;
    let outer = pb
        .enum_class("com.example.Outer")
        .constants(&["P", "Q", "R"])
        .nullable_enum_field("inner", &inner, &[Some(0), None, Some(1)])
        .build()?;
    let main = pb.class("com.example.Main")?;
    let field = outer.instance_fields[0];
    let run = pb.static_method(main, "main", vec![], Type::Void);
    pb.code(run, |f| {
        f.block(0, |b| {
            let null = b.const_null();
            for constant in &outer.constants {
                let v = b.sget(*constant);
                let value = b.iget(field, v);
                let is_null = b.compare(CmpKind::Eq, value, null);
                b.println(is_null);
            }
            b.ret();
        });
    });
    let mut program = pb.build();
    assert_eq!(transcript(&program, run), vec!["false", "true", "false"]);

    let report = unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    assert!(report.is_unboxed("com.example.Outer"));
    assert!(report.is_unboxed("com.example.Inner"));
    Ok(())
}

fn many_fields(count: usize) -> Result<(Program, MethodId)> {
    let mut pb = ProgramBuilder::new("unboxing-tests");
    let names: Vec<String> = (0..count).map(|i| format!("f{i}")).collect();
    let mut builder = pb.enum_class(MY_ENUM).constants(&["A", "B"]);
    for (i, name) in names.iter().enumerate() {
        let i = i32::try_from(i).unwrap_or(0);
        builder = builder.int_field(name, &[100 + i, 200 + i]);
    }
    let e = builder.build()?;
    let main = pb.class("com.example.Main")?;
    let run = pb.static_method(main, "main", vec![], Type::Void);
    let fields = e.instance_fields.clone();
    pb.code(run, |f| {
        f.block(0, |b| {
            let v = b.sget(e.constants[1]);
            for field in &fields {
                let value = b.iget(*field, v);
                b.println(value);
            }
            b.ret();
        });
    });
    Ok((pb.build(), run))
}

#[test]
fn test_too_many_retained_fields() -> Result<()> {
    let (mut program, run) = many_fields(10)?;
    let report = unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    assert_eq!(report.reason(MY_ENUM), Some(BoxingReason::TooManyFields));

    let (mut program, run) = many_fields(9)?;
    let report = unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    assert!(report.is_unboxed(MY_ENUM));

    let (mut program, run) = many_fields(9)?;
    let config = UnboxingConfig::testing().with_max_retained_instance_fields(8);
    let report = unbox_preserving(&mut program, run, config)?;
    assert_eq!(report.reason(MY_ENUM), Some(BoxingReason::TooManyFields));
    Ok(())
}

fn value_of_program(name: Option<&str>) -> Result<(Program, MethodId)> {
    let (mut pb, e, main) = two_constants()?;
    let run = pb.static_method(main, "main", vec![], Type::Void);
    pb.code(run, |f| {
        f.block(0, |b| {
            let arg = match name {
                Some(name) => b.const_str(name),
                None => b.const_null(),
            };
            let found = b.call_static(e.value_of_method, &[arg]);
            let ordinal = b.lib(LibraryMethod::EnumOrdinal, &[found]);
            b.println(ordinal);
            b.ret();
        });
    });
    Ok((pb.build(), run))
}

#[test]
fn test_value_of_exceptions() -> Result<()> {
    let (mut program, run) = value_of_program(Some("B"))?;
    unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    assert_eq!(transcript(&program, run), vec!["1"]);

    let (mut program, run) = value_of_program(Some("D"))?;
    unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    assert_eq!(
        transcript(&program, run),
        vec!["Exception in thread \"main\" java.lang.IllegalArgumentException: No enum constant com.example.MyEnum.D"]
    );

    let (mut program, run) = value_of_program(None)?;
    unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    assert_eq!(
        transcript(&program, run),
        vec!["Exception in thread \"main\" java.lang.NullPointerException: Name is null"]
    );
    Ok(())
}

#[test]
fn test_equality_and_ordering() -> Result<()> {
    let mut pb = ProgramBuilder::new("unboxing-tests");
    let e = pb.enum_class(MY_ENUM).constants(&["A", "B", "C"]).build()?;
    let main = pb.class("com.example.Main")?;
    let unset = pb.static_field(main, "unset", e.ty());
    let run = pb.static_method(main, "main", vec![], Type::Void);
    pb.code(run, |f| {
        f.block(0, |b| {
            let values: Vec<ValueId> = e.constants.iter().map(|c| b.sget(*c)).collect();
            for x in &values {
                for y in &values {
                    let cmp = b.lib(LibraryMethod::EnumCompareTo, &[*x, *y]);
                    b.println(cmp);
                    let eq = b.lib(LibraryMethod::EnumEquals, &[*x, *y]);
                    b.println(eq);
                }
            }
            let null = b.const_null();
            let eq_null = b.lib(LibraryMethod::EnumEquals, &[values[0], null]);
            b.println(eq_null);
            let missing = b.sget(unset);
            let npe = b.lib(LibraryMethod::EnumEquals, &[missing, values[0]]);
            b.println(npe);
            b.ret();
        });
    });
    let mut program = pb.build();
    let before = transcript(&program, run);
    assert_eq!(before.last().map(String::as_str), Some("Exception in thread \"main\" java.lang.NullPointerException"));

    let report = unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    assert!(report.is_unboxed(MY_ENUM));
    Ok(())
}

#[test]
fn test_values_not_aliased() -> Result<()> {
    let mut pb = ProgramBuilder::new("unboxing-tests");
    let e = pb.enum_class(MY_ENUM).constants(&["A", "B", "C"]).build()?;
    let main = pb.class("com.example.Main")?;
    let run = pb.static_method(main, "main", vec![], Type::Void);
    pb.code(run, |f| {
        f.block(0, |b| {
            let first = b.call_static(e.values_method, &[]);
            let second = b.call_static(e.values_method, &[]);
            let zero = b.const_int(0);
            let c = b.sget(e.constants[2]);
            b.aput(first, zero, c);
            let mutated = b.aget(first, zero);
            b.println(mutated);
            let untouched = b.aget(second, zero);
            b.println(untouched);
            b.ret();
        });
    });
    let mut program = pb.build();
    assert_eq!(transcript(&program, run), vec!["C", "A"]);
    let report = unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    assert!(report.is_unboxed(MY_ENUM));
    Ok(())
}

#[test]
fn test_check_enum_unboxed_failure() -> Result<()> {
    let mut pb = ProgramBuilder::new("unboxing-tests");
    let e = pb.enum_class(MY_ENUM).constants(&["A"]).check_unboxed().build()?;
    let main = pb.class("com.example.Main")?;
    let sink = pb.static_field(main, "sink", Type::Object);
    let run = pb.static_method(main, "main", vec![], Type::Void);
    pb.code(run, |f| {
        f.block(0, |b| {
            let a = b.sget(e.constants[0]);
            b.sput(sink, a);
            b.ret();
        });
    });
    let mut program = pb.build();
    let error = EnumUnboxer::new(UnboxingConfig::default()).run(&mut program).unwrap_err();
    assert!(matches!(error, Error::CheckEnumUnboxed { .. }));
    assert_eq!(
        error.to_string(),
        "Enum unboxing checks failed.\nEnum com.example.MyEnum was not unboxed."
    );
    Ok(())
}

#[test]
fn test_debug_logs_list_both_sides() -> Result<()> {
    let mut pb = ProgramBuilder::new("unboxing-tests");
    let kept = pb.enum_class("com.example.Escaping").constants(&["X"]).build()?;
    let free = pb.enum_class("com.example.Free").constants(&["Y"]).build()?;
    let main = pb.class("com.example.Main")?;
    let sink = pb.static_field(main, "sink", Type::Object);
    let run = pb.static_method(main, "main", vec![], Type::Void);
    pb.code(run, |f| {
        f.block(0, |b| {
            let x = b.sget(kept.constants[0]);
            b.sput(sink, x);
            let y = b.sget(free.constants[0]);
            b.println(y);
            b.ret();
        });
    });
    let mut program = pb.build();
    let report = unbox_preserving(&mut program, run, UnboxingConfig::testing())?;
    let infos = report.events.info_messages();
    assert!(infos.contains(&"Unboxed enums: {com.example.Free}"));
    assert!(infos.contains(&"Boxed enums: {com.example.Escaping}"));
    assert_eq!(
        report.status("com.example.Escaping"),
        Some(CandidateStatus::Boxed(BoxingReason::ObjectEscape))
    );
    assert!(report.events.has(EventKind::CandidateBoxed));

    let mut quiet = program.clone();
    let report = EnumUnboxer::new(UnboxingConfig::default()).run(&mut quiet)?;
    assert!(report.events.info_messages().iter().all(|m| !m.starts_with("Unboxed enums")));
    Ok(())
}

#[test]
fn test_collaborator_follows_signature_change() -> Result<()> {
    let (mut pb, e, main) = two_constants()?;
    let take = pb.static_method(main, "take", vec![e.ty()], Type::Void);
    pb.code(take, |f| {
        let v = f.arg(0);
        f.block(0, |b| {
            b.println(v);
            b.ret();
        });
    });
    let run = pb.static_method(main, "main", vec![], Type::Void);
    pb.code(run, |f| {
        f.block(0, |b| {
            let a = b.sget(e.constants[1]);
            b.call_static_void(take, &[a]);
            b.ret();
        });
    });
    let mut program = pb.build();
    let caller = program.method_reference(run);
    let callee = program.method_reference(take);
    let inliner = Arc::new(InlinerRemapping::new());
    inliner.bind(caller.clone(), callee.clone());

    let before = transcript(&program, run);
    let report = EnumUnboxer::new(UnboxingConfig::testing())
        .with_listener(inliner.clone())
        .run(&mut program)?;
    assert_eq!(transcript(&program, run), before);

    let rebound = inliner.callee(&caller).unwrap();
    assert_eq!(rebound, program.method_reference(take));
    assert_eq!(rebound.descriptor, "(I)V");
    assert!(report
        .records
        .iter()
        .any(|r| matches!(r, RewriteRecord::Method { old, .. } if *old == callee)));
    Ok(())
}
