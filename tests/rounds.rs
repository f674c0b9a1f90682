//! Multi-round compilation: a library is unboxed on its own, then linked into
//! an application that is unboxed again. The application round must reuse the
//! library's shared utility class instead of adding a second one.

use enumbox::{enums::registered_shared_utility, prelude::*, program::SyntheticKind};

fn transcript(program: &Program, entry: MethodId) -> Vec<String> {
    execute(program, entry).unwrap().transcript()
}

fn shared_utilities(program: &Program) -> Vec<String> {
    program
        .classes()
        .filter(|(_, def)| def.synthetic == Some(SyntheticKind::SharedEnumUnboxingUtility))
        .map(|(_, def)| def.name.clone())
        .collect()
}

/// Library with `enum Level { LOW, HIGH }` and `Api.run(Level)` printing the ordinal.
///
/// The ordinal of an argument of unknown nullness needs the shared `ordinal` shim.
fn library(artifact: &str) -> Result<(Program, MethodId)> {
    let mut pb = ProgramBuilder::new(artifact);
    let level = pb.enum_class("com.lib.Level").constants(&["LOW", "HIGH"]).build()?;
    let api = pb.class("com.lib.Api")?;
    let run = pb.static_method(api, "run", vec![level.ty()], Type::Void);
    pb.code(run, |f| {
        let v = f.arg(0);
        f.block(0, |b| {
            let ordinal = b.lib(LibraryMethod::EnumOrdinal, &[v]);
            b.println(ordinal);
            b.ret();
        });
    });
    let demo = pb.static_method(api, "demo", vec![], Type::Void);
    pb.code(demo, |f| {
        f.block(0, |b| {
            for constant in &level.constants {
                let v = b.sget(*constant);
                b.call_static_void(run, &[v]);
            }
            b.ret();
        });
    });
    Ok((pb.build(), demo))
}

/// Adds `enum Mode { ON, OFF }` and `Main.main` calling `demo` to `pb`.
fn application(pb: &mut ProgramBuilder, demo: MethodId) -> Result<MethodId> {
    let mode = pb.enum_class("com.app.Mode").constants(&["ON", "OFF"]).build()?;
    let main = pb.class("com.app.Main")?;
    let show = pb.static_method(main, "show", vec![mode.ty()], Type::Void);
    pb.code(show, |f| {
        let v = f.arg(0);
        f.block(0, |b| {
            let ordinal = b.lib(LibraryMethod::EnumOrdinal, &[v]);
            b.println(ordinal);
            b.ret();
        });
    });
    let entry = pb.static_method(main, "main", vec![], Type::Void);
    pb.code(entry, |f| {
        f.block(0, |b| {
            b.call_static_void(demo, &[]);
            let on = b.sget(mode.constants[0]);
            let off = b.sget(mode.constants[1]);
            b.call_static_void(show, &[off]);
            let same = b.lib(LibraryMethod::EnumEquals, &[on, off]);
            b.println(same);
            b.ret();
        });
    });
    Ok(entry)
}

#[test]
fn test_second_round_reuses_library_utility() -> Result<()> {
    let (mut program, demo) = library("rounds-lib")?;
    let expected_lib = transcript(&program, demo);
    let report = EnumUnboxer::new(UnboxingConfig::testing()).run(&mut program)?;
    assert!(report.is_unboxed("com.lib.Level"));
    assert_eq!(transcript(&program, demo), expected_lib);

    let first = shared_utilities(&program);
    assert_eq!(first, vec!["com.lib.Level$EnumUnboxingSharedUtility".to_string()]);
    assert_eq!(registered_shared_utility("rounds-lib"), first.first().cloned());

    let mut pb = ProgramBuilder::from_program(program);
    pb.program_mut().artifact = "rounds-app".into();
    let entry = application(&mut pb, demo)?;
    let mut program = pb.build();
    let expected_app = transcript(&program, entry);
    assert_eq!(expected_app, vec!["0", "1", "1", "false"]);

    let report = EnumUnboxer::new(UnboxingConfig::testing()).run(&mut program)?;
    assert!(report.is_unboxed("com.app.Mode"));
    assert_eq!(transcript(&program, entry), expected_app);
    assert_eq!(shared_utilities(&program), first);
    assert!(report.events.has(EventKind::UtilityReused));
    assert!(!report.events.has(EventKind::UtilitySynthesized));
    Ok(())
}

#[test]
fn test_merged_library_utility_is_reused() -> Result<()> {
    let (mut library, _) = library("rounds-merge-lib")?;
    EnumUnboxer::new(UnboxingConfig::default()).run(&mut library)?;
    let utility = shared_utilities(&library);
    assert_eq!(utility.len(), 1);

    let mut program = Program::new("rounds-merge-app");
    program.merge(library)?;
    let api = program.require_class("com.lib.Api")?;
    let demo = program.require_method(api, "demo")?;

    let mut pb = ProgramBuilder::from_program(program);
    let entry = application(&mut pb, demo)?;
    let mut program = pb.build();
    let expected = transcript(&program, entry);

    let report = EnumUnboxer::new(UnboxingConfig::default()).run(&mut program)?;
    assert!(report.is_unboxed("com.app.Mode"));
    assert_eq!(transcript(&program, entry), expected);
    assert_eq!(shared_utilities(&program), utility);
    Ok(())
}

#[test]
fn test_fresh_program_synthesizes_its_own_utility() -> Result<()> {
    let mut pb = ProgramBuilder::new("rounds-fresh");
    let entry = {
        let mode = pb.enum_class("com.app.Mode").constants(&["ON"]).build()?;
        let main = pb.class("com.app.Main")?;
        let show = pb.static_method(main, "show", vec![mode.ty()], Type::Void);
        pb.code(show, |f| {
            let v = f.arg(0);
            f.block(0, |b| {
                let ordinal = b.lib(LibraryMethod::EnumOrdinal, &[v]);
                b.println(ordinal);
                b.ret();
            });
        });
        let entry = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(entry, |f| {
            f.block(0, |b| {
                let on = b.sget(mode.constants[0]);
                b.call_static_void(show, &[on]);
                b.ret();
            });
        });
        entry
    };
    let mut program = pb.build();
    let report = EnumUnboxer::new(UnboxingConfig::default()).run(&mut program)?;
    assert_eq!(transcript(&program, entry), vec!["0"]);
    assert!(report.events.has(EventKind::UtilitySynthesized));
    assert_eq!(
        shared_utilities(&program),
        vec!["com.app.Mode$EnumUnboxingSharedUtility".to_string()]
    );
    Ok(())
}
