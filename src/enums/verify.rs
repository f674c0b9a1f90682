//! Post-rewrite verification.
//!
//! Two checks run after rewriting:
//!
//! - every live body may only reference live classes, fields and methods;
//! - the bodies the rewriter produced may not feed a reference into an `int`
//!   slot or an `int` into a reference slot.
//!
//! Failures are [`Error::TypeCheck`] unless
//! [`UnboxingConfig::allow_type_errors`] downgrades them to warnings.

use crate::{
    enums::{config::UnboxingConfig, rewriter::operand_slot_types},
    events::EventLog,
    program::{Callee, Code, ConstValue, Instr, MethodId, Program, Type},
    Error, Result,
};

/// One verification failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Method the failure was found in.
    pub method: String,
    /// What is wrong.
    pub message: String,
}

fn mismatched(slot: &Type, value: &Type) -> bool {
    (*slot == Type::Int && value.is_reference()) || (slot.is_reference() && *value == Type::Int)
}

fn dangling_type(program: &Program, ty: &Type) -> Option<String> {
    ty.base_class()
        .filter(|class| !program.is_live_class(*class))
        .map(|class| format!("type {} was removed", program.class(class).name))
}

/// References to removed members in one body.
fn dangling(program: &Program, code: &Code) -> Vec<String> {
    let mut found = Vec::new();
    for ty in &code.values {
        if let Some(message) = dangling_type(program, ty) {
            found.push(message);
            break;
        }
    }
    for (_, instr) in code.iter_instrs() {
        let message = match instr {
            Instr::StaticGet { field, .. }
            | Instr::StaticPut { field, .. }
            | Instr::InstanceGet { field, .. }
            | Instr::InstancePut { field, .. } => (!program.is_live_field(*field))
                .then(|| format!("NoSuchFieldError: {}", program.field_reference(*field))),
            Instr::Invoke {
                callee: Callee::Program(method),
                ..
            } => (!program.is_live_method(*method))
                .then(|| format!("NoSuchMethodError: {}", program.method_reference(*method))),
            Instr::NewInstance { class, .. } | Instr::InitClass { class } => (!program.is_live_class(*class))
                .then(|| format!("class {} was removed", program.class(*class).name)),
            Instr::Const {
                value: ConstValue::Class(ty),
                ..
            }
            | Instr::CheckCast { ty, .. }
            | Instr::InstanceOf { ty, .. }
            | Instr::NewMultiArray { ty, .. }
            | Instr::NewArray { element: ty, .. }
            | Instr::NewArrayFilled { element: ty, .. } => dangling_type(program, ty),
            _ => None,
        };
        found.extend(message);
    }
    found
}

/// Slot mismatches in one body.
fn mismatches(program: &Program, method: MethodId, code: &Code) -> Vec<String> {
    let def = program.method(method);
    let mut found = Vec::new();
    for (block, body) in code.iter_blocks() {
        for phi in &body.phis {
            let slot = code.ty(phi.dest);
            for (_, value) in &phi.operands {
                if mismatched(slot, code.ty(*value)) {
                    found.push(format!("b{block}: phi {} receives {}", phi.dest, value));
                }
            }
        }
        for instr in &body.instrs {
            let operands = instr.operands();
            if let Instr::Compare { lhs, rhs, .. }
            | Instr::If {
                lhs, rhs: Some(rhs), ..
            } = instr
            {
                let (l, r) = (code.ty(*lhs), code.ty(*rhs));
                if mismatched(l, r) || mismatched(r, l) {
                    found.push(format!("b{block}: {} compared with {}", l.display(program), r.display(program)));
                }
                continue;
            }
            for (slot, value) in operand_slot_types(program, def, code, instr).iter().zip(&operands) {
                let Some(slot) = slot else {
                    continue;
                };
                if mismatched(slot, code.ty(*value)) {
                    found.push(format!(
                        "b{block}: {} passed where {} is expected in `{}`",
                        code.ty(*value).display(program),
                        slot.display(program),
                        instr.display(program)
                    ));
                }
            }
        }
    }
    found
}

/// Collects every violation without applying the configured policy.
#[must_use]
pub fn violations(program: &Program, rewritten: &[MethodId]) -> Vec<Violation> {
    let mut result = Vec::new();
    for method in program.methods_with_code() {
        let Some(code) = program.method(method).code.as_ref() else {
            continue;
        };
        let mut messages = dangling(program, code);
        if rewritten.contains(&method) {
            messages.extend(mismatches(program, method, code));
        }
        let name = program.method_reference(method).to_string();
        result.extend(messages.into_iter().map(|message| Violation {
            method: name.clone(),
            message,
        }));
    }
    result
}

/// Verifies the program after rewriting.
///
/// Returns the number of violations downgraded to warnings.
///
/// # Errors
///
/// Returns [`Error::TypeCheck`] for the first violation unless
/// [`UnboxingConfig::allow_type_errors`] is set.
pub fn verify(program: &Program, rewritten: &[MethodId], config: &UnboxingConfig, events: &EventLog) -> Result<usize> {
    let found = violations(program, rewritten);
    if !config.allow_type_errors {
        if let Some(first) = found.into_iter().next() {
            return Err(Error::TypeCheck {
                method: first.method,
                message: first.message,
            });
        }
        return Ok(0);
    }
    for violation in &found {
        events.warn(format!("type error in {}: {}", violation.method, violation.message));
    }
    Ok(found.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::enum_program;

    #[test]
    fn test_removed_class_is_dangling() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let run = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let a = b.sget(e.constants[0]);
                b.println(a);
                b.ret();
            });
        });
        let mut program = pb.build();
        let events = EventLog::new();
        assert_eq!(verify(&program, &[], &UnboxingConfig::default(), &events).unwrap(), 0);

        program.remove_class(e.class);
        let error = verify(&program, &[], &UnboxingConfig::default(), &events).unwrap_err();
        assert!(matches!(error, Error::TypeCheck { ref method, .. } if method.starts_with("Main.main")));

        let mut relaxed = UnboxingConfig::default();
        relaxed.allow_type_errors = true;
        assert!(verify(&program, &[], &relaxed, &events).unwrap() >= 1);
        assert!(events.warnings().next().is_some());
    }

    #[test]
    fn test_null_in_int_slot_only_checked_when_rewritten() {
        let (mut pb, _) = enum_program();
        let main = pb.class("Main").unwrap();
        let take = pb.static_method(main, "take", vec![Type::Int], Type::Void);
        pb.code(take, |f| {
            f.block(0, |b| b.ret());
        });
        let run = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let null = b.const_null();
                b.call_static_void(take, &[null]);
                b.ret();
            });
        });
        let program = pb.build();
        assert!(violations(&program, &[]).is_empty());
        let found = violations(&program, &[run]);
        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("expected"));
    }
}
