//! Candidate collection.
//!
//! Every live class that directly extends `java.lang.Enum` becomes a candidate.
//! Class-level facts that rule a candidate out before any code is examined are
//! applied here: empty enums, keep rules, constant-specific bodies and methods
//! other passes promised never to inline. A pinned member of another class whose
//! signature mentions an enum also pins that enum, since the signature cannot
//! change.

use std::iter;

use crate::{
    enums::{candidate::CandidateSet, reason::BoxingReason, usesite::candidate_of},
    events::{EventKind, EventLog},
    program::{ClassId, FieldFlags, FieldId, KeepPredicate, KeepTarget, LibraryType, MethodId, PassPins, Program, Type},
};

/// Returns true for classes declared as enums, excluding constant-specific bodies.
#[must_use]
pub fn is_enum_declaration(program: &Program, class: ClassId) -> bool {
    let def = program.class(class);
    def.is_enum() && !def.is_interface() && def.superclass == Type::Library(LibraryType::Enum)
}

/// Returns the constant fields of an enum in declaration order.
#[must_use]
pub fn constant_fields(program: &Program, class: ClassId) -> Vec<FieldId> {
    program
        .class(class)
        .fields
        .iter()
        .copied()
        .filter(|f| {
            let field = program.field(*f);
            field.is_static() && field.flags.contains(FieldFlags::ENUM)
        })
        .collect()
}

/// Returns true for the compiler-generated `values()` and `valueOf(String)`.
pub(crate) fn is_canonical_member(program: &Program, method: MethodId) -> bool {
    let def = program.method(method);
    let holder = Type::Class(def.holder);
    match def.name.as_str() {
        "values" => def.is_static() && def.params.is_empty() && def.ret == Type::array_of(holder),
        "valueOf" => def.is_static() && def.params == [Type::String] && def.ret == holder,
        _ => false,
    }
}

/// Collects enum candidates and applies class-level exclusions.
#[must_use]
pub fn collect(program: &Program, keep: &KeepPredicate, pins: &PassPins, events: &EventLog) -> CandidateSet {
    let mut set = CandidateSet::new();
    for (class, def) in program.classes() {
        if !is_enum_declaration(program, class) {
            continue;
        }
        let count = constant_fields(program, class).len();
        set.insert(class, def.name.clone(), count);
        events
            .record(EventKind::CandidateCollected)
            .class(class)
            .phase("collect")
            .message(format!("{} ({count} constants)", def.name));
    }

    let classes: Vec<ClassId> = set.iter().map(|c| c.class).collect();
    for class in classes {
        if let Some(reason) = class_level_reason(program, keep, pins, class, &set) {
            demote(&mut set, class, reason, None, events);
        }
    }
    pin_signatures(program, keep, &mut set, events);
    set
}

fn pin_signatures(program: &Program, keep: &KeepPredicate, set: &mut CandidateSet, events: &EventLog) {
    let mut pinned: Vec<(ClassId, String)> = Vec::new();
    for (method, def) in program.methods() {
        if set.contains(def.holder) || !keep.pins(KeepTarget::Method(method)) {
            continue;
        }
        for ty in def.params.iter().chain(iter::once(&def.ret)) {
            if let Some(class) = candidate_of(set, ty) {
                pinned.push((class, program.method_reference(method).to_string()));
            }
        }
    }
    for (field, def) in program.fields() {
        if set.contains(def.holder) || !keep.pins(KeepTarget::Field(field)) {
            continue;
        }
        if let Some(class) = candidate_of(set, &def.ty) {
            pinned.push((class, program.field_reference(field).to_string()));
        }
    }
    for (class, site) in pinned {
        demote(set, class, BoxingReason::ExplicitlyKept, Some(site), events);
    }
}

fn class_level_reason(
    program: &Program,
    keep: &KeepPredicate,
    pins: &PassPins,
    class: ClassId,
    set: &CandidateSet,
) -> Option<BoxingReason> {
    let def = program.class(class);
    if set.lookup(class).is_some_and(|c| c.ordinal_count == 0) {
        return Some(BoxingReason::EmptyEnum);
    }
    if keep.pins(KeepTarget::Class(class))
        || def.fields.iter().any(|f| keep.pins(KeepTarget::Field(*f)))
        || def
            .methods
            .iter()
            .any(|m| keep.pins(KeepTarget::Method(*m)) && !is_canonical_member(program, *m))
    {
        return Some(BoxingReason::ExplicitlyKept);
    }
    if !program.direct_subclasses(class).is_empty() {
        return Some(BoxingReason::Subtypes);
    }
    let pinned_body = def.methods.iter().any(|m| {
        let method = program.method(*m);
        pins.is_never_inline(*m)
            && method.code.is_some()
            && !method.is_instance_initializer()
            && !method.is_class_initializer()
    });
    if pinned_body {
        return Some(BoxingReason::RemainingMethodBody);
    }
    None
}

/// Boxes a candidate and logs the demotion.
pub(crate) fn demote(
    set: &mut CandidateSet,
    class: ClassId,
    reason: BoxingReason,
    site: Option<String>,
    events: &EventLog,
) -> bool {
    let message = match &site {
        Some(site) => format!("{reason} at {site}"),
        None => reason.to_string(),
    };
    if !set.box_candidate(class, reason, site) {
        return false;
    }
    let name = set.lookup(class).map(|c| c.name.clone()).unwrap_or_default();
    events
        .record(EventKind::CandidateBoxed)
        .class(class)
        .phase("analyze")
        .message(format!("{name}: {message}"));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{enums::candidate::CandidateStatus, program::ProgramBuilder, test::enum_program};

    #[test]
    fn test_collects_declarations_only() {
        let mut pb = ProgramBuilder::new("test");
        let with_body = pb
            .enum_class("com.example.Op")
            .constants(&["PLUS", "MINUS"])
            .constant_body(1)
            .build()
            .unwrap();
        let program = pb.build();
        let events = EventLog::new();
        let set = collect(&program, &KeepPredicate::none(), &PassPins::new(), &events);

        assert_eq!(set.len(), 1);
        assert_eq!(
            set.lookup(with_body.class).map(|c| c.status),
            Some(CandidateStatus::Boxed(BoxingReason::Subtypes))
        );
        assert_eq!(events.count_kind(EventKind::CandidateCollected), 1);
        assert_eq!(events.count_kind(EventKind::CandidateBoxed), 1);
    }

    #[test]
    fn test_empty_enum_boxed() {
        let mut pb = ProgramBuilder::new("test");
        let empty = pb.enum_class("com.example.Empty").build().unwrap();
        let program = pb.build();
        let set = collect(&program, &KeepPredicate::none(), &PassPins::new(), &EventLog::new());
        assert_eq!(
            set.lookup(empty.class).map(|c| c.status),
            Some(CandidateStatus::Boxed(BoxingReason::EmptyEnum))
        );
    }

    #[test]
    fn test_keep_rules() {
        let (pb, handle) = enum_program();
        let program = pb.build();

        let values_only = KeepPredicate::builder()
            .keep_method(handle.values_method)
            .keep_method(handle.value_of_method)
            .build();
        let set = collect(&program, &values_only, &PassPins::new(), &EventLog::new());
        assert!(set.is_unboxable(handle.class));

        let class_kept = KeepPredicate::builder().keep_class(handle.class).build();
        let set = collect(&program, &class_kept, &PassPins::new(), &EventLog::new());
        assert_eq!(
            set.lookup(handle.class).map(|c| c.status),
            Some(CandidateStatus::Boxed(BoxingReason::ExplicitlyKept))
        );

        let relaxed = KeepPredicate::builder()
            .keep(
                KeepTarget::Class(handle.class),
                crate::program::KeepFlags::ALLOW_OPTIMIZATION,
            )
            .build();
        let set = collect(&program, &relaxed, &PassPins::new(), &EventLog::new());
        assert!(set.is_unboxable(handle.class));
    }

    #[test]
    fn test_kept_signature_pins_enum() {
        let (mut pb, handle) = enum_program();
        let main = pb.class("Main").unwrap();
        let api = pb.static_method(main, "api", vec![handle.ty()], Type::Void);
        pb.code(api, |f| f.block(0, |b| b.ret()));
        let program = pb.build();

        let keep = KeepPredicate::builder().keep_method(api).build();
        let set = collect(&program, &keep, &PassPins::new(), &EventLog::new());
        let candidate = set.lookup(handle.class).unwrap();
        assert_eq!(candidate.status, CandidateStatus::Boxed(BoxingReason::ExplicitlyKept));
        assert!(candidate.boxed_at.as_deref().is_some_and(|s| s.contains("Main.api")));
    }

    #[test]
    fn test_never_inline_pin() {
        let (pb, handle) = enum_program();
        let program = pb.build();
        let pins = PassPins::new();
        pins.never_inline.insert(handle.values_method);
        let set = collect(&program, &KeepPredicate::none(), &pins, &EventLog::new());
        assert_eq!(
            set.lookup(handle.class).map(|c| c.status),
            Some(CandidateStatus::Boxed(BoxingReason::RemainingMethodBody))
        );
    }
}
