//! Signature rewriting.
//!
//! Every method and field outside the unboxed enums whose signature mentions one
//! of them is retyped to `int` (at the same array depth). A retyped method may
//! collide with an existing overload: `m(E)` and `m(int)` would both become
//! `m(int)`. Colliding methods are renamed `m$enumunboxing$<n>`. All methods
//! sharing a name and original descriptor get the same new name, so overrides
//! keep overriding each other. Constructors cannot be renamed and get extra
//! trailing `int` parameters instead; their callers pass `0`.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    events::{EventKind, EventLog},
    program::{
        method_descriptor, ClassId, FieldId, FieldReference, MethodId, MethodReference, Program, Type,
    },
};

/// Infix of names given to colliding methods.
pub const RENAME_INFIX: &str = "$enumunboxing$";

/// Returns `ty` with an unboxed enum base replaced by `int`, or `None` if unaffected.
#[must_use]
pub fn unboxed_type(ty: &Type, unboxed: &FxHashSet<ClassId>) -> Option<Type> {
    ty.base_class()
        .filter(|class| unboxed.contains(class))
        .map(|_| Type::array_dims(Type::Int, ty.dimensions()))
}

/// One retyped method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodChange {
    /// The method.
    pub method: MethodId,
    /// Its reference before rewriting.
    pub old: MethodReference,
    /// Its reference after rewriting.
    pub new: MethodReference,
}

/// One retyped field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// The field.
    pub field: FieldId,
    /// Its reference before rewriting.
    pub old: FieldReference,
    /// Its reference after rewriting.
    pub new: FieldReference,
}

/// Everything [`rewrite_signatures`] changed.
#[derive(Debug, Clone, Default)]
pub struct SignatureChanges {
    /// Retyped or renamed methods.
    pub methods: Vec<MethodChange>,
    /// Retyped fields.
    pub fields: Vec<FieldChange>,
    /// Constructors that received extra `int` parameters, with the count.
    pub extra_args: FxHashMap<MethodId, usize>,
}

impl SignatureChanges {
    /// Returns the number of trailing `0` arguments callers of `method` must pass.
    #[must_use]
    pub fn extra_args(&self, method: MethodId) -> usize {
        self.extra_args.get(&method).copied().unwrap_or(0)
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.fields.is_empty()
    }
}

struct Pending {
    method: MethodId,
    holder: ClassId,
    name: String,
    old_descriptor: String,
    new_descriptor: String,
    params: Vec<Type>,
    ret: Type,
}

/// Signatures already claimed, by name and descriptor.
#[derive(Default)]
struct Claimed {
    holders: FxHashMap<(String, String), Vec<ClassId>>,
}

impl Claimed {
    fn claim(&mut self, holder: ClassId, name: &str, descriptor: &str) {
        self.holders
            .entry((name.to_string(), descriptor.to_string()))
            .or_default()
            .push(holder);
    }

    /// True if a class related to `holder` by inheritance already declares the signature.
    fn conflicts(&self, program: &Program, holder: ClassId, name: &str, descriptor: &str) -> bool {
        self.holders
            .get(&(name.to_string(), descriptor.to_string()))
            .is_some_and(|holders| {
                holders
                    .iter()
                    .any(|h| program.is_subtype_of(holder, *h) || program.is_subtype_of(*h, holder))
            })
    }

    /// True if `holder` itself declares the signature.
    fn declares(&self, holder: ClassId, name: &str, descriptor: &str) -> bool {
        self.holders
            .get(&(name.to_string(), descriptor.to_string()))
            .is_some_and(|holders| holders.contains(&holder))
    }
}

/// Retypes the signatures of every member that mentions an unboxed enum.
pub fn rewrite_signatures(program: &mut Program, unboxed: &FxHashSet<ClassId>, events: &EventLog) -> SignatureChanges {
    let mut changes = SignatureChanges::default();
    let mut claimed = Claimed::default();
    let mut pending: Vec<Pending> = Vec::new();

    for (id, def) in program.methods() {
        if unboxed.contains(&def.holder) {
            continue;
        }
        let params: Vec<Type> = def
            .params
            .iter()
            .map(|p| unboxed_type(p, unboxed).unwrap_or_else(|| p.clone()))
            .collect();
        let ret = unboxed_type(&def.ret, unboxed).unwrap_or_else(|| def.ret.clone());
        let old_descriptor = program.method_descriptor(id);
        if params == def.params && ret == def.ret {
            claimed.claim(def.holder, &def.name, &old_descriptor);
            continue;
        }
        pending.push(Pending {
            method: id,
            holder: def.holder,
            name: def.name.clone(),
            old_descriptor,
            new_descriptor: method_descriptor(program, &params, &ret),
            params,
            ret,
        });
    }
    pending.sort_by(|a, b| {
        (&a.name, &a.old_descriptor, &program.class(a.holder).name).cmp(&(
            &b.name,
            &b.old_descriptor,
            &program.class(b.holder).name,
        ))
    });

    // Same (name, old descriptor) => same new name.
    let mut assigned: Vec<(MethodId, String, Vec<Type>)> = Vec::with_capacity(pending.len());
    let mut start = 0;
    while start < pending.len() {
        let key = (&pending[start].name, &pending[start].old_descriptor);
        let end = pending[start..]
            .iter()
            .position(|p| (&p.name, &p.old_descriptor) != key)
            .map_or(pending.len(), |offset| start + offset);
        let group = &pending[start..end];

        if group[0].name == "<init>" {
            for ctor in group {
                let mut params = ctor.params.clone();
                let mut descriptor = ctor.new_descriptor.clone();
                let mut extra = 0;
                while claimed.declares(ctor.holder, "<init>", &descriptor) {
                    extra += 1;
                    params.push(Type::Int);
                    descriptor = method_descriptor(program, &params, &ctor.ret);
                }
                claimed.claim(ctor.holder, "<init>", &descriptor);
                if extra > 0 {
                    changes.extra_args.insert(ctor.method, extra);
                }
                assigned.push((ctor.method, "<init>".to_string(), params));
            }
        } else {
            let base = &group[0].name;
            let fixed = group[0].name.starts_with('<');
            let name = (0..)
                .map(|n| if n == 0 { base.clone() } else { format!("{base}{RENAME_INFIX}{n}") })
                .find(|candidate| {
                    fixed
                        || group
                            .iter()
                            .all(|p| !claimed.conflicts(program, p.holder, candidate, &p.new_descriptor))
                })
                .unwrap_or_else(|| base.clone());
            for method in group {
                claimed.claim(method.holder, &name, &method.new_descriptor);
                assigned.push((method.method, name.clone(), method.params.clone()));
            }
        }
        start = end;
    }

    let rets: FxHashMap<MethodId, Type> = pending.iter().map(|p| (p.method, p.ret.clone())).collect();
    for (method, name, params) in assigned {
        let old = program.method_reference(method);
        let def = program.method_mut(method);
        def.name = name;
        def.params = params;
        if let Some(ret) = rets.get(&method) {
            def.ret = ret.clone();
        }
        let new = program.method_reference(method);
        events
            .record(EventKind::SignatureChanged)
            .method(method)
            .phase("rewrite")
            .message(format!("{old} -> {new}"));
        changes.methods.push(MethodChange { method, old, new });
    }

    let fields: Vec<(FieldId, Type)> = program
        .fields()
        .filter(|(_, def)| !unboxed.contains(&def.holder))
        .filter_map(|(id, def)| unboxed_type(&def.ty, unboxed).map(|ty| (id, ty)))
        .collect();
    for (field, ty) in fields {
        let old = program.field_reference(field);
        program.field_mut(field).ty = ty;
        let new = program.field_reference(field);
        events
            .record(EventKind::FieldTypeChanged)
            .class(program.field(field).holder)
            .phase("rewrite")
            .message(format!("{old} -> {new}"));
        changes.fields.push(FieldChange { field, old, new });
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{program::MethodFlags, test::enum_program};

    fn unboxed(class: ClassId) -> FxHashSet<ClassId> {
        [class].into_iter().collect()
    }

    #[test]
    fn test_unboxed_type_keeps_dimensions() {
        let (_pb, e) = enum_program();
        let set = unboxed(e.class);
        assert_eq!(unboxed_type(&e.ty(), &set), Some(Type::Int));
        assert_eq!(
            unboxed_type(&Type::array_dims(e.ty(), 2), &set),
            Some(Type::array_dims(Type::Int, 2))
        );
        assert_eq!(unboxed_type(&Type::String, &set), None);
    }

    #[test]
    fn test_plain_retype_keeps_name() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let m = pb.static_method(main, "describe", vec![e.ty()], Type::array_of(e.ty()));
        let field = pb.static_field(main, "last", e.ty());
        let mut program = pb.build();
        let events = EventLog::new();
        let changes = rewrite_signatures(&mut program, &unboxed(e.class), &events);

        assert_eq!(program.method(m).name, "describe");
        assert_eq!(program.method_descriptor(m), "(I)[I");
        assert_eq!(program.field(field).ty, Type::Int);
        assert_eq!(changes.methods.len(), 1);
        assert_eq!(changes.methods[0].old.descriptor, "(Lcom/example/MyEnum;)[Lcom/example/MyEnum;");
        assert_eq!(changes.fields[0].new.descriptor, "I");
        assert!(events.has(EventKind::SignatureChanged));
        assert!(events.has(EventKind::FieldTypeChanged));
    }

    #[test]
    fn test_collision_renames_override_group() {
        let (mut pb, e) = enum_program();
        let base = pb.class("Base").unwrap();
        let sub = pb.class("Sub").unwrap();
        pb.program_mut().class_mut(sub).superclass = Type::Class(base);
        let boxed = pb.virtual_method(base, "m", vec![e.ty()], Type::Void);
        let int = pb.virtual_method(base, "m", vec![Type::Int], Type::Void);
        let overriding = pb.virtual_method(sub, "m", vec![e.ty()], Type::Void);
        let unrelated = pb.class("Unrelated").unwrap();
        let alone = pb.virtual_method(unrelated, "m", vec![Type::Long], Type::Void);
        let mut program = pb.build();
        rewrite_signatures(&mut program, &unboxed(e.class), &EventLog::new());

        assert_eq!(program.method(boxed).name, "m$enumunboxing$1");
        assert_eq!(program.method(overriding).name, "m$enumunboxing$1");
        assert_eq!(program.method(int).name, "m");
        assert_eq!(program.method(alone).name, "m");
    }

    #[test]
    fn test_constructor_collision_adds_parameters() {
        let (mut pb, e) = enum_program();
        let holder = pb.class("Holder").unwrap();
        let flags = MethodFlags::PUBLIC;
        let boxed = pb.method(holder, "<init>", vec![e.ty()], Type::Void, flags);
        let int = pb.method(holder, "<init>", vec![Type::Int], Type::Void, flags);
        let mut program = pb.build();
        let changes = rewrite_signatures(&mut program, &unboxed(e.class), &EventLog::new());

        assert_eq!(program.method_descriptor(boxed), "(II)V");
        assert_eq!(program.method_descriptor(int), "(I)V");
        assert_eq!(changes.extra_args(boxed), 1);
        assert_eq!(changes.extra_args(int), 0);
    }

    #[test]
    fn test_enum_members_untouched() {
        let (pb, e) = enum_program();
        let mut program = pb.build();
        let changes = rewrite_signatures(&mut program, &unboxed(e.class), &EventLog::new());
        assert!(changes.is_empty());
        assert_eq!(program.field(e.constants[0]).ty, e.ty());
    }
}
