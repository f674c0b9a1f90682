//! Whole-program intermediate representation.
//!
//! The unboxing engine consumes a closed-world [`Program`]: every class, field and
//! method is stored in an arena indexed by a stable integer id. Removing an item
//! leaves a tombstone, so ids handed out before a pass stay valid after it.
//!
//! # Architecture
//!
//! ```text
//! Program
//! ├── classes: [ClassDef]  ── superclass / interfaces : Type
//! │                        ── fields  : [FieldId]
//! │                        ── methods : [MethodId]
//! ├── fields:  [FieldDef]  ── holder, name, ty, flags
//! └── methods: [MethodDef] ── holder, name, params, ret, flags
//!                          └── code: Code ── blocks: [Block { phis, instrs }]
//!                                         └── values: [Type]
//! ```
//!
//! # Key Components
//!
//! - [`Program`] - The arenas plus name lookup and member resolution
//! - [`types`] - [`Type`] and descriptor rendering
//! - [`code`] - SSA bodies: [`Code`], [`Block`], [`Instr`], [`Phi`]
//! - [`library`] - The modeled library surface, [`LibraryMethod`]
//! - [`keep`] - Keep-rule predicates and cross-pass pins
//! - [`builder`] - Closure-based construction DSL

pub mod builder;
pub mod code;
pub mod item;
pub mod keep;
pub mod library;
pub mod types;

pub use builder::{
    BlockBuilder, CodeBuilder, EnumClassBuilder, EnumHandle, FunctionContext, ProgramBuilder,
};
pub use code::{
    BinaryOp, Block, BlockId, Callee, CmpKind, Code, ConstValue, DefSite, Instr, InvokeKind,
    Phi, ValueId,
};
pub use item::{
    ClassDef, ClassFlags, ClassId, FieldDef, FieldFlags, FieldId, FieldReference, MethodDef,
    MethodFlags, MethodId, MethodReference, SyntheticKind,
};
pub use keep::{KeepFlags, KeepPredicate, KeepTarget, PassPins};
pub use library::LibraryMethod;
pub use types::{method_descriptor, LibraryType, Type};

use rustc_hash::FxHashMap;

use crate::{Error, Result};

/// A closed-world program: classes, fields and methods with their bodies.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Identity of the artifact this program is compiled into.
    pub artifact: String,
    pub(crate) classes: Vec<ClassDef>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) methods: Vec<MethodDef>,
    by_name: FxHashMap<String, ClassId>,
}

impl Program {
    /// Creates an empty program compiled into `artifact`.
    #[must_use]
    pub fn new(artifact: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
            ..Self::default()
        }
    }

    // ── Lookup ─────────────────────────────────────────────────────────

    /// Returns the class with the given id.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this program.
    #[must_use]
    pub fn class(&self, id: ClassId) -> &ClassDef {
        &self.classes[id.index()]
    }

    /// Returns the class with the given id mutably.
    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassDef {
        &mut self.classes[id.index()]
    }

    /// Returns the field with the given id.
    #[must_use]
    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.index()]
    }

    /// Returns the field with the given id mutably.
    pub fn field_mut(&mut self, id: FieldId) -> &mut FieldDef {
        &mut self.fields[id.index()]
    }

    /// Returns the method with the given id.
    #[must_use]
    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.index()]
    }

    /// Returns the method with the given id mutably.
    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodDef {
        &mut self.methods[id.index()]
    }

    /// Returns true if the class has not been removed.
    #[must_use]
    pub fn is_live_class(&self, id: ClassId) -> bool {
        self.classes.get(id.index()).is_some_and(|c| !c.removed)
    }

    /// Returns true if the field has not been removed.
    #[must_use]
    pub fn is_live_field(&self, id: FieldId) -> bool {
        self.fields.get(id.index()).is_some_and(|f| !f.removed)
    }

    /// Returns true if the method has not been removed.
    #[must_use]
    pub fn is_live_method(&self, id: MethodId) -> bool {
        self.methods.get(id.index()).is_some_and(|m| !m.removed)
    }

    /// Iterates over live classes.
    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &ClassDef)> {
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.removed)
            .map(|(i, c)| (ClassId::from_usize(i), c))
    }

    /// Iterates over live methods.
    pub fn methods(&self) -> impl Iterator<Item = (MethodId, &MethodDef)> {
        self.methods
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.removed)
            .map(|(i, m)| (MethodId::from_usize(i), m))
    }

    /// Iterates over live fields.
    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &FieldDef)> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.removed)
            .map(|(i, f)| (FieldId::from_usize(i), f))
    }

    /// Returns the ids of live methods with a body.
    #[must_use]
    pub fn methods_with_code(&self) -> Vec<MethodId> {
        self.methods()
            .filter(|(_, m)| m.code.is_some())
            .map(|(id, _)| id)
            .collect()
    }

    /// Finds a live class by fully qualified name.
    #[must_use]
    pub fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.by_name
            .get(name)
            .copied()
            .filter(|id| self.is_live_class(*id))
    }

    /// Finds a live class by name or fails with [`Error::UnknownClass`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownClass`] if no live class has this name.
    pub fn require_class(&self, name: &str) -> Result<ClassId> {
        self.class_by_name(name)
            .ok_or_else(|| Error::UnknownClass(name.to_string()))
    }

    /// Finds a declared field by name.
    #[must_use]
    pub fn field_by_name(&self, class: ClassId, name: &str) -> Option<FieldId> {
        self.class(class)
            .fields
            .iter()
            .copied()
            .find(|id| self.is_live_field(*id) && self.field(*id).name == name)
    }

    /// Finds a declared method by name; the first match wins for overloads.
    #[must_use]
    pub fn method_by_name(&self, class: ClassId, name: &str) -> Option<MethodId> {
        self.class(class)
            .methods
            .iter()
            .copied()
            .find(|id| self.is_live_method(*id) && self.method(*id).name == name)
    }

    /// Finds a declared method by name or fails with [`Error::UnknownMember`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMember`] if the class declares no live method of that name.
    pub fn require_method(&self, class: ClassId, name: &str) -> Result<MethodId> {
        self.method_by_name(class, name).ok_or_else(|| {
            Error::UnknownMember(format!("{}.{}", self.class(class).name, name))
        })
    }

    /// Finds a declared method by name and descriptor.
    #[must_use]
    pub fn declared_method(&self, class: ClassId, name: &str, descriptor: &str) -> Option<MethodId> {
        self.class(class).methods.iter().copied().find(|id| {
            self.is_live_method(*id)
                && self.method(*id).name == name
                && self.method_descriptor(*id) == descriptor
        })
    }

    // ── References and descriptors ─────────────────────────────────────

    /// Renders the descriptor of a method.
    #[must_use]
    pub fn method_descriptor(&self, id: MethodId) -> String {
        let method = self.method(id);
        method_descriptor(self, &method.params, &method.ret)
    }

    /// Returns the symbolic reference of a method.
    #[must_use]
    pub fn method_reference(&self, id: MethodId) -> MethodReference {
        let method = self.method(id);
        MethodReference {
            holder: self.class(method.holder).name.clone(),
            name: method.name.clone(),
            descriptor: self.method_descriptor(id),
        }
    }

    /// Returns the symbolic reference of a field.
    #[must_use]
    pub fn field_reference(&self, id: FieldId) -> FieldReference {
        let field = self.field(id);
        FieldReference {
            holder: self.class(field.holder).name.clone(),
            name: field.name.clone(),
            descriptor: field.ty.descriptor(self),
        }
    }

    /// Resolves a symbolic method reference against live members.
    #[must_use]
    pub fn resolve_method_reference(&self, reference: &MethodReference) -> Option<MethodId> {
        let class = self.class_by_name(&reference.holder)?;
        self.resolve_method(class, &reference.name, &reference.descriptor)
    }

    /// Resolves a symbolic field reference against live members.
    #[must_use]
    pub fn resolve_field_reference(&self, reference: &FieldReference) -> Option<FieldId> {
        let class = self.class_by_name(&reference.holder)?;
        let field = self.field_by_name(class, &reference.name)?;
        (self.field(field).ty.descriptor(self) == reference.descriptor).then_some(field)
    }

    // ── Hierarchy ──────────────────────────────────────────────────────

    /// Returns the program superclass of `class`, if it has one.
    #[must_use]
    pub fn superclass(&self, class: ClassId) -> Option<ClassId> {
        match self.class(class).superclass {
            Type::Class(id) => Some(id),
            _ => None,
        }
    }

    /// Returns true if `sub` is `sup` or inherits from it (classes and interfaces).
    #[must_use]
    pub fn is_subtype_of(&self, sub: ClassId, sup: ClassId) -> bool {
        if sub == sup {
            return true;
        }
        let class = self.class(sub);
        let parents = std::iter::once(&class.superclass).chain(class.interfaces.iter());
        for parent in parents {
            if let Type::Class(parent) = parent {
                if self.is_subtype_of(*parent, sup) {
                    return true;
                }
            }
        }
        false
    }

    /// Returns true if `sub` has the library type `lib` among its ancestors.
    #[must_use]
    pub fn inherits_library(&self, sub: ClassId, lib: LibraryType) -> bool {
        let class = self.class(sub);
        let parents = std::iter::once(&class.superclass).chain(class.interfaces.iter());
        for parent in parents {
            match parent {
                Type::Library(l) if *l == lib => return true,
                Type::Class(parent) if self.inherits_library(*parent, lib) => return true,
                _ => {}
            }
        }
        false
    }

    /// Returns the live direct subclasses of `class`.
    #[must_use]
    pub fn direct_subclasses(&self, class: ClassId) -> Vec<ClassId> {
        self.classes()
            .filter(|(_, c)| c.superclass == Type::Class(class))
            .map(|(id, _)| id)
            .collect()
    }

    /// Resolves a method by name and descriptor, searching the class, its
    /// superclasses and then its interfaces.
    #[must_use]
    pub fn resolve_method(&self, class: ClassId, name: &str, descriptor: &str) -> Option<MethodId> {
        let mut current = Some(class);
        while let Some(id) = current {
            if let Some(found) = self.declared_method(id, name, descriptor) {
                return Some(found);
            }
            current = self.superclass(id);
        }
        self.resolve_interface_method(class, name, descriptor)
    }

    fn resolve_interface_method(&self, class: ClassId, name: &str, descriptor: &str) -> Option<MethodId> {
        let mut current = Some(class);
        while let Some(id) = current {
            for interface in &self.class(id).interfaces {
                if let Type::Class(interface) = interface {
                    if let Some(found) = self.declared_method(*interface, name, descriptor) {
                        return Some(found);
                    }
                    if let Some(found) = self.resolve_interface_method(*interface, name, descriptor)
                    {
                        return Some(found);
                    }
                }
            }
            current = self.superclass(id);
        }
        None
    }

    /// Finds the method body a virtual call on an instance of `class` dispatches to.
    #[must_use]
    pub fn dispatch(&self, class: ClassId, name: &str, descriptor: &str) -> Option<MethodId> {
        let mut current = Some(class);
        while let Some(id) = current {
            if let Some(found) = self.declared_method(id, name, descriptor) {
                if self.method(found).code.is_some() {
                    return Some(found);
                }
            }
            current = self.superclass(id);
        }
        self.resolve_interface_method(class, name, descriptor)
            .filter(|found| self.method(*found).code.is_some())
    }

    // ── Mutation ───────────────────────────────────────────────────────

    /// Adds a class and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateClass`] if a live class already has this name.
    pub fn add_class(&mut self, class: ClassDef) -> Result<ClassId> {
        if self.class_by_name(&class.name).is_some() {
            return Err(Error::DuplicateClass(class.name));
        }
        let name = class.name.clone();
        let id = push_arena!(self.classes, ClassId, class);
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Adds a field to `holder` and returns its id.
    pub fn add_field(&mut self, holder: ClassId, name: impl Into<String>, ty: Type, flags: FieldFlags) -> FieldId {
        let field = FieldDef {
            holder,
            name: name.into(),
            ty,
            flags,
            removed: false,
        };
        let id = push_arena!(self.fields, FieldId, field);
        self.class_mut(holder).fields.push(id);
        id
    }

    /// Adds a method to its holder and returns its id.
    pub fn add_method(&mut self, method: MethodDef) -> MethodId {
        let holder = method.holder;
        let id = push_arena!(self.methods, MethodId, method);
        self.class_mut(holder).methods.push(id);
        id
    }

    /// Declares a method without a body.
    pub fn declare_method(
        &mut self,
        holder: ClassId,
        name: impl Into<String>,
        params: Vec<Type>,
        ret: Type,
        flags: MethodFlags,
    ) -> MethodId {
        self.add_method(MethodDef {
            holder,
            name: name.into(),
            params,
            ret,
            flags,
            code: None,
            removed: false,
        })
    }

    /// Moves a field to another class, keeping its id.
    pub fn relocate_field(&mut self, field: FieldId, to: ClassId) {
        let from = self.field(field).holder;
        self.class_mut(from).fields.retain(|f| *f != field);
        self.class_mut(to).fields.push(field);
        self.field_mut(field).holder = to;
    }

    /// Moves a method to another class, keeping its id.
    pub fn relocate_method(&mut self, method: MethodId, to: ClassId) {
        let from = self.method(method).holder;
        self.class_mut(from).methods.retain(|m| *m != method);
        self.class_mut(to).methods.push(method);
        self.method_mut(method).holder = to;
    }

    /// Removes a method, leaving a tombstone.
    pub fn remove_method(&mut self, id: MethodId) {
        let holder = self.method(id).holder;
        self.class_mut(holder).methods.retain(|m| *m != id);
        let method = self.method_mut(id);
        method.removed = true;
        method.code = None;
    }

    /// Removes a field, leaving a tombstone.
    pub fn remove_field(&mut self, id: FieldId) {
        let holder = self.field(id).holder;
        self.class_mut(holder).fields.retain(|f| *f != id);
        self.field_mut(id).removed = true;
    }

    /// Removes a class together with all of its members.
    pub fn remove_class(&mut self, id: ClassId) {
        for method in self.class(id).methods.clone() {
            self.remove_method(method);
        }
        for field in self.class(id).fields.clone() {
            self.remove_field(field);
        }
        let name = self.class(id).name.clone();
        self.class_mut(id).removed = true;
        if self.by_name.get(&name) == Some(&id) {
            self.by_name.remove(&name);
        }
    }

    /// Renames a class, keeping its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateClass`] if another live class already has `name`.
    pub fn rename_class(&mut self, id: ClassId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.class_by_name(&name).is_some_and(|other| other != id) {
            return Err(Error::DuplicateClass(name));
        }
        let old = std::mem::replace(&mut self.class_mut(id).name, name.clone());
        self.by_name.remove(&old);
        self.by_name.insert(name, id);
        Ok(())
    }

    /// Returns a name not used by any live class, derived from `base`.
    #[must_use]
    pub fn fresh_class_name(&self, base: &str) -> String {
        if self.class_by_name(base).is_none() {
            return base.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}${n}");
            if self.class_by_name(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Appends the classes of `other` to this program.
    ///
    /// This models feeding an artifact produced by an earlier compilation round
    /// into a later one. Synthetic classes whose names collide are renamed;
    /// any other name collision is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateClass`] if a non-synthetic class of `other` collides
    /// with a live class of this program.
    pub fn merge(&mut self, other: Program) -> Result<()> {
        let class_base = self.classes.len();
        let field_base = self.fields.len();
        let method_base = self.methods.len();
        let remap = IdRemap {
            class_base,
            field_base,
            method_base,
        };

        for (index, mut class) in other.classes.into_iter().enumerate() {
            remap.class_def(&mut class);
            if !class.removed && self.class_by_name(&class.name).is_some() {
                if class.synthetic.is_none() {
                    return Err(Error::DuplicateClass(class.name));
                }
                class.name = self.fresh_class_name(&class.name);
            }
            let id = ClassId::from_usize(class_base + index);
            if !class.removed {
                self.by_name.insert(class.name.clone(), id);
            }
            self.classes.push(class);
        }
        for mut field in other.fields {
            field.holder = remap.class(field.holder);
            field.ty = remap.ty(&field.ty);
            self.fields.push(field);
        }
        for mut method in other.methods {
            method.holder = remap.class(method.holder);
            method.params = method.params.iter().map(|t| remap.ty(t)).collect();
            method.ret = remap.ty(&method.ret);
            if let Some(code) = method.code.as_mut() {
                remap.code(code);
            }
            self.methods.push(method);
        }
        Ok(())
    }
}

/// Offsets applied to the ids of a merged program.
struct IdRemap {
    class_base: usize,
    field_base: usize,
    method_base: usize,
}

impl IdRemap {
    fn class(&self, id: ClassId) -> ClassId {
        ClassId::from_usize(self.class_base + id.index())
    }

    fn field(&self, id: FieldId) -> FieldId {
        FieldId::from_usize(self.field_base + id.index())
    }

    fn method(&self, id: MethodId) -> MethodId {
        MethodId::from_usize(self.method_base + id.index())
    }

    fn ty(&self, ty: &Type) -> Type {
        match ty {
            Type::Class(id) => Type::Class(self.class(*id)),
            Type::Array(element) => Type::array_of(self.ty(element)),
            other => other.clone(),
        }
    }

    fn class_def(&self, class: &mut ClassDef) {
        class.superclass = self.ty(&class.superclass);
        class.interfaces = class.interfaces.iter().map(|t| self.ty(t)).collect();
        class.fields = class.fields.iter().map(|f| self.field(*f)).collect();
        class.methods = class.methods.iter().map(|m| self.method(*m)).collect();
    }

    fn code(&self, code: &mut Code) {
        for ty in &mut code.values {
            *ty = self.ty(ty);
        }
        for block in &mut code.blocks {
            for instr in &mut block.instrs {
                match instr {
                    Instr::Const {
                        value: ConstValue::Class(ty),
                        ..
                    }
                    | Instr::NewArray { element: ty, .. }
                    | Instr::NewMultiArray { ty, .. }
                    | Instr::NewArrayFilled { element: ty, .. }
                    | Instr::CheckCast { ty, .. }
                    | Instr::InstanceOf { ty, .. } => *ty = self.ty(ty),
                    Instr::StaticGet { field, .. }
                    | Instr::StaticPut { field, .. }
                    | Instr::InstanceGet { field, .. }
                    | Instr::InstancePut { field, .. } => *field = self.field(*field),
                    Instr::NewInstance { class, .. } | Instr::InitClass { class } => {
                        *class = self.class(*class);
                    }
                    Instr::Invoke {
                        callee: Callee::Program(method),
                        ..
                    } => *method = self.method(*method),
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_classes() -> (Program, ClassId, ClassId) {
        let mut program = Program::new("test");
        let base = program
            .add_class(ClassDef::new("com.example.Base", ClassFlags::PUBLIC))
            .unwrap();
        let mut derived = ClassDef::new("com.example.Derived", ClassFlags::PUBLIC);
        derived.superclass = Type::Class(base);
        let derived = program.add_class(derived).unwrap();
        (program, base, derived)
    }

    #[test]
    fn test_resolve_through_superclass() {
        let (mut program, base, derived) = two_classes();
        let m = program.declare_method(base, "m", vec![Type::Int], Type::Void, MethodFlags::PUBLIC);
        let descriptor = program.method_descriptor(m);
        assert_eq!(descriptor, "(I)V");
        assert_eq!(program.resolve_method(derived, "m", &descriptor), Some(m));
        assert!(program.is_subtype_of(derived, base));
        assert!(!program.is_subtype_of(base, derived));
        // Abstract declarations are not dispatch targets.
        assert_eq!(program.dispatch(derived, "m", &descriptor), None);
    }

    #[test]
    fn test_remove_class_tombstones_members() {
        let (mut program, base, _) = two_classes();
        let f = program.add_field(base, "f", Type::Int, FieldFlags::STATIC);
        let m = program.declare_method(base, "m", vec![], Type::Void, MethodFlags::STATIC);
        program.remove_class(base);
        assert!(!program.is_live_class(base));
        assert!(!program.is_live_field(f));
        assert!(!program.is_live_method(m));
        assert_eq!(program.class_by_name("com.example.Base"), None);
        assert_eq!(program.classes().count(), 1);
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let (mut program, _, _) = two_classes();
        let result = program.add_class(ClassDef::new("com.example.Base", ClassFlags::PUBLIC));
        assert!(matches!(result, Err(Error::DuplicateClass(_))));
    }

    #[test]
    fn test_merge_remaps_ids() {
        let (mut first, _, _) = two_classes();
        let mut second = Program::new("lib");
        let holder = second
            .add_class(ClassDef::new("com.lib.Holder", ClassFlags::PUBLIC))
            .unwrap();
        let f = second.add_field(holder, "f", Type::Class(holder), FieldFlags::STATIC);
        first.merge(second).unwrap();

        let merged = first.require_class("com.lib.Holder").unwrap();
        assert_eq!(merged.index(), 2);
        let field = first.field_by_name(merged, "f").unwrap();
        assert_eq!(field.index(), f.index());
        assert_eq!(first.field(field).ty, Type::Class(merged));
    }

    #[test]
    fn test_merge_renames_colliding_synthetics() {
        let mut first = Program::new("a");
        let mut util = ClassDef::new("Util", ClassFlags::SYNTHETIC);
        util.synthetic = Some(SyntheticKind::SharedEnumUnboxingUtility);
        first.add_class(util.clone()).unwrap();
        let mut second = Program::new("b");
        second.add_class(util).unwrap();
        first.merge(second).unwrap();
        assert!(first.class_by_name("Util").is_some());
        assert!(first.class_by_name("Util$1").is_some());
    }
}
