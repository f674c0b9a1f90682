//! Class, field and method definitions.

use std::fmt;

use bitflags::bitflags;

use crate::program::{code::Code, types::Type};

id_type!(
    /// Index of a class in the program arena.
    ClassId
);
id_type!(
    /// Index of a field in the program arena.
    FieldId
);
id_type!(
    /// Index of a method in the program arena.
    MethodId
);

bitflags! {
    /// Access and property flags of a class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassFlags: u16 {
        /// `public`
        const PUBLIC = 0x0001;
        /// `final`
        const FINAL = 0x0010;
        /// `interface`
        const INTERFACE = 0x0200;
        /// `abstract`
        const ABSTRACT = 0x0400;
        /// Compiler generated.
        const SYNTHETIC = 0x1000;
        /// Declared as an enum (also set on constant-specific bodies).
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Access and property flags of a field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldFlags: u16 {
        /// `public`
        const PUBLIC = 0x0001;
        /// `private`
        const PRIVATE = 0x0002;
        /// `static`
        const STATIC = 0x0008;
        /// `final`
        const FINAL = 0x0010;
        /// Compiler generated.
        const SYNTHETIC = 0x1000;
        /// Holds an enum constant.
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Access and property flags of a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u16 {
        /// `public`
        const PUBLIC = 0x0001;
        /// `private`
        const PRIVATE = 0x0002;
        /// `static`
        const STATIC = 0x0008;
        /// `final`
        const FINAL = 0x0010;
        /// Bridge method.
        const BRIDGE = 0x0040;
        /// Takes a trailing varargs array.
        const VARARGS = 0x0080;
        /// `abstract`
        const ABSTRACT = 0x0400;
        /// Compiler generated.
        const SYNTHETIC = 0x1000;
    }
}

/// Marks classes synthesized by an optimization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntheticKind {
    /// Holder of the shared unboxed-enum shim methods.
    SharedEnumUnboxingUtility,
    /// Per-enum holder of tables, relocated statics and the residual initializer.
    EnumUnboxingLocalUtility,
    /// `$SwitchMap$` holder emitted by source compilers for switches over enums.
    SwitchMap,
}

/// A class definition.
#[derive(Debug, Clone)]
pub struct ClassDef {
    /// Fully qualified name using dots, nested classes joined with `$`.
    pub name: String,
    /// Access flags.
    pub flags: ClassFlags,
    /// The direct superclass; [`Type::Object`] for plain classes.
    pub superclass: Type,
    /// Directly implemented interfaces.
    pub interfaces: Vec<Type>,
    /// Declared fields in declaration order.
    pub fields: Vec<FieldId>,
    /// Declared methods in declaration order.
    pub methods: Vec<MethodId>,
    /// Set when the class was produced by a pass.
    pub synthetic: Option<SyntheticKind>,
    /// Annotated as required to be unboxed.
    pub check_enum_unboxed: bool,
    pub(crate) removed: bool,
}

impl ClassDef {
    /// Creates a plain class extending `java.lang.Object`.
    #[must_use]
    pub fn new(name: impl Into<String>, flags: ClassFlags) -> Self {
        Self {
            name: name.into(),
            flags,
            superclass: Type::Object,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            synthetic: None,
            check_enum_unboxed: false,
            removed: false,
        }
    }

    /// Returns true for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }

    /// Returns true for enum classes and constant-specific bodies.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.flags.contains(ClassFlags::ENUM)
    }

    /// Returns the simple name: the part after the last `.` or `$`.
    #[must_use]
    pub fn simple_name(&self) -> &str {
        let start = self
            .name
            .rfind(['.', '$'])
            .map_or(0, |pos| pos + 1);
        &self.name[start..]
    }

    /// Returns the canonical name: nested separators rendered as dots.
    #[must_use]
    pub fn canonical_name(&self) -> String {
        self.name.replace('$', ".")
    }
}

/// A field definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// The declaring class.
    pub holder: ClassId,
    /// Field name.
    pub name: String,
    /// Declared type.
    pub ty: Type,
    /// Access flags.
    pub flags: FieldFlags,
    pub(crate) removed: bool,
}

impl FieldDef {
    /// Returns true for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }
}

/// A method definition.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// The declaring class.
    pub holder: ClassId,
    /// Method name; `<init>` for constructors, `<clinit>` for class initializers.
    pub name: String,
    /// Declared parameter types, excluding the receiver.
    pub params: Vec<Type>,
    /// Return type.
    pub ret: Type,
    /// Access flags.
    pub flags: MethodFlags,
    /// The body, absent for abstract methods.
    pub code: Option<Code>,
    pub(crate) removed: bool,
}

impl MethodDef {
    /// Returns true for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Returns true for `<init>`.
    #[must_use]
    pub fn is_instance_initializer(&self) -> bool {
        self.name == "<init>"
    }

    /// Returns true for `<clinit>`.
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        self.name == "<clinit>"
    }

    /// Returns true for `private` methods, initializers and static methods,
    /// which all dispatch without a virtual lookup.
    #[must_use]
    pub fn is_non_virtual(&self) -> bool {
        self.is_static()
            || self.is_instance_initializer()
            || self.flags.contains(MethodFlags::PRIVATE)
    }

    /// Number of argument values the body sees, including the receiver.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(!self.is_static())
    }

    /// Type of argument `index` as seen by the body, including the receiver.
    #[must_use]
    pub fn arg_type(&self, index: usize) -> Option<Type> {
        if self.is_static() {
            self.params.get(index).cloned()
        } else if index == 0 {
            Some(Type::Class(self.holder))
        } else {
            self.params.get(index - 1).cloned()
        }
    }
}

/// A symbolic method reference, as other passes keep it in their caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodReference {
    /// Fully qualified holder name.
    pub holder: String,
    /// Method name.
    pub name: String,
    /// JVM method descriptor.
    pub descriptor: String,
}

impl fmt::Display for MethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.holder, self.name, self.descriptor)
    }
}

/// A symbolic field reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldReference {
    /// Fully qualified holder name.
    pub holder: String,
    /// Field name.
    pub name: String,
    /// JVM type descriptor.
    pub descriptor: String,
}

impl fmt::Display for FieldReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.holder, self.name, self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names() {
        let class = ClassDef::new("com.example.Outer$MyEnum", ClassFlags::ENUM);
        assert_eq!(class.simple_name(), "MyEnum");
        assert_eq!(class.canonical_name(), "com.example.Outer.MyEnum");

        let top = ClassDef::new("Main", ClassFlags::PUBLIC);
        assert_eq!(top.simple_name(), "Main");
    }

    #[test]
    fn test_method_args() {
        let method = MethodDef {
            holder: ClassId::new(1),
            name: "m".into(),
            params: vec![Type::Int],
            ret: Type::Void,
            flags: MethodFlags::PUBLIC,
            code: None,
            removed: false,
        };
        assert_eq!(method.arg_count(), 2);
        assert_eq!(method.arg_type(0), Some(Type::Class(ClassId::new(1))));
        assert_eq!(method.arg_type(1), Some(Type::Int));
        assert!(!method.is_non_virtual());
    }
}
