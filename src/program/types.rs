//! Static types of the program IR.
//!
//! Every SSA value, field and method parameter carries exactly one [`Type`]. Program
//! classes are referenced by [`ClassId`]; the handful of runtime-library classes the
//! engine cares about are modeled by [`LibraryType`].

use std::fmt;

use strum::{Display, EnumIter, IntoStaticStr};

use crate::program::{ClassId, Program};

/// Library classes that program code can mention by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum LibraryType {
    /// `java.lang.Enum`
    #[strum(serialize = "java.lang.Enum")]
    Enum,
    /// `java.lang.Comparable`
    #[strum(serialize = "java.lang.Comparable")]
    Comparable,
    /// `java.io.Serializable`
    #[strum(serialize = "java.io.Serializable")]
    Serializable,
    /// `java.lang.Class`
    #[strum(serialize = "java.lang.Class")]
    Class,
    /// `java.lang.Throwable`
    #[strum(serialize = "java.lang.Throwable")]
    Throwable,
    /// `java.util.EnumSet`
    #[strum(serialize = "java.util.EnumSet")]
    EnumSet,
    /// `java.util.EnumMap`
    #[strum(serialize = "java.util.EnumMap")]
    EnumMap,
}

impl LibraryType {
    /// Returns the JVM internal name (slashes instead of dots).
    #[must_use]
    pub fn internal_name(self) -> String {
        let name: &'static str = self.into();
        name.replace('.', "/")
    }
}

/// The static type of a value, field or method parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value (method returns only).
    Void,
    /// `boolean`
    Boolean,
    /// `int`
    Int,
    /// `long`
    Long,
    /// `double`
    Double,
    /// The type of the `null` constant; assignable to every reference type.
    Null,
    /// `java.lang.Object`
    Object,
    /// `java.lang.String`
    String,
    /// A class defined in the program.
    Class(ClassId),
    /// A modeled library class.
    Library(LibraryType),
    /// An array of the element type.
    Array(Box<Type>),
}

impl Type {
    /// Creates an array type with the given element.
    #[must_use]
    pub fn array_of(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    /// Creates an array type of `dims` dimensions over `base`.
    #[must_use]
    pub fn array_dims(base: Type, dims: usize) -> Type {
        let mut ty = base;
        for _ in 0..dims {
            ty = Type::array_of(ty);
        }
        ty
    }

    /// Returns true for reference types, including `null` and arrays.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Type::Null
                | Type::Object
                | Type::String
                | Type::Class(_)
                | Type::Library(_)
                | Type::Array(_)
        )
    }

    /// Returns true for `boolean`, `int`, `long` and `double`.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Boolean | Type::Int | Type::Long | Type::Double)
    }

    /// Returns the element type if this is an array.
    #[must_use]
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Returns the innermost element type of an array, or the type itself.
    #[must_use]
    pub fn base(&self) -> &Type {
        let mut ty = self;
        while let Type::Array(element) = ty {
            ty = element;
        }
        ty
    }

    /// Returns the number of array dimensions.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        let mut dims = 0;
        let mut ty = self;
        while let Type::Array(element) = ty {
            dims += 1;
            ty = element;
        }
        dims
    }

    /// Returns the program class at the base of this type, if any.
    #[must_use]
    pub fn base_class(&self) -> Option<ClassId> {
        match self.base() {
            Type::Class(id) => Some(*id),
            _ => None,
        }
    }

    /// Replaces the base class `from` with `to`, keeping array dimensions.
    ///
    /// Returns `None` if the base of this type is not `from`.
    #[must_use]
    pub fn substitute_base(&self, from: ClassId, to: &Type) -> Option<Type> {
        match self.base() {
            Type::Class(id) if *id == from => Some(Type::array_dims(to.clone(), self.dimensions())),
            _ => None,
        }
    }

    /// Renders the JVM descriptor of this type.
    #[must_use]
    pub fn descriptor(&self, program: &Program) -> String {
        let mut out = String::new();
        self.write_descriptor(program, &mut out);
        out
    }

    pub(crate) fn write_descriptor(&self, program: &Program, out: &mut String) {
        match self {
            Type::Void => out.push('V'),
            Type::Boolean => out.push('Z'),
            Type::Int => out.push('I'),
            Type::Long => out.push('J'),
            Type::Double => out.push('D'),
            Type::Null | Type::Object => out.push_str("Ljava/lang/Object;"),
            Type::String => out.push_str("Ljava/lang/String;"),
            Type::Class(id) => {
                out.push('L');
                out.push_str(&program.class(*id).name.replace('.', "/"));
                out.push(';');
            }
            Type::Library(lib) => {
                out.push('L');
                out.push_str(&lib.internal_name());
                out.push(';');
            }
            Type::Array(element) => {
                out.push('[');
                element.write_descriptor(program, out);
            }
        }
    }

    /// Returns a displayable form resolving class names through `program`.
    #[must_use]
    pub fn display<'a>(&'a self, program: &'a Program) -> TypeDisplay<'a> {
        TypeDisplay { ty: self, program }
    }
}

/// Helper returned by [`Type::display`].
pub struct TypeDisplay<'a> {
    ty: &'a Type,
    program: &'a Program,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Type::Void => f.write_str("void"),
            Type::Boolean => f.write_str("boolean"),
            Type::Int => f.write_str("int"),
            Type::Long => f.write_str("long"),
            Type::Double => f.write_str("double"),
            Type::Null => f.write_str("null"),
            Type::Object => f.write_str("java.lang.Object"),
            Type::String => f.write_str("java.lang.String"),
            Type::Class(id) => f.write_str(&self.program.class(*id).name),
            Type::Library(lib) => write!(f, "{lib}"),
            Type::Array(element) => write!(f, "{}[]", element.display(self.program)),
        }
    }
}

/// Builds a method descriptor such as `(Ljava/lang/String;I)V`.
#[must_use]
pub fn method_descriptor(program: &Program, params: &[Type], ret: &Type) -> String {
    let mut out = String::from("(");
    for param in params {
        param.write_descriptor(program, &mut out);
    }
    out.push(')');
    ret.write_descriptor(program, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_helpers() {
        let ty = Type::array_dims(Type::Int, 2);
        assert_eq!(ty.dimensions(), 2);
        assert_eq!(ty.base(), &Type::Int);
        assert_eq!(ty.element(), Some(&Type::array_of(Type::Int)));
        assert!(ty.is_reference());
        assert!(!Type::Int.is_reference());
    }

    #[test]
    fn test_substitute_base() {
        let e = ClassId::new(3);
        let ty = Type::array_dims(Type::Class(e), 2);
        assert_eq!(
            ty.substitute_base(e, &Type::Int),
            Some(Type::array_dims(Type::Int, 2))
        );
        assert_eq!(ty.substitute_base(ClassId::new(4), &Type::Int), None);
        assert_eq!(Type::Class(e).substitute_base(e, &Type::Int), Some(Type::Int));
    }

    #[test]
    fn test_library_internal_name() {
        assert_eq!(LibraryType::Enum.internal_name(), "java/lang/Enum");
        assert_eq!(LibraryType::EnumSet.to_string(), "java.util.EnumSet");
    }
}
