//! Runtime values and heap objects of the reference interpreter.

use std::{fmt, sync::Arc};

use rustc_hash::FxHashMap;
use strum::{Display, EnumIter, IntoStaticStr};

use crate::program::{ClassId, FieldId, Type};

/// Index of an object in the interpreter heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) usize);

impl ObjRef {
    /// Returns the identity hash the runtime assigns to this object.
    ///
    /// Deterministic across runs, unrelated to any ordinal.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn identity_hash(self) -> i32 {
        let index = self.0 as u32;
        (index.wrapping_add(1).wrapping_mul(0x9E37_79B1) >> 1) as i32
    }
}

/// A value held in a register, field or array slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The null reference.
    Null,
    /// An `int`.
    Int(i32),
    /// A `long`.
    Long(i64),
    /// A `double`.
    Double(f64),
    /// A `boolean`.
    Bool(bool),
    /// An immutable string.
    Str(Arc<str>),
    /// A class literal or the result of `getClass()`.
    Class(Type),
    /// A heap object.
    Ref(ObjRef),
}

impl Value {
    /// Returns the default value of a field or array slot of type `ty`.
    #[must_use]
    pub fn default_for(ty: &Type) -> Value {
        match ty {
            Type::Boolean => Value::Bool(false),
            Type::Int => Value::Int(0),
            Type::Long => Value::Long(0),
            Type::Double => Value::Double(0.0),
            _ => Value::Null,
        }
    }

    /// Creates a string value.
    #[must_use]
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    /// Returns true for the null reference.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the payload of an `int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload of a `boolean`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload of a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the heap reference, if this is one.
    #[must_use]
    pub fn as_obj(&self) -> Option<ObjRef> {
        match self {
            Value::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Short name of the value's shape, for diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Class(_) => "class",
            Value::Ref(_) => "reference",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Double(v) => f.write_str(&format_double(*v)),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Class(_) => f.write_str("class"),
            Value::Ref(r) => write!(f, "@{:x}", r.identity_hash()),
        }
    }
}

/// Renders a double the way `Double.toString` does for common values.
#[must_use]
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e7 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Computes `String.hashCode()`.
#[must_use]
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Runtime exception and error classes the interpreter can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum ExceptionKind {
    /// `java.lang.NullPointerException`
    #[strum(serialize = "java.lang.NullPointerException")]
    NullPointerException,
    /// `java.lang.IllegalArgumentException`
    #[strum(serialize = "java.lang.IllegalArgumentException")]
    IllegalArgumentException,
    /// `java.lang.ClassCastException`
    #[strum(serialize = "java.lang.ClassCastException")]
    ClassCastException,
    /// `java.lang.ArithmeticException`
    #[strum(serialize = "java.lang.ArithmeticException")]
    ArithmeticException,
    /// `java.lang.ArrayIndexOutOfBoundsException`
    #[strum(serialize = "java.lang.ArrayIndexOutOfBoundsException")]
    ArrayIndexOutOfBoundsException,
    /// `java.lang.NegativeArraySizeException`
    #[strum(serialize = "java.lang.NegativeArraySizeException")]
    NegativeArraySizeException,
    /// `java.lang.NoSuchMethodError`
    #[strum(serialize = "java.lang.NoSuchMethodError")]
    NoSuchMethodError,
    /// `java.lang.NoSuchFieldError`
    #[strum(serialize = "java.lang.NoSuchFieldError")]
    NoSuchFieldError,
    /// `java.lang.NoClassDefFoundError`
    #[strum(serialize = "java.lang.NoClassDefFoundError")]
    NoClassDefFoundError,
    /// `java.lang.AbstractMethodError`
    #[strum(serialize = "java.lang.AbstractMethodError")]
    AbstractMethodError,
}

impl ExceptionKind {
    /// Returns the simple class name, e.g. `NullPointerException`.
    #[must_use]
    pub fn simple_name(self) -> &'static str {
        let name: &'static str = self.into();
        name.rsplit('.').next().unwrap_or(name)
    }
}

/// An exception that reached the entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thrown {
    /// The exception class.
    pub kind: ExceptionKind,
    /// The detail message, if any.
    pub message: Option<String>,
}

impl fmt::Display for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Identity and payload of an enum constant object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumData {
    /// Value of `name()`.
    pub name: String,
    /// Value of `ordinal()`.
    pub ordinal: i32,
}

/// Library collection objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// An `EnumSet`.
    EnumSet,
    /// An `EnumMap`.
    EnumMap,
}

/// An object in the interpreter heap.
#[derive(Debug, Clone)]
pub enum HeapObject {
    /// An instance of a program class.
    Instance {
        /// Runtime class.
        class: ClassId,
        /// Instance field values; absent entries hold the type default.
        fields: FxHashMap<FieldId, Value>,
        /// Set by `Enum.<init>`.
        enum_data: Option<EnumData>,
    },
    /// An array.
    Array {
        /// Element type.
        element: Type,
        /// Slots.
        data: Vec<Value>,
    },
    /// An exception object.
    Throwable(Thrown),
    /// A library collection holding `size` elements.
    Collection {
        /// Collection class.
        kind: CollectionKind,
        /// Number of elements.
        size: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_double() {
        assert_eq!(format_double(1.0), "1.0");
        assert_eq!(format_double(2.5), "2.5");
        assert_eq!(format_double(f64::NAN), "NaN");
    }

    #[test]
    fn test_string_hash_matches_jdk() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("A"), 65);
        assert_eq!(string_hash("hello"), 99_162_322);
    }

    #[test]
    fn test_exception_names() {
        assert_eq!(
            ExceptionKind::NullPointerException.to_string(),
            "java.lang.NullPointerException"
        );
        assert_eq!(ExceptionKind::NoSuchFieldError.simple_name(), "NoSuchFieldError");
        let thrown = Thrown {
            kind: ExceptionKind::IllegalArgumentException,
            message: Some("No enum constant E.X".into()),
        };
        assert_eq!(
            thrown.to_string(),
            "java.lang.IllegalArgumentException: No enum constant E.X"
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Value::default_for(&Type::Int), Value::Int(0));
        assert_eq!(Value::default_for(&Type::Object), Value::Null);
        assert!(Value::default_for(&Type::array_of(Type::Int)).is_null());
    }
}
