//! The modeled runtime-library surface.
//!
//! Program code calls into the library through [`LibraryMethod`]. The set is closed:
//! it contains exactly the members the unboxing analysis reasons about, plus the
//! few helpers needed to write observable test programs (printing, string
//! concatenation, exception construction).

use strum::{Display, EnumIter, IntoStaticStr};

use crate::program::{
    item::MethodReference,
    types::{LibraryType, Type},
};

/// A library method that program code may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum LibraryMethod {
    /// `Enum.<init>(String, int)`
    EnumInit,
    /// `Enum.ordinal()`
    EnumOrdinal,
    /// `Enum.name()`
    EnumName,
    /// `Enum.toString()`
    EnumToString,
    /// `Enum.equals(Object)`
    EnumEquals,
    /// `Enum.hashCode()`
    EnumHashCode,
    /// `Enum.compareTo(Enum)`
    EnumCompareTo,
    /// `Enum.valueOf(Class, String)`
    EnumValueOf,
    /// `Object.<init>()`
    ObjectInit,
    /// `Object.getClass()`
    ObjectGetClass,
    /// `Object.hashCode()`
    ObjectHashCode,
    /// `Object.toString()`
    ObjectToString,
    /// `Object.equals(Object)`
    ObjectEquals,
    /// `Class.getName()`
    ClassGetName,
    /// `Class.getSimpleName()`
    ClassGetSimpleName,
    /// `Class.getCanonicalName()`
    ClassGetCanonicalName,
    /// `Objects.requireNonNull(Object)`
    ObjectsRequireNonNull,
    /// `Objects.requireNonNull(Object, String)`
    ObjectsRequireNonNullMessage,
    /// `String.valueOf(Object)`
    StringValueOf,
    /// `String.concat(String)`
    StringConcat,
    /// `String.equals(Object)`
    StringEquals,
    /// `System.identityHashCode(Object)`
    SystemIdentityHashCode,
    /// `array.clone()`
    ArrayClone,
    /// `System.out.println(String)`
    PrintlnString,
    /// `System.out.println(int)`
    PrintlnInt,
    /// `System.out.println(boolean)`
    PrintlnBoolean,
    /// `System.out.println(Object)`
    PrintlnObject,
    /// `EnumSet.allOf(Class)`
    EnumSetAllOf,
    /// `EnumSet.noneOf(Class)`
    EnumSetNoneOf,
    /// `new EnumMap(Class)`
    EnumMapNew,
    /// `Collection.size()` / `Map.size()`
    CollectionSize,
    /// `new NullPointerException()`
    NewNullPointerException,
    /// `new NullPointerException(String)`
    NewNullPointerExceptionMessage,
    /// `new IllegalArgumentException(String)`
    NewIllegalArgumentException,
}

impl LibraryMethod {
    /// Fully qualified name of the declaring library class.
    #[must_use]
    pub fn holder(self) -> &'static str {
        match self {
            Self::EnumInit
            | Self::EnumOrdinal
            | Self::EnumName
            | Self::EnumToString
            | Self::EnumEquals
            | Self::EnumHashCode
            | Self::EnumCompareTo
            | Self::EnumValueOf => "java.lang.Enum",
            Self::ObjectInit
            | Self::ObjectGetClass
            | Self::ObjectHashCode
            | Self::ObjectToString
            | Self::ObjectEquals
            | Self::ArrayClone => "java.lang.Object",
            Self::ClassGetName | Self::ClassGetSimpleName | Self::ClassGetCanonicalName => {
                "java.lang.Class"
            }
            Self::ObjectsRequireNonNull | Self::ObjectsRequireNonNullMessage => {
                "java.util.Objects"
            }
            Self::StringValueOf | Self::StringConcat | Self::StringEquals => "java.lang.String",
            Self::SystemIdentityHashCode => "java.lang.System",
            Self::PrintlnString | Self::PrintlnInt | Self::PrintlnBoolean | Self::PrintlnObject => {
                "java.io.PrintStream"
            }
            Self::EnumSetAllOf | Self::EnumSetNoneOf => "java.util.EnumSet",
            Self::EnumMapNew => "java.util.EnumMap",
            Self::CollectionSize => "java.util.Collection",
            Self::NewNullPointerException | Self::NewNullPointerExceptionMessage => {
                "java.lang.NullPointerException"
            }
            Self::NewIllegalArgumentException => "java.lang.IllegalArgumentException",
        }
    }

    /// The JVM member name.
    #[must_use]
    pub fn member_name(self) -> &'static str {
        match self {
            Self::EnumInit
            | Self::ObjectInit
            | Self::EnumMapNew
            | Self::NewNullPointerException
            | Self::NewNullPointerExceptionMessage
            | Self::NewIllegalArgumentException => "<init>",
            Self::EnumOrdinal => "ordinal",
            Self::EnumName => "name",
            Self::EnumToString | Self::ObjectToString => "toString",
            Self::EnumEquals | Self::ObjectEquals | Self::StringEquals => "equals",
            Self::EnumHashCode | Self::ObjectHashCode => "hashCode",
            Self::EnumCompareTo => "compareTo",
            Self::EnumValueOf | Self::StringValueOf => "valueOf",
            Self::ObjectGetClass => "getClass",
            Self::ClassGetName => "getName",
            Self::ClassGetSimpleName => "getSimpleName",
            Self::ClassGetCanonicalName => "getCanonicalName",
            Self::ObjectsRequireNonNull | Self::ObjectsRequireNonNullMessage => "requireNonNull",
            Self::StringConcat => "concat",
            Self::SystemIdentityHashCode => "identityHashCode",
            Self::ArrayClone => "clone",
            Self::PrintlnString | Self::PrintlnInt | Self::PrintlnBoolean | Self::PrintlnObject => {
                "println"
            }
            Self::EnumSetAllOf => "allOf",
            Self::EnumSetNoneOf => "noneOf",
            Self::CollectionSize => "size",
        }
    }

    /// The JVM descriptor of the member.
    #[must_use]
    pub fn descriptor(self) -> &'static str {
        match self {
            Self::EnumInit => "(Ljava/lang/String;I)V",
            Self::EnumOrdinal | Self::EnumHashCode | Self::ObjectHashCode | Self::CollectionSize => {
                "()I"
            }
            Self::EnumName
            | Self::EnumToString
            | Self::ObjectToString
            | Self::ClassGetName
            | Self::ClassGetSimpleName
            | Self::ClassGetCanonicalName => "()Ljava/lang/String;",
            Self::EnumEquals | Self::ObjectEquals | Self::StringEquals => "(Ljava/lang/Object;)Z",
            Self::EnumCompareTo => "(Ljava/lang/Enum;)I",
            Self::EnumValueOf => "(Ljava/lang/Class;Ljava/lang/String;)Ljava/lang/Enum;",
            Self::ObjectInit | Self::NewNullPointerException => "()V",
            Self::ObjectGetClass => "()Ljava/lang/Class;",
            Self::ObjectsRequireNonNull => "(Ljava/lang/Object;)Ljava/lang/Object;",
            Self::ObjectsRequireNonNullMessage => {
                "(Ljava/lang/Object;Ljava/lang/String;)Ljava/lang/Object;"
            }
            Self::StringValueOf => "(Ljava/lang/Object;)Ljava/lang/String;",
            Self::StringConcat => "(Ljava/lang/String;)Ljava/lang/String;",
            Self::SystemIdentityHashCode => "(Ljava/lang/Object;)I",
            Self::ArrayClone => "()Ljava/lang/Object;",
            Self::PrintlnString => "(Ljava/lang/String;)V",
            Self::PrintlnInt => "(I)V",
            Self::PrintlnBoolean => "(Z)V",
            Self::PrintlnObject => "(Ljava/lang/Object;)V",
            Self::EnumSetAllOf | Self::EnumSetNoneOf => "(Ljava/lang/Class;)Ljava/util/EnumSet;",
            Self::EnumMapNew => "(Ljava/lang/Class;)V",
            Self::NewNullPointerExceptionMessage | Self::NewIllegalArgumentException => {
                "(Ljava/lang/String;)V"
            }
        }
    }

    /// Returns true if the call has no receiver operand.
    #[must_use]
    pub fn is_static(self) -> bool {
        matches!(
            self,
            Self::EnumValueOf
                | Self::ObjectsRequireNonNull
                | Self::ObjectsRequireNonNullMessage
                | Self::StringValueOf
                | Self::SystemIdentityHashCode
                | Self::PrintlnString
                | Self::PrintlnInt
                | Self::PrintlnBoolean
                | Self::PrintlnObject
                | Self::EnumSetAllOf
                | Self::EnumSetNoneOf
                | Self::EnumMapNew
                | Self::NewNullPointerException
                | Self::NewNullPointerExceptionMessage
                | Self::NewIllegalArgumentException
        )
    }

    /// Operand types of the call, including the receiver for instance methods.
    #[must_use]
    pub fn operand_types(self) -> Vec<Type> {
        let enum_ty = Type::Library(LibraryType::Enum);
        let class_ty = Type::Library(LibraryType::Class);
        match self {
            Self::EnumInit => vec![enum_ty, Type::String, Type::Int],
            Self::EnumOrdinal | Self::EnumName | Self::EnumToString | Self::EnumHashCode => {
                vec![enum_ty]
            }
            Self::EnumEquals => vec![enum_ty, Type::Object],
            Self::EnumCompareTo => vec![enum_ty.clone(), enum_ty],
            Self::EnumValueOf => vec![class_ty, Type::String],
            Self::ObjectInit
            | Self::ObjectGetClass
            | Self::ObjectHashCode
            | Self::ObjectToString
            | Self::ArrayClone
            | Self::CollectionSize => vec![Type::Object],
            Self::ObjectEquals => vec![Type::Object, Type::Object],
            Self::ClassGetName | Self::ClassGetSimpleName | Self::ClassGetCanonicalName => {
                vec![class_ty]
            }
            Self::ObjectsRequireNonNull
            | Self::StringValueOf
            | Self::SystemIdentityHashCode
            | Self::PrintlnObject => vec![Type::Object],
            Self::ObjectsRequireNonNullMessage => vec![Type::Object, Type::String],
            Self::StringConcat => vec![Type::String, Type::String],
            Self::StringEquals => vec![Type::String, Type::Object],
            Self::PrintlnString
            | Self::NewNullPointerExceptionMessage
            | Self::NewIllegalArgumentException => vec![Type::String],
            Self::PrintlnInt => vec![Type::Int],
            Self::PrintlnBoolean => vec![Type::Boolean],
            Self::EnumSetAllOf | Self::EnumSetNoneOf | Self::EnumMapNew => vec![class_ty],
            Self::NewNullPointerException => Vec::new(),
        }
    }

    /// Result type of the call.
    #[must_use]
    pub fn return_type(self) -> Type {
        match self {
            Self::EnumInit
            | Self::ObjectInit
            | Self::PrintlnString
            | Self::PrintlnInt
            | Self::PrintlnBoolean
            | Self::PrintlnObject => Type::Void,
            Self::EnumOrdinal
            | Self::EnumHashCode
            | Self::EnumCompareTo
            | Self::ObjectHashCode
            | Self::SystemIdentityHashCode
            | Self::CollectionSize => Type::Int,
            Self::EnumName
            | Self::EnumToString
            | Self::ObjectToString
            | Self::ClassGetName
            | Self::ClassGetSimpleName
            | Self::ClassGetCanonicalName
            | Self::StringValueOf
            | Self::StringConcat => Type::String,
            Self::EnumEquals | Self::ObjectEquals | Self::StringEquals => Type::Boolean,
            Self::EnumValueOf => Type::Library(LibraryType::Enum),
            Self::ObjectGetClass => Type::Library(LibraryType::Class),
            Self::ObjectsRequireNonNull | Self::ObjectsRequireNonNullMessage | Self::ArrayClone => {
                Type::Object
            }
            Self::EnumSetAllOf | Self::EnumSetNoneOf => Type::Library(LibraryType::EnumSet),
            Self::EnumMapNew => Type::Library(LibraryType::EnumMap),
            Self::NewNullPointerException
            | Self::NewNullPointerExceptionMessage
            | Self::NewIllegalArgumentException => Type::Library(LibraryType::Throwable),
        }
    }

    /// Returns true for the virtual members a program class may override.
    #[must_use]
    pub fn is_overridable(self) -> bool {
        matches!(
            self,
            Self::ObjectToString
                | Self::EnumToString
                | Self::ObjectEquals
                | Self::ObjectHashCode
        )
    }

    /// Returns the symbolic reference of this member.
    #[must_use]
    pub fn reference(self) -> MethodReference {
        MethodReference {
            holder: self.holder().to_string(),
            name: self.member_name().to_string(),
            descriptor: self.descriptor().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_operand_counts_match_descriptors() {
        for method in LibraryMethod::iter() {
            let descriptor = method.descriptor();
            let params = &descriptor[1..descriptor.find(')').unwrap()];
            let mut count = 0;
            let mut chars = params.chars();
            while let Some(c) = chars.next() {
                match c {
                    'L' => {
                        for c in chars.by_ref() {
                            if c == ';' {
                                break;
                            }
                        }
                        count += 1;
                    }
                    '[' => {}
                    _ => count += 1,
                }
            }
            let receiver = usize::from(!method.is_static());
            assert_eq!(
                method.operand_types().len(),
                count + receiver,
                "operand mismatch for {method}"
            );
        }
    }

    #[test]
    fn test_reference() {
        let reference = LibraryMethod::EnumOrdinal.reference();
        assert_eq!(reference.to_string(), "java.lang.Enum.ordinal()I");
    }
}
