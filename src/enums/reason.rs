//! Why an enum stays boxed.

use strum::{Display, EnumIter, IntoStaticStr};

/// The first reason an enum candidate was found incompatible with unboxing.
///
/// A candidate records exactly one reason: once boxed it is never re-examined, so
/// the reason names the first rule that fired in deterministic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
pub enum BoxingReason {
    /// The enum declares no constants.
    EmptyEnum,
    /// A keep rule pins the class or one of its members.
    ExplicitlyKept,
    /// A constant has its own class body.
    Subtypes,
    /// An interface default method is invoked on a value of the enum.
    InterfaceDefaultMethodUsed,
    /// A method declared by the enum would survive rewriting.
    RemainingMethodBody,
    /// A value of the enum flows into a slot of a different type.
    ObjectEscape,
    /// A value of another type flows into a slot of the enum type.
    DownCast,
    /// The enum's class object escapes.
    ConstClass,
    /// A reference comparison mixes the enum with another type.
    InvalidIfTypes,
    /// The enum is used with `EnumSet` or `EnumMap`.
    EnumSetOrMap,
    /// `hashCode()` or `System.identityHashCode` is applied to a value.
    IdentityHashCode,
    /// A library method outside the supported set receives a value.
    UnsupportedLibraryInvoke,
    /// The constructor does more than assign fields.
    InstanceInitializerSideEffects,
    /// The class initializer does not have the shape constant creation needs.
    InvalidClassInitializer,
    /// An enum constant or instance field is assigned outside initialization.
    AssignmentOutsideInit,
    /// A read instance field has a value that cannot be determined statically.
    UnresolvableFieldInitializer,
    /// A read instance field holds values that have no `int` encoding.
    UnrepresentableFieldType,
    /// More instance fields need lookup tables than the configured budget allows.
    TooManyFields,
    /// `toString()` is overridden and used but does not fold to constants.
    NonFoldableToString,
    /// A value reaches a member reference that does not resolve.
    UnresolvedMember,
}

impl BoxingReason {
    /// Returns a short human-readable description.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::EmptyEnum => "enum has no constants",
            Self::ExplicitlyKept => "pinned by a keep rule",
            Self::Subtypes => "constant with a class body",
            Self::InterfaceDefaultMethodUsed => "interface default method invoked",
            Self::RemainingMethodBody => "enum method would remain",
            Self::ObjectEscape => "value escapes to a wider type",
            Self::DownCast => "value cast from a wider type",
            Self::ConstClass => "class object escapes",
            Self::InvalidIfTypes => "comparison with another type",
            Self::EnumSetOrMap => "used with EnumSet/EnumMap",
            Self::IdentityHashCode => "identity hash code observed",
            Self::UnsupportedLibraryInvoke => "unsupported library call",
            Self::InstanceInitializerSideEffects => "constructor has side effects",
            Self::InvalidClassInitializer => "unrecognized class initializer",
            Self::AssignmentOutsideInit => "assignment outside initialization",
            Self::UnresolvableFieldInitializer => "instance field value unknown",
            Self::UnrepresentableFieldType => "instance field not representable",
            Self::TooManyFields => "too many instance fields",
            Self::NonFoldableToString => "toString() override does not fold",
            Self::UnresolvedMember => "unresolved member reference",
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_every_reason_described() {
        for reason in BoxingReason::iter() {
            assert!(!reason.description().is_empty());
            assert!(!reason.to_string().is_empty());
        }
        assert_eq!(BoxingReason::TooManyFields.to_string(), "TooManyFields");
    }
}
