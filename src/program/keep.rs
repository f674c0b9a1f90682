//! Keep-rule predicates and cross-pass pins.
//!
//! Keep rules come from the surrounding compiler driver and are frozen before the
//! engine runs: a [`KeepPredicate`] is built once and only queried afterwards.
//! [`PassPins`] are the "never inline / never class-inline / no class merging"
//! constraints other whole-program passes publish. Unlike keep rules, pins are
//! shared and may be extended while passes run, so they live in concurrent sets.

use bitflags::bitflags;
use dashmap::DashSet;
use rustc_hash::FxHashMap;

use crate::program::item::{ClassId, FieldId, MethodId};

bitflags! {
    /// Relaxations attached to a keep rule.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeepFlags: u8 {
        /// The item may be removed if unused.
        const ALLOW_SHRINKING = 0x01;
        /// The item may be renamed.
        const ALLOW_OBFUSCATION = 0x02;
        /// The item may be optimized (including unboxed).
        const ALLOW_OPTIMIZATION = 0x04;
    }
}

/// An item a keep rule can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeepTarget {
    /// A class, without implying its members.
    Class(ClassId),
    /// A single field.
    Field(FieldId),
    /// A single method.
    Method(MethodId),
}

/// Immutable answer to "is this item kept, and with which relaxations?".
#[derive(Debug, Clone, Default)]
pub struct KeepPredicate {
    rules: FxHashMap<KeepTarget, KeepFlags>,
}

impl KeepPredicate {
    /// Creates a predicate that keeps nothing.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a builder for a predicate.
    #[must_use]
    pub fn builder() -> KeepPredicateBuilder {
        KeepPredicateBuilder::default()
    }

    /// Returns the keep flags of `target`, or `None` if it is not kept.
    #[must_use]
    pub fn flags(&self, target: KeepTarget) -> Option<KeepFlags> {
        self.rules.get(&target).copied()
    }

    /// Returns true if `target` is matched by any keep rule.
    #[must_use]
    pub fn is_kept(&self, target: KeepTarget) -> bool {
        self.rules.contains_key(&target)
    }

    /// Returns true if `target` is kept in a way that forbids rewriting it.
    ///
    /// Rules that allow optimization never pin.
    #[must_use]
    pub fn pins(&self, target: KeepTarget) -> bool {
        self.flags(target)
            .is_some_and(|flags| !flags.contains(KeepFlags::ALLOW_OPTIMIZATION))
    }

    /// Returns the number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Builder for [`KeepPredicate`].
#[derive(Debug, Default)]
pub struct KeepPredicateBuilder {
    rules: FxHashMap<KeepTarget, KeepFlags>,
}

impl KeepPredicateBuilder {
    /// Keeps `target` with the given relaxations.
    #[must_use]
    pub fn keep(mut self, target: KeepTarget, flags: KeepFlags) -> Self {
        self.rules.insert(target, flags);
        self
    }

    /// Keeps a class without relaxations.
    #[must_use]
    pub fn keep_class(self, class: ClassId) -> Self {
        self.keep(KeepTarget::Class(class), KeepFlags::empty())
    }

    /// Keeps a method without relaxations.
    #[must_use]
    pub fn keep_method(self, method: MethodId) -> Self {
        self.keep(KeepTarget::Method(method), KeepFlags::empty())
    }

    /// Freezes the predicate.
    #[must_use]
    pub fn build(self) -> KeepPredicate {
        KeepPredicate { rules: self.rules }
    }
}

/// Constraints published by other passes.
#[derive(Debug, Default)]
pub struct PassPins {
    /// Methods the inliner will not inline.
    pub never_inline: DashSet<MethodId>,
    /// Classes the class inliner will not inline.
    pub never_class_inline: DashSet<ClassId>,
    /// Classes that vertical/horizontal class merging must leave alone.
    pub no_class_merging: DashSet<ClassId>,
}

impl PassPins {
    /// Creates an empty set of pins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `method` is pinned against inlining.
    #[must_use]
    pub fn is_never_inline(&self, method: MethodId) -> bool {
        self.never_inline.contains(&method)
    }

    /// Returns true if `class` is pinned against class merging.
    #[must_use]
    pub fn is_no_class_merging(&self, class: ClassId) -> bool {
        self.no_class_merging.contains(&class)
    }
}
