//! Enum candidates and their lifecycle.
//!
//! Every candidate starts [`CandidateStatus::Pending`]. The analyzer moves it to
//! [`CandidateStatus::Boxed`] as soon as any rule fires; boxing is terminal. When
//! the analysis reaches its fixed point, every candidate still pending becomes
//! [`CandidateStatus::Eligible`].

use rustc_hash::FxHashMap;

use crate::{
    enums::{fields::InstanceFieldPlan, reason::BoxingReason},
    program::ClassId,
};

id_type!(
    /// Index of a candidate in a [`CandidateSet`].
    CandidateId
);

/// Where a candidate stands in the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateStatus {
    /// Still under analysis.
    Pending,
    /// Proven unboxable; the rewriter will replace it with `int`.
    Eligible,
    /// Stays an object, for the recorded reason.
    Boxed(BoxingReason),
}

impl CandidateStatus {
    /// Returns true unless the candidate is boxed.
    #[must_use]
    pub fn is_unboxable(self) -> bool {
        !matches!(self, CandidateStatus::Boxed(_))
    }
}

/// An enum class considered for unboxing.
#[derive(Debug, Clone)]
pub struct EnumCandidate {
    /// The enum class.
    pub class: ClassId,
    /// Fully qualified name, kept so reports outlive the class.
    pub name: String,
    /// Number of constants.
    pub ordinal_count: usize,
    /// Current status.
    pub status: CandidateStatus,
    /// Where the boxing reason fired, if boxed.
    pub boxed_at: Option<String>,
    /// The instance-field plan from the last mapping round.
    pub plan: Option<InstanceFieldPlan>,
}

/// Arena of candidates with lookup by class.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    candidates: Vec<EnumCandidate>,
    by_class: FxHashMap<ClassId, CandidateId>,
}

impl CandidateSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pending candidate.
    pub fn insert(&mut self, class: ClassId, name: impl Into<String>, ordinal_count: usize) -> CandidateId {
        if let Some(existing) = self.by_class.get(&class) {
            return *existing;
        }
        let id = push_arena!(
            self.candidates,
            CandidateId,
            EnumCandidate {
                class,
                name: name.into(),
                ordinal_count,
                status: CandidateStatus::Pending,
                boxed_at: None,
                plan: None,
            }
        );
        self.by_class.insert(class, id);
        id
    }

    /// Returns the number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Returns true if there are no candidates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Returns the candidate with the given id.
    #[must_use]
    pub fn get(&self, id: CandidateId) -> &EnumCandidate {
        &self.candidates[id.index()]
    }

    /// Returns the candidate for `class`, if it is one.
    #[must_use]
    pub fn lookup(&self, class: ClassId) -> Option<&EnumCandidate> {
        self.by_class.get(&class).map(|id| self.get(*id))
    }

    pub(crate) fn lookup_mut(&mut self, class: ClassId) -> Option<&mut EnumCandidate> {
        let id = *self.by_class.get(&class)?;
        self.candidates.get_mut(id.index())
    }

    /// Finds a candidate by fully qualified class name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&EnumCandidate> {
        self.candidates.iter().find(|c| c.name == name)
    }

    /// Iterates over all candidates in collection order.
    pub fn iter(&self) -> impl Iterator<Item = &EnumCandidate> {
        self.candidates.iter()
    }

    /// Returns true if `class` is a candidate that is not boxed.
    #[must_use]
    pub fn is_unboxable(&self, class: ClassId) -> bool {
        self.lookup(class).is_some_and(|c| c.status.is_unboxable())
    }

    /// Returns true if `class` is a candidate, boxed or not.
    #[must_use]
    pub fn contains(&self, class: ClassId) -> bool {
        self.by_class.contains_key(&class)
    }

    /// Boxes `class` for `reason`.
    ///
    /// Returns true if this changed the status; an already boxed candidate keeps
    /// its first reason.
    pub fn box_candidate(&mut self, class: ClassId, reason: BoxingReason, site: Option<String>) -> bool {
        let Some(candidate) = self.lookup_mut(class) else {
            return false;
        };
        if !candidate.status.is_unboxable() {
            return false;
        }
        candidate.status = CandidateStatus::Boxed(reason);
        candidate.boxed_at = site;
        candidate.plan = None;
        true
    }

    /// Marks every pending candidate eligible. Returns how many changed.
    pub fn finalize(&mut self) -> usize {
        let mut count = 0;
        for candidate in &mut self.candidates {
            if candidate.status == CandidateStatus::Pending {
                candidate.status = CandidateStatus::Eligible;
                count += 1;
            }
        }
        count
    }

    /// Returns the pending candidates' classes in collection order.
    #[must_use]
    pub fn pending(&self) -> Vec<ClassId> {
        self.candidates
            .iter()
            .filter(|c| c.status == CandidateStatus::Pending)
            .map(|c| c.class)
            .collect()
    }

    /// Returns the eligible candidates in collection order.
    pub fn eligible(&self) -> impl Iterator<Item = &EnumCandidate> {
        self.candidates
            .iter()
            .filter(|c| c.status == CandidateStatus::Eligible)
    }

    /// Returns the boxed candidates in collection order.
    pub fn boxed(&self) -> impl Iterator<Item = &EnumCandidate> {
        self.candidates
            .iter()
            .filter(|c| matches!(c.status, CandidateStatus::Boxed(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boxing_is_terminal_and_first_reason_wins() {
        let mut set = CandidateSet::new();
        let a = ClassId::new(1);
        let b = ClassId::new(2);
        set.insert(a, "A", 2);
        set.insert(b, "B", 1);

        assert!(set.box_candidate(a, BoxingReason::ObjectEscape, Some("m".into())));
        assert!(!set.box_candidate(a, BoxingReason::DownCast, None));
        assert_eq!(
            set.lookup(a).map(|c| c.status),
            Some(CandidateStatus::Boxed(BoxingReason::ObjectEscape))
        );
        assert_eq!(set.lookup(a).and_then(|c| c.boxed_at.clone()), Some("m".into()));

        assert_eq!(set.finalize(), 1);
        assert!(set.is_unboxable(b));
        assert!(!set.is_unboxable(a));
        assert!(!set.box_candidate(ClassId::new(9), BoxingReason::EmptyEnum, None));
        assert_eq!(set.eligible().count(), 1);
        assert_eq!(set.boxed().count(), 1);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = CandidateSet::new();
        let first = set.insert(ClassId::new(4), "E", 3);
        let second = set.insert(ClassId::new(4), "E", 3);
        assert_eq!(first, second);
        assert_eq!(set.len(), 1);
        assert_eq!(set.by_name("E").map(|c| c.ordinal_count), Some(3));
    }
}
