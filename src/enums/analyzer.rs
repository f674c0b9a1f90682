//! Eligibility analysis.
//!
//! Each round classifies the use sites of every method body in parallel against
//! a read-only snapshot of candidate statuses, then commits the proposed
//! demotions single-threaded in method and location order. The instance-field
//! mapper runs on the survivors at the end of each round. Rounds repeat until
//! one boxes nothing; boxing is monotonic over a finite set, so this terminates.
//!
//! Bodies declared by an unboxable candidate are skipped, apart from its class
//! initializer: they are either rewritten wholesale or removed with the class,
//! and a call that would keep one alive boxes the candidate at the call site.

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    enums::{
        candidate::CandidateSet,
        collector::{demote, is_canonical_member},
        config::UnboxingConfig,
        fields::{map_fields, to_string_override},
        nullness::{AlwaysNull, NullParams},
        reason::BoxingReason,
        usesite::{ClassUse, Location, ResultUse, UseCollector, UseKind},
    },
    events::{EventKind, EventLog},
    program::{ClassId, FieldId, KeepPredicate, LibraryMethod, MethodId, Program},
    Result,
};

/// A demotion proposed by one method, committed between rounds.
#[derive(Debug, Clone)]
struct Demotion {
    class: ClassId,
    reason: BoxingReason,
    location: Location,
}

/// Everything one method contributes to a round.
#[derive(Debug, Default)]
struct MethodFindings {
    method: Option<MethodId>,
    demotions: Vec<Demotion>,
    field_reads: Vec<(ClassId, FieldId)>,
    string_conversions: Vec<ClassId>,
}

/// Facts gathered by the last completed round.
#[derive(Debug, Default, Clone)]
pub struct AnalysisFacts {
    /// Instance fields read by surviving code, per candidate.
    pub field_reads: FxHashMap<ClassId, FxHashSet<FieldId>>,
    /// Candidates whose values are converted to strings.
    pub string_conversions: FxHashSet<ClassId>,
    /// Parameters always passed `null`.
    pub null_params: NullParams,
    /// Rounds run, including the final one that changed nothing.
    pub rounds: usize,
}

/// Runs the eligibility analysis to a fixed point.
pub struct Analyzer<'a> {
    program: &'a Program,
    keep: &'a KeepPredicate,
    config: &'a UnboxingConfig,
    events: &'a EventLog,
}

impl<'a> Analyzer<'a> {
    /// Creates an analyzer over `program`.
    #[must_use]
    pub fn new(
        program: &'a Program,
        keep: &'a KeepPredicate,
        config: &'a UnboxingConfig,
        events: &'a EventLog,
    ) -> Self {
        Self {
            program,
            keep,
            config,
            events,
        }
    }

    /// Analyzes until no candidate changes, then marks survivors eligible.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the fixed point is not reached within
    /// [`UnboxingConfig::max_rounds`].
    pub fn run(&self, candidates: &mut CandidateSet) -> Result<AnalysisFacts> {
        let null_params = NullParams::compute(self.program, self.keep, candidates);
        let methods = self.program.methods_with_code();

        for round in 1..=self.config.max_rounds {
            let findings: Vec<MethodFindings> = {
                let snapshot: &CandidateSet = candidates;
                methods
                    .par_iter()
                    .filter(|m| self.is_analyzed(snapshot, **m))
                    .map(|m| self.classify_method(snapshot, &null_params, *m))
                    .collect()
            };

            let mut changed = 0;
            let mut facts = AnalysisFacts {
                null_params: null_params.clone(),
                rounds: round,
                ..AnalysisFacts::default()
            };
            for finding in findings {
                let Some(method) = finding.method else {
                    continue;
                };
                for demotion in finding.demotions {
                    let site = format!("{} @ {}", self.program.method_reference(method), demotion.location);
                    if demote(candidates, demotion.class, demotion.reason, Some(site), self.events) {
                        changed += 1;
                    }
                }
                for (class, field) in finding.field_reads {
                    facts.field_reads.entry(class).or_default().insert(field);
                }
                facts.string_conversions.extend(finding.string_conversions);
            }
            changed += self.map_survivors(candidates, &facts);

            self.events
                .record(EventKind::RoundCompleted)
                .phase("analyze")
                .message(format!("round {round}: {changed} demotion(s)"));
            if changed == 0 {
                for class in candidates.pending() {
                    self.events
                        .record(EventKind::CandidateEligible)
                        .class(class)
                        .phase("analyze")
                        .message(self.program.class(class).name.clone());
                }
                candidates.finalize();
                return Ok(facts);
            }
        }
        Err(internal_error!(
            "enum analysis did not converge within {} rounds",
            self.config.max_rounds
        ))
    }

    fn is_analyzed(&self, candidates: &CandidateSet, method: MethodId) -> bool {
        let def = self.program.method(method);
        !candidates.is_unboxable(def.holder) || def.is_class_initializer()
    }

    /// Builds instance-field plans for the pending candidates. Returns the number boxed.
    fn map_survivors(&self, candidates: &mut CandidateSet, facts: &AnalysisFacts) -> usize {
        let empty = FxHashSet::default();
        let mut boxed = 0;
        for class in candidates.pending() {
            let reads = facts.field_reads.get(&class).unwrap_or(&empty);
            let to_string_used = facts.string_conversions.contains(&class);
            match map_fields(
                self.program,
                candidates,
                class,
                reads,
                to_string_used,
                self.config.max_retained_instance_fields,
            ) {
                Ok(plan) => {
                    self.events
                        .record(EventKind::FieldPlanComputed)
                        .class(class)
                        .phase("map")
                        .message(format!(
                            "{}: {} field(s), {} table(s)",
                            self.program.class(class).name,
                            plan.fields.len(),
                            plan.tables()
                        ));
                    if let Some(candidate) = candidates.lookup_mut(class) {
                        candidate.plan = Some(plan);
                    }
                }
                Err(reason) => {
                    let site = format!("{}.<init>", self.program.class(class).name);
                    if demote(candidates, class, reason, Some(site), self.events) {
                        boxed += 1;
                    }
                }
            }
        }
        boxed
    }

    fn classify_method(&self, candidates: &CandidateSet, null_params: &NullParams, method: MethodId) -> MethodFindings {
        let mut findings = MethodFindings {
            method: Some(method),
            ..MethodFindings::default()
        };
        let Some(code) = self.program.method(method).code.as_ref() else {
            return findings;
        };
        let always_null = AlwaysNull::compute(method, code, null_params);
        let sites = UseCollector::new(self.program, candidates, method, code, &always_null).collect();

        for site in sites {
            let mut box_for = |class: ClassId, reason: BoxingReason| {
                findings.demotions.push(Demotion {
                    class,
                    reason,
                    location: site.location,
                });
            };
            match site.kind {
                UseKind::Flow { from, to, .. } => {
                    if let Some(class) = from.base_class().filter(|c| candidates.contains(*c)) {
                        box_for(class, BoxingReason::ObjectEscape);
                    }
                    if let Some(class) = to.base_class().filter(|c| candidates.contains(*c)) {
                        box_for(class, BoxingReason::DownCast);
                    }
                }
                UseKind::MixedComparison { lhs, rhs } => {
                    for ty in [lhs, rhs] {
                        if let Some(class) = ty.base_class().filter(|c| candidates.contains(*c)) {
                            box_for(class, BoxingReason::InvalidIfTypes);
                        }
                    }
                }
                UseKind::FieldRead { class, field } => findings.field_reads.push((class, field)),
                UseKind::ConstantWrite {
                    class,
                    in_initializer,
                } => {
                    if !in_initializer {
                        box_for(class, BoxingReason::AssignmentOutsideInit);
                    }
                }
                UseKind::InstanceWrite { class } => box_for(class, BoxingReason::AssignmentOutsideInit),
                UseKind::Allocation {
                    class,
                    in_initializer,
                } => {
                    if !in_initializer {
                        box_for(class, BoxingReason::InvalidClassInitializer);
                    }
                }
                UseKind::MethodCall {
                    class,
                    callee,
                    in_initializer,
                } => {
                    let def = self.program.method(callee);
                    if def.is_instance_initializer() {
                        if !in_initializer {
                            box_for(class, BoxingReason::InvalidClassInitializer);
                        }
                    } else if to_string_override(self.program, class) == Some(callee) {
                        findings.string_conversions.push(class);
                    } else if !is_canonical_member(self.program, callee) {
                        box_for(class, BoxingReason::RemainingMethodBody);
                    }
                }
                UseKind::InterfaceCall { class, callee } => {
                    let def = self.program.method(callee);
                    let descriptor = self.program.method_descriptor(callee);
                    let target = self.program.dispatch(class, &def.name, &descriptor);
                    let implemented = target.is_some_and(|t| self.program.method(t).holder == class);
                    let reason = if implemented {
                        BoxingReason::RemainingMethodBody
                    } else {
                        BoxingReason::InterfaceDefaultMethodUsed
                    };
                    box_for(class, reason);
                }
                UseKind::ClassConstant { class, dims, users } => {
                    if dims > 0 {
                        box_for(class, BoxingReason::ConstClass);
                    } else if let Some(reason) = class_use_reason(&users) {
                        box_for(class, reason);
                    }
                }
                UseKind::GetClass { class, users } => {
                    if let Some(reason) = class_use_reason(&users) {
                        box_for(class, reason);
                    }
                }
                UseKind::LibraryCall {
                    class,
                    dims,
                    method,
                    operand,
                    receiver,
                    result,
                } => match library_rule(candidates, class, dims, method, operand, receiver, result) {
                    LibraryRule::Supported => {}
                    LibraryRule::StringConversion => findings.string_conversions.push(class),
                    LibraryRule::Boxes(reason) => box_for(class, reason),
                },
                UseKind::Unresolved { class } => box_for(class, BoxingReason::UnresolvedMember),
            }
        }
        findings
    }
}

/// The first boxing reason among the consumers of a class object.
fn class_use_reason(users: &[ClassUse]) -> Option<BoxingReason> {
    users.iter().find_map(|use_| match use_ {
        ClassUse::ValueOf | ClassUse::Name => None,
        ClassUse::EnumCollection => Some(BoxingReason::EnumSetOrMap),
        ClassUse::Other => Some(BoxingReason::ConstClass),
    })
}

/// Verdict on a library call with a candidate-typed operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LibraryRule {
    /// Rewritable through a shim or a folded constant.
    Supported,
    /// Supported; string conversion needs a `toString()` fold if overridden.
    StringConversion,
    /// Boxes the candidate.
    Boxes(BoxingReason),
}

fn library_rule(
    candidates: &CandidateSet,
    class: ClassId,
    dims: usize,
    method: LibraryMethod,
    operand: usize,
    receiver: Option<ClassId>,
    result: ResultUse,
) -> LibraryRule {
    use LibraryMethod as L;

    if dims > 0 {
        return match (method, operand, result) {
            (L::ArrayClone, 0, ResultUse::Unused | ResultUse::SameType | ResultUse::CastBack) => {
                LibraryRule::Supported
            }
            (L::ArrayClone, _, _) => LibraryRule::Boxes(BoxingReason::ObjectEscape),
            _ => LibraryRule::Boxes(BoxingReason::UnsupportedLibraryInvoke),
        };
    }

    match (method, operand) {
        (L::EnumOrdinal | L::EnumName | L::EnumInit, 0) => LibraryRule::Supported,
        (L::EnumToString | L::ObjectToString | L::StringValueOf | L::PrintlnObject, 0) => {
            LibraryRule::StringConversion
        }
        (L::EnumCompareTo, 0) | (L::EnumEquals | L::ObjectEquals, 0) => LibraryRule::Supported,
        (L::EnumCompareTo, _) if receiver == Some(class) => LibraryRule::Supported,
        (L::EnumCompareTo, _) => LibraryRule::Boxes(BoxingReason::ObjectEscape),
        (L::EnumEquals | L::ObjectEquals, _) => match receiver {
            Some(r) if r == class || candidates.is_unboxable(r) => LibraryRule::Supported,
            _ => LibraryRule::Boxes(BoxingReason::ObjectEscape),
        },
        (L::ObjectGetClass, 0) => LibraryRule::Supported,
        (L::ObjectsRequireNonNull | L::ObjectsRequireNonNullMessage, 0) => match result {
            ResultUse::Unused | ResultUse::SameType => LibraryRule::Supported,
            ResultUse::CastBack | ResultUse::Other => LibraryRule::Boxes(BoxingReason::ObjectEscape),
        },
        (L::EnumHashCode | L::ObjectHashCode | L::SystemIdentityHashCode, _) => {
            LibraryRule::Boxes(BoxingReason::IdentityHashCode)
        }
        _ => LibraryRule::Boxes(BoxingReason::UnsupportedLibraryInvoke),
    }
}
