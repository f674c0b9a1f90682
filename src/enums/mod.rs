//! Whole-program enum unboxing.
//!
//! An enum whose instances are only ever compared, switched over, stored in
//! enum-typed slots and queried through a small set of library methods can be
//! represented by `int`: `0` for `null` and `ordinal + 1` for each constant. This
//! module decides which enums qualify and rewrites the program accordingly.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                         EnumUnboxer::run                              │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  collect ──▶ analyze (fixed point) ──▶ check ──▶ switch maps           │
//! │                  ▲        │                                           │
//! │                  └── map instance fields per round                    │
//! │                                                                       │
//! │  rewrite ──▶ verify ──▶ broadcast records ──▶ check collaborators     │
//! │     │                                                                 │
//! │     ├── shared utility (one per artifact, reused across rounds)       │
//! │     ├── local utility per enum (tables, valueOf, residual <clinit>)   │
//! │     └── signatures, field types, bodies (parallel, committed in order) │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - [`collector`] - Registers every enum declaration and applies class-level rules
//! - [`analyzer`] - Classifies use sites in parallel until no candidate is demoted
//! - [`fields`] - Folds per-constant instance field values into plans
//! - [`rewriter`] - Replaces eligible enums by `int`
//! - [`utility`] - Shared shim methods and their cross-round registry
//! - [`coordinator`] - Rewrite records for collaborating passes
//! - [`verify`] - Post-rewrite reference and slot checks
//!
//! # Example
//!
//! ```rust,ignore
//! use enumbox::enums::{EnumUnboxer, UnboxingConfig};
//!
//! let unboxer = EnumUnboxer::new(UnboxingConfig::default()).with_keep(keep_rules);
//! let report = unboxer.run(&mut program)?;
//! for name in &report.unboxed {
//!     println!("unboxed {name}");
//! }
//! ```

pub mod analyzer;
pub mod candidate;
pub mod check;
pub mod collector;
pub mod config;
pub mod coordinator;
pub mod fields;
pub mod local;
pub mod nullness;
pub mod reason;
pub mod rewriter;
pub mod signature;
pub mod switchmap;
pub mod usesite;
pub mod utility;
pub mod verify;

pub use analyzer::{AnalysisFacts, Analyzer};
pub use candidate::{CandidateSet, CandidateStatus, EnumCandidate};
pub use check::check_enum_unboxed;
pub use config::UnboxingConfig;
pub use coordinator::{
    Coordinator, InlinerRemapping, MemberRebindingCache, RewriteRecord, SignatureRewriteListener,
    StaticizerCallGraph, Substitution,
};
pub use reason::BoxingReason;
pub use rewriter::{RewriteOutcome, Rewriter};
pub use utility::{forget_shared_utility, registered_shared_utility, Shim};
pub use verify::{verify, Violation};

use std::{fmt, sync::Arc};

use crate::{
    enums::{collector::collect, switchmap::find_switch_maps},
    events::{EventKind, EventLog},
    program::{KeepPredicate, PassPins, Program},
    Result,
};

/// Final state of one enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSummary {
    /// Fully qualified name.
    pub name: String,
    /// Status after the run.
    pub status: CandidateStatus,
    /// Where the boxing reason fired, if boxed at a use site.
    pub site: Option<String>,
}

/// Result of an [`EnumUnboxer`] run.
#[derive(Debug)]
pub struct UnboxingReport {
    /// Every enum considered, sorted by name.
    pub candidates: Vec<CandidateSummary>,
    /// Names of the unboxed enums, sorted.
    pub unboxed: Vec<String>,
    /// Analysis rounds run.
    pub rounds: usize,
    /// Switches that dispatched through a `$SwitchMap$` and now switch directly.
    pub switch_maps_removed: usize,
    /// The shared utility class, if one is present after the run.
    pub shared_utility: Option<String>,
    /// The local utility classes created.
    pub local_utilities: Vec<String>,
    /// Member changes broadcast to collaborators.
    pub records: Vec<RewriteRecord>,
    /// Bodies changed by the rewriter.
    pub rewritten_methods: usize,
    /// Verification failures downgraded to warnings.
    pub type_warnings: usize,
    /// Everything the run recorded.
    pub events: EventLog,
}

impl UnboxingReport {
    fn candidate(&self, name: &str) -> Option<&CandidateSummary> {
        self.candidates
            .binary_search_by(|c| c.name.as_str().cmp(name))
            .ok()
            .map(|index| &self.candidates[index])
    }

    /// Returns true if the enum named `name` was replaced by `int`.
    #[must_use]
    pub fn is_unboxed(&self, name: &str) -> bool {
        self.unboxed.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }

    /// Returns the final status of the enum named `name`.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<CandidateStatus> {
        self.candidate(name).map(|c| c.status)
    }

    /// Returns why the enum named `name` stayed boxed.
    #[must_use]
    pub fn reason(&self, name: &str) -> Option<BoxingReason> {
        match self.candidate(name)?.status {
            CandidateStatus::Boxed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Names of the boxed enums, sorted.
    pub fn boxed(&self) -> impl Iterator<Item = &str> {
        self.candidates
            .iter()
            .filter(|c| !c.status.is_unboxable())
            .map(|c| c.name.as_str())
    }

    /// One-line summary of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} unboxed, {} boxed, {} round(s), {} method(s) rewritten",
            self.unboxed.len(),
            self.boxed().count(),
            self.rounds,
            self.rewritten_methods
        )
    }
}

impl fmt::Display for UnboxingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for candidate in &self.candidates {
            match (&candidate.status, &candidate.site) {
                (CandidateStatus::Boxed(reason), Some(site)) => {
                    writeln!(f, "  {}: boxed ({}) at {site}", candidate.name, reason.description())?;
                }
                (CandidateStatus::Boxed(reason), None) => {
                    writeln!(f, "  {}: boxed ({})", candidate.name, reason.description())?;
                }
                _ if self.is_unboxed(&candidate.name) => writeln!(f, "  {}: unboxed", candidate.name)?,
                _ => writeln!(f, "  {}: untouched", candidate.name)?,
            }
        }
        Ok(())
    }
}

/// Entry point of the enum unboxing engine.
///
/// Holds the inputs that outlive a single run: configuration, keep rules, the pins
/// shared with other passes and the collaborators subscribed to rewrite records.
#[derive(Debug, Clone, Default)]
pub struct EnumUnboxer {
    config: UnboxingConfig,
    keep: KeepPredicate,
    pins: Arc<PassPins>,
    coordinator: Coordinator,
}

impl EnumUnboxer {
    /// Creates an unboxer with no keep rules and fresh pins.
    #[must_use]
    pub fn new(config: UnboxingConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Sets the keep rules.
    #[must_use]
    pub fn with_keep(mut self, keep: KeepPredicate) -> Self {
        self.keep = keep;
        self
    }

    /// Shares pins with other passes.
    #[must_use]
    pub fn with_pins(mut self, pins: Arc<PassPins>) -> Self {
        self.pins = pins;
        self
    }

    /// Subscribes a collaborator to rewrite records.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn SignatureRewriteListener>) -> Self {
        self.coordinator.subscribe(listener);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &UnboxingConfig {
        &self.config
    }

    /// Returns the pins, including those the engine added.
    #[must_use]
    pub fn pins(&self) -> &PassPins {
        &self.pins
    }

    /// Runs the engine over `program`.
    ///
    /// # Errors
    ///
    /// - [`Error::CheckEnumUnboxed`](crate::Error::CheckEnumUnboxed) if a flagged enum stayed boxed
    /// - [`Error::NotPruned`](crate::Error::NotPruned) if a keep rule retains an unboxed enum
    /// - [`Error::TypeCheck`](crate::Error::TypeCheck) if the rewritten program fails verification
    /// - [`Error::StaleReference`](crate::Error::StaleReference) if a collaborator kept an unresolvable reference
    /// - [`Error::Internal`](crate::Error::Internal) if the analysis does not converge
    pub fn run(&self, program: &mut Program) -> Result<UnboxingReport> {
        let events = EventLog::new();
        let mut candidates = collect(program, &self.keep, &self.pins, &events);

        if !self.config.enabled {
            events.info("enum unboxing disabled");
            return Ok(Self::report(&candidates, None, 0, 0, events));
        }

        events.record(EventKind::PhaseStarted).phase("analyze");
        let facts = Analyzer::new(program, &self.keep, &self.config, &events).run(&mut candidates)?;
        events
            .record(EventKind::PhaseCompleted)
            .phase("analyze")
            .message(format!("{} round(s)", facts.rounds));

        if self.config.debug_logs {
            Self::debug_logs(&candidates, &events);
        }
        check_enum_unboxed(program, &candidates)?;

        let switch_maps_removed = if self.config.remove_switch_maps {
            let maps = find_switch_maps(program, &candidates);
            switchmap::eliminate(program, &maps, &events)
        } else {
            0
        };

        events.record(EventKind::PhaseStarted).phase("rewrite");
        let outcome = Rewriter::new(&candidates, &facts, &self.config, &self.keep, &self.pins, &events).run(program)?;
        events
            .record(EventKind::PhaseCompleted)
            .phase("rewrite")
            .message(format!("{} method(s)", outcome.rewritten_methods));

        let type_warnings = verify(program, &outcome.touched, &self.config, &events)?;

        self.coordinator.broadcast(&outcome.records, &events);
        self.coordinator.check(program)?;

        let mut report = Self::report(&candidates, Some(outcome), facts.rounds, switch_maps_removed, events);
        report.type_warnings = type_warnings;
        Ok(report)
    }

    fn debug_logs(candidates: &CandidateSet, events: &EventLog) {
        let mut unboxed: Vec<&str> = candidates.eligible().map(|c| c.name.as_str()).collect();
        let mut boxed: Vec<&str> = candidates.boxed().map(|c| c.name.as_str()).collect();
        unboxed.sort_unstable();
        boxed.sort_unstable();
        events.info(format!("Unboxed enums: {{{}}}", unboxed.join(", ")));
        events.info(format!("Boxed enums: {{{}}}", boxed.join(", ")));
    }

    fn report(
        candidates: &CandidateSet,
        outcome: Option<RewriteOutcome>,
        rounds: usize,
        switch_maps_removed: usize,
        events: EventLog,
    ) -> UnboxingReport {
        let mut summaries: Vec<CandidateSummary> = candidates
            .iter()
            .map(|c| CandidateSummary {
                name: c.name.clone(),
                status: c.status,
                site: c.boxed_at.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        let outcome = outcome.unwrap_or_default();
        UnboxingReport {
            candidates: summaries,
            unboxed: outcome.unboxed,
            rounds,
            switch_maps_removed,
            shared_utility: outcome.shared_utility,
            local_utilities: outcome.local_utilities,
            records: outcome.records,
            rewritten_methods: outcome.rewritten_methods,
            type_warnings: 0,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        program::{LibraryMethod, Type},
        test::{enum_program, transcript},
    };

    #[test]
    fn test_run_reports_and_logs() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let run = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let c = b.sget(e.constants[2]);
                let ord = b.lib(LibraryMethod::EnumOrdinal, &[c]);
                b.println(ord);
                b.ret();
            });
        });
        let mut program = pb.build();
        let before = transcript(&program, run);
        let report = EnumUnboxer::new(UnboxingConfig::testing()).run(&mut program).unwrap();

        assert_eq!(transcript(&program, run), before);
        assert!(report.is_unboxed("com.example.MyEnum"));
        assert_eq!(report.status("com.example.MyEnum"), Some(CandidateStatus::Eligible));
        assert_eq!(report.reason("com.example.MyEnum"), None);
        let infos = report.events.info_messages();
        assert!(infos.contains(&"Unboxed enums: {com.example.MyEnum}"));
        assert!(infos.contains(&"Boxed enums: {}"));
        assert!(report.summary().starts_with("1 unboxed, 0 boxed"));
    }

    #[test]
    fn test_disabled_leaves_program_untouched() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let run = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let a = b.sget(e.constants[0]);
                b.println(a);
                b.ret();
            });
        });
        let mut program = pb.build();
        let report = EnumUnboxer::new(UnboxingConfig::disabled()).run(&mut program).unwrap();
        assert!(report.unboxed.is_empty());
        assert!(program.is_live_class(e.class));
        assert_eq!(report.status("com.example.MyEnum"), Some(CandidateStatus::Pending));
    }

    #[test]
    fn test_boxed_enum_reports_reason() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let sink = pb.static_field(main, "sink", Type::Object);
        let run = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let a = b.sget(e.constants[0]);
                b.sput(sink, a);
                b.ret();
            });
        });
        let mut program = pb.build();
        let report = EnumUnboxer::new(UnboxingConfig::testing()).run(&mut program).unwrap();
        assert_eq!(report.reason("com.example.MyEnum"), Some(BoxingReason::ObjectEscape));
        assert_eq!(report.boxed().collect::<Vec<_>>(), vec!["com.example.MyEnum"]);
        assert!(report.to_string().contains("com.example.MyEnum: boxed"));
        assert!(program.is_live_class(e.class));
    }
}
