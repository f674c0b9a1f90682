//! Event log for the unboxing pipeline.
//!
//! Every phase appends to a shared [`EventLog`]: candidate decisions, rewrites,
//! synthesized utilities and the `Unboxed enums: {...}` summary lines. Appends
//! take `&self`, so rayon workers record without locking.
//!
//! ```rust,ignore
//! use enumbox::events::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::CandidateBoxed)
//!     .class(enum_class)
//!     .message("com.example.MyEnum: ObjectEscape");
//! log.info("Unboxed enums: {com.example.Other}");
//! println!("{}", log.summary());
//! ```

use std::fmt;

use rustc_hash::FxHashMap;

use crate::program::{ClassId, MethodId};

/// Categories of recorded events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An instruction was rewritten onto the unboxed representation.
    InstructionRewritten,
    /// An instruction was removed.
    InstructionRemoved,
    /// A method signature changed (and possibly its name).
    SignatureChanged,
    /// A field type changed from an enum to `int`.
    FieldTypeChanged,
    /// A static field moved to a local utility class.
    FieldRelocated,
    /// A class initializer residual moved to a local utility class.
    InitializerRelocated,
    /// A class was removed.
    ClassRemoved,
    /// A utility class or method was synthesized.
    UtilitySynthesized,
    /// An existing utility method was reused instead of synthesized.
    UtilityReused,
    /// A legacy switch map was replaced by a direct switch.
    SwitchMapRemoved,

    /// An enum was registered as a candidate.
    CandidateCollected,
    /// A candidate was demoted to boxed.
    CandidateBoxed,
    /// A candidate survived analysis.
    CandidateEligible,
    /// An instance-field plan was computed.
    FieldPlanComputed,

    /// A pipeline phase started.
    PhaseStarted,
    /// A pipeline phase completed.
    PhaseCompleted,
    /// A fixpoint round completed.
    RoundCompleted,

    /// Free-form informational message.
    Info,
    /// Something unexpected but recoverable.
    Warning,
}

impl EventKind {
    /// Returns the default message for events of this kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::InstructionRewritten => "instruction rewritten",
            Self::InstructionRemoved => "instruction removed",
            Self::SignatureChanged => "signature changed",
            Self::FieldTypeChanged => "field type changed",
            Self::FieldRelocated => "field relocated",
            Self::InitializerRelocated => "initializer relocated",
            Self::ClassRemoved => "class removed",
            Self::UtilitySynthesized => "utility synthesized",
            Self::UtilityReused => "utility reused",
            Self::SwitchMapRemoved => "switch map removed",
            Self::CandidateCollected => "candidate collected",
            Self::CandidateBoxed => "candidate boxed",
            Self::CandidateEligible => "candidate eligible",
            Self::FieldPlanComputed => "field plan computed",
            Self::PhaseStarted => "phase started",
            Self::PhaseCompleted => "phase completed",
            Self::RoundCompleted => "round completed",
            Self::Info => "info",
            Self::Warning => "warning",
        }
    }

    /// Returns true if this event changed the program.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::InstructionRewritten
                | Self::InstructionRemoved
                | Self::SignatureChanged
                | Self::FieldTypeChanged
                | Self::FieldRelocated
                | Self::InitializerRelocated
                | Self::ClassRemoved
                | Self::UtilitySynthesized
                | Self::UtilityReused
                | Self::SwitchMapRemoved
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// What kind of event this is.
    pub kind: EventKind,
    /// The method the event happened in, if any.
    pub method: Option<MethodId>,
    /// The class the event concerns, if any.
    pub class: Option<ClassId>,
    /// Human-readable message.
    pub message: String,
    /// Pipeline phase, for phase markers.
    pub phase: Option<&'static str>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            class: None,
            message: message.into(),
            phase: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Pending event returned by [`EventLog::record`].
///
/// The event is appended when the builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<MethodId>,
    class: Option<ClassId>,
    message: Option<String>,
    phase: Option<&'static str>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            class: None,
            message: None,
            phase: None,
        }
    }

    /// Attaches the method the event happened in.
    pub fn method(mut self, method: MethodId) -> Self {
        self.method = Some(method);
        self
    }

    /// Attaches the class the event concerns.
    pub fn class(mut self, class: ClassId) -> Self {
        self.class = Some(class);
        self
    }

    /// Replaces the kind's default description.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attaches the pipeline phase.
    pub fn phase(mut self, phase: &'static str) -> Self {
        self.phase = Some(phase);
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            method: self.method.take(),
            class: self.class.take(),
            message,
            phase: self.phase.take(),
        });
    }
}

/// Append-only log of one unboxing run.
///
/// Statistics are derived from the events rather than tracked separately.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let copy = Self::new();
        for (_, event) in &self.events {
            copy.events.push(event.clone());
        }
        copy
    }
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no events were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts an event of the given kind; it is appended on drop.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Returns the number of events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Iterates over events of the given kind, in order.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter_map(move |(_, e)| (e.kind == kind).then_some(e))
    }

    /// Iterates over warning events, in order.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Returns the messages of informational events, in order.
    #[must_use]
    pub fn info_messages(&self) -> Vec<&str> {
        self.filter_kind(EventKind::Info)
            .map(|e| e.message.as_str())
            .collect()
    }

    /// Returns event counts grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> FxHashMap<EventKind, usize> {
        let mut counts = FxHashMap::default();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// One-line summary of the transformation counts, e.g.
    /// `"2 class removed, 5 instruction rewritten"`.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(kind, _)| kind.is_transformation())
            .map(|(kind, count)| format!("{count} {kind}"))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_records_on_drop() {
        let log = EventLog::new();
        log.record(EventKind::CandidateBoxed)
            .class(ClassId::new(2))
            .message("com.example.Color: ObjectEscape");
        log.record(EventKind::SignatureChanged).method(MethodId::new(1));

        assert_eq!(log.len(), 2);
        assert!(log.has(EventKind::CandidateBoxed));
        assert!(!log.has(EventKind::CandidateEligible));

        let boxed: Vec<_> = log.filter_kind(EventKind::CandidateBoxed).collect();
        assert_eq!(boxed[0].class, Some(ClassId::new(2)));
        assert_eq!(boxed[0].message, "com.example.Color: ObjectEscape");

        let changed: Vec<_> = log.filter_kind(EventKind::SignatureChanged).collect();
        assert_eq!(changed[0].method, Some(MethodId::new(1)));
        assert_eq!(changed[0].message, "signature changed");
    }

    #[test]
    fn test_phase_markers() {
        let log = EventLog::new();
        log.record(EventKind::PhaseStarted).phase("analyze");
        log.record(EventKind::PhaseCompleted).phase("analyze");
        let phases: Vec<_> = log
            .filter_kind(EventKind::PhaseStarted)
            .filter_map(|e| e.phase)
            .collect();
        assert_eq!(phases, vec!["analyze"]);
        assert_eq!(log.summary(), "2 events");
    }

    #[test]
    fn test_summary_counts_transformations() {
        let log = EventLog::new();
        assert_eq!(log.summary(), "no events");
        log.info("only info");
        assert_eq!(log.summary(), "1 events");
        log.record(EventKind::ClassRemoved);
        log.record(EventKind::ClassRemoved);
        log.record(EventKind::UtilitySynthesized);
        assert_eq!(log.summary(), "1 utility synthesized, 2 class removed");
        assert_eq!(log.count_by_kind().get(&EventKind::ClassRemoved), Some(&2));
    }

    #[test]
    fn test_info_messages_keep_order() {
        let log = EventLog::new();
        log.info("Unboxed enums: {a.A}");
        log.warn("unexpected");
        log.info("Boxed enums: {}");
        assert_eq!(log.info_messages(), vec!["Unboxed enums: {a.A}", "Boxed enums: {}"]);
        assert_eq!(log.warnings().count(), 1);

        let copy = log.clone();
        assert_eq!(copy.info_messages(), log.info_messages());
    }

    #[test]
    fn test_concurrent_append() {
        use rayon::prelude::*;

        let log = EventLog::new();
        (0..64).into_par_iter().for_each(|i| log.info(format!("event {i}")));
        assert_eq!(log.len(), 64);
        assert_eq!(log.count_kind(EventKind::Info), 64);
    }
}
