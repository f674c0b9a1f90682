//! Cross-pass coordination.
//!
//! Other optimizations hold symbolic references into the program between their
//! own phases. When unboxing retypes, renames or removes a member, each
//! subscribed collaborator receives the list of [`RewriteRecord`]s and updates
//! its references before it runs again. A collaborator that misses an update
//! holds a reference that no longer resolves; [`Coordinator::check`] reports it
//! as the runtime error it would become.

use std::{fmt, sync::Arc};

use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    events::{EventKind, EventLog},
    program::{FieldReference, MethodReference, Program},
    Error, Result,
};

/// One member change made by the rewriter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RewriteRecord {
    /// A method was retyped or renamed.
    Method {
        /// Reference before the rewrite.
        old: MethodReference,
        /// Reference after the rewrite.
        new: MethodReference,
    },
    /// A field was retyped or moved.
    Field {
        /// Reference before the rewrite.
        old: FieldReference,
        /// Reference after the rewrite.
        new: FieldReference,
    },
    /// A method was removed with its enum.
    MethodRemoved(MethodReference),
    /// A field was removed with its enum.
    FieldRemoved(FieldReference),
}

impl fmt::Display for RewriteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteRecord::Method { old, new } => write!(f, "{old} -> {new}"),
            RewriteRecord::Field { old, new } => write!(f, "{old} -> {new}"),
            RewriteRecord::MethodRemoved(old) => write!(f, "{old} removed"),
            RewriteRecord::FieldRemoved(old) => write!(f, "{old} removed"),
        }
    }
}

/// A pass that holds member references across the unboxing pass.
pub trait SignatureRewriteListener: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Applies the rewrite records to the listener's own references.
    fn on_rewrite(&self, records: &[RewriteRecord]);

    /// Method references currently held.
    fn method_references(&self) -> Vec<MethodReference>;

    /// Field references currently held.
    fn field_references(&self) -> Vec<FieldReference> {
        Vec::new()
    }
}

/// Lookup of record substitutions. `None` means the member was removed.
#[derive(Debug, Default)]
pub struct Substitution {
    methods: FxHashMap<MethodReference, Option<MethodReference>>,
    fields: FxHashMap<FieldReference, Option<FieldReference>>,
}

impl Substitution {
    /// Indexes `records`.
    #[must_use]
    pub fn new(records: &[RewriteRecord]) -> Self {
        let mut substitution = Self::default();
        for record in records {
            match record {
                RewriteRecord::Method { old, new } => {
                    substitution.methods.insert(old.clone(), Some(new.clone()));
                }
                RewriteRecord::Field { old, new } => {
                    substitution.fields.insert(old.clone(), Some(new.clone()));
                }
                RewriteRecord::MethodRemoved(old) => {
                    substitution.methods.insert(old.clone(), None);
                }
                RewriteRecord::FieldRemoved(old) => {
                    substitution.fields.insert(old.clone(), None);
                }
            }
        }
        substitution
    }

    /// Returns the replacement for `reference`: itself if unchanged, `None` if removed.
    #[must_use]
    pub fn method(&self, reference: &MethodReference) -> Option<MethodReference> {
        match self.methods.get(reference) {
            Some(replacement) => replacement.clone(),
            None => Some(reference.clone()),
        }
    }

    /// Returns the replacement for `reference`: itself if unchanged, `None` if removed.
    #[must_use]
    pub fn field(&self, reference: &FieldReference) -> Option<FieldReference> {
        match self.fields.get(reference) {
            Some(replacement) => replacement.clone(),
            None => Some(reference.clone()),
        }
    }
}

/// Fans rewrite records out to the subscribed collaborators.
#[derive(Default, Clone)]
pub struct Coordinator {
    listeners: Vec<Arc<dyn SignatureRewriteListener>>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.listeners.iter().map(|l| l.name())).finish()
    }
}

impl Coordinator {
    /// Creates a coordinator without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a collaborator.
    pub fn subscribe(&mut self, listener: Arc<dyn SignatureRewriteListener>) {
        self.listeners.push(listener);
    }

    /// Returns the number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true without subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers `records` to every subscriber.
    pub fn broadcast(&self, records: &[RewriteRecord], events: &EventLog) {
        if records.is_empty() {
            return;
        }
        for listener in &self.listeners {
            listener.on_rewrite(records);
            events
                .record(EventKind::Info)
                .phase("coordinate")
                .message(format!("{}: {} rewrite record(s)", listener.name(), records.len()));
        }
    }

    /// Checks that every reference a subscriber holds still resolves.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleReference`] for the first reference that does not.
    pub fn check(&self, program: &Program) -> Result<()> {
        for listener in &self.listeners {
            let mut methods = listener.method_references();
            methods.sort();
            if let Some(stale) = methods
                .into_iter()
                .find(|r| program.resolve_method_reference(r).is_none())
            {
                return Err(Error::StaleReference {
                    kind: "NoSuchMethodError",
                    reference: stale.to_string(),
                    holder: listener.name().to_string(),
                });
            }
            let mut fields = listener.field_references();
            fields.sort();
            if let Some(stale) = fields
                .into_iter()
                .find(|r| program.resolve_field_reference(r).is_none())
            {
                return Err(Error::StaleReference {
                    kind: "NoSuchFieldError",
                    reference: stale.to_string(),
                    holder: listener.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

// ── Collaborators ──────────────────────────────────────────────────────

/// The inliner's call-site remapping: the callee each call site was bound to.
#[derive(Debug, Default)]
pub struct InlinerRemapping {
    sites: DashMap<MethodReference, MethodReference>,
}

impl InlinerRemapping {
    /// Creates an empty remapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that calls from `caller` are bound to `callee`.
    pub fn bind(&self, caller: MethodReference, callee: MethodReference) {
        self.sites.insert(caller, callee);
    }

    /// Returns the callee bound for `caller`.
    #[must_use]
    pub fn callee(&self, caller: &MethodReference) -> Option<MethodReference> {
        self.sites.get(caller).map(|entry| entry.value().clone())
    }
}

impl SignatureRewriteListener for InlinerRemapping {
    fn name(&self) -> &str {
        "inliner"
    }

    fn on_rewrite(&self, records: &[RewriteRecord]) {
        let substitution = Substitution::new(records);
        let entries: Vec<(MethodReference, MethodReference)> = self
            .sites
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.sites.clear();
        for (caller, callee) in entries {
            if let (Some(caller), Some(callee)) = (substitution.method(&caller), substitution.method(&callee)) {
                self.sites.insert(caller, callee);
            }
        }
    }

    fn method_references(&self) -> Vec<MethodReference> {
        self.sites
            .iter()
            .flat_map(|entry| [entry.key().clone(), entry.value().clone()])
            .collect()
    }
}

/// The class staticizer's call graph between candidate methods.
#[derive(Debug, Default)]
pub struct StaticizerCallGraph {
    edges: DashMap<MethodReference, FxHashSet<MethodReference>>,
}

impl StaticizerCallGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an edge.
    pub fn add_edge(&self, caller: MethodReference, callee: MethodReference) {
        self.edges.entry(caller).or_default().insert(callee);
    }

    /// Returns the callees of `caller`, sorted.
    #[must_use]
    pub fn callees(&self, caller: &MethodReference) -> Vec<MethodReference> {
        let mut callees: Vec<MethodReference> = self
            .edges
            .get(caller)
            .map(|entry| entry.value().iter().cloned().collect())
            .unwrap_or_default();
        callees.sort();
        callees
    }
}

impl SignatureRewriteListener for StaticizerCallGraph {
    fn name(&self) -> &str {
        "class-staticizer"
    }

    fn on_rewrite(&self, records: &[RewriteRecord]) {
        let substitution = Substitution::new(records);
        let entries: Vec<(MethodReference, FxHashSet<MethodReference>)> = self
            .edges
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.edges.clear();
        for (caller, callees) in entries {
            let Some(caller) = substitution.method(&caller) else {
                continue;
            };
            let callees: FxHashSet<MethodReference> = callees.iter().filter_map(|c| substitution.method(c)).collect();
            self.edges.entry(caller).or_default().extend(callees);
        }
    }

    fn method_references(&self) -> Vec<MethodReference> {
        self.edges
            .iter()
            .flat_map(|entry| {
                std::iter::once(entry.key().clone())
                    .chain(entry.value().iter().cloned())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// Member rebinding's cache of references rebound to a more precise holder.
#[derive(Debug, Default)]
pub struct MemberRebindingCache {
    methods: DashMap<MethodReference, MethodReference>,
    fields: DashMap<FieldReference, FieldReference>,
}

impl MemberRebindingCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a rebound method reference.
    pub fn rebind_method(&self, original: MethodReference, rebound: MethodReference) {
        self.methods.insert(original, rebound);
    }

    /// Records a rebound field reference.
    pub fn rebind_field(&self, original: FieldReference, rebound: FieldReference) {
        self.fields.insert(original, rebound);
    }

    /// Returns the rebound form of a method reference.
    #[must_use]
    pub fn method(&self, original: &MethodReference) -> Option<MethodReference> {
        self.methods.get(original).map(|entry| entry.value().clone())
    }

    /// Returns the rebound form of a field reference.
    #[must_use]
    pub fn field(&self, original: &FieldReference) -> Option<FieldReference> {
        self.fields.get(original).map(|entry| entry.value().clone())
    }
}

impl SignatureRewriteListener for MemberRebindingCache {
    fn name(&self) -> &str {
        "member-rebinding"
    }

    fn on_rewrite(&self, records: &[RewriteRecord]) {
        let substitution = Substitution::new(records);
        let methods: Vec<(MethodReference, MethodReference)> = self
            .methods
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.methods.clear();
        for (original, rebound) in methods {
            if let (Some(original), Some(rebound)) = (substitution.method(&original), substitution.method(&rebound)) {
                self.methods.insert(original, rebound);
            }
        }
        let fields: Vec<(FieldReference, FieldReference)> = self
            .fields
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.fields.clear();
        for (original, rebound) in fields {
            if let (Some(original), Some(rebound)) = (substitution.field(&original), substitution.field(&rebound)) {
                self.fields.insert(original, rebound);
            }
        }
    }

    fn method_references(&self) -> Vec<MethodReference> {
        self.methods
            .iter()
            .flat_map(|entry| [entry.key().clone(), entry.value().clone()])
            .collect()
    }

    fn field_references(&self) -> Vec<FieldReference> {
        self.fields
            .iter()
            .flat_map(|entry| [entry.key().clone(), entry.value().clone()])
            .collect()
    }
}
