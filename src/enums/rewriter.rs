//! Rewriting of unboxed enums.
//!
//! Once the analysis has settled, every eligible enum is replaced by `int`:
//!
//! 1. the shared utility and one local utility per enum are synthesized,
//! 2. signatures and field types outside the enums are retyped,
//! 3. every remaining body is rewritten in parallel against a read-only view
//!    of the program, and the results are committed in method order,
//! 4. the enum classes are removed and unused shims pruned.
//!
//! A body rewrite replaces each use site the analyzer accepted with its
//! encoded counterpart, retypes values and instruction types, and finally
//! patches slots where a `null` reference now meets an `int` (or the reverse).

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    enums::{
        analyzer::AnalysisFacts,
        candidate::CandidateSet,
        collector::{constant_fields, is_canonical_member},
        config::UnboxingConfig,
        coordinator::RewriteRecord,
        fields::{to_string_override, FieldMapping, InstanceFieldPlan},
        local::{synthesize_local_utility, LocalUtility},
        nullness::{AlwaysNull, NullParams},
        signature::{rewrite_signatures, unboxed_type, SignatureChanges},
        utility::{ensure_shared_utility, prune_shared_utility, SharedUtility, Shim},
    },
    events::{EventKind, EventLog},
    program::{
        BlockId, Callee, ClassId, CmpKind, Code, ConstValue, FieldId, FieldReference, Instr, InvokeKind,
        KeepFlags, KeepPredicate, KeepTarget, LibraryMethod, MethodDef, MethodId, MethodReference, PassPins,
        Program, Type, ValueId,
    },
    Error, Result,
};

/// What the rewriter produced.
#[derive(Debug, Clone, Default)]
pub struct RewriteOutcome {
    /// Unboxed enum names, sorted.
    pub unboxed: Vec<String>,
    /// Member changes other passes must apply.
    pub records: Vec<RewriteRecord>,
    /// Name of the shared utility class, if it survived pruning.
    pub shared_utility: Option<String>,
    /// Names of the local utility classes.
    pub local_utilities: Vec<String>,
    /// Bodies changed.
    pub rewritten_methods: usize,
    /// Methods whose code the rewriter produced or changed.
    pub touched: Vec<MethodId>,
}

/// Declared type of each operand slot of `instr`, aligned with [`Instr::operands`].
///
/// Comparison operands have no declared slot type and yield `None`.
#[must_use]
pub fn operand_slot_types(program: &Program, method: &MethodDef, code: &Code, instr: &Instr) -> Vec<Option<Type>> {
    match instr {
        Instr::Const { .. }
        | Instr::Arg { .. }
        | Instr::Goto { .. }
        | Instr::StaticGet { .. }
        | Instr::NewInstance { .. }
        | Instr::InitClass { .. } => Vec::new(),
        Instr::Binary { .. } | Instr::Compare { .. } => vec![None, None],
        Instr::If { rhs, .. } => {
            let mut slots = vec![None];
            slots.extend(rhs.iter().map(|_| None));
            slots
        }
        Instr::Switch { .. } | Instr::NewArray { .. } => vec![Some(Type::Int)],
        Instr::Throw { .. }
        | Instr::CheckCast { .. }
        | Instr::InstanceOf { .. }
        | Instr::InstanceGet { .. }
        | Instr::ArrayLength { .. } => vec![None],
        Instr::Return { value } => value.iter().map(|_| Some(method.ret.clone())).collect(),
        Instr::StaticPut { field, .. } => vec![Some(program.field(*field).ty.clone())],
        Instr::InstancePut { field, .. } => vec![None, Some(program.field(*field).ty.clone())],
        Instr::NewMultiArray { dims, .. } => dims.iter().map(|_| Some(Type::Int)).collect(),
        Instr::NewArrayFilled { element, values, .. } => values.iter().map(|_| Some(element.clone())).collect(),
        Instr::ArrayGet { .. } => vec![None, Some(Type::Int)],
        Instr::ArrayPut { array, .. } => vec![None, Some(Type::Int), code.ty(*array).element().cloned()],
        Instr::Invoke { callee, args, .. } => match callee {
            Callee::Program(target) => {
                let def = program.method(*target);
                (0..args.len()).map(|i| def.arg_type(i)).collect()
            }
            Callee::Library(target) => {
                let types = target.operand_types();
                (0..args.len()).map(|i| types.get(i).cloned()).collect()
            }
            Callee::Missing(_) => args.iter().map(|_| None).collect(),
        },
    }
}

/// Rewrites the eligible candidates of a settled analysis.
pub struct Rewriter<'a> {
    candidates: &'a CandidateSet,
    facts: &'a AnalysisFacts,
    config: &'a UnboxingConfig,
    keep: &'a KeepPredicate,
    pins: &'a PassPins,
    events: &'a EventLog,
}

impl<'a> Rewriter<'a> {
    /// Creates a rewriter.
    #[must_use]
    pub fn new(
        candidates: &'a CandidateSet,
        facts: &'a AnalysisFacts,
        config: &'a UnboxingConfig,
        keep: &'a KeepPredicate,
        pins: &'a PassPins,
        events: &'a EventLog,
    ) -> Self {
        Self {
            candidates,
            facts,
            config,
            keep,
            pins,
            events,
        }
    }

    /// Unboxes every eligible candidate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotPruned`] if a keep rule forbids removing an unboxed
    /// enum and [`UnboxingConfig::allow_not_pruned_unboxed_enums`] is off, and
    /// [`Error::Internal`] if a body does not match what the analysis accepted.
    pub fn run(&self, program: &mut Program) -> Result<RewriteOutcome> {
        let mut unboxed_list: Vec<(String, ClassId)> = self
            .candidates
            .eligible()
            .filter(|c| program.is_live_class(c.class))
            .map(|c| (c.name.clone(), c.class))
            .collect();
        unboxed_list.sort();
        let Some((anchor, _)) = unboxed_list.first().cloned() else {
            return Ok(RewriteOutcome::default());
        };

        let shells = self.unprunable(&unboxed_list)?;
        let unboxed: FxHashSet<ClassId> = unboxed_list.iter().map(|(_, c)| *c).collect();
        let mut plans: FxHashMap<ClassId, InstanceFieldPlan> = FxHashMap::default();
        for (name, class) in &unboxed_list {
            let plan = self
                .candidates
                .lookup(*class)
                .and_then(|c| c.plan.clone())
                .ok_or_else(|| internal_error!("no instance-field plan for {}", name))?;
            plans.insert(*class, plan);
        }
        let before = MemberSnapshot::capture(program, &unboxed_list);
        let tables = EnumTables::index(program, &unboxed_list);

        let shared = ensure_shared_utility(program, &anchor, self.pins, self.events)?;
        let mut locals: FxHashMap<ClassId, LocalUtility> = FxHashMap::default();
        for (_, class) in &unboxed_list {
            let local = synthesize_local_utility(program, *class, &plans[class], &unboxed, self.pins, self.events)?;
            locals.insert(*class, local);
        }
        let changes = rewrite_signatures(program, &unboxed, self.events);

        // ── Bodies ─────────────────────────────────────────────────────
        let rewritten: Vec<(MethodId, Code, usize)> = {
            let cx = BodyContext {
                program: &*program,
                unboxed: &unboxed,
                tables: &tables,
                plans: &plans,
                locals: &locals,
                shared: &shared,
                changes: &changes,
                null_params: &self.facts.null_params,
            };
            let methods: Vec<MethodId> = program
                .methods_with_code()
                .into_iter()
                .filter(|m| cx.is_rewritten(*m))
                .collect();
            let results: Vec<Option<(MethodId, Code, usize)>> = methods
                .par_iter()
                .map(|m| cx.rewrite(*m).map(|r| r.map(|(code, count)| (*m, code, count))))
                .collect::<Result<Vec<_>>>()?;
            results.into_iter().flatten().collect()
        };
        let mut touched = Vec::with_capacity(rewritten.len());
        for (method, code, count) in rewritten {
            program.method_mut(method).code = Some(code);
            self.events
                .record(EventKind::InstructionRewritten)
                .method(method)
                .phase("rewrite")
                .message(format!("{}: {count} use site(s)", program.method_reference(method)));
            touched.push(method);
        }
        let rewritten_methods = touched.len();
        touched.extend(locals.values().flat_map(|l| program.class(l.class).methods.clone()));
        touched.extend(shared.methods().map(|(_, m)| m));

        // ── Pruning ────────────────────────────────────────────────────
        for (name, class) in &unboxed_list {
            if shells.contains(class) {
                let def = program.class(*class);
                for method in def.methods.clone() {
                    program.remove_method(method);
                }
                for field in program.class(*class).fields.clone() {
                    program.remove_field(field);
                }
                self.events.warn(format!("{name} is unboxed but kept; only an empty shell remains"));
                continue;
            }
            program.remove_class(*class);
            self.events
                .record(EventKind::ClassRemoved)
                .class(*class)
                .phase("rewrite")
                .message(format!("{name}: unboxed"));
        }
        prune_shared_utility(program, &shared, self.events);
        touched.retain(|m| program.is_live_method(*m));

        let mut records = before.records(program);
        records.extend(signature_records(&changes, &before));

        let mut local_utilities: Vec<String> = locals
            .values()
            .map(|l| program.class(l.class).name.clone())
            .collect();
        local_utilities.sort();
        Ok(RewriteOutcome {
            unboxed: unboxed_list.into_iter().map(|(name, _)| name).collect(),
            records,
            shared_utility: program
                .is_live_class(shared.class)
                .then(|| program.class(shared.class).name.clone()),
            local_utilities,
            rewritten_methods,
            touched,
        })
    }

    /// Returns the unboxed enums a keep rule forbids removing.
    fn unprunable(&self, unboxed: &[(String, ClassId)]) -> Result<FxHashSet<ClassId>> {
        let mut shells = FxHashSet::default();
        for (name, class) in unboxed {
            let kept = self
                .keep
                .flags(KeepTarget::Class(*class))
                .is_some_and(|flags| !flags.contains(KeepFlags::ALLOW_SHRINKING));
            if !kept {
                continue;
            }
            if !self.config.allow_not_pruned_unboxed_enums {
                return Err(Error::NotPruned(name.clone()));
            }
            shells.insert(*class);
        }
        Ok(shells)
    }
}

fn signature_records(changes: &SignatureChanges, before: &MemberSnapshot) -> Vec<RewriteRecord> {
    let mut records = Vec::new();
    for change in &changes.methods {
        records.push(RewriteRecord::Method {
            old: change.old.clone(),
            new: change.new.clone(),
        });
    }
    for change in &changes.fields {
        if before.fields.iter().any(|(f, _)| *f == change.field) {
            continue;
        }
        records.push(RewriteRecord::Field {
            old: change.old.clone(),
            new: change.new.clone(),
        });
    }
    records
}

/// References of the unboxed enums' members before anything moved.
struct MemberSnapshot {
    methods: Vec<(MethodId, MethodReference)>,
    fields: Vec<(FieldId, FieldReference)>,
}

impl MemberSnapshot {
    fn capture(program: &Program, unboxed: &[(String, ClassId)]) -> Self {
        let mut methods = Vec::new();
        let mut fields = Vec::new();
        for (_, class) in unboxed {
            let def = program.class(*class);
            methods.extend(def.methods.iter().map(|m| (*m, program.method_reference(*m))));
            fields.extend(def.fields.iter().map(|f| (*f, program.field_reference(*f))));
        }
        Self { methods, fields }
    }

    /// Moved members map to their new reference, removed ones are reported removed.
    fn records(&self, program: &Program) -> Vec<RewriteRecord> {
        let mut records = Vec::new();
        for (method, old) in &self.methods {
            if !program.is_live_method(*method) {
                records.push(RewriteRecord::MethodRemoved(old.clone()));
                continue;
            }
            let new = program.method_reference(*method);
            if new != *old {
                records.push(RewriteRecord::Method { old: old.clone(), new });
            }
        }
        for (field, old) in &self.fields {
            if !program.is_live_field(*field) {
                records.push(RewriteRecord::FieldRemoved(old.clone()));
                continue;
            }
            let new = program.field_reference(*field);
            if new != *old {
                records.push(RewriteRecord::Field { old: old.clone(), new });
            }
        }
        records
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Canonical {
    Values,
    ValueOf,
}

/// Member lookups of the unboxed enums, taken before they are moved or removed.
#[derive(Debug, Default)]
struct EnumTables {
    counts: FxHashMap<ClassId, i32>,
    constants: FxHashMap<FieldId, (ClassId, i32)>,
    values_fields: FxHashMap<FieldId, ClassId>,
    canonical: FxHashMap<MethodId, (ClassId, Canonical)>,
    to_string: FxHashMap<MethodId, ClassId>,
}

impl EnumTables {
    fn index(program: &Program, unboxed: &[(String, ClassId)]) -> Self {
        let mut tables = Self::default();
        for (_, class) in unboxed {
            let constants = constant_fields(program, *class);
            tables
                .counts
                .insert(*class, i32::try_from(constants.len()).unwrap_or(i32::MAX));
            for (ordinal, field) in constants.iter().enumerate() {
                let encoded = i32::try_from(ordinal + 1).unwrap_or(i32::MAX);
                tables.constants.insert(*field, (*class, encoded));
            }
            if let Some(field) = program.field_by_name(*class, "$VALUES") {
                tables.values_fields.insert(field, *class);
            }
            for method in &program.class(*class).methods {
                if is_canonical_member(program, *method) {
                    let kind = if program.method(*method).name == "values" {
                        Canonical::Values
                    } else {
                        Canonical::ValueOf
                    };
                    tables.canonical.insert(*method, (*class, kind));
                }
            }
            if let Some(method) = to_string_override(program, *class) {
                tables.to_string.insert(method, *class);
            }
        }
        tables
    }
}

/// Read-only state shared by the parallel body rewrites.
struct BodyContext<'c> {
    program: &'c Program,
    unboxed: &'c FxHashSet<ClassId>,
    tables: &'c EnumTables,
    plans: &'c FxHashMap<ClassId, InstanceFieldPlan>,
    locals: &'c FxHashMap<ClassId, LocalUtility>,
    shared: &'c SharedUtility,
    changes: &'c SignatureChanges,
    null_params: &'c NullParams,
}

impl BodyContext<'_> {
    fn is_rewritten(&self, method: MethodId) -> bool {
        let holder = self.program.method(method).holder;
        if self.unboxed.contains(&holder) || holder == self.shared.class {
            return false;
        }
        match self.locals.values().find(|l| l.class == holder) {
            Some(local) => local.initializer == Some(method),
            None => true,
        }
    }

    /// Rewrites one body. Returns `None` if nothing changed.
    fn rewrite(&self, method: MethodId) -> Result<Option<(Code, usize)>> {
        let Some(original) = self.program.method(method).code.as_ref() else {
            return Ok(None);
        };
        let always_null = AlwaysNull::compute(method, original, self.null_params);
        let mut body = BodyRewrite {
            cx: self,
            method,
            code: original.clone(),
            always_null,
            use_counts: FxHashMap::default(),
            replacements: FxHashMap::default(),
            retyped: FxHashMap::default(),
            class_of: FxHashMap::default(),
            rewritten: 0,
        };
        body.ordinal_switches();
        body.use_counts = body.code.use_counts();
        body.walk()?;
        body.apply_replacements();
        body.retype();
        body.fix_null_slots();
        if body.code == *original {
            return Ok(None);
        }
        body.code.remove_dead_definitions();
        Ok(Some((body.code, body.rewritten)))
    }
}

/// Per-body rewrite state.
struct BodyRewrite<'b, 'c> {
    cx: &'b BodyContext<'c>,
    method: MethodId,
    code: Code,
    always_null: AlwaysNull,
    use_counts: FxHashMap<ValueId, usize>,
    replacements: FxHashMap<ValueId, ValueId>,
    retyped: FxHashMap<ValueId, Type>,
    class_of: FxHashMap<ValueId, ClassId>,
    rewritten: usize,
}

impl BodyRewrite<'_, '_> {
    /// The unboxed enum a value of this body belongs to, at array depth 0.
    fn unboxed_class(&self, value: ValueId) -> Option<ClassId> {
        match self.code.ty(value) {
            Type::Class(class) if self.cx.unboxed.contains(class) => Some(*class),
            _ => None,
        }
    }

    fn is_unused(&self, value: Option<ValueId>) -> bool {
        value.map_or(true, |v| self.use_counts.get(&v).copied().unwrap_or(0) == 0)
    }

    fn local(&self, class: ClassId) -> Result<&LocalUtility> {
        self.cx
            .locals
            .get(&class)
            .ok_or_else(|| internal_error!("no local utility for {}", self.cx.program.class(class).name))
    }

    fn constant(&mut self, out: &mut Vec<Instr>, value: ConstValue) -> ValueId {
        let dest = self.code.new_value(value.ty());
        out.push(Instr::Const { dest, value });
        dest
    }

    fn call(out: &mut Vec<Instr>, dest: Option<ValueId>, target: MethodId, args: Vec<ValueId>) {
        out.push(Instr::Invoke {
            dest,
            kind: InvokeKind::Static,
            callee: Callee::Program(target),
            args,
        });
    }

    fn shim(&self, out: &mut Vec<Instr>, dest: Option<ValueId>, shim: Shim, args: Vec<ValueId>) {
        Self::call(out, dest, self.cx.shared.method(shim), args);
    }

    /// Initializes the local utility where the enum's class initializer would have run.
    fn init_trigger(&self, out: &mut Vec<Instr>, class: ClassId) -> Result<()> {
        let local = self.local(class)?;
        if local.initializer.is_some_and(|init| init != self.method) {
            out.push(Instr::InitClass { class: local.class });
        }
        Ok(())
    }

    /// `switch (e.ordinal())` dispatches on the encoded value instead.
    fn ordinal_switches(&mut self) {
        let defs = self.code.definitions();
        let mut found: Vec<(BlockId, ValueId)> = Vec::new();
        for (block, body) in self.code.iter_blocks() {
            let Some(Instr::Switch { value, .. }) = body.terminator() else {
                continue;
            };
            let Some(Instr::Invoke {
                callee: Callee::Library(LibraryMethod::EnumOrdinal),
                args,
                ..
            }) = self.code.defining_instr(&defs, *value)
            else {
                continue;
            };
            if let Some(scrutinee) = args.first().filter(|a| self.unboxed_class(**a).is_some()) {
                found.push((block, *scrutinee));
            }
        }
        for (block, scrutinee) in found {
            if let Some(Instr::Switch {
                value, keys, targets, ..
            }) = self.code.block_mut(block).instrs.last_mut()
            {
                let (new_keys, new_targets): (Vec<i32>, Vec<BlockId>) = keys
                    .iter()
                    .zip(targets.iter())
                    .filter_map(|(key, target)| key.checked_add(1).map(|k| (k, *target)))
                    .unzip();
                *value = scrutinee;
                *keys = new_keys;
                *targets = new_targets;
                self.rewritten += 1;
            }
        }
    }

    fn walk(&mut self) -> Result<()> {
        let mut blocks = std::mem::take(&mut self.code.blocks);
        let result = blocks.iter_mut().try_for_each(|block| {
            let instrs = std::mem::take(&mut block.instrs);
            let mut out = Vec::with_capacity(instrs.len());
            for instr in instrs {
                self.instr(instr, &mut out)?;
            }
            block.instrs = out;
            Ok(())
        });
        self.code.blocks = blocks;
        result
    }

    fn instr(&mut self, instr: Instr, out: &mut Vec<Instr>) -> Result<()> {
        let cx = self.cx;
        let changed = match instr {
            Instr::Const {
                dest,
                value: ConstValue::Class(Type::Class(class)),
            } if cx.unboxed.contains(&class) => {
                self.class_of.insert(dest, class);
                true
            }
            Instr::StaticGet { dest, field } if cx.tables.constants.contains_key(&field) => {
                let (class, encoded) = cx.tables.constants[&field];
                self.init_trigger(out, class)?;
                out.push(Instr::Const {
                    dest,
                    value: ConstValue::Int(encoded),
                });
                true
            }
            Instr::StaticGet { dest, field } if cx.tables.values_fields.contains_key(&field) => {
                let class = cx.tables.values_fields[&field];
                self.init_trigger(out, class)?;
                let count = self.constant(out, ConstValue::Int(cx.tables.counts[&class]));
                self.shim(out, Some(dest), Shim::Values, vec![count]);
                true
            }
            Instr::InstanceGet { dest, field, object } if cx.unboxed.contains(&cx.program.field(field).holder) => {
                self.field_read(out, dest, field, object)?;
                true
            }
            Instr::Invoke {
                dest,
                kind,
                callee: Callee::Program(target),
                args,
            } => self.program_call(out, dest, kind, target, args)?,
            Instr::Invoke {
                dest,
                kind,
                callee: Callee::Library(target),
                args,
            } => self.library_call(out, dest, kind, target, args)?,
            Instr::CheckCast { dest, value, ty } if unboxed_type(&ty, cx.unboxed).is_some() => {
                self.replacements.insert(dest, value);
                true
            }
            Instr::InstanceOf { dest, value, ty } if unboxed_type(&ty, cx.unboxed).is_some() => {
                let absent = if ty.dimensions() == 0 {
                    ConstValue::Int(0)
                } else {
                    ConstValue::Null
                };
                let absent = self.constant(out, absent);
                out.push(Instr::Compare {
                    dest,
                    cmp: CmpKind::Ne,
                    lhs: value,
                    rhs: absent,
                });
                true
            }
            Instr::InitClass { class } if cx.unboxed.contains(&class) => {
                self.init_trigger(out, class)?;
                true
            }
            other => {
                out.push(other);
                false
            }
        };
        if changed {
            self.rewritten += 1;
        }
        Ok(())
    }

    fn field_read(&mut self, out: &mut Vec<Instr>, dest: ValueId, field: FieldId, object: ValueId) -> Result<()> {
        let program = self.cx.program;
        let holder = program.field(field).holder;
        let mapping = self
            .cx
            .plans
            .get(&holder)
            .and_then(|plan| plan.mapping(field))
            .ok_or_else(|| internal_error!("no mapping for {}", program.field_reference(field)))?;
        match mapping {
            FieldMapping::Ordinal => self.shim(out, Some(dest), Shim::Ordinal, vec![object]),
            FieldMapping::Constant(value) => {
                self.shim(out, None, Shim::ZeroCheck, vec![object]);
                let value = match value {
                    ConstValue::Null if unboxed_type(self.code.ty(dest), self.cx.unboxed).is_some() => {
                        ConstValue::Int(0)
                    }
                    other => other.clone(),
                };
                out.push(Instr::Const { dest, value });
            }
            FieldMapping::Table(_) => {
                let getter = self.local(holder)?.getters.get(&field).copied().ok_or_else(|| {
                    internal_error!("no getter for {}", program.field_reference(field))
                })?;
                Self::call(out, Some(dest), getter, vec![object]);
            }
        }
        Ok(())
    }

    fn program_call(
        &mut self,
        out: &mut Vec<Instr>,
        dest: Option<ValueId>,
        kind: InvokeKind,
        target: MethodId,
        mut args: Vec<ValueId>,
    ) -> Result<bool> {
        let cx = self.cx;
        if let Some((class, canonical)) = cx.tables.canonical.get(&target).copied() {
            self.init_trigger(out, class)?;
            match canonical {
                Canonical::Values => {
                    let count = self.constant(out, ConstValue::Int(cx.tables.counts[&class]));
                    self.shim(out, dest, Shim::Values, vec![count]);
                }
                Canonical::ValueOf => {
                    let value_of = self.local(class)?.value_of;
                    Self::call(out, dest, value_of, args);
                }
            }
            return Ok(true);
        }
        if let Some(class) = cx.tables.to_string.get(&target).copied() {
            let to_string = self.local(class)?.to_string;
            Self::call(out, dest, to_string, args);
            return Ok(true);
        }
        let extra = cx.changes.extra_args(target);
        for _ in 0..extra {
            let zero = self.constant(out, ConstValue::Int(0));
            args.push(zero);
        }
        out.push(Instr::Invoke {
            dest,
            kind,
            callee: Callee::Program(target),
            args,
        });
        Ok(extra > 0)
    }

    #[allow(clippy::too_many_lines)]
    fn library_call(
        &mut self,
        out: &mut Vec<Instr>,
        dest: Option<ValueId>,
        kind: InvokeKind,
        target: LibraryMethod,
        args: Vec<ValueId>,
    ) -> Result<bool> {
        use LibraryMethod as L;

        let receiver = args.first().copied();
        let enum_operand = receiver.and_then(|r| self.unboxed_class(r));
        let class_operand = receiver.and_then(|r| self.class_of.get(&r).copied());
        match (target, receiver, enum_operand, class_operand) {
            (L::EnumOrdinal, Some(a), Some(_), _) => {
                if self.is_unused(dest) {
                    self.shim(out, None, Shim::ZeroCheck, vec![a]);
                } else {
                    self.shim(out, dest, Shim::Ordinal, vec![a]);
                }
            }
            (L::EnumName, Some(a), Some(class), _) => {
                let name = self.local(class)?.name;
                Self::call(out, dest, name, vec![a]);
            }
            (L::EnumToString | L::ObjectToString, Some(a), Some(class), _) => {
                let to_string = self.local(class)?.to_string;
                Self::call(out, dest, to_string, vec![a]);
            }
            (L::StringValueOf, Some(a), Some(class), _) => {
                let string_value_of = self.local(class)?.string_value_of;
                Self::call(out, dest, string_value_of, vec![a]);
            }
            (L::PrintlnObject, Some(a), Some(class), _) => {
                let string_value_of = self.local(class)?.string_value_of;
                let text = self.code.new_value(Type::String);
                Self::call(out, Some(text), string_value_of, vec![a]);
                out.push(Instr::Invoke {
                    dest: None,
                    kind,
                    callee: Callee::Library(L::PrintlnString),
                    args: vec![text],
                });
            }
            (L::EnumEquals | L::ObjectEquals, Some(a), Some(class), _) if args.len() == 2 => {
                let other = args[1];
                match self.unboxed_class(other) {
                    Some(other_class) if other_class == class => {
                        self.shim(out, dest, Shim::Equals, vec![a, other]);
                    }
                    Some(_) => {
                        let null = self.constant(out, ConstValue::Null);
                        self.shim(out, dest, Shim::ObjectEquals, vec![a, null]);
                    }
                    None => self.shim(out, dest, Shim::ObjectEquals, vec![a, other]),
                }
            }
            (L::EnumCompareTo, Some(_), Some(_), _) => self.shim(out, dest, Shim::CompareTo, args),
            (L::ObjectGetClass, Some(a), Some(class), _) => {
                self.shim(out, None, Shim::ZeroCheck, vec![a]);
                if let Some(dest) = dest {
                    self.class_of.insert(dest, class);
                }
            }
            (L::ObjectsRequireNonNull, Some(a), Some(_), _) => {
                self.shim(out, None, Shim::ZeroCheck, vec![a]);
                if let Some(dest) = dest {
                    self.replacements.insert(dest, a);
                }
            }
            (L::ObjectsRequireNonNullMessage, Some(a), Some(_), _) => {
                self.shim(out, None, Shim::ZeroCheckMessage, args);
                if let Some(dest) = dest {
                    self.replacements.insert(dest, a);
                }
            }
            (L::ClassGetName | L::ClassGetSimpleName | L::ClassGetCanonicalName, _, _, Some(class)) => {
                let def = self.cx.program.class(class);
                let text = match target {
                    L::ClassGetName => def.name.clone(),
                    L::ClassGetSimpleName => def.simple_name().to_string(),
                    _ => def.canonical_name(),
                };
                if let Some(dest) = dest {
                    out.push(Instr::Const {
                        dest,
                        value: ConstValue::Str(text),
                    });
                }
            }
            (L::EnumValueOf, _, _, Some(class)) if args.len() == 2 => {
                self.init_trigger(out, class)?;
                let value_of = self.local(class)?.value_of;
                if let Some(dest) = dest {
                    self.retyped.insert(dest, Type::Int);
                }
                Self::call(out, dest, value_of, vec![args[1]]);
            }
            (L::ArrayClone, Some(array), _, _) => {
                if let (Some(dest), Some(ty)) = (dest, unboxed_type(self.code.ty(array), self.cx.unboxed)) {
                    self.retyped.insert(dest, ty);
                }
                out.push(Instr::Invoke {
                    dest,
                    kind,
                    callee: Callee::Library(target),
                    args,
                });
                return Ok(false);
            }
            _ => {
                out.push(Instr::Invoke {
                    dest,
                    kind,
                    callee: Callee::Library(target),
                    args,
                });
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn apply_replacements(&mut self) {
        let resolve = |mut value: ValueId| {
            let mut hops = 0;
            while let Some(next) = self.replacements.get(&value) {
                value = *next;
                hops += 1;
                if hops > self.replacements.len() {
                    break;
                }
            }
            value
        };
        let resolved: Vec<(ValueId, ValueId)> = self
            .replacements
            .keys()
            .map(|from| (*from, resolve(*from)))
            .collect();
        for (from, to) in resolved {
            self.code.replace_uses(from, to);
        }
    }

    /// Replaces enum types by `int` in values and instruction operands.
    fn retype(&mut self) {
        let unboxed = self.cx.unboxed;
        let Code { values, blocks } = &mut self.code;
        for (index, ty) in values.iter_mut().enumerate() {
            if let Some(forced) = self.retyped.get(&ValueId::from_usize(index)) {
                *ty = forced.clone();
            } else if let Some(int) = unboxed_type(ty, unboxed) {
                *ty = int;
            }
        }
        for block in blocks.iter_mut() {
            for instr in &mut block.instrs {
                match instr {
                    Instr::NewArray { element, .. } | Instr::NewArrayFilled { element, .. } => {
                        if let Some(int) = unboxed_type(element, unboxed) {
                            *element = int;
                        }
                    }
                    Instr::NewMultiArray { ty, .. } | Instr::CheckCast { ty, .. } | Instr::InstanceOf { ty, .. } => {
                        if let Some(int) = unboxed_type(ty, unboxed) {
                            *ty = int;
                        }
                    }
                    Instr::Const {
                        dest,
                        value: value @ ConstValue::Null,
                    } if values[dest.index()] == Type::Int => *value = ConstValue::Int(0),
                    _ => {}
                }
            }
        }
    }

    /// A `null` reference, by type or by proof.
    fn is_null_reference(&self, value: ValueId) -> bool {
        let ty = self.code.ty(value);
        ty.is_reference() && (*ty == Type::Null || self.always_null.contains(value))
    }

    fn fix_for(&self, slot: &Type, value: ValueId) -> Option<ConstValue> {
        if *slot == Type::Int && self.is_null_reference(value) {
            Some(ConstValue::Int(0))
        } else if slot.is_reference() && *self.code.ty(value) == Type::Int && self.always_null.contains(value) {
            Some(ConstValue::Null)
        } else {
            None
        }
    }

    fn slot_fixes(&self, method: &MethodDef, instr: &Instr) -> Vec<(usize, ConstValue)> {
        match instr {
            Instr::Compare { lhs, rhs, .. }
            | Instr::If {
                lhs, rhs: Some(rhs), ..
            } => {
                if *self.code.ty(*lhs) == Type::Int && self.is_null_reference(*rhs) {
                    vec![(1, ConstValue::Int(0))]
                } else if *self.code.ty(*rhs) == Type::Int && self.is_null_reference(*lhs) {
                    vec![(0, ConstValue::Int(0))]
                } else {
                    Vec::new()
                }
            }
            _ => operand_slot_types(self.cx.program, method, &self.code, instr)
                .into_iter()
                .zip(instr.operands())
                .enumerate()
                .filter_map(|(index, (slot, value))| {
                    slot.and_then(|slot| self.fix_for(&slot, value)).map(|c| (index, c))
                })
                .collect(),
        }
    }

    /// Materializes `0` or `null` where a null value meets a slot of the other kind.
    fn fix_null_slots(&mut self) {
        let method = self.cx.program.method(self.method);
        let mut blocks = std::mem::take(&mut self.code.blocks);
        for block in &mut blocks {
            let instrs = std::mem::take(&mut block.instrs);
            let mut out = Vec::with_capacity(instrs.len());
            for mut instr in instrs {
                let fixes = self.slot_fixes(method, &instr);
                if !fixes.is_empty() {
                    let fixed: Vec<(usize, ValueId)> = fixes
                        .into_iter()
                        .map(|(index, value)| (index, self.constant(&mut out, value)))
                        .collect();
                    let mut operands = instr.operands_mut();
                    for (index, value) in fixed {
                        if let Some(slot) = operands.get_mut(index) {
                            **slot = value;
                        }
                    }
                }
                out.push(instr);
            }
            block.instrs = out;
        }

        let mut phi_fixes: Vec<(usize, usize, usize, BlockId, ConstValue)> = Vec::new();
        for (block_index, block) in blocks.iter().enumerate() {
            for (phi_index, phi) in block.phis.iter().enumerate() {
                let slot = self.code.ty(phi.dest).clone();
                for (operand_index, (pred, value)) in phi.operands.iter().enumerate() {
                    if let Some(fix) = self.fix_for(&slot, *value) {
                        phi_fixes.push((block_index, phi_index, operand_index, *pred, fix));
                    }
                }
            }
        }
        for (block_index, phi_index, operand_index, pred, fix) in phi_fixes {
            let dest = self.code.new_value(fix.ty());
            let Some(pred_block) = blocks.get_mut(pred.index()) else {
                continue;
            };
            let at = pred_block.instrs.len().saturating_sub(1);
            pred_block.instrs.insert(at, Instr::Const { dest, value: fix });
            blocks[block_index].phis[phi_index].operands[operand_index].1 = dest;
        }
        self.code.blocks = blocks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        enums::{analyzer::Analyzer, collector::collect},
        program::{ProgramBuilder, SyntheticKind},
        test::{enum_program, transcript},
    };

    struct Run {
        outcome: RewriteOutcome,
        events: EventLog,
    }

    fn unbox(program: &mut Program) -> Result<Run> {
        unbox_with(program, &KeepPredicate::none(), &UnboxingConfig::testing())
    }

    fn unbox_with(program: &mut Program, keep: &KeepPredicate, config: &UnboxingConfig) -> Result<Run> {
        let events = EventLog::new();
        let pins = PassPins::new();
        let mut set = collect(program, keep, &pins, &events);
        let facts = Analyzer::new(program, keep, config, &events).run(&mut set)?;
        let outcome = Rewriter::new(&set, &facts, config, keep, &pins, &events).run(program)?;
        Ok(Run { outcome, events })
    }

    fn mentions(program: &Program, class: ClassId) -> bool {
        program.methods().any(|(_, def)| {
            def.params.iter().chain(std::iter::once(&def.ret)).any(|t| t.base_class() == Some(class))
                || def
                    .code
                    .as_ref()
                    .is_some_and(|code| code.values.iter().any(|t| t.base_class() == Some(class)))
        })
    }

    #[test]
    fn test_core_operations_keep_behavior() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let run = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let a = b.sget(e.constants[0]);
                let c = b.sget(e.constants[2]);
                let ord = b.lib(LibraryMethod::EnumOrdinal, &[c]);
                b.println(ord);
                let eq = b.lib(LibraryMethod::EnumEquals, &[a, c]);
                b.println(eq);
                let cmp = b.lib(LibraryMethod::EnumCompareTo, &[a, c]);
                b.println(cmp);
                b.println(c);
                let name = b.lib(LibraryMethod::EnumName, &[a]);
                b.println(name);
                let all = b.call_static(e.values_method, &[]);
                let len = b.array_length(all);
                b.println(len);
                let s = b.const_str("B");
                let found = b.call_static(e.value_of_method, &[s]);
                let found_ord = b.lib(LibraryMethod::EnumOrdinal, &[found]);
                b.println(found_ord);
                b.ret();
            });
        });
        let mut program = pb.build();
        let before = transcript(&program, run);
        let result = unbox(&mut program).unwrap();
        assert_eq!(transcript(&program, run), before);
        assert_eq!(result.outcome.unboxed, vec!["com.example.MyEnum".to_string()]);
        assert!(!program.is_live_class(e.class));
        assert!(!mentions(&program, e.class));
        assert!(result.events.has(EventKind::InstructionRewritten));
        assert!(result.events.has(EventKind::ClassRemoved));
    }

    #[test]
    fn test_null_flows_and_arrays() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let describe = pb.static_method(main, "describe", vec![e.ty()], Type::Void);
        pb.code(describe, |f| {
            let v = f.arg(0);
            f.block(0, |b| {
                let null = b.const_null();
                b.if_cmp(CmpKind::Eq, v, null, 1, 2);
            });
            f.block(1, |b| {
                b.print_str("none");
                b.ret();
            });
            f.block(2, |b| {
                b.println(v);
                b.ret();
            });
        });
        let run = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let null = b.const_null();
                b.call_static_void(describe, &[null]);
                let two = b.const_int(2);
                let array = b.new_array(e.ty(), two);
                let zero = b.const_int(0);
                let first = b.aget(array, zero);
                b.call_static_void(describe, &[first]);
                let one = b.const_int(1);
                let c = b.sget(e.constants[2]);
                b.aput(array, one, c);
                let second = b.aget(array, one);
                b.call_static_void(describe, &[second]);
                b.ret();
            });
        });
        let mut program = pb.build();
        let before = transcript(&program, run);
        assert_eq!(before, vec!["none", "none", "C"]);
        unbox(&mut program).unwrap();
        assert_eq!(transcript(&program, run), before);
        assert_eq!(program.method_descriptor(describe), "(I)V");
    }

    #[test]
    fn test_ordinal_switch_dispatches_on_encoding() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let pick = pb.static_method(main, "pick", vec![e.ty()], Type::Void);
        pb.code(pick, |f| {
            let v = f.arg(0);
            f.block(0, |b| {
                let ord = b.lib(LibraryMethod::EnumOrdinal, &[v]);
                b.switch(ord, &[(0, 1), (2, 2)], 3);
            });
            f.block(1, |b| {
                b.print_str("first");
                b.ret();
            });
            f.block(2, |b| {
                b.print_str("last");
                b.ret();
            });
            f.block(3, |b| {
                b.print_str("other");
                b.ret();
            });
        });
        let run = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                for constant in &e.constants {
                    let v = b.sget(*constant);
                    b.call_static_void(pick, &[v]);
                }
                let null = b.const_null();
                b.call_static_void(pick, &[null]);
                b.ret();
            });
        });
        let mut program = pb.build();
        let before = transcript(&program, run);
        unbox(&mut program).unwrap();
        assert_eq!(transcript(&program, run), before);
        let code = program.method(pick).code.as_ref().unwrap();
        let keys = code.iter_instrs().find_map(|(_, i)| match i {
            Instr::Switch { keys, .. } => Some(keys.clone()),
            _ => None,
        });
        assert_eq!(keys, Some(vec![1, 3]));
    }

    #[test]
    fn test_reflection_folds_to_constants() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let run = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let a = b.sget(e.constants[1]);
                let class = b.lib(LibraryMethod::ObjectGetClass, &[a]);
                let simple = b.lib(LibraryMethod::ClassGetSimpleName, &[class]);
                b.println(simple);
                let literal = b.const_class(e.ty());
                let name = b.const_str("C");
                let found = b.lib(LibraryMethod::EnumValueOf, &[literal, name]);
                let cast = b.check_cast(found, e.ty());
                b.println(cast);
                let checked = b.lib_typed(LibraryMethod::ObjectsRequireNonNull, &[cast], e.ty());
                let ord = b.lib(LibraryMethod::EnumOrdinal, &[checked]);
                b.println(ord);
                b.ret();
            });
        });
        let mut program = pb.build();
        let before = transcript(&program, run);
        unbox(&mut program).unwrap();
        assert_eq!(transcript(&program, run), before);
        let code = program.method(run).code.as_ref().unwrap();
        assert!(!code.iter_instrs().any(|(_, i)| matches!(
            i,
            Instr::Invoke {
                callee: Callee::Library(LibraryMethod::ObjectGetClass | LibraryMethod::EnumValueOf),
                ..
            }
        )));
    }

    #[test]
    fn test_field_tables_and_initializer_order() {
        let mut pb = ProgramBuilder::new("test");
        let planet = pb
            .enum_class("com.example.Planet")
            .constants(&["MERCURY", "VENUS"])
            .int_field("mass", &[33, 48])
            .int_field("rank", &[0, 1])
            .clinit_message("planets ready")
            .build()
            .unwrap();
        let main = pb.class("Main").unwrap();
        let run = pb.static_method(main, "main", vec![], Type::Void);
        let (mass, rank) = (planet.instance_fields[0], planet.instance_fields[1]);
        pb.code(run, |f| {
            f.block(0, |b| {
                b.print_str("start");
                let venus = b.sget(planet.constants[1]);
                let m = b.iget(mass, venus);
                b.println(m);
                let r = b.iget(rank, venus);
                b.println(r);
                b.ret();
            });
        });
        let mut program = pb.build();
        let before = transcript(&program, run);
        assert_eq!(before, vec!["start", "planets ready", "48", "1"]);
        let result = unbox(&mut program).unwrap();
        assert_eq!(transcript(&program, run), before);
        assert_eq!(result.outcome.local_utilities.len(), 1);
        let local = program
            .classes()
            .find(|(_, def)| def.synthetic == Some(SyntheticKind::EnumUnboxingLocalUtility))
            .map(|(id, _)| id)
            .unwrap();
        assert!(program.method_by_name(local, "getMass").is_some());
        assert!(program.method_by_name(local, "getRank").is_none());
    }

    #[test]
    fn test_records_cover_moved_and_removed_members() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let take = pb.static_method(main, "take", vec![e.ty()], Type::Void);
        pb.code(take, |f| {
            f.block(0, |b| b.ret());
        });
        let run = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let a = b.sget(e.constants[0]);
                b.call_static_void(take, &[a]);
                b.ret();
            });
        });
        let mut program = pb.build();
        let values = program.method_reference(e.values_method);
        let result = unbox(&mut program).unwrap();
        let records = &result.outcome.records;
        assert!(records.contains(&RewriteRecord::MethodRemoved(values)));
        assert!(records.iter().any(|r| matches!(
            r,
            RewriteRecord::Method { old, new } if old.name == "take" && new.descriptor == "(I)V"
        )));
    }

    #[test]
    fn test_kept_class_not_pruned() {
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
        let program = pb.build();
        let keep = KeepPredicate::builder()
            .keep(KeepTarget::Class(e.class), KeepFlags::ALLOW_OPTIMIZATION)
            .build();

        let mut strict = program.clone();
        let error = unbox_with(&mut strict, &keep, &UnboxingConfig::testing()).err();
        assert!(matches!(error, Some(Error::NotPruned(name)) if name == "com.example.MyEnum"));

        let mut relaxed = program;
        let mut config = UnboxingConfig::testing();
        config.allow_not_pruned_unboxed_enums = true;
        let result = unbox_with(&mut relaxed, &keep, &config).unwrap();
        assert!(relaxed.is_live_class(e.class));
        assert!(relaxed.class(e.class).methods.is_empty());
        assert_eq!(transcript(&relaxed, run), vec!["A"]);
        assert!(result.events.warnings().next().is_some());
    }
}
