//! Legacy switch-map elimination.
//!
//! Source compilers lower `switch (e)` on an enum to a lookup through a synthetic
//! holder class:
//!
//! ```text
//! static final int[] $SwitchMap$com$example$E;   // in Main$1
//! <clinit>:  map[E.A.ordinal()] = 1; map[E.C.ordinal()] = 2; ...
//! use:       switch (Main$1.$SwitchMap$com$example$E[e.ordinal()]) { case 1: ... }
//! ```
//!
//! Once `E` is unboxed the indirection is unnecessary: the switch can dispatch on
//! the encoded value directly, with each case key replaced by the ordinals that
//! mapped to it, plus one. The `ordinal()` call stays behind as the null check.
//! A holder whose maps are no longer read is removed.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    enums::{candidate::CandidateSet, collector::constant_fields},
    events::{EventKind, EventLog},
    program::{
        BlockId, Callee, ClassId, Code, FieldId, Instr, LibraryMethod, MethodId, Program, SyntheticKind, Type,
        ValueId,
    },
};

/// Prefix of switch-map field names.
pub const SWITCH_MAP_PREFIX: &str = "$SwitchMap$";

/// A recognized switch map for one enum.
#[derive(Debug, Clone)]
pub struct SwitchMap {
    /// The synthetic holder class.
    pub holder: ClassId,
    /// The `int[]` field.
    pub field: FieldId,
    /// The enum whose ordinals index the map.
    pub class: ClassId,
    /// Case key by ordinal; ordinals not present map to `0`.
    pub keys: FxHashMap<usize, i32>,
}

impl SwitchMap {
    /// Returns the encoded values (ordinal + 1) whose case key is `key`, ascending.
    #[must_use]
    pub fn encoded_for(&self, key: i32) -> Vec<i32> {
        let mut ordinals: Vec<usize> = self
            .keys
            .iter()
            .filter(|(_, k)| **k == key)
            .map(|(o, _)| *o)
            .collect();
        ordinals.sort_unstable();
        ordinals
            .into_iter()
            .filter_map(|o| i32::try_from(o + 1).ok())
            .collect()
    }
}

/// Returns true for a class holding switch maps.
#[must_use]
pub fn is_switch_map_holder(program: &Program, class: ClassId) -> bool {
    let def = program.class(class);
    def.synthetic == Some(SyntheticKind::SwitchMap)
        || def
            .fields
            .iter()
            .any(|f| program.field(*f).name.starts_with(SWITCH_MAP_PREFIX))
}

/// Finds the switch maps over unboxable enums.
#[must_use]
pub fn find_switch_maps(program: &Program, candidates: &CandidateSet) -> Vec<SwitchMap> {
    let mut maps = Vec::new();
    for (holder, def) in program.classes() {
        if !is_switch_map_holder(program, holder) {
            continue;
        }
        let Some(code) = def
            .methods
            .iter()
            .map(|m| program.method(*m))
            .find(|m| m.is_class_initializer())
            .and_then(|m| m.code.as_ref())
        else {
            continue;
        };
        for field in &def.fields {
            let field_def = program.field(*field);
            if !field_def.is_static()
                || !field_def.name.starts_with(SWITCH_MAP_PREFIX)
                || field_def.ty != Type::array_of(Type::Int)
            {
                continue;
            }
            if let Some(map) = parse_map(program, holder, *field, code) {
                if candidates.is_unboxable(map.class) {
                    maps.push(map);
                }
            }
        }
    }
    maps
}

/// Reads `map[E.X.ordinal()] = key` stores of `field` from the holder's initializer.
fn parse_map(program: &Program, holder: ClassId, field: FieldId, code: &Code) -> Option<SwitchMap> {
    let defs = code.definitions();
    let mut class = None;
    let mut keys = FxHashMap::default();
    for (_, instr) in code.iter_instrs() {
        let Instr::ArrayPut { array, index, value } = instr else {
            continue;
        };
        if !matches!(code.defining_instr(&defs, *array), Some(Instr::StaticGet { field: f, .. }) if *f == field) {
            continue;
        }
        let Some(Instr::Invoke {
            callee: Callee::Library(LibraryMethod::EnumOrdinal),
            args,
            ..
        }) = code.defining_instr(&defs, *index)
        else {
            return None;
        };
        let Some(Instr::StaticGet { field: constant, .. }) = code.defining_instr(&defs, *args.first()?) else {
            return None;
        };
        let owner = program.field(*constant).holder;
        let ordinal = constant_fields(program, owner).iter().position(|f| f == constant)?;
        let key = match code.defining_instr(&defs, *value) {
            Some(Instr::Const { value, .. }) => value.as_int()?,
            _ => return None,
        };
        if *class.get_or_insert(owner) != owner {
            return None;
        }
        keys.insert(ordinal, key);
    }
    Some(SwitchMap {
        holder,
        field,
        class: class?,
        keys,
    })
}

/// A switch recognized as dispatching through a map.
struct MapSwitch {
    block: BlockId,
    scrutinee: ValueId,
    lookup: ValueId,
    map_value: ValueId,
    map: usize,
}

fn find_map_switches(code: &Code, maps: &[SwitchMap]) -> Vec<MapSwitch> {
    let defs = code.definitions();
    let mut found = Vec::new();
    for (block, body) in code.iter_blocks() {
        let Some(Instr::Switch { value, .. }) = body.terminator() else {
            continue;
        };
        let Some(Instr::ArrayGet { array, index, .. }) = code.defining_instr(&defs, *value) else {
            continue;
        };
        let Some(Instr::StaticGet { field, .. }) = code.defining_instr(&defs, *array) else {
            continue;
        };
        let Some(map) = maps.iter().position(|m| m.field == *field) else {
            continue;
        };
        let Some(Instr::Invoke {
            callee: Callee::Library(LibraryMethod::EnumOrdinal),
            args,
            ..
        }) = code.defining_instr(&defs, *index)
        else {
            continue;
        };
        let Some(scrutinee) = args.first().copied() else {
            continue;
        };
        if code.ty(scrutinee) != &Type::Class(maps[map].class) {
            continue;
        }
        found.push(MapSwitch {
            block,
            scrutinee,
            lookup: *value,
            map_value: *array,
            map,
        });
    }
    found
}

/// Rewrites map switches in `code`. Returns the number rewritten.
fn rewrite_code(code: &mut Code, maps: &[SwitchMap]) -> usize {
    let switches = find_map_switches(code, maps);
    let mut dropped: FxHashSet<ValueId> = FxHashSet::default();
    for switch in &switches {
        let map = &maps[switch.map];
        let Some(Instr::Switch {
            value,
            keys,
            targets,
            ..
        }) = code.block_mut(switch.block).instrs.last_mut()
        else {
            continue;
        };
        let mut new_keys = Vec::new();
        let mut new_targets = Vec::new();
        for (key, target) in keys.iter().zip(targets.iter()) {
            for encoded in map.encoded_for(*key) {
                new_keys.push(encoded);
                new_targets.push(*target);
            }
        }
        *value = switch.scrutinee;
        *keys = new_keys;
        *targets = new_targets;
        dropped.insert(switch.lookup);
        dropped.insert(switch.map_value);
    }

    // The lookup goes first so the map read becomes unused.
    for _ in 0..2 {
        let counts = code.use_counts();
        for block in &mut code.blocks {
            block.instrs.retain(|instr| match instr.dest() {
                Some(dest) => !(dropped.contains(&dest) && counts.get(&dest).copied().unwrap_or(0) == 0),
                None => true,
            });
        }
    }
    switches.len()
}

fn reads_field(code: &Code, fields: &FxHashSet<FieldId>) -> bool {
    code.iter_instrs().any(|(_, instr)| match instr {
        Instr::StaticGet { field, .. } | Instr::StaticPut { field, .. } => fields.contains(field),
        _ => false,
    })
}

/// Rewrites every switch dispatching through `maps` and removes holders no longer read.
///
/// Returns the number of switches rewritten.
pub fn eliminate(program: &mut Program, maps: &[SwitchMap], events: &EventLog) -> usize {
    if maps.is_empty() {
        return 0;
    }
    let holders: FxHashSet<ClassId> = maps.iter().map(|m| m.holder).collect();
    let mut rewritten = 0;
    for method in program.methods_with_code() {
        if holders.contains(&program.method(method).holder) {
            continue;
        }
        let Some(mut code) = program.method_mut(method).code.take() else {
            continue;
        };
        let count = rewrite_code(&mut code, maps);
        program.method_mut(method).code = Some(code);
        if count > 0 {
            rewritten += count;
            events
                .record(EventKind::SwitchMapRemoved)
                .method(method)
                .phase("switchmap")
                .message(format!(
                    "{}: {count} switch(es) now dispatch on the enum value",
                    program.method_reference(method)
                ));
        }
    }

    let mut holders: Vec<ClassId> = holders.into_iter().collect();
    holders.sort_unstable();
    for holder in holders {
        let fields: FxHashSet<FieldId> = program.class(holder).fields.iter().copied().collect();
        let still_read = program
            .methods_with_code()
            .into_iter()
            .filter(|m: &MethodId| program.method(*m).holder != holder)
            .filter_map(|m| program.method(m).code.as_ref())
            .any(|code| reads_field(code, &fields));
        if !still_read {
            let name = program.class(holder).name.clone();
            program.remove_class(holder);
            events
                .record(EventKind::ClassRemoved)
                .class(holder)
                .phase("switchmap")
                .message(format!("{name}: switch-map holder unused"));
        }
    }
    rewritten
}
