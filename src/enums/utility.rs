//! Shared utility methods.
//!
//! Unboxed values are plain `int`s, so the operations the enum used to provide
//! (ordinal, `values()`, comparisons, null checks) are implemented by a small set
//! of static shims on one synthetic class per output artifact.
//!
//! Several compilation rounds may feed one output: a library is unboxed, merged
//! into an application, and the application is unboxed again. The second round
//! must find the holder the first one produced and reuse it. Holders are matched
//! by the fingerprints of their shim bodies, never by name, because the merge may
//! have renamed a colliding class.

use std::{
    hash::{Hash, Hasher},
    sync::LazyLock,
};

use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use strum::{Display, EnumIter, IntoStaticStr, IntoEnumIterator};

use crate::{
    events::{EventKind, EventLog},
    program::{
        BinaryOp, Callee, ClassDef, ClassFlags, ClassId, CmpKind, Code, CodeBuilder, ConstValue, Instr, LibraryMethod,
        MethodFlags, MethodId, PassPins, Program, SyntheticKind, Type, method_descriptor,
    },
    Result,
};

/// Suffix of the shared utility class name.
pub const SHARED_UTILITY_SUFFIX: &str = "$EnumUnboxingSharedUtility";

/// One shim method of the shared utility class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, IntoStaticStr)]
pub enum Shim {
    /// `int ordinal(int)`: throws on 0, else `v - 1`.
    #[strum(serialize = "ordinal")]
    Ordinal,
    /// `int[] values(int n)`: `{1, ..., n}`.
    #[strum(serialize = "values")]
    Values,
    /// `int compareTo(int, int)`
    #[strum(serialize = "compareTo")]
    CompareTo,
    /// `boolean equals(int, int)`
    #[strum(serialize = "equals")]
    Equals,
    /// `boolean objectEquals(int, Object)`: `false` unless the receiver is 0.
    #[strum(serialize = "objectEquals")]
    ObjectEquals,
    /// `void zeroCheck(int)`
    #[strum(serialize = "zeroCheck")]
    ZeroCheck,
    /// `void zeroCheckMessage(int, String)`
    #[strum(serialize = "zeroCheckMessage")]
    ZeroCheckMessage,
}

impl Shim {
    /// Returns the parameter types.
    #[must_use]
    pub fn params(self) -> Vec<Type> {
        match self {
            Shim::Ordinal | Shim::Values | Shim::ZeroCheck => vec![Type::Int],
            Shim::CompareTo | Shim::Equals => vec![Type::Int, Type::Int],
            Shim::ObjectEquals => vec![Type::Int, Type::Object],
            Shim::ZeroCheckMessage => vec![Type::Int, Type::String],
        }
    }

    /// Returns the return type.
    #[must_use]
    pub fn ret(self) -> Type {
        match self {
            Shim::Ordinal | Shim::CompareTo => Type::Int,
            Shim::Values => Type::array_of(Type::Int),
            Shim::Equals | Shim::ObjectEquals => Type::Boolean,
            Shim::ZeroCheck | Shim::ZeroCheckMessage => Type::Void,
        }
    }

    /// Returns the method name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Builds the shim body.
    #[must_use]
    pub fn body(self, program: &Program) -> Code {
        let builder = CodeBuilder::with_args(program, self.params());
        match self {
            Shim::Ordinal => builder.build_with(|f| {
                let v = f.arg(0);
                f.block(0, |b| b.if_zero(CmpKind::Eq, v, 1, 2));
                f.block(1, |b| b.throw_npe());
                f.block(2, |b| {
                    let one = b.const_int(1);
                    let ordinal = b.sub(v, one);
                    b.ret_val(ordinal);
                });
            }),
            Shim::Values => builder.build_with(|f| {
                let n = f.arg(0);
                let array = f.var(Type::array_of(Type::Int));
                let zero = f.var(Type::Int);
                let i = f.var(Type::Int);
                let next = f.var(Type::Int);
                f.block(0, |b| {
                    b.push(Instr::NewArray {
                        dest: array,
                        element: Type::Int,
                        size: n,
                    });
                    b.push(Instr::Const {
                        dest: zero,
                        value: ConstValue::Int(0),
                    });
                    b.goto(1);
                });
                f.block(1, |b| {
                    b.phi_into(i, &[(0, zero), (2, next)]);
                    b.if_cmp(CmpKind::Lt, i, n, 2, 3);
                });
                f.block(2, |b| {
                    let one = b.const_int(1);
                    b.push(Instr::Binary {
                        dest: next,
                        op: BinaryOp::Add,
                        lhs: i,
                        rhs: one,
                    });
                    b.aput(array, i, next);
                    b.goto(1);
                });
                f.block(3, |b| b.ret_val(array));
            }),
            Shim::CompareTo => builder.build_with(|f| {
                let (a, c) = (f.arg(0), f.arg(1));
                f.block(0, |b| b.if_zero(CmpKind::Eq, a, 1, 2));
                f.block(1, |b| b.throw_npe());
                f.block(2, |b| b.if_zero(CmpKind::Eq, c, 1, 3));
                f.block(3, |b| {
                    let diff = b.sub(a, c);
                    b.ret_val(diff);
                });
            }),
            Shim::Equals => builder.build_with(|f| {
                let (a, c) = (f.arg(0), f.arg(1));
                f.block(0, |b| b.if_zero(CmpKind::Eq, a, 1, 2));
                f.block(1, |b| b.throw_npe());
                f.block(2, |b| {
                    let eq = b.compare(CmpKind::Eq, a, c);
                    b.ret_val(eq);
                });
            }),
            Shim::ObjectEquals => builder.build_with(|f| {
                let a = f.arg(0);
                f.block(0, |b| b.if_zero(CmpKind::Eq, a, 1, 2));
                f.block(1, |b| b.throw_npe());
                f.block(2, |b| {
                    let no = b.const_bool(false);
                    b.ret_val(no);
                });
            }),
            Shim::ZeroCheck => builder.build_with(|f| {
                let v = f.arg(0);
                f.block(0, |b| b.if_zero(CmpKind::Eq, v, 1, 2));
                f.block(1, |b| b.throw_npe());
                f.block(2, |b| b.ret());
            }),
            Shim::ZeroCheckMessage => builder.build_with(|f| {
                let (v, message) = (f.arg(0), f.arg(1));
                f.block(0, |b| b.if_zero(CmpKind::Eq, v, 1, 2));
                f.block(1, |b| {
                    let exception = b.lib(LibraryMethod::NewNullPointerExceptionMessage, &[message]);
                    b.throw(exception);
                });
                f.block(2, |b| b.ret());
            }),
        }
    }

    /// Returns the fingerprint of the canonical body.
    #[must_use]
    pub fn fingerprint(self, program: &Program) -> u64 {
        fingerprint(program, &self.body(program))
    }
}

/// Hashes the rendered form of a body.
#[must_use]
pub fn fingerprint(program: &Program, code: &Code) -> u64 {
    let mut hasher = FxHasher::default();
    code.display(program).to_string().hash(&mut hasher);
    hasher.finish()
}

// ── Cross-round registry ───────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RegistryEntry {
    class_name: String,
    fingerprints: FxHashMap<Shim, u64>,
}

static REGISTRY: LazyLock<DashMap<String, RegistryEntry>> = LazyLock::new(DashMap::new);

/// Forgets the shared utility recorded for `artifact`.
///
/// Independent compilations reusing an artifact name call this between runs.
pub fn forget_shared_utility(artifact: &str) {
    REGISTRY.remove(artifact);
}

/// Returns the name of the shared utility class last recorded for `artifact`.
#[must_use]
pub fn registered_shared_utility(artifact: &str) -> Option<String> {
    REGISTRY.get(artifact).map(|entry| entry.class_name.clone())
}

// ── Provider ───────────────────────────────────────────────────────────

/// The shared utility class available to the rewriter.
#[derive(Debug, Clone)]
pub struct SharedUtility {
    /// The holder class.
    pub class: ClassId,
    /// True if the holder came from an earlier round.
    pub reused: bool,
    methods: FxHashMap<Shim, MethodId>,
}

impl SharedUtility {
    /// Returns the method implementing `shim`.
    ///
    /// # Panics
    ///
    /// Never: [`ensure_shared_utility`] declares every shim.
    #[must_use]
    pub fn method(&self, shim: Shim) -> MethodId {
        self.methods[&shim]
    }

    /// Iterates over the shim methods.
    pub fn methods(&self) -> impl Iterator<Item = (Shim, MethodId)> + '_ {
        self.methods.iter().map(|(shim, method)| (*shim, *method))
    }
}

/// Returns the shared utility class of `program`, synthesizing it if needed.
///
/// An existing holder qualifies when every shim it declares has the canonical
/// body; shims it lacks are added to it. `anchor` names the enum whose name
/// prefixes a freshly synthesized class.
///
/// # Errors
///
/// Returns an error if the class cannot be added to the program.
pub fn ensure_shared_utility(
    program: &mut Program,
    anchor: &str,
    pins: &PassPins,
    events: &EventLog,
) -> Result<SharedUtility> {
    let expected: FxHashMap<Shim, u64> = Shim::iter().map(|s| (s, s.fingerprint(program))).collect();

    let registered = REGISTRY
        .get(&program.artifact)
        .and_then(|entry| program.class_by_name(&entry.class_name))
        .filter(|class| matches_fingerprints(program, *class, &expected));
    let existing = registered.or_else(|| {
        let mut holders: Vec<(ClassId, &ClassDef)> = program
            .classes()
            .filter(|(_, def)| def.synthetic == Some(SyntheticKind::SharedEnumUnboxingUtility))
            .collect();
        holders.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        holders
            .into_iter()
            .map(|(id, _)| id)
            .find(|id| matches_fingerprints(program, *id, &expected))
    });

    let (class, reused) = match existing {
        Some(class) => {
            events
                .record(EventKind::UtilityReused)
                .class(class)
                .message(format!("reusing {}", program.class(class).name));
            (class, true)
        }
        None => {
            let name = program.fresh_class_name(&format!("{anchor}{SHARED_UTILITY_SUFFIX}"));
            let mut def = ClassDef::new(name, ClassFlags::PUBLIC | ClassFlags::FINAL | ClassFlags::SYNTHETIC);
            def.synthetic = Some(SyntheticKind::SharedEnumUnboxingUtility);
            let class = program.add_class(def)?;
            events
                .record(EventKind::UtilitySynthesized)
                .class(class)
                .message(format!("synthesized {}", program.class(class).name));
            (class, false)
        }
    };

    let mut methods = FxHashMap::default();
    for shim in Shim::iter() {
        let method = match declared_shim(program, class, shim) {
            Some(method) => method,
            None => {
                let body = shim.body(program);
                let method = program.declare_method(
                    class,
                    shim.name(),
                    shim.params(),
                    shim.ret(),
                    MethodFlags::PUBLIC | MethodFlags::STATIC | MethodFlags::SYNTHETIC,
                );
                program.method_mut(method).code = Some(body);
                method
            }
        };
        methods.insert(shim, method);
    }

    pins.no_class_merging.insert(class);
    REGISTRY.insert(
        program.artifact.clone(),
        RegistryEntry {
            class_name: program.class(class).name.clone(),
            fingerprints: expected,
        },
    );
    Ok(SharedUtility { class, reused, methods })
}

/// Removes shims nobody calls, and the holder if it ends up empty.
///
/// Returns the number of removed shims.
pub fn prune_shared_utility(program: &mut Program, utility: &SharedUtility, events: &EventLog) -> usize {
    let mut called = FxHashSet::default();
    for (_, method) in program.methods() {
        let Some(code) = &method.code else { continue };
        for (_, instr) in code.iter_instrs() {
            if let Instr::Invoke {
                callee: Callee::Program(callee),
                ..
            } = instr
            {
                called.insert(*callee);
            }
        }
    }

    let mut removed = 0;
    for (shim, method) in utility.methods() {
        if program.is_live_method(method) && !called.contains(&method) {
            program.remove_method(method);
            removed += 1;
            events
                .record(EventKind::InstructionRemoved)
                .method(method)
                .message(format!("unused shim {shim}"));
        }
    }
    if program.class(utility.class).methods.is_empty() {
        program.remove_class(utility.class);
        events
            .record(EventKind::ClassRemoved)
            .class(utility.class)
            .message("empty shared utility");
        if let Some(mut entry) = REGISTRY.get_mut(&program.artifact) {
            entry.fingerprints.clear();
        }
    }
    removed
}

fn declared_shim(program: &Program, class: ClassId, shim: Shim) -> Option<MethodId> {
    let descriptor = method_descriptor(program, &shim.params(), &shim.ret());
    program.declared_method(class, shim.name(), &descriptor)
}

/// Every shim `class` declares must have the canonical body, and it must declare nothing else.
fn matches_fingerprints(program: &Program, class: ClassId, expected: &FxHashMap<Shim, u64>) -> bool {
    let def = program.class(class);
    if def.synthetic != Some(SyntheticKind::SharedEnumUnboxingUtility) || def.methods.is_empty() {
        return false;
    }
    def.methods.iter().all(|method| {
        let method = program.method(*method);
        let Some(shim) = Shim::iter().find(|s| s.name() == method.name) else {
            return false;
        };
        method.params == shim.params()
            && method.ret == shim.ret()
            && method
                .code
                .as_ref()
                .is_some_and(|code| Some(&fingerprint(program, code)) == expected.get(&shim))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{interp::execute, program::ProgramBuilder};

    fn caller(program: &mut Program, shim: Shim, args: &[ConstValue]) -> MethodId {
        let main = program
            .add_class(ClassDef::new(program.fresh_class_name("Main"), ClassFlags::PUBLIC))
            .unwrap();
        let utility = ensure_shared_utility(program, "com.example.E", &PassPins::new(), &EventLog::new()).unwrap();
        let target = utility.method(shim);
        let run = program.declare_method(main, "run", vec![], Type::Void, MethodFlags::STATIC);
        let args = args.to_vec();
        let code = CodeBuilder::new(program, run).build_with(|f| {
            f.block(0, |b| {
                let values: Vec<_> = args.into_iter().map(|a| b.constant(a)).collect();
                if shim.ret() == Type::Void {
                    b.call_static_void(target, &values);
                } else {
                    let r = b.call_static(target, &values);
                    if shim == Shim::Values {
                        let len = b.array_length(r);
                        b.println(len);
                        let zero = b.const_int(0);
                        let first = b.aget(r, zero);
                        b.println(first);
                    } else {
                        b.println(r);
                    }
                }
                b.ret();
            });
        });
        program.method_mut(run).code = Some(code);
        run
    }

    fn run(shim: Shim, args: &[ConstValue]) -> Vec<String> {
        let mut program = Program::new(format!("shim-{shim}-{args:?}"));
        let entry = caller(&mut program, shim, args);
        execute(&program, entry).unwrap().transcript()
    }

    #[test]
    fn test_ordinal_shim() {
        assert_eq!(run(Shim::Ordinal, &[ConstValue::Int(3)]), vec!["2"]);
        let npe = run(Shim::Ordinal, &[ConstValue::Int(0)]);
        assert!(npe[0].contains("NullPointerException"));
    }

    #[test]
    fn test_values_shim() {
        assert_eq!(run(Shim::Values, &[ConstValue::Int(4)]), vec!["4", "1"]);
    }

    #[test]
    fn test_compare_and_equals_shims() {
        assert_eq!(run(Shim::CompareTo, &[ConstValue::Int(1), ConstValue::Int(3)]), vec!["-2"]);
        assert!(run(Shim::CompareTo, &[ConstValue::Int(1), ConstValue::Int(0)])[0].contains("NullPointerException"));
        assert_eq!(run(Shim::Equals, &[ConstValue::Int(2), ConstValue::Int(2)]), vec!["true"]);
        assert_eq!(run(Shim::ObjectEquals, &[ConstValue::Int(2), ConstValue::Null]), vec!["false"]);
    }

    #[test]
    fn test_zero_check_message() {
        let out = run(
            Shim::ZeroCheckMessage,
            &[ConstValue::Int(0), ConstValue::Str("boom".to_string())],
        );
        assert!(out[0].contains("NullPointerException: boom"));
        assert!(run(Shim::ZeroCheck, &[ConstValue::Int(1)]).is_empty());
    }

    #[test]
    fn test_reuse_after_merge() {
        let mut library = Program::new("test-reuse-lib");
        let pins = PassPins::new();
        let events = EventLog::new();
        ensure_shared_utility(&mut library, "com.lib.E", &pins, &events).unwrap();
        assert!(events.has(EventKind::UtilitySynthesized));

        let mut app = ProgramBuilder::new("test-reuse-app").build();
        app.merge(library).unwrap();
        let events = EventLog::new();
        let utility = ensure_shared_utility(&mut app, "com.app.A", &pins, &events).unwrap();
        assert!(utility.reused);
        assert!(events.has(EventKind::UtilityReused));
        let holders = app
            .classes()
            .filter(|(_, c)| c.synthetic == Some(SyntheticKind::SharedEnumUnboxingUtility))
            .count();
        assert_eq!(holders, 1);
        assert!(pins.is_no_class_merging(utility.class));
        forget_shared_utility("test-reuse-lib");
        forget_shared_utility("test-reuse-app");
    }

    #[test]
    fn test_tampered_holder_not_reused() {
        let mut program = Program::new("test-tampered");
        let pins = PassPins::new();
        let first = ensure_shared_utility(&mut program, "com.example.E", &pins, &EventLog::new()).unwrap();
        let ordinal = first.method(Shim::Ordinal);
        let other = Shim::ZeroCheck.body(&program);
        let mut tampered = other;
        tampered.values[0] = Type::Int;
        tampered.blocks.swap(1, 2);
        program.method_mut(ordinal).code = Some(tampered);

        let second = ensure_shared_utility(&mut program, "com.example.E", &pins, &EventLog::new()).unwrap();
        assert_ne!(first.class, second.class);
        assert!(!second.reused);
        forget_shared_utility("test-tampered");
    }

    #[test]
    fn test_prune_removes_uncalled_shims() {
        let mut program = Program::new("test-prune");
        let entry = caller(&mut program, Shim::Ordinal, &[ConstValue::Int(1)]);
        let utility = ensure_shared_utility(&mut program, "com.example.E", &PassPins::new(), &EventLog::new()).unwrap();
        let removed = prune_shared_utility(&mut program, &utility, &EventLog::new());
        assert_eq!(removed, 6);
        assert!(program.is_live_method(utility.method(Shim::Ordinal)));
        assert_eq!(execute(&program, entry).unwrap().transcript(), vec!["0"]);
        forget_shared_utility("test-prune");
    }
}
