//! Always-null facts.
//!
//! A value that is provably `null` on every path may flow into a slot of any
//! reference type without making its enum escape: after unboxing it is simply
//! `0` on the enum side and `null` on the other. Facts come from `null`
//! constants, casts and phis of such values, and parameters of non-virtual
//! methods that every call site passes `null`.

use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::{
    enums::candidate::CandidateSet,
    program::{Callee, Code, ConstValue, Instr, KeepPredicate, KeepTarget, MethodId, Program, ValueId},
};

/// Parameters that receive `null` at every call site.
#[derive(Debug, Clone, Default)]
pub struct NullParams {
    params: FxHashSet<(MethodId, u16)>,
}

impl NullParams {
    /// Computes the parameters of enum type that are always passed `null`.
    ///
    /// Only non-virtual, non-kept methods with at least one call site qualify;
    /// anything else may be called from code the analysis cannot see.
    #[must_use]
    pub fn compute(program: &Program, keep: &KeepPredicate, candidates: &CandidateSet) -> Self {
        let mut params: FxHashSet<(MethodId, u16)> = FxHashSet::default();
        for (id, method) in program.methods() {
            if method.code.is_none() || !method.is_non_virtual() || keep.is_kept(KeepTarget::Method(id)) {
                continue;
            }
            for index in 0..method.arg_count() {
                if index == 0 && !method.is_static() {
                    continue;
                }
                let is_enum_param = method
                    .arg_type(index)
                    .and_then(|ty| if ty.dimensions() == 0 { ty.base_class() } else { None })
                    .is_some_and(|class| candidates.contains(class));
                if let (true, Ok(index)) = (is_enum_param, u16::try_from(index)) {
                    params.insert((id, index));
                }
            }
        }
        if params.is_empty() {
            return Self { params };
        }

        let methods = program.methods_with_code();
        let mut called: FxHashSet<MethodId> = FxHashSet::default();
        loop {
            let current = Self {
                params: params.clone(),
            };
            let observations: Vec<(Vec<(MethodId, u16)>, Vec<MethodId>)> = methods
                .par_iter()
                .filter_map(|id| {
                    let code = program.method(*id).code.as_ref()?;
                    Some(current.non_null_arguments(*id, code))
                })
                .collect();

            let before = params.len();
            for (non_null, callees) in observations {
                for key in non_null {
                    params.remove(&key);
                }
                called.extend(callees);
            }
            params.retain(|(method, _)| called.contains(method));
            if params.len() == before {
                return Self { params };
            }
        }
    }

    /// Returns the tracked parameters passed a possibly non-null value in `method`,
    /// and the callees invoked from it.
    fn non_null_arguments(&self, method: MethodId, code: &Code) -> (Vec<(MethodId, u16)>, Vec<MethodId>) {
        let local = AlwaysNull::compute(method, code, self);
        let mut non_null = Vec::new();
        let mut callees = Vec::new();
        for (_, instr) in code.iter_instrs() {
            let Instr::Invoke {
                callee: Callee::Program(callee),
                args,
                ..
            } = instr
            else {
                continue;
            };
            callees.push(*callee);
            for (index, arg) in args.iter().enumerate() {
                let Ok(index) = u16::try_from(index) else {
                    continue;
                };
                if self.contains(*callee, index) && !local.contains(*arg) {
                    non_null.push((*callee, index));
                }
            }
        }
        (non_null, callees)
    }

    /// Returns true if argument `index` of `method` is always `null`.
    #[must_use]
    pub fn contains(&self, method: MethodId, index: u16) -> bool {
        self.params.contains(&(method, index))
    }

    /// Returns the number of tracked parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns true if no parameter is always `null`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Values of one method body that are `null` on every path.
#[derive(Debug, Clone, Default)]
pub struct AlwaysNull {
    values: FxHashSet<ValueId>,
}

impl AlwaysNull {
    /// Computes the always-null values of `code`.
    #[must_use]
    pub fn compute(method: MethodId, code: &Code, params: &NullParams) -> Self {
        let mut values = FxHashSet::default();
        loop {
            let before = values.len();
            for block in &code.blocks {
                for phi in &block.phis {
                    if !phi.operands.is_empty() && phi.operands.iter().all(|(_, v)| values.contains(v)) {
                        values.insert(phi.dest);
                    }
                }
                for instr in &block.instrs {
                    match instr {
                        Instr::Const {
                            dest,
                            value: ConstValue::Null,
                        } => {
                            values.insert(*dest);
                        }
                        Instr::Arg { dest, index } if params.contains(method, *index) => {
                            values.insert(*dest);
                        }
                        Instr::CheckCast { dest, value, .. } if values.contains(value) => {
                            values.insert(*dest);
                        }
                        _ => {}
                    }
                }
            }
            if values.len() == before {
                return Self { values };
            }
        }
    }

    /// Returns true if `value` is always `null`.
    #[must_use]
    pub fn contains(&self, value: ValueId) -> bool {
        self.values.contains(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::EventLog,
        enums::collector::collect,
        program::{PassPins, Type},
        test::enum_program,
    };

    #[test]
    fn test_null_parameter_and_phi() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let sink = pb.method(
            main,
            "sink",
            vec![e.ty()],
            Type::Void,
            crate::program::MethodFlags::PRIVATE | crate::program::MethodFlags::STATIC,
        );
        pb.code(sink, |f| {
            let arg = f.arg(0);
            f.block(0, |b| {
                b.println(arg);
                b.ret();
            });
        });
        let run = pb.static_method(main, "run", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let null = b.const_null();
                let cast = b.check_cast(null, e.ty());
                b.call_static_void(sink, &[cast]);
                b.ret();
            });
        });
        let program = pb.build();
        let candidates = collect(&program, &KeepPredicate::none(), &PassPins::new(), &EventLog::new());
        let params = NullParams::compute(&program, &KeepPredicate::none(), &candidates);
        assert!(params.contains(sink, 0));

        let code = program.method(sink).code.as_ref().unwrap();
        let local = AlwaysNull::compute(sink, code, &params);
        assert!(local.contains(ValueId::new(0)));
    }

    #[test]
    fn test_non_null_call_site_clears_fact() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let sink = pb.static_method(main, "sink", vec![e.ty()], Type::Void);
        pb.program_mut().method_mut(sink).flags |= crate::program::MethodFlags::PRIVATE;
        pb.code(sink, |f| f.block(0, |b| b.ret()));
        let run = pb.static_method(main, "run", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let null = b.const_null();
                b.call_static_void(sink, &[null]);
                let a = b.sget(e.constants[0]);
                b.call_static_void(sink, &[a]);
                b.ret();
            });
        });
        let program = pb.build();
        let candidates = collect(&program, &KeepPredicate::none(), &PassPins::new(), &EventLog::new());
        let params = NullParams::compute(&program, &KeepPredicate::none(), &candidates);
        assert!(params.is_empty());
    }
}
