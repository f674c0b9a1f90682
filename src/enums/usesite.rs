//! Use sites of enum-typed values.
//!
//! A [`UseSite`] is one place in a method body where a candidate's type is read,
//! written, converted or passed along. The set of kinds is closed: every
//! instruction or phi that touches a candidate produces zero or more sites of the
//! kinds below, and the analyzer decides each one with a single `match`.
//!
//! Collection is purely structural. Whether a site is compatible with unboxing
//! depends on candidate status, which changes between rounds, so the rules live
//! in the analyzer.

use rustc_hash::FxHashMap;

use crate::{
    enums::{candidate::CandidateSet, nullness::AlwaysNull},
    program::{
        BlockId, Callee, ClassId, Code, ConstValue, DefSite, FieldFlags, FieldId, Instr,
        LibraryMethod, MethodId, Program, Type, ValueId,
    },
};

/// Position inside a block; phis sort before instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Position {
    /// The phi at this index.
    Phi(usize),
    /// The instruction at this index.
    Instr(usize),
}

/// Where a use occurs in a method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    /// The block.
    pub block: BlockId,
    /// The phi or instruction within the block.
    pub position: Position,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.position {
            Position::Phi(index) => write!(f, "b{}:phi{index}", self.block),
            Position::Instr(index) => write!(f, "b{}:{index}", self.block),
        }
    }
}

/// The kind of slot a value flows into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// A static field.
    StaticField,
    /// An instance field.
    InstanceField,
    /// An array element.
    ArrayElement,
    /// A method argument.
    Argument,
    /// A method's return value.
    Return,
    /// A phi operand.
    Phi,
    /// A `checkcast` target.
    Cast,
    /// An `instanceof` target.
    TypeTest,
    /// The destination of a field, array or call read.
    Read,
}

/// How a class object produced from a candidate is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassUse {
    /// `Enum.valueOf(E.class, name)` cast straight back to `E`.
    ValueOf,
    /// `getName()`, `getSimpleName()` or `getCanonicalName()`.
    Name,
    /// `EnumSet.allOf/noneOf` or `new EnumMap`.
    EnumCollection,
    /// Anything else.
    Other,
}

/// How the result of a library call is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultUse {
    /// No result, or the result is never read.
    Unused,
    /// The result has the same static type as the candidate operand.
    SameType,
    /// Every reader casts the result back to the operand's type.
    CastBack,
    /// Read in some other way.
    Other,
}

/// A classified use of a candidate type.
#[derive(Debug, Clone, PartialEq)]
pub enum UseKind {
    /// A value of type `from` flows into a slot of a different type `to`.
    Flow {
        /// Static type of the value.
        from: Type,
        /// Static type of the slot.
        to: Type,
        /// What the slot is.
        slot: SlotKind,
    },
    /// A reference comparison between operands of different types.
    MixedComparison {
        /// Left operand type.
        lhs: Type,
        /// Right operand type.
        rhs: Type,
    },
    /// Read of an instance field declared by a candidate.
    FieldRead {
        /// The candidate.
        class: ClassId,
        /// The field.
        field: FieldId,
    },
    /// Write of a constant field or `$VALUES`.
    ConstantWrite {
        /// The candidate.
        class: ClassId,
        /// True inside the candidate's own class initializer.
        in_initializer: bool,
    },
    /// Write of an instance field declared by a candidate.
    InstanceWrite {
        /// The candidate.
        class: ClassId,
    },
    /// `new E`.
    Allocation {
        /// The candidate.
        class: ClassId,
        /// True inside the candidate's own class initializer.
        in_initializer: bool,
    },
    /// Call of a method declared by a candidate.
    MethodCall {
        /// The candidate.
        class: ClassId,
        /// The callee.
        callee: MethodId,
        /// True inside the candidate's own class initializer.
        in_initializer: bool,
    },
    /// Interface call with a candidate receiver.
    InterfaceCall {
        /// The candidate.
        class: ClassId,
        /// The interface method.
        callee: MethodId,
    },
    /// `E.class` or `E[].class`.
    ClassConstant {
        /// The candidate.
        class: ClassId,
        /// Array dimensions of the literal.
        dims: usize,
        /// How the class object is consumed.
        users: Vec<ClassUse>,
    },
    /// `e.getClass()`.
    GetClass {
        /// The candidate.
        class: ClassId,
        /// How the class object is consumed.
        users: Vec<ClassUse>,
    },
    /// A library call with a candidate-typed operand.
    LibraryCall {
        /// The candidate.
        class: ClassId,
        /// Array dimensions of the operand type.
        dims: usize,
        /// The library method.
        method: LibraryMethod,
        /// Index of the candidate-typed operand.
        operand: usize,
        /// Candidate of the receiver, if it has one.
        receiver: Option<ClassId>,
        /// How the result is consumed.
        result: ResultUse,
    },
    /// A candidate-typed value reaches a member reference that does not resolve.
    Unresolved {
        /// The candidate.
        class: ClassId,
    },
}

/// A use of a candidate type at a location.
#[derive(Debug, Clone, PartialEq)]
pub struct UseSite {
    /// Where the use occurs.
    pub location: Location,
    /// What the use is.
    pub kind: UseKind,
}

/// Maps every value to the locations reading it.
#[must_use]
pub fn users(code: &Code) -> FxHashMap<ValueId, Vec<Location>> {
    let mut users: FxHashMap<ValueId, Vec<Location>> = FxHashMap::default();
    for (block_id, block) in code.iter_blocks() {
        for (index, phi) in block.phis.iter().enumerate() {
            for (_, value) in &phi.operands {
                users.entry(*value).or_default().push(Location {
                    block: block_id,
                    position: Position::Phi(index),
                });
            }
        }
        for (index, instr) in block.instrs.iter().enumerate() {
            for value in instr.operands() {
                users.entry(value).or_default().push(Location {
                    block: block_id,
                    position: Position::Instr(index),
                });
            }
        }
    }
    users
}

/// Returns the instruction at `location`, if it is not a phi.
#[must_use]
pub fn instr_at(code: &Code, location: Location) -> Option<&Instr> {
    match location.position {
        Position::Instr(index) => code.block(location.block).instrs.get(index),
        Position::Phi(_) => None,
    }
}

/// Returns the candidate class an operand of type `ty` belongs to, at any array depth.
#[must_use]
pub fn candidate_of(candidates: &CandidateSet, ty: &Type) -> Option<ClassId> {
    ty.base_class().filter(|class| candidates.contains(*class))
}

/// Per-method state for use-site collection.
pub struct UseCollector<'a> {
    program: &'a Program,
    candidates: &'a CandidateSet,
    method: MethodId,
    code: &'a Code,
    always_null: &'a AlwaysNull,
    defs: FxHashMap<ValueId, DefSite>,
    users: FxHashMap<ValueId, Vec<Location>>,
    sites: Vec<UseSite>,
}

impl<'a> UseCollector<'a> {
    /// Prepares collection over one method body.
    #[must_use]
    pub fn new(
        program: &'a Program,
        candidates: &'a CandidateSet,
        method: MethodId,
        code: &'a Code,
        always_null: &'a AlwaysNull,
    ) -> Self {
        Self {
            program,
            candidates,
            method,
            code,
            always_null,
            defs: code.definitions(),
            users: users(code),
            sites: Vec::new(),
        }
    }

    /// Collects every use site of the body in block and instruction order.
    #[must_use]
    pub fn collect(mut self) -> Vec<UseSite> {
        let code = self.code;
        for (block_id, block) in code.iter_blocks() {
            for (index, phi) in block.phis.iter().enumerate() {
                let location = Location {
                    block: block_id,
                    position: Position::Phi(index),
                };
                let ty = code.ty(phi.dest).clone();
                for (_, value) in &phi.operands {
                    self.flow(location, *value, &ty, SlotKind::Phi);
                }
            }
            for (index, instr) in block.instrs.iter().enumerate() {
                let location = Location {
                    block: block_id,
                    position: Position::Instr(index),
                };
                self.instr(location, instr);
            }
        }
        self.sites
    }

    fn push(&mut self, location: Location, kind: UseKind) {
        self.sites.push(UseSite { location, kind });
    }

    fn candidate(&self, ty: &Type) -> Option<ClassId> {
        candidate_of(self.candidates, ty)
    }

    fn is_initializer_of(&self, class: ClassId) -> bool {
        let method = self.program.method(self.method);
        method.holder == class && method.is_class_initializer()
    }

    /// `value` flows into a slot of type `to`.
    fn flow(&mut self, location: Location, value: ValueId, to: &Type, slot: SlotKind) {
        let from = self.code.ty(value);
        if from == to || self.always_null.contains(value) {
            return;
        }
        if self.candidate(from).is_none() && self.candidate(to).is_none() {
            return;
        }
        self.push(
            location,
            UseKind::Flow {
                from: from.clone(),
                to: to.clone(),
                slot,
            },
        );
    }

    /// A read of declared type `from` lands in `dest`.
    fn read(&mut self, location: Location, from: &Type, dest: ValueId) {
        let to = self.code.ty(dest);
        if from == to || (self.candidate(from).is_none() && self.candidate(to).is_none()) {
            return;
        }
        self.push(
            location,
            UseKind::Flow {
                from: from.clone(),
                to: to.clone(),
                slot: SlotKind::Read,
            },
        );
    }

    fn comparison(&mut self, location: Location, lhs: ValueId, rhs: ValueId) {
        let (lt, rt) = (self.code.ty(lhs), self.code.ty(rhs));
        if lt == rt || self.always_null.contains(lhs) || self.always_null.contains(rhs) {
            return;
        }
        if self.candidate(lt).is_none() && self.candidate(rt).is_none() {
            return;
        }
        self.push(
            location,
            UseKind::MixedComparison {
                lhs: lt.clone(),
                rhs: rt.clone(),
            },
        );
    }

    fn readers(&self, value: ValueId) -> Vec<&'a Instr> {
        let code = self.code;
        self.users
            .get(&value)
            .map(|locations| {
                locations
                    .iter()
                    .filter_map(|location| instr_at(code, *location))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn has_phi_reader(&self, value: ValueId) -> bool {
        self.users.get(&value).is_some_and(|locations| {
            locations
                .iter()
                .any(|l| matches!(l.position, Position::Phi(_)))
        })
    }

    /// Classifies the readers of a class object for `class`.
    fn class_uses(&self, value: ValueId, class: ClassId, value_of_allowed: bool) -> Vec<ClassUse> {
        let mut uses = Vec::new();
        if self.has_phi_reader(value) {
            uses.push(ClassUse::Other);
        }
        for instr in self.readers(value) {
            let use_ = match instr {
                Instr::Invoke {
                    callee: Callee::Library(method),
                    args,
                    dest,
                    ..
                } if args.first() == Some(&value) && !args[1..].contains(&value) => match method {
                    LibraryMethod::EnumValueOf
                        if value_of_allowed && self.casts_back(*dest, &Type::Class(class)) =>
                    {
                        ClassUse::ValueOf
                    }
                    LibraryMethod::ClassGetName
                    | LibraryMethod::ClassGetSimpleName
                    | LibraryMethod::ClassGetCanonicalName => ClassUse::Name,
                    LibraryMethod::EnumSetAllOf
                    | LibraryMethod::EnumSetNoneOf
                    | LibraryMethod::EnumMapNew => ClassUse::EnumCollection,
                    _ => ClassUse::Other,
                },
                _ => ClassUse::Other,
            };
            uses.push(use_);
        }
        uses
    }

    /// Returns true if every reader of `value` casts it to `ty`.
    fn casts_back(&self, value: Option<ValueId>, ty: &Type) -> bool {
        let Some(value) = value else {
            return true;
        };
        !self.has_phi_reader(value)
            && self
                .readers(value)
                .iter()
                .all(|instr| matches!(instr, Instr::CheckCast { ty: cast, .. } if cast == ty))
    }

    fn result_use(&self, dest: Option<ValueId>, operand_ty: &Type) -> ResultUse {
        let Some(dest) = dest else {
            return ResultUse::Unused;
        };
        if !self.users.contains_key(&dest) {
            ResultUse::Unused
        } else if self.code.ty(dest) == operand_ty {
            ResultUse::SameType
        } else if self.casts_back(Some(dest), operand_ty) {
            ResultUse::CastBack
        } else {
            ResultUse::Other
        }
    }

    /// Returns true if `value` is `Enum.valueOf(E.class, ...)` for the class `ty` names.
    fn is_value_of_result(&self, value: ValueId, ty: &Type) -> bool {
        let Some(Instr::Invoke {
            callee: Callee::Library(LibraryMethod::EnumValueOf),
            args,
            ..
        }) = self.code.defining_instr(&self.defs, value)
        else {
            return false;
        };
        matches!(
            args.first().and_then(|a| self.code.defining_instr(&self.defs, *a)),
            Some(Instr::Const { value: ConstValue::Class(class), .. }) if class == ty
        )
    }

    /// Returns true if `value` is a clone of an array of type `ty`.
    fn is_clone_of(&self, value: ValueId, ty: &Type) -> bool {
        matches!(
            self.code.defining_instr(&self.defs, value),
            Some(Instr::Invoke { callee: Callee::Library(LibraryMethod::ArrayClone), args, .. })
                if args.first().is_some_and(|a| self.code.ty(*a) == ty)
        )
    }

    #[allow(clippy::too_many_lines)]
    fn instr(&mut self, location: Location, instr: &Instr) {
        let program = self.program;
        match instr {
            Instr::Const {
                dest,
                value: ConstValue::Class(ty),
            } => {
                if let Some(class) = self.candidate(ty) {
                    let dims = ty.dimensions();
                    let users = self.class_uses(*dest, class, dims == 0);
                    self.push(location, UseKind::ClassConstant { class, dims, users });
                }
            }
            Instr::Compare { cmp, lhs, rhs, .. } if cmp.is_equality() => {
                self.comparison(location, *lhs, *rhs);
            }
            Instr::If {
                cmp,
                lhs,
                rhs: Some(rhs),
                ..
            } if cmp.is_equality() => {
                self.comparison(location, *lhs, *rhs);
            }
            Instr::Return { value: Some(value) } => {
                let ret = program.method(self.method).ret.clone();
                self.flow(location, *value, &ret, SlotKind::Return);
            }
            Instr::StaticGet { dest, field } => {
                let ty = program.field(*field).ty.clone();
                self.read(location, &ty, *dest);
            }
            Instr::StaticPut { field, value } => {
                let def = program.field(*field);
                let ty = def.ty.clone();
                if self.candidates.contains(def.holder)
                    && (def.flags.contains(FieldFlags::ENUM) || def.name == "$VALUES")
                {
                    let class = def.holder;
                    let in_initializer = self.is_initializer_of(class);
                    self.push(
                        location,
                        UseKind::ConstantWrite {
                            class,
                            in_initializer,
                        },
                    );
                }
                self.flow(location, *value, &ty, SlotKind::StaticField);
            }
            Instr::InstanceGet { dest, field, .. } => {
                let def = program.field(*field);
                let ty = def.ty.clone();
                if self.candidates.contains(def.holder) {
                    self.push(
                        location,
                        UseKind::FieldRead {
                            class: def.holder,
                            field: *field,
                        },
                    );
                }
                self.read(location, &ty, *dest);
            }
            Instr::InstancePut { field, value, .. } => {
                let def = program.field(*field);
                let ty = def.ty.clone();
                if self.candidates.contains(def.holder) {
                    self.push(location, UseKind::InstanceWrite { class: def.holder });
                }
                self.flow(location, *value, &ty, SlotKind::InstanceField);
            }
            Instr::NewArrayFilled {
                element, values, ..
            } => {
                for value in values {
                    self.flow(location, *value, element, SlotKind::ArrayElement);
                }
            }
            Instr::ArrayGet { dest, array, .. } => {
                if let Some(element) = self.code.ty(*array).element().cloned() {
                    self.read(location, &element, *dest);
                }
            }
            Instr::ArrayPut { array, value, .. } => {
                if let Some(element) = self.code.ty(*array).element().cloned() {
                    self.flow(location, *value, &element, SlotKind::ArrayElement);
                }
            }
            Instr::NewInstance { class, .. } => {
                if self.candidates.contains(*class) {
                    let in_initializer = self.is_initializer_of(*class);
                    self.push(
                        location,
                        UseKind::Allocation {
                            class: *class,
                            in_initializer,
                        },
                    );
                }
            }
            Instr::CheckCast { dest, value, ty } => {
                let from = self.code.ty(*value).clone();
                let exempt = from == *ty
                    || self.always_null.contains(*value)
                    || self.is_value_of_result(*value, ty)
                    || self.is_clone_of(*value, ty);
                if !exempt {
                    self.flow(location, *value, ty, SlotKind::Cast);
                }
                self.read(location, ty, *dest);
            }
            Instr::InstanceOf { value, ty, .. } => {
                let from = self.code.ty(*value);
                if from != ty && (self.candidate(from).is_some() || self.candidate(ty).is_some()) {
                    self.push(
                        location,
                        UseKind::Flow {
                            from: from.clone(),
                            to: ty.clone(),
                            slot: SlotKind::TypeTest,
                        },
                    );
                }
            }
            Instr::Invoke {
                dest, callee, args, ..
            } => self.invoke(location, *dest, callee, args),
            _ => {}
        }
    }

    fn invoke(&mut self, location: Location, dest: Option<ValueId>, callee: &Callee, args: &[ValueId]) {
        let program = self.program;
        match callee {
            Callee::Program(callee) => {
                let def = program.method(*callee);
                if self.candidates.contains(def.holder) {
                    let in_initializer = self.is_initializer_of(def.holder);
                    self.push(
                        location,
                        UseKind::MethodCall {
                            class: def.holder,
                            callee: *callee,
                            in_initializer,
                        },
                    );
                } else {
                    let receiver_class = args
                        .first()
                        .map(|r| self.code.ty(*r))
                        .filter(|ty| ty.dimensions() == 0)
                        .and_then(|ty| self.candidate(ty));
                    let interface_receiver = !def.is_static() && program.class(def.holder).is_interface();
                    for (index, arg) in args.iter().enumerate() {
                        if index == 0 && interface_receiver {
                            if let Some(class) = receiver_class {
                                self.push(
                                    location,
                                    UseKind::InterfaceCall {
                                        class,
                                        callee: *callee,
                                    },
                                );
                                continue;
                            }
                        }
                        if let Some(ty) = def.arg_type(index) {
                            self.flow(location, *arg, &ty, SlotKind::Argument);
                        }
                    }
                }
                if let Some(dest) = dest {
                    let ret = def.ret.clone();
                    self.read(location, &ret, dest);
                }
            }
            Callee::Library(method) => self.library(location, dest, *method, args),
            Callee::Missing(_) => {
                let values = args.iter().copied().chain(dest);
                let classes: Vec<ClassId> = values
                    .filter_map(|v| self.candidate(self.code.ty(v)))
                    .collect();
                for class in classes {
                    self.push(location, UseKind::Unresolved { class });
                }
            }
        }
    }

    fn library(&mut self, location: Location, dest: Option<ValueId>, method: LibraryMethod, args: &[ValueId]) {
        let receiver = if method.is_static() {
            None
        } else {
            args.first()
                .map(|r| self.code.ty(*r))
                .filter(|ty| ty.dimensions() == 0)
                .and_then(|ty| self.candidate(ty))
        };

        if method == LibraryMethod::ObjectGetClass {
            if let (Some(class), Some(dest)) = (receiver, dest) {
                let users = self.class_uses(dest, class, false);
                self.push(location, UseKind::GetClass { class, users });
                return;
            }
        }

        let mut passthrough = false;
        for (operand, arg) in args.iter().enumerate() {
            let ty = self.code.ty(*arg).clone();
            let Some(class) = self.candidate(&ty) else {
                continue;
            };
            let result = self.result_use(dest, &ty);
            passthrough |= operand == 0
                && matches!(
                    method,
                    LibraryMethod::ObjectsRequireNonNull
                        | LibraryMethod::ObjectsRequireNonNullMessage
                        | LibraryMethod::ArrayClone
                )
                && dest.is_some_and(|d| self.code.ty(d) == &ty);
            self.push(
                location,
                UseKind::LibraryCall {
                    class,
                    dims: ty.dimensions(),
                    method,
                    operand,
                    receiver,
                    result,
                },
            );
        }
        if let (Some(dest), false) = (dest, passthrough) {
            self.read(location, &method.return_type(), dest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        enums::nullness::NullParams,
        program::{CmpKind, LibraryType},
        test::enum_program,
    };

    fn sites_of(program: &Program, method: MethodId) -> Vec<UseSite> {
        let mut candidates = CandidateSet::new();
        for (class, def) in program.classes() {
            if def.is_enum() {
                candidates.insert(class, def.name.clone(), 3);
            }
        }
        let code = program.method(method).code.as_ref().unwrap();
        let always_null = AlwaysNull::compute(method, code, &NullParams::default());
        UseCollector::new(program, &candidates, method, code, &always_null).collect()
    }

    #[test]
    fn test_object_escape_and_null_flow() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let sink = pb.static_field(main, "sink", Type::Object);
        let run = pb.static_method(main, "run", vec![], Type::Void);
        pb.code(run, |f| {
            f.block(0, |b| {
                let a = b.sget(e.constants[0]);
                b.sput(sink, a);
                let null = b.const_null();
                let typed = b.check_cast(null, e.ty());
                b.sput(sink, typed);
                b.ret();
            });
        });
        let program = pb.build();
        let sites = sites_of(&program, run);
        let flows: Vec<_> = sites
            .iter()
            .filter(|s| matches!(s.kind, UseKind::Flow { .. }))
            .collect();
        assert_eq!(flows.len(), 1);
        assert_eq!(
            flows[0].kind,
            UseKind::Flow {
                from: e.ty(),
                to: Type::Object,
                slot: SlotKind::StaticField
            }
        );
    }

    #[test]
    fn test_value_of_and_clone_casts_exempt() {
        let (pb, e) = enum_program();
        let program = pb.build();
        let value_of = sites_of(&program, e.value_of_method);
        assert!(value_of.iter().all(|s| !matches!(s.kind, UseKind::Flow { .. })));
        assert!(value_of.iter().any(|s| matches!(
            &s.kind,
            UseKind::ClassConstant { users, .. } if users == &[ClassUse::ValueOf]
        )));

        let values = sites_of(&program, e.values_method);
        assert!(values.iter().all(|s| !matches!(s.kind, UseKind::Flow { .. })));
        assert!(values.iter().any(|s| matches!(
            s.kind,
            UseKind::LibraryCall {
                method: LibraryMethod::ArrayClone,
                dims: 1,
                result: ResultUse::CastBack,
                ..
            }
        )));
    }

    #[test]
    fn test_comparisons_and_library_calls() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let run = pb.static_method(main, "run", vec![Type::Object], Type::Void);
        pb.code(run, |f| {
            let obj = f.arg(0);
            f.block(0, |b| {
                let a = b.sget(e.constants[0]);
                let bb = b.sget(e.constants[1]);
                b.compare(CmpKind::Eq, a, bb);
                b.compare(CmpKind::Eq, a, obj);
                b.lib(LibraryMethod::EnumOrdinal, &[a]);
                let class = b.lib(LibraryMethod::ObjectGetClass, &[a]);
                let name = b.lib(LibraryMethod::ClassGetName, &[class]);
                b.println(name);
                b.ret();
            });
        });
        let program = pb.build();
        let sites = sites_of(&program, run);
        assert_eq!(
            sites
                .iter()
                .filter(|s| matches!(s.kind, UseKind::MixedComparison { .. }))
                .count(),
            1
        );
        assert!(sites.iter().any(|s| matches!(
            s.kind,
            UseKind::LibraryCall {
                method: LibraryMethod::EnumOrdinal,
                receiver: Some(_),
                ..
            }
        )));
        assert!(sites.iter().any(|s| matches!(
            &s.kind,
            UseKind::GetClass { users, .. } if users == &[ClassUse::Name]
        )));
        // `Class.getName()` returns a String; nothing flows back into a candidate.
        assert!(!sites.iter().any(|s| matches!(
            &s.kind,
            UseKind::Flow { to: Type::Library(LibraryType::Class), .. }
        )));
    }

    #[test]
    fn test_clinit_writes_are_initializer_writes() {
        let (pb, e) = enum_program();
        let program = pb.build();
        let sites = sites_of(&program, e.clinit);
        let writes: Vec<_> = sites
            .iter()
            .filter_map(|s| match s.kind {
                UseKind::ConstantWrite { in_initializer, .. } => Some(in_initializer),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![true; 4]);
        assert!(sites.iter().all(|s| match s.kind {
            UseKind::Allocation { in_initializer, .. } => in_initializer,
            UseKind::MethodCall { in_initializer, .. } => in_initializer,
            _ => true,
        }));
    }

    #[test]
    fn test_location_order() {
        let phi = Location {
            block: BlockId::new(1),
            position: Position::Phi(3),
        };
        let instr = Location {
            block: BlockId::new(1),
            position: Position::Instr(0),
        };
        assert!(phi < instr);
        assert_eq!(instr.to_string(), "b1:0");
    }
}
