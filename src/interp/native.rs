//! Native implementations of the modeled library methods.
//!
//! Each [`LibraryMethod`] is executed directly against the interpreter heap. The
//! behavior follows the JDK contract closely where unboxing can observe it: null
//! receivers raise `NullPointerException`, `Enum.valueOf` reproduces the exact JDK
//! messages, and `toString`/`equals`/`hashCode` dispatch to program overrides.

use crate::{
    interp::{
        string_hash, CollectionKind, EnumData, Exec, ExceptionKind, HeapObject,
        InterpError, Interpreter, Thrown, Value,
    },
    program::{ClassId, LibraryMethod, LibraryType, MethodId, Type},
};

const TO_STRING: (&str, &str) = ("toString", "()Ljava/lang/String;");
const EQUALS: (&str, &str) = ("equals", "(Ljava/lang/Object;)Z");
const HASH_CODE: (&str, &str) = ("hashCode", "()I");

impl Interpreter<'_> {
    /// Executes a library call. `args` include the receiver of instance methods.
    #[allow(clippy::too_many_lines)]
    pub(super) fn native(&mut self, caller: MethodId, method: LibraryMethod, args: &[Value]) -> Exec<Option<Value>> {
        let arity = method.operand_types().len();
        if args.len() != arity {
            return Err(self.malformed(
                caller,
                format!("{method} expects {arity} operands, got {}", args.len()),
            ));
        }
        let arg = |i: usize| args[i].clone();

        let result = match method {
            LibraryMethod::EnumInit => {
                let name = arg(1).as_str().map(str::to_string).unwrap_or_default();
                let ordinal = arg(2)
                    .as_int()
                    .ok_or_else(|| self.mismatch(caller, "int", &args[2]))?;
                match arg(0).as_obj().and_then(|r| self.heap.get_mut(r.0)) {
                    Some(HeapObject::Instance { enum_data, .. }) => {
                        *enum_data = Some(EnumData { name, ordinal });
                    }
                    _ => return Err(self.mismatch(caller, "enum instance", &args[0])),
                }
                None
            }
            LibraryMethod::EnumOrdinal => {
                let data = self.enum_data(caller, &arg(0))?;
                Some(Value::Int(data.ordinal))
            }
            LibraryMethod::EnumName => {
                let data = self.enum_data(caller, &arg(0))?;
                Some(Value::str(&data.name))
            }
            LibraryMethod::EnumToString | LibraryMethod::ObjectToString => {
                let receiver = self.non_null(arg(0))?;
                Some(Value::str(&self.stringify(&receiver)?))
            }
            LibraryMethod::EnumEquals => {
                let receiver = self.non_null(arg(0))?;
                Some(Value::Bool(self.identical(&receiver, &args[1])))
            }
            LibraryMethod::ObjectEquals => {
                let receiver = self.non_null(arg(0))?;
                Some(Value::Bool(self.equals(&receiver, &args[1])?))
            }
            LibraryMethod::EnumHashCode => {
                let receiver = self.non_null(arg(0))?;
                Some(Value::Int(self.identity_hash(&receiver)))
            }
            LibraryMethod::ObjectHashCode => {
                let receiver = self.non_null(arg(0))?;
                Some(Value::Int(self.hash_code(&receiver)?))
            }
            LibraryMethod::EnumCompareTo => {
                let this = self.enum_data(caller, &arg(0))?;
                let other = self.enum_data(caller, &arg(1))?;
                let this_class = self.enum_class_of(&args[0]);
                let other_class = self.enum_class_of(&args[1]);
                if this_class != other_class {
                    return Err(self.throw(ExceptionKind::ClassCastException, None));
                }
                Some(Value::Int(this.ordinal.wrapping_sub(other.ordinal)))
            }
            LibraryMethod::EnumValueOf => Some(self.value_of(caller, &arg(0), &arg(1))?),
            LibraryMethod::ObjectInit => None,
            LibraryMethod::ObjectGetClass => {
                let receiver = self.non_null(arg(0))?;
                let ty = self
                    .runtime_type(&receiver)
                    .ok_or_else(|| self.mismatch(caller, "object", &receiver))?;
                Some(Value::Class(ty))
            }
            LibraryMethod::ClassGetName => {
                let ty = self.class_value(caller, &arg(0))?;
                Some(Value::str(&self.type_name(&ty)))
            }
            LibraryMethod::ClassGetSimpleName => {
                let ty = self.class_value(caller, &arg(0))?;
                Some(Value::str(&self.simple_type_name(&ty)))
            }
            LibraryMethod::ClassGetCanonicalName => {
                let ty = self.class_value(caller, &arg(0))?;
                Some(Value::str(&self.canonical_type_name(&ty)))
            }
            LibraryMethod::ObjectsRequireNonNull => Some(self.non_null(arg(0))?),
            LibraryMethod::ObjectsRequireNonNullMessage => {
                if arg(0).is_null() {
                    let message = arg(1).as_str().map(str::to_string);
                    return Err(self.throw(ExceptionKind::NullPointerException, message));
                }
                Some(arg(0))
            }
            LibraryMethod::StringValueOf => Some(Value::str(&self.stringify(&arg(0))?)),
            LibraryMethod::StringConcat => {
                let lhs = self.non_null(arg(0))?;
                let rhs = self.non_null(arg(1))?;
                match (lhs.as_str(), rhs.as_str()) {
                    (Some(a), Some(b)) => Some(Value::str(&format!("{a}{b}"))),
                    _ => return Err(self.mismatch(caller, "string", &lhs)),
                }
            }
            LibraryMethod::StringEquals => {
                let receiver = self.non_null(arg(0))?;
                let same = matches!((receiver.as_str(), args[1].as_str()), (Some(a), Some(b)) if a == b);
                Some(Value::Bool(same))
            }
            LibraryMethod::SystemIdentityHashCode => Some(Value::Int(self.identity_hash(&arg(0)))),
            LibraryMethod::ArrayClone => {
                let array = self.non_null(arg(0))?;
                let copy = match array.as_obj().and_then(|r| self.heap.get(r.0)) {
                    Some(HeapObject::Array { element, data }) => HeapObject::Array {
                        element: element.clone(),
                        data: data.clone(),
                    },
                    _ => return Err(self.mismatch(caller, "array", &array)),
                };
                Some(Value::Ref(self.alloc(copy)))
            }
            LibraryMethod::PrintlnString
            | LibraryMethod::PrintlnInt
            | LibraryMethod::PrintlnBoolean
            | LibraryMethod::PrintlnObject => {
                let line = self.stringify(&arg(0))?;
                self.output.push(line);
                None
            }
            LibraryMethod::EnumSetAllOf => {
                let class = self.enum_class_value(caller, &arg(0))?;
                let size = self.enum_constants(class)?.len();
                Some(self.collection(CollectionKind::EnumSet, size))
            }
            LibraryMethod::EnumSetNoneOf => {
                self.enum_class_value(caller, &arg(0))?;
                Some(self.collection(CollectionKind::EnumSet, 0))
            }
            LibraryMethod::EnumMapNew => {
                self.enum_class_value(caller, &arg(0))?;
                Some(self.collection(CollectionKind::EnumMap, 0))
            }
            LibraryMethod::CollectionSize => {
                let collection = self.non_null(arg(0))?;
                match collection.as_obj().and_then(|r| self.heap.get(r.0)) {
                    Some(HeapObject::Collection { size, .. }) => {
                        Some(Value::Int(i32::try_from(*size).unwrap_or(i32::MAX)))
                    }
                    _ => return Err(self.mismatch(caller, "collection", &collection)),
                }
            }
            LibraryMethod::NewNullPointerException => {
                Some(self.exception(ExceptionKind::NullPointerException, None))
            }
            LibraryMethod::NewNullPointerExceptionMessage => {
                let message = arg(0).as_str().map(str::to_string);
                Some(self.exception(ExceptionKind::NullPointerException, message))
            }
            LibraryMethod::NewIllegalArgumentException => {
                let message = arg(0).as_str().map(str::to_string);
                Some(self.exception(ExceptionKind::IllegalArgumentException, message))
            }
        };
        Ok(result)
    }

    fn exception(&mut self, kind: ExceptionKind, message: Option<String>) -> Value {
        Value::Ref(self.alloc(HeapObject::Throwable(Thrown { kind, message })))
    }

    fn collection(&mut self, kind: CollectionKind, size: usize) -> Value {
        Value::Ref(self.alloc(HeapObject::Collection { kind, size }))
    }

    fn non_null(&mut self, value: Value) -> Exec<Value> {
        if value.is_null() {
            Err(self.null_pointer())
        } else {
            Ok(value)
        }
    }

    fn enum_data(&mut self, caller: MethodId, value: &Value) -> Exec<EnumData> {
        match value {
            Value::Null => Err(self.null_pointer()),
            Value::Ref(r) => match self.heap.get(r.0) {
                Some(HeapObject::Instance {
                    enum_data: Some(data),
                    ..
                }) => Ok(data.clone()),
                _ => Err(self.mismatch(caller, "enum constant", value)),
            },
            other => Err(self.mismatch(caller, "enum constant", other)),
        }
    }

    /// The declaring enum of a constant; constant bodies map to their superclass.
    fn enum_class_of(&self, value: &Value) -> Option<ClassId> {
        let class = self.runtime_class(value)?;
        match self.program.superclass(class) {
            Some(parent) if self.program.class(parent).is_enum() => Some(parent),
            _ => Some(class),
        }
    }

    fn class_value(&mut self, caller: MethodId, value: &Value) -> Exec<Type> {
        match value {
            Value::Null => Err(self.null_pointer()),
            Value::Class(ty) => Ok(ty.clone()),
            other => Err(self.mismatch(caller, "class", other)),
        }
    }

    fn enum_class_value(&mut self, caller: MethodId, value: &Value) -> Exec<ClassId> {
        match self.class_value(caller, value)? {
            Type::Class(class) if self.program.inherits_library(class, LibraryType::Enum) => {
                Ok(class)
            }
            other => Err(InterpError::NotAnEnum(self.type_name(&other)).into()),
        }
    }

    /// Returns the constants of an enum in ordinal order, as `values()` does.
    fn enum_constants(&mut self, class: ClassId) -> Exec<Vec<Value>> {
        self.ensure_initialized(class)?;
        let program = self.program;
        let values = program.class(class).methods.iter().copied().find(|m| {
            let def = program.method(*m);
            def.name == "values" && def.is_static() && def.params.is_empty()
        });
        let Some(values) = values else {
            return Err(InterpError::NotAnEnum(program.class(class).name.clone()).into());
        };
        let array = self.call(values, Vec::new())?.unwrap_or(Value::Null);
        match array.as_obj().and_then(|r| self.heap.get(r.0)) {
            Some(HeapObject::Array { data, .. }) => Ok(data.clone()),
            _ => Err(InterpError::NotAnEnum(program.class(class).name.clone()).into()),
        }
    }

    fn value_of(&mut self, caller: MethodId, class: &Value, name: &Value) -> Exec<Value> {
        let class = self.enum_class_value(caller, class)?;
        let constants = self.enum_constants(class)?;
        if let Some(wanted) = name.as_str() {
            for constant in constants {
                if let Some(HeapObject::Instance {
                    enum_data: Some(data),
                    ..
                }) = constant.as_obj().and_then(|r| self.heap.get(r.0))
                {
                    if data.name == wanted {
                        return Ok(constant);
                    }
                }
            }
        }
        if name.is_null() {
            return Err(self.throw(
                ExceptionKind::NullPointerException,
                Some("Name is null".to_string()),
            ));
        }
        let message = format!(
            "No enum constant {}.{}",
            self.program.class(class).canonical_name(),
            name.as_str().unwrap_or_default()
        );
        Err(self.throw(ExceptionKind::IllegalArgumentException, Some(message)))
    }

    /// Finds a program override of a library virtual on the receiver's class.
    fn override_of(&self, receiver: &Value, (name, descriptor): (&str, &str)) -> Option<MethodId> {
        let class = self.runtime_class(receiver)?;
        self.program.dispatch(class, name, descriptor)
    }

    /// `String.valueOf(Object)`.
    pub(super) fn stringify(&mut self, value: &Value) -> Exec<String> {
        let Value::Ref(r) = value else {
            return Ok(match value {
                Value::Class(ty) => format!("class {}", self.type_name(ty)),
                other => other.to_string(),
            });
        };
        if let Some(method) = self.override_of(value, TO_STRING) {
            let result = self.call(method, vec![value.clone()])?;
            return Ok(match result {
                Some(Value::Str(s)) => s.to_string(),
                _ => "null".to_string(),
            });
        }
        let hash = r.identity_hash();
        Ok(match self.heap.get(r.0) {
            Some(HeapObject::Instance {
                enum_data: Some(data),
                ..
            }) => data.name.clone(),
            Some(HeapObject::Instance { class, .. }) => {
                format!("{}@{hash:x}", self.program.class(*class).name)
            }
            Some(HeapObject::Array { element, .. }) => {
                let ty = Type::array_of(element.clone());
                format!("{}@{hash:x}", self.type_name(&ty))
            }
            Some(HeapObject::Throwable(thrown)) => thrown.to_string(),
            Some(HeapObject::Collection { size, .. }) => format!("[{size} elements]"),
            None => "null".to_string(),
        })
    }

    fn equals(&mut self, receiver: &Value, other: &Value) -> Exec<bool> {
        if let Some(method) = self.override_of(receiver, EQUALS) {
            let result = self.call(method, vec![receiver.clone(), other.clone()])?;
            return Ok(matches!(result, Some(Value::Bool(true))));
        }
        Ok(self.identical(receiver, other))
    }

    fn hash_code(&mut self, receiver: &Value) -> Exec<i32> {
        if let Some(method) = self.override_of(receiver, HASH_CODE) {
            let result = self.call(method, vec![receiver.clone()])?;
            return Ok(result.and_then(|v| v.as_int()).unwrap_or(0));
        }
        Ok(self.identity_hash(receiver))
    }

    fn identity_hash(&self, value: &Value) -> i32 {
        match value {
            Value::Null => 0,
            Value::Ref(r) => r.identity_hash(),
            Value::Str(s) => string_hash(s),
            Value::Class(ty) => string_hash(&self.type_name(ty)),
            Value::Int(v) => *v,
            Value::Bool(v) => i32::from(*v),
            #[allow(clippy::cast_possible_truncation)]
            Value::Long(v) => (*v ^ (*v >> 32)) as i32,
            #[allow(clippy::cast_possible_truncation)]
            Value::Double(v) => v.to_bits() as i32,
        }
    }

    fn simple_type_name(&self, ty: &Type) -> String {
        match ty {
            Type::Class(id) => self.program.class(*id).simple_name().to_string(),
            Type::Array(element) => format!("{}[]", self.simple_type_name(element)),
            other => {
                let name = self.type_name(other);
                name.rsplit('.').next().unwrap_or(&name).to_string()
            }
        }
    }

    fn canonical_type_name(&self, ty: &Type) -> String {
        match ty {
            Type::Class(id) => self.program.class(*id).canonical_name(),
            Type::Array(element) => format!("{}[]", self.canonical_type_name(element)),
            other => self.type_name(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        interp::{execute, ExceptionKind},
        program::{EnumHandle, LibraryMethod, ProgramBuilder, Type},
    };

    fn enum_program() -> (ProgramBuilder, EnumHandle) {
        let mut pb = ProgramBuilder::new("test");
        let e = pb
            .enum_class("com.example.MyEnum")
            .constants(&["A", "B", "C"])
            .build()
            .unwrap();
        (pb, e)
    }

    #[test]
    fn test_value_of_messages() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let ok = pb.static_method(main, "ok", vec![], Type::Void);
        pb.code(ok, |f| {
            f.block(0, |b| {
                let name = b.const_str("B");
                let found = b.call_static(e.value_of_method, &[name]);
                let ordinal = b.lib(LibraryMethod::EnumOrdinal, &[found]);
                b.println(ordinal);
                b.ret();
            });
        });
        let missing = pb.static_method(main, "missing", vec![], Type::Void);
        pb.code(missing, |f| {
            f.block(0, |b| {
                let name = b.const_str("Z");
                b.call_static(e.value_of_method, &[name]);
                b.ret();
            });
        });
        let null = pb.static_method(main, "null", vec![], Type::Void);
        pb.code(null, |f| {
            f.block(0, |b| {
                let name = b.const_null();
                b.call_static(e.value_of_method, &[name]);
                b.ret();
            });
        });
        let program = pb.build();

        assert_eq!(execute(&program, ok).unwrap().output, vec!["1"]);

        let thrown = execute(&program, missing).unwrap().thrown().cloned().unwrap();
        assert_eq!(thrown.kind, ExceptionKind::IllegalArgumentException);
        assert_eq!(
            thrown.message.as_deref(),
            Some("No enum constant com.example.MyEnum.Z")
        );

        let thrown = execute(&program, null).unwrap().thrown().cloned().unwrap();
        assert_eq!(thrown.kind, ExceptionKind::NullPointerException);
        assert_eq!(thrown.message.as_deref(), Some("Name is null"));
    }

    #[test]
    fn test_enum_to_string_and_reflection() {
        let (mut pb, e) = enum_program();
        let main = pb.class("Main").unwrap();
        let m = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(m, |f| {
            f.block(0, |b| {
                let c = b.sget(e.constants[2]);
                b.println(c);
                let class = b.lib(LibraryMethod::ObjectGetClass, &[c]);
                let name = b.lib(LibraryMethod::ClassGetName, &[class]);
                b.println(name);
                let simple = b.lib(LibraryMethod::ClassGetSimpleName, &[class]);
                b.println(simple);
                let a = b.sget(e.constants[0]);
                let cmp = b.lib(LibraryMethod::EnumCompareTo, &[a, c]);
                b.println(cmp);
                let eq = b.lib(LibraryMethod::EnumEquals, &[a, c]);
                b.println(eq);
                b.ret();
            });
        });
        let program = pb.build();
        let execution = execute(&program, m).unwrap();
        assert_eq!(
            execution.output,
            vec!["C", "com.example.MyEnum", "MyEnum", "-2", "false"]
        );
    }

    #[test]
    fn test_null_receiver_raises() {
        let (mut pb, _) = enum_program();
        let main = pb.class("Main").unwrap();
        let m = pb.static_method(main, "main", vec![], Type::Void);
        pb.code(m, |f| {
            f.block(0, |b| {
                let null = b.const_null();
                b.lib(LibraryMethod::EnumOrdinal, &[null]);
                b.ret();
            });
        });
        let program = pb.build();
        let execution = execute(&program, m).unwrap();
        assert_eq!(
            execution.thrown().map(|t| t.kind),
            Some(ExceptionKind::NullPointerException)
        );
    }
}
