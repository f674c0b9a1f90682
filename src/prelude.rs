//! # enumbox Prelude
//!
//! This module provides a convenient prelude for the most commonly used types from
//! the enumbox library. Import it to build programs, run the unboxer and inspect
//! the results without spelling out module paths.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all enumbox operations
pub use crate::Error;

/// The result type used throughout enumbox
pub use crate::Result;

// ================================================================================================
// Program Model
// ================================================================================================

/// Programs, their arenas and the construction DSL
pub use crate::program::{
    Callee, ClassDef, ClassFlags, ClassId, CmpKind, Code, ConstValue, EnumHandle, FieldFlags,
    FieldId, Instr, InvokeKind, KeepFlags, KeepPredicate, KeepTarget, LibraryMethod, LibraryType,
    MethodFlags, MethodId, PassPins, Program, ProgramBuilder, Type, ValueId,
};

// ================================================================================================
// Unboxing Engine
// ================================================================================================

/// Engine entry point, configuration and results
pub use crate::enums::{
    BoxingReason, CandidateStatus, EnumUnboxer, RewriteRecord, SignatureRewriteListener,
    UnboxingConfig, UnboxingReport,
};

/// Event log
pub use crate::events::{Event, EventKind, EventLog};

// ================================================================================================
// Reference Interpreter
// ================================================================================================

/// Behavior comparison helpers
pub use crate::interp::{execute, Execution, Interpreter, Value};
