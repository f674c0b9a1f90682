//! Interpreter error types.
//!
//! These are failures of the interpreter itself, not exceptions thrown by the
//! interpreted program. Program exceptions are part of a normal
//! [`Execution`](super::Execution).

use thiserror::Error;

/// Errors that stop interpretation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpError {
    /// The instruction budget was exhausted.
    #[error("step limit of {limit} instructions exceeded")]
    StepLimit {
        /// The configured budget.
        limit: u64,
    },

    /// Calls nested deeper than the configured limit.
    #[error("call depth limit of {limit} exceeded")]
    CallDepth {
        /// The configured limit.
        limit: usize,
    },

    /// A value was read before any instruction defined it.
    #[error("{method}: value v{value} read before definition")]
    UndefinedValue {
        /// The executing method.
        method: String,
        /// The offending value.
        value: u32,
    },

    /// An operand had the wrong runtime shape for the instruction.
    #[error("{method}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The executing method.
        method: String,
        /// What the instruction needed.
        expected: &'static str,
        /// What it got.
        found: &'static str,
    },

    /// The method body is structurally invalid.
    #[error("{method}: malformed code - {message}")]
    MalformedCode {
        /// The executing method.
        method: String,
        /// What is wrong.
        message: String,
    },

    /// A reflective enum operation was applied to a class that is not an enum.
    #[error("{0} is not an enum class")]
    NotAnEnum(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            InterpError::StepLimit { limit: 10 }.to_string(),
            "step limit of 10 instructions exceeded"
        );
        let error = InterpError::TypeMismatch {
            method: "Main.run()V".into(),
            expected: "int",
            found: "reference",
        };
        assert_eq!(error.to_string(), "Main.run()V: expected int, found reference");
    }
}
