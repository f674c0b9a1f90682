use thiserror::Error;

use crate::interp::InterpError;

macro_rules! internal_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Internal {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Internal {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Renders one line per enum that failed a `CheckEnumUnboxed` contract.
fn format_check_failures(enums: &[String]) -> String {
    enums
        .iter()
        .map(|name| format!("Enum {name} was not unboxed."))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Analysis demotions are not errors: an enum that cannot be unboxed is simply left
/// boxed and reported through the event log. The variants below cover contract
/// violations the caller asked to be enforced, program shapes the rewriter refuses to
/// mis-compile, and malformed input.
///
/// # Error Categories
///
/// ## Policy Violations
/// - [`Error::CheckEnumUnboxed`] - An enum annotated as required-to-be-unboxed stayed boxed
///
/// ## Rewrite Verification
/// - [`Error::TypeCheck`] - The rewritten program no longer type checks
/// - [`Error::StaleReference`] - A collaborating pass still references a rewritten member
/// - [`Error::NotPruned`] - An unboxed enum is still referenced after rewriting
///
/// ## Program Model Errors
/// - [`Error::UnknownClass`] - Lookup of a class name failed
/// - [`Error::UnknownMember`] - Lookup of a member name failed
/// - [`Error::DuplicateClass`] - Two live classes would share a name
///
/// ## Internal Errors
/// - [`Error::Internal`] - An invariant of the engine itself was violated
/// - [`Error::Interp`] - The reference interpreter failed (not a thrown exception)
///
/// # Examples
///
/// ```rust,ignore
/// use enumbox::{Error, enums::EnumUnboxer};
///
/// match EnumUnboxer::new(config).run(&mut program) {
///     Ok(report) => println!("{}", report.summary()),
///     Err(Error::CheckEnumUnboxed { enums }) => eprintln!("still boxed: {enums:?}"),
///     Err(e) => eprintln!("unboxing failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// One or more enums annotated as required-to-be-unboxed were boxed.
    ///
    /// The message is matched verbatim by build tooling:
    /// `Enum unboxing checks failed.` followed by one
    /// `Enum <FQN> was not unboxed.` line per enum, sorted by name.
    #[error("Enum unboxing checks failed.\n{}", format_check_failures(.enums))]
    CheckEnumUnboxed {
        /// Fully qualified names of the offending enums, sorted.
        enums: Vec<String>,
    },

    /// The rewritten program failed verification.
    ///
    /// Raised instead of emitting code that would behave differently from the
    /// input. Suppressed by `UnboxingConfig::allow_type_errors`.
    #[error("Type check failed in {method}: {message}")]
    TypeCheck {
        /// The method containing the offending instruction.
        method: String,
        /// What went wrong.
        message: String,
    },

    /// A collaborating pass kept a reference to a member that no longer exists.
    ///
    /// `kind` names the runtime error the stale reference would surface as,
    /// e.g. `NoSuchMethodError`.
    #[error("{kind}: {reference} (held by {holder})")]
    StaleReference {
        /// Runtime error kind the reference would produce.
        kind: &'static str,
        /// The unresolvable reference.
        reference: String,
        /// Name of the collaborator holding it.
        holder: String,
    },

    /// An unboxed enum class could not be removed because code still refers to it.
    #[error("Unboxed enum {0} is still referenced and cannot be pruned")]
    NotPruned(String),

    /// A class name did not resolve.
    #[error("Unknown class: {0}")]
    UnknownClass(String),

    /// A member name did not resolve.
    #[error("Unknown member: {0}")]
    UnknownMember(String),

    /// A class with this name already exists.
    #[error("Duplicate class: {0}")]
    DuplicateClass(String),

    /// An engine invariant was violated.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated invariant
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Internal error - {file}:{line}: {message}")]
    Internal {
        /// The message to be printed for the Internal error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The reference interpreter could not execute the program.
    #[error("{0}")]
    Interp(#[from] InterpError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_enum_unboxed_message() {
        let error = Error::CheckEnumUnboxed {
            enums: vec!["com.example.A".into(), "com.example.B".into()],
        };
        assert_eq!(
            error.to_string(),
            "Enum unboxing checks failed.\nEnum com.example.A was not unboxed.\nEnum com.example.B was not unboxed."
        );
    }

    #[test]
    fn test_internal_error_macro() {
        let error = internal_error!("bad value {}", 3);
        match error {
            Error::Internal { message, file, .. } => {
                assert_eq!(message, "bad value 3");
                assert!(file.ends_with("error.rs"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
