//! `CheckEnumUnboxed` enforcement.

use crate::{
    enums::candidate::CandidateSet,
    program::Program,
    Error, Result,
};

/// Fails if an enum flagged as required-to-be-unboxed stayed boxed.
///
/// # Errors
///
/// Returns [`Error::CheckEnumUnboxed`] listing every offending enum, sorted by name.
pub fn check_enum_unboxed(program: &Program, candidates: &CandidateSet) -> Result<()> {
    let mut enums: Vec<String> = candidates
        .boxed()
        .filter(|c| program.is_live_class(c.class) && program.class(c.class).check_enum_unboxed)
        .map(|c| c.name.clone())
        .collect();
    if enums.is_empty() {
        return Ok(());
    }
    enums.sort();
    Err(Error::CheckEnumUnboxed { enums })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        enums::{collector::collect, reason::BoxingReason},
        events::EventLog,
        program::{KeepPredicate, PassPins, ProgramBuilder},
    };

    #[test]
    fn test_boxed_flagged_enums_fail_sorted() {
        let mut pb = ProgramBuilder::new("test");
        let zeta = pb.enum_class("com.example.Zeta").constants(&["Z"]).check_unboxed().build().unwrap();
        let alpha = pb.enum_class("com.example.Alpha").constants(&["A"]).check_unboxed().build().unwrap();
        let free = pb.enum_class("com.example.Free").constants(&["F"]).build().unwrap();
        let program = pb.build();
        let events = EventLog::new();
        let mut set = collect(&program, &KeepPredicate::none(), &PassPins::new(), &events);
        assert!(check_enum_unboxed(&program, &set).is_ok());

        for class in [zeta.class, alpha.class, free.class] {
            set.box_candidate(class, BoxingReason::ObjectEscape, None);
        }
        let error = check_enum_unboxed(&program, &set).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Enum unboxing checks failed.\nEnum com.example.Alpha was not unboxed.\nEnum com.example.Zeta was not unboxed."
        );
    }
}
