use crate::{
    interp::execute,
    program::{EnumHandle, MethodId, Program, ProgramBuilder},
};

// Helper function to create a program holding `com.example.MyEnum { A, B, C }`
pub fn enum_program() -> (ProgramBuilder, EnumHandle) {
    let mut pb = ProgramBuilder::new("test");
    let handle = pb
        .enum_class("com.example.MyEnum")
        .constants(&["A", "B", "C"])
        .build()
        .unwrap();
    (pb, handle)
}

// Helper function to run `entry` and return printed lines plus any uncaught exception
pub fn transcript(program: &Program, entry: MethodId) -> Vec<String> {
    execute(program, entry).unwrap().transcript()
}
