use std::cell::RefCell;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;

use joy_assembler::assembler::validator::Violation;
use joy_assembler::assembler::{self, Assembler, Error};
use joy_assembler::vm::{Trap, Vm};

/// A clonable output sink handed to the VM so its stdout can be asserted on
#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("program output was not UTF-8")
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn assemble(source: &str) -> Result<Vm, Error> {
    Assembler::with_seed(0xc0ffee).assemble_source(source)
}

/// Run a freshly assembled machine to halt, returning its captured output.
fn run(vm: &mut Vm) -> Result<String, Trap> {
    let buffer = SharedBuffer::default();
    vm.set_output(Box::new(buffer.clone()));
    for _ in 0..100_000 {
        if !vm.step()? {
            return Ok(buffer.contents());
        }
    }
    panic!("program did not halt");
}

fn assemble_and_run(source: &str) -> String {
    let mut vm = assemble(source).expect("assembly failed");
    run(&mut vm).expect("execution trapped")
}

#[test]
fn addition_program() {
    let output = assemble_and_run(
        "mov 3\n\
         swp\n\
         mov 4\n\
         add\n\
         ptu\n\
         hlt\n",
    );
    assert_eq!(output, "7\n");
}

#[test]
fn countdown_loop() {
    let output = assemble_and_run(
        "mov 5\n\
         loop:\n\
         ptu\n\
         dec\n\
         jnz loop\n\
         hlt\n",
    );
    assert_eq!(output, "5\n4\n3\n2\n1\n");
}

#[test]
fn stack_call_and_return() {
    let mut vm = assemble(
        "stack:\n\
         data [4] 0\n\
         main:\n\
         mov 0x2a\n\
         cal sub\n\
         ptu\n\
         hlt\n\
         sub:\n\
         inc 1\n\
         ret\n",
    )
    .expect("assembly failed");
    assert_eq!(vm.stack_boundaries(), Some((0, 16)));
    let output = run(&mut vm).expect("execution trapped");
    assert_eq!(output, "43\n");
    // the stack pointer is back on its initial slot
    assert_eq!(vm.register_sc(), 0);
}

#[test]
fn undefined_label_suggests_the_closest_one() {
    let error = assemble(
        "loop:\n\
         nop\n\
         jmp @looop\n\
         hlt\n",
    )
    .expect_err("assembly succeeded");
    match &error {
        Error::UndefinedLabel { label, suggestions, .. } => {
            assert_eq!(label, "looop");
            assert_eq!(suggestions.first().map(String::as_str), Some("loop"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(error.to_string().contains("loop"));
}

#[test]
fn undefined_label_without_any_labels() {
    let error = assemble("jmp @nowhere\nhlt\n").expect_err("assembly succeeded");
    match &error {
        Error::UndefinedLabel { suggestions, .. } => assert!(suggestions.is_empty()),
        other => panic!("unexpected error: {other}"),
    }
    assert!(error.to_string().contains("no labels have been defined"));
}

#[test]
fn jump_into_a_data_word_is_rejected_statically() {
    // the JMP argument points one byte into the data region at 10
    let error = assemble(
        "jmp 11\n\
         hlt\n\
         data 42\n",
    )
    .expect_err("assembly succeeded");
    match &error {
        Error::StaticSemanticViolation { violation, .. } => {
            assert_eq!(*violation, Violation::MisalignedInstructionHead);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(error.to_string().contains("misaligned instruction"));
}

#[test]
fn word_load_of_a_misaligned_address_is_rejected_statically() {
    let error = assemble(
        "lda 16\n\
         hlt\n\
         data 1, 2\n",
    )
    .expect_err("assembly succeeded");
    assert!(matches!(
        error,
        Error::StaticSemanticViolation { violation: Violation::MisalignedDataHead, .. }
    ));
}

#[test]
fn endianness_pragma_mirrors_encoded_arguments() {
    let program = "mov 0x11223344\nptu\nhlt\n";
    let mut little = assemble(&format!("pragma_memory-mode := little-endian\n{program}"))
        .expect("little-endian assembly failed");
    let mut big = assemble(&format!("pragma_memory-mode := big-endian\n{program}"))
        .expect("big-endian assembly failed");

    let little_argument: Vec<u8> = little.memory()[1..5].to_vec();
    let mut big_argument: Vec<u8> = big.memory()[1..5].to_vec();
    big_argument.reverse();
    assert_eq!(little_argument, big_argument);
    assert_eq!(little_argument, vec![0x44, 0x33, 0x22, 0x11]);

    // observable behavior is identical in both byte orders
    let little_output = run(&mut little).expect("little-endian run trapped");
    let big_output = run(&mut big).expect("big-endian run trapped");
    assert_eq!(little_output, big_output);
    assert_eq!(little_output, "287454020\n");
}

#[test]
fn memory_size_pragma_sizes_the_machine() {
    let vm = assemble("pragma_memory-size := 0x100\nhlt\n").expect("assembly failed");
    assert_eq!(vm.memory().len(), 0x100);
}

#[test]
fn unusable_pragma_value_is_rejected() {
    assert!(matches!(
        assemble("pragma_memory-mode := middle-endian\nhlt\n"),
        Err(Error::BadPragma { .. })
    ));
    assert!(matches!(
        assemble("pragma_memory-size := huge\nhlt\n"),
        Err(Error::BadPragma { .. })
    ));
}

#[test]
fn character_literal_argument() {
    assert_eq!(assemble_and_run("mov 'a'\nptu\nhlt\n"), "97\n");
    assert_eq!(assemble_and_run("mov '\\n'\nptu\nhlt\n"), "10\n");
}

#[test]
fn character_output_emits_utf8() {
    assert_eq!(assemble_and_run("mov 0x2603\nptc\nhlt\n"), "☃");
}

#[test]
fn byte_granular_load_reads_single_data_bytes() {
    let output = assemble_and_run(
        "lya bytes\n\
         ptc\n\
         hlt\n\
         bytes:\n\
         data 0x41424344\n",
    );
    // little-endian: the lowest-addressed byte is 0x44
    assert_eq!(output, "D");
}

#[test]
fn signed_and_binary_printing() {
    assert_eq!(assemble_and_run("mov -5\npts\nhlt\n"), "-5\n");
    assert_eq!(
        assemble_and_run("mov 5\nptb\nhlt\n"),
        "0b00000000000000000000000000000101\n"
    );
}

#[test]
fn definitions_substitute_into_arguments() {
    let output = assemble_and_run(
        "answer := 0x2a\n\
         mov answer\n\
         ptu\n\
         hlt\n",
    );
    assert_eq!(output, "42\n");
}

#[test]
fn optional_arguments_fall_back_to_their_defaults() {
    // SHL defaults to 1, INC defaults to 1
    assert_eq!(assemble_and_run("mov 3\nshl\nptu\nhlt\n"), "6\n");
    assert_eq!(assemble_and_run("mov 3\ninc\nptu\nhlt\n"), "4\n");
}

#[test]
fn duplicate_definition_is_fatal() {
    assert!(matches!(
        assemble("x := 1\nx := 2\nhlt\n"),
        Err(Error::DuplicateDefinition { .. })
    ));
    assert!(matches!(
        assemble("x:\nx:\nhlt\n"),
        Err(Error::DuplicateDefinition { .. })
    ));
}

#[test]
fn arity_violations_are_fatal() {
    assert!(matches!(
        assemble("mov\nhlt\n"),
        Err(Error::MissingArgument { .. })
    ));
    assert!(matches!(
        assemble("hlt 5\n"),
        Err(Error::SuperfluousArgument { .. })
    ));
}

#[test]
fn unknown_mnemonics_and_junk_lines_are_fatal() {
    assert!(matches!(
        assemble("frobnicate 5\nhlt\n"),
        Err(Error::UnknownInstruction { .. })
    ));
    assert!(matches!(
        assemble("!!!\nhlt\n"),
        Err(Error::IncomprehensibleLine { .. })
    ));
}

#[test]
fn a_program_must_halt_somewhere() {
    assert!(matches!(assemble("mov 1\n"), Err(Error::NoHaltInstruction)));
}

#[test]
fn stack_instructions_require_a_stack_label() {
    assert!(matches!(
        assemble("psh\nhlt\n"),
        Err(Error::StackUsedButUndefined)
    ));
}

#[test]
fn data_above_code_needs_a_stack_label() {
    // a leading data run with no `stack:` leaves only one boundary derivable
    assert!(matches!(
        assemble("data 1\nhlt\n"),
        Err(Error::InconsistentStackBoundaries)
    ));
}

#[test]
fn comments_and_blank_lines_are_ignored() {
    let output = assemble_and_run(
        "; a comment-only line\n\
         \n\
         mov 7   ; trailing comment\n\
         \t ptu\n\
         hlt\n",
    );
    assert_eq!(output, "7\n");
}

#[test]
fn seeded_assembly_is_deterministic() {
    let program = "jmp main\n\
                   table:\n\
                   data [8] unif 100\n\
                   main:\n\
                   hlt\n";
    let a = Assembler::with_seed(9).assemble_source(program).expect("assembly failed");
    let b = Assembler::with_seed(9).assemble_source(program).expect("assembly failed");
    assert_eq!(a.memory(), b.memory());
}

#[test]
fn string_data_emits_one_word_per_rune() {
    let output = assemble_and_run(
        "lda text\n\
         ptc\n\
         hlt\n\
         text:\n\
         data \"Hi\"\n",
    );
    assert_eq!(output, "H");
}

#[test]
fn include_splices_a_file_in_place() {
    let mut vm = assembler::assemble_from_file(Path::new("tests/programs/include_main.joy"))
        .expect("assembly failed");
    let output = run(&mut vm).expect("execution trapped");
    assert_eq!(output, "43\n");
}

#[test]
fn include_cycles_are_rejected() {
    fn contains_recursive_include(error: &Error) -> bool {
        match error {
            Error::RecursiveInclude { .. } => true,
            Error::IncludeFailed { error, .. } => contains_recursive_include(error),
            _ => false,
        }
    }

    let error = assembler::assemble_from_file(Path::new("tests/programs/include_cycle_a.joy"))
        .expect_err("assembly succeeded");
    assert!(contains_recursive_include(&error), "got: {error}");
}

#[test]
fn missing_source_file_is_reported() {
    assert!(matches!(
        assembler::assemble_from_file(Path::new("tests/programs/no_such_file.joy")),
        Err(Error::SourceNotReadable { .. })
    ));
}

#[test]
fn memory_dump_snapshots_registers_and_memory() {
    let mut vm = assemble("mov 1\nhlt\n").expect("assembly failed");
    let buffer = SharedBuffer::default();
    vm.set_output(Box::new(buffer.clone()));
    vm.memory_dump();
    let dump = buffer.contents();
    assert!(dump.starts_with("A: 0x00000000, B: 0x00000000, PC: 0x00000000, SC: 0x00000000"));
    assert!(dump.contains("memory (65536B):"));
}

#[test]
fn runtime_stack_overflow_traps() {
    let mut vm = assemble(
        "stack:\n\
         data [1] 0\n\
         main:\n\
         psh\n\
         psh\n\
         hlt\n",
    )
    .expect("assembly failed");
    assert_eq!(run(&mut vm), Err(Trap::StackOverflow { address: 4 }));
}
