//! Converts Joy assembly source into an executable memory image in a
//! two-pass manner
//!
//! The first pass normalizes and classifies every source line, collects
//! definitions and labels, expands `data` directives and `include`s, and
//! assigns memory offsets. The second pass resolves each pending
//! instruction's argument against the symbol table, encodes the image into
//! VM memory and annotates each byte's semantic, which the static validator
//! then checks against every emitted pointer argument.
//!
//! Comments start with a semicolon (`;`) and continue to the end of the
//! line. Whitespace runs are collapsed before a line is classified, so
//! indentation is free-form. A non-blank line is one of:
//!
//! ```ignore
//! size := 0x20          ; definition: name a value
//! loop:                 ; label; `stack:` also marks the stack beginning
//! data 1, [8] 0, "hi"   ; data words: literals, sized fills, strings
//! data [16] unif 255    ; pseudo-random fill, upper bound inclusive
//! include "lib.joy"     ; splice another file in place
//! mov 'a'               ; an instruction with an optional argument
//! ```
//!
//! Labels are referenced as `@loop` (or bare as `loop`); definitions
//! substitute once. The pragma definitions `pragma_memory-mode :=
//! little-endian|big-endian` and `pragma_memory-size := N` configure the
//! machine the image is assembled for.

pub mod directives;
pub mod instructions;
pub mod statement;
pub mod validator;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::rng::Rng;
use crate::utf8;
use crate::vm::{MemoryMode, Vm};
use instructions::{ArgumentRule, InstructionName};
use statement::{Emission, EmittedInstruction, SourceLocation};

/// Definitions and labels; labels are keyed `"@" + name`
pub type SymbolTable = HashMap<String, String>;

const DEFAULT_MEMORY_SIZE: usize = 0x10000;

const IDENTIFIER: &str = r"[.$_A-Za-z-][.$_A-Za-z0-9-]*";
const VALUE: &str = r"[@.$'_A-Za-z0-9+-][.$'_A-Za-z0-9\\-]*";
const STRING: &str = r#""(?:[^"\\]|\\.)*""#;

/// The compiled line-classification grammar, built once per assembly
pub(crate) struct LinePatterns {
    definition: Regex,
    label: Regex,
    data: Regex,
    include: Regex,
    any_include: Regex,
    instruction: Regex,
    pub(crate) data_element: Regex,
    pub(crate) unif: Regex,
}

impl LinePatterns {
    fn new() -> LinePatterns {
        LinePatterns {
            definition: Regex::new(&format!("^({IDENTIFIER}) ?:= ?({VALUE})$")).unwrap(),
            label: Regex::new(&format!("^({IDENTIFIER}):$")).unwrap(),
            data: Regex::new("^data ?(.+)$").unwrap(),
            include: Regex::new(&format!("^include ?({STRING})$")).unwrap(),
            any_include: Regex::new("^include.*$").unwrap(),
            instruction: Regex::new(&format!("^({IDENTIFIER})( ({VALUE}))?$")).unwrap(),
            data_element: Regex::new(&format!(
                "^(?P<elt>(?:\\[(?P<size>{VALUE})\\])? ?(?P<value>unif {VALUE}|{VALUE})?|{STRING}) ?, ?(?P<rest>.*)$"
            ))
            .unwrap(),
            unif: Regex::new(&format!("^unif ({VALUE})$")).unwrap(),
        }
    }
}

/// Strip the comment, collapse whitespace runs to single spaces, trim
fn normalize_line(line: &str) -> String {
    let uncommented = line.splitn(2, ';').next().unwrap_or("");
    uncommented.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Assemble a file into a ready-to-run virtual machine
pub fn assemble_from_file(path: &Path) -> Result<Vm, Error> {
    Assembler::new().assemble_file(path)
}

/// The two-pass assembler; one value assembles one program
pub struct Assembler {
    definitions: SymbolTable,
    records: Vec<(SourceLocation, Emission)>,
    parsed_paths: HashSet<PathBuf>,
    mem_ptr: u32,
    stack_beginning: Option<u32>,
    rng: Rng,
    patterns: LinePatterns,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler::with_rng(Rng::new())
    }

    /// An assembler whose `unif` data directives draw deterministically
    pub fn with_seed(seed: u64) -> Assembler {
        Assembler::with_rng(Rng::with_seed(seed))
    }

    fn with_rng(rng: Rng) -> Assembler {
        Assembler {
            definitions: SymbolTable::new(),
            records: Vec::new(),
            parsed_paths: HashSet::new(),
            mem_ptr: 0,
            stack_beginning: None,
            rng,
            patterns: LinePatterns::new(),
        }
    }

    pub fn assemble_file(mut self, path: &Path) -> Result<Vm, Error> {
        self.parse_file(path)?;
        self.finish()
    }

    /// Assemble directly from source text; include paths resolve against
    /// the working directory
    pub fn assemble_source(mut self, source: &str) -> Result<Vm, Error> {
        self.parse_lines(source, Path::new("<source>"), Path::new("."))?;
        self.finish()
    }

    fn parse_file(&mut self, path: &Path) -> Result<(), Error> {
        let canonical = fs::canonicalize(path)
            .map_err(|_| Error::SourceNotReadable { path: path.to_path_buf() })?;
        if !self.parsed_paths.insert(canonical.clone()) {
            return Err(Error::RecursiveInclude { path: canonical });
        }
        let source = fs::read_to_string(&canonical)
            .map_err(|_| Error::SourceNotReadable { path: path.to_path_buf() })?;
        let directory = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
        self.parse_lines(&source, &canonical, &directory)
    }

    fn parse_lines(&mut self, source: &str, path: &Path, directory: &Path) -> Result<(), Error> {
        for (index, raw_line) in source.lines().enumerate() {
            let line = normalize_line(raw_line);
            if line.is_empty() {
                continue;
            }
            let location = SourceLocation::new(path, index + 1);
            self.parse_line(&line, &location, directory)?;
        }
        Ok(())
    }

    fn parse_line(
        &mut self,
        line: &str,
        location: &SourceLocation,
        directory: &Path,
    ) -> Result<(), Error> {
        if let Some(captures) = self.patterns.definition.captures(line) {
            return self.define(captures[1].to_string(), captures[2].to_string(), location);
        }

        if let Some(captures) = self.patterns.label.captures(line) {
            let label = captures[1].to_string();
            self.define(format!("@{label}"), self.mem_ptr.to_string(), location)?;
            if label == "stack" && self.stack_beginning.is_none() {
                self.stack_beginning = Some(self.mem_ptr);
            }
            return Ok(());
        }

        if let Some(captures) = self.patterns.data.captures(line) {
            let words =
                directives::expand_data_list(&captures[1], location, &self.patterns, &mut self.rng)?;
            for word in words {
                self.records.push((location.clone(), Emission::Data(word)));
                self.mem_ptr += 4;
            }
            return Ok(());
        }

        if let Some(captures) = self.patterns.include.captures(line) {
            return self.include(&captures[1], location, directory);
        }
        if self.patterns.any_include.is_match(line) {
            return Err(Error::MalformedInclude { location: location.clone() });
        }

        if let Some(captures) = self.patterns.instruction.captures(line) {
            let mnemonic = &captures[1];
            let Some(name) = InstructionName::from_mnemonic(mnemonic) else {
                return Err(Error::UnknownInstruction {
                    mnemonic: mnemonic.to_string(),
                    location: location.clone(),
                });
            };
            let argument = captures.get(3).map(|m| m.as_str().to_string());
            self.records
                .push((location.clone(), Emission::Instruction { name, argument }));
            self.mem_ptr += 5;
            return Ok(());
        }

        Err(Error::IncomprehensibleLine {
            line: line.to_string(),
            location: location.clone(),
        })
    }

    fn define(&mut self, key: String, value: String, location: &SourceLocation) -> Result<(), Error> {
        if self.definitions.contains_key(&key) {
            return Err(Error::DuplicateDefinition {
                identifier: key,
                location: location.clone(),
            });
        }
        self.definitions.insert(key, value);
        Ok(())
    }

    fn include(
        &mut self,
        literal: &str,
        location: &SourceLocation,
        directory: &Path,
    ) -> Result<(), Error> {
        let malformed = || Error::MalformedInclude { location: location.clone() };
        let runes = statement::parse_quoted_string(literal).ok_or_else(malformed)?;
        let relative = utf8::runes_to_string(&runes).ok_or_else(malformed)?;
        let target = directory.join(relative);
        self.parse_file(&target).map_err(|error| Error::IncludeFailed {
            path: target,
            error: Box::new(error),
            location: location.clone(),
        })
    }

    fn finish(mut self) -> Result<Vm, Error> {
        let memory_mode = match self.definitions.get("pragma_memory-mode").map(String::as_str) {
            None | Some("little-endian") => MemoryMode::LittleEndian,
            Some("big-endian") => MemoryMode::BigEndian,
            Some(other) => {
                return Err(Error::BadPragma {
                    name: "pragma_memory-mode".to_string(),
                    value: other.to_string(),
                });
            }
        };
        let memory_size = match self.definitions.get("pragma_memory-size") {
            None => DEFAULT_MEMORY_SIZE,
            Some(value) => statement::parse_word_literal(value).ok_or_else(|| Error::BadPragma {
                name: "pragma_memory-size".to_string(),
                value: value.clone(),
            })? as usize,
        };

        let mut vm = Vm::new(memory_size, memory_mode, Rng::new());
        let emitted = self.pass2(&mut vm)?;
        for instruction in &emitted {
            validator::validate(vm.semantics(), instruction)?;
        }
        Ok(vm)
    }

    /// Resolve every pending instruction, write the image into VM memory
    /// and derive the stack boundaries
    fn pass2(&mut self, vm: &mut Vm) -> Result<Vec<EmittedInstruction>, Error> {
        // the stack ends where the data run below the first instruction
        // past `stack:` ends
        let mut stack_end_frozen = false;
        let mut stack_end: Option<u32> = None;
        let mut halt_emitted = false;
        let mut stack_instruction_emitted = false;
        let mut emitted = Vec::new();
        let mut mem_ptr: u32 = 0;

        let records = std::mem::take(&mut self.records);
        for (location, record) in &records {
            match record {
                Emission::Data(word) => {
                    mem_ptr += vm.store_data(mem_ptr, *word);
                    if !stack_end_frozen {
                        stack_end = Some(mem_ptr);
                    }
                }
                Emission::Instruction { name, argument } => {
                    if self.stack_beginning.is_none_or(|beginning| mem_ptr > beginning) {
                        stack_end_frozen = true;
                    }
                    let argument = self.resolve_argument(*name, argument.as_deref(), location)?;
                    emitted.push(EmittedInstruction {
                        name: *name,
                        argument,
                        address: mem_ptr,
                        location: location.clone(),
                    });
                    mem_ptr += vm.store_instruction(mem_ptr, *name, argument);
                    halt_emitted |= *name == InstructionName::Hlt;
                    stack_instruction_emitted |= name.touches_stack();
                }
            }
        }

        if !halt_emitted {
            return Err(Error::NoHaltInstruction);
        }
        if stack_instruction_emitted && !self.definitions.contains_key("@stack") {
            return Err(Error::StackUsedButUndefined);
        }
        if self.stack_beginning.is_some() != stack_end.is_some() {
            return Err(Error::InconsistentStackBoundaries);
        }
        if let (Some(beginning), Some(end)) = (self.stack_beginning, stack_end) {
            vm.initialize_stack(beginning, end);
        }
        Ok(emitted)
    }

    fn resolve_argument(
        &self,
        name: InstructionName,
        raw: Option<&str>,
        location: &SourceLocation,
    ) -> Result<u32, Error> {
        let mut value: Option<u32> = None;
        if let Some(raw) = raw {
            let resolved: &str = if let Some(substituted) = self.definitions.get(raw) {
                substituted
            } else if let Some(substituted) = self.definitions.get(&format!("@{raw}")) {
                // labels may be referenced bare
                substituted
            } else {
                raw
            };

            if let Some(label) = resolved.strip_prefix('@') {
                return Err(self.undefined_label(label, location));
            }

            if resolved.starts_with('\'') {
                let rune = statement::parse_char_literal(resolved).ok_or_else(|| {
                    Error::BadCharLiteral {
                        literal: resolved.to_string(),
                        location: location.clone(),
                    }
                })?;
                value = Some(rune);
            } else {
                let word = statement::parse_word_literal(resolved).ok_or_else(|| {
                    Error::BadIntegerLiteral {
                        literal: resolved.to_string(),
                        location: location.clone(),
                    }
                })?;
                value = Some(word);
            }
        }

        match (name.arg_rule(), value) {
            (ArgumentRule::Forbidden, Some(argument)) => Err(Error::SuperfluousArgument {
                mnemonic: name.mnemonic(),
                argument,
                location: location.clone(),
            }),
            (ArgumentRule::Forbidden, None) => Ok(0),
            (ArgumentRule::Required, None) => Err(Error::MissingArgument {
                mnemonic: name.mnemonic(),
                location: location.clone(),
            }),
            (ArgumentRule::Required, Some(argument))
            | (ArgumentRule::OptionalDefault(_), Some(argument)) => Ok(argument),
            (ArgumentRule::OptionalDefault(default), None) => Ok(default),
        }
    }

    fn undefined_label(&self, label: &str, location: &SourceLocation) -> Error {
        let labels: Vec<String> = self
            .definitions
            .keys()
            .filter_map(|key| key.strip_prefix('@'))
            .map(str::to_string)
            .collect();
        let suggestions = statement::sort_by_distance_to(labels, label)
            .into_iter()
            .take(3)
            .collect();
        Error::UndefinedLabel {
            label: label.to_string(),
            suggestions,
            location: location.clone(),
        }
    }
}

impl Default for Assembler {
    fn default() -> Assembler {
        Assembler::new()
    }
}

/// An error that can occur during the assembly process
#[derive(Debug)]
pub enum Error {
    /// A source file could not be opened or read
    SourceNotReadable { path: PathBuf },
    /// The same file was reached twice along an `include` chain
    RecursiveInclude { path: PathBuf },
    /// An `include` line without a well-formed string argument
    MalformedInclude { location: SourceLocation },
    /// An error inside an included file
    IncludeFailed {
        path: PathBuf,
        error: Box<Error>,
        location: SourceLocation,
    },
    /// A non-blank line matching no construct of the grammar
    IncomprehensibleLine { line: String, location: SourceLocation },
    /// A definition or label name was bound twice
    DuplicateDefinition { identifier: String, location: SourceLocation },
    /// An instruction line whose mnemonic is not part of the instruction set
    UnknownInstruction { mnemonic: String, location: SourceLocation },
    /// A `data` element that does not parse
    InvalidDataElement {
        detail: String,
        element_number: u64,
        location: SourceLocation,
    },
    BadStringLiteral { literal: String, location: SourceLocation },
    BadCharLiteral { literal: String, location: SourceLocation },
    BadIntegerLiteral { literal: String, location: SourceLocation },
    /// A `@label` reference with no matching definition; carries the
    /// closest defined label names
    UndefinedLabel {
        label: String,
        suggestions: Vec<String>,
        location: SourceLocation,
    },
    MissingArgument {
        mnemonic: &'static str,
        location: SourceLocation,
    },
    SuperfluousArgument {
        mnemonic: &'static str,
        argument: u32,
        location: SourceLocation,
    },
    /// The program never emits `HLT`
    NoHaltInstruction,
    /// A stack instruction is emitted but no `stack:` label exists
    StackUsedButUndefined,
    /// Only one of the two stack boundaries could be derived
    InconsistentStackBoundaries,
    /// A `pragma_…` definition with an unusable value
    BadPragma { name: String, value: String },
    /// A pointer argument contradicting the memory-semantic map
    StaticSemanticViolation {
        violation: validator::Violation,
        mnemonic: &'static str,
        location: SourceLocation,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SourceNotReadable { path } => {
                write!(f, "unable to read file {}", path.display())
            }
            Error::RecursiveInclude { path } => write!(
                f,
                "recursive inclusion of {}; not parsing file twice",
                path.display()
            ),
            Error::MalformedInclude { location } => write!(
                f,
                "{}: improper include: either empty or missing quotes",
                location
            ),
            Error::IncludeFailed { path, error, location } => write!(
                f,
                "{}: could not include file {}: {}",
                location,
                path.display(),
                error
            ),
            Error::IncomprehensibleLine { line, location } => {
                write!(f, "{}: incomprehensible line: {}", location, line)
            }
            Error::DuplicateDefinition { identifier, location } => {
                write!(f, "{}: duplicate definition: {}", location, identifier)
            }
            Error::UnknownInstruction { mnemonic, location } => {
                write!(f, "{}: invalid instruction name: {}", location, mnemonic)
            }
            Error::InvalidDataElement { detail, element_number, location } => write!(
                f,
                "{}: invalid data element (element number {}): {}",
                location, element_number, detail
            ),
            Error::BadStringLiteral { literal, location } => {
                write!(f, "{}: invalid string literal: {}", location, literal)
            }
            Error::BadCharLiteral { literal, location } => {
                write!(f, "{}: invalid character literal: {}", location, literal)
            }
            Error::BadIntegerLiteral { literal, location } => {
                write!(f, "{}: invalid argument value: {}", location, literal)
            }
            Error::UndefinedLabel { label, suggestions, location } => {
                write!(
                    f,
                    "{}: label @{} was not defined; did you possibly mean one \
                     of the following defined labels?",
                    location, label
                )?;
                if suggestions.is_empty() {
                    write!(f, "\n    (no labels have been defined)")?;
                }
                for (rank, suggestion) in suggestions.iter().enumerate() {
                    write!(f, "\n    {}) {}", rank + 1, suggestion)?;
                }
                Ok(())
            }
            Error::MissingArgument { mnemonic, location } => {
                write!(f, "{}: requiring argument: {}", location, mnemonic)
            }
            Error::SuperfluousArgument { mnemonic, argument, location } => {
                write!(
                    f,
                    "{}: superfluous argument: {} {}",
                    location, mnemonic, argument
                )
            }
            Error::NoHaltInstruction => write!(f, "no halt instruction was used"),
            Error::StackUsedButUndefined => {
                write!(f, "stack instructions are used yet no stack was defined")
            }
            Error::InconsistentStackBoundaries => write!(f, "inconsistent stack boundaries"),
            Error::BadPragma { name, value } => {
                write!(f, "unknown pragma value: {} := {}", name, value)
            }
            Error::StaticSemanticViolation { violation, mnemonic, location } => {
                write!(f, "{}: {} ({})", location, violation, mnemonic)
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_comments_and_collapses_whitespace() {
        assert_eq!(normalize_line("  mov   5  ; set A"), "mov 5");
        assert_eq!(normalize_line("; only a comment"), "");
        assert_eq!(normalize_line("\t"), "");
        assert_eq!(normalize_line("a \t b"), "a b");
        // the comment strip is purely textual, quotes do not protect `;`
        assert_eq!(normalize_line("data \"a;b\""), "data \"a");
    }

    #[test]
    fn labels_resolve_bare_and_prefixed() {
        for reference in ["@target", "target"] {
            let vm = Assembler::new()
                .assemble_source(&format!("target:\nnop\njmp {reference}\nhlt\n"))
                .expect("assembly failed");
            // the JMP at 5 encodes the label address 0
            assert_eq!(vm.memory()[5], InstructionName::Jmp.opcode());
            assert_eq!(vm.memory()[6..10], [0, 0, 0, 0]);
        }
    }

    #[test]
    fn definitions_substitute_exactly_once() {
        // a definition chain is not followed to the second step
        let result = Assembler::new().assemble_source("a := b\nb := 1\nmov a\nhlt\n");
        assert!(matches!(result, Err(Error::BadIntegerLiteral { .. })));
    }

    #[test]
    fn stack_end_freezes_at_the_first_instruction_past_the_stack() {
        let vm = Assembler::new()
            .assemble_source(
                "stack:\n\
                 data [2] 0\n\
                 nop\n\
                 data 7\n\
                 hlt\n",
            )
            .expect("assembly failed");
        // the data word emitted after `nop` no longer extends the stack
        assert_eq!(vm.stack_boundaries(), Some((0, 8)));
    }

    #[test]
    fn stack_label_defines_the_boundaries() {
        let vm = Assembler::new()
            .assemble_source(
                "stack:\n\
                 data [2] 0\n\
                 hlt\n",
            )
            .expect("assembly failed");
        assert_eq!(vm.stack_boundaries(), Some((0, 8)));
        assert_eq!(vm.register_sc(), 0);
    }

    #[test]
    fn nop_tolerates_an_argument() {
        let vm = Assembler::new()
            .assemble_source("nop 5\nhlt\n")
            .expect("assembly failed");
        assert_eq!(vm.memory()[1..5], [5, 0, 0, 0]);
    }

    #[test]
    fn instruction_emission_is_five_bytes_in_textual_order() {
        let vm = Assembler::new()
            .assemble_source("mov 1\nnop\nhlt\n")
            .expect("assembly failed");
        assert_eq!(vm.memory()[0], InstructionName::Mov.opcode());
        assert_eq!(vm.memory()[5], InstructionName::Nop.opcode());
        assert_eq!(vm.memory()[10], InstructionName::Hlt.opcode());
    }
}
