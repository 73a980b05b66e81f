//! Static validation of pointer arguments against the memory-semantic map
//!
//! After pass two every byte of the image is classified; each emitted
//! instruction whose argument points at word data, byte data or an
//! instruction is checked to point at a region of the matching shape.

use std::fmt;

use crate::assembler::statement::EmittedInstruction;
use crate::assembler::Error;
use crate::vm::MemorySemantic;

/// What a pointer argument contradicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    DataOutOfBounds,
    MisalignedDataHead,
    MisalignedData,
    ByteDataOutOfBounds,
    MisalignedByteData,
    InstructionOutOfBounds,
    MisalignedInstructionHead,
    MisalignedInstruction,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Violation::DataOutOfBounds => "static analysis detected an out-of-bounds data error",
            Violation::MisalignedDataHead => {
                "static analysis detected a misaligned data error (head)"
            }
            Violation::MisalignedData => {
                "static analysis detected a misaligned data error (non-head)"
            }
            Violation::ByteDataOutOfBounds => {
                "static analysis detected an out-of-bounds data error (byte)"
            }
            Violation::MisalignedByteData => {
                "static analysis detected a misaligned data error (byte)"
            }
            Violation::InstructionOutOfBounds => {
                "static analysis detected an out-of-bounds instruction error"
            }
            Violation::MisalignedInstructionHead => {
                "static analysis detected a misaligned instruction error (head)"
            }
            Violation::MisalignedInstruction => {
                "static analysis detected a misaligned instruction error (non-head)"
            }
        };
        f.write_str(message)
    }
}

/// Check one emitted instruction against the semantic map
pub fn validate(
    semantics: &[MemorySemantic],
    instruction: &EmittedInstruction,
) -> Result<(), Error> {
    let argument = instruction.argument as usize;
    let fail = |violation: Violation| {
        Err(Error::StaticSemanticViolation {
            violation,
            mnemonic: instruction.name.mnemonic(),
            location: instruction.location.clone(),
        })
    };

    if instruction.name.points_at_word_data() {
        if argument + 3 >= semantics.len() {
            return fail(Violation::DataOutOfBounds);
        }
        if semantics[argument] != MemorySemantic::DataHead {
            return fail(Violation::MisalignedDataHead);
        }
        for offset in 1..4 {
            if semantics[argument + offset] != MemorySemantic::Data {
                return fail(Violation::MisalignedData);
            }
        }
    }

    if instruction.name.points_at_byte_data() {
        if argument >= semantics.len() {
            return fail(Violation::ByteDataOutOfBounds);
        }
        if !matches!(
            semantics[argument],
            MemorySemantic::DataHead | MemorySemantic::Data
        ) {
            return fail(Violation::MisalignedByteData);
        }
    }

    if instruction.name.points_at_instruction() {
        if argument + 4 >= semantics.len() {
            return fail(Violation::InstructionOutOfBounds);
        }
        if semantics[argument] != MemorySemantic::InstructionHead {
            return fail(Violation::MisalignedInstructionHead);
        }
        for offset in 1..5 {
            if semantics[argument + offset] != MemorySemantic::Instruction {
                return fail(Violation::MisalignedInstruction);
            }
        }
    }

    Ok(())
}
