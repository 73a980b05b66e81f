//! The Joy instruction set: names, opcodes, mnemonics, argument rules and
//! micro-instruction costs
//!
//! The declaration order of [`InstructionName`] *defines* the opcode of each
//! instruction; the 256-entry opcode table is derived from it at compile
//! time, leaving every slot past the last instruction vacant.

/// One of the 49 Joy instructions
///
/// Do not reorder: the discriminant is the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstructionName {
    // misc
    Nop,
    // memory
    Lda, Ldb, Sta, Stb, Lia, Sia, Lpc, Spc, Lya, Sya,
    // jumps
    Jmp, Jn, Jnn, Jz, Jnz, Jp, Jnp, Je, Jne,
    // stack
    Cal, Ret, Psh, Pop, Lsa, Ssa, Lsc, Ssc,
    // register A
    Mov, Not, Shl, Shr, Inc, Dec, Neg,
    // registers A and B
    Swp, Add, Sub, And, Or, Xor,
    // input / output
    Get, Gtc, Ptu, Pts, Ptb, Ptc,
    // random
    Rnd,
    // halt
    Hlt,
}

/// Whether and how an instruction accepts its source-level argument
///
/// The three cases are a closed sum so that "optional yet required" cannot
/// be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentRule {
    /// the instruction takes no argument
    Forbidden,
    /// an argument must be written in source
    Required,
    /// the argument may be omitted and then falls back to the default
    OptionalDefault(u32),
}

/// Per-instruction constants
#[derive(Debug, Clone, Copy)]
pub struct InstructionDefinition {
    pub name: InstructionName,
    pub mnemonic: &'static str,
    pub arg_rule: ArgumentRule,
    pub micro_instructions: u64,
}

const fn def(
    name: InstructionName,
    mnemonic: &'static str,
    arg_rule: ArgumentRule,
    micro_instructions: u64,
) -> InstructionDefinition {
    InstructionDefinition { name, mnemonic, arg_rule, micro_instructions }
}

const IO_PENALTY: u64 = 32;

/// Instruction constants in canonical (opcode) order
pub const DEFINITIONS: [InstructionDefinition; 49] = {
    use ArgumentRule::{Forbidden, OptionalDefault, Required};
    use InstructionName::*;
    [
        def(Nop, "NOP", OptionalDefault(0), 1),
        def(Lda, "LDA", Required, 4),
        def(Ldb, "LDB", Required, 4),
        def(Sta, "STA", Required, 4),
        def(Stb, "STB", Required, 4),
        def(Lia, "LIA", OptionalDefault(0), 6),
        def(Sia, "SIA", OptionalDefault(0), 6),
        def(Lpc, "LPC", Forbidden, 2),
        def(Spc, "SPC", Forbidden, 2),
        def(Lya, "LYA", Required, 4),
        def(Sya, "SYA", Required, 4),
        def(Jmp, "JMP", Required, 2),
        def(Jn, "JN", Required, 3),
        def(Jnn, "JNN", Required, 3),
        def(Jz, "JZ", Required, 3),
        def(Jnz, "JNZ", Required, 3),
        def(Jp, "JP", Required, 3),
        def(Jnp, "JNP", Required, 3),
        def(Je, "JE", Required, 3),
        def(Jne, "JNE", Required, 3),
        def(Cal, "CAL", Required, 11),
        def(Ret, "RET", Forbidden, 9),
        def(Psh, "PSH", Forbidden, 9),
        def(Pop, "POP", Forbidden, 9),
        def(Lsa, "LSA", OptionalDefault(0), 6),
        def(Ssa, "SSA", OptionalDefault(0), 6),
        def(Lsc, "LSC", Forbidden, 2),
        def(Ssc, "SSC", Forbidden, 2),
        def(Mov, "MOV", Required, 2),
        def(Not, "NOT", Forbidden, 1),
        def(Shl, "SHL", OptionalDefault(1), 1),
        def(Shr, "SHR", OptionalDefault(1), 1),
        def(Inc, "INC", OptionalDefault(1), 1),
        def(Dec, "DEC", OptionalDefault(1), 1),
        def(Neg, "NEG", Forbidden, 1),
        def(Swp, "SWP", Forbidden, 3),
        def(Add, "ADD", Forbidden, 2),
        def(Sub, "SUB", Forbidden, 2),
        def(And, "AND", Forbidden, 2),
        def(Or, "OR", Forbidden, 2),
        def(Xor, "XOR", Forbidden, 2),
        def(Get, "GET", Forbidden, IO_PENALTY + 2),
        def(Gtc, "GTC", Forbidden, IO_PENALTY + 2),
        def(Ptu, "PTU", Forbidden, 1 + IO_PENALTY + 1),
        def(Pts, "PTS", Forbidden, 1 + IO_PENALTY + 1),
        def(Ptb, "PTB", Forbidden, 1 + IO_PENALTY + 1),
        def(Ptc, "PTC", Forbidden, 1 + IO_PENALTY + 1),
        def(Rnd, "RND", Forbidden, IO_PENALTY + 2),
        def(Hlt, "HLT", Forbidden, 1),
    ]
};

/// Opcode table; vacant slots decode to `None`
const OPCODE_TABLE: [Option<InstructionName>; 256] = {
    let mut table = [None; 256];
    let mut opcode = 0;
    while opcode < DEFINITIONS.len() {
        table[opcode] = Some(DEFINITIONS[opcode].name);
        opcode += 1;
    }
    table
};

impl InstructionName {
    /// Decode an opcode byte; `None` for vacant slots
    pub fn from_opcode(opcode: u8) -> Option<InstructionName> {
        OPCODE_TABLE[opcode as usize]
    }

    /// Look a mnemonic up case-insensitively
    pub fn from_mnemonic(mnemonic: &str) -> Option<InstructionName> {
        DEFINITIONS
            .iter()
            .find(|definition| definition.mnemonic.eq_ignore_ascii_case(mnemonic))
            .map(|definition| definition.name)
    }

    pub fn opcode(self) -> u8 {
        self as u8
    }

    pub fn mnemonic(self) -> &'static str {
        self.definition().mnemonic
    }

    pub fn arg_rule(self) -> ArgumentRule {
        self.definition().arg_rule
    }

    /// The abstract cost of the instruction, used only for statistics
    pub fn micro_instructions(self) -> u64 {
        self.definition().micro_instructions
    }

    fn definition(self) -> &'static InstructionDefinition {
        &DEFINITIONS[self as usize]
    }

    /// Instructions whose execution reads or writes the stack
    pub fn touches_stack(self) -> bool {
        use InstructionName::*;
        matches!(self, Cal | Ret | Psh | Pop | Lsa | Ssa | Lsc | Ssc)
    }

    /// Instructions whose argument must point at a data word
    pub fn points_at_word_data(self) -> bool {
        use InstructionName::*;
        matches!(self, Lda | Ldb | Sta | Stb)
    }

    /// Instructions whose argument must point at a data byte
    pub fn points_at_byte_data(self) -> bool {
        use InstructionName::*;
        matches!(self, Lya | Sya)
    }

    /// Instructions whose argument must point at an instruction head
    pub fn points_at_instruction(self) -> bool {
        use InstructionName::*;
        matches!(self, Jmp | Jn | Jnn | Jz | Jnz | Jp | Jnp | Je | Jne)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_order_is_the_opcode() {
        for (opcode, definition) in DEFINITIONS.iter().enumerate() {
            assert_eq!(definition.name.opcode() as usize, opcode);
        }
        assert_eq!(InstructionName::Nop.opcode(), 0);
        assert_eq!(InstructionName::Lda.opcode(), 1);
        assert_eq!(InstructionName::Hlt.opcode(), 48);
    }

    #[test]
    fn opcode_round_trips_for_every_instruction() {
        for definition in &DEFINITIONS {
            assert_eq!(
                InstructionName::from_opcode(definition.name.opcode()),
                Some(definition.name)
            );
        }
    }

    #[test]
    fn vacant_opcodes_decode_to_none() {
        for opcode in DEFINITIONS.len()..=u8::MAX as usize {
            assert_eq!(InstructionName::from_opcode(opcode as u8), None);
        }
    }

    #[test]
    fn mnemonic_lookup_ignores_case() {
        assert_eq!(InstructionName::from_mnemonic("mov"), Some(InstructionName::Mov));
        assert_eq!(InstructionName::from_mnemonic("MOV"), Some(InstructionName::Mov));
        assert_eq!(InstructionName::from_mnemonic("hLt"), Some(InstructionName::Hlt));
        assert_eq!(InstructionName::from_mnemonic("frobnicate"), None);
    }

    #[test]
    fn argument_rules() {
        assert_eq!(InstructionName::Mov.arg_rule(), ArgumentRule::Required);
        assert_eq!(InstructionName::Hlt.arg_rule(), ArgumentRule::Forbidden);
        assert_eq!(InstructionName::Shl.arg_rule(), ArgumentRule::OptionalDefault(1));
        assert_eq!(InstructionName::Lsa.arg_rule(), ArgumentRule::OptionalDefault(0));
    }

    #[test]
    fn category_predicates() {
        use InstructionName::*;
        for name in [Cal, Ret, Psh, Pop, Lsa, Ssa, Lsc, Ssc] {
            assert!(name.touches_stack());
        }
        assert!(!Mov.touches_stack());
        for name in [Lda, Ldb, Sta, Stb] {
            assert!(name.points_at_word_data());
        }
        for name in [Lya, Sya] {
            assert!(name.points_at_byte_data());
        }
        for name in [Jmp, Jn, Jnn, Jz, Jnz, Jp, Jnp, Je, Jne] {
            assert!(name.points_at_instruction());
        }
        assert!(!Lda.points_at_instruction());
    }
}
