//! The Joy virtual machine
//!
//! Executes the image produced by the assembler: a fetch/decode/execute loop
//! over a configurable-endian byte memory with two general-purpose
//! registers, a program counter, a stack counter bounded by explicit
//! boundaries, and three condition flags derived from register `A`.
//!
//! Out-of-range memory reads yield 0 and out-of-range writes are dropped;
//! either records a trap which the running step reports at its end. Stack
//! accesses additionally check the boundaries and 4-byte alignment.

use std::fmt;
use std::io::{self, BufRead, Write};

use colored::Colorize;

use crate::assembler::instructions::InstructionName;
use crate::assembler::statement::parse_word_literal;
use crate::rng::Rng;
use crate::utf8;

/// Byte order of data words and instruction arguments in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMode {
    LittleEndian,
    BigEndian,
}

/// Per-byte classification of assembled memory
///
/// A 5-byte instruction region is `[InstructionHead, Instruction × 4]`, a
/// 4-byte data word `[DataHead, Data × 3]`; untouched memory stays
/// `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySemantic {
    Unknown,
    InstructionHead,
    Instruction,
    DataHead,
    Data,
}

/// Condition flags, recomputed from register `A` after every step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub zero: bool,
    pub negative: bool,
    pub even: bool,
}

impl Flags {
    pub fn of(a: u32) -> Flags {
        Flags {
            zero: a == 0,
            negative: (a as i32) < 0,
            even: a & 1 == 0,
        }
    }

    fn positive(&self) -> bool {
        !self.zero && !self.negative
    }
}

/// Instruction and micro-instruction counters of a run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub instructions: u64,
    pub micro_instructions: u64,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}: {}", self.instructions, self.micro_instructions)
    }
}

/// A fatal run-time condition; halts execution with a non-zero exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trap {
    /// the opcode byte at `PC` maps to no instruction
    FetchFailed { opcode: u8 },
    MemoryOutOfBounds { address: u32, size: usize },
    StackUnderflow { address: u32 },
    StackOverflow { address: u32 },
    StackMisalignment { address: u32 },
    StackBoundariesUndefined,
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trap::FetchFailed { opcode } => write!(
                f,
                "failed to fetch next instruction (vacant op-code 0x{:02x})",
                opcode
            ),
            Trap::MemoryOutOfBounds { address, size } => {
                write!(f, "memory out of bounds ({} >= {})", address, size)
            }
            Trap::StackUnderflow { address } => {
                write!(f, "stack underflow (at 0x{:08x})", address)
            }
            Trap::StackOverflow { address } => {
                write!(f, "stack overflow (at 0x{:08x})", address)
            }
            Trap::StackMisalignment { address } => {
                write!(f, "stack misalignment (at 0x{:08x})", address)
            }
            Trap::StackBoundariesUndefined => write!(f, "no stack boundaries defined"),
        }
    }
}

impl std::error::Error for Trap {}

/// The machine state: memory, its semantic map, registers, flags and the
/// I/O streams the program talks to
pub struct Vm {
    memory: Vec<u8>,
    semantics: Vec<MemorySemantic>,
    memory_mode: MemoryMode,
    register_a: u32,
    register_b: u32,
    register_pc: u32,
    register_sc: u32,
    flags: Flags,
    stack_boundaries: Option<(u32, u32)>,
    rng: Rng,
    mock: bool,
    trap: Option<Trap>,
    statistics: Statistics,
    highest_used: u32,
    visualize_steps: bool,
    wait_for_user: bool,
    out: Box<dyn Write>,
    inp: Box<dyn BufRead>,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("memory", &self.memory)
            .field("semantics", &self.semantics)
            .field("memory_mode", &self.memory_mode)
            .field("register_a", &self.register_a)
            .field("register_b", &self.register_b)
            .field("register_pc", &self.register_pc)
            .field("register_sc", &self.register_sc)
            .field("flags", &self.flags)
            .field("stack_boundaries", &self.stack_boundaries)
            .field("mock", &self.mock)
            .field("trap", &self.trap)
            .field("statistics", &self.statistics)
            .field("highest_used", &self.highest_used)
            .field("visualize_steps", &self.visualize_steps)
            .field("wait_for_user", &self.wait_for_user)
            .finish_non_exhaustive()
    }
}

impl Vm {
    pub fn new(memory_size: usize, memory_mode: MemoryMode, rng: Rng) -> Vm {
        Vm {
            memory: vec![0; memory_size],
            semantics: vec![MemorySemantic::Unknown; memory_size],
            memory_mode,
            register_a: 0,
            register_b: 0,
            register_pc: 0,
            register_sc: 0,
            flags: Flags::of(0),
            stack_boundaries: None,
            rng,
            mock: false,
            trap: None,
            statistics: Statistics::default(),
            highest_used: 0,
            visualize_steps: false,
            wait_for_user: false,
            out: Box::new(io::stdout()),
            // per-read locking; a held StdinLock would starve other machines
            inp: Box::new(io::BufReader::new(io::stdin())),
        }
    }

    /// Write a data word at `at`, marking its bytes as data; returns the
    /// number of bytes written
    pub fn store_data(&mut self, at: u32, data: u32) -> u32 {
        self.store_word(at, data);
        self.annotate(at, &[
            MemorySemantic::DataHead,
            MemorySemantic::Data,
            MemorySemantic::Data,
            MemorySemantic::Data,
        ]);
        self.highest_used = 0;
        4
    }

    /// Encode an instruction at `at`, marking its bytes as such; returns the
    /// number of bytes written
    pub fn store_instruction(&mut self, at: u32, name: InstructionName, argument: u32) -> u32 {
        self.store_byte(at, name.opcode());
        self.store_word(at.wrapping_add(1), argument);
        self.annotate(at, &[
            MemorySemantic::InstructionHead,
            MemorySemantic::Instruction,
            MemorySemantic::Instruction,
            MemorySemantic::Instruction,
            MemorySemantic::Instruction,
        ]);
        self.highest_used = 0;
        5
    }

    /// Fix the stack boundaries and park `SC` on the first slot
    pub fn initialize_stack(&mut self, begin: u32, end: u32) {
        self.stack_boundaries = Some((begin, end));
        self.register_sc = begin;
    }

    pub fn enable_visualization(&mut self) {
        self.visualize_steps = true;
    }

    pub fn enable_stepping(&mut self) {
        self.enable_visualization();
        self.wait_for_user = true;
    }

    /// Turn all I/O instructions into no-ops (`GET` loads 0); memory and
    /// flag semantics are unchanged
    pub fn enable_mock(&mut self) {
        self.mock = true;
    }

    /// Reseed the run-time generator behind `RND` deterministically
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = Rng::with_seed(seed);
    }

    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    pub fn set_input(&mut self, inp: Box<dyn BufRead>) {
        self.inp = inp;
    }

    pub fn register_a(&self) -> u32 {
        self.register_a
    }

    pub fn register_b(&self) -> u32 {
        self.register_b
    }

    pub fn register_pc(&self) -> u32 {
        self.register_pc
    }

    pub fn register_sc(&self) -> u32 {
        self.register_sc
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn semantics(&self) -> &[MemorySemantic] {
        &self.semantics
    }

    pub fn memory_mode(&self) -> MemoryMode {
        self.memory_mode
    }

    pub fn stack_boundaries(&self) -> Option<(u32, u32)> {
        self.stack_boundaries
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics
    }

    /// Execute one instruction. `Ok(true)` continues, `Ok(false)` is a
    /// clean halt, `Err` a trap.
    pub fn step(&mut self) -> Result<bool, Trap> {
        let (name, argv) = self.next_instruction()?;

        use InstructionName::*;
        match name {
            Nop => {}

            Lda => self.register_a = self.load_word(argv),
            Ldb => self.register_b = self.load_word(argv),
            Sta => self.store_word(argv, self.register_a),
            Stb => self.store_word(argv, self.register_b),
            Lia => self.register_a = self.load_word(self.register_b.wrapping_add(argv)),
            Sia => self.store_word(self.register_b.wrapping_add(argv), self.register_a),
            Lpc => self.register_pc = self.register_a,
            Spc => self.register_a = self.register_pc,
            Lya => {
                self.register_a = (self.register_a & 0xffff_ff00)
                    | (self.load_byte(argv) as u32 & 0x0000_00ff);
            }
            Sya => {
                let byte = (self.register_a & 0xff) as u8;
                self.store_byte(argv, byte);
            }

            Jmp => self.register_pc = argv,
            Jz => self.jump_if(self.flags.zero, argv),
            Jnz => self.jump_if(!self.flags.zero, argv),
            Jn => self.jump_if(self.flags.negative, argv),
            Jnn => self.jump_if(!self.flags.negative, argv),
            Je => self.jump_if(self.flags.even, argv),
            Jne => self.jump_if(!self.flags.even, argv),
            Jp => self.jump_if(self.flags.positive(), argv),
            Jnp => self.jump_if(!self.flags.positive(), argv),

            Cal => {
                self.store_stack_word(self.register_sc, self.register_pc);
                self.register_sc = self.register_sc.wrapping_add(4);
                self.register_pc = argv;
            }
            Ret => {
                self.register_sc = self.register_sc.wrapping_sub(4);
                self.register_pc = self.load_stack_word(self.register_sc);
            }
            Psh => {
                self.store_stack_word(self.register_sc, self.register_a);
                self.register_sc = self.register_sc.wrapping_add(4);
            }
            Pop => {
                self.register_sc = self.register_sc.wrapping_sub(4);
                self.register_a = self.load_stack_word(self.register_sc);
            }
            Lsa => self.register_a = self.load_stack_word(self.register_sc.wrapping_add(argv)),
            Ssa => self.store_stack_word(self.register_sc.wrapping_add(argv), self.register_a),
            Lsc => self.register_sc = self.register_a,
            Ssc => self.register_a = self.register_sc,

            Mov => self.register_a = argv,
            Not => self.register_a = !self.register_a,
            Shl => self.register_a = self.register_a.checked_shl(argv).unwrap_or(0),
            Shr => self.register_a = self.register_a.checked_shr(argv).unwrap_or(0),
            Inc => self.register_a = self.register_a.wrapping_add(argv),
            Dec => self.register_a = self.register_a.wrapping_sub(argv),
            Neg => self.register_a = self.register_a.wrapping_neg(),

            Swp => std::mem::swap(&mut self.register_a, &mut self.register_b),
            And => self.register_a &= self.register_b,
            Or => self.register_a |= self.register_b,
            Xor => self.register_a ^= self.register_b,
            Add => self.register_a = self.register_a.wrapping_add(self.register_b),
            Sub => self.register_a = self.register_a.wrapping_sub(self.register_b),

            Ptu => {
                if !self.mock {
                    let _ = writeln!(self.out, "{}", self.register_a);
                }
            }
            Pts => {
                if !self.mock {
                    let _ = writeln!(self.out, "{}", self.register_a as i32);
                }
            }
            Ptb => {
                if !self.mock {
                    let _ = writeln!(self.out, "0b{:032b}", self.register_a);
                }
            }
            Ptc => {
                if !self.mock {
                    utf8::put_rune(&mut self.out, self.register_a);
                }
            }
            Get => self.register_a = self.get_number(),
            Gtc => {
                if !self.mock {
                    let _ = write!(self.out, "enter a character: ");
                    let _ = self.out.flush();
                    self.register_a = utf8::get_rune(&mut self.inp);
                }
            }

            Rnd => self.register_a = self.rng.unif(self.register_a),

            Hlt => return Ok(false),
        }

        self.flags = Flags::of(self.register_a);
        self.statistics.instructions += 1;
        self.statistics.micro_instructions += name.micro_instructions();
        let _ = self.out.flush();

        match self.trap.take() {
            Some(trap) => Err(trap),
            None => Ok(true),
        }
    }

    fn next_instruction(&mut self) -> Result<(InstructionName, u32), Trap> {
        let opcode = self.load_byte(self.register_pc);
        self.register_pc = self.register_pc.wrapping_add(1);
        let argument = self.load_word(self.register_pc);
        self.register_pc = self.register_pc.wrapping_add(4);

        match InstructionName::from_opcode(opcode) {
            Some(name) => Ok((name, argument)),
            None => Err(Trap::FetchFailed { opcode }),
        }
    }

    fn jump_if(&mut self, condition: bool, target: u32) {
        if condition {
            self.register_pc = target;
        }
    }

    fn get_number(&mut self) -> u32 {
        if self.mock {
            return 0;
        }
        loop {
            let _ = write!(self.out, "enter a number: ");
            let _ = self.out.flush();
            let mut line = String::new();
            match self.inp.read_line(&mut line) {
                Ok(0) | Err(_) => return 0,
                Ok(_) => {
                    if let Some(n) = parse_word_literal(&line) {
                        return n;
                    }
                }
            }
        }
    }

    fn record_trap(&mut self, trap: Trap) {
        self.trap.get_or_insert(trap);
    }

    fn load_byte(&mut self, address: u32) -> u8 {
        self.highest_used = self.highest_used.max(address);
        match self.memory.get(address as usize) {
            Some(&byte) => byte,
            None => {
                self.record_trap(Trap::MemoryOutOfBounds {
                    address,
                    size: self.memory.len(),
                });
                0
            }
        }
    }

    fn store_byte(&mut self, address: u32, byte: u8) {
        self.highest_used = self.highest_used.max(address);
        match self.memory.get_mut(address as usize) {
            Some(slot) => *slot = byte,
            None => self.record_trap(Trap::MemoryOutOfBounds {
                address,
                size: self.memory.len(),
            }),
        }
    }

    fn load_word(&mut self, address: u32) -> u32 {
        let bytes = [
            self.load_byte(address),
            self.load_byte(address.wrapping_add(1)),
            self.load_byte(address.wrapping_add(2)),
            self.load_byte(address.wrapping_add(3)),
        ];
        match self.memory_mode {
            MemoryMode::LittleEndian => u32::from_le_bytes(bytes),
            MemoryMode::BigEndian => u32::from_be_bytes(bytes),
        }
    }

    fn store_word(&mut self, address: u32, word: u32) {
        let bytes = match self.memory_mode {
            MemoryMode::LittleEndian => word.to_le_bytes(),
            MemoryMode::BigEndian => word.to_be_bytes(),
        };
        for (offset, byte) in bytes.into_iter().enumerate() {
            self.store_byte(address.wrapping_add(offset as u32), byte);
        }
    }

    fn stack_access_allowed(&mut self, address: u32) -> bool {
        let Some((begin, end)) = self.stack_boundaries else {
            self.record_trap(Trap::StackBoundariesUndefined);
            return false;
        };
        if address < begin {
            self.record_trap(Trap::StackUnderflow { address });
            false
        } else if address as u64 + 4 > end as u64 {
            self.record_trap(Trap::StackOverflow { address });
            false
        } else if (address - begin) % 4 != 0 {
            self.record_trap(Trap::StackMisalignment { address });
            false
        } else {
            true
        }
    }

    fn load_stack_word(&mut self, address: u32) -> u32 {
        if self.stack_access_allowed(address) {
            self.load_word(address)
        } else {
            0
        }
    }

    fn store_stack_word(&mut self, address: u32, word: u32) {
        if self.stack_access_allowed(address) {
            self.store_word(address, word);
        }
    }

    fn annotate(&mut self, at: u32, semantics: &[MemorySemantic]) {
        for (offset, &semantic) in semantics.iter().enumerate() {
            if let Some(slot) = self.semantics.get_mut(at as usize + offset) {
                *slot = semantic;
            }
        }
    }

    fn peek_byte(&self, address: u32) -> u8 {
        self.memory.get(address as usize).copied().unwrap_or(0)
    }

    fn peek_word(&self, address: u32) -> u32 {
        let bytes = [
            self.peek_byte(address),
            self.peek_byte(address.wrapping_add(1)),
            self.peek_byte(address.wrapping_add(2)),
            self.peek_byte(address.wrapping_add(3)),
        ];
        match self.memory_mode {
            MemoryMode::LittleEndian => u32::from_le_bytes(bytes),
            MemoryMode::BigEndian => u32::from_be_bytes(bytes),
        }
    }

    /// Render the machine state as a colored memory grid with registers and
    /// flags; a no-op unless visualization is enabled
    pub fn visualize(&mut self) {
        if !self.visualize_steps {
            return;
        }

        let width: u32 = 16;
        let pc = self.register_pc;
        let sc = self.register_sc;

        let mut grid = String::from("\n    ====================- MEMORY -=====================\n       ");
        for x in 0..width {
            grid += &format!("_{:x} ", x).dimmed().to_string();
        }
        let mut y: u32 = 0;
        loop {
            grid += &format!("\n    {}", format!("{:02x}_", y & 0xff).dimmed());
            for x in 0..width {
                let m = y * width + x;
                let cell = format!(" {:02X}", self.peek_byte(m));
                let styled = if m == pc {
                    cell.bright_green().bold().to_string()
                } else if m > pc && m < pc.saturating_add(5) {
                    cell.green().to_string()
                } else if m >= sc && m < sc.saturating_add(4) {
                    cell.magenta().to_string()
                } else if m >= sc.saturating_sub(4) && m < sc {
                    cell.magenta().dimmed().to_string()
                } else if m <= self.highest_used {
                    cell.bold().to_string()
                } else {
                    cell
                };
                grid += &styled;
            }
            y += 1;
            if y * width >= 0x100 && self.highest_used + 1 < y * width {
                break;
            }
        }
        let _ = writeln!(self.out, "{}", grid);

        let opcode = self.peek_byte(pc);
        let mnemonic = InstructionName::from_opcode(opcode)
            .map(InstructionName::mnemonic)
            .unwrap_or("(err. NOP)");
        let argument = self.peek_word(pc.wrapping_add(1));
        let _ = writeln!(
            self.out,
            "    Current instruction: {} {}",
            mnemonic.bright_green(),
            format!("0x{:08x}", argument).green()
        );
        let _ = writeln!(
            self.out,
            "    Registers:    A:  0x{},     B:  0x{}",
            format!("{:08x}", self.register_a).bright_magenta(),
            format!("{:08x}", self.register_b).bright_magenta()
        );
        let _ = writeln!(
            self.out,
            "                  PC: 0x{},     SC: 0x{}",
            format!("{:08x}", self.register_pc).bright_magenta(),
            format!("{:08x}", self.register_sc).bright_magenta()
        );
        let _ = writeln!(
            self.out,
            "    Flags (A zero, A negative, A even): {}",
            format!(
                "{}{}{}",
                self.flags.zero as u8, self.flags.negative as u8, self.flags.even as u8
            )
            .bright_magenta()
        );
        let _ = write!(self.out, "    % ");
        let _ = self.out.flush();

        if self.wait_for_user {
            let mut line = String::new();
            let _ = self.inp.read_line(&mut line);
        } else {
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
    }

    /// Print a one-line snapshot of registers and memory up to the last
    /// non-zero byte; switches the machine into mock mode
    pub fn memory_dump(&mut self) {
        self.mock = true;

        let mut dump = format!(
            "A: 0x{:08x}, B: 0x{:08x}, PC: 0x{:08x}, SC: 0x{:08x}; memory ({}B):",
            self.register_a,
            self.register_b,
            self.register_pc,
            self.register_sc,
            self.memory.len()
        );
        let mut end = self.memory.len();
        while end > 1 && self.memory[end - 1] == 0 {
            end -= 1;
        }
        for &byte in &self.memory[..end] {
            dump += &format!(" {:02x}", byte);
        }
        let _ = writeln!(self.out, "{}", dump);
    }
}
