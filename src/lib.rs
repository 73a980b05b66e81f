//! An assembler and virtual machine for the Joy architecture, a minimalist
//! 32-bit register machine, featuring:
//! - a two-pass assembler with definitions, labels, data directives and
//!   file inclusion
//! - static memory-semantic validation of the assembled image
//! - a virtual machine with a bounded call stack, condition flags and an
//!   optional terminal visualizer

pub mod assembler;
pub mod logging;
pub mod rng;
pub mod utf8;
pub mod vm;
