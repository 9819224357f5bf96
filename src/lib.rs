//! # vm13
//!
//! An emulator for a small register-less virtual machine out of a
//! reverse-engineering crackme. Its distinguishing property is the
//! memory substrate: 8192 words of 13 bits each, bit-packed contiguously
//! into a byte buffer. The instruction and stack pointers live in the
//! two reserved cells at the top of the address space, and every operand
//! can be resolved through up to three levels of indirection.

pub mod word;
pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

// Re-export commonly used types
pub use word::Word13;
pub use cpu::{
    AddrMode, Cpu, CpuError, CpuState, Flags, Instruction, IoBridge, IoError, Opcode,
    PackedMemory, ScriptedIo, StdIo, StopHandle,
};
pub use asm::{assemble, disassemble, AssemblerError, ImageError, ProgramImage};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
