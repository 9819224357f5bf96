//! CPU emulation for the packed 13-bit VM.
//!
//! This module implements the complete machine:
//! - 8192 bit-packed 13-bit memory cells with the reserved IP/SP cells
//! - four status flags (Z, S, C, V)
//! - the 38-instruction set with four-level operand indirection
//! - the fetch-decode-execute loop and its trap model

pub mod memory;
pub mod flags;
pub mod alu;
pub mod decode;
pub mod io;
pub mod execute;

pub use memory::{PackedMemory, MemoryError};
pub use flags::Flags;
pub use decode::{Instruction, Opcode, AddrMode, DecodeError};
pub use io::{IoBridge, IoError, StdIo, ScriptedIo};
pub use execute::{Cpu, CpuError, CpuState, StopHandle};
