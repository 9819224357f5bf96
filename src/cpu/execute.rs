//! CPU execution engine.
//!
//! Implements the fetch-decode-execute cycle over the packed memory,
//! the stack discipline and the trap model. The VM is register-less:
//! the instruction and stack pointers live in the two reserved cells at
//! the top of the address space, and every instruction works directly
//! on memory cells.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::cpu::alu;
use crate::cpu::decode::{AddrMode, DecodeError, Instruction, Opcode};
use crate::cpu::flags::Flags;
use crate::cpu::io::{IoBridge, IoError, StdIo};
use crate::cpu::memory::{MemoryError, PackedMemory, SP_CELL, SP_INITIAL};
use crate::word::Word13;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has executed HALT.
    Halted,
    /// CPU stopped on a trap.
    Faulted,
}

/// A handle that requests a cooperative stop of a running CPU.
///
/// The flag is checked between instructions; the next step after a
/// request exits with [`CpuError::Cancelled`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// The virtual machine.
pub struct Cpu {
    /// Packed cell memory (including the IP and SP cells).
    pub mem: PackedMemory,
    /// Status flags.
    pub flags: Flags,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count (for limits and tracing).
    pub cycles: u64,
    io: Box<dyn IoBridge>,
    stop: Arc<AtomicBool>,
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a CPU wired to process stdin/stdout.
    pub fn new() -> Self {
        Self::with_io(Box::new(StdIo))
    }

    /// Create a CPU with an injected I/O bridge.
    pub fn with_io(io: Box<dyn IoBridge>) -> Self {
        let mut cpu = Self {
            mem: PackedMemory::new(),
            flags: Flags::new(),
            state: CpuState::Running,
            cycles: 0,
            io,
            stop: Arc::new(AtomicBool::new(false)),
            last_instr: None,
        };
        cpu.initialize();
        cpu
    }

    /// Zero all memory, seat the stack and instruction pointers, clear
    /// the flags and make the CPU runnable again.
    pub fn initialize(&mut self) {
        self.mem.clear();
        self.mem.set_sp(Word13::new(SP_INITIAL));
        self.mem.set_ip(Word13::ZERO);
        self.flags.reset();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.last_instr = None;
        self.stop.store(false, Ordering::Relaxed);
    }

    /// Re-clear the flags without touching memory.
    pub fn reset(&mut self) {
        self.flags.reset();
    }

    /// Load a program into cells `0..words.len()`.
    pub fn load_program(&mut self, words: &[Word13]) -> Result<(), MemoryError> {
        self.mem.load_words(words)
    }

    /// A handle for requesting a cooperative stop from outside.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed, or the trap that
    /// stopped the CPU.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        if self.stop.load(Ordering::Relaxed) {
            self.state = CpuState::Faulted;
            return Err(CpuError::Cancelled);
        }

        let ip = self.mem.ip();
        match self.fetch_and_execute(ip) {
            Ok(instr) => {
                self.cycles += 1;
                self.last_instr = Some(instr);
                Ok(instr)
            }
            Err(err) => {
                self.state = CpuState::Faulted;
                Err(err)
            }
        }
    }

    /// Run until HALT or a trap.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles + max_cycles;

        while self.state == CpuState::Running && self.cycles < limit {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    fn fetch_and_execute(&mut self, ip: Word13) -> Result<Instruction, CpuError> {
        // Fetch and post-increment through the IP cell.
        let word = self.mem.read(ip.get())?;
        self.mem.set_ip(ip.wrapping_add(1));

        let instr = Instruction::decode(word)
            .map_err(|source| CpuError::Decode { source, ip: ip.get() })?;

        // Operand words follow in the instruction stream.
        let mut operands = [Word13::ZERO; 2];
        for slot in operands.iter_mut().take(instr.opcode.operand_count()) {
            let at = self.mem.ip();
            *slot = self.mem.read(at.get())?;
            self.mem.set_ip(at.wrapping_add(1));
        }

        self.execute(instr, operands[0], operands[1], ip)?;
        Ok(instr)
    }

    /// Execute a decoded instruction with its fetched operand words.
    ///
    /// `op1` resolves through `dst_mode`, `op2` through `src_mode`.
    /// Destinations and jump targets use the resolved word as an address;
    /// MOV/PUSH/OUT sources use it as the value itself, while the
    /// arithmetic sources read the cell it names.
    fn execute(
        &mut self,
        instr: Instruction,
        op1: Word13,
        op2: Word13,
        ip: Word13,
    ) -> Result<(), CpuError> {
        let md = instr.dst_mode;
        let ms = instr.src_mode;

        match instr.opcode {
            // ==================== Data movement ====================

            Opcode::Mov => {
                let dst = self.mem.resolve(op1, md)?;
                let value = self.mem.resolve(op2, ms)?;
                self.mem.write(dst.get(), value)?;
            }

            Opcode::Xchg => {
                let a = self.mem.resolve(op1, md)?;
                let b = self.mem.resolve(op2, ms)?;
                let va = self.mem.read(a.get())?;
                let vb = self.mem.read(b.get())?;
                self.mem.write(a.get(), vb)?;
                self.mem.write(b.get(), va)?;
            }

            // ==================== Arithmetic and logic ====================

            Opcode::Add => self.binary_op(op1, md, op2, ms, alu::add)?,
            Opcode::Sub => self.binary_op(op1, md, op2, ms, alu::sub)?,
            Opcode::And => self.binary_op(op1, md, op2, ms, alu::and)?,
            Opcode::Or => self.binary_op(op1, md, op2, ms, alu::or)?,
            Opcode::Xor => self.binary_op(op1, md, op2, ms, alu::xor)?,

            Opcode::Inc => self.unary_op(op1, md, alu::inc)?,
            Opcode::Dec => self.unary_op(op1, md, alu::dec)?,
            Opcode::Not => self.unary_op(op1, md, alu::not)?,

            // ==================== Rotates and shifts ====================

            Opcode::Shl => self.unary_op(op1, md, alu::shl)?,
            Opcode::Shr => self.unary_op(op1, md, alu::shr)?,

            Opcode::Rol => {
                let carry = self.flags.carry;
                self.unary_op(op1, md, |a| alu::rol(a, carry))?;
            }

            Opcode::Ror => {
                let carry = self.flags.carry;
                self.unary_op(op1, md, |a| alu::ror(a, carry))?;
            }

            // ==================== Compare ====================

            Opcode::Cmp => {
                let a = self.mem.read(self.mem.resolve(op1, md)?.get())?;
                let b = self.mem.read(self.mem.resolve(op2, ms)?.get())?;
                let (_, flags) = alu::sub(a, b);
                self.flags = flags;
            }

            // ==================== Jumps ====================

            Opcode::Jmp
            | Opcode::Jz
            | Opcode::Jnz
            | Opcode::Jc
            | Opcode::Jnc
            | Opcode::Js
            | Opcode::Jns
            | Opcode::Jo
            | Opcode::Jno
            | Opcode::Jl
            | Opcode::Jg
            | Opcode::Jle
            | Opcode::Jge => {
                if self.branch_taken(instr.opcode) {
                    let target = self.mem.resolve(op1, md)?;
                    self.mem.set_ip(target);
                }
            }

            // ==================== Flag operations ====================

            Opcode::Clc => self.flags.carry = false,
            Opcode::Stc => self.flags.carry = true,
            Opcode::Cmc => self.flags.carry = !self.flags.carry,

            // ==================== Stack ====================

            Opcode::Push => {
                let value = self.mem.resolve(op1, md)?;
                self.push(value, ip)?;
            }

            Opcode::Pop => {
                let dst = self.mem.resolve(op1, md)?;
                let value = self.pop(ip)?;
                self.mem.write(dst.get(), value)?;
            }

            // ==================== I/O ====================

            Opcode::In => {
                let dst = self.mem.resolve(op1, md)?;
                let byte = self
                    .io
                    .read_char()
                    .map_err(|source| CpuError::Io { source, ip: ip.get() })?
                    .ok_or(CpuError::EndOfInput { ip: ip.get() })?;
                self.mem.write(dst.get(), Word13::from(byte))?;
            }

            Opcode::Out => {
                let value = self.mem.resolve(op1, md)?;
                self.io
                    .write_char(value.low_byte())
                    .map_err(|source| CpuError::Io { source, ip: ip.get() })?;
            }

            Opcode::InStr => {
                let base = self.mem.resolve(op1, md)?;
                let line = self
                    .io
                    .read_line()
                    .map_err(|source| CpuError::Io { source, ip: ip.get() })?
                    .ok_or(CpuError::EndOfInput { ip: ip.get() })?;

                // One character per cell, then a zero terminator cell.
                let mut at = base;
                for &byte in &line {
                    self.mem.write(at.get(), Word13::from(byte))?;
                    at = at.wrapping_add(1);
                }
                self.mem.write(at.get(), Word13::ZERO)?;
            }

            Opcode::InHex => {
                let base = self.mem.resolve(op1, md)?;
                let tokens = self
                    .io
                    .read_hex_tokens()
                    .map_err(|source| CpuError::Io { source, ip: ip.get() })?
                    .ok_or(CpuError::EndOfInput { ip: ip.get() })?;

                let mut at = base;
                for token in tokens {
                    self.mem.write(at.get(), token)?;
                    at = at.wrapping_add(1);
                }
            }

            // ==================== System ====================

            Opcode::Nop => {}

            Opcode::Halt => {
                self.state = CpuState::Halted;
            }
        }

        Ok(())
    }

    /// Read-modify-write with a source cell: `dst op= [src]`.
    fn binary_op(
        &mut self,
        op1: Word13,
        md: AddrMode,
        op2: Word13,
        ms: AddrMode,
        op: fn(Word13, Word13) -> (Word13, Flags),
    ) -> Result<(), CpuError> {
        let dst = self.mem.resolve(op1, md)?;
        let a = self.mem.read(dst.get())?;
        let b = self.mem.read(self.mem.resolve(op2, ms)?.get())?;
        let (result, flags) = op(a, b);
        self.mem.write(dst.get(), result)?;
        self.flags = flags;
        Ok(())
    }

    /// In-place modify of the destination cell.
    fn unary_op(
        &mut self,
        op1: Word13,
        md: AddrMode,
        op: impl FnOnce(Word13) -> (Word13, Flags),
    ) -> Result<(), CpuError> {
        let dst = self.mem.resolve(op1, md)?;
        let a = self.mem.read(dst.get())?;
        let (result, flags) = op(a);
        self.mem.write(dst.get(), result)?;
        self.flags = flags;
        Ok(())
    }

    fn branch_taken(&self, opcode: Opcode) -> bool {
        let f = self.flags;
        match opcode {
            Opcode::Jmp => true,
            Opcode::Jz => f.zero,
            Opcode::Jnz => !f.zero,
            Opcode::Jc => f.carry,
            Opcode::Jnc => !f.carry,
            Opcode::Js => f.sign,
            Opcode::Jns => !f.sign,
            Opcode::Jo => f.overflow,
            Opcode::Jno => !f.overflow,
            Opcode::Jl => f.less(),
            Opcode::Jg => f.greater(),
            Opcode::Jle => f.less_equal(),
            Opcode::Jge => f.greater_equal(),
            _ => unreachable!("branch_taken called for non-jump opcode"),
        }
    }

    /// Push a value: write at SP, then decrement SP.
    fn push(&mut self, value: Word13, ip: Word13) -> Result<(), CpuError> {
        let sp = self.mem.sp();
        let new_sp = sp.wrapping_sub(1);
        if stack_reserved(new_sp) {
            return Err(CpuError::StackFault {
                sp: new_sp.get(),
                ip: ip.get(),
            });
        }
        self.mem.write(sp.get(), value)?;
        self.mem.set_sp(new_sp);
        Ok(())
    }

    /// Pop a value: increment SP, then read at SP.
    fn pop(&mut self, ip: Word13) -> Result<Word13, CpuError> {
        let new_sp = self.mem.sp().wrapping_add(1);
        if stack_reserved(new_sp) {
            return Err(CpuError::StackFault {
                sp: new_sp.get(),
                ip: ip.get(),
            });
        }
        let value = self.mem.read(new_sp.get())?;
        self.mem.set_sp(new_sp);
        Ok(value)
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU has halted cleanly.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

/// SP may never land on the reserved pointer cells.
fn stack_reserved(sp: Word13) -> bool {
    sp.get() >= SP_CELL
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("flags", &self.flags)
            .field("ip", &self.mem.ip())
            .field("sp", &self.mem.sp())
            .finish()
    }
}

/// Traps that terminate execution.
#[derive(Debug, Clone, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("memory fault: {0}")]
    Memory(#[from] MemoryError),

    #[error("decode fault at {ip:#06x}: {source}")]
    Decode { source: DecodeError, ip: u16 },

    #[error("stack fault at {ip:#06x}: SP would reach reserved cell {sp:#06x}")]
    StackFault { sp: u16, ip: u16 },

    #[error("I/O fault at {ip:#06x}: {source}")]
    Io { source: IoError, ip: u16 },

    #[error("I/O fault at {ip:#06x}: end of input")]
    EndOfInput { ip: u16 },

    #[error("execution cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::io::ScriptedIo;
    use crate::cpu::memory::IP_CELL;

    fn words(raw: &[u16]) -> Vec<Word13> {
        raw.iter().map(|&w| Word13::new(w)).collect()
    }

    fn run_program(raw: &[u16]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.load_program(&words(raw)).unwrap();
        cpu.run().unwrap();
        cpu
    }

    #[test]
    fn test_halt_immediately() {
        let mut cpu = Cpu::new();
        cpu.load_program(&words(&[0x290])).unwrap();

        let executed = cpu.run().unwrap();

        assert_eq!(executed, 1);
        assert!(cpu.is_halted());
        assert_eq!(cpu.mem.ip().get(), 1);
    }

    #[test]
    fn test_add_two_literals() {
        // MOV 0x10, #3; MOV 0x11, #4; ADD 0x10, 0x11; HALT
        let cpu = run_program(&[
            0x010, 0x010, 0x003,
            0x010, 0x011, 0x004,
            0x030, 0x010, 0x011,
            0x290,
        ]);

        assert_eq!(cpu.mem.peek(0x10).get(), 7);
        assert_eq!(cpu.flags, Flags::new());
    }

    #[test]
    fn test_add_signed_overflow() {
        // cell 0x20 = 0x0FFF, cell 0x21 = 1, ADD 0x20, 0x21
        let cpu = run_program(&[
            0x010, 0x020, 0xFFF,
            0x010, 0x021, 0x001,
            0x030, 0x020, 0x021,
            0x290,
        ]);

        assert_eq!(cpu.mem.peek(0x20).get(), 0x1000);
        assert!(cpu.flags.sign);
        assert!(cpu.flags.overflow);
        assert!(!cpu.flags.carry);
        assert!(!cpu.flags.zero);
    }

    #[test]
    fn test_stack_roundtrip() {
        // PUSH #0x100; PUSH #0x200; POP 0x30; POP 0x31; HALT
        let cpu = run_program(&[
            0x220, 0x100,
            0x220, 0x200,
            0x230, 0x030,
            0x230, 0x031,
            0x290,
        ]);

        assert_eq!(cpu.mem.peek(0x30).get(), 0x200);
        assert_eq!(cpu.mem.peek(0x31).get(), 0x100);
        assert_eq!(cpu.mem.sp().get(), SP_INITIAL);
    }

    #[test]
    fn test_conditional_branch_taken() {
        // CMP 5, 5 (equal cells); JZ 0x0A; HALT; ...; 0x0A: MOV 0x50, #0xAB; HALT
        let cpu = run_program(&[
            0x0F0, 0x005, 0x005,
            0x110, 0x00A,
            0x290,
            0x000, 0x000, 0x000, 0x000,
            0x010, 0x050, 0x0AB,
            0x290,
        ]);

        assert_eq!(cpu.mem.peek(0x50).get(), 0xAB);
    }

    #[test]
    fn test_conditional_branch_not_taken() {
        // Same layout, but the compared cells differ (cells 1 and 2 hold
        // the CMP operand words 0x001 and 0x002).
        let cpu = run_program(&[
            0x0F0, 0x001, 0x002,
            0x110, 0x00A,
            0x290,
            0x000, 0x000, 0x000, 0x000,
            0x010, 0x050, 0x0AB,
            0x290,
        ]);

        assert_eq!(cpu.mem.peek(0x50).get(), 0);
        assert!(cpu.is_halted());
    }

    #[test]
    fn test_indirect_write() {
        // cell 0x40 holds 0x80; MOV @0x40, #0x77 writes through it.
        let mut cpu = Cpu::new();
        cpu.mem.poke(0x40, Word13::new(0x80));
        cpu.load_program(&words(&[0x014, 0x040, 0x077, 0x290]))
            .unwrap();

        cpu.run().unwrap();

        assert_eq!(cpu.mem.peek(0x80).get(), 0x77);
        assert_eq!(cpu.mem.peek(0x40).get(), 0x80);
    }

    #[test]
    fn test_triple_indirect_source() {
        // 0x40 -> 0x41 -> 0x42 -> value 0x123
        let mut cpu = Cpu::new();
        cpu.mem.poke(0x40, Word13::new(0x41));
        cpu.mem.poke(0x41, Word13::new(0x42));
        cpu.mem.poke(0x42, Word13::new(0x123));
        // MOV 0x50, @@@0x40
        cpu.load_program(&words(&[0x013, 0x050, 0x040, 0x290]))
            .unwrap();

        cpu.run().unwrap();

        assert_eq!(cpu.mem.peek(0x50).get(), 0x123);
    }

    #[test]
    fn test_xchg_swaps_cells() {
        let cpu = run_program(&[
            0x010, 0x060, 0x0AA,
            0x010, 0x061, 0x0BB,
            0x020, 0x060, 0x061,
            0x290,
        ]);

        assert_eq!(cpu.mem.peek(0x60).get(), 0xBB);
        assert_eq!(cpu.mem.peek(0x61).get(), 0xAA);
    }

    #[test]
    fn test_inc_dec() {
        // MOV 0x70, #0x1FFF; INC 0x70 (wraps to 0); DEC 0x70 (back to -1)
        let mut cpu = Cpu::new();
        cpu.load_program(&words(&[0x010, 0x070, 0x1FFF, 0x060, 0x070, 0x290]))
            .unwrap();
        cpu.run().unwrap();

        assert_eq!(cpu.mem.peek(0x70).get(), 0);
        assert!(cpu.flags.zero);
        assert!(cpu.flags.carry);

        let cpu = run_program(&[0x010, 0x070, 0x000, 0x070, 0x070, 0x290]);
        assert_eq!(cpu.mem.peek(0x70).get(), 0x1FFF);
        assert!(cpu.flags.sign);
        assert!(cpu.flags.carry);
    }

    #[test]
    fn test_cmp_does_not_write() {
        let cpu = run_program(&[
            0x010, 0x010, 0x005,
            0x010, 0x011, 0x003,
            0x0F0, 0x010, 0x011,
            0x290,
        ]);

        assert_eq!(cpu.mem.peek(0x10).get(), 5);
        assert_eq!(cpu.mem.peek(0x11).get(), 3);
        assert!(!cpu.flags.zero);
        assert!(cpu.flags.greater());
    }

    #[test]
    fn test_signed_branch_less() {
        // 1 < 2: CMP then JL must be taken.
        let cpu = run_program(&[
            0x010, 0x010, 0x001,
            0x010, 0x011, 0x002,
            0x0F0, 0x010, 0x011,
            0x190, 0x00C,
            0x290,
            0x010, 0x050, 0x001,
            0x290,
        ]);

        assert_eq!(cpu.mem.peek(0x50).get(), 1);
    }

    #[test]
    fn test_flag_ops_touch_only_carry() {
        // CMP equal sets Z; STC must leave Z alone.
        let cpu = run_program(&[
            0x0F0, 0x005, 0x005,
            0x200,
            0x290,
        ]);

        assert!(cpu.flags.zero);
        assert!(cpu.flags.carry);

        let cpu = run_program(&[
            0x0F0, 0x005, 0x005,
            0x200,
            0x210,
            0x290,
        ]);
        assert!(cpu.flags.zero);
        assert!(!cpu.flags.carry);
    }

    #[test]
    fn test_non_flag_ops_preserve_flags() {
        // CMP equal sets Z; MOV, PUSH, POP, JMP and NOP must not clobber.
        let cpu = run_program(&[
            0x0F0, 0x005, 0x005,
            0x010, 0x030, 0x001,
            0x220, 0x123,
            0x230, 0x031,
            0x280,
            0x290,
        ]);

        assert!(cpu.flags.zero);
        assert!(!cpu.flags.sign);
        assert!(!cpu.flags.carry);
        assert!(!cpu.flags.overflow);
    }

    #[test]
    fn test_rotate_through_carry() {
        // STC; MOV 0x20, #0; ROL 0x20 -> carry rotates into bit 0.
        let cpu = run_program(&[
            0x200,
            0x010, 0x020, 0x000,
            0x0B0, 0x020,
            0x290,
        ]);

        assert_eq!(cpu.mem.peek(0x20).get(), 1);
        assert!(!cpu.flags.carry);
    }

    #[test]
    fn test_invalid_opcode_trap() {
        let mut cpu = Cpu::new();
        cpu.load_program(&words(&[0x000])).unwrap();

        let err = cpu.run().unwrap_err();

        assert!(matches!(err, CpuError::Decode { ip: 0, .. }));
        assert_eq!(cpu.state, CpuState::Faulted);
    }

    #[test]
    fn test_pop_underflow_faults() {
        // POP from the initial stack lands SP on the reserved SP cell.
        let mut cpu = Cpu::new();
        cpu.load_program(&words(&[0x230, 0x030])).unwrap();

        let err = cpu.run().unwrap_err();

        assert!(matches!(err, CpuError::StackFault { sp: SP_CELL, .. }));
        assert_eq!(cpu.state, CpuState::Faulted);
    }

    #[test]
    fn test_push_overflow_faults() {
        // With SP at 0, one more push would wrap onto the IP cell.
        let mut cpu = Cpu::new();
        cpu.mem.set_sp(Word13::ZERO);
        cpu.load_program(&words(&[0x220, 0x001])).unwrap();

        let err = cpu.run().unwrap_err();

        assert!(matches!(err, CpuError::StackFault { sp: IP_CELL, .. }));
    }

    #[test]
    fn test_char_io() {
        let io = ScriptedIo::new("A");
        let mut cpu = Cpu::with_io(Box::new(io.clone()));
        // IN 0x50; OUT #0x42; OUT @0x50; HALT
        cpu.load_program(&words(&[
            0x240, 0x050,
            0x250, 0x042,
            0x254, 0x050,
            0x290,
        ]))
        .unwrap();

        cpu.run().unwrap();

        assert_eq!(cpu.mem.peek(0x50).get(), 0x41);
        assert_eq!(io.output(), "BA");
    }

    #[test]
    fn test_in_on_eof_faults() {
        let mut cpu = Cpu::with_io(Box::new(ScriptedIo::new("")));
        cpu.load_program(&words(&[0x240, 0x050])).unwrap();

        let err = cpu.run().unwrap_err();

        assert!(matches!(err, CpuError::EndOfInput { ip: 0 }));
    }

    #[test]
    fn test_in_str() {
        let io = ScriptedIo::new("hi\nrest");
        let mut cpu = Cpu::with_io(Box::new(io));
        cpu.load_program(&words(&[0x260, 0x060, 0x290])).unwrap();

        cpu.run().unwrap();

        assert_eq!(cpu.mem.peek(0x60).get(), b'h' as u16);
        assert_eq!(cpu.mem.peek(0x61).get(), b'i' as u16);
        assert_eq!(cpu.mem.peek(0x62).get(), 0);
    }

    #[test]
    fn test_in_hex() {
        let io = ScriptedIo::new("10 1FFF 7\n");
        let mut cpu = Cpu::with_io(Box::new(io));
        cpu.load_program(&words(&[0x270, 0x060, 0x290])).unwrap();

        cpu.run().unwrap();

        assert_eq!(cpu.mem.peek(0x60).get(), 0x10);
        assert_eq!(cpu.mem.peek(0x61).get(), 0x1FFF);
        assert_eq!(cpu.mem.peek(0x62).get(), 0x7);
    }

    #[test]
    fn test_cancellation() {
        // Tight loop: JMP 0.
        let mut cpu = Cpu::new();
        cpu.load_program(&words(&[0x100, 0x000])).unwrap();

        let executed = cpu.run_limited(10).unwrap();
        assert_eq!(executed, 10);
        assert!(cpu.is_running());

        cpu.stop_handle().request_stop();
        let err = cpu.step().unwrap_err();
        assert!(matches!(err, CpuError::Cancelled));
        assert!(!cpu.is_running());
    }

    #[test]
    fn test_step_after_halt_errors() {
        let mut cpu = Cpu::new();
        cpu.load_program(&words(&[0x290])).unwrap();
        cpu.run().unwrap();

        assert!(matches!(
            cpu.step(),
            Err(CpuError::NotRunning(CpuState::Halted))
        ));
    }

    #[test]
    fn test_initialize_reseats_pointers() {
        let mut cpu = Cpu::new();
        cpu.load_program(&words(&[0x290])).unwrap();
        cpu.run().unwrap();

        cpu.initialize();

        assert_eq!(cpu.mem.ip().get(), 0);
        assert_eq!(cpu.mem.sp().get(), SP_INITIAL);
        assert_eq!(cpu.mem.peek(0).get(), 0);
        assert!(cpu.is_running());
        assert_eq!(cpu.cycles, 0);
    }
}
