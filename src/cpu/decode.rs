//! Instruction decoding.
//!
//! A 13-bit instruction word packs a 9-bit opcode and two 2-bit
//! addressing-mode fields:
//!
//! ```text
//!   12 11 10 9 8 7 6 5 4 | 3 2 | 1 0
//!   ────── opcode ────── │ Md  │ Ms
//! ```
//!
//! `Md` selects the addressing mode of the first (destination) operand,
//! `Ms` that of the second (source). Operand words follow the instruction
//! word in the instruction stream.

use crate::word::Word13;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Operand addressing mode.
///
/// Each level of indirection adds one memory read to the resolution of
/// the in-stream operand word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddrMode {
    /// The operand word is used as-is.
    Direct,
    /// One dereference: the operand word names a cell.
    Indirect,
    /// Two dereferences.
    DoubleIndirect,
    /// Three dereferences.
    TripleIndirect,
}

impl AddrMode {
    /// Decode a 2-bit mode field.
    pub fn from_bits(bits: u16) -> Result<Self, DecodeError> {
        match bits {
            0 => Ok(AddrMode::Direct),
            1 => Ok(AddrMode::Indirect),
            2 => Ok(AddrMode::DoubleIndirect),
            3 => Ok(AddrMode::TripleIndirect),
            _ => Err(DecodeError::InvalidAddressingMode(bits)),
        }
    }

    /// Encode to the 2-bit mode field.
    pub const fn to_bits(self) -> u16 {
        match self {
            AddrMode::Direct => 0,
            AddrMode::Indirect => 1,
            AddrMode::DoubleIndirect => 2,
            AddrMode::TripleIndirect => 3,
        }
    }

    /// Number of memory reads this mode applies.
    pub const fn indirections(self) -> usize {
        self.to_bits() as usize
    }

    /// Assembly spelling: one `@` per level of indirection.
    pub const fn prefix(self) -> &'static str {
        match self {
            AddrMode::Direct => "",
            AddrMode::Indirect => "@",
            AddrMode::DoubleIndirect => "@@",
            AddrMode::TripleIndirect => "@@@",
        }
    }
}

/// The instruction set. The numeric values are part of the program ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum Opcode {
    // Data movement
    Mov = 0x01,
    Xchg = 0x02,

    // Arithmetic and logic
    Add = 0x03,
    Sub = 0x04,
    And = 0x05,
    Inc = 0x06,
    Dec = 0x07,
    Or = 0x08,
    Xor = 0x09,
    Not = 0x0A,

    // Rotates and shifts
    Rol = 0x0B,
    Ror = 0x0C,
    Shl = 0x0D,
    Shr = 0x0E,

    // Compare
    Cmp = 0x0F,

    // Jumps
    Jmp = 0x10,
    Jz = 0x11,
    Jnz = 0x12,
    Jc = 0x13,
    Jnc = 0x14,
    Js = 0x15,
    Jns = 0x16,
    Jo = 0x17,
    Jno = 0x18,
    Jl = 0x19,
    Jg = 0x1A,
    Jle = 0x1B,
    Jge = 0x1C,

    // Flag operations
    Clc = 0x1F,
    Stc = 0x20,
    Cmc = 0x21,

    // Stack
    Push = 0x22,
    Pop = 0x23,

    // I/O
    In = 0x24,
    Out = 0x25,
    InStr = 0x26,
    InHex = 0x27,

    // System
    Nop = 0x28,
    Halt = 0x29,
}

impl Opcode {
    /// Decode a 9-bit opcode field.
    pub fn from_u16(value: u16) -> Option<Self> {
        let op = match value {
            0x01 => Opcode::Mov,
            0x02 => Opcode::Xchg,
            0x03 => Opcode::Add,
            0x04 => Opcode::Sub,
            0x05 => Opcode::And,
            0x06 => Opcode::Inc,
            0x07 => Opcode::Dec,
            0x08 => Opcode::Or,
            0x09 => Opcode::Xor,
            0x0A => Opcode::Not,
            0x0B => Opcode::Rol,
            0x0C => Opcode::Ror,
            0x0D => Opcode::Shl,
            0x0E => Opcode::Shr,
            0x0F => Opcode::Cmp,
            0x10 => Opcode::Jmp,
            0x11 => Opcode::Jz,
            0x12 => Opcode::Jnz,
            0x13 => Opcode::Jc,
            0x14 => Opcode::Jnc,
            0x15 => Opcode::Js,
            0x16 => Opcode::Jns,
            0x17 => Opcode::Jo,
            0x18 => Opcode::Jno,
            0x19 => Opcode::Jl,
            0x1A => Opcode::Jg,
            0x1B => Opcode::Jle,
            0x1C => Opcode::Jge,
            0x1F => Opcode::Clc,
            0x20 => Opcode::Stc,
            0x21 => Opcode::Cmc,
            0x22 => Opcode::Push,
            0x23 => Opcode::Pop,
            0x24 => Opcode::In,
            0x25 => Opcode::Out,
            0x26 => Opcode::InStr,
            0x27 => Opcode::InHex,
            0x28 => Opcode::Nop,
            0x29 => Opcode::Halt,
            _ => return None,
        };
        Some(op)
    }

    /// The 9-bit opcode value.
    pub const fn value(self) -> u16 {
        self as u16
    }

    /// How many in-stream operand words follow the instruction word.
    pub const fn operand_count(self) -> usize {
        use Opcode::*;
        match self {
            Mov | Xchg | Add | Sub | And | Or | Xor | Cmp => 2,
            Inc | Dec | Not | Rol | Ror | Shl | Shr => 1,
            Jmp | Jz | Jnz | Jc | Jnc | Js | Jns | Jo | Jno | Jl | Jg | Jle | Jge => 1,
            Push | Pop | In | Out | InStr | InHex => 1,
            Clc | Stc | Cmc | Nop | Halt => 0,
        }
    }

    /// Assembly mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Mov => "MOV",
            Xchg => "XCHG",
            Add => "ADD",
            Sub => "SUB",
            And => "AND",
            Inc => "INC",
            Dec => "DEC",
            Or => "OR",
            Xor => "XOR",
            Not => "NOT",
            Rol => "ROL",
            Ror => "ROR",
            Shl => "SHL",
            Shr => "SHR",
            Cmp => "CMP",
            Jmp => "JMP",
            Jz => "JZ",
            Jnz => "JNZ",
            Jc => "JC",
            Jnc => "JNC",
            Js => "JS",
            Jns => "JNS",
            Jo => "JO",
            Jno => "JNO",
            Jl => "JL",
            Jg => "JG",
            Jle => "JLE",
            Jge => "JGE",
            Clc => "CLC",
            Stc => "STC",
            Cmc => "CMC",
            Push => "PUSH",
            Pop => "POP",
            In => "IN",
            Out => "OUT",
            InStr => "INSTR",
            InHex => "INHEX",
            Nop => "NOP",
            Halt => "HALT",
        }
    }
}

/// A decoded instruction word: opcode plus the two mode fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dst_mode: AddrMode,
    pub src_mode: AddrMode,
}

impl Instruction {
    /// Build an instruction with both modes direct.
    pub const fn plain(opcode: Opcode) -> Self {
        Self {
            opcode,
            dst_mode: AddrMode::Direct,
            src_mode: AddrMode::Direct,
        }
    }

    /// Decode a 13-bit instruction word.
    pub fn decode(word: Word13) -> Result<Self, DecodeError> {
        let raw = word.get();
        let opcode_bits = (raw >> 4) & 0x1FF;
        let opcode = Opcode::from_u16(opcode_bits)
            .ok_or(DecodeError::InvalidOpcode(opcode_bits))?;
        let dst_mode = AddrMode::from_bits((raw >> 2) & 0x3)?;
        let src_mode = AddrMode::from_bits(raw & 0x3)?;

        Ok(Self {
            opcode,
            dst_mode,
            src_mode,
        })
    }

    /// Encode back to a 13-bit instruction word.
    pub fn encode(self) -> Word13 {
        Word13::new(
            (self.opcode.value() << 4) | (self.dst_mode.to_bits() << 2) | self.src_mode.to_bits(),
        )
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode {0:#05x}")]
    InvalidOpcode(u16),

    #[error("invalid addressing mode {0}")]
    InvalidAddressingMode(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_halt() {
        let instr = Instruction::decode(Word13::new(0x290)).unwrap();
        assert_eq!(instr.opcode, Opcode::Halt);
        assert_eq!(instr.dst_mode, AddrMode::Direct);
        assert_eq!(instr.src_mode, AddrMode::Direct);
        assert_eq!(Instruction::plain(Opcode::Halt).encode().get(), 0x290);
    }

    #[test]
    fn test_decode_mode_fields() {
        // MOV with Md=Indirect, Ms=TripleIndirect.
        let word = Word13::new((0x01 << 4) | (1 << 2) | 3);
        let instr = Instruction::decode(word).unwrap();
        assert_eq!(instr.opcode, Opcode::Mov);
        assert_eq!(instr.dst_mode, AddrMode::Indirect);
        assert_eq!(instr.src_mode, AddrMode::TripleIndirect);
    }

    #[test]
    fn test_decode_invalid_opcode() {
        for raw in [0x000u16, (0x1D << 4), (0x1E << 4), (0x2A << 4), 0x1FF0] {
            assert!(matches!(
                Instruction::decode(Word13::new(raw)),
                Err(DecodeError::InvalidOpcode(_))
            ));
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let modes = [
            AddrMode::Direct,
            AddrMode::Indirect,
            AddrMode::DoubleIndirect,
            AddrMode::TripleIndirect,
        ];
        for opcode_value in 0x01..=0x29u16 {
            let Some(opcode) = Opcode::from_u16(opcode_value) else {
                continue;
            };
            for &dst_mode in &modes {
                for &src_mode in &modes {
                    let instr = Instruction {
                        opcode,
                        dst_mode,
                        src_mode,
                    };
                    assert_eq!(Instruction::decode(instr.encode()).unwrap(), instr);
                }
            }
        }
    }

    #[test]
    fn test_opcode_abi_values() {
        assert_eq!(Opcode::Mov.value(), 0x01);
        assert_eq!(Opcode::Cmp.value(), 0x0F);
        assert_eq!(Opcode::Jge.value(), 0x1C);
        assert_eq!(Opcode::Clc.value(), 0x1F);
        assert_eq!(Opcode::InHex.value(), 0x27);
        assert_eq!(Opcode::Halt.value(), 0x29);
    }

    #[test]
    fn test_operand_counts() {
        assert_eq!(Opcode::Mov.operand_count(), 2);
        assert_eq!(Opcode::Cmp.operand_count(), 2);
        assert_eq!(Opcode::Inc.operand_count(), 1);
        assert_eq!(Opcode::Jz.operand_count(), 1);
        assert_eq!(Opcode::Push.operand_count(), 1);
        assert_eq!(Opcode::Halt.operand_count(), 0);
        assert_eq!(Opcode::Cmc.operand_count(), 0);
    }

    #[test]
    fn test_mode_prefix() {
        assert_eq!(AddrMode::Direct.prefix(), "");
        assert_eq!(AddrMode::TripleIndirect.prefix(), "@@@");
    }
}
