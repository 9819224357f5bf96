//! Assembler for VM programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//! LOOP:               ; Define a label
//!     MOV 0x10, 0x2A  ; Store literal 0x2A at cell 0x10
//!     ADD 0x10, @0x11 ; One @ per level of indirection
//!     OUT 'A'         ; Character literal
//!     JNZ LOOP        ; Jump to label
//!     HALT
//!
//!     ORG 0x50        ; Pad with zeros up to address 0x50
//!     DAT 0x42        ; Emit a raw data word
//! ```
//!
//! Instruction words and their operand words are emitted as separate
//! cells, so label fixups in pass 2 patch the operand word in place.

use crate::cpu::decode::{AddrMode, Instruction, Opcode};
use crate::word::Word13;
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to a list of words loadable at cell 0.
pub fn assemble(source: &str) -> Result<Vec<Word13>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// An operand value that may still be an unresolved label.
enum OperandValue {
    Known(Word13),
    Label { name: String, line: usize },
}

/// The assembler state.
struct Assembler {
    /// Symbol table (label -> address).
    symbols: HashMap<String, u16>,
    /// Pending label fixups (output_index, label, source_line).
    pending: Vec<(usize, String, usize)>,
    /// Output words.
    output: Vec<Word13>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<Word13>, AssemblerError> {
        // Pass 1: collect labels and generate code.
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: resolve forward references.
        self.resolve_references()?;

        Ok(self.output.clone())
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let line = strip_comment(line).trim();

        if line.is_empty() {
            return Ok(());
        }

        // Label definition, optionally followed by an instruction. A colon
        // inside an operand (':' literal) does not start a label.
        if let Some(colon_idx) = line.find(':') {
            let candidate = line[..colon_idx].trim();
            if !candidate.is_empty()
                && candidate.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                let label = candidate.to_uppercase();
                if self.symbols.contains_key(&label) {
                    return Err(AssemblerError::DuplicateLabel { line: line_num, label });
                }
                self.symbols.insert(label, self.output.len() as u16);

                let rest = line[colon_idx + 1..].trim();
                if !rest.is_empty() {
                    return self.process_statement(rest, line_num);
                }
                return Ok(());
            }
        }

        self.process_statement(line, line_num)
    }

    fn process_statement(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let (mnemonic, rest) = match line.find(char::is_whitespace) {
            Some(idx) => (line[..idx].to_uppercase(), line[idx..].trim()),
            None => (line.to_uppercase(), ""),
        };

        let operands: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(str::trim).collect()
        };

        match mnemonic.as_str() {
            "ORG" => {
                let addr = self.expect_value(&mnemonic, &operands, line_num)?;
                let addr = addr.get() as usize;
                if addr < self.output.len() {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: format!(
                            "ORG 0x{:04X} is behind the current address 0x{:04X}",
                            addr,
                            self.output.len()
                        ),
                    });
                }
                self.output.resize(addr, Word13::ZERO);
            }

            "DAT" | "DATA" => {
                if operands.len() != 1 {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: "DAT takes exactly one value".into(),
                    });
                }
                let value = self.parse_value_or_label(operands[0], line_num)?;
                self.emit_value(value);
            }

            _ => self.process_instruction(&mnemonic, &operands, line_num)?,
        }

        Ok(())
    }

    fn process_instruction(
        &mut self,
        mnemonic: &str,
        operands: &[&str],
        line_num: usize,
    ) -> Result<(), AssemblerError> {
        let opcode = opcode_from_mnemonic(mnemonic).ok_or_else(|| {
            AssemblerError::UnknownMnemonic {
                line: line_num,
                mnemonic: mnemonic.to_string(),
            }
        })?;

        if operands.len() != opcode.operand_count() {
            return Err(AssemblerError::OperandCount {
                line: line_num,
                mnemonic: mnemonic.to_string(),
                expected: opcode.operand_count(),
                got: operands.len(),
            });
        }

        let mut modes = [AddrMode::Direct; 2];
        let mut values = Vec::with_capacity(operands.len());
        for (i, operand) in operands.iter().enumerate() {
            let (mode, value) = self.parse_operand(operand, line_num)?;
            modes[i] = mode;
            values.push(value);
        }

        let instr = Instruction {
            opcode,
            dst_mode: modes[0],
            src_mode: modes[1],
        };
        self.output.push(instr.encode());
        for value in values {
            self.emit_value(value);
        }

        Ok(())
    }

    /// Parse an operand: optional `@` indirection prefix, then a value.
    fn parse_operand(
        &mut self,
        operand: &str,
        line_num: usize,
    ) -> Result<(AddrMode, OperandValue), AssemblerError> {
        let depth = operand.chars().take_while(|&c| c == '@').count();
        if depth > 3 {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("at most three levels of indirection: {:?}", operand),
            });
        }
        let mode = match depth {
            0 => AddrMode::Direct,
            1 => AddrMode::Indirect,
            2 => AddrMode::DoubleIndirect,
            _ => AddrMode::TripleIndirect,
        };

        let value = self.parse_value_or_label(operand[depth..].trim(), line_num)?;
        Ok((mode, value))
    }

    fn parse_value_or_label(
        &mut self,
        text: &str,
        line_num: usize,
    ) -> Result<OperandValue, AssemblerError> {
        if text.is_empty() {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: "missing operand value".into(),
            });
        }

        // Character literal.
        if let Some(inner) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
            let byte = match inner {
                "\\n" => b'\n',
                "\\t" => b'\t',
                "\\0" => 0,
                "\\\\" => b'\\',
                _ => {
                    let mut chars = inner.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) if c.is_ascii() => c as u8,
                        _ => {
                            return Err(AssemblerError::SyntaxError {
                                line: line_num,
                                message: format!("invalid character literal {:?}", text),
                            })
                        }
                    }
                }
            };
            return Ok(OperandValue::Known(Word13::from(byte)));
        }

        // Hex literal.
        if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            return Word13::parse_hex(digits)
                .map(OperandValue::Known)
                .map_err(|e| AssemblerError::SyntaxError {
                    line: line_num,
                    message: e.to_string(),
                });
        }

        // Decimal number, possibly negative.
        if text.starts_with('-') || text.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            let number: i32 = text.parse().map_err(|_| AssemblerError::SyntaxError {
                line: line_num,
                message: format!("invalid number {:?}", text),
            })?;
            if number < Word13::MIN_SIGNED as i32 || number > Word13::MAX as i32 {
                return Err(AssemblerError::ValueOutOfRange {
                    line: line_num,
                    value: number,
                });
            }
            return Ok(OperandValue::Known(Word13::new(number as u16)));
        }

        // Label reference, resolved in pass 2.
        Ok(OperandValue::Label {
            name: text.to_uppercase(),
            line: line_num,
        })
    }

    fn emit_value(&mut self, value: OperandValue) {
        match value {
            OperandValue::Known(word) => self.output.push(word),
            OperandValue::Label { name, line } => {
                // Placeholder; patched by resolve_references.
                self.pending.push((self.output.len(), name, line));
                self.output.push(Word13::ZERO);
            }
        }
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for (index, label, line) in &self.pending {
            let addr = self.symbols.get(label).ok_or_else(|| {
                AssemblerError::UndefinedLabel {
                    line: *line,
                    label: label.clone(),
                }
            })?;
            self.output[*index] = Word13::new(*addr);
        }
        Ok(())
    }

    fn expect_value(
        &mut self,
        mnemonic: &str,
        operands: &[&str],
        line_num: usize,
    ) -> Result<Word13, AssemblerError> {
        if operands.len() != 1 {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("{} requires exactly one value", mnemonic),
            });
        }
        match self.parse_value_or_label(operands[0], line_num)? {
            OperandValue::Known(word) => Ok(word),
            OperandValue::Label { name, .. } => Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("{} does not accept a label ({})", mnemonic, name),
            }),
        }
    }
}

/// Strip a `;` comment, ignoring semicolons inside character literals.
fn strip_comment(line: &str) -> &str {
    let mut in_char = false;
    for (i, c) in line.char_indices() {
        match c {
            '\'' => in_char = !in_char,
            ';' if !in_char => return &line[..i],
            _ => {}
        }
    }
    line
}

fn opcode_from_mnemonic(mnemonic: &str) -> Option<Opcode> {
    let opcode = match mnemonic {
        "MOV" => Opcode::Mov,
        "XCHG" => Opcode::Xchg,
        "ADD" => Opcode::Add,
        "SUB" => Opcode::Sub,
        "AND" => Opcode::And,
        "INC" => Opcode::Inc,
        "DEC" => Opcode::Dec,
        "OR" => Opcode::Or,
        "XOR" => Opcode::Xor,
        "NOT" => Opcode::Not,
        "ROL" => Opcode::Rol,
        "ROR" => Opcode::Ror,
        "SHL" => Opcode::Shl,
        "SHR" => Opcode::Shr,
        "CMP" => Opcode::Cmp,
        "JMP" => Opcode::Jmp,
        "JZ" => Opcode::Jz,
        "JNZ" => Opcode::Jnz,
        "JC" => Opcode::Jc,
        "JNC" => Opcode::Jnc,
        "JS" => Opcode::Js,
        "JNS" => Opcode::Jns,
        "JO" => Opcode::Jo,
        "JNO" => Opcode::Jno,
        "JL" => Opcode::Jl,
        "JG" => Opcode::Jg,
        "JLE" => Opcode::Jle,
        "JGE" => Opcode::Jge,
        "CLC" => Opcode::Clc,
        "STC" => Opcode::Stc,
        "CMC" => Opcode::Cmc,
        "PUSH" => Opcode::Push,
        "POP" => Opcode::Pop,
        "IN" => Opcode::In,
        "OUT" => Opcode::Out,
        "INSTR" => Opcode::InStr,
        "INHEX" => Opcode::InHex,
        "NOP" => Opcode::Nop,
        "HALT" | "HLT" => Opcode::Halt,
        _ => return None,
    };
    Some(opcode)
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("{mnemonic} on line {line} takes {expected} operand(s), got {got}")]
    OperandCount {
        line: usize,
        mnemonic: String,
        expected: usize,
        got: usize,
    },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("duplicate label on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            ; Store and add two literals
            MOV 0x10, 0x03
            MOV 0x11, 0x04
            ADD 0x10, 0x11
            HALT
        "#;

        let result = assemble(source).unwrap();
        let raw: Vec<u16> = result.iter().map(|w| w.get()).collect();
        assert_eq!(
            raw,
            vec![0x010, 0x010, 0x003, 0x010, 0x011, 0x004, 0x030, 0x010, 0x011, 0x290]
        );
    }

    #[test]
    fn test_assemble_modes() {
        let result = assemble("MOV @0x40, @@@0x50").unwrap();
        assert_eq!(result[0].get(), (0x01 << 4) | (1 << 2) | 3);
        assert_eq!(result[1].get(), 0x40);
        assert_eq!(result[2].get(), 0x50);
    }

    #[test]
    fn test_assemble_labels() {
        let source = r#"
        START:
            JMP END
            NOP
        END:
            HALT
        "#;

        let result = assemble(source).unwrap();
        // JMP(0) operand(1) NOP(2) HALT(3)
        assert_eq!(result[1].get(), 3);
    }

    #[test]
    fn test_assemble_backward_label() {
        let source = r#"
        LOOP:
            DEC 0x10
            JNZ LOOP
            HALT
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result[3].get(), 0);
    }

    #[test]
    fn test_assemble_org_and_dat() {
        let source = r#"
            HALT
            ORG 0x10
            DAT 0x1FF
            DAT -1
            DAT 'A'
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result.len(), 0x13);
        assert_eq!(result[0].get(), 0x290);
        assert_eq!(result[0x0F].get(), 0);
        assert_eq!(result[0x10].get(), 0x1FF);
        assert_eq!(result[0x11].get(), 0x1FFF);
        assert_eq!(result[0x12].get(), 0x41);
    }

    #[test]
    fn test_assemble_char_literals() {
        let result = assemble("OUT 'A'\nOUT '\\n'").unwrap();
        assert_eq!(result[1].get(), 0x41);
        assert_eq!(result[3].get(), 0x0A);
    }

    #[test]
    fn test_operand_count_mismatch() {
        assert!(matches!(
            assemble("MOV 0x10"),
            Err(AssemblerError::OperandCount { expected: 2, got: 1, .. })
        ));
        assert!(matches!(
            assemble("HALT 0x10"),
            Err(AssemblerError::OperandCount { expected: 0, got: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_mnemonic() {
        assert!(matches!(
            assemble("FROB 0x10"),
            Err(AssemblerError::UnknownMnemonic { .. })
        ));
    }

    #[test]
    fn test_undefined_label() {
        assert!(matches!(
            assemble("JMP NOWHERE"),
            Err(AssemblerError::UndefinedLabel { .. })
        ));
    }

    #[test]
    fn test_duplicate_label() {
        assert!(matches!(
            assemble("A:\nNOP\nA:\nHALT"),
            Err(AssemblerError::DuplicateLabel { .. })
        ));
    }

    #[test]
    fn test_value_out_of_range() {
        assert!(matches!(
            assemble("DAT 8192"),
            Err(AssemblerError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            assemble("DAT -4097"),
            Err(AssemblerError::ValueOutOfRange { .. })
        ));
    }
}
