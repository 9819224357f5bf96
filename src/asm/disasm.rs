//! Disassembler for VM programs.
//!
//! Walks a word stream, decoding instruction words and consuming their
//! operand words. Words that do not decode (or whose operands run past
//! the end of the stream) are shown as `DAT` lines, since programs
//! routinely mix code and data cells.

use crate::cpu::decode::{AddrMode, Instruction};
use crate::word::Word13;

/// One disassembled line: its cell address, text, and width in words.
#[derive(Debug, Clone)]
pub struct DisasmLine {
    pub addr: u16,
    pub text: String,
    pub len: usize,
}

/// Disassemble a word stream into structured lines.
pub fn disassemble_program(words: &[Word13]) -> Vec<DisasmLine> {
    let mut lines = Vec::new();
    let mut index = 0;

    while index < words.len() {
        let (text, len) = disassemble_at(words, index);
        lines.push(DisasmLine {
            addr: index as u16,
            text,
            len,
        });
        index += len;
    }

    lines
}

/// Disassemble the instruction starting at `index`.
///
/// Returns the text and the number of words consumed (at least 1).
pub fn disassemble_at(words: &[Word13], index: usize) -> (String, usize) {
    let word = words[index];

    let Ok(instr) = Instruction::decode(word) else {
        return (format!("DAT 0x{:04X}", word.get()), 1);
    };

    let count = instr.opcode.operand_count();
    if index + 1 + count > words.len() {
        // Truncated instruction at the end of the stream.
        return (format!("DAT 0x{:04X}", word.get()), 1);
    }

    let operands = &words[index + 1..index + 1 + count];
    (format_instruction(instr, operands), 1 + count)
}

/// Disassemble a full program into a printable listing.
pub fn disassemble(words: &[Word13]) -> String {
    let mut output = String::new();

    for line in disassemble_program(words) {
        let raw: Vec<String> = (0..line.len)
            .map(|i| words[line.addr as usize + i].to_string())
            .collect();
        output.push_str(&format!(
            "{:04X}: {:<24} ; {}\n",
            line.addr,
            line.text,
            raw.join(" ")
        ));
    }

    output
}

fn format_instruction(instr: Instruction, operands: &[Word13]) -> String {
    let mnemonic = instr.opcode.mnemonic();
    match operands {
        [] => mnemonic.to_string(),
        [op1] => format!("{} {}", mnemonic, format_operand(*op1, instr.dst_mode)),
        _ => format!(
            "{} {}, {}",
            mnemonic,
            format_operand(operands[0], instr.dst_mode),
            format_operand(operands[1], instr.src_mode)
        ),
    }
}

fn format_operand(word: Word13, mode: AddrMode) -> String {
    format!("{}0x{:04X}", mode.prefix(), word.get())
}
