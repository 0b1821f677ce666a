//! Text assembler and disassembler.
//!
//! One instruction per line. `;` starts a comment anywhere, `#` only at the
//! start of a line (elsewhere it marks an immediate). Operands are separated
//! by whitespace or commas; mnemonics are case-insensitive; numbers are
//! decimal or `0x` hex.
//!
//! ```text
//! STORE #0x7765, 0x080   ; immediate payload -> dest
//! STORE 0x080, 0x081     ; copy src -> dest
//! LOADWEI 0x080          ; LOAD / LOADIN load inputs
//! RUN 0x100, CQR         ; flags default to CQR, "-" disables all
//! FETCHBOT 0x100         ; FETCH alone selects the top half
//! FETCHTOP 0x100
//! HALT
//! ```
//!
//! Addresses are validated rather than masked, so an out-of-range operand
//! is a line-numbered error.

use crate::error::{IsaError, Result};
use crate::instruction::{
    bytes_to_words, decode_all, encode_fetch, encode_halt, encode_load, encode_nop, encode_run,
    encode_store_copy, encode_store_word, Instruction, RunFlags,
};
use crate::program::Program;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Extension of the hex listing written next to the binary.
pub const MEM_EXTENSION: &str = "mem";
/// Extension of the raw little-endian binary.
pub const BIN_EXTENSION: &str = "bin";

/// Assemble source text into instructions.
///
/// # Errors
///
/// Returns the first failing line as [`IsaError::Syntax`] or a range error.
pub fn assemble(source: &str) -> Result<Vec<Instruction>> {
    let mut out = Vec::new();
    for (index, line) in source.lines().enumerate() {
        if let Some(instr) = assemble_line(line, index + 1)? {
            out.push(instr);
        }
    }
    tracing::debug!("Assembled {} instructions", out.len());
    Ok(out)
}

/// Assemble one line; blank and comment-only lines yield `None`.
///
/// # Errors
///
/// Returns [`IsaError::Syntax`] carrying `line_num`.
pub fn assemble_line(line: &str, line_num: usize) -> Result<Option<Instruction>> {
    let code = line.split(';').next().unwrap_or_default().trim();
    if code.is_empty() || code.starts_with('#') {
        return Ok(None);
    }

    let mut tokens = code
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty());
    let Some(mnemonic) = tokens.next() else {
        return Ok(None);
    };
    let operands: Vec<&str> = tokens.collect();
    let mnemonic = mnemonic.to_ascii_uppercase();

    let at_line = |e: IsaError| match e {
        IsaError::Syntax { .. } => e,
        other => IsaError::syntax(line_num, other.to_string()),
    };

    let instr = match mnemonic.as_str() {
        "NOP" => {
            expect_operands(&operands, 0, line_num)?;
            encode_nop()
        }
        "HALT" => {
            expect_operands(&operands, 0, line_num)?;
            encode_halt()
        }
        "FETCH" | "FETCHTOP" | "FETCHBOT" => {
            expect_operands(&operands, 1, line_num)?;
            let addr = parse_number(operands[0], line_num)?;
            encode_fetch(addr, mnemonic != "FETCHBOT").map_err(at_line)?
        }
        "LOAD" | "LOADIN" | "LOADWEI" => {
            expect_operands(&operands, 1, line_num)?;
            let addr = parse_number(operands[0], line_num)?;
            encode_load(addr, mnemonic == "LOADWEI").map_err(at_line)?
        }
        "RUN" => {
            let mut addr = 0;
            let mut flags = RunFlags::ALL;
            if operands.len() > 2 {
                return Err(IsaError::syntax(line_num, "RUN takes at most an address and a flag set"));
            }
            for op in &operands {
                if op.starts_with(|c: char| c.is_ascii_digit()) {
                    addr = parse_number(op, line_num)?;
                } else {
                    flags = parse_flags(op, line_num)?;
                }
            }
            encode_run(addr, flags.compute, flags.quantize, flags.relu).map_err(at_line)?
        }
        "STORE" => {
            expect_operands(&operands, 2, line_num)?;
            let dest = parse_number(operands[1], line_num)?;
            if let Some(imm) = operands[0].strip_prefix('#') {
                let payload = u16::try_from(parse_number(imm, line_num)?).map_err(|_| {
                    IsaError::syntax(line_num, format!("immediate {imm} does not fit in 16 bits"))
                })?;
                encode_store_word(dest, payload).map_err(at_line)?
            } else {
                let src = parse_number(operands[0], line_num)?;
                encode_store_copy(dest, src).map_err(at_line)?
            }
        }
        other => {
            return Err(IsaError::syntax(line_num, format!("unknown instruction '{other}'")));
        }
    };
    Ok(Some(instr))
}

fn expect_operands(operands: &[&str], count: usize, line_num: usize) -> Result<()> {
    if operands.len() == count {
        Ok(())
    } else {
        Err(IsaError::syntax(
            line_num,
            format!("expected {count} operand(s), found {}", operands.len()),
        ))
    }
}

fn parse_number(token: &str, line_num: usize) -> Result<i32> {
    let (digits, negative) = match token.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (token, false),
    };
    let parsed = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i32::from_str_radix(hex, 16),
        None => digits.parse::<i32>(),
    };
    parsed
        .map(|v| if negative { -v } else { v })
        .map_err(|_| IsaError::syntax(line_num, format!("invalid number '{token}'")))
}

fn parse_flags(token: &str, line_num: usize) -> Result<RunFlags> {
    if token == "-" {
        return Ok(RunFlags::NONE);
    }
    let mut flags = RunFlags::NONE;
    for c in token.chars() {
        match c.to_ascii_uppercase() {
            'C' => flags.compute = true,
            'Q' => flags.quantize = true,
            'R' => flags.relu = true,
            _ => {
                return Err(IsaError::syntax(
                    line_num,
                    format!("invalid RUN flag '{c}' in '{token}' (expected C, Q, R)"),
                ));
            }
        }
    }
    Ok(flags)
}

/// Hex listing: one `%04X` word per line.
#[must_use]
pub fn to_mem(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for instr in instructions {
        for word in instr.encode().words() {
            let _ = writeln!(out, "{word:04X}");
        }
    }
    out
}

/// Render instructions back to assembler text, one per line.
#[must_use]
pub fn disassemble(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for instr in instructions {
        let _ = writeln!(out, "{instr}");
    }
    out
}

/// Decode a raw little-endian binary.
///
/// # Errors
///
/// Fails on an odd byte count, unknown opcode or truncated STORE.
pub fn disassemble_bytes(bytes: &[u8]) -> Result<Vec<Instruction>> {
    decode_all(&bytes_to_words(bytes)?)
}

/// Files produced by [`assemble_file`].
#[derive(Debug, Clone)]
pub struct AssemblyOutput {
    /// Hex listing path
    pub mem_path: PathBuf,
    /// Binary path
    pub bin_path: PathBuf,
    /// Words written
    pub word_count: usize,
}

/// Assemble `input` and write `<base>.mem` and `<base>.bin`.
///
/// `base` defaults to `input` without its extension.
///
/// # Errors
///
/// Returns [`std::io::Error`] wrapped in [`AsmFileError`] for file failures
/// and the assembler error for bad source.
pub fn assemble_file(input: &Path, base: Option<&Path>) -> std::result::Result<AssemblyOutput, AsmFileError> {
    let source = std::fs::read_to_string(input)?;
    let instructions = assemble(&source)?;
    let program = Program::from_instructions(&instructions);

    let base = base.map_or_else(|| input.with_extension(""), Path::to_path_buf);
    let mem_path = base.with_extension(MEM_EXTENSION);
    let bin_path = base.with_extension(BIN_EXTENSION);

    std::fs::write(&mem_path, to_mem(&instructions))?;
    std::fs::write(&bin_path, program.as_bytes())?;

    let word_count = program.len() / 2;
    tracing::info!(
        "Assembled {} words to {} and {}",
        word_count,
        mem_path.display(),
        bin_path.display()
    );
    Ok(AssemblyOutput {
        mem_path,
        bin_path,
        word_count,
    })
}

/// Failure while assembling a file.
#[derive(Debug, thiserror::Error)]
pub enum AsmFileError {
    /// Source or output file error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
    /// Source text error
    #[error(transparent)]
    Asm(#[from] IsaError),
}
