//! # opdec
//!
//! A table-driven decoder for the x86-32 and x86-64 instruction sets.
//!
//! Given a byte buffer, [`decode`] identifies a single machine instruction
//! and produces a fixed-size [`Instruction`] record: mnemonic, operand
//! list, prefixes, sizes and length. It is not a disassembler; the
//! [`format`] helper renders a record as debugging text, with no claim of
//! assembler-round-trip validity.
//!
//! The dispatch tables are generated at build time by `opdec-gen` from
//! `data/instrs.txt` and linked in as read-only data. Decoding is a pure
//! function over the input buffer and those tables: it never allocates,
//! never blocks, and is safe to call from any number of threads.
//!
//! ```
//! use opdec::{decode, Mnemonic};
//!
//! // mov rax, rbx
//! let instr = decode(&[0x48, 0x89, 0xD8], 64, 0x1000).unwrap();
//! assert_eq!(instr.mnemonic(), Mnemonic::Mov);
//! assert_eq!(instr.length(), 3);
//! assert_eq!(instr.operand_size(), 8);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

pub mod error;
pub mod format;
pub mod instruction;

mod decoder;
mod modrm;
mod prefix;
mod table;

pub use decoder::decode;
pub use error::DecodeError;
pub use format::format;
pub use instruction::{Instruction, MemRef, Operand, PrefixFlags, Reg, RegKind, Segment};
pub use table::{Mnemonic, TABLE_VERSION};

/// An x86 instruction never exceeds 15 bytes.
pub const MAX_INSTR_LEN: usize = 15;
