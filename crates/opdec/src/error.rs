//! Decode error types.

use thiserror::Error;

/// Error type for instruction decoding.
///
/// All errors are non-fatal to the caller: a failed decode simply means the
/// buffer position does not begin a valid instruction in the requested
/// mode. The instruction record is never produced on error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended mid-instruction.
    #[error("input exhausted mid-instruction")]
    ShortBuffer,

    /// No valid encoding, or an architecturally illegal prefix combination.
    #[error("invalid instruction encoding")]
    Invalid,

    /// The instruction would be longer than 15 bytes.
    #[error("instruction exceeds 15 bytes")]
    TooLong,

    /// The mode argument was neither 32 nor 64.
    #[error("unsupported decode mode")]
    BadMode,
}
