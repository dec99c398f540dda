//! Generator error types.
//!
//! Every inconsistency in the instruction description file is fatal: the
//! generator emits a pinpoint diagnostic and produces no output.

use thiserror::Error;

/// Error type for table generation.
#[derive(Error, Debug)]
pub enum GenError {
    /// A line could not be parsed.
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },

    /// Two records resolve to the same encoding path.
    #[error("line {line}: encoding {path} is already mapped by an earlier record")]
    Duplicate { line: usize, path: String },

    /// Two records disagree about which discriminator a node dispatches on.
    #[error("line {line}: dispatch kind conflict at {path}")]
    KindConflict { line: usize, path: String },

    /// The packed table outgrew the child-reference range.
    #[error("dispatch table overflow: {words} words exceed the {max}-word reference range")]
    Overflow { words: usize, max: usize },

    /// The description file contains no records.
    #[error("instruction description file contains no records")]
    Empty,
}

impl GenError {
    /// Creates a new Parse error.
    pub fn parse(line: usize, msg: impl Into<String>) -> Self {
        Self::Parse {
            line,
            msg: msg.into(),
        }
    }
}
