//! Error surface for the rare conditions this crate can name precisely.
//!
//! The large majority of invariant violations here
//! (mode mismatches, cross-thread use, rewinding past a live node) are
//! programmer errors and panic rather than returning a `Result` — there is
//! nothing a caller can recover from mid-sweep. `TapeError` covers only the
//! handful of spots where returning a typed error is strictly better than a
//! panic: the debug-mode tape-presence check, and an out-of-range
//! multi-output index, which is genuinely just a bounds check against
//! configuration the caller controls.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TapeError {
    #[error("Number's node is not on the current thread's tape")]
    NotOnTape,
    #[error("output index {index} out of range for num_outputs={num_outputs}")]
    OutputIndexOutOfRange { index: usize, num_outputs: usize },
}

pub type Result<T> = std::result::Result<T, TapeError>;
