//! Error taxonomy: I/O failures, compile errors, and runtime errors.
//!
//! The library never prints; errors carry everything a caller needs to
//! render diagnostics. The CLI driver formats them on stderr and maps each
//! variant to its conventional exit code.

use std::fmt;

use thiserror::Error;

/// All diagnostics collected during one compilation, already formatted as
/// `[line N] Error at '<lexeme>': <message>` lines. Panic-mode recovery
/// suppresses cascades, so each entry points at a distinct problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileErrors(pub Vec<String>);

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("\n"))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// The source failed to compile; execution never started.
    #[error("{0}")]
    Compile(CompileErrors),

    /// Execution aborted. `trace` holds one line per active frame, innermost
    /// first, in the form `[line N] in <name>()` or `[line N] in script`.
    #[error("{message}\n{}", .trace.join("\n"))]
    Runtime {
        message: String,
        trace: Vec<String>,
    },

    /// The driver could not read a source file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Conventional sysexits code for the CLI driver.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Compile(_) => 65,
            Error::Runtime { .. } => 70,
            Error::Io(_) => 74,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
