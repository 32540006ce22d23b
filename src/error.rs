use std::fmt;

/// Line/column of a parse failure, 1-based, in the input text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed syntax in the input unit. A data error: callers processing a
    /// batch are expected to report the offending file and continue.
    #[error("parse error: {message}{}", position.map(|p| format!(" at {p}")).unwrap_or_default())]
    Parse {
        message: String,
        position: Option<Position>,
    },

    #[error("trace variable `{0}` is not a valid identifier")]
    InvalidTraceVariable(String),

    /// An engine-generated fragment failed to assemble. Indicates a bug in
    /// the rewriter templates, not bad input.
    #[error("code generation failed: {0}")]
    Codegen(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
