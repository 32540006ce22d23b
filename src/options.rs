use crate::error::Error;

/// Global slot the runtime record lives under when the caller does not pick
/// its own (collision-avoiding names are the caller's business).
pub const DEFAULT_TRACE_VARIABLE: &str = "__burrow__";

/// Instrumentation options.
///
/// All fields default to off; `Options::default()` matches the behavior a
/// bare `instrument(source)` call should have.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Name of the global slot holding the runtime record. Spliced verbatim
    /// into generated code, so it must be an identifier-like token; validated
    /// before instrumentation starts.
    pub trace_variable: Option<String>,

    /// Store the original source, one entry per line, in the record's `code`
    /// field so downstream tools can display annotated source without
    /// re-reading the file.
    pub embed_source: bool,

    /// Skip the invocable wrapper around the unit body. Leaves a mainline
    /// `return` illegal, surfacing it as a parse failure.
    pub no_auto_wrap: bool,

    /// Log the generated output.
    pub debug: bool,

    /// Log every id assignment during the index walk.
    pub walk_debug: bool,
}

impl Options {
    /// The trace variable to splice, after defaulting.
    pub fn trace_variable(&self) -> &str {
        self.trace_variable
            .as_deref()
            .unwrap_or(DEFAULT_TRACE_VARIABLE)
    }

    /// Reject trace variables that would not survive splicing into generated
    /// code as a bare identifier.
    pub fn validate(&self) -> Result<(), Error> {
        let name = self.trace_variable();
        if is_identifier(name) {
            Ok(())
        } else {
            Err(Error::InvalidTraceVariable(name.to_string()))
        }
    }
}

/// ASCII identifier check: `[A-Za-z_$][A-Za-z0-9_$]*`. Stricter than the host
/// grammar (which admits unicode identifiers), but every name a harness
/// generates fits, and rejecting the rest keeps splicing injection-proof.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
