//! Parser adapter over swc.
//!
//! Turns source text into a `Script` AST, converting syntax failures into
//! structured [`Error::Parse`] values so batch callers can report-and-skip.
//! Also neutralizes shebang lines (preserving byte offsets and line count)
//! and parses engine-generated snippets for the rewriter.

use std::borrow::Cow;

use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, SourceMap, Spanned};
use swc_core::ecma::ast::{EsVersion, Script, Stmt};
use swc_core::ecma::parser::error::Error as SwcError;
use swc_core::ecma::parser::lexer::Lexer;
use swc_core::ecma::parser::{EsSyntax, Parser, StringInput, Syntax};

use crate::error::{Error, Position};

/// A parsed unit plus the bookkeeping the indexer and rewriter need.
pub(crate) struct Parsed {
    pub cm: Lrc<SourceMap>,
    pub script: Script,
    /// Offset of the unit's first byte within `cm`. Subtracting it turns swc
    /// spans into offsets into the input text.
    pub base: u32,
}

impl std::fmt::Debug for Parsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parsed")
            .field("script", &self.script)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

/// Replace a leading `#!` interpreter directive with `//`, turning the line
/// into a comment of identical byte length. Offsets of every later token and
/// the total line count are unchanged, so ids and any line-aligned display
/// are unaffected by shebang presence.
pub(crate) fn neutralize_shebang(source: &str) -> Cow<'_, str> {
    if let Some(rest) = source.strip_prefix("#!") {
        Cow::Owned(format!("//{rest}"))
    } else {
        Cow::Borrowed(source)
    }
}

/// Parse one unit of source text.
///
/// `allow_top_level_return` tracks the wrapping policy: a unit that will be
/// wrapped in an invocable scope may legally contain a mainline `return`;
/// an unwrapped unit may not, and the violation surfaces here as an ordinary
/// parse failure.
pub(crate) fn parse_unit(source: &str, allow_top_level_return: bool) -> Result<Parsed, Error> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(FileName::Anon.into(), source.to_string());
    let base = fm.start_pos.0;

    let mut syntax = EsSyntax::default();
    syntax.allow_return_outside_function = allow_top_level_return;

    let lexer = Lexer::new(
        Syntax::Es(syntax),
        EsVersion::Es2022,
        StringInput::from(&*fm),
        None,
    );
    let mut parser = Parser::new_from(lexer);

    let script = parser
        .parse_script()
        .map_err(|e| to_parse_error(e, base, source))?;

    // swc recovers from some malformed constructs and reports them here
    // instead of failing the parse. No partial success: any recorded error
    // fails the whole unit.
    if let Some(first) = parser.take_errors().into_iter().next() {
        return Err(to_parse_error(first, base, source));
    }

    Ok(Parsed { cm, script, base })
}

/// Parse an engine-generated fragment (preamble, wrapper) in the unit's
/// source map. Splicing parsed statements instead of concatenating strings
/// keeps the generated code structural end to end.
pub(crate) fn parse_snippet(cm: &Lrc<SourceMap>, snippet: String) -> Result<Vec<Stmt>, Error> {
    let fm = cm.new_source_file(FileName::Anon.into(), snippet);
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax::default()),
        EsVersion::Es2022,
        StringInput::from(&*fm),
        None,
    );
    let mut parser = Parser::new_from(lexer);
    let script = parser
        .parse_script()
        .map_err(|e| Error::Codegen(format!("generated snippet failed to parse: {:?}", e.kind())))?;
    if let Some(first) = parser.take_errors().into_iter().next() {
        return Err(Error::Codegen(format!(
            "generated snippet failed to parse: {:?}",
            first.kind()
        )));
    }
    Ok(script.body)
}

fn to_parse_error(e: SwcError, base: u32, source: &str) -> Error {
    let message = e.kind().msg().to_string();
    let span = e.span();
    let position = if span.lo.0 == 0 {
        None
    } else {
        Some(position_at(source, span.lo.0.saturating_sub(base) as usize))
    };
    Error::Parse { message, position }
}

/// 1-based line/column for a byte offset, computed against the input text.
fn position_at(source: &str, offset: usize) -> Position {
    let clamped = offset.min(source.len());
    let mut line = 1u32;
    let mut line_start = 0usize;
    for (i, b) in source.as_bytes()[..clamped].iter().enumerate() {
        if *b == b'\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    Position {
        line,
        column: (clamped - line_start) as u32 + 1,
    }
}
