//! Source-level coverage instrumentation for JavaScript.
//!
//! Given a unit of source text, `burrow` produces semantically equivalent
//! text that, when executed, records which statements ran, which alternative
//! of each branching construct was taken, and how many times each function
//! was invoked. Counts land in a shared, file-keyed runtime record living
//! under a configurable global slot (see [`Options::trace_variable`]); the
//! host-side mirror of that record lives in the `burrow-runtime` crate.
//!
//! The pipeline is pure and synchronous: parse, index, rewrite. Each call is
//! independent and deterministic — instrumenting byte-identical input with
//! the same options yields byte-identical output and an identical
//! [`InstrumentationMap`]. The engine never executes code, never reads or
//! writes files, and never decides which units to process; those concerns
//! belong to the calling harness.
//!
//! ```
//! let result = burrow::instrument_sync(
//!     "var x = 1;",
//!     Some("lib/x.js"),
//!     &burrow::Options::default(),
//! )
//! .unwrap();
//! assert!(result.source.contains("__burrow__"));
//! assert_eq!(result.map.statement_count(), 1);
//! ```

mod error;
mod index;
mod options;
mod parse;
mod rewrite;

pub use error::{Error, Position};
pub use index::{BranchSite, InstrumentationMap, SourceSpan};
pub use options::{DEFAULT_TRACE_VARIABLE, Options};

use sha2::{Digest, Sha256};

/// Everything one instrumentation call produces. There is no partial
/// success: either the full text and map exist, or the call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentResult {
    /// The instrumented text: preamble, then the (optionally wrapped) unit.
    pub source: String,
    /// The record key — the caller's key byte-for-byte, or a generated
    /// placeholder when none was supplied.
    pub key: String,
    pub map: InstrumentationMap,
}

/// Instrument one unit of source text, synchronously.
///
/// `key` identifies the unit in the runtime record and is never normalized
/// or path-parsed; backslashes, drive letters, and case are preserved
/// verbatim. When absent, a deterministic `<anonymous:...>` placeholder is
/// derived from the source bytes.
///
/// Malformed syntax — including a mainline `return` when
/// [`Options::no_auto_wrap`] is set — comes back as [`Error::Parse`].
pub fn instrument_sync(
    source: &str,
    key: Option<&str>,
    options: &Options,
) -> Result<InstrumentResult, Error> {
    options.validate()?;
    let key = resolve_key(source, key);

    let text = parse::neutralize_shebang(source);
    let parsed = parse::parse_unit(&text, !options.no_auto_wrap)?;
    let map = index::index(&parsed.script, &text, parsed.base, options.walk_debug);
    let generated = rewrite::generate(parsed, &map, &key, source, options)?;

    if options.debug {
        tracing::debug!(
            key = %key,
            statements = map.statement_count(),
            branches = map.branch_count(),
            functions = map.function_count(),
            generated = %generated,
            "instrumented unit"
        );
    }

    Ok(InstrumentResult {
        source: generated,
        key,
        map,
    })
}

/// Asynchronous variant of [`instrument_sync`] with identical semantics.
///
/// Instrumentation itself has no suspension points; this entry exists so
/// batch callers can interleave instrumentation with I/O without blocking a
/// single-threaded host. Ordering between separate calls is not guaranteed
/// and does not matter — every call is independent.
pub async fn instrument(
    source: &str,
    key: Option<&str>,
    options: &Options,
) -> Result<InstrumentResult, Error> {
    instrument_sync(source, key, options)
}

/// Instrument a unit handed over as raw bytes.
///
/// # Panics
///
/// Panics immediately, before any parsing, when `bytes` is not text. Feeding
/// non-text input is a precondition violation — a programmer error, not bad
/// input data — and is never recoverable by retrying with the same input.
pub fn instrument_bytes(
    bytes: &[u8],
    key: Option<&str>,
    options: &Options,
) -> Result<InstrumentResult, Error> {
    let source =
        std::str::from_utf8(bytes).expect("instrument_bytes requires text input (valid UTF-8)");
    instrument_sync(source, key, options)
}

/// The caller's key verbatim, or a content-derived placeholder. Hashing the
/// source keeps repeated calls deterministic while distinct anonymous units
/// get distinct record slots.
fn resolve_key(source: &str, key: Option<&str>) -> String {
    match key {
        Some(k) => k.to_string(),
        None => {
            let digest = Sha256::digest(source.as_bytes());
            let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
            format!("<anonymous:{hex}>")
        }
    }
}
