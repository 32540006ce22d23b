//! Host-side coverage record.
//!
//! Instrumented JavaScript maintains, inside the executing process, a
//! file-keyed structure of hit counts under a global trace variable. This
//! crate is the host's mirror of that structure: an explicit, injectable
//! registry the embedding process owns, with the same creation-on-first-use
//! and monotonic-growth behavior the generated preamble and probes have.
//! There is no implicit singleton — construct one [`RuntimeRecord`] per
//! process (or per test) and pass it where it is needed.
//!
//! The serde representation matches the wire shape the generated code
//! builds (`s` / `b` / `f` maps, optional `code` line array), so a record
//! dumped from the JavaScript side deserializes directly into these types.

mod record;

pub use record::{FileCoverage, RuntimeRecord};
