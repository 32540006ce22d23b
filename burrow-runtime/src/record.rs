use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// File-keyed registry of coverage counts for one process.
///
/// Keys are used byte-for-byte as supplied — a Windows-style path is stored
/// and looked up exactly as given, with no separator or case normalization.
/// Entries are created lazily and only ever grow; nothing here resets counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeRecord {
    files: BTreeMap<String, FileCoverage>,
}

impl RuntimeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// The coverage entry for `key`, created empty on first use. Re-entering
    /// an existing key returns the live entry with its counts intact.
    pub fn entry(&mut self, key: &str) -> &mut FileCoverage {
        self.files.entry(key.to_string()).or_default()
    }

    pub fn get(&self, key: &str) -> Option<&FileCoverage> {
        self.files.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Hit counts for one file: statement, branch-alternative, and function
/// invocation tallies, plus (optionally) the original source lines for
/// annotated display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    #[serde(rename = "s")]
    statements: BTreeMap<u32, u64>,
    #[serde(rename = "b")]
    branches: BTreeMap<u32, Vec<u64>>,
    #[serde(rename = "f")]
    functions: BTreeMap<u32, u64>,
    #[serde(rename = "code", skip_serializing_if = "Option::is_none", default)]
    code: Option<Vec<String>>,
}

impl FileCoverage {
    /// Pre-seed a branch with a zero array sized to its alternative count,
    /// as the generated preamble does. Idempotent: a branch that already has
    /// counts is left alone.
    pub fn seed_branch(&mut self, id: u32, alternatives: usize) {
        self.branches.entry(id).or_insert_with(|| vec![0; alternatives]);
    }

    /// Store the original source lines. Set-if-absent, so re-running the
    /// initialization never clobbers an earlier copy.
    pub fn embed_code<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.code.is_none() {
            self.code = Some(lines.into_iter().map(Into::into).collect());
        }
    }

    pub fn hit_statement(&mut self, id: u32) {
        *self.statements.entry(id).or_insert(0) += 1;
    }

    /// Record that alternative `alternative` of branch `id` was taken. An
    /// unseeded or undersized slot array grows to fit, so counts are never
    /// silently dropped.
    pub fn hit_branch(&mut self, id: u32, alternative: usize) {
        let slots = self.branches.entry(id).or_default();
        if slots.len() <= alternative {
            slots.resize(alternative + 1, 0);
        }
        slots[alternative] += 1;
    }

    pub fn hit_function(&mut self, id: u32) {
        *self.functions.entry(id).or_insert(0) += 1;
    }

    pub fn statement_hits(&self, id: u32) -> u64 {
        self.statements.get(&id).copied().unwrap_or(0)
    }

    pub fn branch_hits(&self, id: u32) -> Option<&[u64]> {
        self.branches.get(&id).map(Vec::as_slice)
    }

    pub fn function_hits(&self, id: u32) -> u64 {
        self.functions.get(&id).copied().unwrap_or(0)
    }

    pub fn code(&self) -> Option<&[String]> {
        self.code.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_is_created_lazily_and_reused() {
        let mut record = RuntimeRecord::new();
        assert!(record.is_empty());

        record.entry("a.js").hit_statement(1);
        record.entry("a.js").hit_statement(1);
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("a.js").unwrap().statement_hits(1), 2);
    }

    #[test]
    fn reinitialization_does_not_reset_counts() {
        let mut record = RuntimeRecord::new();
        record.entry("a.js").hit_statement(3);
        record.entry("a.js").seed_branch(1, 2);
        record.entry("a.js").hit_branch(1, 0);

        // A second pass over the same preamble logic must be a no-op.
        record.entry("a.js").seed_branch(1, 2);
        let entry = record.get("a.js").unwrap();
        assert_eq!(entry.statement_hits(3), 1);
        assert_eq!(entry.branch_hits(1), Some(&[1, 0][..]));
    }

    #[test]
    fn windows_style_keys_are_preserved_verbatim() {
        let mut record = RuntimeRecord::new();
        let key = r"c:\a\b\c\d\e.js";
        record.entry(key).hit_function(1);

        assert_eq!(record.keys().collect::<Vec<_>>(), vec![key]);
        assert!(record.get(key).is_some());
        assert!(record.get("c:/a/b/c/d/e.js").is_none(), "no normalization");
    }

    #[test]
    fn branch_alternatives_count_independently() {
        let mut record = RuntimeRecord::new();
        let entry = record.entry("a.js");
        entry.seed_branch(1, 2);
        entry.hit_branch(1, 0);
        entry.hit_branch(1, 0);
        entry.hit_branch(1, 1);
        assert_eq!(entry.branch_hits(1), Some(&[2, 1][..]));
    }

    #[test]
    fn unseeded_branch_hits_grow_the_slot_array() {
        let mut record = RuntimeRecord::new();
        let entry = record.entry("a.js");
        entry.hit_branch(4, 2);
        assert_eq!(entry.branch_hits(4), Some(&[0, 0, 1][..]));
    }

    #[test]
    fn embed_code_keeps_the_first_copy() {
        let mut record = RuntimeRecord::new();
        let entry = record.entry("a.js");
        entry.embed_code(["var a = 1;", "var b = 2;"]);
        entry.embed_code(["overwritten?"]);
        let code = entry.code().unwrap();
        assert_eq!(code[1], "var b = 2;");
        assert_eq!(code.len(), 2);
    }

    #[test]
    fn wire_shape_uses_short_field_names() {
        let mut record = RuntimeRecord::new();
        let entry = record.entry("a.js");
        entry.hit_statement(1);
        entry.seed_branch(1, 2);
        entry.hit_branch(1, 1);
        entry.hit_function(1);

        let json = serde_json::to_value(&record).unwrap();
        let file = &json["a.js"];
        assert_eq!(file["s"]["1"], 1);
        assert_eq!(file["b"]["1"][0], 0);
        assert_eq!(file["b"]["1"][1], 1);
        assert_eq!(file["f"]["1"], 1);
        assert!(
            file.get("code").is_none(),
            "code must be omitted when absent. Got: {json}"
        );
    }

    #[test]
    fn wire_shape_round_trips() {
        let mut record = RuntimeRecord::new();
        let entry = record.entry("lib/x.js");
        entry.hit_statement(1);
        entry.seed_branch(1, 3);
        entry.hit_branch(1, 2);
        entry.hit_function(2);
        entry.embed_code(["line one", "line two"]);

        let json = serde_json::to_string(&record).unwrap();
        let back: RuntimeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn dumped_javascript_record_deserializes() {
        // The shape the generated preamble + probes build in the JS process.
        let json = r#"{
            "t.js": { "s": { "1": 1, "2": 10 }, "b": { "1": [1, 0] }, "f": {},
                      "code": ["var x;", "x = 1;"] }
        }"#;
        let record: RuntimeRecord = serde_json::from_str(json).unwrap();
        let entry = record.get("t.js").unwrap();
        assert_eq!(entry.statement_hits(2), 10);
        assert_eq!(entry.branch_hits(1), Some(&[1, 0][..]));
        assert_eq!(entry.code().unwrap()[1], "x = 1;");
    }
}
