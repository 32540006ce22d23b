//! The instrumentation map and the host-side runtime record fit together:
//! seeding a fresh record the way the generated preamble does, then driving
//! the counts an execution would produce, yields the documented wire shape.
//! Each case builds its own record — there is no shared global.

use burrow::{InstrumentResult, Options, instrument_sync};
use burrow_runtime::RuntimeRecord;

/// Mirror of the generated preamble: create the entry, zero-seed every
/// branch, embed the source lines when asked.
fn seed(record: &mut RuntimeRecord, result: &InstrumentResult, source: Option<&str>) {
    let entry = record.entry(&result.key);
    for (id, site) in &result.map.branches {
        entry.seed_branch(*id, site.alternatives.len());
    }
    if let Some(text) = source {
        entry.embed_code(text.split('\n'));
    }
}

#[test]
fn while_fixture_counts_accumulate_under_stable_ids() {
    let source = "var x = args[0], i = 0; while (i < x) i++; output = i;";
    let result = instrument_sync(source, Some("loop.js"), &Options::default()).unwrap();

    let mut record = RuntimeRecord::new();
    seed(&mut record, &result, None);

    // Input 10: the two mainline statements run once, the loop body ten
    // times, the trailing assignment once.
    let entry = record.entry("loop.js");
    entry.hit_statement(1);
    entry.hit_statement(2);
    for _ in 0..10 {
        entry.hit_statement(3);
    }
    entry.hit_statement(4);

    let entry = record.get("loop.js").unwrap();
    assert_eq!(
        (1..=4).map(|id| entry.statement_hits(id)).collect::<Vec<_>>(),
        vec![1, 1, 10, 1]
    );
}

#[test]
fn ternary_fixture_records_the_taken_alternative() {
    let source = r#"var x = args[0] > 5 ? args[0] : "undef"; output = x;"#;
    let result = instrument_sync(source, Some("cond.js"), &Options::default()).unwrap();

    // Input 10 takes the consequent...
    let mut record = RuntimeRecord::new();
    seed(&mut record, &result, None);
    record.entry("cond.js").hit_branch(1, 0);
    assert_eq!(record.get("cond.js").unwrap().branch_hits(1), Some(&[1, 0][..]));

    // ...input 1 the alternate — in a fresh record, as a fresh process would.
    let mut record = RuntimeRecord::new();
    seed(&mut record, &result, None);
    record.entry("cond.js").hit_branch(1, 1);
    assert_eq!(record.get("cond.js").unwrap().branch_hits(1), Some(&[0, 1][..]));
}

#[test]
fn embedded_code_lines_match_the_original_source() {
    let source = "#!/usr/bin/env node\nvar a = 1;\nvar b = a * 2;\n";
    let opts = Options {
        embed_source: true,
        ..Options::default()
    };
    let result = instrument_sync(source, Some("embed.js"), &opts).unwrap();

    let mut record = RuntimeRecord::new();
    seed(&mut record, &result, Some(source));

    let code = record.get("embed.js").unwrap().code().unwrap();
    // Line order and content are untouched — including the shebang, which
    // only the parsed copy neutralizes.
    assert_eq!(code[0], "#!/usr/bin/env node");
    assert_eq!(code[1], "var a = 1;");
    assert_eq!(code[2], "var b = a * 2;");
}

#[test]
fn record_keys_match_instrumentation_keys_byte_for_byte() {
    let key = r"c:\a\b\c\d\e.js";
    let result = instrument_sync("var x = 1;", Some(key), &Options::default()).unwrap();

    let mut record = RuntimeRecord::new();
    seed(&mut record, &result, None);

    assert_eq!(record.keys().collect::<Vec<_>>(), vec![key]);
}

#[test]
fn seeded_record_serializes_to_the_wire_shape() {
    let source = "if (x) { a(); } else { b(); }";
    let result = instrument_sync(source, Some("wire.js"), &Options::default()).unwrap();

    let mut record = RuntimeRecord::new();
    seed(&mut record, &result, None);
    let entry = record.entry("wire.js");
    entry.hit_statement(1);
    entry.hit_statement(2);
    entry.hit_branch(1, 0);
    entry.hit_function(1);

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["wire.js"]["s"]["1"], 1);
    assert_eq!(json["wire.js"]["b"]["1"][0], 1);
    assert_eq!(json["wire.js"]["b"]["1"][1], 0);
}
