//! Property-based tests for output analysis.
//!
//! Uses proptest to generate noisy CLI output and verify extractor invariants.

use proptest::prelude::*;
use serde_json::{json, Value};

use commander_detector::{
    extract_json_array, extract_json_object, extract_json_value, extract_response,
    LineAccumulator, MarkerClassifier, PromptClassifier,
};

/// Generate a noise line that cannot contain JSON delimiters.
fn noise_line() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 .:>_-]{0,40}"
}

/// Generate a few noise lines joined with newlines.
fn noise_block() -> impl Strategy<Value = String> {
    prop::collection::vec(noise_line(), 0..4).prop_map(|lines| lines.join("\n"))
}

/// Generate an arbitrary JSON value of bounded depth.
fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "\\PC{0,20}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z{}\\[\\]\"\\\\]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Generate a JSON object.
fn json_object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,8}", json_value(), 0..6)
        .prop_map(|m| Value::Object(m.into_iter().collect()))
}

/// Generate a JSON array.
fn json_array() -> impl Strategy<Value = Value> {
    prop::collection::vec(json_value(), 0..6).prop_map(Value::Array)
}

proptest! {
    /// The extractors never panic on arbitrary input.
    #[test]
    fn extractors_never_panic(input in "\\PC{0,200}") {
        let _ = extract_json_object(&input);
        let _ = extract_json_array(&input);
        let _ = extract_json_value(&input);
    }

    /// Extracted regions are always balanced slices of the input.
    #[test]
    fn extracted_region_is_delimited(input in "[{}\\[\\]\"a-z:, ]{0,80}") {
        if let Ok(region) = extract_json_object(&input) {
            prop_assert!(region.starts_with('{'), "region must start with an opening brace");
            prop_assert!(region.ends_with('}'), "region must end with a closing brace");
            prop_assert!(input.contains(region));
        }
        if let Ok(region) = extract_json_array(&input) {
            prop_assert!(region.starts_with('['));
            prop_assert!(region.ends_with(']'));
        }
    }

    /// A serialized object between noise lines is recovered exactly.
    #[test]
    fn object_recovered_from_noise(
        before in noise_block(),
        value in json_object(),
        after in noise_block(),
        pretty in any::<bool>(),
    ) {
        let serialized = if pretty {
            serde_json::to_string_pretty(&value).unwrap()
        } else {
            serde_json::to_string(&value).unwrap()
        };
        let raw = format!("{before}\n{serialized}\n{after}\nMy Vault> ");

        let region = extract_json_object(&raw).unwrap();
        prop_assert_eq!(region, serialized.as_str());
        let parsed: Value = serde_json::from_str(region).unwrap();
        prop_assert_eq!(parsed, value);
    }

    /// A serialized array between noise lines is recovered exactly.
    #[test]
    fn array_recovered_from_noise(
        before in noise_block(),
        value in json_array(),
        after in noise_block(),
    ) {
        let serialized = serde_json::to_string(&value).unwrap();
        let raw = format!("{before}\n{serialized}\n{after}");

        let region = extract_json_array(&raw).unwrap();
        prop_assert_eq!(region, serialized.as_str());
    }

    /// Chunk boundaries never change the lines the accumulator produces.
    #[test]
    fn accumulator_is_chunking_independent(
        lines in prop::collection::vec("[a-z ]{0,12}", 0..8),
        split in 1usize..7,
    ) {
        let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
        let bytes = text.as_bytes();

        let mut acc = LineAccumulator::new();
        let mut out = Vec::new();
        for chunk in bytes.chunks(split) {
            out.extend(acc.push(std::str::from_utf8(chunk).unwrap()));
        }

        prop_assert_eq!(out, lines);
        prop_assert_eq!(acc.pending(), "");
    }

    /// Extracted responses never contain a prompt line.
    #[test]
    fn response_has_no_prompt_lines(
        command in "[a-z]{1,10}",
        body in prop::collection::vec(noise_line(), 0..5),
    ) {
        let classifier = MarkerClassifier::default();
        let text = format!("{command}\n{}\nMy Vault> ", body.join("\n"));

        let response = classifier.extract_response(&text, &command);
        prop_assert!(response.lines().all(|l| !classifier.is_prompt_line(l)));
    }
}
