//! Balanced JSON region extraction.
//!
//! CLI output wraps JSON in banners, warnings and the trailing prompt. These
//! helpers isolate the first balanced object or array without parsing it.

use serde_json::Value;
use tracing::debug;

use commander_core::{Error, Result};

/// Extract the first balanced `{...}` region from `raw`.
///
/// # Example
/// ```
/// use commander_detector::extract_json_object;
///
/// let raw = "Syncing...\n{\"uid\": \"abc\", \"tags\": [\"x\"]}\nMy Vault> ";
/// assert_eq!(extract_json_object(raw).unwrap(), "{\"uid\": \"abc\", \"tags\": [\"x\"]}");
/// ```
pub fn extract_json_object(raw: &str) -> Result<&str> {
    extract_balanced(raw, b'{')
}

/// Extract the first balanced `[...]` region from `raw`.
pub fn extract_json_array(raw: &str) -> Result<&str> {
    extract_balanced(raw, b'[')
}

/// Extract whichever of an object or an array starts first.
pub fn extract_json_value(raw: &str) -> Result<&str> {
    match raw.find(|c: char| c == '{' || c == '[') {
        Some(pos) => extract_balanced(raw, raw.as_bytes()[pos]),
        None => Err(Error::ExtractionFailure(
            "no JSON object or array found in output".to_string(),
        )),
    }
}

/// Extract and parse the first JSON object.
pub fn parse_json_object(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(extract_json_object(raw)?)?;
    if !value.is_object() {
        return Err(Error::ExtractionFailure("extracted value is not an object".to_string()));
    }
    Ok(value)
}

/// Extract and parse the first JSON array.
pub fn parse_json_array(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(extract_json_array(raw)?)?;
    if !value.is_array() {
        return Err(Error::ExtractionFailure("extracted value is not an array".to_string()));
    }
    Ok(value)
}

fn extract_balanced(raw: &str, open: u8) -> Result<&str> {
    let kind = if open == b'{' { "object" } else { "array" };

    let start = raw
        .bytes()
        .position(|b| b == open)
        .ok_or_else(|| Error::ExtractionFailure(format!("no JSON {kind} found in output")))?;

    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    // Delimiters are ASCII, so byte offsets are always char boundaries.
    for (offset, byte) in raw.as_bytes()[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(*byte),
            b'}' | b']' => {
                let expected = if *byte == b'}' { b'{' } else { b'[' };
                if stack.pop() != Some(expected) {
                    debug!("Mismatched '{}' at offset {}", *byte as char, start + offset);
                    return Err(Error::ExtractionFailure(format!(
                        "mismatched '{}' at offset {} while extracting JSON {kind}",
                        *byte as char,
                        start + offset
                    )));
                }
                if stack.is_empty() {
                    return Ok(&raw[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    Err(Error::ExtractionFailure(format!(
        "unbalanced JSON {kind}: {} delimiter(s) left open",
        stack.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_with_banner_and_prompt() {
        let raw = "Keeper Commander v16\nLogged in\n{\"title\": \"Email\", \"fields\": []}\nMy Vault> ";
        assert_eq!(
            extract_json_object(raw).unwrap(),
            "{\"title\": \"Email\", \"fields\": []}"
        );
    }

    #[test]
    fn test_array() {
        let raw = "Syncing...\n[{\"uid\": \"a\"}, {\"uid\": \"b\"}]\nMy Vault> ";
        let region = extract_json_array(raw).unwrap();
        assert_eq!(region, "[{\"uid\": \"a\"}, {\"uid\": \"b\"}]");
    }

    #[test]
    fn test_first_delimiter_wins() {
        // A bracket in a banner starts the region; callers strip banners first.
        let raw = "Decrypted [2] record(s)\n[1, 2]";
        assert_eq!(extract_json_array(raw).unwrap(), "[2]");
    }

    #[test]
    fn test_object_after_decrypted_banner() {
        let raw = "Decrypted [5] record(s)\n{\"a\":1}";
        assert_eq!(extract_json_object(raw).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_array_closed_by_brace_fails() {
        let raw = "noise\n[1,2,{\"x\":\"[\" }}]";
        assert!(matches!(
            extract_json_array(raw),
            Err(Error::ExtractionFailure(_))
        ));
    }

    #[test]
    fn test_braces_inside_strings() {
        let raw = r#"{"note": "a } tricky { value ]", "ok": true} trailing"#;
        assert_eq!(
            extract_json_object(raw).unwrap(),
            r#"{"note": "a } tricky { value ]", "ok": true}"#
        );
    }

    #[test]
    fn test_escaped_quotes() {
        let raw = r#"x {"quote": "she said \"}\" loudly", "n": 1} y"#;
        assert_eq!(
            extract_json_object(raw).unwrap(),
            r#"{"quote": "she said \"}\" loudly", "n": 1}"#
        );
    }

    #[test]
    fn test_escaped_backslash_before_quote() {
        let raw = r#"{"path": "C:\\"} rest"#;
        assert_eq!(extract_json_object(raw).unwrap(), r#"{"path": "C:\\"}"#);
    }

    #[test]
    fn test_no_opening_delimiter() {
        assert!(matches!(
            extract_json_object("no json here"),
            Err(Error::ExtractionFailure(_))
        ));
        assert!(matches!(
            extract_json_array("{\"a\": 1}"),
            Err(Error::ExtractionFailure(_))
        ));
    }

    #[test]
    fn test_unbalanced() {
        assert!(matches!(
            extract_json_object("{\"a\": {\"b\": 1}"),
            Err(Error::ExtractionFailure(_))
        ));
    }

    #[test]
    fn test_mismatched_closer() {
        assert!(matches!(
            extract_json_object("{\"a\": [1, 2}"),
            Err(Error::ExtractionFailure(_))
        ));
    }

    #[test]
    fn test_non_ascii_content() {
        let raw = "Zaznam: {\"title\": \"Pr\u{ed}klad \u{1f512}\"} hotovo";
        assert_eq!(
            extract_json_object(raw).unwrap(),
            "{\"title\": \"Pr\u{ed}klad \u{1f512}\"}"
        );
    }

    #[test]
    fn test_extract_value_picks_first() {
        assert_eq!(extract_json_value("x [1, {\"a\": 2}] y").unwrap(), "[1, {\"a\": 2}]");
        assert_eq!(extract_json_value("x {\"a\": [1]} [2]").unwrap(), "{\"a\": [1]}");
        assert!(extract_json_value("nothing").is_err());
    }

    #[test]
    fn test_parse_helpers() {
        let object = parse_json_object("banner\n{\"password\": \"s3cr3t\"}\nMy Vault> ").unwrap();
        assert_eq!(object["password"], "s3cr3t");

        let array = parse_json_array("[1, 2, 3]").unwrap();
        assert_eq!(array.as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn test_parse_invalid_json_region() {
        // Balanced but not valid JSON
        let result = parse_json_object("{not json}");
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
