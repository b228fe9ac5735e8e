// Conversion of host values into JS literal syntax for WAPI calls

use serde_json::Value;

use crate::error::{Result, WapiError};

/// Renders one argument as a JS literal.
///
/// Only scalars are accepted: strings, booleans, numbers and null. Arrays and
/// objects are rejected with [`WapiError::UnsupportedValueType`] rather than
/// being coerced into something the page might misread.
pub fn to_js_literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        // A JSON string literal is a valid JS string literal: quotes,
        // backslashes and control characters come out escaped.
        Value::String(s) => serde_json::to_string(s).map_err(|_| WapiError::UnsupportedValueType {
            kind: "string",
        }),
        Value::Array(_) => Err(WapiError::UnsupportedValueType { kind: "array" }),
        Value::Object(_) => Err(WapiError::UnsupportedValueType { kind: "object" }),
    }
}

/// Renders an argument list as the comma-separated inside of a call.
pub fn join_js_args(args: &[Value]) -> Result<String> {
    let literals = args.iter().map(to_js_literal).collect::<Result<Vec<_>>>()?;
    Ok(literals.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_literals() {
        assert_eq!(to_js_literal(&json!(null)).unwrap(), "null");
        assert_eq!(to_js_literal(&json!(true)).unwrap(), "true");
        assert_eq!(to_js_literal(&json!(false)).unwrap(), "false");
        assert_eq!(to_js_literal(&json!(42)).unwrap(), "42");
        assert_eq!(to_js_literal(&json!(-7)).unwrap(), "-7");
        assert_eq!(to_js_literal(&json!(1.5)).unwrap(), "1.5");
        assert_eq!(to_js_literal(&json!("972512345678")).unwrap(), "\"972512345678\"");
    }

    #[test]
    fn test_string_escaping_parses_back() {
        let tricky = [
            "it's",
            "say \"hi\"",
            "back\\slash",
            "line\nbreak\ttab",
            "emoji 😀 and ünïcödé",
            "</script>",
        ];

        for s in tricky {
            let literal = to_js_literal(&json!(s)).unwrap();
            assert!(literal.starts_with('"') && literal.ends_with('"'));
            let parsed: Value = serde_json::from_str(&literal).unwrap();
            assert_eq!(parsed, json!(s), "literal {} did not parse back", literal);
        }
    }

    #[test]
    fn test_numbers_parse_back() {
        for v in [json!(0), json!(1234567890123_i64), json!(-3.25), json!(1e-7)] {
            let literal = to_js_literal(&v).unwrap();
            let parsed: Value = serde_json::from_str(&literal).unwrap();
            assert_eq!(parsed, v);
        }
    }

    #[test]
    fn test_containers_are_rejected() {
        match to_js_literal(&json!([1, 2])) {
            Err(WapiError::UnsupportedValueType { kind }) => assert_eq!(kind, "array"),
            other => panic!("expected UnsupportedValueType, got {:?}", other),
        }
        match to_js_literal(&json!({"a": 1})) {
            Err(WapiError::UnsupportedValueType { kind }) => assert_eq!(kind, "object"),
            other => panic!("expected UnsupportedValueType, got {:?}", other),
        }
    }

    #[test]
    fn test_join_keeps_order() {
        let joined = join_js_args(&[json!("a@c.us"), json!(true), json!(3)]).unwrap();
        assert_eq!(joined, "\"a@c.us\", true, 3");
        assert_eq!(join_js_args(&[]).unwrap(), "");
        assert!(join_js_args(&[json!("ok"), json!({})]).is_err());
    }
}
