//! Response envelopes.
//!
//! In-process agents already emit canonical events. Remote engines nest the
//! same event one level deeper under [`WRAPPED_OUTPUT_KEY`]; unwrapping that
//! layer is the only normalization a client needs to treat both identically.

use serde_json::Value;

/// Field a remote engine wraps its canonical output in.
pub const WRAPPED_OUTPUT_KEY: &str = "bidiStreamOutput";

/// Unwrap a remote envelope, or return a canonical response unchanged.
pub fn translate_response(response: Value) -> Value {
    match response {
        Value::Object(mut map) => match map.remove(WRAPPED_OUTPUT_KEY) {
            Some(inner) if is_forwardable(&inner) => inner,
            Some(inner) => {
                map.insert(WRAPPED_OUTPUT_KEY.to_string(), inner);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    }
}

/// Whether a translated response carries anything worth forwarding.
///
/// `null`, `false`, zero, and empty strings, arrays and mappings are empty.
pub fn is_forwardable(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// The `error` field of a response mapping, if any.
pub fn response_error(response: &Value) -> Option<&Value> {
    response.as_object()?.get("error")
}
