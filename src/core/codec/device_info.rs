use super::{DecodeError, Value};

/// Decodes a Device Information string; trailing NUL padding is dropped.
pub(crate) fn decode_text(data: &[u8]) -> Result<Value, DecodeError> {
    let end = data
        .iter()
        .rposition(|b| *b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    String::from_utf8(data[..end].to_vec())
        .map(|s| Value::Text(s.trim().to_string()))
        .map_err(|e| DecodeError::MalformedPayload(format!("invalid UTF-8 text: {}", e)))
}
