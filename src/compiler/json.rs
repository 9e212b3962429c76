//! Recovering JSON decoder for compiler output
//!
//! The compiler may print log lines around its JSON payload. Decoding first
//! tries the whole string, then the first balanced `{...}` region.

use serde::de::DeserializeOwned;

/// Decodes `data`, recovering the first balanced object if the whole string
/// is not valid JSON.
///
/// A `{` or `}` preceded by a backslash is not counted. If the first balanced
/// region does not decode either, the error from the whole-string attempt is
/// returned.
pub fn parse_json<T: DeserializeOwned>(data: &str) -> serde_json::Result<T> {
    let original = match serde_json::from_str(data) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let bytes = data.as_bytes();
    let mut open = 0usize;
    let mut start = 0usize;

    for (i, &byte) in bytes.iter().enumerate() {
        let escaped = i > 0 && bytes[i - 1] == b'\\';
        match byte {
            b'{' if !escaped => {
                if open == 0 {
                    start = i;
                }
                open += 1;
            }
            b'}' if open > 0 && !escaped => {
                open -= 1;
                if open == 0 {
                    return serde_json::from_str(&data[start..=i]).map_err(|_| original);
                }
            }
            _ => {}
        }
    }

    Err(original)
}
