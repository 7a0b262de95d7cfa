//! Query-string and percent-encoding helpers.
//!
//! Keys and values are percent-encoded over the RFC 3986 unreserved set
//! plus `! ~ * ' ( )`, multi-byte characters as consecutive UTF-8 percent
//! triplets. Decoding accepts `+` for space and reassembles UTF-8 byte
//! sequences from consecutive triplets.

use std::collections::HashMap;

use crate::error::EngineError;

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')')
}

/// Percent-encode a single key or value.
pub fn encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if is_unreserved(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).as_bytes() {
                out.push('%');
                out.push_str(&format!("{byte:02X}"));
            }
        }
    }
    out
}

/// Percent-decode a single key or value.
pub fn decode_component(input: &str) -> Result<String, EngineError> {
    let mut bytes = Vec::with_capacity(input.len());
    let mut chars = input.as_bytes().iter().copied();
    while let Some(b) = chars.next() {
        match b {
            b'+' => bytes.push(b' '),
            b'%' => {
                let hi = chars.next();
                let lo = chars.next();
                let (Some(hi), Some(lo)) = (hi, lo) else {
                    return Err(EngineError::InvalidQuery(input.to_owned()));
                };
                let hex = [hi, lo];
                let hex = std::str::from_utf8(&hex)
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
                    .ok_or_else(|| EngineError::InvalidQuery(input.to_owned()))?;
                bytes.push(hex);
            }
            _ => bytes.push(b),
        }
    }
    String::from_utf8(bytes).map_err(|_| EngineError::InvalidQuery(input.to_owned()))
}

/// Encode a map as `k1=v1&k2=v2`.
pub fn encode(query: &HashMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in query {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(&encode_component(key));
        out.push('=');
        out.push_str(&encode_component(value));
    }
    out
}

/// Decode a `k1=v1&k2=v2` string. Pairs with an empty key are skipped.
pub fn decode(input: &str) -> Result<HashMap<String, String>, EngineError> {
    let mut out = HashMap::new();
    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key.is_empty() {
            continue;
        }
        out.insert(decode_component(key)?, decode_component(value)?);
    }
    Ok(out)
}

/// Milliseconds since the unix epoch in base 36, the cache-busting
/// timestamp appended to transport URLs.
pub fn timestamp() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    base36(now)
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap()
}
