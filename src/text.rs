//! Line normalization and literal parsing shared by the table loaders,
//! the assembler and the decompiler.

use crate::error::{Error, Result};

/// Drops everything from the first `#` on.
pub fn strip_inline_comment(line: &str) -> &str {
    match line.find('#') {
        Some(p) => line[..p].trim_end(),
        None => line.trim_end(),
    }
}

/// Trims the line and removes blanks around every character that is not
/// ASCII alphanumeric. Runs of blanks between two alphanumerics collapse to
/// one space.
pub fn canonicalize(line: &str) -> String {
    let chars: Vec<char> = line
        .trim()
        .chars()
        .map(|c| if c == '\t' { ' ' } else { c })
        .collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c != ' ' {
            out.push(c);
            i += 1;
            continue;
        }
        let mut j = i;
        while j < chars.len() && chars[j] == ' ' {
            j += 1;
        }
        let left = out.chars().last();
        let right = chars.get(j).copied();
        let keep = matches!((left, right), (Some(l), Some(r))
            if l.is_ascii_alphanumeric() && r.is_ascii_alphanumeric());
        if keep {
            out.push(' ');
        }
        i = j;
    }
    out
}

/// Parses an integer with optional sign and `0x`/`0o`/`0b` prefix.
pub fn parse_int(s: &str) -> Result<i64> {
    let t = s.trim();
    let (neg, body) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let lower = body.to_ascii_lowercase();
    let parsed = if let Some(h) = lower.strip_prefix("0x") {
        i64::from_str_radix(h, 16)
    } else if let Some(o) = lower.strip_prefix("0o") {
        i64::from_str_radix(o, 8)
    } else if let Some(b) = lower.strip_prefix("0b") {
        i64::from_str_radix(b, 2)
    } else {
        lower.parse::<i64>()
    };
    let v = parsed.map_err(|_| Error::BadNumber(s.trim().to_string()))?;
    Ok(if neg { -v } else { v })
}

/// Parses a hexadecimal number, tolerating a `0x` prefix.
pub fn parse_hex(s: &str) -> Result<u32> {
    let t = s.trim();
    let digits = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);
    u32::from_str_radix(digits, 16).map_err(|_| Error::BadHex(t.to_string()))
}

/// Evaluates `term (+|-) term ...` where each term is an integer.
pub fn eval_sum(expr: &str) -> Result<i64> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(Error::BadNumber(String::new()));
    }
    let mut total = 0i64;
    let mut start = 0;
    let mut sign = 1i64;
    let bytes = expr.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if (b == b'+' || b == b'-') && i > start {
            total += sign * parse_int(&expr[start..i])?;
            sign = if b == b'+' { 1 } else { -1 };
            start = i + 1;
        }
    }
    total += sign * parse_int(&expr[start..])?;
    Ok(total)
}

/// Decodes a run of hex digit pairs, ignoring blanks.
pub fn decode_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = s.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(Error::DataLength(s.to_string()));
    }
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::BadHex(s.to_string()));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let txt = std::str::from_utf8(pair).map_err(|_| Error::BadHex(s.to_string()))?;
            u8::from_str_radix(txt, 16).map_err(|_| Error::BadHex(s.to_string()))
        })
        .collect()
}

/// Little-endian bytes of an arbitrarily long hex digit string.
pub fn hex_digits_le(digits: &str) -> Result<Vec<u8>> {
    let nibbles = digits
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| Error::BadHex(digits.to_string()))?;
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let mut rest = nibbles.as_slice();
    while !rest.is_empty() {
        let n = rest.len();
        let lo = rest[n - 1];
        let hi = if n >= 2 { rest[n - 2] } else { 0 };
        out.push(hi << 4 | lo);
        rest = &rest[..n.saturating_sub(2)];
    }
    Ok(out)
}

/// Adds a signed delta to a little-endian number in place, wrapping at its width.
pub fn add_le(bytes: &mut [u8], delta: i64) {
    let neg = delta < 0;
    let mut mag = delta.unsigned_abs();
    let mut carry = 0u16;
    for b in bytes.iter_mut() {
        let d = (mag & 0xFF) as u16;
        mag >>= 8;
        if neg {
            let sub = d + carry;
            let cur = *b as u16;
            if cur >= sub {
                *b = (cur - sub) as u8;
                carry = 0;
            } else {
                *b = (cur + 0x100 - sub) as u8;
                carry = 1;
            }
        } else {
            let sum = *b as u16 + d + carry;
            *b = (sum & 0xFF) as u8;
            carry = sum >> 8;
        }
        if mag == 0 && carry == 0 {
            break;
        }
    }
}

/// `01 02 0a` style rendering.
pub fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Contents of every `[...]` group, in order, plus the text after the last group.
pub fn bracket_groups(s: &str) -> (Vec<&str>, &str) {
    let mut groups = Vec::new();
    let mut rest = s.trim_start();
    while let Some(inner) = rest.strip_prefix('[') {
        match inner.find(']') {
            Some(end) => {
                groups.push(&inner[..end]);
                rest = inner[end + 1..].trim_start();
            }
            None => break,
        }
    }
    (groups, rest.trim())
}
