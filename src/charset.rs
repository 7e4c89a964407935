//! Character to device byte-code table used by the `str` directive.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::text::decode_hex_bytes;

#[derive(Debug, Clone)]
pub struct Charset {
    codes: HashMap<char, Vec<u8>>,
}

impl Default for Charset {
    /// Printable ASCII maps to itself; `~` stands for a space.
    fn default() -> Self {
        let mut codes: HashMap<char, Vec<u8>> = (0x20u8..0x7f).map(|b| (b as char, vec![b])).collect();
        codes.insert('~', vec![0x20]);
        Self { codes }
    }
}

impl Charset {
    /// Parses `<char> <hex code>` lines; codes are two or four hex digits.
    /// `space` may be used as the character token.
    pub fn parse(text: &str) -> Result<Self> {
        let mut codes = HashMap::new();
        for raw in text.lines() {
            let line = raw.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(ch), Some(code), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(Error::BadTableLine(line.to_string()));
            };
            let ch = match ch {
                "space" => ' ',
                _ => {
                    let mut it = ch.chars();
                    match (it.next(), it.next()) {
                        (Some(c), None) => c,
                        _ => return Err(Error::BadTableLine(line.to_string())),
                    }
                }
            };
            if code.len() != 2 && code.len() != 4 {
                return Err(Error::BadTableLine(line.to_string()));
            }
            codes.insert(ch, decode_hex_bytes(code)?);
        }
        Ok(Self { codes })
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(text.len());
        for c in text.chars() {
            let code = self.codes.get(&c).ok_or(Error::UnknownChar(c))?;
            out.extend_from_slice(code);
        }
        Ok(out)
    }
}
