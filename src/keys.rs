//! Keystroke cost ("npress") model: how many key presses it takes to type a
//! byte on the target's input method.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::text::strip_inline_comment;

/// Cost assigned to bytes missing from the table.
pub const UNTYPABLE: u32 = 100;

#[derive(Debug, Clone)]
pub struct KeyCost {
    npress: [u32; 256],
    symbols: Vec<String>,
    rendered: RefCell<HashMap<u8, String>>,
}

impl Default for KeyCost {
    fn default() -> Self {
        Self::new([UNTYPABLE; 256], Vec::new())
    }
}

impl KeyCost {
    pub fn new(npress: [u32; 256], symbols: Vec<String>) -> Self {
        Self { npress, symbols, rendered: RefCell::new(HashMap::new()) }
    }

    /// Parses `<hex byte> <npress> [<symbol>]` lines.
    pub fn parse(text: &str) -> Result<Self> {
        let mut npress = [UNTYPABLE; 256];
        let mut symbols = vec![String::new(); 256];
        for raw in text.lines() {
            let line = strip_inline_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(byte), Some(cost)) = (parts.next(), parts.next()) else {
                return Err(Error::BadTableLine(line.to_string()));
            };
            let byte = u8::from_str_radix(byte, 16).map_err(|_| Error::BadTableLine(line.to_string()))?;
            npress[byte as usize] = cost.parse().map_err(|_| Error::BadTableLine(line.to_string()))?;
            symbols[byte as usize] = parts.collect::<Vec<_>>().join(" ");
        }
        Ok(Self::new(npress, symbols))
    }

    pub fn cost(&self, byte: u8) -> u32 {
        self.npress[byte as usize]
    }

    /// Low byte plus high byte, plus the packed segment byte above 16 bits.
    pub fn cost_address(&self, addr: u32) -> u32 {
        let mut total = self.cost(addr as u8) + self.cost((addr >> 8) as u8);
        if addr > 0xFFFF {
            total += self.cost(segment_byte(addr));
        }
        total
    }

    /// The lowest bit of a `pop pc` target is ignored by the CPU, so either
    /// parity works; pick the cheaper one.
    pub fn optimize_address(&self, addr: u32) -> u32 {
        let alt = addr ^ 1;
        if self.cost_address(alt) < self.cost_address(addr) {
            alt
        } else {
            addr
        }
    }

    /// Splits `total` into `(a, b)` with `a + b == total (mod 0x10000)`,
    /// minimising the cost of typing both.
    pub fn optimize_split_sum(&self, total: u32) -> (u32, u32) {
        let total = total & 0xFFFF;
        let mut best = (0x0101, total.wrapping_sub(0x0101) & 0xFFFF);
        let mut best_cost = u32::MAX;
        for a in 0x0101..0x10000u32 {
            let b = total.wrapping_sub(a) & 0xFFFF;
            let c = self.cost_address(a) + self.cost_address(b);
            if c < best_cost {
                best = (a, b);
                best_cost = c;
            }
        }
        best
    }

    /// Key sequence shown for a byte.
    pub fn key(&self, byte: u8) -> String {
        if byte == 0 {
            return "<NUL>".to_string();
        }
        self.rendered
            .borrow_mut()
            .entry(byte)
            .or_insert_with(|| match self.symbols.get(byte as usize).map(String::as_str) {
                None | Some("") | Some("@") => format!("<{byte:02x}>"),
                Some(sym) => sym.to_string(),
            })
            .clone()
    }

    pub fn keys(&self, bytes: &[u8]) -> Vec<String> {
        bytes.iter().map(|&b| self.key(b)).collect()
    }

    /// Keys for a 20-bit address as typed: low, high, packed segment.
    pub fn address_keys(&self, addr: u32) -> String {
        [addr as u8, (addr >> 8) as u8, segment_byte(addr)]
            .iter()
            .map(|&b| self.key(b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn segment_byte(addr: u32) -> u8 {
    0x30 | (addr >> 16) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> KeyCost {
        let mut np = [UNTYPABLE; 256];
        for b in 0x30..=0x39 {
            np[b] = 1;
        }
        np[0x01] = 4;
        np[0x00] = 2;
        let mut sym = vec![String::new(); 256];
        for b in 0x30..=0x39u8 {
            sym[b as usize] = (b as char).to_string();
        }
        sym[0x40] = "@".into();
        KeyCost::new(np, sym)
    }

    #[test]
    fn address_cost_is_additive() {
        let k = model();
        assert_eq!(k.cost_address(0x3031), 2);
        assert_eq!(k.cost_address(0x13031), 2 + k.cost(0x31));
    }

    #[test]
    fn optimize_address_prefers_cheaper_parity() {
        let k = model();
        assert_eq!(k.optimize_address(0x3031), 0x3031);
        assert_eq!(k.optimize_address(0x3131), 0x3131);
        assert_eq!(k.optimize_address(0x3001), 0x3000);
        // tie: both parities untypable
        assert_eq!(k.optimize_address(0x303a), 0x303a);
    }

    #[test]
    fn split_sum_adds_up() {
        let k = model();
        for total in [0u32, 0x1234, 0x6161, 0xffff] {
            let (a, b) = k.optimize_split_sum(total);
            assert_eq!((a + b) & 0xffff, total);
            assert!((0x0101..0x10000).contains(&a));
        }
        let (a, b) = k.optimize_split_sum(0x6161);
        assert_eq!(k.cost_address(a) + k.cost_address(b), 4);
    }

    #[test]
    fn keys_render_symbols() {
        let k = model();
        assert_eq!(k.key(0), "<NUL>");
        assert_eq!(k.key(0x31), "1");
        assert_eq!(k.key(0x40), "<40>");
        assert_eq!(k.key(0xfe), "<fe>");
    }

    #[test]
    fn parse_table() {
        let k = KeyCost::parse("# byte npress sym\n31 1 1\n0a 3 sin(\n").unwrap();
        assert_eq!(k.cost(0x31), 1);
        assert_eq!(k.key(0x0a), "sin(");
        assert_eq!(k.cost(0x99), UNTYPABLE);
        assert!(KeyCost::parse("zz 1").is_err());
    }
}
