use std::fmt::Write as _;

use super::{Assembled, OutputFormat, TargetMode};
use crate::config::Layout;
use crate::keys::KeyCost;

/// Key pairs per line in the loader listing.
const PAIRS_PER_LINE: usize = 8;

impl Assembled {
    /// The payload as `overflow` mode types it: a window pre-filled with
    /// `1234567890` with the program rotated in at `home`.
    pub fn hackstring(&self, layout: &Layout) -> Vec<u8> {
        let window = layout.overflow_window;
        let mut out: Vec<u8> = b"1234567890".iter().copied().cycle().take(window).collect();
        if window == 0 {
            return out;
        }
        let base = i64::from(self.home) - i64::from(layout.overflow_base);
        for (i, &b) in self.bytes.iter().enumerate() {
            let slot = (base + i as i64).rem_euclid(window as i64) as usize;
            out[slot] = b;
        }
        out
    }

    pub fn render(&self, format: OutputFormat, keys: &KeyCost, layout: &Layout) -> String {
        match (self.mode, format) {
            (TargetMode::Overflow, OutputFormat::Hex) => {
                self.hackstring(layout).iter().map(|b| format!("{b:02x}")).collect()
            }
            (TargetMode::Overflow, OutputFormat::Keystroke) => keys.keys(&self.hackstring(layout)).join(" "),
            (TargetMode::None | TargetMode::Loader, OutputFormat::Hex) => {
                let bytes: Vec<String> = self.bytes.iter().map(|b| format!("{b:02X}")).collect();
                format!("===0x{:04X} -> 0x{:04X}===\n{}", self.home, self.end, bytes.join(" "))
            }
            (TargetMode::None, OutputFormat::Keystroke) => {
                format!("{:#06x}: {}", self.home, keys.keys(&self.bytes).join(" "))
            }
            (TargetMode::Loader, OutputFormat::Keystroke) => self.render_loader_keys(keys),
        }
    }

    fn render_loader_keys(&self, keys: &KeyCost) -> String {
        let load = self.home.wrapping_sub(self.load_adjust);
        let mut out = format!("Address to load: {} {}", keys.key(load as u8), keys.key((load >> 8) as u8));
        let mut bytes = vec![0u8; self.load_adjust as usize];
        bytes.extend_from_slice(&self.bytes);
        let pairs: Vec<String> = bytes.chunks(2).map(|pair| keys.keys(pair).join(" ")).collect();
        for line in pairs.chunks(PAIRS_PER_LINE) {
            let _ = write!(out, "\n{}", line.join("  "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn assembled(mode: TargetMode, home: u32, bytes: Vec<u8>) -> Assembled {
        Assembled {
            mode,
            end: home + bytes.len() as u32,
            bytes,
            home,
            load_adjust: 0,
            labels: BTreeMap::new(),
            notes: Vec::new(),
        }
    }

    #[test]
    fn plain_hex_has_header() {
        let a = assembled(TargetMode::None, 0x8d9c, vec![0x02, 0x0a]);
        assert_eq!(
            a.render(OutputFormat::Hex, &KeyCost::default(), &Layout::default()),
            "===0x8D9C -> 0x8D9E===\n02 0A"
        );
    }

    #[test]
    fn overflow_rotates_into_window() {
        let layout = Layout::default();
        let a = assembled(TargetMode::Overflow, 0x8154 + 98, vec![0xaa, 0xbb, 0xcc]);
        let s = a.hackstring(&layout);
        assert_eq!(s.len(), 100);
        assert_eq!((s[98], s[99], s[0], s[1]), (0xaa, 0xbb, 0xcc, b'2'));
        let hex = a.render(OutputFormat::Hex, &KeyCost::default(), &layout);
        assert!(hex.starts_with("cc32"));
    }

    #[test]
    fn loader_keys_group_pairs() {
        let mut a = assembled(TargetMode::Loader, 0x8580, vec![0x31; 34]);
        a.load_adjust = 2;
        let out = a.render(OutputFormat::Keystroke, &KeyCost::default(), &Layout::default());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Address to load: <7e> <85>");
        assert_eq!(lines.len(), 1 + 3);
        assert!(lines[1].starts_with("<NUL> <NUL>  <31> <31>"));
    }
}
