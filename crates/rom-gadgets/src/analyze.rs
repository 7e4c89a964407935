//! Reverse control flow over a raw nX-U8 ROM.
//!
//! Three instruction forms let execution arrive somewhere other than the
//! next word: `BC AL` (`xx CE`), `B` (`00 Fs lo hi`) and a `BL` directly
//! followed by `POP PC` (`01 Fs lo hi 8E F2`), which behaves like a jump.
//! Any address that reaches a gadget only through these is interchangeable
//! with it as a `pop pc` target.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use tracing::debug;

use crate::model::Rom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    CondAlways,
    Branch,
    CallReturn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: u32,
    pub to: u32,
    pub kind: EdgeKind,
}

/// `BC AL`: signed word displacement from the next instruction, wrapping
/// within the current 64 KiB segment.
fn cond_always(addr: u32, word: u16) -> Option<u32> {
    let [disp, op] = word.to_le_bytes();
    (op == 0xCE).then(|| {
        let disp = i64::from(disp as i8);
        let off = (i64::from(addr) + (disp + 1) * 2).rem_euclid(0x1_0000) as u32;
        addr & 0xF_0000 | off
    })
}

/// Absolute 20-bit target of `xx Fs lo hi` with the given low byte.
fn far_target(rom: &Rom, addr: u32, word: u16, lead: u8) -> Option<u32> {
    let [lo, hi] = word.to_le_bytes();
    if lo != lead || hi & 0xF0 != 0xF0 {
        return None;
    }
    let offset = rom.read_u16(addr + 2)?;
    Some(u32::from(hi & 0x0F) << 16 | u32::from(offset))
}

/// Every jump-like edge in the image, at even offsets.
pub fn scan_edges(rom: &Rom) -> Vec<Edge> {
    let mut edges = Vec::new();
    for addr in (0..rom.len() as u32).step_by(2) {
        let Some(word) = rom.read_u16(addr) else { break };
        if let Some(to) = cond_always(addr, word) {
            edges.push(Edge { from: addr, to, kind: EdgeKind::CondAlways });
        }
        if let Some(to) = far_target(rom, addr, word, 0x00) {
            edges.push(Edge { from: addr, to, kind: EdgeKind::Branch });
        }
        if rom.read_u16(addr + 4) == Some(0xF28E) {
            if let Some(to) = far_target(rom, addr, word, 0x01) {
                edges.push(Edge { from: addr, to, kind: EdgeKind::CallReturn });
            }
        }
    }
    edges
}

/// Target → sources reaching it.
pub fn reverse_edges(rom: &Rom) -> HashMap<u32, Vec<u32>> {
    let mut comefrom: HashMap<u32, Vec<u32>> = HashMap::new();
    for e in scan_edges(rom) {
        comefrom.entry(e.to).or_default().push(e.from);
    }
    comefrom
}

/// Even offsets where `pattern` occurs.
pub fn pattern_occurrences(rom: &Rom, pattern: &[u8]) -> Result<Vec<u32>> {
    anyhow::ensure!(!pattern.is_empty(), "empty gadget pattern");
    anyhow::ensure!(pattern.len() % 2 == 0, "gadget pattern must have even length, got {}", pattern.len());
    Ok(rom
        .bytes
        .windows(pattern.len())
        .enumerate()
        .step_by(2)
        .filter(|(_, w)| *w == pattern)
        .map(|(i, _)| i as u32)
        .collect())
}

/// Closure of `seeds` under the reverse edges.
pub fn equivalent_addresses(comefrom: &HashMap<u32, Vec<u32>>, seeds: impl IntoIterator<Item = u32>) -> BTreeSet<u32> {
    let mut pending: Vec<u32> = seeds.into_iter().collect();
    let mut seen = BTreeSet::new();
    while let Some(adr) = pending.pop() {
        if !seen.insert(adr) {
            continue;
        }
        if let Some(srcs) = comefrom.get(&adr) {
            pending.extend(srcs.iter().copied().filter(|s| !seen.contains(s)));
        }
    }
    seen
}

pub fn find_equivalent_addresses(rom: &Rom, pattern: &[u8]) -> Result<BTreeSet<u32>> {
    let seeds = pattern_occurrences(rom, pattern)?;
    let comefrom = reverse_edges(rom);
    debug!(occurrences = seeds.len(), targets = comefrom.len(), "scanned rom");
    Ok(equivalent_addresses(&comefrom, seeds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rom_with(patches: &[(usize, &[u8])], len: usize) -> Rom {
        let mut bytes = vec![0xFFu8; len];
        for (at, b) in patches {
            bytes[*at..*at + b.len()].copy_from_slice(b);
        }
        Rom::new(bytes)
    }

    #[test]
    fn recognises_three_forms() {
        let rom = rom_with(
            &[
                (0x00, &[0x03, 0xCE]),                         // BC AL +3 words -> 0x08
                (0x10, &[0x00, 0xF0, 0x40, 0x00]),             // B 0:0040
                (0x20, &[0x01, 0xF0, 0x50, 0x00, 0x8E, 0xF2]), // BL 0:0050, POP PC
                (0x30, &[0x01, 0xF0, 0x60, 0x00, 0x8E, 0xF0]), // BL, not followed by POP PC
            ],
            0x80,
        );
        let edges: Vec<(u32, u32, EdgeKind)> = scan_edges(&rom).iter().map(|e| (e.from, e.to, e.kind)).collect();
        assert_eq!(
            edges,
            vec![
                (0x00, 0x08, EdgeKind::CondAlways),
                (0x10, 0x40, EdgeKind::Branch),
                (0x20, 0x50, EdgeKind::CallReturn),
            ]
        );
    }

    #[test]
    fn backward_branch_wraps_inside_segment() {
        let mut bytes = vec![0xFFu8; 0x1_0004];
        bytes[0x1_0000] = 0xFE; // -2 words
        bytes[0x1_0001] = 0xCE;
        let rom = Rom::new(bytes);
        let e = scan_edges(&rom);
        assert_eq!(e[0].from, 0x1_0000);
        assert_eq!(e[0].to, 0x1_FFFE);
    }

    #[test]
    fn truncated_forms_at_the_end_are_ignored() {
        let rom = rom_with(&[(0x0C, &[0x01, 0xF0, 0x50, 0x00, 0x8E]), (0x12, &[0x00, 0xF0])], 0x14);
        assert_eq!(scan_edges(&rom), vec![]);
    }

    #[test]
    fn closure_follows_chains() {
        let rom = rom_with(
            &[
                (0x40, &[0x8E, 0xF2]),             // the gadget: POP PC
                (0x10, &[0x00, 0xF0, 0x40, 0x00]), // B 0x40
                (0x20, &[0x00, 0xF0, 0x10, 0x00]), // B 0x10
                (0x30, &[0x00, 0xF0, 0x44, 0x00]), // elsewhere
            ],
            0x60,
        );
        let found = find_equivalent_addresses(&rom, &[0x8E, 0xF2]).unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![0x10, 0x20, 0x40]);
    }

    #[test]
    fn odd_patterns_are_rejected() {
        let rom = Rom::new(vec![0; 8]);
        assert!(pattern_occurrences(&rom, &[0x8E]).is_err());
    }

    #[test]
    fn occurrences_only_at_even_offsets() {
        let rom = Rom::new(vec![0x00, 0x8E, 0xF2, 0x00, 0x8E, 0xF2]);
        assert_eq!(pattern_occurrences(&rom, &[0x8E, 0xF2]).unwrap(), vec![4]);
    }
}
