//! Choosing `home`, the address the compiled buffer is mapped at.

use std::cmp::Reverse;

use crate::config::{Layout, LoaderLayout};
use crate::error::{Error, Result};
use crate::keys::KeyCost;

/// 16-bit address a home-relative target ends up at.
pub fn wrap16(v: i64) -> u32 {
    v.rem_euclid(0x10000) as u32
}

/// Number of targets that would be expensive to type with this `home`.
fn expensive_targets(keys: &KeyCost, threshold: u32, home: i64, targets: &[i64]) -> usize {
    targets
        .iter()
        .filter(|&&t| keys.cost_address(wrap16(home + t)) >= threshold)
        .count()
}

/// Scans candidate bases around `start` in steps of `layout.stride`, from
/// below the search floor up to where the program would overrun the end of
/// RAM. `targets` are the home-relative offsets of every address fixup.
///
/// Fewest expensive targets wins; ties go to the highest base.
pub fn search_home(layout: &Layout, keys: &KeyCost, start: i64, len: usize, targets: &[i64]) -> Result<i64> {
    let stride = i64::from(layout.stride);
    let floor = i64::from(layout.search_floor);
    let ceiling = i64::from(layout.ram_end);
    let len = len as i64;
    if stride <= 0 {
        return Err(Error::NoPlacement { lo: start, hi: start });
    }

    let mut lo = start;
    while lo >= floor {
        lo -= stride;
    }
    let mut hi = start;
    while hi + len <= ceiling {
        hi += stride;
    }

    (lo..hi)
        .step_by(stride as usize)
        .min_by_key(|&h| (expensive_targets(keys, layout.cost_threshold, h, targets), Reverse(h)))
        .ok_or(Error::NoPlacement { lo, hi })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderPlacement {
    pub home: i64,
    /// Zero bytes prepended so the load address is cheap to type.
    pub adjust: u32,
}

/// Lays the program out just below the loader table: appends the trampoline
/// jumping to `home_label - 2`, pads to `pad_to` and appends the signature.
pub fn place_for_loader(
    loader: &LoaderLayout,
    keys: &KeyCost,
    threshold: u32,
    buf: &mut Vec<u8>,
    home_label: usize,
) -> Result<LoaderPlacement> {
    let program_len = buf.len();
    let home = i64::from(loader.base) - program_len as i64;
    if home < i64::from(loader.floor) {
        return Err(Error::ProgramTooLong {
            len: program_len,
            limit: loader.base.saturating_sub(loader.floor) as usize,
        });
    }

    let entry = wrap16(home + home_label as i64 - 2);
    buf.extend_from_slice(&loader.trampoline_head);
    buf.extend_from_slice(&[entry as u8, (entry >> 8) as u8]);
    buf.extend_from_slice(&loader.trampoline_tail);
    while home + (buf.len() as i64) < i64::from(loader.pad_to) {
        buf.push(0);
    }
    buf.extend_from_slice(&loader.signature);

    let adjust = (0..=home)
        .find(|adj| keys.cost_address(wrap16(home - adj)) < threshold)
        .ok_or(Error::NoPlacement { lo: 0, hi: home })?;
    Ok(LoaderPlacement { home, adjust: adjust as u32 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::UNTYPABLE;

    fn digits_only() -> KeyCost {
        let mut np = [UNTYPABLE; 256];
        for b in 0x30..=0x39 {
            np[b] = 1;
        }
        KeyCost::new(np, Vec::new())
    }

    #[test]
    fn search_breaks_ties_toward_high_bases() {
        let layout = Layout::default();
        let keys = KeyCost::default();
        // every candidate is equally expensive: the highest base wins
        let h = search_home(&layout, &keys, 0x8d00, 16, &[0]).unwrap();
        assert!(h + 16 <= i64::from(layout.ram_end));
        assert!(h + 16 + 100 > i64::from(layout.ram_end));
        assert_eq!((0x8d00 - h) % 100, 0);
    }

    #[test]
    fn search_prefers_fewer_expensive_targets_over_high_bases() {
        let layout = Layout::default();
        // only 0x8d64 types cheaply
        let mut np = [UNTYPABLE; 256];
        np[0x64] = 1;
        np[0x8d] = 1;
        let keys = KeyCost::new(np, Vec::new());
        let highest = search_home(&layout, &KeyCost::default(), 0x8d00, 16, &[0]).unwrap();
        assert_eq!(highest, 0x8dc8);
        assert!(keys.cost_address(0x8dc8) >= layout.cost_threshold);

        let h = search_home(&layout, &keys, 0x8d00, 16, &[0]).unwrap();
        assert_eq!(h, 0x8d64);

        // a target four bytes in shifts the cheap base down by four
        let h = search_home(&layout, &keys, 0x8d00 - 4, 16, &[4]).unwrap();
        assert_eq!(h, 0x8d60);
    }

    #[test]
    fn search_without_candidates_fails() {
        let layout = Layout { ram_end: 0x8000, search_floor: 0x9000, ..Layout::default() };
        let err = search_home(&layout, &KeyCost::default(), 0x8000, 0x2000, &[]).unwrap_err();
        assert!(matches!(err, Error::NoPlacement { .. }));
    }

    #[test]
    fn loader_appends_trampoline_and_signature() {
        let loader = LoaderLayout::default();
        let mut buf = vec![0x11; 10];
        let p = place_for_loader(&loader, &digits_only(), 100, &mut buf, 4).unwrap();
        assert_eq!(p.home, 0x85b0 - 10);
        let entry = (p.home + 4 - 2) as u32;
        assert_eq!(&buf[10..16], &[0x6a, 0x4f, 0x00, 0x00, entry as u8, (entry >> 8) as u8]);
        assert_eq!(p.home as usize + buf.len(), 0x85d7 + 3);
        assert_eq!(&buf[buf.len() - 3..], &[0xff, 0xae, 0x85]);
        // the load address is typed with digit keys only
        let load = (p.home - i64::from(p.adjust)) as u32;
        assert!(digits_only().cost_address(load) < 100);
    }

    #[test]
    fn loader_rejects_long_programs() {
        let mut buf = vec![0; 0x200];
        let err = place_for_loader(&LoaderLayout::default(), &KeyCost::default(), 100, &mut buf, 0).unwrap_err();
        assert!(matches!(err, Error::ProgramTooLong { len: 0x200, .. }));
    }
}
