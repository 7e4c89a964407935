use std::collections::BTreeMap;

/// Address → mnemonic listing of the target ROM.
#[derive(Debug, Clone, Default)]
pub struct Disassembly {
    insns: BTreeMap<u32, String>,
}

impl Disassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts both the annotated listing
    ///
    /// ```text
    ///     mov r2, 1                      ; 0A0A2 | 0201
    /// ```
    ///
    /// and the segmented listing `1:7B34H  F02E  POP XR0`. Lines matching
    /// neither are ignored.
    pub fn parse(text: &str) -> Self {
        let mut insns = BTreeMap::new();
        for line in text.lines() {
            let entry = parse_annotated(line)
                .map(|(a, m)| (a, m.to_string()))
                .or_else(|| parse_segmented(line));
            if let Some((addr, mn)) = entry {
                insns.insert(addr, mn.trim().to_ascii_lowercase());
            }
        }
        Self { insns }
    }

    pub fn insert(&mut self, addr: u32, mnemonic: &str) {
        self.insns.insert(addr, mnemonic.trim().to_ascii_lowercase());
    }

    pub fn get(&self, addr: u32) -> Option<&str> {
        self.insns.get(&addr).map(String::as_str)
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.insns.contains_key(&addr)
    }

    /// One past the highest listed address.
    pub fn len(&self) -> u32 {
        self.insns.keys().next_back().map_or(0, |a| a + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Next listed instruction after `addr`, two or four bytes on.
    pub fn next_after(&self, addr: u32) -> Option<u32> {
        [2u32, 4]
            .into_iter()
            .map(|w| addr.wrapping_add(w))
            .find(|a| self.insns.contains_key(a))
    }

    /// Up to `n` listed instructions starting at `addr` (rounded down to even).
    pub fn preview(&self, addr: u32, n: usize) -> Vec<(u32, &str)> {
        self.insns
            .range(addr & !1..)
            .take(n)
            .map(|(a, m)| (*a, m.as_str()))
            .collect()
    }
}

fn parse_annotated(line: &str) -> Option<(u32, &str)> {
    let body = line.strip_prefix('\t')?;
    let semi = body.find("; ")?;
    let rest = &body[semi + 2..];
    let bar = rest.find(" |")?;
    let digits = &rest[..bar];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let addr = u32::from_str_radix(digits, 16).ok()?;
    Some((addr, body[..semi].trim_end()))
}

fn parse_segmented(line: &str) -> Option<(u32, String)> {
    if line.starts_with(char::is_whitespace) {
        return None;
    }
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }
    let addr = parse_segmented_addr(parts[0])?;
    let mn = if parts.len() >= 3 { parts[2..].join(" ") } else { parts[1..].join(" ") };
    Some((addr, mn))
}

fn parse_segmented_addr(tok: &str) -> Option<u32> {
    let strip_h = |s: &str| s.trim().trim_end_matches(&['H', 'h'][..]).to_string();
    if let Some((seg, off)) = tok.split_once(':') {
        let seg = seg.trim();
        let seg_v = if seg.is_empty() { 0 } else { u32::from_str_radix(seg, 16).ok()? };
        let off_v = u32::from_str_radix(&strip_h(off), 16).ok()?;
        return Some(seg_v << 16 | off_v);
    }
    let t = strip_h(tok);
    let t = t.trim_end_matches(':');
    if t.is_empty() || !t.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(t, 16).ok()
}
