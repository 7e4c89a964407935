//! Turns a raw hackstring back into assembler source.
//!
//! The payload is walked four bytes at a time. Each word is read as a 20-bit
//! call address and named through the label, gadget and disassembly tables;
//! bytes the named code pops off the stack are consumed along with it.
//! Nothing is ever dropped: words that cannot be named come out as `hex`
//! lines, so every payload byte is accounted for.

use tracing::{debug, trace};

use crate::config::DecompileRange;
use crate::disasm::Disassembly;
use crate::error::{DecompileError, Error, Result};
use crate::symbols::AddressTable;
use crate::text::{decode_hex_bytes, spaced_hex};

/// Lower addresses probed when a word names nothing directly.
const DEGRADE_STEPS: u32 = 4;
/// Instructions followed when inferring what a disassembled routine pops.
const MAX_WALK: usize = 50;
/// Stack bytes released by the `leave` epilogue.
const LEAVE_BYTES: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decompiled {
    pub org: u32,
    pub lines: Vec<String>,
    /// Payload bytes accounted for; always the full payload length.
    pub covered: usize,
}

impl Decompiled {
    pub fn text(&self) -> String {
        let mut s = self.lines.join("\n");
        s.push('\n');
        s
    }
}

/// Stack bytes a `pop` into `reg` consumes.
pub fn reg_bytes(reg: &str) -> usize {
    let r = reg.to_ascii_lowercase();
    if r.starts_with("qr") {
        8
    } else if r.starts_with("xr") {
        4
    } else if r.starts_with("er") || r.starts_with("ea") {
        2
    } else if r.starts_with('r') {
        2
    } else {
        0
    }
}

/// Registers named after the `pop` keyword, up to `pc`/`rt`.
fn popped_registers(text: &str) -> Option<(&str, Vec<String>)> {
    let lower = text.to_ascii_lowercase();
    let at = word_position(&lower, "pop")?;
    let regs = lower[at + 3..]
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .take_while(|t| *t != "pc" && *t != "rt")
        .filter(|t| t.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_string)
        .collect();
    Some((text[..at].trim(), regs))
}

/// Byte offset of `word` appearing as a whole word.
fn word_position(s: &str, word: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    s.match_indices(word).map(|(i, _)| i).find(|&i| {
        let before = i == 0 || !is_word(bytes[i - 1]);
        let after = bytes.get(i + word.len()).map_or(true, |&b| !is_word(b));
        before && after
    })
}

/// Extracts every hex digit pair from a run of text, lower-cased.
fn hex_pairs(s: &str) -> Vec<u8> {
    let digits: Vec<u8> = s.bytes().collect();
    let mut out = Vec::with_capacity(digits.len() / 2);
    let mut i = 0;
    while i + 1 < digits.len() {
        match (hex_val(digits[i]), hex_val(digits[i + 1])) {
            (Some(hi), Some(lo)) => {
                out.push(hi << 4 | lo);
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

enum Segment<'s> {
    Bytes(&'s str),
    Comment(&'s str),
    Raw(&'s str),
}

/// Splits out `[..]` literal runs and `(..)` comments.
fn segments(s: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let open = rest.find(|c| c == '[' || c == '(').and_then(|p| {
            let close = if rest.as_bytes()[p] == b'[' { ']' } else { ')' };
            rest[p + 1..].find(close).map(|c| (p, p + 1 + c))
        });
        match open {
            Some((p, c)) => {
                if p > 0 {
                    out.push(Segment::Raw(&rest[..p]));
                }
                let inner = &rest[p + 1..c];
                out.push(if rest.as_bytes()[p] == b'[' { Segment::Bytes(inner) } else { Segment::Comment(inner) });
                rest = &rest[c + 1..];
            }
            None => {
                out.push(Segment::Raw(rest));
                break;
            }
        }
    }
    out
}

pub struct Decompiler<'a> {
    disasm: &'a Disassembly,
    gadgets: &'a AddressTable,
    labels: &'a AddressTable,
    range: DecompileRange,
}

impl<'a> Decompiler<'a> {
    pub fn new(
        disasm: &'a Disassembly,
        gadgets: &'a AddressTable,
        labels: &'a AddressTable,
        range: DecompileRange,
    ) -> Self {
        Self { disasm, gadgets, labels, range }
    }

    fn known(&self, addr: u32) -> bool {
        self.labels.contains(addr) || self.gadgets.contains(addr) || self.disasm.contains(addr)
    }

    /// `addr`, or the nearest known address at most four below it.
    pub fn degrade(&self, addr: u32) -> u32 {
        (0..=DEGRADE_STEPS)
            .map_while(|d| addr.checked_sub(d))
            .find(|&a| self.known(a))
            .unwrap_or(addr)
    }

    pub fn decompile(&self, input: &str) -> Result<Decompiled, DecompileError> {
        let header_err = |source| DecompileError { offset: 0, source };
        if input.trim().is_empty() {
            return Err(header_err(Error::EmptyInput));
        }
        let (first, rest) = input.split_once('\n').unwrap_or((input, ""));
        let first = first.trim();
        let (lo, hi) = (self.range.start_ram, self.range.end_ram);

        let (org, head_data) = match first.strip_prefix(':') {
            Some(header) => {
                let header = header.trim_start();
                let (addr, data) = header.split_once(char::is_whitespace).unwrap_or((header, ""));
                let addr = addr.trim_end_matches(':');
                if addr.is_empty() || !addr.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(header_err(Error::BadHex(addr.to_string())));
                }
                // digits are valid, so a parse failure means overflow
                let org = u64::from_str_radix(addr, 16).map_or(i64::MAX, |v| i64::try_from(v).unwrap_or(i64::MAX));
                (org, data)
            }
            None => (i64::from(lo), first),
        };
        let org = u32::try_from(org)
            .ok()
            .filter(|o| (lo..=hi).contains(o))
            .ok_or_else(|| header_err(Error::OrgOutOfRange { addr: org, lo, hi }))?;

        let body: String = head_data.chars().chain(rest.chars()).filter(|c| !c.is_whitespace()).collect();
        let mut walk = Walk { lines: vec![format!("org 0x{org:X}"), String::new()], covered: 0 };
        for seg in segments(&body) {
            match seg {
                Segment::Bytes(inner) => {
                    let bytes = decode_hex_bytes(inner).map_err(|source| DecompileError { offset: walk.covered, source })?;
                    walk.hex(&bytes);
                }
                Segment::Comment(text) => walk.lines.push(format!("# {text}")),
                Segment::Raw(raw) => self.walk_words(&hex_pairs(raw), &mut walk),
            }
        }
        debug!(org = format_args!("{org:#x}"), bytes = walk.covered, lines = walk.lines.len(), "decompiled");
        Ok(Decompiled { org, lines: walk.lines, covered: walk.covered })
    }

    fn walk_words(&self, buf: &[u8], walk: &mut Walk) {
        let n = buf.len();
        let mut i = 0;
        while i + 4 <= n {
            let word = &buf[i..i + 4];
            let raw = u32::from(word[2] & 0x0F) << 16 | u32::from(word[1]) << 8 | u32::from(word[0]);
            i += 4;
            walk.covered += 4;
            if raw > self.range.max_call_address {
                walk.lines.push(format!("hex {}", spaced_hex(word)));
                continue;
            }
            let addr = self.degrade(raw);
            trace!(raw = format_args!("{raw:#07x}"), addr = format_args!("{addr:#07x}"), "word");

            if let Some(text) = self.labels.get(addr) {
                walk.lines.push(text.to_string());
                if let Some((_, regs)) = popped_registers(text) {
                    let total: usize = regs.iter().map(|r| reg_bytes(r)).sum();
                    if total > 0 && i + total <= n {
                        walk.hex(&buf[i..i + total]);
                        i += total;
                    }
                }
            } else if let Some(text) = self.gadgets.get(addr) {
                i = self.gadget(text.trim(), buf, i, walk);
            } else if self.disasm.contains(addr) {
                walk.lines.push(format!("call 0x{addr:X}"));
                let total = self.popped_by_routine(addr);
                if total > 0 && i + total <= n {
                    walk.hex(&buf[i..i + total]);
                    i += total;
                }
            } else {
                walk.lines.push(format!("call 0x{addr:X}"));
            }
        }
        if i < n {
            walk.hex(&buf[i..]);
        }
    }

    fn gadget(&self, text: &str, buf: &[u8], mut i: usize, walk: &mut Walk) -> usize {
        let lower = text.to_ascii_lowercase();
        let direct_sp = lower.starts_with("sp=") || lower.starts_with("sp =");
        let popped = popped_registers(text);
        let Some((before, regs)) = popped.filter(|_| !direct_sp) else {
            walk.lines.push(text.to_string());
            return i;
        };
        let total: usize = regs.iter().map(|r| reg_bytes(r)).sum();
        if total > 0 && i + total <= buf.len() {
            for r in &regs {
                let w = reg_bytes(r);
                if w == 0 {
                    continue;
                }
                walk.lines.push(format!("{r} = hex {}", spaced_hex(&buf[i..i + w])));
                walk.covered += w;
                i += w;
            }
        } else if !before.is_empty() {
            walk.lines.push(text.to_string());
        }
        i
    }

    /// Bytes a disassembled routine pops before returning, from a shadow
    /// walk of its push/pop instructions.
    pub fn popped_by_routine(&self, addr: u32) -> usize {
        let mut pushed: Vec<&str> = Vec::new();
        let mut total = 0;
        let mut cur = Some(addr);
        for _ in 0..MAX_WALK {
            let Some(at) = cur else { break };
            let Some(inst) = self.disasm.get(at) else { break };
            let inst = inst.trim();
            if let Some(reg) = inst.strip_prefix("push ") {
                pushed.push(reg.split_whitespace().next().unwrap_or(""));
            } else if let Some(reg) = inst.strip_prefix("pop ") {
                let reg = reg.split_whitespace().next().unwrap_or("");
                if reg == "pc" {
                    break;
                }
                match pushed.iter().position(|p| *p == reg) {
                    Some(k) => {
                        pushed.remove(k);
                    }
                    None => total += reg_bytes(reg),
                }
            } else if inst.ends_with("leave") {
                total += LEAVE_BYTES;
            } else if inst.starts_with("rt") || inst.starts_with("bl ") || inst.starts_with("b ") {
                break;
            }
            cur = self.disasm.next_after(at);
        }
        total
    }
}

struct Walk {
    lines: Vec<String>,
    covered: usize,
}

impl Walk {
    fn hex(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.lines.push(format!("hex {}", spaced_hex(bytes)));
        self.covered += bytes.len();
    }
}

/// Convenience wrapper over [`Decompiler`].
pub fn decompile(
    hex_text: &str,
    disasm: &Disassembly,
    gadgets: &AddressTable,
    labels: &AddressTable,
    range: DecompileRange,
) -> Result<Decompiled, DecompileError> {
    Decompiler::new(disasm, gadgets, labels, range).decompile(hex_text)
}
