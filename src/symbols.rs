//! Gadget and data-label registry built from the per-target table files.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::disasm::Disassembly;
use crate::error::{Error, Note, Result, TableError};
use crate::text::{canonicalize, strip_inline_comment};

pub const TAG_RT: &str = "rt";
pub const TAG_DEL_LR: &str = "del lr";
pub const TAG_OVERRIDE_RENAME: &str = "override rename list";

/// A named gadget in the target firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gadget {
    pub address: u32,
    pub tags: Vec<String>,
}

impl Gadget {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Tags that should be surfaced as notes whenever the gadget is used.
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str).filter(|t| t.starts_with("warning"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    New,
    /// Same name, address and tags were already present.
    Duplicate,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    commands: HashMap<String, Gadget>,
    data: HashMap<String, u32>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(&self, name: &str) -> Option<&Gadget> {
        self.commands.get(name)
    }

    pub fn data_label(&self, name: &str) -> Option<u32> {
        self.data.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn add_command(&mut self, name: &str, address: u32, tags: Vec<String>) -> Result<Added> {
        validate_command_name(name)?;
        let gadget = Gadget { address, tags };
        match self.commands.get(name) {
            Some(prev) if *prev == gadget => Ok(Added::Duplicate),
            Some(_) => Err(Error::ConflictingCommand(name.to_string())),
            None => {
                self.commands.insert(name.to_string(), gadget);
                Ok(Added::New)
            }
        }
    }

    pub fn define_data_label(&mut self, name: &str, address: u32) {
        self.data.insert(name.to_string(), address);
    }

    /// Makes `new` refer to whatever `old` names, command or data label.
    pub fn alias(&mut self, old: &str, new: &str) -> Result<Added> {
        if let Some(g) = self.commands.get(old).cloned() {
            return self.add_command(new, g.address, g.tags);
        }
        if let Some(addr) = self.data.get(old).copied() {
            self.data.insert(new.to_string(), addr);
            return Ok(Added::New);
        }
        Err(Error::UnknownCommand(old.to_string()))
    }

    /// Reads a gadget list: `<hex address> [{tag}...]<command>` per line.
    pub fn load_gadgets(&mut self, text: &str, origin: &str) -> Result<Vec<Note>, TableError> {
        let mut notes = Vec::new();
        let mut in_comment = false;
        for (idx, raw) in text.lines().enumerate() {
            let at = |source| TableError { origin: origin.to_string(), line: idx + 1, source };
            let line = raw.trim();
            if line == "/*" {
                in_comment = true;
                continue;
            }
            if line == "*/" {
                in_comment = false;
                continue;
            }
            if in_comment {
                continue;
            }
            let line = strip_inline_comment(line);
            if line.is_empty() {
                continue;
            }
            let (address, command) = split_address_line(line).ok_or_else(|| at(Error::BadTableLine(line.to_string())))?;
            let command = canonicalize(command).to_lowercase();
            let (tags, name) = peel_tags(&command).map_err(at)?;
            if self.add_command(name, address, tags).map_err(at)? == Added::Duplicate {
                let message = format!("duplicated command {name}");
                warn!(origin, line = idx + 1, "{message}");
                notes.push(Note { line: idx + 1, message });
            }
        }
        debug!(origin, commands = self.commands.len(), "loaded gadget list");
        Ok(notes)
    }

    /// Reads `<hex address> <name>` data labels.
    pub fn load_data_labels(&mut self, text: &str, origin: &str) -> Result<(), TableError> {
        for (idx, raw) in text.lines().enumerate() {
            let line = strip_inline_comment(raw.trim());
            if line.is_empty() {
                continue;
            }
            let (address, name) = split_address_line(line).ok_or_else(|| TableError {
                origin: origin.to_string(),
                line: idx + 1,
                source: Error::BadTableLine(line.to_string()),
            })?;
            self.define_data_label(&canonicalize(name).to_lowercase(), address);
        }
        Ok(())
    }

    /// Reads a rename list (`<raw token> <name>`), consulting the disassembly
    /// to decide whether each function entry needs the `del lr` tag.
    pub fn load_rename_list(
        &mut self,
        text: &str,
        origin: &str,
        disasm: &Disassembly,
    ) -> Result<Vec<Note>, TableError> {
        let mut notes = Vec::new();
        let mut last_global: Option<u32> = None;
        for (idx, line) in text.lines().enumerate() {
            let at = |source| TableError { origin: origin.to_string(), line: idx + 1, source };
            let Some((raw, real)) = split_rename_line(line) else { continue };
            if real.starts_with('.') {
                continue;
            }
            if let Some(addr) = raw.strip_prefix("d_").and_then(hex_full) {
                self.define_data_label(real, addr);
                continue;
            }

            let addr = if let Some(a) = hex_full(raw) {
                last_global = None;
                a
            } else if let Some(rest) = raw.strip_prefix("f_") {
                let split = rest.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(rest.len());
                let global = hex_full(&rest[..split]).ok_or_else(|| at(Error::BadTableLine(line.to_string())))?;
                let tail = &rest[split..];
                if tail.is_empty() {
                    last_global = Some(global);
                    global
                } else {
                    let local = local_offset(tail).ok_or_else(|| at(Error::BadTableLine(line.to_string())))?;
                    global + local
                }
            } else if let Some(local) = local_offset(raw) {
                let global = last_global.ok_or_else(|| at(Error::OrphanLocalLabel(raw.to_string())))?;
                global + local
            } else {
                return Err(at(Error::BadTableLine(line.to_string())));
            };

            let (addr, tags) = entry_tags(addr, disasm).map_err(at)?;

            if let Some(prev) = self.commands.get(real) {
                if prev.has_tag(TAG_OVERRIDE_RENAME) {
                    continue;
                }
            }
            if self.add_command(real, addr, tags).map_err(at)? == Added::Duplicate {
                let message = format!("duplicated command {real}");
                warn!(origin, line = idx + 1, "{message}");
                notes.push(Note { line: idx + 1, message });
            }
        }
        Ok(notes)
    }
}

fn validate_command_name(name: &str) -> Result<()> {
    let bad = |reason| Err(Error::BadCommandName { name: name.to_string(), reason });
    if name.is_empty() {
        return bad("empty command");
    }
    for prefix in ["0x", "call", "goto", "adr_of"] {
        if name.starts_with(prefix) {
            return bad("reserved prefix");
        }
    }
    if name.ends_with(':') {
        return bad("ends with `:`");
    }
    if name.contains(';') {
        return bad("contains `;`");
    }
    Ok(())
}

fn split_address_line(line: &str) -> Option<(u32, &str)> {
    let split = line.find(char::is_whitespace)?;
    let (addr, rest) = line.split_at(split);
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }
    Some((hex_full(addr)?, rest))
}

fn peel_tags(command: &str) -> Result<(Vec<String>, &str)> {
    let mut tags = Vec::new();
    let mut rest = command;
    while let Some(inner) = rest.strip_prefix('{') {
        let end = inner.find('}').ok_or(Error::UnmatchedTag)?;
        tags.push(inner[..end].to_string());
        rest = &inner[end + 1..];
    }
    Ok((tags, rest))
}

fn hex_full(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn split_rename_line(line: &str) -> Option<(&str, &str)> {
    let mut it = line.split_whitespace();
    let raw = it.next()?;
    let second = it.next()?;
    if !raw.chars().all(is_word_char) {
        return None;
    }
    let end = second.find(|c: char| !is_word_char(c)).unwrap_or(second.len());
    let real = &second[..end];
    if real.is_empty() {
        return None;
    }
    Some((raw, real))
}

/// `.l_<hex>` (any single leading character is accepted in place of the dot).
fn local_offset(tok: &str) -> Option<u32> {
    let mut chars = tok.chars();
    chars.next()?;
    hex_full(chars.as_str().strip_prefix("l_")?)
}

/// Function entries that begin with `push lr` are entered past it and must
/// drop the link register; others keep `rt` unless their first exit is not a
/// plain `rt`.
fn entry_tags(addr: u32, disasm: &Disassembly) -> Result<(u32, Vec<String>)> {
    let limit = disasm.len();
    if addr >= limit {
        return Err(Error::ScanOutOfRange(addr));
    }
    if disasm.get(addr).unwrap_or("").starts_with("push lr") {
        return Ok((addr + 2, vec![TAG_DEL_LR.to_string()]));
    }
    let mut tags = vec![TAG_RT.to_string()];
    let mut a = addr + 2;
    let exit = loop {
        if a >= limit {
            return Err(Error::ScanOutOfRange(addr));
        }
        let insn = disasm.get(a).unwrap_or("");
        if ["push lr", "pop pc", "rt"].iter().any(|p| insn.starts_with(p)) {
            break insn;
        }
        a += 2;
    };
    if !exit.starts_with("rt") {
        tags.push(TAG_DEL_LR.to_string());
    }
    Ok((addr, tags))
}

/// Address → text table used by the decompiler for gadgets and labels.
#[derive(Debug, Clone, Default)]
pub struct AddressTable {
    entries: BTreeMap<u32, String>,
}

impl AddressTable {
    /// Lines are `<hex address> <text>`, optionally `@`-prefixed; `#` lines
    /// and unparsable lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(split) = line.find(char::is_whitespace) else { continue };
            let key = line[..split].to_ascii_lowercase();
            let key = key.strip_prefix('@').unwrap_or(&key);
            if let Ok(addr) = u32::from_str_radix(key, 16) {
                entries.insert(addr, line[split..].trim().to_string());
            }
        }
        Self { entries }
    }

    pub fn insert(&mut self, addr: u32, text: &str) {
        self.entries.insert(addr, text.to_string());
    }

    pub fn get(&self, addr: u32) -> Option<&str> {
        self.entries.get(&addr).map(String::as_str)
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.entries.contains_key(&addr)
    }
}
