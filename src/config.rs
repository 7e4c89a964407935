//! Per-target configuration and the table files it points at.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::charset::Charset;
use crate::disasm::Disassembly;
use crate::keys::KeyCost;
use crate::symbols::{AddressTable, Registry};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub ram_start: u32,
    pub ram_end: u32,
    pub search_floor: u32,
    pub stride: u32,
    pub overflow_base: u32,
    pub overflow_window: usize,
    pub cost_threshold: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            ram_start: 0x8000,
            ram_end: 0x8E00,
            search_floor: 0x8154 + 200,
            stride: 100,
            overflow_base: 0x8154,
            overflow_window: 100,
            cost_threshold: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderLayout {
    pub base: u32,
    /// Bytes before the little-endian entry point.
    pub trampoline_head: Vec<u8>,
    /// Bytes after the entry point.
    pub trampoline_tail: Vec<u8>,
    pub pad_to: u32,
    pub signature: Vec<u8>,
    pub floor: u32,
}

impl Default for LoaderLayout {
    fn default() -> Self {
        Self {
            base: 0x85B0,
            trampoline_head: vec![0x6a, 0x4f, 0x00, 0x00],
            trampoline_tail: vec![0x68, 0x4f, 0x00, 0x00],
            pad_to: 0x85D7,
            signature: vec![0xff, 0xae, 0x85],
            floor: 0x8501,
        }
    }
}

/// Legal range for decompiler `org` headers and the call-address ceiling.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DecompileRange {
    pub start_ram: u32,
    pub end_ram: u32,
    pub max_call_address: u32,
}

impl Default for DecompileRange {
    fn default() -> Self {
        Self { start_ram: 0x9000, end_ram: 0xFFFF, max_call_address: 0x3FFFF }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TablePaths {
    pub gadgets: Option<PathBuf>,
    pub data_labels: Option<PathBuf>,
    pub rename_list: Option<PathBuf>,
    pub disassembly: Option<PathBuf>,
    pub keys: Option<PathBuf>,
    pub charset: Option<PathBuf>,
    pub decompile_gadgets: Option<PathBuf>,
    pub decompile_labels: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub name: String,
    pub max_call_address: u32,
    pub layout: Layout,
    pub loader: LoaderLayout,
    pub decompile: DecompileRange,
    pub tables: TablePaths,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: String::from("default"),
            max_call_address: 0xFFFFF,
            layout: Layout::default(),
            loader: LoaderLayout::default(),
            decompile: DecompileRange::default(),
            tables: TablePaths::default(),
        }
    }
}

impl TargetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        anyhow::ensure!(cfg.layout.stride > 0, "layout.stride must be positive");
        anyhow::ensure!(cfg.layout.ram_start <= cfg.layout.ram_end, "layout.ram_start above ram_end");
        debug!(name = %cfg.name, "loaded target config");
        Ok(cfg)
    }
}

/// Everything read from a target's table files, built once per invocation.
#[derive(Debug, Default)]
pub struct Tables {
    pub registry: Registry,
    pub keys: KeyCost,
    pub charset: Charset,
    pub disasm: Disassembly,
    pub decompile_gadgets: AddressTable,
    pub decompile_labels: AddressTable,
}

impl Tables {
    /// Reads every configured table; relative paths resolve against `base_dir`.
    pub fn load(cfg: &TargetConfig, base_dir: &Path) -> Result<Self> {
        let read = |p: &Option<PathBuf>| -> Result<Option<(String, String)>> {
            let Some(p) = p else { return Ok(None) };
            let full = if p.is_absolute() { p.clone() } else { base_dir.join(p) };
            let text = fs::read_to_string(&full).with_context(|| format!("reading {}", full.display()))?;
            Ok(Some((full.display().to_string(), text)))
        };

        let mut t = Tables::default();
        let paths = &cfg.tables;
        if let Some((_, text)) = read(&paths.disassembly)? {
            t.disasm = Disassembly::parse(&text);
        }
        if let Some((origin, text)) = read(&paths.gadgets)? {
            for note in t.registry.load_gadgets(&text, &origin)? {
                warn!(%origin, "{note}");
            }
        }
        if let Some((origin, text)) = read(&paths.data_labels)? {
            t.registry.load_data_labels(&text, &origin)?;
        }
        if let Some((origin, text)) = read(&paths.rename_list)? {
            for note in t.registry.load_rename_list(&text, &origin, &t.disasm)? {
                warn!(%origin, "{note}");
            }
        }
        if let Some((origin, text)) = read(&paths.keys)? {
            t.keys = KeyCost::parse(&text).with_context(|| format!("in {origin}"))?;
        }
        if let Some((origin, text)) = read(&paths.charset)? {
            t.charset = Charset::parse(&text).with_context(|| format!("in {origin}"))?;
        }
        if let Some((_, text)) = read(&paths.decompile_gadgets)? {
            t.decompile_gadgets = AddressTable::parse(&text);
        }
        if let Some((_, text)) = read(&paths.decompile_labels)? {
            t.decompile_labels = AddressTable::parse(&text);
        }
        debug!(commands = t.registry.len(), disasm = t.disasm.len(), "tables loaded");
        Ok(t)
    }
}
