//! The hackstring assembler: line processing, deferred fixups, placement.

mod context;
pub mod directive;
pub mod placement;
mod render;
pub mod templates;

use std::collections::BTreeMap;

use tracing::debug;

pub use context::MAX_EXPANSION_DEPTH;
use context::Context;

use crate::charset::Charset;
use crate::config::{Tables, TargetConfig};
use crate::error::{CompileError, Note};
use crate::keys::KeyCost;
use crate::symbols::Registry;

/// How the payload reaches memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// Plain buffer at a searched or `org`-fixed base.
    None,
    /// Rotated into the fixed-size input-overflow window.
    Overflow,
    /// Installed through the device loader table, with trampoline.
    Loader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Hex,
    Keystroke,
}

/// A successfully placed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub mode: TargetMode,
    pub bytes: Vec<u8>,
    pub home: u32,
    /// Zero bytes the loader prepends so the load address is cheap to type.
    pub load_adjust: u32,
    /// `home + bytes.len()`.
    pub end: u32,
    pub labels: BTreeMap<String, u32>,
    pub notes: Vec<Note>,
}

pub struct Assembler<'a> {
    registry: &'a Registry,
    keys: &'a KeyCost,
    charset: &'a Charset,
    config: &'a TargetConfig,
}

impl<'a> Assembler<'a> {
    pub fn new(registry: &'a Registry, keys: &'a KeyCost, charset: &'a Charset, config: &'a TargetConfig) -> Self {
        Self { registry, keys, charset, config }
    }

    pub fn from_tables(tables: &'a Tables, config: &'a TargetConfig) -> Self {
        Self::new(&tables.registry, &tables.keys, &tables.charset, config)
    }

    /// Assembles `source` and places it for `mode`. `initial_sp` is the stack
    /// pointer right after the overflow; it seeds the placement search when
    /// the program has no `org`.
    pub fn compile(
        &self,
        source: &str,
        mode: TargetMode,
        format: OutputFormat,
        initial_sp: u32,
    ) -> Result<Assembled, CompileError> {
        let mut ctx = Context::new(self.registry, self.keys, self.charset, self.config, format);
        for line in source.lines() {
            ctx.feed(line)?;
        }
        let out = ctx.finish(mode, initial_sp)?;
        debug!(notes = out.notes.len(), "compile finished");
        Ok(out)
    }
}
