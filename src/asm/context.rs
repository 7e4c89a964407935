use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, warn};

use super::directive::{CallTarget, Directive, Generator, LabelRef, StrDirective, Template, TemplateVar};
use super::placement::{place_for_loader, search_home, wrap16};
use super::templates;
use super::{Assembled, OutputFormat, TargetMode};
use crate::charset::Charset;
use crate::config::TargetConfig;
use crate::error::{CompileError, Error, Note, Result};
use crate::keys::KeyCost;
use crate::symbols::{Added, Registry, TAG_RT};
use crate::text::{add_le, canonicalize, hex_digits_le, strip_inline_comment};

/// Nested expansions allowed below one source line.
pub const MAX_EXPANSION_DEPTH: usize = 64;

/// The program has to fit a 16-bit address space.
pub const MAX_PROGRAM_LEN: usize = 0x10000;

/// Keystroke cost above which an emitted byte earns a note.
const MANY_KEYPRESSES: u32 = 100;

#[derive(Debug, Clone)]
enum Fixup {
    /// Two bytes: `home + labels[label] + offset`, or `base + ...` when given.
    Address { pos: usize, offset: i64, label: String, base: Option<u32>, line: usize },
    /// One byte: `(left - right) mod 256`.
    Arith { pos: usize, left: LabelRef, right: LabelRef, line: usize },
    /// Two bytes: final program length.
    Length { pos: usize },
    /// Two bytes: bytes from `pos` to the end of the program.
    Remaining { pos: usize },
}

enum Work {
    Line { text: String, depth: usize },
    /// Checks that a register load produced exactly `expected` bytes.
    Width { reg: String, value: String, start: usize, expected: usize },
}

/// Everything one compilation mutates. Created per invocation.
pub struct Context<'a> {
    registry: Cow<'a, Registry>,
    keys: &'a KeyCost,
    charset: &'a Charset,
    config: &'a TargetConfig,
    format: OutputFormat,

    buf: Vec<u8>,
    labels: HashMap<String, usize>,
    fixups: Vec<Fixup>,
    resolved: HashSet<usize>,
    home: Option<i64>,

    string_vars: HashMap<String, String>,
    src: Option<String>,
    backup: Option<String>,
    in_comment: bool,

    notes: Vec<Note>,
    line: usize,
    texts: Vec<String>,
}

/// Canonical form of a source line. Everything but `str` lines is lower-cased
/// so that string literals keep their case.
fn normalize(raw: &str) -> String {
    let line = canonicalize(strip_inline_comment(raw));
    match line.get(..3) {
        Some(head) if head.eq_ignore_ascii_case("str") => format!("str{}", &line[3..]),
        _ => line.to_lowercase(),
    }
}

impl<'a> Context<'a> {
    pub fn new(
        registry: &'a Registry,
        keys: &'a KeyCost,
        charset: &'a Charset,
        config: &'a TargetConfig,
        format: OutputFormat,
    ) -> Self {
        Self {
            registry: Cow::Borrowed(registry),
            keys,
            charset,
            config,
            format,
            buf: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            resolved: HashSet::new(),
            home: None,
            string_vars: HashMap::new(),
            src: None,
            backup: None,
            in_comment: false,
            notes: Vec::new(),
            line: 0,
            texts: Vec::new(),
        }
    }

    fn fail(&self, line: usize, source: Error) -> CompileError {
        let text = line.checked_sub(1).and_then(|i| self.texts.get(i)).cloned().unwrap_or_default();
        CompileError { line, text, source }
    }

    fn note(&mut self, message: String) {
        warn!(line = self.line, "{message}");
        self.notes.push(Note { line: self.line, message });
    }

    /// Processes one source line, including everything it expands to.
    pub fn feed(&mut self, raw: &str) -> Result<(), CompileError> {
        let text = normalize(raw);
        self.texts.push(text.clone());
        self.line = self.texts.len();

        let before = self.buf.len();
        self.run(text).map_err(|e| self.fail(self.line, e))?;

        if self.format == OutputFormat::Keystroke
            && self.buf[before..].iter().any(|&b| b != 0 && self.keys.cost(b) > MANY_KEYPRESSES)
        {
            self.note("line generates many keypresses".to_string());
        }
        Ok(())
    }

    fn run(&mut self, text: String) -> Result<()> {
        let mut work = vec![Work::Line { text, depth: 0 }];
        while let Some(item) = work.pop() {
            match item {
                Work::Line { text, depth } => {
                    if depth > MAX_EXPANSION_DEPTH {
                        return Err(Error::ExpansionTooDeep(MAX_EXPANSION_DEPTH));
                    }
                    self.step(&text, depth, &mut work)?;
                }
                Work::Width { reg, value, start, expected } => {
                    let actual = self.buf.len() - start;
                    if actual != expected {
                        return Err(Error::WidthMismatch { reg, value, expected, actual });
                    }
                }
            }
        }
        Ok(())
    }

    /// Schedules `lines` to run next, in order, one level deeper.
    fn expand<I>(work: &mut Vec<Work>, lines: I, depth: usize)
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: DoubleEndedIterator,
    {
        for line in lines.into_iter().rev() {
            work.push(Work::Line { text: canonicalize(&line), depth: depth + 1 });
        }
    }

    /// Rejects a repeat count that could not fit in the program.
    fn reserve(&self, count: usize) -> Result<()> {
        let limit = MAX_PROGRAM_LEN.saturating_sub(self.buf.len());
        if count > limit {
            return Err(Error::ProgramTooLong { len: self.buf.len().saturating_add(count), limit: MAX_PROGRAM_LEN });
        }
        Ok(())
    }

    fn step(&mut self, text: &str, depth: usize, work: &mut Vec<Work>) -> Result<()> {
        if let Some(rest) = text.strip_prefix("/*") {
            self.in_comment = !rest.contains("*/");
            return Ok(());
        }
        if text.contains("*/") {
            self.in_comment = false;
            return Ok(());
        }
        if self.in_comment {
            return Ok(());
        }

        match Directive::parse(text, &self.registry)? {
            Directive::Empty => {}
            Directive::Compound(clauses) => Self::expand(work, clauses, depth),
            Directive::Label(name) => {
                if self.labels.contains_key(&name) {
                    return Err(Error::DuplicateLabel(name));
                }
                self.labels.insert(name, self.buf.len());
            }
            Directive::Literal { digits, adjust } => {
                let mut bytes = hex_digits_le(&digits)?;
                add_le(&mut bytes, adjust);
                self.buf.extend(bytes);
            }
            Directive::Hex(bytes) => self.buf.extend(bytes),
            Directive::Call(target) => self.emit_call(target)?,
            Directive::Goto(label) => {
                let lines = [format!("er6=adr_of[-2]{label}"), "call sp=er6,pop er8".to_string()];
                Self::expand(work, lines, depth);
            }
            Directive::AdrOf { label, offset, base } => {
                let pos = self.placeholder(2);
                self.fixups.push(Fixup::Address { pos, offset, label, base, line: self.line });
            }
            Directive::DataRef { address, offset } => {
                let value = i64::from(address) + offset;
                let value = u32::try_from(value)
                    .ok()
                    .filter(|&v| v <= self.config.max_call_address)
                    .ok_or(Error::AddressOutOfRange { addr: value, max: self.config.max_call_address })?;
                let width = if value > 0xFFFF { 3 } else { 2 };
                self.buf.extend_from_slice(&value.to_le_bytes()[..width]);
            }
            Directive::Pop { reg, width, value } => {
                self.emit_call(CallTarget::Name(format!("pop {reg}")))?;
                let clauses: Vec<String> = value.split(',').map(str::to_string).collect();
                work.push(Work::Width { reg, value, start: self.buf.len(), expected: width });
                Self::expand(work, clauses, depth);
            }
            Directive::Generator(Generator::Repeat { count, line }) => {
                self.reserve(count)?;
                Self::expand(work, vec![line; count], depth);
            }
            Directive::Generator(Generator::SplitSum(total)) => {
                let (a, b) = self.keys.optimize_split_sum(wrap16(total));
                Self::expand(work, [format!("0x{a:04x}"), format!("0x{b:04x}")], depth);
            }
            Directive::Org(addr) => self.org(addr)?,
            Directive::Fill { byte, count } => {
                self.reserve(count)?;
                self.buf.extend(std::iter::repeat(byte).take(count));
            }
            Directive::SetVar(TemplateVar::Src, v) => self.src = Some(v),
            Directive::SetVar(TemplateVar::Backup, v) => self.backup = Some(v),
            Directive::Template(t) => {
                let src = self.template_var(TemplateVar::Src)?;
                let backup = self.template_var(TemplateVar::Backup)?;
                let lines = match t {
                    Template::Loop580(tail) => templates::loop580(&src, &backup, &tail),
                    Template::Loop880 => templates::loop880(&src, &backup),
                    Template::Backup580 => templates::backup580(&src, &backup),
                    Template::Backup880 => templates::backup880(&src, &backup),
                };
                Self::expand(work, lines, depth);
            }
            Directive::SetupLoop { src, backup, label } => {
                Self::expand(work, templates::setup_loop(&src, &backup, &label), depth);
            }
            Directive::AdrArith { left, right } => {
                let pos = self.placeholder(1);
                self.fixups.push(Fixup::Arith { pos, left, right, line: self.line });
            }
            Directive::PrLength => {
                let pos = self.placeholder(2);
                self.fixups.push(Fixup::Length { pos });
            }
            Directive::RemainingLength => {
                let pos = self.placeholder(2);
                self.fixups.push(Fixup::Remaining { pos });
            }
            Directive::DefineCmd { old, new } => {
                if self.registry.to_mut().alias(&old, &new)? == Added::Duplicate {
                    self.note(format!("duplicated command {new}"));
                }
            }
            Directive::DefineGadget { address, name } => {
                let added = self.registry.to_mut().add_command(&name, address, vec![TAG_RT.to_string()])?;
                if added == Added::Duplicate {
                    self.note(format!("duplicated command {name}"));
                }
            }
            Directive::Str(s) => self.string(s)?,
        }
        Ok(())
    }

    fn placeholder(&mut self, width: usize) -> usize {
        let pos = self.buf.len();
        self.buf.resize(pos + width, 0);
        pos
    }

    fn emit_call(&mut self, target: CallTarget) -> Result<()> {
        let addr = match target {
            CallTarget::Address(addr) => addr,
            CallTarget::Name(name) => {
                let gadget = self.registry.command(&name).ok_or_else(|| Error::UnknownCommand(name.clone()))?;
                let addr = gadget.address;
                let warnings: Vec<String> = gadget.warnings().map(str::to_string).collect();
                for w in warnings {
                    self.note(w);
                }
                addr
            }
        };
        let max = self.config.max_call_address;
        if addr > max {
            return Err(Error::AddressOutOfRange { addr: i64::from(addr), max });
        }
        let addr = self.keys.optimize_address(addr);
        self.buf.extend_from_slice(&addr.to_le_bytes());
        Ok(())
    }

    fn org(&mut self, addr: i64) -> Result<()> {
        let lo = self.config.layout.ram_start;
        if addr < i64::from(lo) || addr > 0xFFFF {
            return Err(Error::OrgOutOfRange { addr, lo, hi: 0xFFFF });
        }
        let home = addr - self.buf.len() as i64;
        match self.home {
            Some(old) if old != home => Err(Error::InconsistentHome { old, new: home }),
            _ => {
                self.home = Some(home);
                Ok(())
            }
        }
    }

    fn template_var(&self, var: TemplateVar) -> Result<String> {
        let value = match var {
            TemplateVar::Src => &self.src,
            TemplateVar::Backup => &self.backup,
        };
        value.clone().ok_or(Error::UndefinedTemplateVar(var.name()))
    }

    fn string(&mut self, s: StrDirective) -> Result<()> {
        let text = match s {
            StrDirective::Define { var, text } => {
                self.string_vars.insert(var, text);
                return Ok(());
            }
            StrDirective::Use(var) => self
                .string_vars
                .get(&var)
                .cloned()
                .ok_or(Error::UndefinedStringVar(var))?,
            StrDirective::Emit(text) => text,
        };
        let bytes = self.charset.encode(&text)?;
        self.buf.extend(bytes);
        Ok(())
    }

    /// Writes a resolved value over its placeholder.
    fn patch(&mut self, pos: usize, bytes: &[u8]) -> Result<()> {
        let slot = &mut self.buf[pos..pos + bytes.len()];
        if !self.resolved.insert(pos) || slot.iter().any(|&b| b != 0) {
            return Err(Error::DoubleResolve(pos));
        }
        slot.copy_from_slice(bytes);
        Ok(())
    }

    fn label(&self, name: &str) -> Result<usize> {
        self.labels.get(name).copied().ok_or_else(|| Error::UnresolvedLabel(name.to_string()))
    }

    /// Resolves the fixups that do not depend on placement.
    fn finish_processing(&mut self) -> Result<(), CompileError> {
        let len = self.buf.len();
        let fixups = self.fixups.clone();
        for fixup in &fixups {
            let (line, result) = match fixup {
                Fixup::Arith { pos, left, right, line } => {
                    let value = self.label(&left.label).and_then(|l| {
                        let r = self.label(&right.label)?;
                        Ok((l as i64 + left.offset) - (r as i64 + right.offset))
                    });
                    (*line, value.and_then(|v| self.patch(*pos, &[v as u8])))
                }
                Fixup::Length { pos } => (0, self.patch(*pos, &(len as u16).to_le_bytes())),
                Fixup::Remaining { pos } => (0, self.patch(*pos, &((len - pos) as u16).to_le_bytes())),
                Fixup::Address { .. } => continue,
            };
            result.map_err(|e| self.fail(line, e))?;
        }
        Ok(())
    }

    /// Finalizes the buffer, picks `home` and patches every address fixup.
    pub fn finish(mut self, mode: TargetMode, initial_sp: u32) -> Result<Assembled, CompileError> {
        self.line = 0;
        self.finish_processing()?;

        let config = self.config;
        let layout = &config.layout;
        if mode == TargetMode::Overflow && self.buf.len() > layout.overflow_window {
            let limit = layout.overflow_window;
            return Err(self.fail(0, Error::ProgramTooLong { len: self.buf.len(), limit }));
        }

        let mut load_adjust = 0;
        let home = match (self.home, mode) {
            (Some(home), _) => home,
            (None, TargetMode::None | TargetMode::Overflow) => {
                let start = i64::from(initial_sp) - self.labels.get("home").copied().unwrap_or(0) as i64;
                let end = start + self.buf.len() as i64;
                if end > i64::from(layout.ram_end) {
                    let room = i64::from(layout.ram_end) - start;
                    self.note(format!("program length after home = {} bytes > {room} bytes", self.buf.len()));
                }
                let targets = self.relative_targets().map_err(|(line, e)| self.fail(line, e))?;
                search_home(layout, self.keys, start, self.buf.len(), &targets).map_err(|e| self.fail(0, e))?
            }
            (None, TargetMode::Loader) => {
                let home_label = self.labels.get("home").copied().unwrap_or(0);
                let threshold = layout.cost_threshold;
                let placed = place_for_loader(&config.loader, self.keys, threshold, &mut self.buf, home_label)
                    .map_err(|e| self.fail(0, e))?;
                load_adjust = placed.adjust;
                placed.home
            }
        };
        let home_u32 = u32::try_from(home).map_err(|_| self.fail(0, Error::NoPlacement { lo: home, hi: home }))?;
        debug!(home = format_args!("{home:#06x}"), "placement fixed");

        let fixups = std::mem::take(&mut self.fixups);
        for fixup in fixups {
            if let Fixup::Address { pos, offset, label, base, line } = fixup {
                let target = self.label(&label).map_err(|e| self.fail(line, e))? as i64 + offset;
                let value = wrap16(base.map_or(home, i64::from) + target);
                self.patch(pos, &[value as u8, (value >> 8) as u8]).map_err(|e| self.fail(line, e))?;
            }
        }

        let labels: BTreeMap<String, u32> =
            self.labels.iter().map(|(name, &pos)| (name.clone(), wrap16(home + pos as i64))).collect();
        for (name, addr) in &labels {
            debug!("label {name} is at address {addr:#06X}");
        }
        let end = home_u32 + self.buf.len() as u32;
        info!(len = self.buf.len(), end = format_args!("{end:#06x}"), "program assembled");

        Ok(Assembled {
            mode,
            bytes: self.buf,
            home: home_u32,
            load_adjust,
            end,
            labels,
            notes: self.notes,
        })
    }

    /// Home-relative offsets of every address fixup that follows placement.
    fn relative_targets(&self) -> Result<Vec<i64>, (usize, Error)> {
        self.fixups
            .iter()
            .filter_map(|f| match f {
                Fixup::Address { offset, label, base: None, line, .. } => {
                    Some(self.label(label).map(|p| p as i64 + offset).map_err(|e| (*line, e)))
                }
                _ => None,
            })
            .collect()
    }
}
