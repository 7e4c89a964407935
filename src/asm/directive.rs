//! One canonical source line → one [`Directive`].
//!
//! Forms are tried in a fixed order and the first that matches wins; the
//! order of the checks in [`Directive::parse`] is the precedence of the
//! language.

use crate::error::{Error, Result};
use crate::symbols::Registry;
use crate::text::{bracket_groups, canonicalize, decode_hex_bytes, eval_sum, parse_hex, parse_int};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Address(u32),
    Name(String),
}

/// `[offset] label` operand of `adr_arith`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRef {
    pub offset: i64,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateVar {
    Src,
    Backup,
}

impl TemplateVar {
    pub fn name(self) -> &'static str {
        match self {
            TemplateVar::Src => "src",
            TemplateVar::Backup => "backup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    /// Carries the hex bytes placed after the `length:` label.
    Loop580(String),
    Loop880,
    Backup580,
    Backup880,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generator {
    Repeat { count: usize, line: String },
    SplitSum(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrDirective {
    Define { var: String, text: String },
    Use(String),
    Emit(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Empty,
    Compound(Vec<String>),
    Label(String),
    /// `0x<digits>[+-n]`: `digits.len() / 2` bytes, little-endian.
    Literal { digits: String, adjust: i64 },
    Hex(Vec<u8>),
    Call(CallTarget),
    Goto(String),
    AdrOf { label: String, offset: i64, base: Option<u32> },
    DataRef { address: u32, offset: i64 },
    Pop { reg: String, width: usize, value: String },
    Generator(Generator),
    Org(i64),
    Fill { byte: u8, count: usize },
    SetVar(TemplateVar, String),
    Template(Template),
    SetupLoop { src: String, backup: String, label: String },
    AdrArith { left: LabelRef, right: LabelRef },
    PrLength,
    RemainingLength,
    DefineCmd { old: String, new: String },
    DefineGadget { address: u32, name: String },
    Str(StrDirective),
}

/// Bytes popped into a register, keyed by its class letter.
pub fn register_width(reg: &str) -> Option<usize> {
    let (width, digits) = match reg.as_bytes().first()? {
        b'r' => (1, &reg[1..]),
        b'e' => (2, reg.strip_prefix("er")?),
        b'x' => (4, reg.strip_prefix("xr")?),
        b'q' => (8, reg.strip_prefix("qr")?),
        _ => return None,
    };
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(width)
}

fn malformed(directive: &'static str, args: &str) -> Error {
    Error::Malformed { directive, args: args.to_string() }
}

/// `name(args)` → `args`, requiring the closing parenthesis to end the line.
fn call_args<'l>(line: &'l str, name: &str) -> Option<&'l str> {
    line.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')
}

impl Directive {
    pub fn parse(line: &str, registry: &Registry) -> Result<Directive> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Directive::Empty);
        }
        if line.contains(';') {
            let clauses = line.split(';').map(|c| c.to_lowercase()).collect();
            return Ok(Directive::Compound(clauses));
        }
        if let Some(name) = line.strip_suffix(':') {
            if name.is_empty() {
                return Err(malformed("label", line));
            }
            return Ok(Directive::Label(name.to_lowercase()));
        }
        if line.starts_with("0x") {
            return parse_literal(line);
        }
        if let Some(rest) = line.strip_prefix("hex") {
            if !line.contains("hex_") {
                return Ok(Directive::Hex(decode_hex_bytes(rest)?));
            }
        }
        if let Some(rest) = line.strip_prefix("call") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Err(malformed("call", rest));
            }
            let target = match parse_hex(rest) {
                Ok(addr) => CallTarget::Address(addr),
                Err(_) => CallTarget::Name(rest.to_string()),
            };
            return Ok(Directive::Call(target));
        }
        if let Some(rest) = line.strip_prefix("goto") {
            let label = rest.trim();
            if label.is_empty() {
                return Err(malformed("goto", rest));
            }
            return Ok(Directive::Goto(label.to_lowercase()));
        }
        if let Some(rest) = line.strip_prefix("adr_of") {
            return parse_adr_of(rest);
        }
        if let Some(address) = registry.data_label(line) {
            return Ok(Directive::DataRef { address, offset: 0 });
        }
        if let Some((name, off)) = line.split_once('+') {
            if let Some(address) = registry.data_label(name) {
                return Ok(Directive::DataRef { address, offset: parse_int(off)? });
            }
        }
        if registry.command(line).is_some() {
            return Ok(Directive::Call(CallTarget::Name(line.to_string())));
        }
        if let Some(pop) = parse_pop(line) {
            return Ok(pop);
        }
        if let Some((reg, value)) = line.split_once('=') {
            if let Some(width) = register_width(reg.trim()) {
                return Ok(Directive::Pop { reg: reg.trim().to_string(), width, value: value.trim().to_string() });
            }
        }
        if let Some(expr) = line.strip_prefix('$') {
            return parse_generator(expr).map(Directive::Generator);
        }
        if let Some(expr) = line.strip_prefix("org") {
            return Ok(Directive::Org(eval_sum(expr)?));
        }
        if let Some(args) = call_args(line, "fill") {
            return parse_fill(args);
        }
        for (prefix, var) in [("backup is", TemplateVar::Backup), ("src is", TemplateVar::Src)] {
            if let Some(v) = line.strip_prefix(prefix) {
                let v = v.trim();
                if v.is_empty() {
                    return Err(malformed(prefix, line));
                }
                return Ok(Directive::SetVar(var, v.to_string()));
            }
        }
        if line.starts_with("loop580") {
            let arg = call_args(line, "loop580").ok_or_else(|| malformed("loop580", line))?;
            decode_hex_bytes(arg)?;
            return Ok(Directive::Template(Template::Loop580(arg.trim().to_string())));
        }
        if line.starts_with("loop880") {
            return Ok(Directive::Template(Template::Loop880));
        }
        if line.starts_with("backup580") {
            return Ok(Directive::Template(Template::Backup580));
        }
        if line.starts_with("backup880") {
            return Ok(Directive::Template(Template::Backup880));
        }
        if let Some(rest) = line.strip_prefix("setup_loop") {
            return parse_setup_loop(rest);
        }
        if line.starts_with("adr_arith") {
            return parse_adr_arith(line);
        }
        if line.starts_with("pr_length") {
            return Ok(Directive::PrLength);
        }
        if line.starts_with("remaining_length") {
            return Ok(Directive::RemainingLength);
        }
        if let Some(rest) = line.strip_prefix("define_cmd") {
            let (groups, _) = bracket_groups(rest);
            let &[old, new] = groups.as_slice() else {
                return Err(malformed("define_cmd", rest));
            };
            return Ok(Directive::DefineCmd {
                old: canonicalize(old).to_lowercase(),
                new: canonicalize(new).to_lowercase(),
            });
        }
        if let Some(rest) = line.strip_prefix("define_gadget") {
            let (groups, _) = bracket_groups(rest);
            let &[addr, name] = groups.as_slice() else {
                return Err(malformed("define_gadget", rest));
            };
            return Ok(Directive::DefineGadget {
                address: parse_hex(addr)?,
                name: canonicalize(name).to_lowercase(),
            });
        }
        if let Some(rest) = line.strip_prefix("str") {
            return parse_str(rest.trim()).map(Directive::Str);
        }
        Err(Error::Unrecognized(line.to_string()))
    }
}

fn parse_literal(line: &str) -> Result<Directive> {
    let split = line[2..].find(&['+', '-'][..]).map(|p| p + 2);
    let (hex, adjust) = match split {
        Some(p) => {
            let n = parse_int(&line[p + 1..])?;
            (&line[..p], if &line[p..p + 1] == "-" { -n } else { n })
        }
        None => (line, 0),
    };
    if hex.len() % 2 != 0 {
        return Err(Error::DataLength(line.to_string()));
    }
    let digits = &hex[2..];
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::BadHex(line.to_string()));
    }
    Ok(Directive::Literal { digits: digits.to_string(), adjust })
}

fn parse_adr_of(rest: &str) -> Result<Directive> {
    let (groups, tail) = bracket_groups(rest);
    let adr = |label: &str, offset: i64, base: Option<u32>| Directive::AdrOf {
        label: label.trim().to_lowercase(),
        offset,
        base,
    };
    match (groups.as_slice(), tail.is_empty()) {
        ([label], true) => Ok(adr(label, 0, None)),
        ([label, off], true) => Ok(adr(label, parse_int(off)?, None)),
        ([label, off, base], true) => Ok(adr(label, parse_int(off)?, Some(parse_hex(base)?))),
        ([], false) => Ok(adr(tail, 0, None)),
        ([off], false) => Ok(adr(tail, parse_int(off)?, None)),
        _ => Err(malformed("adr_of", rest)),
    }
}

fn parse_pop(line: &str) -> Option<Directive> {
    let rest = line.strip_prefix("pop")?;
    let open = rest.find('(')?;
    let close = rest.rfind(')')?;
    if close < open {
        return None;
    }
    let reg = rest[..open].trim();
    let width = register_width(reg)?;
    Some(Directive::Pop {
        reg: reg.to_string(),
        width,
        value: rest[open + 1..close].trim().to_string(),
    })
}

fn parse_generator(expr: &str) -> Result<Generator> {
    if let Some(args) = call_args(expr, "repeat") {
        let (count, line) = args.split_once(',').ok_or_else(|| malformed("$repeat", args))?;
        let count = usize::try_from(parse_int(count)?).map_err(|_| malformed("$repeat", args))?;
        return Ok(Generator::Repeat { count, line: line.to_string() });
    }
    if let Some(args) = call_args(expr, "split_sum") {
        return Ok(Generator::SplitSum(eval_sum(args)?));
    }
    Err(Error::UnknownGenerator(expr.to_string()))
}

fn parse_fill(args: &str) -> Result<Directive> {
    let (byte, count) = args.split_once(',').ok_or_else(|| malformed("fill", args))?;
    let digits = byte.trim().trim_start_matches("0x");
    if digits.len() != 2 {
        return Err(malformed("fill", args));
    }
    let byte = u8::from_str_radix(digits, 16).map_err(|_| Error::BadHex(byte.to_string()))?;
    let count = usize::try_from(parse_int(count)?).map_err(|_| malformed("fill", args))?;
    Ok(Directive::Fill { byte, count })
}

fn parse_setup_loop(rest: &str) -> Result<Directive> {
    let parts: Vec<&str> = rest.split(',').map(str::trim).collect();
    let (src, backup, label) = match parts.as_slice() {
        [src, backup] => (*src, *backup, "home"),
        [src, backup, label] if label.eq_ignore_ascii_case("none") => (*src, *backup, "home"),
        [src, backup, label] => (*src, *backup, *label),
        _ => return Err(malformed("setup_loop", rest)),
    };
    if src.is_empty() || backup.is_empty() || label.is_empty() {
        return Err(malformed("setup_loop", rest));
    }
    Ok(Directive::SetupLoop { src: src.to_string(), backup: backup.to_string(), label: label.to_lowercase() })
}

fn parse_adr_arith(line: &str) -> Result<Directive> {
    let body = &line["adr_arith".len()..];
    let split = body.rfind("-adr_arith").ok_or_else(|| malformed("adr_arith", line))?;
    let left = parse_label_ref(&body[..split])?;
    let right = parse_label_ref(&body[split + "-adr_arith".len()..])?;
    Ok(Directive::AdrArith { left, right })
}

fn parse_label_ref(part: &str) -> Result<LabelRef> {
    let (groups, label) = bracket_groups(part);
    let offset = match groups.as_slice() {
        [] => 0,
        [off] => parse_int(off)?,
        _ => return Err(malformed("adr_arith", part)),
    };
    if label.is_empty() {
        return Err(malformed("adr_arith", part));
    }
    Ok(LabelRef { offset, label: label.to_lowercase() })
}

fn parse_str(content: &str) -> Result<StrDirective> {
    if let Some(q) = content.find('"') {
        let var = content[..q].trim();
        let text = content[q + 1..].trim_end_matches('"').to_string();
        return Ok(if var.is_empty() {
            StrDirective::Emit(text)
        } else {
            StrDirective::Define { var: var.to_string(), text }
        });
    }
    if content.is_empty() {
        return Err(malformed("str", content));
    }
    Ok(StrDirective::Use(content.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.add_command("pop er0", 0x1234, vec!["rt".into()]).unwrap();
        r.add_command("sp=er6,pop er8", 0x2000, vec![]).unwrap();
        r.define_data_label("buf", 0xd180);
        r
    }

    fn parse(line: &str) -> Result<Directive> {
        Directive::parse(line, &registry())
    }

    #[test]
    fn precedence_is_first_match() {
        assert_eq!(parse("a:b;c").unwrap(), Directive::Compound(vec!["a:b".into(), "c".into()]));
        assert_eq!(parse("loop:").unwrap(), Directive::Label("loop".into()));
        assert_eq!(parse("pop er0").unwrap(), Directive::Call(CallTarget::Name("pop er0".into())));
        assert_eq!(parse("call 100").unwrap(), Directive::Call(CallTarget::Address(0x100)));
        assert_eq!(parse("call pop er0").unwrap(), Directive::Call(CallTarget::Name("pop er0".into())));
        assert_eq!(parse("buf+4").unwrap(), Directive::DataRef { address: 0xd180, offset: 4 });
        assert!(matches!(parse("[er0]=er2,rt"), Err(Error::Unrecognized(_))));
    }

    #[test]
    fn literals() {
        assert_eq!(parse("0x0201").unwrap(), Directive::Literal { digits: "0201".into(), adjust: 0 });
        assert_eq!(parse("0x0201-3").unwrap(), Directive::Literal { digits: "0201".into(), adjust: -3 });
        assert!(matches!(parse("0x123"), Err(Error::DataLength(_))));
        assert_eq!(parse("hex e6 4d").unwrap(), Directive::Hex(vec![0xe6, 0x4d]));
    }

    #[test]
    fn adr_of_forms() {
        let adr = |label: &str, offset, base| Directive::AdrOf { label: label.into(), offset, base };
        assert_eq!(parse("adr_of[home]").unwrap(), adr("home", 0, None));
        assert_eq!(parse("adr_of[home][-2]").unwrap(), adr("home", -2, None));
        assert_eq!(parse("adr_of[x][4][d000]").unwrap(), adr("x", 4, Some(0xd000)));
        assert_eq!(parse("adr_of length").unwrap(), adr("length", 0, None));
        assert_eq!(parse("adr_of[-2]home").unwrap(), adr("home", -2, None));
        assert!(parse("adr_of[a][1][2][3]").is_err());
    }

    #[test]
    fn register_assignments_need_a_register() {
        assert_eq!(
            parse("xr0=adr_of length,0x01,0x00").unwrap(),
            Directive::Pop { reg: "xr0".into(), width: 4, value: "adr_of length,0x01,0x00".into() }
        );
        assert_eq!(
            parse("pop qr0(0x0000000000000000)").unwrap(),
            Directive::Pop { reg: "qr0".into(), width: 8, value: "0x0000000000000000".into() }
        );
        assert_eq!(register_width("r3"), Some(1));
        assert_eq!(register_width("ea"), None);
        assert!(matches!(parse("foo=1"), Err(Error::Unrecognized(_))));
    }

    #[test]
    fn generators_are_a_closed_set() {
        assert_eq!(
            parse("$repeat(3,0x00)").unwrap(),
            Directive::Generator(Generator::Repeat { count: 3, line: "0x00".into() })
        );
        assert_eq!(parse("$split_sum(0x6161)").unwrap(), Directive::Generator(Generator::SplitSum(0x6161)));
        assert!(matches!(parse("$__import__('os')"), Err(Error::UnknownGenerator(_))));
    }

    #[test]
    fn misc_directives() {
        assert_eq!(parse("org 0x8000+0x10").unwrap(), Directive::Org(0x8010));
        assert_eq!(parse("fill(0xff,3)").unwrap(), Directive::Fill { byte: 0xff, count: 3 });
        assert_eq!(
            parse("adr_arith[2]end-adr_arith start").unwrap(),
            Directive::AdrArith {
                left: LabelRef { offset: 2, label: "end".into() },
                right: LabelRef { offset: 0, label: "start".into() },
            }
        );
        assert_eq!(
            parse("setup_loop 0xd180,0xd522,none").unwrap(),
            Directive::SetupLoop { src: "0xd180".into(), backup: "0xd522".into(), label: "home".into() }
        );
        assert_eq!(
            parse("define_gadget[1234][my gadget]").unwrap(),
            Directive::DefineGadget { address: 0x1234, name: "my gadget".into() }
        );
        assert_eq!(
            parse(r#"str msg"Hi There""#).unwrap(),
            Directive::Str(StrDirective::Define { var: "msg".into(), text: "Hi There".into() })
        );
        assert_eq!(parse("str msg").unwrap(), Directive::Str(StrDirective::Use("msg".into())));
        assert!(matches!(parse("frobnicate"), Err(Error::Unrecognized(_))));
    }
}
