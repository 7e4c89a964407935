use std::fmt;

/// Broad classes of fatal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Syntax,
    Symbol,
    Range,
    Consistency,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unrecognized command: `{0}`")]
    Unrecognized(String),
    #[error("invalid data length: `{0}`")]
    DataLength(String),
    #[error("invalid hex digits: `{0}`")]
    BadHex(String),
    #[error("invalid number: `{0}`")]
    BadNumber(String),
    #[error("malformed arguments for {directive}: `{args}`")]
    Malformed { directive: &'static str, args: String },
    #[error("unknown generator: `{0}`")]
    UnknownGenerator(String),
    #[error("invalid command name `{name}`: {reason}")]
    BadCommandName { name: String, reason: &'static str },
    #[error("unmatched `{{` in tag list")]
    UnmatchedTag,
    #[error("invalid table line: `{0}`")]
    BadTableLine(String),

    #[error("duplicated label: `{0}`")]
    DuplicateLabel(String),
    #[error("label not found: `{0}`")]
    UnresolvedLabel(String),
    #[error("unknown command: `{0}`")]
    UnknownCommand(String),
    #[error("conflicting redefinition of command `{0}`")]
    ConflictingCommand(String),
    #[error("undefined string variable: `{0}`")]
    UndefinedStringVar(String),
    #[error("template variable `{0}` is not set")]
    UndefinedTemplateVar(&'static str),
    #[error("local label `{0}` has no preceding global label")]
    OrphanLocalLabel(String),
    #[error("character {0:?} not found in conversion table")]
    UnknownChar(char),

    #[error("invalid address: {addr:#x} (maximum {max:#x})")]
    AddressOutOfRange { addr: i64, max: u32 },
    #[error("register `{reg}` takes {expected} bytes, `{value}` produced {actual}")]
    WidthMismatch {
        reg: String,
        value: String,
        expected: usize,
        actual: usize,
    },
    #[error("program too long: {len} bytes (limit {limit})")]
    ProgramTooLong { len: usize, limit: usize },
    #[error("org address {addr:#x} outside {lo:#x}..={hi:#x}")]
    OrgOutOfRange { addr: i64, lo: u32, hi: u32 },
    #[error("disassembly scan from {0:#07x} ran past the end of the table")]
    ScanOutOfRange(u32),

    #[error("inconsistent value of `home`: {old:#x} vs {new:#x}")]
    InconsistentHome { old: i64, new: i64 },
    #[error("fixup at position {0} resolved twice")]
    DoubleResolve(usize),
    #[error("no valid placement between {lo:#x} and {hi:#x}")]
    NoPlacement { lo: i64, hi: i64 },
    #[error("expansion nested deeper than {0} levels")]
    ExpansionTooDeep(usize),
    #[error("empty input")]
    EmptyInput,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        use Error::*;
        match self {
            Unrecognized(_) | DataLength(_) | BadHex(_) | BadNumber(_) | Malformed { .. }
            | UnknownGenerator(_) | BadCommandName { .. } | UnmatchedTag | BadTableLine(_)
            | EmptyInput => ErrorClass::Syntax,
            DuplicateLabel(_) | UnresolvedLabel(_) | UnknownCommand(_) | ConflictingCommand(_)
            | UndefinedStringVar(_) | UndefinedTemplateVar(_) | OrphanLocalLabel(_)
            | UnknownChar(_) => ErrorClass::Symbol,
            AddressOutOfRange { .. } | WidthMismatch { .. } | ProgramTooLong { .. }
            | OrgOutOfRange { .. } | ScanOutOfRange(_) => ErrorClass::Range,
            InconsistentHome { .. } | DoubleResolve(_) | NoPlacement { .. }
            | ExpansionTooDeep(_) => ErrorClass::Consistency,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A fatal assembler failure tied to the source line that caused it.
#[derive(thiserror::Error, Debug)]
pub struct CompileError {
    /// 1-based; 0 when the failure is not tied to any line.
    pub line: usize,
    pub text: String,
    #[source]
    pub source: Error,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.source)
        } else {
            write!(f, "line {}: {}\n    {}", self.line, self.source, self.text)
        }
    }
}

/// A table file line that could not be loaded.
#[derive(thiserror::Error, Debug)]
#[error("{origin}:{line}: {source}")]
pub struct TableError {
    pub origin: String,
    pub line: usize,
    #[source]
    pub source: Error,
}

#[derive(thiserror::Error, Debug)]
#[error("at byte {offset}: {source}")]
pub struct DecompileError {
    pub offset: usize,
    #[source]
    pub source: Error,
}

/// Non-fatal diagnostic attached to a successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "note: {}", self.message)
        } else {
            write!(f, "note (line {}): {}", self.line, self.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_follow_taxonomy() {
        assert_eq!(Error::DuplicateLabel("a".into()).class(), ErrorClass::Symbol);
        assert_eq!(Error::Unrecognized("x".into()).class(), ErrorClass::Syntax);
        assert_eq!(Error::DoubleResolve(3).class(), ErrorClass::Consistency);
        assert_eq!(
            Error::ProgramTooLong { len: 101, limit: 100 }.class(),
            ErrorClass::Range
        );
    }

    #[test]
    fn compile_error_names_the_line() {
        let e = CompileError { line: 4, text: "bogus".into(), source: Error::Unrecognized("bogus".into()) };
        let s = e.to_string();
        assert!(s.starts_with("line 4: unrecognized command"));
        assert!(s.ends_with("bogus"));
    }
}
