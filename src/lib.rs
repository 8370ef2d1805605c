use std::{
    error::Error as StdError,
    fmt::{self, Display, Formatter},
    io,
    path::{Path, PathBuf},
    str::FromStr,
};

use indexmap::IndexMap;

pub mod asm;
pub mod config;
pub mod hex;
pub mod opcodes;
pub mod preprocess;
pub mod reloc;
pub mod text;

pub use asm::{Asm, Cell, Entry, Mode};
pub use config::Config;
pub use hex::HexRecord;
pub use preprocess::Preprocessor;

/// Parses `NAME=expansion` (or a bare `NAME`, which expands to `1`).
pub fn parse_defines<T, U>(
    s: &str,
) -> std::result::Result<(T, U), Box<dyn StdError + Send + Sync + 'static>>
where
    T: FromStr,
    T::Err: StdError + Send + Sync + 'static,
    U: FromStr,
    U::Err: StdError + Send + Sync + 'static,
{
    let (name, value) = match s.find('=') {
        Some(pos) => (&s[..pos], &s[pos + 1..]),
        None => (s, "1"),
    };
    if !text::is_ident(name) {
        return Err(format!("invalid NAME=expansion: `{name}` is not a name").into());
    }
    Ok((name.parse()?, value.parse()?))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pos {
    pub file: String,
    pub line: u32,
}

impl Pos {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl Display for Pos {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// What went wrong. Every diagnostic the assembler produces is one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrKind {
    FileNotFound,
    Parse,
    IllegalOperand,
    JumpOutOfRange,
    IllegalInstruction,
    ExtraTokens,
    IncompleteInstruction,
    ResourceExhausted,
    Io,
}

impl ErrKind {
    pub fn description(self) -> &'static str {
        match self {
            Self::FileNotFound => "file not found",
            Self::Parse => "parse error",
            Self::IllegalOperand => "illegal operand",
            Self::JumpOutOfRange => "jump out of range",
            Self::IllegalInstruction => "illegal instruction",
            Self::ExtraTokens => "extra tokens in instruction",
            Self::IncompleteInstruction => "incompletely formed instruction",
            Self::ResourceExhausted => "resource exhausted",
            Self::Io => "i/o error",
        }
    }
}

impl Display for ErrKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrKind,
    pos: Option<Pos>,
    msg: String,
    source: Option<io::Error>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            pos: None,
            msg: msg.into(),
            source: None,
        }
    }

    /// Attaches a source position. The innermost position wins, so callers
    /// further out can add theirs unconditionally.
    pub fn at(mut self, pos: &Pos) -> Self {
        if self.pos.is_none() {
            self.pos = Some(pos.clone());
        }
        self
    }

    pub fn kind(&self) -> ErrKind {
        self.kind
    }

    pub fn pos(&self) -> Option<&Pos> {
        self.pos.as_ref()
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(pos) = &self.pos {
            write!(f, "{pos}: ")?;
        }
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| e as _)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::NotFound => ErrKind::FileNotFound,
            _ => ErrKind::Io,
        };
        Self {
            kind,
            pos: None,
            msg: e.to_string(),
            source: Some(e),
        }
    }
}

/// A fully assembled program.
#[derive(Debug)]
pub struct Assembly {
    /// `(address, byte)` in emission order.
    pub bytes: Vec<(u16, u8)>,
    pub symbols: IndexMap<String, u16>,
    pub included: Vec<PathBuf>,
}

impl Assembly {
    pub fn records(&self) -> Vec<HexRecord> {
        hex::records(&self.bytes)
    }

    pub fn write_hex<W: io::Write>(&self, out: W) -> io::Result<()> {
        hex::write_hex(out, &self.bytes)
    }
}

pub fn assemble_file(path: &Path, config: &Config) -> Result<Assembly> {
    let mut pp = Preprocessor::new(config);
    tracing::trace!("preprocessing {}", path.display());
    let lines = pp.process_file(path)?;
    assemble_lines(pp, &path.display().to_string(), &lines, config)
}

/// Runs the whole pipeline over in-memory source. `name` is used for
/// diagnostics only; includes are still resolved against `config`.
pub fn assemble_source(name: &str, source: &str, config: &Config) -> Result<Assembly> {
    let mut pp = Preprocessor::new(config);
    tracing::trace!("preprocessing {name}");
    let lines = pp.process_str(name, source)?;
    assemble_lines(pp, name, &lines, config)
}

fn assemble_lines(
    pp: Preprocessor,
    name: &str,
    lines: &[String],
    config: &Config,
) -> Result<Assembly> {
    let mut asm = Asm::new(name, config.origin);
    tracing::trace!("starting pass 1");
    asm.pass1(lines)?;

    tracing::trace!("starting pass 2");
    let bytes = reloc::resolve(asm.entries(), asm.symbols())?;
    tracing::debug!("{} bytes, {} symbols", bytes.len(), asm.symbols().len());

    Ok(Assembly {
        bytes,
        symbols: asm.into_symbols(),
        included: pp.into_included(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_default_to_one() {
        let (name, value) = parse_defines::<String, String>("DEBUG").unwrap();
        assert_eq!((name.as_str(), value.as_str()), ("DEBUG", "1"));
        let (name, value) = parse_defines::<String, String>("COUNT=0A").unwrap();
        assert_eq!((name.as_str(), value.as_str()), ("COUNT", "0A"));
        assert!(parse_defines::<String, String>("=5").is_err());
    }

    #[test]
    fn first_position_wins() {
        let e = Error::new(ErrKind::Parse, "bad")
            .at(&Pos::new("inner.inc", 3))
            .at(&Pos::new("main.asm", 10));
        assert_eq!(e.pos(), Some(&Pos::new("inner.inc", 3)));
        assert_eq!(e.to_string(), "inner.inc:3: parse error: bad");
    }

    #[test]
    fn missing_file_maps_to_file_not_found() {
        let e = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(e.kind(), ErrKind::FileNotFound);
        assert!(e.pos().is_none());
    }
}
