//! Textual preprocessing: `#include`, line splicing, `#define` and the
//! `#ifdef` family, repeated until the text stops changing shape.
//!
//! Every input line maps to exactly one output line (placeholders stand in
//! for consumed lines) so the assembler can still report true line numbers.
//! Included text is bracketed by marker lines; see [`FileStack`].

use std::{
    fs, mem,
    path::{Path, PathBuf},
};

use indexmap::{IndexMap, IndexSet};

use crate::{text, Config, ErrKind, Error, Pos, Result};

/// Leads every include marker line.
pub const INCLUDE_MARKER: char = '\u{BB}';

const INCLUDE_FILLER: &str = "; #include";
const SPLICE_FILLER: &str = "; continued";
const DEFINE_FILLER: &str = "; #define";
const COND_FILLER: &str = "; #if";

const DIRECTIVES: &[&str] = &["#include", "#define", "#ifdef", "#ifndef", "#else", "#endif"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker<'a> {
    Start(&'a str),
    End(&'a str),
}

pub fn marker(line: &str) -> Option<Marker<'_>> {
    let mut fields = line.strip_prefix(INCLUDE_MARKER)?.split_whitespace();
    let name = fields.next()?;
    match fields.next()? {
        ":start" => Some(Marker::Start(name)),
        ":end" => Some(Marker::End(name)),
        _ => None,
    }
}

pub fn start_marker(name: &str) -> String {
    format!("{INCLUDE_MARKER} {name} :start")
}

pub fn end_marker(name: &str) -> String {
    format!("{INCLUDE_MARKER} {name} :end")
}

/// Tracks which file and line a preprocessed line came from.
#[derive(Debug)]
pub struct FileStack {
    frames: Vec<Pos>,
    pos: Pos,
}

impl FileStack {
    pub fn new(file: &str) -> Self {
        Self {
            frames: Vec::new(),
            pos: Pos::new(file, 0),
        }
    }

    pub fn pos(&self) -> &Pos {
        &self.pos
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Counts one line. Returns `true` when it was an include marker, which
    /// carries no code.
    pub fn step(&mut self, line: &str) -> Result<bool> {
        self.pos.line += 1;
        match marker(line) {
            Some(Marker::Start(name)) => {
                let outer = mem::replace(&mut self.pos, Pos::new(name, 0));
                self.frames.push(outer);
                Ok(true)
            }
            Some(Marker::End(name)) => {
                let Some(mut outer) = self.frames.pop() else {
                    return Err(Error::new(
                        ErrKind::Parse,
                        format!("end of `{name}` without a matching start"),
                    )
                    .at(&self.pos));
                };
                // the marker occupies no line of the outer file
                outer.line -= 1;
                self.pos = outer;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug)]
struct Frame {
    active: bool,
    parent: bool,
    cond: bool,
    in_else: bool,
}

#[derive(Debug, Default)]
struct Conds {
    frames: Vec<Frame>,
}

impl Conds {
    fn active(&self) -> bool {
        self.frames.last().map_or(true, |frame| frame.active)
    }

    /// Applies a conditional directive. Returns `false` if `code` is not one.
    fn directive(&mut self, code: &str, defined: &IndexSet<String>) -> Result<bool> {
        let mut fields = code.split_whitespace();
        let Some(word) = fields.next() else {
            return Ok(false);
        };
        let negate = if word.eq_ignore_ascii_case("#ifdef") {
            false
        } else if word.eq_ignore_ascii_case("#ifndef") {
            true
        } else if word.eq_ignore_ascii_case("#else") {
            let frame = self
                .frames
                .last_mut()
                .ok_or_else(|| Error::new(ErrKind::Parse, "#else without #ifdef"))?;
            if frame.in_else {
                return Err(Error::new(ErrKind::Parse, "duplicate #else"));
            }
            frame.in_else = true;
            frame.active = frame.parent && !frame.cond;
            return Ok(true);
        } else if word.eq_ignore_ascii_case("#endif") {
            self.frames
                .pop()
                .ok_or_else(|| Error::new(ErrKind::Parse, "#endif without #ifdef"))?;
            return Ok(true);
        } else {
            return Ok(false);
        };

        let name = fields
            .next()
            .ok_or_else(|| Error::new(ErrKind::Parse, format!("{word} missing name")))?;
        let cond = defined.contains(&name.to_ascii_uppercase()) != negate;
        let parent = self.active();
        self.frames.push(Frame {
            active: parent && cond,
            parent,
            cond,
            in_else: false,
        });
        Ok(true)
    }

    fn finish(&self, pos: &Pos) -> Result<()> {
        if self.frames.is_empty() {
            Ok(())
        } else {
            Err(Error::new(ErrKind::Parse, "unterminated #ifdef").at(pos))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Macro {
    name: String,
    expansion: String,
}

/// Text following the first occurrence of `directive`.
fn argument<'a>(code: &'a str, directive: &str) -> Option<&'a str> {
    let start = text::pattern_index(code, directive)? + directive.len();
    text::substring(code, start, code.len() + 1 - start).ok()
}

fn parse_define(code: &str) -> Result<Macro> {
    let rest = argument(code, "#define").unwrap_or("").trim();
    let (name, expansion) = match rest.find(char::is_whitespace) {
        Some(index) => (&rest[..index], rest[index..].trim()),
        None => (rest, ""),
    };
    if !text::is_ident(name) {
        return Err(Error::new(
            ErrKind::Parse,
            format!("invalid macro name `{name}`"),
        ));
    }
    Ok(Macro {
        name: name.to_string(),
        expansion: expansion.to_string(),
    })
}

fn include_name(code: &str) -> Option<String> {
    let arg = text::remove_whitespace(argument(code, "#include")?);
    let name = arg
        .strip_prefix('<')
        .and_then(|name| name.strip_suffix('>'))
        .or_else(|| arg.strip_prefix('"').and_then(|name| name.strip_suffix('"')))
        .unwrap_or(&arg);
    (!name.is_empty()).then(|| name.to_string())
}

/// Byte offset of the first occurrence of `name` as a whole word.
fn find_word(text: &str, name: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(at) = text::pattern_index(&text[from..], name) {
        let start = from + at - 1;
        let end = start + name.len();
        let before = start == 0 || !text::is_ident_char(bytes[start - 1]);
        let after = end == bytes.len() || !text::is_ident_char(bytes[end]);
        if before && after {
            return Some(start);
        }
        from = start + 1;
    }
    None
}

fn replace_word(text: &str, name: &str, with: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = find_word(rest, name) {
        out.push_str(&rest[..at]);
        out.push_str(with);
        rest = &rest[at + name.len()..];
    }
    out.push_str(rest);
    out
}

/// Replaces every whole-word, case-insensitive occurrence of `name`. When
/// the expansion mentions the name itself the text goes through a unique
/// placeholder first, so substitution happens exactly once.
pub fn expand_macro(text: &str, name: &str, expansion: &str) -> String {
    if name.is_empty() || find_word(text, name).is_none() {
        return text.to_string();
    }
    if find_word(expansion, name).is_none() {
        return replace_word(text, name, expansion);
    }
    let mut n = 0;
    let placeholder = loop {
        let candidate = format!("__macro{n}__");
        if text::pattern_index(text, &candidate).is_none()
            && text::pattern_index(expansion, &candidate).is_none()
        {
            break candidate;
        }
        n += 1;
    };
    let text = replace_word(text, name, &placeholder);
    replace_word(&text, &placeholder, expansion)
}

/// Joins lines ending in `\` with their successor. One filler comment
/// follows each joined line per line it absorbed.
pub fn splice(lines: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut lines = lines.into_iter();
    while let Some(mut line) = lines.next() {
        let mut absorbed = 0;
        while line.ends_with('\\') {
            line.pop();
            let Some(next) = lines.next() else {
                break;
            };
            line.push_str(&next);
            absorbed += 1;
        }
        out.push(line);
        out.extend((0..absorbed).map(|_| SPLICE_FILLER.to_string()));
    }
    out
}

/// True while some line still carries a directive.
pub fn needs_preprocessing(lines: &[String]) -> bool {
    lines.iter().any(|line| {
        let code = text::strip_comment(line);
        marker(line).is_none()
            && DIRECTIVES
                .iter()
                .any(|directive| text::pattern_index(code, directive).is_some())
    })
}

pub struct Preprocessor {
    roots: Vec<PathBuf>,
    max_passes: usize,
    predefined: IndexMap<String, String>,
    /// `#define`s seen so far, kept across passes.
    macros: Vec<Macro>,
    included: IndexSet<PathBuf>,
}

/// Reads a source file. Bytes that are not UTF-8 (a Latin-1 comment, say)
/// are replaced rather than rejected.
fn read_source(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

impl Preprocessor {
    pub fn new(config: &Config) -> Self {
        let mut roots = vec![config.system_include.clone(), PathBuf::from(".")];
        roots.extend(config.include.iter().cloned());
        Self {
            roots,
            max_passes: config.max_passes.max(1),
            predefined: config.define.clone(),
            macros: Vec::new(),
            included: IndexSet::new(),
        }
    }

    /// Upper-cased names visible to `#ifdef` before the first line of a pass.
    fn defined(&self) -> IndexSet<String> {
        self.predefined
            .keys()
            .chain(self.macros.iter().map(|mac| &mac.name))
            .map(|name| name.to_ascii_uppercase())
            .collect()
    }

    /// Every file pulled in by `#include`, in first-seen order.

    pub fn into_included(self) -> Vec<PathBuf> {
        self.included.into_iter().collect()
    }

    pub fn process_file(&mut self, path: &Path) -> Result<Vec<String>> {
        let name = path.display().to_string();
        let source = read_source(path)
            .map_err(|e| Error::new(ErrKind::FileNotFound, format!("cant open `{name}`: {e}")))?;
        self.process_str(&name, &source)
    }

    pub fn process_str(&mut self, file: &str, source: &str) -> Result<Vec<String>> {
        let mut lines = self.enter(source);
        for pass in 1..=self.max_passes {
            tracing::trace!("preprocessor pass {pass}");
            let (spliced, count) = self.include(file, lines)?;
            lines = spliced;
            // every nested include is in place before any macro expands
            if count != 0 {
                continue;
            }
            lines = splice(lines);
            lines = self.expand(file, lines)?;
            if !needs_preprocessing(&lines) {
                tracing::debug!("preprocessing settled after {pass} passes");
                return Ok(lines);
            }
        }
        Err(Error::new(
            ErrKind::ResourceExhausted,
            format!(
                "`{file}` still has directives after {} preprocessor passes",
                self.max_passes
            ),
        ))
    }

    /// Splits new source into lines, applying the predefined macros.
    fn enter(&self, source: &str) -> Vec<String> {
        source
            .lines()
            .map(|line| {
                let (code, comment) = text::split_comment(line);
                // directive names and macro names stay untouched
                if code.trim_start().starts_with('#') {
                    return line.to_string();
                }
                let mut code = code.to_string();
                for (name, expansion) in &self.predefined {
                    code = expand_macro(&code, name, expansion);
                }
                code.push_str(comment);
                code
            })
            .collect()
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|root| root.join(name))
            .find(|path| path.is_file())
    }

    /// Splices one level of includes. Returns the new lines and how many
    /// files were spliced.
    fn include(&mut self, file: &str, lines: Vec<String>) -> Result<(Vec<String>, usize)> {
        let mut out = Vec::with_capacity(lines.len());
        let mut files = FileStack::new(file);
        let mut conds = Conds::default();
        let mut defined = self.defined();
        let mut count = 0;
        for line in lines {
            if files.step(&line)? {
                out.push(line);
                continue;
            }
            let code = text::strip_comment(&line);
            if conds.directive(code, &defined).map_err(|e| e.at(files.pos()))?
                || !conds.active()
            {
                out.push(line);
                continue;
            }
            if text::pattern_index(code, "#define").is_some() {
                if let Ok(mac) = parse_define(code) {
                    defined.insert(mac.name.to_ascii_uppercase());
                }
                out.push(line);
                continue;
            }
            if text::pattern_index(code, "#include").is_none() {
                out.push(line);
                continue;
            }

            let name = include_name(code).ok_or_else(|| {
                Error::new(ErrKind::Parse, "#include missing file name").at(files.pos())
            })?;
            let path = self.resolve(&name).ok_or_else(|| {
                Error::new(ErrKind::FileNotFound, format!("cant find `{name}`")).at(files.pos())
            })?;
            let source = read_source(&path).map_err(|e| Error::from(e).at(files.pos()))?;
            tracing::trace!("including {}", path.display());
            self.included.insert(path);
            count += 1;

            out.push(INCLUDE_FILLER.to_string());
            out.push(start_marker(&name));
            out.extend(self.enter(&source));
            out.push(end_marker(&name));
        }
        Ok((out, count))
    }

    fn expand(&mut self, file: &str, lines: Vec<String>) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(lines.len());
        let mut files = FileStack::new(file);
        let mut conds = Conds::default();
        let mut defined = self.defined();
        for line in lines {
            if files.step(&line)? {
                out.push(line);
                continue;
            }
            let (code, comment) = text::split_comment(&line);
            if conds
                .directive(code, &defined)
                .map_err(|e| e.at(files.pos()))?
                || !conds.active()
            {
                out.push(COND_FILLER.to_string());
                continue;
            }

            if text::pattern_index(code, "#define").is_some() {
                let mut mac = parse_define(code).map_err(|e| e.at(files.pos()))?;
                for (name, expansion) in &self.predefined {
                    mac.expansion = expand_macro(&mac.expansion, name, expansion);
                }
                for earlier in &self.macros {
                    mac.expansion = expand_macro(&mac.expansion, &earlier.name, &earlier.expansion);
                }
                tracing::trace!("{}: define {} = {}", files.pos(), mac.name, mac.expansion);
                defined.insert(mac.name.to_ascii_uppercase());
                self.macros.push(mac);
                out.push(DEFINE_FILLER.to_string());
                continue;
            }

            let mut code = code.to_string();
            for mac in &self.macros {
                code = expand_macro(&code, &mac.name, &mac.expansion);
            }
            code.push_str(comment);
            out.push(code);
        }
        conds.finish(files.pos())?;
        Ok(out)
    }
}
