//! String helpers shared by the preprocessor and both assembler passes.

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// A `substring` request that reaches past the end of its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfRange {
    pub start: usize,
    pub len: usize,
    pub available: usize,
}

impl Display for OutOfRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "substring at {} of length {} exceeds {} bytes",
            self.start, self.len, self.available
        )
    }
}

impl Error for OutOfRange {}

#[inline]
pub fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

#[inline]
pub fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// True when `token` could name a label or macro.
pub fn is_ident(token: &str) -> bool {
    let bytes = token.as_bytes();
    matches!(bytes.first(), Some(&c) if is_ident_start(c))
        && bytes.iter().copied().all(is_ident_char)
}

/// Case-insensitive search returning the 1-based byte position of the first
/// match. An empty needle matches at position 1.
pub fn pattern_index(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let pat = needle.as_bytes();
    if pat.is_empty() {
        return Some(1);
    }
    if pat.len() > hay.len() {
        return None;
    }
    hay.windows(pat.len())
        .position(|win| win.eq_ignore_ascii_case(pat))
        .map(|index| index + 1)
}

/// `len` bytes starting at the 1-based position `start`. Never truncates.
pub fn substring(text: &str, start: usize, len: usize) -> Result<&str, OutOfRange> {
    let err = OutOfRange {
        start,
        len,
        available: text.len(),
    };
    if start == 0 || (start - 1 + len) > text.len() {
        return Err(err);
    }
    text.get((start - 1)..(start - 1 + len)).ok_or(err)
}

pub fn remove_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// First field, one space, then everything after it with all whitespace
/// removed: `"  mov  a , # 01 "` becomes `"mov a,#01"`.
pub fn trim_and_collapse(text: &str) -> String {
    let text = text.trim();
    let (first, rest) = match text.find(char::is_whitespace) {
        Some(index) => text.split_at(index),
        None => (text, ""),
    };
    format!("{first} {}", remove_whitespace(rest))
}

/// Splits a line at its first `;` into code and comment (comment keeps the `;`).
pub fn split_comment(line: &str) -> (&str, &str) {
    match line.find(';') {
        Some(index) => line.split_at(index),
        None => (line, ""),
    }
}

pub fn strip_comment(line: &str) -> &str {
    split_comment(line).0
}

/// Parses a hex literal with an optional `0x` prefix or `H` suffix.
pub fn parse_hex(token: &str) -> Option<u16> {
    let digits = if let Some(rest) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        rest
    } else if let Some(rest) = token.strip_suffix('h').or_else(|| token.strip_suffix('H')) {
        rest
    } else {
        token
    };
    if digits.is_empty() || !digits.bytes().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_index_is_one_based_and_case_insensitive() {
        assert_eq!(pattern_index("  #INCLUDE <a.inc>", "#include"), Some(3));
        assert_eq!(pattern_index("mov a,#01", "MOV"), Some(1));
        assert_eq!(pattern_index("label:", ":"), Some(6));
        assert_eq!(pattern_index("nop", "#define"), None);
        assert_eq!(pattern_index("ab", "abc"), None);
    }

    #[test]
    fn pattern_index_finds_match_at_end() {
        assert_eq!(pattern_index("x #ifdef", "#ifdef"), Some(3));
    }

    #[test]
    fn substring_rejects_overrun() {
        assert_eq!(substring("hello", 2, 3), Ok("ell"));
        assert_eq!(substring("hello", 1, 5), Ok("hello"));
        assert_eq!(
            substring("hello", 4, 3),
            Err(OutOfRange {
                start: 4,
                len: 3,
                available: 5
            })
        );
        assert!(substring("hello", 0, 1).is_err());
    }

    #[test]
    fn trim_and_collapse_strips_inner_whitespace_after_first_field() {
        assert_eq!(trim_and_collapse("  mov  a , # 01 "), "mov a,#01");
        assert_eq!(trim_and_collapse("\tcjne a, #10,  loop"), "cjne a,#10,loop");
        assert_eq!(trim_and_collapse("nop"), "nop ");
        assert_eq!(trim_and_collapse("   "), " ");
    }

    #[test]
    fn comments_split_at_first_semicolon() {
        assert_eq!(split_comment("mov a,b ; hi; there"), ("mov a,b ", "; hi; there"));
        assert_eq!(strip_comment("; whole line"), "");
        assert_eq!(strip_comment("ret"), "ret");
    }

    #[test]
    fn hex_literals() {
        assert_eq!(parse_hex("0F0"), Some(0xF0));
        assert_eq!(parse_hex("0FFh"), Some(0xFF));
        assert_eq!(parse_hex("0x1234"), Some(0x1234));
        assert_eq!(parse_hex("10000"), None);
        assert_eq!(parse_hex("zz"), None);
        assert_eq!(parse_hex(""), None);
    }

    #[test]
    fn identifiers() {
        assert!(is_ident("_start"));
        assert!(is_ident("loop1"));
        assert!(!is_ident("1loop"));
        assert!(!is_ident("a-b"));
        assert!(!is_ident(""));
    }
}
