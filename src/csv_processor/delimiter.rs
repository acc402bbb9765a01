use crate::utils::{CsvTranslatorError, Result};
use std::fmt;
use std::path::Path;

/// A single-byte field separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Delimiter(u8);

impl Delimiter {
    pub const COMMA: Delimiter = Delimiter(b',');
    pub const TAB: Delimiter = Delimiter(b'\t');

    /// Quote and line-break characters are rejected: `csv` reserves them.
    pub fn new(c: char) -> Result<Self> {
        if !c.is_ascii() {
            return Err(CsvTranslatorError::ConfigError(format!(
                "delimiter must be a single ASCII character, got {:?}",
                c
            )));
        }
        if matches!(c, '"' | '\n' | '\r') {
            return Err(CsvTranslatorError::ConfigError(format!(
                "delimiter cannot be a quote or line break, got {:?}",
                c
            )));
        }
        Ok(Delimiter(c as u8))
    }

    /// Parses a command-line style value: one character, or the escape `\t`.
    pub fn parse(value: &str) -> Result<Self> {
        if value == "\\t" || value.eq_ignore_ascii_case("tab") {
            return Ok(Delimiter::TAB);
        }
        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Delimiter::new(c),
            _ => Err(CsvTranslatorError::ConfigError(format!(
                "delimiter must be exactly one character, got {:?}",
                value
            ))),
        }
    }

    pub fn as_byte(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            b'\t' => write!(f, "\\t"),
            b => write!(f, "{}", b as char),
        }
    }
}

/// Explicit configuration wins; otherwise `.tsv` means tab and anything
/// else means comma. The extension match is case-sensitive.
pub fn resolve_delimiter(path: impl AsRef<Path>, configured: Option<Delimiter>) -> Delimiter {
    if let Some(delimiter) = configured {
        return delimiter;
    }
    match path.as_ref().extension().and_then(|e| e.to_str()) {
        Some("tsv") => Delimiter::TAB,
        _ => Delimiter::COMMA,
    }
}
