use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::{CodecError, Result};

const REFERENCE_TABLE: &str = include_str!("../tables/reference.tbl");

/// What a single byte stands for in the character table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEntry {
    Glyph(char),
    /// A bracketed (`[NAME]`) or braced (`{newline}`) name, brackets included.
    Token(String),
}

/// Bidirectional byte <-> glyph/token map loaded from a `.tbl` file.
#[derive(Debug, Clone)]
pub struct CharTable {
    by_byte: Vec<Option<TableEntry>>,
    glyphs: HashMap<char, u8>,
    tokens: HashMap<String, u8>,
}

impl CharTable {
    /// The table for the reference image, bundled with the crate.
    pub fn reference() -> Result<Self> {
        Self::parse(REFERENCE_TABLE)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading character table: {}", path.display());
        let src = fs::read_to_string(path)?;
        Self::parse(&src)
    }

    /// Parse `HH=glyph` / `HH=[TOKEN]` lines. Blank lines and lines starting
    /// with `#` are skipped.
    pub fn parse(src: &str) -> Result<Self> {
        let mut by_byte: Vec<Option<TableEntry>> = vec![None; 256];

        for (idx, raw_line) in src.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| CodecError::TableMalformed {
                line: line_no,
                reason: "expected HH=value".to_string(),
            })?;

            let key = key.trim();
            if key.len() != 2 {
                return Err(CodecError::TableMalformed {
                    line: line_no,
                    reason: format!("'{}' is not a two-digit hex byte", key),
                });
            }
            let byte = u8::from_str_radix(key, 16).map_err(|_| CodecError::TableMalformed {
                line: line_no,
                reason: format!("'{}' is not a two-digit hex byte", key),
            })?;

            let entry = parse_value(value).map_err(|reason| CodecError::TableMalformed {
                line: line_no,
                reason,
            })?;

            let slot = &mut by_byte[byte as usize];
            if slot.is_some() {
                return Err(CodecError::TableMalformed {
                    line: line_no,
                    reason: format!("byte {:02X} is bound twice", byte),
                });
            }
            *slot = Some(entry);
        }

        // Bytes are visited in ascending order, so the first binding seen
        // for a glyph is the lowest byte and wins on encode.
        let mut glyphs = HashMap::new();
        let mut tokens = HashMap::new();
        for (byte, entry) in by_byte.iter().enumerate() {
            match entry {
                Some(TableEntry::Glyph(c)) => {
                    glyphs.entry(*c).or_insert(byte as u8);
                }
                Some(TableEntry::Token(t)) => {
                    tokens.entry(t.clone()).or_insert(byte as u8);
                }
                None => {}
            }
        }

        log::debug!(
            "Character table: {} glyphs, {} tokens",
            glyphs.len(),
            tokens.len()
        );

        Ok(CharTable {
            by_byte,
            glyphs,
            tokens,
        })
    }

    pub fn entry(&self, byte: u8) -> Option<&TableEntry> {
        self.by_byte[byte as usize].as_ref()
    }

    pub fn glyph(&self, byte: u8) -> Option<char> {
        match self.entry(byte) {
            Some(TableEntry::Glyph(c)) => Some(*c),
            _ => None,
        }
    }

    pub fn glyph_byte(&self, glyph: char) -> Option<u8> {
        self.glyphs.get(&glyph).copied()
    }

    pub fn token_byte(&self, token: &str) -> Option<u8> {
        self.tokens.get(token).copied()
    }

    /// Every bracketed name bound in the table with its byte.
    pub fn tokens(&self) -> impl Iterator<Item = (&str, u8)> + '_ {
        self.tokens.iter().map(|(t, b)| (t.as_str(), *b))
    }

    pub fn len(&self) -> usize {
        self.by_byte.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_value(value: &str) -> std::result::Result<TableEntry, String> {
    let trimmed = value.trim();

    if let Some(open) = trimmed.chars().next().filter(|c| *c == '[' || *c == '{') {
        let close = if open == '[' { ']' } else { '}' };
        // Whitespace outside the brackets is dropped; inside it is part of
        // the name.
        if trimmed.len() < 3 || !trimmed.ends_with(close) {
            return Err(format!("unterminated token '{}'", trimmed));
        }
        return Ok(TableEntry::Token(trimmed.to_string()));
    }

    if trimmed.is_empty() {
        if value.is_empty() {
            return Err("missing value".to_string());
        }
        // A whitespace-only value binds the space glyph.
        return Ok(TableEntry::Glyph(' '));
    }

    let glyph = value.trim_end();
    let mut chars = glyph.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(TableEntry::Glyph(c)),
        _ => Err(format!("'{}' is neither a single glyph nor a token", glyph)),
    }
}
