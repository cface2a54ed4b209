use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::control::{ControlVocabulary, LayoutEffect};
use crate::token::{segments, Segment};
use crate::{CodecError, Result};

/// Dialog box limits of the engine, in column units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    pub chars_per_line: u32,
    pub lines_per_page: usize,
    pub max_pages: usize,
    /// Worst-case width of a `[NAME]` substitution.
    pub name_width: f32,
    /// Worst-case width of an `[ITEM]` substitution.
    pub item_width: f32,
    /// Single-character keys overriding the built-in widths.
    pub glyph_widths: BTreeMap<String, f32>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            chars_per_line: 32,
            lines_per_page: 3,
            max_pages: 4,
            name_width: 8.0,
            item_width: 12.0,
            glyph_widths: BTreeMap::new(),
        }
    }
}

fn default_width(c: char) -> f32 {
    match c {
        '\'' | ',' | '.' | ':' | ';' | '!' | 'i' | 'l' => 0.5,
        'm' | 'w' | 'M' | 'W' => 1.25,
        '@' | '%' | '&' => 1.5,
        _ => 1.0,
    }
}

impl LayoutConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading layout config: {}", path.display());
        let text = fs::read_to_string(path)?;
        let config: LayoutConfig = serde_json::from_str(&text)
            .map_err(|e| CodecError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chars_per_line == 0 || self.lines_per_page == 0 || self.max_pages == 0 {
            return Err(CodecError::Config(
                "line, page and dialog limits must be non-zero".to_string(),
            ));
        }
        for (key, width) in &self.glyph_widths {
            if key.chars().count() != 1 {
                return Err(CodecError::Config(format!(
                    "glyph width key {:?} is not a single character",
                    key
                )));
            }
            if !width.is_finite() || *width < 0.0 {
                return Err(CodecError::Config(format!(
                    "glyph width for {:?} must be a non-negative number",
                    key
                )));
            }
        }
        Ok(())
    }

    pub fn width_of(&self, c: char) -> f32 {
        let mut buf = [0u8; 4];
        self.glyph_widths
            .get(c.encode_utf8(&mut buf) as &str)
            .copied()
            .unwrap_or_else(|| default_width(c))
    }

    /// Break `text` into pages and lines and measure each line.
    pub fn simulate(&self, text: &str, vocab: &ControlVocabulary) -> LayoutReport {
        let mut pages: Vec<Vec<f32>> = vec![vec![0.0]];

        for segment in segments(text) {
            let width = match segment {
                Segment::Glyph(c) => self.width_of(c),
                Segment::Token(token) => match vocab.effect_of(token) {
                    Some(LayoutEffect::Terminate) => break,
                    Some(LayoutEffect::PageBreak) => {
                        pages.push(vec![0.0]);
                        continue;
                    }
                    Some(LayoutEffect::LineBreak) | Some(LayoutEffect::Paragraph) => {
                        if let Some(page) = pages.last_mut() {
                            page.push(0.0);
                        }
                        continue;
                    }
                    Some(LayoutEffect::NameSubstitution) => self.name_width,
                    Some(LayoutEffect::ItemSubstitution) => self.item_width,
                    Some(LayoutEffect::Glyph) => 1.0,
                    _ => 0.0,
                },
            };
            if let Some(line) = pages.last_mut().and_then(|p| p.last_mut()) {
                *line += width;
            }
        }

        for page in pages.iter_mut() {
            if page.len() > 1 && page.last().is_some_and(|w| *w <= 0.0) {
                page.pop();
            }
        }
        if pages.len() > 1 && pages.last().is_some_and(|p| p.len() == 1 && p[0] <= 0.0) {
            pages.pop();
        }

        let limit = self.chars_per_line as f32;
        let mut warnings = Vec::new();
        for (p, page) in pages.iter().enumerate() {
            for (l, width) in page.iter().enumerate() {
                if *width > limit {
                    warnings.push(LayoutWarning::LineTooWide {
                        page: p + 1,
                        line: l + 1,
                        width: *width,
                        limit,
                    });
                }
            }
            if page.len() > self.lines_per_page {
                warnings.push(LayoutWarning::TooManyLines {
                    page: p + 1,
                    lines: page.len(),
                    limit: self.lines_per_page,
                });
            }
        }
        if pages.len() > self.max_pages {
            warnings.push(LayoutWarning::TooManyPages {
                pages: pages.len(),
                limit: self.max_pages,
            });
        }

        LayoutReport { pages, warnings }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutWarning {
    LineTooWide {
        page: usize,
        line: usize,
        width: f32,
        limit: f32,
    },
    TooManyLines {
        page: usize,
        lines: usize,
        limit: usize,
    },
    TooManyPages {
        pages: usize,
        limit: usize,
    },
}

impl fmt::Display for LayoutWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutWarning::LineTooWide {
                page,
                line,
                width,
                limit,
            } => write!(
                f,
                "page {} line {} is {:.2} units wide (limit {})",
                page, line, width, limit
            ),
            LayoutWarning::TooManyLines { page, lines, limit } => {
                write!(f, "page {} has {} lines (limit {})", page, lines, limit)
            }
            LayoutWarning::TooManyPages { pages, limit } => {
                write!(f, "{} pages (limit {})", pages, limit)
            }
        }
    }
}

/// Measured line widths per page, and any limits they break.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutReport {
    pub pages: Vec<Vec<f32>>,
    pub warnings: Vec<LayoutWarning>,
}

impl LayoutReport {
    pub fn fits(&self) -> bool {
        self.warnings.is_empty()
    }
}
