use std::path::PathBuf;
use thiserror::Error;

pub mod control;
pub mod database;
pub mod decoder;
pub mod dictionary;
pub mod encoder;
pub mod export;
pub mod layout;
pub mod rom;
pub mod table;
mod token;

pub use control::{ControlCode, ControlVocabulary, LayoutEffect};
pub use database::{
    DialogDatabase, DialogFailure, DialogIssue, DialogRecord, DialogStatistics, ImportReport,
    RoundTripMismatch, SaveMode, SaveSummary,
};
pub use decoder::Decoder;
pub use dictionary::{Dictionary, DictionaryEntry};
pub use encoder::Encoder;
pub use export::ExportFormat;
pub use layout::{LayoutConfig, LayoutReport, LayoutWarning};
pub use rom::RomImage;
pub use table::CharTable;

/// Byte that terminates every dialog.
pub const END_BYTE: u8 = 0x00;

/// Dictionary indices occupy `0x30..=0x7F`.
pub const DICT_BASE: u8 = 0x30;
pub const DICT_ENTRIES: usize = 80;

/// Hard limit on nested dictionary expansion.
pub const MAX_DICT_DEPTH: usize = 10;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ROM image is too small: {size} bytes (expected {expected})")]
    RomTooSmall { size: usize, expected: usize },

    #[error("ROM image is too large: {size} bytes (expected {expected})")]
    RomTooLarge { size: usize, expected: usize },

    #[error("address ${bank:02X}:{local:04X} is not mapped to ROM")]
    AddressUnmapped { bank: u8, local: u16 },

    #[error("read of {len} byte(s) at 0x{offset:06X} runs past the end of the image")]
    OutOfBounds { offset: usize, len: usize },

    #[error("character table line {line}: {reason}")]
    TableMalformed { line: usize, reason: String },

    #[error("dictionary entry 0x{index:02X} is part of a reference cycle")]
    DictionaryCycle { index: u8 },

    #[error("character {glyph:?} at position {position} has no byte mapping")]
    UnencodableGlyph { position: usize, glyph: char },

    #[error("text continues after the terminator at position {position}")]
    TextAfterEnd { position: usize },

    #[error("encoded text is {len} bytes, over the {max}-byte limit")]
    LengthExceeded { len: usize, max: usize },

    #[error("dialog 0x{id:04X} needs {len} bytes but its slot holds {capacity}")]
    SlotOverflow { id: u16, len: usize, capacity: usize },

    #[error("repacked dialogs need {needed} bytes but the region holds {budget}")]
    RegionOverflow { needed: usize, budget: usize },

    #[error("writing dialog 0x{id:04X} in place would corrupt dialog 0x{other:04X}")]
    AliasConflict { id: u16, other: u16 },

    #[error("no dialog with id 0x{0:04X}")]
    UnknownDialog(u16),

    #[error("{format} import, record {record}: {reason}")]
    ImportFormat {
        format: &'static str,
        record: usize,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation requires a ROM image but the database is detached")]
    Detached,
}

impl CodecError {
    /// Load-time failures that end the whole session. Everything else is
    /// reported per dialog (or per save) and processing continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CodecError::Io(_)
                | CodecError::RomTooSmall { .. }
                | CodecError::RomTooLarge { .. }
                | CodecError::AddressUnmapped { .. }
                | CodecError::OutOfBounds { .. }
                | CodecError::TableMalformed { .. }
                | CodecError::DictionaryCycle { .. }
                | CodecError::Config(_)
                | CodecError::Detached
        )
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Fixed locations of the dialog structures inside one ROM image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomLayout {
    pub pointer_table: usize,
    pub dialog_count: usize,
    pub dialog_bank: u8,
    pub dictionary: usize,
    pub dictionary_entries: usize,
    /// Exclusive end of the area repack may fill. When unset the budget is
    /// the span the original dialogs occupy.
    pub region_end: Option<usize>,
}

impl RomLayout {
    pub fn reference() -> Self {
        RomLayout {
            pointer_table: 0x01B835,
            dialog_count: 117,
            dialog_bank: 0x03,
            dictionary: 0x01BA35,
            dictionary_entries: DICT_ENTRIES,
            region_end: None,
        }
    }

    pub(crate) fn pointer_table_len(&self) -> usize {
        self.dialog_count * 2
    }
}

impl Default for RomLayout {
    fn default() -> Self {
        RomLayout::reference()
    }
}

/// Where a session reads its character table from.
#[derive(Debug, Clone, Default)]
pub enum TableSource {
    #[default]
    Reference,
    File(PathBuf),
}

impl TableSource {
    pub fn load(&self) -> Result<CharTable> {
        match self {
            TableSource::Reference => CharTable::reference(),
            TableSource::File(path) => CharTable::from_file(path),
        }
    }
}
