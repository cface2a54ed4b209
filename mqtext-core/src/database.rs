use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::control::ControlVocabulary;
use crate::decoder::Decoder;
use crate::dictionary::Dictionary;
use crate::encoder::Encoder;
use crate::export::{self, DialogRow, ExportFormat};
use crate::layout::{LayoutConfig, LayoutReport};
use crate::rom::{file_to_lorom, lorom_to_file, write_atomically, RomImage};
use crate::table::CharTable;
use crate::token::{segments, Segment};
use crate::{CodecError, Result, RomLayout, DICT_BASE, END_BYTE, MAX_DICT_DEPTH};

/// One entry of the pointer table and the text it points at.
#[derive(Debug, Clone)]
pub struct DialogRecord {
    pub id: u16,
    pub pointer: u16,
    pub address: usize,
    pub raw: Vec<u8>,
    pub text: String,
    /// Byte length including the terminating `[END]`.
    pub length: usize,
    pub tags: BTreeSet<String>,
    pub notes: String,
    pub modified: bool,
    /// Bytes read at extraction, shared between dialogs with one pointer.
    original_raw: Rc<[u8]>,
    original_text: String,
    /// Bytes an in-place write may use.
    slot: usize,
}

impl DialogRecord {
    pub fn original_raw(&self) -> &[u8] {
        &self.original_raw
    }

    pub fn original_text(&self) -> &str {
        &self.original_text
    }

    pub fn slot_size(&self) -> usize {
        self.slot
    }

    fn to_row(&self) -> DialogRow {
        DialogRow {
            id: self.id,
            text: self.text.clone(),
            pointer: self.pointer,
            address: self.address,
            length: self.length,
            tags: self.tags.iter().cloned().collect(),
            notes: self.notes.clone(),
            modified: self.modified,
        }
    }
}

/// New pointer and file address per dialog id after a repack.
type Relocations = BTreeMap<u16, (u16, usize)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Overwrite each modified dialog in its original slot.
    InPlace,
    /// Rebuild the whole dialog region and rewrite every pointer.
    Repack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveSummary {
    pub mode: SaveMode,
    pub path: PathBuf,
    pub dialogs_written: usize,
    pub bytes_used: usize,
    pub budget: usize,
}

impl SaveSummary {
    pub fn free(&self) -> usize {
        self.budget.saturating_sub(self.bytes_used)
    }
}

#[derive(Debug)]
pub struct DialogFailure {
    pub id: u16,
    pub error: CodecError,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub applied: Vec<u16>,
    pub unchanged: usize,
    pub failures: Vec<DialogFailure>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A dialog whose decoded text does not re-encode to its stored bytes.
#[derive(Debug)]
pub struct RoundTripMismatch {
    pub id: u16,
    pub original: Vec<u8>,
    pub reencoded: Vec<u8>,
    /// Index of the first differing byte, or `None` when encoding failed.
    pub first_difference: Option<usize>,
    pub error: Option<CodecError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogStatistics {
    pub dialog_count: usize,
    pub total_bytes: usize,
    pub average_length: f64,
    pub modified: usize,
    pub tagged: usize,
    pub control_usage: BTreeMap<String, usize>,
    pub dictionary_entries_used: usize,
    pub region_start: usize,
    pub region_budget: usize,
    pub region_used: usize,
}

impl DialogStatistics {
    pub fn region_free(&self) -> usize {
        self.region_budget.saturating_sub(self.region_used)
    }
}

/// Something in one dialog worth a second look. None of these block a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogIssue {
    /// Only whitespace before the terminator.
    Empty,
    /// Same text, ignoring case and surrounding whitespace, as these dialogs.
    Duplicate(Vec<u16>),
    /// A byte neither the vocabulary nor the table names.
    Undecoded(String),
}

impl fmt::Display for DialogIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogIssue::Empty => write!(f, "empty or whitespace only"),
            DialogIssue::Duplicate(others) => {
                let others: Vec<String> = others.iter().map(|id| format!("0x{:04X}", id)).collect();
                write!(f, "same text as {}", others.join(", "))
            }
            DialogIssue::Undecoded(token) => write!(f, "undecoded byte {}", token),
        }
    }
}

/// Every dialog of one ROM image together with the tables needed to decode
/// and re-encode them.
pub struct DialogDatabase {
    rom: Option<RomImage>,
    layout: RomLayout,
    table: CharTable,
    vocab: ControlVocabulary,
    dictionary: Dictionary,
    records: BTreeMap<u16, DialogRecord>,
    rom_name: String,
}

impl DialogDatabase {
    pub fn open<P: AsRef<Path>>(path: P, layout: RomLayout, table: CharTable) -> Result<Self> {
        let rom = RomImage::open(path)?;
        Self::from_image(rom, layout, table, ControlVocabulary::reference())
    }

    /// Bind to an image: load its dictionary and extract every dialog.
    pub fn from_image(
        rom: RomImage,
        layout: RomLayout,
        table: CharTable,
        vocab: ControlVocabulary,
    ) -> Result<Self> {
        let dictionary = Dictionary::load(
            &rom,
            layout.dictionary,
            layout.dictionary_entries,
            &table,
            &vocab,
        )?;
        let mut db = DialogDatabase {
            rom_name: rom.file_name(),
            rom: Some(rom),
            layout,
            table,
            vocab,
            dictionary,
            records: BTreeMap::new(),
        };
        db.extract_all()?;
        Ok(db)
    }

    /// A database with no image, only good for moving export files between
    /// formats.
    pub fn detached(table: CharTable) -> Self {
        DialogDatabase {
            rom: None,
            layout: RomLayout::reference(),
            table,
            vocab: ControlVocabulary::reference(),
            dictionary: Dictionary::empty(),
            records: BTreeMap::new(),
            rom_name: "unknown".to_string(),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.rom.is_none()
    }

    pub fn rom(&self) -> Option<&RomImage> {
        self.rom.as_ref()
    }

    pub fn layout(&self) -> &RomLayout {
        &self.layout
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn vocabulary(&self) -> &ControlVocabulary {
        &self.vocab
    }

    pub fn decoder(&self) -> Decoder<'_> {
        Decoder::new(&self.table, &self.dictionary, &self.vocab)
    }

    pub fn encoder(&self) -> Encoder<'_> {
        Encoder::new(&self.table, &self.dictionary, &self.vocab)
    }

    /// Read the pointer table and rebuild every record from the image,
    /// discarding edits and metadata.
    pub fn extract_all(&mut self) -> Result<usize> {
        let rom = self.rom.as_ref().ok_or(CodecError::Detached)?;
        let decoder = Decoder::new(&self.table, &self.dictionary, &self.vocab);
        let layout = &self.layout;
        log::info!(
            "Extracting {} dialogs from pointer table at 0x{:06X}",
            layout.dialog_count,
            layout.pointer_table
        );

        let mut shared: HashMap<usize, Rc<[u8]>> = HashMap::new();
        let mut records = BTreeMap::new();
        for i in 0..layout.dialog_count {
            let id = i as u16;
            let pointer = rom.read_u16_le(layout.pointer_table + i * 2)?;
            let address = lorom_to_file(layout.dialog_bank, pointer, rom.len())?;
            let raw: Rc<[u8]> = match shared.get(&address) {
                Some(bytes) => {
                    log::debug!("Dialog 0x{:04X} shares pointer 0x{:04X}", id, pointer);
                    Rc::clone(bytes)
                }
                None => {
                    let bytes: Rc<[u8]> = Rc::from(rom.read_until_end(address)?);
                    shared.insert(address, Rc::clone(&bytes));
                    bytes
                }
            };
            let text = decoder.decode(&raw);
            log::trace!("Dialog 0x{:04X} @ 0x{:06X}: {}", id, address, text);

            records.insert(
                id,
                DialogRecord {
                    id,
                    pointer,
                    address,
                    raw: raw.to_vec(),
                    text: text.clone(),
                    length: raw.len(),
                    tags: BTreeSet::new(),
                    notes: String::new(),
                    modified: false,
                    slot: raw.len(),
                    original_raw: raw,
                    original_text: text,
                },
            );
        }

        let total: usize = records.values().map(|r: &DialogRecord| r.length).sum();
        log::info!("Extracted {} dialogs ({} bytes)", records.len(), total);
        self.records = records;
        Ok(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &DialogRecord> {
        self.records.values()
    }

    pub fn get(&self, id: u16) -> Result<&DialogRecord> {
        self.records.get(&id).ok_or(CodecError::UnknownDialog(id))
    }

    fn get_mut(&mut self, id: u16) -> Result<&mut DialogRecord> {
        self.records
            .get_mut(&id)
            .ok_or(CodecError::UnknownDialog(id))
    }

    pub fn list_tags(&self, tag: &str) -> Vec<&DialogRecord> {
        self.records.values().filter(|r| r.tags.contains(tag)).collect()
    }

    pub fn add_tag(&mut self, id: u16, tag: &str) -> Result<()> {
        self.get_mut(id)?.tags.insert(tag.to_string());
        Ok(())
    }

    pub fn remove_tag(&mut self, id: u16, tag: &str) -> Result<bool> {
        Ok(self.get_mut(id)?.tags.remove(tag))
    }

    pub fn set_notes(&mut self, id: u16, notes: &str) -> Result<()> {
        self.get_mut(id)?.notes = notes.to_string();
        Ok(())
    }

    /// Case-insensitive substring search over text, tags and notes.
    pub fn search(&self, query: &str) -> Vec<&DialogRecord> {
        let needle = query.to_lowercase();
        self.records
            .values()
            .filter(|r| {
                r.text.to_lowercase().contains(&needle)
                    || r.notes.to_lowercase().contains(&needle)
                    || r.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Re-encode `text` into dialog `id`. Unchanged text keeps the bytes
    /// read from the image.
    pub fn update(&mut self, id: u16, text: &str) -> Result<()> {
        if self.rom.is_none() {
            return Err(CodecError::Detached);
        }
        let record = self.get(id)?;
        let (raw, decoded) = if text == record.original_text {
            (record.original_raw.to_vec(), record.original_text.clone())
        } else {
            let raw = self.encoder().encode(text, None)?;
            let decoded = self.decoder().decode(&raw);
            (raw, decoded)
        };

        let record = self.get_mut(id)?;
        record.modified = raw.as_slice() != &*record.original_raw;
        record.length = raw.len();
        record.raw = raw;
        record.text = decoded;
        log::debug!(
            "Dialog 0x{:04X} updated: {} bytes{}",
            id,
            record.length,
            if record.modified { "" } else { " (unchanged)" }
        );
        Ok(())
    }

    /// Byte range `[start, end)` repack may fill.
    fn region(&self) -> (usize, usize) {
        let start = self.records.values().map(|r| r.address).min().unwrap_or(0);
        let occupied = self
            .records
            .values()
            .map(|r| r.address + r.slot)
            .max()
            .unwrap_or(start);
        let mut end = self.layout.region_end.unwrap_or(occupied);

        // Never spill over the tables that share the bank.
        let protected = [
            (
                self.layout.pointer_table,
                self.layout.pointer_table + self.layout.pointer_table_len(),
            ),
            (self.layout.dictionary, self.dictionary.end_offset()),
        ];
        for (lo, hi) in protected {
            if lo >= start && lo < end && hi > lo {
                end = lo;
            }
        }
        (start, end.max(start))
    }

    /// Write every record back and save the result to `path`. The output
    /// file only appears once the whole image has been built and checked.
    pub fn save<P: AsRef<Path>>(&mut self, path: P, mode: SaveMode) -> Result<SaveSummary> {
        let path = path.as_ref();
        let rom = self.rom.as_ref().ok_or(CodecError::Detached)?;
        let mut image = rom.clone();

        let (dialogs_written, bytes_used, budget, relocated) = match mode {
            SaveMode::InPlace => {
                let (written, used) = self.write_in_place(&mut image)?;
                let (start, end) = self.region();
                (written, used, end - start, None)
            }
            SaveMode::Repack => {
                let (pointers, used, budget) = self.write_repacked(&mut image)?;
                (self.records.len(), used, budget, Some(pointers))
            }
        };

        image.save_as(path)?;

        for record in self.records.values_mut() {
            if let Some((pointer, address)) = relocated.as_ref().and_then(|p| p.get(&record.id)) {
                record.pointer = *pointer;
                record.address = *address;
                record.slot = record.raw.len();
            }
            record.original_raw = Rc::from(record.raw.as_slice());
            record.original_text = record.text.clone();
            record.modified = false;
        }
        self.rom_name = image.file_name();
        self.rom = Some(image);

        let summary = SaveSummary {
            mode,
            path: path.to_path_buf(),
            dialogs_written,
            bytes_used,
            budget,
        };
        log::info!(
            "Saved {} dialogs ({:?}): {} of {} bytes used",
            summary.dialogs_written,
            mode,
            summary.bytes_used,
            summary.budget
        );
        Ok(summary)
    }

    fn write_in_place(&self, image: &mut RomImage) -> Result<(usize, usize)> {
        let modified: Vec<&DialogRecord> = self.records.values().filter(|r| r.modified).collect();
        for record in &modified {
            if record.raw.len() > record.slot {
                return Err(CodecError::SlotOverflow {
                    id: record.id,
                    len: record.raw.len(),
                    capacity: record.slot,
                });
            }
        }
        for record in &modified {
            image.write_bytes(record.address, &record.raw)?;
        }

        // Dialogs that share bytes with a rewritten slot must still read
        // back as themselves.
        for record in self.records.values() {
            let actual = image.read_until_end(record.address).ok();
            if actual == Some(record.raw.as_slice()) {
                continue;
            }
            let writer = modified
                .iter()
                .find(|w| {
                    w.id != record.id
                        && w.address < record.address + record.slot
                        && record.address < w.address + w.raw.len()
                })
                .map_or(record.id, |w| w.id);
            return Err(CodecError::AliasConflict {
                id: writer,
                other: record.id,
            });
        }

        let mut seen = BTreeSet::new();
        let used = self
            .records
            .values()
            .filter(|r| seen.insert(r.address))
            .map(|r| r.raw.len())
            .sum();
        Ok((modified.len(), used))
    }

    /// Lay every record out contiguously in id order. Returns the new
    /// pointer and address per id, the arena size and the budget.
    fn write_repacked(&self, image: &mut RomImage) -> Result<(Relocations, usize, usize)> {
        let (start, end) = self.region();
        let budget = end - start;

        let mut arena: Vec<u8> = Vec::with_capacity(budget);
        let mut placed: HashMap<(u16, &[u8]), usize> = HashMap::new();
        let mut offsets = BTreeMap::new();
        for record in self.records.values() {
            let key = (record.pointer, record.raw.as_slice());
            let offset = match placed.get(&key) {
                Some(offset) => *offset,
                None => {
                    let offset = arena.len();
                    arena.extend_from_slice(&record.raw);
                    placed.insert(key, offset);
                    offset
                }
            };
            offsets.insert(record.id, offset);
        }

        if arena.len() > budget {
            return Err(CodecError::RegionOverflow {
                needed: arena.len(),
                budget,
            });
        }
        let used = arena.len();
        arena.resize(budget, END_BYTE);

        let mut relocations = Relocations::new();
        for (id, offset) in offsets {
            let address = start + offset;
            let pointer = file_to_lorom(self.layout.dialog_bank, address)?;
            image.write_u16_le(self.layout.pointer_table + id as usize * 2, pointer)?;
            relocations.insert(id, (pointer, address));
        }
        image.write_bytes(start, &arena)?;
        log::debug!(
            "Repacked {} dialogs into 0x{:06X}..0x{:06X}",
            relocations.len(),
            start,
            start + used
        );
        Ok((relocations, used, budget))
    }

    /// Re-encode every dialog's text and compare with its bytes.
    pub fn verify(&self) -> Vec<RoundTripMismatch> {
        let encoder = self.encoder();
        let mut mismatches = Vec::new();
        for record in self.records.values() {
            match encoder.encode(&record.text, None) {
                Ok(bytes) if bytes == record.raw => {}
                Ok(bytes) => {
                    let first_difference = bytes
                        .iter()
                        .zip(&record.raw)
                        .position(|(a, b)| a != b)
                        .unwrap_or_else(|| bytes.len().min(record.raw.len()));
                    mismatches.push(RoundTripMismatch {
                        id: record.id,
                        original: record.raw.clone(),
                        reencoded: bytes,
                        first_difference: Some(first_difference),
                        error: None,
                    });
                }
                Err(error) => mismatches.push(RoundTripMismatch {
                    id: record.id,
                    original: record.raw.clone(),
                    reencoded: Vec::new(),
                    first_difference: None,
                    error: Some(error),
                }),
            }
        }
        mismatches
    }

    pub fn layout_report(&self, id: u16, config: &LayoutConfig) -> Result<LayoutReport> {
        Ok(config.simulate(&self.get(id)?.text, &self.vocab))
    }

    /// Layout reports for the dialogs that break a limit.
    pub fn check_layout(&self, config: &LayoutConfig) -> Vec<(u16, LayoutReport)> {
        self.records
            .values()
            .map(|r| (r.id, config.simulate(&r.text, &self.vocab)))
            .filter(|(_, report)| !report.fits())
            .collect()
    }

    /// How often each dictionary entry is expanded across all dialogs,
    /// counting references nested inside other entries.
    pub fn dictionary_usage(&self) -> BTreeMap<u8, usize> {
        let mut usage: BTreeMap<u8, usize> =
            self.dictionary.entries().iter().map(|e| (e.index, 0)).collect();
        for record in self.records.values() {
            self.count_references(&record.raw, 0, &mut usage);
        }
        usage
    }

    fn count_references(&self, bytes: &[u8], depth: usize, usage: &mut BTreeMap<u8, usize>) {
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b == END_BYTE {
                return;
            }
            i += 1;
            if let Some(code) = self.vocab.lookup(b) {
                i += code.arity as usize;
                continue;
            }
            if b < DICT_BASE || depth >= MAX_DICT_DEPTH {
                continue;
            }
            if let Some(entry) = self.dictionary.get(b) {
                *usage.entry(b).or_insert(0) += 1;
                self.count_references(&entry.payload, depth + 1, usage);
            }
        }
    }

    pub fn statistics(&self) -> DialogStatistics {
        let dialog_count = self.records.len();
        let total_bytes: usize = self.records.values().map(|r| r.length).sum();

        let mut control_usage = BTreeMap::new();
        for record in self.records.values() {
            for segment in segments(&record.text) {
                if let Segment::Token(token) = segment {
                    *control_usage.entry(token.to_string()).or_insert(0) += 1;
                }
            }
        }

        let (region_start, region_end) = self.region();
        let mut seen = BTreeSet::new();
        let region_used = self
            .records
            .values()
            .filter(|r| seen.insert((r.pointer, r.raw.clone())))
            .map(|r| r.raw.len())
            .sum();

        DialogStatistics {
            dialog_count,
            total_bytes,
            average_length: if dialog_count == 0 {
                0.0
            } else {
                total_bytes as f64 / dialog_count as f64
            },
            modified: self.records.values().filter(|r| r.modified).count(),
            tagged: self.records.values().filter(|r| !r.tags.is_empty()).count(),
            control_usage,
            dictionary_entries_used: self.dictionary_usage().values().filter(|n| **n > 0).count(),
            region_start,
            region_budget: region_end - region_start,
            region_used,
        }
    }

    /// Groups of two or more dialogs whose text matches ignoring case and
    /// surrounding whitespace. Empty dialogs are left out.
    pub fn duplicates(&self) -> Vec<Vec<u16>> {
        let mut by_text: BTreeMap<String, Vec<u16>> = BTreeMap::new();
        for record in self.records.values() {
            let key = record.text.trim().to_lowercase();
            if !key.is_empty() {
                by_text.entry(key).or_default().push(record.id);
            }
        }
        let mut groups: Vec<Vec<u16>> = by_text.into_values().filter(|ids| ids.len() > 1).collect();
        groups.sort();
        groups
    }

    /// Empty dialogs, duplicated text and bytes that only decode to
    /// `[CMD:HH]` / `[?HH]`, in ascending id order.
    pub fn check(&self) -> Vec<(u16, DialogIssue)> {
        let mut duplicate_of: BTreeMap<u16, Vec<u16>> = BTreeMap::new();
        for group in self.duplicates() {
            for id in &group {
                let others = group.iter().copied().filter(|other| other != id).collect();
                duplicate_of.insert(*id, others);
            }
        }

        let mut issues = Vec::new();
        for record in self.records.values() {
            if record.text.trim().is_empty() {
                issues.push((record.id, DialogIssue::Empty));
            }
            if let Some(others) = duplicate_of.remove(&record.id) {
                issues.push((record.id, DialogIssue::Duplicate(others)));
            }
            for segment in segments(&record.text) {
                if let Segment::Token(token) = segment {
                    if token.starts_with("[CMD:") || token.starts_with("[?") {
                        issues.push((record.id, DialogIssue::Undecoded(token.to_string())));
                    }
                }
            }
        }
        issues
    }

    pub fn export_string(&self, format: ExportFormat) -> Result<String> {
        let rows: Vec<DialogRow> = self.records.values().map(DialogRecord::to_row).collect();
        export::render(format, &rows, &self.rom_name)
    }

    pub fn export<P: AsRef<Path>>(&self, format: ExportFormat, path: P) -> Result<()> {
        let path = path.as_ref();
        log::info!("Exporting {} dialogs as {} to {}", self.len(), format, path.display());
        let text = self.export_string(format)?;
        write_atomically(path, text.as_bytes())
    }

    pub fn import<P: AsRef<Path>>(&mut self, format: ExportFormat, path: P) -> Result<ImportReport> {
        let path = path.as_ref();
        log::info!("Importing {} dialogs from {}", format, path.display());
        let src = fs::read_to_string(path)?;
        self.import_str(format, &src)
    }

    /// Apply imported text by id. A bound database re-encodes each dialog
    /// and keeps its own metadata; a detached one takes the rows as given.
    pub fn import_str(&mut self, format: ExportFormat, src: &str) -> Result<ImportReport> {
        let rows = export::parse(format, src)?;
        let mut report = ImportReport::default();

        if self.rom.is_none() {
            for row in rows {
                report.applied.push(row.id);
                self.records.insert(row.id, record_from_row(row));
            }
            return Ok(report);
        }

        for row in rows {
            let before = match self.records.get(&row.id) {
                Some(record) => record.raw.clone(),
                None => {
                    log::warn!("Import names unknown dialog 0x{:04X}", row.id);
                    report.failures.push(DialogFailure {
                        id: row.id,
                        error: CodecError::UnknownDialog(row.id),
                    });
                    continue;
                }
            };
            match self.update(row.id, &row.text) {
                Ok(()) => {
                    if self.records.get(&row.id).map(|r| &r.raw) == Some(&before) {
                        report.unchanged += 1;
                    } else {
                        report.applied.push(row.id);
                    }
                }
                Err(error) => {
                    log::warn!("Dialog 0x{:04X}: {}", row.id, error);
                    report.failures.push(DialogFailure { id: row.id, error });
                }
            }
        }
        log::info!(
            "Import: {} changed, {} unchanged, {} failed",
            report.applied.len(),
            report.unchanged,
            report.failures.len()
        );
        Ok(report)
    }
}

fn record_from_row(row: DialogRow) -> DialogRecord {
    DialogRecord {
        id: row.id,
        pointer: row.pointer,
        address: row.address,
        raw: Vec::new(),
        length: row.length,
        tags: row.tags.into_iter().collect(),
        notes: row.notes,
        modified: row.modified,
        original_raw: Rc::from(Vec::<u8>::new()),
        original_text: row.text.clone(),
        text: row.text,
        slot: row.length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::ROM_SIZE;
    use crate::DICT_ENTRIES;

    const POINTERS: usize = 0x01B835;
    const DICT: usize = 0x01BA35;

    /// Three dialogs at the start of bank 3; the third aliases the second.
    fn database() -> DialogDatabase {
        let mut bytes = vec![0u8; ROM_SIZE];
        // Dictionary: 0x31 = "the"
        let mut cursor = DICT;
        for i in 0..DICT_ENTRIES {
            let p: &[u8] = if i == 1 { &[0xC7, 0xBB, 0xB8] } else { &[] };
            bytes[cursor] = p.len() as u8;
            bytes[cursor + 1..cursor + 1 + p.len()].copy_from_slice(p);
            cursor += 1 + p.len();
        }
        let dialogs: [&[u8]; 2] = [&[0x31, 0xFF, 0xA0, 0x00], &[0xA1, 0xBC, 0x00]];
        let mut address = 0x018000;
        let mut pointers = Vec::new();
        for d in dialogs {
            pointers.push(0x8000 + (address - 0x018000) as u16);
            bytes[address..address + d.len()].copy_from_slice(d);
            address += d.len();
        }
        pointers.push(pointers[1]);
        for (i, p) in pointers.iter().enumerate() {
            bytes[POINTERS + i * 2] = *p as u8;
            bytes[POINTERS + i * 2 + 1] = (*p >> 8) as u8;
        }

        let layout = RomLayout {
            dialog_count: 3,
            region_end: Some(0x018000 + 0x20),
            ..RomLayout::reference()
        };
        DialogDatabase::from_image(
            RomImage::from_bytes(bytes).unwrap(),
            layout,
            CharTable::reference().unwrap(),
            ControlVocabulary::reference(),
        )
        .unwrap()
    }

    #[test]
    fn extracts_records() {
        let db = database();
        assert_eq!(db.len(), 3);
        let first = db.get(0).unwrap();
        assert_eq!(first.text, "the G");
        assert_eq!(first.length, 4);
        assert_eq!(first.address, 0x018000);
        assert_eq!(db.get(2).unwrap().pointer, 0x8004);
        assert_eq!(db.get(2).unwrap().text, "Hi");
        assert!(matches!(db.get(9), Err(CodecError::UnknownDialog(9))));
    }

    #[test]
    fn unchanged_text_keeps_original_bytes() {
        let mut db = database();
        db.update(0, "the G").unwrap();
        assert!(!db.get(0).unwrap().modified);
        db.update(0, "the G[END]").unwrap();
        assert!(!db.get(0).unwrap().modified);
        db.update(0, "the H").unwrap();
        assert!(db.get(0).unwrap().modified);
        assert_eq!(db.get(0).unwrap().raw, vec![0x31, 0xFF, 0xA1, 0x00]);
    }

    #[test]
    fn update_reports_bad_glyphs() {
        let mut db = database();
        assert!(matches!(
            db.update(1, "H~"),
            Err(CodecError::UnencodableGlyph {
                position: 1,
                glyph: '~'
            })
        ));
        assert!(!db.get(1).unwrap().modified);
    }

    #[test]
    fn tags_notes_and_search() {
        let mut db = database();
        db.add_tag(1, "Greeting").unwrap();
        db.set_notes(0, "Opening line").unwrap();
        assert_eq!(db.list_tags("Greeting").len(), 1);
        assert!(db.remove_tag(1, "Greeting").unwrap());
        assert!(!db.remove_tag(1, "Greeting").unwrap());

        let hits: Vec<u16> = db.search("HI").iter().map(|r| r.id).collect();
        assert_eq!(hits, vec![1, 2]);
        let hits: Vec<u16> = db.search("opening").iter().map(|r| r.id).collect();
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn verify_and_usage() {
        let db = database();
        assert!(db.verify().is_empty());
        let usage = db.dictionary_usage();
        assert_eq!(usage.len(), 80);
        assert_eq!(usage[&0x31], 1);
        assert_eq!(usage[&0x32], 0);

        let stats = db.statistics();
        assert_eq!(stats.dialog_count, 3);
        assert_eq!(stats.total_bytes, 10);
        assert_eq!(stats.dictionary_entries_used, 1);
        assert_eq!(stats.region_start, 0x018000);
        assert_eq!(stats.region_budget, 0x20);
        assert_eq!(stats.region_used, 7);
        assert_eq!(stats.region_free(), 0x20 - 7);
    }

    #[test]
    fn detached_database_round_trips_json() {
        let json = r#"{"dialogs": [{"id": "0x0003", "text": "Hello", "tags": ["a"], "length": 6}], "count": 1, "rom": "x.sfc"}"#;
        let mut db = DialogDatabase::detached(CharTable::reference().unwrap());
        let report = db.import_str(ExportFormat::Json, json).unwrap();
        assert_eq!(report.applied, vec![3]);
        assert!(matches!(db.update(3, "Bye"), Err(CodecError::Detached)));
        assert!(matches!(
            db.save("never.sfc", SaveMode::InPlace),
            Err(CodecError::Detached)
        ));

        let out = db.export_string(ExportFormat::Csv).unwrap();
        let mut again = DialogDatabase::detached(CharTable::reference().unwrap());
        again.import_str(ExportFormat::Csv, &out).unwrap();
        let record = again.get(3).unwrap();
        assert_eq!(record.text, "Hello");
        assert_eq!(record.length, 6);
        assert!(record.tags.contains("a"));
    }
}
