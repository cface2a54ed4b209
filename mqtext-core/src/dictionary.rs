use std::collections::BTreeSet;

use crate::control::ControlVocabulary;
use crate::decoder::Decoder;
use crate::rom::RomImage;
use crate::table::CharTable;
use crate::{CodecError, Result, DICT_BASE, DICT_ENTRIES, END_BYTE, MAX_DICT_DEPTH};

#[derive(Debug, Clone)]
pub struct DictionaryEntry {
    pub index: u8,
    /// File offset of the length byte.
    pub offset: usize,
    pub payload: Vec<u8>,
    /// Fully expanded text, as a dialog referencing this entry decodes it.
    pub text: String,
    /// Longest chain of nested references, counting this entry.
    pub depth: usize,
}

impl DictionaryEntry {
    /// Dictionary indices referenced directly by this entry's payload.
    pub fn references(&self, vocab: &ControlVocabulary, count: usize) -> BTreeSet<u8> {
        payload_references(&self.payload, vocab, count)
    }
}

/// The compression dictionary: length-prefixed entries indexed from `0x30`.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: Vec<DictionaryEntry>,
    /// Expanded text -> index, longest text first.
    matchers: Vec<(String, u8)>,
    end_offset: usize,
}

fn payload_references(payload: &[u8], vocab: &ControlVocabulary, count: usize) -> BTreeSet<u8> {
    let mut refs = BTreeSet::new();
    let mut i = 0;
    while i < payload.len() {
        let b = payload[i];
        if b == END_BYTE {
            break;
        }
        if let Some(code) = vocab.lookup(b) {
            i += 1 + code.arity as usize;
            continue;
        }
        if b >= DICT_BASE && ((b - DICT_BASE) as usize) < count {
            refs.insert(b);
        }
        i += 1;
    }
    refs
}

impl Dictionary {
    /// An empty dictionary, for databases that are not bound to an image.
    pub fn empty() -> Self {
        Dictionary::default()
    }

    /// Read `count` length-prefixed entries starting at `offset`, reject
    /// reference cycles and expand every entry.
    pub fn load(
        rom: &RomImage,
        offset: usize,
        count: usize,
        table: &CharTable,
        vocab: &ControlVocabulary,
    ) -> Result<Self> {
        if count > DICT_ENTRIES {
            return Err(CodecError::Config(format!(
                "dictionary holds at most {} entries, layout asks for {}",
                DICT_ENTRIES, count
            )));
        }
        log::info!("Reading {} dictionary entries at 0x{:06X}", count, offset);

        let mut entries = Vec::with_capacity(count);
        let mut cursor = offset;
        for i in 0..count {
            let len = rom.read_byte(cursor)? as usize;
            let payload = rom.slice(cursor + 1, len)?.to_vec();
            entries.push(DictionaryEntry {
                index: DICT_BASE + i as u8,
                offset: cursor,
                payload,
                text: String::new(),
                depth: 0,
            });
            cursor += 1 + len;
        }

        let mut dict = Dictionary {
            entries,
            matchers: Vec::new(),
            end_offset: cursor,
        };
        dict.resolve_depths(vocab)?;
        dict.check_payloads(table, vocab);

        let texts: Vec<String> = {
            let decoder = Decoder::new(table, &dict, vocab);
            dict.entries
                .iter()
                .map(|e| decoder.expand_entry(e.index))
                .collect()
        };
        for (entry, text) in dict.entries.iter_mut().zip(texts) {
            log::debug!("Dictionary {:02X} = {:?}", entry.index, text);
            entry.text = text;
        }
        dict.build_matchers(vocab);

        Ok(dict)
    }

    /// Bottom-up fixed point over the reference graph. An entry resolves
    /// once every entry it references has resolved; a pass without progress
    /// means the remaining entries sit on or behind a cycle.
    fn resolve_depths(&mut self, vocab: &ControlVocabulary) -> Result<()> {
        let count = self.entries.len();
        let refs: Vec<BTreeSet<u8>> = self
            .entries
            .iter()
            .map(|e| e.references(vocab, count))
            .collect();

        let mut depth: Vec<Option<usize>> = vec![None; count];
        loop {
            let mut progressed = false;
            for i in 0..count {
                if depth[i].is_some() {
                    continue;
                }
                let mut deepest = 0;
                let mut ready = true;
                for r in &refs[i] {
                    match depth[(r - DICT_BASE) as usize] {
                        Some(d) => deepest = deepest.max(d),
                        None => {
                            ready = false;
                            break;
                        }
                    }
                }
                if ready {
                    depth[i] = Some(deepest + 1);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }

        if let Some(start) = depth.iter().position(|d| d.is_none()) {
            return Err(CodecError::DictionaryCycle {
                index: find_cycle_member(start, &refs, &depth),
            });
        }

        for (entry, d) in self.entries.iter_mut().zip(depth) {
            entry.depth = d.unwrap_or(0);
            if entry.depth > MAX_DICT_DEPTH {
                log::warn!(
                    "Dictionary {:02X} nests {} levels deep; its expansion is truncated",
                    entry.index,
                    entry.depth
                );
            }
        }
        Ok(())
    }

    fn check_payloads(&self, table: &CharTable, vocab: &ControlVocabulary) {
        for entry in &self.entries {
            let mut i = 0;
            while i < entry.payload.len() {
                let b = entry.payload[i];
                if b == END_BYTE {
                    break;
                }
                if let Some(code) = vocab.lookup(b) {
                    i += 1 + code.arity as usize;
                    continue;
                }
                if self.get(b).is_none() && table.entry(b).is_none() {
                    log::warn!(
                        "Dictionary {:02X} contains byte {:02X} with no table entry",
                        entry.index,
                        b
                    );
                }
                i += 1;
            }
        }
    }

    fn build_matchers(&mut self, vocab: &ControlVocabulary) {
        let mut matchers: Vec<(String, u8)> = self
            .entries
            .iter()
            .filter(|e| !vocab.shadows(e.index))
            .filter(|e| !e.text.is_empty() && !e.text.contains("[DEPTH:"))
            .map(|e| (e.text.clone(), e.index))
            .collect();
        matchers.sort_by(|a, b| {
            b.0.chars()
                .count()
                .cmp(&a.0.chars().count())
                .then(a.1.cmp(&b.1))
        });
        self.matchers = matchers;
    }

    pub fn get(&self, index: u8) -> Option<&DictionaryEntry> {
        if index < DICT_BASE {
            return None;
        }
        self.entries.get((index - DICT_BASE) as usize)
    }

    pub fn entries(&self) -> &[DictionaryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File offset just past the last entry.
    pub fn end_offset(&self) -> usize {
        self.end_offset
    }

    /// Encoder candidates: expanded text and index, longest text first and
    /// lowest index among equals.
    pub fn matchers(&self) -> &[(String, u8)] {
        &self.matchers
    }

    /// One `HH=text` line per entry followed by the raw payload.
    pub fn to_table_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| {
                let raw: Vec<String> = e.payload.iter().map(|b| format!("{:02X}", b)).collect();
                format!("{:02X}={}\t# {}", e.index, e.text, raw.join(" "))
            })
            .collect()
    }
}

/// Walk unresolved references from `start` until an entry repeats.
fn find_cycle_member(start: usize, refs: &[BTreeSet<u8>], depth: &[Option<usize>]) -> u8 {
    let mut seen = vec![false; refs.len()];
    let mut current = start;
    loop {
        if seen[current] {
            return DICT_BASE + current as u8;
        }
        seen[current] = true;
        let next = refs[current]
            .iter()
            .map(|r| (r - DICT_BASE) as usize)
            .find(|&r| depth[r].is_none());
        match next {
            Some(n) => current = n,
            None => return DICT_BASE + current as u8,
        }
    }
}
