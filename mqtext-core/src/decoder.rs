use crate::control::{opaque_token, ControlVocabulary};
use crate::dictionary::Dictionary;
use crate::table::{CharTable, TableEntry};
use crate::{DICT_BASE, END_BYTE, MAX_DICT_DEPTH};

/// Turns dialog bytes into text with bracketed tokens.
pub struct Decoder<'a> {
    table: &'a CharTable,
    dictionary: &'a Dictionary,
    vocab: &'a ControlVocabulary,
}

impl<'a> Decoder<'a> {
    pub fn new(
        table: &'a CharTable,
        dictionary: &'a Dictionary,
        vocab: &'a ControlVocabulary,
    ) -> Self {
        Decoder {
            table,
            dictionary,
            vocab,
        }
    }

    /// Decode up to the first `[END]`; the terminator itself is not part of
    /// the text.
    pub fn decode(&self, bytes: &[u8]) -> String {
        let mut out = String::new();
        self.decode_into(bytes, 0, &mut out);
        out
    }

    /// Text of a dictionary entry as a dialog referencing it would see it.
    pub fn expand_entry(&self, index: u8) -> String {
        let mut out = String::new();
        if let Some(entry) = self.dictionary.get(index) {
            self.decode_into(&entry.payload, 1, &mut out);
        }
        out
    }

    fn decode_into(&self, bytes: &[u8], depth: usize, out: &mut String) {
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b == END_BYTE {
                return;
            }
            i += 1;

            if let Some(code) = self.vocab.lookup(b) {
                let take = (code.arity as usize).min(bytes.len() - i);
                out.push_str(&code.render(&bytes[i..i + take]));
                i += take;
                continue;
            }

            if b >= DICT_BASE {
                if let Some(entry) = self.dictionary.get(b) {
                    if depth >= MAX_DICT_DEPTH {
                        log::warn!("Dictionary nesting limit reached at entry {:02X}", b);
                        out.push_str(&format!("[DEPTH:{:02X}]", b));
                    } else {
                        self.decode_into(&entry.payload, depth + 1, out);
                    }
                    continue;
                }
            }

            match self.table.entry(b) {
                Some(TableEntry::Glyph(c)) => out.push(*c),
                Some(TableEntry::Token(t)) => out.push_str(t),
                None if b < DICT_BASE => out.push_str(&opaque_token(b)),
                None => out.push_str(&format!("[?{:02X}]", b)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlCode, LayoutEffect};
    use crate::rom::{RomImage, ROM_SIZE};
    use crate::DICT_ENTRIES;

    fn dictionary(table: &CharTable, vocab: &ControlVocabulary) -> Dictionary {
        // 0x31 = "the", 0x32 = "the ", 0x33 = "ing"
        let payloads: [&[u8]; 4] = [&[0x9A], &[0xC7, 0xBB, 0xB8], &[0x31, 0xFF], &[0xBC, 0xC1, 0xBA]];
        let mut bytes = vec![0u8; ROM_SIZE];
        let mut cursor = 0x01BA35;
        for i in 0..DICT_ENTRIES {
            let p = payloads.get(i).copied().unwrap_or(&[]);
            bytes[cursor] = p.len() as u8;
            bytes[cursor + 1..cursor + 1 + p.len()].copy_from_slice(p);
            cursor += 1 + p.len();
        }
        let rom = RomImage::from_bytes(bytes).unwrap();
        Dictionary::load(&rom, 0x01BA35, DICT_ENTRIES, table, vocab).unwrap()
    }

    #[test]
    fn decodes_glyphs_and_dictionary() {
        let table = CharTable::reference().unwrap();
        let vocab = ControlVocabulary::reference();
        let dict = dictionary(&table, &vocab);
        let decoder = Decoder::new(&table, &dict, &vocab);

        // "Go to " 0x32 "Focus Tower."
        let mut bytes = vec![0xA0, 0xC2, 0xFF, 0xC7, 0xC2, 0xFF, 0x32];
        bytes.extend([0x9F, 0xC2, 0xB6, 0xC8, 0xC6, 0xFF, 0xAD, 0xC2, 0xCA, 0xB8, 0xC5, 0xD2, 0x00]);
        assert_eq!(decoder.decode(&bytes), "Go to the Focus Tower.");
    }

    #[test]
    fn stops_at_end_and_renders_controls() {
        let table = CharTable::reference().unwrap();
        let vocab = ControlVocabulary::reference();
        let dict = dictionary(&table, &vocab);
        let decoder = Decoder::new(&table, &dict, &vocab);

        let bytes = [0x1A, 0xA1, 0x04, 0x01, 0x36, 0x30, 0x0C, 0x80, 0x00, 0x9A];
        assert_eq!(
            decoder.decode(&bytes),
            "[TEXTBOX_BELOW]H[NAME]{newline}[PAGE][PARA][CMD:0C][?80]"
        );
    }

    #[test]
    fn unknown_codes_consume_nothing() {
        let table = CharTable::reference().unwrap();
        let vocab = ControlVocabulary::reference();
        let dict = dictionary(&table, &vocab);
        let decoder = Decoder::new(&table, &dict, &vocab);
        assert_eq!(decoder.decode(&[0x10, 0x9A, 0x00]), "[CMD:10]A");
    }

    #[test]
    fn registered_arity_takes_parameters() {
        let table = CharTable::reference().unwrap();
        let mut vocab = ControlVocabulary::reference();
        vocab.register(ControlCode {
            byte: 0x10,
            token: "[SOUND]".to_string(),
            arity: 1,
            effect: LayoutEffect::Opaque,
        });
        let dict = dictionary(&table, &vocab);
        let decoder = Decoder::new(&table, &dict, &vocab);
        // The parameter is raw even when it looks like a terminator.
        assert_eq!(decoder.decode(&[0x10, 0x00, 0x9A, 0x00]), "[SOUND:00]A");
    }

    #[test]
    fn decoding_is_deterministic() {
        let table = CharTable::reference().unwrap();
        let vocab = ControlVocabulary::reference();
        let dict = dictionary(&table, &vocab);
        let decoder = Decoder::new(&table, &dict, &vocab);
        let bytes = [0xAC, 0x33, 0x06, 0x03, 0x1F, 0x00];
        assert_eq!(decoder.decode(&bytes), "Sing_*[CRYSTAL]");
        assert_eq!(decoder.decode(&bytes), decoder.decode(&bytes));
    }
}
