use std::collections::HashMap;

use crate::control::ControlVocabulary;
use crate::dictionary::Dictionary;
use crate::table::CharTable;
use crate::token::{bracketed_len, opaque_byte, split_params};
use crate::{CodecError, Result, END_BYTE};

/// Greedy longest-match compressor from decoded text back to dialog bytes.
pub struct Encoder<'a> {
    table: &'a CharTable,
    dictionary: &'a Dictionary,
    vocab: &'a ControlVocabulary,
    /// Every fixed token spelling, longest first.
    tokens: Vec<(String, u8)>,
}

impl<'a> Encoder<'a> {
    pub fn new(
        table: &'a CharTable,
        dictionary: &'a Dictionary,
        vocab: &'a ControlVocabulary,
    ) -> Self {
        let mut by_spelling: HashMap<String, u8> = table
            .tokens()
            .map(|(t, b)| (t.to_string(), b))
            .collect();
        // The vocabulary decides which byte a shared spelling means.
        for code in vocab.iter() {
            by_spelling.insert(code.token.clone(), code.byte);
        }
        let mut tokens: Vec<(String, u8)> = by_spelling.into_iter().collect();
        tokens.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.1.cmp(&b.1)));

        Encoder {
            table,
            dictionary,
            vocab,
            tokens,
        }
    }

    /// Encode `text`, appending `[END]` unless the text already ends with
    /// one. A terminator anywhere else fails with `TextAfterEnd`, since the
    /// engine never reads past it. Fails when the result is longer than
    /// `max_bytes`.
    pub fn encode(&self, text: &str, max_bytes: Option<usize>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(text.len());
        let mut pos = 0;
        let mut terminated = false;

        while pos < text.len() {
            if terminated {
                return Err(CodecError::TextAfterEnd {
                    position: text[..pos].chars().count(),
                });
            }
            let rest = &text[pos..];

            if let Some((len, byte)) = self.match_token(rest) {
                out.push(byte);
                pos += len;
                terminated = byte == END_BYTE;
                continue;
            }

            if let Some((len, bytes)) = self.match_param_token(rest) {
                terminated = bytes.first() == Some(&END_BYTE);
                out.extend(bytes);
                pos += len;
                continue;
            }

            if let Some((expanded, index)) = self
                .dictionary
                .matchers()
                .iter()
                .find(|(expanded, _)| rest.starts_with(expanded.as_str()))
            {
                out.push(*index);
                pos += expanded.len();
                continue;
            }

            let glyph = rest.chars().next().unwrap_or_default();
            match self.table.glyph_byte(glyph) {
                Some(byte) => {
                    out.push(byte);
                    pos += glyph.len_utf8();
                    terminated = byte == END_BYTE;
                }
                None => {
                    return Err(CodecError::UnencodableGlyph {
                        position: text[..pos].chars().count(),
                        glyph,
                    });
                }
            }
        }

        if !terminated {
            out.push(END_BYTE);
        }

        if let Some(max) = max_bytes {
            if out.len() > max {
                return Err(CodecError::LengthExceeded {
                    len: out.len(),
                    max,
                });
            }
        }
        Ok(out)
    }

    fn match_token(&self, rest: &str) -> Option<(usize, u8)> {
        self.tokens
            .iter()
            .find(|(spelling, _)| rest.starts_with(spelling.as_str()))
            .map(|(spelling, byte)| (spelling.len(), *byte))
    }

    /// `[CMD:HH]`, `[?HH]`, `[DEPTH:HH]` and `[TOKEN:HH…]` for codes that
    /// take parameters.
    fn match_param_token(&self, rest: &str) -> Option<(usize, Vec<u8>)> {
        let len = bracketed_len(rest)?;
        let token = &rest[..len];

        if let Some(byte) = opaque_byte(token) {
            return Some((len, vec![byte]));
        }

        let (base, params) = split_params(token)?;
        let code = self.vocab.by_token(&base)?;
        if code.arity as usize != params.len() {
            return None;
        }
        let mut bytes = Vec::with_capacity(1 + params.len());
        bytes.push(code.byte);
        bytes.extend(params);
        Some((len, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlCode, LayoutEffect};
    use crate::decoder::Decoder;
    use crate::rom::{RomImage, ROM_SIZE};
    use crate::DICT_ENTRIES;

    fn dictionary(table: &CharTable, vocab: &ControlVocabulary) -> Dictionary {
        // 0x30 = "Go" (shadowed by [PARA]), 0x31 = "the", 0x32 = "the ",
        // 0x33 = "ing", 0x34 = "in"
        let payloads: [&[u8]; 5] = [
            &[0xA0, 0xC2],
            &[0xC7, 0xBB, 0xB8],
            &[0x31, 0xFF],
            &[0xBC, 0xC1, 0xBA],
            &[0xBC, 0xC1],
        ];
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
    fn prefers_longest_dictionary_match() {
        let table = CharTable::reference().unwrap();
        let vocab = ControlVocabulary::reference();
        let dict = dictionary(&table, &vocab);
        let encoder = Encoder::new(&table, &dict, &vocab);

        let bytes = encoder.encode("Go to the Focus Tower.", None).unwrap();
        assert_eq!(&bytes[..7], &[0xA0, 0xC2, 0xFF, 0xC7, 0xC2, 0xFF, 0x32]);
        assert_eq!(bytes.last(), Some(&0x00));

        // "ing" beats "in"; "in" alone still compresses.
        assert_eq!(encoder.encode("Sing", None).unwrap(), vec![0xAC, 0x33, 0x00]);
        assert_eq!(encoder.encode("in", None).unwrap(), vec![0x34, 0x00]);
    }

    #[test]
    fn tokens_and_opaque_forms() {
        let table = CharTable::reference().unwrap();
        let vocab = ControlVocabulary::reference();
        let dict = dictionary(&table, &vocab);
        let encoder = Encoder::new(&table, &dict, &vocab);

        assert_eq!(
            encoder
                .encode("[TEXTBOX_BELOW]A[NAME]{newline}[PAGE][CMD:0C][?80]*_", None)
                .unwrap(),
            vec![0x1A, 0x9A, 0x04, 0x01, 0x36, 0x0C, 0x80, 0x03, 0x06, 0x00]
        );
        assert_eq!(encoder.encode("[DEPTH:41]", None).unwrap(), vec![0x41, 0x00]);
    }

    #[test]
    fn explicit_end_is_not_doubled() {
        let table = CharTable::reference().unwrap();
        let vocab = ControlVocabulary::reference();
        let dict = dictionary(&table, &vocab);
        let encoder = Encoder::new(&table, &dict, &vocab);
        assert_eq!(encoder.encode("A[END]", None).unwrap(), vec![0x9A, 0x00]);
        assert_eq!(encoder.encode("", None).unwrap(), vec![0x00]);
        assert_eq!(encoder.encode("A[CMD:00]", None).unwrap(), vec![0x9A, 0x00]);
    }

    #[test]
    fn rejects_text_after_terminator() {
        let table = CharTable::reference().unwrap();
        let vocab = ControlVocabulary::reference();
        let dict = dictionary(&table, &vocab);
        let encoder = Encoder::new(&table, &dict, &vocab);

        assert!(matches!(
            encoder.encode("Go[END]to", None),
            Err(CodecError::TextAfterEnd { position: 7 })
        ));
        assert!(matches!(
            encoder.encode("Go[CMD:00]to", None),
            Err(CodecError::TextAfterEnd { position: 10 })
        ));
        assert!(matches!(
            encoder.encode("[END][END]", None),
            Err(CodecError::TextAfterEnd { position: 5 })
        ));
    }

    #[test]
    fn reports_unencodable_position() {
        let table = CharTable::reference().unwrap();
        let vocab = ControlVocabulary::reference();
        let dict = dictionary(&table, &vocab);
        let encoder = Encoder::new(&table, &dict, &vocab);
        let err = encoder.encode("[NAME]é~", None).unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnencodableGlyph {
                position: 6,
                glyph: 'é'
            }
        ));
    }

    #[test]
    fn enforces_length_limit() {
        let table = CharTable::reference().unwrap();
        let vocab = ControlVocabulary::reference();
        let dict = dictionary(&table, &vocab);
        let encoder = Encoder::new(&table, &dict, &vocab);
        assert!(encoder.encode("ABC", Some(4)).is_ok());
        assert!(matches!(
            encoder.encode("ABCD", Some(4)),
            Err(CodecError::LengthExceeded { len: 5, max: 4 })
        ));
    }

    #[test]
    fn parameterised_tokens_round_trip() {
        let table = CharTable::reference().unwrap();
        let mut vocab = ControlVocabulary::reference();
        vocab.register(ControlCode {
            byte: 0x10,
            token: "[SOUND]".to_string(),
            arity: 2,
            effect: LayoutEffect::Opaque,
        });
        let dict = dictionary(&table, &vocab);
        let encoder = Encoder::new(&table, &dict, &vocab);
        let decoder = Decoder::new(&table, &dict, &vocab);

        let raw = vec![0x10, 0x00, 0x7F, 0x9A, 0x00];
        let text = decoder.decode(&raw);
        assert_eq!(text, "[SOUND:00:7F]A");
        assert_eq!(encoder.encode(&text, None).unwrap(), raw);
        // Wrong parameter count is not a token.
        assert!(encoder.encode("[SOUND:01]", None).is_err());
    }

    #[test]
    fn re_encoding_decoded_text_is_stable() {
        let table = CharTable::reference().unwrap();
        let vocab = ControlVocabulary::reference();
        let dict = dictionary(&table, &vocab);
        let encoder = Encoder::new(&table, &dict, &vocab);
        let decoder = Decoder::new(&table, &dict, &vocab);

        let text = "Bring the ring[WAIT]{newline}in[PARA]";
        let first = encoder.encode(text, None).unwrap();
        let second = encoder.encode(&decoder.decode(&first), None).unwrap();
        assert_eq!(first, second);
        assert!(first.contains(&0x30));
        assert!(!first.contains(&0xA0));
    }
}
