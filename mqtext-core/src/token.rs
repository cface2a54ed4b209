//! Splitting decoded text into bracketed tokens and plain glyphs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    /// `[…]` or `{…}`, brackets included.
    Token(&'a str),
    Glyph(char),
}

pub(crate) struct Segments<'a> {
    rest: &'a str,
}

pub(crate) fn segments(text: &str) -> Segments<'_> {
    Segments { rest: text }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        let first = self.rest.chars().next()?;
        if let Some(len) = bracketed_len(self.rest) {
            let (token, rest) = self.rest.split_at(len);
            self.rest = rest;
            return Some(Segment::Token(token));
        }
        self.rest = &self.rest[first.len_utf8()..];
        Some(Segment::Glyph(first))
    }
}

/// Byte length of the bracketed token at the start of `text`. An opener
/// without its closer before the next opener is a plain glyph.
pub(crate) fn bracketed_len(text: &str) -> Option<usize> {
    let close = match text.chars().next()? {
        '[' => ']',
        '{' => '}',
        _ => return None,
    };
    for (i, c) in text.char_indices().skip(1) {
        if c == close {
            return Some(i + 1);
        }
        if c == '[' || c == '{' {
            return None;
        }
    }
    None
}

fn hex_byte(s: &str) -> Option<u8> {
    if s.len() != 2 {
        return None;
    }
    u8::from_str_radix(s, 16).ok()
}

/// Byte carried by one of the opaque spellings the decoder produces:
/// `[CMD:HH]`, `[?HH]` and `[DEPTH:HH]`.
pub(crate) fn opaque_byte(token: &str) -> Option<u8> {
    let inner = token.strip_prefix('[')?.strip_suffix(']')?;
    if let Some(hex) = inner.strip_prefix('?') {
        return hex_byte(hex);
    }
    let (name, hex) = inner.split_once(':')?;
    match name {
        "CMD" | "DEPTH" => hex_byte(hex),
        _ => None,
    }
}

/// Split `[NAME:HH:HH]` into the base spelling `[NAME]` and its parameters.
pub(crate) fn split_params(token: &str) -> Option<(String, Vec<u8>)> {
    let close = token.chars().last()?;
    let open = token.chars().next()?;
    if !matches!((open, close), ('[', ']') | ('{', '}')) {
        return None;
    }
    let inner = &token[1..token.len() - 1];
    let mut parts = inner.split(':');
    let name = parts.next()?;
    let params = parts.map(hex_byte).collect::<Option<Vec<u8>>>()?;
    if params.is_empty() {
        return None;
    }
    Some((format!("{}{}{}", open, name, close), params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_tokens_and_glyphs() {
        let parts: Vec<Segment> = segments("Hi[NAME]!{newline}").collect();
        assert_eq!(
            parts,
            vec![
                Segment::Glyph('H'),
                Segment::Glyph('i'),
                Segment::Token("[NAME]"),
                Segment::Glyph('!'),
                Segment::Token("{newline}"),
            ]
        );
    }

    #[test]
    fn unclosed_bracket_is_a_glyph() {
        let parts: Vec<Segment> = segments("[a[B]").collect();
        assert_eq!(
            parts,
            vec![Segment::Glyph('['), Segment::Glyph('a'), Segment::Token("[B]")]
        );
    }

    #[test]
    fn parses_opaque_forms() {
        assert_eq!(opaque_byte("[CMD:0C]"), Some(0x0C));
        assert_eq!(opaque_byte("[?80]"), Some(0x80));
        assert_eq!(opaque_byte("[DEPTH:41]"), Some(0x41));
        assert_eq!(opaque_byte("[CMD:0]"), None);
        assert_eq!(opaque_byte("[NAME]"), None);
    }

    #[test]
    fn splits_parameters() {
        assert_eq!(
            split_params("[SOUND:01:AB]"),
            Some(("[SOUND]".to_string(), vec![0x01, 0xAB]))
        );
        assert_eq!(split_params("[SOUND]"), None);
        assert_eq!(split_params("[SOUND:XY]"), None);
    }
}
