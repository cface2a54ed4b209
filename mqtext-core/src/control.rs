use std::collections::{BTreeMap, HashMap};

/// How a control byte affects the text box when the engine runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutEffect {
    Terminate,
    LineBreak,
    Pause,
    /// Draws one glyph cell.
    Glyph,
    NameSubstitution,
    ItemSubstitution,
    PositionHint,
    ClearBox,
    Paragraph,
    PageBreak,
    /// Unknown engine behaviour; nothing is drawn as far as we know.
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCode {
    pub byte: u8,
    pub token: String,
    /// Raw parameter bytes following the control byte.
    pub arity: u8,
    pub effect: LayoutEffect,
}

impl ControlCode {
    fn new(byte: u8, token: &str, effect: LayoutEffect) -> Self {
        ControlCode {
            byte,
            token: token.to_string(),
            arity: 0,
            effect,
        }
    }

    /// Token text with its parameters appended, `[TOKEN:HH:HH]`.
    pub fn render(&self, params: &[u8]) -> String {
        if params.is_empty() {
            return self.token.clone();
        }
        let (head, close) = match self.token.strip_suffix(']') {
            Some(head) => (head, "]"),
            None => match self.token.strip_suffix('}') {
                Some(head) => (head, "}"),
                None => (self.token.as_str(), ""),
            },
        };
        let mut out = head.to_string();
        for p in params {
            out.push_str(&format!(":{:02X}", p));
        }
        out.push_str(close);
        out
    }
}

/// Byte -> token names for the engine's control codes, plus the two
/// dictionary-range bytes the engine treats as layout commands.
#[derive(Debug, Clone)]
pub struct ControlVocabulary {
    codes: BTreeMap<u8, ControlCode>,
    by_token: HashMap<String, u8>,
}

impl ControlVocabulary {
    pub fn reference() -> Self {
        use LayoutEffect::*;

        let mut vocab = ControlVocabulary {
            codes: BTreeMap::new(),
            by_token: HashMap::new(),
        };
        for code in [
            ControlCode::new(0x00, "[END]", Terminate),
            ControlCode::new(0x01, "{newline}", LineBreak),
            ControlCode::new(0x02, "[WAIT]", Pause),
            ControlCode::new(0x03, "*", Glyph),
            ControlCode::new(0x04, "[NAME]", NameSubstitution),
            ControlCode::new(0x05, "[ITEM]", ItemSubstitution),
            ControlCode::new(0x06, "_", Glyph),
            ControlCode::new(0x1A, "[TEXTBOX_BELOW]", PositionHint),
            ControlCode::new(0x1B, "[TEXTBOX_ABOVE]", PositionHint),
            ControlCode::new(0x1F, "[CRYSTAL]", Glyph),
            ControlCode::new(0x23, "[CLEAR]", ClearBox),
            ControlCode::new(0x30, "[PARA]", Paragraph),
            ControlCode::new(0x36, "[PAGE]", PageBreak),
        ] {
            vocab.register(code);
        }
        vocab
    }

    /// Add or replace a code. Used to give a previously opaque byte a name
    /// or an arity.
    pub fn register(&mut self, code: ControlCode) {
        if let Some(old) = self.codes.get(&code.byte) {
            self.by_token.remove(&old.token);
        }
        self.by_token.insert(code.token.clone(), code.byte);
        self.codes.insert(code.byte, code);
    }

    pub fn lookup(&self, byte: u8) -> Option<&ControlCode> {
        self.codes.get(&byte)
    }

    pub fn by_token(&self, token: &str) -> Option<&ControlCode> {
        self.by_token.get(token).and_then(|b| self.codes.get(b))
    }

    /// Whether `byte` is a dictionary index the engine reads as a command.
    pub fn shadows(&self, byte: u8) -> bool {
        byte >= crate::DICT_BASE && self.codes.contains_key(&byte)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControlCode> {
        self.codes.values()
    }

    /// Layout effect of a token as it appears in decoded text. Parameterised
    /// spellings (`[NAME:01]`) resolve through their base name.
    pub fn effect_of(&self, token: &str) -> Option<LayoutEffect> {
        if let Some(code) = self.by_token(token) {
            return Some(code.effect);
        }
        let (name, _) = token.split_once(':')?;
        let close = token.chars().last()?;
        self.by_token(&format!("{}{}", name, close))
            .filter(|c| c.arity > 0)
            .map(|c| c.effect)
    }
}

impl Default for ControlVocabulary {
    fn default() -> Self {
        ControlVocabulary::reference()
    }
}

/// Opaque rendering for a control byte with no registered token.
pub fn opaque_token(byte: u8) -> String {
    format!("[CMD:{:02X}]", byte)
}
