#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use mqtext_core::rom::{COPIER_HEADER_LEN, ROM_SIZE};
use mqtext_core::{CharTable, ControlVocabulary, DialogDatabase, RomImage, RomLayout};

pub const POINTER_TABLE: usize = 0x01B835;
pub const DICTIONARY: usize = 0x01BA35;
pub const DIALOG_BASE: usize = 0x018000;
pub const REGION_END: usize = DIALOG_BASE + 0x400;

pub const TEXT_0: &str = "Go to the Focus Tower.";
pub const TEXT_1: &str = "[TEXTBOX_BELOW]Hello[NAME]!{newline}[PAGE]Bye";
pub const TEXT_2: &str = "Sing[CMD:0C][?80]";

/// Bytes for plain glyphs in the reference table.
pub fn glyphs(text: &str) -> Vec<u8> {
    let table = CharTable::reference().unwrap();
    text.chars().map(|c| table.glyph_byte(c).unwrap()).collect()
}

pub fn layout() -> RomLayout {
    RomLayout {
        dialog_count: 4,
        region_end: Some(REGION_END),
        ..RomLayout::reference()
    }
}

/// Encoded dialogs in pointer-table order; dialog 3 reuses dialog 2's bytes.
pub fn dialogs() -> Vec<Vec<u8>> {
    let mut d0 = glyphs("Go to ");
    d0.push(0x32);
    d0.extend(glyphs("Focus Tower."));
    d0.push(0x00);

    let mut d1 = vec![0x1A];
    d1.extend(glyphs("Hello"));
    d1.push(0x04);
    d1.extend(glyphs("!"));
    d1.extend([0x01, 0x36]);
    d1.extend(glyphs("Bye"));
    d1.push(0x00);

    let mut d2 = glyphs("S");
    d2.extend([0x33, 0x0C, 0x80, 0x00]);

    vec![d0, d1, d2]
}

/// A 512 KiB image with a 4-entry pointer table, an 80-entry dictionary
/// and three distinct dialogs at the start of bank 3.
pub fn image_bytes() -> Vec<u8> {
    let mut bytes = vec![0u8; ROM_SIZE];

    // 0x31 "the", 0x32 -> 0x31 + " ", 0x33 "ing", 0x34 "you"
    let mut entries: Vec<Vec<u8>> = vec![Vec::new(); 80];
    entries[1] = glyphs("the");
    entries[2] = vec![0x31, 0xFF];
    entries[3] = glyphs("ing");
    entries[4] = glyphs("you");
    let mut cursor = DICTIONARY;
    for entry in &entries {
        bytes[cursor] = entry.len() as u8;
        bytes[cursor + 1..cursor + 1 + entry.len()].copy_from_slice(entry);
        cursor += 1 + entry.len();
    }

    let mut address = DIALOG_BASE;
    let mut pointers = Vec::new();
    for d in dialogs() {
        pointers.push(0x8000 | (address - DIALOG_BASE) as u16);
        bytes[address..address + d.len()].copy_from_slice(&d);
        address += d.len();
    }
    pointers.push(pointers[2]);
    for (i, p) in pointers.iter().enumerate() {
        bytes[POINTER_TABLE + i * 2..POINTER_TABLE + i * 2 + 2].copy_from_slice(&p.to_le_bytes());
    }
    bytes
}

pub fn database() -> DialogDatabase {
    database_with(layout())
}

pub fn database_with(layout: RomLayout) -> DialogDatabase {
    DialogDatabase::from_image(
        RomImage::from_bytes(image_bytes()).unwrap(),
        layout,
        CharTable::reference().unwrap(),
        ControlVocabulary::reference(),
    )
    .unwrap()
}

/// Write the synthetic image to `dir`, optionally behind a copier header.
pub fn write_rom(dir: &Path, name: &str, copier_header: bool) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = Vec::new();
    if copier_header {
        bytes.extend(std::iter::repeat(0xEE).take(COPIER_HEADER_LEN));
    }
    bytes.extend(image_bytes());
    fs::write(&path, bytes).unwrap();
    path
}

pub fn reopen(path: &Path) -> DialogDatabase {
    DialogDatabase::open(path, layout(), CharTable::reference().unwrap()).unwrap()
}
