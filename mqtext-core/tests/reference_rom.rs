//! Checks against the real reference image. Drop the ROM at
//! `roms/reference.sfc` in the workspace root to run them; without it every
//! test returns early.

use std::path::PathBuf;

use mqtext_core::{CharTable, DialogDatabase, RomLayout};

fn reference_rom() -> Option<DialogDatabase> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../roms/reference.sfc");
    if !path.exists() {
        eprintln!("skipping: {} not found", path.display());
        return None;
    }
    Some(DialogDatabase::open(&path, RomLayout::reference(), CharTable::reference().unwrap()).unwrap())
}

/// Control bytes (and the two dictionary-range commands) in stream order.
fn control_bytes(raw: &[u8]) -> Vec<u8> {
    raw.iter()
        .copied()
        .filter(|b| *b < 0x30 || *b == 0x30 || *b == 0x36)
        .collect()
}

#[test]
fn decodes_known_dialog() {
    let Some(db) = reference_rom() else { return };
    assert_eq!(db.len(), 117);
    assert_eq!(db.get(0x21).unwrap().text, "Go to the Focus Tower.");
}

#[test]
fn preserves_control_codes() {
    let Some(db) = reference_rom() else { return };
    let record = db.get(0x59).unwrap();
    assert!(record.text.contains("[PAGE]"));
    assert!(record.text.contains("{newline}"));

    let bytes = db.encoder().encode(&record.text, None).unwrap();
    assert!(bytes.contains(&0x36));
    assert!(bytes.contains(&0x01));
    assert_eq!(control_bytes(&bytes), control_bytes(&record.raw));
}

#[test]
fn uses_a_wide_share_of_the_dictionary() {
    let Some(db) = reference_rom() else { return };
    let used = db.dictionary_usage().values().filter(|n| **n > 0).count();
    assert!(used >= 30, "only {} dictionary entries referenced", used);
    assert!(db.records().all(|r| !r.text.contains("[DEPTH:")));
}

#[test]
fn every_dialog_round_trips() {
    let Some(db) = reference_rom() else { return };
    let mismatches = db.verify();
    let ids: Vec<u16> = mismatches.iter().map(|m| m.id).collect();
    assert!(mismatches.is_empty(), "dialogs failing round trip: {:04X?}", ids);
}

#[test]
fn lengths_end_at_first_terminator() {
    let Some(db) = reference_rom() else { return };
    for record in db.records() {
        assert_eq!(record.length, record.raw.len());
        assert_eq!(record.raw.iter().position(|b| *b == 0x00), Some(record.length - 1));
    }
}

#[test]
fn re_encoding_is_idempotent() {
    let Some(db) = reference_rom() else { return };
    let encoder = db.encoder();
    let decoder = db.decoder();
    for record in db.records() {
        let once = encoder.encode(&record.text, None).unwrap();
        let twice = encoder.encode(&decoder.decode(&once), None).unwrap();
        assert_eq!(once, twice, "dialog 0x{:04X}", record.id);
    }
}
