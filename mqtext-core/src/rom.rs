use byteorder::{ByteOrder, LittleEndian};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::{CodecError, Result};

/// Size of the reference image once any copier header is removed.
pub const ROM_SIZE: usize = 0x80000;

pub const COPIER_HEADER_LEN: usize = 512;

const BANK_SIZE: usize = 0x8000;

/// Translate a `(bank, local)` CPU address to a file offset under the
/// low-ROM mapping. Only the upper half of a bank maps ROM; the WRAM banks
/// never do.
pub fn lorom_to_file(bank: u8, local: u16, rom_len: usize) -> Result<usize> {
    if local < 0x8000 || bank == 0x7E || bank == 0x7F {
        return Err(CodecError::AddressUnmapped { bank, local });
    }
    let offset = ((bank & 0x3F) as usize) * BANK_SIZE + ((local & 0x7FFF) as usize);
    if offset >= rom_len {
        return Err(CodecError::AddressUnmapped { bank, local });
    }
    Ok(offset)
}

/// Inverse of [`lorom_to_file`] for a fixed bank: the local address a
/// pointer stored with an implicit `bank` needs in order to reach `offset`.
pub fn file_to_lorom(bank: u8, offset: usize) -> Result<u16> {
    let base = ((bank & 0x3F) as usize) * BANK_SIZE;
    if offset < base || offset >= base + BANK_SIZE {
        let local = (0x8000 | (offset & 0x7FFF)) as u16;
        return Err(CodecError::AddressUnmapped { bank, local });
    }
    Ok(0x8000 | (offset - base) as u16)
}

/// The ROM as an owned byte array. All offsets are file offsets into the
/// header-less image.
#[derive(Debug, Clone)]
pub struct RomImage {
    bytes: Vec<u8>,
    had_copier_header: bool,
    path: Option<PathBuf>,
}

impl RomImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Reading ROM from file: {}", path.display());
        let bytes = fs::read(path)?;
        let mut rom = Self::from_bytes(bytes)?;
        rom.path = Some(path.to_path_buf());
        Ok(rom)
    }

    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self> {
        let had_copier_header = bytes.len() % 1024 == COPIER_HEADER_LEN;
        if had_copier_header {
            log::debug!("Stripping {}-byte copier header", COPIER_HEADER_LEN);
            bytes.drain(..COPIER_HEADER_LEN);
        }

        if bytes.len() < ROM_SIZE {
            return Err(CodecError::RomTooSmall {
                size: bytes.len(),
                expected: ROM_SIZE,
            });
        }
        if bytes.len() > ROM_SIZE {
            return Err(CodecError::RomTooLarge {
                size: bytes.len(),
                expected: ROM_SIZE,
            });
        }

        Ok(RomImage {
            bytes,
            had_copier_header,
            path: None,
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn had_copier_header(&self) -> bool {
        self.had_copier_header
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// File name used in exports; "unknown" for images built in memory.
    pub fn file_name(&self) -> String {
        self.path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn read_byte(&self, offset: usize) -> Result<u8> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or(CodecError::OutOfBounds { offset, len: 1 })
    }

    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(CodecError::OutOfBounds { offset, len })
    }

    pub fn read_u16_le(&self, offset: usize) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.slice(offset, 2)?))
    }

    /// Bytes from `offset` up to and including the first `[END]`.
    pub fn read_until_end(&self, offset: usize) -> Result<&[u8]> {
        let tail = self
            .bytes
            .get(offset..)
            .ok_or(CodecError::OutOfBounds { offset, len: 1 })?;
        match tail.iter().position(|&b| b == crate::END_BYTE) {
            Some(pos) => Ok(&tail[..=pos]),
            None => Err(CodecError::OutOfBounds {
                offset,
                len: tail.len() + 1,
            }),
        }
    }

    pub fn write_byte(&mut self, offset: usize, value: u8) -> Result<()> {
        let slot = self
            .bytes
            .get_mut(offset)
            .ok_or(CodecError::OutOfBounds { offset, len: 1 })?;
        *slot = value;
        Ok(())
    }

    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let len = data.len();
        let dest = offset
            .checked_add(len)
            .and_then(|end| self.bytes.get_mut(offset..end))
            .ok_or(CodecError::OutOfBounds { offset, len })?;
        dest.copy_from_slice(data);
        Ok(())
    }

    pub fn write_u16_le(&mut self, offset: usize, value: u16) -> Result<()> {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.write_bytes(offset, &buf)
    }

    /// Write the header-less image to `path` and bind the image to it.
    pub fn save_as<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        log::info!("Writing ROM to file: {}", path.display());
        write_atomically(path, &self.bytes)?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }
}

/// Write through a temporary file in the destination directory, renamed
/// over `path` only once every byte is on disk.
pub(crate) fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CodecError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_bank_three_pointers() {
        assert_eq!(lorom_to_file(0x03, 0x8000, ROM_SIZE).unwrap(), 0x018000);
        assert_eq!(lorom_to_file(0x03, 0xB835, ROM_SIZE).unwrap(), 0x01B835);
        // Mirrored banks land on the same offset.
        assert_eq!(lorom_to_file(0x83, 0xB835, ROM_SIZE).unwrap(), 0x01B835);
    }

    #[test]
    fn rejects_unmapped_addresses() {
        assert!(matches!(
            lorom_to_file(0x03, 0x7FFF, ROM_SIZE),
            Err(CodecError::AddressUnmapped { bank: 0x03, local: 0x7FFF })
        ));
        assert!(matches!(
            lorom_to_file(0x7E, 0x9000, ROM_SIZE),
            Err(CodecError::AddressUnmapped { .. })
        ));
        // Bank 0x10 is past the end of a 512 KiB image.
        assert!(matches!(
            lorom_to_file(0x10, 0x8000, ROM_SIZE),
            Err(CodecError::AddressUnmapped { .. })
        ));
    }

    #[test]
    fn inverse_translation_stays_in_bank() {
        assert_eq!(file_to_lorom(0x03, 0x01B835).unwrap(), 0xB835);
        assert!(file_to_lorom(0x03, 0x020000).is_err());
        assert!(file_to_lorom(0x03, 0x017FFF).is_err());
    }

    #[test]
    fn strips_copier_header() {
        let mut bytes = vec![0xAAu8; COPIER_HEADER_LEN];
        bytes.extend(std::iter::repeat(0x11).take(ROM_SIZE));
        let rom = RomImage::from_bytes(bytes).unwrap();
        assert!(rom.had_copier_header());
        assert_eq!(rom.len(), ROM_SIZE);
        assert_eq!(rom.read_byte(0).unwrap(), 0x11);
    }

    #[test]
    fn rejects_wrong_sizes() {
        assert!(matches!(
            RomImage::from_bytes(vec![0; ROM_SIZE - 1024]),
            Err(CodecError::RomTooSmall { .. })
        ));
        assert!(matches!(
            RomImage::from_bytes(vec![0; ROM_SIZE * 2]),
            Err(CodecError::RomTooLarge { .. })
        ));
    }

    #[test]
    fn reads_and_writes_words() {
        let mut rom = RomImage::from_bytes(vec![0; ROM_SIZE]).unwrap();
        rom.write_u16_le(0x100, 0xB835).unwrap();
        assert_eq!(rom.read_byte(0x100).unwrap(), 0x35);
        assert_eq!(rom.read_u16_le(0x100).unwrap(), 0xB835);
        assert!(rom.write_u16_le(ROM_SIZE - 1, 0).is_err());
    }

    #[test]
    fn saves_without_header() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.sfc");
        let mut bytes = vec![0u8; COPIER_HEADER_LEN];
        bytes.extend(std::iter::repeat(0x22).take(ROM_SIZE));
        let mut rom = RomImage::from_bytes(bytes).unwrap();
        rom.save_as(&out).unwrap();
        assert_eq!(fs::read(&out).unwrap().len(), ROM_SIZE);
        assert_eq!(rom.file_name(), "out.sfc");
    }

    #[test]
    fn reads_through_terminator() {
        let mut rom = RomImage::from_bytes(vec![0xFF; ROM_SIZE]).unwrap();
        rom.write_bytes(0x200, &[0x9A, 0x9B, 0x00]).unwrap();
        assert_eq!(rom.read_until_end(0x200).unwrap(), &[0x9A, 0x9B, 0x00]);
    }
}
