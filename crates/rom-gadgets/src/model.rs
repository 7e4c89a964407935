use anyhow::Result;
use std::path::Path;

/// A raw ROM dump; offset `i` is code address `i` (segment in bits 16..20).
#[derive(Debug, Clone, Default)]
pub struct Rom {
    pub bytes: Vec<u8>,
}

impl Rom {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn read_u8(&self, addr: u32) -> Option<u8> {
        self.bytes.get(addr as usize).copied()
    }

    pub fn read_u16(&self, addr: u32) -> Option<u16> {
        let b0 = self.read_u8(addr)?;
        let b1 = self.read_u8(addr.wrapping_add(1))?;
        Some(u16::from_le_bytes([b0, b1]))
    }
}

pub fn load_rom(path: &Path, skip: usize, len: Option<usize>) -> Result<Rom> {
    let file = std::fs::read(path)?;
    anyhow::ensure!(skip <= file.len(), "--skip exceeds file size");
    let mut payload = &file[skip..];
    if let Some(lim) = len {
        anyhow::ensure!(lim <= payload.len(), "--len exceeds remaining file size after skip");
        payload = &payload[..lim];
    }
    anyhow::ensure!(payload.len() % 2 == 0, "ROM image has odd length {}", payload.len());
    Ok(Rom::new(payload.to_vec()))
}
