/*!
Cartridge image loading and header parsing.

Only what the emulator core needs: title, cartridge type (to pick a
banking controller), ROM/RAM geometry, and a checksum sanity warning. The
image itself is copied into host memory by the hardware model so the
recompiler's fast paths can address it directly.
*/

use std::fs;
use std::path::Path;

use log::warn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RomError {
    #[error("i/o error reading ROM: {0}")]
    Io(#[from] std::io::Error),
    #[error("ROM too small ({0} bytes)")]
    TooSmall(usize),
    #[error("unsupported cartridge type {0:#04x}")]
    UnsupportedMapper(u8),
    #[error("ROM too large ({0} bytes)")]
    TooLarge(usize),
}

/// Largest image we will map into host memory (4 MiB covers every
/// licensed DMG cartridge).
pub const MAX_ROM_SIZE: usize = 4 * 1024 * 1024;

pub struct Rom {
    pub data: Vec<u8>,
    pub title: String,
    pub cart_type: u8,
    pub rom_banks: u16,
    pub ram_size: usize,
}

impl Rom {
    pub fn load(path: impl AsRef<Path>) -> Result<Rom, RomError> {
        let data = fs::read(path)?;
        Rom::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Rom, RomError> {
        if data.len() < 0x150 {
            return Err(RomError::TooSmall(data.len()));
        }
        if data.len() > MAX_ROM_SIZE {
            return Err(RomError::TooLarge(data.len()));
        }

        let title = data[0x134..0x144]
            .iter()
            .take_while(|&&b| b != 0 && b < 0x80)
            .map(|&b| b as char)
            .collect::<String>()
            .trim_end()
            .to_string();

        let cart_type = data[0x147];
        let rom_banks = match data[0x148] {
            n @ 0..=8 => 2u16 << n,
            _ => (data.len() / 0x4000).max(2) as u16,
        };
        let ram_size = match data[0x149] {
            2 => 0x2000,
            3 => 0x8000,
            4 => 0x20000,
            5 => 0x10000,
            _ => 0,
        };

        let mut checksum: u8 = 0;
        for &b in &data[0x134..0x14d] {
            checksum = checksum.wrapping_sub(b).wrapping_sub(1);
        }
        if checksum != data[0x14d] {
            warn!(
                "header checksum mismatch (computed {checksum:#04x}, stored {:#04x})",
                data[0x14d]
            );
        }

        Ok(Rom {
            data,
            title,
            cart_type,
            rom_banks,
            ram_size,
        })
    }
}

#[cfg(test)]
pub(crate) fn blank_rom(cart_type: u8) -> Vec<u8> {
    let mut data = vec![0u8; 0x8000];
    data[0x134..0x13a].copy_from_slice(b"TESTER");
    data[0x147] = cart_type;
    data[0x148] = 1; // 4 banks
    let mut checksum: u8 = 0;
    for &b in &data[0x134..0x14d] {
        checksum = checksum.wrapping_sub(b).wrapping_sub(1);
    }
    data[0x14d] = checksum;
    data
}
