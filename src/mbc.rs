/*!
Memory bank controllers. Register writes to the ROM region come here; the
controller updates its banking state and reports what remapping the bus
must perform (switch the readable ROM bank, remap or unmap cartridge
RAM). MBC1 and MBC3 (with its RTC register file) cover the supported
cartridge types.
*/

use crate::rom::RomError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcKind {
    None,
    Mbc1,
    Mbc3,
}

/// What the bus must do after a control write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcUpdate {
    None,
    /// Remap the switchable ROM bank.
    RomBank(u8),
    /// Cartridge RAM mapping changed (enable, bank, or RTC selection).
    RamMapping,
}

pub struct Mbc {
    pub kind: MbcKind,
    pub rom_bank: u8,
    pub ram_bank: u8,
    pub ram_enabled: bool,
    rom_bank_mask: u8,
    // MBC3 real-time clock
    rtc_select: Option<u8>,
    rtc: [u8; 5],
    rtc_latched: [u8; 5],
    rtc_latch_state: u8,
}

impl Mbc {
    pub fn new(cart_type: u8, rom_banks: u16) -> Result<Mbc, RomError> {
        let kind = match cart_type {
            0x00 | 0x08 | 0x09 => MbcKind::None,
            0x01..=0x03 => MbcKind::Mbc1,
            0x0f..=0x13 => MbcKind::Mbc3,
            other => return Err(RomError::UnsupportedMapper(other)),
        };
        Ok(Mbc {
            kind,
            rom_bank: 1,
            ram_bank: 0,
            ram_enabled: false,
            rom_bank_mask: (rom_banks.max(2) - 1).min(0xff) as u8,
            rtc_select: None,
            rtc: [0; 5],
            rtc_latched: [0; 5],
            rtc_latch_state: 0xff,
        })
    }

    /// Whether cartridge RAM is currently flat-mappable (enabled and not
    /// shadowed by an RTC register).
    pub fn ram_mapped(&self) -> bool {
        self.ram_enabled && self.rtc_select.is_none()
    }

    /// Control write in 0x0000-0x7FFF.
    pub fn control_write(&mut self, addr: u16, data: u8) -> MbcUpdate {
        if self.kind == MbcKind::None {
            return MbcUpdate::None;
        }
        match addr {
            0x0000..=0x1fff => {
                let was = self.ram_enabled;
                self.ram_enabled = data & 0x0f == 0x0a;
                if was != self.ram_enabled {
                    MbcUpdate::RamMapping
                } else {
                    MbcUpdate::None
                }
            }
            0x2000..=0x3fff => {
                let bits = match self.kind {
                    MbcKind::Mbc1 => data & 0x1f,
                    _ => data & 0x7f,
                };
                let mut bank = if bits == 0 { 1 } else { bits };
                bank &= self.rom_bank_mask;
                if bank == 0 {
                    bank = 1;
                }
                self.rom_bank = bank;
                MbcUpdate::RomBank(bank)
            }
            0x4000..=0x5fff => match self.kind {
                MbcKind::Mbc1 => {
                    self.ram_bank = data & 0x03;
                    MbcUpdate::RamMapping
                }
                _ => {
                    if data <= 0x03 {
                        self.ram_bank = data;
                        self.rtc_select = None;
                    } else if (0x08..=0x0c).contains(&data) {
                        self.rtc_select = Some(data);
                    }
                    MbcUpdate::RamMapping
                }
            },
            _ => {
                // 0x6000-0x7FFF: MBC1 mode select (ignored), MBC3 RTC latch
                if self.kind == MbcKind::Mbc3 {
                    if self.rtc_latch_state == 0x00 && data == 0x01 {
                        self.rtc_latched = self.rtc;
                    }
                    self.rtc_latch_state = data;
                }
                MbcUpdate::None
            }
        }
    }

    /// RTC register read when one is selected; None means plain RAM.
    pub fn rtc_read(&self) -> Option<u8> {
        let sel = self.rtc_select?;
        Some(self.rtc_latched[(sel - 0x08) as usize])
    }

    pub fn rtc_write(&mut self, data: u8) -> bool {
        match self.rtc_select {
            Some(sel) => {
                self.rtc[(sel - 0x08) as usize] = data;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rom_only_ignores_control_writes() {
        let mut mbc = Mbc::new(0x00, 2).unwrap();
        assert_eq!(mbc.control_write(0x2000, 2), MbcUpdate::None);
        assert_eq!(mbc.rom_bank, 1);
    }

    #[test]
    fn mbc1_bank_zero_maps_to_one() {
        let mut mbc = Mbc::new(0x01, 32).unwrap();
        assert_eq!(mbc.control_write(0x2000, 0), MbcUpdate::RomBank(1));
        assert_eq!(mbc.control_write(0x2000, 5), MbcUpdate::RomBank(5));
    }

    #[test]
    fn mbc1_bank_wraps_to_rom_size() {
        let mut mbc = Mbc::new(0x01, 4).unwrap();
        // bank 5 on a 4-bank image wraps to 1
        assert_eq!(mbc.control_write(0x2000, 5), MbcUpdate::RomBank(1));
    }

    #[test]
    fn ram_enable_sequence() {
        let mut mbc = Mbc::new(0x03, 4).unwrap();
        assert!(!mbc.ram_mapped());
        assert_eq!(mbc.control_write(0x0000, 0x0a), MbcUpdate::RamMapping);
        assert!(mbc.ram_mapped());
        assert_eq!(mbc.control_write(0x0000, 0x00), MbcUpdate::RamMapping);
        assert!(!mbc.ram_mapped());
    }

    #[test]
    fn mbc3_rtc_select_unmaps_ram() {
        let mut mbc = Mbc::new(0x10, 64).unwrap();
        mbc.control_write(0x0000, 0x0a);
        assert!(mbc.ram_mapped());
        mbc.control_write(0x4000, 0x08);
        assert!(!mbc.ram_mapped());
        assert_eq!(mbc.rtc_read(), Some(0));
        mbc.control_write(0x4000, 0x01);
        assert!(mbc.ram_mapped());
        assert_eq!(mbc.rtc_read(), None);
    }

    #[test]
    fn mbc3_rtc_latch_snapshots_clock() {
        let mut mbc = Mbc::new(0x0f, 64).unwrap();
        mbc.control_write(0x0000, 0x0a);
        mbc.control_write(0x4000, 0x09); // minutes register
        mbc.rtc_write(42);
        assert_eq!(mbc.rtc_read(), Some(0), "unlatched value not visible");
        mbc.control_write(0x6000, 0x00);
        mbc.control_write(0x6000, 0x01);
        assert_eq!(mbc.rtc_read(), Some(42));
    }
}
