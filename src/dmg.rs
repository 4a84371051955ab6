/*!
The DMG hardware model: authoritative memory map, page tables, MMIO,
interrupt lines, timers, joypad, and the cycle-driven advancement the
recompiler's driver calls between blocks.

Guest RAM regions (ROM image, VRAM, WRAM, cartridge RAM, HRAM) live
inside host-machine memory so generated code can address them through the
page tables and the SP fast path. Everything else (OAM, the register
files) is ordinary Rust state reached only through the slow-path
callouts.

DIV and LY reads account for `read_cycles`, the cycle count the currently
executing block has accumulated but not yet synced; translated code
publishes it into the context before every slow-path call.
*/

use log::debug;

use crate::jit::{Hardware, GuestSource, JIT_CTX_CURRENT_ROM_BANK, JIT_CTX_READ_CYCLES,
    HwLayout, INT_JOYPAD, INT_LCDSTAT, INT_TIMER, INT_VBLANK};
use crate::lcd::{self, Lcd};
use crate::m68k::{Callouts, HostMem, Machine};
use crate::mbc::{Mbc, MbcUpdate};
use crate::rom::Rom;

pub const WRAM_SIZE: u32 = 0x2000;
pub const VRAM_SIZE: u32 = 0x2000;
/// 0x7F bytes of HRAM plus the IE register at the end.
pub const HRAM_SIZE: u32 = 0x80;
const IE_OFFSET: u32 = 0x7f;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

pub struct Dmg {
    pub rom: Rom,
    pub mbc: Mbc,
    pub lcd: Lcd,

    // host-memory layout
    rom_addr: u32,
    vram_addr: u32,
    wram_addr: u32,
    cart_ram_addr: u32,
    cart_ram_size: u32,
    hram_addr: u32,
    read_pages: u32,
    write_pages: u32,
    frame_cycles_addr: u32,
    ctx_addr: u32,

    // interrupts
    ime: bool,
    if_bits: u8,

    // timers
    total_cycles: u64,
    div_base: u64,
    tima: u8,
    tma: u8,
    tac: u8,
    timer_acc: u32,

    // joypad (bits active-high here, inverted on read)
    joyp_select: u8,
    pad_dirs: u8,
    pad_buttons: u8,

    // serial and sound register files
    sb: u8,
    sc: u8,
    apu_regs: [u8; 0x30],

    oam: [u8; 0xa0],

    current_rom_bank: u8,
    frames: u32,
}

impl Dmg {
    /// Map the cartridge into host memory and build the page tables.
    pub fn new(machine: &mut Machine, rom: Rom) -> Result<Dmg, crate::emulator::EmuError> {
        let mbc = Mbc::new(rom.cart_type, rom.rom_banks)?;

        let rom_addr = machine.alloc(rom.data.len() as u32)?;
        machine.mem.copy_in(rom_addr, &rom.data);
        let vram_addr = machine.alloc(VRAM_SIZE)?;
        let wram_addr = machine.alloc(WRAM_SIZE)?;
        let cart_ram_size = (rom.ram_size as u32).max(0x2000);
        let cart_ram_addr = machine.alloc(cart_ram_size)?;
        let hram_addr = machine.alloc(HRAM_SIZE)?;
        let read_pages = machine.alloc(256 * 4)?;
        let write_pages = machine.alloc(256 * 4)?;
        let frame_cycles_addr = machine.alloc(4)?;

        let mut dmg = Dmg {
            rom,
            mbc,
            lcd: Lcd::new(),
            rom_addr,
            vram_addr,
            wram_addr,
            cart_ram_addr,
            cart_ram_size,
            hram_addr,
            read_pages,
            write_pages,
            frame_cycles_addr,
            ctx_addr: 0,
            ime: false,
            if_bits: 0x01,
            total_cycles: 0,
            div_base: 0,
            tima: 0,
            tma: 0,
            tac: 0,
            timer_acc: 0,
            joyp_select: 0x30,
            pad_dirs: 0,
            pad_buttons: 0,
            sb: 0,
            sc: 0,
            apu_regs: [0; 0x30],
            oam: [0; 0xa0],
            current_rom_bank: 1,
            frames: 0,
        };
        dmg.init_pages(&mut machine.mem);
        Ok(dmg)
    }

    /// Host addresses the JIT context publishes to generated code.
    pub fn layout(&self) -> HwLayout {
        HwLayout {
            wram_base: self.wram_addr,
            hram_base: self.hram_addr,
            frame_cycles: self.frame_cycles_addr,
            read_pages: self.read_pages,
            write_pages: self.write_pages,
        }
    }

    /// Wire the bank-switch mirror once the JIT context exists.
    pub fn attach_jit(&mut self, ctx_addr: u32) {
        self.ctx_addr = ctx_addr;
    }

    pub fn frames_elapsed(&self) -> u32 {
        self.frames
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn rom_bank(&self) -> u8 {
        self.current_rom_bank
    }

    pub fn set_button(&mut self, mem: &mut HostMem, button: Button, pressed: bool) {
        let (field, bit) = match button {
            Button::Right => (false, 0x01),
            Button::Left => (false, 0x02),
            Button::Up => (false, 0x04),
            Button::Down => (false, 0x08),
            Button::A => (true, 0x01),
            Button::B => (true, 0x02),
            Button::Select => (true, 0x04),
            Button::Start => (true, 0x08),
        };
        let state = if field {
            &mut self.pad_buttons
        } else {
            &mut self.pad_dirs
        };
        let was = *state & bit != 0;
        if pressed {
            *state |= bit;
        } else {
            *state &= !bit;
        }
        if pressed && !was {
            self.request_interrupt(mem, INT_JOYPAD);
        }
    }

    pub fn request_interrupt(&mut self, _mem: &mut HostMem, bit: u8) {
        self.if_bits |= bit;
    }

    // ---- page tables ----

    fn set_page(&self, mem: &mut HostMem, table: u32, page: u32, target: u32) {
        mem.write32(table + page * 4, target);
    }

    fn init_pages(&mut self, mem: &mut HostMem) {
        // fixed ROM bank
        for p in 0x00..0x40u32 {
            self.set_page(mem, self.read_pages, p, self.rom_addr + p * 0x100);
            self.set_page(mem, self.write_pages, p, 0);
        }
        // switchable bank, ROM writes are MBC control and stay slow
        self.remap_rom_bank(mem, self.current_rom_bank);
        for p in 0x40..0x80u32 {
            self.set_page(mem, self.write_pages, p, 0);
        }
        // VRAM
        for p in 0x80..0xa0u32 {
            let t = self.vram_addr + (p - 0x80) * 0x100;
            self.set_page(mem, self.read_pages, p, t);
            self.set_page(mem, self.write_pages, p, t);
        }
        self.remap_cart_ram(mem);
        // WRAM and its echo
        for p in 0xc0..0xe0u32 {
            let t = self.wram_addr + (p - 0xc0) * 0x100;
            self.set_page(mem, self.read_pages, p, t);
            self.set_page(mem, self.write_pages, p, t);
        }
        for p in 0xe0..0xfeu32 {
            let t = self.wram_addr + (p - 0xe0) * 0x100;
            self.set_page(mem, self.read_pages, p, t);
            self.set_page(mem, self.write_pages, p, t);
        }
        // OAM and I/O stay on the slow path
        for p in 0xfe..0x100u32 {
            self.set_page(mem, self.read_pages, p, 0);
            self.set_page(mem, self.write_pages, p, 0);
        }
    }

    fn remap_rom_bank(&mut self, mem: &mut HostMem, bank: u8) {
        self.current_rom_bank = bank;
        let rom_len = self.rom.data.len() as u32;
        for p in 0..0x40u32 {
            let off = (bank as u32 * 0x4000 + p * 0x100) % rom_len;
            self.set_page(mem, self.read_pages, 0x40 + p, self.rom_addr + off);
        }
        if self.ctx_addr != 0 {
            mem.write8(self.ctx_addr + JIT_CTX_CURRENT_ROM_BANK as u32, bank);
        }
    }

    fn remap_cart_ram(&mut self, mem: &mut HostMem) {
        let mapped = self.mbc.ram_mapped() && self.rom.ram_size > 0;
        for p in 0xa0..0xc0u32 {
            let t = if mapped {
                let off =
                    (self.mbc.ram_bank as u32 * 0x2000 + (p - 0xa0) * 0x100) % self.cart_ram_size;
                self.cart_ram_addr + off
            } else {
                0
            };
            self.set_page(mem, self.read_pages, p, t);
            self.set_page(mem, self.write_pages, p, t);
        }
    }

    // ---- cycle position helpers ----

    /// Cycles the current block has accumulated but not yet synced.
    fn read_cycles(&self, mem: &HostMem) -> u32 {
        if self.ctx_addr != 0 {
            mem.read32(self.ctx_addr + JIT_CTX_READ_CYCLES as u32)
        } else {
            0
        }
    }

    fn frame_pos(&self, mem: &HostMem) -> u32 {
        (mem.read32(self.frame_cycles_addr) + self.read_cycles(mem)) % lcd::CYCLES_PER_FRAME
    }

    fn div_value(&self, mem: &HostMem) -> u8 {
        let now = self.total_cycles + self.read_cycles(mem) as u64;
        ((now - self.div_base) >> 8) as u8
    }

    // ---- authoritative memory map ----

    pub fn read_at(&self, mem: &HostMem, addr: u16) -> u8 {
        match addr {
            0x0000..=0x3fff => mem.read8(self.rom_addr + addr as u32),
            0x4000..=0x7fff => {
                let off = (self.current_rom_bank as u32 * 0x4000 + (addr as u32 - 0x4000))
                    % self.rom.data.len() as u32;
                mem.read8(self.rom_addr + off)
            }
            0x8000..=0x9fff => mem.read8(self.vram_addr + (addr as u32 - 0x8000)),
            0xa000..=0xbfff => {
                if let Some(v) = self.mbc.rtc_read() {
                    v
                } else if self.mbc.ram_mapped() && self.rom.ram_size > 0 {
                    let off = (self.mbc.ram_bank as u32 * 0x2000 + (addr as u32 - 0xa000))
                        % self.cart_ram_size;
                    mem.read8(self.cart_ram_addr + off)
                } else {
                    0xff
                }
            }
            0xc000..=0xdfff => mem.read8(self.wram_addr + (addr as u32 - 0xc000)),
            0xe000..=0xfdff => mem.read8(self.wram_addr + (addr as u32 - 0xe000)),
            0xfe00..=0xfe9f => self.oam[(addr - 0xfe00) as usize],
            0xfea0..=0xfeff => 0,
            0xff00..=0xff7f => self.io_read(mem, addr),
            0xff80..=0xfffe => mem.read8(self.hram_addr + (addr as u32 - 0xff80)),
            0xffff => mem.read8(self.hram_addr + IE_OFFSET),
        }
    }

    fn io_read(&self, mem: &HostMem, addr: u16) -> u8 {
        match addr {
            0xff00 => {
                let mut v = 0xc0 | self.joyp_select | 0x0f;
                if self.joyp_select & 0x10 == 0 {
                    v &= !self.pad_dirs | 0xf0;
                }
                if self.joyp_select & 0x20 == 0 {
                    v &= !self.pad_buttons | 0xf0;
                }
                v
            }
            0xff01 => self.sb,
            0xff02 => self.sc | 0x7e,
            0xff04 => self.div_value(mem),
            0xff05 => self.tima,
            0xff06 => self.tma,
            0xff07 => self.tac | 0xf8,
            0xff0f => 0xe0 | self.if_bits,
            0xff10..=0xff3f => self.apu_regs[(addr - 0xff10) as usize],
            lcd::REG_STAT => self.lcd.stat_at(self.frame_pos(mem)),
            lcd::REG_LY => Lcd::ly_at(self.frame_pos(mem)),
            0xff40..=0xff4b => self.lcd.reg(addr),
            _ => 0xff,
        }
    }

    pub fn write_at(&mut self, mem: &mut HostMem, addr: u16, value: u8) {
        match addr {
            0x0000..=0x7fff => match self.mbc.control_write(addr, value) {
                MbcUpdate::None => {}
                MbcUpdate::RomBank(bank) => {
                    debug!("rom bank -> {bank}");
                    self.remap_rom_bank(mem, bank);
                }
                MbcUpdate::RamMapping => self.remap_cart_ram(mem),
            },
            0x8000..=0x9fff => mem.write8(self.vram_addr + (addr as u32 - 0x8000), value),
            0xa000..=0xbfff => {
                if self.mbc.rtc_write(value) {
                    return;
                }
                if self.mbc.ram_mapped() && self.rom.ram_size > 0 {
                    let off = (self.mbc.ram_bank as u32 * 0x2000 + (addr as u32 - 0xa000))
                        % self.cart_ram_size;
                    mem.write8(self.cart_ram_addr + off, value);
                }
            }
            0xc000..=0xdfff => mem.write8(self.wram_addr + (addr as u32 - 0xc000), value),
            0xe000..=0xfdff => mem.write8(self.wram_addr + (addr as u32 - 0xe000), value),
            0xfe00..=0xfe9f => self.oam[(addr - 0xfe00) as usize] = value,
            0xfea0..=0xfeff => {}
            0xff00..=0xff7f => self.io_write(mem, addr, value),
            0xff80..=0xfffe => mem.write8(self.hram_addr + (addr as u32 - 0xff80), value),
            0xffff => mem.write8(self.hram_addr + IE_OFFSET, value),
        }
    }

    fn io_write(&mut self, mem: &mut HostMem, addr: u16, value: u8) {
        match addr {
            0xff00 => self.joyp_select = value & 0x30,
            0xff01 => self.sb = value,
            0xff02 => self.sc = value,
            0xff04 => {
                // any write resets the divider
                self.div_base = self.total_cycles + self.read_cycles(mem) as u64;
            }
            0xff05 => self.tima = value,
            0xff06 => self.tma = value,
            0xff07 => self.tac = value & 0x07,
            0xff0f => self.if_bits = value & 0x1f,
            0xff10..=0xff3f => self.apu_regs[(addr - 0xff10) as usize] = value,
            lcd::REG_LY => {
                // writing LY restarts the frame counter
                mem.write32(self.frame_cycles_addr, 0);
            }
            lcd::REG_DMA => {
                self.lcd.set_reg(addr, value);
                self.oam_dma(mem, value);
            }
            0xff40..=0xff4b => self.lcd.set_reg(addr, value),
            _ => {}
        }
    }

    /// OAM DMA, performed as an immediate 160-byte copy.
    fn oam_dma(&mut self, mem: &mut HostMem, page: u8) {
        let src = (page as u16) << 8;
        for k in 0..0xa0u16 {
            self.oam[k as usize] = self.read_at(mem, src + k);
        }
    }

    /// Advance hardware state by the given number of 4 MHz cycles.
    pub fn sync_hw(&mut self, mem: &mut HostMem, cycles: u32) {
        if cycles == 0 {
            return;
        }
        let start = mem.read32(self.frame_cycles_addr) as u64;
        let end = start + cycles as u64;

        let ly_before = Lcd::ly_at(start as u32 % lcd::CYCLES_PER_FRAME);

        // fire VBlank at every 65664 boundary crossed, count frame wraps
        let mut t = start;
        loop {
            let off = (t % lcd::CYCLES_PER_FRAME as u64) as u32;
            let next = if off < lcd::VBLANK_LINE * lcd::CYCLES_PER_LINE {
                t + (lcd::VBLANK_LINE * lcd::CYCLES_PER_LINE - off) as u64
            } else {
                t + (lcd::CYCLES_PER_FRAME - off) as u64
            };
            if next > end {
                break;
            }
            t = next;
            if t % lcd::CYCLES_PER_FRAME as u64 == (lcd::VBLANK_LINE * lcd::CYCLES_PER_LINE) as u64
            {
                self.if_bits |= INT_VBLANK;
            } else {
                self.frames += 1;
            }
        }

        let pos = (end % lcd::CYCLES_PER_FRAME as u64) as u32;
        mem.write32(self.frame_cycles_addr, pos);
        self.total_cycles += cycles as u64;

        // LYC match edge
        let ly_after = Lcd::ly_at(pos);
        if ly_after != ly_before
            && ly_after == self.lcd.reg(lcd::REG_LYC)
            && self.lcd.stat_sources().contains(crate::lcd::StatIrq::LYC)
        {
            self.if_bits |= INT_LCDSTAT;
        }

        // timer
        if self.tac & 0x04 != 0 {
            let period = match self.tac & 0x03 {
                0 => 1024,
                1 => 16,
                2 => 64,
                _ => 256,
            };
            self.timer_acc += cycles;
            while self.timer_acc >= period {
                self.timer_acc -= period;
                self.tima = self.tima.wrapping_add(1);
                if self.tima == 0 {
                    self.tima = self.tma;
                    self.if_bits |= INT_TIMER;
                }
            }
        }
    }
}

impl Callouts for Dmg {
    fn guest_read(&mut self, mem: &mut HostMem, addr: u16) -> u8 {
        self.read_at(mem, addr)
    }

    fn guest_write(&mut self, mem: &mut HostMem, addr: u16, value: u8) {
        self.write_at(mem, addr, value);
    }

    fn ei_di(&mut self, _mem: &mut HostMem, enabled: bool) {
        // EI takes effect immediately; the one-instruction delay is not
        // modeled at block granularity.
        self.ime = enabled;
    }
}

impl GuestSource for Dmg {
    fn read_byte(&self, mem: &HostMem, addr: u16) -> u8 {
        self.read_at(mem, addr)
    }
}

impl Hardware for Dmg {
    fn sync(&mut self, mem: &mut HostMem, cycles: u32) {
        self.sync_hw(mem, cycles);
    }

    fn ime(&self) -> bool {
        self.ime
    }

    fn pending_interrupts(&self, mem: &HostMem) -> u8 {
        mem.read8(self.hram_addr + IE_OFFSET) & self.if_bits & 0x1f
    }

    fn acknowledge_interrupt(&mut self, bit: u8) {
        self.if_bits &= !bit;
        self.ime = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::{blank_rom, Rom};

    fn setup(cart_type: u8) -> (Machine, Dmg) {
        let mut machine = Machine::new();
        let mut data = blank_rom(cart_type);
        if cart_type != 0 {
            data[0x149] = 3; // 32 KiB cart RAM
        }
        let rom = Rom::from_bytes(data).unwrap();
        let dmg = Dmg::new(&mut machine, rom).unwrap();
        (machine, dmg)
    }

    #[test]
    fn wram_round_trips_through_page_table_target() {
        let (mut m, mut dmg) = setup(0);
        dmg.write_at(&mut m.mem, 0xc123, 0x5a);
        assert_eq!(dmg.read_at(&m.mem, 0xc123), 0x5a);
        // echo sees the same byte
        assert_eq!(dmg.read_at(&m.mem, 0xe123), 0x5a);
        // and the page table maps straight at it
        let page = m.mem.read32(dmg.read_pages + 0xc1 * 4);
        assert_eq!(m.mem.read8(page + 0x23), 0x5a);
    }

    #[test]
    fn mmio_pages_are_unmapped() {
        let (m, dmg) = setup(0);
        assert_eq!(m.mem.read32(dmg.read_pages + 0xff * 4), 0);
        assert_eq!(m.mem.read32(dmg.write_pages + 0xfe * 4), 0);
        // ROM pages are read-only
        assert_ne!(m.mem.read32(dmg.read_pages + 0x00 * 4), 0);
        assert_eq!(m.mem.read32(dmg.write_pages + 0x00 * 4), 0);
    }

    #[test]
    fn bank_switch_remaps_read_pages() {
        let mut machine = Machine::new();
        let mut data = blank_rom(0x01);
        data.resize(0x10000, 0); // four real banks
        data[2 * 0x4000 + 0x123] = 0x77;
        let rom = Rom::from_bytes(data).unwrap();
        let mut dmg = Dmg::new(&mut machine, rom).unwrap();
        let m = &mut machine;

        dmg.write_at(&mut m.mem, 0x2000, 2);
        assert_eq!(dmg.rom_bank(), 2);
        assert_eq!(dmg.read_at(&m.mem, 0x4123), 0x77);
        let page = m.mem.read32(dmg.read_pages + 0x41 * 4);
        assert_eq!(m.mem.read8(page + 0x23), 0x77);
    }

    #[test]
    fn cart_ram_requires_enable() {
        let (mut m, mut dmg) = setup(0x03);
        dmg.write_at(&mut m.mem, 0xa000, 0x12);
        assert_eq!(dmg.read_at(&m.mem, 0xa000), 0xff);
        dmg.write_at(&mut m.mem, 0x0000, 0x0a);
        dmg.write_at(&mut m.mem, 0xa000, 0x12);
        assert_eq!(dmg.read_at(&m.mem, 0xa000), 0x12);
        assert_ne!(m.mem.read32(dmg.read_pages + 0xa0 * 4), 0);
    }

    #[test]
    fn vblank_interrupt_fires_on_line_144_crossing() {
        let (mut m, mut dmg) = setup(0);
        dmg.if_bits = 0;
        dmg.sync_hw(&mut m.mem, 65663);
        assert_eq!(dmg.if_bits & INT_VBLANK, 0);
        dmg.sync_hw(&mut m.mem, 1);
        assert_ne!(dmg.if_bits & INT_VBLANK, 0);
    }

    #[test]
    fn frame_counter_wraps_and_counts_frames() {
        let (mut m, mut dmg) = setup(0);
        dmg.sync_hw(&mut m.mem, lcd::CYCLES_PER_FRAME * 3 + 10);
        assert_eq!(m.mem.read32(dmg.frame_cycles_addr), 10);
        assert_eq!(dmg.frames_elapsed(), 3);
    }

    #[test]
    fn ly_read_includes_in_flight_cycles() {
        let (mut m, mut dmg) = setup(0);
        dmg.sync_hw(&mut m.mem, 456 * 10);
        assert_eq!(dmg.read_at(&m.mem, 0xff44), 10);
    }

    #[test]
    fn div_resets_on_write() {
        let (mut m, mut dmg) = setup(0);
        dmg.sync_hw(&mut m.mem, 256 * 7);
        assert_eq!(dmg.read_at(&m.mem, 0xff04), 7);
        dmg.write_at(&mut m.mem, 0xff04, 0x55);
        assert_eq!(dmg.read_at(&m.mem, 0xff04), 0);
    }

    #[test]
    fn timer_overflow_requests_interrupt_and_reloads() {
        let (mut m, mut dmg) = setup(0);
        dmg.if_bits = 0;
        dmg.write_at(&mut m.mem, 0xff06, 0xf0); // tma
        dmg.write_at(&mut m.mem, 0xff05, 0xff); // tima
        dmg.write_at(&mut m.mem, 0xff07, 0x05); // enable, 16-cycle period
        dmg.sync_hw(&mut m.mem, 16);
        assert_ne!(dmg.if_bits & INT_TIMER, 0);
        assert_eq!(dmg.read_at(&m.mem, 0xff05), 0xf0);
    }

    #[test]
    fn joypad_matrix_reads_active_low() {
        let (mut m, mut dmg) = setup(0);
        dmg.set_button(&mut m.mem, Button::A, true);
        dmg.write_at(&mut m.mem, 0xff00, 0x10); // select action row
        assert_eq!(dmg.read_at(&m.mem, 0xff00) & 0x01, 0);
        dmg.write_at(&mut m.mem, 0xff00, 0x20); // select dpad row
        assert_eq!(dmg.read_at(&m.mem, 0xff00) & 0x0f, 0x0f);
    }

    #[test]
    fn oam_dma_copies_from_wram() {
        let (mut m, mut dmg) = setup(0);
        for k in 0..0xa0u16 {
            dmg.write_at(&mut m.mem, 0xc000 + k, k as u8);
        }
        dmg.write_at(&mut m.mem, 0xff46, 0xc0);
        assert_eq!(dmg.read_at(&m.mem, 0xfe00), 0);
        assert_eq!(dmg.read_at(&m.mem, 0xfe9f), 0x9f);
    }

    #[test]
    fn ie_register_lives_in_hram_block() {
        let (mut m, mut dmg) = setup(0);
        dmg.write_at(&mut m.mem, 0xffff, 0x1f);
        assert_eq!(m.mem.read8(dmg.hram_addr + 0x7f), 0x1f);
        assert_eq!(dmg.read_at(&m.mem, 0xffff), 0x1f);
    }
}
