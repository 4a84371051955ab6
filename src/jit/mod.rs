/*!
The dynamic recompiler: block discovery/translation (`translate`), the
emitter (`emit`), the block cache (`cache`), the native stubs
(`dispatch`), and the outer driver that ties them to the hardware model.

Guest register contract, held across block executions and loaded into the
host CPU around every entry:

| Host | Guest |
|------|-------|
| D4.b | A |
| D5.l | BC, split `0x00BB00CC` |
| D6.l | DE, split `0x00DD00EE` |
| D7.b | F, SM83 layout (Z/N/H/C in bits 7..4) |
| A2.w | HL |
| A3   | SP: host pointer when `sp_adjust != 0`, raw guest SP otherwise |
| A4   | JIT context base |
| D2.l | accumulated cycles (may carry across entries) |
| D3.l | guest PC in, next guest PC out |

D0, D1, D3, A0, A1 are free inside a block. The JIT context is a fixed
struct in host memory; emitted code reaches every field through the A4
displacements below, so the offsets are part of the ABI.
*/

pub mod block;
pub mod cache;
pub mod dispatch;
pub mod emit;
pub mod translate;

#[cfg(test)]
mod tests;

use log::{error, info, warn};
use thiserror::Error;

use crate::m68k::{
    Callouts, ExecError, HostMem, Machine, CALLOUT_EI_DI, CALLOUT_READ, CALLOUT_READ16,
    CALLOUT_WRITE, CALLOUT_WRITE16,
};
use block::CodeBlock;
use cache::BlockCache;
use translate::compile_block;

// Host register roles (68000 register numbers).
pub const REG_D_SCRATCH0: u8 = 0;
pub const REG_D_SCRATCH1: u8 = 1;
pub const REG_D_CYCLES: u8 = 2;
pub const REG_D_PC: u8 = 3;
pub const REG_D_A: u8 = 4;
pub const REG_D_BC: u8 = 5;
pub const REG_D_DE: u8 = 6;
pub const REG_D_F: u8 = 7;
pub const REG_A_SCRATCH0: u8 = 0;
pub const REG_A_SCRATCH1: u8 = 1;
pub const REG_A_HL: u8 = 2;
pub const REG_A_SP: u8 = 3;
pub const REG_A_CTX: u8 = 4;

// SM83 flag positions inside D7.
pub const F_Z: u8 = 0x80;
pub const F_N: u8 = 0x40;
pub const F_H: u8 = 0x20;
pub const F_C: u8 = 0x10;
pub const F_BIT_Z: u8 = 7;
pub const F_BIT_C: u8 = 4;

// JIT context field displacements (A4-relative).
pub const JIT_CTX_DMG: i16 = 0x00;
pub const JIT_CTX_READ: i16 = 0x04;
pub const JIT_CTX_WRITE: i16 = 0x08;
pub const JIT_CTX_EI_DI: i16 = 0x0c;
pub const JIT_CTX_INTERRUPT_CHECK: i16 = 0x10;
pub const JIT_CTX_CURRENT_ROM_BANK: i16 = 0x11;
pub const JIT_CTX_BANK0_CACHE: i16 = 0x14;
pub const JIT_CTX_BANKED_CACHE: i16 = 0x18;
pub const JIT_CTX_UPPER_CACHE: i16 = 0x1c;
pub const JIT_CTX_DISPATCHER_RETURN: i16 = 0x20;
pub const JIT_CTX_READ16: i16 = 0x24;
pub const JIT_CTX_WRITE16: i16 = 0x28;
pub const JIT_CTX_CYCLES_ACCUMULATED: i16 = 0x2c;
pub const JIT_CTX_PATCH_HELPER: i16 = 0x30;
pub const JIT_CTX_READ_CYCLES: i16 = 0x34;
pub const JIT_CTX_WRAM_BASE: i16 = 0x38;
pub const JIT_CTX_FRAME_CYCLES_PTR: i16 = 0x3c;
/// DAA bookkeeping lives in the temp slots: pre-op A at 0x40, the
/// add/subtract direction byte right behind it.
pub const JIT_CTX_DAA_OLD_A: i16 = 0x40;
pub const JIT_CTX_DAA_NEG: i16 = 0x41;
pub const JIT_CTX_TEMP2: i16 = 0x44;
pub const JIT_CTX_GB_SP: i16 = 0x48;
pub const JIT_CTX_SP_ADJUST: i16 = 0x4c;
pub const JIT_CTX_READ_PAGES: i16 = 0x50;
pub const JIT_CTX_WRITE_PAGES: i16 = 0x54;
pub const JIT_CTX_HRAM_BASE: i16 = 0x58;
pub const JIT_CTX_SIZE: u32 = 0x5c;

/// D3 value meaning "stop the session" (STOP, translation error).
pub const HALT_SENTINEL: u32 = 0xffff_ffff;

pub const INT_VBLANK: u8 = 1 << 0;
pub const INT_LCDSTAT: u8 = 1 << 1;
pub const INT_TIMER: u8 = 1 << 2;
pub const INT_SERIAL: u8 = 1 << 3;
pub const INT_JOYPAD: u8 = 1 << 4;
const INT_VECTORS: [u16; 5] = [0x40, 0x48, 0x50, 0x58, 0x60];

#[derive(Debug, Error)]
pub enum JitError {
    #[error("unimplemented guest opcode {opcode:02x} at {address:04x}")]
    UnknownOpcode { opcode: u16, address: u16 },
    #[error("out of host memory compiling {address:04x}")]
    OutOfMemory { address: u16 },
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Compile-time view of guest memory. Must reflect the post-boot memory
/// map; translation reads never advance hardware state.
pub trait GuestSource {
    fn read_byte(&self, mem: &HostMem, addr: u16) -> u8;
}

/// Everything the driver needs from the hardware model between blocks.
pub trait Hardware: Callouts + GuestSource {
    /// Advance PPU/timer state by the given number of 4 MHz cycles.
    fn sync(&mut self, mem: &mut HostMem, cycles: u32);
    /// Master interrupt enable, as maintained through the EI/DI callout.
    fn ime(&self) -> bool;
    /// `IE & IF & 0x1f`.
    fn pending_interrupts(&self, mem: &HostMem) -> u8;
    /// Clear the IF bit being serviced and drop IME.
    fn acknowledge_interrupt(&mut self, bit: u8);
}

/// Translator inputs (spec'd compile context).
pub struct CompileCtx<'a> {
    pub src: &'a dyn GuestSource,
    pub mem: &'a HostMem,
    /// Host addresses of the directly-addressable guest RAM regions.
    pub wram_base: u32,
    pub hram_base: u32,
    /// End every block after one instruction (test runner mode).
    pub single_instruction: bool,
}

impl CompileCtx<'_> {
    #[inline]
    pub fn read(&self, addr: u16) -> u8 {
        self.src.read_byte(self.mem, addr)
    }
}

/// Host addresses the JIT context needs from the hardware model.
#[derive(Clone, Copy)]
pub struct HwLayout {
    pub wram_base: u32,
    pub hram_base: u32,
    pub frame_cycles: u32,
    pub read_pages: u32,
    pub write_pages: u32,
}

#[derive(Clone, Copy)]
pub struct Config {
    /// Cycle budget checked at dispatcher exits; roughly how long
    /// translated code may chain before the driver regains control.
    pub cycles_per_exit: u32,
    /// Interpreter instruction bound per block entry.
    pub fuel: u32,
    pub single_instruction: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cycles_per_exit: 7296, // 16 scanlines
            fuel: 4_000_000,
            single_instruction: false,
        }
    }
}

/// Guest register file persisted between block executions.
#[derive(Default, Clone, Copy)]
pub struct JitRegs {
    pub d2: u32,
    pub d3: u32,
    pub d4: u32,
    pub d5: u32,
    pub d6: u32,
    pub d7: u32,
    pub a2: u32,
    pub a3: u32,
}

pub enum StepOutcome {
    /// A block (chain) ran; cycles were credited to the hardware.
    Ran { cycles: u32 },
    /// The session reached the halt sentinel.
    Halted,
}

pub struct Jit {
    pub regs: JitRegs,
    pub cache: BlockCache,
    pub config: Config,
    ctx_addr: u32,
    layout: HwLayout,
    halted: bool,
    blocks_compiled: u64,
    steps: u64,
}

impl Jit {
    /// Build the JIT context, tiers, and stubs inside host memory, and
    /// initialize the guest register file to post-boot state. Marks the
    /// arena: everything allocated later (bank rows) is flushable.
    pub fn new(machine: &mut Machine, layout: HwLayout, config: Config) -> Result<Self, ExecError> {
        let cache = BlockCache::new(machine)?;
        let (dispatcher, patch_helper) = dispatch::install(machine, config.cycles_per_exit)?;
        let ctx_addr = machine.alloc(JIT_CTX_SIZE)?;

        let (bank0, banked, upper) = cache.tier_addrs();
        let m = &mut machine.mem;
        let c = |off: i16| ctx_addr + off as u32;
        m.write32(c(JIT_CTX_DMG), ctx_addr); // opaque handle, never dereferenced
        m.write32(c(JIT_CTX_READ), CALLOUT_READ);
        m.write32(c(JIT_CTX_WRITE), CALLOUT_WRITE);
        m.write32(c(JIT_CTX_EI_DI), CALLOUT_EI_DI);
        m.write8(c(JIT_CTX_INTERRUPT_CHECK), 0);
        m.write8(c(JIT_CTX_CURRENT_ROM_BANK), 1);
        m.write32(c(JIT_CTX_BANK0_CACHE), bank0);
        m.write32(c(JIT_CTX_BANKED_CACHE), banked);
        m.write32(c(JIT_CTX_UPPER_CACHE), upper);
        m.write32(c(JIT_CTX_DISPATCHER_RETURN), dispatcher);
        m.write32(c(JIT_CTX_READ16), CALLOUT_READ16);
        m.write32(c(JIT_CTX_WRITE16), CALLOUT_WRITE16);
        m.write32(c(JIT_CTX_CYCLES_ACCUMULATED), 0);
        m.write32(c(JIT_CTX_PATCH_HELPER), patch_helper);
        m.write32(c(JIT_CTX_READ_CYCLES), 0);
        m.write32(c(JIT_CTX_WRAM_BASE), layout.wram_base);
        m.write32(c(JIT_CTX_FRAME_CYCLES_PTR), layout.frame_cycles);
        m.write32(c(JIT_CTX_DAA_OLD_A), 0);
        m.write32(c(JIT_CTX_TEMP2), 0);
        m.write16(c(JIT_CTX_GB_SP), 0xfffe);
        m.write32(c(JIT_CTX_SP_ADJUST), 0xff80u32.wrapping_sub(layout.hram_base));
        m.write32(c(JIT_CTX_READ_PAGES), layout.read_pages);
        m.write32(c(JIT_CTX_WRITE_PAGES), layout.write_pages);
        m.write32(c(JIT_CTX_HRAM_BASE), layout.hram_base);

        machine.set_mark();

        // Post-boot DMG register state; SP starts in HRAM fast mode.
        let regs = JitRegs {
            d2: 0,
            d3: 0x100,
            d4: 0x01,
            d5: 0x0000_0013,
            d6: 0x0000_00d8,
            d7: 0xb0,
            a2: 0x014d,
            a3: layout.hram_base + (0xfffe - 0xff80),
        };

        Ok(Jit {
            regs,
            cache,
            config,
            ctx_addr,
            layout,
            halted: false,
            blocks_compiled: 0,
            steps: 0,
        })
    }

    pub fn ctx_addr(&self) -> u32 {
        self.ctx_addr
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn blocks_compiled(&self) -> u64 {
        self.blocks_compiled
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Guest PC about to execute (or just exited to).
    pub fn pc(&self) -> u16 {
        self.regs.d3 as u16
    }

    /// Asynchronous yield request: sets the interrupt-check byte in the
    /// context. Safe to call from an embedder's timer path.
    pub fn request_yield(&self, mem: &mut HostMem) {
        mem.write8(self.ctx_addr + JIT_CTX_INTERRUPT_CHECK as u32, 1);
    }

    fn ctx8(&self, mem: &HostMem, off: i16) -> u8 {
        mem.read8(self.ctx_addr + off as u32)
    }

    fn ctx_write16(&self, mem: &mut HostMem, off: i16, v: u16) {
        mem.write16(self.ctx_addr + off as u32, v);
    }

    /// One outer step: look up or compile the block at the current guest
    /// PC, run it (and whatever it chains to), credit cycles to the
    /// hardware, then poll for an interrupt to inject.
    pub fn step<H: Hardware>(
        &mut self,
        machine: &mut Machine,
        hw: &mut H,
    ) -> Result<StepOutcome, JitError> {
        if self.halted {
            return Ok(StepOutcome::Halted);
        }
        self.steps += 1;

        let pc = self.regs.d3 as u16;
        let bank = self.ctx8(&machine.mem, JIT_CTX_CURRENT_ROM_BANK);
        machine
            .mem
            .write8(self.ctx_addr + JIT_CTX_INTERRUPT_CHECK as u32, 0);

        let slot = match self.cache.lookup(&machine.mem, pc, bank) {
            Some(slot) => {
                self.cache.promote(slot);
                slot
            }
            None => self.compile_and_insert(machine, hw, pc, bank)?,
        };
        let entry = self.cache.slot_addr(slot);

        // Trampoline: materialize the guest register file, run, persist.
        let cpu = &mut machine.cpu;
        cpu.d = [
            0,
            0,
            self.regs.d2,
            self.regs.d3,
            self.regs.d4,
            self.regs.d5,
            self.regs.d6,
            self.regs.d7,
        ];
        cpu.a = [0, 0, self.regs.a2, self.regs.a3, self.ctx_addr, 0, 0, 0];
        cpu.ccr = 0;

        if let Err(e) = machine.run(hw, entry, self.config.fuel) {
            error!("translated code fault: {e}");
            self.halted = true;
            return Err(e.into());
        }

        let cpu = &machine.cpu;
        self.regs.d2 = cpu.d[2];
        self.regs.d3 = cpu.d[3];
        self.regs.d4 = cpu.d[4];
        self.regs.d5 = cpu.d[5];
        self.regs.d6 = cpu.d[6];
        self.regs.d7 = cpu.d[7];
        self.regs.a2 = cpu.a[2];
        self.regs.a3 = cpu.a[3];

        if self.regs.d3 == HALT_SENTINEL {
            info!("halt sentinel at former pc {pc:04x}");
            self.halted = true;
            return Ok(StepOutcome::Halted);
        }

        // Cycle credit goes to hardware before interrupts are observed;
        // this is the only ordering the block-granular model promises.
        let cycles = self.regs.d2;
        hw.sync(&mut machine.mem, cycles);
        self.regs.d2 = 0;
        machine
            .mem
            .write32(self.ctx_addr + JIT_CTX_READ_CYCLES as u32, 0);

        if hw.ime() {
            let pending = hw.pending_interrupts(&machine.mem);
            if pending != 0 {
                let k = pending.trailing_zeros() as usize;
                hw.acknowledge_interrupt(1 << k);
                self.push_pc_for_interrupt(machine, hw);
                self.regs.d3 = INT_VECTORS[k] as u32;
            }
        }

        Ok(StepOutcome::Ran { cycles })
    }

    fn compile_and_insert<H: Hardware>(
        &mut self,
        machine: &mut Machine,
        hw: &H,
        pc: u16,
        bank: u8,
    ) -> Result<u16, JitError> {
        self.cache.ensure_headroom(machine);

        let block = self.compile(machine, hw, pc, bank)?;
        match self.cache.insert(machine, &block) {
            Ok(slot) => Ok(slot),
            Err(e) => {
                // One whole-cache flush buys back every bank row, then
                // retry; a second failure is fatal.
                warn!("host arena exhausted ({e}); flushing block cache");
                self.cache.flush_all(machine);
                let block = self.compile(machine, hw, pc, bank)?;
                match self.cache.insert(machine, &block) {
                    Ok(slot) => Ok(slot),
                    Err(_) => {
                        self.halted = true;
                        Err(JitError::OutOfMemory { address: pc })
                    }
                }
            }
        }
    }

    fn compile<H: Hardware>(
        &mut self,
        machine: &Machine,
        hw: &H,
        pc: u16,
        bank: u8,
    ) -> Result<CodeBlock, JitError> {
        let ctx = CompileCtx {
            src: hw,
            mem: &machine.mem,
            wram_base: self.layout.wram_base,
            hram_base: self.layout.hram_base,
            single_instruction: self.config.single_instruction,
        };
        let block = compile_block(pc, bank, &ctx);
        self.blocks_compiled += 1;
        if let Some(err) = block.error {
            error!(
                "translation failed: opcode {:02x} at {:04x}",
                err.opcode, err.address
            );
            self.halted = true;
            return Err(JitError::UnknownOpcode {
                opcode: err.opcode,
                address: err.address,
            });
        }
        debug_assert!(!block.overflowed(), "reserve check failed to split block");
        #[cfg(feature = "block_trace")]
        {
            let mut dump = String::new();
            for b in &block.code[..block.len] {
                dump.push_str(&format!("{b:02x} "));
            }
            log::trace!(
                "block {:02x}:{:04x}-{:04x}: {}",
                bank,
                block.src_address,
                block.end_address,
                dump
            );
        }
        Ok(block)
    }

    /// Push the interrupted PC onto the guest stack. In fast mode A3 is a
    /// native pointer and the bytes are written directly; in slow mode
    /// the write goes through the hardware model at the raw guest SP.
    fn push_pc_for_interrupt<H: Hardware>(&mut self, machine: &mut Machine, hw: &mut H) {
        let pc = self.regs.d3 as u16;
        let sp_adjust = machine.mem.read32(self.ctx_addr + JIT_CTX_SP_ADJUST as u32);
        let gb_sp = machine
            .mem
            .read16(self.ctx_addr + JIT_CTX_GB_SP as u32)
            .wrapping_sub(2);
        self.ctx_write16(&mut machine.mem, JIT_CTX_GB_SP, gb_sp);

        let a3 = self.regs.a3.wrapping_sub(2);
        self.regs.a3 = a3;
        if sp_adjust != 0 {
            machine.mem.write8(a3, pc as u8);
            machine.mem.write8(a3.wrapping_add(1), (pc >> 8) as u8);
        } else {
            hw.guest_write(&mut machine.mem, gb_sp, pc as u8);
            hw.guest_write(&mut machine.mem, gb_sp.wrapping_add(1), (pc >> 8) as u8);
        }
    }
}
