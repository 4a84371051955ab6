//! Shared test utilities: a flat-memory execution harness for compiled
//! blocks, mirroring the standalone test runner the compiler grew up
//! with (guest memory mapped flat at host address 0, callouts serviced
//! against the same bytes, registers inspected after each run).
//!
//! The harness deliberately leaves the dispatcher/patch-helper context
//! slots at zero: a chain exit then lands on the return sentinel with D3
//! already holding the next guest PC, so `run_program` can act as a
//! minimal driver without the block cache. Cache/patching behavior has
//! its own tests against the real driver.

#![allow(dead_code)]

use crate::jit::block::CodeBlock;
use crate::jit::translate::compile_block;
use crate::jit::{
    CompileCtx, GuestSource, HALT_SENTINEL, JIT_CTX_EI_DI, JIT_CTX_GB_SP, JIT_CTX_READ,
    JIT_CTX_READ16, JIT_CTX_SIZE, JIT_CTX_SP_ADJUST, JIT_CTX_WRITE, JIT_CTX_WRITE16,
};
use crate::m68k::{
    Callouts, HostMem, Machine, CALLOUT_EI_DI, CALLOUT_READ, CALLOUT_READ16, CALLOUT_WRITE,
    CALLOUT_WRITE16,
};

/// Guest memory sits flat at the bottom of host memory, inside the
/// reserved low window the arena never touches.
pub const GB_BASE: u32 = 0;
pub const DEFAULT_SP: u16 = 0xcff0;

/// Flat 64 KiB guest bus: reads and writes go straight to host memory.
pub struct FlatHost {
    pub ei_log: Vec<bool>,
    pub reads: u32,
    pub writes: u32,
}

impl Callouts for FlatHost {
    fn guest_read(&mut self, mem: &mut HostMem, addr: u16) -> u8 {
        self.reads += 1;
        mem.read8(GB_BASE + addr as u32)
    }

    fn guest_write(&mut self, mem: &mut HostMem, addr: u16, value: u8) {
        self.writes += 1;
        mem.write8(GB_BASE + addr as u32, value);
    }

    fn ei_di(&mut self, _mem: &mut HostMem, enabled: bool) {
        self.ei_log.push(enabled);
    }
}

struct FlatSource;

impl GuestSource for FlatSource {
    fn read_byte(&self, mem: &HostMem, addr: u16) -> u8 {
        mem.read8(GB_BASE + addr as u32)
    }
}

pub struct Harness {
    pub machine: Machine,
    pub host: FlatHost,
    pub ctx_addr: u32,
    pub frame_cycles_addr: u32,
    code_addr: u32,
    pub single_instruction: bool,
}

impl Harness {
    /// Install a guest program at address 0 of the flat bus.
    pub fn new(program: &[u8]) -> Harness {
        let mut machine = Machine::new();
        machine.mem.copy_in(GB_BASE, program);
        let ctx_addr = machine.alloc(JIT_CTX_SIZE).unwrap();
        let frame_cycles_addr = machine.alloc(4).unwrap();
        let code_addr = machine.alloc(4096).unwrap();
        // all-null page tables: every access takes the slow callout path
        let read_pages = machine.alloc(256 * 4).unwrap();
        let write_pages = machine.alloc(256 * 4).unwrap();

        let m = &mut machine.mem;
        let c = |off: i16| ctx_addr + off as u32;
        m.write32(c(crate::jit::JIT_CTX_DMG), 0x4000);
        m.write32(c(JIT_CTX_READ), CALLOUT_READ);
        m.write32(c(JIT_CTX_WRITE), CALLOUT_WRITE);
        m.write32(c(JIT_CTX_READ16), CALLOUT_READ16);
        m.write32(c(JIT_CTX_WRITE16), CALLOUT_WRITE16);
        m.write32(c(JIT_CTX_EI_DI), CALLOUT_EI_DI);
        m.write32(c(crate::jit::JIT_CTX_FRAME_CYCLES_PTR), frame_cycles_addr);
        m.write32(c(crate::jit::JIT_CTX_READ_PAGES), read_pages);
        m.write32(c(crate::jit::JIT_CTX_WRITE_PAGES), write_pages);
        m.write32(c(crate::jit::JIT_CTX_WRAM_BASE), GB_BASE + 0xc000);
        m.write32(c(crate::jit::JIT_CTX_HRAM_BASE), GB_BASE + 0xff80);
        m.write16(c(JIT_CTX_GB_SP), DEFAULT_SP);
        // sp_adjust = 0: A3 carries the raw guest SP, which on this flat
        // layout is also the host address
        m.write32(c(JIT_CTX_SP_ADJUST), 0);

        Harness {
            machine,
            host: FlatHost {
                ei_log: Vec::new(),
                reads: 0,
                writes: 0,
            },
            ctx_addr,
            frame_cycles_addr,
            code_addr,
            single_instruction: false,
        }
    }

    pub fn compile(&self, pc: u16) -> CodeBlock {
        let ctx = CompileCtx {
            src: &FlatSource,
            mem: &self.machine.mem,
            wram_base: GB_BASE + 0xc000,
            hram_base: GB_BASE + 0xff80,
            single_instruction: self.single_instruction,
        };
        compile_block(pc, 1, &ctx)
    }

    /// Execute one compiled block with default register state. Returns
    /// the next guest PC from D3.
    pub fn run_block(&mut self, block: &CodeBlock) -> u32 {
        assert!(block.error.is_none(), "block failed: {:?}", block.error);
        self.machine.mem.copy_in(self.code_addr, &block.code[..block.len]);
        let cpu = &mut self.machine.cpu;
        cpu.d = [0; 8];
        cpu.a = [0; 8];
        cpu.a[3] = GB_BASE + DEFAULT_SP as u32;
        cpu.a[4] = self.ctx_addr;
        self.machine
            .run(&mut self.host, self.code_addr, 200_000)
            .expect("block execution");
        self.machine.cpu.d[3]
    }

    /// Minimal driver: compile/run block by block from `start` until the
    /// halt sentinel, keeping guest register state across blocks. No
    /// cache, no patching.
    pub fn run_program(&mut self, start: u16) {
        self.machine.cpu.d = [0; 8];
        self.machine.cpu.a = [0; 8];
        self.machine.cpu.a[3] = GB_BASE + DEFAULT_SP as u32;
        self.machine.cpu.a[4] = self.ctx_addr;

        let mut pc = start as u32;
        for _ in 0..10_000 {
            if pc == HALT_SENTINEL {
                return;
            }
            let block = self.compile(pc as u16);
            assert!(block.error.is_none(), "block failed: {:?}", block.error);
            self.machine
                .mem
                .copy_in(self.code_addr, &block.code[..block.len]);

            // guest registers persist across blocks; only the entry PC
            // needs materializing
            self.machine.cpu.d[3] = pc;
            self.machine
                .run(&mut self.host, self.code_addr, 200_000)
                .expect("block execution");
            pc = self.machine.cpu.d[3];
        }
        panic!("program did not halt");
    }

    pub fn d(&self, n: usize) -> u32 {
        self.machine.cpu.d[n]
    }

    pub fn a_reg(&self, n: usize) -> u32 {
        self.machine.cpu.a[n]
    }

    /// Guest accumulator.
    pub fn acc(&self) -> u8 {
        self.machine.cpu.d[4] as u8
    }

    /// Guest flags byte (SM83 layout).
    pub fn flags(&self) -> u8 {
        self.machine.cpu.d[7] as u8
    }

    /// Place bytes at an arbitrary guest address.
    pub fn install(&mut self, addr: u16, bytes: &[u8]) {
        self.machine.mem.copy_in(GB_BASE + addr as u32, bytes);
    }

    pub fn gb_mem(&self, addr: u16) -> u8 {
        self.machine.mem.read8(GB_BASE + addr as u32)
    }

    pub fn set_gb_mem(&mut self, addr: u16, value: u8) {
        self.machine.mem.write8(GB_BASE + addr as u32, value);
    }

    pub fn gb_sp(&self) -> u16 {
        self.machine.mem.read16(self.ctx_addr + JIT_CTX_GB_SP as u32)
    }

    pub fn set_frame_cycles(&mut self, cycles: u32) {
        self.machine.mem.write32(self.frame_cycles_addr, cycles);
    }
}
