#![doc = r#"
gb68 library crate.

A Game Boy emulator built around a dynamic binary translator: guest SM83
code is recompiled, basic block at a time, into 68000 machine code that
runs on an in-crate host-machine model (flat 24-bit RAM plus a 68000
interpreter covering the generated instruction set). Blocks are cached
per address and ROM bank, chained by in-place patching, and coordinated
with a cycle-driven hardware model.

Modules:
- emulator: session facade tying the host machine, hardware and JIT
- jit: translator, emitters, block cache/LRU, dispatcher stubs, driver
- m68k: host machine (RAM arena, callouts) and the 68000 interpreter
- dmg: bus/hardware model (page tables, MMIO, interrupts, timers, joypad)
- lcd: LCD register file and scanline state derived from the frame clock
- mbc: cartridge bank controllers (MBC1, MBC3 with RTC)
- rom: cartridge image loading and header parsing

In tests, shared ROM/program builders and an execution harness are
available under `crate::test_utils`.
"#]

pub mod dmg;
pub mod emulator;
pub mod jit;
pub mod lcd;
pub mod m68k;
pub mod mbc;
pub mod rom;

// Re-export the types most embedders need.
pub use emulator::{CpuState, EmuError, Emulator};
pub use jit::Config;
pub use rom::Rom;

// Shared test utilities (only compiled for tests)
#[cfg(test)]
pub mod test_utils;
