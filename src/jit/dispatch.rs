/*!
Hand-assembled 68000 stubs: the inter-block dispatcher and the lazy patch
helper. Installed once per session into host memory; every compiled block
reaches them through the function-pointer slots in the JIT context.

Register use inside the stubs: D3 = target guest PC, D2 = accumulated
cycles, A4 = context, A0/A1/D1 scratch. Context displacements are the
`JIT_CTX_*` values and are hardcoded in the byte arrays below, offset
comments on every line.
*/

use crate::m68k::{ExecError, Machine};

/// Chain-exit target. Compiled blocks jump here (through the context slot)
/// with the next guest PC in D3. The stub:
/// 1. returns to the driver once D2 exceeds the per-exit cycle budget,
/// 2. picks the cache tier from the PC range (0x4000 / 0x8000 bounds),
/// 3. indexes the tier (bank row first for the switchable region), and
/// 4. jumps straight into the next block, or RTSes out on a miss.
#[rustfmt::skip]
const DISPATCHER: [u8; 114] = [
    0x0c, 0x82, 0x00, 0x00, 0x1c, 0x80, //   0: cmpi.l #cycles_per_exit, d2
    0x64, 0x68,                         //   6: bcc.s .exit (112)
    0x0c, 0x43, 0x40, 0x00,             //   8: cmpi.w #$4000, d3
    0x65, 0x20,                         //  12: bcs.s .bank0 (46)
    0x0c, 0x43, 0x80, 0x00,             //  14: cmpi.w #$8000, d3
    0x65, 0x30,                         //  18: bcs.s .banked (68)
    // .upper:
    0x20, 0x6c, 0x00, 0x1c,             //  20: movea.l upper_cache(a4), a0
    0x72, 0x00,                         //  24: moveq #0, d1
    0x32, 0x03,                         //  26: move.w d3, d1
    0x04, 0x41, 0x80, 0x00,             //  28: subi.w #$8000, d1
    0xe5, 0x89,                         //  32: lsl.l #2, d1
    0x20, 0x70, 0x18, 0x00,             //  34: movea.l (a0,d1.l), a0
    0xb0, 0xfc, 0x00, 0x00,             //  38: cmpa.w #0, a0
    0x67, 0x44,                         //  42: beq.s .exit (112)
    0x4e, 0xd0,                         //  44: jmp (a0)
    // .bank0:
    0x20, 0x6c, 0x00, 0x14,             //  46: movea.l bank0_cache(a4), a0
    0x72, 0x00,                         //  50: moveq #0, d1
    0x32, 0x03,                         //  52: move.w d3, d1
    0xe5, 0x89,                         //  54: lsl.l #2, d1
    0x20, 0x70, 0x18, 0x00,             //  56: movea.l (a0,d1.l), a0
    0xb0, 0xfc, 0x00, 0x00,             //  60: cmpa.w #0, a0
    0x67, 0x2e,                         //  64: beq.s .exit (112)
    0x4e, 0xd0,                         //  66: jmp (a0)
    // .banked:
    0x20, 0x6c, 0x00, 0x18,             //  68: movea.l banked_cache(a4), a0
    0x72, 0x00,                         //  72: moveq #0, d1
    0x12, 0x2c, 0x00, 0x11,             //  74: move.b current_rom_bank(a4), d1
    0xe5, 0x89,                         //  78: lsl.l #2, d1
    0x20, 0x70, 0x18, 0x00,             //  80: movea.l (a0,d1.l), a0
    0xb0, 0xfc, 0x00, 0x00,             //  84: cmpa.w #0, a0
    0x67, 0x16,                         //  88: beq.s .exit (112)
    0x72, 0x00,                         //  90: moveq #0, d1
    0x32, 0x03,                         //  92: move.w d3, d1
    0x04, 0x41, 0x40, 0x00,             //  94: subi.w #$4000, d1
    0xe5, 0x89,                         //  98: lsl.l #2, d1
    0x20, 0x70, 0x18, 0x00,             // 100: movea.l (a0,d1.l), a0
    0xb0, 0xfc, 0x00, 0x00,             // 104: cmpa.w #0, a0
    0x67, 0x02,                         // 108: beq.s .exit (112)
    0x4e, 0xd0,                         // 110: jmp (a0)
    // .exit:
    0x4e, 0x75,                         // 112: rts
];

/// Offset of the 32-bit cycle budget inside the dispatcher image.
const DISPATCHER_BUDGET_OFFSET: usize = 2;

/// Lazy patcher, entered by `jsr` from a patchable exit site. Pops the
/// return address to find the site, looks the successor up like the
/// dispatcher does, and for bank-0/upper targets rewrites the 6-byte
/// load-helper/JSR pair into `jmp.l <block>` before jumping in. Targets in
/// the switchable-bank region are chained to but never patched: a burned-in
/// JMP.L would keep sending every later bank's code to the block that
/// happened to be resident when the site first ran.
#[rustfmt::skip]
const PATCH_HELPER: [u8; 114] = [
    0x22, 0x5f,                         //   0: movea.l (sp)+, a1
    0x0c, 0x43, 0x40, 0x00,             //   2: cmpi.w #$4000, d3
    0x65, 0x32,                         //   6: bcs.s .bank0 (58)
    0x0c, 0x43, 0x80, 0x00,             //   8: cmpi.w #$8000, d3
    0x64, 0x3c,                         //  12: bcc.s .upper (74)
    // .banked: look up, chain without patching
    0x20, 0x6c, 0x00, 0x18,             //  14: movea.l banked_cache(a4), a0
    0x72, 0x00,                         //  18: moveq #0, d1
    0x12, 0x2c, 0x00, 0x11,             //  20: move.b current_rom_bank(a4), d1
    0xe5, 0x89,                         //  24: lsl.l #2, d1
    0x20, 0x70, 0x18, 0x00,             //  26: movea.l (a0,d1.l), a0
    0xb0, 0xfc, 0x00, 0x00,             //  30: cmpa.w #0, a0
    0x67, 0x4c,                         //  34: beq.s .no_patch (112)
    0x72, 0x00,                         //  36: moveq #0, d1
    0x32, 0x03,                         //  38: move.w d3, d1
    0x04, 0x41, 0x40, 0x00,             //  40: subi.w #$4000, d1
    0xe5, 0x89,                         //  44: lsl.l #2, d1
    0x20, 0x70, 0x18, 0x00,             //  46: movea.l (a0,d1.l), a0
    0xb0, 0xfc, 0x00, 0x00,             //  50: cmpa.w #0, a0
    0x67, 0x38,                         //  54: beq.s .no_patch (112)
    0x4e, 0xd0,                         //  56: jmp (a0)
    // .bank0:
    0x20, 0x6c, 0x00, 0x14,             //  58: movea.l bank0_cache(a4), a0
    0x72, 0x00,                         //  62: moveq #0, d1
    0x32, 0x03,                         //  64: move.w d3, d1
    0xe5, 0x89,                         //  66: lsl.l #2, d1
    0x20, 0x70, 0x18, 0x00,             //  68: movea.l (a0,d1.l), a0
    0x60, 0x12,                         //  72: bra.s .check_found (92)
    // .upper:
    0x20, 0x6c, 0x00, 0x1c,             //  74: movea.l upper_cache(a4), a0
    0x72, 0x00,                         //  78: moveq #0, d1
    0x32, 0x03,                         //  80: move.w d3, d1
    0x04, 0x41, 0x80, 0x00,             //  82: subi.w #$8000, d1
    0xe5, 0x89,                         //  86: lsl.l #2, d1
    0x20, 0x70, 0x18, 0x00,             //  88: movea.l (a0,d1.l), a0
    // .check_found:
    0xb0, 0xfc, 0x00, 0x00,             //  92: cmpa.w #0, a0
    0x67, 0x0e,                         //  96: beq.s .no_patch (112)
    // .do_patch:
    0x43, 0xe9, 0xff, 0xfa,             //  98: lea -6(a1), a1
    0x32, 0xfc, 0x4e, 0xf9,             // 102: move.w #$4ef9, (a1)+
    0x22, 0x88,                         // 106: move.l a0, (a1)
    0xa0, 0xbd,                         // 108: _CacheFlush
    0x4e, 0xd0,                         // 110: jmp (a0)
    // .no_patch: land on the site's trailing RTS
    0x4e, 0xd1,                         // 112: jmp (a1)
];

/// The 6 bytes a patchable exit site holds before patching (and again
/// after invalidation): `movea.l patch_helper(a4), a0 ; jsr (a0)`.
pub const PATCH_SITE_TEMPLATE: [u8; 6] = [0x20, 0x6c, 0x00, 0x30, 0x4e, 0x90];

/// First opcode word of a patched site: `jmp.l`.
pub const JMP_L: [u8; 2] = [0x4e, 0xf9];

/// Install both stubs into host memory with the configured cycle budget
/// burned into the dispatcher. Returns (dispatcher, patch_helper).
pub fn install(machine: &mut Machine, cycles_per_exit: u32) -> Result<(u32, u32), ExecError> {
    let mut dispatcher = DISPATCHER;
    dispatcher[DISPATCHER_BUDGET_OFFSET..DISPATCHER_BUDGET_OFFSET + 4]
        .copy_from_slice(&cycles_per_exit.to_be_bytes());

    let disp_addr = machine.alloc(dispatcher.len() as u32)?;
    machine.mem.copy_in(disp_addr, &dispatcher);

    let patch_addr = machine.alloc(PATCH_HELPER.len() as u32)?;
    machine.mem.copy_in(patch_addr, &PATCH_HELPER);

    Ok((disp_addr, patch_addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_burns_budget_into_dispatcher() {
        let mut m = Machine::new();
        let (disp, patch) = install(&mut m, 0x12345).unwrap();
        assert_eq!(m.mem.read16(disp), 0x0c82);
        assert_eq!(m.mem.read32(disp + 2), 0x12345);
        assert_eq!(m.mem.read16(patch), 0x225f);
        assert_ne!(disp, patch);
    }

    #[test]
    fn patch_site_template_matches_emitter_output() {
        use crate::jit::block::CodeBlock;
        let mut b = CodeBlock::new(0, 0);
        b.patchable_exit();
        assert_eq!(&b.code[0..6], &PATCH_SITE_TEMPLATE);
    }
}
