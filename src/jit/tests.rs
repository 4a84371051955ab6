//! End-to-end recompiler tests: generated code is executed on the host
//! machine, either through the flat-bus harness (translator semantics)
//! or through the full driver with cache, dispatcher, and patching.

use super::dispatch::{JMP_L, PATCH_SITE_TEMPLATE};
use crate::emulator::Emulator;
use crate::jit::Config;
use crate::rom::{blank_rom, Rom};
use crate::test_utils::Harness;

fn emulator_with(code: &[u8]) -> Emulator {
    let mut data = blank_rom(0x00);
    data[0x100..0x100 + code.len()].copy_from_slice(code);
    Emulator::new(Rom::from_bytes(data).unwrap(), Config::default()).unwrap()
}

// ---- register and load semantics through the flat harness ----

#[test]
fn immediate_loads_populate_split_registers() {
    let mut h = Harness::new(&[
        0x01, 0x22, 0x11, // ld bc, 0x1122
        0x11, 0x44, 0x33, // ld de, 0x3344
        0x21, 0x66, 0x55, // ld hl, 0x5566
        0x3e, 0x77, // ld a, 0x77
        0x10,
    ]);
    h.run_program(0);
    assert_eq!(h.d(5), 0x0011_0022);
    assert_eq!(h.d(6), 0x0033_0044);
    assert_eq!(h.a_reg(2) & 0xffff, 0x5566);
    assert_eq!(h.acc(), 0x77);
}

#[test]
fn sixteen_bit_inc_carries_across_split_halves() {
    // ld bc, 0x12ff ; inc bc ; ld de, 0x3400 ; dec de ; stop
    let mut h = Harness::new(&[0x01, 0xff, 0x12, 0x03, 0x11, 0x00, 0x34, 0x1b, 0x10]);
    h.run_program(0);
    assert_eq!(h.d(5) & 0x00ff_00ff, 0x0013_0000);
    assert_eq!(h.d(6) & 0x00ff_00ff, 0x0033_00ff);
}

#[test]
fn push_pop_round_trips_between_pairs() {
    // ld bc, 0x1234 ; push bc ; pop de ; stop
    let mut h = Harness::new(&[0x01, 0x34, 0x12, 0xc5, 0xd1, 0x10]);
    h.run_program(0);
    assert_eq!(h.d(6), 0x0012_0034);
    assert_eq!(h.gb_sp(), crate::test_utils::DEFAULT_SP);
}

#[test]
fn push_af_pop_bc_carries_flags() {
    // ld a,0 ; or a,a (Z) ; ld a,0x77 ; push af ; pop bc ; stop
    let mut h = Harness::new(&[0x3e, 0x00, 0xb7, 0x3e, 0x77, 0xf5, 0xc1, 0x10]);
    h.run_program(0);
    assert_eq!(h.d(5), 0x0077_0080);
}

#[test]
fn pop_af_masks_low_nibble() {
    let mut h = Harness::new(&[0xf1, 0x10]);
    let sp = crate::test_utils::DEFAULT_SP;
    h.set_gb_mem(sp, 0xff); // F byte with garbage low nibble
    h.set_gb_mem(sp + 1, 0x12); // A
    h.run_program(0);
    assert_eq!(h.acc(), 0x12);
    assert_eq!(h.flags(), 0xf0);
}

#[test]
fn straddling_16bit_pop_issues_two_byte_reads() {
    let mut h = Harness::new(&[0xe1, 0x10]);
    h.machine
        .mem
        .write16(h.ctx_addr + super::JIT_CTX_GB_SP as u32, 0x12ff);
    h.set_gb_mem(0x12ff, 0x34);
    h.set_gb_mem(0x1300, 0x12);
    let block = h.compile(0);
    h.run_block(&block);
    assert_eq!(h.a_reg(2) & 0xffff, 0x1234);
    assert_eq!(h.host.reads, 2, "page-straddling word becomes two byte reads");
}

#[test]
fn ldh_hram_round_trip_uses_base_pointer() {
    // ld a,0x7a ; ldh (0x90),a ; ld a,0 ; ldh a,(0x90) ; stop
    let mut h = Harness::new(&[0x3e, 0x7a, 0xe0, 0x90, 0x3e, 0x00, 0xf0, 0x90, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0x7a);
    assert_eq!(h.gb_mem(0xff90), 0x7a);
    assert_eq!(h.host.reads, 0, "hram traffic must not reach the callouts");
    assert_eq!(h.host.writes, 0);
}

#[test]
fn ei_di_reach_the_host_hook() {
    let mut h = Harness::new(&[0xfb, 0xf3, 0x10]);
    h.run_program(0);
    assert_eq!(h.host.ei_log, vec![true, false]);
}

// ---- ALU flags ----

#[test]
fn compare_sets_z_and_c_in_sm83_positions() {
    // ld a,5 ; cp 5 ; stop -- then ld a,3 ; cp 5
    let mut h = Harness::new(&[0x3e, 0x05, 0xfe, 0x05, 0x10]);
    h.run_program(0);
    assert_eq!(h.flags(), 0x80 | 0x40, "equal: Z and N");

    let mut h = Harness::new(&[0x3e, 0x03, 0xfe, 0x05, 0x10]);
    h.run_program(0);
    assert_eq!(h.flags(), 0x10 | 0x40, "borrow: C and N");
}

#[test]
fn adc_with_carry_in_and_out() {
    // ld a,0xff ; scf ; adc a,0 ; stop
    let mut h = Harness::new(&[0x3e, 0xff, 0x37, 0xce, 0x00, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0x00);
    assert_eq!(h.flags(), 0x90, "Z and C");
}

#[test]
fn sbc_borrows_through_carry() {
    // ld a,0 ; scf ; sbc a,0 ; stop
    let mut h = Harness::new(&[0x3e, 0x00, 0x37, 0xde, 0x00, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0xff);
    assert_eq!(h.flags(), 0x50, "N and C");
}

#[test]
fn daa_adjusts_bcd_addition_and_subtraction() {
    // 0x19 + 0x28 = BCD 47
    let mut h = Harness::new(&[0x3e, 0x19, 0xc6, 0x28, 0x27, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0x47);

    // 0x42 - 0x13 = BCD 29
    let mut h = Harness::new(&[0x3e, 0x42, 0xd6, 0x13, 0x27, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0x29);

    // carry out: 0x91 + 0x12 = BCD 03 with carry
    let mut h = Harness::new(&[0x3e, 0x91, 0xc6, 0x12, 0x27, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0x03);
    assert_ne!(h.flags() & 0x10, 0);
}

#[test]
fn add_hl_sets_carry_keeps_z() {
    // or a,a to set Z=0 first, then ld hl,0xffff ; ld bc,1 ; add hl,bc
    let mut h = Harness::new(&[0x21, 0xff, 0xff, 0x01, 0x01, 0x00, 0x09, 0x10]);
    h.run_program(0);
    assert_eq!(h.a_reg(2) & 0xffff, 0x0000);
    assert_ne!(h.flags() & 0x10, 0, "16-bit carry");

    let mut h = Harness::new(&[0x21, 0xff, 0x0f, 0x01, 0x01, 0x00, 0x09, 0x10]);
    h.run_program(0);
    assert_eq!(h.a_reg(2) & 0xffff, 0x1000);
    assert_eq!(h.flags() & 0x10, 0);
}

#[test]
fn add_sp_i8_computes_half_and_full_carry() {
    // low byte 0xff + 0x01 carries out of bits 3 and 7
    let mut h = Harness::new(&[0x31, 0xff, 0xc0, 0xe8, 0x01, 0x10]);
    h.run_program(0);
    assert_eq!(h.gb_sp(), 0xc100);
    assert_eq!(h.a_reg(3), 0xc100, "pointer and gb_sp move together");
    assert_eq!(h.flags(), 0x30, "H and C set, Z and N clear");

    // low byte 0x08 + 0x08: half-carry only
    let mut h = Harness::new(&[0x31, 0x08, 0xc0, 0xe8, 0x08, 0x10]);
    h.run_program(0);
    assert_eq!(h.gb_sp(), 0xc010);
    assert_eq!(h.flags(), 0x20);

    // negative displacement: 0x00 + 0xff carries out of neither nibble
    let mut h = Harness::new(&[0x31, 0x00, 0xd0, 0xe8, 0xff, 0x10]);
    h.run_program(0);
    assert_eq!(h.gb_sp(), 0xcfff);
    assert_eq!(h.a_reg(3), 0xcfff);
    assert_eq!(h.flags(), 0x00);
}

#[test]
fn rotate_a_through_carry() {
    // rla with C=0 on 0x80: A=0, C=1; then rla again: A=1, C=0
    let mut h = Harness::new(&[0x3e, 0x80, 0x17, 0x17, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0x01);
    assert_eq!(h.flags() & 0x10, 0);
}

#[test]
fn cpl_scf_ccf() {
    let mut h = Harness::new(&[0x3e, 0x0f, 0x2f, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0xf0);
    assert_eq!(h.flags() & 0x60, 0x60, "cpl sets N and H");

    let mut h = Harness::new(&[0x37, 0x3f, 0x10]);
    h.run_program(0);
    assert_eq!(h.flags() & 0x10, 0, "scf then ccf clears carry");
}

// ---- CB page ----

#[test]
fn rlc_on_high_half_register() {
    // ld b,0x81 ; rlc b ; stop
    let mut h = Harness::new(&[0x06, 0x81, 0xcb, 0x00, 0x10]);
    h.run_program(0);
    assert_eq!(h.d(5) >> 16, 0x03);
    assert_eq!(h.flags(), 0x10);
}

#[test]
fn swap_nibbles() {
    let mut h = Harness::new(&[0x3e, 0xab, 0xcb, 0x37, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0xba);
    assert_eq!(h.flags(), 0x00);
}

#[test]
fn bit_test_sets_z_and_h() {
    let mut h = Harness::new(&[0x3e, 0x80, 0xcb, 0x7f, 0x10]); // bit 7,a
    h.run_program(0);
    assert_eq!(h.flags(), 0x20, "bit set: H only");

    let mut h = Harness::new(&[0x3e, 0x80, 0xcb, 0x77, 0x10]); // bit 6,a
    h.run_program(0);
    assert_eq!(h.flags(), 0xa0, "bit clear: Z and H");
}

#[test]
fn set_and_res_on_memory_operand() {
    // ld hl,0xc000 ; set 0,(hl) ; ld a,(hl) ; stop
    let mut h = Harness::new(&[0x21, 0x00, 0xc0, 0xcb, 0xc6, 0x7e, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0x01);
    assert_eq!(h.gb_mem(0xc000), 0x01);
}

#[test]
fn rl_through_carry_merges_old_carry() {
    // rl a on 0x80 with C clear: result 0, Z, C out
    let mut h = Harness::new(&[0x3e, 0x80, 0xcb, 0x17, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0x00);
    assert_eq!(h.flags(), 0x90);
}

// ---- branch shapes and fusion ----

#[test]
fn countdown_loop_compiles_to_native_backward_branch() {
    let h = Harness::new(&[0x3e, 0x05, 0x3d, 0x20, 0xfd, 0x10]);
    let block = h.compile(0);
    assert!(block.error.is_none());
    // the fused jr nz at source offset 3 must be a native bne.w,
    // displacement negative
    let off = block.m68k_offsets[3] as usize;
    assert_eq!(block.code[off], 0x66, "bne.w");
    assert_eq!(block.code[off + 1], 0x00);
    assert_ne!(block.code[off + 2] & 0x80, 0, "backward displacement");
    assert!(block.patch_sites.is_empty(), "no chain exits in the loop");
}

#[test]
fn countdown_loop_runs_to_zero() {
    let mut h = Harness::new(&[0x3e, 0x05, 0x3d, 0x20, 0xfd, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0);
    assert_ne!(h.flags() & 0x80, 0, "Z set on loop exit");
}

#[test]
fn fused_compare_skips_flag_materialization_for_the_branch() {
    let code = [0x3e, 0x42, 0xfe, 0x42, 0x28, 0x02, 0x3e, 0x00, 0x10];
    let h = Harness::new(&code);
    let block = h.compile(0);

    // exactly one Z capture (seq d3) in the block, none of the btst-D7
    // form the unfused branch would use
    let bytes = &block.code[..block.len];
    let seqs = bytes.windows(2).filter(|w| *w == [0x57, 0xc3]).count();
    assert_eq!(seqs, 1, "one flag capture for the cp");
    let btsts = bytes.windows(4).filter(|w| *w == [0x08, 0x07, 0x00, 0x07]).count();
    assert_eq!(btsts, 0, "no D7 bit test for the fused branch");
    // the branch itself sits right after the cmp, as a native bcc
    let off = block.m68k_offsets[4] as usize;
    assert_eq!(block.code[off], 0x66, "inverted-condition bne.w over the exit");
}

#[test]
fn fused_branch_takes_the_guest_path() {
    let mut h = Harness::new(&[0x3e, 0x42, 0xfe, 0x42, 0x28, 0x02, 0x3e, 0x00, 0x10]);
    h.run_program(0);
    assert_eq!(h.acc(), 0x42, "ld a,0 skipped by the fused jr z");
}

/// The fusion-safety sweep: for every ALU form that claims fusion, the
/// native instruction at the branch's recorded offset must be a Bcc
/// (nothing CCR-clobbering in between); forms with a trailing swap or a
/// synthesized flag path must fall back to the btst form.
#[test]
fn fusion_claims_match_emitted_shapes() {
    let fused: &[&[u8]] = &[
        &[0x3c],       // inc a
        &[0x3d],       // dec a
        &[0x0d],       // dec c
        &[0x1d],       // dec e
        &[0x2d],       // dec l
        &[0xb8],       // cp b
        &[0xbe],       // cp (hl)
        &[0xfe, 0x05], // cp imm
        &[0x80],       // add a,b
        &[0x91],       // sub a,c
        &[0xa7],       // and a,a
        &[0xb7],       // or a,a
        &[0xad],       // xor a,l
    ];
    let unfused: &[&[u8]] = &[
        &[0x04],       // inc b (swap-wrapped)
        &[0x15],       // dec d
        &[0x24],       // inc h (rotate-wrapped)
        &[0x88],       // adc a,b (synthesized flags)
        &[0x9b],       // sbc a,e
        &[0xce, 0x01], // adc imm
    ];

    for alu in fused {
        let mut code = alu.to_vec();
        let branch_off = code.len() as usize;
        code.extend_from_slice(&[0x28, 0x02, 0x10, 0x00, 0x10]);
        let h = Harness::new(&code);
        let block = h.compile(0);
        let native = block.m68k_offsets[branch_off] as usize;
        assert_eq!(
            block.code[native] & 0xf0,
            0x60,
            "opcode {:02x}: branch must read live CCR",
            alu[0]
        );
    }

    for alu in unfused {
        let mut code = alu.to_vec();
        let branch_off = code.len() as usize;
        code.extend_from_slice(&[0x28, 0x02, 0x10, 0x00, 0x10]);
        let h = Harness::new(&code);
        let block = h.compile(0);
        let native = block.m68k_offsets[branch_off] as usize;
        assert_eq!(
            &block.code[native..native + 2],
            &[0x08, 0x07],
            "opcode {:02x}: branch must test materialized F",
            alu[0]
        );
    }
}

#[test]
fn conditional_branch_false_path_falls_through() {
    // ld a,1 ; cp 2 ; jr z,+2 ; ld b,0x11 ; stop
    let mut h = Harness::new(&[0x3e, 0x01, 0xfe, 0x02, 0x28, 0x02, 0x06, 0x11, 0x10]);
    h.run_program(0);
    assert_eq!(h.d(5) >> 16, 0x11, "fall-through executed");
}

// ---- LY-wait and HALT synthesis ----

#[test]
fn ly_poll_loop_is_synthesized_into_a_wait() {
    let mut h = Harness::new(&[]);
    h.install(0x4000, &[0xf0, 0x44, 0xfe, 0x90, 0x20, 0xfa]);
    let block = h.compile(0x4000);
    assert!(block.error.is_none());
    assert_eq!(block.end_address, 0x4006);
    // no slow-path callout in the synthesized block
    let bytes = &block.code[..block.len];
    assert!(
        !bytes.windows(2).any(|w| w == [0x4e, 0x91]),
        "wait synthesis must not read LY through the callout"
    );

    h.set_frame_cycles(1000);
    let next = h.run_block(&block);
    assert_eq!(next, 0x4006);
    assert_eq!(h.d(2), 144 * 456 - 1000, "cycles until the waited line");
    assert_eq!(h.acc(), 0x90, "A holds the LY the loop waited for");

    // already past the target line: wait wraps into the next frame
    h.set_frame_cycles(66000);
    h.run_block(&block);
    assert_eq!(h.d(2), 70224 + 65664 - 66000);
}

#[test]
fn forward_poll_is_not_synthesized() {
    let mut h = Harness::new(&[]);
    h.install(0x4000, &[0xf0, 0x44, 0xfe, 0x90, 0x20, 0x02, 0x10, 0x00, 0x10]);
    let block = h.compile(0x4000);
    let bytes = &block.code[..block.len];
    assert!(
        bytes.windows(2).any(|w| w == [0x4e, 0x91]),
        "positive displacement keeps the real LY read"
    );
}

#[test]
fn non_ly_port_is_not_synthesized() {
    let mut h = Harness::new(&[]);
    h.install(0, &[0xf0, 0x45, 0xfe, 0x90, 0x20, 0xfa, 0x10]);
    let block = h.compile(0);
    let bytes = &block.code[..block.len];
    assert!(bytes.windows(2).any(|w| w == [0x4e, 0x91]));
}

#[test]
fn halt_sleeps_until_vblank_request() {
    let mut h = Harness::new(&[0x76, 0x00, 0x10]);
    let block = h.compile(0);
    h.set_frame_cycles(0);
    let next = h.run_block(&block);
    assert_eq!(next, 1);
    assert_eq!(h.d(2), 65664);

    // inside vblank already: sleep through to the next frame's vblank
    h.set_frame_cycles(65700);
    h.run_block(&block);
    assert_eq!(h.d(2), 70224 + 65664 - 65700);
}

// ---- whole-driver behavior: chaining, patching, eviction ----

#[test]
fn chain_exit_patches_to_direct_jump_and_eviction_restores_it() {
    // 0x100: inc a ; jp 0x110
    // 0x110: ld hl,0x100 ; jp (hl)   (dispatcher exit keeps the loop
    //                                 interruptible by the cycle budget)
    let mut emu = emulator_with(&[
        0x3c, 0xc3, 0x10, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, // 0x110:
        0x21, 0x00, 0x01, 0xe9,
    ]);

    // First step compiles and runs 0x100; its exit cannot patch yet.
    assert!(emu.step().unwrap());
    let s100 = emu
        .jit
        .cache
        .lookup(&emu.machine.mem, 0x100, 1)
        .expect("block cached");
    // Second step compiles 0x110; the loop then chains natively until the
    // cycle budget forces an exit, patching the 0x100 exit on the way.
    assert!(emu.step().unwrap());
    let s110 = emu
        .jit
        .cache
        .lookup(&emu.machine.mem, 0x110, 1)
        .expect("successor cached");

    let base = emu.jit.cache.slot_addr(s100);
    let target = emu.jit.cache.slot_addr(s110);
    let mut site = None;
    for off in 0..250 {
        if emu.machine.mem.slice(base + off, 2) == &JMP_L[..]
            && emu.machine.mem.read32(base + off + 2) == target
        {
            site = Some(base + off);
            break;
        }
    }
    let site = site.expect("patched JMP.L into the successor");

    let a_before = emu.cpu_state().a;
    assert!(a_before > 1, "the chained loop made progress");

    // Evict the successor; the patch site must revert to the helper call.
    emu.jit.cache.promote(s100);
    assert!(emu.jit.cache.evict_one(&mut emu.machine));
    assert!(emu.jit.cache.lookup(&emu.machine.mem, 0x110, 1).is_none());
    assert_eq!(emu.machine.mem.slice(site, 6), &PATCH_SITE_TEMPLATE);

    // And the loop keeps running correctly on a recompiled successor.
    let compiled_before = emu.jit.blocks_compiled();
    assert!(emu.step().unwrap());
    assert!(emu.step().unwrap());
    assert!(emu.jit.blocks_compiled() > compiled_before);
    assert!(emu.cpu_state().a != a_before, "still making progress");
}

#[test]
fn cache_entries_map_back_to_their_blocks() {
    let mut emu = emulator_with(&[0x3e, 0x05, 0x3d, 0x20, 0xfd, 0xc3, 0x00, 0x01]);
    for _ in 0..10 {
        if !emu.step().unwrap() {
            break;
        }
    }
    let mem = &emu.machine.mem;
    let mut seen = 0;
    for (slot, start, _end, bank) in emu.jit.cache.iter_live() {
        assert_eq!(emu.jit.cache.lookup(mem, start, bank), Some(slot));
        seen += 1;
    }
    assert!(seen >= 1);
}

#[test]
fn sp_duality_survives_hram_stack_traffic() {
    // ld sp,0xfff0 ; ld bc,0x1234 ; push bc ; pop hl ; stop
    let mut emu = emulator_with(&[
        0x31, 0xf0, 0xff, 0x01, 0x34, 0x12, 0xc5, 0xe1, 0x10,
    ]);
    while emu.step().unwrap() {}
    let st = emu.cpu_state();
    assert_eq!(st.hl, 0x1234);
    assert_eq!(st.sp, 0xfff0);
}

#[test]
fn wram_stack_call_and_ret() {
    // ld sp,0xd000 ; call 0x10a ; ld a,0x33 ; stop ; ... 0x10a: ld b,0x22 ; ret
    let mut emu = emulator_with(&[
        0x31, 0x00, 0xd0, 0xcd, 0x0a, 0x01, 0x3e, 0x33, 0x10, 0x00, 0x06, 0x22, 0xc9,
    ]);
    while emu.step().unwrap() {}
    let st = emu.cpu_state();
    assert_eq!(st.a, 0x33);
    assert_eq!(st.b, 0x22);
    assert_eq!(st.sp, 0xd000);
}

#[test]
fn rst_pushes_and_jumps_to_vector() {
    // vector 0x08: ld b,0x66 ; ret -- main: ld a,1 ; rst 08 ; stop
    let mut data = blank_rom(0x00);
    data[0x08] = 0x06;
    data[0x09] = 0x66;
    data[0x0a] = 0xc9;
    let code = [0x3e, 0x01, 0xcf, 0x10];
    data[0x100..0x100 + code.len()].copy_from_slice(&code);
    let mut emu = Emulator::new(Rom::from_bytes(data).unwrap(), Config::default()).unwrap();
    while emu.step().unwrap() {}
    assert_eq!(emu.cpu_state().b, 0x66);
}

#[test]
fn single_instruction_config_still_executes_correctly() {
    let mut config = Config::default();
    config.single_instruction = true;
    let mut data = blank_rom(0x00);
    let code = [0x3e, 0x05, 0x3d, 0x20, 0xfd, 0x10];
    data[0x100..0x100 + code.len()].copy_from_slice(&code);
    let mut emu = Emulator::new(Rom::from_bytes(data).unwrap(), config).unwrap();
    for _ in 0..100 {
        if !emu.step().unwrap() {
            break;
        }
    }
    assert!(emu.halted());
    assert_eq!(emu.cpu_state().a, 0);
}

#[test]
fn cycles_accumulate_monotonically_across_steps() {
    let mut emu = emulator_with(&[0x3e, 0x05, 0x3d, 0x20, 0xfd, 0xc3, 0x00, 0x01]);
    let mut last = 0;
    for _ in 0..5 {
        assert!(emu.step().unwrap());
        let now = emu.dmg.total_cycles();
        assert!(now >= last);
        last = now;
    }
    assert!(last > 0);
}

#[test]
fn unknown_opcode_surfaces_error_and_halts() {
    let mut emu = emulator_with(&[0x00, 0xd3]);
    let err = loop {
        match emu.step() {
            Ok(true) => continue,
            Ok(false) => panic!("expected a translation error"),
            Err(e) => break e,
        }
    };
    assert!(matches!(
        err,
        crate::emulator::EmuError::Jit(super::JitError::UnknownOpcode {
            opcode: 0xd3,
            address: 0x101,
        })
    ));
    assert!(emu.halted());
}
