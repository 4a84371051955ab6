/*!
Stack family: push/pop, the `ld sp` forms, and the SP pointer duality.

A3 rides as a native pointer whenever the guest SP sits in WRAM or HRAM
(`sp_adjust` holds guest-minus-host so the real SP is always
reconstructible); otherwise `sp_adjust` is zero and A3 carries the raw
guest value. Pushes write byte-wise through A3 unconditionally; pops check
the mode and fall back to a 16-bit read callout in slow mode. gb_sp in the
context is maintained in lockstep either way.
*/

use super::super::{
    JIT_CTX_GB_SP, JIT_CTX_SP_ADJUST, REG_A_CTX, REG_A_HL, REG_A_SP, REG_D_A, REG_D_BC,
    REG_D_DE, REG_D_F, REG_D_SCRATCH0, REG_D_SCRATCH1, F_C, F_H,
};
use super::Compiler;

impl Compiler<'_> {
    fn push_prologue(&mut self) {
        self.block.subq_w_an(REG_A_SP, 2);
        self.block.subi_w_disp_an(2, JIT_CTX_GB_SP, REG_A_CTX);
    }

    /// Store D1.w to the guest stack, low byte at SP (byte ops, SP may be
    /// odd).
    fn store_d1_at_sp(&mut self) {
        let b = &mut self.block;
        b.move_b_dn_ind_an(REG_D_SCRATCH1, REG_A_SP);
        b.rol_w_8(REG_D_SCRATCH1);
        b.move_b_dn_disp_an(REG_D_SCRATCH1, 1, REG_A_SP);
    }

    /// Load the word at the guest stack top into D1.w and advance SP.
    /// Fast mode reads through A3; slow mode goes through the 16-bit read
    /// callout at gb_sp.
    fn pop_to_d1(&mut self) {
        self.block.tst_l_disp_an(JIT_CTX_SP_ADJUST, REG_A_CTX);
        let to_slow = self.block.len;
        self.block.beq_w(0);
        // fast: byte-wise through the native pointer
        self.block.move_b_disp_an_dn(1, REG_A_SP, REG_D_SCRATCH1);
        self.block.rol_w_8(REG_D_SCRATCH1);
        self.block.move_b_ind_an_dn(REG_A_SP, REG_D_SCRATCH1);
        self.block.addq_w_an(REG_A_SP, 2);
        self.block.addi_w_disp_an(2, JIT_CTX_GB_SP, REG_A_CTX);
        let to_done = self.block.len;
        self.block.bra_w(0);
        // slow: authoritative read at the raw guest SP
        self.block.patch_branch_to_here(to_slow);
        self.block
            .move_w_disp_an_dn(JIT_CTX_GB_SP, REG_A_CTX, REG_D_SCRATCH1);
        self.call_read16();
        self.block.move_w_dn_dn(REG_D_SCRATCH0, REG_D_SCRATCH1);
        self.block.addq_w_an(REG_A_SP, 2);
        self.block.addi_w_disp_an(2, JIT_CTX_GB_SP, REG_A_CTX);
        self.block.patch_branch_to_here(to_done);
    }

    pub(crate) fn compile_stack(&mut self, op: u8) -> bool {
        match op {
            0xc5 => {
                self.push_prologue();
                self.bc_to_d1();
                self.store_d1_at_sp();
            }
            0xd5 => {
                self.push_prologue();
                self.de_to_d1();
                self.store_d1_at_sp();
            }
            0xe5 => {
                self.push_prologue();
                self.hl_to_d1();
                self.store_d1_at_sp();
            }
            0xf5 => {
                // push af: F is the low byte
                self.push_prologue();
                self.block.move_b_dn_ind_an(REG_D_F, REG_A_SP);
                self.block.move_b_dn_disp_an(REG_D_A, 1, REG_A_SP);
            }

            0xc1 => {
                self.pop_to_d1();
                let b = &mut self.block;
                b.move_b_dn_dn(REG_D_SCRATCH1, REG_D_BC);
                b.rol_w_8(REG_D_SCRATCH1);
                b.swap(REG_D_BC);
                b.move_b_dn_dn(REG_D_SCRATCH1, REG_D_BC);
                b.swap(REG_D_BC);
            }
            0xd1 => {
                self.pop_to_d1();
                let b = &mut self.block;
                b.move_b_dn_dn(REG_D_SCRATCH1, REG_D_DE);
                b.rol_w_8(REG_D_SCRATCH1);
                b.swap(REG_D_DE);
                b.move_b_dn_dn(REG_D_SCRATCH1, REG_D_DE);
                b.swap(REG_D_DE);
            }
            0xe1 => {
                self.pop_to_d1();
                self.block.movea_w_dn_an(REG_D_SCRATCH1, REG_A_HL);
            }
            0xf1 => {
                // pop af: the low nibble of F reads back as zero
                self.pop_to_d1();
                let b = &mut self.block;
                b.move_b_dn_dn(REG_D_SCRATCH1, REG_D_F);
                b.andi_b_dn(REG_D_F, 0xf0);
                b.rol_w_8(REG_D_SCRATCH1);
                b.move_b_dn_dn(REG_D_SCRATCH1, REG_D_A);
            }

            0xe8 => {
                // add sp, i8: Z and N clear; H and C come from the
                // unsigned byte add of SP's low byte and the immediate,
                // captured before the stack pointer itself moves
                let off = self.take();
                self.block
                    .move_w_disp_an_dn(JIT_CTX_GB_SP, REG_A_CTX, REG_D_SCRATCH1);
                self.block.addi_b_dn(REG_D_SCRATCH1, off);
                self.block.scc(crate::jit::emit::COND_CS, REG_D_F);
                self.block.andi_b_dn(REG_D_F, F_C);
                // half-carry: low nibbles sum past 0x0f
                self.block
                    .move_w_disp_an_dn(JIT_CTX_GB_SP, REG_A_CTX, REG_D_SCRATCH0);
                self.block.andi_b_dn(REG_D_SCRATCH0, 0x0f);
                self.block.addi_b_dn(REG_D_SCRATCH0, off & 0x0f);
                self.block.cmpi_b_dn(REG_D_SCRATCH0, 0x0f);
                self.block.bls_b(4);
                self.block.ori_b_dn(REG_D_F, F_H);
                // the pointer and gb_sp move together, so the same update
                // serves both SP modes
                self.block
                    .lea_disp_an_an(off as i8 as i16, REG_A_SP, REG_A_SP);
                self.block
                    .addi_w_disp_an(off as i8 as i16, JIT_CTX_GB_SP, REG_A_CTX);
            }
            0xf8 => {
                // ld hl, sp+i8
                let off = self.take() as i8;
                self.block
                    .move_w_disp_an_dn(JIT_CTX_GB_SP, REG_A_CTX, REG_D_SCRATCH0);
                match off {
                    0 => {}
                    1..=8 => self.block.addq_w_dn(REG_D_SCRATCH0, off as u8),
                    -8..=-1 => self.block.subq_w_dn(REG_D_SCRATCH0, off.unsigned_abs()),
                    _ => {
                        self.block.move_w_imm_dn(REG_D_SCRATCH1, off as i16 as u16);
                        self.block.add_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
                    }
                }
                self.block.movea_w_dn_an(REG_D_SCRATCH0, REG_A_HL);
                self.block.moveq_dn(REG_D_F, 0);
            }
            0xf9 => self.compile_ld_sp_hl(),
            _ => return false,
        }
        true
    }

    pub(crate) fn compile_ld_sp_imm16(&mut self) {
        let sp = self.take16();
        self.block.move_w_imm_dn(REG_D_SCRATCH1, sp);
        self.block
            .move_w_dn_disp_an(REG_D_SCRATCH1, JIT_CTX_GB_SP, REG_A_CTX);

        let (base, origin) = if (0xc000..=0xdfff).contains(&sp) {
            (self.ctx.wram_base, 0xc000u32)
        } else if (0xff80..=0xfffe).contains(&sp) {
            (self.ctx.hram_base, 0xff80u32)
        } else {
            // slow mode: A3 carries the raw guest SP, zero-extended
            self.block.moveq_dn(REG_D_SCRATCH1, 0);
            self.block.move_w_imm_dn(REG_D_SCRATCH1, sp);
            self.block.movea_l_dn_an(REG_D_SCRATCH1, REG_A_SP);
            self.block.moveq_dn(REG_D_SCRATCH1, 0);
            self.block
                .move_l_dn_disp_an(REG_D_SCRATCH1, JIT_CTX_SP_ADJUST, REG_A_CTX);
            return;
        };
        let host = base.wrapping_add(sp as u32 - origin);
        let adjust = origin.wrapping_sub(base);
        self.block.movea_l_imm(REG_A_SP, host);
        self.block.move_l_imm_dn(REG_D_SCRATCH1, adjust);
        self.block
            .move_l_dn_disp_an(REG_D_SCRATCH1, JIT_CTX_SP_ADJUST, REG_A_CTX);
    }

    /// ld sp, hl needs the WRAM/HRAM classification at run time.
    fn compile_ld_sp_hl(&mut self) {
        let wram_adjust = 0xc000u32.wrapping_sub(self.ctx.wram_base);
        let hram_adjust = 0xff80u32.wrapping_sub(self.ctx.hram_base);

        self.hl_to_d1();
        self.block
            .move_w_dn_disp_an(REG_D_SCRATCH1, JIT_CTX_GB_SP, REG_A_CTX);

        // high byte in [0xc0, 0xe0) -> WRAM
        self.hl_to_d1();
        self.block.rol_w_8(REG_D_SCRATCH1);
        self.block.subi_b_dn(REG_D_SCRATCH1, 0xc0);
        self.block.cmpi_b_dn(REG_D_SCRATCH1, 0x20);
        let to_hram_check = self.block.len;
        self.block.bcc_w(crate::jit::emit::COND_CC, 0);
        self.sp_from_hl(self.ctx.wram_base.wrapping_sub(0xc000), wram_adjust);
        let to_done = self.block.len;
        self.block.bra_w(0);

        // high byte 0xff -> HRAM
        self.block.patch_branch_to_here(to_hram_check);
        self.hl_to_d1();
        self.block.rol_w_8(REG_D_SCRATCH1);
        self.block.cmpi_b_dn(REG_D_SCRATCH1, 0xff);
        let to_slow = self.block.len;
        self.block.bne_w(0);
        self.sp_from_hl(self.ctx.hram_base.wrapping_sub(0xff80), hram_adjust);
        let to_done2 = self.block.len;
        self.block.bra_w(0);

        // anywhere else: raw guest SP in A3, adjust zero
        self.block.patch_branch_to_here(to_slow);
        self.block.moveq_dn(REG_D_SCRATCH1, 0);
        self.hl_to_d1();
        self.block.movea_l_dn_an(REG_D_SCRATCH1, REG_A_SP);
        self.block.moveq_dn(REG_D_SCRATCH1, 0);
        self.block
            .move_l_dn_disp_an(REG_D_SCRATCH1, JIT_CTX_SP_ADJUST, REG_A_CTX);

        self.block.patch_branch_to_here(to_done);
        self.block.patch_branch_to_here(to_done2);
    }

    /// A3 = region_base + HL (zero-extended; adda.w would sign-extend and
    /// break for addresses past 0x8000), sp_adjust = guest - host.
    fn sp_from_hl(&mut self, biased_base: u32, adjust: u32) {
        let b = &mut self.block;
        b.moveq_dn(REG_D_SCRATCH1, 0);
        b.move_w_an_dn(REG_A_HL, REG_D_SCRATCH1);
        b.movea_l_imm(REG_A_SP, biased_base);
        b.adda_l_dn_an(REG_D_SCRATCH1, REG_A_SP);
        b.move_l_imm_dn(REG_D_SCRATCH1, adjust);
        b.move_l_dn_disp_an(REG_D_SCRATCH1, JIT_CTX_SP_ADJUST, REG_A_CTX);
    }
}
