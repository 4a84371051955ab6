/*!
8-bit ALU translation and SM83 flag synthesis.

The guest F register lives in D7 with Z/N/H/C at bits 7/6/5/4. After an
operation whose native CCR carries the interesting bits, `scc` captures
them before anything can clobber the CCR, masks them into SM83 positions
and merges into D7. H is only reconstructed where games observably depend
on it (DAA); elsewhere it follows the fixed per-opcode value or is left
best-effort.

Every A-mutating add/subtract first records the pre-op A and the
direction into the context so a following DAA can rebuild the BCD
adjustment.
*/

use super::super::{
    JIT_CTX_DAA_NEG, JIT_CTX_DAA_OLD_A, JIT_CTX_GB_SP, REG_A_CTX, REG_A_HL, REG_D_A, REG_D_BC,
    REG_D_DE, REG_D_F, REG_D_PC, REG_D_SCRATCH0, REG_D_SCRATCH1, F_C, F_H, F_N, F_Z,
};
use super::Compiler;

/// Flag materialization flavor for the instruction that just ran.
#[derive(Clone, Copy)]
pub(crate) enum FlagCapture {
    /// Z from CCR, C preserved from the old F (inc/dec).
    ZKeepC { n: bool },
    /// Z and C from CCR (add/sub/cp family).
    ZC { n: bool },
    /// Z from CCR, N and C cleared (logic ops); `h` is AND's fixed H=1.
    ZOnly { h: bool },
}

impl Compiler<'_> {
    pub(crate) fn emit_capture(&mut self, cap: FlagCapture) {
        let b = &mut self.block;
        match cap {
            FlagCapture::ZKeepC { n } => {
                b.scc(crate::jit::emit::COND_EQ, REG_D_PC);
                b.andi_b_dn(REG_D_PC, F_Z);
                b.andi_b_dn(REG_D_F, F_C);
                b.or_b_dn_dn(REG_D_PC, REG_D_F);
                if n {
                    b.ori_b_dn(REG_D_F, F_N);
                }
            }
            FlagCapture::ZC { n } => {
                b.scc(crate::jit::emit::COND_EQ, REG_D_PC);
                b.scc(crate::jit::emit::COND_CS, REG_D_F);
                b.andi_b_dn(REG_D_PC, F_Z);
                b.andi_b_dn(REG_D_F, F_C);
                b.or_b_dn_dn(REG_D_PC, REG_D_F);
                if n {
                    b.ori_b_dn(REG_D_F, F_N);
                }
            }
            FlagCapture::ZOnly { h } => {
                b.scc(crate::jit::emit::COND_EQ, REG_D_PC);
                b.andi_b_dn(REG_D_PC, F_Z);
                b.move_b_dn_dn(REG_D_PC, REG_D_F);
                if h {
                    b.ori_b_dn(REG_D_F, F_H);
                }
            }
        }
    }

    /// Record pre-op A and direction for a later DAA.
    fn daa_track(&mut self, subtract: bool) {
        let b = &mut self.block;
        b.move_b_dn_disp_an(REG_D_A, JIT_CTX_DAA_OLD_A, REG_A_CTX);
        b.moveq_dn(REG_D_SCRATCH0, subtract as i8);
        b.move_b_dn_disp_an(REG_D_SCRATCH0, JIT_CTX_DAA_NEG, REG_A_CTX);
    }

    /// ADC: 16-bit add of zero-extended operands plus carry-in, so the
    /// carry-out is just bit 8 of the result. Operand in D1.
    fn adc_core(&mut self) {
        self.daa_track(false);
        let b = &mut self.block;
        b.andi_w_dn(REG_D_SCRATCH1, 0x00ff);
        b.moveq_dn(REG_D_SCRATCH0, 0);
        b.move_b_dn_dn(REG_D_A, REG_D_SCRATCH0);
        b.btst_imm_dn(super::super::F_BIT_C, REG_D_F);
        b.beq_b(2);
        b.addq_w_dn(REG_D_SCRATCH0, 1);
        b.add_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        b.move_b_dn_dn(REG_D_SCRATCH0, REG_D_A);
        // Z from the byte result, C from bit 8, N=0
        b.tst_b_dn(REG_D_A);
        b.scc(crate::jit::emit::COND_EQ, REG_D_PC);
        b.andi_b_dn(REG_D_PC, F_Z);
        b.lsr_w_imm(8, REG_D_SCRATCH0);
        b.lsl_b_imm(4, REG_D_SCRATCH0);
        b.move_b_dn_dn(REG_D_PC, REG_D_F);
        b.or_b_dn_dn(REG_D_SCRATCH0, REG_D_F);
    }

    /// SBC: borrow-in is added to the subtrahend; the native borrow out of
    /// the word subtract is the guest carry. Operand in D1.
    fn sbc_core(&mut self) {
        self.daa_track(true);
        let b = &mut self.block;
        b.andi_w_dn(REG_D_SCRATCH1, 0x00ff);
        b.moveq_dn(REG_D_SCRATCH0, 0);
        b.move_b_dn_dn(REG_D_A, REG_D_SCRATCH0);
        b.btst_imm_dn(super::super::F_BIT_C, REG_D_F);
        b.beq_b(2);
        b.addq_w_dn(REG_D_SCRATCH1, 1);
        b.sub_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        b.scc(crate::jit::emit::COND_CS, REG_D_PC);
        b.andi_b_dn(REG_D_PC, F_C);
        b.move_b_dn_dn(REG_D_SCRATCH0, REG_D_A);
        b.tst_b_dn(REG_D_A);
        b.scc(crate::jit::emit::COND_EQ, REG_D_SCRATCH1);
        b.andi_b_dn(REG_D_SCRATCH1, F_Z);
        b.move_b_dn_dn(REG_D_SCRATCH1, REG_D_F);
        b.or_b_dn_dn(REG_D_PC, REG_D_F);
        b.ori_b_dn(REG_D_F, F_N);
    }

    /// Fetch an 8-bit operand (B/C/D/E/H/L/(HL)/A by SM83 encoding) into
    /// D1 without disturbing its home register.
    pub(crate) fn src_to_d1(&mut self, r: u8) {
        match r {
            0 => {
                self.block.move_l_dn_dn(REG_D_BC, REG_D_SCRATCH1);
                self.block.swap(REG_D_SCRATCH1);
            }
            1 => self.block.move_b_dn_dn(REG_D_BC, REG_D_SCRATCH1),
            2 => {
                self.block.move_l_dn_dn(REG_D_DE, REG_D_SCRATCH1);
                self.block.swap(REG_D_SCRATCH1);
            }
            3 => self.block.move_b_dn_dn(REG_D_DE, REG_D_SCRATCH1),
            4 => {
                self.hl_to_d1();
                self.block.rol_w_8(REG_D_SCRATCH1);
            }
            5 => self.hl_to_d1(),
            6 => {
                self.hl_to_d1();
                self.call_read();
                self.block.move_b_dn_dn(REG_D_SCRATCH0, REG_D_SCRATCH1);
            }
            _ => self.block.move_b_dn_dn(REG_D_A, REG_D_SCRATCH1),
        }
    }

    fn inc_dec(&mut self, r: u8, dec: bool) {
        let cap = FlagCapture::ZKeepC { n: dec };
        let step = |c: &mut Compiler, reg: u8| {
            if dec {
                c.block.subq_b_dn(reg, 1);
            } else {
                c.block.addq_b_dn(reg, 1);
            }
        };
        match r {
            1 => {
                // c
                step(self, REG_D_BC);
                self.fuse_or_capture(false, cap);
            }
            3 => {
                step(self, REG_D_DE);
                self.fuse_or_capture(false, cap);
            }
            7 => {
                step(self, REG_D_A);
                self.fuse_or_capture(false, cap);
            }
            0 => {
                // b: the trailing swap rewrites CCR, so no fusion here
                self.block.swap(REG_D_BC);
                step(self, REG_D_BC);
                self.emit_capture(cap);
                self.block.swap(REG_D_BC);
            }
            2 => {
                self.block.swap(REG_D_DE);
                step(self, REG_D_DE);
                self.emit_capture(cap);
                self.block.swap(REG_D_DE);
            }
            4 => {
                self.hl_to_d1();
                self.block.rol_w_8(REG_D_SCRATCH1);
                step(self, REG_D_SCRATCH1);
                self.emit_capture(cap);
                self.block.ror_w_8(REG_D_SCRATCH1);
                self.block.movea_w_dn_an(REG_D_SCRATCH1, REG_A_HL);
            }
            5 => {
                // movea does not touch CCR, so the capture can fuse
                self.hl_to_d1();
                step(self, REG_D_SCRATCH1);
                self.block.movea_w_dn_an(REG_D_SCRATCH1, REG_A_HL);
                self.fuse_or_capture(false, cap);
            }
            _ => {
                // (hl): read-modify-write through the memory paths
                self.hl_to_d1();
                self.call_read();
                step(self, REG_D_SCRATCH0);
                self.emit_capture(cap);
                self.block.move_b_dn_dn(REG_D_SCRATCH0, REG_D_PC);
                self.hl_to_d1();
                self.call_write(REG_D_PC);
            }
        }
    }

    pub(crate) fn compile_rotate_a(&mut self, op: u8) {
        let b = &mut self.block;
        match op {
            0x07 => {
                // rlca
                b.rol_b_imm(1, REG_D_A);
                b.scc(crate::jit::emit::COND_CS, REG_D_F);
                b.andi_b_dn(REG_D_F, F_C);
            }
            0x0f => {
                b.ror_b_imm(1, REG_D_A);
                b.scc(crate::jit::emit::COND_CS, REG_D_F);
                b.andi_b_dn(REG_D_F, F_C);
            }
            0x17 => {
                // rla: old carry becomes bit 0
                b.move_b_dn_dn(REG_D_F, REG_D_SCRATCH1);
                b.andi_b_dn(REG_D_SCRATCH1, F_C);
                b.lsr_b_imm(4, REG_D_SCRATCH1);
                b.lsl_b_imm(1, REG_D_A);
                b.scc(crate::jit::emit::COND_CS, REG_D_F);
                b.andi_b_dn(REG_D_F, F_C);
                b.or_b_dn_dn(REG_D_SCRATCH1, REG_D_A);
            }
            _ => {
                // rra: old carry becomes bit 7
                b.move_b_dn_dn(REG_D_F, REG_D_SCRATCH1);
                b.andi_b_dn(REG_D_SCRATCH1, F_C);
                b.lsl_b_imm(3, REG_D_SCRATCH1);
                b.lsr_b_imm(1, REG_D_A);
                b.scc(crate::jit::emit::COND_CS, REG_D_F);
                b.andi_b_dn(REG_D_F, F_C);
                b.or_b_dn_dn(REG_D_SCRATCH1, REG_D_A);
            }
        }
    }

    /// add hl, rr: 16-bit add via the low words; Z survives, C comes from
    /// the word carry, N clears.
    pub(crate) fn compile_add_hl(&mut self, op: u8) {
        self.block.move_w_an_dn(REG_A_HL, REG_D_SCRATCH0);
        match op {
            0x09 => self.bc_to_d1(),
            0x19 => self.de_to_d1(),
            0x29 => self.hl_to_d1(),
            _ => self
                .block
                .move_w_disp_an_dn(JIT_CTX_GB_SP, REG_A_CTX, REG_D_SCRATCH1),
        }
        let b = &mut self.block;
        b.add_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        b.movea_w_dn_an(REG_D_SCRATCH0, REG_A_HL);
        b.scc(crate::jit::emit::COND_CS, REG_D_PC);
        b.andi_b_dn(REG_D_PC, F_C);
        b.andi_b_dn(REG_D_F, F_Z);
        b.or_b_dn_dn(REG_D_PC, REG_D_F);
    }

    fn compile_daa(&mut self) {
        // Reconstructs the BCD adjust from the saved pre-op A, the saved
        // direction, live C, and the current low nibble.
        self.block
            .move_b_disp_an_dn(JIT_CTX_DAA_OLD_A, REG_A_CTX, REG_D_SCRATCH0);
        self.block.move_b_dn_dn(REG_D_A, REG_D_SCRATCH1);
        self.block.andi_b_dn(REG_D_SCRATCH1, 0x0f);
        self.block
            .move_b_disp_an_dn(JIT_CTX_DAA_NEG, REG_A_CTX, REG_D_PC);
        self.block.tst_b_dn(REG_D_PC);
        let to_sub = self.block.len;
        self.block.bne_w(0);

        // addition: C or A > 0x99 adds 0x60 and sets C
        self.block.btst_imm_dn(super::super::F_BIT_C, REG_D_F);
        self.block.bne_b(6);
        self.block.cmpi_b_dn(REG_D_A, 0x99);
        self.block.bls_b(8);
        self.block.addi_b_dn(REG_D_A, 0x60);
        self.block.ori_b_dn(REG_D_F, F_C);
        // half-carry: result nibble dropped below the pre-op nibble
        self.block.andi_b_dn(REG_D_SCRATCH0, 0x0f);
        self.block
            .cmp_b_dn_dn(REG_D_SCRATCH0, REG_D_SCRATCH1);
        self.block.bhs_b(8);
        self.block.addi_b_dn(REG_D_A, 0x06);
        let fin1 = self.block.len;
        self.block.bra_w(0);
        // no half-carry: a plain nibble overflow still adjusts
        self.block.cmpi_b_dn(REG_D_SCRATCH1, 0x09);
        self.block.bls_b(4);
        self.block.addi_b_dn(REG_D_A, 0x06);
        let fin2 = self.block.len;
        self.block.bra_w(0);

        // subtraction
        self.block.patch_branch_to_here(to_sub);
        self.block.btst_imm_dn(super::super::F_BIT_C, REG_D_F);
        self.block.beq_b(4);
        self.block.subi_b_dn(REG_D_A, 0x60);
        self.block
            .move_b_disp_an_dn(JIT_CTX_DAA_OLD_A, REG_A_CTX, REG_D_SCRATCH0);
        self.block.andi_b_dn(REG_D_SCRATCH0, 0x0f);
        self.block
            .cmp_b_dn_dn(REG_D_SCRATCH0, REG_D_SCRATCH1);
        self.block.bls_b(4);
        self.block.subi_b_dn(REG_D_A, 0x06);

        // finish: Z from A, N and C kept
        self.block.patch_branch_to_here(fin1);
        self.block.patch_branch_to_here(fin2);
        self.block.andi_b_dn(REG_D_F, F_N | F_C);
        self.block.tst_b_dn(REG_D_A);
        self.block.bne_b(4);
        self.block.ori_b_dn(REG_D_F, F_Z);
    }

    /// Everything in the ALU quadrants; returns false for opcodes that
    /// belong to other categories.
    pub(crate) fn compile_alu(&mut self, op: u8) -> bool {
        match op {
            0x04 | 0x05 | 0x0c | 0x0d | 0x14 | 0x15 | 0x1c | 0x1d | 0x24 | 0x25 | 0x2c
            | 0x2d | 0x34 | 0x35 | 0x3c | 0x3d => {
                let r = (op >> 3) & 7;
                self.inc_dec(r, op & 1 == 1);
                true
            }

            0x27 => {
                self.compile_daa();
                true
            }
            0x2f => {
                // cpl
                self.block.not_b(REG_D_A);
                self.block.ori_b_dn(REG_D_F, F_N | F_H);
                true
            }
            0x37 => {
                // scf
                self.block.andi_b_dn(REG_D_F, F_Z);
                self.block.ori_b_dn(REG_D_F, F_C);
                true
            }
            0x3f => {
                // ccf
                self.block.andi_b_dn(REG_D_F, F_Z | F_C);
                self.block.eori_b_dn(F_C, REG_D_F);
                true
            }

            0x80..=0xbf => {
                let r = op & 7;
                match (op >> 3) & 7 {
                    0 => {
                        self.daa_track(false);
                        self.src_to_d1(r);
                        self.block.add_b_dn_dn(REG_D_SCRATCH1, REG_D_A);
                        self.fuse_or_capture(true, FlagCapture::ZC { n: false });
                    }
                    1 => {
                        self.src_to_d1(r);
                        self.adc_core();
                    }
                    2 => {
                        self.daa_track(true);
                        self.src_to_d1(r);
                        self.block.sub_b_dn_dn(REG_D_SCRATCH1, REG_D_A);
                        self.fuse_or_capture(true, FlagCapture::ZC { n: true });
                    }
                    3 => {
                        self.src_to_d1(r);
                        self.sbc_core();
                    }
                    4 => {
                        self.src_to_d1(r);
                        self.block.and_b_dn_dn(REG_D_SCRATCH1, REG_D_A);
                        self.fuse_or_capture(false, FlagCapture::ZOnly { h: true });
                    }
                    5 => {
                        self.src_to_d1(r);
                        self.block.eor_b_dn_dn(REG_D_SCRATCH1, REG_D_A);
                        self.fuse_or_capture(false, FlagCapture::ZOnly { h: false });
                    }
                    6 => {
                        self.src_to_d1(r);
                        self.block.or_b_dn_dn(REG_D_SCRATCH1, REG_D_A);
                        self.fuse_or_capture(false, FlagCapture::ZOnly { h: false });
                    }
                    _ => {
                        self.src_to_d1(r);
                        self.block.cmp_b_dn_dn(REG_D_SCRATCH1, REG_D_A);
                        self.fuse_or_capture(true, FlagCapture::ZC { n: true });
                    }
                }
                true
            }

            0xc6 => {
                self.daa_track(false);
                let v = self.take();
                self.block.addi_b_dn(REG_D_A, v);
                self.fuse_or_capture(true, FlagCapture::ZC { n: false });
                true
            }
            0xce => {
                let v = self.take();
                self.block.move_b_imm_dn(REG_D_SCRATCH1, v);
                self.adc_core();
                true
            }
            0xd6 => {
                self.daa_track(true);
                let v = self.take();
                self.block.subi_b_dn(REG_D_A, v);
                self.fuse_or_capture(true, FlagCapture::ZC { n: true });
                true
            }
            0xde => {
                let v = self.take();
                self.block.move_b_imm_dn(REG_D_SCRATCH1, v);
                self.sbc_core();
                true
            }
            0xe6 => {
                let v = self.take();
                self.block.andi_b_dn(REG_D_A, v);
                self.fuse_or_capture(false, FlagCapture::ZOnly { h: true });
                true
            }
            0xee => {
                let v = self.take();
                self.block.eori_b_dn(v, REG_D_A);
                self.fuse_or_capture(false, FlagCapture::ZOnly { h: false });
                true
            }
            0xf6 => {
                let v = self.take();
                self.block.ori_b_dn(REG_D_A, v);
                self.fuse_or_capture(false, FlagCapture::ZOnly { h: false });
                true
            }
            0xfe => {
                let v = self.take();
                self.block.cmpi_b_dn(REG_D_A, v);
                self.fuse_or_capture(true, FlagCapture::ZC { n: true });
                true
            }

            _ => false,
        }
    }
}
