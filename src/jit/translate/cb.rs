/*!
CB-prefixed opcodes: rotates, shifts, nibble swap, and bit test/clear/set.

All eight operand encodings funnel through one fetch/write-back pair: A is
operated on in place in D4, everything else is staged in D1 (with the
memory form going through the usual read/write paths). Flag capture
happens while the shift's CCR is live, exactly like the ALU page.
*/

use super::super::{REG_D_A, REG_D_F, REG_D_PC, REG_D_SCRATCH0, REG_D_SCRATCH1, F_C, F_H, F_Z};
use super::Compiler;
use crate::jit::emit::{COND_CS, COND_EQ};

impl Compiler<'_> {
    /// Stage the operand; returns the data register the operation should
    /// run on (D4 for A, otherwise D1).
    fn cb_operand(&mut self, r: u8) -> u8 {
        if r == 7 {
            REG_D_A
        } else {
            self.src_to_d1(r);
            REG_D_SCRATCH1
        }
    }

    /// Write D1 back for non-A operands. `r == 7` operated in place.
    fn cb_writeback(&mut self, r: u8) {
        match r {
            6 => {
                self.block.move_b_dn_dn(REG_D_SCRATCH1, REG_D_PC);
                self.hl_to_d1();
                self.call_write(REG_D_PC);
            }
            7 => {}
            _ => self.d1_to_reg(r),
        }
    }

    /// Z and C from the live CCR, N=H=0 (rotates and shifts).
    fn shift_flags(&mut self) {
        let b = &mut self.block;
        b.scc(COND_EQ, REG_D_PC);
        b.scc(COND_CS, REG_D_SCRATCH0);
        b.andi_b_dn(REG_D_PC, F_Z);
        b.andi_b_dn(REG_D_SCRATCH0, F_C);
        b.move_b_dn_dn(REG_D_PC, REG_D_F);
        b.or_b_dn_dn(REG_D_SCRATCH0, REG_D_F);
    }

    /// Z only (nibble swap clears N/H/C).
    fn swap_flags(&mut self) {
        let b = &mut self.block;
        b.scc(COND_EQ, REG_D_PC);
        b.andi_b_dn(REG_D_PC, F_Z);
        b.move_b_dn_dn(REG_D_PC, REG_D_F);
    }

    /// BIT: Z from the tested bit, H=1, C preserved.
    fn bit_flags(&mut self) {
        let b = &mut self.block;
        b.scc(COND_EQ, REG_D_PC);
        b.andi_b_dn(REG_D_PC, F_Z);
        b.andi_b_dn(REG_D_F, F_C);
        b.ori_b_dn(REG_D_F, F_H);
        b.or_b_dn_dn(REG_D_PC, REG_D_F);
    }

    pub(crate) fn compile_cb(&mut self, op: u8) {
        let r = op & 7;
        let n = (op >> 3) & 7;
        match op >> 6 {
            0 => {
                let reg = self.cb_operand(r);
                match n {
                    0 => {
                        // rlc
                        self.block.rol_b_imm(1, reg);
                        self.shift_flags();
                    }
                    1 => {
                        // rrc
                        self.block.ror_b_imm(1, reg);
                        self.shift_flags();
                    }
                    2 => self.rotate_through_carry(reg, true),
                    3 => self.rotate_through_carry(reg, false),
                    4 => {
                        // sla
                        self.block.lsl_b_imm(1, reg);
                        self.shift_flags();
                    }
                    5 => {
                        // sra: sign bit sticks
                        self.block.asr_b_imm(1, reg);
                        self.shift_flags();
                    }
                    6 => {
                        // swap nibbles
                        self.block.ror_b_imm(4, reg);
                        self.swap_flags();
                    }
                    _ => {
                        // srl
                        self.block.lsr_b_imm(1, reg);
                        self.shift_flags();
                    }
                }
                self.cb_writeback(r);
            }
            1 => {
                // bit n, r: no write-back
                let reg = self.cb_operand(r);
                self.block.btst_imm_dn(n, reg);
                self.bit_flags();
            }
            2 => {
                let reg = self.cb_operand(r);
                self.block.bclr_imm_dn(n, reg);
                self.cb_writeback(r);
            }
            _ => {
                let reg = self.cb_operand(r);
                self.block.bset_imm_dn(n, reg);
                self.cb_writeback(r);
            }
        }
    }

    /// RL/RR: the old guest carry rotates in while the shifted-out bit
    /// becomes the new carry; Z reflects the post-rotate value including
    /// the carried-in bit, so the test runs after the merge.
    fn rotate_through_carry(&mut self, reg: u8, left: bool) {
        let b = &mut self.block;
        b.move_b_dn_dn(REG_D_F, REG_D_SCRATCH0);
        b.andi_b_dn(REG_D_SCRATCH0, F_C);
        if left {
            b.lsr_b_imm(4, REG_D_SCRATCH0); // carry -> bit 0
            b.lsl_b_imm(1, reg);
        } else {
            b.lsl_b_imm(3, REG_D_SCRATCH0); // carry -> bit 7
            b.lsr_b_imm(1, reg);
        }
        b.scc(COND_CS, REG_D_PC);
        b.andi_b_dn(REG_D_PC, F_C);
        b.or_b_dn_dn(REG_D_SCRATCH0, reg);
        b.tst_b_dn(reg);
        b.scc(COND_EQ, REG_D_SCRATCH0);
        b.andi_b_dn(REG_D_SCRATCH0, F_Z);
        b.move_b_dn_dn(REG_D_PC, REG_D_F);
        b.or_b_dn_dn(REG_D_SCRATCH0, REG_D_F);
    }
}
