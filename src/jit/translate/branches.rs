/*!
Control flow: relative and absolute jumps, calls, returns, RST, and the
ALU/branch fusion path.

Backward targets inside the block resolve to native branches against the
source-offset table. Everything else becomes a block exit: constant
targets get a patchable site, dynamic ones (ret, jp (hl)) go through the
dispatcher.

Conditional tests come in two shapes. The standalone form reads the
materialized F register (`btst` on D7). The fused form runs when the ALU
that produced the condition just executed: the native branch consumes the
live CCR directly and the D7 merge is emitted only on the fall-through
path.
*/

use super::super::{JIT_CTX_GB_SP, REG_A_CTX, REG_A_HL, REG_A_SP, REG_D_F, REG_D_PC,
    REG_D_SCRATCH1};
use super::alu::FlagCapture;
use super::Compiler;
use crate::jit::emit::{COND_CC, COND_CS, COND_EQ, COND_NE};

/// 68000 condition code a conditional SM83 opcode maps to when its flags
/// are still live in the CCR. None for non-branch opcodes.
fn fuse_cond(op: u8) -> Option<u8> {
    match op {
        0x20 | 0xc2 | 0xc4 | 0xc0 => Some(COND_NE), // nz
        0x28 | 0xca | 0xcc | 0xc8 => Some(COND_EQ), // z
        0x30 | 0xd2 | 0xd4 | 0xd0 => Some(COND_CC), // nc
        0x38 | 0xda | 0xdc | 0xd8 => Some(COND_CS), // c
        _ => None,
    }
}

impl Compiler<'_> {
    /// Resolve a guest byte offset to a native branch displacement when it
    /// points strictly before the current instruction within this block.
    fn backward_disp(&self, target_off: i32, insn_start: u16) -> Option<i16> {
        if target_off >= 0 && target_off < insn_start as i32 {
            let native = self.block.m68k_offsets[target_off as usize] as i32;
            Some((native - (self.block.len as i32 + 2)) as i16)
        } else {
            None
        }
    }

    fn target_pc(&self, target_off: i32) -> u16 {
        (self.block.src_address as i32).wrapping_add(target_off) as u16
    }

    pub(crate) fn compile_jr(&mut self) {
        let disp = self.take() as i8 as i32;
        let insn_start = self.src_offset() - 2;
        let target_off = self.src_offset() as i32 + disp;
        if let Some(d) = self.backward_disp(target_off, insn_start) {
            self.block.bra_w(d);
            return; // fall-through bytes still belong to this block
        }
        let pc = self.target_pc(target_off);
        self.exit_to(pc);
        self.finish();
    }

    pub(crate) fn compile_jr_cond(&mut self, flag_bit: u8, want_set: bool) {
        let disp = self.take() as i8 as i32;
        let insn_start = self.src_offset() - 2;
        let target_off = self.src_offset() as i32 + disp;

        // btst leaves 68k Z = !bit
        self.block.btst_imm_dn(flag_bit, REG_D_F);
        if let Some(d) = self.backward_disp(target_off, insn_start) {
            let cond = if want_set { COND_NE } else { COND_EQ };
            self.block.bcc_w(cond, d);
            return;
        }
        let skip = if want_set { COND_EQ } else { COND_NE };
        let at = self.block.len;
        self.block.bcc_w(skip, 0);
        let pc = self.target_pc(target_off);
        self.exit_to(pc);
        self.block.patch_branch_to_here(at);
    }

    pub(crate) fn compile_jp(&mut self) {
        let target = self.take16();
        self.exit_to(target);
        self.finish();
    }

    pub(crate) fn compile_jp_cond(&mut self, flag_bit: u8, want_set: bool) {
        let target = self.take16();
        self.block.btst_imm_dn(flag_bit, REG_D_F);
        let skip = if want_set { COND_EQ } else { COND_NE };
        let at = self.block.len;
        self.block.bcc_w(skip, 0);
        self.exit_to(target);
        self.block.patch_branch_to_here(at);
    }

    /// Push a known return address onto the guest stack, byte-wise (the
    /// guest SP may be odd), keeping gb_sp in step with A3.
    fn push_ret_addr(&mut self, ret: u16) {
        let b = &mut self.block;
        b.moveq_dn(REG_D_SCRATCH1, 0);
        b.move_w_imm_dn(REG_D_SCRATCH1, ret);
        b.subq_w_an(REG_A_SP, 2);
        b.subi_w_disp_an(2, JIT_CTX_GB_SP, REG_A_CTX);
        b.move_b_dn_ind_an(REG_D_SCRATCH1, REG_A_SP);
        b.rol_w_8(REG_D_SCRATCH1);
        b.move_b_dn_disp_an(REG_D_SCRATCH1, 1, REG_A_SP);
    }

    pub(crate) fn compile_call(&mut self) {
        let target = self.take16();
        let ret = self.cur_pc();
        self.push_ret_addr(ret);
        self.exit_to(target);
        self.finish();
    }

    pub(crate) fn compile_call_cond(&mut self, flag_bit: u8, want_set: bool) {
        let target = self.take16();
        let ret = self.cur_pc();
        self.block.btst_imm_dn(flag_bit, REG_D_F);
        let skip = if want_set { COND_EQ } else { COND_NE };
        let at = self.block.len;
        self.block.bcc_w(skip, 0);
        self.push_ret_addr(ret);
        self.exit_to(target);
        self.block.patch_branch_to_here(at);
    }

    pub(crate) fn compile_rst(&mut self, vector: u16) {
        let ret = self.cur_pc();
        self.push_ret_addr(ret);
        self.exit_to(vector);
        self.finish();
    }

    /// Pop the return address into D3 (low byte first; the guest SP may
    /// be odd, so no word access) and hand it to the dispatcher.
    fn ret_sequence(&mut self) {
        let b = &mut self.block;
        b.moveq_dn(REG_D_PC, 0);
        b.move_b_disp_an_dn(1, REG_A_SP, REG_D_PC);
        b.rol_w_8(REG_D_PC);
        b.move_b_ind_an_dn(REG_A_SP, REG_D_PC);
        b.addq_w_an(REG_A_SP, 2);
        b.addi_w_disp_an(2, JIT_CTX_GB_SP, REG_A_CTX);
        b.dispatch_jump();
    }

    pub(crate) fn compile_ret(&mut self) {
        self.ret_sequence();
        self.finish();
    }

    pub(crate) fn compile_ret_cond(&mut self, flag_bit: u8, want_set: bool) {
        self.block.btst_imm_dn(flag_bit, REG_D_F);
        let skip = if want_set { COND_EQ } else { COND_NE };
        let at = self.block.len;
        self.block.bcc_w(skip, 0);
        self.ret_sequence();
        self.block.patch_branch_to_here(at);
    }

    /// Fuse the just-emitted ALU's live CCR with a following conditional
    /// branch, or fall back to materializing flags into D7. The capture
    /// still runs on the fall-through path so F is usable downstream;
    /// the taken path leaves F stale by design.
    pub(crate) fn fuse_or_capture(&mut self, allow_carry: bool, cap: FlagCapture) {
        if let Some(cond) = fuse_cond(self.peek(0)) {
            let uses_carry = cond == COND_CS || cond == COND_CC;
            if allow_carry || !uses_carry {
                self.block.note_guest_offset(self.src_offset());
                self.block.count += 1;
                let op = self.take();
                self.fused_branch(op, cond);
                self.emit_capture(cap);
                return;
            }
        }
        self.emit_capture(cap);
    }

    fn fused_branch(&mut self, op: u8, cond: u8) {
        match op {
            0x20 | 0x28 | 0x30 | 0x38 => {
                let disp = self.take() as i8 as i32;
                let insn_start = self.src_offset() - 2;
                let target_off = self.src_offset() as i32 + disp;
                if let Some(d) = self.backward_disp(target_off, insn_start) {
                    self.block.bcc_w(cond, d);
                    return;
                }
                let at = self.block.len;
                self.block.bcc_w(cond ^ 1, 0);
                let pc = self.target_pc(target_off);
                self.exit_to(pc);
                self.block.patch_branch_to_here(at);
            }
            0xc2 | 0xca | 0xd2 | 0xda => {
                let target = self.take16();
                let at = self.block.len;
                self.block.bcc_w(cond ^ 1, 0);
                self.exit_to(target);
                self.block.patch_branch_to_here(at);
            }
            0xc4 | 0xcc | 0xd4 | 0xdc => {
                let target = self.take16();
                let ret = self.cur_pc();
                let at = self.block.len;
                self.block.bcc_w(cond ^ 1, 0);
                self.push_ret_addr(ret);
                self.exit_to(target);
                self.block.patch_branch_to_here(at);
            }
            _ => {
                // ret cc
                let at = self.block.len;
                self.block.bcc_w(cond ^ 1, 0);
                self.ret_sequence();
                self.block.patch_branch_to_here(at);
            }
        }
    }

    /// jp (hl): dynamic target through the dispatcher (also used by the
    /// main dispatch table).
    pub(crate) fn compile_jp_hl(&mut self) {
        self.block.moveq_dn(REG_D_PC, 0);
        self.block.move_w_an_dn(REG_A_HL, REG_D_PC);
        self.block.dispatch_jump();
        self.finish();
    }
}
