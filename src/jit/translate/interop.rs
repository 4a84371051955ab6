/*!
Memory access and host-callout emission.

Every guest read/write first tries the inline page-table fast path: index
the table (reached A4-relative) with the high address byte, and if the
page has a flat host mapping, access it directly. MMIO pages and anything
bank-sensitive carry a null entry and fall into the slow path, a call back
into the host through the function-pointer slots in the context.

Slow paths publish the in-flight cycle count to `read_cycles` first so
reads of DIV/LY observe the correct instant, and save D2 around the call
because the host side treats D0-D2 as scratch.

Address is always in D1.w; byte results come back in D0.
*/

use super::super::{
    JIT_CTX_DMG, JIT_CTX_EI_DI, JIT_CTX_READ, JIT_CTX_READ16, JIT_CTX_READ_CYCLES,
    JIT_CTX_READ_PAGES, JIT_CTX_WRITE, JIT_CTX_WRITE16, JIT_CTX_WRITE_PAGES, REG_A_CTX,
    REG_D_CYCLES, REG_D_PC, REG_D_SCRATCH0, REG_D_SCRATCH1,
};
use super::Compiler;

const A_SCRATCH: u8 = 1;

impl Compiler<'_> {
    /// Call the byte-read entry point: dmg_read(dmg, addr) -> D0.
    pub(crate) fn slow_read(&mut self) {
        let b = &mut self.block;
        b.move_l_dn_disp_an(REG_D_CYCLES, JIT_CTX_READ_CYCLES, REG_A_CTX);
        b.push_l_dn(REG_D_CYCLES);
        b.push_w_dn(REG_D_SCRATCH1);
        b.push_l_disp_an(JIT_CTX_DMG, REG_A_CTX);
        b.movea_l_disp_an_an(JIT_CTX_READ, REG_A_CTX, A_SCRATCH);
        b.jsr_ind_an(A_SCRATCH);
        b.addq_l_an(7, 6);
        b.pop_l_dn(REG_D_CYCLES);
    }

    /// Call the byte-write entry point with the value in `val_reg`.
    pub(crate) fn slow_write(&mut self, val_reg: u8) {
        let b = &mut self.block;
        b.move_l_dn_disp_an(REG_D_CYCLES, JIT_CTX_READ_CYCLES, REG_A_CTX);
        b.push_l_dn(REG_D_CYCLES);
        b.push_w_dn(val_reg);
        b.push_w_dn(REG_D_SCRATCH1);
        b.push_l_disp_an(JIT_CTX_DMG, REG_A_CTX);
        b.movea_l_disp_an_an(JIT_CTX_WRITE, REG_A_CTX, A_SCRATCH);
        b.jsr_ind_an(A_SCRATCH);
        b.addq_l_an(7, 8);
        b.pop_l_dn(REG_D_CYCLES);
    }

    fn slow_read16(&mut self) {
        let b = &mut self.block;
        b.move_l_dn_disp_an(REG_D_CYCLES, JIT_CTX_READ_CYCLES, REG_A_CTX);
        b.push_l_dn(REG_D_CYCLES);
        b.push_w_dn(REG_D_SCRATCH1);
        b.push_l_disp_an(JIT_CTX_DMG, REG_A_CTX);
        b.movea_l_disp_an_an(JIT_CTX_READ16, REG_A_CTX, A_SCRATCH);
        b.jsr_ind_an(A_SCRATCH);
        b.addq_l_an(7, 6);
        b.pop_l_dn(REG_D_CYCLES);
    }

    fn slow_write16(&mut self) {
        let b = &mut self.block;
        b.move_l_dn_disp_an(REG_D_CYCLES, JIT_CTX_READ_CYCLES, REG_A_CTX);
        b.push_l_dn(REG_D_CYCLES);
        b.push_w_dn(REG_D_SCRATCH0);
        b.push_w_dn(REG_D_SCRATCH1);
        b.push_l_disp_an(JIT_CTX_DMG, REG_A_CTX);
        b.movea_l_disp_an_an(JIT_CTX_WRITE16, REG_A_CTX, A_SCRATCH);
        b.jsr_ind_an(A_SCRATCH);
        b.addq_l_an(7, 8);
        b.pop_l_dn(REG_D_CYCLES);
    }

    /// Byte read, address in D1.w, result in D0. Inline page-table fast
    /// path with slow-path fallback.
    pub(crate) fn call_read(&mut self) {
        self.block.move_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        self.block.lsr_w_imm(8, REG_D_SCRATCH0);
        self.block.lsl_w_imm(2, REG_D_SCRATCH0);
        self.block
            .movea_l_disp_an_an(JIT_CTX_READ_PAGES, REG_A_CTX, A_SCRATCH);
        self.block
            .movea_l_idx_an_an(A_SCRATCH, REG_D_SCRATCH0, A_SCRATCH);
        self.block.cmpa_w_imm(A_SCRATCH, 0);
        let slow = self.block.len;
        self.block.beq_b(0);
        // page hit
        self.block.move_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        self.block.andi_w_dn(REG_D_SCRATCH0, 0x00ff);
        self.block
            .move_b_idx_an_dn(A_SCRATCH, REG_D_SCRATCH0, REG_D_SCRATCH0);
        let done = self.block.len;
        self.block.bra_b(0);
        self.block.patch_short_branch_to_here(slow);
        self.slow_read();
        self.block.patch_short_branch_to_here(done);
    }

    /// Byte write, address in D1.w, value in `val_reg` (must not be D0).
    pub(crate) fn call_write(&mut self, val_reg: u8) {
        debug_assert_ne!(val_reg, REG_D_SCRATCH0);
        self.block.move_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        self.block.lsr_w_imm(8, REG_D_SCRATCH0);
        self.block.lsl_w_imm(2, REG_D_SCRATCH0);
        self.block
            .movea_l_disp_an_an(JIT_CTX_WRITE_PAGES, REG_A_CTX, A_SCRATCH);
        self.block
            .movea_l_idx_an_an(A_SCRATCH, REG_D_SCRATCH0, A_SCRATCH);
        self.block.cmpa_w_imm(A_SCRATCH, 0);
        let slow = self.block.len;
        self.block.beq_b(0);
        self.block.move_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        self.block.andi_w_dn(REG_D_SCRATCH0, 0x00ff);
        self.block
            .move_b_dn_idx_an(val_reg, A_SCRATCH, REG_D_SCRATCH0);
        let done = self.block.len;
        self.block.bra_b(0);
        self.block.patch_short_branch_to_here(slow);
        self.slow_write(val_reg);
        self.block.patch_short_branch_to_here(done);
    }

    /// 16-bit read, address in D1.w, result in D0.w. A low byte of 0xff
    /// would straddle two pages (both possibly MMIO), so that case always
    /// takes the slow path.
    pub(crate) fn call_read16(&mut self) {
        self.block.move_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        self.block.andi_w_dn(REG_D_SCRATCH0, 0x00ff);
        self.block.cmpi_w_dn(REG_D_SCRATCH0, 0x00ff);
        let slow1 = self.block.len;
        self.block.beq_b(0);
        self.block.move_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        self.block.lsr_w_imm(8, REG_D_SCRATCH0);
        self.block.lsl_w_imm(2, REG_D_SCRATCH0);
        self.block
            .movea_l_disp_an_an(JIT_CTX_READ_PAGES, REG_A_CTX, A_SCRATCH);
        self.block
            .movea_l_idx_an_an(A_SCRATCH, REG_D_SCRATCH0, A_SCRATCH);
        self.block.cmpa_w_imm(A_SCRATCH, 0);
        let slow2 = self.block.len;
        self.block.beq_b(0);
        // low byte then high byte, combined in D0
        self.block.move_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        self.block.andi_w_dn(REG_D_SCRATCH0, 0x00ff);
        self.block
            .move_b_idx_an_dn(A_SCRATCH, REG_D_SCRATCH0, REG_D_PC);
        self.block.addq_w_dn(REG_D_SCRATCH0, 1);
        self.block
            .move_b_idx_an_dn(A_SCRATCH, REG_D_SCRATCH0, REG_D_SCRATCH0);
        self.block.lsl_w_imm(8, REG_D_SCRATCH0);
        self.block.move_b_dn_dn(REG_D_PC, REG_D_SCRATCH0);
        let done = self.block.len;
        self.block.bra_b(0);
        self.block.patch_short_branch_to_here(slow1);
        self.block.patch_short_branch_to_here(slow2);
        self.slow_read16();
        self.block.patch_short_branch_to_here(done);
    }

    /// 16-bit write, address in D1.w, data in D0.w.
    pub(crate) fn call_write16(&mut self) {
        self.block.move_w_dn_dn(REG_D_SCRATCH0, REG_D_PC);
        self.block.move_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        self.block.andi_w_dn(REG_D_SCRATCH0, 0x00ff);
        self.block.cmpi_w_dn(REG_D_SCRATCH0, 0x00ff);
        let slow1 = self.block.len;
        self.block.beq_b(0);
        self.block.move_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        self.block.lsr_w_imm(8, REG_D_SCRATCH0);
        self.block.lsl_w_imm(2, REG_D_SCRATCH0);
        self.block
            .movea_l_disp_an_an(JIT_CTX_WRITE_PAGES, REG_A_CTX, A_SCRATCH);
        self.block
            .movea_l_idx_an_an(A_SCRATCH, REG_D_SCRATCH0, A_SCRATCH);
        self.block.cmpa_w_imm(A_SCRATCH, 0);
        let slow2 = self.block.len;
        self.block.beq_b(0);
        self.block.move_w_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
        self.block.andi_w_dn(REG_D_SCRATCH0, 0x00ff);
        self.block
            .move_b_dn_idx_an(REG_D_PC, A_SCRATCH, REG_D_SCRATCH0);
        self.block.lsr_w_imm(8, REG_D_PC);
        self.block.addq_w_dn(REG_D_SCRATCH0, 1);
        self.block
            .move_b_dn_idx_an(REG_D_PC, A_SCRATCH, REG_D_SCRATCH0);
        let done = self.block.len;
        self.block.bra_b(0);
        self.block.patch_short_branch_to_here(slow1);
        self.block.patch_short_branch_to_here(slow2);
        // restore the data word the fast path consumed
        self.block.move_w_dn_dn(REG_D_PC, REG_D_SCRATCH0);
        self.slow_write16();
        self.block.patch_short_branch_to_here(done);
    }

    /// EI/DI: the host model owns IME and any enable-delay policy.
    pub(crate) fn call_ei_di(&mut self, enabled: bool) {
        let b = &mut self.block;
        b.moveq_dn(REG_D_SCRATCH1, enabled as i8);
        b.push_w_dn(REG_D_SCRATCH1);
        b.push_l_disp_an(JIT_CTX_DMG, REG_A_CTX);
        b.movea_l_disp_an_an(JIT_CTX_EI_DI, REG_A_CTX, A_SCRATCH);
        b.jsr_ind_an(A_SCRATCH);
        b.addq_l_an(7, 6);
    }
}
