/*!
SM83 -> 68000 translation. `compile_block` walks guest code from a start
PC, selecting a native sequence per opcode, until a terminator (control
transfer, HALT/STOP, unknown opcode) or the capacity reserve ends the
block.

Organization mirrors the instruction categories: ALU and flag synthesis in
`alu`, control flow and branch fusion in `branches`, CB-prefixed ops in
`cb`, the 8-bit register-move quarter of the opcode map in `loads`, stack
family in `stack`, memory-access and callout sequences in `interop`, the
cycle table plus the idle-loop synthesis in `timing`.
*/

pub mod alu;
pub mod branches;
pub mod cb;
pub mod interop;
pub mod loads;
pub mod stack;
pub mod timing;

use super::block::{BlockError, CodeBlock, CODE_CAPACITY, CODE_RESERVE, MAX_GUEST_INSNS};
use super::{
    CompileCtx, HALT_SENTINEL, JIT_CTX_GB_SP, JIT_CTX_HRAM_BASE, REG_A_CTX, REG_A_HL, REG_A_SP,
    REG_D_A, REG_D_BC, REG_D_DE, REG_D_PC, REG_D_SCRATCH0, REG_D_SCRATCH1,
};

pub struct Compiler<'a> {
    pub block: CodeBlock,
    pub ctx: &'a CompileCtx<'a>,
    start: u16,
    ptr: u16,
    done: bool,
}

pub fn compile_block(start_pc: u16, bank: u8, ctx: &CompileCtx) -> CodeBlock {
    let mut c = Compiler {
        block: CodeBlock::new(start_pc, bank),
        ctx,
        start: start_pc,
        ptr: 0,
        done: false,
    };
    c.run();
    c.block
}

impl<'a> Compiler<'a> {
    fn src(&self, off: u16) -> u8 {
        self.ctx.read(self.start.wrapping_add(off))
    }

    pub(crate) fn take(&mut self) -> u8 {
        let b = self.src(self.ptr);
        self.ptr += 1;
        b
    }

    pub(crate) fn take16(&mut self) -> u16 {
        let lo = self.take() as u16;
        let hi = self.take() as u16;
        hi << 8 | lo
    }

    pub(crate) fn peek(&self, ahead: u16) -> u8 {
        self.src(self.ptr + ahead)
    }

    /// Guest address of the next unconsumed byte.
    pub(crate) fn cur_pc(&self) -> u16 {
        self.start.wrapping_add(self.ptr)
    }

    pub(crate) fn src_offset(&self) -> u16 {
        self.ptr
    }

    pub(crate) fn advance(&mut self, n: u16) {
        self.ptr += n;
    }

    pub(crate) fn finish(&mut self) {
        self.done = true;
    }

    fn run(&mut self) {
        loop {
            if self.block.len > CODE_CAPACITY - CODE_RESERVE
                || self.block.count > MAX_GUEST_INSNS
            {
                // Out of room: chain to a fresh block at the next PC.
                let next = self.cur_pc();
                self.exit_to(next);
                break;
            }

            self.block.note_guest_offset(self.ptr);
            self.block.count += 1;
            let op = self.take();
            if op != 0xcb {
                let cycles = timing::CYCLES[op as usize] as u32;
                self.block.add_cycles(cycles);
            }
            self.instruction(op);
            if self.done {
                break;
            }
            if self.ctx.single_instruction {
                let next = self.cur_pc();
                self.exit_to(next);
                break;
            }
        }
        self.block.end_address = self.cur_pc();
    }

    // ---- shared emission helpers ----

    /// Constant-target block exit. Self-targets go through the dispatcher
    /// (its cycle budget is the only thing that can interrupt a tight
    /// `jr $` style loop); every other target gets a patchable site.
    pub(crate) fn exit_to(&mut self, target: u16) {
        self.block.moveq_dn(REG_D_PC, 0);
        self.block.move_w_imm_dn(REG_D_PC, target);
        if target == self.block.src_address {
            self.block.dispatch_jump();
        } else {
            self.block.patchable_exit();
        }
    }

    /// Fatal exit: report the halt sentinel to the driver.
    pub(crate) fn exit_sentinel(&mut self) {
        self.block.move_l_imm_dn(REG_D_PC, HALT_SENTINEL);
        self.block.rts();
    }

    pub(crate) fn fail(&mut self, opcode: u16) {
        self.block.error = Some(BlockError {
            opcode,
            address: self.cur_pc().wrapping_sub(1),
        });
        self.exit_sentinel();
        self.finish();
    }

    /// Reassemble BC from the split layout into D1.w as 0xBBCC.
    pub(crate) fn bc_to_d1(&mut self) {
        self.block.move_l_dn_dn(REG_D_BC, REG_D_SCRATCH1);
        self.block.lsr_l_imm(8, REG_D_SCRATCH1);
        self.block.move_b_dn_dn(REG_D_BC, REG_D_SCRATCH1);
    }

    pub(crate) fn de_to_d1(&mut self) {
        self.block.move_l_dn_dn(REG_D_DE, REG_D_SCRATCH1);
        self.block.lsr_l_imm(8, REG_D_SCRATCH1);
        self.block.move_b_dn_dn(REG_D_DE, REG_D_SCRATCH1);
    }

    pub(crate) fn hl_to_d1(&mut self) {
        self.block.move_w_an_dn(REG_A_HL, REG_D_SCRATCH1);
    }

    /// ldh a,(n): HRAM is read straight off the base pointer, everything
    /// below 0xFF80 is I/O and goes through the slow callout.
    fn ldh_a_from(&mut self, addr: u8) {
        if addr >= 0x80 {
            self.block
                .movea_l_disp_an_an(JIT_CTX_HRAM_BASE, REG_A_CTX, 1);
            self.block
                .move_b_disp_an_dn((addr - 0x80) as i16, 1, REG_D_A);
        } else {
            self.block.move_w_imm_dn(REG_D_SCRATCH1, 0xff00 + addr as u16);
            self.slow_read();
            self.block.move_b_dn_dn(REG_D_SCRATCH0, REG_D_A);
        }
    }

    fn ldh_a_to(&mut self, addr: u8) {
        if addr >= 0x80 {
            self.block
                .movea_l_disp_an_an(JIT_CTX_HRAM_BASE, REG_A_CTX, 1);
            self.block
                .move_b_dn_disp_an(REG_D_A, (addr - 0x80) as i16, 1);
        } else {
            self.block.move_w_imm_dn(REG_D_SCRATCH1, 0xff00 + addr as u16);
            self.slow_write(REG_D_A);
        }
    }

    fn ld_imm16_split(&mut self, reg: u8) {
        let lo = self.take();
        let hi = self.take();
        self.block.move_l_imm_dn(reg, (hi as u32) << 16);
        self.block.move_w_imm_dn(reg, lo as u16);
    }

    fn ld_hl_imm16(&mut self) {
        let v = self.take16();
        self.block.movea_w_imm(REG_A_HL, v);
    }

    // ---- opcode dispatch ----

    fn instruction(&mut self, op: u8) {
        match op {
            0x00 => {} // nop

            0x01 => self.ld_imm16_split(REG_D_BC),
            0x11 => self.ld_imm16_split(REG_D_DE),
            0x21 => self.ld_hl_imm16(),
            0x31 => self.compile_ld_sp_imm16(),

            0x02 => {
                // ld (bc), a
                self.bc_to_d1();
                self.call_write(REG_D_A);
            }
            0x0a => {
                // ld a, (bc)
                self.bc_to_d1();
                self.call_read();
                self.block.move_b_dn_dn(REG_D_SCRATCH0, REG_D_A);
            }
            0x12 => {
                self.de_to_d1();
                self.call_write(REG_D_A);
            }
            0x1a => {
                self.de_to_d1();
                self.call_read();
                self.block.move_b_dn_dn(REG_D_SCRATCH0, REG_D_A);
            }

            0x03 => {
                // inc bc: sign-extend the low byte so the long increment
                // carries into the split high half exactly at 0xff -> 0x00
                self.block.ext_w(REG_D_BC);
                self.block.addq_l_dn(REG_D_BC, 1);
            }
            0x0b => {
                self.block.ext_w(REG_D_BC);
                self.block.subq_l_dn(REG_D_BC, 1);
            }
            0x13 => {
                self.block.ext_w(REG_D_DE);
                self.block.addq_l_dn(REG_D_DE, 1);
            }
            0x1b => {
                self.block.ext_w(REG_D_DE);
                self.block.subq_l_dn(REG_D_DE, 1);
            }
            0x23 => self.block.addq_w_an(REG_A_HL, 1),
            0x2b => self.block.subq_w_an(REG_A_HL, 1),
            0x33 => {
                self.block.addq_w_an(REG_A_SP, 1);
                self.block.addi_w_disp_an(1, JIT_CTX_GB_SP, REG_A_CTX);
            }
            0x3b => {
                self.block.subq_w_an(REG_A_SP, 1);
                self.block.subi_w_disp_an(1, JIT_CTX_GB_SP, REG_A_CTX);
            }

            0x06 => {
                // ld b, imm
                let v = self.take();
                self.block.swap(REG_D_BC);
                self.block.move_b_imm_dn(REG_D_BC, v);
                self.block.swap(REG_D_BC);
            }
            0x0e => {
                let v = self.take();
                self.block.move_b_imm_dn(REG_D_BC, v);
            }
            0x16 => {
                let v = self.take();
                self.block.swap(REG_D_DE);
                self.block.move_b_imm_dn(REG_D_DE, v);
                self.block.swap(REG_D_DE);
            }
            0x1e => {
                let v = self.take();
                self.block.move_b_imm_dn(REG_D_DE, v);
            }
            0x26 => {
                let v = self.take();
                self.hl_to_d1();
                self.block.rol_w_8(REG_D_SCRATCH1);
                self.block.move_b_imm_dn(REG_D_SCRATCH1, v);
                self.block.ror_w_8(REG_D_SCRATCH1);
                self.block.movea_w_dn_an(REG_D_SCRATCH1, REG_A_HL);
            }
            0x2e => {
                let v = self.take();
                self.hl_to_d1();
                self.block.move_b_imm_dn(REG_D_SCRATCH1, v);
                self.block.movea_w_dn_an(REG_D_SCRATCH1, REG_A_HL);
            }
            0x3e => {
                let v = self.take();
                self.block.moveq_dn(REG_D_A, v as i8);
            }

            0x08 => {
                // ld (nn), sp
                let addr = self.take16();
                self.block.move_w_imm_dn(REG_D_SCRATCH1, addr);
                self.block
                    .move_w_disp_an_dn(JIT_CTX_GB_SP, REG_A_CTX, REG_D_SCRATCH0);
                self.call_write16();
            }

            0x07 | 0x0f | 0x17 | 0x1f => self.compile_rotate_a(op),

            0x09 | 0x19 | 0x29 | 0x39 => self.compile_add_hl(op),

            0x22 => {
                // ld (hl+), a
                self.hl_to_d1();
                self.call_write(REG_D_A);
                self.block.addq_w_an(REG_A_HL, 1);
            }
            0x32 => {
                self.hl_to_d1();
                self.call_write(REG_D_A);
                self.block.subq_w_an(REG_A_HL, 1);
            }
            0x2a => {
                self.hl_to_d1();
                self.call_read();
                self.block.move_b_dn_dn(REG_D_SCRATCH0, REG_D_A);
                self.block.addq_w_an(REG_A_HL, 1);
            }
            0x3a => {
                self.hl_to_d1();
                self.call_read();
                self.block.move_b_dn_dn(REG_D_SCRATCH0, REG_D_A);
                self.block.subq_w_an(REG_A_HL, 1);
            }

            0x36 => {
                // ld (hl), imm
                let v = self.take();
                self.block.move_b_imm_dn(REG_D_PC, v);
                self.hl_to_d1();
                self.call_write(REG_D_PC);
            }

            0x10 => {
                // stop
                self.exit_sentinel();
                self.finish();
            }
            0x76 => {
                let next = self.cur_pc();
                self.compile_halt(next);
                self.finish();
            }

            0x18 => self.compile_jr(),
            0x20 => self.compile_jr_cond(super::F_BIT_Z, false),
            0x28 => self.compile_jr_cond(super::F_BIT_Z, true),
            0x30 => self.compile_jr_cond(super::F_BIT_C, false),
            0x38 => self.compile_jr_cond(super::F_BIT_C, true),

            0xc3 => self.compile_jp(),
            0xc2 => self.compile_jp_cond(super::F_BIT_Z, false),
            0xca => self.compile_jp_cond(super::F_BIT_Z, true),
            0xd2 => self.compile_jp_cond(super::F_BIT_C, false),
            0xda => self.compile_jp_cond(super::F_BIT_C, true),

            0xcd => self.compile_call(),
            0xc4 => self.compile_call_cond(super::F_BIT_Z, false),
            0xcc => self.compile_call_cond(super::F_BIT_Z, true),
            0xd4 => self.compile_call_cond(super::F_BIT_C, false),
            0xdc => self.compile_call_cond(super::F_BIT_C, true),

            0xc9 => self.compile_ret(),
            0xc0 => self.compile_ret_cond(super::F_BIT_Z, false),
            0xc8 => self.compile_ret_cond(super::F_BIT_Z, true),
            0xd0 => self.compile_ret_cond(super::F_BIT_C, false),
            0xd8 => self.compile_ret_cond(super::F_BIT_C, true),
            0xd9 => {
                // reti: interrupts on, then the usual return
                self.call_ei_di(true);
                self.compile_ret();
            }

            0xc7 | 0xcf | 0xd7 | 0xdf | 0xe7 | 0xef | 0xf7 | 0xff => {
                let vector = (op - 0xc7) as u16;
                self.compile_rst(vector);
            }

            0xe9 => self.compile_jp_hl(),

            0xcb => {
                let cb_op = self.take();
                let cycles = timing::cb_cycles(cb_op) as u32;
                self.block.add_cycles(cycles);
                self.compile_cb(cb_op);
            }

            0xe0 => {
                let addr = self.take();
                self.ldh_a_to(addr);
            }
            0xf0 => {
                let addr = self.take();
                if addr == 0x44 && self.try_ly_wait() {
                    return;
                }
                self.ldh_a_from(addr);
            }
            0xe2 => {
                // ld (0xff00+c), a
                self.block.move_w_imm_dn(REG_D_SCRATCH1, 0xff00);
                self.block.or_b_dn_dn(REG_D_BC, REG_D_SCRATCH1);
                self.call_write(REG_D_A);
            }
            0xf2 => {
                self.block.move_w_imm_dn(REG_D_SCRATCH1, 0xff00);
                self.block.or_b_dn_dn(REG_D_BC, REG_D_SCRATCH1);
                self.call_read();
                self.block.move_b_dn_dn(REG_D_SCRATCH0, REG_D_A);
            }

            0xea => {
                let addr = self.take16();
                self.block.move_w_imm_dn(REG_D_SCRATCH1, addr);
                self.call_write(REG_D_A);
            }
            0xfa => {
                let addr = self.take16();
                if addr < 0x8000 {
                    // ROM is immutable at run time: fold the load now
                    let v = self.ctx.read(addr);
                    self.block.moveq_dn(REG_D_A, v as i8);
                } else {
                    self.block.move_w_imm_dn(REG_D_SCRATCH1, addr);
                    self.call_read();
                    self.block.move_b_dn_dn(REG_D_SCRATCH0, REG_D_A);
                }
            }

            0xf3 => self.call_ei_di(false),
            0xfb => self.call_ei_di(true),

            _ => {
                if self.compile_alu(op) {
                    return;
                }
                if self.compile_stack(op) {
                    return;
                }
                if (0x40..=0x7f).contains(&op) && self.compile_load(op) {
                    return;
                }
                self.fail(op as u16);
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::super::{CompileCtx, GuestSource};
    use crate::m68k::{HostMem, Machine};

    struct Flat(Vec<u8>);
    impl GuestSource for Flat {
        fn read_byte(&self, _mem: &HostMem, addr: u16) -> u8 {
            self.0.get(addr as usize).copied().unwrap_or(0)
        }
    }

    fn compile(code: &[u8]) -> super::CodeBlock {
        let machine = Machine::new();
        let src = Flat(code.to_vec());
        let ctx = CompileCtx {
            src: &src,
            mem: &machine.mem,
            wram_base: 0xc000,
            hram_base: 0xff80,
            single_instruction: false,
        };
        super::compile_block(0, 1, &ctx)
    }

    #[test]
    fn ld_a_imm_is_a_single_moveq() {
        let b = compile(&[0x3e, 0x55, 0x10]);
        // cycles, moveq #0x55, then the stop exit
        assert!(b.code[..b.len].windows(2).any(|w| w == [0x78, 0x55]));
        assert!(b.error.is_none());
        assert_eq!(b.end_address, 3);
    }

    #[test]
    fn unknown_opcode_flags_error_with_address() {
        // 0xd3 is unassigned on SM83
        let b = compile(&[0x00, 0xd3]);
        let e = b.error.expect("error");
        assert_eq!(e.opcode, 0xd3);
        assert_eq!(e.address, 1);
    }

    #[test]
    fn compile_is_deterministic() {
        let rom = [0x3e, 0x05, 0x3d, 0x20, 0xfd, 0x10];
        let a = compile(&rom);
        let b = compile(&rom);
        assert_eq!(a.code[..a.len], b.code[..b.len]);
        assert_eq!(a.len, b.len);
    }

    #[test]
    fn rom_immediate_load_is_folded() {
        let mut rom = vec![0xfa, 0x00, 0x10, 0x10]; // ld a,(0x1000); stop
        rom.resize(0x1001, 0);
        rom[0x1000] = 0x77;
        let b = compile(&rom);
        assert!(b.code[..b.len].windows(2).any(|w| w == [0x78, 0x77]));
    }

    #[test]
    fn single_instruction_mode_splits_after_one() {
        let machine = Machine::new();
        let src = Flat(vec![0x3e, 0x55, 0x3e, 0x66, 0x10]);
        let ctx = CompileCtx {
            src: &src,
            mem: &machine.mem,
            wram_base: 0xc000,
            hram_base: 0xff80,
            single_instruction: true,
        };
        let b = super::compile_block(0, 1, &ctx);
        assert_eq!(b.end_address, 2);
        assert_eq!(b.patch_sites.len(), 1, "exit to next pc is patchable");
    }

    #[test]
    fn capacity_pressure_splits_into_chained_block() {
        // lots of `ld (hl), imm` forms: each emits a fat inline write
        let mut rom = Vec::new();
        for _ in 0..40 {
            rom.extend_from_slice(&[0x36, 0xaa]);
        }
        rom.push(0x10);
        let b = compile(&rom);
        assert!(b.error.is_none());
        assert!(b.len <= super::CODE_CAPACITY);
        assert!(b.end_address < rom.len() as u16);
        assert_eq!(b.patch_sites.len(), 1);
    }
}
