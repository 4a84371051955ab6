/*!
The 0x40-0x7F quarter of the opcode map: 8-bit register-to-register
moves, plus the (HL) row and column.

The split BC/DE layout makes most pairs a one- or two-instruction move;
H and L ride through scratch because A2 is an address register. Self-moves
emit nothing.
*/

use super::super::{REG_A_HL, REG_D_A, REG_D_BC, REG_D_DE, REG_D_PC, REG_D_SCRATCH0,
    REG_D_SCRATCH1};
use super::Compiler;

impl Compiler<'_> {
    /// Write D1's low byte into an 8-bit destination register.
    pub(crate) fn d1_to_reg(&mut self, dst: u8) {
        match dst {
            0 => {
                self.block.swap(REG_D_BC);
                self.block.move_b_dn_dn(REG_D_SCRATCH1, REG_D_BC);
                self.block.swap(REG_D_BC);
            }
            1 => self.block.move_b_dn_dn(REG_D_SCRATCH1, REG_D_BC),
            2 => {
                self.block.swap(REG_D_DE);
                self.block.move_b_dn_dn(REG_D_SCRATCH1, REG_D_DE);
                self.block.swap(REG_D_DE);
            }
            3 => self.block.move_b_dn_dn(REG_D_SCRATCH1, REG_D_DE),
            4 => {
                self.block.move_w_an_dn(REG_A_HL, REG_D_SCRATCH0);
                self.block.rol_w_8(REG_D_SCRATCH0);
                self.block.move_b_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
                self.block.ror_w_8(REG_D_SCRATCH0);
                self.block.movea_w_dn_an(REG_D_SCRATCH0, REG_A_HL);
            }
            5 => {
                self.block.move_w_an_dn(REG_A_HL, REG_D_SCRATCH0);
                self.block.move_b_dn_dn(REG_D_SCRATCH1, REG_D_SCRATCH0);
                self.block.movea_w_dn_an(REG_D_SCRATCH0, REG_A_HL);
            }
            _ => self.block.move_b_dn_dn(REG_D_SCRATCH1, REG_D_A),
        }
    }

    pub(crate) fn compile_load(&mut self, op: u8) -> bool {
        let dst = (op >> 3) & 7;
        let src = op & 7;
        debug_assert!(op != 0x76, "halt is not a load");

        if dst == src {
            // ld r, r: nothing to do (cycles already credited)
            return true;
        }

        // C, E and A all sit in the low byte of their host register, so
        // moves among them need no staging.
        let low_byte_home = |r: u8| match r {
            1 => Some(REG_D_BC),
            3 => Some(REG_D_DE),
            7 => Some(REG_D_A),
            _ => None,
        };
        if let (Some(s), Some(d)) = (low_byte_home(src), low_byte_home(dst)) {
            self.block.move_b_dn_dn(s, d);
            return true;
        }

        if dst == 6 {
            // ld (hl), r -- value staged in D3, address in D1
            match src {
                0 => {
                    self.block.move_l_dn_dn(REG_D_BC, REG_D_PC);
                    self.block.swap(REG_D_PC);
                }
                1 => self.block.move_b_dn_dn(REG_D_BC, REG_D_PC),
                2 => {
                    self.block.move_l_dn_dn(REG_D_DE, REG_D_PC);
                    self.block.swap(REG_D_PC);
                }
                3 => self.block.move_b_dn_dn(REG_D_DE, REG_D_PC),
                4 => {
                    self.block.move_w_an_dn(REG_A_HL, REG_D_PC);
                    self.block.rol_w_8(REG_D_PC);
                }
                5 => self.block.move_w_an_dn(REG_A_HL, REG_D_PC),
                _ => self.block.move_b_dn_dn(REG_D_A, REG_D_PC),
            }
            self.hl_to_d1();
            self.call_write(REG_D_PC);
            return true;
        }

        if src == 6 {
            // ld r, (hl)
            self.hl_to_d1();
            self.call_read();
            self.block.move_b_dn_dn(REG_D_SCRATCH0, REG_D_SCRATCH1);
            self.d1_to_reg(dst);
            return true;
        }

        self.src_to_d1(src);
        self.d1_to_reg(dst);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::super::{CompileCtx, GuestSource};
    use crate::m68k::{HostMem, Machine};

    struct Flat(Vec<u8>);
    impl GuestSource for Flat {
        fn read_byte(&self, _mem: &HostMem, addr: u16) -> u8 {
            self.0.get(addr as usize).copied().unwrap_or(0)
        }
    }

    fn compile(code: &[u8]) -> crate::jit::block::CodeBlock {
        let machine = Machine::new();
        let src = Flat(code.to_vec());
        let ctx = CompileCtx {
            src: &src,
            mem: &machine.mem,
            wram_base: 0xc000,
            hram_base: 0xff80,
            single_instruction: false,
        };
        super::super::compile_block(0, 1, &ctx)
    }

    #[test]
    fn self_move_emits_only_cycle_credit() {
        // ld b,b ; stop
        let b = compile(&[0x40, 0x10]);
        // addq.l #4, d2 is the only payload before the stop exit
        assert_eq!(&b.code[..2], &[0x58, 0x82]);
    }

    #[test]
    fn ld_c_a_is_one_move() {
        let b = compile(&[0x4f, 0x10]);
        // addq.l #4, d2 ; move.b d4, d5
        assert_eq!(&b.code[..4], &[0x58, 0x82, 0x1a, 0x04]);
    }

    #[test]
    fn ld_b_a_wraps_in_swaps() {
        let b = compile(&[0x47, 0x10]);
        // addq.l ; move.b d4, d1 ; swap d5 ; move.b d1, d5 ; swap d5
        assert_eq!(
            &b.code[..10],
            &[0x58, 0x82, 0x12, 0x04, 0x48, 0x45, 0x1a, 0x01, 0x48, 0x45]
        );
    }
}
