/*!
68000 interpreter covering the instruction forms the recompiler emits,
plus the hand-assembled dispatcher and patch-helper stubs.

This is not a general-purpose 68k core: effective-address coverage and the
opcode matrix are exactly wide enough for the code generator's output, and
anything outside that surfaces as `IllegalInstruction` rather than being
guessed at. Flag behavior, address-register sizing rules (word operations
on An touch all 32 bits, `movea.w` sign-extends), byte quirks on A7, and
big-endian operand layout follow the processor manual, because generated
code depends on them (`swap` setting CCR is what makes branch fusion
safety observable, for example).
*/

use super::{ExecError, Machine};

pub const CCR_C: u8 = 0x01;
pub const CCR_V: u8 = 0x02;
pub const CCR_Z: u8 = 0x04;
pub const CCR_N: u8 = 0x08;
pub const CCR_X: u8 = 0x10;

/// Register file and condition codes.
pub struct Cpu {
    pub d: [u32; 8],
    pub a: [u32; 8],
    pub pc: u32,
    pub ccr: u8,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            d: [0; 8],
            a: [0; 8],
            pc: 0,
            ccr: 0,
        }
    }

    #[inline]
    fn flag(&self, bit: u8) -> bool {
        self.ccr & bit != 0
    }

    /// Condition-code predicate, full 68000 table.
    fn cond(&self, code: u16) -> bool {
        let c = self.flag(CCR_C);
        let v = self.flag(CCR_V);
        let z = self.flag(CCR_Z);
        let n = self.flag(CCR_N);
        match code {
            0x0 => true,         // t
            0x1 => false,        // f
            0x2 => !c && !z,     // hi
            0x3 => c || z,       // ls
            0x4 => !c,           // cc
            0x5 => c,            // cs
            0x6 => !z,           // ne
            0x7 => z,            // eq
            0x8 => !v,           // vc
            0x9 => v,            // vs
            0xa => !n,           // pl
            0xb => n,            // mi
            0xc => n == v,       // ge
            0xd => n != v,       // lt
            0xe => !z && n == v, // gt
            _ => z || n != v,    // le
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Size {
    Byte,
    Word,
    Long,
}

impl Size {
    #[inline]
    fn bytes(self) -> u32 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Long => 4,
        }
    }

    #[inline]
    fn mask(self) -> u32 {
        match self {
            Size::Byte => 0xff,
            Size::Word => 0xffff,
            Size::Long => 0xffff_ffff,
        }
    }

    #[inline]
    fn msb(self) -> u32 {
        match self {
            Size::Byte => 0x80,
            Size::Word => 0x8000,
            Size::Long => 0x8000_0000,
        }
    }

    /// Size field as used by the immediate/tst/addq groups (00/01/10).
    fn from_bits(bits: u16) -> Option<Size> {
        match bits {
            0 => Some(Size::Byte),
            1 => Some(Size::Word),
            2 => Some(Size::Long),
            _ => None,
        }
    }
}

#[derive(Clone, Copy)]
enum Alu {
    Or,
    Sub,
    And,
    Add,
}

impl Machine {
    #[inline]
    fn fetch16(&mut self) -> u16 {
        let w = self.mem.read16(self.cpu.pc);
        self.cpu.pc = self.cpu.pc.wrapping_add(2);
        w
    }

    #[inline]
    fn fetch32(&mut self) -> u32 {
        let l = self.mem.read32(self.cpu.pc);
        self.cpu.pc = self.cpu.pc.wrapping_add(4);
        l
    }

    pub(crate) fn step(&mut self) -> Result<(), ExecError> {
        let ipc = self.cpu.pc;
        let op = self.fetch16();
        match op >> 12 {
            0x0 => self.group_imm_bit(ipc, op),
            0x1 => self.op_move(ipc, op, Size::Byte),
            0x2 => self.op_move(ipc, op, Size::Long),
            0x3 => self.op_move(ipc, op, Size::Word),
            0x4 => self.group_misc(ipc, op),
            0x5 => self.group_quick_scc(ipc, op),
            0x6 => self.op_bcc(op),
            0x7 => self.op_moveq(ipc, op),
            0x8 => self.group_alu(ipc, op, Alu::Or),
            0x9 => self.group_alu(ipc, op, Alu::Sub),
            // Line-A trap: the only one generated code contains is the
            // cache-flush call after a patch write, which an interpreter
            // does not need. Treated as a two-byte no-op.
            0xa => Ok(()),
            0xb => self.group_cmp_eor(ipc, op),
            0xc => self.group_alu(ipc, op, Alu::And),
            0xd => self.group_alu(ipc, op, Alu::Add),
            0xe => self.group_shift(ipc, op),
            _ => Err(ExecError::IllegalInstruction { pc: ipc, opcode: op }),
        }
    }

    // ---- effective addresses ----

    /// Compute the address for a memory-destination/source EA, consuming
    /// extension words and applying postincrement/predecrement.
    fn ea_address(&mut self, ipc: u32, op: u16, mode: u16, reg: u16, size: Size) -> Result<u32, ExecError> {
        let r = reg as usize;
        match mode {
            2 => Ok(self.cpu.a[r]),
            3 => {
                let addr = self.cpu.a[r];
                let delta = if reg == 7 && size == Size::Byte { 2 } else { size.bytes() };
                self.cpu.a[r] = addr.wrapping_add(delta);
                Ok(addr)
            }
            4 => {
                let delta = if reg == 7 && size == Size::Byte { 2 } else { size.bytes() };
                self.cpu.a[r] = self.cpu.a[r].wrapping_sub(delta);
                Ok(self.cpu.a[r])
            }
            5 => {
                let disp = self.fetch16() as i16 as i32;
                Ok(self.cpu.a[r].wrapping_add(disp as u32))
            }
            6 => {
                let ext = self.fetch16();
                let xr = ((ext >> 12) & 7) as usize;
                let index_raw = if ext & 0x8000 != 0 { self.cpu.a[xr] } else { self.cpu.d[xr] };
                let index = if ext & 0x0800 != 0 {
                    index_raw
                } else {
                    index_raw as u16 as i16 as i32 as u32
                };
                let disp = ext as u8 as i8 as i32;
                Ok(self.cpu.a[r].wrapping_add(disp as u32).wrapping_add(index))
            }
            7 => match reg {
                0 => Ok(self.fetch16() as i16 as i32 as u32),
                1 => Ok(self.fetch32()),
                _ => Err(ExecError::IllegalInstruction { pc: ipc, opcode: op }),
            },
            _ => Err(ExecError::IllegalInstruction { pc: ipc, opcode: op }),
        }
    }

    fn mem_read_sized(&self, addr: u32, size: Size) -> u32 {
        match size {
            Size::Byte => self.mem.read8(addr) as u32,
            Size::Word => self.mem.read16(addr) as u32,
            Size::Long => self.mem.read32(addr),
        }
    }

    fn mem_write_sized(&mut self, addr: u32, value: u32, size: Size) {
        match size {
            Size::Byte => self.mem.write8(addr, value as u8),
            Size::Word => self.mem.write16(addr, value as u16),
            Size::Long => self.mem.write32(addr, value),
        }
    }

    /// Read a source operand.
    fn ea_read(&mut self, ipc: u32, op: u16, mode: u16, reg: u16, size: Size) -> Result<u32, ExecError> {
        match mode {
            0 => Ok(self.cpu.d[reg as usize] & size.mask()),
            1 => match size {
                Size::Byte => Err(ExecError::IllegalInstruction { pc: ipc, opcode: op }),
                _ => Ok(self.cpu.a[reg as usize] & size.mask()),
            },
            7 if reg == 4 => Ok(match size {
                Size::Byte => self.fetch16() as u32 & 0xff,
                Size::Word => self.fetch16() as u32,
                Size::Long => self.fetch32(),
            }),
            _ => {
                let addr = self.ea_address(ipc, op, mode, reg, size)?;
                Ok(self.mem_read_sized(addr, size))
            }
        }
    }

    #[inline]
    fn write_dreg(&mut self, reg: u16, value: u32, size: Size) {
        let r = reg as usize;
        let m = size.mask();
        self.cpu.d[r] = (self.cpu.d[r] & !m) | (value & m);
    }

    // ---- flags ----

    #[inline]
    fn set_flag(&mut self, bit: u8, on: bool) {
        if on {
            self.cpu.ccr |= bit;
        } else {
            self.cpu.ccr &= !bit;
        }
    }

    fn set_nz(&mut self, result: u32, size: Size) {
        let r = result & size.mask();
        self.set_flag(CCR_Z, r == 0);
        self.set_flag(CCR_N, r & size.msb() != 0);
    }

    /// N/Z from the result, V and C cleared (moves, logic ops, tst...).
    fn set_logic_flags(&mut self, result: u32, size: Size) {
        self.set_nz(result, size);
        self.set_flag(CCR_V, false);
        self.set_flag(CCR_C, false);
    }

    fn set_add_flags(&mut self, dst: u32, src: u32, result: u32, size: Size) {
        let m = size.msb();
        let carry = ((src & dst) | ((src | dst) & !result)) & m != 0;
        let overflow = ((src ^ result) & (dst ^ result)) & m != 0;
        self.set_nz(result, size);
        self.set_flag(CCR_C, carry);
        self.set_flag(CCR_X, carry);
        self.set_flag(CCR_V, overflow);
    }

    /// Flags for `dst - src`; `cmp` uses this without touching X.
    fn set_sub_flags(&mut self, dst: u32, src: u32, result: u32, size: Size, with_x: bool) {
        let m = size.msb();
        let borrow = ((src & !dst) | ((src | !dst) & result)) & m != 0;
        let overflow = ((src ^ dst) & (result ^ dst)) & m != 0;
        self.set_nz(result, size);
        self.set_flag(CCR_C, borrow);
        if with_x {
            self.set_flag(CCR_X, borrow);
        }
        self.set_flag(CCR_V, overflow);
    }

    // ---- opcode groups ----

    fn group_imm_bit(&mut self, ipc: u32, op: u16) -> Result<(), ExecError> {
        if op & 0x0f00 == 0x0800 {
            return self.op_bit_static(ipc, op);
        }
        let sel = (op >> 9) & 7;
        let size = Size::from_bits((op >> 6) & 3)
            .ok_or(ExecError::IllegalInstruction { pc: ipc, opcode: op })?;
        let imm = match size {
            Size::Byte => self.fetch16() as u32 & 0xff,
            Size::Word => self.fetch16() as u32,
            Size::Long => self.fetch32(),
        };
        let mode = (op >> 3) & 7;
        let reg = op & 7;

        // Read-modify-write on the destination EA.
        let (dst, addr) = if mode == 0 {
            (self.cpu.d[reg as usize] & size.mask(), None)
        } else {
            let a = self.ea_address(ipc, op, mode, reg, size)?;
            (self.mem_read_sized(a, size), Some(a))
        };

        let mut write_back = true;
        let result = match sel {
            0 => {
                // ori
                let r = dst | imm;
                self.set_logic_flags(r, size);
                r
            }
            1 => {
                // andi
                let r = dst & imm;
                self.set_logic_flags(r, size);
                r
            }
            2 => {
                // subi
                let r = dst.wrapping_sub(imm) & size.mask();
                self.set_sub_flags(dst, imm, r, size, true);
                r
            }
            3 => {
                // addi
                let r = dst.wrapping_add(imm) & size.mask();
                self.set_add_flags(dst, imm, r, size);
                r
            }
            5 => {
                // eori
                let r = dst ^ imm;
                self.set_logic_flags(r, size);
                r
            }
            6 => {
                // cmpi
                let r = dst.wrapping_sub(imm) & size.mask();
                self.set_sub_flags(dst, imm, r, size, false);
                write_back = false;
                r
            }
            _ => return Err(ExecError::IllegalInstruction { pc: ipc, opcode: op }),
        };

        if write_back {
            match addr {
                None => self.write_dreg(reg, result, size),
                Some(a) => self.mem_write_sized(a, result, size),
            }
        }
        Ok(())
    }

    /// btst/bchg/bclr/bset with a static bit number.
    fn op_bit_static(&mut self, ipc: u32, op: u16) -> Result<(), ExecError> {
        let kind = (op >> 6) & 3;
        let bitnum = self.fetch16() as u32;
        let mode = (op >> 3) & 7;
        let reg = op & 7;
        if mode == 0 {
            let bit = 1u32 << (bitnum & 31);
            let r = reg as usize;
            self.set_flag(CCR_Z, self.cpu.d[r] & bit == 0);
            match kind {
                0 => {}
                1 => self.cpu.d[r] ^= bit,
                2 => self.cpu.d[r] &= !bit,
                _ => self.cpu.d[r] |= bit,
            }
            Ok(())
        } else {
            let bit = 1u32 << (bitnum & 7);
            let addr = self.ea_address(ipc, op, mode, reg, Size::Byte)?;
            let v = self.mem.read8(addr) as u32;
            self.set_flag(CCR_Z, v & bit == 0);
            let new = match kind {
                0 => return Ok(()),
                1 => v ^ bit,
                2 => v & !bit,
                _ => v | bit,
            };
            self.mem.write8(addr, new as u8);
            Ok(())
        }
    }

    fn op_move(&mut self, ipc: u32, op: u16, size: Size) -> Result<(), ExecError> {
        let src_mode = (op >> 3) & 7;
        let src_reg = op & 7;
        let dst_reg = (op >> 9) & 7;
        let dst_mode = (op >> 6) & 7;

        let value = self.ea_read(ipc, op, src_mode, src_reg, size)?;

        if dst_mode == 1 {
            // movea: word source sign-extends, flags untouched
            let v = match size {
                Size::Word => value as u16 as i16 as i32 as u32,
                Size::Long => value,
                Size::Byte => {
                    return Err(ExecError::IllegalInstruction { pc: ipc, opcode: op })
                }
            };
            self.cpu.a[dst_reg as usize] = v;
            return Ok(());
        }

        if dst_mode == 0 {
            self.write_dreg(dst_reg, value, size);
        } else {
            let addr = self.ea_address(ipc, op, dst_mode, dst_reg, size)?;
            self.mem_write_sized(addr, value, size);
        }
        self.set_logic_flags(value, size);
        Ok(())
    }

    fn group_misc(&mut self, ipc: u32, op: u16) -> Result<(), ExecError> {
        if op & 0xfff8 == 0x4840 {
            // swap
            let r = (op & 7) as usize;
            let v = self.cpu.d[r].rotate_left(16);
            self.cpu.d[r] = v;
            self.set_logic_flags(v, Size::Long);
            return Ok(());
        }
        if op & 0xfff8 == 0x4880 {
            // ext.w
            let v = self.cpu.d[(op & 7) as usize] as u8 as i8 as i16 as u16;
            self.write_dreg(op & 7, v as u32, Size::Word);
            self.set_logic_flags(v as u32, Size::Word);
            return Ok(());
        }
        if op & 0xfff8 == 0x48c0 {
            // ext.l
            let r = (op & 7) as usize;
            let v = self.cpu.d[r] as u16 as i16 as i32 as u32;
            self.cpu.d[r] = v;
            self.set_logic_flags(v, Size::Long);
            return Ok(());
        }
        if op & 0xff00 == 0x4600 {
            // not
            let size = Size::from_bits((op >> 6) & 3)
                .ok_or(ExecError::IllegalInstruction { pc: ipc, opcode: op })?;
            let mode = (op >> 3) & 7;
            let reg = op & 7;
            if mode == 0 {
                let r = !self.cpu.d[reg as usize] & size.mask();
                self.write_dreg(reg, r, size);
                self.set_logic_flags(r, size);
            } else {
                let addr = self.ea_address(ipc, op, mode, reg, size)?;
                let r = !self.mem_read_sized(addr, size) & size.mask();
                self.mem_write_sized(addr, r, size);
                self.set_logic_flags(r, size);
            }
            return Ok(());
        }
        if op & 0xff00 == 0x4200 {
            // clr
            let size = Size::from_bits((op >> 6) & 3)
                .ok_or(ExecError::IllegalInstruction { pc: ipc, opcode: op })?;
            let mode = (op >> 3) & 7;
            let reg = op & 7;
            if mode == 0 {
                self.write_dreg(reg, 0, size);
            } else {
                let addr = self.ea_address(ipc, op, mode, reg, size)?;
                self.mem_write_sized(addr, 0, size);
            }
            self.set_logic_flags(0, size);
            return Ok(());
        }
        if op & 0xff00 == 0x4a00 {
            // tst
            let size = Size::from_bits((op >> 6) & 3)
                .ok_or(ExecError::IllegalInstruction { pc: ipc, opcode: op })?;
            let v = self.ea_read(ipc, op, (op >> 3) & 7, op & 7, size)?;
            self.set_logic_flags(v, size);
            return Ok(());
        }
        if op & 0xf1c0 == 0x41c0 {
            // lea
            let mode = (op >> 3) & 7;
            let reg = op & 7;
            // lea never adjusts An, so postinc/predec modes are invalid
            if mode == 3 || mode == 4 || mode < 2 {
                return Err(ExecError::IllegalInstruction { pc: ipc, opcode: op });
            }
            let addr = self.ea_address(ipc, op, mode, reg, Size::Long)?;
            self.cpu.a[((op >> 9) & 7) as usize] = addr;
            return Ok(());
        }
        match op {
            0x4e71 => Ok(()), // nop
            0x4e75 => {
                // rts
                let sp = self.cpu.a[7];
                self.cpu.pc = self.mem.read32(sp);
                self.cpu.a[7] = sp.wrapping_add(4);
                Ok(())
            }
            0x4eb9 => {
                // jsr abs.l
                let target = self.fetch32();
                self.push32_ret();
                self.cpu.pc = target;
                Ok(())
            }
            0x4ef9 => {
                // jmp abs.l
                self.cpu.pc = self.fetch32();
                Ok(())
            }
            _ if op & 0xfff8 == 0x4e90 => {
                // jsr (an)
                let target = self.cpu.a[(op & 7) as usize];
                self.push32_ret();
                self.cpu.pc = target;
                Ok(())
            }
            _ if op & 0xfff8 == 0x4ed0 => {
                // jmp (an)
                self.cpu.pc = self.cpu.a[(op & 7) as usize];
                Ok(())
            }
            _ => Err(ExecError::IllegalInstruction { pc: ipc, opcode: op }),
        }
    }

    fn push32_ret(&mut self) {
        self.cpu.a[7] = self.cpu.a[7].wrapping_sub(4);
        let sp = self.cpu.a[7];
        let pc = self.cpu.pc;
        self.mem.write32(sp, pc);
    }

    fn group_quick_scc(&mut self, ipc: u32, op: u16) -> Result<(), ExecError> {
        if op & 0x00c0 == 0x00c0 {
            // scc (dbcc, which uses address mode 1 here, is not generated)
            let mode = (op >> 3) & 7;
            if mode != 0 {
                return Err(ExecError::IllegalInstruction { pc: ipc, opcode: op });
            }
            let value = if self.cpu.cond((op >> 8) & 0xf) { 0xff } else { 0x00 };
            self.write_dreg(op & 7, value, Size::Byte);
            return Ok(());
        }
        let data = {
            let d = (op >> 9) & 7;
            if d == 0 {
                8
            } else {
                d as u32
            }
        };
        let subtract = op & 0x0100 != 0;
        let size = Size::from_bits((op >> 6) & 3)
            .ok_or(ExecError::IllegalInstruction { pc: ipc, opcode: op })?;
        let mode = (op >> 3) & 7;
        let reg = op & 7;

        if mode == 1 {
            // address register: whole register, no condition codes
            let r = reg as usize;
            self.cpu.a[r] = if subtract {
                self.cpu.a[r].wrapping_sub(data)
            } else {
                self.cpu.a[r].wrapping_add(data)
            };
            return Ok(());
        }

        let (dst, addr) = if mode == 0 {
            (self.cpu.d[reg as usize] & size.mask(), None)
        } else {
            let a = self.ea_address(ipc, op, mode, reg, size)?;
            (self.mem_read_sized(a, size), Some(a))
        };
        let result = if subtract {
            let r = dst.wrapping_sub(data) & size.mask();
            self.set_sub_flags(dst, data, r, size, true);
            r
        } else {
            let r = dst.wrapping_add(data) & size.mask();
            self.set_add_flags(dst, data, r, size);
            r
        };
        match addr {
            None => self.write_dreg(reg, result, size),
            Some(a) => self.mem_write_sized(a, result, size),
        }
        Ok(())
    }

    fn op_bcc(&mut self, op: u16) -> Result<(), ExecError> {
        let cond = (op >> 8) & 0xf;
        let disp8 = op as u8;
        let base = self.cpu.pc;
        let target = if disp8 == 0 {
            let d = self.fetch16() as i16 as i32;
            base.wrapping_add(d as u32)
        } else {
            base.wrapping_add(disp8 as i8 as i32 as u32)
        };
        if cond == 1 {
            // bsr
            self.push32_ret();
            self.cpu.pc = target;
        } else if cond == 0 || self.cpu.cond(cond) {
            self.cpu.pc = target;
        }
        Ok(())
    }

    fn op_moveq(&mut self, ipc: u32, op: u16) -> Result<(), ExecError> {
        if op & 0x0100 != 0 {
            return Err(ExecError::IllegalInstruction { pc: ipc, opcode: op });
        }
        let v = op as u8 as i8 as i32 as u32;
        self.cpu.d[((op >> 9) & 7) as usize] = v;
        self.set_logic_flags(v, Size::Long);
        Ok(())
    }

    fn group_alu(&mut self, ipc: u32, op: u16, alu: Alu) -> Result<(), ExecError> {
        let dn = (op >> 9) & 7;
        let opmode = (op >> 6) & 7;
        let mode = (op >> 3) & 7;
        let reg = op & 7;

        match opmode {
            0 | 1 | 2 => {
                let size = Size::from_bits(opmode).unwrap();
                let src = self.ea_read(ipc, op, mode, reg, size)?;
                let dst = self.cpu.d[dn as usize] & size.mask();
                let result = self.alu_apply(alu, dst, src, size);
                self.write_dreg(dn, result, size);
                Ok(())
            }
            4 | 5 | 6 => {
                // Dn -> <ea>
                let size = Size::from_bits(opmode - 4).unwrap();
                let src = self.cpu.d[dn as usize] & size.mask();
                let addr = self.ea_address(ipc, op, mode, reg, size)?;
                let dst = self.mem_read_sized(addr, size);
                let result = self.alu_apply(alu, dst, src, size);
                self.mem_write_sized(addr, result, size);
                Ok(())
            }
            3 | 7 => {
                // adda/suba; mulu/divu territory for and/or is not generated
                let size = if opmode == 3 { Size::Word } else { Size::Long };
                let src_raw = self.ea_read(ipc, op, mode, reg, size)?;
                let src = match size {
                    Size::Word => src_raw as u16 as i16 as i32 as u32,
                    _ => src_raw,
                };
                let r = dn as usize;
                match alu {
                    Alu::Add => self.cpu.a[r] = self.cpu.a[r].wrapping_add(src),
                    Alu::Sub => self.cpu.a[r] = self.cpu.a[r].wrapping_sub(src),
                    _ => {
                        return Err(ExecError::IllegalInstruction { pc: ipc, opcode: op })
                    }
                }
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn alu_apply(&mut self, alu: Alu, dst: u32, src: u32, size: Size) -> u32 {
        match alu {
            Alu::Or => {
                let r = dst | src;
                self.set_logic_flags(r, size);
                r
            }
            Alu::And => {
                let r = dst & src;
                self.set_logic_flags(r, size);
                r
            }
            Alu::Add => {
                let r = dst.wrapping_add(src) & size.mask();
                self.set_add_flags(dst, src, r, size);
                r
            }
            Alu::Sub => {
                let r = dst.wrapping_sub(src) & size.mask();
                self.set_sub_flags(dst, src, r, size, true);
                r
            }
        }
    }

    fn group_cmp_eor(&mut self, ipc: u32, op: u16) -> Result<(), ExecError> {
        let dn = (op >> 9) & 7;
        let opmode = (op >> 6) & 7;
        let mode = (op >> 3) & 7;
        let reg = op & 7;
        match opmode {
            0 | 1 | 2 => {
                // cmp <ea>, Dn
                let size = Size::from_bits(opmode).unwrap();
                let src = self.ea_read(ipc, op, mode, reg, size)?;
                let dst = self.cpu.d[dn as usize] & size.mask();
                let r = dst.wrapping_sub(src) & size.mask();
                self.set_sub_flags(dst, src, r, size, false);
                Ok(())
            }
            3 | 7 => {
                // cmpa: source extended to long, whole An compared
                let size = if opmode == 3 { Size::Word } else { Size::Long };
                let src_raw = self.ea_read(ipc, op, mode, reg, size)?;
                let src = match size {
                    Size::Word => src_raw as u16 as i16 as i32 as u32,
                    _ => src_raw,
                };
                let dst = self.cpu.a[dn as usize];
                let r = dst.wrapping_sub(src);
                self.set_sub_flags(dst, src, r, Size::Long, false);
                Ok(())
            }
            4 | 5 | 6 => {
                // eor Dn, <ea>
                let size = Size::from_bits(opmode - 4).unwrap();
                let src = self.cpu.d[dn as usize] & size.mask();
                if mode == 0 {
                    let dst = self.cpu.d[reg as usize] & size.mask();
                    let r = dst ^ src;
                    self.write_dreg(reg, r, size);
                    self.set_logic_flags(r, size);
                } else {
                    let addr = self.ea_address(ipc, op, mode, reg, size)?;
                    let r = self.mem_read_sized(addr, size) ^ src;
                    self.mem_write_sized(addr, r, size);
                    self.set_logic_flags(r, size);
                }
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn group_shift(&mut self, ipc: u32, op: u16) -> Result<(), ExecError> {
        let size = Size::from_bits((op >> 6) & 3)
            .ok_or(ExecError::IllegalInstruction { pc: ipc, opcode: op })?;
        if op & 0x0020 != 0 {
            // register-count form, not generated
            return Err(ExecError::IllegalInstruction { pc: ipc, opcode: op });
        }
        let count = {
            let c = (op >> 9) & 7;
            if c == 0 {
                8
            } else {
                c as u32
            }
        };
        let left = op & 0x0100 != 0;
        let kind = (op >> 3) & 3; // 00 arithmetic, 01 logical, 10 roxd, 11 rotate
        let reg = op & 7;
        let mask = size.mask();
        let msb = size.msb();
        let mut v = self.cpu.d[reg as usize] & mask;
        let mut carry = false;

        for _ in 0..count {
            match (kind, left) {
                (0, false) => {
                    // asr: sign bit replicates
                    carry = v & 1 != 0;
                    v = (v >> 1) | (v & msb);
                }
                (0, true) | (1, true) => {
                    // asl/lsl
                    carry = v & msb != 0;
                    v = (v << 1) & mask;
                }
                (1, false) => {
                    // lsr
                    carry = v & 1 != 0;
                    v >>= 1;
                }
                (3, true) => {
                    // rol
                    carry = v & msb != 0;
                    v = ((v << 1) | (carry as u32)) & mask;
                }
                (3, false) => {
                    // ror
                    carry = v & 1 != 0;
                    v = (v >> 1) | if carry { msb } else { 0 };
                }
                _ => return Err(ExecError::IllegalInstruction { pc: ipc, opcode: op }),
            }
        }

        self.write_dreg(reg, v, size);
        self.set_nz(v, size);
        self.set_flag(CCR_V, false);
        self.set_flag(CCR_C, carry);
        if kind != 3 {
            self.set_flag(CCR_X, carry);
        }
        Ok(())
    }
}
