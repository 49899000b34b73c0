/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    cpu::alu.rs

    Implements common ALU operations.

    Every helper records the deferred flag tuple rather than computing
    flags; additive forms store the full-precision result with dst ^ src in
    the aux word, logical forms store the bare result.
*/
#![allow(dead_code)]

use crate::cpu::{flags::{RESULT_BYTE, RESULT_WORD}, Cpu, Flag};

impl Cpu {
    pub fn alu_add8(&mut self, dst: u8, src: u8, carry_in: bool) -> u8 {
        let res = (dst as u32) + (src as u32) + (carry_in as u32);
        self.set_arith_result(res, (dst ^ src) as u32, RESULT_BYTE);
        res as u8
    }

    pub fn alu_add16(&mut self, dst: u16, src: u16, carry_in: bool) -> u16 {
        let res = (dst as u32) + (src as u32) + (carry_in as u32);
        self.set_arith_result(res, (dst ^ src) as u32, RESULT_WORD);
        res as u16
    }

    pub fn alu_sub8(&mut self, dst: u8, src: u8, borrow_in: bool) -> u8 {
        let res = (dst as u32).wrapping_sub((src as u32) + (borrow_in as u32));
        self.set_arith_result(res, (dst ^ src) as u32, RESULT_BYTE);
        res as u8
    }

    pub fn alu_sub16(&mut self, dst: u16, src: u16, borrow_in: bool) -> u16 {
        let res = (dst as u32).wrapping_sub((src as u32) + (borrow_in as u32));
        self.set_arith_result(res, (dst ^ src) as u32, RESULT_WORD);
        res as u16
    }

    pub fn alu_and8(&mut self, dst: u8, src: u8) -> u8 {
        let res = dst & src;
        self.set_logic_result(res as u32, RESULT_BYTE);
        res
    }

    pub fn alu_and16(&mut self, dst: u16, src: u16) -> u16 {
        let res = dst & src;
        self.set_logic_result(res as u32, RESULT_WORD);
        res
    }

    pub fn alu_or8(&mut self, dst: u8, src: u8) -> u8 {
        let res = dst | src;
        self.set_logic_result(res as u32, RESULT_BYTE);
        res
    }

    pub fn alu_or16(&mut self, dst: u16, src: u16) -> u16 {
        let res = dst | src;
        self.set_logic_result(res as u32, RESULT_WORD);
        res
    }

    pub fn alu_xor8(&mut self, dst: u8, src: u8) -> u8 {
        let res = dst ^ src;
        self.set_logic_result(res as u32, RESULT_BYTE);
        res
    }

    pub fn alu_xor16(&mut self, dst: u16, src: u16) -> u16 {
        let res = dst ^ src;
        self.set_logic_result(res as u32, RESULT_WORD);
        res
    }

    /// INC leaves CF alone; the carry bit of the tuple is put back after
    /// the add.
    pub fn alu_inc8(&mut self, dst: u8) -> u8 {
        let carry = self.get_flag(Flag::Carry);
        let res = self.alu_add8(dst, 1, false);
        self.put_back_carry(carry);
        res
    }

    pub fn alu_inc16(&mut self, dst: u16) -> u16 {
        let carry = self.get_flag(Flag::Carry);
        let res = self.alu_add16(dst, 1, false);
        self.put_back_carry(carry);
        res
    }

    pub fn alu_dec8(&mut self, dst: u8) -> u8 {
        let carry = self.get_flag(Flag::Carry);
        let res = self.alu_sub8(dst, 1, false);
        self.put_back_carry(carry);
        res
    }

    pub fn alu_dec16(&mut self, dst: u16) -> u16 {
        let carry = self.get_flag(Flag::Carry);
        let res = self.alu_sub16(dst, 1, false);
        self.put_back_carry(carry);
        res
    }

    pub fn alu_neg8(&mut self, dst: u8) -> u8 {
        self.alu_sub8(0, dst, false)
    }

    pub fn alu_neg16(&mut self, dst: u16) -> u16 {
        self.alu_sub16(0, dst, false)
    }

    /// The CF position of the tuple is the bit at result_size; flipping it
    /// does not disturb any other derived flag.
    #[inline]
    fn put_back_carry(&mut self, carry: bool) {
        if carry {
            self.result_value |= self.result_size;
        }
        else {
            self.result_value &= !self.result_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::*;

    fn cpu() -> Cpu {
        Cpu::new(CpuModel::Intel8088, CpuOptions::default())
    }

    fn flags(cpu: &Cpu) -> (bool, bool, bool, bool, bool, bool) {
        (
            cpu.get_flag(Flag::Carry),
            cpu.get_flag(Flag::Parity),
            cpu.get_flag(Flag::AuxCarry),
            cpu.get_flag(Flag::Zero),
            cpu.get_flag(Flag::Sign),
            cpu.get_flag(Flag::Overflow),
        )
    }

    #[test]
    fn add_signed_overflow() {
        let mut cpu = cpu();
        // 7FFF + 1: no carry, sign, signed overflow, aux carry from bit 11.
        let res = cpu.alu_add16(0x7FFF, 1, false);
        assert_eq!(res, 0x8000);
        let (c, p, a, z, s, o) = flags(&cpu);
        assert!(!c);
        // Low byte 00 has even parity.
        assert!(p);
        assert!(a);
        assert!(!z);
        assert!(s);
        assert!(o);
    }

    #[test]
    fn add_unsigned_carry() {
        let mut cpu = cpu();
        let res = cpu.alu_add8(0xFF, 1, false);
        assert_eq!(res, 0);
        let (c, _, a, z, s, o) = flags(&cpu);
        assert!(c);
        assert!(a);
        assert!(z);
        assert!(!s);
        assert!(!o);
    }

    #[test]
    fn adc_carry_chain() {
        let mut cpu = cpu();
        let res = cpu.alu_add16(0xFFFF, 0, true);
        assert_eq!(res, 0);
        assert!(cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::Zero));
    }

    #[test]
    fn sub_borrow_flags() {
        let mut cpu = cpu();
        let res = cpu.alu_sub8(0, 1, false);
        assert_eq!(res, 0xFF);
        let (c, _, a, z, s, o) = flags(&cpu);
        assert!(c);
        assert!(a);
        assert!(!z);
        assert!(s);
        assert!(!o);
    }

    #[test]
    fn sub_signed_overflow() {
        let mut cpu = cpu();
        // 8000 - 1 = 7FFF overflows signed.
        let res = cpu.alu_sub16(0x8000, 1, false);
        assert_eq!(res, 0x7FFF);
        let (c, _, _, _, s, o) = flags(&cpu);
        assert!(!c);
        assert!(!s);
        assert!(o);
    }

    #[test]
    fn cmp_is_sub_without_result() {
        let mut cpu = cpu();
        cpu.alu_sub16(5, 5, false);
        assert!(cpu.get_flag(Flag::Zero));
        assert!(!cpu.get_flag(Flag::Carry));
    }

    #[test]
    fn logic_clears_carry_and_overflow() {
        let mut cpu = cpu();
        cpu.alu_add8(0xFF, 1, false); // set carry
        let res = cpu.alu_and8(0xF0, 0x8F);
        assert_eq!(res, 0x80);
        let (c, _, a, z, s, o) = flags(&cpu);
        assert!(!c);
        assert!(!a);
        assert!(!z);
        assert!(s);
        assert!(!o);
    }

    #[test]
    fn inc_preserves_carry() {
        let mut cpu = cpu();
        cpu.alu_add8(0xFF, 1, false); // CF set
        let res = cpu.alu_inc16(0x00FF);
        assert_eq!(res, 0x0100);
        assert!(cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::AuxCarry));

        cpu.alu_sub8(1, 0, false); // CF clear
        let res = cpu.alu_dec16(0x0000);
        assert_eq!(res, 0xFFFF);
        assert!(!cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::Sign));
    }

    #[test]
    fn neg_sets_carry_for_nonzero() {
        let mut cpu = cpu();
        let res = cpu.alu_neg8(0x01);
        assert_eq!(res, 0xFF);
        assert!(cpu.get_flag(Flag::Carry));

        let res = cpu.alu_neg8(0x00);
        assert_eq!(res, 0x00);
        assert!(!cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::Zero));
    }

    #[test]
    fn parity_of_low_byte_only() {
        let mut cpu = cpu();
        // 0x0300: low byte 00 has even parity.
        cpu.alu_add16(0x0280, 0x0080, false);
        assert!(cpu.get_flag(Flag::Parity));

        // 0x0301: low byte 01 has odd parity.
        cpu.alu_add16(0x0280, 0x0081, false);
        assert!(!cpu.get_flag(Flag::Parity));
    }
}
