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

    cpu::muldiv.rs

    Group 3 (0xF6/0xF7): TEST/NOT/NEG/MUL/IMUL/DIV/IDIV.

    Divide overflow raises #DE through the fault path; the saved return
    address differs per model and is chosen by the fault dispatcher. The
    8086 additionally faults on the exact quotients -128 and -32768 that
    later models accept.
*/

use crate::{
    cpu::*,
    devices::Chipset,
};

impl Cpu {
    /// Unsigned multiply, 8-bit. CF/OF track a nonzero high half; SF, ZF,
    /// AF and PF are undefined on hardware and derived from the low half
    /// here.
    pub(crate) fn multiply_u8(&mut self, operand: u8) {
        let product: u16 = self.a.l() as u16 * operand as u16;
        self.a.set_x(product);

        self.set_logic_result((product & 0xFF) as u32, RESULT_BYTE);
        let high = product & 0xFF00 != 0;
        self.set_flag_state(Flag::Carry, high);
        self.set_flag_state(Flag::Overflow, high);
    }

    /// Unsigned multiply, 16-bit. DX:AX = AX * operand.
    pub(crate) fn multiply_u16(&mut self, operand: u16) {
        let product: u32 = self.a.x() as u32 * operand as u32;
        self.a.set_x((product & 0xFFFF) as u16);
        self.d.set_x((product >> 16) as u16);

        self.set_logic_result(product & 0xFFFF, RESULT_WORD);
        let high = product & 0xFFFF_0000 != 0;
        self.set_flag_state(Flag::Carry, high);
        self.set_flag_state(Flag::Overflow, high);
    }

    /// Signed multiply, 8-bit. CF/OF set when AH is not a sign extension
    /// of AL.
    pub(crate) fn multiply_i8(&mut self, operand: i8) {
        let product: i16 = (self.a.l() as i8 as i16) * (operand as i16);
        self.a.set_x(product as u16);

        self.set_logic_result((product as u16 & 0xFF) as u32, RESULT_BYTE);
        let narrow = product == (product as i8 as i16);
        self.set_flag_state(Flag::Carry, !narrow);
        self.set_flag_state(Flag::Overflow, !narrow);
    }

    /// Signed multiply, 16-bit. DX:AX = AX * operand.
    pub(crate) fn multiply_i16(&mut self, operand: i16) {
        let product: i32 = (self.a.x() as i16 as i32) * (operand as i32);
        self.a.set_x((product as u32 & 0xFFFF) as u16);
        self.d.set_x(((product as u32) >> 16) as u16);

        self.set_logic_result(product as u32 & 0xFFFF, RESULT_WORD);
        let narrow = product == (product as i16 as i32);
        self.set_flag_state(Flag::Carry, !narrow);
        self.set_flag_state(Flag::Overflow, !narrow);
    }

    /// Unsigned divide, 8-bit: AL = AX / operand, AH = remainder.
    pub(crate) fn divide_u8(&mut self, operand: u8) -> Result<(), CpuFault> {
        if operand == 0 {
            return Err(CpuFault::DivideError);
        }
        let dividend = self.a.x();
        let quotient = dividend / operand as u16;
        if quotient > 0xFF {
            return Err(CpuFault::DivideError);
        }
        self.a.set_l(quotient as u8);
        self.a.set_h((dividend % operand as u16) as u8);
        Ok(())
    }

    /// Unsigned divide, 16-bit: AX = DX:AX / operand, DX = remainder.
    pub(crate) fn divide_u16(&mut self, operand: u16) -> Result<(), CpuFault> {
        if operand == 0 {
            return Err(CpuFault::DivideError);
        }
        let dividend = ((self.d.x() as u32) << 16) | self.a.x() as u32;
        let quotient = dividend / operand as u32;
        if quotient > 0xFFFF {
            return Err(CpuFault::DivideError);
        }
        self.a.set_x(quotient as u16);
        self.d.set_x((dividend % operand as u32) as u16);
        Ok(())
    }

    /// Signed divide, 8-bit. The 8086 rejects a quotient of exactly -128.
    pub(crate) fn divide_i8(&mut self, operand: i8) -> Result<(), CpuFault> {
        if operand == 0 {
            return Err(CpuFault::DivideError);
        }
        let dividend = self.a.x() as i16 as i32;
        let quotient = dividend / operand as i32;

        let min = if self.model == CpuModel::Intel8088 { -127 } else { -128 };
        if quotient > 127 || quotient < min {
            return Err(CpuFault::DivideError);
        }

        self.a.set_l(quotient as u8);
        self.a.set_h((dividend % operand as i32) as u8);
        Ok(())
    }

    /// Signed divide, 16-bit. The 8086 rejects a quotient of exactly
    /// -32768.
    pub(crate) fn divide_i16(&mut self, operand: i16) -> Result<(), CpuFault> {
        if operand == 0 {
            return Err(CpuFault::DivideError);
        }
        let dividend = (((self.d.x() as u32) << 16) | self.a.x() as u32) as i32;
        let quotient = dividend / operand as i32;

        let min = if self.model == CpuModel::Intel8088 { -32767 } else { -32768 };
        if quotient > 32767 || quotient < min {
            return Err(CpuFault::DivideError);
        }

        self.a.set_x(quotient as u16);
        self.d.set_x((dividend % operand as i32) as u16);
        Ok(())
    }

    /// Group 3, 0xF6/0xF7.
    pub(crate) fn op_grp3(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        let word = self.opcode & 0x01 != 0;

        match self.modrm_reg {
            0 | 1 => {
                // TEST rm, imm. Slot 1 is the 8086 alias.
                if self.modrm_reg == 1 && self.model != CpuModel::Intel8088 {
                    return Err(CpuFault::InvalidOpcode);
                }
                if word {
                    let dst = self.read_rm16()?;
                    let imm = self.fetch_u16()?;
                    self.alu_and16(dst, imm);
                }
                else {
                    let dst = self.read_rm8()?;
                    let imm = self.fetch_u8()?;
                    self.alu_and8(dst, imm);
                }
                self.cycles(if self.modrm_is_register() {
                    self.timing.test_ri
                }
                else {
                    self.timing.test_mi
                });
            }
            2 => {
                // NOT rm: no flags.
                if word {
                    let v = self.read_rm16()?;
                    self.write_rm16(!v)?;
                }
                else {
                    let v = self.read_rm8()?;
                    self.write_rm8(!v)?;
                }
                self.cycles(if self.modrm_is_register() {
                    self.timing.alu_rr
                }
                else {
                    self.timing.alu_mi
                });
            }
            3 => {
                // NEG rm.
                if word {
                    let v = self.read_rm16()?;
                    let res = self.alu_neg16(v);
                    self.write_rm16(res)?;
                }
                else {
                    let v = self.read_rm8()?;
                    let res = self.alu_neg8(v);
                    self.write_rm8(res)?;
                }
                self.cycles(if self.modrm_is_register() {
                    self.timing.alu_rr
                }
                else {
                    self.timing.alu_mi
                });
            }
            4 => {
                if word {
                    let v = self.read_rm16()?;
                    self.multiply_u16(v);
                    self.cycles(self.timing.mul16);
                }
                else {
                    let v = self.read_rm8()?;
                    self.multiply_u8(v);
                    self.cycles(self.timing.mul8);
                }
            }
            5 => {
                if word {
                    let v = self.read_rm16()?;
                    self.multiply_i16(v as i16);
                    self.cycles(self.timing.imul16);
                }
                else {
                    let v = self.read_rm8()?;
                    self.multiply_i8(v as i8);
                    self.cycles(self.timing.imul8);
                }
            }
            6 => {
                if word {
                    let v = self.read_rm16()?;
                    self.cycles(self.timing.div16);
                    self.divide_u16(v)?;
                }
                else {
                    let v = self.read_rm8()?;
                    self.cycles(self.timing.div8);
                    self.divide_u8(v)?;
                }
            }
            _ => {
                if word {
                    let v = self.read_rm16()?;
                    self.cycles(self.timing.idiv16);
                    self.divide_i16(v as i16)?;
                }
                else {
                    let v = self.read_rm8()?;
                    self.cycles(self.timing.idiv8);
                    self.divide_i8(v as i8)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::*;

    fn cpu(model: CpuModel) -> Cpu {
        Cpu::new(model, CpuOptions::default())
    }

    #[test]
    fn mul_u8_sets_carry_on_wide_product() {
        let mut cpu = cpu(CpuModel::Intel8088);
        cpu.a.set_l(128);
        cpu.multiply_u8(2);
        assert_eq!(cpu.a.x(), 256);
        assert!(cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::Overflow));

        cpu.a.set_l(8);
        cpu.multiply_u8(2);
        assert_eq!(cpu.a.x(), 16);
        assert!(!cpu.get_flag(Flag::Carry));
    }

    #[test]
    fn mul_u16_splits_into_dx_ax() {
        let mut cpu = cpu(CpuModel::Intel8088);
        cpu.a.set_x(0x8000);
        cpu.multiply_u16(4);
        assert_eq!(cpu.a.x(), 0x0000);
        assert_eq!(cpu.d.x(), 0x0002);
        assert!(cpu.get_flag(Flag::Carry));
    }

    #[test]
    fn imul_sign_extension_flags() {
        let mut cpu = cpu(CpuModel::Intel8088);
        cpu.a.set_l(0xFF); // -1
        cpu.multiply_i8(-1);
        assert_eq!(cpu.a.x(), 0x0001);
        assert!(!cpu.get_flag(Flag::Carry));

        cpu.a.set_l(100);
        cpu.multiply_i8(100);
        assert_eq!(cpu.a.x(), 10000u16);
        assert!(cpu.get_flag(Flag::Carry));
    }

    #[test]
    fn div_by_zero_faults() {
        let mut cpu = cpu(CpuModel::Intel8088);
        cpu.a.set_x(0x1234);
        assert_eq!(cpu.divide_u8(0), Err(CpuFault::DivideError));
    }

    #[test]
    fn div_quotient_overflow_faults() {
        let mut cpu = cpu(CpuModel::Intel8088);
        cpu.a.set_x(0x0200);
        assert_eq!(cpu.divide_u8(1), Err(CpuFault::DivideError));

        cpu.a.set_x(0x0100);
        assert!(cpu.divide_u8(2).is_ok());
        assert_eq!(cpu.a.l(), 0x80);
        assert_eq!(cpu.a.h(), 0x00);
    }

    #[test]
    fn idiv_min_quotient_model_split() {
        // AX = -128, divisor 1: quotient -128 faults on the 8086 only.
        {
            let mut cpu = cpu(CpuModel::Intel8088);
            cpu.a.set_x(0xFF80);
            assert_eq!(cpu.divide_i8(1), Err(CpuFault::DivideError));
        }

        let mut cpu = cpu(CpuModel::Intel80186);
        cpu.a.set_x(0xFF80);
        assert!(cpu.divide_i8(1).is_ok());
        assert_eq!(cpu.a.l(), 0x80);
    }

    #[test]
    fn idiv_remainder_sign_follows_dividend() {
        let mut cpu = cpu(CpuModel::Intel80186);
        // -7 / 2 = -3 rem -1
        cpu.a.set_x(0xFFF9);
        assert!(cpu.divide_i8(2).is_ok());
        assert_eq!(cpu.a.l() as i8, -3);
        assert_eq!(cpu.a.h() as i8, -1);
    }
}
