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

    cpu::bitwise.rs

    Shift and rotate group (D0-D3 and the 80186+ C0/C1 immediate forms).

    The 8086 iterates the raw CL count; 80186 and later mask the count
    mod 32. Rotates touch only CF and OF; shifts rewrite SF/ZF/PF as well.
*/

use crate::{
    cpu::*,
    devices::Chipset,
};

impl Cpu {
    pub(crate) fn shl_u8_with_carry(mut byte: u8, mut count: u8) -> (u8, bool) {
        let mut carry = false;
        while count > 0 {
            carry = byte & 0x80 != 0;
            byte <<= 1;
            count -= 1;
        }
        (byte, carry)
    }

    pub(crate) fn shl_u16_with_carry(mut word: u16, mut count: u8) -> (u16, bool) {
        let mut carry = false;
        while count > 0 {
            carry = word & 0x8000 != 0;
            word <<= 1;
            count -= 1;
        }
        (word, carry)
    }

    pub(crate) fn shr_u8_with_carry(mut byte: u8, mut count: u8) -> (u8, bool) {
        let mut carry = false;
        while count > 0 {
            carry = byte & 0x01 != 0;
            byte >>= 1;
            count -= 1;
        }
        (byte, carry)
    }

    pub(crate) fn shr_u16_with_carry(mut word: u16, mut count: u8) -> (u16, bool) {
        let mut carry = false;
        while count > 0 {
            carry = word & 0x0001 != 0;
            word >>= 1;
            count -= 1;
        }
        (word, carry)
    }

    pub(crate) fn sar_u8_with_carry(mut byte: u8, mut count: u8) -> (u8, bool) {
        let mut carry = false;
        while count > 0 {
            carry = byte & 0x01 != 0;
            byte = ((byte as i8) >> 1) as u8;
            count -= 1;
        }
        (byte, carry)
    }

    pub(crate) fn sar_u16_with_carry(mut word: u16, mut count: u8) -> (u16, bool) {
        let mut carry = false;
        while count > 0 {
            carry = word & 0x0001 != 0;
            word = ((word as i16) >> 1) as u16;
            count -= 1;
        }
        (word, carry)
    }

    pub(crate) fn rol_u8_with_carry(mut byte: u8, mut count: u8) -> (u8, bool) {
        let mut carry = false;
        while count > 0 {
            carry = byte & 0x80 != 0;
            byte = byte.rotate_left(1);
            count -= 1;
        }
        (byte, carry)
    }

    pub(crate) fn rol_u16_with_carry(mut word: u16, mut count: u8) -> (u16, bool) {
        let mut carry = false;
        while count > 0 {
            carry = word & 0x8000 != 0;
            word = word.rotate_left(1);
            count -= 1;
        }
        (word, carry)
    }

    pub(crate) fn ror_u8_with_carry(mut byte: u8, mut count: u8) -> (u8, bool) {
        let mut carry = false;
        while count > 0 {
            carry = byte & 0x01 != 0;
            byte = byte.rotate_right(1);
            count -= 1;
        }
        (byte, carry)
    }

    pub(crate) fn ror_u16_with_carry(mut word: u16, mut count: u8) -> (u16, bool) {
        let mut carry = false;
        while count > 0 {
            carry = word & 0x0001 != 0;
            word = word.rotate_right(1);
            count -= 1;
        }
        (word, carry)
    }

    pub(crate) fn rcl_u8_with_carry(mut byte: u8, mut count: u8, carry_flag: bool) -> (u8, bool) {
        let mut saved_carry = carry_flag;
        let mut new_carry;
        while count > 0 {
            new_carry = byte & 0x80 != 0;
            byte <<= 1;
            if saved_carry {
                byte |= 0x01;
            }
            saved_carry = new_carry;
            count -= 1;
        }
        (byte, saved_carry)
    }

    pub(crate) fn rcl_u16_with_carry(mut word: u16, mut count: u8, carry_flag: bool) -> (u16, bool) {
        let mut saved_carry = carry_flag;
        let mut new_carry;
        while count > 0 {
            new_carry = word & 0x8000 != 0;
            word <<= 1;
            if saved_carry {
                word |= 0x0001;
            }
            saved_carry = new_carry;
            count -= 1;
        }
        (word, saved_carry)
    }

    pub(crate) fn rcr_u8_with_carry(mut byte: u8, mut count: u8, carry_flag: bool) -> (u8, bool) {
        let mut saved_carry = carry_flag;
        let mut new_carry;
        while count > 0 {
            new_carry = byte & 0x01 != 0;
            byte >>= 1;
            if saved_carry {
                byte |= 0x80;
            }
            saved_carry = new_carry;
            count -= 1;
        }
        (byte, saved_carry)
    }

    pub(crate) fn rcr_u16_with_carry(mut word: u16, mut count: u8, carry_flag: bool) -> (u16, bool) {
        let mut saved_carry = carry_flag;
        let mut new_carry;
        while count > 0 {
            new_carry = word & 0x0001 != 0;
            word >>= 1;
            if saved_carry {
                word |= 0x8000;
            }
            saved_carry = new_carry;
            count -= 1;
        }
        (word, saved_carry)
    }

    fn shift_count(&mut self) -> Result<u8, CpuFault> {
        let count = match self.opcode {
            0xD0 | 0xD1 => 1,
            0xD2 | 0xD3 => self.c.l(),
            _ => self.fetch_u8()?,
        };

        // 80186 and later mask the count; the 8086 grinds through all of
        // CL, one bit per four cycles.
        Ok(match self.model {
            CpuModel::Intel8088 => count,
            _ => count & 0x1F,
        })
    }

    fn rotate_op8(&mut self, op: u8, value: u8, count: u8) -> u8 {
        let carry_in = self.get_flag(Flag::Carry);
        let (res, carry) = match op {
            0 => Cpu::rol_u8_with_carry(value, count),
            1 => Cpu::ror_u8_with_carry(value, count),
            2 => Cpu::rcl_u8_with_carry(value, count, carry_in),
            _ => Cpu::rcr_u8_with_carry(value, count, carry_in),
        };

        // Rotates leave SF/ZF/PF/AF alone.
        self.set_flag_state(Flag::Carry, carry);
        let overflow = match op {
            0 | 2 => (res & 0x80 != 0) != carry,
            _ => (res & 0x80 != 0) != (res & 0x40 != 0),
        };
        self.set_flag_state(Flag::Overflow, overflow);
        res
    }

    fn rotate_op16(&mut self, op: u8, value: u16, count: u8) -> u16 {
        let carry_in = self.get_flag(Flag::Carry);
        let (res, carry) = match op {
            0 => Cpu::rol_u16_with_carry(value, count),
            1 => Cpu::ror_u16_with_carry(value, count),
            2 => Cpu::rcl_u16_with_carry(value, count, carry_in),
            _ => Cpu::rcr_u16_with_carry(value, count, carry_in),
        };

        self.set_flag_state(Flag::Carry, carry);
        let overflow = match op {
            0 | 2 => (res & 0x8000 != 0) != carry,
            _ => (res & 0x8000 != 0) != (res & 0x4000 != 0),
        };
        self.set_flag_state(Flag::Overflow, overflow);
        res
    }

    fn shift_op8(&mut self, op: u8, value: u8, count: u8) -> u8 {
        let (res, carry) = match op {
            5 => Cpu::shr_u8_with_carry(value, count),
            7 => Cpu::sar_u8_with_carry(value, count),
            _ => Cpu::shl_u8_with_carry(value, count),
        };

        self.set_logic_result(res as u32, RESULT_BYTE);
        self.set_flag_state(Flag::Carry, carry);
        let overflow = match op {
            5 => value & 0x80 != 0,
            7 => false,
            _ => (res & 0x80 != 0) != carry,
        };
        self.set_flag_state(Flag::Overflow, overflow);
        res
    }

    fn shift_op16(&mut self, op: u8, value: u16, count: u8) -> u16 {
        let (res, carry) = match op {
            5 => Cpu::shr_u16_with_carry(value, count),
            7 => Cpu::sar_u16_with_carry(value, count),
            _ => Cpu::shl_u16_with_carry(value, count),
        };

        self.set_logic_result(res as u32, RESULT_WORD);
        self.set_flag_state(Flag::Carry, carry);
        let overflow = match op {
            5 => value & 0x8000 != 0,
            7 => false,
            _ => (res & 0x8000 != 0) != carry,
        };
        self.set_flag_state(Flag::Overflow, overflow);
        res
    }

    /// Group 2: 0xD0/0xD2/0xC0 byte forms, 0xD1/0xD3/0xC1 word forms.
    pub(crate) fn op_grp2(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        let op = self.modrm_reg;
        let count = self.shift_count()?;

        // Slot 6 is the undocumented SHL alias.
        if op == 6 && self.model != CpuModel::Intel8088 {
            return Err(CpuFault::InvalidOpcode);
        }

        if count != 0 {
            if self.opcode & 0x01 == 0 {
                let value = self.read_rm8()?;
                let res = if op < 4 {
                    self.rotate_op8(op, value, count)
                }
                else {
                    self.shift_op8(op, value, count)
                };
                self.write_rm8(res)?;
            }
            else {
                let value = self.read_rm16()?;
                let res = if op < 4 {
                    self.rotate_op16(op, value, count)
                }
                else {
                    self.shift_op16(op, value, count)
                };
                self.write_rm16(res)?;
            }
        }
        let by_one = matches!(self.opcode, 0xD0 | 0xD1);
        let base = match (by_one, self.modrm_is_register()) {
            (true, true) => self.timing.shift_1_r,
            (true, false) => self.timing.shift_1_m,
            (false, true) => self.timing.shift_cl_r,
            (false, false) => self.timing.shift_cl_m,
        };
        self.cycles(base + self.timing.shift_per_bit * count as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::*;
    use crate::devices::NullChipset;

    fn cpu(model: CpuModel) -> Cpu {
        let mut cpu = Cpu::new(model, CpuOptions::default());
        cpu.bus_mut().install_ram(0, 0x20000);
        cpu.load_segment(Segment::CS, 0x0100).unwrap();
        cpu.ip = 0;
        cpu.biu_queue_flush();
        cpu
    }

    fn run_shift(cpu: &mut Cpu, opcode: u8, modrm: u8, imm: Option<u8>) {
        let mut sys = NullChipset;
        let mut bytes = vec![modrm];
        if let Some(i) = imm {
            bytes.push(i);
        }
        cpu.bus_mut().copy_in(&bytes, 0x1000);
        cpu.ip = 0;
        cpu.biu_queue_flush();
        cpu.opcode = opcode;
        cpu.op_grp2(&mut sys).unwrap();
    }

    #[test]
    fn shl_by_one_sets_carry_and_overflow() {
        let mut cpu = cpu(CpuModel::Intel8088);
        cpu.a.set_x(0x8000);
        run_shift(&mut cpu, 0xD1, 0b11_100_000, None); // SHL AX, 1
        assert_eq!(cpu.a.x(), 0x0000);
        assert!(cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::Zero));
        assert!(cpu.get_flag(Flag::Overflow)); // msb changed
    }

    #[test]
    fn shift_count_unmasked_on_8086() {
        let mut cpu = cpu(CpuModel::Intel8088);
        cpu.a.set_x(1);
        cpu.c.set_l(33);
        run_shift(&mut cpu, 0xD3, 0b11_100_000, None); // SHL AX, CL
        assert_eq!(cpu.a.x(), 0);
    }

    #[test]
    fn shift_count_masked_on_286() {
        let mut cpu = cpu(CpuModel::Intel80286);
        cpu.a.set_x(1);
        cpu.c.set_l(33);
        run_shift(&mut cpu, 0xD3, 0b11_100_000, None); // SHL AX, CL
        assert_eq!(cpu.a.x(), 2); // 33 & 1F = 1
    }

    #[test]
    fn sar_preserves_sign() {
        let mut cpu = cpu(CpuModel::Intel8088);
        cpu.a.set_l(0x82);
        run_shift(&mut cpu, 0xD0, 0b11_111_000, None); // SAR AL, 1
        assert_eq!(cpu.a.l(), 0xC1);
        assert!(!cpu.get_flag(Flag::Carry));
        assert!(!cpu.get_flag(Flag::Overflow));
    }

    #[test]
    fn rcr_pulls_carry_in() {
        let mut cpu = cpu(CpuModel::Intel8088);
        cpu.set_flag(Flag::Carry);
        cpu.a.set_l(0x00);
        run_shift(&mut cpu, 0xD0, 0b11_011_000, None); // RCR AL, 1
        assert_eq!(cpu.a.l(), 0x80);
        assert!(!cpu.get_flag(Flag::Carry));
    }

    #[test]
    fn rotate_preserves_szp() {
        let mut cpu = cpu(CpuModel::Intel8088);
        cpu.alu_sub8(5, 5, false); // ZF set
        cpu.a.set_l(0x01);
        run_shift(&mut cpu, 0xD0, 0b11_000_000, None); // ROL AL, 1
        assert_eq!(cpu.a.l(), 0x02);
        assert!(cpu.get_flag(Flag::Zero)); // untouched by rotate
    }

    #[test]
    fn shift_imm_on_186() {
        let mut cpu = cpu(CpuModel::Intel80186);
        cpu.a.set_l(0x01);
        run_shift(&mut cpu, 0xC0, 0b11_100_000, Some(4)); // SHL AL, 4
        assert_eq!(cpu.a.l(), 0x10);
    }
}
