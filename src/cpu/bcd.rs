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

    cpu::bcd.rs

    ASCII and decimal adjust instructions, plus the undocumented SALC.
*/

use crate::{
    cpu::*,
    devices::Chipset,
};

impl Cpu {
    /// 0x27: DAA.
    pub(crate) fn op_daa(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let old_al = self.a.l();
        let old_cf = self.get_flag(Flag::Carry);
        let old_af = self.get_flag(Flag::AuxCarry);

        let mut al = old_al;
        let mut cf = false;
        let mut af = false;

        if (old_al & 0x0F) > 9 || old_af {
            al = al.wrapping_add(6);
            af = true;
        }
        if old_al > 0x99 || old_cf {
            al = al.wrapping_add(0x60);
            cf = true;
        }

        self.a.set_l(al);
        self.set_logic_result(al as u32, RESULT_BYTE);
        self.set_flag_state(Flag::Carry, cf);
        self.set_flag_state(Flag::AuxCarry, af);
        self.cycles(self.timing.daa);
        Ok(())
    }

    /// 0x2F: DAS.
    pub(crate) fn op_das(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let old_al = self.a.l();
        let old_cf = self.get_flag(Flag::Carry);
        let old_af = self.get_flag(Flag::AuxCarry);

        let mut al = old_al;
        let mut cf = false;
        let mut af = false;

        if (old_al & 0x0F) > 9 || old_af {
            al = al.wrapping_sub(6);
            cf = old_cf || old_al < 6;
            af = true;
        }
        if old_al > 0x99 || old_cf {
            al = al.wrapping_sub(0x60);
            cf = true;
        }

        self.a.set_l(al);
        self.set_logic_result(al as u32, RESULT_BYTE);
        self.set_flag_state(Flag::Carry, cf);
        self.set_flag_state(Flag::AuxCarry, af);
        self.cycles(self.timing.daa);
        Ok(())
    }

    /// 0x37: AAA.
    pub(crate) fn op_aaa(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let adjust = (self.a.l() & 0x0F) > 9 || self.get_flag(Flag::AuxCarry);

        if adjust {
            self.a.set_l(self.a.l().wrapping_add(6));
            self.a.set_h(self.a.h().wrapping_add(1));
        }
        self.a.set_l(self.a.l() & 0x0F);

        self.set_logic_result(self.a.l() as u32, RESULT_BYTE);
        self.set_flag_state(Flag::Carry, adjust);
        self.set_flag_state(Flag::AuxCarry, adjust);
        self.cycles(self.timing.aaa);
        Ok(())
    }

    /// 0x3F: AAS.
    pub(crate) fn op_aas(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let adjust = (self.a.l() & 0x0F) > 9 || self.get_flag(Flag::AuxCarry);

        if adjust {
            self.a.set_l(self.a.l().wrapping_sub(6));
            self.a.set_h(self.a.h().wrapping_sub(1));
        }
        self.a.set_l(self.a.l() & 0x0F);

        self.set_logic_result(self.a.l() as u32, RESULT_BYTE);
        self.set_flag_state(Flag::Carry, adjust);
        self.set_flag_state(Flag::AuxCarry, adjust);
        self.cycles(self.timing.aaa);
        Ok(())
    }

    /// 0xD4: AAM imm8. The divisor is encoded; zero raises #DE.
    pub(crate) fn op_aam(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let base = self.fetch_u8()?;
        self.cycles(self.timing.aam);
        if base == 0 {
            return Err(CpuFault::DivideError);
        }

        let al = self.a.l();
        self.a.set_h(al / base);
        self.a.set_l(al % base);
        self.set_logic_result(self.a.l() as u32, RESULT_BYTE);
        Ok(())
    }

    /// 0xD5: AAD imm8.
    pub(crate) fn op_aad(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let base = self.fetch_u8()?;
        let al = (self.a.h() as u16).wrapping_mul(base as u16).wrapping_add(self.a.l() as u16) as u8;
        self.a.set_l(al);
        self.a.set_h(0);
        self.set_logic_result(al as u32, RESULT_BYTE);
        self.cycles(self.timing.aad);
        Ok(())
    }

    /// 0xD6: SALC (undocumented). AL = CF ? FF : 00, no flags.
    pub(crate) fn op_salc(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.a.set_l(if self.get_flag(Flag::Carry) { 0xFF } else { 0x00 });
        self.cycles(self.timing.flag_op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::*;
    use crate::devices::NullChipset;

    fn cpu() -> Cpu {
        let mut cpu = Cpu::new(CpuModel::Intel8088, CpuOptions::default());
        cpu.bus_mut().install_ram(0, 0x20000);
        cpu.load_segment(Segment::CS, 0x0100).unwrap();
        cpu.ip = 0;
        cpu.biu_queue_flush();
        cpu
    }

    #[test]
    fn daa_adjusts_packed_sum() {
        let mut cpu = cpu();
        let mut sys = NullChipset;

        // 0x38 + 0x45 = 0x7D -> adjusted 0x83.
        let sum = cpu.alu_add8(0x38, 0x45, false);
        cpu.a.set_l(sum);
        cpu.op_daa(&mut sys).unwrap();
        assert_eq!(cpu.a.l(), 0x83);
        assert!(!cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::AuxCarry));
    }

    #[test]
    fn daa_carries_past_99() {
        let mut cpu = cpu();
        let mut sys = NullChipset;

        // 0x99 + 0x01 = 0x9A -> adjusted 0x00 carry out.
        let sum = cpu.alu_add8(0x99, 0x01, false);
        cpu.a.set_l(sum);
        cpu.op_daa(&mut sys).unwrap();
        assert_eq!(cpu.a.l(), 0x00);
        assert!(cpu.get_flag(Flag::Carry));
        assert!(cpu.get_flag(Flag::Zero));
    }

    #[test]
    fn aaa_unpacks_digit() {
        let mut cpu = cpu();
        let mut sys = NullChipset;

        cpu.a.set_x(0x000B);
        cpu.op_aaa(&mut sys).unwrap();
        assert_eq!(cpu.a.x(), 0x0101);
        assert!(cpu.get_flag(Flag::Carry));
    }

    #[test]
    fn aam_splits_digits() {
        let mut cpu = cpu();
        let mut sys = NullChipset;

        cpu.bus_mut().copy_in(&[0x0A], 0x1000);
        cpu.ip = 0;
        cpu.biu_queue_flush();
        cpu.a.set_l(63);
        cpu.op_aam(&mut sys).unwrap();
        assert_eq!(cpu.a.h(), 6);
        assert_eq!(cpu.a.l(), 3);
        assert!(!cpu.get_flag(Flag::Zero));
    }

    #[test]
    fn aam_zero_divisor_faults() {
        let mut cpu = cpu();
        let mut sys = NullChipset;

        cpu.bus_mut().copy_in(&[0x00], 0x1000);
        cpu.ip = 0;
        cpu.biu_queue_flush();
        assert_eq!(cpu.op_aam(&mut sys), Err(CpuFault::DivideError));
    }

    #[test]
    fn aad_recombines_digits() {
        let mut cpu = cpu();
        let mut sys = NullChipset;

        cpu.bus_mut().copy_in(&[0x0A], 0x1000);
        cpu.ip = 0;
        cpu.biu_queue_flush();
        cpu.a.set_x(0x0603);
        cpu.op_aad(&mut sys).unwrap();
        assert_eq!(cpu.a.x(), 0x003F);
    }

    #[test]
    fn salc_materializes_carry() {
        let mut cpu = cpu();
        let mut sys = NullChipset;

        cpu.set_flag(Flag::Carry);
        cpu.op_salc(&mut sys).unwrap();
        assert_eq!(cpu.a.l(), 0xFF);

        cpu.clear_flag(Flag::Carry);
        cpu.op_salc(&mut sys).unwrap();
        assert_eq!(cpu.a.l(), 0x00);
    }
}
