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

    cpu::modrm.rs

    ModRM decode and effective address generation.

    fetch_modrm() consumes the ModRM byte plus any displacement, resolves
    memory forms to (segment, offset) in the per-instruction scratch, and
    charges the model's EA time. Register forms leave the EA unloaded and
    the read/write helpers hit the register file instead.
*/

use crate::cpu::*;

impl Cpu {
    /// Consume and decode a ModRM byte, resolving any memory operand.
    pub(crate) fn fetch_modrm(&mut self) -> Result<(), CpuFault> {
        let byte = self.fetch_u8()?;
        self.modrm_mod = byte >> 6;
        self.modrm_reg = (byte >> 3) & 0x07;
        self.modrm_rm = byte & 0x07;
        self.ea_loaded = false;

        if self.modrm_mod != 3 {
            self.modrm_ea()?;
        }
        Ok(())
    }

    fn modrm_ea(&mut self) -> Result<(), CpuFault> {
        // Base register sum and its default segment. All BP-based forms
        // address through the stack segment.
        let (base, seg) = match self.modrm_rm {
            0 => (self.b.x().wrapping_add(self.si), self.seg_data),
            1 => (self.b.x().wrapping_add(self.di), self.seg_data),
            2 => (self.bp.wrapping_add(self.si), self.seg_stack),
            3 => (self.bp.wrapping_add(self.di), self.seg_stack),
            4 => (self.si, self.seg_data),
            5 => (self.di, self.seg_data),
            6 => {
                if self.modrm_mod == 0 {
                    (0, self.seg_data)
                }
                else {
                    (self.bp, self.seg_stack)
                }
            }
            _ => (self.b.x(), self.seg_data),
        };

        let offset = match self.modrm_mod {
            0 => {
                if self.modrm_rm == 6 {
                    self.fetch_u16()?
                }
                else {
                    base
                }
            }
            1 => base.wrapping_add(self.fetch_i8()? as u16),
            _ => base.wrapping_add(self.fetch_u16()?),
        };

        self.ea_seg = seg;
        self.ea_off = offset;
        self.ea_loaded = true;
        self.cycles(self.timing.ea_cost(self.modrm_mod, self.modrm_rm));
        Ok(())
    }

    #[inline]
    pub(crate) fn modrm_is_register(&self) -> bool {
        self.modrm_mod == 3
    }

    #[inline]
    pub(crate) fn modrm_reg8(&self) -> Register8 {
        REGISTER8_LUT[self.modrm_reg as usize]
    }

    #[inline]
    pub(crate) fn modrm_reg16(&self) -> Register16 {
        REGISTER16_LUT[self.modrm_reg as usize]
    }

    #[inline]
    pub(crate) fn modrm_rm_reg8(&self) -> Register8 {
        REGISTER8_LUT[self.modrm_rm as usize]
    }

    #[inline]
    pub(crate) fn modrm_rm_reg16(&self) -> Register16 {
        REGISTER16_LUT[self.modrm_rm as usize]
    }

    pub(crate) fn read_rm8(&mut self) -> Result<u8, CpuFault> {
        if self.modrm_is_register() {
            Ok(self.register8(self.modrm_rm_reg8()))
        }
        else {
            self.biu_read_u8(self.ea_seg, self.ea_off)
        }
    }

    pub(crate) fn read_rm16(&mut self) -> Result<u16, CpuFault> {
        if self.modrm_is_register() {
            Ok(self.register16(self.modrm_rm_reg16()))
        }
        else {
            self.biu_read_u16(self.ea_seg, self.ea_off)
        }
    }

    pub(crate) fn write_rm8(&mut self, value: u8) -> Result<(), CpuFault> {
        if self.modrm_is_register() {
            self.set_register8(self.modrm_rm_reg8(), value);
            Ok(())
        }
        else {
            self.biu_write_u8(self.ea_seg, self.ea_off, value)
        }
    }

    pub(crate) fn write_rm16(&mut self, value: u16) -> Result<(), CpuFault> {
        if self.modrm_is_register() {
            self.set_register16(self.modrm_rm_reg16(), value);
            Ok(())
        }
        else {
            self.biu_write_u16(self.ea_seg, self.ea_off, value)
        }
    }

    /// Read a second word above the resolved EA (far pointer segments,
    /// BOUND upper limits).
    pub(crate) fn read_rm16_high(&mut self) -> Result<u16, CpuFault> {
        self.biu_read_u16(self.ea_seg, self.ea_off.wrapping_add(2))
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::*;

    fn cpu() -> Cpu {
        let mut cpu = Cpu::new(CpuModel::Intel8088, CpuOptions::default());
        cpu.bus_mut().install_ram(0, 0x20000);
        cpu.load_segment(Segment::CS, 0x0100).unwrap();
        cpu.load_segment(Segment::DS, 0x0200).unwrap();
        cpu.load_segment(Segment::SS, 0x0300).unwrap();
        cpu.ip = 0;
        cpu.biu_queue_flush();
        cpu
    }

    fn decode(cpu: &mut Cpu, bytes: &[u8]) {
        cpu.bus_mut().copy_in(bytes, 0x1000);
        cpu.ip = 0;
        cpu.biu_queue_flush();
        cpu.fetch_modrm().unwrap();
    }

    #[test]
    fn register_form() {
        let mut cpu = cpu();
        decode(&mut cpu, &[0b11_010_001]); // mod 3, reg DX, rm CX
        assert!(cpu.modrm_is_register());
        assert_eq!(cpu.modrm_reg16(), Register16::DX);
        assert_eq!(cpu.modrm_rm_reg16(), Register16::CX);
    }

    #[test]
    fn direct_address_uses_data_segment() {
        let mut cpu = cpu();
        decode(&mut cpu, &[0b00_000_110, 0x34, 0x12]); // [1234]
        assert!(cpu.ea_loaded);
        assert_eq!(cpu.ea_off, 0x1234);
        assert_eq!(cpu.ea_seg, Segment::DS);
    }

    #[test]
    fn bp_forms_use_stack_segment() {
        let mut cpu = cpu();
        cpu.bp = 0x0010;
        decode(&mut cpu, &[0b01_000_110, 0x05]); // [BP+5]
        assert_eq!(cpu.ea_off, 0x0015);
        assert_eq!(cpu.ea_seg, Segment::SS);

        cpu.si = 0x0100;
        decode(&mut cpu, &[0b00_000_010]); // [BP+SI]
        assert_eq!(cpu.ea_off, 0x0110);
        assert_eq!(cpu.ea_seg, Segment::SS);
    }

    #[test]
    fn bx_si_with_disp16() {
        let mut cpu = cpu();
        cpu.set_register16(Register16::BX, 0x1000);
        cpu.si = 0x0200;
        decode(&mut cpu, &[0b10_000_000, 0x00, 0x10]); // [BX+SI+1000]
        assert_eq!(cpu.ea_off, 0x2200);
        assert_eq!(cpu.ea_seg, Segment::DS);
    }

    #[test]
    fn negative_disp8_wraps() {
        let mut cpu = cpu();
        cpu.set_register16(Register16::BX, 0x0000);
        decode(&mut cpu, &[0b01_000_111, 0xFF]); // [BX-1]
        assert_eq!(cpu.ea_off, 0xFFFF);
    }

    #[test]
    fn segment_override_redirects_ea() {
        let mut cpu = cpu();
        cpu.seg_data = Segment::ES;
        cpu.seg_stack = Segment::ES;
        cpu.bp = 0x20;
        decode(&mut cpu, &[0b01_000_110, 0x00]); // [BP] with override
        assert_eq!(cpu.ea_seg, Segment::ES);
    }

    #[test]
    fn ea_cycle_costs_match_model_table() {
        let mut cpu = cpu();

        // [BX+DI] is one of the slow base+index pairs: 8 EA cycles on top
        // of the 4-cycle demand fetch of the ModRM byte itself.
        cpu.instr_cycles = 0;
        decode(&mut cpu, &[0b00_000_001]);
        assert_eq!(cpu.instr_cycles, 4 + 8);

        // [SI] is a bare index.
        cpu.instr_cycles = 0;
        decode(&mut cpu, &[0b00_000_100]);
        assert_eq!(cpu.instr_cycles, 4 + 5);
    }

    #[test]
    fn rm_read_write_memory() {
        let mut cpu = cpu();
        decode(&mut cpu, &[0b00_000_110, 0x00, 0x20]); // [2000]
        cpu.write_rm16(0xABCD).unwrap();
        assert_eq!(cpu.read_rm16().unwrap(), 0xABCD);
        assert_eq!(cpu.bus_mut().read_u16(0x4000), 0xABCD);
    }
}
