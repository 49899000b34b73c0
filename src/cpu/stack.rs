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

    cpu::stack.rs

    Stack primitives and the stack opcodes. Pushes and pops always address
    through SS proper; segment overrides do not apply to implicit stack
    traffic.
*/

use crate::{
    cpu::*,
    devices::Chipset,
};

impl Cpu {
    pub(crate) fn push_u16(&mut self, data: u16) -> Result<(), CpuFault> {
        self.sp = self.sp.wrapping_sub(2);
        self.biu_write_u16(Segment::SS, self.sp, data)
    }

    pub(crate) fn pop_u16(&mut self) -> Result<u16, CpuFault> {
        let data = self.biu_read_u16(Segment::SS, self.sp)?;
        self.sp = self.sp.wrapping_add(2);
        Ok(data)
    }

    /// 0x50-0x57: PUSH r16.
    pub(crate) fn op_push_r16(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let reg = REGISTER16_LUT[(self.opcode & OPCODE_REGISTER_SELECT_MASK) as usize];

        // PUSH SP: the 8086/80186 push the freshly decremented SP, the
        // 80286 pushes the value from before the decrement.
        let value = if reg == Register16::SP && self.model != CpuModel::Intel80286 {
            self.sp.wrapping_sub(2)
        }
        else {
            self.register16(reg)
        };

        self.push_u16(value)?;
        self.cycles(self.timing.push_r);
        Ok(())
    }

    /// 0x58-0x5F: POP r16.
    pub(crate) fn op_pop_r16(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let reg = REGISTER16_LUT[(self.opcode & OPCODE_REGISTER_SELECT_MASK) as usize];
        let value = self.pop_u16()?;
        self.set_register16(reg, value);
        self.cycles(self.timing.pop_r);
        Ok(())
    }

    /// 0x06/0x0E/0x16/0x1E: PUSH sreg.
    pub(crate) fn op_push_sreg(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let seg = match (self.opcode >> 3) & 0x03 {
            0 => Segment::ES,
            1 => Segment::CS,
            2 => Segment::SS,
            _ => Segment::DS,
        };
        let selector = self.seg(seg).selector;
        self.push_u16(selector)?;
        self.cycles(self.timing.push_s);
        Ok(())
    }

    /// 0x07/0x17/0x1F: POP sreg (plus POP CS via 0x0F on the 8086).
    pub(crate) fn op_pop_sreg(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let seg = match (self.opcode >> 3) & 0x03 {
            0 => Segment::ES,
            1 => Segment::CS,
            2 => Segment::SS,
            _ => Segment::DS,
        };
        let selector = self.pop_u16()?;
        self.load_segment(seg, selector)?;
        if seg == Segment::CS {
            self.biu_queue_flush();
        }
        self.cycles(self.timing.pop_s);
        Ok(())
    }

    /// 0x8F: POP rm16.
    pub(crate) fn op_pop_rm16(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        // The pop happens before the EA write; an EA using SP sees the
        // incremented value.
        let value = self.biu_read_u16(Segment::SS, self.sp)?;
        self.sp = self.sp.wrapping_add(2);
        self.fetch_modrm()?;
        if self.modrm_reg != 0 && self.model != CpuModel::Intel8088 {
            return Err(CpuFault::InvalidOpcode);
        }
        self.write_rm16(value)?;
        self.cycles(if self.modrm_is_register() {
            self.timing.pop_r
        }
        else {
            self.timing.pop_m
        });
        Ok(())
    }

    /// 0x9C: PUSHF.
    pub(crate) fn op_pushf(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let ps = self.get_ps();
        self.push_u16(ps)?;
        self.cycles(self.timing.pushf);
        Ok(())
    }

    /// 0x9D: POPF.
    pub(crate) fn op_popf(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let ps = self.pop_u16()?;
        self.set_ps(ps);
        self.cycles(self.timing.popf);
        Ok(())
    }

    /// 0x60: PUSHA (80186+). SP is pushed as it was before the first push.
    pub(crate) fn op_pusha(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let sp = self.sp;
        self.push_u16(self.a.x())?;
        self.push_u16(self.c.x())?;
        self.push_u16(self.d.x())?;
        self.push_u16(self.b.x())?;
        self.push_u16(sp)?;
        self.push_u16(self.bp)?;
        self.push_u16(self.si)?;
        self.push_u16(self.di)?;
        self.cycles(self.timing.pusha);
        Ok(())
    }

    /// 0x61: POPA (80186+). The stacked SP is discarded.
    pub(crate) fn op_popa(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.di = self.pop_u16()?;
        self.si = self.pop_u16()?;
        self.bp = self.pop_u16()?;
        let _sp = self.pop_u16()?;
        let bx = self.pop_u16()?;
        self.b.set_x(bx);
        let dx = self.pop_u16()?;
        self.d.set_x(dx);
        let cx = self.pop_u16()?;
        self.c.set_x(cx);
        let ax = self.pop_u16()?;
        self.a.set_x(ax);
        self.cycles(self.timing.popa);
        Ok(())
    }

    /// 0x68 PUSH imm16 / 0x6A PUSH imm8 sign-extended (80186+).
    pub(crate) fn op_push_imm(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let value = if self.opcode == 0x6A {
            self.fetch_i8()? as u16
        }
        else {
            self.fetch_u16()?
        };
        self.push_u16(value)?;
        self.cycles(self.timing.push_i);
        Ok(())
    }

    /// 0xC8: ENTER imm16, imm8 (80186+).
    pub(crate) fn op_enter(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let frame_size = self.fetch_u16()?;
        let nesting = self.fetch_u8()? & 0x1F;

        self.push_u16(self.bp)?;
        let frame_ptr = self.sp;

        if nesting > 0 {
            for _ in 1..nesting {
                self.bp = self.bp.wrapping_sub(2);
                let slot = self.biu_read_u16(Segment::SS, self.bp)?;
                self.push_u16(slot)?;
            }
            self.push_u16(frame_ptr)?;
        }

        self.bp = frame_ptr;
        self.sp = self.sp.wrapping_sub(frame_size);
        self.cycles(self.timing.enter);
        Ok(())
    }

    /// 0xC9: LEAVE (80186+).
    pub(crate) fn op_leave(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.sp = self.bp;
        self.bp = self.pop_u16()?;
        self.cycles(self.timing.leave);
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
        cpu.load_segment(Segment::SS, 0x0300).unwrap();
        cpu.ip = 0;
        cpu.sp = 0x0100;
        cpu.biu_queue_flush();
        cpu
    }

    #[test]
    fn push_pop_round_trip() {
        let mut cpu = cpu(CpuModel::Intel8088);
        cpu.push_u16(0x1234).unwrap();
        assert_eq!(cpu.sp, 0x00FE);
        assert_eq!(cpu.pop_u16().unwrap(), 0x1234);
        assert_eq!(cpu.sp, 0x0100);
    }

    #[test]
    fn push_sp_dichotomy() {
        // 8086: the stored value is SP after the decrement.
        {
            let mut cpu = cpu(CpuModel::Intel8088);
            let mut sys = NullChipset;
            cpu.opcode = 0x54;
            cpu.op_push_r16(&mut sys).unwrap();
            assert_eq!(cpu.bus_mut().read_u16(0x30FE), 0x00FE);
        }

        // 80286: the stored value is the original SP.
        let mut cpu = cpu(CpuModel::Intel80286);
        let mut sys = NullChipset;
        cpu.opcode = 0x54;
        cpu.op_push_r16(&mut sys).unwrap();
        assert_eq!(cpu.bus_mut().read_u16(0x30FE), 0x0100);
    }

    #[test]
    fn pusha_popa_round_trip() {
        let mut cpu = cpu(CpuModel::Intel80186);
        let mut sys = NullChipset;

        cpu.a.set_x(0x1111);
        cpu.b.set_x(0x2222);
        cpu.c.set_x(0x3333);
        cpu.d.set_x(0x4444);
        cpu.bp = 0x5555;
        cpu.si = 0x6666;
        cpu.di = 0x7777;

        cpu.op_pusha(&mut sys).unwrap();
        assert_eq!(cpu.sp, 0x0100 - 16);

        cpu.a.set_x(0);
        cpu.b.set_x(0);
        cpu.op_popa(&mut sys).unwrap();

        assert_eq!(cpu.a.x(), 0x1111);
        assert_eq!(cpu.b.x(), 0x2222);
        assert_eq!(cpu.sp, 0x0100);
        assert_eq!(cpu.di, 0x7777);
    }

    #[test]
    fn enter_leave_frame() {
        let mut cpu = cpu(CpuModel::Intel80186);
        let mut sys = NullChipset;
        cpu.bp = 0xAAAA;

        // ENTER 8, 0
        cpu.bus_mut().copy_in(&[0x08, 0x00, 0x00], 0x1000);
        cpu.ip = 0;
        cpu.biu_queue_flush();
        cpu.op_enter(&mut sys).unwrap();

        assert_eq!(cpu.bp, 0x00FE);
        assert_eq!(cpu.sp, 0x00FE - 8);

        cpu.op_leave(&mut sys).unwrap();
        assert_eq!(cpu.bp, 0xAAAA);
        assert_eq!(cpu.sp, 0x0100);
    }
}
