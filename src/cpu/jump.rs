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

    cpu::jump.rs

    Flow control: conditional jumps, loops, near and far calls and returns.
    Far transfers in protected mode route through the descriptor loaders in
    protected.rs; real mode transfers are plain selector arithmetic.
*/

use crate::{
    cpu::*,
    devices::Chipset,
};

impl Cpu {
    /// Evaluate a Jcc condition from the low nibble of the opcode.
    pub(crate) fn jcc_condition(&self, cond: u8) -> bool {
        let result = match cond >> 1 {
            0 => self.get_flag(Flag::Overflow),
            1 => self.get_flag(Flag::Carry),
            2 => self.get_flag(Flag::Zero),
            3 => self.get_flag(Flag::Carry) || self.get_flag(Flag::Zero),
            4 => self.get_flag(Flag::Sign),
            5 => self.get_flag(Flag::Parity),
            6 => self.get_flag(Flag::Sign) != self.get_flag(Flag::Overflow),
            _ => {
                (self.get_flag(Flag::Sign) != self.get_flag(Flag::Overflow)) || self.get_flag(Flag::Zero)
            }
        };
        // Odd encodings negate.
        result != (cond & 0x01 != 0)
    }

    #[inline]
    pub(crate) fn reljmp8(&mut self, rel: i8) {
        self.ip = self.ip.wrapping_add(rel as u16);
        self.biu_queue_flush();
    }

    #[inline]
    pub(crate) fn reljmp16(&mut self, rel: u16) {
        self.ip = self.ip.wrapping_add(rel);
        self.biu_queue_flush();
    }

    /// 0x70-0x7F (and their 0x60-0x6F aliases on the 8086).
    pub(crate) fn op_jcc(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let rel = self.fetch_i8()?;
        if self.jcc_condition(self.opcode & 0x0F) {
            self.reljmp8(rel);
            self.cycles(self.timing.jcc_t);
        }
        else {
            self.cycles(self.timing.jcc_nt);
        }
        Ok(())
    }

    /// 0xE0 LOOPNZ / 0xE1 LOOPZ / 0xE2 LOOP.
    pub(crate) fn op_loop(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let rel = self.fetch_i8()?;
        self.c.decr_x();

        let taken = self.c.x() != 0
            && match self.opcode {
                0xE0 => !self.get_flag(Flag::Zero),
                0xE1 => self.get_flag(Flag::Zero),
                _ => true,
            };

        let (t, nt) = match self.opcode {
            0xE2 => (self.timing.loop_t, self.timing.loop_nt),
            _ => (self.timing.loope_t, self.timing.loope_nt),
        };

        if taken {
            self.reljmp8(rel);
            self.cycles(t);
        }
        else {
            self.cycles(nt);
        }
        Ok(())
    }

    /// 0xE3: JCXZ.
    pub(crate) fn op_jcxz(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let rel = self.fetch_i8()?;
        if self.c.x() == 0 {
            self.reljmp8(rel);
            self.cycles(self.timing.jcxz_t);
        }
        else {
            self.cycles(self.timing.jcxz_nt);
        }
        Ok(())
    }

    /// 0xEB: JMP rel8.
    pub(crate) fn op_jmp_rel8(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let rel = self.fetch_i8()?;
        self.reljmp8(rel);
        self.cycles(self.timing.jmp_rel);
        Ok(())
    }

    /// 0xE9: JMP rel16.
    pub(crate) fn op_jmp_rel16(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let rel = self.fetch_u16()?;
        self.reljmp16(rel);
        self.cycles(self.timing.jmp_rel);
        Ok(())
    }

    /// 0xEA: JMP ptr16:16.
    pub(crate) fn op_jmp_far(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let offset = self.fetch_u16()?;
        let selector = self.fetch_u16()?;
        self.far_jump(selector, offset)?;
        self.cycles(self.timing.jmp_far);
        Ok(())
    }

    /// 0xE8: CALL rel16.
    pub(crate) fn op_call_rel16(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let rel = self.fetch_u16()?;
        self.push_u16(self.ip)?;
        self.reljmp16(rel);
        self.cycles(self.timing.call_near);
        Ok(())
    }

    /// 0x9A: CALL ptr16:16.
    pub(crate) fn op_call_far(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let offset = self.fetch_u16()?;
        let selector = self.fetch_u16()?;
        self.far_call(selector, offset)?;
        self.cycles(self.timing.call_far);
        Ok(())
    }

    /// 0xC3 RET / 0xC2 RET imm16 (0xC0/0xC1 alias these on the 8086).
    pub(crate) fn op_ret_near(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let imm_form = matches!(self.opcode, 0xC2 | 0xC0);
        let release = if imm_form { self.fetch_u16()? } else { 0 };
        let ret_ip = self.pop_u16()?;
        self.ip = ret_ip;
        self.sp = self.sp.wrapping_add(release);
        self.biu_queue_flush();
        self.cycles(if imm_form {
            self.timing.ret_near_imm
        }
        else {
            self.timing.ret_near
        });
        Ok(())
    }

    /// 0xCB RETF / 0xCA RETF imm16 (0xC8/0xC9 alias these on the 8086).
    pub(crate) fn op_ret_far(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let release = if matches!(self.opcode, 0xCA | 0xC8) { self.fetch_u16()? } else { 0 };
        let ret_ip = self.pop_u16()?;
        let ret_cs = self.pop_u16()?;

        if self.in_protected_mode() {
            self.protected_far_return(ret_cs, ret_ip, release)?;
        }
        else {
            self.load_segment(Segment::CS, ret_cs)?;
            self.ip = ret_ip;
            self.sp = self.sp.wrapping_add(release);
            self.biu_queue_flush();
        }

        self.cycles(if matches!(self.opcode, 0xCA | 0xC8) {
            self.timing.ret_far_imm
        }
        else {
            self.timing.ret_far
        });
        Ok(())
    }

    /// Far jump dispatch: selector arithmetic in real mode, descriptor
    /// (and possibly gate/task) resolution in protected mode.
    pub(crate) fn far_jump(&mut self, selector: u16, offset: u16) -> Result<(), CpuFault> {
        if self.in_protected_mode() {
            self.protected_far_transfer(selector, offset, false)?;
        }
        else {
            self.load_segment(Segment::CS, selector)?;
            self.ip = offset;
            self.biu_queue_flush();
        }
        Ok(())
    }

    /// Far call dispatch. The return frame is pushed on the target stack
    /// (which may switch rings in protected mode).
    pub(crate) fn far_call(&mut self, selector: u16, offset: u16) -> Result<(), CpuFault> {
        if self.in_protected_mode() {
            self.protected_far_transfer(selector, offset, true)?;
        }
        else {
            self.push_u16(self.cs.selector)?;
            self.push_u16(self.ip)?;
            self.load_segment(Segment::CS, selector)?;
            self.ip = offset;
            self.biu_queue_flush();
        }
        Ok(())
    }
}
