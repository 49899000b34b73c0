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

    cpu::string.rs

    String primitives and REP resumption.

    A repeated string instruction executes one element per dispatch, then
    rewinds IP (and the prefetch tail) to its prefix when more elements
    remain. Interrupts are therefore serviced between elements with the
    saved IP already pointing at the prefix: the 80186+ resumes from the
    first prefix, the 8086 only from the REP prefix itself, losing any
    segment override, which is the documented 8086 flaw.

    The source side honors the active segment override; the ES:DI side
    never does.
*/

use crate::{
    cpu::*,
    devices::Chipset,
};

impl Cpu {
    #[inline]
    fn rep_active(&self) -> bool {
        self.op_prefixes & OPCODE_PREFIX_REP_MASK != 0
    }

    #[inline]
    fn str_delta(&self, word: bool) -> u16 {
        let d: u16 = if word { 2 } else { 1 };
        if self.get_flag(Flag::Direction) {
            d.wrapping_neg()
        }
        else {
            d
        }
    }

    /// Charge the REP setup cost on the first element only.
    fn rep_entry(&mut self) {
        if self.rep_active() && !self.rep_resume {
            self.cycles(self.timing.rep_base);
        }
        self.rep_resume = false;
    }

    /// After one element under REP: count down CX and rewind to the prefix
    /// when the loop continues. `again` carries the REPE/REPNE condition
    /// for the comparison forms.
    fn rep_continue(&mut self, again: bool) {
        if !self.rep_active() {
            return;
        }

        self.c.decr_x();
        if self.c.x() != 0 && again {
            let target = match self.model {
                CpuModel::Intel8088 => self.rep_prefix_ip,
                _ => self.instruction_ip,
            };
            let delta = self.ip.wrapping_sub(target);
            self.biu_rewind(delta);
            self.rep_resume = true;
        }
    }

    /// REPE/REPNE termination for CMPS/SCAS.
    fn rep_z_condition(&self) -> bool {
        match self.rep_type {
            RepType::Repne => !self.get_flag(Flag::Zero),
            _ => self.get_flag(Flag::Zero),
        }
    }

    /// 0xA4/0xA5: MOVS.
    pub(crate) fn op_movs(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        if self.rep_active() && self.c.x() == 0 {
            return Ok(());
        }
        self.rep_entry();

        let word = self.opcode & 0x01 != 0;
        let delta = self.str_delta(word);

        if word {
            let v = self.biu_read_u16(self.seg_data, self.si)?;
            self.biu_write_u16(Segment::ES, self.di, v)?;
        }
        else {
            let v = self.biu_read_u8(self.seg_data, self.si)?;
            self.biu_write_u8(Segment::ES, self.di, v)?;
        }

        self.si = self.si.wrapping_add(delta);
        self.di = self.di.wrapping_add(delta);
        self.cycles(self.timing.str_movs);

        self.rep_continue(true);
        Ok(())
    }

    /// 0xA6/0xA7: CMPS. Computes [SI] - [DI].
    pub(crate) fn op_cmps(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        if self.rep_active() && self.c.x() == 0 {
            return Ok(());
        }
        self.rep_entry();

        let word = self.opcode & 0x01 != 0;
        let delta = self.str_delta(word);

        if word {
            let src = self.biu_read_u16(self.seg_data, self.si)?;
            let dst = self.biu_read_u16(Segment::ES, self.di)?;
            self.alu_sub16(src, dst, false);
        }
        else {
            let src = self.biu_read_u8(self.seg_data, self.si)?;
            let dst = self.biu_read_u8(Segment::ES, self.di)?;
            self.alu_sub8(src, dst, false);
        }

        self.si = self.si.wrapping_add(delta);
        self.di = self.di.wrapping_add(delta);
        self.cycles(self.timing.str_cmps);

        let again = self.rep_z_condition();
        self.rep_continue(again);
        Ok(())
    }

    /// 0xAA/0xAB: STOS.
    pub(crate) fn op_stos(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        if self.rep_active() && self.c.x() == 0 {
            return Ok(());
        }
        self.rep_entry();

        let word = self.opcode & 0x01 != 0;
        let delta = self.str_delta(word);

        if word {
            self.biu_write_u16(Segment::ES, self.di, self.a.x())?;
        }
        else {
            self.biu_write_u8(Segment::ES, self.di, self.a.l())?;
        }

        self.di = self.di.wrapping_add(delta);
        self.cycles(self.timing.str_stos);

        self.rep_continue(true);
        Ok(())
    }

    /// 0xAC/0xAD: LODS.
    pub(crate) fn op_lods(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        if self.rep_active() && self.c.x() == 0 {
            return Ok(());
        }
        self.rep_entry();

        let word = self.opcode & 0x01 != 0;
        let delta = self.str_delta(word);

        if word {
            let v = self.biu_read_u16(self.seg_data, self.si)?;
            self.a.set_x(v);
        }
        else {
            let v = self.biu_read_u8(self.seg_data, self.si)?;
            self.a.set_l(v);
        }

        self.si = self.si.wrapping_add(delta);
        self.cycles(self.timing.str_lods);

        self.rep_continue(true);
        Ok(())
    }

    /// 0xAE/0xAF: SCAS. Computes AL/AX - [ES:DI].
    pub(crate) fn op_scas(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        if self.rep_active() && self.c.x() == 0 {
            return Ok(());
        }
        self.rep_entry();

        let word = self.opcode & 0x01 != 0;
        let delta = self.str_delta(word);

        if word {
            let dst = self.biu_read_u16(Segment::ES, self.di)?;
            self.alu_sub16(self.a.x(), dst, false);
        }
        else {
            let dst = self.biu_read_u8(Segment::ES, self.di)?;
            self.alu_sub8(self.a.l(), dst, false);
        }

        self.di = self.di.wrapping_add(delta);
        self.cycles(self.timing.str_scas);

        let again = self.rep_z_condition();
        self.rep_continue(again);
        Ok(())
    }

    /// 0x6C/0x6D: INS (80186+).
    pub(crate) fn op_ins(&mut self, sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        if self.rep_active() && self.c.x() == 0 {
            return Ok(());
        }
        self.rep_entry();

        let word = self.opcode & 0x01 != 0;
        let delta = self.str_delta(word);
        let port = self.d.x();

        if word {
            let v = self.io_read_u16(sys, port);
            self.biu_write_u16(Segment::ES, self.di, v)?;
        }
        else {
            let v = self.io_read_u8(sys, port);
            self.biu_write_u8(Segment::ES, self.di, v)?;
        }

        self.di = self.di.wrapping_add(delta);
        self.cycles(self.timing.str_ins);

        self.rep_continue(true);
        Ok(())
    }

    /// 0x6E/0x6F: OUTS (80186+).
    pub(crate) fn op_outs(&mut self, sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        if self.rep_active() && self.c.x() == 0 {
            return Ok(());
        }
        self.rep_entry();

        let word = self.opcode & 0x01 != 0;
        let delta = self.str_delta(word);
        let port = self.d.x();

        if word {
            let v = self.biu_read_u16(self.seg_data, self.si)?;
            self.io_write_u16(sys, port, v);
        }
        else {
            let v = self.biu_read_u8(self.seg_data, self.si)?;
            self.io_write_u8(sys, port, v);
        }

        self.si = self.si.wrapping_add(delta);
        self.cycles(self.timing.str_outs);

        self.rep_continue(true);
        Ok(())
    }
}
