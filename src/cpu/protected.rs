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

    cpu::protected.rs

    80286 protected mode surface: the 0F two-byte map (descriptor table
    loads, LAR/LSL/VERR/VERW, CLTS), ARPL, far transfers through call and
    task gates, and the 286 task switch.
*/

use crate::{
    cpu::{segment::*, *},
    devices::Chipset,
};

// 286 TSS field offsets.
const TSS_BACK_LINK: u32 = 0x00;
const TSS_IP: u32 = 0x0E;
const TSS_FLAGS: u32 = 0x10;
const TSS_AX: u32 = 0x12;
const TSS_CX: u32 = 0x14;
const TSS_DX: u32 = 0x16;
const TSS_BX: u32 = 0x18;
const TSS_SP: u32 = 0x1A;
const TSS_BP: u32 = 0x1C;
const TSS_SI: u32 = 0x1E;
const TSS_DI: u32 = 0x20;
const TSS_ES: u32 = 0x22;
const TSS_CS: u32 = 0x24;
const TSS_SS: u32 = 0x26;
const TSS_DS: u32 = 0x28;
const TSS_LDT: u32 = 0x2A;
const TSS_LIMIT_MIN: u32 = 0x2B;

impl Cpu {
    fn require_ring0(&self) -> Result<(), CpuFault> {
        if self.in_protected_mode() && self.cpl != 0 {
            return Err(CpuFault::GeneralProtection(0));
        }
        Ok(())
    }

    fn require_protected(&self) -> Result<(), CpuFault> {
        if !self.in_protected_mode() {
            return Err(CpuFault::InvalidOpcode);
        }
        Ok(())
    }

    /// 0x0F on the 80286: dispatch the second opcode byte.
    pub(crate) fn op_0f(&mut self, sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let opcode2 = self.fetch_u8()?;
        self.opcode = opcode2;
        let handler = self.table_0f[opcode2 as usize];
        handler(self, sys)
    }

    /// 0F 00: SLDT/STR/LLDT/LTR/VERR/VERW.
    pub(crate) fn op_grp6(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.require_protected()?;
        self.fetch_modrm()?;

        match self.modrm_reg {
            0 => {
                // SLDT
                let sel = self.ldtr.selector;
                self.write_rm16(sel)?;
                self.cycles(self.timing.sdt_op);
            }
            1 => {
                // STR
                let sel = self.tr.selector;
                self.write_rm16(sel)?;
                self.cycles(self.timing.sdt_op);
            }
            2 => {
                // LLDT
                self.require_ring0()?;
                let selector = self.read_rm16()?;
                self.load_ldtr(selector)?;
                self.cycles(self.timing.ldt_op);
            }
            3 => {
                // LTR
                self.require_ring0()?;
                let selector = self.read_rm16()?;
                self.load_tr(selector)?;
                self.cycles(self.timing.ldt_op);
            }
            4 | 5 => {
                // VERR/VERW
                let selector = self.read_rm16()?;
                let want_write = self.modrm_reg == 5;
                let ok = self.selector_access_ok(selector, want_write);
                self.set_flag_state(Flag::Zero, ok);
                self.cycles(self.timing.verr_verw);
            }
            _ => return Err(CpuFault::InvalidOpcode),
        }
        Ok(())
    }

    /// 0F 01: SGDT/SIDT/LGDT/LIDT/SMSW/LMSW.
    pub(crate) fn op_grp7(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;

        match self.modrm_reg {
            0 | 1 => {
                // SGDT/SIDT m
                if !self.ea_loaded {
                    return Err(CpuFault::InvalidOpcode);
                }
                let table = if self.modrm_reg == 0 { self.gdt } else { self.idt };
                let (seg, off) = (self.ea_seg, self.ea_off);
                self.biu_write_u16(seg, off, table.limit)?;
                self.biu_write_u16(seg, off.wrapping_add(2), (table.base & 0xFFFF) as u16)?;
                // The 286 writes the undefined high byte as FF.
                self.biu_write_u16(
                    seg,
                    off.wrapping_add(4),
                    0xFF00 | ((table.base >> 16) & 0xFF) as u16,
                )?;
                self.cycles(self.timing.sdt_op);
            }
            2 | 3 => {
                // LGDT/LIDT m
                self.require_ring0()?;
                if !self.ea_loaded {
                    return Err(CpuFault::InvalidOpcode);
                }
                let (seg, off) = (self.ea_seg, self.ea_off);
                let limit = self.biu_read_u16(seg, off)?;
                let base_lo = self.biu_read_u16(seg, off.wrapping_add(2))?;
                let base_hi = self.biu_read_u16(seg, off.wrapping_add(4))?;
                let table = DescriptorTable {
                    base:  base_lo as u32 | (((base_hi & 0xFF) as u32) << 16),
                    limit,
                };
                if self.modrm_reg == 2 {
                    self.gdt = table;
                    log::debug!("LGDT base {:06X} limit {:04X}", table.base, table.limit);
                }
                else {
                    self.idt = table;
                    log::debug!("LIDT base {:06X} limit {:04X}", table.base, table.limit);
                }
                self.cycles(self.timing.ldt_op);
            }
            4 => {
                // SMSW
                let msw = self.msw;
                self.write_rm16(msw)?;
                self.cycles(self.timing.smsw);
            }
            6 => {
                // LMSW: PE can be set, never cleared.
                self.require_ring0()?;
                let value = self.read_rm16()?;
                let entering = value & MSW_PE != 0 && !self.in_protected_mode();
                self.msw = MSW_RESERVED_ON | (self.msw & MSW_PE) | (value & (MSW_PE | MSW_MP | MSW_EM | MSW_TS));
                if entering {
                    log::debug!("LMSW: entering protected mode at {:04X}:{:04X}", self.cs.selector, self.ip);
                }
                self.cycles(self.timing.lmsw);
            }
            _ => return Err(CpuFault::InvalidOpcode),
        }
        Ok(())
    }

    /// 0F 02: LAR r16, rm16.
    pub(crate) fn op_lar(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.require_protected()?;
        self.fetch_modrm()?;
        let selector = self.read_rm16()?;

        match self.selector_visible(selector) {
            Some(desc) => {
                let reg = self.modrm_reg16();
                self.set_register16(reg, (desc.access as u16) << 8);
                self.set_flag(Flag::Zero);
            }
            None => self.clear_flag(Flag::Zero),
        }
        self.cycles(self.timing.lar_lsl);
        Ok(())
    }

    /// 0F 03: LSL r16, rm16.
    pub(crate) fn op_lsl(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.require_protected()?;
        self.fetch_modrm()?;
        let selector = self.read_rm16()?;

        match self.selector_visible(selector) {
            Some(desc) => {
                let reg = self.modrm_reg16();
                self.set_register16(reg, (desc.limit & 0xFFFF) as u16);
                self.set_flag(Flag::Zero);
            }
            None => self.clear_flag(Flag::Zero),
        }
        self.cycles(self.timing.lar_lsl);
        Ok(())
    }

    /// 0F 06: CLTS.
    pub(crate) fn op_clts(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.require_ring0()?;
        self.msw &= !MSW_TS;
        self.cycles(self.timing.clts);
        Ok(())
    }

    /// 0x63: ARPL rm16, r16 (80286).
    pub(crate) fn op_arpl(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.require_protected()?;
        self.fetch_modrm()?;
        let dst = self.read_rm16()?;
        let src = self.register16(self.modrm_reg16());

        if dst & 0x03 < src & 0x03 {
            self.write_rm16((dst & !0x03) | (src & 0x03))?;
            self.set_flag(Flag::Zero);
        }
        else {
            self.clear_flag(Flag::Zero);
        }
        self.cycles(self.timing.arpl);
        Ok(())
    }

    /// Fetch a descriptor for LAR/LSL without faulting; None when the
    /// selector is out of bounds, a null, or privilege-hidden.
    fn selector_visible(&mut self, selector: u16) -> Option<Descriptor> {
        if selector & 0xFFFC == 0 {
            return None;
        }
        let desc = self.fetch_descriptor(selector).ok()?;

        // Conforming code is visible regardless of privilege.
        let conforming = desc.is_executable() && desc.access & ACC_EXPAND_CONFORM != 0;
        if !conforming {
            let rpl = (selector & 0x03) as u8;
            if desc.dpl() < self.cpl || desc.dpl() < rpl {
                return None;
            }
        }
        Some(desc)
    }

    /// VERR/VERW visibility test.
    fn selector_access_ok(&mut self, selector: u16, want_write: bool) -> bool {
        let desc = match self.selector_visible(selector) {
            Some(d) => d,
            None => return false,
        };
        if !desc.is_segment() {
            return false;
        }
        if want_write {
            desc.is_writable_data()
        }
        else {
            // Readable: any data segment, or code with the read bit.
            !desc.is_executable() || desc.access & ACC_RW != 0
        }
    }

    // ----------------------------------------------------------------------
    // Protected-mode far transfers.

    /// JMP/CALL ptr16:16 in protected mode. Resolves code descriptors,
    /// call gates and task transfers.
    pub(crate) fn protected_far_transfer(
        &mut self,
        selector: u16,
        offset: u16,
        is_call: bool,
    ) -> Result<(), CpuFault> {
        let desc = self.fetch_descriptor(selector)?;

        if desc.is_segment() {
            if !desc.is_executable() {
                return Err(CpuFault::GeneralProtection(selector & 0xFFFC));
            }
            if !desc.present() {
                return Err(CpuFault::NotPresent(selector & 0xFFFC));
            }
            if is_call {
                self.push_u16(self.cs.selector)?;
                self.push_u16(self.ip)?;
            }
            self.load_segment(Segment::CS, selector)?;
            self.ip = offset;
            self.biu_queue_flush();
            return Ok(());
        }

        match desc.system_type() {
            DESC_CALL_GATE => self.call_gate_transfer(selector, &desc, is_call),
            DESC_TASK_GATE => {
                // The gate names the TSS selector in its selector slot.
                let slot = self.gate_selector(selector)?;
                self.task_switch(slot, is_call)
            }
            DESC_TSS_AVAIL => self.task_switch(selector, is_call),
            _ => Err(CpuFault::GeneralProtection(selector & 0xFFFC)),
        }
    }

    /// Read the target selector out of a gate descriptor.
    fn gate_selector(&mut self, gate: u16) -> Result<u16, CpuFault> {
        let index = (gate & 0xFFF8) as u32;
        let table_base = if gate & 0x0004 != 0 { self.ldtr.base } else { self.gdt.base };
        Ok(self.bus.read_u16(table_base + index + 2))
    }

    fn call_gate_transfer(&mut self, gate_sel: u16, gate: &Descriptor, is_call: bool) -> Result<(), CpuFault> {
        if !gate.present() {
            return Err(CpuFault::NotPresent(gate_sel & 0xFFFC));
        }
        if gate.dpl() < self.cpl {
            return Err(CpuFault::GeneralProtection(gate_sel & 0xFFFC));
        }

        // Gate layout: word 0 = target offset, word 1 = target selector,
        // low 5 bits of word 2 = parameter count.
        let index = (gate_sel & 0xFFF8) as u32;
        let table_base = if gate_sel & 0x0004 != 0 { self.ldtr.base } else { self.gdt.base };
        let target_offset = self.bus.read_u16(table_base + index);
        let target_sel = self.bus.read_u16(table_base + index + 2);
        let param_ct = (self.bus.read_u16(table_base + index + 4) & 0x1F) as u32;

        let target = self.fetch_descriptor(target_sel)?;
        if !target.is_executable() {
            return Err(CpuFault::GeneralProtection(target_sel & 0xFFFC));
        }
        if !target.present() {
            return Err(CpuFault::NotPresent(target_sel & 0xFFFC));
        }

        let conforming = target.access & ACC_EXPAND_CONFORM != 0;
        let target_dpl = target.dpl();

        if is_call && !conforming && target_dpl < self.cpl {
            // Inner-ring call: new stack from the TSS, copy the parameter
            // words across, then the return frame.
            let (new_ss, new_sp) = self.tss_stack_ptr(target_dpl)?;
            let old_ss = self.ss.selector;
            let old_sp = self.sp;

            let mut params = Vec::with_capacity(param_ct as usize);
            for i in 0..param_ct {
                let off = old_sp.wrapping_add((i * 2) as u16);
                params.push(self.biu_read_u16(Segment::SS, off)?);
            }

            self.cpl = target_dpl;
            self.load_segment(Segment::SS, new_ss)?;
            self.int_inhibit = false;
            self.sp = new_sp;

            self.push_u16(old_ss)?;
            self.push_u16(old_sp)?;
            for param in params.iter().rev() {
                self.push_u16(*param)?;
            }
            self.push_u16(self.cs.selector)?;
            self.push_u16(self.ip)?;

            self.cs.cache((target_sel & 0xFFFC) | target_dpl as u16, &target);
            self.cpl = target_dpl;
        }
        else {
            if !conforming && target_dpl != self.cpl {
                return Err(CpuFault::GeneralProtection(target_sel & 0xFFFC));
            }
            if is_call {
                self.push_u16(self.cs.selector)?;
                self.push_u16(self.ip)?;
            }
            let cpl = self.cpl;
            self.cs.cache((target_sel & 0xFFFC) | cpl as u16, &target);
        }

        self.ip = target_offset;
        self.biu_queue_flush();
        log::trace!("Call gate {:04X} -> {:04X}:{:04X}", gate_sel, target_sel, target_offset);
        Ok(())
    }

    /// RETF in protected mode, including outer-ring returns.
    pub(crate) fn protected_far_return(&mut self, ret_cs: u16, ret_ip: u16, release: u16) -> Result<(), CpuFault> {
        let rpl = (ret_cs & 0x03) as u8;

        if rpl > self.cpl {
            // Discard the callee's parameter copy, then restore the outer
            // stack.
            self.sp = self.sp.wrapping_add(release);
            let new_sp = self.pop_u16()?;
            let new_ss = self.pop_u16()?;

            self.load_segment(Segment::CS, ret_cs)?;
            self.cpl = rpl;
            self.load_segment(Segment::SS, new_ss)?;
            self.int_inhibit = false;
            self.sp = new_sp.wrapping_add(release);

            self.revalidate_data_segment(Segment::DS);
            self.revalidate_data_segment(Segment::ES);
        }
        else {
            self.load_segment(Segment::CS, ret_cs)?;
            self.sp = self.sp.wrapping_add(release);
        }

        self.ip = ret_ip;
        self.biu_queue_flush();
        Ok(())
    }

    // ----------------------------------------------------------------------
    // 286 task switch.

    /// Switch tasks through a TSS selector. `nest` marks CALL/INT entries
    /// that must chain back to the outgoing task.
    pub(crate) fn task_switch(&mut self, selector: u16, nest: bool) -> Result<(), CpuFault> {
        if selector & 0x0004 != 0 {
            return Err(CpuFault::InvalidTss(selector & 0xFFFC));
        }

        let desc = self.fetch_descriptor(selector)?;
        if desc.is_segment() {
            return Err(CpuFault::InvalidTss(selector & 0xFFFC));
        }
        match desc.system_type() {
            DESC_TSS_AVAIL => {}
            // Returning through a back-link lands on a busy TSS.
            DESC_TSS_BUSY if !nest => {}
            _ => return Err(CpuFault::InvalidTss(selector & 0xFFFC)),
        }
        if !desc.present() {
            return Err(CpuFault::NotPresent(selector & 0xFFFC));
        }
        if desc.limit < TSS_LIMIT_MIN {
            return Err(CpuFault::InvalidTss(selector & 0xFFFC));
        }

        // Save the outgoing machine state into the old TSS.
        let old_base = self.tr.base;
        let ps = self.get_ps();
        self.bus.write_u16(old_base + TSS_IP, self.ip);
        self.bus.write_u16(old_base + TSS_FLAGS, ps);
        self.bus.write_u16(old_base + TSS_AX, self.a.x());
        self.bus.write_u16(old_base + TSS_CX, self.c.x());
        self.bus.write_u16(old_base + TSS_DX, self.d.x());
        self.bus.write_u16(old_base + TSS_BX, self.b.x());
        self.bus.write_u16(old_base + TSS_SP, self.sp);
        self.bus.write_u16(old_base + TSS_BP, self.bp);
        self.bus.write_u16(old_base + TSS_SI, self.si);
        self.bus.write_u16(old_base + TSS_DI, self.di);
        self.bus.write_u16(old_base + TSS_ES, self.es.selector);
        self.bus.write_u16(old_base + TSS_CS, self.cs.selector);
        self.bus.write_u16(old_base + TSS_SS, self.ss.selector);
        self.bus.write_u16(old_base + TSS_DS, self.ds.selector);

        let old_tr = self.tr.selector;
        if !nest {
            // Leaving the old task for good: clear its busy bit.
            let old_access = self.bus.read_u8(
                self.gdt.base + (old_tr & 0xFFF8) as u32 + 5,
            );
            self.write_descriptor_access(old_tr, old_access & !0x02);
        }

        // Load the incoming task.
        self.tr.cache(selector, &desc);
        self.write_descriptor_access(selector, desc.access | DESC_TSS_BUSY);

        let new_base = self.tr.base;
        if nest {
            self.bus.write_u16(new_base + TSS_BACK_LINK, old_tr);
        }

        let new_ip = self.bus.read_u16(new_base + TSS_IP);
        let mut new_ps = self.bus.read_u16(new_base + TSS_FLAGS);
        if nest {
            new_ps |= CPU_FLAG_NT;
        }
        let ax = self.bus.read_u16(new_base + TSS_AX);
        let cx = self.bus.read_u16(new_base + TSS_CX);
        let dx = self.bus.read_u16(new_base + TSS_DX);
        let bx = self.bus.read_u16(new_base + TSS_BX);
        let sp = self.bus.read_u16(new_base + TSS_SP);
        let bp = self.bus.read_u16(new_base + TSS_BP);
        let si = self.bus.read_u16(new_base + TSS_SI);
        let di = self.bus.read_u16(new_base + TSS_DI);
        let es = self.bus.read_u16(new_base + TSS_ES);
        let cs = self.bus.read_u16(new_base + TSS_CS);
        let ss = self.bus.read_u16(new_base + TSS_SS);
        let ds = self.bus.read_u16(new_base + TSS_DS);
        let ldt = self.bus.read_u16(new_base + TSS_LDT);

        self.msw |= MSW_TS;
        self.a.set_x(ax);
        self.c.set_x(cx);
        self.d.set_x(dx);
        self.b.set_x(bx);
        self.sp = sp;
        self.bp = bp;
        self.si = si;
        self.di = di;

        self.load_ldtr(ldt)?;
        self.cpl = (cs & 0x03) as u8;
        self.load_segment(Segment::CS, cs)?;
        self.load_segment(Segment::SS, ss)?;
        self.int_inhibit = false;
        self.load_segment(Segment::DS, ds)?;
        self.load_segment(Segment::ES, es)?;

        self.ip = new_ip;
        self.set_ps(new_ps);
        if nest {
            self.ps_direct |= CPU_FLAG_NT;
        }
        self.biu_queue_flush();

        log::debug!("Task switch {:04X} -> {:04X} (nest: {})", old_tr, selector, nest);
        Ok(())
    }
}
