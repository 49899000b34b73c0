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

    cpu::segment.rs

    Implements the segment unit.

    Each segment register caches (selector, base, limit, access). In real
    mode the cache is filled arithmetically; in protected mode a selector
    load walks the GDT or LDT, validates the descriptor, and caches the
    result. All memory operands funnel through the limit checks here before
    touching the bus.
*/

use crate::cpu::*;

// Access byte layout.
pub const ACC_ACCESSED: u8 = 0x01;
pub const ACC_RW: u8 = 0x02;
pub const ACC_EXPAND_CONFORM: u8 = 0x04;
pub const ACC_EXECUTABLE: u8 = 0x08;
pub const ACC_SEGMENT: u8 = 0x10;
pub const ACC_DPL_MASK: u8 = 0x60;
pub const ACC_DPL_SHIFT: u8 = 5;
pub const ACC_PRESENT: u8 = 0x80;

// System descriptor types (access & 0x0F when the segment bit is clear).
pub const DESC_TSS_AVAIL: u8 = 0x01;
pub const DESC_LDT: u8 = 0x02;
pub const DESC_TSS_BUSY: u8 = 0x03;
pub const DESC_CALL_GATE: u8 = 0x04;
pub const DESC_TASK_GATE: u8 = 0x05;
pub const DESC_INT_GATE: u8 = 0x06;
pub const DESC_TRAP_GATE: u8 = 0x07;

// Access byte used for real mode segments: present, writable data,
// accessed. Real mode never checks it, but the cache keeps it coherent for
// save/restore and for the transition into protected mode.
pub const ACC_REAL_MODE: u8 = ACC_PRESENT | ACC_SEGMENT | ACC_RW | ACC_ACCESSED;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DescriptorTable {
    pub base:  u32,
    pub limit: u16,
}

/// A decoded 80286 descriptor, straight from its table slot.
#[derive(Copy, Clone, Debug)]
pub struct Descriptor {
    pub limit:  u32,
    pub base:   u32,
    pub access: u8,
}

impl Descriptor {
    pub fn from_raw(raw: [u16; 4]) -> Self {
        Descriptor {
            limit:  raw[0] as u32 | (((raw[3] & 0x0F00) as u32) << 8),
            base:   raw[1] as u32 | (((raw[2] & 0xFF) as u32) << 16),
            access: (raw[2] >> 8) as u8,
        }
    }

    #[inline]
    pub fn present(&self) -> bool {
        self.access & ACC_PRESENT != 0
    }

    #[inline]
    pub fn dpl(&self) -> u8 {
        (self.access & ACC_DPL_MASK) >> ACC_DPL_SHIFT
    }

    #[inline]
    pub fn is_segment(&self) -> bool {
        self.access & ACC_SEGMENT != 0
    }

    #[inline]
    pub fn is_executable(&self) -> bool {
        self.is_segment() && self.access & ACC_EXECUTABLE != 0
    }

    #[inline]
    pub fn is_writable_data(&self) -> bool {
        self.is_segment() && !self.is_executable() && self.access & ACC_RW != 0
    }

    #[inline]
    pub fn system_type(&self) -> u8 {
        self.access & 0x0F
    }
}

#[derive(Copy, Clone, Debug)]
pub struct SegmentRegister {
    pub name: Segment,
    pub selector: u16,
    pub base: u32,
    pub limit: u32,
    pub access: u8,
    pub null_loaded: bool,
}

impl SegmentRegister {
    pub fn new(name: Segment) -> Self {
        SegmentRegister {
            name,
            selector: 0,
            base: 0,
            limit: 0xFFFF,
            access: ACC_REAL_MODE,
            null_loaded: false,
        }
    }

    /// Real mode load: base is the selector shifted, limit pins at 64K.
    pub fn load_real(&mut self, selector: u16) {
        self.selector = selector;
        self.base = (selector as u32) << 4;
        self.limit = 0xFFFF;
        self.access = ACC_REAL_MODE;
        self.null_loaded = false;
    }

    pub(crate) fn cache(&mut self, selector: u16, desc: &Descriptor) {
        self.selector = selector;
        self.base = desc.base;
        self.limit = desc.limit;
        self.access = desc.access;
        self.null_loaded = false;
    }

    #[inline]
    fn is_expand_down(&self) -> bool {
        self.access & ACC_SEGMENT != 0
            && self.access & ACC_EXECUTABLE == 0
            && self.access & ACC_EXPAND_CONFORM != 0
    }
}

impl Cpu {
    /// Read a descriptor slot out of the GDT or LDT.
    pub(crate) fn fetch_descriptor(&mut self, selector: u16) -> Result<Descriptor, CpuFault> {
        let index = (selector & 0xFFF8) as u32;
        let (table_base, table_limit) = if selector & 0x0004 != 0 {
            if self.ldtr.null_loaded {
                return Err(CpuFault::GeneralProtection(selector & 0xFFFC));
            }
            (self.ldtr.base, self.ldtr.limit)
        }
        else {
            (self.gdt.base, self.gdt.limit as u32)
        };

        if index + 7 > table_limit {
            return Err(CpuFault::GeneralProtection(selector & 0xFFFC));
        }

        let slot = table_base + index;
        let raw = [
            self.bus.read_u16(slot),
            self.bus.read_u16(slot + 2),
            self.bus.read_u16(slot + 4),
            self.bus.read_u16(slot + 6),
        ];
        Ok(Descriptor::from_raw(raw))
    }

    /// Rewrite the access byte of a descriptor slot (busy-bit bookkeeping
    /// for TSS descriptors).
    pub(crate) fn write_descriptor_access(&mut self, selector: u16, access: u8) {
        let index = (selector & 0xFFF8) as u32;
        let table_base = if selector & 0x0004 != 0 { self.ldtr.base } else { self.gdt.base };
        self.bus.write_u8(table_base + index + 5, access);
    }

    /// Load a segment register, dispatching on mode. This is the path for
    /// MOV sreg, POP sreg, LDS/LES and far transfers.
    pub(crate) fn load_segment(&mut self, seg: Segment, selector: u16) -> Result<(), CpuFault> {
        if !self.in_protected_mode() {
            self.seg_mut(seg).load_real(selector);
            if seg == Segment::CS {
                self.cpl = 0;
            }
            if seg == Segment::SS {
                // An SS load opens a one-instruction interrupt-inhibit
                // window so SS:SP pairs update atomically.
                self.int_inhibit = true;
            }
            return Ok(());
        }

        // A null selector may be parked in DS/ES; using it later faults.
        // CS and SS cannot be null-loaded at all.
        if selector & 0xFFFC == 0 {
            match seg {
                Segment::CS | Segment::SS => return Err(CpuFault::NotPresent(0)),
                _ => {
                    let reg = self.seg_mut(seg);
                    reg.selector = selector;
                    reg.base = 0;
                    reg.limit = 0;
                    reg.access = 0;
                    reg.null_loaded = true;
                    return Ok(());
                }
            }
        }

        let desc = self.fetch_descriptor(selector)?;

        match seg {
            Segment::CS => {
                if !desc.is_executable() {
                    return Err(CpuFault::GeneralProtection(selector & 0xFFFC));
                }
                if !desc.present() {
                    return Err(CpuFault::NotPresent(selector & 0xFFFC));
                }
                self.cs.cache(selector, &desc);
                self.cpl = (selector & 0x03) as u8;
            }
            Segment::SS => {
                if !desc.is_writable_data() {
                    return Err(CpuFault::GeneralProtection(selector & 0xFFFC));
                }
                if !desc.present() {
                    return Err(CpuFault::StackFault(selector & 0xFFFC));
                }
                self.ss.cache(selector, &desc);
                self.int_inhibit = true;
            }
            Segment::DS | Segment::ES => {
                if !desc.is_segment() || desc.is_executable() {
                    return Err(CpuFault::GeneralProtection(selector & 0xFFFC));
                }
                if !desc.present() {
                    return Err(CpuFault::NotPresent(selector & 0xFFFC));
                }
                self.seg_mut(seg).cache(selector, &desc);
            }
            Segment::None => panic!("Segment::None cannot be loaded"),
        }

        Ok(())
    }

    /// LLDT: load the local descriptor table register from the GDT.
    pub(crate) fn load_ldtr(&mut self, selector: u16) -> Result<(), CpuFault> {
        if selector & 0xFFFC == 0 {
            self.ldtr = SegmentRegister::new(Segment::None);
            self.ldtr.null_loaded = true;
            return Ok(());
        }
        if selector & 0x0004 != 0 {
            return Err(CpuFault::GeneralProtection(selector & 0xFFFC));
        }

        let desc = self.fetch_descriptor(selector)?;
        if desc.is_segment() || desc.system_type() != DESC_LDT {
            return Err(CpuFault::GeneralProtection(selector & 0xFFFC));
        }
        if !desc.present() {
            return Err(CpuFault::NotPresent(selector & 0xFFFC));
        }

        self.ldtr.cache(selector, &desc);
        Ok(())
    }

    /// LTR: load the task register and mark the TSS descriptor busy.
    pub(crate) fn load_tr(&mut self, selector: u16) -> Result<(), CpuFault> {
        if selector & 0xFFFC == 0 || selector & 0x0004 != 0 {
            return Err(CpuFault::GeneralProtection(selector & 0xFFFC));
        }

        let desc = self.fetch_descriptor(selector)?;
        if desc.is_segment() || desc.system_type() != DESC_TSS_AVAIL {
            return Err(CpuFault::GeneralProtection(selector & 0xFFFC));
        }
        if !desc.present() {
            return Err(CpuFault::NotPresent(selector & 0xFFFC));
        }

        self.tr.cache(selector, &desc);
        self.write_descriptor_access(selector, desc.access | DESC_TSS_BUSY);
        Ok(())
    }

    /// Validate a read of `extra + 1` bytes at seg:off and return the
    /// linear address. `extra` is byte count minus one.
    pub(crate) fn segment_check_read(&self, seg: Segment, off: u16, extra: u16) -> Result<u32, CpuFault> {
        let reg = self.seg(seg);

        if self.model != CpuModel::Intel80286 {
            // 8088/80186: no faults; wrap is the bus mask's business.
            return Ok(reg.base.wrapping_add(off as u32));
        }

        if reg.null_loaded {
            return Err(CpuFault::GeneralProtection(0));
        }

        if self.in_protected_mode() {
            // Execute-only code segments may not be read as data.
            if reg.access & ACC_SEGMENT != 0
                && reg.access & ACC_EXECUTABLE != 0
                && reg.access & ACC_RW == 0
                && seg != Segment::CS
            {
                return Err(CpuFault::GeneralProtection(0));
            }
        }

        self.segment_check_limit(reg, off, extra)
    }

    /// Validate a write of `extra + 1` bytes at seg:off and return the
    /// linear address.
    pub(crate) fn segment_check_write(&self, seg: Segment, off: u16, extra: u16) -> Result<u32, CpuFault> {
        let reg = self.seg(seg);

        if self.model != CpuModel::Intel80286 {
            return Ok(reg.base.wrapping_add(off as u32));
        }

        if reg.null_loaded {
            return Err(CpuFault::GeneralProtection(0));
        }

        if self.in_protected_mode() {
            let writable_data = reg.access & ACC_SEGMENT != 0
                && reg.access & ACC_EXECUTABLE == 0
                && reg.access & ACC_RW != 0;
            if !writable_data {
                return Err(if seg == Segment::SS {
                    CpuFault::StackFault(0)
                }
                else {
                    CpuFault::GeneralProtection(0)
                });
            }
        }

        self.segment_check_limit(reg, off, extra)
    }

    fn segment_check_limit(&self, reg: &SegmentRegister, off: u16, extra: u16) -> Result<u32, CpuFault> {
        let off = off as u32;
        let extra = extra as u32;

        let ok = if reg.is_expand_down() {
            // Expand-down: valid offsets live above the limit.
            off > reg.limit && off + extra <= 0xFFFF
        }
        else {
            off + extra <= reg.limit
        };

        if !ok {
            return Err(if reg.name == Segment::SS {
                CpuFault::StackFault(0)
            }
            else {
                CpuFault::GeneralProtection(0)
            });
        }

        Ok(reg.base.wrapping_add(off))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::{Cpu, CpuModel, CpuOptions};

    fn cpu_286() -> Cpu {
        let mut cpu = Cpu::new(CpuModel::Intel80286, CpuOptions::default());
        cpu.bus_mut().install_ram(0, 0x10000);
        cpu
    }

    fn write_descriptor(cpu: &mut Cpu, table_base: u32, index: u16, base: u32, limit: u16, access: u8) {
        let slot = table_base + (index & 0xFFF8) as u32;
        let bus = cpu.bus_mut();
        bus.write_u16(slot, limit);
        bus.write_u16(slot + 2, (base & 0xFFFF) as u16);
        bus.write_u8(slot + 4, ((base >> 16) & 0xFF) as u8);
        bus.write_u8(slot + 5, access);
        bus.write_u16(slot + 6, 0);
    }

    fn enter_protected(cpu: &mut Cpu, gdt_base: u32, gdt_limit: u16) {
        cpu.gdt = DescriptorTable {
            base:  gdt_base,
            limit: gdt_limit,
        };
        cpu.msw |= MSW_PE;
    }

    #[test]
    fn real_mode_load_is_arithmetic() {
        let mut cpu = Cpu::new(CpuModel::Intel8088, CpuOptions::default());
        cpu.load_segment(Segment::DS, 0x1234).unwrap();

        assert_eq!(cpu.ds.selector, 0x1234);
        assert_eq!(cpu.ds.base, 0x12340);
        assert_eq!(cpu.ds.limit, 0xFFFF);
    }

    #[test]
    fn protected_load_caches_descriptor() {
        let mut cpu = cpu_286();
        write_descriptor(&mut cpu, 0x800, 0x08, 0x023456, 0x7FFF, 0x92);
        enter_protected(&mut cpu, 0x800, 0x1F);

        cpu.load_segment(Segment::DS, 0x0008).unwrap();
        assert_eq!(cpu.ds.base, 0x023456);
        assert_eq!(cpu.ds.limit, 0x7FFF);
        assert_eq!(cpu.ds.access, 0x92);
    }

    #[test]
    fn selector_past_table_limit_faults() {
        let mut cpu = cpu_286();
        enter_protected(&mut cpu, 0x800, 0x0F);

        assert_eq!(
            cpu.load_segment(Segment::DS, 0x0010),
            Err(CpuFault::GeneralProtection(0x0010))
        );
    }

    #[test]
    fn executable_into_data_segment_faults() {
        let mut cpu = cpu_286();
        write_descriptor(&mut cpu, 0x800, 0x08, 0, 0xFFFF, 0x9A);
        enter_protected(&mut cpu, 0x800, 0x1F);

        assert_eq!(
            cpu.load_segment(Segment::DS, 0x0008),
            Err(CpuFault::GeneralProtection(0x0008))
        );
    }

    #[test]
    fn not_present_stack_segment_raises_stack_fault() {
        let mut cpu = cpu_286();
        write_descriptor(&mut cpu, 0x800, 0x08, 0, 0xFFFF, 0x12);
        enter_protected(&mut cpu, 0x800, 0x1F);

        assert_eq!(cpu.load_segment(Segment::SS, 0x0008), Err(CpuFault::StackFault(0x0008)));
    }

    #[test]
    fn null_selector_parks_in_ds_and_faults_on_use() {
        let mut cpu = cpu_286();
        enter_protected(&mut cpu, 0x800, 0x1F);

        cpu.load_segment(Segment::DS, 0x0000).unwrap();
        assert!(cpu.ds.null_loaded);
        assert_eq!(
            cpu.segment_check_read(Segment::DS, 0, 0),
            Err(CpuFault::GeneralProtection(0))
        );
    }

    #[test]
    fn cs_reload_updates_cpl() {
        let mut cpu = cpu_286();
        write_descriptor(&mut cpu, 0x800, 0x08, 0x1000, 0xFFFF, 0xFA);
        enter_protected(&mut cpu, 0x800, 0x1F);

        cpu.load_segment(Segment::CS, 0x000B).unwrap();
        assert_eq!(cpu.cpl, 3);
    }

    #[test]
    fn limit_violation_faults_on_286() {
        let mut cpu = cpu_286();
        write_descriptor(&mut cpu, 0x800, 0x08, 0, 0x00FF, 0x92);
        enter_protected(&mut cpu, 0x800, 0x1F);
        cpu.load_segment(Segment::DS, 0x0008).unwrap();

        assert!(cpu.segment_check_read(Segment::DS, 0x00FF, 0).is_ok());
        assert_eq!(
            cpu.segment_check_read(Segment::DS, 0x00FF, 1),
            Err(CpuFault::GeneralProtection(0))
        );
    }

    #[test]
    fn real_mode_8088_never_faults_on_limit() {
        let cpu = Cpu::new(CpuModel::Intel8088, CpuOptions::default());
        assert!(cpu.segment_check_read(Segment::DS, 0xFFFF, 1).is_ok());
    }
}
