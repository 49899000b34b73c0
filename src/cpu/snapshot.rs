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

    cpu::snapshot.rs

    Save/restore payload. The layout is stable: general registers, IP,
    segment caches, PS, optional protected-mode state, scratch, speed, and
    the RAM image. Restore validates names and the model rather than
    guessing; a payload naming an unknown segment register is rejected.
*/

use crate::cpu::{segment::SegmentRegister, *};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegSave {
    pub name: String,
    pub selector: u16,
    pub base: u32,
    pub limit: u32,
    pub access: u8,
    pub null_loaded: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtState {
    pub msw: u16,
    pub cpl: u8,
    pub gdt_base: u32,
    pub gdt_limit: u16,
    pub idt_base: u32,
    pub idt_limit: u16,
    pub ldt_save: SegSave,
    pub tss_save: SegSave,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScratchSave {
    pub seg_data_name: String,
    pub seg_stack_name: String,
    pub op_flags: u32,
    pub op_prefixes: u32,
    pub int_flags: u32,
    pub reg_ea: i32,
    pub reg_ea_write: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpeedSave {
    pub burst_divisor: u32,
    pub total_cycles: u64,
    pub multiplier: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub model: String,
    pub general_regs: [u16; 8],
    pub ip: u16,
    pub seg_saves: Vec<SegSave>,
    pub ps: u16,
    pub prot_state: Option<ProtState>,
    pub scratch: ScratchSave,
    pub speed: SpeedSave,
    pub memory: Vec<(u32, Vec<u8>)>,
}

const OPFLAG_IN_PREFIX: u32 = 0x01;
const OPFLAG_REP_RESUME: u32 = 0x02;
const OPFLAG_INT_INHIBIT: u32 = 0x04;

fn seg_name(seg: Segment) -> &'static str {
    match seg {
        Segment::None => "--",
        Segment::ES => "ES",
        Segment::CS => "CS",
        Segment::SS => "SS",
        Segment::DS => "DS",
    }
}

fn seg_by_name(name: &str) -> Result<Segment, CpuError> {
    match name {
        "ES" => Ok(Segment::ES),
        "CS" => Ok(Segment::CS),
        "SS" => Ok(Segment::SS),
        "DS" => Ok(Segment::DS),
        _ => Err(CpuError::BadSnapshot(format!("unknown segment register '{}'", name))),
    }
}

fn save_seg(reg: &SegmentRegister) -> SegSave {
    SegSave {
        name: seg_name(reg.name).to_string(),
        selector: reg.selector,
        base: reg.base,
        limit: reg.limit,
        access: reg.access,
        null_loaded: reg.null_loaded,
    }
}

impl Cpu {
    pub fn save(&self) -> CpuSnapshot {
        let prot_state = if self.model == CpuModel::Intel80286 {
            let mut ldt_save = save_seg(&self.ldtr);
            ldt_save.name = "LDT".to_string();
            let mut tss_save = save_seg(&self.tr);
            tss_save.name = "TSS".to_string();
            Some(ProtState {
                msw: self.msw,
                cpl: self.cpl,
                gdt_base: self.gdt.base,
                gdt_limit: self.gdt.limit,
                idt_base: self.idt.base,
                idt_limit: self.idt.limit,
                ldt_save,
                tss_save,
            })
        }
        else {
            None
        };

        let mut op_flags = 0;
        if self.in_prefix {
            op_flags |= OPFLAG_IN_PREFIX;
        }
        if self.rep_resume {
            op_flags |= OPFLAG_REP_RESUME;
        }
        if self.int_inhibit {
            op_flags |= OPFLAG_INT_INHIBIT;
        }

        CpuSnapshot {
            model: self.model.to_string(),
            general_regs: [
                self.a.x(),
                self.b.x(),
                self.c.x(),
                self.d.x(),
                self.sp,
                self.bp,
                self.si,
                self.di,
            ],
            ip: self.ip,
            seg_saves: vec![
                save_seg(&self.cs),
                save_seg(&self.ds),
                save_seg(&self.ss),
                save_seg(&self.es),
            ],
            ps: self.get_ps(),
            prot_state,
            scratch: ScratchSave {
                seg_data_name: seg_name(self.seg_data).to_string(),
                seg_stack_name: seg_name(self.seg_stack).to_string(),
                op_flags,
                op_prefixes: self.op_prefixes,
                int_flags: self.int_flags,
                reg_ea: if self.ea_loaded { self.ea_off as i32 } else { -1 },
                reg_ea_write: -1,
            },
            speed: SpeedSave {
                burst_divisor: 1,
                total_cycles: self.total_cycles,
                multiplier: 1,
            },
            memory: self.bus.ram_snapshot(),
        }
    }

    pub fn restore(&mut self, snapshot: &CpuSnapshot) -> Result<(), CpuError> {
        if snapshot.model != self.model.to_string() {
            return Err(CpuError::BadSnapshot(format!(
                "snapshot model {} does not match CPU model {}",
                snapshot.model, self.model
            )));
        }

        // Validate segment names before touching any state.
        for save in &snapshot.seg_saves {
            seg_by_name(&save.name)?;
        }
        let seg_data = seg_by_name(&snapshot.scratch.seg_data_name)?;
        let seg_stack = seg_by_name(&snapshot.scratch.seg_stack_name)?;

        let [ax, bx, cx, dx, sp, bp, si, di] = snapshot.general_regs;
        self.a.set_x(ax);
        self.b.set_x(bx);
        self.c.set_x(cx);
        self.d.set_x(dx);
        self.sp = sp;
        self.bp = bp;
        self.si = si;
        self.di = di;
        self.ip = snapshot.ip;

        for save in &snapshot.seg_saves {
            let seg = seg_by_name(&save.name)?;
            let reg = self.seg_mut(seg);
            reg.selector = save.selector;
            reg.base = save.base;
            reg.limit = save.limit;
            reg.access = save.access;
            reg.null_loaded = save.null_loaded;
        }

        self.set_ps(snapshot.ps);

        if let Some(prot) = &snapshot.prot_state {
            if self.model != CpuModel::Intel80286 {
                return Err(CpuError::BadSnapshot(
                    "protected-mode state in a snapshot for a real-mode-only model".to_string(),
                ));
            }
            self.msw = prot.msw;
            self.cpl = prot.cpl;
            self.gdt = DescriptorTable {
                base:  prot.gdt_base,
                limit: prot.gdt_limit,
            };
            self.idt = DescriptorTable {
                base:  prot.idt_base,
                limit: prot.idt_limit,
            };
            self.ldtr.selector = prot.ldt_save.selector;
            self.ldtr.base = prot.ldt_save.base;
            self.ldtr.limit = prot.ldt_save.limit;
            self.ldtr.access = prot.ldt_save.access;
            self.ldtr.null_loaded = prot.ldt_save.null_loaded;
            self.tr.selector = prot.tss_save.selector;
            self.tr.base = prot.tss_save.base;
            self.tr.limit = prot.tss_save.limit;
            self.tr.access = prot.tss_save.access;
            self.tr.null_loaded = prot.tss_save.null_loaded;
        }

        self.seg_data = seg_data;
        self.seg_stack = seg_stack;
        self.op_prefixes = snapshot.scratch.op_prefixes;
        self.int_flags = snapshot.scratch.int_flags;
        self.in_prefix = snapshot.scratch.op_flags & OPFLAG_IN_PREFIX != 0;
        self.rep_resume = snapshot.scratch.op_flags & OPFLAG_REP_RESUME != 0;
        self.int_inhibit = snapshot.scratch.op_flags & OPFLAG_INT_INHIBIT != 0;
        if snapshot.scratch.reg_ea >= 0 {
            self.ea_off = snapshot.scratch.reg_ea as u16;
            self.ea_loaded = true;
        }
        else {
            self.ea_loaded = false;
        }

        self.total_cycles = snapshot.speed.total_cycles;
        self.bus.restore_ram(&snapshot.memory);

        let lip = self.lip();
        self.queue.flush(lip);
        self.error = None;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::*;

    #[test]
    fn snapshot_round_trip() {
        let mut cpu = Cpu::new(CpuModel::Intel8088, CpuOptions::default());
        cpu.bus_mut().install_ram(0, 0x4000);
        cpu.a.set_x(0x1234);
        cpu.load_segment(Segment::DS, 0x0200).unwrap();
        cpu.bus_mut().write_u16(0x2000, 0xABCD);
        cpu.set_ps(CPU_FLAG_CARRY | CPU_FLAG_ZERO | CPU_FLAG_RESERVED1);

        let snapshot = cpu.save();

        let mut restored = Cpu::new(CpuModel::Intel8088, CpuOptions::default());
        restored.bus_mut().install_ram(0, 0x4000);
        restored.restore(&snapshot).unwrap();

        assert_eq!(restored.register16(Register16::AX), 0x1234);
        assert_eq!(restored.register16(Register16::DS), 0x0200);
        assert_eq!(restored.get_ps(), cpu.get_ps());
        assert_eq!(restored.bus_mut().read_u16(0x2000), 0xABCD);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let mut cpu = Cpu::new(CpuModel::Intel80286, CpuOptions::default());
        cpu.bus_mut().install_ram(0, 0x1000);
        let snapshot = cpu.save();

        let text = serde_json::to_string(&snapshot).unwrap();
        let parsed: CpuSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.model, "80286");
        assert!(parsed.prot_state.is_some());
    }

    #[test]
    fn unknown_segment_name_rejected() {
        let mut cpu = Cpu::new(CpuModel::Intel8088, CpuOptions::default());
        cpu.bus_mut().install_ram(0, 0x1000);
        let mut snapshot = cpu.save();
        snapshot.seg_saves[1].name = "FS".to_string();

        assert!(matches!(cpu.restore(&snapshot), Err(CpuError::BadSnapshot(_))));
    }

    #[test]
    fn model_mismatch_rejected() {
        let mut cpu8088 = Cpu::new(CpuModel::Intel8088, CpuOptions::default());
        cpu8088.bus_mut().install_ram(0, 0x1000);
        let snapshot = cpu8088.save();

        let mut cpu286 = Cpu::new(CpuModel::Intel80286, CpuOptions::default());
        assert!(matches!(cpu286.restore(&snapshot), Err(CpuError::BadSnapshot(_))));
    }
}
