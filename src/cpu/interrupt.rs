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

    cpu::interrupt.rs

    Routines to handle interrupts: IVT/IDT entry loads, the INT family,
    IRET, fault dispatch with double-fault escalation, and the
    acknowledge-priority logic polled at each instruction boundary.
*/

use crate::{
    cpu::{segment::*, *},
    devices::Chipset,
};

impl Cpu {
    /// Dispatch an interrupt through the IVT (real mode) or IDT gates
    /// (protected mode). `ret_ip` is the IP value pushed for IRET;
    /// `software` requests the gate privilege check INT n is subject to.
    pub(crate) fn do_interrupt(
        &mut self,
        vector: u8,
        ret_ip: u16,
        error_code: Option<u16>,
        software: bool,
    ) -> Result<(), CpuFault> {
        if self.in_protected_mode() {
            self.protected_interrupt(vector, ret_ip, error_code, software)
        }
        else {
            self.real_interrupt(vector, ret_ip)
        }
    }

    fn real_interrupt(&mut self, vector: u8, ret_ip: u16) -> Result<(), CpuFault> {
        let slot = (vector as u32) * 4;
        if slot + 3 > self.idt.limit as u32 {
            return Err(CpuFault::GeneralProtection((vector as u16) * 4 + 2));
        }

        let new_ip = self.bus.read_u16(self.idt.base + slot);
        let new_cs = self.bus.read_u16(self.idt.base + slot + 2);

        let ps = self.get_ps();
        self.push_u16(ps)?;
        self.push_u16(self.cs.selector)?;
        self.push_u16(ret_ip)?;

        self.clear_flag(Flag::Interrupt);
        self.clear_flag(Flag::Trap);

        self.cs.load_real(new_cs);
        self.ip = new_ip;
        self.biu_queue_flush();

        log::trace!("INT {:02X} -> {:04X}:{:04X}", vector, new_cs, new_ip);
        Ok(())
    }

    fn protected_interrupt(
        &mut self,
        vector: u8,
        ret_ip: u16,
        error_code: Option<u16>,
        software: bool,
    ) -> Result<(), CpuFault> {
        let slot = (vector as u32) * 8;
        let gate_error = (vector as u16) * 8 + 2;
        if slot + 7 > self.idt.limit as u32 {
            return Err(CpuFault::GeneralProtection(gate_error));
        }

        let gate_offset = self.bus.read_u16(self.idt.base + slot);
        let gate_selector = self.bus.read_u16(self.idt.base + slot + 2);
        let gate_access = (self.bus.read_u16(self.idt.base + slot + 4) >> 8) as u8;

        let gate_type = gate_access & 0x1F;
        let trap_gate = match gate_type {
            DESC_INT_GATE => false,
            DESC_TRAP_GATE => true,
            _ => return Err(CpuFault::GeneralProtection(gate_error)),
        };
        if gate_access & ACC_PRESENT == 0 {
            return Err(CpuFault::NotPresent(gate_error));
        }

        let gate_dpl = (gate_access & ACC_DPL_MASK) >> ACC_DPL_SHIFT;
        if software && gate_dpl < self.cpl {
            return Err(CpuFault::GeneralProtection(gate_error));
        }

        // Resolve the handler's code segment.
        let desc = self.fetch_descriptor(gate_selector)?;
        if !desc.is_executable() {
            return Err(CpuFault::GeneralProtection(gate_selector & 0xFFFC));
        }
        if !desc.present() {
            return Err(CpuFault::NotPresent(gate_selector & 0xFFFC));
        }

        let conforming = desc.access & ACC_EXPAND_CONFORM != 0;
        let target_dpl = desc.dpl();

        if !conforming && target_dpl < self.cpl {
            // Inter-privilege transfer: switch to the inner stack named by
            // the TSS, then stash the outer SS:SP there.
            let (new_ss, new_sp) = self.tss_stack_ptr(target_dpl)?;
            let old_ss = self.ss.selector;
            let old_sp = self.sp;

            self.cpl = target_dpl;
            self.load_segment(Segment::SS, new_ss)?;
            self.int_inhibit = false;
            self.sp = new_sp;

            self.push_u16(old_ss)?;
            self.push_u16(old_sp)?;
        }

        let ps = self.get_ps();
        self.push_u16(ps)?;
        self.push_u16(self.cs.selector)?;
        self.push_u16(ret_ip)?;
        if let Some(code) = error_code {
            self.push_u16(code)?;
        }

        if !trap_gate {
            self.clear_flag(Flag::Interrupt);
        }
        self.clear_flag(Flag::Trap);
        self.ps_direct &= !CPU_FLAG_NT;

        let new_cpl = if conforming { self.cpl } else { target_dpl };
        self.cs.cache((gate_selector & 0xFFFC) | new_cpl as u16, &desc);
        self.cpl = new_cpl;
        self.ip = gate_offset;
        self.biu_queue_flush();

        log::trace!(
            "INT {:02X} via {} gate -> {:04X}:{:04X} CPL {}",
            vector,
            if trap_gate { "trap" } else { "interrupt" },
            gate_selector,
            gate_offset,
            self.cpl
        );
        Ok(())
    }

    /// Read the inner-ring stack pointer pair out of the current TSS.
    pub(crate) fn tss_stack_ptr(&mut self, dpl: u8) -> Result<(u16, u16), CpuFault> {
        if self.tr.selector & 0xFFFC == 0 {
            return Err(CpuFault::InvalidTss(0));
        }

        let slot = 2 + (dpl as u32) * 4;
        if slot + 3 > self.tr.limit {
            return Err(CpuFault::InvalidTss(self.tr.selector & 0xFFFC));
        }

        let sp = self.bus.read_u16(self.tr.base + slot);
        let ss = self.bus.read_u16(self.tr.base + slot + 2);
        Ok((ss, sp))
    }

    /// Dispatch an architectural fault, escalating to double fault and
    /// then to shutdown when dispatch itself keeps faulting.
    pub(crate) fn dispatch_fault(&mut self, fault: CpuFault) {
        self.dispatch_fault_depth(fault, 0);
    }

    fn dispatch_fault_depth(&mut self, fault: CpuFault, depth: u32) {
        if depth >= 2 {
            // The 286 shuts down here; we surface it to the host instead.
            self.set_error("triple fault: shutdown");
            self.int_flags |= INTFLAG_HALT;
            return;
        }

        let fault = if depth == 1 { CpuFault::DoubleFault } else { fault };
        let ret_ip = self.fault_return_ip(fault);
        let error_code = if self.in_protected_mode() { fault.error_code() } else { None };

        log::debug!(
            "Fault {:?} vector {} at {:04X}:{:04X}",
            fault,
            fault.vector(),
            self.cs.selector,
            self.instruction_ip
        );

        self.cycles(self.timing.int_n);
        if let Err(next) = self.do_interrupt(fault.vector(), ret_ip, error_code, false) {
            self.dispatch_fault_depth(next, depth + 1);
        }
    }

    /// Which IP a fault frame points at. The 80286 saves the faulting
    /// instruction, prefixes included, so the handler can restart it. The
    /// 8086 divide error famously saves the next instruction.
    fn fault_return_ip(&self, fault: CpuFault) -> u16 {
        match fault {
            CpuFault::DivideError => {
                if self.model == CpuModel::Intel80286 {
                    self.instruction_ip
                }
                else {
                    self.ip
                }
            }
            _ => self.instruction_ip,
        }
    }

    /// INT3/INTO return address: the 80286 points at the trapping
    /// instruction, earlier models at the next one.
    fn trap_return_ip(&self) -> u16 {
        if self.model == CpuModel::Intel80286 {
            self.instruction_ip
        }
        else {
            self.ip
        }
    }

    // ----------------------------------------------------------------------
    // The INT instruction family.

    /// 0xCD: INT imm8.
    pub(crate) fn op_int_n(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let vector = self.fetch_u8()?;
        self.cycles(self.timing.int_n);

        // Host observers may service the interrupt themselves; only
        // explicit INT n is observable.
        if self.run_int_notify(vector) {
            return Ok(());
        }

        self.do_interrupt(vector, self.ip, None, true)
    }

    /// 0xCC: INT3.
    pub(crate) fn op_int3(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.cycles(self.timing.int3);
        let ret_ip = self.trap_return_ip();
        self.do_interrupt(VECTOR_BREAKPOINT, ret_ip, None, false)
    }

    /// 0xCE: INTO.
    pub(crate) fn op_into(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        if self.get_flag(Flag::Overflow) {
            self.cycles(self.timing.into_t);
            let ret_ip = self.trap_return_ip();
            self.do_interrupt(VECTOR_OVERFLOW, ret_ip, None, false)
        }
        else {
            self.cycles(self.timing.into_nt);
            Ok(())
        }
    }

    /// 0xCF: IRET.
    pub(crate) fn op_iret(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.cycles(self.timing.iret);

        if self.in_protected_mode() && self.ps_direct & CPU_FLAG_NT != 0 {
            // Nested task: return through the back-link of the current
            // TSS.
            let back_link = self.bus.read_u16(self.tr.base);
            return self.task_switch(back_link, false);
        }

        let new_ip = self.pop_u16()?;
        let new_cs = self.pop_u16()?;
        let new_ps = self.pop_u16()?;

        if self.in_protected_mode() {
            let rpl = (new_cs & 0x03) as u8;
            let old_iopl = self.ps_direct & CPU_FLAG_IOPL;
            let old_if = self.ps_direct & CPU_FLAG_INT_ENABLE;
            let iopl = (old_iopl >> 12) as u8;

            if rpl > self.cpl {
                // Return to an outer ring: restore its stack and drop any
                // data segments that belong to the inner ring.
                let new_sp = self.pop_u16()?;
                let new_ss = self.pop_u16()?;

                self.load_segment(Segment::CS, new_cs)?;
                self.cpl = rpl;
                self.load_segment(Segment::SS, new_ss)?;
                self.int_inhibit = false;
                self.sp = new_sp;

                self.revalidate_data_segment(Segment::DS);
                self.revalidate_data_segment(Segment::ES);
            }
            else {
                self.load_segment(Segment::CS, new_cs)?;
            }

            self.set_ps(new_ps);
            // IOPL changes only from ring 0; IF only at or above IOPL.
            if self.cpl > 0 {
                self.ps_direct = (self.ps_direct & !CPU_FLAG_IOPL) | old_iopl;
            }
            if self.cpl > iopl {
                self.ps_direct = (self.ps_direct & !CPU_FLAG_INT_ENABLE) | old_if;
            }
        }
        else {
            self.cs.load_real(new_cs);
            self.set_ps(new_ps);
        }

        self.ip = new_ip;
        self.biu_queue_flush();
        Ok(())
    }

    /// After an outer-ring return, a data segment whose descriptor is more
    /// privileged than the new CPL must not stay addressable.
    pub(crate) fn revalidate_data_segment(&mut self, seg: Segment) {
        let cpl = self.cpl;
        let reg = self.seg_mut(seg);
        if reg.null_loaded {
            return;
        }
        let is_data = reg.access & ACC_SEGMENT != 0 && reg.access & ACC_EXECUTABLE == 0;
        let dpl = (reg.access & ACC_DPL_MASK) >> ACC_DPL_SHIFT;
        if is_data && dpl < cpl {
            log::trace!("Nulling {} on privilege return", seg);
            reg.selector = 0;
            reg.base = 0;
            reg.limit = 0;
            reg.access = 0;
            reg.null_loaded = true;
        }
    }

    // ----------------------------------------------------------------------
    // Instruction-boundary acknowledge logic.

    /// Poll pending asynchronous events in priority order. Returns true
    /// when an interrupt was acknowledged and dispatched.
    pub(crate) fn check_intr(&mut self, sys: &mut dyn Chipset) -> bool {
        // NMI outranks everything and ignores IF.
        if self.int_flags & INTFLAG_NMI != 0 {
            self.int_flags &= !(INTFLAG_NMI | INTFLAG_HALT);
            let ret_ip = self.ip;
            self.acknowledge(VECTOR_NMI, ret_ip);
            return true;
        }

        // The 286 architecturally services the single-step trap ahead of
        // maskable interrupts; the 8086/80186 do the reverse.
        let trap_first = self.model == CpuModel::Intel80286;

        if trap_first && self.try_trap() {
            return true;
        }

        if self.int_flags & INTFLAG_INTR != 0 && self.get_flag(Flag::Interrupt) {
            let vector = sys.get_irr_vector();
            if vector >= 0 {
                self.int_flags &= !(INTFLAG_INTR | INTFLAG_HALT);
                let ret_ip = self.ip;
                self.acknowledge(vector as u8, ret_ip);
                return true;
            }
            // -1 with INTR still raised: nothing to serve yet. The PIC
            // clears the line itself for a spurious interrupt.
        }

        if !trap_first && self.try_trap() {
            return true;
        }

        if self.int_flags & INTFLAG_DMA != 0 && !sys.check_dma() {
            self.int_flags &= !INTFLAG_DMA;
        }

        false
    }

    fn try_trap(&mut self) -> bool {
        if self.int_flags & INTFLAG_TRAP != 0 {
            self.int_flags &= !INTFLAG_TRAP;
            let ret_ip = self.ip;
            self.acknowledge(VECTOR_SINGLE_STEP, ret_ip);
            return true;
        }
        false
    }

    /// Dispatch an asynchronous interrupt, converting any fault raised
    /// during dispatch into the fault path.
    fn acknowledge(&mut self, vector: u8, ret_ip: u16) {
        self.cycles(self.timing.int_n);
        if let Err(fault) = self.do_interrupt(vector, ret_ip, None, false) {
            self.dispatch_fault(fault);
        }
    }

    /// Run INT-notify observers for a software interrupt. Returns true
    /// when an observer suppressed the interrupt.
    fn run_int_notify(&mut self, vector: u8) -> bool {
        let mut list = match self.int_notify.remove(&vector) {
            Some(list) => list,
            None => return false,
        };

        let mut suppress = false;
        for (_tag, callback) in list.iter_mut() {
            if !callback(self, vector) {
                suppress = true;
            }
        }

        // Callbacks may have registered new observers meanwhile; keep
        // both, originals first.
        if let Some(added) = self.int_notify.remove(&vector) {
            list.extend(added);
        }
        self.int_notify.insert(vector, list);

        suppress
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::*;
    use crate::devices::{Chipset, NullChipset};

    struct ScriptedPic {
        vector: i16,
    }
    impl Chipset for ScriptedPic {
        fn get_irr_vector(&mut self) -> i16 {
            let v = self.vector;
            self.vector = -1;
            v
        }
    }

    fn cpu() -> Cpu {
        let mut cpu = Cpu::new(CpuModel::Intel8088, CpuOptions::default());
        cpu.bus_mut().install_ram(0, 0x40000);
        cpu.load_segment(Segment::CS, 0x0100).unwrap();
        cpu.load_segment(Segment::SS, 0x0300).unwrap();
        cpu.ip = 0;
        cpu.sp = 0x0100;
        cpu.int_inhibit = false;
        cpu.biu_queue_flush();
        cpu
    }

    fn set_ivt(cpu: &mut Cpu, vector: u8, cs: u16, ip: u16) {
        let slot = vector as u32 * 4;
        cpu.bus_mut().write_u16(slot, ip);
        cpu.bus_mut().write_u16(slot + 2, cs);
    }

    #[test]
    fn real_mode_interrupt_frame() {
        let mut cpu = cpu();
        set_ivt(&mut cpu, 0x21, 0x2000, 0x0100);
        cpu.set_ps(CPU_FLAG_INT_ENABLE | CPU_FLAG_RESERVED1);
        cpu.ip = 0x0002;

        cpu.do_interrupt(0x21, cpu.ip, None, true).unwrap();

        assert_eq!(cpu.register16(Register16::CS), 0x2000);
        assert_eq!(cpu.ip(), 0x0100);
        assert!(!cpu.get_flag(Flag::Interrupt));
        assert!(!cpu.get_flag(Flag::Trap));

        // Frame, from the top down: PS, CS, IP.
        assert_eq!(cpu.bus_mut().read_u16(0x30FE), 0x0202);
        assert_eq!(cpu.bus_mut().read_u16(0x30FC), 0x0100);
        assert_eq!(cpu.bus_mut().read_u16(0x30FA), 0x0002);
        assert_eq!(cpu.sp, 0x00FA);
    }

    #[test]
    fn iret_restores_frame() {
        let mut cpu = cpu();
        let mut sys = NullChipset;
        set_ivt(&mut cpu, 0x21, 0x2000, 0x0100);
        cpu.set_ps(CPU_FLAG_INT_ENABLE | CPU_FLAG_RESERVED1);
        cpu.ip = 0x0002;

        cpu.do_interrupt(0x21, cpu.ip, None, true).unwrap();
        cpu.op_iret(&mut sys).unwrap();

        assert_eq!(cpu.register16(Register16::CS), 0x0100);
        assert_eq!(cpu.ip(), 0x0002);
        assert!(cpu.get_flag(Flag::Interrupt));
        assert_eq!(cpu.sp, 0x0100);
    }

    #[test]
    fn intr_acknowledged_through_pic() {
        let mut cpu = cpu();
        let mut pic = ScriptedPic { vector: 0x08 };
        set_ivt(&mut cpu, 0x08, 0x3000, 0x0010);
        cpu.set_flag(Flag::Interrupt);
        cpu.set_intr(true);

        assert!(cpu.check_intr(&mut pic));
        assert_eq!(cpu.register16(Register16::CS), 0x3000);
        assert_eq!(cpu.int_flags() & INTFLAG_INTR, 0);
    }

    #[test]
    fn intr_masked_by_if() {
        let mut cpu = cpu();
        let mut pic = ScriptedPic { vector: 0x08 };
        cpu.clear_flag(Flag::Interrupt);
        cpu.set_intr(true);

        assert!(!cpu.check_intr(&mut pic));
        // Line stays raised.
        assert_ne!(cpu.int_flags() & INTFLAG_INTR, 0);
    }

    #[test]
    fn nmi_ignores_if() {
        let mut cpu = cpu();
        let mut sys = NullChipset;
        set_ivt(&mut cpu, 2, 0x4000, 0x0000);
        cpu.clear_flag(Flag::Interrupt);
        cpu.raise_nmi();

        assert!(cpu.check_intr(&mut sys));
        assert_eq!(cpu.register16(Register16::CS), 0x4000);
    }

    #[test]
    fn int_notify_suppresses_interrupt() {
        let mut cpu = cpu();
        let mut sys = NullChipset;
        set_ivt(&mut cpu, 0x21, 0x2000, 0x0100);

        cpu.add_int_notify(0x21, "dos", Box::new(|cpu, _vector| {
            cpu.a.set_x(0x4C00);
            false
        }));

        // INT 21h at CS:0.
        cpu.bus_mut().copy_in(&[0xCD, 0x21], 0x1000);
        cpu.ip = 0;
        cpu.biu_queue_flush();
        cpu.opcode = 0xCD;
        cpu.fetch_u8().unwrap(); // consume opcode as the step loop would
        cpu.op_int_n(&mut sys).unwrap();

        // Suppressed: no transfer happened, the observer ran.
        assert_eq!(cpu.register16(Register16::CS), 0x0100);
        assert_eq!(cpu.a.x(), 0x4C00);
        assert_eq!(cpu.ip(), 0x0002);
    }

    #[test]
    fn divide_fault_vectors_through_zero() {
        let mut cpu = cpu();
        set_ivt(&mut cpu, 0, 0x5000, 0x0000);

        cpu.dispatch_fault(CpuFault::DivideError);
        assert_eq!(cpu.register16(Register16::CS), 0x5000);
        assert_eq!(cpu.ip(), 0x0000);
    }

    #[test]
    fn trap_flag_latches_and_services() {
        let mut cpu = cpu();
        let mut sys = NullChipset;
        set_ivt(&mut cpu, 1, 0x6000, 0x0000);
        cpu.int_flags |= INTFLAG_TRAP;

        assert!(cpu.check_intr(&mut sys));
        assert_eq!(cpu.register16(Register16::CS), 0x6000);
        assert_eq!(cpu.int_flags() & INTFLAG_TRAP, 0);
    }
}
