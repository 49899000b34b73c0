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

    cpu::step.rs

    The step loop. A burst of at least `min_cycles` cycles runs
    instructions to completion: prefixes compose without touching the
    interrupt machinery, pending events are acknowledged at each
    instruction boundary, faults divert into the interrupt unit, and
    leftover fetch bandwidth tops up the prefetch queue.
*/

use crate::{
    cpu::*,
    devices::Chipset,
};

impl Cpu {
    /// Execute at least `min_cycles` cycles (one full instruction when
    /// zero). Returns the number of cycles actually executed, 0 when an
    /// execution breakpoint fired before dispatch, or -1 when a breakpoint
    /// was flagged mid-instruction.
    pub fn step_cpu(&mut self, sys: &mut dyn Chipset, min_cycles: u32) -> i64 {
        if self.is_errored() {
            log::warn!("step_cpu called on errored CPU; reset required");
            return 0;
        }

        sys.update_timers();

        let single_step = min_cycles == 0;
        self.burst_cycles = min_cycles as i32;
        self.cycles_left = min_cycles as i32;

        loop {
            if !self.in_prefix {
                // Instruction boundary: reset per-instruction scratch.
                self.seg_data = Segment::DS;
                self.seg_stack = Segment::SS;
                self.op_prefixes = 0;
                self.prefix_ct = 0;
                self.rep_type = RepType::NoRep;
                self.ea_loaded = false;
                self.instruction_ip = self.ip;
                self.instr_cycles = 0;
                self.busy_cycles = 0;

                // Pending asynchronous events, unless the previous
                // instruction opened an inhibit window (SS load, STI).
                if self.int_inhibit {
                    self.int_inhibit = false;
                }
                else if self.int_flags != 0 {
                    let acknowledged = self.check_intr(sys);
                    self.instruction_ip = self.ip;
                    if acknowledged && single_step {
                        break;
                    }
                    if self.int_flags & INTFLAG_HALT != 0 {
                        // Halted with nothing to wake us: burn the burst.
                        self.cycles_left = 0;
                        break;
                    }
                }

                // TF observed at a boundary arms the single-step trap; it
                // is serviced after the instruction about to run.
                if self.get_flag(Flag::Trap) {
                    self.int_flags |= INTFLAG_TRAP;
                }

                // Execution breakpoints fire before dispatch; stepping
                // again resumes past the hit.
                if !self.breakpoints.is_empty() {
                    let lip = self.lip();
                    if self.breakpoint_hit {
                        self.breakpoint_hit = false;
                    }
                    else if self.breakpoints.contains(&lip) {
                        self.breakpoint_hit = true;
                        log::debug!("Execution breakpoint at {:06X}", lip);
                        return 0;
                    }
                }

                // Return-site hooks are one-shot.
                if !self.int_return.is_empty() {
                    let lip = self.lip();
                    if let Some(callback) = self.int_return.remove(&lip) {
                        callback(self);
                    }
                }
            }
            self.in_prefix = false;

            // Fetch and dispatch.
            match self.fetch_u8() {
                Ok(opcode) => {
                    self.opcode = opcode;
                    let handler = self.table[opcode as usize];
                    if let Err(fault) = handler(self, sys) {
                        self.dispatch_fault(fault);
                    }
                }
                Err(fault) => {
                    self.dispatch_fault(fault);
                }
            }

            if self.in_prefix {
                if self.model == CpuModel::Intel80286 && self.prefix_ct > PREFIX_LIMIT_80286 {
                    self.in_prefix = false;
                    self.dispatch_fault(CpuFault::InvalidOpcode);
                }
                else {
                    // Keep composing the instruction; no boundary work.
                    continue;
                }
            }

            // Instruction complete.
            self.instruction_count += 1;
            self.total_cycles += self.instr_cycles as u64;
            self.biu_refill_spare();

            if self.breakpoint_hit {
                self.breakpoint_hit = false;
                return -1;
            }
            if self.is_errored() {
                break;
            }
            if single_step || self.cycles_left <= 0 {
                break;
            }
        }

        (self.burst_cycles - self.cycles_left) as i64
    }

    /// Request a debugger stop at the end of the current instruction
    /// (callable from instrumentation callbacks).
    pub fn set_breakpoint_flag(&mut self) {
        self.breakpoint_hit = true;
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::*;
    use crate::devices::{Chipset, NullChipset};

    fn cpu(model: CpuModel) -> Cpu {
        let mut cpu = Cpu::new(model, CpuOptions::default());
        cpu.bus_mut().install_ram(0, 0x40000);
        cpu.load_segment(Segment::CS, 0x1000).unwrap();
        cpu.load_segment(Segment::DS, 0x1000).unwrap();
        cpu.load_segment(Segment::SS, 0x2000).unwrap();
        cpu.int_inhibit = false;
        cpu.sp = 0x1000;
        cpu.ip = 0x0000;
        cpu.biu_queue_flush();
        cpu
    }

    fn load(cpu: &mut Cpu, bytes: &[u8], ip: u16) {
        cpu.bus_mut().copy_in(bytes, 0x10000 + ip as u32);
        cpu.ip = ip;
        cpu.biu_queue_flush();
    }

    #[test]
    fn mov_ax_imm_executes() {
        let mut cpu = cpu(CpuModel::Intel8088);
        let mut sys = NullChipset;
        cpu.ip = 0x0020;
        load(&mut cpu, &[0xB8, 0x34, 0x12], 0x0020);

        let cycles = cpu.step_cpu(&mut sys, 0);
        assert_eq!(cpu.register16(Register16::AX), 0x1234);
        assert_eq!(cpu.ip(), 0x0023);
        assert_eq!(cpu.lip(), 0x10023);
        assert_eq!(cpu.instruction_count(), 1);
        assert!(cycles > 0);
    }

    #[test]
    fn segment_override_applies_through_prefix() {
        let mut cpu = cpu(CpuModel::Intel8088);
        let mut sys = NullChipset;
        cpu.load_segment(Segment::ES, 0x3000).unwrap();

        // ES: MOV AL, [0010]
        load(&mut cpu, &[0x26, 0xA0, 0x10, 0x00], 0);
        cpu.bus_mut().write_u8(0x30010, 0x5A);

        cpu.step_cpu(&mut sys, 0);
        assert_eq!(cpu.register8(Register8::AL), 0x5A);
        assert_eq!(cpu.instruction_count(), 1);
    }

    #[test]
    fn burst_runs_multiple_instructions() {
        let mut cpu = cpu(CpuModel::Intel8088);
        let mut sys = NullChipset;

        // Four INC AX in a row.
        load(&mut cpu, &[0x40, 0x40, 0x40, 0x40, 0xF4], 0);
        let cycles = cpu.step_cpu(&mut sys, 12);

        assert!(cpu.register16(Register16::AX) >= 3);
        assert!(cycles >= 12);
    }

    #[test]
    fn hlt_consumes_burst_until_interrupt() {
        let mut cpu = cpu(CpuModel::Intel8088);

        struct OneShotPic {
            fired: bool,
        }
        impl Chipset for OneShotPic {
            fn get_irr_vector(&mut self) -> i16 {
                if self.fired {
                    -1
                }
                else {
                    self.fired = true;
                    0x08
                }
            }
        }

        // IVT entry 8 -> 3000:0010.
        cpu.bus_mut().write_u16(0x20, 0x0010);
        cpu.bus_mut().write_u16(0x22, 0x3000);

        load(&mut cpu, &[0xFB, 0xF4], 0); // STI; HLT
        let mut pic = OneShotPic { fired: false };

        cpu.step_cpu(&mut pic, 100);
        assert!(cpu.is_halted());

        // Raise INTR; the halted CPU wakes and dispatches.
        cpu.set_intr(true);
        cpu.step_cpu(&mut pic, 0);
        assert!(!cpu.is_halted());
        assert_eq!(cpu.register16(Register16::CS), 0x3000);
        assert_eq!(cpu.ip(), 0x0010);
    }

    #[test]
    fn sti_shadow_defers_one_instruction() {
        let mut cpu = cpu(CpuModel::Intel8088);

        struct CountingPic {
            asks: u32,
        }
        impl Chipset for CountingPic {
            fn get_irr_vector(&mut self) -> i16 {
                self.asks += 1;
                0x08
            }
        }

        cpu.bus_mut().write_u16(0x20, 0x0010);
        cpu.bus_mut().write_u16(0x22, 0x3000);

        // CLI to start clean, then STI; INC AX. With the line already
        // raised, the INC must still run before acknowledge.
        load(&mut cpu, &[0xFA, 0xFB, 0x40], 0);
        let mut pic = CountingPic { asks: 0 };

        cpu.step_cpu(&mut pic, 0); // CLI
        cpu.set_intr(true);
        cpu.step_cpu(&mut pic, 0); // STI (shadow opens)
        assert_eq!(pic.asks, 0);

        cpu.step_cpu(&mut pic, 0); // INC AX executes, ack happens next
        assert_eq!(cpu.register16(Register16::AX), 1);

        cpu.step_cpu(&mut pic, 0);
        assert_eq!(cpu.register16(Register16::CS), 0x3000);
    }

    #[test]
    fn trap_flag_single_steps() {
        let mut cpu = cpu(CpuModel::Intel8088);
        let mut sys = NullChipset;

        // IVT vector 1 -> 4000:0000.
        cpu.bus_mut().write_u16(0x04, 0x0000);
        cpu.bus_mut().write_u16(0x06, 0x4000);

        cpu.set_flag(Flag::Trap);
        load(&mut cpu, &[0x40], 0); // INC AX

        cpu.step_cpu(&mut sys, 0); // executes INC, latches trap
        assert_eq!(cpu.register16(Register16::AX), 1);

        cpu.step_cpu(&mut sys, 0); // services #DB
        assert_eq!(cpu.register16(Register16::CS), 0x4000);
        // TF cleared in the handler frame.
        assert!(!cpu.get_flag(Flag::Trap));
    }

    #[test]
    fn pop_ss_inhibits_interrupt_window() {
        let mut cpu = cpu(CpuModel::Intel8088);

        struct AlwaysPic;
        impl Chipset for AlwaysPic {
            fn get_irr_vector(&mut self) -> i16 {
                0x08
            }
        }

        cpu.bus_mut().write_u16(0x20, 0x0010);
        cpu.bus_mut().write_u16(0x22, 0x3000);

        // Stack holds a new SS (same value), then: POP SS; MOV SP, imm.
        cpu.push_u16(0x2000).unwrap();
        load(&mut cpu, &[0x17, 0xBC, 0x00, 0x20], 0); // POP SS; MOV SP,2000

        let mut pic = AlwaysPic;
        cpu.set_flag(Flag::Interrupt);

        cpu.step_cpu(&mut pic, 0); // POP SS opens the window
        assert_eq!(cpu.register16(Register16::CS), 0x1000);

        cpu.set_intr(true);
        cpu.step_cpu(&mut pic, 0); // MOV SP executes despite pending INTR
        assert_eq!(cpu.register16(Register16::SP), 0x2000);
        assert_eq!(cpu.register16(Register16::CS), 0x1000);

        cpu.step_cpu(&mut pic, 0); // now the interrupt lands
        assert_eq!(cpu.register16(Register16::CS), 0x3000);
    }

    #[test]
    fn invalid_opcode_faults_on_186() {
        let mut cpu = cpu(CpuModel::Intel80186);
        let mut sys = NullChipset;

        // Vector 6 -> 5000:0005.
        cpu.bus_mut().write_u16(0x18, 0x0005);
        cpu.bus_mut().write_u16(0x1A, 0x5000);

        load(&mut cpu, &[0x0F], 0);
        cpu.step_cpu(&mut sys, 0);
        assert_eq!(cpu.register16(Register16::CS), 0x5000);
        assert_eq!(cpu.ip(), 0x0005);
    }

    #[test]
    fn pop_cs_on_8086() {
        let mut cpu = cpu(CpuModel::Intel8088);
        let mut sys = NullChipset;

        cpu.push_u16(0x1000).unwrap();
        load(&mut cpu, &[0x0F, 0x40], 0); // POP CS; INC AX
        cpu.step_cpu(&mut sys, 0);
        assert_eq!(cpu.register16(Register16::CS), 0x1000);

        cpu.step_cpu(&mut sys, 0);
        assert_eq!(cpu.register16(Register16::AX), 1);
    }

    #[test]
    fn breakpoint_returns_zero_and_resumes() {
        let mut cpu = cpu(CpuModel::Intel8088);
        let mut sys = NullChipset;

        load(&mut cpu, &[0x40, 0x40], 0);
        cpu.set_breakpoint(0x10001);

        // The first INC executes, then the breakpoint at the second INC
        // fires pre-dispatch with a 0 return.
        assert_eq!(cpu.step_cpu(&mut sys, 20), 0);
        assert_eq!(cpu.register16(Register16::AX), 1);

        // Stepping again resumes past the hit.
        cpu.step_cpu(&mut sys, 0);
        assert_eq!(cpu.register16(Register16::AX), 2);
    }
}
