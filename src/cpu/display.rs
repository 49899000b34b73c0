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

    cpu::display.rs

    Formatting of CPU state for host UIs and trace logs.
*/

use crate::cpu::*;
use std::fmt;

/// Printable register and flag state, one string per field, for host-side
/// state viewers.
#[derive(Default, Debug, Clone)]
pub struct CpuStringState {
    pub ax: String,
    pub bx: String,
    pub cx: String,
    pub dx: String,
    pub sp: String,
    pub bp: String,
    pub si: String,
    pub di: String,
    pub cs: String,
    pub ds: String,
    pub ss: String,
    pub es: String,
    pub ip: String,
    pub flags: String,
    pub piq: String,
    pub instruction_count: String,
    pub cycle_count: String,
}

impl Cpu {
    /// One-letter-per-flag rendering, set bits uppercase.
    fn flags_string(&self) -> String {
        let ps = self.get_ps();
        let mut out = String::with_capacity(16);
        for (bit, ch) in [
            (CPU_FLAG_OVERFLOW, 'o'),
            (CPU_FLAG_DIRECTION, 'd'),
            (CPU_FLAG_INT_ENABLE, 'i'),
            (CPU_FLAG_TRAP, 't'),
            (CPU_FLAG_SIGN, 's'),
            (CPU_FLAG_ZERO, 'z'),
            (CPU_FLAG_AUX_CARRY, 'a'),
            (CPU_FLAG_PARITY, 'p'),
            (CPU_FLAG_CARRY, 'c'),
        ] {
            if ps & bit != 0 {
                out.push(ch.to_ascii_uppercase());
            }
            else {
                out.push(ch);
            }
        }
        out
    }

    pub fn get_string_state(&self) -> CpuStringState {
        CpuStringState {
            ax: format!("{:04X}", self.a.x()),
            bx: format!("{:04X}", self.b.x()),
            cx: format!("{:04X}", self.c.x()),
            dx: format!("{:04X}", self.d.x()),
            sp: format!("{:04X}", self.sp),
            bp: format!("{:04X}", self.bp),
            si: format!("{:04X}", self.si),
            di: format!("{:04X}", self.di),
            cs: format!("{:04X}", self.cs.selector),
            ds: format!("{:04X}", self.ds.selector),
            ss: format!("{:04X}", self.ss.selector),
            es: format!("{:04X}", self.es.selector),
            ip: format!("{:04X}", self.ip),
            flags: self.flags_string(),
            piq: self.queue.to_string(),
            instruction_count: format!("{}", self.instruction_count),
            cycle_count: format!("{}", self.total_cycles),
        }
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "AX: {:04X} BX: {:04X} CX: {:04X} DX: {:04X}",
            self.a.x(),
            self.b.x(),
            self.c.x(),
            self.d.x()
        )?;
        writeln!(
            f,
            "SP: {:04X} BP: {:04X} SI: {:04X} DI: {:04X}",
            self.sp, self.bp, self.si, self.di
        )?;
        writeln!(
            f,
            "CS: {:04X} DS: {:04X} SS: {:04X} ES: {:04X}",
            self.cs.selector, self.ds.selector, self.ss.selector, self.es.selector
        )?;
        writeln!(f, "IP: {:04X} ({:06X})", self.ip, self.lip())?;
        write!(f, "FLAGS: {:04X} [{}]", self.get_ps(), self.flags_string())
    }
}

#[cfg(test)]
mod tests {
    use crate::cpu::*;

    #[test]
    fn string_state_formats_hex() {
        let mut cpu = Cpu::new(CpuModel::Intel8088, CpuOptions::default());
        cpu.a.set_x(0xBEEF);
        let state = cpu.get_string_state();
        assert_eq!(state.ax, "BEEF");
        assert_eq!(state.cs, "FFFF");
        assert_eq!(state.ip, "0000");
    }

    #[test]
    fn flags_render_case_by_state() {
        let mut cpu = Cpu::new(CpuModel::Intel8088, CpuOptions::default());
        cpu.set_ps(CPU_FLAG_ZERO | CPU_FLAG_CARRY);
        let s = cpu.get_string_state().flags;
        assert!(s.contains('Z'));
        assert!(s.contains('C'));
        assert!(s.contains('s'));
    }
}
