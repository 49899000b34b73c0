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

    devices.rs

    Contracts for the CPU's external collaborators.

    The CPU core does not emulate the PIC, PIT or DMA controller; the host
    machine supplies them behind the Chipset trait. All collaborator calls
    happen synchronously on the stepping thread, at the top of each
    instruction or during an IN/OUT transfer.
*/

/// Services the host machine provides to the CPU while it steps.
///
/// `get_irr_vector` is called only when the INTR flag has been raised via
/// `Cpu::set_intr` and interrupts are enabled. A return of -1 with INTR
/// still asserted means "nothing to serve yet"; the PIC may instead clear
/// the line itself before returning -1 to signal a spurious interrupt.
pub trait Chipset {
    /// Advance the machine's timers. Called once per burst entry.
    fn update_timers(&mut self) {}

    /// Return the highest-priority pending interrupt vector, or -1.
    fn get_irr_vector(&mut self) -> i16 {
        -1
    }

    /// Tick an in-flight DMA transfer. Return true while the transfer is
    /// still running; the CPU keeps the DMA flag raised until this returns
    /// false.
    fn check_dma(&mut self) -> bool {
        false
    }

    fn port_read_u8(&mut self, _port: u16) -> u8 {
        0xFF
    }

    fn port_write_u8(&mut self, _port: u16, _byte: u8) {}

    fn port_read_u16(&mut self, port: u16) -> u16 {
        (self.port_read_u8(port) as u16) | ((self.port_read_u8(port.wrapping_add(1)) as u16) << 8)
    }

    fn port_write_u16(&mut self, port: u16, word: u16) {
        self.port_write_u8(port, (word & 0xFF) as u8);
        self.port_write_u8(port.wrapping_add(1), (word >> 8) as u8);
    }
}

/// A chipset with nothing attached: ports float high, no interrupts, no
/// DMA. Useful for tests and for stepping the core standalone.
pub struct NullChipset;

impl Chipset for NullChipset {}
