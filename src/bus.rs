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

    bus.rs

    Implements the system memory bus.

    The address space is partitioned into fixed-size blocks, each of which
    dispatches reads and writes independently. RAM, ROM and memory-mapped
    devices can therefore coexist at block granularity, and the A20 gate is
    a mask applied to every incoming address rather than a special case in
    the CPU.
*/

use crate::cpu::CpuModel;

pub const BLOCK_SHIFT: u32 = 12;
pub const BLOCK_SIZE: usize = 1 << BLOCK_SHIFT;
pub const BLOCK_MASK: u32 = (BLOCK_SIZE - 1) as u32;

/// Value returned when reading an address with nothing installed behind it.
pub const OPEN_BUS_BYTE: u8 = 0x00;

pub const A20_MASK_OFF: u32 = 0x0F_FFFF;

/// A device mapped into one or more blocks of the physical address space.
/// Addresses passed in are full physical addresses, post A20 masking.
pub trait MmioDevice {
    fn mmio_read_u8(&mut self, address: u32) -> u8;
    fn mmio_write_u8(&mut self, address: u32, byte: u8);
}

/// Per-block dispatch. A block is the unit of installation; word accesses
/// that straddle two blocks are split into byte accesses by the bus.
pub enum MemoryBlock {
    Open,
    Ram(Box<[u8]>),
    Rom(Box<[u8]>),
    Mmio(Box<dyn MmioDevice>),
}

pub struct MemoryBus {
    blocks: Vec<MemoryBlock>,
    addr_mask: u32,
    a20_mask_on: u32,
    a20_enabled: bool,
}

impl MemoryBus {
    pub fn new(model: CpuModel) -> Self {
        // The 80286 drives a 24-bit address bus. The 8088/80186 space is
        // sized one extra megabyte so that the A20-enabled mask can reach
        // the high memory area at 10FFEF.
        let a20_mask_on = match model {
            CpuModel::Intel80286 => 0xFF_FFFF,
            _ => 0x1F_FFFF,
        };
        let block_ct = ((a20_mask_on as usize) + 1) >> BLOCK_SHIFT;

        let mut blocks = Vec::with_capacity(block_ct);
        for _ in 0..block_ct {
            blocks.push(MemoryBlock::Open);
        }

        MemoryBus {
            blocks,
            addr_mask: A20_MASK_OFF,
            a20_mask_on,
            a20_enabled: false,
        }
    }

    /// Set the state of the A20 gate. With the gate disabled, addresses are
    /// masked to 20 bits, reproducing the 8086 1MB wraparound.
    pub fn set_a20(&mut self, enabled: bool) {
        self.a20_enabled = enabled;
        self.addr_mask = if enabled { self.a20_mask_on } else { A20_MASK_OFF };
    }

    #[inline]
    pub fn a20(&self) -> bool {
        self.a20_enabled
    }

    #[inline]
    pub fn addr_mask(&self) -> u32 {
        self.addr_mask
    }

    pub fn block_ct(&self) -> usize {
        self.blocks.len()
    }

    /// Install a block at the given block index, replacing whatever was
    /// mapped there.
    pub fn install_block(&mut self, index: usize, block: MemoryBlock) {
        assert!(index < self.blocks.len(), "Block index out of range");
        self.blocks[index] = block;
    }

    /// Install zero-filled RAM covering [start, start + size). Both ends
    /// must fall on block boundaries.
    pub fn install_ram(&mut self, start: u32, size: usize) {
        assert_eq!(start & BLOCK_MASK, 0, "RAM start not block-aligned");
        assert_eq!(size & BLOCK_MASK as usize, 0, "RAM size not block-aligned");

        let first = (start >> BLOCK_SHIFT) as usize;
        for i in 0..(size >> BLOCK_SHIFT) {
            self.blocks[first + i] = MemoryBlock::Ram(vec![0u8; BLOCK_SIZE].into_boxed_slice());
        }
    }

    /// Install ROM from the provided image starting at a block boundary.
    /// The final block is padded with 0xFF if the image is short.
    pub fn install_rom(&mut self, start: u32, image: &[u8]) {
        assert_eq!(start & BLOCK_MASK, 0, "ROM start not block-aligned");

        let first = (start >> BLOCK_SHIFT) as usize;
        let block_ct = (image.len() + BLOCK_SIZE - 1) >> BLOCK_SHIFT;

        for i in 0..block_ct {
            let mut data = vec![0xFFu8; BLOCK_SIZE].into_boxed_slice();
            let src_start = i * BLOCK_SIZE;
            let src_end = usize::min(src_start + BLOCK_SIZE, image.len());
            data[0..(src_end - src_start)].copy_from_slice(&image[src_start..src_end]);
            self.blocks[first + i] = MemoryBlock::Rom(data);
        }
    }

    /// Map a device over [start, start + size). Each covered block receives
    /// its own call to the factory.
    pub fn install_mmio<F>(&mut self, start: u32, size: usize, mut factory: F)
    where
        F: FnMut() -> Box<dyn MmioDevice>,
    {
        assert_eq!(start & BLOCK_MASK, 0, "MMIO start not block-aligned");
        assert_eq!(size & BLOCK_MASK as usize, 0, "MMIO size not block-aligned");

        let first = (start >> BLOCK_SHIFT) as usize;
        for i in 0..(size >> BLOCK_SHIFT) {
            self.blocks[first + i] = MemoryBlock::Mmio(factory());
        }
    }

    #[inline]
    pub fn read_u8(&mut self, address: u32) -> u8 {
        let address = address & self.addr_mask;
        match &mut self.blocks[(address >> BLOCK_SHIFT) as usize] {
            MemoryBlock::Ram(data) | MemoryBlock::Rom(data) => data[(address & BLOCK_MASK) as usize],
            MemoryBlock::Mmio(device) => device.mmio_read_u8(address),
            MemoryBlock::Open => OPEN_BUS_BYTE,
        }
    }

    #[inline]
    pub fn read_u16(&mut self, address: u32) -> u16 {
        let masked = address & self.addr_mask;
        if masked & BLOCK_MASK == BLOCK_MASK {
            // Access straddles a block seam. The second byte re-enters
            // through the address mask so that A20 wrap applies to it.
            let lo = self.read_u8(address);
            let hi = self.read_u8(address.wrapping_add(1));
            (lo as u16) | ((hi as u16) << 8)
        }
        else {
            match &mut self.blocks[(masked >> BLOCK_SHIFT) as usize] {
                MemoryBlock::Ram(data) | MemoryBlock::Rom(data) => {
                    let off = (masked & BLOCK_MASK) as usize;
                    (data[off] as u16) | ((data[off + 1] as u16) << 8)
                }
                MemoryBlock::Mmio(device) => {
                    let lo = device.mmio_read_u8(masked);
                    let hi = device.mmio_read_u8(masked + 1);
                    (lo as u16) | ((hi as u16) << 8)
                }
                MemoryBlock::Open => (OPEN_BUS_BYTE as u16) | ((OPEN_BUS_BYTE as u16) << 8),
            }
        }
    }

    #[inline]
    pub fn write_u8(&mut self, address: u32, byte: u8) {
        let address = address & self.addr_mask;
        match &mut self.blocks[(address >> BLOCK_SHIFT) as usize] {
            MemoryBlock::Ram(data) => data[(address & BLOCK_MASK) as usize] = byte,
            MemoryBlock::Mmio(device) => device.mmio_write_u8(address, byte),
            MemoryBlock::Rom(_) => {
                log::trace!("Write to ROM address {:06X} ignored", address);
            }
            MemoryBlock::Open => {}
        }
    }

    #[inline]
    pub fn write_u16(&mut self, address: u32, word: u16) {
        let masked = address & self.addr_mask;
        if masked & BLOCK_MASK == BLOCK_MASK {
            self.write_u8(address, (word & 0xFF) as u8);
            self.write_u8(address.wrapping_add(1), (word >> 8) as u8);
        }
        else {
            match &mut self.blocks[(masked >> BLOCK_SHIFT) as usize] {
                MemoryBlock::Ram(data) => {
                    let off = (masked & BLOCK_MASK) as usize;
                    data[off] = (word & 0xFF) as u8;
                    data[off + 1] = (word >> 8) as u8;
                }
                MemoryBlock::Mmio(device) => {
                    device.mmio_write_u8(masked, (word & 0xFF) as u8);
                    device.mmio_write_u8(masked + 1, (word >> 8) as u8);
                }
                MemoryBlock::Rom(_) => {
                    log::trace!("Write to ROM address {:06X} ignored", masked);
                }
                MemoryBlock::Open => {}
            }
        }
    }

    /// Copy bytes into RAM, bypassing write dispatch. Intended for host-side
    /// program loading in tests and snapshot restore.
    pub fn copy_in(&mut self, data: &[u8], address: u32) {
        for (i, b) in data.iter().enumerate() {
            let addr = (address + i as u32) & self.addr_mask;
            if let MemoryBlock::Ram(block) = &mut self.blocks[(addr >> BLOCK_SHIFT) as usize] {
                block[(addr & BLOCK_MASK) as usize] = *b;
            }
        }
    }

    /// Collect the contents of all RAM blocks as (block index, image) pairs.
    /// ROM and MMIO blocks are the host's to reconstruct.
    pub fn ram_snapshot(&self) -> Vec<(u32, Vec<u8>)> {
        let mut out = Vec::new();
        for (i, block) in self.blocks.iter().enumerate() {
            if let MemoryBlock::Ram(data) = block {
                out.push((i as u32, data.to_vec()));
            }
        }
        out
    }

    /// Restore RAM block contents captured by `ram_snapshot`. Blocks that
    /// are no longer RAM are skipped with a warning.
    pub fn restore_ram(&mut self, snapshot: &[(u32, Vec<u8>)]) {
        for (index, image) in snapshot {
            match self.blocks.get_mut(*index as usize) {
                Some(MemoryBlock::Ram(data)) if data.len() == image.len() => {
                    data.copy_from_slice(image);
                }
                _ => {
                    log::warn!("RAM snapshot block {} no longer matches bus layout; skipped", index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_bus_reads_zero() {
        let mut bus = MemoryBus::new(CpuModel::Intel8088);
        assert_eq!(bus.read_u8(0x12345), OPEN_BUS_BYTE);
        assert_eq!(bus.read_u16(0x12345), 0x0000);
        // Writes to nothing are swallowed.
        bus.write_u16(0x12345, 0xAA55);
        assert_eq!(bus.read_u16(0x12345), 0x0000);
    }

    #[test]
    fn word_split_across_block_seam() {
        let mut bus = MemoryBus::new(CpuModel::Intel8088);
        bus.install_ram(0, 0x2000);

        bus.write_u16(0x0FFF, 0xBEEF);
        assert_eq!(bus.read_u8(0x0FFF), 0xEF);
        assert_eq!(bus.read_u8(0x1000), 0xBE);
        assert_eq!(bus.read_u16(0x0FFF), 0xBEEF);
    }

    #[test]
    fn a20_masks_high_addresses() {
        let mut bus = MemoryBus::new(CpuModel::Intel8088);
        bus.install_ram(0, 0x10000);

        bus.write_u8(0x0000, 0x42);
        // With A20 off, linear 100000 wraps to linear 0.
        assert_eq!(bus.read_u8(0x10_0000), 0x42);

        bus.set_a20(true);
        assert_eq!(bus.read_u8(0x10_0000), OPEN_BUS_BYTE);
    }

    #[test]
    fn word_wrap_at_top_of_masked_space() {
        let mut bus = MemoryBus::new(CpuModel::Intel8088);
        bus.install_ram(0, 0x1000);
        bus.install_ram(0xFF000, 0x1000);

        bus.write_u8(0xFFFFF, 0x34);
        bus.write_u8(0x00000, 0x12);
        // Second byte of the word wraps through the A20 mask.
        assert_eq!(bus.read_u16(0xFFFFF), 0x1234);
    }

    #[test]
    fn rom_write_ignored() {
        let mut bus = MemoryBus::new(CpuModel::Intel8088);
        bus.install_rom(0xFE000, &[0xEA, 0x5B, 0xE0, 0x00, 0xF0]);

        assert_eq!(bus.read_u8(0xFE000), 0xEA);
        bus.write_u8(0xFE000, 0x00);
        assert_eq!(bus.read_u8(0xFE000), 0xEA);
    }

    #[test]
    fn ram_snapshot_round_trip() {
        let mut bus = MemoryBus::new(CpuModel::Intel8088);
        bus.install_ram(0, 0x2000);
        bus.write_u16(0x0100, 0xCAFE);

        let snap = bus.ram_snapshot();
        bus.write_u16(0x0100, 0x0000);
        bus.restore_ram(&snap);
        assert_eq!(bus.read_u16(0x0100), 0xCAFE);
    }
}
