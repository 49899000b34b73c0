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

    cpu::queue.rs

    Implements the data structure for the processor instruction queue.

    The queue is a ring of (physical address, byte) slots. Consumed bytes
    are retained in their slots so that the tail can be rewound over them,
    which is how a repeated string instruction re-fetches its prefix bytes
    cheaply after each iteration.
*/

pub const QUEUE_MAX: usize = 8;

#[derive(Copy, Clone, Default)]
struct QueueSlot {
    addr: u32,
    byte: u8,
}

pub struct PrefetchQueue {
    slots: [QueueSlot; QUEUE_MAX],
    size:  usize,
    len:   usize,
    valid: usize,
    back:  usize,
    front: usize,
    head_addr: u32,
}

impl Default for PrefetchQueue {
    fn default() -> Self {
        Self::new(4)
    }
}

impl PrefetchQueue {
    pub fn new(size: usize) -> Self {
        assert!(size <= QUEUE_MAX);
        Self {
            slots: [QueueSlot::default(); QUEUE_MAX],
            size,
            len: 0,
            valid: 0,
            back: 0,
            front: 0,
            head_addr: 0,
        }
    }

    pub fn set_size(&mut self, size: usize) {
        assert!(size <= QUEUE_MAX);
        self.size = size;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.size
    }

    #[inline]
    pub fn room(&self) -> usize {
        self.size - self.len
    }

    /// Physical address the next prefetched byte will be read from.
    #[inline]
    pub fn head_addr(&self) -> u32 {
        self.head_addr
    }

    /// Append one fetched byte at the head of the queue.
    pub fn push(&mut self, byte: u8) {
        if self.len >= self.size {
            panic!("Queue overrun!");
        }

        self.slots[self.front] = QueueSlot {
            addr: self.head_addr,
            byte,
        };
        self.front = (self.front + 1) % QUEUE_MAX;
        self.len += 1;
        if self.valid < self.size {
            self.valid += 1;
        }
        self.head_addr = self.head_addr.wrapping_add(1);
    }

    /// Pop the byte at the tail of the queue, returning it with the
    /// physical address it was fetched from. The slot remains valid for
    /// rewinding until displaced by later pushes.
    pub fn pop(&mut self) -> (u32, u8) {
        if self.len == 0 {
            panic!("Queue underrun!");
        }

        let slot = self.slots[self.back];
        self.back = (self.back + 1) % QUEUE_MAX;
        self.len -= 1;
        (slot.addr, slot.byte)
    }

    /// Address of the byte currently at the tail, if any.
    #[inline]
    pub fn tail_addr(&self) -> Option<u32> {
        if self.len > 0 {
            Some(self.slots[self.back].addr)
        }
        else {
            None
        }
    }

    /// Move the tail back over `delta` already-consumed bytes. Returns
    /// false when the history has been displaced and the caller must flush
    /// and refetch instead.
    pub fn rewind(&mut self, delta: usize) -> bool {
        if delta > self.valid.saturating_sub(self.len) {
            return false;
        }

        self.back = (self.back + QUEUE_MAX - delta) % QUEUE_MAX;
        self.len += delta;
        true
    }

    /// Empty the queue and accept a new head address.
    pub fn flush(&mut self, new_addr: u32) {
        self.len = 0;
        self.valid = 0;
        self.back = 0;
        self.front = 0;
        self.head_addr = new_addr;
    }

    /// Hex dump of the queued bytes, tail first.
    pub fn to_string(&self) -> String {
        let mut base_str = "".to_string();
        for i in 0..self.len {
            base_str.push_str(&format!("{:02X}", self.slots[(self.back + i) % QUEUE_MAX].byte));
        }
        base_str
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_and_addresses() {
        let mut q = PrefetchQueue::new(4);
        q.flush(0x10000);
        q.push(0xB8);
        q.push(0x34);
        q.push(0x12);

        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), (0x10000, 0xB8));
        assert_eq!(q.pop(), (0x10001, 0x34));
        assert_eq!(q.pop(), (0x10002, 0x12));
        assert!(q.is_empty());
        assert_eq!(q.head_addr(), 0x10003);
    }

    #[test]
    fn rewind_restores_consumed_bytes() {
        let mut q = PrefetchQueue::new(4);
        q.flush(0x200);
        q.push(0xF3);
        q.push(0xA4);
        q.push(0x90);

        assert_eq!(q.pop().1, 0xF3);
        assert_eq!(q.pop().1, 0xA4);

        assert!(q.rewind(2));
        assert_eq!(q.pop(), (0x200, 0xF3));
        assert_eq!(q.pop(), (0x201, 0xA4));
        assert_eq!(q.pop(), (0x202, 0x90));
    }

    #[test]
    fn rewind_fails_past_history() {
        let mut q = PrefetchQueue::new(4);
        q.flush(0x300);
        q.push(0x01);
        q.pop();

        assert!(!q.rewind(2));
        assert!(q.rewind(1));
    }

    #[test]
    fn flush_resets_state() {
        let mut q = PrefetchQueue::new(6);
        q.flush(0x400);
        q.push(0xEA);
        q.pop();
        q.flush(0x500);

        assert!(q.is_empty());
        assert_eq!(q.head_addr(), 0x500);
        assert!(!q.rewind(1));
    }

    #[test]
    fn full_queue_respects_depth() {
        let mut q = PrefetchQueue::new(4);
        q.flush(0);
        for i in 0..4 {
            q.push(i as u8);
        }
        assert!(q.is_full());
        assert_eq!(q.room(), 0);
    }
}
