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

    cpu::mod.rs

    Implements the 8088/80186/80286 CPU.

    One Cpu type covers all three models; the model parameter selects the
    opcode tables, cycle costs, queue depth and behavioral quirks at
    construction time so that the execution hot path carries no model
    conditionals.
*/

#![allow(clippy::unusual_byte_groupings)]

use fxhash::FxHashMap;

mod alu;
mod bcd;
mod biu;
mod bitwise;
mod cycle;
mod decode;
mod display;
mod execute;
mod flags;
mod interrupt;
mod jump;
mod modrm;
mod muldiv;
mod protected;
mod queue;
mod segment;
mod snapshot;
mod stack;
mod step;
mod string;

pub use crate::cpu::{
    cycle::CycleTable,
    display::CpuStringState,
    flags::{PARITY_TABLE, RESULT_BYTE, RESULT_WORD},
    queue::PrefetchQueue,
    segment::{DescriptorTable, SegmentRegister},
    snapshot::CpuSnapshot,
};

use crate::{bus::MemoryBus, devices::Chipset};
use std::{error::Error, fmt, fmt::Display};

pub const CPU_FLAG_CARRY: u16 = 0b0000_0000_0000_0001;
pub const CPU_FLAG_RESERVED1: u16 = 0b0000_0000_0000_0010;
pub const CPU_FLAG_PARITY: u16 = 0b0000_0000_0000_0100;
pub const CPU_FLAG_AUX_CARRY: u16 = 0b0000_0000_0001_0000;
pub const CPU_FLAG_ZERO: u16 = 0b0000_0000_0100_0000;
pub const CPU_FLAG_SIGN: u16 = 0b0000_0000_1000_0000;
pub const CPU_FLAG_TRAP: u16 = 0b0000_0001_0000_0000;
pub const CPU_FLAG_INT_ENABLE: u16 = 0b0000_0010_0000_0000;
pub const CPU_FLAG_DIRECTION: u16 = 0b0000_0100_0000_0000;
pub const CPU_FLAG_OVERFLOW: u16 = 0b0000_1000_0000_0000;
pub const CPU_FLAG_IOPL: u16 = 0b0011_0000_0000_0000;
pub const CPU_FLAG_NT: u16 = 0b0100_0000_0000_0000;

pub const CPU_FLAGS_RESERVED_ON: u16 = CPU_FLAG_RESERVED1;

// Machine status word bits (80286).
pub const MSW_PE: u16 = 0x0001;
pub const MSW_MP: u16 = 0x0002;
pub const MSW_EM: u16 = 0x0004;
pub const MSW_TS: u16 = 0x0008;
pub const MSW_RESERVED_ON: u16 = 0xFFF0;

// Asynchronous event flags. INTR and DMA are raised from the outside; the
// CPU owns the full set.
pub const INTFLAG_INTR: u32 = 0b0000_0001;
pub const INTFLAG_TRAP: u32 = 0b0000_0010;
pub const INTFLAG_HALT: u32 = 0b0000_0100;
pub const INTFLAG_DMA: u32 = 0b0000_1000;
pub const INTFLAG_NMI: u32 = 0b0001_0000;

// Instruction prefix bits, composed in op_prefixes before dispatch.
pub const OPCODE_PREFIX_ES_OVERRIDE: u32 = 0b0000_0001;
pub const OPCODE_PREFIX_CS_OVERRIDE: u32 = 0b0000_0010;
pub const OPCODE_PREFIX_SS_OVERRIDE: u32 = 0b0000_0100;
pub const OPCODE_PREFIX_DS_OVERRIDE: u32 = 0b0000_1000;
pub const OPCODE_PREFIX_SEG_MASK: u32 = 0b0000_1111;
pub const OPCODE_PREFIX_LOCK: u32 = 0b0001_0000;
pub const OPCODE_PREFIX_REP1: u32 = 0b0010_0000; // REPNE
pub const OPCODE_PREFIX_REP2: u32 = 0b0100_0000; // REP/REPE
pub const OPCODE_PREFIX_REP_MASK: u32 = OPCODE_PREFIX_REP1 | OPCODE_PREFIX_REP2;

// Maximum prefix bytes the 80286 will tolerate before raising #UD.
pub const PREFIX_LIMIT_80286: u32 = 10;

pub const OPCODE_REGISTER_SELECT_MASK: u8 = 0b0000_0111;

// Interrupt/exception vectors with architectural meaning to the core.
pub const VECTOR_DIVIDE_ERROR: u8 = 0;
pub const VECTOR_SINGLE_STEP: u8 = 1;
pub const VECTOR_NMI: u8 = 2;
pub const VECTOR_BREAKPOINT: u8 = 3;
pub const VECTOR_OVERFLOW: u8 = 4;
pub const VECTOR_BOUND: u8 = 5;
pub const VECTOR_INVALID_OPCODE: u8 = 6;
pub const VECTOR_DOUBLE_FAULT: u8 = 8;
pub const VECTOR_INVALID_TSS: u8 = 10;
pub const VECTOR_NOT_PRESENT: u8 = 11;
pub const VECTOR_STACK_FAULT: u8 = 12;
pub const VECTOR_GP_FAULT: u8 = 13;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CpuModel {
    Intel8088,
    Intel80186,
    Intel80286,
}

impl CpuModel {
    pub fn queue_depth(&self) -> usize {
        match self {
            CpuModel::Intel8088 => 4,
            _ => 6,
        }
    }

    pub fn default_clock(&self) -> u32 {
        match self {
            CpuModel::Intel80286 => 6_000_000,
            _ => 4_772_727,
        }
    }
}

impl Display for CpuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuModel::Intel8088 => write!(f, "8088"),
            CpuModel::Intel80186 => write!(f, "80186"),
            CpuModel::Intel80286 => write!(f, "80286"),
        }
    }
}

/// Host-level errors. Architectural faults are not errors; they dispatch
/// through the interrupt unit.
#[derive(Debug)]
pub enum CpuError {
    BadSnapshot(String),
    FatalInternalError(String),
}
impl Error for CpuError {}
impl Display for CpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuError::BadSnapshot(s) => write!(f, "The snapshot payload could not be restored: {}", s),
            CpuError::FatalInternalError(s) => write!(f, "The CPU entered an unrecoverable state: {}", s),
        }
    }
}

/// Architectural fault raised during decode or execution. Faults unwind the
/// current instruction via `?` and are dispatched as interrupts by the step
/// loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CpuFault {
    DivideError,
    InvalidOpcode,
    BoundRange,
    DoubleFault,
    InvalidTss(u16),
    NotPresent(u16),
    StackFault(u16),
    GeneralProtection(u16),
}

impl CpuFault {
    pub fn vector(&self) -> u8 {
        match self {
            CpuFault::DivideError => VECTOR_DIVIDE_ERROR,
            CpuFault::InvalidOpcode => VECTOR_INVALID_OPCODE,
            CpuFault::BoundRange => VECTOR_BOUND,
            CpuFault::DoubleFault => VECTOR_DOUBLE_FAULT,
            CpuFault::InvalidTss(_) => VECTOR_INVALID_TSS,
            CpuFault::NotPresent(_) => VECTOR_NOT_PRESENT,
            CpuFault::StackFault(_) => VECTOR_STACK_FAULT,
            CpuFault::GeneralProtection(_) => VECTOR_GP_FAULT,
        }
    }

    /// Error code pushed by the fault, if the fault class carries one.
    pub fn error_code(&self) -> Option<u16> {
        match self {
            CpuFault::DoubleFault => Some(0),
            CpuFault::InvalidTss(e) | CpuFault::NotPresent(e) | CpuFault::StackFault(e) | CpuFault::GeneralProtection(e) => {
                Some(*e)
            }
            _ => None,
        }
    }
}

/// Representation of a flag in the PS register.
pub enum Flag {
    Carry,
    Parity,
    AuxCarry,
    Zero,
    Sign,
    Trap,
    Interrupt,
    Direction,
    Overflow,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum RepType {
    #[default]
    NoRep,
    Rep,
    Repne,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Register8 {
    AL,
    CL,
    DL,
    BL,
    AH,
    CH,
    DH,
    BH,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Register16 {
    AX,
    CX,
    DX,
    BX,
    SP,
    BP,
    SI,
    DI,
    ES,
    CS,
    SS,
    DS,
    IP,
    InvalidRegister,
}

pub const REGISTER8_LUT: [Register8; 8] = [
    Register8::AL,
    Register8::CL,
    Register8::DL,
    Register8::BL,
    Register8::AH,
    Register8::CH,
    Register8::DH,
    Register8::BH,
];

pub const REGISTER16_LUT: [Register16; 8] = [
    Register16::AX,
    Register16::CX,
    Register16::DX,
    Register16::BX,
    Register16::SP,
    Register16::BP,
    Register16::SI,
    Register16::DI,
];

pub const SEGMENT_REGISTER16_LUT: [Register16; 4] = [Register16::ES, Register16::CS, Register16::SS, Register16::DS];

/// Named segment slot for address generation. `None` addresses the raw
/// physical space (descriptor-table and IVT walks).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    None,
    ES,
    CS,
    SS,
    DS,
}

impl Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::None => write!(f, "--"),
            Segment::ES => write!(f, "ES"),
            Segment::CS => write!(f, "CS"),
            Segment::SS => write!(f, "SS"),
            Segment::DS => write!(f, "DS"),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct GeneralRegisterBytes {
    pub l: u8,
    pub h: u8,
}

#[repr(C)]
pub union GeneralRegister {
    b: GeneralRegisterBytes,
    w: u16,
}
impl Default for GeneralRegister {
    fn default() -> Self {
        GeneralRegister { w: 0 }
    }
}

impl GeneralRegister {
    // Safety: It is safe to access fields of a union comprised of unsigned integer types.
    #[inline(always)]
    pub fn x(&self) -> u16 {
        unsafe { self.w }
    }
    #[inline(always)]
    pub fn set_x(&mut self, value: u16) {
        self.w = value;
    }
    #[inline(always)]
    pub fn h(&self) -> u8 {
        unsafe { self.b.h }
    }
    #[inline(always)]
    pub fn set_h(&mut self, value: u8) {
        self.b.h = value;
    }
    #[inline(always)]
    pub fn l(&self) -> u8 {
        unsafe { self.b.l }
    }
    #[inline(always)]
    pub fn set_l(&mut self, value: u8) {
        self.b.l = value;
    }
    #[inline(always)]
    pub fn incr_x(&mut self) {
        self.w = unsafe { self.w.wrapping_add(1) };
    }
    #[inline(always)]
    pub fn decr_x(&mut self) {
        self.w = unsafe { self.w.wrapping_sub(1) };
    }
}

pub type Handler = fn(&mut Cpu, &mut dyn Chipset) -> Result<(), CpuFault>;

pub type IntNotifyFn = Box<dyn FnMut(&mut Cpu, u8) -> bool>;
pub type IntReturnFn = Box<dyn FnOnce(&mut Cpu)>;

#[derive(Copy, Clone, Debug)]
pub struct CpuOptions {
    /// Emulated clock rate. None selects the model default.
    pub cycles_per_second: Option<u32>,
    /// Model the prefetch queue. With this off, instruction bytes are read
    /// directly from the bus; architected state is identical either way.
    pub prefetch: bool,
}

impl Default for CpuOptions {
    fn default() -> Self {
        Self {
            cycles_per_second: None,
            prefetch: true,
        }
    }
}

pub struct Cpu {
    model: CpuModel,

    // General registers. AX/BX/CX/DX are byte-addressable.
    pub(crate) a: GeneralRegister,
    pub(crate) b: GeneralRegister,
    pub(crate) c: GeneralRegister,
    pub(crate) d: GeneralRegister,
    pub(crate) sp: u16,
    pub(crate) bp: u16,
    pub(crate) si: u16,
    pub(crate) di: u16,
    pub(crate) ip: u16,

    // Segment registers with their descriptor caches.
    pub(crate) cs: SegmentRegister,
    pub(crate) ds: SegmentRegister,
    pub(crate) ss: SegmentRegister,
    pub(crate) es: SegmentRegister,
    pub(crate) ldtr: SegmentRegister,
    pub(crate) tr: SegmentRegister,
    pub(crate) gdt: DescriptorTable,
    pub(crate) idt: DescriptorTable,
    pub(crate) msw: u16,
    pub(crate) cpl: u8,

    // Processor status: direct bits live here, arithmetic bits are derived
    // from the result tuple (see cpu::flags).
    pub(crate) ps_direct: u16,
    pub(crate) result_value: u32,
    pub(crate) result_parsign: u32,
    pub(crate) result_auxovf: u32,
    pub(crate) result_size: u32,

    // Asynchronous event state.
    pub(crate) int_flags: u32,
    pub(crate) int_inhibit: bool,

    // Per-instruction scratch.
    pub(crate) opcode: u8,
    pub(crate) in_prefix: bool,
    pub(crate) seg_data: Segment,
    pub(crate) seg_stack: Segment,
    pub(crate) op_prefixes: u32,
    pub(crate) prefix_ct: u32,
    pub(crate) instruction_ip: u16,
    pub(crate) rep_prefix_ip: u16,
    pub(crate) rep_type: RepType,
    pub(crate) rep_resume: bool,

    // ModRM scratch.
    pub(crate) modrm_mod: u8,
    pub(crate) modrm_reg: u8,
    pub(crate) modrm_rm: u8,
    pub(crate) ea_seg: Segment,
    pub(crate) ea_off: u16,
    pub(crate) ea_loaded: bool,

    // Cycle accounting.
    pub(crate) cycles_left: i32,
    pub(crate) burst_cycles: i32,
    pub(crate) instr_cycles: u32,
    pub(crate) busy_cycles: u32,
    pub(crate) total_cycles: u64,
    pub(crate) instruction_count: u64,
    pub(crate) cycles_per_second: u32,

    // Instruction fetch.
    pub(crate) queue: PrefetchQueue,
    pub(crate) piq_enabled: bool,

    // Dispatch tables, built once per model.
    pub(crate) table: [Handler; 256],
    pub(crate) table_0f: [Handler; 256],
    pub(crate) timing: CycleTable,

    pub(crate) bus: MemoryBus,

    // Instrumentation registries, cleared on reset.
    pub(crate) int_notify: FxHashMap<u8, Vec<(&'static str, IntNotifyFn)>>,
    pub(crate) int_return: FxHashMap<u32, IntReturnFn>,

    // Minimal debugger surface.
    pub(crate) breakpoints: Vec<u32>,
    pub(crate) breakpoint_hit: bool,

    pub(crate) error: Option<String>,
}

impl Cpu {
    pub fn new(model: CpuModel, options: CpuOptions) -> Self {
        let mut cpu = Cpu {
            model,
            a: GeneralRegister::default(),
            b: GeneralRegister::default(),
            c: GeneralRegister::default(),
            d: GeneralRegister::default(),
            sp: 0,
            bp: 0,
            si: 0,
            di: 0,
            ip: 0,
            cs: SegmentRegister::new(Segment::CS),
            ds: SegmentRegister::new(Segment::DS),
            ss: SegmentRegister::new(Segment::SS),
            es: SegmentRegister::new(Segment::ES),
            ldtr: SegmentRegister::new(Segment::None),
            tr: SegmentRegister::new(Segment::None),
            gdt: DescriptorTable::default(),
            idt: DescriptorTable::default(),
            msw: 0,
            cpl: 0,
            ps_direct: 0,
            result_value: 0,
            result_parsign: 0,
            result_auxovf: 0,
            result_size: RESULT_WORD,
            int_flags: 0,
            int_inhibit: false,
            opcode: 0,
            in_prefix: false,
            seg_data: Segment::DS,
            seg_stack: Segment::SS,
            op_prefixes: 0,
            prefix_ct: 0,
            instruction_ip: 0,
            rep_prefix_ip: 0,
            rep_type: RepType::NoRep,
            rep_resume: false,
            modrm_mod: 0,
            modrm_reg: 0,
            modrm_rm: 0,
            ea_seg: Segment::DS,
            ea_off: 0,
            ea_loaded: false,
            cycles_left: 0,
            burst_cycles: 0,
            instr_cycles: 0,
            busy_cycles: 0,
            total_cycles: 0,
            instruction_count: 0,
            cycles_per_second: options.cycles_per_second.unwrap_or_else(|| model.default_clock()),
            queue: PrefetchQueue::new(model.queue_depth()),
            piq_enabled: options.prefetch,
            table: decode::build_table(model),
            table_0f: decode::build_table_0f(model),
            timing: CycleTable::new(model),
            bus: MemoryBus::new(model),
            int_notify: FxHashMap::default(),
            int_return: FxHashMap::default(),
            breakpoints: Vec::new(),
            breakpoint_hit: false,
            error: None,
        };
        cpu.reset();
        cpu
    }

    /// Reset to the architectural power-on state. Memory contents and the
    /// A20 gate are left alone; everything else returns to defaults.
    pub fn reset(&mut self) {
        self.a.set_x(0);
        self.b.set_x(0);
        self.c.set_x(0);
        self.d.set_x(0);
        self.sp = 0;
        self.bp = 0;
        self.si = 0;
        self.di = 0;

        self.ds = SegmentRegister::new(Segment::DS);
        self.ss = SegmentRegister::new(Segment::SS);
        self.es = SegmentRegister::new(Segment::ES);
        self.ldtr = SegmentRegister::new(Segment::None);
        self.tr = SegmentRegister::new(Segment::None);
        self.gdt = DescriptorTable::default();
        self.idt = DescriptorTable::default();
        self.cpl = 0;

        match self.model {
            CpuModel::Intel80286 => {
                self.msw = MSW_RESERVED_ON;
                self.cs = SegmentRegister::new(Segment::CS);
                self.cs.selector = 0xF000;
                // Until the first far jump, CS maps to the top of the 24-bit
                // space so that the reset vector executes out of high ROM.
                self.cs.base = 0xFF_0000;
                self.ip = 0xFFF0;
                self.idt.limit = 0x03FF;
            }
            _ => {
                self.msw = 0;
                self.cs = SegmentRegister::new(Segment::CS);
                self.cs.load_real(0xFFFF);
                self.ip = 0x0000;
                self.idt.limit = 0x03FF;
            }
        }

        self.ps_direct = 0;
        self.result_size = RESULT_WORD;
        self.set_ps(CPU_FLAGS_RESERVED_ON);

        self.int_flags = 0;
        self.int_inhibit = false;
        self.opcode = 0;
        self.in_prefix = false;
        self.seg_data = Segment::DS;
        self.seg_stack = Segment::SS;
        self.op_prefixes = 0;
        self.prefix_ct = 0;
        self.rep_type = RepType::NoRep;
        self.rep_resume = false;
        self.ea_loaded = false;
        self.error = None;
        self.breakpoint_hit = false;

        self.int_notify.clear();
        self.int_return.clear();

        let lip = self.lip();
        self.queue.flush(lip);

        log::debug!("CPU reset: model {} CS:IP {:04X}:{:04X}", self.model, self.cs.selector, self.ip);
    }

    #[inline]
    pub fn model(&self) -> CpuModel {
        self.model
    }

    #[inline]
    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    #[inline]
    pub fn bus_mut(&mut self) -> &mut MemoryBus {
        &mut self.bus
    }

    /// Linear address of the next instruction byte.
    #[inline]
    pub fn lip(&self) -> u32 {
        self.cs.base.wrapping_add(self.ip as u32)
    }

    #[inline]
    pub fn ip(&self) -> u16 {
        self.ip
    }

    #[inline]
    pub fn in_protected_mode(&self) -> bool {
        self.msw & MSW_PE != 0
    }

    /// Aim the CPU at a real-mode CS:IP, as a host does after loading a
    /// program image. Protected-mode transfers must go through the
    /// architectural paths instead.
    pub fn set_cs_ip(&mut self, selector: u16, offset: u16) {
        if self.in_protected_mode() {
            log::warn!("set_cs_ip ignored in protected mode");
            return;
        }
        self.cs.load_real(selector);
        self.ip = offset;
        self.biu_queue_flush();
    }

    #[inline]
    pub fn is_halted(&self) -> bool {
        self.int_flags & INTFLAG_HALT != 0
    }

    #[inline]
    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    #[inline]
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    #[inline]
    pub fn cycles_per_second(&self) -> u32 {
        self.cycles_per_second
    }

    pub fn register8(&self, reg: Register8) -> u8 {
        match reg {
            Register8::AL => self.a.l(),
            Register8::CL => self.c.l(),
            Register8::DL => self.d.l(),
            Register8::BL => self.b.l(),
            Register8::AH => self.a.h(),
            Register8::CH => self.c.h(),
            Register8::DH => self.d.h(),
            Register8::BH => self.b.h(),
        }
    }

    pub fn set_register8(&mut self, reg: Register8, value: u8) {
        match reg {
            Register8::AL => self.a.set_l(value),
            Register8::CL => self.c.set_l(value),
            Register8::DL => self.d.set_l(value),
            Register8::BL => self.b.set_l(value),
            Register8::AH => self.a.set_h(value),
            Register8::CH => self.c.set_h(value),
            Register8::DH => self.d.set_h(value),
            Register8::BH => self.b.set_h(value),
        }
    }

    pub fn register16(&self, reg: Register16) -> u16 {
        match reg {
            Register16::AX => self.a.x(),
            Register16::CX => self.c.x(),
            Register16::DX => self.d.x(),
            Register16::BX => self.b.x(),
            Register16::SP => self.sp,
            Register16::BP => self.bp,
            Register16::SI => self.si,
            Register16::DI => self.di,
            Register16::ES => self.es.selector,
            Register16::CS => self.cs.selector,
            Register16::SS => self.ss.selector,
            Register16::DS => self.ds.selector,
            Register16::IP => self.ip,
            Register16::InvalidRegister => panic!("Invalid register read"),
        }
    }

    /// Set a general register. Segment registers must go through the
    /// segment unit so that the descriptor cache stays coherent.
    pub fn set_register16(&mut self, reg: Register16, value: u16) {
        match reg {
            Register16::AX => self.a.set_x(value),
            Register16::CX => self.c.set_x(value),
            Register16::DX => self.d.set_x(value),
            Register16::BX => self.b.set_x(value),
            Register16::SP => self.sp = value,
            Register16::BP => self.bp = value,
            Register16::SI => self.si = value,
            Register16::DI => self.di = value,
            Register16::IP => self.ip = value,
            _ => panic!("set_register16 on segment register"),
        }
    }

    #[inline]
    pub(crate) fn seg(&self, seg: Segment) -> &SegmentRegister {
        match seg {
            Segment::ES => &self.es,
            Segment::CS => &self.cs,
            Segment::SS => &self.ss,
            Segment::DS => &self.ds,
            Segment::None => panic!("Segment::None has no register"),
        }
    }

    #[inline]
    pub(crate) fn seg_mut(&mut self, seg: Segment) -> &mut SegmentRegister {
        match seg {
            Segment::ES => &mut self.es,
            Segment::CS => &mut self.cs,
            Segment::SS => &mut self.ss,
            Segment::DS => &mut self.ds,
            Segment::None => panic!("Segment::None has no register"),
        }
    }

    pub fn cs_segment(&self) -> &SegmentRegister {
        &self.cs
    }

    pub fn get_msw(&self) -> u16 {
        self.msw
    }

    // ----------------------------------------------------------------------
    // Asynchronous event surface (called from the host / PIC / DMA).

    /// Raise or drop the INTR line.
    pub fn set_intr(&mut self, raise: bool) {
        if raise {
            self.int_flags |= INTFLAG_INTR;
        }
        else {
            self.int_flags &= !INTFLAG_INTR;
        }
    }

    /// Raise the NMI line. Serviced ahead of INTR, not maskable by IF.
    pub fn raise_nmi(&mut self) {
        self.int_flags |= INTFLAG_NMI;
    }

    /// Flag that an asynchronous DMA transfer is in flight. The CPU polls
    /// the chipset until it reports completion.
    pub fn set_dma_pending(&mut self) {
        self.int_flags |= INTFLAG_DMA;
    }

    /// Suppress interrupt acknowledgment for the next instruction (the STI
    /// shadow, also used by the PIC to model acknowledge latency).
    pub fn delay_intr(&mut self) {
        self.int_inhibit = true;
    }

    /// Clamp the current burst so the step loop exits after the current
    /// instruction completes.
    pub fn halt_cpu(&mut self) {
        self.cycles_left = 0;
    }

    pub fn int_flags(&self) -> u32 {
        self.int_flags
    }

    // ----------------------------------------------------------------------
    // Instrumentation registries.

    /// Observe software interrupts of the given vector. The callback fires
    /// for explicit INT n only; returning false suppresses the interrupt
    /// (the host has serviced it).
    pub fn add_int_notify(&mut self, vector: u8, tag: &'static str, callback: IntNotifyFn) {
        self.int_notify.entry(vector).or_default().push((tag, callback));
    }

    pub fn remove_int_notify(&mut self, vector: u8, tag: &'static str) {
        if let Some(list) = self.int_notify.get_mut(&vector) {
            list.retain(|(t, _)| *t != tag);
        }
    }

    /// Register a one-shot callback fired when the instruction at the given
    /// linear address next executes (a saved return site).
    pub fn add_int_return(&mut self, linear_addr: u32, callback: IntReturnFn) {
        self.int_return.insert(linear_addr, callback);
    }

    // ----------------------------------------------------------------------
    // Minimal debugger surface.

    pub fn set_breakpoint(&mut self, linear_addr: u32) {
        if !self.breakpoints.contains(&linear_addr) {
            self.breakpoints.push(linear_addr);
        }
    }

    pub fn clear_breakpoint(&mut self, linear_addr: u32) {
        self.breakpoints.retain(|a| *a != linear_addr);
    }

    // ----------------------------------------------------------------------
    // Host error channel.

    /// Record a fatal host-level error. The CPU refuses to step until the
    /// next reset.
    pub fn set_error(&mut self, msg: &str) {
        log::error!("CPU fatal error: {}", msg);
        self.error = Some(msg.to_string());
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }
}
