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

    tests/scenarios.rs

    End-to-end scenarios driven through the public API: small programs in
    RAM, stepped with scripted chipset stubs, asserting architected state.
*/

use iapx_core::{Chipset, Cpu, CpuModel, CpuOptions, Flag, NullChipset, Register16, Register8};

const PS_CF: u16 = 0x0001;
const PS_ZF: u16 = 0x0040;
const PS_SF: u16 = 0x0080;
const PS_OF: u16 = 0x0800;
const PS_AF: u16 = 0x0010;
const PS_PF: u16 = 0x0004;

fn cpu_with_ram(model: CpuModel) -> Cpu {
    let mut cpu = Cpu::new(model, CpuOptions::default());
    cpu.bus_mut().install_ram(0, 0x20000);
    cpu
}

/// Step one full instruction.
fn step(cpu: &mut Cpu, sys: &mut dyn Chipset) {
    cpu.step_cpu(sys, 0);
}

struct OneShotPic {
    vector: i16,
}
impl Chipset for OneShotPic {
    fn get_irr_vector(&mut self) -> i16 {
        let v = self.vector;
        self.vector = -1;
        v
    }
}

#[test]
fn reset_state_matches_model() {
    let cpu = cpu_with_ram(CpuModel::Intel8088);
    for reg in [
        Register16::AX,
        Register16::BX,
        Register16::CX,
        Register16::DX,
        Register16::SP,
        Register16::BP,
        Register16::SI,
        Register16::DI,
    ] {
        assert_eq!(cpu.register16(reg), 0);
    }
    assert_eq!(cpu.register16(Register16::CS), 0xFFFF);
    assert_eq!(cpu.ip(), 0x0000);
    assert_eq!(cpu.register16(Register16::DS), 0);
    assert_eq!(cpu.register16(Register16::SS), 0);
    assert_eq!(cpu.register16(Register16::ES), 0);
    assert_eq!(cpu.get_ps(), 0x0002);

    let cpu = cpu_with_ram(CpuModel::Intel80286);
    assert_eq!(cpu.register16(Register16::CS), 0xF000);
    assert_eq!(cpu.ip(), 0xFFF0);
    assert_eq!(cpu.lip(), 0xFF_FFF0);
    assert_eq!(cpu.get_msw(), 0xFFF0);
}

#[test]
fn mov_ax_imm_at_nonzero_cs() {
    let mut cpu = cpu_with_ram(CpuModel::Intel8088);
    let mut sys = NullChipset;

    cpu.set_cs_ip(0x1000, 0x0020);
    cpu.bus_mut().copy_in(&[0xB8, 0x34, 0x12], 0x10020);

    step(&mut cpu, &mut sys);
    assert_eq!(cpu.register16(Register16::AX), 0x1234);
    assert_eq!(cpu.ip(), 0x0023);
    assert_eq!(cpu.lip(), 0x10023);
}

#[test]
fn add_flag_pattern() {
    let mut cpu = cpu_with_ram(CpuModel::Intel8088);
    let mut sys = NullChipset;

    cpu.set_cs_ip(0x0100, 0x0000);
    // MOV AX,7FFF; ADD AX,1
    cpu.bus_mut().copy_in(&[0xB8, 0xFF, 0x7F, 0x05, 0x01, 0x00], 0x1000);

    step(&mut cpu, &mut sys);
    step(&mut cpu, &mut sys);

    assert_eq!(cpu.register16(Register16::AX), 0x8000);
    let ps = cpu.get_ps();
    assert_eq!(ps & PS_CF, 0);
    assert_eq!(ps & PS_ZF, 0);
    assert_ne!(ps & PS_SF, 0);
    assert_ne!(ps & PS_OF, 0);
    assert_ne!(ps & PS_AF, 0);
    // Result low byte 00: even parity.
    assert_ne!(ps & PS_PF, 0);
}

#[test]
fn shift_count_masking_differs_by_model() {
    // MOV CL,33; MOV AX,1; SHL AX,CL
    let program = [0xB1, 0x21, 0xB8, 0x01, 0x00, 0xD3, 0xE0];

    let mut cpu = cpu_with_ram(CpuModel::Intel8088);
    let mut sys = NullChipset;
    cpu.set_cs_ip(0x0100, 0x0000);
    cpu.bus_mut().copy_in(&program, 0x1000);
    for _ in 0..3 {
        step(&mut cpu, &mut sys);
    }
    assert_eq!(cpu.register16(Register16::AX), 0);

    let mut cpu = cpu_with_ram(CpuModel::Intel80286);
    let mut sys = NullChipset;
    cpu.set_cs_ip(0x0100, 0x0000);
    cpu.bus_mut().copy_in(&program, 0x1000);
    for _ in 0..3 {
        step(&mut cpu, &mut sys);
    }
    assert_eq!(cpu.register16(Register16::AX), 2);
}

#[test]
fn real_mode_int21_frame() {
    let mut cpu = cpu_with_ram(CpuModel::Intel8088);
    let mut sys = NullChipset;

    // IVT entry 21h -> 2000:0100.
    cpu.bus_mut().write_u16(0x21 * 4, 0x0100);
    cpu.bus_mut().write_u16(0x21 * 4 + 2, 0x2000);

    // Set up SS:SP = 0300:0100 and flags, then INT 21h at 0100:0000.
    cpu.set_cs_ip(0x0500, 0x0000);
    cpu.bus_mut().copy_in(
        &[
            0xB8, 0x00, 0x03, // MOV AX,0300
            0x8E, 0xD0, // MOV SS,AX
            0xBC, 0x00, 0x01, // MOV SP,0100
            0xFB, // STI
            0xEA, 0x00, 0x00, 0x00, 0x01, // JMP 0100:0000
        ],
        0x5000,
    );
    cpu.bus_mut().copy_in(&[0xCD, 0x21], 0x1000);

    for _ in 0..5 {
        step(&mut cpu, &mut sys);
    }
    assert_eq!(cpu.register16(Register16::CS), 0x0100);
    let ps_before = cpu.get_ps();
    assert_eq!(ps_before & 0x0202, 0x0202);

    step(&mut cpu, &mut sys); // INT 21h

    assert_eq!(cpu.register16(Register16::CS), 0x2000);
    assert_eq!(cpu.ip(), 0x0100);
    assert!(!cpu.get_flag(Flag::Interrupt));
    assert!(!cpu.get_flag(Flag::Trap));

    // Frame at SS:SP, pushed PS then CS then IP.
    assert_eq!(cpu.register16(Register16::SP), 0x00FA);
    assert_eq!(cpu.bus_mut().read_u16(0x30FE), ps_before);
    assert_eq!(cpu.bus_mut().read_u16(0x30FC), 0x0100);
    assert_eq!(cpu.bus_mut().read_u16(0x30FA), 0x0002);
}

#[test]
fn push_sp_dichotomy() {
    // MOV AX,0300; MOV SS,AX; MOV SP,0100; PUSH SP
    let program = [0xB8, 0x00, 0x03, 0x8E, 0xD0, 0xBC, 0x00, 0x01, 0x54];

    let mut cpu = cpu_with_ram(CpuModel::Intel8088);
    let mut sys = NullChipset;
    cpu.set_cs_ip(0x0100, 0x0000);
    cpu.bus_mut().copy_in(&program, 0x1000);
    for _ in 0..4 {
        step(&mut cpu, &mut sys);
    }
    assert_eq!(cpu.bus_mut().read_u16(0x30FE), 0x00FE);

    let mut cpu = cpu_with_ram(CpuModel::Intel80286);
    let mut sys = NullChipset;
    cpu.set_cs_ip(0x0100, 0x0000);
    cpu.bus_mut().copy_in(&program, 0x1000);
    for _ in 0..4 {
        step(&mut cpu, &mut sys);
    }
    assert_eq!(cpu.bus_mut().read_u16(0x30FE), 0x0100);
}

/// The same program must leave identical architected state with the
/// prefetch queue on or off.
#[test]
fn prefetch_state_equivalence() {
    let program = [
        0xB8, 0x10, 0x00, // MOV AX,0010
        0xBB, 0x00, 0x30, // MOV BX,3000
        0x89, 0x07, // MOV [BX],AX
        0x40, // INC AX
        0xEB, 0x02, // JMP +2
        0x40, 0x40, // (skipped)
        0x05, 0x00, 0x01, // ADD AX,0100
        0x8B, 0x0F, // MOV CX,[BX]
        0xF4, // HLT
    ];

    let mut results = Vec::new();
    for prefetch in [true, false] {
        let mut cpu = Cpu::new(
            CpuModel::Intel8088,
            CpuOptions {
                cycles_per_second: None,
                prefetch,
            },
        );
        cpu.bus_mut().install_ram(0, 0x20000);
        cpu.set_cs_ip(0x0100, 0x0000);
        cpu.bus_mut().copy_in(&program, 0x1000);
        let mut sys = NullChipset;

        while !cpu.is_halted() {
            step(&mut cpu, &mut sys);
        }

        results.push((
            cpu.register16(Register16::AX),
            cpu.register16(Register16::BX),
            cpu.register16(Register16::CX),
            cpu.ip(),
            cpu.get_ps(),
            cpu.bus_mut().read_u16(0x3000),
        ));
    }

    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].0, 0x0111);
    assert_eq!(results[0].2, 0x0010);
}

/// An interrupt arriving mid REP MOVSB leaves the saved IP at the first
/// prefix byte on the 80186+, and the copy resumes correctly after IRET.
#[test]
fn rep_movsb_interrupt_resumes() {
    let mut cpu = cpu_with_ram(CpuModel::Intel80186);

    // IVT entry 8 -> 0500:0000, handler is a lone IRET.
    cpu.bus_mut().write_u16(0x20, 0x0000);
    cpu.bus_mut().write_u16(0x22, 0x0500);
    cpu.bus_mut().copy_in(&[0xCF], 0x5000);

    // STI; MOV CX,000A; MOV SI,3000; MOV DI,3100; REP MOVSB; HLT
    let program = [
        0xFB, // STI
        0xB9, 0x0A, 0x00, // MOV CX,000A
        0xBE, 0x00, 0x30, // MOV SI,3000
        0xBF, 0x00, 0x31, // MOV DI,3100
        0xF3, 0xA4, // REP MOVSB      (ip 000A)
        0xF4, // HLT
    ];
    cpu.set_cs_ip(0x0100, 0x0000);
    cpu.bus_mut().copy_in(&program, 0x1000);

    let src: Vec<u8> = (1..=10).collect();
    cpu.bus_mut().copy_in(&src, 0x3000);

    let mut sys = NullChipset;
    for _ in 0..4 {
        step(&mut cpu, &mut sys);
    }

    // Three elements, one per dispatch.
    for _ in 0..3 {
        step(&mut cpu, &mut sys);
    }
    assert_eq!(cpu.register16(Register16::CX), 7);

    // Interrupt lands at the boundary; the saved IP points at the REP
    // prefix so IRET resumes the string op.
    cpu.set_intr(true);
    let mut pic = OneShotPic { vector: 0x08 };
    step(&mut cpu, &mut pic);
    assert_eq!(cpu.register16(Register16::CS), 0x0500);
    let sp = cpu.register16(Register16::SP);
    let saved_ip = cpu.bus_mut().read_u16(sp as u32);
    assert_eq!(saved_ip, 0x000A);
    assert_eq!(cpu.register16(Register16::CX), 7);

    // IRET, then run the copy to completion.
    step(&mut cpu, &mut pic);
    assert_eq!(cpu.register16(Register16::CS), 0x0100);

    while !cpu.is_halted() {
        step(&mut cpu, &mut pic);
    }
    assert_eq!(cpu.register16(Register16::CX), 0);
    for i in 0..10u32 {
        assert_eq!(cpu.bus_mut().read_u8(0x3100 + i), (i + 1) as u8);
    }
}

/// The 8086 resumes a repeated string op from the REP prefix alone,
/// dropping an earlier segment override; the 80186 keeps the whole prefix
/// chain.
#[test]
fn rep_interrupt_prefix_address_differs_by_model() {
    for (model, expected_ip) in [(CpuModel::Intel8088, 0x000Bu16), (CpuModel::Intel80186, 0x000A)] {
        let mut cpu = cpu_with_ram(model);

        cpu.bus_mut().write_u16(0x20, 0x0000);
        cpu.bus_mut().write_u16(0x22, 0x0500);
        cpu.bus_mut().copy_in(&[0xCF], 0x5000);

        // STI; MOV CX,0004; MOV SI,3000; MOV DI,3100; ES: REP MOVSB; HLT
        let program = [
            0xFB, // STI
            0xB9, 0x04, 0x00, // MOV CX,0004
            0xBE, 0x00, 0x30, // MOV SI,3000
            0xBF, 0x00, 0x31, // MOV DI,3100
            0x26, 0xF3, 0xA4, // ES: REP MOVSB  (ip 000A: ES, 000B: REP)
            0xF4, // HLT
        ];
        cpu.set_cs_ip(0x0100, 0x0000);
        cpu.bus_mut().copy_in(&program, 0x1000);

        let mut sys = NullChipset;
        for _ in 0..4 {
            step(&mut cpu, &mut sys);
        }
        step(&mut cpu, &mut sys); // one element
        assert_eq!(cpu.register16(Register16::CX), 3);

        cpu.set_intr(true);
        let mut pic = OneShotPic { vector: 0x08 };
        step(&mut cpu, &mut pic);
        assert_eq!(cpu.register16(Register16::CS), 0x0500, "model {:?}", model);

        let sp = cpu.register16(Register16::SP);
        let saved_ip = cpu.bus_mut().read_u16(sp as u32);
        assert_eq!(saved_ip, expected_ip, "model {:?}", model);
    }
}

#[test]
fn xlat_and_lods_use_override() {
    let mut cpu = cpu_with_ram(CpuModel::Intel8088);
    let mut sys = NullChipset;

    // MOV AX,0400; MOV ES,AX; MOV BX,0010; MOV AL,02; ES: XLAT
    let program = [
        0xB8, 0x00, 0x04, // MOV AX,0400
        0x8E, 0xC0, // MOV ES,AX
        0xBB, 0x10, 0x00, // MOV BX,0010
        0xB0, 0x02, // MOV AL,02
        0x26, 0xD7, // ES: XLAT
    ];
    cpu.set_cs_ip(0x0100, 0x0000);
    cpu.bus_mut().copy_in(&program, 0x1000);
    // Table at ES:0010 -> linear 4010.
    cpu.bus_mut().copy_in(&[0xA0, 0xA1, 0xA2, 0xA3], 0x4010);

    for _ in 0..5 {
        step(&mut cpu, &mut sys);
    }
    assert_eq!(cpu.register8(Register8::AL), 0xA2);
}

#[test]
fn int_notify_services_dos_call() {
    let mut cpu = cpu_with_ram(CpuModel::Intel8088);
    let mut sys = NullChipset;

    // An IVT entry that would crash if reached.
    cpu.bus_mut().write_u16(0x21 * 4, 0xFFFF);
    cpu.bus_mut().write_u16(0x21 * 4 + 2, 0xFFFF);

    cpu.add_int_notify(0x21, "dos-shim", Box::new(|cpu, _vector| {
        // Pretend we serviced AH=30 get-version.
        cpu.set_register16(Register16::AX, 0x0005);
        false
    }));

    cpu.set_cs_ip(0x0100, 0x0000);
    cpu.bus_mut().copy_in(&[0xCD, 0x21, 0x90], 0x1000);

    step(&mut cpu, &mut sys);
    assert_eq!(cpu.register16(Register16::AX), 0x0005);
    // Suppressed: execution continued inline.
    assert_eq!(cpu.register16(Register16::CS), 0x0100);
    assert_eq!(cpu.ip(), 0x0002);
}

#[test]
fn int_return_hook_fires_once() {
    let mut cpu = cpu_with_ram(CpuModel::Intel8088);
    let mut sys = NullChipset;

    cpu.set_cs_ip(0x0100, 0x0000);
    cpu.bus_mut().copy_in(&[0x40, 0x40, 0x40], 0x1000);

    cpu.add_int_return(0x1001, Box::new(|cpu| {
        cpu.set_register16(Register16::BX, 0xBEEF);
    }));

    step(&mut cpu, &mut sys);
    assert_eq!(cpu.register16(Register16::BX), 0x0000);

    step(&mut cpu, &mut sys);
    assert_eq!(cpu.register16(Register16::BX), 0xBEEF);
}

#[test]
fn idiv_boundary_differs_by_model() {
    // MOV AX,FF80; MOV BL,01; IDIV BL  (quotient -128)
    let program = [0xB8, 0x80, 0xFF, 0xB3, 0x01, 0xF6, 0xFB];

    // 8086: faults through vector 0.
    let mut cpu = cpu_with_ram(CpuModel::Intel8088);
    let mut sys = NullChipset;
    cpu.bus_mut().write_u16(0x00, 0x0000);
    cpu.bus_mut().write_u16(0x02, 0x0700);
    cpu.set_cs_ip(0x0100, 0x0000);
    cpu.bus_mut().copy_in(&program, 0x1000);
    for _ in 0..3 {
        step(&mut cpu, &mut sys);
    }
    assert_eq!(cpu.register16(Register16::CS), 0x0700);

    // 80186: accepts the quotient.
    let mut cpu = cpu_with_ram(CpuModel::Intel80186);
    let mut sys = NullChipset;
    cpu.set_cs_ip(0x0100, 0x0000);
    cpu.bus_mut().copy_in(&program, 0x1000);
    for _ in 0..3 {
        step(&mut cpu, &mut sys);
    }
    assert_eq!(cpu.register8(Register8::AL), 0x80);
    assert_eq!(cpu.register16(Register16::CS), 0x0100);
}
