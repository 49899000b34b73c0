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

    cpu::cycle.rs

    Documented per-instruction cycle costs, one table per model, selected at
    construction. Memory forms list the cost without effective-address
    time; the EA table contributes separately, and the bus adds the word
    transfer penalty on 8-bit-bus parts.
*/

use crate::cpu::CpuModel;

#[derive(Copy, Clone, Debug)]
pub struct CycleTable {
    // Extra cycles per 16-bit bus transfer (8-bit data bus parts only).
    pub word_penalty: u32,

    // Effective address time: [mod 0][rm] and [mod 1|2][rm].
    pub ea_direct: [u32; 8],
    pub ea_disp: [u32; 8],

    pub alu_rr: u32,
    pub alu_rm: u32,
    pub alu_mr: u32,
    pub alu_ri: u32,
    pub alu_mi: u32,
    pub alu_ai: u32,
    pub cmp_mr: u32,
    pub cmp_mi: u32,
    pub test_rr: u32,
    pub test_rm: u32,
    pub test_ri: u32,
    pub test_mi: u32,
    pub inc_r: u32,
    pub inc_m: u32,

    pub mov_rr: u32,
    pub mov_rm: u32,
    pub mov_mr: u32,
    pub mov_ri: u32,
    pub mov_mi: u32,
    pub mov_am: u32,
    pub mov_ma: u32,
    pub mov_srr: u32,
    pub mov_srm: u32,
    pub mov_msr: u32,

    pub push_r: u32,
    pub push_s: u32,
    pub push_m: u32,
    pub push_i: u32,
    pub pop_r: u32,
    pub pop_s: u32,
    pub pop_m: u32,
    pub pushf: u32,
    pub popf: u32,
    pub pusha: u32,
    pub popa: u32,

    pub xchg_rr: u32,
    pub xchg_rm: u32,
    pub xchg_ar: u32,
    pub lea: u32,
    pub lptr: u32,
    pub xlat: u32,
    pub lahf: u32,
    pub sahf: u32,
    pub cbw: u32,
    pub cwd: u32,

    pub jcc_t: u32,
    pub jcc_nt: u32,
    pub jmp_rel: u32,
    pub jmp_far: u32,
    pub jmp_rm: u32,
    pub jmp_m_far: u32,
    pub call_near: u32,
    pub call_rm: u32,
    pub call_far: u32,
    pub call_m_far: u32,
    pub ret_near: u32,
    pub ret_near_imm: u32,
    pub ret_far: u32,
    pub ret_far_imm: u32,
    pub loop_t: u32,
    pub loop_nt: u32,
    pub loope_t: u32,
    pub loope_nt: u32,
    pub jcxz_t: u32,
    pub jcxz_nt: u32,

    pub int_n: u32,
    pub int3: u32,
    pub into_t: u32,
    pub into_nt: u32,
    pub iret: u32,
    pub bound: u32,

    pub shift_1_r: u32,
    pub shift_1_m: u32,
    pub shift_cl_r: u32,
    pub shift_cl_m: u32,
    pub shift_per_bit: u32,

    pub mul8: u32,
    pub mul16: u32,
    pub imul8: u32,
    pub imul16: u32,
    pub imul_imm: u32,
    pub div8: u32,
    pub div16: u32,
    pub idiv8: u32,
    pub idiv16: u32,
    pub aam: u32,
    pub aad: u32,
    pub daa: u32,
    pub aaa: u32,

    pub str_movs: u32,
    pub str_cmps: u32,
    pub str_scas: u32,
    pub str_lods: u32,
    pub str_stos: u32,
    pub str_ins: u32,
    pub str_outs: u32,
    pub rep_base: u32,

    pub in_imm: u32,
    pub in_dx: u32,
    pub out_imm: u32,
    pub out_dx: u32,

    pub enter: u32,
    pub leave: u32,

    pub flag_op: u32,
    pub nop: u32,
    pub hlt: u32,
    pub wait_op: u32,
    pub esc: u32,
    pub prefix: u32,

    // Protected-mode control (80286; charged as #UD time elsewhere).
    pub lmsw: u32,
    pub smsw: u32,
    pub ldt_op: u32,
    pub sdt_op: u32,
    pub lar_lsl: u32,
    pub verr_verw: u32,
    pub arpl: u32,
    pub clts: u32,
}

impl CycleTable {
    pub fn new(model: CpuModel) -> Self {
        match model {
            CpuModel::Intel8088 => Self::table_8088(),
            CpuModel::Intel80186 => Self::table_80186(),
            CpuModel::Intel80286 => Self::table_80286(),
        }
    }

    fn table_8088() -> Self {
        CycleTable {
            word_penalty: 4,
            ea_direct: [7, 8, 8, 7, 5, 5, 6, 5],
            ea_disp: [11, 12, 12, 11, 9, 9, 9, 9],
            alu_rr: 3,
            alu_rm: 9,
            alu_mr: 16,
            alu_ri: 4,
            alu_mi: 17,
            alu_ai: 4,
            cmp_mr: 9,
            cmp_mi: 10,
            test_rr: 3,
            test_rm: 9,
            test_ri: 5,
            test_mi: 11,
            inc_r: 3,
            inc_m: 15,
            mov_rr: 2,
            mov_rm: 8,
            mov_mr: 9,
            mov_ri: 4,
            mov_mi: 10,
            mov_am: 10,
            mov_ma: 10,
            mov_srr: 2,
            mov_srm: 8,
            mov_msr: 9,
            push_r: 11,
            push_s: 10,
            push_m: 16,
            push_i: 11,
            pop_r: 8,
            pop_s: 8,
            pop_m: 17,
            pushf: 10,
            popf: 8,
            pusha: 11,
            popa: 8,
            xchg_rr: 4,
            xchg_rm: 17,
            xchg_ar: 3,
            lea: 2,
            lptr: 16,
            xlat: 11,
            lahf: 4,
            sahf: 4,
            cbw: 2,
            cwd: 5,
            jcc_t: 16,
            jcc_nt: 4,
            jmp_rel: 15,
            jmp_far: 15,
            jmp_rm: 11,
            jmp_m_far: 24,
            call_near: 19,
            call_rm: 16,
            call_far: 28,
            call_m_far: 37,
            ret_near: 16,
            ret_near_imm: 20,
            ret_far: 26,
            ret_far_imm: 25,
            loop_t: 17,
            loop_nt: 5,
            loope_t: 18,
            loope_nt: 6,
            jcxz_t: 18,
            jcxz_nt: 6,
            int_n: 51,
            int3: 52,
            into_t: 53,
            into_nt: 4,
            iret: 32,
            bound: 33,
            shift_1_r: 2,
            shift_1_m: 15,
            shift_cl_r: 8,
            shift_cl_m: 20,
            shift_per_bit: 4,
            mul8: 70,
            mul16: 118,
            imul8: 80,
            imul16: 128,
            imul_imm: 80,
            div8: 80,
            div16: 144,
            idiv8: 101,
            idiv16: 165,
            aam: 83,
            aad: 60,
            daa: 4,
            aaa: 8,
            str_movs: 18,
            str_cmps: 22,
            str_scas: 15,
            str_lods: 12,
            str_stos: 11,
            str_ins: 14,
            str_outs: 14,
            rep_base: 9,
            in_imm: 10,
            in_dx: 8,
            out_imm: 10,
            out_dx: 8,
            enter: 15,
            leave: 8,
            flag_op: 2,
            nop: 3,
            hlt: 2,
            wait_op: 3,
            esc: 2,
            prefix: 2,
            lmsw: 3,
            smsw: 2,
            ldt_op: 17,
            sdt_op: 11,
            lar_lsl: 14,
            verr_verw: 14,
            arpl: 10,
            clts: 2,
        }
    }

    fn table_80186() -> Self {
        CycleTable {
            word_penalty: 0,
            ea_direct: [7, 8, 8, 7, 5, 5, 6, 5],
            ea_disp: [11, 12, 12, 11, 9, 9, 9, 9],
            alu_rr: 3,
            alu_rm: 10,
            alu_mr: 10,
            alu_ri: 4,
            alu_mi: 16,
            alu_ai: 3,
            cmp_mr: 10,
            cmp_mi: 10,
            test_rr: 3,
            test_rm: 10,
            test_ri: 4,
            test_mi: 10,
            inc_r: 3,
            inc_m: 15,
            mov_rr: 2,
            mov_rm: 9,
            mov_mr: 12,
            mov_ri: 4,
            mov_mi: 12,
            mov_am: 8,
            mov_ma: 9,
            mov_srr: 2,
            mov_srm: 9,
            mov_msr: 11,
            push_r: 10,
            push_s: 9,
            push_m: 16,
            push_i: 10,
            pop_r: 10,
            pop_s: 8,
            pop_m: 20,
            pushf: 9,
            popf: 8,
            pusha: 36,
            popa: 51,
            xchg_rr: 4,
            xchg_rm: 17,
            xchg_ar: 3,
            lea: 6,
            lptr: 18,
            xlat: 11,
            lahf: 2,
            sahf: 3,
            cbw: 2,
            cwd: 4,
            jcc_t: 13,
            jcc_nt: 4,
            jmp_rel: 14,
            jmp_far: 14,
            jmp_rm: 11,
            jmp_m_far: 26,
            call_near: 15,
            call_rm: 13,
            call_far: 23,
            call_m_far: 38,
            ret_near: 16,
            ret_near_imm: 18,
            ret_far: 22,
            ret_far_imm: 25,
            loop_t: 16,
            loop_nt: 6,
            loope_t: 16,
            loope_nt: 6,
            jcxz_t: 16,
            jcxz_nt: 5,
            int_n: 47,
            int3: 45,
            into_t: 48,
            into_nt: 4,
            iret: 28,
            bound: 33,
            shift_1_r: 2,
            shift_1_m: 15,
            shift_cl_r: 5,
            shift_cl_m: 17,
            shift_per_bit: 1,
            mul8: 26,
            mul16: 35,
            imul8: 25,
            imul16: 34,
            imul_imm: 22,
            div8: 29,
            div16: 38,
            idiv8: 44,
            idiv16: 53,
            aam: 19,
            aad: 15,
            daa: 4,
            aaa: 8,
            str_movs: 14,
            str_cmps: 22,
            str_scas: 15,
            str_lods: 12,
            str_stos: 10,
            str_ins: 14,
            str_outs: 14,
            rep_base: 8,
            in_imm: 10,
            in_dx: 8,
            out_imm: 9,
            out_dx: 7,
            enter: 15,
            leave: 8,
            flag_op: 2,
            nop: 3,
            hlt: 2,
            wait_op: 6,
            esc: 6,
            prefix: 2,
            lmsw: 3,
            smsw: 2,
            ldt_op: 17,
            sdt_op: 11,
            lar_lsl: 14,
            verr_verw: 14,
            arpl: 10,
            clts: 2,
        }
    }

    fn table_80286() -> Self {
        CycleTable {
            word_penalty: 0,
            // EA computation is folded into the instruction pipeline.
            ea_direct: [0; 8],
            ea_disp: [0; 8],
            alu_rr: 2,
            alu_rm: 7,
            alu_mr: 7,
            alu_ri: 3,
            alu_mi: 7,
            alu_ai: 3,
            cmp_mr: 6,
            cmp_mi: 6,
            test_rr: 2,
            test_rm: 6,
            test_ri: 3,
            test_mi: 6,
            inc_r: 2,
            inc_m: 7,
            mov_rr: 2,
            mov_rm: 5,
            mov_mr: 3,
            mov_ri: 2,
            mov_mi: 3,
            mov_am: 5,
            mov_ma: 3,
            mov_srr: 2,
            mov_srm: 5,
            mov_msr: 3,
            push_r: 3,
            push_s: 3,
            push_m: 5,
            push_i: 3,
            pop_r: 5,
            pop_s: 5,
            pop_m: 5,
            pushf: 3,
            popf: 5,
            pusha: 17,
            popa: 19,
            xchg_rr: 3,
            xchg_rm: 5,
            xchg_ar: 3,
            lea: 3,
            lptr: 7,
            xlat: 5,
            lahf: 2,
            sahf: 2,
            cbw: 2,
            cwd: 2,
            jcc_t: 7,
            jcc_nt: 3,
            jmp_rel: 7,
            jmp_far: 11,
            jmp_rm: 7,
            jmp_m_far: 15,
            call_near: 7,
            call_rm: 7,
            call_far: 13,
            call_m_far: 16,
            ret_near: 11,
            ret_near_imm: 11,
            ret_far: 15,
            ret_far_imm: 15,
            loop_t: 8,
            loop_nt: 4,
            loope_t: 8,
            loope_nt: 4,
            jcxz_t: 8,
            jcxz_nt: 4,
            int_n: 23,
            int3: 23,
            into_t: 24,
            into_nt: 3,
            iret: 17,
            bound: 13,
            shift_1_r: 2,
            shift_1_m: 7,
            shift_cl_r: 5,
            shift_cl_m: 8,
            shift_per_bit: 1,
            mul8: 13,
            mul16: 21,
            imul8: 13,
            imul16: 21,
            imul_imm: 21,
            div8: 14,
            div16: 22,
            idiv8: 17,
            idiv16: 25,
            aam: 16,
            aad: 14,
            daa: 3,
            aaa: 3,
            str_movs: 5,
            str_cmps: 8,
            str_scas: 7,
            str_lods: 5,
            str_stos: 3,
            str_ins: 5,
            str_outs: 5,
            rep_base: 5,
            in_imm: 5,
            in_dx: 5,
            out_imm: 3,
            out_dx: 3,
            enter: 11,
            leave: 5,
            flag_op: 2,
            nop: 3,
            hlt: 2,
            wait_op: 3,
            esc: 9,
            prefix: 0,
            lmsw: 3,
            smsw: 2,
            ldt_op: 17,
            sdt_op: 11,
            lar_lsl: 14,
            verr_verw: 14,
            arpl: 10,
            clts: 2,
        }
    }

    #[inline]
    pub fn ea_cost(&self, modb: u8, rm: u8) -> u32 {
        if modb == 0 {
            self.ea_direct[rm as usize]
        }
        else {
            self.ea_disp[rm as usize]
        }
    }
}

impl super::Cpu {
    /// Charge cycles against the current burst.
    #[inline(always)]
    pub(crate) fn cycles(&mut self, ct: u32) {
        self.cycles_left -= ct as i32;
        self.instr_cycles += ct;
    }
}
