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

    cpu::decode.rs

    Opcode dispatch tables, built once per model at construction. The base
    map is the 8086 one, including its undocumented aliases; the 80186
    replaces the aliases with #UD and adds its new encodings, and the
    80286 adds the two-byte 0F map on top.
*/

use crate::cpu::{Cpu, CpuModel, Handler};

pub(crate) fn build_table(model: CpuModel) -> [Handler; 256] {
    let mut t: [Handler; 256] = [Cpu::op_invalid; 256];

    // The four ALU encoding rows, 0x00-0x3B.
    for row in 0..8u16 {
        let base = (row * 8) as usize;
        t[base] = Cpu::op_alu_rm_r;
        t[base + 1] = Cpu::op_alu_rm_r;
        t[base + 2] = Cpu::op_alu_r_rm;
        t[base + 3] = Cpu::op_alu_r_rm;
        t[base + 4] = Cpu::op_alu_a_imm;
        t[base + 5] = Cpu::op_alu_a_imm;
    }

    t[0x06] = Cpu::op_push_sreg;
    t[0x07] = Cpu::op_pop_sreg;
    t[0x0E] = Cpu::op_push_sreg;
    t[0x16] = Cpu::op_push_sreg;
    t[0x17] = Cpu::op_pop_sreg;
    t[0x1E] = Cpu::op_push_sreg;
    t[0x1F] = Cpu::op_pop_sreg;

    t[0x26] = Cpu::op_prefix_seg;
    t[0x2E] = Cpu::op_prefix_seg;
    t[0x36] = Cpu::op_prefix_seg;
    t[0x3E] = Cpu::op_prefix_seg;

    t[0x27] = Cpu::op_daa;
    t[0x2F] = Cpu::op_das;
    t[0x37] = Cpu::op_aaa;
    t[0x3F] = Cpu::op_aas;

    for op in 0x40..=0x47 {
        t[op] = Cpu::op_inc_r16;
    }
    for op in 0x48..=0x4F {
        t[op] = Cpu::op_dec_r16;
    }
    for op in 0x50..=0x57 {
        t[op] = Cpu::op_push_r16;
    }
    for op in 0x58..=0x5F {
        t[op] = Cpu::op_pop_r16;
    }

    for op in 0x70..=0x7F {
        t[op] = Cpu::op_jcc;
    }

    for op in 0x80..=0x83 {
        t[op] = Cpu::op_grp1;
    }
    t[0x84] = Cpu::op_test_rm_r;
    t[0x85] = Cpu::op_test_rm_r;
    t[0x86] = Cpu::op_xchg_rm;
    t[0x87] = Cpu::op_xchg_rm;
    t[0x88] = Cpu::op_mov_rm_r;
    t[0x89] = Cpu::op_mov_rm_r;
    t[0x8A] = Cpu::op_mov_r_rm;
    t[0x8B] = Cpu::op_mov_r_rm;
    t[0x8C] = Cpu::op_mov_rm_sreg;
    t[0x8D] = Cpu::op_lea;
    t[0x8E] = Cpu::op_mov_sreg_rm;
    t[0x8F] = Cpu::op_pop_rm16;

    t[0x90] = Cpu::op_nop;
    for op in 0x91..=0x97 {
        t[op] = Cpu::op_xchg_ax_r;
    }
    t[0x98] = Cpu::op_cbw;
    t[0x99] = Cpu::op_cwd;
    t[0x9A] = Cpu::op_call_far;
    t[0x9B] = Cpu::op_wait;
    t[0x9C] = Cpu::op_pushf;
    t[0x9D] = Cpu::op_popf;
    t[0x9E] = Cpu::op_sahf;
    t[0x9F] = Cpu::op_lahf;

    t[0xA0] = Cpu::op_mov_a_moffs;
    t[0xA1] = Cpu::op_mov_a_moffs;
    t[0xA2] = Cpu::op_mov_moffs_a;
    t[0xA3] = Cpu::op_mov_moffs_a;
    t[0xA4] = Cpu::op_movs;
    t[0xA5] = Cpu::op_movs;
    t[0xA6] = Cpu::op_cmps;
    t[0xA7] = Cpu::op_cmps;
    t[0xA8] = Cpu::op_test_a_imm;
    t[0xA9] = Cpu::op_test_a_imm;
    t[0xAA] = Cpu::op_stos;
    t[0xAB] = Cpu::op_stos;
    t[0xAC] = Cpu::op_lods;
    t[0xAD] = Cpu::op_lods;
    t[0xAE] = Cpu::op_scas;
    t[0xAF] = Cpu::op_scas;

    for op in 0xB0..=0xB7 {
        t[op] = Cpu::op_mov_r8_imm;
    }
    for op in 0xB8..=0xBF {
        t[op] = Cpu::op_mov_r16_imm;
    }

    t[0xC2] = Cpu::op_ret_near;
    t[0xC3] = Cpu::op_ret_near;
    t[0xC4] = Cpu::op_lptr;
    t[0xC5] = Cpu::op_lptr;
    t[0xC6] = Cpu::op_mov_rm_imm;
    t[0xC7] = Cpu::op_mov_rm_imm;
    t[0xCA] = Cpu::op_ret_far;
    t[0xCB] = Cpu::op_ret_far;
    t[0xCC] = Cpu::op_int3;
    t[0xCD] = Cpu::op_int_n;
    t[0xCE] = Cpu::op_into;
    t[0xCF] = Cpu::op_iret;

    for op in 0xD0..=0xD3 {
        t[op] = Cpu::op_grp2;
    }
    t[0xD4] = Cpu::op_aam;
    t[0xD5] = Cpu::op_aad;
    t[0xD6] = Cpu::op_salc;
    t[0xD7] = Cpu::op_xlat;
    for op in 0xD8..=0xDF {
        t[op] = Cpu::op_esc;
    }

    t[0xE0] = Cpu::op_loop;
    t[0xE1] = Cpu::op_loop;
    t[0xE2] = Cpu::op_loop;
    t[0xE3] = Cpu::op_jcxz;
    t[0xE4] = Cpu::op_in_imm;
    t[0xE5] = Cpu::op_in_imm;
    t[0xE6] = Cpu::op_out_imm;
    t[0xE7] = Cpu::op_out_imm;
    t[0xE8] = Cpu::op_call_rel16;
    t[0xE9] = Cpu::op_jmp_rel16;
    t[0xEA] = Cpu::op_jmp_far;
    t[0xEB] = Cpu::op_jmp_rel8;
    t[0xEC] = Cpu::op_in_dx;
    t[0xED] = Cpu::op_in_dx;
    t[0xEE] = Cpu::op_out_dx;
    t[0xEF] = Cpu::op_out_dx;

    t[0xF0] = Cpu::op_prefix_lock;
    t[0xF2] = Cpu::op_prefix_rep;
    t[0xF3] = Cpu::op_prefix_rep;
    t[0xF4] = Cpu::op_hlt;
    t[0xF5] = Cpu::op_cmc;
    t[0xF6] = Cpu::op_grp3;
    t[0xF7] = Cpu::op_grp3;
    t[0xF8] = Cpu::op_clc;
    t[0xF9] = Cpu::op_stc;
    t[0xFA] = Cpu::op_cli;
    t[0xFB] = Cpu::op_sti;
    t[0xFC] = Cpu::op_cld;
    t[0xFD] = Cpu::op_std;
    t[0xFE] = Cpu::op_grp4;
    t[0xFF] = Cpu::op_grp5;

    match model {
        CpuModel::Intel8088 => {
            // The 8086 decodes every byte: the holes are aliases.
            t[0x0F] = Cpu::op_pop_sreg; // POP CS
            for op in 0x60..=0x6F {
                t[op] = Cpu::op_jcc;
            }
            t[0xC0] = Cpu::op_ret_near; // alias of C2
            t[0xC1] = Cpu::op_ret_near; // alias of C3
            t[0xC8] = Cpu::op_ret_far; // alias of CA
            t[0xC9] = Cpu::op_ret_far; // alias of CB
            t[0xF1] = Cpu::op_prefix_lock;
        }
        CpuModel::Intel80186 | CpuModel::Intel80286 => {
            t[0x60] = Cpu::op_pusha;
            t[0x61] = Cpu::op_popa;
            t[0x62] = Cpu::op_bound;
            t[0x68] = Cpu::op_push_imm;
            t[0x69] = Cpu::op_imul_imm;
            t[0x6A] = Cpu::op_push_imm;
            t[0x6B] = Cpu::op_imul_imm;
            t[0x6C] = Cpu::op_ins;
            t[0x6D] = Cpu::op_ins;
            t[0x6E] = Cpu::op_outs;
            t[0x6F] = Cpu::op_outs;
            t[0xC0] = Cpu::op_grp2;
            t[0xC1] = Cpu::op_grp2;
            t[0xC8] = Cpu::op_enter;
            t[0xC9] = Cpu::op_leave;

            if model == CpuModel::Intel80286 {
                t[0x0F] = Cpu::op_0f;
                t[0x63] = Cpu::op_arpl;
            }
        }
    }

    t
}

pub(crate) fn build_table_0f(model: CpuModel) -> [Handler; 256] {
    let mut t: [Handler; 256] = [Cpu::op_invalid; 256];

    if model == CpuModel::Intel80286 {
        t[0x00] = Cpu::op_grp6;
        t[0x01] = Cpu::op_grp7;
        t[0x02] = Cpu::op_lar;
        t[0x03] = Cpu::op_lsl;
        t[0x06] = Cpu::op_clts;
    }

    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::Handler;

    #[test]
    fn model_deltas_select_handlers() {
        let t8086 = build_table(CpuModel::Intel8088);
        let t186 = build_table(CpuModel::Intel80186);
        let t286 = build_table(CpuModel::Intel80286);

        // 0F: POP CS on the 8086, #UD on the 186, map escape on the 286.
        assert!(t8086[0x0F] as usize == Cpu::op_pop_sreg as Handler as usize);
        assert!(t186[0x0F] as usize == Cpu::op_invalid as Handler as usize);
        assert!(t286[0x0F] as usize == Cpu::op_0f as Handler as usize);

        // 60: Jcc alias vs PUSHA.
        assert!(t8086[0x60] as usize == Cpu::op_jcc as Handler as usize);
        assert!(t186[0x60] as usize == Cpu::op_pusha as Handler as usize);

        // 63: #UD on 186, ARPL on 286.
        assert!(t186[0x63] as usize == Cpu::op_invalid as Handler as usize);
        assert!(t286[0x63] as usize == Cpu::op_arpl as Handler as usize);

        // C0: RET alias vs shift-immediate group.
        assert!(t8086[0xC0] as usize == Cpu::op_ret_near as Handler as usize);
        assert!(t186[0xC0] as usize == Cpu::op_grp2 as Handler as usize);
    }

    #[test]
    fn every_8086_slot_is_populated() {
        let t = build_table(CpuModel::Intel8088);
        for (op, handler) in t.iter().enumerate() {
            assert!(
                *handler as usize != Cpu::op_invalid as Handler as usize,
                "opcode {:02X} unmapped on 8086",
                op
            );
        }
    }

    #[test]
    fn table_0f_empty_below_286() {
        let t = build_table_0f(CpuModel::Intel80186);
        for handler in t.iter() {
            assert!(*handler as usize == Cpu::op_invalid as Handler as usize);
        }
    }
}
