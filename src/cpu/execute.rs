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

    cpu::execute.rs

    Data movement, ALU and miscellaneous opcode handlers. Flow control
    lives in jump.rs, shifts in bitwise.rs, multiply/divide in muldiv.rs,
    string primitives in string.rs and stack traffic in stack.rs.

    Handlers derive their operation and width from the dispatched opcode
    byte, so one handler covers a whole encoding family.
*/

use crate::{
    cpu::*,
    devices::Chipset,
};

impl Cpu {
    /// ALU operation select from bits 5..3 of the opcode byte.
    pub(crate) fn math_op8(&mut self, op: u8, dst: u8, src: u8) -> u8 {
        match op & 0x07 {
            0 => self.alu_add8(dst, src, false),
            1 => self.alu_or8(dst, src),
            2 => {
                let c = self.get_flag(Flag::Carry);
                self.alu_add8(dst, src, c)
            }
            3 => {
                let c = self.get_flag(Flag::Carry);
                self.alu_sub8(dst, src, c)
            }
            4 => self.alu_and8(dst, src),
            5 => self.alu_sub8(dst, src, false),
            6 => self.alu_xor8(dst, src),
            _ => {
                // CMP: flags only.
                self.alu_sub8(dst, src, false);
                dst
            }
        }
    }

    pub(crate) fn math_op16(&mut self, op: u8, dst: u16, src: u16) -> u16 {
        match op & 0x07 {
            0 => self.alu_add16(dst, src, false),
            1 => self.alu_or16(dst, src),
            2 => {
                let c = self.get_flag(Flag::Carry);
                self.alu_add16(dst, src, c)
            }
            3 => {
                let c = self.get_flag(Flag::Carry);
                self.alu_sub16(dst, src, c)
            }
            4 => self.alu_and16(dst, src),
            5 => self.alu_sub16(dst, src, false),
            6 => self.alu_xor16(dst, src),
            _ => {
                self.alu_sub16(dst, src, false);
                dst
            }
        }
    }

    #[inline]
    fn alu_select(&self) -> u8 {
        (self.opcode >> 3) & 0x07
    }

    #[inline]
    fn is_cmp(&self) -> bool {
        self.alu_select() == 7
    }

    // ----------------------------------------------------------------------
    // Prefixes.

    pub(crate) fn op_prefix_seg(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let (bit, seg) = match self.opcode {
            0x26 => (OPCODE_PREFIX_ES_OVERRIDE, Segment::ES),
            0x2E => (OPCODE_PREFIX_CS_OVERRIDE, Segment::CS),
            0x36 => (OPCODE_PREFIX_SS_OVERRIDE, Segment::SS),
            _ => (OPCODE_PREFIX_DS_OVERRIDE, Segment::DS),
        };
        self.op_prefixes |= bit;
        self.seg_data = seg;
        self.seg_stack = seg;
        self.in_prefix = true;
        self.prefix_ct += 1;
        self.cycles(self.timing.prefix);
        Ok(())
    }

    pub(crate) fn op_prefix_lock(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        // Recorded but with no emulated side effect; there is no second
        // bus master to lock against.
        self.op_prefixes |= OPCODE_PREFIX_LOCK;
        self.in_prefix = true;
        self.prefix_ct += 1;
        self.cycles(self.timing.prefix);
        Ok(())
    }

    pub(crate) fn op_prefix_rep(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        if self.opcode == 0xF2 {
            self.op_prefixes |= OPCODE_PREFIX_REP1;
            self.rep_type = RepType::Repne;
        }
        else {
            self.op_prefixes |= OPCODE_PREFIX_REP2;
            self.rep_type = RepType::Rep;
        }
        self.rep_prefix_ip = self.ip.wrapping_sub(1);
        self.in_prefix = true;
        self.prefix_ct += 1;
        self.cycles(self.timing.prefix);
        Ok(())
    }

    // ----------------------------------------------------------------------
    // ALU encodings.

    /// 0x00-0x39 even rows: op rm, reg.
    pub(crate) fn op_alu_rm_r(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        let op = self.alu_select();
        let write = !self.is_cmp();

        if self.opcode & 0x01 == 0 {
            let dst = self.read_rm8()?;
            let src = self.register8(self.modrm_reg8());
            let res = self.math_op8(op, dst, src);
            if write {
                self.write_rm8(res)?;
            }
        }
        else {
            let dst = self.read_rm16()?;
            let src = self.register16(self.modrm_reg16());
            let res = self.math_op16(op, dst, src);
            if write {
                self.write_rm16(res)?;
            }
        }

        self.cycles(if self.modrm_is_register() {
            self.timing.alu_rr
        }
        else if write {
            self.timing.alu_mr
        }
        else {
            self.timing.cmp_mr
        });
        Ok(())
    }

    /// 0x02-0x3B odd rows: op reg, rm.
    pub(crate) fn op_alu_r_rm(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        let op = self.alu_select();
        let write = !self.is_cmp();

        if self.opcode & 0x01 == 0 {
            let dst = self.register8(self.modrm_reg8());
            let src = self.read_rm8()?;
            let res = self.math_op8(op, dst, src);
            if write {
                let reg = self.modrm_reg8();
                self.set_register8(reg, res);
            }
        }
        else {
            let dst = self.register16(self.modrm_reg16());
            let src = self.read_rm16()?;
            let res = self.math_op16(op, dst, src);
            if write {
                let reg = self.modrm_reg16();
                self.set_register16(reg, res);
            }
        }

        self.cycles(if self.modrm_is_register() {
            self.timing.alu_rr
        }
        else {
            self.timing.alu_rm
        });
        Ok(())
    }

    /// 0x04/0x05 pattern: op AL/AX, imm.
    pub(crate) fn op_alu_a_imm(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let op = self.alu_select();
        let write = !self.is_cmp();

        if self.opcode & 0x01 == 0 {
            let imm = self.fetch_u8()?;
            let res = self.math_op8(op, self.a.l(), imm);
            if write {
                self.a.set_l(res);
            }
        }
        else {
            let imm = self.fetch_u16()?;
            let res = self.math_op16(op, self.a.x(), imm);
            if write {
                self.a.set_x(res);
            }
        }

        self.cycles(self.timing.alu_ai);
        Ok(())
    }

    /// Group 1, 0x80-0x83: op rm, imm.
    pub(crate) fn op_grp1(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        let op = self.modrm_reg;
        let write = op != 7;

        if self.opcode & 0x01 == 0 {
            // 0x82 is a historical alias of 0x80.
            let dst = self.read_rm8()?;
            let imm = self.fetch_u8()?;
            let res = self.math_op8(op, dst, imm);
            if write {
                self.write_rm8(res)?;
            }
        }
        else {
            let dst = self.read_rm16()?;
            let imm = if self.opcode == 0x83 {
                self.fetch_i8()? as u16
            }
            else {
                self.fetch_u16()?
            };
            let res = self.math_op16(op, dst, imm);
            if write {
                self.write_rm16(res)?;
            }
        }

        self.cycles(if self.modrm_is_register() {
            self.timing.alu_ri
        }
        else if write {
            self.timing.alu_mi
        }
        else {
            self.timing.cmp_mi
        });
        Ok(())
    }

    // ----------------------------------------------------------------------
    // INC/DEC.

    pub(crate) fn op_inc_r16(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let reg = REGISTER16_LUT[(self.opcode & OPCODE_REGISTER_SELECT_MASK) as usize];
        let res = self.alu_inc16(self.register16(reg));
        self.set_register16(reg, res);
        self.cycles(self.timing.inc_r);
        Ok(())
    }

    pub(crate) fn op_dec_r16(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let reg = REGISTER16_LUT[(self.opcode & OPCODE_REGISTER_SELECT_MASK) as usize];
        let res = self.alu_dec16(self.register16(reg));
        self.set_register16(reg, res);
        self.cycles(self.timing.inc_r);
        Ok(())
    }

    /// Group 4, 0xFE: INC/DEC rm8.
    pub(crate) fn op_grp4(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        match self.modrm_reg {
            0 => {
                let res = {
                    let dst = self.read_rm8()?;
                    self.alu_inc8(dst)
                };
                self.write_rm8(res)?;
            }
            1 => {
                let res = {
                    let dst = self.read_rm8()?;
                    self.alu_dec8(dst)
                };
                self.write_rm8(res)?;
            }
            r => {
                if self.model != CpuModel::Intel8088 {
                    return Err(CpuFault::InvalidOpcode);
                }
                log::warn!("Undefined FE /{} executed as no-op", r);
            }
        }
        self.cycles(if self.modrm_is_register() {
            self.timing.inc_r
        }
        else {
            self.timing.inc_m
        });
        Ok(())
    }

    /// Group 5, 0xFF: INC/DEC/CALL/JMP/PUSH rm16.
    pub(crate) fn op_grp5(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        match self.modrm_reg {
            0 => {
                let res = {
                    let dst = self.read_rm16()?;
                    self.alu_inc16(dst)
                };
                self.write_rm16(res)?;
                self.cycles(if self.modrm_is_register() {
                    self.timing.inc_r
                }
                else {
                    self.timing.inc_m
                });
            }
            1 => {
                let res = {
                    let dst = self.read_rm16()?;
                    self.alu_dec16(dst)
                };
                self.write_rm16(res)?;
                self.cycles(if self.modrm_is_register() {
                    self.timing.inc_r
                }
                else {
                    self.timing.inc_m
                });
            }
            2 => {
                // CALL rm16
                let target = self.read_rm16()?;
                self.push_u16(self.ip)?;
                self.ip = target;
                self.biu_queue_flush();
                self.cycles(self.timing.call_rm);
            }
            3 => {
                // CALL m16:16
                if self.modrm_is_register() {
                    if self.model != CpuModel::Intel8088 {
                        return Err(CpuFault::InvalidOpcode);
                    }
                    // Undefined on the 8086; degrades to a near call.
                    log::warn!("CALL far with register operand; treating as near");
                    let target = self.read_rm16()?;
                    self.push_u16(self.ip)?;
                    self.ip = target;
                    self.biu_queue_flush();
                    self.cycles(self.timing.call_rm);
                    return Ok(());
                }
                let offset = self.read_rm16()?;
                let selector = self.read_rm16_high()?;
                self.far_call(selector, offset)?;
                self.cycles(self.timing.call_m_far);
            }
            4 => {
                // JMP rm16
                let target = self.read_rm16()?;
                self.ip = target;
                self.biu_queue_flush();
                self.cycles(self.timing.jmp_rm);
            }
            5 => {
                // JMP m16:16
                if self.modrm_is_register() {
                    if self.model != CpuModel::Intel8088 {
                        return Err(CpuFault::InvalidOpcode);
                    }
                    log::warn!("JMP far with register operand; treating as near");
                    let target = self.read_rm16()?;
                    self.ip = target;
                    self.biu_queue_flush();
                    self.cycles(self.timing.jmp_rm);
                    return Ok(());
                }
                let offset = self.read_rm16()?;
                let selector = self.read_rm16_high()?;
                self.far_jump(selector, offset)?;
                self.cycles(self.timing.jmp_m_far);
            }
            6 => {
                let value = self.read_rm16()?;
                self.push_u16(value)?;
                self.cycles(if self.modrm_is_register() {
                    self.timing.push_r
                }
                else {
                    self.timing.push_m
                });
            }
            r => {
                if self.model != CpuModel::Intel8088 {
                    return Err(CpuFault::InvalidOpcode);
                }
                // The 8086 treats /7 as PUSH.
                log::warn!("Undefined FF /{} executed as PUSH", r);
                let value = self.read_rm16()?;
                self.push_u16(value)?;
                self.cycles(self.timing.push_m);
            }
        }
        Ok(())
    }

    // ----------------------------------------------------------------------
    // MOV family.

    pub(crate) fn op_mov_rm_r(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        if self.opcode & 0x01 == 0 {
            let src = self.register8(self.modrm_reg8());
            self.write_rm8(src)?;
        }
        else {
            let src = self.register16(self.modrm_reg16());
            self.write_rm16(src)?;
        }
        self.cycles(if self.modrm_is_register() {
            self.timing.mov_rr
        }
        else {
            self.timing.mov_mr
        });
        Ok(())
    }

    pub(crate) fn op_mov_r_rm(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        if self.opcode & 0x01 == 0 {
            let src = self.read_rm8()?;
            let reg = self.modrm_reg8();
            self.set_register8(reg, src);
        }
        else {
            let src = self.read_rm16()?;
            let reg = self.modrm_reg16();
            self.set_register16(reg, src);
        }
        self.cycles(if self.modrm_is_register() {
            self.timing.mov_rr
        }
        else {
            self.timing.mov_rm
        });
        Ok(())
    }

    /// 0x8C: MOV rm16, sreg.
    pub(crate) fn op_mov_rm_sreg(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        if self.modrm_reg > 3 && self.model != CpuModel::Intel8088 {
            return Err(CpuFault::InvalidOpcode);
        }
        let seg = match SEGMENT_REGISTER16_LUT[(self.modrm_reg & 0x03) as usize] {
            Register16::ES => Segment::ES,
            Register16::CS => Segment::CS,
            Register16::SS => Segment::SS,
            _ => Segment::DS,
        };
        let selector = self.seg(seg).selector;
        self.write_rm16(selector)?;
        self.cycles(if self.modrm_is_register() {
            self.timing.mov_srr
        }
        else {
            self.timing.mov_msr
        });
        Ok(())
    }

    /// 0x8E: MOV sreg, rm16.
    pub(crate) fn op_mov_sreg_rm(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        let seg = match self.modrm_reg & 0x03 {
            0 => Segment::ES,
            1 => Segment::CS,
            2 => Segment::SS,
            _ => Segment::DS,
        };

        // MOV CS is an 8086-only curiosity; later models fault.
        if seg == Segment::CS && self.model != CpuModel::Intel8088 {
            return Err(CpuFault::InvalidOpcode);
        }

        let selector = self.read_rm16()?;
        self.load_segment(seg, selector)?;
        if seg == Segment::CS {
            self.biu_queue_flush();
        }
        self.cycles(if self.modrm_is_register() {
            self.timing.mov_srr
        }
        else {
            self.timing.mov_srm
        });
        Ok(())
    }

    pub(crate) fn op_mov_r8_imm(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let reg = REGISTER8_LUT[(self.opcode & OPCODE_REGISTER_SELECT_MASK) as usize];
        let imm = self.fetch_u8()?;
        self.set_register8(reg, imm);
        self.cycles(self.timing.mov_ri);
        Ok(())
    }

    pub(crate) fn op_mov_r16_imm(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let reg = REGISTER16_LUT[(self.opcode & OPCODE_REGISTER_SELECT_MASK) as usize];
        let imm = self.fetch_u16()?;
        self.set_register16(reg, imm);
        self.cycles(self.timing.mov_ri);
        Ok(())
    }

    /// 0xC6/0xC7: MOV rm, imm.
    pub(crate) fn op_mov_rm_imm(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        if self.opcode & 0x01 == 0 {
            let imm = self.fetch_u8()?;
            self.write_rm8(imm)?;
        }
        else {
            let imm = self.fetch_u16()?;
            self.write_rm16(imm)?;
        }
        self.cycles(if self.modrm_is_register() {
            self.timing.mov_ri
        }
        else {
            self.timing.mov_mi
        });
        Ok(())
    }

    /// 0xA0/0xA1: MOV AL/AX, moffs.
    pub(crate) fn op_mov_a_moffs(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let offset = self.fetch_u16()?;
        if self.opcode & 0x01 == 0 {
            let v = self.biu_read_u8(self.seg_data, offset)?;
            self.a.set_l(v);
        }
        else {
            let v = self.biu_read_u16(self.seg_data, offset)?;
            self.a.set_x(v);
        }
        self.cycles(self.timing.mov_am);
        Ok(())
    }

    /// 0xA2/0xA3: MOV moffs, AL/AX.
    pub(crate) fn op_mov_moffs_a(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let offset = self.fetch_u16()?;
        if self.opcode & 0x01 == 0 {
            self.biu_write_u8(self.seg_data, offset, self.a.l())?;
        }
        else {
            self.biu_write_u16(self.seg_data, offset, self.a.x())?;
        }
        self.cycles(self.timing.mov_ma);
        Ok(())
    }

    // ----------------------------------------------------------------------
    // TEST and XCHG.

    /// 0x84/0x85: TEST rm, reg.
    pub(crate) fn op_test_rm_r(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        if self.opcode & 0x01 == 0 {
            let dst = self.read_rm8()?;
            let src = self.register8(self.modrm_reg8());
            self.alu_and8(dst, src);
        }
        else {
            let dst = self.read_rm16()?;
            let src = self.register16(self.modrm_reg16());
            self.alu_and16(dst, src);
        }
        self.cycles(if self.modrm_is_register() {
            self.timing.test_rr
        }
        else {
            self.timing.test_rm
        });
        Ok(())
    }

    /// 0xA8/0xA9: TEST AL/AX, imm.
    pub(crate) fn op_test_a_imm(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        if self.opcode & 0x01 == 0 {
            let imm = self.fetch_u8()?;
            self.alu_and8(self.a.l(), imm);
        }
        else {
            let imm = self.fetch_u16()?;
            self.alu_and16(self.a.x(), imm);
        }
        self.cycles(self.timing.test_ri);
        Ok(())
    }

    /// 0x86/0x87: XCHG rm, reg.
    pub(crate) fn op_xchg_rm(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        if self.opcode & 0x01 == 0 {
            let rm = self.read_rm8()?;
            let reg = self.modrm_reg8();
            let rv = self.register8(reg);
            self.write_rm8(rv)?;
            self.set_register8(reg, rm);
        }
        else {
            let rm = self.read_rm16()?;
            let reg = self.modrm_reg16();
            let rv = self.register16(reg);
            self.write_rm16(rv)?;
            self.set_register16(reg, rm);
        }
        self.cycles(if self.modrm_is_register() {
            self.timing.xchg_rr
        }
        else {
            self.timing.xchg_rm
        });
        Ok(())
    }

    /// 0x91-0x97: XCHG AX, r16.
    pub(crate) fn op_xchg_ax_r(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let reg = REGISTER16_LUT[(self.opcode & OPCODE_REGISTER_SELECT_MASK) as usize];
        let t = self.a.x();
        let v = self.register16(reg);
        self.a.set_x(v);
        self.set_register16(reg, t);
        self.cycles(self.timing.xchg_ar);
        Ok(())
    }

    pub(crate) fn op_nop(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.cycles(self.timing.nop);
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Address object loads.

    /// 0x8D: LEA r16, m.
    pub(crate) fn op_lea(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        if !self.ea_loaded {
            // LEA from a register operand has no defined address. The 8086
            // hands back whatever the EA latch last held; later models
            // fault.
            if self.model != CpuModel::Intel8088 {
                return Err(CpuFault::InvalidOpcode);
            }
            log::warn!("LEA with register operand; using stale EA");
        }
        let off = self.ea_off;
        let reg = self.modrm_reg16();
        self.set_register16(reg, off);
        self.cycles(self.timing.lea);
        Ok(())
    }

    /// 0xC4 LES / 0xC5 LDS.
    pub(crate) fn op_lptr(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        if !self.ea_loaded {
            if self.model != CpuModel::Intel8088 {
                return Err(CpuFault::InvalidOpcode);
            }
            // Undefined on the 8086; treat as a no-op rather than fault
            // through a vector the 8086 does not have.
            log::warn!("{:02X} with register operand ignored", self.opcode);
            return Ok(());
        }
        let offset = self.read_rm16()?;
        let selector = self.read_rm16_high()?;
        let seg = if self.opcode == 0xC4 { Segment::ES } else { Segment::DS };
        self.load_segment(seg, selector)?;
        let reg = self.modrm_reg16();
        self.set_register16(reg, offset);
        self.cycles(self.timing.lptr);
        Ok(())
    }

    /// 0xD7: XLAT.
    pub(crate) fn op_xlat(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let off = self.b.x().wrapping_add(self.a.l() as u16);
        let v = self.biu_read_u8(self.seg_data, off)?;
        self.a.set_l(v);
        self.cycles(self.timing.xlat);
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Width conversions and flag transfers.

    pub(crate) fn op_cbw(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.a.set_h(if self.a.l() & 0x80 != 0 { 0xFF } else { 0x00 });
        self.cycles(self.timing.cbw);
        Ok(())
    }

    pub(crate) fn op_cwd(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.d.set_x(if self.a.x() & 0x8000 != 0 { 0xFFFF } else { 0x0000 });
        self.cycles(self.timing.cwd);
        Ok(())
    }

    pub(crate) fn op_sahf(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let ps = (self.get_ps() & 0xFF00) | (self.a.h() as u16 & 0xD5) | CPU_FLAGS_RESERVED_ON;
        self.set_ps(ps);
        self.cycles(self.timing.sahf);
        Ok(())
    }

    pub(crate) fn op_lahf(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.a.set_h((self.get_ps() & 0xFF) as u8);
        self.cycles(self.timing.lahf);
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Port I/O.

    fn check_io_permission(&self) -> Result<(), CpuFault> {
        if self.model == CpuModel::Intel80286 && self.in_protected_mode() {
            let iopl = ((self.ps_direct & CPU_FLAG_IOPL) >> 12) as u8;
            if self.cpl > iopl {
                return Err(CpuFault::GeneralProtection(0));
            }
        }
        Ok(())
    }

    /// 0xE4/0xE5: IN AL/AX, imm8.
    pub(crate) fn op_in_imm(&mut self, sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.check_io_permission()?;
        let port = self.fetch_u8()? as u16;
        if self.opcode & 0x01 == 0 {
            let v = self.io_read_u8(sys, port);
            self.a.set_l(v);
        }
        else {
            let v = self.io_read_u16(sys, port);
            self.a.set_x(v);
        }
        self.cycles(self.timing.in_imm);
        Ok(())
    }

    /// 0xEC/0xED: IN AL/AX, DX.
    pub(crate) fn op_in_dx(&mut self, sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.check_io_permission()?;
        let port = self.d.x();
        if self.opcode & 0x01 == 0 {
            let v = self.io_read_u8(sys, port);
            self.a.set_l(v);
        }
        else {
            let v = self.io_read_u16(sys, port);
            self.a.set_x(v);
        }
        self.cycles(self.timing.in_dx);
        Ok(())
    }

    /// 0xE6/0xE7: OUT imm8, AL/AX.
    pub(crate) fn op_out_imm(&mut self, sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.check_io_permission()?;
        let port = self.fetch_u8()? as u16;
        if self.opcode & 0x01 == 0 {
            let v = self.a.l();
            self.io_write_u8(sys, port, v);
        }
        else {
            let v = self.a.x();
            self.io_write_u16(sys, port, v);
        }
        self.cycles(self.timing.out_imm);
        Ok(())
    }

    /// 0xEE/0xEF: OUT DX, AL/AX.
    pub(crate) fn op_out_dx(&mut self, sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.check_io_permission()?;
        let port = self.d.x();
        if self.opcode & 0x01 == 0 {
            let v = self.a.l();
            self.io_write_u8(sys, port, v);
        }
        else {
            let v = self.a.x();
            self.io_write_u16(sys, port, v);
        }
        self.cycles(self.timing.out_dx);
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Flag instructions.

    pub(crate) fn op_cmc(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        let c = self.get_flag(Flag::Carry);
        self.set_flag_state(Flag::Carry, !c);
        self.cycles(self.timing.flag_op);
        Ok(())
    }

    pub(crate) fn op_clc(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.clear_flag(Flag::Carry);
        self.cycles(self.timing.flag_op);
        Ok(())
    }

    pub(crate) fn op_stc(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.set_flag(Flag::Carry);
        self.cycles(self.timing.flag_op);
        Ok(())
    }

    pub(crate) fn op_cli(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.check_io_permission()?;
        self.clear_flag(Flag::Interrupt);
        self.cycles(self.timing.flag_op);
        Ok(())
    }

    pub(crate) fn op_sti(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.check_io_permission()?;
        // The STI shadow: the next instruction executes before any
        // interrupt is recognized.
        if !self.get_flag(Flag::Interrupt) {
            self.delay_intr();
        }
        self.set_flag(Flag::Interrupt);
        self.cycles(self.timing.flag_op);
        Ok(())
    }

    pub(crate) fn op_cld(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.clear_flag(Flag::Direction);
        self.cycles(self.timing.flag_op);
        Ok(())
    }

    pub(crate) fn op_std(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.set_flag(Flag::Direction);
        self.cycles(self.timing.flag_op);
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Machine control and misc.

    pub(crate) fn op_hlt(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        if self.model == CpuModel::Intel80286 && self.in_protected_mode() && self.cpl != 0 {
            return Err(CpuFault::GeneralProtection(0));
        }
        self.int_flags |= INTFLAG_HALT;
        self.cycles(self.timing.hlt);
        log::trace!("HLT at {:04X}:{:04X}", self.cs.selector, self.instruction_ip);
        Ok(())
    }

    pub(crate) fn op_wait(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        // No coprocessor: TEST never goes active, WAIT falls through.
        self.cycles(self.timing.wait_op);
        Ok(())
    }

    /// 0xD8-0xDF: ESC. Operand is fetched and discarded.
    pub(crate) fn op_esc(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        if !self.modrm_is_register() {
            let _ = self.read_rm16()?;
        }
        self.cycles(self.timing.esc);
        Ok(())
    }

    /// 0x62: BOUND r16, m16&16 (80186+).
    pub(crate) fn op_bound(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        if !self.ea_loaded {
            return Err(CpuFault::InvalidOpcode);
        }
        let index = self.register16(self.modrm_reg16()) as i16;
        let lower = self.read_rm16()? as i16;
        let upper = self.read_rm16_high()? as i16;
        self.cycles(self.timing.bound);

        if index < lower || index > upper {
            return Err(CpuFault::BoundRange);
        }
        Ok(())
    }

    /// 0x69/0x6B: IMUL r16, rm16, imm (80186+). Lives here rather than
    /// muldiv.rs because the encoding is ModRM-immediate.
    pub(crate) fn op_imul_imm(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        self.fetch_modrm()?;
        let src = self.read_rm16()? as i16 as i32;
        let imm = if self.opcode == 0x6B {
            self.fetch_i8()? as i32
        }
        else {
            self.fetch_u16()? as i16 as i32
        };

        let product = src.wrapping_mul(imm);
        let truncated = product as i16 as i32;
        let reg = self.modrm_reg16();
        self.set_register16(reg, product as u16);

        self.set_logic_result((product as u16) as u32, RESULT_WORD);
        self.set_flag_state(Flag::Carry, product != truncated);
        self.set_flag_state(Flag::Overflow, product != truncated);
        self.cycles(self.timing.imul_imm);
        Ok(())
    }

    /// Reserved encoding: #UD on the 80186 and later.
    pub(crate) fn op_invalid(&mut self, _sys: &mut dyn Chipset) -> Result<(), CpuFault> {
        log::debug!(
            "Invalid opcode {:02X} at {:04X}:{:04X}",
            self.opcode,
            self.cs.selector,
            self.instruction_ip
        );
        Err(CpuFault::InvalidOpcode)
    }
}
