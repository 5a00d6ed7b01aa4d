//! Instruction handlers. Each takes the core, the bus, and the raw
//! encoding; `decode` routes to them. Handlers that redirect control flow
//! go through `CpuCore::branch_to` / `write_pc_interworking` so the step's
//! PC-advance policy and the EXC_RETURN check stay in one place.

use tracing::debug;

use crate::alu::{add_with_carry, shift_with_carry, ShiftKind};
use crate::mem::CpuBus;
use crate::state::reg;
use crate::{CpuCore, Fault};

fn rd(instr: u16) -> usize {
    (instr & 7) as usize
}

fn rn(instr: u16) -> usize {
    ((instr >> 3) & 7) as usize
}

fn rm(instr: u16) -> usize {
    ((instr >> 6) & 7) as usize
}

fn imm8(instr: u16) -> u32 {
    u32::from(instr & 0xFF)
}

fn sign_extend(value: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as u32
}

/// Register read as an operand: the PC reads as the instruction address
/// plus four.
fn read_operand(cpu: &CpuCore, index: usize) -> u32 {
    if index == reg::PC {
        cpu.state.pc().wrapping_add(4)
    } else {
        cpu.state.r[index]
    }
}

pub(crate) fn nop(_cpu: &mut CpuCore, _bus: &mut dyn CpuBus, _instr: u16) -> Result<(), Fault> {
    Ok(())
}

/// The supervisor call is accepted but performs nothing; firmware that
/// issues one simply continues at the next instruction.
pub(crate) fn svc(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    debug!(
        imm = instr & 0xFF,
        pc = format_args!("{:#010x}", cpu.state.pc()),
        "svc ignored"
    );
    Ok(())
}

pub(crate) fn udf(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    Err(Fault::InvalidInstruction {
        pc: cpu.state.pc(),
        opcode: u32::from(instr),
    })
}

pub(crate) fn shift_imm(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let imm5 = u32::from((instr >> 6) & 0x1F);
    let (kind, amount) = match (instr >> 11) & 3 {
        0 => (ShiftKind::Lsl, imm5),
        1 => (ShiftKind::Lsr, if imm5 == 0 { 32 } else { imm5 }),
        _ => (ShiftKind::Asr, if imm5 == 0 { 32 } else { imm5 }),
    };
    let (result, carry) = shift_with_carry(cpu.state.r[rn(instr)], kind, amount, cpu.state.c());
    cpu.state.r[rd(instr)] = result;
    cpu.state.set_nz(result);
    cpu.state.set_carry(carry);
    Ok(())
}

pub(crate) fn add_sub(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let a = cpu.state.r[rn(instr)];
    let op = (instr >> 9) & 3;
    let operand = match op {
        0 | 1 => cpu.state.r[rm(instr)],
        _ => u32::from((instr >> 6) & 7),
    };
    let subtract = op & 1 != 0;
    let (result, carry, overflow) = if subtract {
        add_with_carry(a, !operand, true)
    } else {
        add_with_carry(a, operand, false)
    };
    cpu.state.r[rd(instr)] = result;
    cpu.state.set_nz(result);
    cpu.state.set_carry(carry);
    cpu.state.set_overflow(overflow);
    Ok(())
}

pub(crate) fn mov_cmp_add_sub_imm8(
    cpu: &mut CpuCore,
    _bus: &mut dyn CpuBus,
    instr: u16,
) -> Result<(), Fault> {
    let rdn = ((instr >> 8) & 7) as usize;
    let imm = imm8(instr);
    match (instr >> 11) & 3 {
        0 => {
            cpu.state.r[rdn] = imm;
            cpu.state.set_nz(imm);
        }
        1 => {
            let (result, carry, overflow) = add_with_carry(cpu.state.r[rdn], !imm, true);
            cpu.state.set_nz(result);
            cpu.state.set_carry(carry);
            cpu.state.set_overflow(overflow);
        }
        op => {
            let subtract = op == 3;
            let (result, carry, overflow) = if subtract {
                add_with_carry(cpu.state.r[rdn], !imm, true)
            } else {
                add_with_carry(cpu.state.r[rdn], imm, false)
            };
            cpu.state.r[rdn] = result;
            cpu.state.set_nz(result);
            cpu.state.set_carry(carry);
            cpu.state.set_overflow(overflow);
        }
    }
    Ok(())
}

fn set_arith_flags(cpu: &mut CpuCore, result: u32, carry: bool, overflow: bool) -> u32 {
    cpu.state.set_nz(result);
    cpu.state.set_carry(carry);
    cpu.state.set_overflow(overflow);
    result
}

pub(crate) fn alu_reg(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let rdn = rd(instr);
    let a = cpu.state.r[rdn];
    let b = cpu.state.r[rn(instr)];
    let carry_in = cpu.state.c();

    match (instr >> 6) & 0xF {
        0x0 => {
            let result = a & b;
            cpu.state.r[rdn] = result;
            cpu.state.set_nz(result);
        }
        0x1 => {
            let result = a ^ b;
            cpu.state.r[rdn] = result;
            cpu.state.set_nz(result);
        }
        0x2 | 0x3 | 0x4 | 0x7 => {
            let kind = match (instr >> 6) & 0xF {
                0x2 => ShiftKind::Lsl,
                0x3 => ShiftKind::Lsr,
                0x4 => ShiftKind::Asr,
                _ => ShiftKind::Ror,
            };
            let (result, carry) = shift_with_carry(a, kind, b & 0xFF, carry_in);
            cpu.state.r[rdn] = result;
            cpu.state.set_nz(result);
            cpu.state.set_carry(carry);
        }
        0x5 => {
            let (result, carry, overflow) = add_with_carry(a, b, carry_in);
            cpu.state.r[rdn] = set_arith_flags(cpu, result, carry, overflow);
        }
        0x6 => {
            let (result, carry, overflow) = add_with_carry(a, !b, carry_in);
            cpu.state.r[rdn] = set_arith_flags(cpu, result, carry, overflow);
        }
        0x8 => {
            cpu.state.set_nz(a & b);
        }
        0x9 => {
            let (result, carry, overflow) = add_with_carry(!b, 0, true);
            cpu.state.r[rdn] = set_arith_flags(cpu, result, carry, overflow);
        }
        0xA => {
            let (result, carry, overflow) = add_with_carry(a, !b, true);
            set_arith_flags(cpu, result, carry, overflow);
        }
        0xB => {
            let (result, carry, overflow) = add_with_carry(a, b, false);
            set_arith_flags(cpu, result, carry, overflow);
        }
        0xC => {
            let result = a | b;
            cpu.state.r[rdn] = result;
            cpu.state.set_nz(result);
        }
        0xD => {
            let result = a.wrapping_mul(b);
            cpu.state.r[rdn] = result;
            cpu.state.set_nz(result);
        }
        0xE => {
            let result = a & !b;
            cpu.state.r[rdn] = result;
            cpu.state.set_nz(result);
        }
        _ => {
            let result = !b;
            cpu.state.r[rdn] = result;
            cpu.state.set_nz(result);
        }
    }
    Ok(())
}

fn hi_regs(instr: u16) -> (usize, usize) {
    let d = (((instr >> 7) & 1) << 3 | (instr & 7)) as usize;
    let m = ((instr >> 3) & 0xF) as usize;
    (d, m)
}

pub(crate) fn add_hi(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let (d, m) = hi_regs(instr);
    let result = read_operand(cpu, d).wrapping_add(read_operand(cpu, m));
    if d == reg::PC {
        cpu.branch_to(result);
    } else {
        cpu.state.r[d] = result;
    }
    Ok(())
}

pub(crate) fn cmp_hi(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let (d, m) = hi_regs(instr);
    let (result, carry, overflow) =
        add_with_carry(read_operand(cpu, d), !read_operand(cpu, m), true);
    cpu.state.set_nz(result);
    cpu.state.set_carry(carry);
    cpu.state.set_overflow(overflow);
    Ok(())
}

pub(crate) fn mov_hi(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let (d, m) = hi_regs(instr);
    let value = read_operand(cpu, m);
    if d == reg::PC {
        cpu.branch_to(value);
    } else {
        cpu.state.r[d] = value;
    }
    Ok(())
}

pub(crate) fn bx(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let m = ((instr >> 3) & 0xF) as usize;
    let target = read_operand(cpu, m);
    cpu.write_pc_interworking(cpu.state.pc(), target)
}

pub(crate) fn ldr_literal(cpu: &mut CpuCore, bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let base = cpu.state.pc().wrapping_add(4) & !3;
    let addr = base.wrapping_add(imm8(instr) * 4);
    cpu.state.r[((instr >> 8) & 7) as usize] = bus.read_u32(addr)?;
    Ok(())
}

pub(crate) fn ldst_reg(cpu: &mut CpuCore, bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let addr = cpu.state.r[rn(instr)].wrapping_add(cpu.state.r[rm(instr)]);
    let t = rd(instr);
    match (instr >> 9) & 7 {
        0 => bus.write_u32(addr, cpu.state.r[t])?,
        1 => bus.write_u16(addr, cpu.state.r[t] as u16)?,
        2 => bus.write_u8(addr, cpu.state.r[t] as u8)?,
        3 => cpu.state.r[t] = sign_extend(bus.read_u8(addr)?.into(), 8),
        4 => cpu.state.r[t] = bus.read_u32(addr)?,
        5 => cpu.state.r[t] = bus.read_u16(addr)?.into(),
        6 => cpu.state.r[t] = bus.read_u8(addr)?.into(),
        _ => cpu.state.r[t] = sign_extend(bus.read_u16(addr)?.into(), 16),
    }
    Ok(())
}

pub(crate) fn ldst_imm5(cpu: &mut CpuCore, bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let imm5 = u32::from((instr >> 6) & 0x1F);
    let byte = instr & 0x1000 != 0;
    let load = instr & 0x0800 != 0;
    let offset = if byte { imm5 } else { imm5 * 4 };
    let addr = cpu.state.r[rn(instr)].wrapping_add(offset);
    let t = rd(instr);
    match (load, byte) {
        (false, false) => bus.write_u32(addr, cpu.state.r[t])?,
        (true, false) => cpu.state.r[t] = bus.read_u32(addr)?,
        (false, true) => bus.write_u8(addr, cpu.state.r[t] as u8)?,
        (true, true) => cpu.state.r[t] = bus.read_u8(addr)?.into(),
    }
    Ok(())
}

pub(crate) fn ldst_half_imm5(
    cpu: &mut CpuCore,
    bus: &mut dyn CpuBus,
    instr: u16,
) -> Result<(), Fault> {
    let addr = cpu.state.r[rn(instr)].wrapping_add(u32::from((instr >> 6) & 0x1F) * 2);
    let t = rd(instr);
    if instr & 0x0800 != 0 {
        cpu.state.r[t] = bus.read_u16(addr)?.into();
    } else {
        bus.write_u16(addr, cpu.state.r[t] as u16)?;
    }
    Ok(())
}

pub(crate) fn ldst_sp_rel(cpu: &mut CpuCore, bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let addr = cpu.state.sp().wrapping_add(imm8(instr) * 4);
    let t = ((instr >> 8) & 7) as usize;
    if instr & 0x0800 != 0 {
        cpu.state.r[t] = bus.read_u32(addr)?;
    } else {
        bus.write_u32(addr, cpu.state.r[t])?;
    }
    Ok(())
}

pub(crate) fn adr(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let base = cpu.state.pc().wrapping_add(4) & !3;
    cpu.state.r[((instr >> 8) & 7) as usize] = base.wrapping_add(imm8(instr) * 4);
    Ok(())
}

pub(crate) fn add_rd_sp_imm8(
    cpu: &mut CpuCore,
    _bus: &mut dyn CpuBus,
    instr: u16,
) -> Result<(), Fault> {
    cpu.state.r[((instr >> 8) & 7) as usize] = cpu.state.sp().wrapping_add(imm8(instr) * 4);
    Ok(())
}

pub(crate) fn add_sp_imm7(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let sp = cpu.state.sp();
    cpu.state.set_sp(sp.wrapping_add(u32::from(instr & 0x7F) * 4));
    Ok(())
}

pub(crate) fn sub_sp_imm7(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let sp = cpu.state.sp();
    cpu.state.set_sp(sp.wrapping_sub(u32::from(instr & 0x7F) * 4));
    Ok(())
}

pub(crate) fn push(cpu: &mut CpuCore, bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let with_lr = instr & 0x0100 != 0;
    let count = (instr & 0xFF).count_ones() + u32::from(with_lr);
    let base = cpu.state.sp().wrapping_sub(4 * count);

    let mut addr = base;
    for i in 0..8 {
        if instr & (1 << i) != 0 {
            bus.write_u32(addr, cpu.state.r[i])?;
            addr = addr.wrapping_add(4);
        }
    }
    if with_lr {
        bus.write_u32(addr, cpu.state.lr())?;
    }
    cpu.state.set_sp(base);
    Ok(())
}

pub(crate) fn pop(cpu: &mut CpuCore, bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let with_pc = instr & 0x0100 != 0;
    let count = (instr & 0xFF).count_ones() + u32::from(with_pc);

    let mut addr = cpu.state.sp();
    for i in 0..8 {
        if instr & (1 << i) != 0 {
            cpu.state.r[i] = bus.read_u32(addr)?;
            addr = addr.wrapping_add(4);
        }
    }
    let pc_value = if with_pc { Some(bus.read_u32(addr)?) } else { None };

    let sp = cpu.state.sp();
    cpu.state.set_sp(sp.wrapping_add(4 * count));
    if let Some(value) = pc_value {
        cpu.write_pc_interworking(cpu.state.pc(), value)?;
    }
    Ok(())
}

pub(crate) fn branch_cond(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let cond = ((instr >> 8) & 0xF) as u8;
    if cpu.state.condition_passed(cond) {
        let offset = sign_extend(imm8(instr), 8) << 1;
        let pc = cpu.state.pc();
        cpu.branch_to(pc.wrapping_add(4).wrapping_add(offset));
    }
    Ok(())
}

pub(crate) fn branch(cpu: &mut CpuCore, _bus: &mut dyn CpuBus, instr: u16) -> Result<(), Fault> {
    let offset = sign_extend(u32::from(instr & 0x7FF), 11) << 1;
    let pc = cpu.state.pc();
    cpu.branch_to(pc.wrapping_add(4).wrapping_add(offset));
    Ok(())
}

/// Branch offset of the 32-bit BL/B.W encodings: S:I1:I2:imm10:imm11:0
/// sign-extended to 32 bits, with I1 = !(J1^S) and I2 = !(J2^S).
fn wide_branch_offset(hw1: u16, hw2: u16) -> u32 {
    let s = u32::from((hw1 >> 10) & 1);
    let imm10 = u32::from(hw1 & 0x3FF);
    let j1 = u32::from((hw2 >> 13) & 1);
    let j2 = u32::from((hw2 >> 11) & 1);
    let imm11 = u32::from(hw2 & 0x7FF);
    let i1 = !(j1 ^ s) & 1;
    let i2 = !(j2 ^ s) & 1;
    let raw = s << 24 | i1 << 23 | i2 << 22 | imm10 << 12 | imm11 << 1;
    sign_extend(raw, 25)
}

pub(crate) fn execute32(
    cpu: &mut CpuCore,
    _bus: &mut dyn CpuBus,
    hw1: u16,
    hw2: u16,
) -> Result<(), Fault> {
    let pc = cpu.state.pc();
    if hw1 & 0xF800 == 0xF000 && hw2 & 0xD000 == 0xD000 {
        // BL
        let offset = wide_branch_offset(hw1, hw2);
        cpu.state.set_lr(pc.wrapping_add(4) | 1);
        cpu.branch_to(pc.wrapping_add(4).wrapping_add(offset));
        Ok(())
    } else if hw1 & 0xF800 == 0xF000 && hw2 & 0xD000 == 0x9000 {
        // B.W
        let offset = wide_branch_offset(hw1, hw2);
        cpu.branch_to(pc.wrapping_add(4).wrapping_add(offset));
        Ok(())
    } else if hw1 & 0xFFF0 == 0xF7F0 && hw2 & 0xF000 == 0xA000 {
        // Permanently undefined encoding; accepted and skipped.
        debug!(pc = format_args!("{pc:#010x}"), "wide udf ignored");
        Ok(())
    } else {
        Err(Fault::InvalidInstruction {
            pc,
            opcode: u32::from(hw1) << 16 | u32::from(hw2),
        })
    }
}
