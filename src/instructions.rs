// One variant per instruction family, carrying the raw opcode fields; execution
// resolves effective addresses against the CPU (consuming extension words) and
// returns the 68000 cycle count. Cycle figures follow the Motorola tables, with
// the division timing computed per quotient bit.

use crate::exceptions::{self, ExceptionSource};
use crate::fields::{Condition, EAMode, OpMode, OpResult, PackedBCD, Size};
use crate::memory::Fault;
use crate::processor::{CCRFlags, Operand, Specialties, CPU};

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum InterceptKind {
    GemDos,
    SysInit,
    Vdi,
    TimerD,
}

#[derive(Debug, Copy, Clone)]
pub enum Instruction {
    ANDICCR,
    ANDISR,
    EORICCR,
    EORISR,
    ILLEGAL,
    NOP,
    ORICCR,
    ORISR,
    RESET,
    RTE,
    RTR,
    RTS,
    RTD,
    STOP,
    TRAPV,
    LINK { register: usize },
    SWAP { register: usize },
    UNLK { register: usize },
    TRAP { vector: usize },
    MOVEUSP { register: usize, dr: usize },
    MOVEC { dr: usize },
    BCHGS { mode: usize, earegister: usize },
    BCLRS { mode: usize, earegister: usize },
    BSETS { mode: usize, earegister: usize },
    BTSTS { mode: usize, earegister: usize },
    JMP { mode: usize, earegister: usize },
    JSR { mode: usize, earegister: usize },
    MOVETOCCR { mode: usize, earegister: usize },
    MOVEFROMSR { mode: usize, earegister: usize },
    MOVETOSR { mode: usize, earegister: usize },
    PEA { mode: usize, earegister: usize },
    TAS { mode: usize, earegister: usize },
    NBCD { mode: usize, earegister: usize },
    EXT { opmode: usize, register: usize },
    ASLRMEM { dr: usize, mode: usize, earegister: usize },
    LSLRMEM { dr: usize, mode: usize, earegister: usize },
    ROXLRMEM { dr: usize, mode: usize, earegister: usize },
    ROLRMEM { dr: usize, mode: usize, earegister: usize },
    DBCC { condition: Condition, register: usize },
    MOVEM { size: Size, dr: usize, mode: usize, earegister: usize },
    ABCD { rx: usize, ry: usize, rm: usize },
    SBCD { rx: usize, ry: usize, rm: usize },
    ADDI { size: Size, mode: usize, earegister: usize },
    ANDI { size: Size, mode: usize, earegister: usize },
    CLR { size: Size, mode: usize, earegister: usize },
    CMPI { size: Size, mode: usize, earegister: usize },
    EORI { size: Size, mode: usize, earegister: usize },
    NEG { size: Size, mode: usize, earegister: usize },
    NEGX { size: Size, mode: usize, earegister: usize },
    NOT { size: Size, mode: usize, earegister: usize },
    ORI { size: Size, mode: usize, earegister: usize },
    SUBI { size: Size, mode: usize, earegister: usize },
    TST { size: Size, mode: usize, earegister: usize },
    BRA { displacement: u8 },
    BSR { displacement: u8 },
    CMPM { ax: usize, ay: usize, size: Size },
    ADDX { rx: usize, ry: usize, rm: usize, size: Size },
    SUBX { rx: usize, ry: usize, rm: usize, size: Size },
    BCHG { register: usize, mode: usize, earegister: usize },
    BCLR { register: usize, mode: usize, earegister: usize },
    BSET { register: usize, mode: usize, earegister: usize },
    BTST { register: usize, mode: usize, earegister: usize },
    DIVS { register: usize, mode: usize, earegister: usize },
    DIVU { register: usize, mode: usize, earegister: usize },
    LEA { register: usize, mode: usize, earegister: usize },
    MULS { register: usize, mode: usize, earegister: usize },
    MULU { register: usize, mode: usize, earegister: usize },
    MOVEP { dregister: usize, opmode: usize, aregister: usize },
    SCC { condition: Condition, mode: usize, earegister: usize },
    ASLRREG { register: usize, count: usize, size: Size, dr: usize, ir: usize },
    LSLRREG { register: usize, count: usize, size: Size, dr: usize, ir: usize },
    ROXLR { register: usize, count: usize, size: Size, dr: usize, ir: usize },
    ROLR { register: usize, count: usize, size: Size, dr: usize, ir: usize },
    MOVEQ { register: usize, data: usize },
    EXG { opmode: usize, rx: usize, ry: usize },
    CHK { register: usize, mode: usize, earegister: usize },
    MOVEA { register: usize, size: Size, mode: usize, earegister: usize },
    ADDQ { data: usize, size: Size, mode: usize, earegister: usize },
    SUBQ { data: usize, size: Size, mode: usize, earegister: usize },
    BCC { condition: Condition, displacement: u8 },
    ADD { register: usize, opmode: OpMode, mode: usize, earegister: usize },
    ADDA { register: usize, size: Size, mode: usize, earegister: usize },
    SUBA { register: usize, size: Size, mode: usize, earegister: usize },
    AND { register: usize, opmode: OpMode, mode: usize, earegister: usize },
    CMP { register: usize, size: Size, mode: usize, earegister: usize },
    CMPA { register: usize, size: Size, mode: usize, earegister: usize },
    EOR { register: usize, opmode: OpMode, mode: usize, earegister: usize },
    OR { register: usize, opmode: OpMode, mode: usize, earegister: usize },
    SUB { register: usize, opmode: OpMode, mode: usize, earegister: usize },
    MOVE { size: Size, destreg: usize, destmode: usize, srcmode: usize, srcreg: usize },
    Intercept(InterceptKind),
}

// Operand fetch time per addressing mode.
pub fn ea_cycles(mode: usize, earegister: usize, size: Size) -> u32 {
    let long = size == Size::Long;
    match mode {
        0 | 1 => 0,
        2 | 3 => {
            if long {
                8
            } else {
                4
            }
        }
        4 => {
            if long {
                10
            } else {
                6
            }
        }
        5 => {
            if long {
                12
            } else {
                8
            }
        }
        6 => {
            if long {
                14
            } else {
                10
            }
        }
        7 => match earegister {
            0 | 2 => {
                if long {
                    12
                } else {
                    8
                }
            }
            1 => {
                if long {
                    16
                } else {
                    12
                }
            }
            3 => {
                if long {
                    14
                } else {
                    10
                }
            }
            _ => {
                if long {
                    8
                } else {
                    4
                }
            }
        },
        _ => 0,
    }
}

// Extension words an EA consumes, for the disassembler.
fn ea_words(mode: usize, earegister: usize, size: Size) -> usize {
    match mode {
        5 | 6 => 1,
        7 => match earegister {
            1 => 2,
            4 => {
                if size == Size::Long {
                    2
                } else {
                    1
                }
            }
            _ => 1,
        },
        _ => 0,
    }
}

fn privilege_violation(cpu: &mut CPU) -> u32 {
    exceptions::exception(cpu, 8, 0, ExceptionSource::Cpu);
    4
}

// MOVEC register visibility by CPU level.
fn movec_illegal(level: u8, regno: usize) -> bool {
    let regno2 = regno & 0x7ff;
    match level {
        0 => true,
        1 => regno2 >= 2,
        2 | 3 => {
            if regno == 3 {
                // 68040 only
                true
            } else {
                !(regno2 < 4 || regno == 0x804)
            }
        }
        _ => {
            if regno == 0x802 {
                // 68020 only
                true
            } else {
                regno2 >= 8
            }
        }
    }
}

#[derive(Copy, Clone, PartialEq)]
enum ShiftKind {
    Arithmetic,
    Logical,
    RotateX,
    Rotate,
}

// Bitwise-exact shifts and rotates, one bit at a time.
fn shift_operation(
    cpu: &mut CPU,
    value: OpResult,
    count: u32,
    kind: ShiftKind,
    left: bool,
) -> OpResult {
    let size = value.size();
    let bits = 8 * size as u32;
    let msb_mask = 1u32 << (bits - 1);
    let value_mask = if bits == 32 { 0xffffffff } else { (1u32 << bits) - 1 };
    let mut v = value.inner();
    let mut carry = false;
    let mut overflow = false;

    for _ in 0..count {
        if left {
            carry = v & msb_mask != 0;
            let rotated_in = match kind {
                ShiftKind::RotateX => cpu.regs.x as u32,
                ShiftKind::Rotate => (v & msb_mask != 0) as u32,
                _ => 0,
            };
            let new = ((v << 1) | rotated_in) & value_mask;
            if (new & msb_mask != 0) != (v & msb_mask != 0) {
                overflow = true;
            }
            v = new;
        } else {
            carry = v & 1 != 0;
            let rotated_in = match kind {
                ShiftKind::RotateX => cpu.regs.x as u32,
                ShiftKind::Rotate => v & 1,
                ShiftKind::Arithmetic => ((v & msb_mask) != 0) as u32,
                ShiftKind::Logical => 0,
            };
            v = (v >> 1) | if rotated_in != 0 { msb_mask } else { 0 };
        }
        if kind == ShiftKind::Arithmetic || kind == ShiftKind::Logical || kind == ShiftKind::RotateX {
            cpu.regs.x = carry;
        }
    }

    let result = size.from(v);
    cpu.regs.n = result.msb();
    cpu.regs.z = result.inner() == 0;
    cpu.regs.v = if kind == ShiftKind::Arithmetic && left { overflow } else { false };
    cpu.regs.c = if count == 0 {
        if kind == ShiftKind::RotateX {
            cpu.regs.x
        } else {
            false
        }
    } else {
        carry
    };
    result
}

// Exact 68000 division timing (quotient-bit algorithm).
pub fn divu_cycles(dividend: u32, divisor: u16) -> u32 {
    if divisor == 0 {
        return 0;
    }
    if dividend >> 16 >= divisor as u32 {
        return 5 * 2;
    }
    let mut mcycles = 38u32;
    let hdivisor = (divisor as u32) << 16;
    let mut dividend = dividend;
    for _ in 0..15 {
        let temp = dividend;
        dividend <<= 1;
        if (temp as i32) < 0 {
            dividend = dividend.wrapping_sub(hdivisor);
        } else {
            mcycles += 2;
            if dividend >= hdivisor {
                dividend = dividend.wrapping_sub(hdivisor);
                mcycles -= 1;
            }
        }
    }
    mcycles * 2
}

pub fn divs_cycles(dividend: i32, divisor: i16) -> u32 {
    if divisor == 0 {
        return 0;
    }
    let mut mcycles = 6u32;
    if dividend < 0 {
        mcycles += 1;
    }
    if (dividend.wrapping_abs() as u32) >> 16 >= divisor.wrapping_abs() as u16 as u32 {
        return (mcycles + 2) * 2;
    }
    let mut aquot = (dividend.wrapping_abs() as u32) / (divisor.wrapping_abs() as u16 as u32);
    mcycles += 55;
    if divisor >= 0 {
        if dividend >= 0 {
            mcycles -= 1;
        } else {
            mcycles += 1;
        }
    }
    for _ in 0..15 {
        if (aquot as i16) >= 0 {
            mcycles += 1;
        }
        aquot <<= 1;
    }
    mcycles * 2
}

impl Instruction {
    pub fn execute(&self, cpu: &mut CPU) -> Result<u32, Fault> {
        match *self {
            Self::ANDICCR => {
                let extword = cpu.next_word()?;
                let ccr = cpu.make_sr() & 0x1f & extword;
                cpu.regs.sr = (cpu.regs.sr & 0xff00) | (ccr & 0xff);
                cpu.make_from_sr();
                Ok(20)
            }
            Self::ANDISR => {
                if !cpu.in_supervisor_mode() {
                    return Ok(privilege_violation(cpu));
                }
                let extword = cpu.next_word()?;
                let sr = cpu.make_sr() & extword;
                cpu.set_sr(sr);
                Ok(20)
            }
            Self::EORICCR => {
                let extword = cpu.next_word()?;
                let ccr = (cpu.make_sr() ^ extword) & 0x1f;
                cpu.regs.sr = (cpu.regs.sr & 0xff00) | ccr;
                cpu.make_from_sr();
                Ok(20)
            }
            Self::EORISR => {
                if !cpu.in_supervisor_mode() {
                    return Ok(privilege_violation(cpu));
                }
                let extword = cpu.next_word()?;
                let sr = cpu.make_sr() ^ extword;
                cpu.set_sr(sr);
                Ok(20)
            }
            Self::ORICCR => {
                let extword = cpu.next_word()?;
                let ccr = (cpu.make_sr() | extword) & 0x1f;
                cpu.regs.sr = (cpu.regs.sr & 0xff00) | ccr;
                cpu.make_from_sr();
                Ok(20)
            }
            Self::ORISR => {
                if !cpu.in_supervisor_mode() {
                    return Ok(privilege_violation(cpu));
                }
                let extword = cpu.next_word()?;
                let sr = cpu.make_sr() | extword;
                cpu.set_sr(sr);
                Ok(20)
            }
            Self::ILLEGAL => Ok(cpu.op_illg(0x4afc)),
            Self::NOP => Ok(4),
            Self::RESET => {
                if !cpu.in_supervisor_mode() {
                    return Ok(privilege_violation(cpu));
                }
                cpu.bus.dsp.reset();
                Ok(132)
            }
            Self::RTE => {
                if !cpu.in_supervisor_mode() {
                    return Ok(privilege_violation(cpu));
                }
                loop {
                    let sr = cpu.pop_word()?;
                    let pc = cpu.pop_long()?;
                    if cpu.level == 0 {
                        cpu.set_sr(sr);
                        cpu.regs.pc = pc;
                        break;
                    }
                    let format = cpu.pop_word()?;
                    match format >> 12 {
                        0 => {
                            cpu.set_sr(sr);
                            cpu.regs.pc = pc;
                            break;
                        }
                        1 => {
                            // Throwaway frame: restore and take the next one.
                            cpu.set_sr(sr);
                            continue;
                        }
                        2 => {
                            cpu.pop_long()?;
                            cpu.set_sr(sr);
                            cpu.regs.pc = pc;
                            break;
                        }
                        0xa => {
                            for _ in 0..12 {
                                cpu.pop_word()?;
                            }
                            cpu.set_sr(sr);
                            cpu.regs.pc = pc;
                            break;
                        }
                        _ => {
                            exceptions::exception(cpu, 14, 0, ExceptionSource::Cpu);
                            return Ok(4);
                        }
                    }
                }
                cpu.refill_prefetch(cpu.regs.pc);
                Ok(20)
            }
            Self::RTR => {
                let ccr = cpu.pop_word()?;
                cpu.regs.sr = (cpu.make_sr() & 0xff00) | (ccr & 0x1f);
                cpu.make_from_sr();
                cpu.regs.pc = cpu.pop_long()?;
                cpu.refill_prefetch(cpu.regs.pc);
                Ok(20)
            }
            Self::RTS => {
                cpu.regs.pc = cpu.pop_long()?;
                cpu.refill_prefetch(cpu.regs.pc);
                Ok(16)
            }
            Self::RTD => {
                let displacement = cpu.next_word()? as i16 as i32;
                cpu.regs.pc = cpu.pop_long()?;
                cpu.regs.a[7] = (cpu.regs.a[7] as i32).wrapping_add(displacement) as u32;
                cpu.refill_prefetch(cpu.regs.pc);
                Ok(16)
            }
            Self::STOP => {
                if !cpu.in_supervisor_mode() {
                    return Ok(privilege_violation(cpu));
                }
                let extword = cpu.next_word()?;
                cpu.set_sr(extword);
                cpu.regs.stopped = true;
                cpu.regs.spcflags.insert(Specialties::STOP);
                Ok(4)
            }
            Self::TRAPV => {
                if cpu.regs.v {
                    exceptions::exception(cpu, 7, cpu.regs.instruction_pc, ExceptionSource::Cpu);
                }
                Ok(4)
            }
            Self::LINK { register } => {
                let displacement = cpu.next_word()? as i16 as i32;
                let value = cpu.regs.a[register];
                cpu.push_long(value)?;
                cpu.regs.a[register] = cpu.regs.a[7];
                cpu.regs.a[7] = (cpu.regs.a[7] as i32).wrapping_add(displacement) as u32;
                Ok(16)
            }
            Self::UNLK { register } => {
                cpu.regs.a[7] = cpu.regs.a[register];
                let value = cpu.pop_long()?;
                cpu.regs.a[register] = value;
                Ok(12)
            }
            Self::SWAP { register } => {
                let value = cpu.regs.d[register];
                let result = value.rotate_left(16);
                cpu.regs.d[register] = result;
                cpu.regs.n = result & 0x80000000 != 0;
                cpu.regs.z = result == 0;
                cpu.regs.v = false;
                cpu.regs.c = false;
                Ok(4)
            }
            Self::TRAP { vector } => {
                exceptions::exception(cpu, 32 + vector as u32, 0, ExceptionSource::Cpu);
                Ok(4)
            }
            Self::MOVEUSP { register, dr } => {
                if !cpu.in_supervisor_mode() {
                    return Ok(privilege_violation(cpu));
                }
                if dr == 0 {
                    cpu.regs.usp = cpu.regs.a[register];
                } else {
                    cpu.regs.a[register] = cpu.regs.usp;
                }
                Ok(4)
            }
            Self::MOVEC { dr } => {
                if !cpu.in_supervisor_mode() {
                    return Ok(privilege_violation(cpu));
                }
                let extword = cpu.next_word()?;
                let ctrl = (extword & 0xfff) as usize;
                let register = ((extword >> 12) & 0xf) as usize;
                let da = register >> 3;
                let register = register & 7;
                if movec_illegal(cpu.level, ctrl) {
                    return Ok(cpu.op_illg(if dr == 0 { 0x4e7a } else { 0x4e7b }));
                }
                if dr == 0 {
                    // Control register to general register.
                    let value = match ctrl {
                        0x000 => cpu.regs.sfc,
                        0x001 => cpu.regs.dfc,
                        0x002 => cpu.regs.cacr,
                        0x003 => cpu.regs.tc,
                        0x004 => cpu.regs.itt0,
                        0x005 => cpu.regs.itt1,
                        0x006 => cpu.regs.dtt0,
                        0x007 => cpu.regs.dtt1,
                        0x800 => cpu.regs.usp,
                        0x801 => cpu.regs.vbr,
                        0x802 => cpu.regs.caar,
                        0x803 => {
                            if cpu.regs.m {
                                cpu.regs.a[7]
                            } else {
                                cpu.regs.msp
                            }
                        }
                        0x804 => {
                            if !cpu.regs.m {
                                cpu.regs.a[7]
                            } else {
                                cpu.regs.isp
                            }
                        }
                        0x805 => cpu.regs.mmusr,
                        0x806 => cpu.regs.urp,
                        0x807 => cpu.regs.srp,
                        _ => return Ok(cpu.op_illg(0x4e7a)),
                    };
                    if da == 0 {
                        cpu.regs.d[register] = value;
                    } else {
                        cpu.regs.a[register] = value;
                    }
                } else {
                    let value = if da == 0 { cpu.regs.d[register] } else { cpu.regs.a[register] };
                    match ctrl {
                        0x000 => cpu.regs.sfc = value & 7,
                        0x001 => cpu.regs.dfc = value & 7,
                        0x002 => {
                            let mask = match cpu.level {
                                2 => 0x0000000f,
                                3 => 0x00003f1f,
                                4 => 0x80008000,
                                _ => 0,
                            };
                            cpu.regs.cacr = value & mask;
                        }
                        0x003 => cpu.regs.tc = value & 0xc000,
                        0x004 => cpu.regs.itt0 = value & 0xffffe364,
                        0x005 => cpu.regs.itt1 = value & 0xffffe364,
                        0x006 => cpu.regs.dtt0 = value & 0xffffe364,
                        0x007 => cpu.regs.dtt1 = value & 0xffffe364,
                        0x800 => cpu.regs.usp = value,
                        0x801 => cpu.regs.vbr = value,
                        0x802 => cpu.regs.caar = value,
                        0x803 => {
                            cpu.regs.msp = value;
                            if cpu.regs.m {
                                cpu.regs.a[7] = value;
                            }
                        }
                        0x804 => {
                            cpu.regs.isp = value;
                            if !cpu.regs.m {
                                cpu.regs.a[7] = value;
                            }
                        }
                        0x805 => cpu.regs.mmusr = value,
                        0x806 => cpu.regs.urp = value,
                        0x807 => cpu.regs.srp = value,
                        _ => return Ok(cpu.op_illg(0x4e7b)),
                    }
                }
                Ok(12)
            }
            Self::BCHGS { mode, earegister }
            | Self::BCLRS { mode, earegister }
            | Self::BSETS { mode, earegister }
            | Self::BTSTS { mode, earegister } => {
                let extword = cpu.next_word()?;
                self.bit_operation(cpu, extword as u32, mode, earegister, true)
            }
            Self::BCHG { register, mode, earegister }
            | Self::BCLR { register, mode, earegister }
            | Self::BSET { register, mode, earegister }
            | Self::BTST { register, mode, earegister } => {
                let number = cpu.regs.d[register];
                self.bit_operation(cpu, number, mode, earegister, false)
            }
            Self::JMP { mode, earegister } => {
                let ea = EAMode::from(Size::Long, mode, earegister, cpu)?;
                cpu.regs.pc = cpu.address_of(ea);
                cpu.refill_prefetch(cpu.regs.pc);
                Ok(match mode {
                    2 => 8,
                    5 => 10,
                    6 => 14,
                    7 => match earegister {
                        0 | 2 => 10,
                        1 => 12,
                        _ => 14,
                    },
                    _ => 8,
                })
            }
            Self::JSR { mode, earegister } => {
                let ea = EAMode::from(Size::Long, mode, earegister, cpu)?;
                let target = cpu.address_of(ea);
                let pc = cpu.regs.pc;
                cpu.push_long(pc)?;
                cpu.regs.pc = target;
                cpu.refill_prefetch(target);
                Ok(match mode {
                    2 => 16,
                    5 => 18,
                    6 => 22,
                    7 => match earegister {
                        0 | 2 => 18,
                        1 => 20,
                        _ => 22,
                    },
                    _ => 16,
                })
            }
            Self::MOVETOCCR { mode, earegister } => {
                let ea = EAMode::from(Size::Word, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, Size::Word)?.inner() as u16;
                cpu.regs.sr = (cpu.make_sr() & 0xff00) | (value & 0x1f);
                cpu.make_from_sr();
                Ok(12 + ea_cycles(mode, earegister, Size::Word))
            }
            Self::MOVEFROMSR { mode, earegister } => {
                // Privileged from the 68010 on.
                if cpu.level > 0 && !cpu.in_supervisor_mode() {
                    return Ok(privilege_violation(cpu));
                }
                let sr = cpu.make_sr();
                let ea = EAMode::from(Size::Word, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                cpu.write_operand(op, OpResult::Word(sr))?;
                Ok(if mode == 0 { 6 } else { 8 + ea_cycles(mode, earegister, Size::Word) })
            }
            Self::MOVETOSR { mode, earegister } => {
                if !cpu.in_supervisor_mode() {
                    return Ok(privilege_violation(cpu));
                }
                let ea = EAMode::from(Size::Word, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, Size::Word)?.inner() as u16;
                cpu.set_sr(value);
                Ok(12 + ea_cycles(mode, earegister, Size::Word))
            }
            Self::PEA { mode, earegister } => {
                let ea = EAMode::from(Size::Long, mode, earegister, cpu)?;
                let address = cpu.address_of(ea);
                cpu.push_long(address)?;
                Ok(match mode {
                    2 => 12,
                    5 => 16,
                    6 => 20,
                    7 => match earegister {
                        0 | 2 => 16,
                        _ => 20,
                    },
                    _ => 12,
                })
            }
            Self::TAS { mode, earegister } => {
                let ea = EAMode::from(Size::Byte, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, Size::Byte)?;
                cpu.regs.n = value.msb();
                cpu.regs.z = value.inner() == 0;
                cpu.regs.v = false;
                cpu.regs.c = false;
                cpu.write_operand(op, OpResult::Byte(value.inner() as u8 | 0x80))?;
                Ok(if mode == 0 { 4 } else { 14 + ea_cycles(mode, earegister, Size::Byte) })
            }
            Self::NBCD { mode, earegister } => {
                let ea = EAMode::from(Size::Byte, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, Size::Byte)?;
                let (result, borrow) = PackedBCD(0).sub(PackedBCD::from(value), cpu.regs.x);
                cpu.write_operand(op, result)?;
                cpu.regs.c = borrow;
                cpu.regs.x = borrow;
                if result.inner() != 0 {
                    cpu.regs.z = false;
                }
                Ok(if mode == 0 { 6 } else { 8 + ea_cycles(mode, earegister, Size::Byte) })
            }
            Self::EXT { opmode, register } => {
                match opmode {
                    2 => {
                        let result = OpResult::Word(cpu.regs.d[register] as u8 as i8 as i16 as u16);
                        cpu.regs.d[register] = (cpu.regs.d[register] & 0xffff0000) | result.inner();
                        cpu.regs.n = result.msb();
                        cpu.regs.z = result.inner() == 0;
                    }
                    _ => {
                        let result = cpu.regs.d[register] as u16 as i16 as i32 as u32;
                        cpu.regs.d[register] = result;
                        cpu.regs.n = result & 0x80000000 != 0;
                        cpu.regs.z = result == 0;
                    }
                }
                cpu.regs.v = false;
                cpu.regs.c = false;
                Ok(4)
            }
            Self::ASLRMEM { dr, mode, earegister }
            | Self::LSLRMEM { dr, mode, earegister }
            | Self::ROXLRMEM { dr, mode, earegister }
            | Self::ROLRMEM { dr, mode, earegister } => {
                let kind = match self {
                    Self::ASLRMEM { .. } => ShiftKind::Arithmetic,
                    Self::LSLRMEM { .. } => ShiftKind::Logical,
                    Self::ROXLRMEM { .. } => ShiftKind::RotateX,
                    _ => ShiftKind::Rotate,
                };
                let ea = EAMode::from(Size::Word, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, Size::Word)?;
                let result = shift_operation(cpu, value, 1, kind, dr == 1);
                cpu.write_operand(op, result)?;
                Ok(8 + ea_cycles(mode, earegister, Size::Word))
            }
            Self::DBCC { condition, register } => {
                let base = cpu.regs.pc;
                let displacement = cpu.next_word()? as i16 as i32;
                if condition.evaluate(cpu) {
                    Ok(12)
                } else {
                    let counter = (cpu.regs.d[register] as u16).wrapping_sub(1);
                    cpu.regs.d[register] = (cpu.regs.d[register] & 0xffff0000) | counter as u32;
                    if counter != 0xffff {
                        cpu.regs.pc = (base as i32).wrapping_add(displacement) as u32;
                        cpu.refill_prefetch(cpu.regs.pc);
                        Ok(10)
                    } else {
                        Ok(14)
                    }
                }
            }
            Self::MOVEM { size, dr, mode, earegister } => {
                let mask = cpu.next_word()?;
                let step = size as u32;
                let per_reg = if size == Size::Long { 8 } else { 4 };
                let mut count = 0u32;
                match mode {
                    4 => {
                        // Predecrement: registers stored from a7 down, mask reversed.
                        let mut addr = cpu.regs.a[earegister];
                        for j in 0..16 {
                            if mask & (1 << j) != 0 {
                                let value = if j < 8 { cpu.regs.a[7 - j] } else { cpu.regs.d[15 - j] };
                                addr = addr.wrapping_sub(step);
                                cpu.write(addr, size.from(value))?;
                                count += 1;
                            }
                        }
                        cpu.regs.a[earegister] = addr;
                        Ok(8 + per_reg * count)
                    }
                    3 => {
                        // Postincrement: memory to registers only.
                        let mut addr = cpu.regs.a[earegister];
                        for j in 0..16 {
                            if mask & (1 << j) != 0 {
                                let value = cpu.read(addr, size)?.sign_extend() as u32;
                                if j < 8 {
                                    cpu.regs.d[j] = value;
                                } else {
                                    cpu.regs.a[j - 8] = value;
                                }
                                addr = addr.wrapping_add(step);
                                count += 1;
                            }
                        }
                        cpu.regs.a[earegister] = addr;
                        Ok(12 + per_reg * count)
                    }
                    _ => {
                        let ea = EAMode::from(size, mode, earegister, cpu)?;
                        let mut addr = cpu.address_of(ea);
                        for j in 0..16 {
                            if mask & (1 << j) != 0 {
                                if dr == 0 {
                                    let value = if j < 8 { cpu.regs.d[j] } else { cpu.regs.a[j - 8] };
                                    cpu.write(addr, size.from(value))?;
                                } else {
                                    let value = cpu.read(addr, size)?.sign_extend() as u32;
                                    if j < 8 {
                                        cpu.regs.d[j] = value;
                                    } else {
                                        cpu.regs.a[j - 8] = value;
                                    }
                                }
                                addr = addr.wrapping_add(step);
                                count += 1;
                            }
                        }
                        Ok((if dr == 0 { 8 } else { 12 }) + per_reg * count + ea_cycles(mode, earegister, Size::Word))
                    }
                }
            }
            Self::ABCD { rx, ry, rm } | Self::SBCD { rx, ry, rm } => {
                let subtract = matches!(self, Self::SBCD { .. });
                let (dst, src) = if rm == 0 {
                    (Operand::DataRegister(rx), Operand::DataRegister(ry))
                } else {
                    cpu.regs.a[ry] = cpu.regs.a[ry].wrapping_sub(1);
                    let src_addr = cpu.regs.a[ry];
                    cpu.regs.a[rx] = cpu.regs.a[rx].wrapping_sub(1);
                    (Operand::Memory(cpu.regs.a[rx]), Operand::Memory(src_addr))
                };
                let dval = cpu.read_operand(dst, Size::Byte)?;
                let sval = cpu.read_operand(src, Size::Byte)?;
                let (result, carry) = if subtract {
                    PackedBCD::from(dval).sub(PackedBCD::from(sval), cpu.regs.x)
                } else {
                    PackedBCD::from(dval).add(PackedBCD::from(sval), cpu.regs.x)
                };
                cpu.write_operand(dst, result)?;
                cpu.regs.c = carry;
                cpu.regs.x = carry;
                if result.inner() != 0 {
                    cpu.regs.z = false;
                }
                Ok(if rm == 0 { 6 } else { 18 })
            }
            Self::ADDI { size, mode, earegister }
            | Self::SUBI { size, mode, earegister }
            | Self::CMPI { size, mode, earegister } => {
                let operand = cpu.immediate_operand(size)?;
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, size)?;
                match self {
                    Self::ADDI { .. } => {
                        let (result, ccr) = operand.add(value, false);
                        cpu.write_operand(op, result)?;
                        ccr.set(cpu);
                    }
                    Self::SUBI { .. } => {
                        let (result, ccr) = value.sub(operand, false);
                        cpu.write_operand(op, result)?;
                        ccr.set(cpu);
                    }
                    _ => {
                        let (_, mut ccr) = value.sub(operand, false);
                        ccr.x = None;
                        ccr.set(cpu);
                    }
                }
                let base = if mode == 0 {
                    if size == Size::Long {
                        if matches!(self, Self::CMPI { .. }) {
                            14
                        } else {
                            16
                        }
                    } else {
                        8
                    }
                } else if size == Size::Long {
                    20
                } else {
                    12
                };
                Ok(base + ea_cycles(mode, earegister, size))
            }
            Self::ANDI { size, mode, earegister }
            | Self::ORI { size, mode, earegister }
            | Self::EORI { size, mode, earegister } => {
                let operand = cpu.immediate_operand(size)?;
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, size)?;
                let (result, ccr) = match self {
                    Self::ANDI { .. } => value.and(operand),
                    Self::ORI { .. } => value.or(operand),
                    _ => value.xor(operand),
                };
                cpu.write_operand(op, result)?;
                ccr.set(cpu);
                let base = if mode == 0 {
                    if size == Size::Long {
                        16
                    } else {
                        8
                    }
                } else if size == Size::Long {
                    20
                } else {
                    12
                };
                Ok(base + ea_cycles(mode, earegister, size))
            }
            Self::CLR { size, mode, earegister } => {
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                // The 68000 reads before clearing.
                cpu.read_operand(op, size)?;
                cpu.write_operand(op, size.zero())?;
                cpu.regs.n = false;
                cpu.regs.z = true;
                cpu.regs.v = false;
                cpu.regs.c = false;
                let base = if mode == 0 {
                    if size == Size::Long {
                        6
                    } else {
                        4
                    }
                } else if size == Size::Long {
                    12
                } else {
                    8
                };
                Ok(base + ea_cycles(mode, earegister, size))
            }
            Self::NEG { size, mode, earegister } | Self::NEGX { size, mode, earegister } => {
                let extend = matches!(self, Self::NEGX { .. }) && cpu.regs.x;
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, size)?;
                let (result, mut ccr) = size.zero().sub(value, extend);
                if matches!(self, Self::NEGX { .. }) && result.inner() != 0 {
                    // NEGX only clears Z, never sets it.
                    ccr.z = Some(false);
                } else if matches!(self, Self::NEGX { .. }) {
                    ccr.z = None;
                }
                cpu.write_operand(op, result)?;
                ccr.set(cpu);
                let base = if mode == 0 {
                    if size == Size::Long {
                        6
                    } else {
                        4
                    }
                } else if size == Size::Long {
                    12
                } else {
                    8
                };
                Ok(base + ea_cycles(mode, earegister, size))
            }
            Self::NOT { size, mode, earegister } => {
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, size)?;
                let (result, ccr) = value.not();
                cpu.write_operand(op, result)?;
                ccr.set(cpu);
                let base = if mode == 0 {
                    if size == Size::Long {
                        6
                    } else {
                        4
                    }
                } else if size == Size::Long {
                    12
                } else {
                    8
                };
                Ok(base + ea_cycles(mode, earegister, size))
            }
            Self::TST { size, mode, earegister } => {
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, size)?;
                cpu.regs.n = value.msb();
                cpu.regs.z = value.inner() == 0;
                cpu.regs.v = false;
                cpu.regs.c = false;
                Ok(4 + ea_cycles(mode, earegister, size))
            }
            Self::BRA { displacement } => {
                let base = cpu.regs.pc;
                let displacement = if displacement == 0 {
                    cpu.next_word()? as i16 as i32
                } else {
                    displacement as i8 as i32
                };
                cpu.regs.pc = (base as i32).wrapping_add(displacement) as u32;
                cpu.refill_prefetch(cpu.regs.pc);
                Ok(10)
            }
            Self::BSR { displacement } => {
                let base = cpu.regs.pc;
                let displacement = if displacement == 0 {
                    cpu.next_word()? as i16 as i32
                } else {
                    displacement as i8 as i32
                };
                let pc = cpu.regs.pc;
                cpu.push_long(pc)?;
                cpu.regs.pc = (base as i32).wrapping_add(displacement) as u32;
                cpu.refill_prefetch(cpu.regs.pc);
                Ok(18)
            }
            Self::BCC { condition, displacement } => {
                let base = cpu.regs.pc;
                let word_displacement = displacement == 0;
                let displacement = if word_displacement {
                    cpu.next_word()? as i16 as i32
                } else {
                    displacement as i8 as i32
                };
                if condition.evaluate(cpu) {
                    cpu.regs.pc = (base as i32).wrapping_add(displacement) as u32;
                    cpu.refill_prefetch(cpu.regs.pc);
                    Ok(10)
                } else {
                    Ok(if word_displacement { 12 } else { 8 })
                }
            }
            Self::CMPM { ax, ay, size } => {
                let src = cpu.read(cpu.regs.a[ay], size)?;
                cpu.regs.a[ay] = cpu.regs.a[ay].wrapping_add(size as u32);
                let dst = cpu.read(cpu.regs.a[ax], size)?;
                cpu.regs.a[ax] = cpu.regs.a[ax].wrapping_add(size as u32);
                let (_, mut ccr) = dst.sub(src, false);
                ccr.x = None;
                ccr.set(cpu);
                Ok(if size == Size::Long { 20 } else { 12 })
            }
            Self::ADDX { rx, ry, rm, size } | Self::SUBX { rx, ry, rm, size } => {
                let subtract = matches!(self, Self::SUBX { .. });
                let (dst, src) = if rm == 0 {
                    (Operand::DataRegister(rx), Operand::DataRegister(ry))
                } else {
                    cpu.regs.a[ry] = cpu.regs.a[ry].wrapping_sub(size as u32);
                    let src_addr = cpu.regs.a[ry];
                    cpu.regs.a[rx] = cpu.regs.a[rx].wrapping_sub(size as u32);
                    (Operand::Memory(cpu.regs.a[rx]), Operand::Memory(src_addr))
                };
                let sval = cpu.read_operand(src, size)?;
                let dval = cpu.read_operand(dst, size)?;
                let (result, mut ccr) = if subtract {
                    dval.sub(sval, cpu.regs.x)
                } else {
                    sval.add(dval, cpu.regs.x)
                };
                // X-form Z is only ever cleared.
                if result.inner() == 0 {
                    ccr.z = None;
                }
                cpu.write_operand(dst, result)?;
                ccr.set(cpu);
                Ok(match (rm, size == Size::Long) {
                    (0, false) => 4,
                    (0, true) => 8,
                    (_, false) => 18,
                    (_, true) => 30,
                })
            }
            Self::DIVU { register, mode, earegister } => {
                let ea = EAMode::from(Size::Word, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let divisor = cpu.read_operand(op, Size::Word)?.inner() as u16;
                if divisor == 0 {
                    exceptions::exception(cpu, 5, cpu.regs.instruction_pc, ExceptionSource::Cpu);
                    return Ok(4);
                }
                let dividend = cpu.regs.d[register];
                let cycles = divu_cycles(dividend, divisor) + 4 + ea_cycles(mode, earegister, Size::Word);
                if dividend >> 16 >= divisor as u32 {
                    cpu.regs.v = true;
                    cpu.regs.n = true;
                    cpu.regs.c = false;
                    return Ok(cycles);
                }
                let quotient = dividend / divisor as u32;
                let remainder = dividend % divisor as u32;
                cpu.regs.d[register] = (remainder << 16) | (quotient & 0xffff);
                cpu.regs.v = false;
                cpu.regs.c = false;
                cpu.regs.n = quotient & 0x8000 != 0;
                cpu.regs.z = quotient == 0;
                Ok(cycles)
            }
            Self::DIVS { register, mode, earegister } => {
                let ea = EAMode::from(Size::Word, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let divisor = cpu.read_operand(op, Size::Word)?.inner() as u16 as i16;
                if divisor == 0 {
                    exceptions::exception(cpu, 5, cpu.regs.instruction_pc, ExceptionSource::Cpu);
                    return Ok(4);
                }
                let dividend = cpu.regs.d[register] as i32;
                let cycles = divs_cycles(dividend, divisor) + 4 + ea_cycles(mode, earegister, Size::Word);
                let quotient = dividend.wrapping_div(divisor as i32);
                if quotient > 0x7fff || quotient < -0x8000 {
                    cpu.regs.v = true;
                    cpu.regs.n = true;
                    cpu.regs.c = false;
                    return Ok(cycles);
                }
                let remainder = dividend.wrapping_rem(divisor as i32);
                cpu.regs.d[register] = ((remainder as u32) << 16) | (quotient as u32 & 0xffff);
                cpu.regs.v = false;
                cpu.regs.c = false;
                cpu.regs.n = quotient < 0;
                cpu.regs.z = quotient == 0;
                Ok(cycles)
            }
            Self::LEA { register, mode, earegister } => {
                let ea = EAMode::from(Size::Long, mode, earegister, cpu)?;
                cpu.regs.a[register] = cpu.address_of(ea);
                Ok(match mode {
                    2 => 4,
                    5 => 8,
                    6 => 12,
                    7 => match earegister {
                        0 | 2 => 8,
                        1 => 12,
                        _ => 12,
                    },
                    _ => 4,
                })
            }
            Self::MULU { register, mode, earegister } => {
                let ea = EAMode::from(Size::Word, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let src = cpu.read_operand(op, Size::Word)?.inner();
                let result = src * (cpu.regs.d[register] & 0xffff);
                cpu.regs.d[register] = result;
                cpu.regs.n = result & 0x80000000 != 0;
                cpu.regs.z = result == 0;
                cpu.regs.v = false;
                cpu.regs.c = false;
                Ok(38 + 2 * src.count_ones() + ea_cycles(mode, earegister, Size::Word))
            }
            Self::MULS { register, mode, earegister } => {
                let ea = EAMode::from(Size::Word, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let src = cpu.read_operand(op, Size::Word)?;
                let result =
                    (src.sign_extend() as i64 * (cpu.regs.d[register] as u16 as i16 as i64)) as u32;
                cpu.regs.d[register] = result;
                cpu.regs.n = result & 0x80000000 != 0;
                cpu.regs.z = result == 0;
                cpu.regs.v = false;
                cpu.regs.c = false;
                // Timing counts 01/10 patterns in the source.
                let pattern = ((src.inner() << 1) ^ src.inner()) & 0x1ffff;
                Ok(38 + 2 * pattern.count_ones() + ea_cycles(mode, earegister, Size::Word))
            }
            Self::MOVEP { dregister, opmode, aregister } => {
                let displacement = cpu.next_word()? as i16 as i32;
                let mut addr = (cpu.regs.a[aregister] as i32).wrapping_add(displacement) as u32;
                match opmode {
                    4 => {
                        // Word from memory to register.
                        let hi = cpu.bus.read_byte(addr)? as u32;
                        let lo = cpu.bus.read_byte(addr.wrapping_add(2))? as u32;
                        cpu.regs.d[dregister] = (cpu.regs.d[dregister] & 0xffff0000) | (hi << 8) | lo;
                        Ok(16)
                    }
                    5 => {
                        // Long from memory to register.
                        let mut value = 0u32;
                        for _ in 0..4 {
                            value = (value << 8) | cpu.bus.read_byte(addr)? as u32;
                            addr = addr.wrapping_add(2);
                        }
                        cpu.regs.d[dregister] = value;
                        Ok(24)
                    }
                    6 => {
                        let value = cpu.regs.d[dregister];
                        cpu.bus.write_byte(addr, (value >> 8) as u8)?;
                        cpu.bus.write_byte(addr.wrapping_add(2), value as u8)?;
                        Ok(16)
                    }
                    _ => {
                        let value = cpu.regs.d[dregister];
                        for j in 0..4 {
                            cpu.bus.write_byte(addr, (value >> (24 - 8 * j)) as u8)?;
                            addr = addr.wrapping_add(2);
                        }
                        Ok(24)
                    }
                }
            }
            Self::SCC { condition, mode, earegister } => {
                let ea = EAMode::from(Size::Byte, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let truth = condition.evaluate(cpu);
                if mode != 0 {
                    cpu.read_operand(op, Size::Byte)?;
                }
                cpu.write_operand(op, OpResult::Byte(if truth { 0xff } else { 0x00 }))?;
                Ok(if mode == 0 {
                    if truth {
                        6
                    } else {
                        4
                    }
                } else {
                    8 + ea_cycles(mode, earegister, Size::Byte)
                })
            }
            Self::ASLRREG { register, count, size, dr, ir }
            | Self::LSLRREG { register, count, size, dr, ir }
            | Self::ROXLR { register, count, size, dr, ir }
            | Self::ROLR { register, count, size, dr, ir } => {
                let kind = match self {
                    Self::ASLRREG { .. } => ShiftKind::Arithmetic,
                    Self::LSLRREG { .. } => ShiftKind::Logical,
                    Self::ROXLR { .. } => ShiftKind::RotateX,
                    _ => ShiftKind::Rotate,
                };
                let shift_count = if ir == 0 {
                    if count == 0 {
                        8
                    } else {
                        count as u32
                    }
                } else {
                    cpu.regs.d[count] % 64
                };
                let value = size.from(cpu.regs.d[register]);
                let result = shift_operation(cpu, value, shift_count, kind, dr == 1);
                cpu.write_operand(Operand::DataRegister(register), result)?;
                Ok(if size == Size::Long { 8 + 2 * shift_count } else { 6 + 2 * shift_count })
            }
            Self::MOVEQ { register, data } => {
                let result = data as u8 as i8 as i32 as u32;
                cpu.regs.d[register] = result;
                cpu.regs.n = result & 0x80000000 != 0;
                cpu.regs.z = result == 0;
                cpu.regs.v = false;
                cpu.regs.c = false;
                Ok(4)
            }
            Self::EXG { opmode, rx, ry } => {
                match opmode {
                    8 => cpu.regs.d.swap(rx, ry),
                    9 => cpu.regs.a.swap(rx, ry),
                    _ => {
                        let tmp = cpu.regs.d[rx];
                        cpu.regs.d[rx] = cpu.regs.a[ry];
                        cpu.regs.a[ry] = tmp;
                    }
                }
                Ok(6)
            }
            Self::CHK { register, mode, earegister } => {
                let ea = EAMode::from(Size::Word, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let bound = cpu.read_operand(op, Size::Word)?.sign_extend();
                let value = cpu.regs.d[register] as u16 as i16 as i32;
                if value < 0 || value > bound {
                    cpu.regs.n = value < 0;
                    exceptions::exception(cpu, 6, cpu.regs.instruction_pc, ExceptionSource::Cpu);
                    return Ok(4);
                }
                Ok(10 + ea_cycles(mode, earegister, Size::Word))
            }
            Self::MOVEA { register, size, mode, earegister } => {
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, size)?;
                cpu.regs.a[register] = value.sign_extend() as u32;
                Ok(4 + ea_cycles(mode, earegister, size))
            }
            Self::ADDQ { data, size, mode, earegister } | Self::SUBQ { data, size, mode, earegister } => {
                let subtract = matches!(self, Self::SUBQ { .. });
                let data = if data == 0 { 8 } else { data };
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                if mode == 1 {
                    // Address register target: full 32 bits, no flags.
                    let value = cpu.regs.a[earegister];
                    cpu.regs.a[earegister] = if subtract {
                        value.wrapping_sub(data as u32)
                    } else {
                        value.wrapping_add(data as u32)
                    };
                    return Ok(8);
                }
                let value = cpu.read_operand(op, size)?;
                let operand = size.from(data);
                let (result, ccr) = if subtract {
                    value.sub(operand, false)
                } else {
                    operand.add(value, false)
                };
                cpu.write_operand(op, result)?;
                ccr.set(cpu);
                let base = if mode == 0 {
                    if size == Size::Long {
                        8
                    } else {
                        4
                    }
                } else if size == Size::Long {
                    12
                } else {
                    8
                };
                Ok(base + ea_cycles(mode, earegister, size))
            }
            Self::ADD { register, opmode, mode, earegister }
            | Self::SUB { register, opmode, mode, earegister } => {
                let subtract = matches!(self, Self::SUB { .. });
                let size = opmode.size();
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let evalue = cpu.read_operand(op, size)?;
                let rvalue = size.from(cpu.regs.d[register]);
                match opmode {
                    OpMode::MemoryToRegister(_) => {
                        let (result, ccr) = if subtract {
                            rvalue.sub(evalue, false)
                        } else {
                            evalue.add(rvalue, false)
                        };
                        cpu.write_operand(Operand::DataRegister(register), result)?;
                        ccr.set(cpu);
                        Ok((if size == Size::Long { 6 } else { 4 }) + ea_cycles(mode, earegister, size))
                    }
                    OpMode::RegisterToMemory(_) => {
                        let (result, ccr) = if subtract {
                            evalue.sub(rvalue, false)
                        } else {
                            rvalue.add(evalue, false)
                        };
                        cpu.write_operand(op, result)?;
                        ccr.set(cpu);
                        Ok((if size == Size::Long { 12 } else { 8 }) + ea_cycles(mode, earegister, size))
                    }
                }
            }
            Self::ADDA { register, size, mode, earegister }
            | Self::SUBA { register, size, mode, earegister }
            | Self::CMPA { register, size, mode, earegister } => {
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let value = cpu.read_operand(op, size)?.sign_extend() as u32;
                match self {
                    Self::ADDA { .. } => {
                        cpu.regs.a[register] = cpu.regs.a[register].wrapping_add(value);
                        Ok((if size == Size::Long { 6 } else { 8 }) + ea_cycles(mode, earegister, size))
                    }
                    Self::SUBA { .. } => {
                        cpu.regs.a[register] = cpu.regs.a[register].wrapping_sub(value);
                        Ok((if size == Size::Long { 6 } else { 8 }) + ea_cycles(mode, earegister, size))
                    }
                    _ => {
                        let (_, mut ccr) =
                            OpResult::Long(cpu.regs.a[register]).sub(OpResult::Long(value), false);
                        ccr.x = None;
                        ccr.set(cpu);
                        Ok(6 + ea_cycles(mode, earegister, size))
                    }
                }
            }
            Self::AND { register, opmode, mode, earegister }
            | Self::OR { register, opmode, mode, earegister } => {
                let and = matches!(self, Self::AND { .. });
                let size = opmode.size();
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let evalue = cpu.read_operand(op, size)?;
                let rvalue = size.from(cpu.regs.d[register]);
                let (result, ccr) = if and { evalue.and(rvalue) } else { evalue.or(rvalue) };
                match opmode {
                    OpMode::MemoryToRegister(_) => {
                        cpu.write_operand(Operand::DataRegister(register), result)?;
                        ccr.set(cpu);
                        Ok((if size == Size::Long { 6 } else { 4 }) + ea_cycles(mode, earegister, size))
                    }
                    OpMode::RegisterToMemory(_) => {
                        cpu.write_operand(op, result)?;
                        ccr.set(cpu);
                        Ok((if size == Size::Long { 12 } else { 8 }) + ea_cycles(mode, earegister, size))
                    }
                }
            }
            Self::EOR { register, opmode, mode, earegister } => {
                let size = opmode.size();
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let evalue = cpu.read_operand(op, size)?;
                let rvalue = size.from(cpu.regs.d[register]);
                let (result, ccr) = evalue.xor(rvalue);
                cpu.write_operand(op, result)?;
                ccr.set(cpu);
                let base = if mode == 0 {
                    if size == Size::Long {
                        8
                    } else {
                        4
                    }
                } else if size == Size::Long {
                    12
                } else {
                    8
                };
                Ok(base + ea_cycles(mode, earegister, size))
            }
            Self::CMP { register, size, mode, earegister } => {
                let ea = EAMode::from(size, mode, earegister, cpu)?;
                let op = cpu.operand(ea);
                let evalue = cpu.read_operand(op, size)?;
                let rvalue = size.from(cpu.regs.d[register]);
                let (_, mut ccr) = rvalue.sub(evalue, false);
                ccr.x = None;
                ccr.set(cpu);
                Ok((if size == Size::Long { 6 } else { 4 }) + ea_cycles(mode, earegister, size))
            }
            Self::MOVE { size, destreg, destmode, srcmode, srcreg } => {
                let src_ea = EAMode::from(size, srcmode, srcreg, cpu)?;
                let src = cpu.operand(src_ea);
                let value = cpu.read_operand(src, size)?;
                let dest_ea = EAMode::from(size, destmode, destreg, cpu)?;
                let dest = cpu.operand(dest_ea);
                cpu.write_operand(dest, value)?;
                cpu.regs.n = value.msb();
                cpu.regs.z = value.inner() == 0;
                cpu.regs.v = false;
                cpu.regs.c = false;
                // Destination side costs the fetch time of its mode, with the
                // predecrement penalty waived.
                let dest_cost = match destmode {
                    4 => ea_cycles(3, destreg, size),
                    _ => ea_cycles(destmode, destreg, size),
                };
                Ok(4 + ea_cycles(srcmode, srcreg, size) + dest_cost)
            }
            Self::Intercept(kind) => crate::intercept::dispatch(cpu, kind),
        }
    }

    fn bit_operation(
        &self,
        cpu: &mut CPU,
        number: u32,
        mode: usize,
        earegister: usize,
        static_form: bool,
    ) -> Result<u32, Fault> {
        let ea = EAMode::from(Size::Byte, mode, earegister, cpu)?;
        let op = cpu.operand(ea);
        // Register operands are 32 bits wide, memory operands one byte.
        let (value, bit) = if mode == 0 {
            (cpu.regs.d[earegister], number % 32)
        } else {
            (cpu.read_operand(op, Size::Byte)?.inner(), number % 8)
        };
        let mask = 1u32 << bit;
        cpu.regs.z = value & mask == 0;
        let result = match self {
            Self::BCHG { .. } | Self::BCHGS { .. } => Some(value ^ mask),
            Self::BCLR { .. } | Self::BCLRS { .. } => Some(value & !mask),
            Self::BSET { .. } | Self::BSETS { .. } => Some(value | mask),
            _ => None,
        };
        if let Some(result) = result {
            if mode == 0 {
                cpu.regs.d[earegister] = result;
            } else {
                cpu.write_operand(op, OpResult::Byte(result as u8))?;
            }
        }
        let base = match self {
            Self::BTST { .. } | Self::BTSTS { .. } => {
                if mode == 0 {
                    6
                } else {
                    4
                }
            }
            Self::BCLR { .. } | Self::BCLRS { .. } => {
                if mode == 0 {
                    10
                } else {
                    8
                }
            }
            _ => 8,
        };
        Ok(base + (if static_form { 4 } else { 0 }) + ea_cycles(mode, earegister, Size::Byte))
    }

    // Total length in words, for the disassembler.
    pub fn length(&self, _opcode: u16) -> usize {
        1 + match *self {
            Self::ANDICCR | Self::ANDISR | Self::EORICCR | Self::EORISR | Self::ORICCR
            | Self::ORISR | Self::STOP | Self::RTD => 1,
            Self::LINK { .. } | Self::DBCC { .. } | Self::MOVEP { .. } | Self::MOVEC { .. } => 1,
            Self::BCHGS { mode, earegister }
            | Self::BCLRS { mode, earegister }
            | Self::BSETS { mode, earegister }
            | Self::BTSTS { mode, earegister } => 1 + ea_words(mode, earegister, Size::Byte),
            Self::MOVEM { size, mode, earegister, .. } => 1 + ea_words(mode, earegister, size),
            Self::ADDI { size, mode, earegister }
            | Self::ANDI { size, mode, earegister }
            | Self::CMPI { size, mode, earegister }
            | Self::EORI { size, mode, earegister }
            | Self::ORI { size, mode, earegister }
            | Self::SUBI { size, mode, earegister } => {
                (if size == Size::Long { 2 } else { 1 }) + ea_words(mode, earegister, size)
            }
            Self::BRA { displacement } | Self::BSR { displacement } | Self::BCC { displacement, .. } => {
                if displacement == 0 {
                    1
                } else {
                    0
                }
            }
            Self::CLR { size, mode, earegister }
            | Self::NEG { size, mode, earegister }
            | Self::NEGX { size, mode, earegister }
            | Self::NOT { size, mode, earegister }
            | Self::TST { size, mode, earegister } => ea_words(mode, earegister, size),
            Self::MOVEA { size, mode, earegister, .. } => ea_words(mode, earegister, size),
            Self::ADDQ { size, mode, earegister, .. } | Self::SUBQ { size, mode, earegister, .. } => {
                ea_words(mode, earegister, size)
            }
            Self::ADD { opmode, mode, earegister, .. }
            | Self::AND { opmode, mode, earegister, .. }
            | Self::EOR { opmode, mode, earegister, .. }
            | Self::OR { opmode, mode, earegister, .. }
            | Self::SUB { opmode, mode, earegister, .. } => ea_words(mode, earegister, opmode.size()),
            Self::CMP { size, mode, earegister, .. }
            | Self::CMPA { size, mode, earegister, .. }
            | Self::ADDA { size, mode, earegister, .. }
            | Self::SUBA { size, mode, earegister, .. } => ea_words(mode, earegister, size),
            Self::JMP { mode, earegister }
            | Self::JSR { mode, earegister }
            | Self::PEA { mode, earegister }
            | Self::TAS { mode, earegister }
            | Self::NBCD { mode, earegister }
            | Self::MOVETOCCR { mode, earegister }
            | Self::MOVEFROMSR { mode, earegister }
            | Self::MOVETOSR { mode, earegister }
            | Self::ASLRMEM { mode, earegister, .. }
            | Self::LSLRMEM { mode, earegister, .. }
            | Self::ROXLRMEM { mode, earegister, .. }
            | Self::ROLRMEM { mode, earegister, .. }
            | Self::SCC { mode, earegister, .. } => ea_words(mode, earegister, Size::Word),
            Self::BCHG { mode, earegister, .. }
            | Self::BCLR { mode, earegister, .. }
            | Self::BSET { mode, earegister, .. }
            | Self::BTST { mode, earegister, .. } => ea_words(mode, earegister, Size::Byte),
            Self::DIVS { mode, earegister, .. }
            | Self::DIVU { mode, earegister, .. }
            | Self::MULS { mode, earegister, .. }
            | Self::MULU { mode, earegister, .. }
            | Self::CHK { mode, earegister, .. }
            | Self::LEA { mode, earegister, .. } => ea_words(mode, earegister, Size::Word),
            Self::MOVE { size, destmode, destreg, srcmode, srcreg } => {
                ea_words(srcmode, srcreg, size) + ea_words(destmode, destreg, size)
            }
            _ => 0,
        }
    }

    pub fn as_asm(&self) -> String {
        match *self {
            Self::ANDICCR => String::from("andi ccr"),
            Self::ANDISR => String::from("andi sr"),
            Self::EORICCR => String::from("eori ccr"),
            Self::EORISR => String::from("eori sr"),
            Self::ILLEGAL => String::from("illegal"),
            Self::NOP => String::from("nop"),
            Self::ORICCR => String::from("ori ccr"),
            Self::ORISR => String::from("ori sr"),
            Self::RESET => String::from("reset"),
            Self::RTE => String::from("rte"),
            Self::RTR => String::from("rtr"),
            Self::RTS => String::from("rts"),
            Self::RTD => String::from("rtd"),
            Self::STOP => String::from("stop"),
            Self::TRAPV => String::from("trapv"),
            Self::LINK { register } => format!("link a{}", register),
            Self::SWAP { register } => format!("swap d{}", register),
            Self::UNLK { register } => format!("unlk a{}", register),
            Self::TRAP { vector } => format!("trap #{}", vector),
            Self::MOVEUSP { register, dr } => {
                if dr == 0 {
                    format!("move a{},usp", register)
                } else {
                    format!("move usp,a{}", register)
                }
            }
            Self::MOVEC { dr } => {
                if dr == 0 {
                    String::from("movec cr,r")
                } else {
                    String::from("movec r,cr")
                }
            }
            Self::BCHGS { .. } => String::from("bchg #"),
            Self::BCLRS { .. } => String::from("bclr #"),
            Self::BSETS { .. } => String::from("bset #"),
            Self::BTSTS { .. } => String::from("btst #"),
            Self::JMP { .. } => String::from("jmp"),
            Self::JSR { .. } => String::from("jsr"),
            Self::MOVETOCCR { .. } => String::from("move ccr"),
            Self::MOVEFROMSR { .. } => String::from("move sr,ea"),
            Self::MOVETOSR { .. } => String::from("move ea,sr"),
            Self::PEA { .. } => String::from("pea"),
            Self::TAS { .. } => String::from("tas"),
            Self::NBCD { .. } => String::from("nbcd"),
            Self::EXT { opmode, register } => {
                format!("ext.{} d{}", if opmode == 2 { "w" } else { "l" }, register)
            }
            Self::ASLRMEM { dr, .. } => format!("as{} mem", if dr == 1 { "l" } else { "r" }),
            Self::LSLRMEM { dr, .. } => format!("ls{} mem", if dr == 1 { "l" } else { "r" }),
            Self::ROXLRMEM { dr, .. } => format!("rox{} mem", if dr == 1 { "l" } else { "r" }),
            Self::ROLRMEM { dr, .. } => format!("ro{} mem", if dr == 1 { "l" } else { "r" }),
            Self::DBCC { condition, register } => format!("db{} d{}", condition, register),
            Self::MOVEM { size, dr, .. } => {
                format!("movem.{} {}", size, if dr == 0 { "regs,ea" } else { "ea,regs" })
            }
            Self::ABCD { rx, ry, .. } => format!("abcd {},{}", ry, rx),
            Self::SBCD { rx, ry, .. } => format!("sbcd {},{}", ry, rx),
            Self::ADDI { size, .. } => format!("addi.{}", size),
            Self::ANDI { size, .. } => format!("andi.{}", size),
            Self::CLR { size, .. } => format!("clr.{}", size),
            Self::CMPI { size, .. } => format!("cmpi.{}", size),
            Self::EORI { size, .. } => format!("eori.{}", size),
            Self::NEG { size, .. } => format!("neg.{}", size),
            Self::NEGX { size, .. } => format!("negx.{}", size),
            Self::NOT { size, .. } => format!("not.{}", size),
            Self::ORI { size, .. } => format!("ori.{}", size),
            Self::SUBI { size, .. } => format!("subi.{}", size),
            Self::TST { size, .. } => format!("tst.{}", size),
            Self::BRA { .. } => String::from("bra"),
            Self::BSR { .. } => String::from("bsr"),
            Self::CMPM { ax, ay, size } => format!("cmpm.{} (a{})+,(a{})+", size, ay, ax),
            Self::ADDX { size, .. } => format!("addx.{}", size),
            Self::SUBX { size, .. } => format!("subx.{}", size),
            Self::BCHG { register, .. } => format!("bchg d{}", register),
            Self::BCLR { register, .. } => format!("bclr d{}", register),
            Self::BSET { register, .. } => format!("bset d{}", register),
            Self::BTST { register, .. } => format!("btst d{}", register),
            Self::DIVS { register, .. } => format!("divs d{}", register),
            Self::DIVU { register, .. } => format!("divu d{}", register),
            Self::LEA { register, .. } => format!("lea a{}", register),
            Self::MULS { register, .. } => format!("muls d{}", register),
            Self::MULU { register, .. } => format!("mulu d{}", register),
            Self::MOVEP { dregister, aregister, .. } => format!("movep d{},a{}", dregister, aregister),
            Self::SCC { condition, .. } => format!("s{}", condition),
            Self::ASLRREG { register, dr, .. } => {
                format!("as{} d{}", if dr == 1 { "l" } else { "r" }, register)
            }
            Self::LSLRREG { register, dr, .. } => {
                format!("ls{} d{}", if dr == 1 { "l" } else { "r" }, register)
            }
            Self::ROXLR { register, dr, .. } => {
                format!("rox{} d{}", if dr == 1 { "l" } else { "r" }, register)
            }
            Self::ROLR { register, dr, .. } => {
                format!("ro{} d{}", if dr == 1 { "l" } else { "r" }, register)
            }
            Self::MOVEQ { register, data } => format!("moveq #{},d{}", data as u8 as i8, register),
            Self::EXG { rx, ry, .. } => format!("exg {},{}", rx, ry),
            Self::CHK { register, .. } => format!("chk d{}", register),
            Self::MOVEA { register, size, .. } => format!("movea.{} a{}", size, register),
            Self::ADDQ { data, size, .. } => format!("addq.{} #{}", size, if data == 0 { 8 } else { data }),
            Self::SUBQ { data, size, .. } => format!("subq.{} #{}", size, if data == 0 { 8 } else { data }),
            Self::BCC { condition, .. } => format!("b{}", condition),
            Self::ADD { register, .. } => format!("add d{}", register),
            Self::ADDA { register, size, .. } => format!("adda.{} a{}", size, register),
            Self::SUBA { register, size, .. } => format!("suba.{} a{}", size, register),
            Self::AND { register, .. } => format!("and d{}", register),
            Self::CMP { register, .. } => format!("cmp d{}", register),
            Self::CMPA { register, size, .. } => format!("cmpa.{} a{}", size, register),
            Self::EOR { register, .. } => format!("eor d{}", register),
            Self::OR { register, .. } => format!("or d{}", register),
            Self::SUB { register, .. } => format!("sub d{}", register),
            Self::MOVE { size, .. } => format!("move.{}", size),
            Self::Intercept(kind) => format!("host-call {:?}", kind),
        }
    }
}
