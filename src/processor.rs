// This is the place for the basic processor implementation: the register file with
// its three shadow stack pointers, the step loop, the specialty handling (STOP,
// trace, pending interrupts, bus errors) and the interactive debugger. Addressing
// is resolved in CPU::operand(); the per-opcode semantics live in instructions.rs.

use crate::devices::Signal;
use crate::events::{EventKind, EventQueue};
use crate::exceptions::{self, ExceptionSource};
use crate::fields::{EAMode, OpResult, Size};
use crate::instructions::Instruction;
use crate::memory::{Bus, Fault};
use bitflags::bitflags;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::io;
use std::io::prelude::*;
use termion::{clear, color, cursor};

// ST-style video timing at 8 MHz; the event queue reschedules these each firing.
pub const CYCLES_PER_HBL: u64 = 512;
pub const CYCLES_PER_VBL: u64 = 160256;

bitflags! {
    pub struct Specialties: u32 {
        const STOP         = 0x0001;
        const TRACE        = 0x0002;
        const DOTRACE      = 0x0004;
        const INT          = 0x0008;
        const DOINT        = 0x0010;
        const MFP          = 0x0020;
        const DSP          = 0x0040;
        const BUSERROR     = 0x0080;
        const EXTRA_CYCLES = 0x0100;
        const BRK          = 0x0200;
        const MODE_CHANGE  = 0x0400;
        const DEBUGGER     = 0x0800;
    }
}

#[derive(Copy, Clone, Debug)]
pub struct IRQ {
    pub level: u32,
    pub vector: Option<u16>,
}

#[derive(Debug)]
pub struct CCRFlags {
    pub c: Option<bool>,
    pub v: Option<bool>,
    pub z: Option<bool>,
    pub n: Option<bool>,
    pub x: Option<bool>,
}

impl CCRFlags {
    pub fn new() -> CCRFlags {
        CCRFlags { c: None, v: None, z: None, n: None, x: None }
    }
    pub fn set(&self, cpu: &mut CPU) {
        if let Some(value) = self.c {
            cpu.regs.c = value;
        }
        if let Some(value) = self.v {
            cpu.regs.v = value;
        }
        if let Some(value) = self.z {
            cpu.regs.z = value;
        }
        if let Some(value) = self.n {
            cpu.regs.n = value;
        }
        if let Some(value) = self.x {
            cpu.regs.x = value;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterruptSource {
    Hbl,
    Vbl,
    Mfp(u16),
    DspHreq,
}

// Fault bookkeeping for the group-0 exception frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultInfo {
    pub fault_address: u32,
    pub opcode: u16,
    pub read: bool,
    pub instruction_access: bool,
    pub last_addr: u32,
}

pub struct Regs {
    pub d: [u32; 8],
    // a[7] always aliases the stack pointer selected by (s, m); the other two
    // live in their shadow slots below.
    pub a: [u32; 8],
    pub usp: u32,
    pub isp: u32,
    pub msp: u32,
    pub pc: u32,
    pub instruction_pc: u32,
    pub opcode: u16,
    pub sr: u16,
    pub t1: bool,
    pub t0: bool,
    pub s: bool,
    pub m: bool,
    pub intmask: u32,
    // Shadow condition codes, recombined into sr only by make_sr().
    pub x: bool,
    pub n: bool,
    pub z: bool,
    pub v: bool,
    pub c: bool,
    pub vbr: u32,
    pub sfc: u32,
    pub dfc: u32,
    pub cacr: u32,
    pub caar: u32,
    pub tc: u32,
    pub itt0: u32,
    pub itt1: u32,
    pub dtt0: u32,
    pub dtt1: u32,
    pub mmusr: u32,
    pub urp: u32,
    pub srp: u32,
    pub prefetch: u32,
    pub prefetch_pc: u32,
    pub stopped: bool,
    pub spcflags: Specialties,
}

impl Regs {
    pub fn new() -> Self {
        Regs {
            d: [0; 8],
            a: [0; 8],
            usp: 0,
            isp: 0,
            msp: 0,
            pc: 0,
            instruction_pc: 0,
            opcode: 0,
            sr: 0x2700,
            t1: false,
            t0: false,
            s: true,
            m: false,
            intmask: 7,
            x: false,
            n: false,
            z: false,
            v: false,
            c: false,
            vbr: 0,
            sfc: 0,
            dfc: 0,
            cacr: 0,
            caar: 0,
            tc: 0,
            itt0: 0,
            itt1: 0,
            dtt0: 0,
            dtt1: 0,
            mmusr: 0,
            urp: 0,
            srp: 0,
            prefetch: 0,
            prefetch_pc: 1,
            stopped: false,
            spcflags: Specialties::empty(),
        }
    }

    // Create the status register from the flags.
    pub fn make_sr(&mut self) -> u16 {
        self.sr = ((self.t1 as u16) << 15)
            | ((self.t0 as u16) << 14)
            | ((self.s as u16) << 13)
            | ((self.m as u16) << 12)
            | ((self.intmask as u16) << 8)
            | ((self.x as u16) << 4)
            | ((self.n as u16) << 3)
            | ((self.z as u16) << 2)
            | ((self.v as u16) << 1)
            | self.c as u16;
        self.sr
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Operand {
    DataRegister(usize),
    AddressRegister(usize),
    Memory(u32),
    Immediate(OpResult),
}

pub struct Pending {
    pub hbl: bool,
    pub vbl: bool,
    pub mfp_vector: Option<u16>,
}

pub struct CPU {
    pub regs: Regs,
    pub bus: Bus,
    pub events: EventQueue,
    pub pending: Pending,
    pub decode: Vec<Option<Instruction>>,
    pub level: u8,
    pub compatible: bool,
    pub cycles: u64,
    pub fault_info: FaultInfo,
    pub halted: bool,
    pub last_trace_pc: u32,
    pub wait_state_cycles: i32,
    pub jitter_index: usize,
    pub prev_pairable: bool,
    pub intercept: crate::intercept::Intercept,
}

impl CPU {
    pub fn new(bus: Bus, level: u8, compatible: bool) -> Self {
        CPU {
            regs: Regs::new(),
            bus,
            events: EventQueue::new(),
            pending: Pending { hbl: false, vbl: false, mfp_vector: None },
            decode: crate::parser::build_decode_table(level),
            level,
            compatible,
            cycles: 0,
            fault_info: FaultInfo::default(),
            halted: false,
            last_trace_pc: 0,
            wait_state_cycles: 0,
            jitter_index: 0,
            prev_pairable: false,
            intercept: crate::intercept::Intercept::new(),
        }
    }

    // ---- reset ----

    pub fn reset(&mut self, cold: bool) {
        if cold {
            for b in self.bus.ram.iter_mut() {
                *b = 0;
            }
        }
        self.regs.s = true;
        self.regs.m = false;
        self.regs.stopped = false;
        self.regs.t1 = false;
        self.regs.t0 = false;
        self.regs.x = false;
        self.regs.n = false;
        self.regs.z = false;
        self.regs.v = false;
        self.regs.c = false;
        self.regs.spcflags &= Specialties::MODE_CHANGE | Specialties::DEBUGGER;
        self.regs.intmask = 7;
        self.regs.vbr = 0;
        self.regs.sfc = 0;
        self.regs.dfc = 0;
        self.halted = false;
        self.pending = Pending { hbl: false, vbl: false, mfp_vector: None };
        self.events.clear();
        self.events.schedule(self.cycles + CYCLES_PER_HBL, EventKind::Hbl);
        self.events.schedule(self.cycles + CYCLES_PER_VBL, EventKind::Vbl);
        self.bus.dsp.reset();

        // The reset vectors come out of ROM; mirror them at 0 like the glue
        // logic does.
        if self.bus.rom.len() >= 8 {
            for j in 0..8 {
                self.bus.ram[j] = self.bus.rom[j];
            }
        }

        self.regs.a[7] = self.bus.peek_long(0);
        self.regs.isp = self.regs.a[7];
        self.regs.pc = self.bus.peek_long(4);
        self.refill_prefetch(self.regs.pc);
    }

    // ---- status register ----

    pub fn make_sr(&mut self) -> u16 {
        self.regs.make_sr()
    }

    // Set up the flags from the status register, resynchronizing the stack
    // pointer aliases when (s, m) change.
    pub fn make_from_sr(&mut self) {
        let oldm = self.regs.m;
        let olds = self.regs.s;
        let sr = self.regs.sr;

        self.regs.t1 = sr >> 15 & 1 != 0;
        self.regs.t0 = sr >> 14 & 1 != 0;
        self.regs.s = sr >> 13 & 1 != 0;
        self.regs.m = sr >> 12 & 1 != 0;
        self.regs.intmask = (sr >> 8 & 7) as u32;
        self.regs.x = sr >> 4 & 1 != 0;
        self.regs.n = sr >> 3 & 1 != 0;
        self.regs.z = sr >> 2 & 1 != 0;
        self.regs.v = sr >> 1 & 1 != 0;
        self.regs.c = sr & 1 != 0;

        if self.level >= 2 {
            if olds != self.regs.s {
                if olds {
                    if oldm {
                        self.regs.msp = self.regs.a[7];
                    } else {
                        self.regs.isp = self.regs.a[7];
                    }
                    self.regs.a[7] = self.regs.usp;
                } else {
                    self.regs.usp = self.regs.a[7];
                    self.regs.a[7] = if self.regs.m { self.regs.msp } else { self.regs.isp };
                }
            } else if olds && oldm != self.regs.m {
                if oldm {
                    self.regs.msp = self.regs.a[7];
                    self.regs.a[7] = self.regs.isp;
                } else {
                    self.regs.isp = self.regs.a[7];
                    self.regs.a[7] = self.regs.msp;
                }
            }
        } else {
            // Below 68020, m and t0 read as zero.
            self.regs.t0 = false;
            self.regs.m = false;
            if olds != self.regs.s {
                if olds {
                    self.regs.isp = self.regs.a[7];
                    self.regs.a[7] = self.regs.usp;
                } else {
                    self.regs.usp = self.regs.a[7];
                    self.regs.a[7] = self.regs.isp;
                }
            }
        }

        // Pending interrupts can occur again after a write to the SR.
        self.regs.spcflags.insert(Specialties::DOINT);
        if self.regs.t1 || self.regs.t0 {
            self.regs.spcflags.insert(Specialties::TRACE);
        } else {
            // Keep DOTRACE: SR-modifying instructions still trace once.
            self.regs.spcflags.remove(Specialties::TRACE);
        }
    }

    pub fn set_sr(&mut self, value: u16) {
        self.regs.sr = value;
        self.make_from_sr();
    }

    pub fn in_supervisor_mode(&self) -> bool {
        self.regs.s
    }

    // ---- memory access with alignment and fault bookkeeping ----

    fn check_alignment(&mut self, address: u32, size: Size, read: bool) -> Result<(), Fault> {
        if size != Size::Byte && address & 1 != 0 && self.level < 2 {
            self.fault_info.last_addr = address;
            return Err(Fault::Address { address, read });
        }
        Ok(())
    }

    pub fn read(&mut self, address: u32, size: Size) -> Result<OpResult, Fault> {
        self.check_alignment(address, size, true)?;
        Ok(match size {
            Size::Byte => OpResult::Byte(self.bus.read_byte(address)?),
            Size::Word => OpResult::Word(self.bus.read_word(address)?),
            Size::Long => OpResult::Long(self.bus.read_long(address)?),
        })
    }

    pub fn write(&mut self, address: u32, value: OpResult) -> Result<(), Fault> {
        self.check_alignment(address, value.size(), false)?;
        match value {
            OpResult::Byte(b) => self.bus.write_byte(address, b),
            OpResult::Word(w) => self.bus.write_word(address, w),
            OpResult::Long(l) => self.bus.write_long(address, l),
        }
    }

    // ---- instruction stream ----

    pub fn refill_prefetch(&mut self, pc: u32) {
        let hi = self.bus.peek_word(pc);
        let lo = self.bus.peek_word(pc.wrapping_add(2));
        self.regs.prefetch = (hi as u32) << 16 | lo as u32;
        self.regs.prefetch_pc = pc;
    }

    fn fetch_opcode(&mut self) -> Result<u16, Fault> {
        let pc = self.regs.pc;
        if pc & 1 != 0 {
            self.fault_info.instruction_access = true;
            self.fault_info.last_addr = pc;
            return Err(Fault::Address { address: pc, read: true });
        }
        if self.compatible {
            if pc != self.regs.prefetch_pc {
                // A fetch outside the queue goes to the bus and may fault.
                self.bus.read_word(pc).map_err(|f| {
                    self.fault_info.instruction_access = true;
                    f
                })?;
                self.refill_prefetch(pc);
            }
            let op = (self.regs.prefetch >> 16) as u16;
            let next = self.bus.peek_word(pc.wrapping_add(4));
            self.regs.prefetch = (self.regs.prefetch << 16) | next as u32;
            self.regs.prefetch_pc = pc.wrapping_add(2);
            self.regs.pc = pc.wrapping_add(2);
            Ok(op)
        } else {
            let op = self.bus.read_word(pc).map_err(|f| {
                self.fault_info.instruction_access = true;
                f
            })?;
            self.regs.pc = pc.wrapping_add(2);
            Ok(op)
        }
    }

    // Fetch the next extension word of the current instruction.
    pub fn next_word(&mut self) -> Result<u16, Fault> {
        let pc = self.regs.pc;
        let word = self.bus.read_word(pc).map_err(|f| {
            self.fault_info.instruction_access = true;
            f
        })?;
        self.regs.pc = pc.wrapping_add(2);
        Ok(word)
    }

    pub fn immediate_operand(&mut self, size: Size) -> Result<OpResult, Fault> {
        let extword = self.next_word()?;
        Ok(match size {
            Size::Byte => OpResult::Byte((extword & 0xff) as u8),
            Size::Word => OpResult::Word(extword),
            Size::Long => {
                let extword2 = self.next_word()?;
                OpResult::Long(((extword as u32) << 16) | extword2 as u32)
            }
        })
    }

    // ---- effective addresses ----

    // Resolve an EAMode to an operand, applying pre/post register updates.
    pub fn operand(&mut self, mode: EAMode) -> Operand {
        match mode {
            EAMode::DataDirect(register) => Operand::DataRegister(register),
            EAMode::AddressDirect(register) => Operand::AddressRegister(register),
            EAMode::AddressIndirect(register) => Operand::Memory(self.regs.a[register]),
            EAMode::AddressPostincr(register, size) => {
                let ptr = self.regs.a[register];
                let step = if register == 7 && size == Size::Byte { 2 } else { size as u32 };
                self.regs.a[register] = ptr.wrapping_add(step);
                Operand::Memory(ptr)
            }
            EAMode::AddressPredecr(register, size) => {
                let step = if register == 7 && size == Size::Byte { 2 } else { size as u32 };
                self.regs.a[register] = self.regs.a[register].wrapping_sub(step);
                Operand::Memory(self.regs.a[register])
            }
            EAMode::Immediate(data) => Operand::Immediate(data),
            _ => Operand::Memory(self.address_of(mode)),
        }
    }

    // Address computation for the modes without register side effects; also the
    // LEA/PEA/JMP/JSR entry point.
    pub fn address_of(&mut self, mode: EAMode) -> u32 {
        match mode {
            EAMode::AddressIndirect(register) => self.regs.a[register],
            EAMode::AddressDisplacement(register, displacement) => {
                (self.regs.a[register] as i32).wrapping_add(displacement as i32) as u32
            }
            EAMode::AddressIndex8Bit(register, iregister, displacement, size, scale, da) => {
                let mut ptr = self.index_value(iregister, size, da);
                ptr = ptr.wrapping_mul(1 << scale);
                ptr = ptr.wrapping_add(displacement as i32);
                ptr = ptr.wrapping_add(self.regs.a[register] as i32);
                ptr as u32
            }
            EAMode::AbsoluteShort(ptr) => ptr,
            EAMode::AbsoluteLong(ptr) => ptr,
            EAMode::PCDisplacement(displacement, pc) => {
                (pc as i32).wrapping_add(displacement as i32) as u32
            }
            EAMode::PCIndex8Bit(iregister, displacement, size, scale, da, pc) => {
                let mut ptr = self.index_value(iregister, size, da);
                ptr = ptr.wrapping_mul(1 << scale);
                ptr = ptr.wrapping_add(displacement as i32);
                ptr = ptr.wrapping_add(pc as i32);
                ptr as u32
            }
            _ => panic!("Invalid addressing mode!"),
        }
    }

    fn index_value(&self, iregister: usize, size: Size, da: usize) -> i32 {
        let raw = if da == 0 { self.regs.d[iregister] } else { self.regs.a[iregister] };
        match size {
            Size::Word => raw as u16 as i16 as i32,
            _ => raw as i32,
        }
    }

    pub fn read_operand(&mut self, operand: Operand, size: Size) -> Result<OpResult, Fault> {
        match operand {
            Operand::DataRegister(register) => Ok(size.from(self.regs.d[register])),
            Operand::AddressRegister(register) => Ok(size.from(self.regs.a[register])),
            Operand::Memory(address) => self.read(address, size),
            Operand::Immediate(data) => Ok(data),
        }
    }

    pub fn write_operand(&mut self, operand: Operand, value: OpResult) -> Result<(), Fault> {
        match operand {
            Operand::DataRegister(register) => {
                let reg = &mut self.regs.d[register];
                match value {
                    OpResult::Byte(b) => *reg = (*reg & 0xffffff00) | b as u32,
                    OpResult::Word(w) => *reg = (*reg & 0xffff0000) | w as u32,
                    OpResult::Long(l) => *reg = l,
                }
                Ok(())
            }
            Operand::AddressRegister(register) => {
                // Writes to an address register are always 32 bits, sign extended.
                self.regs.a[register] = value.sign_extend() as u32;
                Ok(())
            }
            Operand::Memory(address) => self.write(address, value),
            Operand::Immediate(_) => Ok(()),
        }
    }

    // ---- supervisor stack ----

    pub fn push_long(&mut self, value: u32) -> Result<(), Fault> {
        self.regs.a[7] = self.regs.a[7].wrapping_sub(4);
        let addr = self.regs.a[7];
        self.bus.write_long(addr, value)
    }

    pub fn push_word(&mut self, value: u16) -> Result<(), Fault> {
        self.regs.a[7] = self.regs.a[7].wrapping_sub(2);
        let addr = self.regs.a[7];
        self.bus.write_word(addr, value)
    }

    pub fn pop_long(&mut self) -> Result<u32, Fault> {
        let value = self.bus.read_long(self.regs.a[7])?;
        self.regs.a[7] = self.regs.a[7].wrapping_add(4);
        Ok(value)
    }

    pub fn pop_word(&mut self) -> Result<u16, Fault> {
        let value = self.bus.read_word(self.regs.a[7])?;
        self.regs.a[7] = self.regs.a[7].wrapping_add(2);
        Ok(value)
    }

    // ---- the step loop ----

    pub fn step(&mut self) -> Signal {
        if self.halted {
            return Signal::Quit;
        }
        let cycles_before = self.cycles;

        self.regs.instruction_pc = self.regs.pc;
        self.fault_info.instruction_access = false;

        let opcode = match self.fetch_opcode() {
            Ok(op) => op,
            Err(fault) => {
                self.handle_fault(fault);
                if !self.regs.spcflags.is_empty() && self.do_specialties() {
                    return Signal::Quit;
                }
                return Signal::Ok;
            }
        };
        self.regs.opcode = opcode;

        let cycles = match self.dispatch(opcode) {
            Ok(cycles) => cycles,
            Err(fault) => {
                self.handle_fault(fault);
                0
            }
        };

        self.add_cycles_with_pairing(cycles, opcode);

        if self.bus.wait_states != 0 {
            self.wait_state_cycles += self.bus.wait_states;
            self.bus.wait_states = 0;
            self.regs.spcflags.insert(Specialties::EXTRA_CYCLES);
        }

        // Several events may be due at once; they all fire before the next
        // instruction, unless the CPU just entered STOP.
        if !self.regs.spcflags.contains(Specialties::STOP) {
            self.service_events();
        }

        if !self.regs.spcflags.is_empty() {
            if self.do_specialties() {
                return Signal::Quit;
            }
        }

        // Run DSP code for the cycles this instruction took.
        let spent = (self.cycles - cycles_before) as u32;
        self.bus.dsp.run(spent);
        if self.bus.dsp.process_irq().is_some() {
            self.regs.spcflags.insert(Specialties::DSP);
        } else {
            self.regs.spcflags.remove(Specialties::DSP);
        }

        Signal::Ok
    }

    fn dispatch(&mut self, opcode: u16) -> Result<u32, Fault> {
        match self.decode[opcode as usize] {
            Some(instruction) => instruction.execute(self),
            None => Ok(self.op_illg(opcode)),
        }
    }

    pub fn op_illg(&mut self, opcode: u16) -> u32 {
        if opcode & 0xf000 == 0xf000 {
            exceptions::exception(self, 11, 0, ExceptionSource::Cpu);
        } else if opcode & 0xf000 == 0xa000 {
            exceptions::exception(self, 10, 0, ExceptionSource::Cpu);
        } else {
            self.debugger_break("illegal instruction");
            exceptions::exception(self, 4, 0, ExceptionSource::Cpu);
        }
        4
    }

    // Hook for an attached debugger; fires on bus/address errors and illegal
    // instructions.
    pub fn debugger_break(&mut self, reason: &str) {
        if self.regs.spcflags.contains(Specialties::DEBUGGER) {
            log::warn!("debugger break: {} at ${:06x}", reason, self.regs.instruction_pc);
        } else {
            log::debug!("{} at ${:06x}", reason, self.regs.instruction_pc);
        }
    }

    fn handle_fault(&mut self, fault: Fault) {
        self.fault_info.fault_address = fault.address();
        self.fault_info.read = fault.is_read();
        self.fault_info.opcode = self.regs.opcode;
        self.fault_info.last_addr = self.regs.pc;
        match fault {
            Fault::Bus { .. } => {
                // The exception runs between instructions so the stacked PC
                // points past the faulting instruction.
                if self.regs.spcflags.contains(Specialties::BUSERROR) {
                    log::error!(
                        "double bus error at ${:06x}, PC=${:06x} => CPU halted",
                        self.fault_info.fault_address,
                        self.regs.pc
                    );
                    self.halted = true;
                    return;
                }
                self.regs.spcflags.insert(Specialties::BUSERROR);
            }
            Fault::Address { .. } => {
                exceptions::exception(self, 3, 0, ExceptionSource::Cpu);
            }
        }
    }

    fn add_cycles_with_pairing(&mut self, cycles: u32, opcode: u16) {
        let mut cycles = cycles as i64;
        // 68000 prefetch overlap: a register-only ALU instruction directly after
        // a multiply or a register shift finishes two cycles early.
        let ea_mode = (opcode >> 3) & 7;
        let pairs_second = ea_mode == 0 && matches!(opcode >> 12, 0x8 | 0x9 | 0xb | 0xc | 0xd);
        if self.level == 0 && self.prev_pairable && pairs_second && cycles > 4 {
            cycles -= 2;
        }
        self.prev_pairable = opcode & 0xf1c0 == 0xc0c0
            || opcode & 0xf1c0 == 0xc1c0
            || (opcode & 0xf000 == 0xe000 && opcode & 0x00c0 != 0x00c0);
        self.cycles += cycles.max(0) as u64;
    }

    pub fn add_cycles(&mut self, cycles: u32) {
        self.cycles += cycles as u64;
    }

    // ---- scheduled events ----

    pub fn service_events(&mut self) {
        while let Some(kind) = self.events.pop_due(self.cycles) {
            match kind {
                EventKind::Hbl => {
                    self.set_pending_interrupt(InterruptSource::Hbl, true);
                    self.events.schedule(self.cycles + CYCLES_PER_HBL, EventKind::Hbl);
                }
                EventKind::Vbl => {
                    self.set_pending_interrupt(InterruptSource::Vbl, true);
                    self.events.schedule(self.cycles + CYCLES_PER_VBL, EventKind::Vbl);
                }
                EventKind::DeviceTick(index) => {
                    let irq = self
                        .bus
                        .devices
                        .get_mut(index)
                        .and_then(|(_, device)| device.interrupt_request());
                    if let Some(irq) = irq {
                        let source = match irq.level {
                            6 => InterruptSource::Mfp(irq.vector.unwrap_or(0x40)),
                            4 => InterruptSource::Vbl,
                            _ => InterruptSource::Hbl,
                        };
                        self.set_pending_interrupt(source, true);
                    }
                }
            }
        }
    }

    pub fn set_pending_interrupt(&mut self, source: InterruptSource, pending: bool) {
        match source {
            InterruptSource::Hbl => {
                self.pending.hbl = pending;
                if pending {
                    self.regs.spcflags.insert(Specialties::INT);
                }
            }
            InterruptSource::Vbl => {
                self.pending.vbl = pending;
                if pending {
                    self.regs.spcflags.insert(Specialties::INT);
                }
            }
            InterruptSource::Mfp(vector) => {
                if pending {
                    self.pending.mfp_vector = Some(vector);
                    self.regs.spcflags.insert(Specialties::MFP);
                } else {
                    self.pending.mfp_vector = None;
                    self.regs.spcflags.remove(Specialties::MFP);
                }
            }
            InterruptSource::DspHreq => {
                if pending {
                    self.regs.spcflags.insert(Specialties::DSP);
                } else {
                    self.regs.spcflags.remove(Specialties::DSP);
                }
            }
        }
    }

    // Highest pending autovector level.
    pub fn intlev(&self) -> i32 {
        if self.pending.vbl {
            4
        } else if self.pending.hbl {
            2
        } else {
            -1
        }
    }

    pub fn request_stop(&mut self) {
        self.regs.stopped = true;
        self.regs.spcflags.insert(Specialties::STOP);
    }

    pub fn request_break(&mut self) {
        self.regs.spcflags.insert(Specialties::BRK);
    }

    // ---- specialties ----

    // Evaluation order for simultaneous interrupts: DSP, MFP, video autovectors.
    fn do_specialties_interrupt(&mut self, pending: bool) -> bool {
        if self.regs.spcflags.contains(Specialties::DSP) {
            if let Some(vector) = self.bus.dsp.process_irq() {
                if self.regs.intmask < 6 {
                    exceptions::exception(self, vector as u32, 0, ExceptionSource::Dsp);
                    self.regs.intmask = 6;
                    return true;
                }
            } else {
                self.regs.spcflags.remove(Specialties::DSP);
            }
        }

        if self.regs.spcflags.contains(Specialties::MFP) {
            if let Some(vector) = self.pending.mfp_vector {
                if self.regs.intmask < 6 {
                    self.pending.mfp_vector = None;
                    self.regs.spcflags.remove(Specialties::MFP);
                    exceptions::exception(self, vector as u32, 0, ExceptionSource::Mfp);
                    self.regs.intmask = 6;
                    return true;
                }
            } else {
                self.regs.spcflags.remove(Specialties::MFP);
            }
        }

        if self.regs.spcflags.intersects(Specialties::INT | Specialties::DOINT) {
            let intr = self.intlev();
            // DOINT is set again in make_from_sr to re-check after SR writes.
            self.regs.spcflags.remove(Specialties::INT | Specialties::DOINT);
            if intr != -1 && intr as u32 > self.regs.intmask {
                exceptions::interrupt(self, intr as u32, pending);
                return true;
            }
        }

        false
    }

    pub fn do_specialties(&mut self) -> bool {
        if self.regs.spcflags.contains(Specialties::BUSERROR) {
            // Bus errors execute here so that the stacked PC points to the
            // instruction after the fault.
            self.regs.spcflags.remove(Specialties::BUSERROR);
            exceptions::exception(self, 2, 0, ExceptionSource::Cpu);
            if self.halted {
                return true;
            }
        }

        if self.regs.spcflags.contains(Specialties::EXTRA_CYCLES) {
            self.regs.spcflags.remove(Specialties::EXTRA_CYCLES);
            self.cycles += self.wait_state_cycles.max(0) as u64;
            self.wait_state_cycles = 0;
        }

        if self.regs.spcflags.contains(Specialties::DOTRACE) {
            let pc = self.last_trace_pc;
            exceptions::exception(self, 9, pc, ExceptionSource::Cpu);
        }

        // The STOP loop: consume 4 cycles per tick, drain due events, and
        // re-test every interrupt source each tick.
        if self.regs.spcflags.contains(Specialties::STOP) {
            if self.do_specialties_interrupt(true) {
                self.regs.stopped = false;
                self.regs.spcflags.remove(Specialties::STOP);
            }

            while self.regs.spcflags.contains(Specialties::STOP) {
                if self.regs.spcflags.contains(Specialties::BRK) {
                    return true;
                }
                self.cycles += 4;
                self.service_events();
                if self.do_specialties_interrupt(false) {
                    self.regs.stopped = false;
                    self.regs.spcflags.remove(Specialties::STOP);
                }
            }
        }

        if self.regs.spcflags.contains(Specialties::TRACE) {
            self.do_trace();
        }

        if self.do_specialties_interrupt(false) {
            self.regs.stopped = false;
        }
        if self.regs.spcflags.contains(Specialties::INT) {
            self.regs.spcflags.remove(Specialties::INT);
            self.regs.spcflags.insert(Specialties::DOINT);
        }

        if self.regs.spcflags.intersects(Specialties::BRK | Specialties::MODE_CHANGE) {
            self.regs.spcflags.remove(Specialties::MODE_CHANGE);
            self.regs.spcflags.remove(Specialties::BRK);
            return true;
        }

        false
    }

    fn do_trace(&mut self) {
        if self.regs.t0 && self.level >= 2 {
            // T0 traces flow changes only.
            let opcode = self.bus.peek_word(self.regs.pc);
            let change_of_flow = opcode == 0x4e73
                || opcode == 0x4e74
                || opcode == 0x4e75
                || opcode == 0x4e77
                || opcode == 0x4e76
                || opcode & 0xffc0 == 0x4e80
                || opcode & 0xffc0 == 0x4ec0
                || opcode & 0xff00 == 0x6100
                || opcode & 0xf000 == 0x6000;
            if change_of_flow {
                self.last_trace_pc = self.regs.pc;
                self.regs.spcflags.remove(Specialties::TRACE);
                self.regs.spcflags.insert(Specialties::DOTRACE);
            }
        } else if self.regs.t1 {
            self.last_trace_pc = self.regs.pc;
            self.regs.spcflags.remove(Specialties::TRACE);
            self.regs.spcflags.insert(Specialties::DOTRACE);
        }
    }

    // ---- debugger support ----

    pub fn disassemble(&self, lines: usize) -> DisassemblySection {
        let mut disassembly = VecDeque::with_capacity(lines);
        let mut pc = self.regs.pc;
        for _ in 0..lines {
            let opcode = self.bus.peek_word(pc);
            let instr = crate::parser::parse_instruction(opcode, self.level);
            let length = match &instr {
                Some(instruction) => instruction.length(opcode),
                None => 1,
            };
            let mut opcodes = Vec::new();
            for j in 0..length {
                opcodes.push(self.bus.peek_word(pc.wrapping_add(2 * j as u32)));
            }
            let text = match instr {
                Some(instruction) => instruction.as_asm(),
                None => String::from("dc"),
            };
            disassembly.push_back((pc, opcodes, text));
            pc = pc.wrapping_add(2 * length as u32);
        }
        disassembly
    }
}

impl fmt::Display for CPU {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::from("\n");
        s.push_str(&format!("{r}╔══════════════════════════════════╦", r = cursor::Goto(1, 2)));
        s.push_str(&format!("{r}║ CPU state                        ║", r = cursor::Goto(1, 3)));
        s.push_str(&format!("{r}╟─────┬───────────┬────┬───────────╫", r = cursor::Goto(1, 4)));
        for j in 0..8 {
            s.push_str(&format!(
                "{r}║ A{j}  │  {a:08x} │ D{j} │  {d:08x} ║\n",
                j = j,
                a = self.regs.a[j],
                d = self.regs.d[j],
                r = cursor::Goto(1, (j + 5) as u16),
            ));
        }
        s.push_str(&format!("{r}╟─────┼─┬─┬─┬─┬─┬─┼────┼───────────╢", r = cursor::Goto(1, 13)));
        s.push_str(&format!("{r}║ IRQ │S│X│N│Z│V│C│    │           ║", r = cursor::Goto(1, 14)));
        s.push_str(&format!("{r}╟─────┼─┼─┼─┼─┼─┼─┼────┼───────────╢", r = cursor::Goto(1, 15)));
        s.push_str(&format!(
            "{r}║ {:03b} │{}│{}│{}│{}│{}│{}│ PC │  {:08x} ║\n",
            self.regs.intmask,
            self.regs.s as u8,
            self.regs.x as u8,
            self.regs.n as u8,
            self.regs.z as u8,
            self.regs.v as u8,
            self.regs.c as u8,
            self.regs.pc,
            r = cursor::Goto(1, 16)
        ));
        s.push_str(&format!("{r}╚═════╧═╧═╧═╧═╧═╧═╧════╧═══════════╩", r = cursor::Goto(1, 17)));
        write!(f, "{}", s)
    }
}

pub type DisassemblySection = VecDeque<(u32, Vec<u16>, String)>;

pub struct Disassembly {
    pub disassembly: DisassemblySection,
    pub cursor: usize,
    pub length: usize,
    pub breakpoints: HashSet<u32>,
}

impl Disassembly {
    pub fn new(lines: usize) -> Self {
        Self { disassembly: VecDeque::with_capacity(lines), cursor: 0, length: lines, breakpoints: HashSet::new() }
    }
    pub fn update(&mut self, cpu: &CPU) {
        self.disassembly = cpu.disassemble(self.length);
        let mut disassembled = HashMap::<u32, usize>::with_capacity(self.length);
        for (j, line) in self.disassembly.iter().enumerate() {
            disassembled.insert(line.0, j);
        }
        self.cursor = disassembled.get(&cpu.regs.pc).copied().unwrap_or(0) + 1;
    }
}

impl fmt::Display for Disassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut result = String::new();
        result.push_str(&format!(
            "{r}═══════════════════════════════════════════════════════════════════════╗\n",
            r = cursor::Goto(37, 2)
        ));
        result.push_str(&format!(
            "{r} Next instructions                                                     ║\n",
            r = cursor::Goto(37, 3)
        ));
        result.push_str(&format!(
            "{r}──────────┬──────────────────────────┬─────────────────────────────────╢\n",
            r = cursor::Goto(37, 4)
        ));
        for (j, line) in self.disassembly.iter().enumerate() {
            let mut out = String::new();
            for word in &line.1 {
                out.push_str(&format!("{:04x} ", word));
            }
            let mut symbol = String::from(" ");
            let mut color = format!("{}", color::Fg(color::Reset));
            if self.breakpoints.contains(&line.0) {
                symbol = format!("{r}*{n}", n = color::Fg(color::Reset), r = color::Fg(color::Red));
                if j + 1 == self.cursor {
                    symbol.push_str(&format!("{g}", g = color::Fg(color::Green)));
                    color = format!("{}", color::Fg(color::Green));
                }
            } else if j + 1 == self.cursor {
                symbol = format!("{g}>", g = color::Fg(color::Green));
                color = format!("{}", color::Fg(color::Green));
            }
            result.push_str(&format!(
                "{r}{sym}{a:08x}{n} │ {col}{o:<25}{n}│{col} {i:<32}{n}║\n",
                n = color::Fg(color::Reset),
                col = color,
                o = out,
                i = line.2,
                a = line.0,
                r = cursor::Goto(37, (j + 5) as u16),
                sym = symbol,
            ));
        }
        result.push_str(&format!(
            "{r}══════════╧══════════════════════════╧═════════════════════════════════╝\n",
            r = cursor::Goto(37, (self.length + 5) as u16)
        ));
        write!(f, "{}", result)
    }
}

pub struct Debugger {
    disassembly: Disassembly,
    code_running: bool,
    last_cmd: DebugCommand,
    variables: HashSet<u32>,
}

#[derive(PartialEq, Clone)]
enum DebugCommand {
    Quit,
    SetBreakpoint(Option<String>),
    DeleteBreakpoint(Option<String>),
    Continue,
    Step,
    Jump(Option<String>),
    Watch(Option<String>),
    Unwatch(Option<String>),
}

impl Debugger {
    pub fn new() -> Box<Self> {
        Box::new(Debugger {
            disassembly: Disassembly::new(12),
            code_running: false,
            last_cmd: DebugCommand::Step,
            variables: HashSet::new(),
        })
    }
    fn set_breakpoint(&mut self, breakpoint: &Option<String>, cpu: &CPU, delete: bool) {
        if let Some(address) = parse_address(breakpoint) {
            if delete {
                self.disassembly.breakpoints.remove(&address);
            } else {
                self.disassembly.breakpoints.insert(address);
            }
            self.draw_user_interface(cpu);
            if delete {
                println!("Breakpoint deleted.");
            } else {
                println!("Breakpoint created.");
            }
        } else {
            self.draw_user_interface(cpu);
            println!("Invalid address!");
        }
    }
    fn watch_address(&mut self, address: &Option<String>, cpu: &CPU, watch: bool) {
        if let Some(address) = parse_address(address) {
            if watch {
                self.variables.insert(address);
            } else {
                self.variables.remove(&address);
            }
            self.draw_user_interface(cpu);
        } else {
            self.draw_user_interface(cpu);
            println!("Invalid address!");
        }
    }
    fn get_command(&mut self) -> DebugCommand {
        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            return DebugCommand::Quit;
        }
        let mut cmd = input.split_whitespace();
        match cmd.next() {
            Some("q") => DebugCommand::Quit,
            Some("s") | Some("n") => DebugCommand::Step,
            Some("b") => DebugCommand::SetBreakpoint(cmd.next().map(String::from)),
            Some("d") => DebugCommand::DeleteBreakpoint(cmd.next().map(String::from)),
            Some("j") => DebugCommand::Jump(cmd.next().map(String::from)),
            Some("w") => DebugCommand::Watch(cmd.next().map(String::from)),
            Some("u") => DebugCommand::Unwatch(cmd.next().map(String::from)),
            Some("c") => DebugCommand::Continue,
            _ => self.last_cmd.clone(),
        }
    }
    fn draw_user_interface(&mut self, cpu: &CPU) {
        println!("{}", clear::All);
        print!("{c}{tl}{cpu}", c = clear::All, tl = cursor::Goto(1, 1), cpu = cpu);
        print!("{tr}{dis}", tr = cursor::Goto(10, 10), dis = self.disassembly);
        if !self.variables.is_empty() {
            println!("{r}Watched memory locations", r = cursor::Goto(1, 6 + self.disassembly.length as u16));
            for var in self.variables.iter() {
                println!("{:08x}: {:08x}", var, cpu.bus.peek_long(*var))
            }
        }
        println!("{r}\nDebugger attached. Enter n to single step, c to continue, b/d <addr> to enter/delete a breakpoint at addr, j <addr> to jump to <addr> or q to quit.",
            r = cursor::Goto(1, (7 + self.disassembly.length + self.variables.len()) as u16));
        print!("{r}> ", r = cursor::Goto(1, (9 + self.disassembly.length + self.variables.len()) as u16));
        io::stdout().flush().ok();
    }
    pub fn update(&mut self, cpu: &mut CPU) -> Signal {
        if !self.code_running || self.disassembly.breakpoints.contains(&cpu.regs.pc) {
            self.code_running = false;
            self.disassembly.update(cpu);
            self.draw_user_interface(cpu);
            let cmd = self.get_command();
            match &cmd {
                DebugCommand::Quit => Signal::Quit,
                DebugCommand::SetBreakpoint(b) => {
                    self.set_breakpoint(b, cpu, false);
                    Signal::NoOp
                }
                DebugCommand::DeleteBreakpoint(b) => {
                    self.set_breakpoint(b, cpu, true);
                    Signal::NoOp
                }
                DebugCommand::Watch(a) => {
                    self.watch_address(a, cpu, true);
                    Signal::NoOp
                }
                DebugCommand::Unwatch(a) => {
                    self.watch_address(a, cpu, false);
                    Signal::NoOp
                }
                DebugCommand::Continue => {
                    self.code_running = true;
                    Signal::Ok
                }
                DebugCommand::Step => {
                    self.last_cmd = cmd;
                    Signal::Ok
                }
                DebugCommand::Jump(a) => {
                    if let Some(address) = parse_address(a) {
                        cpu.regs.pc = address;
                        self.last_cmd = cmd;
                        Signal::Ok
                    } else {
                        Signal::NoOp
                    }
                }
            }
        } else {
            Signal::Ok
        }
    }
}

fn parse_address(address: &Option<String>) -> Option<u32> {
    match address {
        Some(addr) => u32::from_str_radix(addr, 16).ok(),
        None => None,
    }
}
