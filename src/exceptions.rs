// Exception entry, the most patched-over corner of the machine. Frame layouts
// differ by CPU level, bus errors carry empirically verified stacked-PC
// corrections, and interrupt acceptance pays an IACK latency during which timer
// events still fire. Every special case here is load-bearing for some title.

use crate::memory::Fault;
use crate::processor::{Specialties, CPU};

// Cycles between interrupt recognition and the vector fetch.
pub const CPU_IACK_CYCLES_MFP: u32 = 12;
pub const CPU_IACK_CYCLES_VIDEO: u32 = 12;

// Deterministic wake-up jitter on autovector acceptance.
const HBL_JITTER: [u32; 5] = [8, 4, 4, 0, 0];
const HBL_JITTER_PENDING: [u32; 5] = [4, 4, 4, 0, 0];
const VBL_JITTER: [u32; 5] = [8, 0, 4, 0, 4];
const VBL_JITTER_PENDING: [u32; 5] = [8, 4, 4, 0, 4];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExceptionSource {
    Cpu,
    Autovec,
    Mfp,
    Dsp,
}

fn frame_write_word(cpu: &mut CPU, address: u32, value: u16) {
    if let Err(Fault::Bus { address, .. }) = cpu.bus.write_word(address, value) {
        log::error!("bus error at ${:06x} while stacking an exception frame => CPU halted", address);
        cpu.halted = true;
    }
}

fn frame_write_long(cpu: &mut CPU, address: u32, value: u32) {
    if let Err(Fault::Bus { address, .. }) = cpu.bus.write_long(address, value) {
        log::error!("bus error at ${:06x} while stacking an exception frame => CPU halted", address);
        cpu.halted = true;
    }
}

fn push_word(cpu: &mut CPU, value: u16) {
    cpu.regs.a[7] = cpu.regs.a[7].wrapping_sub(2);
    let sp = cpu.regs.a[7];
    frame_write_word(cpu, sp, value);
}

fn push_long(cpu: &mut CPU, value: u32) {
    cpu.regs.a[7] = cpu.regs.a[7].wrapping_sub(4);
    let sp = cpu.regs.a[7];
    frame_write_long(cpu, sp, value);
}

// Handle exceptions. MFP and DSP interrupts arrive with the vector their
// controller supplied; the IACK sequence may still change it.
pub fn exception(cpu: &mut CPU, nr: u32, oldpc: u32, source: ExceptionSource) {
    let mut nr = nr;
    let mut currpc = cpu.regs.pc;

    // Pending bits and vector numbers can change before the end of the IACK
    // sequence; due events fire inside it.
    match source {
        ExceptionSource::Mfp | ExceptionSource::Dsp => {
            cpu.add_cycles(CPU_IACK_CYCLES_MFP);
            cpu.service_events();
            if source == ExceptionSource::Mfp {
                if let Some(vector) = cpu.pending.mfp_vector.take() {
                    nr = vector as u32;
                    cpu.regs.spcflags.remove(Specialties::MFP);
                }
            }
        }
        ExceptionSource::Autovec if nr == 26 || nr == 28 => {
            cpu.add_cycles(CPU_IACK_CYCLES_VIDEO);
            cpu.service_events();
            if nr == 26 {
                cpu.pending.hbl = false;
            } else {
                cpu.pending.vbl = false;
            }
        }
        _ => {}
    }

    if source == ExceptionSource::Cpu && nr == 0x22 {
        // Trap #2: VDI interception redirects the return point through the
        // cartridge so the fix-up opcode runs after the ROM handler returns.
        if let Some(redirect) = cpu.intercept.vdi_entry(&cpu.regs) {
            cpu.intercept.vdi_old_pc = currpc;
            currpc = redirect;
        }
    }

    cpu.make_sr();

    // Change to supervisor mode if necessary.
    if !cpu.regs.s {
        cpu.regs.usp = cpu.regs.a[7];
        cpu.regs.a[7] = if cpu.level >= 2 && cpu.regs.m { cpu.regs.msp } else { cpu.regs.isp };
        cpu.regs.s = true;
    }

    // Additional exception stack frame for 68010 and higher.
    if cpu.level > 0 {
        if source == ExceptionSource::Mfp || source == ExceptionSource::Dsp {
            push_word(cpu, (nr * 4) as u16);
        } else if nr == 2 || nr == 3 {
            for _ in 0..12 {
                push_word(cpu, 0);
            }
            push_word(cpu, (0xa000 + nr * 4) as u16);
        } else if nr == 5 || nr == 6 || nr == 7 || nr == 9 {
            push_long(cpu, oldpc);
            push_word(cpu, (0x2000 + nr * 4) as u16);
        } else if cpu.regs.m && nr >= 24 && nr < 32 {
            // Interrupt with M set: throwaway frame on the master stack, then
            // continue on the interrupt stack.
            push_word(cpu, (nr * 4) as u16);
            push_long(cpu, currpc);
            let sr = cpu.regs.sr;
            push_word(cpu, sr);
            cpu.regs.sr |= 1 << 13;
            cpu.regs.msp = cpu.regs.a[7];
            cpu.regs.a[7] = cpu.regs.isp;
            push_word(cpu, (0x1000 + nr * 4) as u16);
        } else {
            push_word(cpu, (nr * 4) as u16);
        }
    }

    push_long(cpu, currpc);
    let sr = cpu.regs.sr;
    push_word(cpu, sr);

    // 68000 bus and address errors stack the access info below {SR, PC}.
    if cpu.level == 0 && (nr == 2 || nr == 3) && source == ExceptionSource::Cpu {
        let mut specialstatus: u16 = if cpu.fault_info.instruction_access { 2 } else { 1 };
        if cpu.regs.sr & 0x2000 != 0 {
            specialstatus |= 0x4;
        }
        cpu.regs.a[7] = cpu.regs.a[7].wrapping_sub(8);
        let sp = cpu.regs.a[7];

        if nr == 3 {
            // The unused bits of the status word are those of the opcode.
            specialstatus |= cpu.fault_info.opcode & !0x1f;
            if cpu.fault_info.read {
                specialstatus |= 0x10;
            }
            frame_write_word(cpu, sp, specialstatus);
            frame_write_long(cpu, sp.wrapping_add(2), cpu.fault_info.fault_address);
            frame_write_word(cpu, sp.wrapping_add(6), cpu.fault_info.opcode);
            frame_write_long(cpu, sp.wrapping_add(10), cpu.fault_info.last_addr);

            // The stacked PC is not always the next instruction.
            if cpu.fault_info.opcode == 0x2285 {
                // move.l d5,(a1): the correct PC is 2 bytes further on
                frame_write_long(cpu, sp.wrapping_add(10), currpc.wrapping_add(4));
            }

            log::warn!(
                "address error at ${:06x}, PC=${:06x} op=${:04x}",
                cpu.fault_info.fault_address,
                currpc,
                cpu.fault_info.opcode
            );
        } else {
            let opcode = cpu.fault_info.opcode;
            specialstatus |= opcode & !0x1f;
            if cpu.fault_info.read {
                specialstatus |= 0x10;
            }
            frame_write_word(cpu, sp, specialstatus);
            frame_write_long(cpu, sp.wrapping_add(2), cpu.fault_info.fault_address);
            frame_write_word(cpu, sp.wrapping_add(6), opcode);

            let instruction_pc = cpu.regs.instruction_pc;
            if opcode == 0x21f8 {
                // move.l $0.w,$24.w: the correct PC is 2 bytes less
                frame_write_long(cpu, sp.wrapping_add(10), currpc.wrapping_sub(2));
            } else if instruction_pc == 0xccc && opcode == 0x48d6 {
                // movem.l a0-a5,(a6): the correct PC is 2 bytes more
                frame_write_long(cpu, sp.wrapping_add(10), currpc.wrapping_add(2));
            } else if instruction_pc == 0x1fece && opcode == 0x33d4 {
                // move.w (a4),$1fdca: the correct PC is 4 bytes less
                frame_write_long(cpu, sp.wrapping_add(10), currpc.wrapping_sub(4));
            } else if instruction_pc == 0x62a && opcode == 0x3079 {
                // move.l $4ef90000,a0: the dest write had already happened on the
                // read fault, put the old value back
                cpu.regs.a[0] = 8;
            } else if cpu.bus.peek_long(instruction_pc) == 0x13f88e21 {
                // move.b $ffff8e21.w,$xxxxx: restore the untouched destination
                let dest = cpu.bus.peek_long(instruction_pc.wrapping_add(4));
                let _ = cpu.bus.write_byte(dest, 0x00);
            }

            log::warn!(
                "bus error at ${:06x}, PC=${:06x} op=${:04x}",
                cpu.fault_info.fault_address,
                currpc,
                opcode
            );
        }
    }

    if cpu.halted {
        return;
    }
    if nr == 2 || nr == 3 {
        cpu.debugger_break(if nr == 2 { "bus error" } else { "address error" });
    }

    // Fetch the vector and check it is even.
    let vector_addr = cpu.regs.vbr.wrapping_add(4 * nr);
    let newpc = cpu.bus.peek_long(vector_addr);
    if newpc & 1 != 0 {
        if nr == 2 || nr == 3 {
            log::error!("address error during exception 2/3, new PC=${:06x} => CPU halted", newpc);
            cpu.halted = true;
        } else {
            log::warn!("address error during exception, new PC=${:06x}", newpc);
            let pc = cpu.regs.pc;
            exception(cpu, 3, pc, ExceptionSource::Cpu);
        }
        return;
    }

    cpu.regs.pc = newpc;
    cpu.refill_prefetch(newpc);
    exception_trace(cpu, nr);

    // Exception cycles; interrupts already paid part of them during IACK.
    let cycles = match source {
        ExceptionSource::Mfp | ExceptionSource::Dsp => 44 + 12 - CPU_IACK_CYCLES_MFP,
        _ => match nr {
            24..=31 => {
                if nr == 26 || nr == 28 {
                    44 + 12 - CPU_IACK_CYCLES_VIDEO
                } else {
                    44 + 4
                }
            }
            32..=47 => 34,
            2 => 50,
            3 => 50,
            4 => 34,
            5 => 38,
            6 => 40,
            7 => 34,
            8 => 34,
            9 => 34,
            10 => 34,
            11 => 34,
            _ => {
                if nr < 64 {
                    4
                } else {
                    44 + 12
                }
            }
        },
    };
    cpu.add_cycles(cycles);
}

fn exception_trace(cpu: &mut CPU, nr: u32) {
    cpu.regs.spcflags.remove(Specialties::TRACE | Specialties::DOTRACE);
    if cpu.regs.t1 && !cpu.regs.t0 {
        // Trace stays pending if the exception is div by zero, CHK, TRAPV or TRAP#n.
        if nr == 5 || nr == 6 || nr == 7 || (nr >= 32 && nr <= 47) {
            cpu.last_trace_pc = cpu.regs.pc;
            cpu.regs.spcflags.insert(Specialties::DOTRACE);
        }
    }
    cpu.regs.t1 = false;
    cpu.regs.t0 = false;
    cpu.regs.m = false;
}

// Autovector interrupt acceptance with the ST-specific wake-up jitter.
pub fn interrupt(cpu: &mut CPU, level: u32, pending: bool) {
    exception(cpu, level + 24, 0, ExceptionSource::Autovec);
    cpu.regs.intmask = level;
    cpu.regs.spcflags.insert(Specialties::INT);
    interrupt_add_jitter(cpu, level, pending);
}

fn interrupt_add_jitter(cpu: &mut CPU, level: u32, pending: bool) {
    let index = cpu.jitter_index;
    cpu.jitter_index = (cpu.jitter_index + 1) % 5;
    let cycles = match (level, pending) {
        (2, true) => HBL_JITTER_PENDING[index],
        (2, false) => HBL_JITTER[index],
        (4, true) => VBL_JITTER_PENDING[index],
        (4, false) => VBL_JITTER[index],
        _ => 0,
    };
    if cycles > 0 {
        cpu.add_cycles(cycles);
    }
}
