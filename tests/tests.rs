use emfalcon::atari;
use emfalcon::intercept::CART_GEMDOS_OPCODE_ADDR;
use emfalcon::processor::InterruptSource;
use emfalcon::{Configuration, Emulator};
use std::fs;

const START: u32 = 0x1000;
const SSP: u32 = 0x2000;

fn test_configuration() -> Configuration {
    Configuration {
        memory_size: 0x100000,
        cpu_level: 0,
        compatible: true,
        dsp_enabled: true,
        tos_image: None,
        gemdos_dir: None,
        console_redirect: false,
        base_address: 0,
        start_address: START,
        initial_ssp: SSP,
        memory_layout: Vec::new(),
        devices: atari::stub_devices(),
    }
}

fn emulator_with(program: &[u16]) -> Emulator {
    let mut em = Emulator::new(test_configuration()).unwrap();
    let mut addr = START;
    for &word in program {
        em.cpu.bus.write_word(addr, word).unwrap();
        addr += 2;
    }
    em.cpu.refill_prefetch(START);
    em
}

#[test]
fn move_word_immediate_sets_flags_and_cycles() {
    // move.w #$8000,d0
    let mut em = emulator_with(&[0x303c, 0x8000]);
    let before = em.cpu.cycles;
    em.cpu.step();
    assert_eq!(em.cpu.regs.d[0] & 0xffff, 0x8000);
    assert!(em.cpu.regs.n);
    assert!(!em.cpu.regs.z);
    assert_eq!(em.cpu.cycles - before, 8);
    assert_eq!(em.cpu.regs.pc, START + 4);
}

#[test]
fn division_cycle_count_per_quotient_bit() {
    // divu.w d1,d0 with quotient $8000: one set bit, fourteen clear ones.
    let mut em = emulator_with(&[0x80c1]);
    em.cpu.regs.d[0] = 0x00010000;
    em.cpu.regs.d[1] = 0x00000002;
    let before = em.cpu.cycles;
    em.cpu.step();
    assert_eq!(em.cpu.regs.d[0], 0x00008000);
    assert!(em.cpu.regs.n);
    assert_eq!(em.cpu.cycles - before, 138);
}

#[test]
fn division_by_zero_raises_exception_5() {
    let mut em = emulator_with(&[0x80c1]);
    em.cpu.bus.write_long(5 * 4, 0x4000).unwrap();
    em.cpu.regs.d[0] = 0x1234;
    em.cpu.regs.d[1] = 0;
    em.cpu.step();
    assert_eq!(em.cpu.regs.pc, 0x4000);
}

#[test]
fn bus_error_restores_move_destination() {
    // movea.w $4ef90000.l,a0 executing at $62a: the source read faults after
    // the destination was touched, and the frame carries the corrected state.
    let mut em = emulator_with(&[]);
    em.cpu.bus.write_word(0x62a, 0x3079).unwrap();
    em.cpu.bus.write_word(0x62c, 0x4ef9).unwrap();
    em.cpu.bus.write_word(0x62e, 0x0000).unwrap();
    em.cpu.bus.write_long(2 * 4, 0x3000).unwrap(); // bus error vector
    em.cpu.regs.pc = 0x62a;
    em.cpu.refill_prefetch(0x62a);
    em.cpu.regs.a[0] = 0x0008;

    em.cpu.step();

    // A0 was rolled back, not left as the written garbage.
    assert_eq!(em.cpu.regs.a[0], 0x0008);
    assert_eq!(em.cpu.regs.pc, 0x3000);
    // Group 0 frame: status, fault address, opcode, SR, PC.
    let sp = em.cpu.regs.a[7];
    assert_eq!(em.cpu.bus.read_long(sp.wrapping_add(2)).unwrap(), 0xf90000);
    assert_eq!(em.cpu.bus.read_word(sp.wrapping_add(6)).unwrap(), 0x3079);
    assert_eq!(em.cpu.bus.read_long(sp.wrapping_add(10)).unwrap(), 0x62a + 6);
}

#[test]
fn double_bus_error_halts_the_machine() {
    // The bus error vector points into unmapped space, so stacking the second
    // frame cannot complete.
    let mut em = emulator_with(&[]);
    em.cpu.bus.write_word(0x62a, 0x3079).unwrap();
    em.cpu.bus.write_word(0x62c, 0x4ef9).unwrap();
    em.cpu.bus.write_word(0x62e, 0x0000).unwrap();
    em.cpu.bus.write_long(2 * 4, 0x3000).unwrap();
    em.cpu.regs.pc = 0x62a;
    em.cpu.refill_prefetch(0x62a);
    em.cpu.regs.a[7] = 0x500000; // supervisor stack in unmapped space
    em.cpu.step();
    assert!(em.cpu.halted);
}

#[test]
fn address_error_on_odd_word_access() {
    // move.w $1001.w,d0
    let mut em = emulator_with(&[0x3038, 0x1001]);
    em.cpu.bus.write_long(3 * 4, 0x4000).unwrap();
    em.cpu.step();
    assert_eq!(em.cpu.regs.pc, 0x4000);
    let sp = em.cpu.regs.a[7];
    assert_eq!(em.cpu.bus.read_long(sp.wrapping_add(2)).unwrap(), 0x1001);
}

#[test]
fn stop_wakes_on_mfp_before_hbl_and_masks_the_latter() {
    // STOP #$2500 leaves the mask at 5; MFP (level 6) must win over the
    // pending HBL (level 2), and the raised mask then keeps HBL out.
    let mut em = emulator_with(&[0x4e72, 0x2500]);
    em.cpu.bus.write_long(0x40 * 4, 0x4000).unwrap(); // MFP vector
    em.cpu.bus.write_long(26 * 4, 0x5000).unwrap(); // HBL autovector
    em.cpu.set_pending_interrupt(InterruptSource::Mfp(0x40), true);
    em.cpu.set_pending_interrupt(InterruptSource::Hbl, true);

    em.cpu.step();

    assert_eq!(em.cpu.regs.pc, 0x4000);
    assert_eq!(em.cpu.regs.intmask, 6);
    assert!(!em.cpu.regs.stopped);
    // The HBL stays pending and is not taken with the mask at 6.
    assert!(em.cpu.pending.hbl);
    em.cpu.bus.write_word(0x4000, 0x4e71).unwrap(); // nop in the handler
    em.cpu.refill_prefetch(0x4000);
    em.cpu.step();
    assert_eq!(em.cpu.regs.pc, 0x4002);
}

#[test]
fn stop_drains_events_until_an_interrupt_arrives() {
    // No interrupt pending at STOP time; the HBL event scheduled by reset
    // fires inside the STOP loop and wakes the CPU.
    let mut em = emulator_with(&[0x4e72, 0x2100]); // mask 1, HBL allowed
    em.cpu.bus.write_long(26 * 4, 0x5000).unwrap();
    em.cpu.step();
    assert_eq!(em.cpu.regs.pc, 0x5000);
    assert_eq!(em.cpu.regs.intmask, 2);
    assert!(em.cpu.cycles >= 512);
}

#[test]
fn trace_fires_after_group_2_exception() {
    // chk.w d1,d0 with d0 out of range and T1 set: the CHK exception comes
    // first, the trace lands inside the CHK handler.
    let mut em = emulator_with(&[0x4181]);
    em.cpu.bus.write_long(6 * 4, 0x4000).unwrap(); // CHK vector
    em.cpu.bus.write_long(9 * 4, 0x5000).unwrap(); // trace vector
    em.cpu.regs.d[0] = 0x8000; // negative as a word
    em.cpu.regs.d[1] = 10;
    em.cpu.set_sr(0xa700); // T1 + supervisor

    em.cpu.step();

    // We are in the trace handler, and its stacked PC points into the CHK
    // handler, not back at the CHK site.
    assert_eq!(em.cpu.regs.pc, 0x5000);
    let sp = em.cpu.regs.a[7];
    let stacked_pc = em.cpu.bus.read_long(sp.wrapping_add(2)).unwrap();
    assert_eq!(stacked_pc, 0x4000);
    assert!(!em.cpu.regs.t1);
}

#[test]
fn exception_entry_switches_to_supervisor_and_stacks_caller_sr() {
    let mut em = emulator_with(&[0x4e40]); // trap #0
    em.cpu.bus.write_long(32 * 4, 0x4000).unwrap();
    em.cpu.regs.usp = 0x1800;
    em.cpu.set_sr(0x0000); // drop to user mode
    assert_eq!(em.cpu.regs.a[7], 0x1800);

    em.cpu.step();

    assert!(em.cpu.regs.s);
    assert_eq!(em.cpu.regs.pc, 0x4000);
    // The frame went to the interrupt stack and holds the user-mode SR.
    let sp = em.cpu.regs.a[7];
    assert_eq!(sp, SSP - 6);
    assert_eq!(em.cpu.bus.read_word(sp).unwrap(), 0x0000);
    assert_eq!(em.cpu.bus.read_long(sp.wrapping_add(2)).unwrap(), START + 2);
    assert_eq!(em.cpu.regs.usp, 0x1800);
}

#[test]
fn rte_restores_the_interrupted_context() {
    let mut em = emulator_with(&[0x4e40]); // trap #0
    em.cpu.bus.write_long(32 * 4, 0x4000).unwrap();
    em.cpu.bus.write_word(0x4000, 0x4e73).unwrap(); // rte
    em.cpu.step();
    em.cpu.step();
    assert_eq!(em.cpu.regs.pc, START + 2);
    assert_eq!(em.cpu.regs.a[7], SSP);
}

#[test]
fn movem_predecrement_stores_in_reverse_order() {
    // movem.l d0-d1/a0,-(a1)
    let mut em = emulator_with(&[0x48e1, 0xc080]);
    em.cpu.regs.d[0] = 0x11111111;
    em.cpu.regs.d[1] = 0x22222222;
    em.cpu.regs.a[0] = 0x33333333;
    em.cpu.regs.a[1] = 0x8000;
    em.cpu.step();
    assert_eq!(em.cpu.regs.a[1], 0x8000 - 12);
    assert_eq!(em.cpu.bus.read_long(0x8000 - 4).unwrap(), 0x33333333);
    assert_eq!(em.cpu.bus.read_long(0x8000 - 8).unwrap(), 0x22222222);
    assert_eq!(em.cpu.bus.read_long(0x8000 - 12).unwrap(), 0x11111111);
}

#[test]
fn dbcc_counts_down_and_falls_through() {
    // moveq #2,d0 ; dbf d0,-2 (loops back onto itself until d0 is -1)
    let mut em = emulator_with(&[0x7002, 0x51c8, 0xfffe]);
    em.cpu.step(); // moveq
    em.cpu.step(); // dbf taken, d0 = 1
    assert_eq!(em.cpu.regs.pc, START + 2);
    em.cpu.step(); // dbf taken, d0 = 0
    em.cpu.step(); // dbf expires, d0 = -1
    assert_eq!(em.cpu.regs.d[0] & 0xffff, 0xffff);
    assert_eq!(em.cpu.regs.pc, START + 6);
}

#[test]
fn asl_overflow_and_extend() {
    // asl.b #1,d0 with $40: sign changes, V set, X = C = 0.
    let mut em = emulator_with(&[0xe300]);
    em.cpu.regs.d[0] = 0x40;
    em.cpu.step();
    assert_eq!(em.cpu.regs.d[0] & 0xff, 0x80);
    assert!(em.cpu.regs.v);
    assert!(!em.cpu.regs.c);
    assert!(em.cpu.regs.n);
}

#[test]
fn abcd_adds_packed_decimal() {
    // abcd d1,d0 with $19 + $08 = $27
    let mut em = emulator_with(&[0xc101]);
    em.cpu.regs.d[0] = 0x19;
    em.cpu.regs.d[1] = 0x08;
    em.cpu.regs.z = true;
    em.cpu.step();
    assert_eq!(em.cpu.regs.d[0] & 0xff, 0x27);
    assert!(!em.cpu.regs.c);
    assert!(!em.cpu.regs.z);
}

#[test]
fn supervisor_instruction_in_user_mode_traps() {
    let mut em = emulator_with(&[0x4e72, 0x2700]); // stop
    em.cpu.bus.write_long(8 * 4, 0x4000).unwrap();
    em.cpu.regs.usp = 0x1800;
    em.cpu.set_sr(0x0000);
    em.cpu.step();
    assert_eq!(em.cpu.regs.pc, 0x4000);
    assert!(em.cpu.regs.s);
    assert!(!em.cpu.regs.stopped);
}

#[test]
fn dsp_sine_rom_after_reset() {
    let em = emulator_with(&[]);
    let rom = &em.cpu.bus.dsp.core.rom[1]; // y: space
    assert_eq!(rom[0x100], 0);
    assert!((rom[0x120] as i64 - 0x5a8279).abs() <= 2);
    assert_eq!(rom[0x140], 0x7fffff);
    assert_eq!(rom[0x1c0], 0x800000);
}

#[test]
fn dsp_bootstrap_through_the_host_port() {
    let mut em = emulator_with(&[]);
    // 512 words through TXH/TXM/TXL; the first is "jmp $0" so the program
    // idles at p:0 once running.
    for j in 0..0x200u32 {
        let word: u32 = if j == 0 { 0x0c0000 } else { 0 };
        em.cpu.bus.write_byte(0xffa205, (word >> 16) as u8).unwrap();
        em.cpu.bus.write_byte(0xffa206, (word >> 8) as u8).unwrap();
        em.cpu.bus.write_byte(0xffa207, word as u8).unwrap();
    }
    assert_eq!(em.cpu.bus.dsp.core.bootstrap_pos, 0x200);
    assert_eq!(em.cpu.bus.dsp.core.bootstrap_accum, 0);
    assert_eq!(em.cpu.bus.dsp.core.ramint[2][0], 0x0c0000);

    // The DSP now advances in lock step with the CPU.
    em.cpu.bus.write_word(START, 0x4e71).unwrap();
    em.cpu.refill_prefetch(START);
    em.cpu.step();
    assert!(em.cpu.bus.dsp.core.pc <= 1);
}

#[test]
fn dsp_host_port_read_write_from_the_cpu_side() {
    let mut em = emulator_with(&[]);
    // ISR after reset: TRDY and TXDE high.
    assert_eq!(em.cpu.bus.read_byte(0xffa202).unwrap() & 0x06, 0x06);
    // IVR resets to $0f.
    assert_eq!(em.cpu.bus.read_byte(0xffa203).unwrap(), 0x0f);
}

#[test]
fn intercepted_gemdos_fopen_returns_a_host_handle() {
    // Fopen on the emulated drive opens the host file and the ROM handler is
    // never reached.
    let dir = std::env::temp_dir().join(format!("emfalcon-test-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("TEST.TXT"), b"hello").unwrap();

    let mut config = test_configuration();
    config.gemdos_dir = Some(dir.clone());
    let mut em = Emulator::new(config).unwrap();

    // trap #1 goes through the cartridge trampoline.
    em.cpu.bus.write_long(0x84, CART_GEMDOS_OPCODE_ADDR).unwrap();
    em.cpu.intercept.current_drive = 2;
    em.cpu.intercept.old_gemdos_vector = 0x7000;

    // Caller pushed: Fopen, filename pointer, mode.
    em.cpu.regs.a[7] = 0x1ff8;
    em.cpu.bus.write_word(0x1ff8, 0x3d).unwrap();
    em.cpu.bus.write_long(0x1ffa, 0x3000).unwrap();
    em.cpu.bus.write_word(0x1ffe, 0).unwrap();
    for (j, &b) in b"C:\\TEST.TXT\0".iter().enumerate() {
        em.cpu.bus.write_byte(0x3000 + j as u32, b).unwrap();
    }
    em.cpu.bus.write_word(START, 0x4e41).unwrap(); // trap #1
    em.cpu.refill_prefetch(START);

    em.cpu.step(); // trap -> cartridge
    assert_eq!(em.cpu.regs.pc, CART_GEMDOS_OPCODE_ADDR);
    em.cpu.step(); // host-call opcode

    assert_eq!(em.cpu.regs.d[0], 64);
    assert_eq!(em.cpu.regs.pc, START + 2);
    assert_eq!(em.cpu.regs.a[7], 0x1ff8);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn unhandled_gemdos_call_continues_into_the_rom_handler() {
    let dir = std::env::temp_dir().join(format!("emfalcon-test2-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();

    let mut config = test_configuration();
    config.gemdos_dir = Some(dir.clone());
    let mut em = Emulator::new(config).unwrap();
    em.cpu.bus.write_long(0x84, CART_GEMDOS_OPCODE_ADDR).unwrap();
    em.cpu.intercept.old_gemdos_vector = 0x7000;

    // Pterm0 is not intercepted.
    em.cpu.regs.a[7] = 0x1ffe;
    em.cpu.bus.write_word(0x1ffe, 0x00).unwrap();
    em.cpu.bus.write_word(START, 0x4e41).unwrap();
    em.cpu.refill_prefetch(START);

    em.cpu.step();
    em.cpu.step();
    assert_eq!(em.cpu.regs.pc, 0x7000);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn illegal_instruction_vectors_through_4() {
    let mut em = emulator_with(&[0xffff]);
    em.cpu.bus.write_long(11 * 4, 0x4000).unwrap(); // line F
    em.cpu.step();
    assert_eq!(em.cpu.regs.pc, 0x4000);

    let mut em = emulator_with(&[0x4afc]);
    em.cpu.bus.write_long(4 * 4, 0x4800).unwrap();
    em.cpu.step();
    assert_eq!(em.cpu.regs.pc, 0x4800);
}

#[test]
fn vbl_outranks_hbl_at_the_same_tick() {
    let mut em = emulator_with(&[0x4e71, 0x4e71]);
    em.cpu.bus.write_long(26 * 4, 0x5000).unwrap();
    em.cpu.bus.write_long(28 * 4, 0x6000).unwrap();
    em.cpu.set_sr(0x2100); // mask 1
    em.cpu.set_pending_interrupt(InterruptSource::Hbl, true);
    em.cpu.set_pending_interrupt(InterruptSource::Vbl, true);
    em.cpu.step();
    assert_eq!(em.cpu.regs.pc, 0x6000);
    assert_eq!(em.cpu.regs.intmask, 4);
}
