// Falcon-flavoured machine configuration: memory sizing, the boot-time system
// variables for running without a TOS image, and the stub peripherals TOS pokes
// during boot. The hardware register page is byte-granular; anything we do not
// model answers through a plain register block.

use crate::devices::{Device, RegisterBlock};
use crate::fields::OpResult::{self, *};
use crate::Configuration;

pub const RAM_SIZE: usize = 0x400000;
pub const BASE_ADDRESS: u32 = 0xfc0000;
pub const START_ADDRESS: u32 = 0xfc0030;
pub const INITIAL_SSP: u32 = 0x0104;

// Initial memory layout when no OS image is loaded.
pub const MEMORY_LAYOUT: [(u32, OpResult); 14] = [
    //   $000.L      Reset initial SSP value
    (0x0, Long(0x0104)),
    //   $004.L      Reset initial PC address
    (0x4, Long(START_ADDRESS)),
    //   $028.L      Line 1010 (Line A routine)
    (0x28, Long(0xeb9a)),
    //   $068.L      Interrupt level 2 (Hblank sync)
    (0x68, Long(0x543c)),
    //   $070.L      Interrupt level 4 (Vblank sync)
    (0x70, Long(0x5452)),
    //   $420.L      Memvalid (Cold start OK if #$752019F3)
    (0x420, Long(0x752019f3)),
    //   $424.B      Memcntlr (Memory controller low nibble)
    (0x424, Byte(0x0)),
    //   $426.L      Resvalid (#$31415926 to jump through 'resvector')
    (0x426, Long(0x0)),
    //   $42A.L      Resvector (System reset bailout vector)
    (0x42a, Long(START_ADDRESS)),
    //   $42E.L      Phystop (Physical RAM top)
    (0x42e, Long(RAM_SIZE as u32)),
    //   $43A.L      Memval2 (#$237698AA)
    (0x43a, Long(0x237698aa)),
    //   $51A.L      Memval3 (#$5555AAAA)
    (0x51a, Long(0x5555aaaa)),
    //   $4A6.W      _Nflops (Number of floppies attached)
    (0x4a6, Word(0x1)),
    //   $44E.L      _V_bas_ad (Screen memory base pointer)
    (0x44e, Long(0x78000)),
];

// Register blocks standing in for the peripherals outside the core: memory
// controller and shifter, sound, MFP, ACIAs. The DSP host port at 0xffa200 is
// wired directly into the bus.
pub fn stub_devices() -> Vec<Box<dyn Device>> {
    vec![
        RegisterBlock::new(0xff8000, 0x40),  // memory controller
        RegisterBlock::new(0xff8200, 0x100), // shifter
        RegisterBlock::new(0xff8600, 0x40),  // DMA / FDC
        RegisterBlock::new(0xff8800, 0x40),  // PSG
        RegisterBlock::new(0xff8900, 0x40),  // sound DMA
        RegisterBlock::new(0xfffa00, 0x40),  // MFP
        RegisterBlock::new(0xfffc00, 0x08),  // keyboard / MIDI ACIAs
    ]
}

pub fn falcon() -> Configuration {
    Configuration {
        memory_size: RAM_SIZE,
        cpu_level: 0,
        compatible: true,
        dsp_enabled: true,
        tos_image: None,
        gemdos_dir: None,
        console_redirect: false,
        base_address: BASE_ADDRESS,
        start_address: START_ADDRESS,
        initial_ssp: INITIAL_SSP,
        memory_layout: MEMORY_LAYOUT.to_vec(),
        devices: stub_devices(),
    }
}
