// Host-call interception: the guest ROM is patched so that a handful of entry
// points land on private opcodes in cartridge space, which the decoder maps to
// the handlers below instead of raising illegal-instruction. GEMDOS calls can
// then be served against a host directory, the boot-time hardware probing is
// replaced with our own answers, and VDI traps get their return vectors fixed.

use crate::instructions::InterceptKind;
use crate::memory::{Bus, Fault};
use crate::processor::{Regs, CPU};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use thiserror::Error;

// Cartridge layout: the trampoline opcodes live at fixed addresses.
pub const CART_BASE: u32 = 0xfa0000;
pub const CART_GEMDOS_OPCODE_ADDR: u32 = 0xfa0010;
pub const CART_VDI_OPCODE_ADDR: u32 = 0xfa0012;

// GEMDOS vector and functions.
const GEMDOS_VECTOR: u32 = 0x84;
const GEMDOS_CCONWS: u16 = 0x09;
const GEMDOS_DSETDRV: u16 = 0x0e;
const GEMDOS_DGETDRV: u16 = 0x19;
const GEMDOS_FCREATE: u16 = 0x3c;
const GEMDOS_FOPEN: u16 = 0x3d;
const GEMDOS_FCLOSE: u16 = 0x3e;
const GEMDOS_FREAD: u16 = 0x3f;
const GEMDOS_FWRITE: u16 = 0x40;
const GEMDOS_FDELETE: u16 = 0x41;
const GEMDOS_FSEEK: u16 = 0x42;

// GEMDOS error codes, see 'The Atari Compendium' D.3.
pub const GEMDOS_EOK: i32 = 0;
pub const GEMDOS_ERROR: i32 = -1;
pub const GEMDOS_EFILNF: i32 = -33;
pub const GEMDOS_ENHNDL: i32 = -35;
pub const GEMDOS_EACCDN: i32 = -36;
pub const GEMDOS_EIHNDL: i32 = -37;

// Our emulation handles must not collide with valid TOS ones.
pub const BASE_FILEHANDLE: u16 = 64;
pub const MAX_FILE_HANDLES: usize = 32;

// The drive letter served from the host filesystem.
const HD_DRIVE: u16 = 2;

#[derive(Debug, Error)]
pub enum TosError {
    #[error("not a valid TOS ROM image (version {version:#x}, address {address:#x})")]
    InvalidImage { version: u16, address: u32 },
    #[error("TOS image too large ({0} bytes)")]
    TooLarge(usize),
    #[error("could not read TOS image: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PatchFlag {
    Always,
    HdOn,
    HdOff,
}

struct TosPatch {
    version: u16,
    country: i16,
    name: &'static str,
    flags: PatchFlag,
    address: u32,
    old_data: u32,
    size: usize,
    new_data: &'static [u8],
}

static RTS_OPCODE: [u8; 2] = [0x4e, 0x75];
static NOP_OPCODES: [u8; 28] = [
    0x4e, 0x71, 0x4e, 0x71, 0x4e, 0x71, 0x4e, 0x71, 0x4e, 0x71, 0x4e, 0x71, 0x4e, 0x71, 0x4e,
    0x71, 0x4e, 0x71, 0x4e, 0x71, 0x4e, 0x71, 0x4e, 0x71, 0x4e, 0x71, 0x4e, 0x71,
];
static CONDRV_OPCODE: [u8; 2] = [0x00, 0x0a];
static TIMERD_OPCODE: [u8; 2] = [0x00, 0x0b];
static MOUSE_OPCODE: [u8; 2] = [0xd3, 0xc1];
static ROMCHECK_OPCODE: [u8; 4] = [0x60, 0x00, 0x00, 0x98];
static BRA_OPCODE: [u8; 1] = [0x60];

const HDV_INIT: &str = "hdv_init - initialize drives";
const HDV_BOOT: &str = "hdv_boot - load boot sector";
const DMA_BOOT: &str = "boot from DMA bus";
const SET_CON_DRV: &str = "set connected drives mask";
const CLR_CON_DRV: &str = "clear connected drives mask";
const TIMER_D: &str = "timer-D init";
const MOUSE: &str = "working mouse in big screen resolutions";
const ROM_CHECK: &str = "ROM checksum";
const NO_STE_HW: &str = "disable STE hardware access";

// Empirically discovered corrections to real TOS ROMs; addresses, expected old
// longwords and replacement bytes are carried verbatim.
static TOS_PATCHES: &[TosPatch] = &[
    TosPatch { version: 0x100, country: -1, name: HDV_INIT, flags: PatchFlag::Always, address: 0xFC0D60, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x100, country: -1, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xFC1384, old_data: 0x4EB900FC, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x100, country: -1, name: SET_CON_DRV, flags: PatchFlag::HdOn, address: 0xFC04D4, old_data: 0x4E754DF9, size: 2, new_data: &CONDRV_OPCODE },
    TosPatch { version: 0x100, country: -1, name: DMA_BOOT, flags: PatchFlag::HdOff, address: 0xFC03D6, old_data: 0x610000D0, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x100, country: -1, name: TIMER_D, flags: PatchFlag::Always, address: 0xFC21F6, old_data: 0x74026100, size: 2, new_data: &TIMERD_OPCODE },

    TosPatch { version: 0x102, country: -1, name: HDV_INIT, flags: PatchFlag::Always, address: 0xFC0F44, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x102, country: -1, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xFC1568, old_data: 0x4EB900FC, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x102, country: -1, name: SET_CON_DRV, flags: PatchFlag::HdOn, address: 0xFC0584, old_data: 0x4E754DF9, size: 2, new_data: &CONDRV_OPCODE },
    TosPatch { version: 0x102, country: -1, name: CLR_CON_DRV, flags: PatchFlag::HdOff, address: 0xFC0302, old_data: 0x42B90000, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x102, country: -1, name: DMA_BOOT, flags: PatchFlag::HdOff, address: 0xFC0472, old_data: 0x610000E4, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x102, country: -1, name: TIMER_D, flags: PatchFlag::Always, address: 0xFC2450, old_data: 0x74026100, size: 2, new_data: &TIMERD_OPCODE },
    TosPatch { version: 0x102, country: 0, name: MOUSE, flags: PatchFlag::Always, address: 0xFD0030, old_data: 0xD2C147F9, size: 2, new_data: &MOUSE_OPCODE },
    TosPatch { version: 0x102, country: 1, name: MOUSE, flags: PatchFlag::Always, address: 0xFD008A, old_data: 0xD2C147F9, size: 2, new_data: &MOUSE_OPCODE },
    TosPatch { version: 0x102, country: 2, name: MOUSE, flags: PatchFlag::Always, address: 0xFD00A8, old_data: 0xD2C147F9, size: 2, new_data: &MOUSE_OPCODE },
    TosPatch { version: 0x102, country: 3, name: MOUSE, flags: PatchFlag::Always, address: 0xFD0030, old_data: 0xD2C147F9, size: 2, new_data: &MOUSE_OPCODE },
    TosPatch { version: 0x102, country: 6, name: MOUSE, flags: PatchFlag::Always, address: 0xFCFEF0, old_data: 0xD2C147F9, size: 2, new_data: &MOUSE_OPCODE },
    TosPatch { version: 0x102, country: 8, name: MOUSE, flags: PatchFlag::Always, address: 0xFCFEFE, old_data: 0xD2C147F9, size: 2, new_data: &MOUSE_OPCODE },

    TosPatch { version: 0x104, country: -1, name: HDV_INIT, flags: PatchFlag::Always, address: 0xFC16BA, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x104, country: -1, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xFC1CCE, old_data: 0x4EB900FC, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x104, country: -1, name: SET_CON_DRV, flags: PatchFlag::HdOn, address: 0xFC0576, old_data: 0x4E757A01, size: 2, new_data: &CONDRV_OPCODE },
    TosPatch { version: 0x104, country: -1, name: CLR_CON_DRV, flags: PatchFlag::HdOff, address: 0xFC02E6, old_data: 0x42AD04C2, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x104, country: -1, name: DMA_BOOT, flags: PatchFlag::HdOff, address: 0xFC0466, old_data: 0x610000E4, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x104, country: -1, name: TIMER_D, flags: PatchFlag::Always, address: 0xFC3544, old_data: 0x74026100, size: 2, new_data: &TIMERD_OPCODE },

    TosPatch { version: 0x205, country: -1, name: SET_CON_DRV, flags: PatchFlag::HdOn, address: 0xE0081A, old_data: 0x4E752078, size: 2, new_data: &CONDRV_OPCODE },
    TosPatch { version: 0x205, country: -1, name: SET_CON_DRV, flags: PatchFlag::HdOn, address: 0xE00842, old_data: 0x4E7541F9, size: 2, new_data: &CONDRV_OPCODE },
    TosPatch { version: 0x205, country: -1, name: CLR_CON_DRV, flags: PatchFlag::HdOff, address: 0xE002FC, old_data: 0x42B804C2, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: DMA_BOOT, flags: PatchFlag::HdOff, address: 0xE006AE, old_data: 0x610000E4, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: TIMER_D, flags: PatchFlag::Always, address: 0xE01972, old_data: 0x74026100, size: 2, new_data: &TIMERD_OPCODE },
    TosPatch { version: 0x205, country: 0, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE0468C, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x205, country: 1, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE046E6, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x205, country: 2, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE04704, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x205, country: 4, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE04712, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x205, country: 5, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE046F4, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x205, country: 6, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE04704, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x205, country: 0, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE04CA0, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: 1, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE04CFA, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: 2, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE04D18, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: 4, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE04D26, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: 5, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE04D08, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: 6, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE04D18, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
    // An unpatched TOS 2.05 only works on STEs, so apply some anti-STE patches.
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE00096, old_data: 0x42788900, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE0009E, old_data: 0x31D88924, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE000A6, old_data: 0x09D10AA9, size: 28, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE003A0, old_data: 0x30389200, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE004EA, old_data: 0x61000CBC, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE00508, old_data: 0x61000C9E, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE007A0, old_data: 0x631E2F3C, size: 1, new_data: &BRA_OPCODE },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE00928, old_data: 0x10388901, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE00944, old_data: 0xB0388901, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE00950, old_data: 0x67024601, size: 1, new_data: &BRA_OPCODE },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE00968, old_data: 0x61000722, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE00CF2, old_data: 0x1038820D, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: -1, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE00E00, old_data: 0x1038820D, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: 0, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE03038, old_data: 0x31C0860E, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: 0, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE034A8, old_data: 0x31C0860E, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x205, country: 0, name: NO_STE_HW, flags: PatchFlag::Always, address: 0xE034F6, old_data: 0x31E90002, size: 6, new_data: &NOP_OPCODES },

    // Checksum is the total of the TOS ROM image, but we changed bytes in it,
    // so skip the test.
    TosPatch { version: 0x206, country: -1, name: ROM_CHECK, flags: PatchFlag::Always, address: 0xE007FA, old_data: 0x2E3C0001, size: 4, new_data: &ROMCHECK_OPCODE },
    TosPatch { version: 0x206, country: -1, name: SET_CON_DRV, flags: PatchFlag::HdOn, address: 0xE00B3E, old_data: 0x4E752078, size: 2, new_data: &CONDRV_OPCODE },
    TosPatch { version: 0x206, country: -1, name: SET_CON_DRV, flags: PatchFlag::HdOn, address: 0xE00B66, old_data: 0x4E7541F9, size: 2, new_data: &CONDRV_OPCODE },
    TosPatch { version: 0x206, country: -1, name: CLR_CON_DRV, flags: PatchFlag::HdOff, address: 0xE00362, old_data: 0x42B804C2, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x206, country: -1, name: DMA_BOOT, flags: PatchFlag::HdOff, address: 0xE00898, old_data: 0x610000E0, size: 4, new_data: &NOP_OPCODES },
    TosPatch { version: 0x206, country: -1, name: TIMER_D, flags: PatchFlag::Always, address: 0xE02250, old_data: 0x74026100, size: 2, new_data: &TIMERD_OPCODE },
    TosPatch { version: 0x206, country: 0, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE0518E, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x206, country: 1, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE051E8, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x206, country: 2, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE05206, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x206, country: 3, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE0518E, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x206, country: 6, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE05206, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x206, country: 8, name: HDV_INIT, flags: PatchFlag::Always, address: 0xE05214, old_data: 0x4E56FFF0, size: 2, new_data: &RTS_OPCODE },
    TosPatch { version: 0x206, country: 0, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE05944, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x206, country: 1, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE0599E, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x206, country: 2, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE059BC, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x206, country: 3, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE05944, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x206, country: 6, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE059BC, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
    TosPatch { version: 0x206, country: 8, name: HDV_BOOT, flags: PatchFlag::Always, address: 0xE059CA, old_data: 0x4EB900E0, size: 6, new_data: &NOP_OPCODES },
];

#[derive(Debug, Clone, Copy)]
pub struct TosInfo {
    pub version: u16,
    pub country: i16,
    pub address: u32,
    pub size: usize,
}

// Memory configurations TOS accepts without probing the MMU.
pub struct MemoryInfo {
    pub phys_top: u32,
    pub memory_config: u8,
}

pub fn memory_info(memory_size: usize) -> MemoryInfo {
    match memory_size {
        0x80000 => MemoryInfo { phys_top: 0x80000, memory_config: 0x01 },
        0x100000 => MemoryInfo { phys_top: 0x100000, memory_config: 0x05 },
        0x200000 => MemoryInfo { phys_top: 0x200000, memory_config: 0x02 },
        _ => MemoryInfo { phys_top: 0x400000, memory_config: 0x0a },
    }
}

pub struct Intercept {
    pub gemdos_dir: Option<PathBuf>,
    pub console_redirect: bool,
    pub vdi_intercept: bool,
    pub vdi_old_pc: u32,
    pub old_gemdos_vector: u32,
    pub current_drive: u16,
    pub boot_drive: u16,
    pub drive_mask: u32,
    pub tos: Option<TosInfo>,
    handles: Vec<Option<File>>,
}

impl Intercept {
    pub fn new() -> Self {
        let mut handles = Vec::with_capacity(MAX_FILE_HANDLES);
        for _ in 0..MAX_FILE_HANDLES {
            handles.push(None);
        }
        Intercept {
            gemdos_dir: None,
            console_redirect: false,
            vdi_intercept: false,
            vdi_old_pc: 0,
            old_gemdos_vector: 0,
            current_drive: 0,
            boot_drive: 0,
            drive_mask: 0x3,
            tos: None,
            handles,
        }
    }

    pub fn hd_emulation(&self) -> bool {
        self.gemdos_dir.is_some()
    }

    // Trap #2 with the VDI magic in d0 gets redirected through the cartridge.
    pub fn vdi_entry(&self, regs: &Regs) -> Option<u32> {
        if self.vdi_intercept && regs.d[0] == 0x73 {
            Some(CART_VDI_OPCODE_ADDR)
        } else {
            None
        }
    }

    // Map a guest path like "C:\AUTO\FILE.PRG" onto the emulated directory.
    fn host_path(&self, guest: &str) -> Option<PathBuf> {
        let base = self.gemdos_dir.as_ref()?;
        let (drive, rest) = if guest.len() >= 2 && guest.as_bytes()[1] == b':' {
            (
                (guest.as_bytes()[0].to_ascii_uppercase() - b'A') as u16,
                &guest[2..],
            )
        } else {
            (self.current_drive, guest)
        };
        if drive != HD_DRIVE {
            return None;
        }
        let mut path = base.clone();
        for part in rest.split('\\') {
            if !part.is_empty() {
                path.push(part);
            }
        }
        Some(path)
    }

    fn allocate_handle(&mut self, file: File) -> Option<u16> {
        for (j, slot) in self.handles.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Some(BASE_FILEHANDLE + j as u16);
            }
        }
        None
    }

    fn handle_slot(&mut self, handle: u16) -> Option<&mut Option<File>> {
        if handle < BASE_FILEHANDLE || handle >= BASE_FILEHANDLE + MAX_FILE_HANDLES as u16 {
            return None;
        }
        self.handles.get_mut((handle - BASE_FILEHANDLE) as usize)
    }
}

// Load the TOS image into ROM, mirror its reset vectors, apply the patch table
// and seed the cartridge trampoline. Pre-1.06 images live at 0xfc0000, later
// ones at 0xe00000.
pub fn load_tos(bus: &mut Bus, intercept: &mut Intercept, image: &[u8]) -> Result<TosInfo, TosError> {
    if image.len() > 1024 * 1024 {
        return Err(TosError::TooLarge(image.len()));
    }
    let mut image = image;
    let mut version = read_word(image, 2);
    let mut address = read_long(image, 8);
    if !(0x100..0x500).contains(&version) && image.len() > 0x100 {
        // Some images carry a 0x100 byte header.
        image = &image[0x100..];
        version = read_word(image, 2);
        address = read_long(image, 8);
    }
    if !(0x100..0x500).contains(&version) || (address != 0xe00000 && address != 0xfc0000) {
        return Err(TosError::InvalidImage { version, address });
    }

    bus.rom = image.to_vec();
    bus.rom_base = address;
    bus.install_banks();

    let country = (read_word(image, 28) >> 1) as i16;
    let info = TosInfo { version, country, address, size: image.len() };

    // EmuTOS can not be patched.
    if read_long(image, 0x2c) == 0x45544f53 {
        log::info!("detected EmuTOS, skipping TOS patches");
    } else {
        fix_rom(bus, intercept, &info);
    }

    // Mirror the ROM reset vectors at 0 and 4.
    for j in 0..8 {
        bus.ram[j] = bus.rom[j];
    }

    init_cartridge(bus);

    intercept.tos = Some(info);
    Ok(info)
}

// Seed the cartridge trampoline; runs at machine setup whether or not an OS
// image is present.
pub fn init_cartridge(bus: &mut Bus) {
    write_cart_word(bus, CART_GEMDOS_OPCODE_ADDR, 0x0008);
    write_cart_word(bus, CART_VDI_OPCODE_ADDR, 0x000c);
}

fn fix_rom(bus: &mut Bus, intercept: &Intercept, info: &TosInfo) {
    let hd_is_on = intercept.hd_emulation();
    let mut good = 0;
    let mut bad = 0;
    for patch in TOS_PATCHES {
        if patch.version != info.version || (patch.country != info.country && patch.country != -1) {
            continue;
        }
        let offset = (patch.address - info.address) as usize;
        if offset + 4 > bus.rom.len() {
            bad += 1;
            continue;
        }
        if read_long(&bus.rom, offset) == patch.old_data {
            let wanted = match patch.flags {
                PatchFlag::Always => true,
                PatchFlag::HdOn => hd_is_on,
                PatchFlag::HdOff => !hd_is_on,
            };
            if wanted {
                bus.rom[offset..offset + patch.size].copy_from_slice(&patch.new_data[..patch.size]);
            }
            good += 1;
        } else {
            log::warn!(
                "failed to apply TOS patch '{}' at ${:06x} (expected ${:08x}, found ${:08x})",
                patch.name,
                patch.address,
                patch.old_data,
                read_long(&bus.rom, offset)
            );
            bad += 1;
        }
    }
    log::info!("applied {} TOS patches, {} patches failed", good, bad);
}

fn read_word(buffer: &[u8], offset: usize) -> u16 {
    (buffer[offset] as u16) << 8 | buffer[offset + 1] as u16
}

fn read_long(buffer: &[u8], offset: usize) -> u32 {
    (read_word(buffer, offset) as u32) << 16 | read_word(buffer, offset + 2) as u32
}

fn write_cart_word(bus: &mut Bus, address: u32, value: u16) {
    let offset = (address - CART_BASE) as usize;
    bus.cartridge[offset] = (value >> 8) as u8;
    bus.cartridge[offset + 1] = value as u8;
}

pub fn dispatch(cpu: &mut CPU, kind: InterceptKind) -> Result<u32, Fault> {
    match kind {
        InterceptKind::GemDos => opcode_gemdos(cpu),
        InterceptKind::SysInit => opcode_sysinit(cpu),
        InterceptKind::Vdi => opcode_vdi(cpu),
        InterceptKind::TimerD => opcode_timerd(cpu),
    }
}

// The GEMDOS trampoline: trap #1 lands here once the boot patch rerouted the
// vector. Calls we serve return straight to the caller; everything else
// continues into the ROM handler.
fn opcode_gemdos(cpu: &mut CPU) -> Result<u32, Fault> {
    let sp = cpu.regs.a[7];
    let sr = cpu.bus.read_word(sp)?;
    let return_pc = cpu.bus.read_long(sp.wrapping_add(2))?;
    // Parameters sit on the stack of the caller.
    let params = if sr & 0x2000 == 0 { cpu.regs.usp } else { sp.wrapping_add(6) };
    let function = cpu.bus.read_word(params)?;

    let result = gemdos_call(cpu, function, params)?;

    match result {
        Some(d0) => {
            cpu.regs.d[0] = d0 as u32;
            // Return from exception on the caller's behalf.
            cpu.regs.a[7] = sp.wrapping_add(6);
            cpu.regs.sr = sr;
            cpu.make_from_sr();
            cpu.regs.pc = return_pc;
            cpu.refill_prefetch(return_pc);
            Ok(40)
        }
        None => {
            let vector = cpu.intercept.old_gemdos_vector;
            cpu.regs.pc = vector;
            cpu.refill_prefetch(vector);
            Ok(8)
        }
    }
}

fn gemdos_call(cpu: &mut CPU, function: u16, params: u32) -> Result<Option<i32>, Fault> {
    match function {
        GEMDOS_CCONWS => {
            let ptr = cpu.bus.read_long(params.wrapping_add(2))?;
            let text = read_guest_string(cpu, ptr)?;
            log::info!(target: "gemdos", "Cconws: {}", text);
            if cpu.intercept.console_redirect {
                print!("{}", text);
                return Ok(Some(GEMDOS_EOK));
            }
            Ok(None)
        }
        GEMDOS_DSETDRV => {
            if !cpu.intercept.hd_emulation() {
                return Ok(None);
            }
            let drive = cpu.bus.read_word(params.wrapping_add(2))?;
            cpu.intercept.current_drive = drive;
            Ok(Some(cpu.intercept.drive_mask as i32))
        }
        GEMDOS_DGETDRV => {
            if !cpu.intercept.hd_emulation() {
                return Ok(None);
            }
            Ok(Some(cpu.intercept.current_drive as i32))
        }
        GEMDOS_FCREATE => {
            let ptr = cpu.bus.read_long(params.wrapping_add(2))?;
            let name = read_guest_string(cpu, ptr)?;
            let path = match cpu.intercept.host_path(&name) {
                Some(path) => path,
                None => return Ok(None),
            };
            match OpenOptions::new().write(true).create(true).truncate(true).open(&path) {
                Ok(file) => match cpu.intercept.allocate_handle(file) {
                    Some(handle) => Ok(Some(handle as i32)),
                    None => Ok(Some(GEMDOS_ENHNDL)),
                },
                Err(_) => Ok(Some(GEMDOS_EACCDN)),
            }
        }
        GEMDOS_FOPEN => {
            let ptr = cpu.bus.read_long(params.wrapping_add(2))?;
            let mode = cpu.bus.read_word(params.wrapping_add(6))?;
            let name = read_guest_string(cpu, ptr)?;
            let path = match cpu.intercept.host_path(&name) {
                Some(path) => path,
                None => return Ok(None),
            };
            let mut options = OpenOptions::new();
            match mode & 3 {
                0 => options.read(true),
                1 => options.write(true),
                _ => options.read(true).write(true),
            };
            match options.open(&path) {
                Ok(file) => match cpu.intercept.allocate_handle(file) {
                    Some(handle) => Ok(Some(handle as i32)),
                    None => Ok(Some(GEMDOS_ENHNDL)),
                },
                Err(_) => Ok(Some(GEMDOS_EFILNF)),
            }
        }
        GEMDOS_FCLOSE => {
            let handle = cpu.bus.read_word(params.wrapping_add(2))?;
            match cpu.intercept.handle_slot(handle) {
                Some(slot) => {
                    if slot.take().is_some() {
                        Ok(Some(GEMDOS_EOK))
                    } else {
                        Ok(Some(GEMDOS_EIHNDL))
                    }
                }
                None => Ok(None),
            }
        }
        GEMDOS_FREAD => {
            let handle = cpu.bus.read_word(params.wrapping_add(2))?;
            let count = cpu.bus.read_long(params.wrapping_add(4))?;
            let buffer = cpu.bus.read_long(params.wrapping_add(8))?;
            let mut data = vec![0u8; count as usize];
            let read = match cpu.intercept.handle_slot(handle) {
                Some(Some(file)) => match file.read(&mut data) {
                    Ok(n) => n,
                    Err(_) => return Ok(Some(GEMDOS_ERROR)),
                },
                Some(None) => return Ok(Some(GEMDOS_EIHNDL)),
                None => return Ok(None),
            };
            for (j, &byte) in data[..read].iter().enumerate() {
                cpu.bus.write_byte(buffer.wrapping_add(j as u32), byte)?;
            }
            Ok(Some(read as i32))
        }
        GEMDOS_FWRITE => {
            let handle = cpu.bus.read_word(params.wrapping_add(2))?;
            let count = cpu.bus.read_long(params.wrapping_add(4))?;
            let buffer = cpu.bus.read_long(params.wrapping_add(8))?;
            let mut data = Vec::with_capacity(count as usize);
            for j in 0..count {
                data.push(cpu.bus.read_byte(buffer.wrapping_add(j))?);
            }
            match cpu.intercept.handle_slot(handle) {
                Some(Some(file)) => match file.write(&data) {
                    Ok(n) => Ok(Some(n as i32)),
                    Err(_) => Ok(Some(GEMDOS_ERROR)),
                },
                Some(None) => Ok(Some(GEMDOS_EIHNDL)),
                None => Ok(None),
            }
        }
        GEMDOS_FDELETE => {
            let ptr = cpu.bus.read_long(params.wrapping_add(2))?;
            let name = read_guest_string(cpu, ptr)?;
            let path = match cpu.intercept.host_path(&name) {
                Some(path) => path,
                None => return Ok(None),
            };
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(Some(GEMDOS_EOK)),
                Err(_) => Ok(Some(GEMDOS_EFILNF)),
            }
        }
        GEMDOS_FSEEK => {
            let offset = cpu.bus.read_long(params.wrapping_add(2))? as i32;
            let handle = cpu.bus.read_word(params.wrapping_add(6))?;
            let mode = cpu.bus.read_word(params.wrapping_add(8))?;
            match cpu.intercept.handle_slot(handle) {
                Some(Some(file)) => {
                    let seek = match mode {
                        0 => SeekFrom::Start(offset as u32 as u64),
                        1 => SeekFrom::Current(offset as i64),
                        _ => SeekFrom::End(offset as i64),
                    };
                    match file.seek(seek) {
                        Ok(position) => Ok(Some(position as i32)),
                        Err(_) => Ok(Some(GEMDOS_ERROR)),
                    }
                }
                Some(None) => Ok(Some(GEMDOS_EIHNDL)),
                None => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

// Boot-time fixup, run in place of the ROM's hardware probing. Writes the
// memory configuration the ROM would otherwise detect, then returns like the
// RTS we replaced.
fn opcode_sysinit(cpu: &mut CPU) -> Result<u32, Fault> {
    let info = memory_info(cpu.bus.ram.len());

    // Magic numbers so TOS does not reference the MMU.
    cpu.bus.write_long(0x420, 0x752019f3)?;
    cpu.bus.write_long(0x43a, 0x237698aa)?;
    cpu.bus.write_long(0x51a, 0x5555aaaa)?;

    // Memory top and physical top.
    cpu.bus.write_long(0x436, info.phys_top - 0x8000)?;
    cpu.bus.write_long(0x42e, info.phys_top)?;
    cpu.bus.write_byte(0x424, info.memory_config)?;
    let _ = cpu.bus.write_byte(0xff8001, info.memory_config);

    // Boot drive, connected floppies and drive bits.
    let boot_drive = cpu.intercept.boot_drive;
    cpu.bus.write_word(0x446, boot_drive)?;
    cpu.bus.write_word(0x4a6, 0x2)?;
    let drive_mask = cpu.intercept.drive_mask;
    cpu.bus.write_long(0x4c2, drive_mask)?;

    // Reroute the GEMDOS vector through the cartridge.
    if cpu.intercept.hd_emulation() {
        cpu.intercept.old_gemdos_vector = cpu.bus.read_long(GEMDOS_VECTOR)?;
        cpu.bus.write_long(GEMDOS_VECTOR, CART_GEMDOS_OPCODE_ADDR)?;
        cpu.intercept.current_drive = HD_DRIVE;
    }

    // The patch replaced an RTS.
    cpu.regs.pc = cpu.pop_long()?;
    cpu.refill_prefetch(cpu.regs.pc);
    Ok(16)
}

// Runs after the ROM's trap #2 handler returned through the cartridge; puts
// the guest back where the VDI call came from.
fn opcode_vdi(cpu: &mut CPU) -> Result<u32, Fault> {
    let pc = cpu.intercept.vdi_old_pc;
    log::debug!("VDI call completed, returning to ${:06x}", pc);
    cpu.regs.pc = pc;
    cpu.refill_prefetch(pc);
    Ok(4)
}

// Replaces the "moveq #2,d2" of the Timer D setup with a slower prescaler so
// the 200 Hz timer does not swamp the scheduler.
fn opcode_timerd(cpu: &mut CPU) -> Result<u32, Fault> {
    cpu.regs.d[2] = 7;
    Ok(4)
}

fn read_guest_string(cpu: &mut CPU, mut address: u32) -> Result<String, Fault> {
    let mut text = String::new();
    loop {
        let byte = cpu.bus.read_byte(address)?;
        if byte == 0 || text.len() > 255 {
            break;
        }
        text.push(byte as char);
        address = address.wrapping_add(1);
    }
    Ok(text)
}
