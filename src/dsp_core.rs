// DSP56001 core state: register file, the three memory spaces, hardware stack,
// peripheral page and the host-port registers both sides of the fence. The
// interpreter itself lives in dsp_cpu.rs, the 68k-facing bridge in dsp.rs.

use std::f64::consts::PI;

pub const DSP_RAMSIZE: usize = 32768;

// Register numbering matches the 6-bit register field of the instruction set.
pub const REG_NULL: usize = 0x00;
pub const REG_X0: usize = 0x04;
pub const REG_X1: usize = 0x05;
pub const REG_Y0: usize = 0x06;
pub const REG_Y1: usize = 0x07;
pub const REG_A0: usize = 0x08;
pub const REG_B0: usize = 0x09;
pub const REG_A2: usize = 0x0a;
pub const REG_B2: usize = 0x0b;
pub const REG_A1: usize = 0x0c;
pub const REG_B1: usize = 0x0d;
pub const REG_A: usize = 0x0e;
pub const REG_B: usize = 0x0f;
pub const REG_R0: usize = 0x10;
pub const REG_N0: usize = 0x18;
pub const REG_M0: usize = 0x20;
pub const REG_LCSAVE: usize = 0x30;
pub const REG_SR: usize = 0x39;
pub const REG_OMR: usize = 0x3a;
pub const REG_SP: usize = 0x3b;
pub const REG_SSH: usize = 0x3c;
pub const REG_SSL: usize = 0x3d;
pub const REG_LA: usize = 0x3e;
pub const REG_LC: usize = 0x3f;

// Effective register widths in bits; 0 means unassigned.
pub const REGISTER_MASK_BITS: [u32; 64] = [
    0, 0, 0, 0,
    24, 24, 24, 24,
    24, 24, 8, 8,
    24, 24, 24, 24,
    16, 16, 16, 16,
    16, 16, 16, 16,
    16, 16, 16, 16,
    16, 16, 16, 16,
    16, 16, 16, 16,
    16, 16, 16, 16,
    0, 0, 0, 0,
    0, 0, 0, 0,
    0, 0, 0, 0,
    0, 0, 0, 0,
    0, 16, 8, 6,
    16, 16, 16, 16,
];

// Status register bits.
pub const SR_C: u32 = 0;
pub const SR_V: u32 = 1;
pub const SR_Z: u32 = 2;
pub const SR_N: u32 = 3;
pub const SR_U: u32 = 4;
pub const SR_E: u32 = 5;
pub const SR_L: u32 = 6;
pub const SR_I0: u32 = 8;
pub const SR_I1: u32 = 9;
pub const SR_S0: u32 = 10;
pub const SR_S1: u32 = 11;
pub const SR_T: u32 = 13;
pub const SR_LF: u32 = 15;

// Stack pointer flag bits.
pub const SP_SE: u32 = 4;
pub const SP_UF: u32 = 5;

// Operating mode register: data ROM enable.
pub const OMR_DE: u32 = 2;

// Memory spaces.
pub const SPACE_X: usize = 0;
pub const SPACE_Y: usize = 1;
pub const SPACE_P: usize = 2;

// Host port, CPU side (byte registers).
pub const CPU_HOST_ICR: usize = 0x00;
pub const CPU_HOST_CVR: usize = 0x01;
pub const CPU_HOST_ISR: usize = 0x02;
pub const CPU_HOST_IVR: usize = 0x03;
pub const CPU_HOST_RX0: usize = 0x04;
pub const CPU_HOST_RXH: usize = 0x05;
pub const CPU_HOST_RXM: usize = 0x06;
pub const CPU_HOST_RXL: usize = 0x07;
pub const CPU_HOST_TXH: usize = 0x09;
pub const CPU_HOST_TXM: usize = 0x0a;
pub const CPU_HOST_TXL: usize = 0x0b;

pub const CPU_HOST_ICR_RREQ: u32 = 0;
pub const CPU_HOST_ICR_TREQ: u32 = 1;
pub const CPU_HOST_ICR_HF0: u32 = 3;
pub const CPU_HOST_ICR_HF1: u32 = 4;

pub const CPU_HOST_CVR_HC: u32 = 7;

pub const CPU_HOST_ISR_RXDF: u32 = 0;
pub const CPU_HOST_ISR_TXDE: u32 = 1;
pub const CPU_HOST_ISR_TRDY: u32 = 2;
pub const CPU_HOST_ISR_HF2: u32 = 3;
pub const CPU_HOST_ISR_HF3: u32 = 4;
pub const CPU_HOST_ISR_HREQ: u32 = 7;

// Peripheral page, DSP side; addresses are [x|y]:0xffc0+offset.
pub const DSP_PBC: usize = 0x20;
pub const DSP_PCC: usize = 0x21;
pub const DSP_PBDDR: usize = 0x22;
pub const DSP_PCDDR: usize = 0x23;
pub const DSP_PBD: usize = 0x24;
pub const DSP_PCD: usize = 0x25;
pub const DSP_HOST_HCR: usize = 0x28;
pub const DSP_HOST_HSR: usize = 0x29;
pub const DSP_HOST_HRX: usize = 0x2b;
pub const DSP_HOST_HTX: usize = 0x2b;
pub const DSP_SSI_CRA: usize = 0x2c;
pub const DSP_SSI_CRB: usize = 0x2d;
pub const DSP_SSI_SR: usize = 0x2e;
pub const DSP_SSI_TSR: usize = 0x2e;
pub const DSP_SSI_RX: usize = 0x2f;
pub const DSP_SSI_TX: usize = 0x2f;
pub const DSP_SCI_SCR: usize = 0x30;
pub const DSP_SCI_SSR: usize = 0x31;
pub const DSP_SCI_SCCR: usize = 0x32;
pub const DSP_BCR: usize = 0x3e;
pub const DSP_IPR: usize = 0x3f;

pub const DSP_HOST_HCR_HRIE: u32 = 0;
pub const DSP_HOST_HCR_HTIE: u32 = 1;
pub const DSP_HOST_HCR_HCIE: u32 = 2;
pub const DSP_HOST_HCR_HF2: u32 = 3;
pub const DSP_HOST_HCR_HF3: u32 = 4;

pub const DSP_HOST_HSR_HRDF: u32 = 0;
pub const DSP_HOST_HSR_HTDE: u32 = 1;
pub const DSP_HOST_HSR_HCP: u32 = 2;
pub const DSP_HOST_HSR_HF0: u32 = 3;
pub const DSP_HOST_HSR_HF1: u32 = 4;

pub const DSP_SSI_CRA_DC0: u32 = 0x8;
pub const DSP_SSI_CRA_WL0: u32 = 0xd;

pub const DSP_SSI_CRB_SCKD: u32 = 0x5;
pub const DSP_SSI_CRB_SHFD: u32 = 0x6;
pub const DSP_SSI_CRB_SYN: u32 = 0x9;
pub const DSP_SSI_CRB_MOD: u32 = 0xb;
pub const DSP_SSI_CRB_TE: u32 = 0xc;
pub const DSP_SSI_CRB_RE: u32 = 0xd;
pub const DSP_SSI_CRB_TIE: u32 = 0xe;
pub const DSP_SSI_CRB_RIE: u32 = 0xf;

pub const DSP_SSI_SR_TFS: u32 = 0x2;
pub const DSP_SSI_SR_TDE: u32 = 0x6;
pub const DSP_SSI_SR_RDF: u32 = 0x7;

// Interrupt numbers.
pub const INTER_RESET: usize = 0;
pub const INTER_STACK_ERROR: usize = 1;
pub const INTER_TRACE: usize = 2;
pub const INTER_SWI: usize = 3;
pub const INTER_IRQA: usize = 4;
pub const INTER_IRQB: usize = 5;
pub const INTER_SSI_RCV_DATA: usize = 6;
pub const INTER_SSI_RCV_DATA_E: usize = 7;
pub const INTER_SSI_TRX_DATA: usize = 8;
pub const INTER_SSI_TRX_DATA_E: usize = 9;
pub const INTER_SCI_RCV_DATA: usize = 10;
pub const INTER_SCI_RCV_DATA_E: usize = 11;
pub const INTER_SCI_TRX_DATA: usize = 12;
pub const INTER_SCI_IDLE_LINE: usize = 13;
pub const INTER_SCI_TIMER: usize = 14;
pub const INTER_NMI: usize = 15;
pub const INTER_HOST_RCV_DATA: usize = 16;
pub const INTER_HOST_TRX_DATA: usize = 17;
pub const INTER_HOST_COMMAND: usize = 18;
pub const INTER_ILLEGAL: usize = 31;

pub const INTER_NMI_MASK: u32 = 0x8000_800f;
pub const INTER_IRQA_MASK: u32 = 0x0000_0010;
pub const INTER_IRQB_MASK: u32 = 0x0000_0020;
pub const INTER_SSI_MASK: u32 = 0x0000_03c0;
pub const INTER_SCI_MASK: u32 = 0x0000_7c00;
pub const INTER_HOST_MASK: u32 = 0x0007_0000;
pub const INTER_EDGE_MASK: u32 = 0x8004_c00e;

pub const PRIORITY_LIST_EXIT: usize = 32;

// Static interrupt priority chain: entry i names the next-lower-priority
// interrupt after i, terminated by the exit sentinel.
pub const INTER_PRIORITY_LIST: [usize; 32] = [
    INTER_ILLEGAL, INTER_TRACE, INTER_SWI, INTER_IRQA,
    INTER_IRQB, INTER_HOST_COMMAND, INTER_SSI_TRX_DATA_E, INTER_SSI_RCV_DATA,
    INTER_SCI_RCV_DATA_E, INTER_SSI_TRX_DATA, INTER_SCI_TRX_DATA, INTER_SCI_RCV_DATA,
    INTER_SCI_IDLE_LINE, INTER_SCI_TIMER, PRIORITY_LIST_EXIT, INTER_STACK_ERROR,
    INTER_HOST_TRX_DATA, INTER_SSI_RCV_DATA_E, INTER_HOST_RCV_DATA, 0,
    0, 0, 0, 0,
    0, 0, 0, 0,
    0, 0, 0, INTER_NMI,
];

pub const INTERRUPT_NAMES: [&str; 32] = [
    "Reset", "Stack Error", "Trace", "SWI",
    "IRQA", "IRQB", "SSI Receive Data", "SSI Receive Data with Exception",
    "SSI Transmit Data", "SSI Transmit Data with Exception", "SCI Receive Data", "SCI Receive Data with Exception",
    "SCI Transmit Data", "SCI Idle Line", "SCI Timer", "NMI",
    "Host Receive Data", "Host Transmit Data", "Host Command", "Unknown",
    "Unknown", "Unknown", "Unknown", "Unknown",
    "Unknown", "Unknown", "Unknown", "Unknown",
    "Unknown", "Unknown", "Unknown", "Illegal",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterruptState {
    None,
    Disabled,
    Long,
}

// What stalled the interpreter mid-handshake; the instruction is re-run once
// the host side acts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitRequest {
    HostRead,
    HostWrite,
}

#[derive(Default)]
pub struct SsiState {
    pub cra_word_length: u16,
    pub cra_word_mask: u32,
    pub cra_frame_rate_divider: u16,
    pub crb_src_clock: u16,
    pub crb_shifter: u16,
    pub crb_synchro: u16,
    pub crb_mode: u16,
    pub crb_te: u16,
    pub crb_re: u16,
    pub crb_tie: u16,
    pub crb_rie: u16,
    pub tx: u32,
    pub rx: u32,
    pub transmit_value: u32,
    pub received_value: u32,
    pub wait_frame: u16,
    pub slot_in_frame: u16,
}

pub struct DspCore {
    pub pc: u16,
    pub registers: [u32; 64],

    // stack[0] is the SSH column, stack[1] the SSL column.
    pub stack: [[u16; 16]; 2],

    // External RAM, mapped to p: with x:/y: aliased onto its halves.
    pub ramext: Vec<u32>,
    // rom[0] is x:, rom[1] is y:.
    pub rom: [[u32; 512]; 2],
    // Internal ram[0] is x:, [1] is y:, [2] is p:.
    pub ramint: [[u32; 512]; 3],

    // Peripheral page, [x|y]:0xffc0-0xffff.
    pub periph: [[u32; 64]; 2],
    pub dsp_host_htx: u32,
    pub dsp_host_rtx: u32,

    // Host port, CPU side.
    pub hostport: [u8; 12],

    pub ssi: SsiState,

    pub loop_rep: bool,
    pub pc_on_rep: bool,

    pub bootstrap_pos: u16,
    pub bootstrap_accum: u32,

    pub interrupt_state: InterruptState,
    pub interrupt_instr_fetch: u16,
    pub interrupt_save_pc: u16,
    pub interrupt_ipl_to_raise: u16,
    pub interrupt_pipeline_count: u16,

    pub interrupt_status: u32,
    pub interrupt_enable: u32,
    pub interrupt_mask: u32,
    pub interrupt_mask_level: [u32; 3],
    pub interrupt_edgetriggered_mask: u32,

    // Per-instruction interpreter scratch.
    pub cur_inst: u32,
    pub cur_inst_len: u16,
    pub instr_cycle: u16,
    pub access_to_ext_memory: u16,
    pub wait_request: Option<WaitRequest>,
}

impl DspCore {
    pub fn new() -> Self {
        let mut core = DspCore {
            pc: 0,
            registers: [0; 64],
            stack: [[0; 16]; 2],
            ramext: vec![0; DSP_RAMSIZE],
            rom: [[0; 512]; 2],
            ramint: [[0; 512]; 3],
            periph: [[0; 64]; 2],
            dsp_host_htx: 0,
            dsp_host_rtx: 0,
            hostport: [0; 12],
            ssi: SsiState::default(),
            loop_rep: false,
            pc_on_rep: false,
            bootstrap_pos: 0,
            bootstrap_accum: 0,
            interrupt_state: InterruptState::None,
            interrupt_instr_fetch: 0,
            interrupt_save_pc: 0,
            interrupt_ipl_to_raise: 0,
            interrupt_pipeline_count: 0,
            interrupt_status: 0,
            interrupt_enable: 0,
            interrupt_mask: 0,
            interrupt_mask_level: [0; 3],
            interrupt_edgetriggered_mask: INTER_EDGE_MASK,
            cur_inst: 0,
            cur_inst_len: 0,
            instr_cycle: 0,
            access_to_ext_memory: 0,
            wait_request: None,
        };
        core.init_rom_tables();
        core
    }

    // Y:rom 0x100-0x1ff holds a full-wave sine table, X:rom 0x100-0x17f the
    // mu-law expansion table and X:rom 0x180-0x1ff the A-law table.
    fn init_rom_tables(&mut self) {
        for i in 0..256usize {
            let src = (i as f64) * PI / 128.0;
            let mut dest = (src.sin() * 8388608.0) as i64;
            if dest > 8388607 {
                dest = 8388607;
            } else if dest < -8388608 {
                dest = -8388608;
            }
            self.rom[SPACE_Y][0x100 + i] = (dest as u32) & 0x00ff_ffff;
        }

        let mulaw_base: [u16; 8] = [0x7d7c, 0x3e7c, 0x1efc, 0x0f3c, 0x075c, 0x036c, 0x0174, 0x0078];
        let mut position = 0x100usize;
        let mut offset = 0x040000u32;
        for &base in mulaw_base.iter() {
            let mut value = (base as u32) << 8;
            for _ in 0..16 {
                self.rom[SPACE_X][position] = value;
                position += 1;
                value = value.wrapping_sub(offset);
            }
            offset >>= 1;
        }

        let multiply_base: [i32; 8] = [0x1580, 0x0ac0, 0x5600, 0x2b00, 0x1580, 0x0058, 0x0560, 0x02b0];
        let multiply_col: [i32; 4] = [0x10, 0x01, 0x04, 0x02];
        let multiply_line: [i32; 4] = [0x40, 0x04, 0x10, 0x08];
        let base_values: [i32; 4] = [0, -1, 2, 1];
        let mut pos = 0x180usize;
        for i in 0..8usize {
            let alawbase = multiply_base[i] << 8;
            for j in 0..4usize {
                let alawbase1 = alawbase + ((base_values[j] * multiply_line[i & 3]) << 12);
                for k in 0..4usize {
                    let alawbase2 = alawbase1 + ((base_values[k] * multiply_col[i & 3]) << 12);
                    self.rom[SPACE_X][pos] = alawbase2 as u32;
                    pos += 1;
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.periph = [[0; 64]; 2];
        self.stack = [[0; 16]; 2];
        self.registers = [0; 64];
        self.dsp_host_rtx = 0;
        self.dsp_host_htx = 0;

        self.bootstrap_pos = 0;
        self.bootstrap_accum = 0;

        self.pc = 0;
        self.registers[REG_OMR] = 0x02;
        for i in 0..8 {
            self.registers[REG_M0 + i] = 0xffff;
        }

        self.interrupt_state = InterruptState::None;
        self.interrupt_instr_fetch = 0;
        self.interrupt_save_pc = 0;
        self.interrupt_pipeline_count = 0;
        self.interrupt_status = 0;
        self.interrupt_enable = 0;
        self.interrupt_mask = 0;
        self.interrupt_mask_level = [0; 3];
        self.interrupt_edgetriggered_mask = INTER_EDGE_MASK;

        // Host port init, DSP side.
        self.periph[SPACE_X][DSP_HOST_HSR] = 1 << DSP_HOST_HSR_HTDE;

        // Host port init, CPU side.
        self.hostport = [0; 12];
        self.hostport[CPU_HOST_CVR] = 0x12;
        self.hostport[CPU_HOST_ISR] = (1 << CPU_HOST_ISR_TRDY) | (1 << CPU_HOST_ISR_TXDE);
        self.hostport[CPU_HOST_IVR] = 0x0f;

        // SSI registers.
        self.periph[SPACE_X][DSP_SSI_SR] = 1 << DSP_SSI_SR_TDE;
        self.ssi = SsiState::default();
        self.ssi.wait_frame = 1;

        // Other hardware registers.
        self.periph[SPACE_X][DSP_IPR] = 0;
        self.periph[SPACE_X][DSP_BCR] = 0xffff;

        self.loop_rep = false;
        self.pc_on_rep = false;
        self.wait_request = None;
    }

    // ---- interrupt plumbing ----

    pub fn set_interrupt(&mut self, inter: usize, set: bool) {
        if set {
            self.interrupt_status |= 1 << inter;
        } else {
            self.interrupt_status &= !(1 << inter);
        }
    }

    pub fn set_interrupt_mask(&mut self, inter: usize, set: bool) {
        if set {
            self.interrupt_mask |= 1 << inter;
        } else {
            self.interrupt_mask &= !(1 << inter);
        }
    }

    pub fn set_interrupt_ipl(&mut self, value: u32) {
        let ipl_irqa = value & 3;
        let ipl_irqb = (value >> 3) & 3;
        let ipl_hi = (value >> 10) & 3;
        let ipl_ssi = (value >> 12) & 3;
        let ipl_sci = (value >> 14) & 3;

        self.interrupt_enable = 0;
        self.interrupt_mask_level = [0; 3];
        self.interrupt_edgetriggered_mask = INTER_EDGE_MASK;

        if ipl_irqa != 0 {
            self.interrupt_enable |= INTER_IRQA_MASK;
            self.interrupt_mask_level[(ipl_irqa - 1) as usize] |= INTER_IRQA_MASK;
        }
        if ipl_irqb != 0 {
            self.interrupt_enable |= INTER_IRQB_MASK;
            self.interrupt_mask_level[(ipl_irqb - 1) as usize] |= INTER_IRQB_MASK;
        }
        if ipl_hi != 0 {
            self.interrupt_enable |= INTER_HOST_MASK;
            self.interrupt_mask_level[(ipl_hi - 1) as usize] |= INTER_HOST_MASK;
        }
        if ipl_ssi != 0 {
            self.interrupt_enable |= INTER_SSI_MASK;
            self.interrupt_mask_level[(ipl_ssi - 1) as usize] |= INTER_SSI_MASK;
        }
        if ipl_sci != 0 {
            self.interrupt_enable |= INTER_SCI_MASK;
            self.interrupt_mask_level[(ipl_sci - 1) as usize] |= INTER_SCI_MASK;
        }

        if value & 0x04 != 0 {
            self.interrupt_edgetriggered_mask |= INTER_IRQA_MASK;
        }
        if value & 0x20 != 0 {
            self.interrupt_edgetriggered_mask |= INTER_IRQB_MASK;
        }
    }

    // ---- host port, shared flag machinery ----

    pub fn hostport_update_trdy(&mut self) {
        self.hostport[CPU_HOST_ISR] &= !(1 << CPU_HOST_ISR_TRDY);
        let txde = (self.hostport[CPU_HOST_ISR] >> CPU_HOST_ISR_TXDE) & 1;
        let hrdf = ((self.periph[SPACE_X][DSP_HOST_HSR] >> DSP_HOST_HSR_HRDF) & 1) as u8;
        let trdy = txde & !hrdf;
        self.hostport[CPU_HOST_ISR] |= (trdy & 1) << CPU_HOST_ISR_TRDY;
    }

    pub fn hostport_update_hreq(&mut self) {
        let hreq = (self.hostport[CPU_HOST_ICR] & 0x3) & (self.hostport[CPU_HOST_ISR] & 0x3);
        self.hostport[CPU_HOST_ISR] &= 0x7f;
        self.hostport[CPU_HOST_ISR] |= (if hreq != 0 { 1u8 } else { 0 }) << CPU_HOST_ISR_HREQ;
    }

    // Host port transfer, DSP -> host.
    pub fn dsp2host(&mut self) {
        // RXDF set: the host has not read the last value yet.
        if self.hostport[CPU_HOST_ISR] & (1 << CPU_HOST_ISR_RXDF) != 0 {
            return;
        }
        // HTDE set: nothing waiting on the DSP side.
        if self.periph[SPACE_X][DSP_HOST_HSR] & (1 << DSP_HOST_HSR_HTDE) != 0 {
            return;
        }

        self.hostport[CPU_HOST_RXL] = self.dsp_host_htx as u8;
        self.hostport[CPU_HOST_RXM] = (self.dsp_host_htx >> 8) as u8;
        self.hostport[CPU_HOST_RXH] = (self.dsp_host_htx >> 16) as u8;

        self.periph[SPACE_X][DSP_HOST_HSR] |= 1 << DSP_HOST_HSR_HTDE;

        if self.periph[SPACE_X][DSP_HOST_HCR] & (1 << DSP_HOST_HCR_HTIE) != 0 {
            self.set_interrupt(INTER_HOST_TRX_DATA, true);
        }

        self.hostport[CPU_HOST_ISR] |= 1 << CPU_HOST_ISR_RXDF;
        self.hostport_update_hreq();
        log::trace!("dsp: (d->h) transfer ${:06x}", self.dsp_host_htx);
    }

    // Host port transfer, host -> DSP.
    pub fn host2dsp(&mut self) {
        // TXDE set: nothing waiting on the host side.
        if self.hostport[CPU_HOST_ISR] & (1 << CPU_HOST_ISR_TXDE) != 0 {
            return;
        }
        // HRDF set: the DSP has not read the last value yet.
        if self.periph[SPACE_X][DSP_HOST_HSR] & (1 << DSP_HOST_HSR_HRDF) != 0 {
            return;
        }

        self.dsp_host_rtx = self.hostport[CPU_HOST_TXL] as u32
            | (self.hostport[CPU_HOST_TXM] as u32) << 8
            | (self.hostport[CPU_HOST_TXH] as u32) << 16;

        self.periph[SPACE_X][DSP_HOST_HSR] |= 1 << DSP_HOST_HSR_HRDF;

        if self.periph[SPACE_X][DSP_HOST_HCR] & (1 << DSP_HOST_HCR_HRIE) != 0 {
            self.set_interrupt(INTER_HOST_RCV_DATA, true);
        }

        self.hostport[CPU_HOST_ISR] |= 1 << CPU_HOST_ISR_TXDE;
        self.hostport_update_hreq();
        self.hostport_update_trdy();
        log::trace!("dsp: (h->d) transfer ${:06x}", self.dsp_host_rtx);
    }

    // Host writes ICR: HF1/HF0 are mirrored into the DSP-side HSR.
    pub fn write_host_icr(&mut self, value: u8) {
        self.hostport[CPU_HOST_ICR] = value & 0xfb;
        self.periph[SPACE_X][DSP_HOST_HSR] &=
            !((1 << DSP_HOST_HSR_HF1) | (1 << DSP_HOST_HSR_HF0));
        self.periph[SPACE_X][DSP_HOST_HSR] |= (self.hostport[CPU_HOST_ICR] as u32)
            & ((1 << DSP_HOST_HSR_HF1) | (1 << DSP_HOST_HSR_HF0));
        self.hostport_update_hreq();
    }

    // Host writes CVR: bit 7 raises the host command.
    pub fn write_host_cvr(&mut self, value: u8) {
        self.hostport[CPU_HOST_CVR] = value & 0x9f;
        if value & (1 << 7) != 0 {
            self.periph[SPACE_X][DSP_HOST_HSR] |= 1 << DSP_HOST_HSR_HCP;
            if self.periph[SPACE_X][DSP_HOST_HCR] & (1 << DSP_HOST_HCR_HCIE) != 0 {
                self.set_interrupt(INTER_HOST_COMMAND, true);
            }
        } else {
            self.periph[SPACE_X][DSP_HOST_HSR] &= !(1 << DSP_HOST_HSR_HCP);
        }
        log::trace!("dsp: (h->d) host command = ${:02x}", value & 0x9f);
    }

    pub fn write_host_ivr(&mut self, value: u8) {
        self.hostport[CPU_HOST_IVR] = value;
    }

    // DSP has read HRX.
    pub fn hostport_dspread(&mut self) {
        self.periph[SPACE_X][DSP_HOST_HSR] &= !(1 << DSP_HOST_HSR_HRDF);
        self.hostport_update_trdy();
        // A value parked in the host TX registers can come in now.
        self.host2dsp();
    }

    // DSP has written HTX.
    pub fn hostport_dspwrite(&mut self) {
        self.periph[SPACE_X][DSP_HOST_HSR] &= !(1 << DSP_HOST_HSR_HTDE);
        self.dsp2host();
    }

    // ---- SSI ----

    pub fn ssi_write_tx(&mut self, value: u32) {
        self.periph[SPACE_X][DSP_SSI_SR] &= !(1 << DSP_SSI_SR_TDE);
        self.ssi.tx = value;
    }

    pub fn ssi_write_tsr(&mut self) {
        self.periph[SPACE_X][DSP_SSI_SR] &= !(1 << DSP_SSI_SR_TDE);
    }

    pub fn ssi_read_rx(&mut self) -> u32 {
        self.periph[SPACE_X][DSP_SSI_SR] &= !(1 << DSP_SSI_SR_RDF);
        self.ssi.rx
    }

    // External serial clock: shift one word out of TX and one into RX.
    pub fn ssi_receive_serial_clock(&mut self) {
        let mut value = self.ssi.tx;
        value >>= 24 - self.ssi.cra_word_length as u32;
        value &= self.ssi.cra_word_mask;

        if self.ssi.crb_shifter != 0 {
            let mut temp = 0;
            for _ in 0..self.ssi.cra_word_length {
                temp += value & 1;
                temp <<= 1;
                value >>= 1;
            }
            value = temp;
        }

        if self.ssi.crb_te != 0 && self.ssi.wait_frame == 0 {
            self.ssi.transmit_value = value;
            if self.ssi.crb_tie != 0 {
                self.set_interrupt(INTER_SSI_TRX_DATA, true);
            }
        } else {
            self.ssi.transmit_value = 0;
        }
        self.periph[SPACE_X][DSP_SSI_SR] |= 1 << DSP_SSI_SR_TDE;

        self.ssi.rx = self.ssi.received_value;
        if self.ssi.crb_rie != 0 {
            if self.periph[SPACE_X][DSP_SSI_SR] & (1 << DSP_SSI_SR_RDF) != 0 {
                self.set_interrupt(INTER_SSI_RCV_DATA_E, true);
            } else {
                self.set_interrupt(INTER_SSI_RCV_DATA, true);
            }
        }
        self.periph[SPACE_X][DSP_SSI_SR] |= 1 << DSP_SSI_SR_RDF;
    }

    // Frame sync from the crossbar.
    pub fn ssi_receive_sc2(&mut self) {
        self.ssi.slot_in_frame += 1;
        if self.ssi.slot_in_frame >= self.ssi.cra_frame_rate_divider {
            self.ssi.slot_in_frame = 0;
        }
        if self.ssi.crb_mode != 0 {
            if self.ssi.slot_in_frame == 0 {
                self.periph[SPACE_X][DSP_SSI_SR] |= 1 << DSP_SSI_SR_TFS;
                self.ssi.wait_frame = 0;
            } else {
                self.periph[SPACE_X][DSP_SSI_SR] &= !(1 << DSP_SSI_SR_TFS);
            }
        } else {
            self.periph[SPACE_X][DSP_SSI_SR] |= 1 << DSP_SSI_SR_TFS;
        }
    }

    pub fn ssi_configure(&mut self, address: usize, value: u32) {
        match address {
            DSP_SSI_CRA => {
                self.periph[SPACE_X][DSP_SSI_CRA] = value;
                match (value >> DSP_SSI_CRA_WL0) & 3 {
                    0 => {
                        self.ssi.cra_word_length = 8;
                        self.ssi.cra_word_mask = 0xff;
                    }
                    1 => {
                        self.ssi.cra_word_length = 12;
                        self.ssi.cra_word_mask = 0xfff;
                    }
                    2 => {
                        self.ssi.cra_word_length = 16;
                        self.ssi.cra_word_mask = 0xffff;
                    }
                    _ => {
                        self.ssi.cra_word_length = 24;
                        self.ssi.cra_word_mask = 0xfffff;
                    }
                }
                self.ssi.cra_frame_rate_divider = (((value >> DSP_SSI_CRA_DC0) & 0x1f) + 1) as u16;
            }
            DSP_SSI_CRB => {
                let crb_te = self.periph[SPACE_X][DSP_SSI_CRB] & (1 << DSP_SSI_CRB_TE);
                self.periph[SPACE_X][DSP_SSI_CRB] = value;
                self.ssi.crb_src_clock = ((value >> DSP_SSI_CRB_SCKD) & 1) as u16;
                self.ssi.crb_shifter = ((value >> DSP_SSI_CRB_SHFD) & 1) as u16;
                self.ssi.crb_synchro = ((value >> DSP_SSI_CRB_SYN) & 1) as u16;
                self.ssi.crb_mode = ((value >> DSP_SSI_CRB_MOD) & 1) as u16;
                self.ssi.crb_te = ((value >> DSP_SSI_CRB_TE) & 1) as u16;
                self.ssi.crb_re = ((value >> DSP_SSI_CRB_RE) & 1) as u16;
                self.ssi.crb_tie = ((value >> DSP_SSI_CRB_TIE) & 1) as u16;
                self.ssi.crb_rie = ((value >> DSP_SSI_CRB_RIE) & 1) as u16;
                if crb_te == 0 && self.ssi.crb_te != 0 {
                    self.ssi.wait_frame = 1;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_values() {
        let mut core = DspCore::new();
        core.reset();
        assert_eq!(core.pc, 0);
        assert_eq!(core.registers[REG_OMR], 0x02);
        for i in 0..8 {
            assert_eq!(core.registers[REG_M0 + i], 0xffff);
        }
        assert_eq!(core.periph[SPACE_X][DSP_HOST_HSR], 1 << DSP_HOST_HSR_HTDE);
        assert_eq!(core.hostport[CPU_HOST_CVR], 0x12);
        assert_eq!(core.hostport[CPU_HOST_ISR], (1 << CPU_HOST_ISR_TRDY) | (1 << CPU_HOST_ISR_TXDE));
        assert_eq!(core.hostport[CPU_HOST_IVR], 0x0f);
        assert_eq!(core.periph[SPACE_X][DSP_BCR], 0xffff);
    }

    #[test]
    fn sine_rom_shape() {
        let core = DspCore::new();
        assert_eq!(core.rom[SPACE_Y][0x100], 0);
        // sin(pi/4) scaled to 24 bits
        let quarter = core.rom[SPACE_Y][0x120];
        assert!((quarter as i64 - 0x5a8279).abs() <= 2, "got {:#x}", quarter);
        // sin(pi/2) clamps to the positive rail
        assert_eq!(core.rom[SPACE_Y][0x140], 0x7fffff);
        // sin(pi) is zero again
        assert_eq!(core.rom[SPACE_Y][0x180], 0);
        // sin(3*pi/2) is the negative rail
        assert_eq!(core.rom[SPACE_Y][0x1c0], 0x800000);
    }

    #[test]
    fn mulaw_rom_first_steps() {
        let core = DspCore::new();
        assert_eq!(core.rom[SPACE_X][0x100], 0x7d7c00);
        assert_eq!(core.rom[SPACE_X][0x101], 0x7d7c00 - 0x040000);
    }

    #[test]
    fn host_transfer_sets_both_ready_flags() {
        let mut core = DspCore::new();
        core.reset();
        // DSP writes HTX, host side becomes readable.
        core.dsp_host_htx = 0x123456;
        core.hostport_dspwrite();
        assert_ne!(core.hostport[CPU_HOST_ISR] & (1 << CPU_HOST_ISR_RXDF), 0);
        assert_ne!(core.periph[SPACE_X][DSP_HOST_HSR] & (1 << DSP_HOST_HSR_HTDE), 0);
        assert_eq!(core.hostport[CPU_HOST_RXH], 0x12);
        assert_eq!(core.hostport[CPU_HOST_RXM], 0x34);
        assert_eq!(core.hostport[CPU_HOST_RXL], 0x56);
    }
}
