// The 68k-facing side of the DSP: the eight host-port bytes at 0xffa200, the
// bootstrap loader and the lock-step scheduler. The DSP runs at twice the CPU
// clock, so the main loop hands over cpu_cycles * 2 after every instruction;
// every DSP instruction completes within that call.

use crate::dsp_core::*;

pub const DSP_CPU_FREQ_RATIO: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DspState {
    Halt,
    Booting,
    Running,
    WaitHostRead,
    WaitHostWrite,
}

pub struct Dsp {
    pub core: DspCore,
    pub enabled: bool,
    pub state: DspState,
    first_host_write: bool,
    cycles_carry: i64,
}

impl Dsp {
    pub fn new(enabled: bool) -> Self {
        Dsp {
            core: DspCore::new(),
            enabled,
            state: DspState::Halt,
            first_host_write: true,
            cycles_carry: 0,
        }
    }

    pub fn reset(&mut self) {
        self.core.reset();
        self.first_host_write = true;
        self.cycles_carry = 0;
        self.state = if self.enabled { DspState::Booting } else { DspState::Halt };
        log::debug!("dsp: reset done, state = {:?}", self.state);
    }

    // Advance the DSP by the cycle budget matching `host_cycles` CPU cycles.
    pub fn run(&mut self, host_cycles: u32) {
        if !self.enabled {
            return;
        }
        let mut budget = self.cycles_carry + (host_cycles * DSP_CPU_FREQ_RATIO) as i64;
        while budget > 0 && self.state == DspState::Running {
            self.core.execute_instruction();
            budget -= self.core.instr_cycle as i64;
            match self.core.wait_request.take() {
                Some(WaitRequest::HostRead) => self.state = DspState::WaitHostRead,
                Some(WaitRequest::HostWrite) => self.state = DspState::WaitHostWrite,
                None => {}
            }
        }
        // Unused budget is lost while blocked; only a partial instruction carries over.
        self.cycles_carry = if self.state == DspState::Running { budget.min(0) } else { 0 };
    }

    // 68k reads a host-port byte; addr is the offset 0..7 below 0xffa200.
    pub fn handle_read(&mut self, addr: u32) -> u8 {
        // A pending DSP->host word can complete before the host looks.
        self.core.dsp2host();
        match addr as usize {
            CPU_HOST_ICR => self.core.hostport[CPU_HOST_ICR],
            CPU_HOST_CVR => self.core.hostport[CPU_HOST_CVR],
            CPU_HOST_ISR => self.core.hostport[CPU_HOST_ISR],
            CPU_HOST_IVR => self.core.hostport[CPU_HOST_IVR],
            CPU_HOST_RX0 => 0,
            CPU_HOST_RXH => self.core.hostport[CPU_HOST_RXH],
            CPU_HOST_RXM => self.core.hostport[CPU_HOST_RXM],
            CPU_HOST_RXL => {
                let value = self.core.hostport[CPU_HOST_RXL];
                if self.state != DspState::Booting {
                    // Reading the low byte completes the transfer.
                    self.core.hostport[CPU_HOST_ISR] &= !(1u8 << CPU_HOST_ISR_RXDF);
                    self.core.hostport_update_hreq();
                    self.core.dsp2host();
                }
                if self.state == DspState::WaitHostRead {
                    self.state = DspState::Running;
                }
                value
            }
            _ => 0,
        }
    }

    // 68k writes a host-port byte.
    pub fn handle_write(&mut self, addr: u32, value: u8) {
        match addr as usize {
            CPU_HOST_ICR => self.core.write_host_icr(value),
            CPU_HOST_CVR => self.core.write_host_cvr(value),
            CPU_HOST_ISR => {
                // Read only.
            }
            CPU_HOST_IVR => self.core.write_host_ivr(value),
            4 => {
                // TX0
                if self.first_host_write {
                    self.first_host_write = false;
                    self.core.bootstrap_accum = 0;
                }
            }
            5 => {
                // TXH
                if self.first_host_write {
                    self.first_host_write = false;
                    self.core.bootstrap_accum = 0;
                }
                self.core.hostport[CPU_HOST_TXH] = value;
                self.core.bootstrap_accum |= (value as u32) << 16;
            }
            6 => {
                // TXM
                if self.first_host_write {
                    self.first_host_write = false;
                    self.core.hostport[CPU_HOST_TXH] = value;
                    self.core.bootstrap_accum = 0;
                }
                self.core.hostport[CPU_HOST_TXM] = value;
                self.core.bootstrap_accum |= (value as u32) << 8;
            }
            7 => {
                // TXL: writing the low byte triggers the transfer.
                if self.first_host_write {
                    self.first_host_write = false;
                    self.core.hostport[CPU_HOST_TXH] = value;
                    self.core.hostport[CPU_HOST_TXM] = value;
                    self.core.bootstrap_accum = 0;
                }
                self.core.hostport[CPU_HOST_TXL] = value;
                self.core.bootstrap_accum |= value as u32;
                self.first_host_write = true;

                match self.state {
                    DspState::Booting => {
                        let pos = self.core.bootstrap_pos as usize;
                        self.core.ramint[SPACE_P][pos] = self.core.bootstrap_accum & 0xffffff;
                        self.core.bootstrap_pos += 1;
                        if self.core.bootstrap_pos == 0x200 {
                            log::debug!("dsp: bootstrap done");
                            self.state = DspState::Running;
                        }
                        self.core.bootstrap_accum = 0;
                    }
                    _ => {
                        if self.core.hostport[CPU_HOST_ISR] & (1 << CPU_HOST_ISR_TRDY) != 0 {
                            // TRDY set: burst mode, the word lands directly in DSP RX.
                            self.core.dsp_host_rtx = self.core.hostport[CPU_HOST_TXL] as u32
                                | (self.core.hostport[CPU_HOST_TXM] as u32) << 8
                                | (self.core.hostport[CPU_HOST_TXH] as u32) << 16;
                            self.core.periph[SPACE_X][DSP_HOST_HSR] |= 1 << DSP_HOST_HSR_HRDF;
                            if self.core.periph[SPACE_X][DSP_HOST_HCR] & (1 << DSP_HOST_HCR_HRIE) != 0 {
                                self.core.set_interrupt(INTER_HOST_RCV_DATA, true);
                            }
                            log::trace!("dsp: (h->d) direct transfer ${:06x}", self.core.dsp_host_rtx);
                        } else {
                            self.core.hostport[CPU_HOST_ISR] &= !(1u8 << CPU_HOST_ISR_TXDE);
                            self.core.hostport_update_hreq();
                        }
                        self.core.hostport_update_trdy();
                        if self.state == DspState::WaitHostWrite {
                            self.state = DspState::Running;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    // IPL 6 request towards the 68k: HREQ high hands over the IVR as vector.
    pub fn process_irq(&mut self) -> Option<u8> {
        if !self.enabled {
            return None;
        }
        if self.core.hostport[CPU_HOST_ISR] & (1 << CPU_HOST_ISR_HREQ) != 0 {
            Some(self.core.hostport[CPU_HOST_IVR])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booted_dsp() -> Dsp {
        let mut dsp = Dsp::new(true);
        dsp.reset();
        dsp
    }

    #[test]
    fn bootstrap_loads_512_words() {
        let mut dsp = booted_dsp();
        assert_eq!(dsp.state, DspState::Booting);
        for i in 0..0x200u32 {
            dsp.handle_write(5, (i >> 16) as u8);
            dsp.handle_write(6, (i >> 8) as u8);
            dsp.handle_write(7, i as u8);
        }
        assert_eq!(dsp.state, DspState::Running);
        assert_eq!(dsp.core.bootstrap_pos, 0x200);
        assert_eq!(dsp.core.bootstrap_accum, 0);
        assert_eq!(dsp.core.ramint[SPACE_P][0x1ff], 0x1ff);
        assert_eq!(dsp.core.ramint[SPACE_P][0x123], 0x123);
    }

    #[test]
    fn host_port_never_loses_a_word() {
        let mut dsp = booted_dsp();
        // Boot with a trivial program so the port is live.
        for _ in 0..0x200 {
            dsp.handle_write(5, 0);
            dsp.handle_write(6, 0);
            dsp.handle_write(7, 0);
        }
        // DSP transmits a word; after the transfer step both "empty" flags
        // can not be low at once: the word is either in flight or delivered.
        dsp.core.dsp_host_htx = 0xbeef42;
        dsp.core.hostport_dspwrite();
        let isr = dsp.core.hostport[CPU_HOST_ISR];
        let hsr = dsp.core.periph[SPACE_X][DSP_HOST_HSR];
        assert!(isr & (1 << CPU_HOST_ISR_RXDF) != 0 || hsr & (1 << DSP_HOST_HSR_HTDE) == 0);
        // Host reads it back, low byte last.
        assert_eq!(dsp.handle_read(5), 0xbe);
        assert_eq!(dsp.handle_read(6), 0xef);
        assert_eq!(dsp.handle_read(7), 0x42);
        assert_eq!(dsp.core.hostport[CPU_HOST_ISR] & (1 << CPU_HOST_ISR_RXDF), 0);
        assert_ne!(dsp.core.periph[SPACE_X][DSP_HOST_HSR] & (1 << DSP_HOST_HSR_HTDE), 0);
    }

    #[test]
    fn burst_write_lands_in_dsp_rx() {
        let mut dsp = booted_dsp();
        for _ in 0..0x200 {
            dsp.handle_write(5, 0);
            dsp.handle_write(6, 0);
            dsp.handle_write(7, 0);
        }
        assert_ne!(dsp.core.hostport[CPU_HOST_ISR] & (1 << CPU_HOST_ISR_TRDY), 0);
        dsp.handle_write(5, 0x12);
        dsp.handle_write(6, 0x34);
        dsp.handle_write(7, 0x56);
        assert_eq!(dsp.core.dsp_host_rtx, 0x123456);
        assert_ne!(
            dsp.core.periph[SPACE_X][DSP_HOST_HSR] & (1 << DSP_HOST_HSR_HRDF),
            0
        );
    }
}
