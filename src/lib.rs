use std::fs;
use std::path::PathBuf;
pub mod atari;
pub mod devices;
pub mod dsp;
pub mod dsp_core;
mod dsp_cpu;
mod events;
mod exceptions;
pub mod fields;
mod instructions;
pub mod intercept;
pub mod memory;
mod parser;
pub mod processor;
use devices::{Device, Signal};
use dsp::Dsp;
use fields::OpResult;
use intercept::TosError;
use memory::Bus;
use processor::{Debugger, CPU};

pub struct Configuration {
    pub memory_size: usize,
    pub cpu_level: u8,
    pub compatible: bool,
    pub dsp_enabled: bool,
    pub tos_image: Option<PathBuf>,
    pub gemdos_dir: Option<PathBuf>,
    pub console_redirect: bool,
    pub base_address: u32,
    pub start_address: u32,
    pub initial_ssp: u32,
    pub memory_layout: Vec<(u32, OpResult)>,
    pub devices: Vec<Box<dyn Device>>,
}

pub struct Emulator {
    pub cpu: CPU,
    base_address: u32,
}

impl Emulator {
    pub fn new(config: Configuration) -> Result<Emulator, TosError> {
        let dsp = Dsp::new(config.dsp_enabled);
        let mut bus = Bus::new(config.memory_size, dsp);
        for device in config.devices {
            bus.attach(device);
        }
        bus.install_banks();
        intercept::init_cartridge(&mut bus);

        let mut cpu = CPU::new(bus, config.cpu_level, config.compatible);
        cpu.intercept.gemdos_dir = config.gemdos_dir;
        cpu.intercept.console_redirect = config.console_redirect;
        if cpu.intercept.gemdos_dir.is_some() {
            cpu.intercept.drive_mask = 0x7;
            cpu.intercept.boot_drive = 2;
        }

        if let Some(path) = &config.tos_image {
            let image = fs::read(path)?;
            let CPU { bus, intercept, .. } = &mut cpu;
            intercept::load_tos(bus, intercept, &image)?;
        }

        cpu.reset(true);

        if config.tos_image.is_none() {
            // Bare-metal setup: seed the system variables and start address
            // that the OS ROM would otherwise provide.
            cpu.regs.pc = config.start_address;
            cpu.regs.a[7] = config.initial_ssp;
            cpu.regs.isp = config.initial_ssp;
            for &(addr, value) in config.memory_layout.iter() {
                let _ = cpu.write(addr, value);
            }
            cpu.refill_prefetch(cpu.regs.pc);
        }

        Ok(Emulator { cpu, base_address: config.base_address })
    }

    pub fn run(&mut self, program: Option<&str>, debug: bool) {
        if let Some(program) = program {
            self.load(program);
        }
        let mut debugger = Debugger::new();
        let mut idle = false;
        loop {
            if !idle {
                match self.cpu.step() {
                    Signal::Quit => break,
                    _ => {}
                }
            } else {
                idle = false;
            }
            if debug {
                match debugger.update(&mut self.cpu) {
                    Signal::Quit => return,
                    Signal::NoOp => {
                        idle = true;
                    }
                    _ => (),
                };
            }
        }
    }

    pub fn load(&mut self, progname: &str) {
        let program = fs::read(progname).expect("Program does not exist!");
        for (j, &b) in program.iter().enumerate() {
            let _ = self.cpu.bus.write_byte(self.base_address.wrapping_add(j as u32), b);
        }
    }
}
