use emfalcon::{atari, Emulator};
use std::env;
use std::path::PathBuf;
use std::process;

fn main() {
    env_logger::init();

    let mut config = atari::falcon();
    let mut debug = false;
    let mut program = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--debug" => debug = true,
            "--tos" => config.tos_image = args.next().map(PathBuf::from),
            "--gemdos" => config.gemdos_dir = args.next().map(PathBuf::from),
            "--console" => config.console_redirect = true,
            "--no-dsp" => config.dsp_enabled = false,
            _ => program = Some(arg),
        }
    }

    let mut emulator = match Emulator::new(config) {
        Ok(emulator) => emulator,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    emulator.run(program.as_deref(), debug);
}
