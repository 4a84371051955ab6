/*!
Headless CLI driver: load a ROM, run the recompiler for a number of
frames (or until the session halts), and report final CPU state plus
cache statistics.

    gb68 <rom> [--frames N] [--budget CYCLES] [--single-step]
*/

use std::env;
use std::process::ExitCode;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};

use gb68::{Config, Emulator, Rom};

fn init_logging() {
    let stdout = ConsoleAppender::builder().build();
    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .expect("logger config");
    log4rs::init_config(config).expect("logger init");
}

fn usage() -> ExitCode {
    eprintln!("usage: gb68 <rom.gb> [--frames N] [--budget CYCLES] [--single-step]");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    init_logging();

    let mut rom_path = None;
    let mut frames: u32 = 600;
    let mut config = Config::default();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--frames" => match args.next().and_then(|v| v.parse().ok()) {
                Some(n) => frames = n,
                None => return usage(),
            },
            "--budget" => match args.next().and_then(|v| v.parse().ok()) {
                Some(n) => config.cycles_per_exit = n,
                None => return usage(),
            },
            "--single-step" => config.single_instruction = true,
            _ if rom_path.is_none() => rom_path = Some(arg),
            _ => return usage(),
        }
    }
    let Some(rom_path) = rom_path else {
        return usage();
    };

    let rom = match Rom::load(&rom_path) {
        Ok(rom) => rom,
        Err(e) => {
            eprintln!("{rom_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut emu = match Emulator::new(rom, config) {
        Ok(emu) => emu,
        Err(e) => {
            eprintln!("session setup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = emu.run_frames(frames) {
        eprintln!("session aborted: {e}");
    }

    let st = emu.cpu_state();
    println!(
        "pc={:04x} sp={:04x} a={:02x} f={:02x} bc={:02x}{:02x} de={:02x}{:02x} hl={:04x}",
        st.pc, st.sp, st.a, st.f, st.b, st.c, st.d, st.e, st.hl
    );
    println!(
        "frames={} cycles={} blocks_compiled={} live_blocks={} driver_steps={}",
        emu.dmg.frames_elapsed(),
        emu.dmg.total_cycles(),
        emu.jit.blocks_compiled(),
        emu.jit.cache.live_blocks(),
        emu.jit.steps(),
    );

    ExitCode::SUCCESS
}
