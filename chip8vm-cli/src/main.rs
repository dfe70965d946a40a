//! Entrypoint for CLI
use std::{env, error::Error, fs};

use chip8vm::{prelude::*, IMPL_VERSION};
use log::{info, trace};

static USAGE: &str = r#"
usage: chip8vm run FILE [options]

options:
    --ips HZ        Virtual CPU clock rate (default 500)
    --seed SEED     Fixed seed for the random number source
    --frames COUNT  Number of 60 Hz frames to emulate (default 600)
    --trace         Log every fetched instruction

examples:
    chip8vm run breakout.rom
    chip8vm run breakout.rom --ips 700 --frames 300
"#;

#[derive(Default)]
struct RunOpts {
    ips: Option<u64>,
    seed: Option<u64>,
    frames: Option<u64>,
    trace: bool,
}

fn run_rom(filepath: &str, opts: RunOpts) -> Chip8Result<()> {
    let rom = fs::read(filepath)?;
    info!("loaded {filepath} ({} bytes)", rom.len());

    let conf = Chip8Conf {
        clock_frequency: opts.ips.map(Hz),
        rng_seed: opts.seed,
        quirks: Quirks::default(),
    };

    let mut vm = Chip8Vm::new(conf);
    vm.load_rom(&rom)?;

    if opts.trace {
        vm.set_trace(|op| trace!("{op}"));
    }

    // The host owns frame pacing; the machine itself has no sense of
    // wall-clock time.
    let mut clock = Clock::frame();
    let mut buzzing = false;

    for _ in 0..opts.frames.unwrap_or(600) {
        if vm.state() == MachineState::Quit {
            break;
        }

        vm.run_frame()?;

        if vm.sound_active() != buzzing {
            buzzing = vm.sound_active();
            info!("buzzer {}", if buzzing { "on" } else { "off" });
        }

        clock.wait();
    }

    println!("{}", vm.dump_display()?);

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    simple_logger::SimpleLogger::new().env().init().unwrap();

    match parse_args() {
        Some(Cmd::Run { filepath, opts }) => run_rom(&filepath, opts)?,
        None => {
            print_usage();
            // FreeBSD EX_USAGE (64)
            std::process::exit(64)
        }
    }

    Ok(())
}

fn parse_args() -> Option<Cmd> {
    let mut args = env::args().skip(1);
    match args.next()?.as_str() {
        "run" => {
            let mut filepath = None;
            let mut opts = RunOpts::default();

            while let Some(arg) = args.next() {
                match arg.as_str() {
                    // A missing or garbled option value is bad usage.
                    "--ips" => opts.ips = Some(args.next()?.parse().ok()?),
                    "--seed" => opts.seed = Some(args.next()?.parse().ok()?),
                    "--frames" => opts.frames = Some(args.next()?.parse().ok()?),
                    "--trace" => opts.trace = true,
                    _ => filepath = Some(arg),
                }
            }

            Some(Cmd::Run {
                filepath: filepath?,
                opts,
            })
        }
        _ => None,
    }
}

fn print_usage() {
    println!("Chip8 VM v{IMPL_VERSION}");
    println!("{USAGE}");
}

enum Cmd {
    /// Run file
    Run { filepath: String, opts: RunOpts },
}
