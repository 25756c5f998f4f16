use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nibbler::program::{ChecksumPolicy, Program};
use nibbler::ui::UiOptions;
use nibbler::Emulator;

/// Emulator for a 4-bit badge processor. Eats nibbles for breakfast.
#[derive(Parser, Debug)]
#[command(name = "nibbler", version, about)]
struct Args {
    /// Program binary to execute
    binary: PathBuf,

    /// Start paused, ready to single-step
    #[arg(short = 'p', long = "paused")]
    paused: bool,

    /// Start paused (alias of -p)
    #[arg(short = 's', hide = true)]
    step: bool,

    /// Render the pixel matrix in red, like the LED panel
    #[arg(short = 'r', long = "red")]
    red: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let buffer = match fs::read(&args.binary) {
        Ok(buffer) => buffer,
        Err(err) => {
            eprintln!("{}: {}", args.binary.display(), err);
            return ExitCode::FAILURE;
        }
    };
    let prg = match Program::load(&buffer, ChecksumPolicy::Permissive) {
        Ok(prg) => prg,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let options = UiOptions { start_paused: args.paused || args.step, red_mode: args.red };
    match Emulator::new(prg).run(options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // The UI has already restored the terminal at this point.
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
