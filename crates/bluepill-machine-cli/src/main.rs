mod repl;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use bluepill_gdb::GdbServer;
use bluepill_machine::Machine;

/// STM32F103C8T6 emulator.
#[derive(Parser, Debug)]
#[command(name = "stm32sim", disable_version_flag = true)]
struct Args {
    /// Raw firmware image loaded into flash at startup.
    binary: Option<PathBuf>,

    /// Serve the GDB remote protocol on PORT instead of the interactive
    /// prompt.
    #[arg(long, value_name = "PORT", num_args = 0..=1, default_missing_value = "3333")]
    gdb: Option<u16>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if err.kind() == ErrorKind::DisplayHelp => {
            print!("{err}");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprint!("{err}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut machine = Machine::new();
    if let Some(path) = &args.binary {
        if let Err(err) = machine.load_firmware(path) {
            eprintln!("stm32sim: {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
        println!("loaded {}", path.display());
    }

    let result = match args.gdb {
        Some(port) => serve_gdb(&mut machine, port),
        None => repl::run(&mut machine),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("stm32sim: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn serve_gdb(machine: &mut Machine, port: u16) -> anyhow::Result<()> {
    let server = GdbServer::bind(port)?;
    println!("GDB stub listening on {}", server.local_addr()?);
    server.run(machine)?;
    Ok(())
}
