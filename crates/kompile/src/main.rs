use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use reg_machine::{Assembler, Machine, MachineConfig, Module, TracingDiagnostics};
use tracing::{Level, info};

#[derive(Parser, Debug)]
#[command(
    name = "kompile",
    about = "Assemble a register machine source file and run it",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Assembly source file
    source: PathBuf,

    /// Capacity of the memory module in bytes
    #[arg(long, default_value_t = 65536)]
    memory: usize,

    /// Stop with an error after this many instructions
    #[arg(long)]
    max_steps: Option<u64>,

    /// Log pass boundaries and run start/end
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(if cli.verbose { Level::DEBUG } else { Level::INFO });

    let file = File::open(&cli.source)
        .with_context(|| format!("opening {}", cli.source.display()))?;
    let mut reader = BufReader::new(file);
    let mut image = Assembler::new(TracingDiagnostics)
        .assemble_reader(&mut reader)
        .with_context(|| format!("assembling {}", cli.source.display()))?;
    info!(bytes = image.len(), "assembled");

    let config = MachineConfig {
        max_steps: cli.max_steps,
        ..MachineConfig::default()
    };
    let mut machine = Machine::new(config, TracingDiagnostics);
    let mut module = Module::new(cli.memory, true);
    let report = machine
        .run(&mut image, &mut module)
        .context("running image")?;
    info!(steps = report.steps, "finished");

    for (index, value) in machine.registers().registers16().iter().enumerate() {
        println!("reg{index:02} = {value:#06x} ({})", *value as i16);
    }
    let flags = machine.flags();
    println!(
        "carry={} zero={} sign={} overflow={}",
        u8::from(flags.carry),
        u8::from(flags.zero),
        u8::from(flags.sign),
        u8::from(flags.overflow)
    );
    Ok(())
}

fn init_tracing(level: Level) {
    let _ = tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}
