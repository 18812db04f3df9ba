//! decemu - concrete emulation of decompiled handler routines
//!
//! Usage:
//!   decemu <image.json> --rtn 0x401000              Follow the handler chain
//!   decemu <image.json> --rtn 0x401000 --no-tracer  Emulate one routine
//!   decemu <image.json> --rtn 0x401000 --log out.log --stack-machine

mod image;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use decemu_emulate::{
    regs, ChainConfig, Emulator, EmulatorConfig, HandlerChain, MachineState, MemoryDump, OutputLog,
    StackMachineSimulator,
};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::image::ProgramImage;

/// Frame base used when no stack dump provides one.
const DEFAULT_FRAME_BASE: u64 = 0x7fff_ffff_df90;

#[derive(Parser)]
#[command(name = "decemu")]
#[command(about = "Concrete emulation of decompiled handler routines", long_about = None)]
struct Cli {
    /// Path to the program image (JSON)
    image: PathBuf,

    /// Address of the first routine to emulate
    #[arg(long, value_parser = parse_hex)]
    rtn: u64,

    /// Write the emulation log to this file (rewritten after every round)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Emulate the first routine only
    #[arg(long)]
    no_tracer: bool,

    /// Simulate linked-list stack machine handlers
    #[arg(long)]
    stack_machine: bool,

    /// Maximum statements per routine
    #[arg(long)]
    max_steps: Option<usize>,

    /// Maximum number of routines to chain
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Raw stack memory dump
    #[arg(long, requires = "stack_base_adr")]
    stack_dump: Option<PathBuf>,

    /// Address the stack dump is mapped at
    #[arg(long, value_parser = parse_hex)]
    stack_base_adr: Option<u64>,

    /// Frame base register value for the stack dump
    #[arg(long, value_parser = parse_hex)]
    stack_base_ptr: Option<u64>,

    /// Raw heap memory dump
    #[arg(long, requires = "heap_base_adr")]
    heap_dump: Option<PathBuf>,

    /// Address the heap dump is mapped at
    #[arg(long, value_parser = parse_hex)]
    heap_base_adr: Option<u64>,

    /// Output in JSON format
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_hex(s: &str) -> Result<u64, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn load_dump(path: Option<&Path>, base: Option<u64>, what: &str) -> Result<Option<MemoryDump>> {
    let (Some(path), Some(base)) = (path, base) else {
        return Ok(None);
    };
    let bytes = fs::read(path).with_context(|| format!("Failed to read {} dump {}", what, path.display()))?;
    Ok(Some(MemoryDump::new(base, bytes)))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();

    let image = ProgramImage::load(&cli.image)?;
    let types = Arc::new(image.type_database());
    let memory = image.memory()?;

    let stack = load_dump(cli.stack_dump.as_deref(), cli.stack_base_adr, "stack")?
        .map(|dump| match cli.stack_base_ptr {
            Some(bp) => dump.with_base_pointer(bp),
            None => dump,
        });
    let heap = load_dump(cli.heap_dump.as_deref(), cli.heap_base_adr, "heap")?;

    let mut state = MachineState::from_dumps(types, &memory, stack.as_ref(), heap.as_ref())
        .context("Failed to map memory dumps")?;
    state.set_pointer_size(image.pointer_size());
    if state.register(regs::RBP).is_none() {
        state.set_register(regs::RBP, DEFAULT_FRAME_BASE);
    }
    if state.allocate_stack_space().context("Failed to allocate stack space")? {
        info!("allocated stack space around {:#x}", state.frame_base()?);
    }

    let mut emulator = Emulator::new(EmulatorConfig {
        max_steps: cli.max_steps,
        log_trace: !cli.stack_machine,
    });
    if cli.stack_machine {
        emulator = emulator.with_simulator(StackMachineSimulator::default());
    }

    let chain = HandlerChain::new(
        emulator,
        ChainConfig {
            tracer_mode: !cli.no_tracer,
            max_rounds: cli.max_rounds,
            log_file: cli.log.clone(),
        },
    );

    let mut log = OutputLog::new();
    let report = chain.run(&image, cli.rtn, &mut state, &mut log);

    if cli.json {
        output::print_json(&report, &log)?;
    } else {
        output::print_text(&report, &log, cli.log.is_some());
    }

    match report.error {
        Some(err) => Err(err).with_context(|| format!("Emulation stopped after {} rounds", report.rounds.len())),
        None => Ok(()),
    }
}
