use anyhow::{bail, Context, Result};
use clap::Parser;
use remu32::loader::load_elf_bytes;
use remu32::memory::MBASE;
use remu32::processor::State;
use remu32::sdb::Sdb;
use remu32::{Configuration, Machine};
use std::fs::{self, File};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "remu32", about = "A 32-bit RISC-V full-system emulator with a debug monitor")]
struct Args {
    /// Run in batch mode: start execution immediately
    #[arg(short = 'b', long)]
    batch: bool,

    /// Write the host-side log to FILE instead of stderr
    #[arg(short = 'l', long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Differential-test reference (accepted, not wired up in this build)
    #[arg(short = 'd', long, value_name = "REF")]
    diff: Option<PathBuf>,

    /// ELF providing function symbols for ftrace
    #[arg(short = 'f', long, value_name = "ELF")]
    ftrace: Option<PathBuf>,

    /// RAM-disk image matching the embedded manifest
    #[arg(short = 'r', long, value_name = "IMG")]
    ramdisk: Option<PathBuf>,

    /// Guest image: a RISC-V ELF or a flat binary placed at the reset vector
    image: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if let Some(path) = &args.log {
        let file = File::create(path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();

    if let Some(reference) = &args.diff {
        log::warn!("difftest reference {} ignored: not wired up in this build", reference.display());
    }

    let mut config = Configuration::new();
    config.with_window = true;
    if let Some(path) = &args.ramdisk {
        config.ramdisk = fs::read(path)
            .with_context(|| format!("cannot read ramdisk image {}", path.display()))?;
    }
    let mut machine = Machine::new(config);

    let image = fs::read(&args.image)
        .with_context(|| format!("cannot read guest image {}", args.image.display()))?;
    if image.starts_with(b"\x7fELF") {
        let entry = load_elf_bytes(&mut machine.bus, &image)
            .with_context(|| format!("cannot load {}", args.image.display()))?;
        machine.cpu.pc = entry;
        machine.cpu.npc = entry;
    } else {
        if image.is_empty() {
            bail!("guest image {} is empty", args.image.display());
        }
        match machine.bus.ram_mut(MBASE, image.len()) {
            Ok(dst) => dst.copy_from_slice(&image),
            Err(fault) => bail!("guest image does not fit in RAM: {}", fault),
        }
    }

    if let Some(path) = &args.ftrace {
        match remu32::ftrace::FuncTracer::init(path) {
            Ok(tracer) => machine.ftrace = Some(tracer),
            Err(e) => log::warn!("ftrace disabled: {}", e),
        }
    }

    Sdb::new(args.batch).mainloop(&mut machine);

    match machine.state {
        State::End { code: 0 } | State::Quit | State::Stop => Ok(()),
        State::End { code } => std::process::exit(code as i32),
        _ => std::process::exit(1),
    }
}
