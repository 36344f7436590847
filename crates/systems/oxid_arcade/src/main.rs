// crates/systems/oxid_arcade/src/main.rs - Runner sin ventana de la placa arcade
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use oxid_arcade::{Board, BoardConfig, HardwareVariant};
use oxide_core::Rom;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Clone, Copy, ValueEnum)]
enum Variant {
    Ntsc,
    Pal,
}

#[derive(Parser)]
#[command(about = "Runs the dual-CPU arcade board headless")]
struct Args {
    /// Program ROM for the main CPU
    rom: PathBuf,

    /// Board configuration (JSON). Overrides --variant.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "ntsc")]
    variant: Variant,

    /// Number of frames to run
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Sound program copied into the shared RAM before power on
    #[arg(long)]
    sound: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<BoardConfig> {
    match &args.config {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening config {}", path.display()))?;
            let cfg: BoardConfig = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("parsing config {}", path.display()))?;
            Ok(cfg)
        }
        None => Ok(BoardConfig::for_variant(match args.variant {
            Variant::Ntsc => HardwareVariant::Ntsc,
            Variant::Pal => HardwareVariant::Pal,
        })),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let frame_ms = config.frame_ms();
    let rom = Rom::from_file(&args.rom)
        .with_context(|| format!("loading ROM {}", args.rom.display()))?;
    log::info!("ROM: {} bytes", rom.data.len());

    let mut board = Board::new(config, &rom.data)?;
    if let Some(path) = &args.sound {
        let sound = Rom::from_file(path)
            .with_context(|| format!("loading sound program {}", path.display()))?;
        board.load_sound_program(0, &sound.data)?;
    }
    board.power_on()?;

    let mut main_cycles = 0u64;
    let mut audio_cycles = 0u64;
    for _ in 0..args.frames {
        let report = board.run_cycle(frame_ms)?;
        main_cycles += report.main_cycles;
        audio_cycles += report.audio_cycles;
    }

    let m = board.main_registers();
    println!("=== 68000 ({:?}) ===", board.main_state());
    println!("PC={:08X} SR={:04X} USP={:08X} SSP={:08X}", m.pc, m.sr(), m.usp(), m.ssp());
    for i in 0..8 {
        println!("D{i}={:08X}  A{i}={:08X}", m.d[i], m.a[i]);
    }
    let z = board.audio_registers();
    println!("=== Z80 ({:?}) ===", board.audio_state());
    println!(
        "PC={:04X} SP={:04X} AF={:04X} BC={:04X} DE={:04X} HL={:04X} IX={:04X} IY={:04X}",
        z.pc,
        z.sp,
        z.af(),
        z.bc(),
        z.de(),
        z.hl(),
        z.ix,
        z.iy
    );
    println!(
        "{} frames, main {} cycles, audio {} cycles",
        board.frames(),
        main_cycles,
        audio_cycles
    );
    Ok(())
}
