//! `spmv`: command-line runner for the SpMV accelerator.
//!
//! ```text
//! USAGE:
//!   spmv run --device <path> <bench>   Upload a benchmark, run it, verify
//!   spmv run --simulate <bench>        Same, against the in-memory model
//!   spmv layout <bytes> --channels N   Show how a vector stripes over HBM
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use spmv_driver::chip::memory::DmaClass;
use spmv_driver::chip::profiler::HardwareProfile;
use spmv_driver::chip::regs::{BusyPolarity, ControlLayout};
use spmv_driver::striping::STRIP_BYTES;
use spmv_driver::{
    BenchmarkSet, CacheMode, FileRegisterIo, RegisterIo, RunConfig, RunContext, SimConfig,
    SimulatedDevice, StripeLayout,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spmv", about = "SpMV accelerator host runner", version)]
struct Cli {
    /// Log progress (same as RUST_LOG=info).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Upload a benchmark, stream it through the compute units and verify.
    Run(RunArgs),
    /// Print the per-channel placement of a striped vector.
    Layout {
        /// Vector size in bytes.
        bytes: u64,
        /// Memory channels (power of two, at most 16).
        #[arg(long, default_value_t = 4)]
        channels: u32,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Benchmark directory (`<bench>/<units>/...`).
    bench: PathBuf,

    /// Device node exposing the accelerator's address space.
    #[arg(long, required_unless_present = "simulate", conflicts_with = "simulate")]
    device: Option<PathBuf>,

    /// Run against the in-memory model instead of hardware.
    #[arg(long)]
    simulate: bool,

    /// Compute units to use.
    #[arg(long, default_value_t = 4)]
    units: usize,

    /// Channels the vector is striped over; 0 keeps it contiguous.
    #[arg(long, default_value_t = 0)]
    channels: u32,

    /// DMA engine class.
    #[arg(long, value_enum, default_value_t = DmaArg::Ddr)]
    dma_class: DmaArg,

    /// Override the largest descriptor length in bytes.
    #[arg(long)]
    max_chunk: Option<u32>,

    /// Bitstream flavour.
    #[arg(long, value_enum, default_value_t = ProfileArg::Hashed)]
    profile: ProfileArg,

    /// Compute-unit register layout.
    #[arg(long, value_enum, default_value_t = LayoutArg::Split)]
    layout: LayoutArg,

    /// DMA status convention.
    #[arg(long, value_enum, default_value_t = PolarityArg::IdleClear)]
    busy_polarity: PolarityArg,

    /// Give up a wait phase after this many polls.
    #[arg(long)]
    poll_limit: Option<u64>,

    /// Cache divider (effective size / 2^N).
    #[arg(long, default_value_t = 0, conflicts_with = "no_cache")]
    cache_divider: u32,

    /// Bypass the cache.
    #[arg(long)]
    no_cache: bool,

    /// MSHR divider (hashed and traditional flavours).
    #[arg(long, default_value_t = 0)]
    mshr_divider: u32,

    /// Write the profiler counters taken after compute as CSV.
    #[arg(long)]
    stats_csv: Option<PathBuf>,

    /// Sample the profiler while polling and write the samples as CSV.
    #[arg(long)]
    runtime_log: Option<PathBuf>,

    /// Samples the runtime log keeps.
    #[arg(long, default_value_t = 10_000)]
    runtime_log_capacity: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum DmaArg {
    Ddr,
    Hbm,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProfileArg {
    Hashed,
    Traditional,
    Inclusive,
    None,
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutArg {
    Split,
    Packed,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolarityArg {
    /// Busy while neither HALTED nor IDLE is set.
    IdleClear,
    /// Busy while HALTED or IDLE is set.
    IdleSet,
}

impl RunArgs {
    fn config(&self) -> RunConfig {
        let dma_class = match (self.max_chunk, self.dma_class) {
            (Some(n), _) => DmaClass::Custom(n),
            (None, DmaArg::Ddr) => DmaClass::Ddr,
            (None, DmaArg::Hbm) => DmaClass::Hbm,
        };
        let profile = match self.profile {
            ProfileArg::Hashed => HardwareProfile::HashedMshr,
            ProfileArg::Traditional => HardwareProfile::TraditionalMshr,
            ProfileArg::Inclusive => HardwareProfile::MshrInclusive,
            ProfileArg::None => HardwareProfile::NoAccelerator,
        };
        let layout = match self.layout {
            LayoutArg::Split => ControlLayout::Split,
            LayoutArg::Packed => ControlLayout::Packed,
        };
        let polarity = match self.busy_polarity {
            PolarityArg::IdleClear => BusyPolarity::IdleBitsClear,
            PolarityArg::IdleSet => BusyPolarity::IdleBitsSet,
        };
        let cache = if self.no_cache {
            CacheMode::Disabled
        } else {
            CacheMode::Enabled { divider: self.cache_divider }
        };

        let mut config = RunConfig::default()
            .with_units(self.units)
            .with_dma_class(dma_class)
            .with_channels(self.channels)
            .with_profile(profile)
            .with_layout(layout)
            .with_polarity(polarity)
            .with_cache(cache)
            .with_mshr_divider(self.mshr_divider);
        if let Some(limit) = self.poll_limit {
            config = config.with_poll_limit(limit);
        }
        if self.runtime_log.is_some() {
            config = config.with_runtime_log(self.runtime_log_capacity);
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();

    match cli.command {
        Cmd::Run(args) => cmd_run(&args)?,
        Cmd::Layout { bytes, channels } => cmd_layout(bytes, channels)?,
    }

    Ok(())
}

fn open_device(args: &RunArgs, config: &RunConfig) -> Result<Box<dyn RegisterIo>> {
    if args.simulate {
        let sim = SimConfig::default()
            .with_layout(config.layout)
            .with_polarity(config.polarity);
        return Ok(Box::new(SimulatedDevice::new(config.platform.clone(), sim)));
    }
    let path = args
        .device
        .as_deref()
        .context("--device is required without --simulate")?;
    let io = FileRegisterIo::open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(io))
}

fn cmd_run(args: &RunArgs) -> Result<()> {
    let config = args.config();
    let io = open_device(args, &config)?;
    let mut ctx: RunContext = RunContext::new(io, config)?;

    let bench = BenchmarkSet::open(&args.bench, args.units)?;
    let workload = ctx.load(&bench)?;

    println!("Benchmark    : {}", bench.name());
    println!("Columns      : {}", workload.columns);
    match &workload.stripe {
        Some(stripe) => println!(
            "Vector       : striped over {} channel(s), {} strip(s)",
            stripe.channel_count(),
            stripe.strip_count()
        ),
        None => println!("Vector       : contiguous @ {:#x}", workload.vector_base),
    }
    for (unit, share) in workload.units.iter().enumerate() {
        println!("Unit {unit}       : {} rows, {} nnz", share.rows, share.nnz);
    }

    let report = ctx.run(&workload)?;
    println!();
    println!(
        "Transfers    : {} chunk(s), {} bytes, {} busy skip(s)",
        report.scheduler.chunks_submitted,
        report.scheduler.bytes_submitted,
        report.scheduler.busy_skips
    );
    println!(
        "Polls        : transfer {}, compute {}, drain {}",
        report.transfer_polls, report.compute_polls, report.drain_polls
    );
    println!("Compute time : {:?}", report.compute_time);
    println!("Total time   : {:?}", report.total_time);
    if let Some(cycles) = report.counters.as_ref().and_then(|c| c.total_cycles()) {
        println!("Cycles       : {cycles}");
    }

    if let Some(path) = &args.stats_csv {
        match &report.counters {
            Some(counters) => {
                counters.write_csv(BufWriter::new(create(path)?))?;
                println!("Counters     : {}", path.display());
            }
            None => tracing::warn!("No profiler on this bitstream; {} not written", path.display()),
        }
    }
    if let (Some(path), Some(log)) = (&args.runtime_log, &report.runtime_log) {
        log.write_csv(BufWriter::new(create(path)?))?;
        println!("Runtime log  : {} ({} sample(s), {} dropped)", path.display(), log.len(), log.dropped());
    }

    println!();
    let verification = report.verify(&workload);
    for verdict in &verification.units {
        match verdict.mismatch {
            None => println!("Unit {}       : PASS ({} values)", verdict.unit, verdict.compared),
            Some(m) => match m.actual {
                Some(actual) => println!(
                    "Unit {}       : FAIL at {} (expected {}, got {actual})",
                    verdict.unit, m.index, m.expected
                ),
                None => println!(
                    "Unit {}       : FAIL at {} (expected {}, no output)",
                    verdict.unit, m.index, m.expected
                ),
            },
        }
    }
    verification.into_result()?;
    Ok(())
}

fn create(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("creating {}", path.display()))
}

fn cmd_layout(bytes: u64, channels: u32) -> Result<()> {
    let layout = StripeLayout::compute(bytes, channels)?;
    println!(
        "{bytes} bytes → {} strip(s) of {STRIP_BYTES} bytes over {channels} channel(s)",
        layout.strip_count()
    );
    for (channel, strips) in layout.per_channel_strips().iter().enumerate() {
        println!(
            "  channel {channel:2}: {strips:6} strip(s), {:8} bytes",
            layout.channel_bytes(channel)
        );
    }
    Ok(())
}
