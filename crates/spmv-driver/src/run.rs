//! Run loop
//!
//! ```text
//! validate ─▶ reset/enable engines ─▶ profiler setup ─▶ configure units
//!    ─▶ seed channels ─▶ prime ─▶ start units ─▶ tick until drained
//!    ─▶ poll units idle ─▶ poll output engines idle ─▶ fetch
//! ```
//!
//! Units are started right after priming, before the streams are drained:
//! the input engines stall once the unit's stream FIFOs fill, so draining
//! first would never finish.

use crate::channel::ChannelState;
use crate::chunker::TransferChunker;
use crate::compute::{ComputeUnitConfig, ComputeUnitController};
use crate::config::{subentry_rows, CacheMode, RunConfig};
use crate::dma::{DmaEngineDriver, EngineId};
use crate::error::{Result, SpmvError};
use crate::io::RegisterIo;
use crate::loading::{f32_records, BenchmarkSet, UnitWorkload, Workload, RECORD_BYTES};
use crate::profiling::{CounterSnapshot, Profiler, RuntimeLog};
use crate::scheduler::{SchedulerStats, StreamScheduler};
use crate::verify::Verification;
use bytes::Bytes;
use spmv_chip::memory::StreamKind;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What one run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Raw result bytes per unit
    pub outputs: Vec<Bytes>,
    /// Scheduler counters, priming included
    pub scheduler: SchedulerStats,
    /// Polls spent draining the input and output streams
    pub transfer_polls: u64,
    /// Polls spent waiting for the units to go idle
    pub compute_polls: u64,
    /// Polls spent waiting for the output engines
    pub drain_polls: u64,
    /// Start of the units until all reported idle
    pub compute_time: Duration,
    /// Whole run, fetch included
    pub total_time: Duration,
    /// Profiler counters after the units went idle
    pub counters: Option<CounterSnapshot>,
    /// Counters sampled while polling
    pub runtime_log: Option<RuntimeLog>,
}

impl RunReport {
    /// Results of `unit` as f32
    pub fn output(&self, unit: usize) -> Vec<f32> {
        self.outputs.get(unit).map_or_else(Vec::new, |b| f32_records(b))
    }

    /// Compare every unit with the workload's references
    pub fn verify(&self, workload: &Workload) -> Verification {
        let expected: Vec<&[f32]> = workload.units.iter().map(|u| u.expected.as_slice()).collect();
        let actual: Vec<Vec<f32>> = (0..self.outputs.len()).map(|u| self.output(u)).collect();
        Verification::run(&expected, &actual)
    }
}

/// Owns the device for the duration of a run
///
/// All per-run state lives here or in [`RunContext::run`]'s locals.
#[derive(Debug)]
pub struct RunContext<D: RegisterIo = Box<dyn RegisterIo>> {
    io: D,
    config: RunConfig,
    dma: DmaEngineDriver,
    compute: ComputeUnitController,
    profiler: Option<Profiler>,
    runtime_log: Option<RuntimeLog>,
}

impl<D: RegisterIo> RunContext<D> {
    /// Take ownership of `io` for runs described by `config`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `config` is invalid; the device is not
    /// touched.
    pub fn new(io: D, config: RunConfig) -> Result<Self> {
        config.validate()?;
        let platform = config.platform.clone();
        let profiler = config
            .profile
            .profiler_map()
            .map(|map| Profiler::new(platform.profiler_base_for(map), map));
        Ok(Self {
            dma: DmaEngineDriver::new(platform.clone(), config.polarity, config.max_chunk()),
            compute: ComputeUnitController::new(platform, config.layout),
            io,
            config,
            profiler,
            runtime_log: None,
        })
    }

    /// Configuration in use
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The device
    pub fn io(&mut self) -> &mut D {
        &mut self.io
    }

    /// Profiler, if the bitstream has one
    pub const fn profiler(&self) -> Option<&Profiler> {
        self.profiler.as_ref()
    }

    /// Give the device back
    pub fn into_io(self) -> D {
        self.io
    }

    /// Upload a benchmark
    ///
    /// # Errors
    ///
    /// See [`BenchmarkSet::upload`].
    pub fn load(&mut self, bench: &BenchmarkSet) -> Result<Workload> {
        bench.upload(&mut self.io, &self.config)
    }

    fn active_engines(&self) -> impl Iterator<Item = EngineId> {
        (0..self.config.units)
            .flat_map(|unit| StreamKind::ALL.map(|stream| EngineId::new(unit, stream)))
    }

    /// Reset then enable every engine of every active unit
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on transport failure.
    pub fn init_engines(&mut self) -> Result<()> {
        if let Some(profiler) = self.profiler {
            if profiler.map().reset_reg.is_some() {
                profiler.reset(&mut self.io)?;
            }
        }
        let engines: Vec<EngineId> = self.active_engines().collect();
        for &engine in &engines {
            self.dma.reset(&mut self.io, engine, engine.direction())?;
        }
        for &engine in &engines {
            self.dma.enable(&mut self.io, engine, engine.direction())?;
        }
        info!("Initialised {} DMA engine(s)", engines.len());
        Ok(())
    }

    /// Clear counters and apply the cache setup
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the MSHR divider leaves no subentry rows,
    /// `RegisterIo` on transport failure.
    pub fn prepare_profiler(&mut self) -> Result<()> {
        let Some(profiler) = self.profiler else {
            return Ok(());
        };
        let io = &mut self.io;
        profiler.clear_stats(io)?;
        profiler.invalidate_cache(io)?;
        match self.config.cache {
            CacheMode::Disabled => profiler.disable_cache(io)?,
            CacheMode::Enabled { divider } => {
                profiler.enable_cache(io)?;
                profiler.set_cache_divider(io, u64::from(divider))?;
                let map = profiler.map();
                if map.mshr_divider_reg.is_some() {
                    let shift = self.config.mshr_divider;
                    let rows = subentry_rows(map, shift)?;
                    profiler.set_mshr_divider(io, u64::from(shift))?;
                    profiler.set_max_subentry_rows(io, rows)?;
                }
            }
        }
        debug!("Profiler prepared: {:?}", self.config.cache);
        Ok(())
    }

    fn sample_runtime_log(&mut self) -> Result<()> {
        if let (Some(profiler), Some(log)) = (self.profiler, self.runtime_log.as_mut()) {
            log.push(profiler.sample(&mut self.io)?);
        }
        Ok(())
    }

    /// Poll `done` until it holds, honouring the configured poll limit
    fn poll_phase<F>(&mut self, phase: &'static str, sample: bool, mut done: F) -> Result<u64>
    where
        F: FnMut(&mut Self) -> Result<bool>,
    {
        let mut polls = 0u64;
        loop {
            if self.config.poll_limit.is_some_and(|limit| polls >= limit) {
                return Err(SpmvError::PollLimitExceeded { phase, polls });
            }
            polls += 1;
            if sample {
                self.sample_runtime_log()?;
            }
            if done(self)? {
                debug!("{phase} finished after {polls} poll(s)");
                return Ok(polls);
            }
        }
    }

    fn seed_channels(&self, workload: &Workload) -> Result<StreamScheduler> {
        let mut scheduler = StreamScheduler::new(TransferChunker::new(self.config.max_chunk())?);
        for (unit, share) in workload.units.iter().enumerate() {
            for stream in StreamKind::ALL {
                let engine = EngineId::new(unit, stream);
                scheduler.add_channel(ChannelState::new(
                    engine.to_string(),
                    engine,
                    engine.direction(),
                    self.config.platform.buffer_base(unit, stream)?,
                    stream_bytes(share, stream),
                ));
            }
        }
        Ok(scheduler)
    }

    /// Run the loaded `workload` to completion and fetch the results
    ///
    /// # Errors
    ///
    /// Returns `Configuration` before touching the device if the workload
    /// does not match the configuration, `PollLimitExceeded` if a wait
    /// phase hits the poll limit, and `RegisterIo` on transport failure.
    /// Nothing is retried.
    pub fn run(&mut self, workload: &Workload) -> Result<RunReport> {
        self.config.validate()?;
        workload.validate(&self.config)?;
        let began = Instant::now();

        self.init_engines()?;
        self.prepare_profiler()?;
        self.runtime_log = match (self.config.sample_runtime_log, self.profiler) {
            (true, Some(p)) => Some(RuntimeLog::new(p.map(), self.config.runtime_log_capacity)),
            _ => None,
        };

        for (unit, share) in workload.units.iter().enumerate() {
            let args = ComputeUnitConfig {
                operand_count: share.nnz,
                output_count: share.output_count(),
                shared_vector_base: workload.vector_base,
            };
            self.compute.configure(&mut self.io, unit, &args)?;
        }

        let mut scheduler = self.seed_channels(workload)?;
        scheduler.prime(&mut self.io, &self.dma)?;

        for unit in 0..workload.units.len() {
            self.compute.start(&mut self.io, unit)?;
        }
        let started = Instant::now();
        info!("Started {} compute unit(s)", workload.units.len());

        let transfer_polls = self.poll_phase("stream transfer", true, |ctx| {
            Ok(!scheduler.tick(&mut ctx.io, &ctx.dma)?)
        })?;
        info!(
            "Streams drained: {} chunk(s), {} bytes",
            scheduler.stats().chunks_submitted,
            scheduler.stats().bytes_submitted
        );

        let units = workload.units.len();
        let compute_polls = self.poll_phase("compute", true, |ctx| {
            let mut all_idle = true;
            for unit in 0..units {
                all_idle &= ctx.compute.is_idle(&mut ctx.io, unit)?;
            }
            Ok(all_idle)
        })?;
        let compute_time = started.elapsed();
        let counters = match self.profiler {
            Some(p) => Some(p.snapshot_counters(&mut self.io)?),
            None => None,
        };
        info!("Compute finished in {compute_time:?}");

        let drain_polls = self.poll_phase("output drain", false, |ctx| {
            for unit in 0..units {
                let engine = EngineId::new(unit, StreamKind::Output);
                if ctx.dma.is_busy(&mut ctx.io, engine, engine.direction())? {
                    return Ok(false);
                }
            }
            Ok(true)
        })?;

        let outputs = self.fetch_outputs(workload)?;
        Ok(RunReport {
            outputs,
            scheduler: scheduler.stats(),
            transfer_polls,
            compute_polls,
            drain_polls,
            compute_time,
            total_time: began.elapsed(),
            counters,
            runtime_log: self.runtime_log.take(),
        })
    }

    /// Read every unit's results from its output buffer
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on transport failure.
    pub fn fetch_outputs(&mut self, workload: &Workload) -> Result<Vec<Bytes>> {
        let mut outputs = Vec::with_capacity(workload.units.len());
        for (unit, share) in workload.units.iter().enumerate() {
            let base = self.config.platform.buffer_base(unit, StreamKind::Output)?;
            let len = stream_bytes(share, StreamKind::Output) as usize;
            outputs.push(Bytes::from(self.io.read(base, len)?));
        }
        Ok(outputs)
    }
}

/// Bytes one unit moves on `stream`
fn stream_bytes(share: &UnitWorkload, stream: StreamKind) -> u64 {
    let records = match stream {
        StreamKind::RowPtr => u64::from(share.rows) + 1,
        StreamKind::ColIdx | StreamKind::Values => u64::from(share.nnz),
        StreamKind::Output => u64::from(share.output_count()),
    };
    records * RECORD_BYTES
}
