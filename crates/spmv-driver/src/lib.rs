//! Host driver for the streaming SpMV accelerator.
//!
//! Streams CSR operands from device memory into fixed-function SpMV compute
//! units through AXI DMA engines, and drains the results back. Everything
//! goes through one byte-addressed read/write transport ([`RegisterIo`]);
//! the address space is never mapped into the process.
//!
//! # Layers
//!
//! ```text
//! RunContext        configure ─ prime ─ start ─ drive ─ poll ─ fetch
//!   StreamScheduler   one tick = one pass over every ChannelState
//!     ChannelState      next address / bytes remaining per stream
//!     TransferChunker   descriptor-sized pieces
//!   DmaEngineDriver   reset, enable, busy, submit
//!   ComputeUnitController  configure, start, idle (split or packed layout)
//!   HbmStriper        vector placement over memory channels + index remap
//!   Profiler          cache/MSHR counters, runtime log
//! RegisterIo        FileRegisterIo (device node) | SimulatedDevice
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use spmv_driver::{BenchmarkSet, FileRegisterIo, RunConfig, RunContext};
//!
//! # fn main() -> spmv_driver::Result<()> {
//! let config = RunConfig::default().with_units(4).with_channels(0);
//! let io = FileRegisterIo::open("/dev/qdma01000-MM-0")?;
//! let mut ctx = RunContext::new(io, config)?;
//!
//! let bench = BenchmarkSet::open("bench/cant", 4)?;
//! let workload = ctx.load(&bench)?;
//! let report = ctx.run(&workload)?;
//! report.verify(&workload).into_result()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

pub mod backends;
mod channel;
pub mod chunker;
mod compute;
mod config;
mod dma;
mod error;
mod io;
pub mod loading;
pub mod profiling;
mod run;
mod scheduler;
pub mod striping;
pub mod verify;

pub use backends::{SimConfig, SimulatedDevice};
pub use channel::ChannelState;
pub use chunker::TransferChunker;
pub use compute::{ComputeUnitConfig, ComputeUnitController};
pub use config::{validate_channels, CacheMode, PlatformMap, RunConfig};
pub use dma::{DmaEngineDriver, EngineId, TransferRequest};
pub use error::{Result, SpmvError};
pub use io::{FileRegisterIo, RegisterIo};
pub use loading::{BenchmarkSet, BenchmarkSizes, UnitWorkload, Workload};
pub use profiling::{CounterSnapshot, Profiler, RuntimeLog};
pub use run::{RunContext, RunReport};
pub use scheduler::{SchedulerStats, StreamScheduler};
pub use striping::{HbmStriper, IndexRemap, StripeLayout};
pub use verify::Verification;

/// Platform model (re-exported from spmv-chip).
pub use spmv_chip as chip;
