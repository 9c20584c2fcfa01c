//! Multi-channel streaming DMA scheduler
//!
//! One [`ChannelState`] per stream and unit, all sharing one chunk bound.
//! A [`tick`](StreamScheduler::tick) visits every unfinished channel once
//! and hands a new chunk to each engine that has gone idle. Calling it in a
//! tight loop until it returns `false` is the only completion mechanism:
//! the engines raise no interrupts. The caller owns that loop and its poll
//! limit (see `RunContext::run`).

use crate::channel::ChannelState;
use crate::chunker::TransferChunker;
use crate::dma::DmaEngineDriver;
use crate::error::Result;
use crate::io::RegisterIo;
use tracing::{debug, info};

/// Counters accumulated while driving the channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Calls to `tick`
    pub ticks: u64,
    /// Descriptors written, priming included
    pub chunks_submitted: u64,
    /// Bytes covered by those descriptors
    pub bytes_submitted: u64,
    /// Visits that found the engine still busy
    pub busy_skips: u64,
}

/// Drives many channels over their DMA engines
#[derive(Debug, Clone)]
pub struct StreamScheduler {
    channels: Vec<ChannelState>,
    chunker: TransferChunker,
    stats: SchedulerStats,
}

impl StreamScheduler {
    /// Empty scheduler using `chunker`'s bound
    pub fn new(chunker: TransferChunker) -> Self {
        Self {
            channels: Vec::new(),
            chunker,
            stats: SchedulerStats::default(),
        }
    }

    /// Add a channel
    pub fn add_channel(&mut self, channel: ChannelState) {
        debug!(
            "Channel {}: {} bytes from {:#x}",
            channel.label(),
            channel.total_bytes(),
            channel.base_address()
        );
        self.channels.push(channel);
    }

    /// Channels in insertion order
    pub fn channels(&self) -> &[ChannelState] {
        &self.channels
    }

    /// Counters so far
    pub const fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Whether any channel has bytes left to submit
    pub fn has_pending(&self) -> bool {
        self.channels.iter().any(|c| !c.is_drained())
    }

    /// Submit the first chunk of every non-empty channel
    ///
    /// Engines are assumed freshly enabled, so busy state is not sampled.
    ///
    /// # Errors
    ///
    /// Any register failure aborts priming and is returned unchanged.
    pub fn prime(&mut self, io: &mut dyn RegisterIo, driver: &DmaEngineDriver) -> Result<()> {
        for channel in &mut self.channels {
            if let Some(request) = channel.next_request(&self.chunker) {
                driver.submit(io, &request)?;
                channel.advance(&request);
                self.stats.chunks_submitted += 1;
                self.stats.bytes_submitted += u64::from(request.length_bytes);
            }
        }
        info!("Primed {} channel(s)", self.channels.len());
        Ok(())
    }

    /// One non-blocking pass over every channel
    ///
    /// Returns whether any channel still has bytes remaining afterwards.
    ///
    /// # Errors
    ///
    /// Any register failure aborts the pass and is returned unchanged.
    pub fn tick(&mut self, io: &mut dyn RegisterIo, driver: &DmaEngineDriver) -> Result<bool> {
        self.stats.ticks += 1;
        let mut pending = false;
        for channel in &mut self.channels {
            let Some(request) = channel.next_request(&self.chunker) else {
                continue;
            };
            if driver.is_busy(io, channel.engine(), channel.direction())? {
                self.stats.busy_skips += 1;
            } else {
                driver.submit(io, &request)?;
                channel.advance(&request);
                self.stats.chunks_submitted += 1;
                self.stats.bytes_submitted += u64::from(request.length_bytes);
            }
            pending |= !channel.is_drained();
        }
        Ok(pending)
    }
}
