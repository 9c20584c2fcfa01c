//! AXI DMA engine driver (direct register mode)
//!
//! ```text
//! reset   ──▶  enable  ──▶  submit ──▶ (busy) ──▶ submit ──▶ ...
//! DMACR|=4     DMACR|=1     SA lo, SA hi, -, -, LENGTH  (one burst)
//! ```
//!
//! Writing the length register launches the transfer, so the address and
//! length go out as one five-word burst ending on it. There is no queue in
//! the engine: a new descriptor may only be written while it is not busy.

use crate::config::PlatformMap;
use crate::error::{Result, SpmvError};
use crate::io::RegisterIo;
use spmv_chip::memory::StreamKind;
use spmv_chip::regs::{dma, BusyPolarity, Direction};
use tracing::debug;

/// One engine: the stream slot of a compute unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId {
    /// Compute unit the engine feeds or drains
    pub unit: usize,
    /// Stream the engine carries
    pub stream: StreamKind,
}

impl EngineId {
    /// Engine of `stream` on `unit`
    pub const fn new(unit: usize, stream: StreamKind) -> Self {
        Self { unit, stream }
    }

    /// Direction this engine is wired for
    pub const fn direction(&self) -> Direction {
        match self.stream {
            StreamKind::Output => Direction::FromDevice,
            _ => Direction::ToDevice,
        }
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.stream.label(), self.unit)
    }
}

/// One DMA descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    /// Target engine
    pub engine: EngineId,
    /// Source (MM2S) or destination (S2MM) byte address
    pub address: u64,
    /// Bytes to move
    pub length_bytes: u32,
    /// Transfer direction
    pub direction: Direction,
}

impl TransferRequest {
    /// The five-word register burst for this descriptor
    pub fn burst(&self) -> [u32; dma::SUBMIT_BURST_WORDS] {
        [
            (self.address & 0xffff_ffff) as u32,
            (self.address >> 32) as u32,
            0,
            0,
            self.length_bytes,
        ]
    }
}

/// Drives the engines of every active compute unit
#[derive(Debug, Clone)]
pub struct DmaEngineDriver {
    platform: PlatformMap,
    polarity: BusyPolarity,
    max_chunk: u32,
}

impl DmaEngineDriver {
    /// Create a driver over the engines in `platform`
    pub fn new(platform: PlatformMap, polarity: BusyPolarity, max_chunk: u32) -> Self {
        Self {
            platform,
            polarity,
            max_chunk,
        }
    }

    /// Status convention in use
    pub const fn polarity(&self) -> BusyPolarity {
        self.polarity
    }

    /// Largest length `submit` accepts
    pub const fn max_chunk(&self) -> u32 {
        self.max_chunk
    }

    /// Set the soft-reset bit. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the control register cannot be accessed.
    pub fn reset(
        &self,
        io: &mut dyn RegisterIo,
        engine: EngineId,
        direction: Direction,
    ) -> Result<()> {
        let reg = self.platform.engine_base(engine)? + direction.control();
        let ctrl = io.read_u32(reg)?;
        io.write_u32(reg, ctrl | dma::control::RESET)?;
        debug!("Reset {engine} {direction}");
        Ok(())
    }

    /// Set the run bit. Call once after `reset`, before any `submit`.
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the control register cannot be accessed.
    pub fn enable(
        &self,
        io: &mut dyn RegisterIo,
        engine: EngineId,
        direction: Direction,
    ) -> Result<()> {
        let reg = self.platform.engine_base(engine)? + direction.control();
        let ctrl = io.read_u32(reg)?;
        io.write_u32(reg, ctrl | dma::control::RUN)?;
        debug!("Enabled {engine} {direction}");
        Ok(())
    }

    /// Whether the engine is still working on its last descriptor
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the status register cannot be read.
    pub fn is_busy(
        &self,
        io: &mut dyn RegisterIo,
        engine: EngineId,
        direction: Direction,
    ) -> Result<bool> {
        let status = io.read_u32(self.platform.engine_base(engine)? + direction.status())?;
        Ok(self.polarity.is_busy(status))
    }

    /// Write one descriptor. The engine must not be busy.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty or oversized request, or
    /// `RegisterIo` if the burst cannot be written.
    pub fn submit(&self, io: &mut dyn RegisterIo, request: &TransferRequest) -> Result<()> {
        if request.length_bytes == 0 || request.length_bytes > self.max_chunk {
            return Err(SpmvError::configuration(format!(
                "transfer of {} bytes on {} outside 1..={}",
                request.length_bytes, request.engine, self.max_chunk
            )));
        }
        let base = self.platform.engine_base(request.engine)?;
        let burst = request.burst();
        io.write(
            base + request.direction.address(),
            bytemuck::cast_slice(&burst),
        )?;
        debug!(
            "Submitted {} bytes at {:#x} on {} {}",
            request.length_bytes, request.address, request.engine, request.direction
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::simulated::SimulatedDevice;

    fn engine() -> EngineId {
        EngineId::new(0, StreamKind::RowPtr)
    }

    #[test]
    fn burst_layout() {
        let req = TransferRequest {
            engine: engine(),
            address: 0x2_1234_5678,
            length_bytes: 0x40,
            direction: Direction::ToDevice,
        };
        assert_eq!(req.burst(), [0x1234_5678, 0x2, 0, 0, 0x40]);
    }

    #[test]
    fn submit_writes_registers() {
        let platform = PlatformMap::reference();
        let mut dev = SimulatedDevice::reference();
        let driver = DmaEngineDriver::new(platform.clone(), BusyPolarity::IdleBitsClear, 1024);
        let id = engine();

        driver.reset(&mut dev, id, Direction::ToDevice).unwrap();
        driver.enable(&mut dev, id, Direction::ToDevice).unwrap();
        assert!(!driver.is_busy(&mut dev, id, Direction::ToDevice).unwrap());

        let req = TransferRequest {
            engine: id,
            address: 0x2_0000_0040,
            length_bytes: 64,
            direction: Direction::ToDevice,
        };
        driver.submit(&mut dev, &req).unwrap();

        let base = platform.engine_base(id).unwrap();
        assert_eq!(dev.read_u32(base + dma::MM2S_SA).unwrap(), 0x40);
        assert_eq!(dev.read_u32(base + dma::MM2S_SA_MSB).unwrap(), 0x2);
        assert_eq!(dev.read_u32(base + dma::MM2S_LENGTH).unwrap(), 64);
    }

    #[test]
    fn oversized_request_rejected_before_io() {
        let driver = DmaEngineDriver::new(PlatformMap::reference(), BusyPolarity::default(), 64);
        let mut dev = SimulatedDevice::reference();
        let req = TransferRequest {
            engine: engine(),
            address: 0,
            length_bytes: 65,
            direction: Direction::ToDevice,
        };
        assert!(driver.submit(&mut dev, &req).unwrap_err().is_configuration());
        assert_eq!(dev.access_count(), 0);
    }

    #[test]
    fn output_engine_direction() {
        assert_eq!(EngineId::new(2, StreamKind::Output).direction(), Direction::FromDevice);
        assert_eq!(EngineId::new(2, StreamKind::ColIdx).direction(), Direction::ToDevice);
        assert_eq!(EngineId::new(2, StreamKind::ColIdx).to_string(), "col[2]");
    }
}
