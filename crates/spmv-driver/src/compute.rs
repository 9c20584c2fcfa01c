//! Compute-unit control
//!
//! Both register layouts sit behind one controller; the layout is fixed
//! when the controller is built.

use crate::config::PlatformMap;
use crate::error::{Result, SpmvError};
use crate::io::RegisterIo;
use spmv_chip::regs::{compute, ControlLayout};
use tracing::debug;

/// Arguments of one compute-unit invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeUnitConfig {
    /// Non-zeros the unit consumes
    pub operand_count: u32,
    /// Results the unit produces
    pub output_count: u32,
    /// Base address of the shared dense vector
    pub shared_vector_base: u64,
}

/// Configures, starts and polls the compute units
#[derive(Debug, Clone)]
pub struct ComputeUnitController {
    platform: PlatformMap,
    layout: ControlLayout,
}

impl ComputeUnitController {
    /// Create a controller for units using `layout`
    pub fn new(platform: PlatformMap, layout: ControlLayout) -> Self {
        Self { platform, layout }
    }

    /// Register layout in use
    pub const fn layout(&self) -> ControlLayout {
        self.layout
    }

    /// Write the invocation arguments. Must precede `start`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the vector base does not fit the layout's
    /// register, or `RegisterIo` on transport failure.
    pub fn configure(
        &self,
        io: &mut dyn RegisterIo,
        unit: usize,
        config: &ComputeUnitConfig,
    ) -> Result<()> {
        let base = self.platform.compute_base(unit)?;
        let layout = self.layout;
        io.write_u32(base + layout.operand_count(), config.operand_count)?;
        io.write_u32(base + layout.output_count(), config.output_count)?;
        if layout.wide_vector_base() {
            io.write_u64(base + layout.vector_base(), config.shared_vector_base)?;
        } else {
            let narrow = u32::try_from(config.shared_vector_base).map_err(|_| {
                SpmvError::configuration(format!(
                    "vector base {:#x} does not fit the 32-bit register of unit {unit}",
                    config.shared_vector_base
                ))
            })?;
            io.write_u32(base + layout.vector_base(), narrow)?;
        }
        debug!(
            "Configured unit {unit}: operands={} outputs={} vector={:#x}",
            config.operand_count, config.output_count, config.shared_vector_base
        );
        Ok(())
    }

    /// Assert the start bit
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on transport failure.
    pub fn start(&self, io: &mut dyn RegisterIo, unit: usize) -> Result<()> {
        let reg = self.platform.compute_base(unit)? + compute::AP_CTRL;
        match self.layout {
            ControlLayout::Split => io.write_u32(reg, compute::split::START)?,
            ControlLayout::Packed => {
                let ctrl = io.read_u32(reg)? & compute::packed::AUTO_RESTART;
                io.write_u32(reg, ctrl | compute::packed::AP_START)?;
            }
        }
        debug!("Started unit {unit}");
        Ok(())
    }

    /// Whether the unit reports idle
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on transport failure.
    pub fn is_idle(&self, io: &mut dyn RegisterIo, unit: usize) -> Result<bool> {
        let ctrl = io.read_u32(self.platform.compute_base(unit)? + compute::AP_CTRL)?;
        Ok(ctrl & self.layout.idle_mask() != 0)
    }
}
