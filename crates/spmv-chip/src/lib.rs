//! Platform model for the FPGA SpMV accelerator.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the platform the host talks to: DMA-engine register
//! offsets, compute-unit register layouts, the cache/MSHR profiler register
//! map for each bitstream flavour, and the reference address map.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | DMA engine and compute-unit register offsets and bit definitions |
//! | [`memory`] | Reference address map, HBM channel geometry, DMA engine classes |
//! | [`profiler`] | Cache/MSHR profiler register map per hardware profile |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod memory;
pub mod profiler;
pub mod regs;
