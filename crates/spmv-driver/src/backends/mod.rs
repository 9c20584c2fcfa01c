//! Register transports
//!
//! - **File**: positional I/O on a device node (real hardware)
//! - **Simulated**: in-memory model of the platform (tests, dry runs)

pub mod simulated;

pub use crate::io::FileRegisterIo;
pub use simulated::{SimConfig, SimulatedDevice};
