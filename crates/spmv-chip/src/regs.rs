//! Register maps for the AXI DMA engines and the SpMV compute units.
//!
//! Every engine and every compute unit is a small window of 32-bit
//! registers addressed by byte offset from its base.
//!
//! ```text
//! AXI DMA (direct register mode)
//! 0x00  MM2S_DMACR    control       0x30  S2MM_DMACR   control
//! 0x04  MM2S_DMASR    status        0x34  S2MM_DMASR   status
//! 0x18  MM2S_SA       addr lo       0x48  S2MM_DA      addr lo
//! 0x1c  MM2S_SA_MSB   addr hi       0x4c  S2MM_DA_MSB  addr hi
//! 0x28  MM2S_LENGTH   bytes         0x58  S2MM_LENGTH  bytes
//! ```

// ── DMA engine ───────────────────────────────────────────────────────────────

/// Transfer direction of one half of an AXI DMA engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Memory-mapped to stream (host memory feeds the accelerator). MM2S.
    ToDevice,
    /// Stream to memory-mapped (accelerator output lands in memory). S2MM.
    FromDevice,
}

impl Direction {
    /// Offset of the control register (`DMACR`).
    #[must_use]
    pub const fn control(self) -> u64 {
        match self {
            Self::ToDevice => dma::MM2S_DMACR,
            Self::FromDevice => dma::S2MM_DMACR,
        }
    }

    /// Offset of the status register (`DMASR`).
    #[must_use]
    pub const fn status(self) -> u64 {
        match self {
            Self::ToDevice => dma::MM2S_DMASR,
            Self::FromDevice => dma::S2MM_DMASR,
        }
    }

    /// Offset of the low address word; the high word and length follow it.
    #[must_use]
    pub const fn address(self) -> u64 {
        match self {
            Self::ToDevice => dma::MM2S_SA,
            Self::FromDevice => dma::S2MM_DA,
        }
    }

    /// Offset of the length register. Writing it launches the transfer.
    #[must_use]
    pub const fn length(self) -> u64 {
        match self {
            Self::ToDevice => dma::MM2S_LENGTH,
            Self::FromDevice => dma::S2MM_LENGTH,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToDevice => write!(f, "MM2S"),
            Self::FromDevice => write!(f, "S2MM"),
        }
    }
}

/// AXI DMA register offsets and bit definitions.
pub mod dma {
    /// MM2S control register.
    pub const MM2S_DMACR: u64 = 0x00;
    /// MM2S status register.
    pub const MM2S_DMASR: u64 = 0x04;
    /// MM2S source address, low 32 bits.
    pub const MM2S_SA: u64 = 0x18;
    /// MM2S source address, high 32 bits.
    pub const MM2S_SA_MSB: u64 = 0x1C;
    /// MM2S transfer length in bytes.
    pub const MM2S_LENGTH: u64 = 0x28;

    /// S2MM control register.
    pub const S2MM_DMACR: u64 = 0x30;
    /// S2MM status register.
    pub const S2MM_DMASR: u64 = 0x34;
    /// S2MM destination address, low 32 bits.
    pub const S2MM_DA: u64 = 0x48;
    /// S2MM destination address, high 32 bits.
    pub const S2MM_DA_MSB: u64 = 0x4C;
    /// S2MM buffer length in bytes.
    pub const S2MM_LENGTH: u64 = 0x58;

    /// Size of the register window of one engine.
    pub const WINDOW_SIZE: u64 = 0x5C;

    /// Words in one address/length burst: addr lo, addr hi, two reserved
    /// words, length.
    pub const SUBMIT_BURST_WORDS: usize = 5;

    /// Control register bits.
    pub mod control {
        /// Run/stop.
        pub const RUN: u32 = 1 << 0;
        /// Soft reset.
        pub const RESET: u32 = 1 << 2;
    }

    /// Status register bits.
    pub mod status {
        /// Channel halted.
        pub const HALTED: u32 = 1 << 0;
        /// Channel idle.
        pub const IDLE: u32 = 1 << 1;
        /// Bits sampled by the busy check.
        pub const BUSY_MASK: u32 = HALTED | IDLE;
    }
}

/// How the two low-order status bits encode "busy".
///
/// Two header variants of the DMA wrapper disagree. The variant shipped
/// with the DDR bitstreams treats an engine as busy while neither HALTED
/// nor IDLE is set; that matches the AXI DMA datasheet and is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusyPolarity {
    /// Busy iff `status & 0b11 == 0`.
    #[default]
    IdleBitsClear,
    /// Busy iff `status & 0b11 != 0`.
    IdleBitsSet,
}

impl BusyPolarity {
    /// Decode a raw status word.
    #[must_use]
    pub const fn is_busy(self, status: u32) -> bool {
        let low = status & dma::status::BUSY_MASK;
        match self {
            Self::IdleBitsClear => low == 0,
            Self::IdleBitsSet => low != 0,
        }
    }

    /// Status word a device following this convention reports.
    #[must_use]
    pub const fn encode(self, busy: bool) -> u32 {
        match (self, busy) {
            (Self::IdleBitsClear, true) | (Self::IdleBitsSet, false) => 0,
            (Self::IdleBitsClear, false) | (Self::IdleBitsSet, true) => dma::status::IDLE,
        }
    }
}

// ── Compute unit ─────────────────────────────────────────────────────────────

/// Compute-unit register layout.
///
/// The HLS core is built either with split input vectors, where control and
/// the three arguments are four consecutive words, or with the stock
/// `ap_ctrl_hs` block, where the control word packs start/done/idle and the
/// arguments live further up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlLayout {
    /// Four consecutive registers; idle is bit 0 of the control word.
    #[default]
    Split,
    /// Packed `ap_ctrl` word; idle is bit 2.
    Packed,
}

impl ControlLayout {
    /// Offset of the operand (non-zero) count register.
    #[must_use]
    pub const fn operand_count(self) -> u64 {
        match self {
            Self::Split => compute::split::VAL_SIZE,
            Self::Packed => compute::packed::VAL_SIZE,
        }
    }

    /// Offset of the output count register.
    #[must_use]
    pub const fn output_count(self) -> u64 {
        match self {
            Self::Split => compute::split::OUTPUT_SIZE,
            Self::Packed => compute::packed::OUTPUT_SIZE,
        }
    }

    /// Offset of the shared vector base register (low word).
    #[must_use]
    pub const fn vector_base(self) -> u64 {
        match self {
            Self::Split => compute::split::VECT_MEM,
            Self::Packed => compute::packed::VECT_MEM,
        }
    }

    /// Whether the vector base register is 64 bits wide.
    #[must_use]
    pub const fn wide_vector_base(self) -> bool {
        matches!(self, Self::Packed)
    }

    /// Mask of the idle bit in the control word.
    #[must_use]
    pub const fn idle_mask(self) -> u32 {
        match self {
            Self::Split => compute::split::IDLE,
            Self::Packed => compute::packed::AP_IDLE,
        }
    }
}

/// Compute-unit register offsets and bit definitions.
pub mod compute {
    /// Control word (both layouts).
    pub const AP_CTRL: u64 = 0x00;
    /// Size of the register window of one unit.
    pub const WINDOW_SIZE: u64 = 0x28;

    /// Split-vector layout.
    pub mod split {
        /// Operand count.
        pub const VAL_SIZE: u64 = 0x04;
        /// Output count.
        pub const OUTPUT_SIZE: u64 = 0x08;
        /// Shared vector base (32 bits).
        pub const VECT_MEM: u64 = 0x0C;
        /// Start bit (write).
        pub const START: u32 = 1 << 0;
        /// Idle bit (read).
        pub const IDLE: u32 = 1 << 0;
    }

    /// Stock `ap_ctrl_hs` layout.
    pub mod packed {
        /// Global interrupt enable.
        pub const GIE: u64 = 0x04;
        /// Operand count.
        pub const VAL_SIZE: u64 = 0x10;
        /// Output count.
        pub const OUTPUT_SIZE: u64 = 0x18;
        /// Shared vector base (64 bits, low word first).
        pub const VECT_MEM: u64 = 0x20;
        /// `ap_start`.
        pub const AP_START: u32 = 1 << 0;
        /// `ap_done`.
        pub const AP_DONE: u32 = 1 << 1;
        /// `ap_idle`.
        pub const AP_IDLE: u32 = 1 << 2;
        /// `auto_restart`, preserved across start.
        pub const AUTO_RESTART: u32 = 1 << 7;
    }
}
