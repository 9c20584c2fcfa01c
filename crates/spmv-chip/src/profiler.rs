//! Cache/MSHR profiler register map.
//!
//! The memory subsystem between the compute units and memory exposes a
//! block of 64-bit registers. Register `i` lives at byte offset `8·i` from
//! the profiler base. The first few registers are write-only commands; the
//! rest are performance counters grouped per request handler, followed by
//! one block per ROB input and a trailing misc block.
//!
//! ```text
//! handler h, group g   (h · REGS_PER_HANDLER + g.module_offset) · 8
//! ROB input i          ((handlers + i) · REGS_PER_HANDLER) · 8
//! misc                 ((handlers + inputs) · REGS_PER_HANDLER) · 8
//! ```
//!
//! Three bitstream flavours exist plus a build with no profiler at all.
//! Instead of branching on the flavour at every call site, the flavour is
//! named once with a [`HardwareProfile`] and resolved to a [`ProfilerMap`].

/// Bitstream flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HardwareProfile {
    /// Hashed MSHR tables with a subentry buffer.
    #[default]
    HashedMshr,
    /// Fully associative MSHRs with a load buffer.
    TraditionalMshr,
    /// MSHRs that double as the cache.
    MshrInclusive,
    /// No memory subsystem accelerator; nothing to profile.
    NoAccelerator,
}

impl HardwareProfile {
    /// Register map for this flavour, `None` when there is no profiler.
    #[must_use]
    pub const fn profiler_map(self) -> Option<&'static ProfilerMap> {
        match self {
            Self::HashedMshr => Some(&HASHED),
            Self::TraditionalMshr => Some(&TRADITIONAL),
            Self::MshrInclusive => Some(&INCLUSIVE),
            Self::NoAccelerator => None,
        }
    }
}

/// Command register values (written to register 0).
pub mod command {
    /// Zero all counters.
    pub const CLEAR_STATS: u64 = 1;
    /// Latch counters for a consistent read.
    pub const SNAPSHOT: u64 = 2;
    /// Invalidate the cache.
    pub const INVALIDATE_CACHE: u64 = 4;
    /// Enable the cache.
    pub const ENABLE_CACHE: u64 = 8;
    /// Bypass the cache.
    pub const DISABLE_CACHE: u64 = 16;
    /// Soft reset (MSHR-inclusive only, written to the reset register).
    pub const RESET: u64 = 8;
}

/// A run of consecutive counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterGroup {
    /// Display name.
    pub name: &'static str,
    /// Register offset inside the owning block.
    pub offset: u64,
    /// One label per counter, in register order.
    pub labels: &'static [&'static str],
}

impl CounterGroup {
    /// Number of counters in the group.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the group is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Declarative register map of one profiler flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilerMap {
    /// Request handlers (cache banks).
    pub request_handlers: u64,
    /// ROB inputs (one per compute-unit port).
    pub inputs: u64,
    /// External memory ports.
    pub mem_ports: u64,
    /// Registers per request handler block.
    pub regs_per_handler: u64,
    /// Registers per module inside a handler block.
    pub regs_per_module: u64,
    /// Counter groups repeated in every request handler.
    pub handler_groups: &'static [CounterGroup],
    /// Counters of every ROB input block.
    pub input_group: CounterGroup,
    /// Register of the cache divider, if configurable.
    pub cache_divider_reg: Option<u64>,
    /// Register of the MSHR divider, if configurable.
    pub mshr_divider_reg: Option<u64>,
    /// Register of the MSHR limit, if configurable.
    pub max_mshr_reg: Option<u64>,
    /// Register of the subentry row limit, if configurable.
    pub max_subentry_rows_reg: Option<u64>,
    /// Register taking the reset command, if supported.
    pub reset_reg: Option<u64>,
    /// Total cache size in bytes across handlers.
    pub cache_bytes: u64,
    /// Total MSHRs across handlers.
    pub mshr_count: u64,
    /// log2 of the number of cache divider settings.
    pub cache_divider_width: u32,
}

impl ProfilerMap {
    /// Register index of handler group `group` of handler `handler`.
    #[must_use]
    pub const fn handler_register(&self, handler: u64, group: &CounterGroup) -> u64 {
        handler * self.regs_per_handler + group.offset
    }

    /// Register index of ROB input block `input`.
    #[must_use]
    pub const fn input_register(&self, input: u64) -> u64 {
        (self.request_handlers + input) * self.regs_per_handler + self.input_group.offset
    }

    /// Register index of the misc block.
    #[must_use]
    pub const fn misc_register(&self) -> u64 {
        (self.request_handlers + self.inputs) * self.regs_per_handler
    }

    /// Counters in the misc block: total cycles plus three per memory port.
    #[must_use]
    pub const fn misc_len(&self) -> usize {
        1 + 3 * self.mem_ports as usize
    }

    /// Number of distinct cache divider settings.
    #[must_use]
    pub const fn cache_divider_values(&self) -> u32 {
        1 << self.cache_divider_width
    }

    /// Byte offset of register `reg`.
    #[must_use]
    pub const fn byte_offset(reg: u64) -> u64 {
        reg * 8
    }
}

/// Labels of the misc-block memory-port counters.
pub const MEM_PORT_LABELS: [&str; 3] = ["cycles not ready", "sent requests", "received responses"];

const CACHE: CounterGroup = CounterGroup {
    name: "Cache",
    offset: 0,
    labels: &[
        "received requests",
        "hits",
        "cycles out misses stall",
        "cycles out data stall",
        "cycles hits on out misses stall",
        "cycles pipeline stalls",
    ],
};

const SUBENTRY: CounterGroup = CounterGroup {
    name: "Subentry buffer",
    offset: 2 * 128,
    labels: &[
        "currently used entries",
        "max used entries",
        "currently used rows",
        "max used rows",
        "currently rows with NextRowPtr valid",
        "max rows with NextRowPtr valid",
        "cycles RespGen stall",
        "cycles write pipeline stall",
        "cycles valid NextPtr input stall",
        "NextPtr cache hits",
        "accum used entries",
        "accum used rows",
        "cycles FRQ stop alloc",
    ],
};

const RESP_GEN_LABELS: &[&str] = &[
    "accepted inputs count",
    "responses sent out count",
    "cycles out not ready",
];

const ROB_INPUT: CounterGroup = CounterGroup {
    name: "ROB Input",
    offset: 0,
    labels: &[
        "received requests",
        "received responses",
        "currently used entries",
        "max used entries",
        "sent responses",
        "cycles full stall",
        "cycles reqs in stall",
        "cycles reqs out stall",
        "cycles resp out stall",
    ],
};

const HASHED_GROUPS: &[CounterGroup] = &[
    CACHE,
    CounterGroup {
        name: "MSHR",
        offset: 128,
        labels: &[
            "currently used MSHR",
            "max used MSHR",
            "collision trigger count",
            "cycles spent handling collisions",
            "stall trigger count",
            "cycles spent stalling",
            "accepted allocs count",
            "accepted deallocs count",
            "cycles allocs stall",
            "cycles deallocs stall",
            "enqueued mem reqs count",
            "cycles out LdBuf not ready",
            "accum used MSHR",
            "cycles allocs stall LdBuf",
        ],
    },
    SUBENTRY,
    CounterGroup { name: "Response Generator", offset: 3 * 128, labels: RESP_GEN_LABELS },
];

const TRADITIONAL_GROUPS: &[CounterGroup] = &[
    CACHE,
    CounterGroup {
        name: "MSHR",
        offset: 128,
        labels: &[
            "currently used MSHR",
            "max used MSHR",
            "cycles MSHR full",
            "cycles LdBuf full",
            "stall trigger count",
            "cycles spent stalling",
            "accepted allocs count",
            "accepted deallocs count",
            "cycles allocs stall",
            "cycles deallocs stall",
            "enqueued mem reqs count",
            "cycles out LdBuf not ready",
            "accum used MSHR",
            "cycles allocs stall LdBuf",
        ],
    },
    SUBENTRY,
    CounterGroup { name: "Response Generator", offset: 3 * 128, labels: RESP_GEN_LABELS },
];

const INCLUSIVE_GROUPS: &[CounterGroup] = &[
    CounterGroup {
        name: "MSHR",
        offset: 0,
        labels: &[
            "currently used MSHR",
            "max used MSHR",
            "max used subentry",
            "collision trigger count",
            "cycles spent handling collisions",
            "stall trigger count",
            "cycles spent stalling",
            "accepted allocs count",
            "accepted deallocs count",
            "cycles allocs stall",
            "cycles deallocs stall",
            "enqueued mem reqs count",
            "cache hit count",
            "subentry full count",
            "accum used MSHR",
            "cycles subentry full stall",
            "deallocs retry count",
            "ctrlSignal",
        ],
    },
    CounterGroup { name: "Response Generator", offset: 3 * 256, labels: RESP_GEN_LABELS },
];

/// Hashed-MSHR bitstream: 4 handlers, 4 × 1024 MSHRs each, 256 KB cache each.
pub const HASHED: ProfilerMap = ProfilerMap {
    request_handlers: 4,
    inputs: 4,
    mem_ports: 1,
    regs_per_handler: 512,
    regs_per_module: 128,
    handler_groups: HASHED_GROUPS,
    input_group: ROB_INPUT,
    cache_divider_reg: Some(1),
    mshr_divider_reg: Some(2),
    max_mshr_reg: Some(3),
    max_subentry_rows_reg: Some(4),
    reset_reg: None,
    cache_bytes: 4 * 262_144,
    mshr_count: 4 * 4 * 1024,
    cache_divider_width: 3,
};

/// Traditional-MSHR bitstream.
pub const TRADITIONAL: ProfilerMap = ProfilerMap {
    handler_groups: TRADITIONAL_GROUPS,
    ..HASHED
};

/// MSHR-inclusive bitstream.
pub const INCLUSIVE: ProfilerMap = ProfilerMap {
    regs_per_module: 256,
    handler_groups: INCLUSIVE_GROUPS,
    cache_divider_reg: Some(1),
    mshr_divider_reg: None,
    max_mshr_reg: Some(2),
    max_subentry_rows_reg: None,
    reset_reg: Some(3),
    ..HASHED
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_fit_inside_module() {
        for profile in [
            HardwareProfile::HashedMshr,
            HardwareProfile::TraditionalMshr,
            HardwareProfile::MshrInclusive,
        ] {
            let map = profile.profiler_map().expect("profiled flavour");
            for group in map.handler_groups {
                assert!(group.offset + group.len() as u64 <= map.regs_per_handler);
                assert!(group.len() as u64 <= map.regs_per_module);
            }
        }
    }

    #[test]
    fn block_layout() {
        let map = &HASHED;
        assert_eq!(map.input_register(0), 4 * 512);
        assert_eq!(map.misc_register(), 8 * 512);
        assert_eq!(map.misc_len(), 4);
        assert_eq!(ProfilerMap::byte_offset(map.misc_register()), 8 * 512 * 8);
    }

    #[test]
    fn no_accelerator_has_no_map() {
        assert!(HardwareProfile::NoAccelerator.profiler_map().is_none());
        assert_eq!(INCLUSIVE.reset_reg, Some(3));
        assert!(HASHED.reset_reg.is_none());
    }
}
