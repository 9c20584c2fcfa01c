//! Cache/MSHR profiler access and the runtime counter log
//!
//! The profiler is driven through the declarative [`ProfilerMap`] of the
//! bitstream flavour: commands that a flavour lacks are rejected instead of
//! being written to a register that means something else.

use crate::error::{Result, SpmvError};
use crate::io::RegisterIo;
use spmv_chip::profiler::{command, CounterGroup, ProfilerMap, MEM_PORT_LABELS};
use std::collections::VecDeque;
use std::io::Write;
use tracing::{debug, warn};

/// Profiler of one bitstream
#[derive(Debug, Clone, Copy)]
pub struct Profiler {
    base: u64,
    map: &'static ProfilerMap,
}

impl Profiler {
    /// Profiler at `base` described by `map`
    pub const fn new(base: u64, map: &'static ProfilerMap) -> Self {
        Self { base, map }
    }

    /// Register map in use
    pub const fn map(&self) -> &'static ProfilerMap {
        self.map
    }

    /// Base address
    pub const fn base(&self) -> u64 {
        self.base
    }

    fn write_reg(&self, io: &mut dyn RegisterIo, reg: u64, value: u64) -> Result<()> {
        io.write_u64(self.base + ProfilerMap::byte_offset(reg), value)
    }

    fn command(&self, io: &mut dyn RegisterIo, value: u64) -> Result<()> {
        self.write_reg(io, 0, value)
    }

    fn optional_reg(&self, io: &mut dyn RegisterIo, reg: Option<u64>, what: &str, value: u64) -> Result<()> {
        let reg = reg.ok_or_else(|| {
            SpmvError::configuration(format!("this bitstream has no {what} register"))
        })?;
        debug!("Profiler {what} <- {value}");
        self.write_reg(io, reg, value)
    }

    /// Zero all counters
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on transport failure.
    pub fn clear_stats(&self, io: &mut dyn RegisterIo) -> Result<()> {
        self.command(io, command::CLEAR_STATS)
    }

    /// Latch all counters
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on transport failure.
    pub fn snapshot(&self, io: &mut dyn RegisterIo) -> Result<()> {
        self.command(io, command::SNAPSHOT)
    }

    /// Invalidate the cache
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on transport failure.
    pub fn invalidate_cache(&self, io: &mut dyn RegisterIo) -> Result<()> {
        self.command(io, command::INVALIDATE_CACHE)
    }

    /// Enable the cache
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on transport failure.
    pub fn enable_cache(&self, io: &mut dyn RegisterIo) -> Result<()> {
        self.command(io, command::ENABLE_CACHE)
    }

    /// Bypass the cache
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on transport failure.
    pub fn disable_cache(&self, io: &mut dyn RegisterIo) -> Result<()> {
        self.command(io, command::DISABLE_CACHE)
    }

    /// Divide the effective cache size by `2^divider`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the flavour has no such register.
    pub fn set_cache_divider(&self, io: &mut dyn RegisterIo, divider: u64) -> Result<()> {
        self.optional_reg(io, self.map.cache_divider_reg, "cache divider", divider)
    }

    /// Divide the usable MSHRs by `2^divider`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the flavour has no such register.
    pub fn set_mshr_divider(&self, io: &mut dyn RegisterIo, divider: u64) -> Result<()> {
        self.optional_reg(io, self.map.mshr_divider_reg, "MSHR divider", divider)
    }

    /// Cap the usable MSHRs
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the flavour has no such register.
    pub fn set_max_mshr(&self, io: &mut dyn RegisterIo, count: u64) -> Result<()> {
        self.optional_reg(io, self.map.max_mshr_reg, "max MSHR", count)
    }

    /// Cap the subentry buffer rows
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the flavour has no such register.
    pub fn set_max_subentry_rows(&self, io: &mut dyn RegisterIo, rows: u64) -> Result<()> {
        self.optional_reg(io, self.map.max_subentry_rows_reg, "max subentry rows", rows)
    }

    /// Soft-reset the memory subsystem
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the flavour has no reset register.
    pub fn reset(&self, io: &mut dyn RegisterIo) -> Result<()> {
        self.optional_reg(io, self.map.reset_reg, "reset", command::RESET)
    }

    fn read_block(&self, io: &mut dyn RegisterIo, reg: u64, len: usize) -> Result<Vec<u64>> {
        let bytes = io.read(self.base + ProfilerMap::byte_offset(reg), len * 8)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect())
    }

    fn read_group(
        &self,
        io: &mut dyn RegisterIo,
        reg: u64,
        group: &CounterGroup,
        instance: String,
    ) -> Result<CounterRow> {
        Ok(CounterRow {
            group: group.name,
            instance,
            labels: group.labels.to_vec(),
            values: self.read_block(io, reg, group.len())?,
        })
    }

    /// Latch and read every counter
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on transport failure.
    pub fn snapshot_counters(&self, io: &mut dyn RegisterIo) -> Result<CounterSnapshot> {
        self.snapshot(io)?;
        let map = self.map;
        let mut rows = Vec::new();
        for handler in 0..map.request_handlers {
            for group in map.handler_groups {
                let reg = map.handler_register(handler, group);
                rows.push(self.read_group(io, reg, group, format!("handler {handler}"))?);
            }
        }
        for input in 0..map.inputs {
            let reg = map.input_register(input);
            rows.push(self.read_group(io, reg, &map.input_group, format!("input {input}"))?);
        }
        let mut labels = vec!["total cycles"];
        for _ in 0..map.mem_ports {
            labels.extend(MEM_PORT_LABELS);
        }
        rows.push(CounterRow {
            group: "Misc",
            instance: String::from("all"),
            values: self.read_block(io, map.misc_register(), labels.len())?,
            labels,
        });
        Ok(CounterSnapshot { rows })
    }

    /// Latch and read the counters the runtime log keeps
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on transport failure.
    pub fn sample(&self, io: &mut dyn RegisterIo) -> Result<RuntimeSample> {
        self.snapshot(io)?;
        let map = self.map;
        let mut sums: Vec<Vec<u64>> = map.handler_groups.iter().map(|g| vec![0; g.len()]).collect();
        for handler in 0..map.request_handlers {
            for (group, sum) in map.handler_groups.iter().zip(&mut sums) {
                let values = self.read_block(io, map.handler_register(handler, group), group.len())?;
                for (s, v) in sum.iter_mut().zip(values) {
                    *s = s.wrapping_add(v);
                }
            }
        }
        let cycles = io.read_u64(self.base + ProfilerMap::byte_offset(map.misc_register()))?;
        Ok(RuntimeSample { cycles, sums })
    }
}

/// Counters of one group instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRow {
    /// Group name
    pub group: &'static str,
    /// Which instance, e.g. `handler 2`
    pub instance: String,
    /// Counter labels
    pub labels: Vec<&'static str>,
    /// Counter values, in label order
    pub values: Vec<u64>,
}

/// Every profiler counter at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    rows: Vec<CounterRow>,
}

impl CounterSnapshot {
    /// All rows
    pub fn rows(&self) -> &[CounterRow] {
        &self.rows
    }

    /// Counter `label` of `group` summed over instances
    pub fn sum(&self, group: &str, label: &str) -> u64 {
        self.rows
            .iter()
            .filter(|r| r.group == group)
            .filter_map(|r| r.labels.iter().position(|l| *l == label).map(|i| r.values[i]))
            .fold(0u64, u64::wrapping_add)
    }

    /// Total cycles from the misc block
    pub fn total_cycles(&self) -> Option<u64> {
        self.rows
            .iter()
            .find(|r| r.group == "Misc")
            .and_then(|r| r.values.first().copied())
    }

    /// Write as `group,instance,counter,value` CSV
    ///
    /// # Errors
    ///
    /// Returns any error from `out`.
    pub fn write_csv<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        writeln!(out, "group,instance,counter,value")?;
        for row in &self.rows {
            for (label, value) in row.labels.iter().zip(&row.values) {
                writeln!(out, "{},{},{label},{value}", row.group, row.instance)?;
            }
        }
        Ok(())
    }
}

/// One runtime log entry: cycle count and per-group sums over handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSample {
    /// Total cycles at the snapshot
    pub cycles: u64,
    /// Per handler group, counters summed over request handlers
    pub sums: Vec<Vec<u64>>,
}

/// Bounded log of runtime samples
///
/// Once full, each new sample evicts the oldest one and bumps `dropped`.
#[derive(Debug, Clone)]
pub struct RuntimeLog {
    map: &'static ProfilerMap,
    capacity: usize,
    samples: VecDeque<RuntimeSample>,
    dropped: u64,
}

impl RuntimeLog {
    /// Log holding at most `capacity` samples
    pub fn new(map: &'static ProfilerMap, capacity: usize) -> Self {
        Self {
            map,
            capacity,
            samples: VecDeque::with_capacity(capacity.min(1024)),
            dropped: 0,
        }
    }

    /// Append a sample
    pub fn push(&mut self, sample: RuntimeSample) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
            if self.dropped == 0 {
                warn!("Runtime log full at {} samples; dropping oldest", self.capacity);
            }
            self.dropped += 1;
        }
        self.samples.push_back(sample);
    }

    /// Samples kept, oldest first
    pub fn samples(&self) -> impl ExactSizeIterator<Item = &RuntimeSample> {
        self.samples.iter()
    }

    /// Samples kept
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether nothing was logged
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples evicted
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Write as CSV: cycles, then one column per handler-group counter
    ///
    /// # Errors
    ///
    /// Returns any error from `out`.
    pub fn write_csv<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        write!(out, "cycles")?;
        for group in self.map.handler_groups {
            for label in group.labels {
                write!(out, ",{} {label}", group.name)?;
            }
        }
        writeln!(out)?;
        for sample in &self.samples {
            write!(out, "{}", sample.cycles)?;
            for value in sample.sums.iter().flatten() {
                write!(out, ",{value}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::simulated::SimulatedDevice;
    use spmv_chip::memory::blocks;
    use spmv_chip::profiler::{HardwareProfile, HASHED, INCLUSIVE};

    fn sample(cycles: u64) -> RuntimeSample {
        RuntimeSample { cycles, sums: vec![vec![cycles]] }
    }

    #[test]
    fn commands_land_on_register_zero() {
        let mut dev = SimulatedDevice::reference();
        let prof = Profiler::new(blocks::PROFILER_BASE, &HASHED);
        prof.clear_stats(&mut dev).unwrap();
        prof.set_cache_divider(&mut dev, 3).unwrap();
        prof.set_max_subentry_rows(&mut dev, 512).unwrap();
        assert_eq!(
            dev.profiler_writes(),
            &[(0, command::CLEAR_STATS), (1, 3), (4, 512)]
        );
    }

    #[test]
    fn unsupported_commands_rejected() {
        let mut dev = SimulatedDevice::reference();
        let hashed = Profiler::new(blocks::PROFILER_BASE, &HASHED);
        assert!(hashed.reset(&mut dev).unwrap_err().is_configuration());

        let inclusive = Profiler::new(blocks::PROFILER_BASE, &INCLUSIVE);
        assert!(inclusive.set_mshr_divider(&mut dev, 1).unwrap_err().is_configuration());
        inclusive.reset(&mut dev).unwrap();
        inclusive.set_max_mshr(&mut dev, 64).unwrap();
        assert_eq!(dev.profiler_writes(), &[(3, command::RESET), (2, 64)]);
    }

    #[test]
    fn snapshot_reads_every_group() {
        let mut dev = SimulatedDevice::reference();
        let map = HardwareProfile::HashedMshr.profiler_map().unwrap();
        let prof = Profiler::new(blocks::PROFILER_BASE, map);
        let snap = prof.snapshot_counters(&mut dev).unwrap();

        let expected = map.request_handlers as usize * map.handler_groups.len() + map.inputs as usize + 1;
        assert_eq!(snap.rows().len(), expected);
        assert_eq!(snap.total_cycles(), Some(0));
        assert_eq!(snap.sum("Cache", "hits"), 0);

        let mut csv = Vec::new();
        snap.write_csv(&mut csv).unwrap();
        let text = String::from_utf8(csv).unwrap();
        assert!(text.starts_with("group,instance,counter,value\n"));
        assert!(text.contains("Cache,handler 3,hits,0"));
        assert!(text.contains("Misc,all,total cycles,0"));
    }

    #[test]
    fn runtime_log_keeps_newest() {
        let mut log = RuntimeLog::new(&HASHED, 3);
        for c in 0..5 {
            log.push(sample(c));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.dropped(), 2);
        let kept: Vec<u64> = log.samples().map(|s| s.cycles).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn runtime_log_csv_header() {
        let mut log = RuntimeLog::new(&INCLUSIVE, 4);
        log.push(sample(7));
        let mut csv = Vec::new();
        log.write_csv(&mut csv).unwrap();
        let text = String::from_utf8(csv).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("cycles,MSHR currently used MSHR"));
        assert_eq!(lines.next(), Some("7,7"));
    }
}
