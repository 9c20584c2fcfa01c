// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated SpMV platform
//!
//! Implements [`RegisterIo`] over an in-memory model of the whole address
//! space, so the run loop can be exercised end to end without an FPGA:
//!
//! - **Memory**: sparse 4 KiB pages; unwritten bytes read as zero.
//! - **DMA engines**: MM2S and S2MM halves with the real register window.
//!   A submitted transfer stays busy for a configurable number of device
//!   accesses, then MM2S appends the source bytes to the unit's input
//!   stream and S2MM drains the unit's result stream into memory.
//! - **Compute units**: once started and fed every operand, a unit computes
//!   `y = A·x` in f32 from its CSR streams, reading `x` from the vector
//!   base it was configured with. It reports idle once its results are
//!   drained.
//! - **Profiler**: accepts commands, reads as zero.
//!
//! Time only advances when the host touches the device, which makes every
//! run deterministic.

use crate::config::PlatformMap;
use crate::error::{Result, SpmvError};
use crate::io::RegisterIo;
use spmv_chip::memory::StreamKind;
use spmv_chip::regs::{compute, dma, BusyPolarity, ControlLayout, Direction};
use std::collections::HashMap;
use tracing::debug;

const PAGE: u64 = 4096;
const ENGINE_WORDS: usize = (dma::WINDOW_SIZE / 4) as usize + 1;
const UNIT_WORDS: usize = (compute::WINDOW_SIZE / 4) as usize;
const PROFILER_WINDOW: u64 = 0x1_0000;

/// Behaviour of the simulated platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Compute-unit register layout
    pub layout: ControlLayout,
    /// DMA status convention
    pub polarity: BusyPolarity,
    /// Device accesses a transfer stays busy before completing
    pub latency: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            layout: ControlLayout::Split,
            polarity: BusyPolarity::IdleBitsClear,
            latency: 4,
        }
    }
}

impl SimConfig {
    /// Set the register layout
    pub fn with_layout(mut self, layout: ControlLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the status convention
    pub fn with_polarity(mut self, polarity: BusyPolarity) -> Self {
        self.polarity = polarity;
        self
    }

    /// Set the transfer latency in device accesses
    pub fn with_latency(mut self, latency: u32) -> Self {
        self.latency = latency;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Transfer {
    address: u64,
    length: u32,
    countdown: u32,
}

#[derive(Debug, Default)]
struct Engine {
    regs: [u32; ENGINE_WORDS],
    pending: [Option<Transfer>; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    Idle,
    Running,
    Done,
}

#[derive(Debug)]
struct Unit {
    regs: [u32; UNIT_WORDS],
    state: UnitState,
    inputs: [Vec<u8>; 3],
    output: Option<Vec<u8>>,
    drained: usize,
}

impl Default for Unit {
    fn default() -> Self {
        Self {
            regs: [0; UNIT_WORDS],
            state: UnitState::Idle,
            inputs: Default::default(),
            output: None,
            drained: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Window {
    Engine(usize, usize),
    Unit(usize),
    Profiler(u64),
}

/// In-memory model of the accelerator platform
#[derive(Debug)]
pub struct SimulatedDevice {
    platform: PlatformMap,
    config: SimConfig,
    pages: HashMap<u64, Box<[u8; PAGE as usize]>>,
    engines: Vec<[Engine; 4]>,
    units: Vec<Unit>,
    profiler_writes: Vec<(u64, u64)>,
    faults: Vec<u64>,
    accesses: u64,
}

impl SimulatedDevice {
    /// Device laid out as `platform`
    pub fn new(platform: PlatformMap, config: SimConfig) -> Self {
        let engines = (0..platform.engine_bases.len()).map(|_| Default::default()).collect();
        let units = (0..platform.unit_count()).map(|_| Unit::default()).collect();
        Self {
            platform,
            config,
            pages: HashMap::new(),
            engines,
            units,
            profiler_writes: Vec::new(),
            faults: Vec::new(),
            accesses: 0,
        }
    }

    /// Reference platform with default behaviour
    pub fn reference() -> Self {
        Self::new(PlatformMap::reference(), SimConfig::default())
    }

    /// Behaviour in use
    pub const fn config(&self) -> SimConfig {
        self.config
    }

    /// Make every later access touching `address` fail
    pub fn inject_fault(&mut self, address: u64) {
        self.faults.push(address);
    }

    /// Accesses served so far
    pub const fn access_count(&self) -> u64 {
        self.accesses
    }

    /// `(register, value)` pairs written to the profiler, in order
    pub fn profiler_writes(&self) -> &[(u64, u64)] {
        &self.profiler_writes
    }

    /// Bytes at `address` without advancing device time
    pub fn peek(&self, address: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.load(address, &mut buf);
        buf
    }

    // ── Memory ──────────────────────────────────────────────────────────────

    fn load(&self, address: u64, buf: &mut [u8]) {
        let mut done = 0;
        while done < buf.len() {
            let at = address + done as u64;
            let (page, off) = (at / PAGE, (at % PAGE) as usize);
            let n = (PAGE as usize - off).min(buf.len() - done);
            match self.pages.get(&page) {
                Some(p) => buf[done..done + n].copy_from_slice(&p[off..off + n]),
                None => buf[done..done + n].fill(0),
            }
            done += n;
        }
    }

    fn store(&mut self, address: u64, data: &[u8]) {
        let mut done = 0;
        while done < data.len() {
            let at = address + done as u64;
            let (page, off) = (at / PAGE, (at % PAGE) as usize);
            let n = (PAGE as usize - off).min(data.len() - done);
            let p = self
                .pages
                .entry(page)
                .or_insert_with(|| Box::new([0u8; PAGE as usize]));
            p[off..off + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
    }

    fn load_f32(&self, address: u64) -> f32 {
        let mut word = [0u8; 4];
        self.load(address, &mut word);
        f32::from_le_bytes(word)
    }

    // ── Address decoding ────────────────────────────────────────────────────

    fn window(&self, address: u64) -> Option<(Window, u64)> {
        for (u, slots) in self.platform.engine_bases.iter().enumerate() {
            for (s, &base) in slots.iter().enumerate() {
                if (base..base + dma::WINDOW_SIZE).contains(&address) {
                    return Some((Window::Engine(u, s), address - base));
                }
            }
        }
        for (u, &base) in self.platform.compute_bases.iter().enumerate() {
            if (base..base + compute::WINDOW_SIZE).contains(&address) {
                return Some((Window::Unit(u), address - base));
            }
        }
        for base in [self.platform.profiler_base, self.platform.profiler_base_wide] {
            if (base..base + PROFILER_WINDOW).contains(&address) {
                return Some((Window::Profiler(base), address - base));
            }
        }
        None
    }

    fn check_access(&self, address: u64, len: usize) -> Result<Option<(Window, u64)>> {
        let end = address + len as u64;
        if self.faults.iter().any(|&f| (address..end).contains(&f)) {
            return Err(SpmvError::register_io(address, "injected fault"));
        }
        let Some((window, offset)) = self.window(address) else {
            return Ok(None);
        };
        let align = if matches!(window, Window::Profiler(_)) { 8 } else { 4 };
        if offset % align != 0 || len % align as usize != 0 {
            return Err(SpmvError::register_io(
                address,
                format!("unaligned {len}-byte register access"),
            ));
        }
        Ok(Some((window, offset)))
    }

    // ── Registers ───────────────────────────────────────────────────────────

    fn read_engine(&self, unit: usize, slot: usize, offset: u64) -> u32 {
        let engine = &self.engines[unit][slot];
        for (half, dir) in [Direction::ToDevice, Direction::FromDevice].into_iter().enumerate() {
            if offset == dir.status() {
                return self.config.polarity.encode(engine.pending[half].is_some());
            }
        }
        engine.regs.get((offset / 4) as usize).copied().unwrap_or(0)
    }

    fn write_engine(&mut self, unit: usize, slot: usize, offset: u64, value: u32) -> Result<()> {
        let word = (offset / 4) as usize;
        if word >= ENGINE_WORDS {
            return Ok(());
        }
        for (half, dir) in [Direction::ToDevice, Direction::FromDevice].into_iter().enumerate() {
            let engine = &mut self.engines[unit][slot];
            if offset == dir.control() {
                if value & dma::control::RESET != 0 {
                    engine.regs[word] = 0;
                    engine.pending[half] = None;
                    if dir == Direction::ToDevice && slot < 3 {
                        self.units[unit].inputs[slot].clear();
                    }
                } else {
                    engine.regs[word] = value;
                }
                return Ok(());
            }
            if offset == dir.length() {
                engine.regs[word] = value;
                if engine.regs[(dir.control() / 4) as usize] & dma::control::RUN == 0 {
                    return Ok(());
                }
                if engine.pending[half].is_some() {
                    return Err(SpmvError::register_io(
                        self.platform.engine_bases[unit][slot] + offset,
                        "descriptor written while engine busy",
                    ));
                }
                let lo = engine.regs[(dir.address() / 4) as usize];
                let hi = engine.regs[(dir.address() / 4) as usize + 1];
                engine.pending[half] = Some(Transfer {
                    address: u64::from(lo) | (u64::from(hi) << 32),
                    length: value,
                    countdown: self.config.latency,
                });
                return Ok(());
            }
        }
        self.engines[unit][slot].regs[word] = value;
        Ok(())
    }

    fn read_unit(&self, unit: usize, offset: u64) -> u32 {
        let u = &self.units[unit];
        if offset != compute::AP_CTRL {
            return u.regs.get((offset / 4) as usize).copied().unwrap_or(0);
        }
        let running = u.state == UnitState::Running;
        match self.config.layout {
            ControlLayout::Split => {
                if running {
                    0
                } else {
                    compute::split::IDLE
                }
            }
            ControlLayout::Packed => {
                let keep = u.regs[0] & compute::packed::AUTO_RESTART;
                match u.state {
                    UnitState::Running => keep | compute::packed::AP_START,
                    UnitState::Done => keep | compute::packed::AP_IDLE | compute::packed::AP_DONE,
                    UnitState::Idle => keep | compute::packed::AP_IDLE,
                }
            }
        }
    }

    fn write_unit(&mut self, unit: usize, offset: u64, value: u32) {
        let start_bit = match self.config.layout {
            ControlLayout::Split => compute::split::START,
            ControlLayout::Packed => compute::packed::AP_START,
        };
        let u = &mut self.units[unit];
        if let Some(reg) = u.regs.get_mut((offset / 4) as usize) {
            *reg = value;
        }
        if offset == compute::AP_CTRL && value & start_bit != 0 {
            u.state = UnitState::Running;
            u.output = None;
            u.drained = 0;
            debug!("Simulated unit {unit} started");
        }
    }

    // ── Device time ─────────────────────────────────────────────────────────

    fn step(&mut self) {
        for unit in 0..self.engines.len() {
            for slot in 0..4 {
                for half in 0..2 {
                    self.advance_transfer(unit, slot, half);
                }
            }
        }
        for unit in 0..self.units.len() {
            self.advance_unit(unit);
        }
    }

    fn advance_transfer(&mut self, unit: usize, slot: usize, half: usize) {
        let Some(mut t) = self.engines[unit][slot].pending[half] else {
            return;
        };
        if t.countdown > 0 {
            t.countdown -= 1;
            self.engines[unit][slot].pending[half] = Some(t);
            return;
        }
        let output_slot = StreamKind::Output.engine_slot() as usize;
        match (half, slot) {
            (0, s) if s < output_slot => {
                let mut data = vec![0u8; t.length as usize];
                self.load(t.address, &mut data);
                if let Some(u) = self.units.get_mut(unit) {
                    u.inputs[s].extend_from_slice(&data);
                }
            }
            (1, s) if s == output_slot => {
                let Some(u) = self.units.get_mut(unit) else {
                    return;
                };
                let Some(out) = &u.output else {
                    return;
                };
                let available = out.len() - u.drained;
                if available == 0 {
                    return;
                }
                let n = available.min(t.length as usize);
                let chunk = out[u.drained..u.drained + n].to_vec();
                u.drained += n;
                self.store(t.address, &chunk);
            }
            _ => {}
        }
        self.engines[unit][slot].pending[half] = None;
    }

    fn advance_unit(&mut self, unit: usize) {
        if self.units[unit].state != UnitState::Running {
            return;
        }
        if self.units[unit].output.is_none() {
            let Some(out) = self.compute(unit) else {
                return;
            };
            self.units[unit].output = Some(out);
        }
        let u = &mut self.units[unit];
        if u.output.as_ref().is_some_and(|o| u.drained >= o.len()) {
            u.state = UnitState::Done;
            debug!("Simulated unit {unit} done");
        }
    }

    /// CSR SpMV over the unit's input streams, once they are complete
    fn compute(&self, unit: usize) -> Option<Vec<u8>> {
        let layout = self.config.layout;
        let u = &self.units[unit];
        let reg = |offset: u64| u.regs[(offset / 4) as usize];
        let nnz = reg(layout.operand_count()) as usize;
        let nout = reg(layout.output_count()) as usize;
        let vector = if layout.wide_vector_base() {
            u64::from(reg(layout.vector_base())) | (u64::from(reg(layout.vector_base() + 4)) << 32)
        } else {
            u64::from(reg(layout.vector_base()))
        };
        let [rows, cols, vals] = &u.inputs;
        if rows.len() < (nout + 1) * 4 || cols.len() < nnz * 4 || vals.len() < nnz * 4 {
            return None;
        }
        let first = word(rows, 0) as usize;
        let mut out = Vec::with_capacity(nout * 4);
        for r in 0..nout {
            let lo = (word(rows, r) as usize).saturating_sub(first).min(nnz);
            let hi = (word(rows, r + 1) as usize).saturating_sub(first).min(nnz);
            let mut acc = 0.0f32;
            for k in lo..hi {
                let x = self.load_f32(vector + u64::from(word(cols, k)) * 4);
                acc += f32::from_bits(word(vals, k)) * x;
            }
            out.extend_from_slice(&acc.to_le_bytes());
        }
        debug!("Simulated unit {unit} computed {nout} rows from {nnz} non-zeros");
        Some(out)
    }
}

fn word(bytes: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([bytes[4 * i], bytes[4 * i + 1], bytes[4 * i + 2], bytes[4 * i + 3]])
}

impl RegisterIo for SimulatedDevice {
    fn read_into(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        self.accesses += 1;
        self.step();
        match self.check_access(address, buf.len())? {
            None => self.load(address, buf),
            Some((Window::Profiler(_), _)) => buf.fill(0),
            Some((window, offset)) => {
                for (i, chunk) in buf.chunks_exact_mut(4).enumerate() {
                    let at = offset + 4 * i as u64;
                    let value = match window {
                        Window::Engine(u, s) => self.read_engine(u, s, at),
                        Window::Unit(u) => self.read_unit(u, at),
                        Window::Profiler(_) => 0,
                    };
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    fn write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.accesses += 1;
        self.step();
        match self.check_access(address, data.len())? {
            None => self.store(address, data),
            Some((Window::Profiler(_), offset)) => {
                for (i, chunk) in data.chunks_exact(8).enumerate() {
                    let mut word = [0u8; 8];
                    word.copy_from_slice(chunk);
                    let reg = (offset + 8 * i as u64) / 8;
                    self.profiler_writes.push((reg, u64::from_le_bytes(word)));
                }
            }
            Some((window, offset)) => {
                for (i, chunk) in data.chunks_exact(4).enumerate() {
                    let at = offset + 4 * i as u64;
                    let value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    match window {
                        Window::Engine(u, s) => self.write_engine(u, s, at, value)?,
                        Window::Unit(u) => self.write_unit(u, at, value),
                        Window::Profiler(_) => {}
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spmv_chip::memory::{compute_base, engine_base};

    #[test]
    fn memory_round_trip_across_pages() {
        let mut dev = SimulatedDevice::reference();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        dev.write(0x2_0000_0ff0, &data).unwrap();
        assert_eq!(dev.read(0x2_0000_0ff0, data.len()).unwrap(), data);
        assert_eq!(dev.read(0x3_0000_0000, 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn transfer_stays_busy_for_latency() {
        let mut dev = SimulatedDevice::new(PlatformMap::reference(), SimConfig::default().with_latency(3));
        let base = engine_base(0, StreamKind::Values);
        dev.write_u32(base + dma::MM2S_DMACR, dma::control::RUN).unwrap();
        let burst: [u32; 5] = [0x100, 0, 0, 0, 16];
        dev.write(base + dma::MM2S_SA, bytemuck::cast_slice(&burst)).unwrap();

        let polarity = BusyPolarity::IdleBitsClear;
        let mut busy_reads = 0;
        while polarity.is_busy(dev.read_u32(base + dma::MM2S_DMASR).unwrap()) {
            busy_reads += 1;
        }
        assert_eq!(busy_reads, 3);
    }

    #[test]
    fn resubmit_while_busy_is_an_error() {
        let mut dev = SimulatedDevice::reference();
        let base = engine_base(1, StreamKind::RowPtr);
        dev.write_u32(base + dma::MM2S_DMACR, dma::control::RUN).unwrap();
        dev.write_u32(base + dma::MM2S_LENGTH, 64).unwrap();
        assert!(dev.write_u32(base + dma::MM2S_LENGTH, 64).unwrap_err().is_register_io());
    }

    #[test]
    fn unaligned_register_access_rejected() {
        let mut dev = SimulatedDevice::reference();
        assert!(dev.read(compute_base(0) + 2, 4).unwrap_err().is_register_io());
    }

    #[test]
    fn injected_fault() {
        let mut dev = SimulatedDevice::reference();
        dev.inject_fault(0x2_0000_0010);
        assert!(dev.write(0x2_0000_0000, &[0; 32]).unwrap_err().is_register_io());
        dev.write(0x2_0000_0020, &[0; 32]).unwrap();
    }

    #[test]
    fn packed_unit_reports_done() {
        let mut dev = SimulatedDevice::new(
            PlatformMap::reference(),
            SimConfig::default().with_layout(ControlLayout::Packed).with_latency(0),
        );
        let base = compute_base(0);
        // Zero operands and outputs only needs the single row pointer
        dev.write_u32(engine_base(0, StreamKind::RowPtr) + dma::MM2S_DMACR, dma::control::RUN).unwrap();
        dev.write(engine_base(0, StreamKind::RowPtr) + dma::MM2S_SA, bytemuck::cast_slice(&[0u32, 2, 0, 0, 4])).unwrap();
        dev.write_u32(base + compute::AP_CTRL, compute::packed::AUTO_RESTART | compute::packed::AP_START).unwrap();
        let ctrl = dev.read_u32(base).unwrap();
        assert_eq!(ctrl & compute::packed::AP_IDLE, compute::packed::AP_IDLE);
        assert_ne!(ctrl & compute::packed::AP_DONE, 0);
        assert_ne!(ctrl & compute::packed::AUTO_RESTART, 0);
    }
}
