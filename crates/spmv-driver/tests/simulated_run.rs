//! End-to-end runs against the simulated platform
//!
//! Every test writes a small benchmark to a temp dir, uploads it and runs it
//! through the full loop, then checks the results against the references.

use spmv_driver::chip::memory::{compute_base, DmaClass, StreamKind};
use spmv_driver::chip::profiler::HardwareProfile;
use spmv_driver::chip::regs::{BusyPolarity, ControlLayout};
use spmv_driver::{
    BenchmarkSet, CacheMode, FileRegisterIo, PlatformMap, RegisterIo, RunConfig, RunContext,
    SimConfig, SimulatedDevice, SpmvError,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const COLUMNS: u32 = 200;

/// Tiny deterministic generator so fixtures are stable across runs
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }

    fn value(&mut self) -> f32 {
        (self.next() % 1000) as f32 / 250.0 - 2.0
    }
}

fn write_u32(path: &Path, records: &[u32]) {
    fs::write(path, bytemuck::cast_slice::<u32, u8>(records)).unwrap();
}

fn write_f32(path: &Path, records: &[f32]) {
    fs::write(path, bytemuck::cast_slice::<f32, u8>(records)).unwrap();
}

/// Lay out `<tmp>/<name>/<units>/` with a vector and one CSR share per unit
fn write_bench(tmp: &TempDir, name: &str, units: usize) -> PathBuf {
    let root = tmp.path().join(name);
    let dir = root.join(units.to_string());
    fs::create_dir_all(&dir).unwrap();

    let mut rng = Lcg(0x5eed);
    let vector: Vec<f32> = (0..COLUMNS).map(|_| rng.value()).collect();
    write_f32(&dir.join(format!("{name}.vec")), &vector);

    for unit in 0..units {
        let rows = 9 + unit;
        let mut row_ptr = vec![0u32];
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        let mut expected = Vec::new();
        for _ in 0..rows {
            // Some rows stay empty
            let nnz = rng.next() % 8;
            let mut acc = 0.0f32;
            for _ in 0..nnz {
                let c = rng.next() % COLUMNS;
                let v = rng.value();
                acc += v * vector[c as usize];
                cols.push(c);
                vals.push(v);
            }
            row_ptr.push(cols.len() as u32);
            expected.push(acc);
        }
        write_u32(&dir.join(format!("{unit}.row")), &row_ptr);
        write_u32(&dir.join(format!("{unit}.col")), &cols);
        write_f32(&dir.join(format!("{unit}.val")), &vals);
        write_f32(&dir.join(format!("{unit}.exp")), &expected);
    }
    root
}

fn simulated(config: &RunConfig) -> SimulatedDevice {
    SimulatedDevice::new(
        PlatformMap::reference(),
        SimConfig::default()
            .with_layout(config.layout)
            .with_polarity(config.polarity),
    )
}

fn small_chunks(units: usize) -> RunConfig {
    RunConfig::default()
        .with_units(units)
        .with_dma_class(DmaClass::Custom(64))
}

#[test]
fn contiguous_vector_split_layout() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 2);
    let config = small_chunks(2);

    let mut ctx = RunContext::new(simulated(&config), config).unwrap();
    let bench = BenchmarkSet::open(&root, 2).unwrap();
    let workload = ctx.load(&bench).unwrap();
    assert_eq!(workload.columns, COLUMNS);
    assert!(workload.stripe.is_none());

    let report = ctx.run(&workload).unwrap();
    let verdict = report.verify(&workload);
    assert!(verdict.all_passed(), "{verdict:?}");
    assert_eq!(report.outputs.len(), 2);
    assert_eq!(report.output(1).len(), 10);
    // At least one descriptor per stream per unit
    assert!(report.scheduler.chunks_submitted >= 8);
}

#[test]
fn striped_vector_packed_layout() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 2);
    let config = small_chunks(2)
        .with_channels(4)
        .with_layout(ControlLayout::Packed);

    let mut ctx = RunContext::new(simulated(&config), config).unwrap();
    let workload = ctx.load(&BenchmarkSet::open(&root, 2).unwrap()).unwrap();
    let stripe = workload.stripe.as_ref().expect("vector striped");
    assert_eq!(stripe.channel_count(), 4);

    let report = ctx.run(&workload).unwrap();
    report.verify(&workload).into_result().unwrap();
}

#[test]
fn inverted_busy_polarity() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 1);
    let config = small_chunks(1)
        .with_channels(2)
        .with_polarity(BusyPolarity::IdleBitsSet);

    let mut ctx = RunContext::new(simulated(&config), config).unwrap();
    let workload = ctx.load(&BenchmarkSet::open(&root, 1).unwrap()).unwrap();
    let report = ctx.run(&workload).unwrap();
    assert!(report.verify(&workload).all_passed());
}

#[test]
fn every_profile_runs() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 1);
    for profile in [
        HardwareProfile::HashedMshr,
        HardwareProfile::TraditionalMshr,
        HardwareProfile::MshrInclusive,
        HardwareProfile::NoAccelerator,
    ] {
        let config = small_chunks(1).with_profile(profile).with_cache(CacheMode::Disabled);
        let mut ctx = RunContext::new(simulated(&config), config).unwrap();
        let workload = ctx.load(&BenchmarkSet::open(&root, 1).unwrap()).unwrap();
        let report = ctx.run(&workload).unwrap();
        assert!(report.verify(&workload).all_passed(), "{profile:?}");
        assert_eq!(report.counters.is_some(), profile != HardwareProfile::NoAccelerator);
    }
}

#[test]
fn large_chunks_single_descriptor() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 1);
    let config = RunConfig::default().with_units(1);

    let mut ctx = RunContext::new(simulated(&config), config).unwrap();
    let workload = ctx.load(&BenchmarkSet::open(&root, 1).unwrap()).unwrap();
    let report = ctx.run(&workload).unwrap();
    assert!(report.verify(&workload).all_passed());
    // One descriptor per stream
    assert_eq!(report.scheduler.chunks_submitted, 4);
}

#[test]
fn poll_limit_stops_the_run() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 1);
    let config = small_chunks(1).with_poll_limit(1);
    // Slow enough that nothing completes during the first poll
    let device = SimulatedDevice::new(PlatformMap::reference(), SimConfig::default().with_latency(64));

    let mut ctx = RunContext::new(device, config).unwrap();
    let workload = ctx.load(&BenchmarkSet::open(&root, 1).unwrap()).unwrap();
    match ctx.run(&workload) {
        Err(SpmvError::PollLimitExceeded { phase, polls }) => {
            assert_eq!(phase, "stream transfer");
            assert_eq!(polls, 1);
        }
        other => panic!("expected poll limit, got {other:?}"),
    }
}

#[test]
fn transport_fault_surfaces() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 1);
    let config = small_chunks(1);

    let mut device = simulated(&config);
    device.inject_fault(compute_base(0));
    let mut ctx = RunContext::new(device, config).unwrap();
    let workload = ctx.load(&BenchmarkSet::open(&root, 1).unwrap()).unwrap();
    let err = ctx.run(&workload).unwrap_err();
    assert!(err.is_register_io(), "{err}");
}

#[test]
fn workload_unit_mismatch_rejected_before_io() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 2);
    let config = small_chunks(2);
    let mut ctx = RunContext::new(simulated(&config), config).unwrap();
    let mut workload = ctx.load(&BenchmarkSet::open(&root, 2).unwrap()).unwrap();
    workload.units.pop();

    let before = ctx.io().access_count();
    let err = ctx.run(&workload).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(ctx.io().access_count(), before);
}

#[test]
fn bad_benchmark_rejected_before_any_device_write() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 2);
    // Second unit's values are misaligned; the vector and unit 0 are fine
    fs::write(root.join("2").join("1.val"), [0u8; 6]).unwrap();
    let config = small_chunks(2);

    let mut ctx = RunContext::new(simulated(&config), config).unwrap();
    let err = ctx.load(&BenchmarkSet::open(&root, 2).unwrap()).unwrap_err();
    assert!(err.is_configuration(), "{err}");
    assert_eq!(ctx.io().access_count(), 0);
}

#[test]
fn oversized_unit_region_rejected_before_any_device_write() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 1);
    let mut platform = PlatformMap::reference();
    // 10 row pointer entries need 40 bytes
    platform.buffer_capacity = 32;
    let config = small_chunks(1).with_platform(platform.clone());

    let device = SimulatedDevice::new(platform, SimConfig::default());
    let mut ctx = RunContext::new(device, config).unwrap();
    let err = ctx.load(&BenchmarkSet::open(&root, 1).unwrap()).unwrap_err();
    assert!(err.is_configuration(), "{err}");
    assert_eq!(ctx.io().access_count(), 0);
}

#[test]
fn runtime_log_and_counter_csv() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 1);
    let config = small_chunks(1).with_runtime_log(3);

    let mut ctx = RunContext::new(simulated(&config), config).unwrap();
    let workload = ctx.load(&BenchmarkSet::open(&root, 1).unwrap()).unwrap();
    let report = ctx.run(&workload).unwrap();

    let log = report.runtime_log.as_ref().expect("runtime log sampled");
    assert_eq!(log.len(), 3);
    assert!(log.dropped() > 0);
    let mut csv = Vec::new();
    log.write_csv(&mut csv).unwrap();
    let text = String::from_utf8(csv).unwrap();
    assert!(text.starts_with("cycles,"));
    assert_eq!(text.lines().count(), 4);

    let mut csv = Vec::new();
    report.counters.as_ref().unwrap().write_csv(&mut csv).unwrap();
    let text = String::from_utf8(csv).unwrap();
    assert!(text.starts_with("group,instance,counter,value"));
    assert!(text.lines().count() > 1);
}

#[test]
fn corrupted_reference_fails_verification() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 1);
    write_f32(&root.join("1").join("0.exp"), &[1.0e6; 9]);
    let config = small_chunks(1);

    let mut ctx = RunContext::new(simulated(&config), config).unwrap();
    let workload = ctx.load(&BenchmarkSet::open(&root, 1).unwrap()).unwrap();
    let report = ctx.run(&workload).unwrap();
    let verdict = report.verify(&workload);
    assert!(!verdict.all_passed());
    let first = verdict.units[0].mismatch.expect("mismatch reported");
    assert_eq!(first.index, 0);
    assert!(matches!(
        verdict.into_result(),
        Err(SpmvError::Verification { .. })
    ));
}

#[test]
fn boxed_backend_runs() {
    let tmp = TempDir::new().unwrap();
    let root = write_bench(&tmp, "band", 1);
    let config = small_chunks(1);
    let io: Box<dyn RegisterIo> = Box::new(simulated(&config));

    let mut ctx: RunContext = RunContext::new(io, config).unwrap();
    let workload = ctx.load(&BenchmarkSet::open(&root, 1).unwrap()).unwrap();
    let report = ctx.run(&workload).unwrap();
    assert!(report.verify(&workload).all_passed());

    let out = ctx
        .io()
        .read(PlatformMap::reference().buffer_base(0, StreamKind::Output).unwrap(), 4)
        .unwrap();
    assert_eq!(out, report.outputs[0][..4]);
}

#[test]
#[ignore] // Requires hardware
fn hardware_run() {
    let device = std::env::var("SPMV_DEVICE").unwrap_or_else(|_| "/dev/qdma01000-MM-0".into());
    let bench = std::env::var("SPMV_BENCH").expect("SPMV_BENCH points at a benchmark dir");
    let config = RunConfig::default().with_units(1);

    let io = FileRegisterIo::open(&device).expect("device opens");
    let mut ctx = RunContext::new(io, config).unwrap();
    let workload = ctx.load(&BenchmarkSet::open(bench, 1).unwrap()).unwrap();
    let report = ctx.run(&workload).unwrap();
    println!("compute {:?}, total {:?}", report.compute_time, report.total_time);
    report.verify(&workload).into_result().unwrap();
}
