//! Benchmark loading
//!
//! A benchmark directory holds one subdirectory per unit count:
//!
//! ```text
//! <bench>/<units>/<bench>.vec     dense vector x          (f32)
//! <bench>/<units>/<i>.row         CSR row pointers        (u32, rows + 1)
//! <bench>/<units>/<i>.col         CSR column indices      (u32, nnz)
//! <bench>/<units>/<i>.val         CSR values              (f32, nnz)
//! <bench>/<units>/<i>.exp         reference result        (f32)
//! ```
//!
//! All records are little-endian and 4 bytes wide. Files are streamed to the
//! device in 8 MiB pieces; column indices are rewritten piece by piece when
//! the vector is striped over memory channels.

use crate::config::RunConfig;
use crate::error::{Result, SpmvError};
use crate::io::RegisterIo;
use crate::striping::{HbmStriper, IndexRemap, StripeLayout};
use spmv_chip::memory::{StreamKind, MB};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Size of one record in every benchmark file
pub const RECORD_BYTES: u64 = 4;

/// Largest piece written to the device at once
pub const UPLOAD_PIECE: u64 = 8 * MB;

/// Per-unit benchmark file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitFile {
    /// Row pointers
    RowPtr,
    /// Column indices
    Columns,
    /// Non-zero values
    Values,
    /// Reference output
    Expected,
}

impl UnitFile {
    /// File extension
    pub const fn extension(self) -> &'static str {
        match self {
            Self::RowPtr => "row",
            Self::Columns => "col",
            Self::Values => "val",
            Self::Expected => "exp",
        }
    }
}

/// A benchmark directory prepared for a given unit count
#[derive(Debug, Clone)]
pub struct BenchmarkSet {
    root: PathBuf,
    name: String,
    units: usize,
}

impl BenchmarkSet {
    /// Benchmark at `root` split for `units` compute units
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the path has no usable final component or
    /// the unit subdirectory is missing.
    pub fn open(root: impl AsRef<Path>, units: usize) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                SpmvError::configuration(format!("bad benchmark path {}", root.display()))
            })?
            .to_string();
        let set = Self { root, name, units };
        if !set.dir().is_dir() {
            return Err(SpmvError::configuration(format!(
                "{} has no data for {units} unit(s)",
                set.root.display()
            )));
        }
        Ok(set)
    }

    /// Benchmark name, the last path component
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unit count this split targets
    pub const fn units(&self) -> usize {
        self.units
    }

    fn dir(&self) -> PathBuf {
        self.root.join(self.units.to_string())
    }

    /// Path of the dense vector
    pub fn vector_path(&self) -> PathBuf {
        self.dir().join(format!("{}.vec", self.name))
    }

    /// Path of `file` for `unit`
    pub fn unit_path(&self, unit: usize, file: UnitFile) -> PathBuf {
        self.dir().join(format!("{unit}.{}", file.extension()))
    }

    /// Size every file and check it against the platform without touching
    /// the device
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for a unit-count mismatch, a misaligned file,
    /// a file larger than its device region or inconsistent CSR sizes, and
    /// `Io` if a file cannot be examined.
    pub fn inspect(&self, config: &RunConfig) -> Result<BenchmarkSizes> {
        if config.units != self.units {
            return Err(SpmvError::configuration(format!(
                "benchmark split for {} unit(s), run configured for {}",
                self.units, config.units
            )));
        }
        let platform = &config.platform;

        let vector = self.vector_path();
        let vector_bytes = std::fs::metadata(&vector)?.len();
        let columns = record_count(&vector, vector_bytes)?;
        if config.channels == 0 {
            check_fits(&vector, vector_bytes, platform.vector_capacity)?;
        } else {
            HbmStriper::new(config.channels, platform.channel_capacity)?.layout(vector_bytes)?;
        }

        let mut units = Vec::with_capacity(self.units);
        for unit in 0..self.units {
            let sized = |file: UnitFile| -> Result<u32> {
                let path = self.unit_path(unit, file);
                let bytes = std::fs::metadata(&path)?.len();
                let records = record_count(&path, bytes)?;
                check_fits(&path, bytes, platform.buffer_capacity)?;
                Ok(records)
            };
            let values = sized(UnitFile::Values)?;
            let nnz = sized(UnitFile::Columns)?;
            let row_entries = sized(UnitFile::RowPtr)?;
            let outputs = sized(UnitFile::Expected)?;
            if nnz != values {
                return Err(SpmvError::configuration(format!(
                    "unit {unit}: {nnz} column indices but {values} values"
                )));
            }
            if row_entries == 0 {
                return Err(SpmvError::configuration(format!(
                    "unit {unit}: empty row pointer file"
                )));
            }
            units.push(UnitSizes { nnz, row_entries, outputs });
        }
        Ok(BenchmarkSizes { columns, units })
    }

    /// Write every operand to the device and read the references
    ///
    /// Every file is sized and checked first, so a bad benchmark is
    /// rejected before the first device write.
    ///
    /// # Errors
    ///
    /// See [`BenchmarkSet::inspect`]; also `Io` for unreadable files and
    /// `RegisterIo` on transport failure.
    pub fn upload(&self, io: &mut dyn RegisterIo, config: &RunConfig) -> Result<Workload> {
        let sizes = self.inspect(config)?;
        let platform = &config.platform;
        let (columns, stripe) = upload_vector(io, config, &self.vector_path())?;

        let remap = IndexRemap::new(config.channels, RECORD_BYTES, platform.channel_capacity)?;
        let mut units = Vec::with_capacity(self.units);
        for (unit, size) in sizes.units.iter().enumerate() {
            upload_file(
                io,
                platform.buffer_base(unit, StreamKind::Values)?,
                &self.unit_path(unit, UnitFile::Values),
                None,
            )?;
            upload_file(
                io,
                platform.buffer_base(unit, StreamKind::ColIdx)?,
                &self.unit_path(unit, UnitFile::Columns),
                Some(&remap),
            )?;
            upload_file(
                io,
                platform.buffer_base(unit, StreamKind::RowPtr)?,
                &self.unit_path(unit, UnitFile::RowPtr),
                None,
            )?;
            let expected = f32_records(&read_records(&self.unit_path(unit, UnitFile::Expected))?);
            units.push(UnitWorkload {
                nnz: size.nnz,
                // inspect rejects empty row pointer files
                rows: size.row_entries - 1,
                expected,
            });
        }

        info!("Loaded {}: {columns} columns, {} unit(s)", self.name, units.len());
        Ok(Workload {
            columns,
            vector_base: platform.vector_base,
            stripe,
            units,
        })
    }
}

/// Record counts of one unit's files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSizes {
    /// Non-zeros (`.val` and `.col` records)
    pub nnz: u32,
    /// Row pointer entries
    pub row_entries: u32,
    /// Reference results
    pub outputs: u32,
}

/// Record counts of a whole benchmark, checked against the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkSizes {
    /// Dense vector length
    pub columns: u32,
    /// Per-unit counts
    pub units: Vec<UnitSizes>,
}

/// Sizes and reference of one unit's share
#[derive(Debug, Clone, PartialEq)]
pub struct UnitWorkload {
    /// Non-zeros
    pub nnz: u32,
    /// Matrix rows (row pointer entries minus one)
    pub rows: u32,
    /// Reference result
    pub expected: Vec<f32>,
}

impl UnitWorkload {
    /// Results the unit produces
    pub fn output_count(&self) -> u32 {
        // Bounded by the file size check in read_records
        self.expected.len() as u32
    }
}

/// Everything a run needs to know about the data on the device
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    /// Dense vector length
    pub columns: u32,
    /// Where the vector starts
    pub vector_base: u64,
    /// Striped placement, if the vector was striped
    pub stripe: Option<StripeLayout>,
    /// Per-unit shares
    pub units: Vec<UnitWorkload>,
}

impl Workload {
    /// Check the workload against `config` before touching the device
    ///
    /// # Errors
    ///
    /// Returns `Configuration` on a unit-count mismatch.
    pub fn validate(&self, config: &RunConfig) -> Result<()> {
        if self.units.len() != config.units {
            return Err(SpmvError::configuration(format!(
                "workload has {} unit(s), run configured for {}",
                self.units.len(),
                config.units
            )));
        }
        Ok(())
    }
}

fn record_count(path: &Path, bytes: u64) -> Result<u32> {
    if bytes % RECORD_BYTES != 0 {
        return Err(SpmvError::configuration(format!(
            "{}: size {bytes} is not a multiple of {RECORD_BYTES}",
            path.display()
        )));
    }
    u32::try_from(bytes / RECORD_BYTES).map_err(|_| {
        SpmvError::configuration(format!("{}: too many records", path.display()))
    })
}

fn check_fits(path: &Path, bytes: u64, capacity: u64) -> Result<()> {
    if bytes > capacity {
        return Err(SpmvError::configuration(format!(
            "{}: {bytes} bytes exceed the {capacity}-byte device region",
            path.display()
        )));
    }
    Ok(())
}

/// Stream `path` to `address` in pieces, remapping indices if asked
///
/// Returns the record count.
///
/// # Errors
///
/// Returns `Configuration` for a misaligned file, `Io` if it cannot be read
/// and `RegisterIo` on transport failure.
pub fn upload_file(
    io: &mut dyn RegisterIo,
    address: u64,
    path: &Path,
    remap: Option<&IndexRemap>,
) -> Result<u32> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let records = record_count(path, len)?;

    let mut piece = vec![0u8; len.min(UPLOAD_PIECE) as usize];
    let mut offset = 0u64;
    while offset < len {
        let n = (len - offset).min(UPLOAD_PIECE) as usize;
        let buf = &mut piece[..n];
        file.read_exact(buf)?;
        match remap {
            Some(remap) if !remap.is_identity() => {
                let mut indices = u32_records(buf);
                remap.remap_in_place(&mut indices)?;
                io.write(address + offset, bytemuck::cast_slice(&indices))?;
            }
            _ => io.write(address + offset, buf)?,
        }
        offset += n as u64;
    }
    debug!("Uploaded {} ({len} bytes) to {address:#x}", path.display());
    Ok(records)
}

/// Place the dense vector: contiguous for 0 channels, striped otherwise
///
/// # Errors
///
/// Returns `Configuration` if the vector is misaligned or exceeds the
/// vector region or the channels' capacity, `Io` or `RegisterIo` on failure.
pub fn upload_vector(
    io: &mut dyn RegisterIo,
    config: &RunConfig,
    path: &Path,
) -> Result<(u32, Option<StripeLayout>)> {
    let platform = &config.platform;
    if config.channels == 0 {
        check_fits(path, std::fs::metadata(path)?.len(), platform.vector_capacity)?;
        let columns = upload_file(io, platform.vector_base, path, None)?;
        return Ok((columns, None));
    }
    let striper = HbmStriper::new(config.channels, platform.channel_capacity)?;
    let len = std::fs::metadata(path)?.len();
    let columns = record_count(path, len)?;
    // Capacity check before reading the file
    striper.layout(len)?;
    let data = std::fs::read(path)?;
    let layout = striper.write(io, platform.vector_base, &data)?;
    info!(
        "Striped {columns} elements over {} channel(s): {:?} strips",
        config.channels,
        layout.per_channel_strips()
    );
    Ok((columns, Some(layout)))
}

/// Read a whole record file
///
/// # Errors
///
/// Returns `Configuration` for a misaligned file, `Io` if it cannot be read.
pub fn read_records(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path)?;
    record_count(path, data.len() as u64)?;
    Ok(data)
}

/// Decode little-endian u32 records
pub fn u32_records(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Decode little-endian f32 records
pub fn f32_records(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
