//! Byte-addressed register transport
//!
//! Everything the host does to the accelerator goes through two
//! primitives: read `len` bytes at a byte address, and write bytes at a
//! byte address. Registers, DDR and HBM all live in the same address
//! space, so the same primitives load operands and fetch results.
//!
//! [`FileRegisterIo`] performs positional I/O on a device node (for
//! example a QDMA memory-mapped character device) using rustix, so no
//! mapping of the address space into the process is assumed.

use crate::error::{Result, SpmvError};
use rustix::io::{pread, pwrite};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Byte-addressed read/write transport to the device
///
/// Multi-byte register values are little-endian.
pub trait RegisterIo {
    /// Fill `buf` with the bytes at `address`
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the transport fails or returns short.
    fn read_into(&mut self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `address`
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the transport fails or writes short.
    fn write(&mut self, address: u64, data: &[u8]) -> Result<()>;

    /// Read `len` bytes at `address`
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the transport fails.
    fn read(&mut self, address: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(address, &mut buf)?;
        Ok(buf)
    }

    /// Read a 32-bit register
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the transport fails.
    fn read_u32(&mut self, address: u64) -> Result<u32> {
        let mut word = [0u8; 4];
        self.read_into(address, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Write a 32-bit register
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the transport fails.
    fn write_u32(&mut self, address: u64, value: u32) -> Result<()> {
        self.write(address, &value.to_le_bytes())
    }

    /// Read a 64-bit register
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the transport fails.
    fn read_u64(&mut self, address: u64) -> Result<u64> {
        let mut word = [0u8; 8];
        self.read_into(address, &mut word)?;
        Ok(u64::from_le_bytes(word))
    }

    /// Write a 64-bit register
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the transport fails.
    fn write_u64(&mut self, address: u64, value: u64) -> Result<()> {
        self.write(address, &value.to_le_bytes())
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for Box<T> {
    fn read_into(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_into(address, buf)
    }

    fn write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        (**self).write(address, data)
    }
}

/// Positional I/O on a device file
#[derive(Debug)]
pub struct FileRegisterIo {
    file: File,
    path: PathBuf,
}

impl FileRegisterIo {
    /// Open a device node for read/write
    ///
    /// # Errors
    ///
    /// Returns `Io` if the node cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        tracing::info!("Opened register transport {}", path.display());
        Ok(Self { file, path })
    }

    /// Device node path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegisterIo for FileRegisterIo {
    fn read_into(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = pread(&self.file, &mut buf[done..], address + done as u64)
                .map_err(|e| SpmvError::register_io(address, format!("read failed: {e}")))?;
            if n == 0 {
                return Err(SpmvError::register_io(
                    address,
                    format!("short read: {done} of {} bytes", buf.len()),
                ));
            }
            done += n;
        }
        Ok(())
    }

    fn write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < data.len() {
            let n = pwrite(&self.file, &data[done..], address + done as u64)
                .map_err(|e| SpmvError::register_io(address, format!("write failed: {e}")))?;
            if n == 0 {
                return Err(SpmvError::register_io(
                    address,
                    format!("short write: {done} of {} bytes", data.len()),
                ));
            }
            done += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_transport_round_trips_words() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 64]).unwrap();

        let mut io = FileRegisterIo::open(tmp.path()).unwrap();
        io.write_u32(0x10, 0xdead_beef).unwrap();
        io.write_u64(0x20, 0x0123_4567_89ab_cdef).unwrap();

        assert_eq!(io.read_u32(0x10).unwrap(), 0xdead_beef);
        assert_eq!(io.read_u64(0x20).unwrap(), 0x0123_4567_89ab_cdef);
        assert_eq!(io.read(0x10, 2).unwrap(), vec![0xef, 0xbe]);
    }

    #[test]
    fn short_read_is_register_error() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut io = FileRegisterIo::open(tmp.path()).unwrap();
        let err = io.read_u32(0x100).unwrap_err();
        assert!(err.is_register_io());
    }

    #[test]
    fn missing_node_is_io_error() {
        let err = FileRegisterIo::open("/nonexistent/qdma0").unwrap_err();
        assert!(matches!(err, SpmvError::Io { .. }));
    }
}
