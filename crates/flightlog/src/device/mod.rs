//! Block-device boundary.
//!
//! The storage mediator is the only code that talks to a [`BlockDevice`].
//! Two implementations ship with the crate: [`DirDevice`] maps logical
//! files onto a host directory, [`MemoryDevice`] keeps them in memory and
//! can inject faults.

pub mod dir;
pub mod memory;

use std::io;

pub use dir::DirDevice;
pub use memory::MemoryDevice;

/// How a logical file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open an existing file for reading.
    Read,
    /// Create the file, truncating any previous contents, for writing.
    Write,
}

/// A mountable storage device holding flat, named files.
#[async_trait::async_trait]
pub trait BlockDevice: Send + std::fmt::Debug {
    /// Prepare the device for use, formatting it if it is blank.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is absent or cannot be prepared.
    async fn mount(&mut self) -> io::Result<()>;

    /// Open a file on the mounted device.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened in `mode`.
    async fn open(&mut self, name: &str, mode: OpenMode) -> io::Result<Box<dyn DeviceFile>>;
}

/// An open file on a [`BlockDevice`].
#[async_trait::async_trait]
pub trait DeviceFile: Send + std::fmt::Debug {
    /// Move the cursor to an absolute byte offset.
    async fn seek(&mut self, pos: u64) -> io::Result<()>;

    /// Read up to `buf.len()` bytes, fewer only at end of file.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `buf` at the cursor, returning the number of bytes written.
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Flush written data to stable storage.
    async fn sync(&mut self) -> io::Result<()>;

    /// Flush and release the file.
    async fn close(&mut self) -> io::Result<()>;
}

/// Reject names that would escape a flat namespace.
pub(crate) fn check_name(name: &str) -> io::Result<()> {
    let separator = |c: char| c == '/' || c == '\\';
    if name.is_empty() || name.contains(separator) || name == "." || name == ".." {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file name '{name}'"),
        ));
    }
    Ok(())
}
