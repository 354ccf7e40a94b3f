//! Offline log reader.
//!
//! Runs outside the real-time system. [`Records`] streams decoded records
//! from any [`Read`] source; [`read_log`] loads every sample of a log file
//! into an exactly-sized vector.

pub mod scanner;

use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;

use tracing::{debug, info};

pub use scanner::{ScanState, ScanStats, Scanner};

use crate::codec::{Record, Schema};
use crate::error::{Error, Result};

const READ_CHUNK: usize = 4096;

/// Iterator over the records of a byte source.
///
/// Yields schema records as well as samples. I/O errors end the iteration
/// after being reported once.
#[derive(Debug)]
pub struct Records<R> {
    reader: R,
    scanner: Scanner,
    chunk: Box<[u8]>,
    done: bool,
}

impl<R: Read> Records<R> {
    /// Scan `reader` from scratch.
    pub fn new(reader: R) -> Self {
        Self::with_scanner(reader, Scanner::new())
    }

    /// Scan `reader` starting from an existing scanner state.
    pub fn with_scanner(reader: R, scanner: Scanner) -> Self {
        Self {
            reader,
            scanner,
            chunk: vec![0; READ_CHUNK].into_boxed_slice(),
            done: false,
        }
    }

    /// The underlying scanner.
    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Counters so far.
    pub fn stats(&self) -> &ScanStats {
        self.scanner.stats()
    }

    /// Only the records that carry a sample.
    pub fn samples(self) -> impl Iterator<Item = Result<Record>> {
        self.filter(|r| r.as_ref().map_or(true, Record::is_sample))
    }
}

impl<R: Read> Iterator for Records<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.scanner.next_record() {
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }
            match self.reader.read(&mut self.chunk) {
                Ok(0) => {
                    self.done = true;
                    self.scanner.finish();
                }
                Ok(n) => self.scanner.push(&self.chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    self.done = true;
                    self.scanner.finish();
                    return Some(Err(err.into()));
                }
            }
        }
    }
}

/// Every sample of a log, in order.
#[derive(Debug, Clone)]
pub struct Log {
    /// Decoded legacy and measurement records.
    pub samples: Vec<Record>,
    /// Counters of the decoding pass.
    pub stats: ScanStats,
    /// Schema active at the end of the log.
    pub schema: Option<Schema>,
}

/// Read a whole log file.
///
/// # Errors
///
/// Returns [`Error::LogOpen`] if the file cannot be opened, or an I/O error
/// while reading. Corrupt records are dropped, never reported as errors.
pub fn read_log(path: impl AsRef<Path>) -> Result<Log> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| Error::LogOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let log = read_log_from(BufReader::new(file))?;
    info!(
        "Read {} samples from {} ({} dropped)",
        log.samples.len(),
        path.display(),
        log.stats.dropped()
    );
    Ok(log)
}

/// Read a whole log from a seekable source.
///
/// The source is scanned up to its first sample so that any leading schema
/// is known. Both following passes start from that state: the first counts
/// samples, the second decodes them into a vector of exactly that size.
///
/// # Errors
///
/// Returns an I/O error from the source.
pub fn read_log_from<R: Read + Seek>(mut reader: R) -> Result<Log> {
    let primed = prime(&mut reader)?;
    debug!(
        "Primed schema: {} fields",
        primed.as_ref().map_or(0, Schema::len)
    );

    reader.rewind()?;
    let mut count = 0usize;
    for record in Records::with_scanner(&mut reader, Scanner::with_schema(primed.clone())).samples() {
        record?;
        count += 1;
    }

    reader.rewind()?;
    let mut samples = Vec::with_capacity(count);
    let mut records = Records::with_scanner(&mut reader, Scanner::with_schema(primed));
    for record in records.by_ref() {
        let record = record?;
        if record.is_sample() {
            samples.push(record);
        }
    }
    debug!("Counted {count} samples, decoded {}", samples.len());

    Ok(Log {
        samples,
        stats: records.stats().clone(),
        schema: records.scanner().schema().cloned(),
    })
}

/// Scan up to the first sample and return the schema active at that point.
fn prime<R: Read>(reader: R) -> Result<Option<Schema>> {
    let mut records = Records::new(reader);
    for record in records.by_ref() {
        if record?.is_sample() {
            break;
        }
    }
    Ok(records.scanner().schema().cloned())
}
