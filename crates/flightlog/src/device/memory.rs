//! In-memory device with fault injection.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{check_name, BlockDevice, DeviceFile, OpenMode};

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<String, Vec<u8>>,
    mounts: u32,
    failing_mounts: u32,
    failing_writes: HashMap<String, u32>,
    failing_syncs: HashMap<String, u32>,
    failing_closes: HashMap<String, u32>,
    syncs: HashMap<String, u32>,
    open_delay: Duration,
}

/// Consume one injected fault for `name`, if any are left.
fn take_fault(faults: &mut HashMap<String, u32>, name: &str, what: &str) -> io::Result<()> {
    match faults.get_mut(name) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            Err(io::Error::new(io::ErrorKind::Other, format!("{what} fault")))
        }
        _ => Ok(()),
    }
}

/// A device whose files live in memory.
///
/// Clones share the same files, so a test can keep one clone to inspect
/// what the mediator wrote and to inject faults while it runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDevice {
    /// Create an empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a file.
    pub fn insert(&self, name: &str, contents: impl Into<Vec<u8>>) {
        self.lock().files.insert(name.to_string(), contents.into());
    }

    /// Contents of a file, if it exists.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().files.get(name).cloned()
    }

    /// Names of all files, sorted.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().files.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of successful mounts so far.
    #[must_use]
    pub fn mount_count(&self) -> u32 {
        self.lock().mounts
    }

    /// Number of syncs issued against a file.
    #[must_use]
    pub fn sync_count(&self, name: &str) -> u32 {
        self.lock().syncs.get(name).copied().unwrap_or(0)
    }

    /// Make the next `count` mounts fail.
    pub fn fail_mounts(&self, count: u32) {
        self.lock().failing_mounts = count;
    }

    /// Make the next `count` writes to `name` fail.
    pub fn fail_writes(&self, name: &str, count: u32) {
        self.lock().failing_writes.insert(name.to_string(), count);
    }

    /// Make the next `count` syncs of `name` fail.
    pub fn fail_syncs(&self, name: &str, count: u32) {
        self.lock().failing_syncs.insert(name.to_string(), count);
    }

    /// Make the next `count` closes of `name` fail.
    pub fn fail_closes(&self, name: &str, count: u32) {
        self.lock().failing_closes.insert(name.to_string(), count);
    }

    /// Delay every subsequent `open` by `delay`, like a slow card.
    pub fn delay_opens(&self, delay: Duration) {
        self.lock().open_delay = delay;
    }
}

#[async_trait::async_trait]
impl BlockDevice for MemoryDevice {
    async fn mount(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        if state.failing_mounts > 0 {
            state.failing_mounts -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "device not ready"));
        }
        state.mounts += 1;
        Ok(())
    }

    async fn open(&mut self, name: &str, mode: OpenMode) -> io::Result<Box<dyn DeviceFile>> {
        check_name(name)?;
        let delay = self.lock().open_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        match mode {
            OpenMode::Read if !state.files.contains_key(name) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{name} does not exist"),
                ));
            }
            OpenMode::Read => {}
            OpenMode::Write => {
                state.files.insert(name.to_string(), Vec::new());
            }
        }
        Ok(Box::new(MemoryFile {
            device: self.clone(),
            name: name.to_string(),
            pos: 0,
            writable: mode == OpenMode::Write,
        }))
    }
}

#[derive(Debug)]
struct MemoryFile {
    device: MemoryDevice,
    name: String,
    pos: usize,
    writable: bool,
}

impl MemoryFile {
    fn missing(&self) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("{} vanished", self.name))
    }
}

#[async_trait::async_trait]
impl DeviceFile for MemoryFile {
    async fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = usize::try_from(pos)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"))?;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.device.lock();
        let data = state.files.get(&self.name).ok_or_else(|| self.missing())?;
        let start = self.pos.min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos = start + n;
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is open for reading", self.name),
            ));
        }
        let mut state = self.device.lock();
        take_fault(&mut state.failing_writes, &self.name, "write")?;
        let missing = self.missing();
        let data = state.files.get_mut(&self.name).ok_or(missing)?;
        let end = self.pos + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(buf.len())
    }

    async fn sync(&mut self) -> io::Result<()> {
        let mut state = self.device.lock();
        take_fault(&mut state.failing_syncs, &self.name, "sync")?;
        *state.syncs.entry(self.name.clone()).or_default() += 1;
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        take_fault(&mut self.device.lock().failing_closes, &self.name, "close")
    }
}
