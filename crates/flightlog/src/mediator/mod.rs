//! Single-writer storage mediator.
//!
//! One worker task owns the storage device. Callers allocate named handles
//! and post read, write, sync and close requests through a
//! [`StorageClient`]; each call waits for the worker to service that handle
//! and only that handle, so independent handles never block each other.
//! A handle switched into stream mode is drained by the worker every cycle
//! without any request at all.
//!
//! A device error on a stream handle is treated as fatal to the mount: the
//! worker drops every file, fails every pending request, waits and mounts
//! again under a new session number.

mod session;
mod table;
mod worker;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

pub use session::{advance_session, next_session, parse_session, read_session, stream_file_name};
pub use table::Handle;

use crate::buffer::{StreamBuffer, StreamProducer};
use crate::config::Config;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use table::{Completion, HandleTable, Op};
use worker::Worker;

/// Lifecycle of the storage worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediatorState {
    /// No device mounted; requests wait.
    Unmounted,
    /// A mount attempt is in progress.
    Mounting,
    /// Mounted with a fresh session; requests are serviced.
    Ready,
    /// A stream handle failed; the worker is about to remount.
    Degraded,
    /// The worker has exited.
    Stopped,
}

impl std::fmt::Display for MediatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unmounted => write!(f, "unmounted"),
            Self::Mounting => write!(f, "mounting"),
            Self::Ready => write!(f, "ready"),
            Self::Degraded => write!(f, "degraded"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot of the worker's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediatorStatus {
    /// Current lifecycle state.
    pub state: MediatorState,
    /// Session number of the current mount.
    pub session: Option<u32>,
    /// When the current mount completed.
    pub mounted_at: Option<DateTime<Utc>>,
    /// Worker cycles completed since start.
    pub cycles: u64,
}

impl Default for MediatorStatus {
    fn default() -> Self {
        Self {
            state: MediatorState::Unmounted,
            session: None,
            mounted_at: None,
            cycles: 0,
        }
    }
}

/// Tunables of the storage worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediatorSettings {
    /// Number of slots in the handle table.
    pub max_handles: usize,
    /// Name of the session counter file.
    pub session_file: String,
    /// Highest session number before wrapping to zero.
    pub session_max: u32,
    /// Longest sleep between cycles.
    pub poll_interval: Duration,
    /// Stream handles are synced every this many cycles.
    pub stream_sync_cycles: u64,
    /// Wait before a mount retry or a remount.
    pub remount_delay: Duration,
}

impl Default for MediatorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for MediatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_handles: config.storage.max_handles,
            session_file: config.storage.session_file.clone(),
            session_max: config.storage.session_max,
            poll_interval: config.poll_interval(),
            stream_sync_cycles: config.mediator.stream_sync_cycles,
            remount_delay: config.remount_delay(),
        }
    }
}

/// State shared by the worker and every client.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) table: HandleTable,
    pub(crate) wake: Notify,
    pub(crate) status: watch::Sender<MediatorStatus>,
}

/// Owner of the storage worker task.
#[derive(Debug)]
pub struct StorageMediator {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StorageMediator {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// The worker starts mounting `device` immediately; use
    /// [`StorageClient::wait_ready`] to wait for the first session.
    #[must_use]
    pub fn spawn(device: impl BlockDevice + 'static, settings: MediatorSettings) -> Self {
        let (status, _) = watch::channel(MediatorStatus::default());
        let shared = Arc::new(Shared {
            table: HandleTable::new(settings.max_handles),
            wake: Notify::new(),
            status,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = Worker::new(Box::new(device), Arc::clone(&shared), settings, shutdown_rx);
        let task = tokio::spawn(worker.run());
        Self {
            shared,
            shutdown,
            task,
        }
    }

    /// A new client of this mediator.
    #[must_use]
    pub fn client(&self) -> StorageClient {
        StorageClient {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Flush every stream, close every file and stop the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker task panicked.
    pub async fn shutdown(self) -> Result<()> {
        debug!("Requesting storage worker shutdown");
        // The receiver lives in the worker; if it is gone the worker is too.
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| Error::internal(format!("storage worker failed: {e}")))
    }
}

/// Caller-side interface to the storage worker.
///
/// Clones share the same handle table.
#[derive(Debug, Clone)]
pub struct StorageClient {
    shared: Arc<Shared>,
}

impl StorageClient {
    /// Allocate a handle for `name`, or return the one already holding it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandleExhausted`] when every slot is taken.
    pub fn allocate(&self, name: &str) -> Result<Handle> {
        self.shared.table.allocate(name)
    }

    /// Number of slots in the handle table.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.table.capacity()
    }

    fn ensure_direct(&self, handle: Handle) -> Result<()> {
        if self.shared.table.get(handle)?.lock().stream.is_some() {
            return Err(Error::HandleStreaming {
                index: handle.index(),
            });
        }
        Ok(())
    }

    async fn request(&self, handle: Handle, op: Op) -> Result<Completion> {
        self.shared.table.request(handle, op, &self.shared.wake).await
    }

    /// Read up to `len` bytes, optionally seeking first.
    ///
    /// The file is opened read-only on first use. Fewer bytes come back at
    /// end of file.
    ///
    /// # Errors
    ///
    /// Returns a device error, or a handle error for stream handles and
    /// unallocated handles.
    pub async fn read(&self, handle: Handle, seek: Option<u64>, len: usize) -> Result<Vec<u8>> {
        self.ensure_direct(handle)?;
        match self.request(handle, Op::Read { seek, len }).await? {
            Completion::Read(data) => Ok(data),
            other => Err(Error::internal(format!("unexpected completion {other:?}"))),
        }
    }

    /// Write `data`, optionally seeking first.
    ///
    /// The file is created (or truncated) on first use.
    ///
    /// # Errors
    ///
    /// Returns a device error, or a handle error for stream handles and
    /// unallocated handles.
    pub async fn write(&self, handle: Handle, data: &[u8], seek: Option<u64>) -> Result<usize> {
        self.ensure_direct(handle)?;
        let op = Op::Write {
            seek,
            data: data.to_vec(),
        };
        match self.request(handle, op).await? {
            Completion::Written(n) => Ok(n),
            other => Err(Error::internal(format!("unexpected completion {other:?}"))),
        }
    }

    /// Flush the handle's file to the device.
    ///
    /// Succeeds without a round trip when the handle was never opened.
    ///
    /// # Errors
    ///
    /// Returns a device error if the sync fails.
    pub async fn sync(&self, handle: Handle) -> Result<()> {
        let idle = {
            let state = self.shared.table.get(handle)?.lock();
            !state.open && state.stream.is_none()
        };
        if idle {
            return Ok(());
        }
        self.request(handle, Op::Sync).await.map(|_| ())
    }

    /// Close the handle and release its slot.
    ///
    /// The slot is released even when closing fails. A stream handle writes
    /// out whatever its ring still holds before closing.
    ///
    /// # Errors
    ///
    /// Returns a device error if the final flush or the close fails.
    pub async fn close(&self, handle: Handle) -> Result<()> {
        self.shared.table.close(handle, &self.shared.wake).await
    }

    /// Switch the handle into stream mode over `buffer`.
    ///
    /// Returns immediately. From now on the worker drains the ring into
    /// `NNN-<name>.LOG` of the current session every cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandleBusy`] if the handle is already streaming or
    /// open for direct I/O.
    pub fn open_stream(&self, handle: Handle, buffer: StreamBuffer) -> Result<StreamProducer> {
        let slot = self.shared.table.get(handle)?;
        let ring = Arc::new(Mutex::new(buffer));
        {
            let mut state = slot.lock();
            if state.open || state.stream.is_some() {
                return Err(Error::HandleBusy {
                    index: handle.index(),
                });
            }
            state.stream = Some(Arc::clone(&ring));
            debug!("Handle {handle} ('{}') switched to stream mode", state.name);
        }
        self.shared.wake.notify_one();
        Ok(StreamProducer::new(ring))
    }

    /// Current worker status.
    #[must_use]
    pub fn status(&self) -> MediatorStatus {
        self.shared.status.borrow().clone()
    }

    /// Session number of the current mount.
    #[must_use]
    pub fn session(&self) -> Option<u32> {
        self.shared.status.borrow().session
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<MediatorStatus> {
        self.shared.status.subscribe()
    }

    /// Wait until the worker has mounted the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MediatorStopped`] if the worker exits first.
    pub async fn wait_ready(&self) -> Result<MediatorStatus> {
        let mut status = self.watch_status();
        let current = status
            .wait_for(|s| matches!(s.state, MediatorState::Ready | MediatorState::Stopped))
            .await
            .map_err(|_| Error::MediatorStopped)?
            .clone();
        if current.state == MediatorState::Stopped {
            return Err(Error::MediatorStopped);
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use tokio::time::{sleep, timeout};

    fn fast_settings() -> MediatorSettings {
        MediatorSettings {
            max_handles: 4,
            poll_interval: Duration::from_millis(1),
            remount_delay: Duration::from_millis(10),
            ..MediatorSettings::default()
        }
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        let waited = timeout(Duration::from_secs(5), async {
            while !check() {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }

    fn file_len(device: &MemoryDevice, name: &str) -> usize {
        device.contents(name).map_or(0, |data| data.len())
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.storage.max_handles = 3;
        config.mediator.poll_interval_ms = 7;
        let settings = MediatorSettings::from(&config);
        assert_eq!(settings.max_handles, 3);
        assert_eq!(settings.poll_interval, Duration::from_millis(7));
        assert_eq!(settings.session_file, "SESSION.TXT");
        assert_eq!(settings.stream_sync_cycles, 100);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(MediatorState::Ready.to_string(), "ready");
        assert_eq!(MediatorState::Degraded.to_string(), "degraded");
    }

    #[tokio::test]
    async fn test_mount_advances_session() {
        let device = MemoryDevice::new();
        device.insert("SESSION.TXT", b"41\n".to_vec());
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let client = mediator.client();

        let status = client.wait_ready().await.unwrap();
        assert_eq!(status.state, MediatorState::Ready);
        assert_eq!(status.session, Some(42));
        assert!(status.mounted_at.is_some());
        assert_eq!(client.session(), Some(42));
        assert_eq!(device.contents("SESSION.TXT").unwrap(), b"42\n");

        mediator.shutdown().await.unwrap();
        assert_eq!(client.status().state, MediatorState::Stopped);
    }

    #[tokio::test]
    async fn test_mount_failure_retries() {
        let device = MemoryDevice::new();
        device.fail_mounts(3);
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let status = mediator.client().wait_ready().await.unwrap();
        assert_eq!(status.session, Some(1));
        assert_eq!(device.mount_count(), 1);
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_allocate_exhaustion_and_reuse() {
        let mediator = StorageMediator::spawn(MemoryDevice::new(), fast_settings());
        let client = mediator.client();
        assert_eq!(client.capacity(), 4);

        let mut tasks = Vec::new();
        for i in 0..4 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move { client.allocate(&format!("f{i}")) }));
        }
        let mut indexes = Vec::new();
        for task in tasks {
            indexes.push(task.await.unwrap().unwrap().index());
        }
        indexes.sort_unstable();
        assert_eq!(indexes, vec![0, 1, 2, 3]);

        let err = client.allocate("f4").unwrap_err();
        assert!(err.is_exhausted());

        let again = client.allocate("f2").unwrap();
        assert_eq!(client.allocate("f2").unwrap(), again);

        client.close(again).await.unwrap();
        assert!(client.allocate("f4").is_ok());
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_read_sync_close() {
        let device = MemoryDevice::new();
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let client = mediator.client();
        client.wait_ready().await.unwrap();

        let handle = client.allocate("PARAMS.TXT").unwrap();
        assert_eq!(client.write(handle, b"hello world", None).await.unwrap(), 11);
        assert_eq!(client.write(handle, b"THERE", Some(6)).await.unwrap(), 5);
        client.sync(handle).await.unwrap();
        assert_eq!(device.sync_count("PARAMS.TXT"), 1);
        client.close(handle).await.unwrap();
        assert_eq!(device.contents("PARAMS.TXT").unwrap(), b"hello THERE");

        let handle = client.allocate("PARAMS.TXT").unwrap();
        let data = client.read(handle, Some(6), 100).await.unwrap();
        assert_eq!(data, b"THERE");
        client.close(handle).await.unwrap();
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_requests_on_one_handle_complete_in_order() {
        let device = MemoryDevice::new();
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let client = mediator.client();
        let handle = client.allocate("ORDER.BIN").unwrap();

        for byte in 0u8..20 {
            client.write(handle, &[byte], None).await.unwrap();
        }
        client.close(handle).await.unwrap();
        assert_eq!(device.contents("ORDER.BIN").unwrap(), (0u8..20).collect::<Vec<_>>());
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_independent_handles_in_parallel() {
        let device = MemoryDevice::new();
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let client = mediator.client();

        let mut tasks = Vec::new();
        for i in 0..3u8 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                let handle = client.allocate(&format!("F{i}.BIN")).unwrap();
                for _ in 0..10 {
                    client.write(handle, &[i], None).await.unwrap();
                }
                client.close(handle).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        for i in 0..3u8 {
            assert_eq!(device.contents(&format!("F{i}.BIN")).unwrap(), vec![i; 10]);
        }
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_error_does_not_remount() {
        let device = MemoryDevice::new();
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let client = mediator.client();
        client.wait_ready().await.unwrap();

        let handle = client.allocate("MISSING.TXT").unwrap();
        let err = client.read(handle, None, 16).await.unwrap_err();
        assert!(err.is_device_error());
        assert!(err.to_string().contains("read"));

        sleep(Duration::from_millis(30)).await;
        assert_eq!(device.mount_count(), 1);
        assert_eq!(client.status().state, MediatorState::Ready);
        client.close(handle).await.unwrap();
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_error_reported_to_caller() {
        let device = MemoryDevice::new();
        device.fail_writes("DATA.BIN", 1);
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let client = mediator.client();

        let handle = client.allocate("DATA.BIN").unwrap();
        assert!(client.write(handle, b"x", None).await.is_err());
        // the failed handle was closed; the next write reopens the file
        assert_eq!(client.write(handle, b"y", None).await.unwrap(), 1);
        client.close(handle).await.unwrap();
        assert_eq!(device.contents("DATA.BIN").unwrap(), b"y");
        assert_eq!(device.mount_count(), 1);
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_request_cannot_leak_into_reused_slot() {
        let device = MemoryDevice::new();
        let settings = MediatorSettings {
            max_handles: 1,
            ..fast_settings()
        };
        let mediator = StorageMediator::spawn(device.clone(), settings);
        let client = mediator.client();
        client.wait_ready().await.unwrap();
        device.delay_opens(Duration::from_millis(50));

        let a = client.allocate("A.BIN").unwrap();
        let gave_up = timeout(Duration::from_millis(10), client.write(a, b"aaaa", None)).await;
        assert!(gave_up.is_err());
        client.close(a).await.unwrap();

        let b = client.allocate("B.BIN").unwrap();
        assert_eq!(b.index(), a.index());
        client.write(b, b"bbbb", None).await.unwrap();
        client.close(b).await.unwrap();

        // the abandoned write either landed in its own file or never ran
        assert!(device.contents("A.BIN").map_or(true, |data| data == b"aaaa"));
        assert_eq!(device.contents("B.BIN").unwrap(), b"bbbb");
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_close_still_releases_slot() {
        let device = MemoryDevice::new();
        let settings = MediatorSettings {
            max_handles: 1,
            ..fast_settings()
        };
        let mediator = StorageMediator::spawn(device.clone(), settings);
        let client = mediator.client();

        let handle = client.allocate("C.TXT").unwrap();
        client.write(handle, b"c", None).await.unwrap();
        device.fail_closes("C.TXT", 1);
        let err = client.close(handle).await.unwrap_err();
        assert!(matches!(err, Error::DeviceIo { operation: "close", .. }));

        assert!(matches!(
            client.sync(handle).await,
            Err(Error::HandleNotAllocated { .. })
        ));
        let next = client.allocate("D.TXT").unwrap();
        assert_eq!(next.index(), handle.index());
        client.write(next, b"d", None).await.unwrap();
        client.close(next).await.unwrap();
        assert_eq!(device.contents("D.TXT").unwrap(), b"d");
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_error_reported_without_remount() {
        let device = MemoryDevice::new();
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let client = mediator.client();
        client.wait_ready().await.unwrap();

        let handle = client.allocate("PARAMS.TXT").unwrap();
        client.write(handle, b"p", None).await.unwrap();
        device.fail_syncs("PARAMS.TXT", 1);
        let err = client.sync(handle).await.unwrap_err();
        assert!(matches!(err, Error::DeviceIo { operation: "sync", .. }));

        sleep(Duration::from_millis(30)).await;
        assert_eq!(device.mount_count(), 1);
        assert_eq!(client.status().state, MediatorState::Ready);
        client.close(handle).await.unwrap();
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_and_close_unopened_handle() {
        let device = MemoryDevice::new();
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let client = mediator.client();

        let handle = client.allocate("NEVER.TXT").unwrap();
        client.sync(handle).await.unwrap();
        client.close(handle).await.unwrap();
        assert!(device.contents("NEVER.TXT").is_none());
        assert!(matches!(
            client.sync(handle).await,
            Err(Error::HandleNotAllocated { .. })
        ));
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_end_to_end() {
        let device = MemoryDevice::new();
        device.insert("SESSION.TXT", b"41\n".to_vec());
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let client = mediator.client();
        client.wait_ready().await.unwrap();

        let handle = client.allocate("AQL").unwrap();
        let producer = client.open_stream(handle, StreamBuffer::new(4096)).unwrap();

        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        producer.append(&data[..400]);
        producer.append(&data[400..800]);
        producer.append(&data[800..]);

        eventually("first block", || file_len(&device, "042-AQL.LOG") == 512).await;
        // 488 bytes stay buffered: less than one block is never drained
        let cycles = client.status().cycles;
        eventually("more cycles", || client.status().cycles > cycles + 5).await;
        assert_eq!(file_len(&device, "042-AQL.LOG"), 512);
        assert_eq!(producer.unflushed(), 488);

        client.close(handle).await.unwrap();
        assert_eq!(device.contents("042-AQL.LOG").unwrap(), data);
        assert!(device.sync_count("042-AQL.LOG") >= 1);
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_handle_refuses_direct_io() {
        let mediator = StorageMediator::spawn(MemoryDevice::new(), fast_settings());
        let client = mediator.client();
        let handle = client.allocate("AQL").unwrap();
        let _producer = client.open_stream(handle, StreamBuffer::new(1024)).unwrap();

        assert!(matches!(
            client.write(handle, b"x", None).await,
            Err(Error::HandleStreaming { .. })
        ));
        assert!(matches!(
            client.read(handle, None, 1).await,
            Err(Error::HandleStreaming { .. })
        ));
        assert!(matches!(
            client.open_stream(handle, StreamBuffer::new(1024)),
            Err(Error::HandleBusy { .. })
        ));
        client.sync(handle).await.unwrap();
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_periodic_sync() {
        let device = MemoryDevice::new();
        let settings = MediatorSettings {
            stream_sync_cycles: 3,
            ..fast_settings()
        };
        let mediator = StorageMediator::spawn(device.clone(), settings);
        let client = mediator.client();
        let handle = client.allocate("AQL").unwrap();
        let _producer = client.open_stream(handle, StreamBuffer::new(1024)).unwrap();

        eventually("periodic sync", || device.sync_count("001-AQL.LOG") >= 2).await;
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_failure_remounts_into_new_session() {
        let device = MemoryDevice::new();
        device.fail_writes("001-AQL.LOG", 1);
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let client = mediator.client();
        client.wait_ready().await.unwrap();

        let handle = client.allocate("AQL").unwrap();
        let producer = client.open_stream(handle, StreamBuffer::new(2048)).unwrap();
        producer.append(&[0x5A; 512]);

        eventually("remount", || device.mount_count() == 2).await;
        eventually("new session log", || file_len(&device, "002-AQL.LOG") == 512).await;
        assert_eq!(file_len(&device, "001-AQL.LOG"), 0);
        assert_eq!(client.session(), Some(2));
        assert_eq!(device.contents("SESSION.TXT").unwrap(), b"2\n");
        assert_eq!(producer.unflushed(), 0);
        mediator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_streams() {
        let device = MemoryDevice::new();
        let mediator = StorageMediator::spawn(device.clone(), fast_settings());
        let client = mediator.client();
        client.wait_ready().await.unwrap();

        let handle = client.allocate("AQL").unwrap();
        let producer = client.open_stream(handle, StreamBuffer::new(1024)).unwrap();
        producer.append(&[7; 100]);
        mediator.shutdown().await.unwrap();

        assert_eq!(device.contents("001-AQL.LOG").unwrap(), vec![7; 100]);
        assert!(matches!(
            client.write(client.allocate("LATE.TXT").unwrap(), b"x", None).await,
            Err(Error::MediatorStopped)
        ));
        assert!(matches!(client.wait_ready().await, Err(Error::MediatorStopped)));
    }
}
