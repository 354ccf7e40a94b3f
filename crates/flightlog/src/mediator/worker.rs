//! The storage worker: the only task that touches the device.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::session::{advance_session, stream_file_name};
use super::table::{Completion, Op};
use super::{MediatorSettings, MediatorState, Shared};
use crate::buffer::{self, SharedBuffer};
use crate::device::{BlockDevice, DeviceFile, OpenMode};
use crate::error::{Error, Result};

/// A device error on a stream handle. Escalates to a full remount.
#[derive(Debug)]
struct StreamFailure {
    name: String,
    message: String,
}

enum Exit {
    Shutdown,
    StreamFailure(StreamFailure),
}

/// A device file together with the slot generation it was opened for.
struct OpenFile {
    generation: u64,
    file: Box<dyn DeviceFile>,
}

pub(crate) struct Worker {
    device: Box<dyn BlockDevice>,
    shared: Arc<Shared>,
    settings: MediatorSettings,
    /// Device files, indexed like the handle table.
    files: Vec<Option<OpenFile>>,
    session: u32,
    cycles: u64,
    /// Generation of the slot being serviced.
    generation: u64,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub(crate) fn new(
        device: Box<dyn BlockDevice>,
        shared: Arc<Shared>,
        settings: MediatorSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let files = (0..shared.table.capacity()).map(|_| None).collect();
        Self {
            device,
            shared,
            settings,
            files,
            session: 0,
            cycles: 0,
            generation: 0,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Storage worker started");
        loop {
            if !self.mount().await {
                break;
            }
            match self.serve().await {
                Exit::Shutdown => {
                    self.flush_all().await;
                    break;
                }
                Exit::StreamFailure(failure) => {
                    error!(
                        "Stream '{}' failed: {}; remounting storage",
                        failure.name, failure.message
                    );
                    self.set_state(MediatorState::Degraded);
                    self.reset_handles();
                    if self.pause(self.settings.remount_delay).await {
                        break;
                    }
                    self.set_state(MediatorState::Unmounted);
                }
            }
        }
        self.shared.table.stop();
        self.set_state(MediatorState::Stopped);
        info!("Storage worker stopped");
    }

    fn set_state(&self, state: MediatorState) {
        self.shared.status.send_modify(|status| status.state = state);
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Sleep for `delay`. Returns whether shutdown was requested meanwhile.
    async fn pause(&mut self, delay: Duration) -> bool {
        if self.shutdown_requested() {
            return true;
        }
        tokio::select! {
            () = time::sleep(delay) => {}
            _ = self.shutdown.changed() => {}
        }
        self.shutdown_requested()
    }

    /// Mount and advance the session, retrying until it works.
    ///
    /// Returns `false` when shutdown was requested before a mount succeeded.
    async fn mount(&mut self) -> bool {
        loop {
            self.set_state(MediatorState::Mounting);
            match self.try_mount().await {
                Ok(session) => {
                    self.session = session;
                    info!("Storage ready, session {session:03}");
                    self.shared.status.send_modify(|status| {
                        status.state = MediatorState::Ready;
                        status.session = Some(session);
                        status.mounted_at = Some(Utc::now());
                    });
                    return true;
                }
                Err(err) => {
                    warn!(
                        "{err}; retrying in {}ms",
                        self.settings.remount_delay.as_millis()
                    );
                    self.set_state(MediatorState::Unmounted);
                    if self.pause(self.settings.remount_delay).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn try_mount(&mut self) -> Result<u32> {
        self.device
            .mount()
            .await
            .map_err(|e| Error::mount_failure(e.to_string()))?;
        advance_session(
            self.device.as_mut(),
            &self.settings.session_file,
            self.settings.session_max,
        )
        .await
        .map_err(|e| Error::mount_failure(format!("cannot update session file: {e}")))
    }

    async fn serve(&mut self) -> Exit {
        let shared = Arc::clone(&self.shared);
        let poll = self.settings.poll_interval;
        loop {
            if self.shutdown_requested() {
                return Exit::Shutdown;
            }
            if let Err(failure) = self.cycle().await {
                return Exit::StreamFailure(failure);
            }
            tokio::select! {
                () = shared.wake.notified() => {}
                () = time::sleep(poll) => {}
                _ = self.shutdown.changed() => {}
            }
        }
    }

    /// Service every slot once: its pending request if any, otherwise a
    /// stream drain.
    async fn cycle(&mut self) -> std::result::Result<(), StreamFailure> {
        let shared = Arc::clone(&self.shared);
        self.cycles += 1;
        let sync_due = (self.cycles + 1) % self.settings.stream_sync_cycles.max(1) == 0;

        for index in 0..self.files.len() {
            let slot = shared.table.slot(index);
            let (pending, stream, name, generation) = {
                let mut state = slot.lock();
                let stale = self.files[index]
                    .as_ref()
                    .is_some_and(|open| !state.allocated || open.generation != state.generation);
                if stale {
                    // the slot was released or handed to another name
                    self.files[index] = None;
                    state.open = false;
                }
                if state.pending.is_none() && state.stream.is_none() {
                    continue;
                }
                (
                    state.take_pending(),
                    state.stream.clone(),
                    state.name.clone(),
                    state.generation,
                )
            };
            self.generation = generation;

            if let Some((seq, op)) = pending {
                let result = self.execute(index, &name, op, stream.as_ref()).await;
                let failure = match &result {
                    Err(err) if stream.is_some() => Some(err.to_string()),
                    _ => None,
                };
                slot.complete(seq, result);
                if let Some(message) = failure {
                    return Err(StreamFailure { name, message });
                }
            } else if let Some(buffer) = stream {
                if let Err(err) = self.drain(index, &name, &buffer, sync_due).await {
                    self.drop_file(index);
                    return Err(StreamFailure {
                        name,
                        message: err.to_string(),
                    });
                }
            }
        }

        let cycles = self.cycles;
        self.shared.status.send_modify(|status| status.cycles = cycles);
        Ok(())
    }

    async fn execute(
        &mut self,
        index: usize,
        name: &str,
        op: Op,
        stream: Option<&SharedBuffer>,
    ) -> Result<Completion> {
        let operation = op.name();
        debug!("Servicing {operation} on handle #{index} ('{name}')");
        let result = match op {
            Op::Read { seek, len } => self.read(index, name, seek, len).await.map(Completion::Read),
            Op::Write { seek, data } => self
                .write(index, name, seek, &data)
                .await
                .map(Completion::Written),
            Op::Sync => self.sync(index).await.map(|()| Completion::Done),
            Op::Close => self.close(index, name, stream).await.map(|()| Completion::Done),
        };
        result.map_err(|source| {
            warn!("Device {operation} failed on '{name}': {source}");
            self.drop_file(index);
            Error::device_io(name, operation, source)
        })
    }

    /// The device file for `index`, opening `path` in `mode` on first use.
    async fn open_file(
        &mut self,
        index: usize,
        path: &str,
        mode: OpenMode,
    ) -> io::Result<&mut Box<dyn DeviceFile>> {
        if self.files[index].is_none() {
            let file = self.device.open(path, mode).await?;
            self.shared.table.slot(index).lock().open = true;
            self.files[index] = Some(OpenFile {
                generation: self.generation,
                file,
            });
        }
        self.files[index]
            .as_mut()
            .map(|open| &mut open.file)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file is not open"))
    }

    fn drop_file(&mut self, index: usize) {
        self.files[index] = None;
        self.shared.table.slot(index).lock().open = false;
    }

    async fn read(
        &mut self,
        index: usize,
        name: &str,
        seek: Option<u64>,
        len: usize,
    ) -> io::Result<Vec<u8>> {
        let file = self.open_file(index, name, OpenMode::Read).await?;
        if let Some(pos) = seek {
            file.seek(pos).await?;
        }
        let mut buf = vec![0; len];
        let n = file.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn write(
        &mut self,
        index: usize,
        name: &str,
        seek: Option<u64>,
        data: &[u8],
    ) -> io::Result<usize> {
        let file = self.open_file(index, name, OpenMode::Write).await?;
        if let Some(pos) = seek {
            file.seek(pos).await?;
        }
        file.write(data).await
    }

    async fn sync(&mut self, index: usize) -> io::Result<()> {
        match self.files[index].as_mut() {
            Some(open) => open.file.sync().await,
            None => Ok(()),
        }
    }

    /// Close the handle's file. A stream handle first writes out whatever
    /// the ring still holds and syncs.
    async fn close(
        &mut self,
        index: usize,
        name: &str,
        stream: Option<&SharedBuffer>,
    ) -> io::Result<()> {
        if let Some(buffer) = stream {
            self.shared.table.slot(index).lock().stream = None;
            self.flush_stream(index, name, buffer).await?;
        }
        if let Some(mut open) = self.files[index].take() {
            self.shared.table.slot(index).lock().open = false;
            open.file.close().await?;
        }
        Ok(())
    }

    /// Write one block-aligned span if one is ready, syncing when due.
    async fn drain(
        &mut self,
        index: usize,
        name: &str,
        buffer: &SharedBuffer,
        sync_due: bool,
    ) -> io::Result<()> {
        let path = stream_file_name(self.session, name);
        let file = self.open_file(index, &path, OpenMode::Write).await?;
        let chunk = {
            let ring = buffer::lock(buffer);
            ring.drain_ready().map(|span| ring.bytes(span).to_vec())
        };
        if let Some(chunk) = chunk {
            let written = file.write(&chunk).await?;
            buffer::lock(buffer).advance_tail(written);
        }
        if sync_due {
            file.sync().await?;
        }
        Ok(())
    }

    /// Write out everything the ring holds, then sync.
    async fn flush_stream(&mut self, index: usize, name: &str, buffer: &SharedBuffer) -> io::Result<()> {
        let path = stream_file_name(self.session, name);
        let file = self.open_file(index, &path, OpenMode::Write).await?;
        loop {
            let chunk = {
                let ring = buffer::lock(buffer);
                ring.drain_remaining().map(|span| ring.bytes(span).to_vec())
            };
            let Some(chunk) = chunk else {
                break;
            };
            let written = file.write(&chunk).await?;
            buffer::lock(buffer).advance_tail(written);
        }
        file.sync().await
    }

    /// Close every open file, flushing stream handles first.
    async fn flush_all(&mut self) {
        let shared = Arc::clone(&self.shared);
        for index in 0..self.files.len() {
            let (stream, name) = {
                let state = shared.table.slot(index).lock();
                self.generation = state.generation;
                (state.stream.clone(), state.name.clone())
            };
            if stream.is_none() && self.files[index].is_none() {
                continue;
            }
            if let Err(err) = self.close(index, &name, stream.as_ref()).await {
                warn!("Failed to close '{name}' on shutdown: {err}");
                self.drop_file(index);
            }
        }
    }

    /// Drop every device file and fail every pending request. Stream
    /// handles keep their ring and resume in the next session's log.
    fn reset_handles(&mut self) {
        for file in &mut self.files {
            *file = None;
        }
        self.shared.table.reset(|name, op| {
            Error::device_io(
                name,
                op.name(),
                io::Error::new(io::ErrorKind::Interrupted, "storage is remounting"),
            )
        });
    }
}
