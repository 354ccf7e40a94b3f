//! Directory-backed device.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

use super::{check_name, BlockDevice, DeviceFile, OpenMode};

/// Maps logical files onto a directory of the host filesystem.
///
/// Mounting creates the directory when it is missing.
#[derive(Debug, Clone)]
pub struct DirDevice {
    root: PathBuf,
}

impl DirDevice {
    /// Create a device rooted at `root`. Nothing is touched until mount.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory backing this device.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait::async_trait]
impl BlockDevice for DirDevice {
    async fn mount(&mut self) -> io::Result<()> {
        match fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a directory", self.root.display()),
            )),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("Creating log directory {}", self.root.display());
                fs::create_dir_all(&self.root).await
            }
            Err(err) => Err(err),
        }
    }

    async fn open(&mut self, name: &str, mode: OpenMode) -> io::Result<Box<dyn DeviceFile>> {
        check_name(name)?;
        let path = self.root.join(name);
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
        };
        let file = options.open(&path).await?;
        debug!("Opened {} ({:?})", path.display(), mode);
        Ok(Box::new(DirFile { file }))
    }
}

#[derive(Debug)]
struct DirFile {
    file: File,
}

#[async_trait::async_trait]
impl DeviceFile for DirFile {
    async fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos)).await.map(|_| ())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf).await?;
        Ok(buf.len())
    }

    async fn sync(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mount_creates_directory() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("card");
        let mut device = DirDevice::new(&root);
        assert_eq!(device.root(), root.as_path());

        device.mount().await.unwrap();
        assert!(root.is_dir());
        // mounting again is a no-op
        device.mount().await.unwrap();
    }

    #[tokio::test]
    async fn test_mount_rejects_plain_file() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("not-a-dir");
        std::fs::write(&root, b"x").unwrap();
        let mut device = DirDevice::new(&root);
        assert!(device.mount().await.is_err());
    }

    #[tokio::test]
    async fn test_write_seek_read() {
        let temp = tempfile::tempdir().unwrap();
        let mut device = DirDevice::new(temp.path());
        device.mount().await.unwrap();

        let mut file = device.open("params.txt", OpenMode::Write).await.unwrap();
        assert_eq!(file.write(b"hello world").await.unwrap(), 11);
        file.seek(6).await.unwrap();
        file.write(b"there").await.unwrap();
        file.close().await.unwrap();

        let mut file = device.open("params.txt", OpenMode::Read).await.unwrap();
        let mut buf = [0u8; 32];
        let n = file.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello there");

        file.seek(6).await.unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(file.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"the");
    }

    #[tokio::test]
    async fn test_open_write_truncates() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("a.bin"), b"old contents").unwrap();
        let mut device = DirDevice::new(temp.path());
        device.mount().await.unwrap();

        let mut file = device.open("a.bin", OpenMode::Write).await.unwrap();
        file.write(b"new").await.unwrap();
        file.sync().await.unwrap();
        file.close().await.unwrap();
        assert_eq!(std::fs::read(temp.path().join("a.bin")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_open_missing_for_read_fails() {
        let temp = tempfile::tempdir().unwrap();
        let mut device = DirDevice::new(temp.path());
        device.mount().await.unwrap();
        let err = device.open("missing", OpenMode::Read).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_open_rejects_path_names() {
        let temp = tempfile::tempdir().unwrap();
        let mut device = DirDevice::new(temp.path());
        device.mount().await.unwrap();
        let err = device.open("../escape", OpenMode::Write).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
