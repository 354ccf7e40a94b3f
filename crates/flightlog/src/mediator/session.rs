//! Per-mount session counter.
//!
//! The counter lives in a small control file as decimal text followed by a
//! newline. Every mount reads it, increments it and writes it back, so each
//! boot gets its own log file name.

use std::io;

use tracing::{debug, info};

use crate::device::{BlockDevice, OpenMode};

/// Name of the log file a stream handle called `name` writes in `session`.
#[must_use]
pub fn stream_file_name(session: u32, name: &str) -> String {
    format!("{session:03}-{name}.LOG")
}

/// Parse a session counter from control file contents.
///
/// Leading whitespace is skipped and parsing stops at the first non-digit.
/// Anything unreadable yields `None`.
#[must_use]
pub fn parse_session(bytes: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(bytes).ok()?.trim_start();
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

/// The session that follows `previous`, wrapping to zero above `max`.
#[must_use]
pub const fn next_session(previous: u32, max: u32) -> u32 {
    if previous >= max {
        0
    } else {
        previous + 1
    }
}

/// Read the counter stored in `file_name`, if the file exists.
///
/// # Errors
///
/// Returns device errors other than a missing file.
pub async fn read_session(device: &mut dyn BlockDevice, file_name: &str) -> io::Result<Option<u32>> {
    let mut file = match device.open(file_name, OpenMode::Read).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut buf = [0u8; 16];
    let n = file.read(&mut buf).await?;
    file.close().await?;
    Ok(parse_session(&buf[..n]))
}

/// Advance the counter stored in `file_name` and persist the new value.
///
/// A missing or unreadable control file counts as session zero, so the
/// first mount of a blank device yields session one.
///
/// # Errors
///
/// Returns an error when the control file cannot be read or rewritten.
pub async fn advance_session(
    device: &mut dyn BlockDevice,
    file_name: &str,
    max: u32,
) -> io::Result<u32> {
    let previous = read_session(device, file_name).await?;
    debug!("Previous session: {:?}", previous);
    let session = next_session(previous.unwrap_or(0), max);

    let mut file = device.open(file_name, OpenMode::Write).await?;
    file.write(format!("{session}\n").as_bytes()).await?;
    file.close().await?;

    info!("Created new session {session:03}");
    Ok(session)
}
