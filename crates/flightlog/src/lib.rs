//! `flightlog` - Single-writer flight telemetry logging
//!
//! Telemetry is framed into self-synchronizing records ([`codec`]), queued in
//! a fixed ring ([`buffer`]) and written out in block-sized chunks by a
//! single storage worker ([`mediator`]) that owns the device. Logs are
//! decoded offline by a resynchronizing scanner ([`reader`]).

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod cli;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod mediator;
pub mod reader;
pub mod recorder;

#[cfg(test)]
mod testing;

pub use buffer::{StreamBuffer, StreamProducer, BLOCK_SIZE};
pub use codec::{CodecError, FieldDescriptor, FieldId, FieldType, Record, Schema, Value};
pub use config::Config;
pub use device::{BlockDevice, DeviceFile, DirDevice, MemoryDevice, OpenMode};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use mediator::{Handle, MediatorState, MediatorStatus, StorageClient, StorageMediator};
pub use reader::{read_log, read_log_from, Log, Records, ScanStats, Scanner};
pub use recorder::Recorder;
