//! Schema-aware producer on top of a stream handle.
//!
//! A [`Recorder`] turns typed values into framed records and appends them to
//! a stream ring without ever waiting for storage. The schema is published
//! once per version, ahead of the first measurement that needs it.

use tracing::{debug, info, warn};

use crate::buffer::StreamProducer;
use crate::codec::{frame_legacy, frame_measurement, frame_schema, LegacyRecord, Schema, Value};
use crate::error::Result;

/// Encodes samples and appends them to a stream.
#[derive(Debug)]
pub struct Recorder {
    producer: StreamProducer,
    schema: Schema,
    published: bool,
    written: u64,
    dropped: u64,
}

impl Recorder {
    /// Record measurements of `schema` into `producer`'s ring.
    #[must_use]
    pub fn new(producer: StreamProducer, schema: Schema) -> Self {
        Self {
            producer,
            schema,
            published: false,
            written: 0,
            dropped: 0,
        }
    }

    /// The schema governing new measurements.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Switch to a new field set. It is published before the next
    /// measurement.
    pub fn set_schema(&mut self, schema: Schema) {
        info!("Recorder schema changed to {} fields", schema.len());
        self.schema = schema;
        self.published = false;
    }

    /// Append a measurement of the current schema.
    ///
    /// Returns whether the record made it into the ring. A record that
    /// would lap unflushed data is dropped and counted instead.
    ///
    /// # Errors
    ///
    /// Returns a codec error when `values` do not match the schema.
    pub fn record(&mut self, values: &[Value]) -> Result<bool> {
        let frame = frame_measurement(&self.schema, values)?;
        if !self.published && !self.publish() {
            self.drop_frame("measurement");
            return Ok(false);
        }
        Ok(self.append(&frame, "measurement"))
    }

    /// Append a fixed-layout legacy record.
    pub fn record_legacy(&mut self, record: &LegacyRecord) -> bool {
        self.append(&frame_legacy(record), "legacy")
    }

    /// Publish the current schema now, even if it was already published.
    pub fn publish(&mut self) -> bool {
        let frame = frame_schema(&self.schema);
        self.published = self.append(&frame, "schema");
        if self.published {
            debug!("Published schema with {} fields", self.schema.len());
        }
        self.published
    }

    /// Records appended so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Records dropped because the ring was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn append(&mut self, frame: &[u8], what: &str) -> bool {
        if self.producer.try_append(frame) {
            self.written += 1;
            true
        } else {
            self.drop_frame(what);
            false
        }
    }

    fn drop_frame(&mut self, what: &str) {
        self.dropped += 1;
        if self.dropped.is_power_of_two() {
            warn!(
                "Stream ring full, dropped {what} record ({} dropped so far)",
                self.dropped
            );
        }
    }
}
