//! Byte-at-a-time resynchronizing record scanner.
//!
//! The scanner is a finite state machine fed from a queue of input bytes.
//! It hunts for the `Aq` marker, reads the kind byte, collects exactly as
//! many bytes as the kind needs and decodes them. When a record fails its
//! checksum or cannot be decoded, every byte after its kind tag goes back
//! to the front of the queue and the hunt restarts there, so a valid record
//! hiding inside a corrupt one is never skipped.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{
    self, schema_body_len, CodecError, Record, RecordKind, Schema, CHECKSUM_LEN,
    FRAME_HEADER_LEN, LEGACY_BODY_LEN, SYNC_MARKER,
};

/// Where the scanner is within the current record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Looking for the first marker byte.
    SeekMarker1,
    /// First marker byte seen.
    SeekMarker2,
    /// Marker seen; the next byte is the kind tag.
    SeekKind,
    /// Collecting a legacy record.
    ReadLegacy,
    /// Collecting a schema record.
    ReadSchema,
    /// Collecting a measurement record.
    ReadMeasurement,
}

impl ScanState {
    fn reading(self) -> Option<RecordKind> {
        match self {
            Self::ReadLegacy => Some(RecordKind::Legacy),
            Self::ReadSchema => Some(RecordKind::Schema),
            Self::ReadMeasurement => Some(RecordKind::Measurement),
            _ => None,
        }
    }
}

/// Counters describing what a scan recovered and what it dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    /// Input bytes fed to the scanner.
    pub bytes: u64,
    /// Legacy records decoded.
    pub legacy: u64,
    /// Measurement records decoded.
    pub measurements: u64,
    /// Schema records applied.
    pub schemas: u64,
    /// Records dropped for a bad checksum.
    pub checksum_errors: u64,
    /// Measurements dropped because no schema was active.
    pub schema_missing: u64,
    /// Schema records with a valid checksum but unusable descriptors.
    pub invalid_schemas: u64,
    /// Marker followed by an unknown kind byte.
    pub unknown_kinds: u64,
    /// Bytes of a record cut off by the end of input.
    pub truncated_bytes: u64,
}

impl ScanStats {
    /// Records that yield a sample: legacy plus measurement.
    #[must_use]
    pub fn samples(&self) -> u64 {
        self.legacy + self.measurements
    }

    /// Records dropped for any reason.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.checksum_errors + self.schema_missing + self.invalid_schemas
    }
}

/// Resynchronizing record scanner.
#[derive(Debug, Clone)]
pub struct Scanner {
    state: ScanState,
    schema: Option<Schema>,
    body: Vec<u8>,
    need: usize,
    input: VecDeque<u8>,
    ended: bool,
    stats: ScanStats,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    /// A scanner with no active schema.
    #[must_use]
    pub fn new() -> Self {
        Self::with_schema(None)
    }

    /// A scanner that starts with `schema` already active, as if its schema
    /// record had been seen out of band.
    #[must_use]
    pub fn with_schema(schema: Option<Schema>) -> Self {
        Self {
            state: ScanState::SeekMarker1,
            schema: schema.filter(|s| !s.is_empty()),
            body: Vec::new(),
            need: 0,
            input: VecDeque::new(),
            ended: false,
            stats: ScanStats::default(),
        }
    }

    /// Current state of the machine.
    #[must_use]
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// The schema that governs the next measurement.
    #[must_use]
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Framed size of the next sample record: a measurement when a schema is
    /// active, a legacy record otherwise.
    #[must_use]
    pub fn record_len(&self) -> usize {
        let body = self.schema.as_ref().map_or(LEGACY_BODY_LEN, Schema::byte_len);
        FRAME_HEADER_LEN + body + CHECKSUM_LEN
    }

    /// Queue input bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.stats.bytes += bytes.len() as u64;
        self.input.extend(bytes);
    }

    /// Mark the end of input. A record still being collected is abandoned
    /// once the queue runs dry and its bytes are rescanned.
    pub fn finish(&mut self) {
        self.ended = true;
    }

    /// Run the machine until it yields a record or runs out of input.
    ///
    /// Schema records are returned as well as samples; they also replace
    /// the active schema.
    pub fn next_record(&mut self) -> Option<Record> {
        loop {
            while let Some(byte) = self.input.pop_front() {
                if let Some(record) = self.step(byte) {
                    return Some(record);
                }
            }
            if !self.ended {
                return None;
            }
            match self.state.reading() {
                Some(kind) => {
                    debug!(
                        "Input ends inside a '{kind}' record ({} of {} bytes)",
                        self.body.len(),
                        self.need
                    );
                    self.stats.truncated_bytes += (FRAME_HEADER_LEN + self.body.len()) as u64;
                    self.resync();
                }
                None => {
                    self.state = ScanState::SeekMarker1;
                    return None;
                }
            }
        }
    }

    /// Push `bytes`, end the input and collect every record.
    pub fn scan_all(&mut self, bytes: &[u8]) -> Vec<Record> {
        self.push(bytes);
        self.finish();
        std::iter::from_fn(|| self.next_record()).collect()
    }

    fn step(&mut self, byte: u8) -> Option<Record> {
        match self.state {
            ScanState::SeekMarker1 => {
                if byte == SYNC_MARKER[0] {
                    self.state = ScanState::SeekMarker2;
                }
                None
            }
            ScanState::SeekMarker2 => {
                self.state = if byte == SYNC_MARKER[1] {
                    ScanState::SeekKind
                } else if byte == SYNC_MARKER[0] {
                    ScanState::SeekMarker2
                } else {
                    ScanState::SeekMarker1
                };
                None
            }
            ScanState::SeekKind => {
                self.begin(byte);
                None
            }
            ScanState::ReadLegacy | ScanState::ReadSchema | ScanState::ReadMeasurement => {
                self.body.push(byte);
                if self.state == ScanState::ReadSchema && self.body.len() == 1 {
                    self.need = schema_body_len(byte);
                }
                if self.body.len() < self.need {
                    return None;
                }
                self.complete()
            }
        }
    }

    fn begin(&mut self, tag: u8) {
        self.body.clear();
        self.state = ScanState::SeekMarker1;
        match RecordKind::from_tag(tag) {
            Some(RecordKind::Legacy) => {
                self.need = LEGACY_BODY_LEN + CHECKSUM_LEN;
                self.state = ScanState::ReadLegacy;
            }
            Some(RecordKind::Schema) => {
                // the count byte decides the rest
                self.need = 1;
                self.state = ScanState::ReadSchema;
            }
            Some(RecordKind::Measurement) => match &self.schema {
                Some(schema) => {
                    self.need = schema.byte_len() + CHECKSUM_LEN;
                    self.state = ScanState::ReadMeasurement;
                }
                None => {
                    debug!("Measurement record without an active schema, skipping");
                    self.stats.schema_missing += 1;
                }
            },
            None => {
                self.stats.unknown_kinds += 1;
                // the tag may itself open the next marker
                self.input.push_front(tag);
            }
        }
    }

    fn complete(&mut self) -> Option<Record> {
        let Some(kind) = self.state.reading() else {
            return None;
        };
        match codec::decode(kind, self.schema.as_ref(), &self.body) {
            Ok(Record::Schema(schema)) => {
                debug!("Schema with {} fields applied", schema.len());
                self.stats.schemas += 1;
                self.schema = Some(schema.clone()).filter(|s| !s.is_empty());
                self.state = ScanState::SeekMarker1;
                Some(Record::Schema(schema))
            }
            Ok(record) => {
                match kind {
                    RecordKind::Legacy => self.stats.legacy += 1,
                    _ => self.stats.measurements += 1,
                }
                self.state = ScanState::SeekMarker1;
                Some(record)
            }
            Err(CodecError::ChecksumMismatch { kind }) => {
                warn!("Checksum error in '{kind}' record");
                self.stats.checksum_errors += 1;
                self.resync();
                None
            }
            Err(err) => {
                warn!("Dropping '{kind}' record: {err}");
                self.stats.invalid_schemas += 1;
                self.resync();
                None
            }
        }
    }

    /// Put the collected body back in front of the input and hunt again.
    fn resync(&mut self) {
        for byte in self.body.drain(..).rev() {
            self.input.push_front(byte);
        }
        self.state = ScanState::SeekMarker1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{
        frame_legacy, frame_measurement, frame_schema, FieldDescriptor, FieldId, FieldType,
        LegacyRecord, Value,
    };
    use crate::testing::{flight_schema, flight_values, XorShift};

    fn measurement(step: u32) -> Vec<u8> {
        frame_measurement(&flight_schema(), &flight_values(step)).unwrap()
    }

    fn sample_values(record: &Record) -> Vec<Value> {
        match record {
            Record::Measurement(sample) => sample.values(),
            other => panic!("expected a measurement, got {other:?}"),
        }
    }

    #[test]
    fn test_states_follow_marker() {
        let mut scanner = Scanner::new();
        assert_eq!(scanner.state(), ScanState::SeekMarker1);
        scanner.push(b"xA");
        assert!(scanner.next_record().is_none());
        assert_eq!(scanner.state(), ScanState::SeekMarker2);
        scanner.push(b"A");
        assert!(scanner.next_record().is_none());
        assert_eq!(scanner.state(), ScanState::SeekMarker2);
        scanner.push(b"q");
        assert!(scanner.next_record().is_none());
        assert_eq!(scanner.state(), ScanState::SeekKind);
        scanner.push(b"L");
        assert!(scanner.next_record().is_none());
        assert_eq!(scanner.state(), ScanState::ReadLegacy);
    }

    #[test]
    fn test_schema_then_measurements() {
        let mut bytes = frame_schema(&flight_schema());
        for step in 0..5 {
            bytes.extend(measurement(step));
        }
        let mut scanner = Scanner::new();
        let records = scanner.scan_all(&bytes);

        assert_eq!(records.len(), 6);
        assert_eq!(records[0], Record::Schema(flight_schema()));
        for (step, record) in records[1..].iter().enumerate() {
            assert_eq!(sample_values(record), flight_values(step as u32));
        }
        assert_eq!(scanner.stats().schemas, 1);
        assert_eq!(scanner.stats().measurements, 5);
        assert_eq!(scanner.stats().bytes, bytes.len() as u64);
    }

    #[test]
    fn test_byte_at_a_time_matches_bulk() {
        let mut bytes = frame_legacy(&LegacyRecord::default());
        bytes.extend(frame_schema(&flight_schema()));
        bytes.extend(measurement(1));

        let bulk = Scanner::new().scan_all(&bytes);
        let mut scanner = Scanner::new();
        let mut fed = Vec::new();
        for byte in &bytes {
            scanner.push(std::slice::from_ref(byte));
            fed.extend(std::iter::from_fn(|| scanner.next_record()));
        }
        scanner.finish();
        assert!(scanner.next_record().is_none());
        assert_eq!(fed, bulk);
    }

    #[test]
    fn test_measurement_without_schema_dropped() {
        let mut bytes = measurement(0);
        bytes.extend(frame_legacy(&LegacyRecord::default()));
        let mut scanner = Scanner::new();
        let records = scanner.scan_all(&bytes);

        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], Record::Legacy(_)));
        assert_eq!(scanner.stats().schema_missing, 1);
    }

    #[test]
    fn test_resync_over_garbage() {
        let mut rng = XorShift::new(42);
        let mut bytes = frame_schema(&flight_schema());
        let n = 50u32;
        for step in 0..n {
            for _ in 0..rng.below(8) {
                let mut junk = rng.byte();
                while junk == b'A' {
                    junk = rng.byte();
                }
                bytes.push(junk);
            }
            bytes.extend(measurement(step));
        }
        let mut scanner = Scanner::new();
        let samples: Vec<Record> = scanner
            .scan_all(&bytes)
            .into_iter()
            .filter(Record::is_sample)
            .collect();

        assert_eq!(samples.len(), n as usize);
        for (step, record) in samples.iter().enumerate() {
            assert_eq!(sample_values(record), flight_values(step as u32));
        }
    }

    #[test]
    fn test_corrupt_record_dropped_and_next_recovered() {
        let mut bytes = frame_schema(&flight_schema());
        let start = bytes.len();
        bytes.extend(measurement(0));
        bytes.extend(measurement(1));
        bytes.extend(measurement(2));
        // break the checksum of the first measurement
        bytes[start + FRAME_HEADER_LEN] ^= 0x01;

        let mut scanner = Scanner::new();
        let samples: Vec<Record> = scanner
            .scan_all(&bytes)
            .into_iter()
            .filter(Record::is_sample)
            .collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(sample_values(&samples[0]), flight_values(1));
        assert_eq!(scanner.stats().checksum_errors, 1);
    }

    #[test]
    fn test_marker_inside_corrupt_record_is_found() {
        let schema = flight_schema();
        let mut bytes = frame_schema(&schema);
        // a record cut short by a restart: marker, kind and 4 payload bytes
        bytes.extend_from_slice(&measurement(0)[..FRAME_HEADER_LEN + 4]);
        bytes.extend(measurement(7));
        bytes.extend(measurement(8));

        let mut scanner = Scanner::new();
        let samples: Vec<Record> = scanner
            .scan_all(&bytes)
            .into_iter()
            .filter(Record::is_sample)
            .collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(sample_values(&samples[0]), flight_values(7));
        assert_eq!(sample_values(&samples[1]), flight_values(8));
        assert_eq!(scanner.stats().checksum_errors, 1);
    }

    #[test]
    fn test_unknown_kind_rescans_tag() {
        let mut bytes = b"AqAq".to_vec();
        bytes.extend(&frame_legacy(&LegacyRecord::default())[2..]);
        let mut scanner = Scanner::new();
        let records = scanner.scan_all(&bytes);
        assert_eq!(records.len(), 1);
        assert_eq!(scanner.stats().unknown_kinds, 1);
    }

    #[test]
    fn test_truncated_tail_keeps_earlier_records() {
        let mut bytes = frame_schema(&flight_schema());
        bytes.extend(measurement(0));
        bytes.extend(measurement(1));
        let full = measurement(2);
        bytes.extend_from_slice(&full[..full.len() - 3]);

        let mut scanner = Scanner::new();
        let samples: Vec<Record> = scanner
            .scan_all(&bytes)
            .into_iter()
            .filter(Record::is_sample)
            .collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(scanner.stats().truncated_bytes, (full.len() - 3) as u64);
        assert_eq!(scanner.state(), ScanState::SeekMarker1);
    }

    #[test]
    fn test_schema_change_applies_to_following_records() {
        let wide = flight_schema();
        let narrow = Schema::new(vec![
            FieldDescriptor::new(FieldId::LAST_UPDATE, FieldType::U32),
            FieldDescriptor::new(FieldId::VOLTAGE0, FieldType::F32),
        ])
        .unwrap();
        let mut bytes = frame_schema(&wide);
        bytes.extend(measurement(3));
        bytes.extend(frame_schema(&narrow));
        bytes.extend(frame_measurement(&narrow, &[Value::U32(9), Value::F32(11.1)]).unwrap());

        let mut scanner = Scanner::new();
        let records = scanner.scan_all(&bytes);
        assert_eq!(records.len(), 4);
        assert_eq!(sample_values(&records[1]), flight_values(3));
        assert_eq!(
            sample_values(&records[3]),
            vec![Value::U32(9), Value::F32(11.1)]
        );
        assert_eq!(scanner.schema(), Some(&narrow));
    }

    #[test]
    fn test_empty_schema_clears_active_schema() {
        let mut bytes = frame_schema(&flight_schema());
        bytes.extend(frame_schema(&Schema::default()));
        bytes.extend(measurement(0));

        let mut scanner = Scanner::new();
        let records = scanner.scan_all(&bytes);
        assert_eq!(records.len(), 2);
        assert!(scanner.schema().is_none());
        assert_eq!(scanner.stats().schema_missing, 1);
    }

    #[test]
    fn test_record_len() {
        let scanner = Scanner::new();
        assert_eq!(scanner.record_len(), 3 + 144 + 2);
        let scanner = Scanner::with_schema(Some(flight_schema()));
        assert_eq!(scanner.record_len(), 3 + flight_schema().byte_len() + 2);
        assert_eq!(scanner.record_len(), measurement(0).len());
    }

    #[test]
    fn test_with_schema_decodes_leading_measurements() {
        let bytes = measurement(4);
        let mut scanner = Scanner::with_schema(Some(flight_schema()));
        let records = scanner.scan_all(&bytes);
        assert_eq!(records.len(), 1);
        assert_eq!(sample_values(&records[0]), flight_values(4));
    }

    #[test]
    fn test_stats_totals() {
        let stats = ScanStats {
            legacy: 2,
            measurements: 3,
            checksum_errors: 1,
            schema_missing: 4,
            ..ScanStats::default()
        };
        assert_eq!(stats.samples(), 5);
        assert_eq!(stats.dropped(), 5);
    }
}
