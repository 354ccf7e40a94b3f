//! Self-describing binary record format.
//!
//! A log is a byte stream of framed records:
//!
//! ```text
//! 'A' 'q' <kind> <body>
//!
//! L: <legacy struct, 144 bytes> <ckA> <ckB>
//! H: <count> <count x (fieldId, fieldType)> <ckA> <ckB>     checksum seeded with count
//! M: <values in schema order> <ckA> <ckB>                    checksum over the values only
//! ```
//!
//! All integers and floats are little-endian. The checksum never covers the
//! marker or the kind byte.

pub mod checksum;
pub mod field;
pub mod record;
pub mod value;

use thiserror::Error;

pub use checksum::{checksum, Checksum};
pub use field::{FieldDescriptor, FieldGroup, FieldId, FieldType, Schema};
pub use record::{FieldValue, LegacyRecord, Record, RecordKind, Sample, LEGACY_BODY_LEN};
pub use value::Value;

/// Two-byte synchronization marker that opens every record.
pub const SYNC_MARKER: [u8; 2] = *b"Aq";

/// Length of the trailing checksum.
pub const CHECKSUM_LEN: usize = 2;

/// Length of one serialized field descriptor.
pub const DESCRIPTOR_LEN: usize = 2;

/// Length of marker plus kind byte.
pub const FRAME_HEADER_LEN: usize = SYNC_MARKER.len() + 1;

/// Errors raised while encoding or decoding a single record.
///
/// None of these are fatal to a scan; the reader drops the record and
/// resynchronizes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The trailing checksum does not match the body.
    #[error("checksum mismatch in '{kind}' record")]
    ChecksumMismatch {
        /// Kind of the corrupted record.
        kind: RecordKind,
    },

    /// A measurement arrived while no schema was active.
    #[error("measurement record without an active schema")]
    SchemaMissing,

    /// Fewer bytes than the record needs.
    #[error("truncated '{kind}' record: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Kind of the record.
        kind: RecordKind,
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// A schema descriptor carries an unknown type code.
    #[error("unknown field type code {0}")]
    UnknownFieldType(u8),

    /// A schema lists the same field twice.
    #[error("duplicate field {id} in schema")]
    DuplicateField {
        /// The repeated id.
        id: FieldId,
    },

    /// A schema holds more fields than a count byte can express.
    #[error("schema has {count} fields, at most 255 are allowed")]
    TooManyFields {
        /// Number of fields supplied.
        count: usize,
    },

    /// Values handed to the encoder do not line up with the schema.
    #[error("value {index} does not match schema: expected {expected}, got {actual}")]
    ValueMismatch {
        /// Position of the offending value (or the count when lengths differ).
        index: usize,
        /// What the schema wants.
        expected: String,
        /// What was supplied.
        actual: String,
    },
}

/// Encode a legacy record body followed by its checksum (seed 0).
#[must_use]
pub fn encode_legacy(record: &LegacyRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEGACY_BODY_LEN + CHECKSUM_LEN);
    record.write_body(&mut out);
    let ck = checksum(0, &out);
    out.extend_from_slice(&ck);
    out
}

/// Encode a schema: count byte, descriptors, checksum seeded with the count.
#[must_use]
pub fn encode_schema(schema: &Schema) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + schema.len() * DESCRIPTOR_LEN + CHECKSUM_LEN);
    // Schema::new caps the field count at 255.
    let count = u8::try_from(schema.len()).unwrap_or(u8::MAX);
    out.push(count);
    for field in schema.fields() {
        out.push(field.id.0);
        out.push(field.field_type.code());
    }
    let ck = checksum(count, &out[1..]);
    out.extend_from_slice(&ck);
    out
}

/// Encode measurement values in schema order.
///
/// The result carries no checksum; [`frame`] appends it.
///
/// # Errors
///
/// Returns [`CodecError::ValueMismatch`] when the number or the types of
/// `values` differ from the schema.
pub fn encode_measurement(schema: &Schema, values: &[Value]) -> Result<Vec<u8>, CodecError> {
    if values.len() != schema.len() {
        return Err(CodecError::ValueMismatch {
            index: values.len(),
            expected: format!("{} values", schema.len()),
            actual: format!("{} values", values.len()),
        });
    }
    let mut out = Vec::with_capacity(schema.byte_len());
    for (index, (field, value)) in schema.fields().iter().zip(values).enumerate() {
        if value.field_type() != field.field_type {
            return Err(CodecError::ValueMismatch {
                index,
                expected: field.field_type.to_string(),
                actual: value.field_type().to_string(),
            });
        }
        value.write_le(&mut out);
    }
    Ok(out)
}

/// Wrap an encoded body into a complete frame.
///
/// Legacy and schema bodies already end in their checksum. A measurement
/// body does not, so the checksum over its payload is appended here.
#[must_use]
pub fn frame(kind: RecordKind, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len() + CHECKSUM_LEN);
    out.extend_from_slice(&SYNC_MARKER);
    out.push(kind.tag());
    out.extend_from_slice(body);
    if kind == RecordKind::Measurement {
        out.extend_from_slice(&checksum(0, body));
    }
    out
}

/// Encode and frame a legacy record.
#[must_use]
pub fn frame_legacy(record: &LegacyRecord) -> Vec<u8> {
    frame(RecordKind::Legacy, &encode_legacy(record))
}

/// Encode and frame a schema.
#[must_use]
pub fn frame_schema(schema: &Schema) -> Vec<u8> {
    frame(RecordKind::Schema, &encode_schema(schema))
}

/// Encode and frame a measurement.
///
/// # Errors
///
/// See [`encode_measurement`].
pub fn frame_measurement(schema: &Schema, values: &[Value]) -> Result<Vec<u8>, CodecError> {
    Ok(frame(
        RecordKind::Measurement,
        &encode_measurement(schema, values)?,
    ))
}

/// Decode the bytes that follow a kind tag.
///
/// `bytes` must start right after the kind byte; trailing bytes beyond the
/// record are ignored. A measurement is decoded against `schema`, which must
/// be the schema active at that point of the stream.
///
/// A measurement decoded against the wrong schema is only detected when the
/// byte widths differ. Two schemas with the same total width decode each
/// other's records into well-typed but meaningless values; the format carries
/// no schema version to tell them apart.
///
/// # Errors
///
/// [`CodecError::Truncated`] when `bytes` is too short,
/// [`CodecError::ChecksumMismatch`] when the trailer is wrong,
/// [`CodecError::SchemaMissing`] for a measurement with no active schema, and
/// descriptor errors for malformed schema records.
pub fn decode(
    kind: RecordKind,
    schema: Option<&Schema>,
    bytes: &[u8],
) -> Result<Record, CodecError> {
    match kind {
        RecordKind::Legacy => decode_legacy(bytes).map(Record::Legacy),
        RecordKind::Schema => decode_schema(bytes).map(Record::Schema),
        RecordKind::Measurement => {
            let schema = schema
                .filter(|s| !s.is_empty())
                .ok_or(CodecError::SchemaMissing)?;
            decode_measurement(schema, bytes).map(Record::Measurement)
        }
    }
}

/// Total body length (including checksum) of a schema record with `count`
/// descriptors.
#[must_use]
pub const fn schema_body_len(count: u8) -> usize {
    1 + count as usize * DESCRIPTOR_LEN + CHECKSUM_LEN
}

fn take(kind: RecordKind, bytes: &[u8], expected: usize) -> Result<&[u8], CodecError> {
    bytes.get(..expected).ok_or(CodecError::Truncated {
        kind,
        expected,
        actual: bytes.len(),
    })
}

fn decode_legacy(bytes: &[u8]) -> Result<LegacyRecord, CodecError> {
    let record = take(RecordKind::Legacy, bytes, LEGACY_BODY_LEN + CHECKSUM_LEN)?;
    let (body, trailer) = record.split_at(LEGACY_BODY_LEN);
    let mut ck = Checksum::seeded(0);
    ck.update(body);
    if !ck.matches(trailer) {
        return Err(CodecError::ChecksumMismatch {
            kind: RecordKind::Legacy,
        });
    }
    Ok(LegacyRecord::read_body(body))
}

fn decode_schema(bytes: &[u8]) -> Result<Schema, CodecError> {
    let count = *bytes.first().ok_or(CodecError::Truncated {
        kind: RecordKind::Schema,
        expected: 1,
        actual: 0,
    })?;
    let record = take(RecordKind::Schema, bytes, schema_body_len(count))?;
    let (descriptors, trailer) = record[1..].split_at(usize::from(count) * DESCRIPTOR_LEN);
    let mut ck = Checksum::seeded(count);
    ck.update(descriptors);
    if !ck.matches(trailer) {
        return Err(CodecError::ChecksumMismatch {
            kind: RecordKind::Schema,
        });
    }
    let fields = descriptors
        .chunks_exact(DESCRIPTOR_LEN)
        .map(|pair| {
            FieldType::from_code(pair[1])
                .map(|ty| FieldDescriptor::new(FieldId(pair[0]), ty))
                .ok_or(CodecError::UnknownFieldType(pair[1]))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Schema::new(fields)
}

fn decode_measurement(schema: &Schema, bytes: &[u8]) -> Result<Sample, CodecError> {
    let record = take(
        RecordKind::Measurement,
        bytes,
        schema.byte_len() + CHECKSUM_LEN,
    )?;
    let (payload, trailer) = record.split_at(schema.byte_len());
    let mut ck = Checksum::seeded(0);
    ck.update(payload);
    if !ck.matches(trailer) {
        return Err(CodecError::ChecksumMismatch {
            kind: RecordKind::Measurement,
        });
    }
    let mut at = 0;
    let values: Vec<Value> = schema
        .fields()
        .iter()
        .map(|field| {
            let value = Value::read_le(field.field_type, &payload[at..]);
            at += field.field_type.width();
            value
        })
        .collect();
    Ok(Sample::from_schema(schema, &values))
}
