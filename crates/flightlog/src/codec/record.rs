//! Record kinds and their decoded forms.

use std::fmt;

use serde::Serialize;

use super::field::{FieldGroup, FieldId, Schema};
use super::value::{array, Value};

/// The one-byte tag that follows the sync marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Fixed-layout record written before schemas existed.
    Legacy,
    /// Field schema publication.
    Schema,
    /// Schema-encoded sample.
    Measurement,
}

impl RecordKind {
    /// The wire tag.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Legacy => b'L',
            Self::Schema => b'H',
            Self::Measurement => b'M',
        }
    }

    /// Parse a wire tag.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'L' => Some(Self::Legacy),
            b'H' => Some(Self::Schema),
            b'M' => Some(Self::Measurement),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = char::from(self.tag());
        write!(f, "{tag}")
    }
}

/// Size of the legacy record body, excluding its checksum.
pub const LEGACY_BODY_LEN: usize = 4 + 15 * 4 + 4 * 4 + 14 * 2 + 18 * 2;

/// Fixed-layout record of pre-schema writers.
///
/// Layout, little-endian: `last_update: u32`, `voltages: [f32; 15]`,
/// `quat: [f32; 4]`, `motors: [u16; 14]`, `radio: [i16; 18]`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LegacyRecord {
    /// Timestamp of the last sensor update, in microseconds.
    pub last_update: u32,
    /// Battery cell voltages.
    pub voltages: [f32; 15],
    /// Attitude quaternion.
    pub quat: [f32; 4],
    /// Motor outputs.
    pub motors: [u16; 14],
    /// Radio channels.
    pub radio: [i16; 18],
}

impl LegacyRecord {
    pub(crate) fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.last_update.to_le_bytes());
        for v in &self.voltages {
            out.extend_from_slice(&v.to_le_bytes());
        }
        for q in &self.quat {
            out.extend_from_slice(&q.to_le_bytes());
        }
        for m in &self.motors {
            out.extend_from_slice(&m.to_le_bytes());
        }
        for r in &self.radio {
            out.extend_from_slice(&r.to_le_bytes());
        }
    }

    /// Parse a body of exactly [`LEGACY_BODY_LEN`] bytes.
    pub(crate) fn read_body(body: &[u8]) -> Self {
        let mut record = Self {
            last_update: u32::from_le_bytes(array(body)),
            ..Self::default()
        };
        let mut at = 4;
        for v in &mut record.voltages {
            *v = f32::from_le_bytes(array(&body[at..]));
            at += 4;
        }
        for q in &mut record.quat {
            *q = f32::from_le_bytes(array(&body[at..]));
            at += 4;
        }
        for m in &mut record.motors {
            *m = u16::from_le_bytes(array(&body[at..]));
            at += 2;
        }
        for r in &mut record.radio {
            *r = i16::from_le_bytes(array(&body[at..]));
            at += 2;
        }
        record
    }
}

/// A value together with the field it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldValue {
    /// Field identity.
    pub id: FieldId,
    /// Decoded value.
    pub value: Value,
}

/// A decoded measurement: one value per schema field, in schema order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Sample {
    fields: Vec<FieldValue>,
}

impl Sample {
    /// Pair `values` with the schema's field ids.
    ///
    /// Extra values beyond the schema length are ignored.
    #[must_use]
    pub fn from_schema(schema: &Schema, values: &[Value]) -> Self {
        let fields = schema
            .fields()
            .iter()
            .zip(values)
            .map(|(desc, value)| FieldValue {
                id: desc.id,
                value: *value,
            })
            .collect();
        Self { fields }
    }

    /// Look up a field by id.
    #[must_use]
    pub fn get(&self, id: FieldId) -> Option<Value> {
        self.fields.iter().find(|f| f.id == id).map(|f| f.value)
    }

    /// All fields in schema order.
    #[must_use]
    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    /// The bare values in schema order.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.fields.iter().map(|f| f.value).collect()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the sample carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Gather the members of a field group, indexed by position in the group.
    ///
    /// Members not present in the schema are `None`.
    #[must_use]
    pub fn group(&self, group: FieldGroup) -> Vec<Option<Value>> {
        let mut out = vec![None; group.len()];
        for field in &self.fields {
            if let Some(idx) = group.index_of(field.id) {
                out[idx] = Some(field.value);
            }
        }
        out
    }
}

/// One framed unit of the log stream, decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    /// Fixed-layout record.
    Legacy(LegacyRecord),
    /// Schema publication; carries no sample data.
    Schema(Schema),
    /// Schema-encoded sample.
    Measurement(Sample),
}

impl Record {
    /// The kind tag of this record.
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::Legacy(_) => RecordKind::Legacy,
            Self::Schema(_) => RecordKind::Schema,
            Self::Measurement(_) => RecordKind::Measurement,
        }
    }

    /// Whether this record yields a sample (legacy or measurement).
    #[must_use]
    pub const fn is_sample(&self) -> bool {
        !matches!(self, Self::Schema(_))
    }
}
