//! Field descriptors and the runtime schema that orders them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::CodecError;

/// Wire type of a logged value.
///
/// The discriminant is the code written into schema records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum FieldType {
    /// IEEE754 binary64.
    F64 = 0,
    /// IEEE754 binary32.
    F32 = 1,
    /// Unsigned 32-bit integer.
    U32 = 2,
    /// Signed 32-bit integer.
    S32 = 3,
    /// Unsigned 16-bit integer.
    U16 = 4,
    /// Signed 16-bit integer.
    S16 = 5,
    /// Unsigned 8-bit integer.
    U8 = 6,
    /// Signed 8-bit integer.
    S8 = 7,
}

impl FieldType {
    /// Number of bytes a value of this type occupies on the wire.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::F64 => 8,
            Self::F32 | Self::U32 | Self::S32 => 4,
            Self::U16 | Self::S16 => 2,
            Self::U8 | Self::S8 => 1,
        }
    }

    /// Code written into a schema record.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Parse a schema record type code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::F64),
            1 => Some(Self::F32),
            2 => Some(Self::U32),
            3 => Some(Self::S32),
            4 => Some(Self::U16),
            5 => Some(Self::S16),
            6 => Some(Self::U8),
            7 => Some(Self::S8),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F64 => "f64",
            Self::F32 => "f32",
            Self::U32 => "u32",
            Self::S32 => "s32",
            Self::U16 => "u16",
            Self::S16 => "s16",
            Self::U8 => "u8",
            Self::S8 => "s8",
        };
        f.write_str(name)
    }
}

/// Identity of a logged value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FieldId(pub u8);

impl FieldId {
    /// Timestamp of the last sensor update, in microseconds.
    pub const LAST_UPDATE: Self = Self(0);
    /// First battery cell voltage.
    pub const VOLTAGE0: Self = Self(1);
    /// First attitude quaternion component.
    pub const QUAT0: Self = Self(16);
    /// First motor output.
    pub const MOTOR0: Self = Self(20);
    /// First radio channel.
    pub const RADIO_CHANNEL0: Self = Self(34);
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Contiguous runs of field ids that belong together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldGroup {
    /// Battery cell voltages (15).
    Voltages,
    /// Attitude quaternion (4).
    Quaternion,
    /// Motor outputs (14).
    Motors,
    /// Radio channels (18).
    RadioChannels,
}

impl FieldGroup {
    /// First id of the group.
    #[must_use]
    pub const fn base(self) -> FieldId {
        match self {
            Self::Voltages => FieldId::VOLTAGE0,
            Self::Quaternion => FieldId::QUAT0,
            Self::Motors => FieldId::MOTOR0,
            Self::RadioChannels => FieldId::RADIO_CHANNEL0,
        }
    }

    /// Number of ids in the group.
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::Voltages => 15,
            Self::Quaternion => 4,
            Self::Motors => 14,
            Self::RadioChannels => 18,
        }
    }

    /// Position of `id` within the group, if it belongs to it.
    #[must_use]
    pub fn index_of(self, id: FieldId) -> Option<usize> {
        let offset = usize::from(id.0.checked_sub(self.base().0)?);
        (offset < self.len()).then_some(offset)
    }
}

/// One `(fieldId, fieldType)` pair of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Which value this is.
    pub id: FieldId,
    /// How it is encoded.
    pub field_type: FieldType,
}

impl FieldDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub const fn new(id: FieldId, field_type: FieldType) -> Self {
        Self { id, field_type }
    }
}

/// Ordered field list governing every measurement until superseded.
///
/// Ids are unique and the list holds at most 255 descriptors (the count is
/// a single byte on the wire). An empty schema is valid; publishing it
/// clears the active schema.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Schema {
    fields: Vec<FieldDescriptor>,
    #[serde(skip)]
    byte_len: usize,
}

impl Schema {
    /// Largest number of fields a schema record can carry.
    pub const MAX_FIELDS: usize = u8::MAX as usize;

    /// Build a schema, rejecting duplicate ids and oversized field lists.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::DuplicateField`] or [`CodecError::TooManyFields`].
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self, CodecError> {
        if fields.len() > Self::MAX_FIELDS {
            return Err(CodecError::TooManyFields {
                count: fields.len(),
            });
        }
        let mut seen = [false; 256];
        for field in &fields {
            let slot = &mut seen[usize::from(field.id.0)];
            if *slot {
                return Err(CodecError::DuplicateField { id: field.id });
            }
            *slot = true;
        }
        let byte_len = fields.iter().map(|f| f.field_type.width()).sum();
        Ok(Self { fields, byte_len })
    }

    /// The field list in decode order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sum of the field widths: the measurement payload size.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Position of `id` in the field list.
    #[must_use]
    pub fn position(&self, id: FieldId) -> Option<usize> {
        self.fields.iter().position(|f| f.id == id)
    }
}
