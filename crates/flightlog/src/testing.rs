//! Shared helpers for unit tests.

use crate::codec::{FieldDescriptor, FieldId, FieldType, Schema, Value};

/// Deterministic xorshift generator for randomized tests.
pub(crate) struct XorShift(u64);

impl XorShift {
    pub(crate) fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub(crate) fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }

    pub(crate) fn byte(&mut self) -> u8 {
        (self.next_u64() & 0xFF) as u8
    }
}

/// A small attitude-and-motors schema.
pub(crate) fn flight_schema() -> Schema {
    Schema::new(vec![
        FieldDescriptor::new(FieldId::LAST_UPDATE, FieldType::U32),
        FieldDescriptor::new(FieldId::QUAT0, FieldType::F32),
        FieldDescriptor::new(FieldId(FieldId::QUAT0.0 + 1), FieldType::F32),
        FieldDescriptor::new(FieldId::MOTOR0, FieldType::U16),
        FieldDescriptor::new(FieldId::RADIO_CHANNEL0, FieldType::S16),
    ])
    .unwrap()
}

/// Values for [`flight_schema`], distinct per `step`.
pub(crate) fn flight_values(step: u32) -> Vec<Value> {
    vec![
        Value::U32(1_000 + step),
        Value::F32(0.5),
        Value::F32(-0.25),
        Value::U16(1_100 + (step % 500) as u16),
        Value::S16(-(step as i16 % 300)),
    ]
}
