//! Two-accumulator additive checksum carried by every record.

/// Running checksum state.
///
/// Both accumulators start at the seed; for every byte `a += byte` and then
/// `b += a`, both modulo 256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum {
    a: u8,
    b: u8,
}

impl Checksum {
    /// Start a checksum with both accumulators set to `seed`.
    #[must_use]
    pub const fn seeded(seed: u8) -> Self {
        Self { a: seed, b: seed }
    }

    /// Fold `bytes` into the running state.
    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.a = self.a.wrapping_add(byte);
            self.b = self.b.wrapping_add(self.a);
        }
    }

    /// The two checksum bytes in wire order (`ckA`, `ckB`).
    #[must_use]
    pub const fn bytes(self) -> [u8; 2] {
        [self.a, self.b]
    }

    /// Compare against the two trailing bytes of a record.
    #[must_use]
    pub fn matches(self, trailer: &[u8]) -> bool {
        trailer.len() == 2 && trailer[0] == self.a && trailer[1] == self.b
    }
}

/// Compute the checksum of `bytes` starting from `seed`.
#[must_use]
pub fn checksum(seed: u8, bytes: &[u8]) -> [u8; 2] {
    let mut ck = Checksum::seeded(seed);
    ck.update(bytes);
    ck.bytes()
}
