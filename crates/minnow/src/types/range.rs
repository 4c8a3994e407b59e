//! Numeric ranges produced by the `..` operator.

/// An immutable pair of endpoints. Equality is endpoint-wise and the hash is
/// the xor of the endpoint hashes; there are no other operations here.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Range {
    from: f64,
    to: f64,
}

impl Range {
    #[must_use]
    pub fn new(from: f64, to: f64) -> Self {
        Self { from, to }
    }

    #[must_use]
    pub fn from(&self) -> f64 {
        self.from
    }

    #[must_use]
    pub fn to(&self) -> f64 {
        self.to
    }
}
