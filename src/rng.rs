//! Seeded xorshift32 generator.
//!
//! The generator is an explicit value threaded through each call that needs
//! randomness; nothing is global. The same seed always yields the same
//! stream on every platform: the core step is integer-only, and the unit
//! draw goes through an exact `mod 1_000_000` before the single division.

/// Xorshift32 state (`x ^= x << 13; x ^= x >> 17; x ^= x << 5`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    /// A zero seed stays zero forever, so every draw returns `min`.
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform value in `[0, 1)` with a resolution of one millionth.
    pub fn next_unit(&mut self) -> f64 {
        (self.next_u32() % 1_000_000) as f64 / 1_000_000.0
    }

    /// Uniform value in `[min, max)`.
    pub fn range(&mut self, min: f64, max: f64) -> f64 {
        min + (max - min) * self.next_unit()
    }
}
