// Thu Oct 15 2026 - Alex

use std::hash::Hasher;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001b3;

/// 64-bit FNV-1a. Stable across runs and platforms, so digests can be compared
/// between analyses of different binaries.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a64 {
    state: u64,
}

impl Fnv1a64 {
    pub fn new() -> Self {
        Self { state: FNV_OFFSET }
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        for byte in data {
            self.state ^= *byte as u64;
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
        self
    }

    pub fn digest(&self) -> u64 {
        self.state
    }
}

impl Default for Fnv1a64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for Fnv1a64 {
    fn write(&mut self, bytes: &[u8]) {
        self.update(bytes);
    }

    fn finish(&self) -> u64 {
        self.state
    }
}

pub fn fnv1a_64(data: &[u8]) -> u64 {
    Fnv1a64::new().update(data).digest()
}
