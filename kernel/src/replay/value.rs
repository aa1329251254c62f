// Write values: an 8-byte big-endian write counter followed by random
// filler. Reads never interpret the prefix.

use rand::RngCore;

pub const VALUE_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct ValueGenerator {
    filler: usize,
    counter: u64,
}

impl ValueGenerator {
    /// `filler` random bytes follow the counter prefix.
    pub fn new(filler: usize) -> Self {
        Self { filler, counter: 0 }
    }

    pub fn next_value<R: RngCore + ?Sized>(&mut self, rng: &mut R) -> Vec<u8> {
        let mut value = vec![0u8; VALUE_PREFIX_LEN + self.filler];
        value[..VALUE_PREFIX_LEN].copy_from_slice(&self.counter.to_be_bytes());
        rng.fill_bytes(&mut value[VALUE_PREFIX_LEN..]);
        self.counter += 1;
        value
    }
}
