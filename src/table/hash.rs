//! Salted bucket hashing for hardware addresses.
//!
//! The bucket of an address is derived from its last four bytes mixed with a
//! salt drawn once per table, so bucket placement cannot be predicted from
//! outside the process.

use ring::rand::{SecureRandom, SystemRandom};

use crate::error::TermError;

use super::mac::MacAddr;

/// Number of hash buckets. Must stay a power of two.
pub const BUCKET_COUNT: usize = 1 << 8;

const JHASH_INITVAL: u32 = 0xdead_beef;

/// Per-table random hash salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashSalt(u32);

impl HashSalt {
    /// Draw a salt from the system CSPRNG.
    pub fn random() -> Result<Self, TermError> {
        let mut buf = [0u8; 4];
        SystemRandom::new()
            .fill(&mut buf)
            .map_err(|_| TermError::Config {
                message: "Failed to generate hash salt".to_string(),
            })?;
        Ok(Self(u32::from_ne_bytes(buf)))
    }

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Bucket index of `mac` under this salt.
    pub fn bucket_of(&self, mac: &MacAddr) -> usize {
        (jhash_1word(mac.hash_key(), self.0) as usize) & (BUCKET_COUNT - 1)
    }
}

/// Bob Jenkins' lookup3 final mix over a single word.
fn jhash_1word(word: u32, initval: u32) -> u32 {
    let seed = initval
        .wrapping_add(JHASH_INITVAL)
        .wrapping_add(1 << 2);
    let mut a = word.wrapping_add(seed);
    let mut b = seed;
    let mut c = seed;

    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(24));

    c
}
