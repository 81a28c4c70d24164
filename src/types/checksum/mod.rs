#![forbid(unsafe_code)]
//! Checksums guarding stored string values.

/// Incremental 32-bit checksum.
pub trait Checksum {
    /// Clears all input folded so far.
    fn reset(&mut self);
    /// Folds `bytes` into the state.
    fn update(&mut self, bytes: &[u8]);
    /// Checksum of the input so far; the state is left untouched.
    fn finalize(&self) -> u32;
}

/// CRC32 (IEEE) backed by `crc32fast`.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// CRC32 (IEEE) of a stored string value: language byte, compression byte and payload.
pub fn string_crc32(stored: &[u8]) -> u32 {
    let mut c = Crc32Fast::default();
    c.update(stored);
    c.finalize()
}
