#![forbid(unsafe_code)]
//! Fixed-width little-endian accessors and a slice cursor used by the field
//! record codecs.

pub mod le {
    //! Little-endian reads and writes at byte offsets inside a record.

    use core::convert::TryInto;

    /// Writes `v` at `dst[off..off + 4]`.
    #[inline]
    pub fn put_u32(dst: &mut [u8], off: usize, v: u32) {
        dst[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Reads a u32 from `src[off..off + 4]`.
    #[inline]
    pub fn get_u32(src: &[u8], off: usize) -> u32 {
        let bytes: [u8; 4] = src[off..off + 4]
            .try_into()
            .expect("four-byte slice converts");
        u32::from_le_bytes(bytes)
    }
}

pub mod buf {
    //! A simple slice-backed cursor for ergonomic parsing.

    use core::fmt;

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> &'a [u8] {
            let end = self
                .off
                .checked_add(n)
                .expect("cursor offset overflow during take");
            if end > self.buf.len() {
                panic!(
                    "cursor take beyond buffer: need {}, remaining {}",
                    n,
                    self.remaining()
                );
            }
            let slice = &self.buf[self.off..end];
            self.off = end;
            slice
        }

        /// Takes everything except the final `n` bytes.
        pub fn take_until_tail(&mut self, n: usize) -> &'a [u8] {
            let keep = self.remaining().saturating_sub(n);
            self.take(keep)
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
