//! A single retained buffer

/// Byte written to every position of a new slab.
///
/// Must be non-zero: a zero fill lets the allocator hand out untouched
/// zero pages that never count against the resident set.
pub const SENTINEL: u8 = 0xff;

/// Owned, contiguous byte buffer held by the [`SlabStore`](super::SlabStore)
#[derive(Clone, PartialEq, Eq)]
pub struct Slab {
    bytes: Box<[u8]>,
}

impl Slab {
    /// Allocate a slab of exactly `len` bytes, each set to [`SENTINEL`]
    pub fn filled(len: usize) -> Self {
        Self {
            bytes: vec![SENTINEL; len].into_boxed_slice(),
        }
    }

    /// Wrap existing content
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }

    /// Copy everything after the first `skip` bytes into a new slab.
    ///
    /// Panics if `skip > self.len()`.
    pub fn tail(&self, skip: usize) -> Self {
        Self {
            bytes: self.bytes[skip..].to_vec().into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for Slab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slab").field("len", &self.bytes.len()).finish()
    }
}
