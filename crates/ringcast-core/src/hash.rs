/// Computes BLAKE3 and returns the first-class 32-byte digest value.
pub fn blake3_32(input: &[u8]) -> [u8; 32] {
    *blake3::hash(input).as_bytes()
}

/// Incremental digest over length-prefixed fields.
///
/// Each field is written as `u32_be(len) || bytes`, so adjacent fields can
/// never be re-split into a colliding preimage.
#[derive(Debug, Clone, Default)]
pub struct FieldHasher {
    inner: blake3::Hasher,
}

impl FieldHasher {
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Self::default();
        hasher.field(domain);
        hasher
    }

    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.inner.update(&len.to_be_bytes());
        self.inner.update(bytes);
        self
    }

    pub fn field_u64(&mut self, value: u64) -> &mut Self {
        self.field(&value.to_be_bytes())
    }

    pub fn finish(&self) -> [u8; 32] {
        *self.inner.finalize().as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::{blake3_32, FieldHasher};

    #[test]
    fn hash_is_deterministic() {
        let input = b"ringcast";
        assert_eq!(blake3_32(input), blake3_32(input));
    }

    #[test]
    fn hash_changes_when_input_changes() {
        assert_ne!(blake3_32(b"ringcast-a"), blake3_32(b"ringcast-b"));
    }

    #[test]
    fn field_boundaries_are_part_of_the_digest() {
        let mut a = FieldHasher::new(b"t");
        a.field(b"ab").field(b"c");
        let mut b = FieldHasher::new(b"t");
        b.field(b"a").field(b"bc");
        assert_ne!(a.finish(), b.finish());
    }
}
