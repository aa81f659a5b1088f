use std::fmt;

/// Hex-encoded BLAKE3 digest of blob content plus its length.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobDigest {
    hex: String,
    length: u64,
}

impl BlobDigest {
    /// Digest of a byte slice.
    pub fn of(data: &[u8]) -> Self {
        Self {
            hex: blob_digest(data),
            length: data.len() as u64,
        }
    }

    /// Lowercase hex form of the hash.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Length of the hashed data in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Two-level fan-out directory, e.g. `ab/cd`.
    pub fn fan_out(&self) -> (&str, &str) {
        (&self.hex[0..2], &self.hex[2..4])
    }

    /// File name prefix shared by every copy of this content.
    pub fn prefix(&self) -> String {
        format!("{}.{}", self.hex, self.length)
    }
}

impl fmt::Display for BlobDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Hex BLAKE3 digest of raw bytes.
pub fn blob_digest(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}
