use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// 32-byte SHA3-256 digest identifying blocks and transactions.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn compute_from(bytes: impl AsRef<[u8]>) -> Self {
        Self(Sha3_256::digest(bytes.as_ref()).into())
    }

    /// Hashes the bincode encoding of `value`.
    pub fn compute_from_encoded<T: Serialize + ?Sized>(value: &T) -> Self {
        // Encoding into a Vec only fails for types that cannot be represented by bincode, which none of ours are.
        let encoded = bincode::serialize(value).expect("Encoding chain primitive");
        Self::compute_from(encoded)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            // Short form for logs.
            write!(f, "{}..", hex::encode(&self.0[..4]))
        } else {
            write!(f, "{}", hex::encode(self.0))
        }
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({:#})", self)
    }
}

impl From<[u8; 32]> for Hash {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_from_is_deterministic() {
        assert_eq!(Hash::compute_from("block"), Hash::compute_from("block"));
        assert_ne!(Hash::compute_from("block"), Hash::compute_from("other"));
        assert_ne!(Hash::compute_from("block"), Hash::ZERO);
    }

    #[test]
    fn display() {
        let hash = Hash([0xab; 32]);
        assert_eq!(format!("{hash}"), "ab".repeat(32));
        assert_eq!(format!("{hash:#}"), "abababab..");
    }
}
