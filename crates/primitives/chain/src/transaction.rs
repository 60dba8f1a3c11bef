use crate::Hash;
use serde::{Deserialize, Serialize};

/// A signed call to a contract method. Signature checking happens before transactions reach the node core, so the
/// signature is not modelled here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub from: String,
    /// Target contract address.
    pub to: String,
    pub ref_block_number: u64,
    pub method_name: String,
    pub params: Vec<u8>,
}

impl Transaction {
    pub fn id(&self) -> Hash {
        Hash::compute_from_encoded(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_depends_on_every_field() {
        let tx = Transaction {
            from: "alice".into(),
            to: "token".into(),
            ref_block_number: 1,
            method_name: "Transfer".into(),
            params: vec![1, 2, 3],
        };
        let mut other = tx.clone();
        assert_eq!(tx.id(), other.id());

        other.params = vec![1, 2, 4];
        assert_ne!(tx.id(), other.id());

        let mut other = tx.clone();
        other.ref_block_number = 2;
        assert_ne!(tx.id(), other.id());
    }
}
