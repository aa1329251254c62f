// Keccak-256 binary Merkle root over a sorted key/value state.

use std::collections::BTreeMap;

use sha3::{Digest, Keccak256};

use crate::version::{Version, GENESIS};

fn leaf_hash(key: &[u8], value: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update((key.len() as u32).to_le_bytes());
    hasher.update(key);
    hasher.update((value.len() as u32).to_le_bytes());
    hasher.update(value);
    hasher.finalize().into()
}

fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Root of `state`. The empty state hashes to `GENESIS`.
///
/// An odd node at any level is promoted unchanged to the next level.
pub fn state_root(state: &BTreeMap<Vec<u8>, Vec<u8>>) -> Version {
    if state.is_empty() {
        return GENESIS;
    }

    let mut level: Vec<[u8; 32]> = state.iter().map(|(k, v)| leaf_hash(k, v)).collect();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => node_hash(left, right),
                _ => pair[0],
            })
            .collect();
    }
    Version(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(pairs: &[(&[u8], &[u8])]) -> BTreeMap<Vec<u8>, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect()
    }

    #[test]
    fn empty_state_is_genesis() {
        assert_eq!(state_root(&BTreeMap::new()), GENESIS);
    }

    #[test]
    fn root_depends_on_content_not_insert_order() {
        let a = state(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let b = state(&[(b"c", b"3"), (b"a", b"1"), (b"b", b"2")]);
        assert_eq!(state_root(&a), state_root(&b));

        let changed = state(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"4")]);
        assert_ne!(state_root(&a), state_root(&changed));
    }

    #[test]
    fn key_value_boundary_is_unambiguous() {
        let a = state(&[(b"ab", b"c")]);
        let b = state(&[(b"a", b"bc")]);
        assert_ne!(state_root(&a), state_root(&b));
    }
}
