//! Merkle root construction over transaction ids.
//!
//! Levels are flat `Vec<Hash256>`s, not a retained tree: there is no node
//! object whose children alias each other, so the odd-node-duplication case
//! (the last node of an odd level pairs with itself) never creates a
//! double-free or double-drop hazard — it is just read twice while building
//! the next level.

use shared::Hash256;

/// Computes the Merkle root of `leaves`. Panics if `leaves` is empty — the
/// caller (block validation) guarantees at least one transaction (the
/// coinbase) before this is ever called.
#[must_use]
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    assert!(!leaves.is_empty(), "merkle_root requires at least one leaf");

    if leaves.len() == 1 {
        return leaves[0];
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = pair.get(1).copied().unwrap_or(left);
            let mut buf = Vec::with_capacity(64);
            buf.extend_from_slice(left.as_bytes());
            buf.extend_from_slice(right.as_bytes());
            next.push(Hash256::sha256d(&buf));
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> Hash256 {
        Hash256::from_bytes([byte; 32])
    }

    #[test]
    fn single_leaf_is_its_own_root_no_self_hashing() {
        let leaves = vec![leaf(1)];
        assert_eq!(merkle_root(&leaves), leaves[0]);
    }

    #[test]
    fn two_leaves_hash_together() {
        let leaves = vec![leaf(1), leaf(2)];
        let root = merkle_root(&leaves);
        assert_ne!(root, leaves[0]);
        assert_ne!(root, leaves[1]);
    }

    #[test]
    fn odd_count_duplicates_last_leaf() {
        let three = vec![leaf(1), leaf(2), leaf(3)];
        // Manually replicate the expected pairing: (1,2) -> p, (3,3) -> q, root = h(p,q)
        let p = {
            let mut buf = Vec::new();
            buf.extend_from_slice(leaf(1).as_bytes());
            buf.extend_from_slice(leaf(2).as_bytes());
            Hash256::sha256d(&buf)
        };
        let q = {
            let mut buf = Vec::new();
            buf.extend_from_slice(leaf(3).as_bytes());
            buf.extend_from_slice(leaf(3).as_bytes());
            Hash256::sha256d(&buf)
        };
        let expected = {
            let mut buf = Vec::new();
            buf.extend_from_slice(p.as_bytes());
            buf.extend_from_slice(q.as_bytes());
            Hash256::sha256d(&buf)
        };
        assert_eq!(merkle_root(&three), expected);
    }

    #[test]
    fn root_is_deterministic() {
        let leaves = vec![leaf(1), leaf(2), leaf(3), leaf(4)];
        assert_eq!(merkle_root(&leaves), merkle_root(&leaves));
    }

    #[test]
    fn order_matters() {
        let a = vec![leaf(1), leaf(2)];
        let b = vec![leaf(2), leaf(1)];
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }
}
