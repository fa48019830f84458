use lumen_primitives::types::{
	Locksroot,
	H256,
};

use crate::machine::mtree::{
	verify_proof,
	LockTree,
};

fn leaf(seed: u8) -> (H256, H256) {
	(H256::repeat_byte(seed), H256::repeat_byte(seed.wrapping_add(0x80)))
}

#[test]
fn test_empty_tree_has_zero_root() {
	let tree = LockTree::default();
	assert!(tree.is_empty());
	assert_eq!(tree.root(), Locksroot::zero());
}

#[test]
fn test_single_leaf_root_is_leaf_hash() {
	let (secrethash, leaf_hash) = leaf(1);
	let tree = LockTree::default().add(secrethash, leaf_hash).expect("Not a duplicate");
	assert_eq!(tree.root(), leaf_hash);
	assert_eq!(tree.position_of(secrethash), Some(0));
}

#[test]
fn test_add_rejects_duplicate_secrethash() {
	let (secrethash, leaf_hash) = leaf(1);
	let tree = LockTree::default().add(secrethash, leaf_hash).expect("Not a duplicate");
	assert!(tree.add(secrethash, leaf_hash).is_none());
}

#[test]
fn test_add_is_persistent() {
	let (secrethash1, leaf_hash1) = leaf(1);
	let (secrethash2, leaf_hash2) = leaf(2);
	let tree1 = LockTree::default().add(secrethash1, leaf_hash1).expect("Not a duplicate");
	let root_before = tree1.root();

	let tree2 = tree1.add(secrethash2, leaf_hash2).expect("Not a duplicate");
	assert_eq!(tree1.root(), root_before);
	assert_ne!(tree2.root(), root_before);
	assert_eq!(tree1.len(), 1);
	assert_eq!(tree2.len(), 2);
}

#[test]
fn test_compute_with_matches_add() {
	let (secrethash1, leaf_hash1) = leaf(1);
	let (secrethash2, leaf_hash2) = leaf(2);
	let tree = LockTree::default().add(secrethash1, leaf_hash1).expect("Not a duplicate");

	let hypothetical = tree
		.compute_root_with(secrethash2, leaf_hash2)
		.expect("Not a duplicate");
	let actual = tree.add(secrethash2, leaf_hash2).expect("Not a duplicate").root();
	assert_eq!(hypothetical, actual);
	assert_eq!(tree.len(), 1);
}

#[test]
fn test_remove_returns_valid_proof() {
	let leaves: Vec<_> = (1..=5).map(leaf).collect();
	let mut tree = LockTree::default();
	for (secrethash, leaf_hash) in &leaves {
		tree = tree.add(*secrethash, *leaf_hash).expect("Not a duplicate");
	}
	let root = tree.root();

	let (secrethash, leaf_hash) = leaves[2];
	let (without, proof) = tree.remove(secrethash).expect("Leaf exists");
	assert!(verify_proof(root, leaf_hash, &proof));
	assert_eq!(without.len(), 4);
	assert!(without.position_of(secrethash).is_none());
	assert_eq!(
		without.root(),
		tree.compute_root_without(secrethash).expect("Leaf exists")
	);
}

#[test]
fn test_every_leaf_proof_verifies() {
	let leaves: Vec<_> = (1..=7).map(leaf).collect();
	let mut tree = LockTree::default();
	for (secrethash, leaf_hash) in &leaves {
		tree = tree.add(*secrethash, *leaf_hash).expect("Not a duplicate");
	}
	let root = tree.root();

	for (secrethash, leaf_hash) in &leaves {
		let proof = tree.proof(*secrethash).expect("Leaf exists");
		assert!(verify_proof(root, *leaf_hash, &proof));
	}
}

#[test]
fn test_insertion_order_affects_root() {
	let (secrethash1, leaf_hash1) = leaf(1);
	let (secrethash2, leaf_hash2) = leaf(2);
	let (secrethash3, leaf_hash3) = leaf(3);

	let forward = LockTree::default()
		.add(secrethash1, leaf_hash1)
		.and_then(|tree| tree.add(secrethash2, leaf_hash2))
		.and_then(|tree| tree.add(secrethash3, leaf_hash3))
		.expect("Not duplicates");
	let backward = LockTree::default()
		.add(secrethash3, leaf_hash3)
		.and_then(|tree| tree.add(secrethash2, leaf_hash2))
		.and_then(|tree| tree.add(secrethash1, leaf_hash1))
		.expect("Not duplicates");

	assert_eq!(forward.len(), backward.len());
	assert_ne!(forward.root(), backward.root());
}
