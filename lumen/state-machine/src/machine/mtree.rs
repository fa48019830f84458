#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::types::{
	Locksroot,
	SecretHash,
	H256,
};
use serde::{
	Deserialize,
	Serialize,
};
use web3::signing::keccak256;

/// Authentication path of one leaf, bottom up. Siblings are combined in
/// sorted order so no direction flags are needed.
pub type MerkleProof = Vec<H256>;

/// One leaf of the lock tree, identified by the lock's secret hash.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct LockLeaf {
	pub secrethash: SecretHash,
	pub leaf_hash: H256,
}

/// Merkle tree over the pending locks of one channel endpoint.
///
/// The tree is persistent: every mutation returns a new tree, so in-flight
/// messages can keep referencing a prior root. Leaves keep insertion order
/// and duplicates (by secret hash) are forbidden.
#[derive(Default, Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct LockTree {
	leaves: Vec<LockLeaf>,
}

/// Parent hash of two sibling nodes. Sorting the pair makes the combine
/// order independent of leaf positions.
fn hash_pair(a: H256, b: H256) -> H256 {
	let (first, second) = if a <= b { (a, b) } else { (b, a) };
	let data = [first.as_bytes(), second.as_bytes()].concat();
	H256::from(keccak256(&data))
}

/// Compute all tree levels bottom up. An odd node is promoted unchanged.
fn compute_layers(leaf_hashes: &[H256]) -> Vec<Vec<H256>> {
	let mut layers = vec![leaf_hashes.to_vec()];
	while layers.last().expect("At least one layer").len() > 1 {
		let current = layers.last().expect("At least one layer");
		let mut next = Vec::with_capacity((current.len() + 1) / 2);
		for pair in current.chunks(2) {
			match pair {
				[a, b] => next.push(hash_pair(*a, *b)),
				[a] => next.push(*a),
				_ => unreachable!(),
			}
		}
		layers.push(next);
	}
	layers
}

impl LockTree {
	pub fn new(leaves: Vec<LockLeaf>) -> Self {
		Self { leaves }
	}

	pub fn len(&self) -> usize {
		self.leaves.len()
	}

	pub fn is_empty(&self) -> bool {
		self.leaves.is_empty()
	}

	pub fn leaves(&self) -> &[LockLeaf] {
		&self.leaves
	}

	/// Root over the current leaves. The empty tree has the zero root.
	pub fn root(&self) -> Locksroot {
		if self.leaves.is_empty() {
			return Locksroot::zero()
		}
		let leaf_hashes: Vec<H256> = self.leaves.iter().map(|leaf| leaf.leaf_hash).collect();
		*compute_layers(&leaf_hashes)
			.last()
			.expect("At least one layer")
			.first()
			.expect("Root layer has one node")
	}

	pub fn position_of(&self, secrethash: SecretHash) -> Option<usize> {
		self.leaves.iter().position(|leaf| leaf.secrethash == secrethash)
	}

	/// New tree with the leaf appended. Returns None if a leaf with the same
	/// secret hash already exists.
	pub fn add(&self, secrethash: SecretHash, leaf_hash: H256) -> Option<LockTree> {
		if self.position_of(secrethash).is_some() {
			return None
		}
		let mut leaves = self.leaves.clone();
		leaves.push(LockLeaf { secrethash, leaf_hash });
		Some(LockTree { leaves })
	}

	/// New tree with the leaf removed, along with the removed leaf's
	/// authentication path in this tree.
	pub fn remove(&self, secrethash: SecretHash) -> Option<(LockTree, MerkleProof)> {
		let proof = self.proof(secrethash)?;
		let leaves = self
			.leaves
			.iter()
			.filter(|leaf| leaf.secrethash != secrethash)
			.cloned()
			.collect();
		Some((LockTree { leaves }, proof))
	}

	/// Hypothetical root with the given leaf appended, without mutating
	/// state. Used to build outgoing balance proofs.
	pub fn compute_root_with(&self, secrethash: SecretHash, leaf_hash: H256) -> Option<Locksroot> {
		self.add(secrethash, leaf_hash).map(|tree| tree.root())
	}

	/// Hypothetical root with the given leaf removed.
	pub fn compute_root_without(&self, secrethash: SecretHash) -> Option<Locksroot> {
		self.remove(secrethash).map(|(tree, _)| tree.root())
	}

	/// Authentication path of a leaf, bottom up.
	pub fn proof(&self, secrethash: SecretHash) -> Option<MerkleProof> {
		let mut position = self.position_of(secrethash)?;
		let leaf_hashes: Vec<H256> = self.leaves.iter().map(|leaf| leaf.leaf_hash).collect();
		let layers = compute_layers(&leaf_hashes);
		let mut proof = vec![];
		for layer in &layers[..layers.len() - 1] {
			let sibling = if position % 2 == 0 { position + 1 } else { position - 1 };
			if sibling < layer.len() {
				proof.push(layer[sibling]);
			}
			position /= 2;
		}
		Some(proof)
	}
}

/// Check a leaf's authentication path against a root.
pub fn verify_proof(root: Locksroot, leaf_hash: H256, proof: &MerkleProof) -> bool {
	let computed = proof.iter().fold(leaf_hash, |acc, sibling| hash_pair(acc, *sibling));
	computed == root
}
