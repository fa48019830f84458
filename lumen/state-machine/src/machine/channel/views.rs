#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::{
	constants::FORK_CONFIRM_NUMBER,
	types::{
		BlockExpiration,
		BlockNumber,
		RevealTimeout,
		SettleTimeout,
	},
};

/// Block after which an expired lock may be removed from the tree. The
/// extra confirmation blocks guard against claims racing a small reorg.
pub fn get_removal_threshold(expiration: BlockExpiration) -> BlockExpiration {
	expiration + FORK_CONFIRM_NUMBER
}

/// Expiration for a lock created by this node: leave the partner at least
/// `reveal_timeout` blocks to use the secret before settlement.
pub fn get_safe_initial_expiration(
	block_number: BlockNumber,
	settle_timeout: SettleTimeout,
	reveal_timeout: RevealTimeout,
	upper_bound: Option<BlockExpiration>,
) -> BlockExpiration {
	let expiration = block_number + settle_timeout - reveal_timeout;
	match upper_bound {
		Some(upper_bound) if upper_bound < expiration => upper_bound,
		_ => expiration,
	}
}
