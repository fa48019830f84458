#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::types::{
	BlockExpiration,
	BlockNumber,
	Secret,
};

use crate::types::{
	ContractSendRegisterSecret,
	Event,
};

/// Register the secret on-chain, unless the lock already expired and the
/// registration could not be used anymore.
pub fn events_for_onchain_secret_registration(
	secret: Secret,
	lock_expiration: BlockExpiration,
	block_number: BlockNumber,
) -> Vec<Event> {
	if block_number <= lock_expiration {
		return vec![ContractSendRegisterSecret { secret }.into()]
	}
	vec![]
}
