use web3::signing::keccak256;

use crate::{
	traits::ToBytes,
	types::{
		Address,
		BlockExpiration,
		ChannelIdentifier,
		SecretHash,
		TokenAddress,
		TokenAmount,
		TokenNetworkAddress,
		H256,
	},
};

/// Hash of a revealed lock secret. Identifies the lock before the secret is
/// known.
pub fn hash_secret(secret: &[u8]) -> SecretHash {
	SecretHash::from(keccak256(secret))
}

/// Channel hash as computed by the token network contract. Participants are
/// ordered so both ends derive the same identifier.
pub fn channel_identifier_from_participants(
	participant1: Address,
	participant2: Address,
	token_address: TokenAddress,
	token_network_address: TokenNetworkAddress,
) -> ChannelIdentifier {
	let (first, second) = if participant1 < participant2 {
		(participant1, participant2)
	} else {
		(participant2, participant1)
	};
	let data = [
		first.as_bytes(),
		second.as_bytes(),
		token_address.as_bytes(),
		token_network_address.as_bytes(),
	]
	.concat();
	ChannelIdentifier::from(keccak256(&data))
}

/// Key under which a payment's state manager is registered.
pub fn payment_task_key(lock_secret_hash: SecretHash, token_address: TokenAddress) -> H256 {
	let data = [lock_secret_hash.as_bytes(), token_address.as_bytes()].concat();
	H256::from(keccak256(&data))
}

/// Leaf hash of a pending lock in the lock tree.
pub fn hash_lock_leaf(
	expiration: BlockExpiration,
	amount: TokenAmount,
	lock_secret_hash: SecretHash,
) -> H256 {
	let data =
		[expiration.to_bytes(), amount.to_bytes(), lock_secret_hash.as_bytes().to_vec()].concat();
	H256::from(keccak256(&data))
}
