use serde::{
	Deserialize,
	Serialize,
};
pub use web3::types::{
	Address,
	Bytes,
	H160,
	H256,
	U256,
	U64,
};

pub type BlockExpiration = U64;

pub type BlockNumber = U64;

pub type BlockHash = H256;

pub type BlockTimeout = U64;

pub type ChainID = U256;

pub type ChannelIdentifier = H256;

pub type FeeAmount = U256;

pub type LockAmount = U256;

pub type Locksroot = H256;

pub type MessageIdentifier = u64;

pub type Nonce = u64;

pub type PaymentIdentifier = u64;

pub type RegistryAddress = Address;

pub type RevealTimeout = U64;

pub type Secret = H256;

pub type SecretHash = H256;

pub type SecretRegistryAddress = Address;

pub type SettleTimeout = U64;

pub type Signature = Bytes;

pub type TokenAddress = Address;

pub type TokenNetworkAddress = Address;

pub type TokenAmount = U256;

pub type TransactionHash = H256;

/// The unique identity of one incarnation of a channel.
///
/// The channel hash stays constant across the channel's whole life, the open
/// block number increments every time the channel is reopened after a
/// withdraw or a settle.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct CanonicalIdentifier {
	pub channel_identifier: ChannelIdentifier,
	pub open_block_number: BlockNumber,
}

impl CanonicalIdentifier {
	pub fn new(
		channel_identifier: ChannelIdentifier,
		open_block_number: BlockNumber,
	) -> Self {
		Self { channel_identifier, open_block_number }
	}
}
