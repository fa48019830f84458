#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::types::{
	Address,
	U64,
};
use web3::types::{
	Filter,
	FilterBuilder,
};

use crate::contracts::ContractRegistry;

/// Log filter covering the token network and secret registry contracts for
/// the given block range.
pub fn filter_for_range(
	registry: &ContractRegistry,
	token_network_address: Address,
	secret_registry_address: Address,
	from_block: U64,
	to_block: U64,
) -> Filter {
	FilterBuilder::default()
		.address(vec![token_network_address, secret_registry_address])
		.topics(Some(registry.all_topics()), None, None, None)
		.from_block(from_block.into())
		.to_block(to_block.into())
		.build()
}
