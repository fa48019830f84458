#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::types::{
	Address,
	ChannelIdentifier,
	TokenAddress,
};

use crate::types::{
	ChainState,
	ChannelState,
	ChannelStatus,
};

/// Returns the channel with the given identifier, if known.
pub fn get_channel(
	chain_state: &ChainState,
	channel_identifier: ChannelIdentifier,
) -> Option<&ChannelState> {
	chain_state.channels.get(&channel_identifier)
}

/// Returns the channel for a token and partner address, if one exists.
pub fn get_channel_by_token_and_partner(
	chain_state: &ChainState,
	token_address: TokenAddress,
	partner_address: Address,
) -> Option<&ChannelState> {
	chain_state.channels.values().find(|channel| {
		channel.token_address == token_address &&
			channel.partner_state.address == partner_address
	})
}

/// Returns all channels for one token.
pub fn get_channels_for_token(
	chain_state: &ChainState,
	token_address: TokenAddress,
) -> Vec<&ChannelState> {
	chain_state
		.channels
		.values()
		.filter(|channel| channel.token_address == token_address)
		.collect()
}

/// Returns all channels in `Opened` state.
pub fn get_open_channels(chain_state: &ChainState) -> Vec<&ChannelState> {
	chain_state
		.channels
		.values()
		.filter(|channel| channel.status() == ChannelStatus::Opened)
		.collect()
}
