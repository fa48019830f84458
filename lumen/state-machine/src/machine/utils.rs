#![warn(clippy::missing_docs_in_private_items)]

use crate::{
	errors::StateTransitionError,
	types::{
		ChainState,
		ChannelState,
		LockedTransferState,
		ReceiveAnnounceDisposed,
		RouteState,
	},
};

/// Replace a channel in the chain state after a cloned copy was mutated.
pub fn update_channel(
	chain_state: &mut ChainState,
	channel_state: ChannelState,
) -> Result<(), StateTransitionError> {
	let channel_identifier = channel_state.canonical_identifier.channel_identifier;
	if !chain_state.channels.contains_key(&channel_identifier) {
		return Err(StateTransitionError {
			msg: format!("Channel {} is unknown", channel_identifier),
		})
	}
	chain_state.channels.insert(channel_identifier, channel_state);
	Ok(())
}

/// True if the announced disposal matches the transfer this node sent over
/// the given route. A disposal from the payment target is never accepted.
pub fn is_valid_disposed_refund(
	original_transfer: &LockedTransferState,
	original_route: &RouteState,
	state_change: &ReceiveAnnounceDisposed,
) -> bool {
	if state_change.sender == original_transfer.target {
		return false
	}
	if state_change.sender != original_route.hop_node {
		return false
	}
	original_transfer.amount == state_change.lock.amount &&
		original_transfer.secrethash == state_change.lock.secrethash &&
		original_transfer.expiration == state_change.lock.expiration
}
