#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::types::{
	FeeAmount,
	TokenAmount,
	U64,
};
use tracing::debug;

use crate::{
	types::{
		ChainState,
		RouteState,
		RoutesState,
	},
	views,
};

/// True if the route's channel is currently usable for a new transfer of
/// `amount`.
fn channel_usable(chain_state: &ChainState, route: &RouteState, amount: TokenAmount) -> bool {
	match views::get_channel(chain_state, route.channel_identifier) {
		Some(channel) => channel.can_transfer() && channel.distributable() >= amount,
		None => false,
	}
}

/// Pop the best usable route for a payment this node initiates. Routes that
/// cannot carry the amount are pushed to the ignored list.
pub fn next_route_initiator(
	chain_state: &ChainState,
	routes: &mut RoutesState,
	amount: TokenAmount,
) -> Option<RouteState> {
	while !routes.available_routes.is_empty() {
		let route = routes.available_routes.remove(0);
		if route.available_balance < amount || !channel_usable(chain_state, &route, amount) {
			debug!(hop = %route.hop_node, "skipping route, channel not usable");
			routes.ignored_routes.push(route);
			continue
		}
		return Some(route)
	}
	None
}

/// Pop the best usable route for a mediated hop.
///
/// On top of the initiator checks, a mediator refuses routes whose lock
/// timeout collapsed, whose fee is not covered by the remaining fee budget,
/// or that lead straight back to the payer hop.
pub fn next_route_mediator(
	chain_state: &ChainState,
	routes: &mut RoutesState,
	payer_route: &RouteState,
	timeout_blocks: U64,
	transfer_amount: TokenAmount,
	fee_budget: FeeAmount,
) -> Option<RouteState> {
	while !routes.available_routes.is_empty() {
		let route = routes.available_routes.remove(0);

		let lock_timeout_valid = timeout_blocks > route.reveal_timeout;
		let fee_covered = route.fee <= fee_budget;
		let backtracks = route.hop_node == payer_route.hop_node;

		if !lock_timeout_valid || !fee_covered || backtracks ||
			route.available_balance < transfer_amount ||
			!channel_usable(chain_state, &route, transfer_amount)
		{
			debug!(hop = %route.hop_node, "skipping mediation route");
			routes.ignored_routes.push(route);
			continue
		}
		return Some(route)
	}
	None
}
