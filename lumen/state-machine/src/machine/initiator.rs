#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::{
	constants::{
		DEFAULT_REVEAL_TIMEOUT,
		FORK_CONFIRM_NUMBER,
	},
	hashing::{
		hash_secret,
		payment_task_key,
	},
	types::{
		ChannelIdentifier,
		Secret,
		H256,
	},
};
use tracing::debug;

use super::{
	channel,
	routes,
	utils::{
		is_valid_disposed_refund,
		update_channel,
	},
};
use crate::{
	errors::StateTransitionError,
	types::{
		ActionInitInitiator,
		Block,
		ChainState,
		ChannelState,
		ContractReceiveChannelCooperativeSettled,
		ContractReceiveChannelWithdraw,
		ContractReceiveSecretReveal,
		Event,
		InitiatorState,
		InvalidReceivedMessage,
		ReceiveAnnounceDisposed,
		ReceiveSecretRequest,
		ReceiveSecretReveal,
		RemoveStateManager,
		RoutesState,
		SendMessageEventInner,
		SendSecretReveal,
		StateChange,
		TransferSentFailed,
		TransferSentSuccess,
		TransferState,
		UnlockFailed,
		UnlockSuccess,
	},
	views,
};

pub(super) type TransitionResult = std::result::Result<InitiatorTransition, StateTransitionError>;

/// Result of one initiator transition.
pub struct InitiatorTransition {
	pub new_state: Option<InitiatorState>,
	pub chain_state: ChainState,
	pub events: Vec<Event>,
}

/// Key under which this payment's state manager is registered.
fn task_key(initiator_state: &InitiatorState) -> H256 {
	payment_task_key(
		initiator_state.transfer_description.secrethash,
		initiator_state.transfer_description.token_address,
	)
}

/// Failure events that terminate the payment.
fn events_for_payment_failed(initiator_state: &InitiatorState, reason: String) -> Vec<Event> {
	vec![
		TransferSentFailed {
			secrethash: initiator_state.transfer_description.secrethash,
			target: initiator_state.transfer_description.target,
			reason,
		}
		.into(),
		RemoveStateManager { key: task_key(initiator_state) }.into(),
	]
}

/// Try the next usable route and lock the transfer into its channel.
///
/// When no candidate remains the payment fails with a reason collected
/// from the routes that were skipped or canceled along the way.
fn try_new_route(
	mut chain_state: ChainState,
	mut initiator_state: InitiatorState,
) -> TransitionResult {
	let description = initiator_state.transfer_description.clone();
	let amount_with_fee = description.amount + description.fee;

	let route = routes::next_route_initiator(
		&chain_state,
		&mut initiator_state.routes,
		amount_with_fee,
	);

	let route = match route {
		Some(route) => route,
		None => {
			let mut reason = "none of the available routes could be used".to_owned();
			if !initiator_state.routes.canceled_routes.is_empty() {
				reason += " and at least one route was canceled by a refusal";
			}
			let events = events_for_payment_failed(&initiator_state, reason);
			return Ok(InitiatorTransition { new_state: None, chain_state, events })
		},
	};

	let mut channel_state: ChannelState =
		match views::get_channel(&chain_state, route.channel_identifier) {
			Some(channel_state) => channel_state.clone(),
			None =>
				return Err(StateTransitionError {
					msg: format!("Route channel {} is unknown", route.channel_identifier),
				}),
		};

	let expiration = channel::views::get_safe_initial_expiration(
		chain_state.block_number,
		route.settle_timeout,
		DEFAULT_REVEAL_TIMEOUT.into(),
		description.expiration,
	);
	let message_identifier = chain_state.pseudo_random_number_generator.next();
	let locked_transfer = channel::send_mediated_transfer(
		&mut channel_state,
		description.initiator,
		description.target,
		amount_with_fee,
		description.amount,
		description.fee,
		expiration,
		description.secrethash,
		Some(description.secret),
		message_identifier,
	)
	.map_err(|e| StateTransitionError { msg: e.to_string() })?;
	update_channel(&mut chain_state, channel_state)?;

	initiator_state.transfer = Some(locked_transfer.transfer.clone());
	initiator_state.route = Some(route);
	initiator_state.transfer_state = TransferState::Pending;

	Ok(InitiatorTransition {
		new_state: Some(initiator_state),
		chain_state,
		events: vec![locked_transfer.into()],
	})
}

/// Start a new payment: build the initiator state and try the first route.
fn handle_init(chain_state: ChainState, state_change: ActionInitInitiator) -> TransitionResult {
	let initiator_state = InitiatorState {
		our_address: chain_state.our_address,
		transfer_description: state_change.transfer,
		routes: RoutesState::new(state_change.routes),
		route: None,
		transfer: None,
		block_number: chain_state.block_number,
		transfer_state: TransferState::Pending,
		received_secret_request: false,
		cancel_by_exception_secret_request: false,
	};
	try_new_route(chain_state, initiator_state)
}

/// Success events once the next hop knows the secret: pay the lock with a
/// new balance proof and retire the state manager.
fn events_for_unlock(
	chain_state: &mut ChainState,
	initiator_state: &InitiatorState,
) -> Result<Vec<Event>, StateTransitionError> {
	let route = initiator_state.route.as_ref().ok_or(StateTransitionError {
		msg: "Secret revealed without an active route".to_owned(),
	})?;
	let mut channel_state = match views::get_channel(chain_state, route.channel_identifier) {
		Some(channel_state) => channel_state.clone(),
		None =>
			return Err(StateTransitionError {
				msg: format!("Route channel {} is unknown", route.channel_identifier),
			}),
	};

	let message_identifier = chain_state.pseudo_random_number_generator.next();
	let secrethash = initiator_state.transfer_description.secrethash;

	let mut events: Vec<Event> = vec![];
	// A closed channel cannot carry the balance proof anymore; the partner
	// claims the lock on-chain instead, the payment still went through.
	match channel::send_balance_proof(&mut channel_state, secrethash, message_identifier) {
		Ok(balance_proof) => {
			update_channel(chain_state, channel_state)?;
			events.push(balance_proof.into());
		},
		Err(e) => debug!(reason = %e, "lock can only be claimed on-chain"),
	}

	events.push(
		TransferSentSuccess {
			secrethash,
			target: initiator_state.transfer_description.target,
			amount: initiator_state.transfer_description.amount,
		}
		.into(),
	);
	events.push(UnlockSuccess { secrethash }.into());
	events.push(RemoveStateManager { key: task_key(initiator_state) }.into());
	Ok(events)
}

/// Expiry events, emitted exactly once when the lock outlives its
/// confirmation window.
fn events_for_expired_transfer(
	chain_state: &mut ChainState,
	initiator_state: &InitiatorState,
	reason: String,
) -> Vec<Event> {
	let mut events: Vec<Event> = vec![];
	let secrethash = initiator_state.transfer_description.secrethash;

	// Rebuild our tree without the dead lock while the channel still
	// accepts envelopes.
	if let Some(route) = &initiator_state.route {
		if let Some(channel_state) = views::get_channel(chain_state, route.channel_identifier) {
			let mut channel_state = channel_state.clone();
			let message_identifier = chain_state.pseudo_random_number_generator.next();
			if let Ok(remove_expired) = channel::send_remove_expired_lock(
				&mut channel_state,
				secrethash,
				chain_state.block_number,
				message_identifier,
			) {
				let _ = update_channel(chain_state, channel_state);
				events.push(remove_expired.into());
			}
		}
	}

	events.push(UnlockFailed { secrethash, reason: reason.clone() }.into());
	events.push(
		TransferSentFailed {
			secrethash,
			target: initiator_state.transfer_description.target,
			reason,
		}
		.into(),
	);
	events.push(RemoveStateManager { key: task_key(initiator_state) }.into());
	events
}

/// Block tick: fail the payment once the lock expired beyond the reorg
/// buffer.
fn handle_block(
	mut chain_state: ChainState,
	mut initiator_state: InitiatorState,
	state_change: Block,
) -> TransitionResult {
	initiator_state.block_number = state_change.block_number;

	let transfer = match &initiator_state.transfer {
		Some(transfer) => transfer.clone(),
		None =>
			return Ok(InitiatorTransition {
				new_state: Some(initiator_state),
				chain_state,
				events: vec![],
			}),
	};

	let expired = state_change.block_number > transfer.expiration + FORK_CONFIRM_NUMBER;
	if !expired || initiator_state.transfer_state == TransferState::Expired {
		return Ok(InitiatorTransition {
			new_state: Some(initiator_state),
			chain_state,
			events: vec![],
		})
	}

	let reason = if initiator_state.received_secret_request {
		"lock expired, despite receiving the secret request".to_owned()
	} else {
		"lock expired".to_owned()
	};
	initiator_state.transfer_state = TransferState::Expired;
	let events = events_for_expired_transfer(&mut chain_state, &initiator_state, reason);

	Ok(InitiatorTransition { new_state: None, chain_state, events })
}

/// The target asks for the secret. Reveal it only when the request matches
/// the transfer exactly and the lock is still alive.
fn handle_secret_request(
	mut chain_state: ChainState,
	mut initiator_state: InitiatorState,
	state_change: ReceiveSecretRequest,
) -> TransitionResult {
	let description = &initiator_state.transfer_description;
	let transfer = match &initiator_state.transfer {
		Some(transfer) => transfer,
		None =>
			return Ok(InitiatorTransition {
				new_state: Some(initiator_state),
				chain_state,
				events: vec![],
			}),
	};

	if initiator_state.received_secret_request ||
		initiator_state.transfer_state == TransferState::Canceled
	{
		return Ok(InitiatorTransition {
			new_state: Some(initiator_state),
			chain_state,
			events: vec![],
		})
	}

	let is_valid = state_change.sender == description.target &&
		state_change.secrethash == description.secrethash &&
		state_change.amount == description.amount &&
		chain_state.block_number < transfer.expiration;

	initiator_state.received_secret_request = true;
	let events = if is_valid {
		let message_identifier = chain_state.pseudo_random_number_generator.next();
		initiator_state.transfer_state = TransferState::SecretRevealed;
		vec![SendSecretReveal {
			inner: SendMessageEventInner {
				recipient: description.target,
				canonical_identifier: transfer.channel_identifier.clone(),
				message_identifier,
			},
			secret: description.secret,
			secrethash: description.secrethash,
		}
		.into()]
	} else {
		initiator_state.cancel_by_exception_secret_request = true;
		vec![InvalidReceivedMessage {
			sender: state_change.sender,
			reason: "secret request does not match the transfer".to_owned(),
		}
		.into()]
	};

	Ok(InitiatorTransition { new_state: Some(initiator_state), chain_state, events })
}

/// The next hop refuses the transfer and hands the lock back. Confirm the
/// disposal, cancel the route and retry over the next one. The secret was
/// never revealed, so this is always safe.
fn handle_announce_disposed(
	mut chain_state: ChainState,
	mut initiator_state: InitiatorState,
	state_change: ReceiveAnnounceDisposed,
) -> TransitionResult {
	let (route, transfer) = match (&initiator_state.route, &initiator_state.transfer) {
		(Some(route), Some(transfer)) => (route.clone(), transfer.clone()),
		_ =>
			return Ok(InitiatorTransition {
				new_state: Some(initiator_state),
				chain_state,
				events: vec![],
			}),
	};

	if initiator_state.transfer_state != TransferState::Pending ||
		!is_valid_disposed_refund(&transfer, &route, &state_change)
	{
		return Ok(InitiatorTransition {
			new_state: Some(initiator_state),
			chain_state,
			events: vec![],
		})
	}

	let mut channel_state = match views::get_channel(&chain_state, route.channel_identifier) {
		Some(channel_state) => channel_state.clone(),
		None =>
			return Ok(InitiatorTransition {
				new_state: Some(initiator_state),
				chain_state,
				events: vec![],
			}),
	};
	let message_identifier = chain_state.pseudo_random_number_generator.next();
	let response = match channel::handle_receive_announce_disposed(
		&mut channel_state,
		&state_change,
		chain_state.block_number,
		message_identifier,
	) {
		Ok(response) => response,
		Err(e) => {
			debug!(reason = %e, "ignoring invalid disposal");
			return Ok(InitiatorTransition {
				new_state: Some(initiator_state),
				chain_state,
				events: vec![],
			})
		},
	};
	update_channel(&mut chain_state, channel_state)?;

	initiator_state.routes.canceled_routes.push(route);
	initiator_state.route = None;
	initiator_state.transfer = None;

	let retry = try_new_route(chain_state, initiator_state)?;
	let mut events = vec![response.into()];
	events.extend(retry.events);
	Ok(InitiatorTransition {
		new_state: retry.new_state,
		chain_state: retry.chain_state,
		events,
	})
}

/// The next hop revealed the secret back to us off-chain: pay the lock and
/// finish.
fn handle_secret_reveal(
	mut chain_state: ChainState,
	mut initiator_state: InitiatorState,
	state_change: ReceiveSecretReveal,
) -> TransitionResult {
	let route = match &initiator_state.route {
		Some(route) => route.clone(),
		None =>
			return Ok(InitiatorTransition {
				new_state: Some(initiator_state),
				chain_state,
				events: vec![],
			}),
	};

	let valid = state_change.sender == route.hop_node &&
		state_change.secrethash == initiator_state.transfer_description.secrethash &&
		hash_secret(state_change.secret.as_bytes()) == state_change.secrethash;
	if !valid {
		return Ok(InitiatorTransition {
			new_state: Some(initiator_state),
			chain_state,
			events: vec![],
		})
	}

	register_secret_on_route(&mut chain_state, &initiator_state, state_change.secret)?;
	initiator_state.transfer_state = TransferState::SecretRevealed;
	let events = events_for_unlock(&mut chain_state, &initiator_state)?;
	Ok(InitiatorTransition { new_state: None, chain_state, events })
}

/// Make the revealed secret known to the route's channel.
fn register_secret_on_route(
	chain_state: &mut ChainState,
	initiator_state: &InitiatorState,
	secret: Secret,
) -> Result<(), StateTransitionError> {
	let route = initiator_state.route.as_ref().ok_or(StateTransitionError {
		msg: "Secret learned without an active route".to_owned(),
	})?;
	let mut channel_state = views::get_channel(chain_state, route.channel_identifier)
		.cloned()
		.ok_or(StateTransitionError {
			msg: format!("Route channel {} is unknown", route.channel_identifier),
		})?;
	channel::register_secret(&mut channel_state, secret)
		.map_err(|e| StateTransitionError { msg: e.to_string() })?;
	update_channel(chain_state, channel_state)
}

/// The secret appeared on-chain. If the lock is still alive this is the
/// success path; otherwise the transfer expired.
fn handle_contract_secret_reveal(
	mut chain_state: ChainState,
	mut initiator_state: InitiatorState,
	state_change: ContractReceiveSecretReveal,
) -> TransitionResult {
	if state_change.secrethash != initiator_state.transfer_description.secrethash {
		return Ok(InitiatorTransition {
			new_state: Some(initiator_state),
			chain_state,
			events: vec![],
		})
	}
	let transfer = match &initiator_state.transfer {
		Some(transfer) => transfer.clone(),
		None =>
			return Ok(InitiatorTransition {
				new_state: Some(initiator_state),
				chain_state,
				events: vec![],
			}),
	};

	if state_change.block_number <= transfer.expiration {
		if let Some(route) = initiator_state.route.clone() {
			if let Some(channel_state) = views::get_channel(&chain_state, route.channel_identifier)
			{
				let mut channel_state = channel_state.clone();
				channel::register_onchain_secret(
					&mut channel_state,
					state_change.secret,
					state_change.secrethash,
					state_change.block_number,
				);
				update_channel(&mut chain_state, channel_state)?;
			}
		}
		initiator_state.transfer_state = TransferState::SecretRevealed;
		let events = events_for_unlock(&mut chain_state, &initiator_state)?;
		return Ok(InitiatorTransition { new_state: None, chain_state, events })
	}

	initiator_state.transfer_state = TransferState::Expired;
	let events = events_for_expired_transfer(
		&mut chain_state,
		&initiator_state,
		"secret registered after the lock expired".to_owned(),
	);
	Ok(InitiatorTransition { new_state: None, chain_state, events })
}

/// User-initiated route cancellation, allowed only before the secret was
/// revealed.
fn handle_cancel_route(
	chain_state: ChainState,
	mut initiator_state: InitiatorState,
) -> TransitionResult {
	if initiator_state.transfer_state != TransferState::Pending {
		return Err(StateTransitionError {
			msg: "route can only be canceled before the secret is revealed".to_owned(),
		})
	}
	if let Some(route) = initiator_state.route.take() {
		initiator_state.routes.canceled_routes.push(route);
	}
	initiator_state.transfer = None;
	try_new_route(chain_state, initiator_state)
}

/// User-initiated payment cancellation. The state stays alive so the
/// expired lock can still be removed from the tree later.
fn handle_cancel_transfer(
	chain_state: ChainState,
	mut initiator_state: InitiatorState,
) -> TransitionResult {
	if initiator_state.transfer_state != TransferState::Pending {
		return Err(StateTransitionError {
			msg: "transfer can only be canceled before the secret is revealed".to_owned(),
		})
	}
	initiator_state.transfer_state = TransferState::Canceled;
	let events = vec![TransferSentFailed {
		secrethash: initiator_state.transfer_description.secrethash,
		target: initiator_state.transfer_description.target,
		reason: "user canceled the transfer".to_owned(),
	}
	.into()];
	Ok(InitiatorTransition { new_state: Some(initiator_state), chain_state, events })
}

/// The current route's channel was emptied by a withdraw or cooperative
/// settle; the lock is moot, cancel the route and retry.
fn handle_route_channel_gone(
	chain_state: ChainState,
	mut initiator_state: InitiatorState,
	channel_identifier: ChannelIdentifier,
) -> TransitionResult {
	let affected = initiator_state
		.route
		.as_ref()
		.map(|route| route.channel_identifier == channel_identifier)
		.unwrap_or(false);
	if !affected || initiator_state.transfer_state != TransferState::Pending {
		return Ok(InitiatorTransition {
			new_state: Some(initiator_state),
			chain_state,
			events: vec![],
		})
	}
	if let Some(route) = initiator_state.route.take() {
		initiator_state.routes.canceled_routes.push(route);
	}
	initiator_state.transfer = None;
	try_new_route(chain_state, initiator_state)
}

/// The initiator state machine: a pure function from a state change to the
/// next state plus emitted events.
pub fn state_transition(
	chain_state: ChainState,
	initiator_state: Option<InitiatorState>,
	state_change: StateChange,
) -> TransitionResult {
	match state_change {
		StateChange::ActionInitInitiator(inner) => handle_init(chain_state, inner),
		_ => {
			let initiator_state = match initiator_state {
				Some(initiator_state) => initiator_state,
				None =>
					return Err(StateTransitionError {
						msg: "state change requires a valid initiator state".to_owned(),
					}),
			};
			match state_change {
				StateChange::Block(inner) => handle_block(chain_state, initiator_state, inner),
				StateChange::ReceiveSecretRequest(inner) =>
					handle_secret_request(chain_state, initiator_state, inner),
				StateChange::ReceiveSecretReveal(inner) =>
					handle_secret_reveal(chain_state, initiator_state, inner),
				StateChange::ReceiveAnnounceDisposed(inner) =>
					handle_announce_disposed(chain_state, initiator_state, inner),
				StateChange::ContractReceiveSecretReveal(inner) =>
					handle_contract_secret_reveal(chain_state, initiator_state, inner),
				StateChange::ActionCancelRoute(_) =>
					handle_cancel_route(chain_state, initiator_state),
				StateChange::ActionCancelTransfer(_) =>
					handle_cancel_transfer(chain_state, initiator_state),
				StateChange::ContractReceiveChannelWithdraw(ContractReceiveChannelWithdraw {
					channel_identifier,
					..
				}) => handle_route_channel_gone(chain_state, initiator_state, channel_identifier),
				StateChange::ContractReceiveChannelCooperativeSettled(
					ContractReceiveChannelCooperativeSettled { channel_identifier, .. },
				) => handle_route_channel_gone(chain_state, initiator_state, channel_identifier),
				_ => Ok(InitiatorTransition {
					new_state: Some(initiator_state),
					chain_state,
					events: vec![],
				}),
			}
		},
	}
}
