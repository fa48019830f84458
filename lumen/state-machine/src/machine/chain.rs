#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::{
	constants::DEFAULT_REVEAL_TIMEOUT,
	hashing::payment_task_key,
	types::{
		Address,
		ChannelIdentifier,
		SecretHash,
		H256,
	},
};
use tracing::{
	debug,
	warn,
};

use super::{
	channel,
	initiator,
	mediator,
};
use crate::{
	errors::{
		ChannelError,
		StateTransitionError,
	},
	types::{
		ActionChannelClose,
		ActionChannelCooperativeSettle,
		ActionChannelWithdraw,
		ActionCancelWithdraw,
		ActionTransferDirect,
		Block,
		ChainState,
		ChannelState,
		ChannelStatus,
		ContractReceiveChannelOpened,
		ContractReceiveChannelSettled,
		ContractReceiveSecretReveal,
		ContractSendChannelClose,
		Event,
		InvalidReceivedMessage,
		StateChange,
		TransactionResult,
		TransferTask,
	},
};

/// A transition result for the chain state.
pub type TransitionResult = std::result::Result<ChainTransition, StateTransitionError>;

/// Chain transition content.
#[derive(Debug)]
pub struct ChainTransition {
	pub new_state: ChainState,
	pub events: Vec<Event>,
}

/// Run one payment task against a state change, keeping or dropping it
/// according to the machine's result.
fn subdispatch_to_task(
	mut chain_state: ChainState,
	key: H256,
	state_change: StateChange,
) -> TransitionResult {
	let task = match chain_state.payment_mapping.remove(&key) {
		Some(task) => task,
		None => return Ok(ChainTransition { new_state: chain_state, events: vec![] }),
	};

	match task {
		TransferTask::Initiator(initiator_state) => {
			let transition = initiator::state_transition(
				chain_state,
				Some(initiator_state),
				state_change,
			)?;
			let mut new_state = transition.chain_state;
			if let Some(initiator_state) = transition.new_state {
				new_state
					.payment_mapping
					.insert(key, TransferTask::Initiator(initiator_state));
			}
			Ok(ChainTransition { new_state, events: transition.events })
		},
		TransferTask::Mediator(mediator_state) => {
			let transition =
				mediator::state_transition(chain_state, Some(mediator_state), state_change)?;
			let mut new_state = transition.chain_state;
			if let Some(mediator_state) = transition.new_state {
				new_state.payment_mapping.insert(key, TransferTask::Mediator(mediator_state));
			}
			Ok(ChainTransition { new_state, events: transition.events })
		},
	}
}

/// Key of every task working on the given secret hash.
fn task_keys_for_secrethash(chain_state: &ChainState, secrethash: SecretHash) -> Vec<H256> {
	chain_state
		.payment_mapping
		.iter()
		.filter(|(_, task)| match task {
			TransferTask::Initiator(state) => state.transfer_description.secrethash == secrethash,
			TransferTask::Mediator(state) => state.secrethash == secrethash,
		})
		.map(|(key, _)| *key)
		.collect()
}

/// Fan a state change out to the tasks matching a secret hash.
fn subdispatch_by_secrethash(
	chain_state: ChainState,
	secrethash: SecretHash,
	state_change: StateChange,
) -> TransitionResult {
	let keys = task_keys_for_secrethash(&chain_state, secrethash);
	subdispatch_to_keys(chain_state, keys, state_change)
}

/// Fan a state change out to every payment task.
fn subdispatch_to_all_tasks(
	chain_state: ChainState,
	state_change: StateChange,
) -> TransitionResult {
	let keys: Vec<H256> = chain_state.payment_mapping.keys().copied().collect();
	subdispatch_to_keys(chain_state, keys, state_change)
}

/// Run the state change through each listed task in turn.
fn subdispatch_to_keys(
	mut chain_state: ChainState,
	keys: Vec<H256>,
	state_change: StateChange,
) -> TransitionResult {
	let mut events = vec![];
	for key in keys {
		let transition = subdispatch_to_task(chain_state, key, state_change.clone())?;
		chain_state = transition.new_state;
		events.extend(transition.events);
	}
	Ok(ChainTransition { new_state: chain_state, events })
}

/// Apply a closure to one channel, translating engine rejections into a
/// reported event instead of an error.
fn with_channel_reported<F>(
	mut chain_state: ChainState,
	channel_identifier: ChannelIdentifier,
	sender: Address,
	handler: F,
) -> TransitionResult
where
	F: FnOnce(&mut ChannelState) -> Result<Vec<Event>, ChannelError>,
{
	let channel_state = match chain_state.channels.get_mut(&channel_identifier) {
		Some(channel_state) => channel_state,
		None => {
			debug!(channel = %channel_identifier, "message for unknown channel");
			return Ok(ChainTransition { new_state: chain_state, events: vec![] })
		},
	};
	let events = match handler(channel_state) {
		Ok(events) => events,
		Err(e) =>
			vec![InvalidReceivedMessage { sender, reason: e.to_string() }.into()],
	};
	Ok(ChainTransition { new_state: chain_state, events })
}

/// New block: advance the channels' sub-protocols, then let every payment
/// task evaluate its block-based timeouts.
fn handle_block(mut chain_state: ChainState, state_change: Block) -> TransitionResult {
	chain_state.block_number = state_change.block_number;

	for channel_state in chain_state.channels.values_mut() {
		channel::handle_block(channel_state);
	}

	subdispatch_to_all_tasks(chain_state, state_change.into())
}

/// A channel opened on-chain with this node as a participant.
fn handle_channel_opened(
	mut chain_state: ChainState,
	state_change: ContractReceiveChannelOpened,
) -> TransitionResult {
	let our_address = chain_state.our_address;
	let partner_address = if state_change.participant1 == our_address {
		state_change.participant2
	} else if state_change.participant2 == our_address {
		state_change.participant1
	} else {
		// Not our channel; only channels we participate in are tracked.
		return Ok(ChainTransition { new_state: chain_state, events: vec![] })
	};

	let mut reveal_timeout = DEFAULT_REVEAL_TIMEOUT;
	if state_change.settle_timeout.as_u64() <= reveal_timeout {
		reveal_timeout = state_change.settle_timeout.as_u64() / 2;
	}

	let channel_state = match ChannelState::new(
		state_change.canonical_identifier.clone(),
		state_change.token_address,
		chain_state.token_network_address,
		our_address,
		partner_address,
		reveal_timeout.into(),
		state_change.settle_timeout,
	) {
		Ok(channel_state) => channel_state,
		Err(e) => {
			warn!(reason = %e, "refusing to track invalid channel");
			return Ok(ChainTransition { new_state: chain_state, events: vec![] })
		},
	};

	chain_state
		.channels
		.insert(state_change.canonical_identifier.channel_identifier, channel_state);
	Ok(ChainTransition { new_state: chain_state, events: vec![] })
}

/// A channel reached its terminal state; drop it after processing.
fn handle_channel_settled(
	mut chain_state: ChainState,
	state_change: ContractReceiveChannelSettled,
) -> TransitionResult {
	if let Some(channel_state) = chain_state.channels.get_mut(&state_change.channel_identifier) {
		channel::handle_channel_settled(channel_state, state_change.block_number);
	}
	chain_state.channels.remove(&state_change.channel_identifier);
	Ok(ChainTransition { new_state: chain_state, events: vec![] })
}

/// User action: close a channel with the partner's latest balance proof.
fn handle_action_close(
	mut chain_state: ChainState,
	state_change: ActionChannelClose,
) -> TransitionResult {
	let channel_state = chain_state
		.channels
		.get_mut(&state_change.channel_identifier)
		.ok_or(StateTransitionError {
			msg: format!("Channel {} is unknown", state_change.channel_identifier),
		})?;
	if channel_state.is_closed() {
		return Err(ChannelError::InvalidChannelState(channel_state.status()).into())
	}
	channel_state.status = ChannelStatus::Closing;
	let events = vec![ContractSendChannelClose {
		canonical_identifier: channel_state.canonical_identifier.clone(),
		balance_proof: channel_state.partner_state.balance_proof.clone(),
	}
	.into()];
	Ok(ChainTransition { new_state: chain_state, events })
}

/// User action: send a direct transfer.
fn handle_action_transfer_direct(
	mut chain_state: ChainState,
	state_change: ActionTransferDirect,
) -> TransitionResult {
	let message_identifier = chain_state.pseudo_random_number_generator.next();
	let channel_state = chain_state
		.channels
		.get_mut(&state_change.channel_identifier)
		.ok_or(StateTransitionError {
			msg: format!("Channel {} is unknown", state_change.channel_identifier),
		})?;
	let event =
		channel::send_direct_transfer(channel_state, state_change.amount, message_identifier)
			.map_err(StateTransitionError::from)?;
	Ok(ChainTransition { new_state: chain_state, events: vec![event.into()] })
}

/// The chain-level state machine: routes every state change to the channel
/// engine and the payment tasks that care about it.
pub fn state_transition(chain_state: ChainState, state_change: StateChange) -> TransitionResult {
	match state_change {
		StateChange::Block(inner) => handle_block(chain_state, inner),
		StateChange::HistoryComplete(_) =>
			Ok(ChainTransition { new_state: chain_state, events: vec![] }),

		StateChange::ActionInitInitiator(inner) => {
			let key =
				payment_task_key(inner.transfer.secrethash, inner.transfer.token_address);
			if chain_state.payment_mapping.contains_key(&key) {
				return Err(StateTransitionError {
					msg: "a payment with this secret hash already exists".to_owned(),
				})
			}
			let transition =
				initiator::state_transition(chain_state, None, inner.clone().into())?;
			let mut new_state = transition.chain_state;
			if let Some(initiator_state) = transition.new_state {
				new_state
					.payment_mapping
					.insert(key, TransferTask::Initiator(initiator_state));
			}
			Ok(ChainTransition { new_state, events: transition.events })
		},

		StateChange::ActionInitMediator(inner) => {
			let key =
				payment_task_key(inner.from_transfer.secrethash, inner.from_transfer.token);
			if chain_state.payment_mapping.contains_key(&key) {
				debug!("mediation for this secret hash already running");
				return Ok(ChainTransition { new_state: chain_state, events: vec![] })
			}
			let transition = mediator::state_transition(chain_state, None, inner.into())?;
			let mut new_state = transition.chain_state;
			if let Some(mediator_state) = transition.new_state {
				new_state.payment_mapping.insert(key, TransferTask::Mediator(mediator_state));
			}
			Ok(ChainTransition { new_state, events: transition.events })
		},

		StateChange::ActionCancelRoute(ref inner) => {
			let key = payment_task_key(inner.secrethash, inner.token_address);
			subdispatch_to_task(chain_state, key, state_change.clone())
		},
		StateChange::ActionCancelTransfer(ref inner) => {
			let key = payment_task_key(inner.secrethash, inner.token_address);
			subdispatch_to_task(chain_state, key, state_change.clone())
		},

		StateChange::ActionTransferDirect(inner) =>
			handle_action_transfer_direct(chain_state, inner),
		StateChange::ActionChannelClose(inner) => handle_action_close(chain_state, inner),

		StateChange::ActionChannelWithdraw(ActionChannelWithdraw {
			channel_identifier,
			withdraw_amount,
		}) => {
			let mut chain_state = chain_state;
			let message_identifier = chain_state.pseudo_random_number_generator.next();
			let channel_state = chain_state
				.channels
				.get_mut(&channel_identifier)
				.ok_or(StateTransitionError {
					msg: format!("Channel {} is unknown", channel_identifier),
				})?;
			let event = channel::action_channel_withdraw(
				channel_state,
				withdraw_amount,
				message_identifier,
			)
			.map_err(StateTransitionError::from)?;
			Ok(ChainTransition { new_state: chain_state, events: vec![event.into()] })
		},
		StateChange::ActionChannelCooperativeSettle(ActionChannelCooperativeSettle {
			channel_identifier,
		}) => {
			let mut chain_state = chain_state;
			let message_identifier = chain_state.pseudo_random_number_generator.next();
			let channel_state = chain_state
				.channels
				.get_mut(&channel_identifier)
				.ok_or(StateTransitionError {
					msg: format!("Channel {} is unknown", channel_identifier),
				})?;
			let event =
				channel::action_channel_cooperative_settle(channel_state, message_identifier)
					.map_err(StateTransitionError::from)?;
			Ok(ChainTransition { new_state: chain_state, events: vec![event.into()] })
		},
		StateChange::ActionCancelWithdraw(ActionCancelWithdraw { channel_identifier }) => {
			let mut chain_state = chain_state;
			let channel_state = chain_state
				.channels
				.get_mut(&channel_identifier)
				.ok_or(StateTransitionError {
					msg: format!("Channel {} is unknown", channel_identifier),
				})?;
			channel::action_cancel_prepare(channel_state)
				.map_err(StateTransitionError::from)?;
			Ok(ChainTransition { new_state: chain_state, events: vec![] })
		},

		StateChange::ReceiveDirectTransfer(ref inner) => {
			let sender = inner.envelope.sender;
			let inner = inner.clone();
			with_channel_reported(
				chain_state,
				inner.envelope.canonical_identifier.channel_identifier,
				sender,
				move |channel_state| {
					channel::handle_receive_direct_transfer(channel_state, &inner)?;
					Ok(vec![])
				},
			)
		},
		StateChange::ReceiveUnlock(ref inner) => {
			let sender = inner.envelope.sender;
			let secrethash = inner.secrethash;
			let unlock = inner.clone();
			let channel_identifier = inner.envelope.canonical_identifier.channel_identifier;
			let transition = with_channel_reported(
				chain_state,
				channel_identifier,
				sender,
				move |channel_state| {
					channel::handle_receive_unlock(channel_state, &unlock)?;
					Ok(vec![])
				},
			)?;
			let mut events = transition.events;
			let rejected = !events.is_empty();
			let mut new_state = transition.new_state;
			if !rejected {
				let task_transition =
					subdispatch_by_secrethash(new_state, secrethash, state_change.clone())?;
				new_state = task_transition.new_state;
				events.extend(task_transition.events);
			}
			Ok(ChainTransition { new_state, events })
		},
		StateChange::ReceiveRemoveExpiredLock(ref inner) => {
			let sender = inner.envelope.sender;
			let inner = inner.clone();
			let block_number = chain_state.block_number;
			with_channel_reported(
				chain_state,
				inner.envelope.canonical_identifier.channel_identifier,
				sender,
				move |channel_state| {
					channel::handle_receive_remove_expired_lock(
						channel_state,
						&inner,
						block_number,
					)?;
					Ok(vec![])
				},
			)
		},
		StateChange::ReceiveAnnounceDisposedResponse(ref inner) => {
			let sender = inner.envelope.sender;
			let inner = inner.clone();
			let block_number = chain_state.block_number;
			with_channel_reported(
				chain_state,
				inner.envelope.canonical_identifier.channel_identifier,
				sender,
				move |channel_state| {
					channel::handle_receive_announce_disposed_response(
						channel_state,
						&inner,
						block_number,
					)?;
					Ok(vec![])
				},
			)
		},
		StateChange::ReceiveAnnounceDisposed(ref inner) =>
			subdispatch_by_secrethash(chain_state, inner.lock.secrethash, state_change.clone()),
		StateChange::ReceiveSecretRequest(ref inner) =>
			subdispatch_by_secrethash(chain_state, inner.secrethash, state_change.clone()),
		StateChange::ReceiveSecretReveal(ref inner) =>
			subdispatch_by_secrethash(chain_state, inner.secrethash, state_change.clone()),

		StateChange::ReceiveWithdrawRequest(ref inner) => {
			let sender = inner.sender;
			let inner = inner.clone();
			let mut chain_state = chain_state;
			let message_identifier = chain_state.pseudo_random_number_generator.next();
			with_channel_reported(
				chain_state,
				inner.canonical_identifier.channel_identifier,
				sender,
				move |channel_state| {
					let response = channel::handle_receive_withdraw_request(
						channel_state,
						&inner,
						message_identifier,
					)?;
					Ok(vec![response.into()])
				},
			)
		},
		StateChange::ReceiveWithdrawResponse(ref inner) => {
			let sender = inner.sender;
			let inner = inner.clone();
			with_channel_reported(
				chain_state,
				inner.canonical_identifier.channel_identifier,
				sender,
				move |channel_state| {
					let event =
						channel::handle_receive_withdraw_response(channel_state, &inner)?;
					Ok(vec![event])
				},
			)
		},
		StateChange::ReceiveSettleRequest(ref inner) => {
			let sender = inner.sender;
			let inner = inner.clone();
			let mut chain_state = chain_state;
			let message_identifier = chain_state.pseudo_random_number_generator.next();
			with_channel_reported(
				chain_state,
				inner.canonical_identifier.channel_identifier,
				sender,
				move |channel_state| {
					let response = channel::handle_receive_settle_request(
						channel_state,
						&inner,
						message_identifier,
					)?;
					Ok(vec![response.into()])
				},
			)
		},
		StateChange::ReceiveSettleResponse(ref inner) => {
			let sender = inner.sender;
			let inner = inner.clone();
			with_channel_reported(
				chain_state,
				inner.canonical_identifier.channel_identifier,
				sender,
				move |channel_state| {
					let event = channel::handle_receive_settle_response(channel_state, &inner)?;
					Ok(vec![event])
				},
			)
		},

		StateChange::ContractReceiveTokenNetworkCreated(inner) => {
			let mut chain_state = chain_state;
			chain_state.tokens.insert(inner.token_address, inner.block_number);
			Ok(ChainTransition { new_state: chain_state, events: vec![] })
		},
		StateChange::ContractReceiveChannelOpened(inner) =>
			handle_channel_opened(chain_state, inner),
		StateChange::ContractReceiveChannelDeposit(ref inner) => {
			let mut chain_state = chain_state;
			if let Some(channel_state) =
				chain_state.channels.get_mut(&inner.channel_identifier)
			{
				channel::handle_channel_deposit(channel_state, inner)
					.map_err(StateTransitionError::from)?;
			}
			Ok(ChainTransition { new_state: chain_state, events: vec![] })
		},
		StateChange::ContractReceiveChannelWithdraw(ref inner) => {
			let mut chain_state = chain_state;
			if let Some(channel_state) =
				chain_state.channels.get_mut(&inner.channel_identifier)
			{
				channel::handle_channel_withdrawed(channel_state, inner);
			}
			subdispatch_to_all_tasks(chain_state, state_change.clone())
		},
		StateChange::ContractReceiveChannelClosed(ref inner) => {
			let mut chain_state = chain_state;
			let events = match chain_state.channels.get_mut(&inner.channel_identifier) {
				Some(channel_state) => channel::handle_channel_closed(channel_state, inner),
				None => vec![],
			};
			Ok(ChainTransition { new_state: chain_state, events })
		},
		StateChange::ContractReceiveBalanceProofUpdated(ref inner) => {
			let mut chain_state = chain_state;
			let events = match chain_state.channels.get_mut(&inner.channel_identifier) {
				Some(channel_state) =>
					channel::handle_balance_proof_updated(channel_state, inner),
				None => vec![],
			};
			Ok(ChainTransition { new_state: chain_state, events })
		},
		StateChange::ContractReceiveChannelPunished(ref inner) => {
			let mut chain_state = chain_state;
			if let Some(channel_state) =
				chain_state.channels.get_mut(&inner.channel_identifier)
			{
				channel::handle_channel_punished(channel_state, inner.beneficiary);
			}
			Ok(ChainTransition { new_state: chain_state, events: vec![] })
		},
		StateChange::ContractReceiveChannelUnlocked(ref inner) => {
			let mut chain_state = chain_state;
			if let Some(channel_state) =
				chain_state.channels.get_mut(&inner.channel_identifier)
			{
				channel::handle_channel_unlocked(channel_state, inner);
			}
			Ok(ChainTransition { new_state: chain_state, events: vec![] })
		},
		StateChange::ContractReceiveChannelSettled(inner) =>
			handle_channel_settled(chain_state, inner),
		StateChange::ContractReceiveChannelCooperativeSettled(ref inner) => {
			let mut chain_state = chain_state;
			if let Some(channel_state) =
				chain_state.channels.get_mut(&inner.channel_identifier)
			{
				channel_state.status = ChannelStatus::Settled;
				channel_state.settled_block = inner.block_number;
			}
			chain_state.channels.remove(&inner.channel_identifier);
			subdispatch_to_all_tasks(chain_state, state_change.clone())
		},
		StateChange::ContractReceiveSecretReveal(ref inner) => {
			let mut chain_state = chain_state;
			register_onchain_secret_everywhere(&mut chain_state, inner);
			subdispatch_by_secrethash(chain_state, inner.secrethash, state_change.clone())
		},
		StateChange::ContractCallTxResult(inner) => {
			if inner.result == TransactionResult::Failure {
				warn!(
					description = %inner.description,
					error = ?inner.error,
					"on-chain call failed",
				);
			}
			Ok(ChainTransition { new_state: chain_state, events: vec![] })
		},
	}
}

/// Record an on-chain revealed secret with every channel holding the lock.
fn register_onchain_secret_everywhere(
	chain_state: &mut ChainState,
	state_change: &ContractReceiveSecretReveal,
) {
	for channel_state in chain_state.channels.values_mut() {
		channel::register_onchain_secret(
			channel_state,
			state_change.secret,
			state_change.secrethash,
			state_change.block_number,
		);
	}
}
