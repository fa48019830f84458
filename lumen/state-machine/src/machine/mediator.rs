#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::{
	constants::FORK_CONFIRM_NUMBER,
	hashing::{
		hash_secret,
		payment_task_key,
	},
	types::{
		Address,
		BlockNumber,
		ChannelIdentifier,
		Secret,
		SecretHash,
		TokenAmount,
		U64,
	},
};
use tracing::debug;

use super::{
	channel,
	routes,
	secret_registry,
	utils::{
		is_valid_disposed_refund,
		update_channel,
	},
};
use crate::{
	constants::{
		PAYEE_STATE_SECRET_KNOWN,
		PAYEE_STATE_TRANSFER_FINAL,
		PAYEE_STATE_TRANSFER_PAID,
		PAYER_STATE_SECRET_KNOWN,
		PAYER_STATE_TRANSFER_FINAL,
		PAYER_STATE_TRANSFER_PAID,
	},
	errors::{
		ChannelError,
		StateTransitionError,
	},
	types::{
		ActionInitMediator,
		Block,
		ChainState,
		ChannelState,
		ChannelStatus,
		ContractReceiveChannelCooperativeSettled,
		ContractReceiveChannelWithdraw,
		ContractReceiveSecretReveal,
		Event,
		LockedTransferState,
		MediationPairState,
		MediatorState,
		PayeeState,
		PayerState,
		ReceiveAnnounceDisposed,
		ReceiveSecretReveal,
		ReceiveUnlock,
		RemoveStateManager,
		RouteState,
		RoutesState,
		SendMessageEventInner,
		SendSecretReveal,
		StateChange,
		UnlockFailed,
		UnlockSuccess,
		WithdrawFailed,
		WithdrawSuccess,
	},
	views,
};

pub(super) type TransitionResult = std::result::Result<MediatorTransition, StateTransitionError>;

/// Result of one mediator transition.
#[derive(Debug)]
pub struct MediatorTransition {
	pub new_state: Option<MediatorState>,
	pub chain_state: ChainState,
	pub events: Vec<Event>,
}

/// Disposal reason codes carried by AnnounceDisposed messages.
const DISPOSED_NO_ROUTE: u32 = 1;
/// Reason code used when refusing because of the anti-flooding limit.
const DISPOSED_TOO_MANY_LOCKS: u32 = 2;

/// Base number of blocks available to compute the payee lock timeout.
///
/// It must be the smallest of the payer settle timeout (shrunk by the
/// blocks already burned if the payer channel closed) and the blocks left
/// until the payer lock expires, so the payee is always forced to reveal
/// the secret early enough for this node to claim the payer lock.
fn get_timeout_blocks(
	payer_route: &RouteState,
	payer_channel: &ChannelState,
	payer_expiration: U64,
	block_number: BlockNumber,
) -> i64 {
	let mut blocks_until_settlement = payer_route.settle_timeout.as_u64() as i64;
	if !payer_channel.closed_block.is_zero() {
		assert!(
			block_number >= payer_channel.closed_block,
			"closed block is newer than the current block"
		);
		blocks_until_settlement -=
			(block_number.as_u64() - payer_channel.closed_block.as_u64()) as i64;
	}
	let until_expiration = payer_expiration.as_u64() as i64 - block_number.as_u64() as i64;
	blocks_until_settlement.min(until_expiration)
}

/// Transfers of one pair must agree on everything the lock commits to.
fn is_send_transfer_almost_equal(
	send: &LockedTransferState,
	received: &LockedTransferState,
) -> bool {
	send.token == received.token &&
		send.secrethash == received.secrethash &&
		send.initiator == received.initiator &&
		send.target == received.target &&
		send.target_amount == received.target_amount
}

/// Pairs that still have work to do on either side.
fn pending_pairs(
	transfers_pair: &mut [MediationPairState],
) -> impl Iterator<Item = &mut MediationPairState> {
	transfers_pair.iter_mut().filter(|pair| {
		!PAYEE_STATE_TRANSFER_FINAL.contains(&pair.payee_state) ||
			!PAYER_STATE_TRANSFER_FINAL.contains(&pair.payer_state)
	})
}

/// True if this node must register the secret on-chain to not lose the
/// payer lock: the payee was already paid and the payer lock entered the
/// danger zone, or the payer channel closed outright.
fn is_secret_register_needed(
	pair: &MediationPairState,
	payer_channel: &ChannelState,
	block_number: BlockNumber,
) -> bool {
	let payee_paid = PAYEE_STATE_TRANSFER_PAID.contains(&pair.payee_state);
	let payer_paid = PAYER_STATE_TRANSFER_PAID.contains(&pair.payer_state);
	let already_waiting = pair.payer_state == PayerState::WaitingRegisterSecret;
	let channel_closed = payer_channel.status() == ChannelStatus::Closed;
	let safe_to_wait = channel::validators::is_safe_to_wait(
		pair.payer_transfer.expiration,
		pair.payer_route.reveal_timeout,
		block_number,
	);

	((payee_paid && !safe_to_wait) || channel_closed) && !already_waiting && !payer_paid
}

/// Give the payer lock back: the mediation cannot continue.
fn events_for_refund(
	chain_state: &mut ChainState,
	payer_route: &RouteState,
	payer_transfer: &LockedTransferState,
	error_code: u32,
	error_msg: String,
) -> Vec<Event> {
	let channel_state = match views::get_channel(chain_state, payer_route.channel_identifier) {
		Some(channel_state) => channel_state.clone(),
		None => return vec![],
	};
	let message_identifier = chain_state.pseudo_random_number_generator.next();
	match channel::send_announce_disposed(
		&channel_state,
		payer_transfer.secrethash,
		chain_state.block_number,
		error_code,
		error_msg,
		message_identifier,
	) {
		Ok(disposed) => vec![disposed.into()],
		Err(e) => {
			debug!(reason = %e, "could not refuse transfer");
			vec![]
		},
	}
}

/// Try the next route for a received transfer; append a new pair on
/// success, refund the payer on failure.
fn mediate_transfer(
	mut chain_state: ChainState,
	mut mediator_state: MediatorState,
	payer_route: RouteState,
	payer_transfer: LockedTransferState,
) -> TransitionResult {
	let payer_channel = match views::get_channel(&chain_state, payer_route.channel_identifier) {
		Some(channel_state) => channel_state.clone(),
		None =>
			return Ok(MediatorTransition {
				new_state: Some(mediator_state),
				chain_state,
				events: vec![],
			}),
	};

	let block_number = chain_state.block_number;
	let timeout_blocks = get_timeout_blocks(
		&payer_route,
		&payer_channel,
		payer_transfer.expiration,
		block_number,
	);

	let payee_route = if timeout_blocks > 0 {
		routes::next_route_mediator(
			&chain_state,
			&mut mediator_state.routes,
			&payer_route,
			U64::from(timeout_blocks as u64),
			payer_transfer.amount,
			payer_transfer.fee,
		)
	} else {
		None
	};

	let payee_route = match payee_route {
		Some(payee_route) => payee_route,
		None => {
			let events = events_for_refund(
				&mut chain_state,
				&payer_route,
				&payer_transfer,
				DISPOSED_NO_ROUTE,
				ChannelError::NoAvailableRoute.to_string(),
			);
			let new_state =
				if mediator_state.transfers_pair.is_empty() { None } else { Some(mediator_state) };
			return Ok(MediatorTransition { new_state, chain_state, events })
		},
	};

	let mut payee_channel = match views::get_channel(&chain_state, payee_route.channel_identifier)
	{
		Some(channel_state) => channel_state.clone(),
		None =>
			return Ok(MediatorTransition {
				new_state: Some(mediator_state),
				chain_state,
				events: vec![],
			}),
	};

	// Never extend the lock lifetime beyond what the payer gave us.
	let mut lock_timeout = timeout_blocks as u64;
	if lock_timeout > payee_route.settle_timeout.as_u64() {
		lock_timeout = payee_route.settle_timeout.as_u64();
	}
	let lock_expiration = block_number + lock_timeout;

	let (amount, fee_budget) = if payee_route.hop_node == payer_transfer.target {
		// The last hop forwards exactly the target amount and keeps the
		// rest of the fee.
		(payer_transfer.target_amount, TokenAmount::zero())
	} else {
		(payer_transfer.amount - payee_route.fee, payer_transfer.fee - payee_route.fee)
	};

	let message_identifier = chain_state.pseudo_random_number_generator.next();
	let mediated_transfer = channel::send_mediated_transfer(
		&mut payee_channel,
		payer_transfer.initiator,
		payer_transfer.target,
		amount,
		payer_transfer.target_amount,
		fee_budget,
		lock_expiration,
		payer_transfer.secrethash,
		payer_transfer.secret,
		message_identifier,
	)
	.map_err(|e| StateTransitionError { msg: e.to_string() })?;
	update_channel(&mut chain_state, payee_channel)?;

	let payee_transfer = mediated_transfer.transfer.clone();
	mediator_state.transfers_pair.push(MediationPairState::new(
		payer_route,
		payee_route,
		payer_transfer,
		payee_transfer,
	));

	Ok(MediatorTransition {
		new_state: Some(mediator_state),
		chain_state,
		events: vec![mediated_transfer.into()],
	})
}

/// Register the received transfer and start mediating it.
fn handle_init(mut chain_state: ChainState, state_change: ActionInitMediator) -> TransitionResult {
	let from_route = state_change.from_route;
	let from_transfer = state_change.from_transfer;

	let mut payer_channel = match views::get_channel(&chain_state, from_route.channel_identifier) {
		Some(channel_state) => channel_state.clone(),
		None => return Ok(MediatorTransition { new_state: None, chain_state, events: vec![] }),
	};

	if let Err(e) = channel::handle_receive_mediated_transfer(
		&mut payer_channel,
		&from_transfer,
		&state_change.envelope,
		chain_state.block_number,
	) {
		debug!(reason = %e, "refusing to mediate invalid transfer");
		return Ok(MediatorTransition { new_state: None, chain_state, events: vec![] })
	}

	// Anti-flooding: a payer hop that already has more locks outstanding
	// than its reveal timeout gets an immediate refusal.
	let lock_count = payer_channel.partner_state.count_pending_locks() as u64;
	let reveal_timeout = payer_channel.reveal_timeout.as_u64();
	update_channel(&mut chain_state, payer_channel)?;

	if lock_count > reveal_timeout {
		let events = events_for_refund(
			&mut chain_state,
			&from_route,
			&from_transfer,
			DISPOSED_TOO_MANY_LOCKS,
			ChannelError::RejectBecauseHoldingTooMuchLock.to_string(),
		);
		return Ok(MediatorTransition { new_state: None, chain_state, events })
	}

	let mediator_state = MediatorState {
		our_address: chain_state.our_address,
		routes: RoutesState::new(state_change.routes),
		block_number: chain_state.block_number,
		secrethash: from_transfer.secrethash,
		secret: None,
		token: from_transfer.token,
		transfers_pair: vec![],
	};

	mediate_transfer(chain_state, mediator_state, from_route, from_transfer)
}

/// Expire pairs whose locks outlived their windows. Every expiry is
/// reported exactly once; a pair expiring twice is silently absorbed.
fn events_for_expired_pairs(
	chain_state: &mut ChainState,
	mediator_state: &mut MediatorState,
	block_number: BlockNumber,
) -> Vec<Event> {
	let mut events: Vec<Event> = vec![];
	let secrethash = mediator_state.secrethash;

	let mut remove_expired_channels = vec![];
	for pair in pending_pairs(&mut mediator_state.transfers_pair) {
		if block_number > pair.payer_transfer.expiration &&
			pair.payer_state != PayerState::Expired
		{
			assert!(
				pair.payee_transfer.expiration <= pair.payer_transfer.expiration,
				"the payee lock must never outlive the payer lock"
			);
			pair.payer_state = PayerState::Expired;
			events.push(
				WithdrawFailed { secrethash, reason: "lock expired".to_owned() }.into(),
			);
		}

		if channel::validators::is_lock_expired(pair.payee_transfer.expiration, block_number) &&
			pair.payee_state != PayeeState::Expired
		{
			pair.payee_state = PayeeState::Expired;
			remove_expired_channels.push(pair.payee_route.channel_identifier);
			events.push(UnlockFailed { secrethash, reason: "lock expired".to_owned() }.into());
		}
	}

	// Rebuild the payee trees without the dead locks.
	for channel_identifier in remove_expired_channels {
		if let Some(channel_state) = views::get_channel(chain_state, channel_identifier) {
			let mut channel_state = channel_state.clone();
			let message_identifier = chain_state.pseudo_random_number_generator.next();
			if let Ok(remove_expired) = channel::send_remove_expired_lock(
				&mut channel_state,
				secrethash,
				block_number,
				message_identifier,
			) {
				let _ = update_channel(chain_state, channel_state);
				events.push(remove_expired.into());
			}
		}
	}

	events
}

/// Register the secret on-chain when waiting any longer would forfeit the
/// payer lock. At most one registration transaction is sent; every
/// affected pair moves to `WaitingRegisterSecret`.
fn events_for_register_secret(
	chain_state: &mut ChainState,
	mediator_state: &mut MediatorState,
	block_number: BlockNumber,
) -> Vec<Event> {
	let secret = match &mediator_state.secret {
		Some(secret) => *secret,
		None => return vec![],
	};

	let mut events = vec![];
	let mut transaction_sent = mediator_state
		.transfers_pair
		.iter()
		.any(|pair| pair.payer_state == PayerState::WaitingRegisterSecret);

	for pair in pending_pairs(&mut mediator_state.transfers_pair) {
		let payer_channel =
			match chain_state.channels.get(&pair.payer_route.channel_identifier) {
				Some(channel_state) => channel_state,
				None => continue,
			};
		if is_secret_register_needed(pair, payer_channel, block_number) {
			pair.payer_state = PayerState::WaitingRegisterSecret;
			if !transaction_sent {
				events.extend(secret_registry::events_for_onchain_secret_registration(
					secret,
					pair.payer_transfer.expiration,
					block_number,
				));
				transaction_sent = true;
			}
		}
	}
	events
}

/// Block tick: expire dead pairs and check the danger zone.
fn handle_block(
	mut chain_state: ChainState,
	mediator_state: Option<MediatorState>,
	state_change: Block,
) -> TransitionResult {
	let mut mediator_state = match mediator_state {
		Some(mediator_state) => mediator_state,
		None =>
			return Err(StateTransitionError {
				msg: "Block requires a valid mediator state".to_owned(),
			}),
	};
	mediator_state.block_number = state_change.block_number;

	let mut events = events_for_expired_pairs(
		&mut chain_state,
		&mut mediator_state,
		state_change.block_number,
	);
	events.extend(events_for_register_secret(
		&mut chain_state,
		&mut mediator_state,
		state_change.block_number,
	));

	Ok(MediatorTransition { new_state: Some(mediator_state), chain_state, events })
}

/// The payee hop refuses the transfer and hands the lock back. Pop the
/// pair, confirm the disposal and retry over another route.
fn handle_announce_disposed(
	mut chain_state: ChainState,
	mediator_state: Option<MediatorState>,
	state_change: ReceiveAnnounceDisposed,
) -> TransitionResult {
	let mut mediator_state = match mediator_state {
		Some(mediator_state) => mediator_state,
		None =>
			return Err(StateTransitionError {
				msg: "ReceiveAnnounceDisposed requires a valid mediator state".to_owned(),
			}),
	};

	if mediator_state.secret.is_some() || mediator_state.transfers_pair.is_empty() {
		return Ok(MediatorTransition {
			new_state: Some(mediator_state),
			chain_state,
			events: vec![],
		})
	}

	// Only the last sent transfer may be refused, all previous ones were
	// refused already.
	let last_pair = mediator_state.transfers_pair.last().expect("Checked above");
	let payee_transfer = last_pair.payee_transfer.clone();
	let payee_route = last_pair.payee_route.clone();
	let payer_route = last_pair.payer_route.clone();
	let payer_transfer = last_pair.payer_transfer.clone();

	let unexpired = chain_state.block_number < payee_transfer.expiration;
	if !unexpired ||
		!is_valid_disposed_refund(&payee_transfer, &payee_route, &state_change)
	{
		return Ok(MediatorTransition {
			new_state: Some(mediator_state),
			chain_state,
			events: vec![],
		})
	}

	let mut payee_channel = match views::get_channel(&chain_state, payee_route.channel_identifier)
	{
		Some(channel_state) => channel_state.clone(),
		None =>
			return Ok(MediatorTransition {
				new_state: Some(mediator_state),
				chain_state,
				events: vec![],
			}),
	};
	let message_identifier = chain_state.pseudo_random_number_generator.next();
	let response = match channel::handle_receive_announce_disposed(
		&mut payee_channel,
		&state_change,
		chain_state.block_number,
		message_identifier,
	) {
		Ok(response) => response,
		Err(e) => {
			debug!(reason = %e, "ignoring invalid disposal");
			return Ok(MediatorTransition {
				new_state: Some(mediator_state),
				chain_state,
				events: vec![],
			})
		},
	};
	update_channel(&mut chain_state, payee_channel)?;

	mediator_state.transfers_pair.pop();
	mediator_state.routes.canceled_routes.push(payee_route);

	let retry = mediate_transfer(chain_state, mediator_state, payer_route, payer_transfer)?;
	let mut events = vec![response.into()];
	events.extend(retry.events);
	Ok(MediatorTransition {
		new_state: retry.new_state,
		chain_state: retry.chain_state,
		events,
	})
}

/// Mark the payee that revealed the secret.
fn set_offchain_reveal_state(
	transfers_pair: &mut [MediationPairState],
	payee_address: Address,
) {
	for pair in transfers_pair {
		if pair.payee_route.hop_node == payee_address {
			pair.payee_state = PayeeState::SecretRevealed;
		}
	}
}

/// Make the secret known to every channel involved in the mediation.
fn register_secret_everywhere(
	chain_state: &mut ChainState,
	mediator_state: &MediatorState,
	secret: Secret,
	on_chain_block: Option<BlockNumber>,
) {
	let mut channel_identifiers: Vec<ChannelIdentifier> = vec![];
	for pair in &mediator_state.transfers_pair {
		channel_identifiers.push(pair.payer_route.channel_identifier);
		channel_identifiers.push(pair.payee_route.channel_identifier);
	}
	channel_identifiers.dedup();

	for channel_identifier in channel_identifiers {
		if let Some(channel_state) = views::get_channel(chain_state, channel_identifier) {
			let mut channel_state = channel_state.clone();
			match on_chain_block {
				Some(block_number) => channel::register_onchain_secret(
					&mut channel_state,
					secret,
					mediator_state.secrethash,
					block_number,
				),
				None => {
					let _ = channel::register_secret(&mut channel_state, secret);
				},
			}
			let _ = update_channel(chain_state, channel_state);
		}
	}
}

/// Propagate the secret backwards: where the payee knows but the payer
/// does not, reveal to the payer hop.
fn events_for_secret_reveal(
	chain_state: &mut ChainState,
	transfers_pair: &mut [MediationPairState],
	secret: Secret,
) -> Vec<Event> {
	let mut events: Vec<Event> = vec![];
	for pair in transfers_pair.iter_mut().rev() {
		let payee_knows = PAYEE_STATE_SECRET_KNOWN.contains(&pair.payee_state);
		let payer_knows = PAYER_STATE_SECRET_KNOWN.contains(&pair.payer_state);
		let payer_pending = pair.payer_state == PayerState::Pending;
		if payee_knows && !payer_knows && payer_pending {
			pair.payer_state = PayerState::SecretRevealed;
			let message_identifier = chain_state.pseudo_random_number_generator.next();
			events.push(
				SendSecretReveal {
					inner: SendMessageEventInner {
						recipient: pair.payer_route.hop_node,
						canonical_identifier: pair.payer_transfer.channel_identifier.clone(),
						message_identifier,
					},
					secret,
					secrethash: hash_secret(secret.as_bytes()),
				}
				.into(),
			);
		}
	}
	events
}

/// Pay the payees that know the secret, while it is still safe: the payer
/// lock must not be inside its reveal-timeout danger zone and both
/// channels must be open.
fn events_for_balance_proof(
	chain_state: &mut ChainState,
	transfers_pair: &mut [MediationPairState],
	secrethash: SecretHash,
) -> Vec<Event> {
	let mut events: Vec<Event> = vec![];
	let block_number = chain_state.block_number;

	for pair in transfers_pair.iter_mut().rev() {
		let payee_knows = PAYEE_STATE_SECRET_KNOWN.contains(&pair.payee_state);
		let payee_paid = PAYEE_STATE_TRANSFER_PAID.contains(&pair.payee_state);

		let payee_channel =
			match views::get_channel(chain_state, pair.payee_route.channel_identifier) {
				Some(channel_state) => channel_state.clone(),
				None => continue,
			};
		let payer_channel_open =
			match views::get_channel(chain_state, pair.payer_route.channel_identifier) {
				Some(channel_state) => channel_state.status() == ChannelStatus::Opened,
				None => false,
			};
		let payee_channel_open = payee_channel.status() == ChannelStatus::Opened;

		let lock_valid = block_number <= pair.payee_transfer.expiration;

		// If the payer lock is in the danger zone the on-chain registration
		// must happen first; paying the payee now could lose the payer lock.
		let payer_safe = channel::validators::is_safe_to_wait(
			pair.payer_transfer.expiration,
			pair.payer_route.reveal_timeout,
			block_number,
		);

		if payee_channel_open && payer_channel_open && payee_knows && !payee_paid &&
			lock_valid && payer_safe
		{
			let mut payee_channel = payee_channel;
			let message_identifier = chain_state.pseudo_random_number_generator.next();
			if let Ok(balance_proof) = channel::send_balance_proof(
				&mut payee_channel,
				secrethash,
				message_identifier,
			) {
				let _ = update_channel(chain_state, payee_channel);
				pair.payee_state = PayeeState::BalanceProof;
				events.push(balance_proof.into());
				events.push(UnlockSuccess { secrethash }.into());
			}
		}
	}
	events
}

/// All bookkeeping that follows learning the secret off-chain.
fn secret_learned(
	mut chain_state: ChainState,
	mut mediator_state: MediatorState,
	secret: Secret,
	payee_address: Address,
) -> TransitionResult {
	mediator_state.secret = Some(secret);
	register_secret_everywhere(&mut chain_state, &mediator_state, secret, None);
	set_offchain_reveal_state(&mut mediator_state.transfers_pair, payee_address);

	let secrethash = mediator_state.secrethash;
	let mut events =
		events_for_secret_reveal(&mut chain_state, &mut mediator_state.transfers_pair, secret);
	events.extend(events_for_balance_proof(
		&mut chain_state,
		&mut mediator_state.transfers_pair,
		secrethash,
	));
	let block_number = chain_state.block_number;
	events.extend(events_for_register_secret(
		&mut chain_state,
		&mut mediator_state,
		block_number,
	));

	Ok(MediatorTransition { new_state: Some(mediator_state), chain_state, events })
}

/// A SecretReveal arrived off-chain.
fn handle_secret_reveal(
	chain_state: ChainState,
	mediator_state: Option<MediatorState>,
	state_change: ReceiveSecretReveal,
) -> TransitionResult {
	let mediator_state = match mediator_state {
		Some(mediator_state) => mediator_state,
		None =>
			return Err(StateTransitionError {
				msg: "ReceiveSecretReveal requires a valid mediator state".to_owned(),
			}),
	};

	if mediator_state.transfers_pair.is_empty() {
		// Attackers may probe with unsolicited reveals.
		return Ok(MediatorTransition {
			new_state: Some(mediator_state),
			chain_state,
			events: vec![],
		})
	}

	let is_valid = hash_secret(state_change.secret.as_bytes()) == mediator_state.secrethash &&
		state_change.secrethash == mediator_state.secrethash;
	let already_known = mediator_state.secret.is_some();

	// A reveal after the payer transfer expired must be rejected, the
	// lock can no longer be claimed.
	let last_pair = mediator_state.transfers_pair.last().expect("Checked above");
	let payer_expired =
		chain_state.block_number > last_pair.payer_transfer.expiration + FORK_CONFIRM_NUMBER;

	if is_valid && !already_known && !payer_expired {
		return secret_learned(
			chain_state,
			mediator_state,
			state_change.secret,
			state_change.sender,
		)
	}

	Ok(MediatorTransition { new_state: Some(mediator_state), chain_state, events: vec![] })
}

/// The secret appeared on-chain: pay the payees whose locks still stand,
/// and claim payer locks in closed channels on-chain.
fn handle_contract_secret_reveal(
	mut chain_state: ChainState,
	mediator_state: Option<MediatorState>,
	state_change: ContractReceiveSecretReveal,
) -> TransitionResult {
	let mut mediator_state = match mediator_state {
		Some(mediator_state) => mediator_state,
		None =>
			return Err(StateTransitionError {
				msg: "ContractReceiveSecretReveal requires a valid mediator state".to_owned(),
			}),
	};

	if state_change.secrethash != mediator_state.secrethash {
		return Ok(MediatorTransition {
			new_state: Some(mediator_state),
			chain_state,
			events: vec![],
		})
	}

	mediator_state.secret = Some(state_change.secret);
	register_secret_everywhere(
		&mut chain_state,
		&mediator_state,
		state_change.secret,
		Some(state_change.block_number),
	);
	for pair in &mut mediator_state.transfers_pair {
		if PAYEE_STATE_SECRET_KNOWN.contains(&pair.payee_state) {
			continue
		}
		pair.payee_state = PayeeState::SecretRevealed;
	}

	let secrethash = mediator_state.secrethash;
	let mut events = events_for_balance_proof(
		&mut chain_state,
		&mut mediator_state.transfers_pair,
		secrethash,
	);

	// Payer channels that are closed can only be claimed on-chain.
	for pair in &mut mediator_state.transfers_pair {
		let payer_channel =
			match views::get_channel(&chain_state, pair.payer_route.channel_identifier) {
				Some(channel_state) => channel_state.clone(),
				None => continue,
			};
		if payer_channel.status() == ChannelStatus::Closed {
			pair.payer_state = PayerState::WaitingRegisterSecret;
			events.extend(channel::events_for_onchain_unlocks(&payer_channel));
		}
	}

	Ok(MediatorTransition { new_state: Some(mediator_state), chain_state, events })
}

/// The payer hop paid our lock with a new balance proof. The channel-level
/// registration already happened; account for it and retry paying the
/// payee if that is still outstanding.
fn handle_unlock(
	mut chain_state: ChainState,
	mediator_state: Option<MediatorState>,
	state_change: ReceiveUnlock,
) -> TransitionResult {
	let mut mediator_state = match mediator_state {
		Some(mediator_state) => mediator_state,
		None =>
			return Err(StateTransitionError {
				msg: "ReceiveUnlock requires a valid mediator state".to_owned(),
			}),
	};

	if state_change.secrethash != mediator_state.secrethash {
		return Ok(MediatorTransition {
			new_state: Some(mediator_state),
			chain_state,
			events: vec![],
		})
	}
	mediator_state.secret = Some(state_change.secret);

	let mut events: Vec<Event> = vec![];
	let secrethash = mediator_state.secrethash;
	for pair in mediator_state.transfers_pair.iter_mut() {
		if pair.payer_route.hop_node == state_change.envelope.sender {
			pair.payer_state = PayerState::BalanceProof;
			events.push(WithdrawSuccess { secrethash }.into());
		}
	}
	// The payer paid us; if the payee is still unpaid, retry now.
	events.extend(events_for_balance_proof(
		&mut chain_state,
		&mut mediator_state.transfers_pair,
		secrethash,
	));

	Ok(MediatorTransition { new_state: Some(mediator_state), chain_state, events })
}

/// The payee route's channel was emptied by a withdraw or a cooperative
/// settle: the forwarded lock is moot, retry over another route. The same
/// event on a payer route is a protocol violation.
fn handle_route_channel_gone(
	chain_state: ChainState,
	mediator_state: Option<MediatorState>,
	channel_identifier: ChannelIdentifier,
) -> TransitionResult {
	let mut mediator_state = match mediator_state {
		Some(mediator_state) => mediator_state,
		None =>
			return Err(StateTransitionError {
				msg: "state change requires a valid mediator state".to_owned(),
			}),
	};

	for pair in &mediator_state.transfers_pair {
		assert!(
			pair.payer_route.channel_identifier != channel_identifier,
			"the payer channel {} was emptied while mediating, this is a protocol violation",
			channel_identifier,
		);
	}

	let affected = mediator_state
		.transfers_pair
		.last()
		.map(|pair| pair.payee_route.channel_identifier == channel_identifier)
		.unwrap_or(false);
	if !affected {
		return Ok(MediatorTransition {
			new_state: Some(mediator_state),
			chain_state,
			events: vec![],
		})
	}

	let pair = mediator_state.transfers_pair.pop().expect("Checked above");
	mediator_state.routes.canceled_routes.push(pair.payee_route);
	mediate_transfer(chain_state, mediator_state, pair.payer_route, pair.payer_transfer)
}

/// Retire the state manager once every pair is fully paid on both sides.
fn clear_if_finalized(transition: MediatorTransition) -> MediatorTransition {
	let mediator_state = match &transition.new_state {
		Some(state) => state,
		None => return transition,
	};
	if mediator_state.transfers_pair.is_empty() {
		return transition
	}
	let all_paid = mediator_state.transfers_pair.iter().all(|pair| {
		PAYEE_STATE_TRANSFER_PAID.contains(&pair.payee_state) &&
			PAYER_STATE_TRANSFER_PAID.contains(&pair.payer_state)
	});
	if !all_paid {
		return transition
	}

	let key = payment_task_key(mediator_state.secrethash, mediator_state.token);
	let mut events = transition.events;
	events.push(RemoveStateManager { key }.into());
	MediatorTransition { new_state: None, chain_state: transition.chain_state, events }
}

/// Invariants that must hold after every transition. A violation is an
/// implementation bug, never a peer input error, so it aborts.
fn sanity_check(transition: &MediatorTransition) {
	let mediator_state = match &transition.new_state {
		Some(state) => state,
		None => return,
	};

	for pair in &mediator_state.transfers_pair {
		assert!(
			pair.payer_transfer.secrethash == mediator_state.secrethash,
			"all pairs must share the state's secret hash"
		);
		assert!(
			pair.payer_transfer.expiration >= pair.payee_transfer.expiration,
			"the payee lock must not outlive the payer lock"
		);
		assert!(
			is_send_transfer_almost_equal(&pair.payee_transfer, &pair.payer_transfer),
			"payer and payee transfers of one pair diverged"
		);

		let paid = PAYEE_STATE_TRANSFER_PAID.contains(&pair.payee_state) ||
			PAYER_STATE_TRANSFER_PAID.contains(&pair.payer_state);
		assert!(
			!paid || mediator_state.secret.is_some(),
			"a transfer was paid but the secret is unknown"
		);
	}

	if mediator_state.transfers_pair.len() >= 2 {
		for window in mediator_state.transfers_pair.windows(2) {
			let (original, refund) = (&window[0], &window[1]);
			assert!(
				is_send_transfer_almost_equal(&original.payee_transfer, &refund.payer_transfer),
				"consecutive pairs do not chain"
			);
			assert!(
				original.payee_transfer.expiration >= refund.payer_transfer.expiration,
				"a refunding hop extended the lock lifetime"
			);
		}
	}
}

/// The mediator state machine: a pure function from a state change to the
/// next state plus emitted events.
pub fn state_transition(
	chain_state: ChainState,
	mediator_state: Option<MediatorState>,
	state_change: StateChange,
) -> TransitionResult {
	let transition = match state_change {
		StateChange::ActionInitMediator(inner) => handle_init(chain_state, inner),
		StateChange::Block(inner) => handle_block(chain_state, mediator_state, inner),
		StateChange::ReceiveAnnounceDisposed(inner) =>
			handle_announce_disposed(chain_state, mediator_state, inner),
		StateChange::ReceiveSecretReveal(inner) =>
			handle_secret_reveal(chain_state, mediator_state, inner),
		StateChange::ContractReceiveSecretReveal(inner) =>
			handle_contract_secret_reveal(chain_state, mediator_state, inner),
		StateChange::ReceiveUnlock(inner) => handle_unlock(chain_state, mediator_state, inner),
		StateChange::ContractReceiveChannelWithdraw(ContractReceiveChannelWithdraw {
			channel_identifier,
			..
		}) => handle_route_channel_gone(chain_state, mediator_state, channel_identifier),
		StateChange::ContractReceiveChannelCooperativeSettled(
			ContractReceiveChannelCooperativeSettled { channel_identifier, .. },
		) => handle_route_channel_gone(chain_state, mediator_state, channel_identifier),
		_ =>
			return Ok(MediatorTransition {
				new_state: mediator_state,
				chain_state,
				events: vec![],
			}),
	}?;

	sanity_check(&transition);
	Ok(clear_if_finalized(transition))
}
