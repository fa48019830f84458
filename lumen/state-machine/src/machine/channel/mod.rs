#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::{
	constants::PUNISHED_NONCE,
	hashing::hash_secret,
	types::{
		Address,
		BlockExpiration,
		BlockNumber,
		FeeAmount,
		Locksroot,
		MessageIdentifier,
		Nonce,
		Secret,
		SecretHash,
		TokenAmount,
	},
};
use tracing::{
	debug,
	error,
	warn,
};

use self::validators::{
	is_valid_direct_transfer,
	is_valid_mediated_transfer,
	is_valid_remove_lock,
	is_valid_unlock,
	validate_envelope,
	EnvelopeSide,
};
use crate::{
	errors::ChannelError,
	types::{
		BalanceProofState,
		ChannelState,
		ChannelStatus,
		ContractReceiveBalanceProofUpdated,
		ContractReceiveChannelClosed,
		ContractReceiveChannelDeposit,
		ContractReceiveChannelUnlocked,
		ContractReceiveChannelWithdraw,
		Envelope,
		Event,
		HashTimeLockState,
		LockedTransferState,
		PendingLock,
		ReceiveAnnounceDisposed,
		ReceiveAnnounceDisposedResponse,
		ReceiveDirectTransfer,
		ReceiveRemoveExpiredLock,
		ReceiveSettleRequest,
		ReceiveSettleResponse,
		ReceiveUnlock,
		ReceiveWithdrawRequest,
		ReceiveWithdrawResponse,
		SendAnnounceDisposed,
		SendAnnounceDisposedResponse,
		SendBalanceProof,
		SendDirectTransfer,
		SendMediatedTransfer,
		SendMessageEventInner,
		SendRemoveExpiredLock,
		SendSettleRequest,
		SendSettleResponse,
		SendWithdrawRequest,
		SendWithdrawResponse,
		SettlementAgreement,
		ContractSendChannelCooperativeSettle,
		ContractSendChannelUnlock,
		ContractSendChannelUpdateTransfer,
		ContractSendChannelWithdraw,
	},
};

/// Channel message and action validators.
pub mod validators;
/// Channel views.
pub mod views;

/// Build the unsigned balance proof our next envelope will carry. The
/// signature is applied by the outgoing message layer.
fn make_balance_proof(
	channel_state: &ChannelState,
	nonce: Nonce,
	transferred_amount: TokenAmount,
	locksroot: Locksroot,
) -> BalanceProofState {
	BalanceProofState {
		nonce,
		transferred_amount,
		locksroot,
		canonical_identifier: channel_state.canonical_identifier.clone(),
		message_hash: None,
		signature: None,
		sender: Some(channel_state.our_state.address),
	}
}

/// Balance proof carried by a received envelope.
fn balance_proof_from_envelope(envelope: &Envelope) -> BalanceProofState {
	BalanceProofState {
		nonce: envelope.nonce,
		transferred_amount: envelope.transferred_amount,
		locksroot: envelope.locksroot,
		canonical_identifier: envelope.canonical_identifier.clone(),
		message_hash: None,
		signature: Some(envelope.signature.clone()),
		sender: Some(envelope.sender),
	}
}

/// Resolve the envelope's sender side, requiring it to be the partner.
/// Envelopes authored by this node are applied when they are built, so a
/// copy looping back is always a protocol error.
fn partner_envelope_side(
	channel_state: &ChannelState,
	envelope: &Envelope,
) -> Result<(), ChannelError> {
	match validate_envelope(channel_state, envelope)? {
		EnvelopeSide::Partner => Ok(()),
		EnvelopeSide::Our => Err(ChannelError::InvalidSender),
	}
}

/// Gate shared by every balance-proof-bearing message.
fn reject_after_close(channel_state: &ChannelState) -> Result<(), ChannelError> {
	if channel_state.is_closed() {
		return Err(ChannelError::UpdateBalanceProofAfterClosed)
	}
	Ok(())
}

/// Create and apply a direct transfer of `amount` to the partner. The new
/// balance proof carries the increased transferred amount and the unchanged
/// locks root.
pub fn send_direct_transfer(
	channel_state: &mut ChannelState,
	amount: TokenAmount,
	message_identifier: MessageIdentifier,
) -> Result<SendDirectTransfer, ChannelError> {
	if !channel_state.can_transfer() {
		return Err(ChannelError::InvalidChannelState(channel_state.status()))
	}
	let distributable = channel_state.distributable();
	if amount.is_zero() || amount > distributable {
		return Err(ChannelError::InsufficientBalance { amount, distributable })
	}

	let nonce = channel_state.our_state.next_nonce();
	let transferred_amount = channel_state.our_state.transferred_amount() + amount;
	let locksroot = channel_state.our_state.locksroot();
	let balance_proof = make_balance_proof(channel_state, nonce, transferred_amount, locksroot);
	channel_state.our_state.balance_proof = Some(balance_proof.clone());

	Ok(SendDirectTransfer {
		inner: SendMessageEventInner {
			recipient: channel_state.partner_state.address,
			canonical_identifier: channel_state.canonical_identifier.clone(),
			message_identifier,
		},
		balance_proof,
		amount,
	})
}

/// Create and apply an outgoing mediated transfer: a new lock enters our
/// tree, the transferred amount stays unchanged.
#[allow(clippy::too_many_arguments)]
pub fn send_mediated_transfer(
	channel_state: &mut ChannelState,
	initiator: Address,
	target: Address,
	amount: TokenAmount,
	target_amount: TokenAmount,
	fee: FeeAmount,
	expiration: BlockExpiration,
	secrethash: SecretHash,
	secret: Option<Secret>,
	message_identifier: MessageIdentifier,
) -> Result<SendMediatedTransfer, ChannelError> {
	if !channel_state.can_transfer() {
		return Err(ChannelError::InvalidChannelState(channel_state.status()))
	}
	let distributable = channel_state.distributable();
	if amount.is_zero() || amount > distributable {
		return Err(ChannelError::InsufficientBalance { amount, distributable })
	}

	let lock = HashTimeLockState::new(amount, expiration, secrethash);
	let new_tree = channel_state
		.our_state
		.lock_tree
		.add(secrethash, lock.leaf())
		.ok_or(ChannelError::LockMismatch)?;
	let locksroot = new_tree.root();
	let nonce = channel_state.our_state.next_nonce();
	let transferred_amount = channel_state.our_state.transferred_amount();
	let balance_proof =
		make_balance_proof(channel_state, nonce, transferred_amount, locksroot);

	let merkle_position = new_tree.len() - 1;
	channel_state.our_state.balance_proof = Some(balance_proof.clone());
	channel_state.our_state.set_lock_tree(new_tree);
	channel_state
		.our_state
		.pending_locks
		.insert(secrethash, PendingLock { lock, merkle_position });

	let transfer = LockedTransferState {
		channel_identifier: channel_state.canonical_identifier.clone(),
		token: channel_state.token_address,
		initiator,
		target,
		amount,
		target_amount,
		fee,
		expiration,
		secrethash,
		secret,
	};

	Ok(SendMediatedTransfer {
		inner: SendMessageEventInner {
			recipient: channel_state.partner_state.address,
			canonical_identifier: channel_state.canonical_identifier.clone(),
			message_identifier,
		},
		transfer,
		balance_proof,
	})
}

/// Create and apply the Unlock envelope for a lock whose secret we know:
/// the transferred amount grows by the lock amount and the lock leaves the
/// tree.
pub fn send_balance_proof(
	channel_state: &mut ChannelState,
	secrethash: SecretHash,
	message_identifier: MessageIdentifier,
) -> Result<SendBalanceProof, ChannelError> {
	reject_after_close(channel_state)?;
	let unlock = channel_state
		.our_state
		.unclaimed_locks
		.get(&secrethash)
		.cloned()
		.ok_or(ChannelError::LockSecretHashNotFound)?;

	let (new_tree, _) = channel_state
		.our_state
		.lock_tree
		.remove(secrethash)
		.ok_or(ChannelError::LockMismatch)?;
	let locksroot = new_tree.root();
	let nonce = channel_state.our_state.next_nonce();
	let transferred_amount = channel_state.our_state.transferred_amount() + unlock.lock.amount;
	let balance_proof =
		make_balance_proof(channel_state, nonce, transferred_amount, locksroot);

	channel_state.our_state.balance_proof = Some(balance_proof.clone());
	channel_state.our_state.set_lock_tree(new_tree);
	channel_state.our_state.unclaimed_locks.remove(&secrethash);

	Ok(SendBalanceProof {
		inner: SendMessageEventInner {
			recipient: channel_state.partner_state.address,
			canonical_identifier: channel_state.canonical_identifier.clone(),
			message_identifier,
		},
		balance_proof,
		secret: unlock.secret,
		secrethash,
	})
}

/// Shared tail of the two lock-removal envelopes: rebuild the tree without
/// the lock, transferred amount untouched.
fn send_remove_lock(
	channel_state: &mut ChannelState,
	secrethash: SecretHash,
	block_number: BlockNumber,
	must_be_expired: bool,
) -> Result<BalanceProofState, ChannelError> {
	reject_after_close(channel_state)?;
	let (_, new_tree, locksroot) = channel_state.our_state.try_remove_hash_lock(
		secrethash,
		block_number,
		must_be_expired,
	)?;
	let nonce = channel_state.our_state.next_nonce();
	let transferred_amount = channel_state.our_state.transferred_amount();
	let balance_proof =
		make_balance_proof(channel_state, nonce, transferred_amount, locksroot);

	channel_state.our_state.balance_proof = Some(balance_proof.clone());
	channel_state.our_state.set_lock_tree(new_tree);
	channel_state.our_state.pending_locks.remove(&secrethash);

	Ok(balance_proof)
}

/// Notify the partner that an expired lock was pruned from our tree.
pub fn send_remove_expired_lock(
	channel_state: &mut ChannelState,
	secrethash: SecretHash,
	block_number: BlockNumber,
	message_identifier: MessageIdentifier,
) -> Result<SendRemoveExpiredLock, ChannelError> {
	let balance_proof = send_remove_lock(channel_state, secrethash, block_number, true)?;
	Ok(SendRemoveExpiredLock {
		inner: SendMessageEventInner {
			recipient: channel_state.partner_state.address,
			canonical_identifier: channel_state.canonical_identifier.clone(),
			message_identifier,
		},
		balance_proof,
		secrethash,
	})
}

/// Confirm a disposal the partner announced: the lock leaves our tree with
/// no expiration requirement.
pub fn send_announce_disposed_response(
	channel_state: &mut ChannelState,
	secrethash: SecretHash,
	block_number: BlockNumber,
	message_identifier: MessageIdentifier,
) -> Result<SendAnnounceDisposedResponse, ChannelError> {
	let balance_proof = send_remove_lock(channel_state, secrethash, block_number, false)?;
	Ok(SendAnnounceDisposedResponse {
		inner: SendMessageEventInner {
			recipient: channel_state.partner_state.address,
			canonical_identifier: channel_state.canonical_identifier.clone(),
			message_identifier,
		},
		balance_proof,
		secrethash,
	})
}

/// Give up a lock the partner sent us. The partner's tree is only updated
/// once its response envelope arrives.
pub fn send_announce_disposed(
	channel_state: &ChannelState,
	secrethash: SecretHash,
	block_number: BlockNumber,
	error_code: u32,
	error_msg: String,
	message_identifier: MessageIdentifier,
) -> Result<SendAnnounceDisposed, ChannelError> {
	let (lock, _, _) =
		channel_state.partner_state.try_remove_hash_lock(secrethash, block_number, false)?;
	Ok(SendAnnounceDisposed {
		inner: SendMessageEventInner {
			recipient: channel_state.partner_state.address,
			canonical_identifier: channel_state.canonical_identifier.clone(),
			message_identifier,
		},
		lock,
		error_code,
		error_msg,
	})
}

/// Register a received DirectTransfer envelope.
pub fn handle_receive_direct_transfer(
	channel_state: &mut ChannelState,
	state_change: &ReceiveDirectTransfer,
) -> Result<TokenAmount, ChannelError> {
	reject_after_close(channel_state)?;
	let envelope = &state_change.envelope;
	partner_envelope_side(channel_state, envelope)?;
	let amount = is_valid_direct_transfer(
		envelope,
		&channel_state.partner_state,
		&channel_state.our_state,
	)?;
	channel_state.partner_state.balance_proof = Some(balance_proof_from_envelope(envelope));
	Ok(amount)
}

/// Register a received MediatedTransfer envelope: a new lock enters the
/// partner's tree.
pub fn handle_receive_mediated_transfer(
	channel_state: &mut ChannelState,
	transfer: &LockedTransferState,
	envelope: &Envelope,
	block_number: BlockNumber,
) -> Result<(), ChannelError> {
	reject_after_close(channel_state)?;
	partner_envelope_side(channel_state, envelope)?;
	is_valid_mediated_transfer(
		channel_state,
		envelope,
		transfer,
		&channel_state.partner_state,
		&channel_state.our_state,
		block_number,
	)?;

	let lock = HashTimeLockState::new(transfer.amount, transfer.expiration, transfer.secrethash);
	let new_tree = channel_state
		.partner_state
		.lock_tree
		.add(lock.secrethash, lock.leaf())
		.ok_or(ChannelError::LockMismatch)?;
	let merkle_position = new_tree.len() - 1;
	channel_state.partner_state.balance_proof = Some(balance_proof_from_envelope(envelope));
	channel_state.partner_state.set_lock_tree(new_tree);
	channel_state
		.partner_state
		.pending_locks
		.insert(lock.secrethash, PendingLock { lock, merkle_position });
	Ok(())
}

/// Register a received Unlock envelope: the revealed secret claims a known
/// pending lock.
pub fn handle_receive_unlock(
	channel_state: &mut ChannelState,
	state_change: &ReceiveUnlock,
) -> Result<HashTimeLockState, ChannelError> {
	reject_after_close(channel_state)?;
	let envelope = &state_change.envelope;
	partner_envelope_side(channel_state, envelope)?;

	let secrethash = hash_secret(state_change.secret.as_bytes());
	if secrethash != state_change.secrethash ||
		!channel_state.partner_state.is_known(secrethash)
	{
		return Err(ChannelError::LockSecretHashNotFound)
	}
	let lock = is_valid_unlock(envelope, &channel_state.partner_state, secrethash)?;

	let (new_tree, _) = channel_state
		.partner_state
		.lock_tree
		.remove(secrethash)
		.ok_or(ChannelError::LockMismatch)?;
	channel_state.partner_state.balance_proof = Some(balance_proof_from_envelope(envelope));
	channel_state.partner_state.set_lock_tree(new_tree);
	channel_state.partner_state.pending_locks.remove(&secrethash);
	channel_state.partner_state.unclaimed_locks.remove(&secrethash);
	Ok(lock)
}

/// Shared tail of the two received lock-removal envelopes.
fn handle_receive_remove_lock(
	channel_state: &mut ChannelState,
	envelope: &Envelope,
	secrethash: SecretHash,
	block_number: BlockNumber,
	must_be_expired: bool,
) -> Result<HashTimeLockState, ChannelError> {
	reject_after_close(channel_state)?;
	partner_envelope_side(channel_state, envelope)?;
	let lock = is_valid_remove_lock(
		envelope,
		&channel_state.partner_state,
		secrethash,
		block_number,
		must_be_expired,
	)?;
	let (new_tree, _) = channel_state
		.partner_state
		.lock_tree
		.remove(secrethash)
		.ok_or(ChannelError::LockMismatch)?;
	channel_state.partner_state.balance_proof = Some(balance_proof_from_envelope(envelope));
	channel_state.partner_state.set_lock_tree(new_tree);
	channel_state.partner_state.pending_locks.remove(&secrethash);
	Ok(lock)
}

/// Register a received RemoveExpiredHashlock envelope.
pub fn handle_receive_remove_expired_lock(
	channel_state: &mut ChannelState,
	state_change: &ReceiveRemoveExpiredLock,
	block_number: BlockNumber,
) -> Result<HashTimeLockState, ChannelError> {
	handle_receive_remove_lock(
		channel_state,
		&state_change.envelope,
		state_change.secrethash,
		block_number,
		true,
	)
}

/// Register a received AnnounceDisposedResponse envelope. The disposal was
/// requested by this node, so no expiration is required.
pub fn handle_receive_announce_disposed_response(
	channel_state: &mut ChannelState,
	state_change: &ReceiveAnnounceDisposedResponse,
	block_number: BlockNumber,
) -> Result<HashTimeLockState, ChannelError> {
	handle_receive_remove_lock(
		channel_state,
		&state_change.envelope,
		state_change.secrethash,
		block_number,
		false,
	)
}

/// The partner gives up a lock we sent. Validate it against our tree and
/// answer with the disposal response envelope.
pub fn handle_receive_announce_disposed(
	channel_state: &mut ChannelState,
	state_change: &ReceiveAnnounceDisposed,
	block_number: BlockNumber,
	message_identifier: MessageIdentifier,
) -> Result<SendAnnounceDisposedResponse, ChannelError> {
	if state_change.canonical_identifier != channel_state.canonical_identifier {
		return Err(ChannelError::ChannelIdentifierMismatch)
	}
	if state_change.sender != channel_state.partner_state.address {
		return Err(ChannelError::InvalidSender)
	}
	let known = channel_state
		.our_state
		.get_lock(state_change.lock.secrethash)
		.cloned()
		.ok_or(ChannelError::LockSecretHashNotFound)?;
	if known != state_change.lock {
		return Err(ChannelError::LockMismatch)
	}
	send_announce_disposed_response(
		channel_state,
		state_change.lock.secrethash,
		block_number,
		message_identifier,
	)
}

/// Register a secret learned off-chain with whichever side holds the lock.
pub fn register_secret(
	channel_state: &mut ChannelState,
	secret: Secret,
) -> Result<(), ChannelError> {
	let secrethash = hash_secret(secret.as_bytes());
	let our_known = channel_state.our_state.pending_locks.contains_key(&secrethash);
	let partner_known = channel_state.partner_state.pending_locks.contains_key(&secrethash);
	if !our_known && !partner_known {
		return Err(ChannelError::LockSecretHashNotFound)
	}
	if our_known {
		channel_state.our_state.register_secret(secret)?;
	}
	if partner_known {
		channel_state.partner_state.register_secret(secret)?;
	}
	debug!(
		secrethash = %secrethash,
		channel = %channel_state.canonical_identifier.channel_identifier,
		"secret registered",
	);
	Ok(())
}

/// Register a secret revealed on-chain on both sides holding the lock.
pub fn register_onchain_secret(
	channel_state: &mut ChannelState,
	secret: Secret,
	secrethash: SecretHash,
	block_number: BlockNumber,
) {
	if channel_state.our_state.pending_locks.contains_key(&secrethash) {
		let _ = channel_state
			.our_state
			.register_revealed_on_chain(secrethash, secret, block_number);
	}
	if channel_state.partner_state.pending_locks.contains_key(&secrethash) {
		let _ = channel_state
			.partner_state
			.register_revealed_on_chain(secrethash, secret, block_number);
	}
}

/// On-chain unlock calls for every partner lock whose secret we know.
pub fn events_for_onchain_unlocks(channel_state: &ChannelState) -> Vec<Event> {
	channel_state
		.partner_state
		.can_unlock_on_chain()
		.into_iter()
		.map(|unlock_proof| {
			ContractSendChannelUnlock {
				canonical_identifier: channel_state.canonical_identifier.clone(),
				payer_participant: channel_state.partner_state.address,
				unlock_proof,
				transferred_amount: channel_state.partner_state.contract_transferred_amount,
			}
			.into()
		})
		.collect()
}

/// The channel was closed on-chain. Mirror the submitted balance proof, and
/// either answer with our newer partner proof or start claiming known
/// locks.
pub fn handle_channel_closed(
	channel_state: &mut ChannelState,
	state_change: &ContractReceiveChannelClosed,
) -> Vec<Event> {
	channel_state.status = ChannelStatus::Closed;
	channel_state.closed_block = state_change.block_number;

	let mut events: Vec<Event> = vec![];
	let we_closed = state_change.closing_participant == channel_state.our_state.address;

	let updated_state = if we_closed {
		// We submitted the partner's balance proof; the partner's mirror is
		// now fixed and our known-secret locks can be claimed right away.
		events.extend(events_for_onchain_unlocks(channel_state));
		&mut channel_state.partner_state
	} else {
		// The partner closed with our balance proof. Submit the partner's
		// latest proof so its side settles correctly too.
		if let Some(partner_proof) = channel_state.partner_state.balance_proof.clone() {
			events.push(
				ContractSendChannelUpdateTransfer {
					canonical_identifier: channel_state.canonical_identifier.clone(),
					balance_proof: partner_proof,
				}
				.into(),
			);
		}
		&mut channel_state.our_state
	};
	updated_state.contract_transferred_amount = state_change.transferred_amount;
	updated_state.contract_locksroot = state_change.locksroot;

	if updated_state.transferred_amount() != updated_state.contract_transferred_amount {
		error!(
			channel = %channel_state.canonical_identifier.channel_identifier,
			contract = %updated_state.contract_transferred_amount,
			local = %updated_state.transferred_amount(),
			"channel closed with a transferred amount older than the local state",
		);
	}

	events
}

/// A participant submitted a newer balance proof on-chain after the close.
pub fn handle_balance_proof_updated(
	channel_state: &mut ChannelState,
	state_change: &ContractReceiveBalanceProofUpdated,
) -> Vec<Event> {
	let our_side = state_change.participant == channel_state.our_state.address;
	let updated_state = if our_side {
		&mut channel_state.our_state
	} else {
		&mut channel_state.partner_state
	};
	updated_state.contract_transferred_amount = state_change.transferred_amount;
	updated_state.contract_locksroot = state_change.locksroot;

	if our_side {
		// Our proof is final on-chain now, claim the partner locks we can.
		return events_for_onchain_unlocks(channel_state)
	}
	vec![]
}

/// A cheater submitted an obsolete balance proof and was punished: all
/// channel funds go to the beneficiary and the cheating side is barred from
/// submitting anything further.
pub fn handle_channel_punished(channel_state: &mut ChannelState, beneficiary: Address) {
	let (beneficiary_balance, cheater_state) =
		if beneficiary == channel_state.our_state.address {
			let total = channel_state.our_state.contract_balance +
				channel_state.partner_state.contract_balance;
			channel_state.our_state.contract_balance = total;
			(total, &mut channel_state.partner_state)
		} else if beneficiary == channel_state.partner_state.address {
			let total = channel_state.our_state.contract_balance +
				channel_state.partner_state.contract_balance;
			channel_state.partner_state.contract_balance = total;
			(total, &mut channel_state.our_state)
		} else {
			panic!(
				"punish event for channel {} names non-participant {}",
				channel_state.canonical_identifier.channel_identifier, beneficiary,
			);
		};
	cheater_state.contract_balance = TokenAmount::zero();
	cheater_state.contract_transferred_amount = TokenAmount::zero();
	cheater_state.contract_locksroot = Locksroot::zero();
	cheater_state.contract_nonce = PUNISHED_NONCE;
	if let Some(proof) = cheater_state.balance_proof.as_mut() {
		proof.nonce = PUNISHED_NONCE;
	}
	debug!(beneficiary = %beneficiary, balance = %beneficiary_balance, "channel punished");
}

/// A participant's total deposit changed.
pub fn handle_channel_deposit(
	channel_state: &mut ChannelState,
	state_change: &ContractReceiveChannelDeposit,
) -> Result<(), ChannelError> {
	let end_state = if state_change.participant == channel_state.our_state.address {
		&mut channel_state.our_state
	} else if state_change.participant == channel_state.partner_state.address {
		&mut channel_state.partner_state
	} else {
		return Err(ChannelError::NotParticipant)
	};
	end_state.contract_balance = state_change.total_deposit;
	Ok(())
}

/// A lock was claimed through the on-chain unlock call; mirror the result.
pub fn handle_channel_unlocked(
	channel_state: &mut ChannelState,
	state_change: &ContractReceiveChannelUnlocked,
) {
	let end_state = if state_change.payer_participant == channel_state.our_state.address {
		&mut channel_state.our_state
	} else {
		&mut channel_state.partner_state
	};
	end_state.contract_transferred_amount = state_change.transferred_amount;
	end_state.unclaimed_locks.remove(&state_change.lockhash);
}

/// The channel was settled; the record is removed by the container after
/// this.
pub fn handle_channel_settled(channel_state: &mut ChannelState, block_number: BlockNumber) {
	channel_state.status = ChannelStatus::Settled;
	channel_state.settled_block = block_number;
}

/// A cooperative withdraw went through on-chain: the channel reopens with
/// fresh balances and a clean slate.
pub fn handle_channel_withdrawed(
	channel_state: &mut ChannelState,
	state_change: &ContractReceiveChannelWithdraw,
) {
	let (p1_state, p2_state, p1_balance, p2_balance) =
		if channel_state.our_state.address == state_change.participant1 {
			(
				&mut channel_state.our_state,
				&mut channel_state.partner_state,
				state_change.participant1_balance,
				state_change.participant2_balance,
			)
		} else {
			(
				&mut channel_state.partner_state,
				&mut channel_state.our_state,
				state_change.participant1_balance,
				state_change.participant2_balance,
			)
		};

	if !p1_state.unclaimed_locks.is_empty() || !p2_state.unclaimed_locks.is_empty() {
		warn!(
			channel = %channel_state.canonical_identifier.channel_identifier,
			"withdraw event received while unclaimed locks remain",
		);
	}

	for (end_state, balance) in [(p1_state, p1_balance), (p2_state, p2_balance)] {
		end_state.contract_balance = balance;
		end_state.balance_proof = None;
		end_state.contract_transferred_amount = TokenAmount::zero();
		end_state.contract_locksroot = Locksroot::zero();
		end_state.contract_nonce = 0;
		end_state.pending_locks.clear();
		end_state.unclaimed_locks.clear();
		end_state.lock_tree = Default::default();
	}

	channel_state.canonical_identifier.open_block_number = state_change.new_open_block_number;
	channel_state.closed_block = BlockNumber::zero();
	channel_state.settled_block = BlockNumber::zero();
	channel_state.pending_agreement = None;
	channel_state.status = ChannelStatus::Opened;
}

/// Agreement describing a withdraw initiated by this node. Balances are
/// read from the channel before the request is built.
fn make_withdraw_agreement(
	channel_state: &ChannelState,
	withdraw_amount: Option<TokenAmount>,
) -> SettlementAgreement {
	let our_balance = channel_state.our_balance();
	let partner_balance = channel_state.partner_balance();
	SettlementAgreement {
		participant1: channel_state.our_state.address,
		participant2: channel_state.partner_state.address,
		participant1_balance: our_balance - withdraw_amount.unwrap_or_default(),
		participant2_balance: partner_balance,
		withdraw_amount,
		participant1_signature: None,
		participant2_signature: None,
	}
}

/// Preconditions shared by the withdraw and cooperative settle initiator
/// paths.
fn validate_settlement_action(
	channel_state: &ChannelState,
	has_locks_error: ChannelError,
) -> Result<(), ChannelError> {
	if channel_state.status() != ChannelStatus::Opened {
		return Err(ChannelError::InvalidChannelState(channel_state.status()))
	}
	if channel_state.has_any_lock() {
		return Err(has_locks_error)
	}
	Ok(())
}

/// Start the withdraw sub-protocol: build the agreement, move to
/// `PrepareForWithdraw` and hand the request to the partner.
pub fn action_channel_withdraw(
	channel_state: &mut ChannelState,
	withdraw_amount: TokenAmount,
	message_identifier: MessageIdentifier,
) -> Result<SendWithdrawRequest, ChannelError> {
	validate_settlement_action(channel_state, ChannelError::WithdrawButHasLocks)?;
	if withdraw_amount.is_zero() || withdraw_amount > channel_state.our_balance() {
		return Err(ChannelError::WithdrawAmount)
	}
	let agreement = make_withdraw_agreement(channel_state, Some(withdraw_amount));
	channel_state.pending_agreement = Some(agreement.clone());
	channel_state.status = ChannelStatus::PrepareForWithdraw;
	Ok(SendWithdrawRequest {
		inner: SendMessageEventInner {
			recipient: channel_state.partner_state.address,
			canonical_identifier: channel_state.canonical_identifier.clone(),
			message_identifier,
		},
		agreement,
	})
}

/// Start the cooperative settle sub-protocol.
pub fn action_channel_cooperative_settle(
	channel_state: &mut ChannelState,
	message_identifier: MessageIdentifier,
) -> Result<SendSettleRequest, ChannelError> {
	validate_settlement_action(channel_state, ChannelError::CooperativeSettleButHasLocks)?;
	let agreement = make_withdraw_agreement(channel_state, None);
	channel_state.pending_agreement = Some(agreement.clone());
	channel_state.status = ChannelStatus::PrepareForCooperativeSettle;
	Ok(SendSettleRequest {
		inner: SendMessageEventInner {
			recipient: channel_state.partner_state.address,
			canonical_identifier: channel_state.canonical_identifier.clone(),
			message_identifier,
		},
		agreement,
	})
}

/// Revert a not-yet-agreed withdraw or cooperative settle back to `Opened`.
pub fn action_cancel_prepare(channel_state: &mut ChannelState) -> Result<(), ChannelError> {
	match channel_state.status() {
		ChannelStatus::PrepareForWithdraw | ChannelStatus::PrepareForCooperativeSettle => {
			channel_state.status = ChannelStatus::Opened;
			channel_state.pending_agreement = None;
			Ok(())
		},
		status => Err(ChannelError::InvalidChannelState(status)),
	}
}

/// Validate a partner-initiated agreement against our balances. The
/// requester is participant1.
fn validate_partner_agreement(
	channel_state: &ChannelState,
	sender: Address,
	participant1: Address,
	participant2: Address,
	participant1_balance: TokenAmount,
	participant2_balance: TokenAmount,
	withdraw_amount: Option<TokenAmount>,
	has_locks_error: ChannelError,
) -> Result<(), ChannelError> {
	if sender != channel_state.partner_state.address {
		return Err(ChannelError::InvalidSender)
	}
	if participant1 != channel_state.partner_state.address ||
		participant2 != channel_state.our_state.address
	{
		return Err(ChannelError::NotParticipant)
	}
	if channel_state.has_any_lock() {
		return Err(has_locks_error)
	}
	let partner_balance = channel_state.partner_balance();
	let withdraw = withdraw_amount.unwrap_or_default();
	if withdraw > partner_balance {
		return Err(ChannelError::WithdrawAmount)
	}
	if participant1_balance != partner_balance - withdraw ||
		participant2_balance != channel_state.our_balance()
	{
		return Err(ChannelError::BalanceNotMatch)
	}
	Ok(())
}

/// The partner asks us to agree to a withdraw; answer with both-signature
/// response and wait for the on-chain event.
pub fn handle_receive_withdraw_request(
	channel_state: &mut ChannelState,
	state_change: &ReceiveWithdrawRequest,
	message_identifier: MessageIdentifier,
) -> Result<SendWithdrawResponse, ChannelError> {
	if state_change.canonical_identifier != channel_state.canonical_identifier {
		return Err(ChannelError::ChannelIdentifierMismatch)
	}
	if channel_state.status() != ChannelStatus::Opened {
		return Err(ChannelError::InvalidChannelState(channel_state.status()))
	}
	validate_partner_agreement(
		channel_state,
		state_change.sender,
		state_change.participant1,
		state_change.participant2,
		state_change.participant1_balance,
		state_change.participant2_balance,
		Some(state_change.withdraw_amount),
		ChannelError::WithdrawButHasLocks,
	)?;

	let agreement = SettlementAgreement {
		participant1: state_change.participant1,
		participant2: state_change.participant2,
		participant1_balance: state_change.participant1_balance,
		participant2_balance: state_change.participant2_balance,
		withdraw_amount: Some(state_change.withdraw_amount),
		participant1_signature: Some(state_change.participant1_signature.clone()),
		participant2_signature: None,
	};
	channel_state.pending_agreement = Some(agreement.clone());
	channel_state.status = ChannelStatus::PartnerWithdrawing;
	Ok(SendWithdrawResponse {
		inner: SendMessageEventInner {
			recipient: channel_state.partner_state.address,
			canonical_identifier: channel_state.canonical_identifier.clone(),
			message_identifier,
		},
		agreement,
	})
}

/// The partner agreed to our withdraw: submit the agreement on-chain.
pub fn handle_receive_withdraw_response(
	channel_state: &mut ChannelState,
	state_change: &ReceiveWithdrawResponse,
) -> Result<Event, ChannelError> {
	if state_change.canonical_identifier != channel_state.canonical_identifier {
		return Err(ChannelError::ChannelIdentifierMismatch)
	}
	if channel_state.status() != ChannelStatus::Withdraw {
		return Err(ChannelError::InvalidChannelState(channel_state.status()))
	}
	let pending = channel_state
		.pending_agreement
		.as_mut()
		.ok_or(ChannelError::InvalidChannelState(ChannelStatus::Withdraw))?;
	if state_change.participant1_balance != pending.participant1_balance ||
		state_change.participant2_balance != pending.participant2_balance ||
		Some(state_change.withdraw_amount) != pending.withdraw_amount
	{
		return Err(ChannelError::BalanceNotMatch)
	}
	pending.participant1_signature = Some(state_change.participant1_signature.clone());
	pending.participant2_signature = Some(state_change.participant2_signature.clone());
	Ok(ContractSendChannelWithdraw {
		canonical_identifier: channel_state.canonical_identifier.clone(),
		agreement: pending.clone(),
	}
	.into())
}

/// The partner asks us to settle cooperatively.
pub fn handle_receive_settle_request(
	channel_state: &mut ChannelState,
	state_change: &ReceiveSettleRequest,
	message_identifier: MessageIdentifier,
) -> Result<SendSettleResponse, ChannelError> {
	if state_change.canonical_identifier != channel_state.canonical_identifier {
		return Err(ChannelError::ChannelIdentifierMismatch)
	}
	if channel_state.status() != ChannelStatus::Opened {
		return Err(ChannelError::InvalidChannelState(channel_state.status()))
	}
	validate_partner_agreement(
		channel_state,
		state_change.sender,
		state_change.participant1,
		state_change.participant2,
		state_change.participant1_balance,
		state_change.participant2_balance,
		None,
		ChannelError::CooperativeSettleButHasLocks,
	)?;

	let agreement = SettlementAgreement {
		participant1: state_change.participant1,
		participant2: state_change.participant2,
		participant1_balance: state_change.participant1_balance,
		participant2_balance: state_change.participant2_balance,
		withdraw_amount: None,
		participant1_signature: Some(state_change.participant1_signature.clone()),
		participant2_signature: None,
	};
	channel_state.pending_agreement = Some(agreement.clone());
	channel_state.status = ChannelStatus::PartnerCooperativeSettling;
	Ok(SendSettleResponse {
		inner: SendMessageEventInner {
			recipient: channel_state.partner_state.address,
			canonical_identifier: channel_state.canonical_identifier.clone(),
			message_identifier,
		},
		agreement,
	})
}

/// The partner agreed to our cooperative settle: submit on-chain.
pub fn handle_receive_settle_response(
	channel_state: &mut ChannelState,
	state_change: &ReceiveSettleResponse,
) -> Result<Event, ChannelError> {
	if state_change.canonical_identifier != channel_state.canonical_identifier {
		return Err(ChannelError::ChannelIdentifierMismatch)
	}
	if channel_state.status() != ChannelStatus::CooperativeSettle {
		return Err(ChannelError::InvalidChannelState(channel_state.status()))
	}
	let pending = channel_state
		.pending_agreement
		.as_mut()
		.ok_or(ChannelError::InvalidChannelState(ChannelStatus::CooperativeSettle))?;
	if state_change.participant1_balance != pending.participant1_balance ||
		state_change.participant2_balance != pending.participant2_balance
	{
		return Err(ChannelError::BalanceNotMatch)
	}
	pending.participant1_signature = Some(state_change.participant1_signature.clone());
	pending.participant2_signature = Some(state_change.participant2_signature.clone());
	Ok(ContractSendChannelCooperativeSettle {
		canonical_identifier: channel_state.canonical_identifier.clone(),
		agreement: pending.clone(),
	}
	.into())
}

/// Block tick for the settlement sub-protocols: once the request was
/// acknowledged locally the prepare states advance to the awaiting states.
pub fn handle_block(channel_state: &mut ChannelState) {
	match channel_state.status() {
		ChannelStatus::PrepareForWithdraw => channel_state.status = ChannelStatus::Withdraw,
		ChannelStatus::PrepareForCooperativeSettle =>
			channel_state.status = ChannelStatus::CooperativeSettle,
		_ => {},
	}
}
