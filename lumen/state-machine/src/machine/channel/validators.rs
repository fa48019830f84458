#![warn(clippy::missing_docs_in_private_items)]

use lumen_primitives::types::{
	BlockExpiration,
	BlockNumber,
	SecretHash,
	TokenAmount,
};

use super::views::get_removal_threshold;
use crate::{
	errors::ChannelError,
	types::{
		ChannelEndState,
		ChannelState,
		Envelope,
		HashTimeLockState,
		LockedTransferState,
	},
};

/// Which side of the channel a validated envelope came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EnvelopeSide {
	Our,
	Partner,
}

/// The pre-check every received envelope must pass before its type-specific
/// validation. Nothing is mutated on failure.
///
/// 1. The channel identifier and open block must match this channel.
/// 2. The sender must be a participant.
/// 3. The nonce must be the sender's next nonce (strictly monotonic, starts
///    at one).
/// 4. The transferred amount may never decrease.
pub fn validate_envelope(
	channel_state: &ChannelState,
	envelope: &Envelope,
) -> Result<EnvelopeSide, ChannelError> {
	if envelope.canonical_identifier != channel_state.canonical_identifier {
		return Err(ChannelError::ChannelIdentifierMismatch)
	}

	let side = if envelope.sender == channel_state.our_state.address {
		EnvelopeSide::Our
	} else if envelope.sender == channel_state.partner_state.address {
		EnvelopeSide::Partner
	} else {
		return Err(ChannelError::NotParticipant)
	};

	let from_state = match side {
		EnvelopeSide::Our => &channel_state.our_state,
		EnvelopeSide::Partner => &channel_state.partner_state,
	};

	let expected_nonce = from_state.next_nonce();
	if envelope.nonce < 1 || envelope.nonce != expected_nonce {
		return Err(ChannelError::InvalidNonce { expected: expected_nonce, got: envelope.nonce })
	}

	if envelope.transferred_amount < from_state.transferred_amount() {
		return Err(ChannelError::TransferAmountDecrease)
	}

	Ok(side)
}

/// A direct transfer moves a positive delta within the distributable
/// balance and leaves the lock tree untouched.
pub fn is_valid_direct_transfer(
	envelope: &Envelope,
	from_state: &ChannelEndState,
	to_state: &ChannelEndState,
) -> Result<TokenAmount, ChannelError> {
	let amount = envelope.transferred_amount - from_state.transferred_amount();
	if amount.is_zero() {
		return Err(ChannelError::TransferAmountMismatch)
	}
	let distributable = from_state.distributable_to(to_state);
	if amount > distributable {
		return Err(ChannelError::InsufficientBalance { amount, distributable })
	}
	if envelope.locksroot != from_state.locksroot() {
		return Err(ChannelError::InvalidLocksRoot)
	}
	Ok(amount)
}

/// A mediated transfer adds exactly one lock to the sender's tree without
/// changing the transferred amount, and may not outlive the settlement
/// window.
pub fn is_valid_mediated_transfer(
	channel_state: &ChannelState,
	envelope: &Envelope,
	transfer: &LockedTransferState,
	from_state: &ChannelEndState,
	to_state: &ChannelEndState,
	block_number: BlockNumber,
) -> Result<(), ChannelError> {
	let amount = transfer.amount;
	if amount.is_zero() {
		return Err(ChannelError::TransferAmountMismatch)
	}
	let distributable = from_state.distributable_to(to_state);
	if amount > distributable {
		return Err(ChannelError::InsufficientBalance { amount, distributable })
	}

	// A lock that outlives the settlement period would let colluding nodes
	// register the secret after this channel can no longer claim it.
	let end_settle_period = channel_state.get_settle_expiration(block_number);
	if transfer.expiration > end_settle_period {
		return Err(ChannelError::LockExpirationTooLarge)
	}

	let lock = HashTimeLockState::new(amount, transfer.expiration, transfer.secrethash);
	let expected_locksroot = from_state
		.lock_tree
		.compute_root_with(lock.secrethash, lock.leaf())
		.ok_or(ChannelError::LockMismatch)?;
	if envelope.locksroot != expected_locksroot {
		return Err(ChannelError::InvalidLocksRoot)
	}
	if envelope.transferred_amount != from_state.transferred_amount() {
		return Err(ChannelError::TransferAmountMismatch)
	}
	Ok(())
}

/// An unlock claims a known pending lock: the transferred amount grows by
/// exactly the lock amount and the new root is the tree minus that lock.
pub fn is_valid_unlock(
	envelope: &Envelope,
	from_state: &ChannelEndState,
	secrethash: SecretHash,
) -> Result<HashTimeLockState, ChannelError> {
	let lock = from_state
		.get_lock(secrethash)
		.cloned()
		.ok_or(ChannelError::LockSecretHashNotFound)?;

	let expected_transferred = from_state.transferred_amount() + lock.amount;
	if envelope.transferred_amount != expected_transferred {
		return Err(ChannelError::TransferAmountMismatch)
	}

	// The new locksroot must have only this lock removed, otherwise the
	// sender may be trying to remove additional locks.
	let expected_locksroot = from_state
		.lock_tree
		.compute_root_without(secrethash)
		.ok_or(ChannelError::LockMismatch)?;
	if envelope.locksroot != expected_locksroot {
		return Err(ChannelError::InvalidLocksRoot)
	}
	Ok(lock)
}

/// Shared validation of the two lock-removal envelopes. The transferred
/// amount stays constant and the declared root is the tree minus the lock.
pub fn is_valid_remove_lock(
	envelope: &Envelope,
	from_state: &ChannelEndState,
	secrethash: SecretHash,
	block_number: BlockNumber,
	must_be_expired: bool,
) -> Result<HashTimeLockState, ChannelError> {
	if envelope.transferred_amount != from_state.transferred_amount() {
		return Err(ChannelError::TransferAmountMismatch)
	}
	let (lock, _, new_root) =
		from_state.try_remove_hash_lock(secrethash, block_number, must_be_expired)?;
	if envelope.locksroot != new_root {
		return Err(ChannelError::InvalidLocksRoot)
	}
	Ok(lock)
}

/// True once enough blocks passed since the lock expired for the removal
/// to be reorg-safe.
pub fn is_lock_expired(lock_expiration: BlockExpiration, block_number: BlockNumber) -> bool {
	block_number > get_removal_threshold(lock_expiration)
}

/// A lock is too close to expiration to keep waiting for an off-chain
/// balance proof once fewer than `reveal_timeout` blocks remain.
pub fn is_safe_to_wait(
	lock_expiration: BlockExpiration,
	reveal_timeout: BlockExpiration,
	block_number: BlockNumber,
) -> bool {
	lock_expiration > reveal_timeout && block_number < lock_expiration - reveal_timeout
}
