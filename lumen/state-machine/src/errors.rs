#![warn(clippy::missing_docs_in_private_items)]

use std::{
	error,
	fmt,
};

use lumen_primitives::types::{
	Nonce,
	TokenAmount,
};

use crate::types::ChannelStatus;

/// Caller-visible channel errors. Every rejected message or refused action
/// maps onto one of these kinds; none of them mutates state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
	InvalidChannelState(ChannelStatus),
	NotParticipant,
	ChannelIdentifierMismatch,
	InvalidSender,
	InvalidNonce { expected: Nonce, got: Nonce },
	TransferAmountDecrease,
	TransferAmountMismatch,
	InsufficientBalance { amount: TokenAmount, distributable: TokenAmount },
	InvalidLocksRoot,
	LockMismatch,
	LockNotExpired,
	LockSecretHashNotFound,
	LockExpirationTooLarge,
	UpdateBalanceProofAfterClosed,
	WithdrawButHasLocks,
	CooperativeSettleButHasLocks,
	BalanceNotMatch,
	WithdrawAmount,
	InvalidSettleTimeout,
	InvalidRevealTimeout,
	NoAvailableRoute,
	RejectBecauseHoldingTooMuchLock,
	RejectBecausePayerChannelClosed,
	ContractCall(String),
	TxWaitMined(String),
}

impl fmt::Display for ChannelError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ChannelError::InvalidChannelState(status) =>
				write!(f, "operation not allowed in channel state {}", status),
			ChannelError::NotParticipant => write!(f, "address is not a channel participant"),
			ChannelError::ChannelIdentifierMismatch =>
				write!(f, "message channel identifier does not match this channel"),
			ChannelError::InvalidSender => write!(f, "message sent by an unexpected address"),
			ChannelError::InvalidNonce { expected, got } =>
				write!(f, "nonce did not change sequentially, expected {} got {}", expected, got),
			ChannelError::TransferAmountDecrease =>
				write!(f, "transferred amount may never decrease"),
			ChannelError::TransferAmountMismatch =>
				write!(f, "transferred amount does not match the expected value"),
			ChannelError::InsufficientBalance { amount, distributable } => write!(
				f,
				"amount {} exceeds the distributable balance {}",
				amount, distributable
			),
			ChannelError::InvalidLocksRoot =>
				write!(f, "declared locksroot does not match the recomputed tree"),
			ChannelError::LockMismatch => write!(f, "lock does not match the channel state"),
			ChannelError::LockNotExpired => write!(f, "lock has not expired yet"),
			ChannelError::LockSecretHashNotFound =>
				write!(f, "no lock is registered for the given secret hash"),
			ChannelError::LockExpirationTooLarge =>
				write!(f, "lock expires after the settlement period"),
			ChannelError::UpdateBalanceProofAfterClosed =>
				write!(f, "balance proof updates are not accepted after close"),
			ChannelError::WithdrawButHasLocks =>
				write!(f, "withdraw is not allowed while locks are pending"),
			ChannelError::CooperativeSettleButHasLocks =>
				write!(f, "cooperative settle is not allowed while locks are pending"),
			ChannelError::BalanceNotMatch =>
				write!(f, "declared balances do not match the channel state"),
			ChannelError::WithdrawAmount => write!(f, "invalid withdraw amount"),
			ChannelError::InvalidSettleTimeout =>
				write!(f, "settle timeout must be larger than the reveal timeout"),
			ChannelError::InvalidRevealTimeout => write!(f, "reveal timeout is too small"),
			ChannelError::NoAvailableRoute => write!(f, "no usable route remains"),
			ChannelError::RejectBecauseHoldingTooMuchLock =>
				write!(f, "refusing transfer, this channel already holds too many locks"),
			ChannelError::RejectBecausePayerChannelClosed =>
				write!(f, "refusing transfer, the payer channel is closed"),
			ChannelError::ContractCall(msg) => write!(f, "contract call failed: {}", msg),
			ChannelError::TxWaitMined(msg) =>
				write!(f, "waiting for transaction to be mined failed: {}", msg),
		}
	}
}

impl error::Error for ChannelError {}

/// The state transition error type.
#[derive(Debug, Clone)]
pub struct StateTransitionError {
	pub msg: String,
}

impl fmt::Display for StateTransitionError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.msg)
	}
}

impl error::Error for StateTransitionError {}

impl From<String> for StateTransitionError {
	fn from(msg: String) -> Self {
		StateTransitionError { msg }
	}
}

impl From<ChannelError> for StateTransitionError {
	fn from(e: ChannelError) -> Self {
		StateTransitionError { msg: e.to_string() }
	}
}
