use crate::types::{
	PayeeState,
	PayerState,
};

/// Payee-side states in which the secret is known to the payee.
pub const PAYEE_STATE_SECRET_KNOWN: [PayeeState; 2] =
	[PayeeState::SecretRevealed, PayeeState::BalanceProof];

/// Payer-side states in which the payer knows the secret.
pub const PAYER_STATE_SECRET_KNOWN: [PayerState; 3] =
	[PayerState::SecretRevealed, PayerState::WaitingRegisterSecret, PayerState::BalanceProof];

/// Payee-side states in which the payee has been paid.
pub const PAYEE_STATE_TRANSFER_PAID: [PayeeState; 1] = [PayeeState::BalanceProof];

/// Payer-side states in which the payer has paid.
pub const PAYER_STATE_TRANSFER_PAID: [PayerState; 1] = [PayerState::BalanceProof];

/// Payee-side terminal states.
pub const PAYEE_STATE_TRANSFER_FINAL: [PayeeState; 2] =
	[PayeeState::BalanceProof, PayeeState::Expired];

/// Payer-side terminal states.
pub const PAYER_STATE_TRANSFER_FINAL: [PayerState; 2] =
	[PayerState::BalanceProof, PayerState::Expired];
