use lazy_static::lazy_static;

use crate::types::{
	Nonce,
	Signature,
};

/// Depth below the chain tip after which a log is considered stable.
pub const FORK_CONFIRM_NUMBER: u64 = 17;

/// Lower bound enforced on a channel's reveal timeout.
pub const MINIMUM_REVEAL_TIMEOUT: u64 = 3;

/// Reveal timeout used when the caller does not provide one.
pub const DEFAULT_REVEAL_TIMEOUT: u64 = 30;

/// Settle timeout used when the caller does not provide one.
pub const DEFAULT_SETTLE_TIMEOUT: u64 = 600;

/// Nonce barrier installed on a punished participant. No off-chain balance
/// proof can follow it.
pub const PUNISHED_NONCE: Nonce = 0xFFFF_FFFF_FFFF_FFFF;

/// Depth of the dispatcher's state-change queue.
pub const STATE_CHANGE_QUEUE_DEPTH: usize = 10;

/// Deadline for read-only ledger RPC calls, in seconds.
pub const LEDGER_QUERY_TIMEOUT: u64 = 15;

/// Deadline for ledger transactions, in seconds.
pub const LEDGER_TRANSACTION_TIMEOUT: u64 = 120;

lazy_static! {
	/// Placeholder signature carried by envelopes before the signer runs.
	pub static ref EMPTY_SIGNATURE: Signature = Signature::from(vec![0; 65]);
}
