#![warn(clippy::missing_docs_in_private_items)]

use std::future::Future;

use lumen_primitives::types::{
	TransactionHash,
	U64,
};
use lumen_state_machine::types::{
	ContractCallTxResult,
	ContractSendEvent,
	StateChange,
	TransactionResult,
};
use tokio::sync::mpsc;
use tracing::warn;

/// Submits `ContractSend*` events to the ledger on short-lived tasks and
/// reports each terminal result back into the dispatcher as a
/// `ContractCallTxResult` state change. This keeps the dispatcher the
/// single writer: workers never touch state directly.
pub struct TxWatcher<F> {
	submitter: F,
	state_change_tx: mpsc::Sender<StateChange>,
}

impl<F, Fut> TxWatcher<F>
where
	F: Fn(ContractSendEvent) -> Fut + Clone + Send + Sync + 'static,
	Fut: Future<Output = Result<TransactionHash, String>> + Send,
{
	pub fn new(submitter: F, state_change_tx: mpsc::Sender<StateChange>) -> Self {
		Self { submitter, state_change_tx }
	}

	/// Dispatch one on-chain call. Returns immediately; the result arrives
	/// later as a state change.
	pub fn submit(&self, event: ContractSendEvent, block_number: U64) {
		let submitter = self.submitter.clone();
		let state_change_tx = self.state_change_tx.clone();
		let description = description_of(&event);

		tokio::spawn(async move {
			let (result, transaction_hash, error) = match submitter(event).await {
				Ok(transaction_hash) =>
					(TransactionResult::Success, Some(transaction_hash), None),
				Err(e) => (TransactionResult::Failure, None, Some(e)),
			};

			let outcome = ContractCallTxResult {
				description,
				transaction_hash,
				result,
				error,
				block_number,
			};
			if state_change_tx.send(outcome.into()).await.is_err() {
				warn!("dispatcher gone before the transaction result was reported");
			}
		});
	}
}

/// Human-readable label stored with the pending-TX record.
fn description_of(event: &ContractSendEvent) -> String {
	match event {
		ContractSendEvent::ContractSendChannelClose(_) => "channel close".to_owned(),
		ContractSendEvent::ContractSendChannelUpdateTransfer(_) =>
			"balance proof update".to_owned(),
		ContractSendEvent::ContractSendChannelUnlock(_) => "lock unlock".to_owned(),
		ContractSendEvent::ContractSendRegisterSecret(_) => "secret registration".to_owned(),
		ContractSendEvent::ContractSendChannelWithdraw(_) => "channel withdraw".to_owned(),
		ContractSendEvent::ContractSendChannelCooperativeSettle(_) =>
			"cooperative settle".to_owned(),
		ContractSendEvent::ContractSendChannelSettle(_) => "channel settle".to_owned(),
	}
}
