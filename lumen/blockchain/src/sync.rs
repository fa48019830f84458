#![warn(clippy::missing_docs_in_private_items)]

use std::{
	sync::Arc,
	time::Duration,
};

use lumen_primitives::{
	constants::{
		FORK_CONFIRM_NUMBER,
		LEDGER_QUERY_TIMEOUT,
	},
	types::{
		Address,
		U64,
	},
};
use lumen_state_machine::types::{
	HistoryComplete,
	StateChange,
};
use tokio::sync::{
	mpsc,
	watch,
};
use tracing::{
	debug,
	error,
	info,
	trace,
};

use crate::{
	contracts::ContractRegistry,
	decode::EventDecoder,
	errors::SyncError,
	events::{
		needs_confirmation,
		sequence_state_changes,
		within_confirmation_window,
		DecodedEvent,
		DedupeCache,
		OrderedStateChange,
	},
	filters::filter_for_range,
};

/// The event ingest loop: polls the ledger, confirms and orders events,
/// and feeds the dispatcher's state-change channel.
///
/// Events may be delivered twice but are never lost; registration is
/// idempotent downstream. Every block boundary between two emitted events
/// is preceded by a `Block` state change.
pub struct ChainPoller {
	web3: web3::Web3<web3::transports::Http>,
	registry: Arc<ContractRegistry>,
	token_network_address: Address,
	secret_registry_address: Address,
	state_change_tx: mpsc::Sender<StateChange>,
	stop: watch::Receiver<bool>,
	poll_period: Duration,
	current_block: U64,
	first_start: bool,
	dedupe: DedupeCache,
}

impl ChainPoller {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		web3: web3::Web3<web3::transports::Http>,
		registry: Arc<ContractRegistry>,
		token_network_address: Address,
		secret_registry_address: Address,
		state_change_tx: mpsc::Sender<StateChange>,
		stop: watch::Receiver<bool>,
		poll_period: Duration,
		last_processed_block: U64,
	) -> Self {
		Self {
			web3,
			registry,
			token_network_address,
			secret_registry_address,
			state_change_tx,
			stop,
			poll_period,
			current_block: last_processed_block,
			first_start: true,
			dedupe: DedupeCache::new(),
		}
	}

	/// One-shot notification that the initial sync finished, so dependent
	/// subsystems know the state is caught up with the ledger.
	async fn notify_history_complete_if_needed(&mut self) -> Result<(), SyncError> {
		if !self.first_start {
			return Ok(())
		}
		self.first_start = false;
		self.state_change_tx
			.send(HistoryComplete { block_number: self.current_block }.into())
			.await
			.map_err(|_| SyncError::ChannelClosed)
	}

	/// Fetch and sequence everything between the re-query window start and
	/// the tip.
	async fn poll_once(&mut self, latest_block: U64) -> Result<(), SyncError> {
		let from_block =
			U64::from(self.current_block.as_u64().saturating_sub(2 * FORK_CONFIRM_NUMBER));

		let filter = filter_for_range(
			&self.registry,
			self.token_network_address,
			self.secret_registry_address,
			from_block,
			latest_block,
		);
		let logs = tokio::time::timeout(
			Duration::from_secs(LEDGER_QUERY_TIMEOUT),
			self.web3.eth().logs(filter),
		)
		.await
		.map_err(|_| SyncError::Timeout)??;

		trace!(count = logs.len(), from = %from_block, to = %latest_block, "processing logs");

		let decoder = EventDecoder;
		let mut ordered: Vec<OrderedStateChange> = vec![];
		for log in &logs {
			let event = match DecodedEvent::decode(&self.registry, log) {
				Some(event) => event,
				None => {
					error!(log = ?log, "could not find an event matching the log");
					continue
				},
			};

			if !self.dedupe.check_and_insert(&event) {
				continue
			}

			// Deposits, withdraws and secret registrations are only acted
			// upon once they are reorg-safe; the overlap window re-delivers
			// them on a later pass.
			if needs_confirmation(&event.name) &&
				within_confirmation_window(event.block_number, latest_block)
			{
				debug!(event = %event.name, block = %event.block_number, "awaiting confirmation");
				continue
			}

			match decoder.as_state_changes(event) {
				Ok(state_changes) => ordered.extend(state_changes),
				Err(e) => error!(reason = %e, "could not translate event to state change"),
			}
		}

		for state_change in sequence_state_changes(ordered, latest_block) {
			self.state_change_tx
				.send(state_change)
				.await
				.map_err(|_| SyncError::ChannelClosed)?;
		}

		self.dedupe.prune(from_block.as_u64());
		self.current_block = latest_block;
		Ok(())
	}

	/// Run until stopped or until the ledger connection fails. On an RPC
	/// failure the loop exits so the owner can reconnect and restart it
	/// from the last persisted block.
	pub async fn run(mut self) -> Result<(), SyncError> {
		info!(block = %self.current_block, "event ingest started");

		loop {
			let latest_block = match tokio::time::timeout(
				Duration::from_secs(LEDGER_QUERY_TIMEOUT),
				self.web3.eth().block_number(),
			)
			.await
			{
				Ok(Ok(latest_block)) => latest_block,
				Ok(Err(e)) => {
					let _ = self.notify_history_complete_if_needed().await;
					error!(reason = %e, "fetching the latest block failed, reconnecting");
					return Err(SyncError::Rpc(e))
				},
				Err(_) => {
					let _ = self.notify_history_complete_if_needed().await;
					error!("fetching the latest block timed out, reconnecting");
					return Err(SyncError::Timeout)
				},
			};

			if latest_block <= self.current_block {
				self.notify_history_complete_if_needed().await?;
			} else {
				self.poll_once(latest_block).await?;
				self.notify_history_complete_if_needed().await?;
			}

			tokio::select! {
				_ = tokio::time::sleep(self.poll_period) => {},
				_ = self.stop.changed() => {
					info!("event ingest stopped");
					return Ok(())
				},
			}
		}
	}
}
