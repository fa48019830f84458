#![warn(clippy::missing_docs_in_private_items)]

use std::collections::HashMap;

use lumen_primitives::{
	constants::FORK_CONFIRM_NUMBER,
	types::{
		Address,
		TransactionHash,
		H256,
		U64,
	},
};
use lumen_state_machine::types::{
	Block,
	StateChange,
};
use tracing::warn;
use web3::types::Log;

use crate::contracts::{
	ContractRegistry,
	EVENT_CHANNEL_NEW_DEPOSIT,
	EVENT_CHANNEL_OPENED_AND_DEPOSIT,
	EVENT_CHANNEL_WITHDRAW,
	EVENT_SECRET_REVEALED,
};

/// Contains information about an event triggered on the ledger.
#[derive(Clone, Debug)]
pub struct DecodedEvent {
	pub name: String,
	pub address: Address,
	pub block_number: U64,
	pub transaction_hash: TransactionHash,
	pub transaction_index: U64,
	pub log_index: U64,
	pub data: HashMap<String, ethabi::Token>,
}

impl DecodedEvent {
	/// Decodes a log against the contract registry.
	///
	/// Returns None if the log's first topic does not match any known
	/// event.
	pub fn decode(registry: &ContractRegistry, log: &Log) -> Option<DecodedEvent> {
		let topic = log.topics.first()?;
		let name = registry.event_name(topic)?.to_owned();
		let event = registry.event(&name).ok()?;

		let parsed = event
			.parse_log(ethabi::RawLog { topics: log.topics.clone(), data: log.data.0.clone() })
			.ok()?;
		let data = parsed
			.params
			.into_iter()
			.map(|param| (param.name, param.value))
			.collect();

		Some(DecodedEvent {
			name,
			address: log.address,
			block_number: log.block_number?,
			transaction_hash: log.transaction_hash?,
			transaction_index: log.transaction_index?,
			log_index: log.log_index?.as_u64().into(),
			data,
		})
	}

	/// Identity used to deduplicate redelivered logs.
	pub fn event_id(&self) -> EventId {
		(self.transaction_hash, self.log_index.as_u64())
	}
}

/// `(tx_hash, log_index)` identifies one log across redeliveries.
pub type EventId = (H256, u64);

/// Sliding window of already processed logs. The window spans twice the
/// fork confirmation depth, matching the re-query overlap of the poll
/// loop.
#[derive(Default, Debug)]
pub struct DedupeCache {
	done: HashMap<EventId, u64>,
}

impl DedupeCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record the event; returns false for a true duplicate. A duplicate
	/// whose block moved is let through with a warning, the log was
	/// reorganized.
	pub fn check_and_insert(&mut self, event: &DecodedEvent) -> bool {
		let block_number = event.block_number.as_u64();
		if let Some(done_block) = self.done.get(&event.event_id()) {
			if *done_block == block_number {
				return false
			}
			warn!(
				tx = %event.transaction_hash,
				previous_block = done_block,
				block = block_number,
				"event delivered again from a different block, possible reorg",
			);
		}
		self.done.insert(event.event_id(), block_number);
		true
	}

	/// Drop entries older than the query window.
	pub fn prune(&mut self, before_block: u64) {
		self.done.retain(|_, block_number| *block_number > before_block);
	}
}

/// Deposit-like events and secret registrations only count once they are
/// buried under the confirmation depth.
pub fn needs_confirmation(event_name: &str) -> bool {
	matches!(
		event_name,
		EVENT_CHANNEL_OPENED_AND_DEPOSIT |
			EVENT_CHANNEL_NEW_DEPOSIT |
			EVENT_CHANNEL_WITHDRAW |
			EVENT_SECRET_REVEALED
	)
}

/// True when the log is still too close to the tip to be trusted.
pub fn within_confirmation_window(event_block: U64, latest_block: U64) -> bool {
	latest_block.as_u64().saturating_sub(event_block.as_u64()) < FORK_CONFIRM_NUMBER
}

/// A state change paired with its on-chain position, used for ordering.
#[derive(Clone, Debug)]
pub struct OrderedStateChange {
	pub block_number: U64,
	pub transaction_index: U64,
	pub log_index: U64,
	pub state_change: StateChange,
}

/// Order state changes by `(block, tx index, log index)` and interleave a
/// `Block` state change at every block boundary, finishing with the latest
/// block.
pub fn sequence_state_changes(
	mut ordered: Vec<OrderedStateChange>,
	latest_block: U64,
) -> Vec<StateChange> {
	ordered.sort_by_key(|entry| {
		(entry.block_number, entry.transaction_index, entry.log_index)
	});

	let mut result: Vec<StateChange> = vec![];
	let mut last_block_sent = U64::zero();
	for entry in ordered {
		if entry.block_number != last_block_sent {
			last_block_sent = entry.block_number;
			result.push(Block { block_number: entry.block_number }.into());
		}
		result.push(entry.state_change);
	}
	if last_block_sent != latest_block {
		result.push(Block { block_number: latest_block }.into());
	}
	result
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use lumen_primitives::types::{
		Address,
		H256,
		U64,
	};
	use lumen_state_machine::types::{
		ContractReceiveChannelSettled,
		StateChange,
	};

	use super::{
		needs_confirmation,
		sequence_state_changes,
		within_confirmation_window,
		DecodedEvent,
		DedupeCache,
		OrderedStateChange,
	};
	use crate::contracts::{
		EVENT_CHANNEL_CLOSED,
		EVENT_CHANNEL_NEW_DEPOSIT,
		EVENT_SECRET_REVEALED,
	};

	fn make_event(tx_seed: u8, log_index: u64, block_number: u64) -> DecodedEvent {
		DecodedEvent {
			name: EVENT_CHANNEL_CLOSED.to_owned(),
			address: Address::zero(),
			block_number: U64::from(block_number),
			transaction_hash: H256::repeat_byte(tx_seed),
			transaction_index: U64::zero(),
			log_index: U64::from(log_index),
			data: HashMap::new(),
		}
	}

	fn make_entry(
		block_number: u64,
		transaction_index: u64,
		log_index: u64,
	) -> OrderedStateChange {
		OrderedStateChange {
			block_number: U64::from(block_number),
			transaction_index: U64::from(transaction_index),
			log_index: U64::from(log_index),
			state_change: ContractReceiveChannelSettled {
				channel_identifier: H256::repeat_byte(log_index as u8),
				block_number: U64::from(block_number),
			}
			.into(),
		}
	}

	#[test]
	fn test_sequencing_orders_and_inserts_blocks() {
		let entries =
			vec![make_entry(12, 0, 1), make_entry(11, 1, 0), make_entry(11, 0, 2)];
		let sequenced = sequence_state_changes(entries, U64::from(15));

		let shape: Vec<&str> = sequenced.iter().map(|sc| sc.type_name()).collect();
		assert_eq!(
			shape,
			vec![
				"Block",
				"ContractReceiveChannelSettled",
				"ContractReceiveChannelSettled",
				"Block",
				"ContractReceiveChannelSettled",
				"Block",
			]
		);

		// Blocks advance 11 -> 12 -> 15 and events stay sorted by
		// (block, tx index, log index).
		let blocks: Vec<u64> = sequenced
			.iter()
			.filter_map(|sc| match sc {
				StateChange::Block(block) => Some(block.block_number.as_u64()),
				_ => None,
			})
			.collect();
		assert_eq!(blocks, vec![11, 12, 15]);
	}

	#[test]
	fn test_sequencing_without_events_emits_latest_block() {
		let sequenced = sequence_state_changes(vec![], U64::from(42));
		assert_eq!(sequenced.len(), 1);
		assert!(
			matches!(&sequenced[0], StateChange::Block(block) if block.block_number == U64::from(42))
		);
	}

	#[test]
	fn test_dedupe_skips_true_duplicates() {
		let mut cache = DedupeCache::new();
		let event = make_event(1, 0, 100);

		assert!(cache.check_and_insert(&event));
		assert!(!cache.check_and_insert(&event));

		// Same id at a different block is a reorg, let it through.
		let moved = make_event(1, 0, 101);
		assert!(cache.check_and_insert(&moved));
	}

	#[test]
	fn test_dedupe_prune_drops_old_entries() {
		let mut cache = DedupeCache::new();
		let old = make_event(1, 0, 50);
		let fresh = make_event(2, 0, 100);
		assert!(cache.check_and_insert(&old));
		assert!(cache.check_and_insert(&fresh));

		cache.prune(60);

		// The pruned event is processable again, the fresh one is not.
		assert!(cache.check_and_insert(&old));
		assert!(!cache.check_and_insert(&fresh));
	}

	#[test]
	fn test_confirmation_gating() {
		assert!(needs_confirmation(EVENT_CHANNEL_NEW_DEPOSIT));
		assert!(needs_confirmation(EVENT_SECRET_REVEALED));
		assert!(!needs_confirmation(EVENT_CHANNEL_CLOSED));

		assert!(within_confirmation_window(U64::from(100), U64::from(110)));
		assert!(!within_confirmation_window(U64::from(100), U64::from(117)));
	}
}
