#![warn(clippy::missing_docs_in_private_items)]

use std::sync::Arc;

use lumen_primitives::types::{
	Address,
	ChainID,
	SecretRegistryAddress,
	TokenNetworkAddress,
	U64,
};
use lumen_state_machine::{
	errors::StateTransitionError,
	machine::chain,
	types::{
		ChainState,
		Event,
		StateChange,
	},
};
use lumen_storage::{
	types::StorageID,
	StateStorage,
	SNAPSHOT_STATE_CHANGE_COUNT,
};
use tracing::debug;

pub type Result<T> = std::result::Result<T, StateTransitionError>;

/// The single writer of the chain state. Every state change is persisted,
/// dispatched through the chain machine, and periodically snapshotted.
pub struct StateManager {
	pub storage: Arc<StateStorage>,
	pub current_state: ChainState,
	state_change_last_id: Option<StorageID>,
	state_change_count: u16,
}

impl StateManager {
	/// Restore the state from the latest snapshot plus the state changes
	/// recorded after it, or initialize a fresh one.
	pub fn restore_or_init_state(
		storage: Arc<StateStorage>,
		chain_id: ChainID,
		our_address: Address,
		token_network_address: TokenNetworkAddress,
		secret_registry_address: SecretRegistryAddress,
	) -> std::result::Result<(Self, U64), String> {
		let snapshot = storage
			.get_snapshot_before_state_change(StorageID::max())
			.map_err(|e| format!("Could not fetch snapshot: {}", e))?;

		let (current_state, state_changes) = match snapshot {
			Some(snapshot) => {
				debug!("restoring state from snapshot");
				let current_state: ChainState = serde_json::from_str(&snapshot.data)
					.map_err(|e| format!("Snapshot error: {}", e))?;

				let records = storage
					.get_state_changes_in_range(
						snapshot.state_change_identifier,
						StorageID::max(),
					)
					.map_err(|e| format!("State change error: {}", e))?;
				let mut state_changes = vec![];
				for record in records {
					let state_change: StateChange = serde_json::from_str(&record.data)
						.map_err(|e| format!("State change error: {}", e))?;
					state_changes.push(state_change);
				}
				(current_state, state_changes)
			},
			None => {
				debug!("initializing state");
				let current_state = ChainState::new(
					chain_id,
					U64::zero(),
					our_address,
					token_network_address,
					secret_registry_address,
				);

				let mut state_changes = vec![];
				for record in storage
					.get_state_changes_in_range(
						StorageID::from(ulid::Ulid::nil()),
						StorageID::max(),
					)
					.map_err(|e| format!("State change error: {}", e))?
				{
					let state_change: StateChange = serde_json::from_str(&record.data)
						.map_err(|e| format!("State change error: {}", e))?;
					state_changes.push(state_change);
				}
				(current_state, state_changes)
			},
		};

		let mut state_manager =
			Self { storage, current_state, state_change_last_id: None, state_change_count: 0 };

		for state_change in state_changes {
			let _ = state_manager.dispatch(state_change);
		}

		let block_number = state_manager.current_state.block_number;
		Ok((state_manager, block_number))
	}

	/// Dispatch without persisting; used during restore replay.
	fn dispatch(&mut self, state_change: StateChange) -> Result<Vec<Event>> {
		let current_state = self.current_state.clone();

		match chain::state_transition(current_state, state_change) {
			Ok(transition) => {
				self.current_state = transition.new_state;
				self.state_change_count = self.state_change_count.wrapping_add(1);
				self.maybe_snapshot();
				Ok(transition.events)
			},
			Err(e) =>
				Err(StateTransitionError { msg: format!("Could not transition: {}", e) }),
		}
	}

	/// Persist and dispatch one state change, recording emitted events.
	pub fn transition(&mut self, state_change: StateChange) -> Result<Vec<Event>> {
		let state_change_id = self
			.storage
			.store_state_change(state_change.clone())
			.map_err(|e| StateTransitionError {
				msg: format!("Could not store state change: {}", e),
			})?;

		let events = self.dispatch(state_change)?;

		self.state_change_last_id = Some(state_change_id);

		if !events.is_empty() {
			self.storage
				.store_events(state_change_id, events.clone())
				.map_err(|e| StateTransitionError {
					msg: format!("Could not store event: {}", e),
				})?;
		}

		Ok(events)
	}

	/// Serialize the current state.
	pub fn snapshot(&self) -> Result<Vec<u8>> {
		serde_json::to_vec(&self.current_state).map_err(|e| StateTransitionError {
			msg: format!("Could not serialize state: {}", e),
		})
	}

	/// Replace the current state with a serialized one.
	pub fn restore(&mut self, data: &[u8]) -> Result<()> {
		self.current_state = serde_json::from_slice(data).map_err(|e| StateTransitionError {
			msg: format!("Could not restore state: {}", e),
		})?;
		Ok(())
	}

	/// Persist a snapshot every `SNAPSHOT_STATE_CHANGE_COUNT` changes.
	fn maybe_snapshot(&mut self) {
		if self.state_change_count % SNAPSHOT_STATE_CHANGE_COUNT != 0 {
			return
		}
		let _ = self.storage.store_snapshot(&self.current_state, self.state_change_last_id);
	}
}
