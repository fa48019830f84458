#![warn(clippy::missing_docs_in_private_items)]

use std::sync::Mutex;

use lumen_primitives::types::{
	Address,
	ChainID,
	ChannelIdentifier,
	SecretHash,
	U64,
};
use lumen_state_machine::types::{
	ChainState,
	Event,
	StateChange,
};
use rusqlite::{
	params,
	Connection,
};
use ulid::Ulid;

use self::types::{
	EventRecord,
	PendingTxRecord,
	Result,
	SnapshotRecord,
	StateChangeRecord,
	StorageError,
	StorageID,
	TxStatus,
};

/// Sqlite DDL.
mod sqlite;
pub mod types;

/// Number of state changes between two snapshots.
pub const SNAPSHOT_STATE_CHANGE_COUNT: u16 = 500;

/// Sqlite-backed persistence for the dispatcher: state changes, emitted
/// events, snapshots, pending transactions and the protocol bookkeeping
/// tables.
pub struct StateStorage {
	conn: Mutex<Connection>,
}

impl StateStorage {
	pub fn new(conn: Connection) -> Self {
		Self { conn: Mutex::new(conn) }
	}

	/// Create tables if not already created.
	pub fn setup_database(&self) -> Result<()> {
		let setup_db_sql = format!(
			"
			PRAGMA foreign_keys=off;
			BEGIN TRANSACTION;
			{}{}{}{}{}{}{}
			COMMIT;
			PRAGMA foreign_keys=on;
			",
			sqlite::DB_CREATE_SETTINGS,
			sqlite::DB_CREATE_STATE_CHANGES,
			sqlite::DB_CREATE_SNAPSHOT,
			sqlite::DB_CREATE_STATE_EVENTS,
			sqlite::DB_CREATE_REMOVED_LOCKS,
			sqlite::DB_CREATE_ACKS,
			sqlite::DB_CREATE_PENDING_TXS,
		);
		self.conn
			.lock()
			.map_err(|_| StorageError::CannotLock)?
			.execute_batch(&setup_db_sql)?;
		Ok(())
	}

	/// Store one setting value under a name.
	fn set_setting(&self, name: &str, value: String) -> Result<()> {
		self.conn
			.lock()
			.map_err(|_| StorageError::CannotLock)?
			.execute(
				"INSERT OR REPLACE INTO settings(name, value) VALUES(?1, ?2)",
				params![name, value],
			)?;
		Ok(())
	}

	/// Fetch one setting value by name.
	fn get_setting(&self, name: &str) -> Result<Option<String>> {
		let conn = self.conn.lock().map_err(|_| StorageError::CannotLock)?;
		let mut stmt = conn.prepare("SELECT value FROM settings WHERE name = ?1")?;
		let mut rows = stmt.query(params![name])?;
		match rows.next()? {
			Some(row) => Ok(Some(row.get(0)?)),
			None => Ok(None),
		}
	}

	pub fn set_chain_id(&self, chain_id: ChainID) -> Result<()> {
		self.set_setting("chain_id", chain_id.to_string())
	}

	pub fn chain_id(&self) -> Result<Option<String>> {
		self.get_setting("chain_id")
	}

	pub fn set_last_processed_block(&self, block_number: U64) -> Result<()> {
		self.set_setting("last_processed_block", block_number.as_u64().to_string())
	}

	pub fn last_processed_block(&self) -> Result<Option<U64>> {
		Ok(self
			.get_setting("last_processed_block")?
			.and_then(|value| value.parse::<u64>().ok())
			.map(U64::from))
	}

	/// Store a state change, returning its identifier.
	pub fn store_state_change(&self, state_change: StateChange) -> Result<StorageID> {
		let serialized = serde_json::to_string(&state_change)?;
		let ulid = Ulid::new();
		self.conn
			.lock()
			.map_err(|_| StorageError::CannotLock)?
			.execute(
				"INSERT INTO state_changes(identifier, data) VALUES(?1, ?2)",
				params![ulid.to_string(), serialized],
			)?;
		Ok(ulid.into())
	}

	/// Store the events produced by one state change.
	pub fn store_events(&self, state_change_id: StorageID, events: Vec<Event>) -> Result<()> {
		let conn = self.conn.lock().map_err(|_| StorageError::CannotLock)?;
		for event in events {
			let serialized = serde_json::to_string(&event)?;
			conn.execute(
				"INSERT INTO state_events(identifier, source_statechange_id, data)
				VALUES(?1, ?2, ?3)",
				params![Ulid::new().to_string(), state_change_id.to_string(), serialized],
			)?;
		}
		Ok(())
	}

	/// Store a chain state snapshot.
	pub fn store_snapshot(
		&self,
		state: &ChainState,
		state_change_id: Option<StorageID>,
	) -> Result<()> {
		let serialized = serde_json::to_string(state)?;
		let state_change_id = state_change_id.map(|id| id.inner).unwrap_or_else(Ulid::nil);
		self.conn
			.lock()
			.map_err(|_| StorageError::CannotLock)?
			.execute(
				"INSERT INTO state_snapshot(identifier, statechange_id, data)
				VALUES(?1, ?2, ?3)",
				params![Ulid::new().to_string(), state_change_id.to_string(), serialized],
			)?;
		Ok(())
	}

	/// Latest snapshot taken at or before the given state change.
	pub fn get_snapshot_before_state_change(
		&self,
		state_change_id: StorageID,
	) -> Result<Option<SnapshotRecord>> {
		let conn = self.conn.lock().map_err(|_| StorageError::CannotLock)?;
		let mut stmt = conn.prepare(
			"SELECT identifier, statechange_id, data FROM state_snapshot
			WHERE statechange_id <= ?1 ORDER BY identifier DESC LIMIT 1",
		)?;
		let mut rows = stmt.query(params![state_change_id.to_string()])?;
		match rows.next()? {
			Some(row) => {
				let identifier: String = row.get(0)?;
				let statechange_id: String = row.get(1)?;
				Ok(Some(SnapshotRecord {
					identifier: parse_ulid(&identifier)?,
					state_change_identifier: parse_ulid(&statechange_id)?,
					data: row.get(2)?,
				}))
			},
			None => Ok(None),
		}
	}

	/// All state changes in the given identifier range, oldest first.
	pub fn get_state_changes_in_range(
		&self,
		start: StorageID,
		end: StorageID,
	) -> Result<Vec<StateChangeRecord>> {
		let conn = self.conn.lock().map_err(|_| StorageError::CannotLock)?;
		let mut stmt = conn.prepare(
			"SELECT identifier, data FROM state_changes
			WHERE identifier > ?1 AND identifier <= ?2 ORDER BY identifier",
		)?;
		let mut rows = stmt.query(params![start.to_string(), end.to_string()])?;
		let mut records = vec![];
		while let Some(row) = rows.next()? {
			let identifier: String = row.get(0)?;
			records.push(StateChangeRecord {
				identifier: parse_ulid(&identifier)?,
				data: row.get(1)?,
			});
		}
		Ok(records)
	}

	/// All stored events, oldest first.
	pub fn events(&self) -> Result<Vec<EventRecord>> {
		let conn = self.conn.lock().map_err(|_| StorageError::CannotLock)?;
		let mut stmt = conn.prepare(
			"SELECT identifier, source_statechange_id, data FROM state_events
			ORDER BY identifier",
		)?;
		let mut rows = stmt.query([])?;
		let mut records = vec![];
		while let Some(row) = rows.next()? {
			let identifier: String = row.get(0)?;
			let statechange_id: String = row.get(1)?;
			records.push(EventRecord {
				identifier: parse_ulid(&identifier)?,
				state_change_identifier: parse_ulid(&statechange_id)?,
				data: row.get(2)?,
			});
		}
		Ok(records)
	}

	/// Log a lock removed from a channel tree. Kept so an obsolete unlock
	/// attempt by the partner can be punished.
	pub fn store_removed_lock(
		&self,
		channel_identifier: ChannelIdentifier,
		participant: Address,
		secrethash: SecretHash,
	) -> Result<()> {
		self.conn
			.lock()
			.map_err(|_| StorageError::CannotLock)?
			.execute(
				"INSERT INTO removed_locks(channel_identifier, participant, secrethash)
				VALUES(?1, ?2, ?3)",
				params![
					format!("{:#x}", channel_identifier),
					format!("{:#x}", participant),
					format!("{:#x}", secrethash)
				],
			)?;
		Ok(())
	}

	/// Record an acknowledged message; returns false if it was seen before.
	pub fn ack_message(&self, message_identifier: u64) -> Result<bool> {
		let inserted = self.conn.lock().map_err(|_| StorageError::CannotLock)?.execute(
			"INSERT OR IGNORE INTO message_acks(message_identifier) VALUES(?1)",
			params![message_identifier.to_string()],
		)?;
		Ok(inserted > 0)
	}

	/// Track a newly submitted transaction.
	pub fn store_pending_tx(&self, description: &str) -> Result<StorageID> {
		let ulid = Ulid::new();
		self.conn
			.lock()
			.map_err(|_| StorageError::CannotLock)?
			.execute(
				"INSERT INTO pending_txs(identifier, description, status) VALUES(?1, ?2, ?3)",
				params![ulid.to_string(), description, "pending"],
			)?;
		Ok(ulid.into())
	}

	/// Record a transaction's terminal outcome.
	pub fn finalize_pending_tx(
		&self,
		identifier: StorageID,
		transaction_hash: Option<String>,
		status: TxStatus,
		error: Option<String>,
	) -> Result<()> {
		let status = match status {
			TxStatus::Pending => "pending",
			TxStatus::Success => "success",
			TxStatus::Failed => "failed",
		};
		self.conn
			.lock()
			.map_err(|_| StorageError::CannotLock)?
			.execute(
				"UPDATE pending_txs SET transaction_hash = ?1, status = ?2, error = ?3
				WHERE identifier = ?4",
				params![transaction_hash, status, error, identifier.to_string()],
			)?;
		Ok(())
	}

	/// All transactions that never reached a terminal state.
	pub fn pending_txs(&self) -> Result<Vec<PendingTxRecord>> {
		let conn = self.conn.lock().map_err(|_| StorageError::CannotLock)?;
		let mut stmt = conn.prepare(
			"SELECT identifier, description, transaction_hash, error FROM pending_txs
			WHERE status = 'pending' ORDER BY identifier",
		)?;
		let mut rows = stmt.query([])?;
		let mut records = vec![];
		while let Some(row) = rows.next()? {
			let identifier: String = row.get(0)?;
			records.push(PendingTxRecord {
				identifier: parse_ulid(&identifier)?,
				description: row.get(1)?,
				transaction_hash: row.get(2)?,
				status: TxStatus::Pending,
				error: row.get(3)?,
			});
		}
		Ok(records)
	}
}

/// Parse a stored ULID column.
fn parse_ulid(value: &str) -> Result<StorageID> {
	Ulid::from_string(value)
		.map(StorageID::from)
		.map_err(|_| StorageError::FieldUnknown(value.to_owned()))
}
